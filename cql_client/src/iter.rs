//! Lazy iteration over paged results.

use std::{collections::VecDeque, sync::Arc};

use bytes::Bytes;
use cql_types::{ColumnSpec, Row, RowData, ScanTarget};
use futures::Stream;
use tracing::{debug, trace, warn};

use crate::{
    Error, Result,
    dispatch::{PagingState, QueryRequest, Request, Response, RowsPage},
    session::{ExecutionContext, ExecutionInfo, Session},
};

/// A forward-only iterator over the rows of a statement's result
///
/// Pages after the first are fetched as the iterator advances, through the same retry loop
/// as the statement itself. Once an advance fails, the iterator is finished and every later
/// advance yields `None`.
///
/// While more pages remain the server holds a cursor for the iterator. [`RowIter::close`]
/// releases it; dropping an unfinished iterator releases it in the background.
#[derive(Debug)]
pub struct RowIter {
    session: Session,
    ctx: ExecutionContext,
    request: QueryRequest,
    idempotent: bool,
    columns: Arc<[ColumnSpec]>,
    page: VecDeque<Vec<Option<Bytes>>>,
    paging_state: Option<PagingState>,
    info: ExecutionInfo,
    done: bool,
}

impl RowIter {
    pub(crate) async fn start(
        session: Session,
        ctx: ExecutionContext,
        request: QueryRequest,
        idempotent: bool,
    ) -> Result<Self> {
        let outcome = session
            .run(&Request::Query(request.clone()), idempotent, &ctx)
            .await;
        let mut iter = Self {
            session,
            ctx,
            request,
            idempotent,
            columns: Arc::from(Vec::new()),
            page: VecDeque::new(),
            paging_state: None,
            info: outcome.info,
            done: false,
        };
        match outcome.result? {
            Response::Rows(page) => iter.load(page),
            Response::Void | Response::SetKeyspace(_) | Response::SchemaChange => iter.done = true,
        }
        Ok(iter)
    }

    fn load(&mut self, page: RowsPage) {
        trace!(
            rows = page.rows.len(),
            more = page.paging_state.is_some(),
            "loaded page"
        );
        if !page.columns.is_empty() {
            self.columns = page.columns.into();
        }
        self.page = page.rows.into();
        self.paging_state = page.paging_state;
    }

    fn fail(&mut self, error: Error) -> Error {
        self.done = true;
        self.page.clear();
        error
    }

    async fn fetch_page(&mut self, state: PagingState) -> Result<()> {
        let mut request = self.request.clone();
        request.paging_state = Some(state.clone());
        let outcome = self
            .session
            .run(&Request::Query(request), self.idempotent, &self.ctx)
            .await;
        self.info = outcome.info;
        match outcome.result {
            Ok(Response::Rows(page)) => {
                self.load(page);
                Ok(())
            }
            // keep the cursor so it is still released
            Ok(other) => {
                self.paging_state = Some(state);
                Err(self.fail(Error::UnexpectedResponse {
                    request: "query",
                    response: other.kind(),
                }))
            }
            Err(error) => {
                self.paging_state = Some(state);
                Err(self.fail(error))
            }
        }
    }

    /// Advance to the next row
    pub async fn next_row(&mut self) -> Option<Result<Row>> {
        loop {
            if self.done {
                return None;
            }
            if let Some(values) = self.page.pop_front() {
                let row = Row::new(
                    Arc::clone(&self.columns),
                    values,
                    Arc::clone(self.session.codec_registry()),
                );
                return Some(row.map_err(|e| self.fail(e.into())));
            }
            let Some(state) = self.paging_state.take() else {
                self.done = true;
                return None;
            };
            if let Err(error) = self.fetch_page(state).await {
                return Some(Err(error));
            }
        }
    }

    /// Advance to the next row and scan it into `destinations`
    ///
    /// Returns `Ok(false)` once the rows are exhausted. A failed scan leaves every
    /// destination untouched and finishes the iterator.
    pub async fn scan(&mut self, destinations: &mut [&mut dyn ScanTarget]) -> Result<bool> {
        match self.next_row().await {
            None => Ok(false),
            Some(Err(error)) => Err(error),
            Some(Ok(row)) => match row.scan(destinations) {
                Ok(()) => Ok(true),
                Err(error) => Err(self.fail(error.into())),
            },
        }
    }

    /// Advance to the next row and decode it generically
    pub async fn next_row_data(&mut self) -> Option<Result<RowData>> {
        let row = match self.next_row().await? {
            Ok(row) => row,
            Err(error) => return Some(Err(error)),
        };
        Some(row.into_row_data().map_err(|e| self.fail(e.into())))
    }

    /// A row with this result's column names and the zero value of each column's type
    pub fn row_data_template(&self) -> RowData {
        RowData::zeroed(&self.columns)
    }

    /// The result's columns, in projection order
    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    /// Attempts and latency of the most recent page fetch
    pub fn execution_info(&self) -> ExecutionInfo {
        self.info
    }

    /// Adapt the iterator into a [`Stream`] of rows
    pub fn into_stream(self) -> impl Stream<Item = Result<Row>> + Send {
        futures::stream::unfold(self, |mut rows| async move {
            let row = rows.next_row().await?;
            Some((row, rows))
        })
    }

    /// Finish iterating and release the server cursor if pages remain
    pub async fn close(mut self) -> Result<()> {
        self.done = true;
        self.page.clear();
        match self.paging_state.take() {
            Some(state) => {
                debug!("releasing paging state");
                self.session
                    .dispatcher()
                    .close_paging(&state)
                    .await
                    .map_err(Error::ClosePaging)
            }
            None => Ok(()),
        }
    }
}

impl Drop for RowIter {
    fn drop(&mut self) {
        let Some(state) = self.paging_state.take() else {
            return;
        };
        let dispatcher = Arc::clone(self.session.dispatcher());
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("releasing paging state of abandoned row iterator");
                handle.spawn(async move {
                    if let Err(error) = dispatcher.close_paging(&state).await {
                        warn!(%error, "failed to release paging state of abandoned row iterator");
                    }
                });
            }
            Err(_) => {
                warn!("row iterator dropped outside a tokio runtime, paging state not released")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use cql_types::{ColumnType, CqlValue};
    use futures::StreamExt;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::dispatch::{DispatchError, Dispatcher};

    /// Serves `pages` of single-int rows, one page per request, in order
    #[derive(Debug)]
    struct PagedDispatcher {
        pages: Vec<Vec<i32>>,
        fail_page: Option<usize>,
        requests: Mutex<Vec<QueryRequest>>,
        closed: Mutex<Vec<PagingState>>,
    }

    impl PagedDispatcher {
        fn new(pages: Vec<Vec<i32>>) -> Arc<Self> {
            Arc::new(Self {
                pages,
                fail_page: None,
                requests: Mutex::new(Vec::new()),
                closed: Mutex::new(Vec::new()),
            })
        }

        fn failing_at(pages: Vec<Vec<i32>>, fail_page: usize) -> Arc<Self> {
            Arc::new(Self {
                pages,
                fail_page: Some(fail_page),
                requests: Mutex::new(Vec::new()),
                closed: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Dispatcher for PagedDispatcher {
        async fn dispatch(&self, request: &Request) -> Result<Response, DispatchError> {
            let Request::Query(request) = request else {
                return Ok(Response::Void);
            };
            self.requests.lock().push(request.clone());
            tokio::time::sleep(Duration::from_millis(1)).await;

            let index = match &request.paging_state {
                Some(state) => usize::from(state.as_bytes()[0]),
                None => 0,
            };
            if self.fail_page == Some(index) {
                return Err(DispatchError::server(
                    crate::dispatch::DbErrorCode::ReadFailure,
                    "replica failed",
                ));
            }
            let rows = self.pages[index]
                .iter()
                .map(|n| vec![Some(Bytes::copy_from_slice(&n.to_be_bytes()))])
                .collect();
            let paging_state =
                (index + 1 < self.pages.len()).then(|| PagingState::new(vec![index as u8 + 1]));
            Ok(Response::Rows(RowsPage {
                columns: vec![ColumnSpec::new("n", ColumnType::Int)],
                rows,
                paging_state,
            }))
        }

        async fn close_paging(&self, state: &PagingState) -> Result<(), DispatchError> {
            self.closed.lock().push(state.clone());
            Ok(())
        }
    }

    async fn rows(dispatcher: &Arc<PagedDispatcher>) -> RowIter {
        let dispatcher: Arc<dyn Dispatcher> = Arc::<PagedDispatcher>::clone(dispatcher);
        Session::new(dispatcher)
            .execute("SELECT n FROM ks.t")
            .await
            .unwrap()
    }

    #[test_log::test(tokio::test)]
    async fn pages_are_fetched_lazily() {
        let dispatcher = PagedDispatcher::new(vec![vec![1, 2], vec![3], vec![4, 5]]);
        let mut rows = rows(&dispatcher).await;
        assert_eq!(dispatcher.requests.lock().len(), 1);

        let mut seen = Vec::new();
        let mut n = 0i32;
        while rows.scan(&mut [&mut n]).await.unwrap() {
            seen.push(n);
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
        assert_eq!(dispatcher.requests.lock().len(), 3);
        assert!(rows.next_row().await.is_none());

        rows.close().await.unwrap();
        assert!(dispatcher.closed.lock().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn close_releases_remaining_pages() {
        let dispatcher = PagedDispatcher::new(vec![vec![1], vec![2]]);
        let mut rows = rows(&dispatcher).await;
        assert!(rows.next_row().await.unwrap().is_ok());
        rows.close().await.unwrap();
        assert_eq!(
            *dispatcher.closed.lock(),
            vec![PagingState::new(vec![1u8])]
        );
    }

    #[test_log::test(tokio::test)]
    async fn dropping_releases_remaining_pages() {
        let dispatcher = PagedDispatcher::new(vec![vec![1], vec![2]]);
        drop(rows(&dispatcher).await);
        for _ in 0..100 {
            if !dispatcher.closed.lock().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(dispatcher.closed.lock().len(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn failed_page_fetch_ends_iteration() {
        let dispatcher = PagedDispatcher::failing_at(vec![vec![1], vec![2], vec![3]], 1);
        let mut rows = rows(&dispatcher).await;

        assert!(rows.next_row().await.unwrap().is_ok());
        let err = rows.next_row().await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Request { attempts: 1, .. }), "{err}");
        assert!(rows.next_row().await.is_none());
        assert!(rows.next_row().await.is_none());

        // the cursor for the failed page is still released
        rows.close().await.unwrap();
        assert_eq!(
            *dispatcher.closed.lock(),
            vec![PagingState::new(vec![1u8])]
        );
    }

    #[test_log::test(tokio::test)]
    async fn scan_type_mismatch_ends_iteration() {
        let dispatcher = PagedDispatcher::new(vec![vec![1, 2]]);
        let mut rows = rows(&dispatcher).await;
        let mut wrong = String::new();
        let err = rows.scan(&mut [&mut wrong]).await.unwrap_err();
        assert!(matches!(err, Error::Decode(_)), "{err}");
        assert!(wrong.is_empty());
        assert!(rows.next_row().await.is_none());
    }

    #[test_log::test(tokio::test)]
    async fn row_data_and_template() {
        let dispatcher = PagedDispatcher::new(vec![vec![7]]);
        let mut rows = rows(&dispatcher).await;
        assert_eq!(
            rows.row_data_template(),
            RowData {
                columns: vec!["n".to_owned()],
                values: vec![CqlValue::Int(0)],
            }
        );
        let data = rows.next_row_data().await.unwrap().unwrap();
        assert_eq!(data.values, vec![CqlValue::Int(7)]);
        assert!(rows.next_row_data().await.is_none());
        assert_eq!(rows.execution_info().attempts, 1);
        assert!(rows.execution_info().latency > Duration::ZERO);
    }

    #[test_log::test(tokio::test)]
    async fn stream_yields_every_page() {
        let dispatcher = PagedDispatcher::new(vec![vec![1], vec![2, 3]]);
        let values = rows(&dispatcher)
            .await
            .into_stream()
            .map(|row| row.unwrap().get::<i64>(0).unwrap())
            .collect::<Vec<_>>()
            .await;
        assert_eq!(values, vec![1, 2, 3]);
    }
}
