//! The [`Session`] executes statements and batches against a [`Dispatcher`].

use std::{
    num::{NonZeroU32, NonZeroUsize},
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use cql_types::{CodecRegistry, Consistency, CqlValue, FromRow, Row, ScanTarget};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    Error, Result,
    dispatch::{BatchRequest, BatchStatement, DispatchError, Dispatcher, QueryRequest, Request, Response},
    iter::RowIter,
    metadata::{self, KeyspaceMetadata},
    retry::{DefaultRetryPolicy, RetryDecision, RetryPolicy},
    statement::{Batch, MAX_BATCH_STATEMENTS, Statement},
};

/// Execution defaults for a [`Session`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Most dispatches of one request, the first included
    pub max_attempts: NonZeroU32,
    /// Wait before the first retry; doubled for every retry after it
    pub retry_backoff_min: Duration,
    /// Upper bound on the wait between retries
    pub retry_backoff_max: Duration,
    /// How long a single dispatch may take before it counts as a timed out attempt
    pub request_timeout: Option<Duration>,
    /// Rows per page for statements that do not set their own page size
    pub page_size: Option<NonZeroUsize>,
    /// Consistency for statements and batches that do not set their own
    pub consistency: Consistency,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_attempts: NonZeroU32::new(3).unwrap_or(NonZeroU32::MIN),
            retry_backoff_min: Duration::from_millis(10),
            retry_backoff_max: Duration::from_secs(1),
            request_timeout: Some(Duration::from_secs(12)),
            page_size: NonZeroUsize::new(5000),
            consistency: Consistency::default(),
        }
    }
}

impl From<&SessionConfig> for DefaultRetryPolicy {
    fn from(config: &SessionConfig) -> Self {
        Self::new(
            config.max_attempts,
            config.retry_backoff_min,
            config.retry_backoff_max,
        )
    }
}

/// Caller-side limits on one execution
///
/// Cancelling the token, or reaching the deadline, aborts the in-flight dispatch and any
/// further retries.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set the deadline to `timeout` from now
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn interruption(&self, attempts: u32) -> Option<Error> {
        if self.cancel.is_cancelled() {
            Some(Error::Cancelled { attempts })
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(Error::DeadlineExceeded { attempts })
        } else {
            None
        }
    }

    /// Wait until the execution is cancelled or its deadline passes
    async fn interrupted(&self, attempts: u32) -> Error {
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Error::Cancelled { attempts },
            _ = deadline => Error::DeadlineExceeded { attempts },
        }
    }
}

/// Accounting for one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecutionInfo {
    /// Dispatches made, the first included
    pub attempts: u32,
    /// Wall-clock duration of the last dispatch that completed
    pub latency: Duration,
}

/// The result of running a request through the retry loop
#[derive(Debug)]
pub(crate) struct Outcome {
    pub(crate) info: ExecutionInfo,
    pub(crate) result: Result<Response>,
}

/// Executes statements and batches
///
/// A session is cheap to clone and can be shared between tasks; all methods take `&self`.
#[derive(Debug, Clone)]
pub struct Session {
    dispatcher: Arc<dyn Dispatcher>,
    registry: Arc<CodecRegistry>,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
    default_retry_policy: DefaultRetryPolicy,
    config: SessionConfig,
}

impl Session {
    /// Create a [`Session`] with the default configuration and codecs
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        let config = SessionConfig::default();
        Self {
            dispatcher,
            registry: Arc::new(CodecRegistry::default()),
            retry_policy: None,
            default_retry_policy: DefaultRetryPolicy::from(&config),
            config,
        }
    }

    /// Replace the configuration
    ///
    /// Unless a policy was set with [`Session::with_retry_policy`], retries follow a
    /// [`DefaultRetryPolicy`] built from the configuration.
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.default_retry_policy = DefaultRetryPolicy::from(&config);
        self.config = config;
        self
    }

    pub fn with_codec_registry(mut self, registry: CodecRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_retry_policy(mut self, policy: impl RetryPolicy) -> Self {
        self.retry_policy = Some(Arc::new(policy));
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn codec_registry(&self) -> &Arc<CodecRegistry> {
        &self.registry
    }

    pub(crate) fn dispatcher(&self) -> &Arc<dyn Dispatcher> {
        &self.dispatcher
    }

    fn retry_policy(&self) -> &dyn RetryPolicy {
        match &self.retry_policy {
            Some(policy) => policy.as_ref(),
            None => &self.default_retry_policy,
        }
    }

    /// Execute a statement and return an iterator over its rows
    ///
    /// The first page is fetched before this returns. Statements that produce no rows yield
    /// an empty iterator.
    pub async fn execute(&self, statement: impl Into<Statement> + Send) -> Result<RowIter> {
        self.execute_with(statement, &ExecutionContext::default())
            .await
    }

    pub async fn execute_with(
        &self,
        statement: impl Into<Statement> + Send,
        ctx: &ExecutionContext,
    ) -> Result<RowIter> {
        let statement = statement.into();
        let request = QueryRequest {
            text: statement.text().to_owned(),
            values: self.bind(0, statement.values())?,
            consistency: statement.consistency().unwrap_or(self.config.consistency),
            page_size: statement.page_size().or(self.config.page_size),
            paging_state: None,
        };
        RowIter::start(self.clone(), ctx.clone(), request, statement.is_idempotent()).await
    }

    /// Execute a batch, recording its attempts and latency on the batch
    ///
    /// The accounting is updated whether the execution succeeds or not. Empty or oversized
    /// batches fail without being dispatched.
    ///
    /// Transient failures are retried, except for batches that are not idempotent (counter
    /// batches, or any batch holding a statement marked non-idempotent): those are only
    /// dispatched again when the server certainly did not apply them. A reset connection or a
    /// timeout ends such a batch after one attempt with a [`crate::ErrorKind::Transient`] error.
    pub async fn execute_batch(&self, batch: &mut Batch) -> Result<()> {
        self.execute_batch_with(batch, &ExecutionContext::default())
            .await
    }

    pub async fn execute_batch_with(&self, batch: &mut Batch, ctx: &ExecutionContext) -> Result<()> {
        batch.reset_accounting();
        let request = self.batch_request(batch)?;
        let outcome = self
            .run(&Request::Batch(request), batch.is_idempotent(), ctx)
            .await;
        batch.record(outcome.info);
        debug!(
            kind = ?batch.kind(),
            statements = batch.len(),
            attempts = outcome.info.attempts,
            latency = ?outcome.info.latency,
            success = outcome.result.is_ok(),
            "executed batch"
        );
        match outcome.result? {
            // conditional batches answer with an `[applied]` row
            Response::Void | Response::Rows(_) => Ok(()),
            other => Err(Error::UnexpectedResponse {
                request: "batch",
                response: other.kind(),
            }),
        }
    }

    /// Read the first row of a statement's result as `T`
    pub async fn query_one<T: FromRow>(&self, statement: impl Into<Statement> + Send) -> Result<T> {
        let row = self.first_row(statement.into()).await?.ok_or(Error::NoRows)?;
        Ok(T::from_row(&row)?)
    }

    /// Scan the first row of a statement's result into `destinations`
    pub async fn scan_one(
        &self,
        statement: impl Into<Statement> + Send,
        destinations: &mut [&mut dyn ScanTarget],
    ) -> Result<()> {
        let row = self.first_row(statement.into()).await?.ok_or(Error::NoRows)?;
        Ok(row.scan(destinations)?)
    }

    /// Resolve the replication configuration of a keyspace
    pub async fn keyspace_metadata(&self, keyspace: &str) -> Result<KeyspaceMetadata> {
        metadata::resolve(self, keyspace).await
    }

    pub(crate) async fn first_row(&self, statement: Statement) -> Result<Option<Row>> {
        let mut rows = self.execute(statement).await?;
        let row = rows.next_row().await.transpose()?;
        if let Err(error) = rows.close().await {
            warn!(%error, "failed to release paging state");
        }
        Ok(row)
    }

    fn bind(&self, statement: usize, values: &[CqlValue]) -> Result<Vec<Option<Bytes>>> {
        values
            .iter()
            .enumerate()
            .map(|(index, value)| {
                self.registry
                    .encode_natural(value)
                    .map(|encoded| encoded.map(Bytes::from))
                    .map_err(|source| Error::Encode {
                        statement,
                        index,
                        source,
                    })
            })
            .collect()
    }

    fn batch_request(&self, batch: &Batch) -> Result<BatchRequest> {
        if batch.is_empty() {
            return Err(Error::EmptyBatch);
        }
        if batch.len() > MAX_BATCH_STATEMENTS {
            return Err(Error::TooManyStatements(batch.len()));
        }
        if let Some(serial) = batch.serial_consistency().filter(|c| !c.is_serial()) {
            return Err(Error::InvalidSerialConsistency(serial));
        }

        let statements = batch
            .statements()
            .iter()
            .enumerate()
            .map(|(i, statement)| {
                Ok(BatchStatement {
                    text: statement.text().to_owned(),
                    values: self.bind(i, statement.values())?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(BatchRequest {
            kind: batch.kind(),
            statements,
            consistency: batch.consistency().unwrap_or(self.config.consistency),
            serial_consistency: batch.serial_consistency(),
        })
    }

    /// Dispatch a request, retrying as the retry policy decides
    ///
    /// Every dispatch counts as an attempt. The latency is that of the last dispatch that
    /// completed, successfully or not.
    pub(crate) async fn run(&self, request: &Request, idempotent: bool, ctx: &ExecutionContext) -> Outcome {
        let policy = self.retry_policy();
        let mut info = ExecutionInfo::default();

        loop {
            if let Some(error) = ctx.interruption(info.attempts) {
                return Outcome {
                    info,
                    result: Err(error),
                };
            }

            info.attempts += 1;
            let attempt = info.attempts;
            trace!(attempt, request = request.kind(), "dispatching request");

            let start = Instant::now();
            let result = tokio::select! {
                biased;
                error = ctx.interrupted(attempt) => {
                    debug!(attempt, %error, "execution interrupted");
                    return Outcome { info, result: Err(error) };
                }
                result = self.dispatch_once(request) => result,
            };
            info.latency = start.elapsed();

            let error = match result {
                Ok(response) => {
                    trace!(
                        attempt,
                        request = request.kind(),
                        response = response.kind(),
                        latency = ?info.latency,
                        "request completed"
                    );
                    return Outcome {
                        info,
                        result: Ok(response),
                    };
                }
                Err(error) => error,
            };

            match policy.decide(attempt, &error, idempotent) {
                RetryDecision::DontRetry => {
                    debug!(attempt, request = request.kind(), %error, "request failed");
                    return Outcome {
                        info,
                        result: Err(Error::Request {
                            attempts: attempt,
                            source: error,
                        }),
                    };
                }
                RetryDecision::Retry { delay } => {
                    warn!(
                        attempt,
                        request = request.kind(),
                        ?delay,
                        %error,
                        "retrying request"
                    );
                    tokio::select! {
                        biased;
                        error = ctx.interrupted(attempt) => {
                            return Outcome { info, result: Err(error) };
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn dispatch_once(&self, request: &Request) -> Result<Response, DispatchError> {
        match self.config.request_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.dispatcher.dispatch(request))
                .await
                .unwrap_or(Err(DispatchError::Timeout)),
            None => self.dispatcher.dispatch(request).await,
        }
    }
}
