use std::{num::NonZeroUsize, sync::Arc, time::Duration};

use cql_client::{
    DbErrorCode, DispatchError, ErrorKind, Request, Session, Statement,
    cql_types::{DecodeError, Row},
};
use cql_test_helpers::MemoryCluster;
use futures::TryStreamExt;
use pretty_assertions::assert_eq;

const ROWS: i32 = 10;

async fn populated() -> (Arc<MemoryCluster>, Session) {
    let cluster = Arc::new(MemoryCluster::new().with_keyspace(
        "ks",
        "SimpleStrategy",
        &[("replication_factor", "1")],
    ));
    let session = cluster.session();
    session
        .execute("CREATE TABLE ks.events (id int PRIMARY KEY, name text)")
        .await
        .unwrap();
    for id in 0..ROWS {
        session
            .execute(
                Statement::new("INSERT INTO ks.events (id, name) VALUES (?, ?)")
                    .with_values((id, format!("event-{id}"))),
            )
            .await
            .unwrap();
    }
    (cluster, session)
}

fn select_all(page_size: usize) -> Statement {
    Statement::new("SELECT id, name FROM ks.events")
        .with_page_size(NonZeroUsize::new(page_size).unwrap())
}

fn resumed_pages(cluster: &MemoryCluster) -> usize {
    cluster
        .requests()
        .iter()
        .filter(|r| matches!(r, Request::Query(q) if q.paging_state.is_some()))
        .count()
}

async fn wait_for_released_cursors(cluster: &MemoryCluster) {
    for _ in 0..100 {
        if cluster.open_cursors() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("{} cursor(s) still open", cluster.open_cursors());
}

#[test_log::test(tokio::test)]
async fn pages_are_fetched_as_rows_are_consumed() {
    let (cluster, session) = populated().await;

    let mut rows = session.execute(select_all(3)).await.unwrap();
    assert_eq!(resumed_pages(&cluster), 0);
    assert_eq!(cluster.open_cursors(), 1);

    let mut ids = Vec::new();
    while let Some(row) = rows.next_row().await {
        let row = row.unwrap();
        let id: i32 = row.get(0).unwrap();
        let name: String = row.get_by_name("name").unwrap();
        assert_eq!(name, format!("event-{id}"));
        ids.push(id);
    }

    assert_eq!(ids, (0..ROWS).collect::<Vec<_>>());
    // 10 rows in pages of 3
    assert_eq!(resumed_pages(&cluster), 3);
    assert_eq!(cluster.open_cursors(), 0);
    assert_eq!(rows.execution_info().attempts, 1);
    rows.close().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn closing_early_releases_the_cursor() {
    let (cluster, session) = populated().await;

    let mut rows = session.execute(select_all(4)).await.unwrap();
    assert!(rows.next_row().await.unwrap().is_ok());
    assert_eq!(cluster.open_cursors(), 1);

    rows.close().await.unwrap();
    assert_eq!(cluster.open_cursors(), 0);
    assert_eq!(resumed_pages(&cluster), 0);
}

#[test_log::test(tokio::test)]
async fn dropping_early_releases_the_cursor() {
    let (cluster, session) = populated().await;

    let mut rows = session.execute(select_all(4)).await.unwrap();
    assert!(rows.next_row().await.unwrap().is_ok());
    drop(rows);

    wait_for_released_cursors(&cluster).await;
}

#[test_log::test(tokio::test)]
async fn scan_reads_into_typed_destinations() {
    let (_cluster, session) = populated().await;

    let mut rows = session
        .execute(
            Statement::new("SELECT id, name FROM ks.events WHERE id = ?").with_values((4,)),
        )
        .await
        .unwrap();
    let mut id = 0_i32;
    let mut name = String::new();
    assert!(rows.scan(&mut [&mut id, &mut name]).await.unwrap());
    assert_eq!((id, name.as_str()), (4, "event-4"));

    assert!(!rows.scan(&mut [&mut id, &mut name]).await.unwrap());
}

#[test_log::test(tokio::test)]
async fn mismatched_scan_leaves_destinations_untouched() {
    let (_cluster, session) = populated().await;

    let mut rows = session.execute(select_all(100)).await.unwrap();
    let mut id = -1_i32;
    let mut flag = false;
    let err = rows.scan(&mut [&mut id, &mut flag]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FatalDecode);
    assert!(matches!(
        err,
        cql_client::Error::Decode(DecodeError::TypeMismatch { column, .. }) if column == "name"
    ));
    assert_eq!((id, flag), (-1, false));
}

#[test_log::test(tokio::test)]
async fn transient_page_failure_is_retried() {
    let (cluster, session) = populated().await;

    let mut rows = session.execute(select_all(5)).await.unwrap();
    for _ in 0..5 {
        rows.next_row().await.unwrap().unwrap();
    }
    cluster.fail_next(DispatchError::server(DbErrorCode::ReadTimeout, "slow replica"));
    let row = rows.next_row().await.unwrap().unwrap();
    assert_eq!(row.get::<i32>(0).unwrap(), 5);
    assert_eq!(rows.execution_info().attempts, 2);
    rows.close().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn failed_page_ends_the_iteration_but_keeps_the_cursor_releasable() {
    let (cluster, session) = populated().await;

    let mut rows = session.execute(select_all(5)).await.unwrap();
    for _ in 0..5 {
        rows.next_row().await.unwrap().unwrap();
    }
    cluster.fail_next(DispatchError::server(DbErrorCode::SyntaxError, "bad paging"));
    let err = rows.next_row().await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FatalRequest);
    assert!(rows.next_row().await.is_none());

    assert_eq!(cluster.open_cursors(), 1);
    rows.close().await.unwrap();
    assert_eq!(cluster.open_cursors(), 0);
}

#[test_log::test(tokio::test)]
async fn rows_as_a_stream() {
    let (cluster, session) = populated().await;

    let rows: Vec<Row> = session
        .execute(select_all(4))
        .await
        .unwrap()
        .into_stream()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(rows.len(), ROWS as usize);
    assert_eq!(cluster.open_cursors(), 0);
}

#[test_log::test(tokio::test)]
async fn undefined_column_is_a_fatal_request() {
    let (cluster, session) = populated().await;

    let err = session
        .execute("SELECT missing FROM ks.events")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FatalRequest);
    assert_eq!(err.attempts(), Some(1));
    assert_eq!(cluster.open_cursors(), 0);
}
