use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::mpsc,
    thread,
    time::Duration,
};

use rusqlite::Connection;
use tokio::sync::oneshot;

use crate::{
    core::{
        client::{QueryClient, WriteClient},
        limits::{effective_limit, MAX_PAGE_ROWS},
        schema::ensure_identifier,
        types::{CancelResponse, Page, QueryRequest, QueryStatus, WriteAck, WriteRequest},
    },
    error::{AppError, AppResult},
    store::{ingest, query, readonly},
};

const BUSY_TIMEOUT_MS: u64 = 2_000;

/// Handle to the SQLite measurement store.
///
/// The connection lives on a dedicated worker thread; handles are cheap to
/// clone and every call is answered over a oneshot channel.
#[derive(Debug, Clone)]
pub struct Store {
    tx: mpsc::Sender<StoreTask>,
    pub path: PathBuf,
}

impl Store {
    /// Opens `path` and attaches it as `database`, so queries address tables
    /// as `<database>.<table>`.
    pub fn open(path: &Path, database: &str) -> AppResult<Self> {
        ensure_identifier("database", database)?;
        let path = canonicalize_lossy(path)?;
        let conn = open_conn(&path, database)?;

        let (tx, rx) = mpsc::channel::<StoreTask>();
        let worker = Worker {
            conn,
            queries: HashMap::new(),
            issued: 0,
        };
        thread::Builder::new()
            .name("store-worker".into())
            .spawn(move || worker.run(rx))?;
        tracing::debug!(path = %path.display(), database, "store opened");
        Ok(Self { tx, path })
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<AppResult<T>>) -> StoreTask) -> AppResult<T> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(make(tx))
            .map_err(|_| AppError::Transport("store worker unavailable".into()))?;
        rx.await
            .map_err(|_| AppError::Transport("store worker dropped response".into()))?
    }
}

impl QueryClient for Store {
    async fn query(&self, request: QueryRequest) -> AppResult<Page> {
        self.call(|respond_to| StoreTask::Query { request, respond_to }).await
    }

    async fn cancel_query(&self, query_id: &str) -> AppResult<CancelResponse> {
        let query_id = query_id.to_string();
        self.call(|respond_to| StoreTask::Cancel { query_id, respond_to }).await
    }
}

impl WriteClient for Store {
    async fn write_records(&self, request: WriteRequest) -> AppResult<WriteAck> {
        self.call(|respond_to| StoreTask::Write { request, respond_to }).await
    }
}

enum StoreTask {
    Query {
        request: QueryRequest,
        respond_to: oneshot::Sender<AppResult<Page>>,
    },
    Cancel {
        query_id: String,
        respond_to: oneshot::Sender<AppResult<CancelResponse>>,
    },
    Write {
        request: WriteRequest,
        respond_to: oneshot::Sender<AppResult<WriteAck>>,
    },
}

struct ActiveQuery {
    sql: String,
    offset: usize,
    total: u64,
    bytes_scanned: u64,
}

struct Worker {
    conn: Connection,
    queries: HashMap<String, ActiveQuery>,
    issued: u64,
}

impl Worker {
    fn run(mut self, rx: mpsc::Receiver<StoreTask>) {
        while let Ok(task) = rx.recv() {
            match task {
                StoreTask::Query { request, respond_to } => {
                    let res = self.query(request);
                    let _ = respond_to.send(res);
                }
                StoreTask::Cancel { query_id, respond_to } => {
                    let res = self.cancel(&query_id);
                    let _ = respond_to.send(res);
                }
                StoreTask::Write { request, respond_to } => {
                    let res = ingest::write_records(&mut self.conn, &request);
                    let _ = respond_to.send(res);
                }
            }
        }
        tracing::debug!("store worker stopped");
    }

    fn query(&mut self, request: QueryRequest) -> AppResult<Page> {
        let sql = query::normalize_sql(&request.query_string);
        let page_rows = effective_limit(request.max_rows, MAX_PAGE_ROWS).max_rows;

        let (query_id, mut active) = match request.next_token {
            None => self.start(sql)?,
            Some(token) => self.resume(&token, &sql)?,
        };

        let page = query::run_page(&self.conn, &active.sql, page_rows, active.offset)?;
        active.offset += page.rows.len();
        active.bytes_scanned += page.bytes;

        let finished = page.rows.len() < page_rows || active.offset as u64 >= active.total;
        let progress_percentage = if finished || active.total == 0 {
            100.0
        } else {
            active.offset as f64 * 100.0 / active.total as f64
        };
        let query_status = QueryStatus {
            progress_percentage,
            cumulative_bytes_scanned: active.bytes_scanned,
            cumulative_bytes_metered: active.bytes_scanned,
        };

        let next_token = if finished {
            tracing::debug!(query_id = %query_id, rows = active.offset, "query complete");
            None
        } else {
            let token = format!("{query_id}:{}", active.offset);
            self.queries.insert(query_id.clone(), active);
            Some(token)
        };

        Ok(Page {
            query_id,
            next_token,
            rows: page.rows,
            column_info: page.columns,
            query_status,
        })
    }

    fn start(&mut self, sql: String) -> AppResult<(String, ActiveQuery)> {
        if !readonly::is_sql_readonly(&self.conn, &sql)? {
            return Err(AppError::InvalidRequest("only read-only queries are accepted".into()));
        }
        let total = query::count_rows(&self.conn, &sql)?;
        self.issued += 1;
        let query_id = format!("q-{}", self.issued);
        tracing::debug!(query_id = %query_id, total, "query started");
        Ok((
            query_id,
            ActiveQuery {
                sql,
                offset: 0,
                total,
                bytes_scanned: 0,
            },
        ))
    }

    fn resume(&mut self, token: &str, sql: &str) -> AppResult<(String, ActiveQuery)> {
        let (query_id, offset) = token
            .rsplit_once(':')
            .and_then(|(id, off)| Some((id, off.parse::<usize>().ok()?)))
            .ok_or_else(|| AppError::Transport(format!("malformed next token: {token}")))?;

        let Some(active) = self.queries.get(query_id) else {
            return Err(AppError::Transport(format!("query {query_id} is not running")));
        };
        if active.sql != sql {
            return Err(AppError::InvalidRequest(format!(
                "next token belongs to a different query than {sql:?}"
            )));
        }
        if active.offset != offset {
            return Err(AppError::Transport(format!("stale next token: {token}")));
        }

        let active = self
            .queries
            .remove(query_id)
            .ok_or_else(|| AppError::Internal("active query vanished".into()))?;
        Ok((query_id.to_string(), active))
    }

    fn cancel(&mut self, query_id: &str) -> AppResult<CancelResponse> {
        if self.queries.remove(query_id).is_some() {
            tracing::debug!(query_id, "query cancelled");
            return Ok(CancelResponse::default());
        }
        if self.was_issued(query_id) {
            return Ok(CancelResponse {
                cancellation_message: Some(format!("query {query_id} already finished")),
            });
        }
        Err(AppError::Cancellation(format!("unknown query id: {query_id}")))
    }

    fn was_issued(&self, query_id: &str) -> bool {
        query_id
            .strip_prefix("q-")
            .and_then(|n| n.parse::<u64>().ok())
            .is_some_and(|n| n >= 1 && n <= self.issued)
    }
}

fn open_conn(path: &Path, database: &str) -> AppResult<Connection> {
    let open_failed = |e: rusqlite::Error| AppError::StoreOpenFailed {
        path: path.to_path_buf(),
        message: e.to_string(),
    };
    let conn = Connection::open_in_memory().map_err(open_failed)?;
    let target = path.to_string_lossy().into_owned();
    conn.execute(&format!("ATTACH DATABASE ?1 AS {database}"), [target.as_str()])
        .map_err(open_failed)?;
    let _ = conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS));
    Ok(conn)
}

fn canonicalize_lossy(path: &Path) -> AppResult<PathBuf> {
    // canonicalize requires the file to exist; SQLite creates it on attach.
    if path.is_absolute() || path.as_os_str() == ":memory:" {
        Ok(path.to_path_buf())
    } else {
        let cwd = std::env::current_dir()?;
        Ok(cwd.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::report::PageObserver;
    use crate::core::runner::{CancelOutcome, QueryRunner};
    use crate::core::types::{CommonAttributes, Dimension, MeasureValueType, Record};

    #[derive(Default)]
    struct Rows(Vec<String>);

    impl PageObserver for Rows {
        fn on_row(&mut self, rendered: &str) -> AppResult<()> {
            self.0.push(rendered.to_string());
            Ok(())
        }
    }

    fn memory_store() -> Store {
        Store::open(Path::new(":memory:"), "monitoring").unwrap()
    }

    fn write(time: &str, records: Vec<Record>) -> WriteRequest {
        WriteRequest {
            database_name: "monitoring".into(),
            table_name: "host_metrics".into(),
            records,
            common_attributes: CommonAttributes {
                dimensions: vec![Dimension::new("device_id", "rpi-01")],
                time: time.into(),
            },
        }
    }

    fn request(sql: &str, next_token: Option<String>, max_rows: Option<usize>) -> QueryRequest {
        QueryRequest {
            query_string: sql.into(),
            next_token,
            max_rows,
        }
    }

    async fn seed(store: &Store, n: usize) {
        for i in 0..n {
            let time = (1_700_000_000_000u64 + i as u64 * 10_000).to_string();
            let ack = store
                .write_records(write(&time, vec![Record::new("cpu_freq", Some(MeasureValueType::Bigint), 1000 + i)]))
                .await
                .unwrap();
            assert_eq!(ack.records_ingested, 1);
        }
    }

    #[tokio::test]
    async fn written_records_read_back_through_runner() {
        let store = memory_store();
        store
            .write_records(write(
                "1700000000000",
                vec![
                    Record::new("cpu_usage", None, 3.5),
                    Record::new("cpu_temp", Some(MeasureValueType::Double), 48.0),
                ],
            ))
            .await
            .unwrap();

        let runner = QueryRunner::new(store, "monitoring", "host_metrics").unwrap();
        let mut rows = Rows::default();
        let pages = runner
            .run_query(
                "SELECT measure_name, \"measure_value::double\", device_id FROM monitoring.host_metrics ORDER BY measure_name",
                None,
                &mut rows,
            )
            .await
            .unwrap();

        assert_eq!(pages, 1);
        assert_eq!(
            rows.0,
            vec![
                "{measure_name=cpu_temp, measure_value::double=48.0, device_id=rpi-01}",
                "{measure_name=cpu_usage, measure_value::double=3.5, device_id=rpi-01}",
            ]
        );
    }

    #[tokio::test]
    async fn page_size_splits_results() {
        let store = memory_store();
        seed(&store, 5).await;

        let runner = QueryRunner::new(store.clone(), "monitoring", "host_metrics").unwrap();
        let mut stream = runner.pages("SELECT * FROM monitoring.host_metrics ORDER BY time LIMIT 4", Some(2));
        let first = stream.next_page().await.unwrap().unwrap();
        assert_eq!(first.rows.len(), 2);
        assert_eq!(first.next_token.as_deref(), Some("q-1:2"));
        assert_eq!(first.query_status.progress_percentage, 50.0);

        let second = stream.next_page().await.unwrap().unwrap();
        assert_eq!(second.rows.len(), 2);
        assert!(second.next_token.is_none());
        assert_eq!(second.query_status.progress_percentage, 100.0);
        assert!(second.query_status.cumulative_bytes_scanned > first.query_status.cumulative_bytes_scanned);
        assert!(stream.next_page().await.is_none());
        assert_eq!(stream.pages_fetched(), 2);

        let names: Vec<_> = first.column_info.iter().filter_map(|c| c.name.clone()).collect();
        assert_eq!(names[..3], ["time", "measure_name", "measure_value::double"]);
    }

    #[tokio::test]
    async fn rejects_writes_through_query_api() {
        let store = memory_store();
        seed(&store, 1).await;
        let err = store
            .query(request("DELETE FROM monitoring.host_metrics", None, None))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn missing_table_is_a_transport_error() {
        let store = memory_store();
        let err = store
            .query(request("SELECT * FROM monitoring.nope", None, None))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "TRANSPORT_ERROR");
    }

    #[tokio::test]
    async fn tokens_are_checked() {
        let store = memory_store();
        seed(&store, 3).await;
        let sql = "SELECT * FROM monitoring.host_metrics";
        let first = store.query(request(sql, None, Some(1))).await.unwrap();
        let token = first.next_token.unwrap();

        let err = store
            .query(request("SELECT time FROM monitoring.host_metrics", Some(token.clone()), Some(1)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");

        assert!(store.query(request(sql, Some("garbage".into()), Some(1))).await.is_err());
        assert!(store.query(request(sql, Some("q-1:0".into()), Some(1))).await.is_err());

        let second = store.query(request(sql, Some(token), Some(1))).await.unwrap();
        assert_eq!(second.query_id, first.query_id);
        assert_eq!(second.next_token.as_deref(), Some("q-1:2"));
    }

    #[tokio::test]
    async fn cancel_stops_an_active_query() {
        let store = memory_store();
        seed(&store, 3).await;
        let sql = "SELECT * FROM monitoring.host_metrics";
        let first = store.query(request(sql, None, Some(1))).await.unwrap();

        let resp = store.cancel_query(&first.query_id).await.unwrap();
        assert!(resp.cancellation_message.is_none());

        let err = store.query(request(sql, first.next_token, Some(1))).await.unwrap_err();
        assert_eq!(err.to_string(), "transport error: query q-1 is not running");
    }

    #[tokio::test]
    async fn cancel_after_completion_is_a_no_op() {
        let store = memory_store();
        seed(&store, 2).await;
        let runner = QueryRunner::new(store.clone(), "monitoring", "host_metrics").unwrap();
        match runner.cancel_query().await {
            CancelOutcome::AlreadyFinished(msg) => assert_eq!(msg, "query q-1 already finished"),
            other => panic!("unexpected outcome: {other:?}"),
        }

        let err = store.cancel_query("q-99").await.unwrap_err();
        assert_eq!(err.code(), "CANCELLATION_FAILED");
    }

    struct BrokenSink;

    impl PageObserver for BrokenSink {
        fn on_row(&mut self, _rendered: &str) -> AppResult<()> {
            Err(AppError::Io("broken pipe".into()))
        }
    }

    #[tokio::test]
    async fn aborted_queries_do_not_stay_active() {
        let store = memory_store();
        seed(&store, 3).await;
        let runner = QueryRunner::new(store.clone(), "monitoring", "host_metrics").unwrap();
        for _ in 0..3 {
            let err = runner
                .run_query(runner.base_query(), Some(1), &mut BrokenSink)
                .await
                .unwrap_err();
            assert_eq!(err.code(), "IO_ERROR");
        }

        for id in ["q-1", "q-2", "q-3"] {
            let resp = store.cancel_query(id).await.unwrap();
            assert_eq!(resp.cancellation_message, Some(format!("query {id} already finished")));
        }
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.db");
        {
            let store = Store::open(&path, "monitoring").unwrap();
            seed(&store, 2).await;
        }

        let store = Store::open(&path, "monitoring").unwrap();
        let page = store
            .query(request("SELECT COUNT(*) AS n FROM monitoring.host_metrics", None, None))
            .await
            .unwrap();
        assert_eq!(page.rows[0].data, vec![crate::core::types::Datum::scalar("2")]);
    }

    #[test]
    fn rejects_unsafe_database_name() {
        let err = Store::open(Path::new(":memory:"), "main; DROP").unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");
    }
}
