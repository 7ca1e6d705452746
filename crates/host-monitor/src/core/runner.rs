use crate::core::client::QueryClient;
use crate::core::decode::{Decoder, OutputFormat};
use crate::core::limits::with_limit;
use crate::core::report::PageObserver;
use crate::core::schema::{ensure_identifier, ColumnInfo};
use crate::core::types::{Page, QueryRequest};
use crate::error::{AppError, AppResult};

/// Lazy, forward-only sequence of pages for one query.
///
/// Each call to [`PageStream::next_page`] issues at most one fetch. The stream
/// ends after the page that carries no next token, or right after the first
/// failed fetch. A stream abandoned before its last page should be
/// [released](PageStream::release) so the store can drop the cursor.
pub struct PageStream<'a, C> {
    client: &'a C,
    query: String,
    page_size: Option<usize>,
    next_token: Option<String>,
    schema: Option<Vec<ColumnInfo>>,
    /// Query id while the store still holds pages for it.
    open_query: Option<String>,
    fetched: usize,
    done: bool,
}

impl<'a, C: QueryClient> PageStream<'a, C> {
    fn new(client: &'a C, query: String, page_size: Option<usize>) -> Self {
        Self {
            client,
            query,
            page_size,
            next_token: None,
            schema: None,
            open_query: None,
            fetched: 0,
            done: false,
        }
    }

    pub async fn next_page(&mut self) -> Option<AppResult<Page>> {
        if self.done {
            return None;
        }

        let request = QueryRequest {
            query_string: self.query.clone(),
            next_token: self.next_token.take(),
            max_rows: self.page_size,
        };
        let client = self.client;
        let res = client.query(request).await.and_then(|page| {
            self.fetched += 1;
            self.open_query = page.next_token.as_ref().map(|_| page.query_id.clone());
            self.check_schema(&page)?;
            Ok(page)
        });

        match res {
            Ok(page) => {
                self.next_token = page.next_token.clone();
                self.done = self.next_token.is_none();
                Some(Ok(page))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }

    pub fn pages_fetched(&self) -> usize {
        self.fetched
    }

    /// Cancels the query on the store if pages are still pending.
    pub async fn release(&mut self) {
        self.done = true;
        let Some(query_id) = self.open_query.take() else {
            return;
        };
        match self.client.cancel_query(&query_id).await {
            Ok(_) => tracing::debug!(query_id = %query_id, "released unfinished query"),
            Err(e) => tracing::debug!(query_id = %query_id, error = %e, "releasing query failed"),
        }
    }

    fn check_schema(&mut self, page: &Page) -> AppResult<()> {
        match &self.schema {
            None => {
                self.schema = Some(page.column_info.clone());
                Ok(())
            }
            Some(schema) if *schema == page.column_info => Ok(()),
            Some(_) => Err(AppError::malformed(format!(
                "column info changed on page {} of query {}",
                self.fetched, page.query_id
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub enum CancelOutcome {
    Cancelled,
    /// The query finished before the cancel request reached the store.
    AlreadyFinished(String),
    Failed(AppError),
}

pub struct QueryRunner<C> {
    client: C,
    base_query: String,
    decoder: Decoder,
    format: OutputFormat,
}

impl<C: QueryClient> QueryRunner<C> {
    pub fn new(client: C, database: &str, table: &str) -> AppResult<Self> {
        ensure_identifier("database", database)?;
        ensure_identifier("table", table)?;
        Ok(Self {
            client,
            base_query: format!("SELECT * FROM {database}.{table}"),
            decoder: Decoder::default(),
            format: OutputFormat::Text,
        })
    }

    pub fn with_decoder(mut self, decoder: Decoder) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn base_query(&self) -> &str {
        &self.base_query
    }

    pub fn pages(&self, query: &str, page_size: Option<usize>) -> PageStream<'_, C> {
        PageStream::new(&self.client, query.to_string(), page_size)
    }

    /// Consumes every page of `query`, returning the number of pages processed.
    pub async fn run_query(
        &self,
        query: &str,
        page_size: Option<usize>,
        observer: &mut dyn PageObserver,
    ) -> AppResult<usize> {
        observer.on_query_start(query)?;
        let mut stream = self.pages(query, page_size);
        while let Some(page) = stream.next_page().await {
            let res = page.and_then(|page| self.parse_page(&page, observer));
            if let Err(e) = res {
                tracing::error!(code = e.code(), error = %e, query, "exception while running query");
                stream.release().await;
                return Err(e);
            }
        }
        tracing::debug!(query, pages = stream.pages_fetched(), "query finished");
        Ok(stream.pages_fetched())
    }

    pub async fn run_query_with_limit(
        &self,
        limit: usize,
        page_size: Option<usize>,
        observer: &mut dyn PageObserver,
    ) -> AppResult<usize> {
        let query = with_limit(&self.base_query, limit);
        tracing::info!(query = %query, "starting query with multiple pages");
        self.run_query(&query, page_size, observer).await
    }

    /// Runs each query in turn; a failed query does not stop the rest.
    pub async fn run_all_queries(
        &self,
        queries: &[String],
        page_size: Option<usize>,
        observer: &mut dyn PageObserver,
    ) -> usize {
        let mut succeeded = 0;
        for (i, query) in queries.iter().enumerate() {
            tracing::info!(index = i + 1, query = %query, "running query");
            if self.run_query(query, page_size, observer).await.is_ok() {
                succeeded += 1;
            }
        }
        succeeded
    }

    /// Submits the base query and cancels it by id. Failures are logged, not returned.
    pub async fn cancel_query(&self) -> CancelOutcome {
        tracing::info!(query = %self.base_query, "starting query");
        let request = QueryRequest {
            query_string: self.base_query.clone(),
            next_token: None,
            max_rows: None,
        };
        let page = match self.client.query(request).await {
            Ok(page) => page,
            Err(e) => {
                tracing::error!(code = e.code(), error = %e, "submitting query for cancellation failed");
                return CancelOutcome::Failed(e);
            }
        };

        tracing::info!(query_id = %page.query_id, "cancelling query");
        match self.client.cancel_query(&page.query_id).await {
            Ok(resp) => match resp.cancellation_message {
                Some(msg) => {
                    tracing::info!(query_id = %page.query_id, message = %msg, "nothing to cancel");
                    CancelOutcome::AlreadyFinished(msg)
                }
                None => {
                    tracing::info!(query_id = %page.query_id, "query has been successfully cancelled");
                    CancelOutcome::Cancelled
                }
            },
            Err(e) => {
                let e = match e {
                    AppError::Cancellation(_) => e,
                    other => AppError::Cancellation(other.to_string()),
                };
                tracing::error!(query_id = %page.query_id, error = %e, "cancelling query failed");
                CancelOutcome::Failed(e)
            }
        }
    }

    fn parse_page(&self, page: &Page, observer: &mut dyn PageObserver) -> AppResult<()> {
        observer.on_status(&page.query_status)?;
        let rows = self.decoder.decode_page(page, self.format)?;
        observer.on_metadata(&page.column_info)?;
        for row in &rows {
            observer.on_row(row)?;
        }
        Ok(())
    }
}
