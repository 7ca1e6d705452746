use crate::core::types::{CancelResponse, Page, QueryRequest, WriteAck, WriteRequest};
use crate::error::AppResult;

/// Executes queries page by page against a time-series store.
pub trait QueryClient {
    /// Fetches the page addressed by `request.next_token` (the first page when absent).
    async fn query(&self, request: QueryRequest) -> AppResult<Page>;

    /// Cancelling a query that already completed succeeds with a message.
    async fn cancel_query(&self, query_id: &str) -> AppResult<CancelResponse>;
}

pub trait WriteClient {
    async fn write_records(&self, request: WriteRequest) -> AppResult<WriteAck>;
}
