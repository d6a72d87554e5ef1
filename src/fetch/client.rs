use async_trait::async_trait;
use reqwest::{Request, Response};

/// Seam between the transit API client and the actual HTTP transport.
///
/// Auth decorators wrap it; tests substitute canned responses.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}
