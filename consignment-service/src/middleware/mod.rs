//! Company context extraction.
//!
//! Every record in this service is keyed by company; the company id arrives
//! on each request as a header set by the gateway after authentication.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;
use uuid::Uuid;

/// Company context extracted from request headers.
#[derive(Debug, Clone)]
pub struct CompanyContext {
    pub company_id: Uuid,
    /// Operator recorded as the actor in history entries.
    pub user_id: Option<String>,
}

impl CompanyContext {
    /// Actor name for history entries when no user header was sent.
    pub fn actor(&self) -> &str {
        self.user_id.as_deref().unwrap_or("system")
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CompanyContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get("X-Company-ID")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::BadRequest(anyhow::anyhow!("Missing X-Company-ID header"))
            })?;

        let company_id = Uuid::parse_str(raw).map_err(|_| {
            AppError::BadRequest(anyhow::anyhow!("X-Company-ID must be a UUID"))
        })?;

        let user_id = parts
            .headers
            .get("X-User-ID")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let span = tracing::Span::current();
        span.record("company_id", raw);
        if let Some(ref uid) = user_id {
            span.record("user_id", uid.as_str());
        }

        Ok(CompanyContext {
            company_id,
            user_id,
        })
    }
}
