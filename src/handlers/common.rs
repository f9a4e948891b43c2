use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::errors::ServiceError;

/// Authenticated customer identity.
///
/// Authentication itself lives in the gateway/auth layer in front of this
/// service; by the time a request reaches us the verified customer id is
/// carried in the `x-customer-id` header.
#[derive(Debug, Clone, Copy)]
pub struct CustomerId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CustomerId
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get("x-customer-id")
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                ServiceError::Unauthorized("missing x-customer-id header".to_string())
            })?;

        let id = Uuid::parse_str(raw).map_err(|_| {
            ServiceError::Unauthorized("malformed x-customer-id header".to_string())
        })?;

        Ok(CustomerId(id))
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct PaginationParams {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    20
}
