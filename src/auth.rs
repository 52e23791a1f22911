use crate::error::AppError;
use crate::routes::AppState;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::IntoResponse;
use sha3::{Digest, Sha3_256};

pub fn hash_api_key(api_key: &[u8]) -> String {
    let mut hasher = Sha3_256::new();
    hasher.update(api_key);
    format!("{:x}", hasher.finalize())
}

pub async fn auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<impl IntoResponse, AppError> {
    let api_key_bytes = request
        .headers()
        .get("x-api-key")
        .map(|value| value.as_bytes())
        .ok_or_else(|| {
            tracing::debug!("Missing api key on {}", request.uri());
            AppError::Unauthorized
        })?;

    if state.config.api_key_hash != hash_api_key(api_key_bytes) {
        tracing::warn!("Invalid api key on {}", request.uri());
        return Err(AppError::Unauthorized);
    }
    Ok(next.run(request).await)
}
