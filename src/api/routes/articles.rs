use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::api::state::AppState;
use crate::api::ApiError;

/// Header naming where the served view came from: `store` or `cache`.
pub const SERVED_FROM_HEADER: &str = "x-served-from";

pub async fn health() -> &'static str {
    "brutal-digest is online"
}

/// GET /api/articles
///
/// The current generation grouped by source, or the last-known-good
/// snapshot when the store is empty or failing.
pub async fn list_articles(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let served = state.articles.get_articles().await?;
    Ok((
        [(SERVED_FROM_HEADER, served.outcome.served_from())],
        Json(served.articles),
    ))
}
