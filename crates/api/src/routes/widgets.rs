//! Catalogue routes

use axum::{
    extract::{Path, State},
    Json,
};
use widgetstore_shared::Widget;

use crate::{error::ApiResult, state::AppState};

/// Get a widget by id
pub async fn get_widget(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Widget>> {
    let widget = state.repository.get_widget(id).await?;
    Ok(Json(widget))
}
