//! Tracked symbol listings.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;

use super::AppState;
use crate::domain::quote::Symbol;

pub(super) async fn stocks_handler(State(state): State<Arc<AppState>>) -> Json<Vec<Symbol>> {
    Json(state.registry.stocks())
}

pub(super) async fn crypto_handler(State(state): State<Arc<AppState>>) -> Json<Vec<Symbol>> {
    Json(state.registry.cryptos())
}
