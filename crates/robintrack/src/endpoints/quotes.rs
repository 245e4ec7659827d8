//! Bid and ask prices.

use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use serde::Deserialize;

use super::{json_response, symbol_param, ResponseError, Services};

#[derive(Debug, Deserialize)]
pub struct QuotesParams {
    /// Comma separated list of symbols.
    #[serde(default)]
    symbols: String,
}

pub async fn quote(
    State(services): State<Services>,
    symbol: Result<Path<String>, PathRejection>,
) -> Result<Response, ResponseError> {
    let symbol = symbol_param(symbol)?;
    let body = services.quotes.quote(&symbol).await?;
    Ok(json_response(body))
}

pub async fn quote_history(
    State(services): State<Services>,
    symbol: Result<Path<String>, PathRejection>,
) -> Result<Response, ResponseError> {
    let symbol = symbol_param(symbol)?;
    let body = services.quotes.quote_history(&symbol).await?;
    Ok(json_response(body))
}

pub async fn quotes(
    State(services): State<Services>,
    params: Result<Query<QuotesParams>, QueryRejection>,
) -> Result<Response, ResponseError> {
    let Query(params) = params?;
    let symbols: Vec<String> = params
        .symbols
        .split(',')
        .filter(|symbol| !symbol.is_empty())
        .map(str::to_owned)
        .collect();
    if symbols.is_empty() {
        return Err(ResponseError::bad_request("no_symbols_supplied"));
    }

    let body = services.quotes.quotes(&symbols).await?;
    Ok(json_response(body))
}
