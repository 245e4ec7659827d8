//! Rankings and per-symbol popularity data.

use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use super::{json_response, limit_param, symbol_param, ResponseError, Services};

const DEFAULT_BINS: usize = 10;

#[derive(Debug, Deserialize)]
pub struct RankingParams {
    limit: Option<usize>,
    #[serde(default)]
    start_index: usize,
}

#[derive(Debug, Deserialize)]
pub struct BinsParams {
    bins: Option<usize>,
}

pub async fn most_popular(
    State(services): State<Services>,
    params: Result<Query<RankingParams>, QueryRejection>,
) -> Result<Response, ResponseError> {
    let Query(params) = params?;
    let limit = limit_param(params.limit)?;
    let body = services
        .popularity
        .most_popular(limit, params.start_index)
        .await?;
    Ok(json_response(body))
}

pub async fn least_popular(
    State(services): State<Services>,
    params: Result<Query<RankingParams>, QueryRejection>,
) -> Result<Response, ResponseError> {
    let Query(params) = params?;
    let limit = limit_param(params.limit)?;
    let body = services
        .popularity
        .least_popular(limit, params.start_index)
        .await?;
    Ok(json_response(body))
}

pub async fn total_symbols(State(services): State<Services>) -> Result<Response, ResponseError> {
    let body = services.popularity.total_symbols().await?;
    Ok(json_response(body))
}

pub async fn popularity_bins(
    State(services): State<Services>,
    params: Result<Query<BinsParams>, QueryRejection>,
) -> Result<Response, ResponseError> {
    let Query(params) = params?;
    let bins = match params.bins.unwrap_or(DEFAULT_BINS) {
        0 => return Err(ResponseError::bad_request("bins must be a positive integer")),
        bins if bins > super::MAX_LIMIT => {
            return Err(ResponseError::bad_request(
                "bins must not be larger than 1000",
            ))
        }
        bins => bins,
    };
    let body = services.popularity.popularity_bins(bins).await?;
    Ok(json_response(body))
}

pub async fn popularity_history(
    State(services): State<Services>,
    symbol: Result<Path<String>, PathRejection>,
) -> Result<Response, ResponseError> {
    let symbol = symbol_param(symbol)?;
    let body = services.popularity.popularity_history(&symbol).await?;
    Ok(json_response(body))
}

pub async fn popularity_history_csv(
    State(services): State<Services>,
    symbol: Result<Path<String>, PathRejection>,
) -> Result<Response, ResponseError> {
    let symbol = symbol_param(symbol)?;
    let body = services.popularity.popularity_history_csv(&symbol).await?;
    let disposition = format!("attachment; filename=\"{symbol}_popularity_history.csv\"");
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_owned()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

pub async fn popularity_ranking(
    State(services): State<Services>,
    symbol: Result<Path<String>, PathRejection>,
) -> Result<Response, ResponseError> {
    let symbol = symbol_param(symbol)?;
    let body = services.popularity.popularity_ranking(&symbol).await?;
    Ok(json_response(body))
}
