//! Market wide popularity movement per day.

use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use robintrack_service::services::barometer::DEFAULT_TOP_CHANGES;
use serde::Deserialize;

use super::{day_id_param, json_response, limit_param, ResponseError, Services};

#[derive(Debug, Deserialize)]
pub struct TopChangesParams {
    limit: Option<usize>,
}

pub async fn timeseries(State(services): State<Services>) -> Result<Response, ResponseError> {
    let body = services.barometer.timeseries().await?;
    Ok(json_response(body))
}

pub async fn top_changes(
    State(services): State<Services>,
    day_id: Result<Path<String>, PathRejection>,
    params: Result<Query<TopChangesParams>, QueryRejection>,
) -> Result<Response, ResponseError> {
    let day_id = day_id_param(day_id)?;
    let Query(params) = params?;
    let limit = limit_param(params.limit.or(Some(DEFAULT_TOP_CHANGES)))?;
    let body = services.barometer.top_changes(&day_id, limit).await?;
    Ok(json_response(body))
}
