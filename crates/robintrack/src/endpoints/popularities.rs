//! Symbols with the largest popularity changes over a recent time span.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::response::Response;
use robintrack_service::dataset::ChangeDirection;
use serde::Deserialize;

use super::{json_response, limit_param, ResponseError, Services};

#[derive(Debug, Deserialize)]
pub struct ChangesParams {
    hours_ago: Option<i64>,
    limit: Option<usize>,
}

impl ChangesParams {
    fn hours_ago(&self) -> Result<u32, ResponseError> {
        self.hours_ago
            .filter(|hours| *hours > 0)
            .and_then(|hours| u32::try_from(hours).ok())
            .ok_or_else(|| {
                ResponseError::bad_request("please provide a positive integer for hours_ago")
            })
    }
}

async fn changes(
    services: Services,
    direction: ChangeDirection,
    params: Result<Query<ChangesParams>, QueryRejection>,
) -> Result<Response, ResponseError> {
    let Query(params) = params?;
    let hours_ago = params.hours_ago()?;
    let limit = limit_param(params.limit)?;
    let body = services
        .popularity
        .largest_popularity_changes(direction, hours_ago, limit)
        .await?;
    Ok(json_response(body))
}

pub async fn largest_popularity_changes(
    State(services): State<Services>,
    params: Result<Query<ChangesParams>, QueryRejection>,
) -> Result<Response, ResponseError> {
    changes(services, ChangeDirection::Any, params).await
}

pub async fn largest_popularity_increases(
    State(services): State<Services>,
    params: Result<Query<ChangesParams>, QueryRejection>,
) -> Result<Response, ResponseError> {
    changes(services, ChangeDirection::Increase, params).await
}

pub async fn largest_popularity_decreases(
    State(services): State<Services>,
    params: Result<Query<ChangesParams>, QueryRejection>,
) -> Result<Response, ResponseError> {
    changes(services, ChangeDirection::Decrease, params).await
}
