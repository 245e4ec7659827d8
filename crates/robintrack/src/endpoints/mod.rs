use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::PathRejection;
use axum::extract::{ConnectInfo, Path, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use once_cell::sync::Lazy;
use regex::Regex;
use robintrack_service::metric;
use robintrack_service::ratelimit::Decision;
use robintrack_service::services::SharedServices;
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};
use tower::ServiceBuilder;

mod barometer;
mod error;
mod metrics;
mod popularities;
mod quotes;
mod stocks;

pub use error::ResponseError;
use metrics::MetricsLayer;

/// The state shared by all handlers.
pub type Services = Arc<SharedServices>;

/// Default number of entries in list responses.
const DEFAULT_LIMIT: usize = 50;
/// Upper bound for the `limit` query parameter.
const MAX_LIMIT: usize = 1000;

static SYMBOL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9.]+$").unwrap());
static DAY_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d\d-\d\d$").unwrap());

pub async fn healthcheck() -> &'static str {
    metric!(counter("healthcheck") += 1);
    "ok"
}

pub fn create_app(services: SharedServices) -> Router {
    let services = Arc::new(services);

    // The layers here go "top to bottom" according to the reading order here.
    let layer = ServiceBuilder::new()
        .layer(NewSentryLayer::new_from_top())
        .layer(SentryHttpLayer::new().enable_transaction())
        .layer(MetricsLayer)
        .layer(middleware::from_fn_with_state(services.clone(), rate_limit));

    Router::new()
        .route("/most_popular", get(stocks::most_popular))
        .route("/least_popular", get(stocks::least_popular))
        .route("/total_symbols", get(stocks::total_symbols))
        .route("/popularity_bins", get(stocks::popularity_bins))
        .route("/quotes", get(quotes::quotes))
        .route("/stocks/:symbol/quote", get(quotes::quote))
        .route("/stocks/:symbol/quote_history", get(quotes::quote_history))
        .route(
            "/stocks/:symbol/popularity_history",
            get(stocks::popularity_history),
        )
        .route(
            "/stocks/:symbol/popularity_history_csv",
            get(stocks::popularity_history_csv),
        )
        .route(
            "/stocks/:symbol/popularity_ranking",
            get(stocks::popularity_ranking),
        )
        .route("/barometer/timeseries", get(barometer::timeseries))
        .route(
            "/barometer/top_changes/:day_id",
            get(barometer::top_changes),
        )
        .route(
            "/largest_popularity_changes",
            get(popularities::largest_popularity_changes),
        )
        .route(
            "/largest_popularity_increases",
            get(popularities::largest_popularity_increases),
        )
        .route(
            "/largest_popularity_decreases",
            get(popularities::largest_popularity_decreases),
        )
        .with_state(services)
        .layer(layer)
        // the healthcheck is last, as it will bypass all the middlewares
        .route("/healthcheck", get(healthcheck))
}

/// Rejects requests of clients that exceeded their budget with `429 Too Many Requests`.
async fn rate_limit(State(services): State<Services>, request: Request, next: Next) -> Response {
    let client = client_ip(request.headers(), request.extensions().get());
    let path = request.uri().path().to_owned();

    match services.rate_limiter.check(&client, &path).await {
        Decision::Allowed => next.run(request).await,
        Decision::Limited { retry_after } => {
            let retry_after = retry_after.as_secs().max(1).to_string();
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, retry_after)],
                Json(serde_json::json!({ "error": "too_many_requests" })),
            )
                .into_response()
        }
    }
}

/// The address requests are counted under.
///
/// Behind a proxy, this is the first address in `X-Forwarded-For`, otherwise the peer address.
fn client_ip(headers: &HeaderMap, connect_info: Option<&ConnectInfo<SocketAddr>>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    match (forwarded, connect_info) {
        (Some(ip), _) => ip.to_owned(),
        (None, Some(ConnectInfo(addr))) => addr.ip().to_string(),
        (None, None) => "unknown".to_owned(),
    }
}

/// Validates an optional `limit` query parameter.
fn limit_param(limit: Option<usize>) -> Result<usize, ResponseError> {
    match limit.unwrap_or(DEFAULT_LIMIT) {
        limit if limit > MAX_LIMIT => Err(ResponseError::bad_request(
            "limit must not be larger than 1000",
        )),
        limit => Ok(limit),
    }
}

/// Extracts a ticker symbol like `BRK.A` from the path.
fn symbol_param(symbol: Result<Path<String>, PathRejection>) -> Result<String, ResponseError> {
    let Path(symbol) = symbol?;
    if !SYMBOL_RE.is_match(&symbol) {
        return Err(ResponseError::bad_request("invalid_symbol"));
    }
    Ok(symbol)
}

/// Extracts a `YYYY-MM-DD` day from the path.
fn day_id_param(day_id: Result<Path<String>, PathRejection>) -> Result<String, ResponseError> {
    let Path(day_id) = day_id?;
    if !DAY_ID_RE.is_match(&day_id) {
        return Err(ResponseError::bad_request("invalid_day_id"));
    }
    Ok(day_id)
}

/// Responds with a cached JSON body.
fn json_response(body: Bytes) -> Response {
    ([(header::CONTENT_TYPE, "application/json")], body).into_response()
}
