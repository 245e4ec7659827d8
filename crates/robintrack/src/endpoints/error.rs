use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use robintrack_service::caching::CacheError;
use sentry::integrations::anyhow::capture_anyhow;
use serde::{Deserialize, Serialize};

#[derive(Debug)]
pub struct ResponseError {
    status: StatusCode,
    err: anyhow::Error,
}

impl ResponseError {
    pub fn bad_request(msg: &'static str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            err: anyhow::anyhow!(msg),
        }
    }

    #[cfg(test)]
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<CacheError> for ResponseError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::NotFound => Self {
                status: StatusCode::NOT_FOUND,
                err: anyhow::anyhow!("not_found"),
            },
            // all of these may succeed when retried
            CacheError::LockTimeout(_)
            | CacheError::Timeout(_)
            | CacheError::ComputationFailed(_)
            | CacheError::InternalError => Self {
                status: StatusCode::SERVICE_UNAVAILABLE,
                err: err.into(),
            },
        }
    }
}

impl From<QueryRejection> for ResponseError {
    fn from(err: QueryRejection) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            err: err.into(),
        }
    }
}

impl From<PathRejection> for ResponseError {
    fn from(err: PathRejection) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            err: err.into(),
        }
    }
}

impl From<anyhow::Error> for ResponseError {
    fn from(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            err,
        }
    }
}

impl IntoResponse for ResponseError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            capture_anyhow(&self.err);
        }
        let mut response = Json(ApiErrorResponse::from(self.err)).into_response();
        *response.status_mut() = self.status;
        response
    }
}

/// An error response from an api.
#[derive(Serialize, Deserialize, Default, Debug, PartialEq)]
pub struct ApiErrorResponse {
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub causes: Option<Vec<String>>,
}

impl From<anyhow::Error> for ApiErrorResponse {
    fn from(err: anyhow::Error) -> Self {
        let mut chain = err.chain().map(|err| err.to_string());
        let error = chain.next();
        let causes: Vec<_> = chain.collect();
        let causes = if causes.is_empty() {
            None
        } else {
            Some(causes)
        };

        ApiErrorResponse { error, causes }
    }
}
