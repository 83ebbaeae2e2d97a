use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use broker::{FailureCode, RpcError};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Field-level validation failures, reported in the body's `details`.
    #[error("Validation error: {message}")]
    InvalidFields {
        message: String,
        details: Vec<ValidationDetail>,
    },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Gateway timeout: {0}")]
    GatewayTimeout(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Vec<ValidationDetail>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationDetail {
    pub field: String,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone()),
            ApiError::Validation(msg) | ApiError::InvalidFields { message: msg, .. } => {
                (StatusCode::BAD_REQUEST, "validation_error", msg.clone())
            }
            ApiError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".into(),
                )
            }
            ApiError::ServiceUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                msg.clone(),
            ),
            ApiError::GatewayTimeout(msg) => {
                tracing::warn!("Gateway timeout: {}", msg);
                (StatusCode::GATEWAY_TIMEOUT, "timeout", msg.clone())
            }
        };

        let details = match self {
            ApiError::InvalidFields { details, .. } => Some(details),
            _ => None,
        };
        let body = ErrorBody {
            error: error_code.into(),
            message,
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Translates RPC outcomes into HTTP errors.
///
/// A timeout is reported as 504 so callers can tell it apart from a failure
/// the worker reported; retrying a timed-out save or delete is safe.
impl From<RpcError> for ApiError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Timeout { .. } => ApiError::GatewayTimeout(err.to_string()),
            RpcError::Transport(e) => ApiError::ServiceUnavailable(e.to_string()),
            RpcError::Closed => ApiError::ServiceUnavailable("RPC client closed".into()),
            RpcError::Codec(e) => ApiError::Internal(format!("Malformed reply: {}", e)),
            RpcError::Remote(failure) => match failure.code {
                FailureCode::NotFound => ApiError::NotFound(failure.message),
                FailureCode::Invalid => ApiError::Validation(failure.message),
                FailureCode::Conflict => ApiError::Conflict(failure.message),
                FailureCode::Unavailable => ApiError::ServiceUnavailable(failure.message),
                FailureCode::Internal => ApiError::Internal(failure.message),
            },
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let details: Vec<ValidationDetail> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |e| ValidationDetail {
                    field: field.to_string(),
                    message: e
                        .message
                        .clone()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string()),
                })
            })
            .collect();

        let message = if details.len() == 1 {
            details[0].message.clone()
        } else {
            format!("{} validation errors", details.len())
        };

        ApiError::InvalidFields { message, details }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker::Failure;
    use std::time::Duration;
    use validator::Validate;

    #[derive(Validate)]
    struct Key {
        #[validate(length(min = 1, message = "subdomain is required"))]
        subdomain: String,
        #[validate(range(min = 1, message = "manager_id must be positive"))]
        manager_id: i64,
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_api_error_statuses() {
        let cases = [
            (ApiError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (ApiError::Conflict("x".into()), StatusCode::CONFLICT),
            (ApiError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (ApiError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (
                ApiError::ServiceUnavailable("x".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (ApiError::GatewayTimeout("x".into()), StatusCode::GATEWAY_TIMEOUT),
        ];

        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }

    #[tokio::test]
    async fn test_validation_errors_list_fields() {
        let errors = Key {
            subdomain: String::new(),
            manager_id: 0,
        }
        .validate()
        .unwrap_err();
        let error: ApiError = errors.into();

        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "validation_error");
        assert_eq!(body["message"], "2 validation errors");

        let mut fields: Vec<&str> = body["details"]
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["field"].as_str().unwrap())
            .collect();
        fields.sort_unstable();
        assert_eq!(fields, vec!["manager_id", "subdomain"]);
    }

    #[tokio::test]
    async fn test_plain_errors_have_no_details() {
        let body = body_json(ApiError::NotFound("gone".into()).into_response()).await;
        assert!(body.get("details").is_none());
    }

    #[test]
    fn test_api_error_display() {
        assert_eq!(
            format!("{}", ApiError::NotFound("test".to_string())),
            "Not found: test"
        );
        assert_eq!(
            format!("{}", ApiError::Validation("test".to_string())),
            "Validation error: test"
        );
        assert_eq!(
            format!("{}", ApiError::GatewayTimeout("test".to_string())),
            "Gateway timeout: test"
        );
    }

    #[test]
    fn test_from_rpc_timeout() {
        let error: ApiError = RpcError::Timeout {
            queue: "settings.get".into(),
            timeout: Duration::from_secs(30),
        }
        .into();
        assert!(matches!(error, ApiError::GatewayTimeout(_)));
    }

    #[test]
    fn test_from_rpc_transport() {
        let error: ApiError = RpcError::Transport(broker::TransportError::Closed).into();
        assert!(matches!(error, ApiError::ServiceUnavailable(_)));
    }

    #[test]
    fn test_from_remote_failures() {
        let error: ApiError = RpcError::Remote(Failure::not_found("not found")).into();
        match error {
            ApiError::NotFound(msg) => assert_eq!(msg, "not found"),
            other => panic!("Expected NotFound, got {:?}", other),
        }

        let error: ApiError = RpcError::Remote(Failure::invalid("bad")).into();
        assert!(matches!(error, ApiError::Validation(_)));

        let error: ApiError =
            RpcError::Remote(Failure::new(FailureCode::Unavailable, "db down")).into();
        assert!(matches!(error, ApiError::ServiceUnavailable(_)));
    }
}
