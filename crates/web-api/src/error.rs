use application::ApplicationError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        use application::ApplicationError as AppErr;
        use domain::{DomainError, RepositoryError};

        // 存储/注册表故障不向客户端暴露细节
        if error.is_transient() {
            tracing::error!(error = %error, "请求处理失败");
            return ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                error.code(),
                "service temporarily unavailable",
            );
        }

        let status = match &error {
            AppErr::Domain(DomainError::ValidationError { .. }) => StatusCode::BAD_REQUEST,
            AppErr::NotMessageAuthor(_)
            | AppErr::IdentityMismatch => StatusCode::FORBIDDEN,
            AppErr::Domain(DomainError::MessageDeleted)
            | AppErr::MessageDeleted(_)
            | AppErr::ConcurrentModification(_)
            | AppErr::Repository(RepositoryError::Conflict) => StatusCode::CONFLICT,
            AppErr::Repository(RepositoryError::NotFound)
            | AppErr::MessageNotFound(_)
            | AppErr::ConnectionNotFound(_) => StatusCode::NOT_FOUND,
            AppErr::Repository(RepositoryError::Storage { .. }) | AppErr::Infrastructure { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        ApiError::new(status, error.code(), error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
