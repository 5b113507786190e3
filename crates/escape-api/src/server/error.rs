#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("session store error: {0}")]
    Store(#[from] PersistenceError),
}

#[derive(Debug)]
struct HttpApiError {
    status: StatusCode,
    error: ApiError,
}

impl HttpApiError {
    fn session_not_found(session_id: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            error: ApiError::new(
                ErrorCode::SessionNotFound,
                "session_id does not match a hosted session",
                Some(format!("session_id={session_id}")),
            ),
        }
    }

    fn invalid_intent(message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: ApiError::new(ErrorCode::InvalidIntent, message, details),
        }
    }

    fn from_failure(err: ApiFailure) -> Self {
        if let ApiFailure::Persistence(PersistenceError::SessionExists(session_id)) = &err {
            return Self {
                status: StatusCode::CONFLICT,
                error: ApiError::new(
                    ErrorCode::InvalidIntent,
                    "session_id already exists",
                    Some(format!("session_id={session_id}")),
                ),
            };
        }
        let error = err.to_api_error();
        Self {
            status: status_for(error.error_code),
            error,
        }
    }
}

impl IntoResponse for HttpApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.error)).into_response()
    }
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::InvalidTurn => StatusCode::CONFLICT,
        ErrorCode::SessionNotFound => StatusCode::NOT_FOUND,
        ErrorCode::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::InvalidIntent | ErrorCode::ContractVersionUnsupported => {
            StatusCode::BAD_REQUEST
        }
        ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
