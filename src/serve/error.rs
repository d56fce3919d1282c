use crate::pipeline::PipelineFailure;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub trait IntoHttpError<T>: Sized {
    fn map_http_error(self, code: StatusCode) -> Result<T, HttpError>;

    fn map_500(self) -> Result<T, HttpError> {
        self.map_http_error(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn map_401(self) -> Result<T, HttpError> {
        self.map_http_error(StatusCode::UNAUTHORIZED)
    }
}

impl<T, E: std::fmt::Display> IntoHttpError<T> for Result<T, E> {
    fn map_http_error(self, code: StatusCode) -> Result<T, HttpError> {
        self.map_err(|e| HttpError {
            code,
            message: format!("{:#}", e),
            details: None,
        })
    }
}

#[derive(Error, Debug)]
#[error("{message}")]
pub struct HttpError {
    code: StatusCode,
    message: String,
    details: Option<Value>,
}

impl HttpError {
    pub fn unauthorized() -> Self {
        Self {
            code: StatusCode::UNAUTHORIZED,
            message: "abandon all hope".to_string(),
            details: None,
        }
    }
}

impl From<PipelineFailure> for HttpError {
    fn from(failure: PipelineFailure) -> Self {
        match failure {
            PipelineFailure::Unauthenticated(_) => HttpError::unauthorized(),
            failure => HttpError {
                code: StatusCode::INTERNAL_SERVER_ERROR,
                message: failure.to_string(),
                details: Some(failure.details()),
            },
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a Value>,
}

impl ResponseError for HttpError {
    fn status_code(&self) -> StatusCode {
        self.code
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.code).json(ErrorBody {
            error: &self.message,
            details: self.details.as_ref(),
        })
    }
}
