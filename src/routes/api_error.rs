//!
//! Documentation of the API error module.
//! Every handler failure ends up here and leaves as a JSON body
//! `{message, error?, details?, field?}`.
//!

use super::*;
use auth::auth::AuthError;
use ODM::{OdmError, odm_utils};

use std::collections::BTreeMap;
use rocket::request::Request;
use rocket::response::{self, Responder};
use serde::Serialize;
use thiserror::Error;
use log::{debug, error};

pub type ApiResult<T> = Result<T, ApiError>;

/// Per-field validation messages
pub type Details = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Validation {
        message: String,
        code: &'static str,
        details: Option<Details>,
    },
    #[error("duplicate {field}")]
    Duplicate { field: String },
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unauthenticated(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("Server configuration error")]
    Config,
    #[error("Database error occurred: {0}")]
    Database(mongodb::error::Error),
    #[error("No short codes left to issue")]
    CodeSpaceExhausted,
    #[error("{0}")]
    Internal(String),
}

/// The JSON shape of every error response
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct ErrorBody {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Details>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ErrorBody {
    pub fn message<S: Into<String>>(message: S) -> ErrorBody {
        ErrorBody { message: message.into(), error: None, details: None, field: None }
    }

    pub fn coded<S: Into<String>>(message: S, code: &'static str) -> ErrorBody {
        ErrorBody { error: Some(code), ..ErrorBody::message(message) }
    }
}

impl ApiError {
    pub fn validation<S: Into<String>>(message: S) -> ApiError {
        ApiError::Validation { message: message.into(), code: "VALIDATION_ERROR", details: None }
    }

    pub fn coded<S: Into<String>>(message: S, code: &'static str) -> ApiError {
        ApiError::Validation { message: message.into(), code, details: None }
    }

    pub fn with_details<S: Into<String>>(message: S, details: Details) -> ApiError {
        ApiError::Validation { message: message.into(), code: "VALIDATION_ERROR", details: Some(details) }
    }

    /// `"<what> not found"`
    pub fn not_found(what: &str) -> ApiError {
        ApiError::NotFound(format!("{} not found", what))
    }

    pub fn status(&self) -> Status {
        match self {
            ApiError::Validation { .. } | ApiError::Duplicate { .. } => Status::BadRequest,
            ApiError::NotFound(_) => Status::NotFound,
            ApiError::Unauthenticated(_) => Status::Unauthorized,
            ApiError::Forbidden(_) => Status::Forbidden,
            ApiError::Config
            | ApiError::Database(_)
            | ApiError::CodeSpaceExhausted
            | ApiError::Internal(_) => Status::InternalServerError,
        }
    }

    pub fn body(&self) -> ErrorBody {
        match self {
            ApiError::Validation { message, code, details } => ErrorBody {
                details: details.clone(),
                ..ErrorBody::coded(message.clone(), *code)
            },
            ApiError::Duplicate { field } => ErrorBody {
                field: Some(field.clone()),
                ..ErrorBody::coded(duplicate_message(field), "DUPLICATE_KEY_ERROR")
            },
            ApiError::NotFound(message) | ApiError::Unauthenticated(message) | ApiError::Forbidden(message) => {
                ErrorBody::message(message.clone())
            }
            ApiError::Config => ErrorBody::coded("Server configuration error", "CONFIG_ERROR"),
            ApiError::Database(_) => ErrorBody::coded("Database error occurred", "DB_ERROR"),
            ApiError::CodeSpaceExhausted => ErrorBody::coded("No short codes left to issue", "CODE_SPACE_EXHAUSTED"),
            ApiError::Internal(_) => ErrorBody::coded("An unexpected error occurred", "INTERNAL_SERVER_ERROR"),
        }
    }
}

fn duplicate_message(field: &str) -> String {
    match field {
        "email" => "This email is already registered".to_string(),
        "mobileNumber" => "This mobile number is already registered".to_string(),
        "registrationNumber" => "Vehicle already registered".to_string(),
        _ => "A record with this information already exists".to_string(),
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, request: &'r Request<'_>) -> response::Result<'static> {
        let status = self.status();
        let route = match request.route() {
            None => "Unknown Route".to_string(),
            Some(value) => format!("{}", value),
        };
        if status == Status::InternalServerError {
            error!("Server>>Client:\t{} {} failed: {}", request.method(), route, self);
        } else {
            debug!("Server>>Client:\tRejecting {} {}: {}", request.method(), route, self);
        }
        (status, Json(self.body())).respond_to(request)
    }
}

impl From<mongodb::error::Error> for ApiError {
    fn from(error: mongodb::error::Error) -> Self {
        match odm_utils::duplicate_field(&error) {
            Some(field) => ApiError::Duplicate { field },
            None => ApiError::Database(error),
        }
    }
}

impl From<OdmError> for ApiError {
    fn from(error: OdmError) -> Self {
        match error {
            OdmError::Mongo(e) => e.into(),
            OdmError::Duplicate(field) => ApiError::Duplicate { field },
            OdmError::CodeSpaceExhausted => ApiError::CodeSpaceExhausted,
            OdmError::Render(e) => ApiError::Internal(format!("QR rendering failed: {}", e)),
            OdmError::NotFound(what) => ApiError::not_found(what),
            OdmError::Invalid(message) => ApiError::validation(message),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::MissingSecret => ApiError::Config,
            AuthError::Hash(message) => ApiError::Internal(message),
            AuthError::Token(_) | AuthError::Subject => ApiError::Unauthenticated("Invalid token".into()),
        }
    }
}

impl<'a> From<JsonError<'a>> for ApiError {
    fn from(error: JsonError<'a>) -> Self {
        match error {
            JsonError::Io(e) => ApiError::validation(format!("Could not read request body: {}", e)),
            JsonError::Parse(_, e) => ApiError::validation(format!("Invalid JSON body: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_taxonomy() {
        assert_eq!(ApiError::validation("x").status(), Status::BadRequest);
        assert_eq!(ApiError::Duplicate { field: "email".into() }.status(), Status::BadRequest);
        assert_eq!(ApiError::not_found("Vehicle").status(), Status::NotFound);
        assert_eq!(ApiError::Unauthenticated("x".into()).status(), Status::Unauthorized);
        assert_eq!(ApiError::Forbidden("x".into()).status(), Status::Forbidden);
        assert_eq!(ApiError::Config.status(), Status::InternalServerError);
        assert_eq!(ApiError::CodeSpaceExhausted.status(), Status::InternalServerError);
    }

    #[test]
    fn duplicates_name_their_field() {
        let body = ApiError::Duplicate { field: "mobileNumber".into() }.body();
        assert_eq!(body.error, Some("DUPLICATE_KEY_ERROR"));
        assert_eq!(body.field.as_deref(), Some("mobileNumber"));
        assert_eq!(body.message, "This mobile number is already registered");
    }

    #[test]
    fn odm_and_auth_errors_map_over() {
        assert!(matches!(ApiError::from(OdmError::Duplicate("email".into())), ApiError::Duplicate { .. }));
        assert!(matches!(ApiError::from(OdmError::CodeSpaceExhausted), ApiError::CodeSpaceExhausted));
        assert_eq!(ApiError::from(OdmError::NotFound("User")).body().message, "User not found");
        assert!(matches!(ApiError::from(AuthError::MissingSecret), ApiError::Config));
        assert_eq!(ApiError::from(AuthError::Subject).body().message, "Invalid token");
    }

    #[test]
    fn bodies_skip_empty_parts() {
        let value = serde_json::to_value(ApiError::not_found("Ticket").body()).unwrap();
        assert_eq!(value, serde_json::json!({ "message": "Ticket not found" }));

        let mut details = Details::new();
        details.insert("email".into(), "Email is required".into());
        let value = serde_json::to_value(ApiError::with_details("All fields are required", details).body()).unwrap();
        assert_eq!(value["error"], "VALIDATION_ERROR");
        assert_eq!(value["details"]["email"], "Email is required");
    }
}
