use super::*;
use config::config::ParkpalConfig;
use ODM::models::*;

use bson::oid::ObjectId;
use rocket::request::{FromRequest, Outcome, Request};
use log::{debug, error, info, warn};
use rocket::outcome::try_outcome;
use std::borrow::Cow;
use validator::{Validate, ValidationError, ValidationErrors};

// Utils struct for rocket::manage
pub struct MongoState {
    pub db: mongodb::Database,
}

pub struct Config {
    pub config: ParkpalConfig,
}

/// Why a guard refused a request, kept for the catchers
pub struct GuardFailure(pub Option<ErrorBody>);

/// The body a guard left behind, if any guard failed on this request
pub fn guard_failure(request: &Request<'_>) -> Option<ErrorBody> {
    request.local_cache(|| GuardFailure(None)).0.clone()
}

fn refuse<T>(request: &Request<'_>, error: ApiError) -> Outcome<T, ApiError> {
    let status = error.status();
    request.local_cache(|| GuardFailure(Some(error.body())));
    Outcome::Error((status, error))
}

pub fn route_name(request: &Request<'_>) -> String {
    match request.route() {
        None => "Unknown Route".to_string(),
        Some(value) => format!("{}", value),
    }
}

/// The token in `Authorization: Bearer <token>`
pub fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// A caller with a valid token whose account exists and is active
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: ObjectId,
    pub user: UserDocument,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.user.role == Role::Admin
    }
}

// Checking that a user is connected
#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthUser {
    type Error = ApiError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<AuthUser, ApiError> {
        let (db, config) = match (request.rocket().state::<MongoState>(), request.rocket().state::<Config>()) {
            (Some(db), Some(config)) => (db, config),
            _ => return refuse(request, ApiError::Internal("application state is not managed".into())),
        };

        let token = match request.headers().get_one("Authorization").and_then(bearer_token) {
            Some(value) => value,
            None => return refuse(request, ApiError::Unauthenticated("Authentication required".into())),
        };

        let claims = match auth::auth::verify_token(config.config.jwt_secret.as_deref(), token) {
            Ok(value) => value,
            Err(e) => return refuse(request, e.into()),
        };
        let id = match claims.user() {
            Ok(value) => value,
            Err(e) => return refuse(request, e.into()),
        };

        match ODM::odm::get_user_by_id(&db.db, id).await {
            Err(e) => refuse(request, e.into()),
            Ok(None) => refuse(request, ApiError::Unauthenticated("Invalid token".into())),
            Ok(Some(user)) if !user.is_active => {
                refuse(request, ApiError::Unauthenticated("Account is deactivated".into()))
            }
            Ok(Some(user)) => {
                info!("Client>>Server:\t{} is trying to access route: {} as {}", &user.email, route_name(request), request.method());
                Outcome::Success(AuthUser { id, user })
            }
        }
    }
}

/// An `AuthUser` with role `admin`
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AdminUser {
    type Error = ApiError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<AdminUser, ApiError> {
        let user = try_outcome!(request.guard::<AuthUser>().await);
        if !user.is_admin() {
            return refuse(request, ApiError::Forbidden("Admin access required".into()));
        }
        Outcome::Success(AdminUser(user))
    }
}

/// Path ids that do not parse can not name anything: `<what> not found`
pub fn parse_oid(id: &str, what: &str) -> ApiResult<ObjectId> {
    ObjectId::parse_str(id.trim()).map_err(|_| ApiError::not_found(what))
}

/// Trimmed, and `None` when nothing is left
pub fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn rule(code: &'static str, message: &'static str) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(Cow::Borrowed(message));
    error
}

/// Rule for `email` fields: the domain needs a dot that is neither first nor last
pub fn dotted_domain(email: &str) -> Result<(), ValidationError> {
    let dotted = email
        .rsplit_once('@')
        .map(|(_, domain)| domain.char_indices().any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len()))
        .unwrap_or(false);
    if dotted { Ok(()) } else { Err(rule("INVALID_EMAIL", "Invalid email format")) }
}

/// Rule for mobile numbers: an optional `+` followed by 7 to 15 digits
pub fn mobile_number(mobile: &str) -> Result<(), ValidationError> {
    let digits = mobile.strip_prefix('+').unwrap_or(mobile);
    if (7..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit()) {
        return Ok(());
    }
    Err(rule("INVALID_MOBILE", "Mobile number must be 7 to 15 digits, optionally starting with +"))
}

/// `mobile_number` -> `mobileNumber`, the name clients sent
pub fn camel_case(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut upper = false;
    for c in field.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

fn message_of(error: &ValidationError) -> String {
    match &error.message {
        Some(message) => message.to_string(),
        None => format!("Failed rule {}", error.code),
    }
}

fn error_code(code: &str) -> &'static str {
    match code {
        "INVALID_EMAIL" => "INVALID_EMAIL",
        "WEAK_PASSWORD" => "WEAK_PASSWORD",
        _ => "VALIDATION_ERROR",
    }
}

///
/// Turns `validator` failures into the API's 400
///
/// Missing fields are reported together under `missing`. Otherwise the
/// first failed field in `order` picks the message and code, and every
/// failure lands in `details`.
///
pub fn rejection(errors: &ValidationErrors, missing: &str, order: &[&str]) -> ApiError {
    let rank = |field: &str| order.iter().position(|f| *f == field).unwrap_or(order.len());
    let mut failures: Vec<(String, &ValidationError)> = vec![];
    for (field, list) in errors.field_errors() {
        let field = camel_case(&field);
        failures.extend(list.iter().map(|error| (field.clone(), error)));
    }
    failures.sort_by_key(|(field, _)| rank(field));

    let required: Details = failures
        .iter()
        .filter(|(_, error)| error.code == "required")
        .map(|(field, error)| (field.clone(), message_of(error)))
        .collect();
    if !required.is_empty() {
        return ApiError::with_details(missing, required);
    }

    let details: Details = failures
        .iter()
        .map(|(field, error)| (field.clone(), message_of(error)))
        .collect();
    match failures.first() {
        None => ApiError::validation(missing),
        Some((_, first)) => ApiError::Validation {
            message: message_of(first),
            code: error_code(&first.code),
            details: Some(details),
        },
    }
}

/// Runs the body's rules, see `rejection`
pub fn validated<T: Validate>(body: T, missing: &str, order: &[&str]) -> ApiResult<T> {
    match body.validate() {
        Ok(()) => Ok(body),
        Err(errors) => Err(rejection(&errors, missing, order)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emails_need_a_domain_with_a_dot() {
        assert!(dotted_domain("a@b.co").is_ok());
        assert!(dotted_domain("first.last@mail.example.com").is_ok());
        assert!(dotted_domain("a@b").is_err());
        assert!(dotted_domain("a@.com").is_err());
        assert!(dotted_domain("a@com.").is_err());
        assert_eq!(dotted_domain("not-an-email").unwrap_err().code, "INVALID_EMAIL");
    }

    #[test]
    fn mobiles_are_digits_with_an_optional_plus() {
        assert!(mobile_number("9876543210").is_ok());
        assert!(mobile_number("+919876543210").is_ok());
        assert!(mobile_number("12345").is_err());
        assert!(mobile_number("+1234567890123456").is_err());
        assert!(mobile_number("98765-43210").is_err());
        assert!(mobile_number("++9876543210").is_err());
    }

    #[test]
    fn field_names_come_back_in_camel_case() {
        assert_eq!(camel_case("mobile_number"), "mobileNumber");
        assert_eq!(camel_case("registration_year"), "registrationYear");
        assert_eq!(camel_case("email"), "email");
    }

    #[test]
    fn missing_fields_outrank_broken_ones() {
        let mut errors = ValidationErrors::new();
        errors.add("email", rule("INVALID_EMAIL", "Invalid email format"));
        let mut required = ValidationError::new("required");
        required.message = Some(Cow::Borrowed("Name is required"));
        errors.add("name", required);

        match rejection(&errors, "All fields are required", &["email", "name"]) {
            ApiError::Validation { message, code, details: Some(details) } => {
                assert_eq!(message, "All fields are required");
                assert_eq!(code, "VALIDATION_ERROR");
                assert_eq!(details.len(), 1);
                assert_eq!(details["name"], "Name is required");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn the_first_broken_field_picks_the_code() {
        let mut errors = ValidationErrors::new();
        errors.add("mobile_number", rule("INVALID_MOBILE", "bad mobile"));
        errors.add("email", rule("INVALID_EMAIL", "Invalid email format"));

        match rejection(&errors, "unused", &["email", "password", "mobileNumber"]) {
            ApiError::Validation { message, code, details: Some(details) } => {
                assert_eq!(message, "Invalid email format");
                assert_eq!(code, "INVALID_EMAIL");
                assert!(details.contains_key("mobileNumber"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn bearer_tokens_are_taken_after_the_scheme() {
        assert_eq!(bearer_token("Bearer abc.def"), Some("abc.def"));
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("Basic abc"), None);
    }

    #[test]
    fn unparseable_ids_are_not_found() {
        assert!(parse_oid("zzz", "Vehicle").is_err());
        let id = ObjectId::new();
        assert_eq!(parse_oid(&id.to_hex(), "Vehicle").unwrap(), id);
    }
}
