use super::*;
use log::{debug, error, info, warn};
use user_routes::profile_view;

use auth::auth::{hash_password, mint_token, verify_password};
use rocket::serde::Deserialize;
use validator::Validate;
use ODM::odm::{self, NewUser, ProfileUpdate};
use ODM::odm_utils::doc_to_user;

/// Which failure is reported first
const REGISTRATION_ORDER: &[&str] = &["email", "password", "name", "mobileNumber"];

pub fn routes() -> Vec<Route> {
    routes![register, login, get_profile, put_profile]
}

#[derive(Deserialize, Validate, Debug, Default)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub struct RegisterBody {
    #[validate(
        required(message = "Email is required"),
        email(code = "INVALID_EMAIL", message = "Invalid email format"),
        custom(function = "dotted_domain")
    )]
    pub email: Option<String>,
    #[validate(
        required(message = "Password is required"),
        length(min = 6, code = "WEAK_PASSWORD", message = "Password must be at least 6 characters long")
    )]
    pub password: Option<String>,
    #[validate(required(message = "Name is required"))]
    pub name: Option<String>,
    #[validate(required(message = "Mobile number is required"), custom(function = "routes_utils::mobile_number"))]
    pub mobile_number: Option<String>,
}

impl RegisterBody {
    /// Trimmed, with blanks as missing; passwords are taken as typed
    fn normalized(self) -> RegisterBody {
        RegisterBody {
            email: non_empty(self.email).map(|e| e.to_lowercase()),
            password: self.password.filter(|p| !p.is_empty()),
            name: non_empty(self.name),
            mobile_number: non_empty(self.mobile_number),
        }
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(crate = "rocket::serde")]
pub struct LoginBody {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Deserialize, Validate, Debug, Default)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub struct AuthProfileBody {
    pub name: Option<String>,
    #[validate(custom(function = "routes_utils::mobile_number"))]
    pub mobile_number: Option<String>,
}

///
/// Checks a registration body
///
/// # Output
///
/// * Err(_) - the first failed rule, with per-field details when fields are missing
/// * Ok(user) - normalized fields (email lower case), password still in clear
///
pub fn validate_registration(body: RegisterBody) -> ApiResult<(String, String, String, String)> {
    let body = validated(body.normalized(), "All fields are required", REGISTRATION_ORDER)?;
    match (body.email, body.password, body.name, body.mobile_number) {
        (Some(email), Some(password), Some(name), Some(mobile)) => Ok((email, password, name, mobile)),
        _ => Err(ApiError::validation("All fields are required")),
    }
}

///
/// Register a new user and issue their code
///
/// INPUT:  email, password, name, mobileNumber
/// OUTPUT: 201 with a token, the public user and the QR image
///
#[post("/register", data = "<body>")]
async fn register(db: &State<MongoState>, config: &State<Config>, body: Result<Json<RegisterBody>, JsonError<'_>>, route: &Route) -> ApiResult<(Status, Json<Value>)> {
    let (email, password, name, mobile_number) = validate_registration(body?.into_inner())?;

    // refuse before writing anything when no token could be minted
    let secret = config.config.jwt_secret.as_deref();
    if secret.is_none() {
        error!("JWT secret is not configured, refusing {}", route);
        return Err(ApiError::Config);
    }

    let password_hash = hash_password(&password)?;
    let (user, issued) = odm::insert_user(&db.db, NewUser { email, password_hash, name, mobile_number }).await?;
    let token = mint_token(secret, user.id, config.config.token_ttl_days)?;

    info!("Server>>Client:\tRegistered {} with short code {}", &user.email, issued.short_code);
    Ok((Status::Created, Json(json!({
        "message": "User registered successfully",
        "token": token,
        "user": doc_to_user(&user),
        "shortCode": issued.short_code,
        "qrImage": issued.image,
    }))))
}

///
/// Login
///
/// INPUT:  email and password
/// OUTPUT: a token and the public user
///
#[post("/login", data = "<body>")]
async fn login(db: &State<MongoState>, config: &State<Config>, body: Result<Json<LoginBody>, JsonError<'_>>) -> ApiResult<Json<Value>> {
    let body = body?.into_inner();
    let (email, password) = match (non_empty(body.email), body.password.filter(|p| !p.is_empty())) {
        (Some(email), Some(password)) => (email, password),
        _ => return Err(ApiError::coded("Email and password are required", "MISSING_CREDENTIALS")),
    };

    let rejected = || ApiError::Unauthenticated("Invalid email or password".into());
    let user = odm::get_user_by_email(&db.db, &email).await?.ok_or_else(rejected)?;
    if !verify_password(&password, &user.password) {
        warn!("Client>>Server:\tFailed login for {}", &user.email);
        return Err(rejected());
    }
    if !user.is_active {
        return Err(ApiError::Forbidden("Account is deactivated".into()));
    }

    let token = mint_token(config.config.jwt_secret.as_deref(), user.id, config.config.token_ttl_days)?;
    info!("Server>>Client:\tLogged in {}", &user.email);
    Ok(Json(json!({
        "message": "Login successful",
        "token": token,
        "user": doc_to_user(&user),
    })))
}

#[get("/profile")]
async fn get_profile(db: &State<MongoState>, user: AuthUser) -> ApiResult<Json<Value>> {
    let profile = profile_view(&db.db, &user.user).await?;
    Ok(Json(json!({ "user": profile })))
}

/// Name and mobile number only; email changes go through `/api/users/profile`
#[put("/profile", data = "<body>")]
async fn put_profile(db: &State<MongoState>, user: AuthUser, body: Result<Json<AuthProfileBody>, JsonError<'_>>, route: &Route) -> ApiResult<Json<Value>> {
    let body = body?.into_inner();
    let body = AuthProfileBody { name: non_empty(body.name), mobile_number: non_empty(body.mobile_number) };
    let body = validated(body, "Invalid profile", &["name", "mobileNumber"])?;

    let update = ProfileUpdate { name: body.name, email: None, mobile_number: body.mobile_number };
    let updated = odm::update_user_profile(&db.db, user.id, update)
        .await?
        .ok_or_else(|| ApiError::not_found("User"))?;

    info!("Server>>Client:\tApproving action {} for {}", route, &updated.email);
    Ok(Json(json!({
        "message": "Profile updated successfully",
        "user": doc_to_user(&updated),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(email: &str, password: &str, name: &str, mobile: &str) -> RegisterBody {
        let some = |v: &str| Some(v.to_string()).filter(|v| !v.is_empty());
        RegisterBody { email: some(email), password: some(password), name: some(name), mobile_number: some(mobile) }
    }

    fn code_of(result: ApiResult<(String, String, String, String)>) -> Option<&'static str> {
        match result {
            Err(ApiError::Validation { code, .. }) => Some(code),
            _ => None,
        }
    }

    #[test]
    fn missing_fields_are_listed() {
        let result = validate_registration(body("a@b.co", "", "", "9876543210"));
        match result {
            Err(ApiError::Validation { details: Some(details), .. }) => {
                assert!(details.contains_key("password"));
                assert!(details.contains_key("name"));
                assert!(!details.contains_key("email"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn rules_are_checked_in_order() {
        assert_eq!(code_of(validate_registration(body("nope", "secret", "A", "9876543210"))), Some("INVALID_EMAIL"));
        assert_eq!(code_of(validate_registration(body("a@b.co", "12345", "A", "9876543210"))), Some("WEAK_PASSWORD"));
        assert_eq!(code_of(validate_registration(body("a@b.co", "123456", "A", "12-34"))), Some("VALIDATION_ERROR"));
        assert_eq!(code_of(validate_registration(body("a@b", "123456", "A", "9876543210"))), Some("INVALID_EMAIL"));
    }

    #[test]
    fn broken_fields_are_named_in_camel_case() {
        match validate_registration(body("a@b.co", "123456", "A", "12-34")) {
            Err(ApiError::Validation { details: Some(details), .. }) => {
                assert_eq!(details.keys().collect::<Vec<_>>(), vec!["mobileNumber"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn emails_are_lowercased() {
        let (email, _, name, _) = validate_registration(body(" A@B.Co ", "123456", " Ann ", "9876543210")).unwrap();
        assert_eq!(email, "a@b.co");
        assert_eq!(name, "Ann");
    }
}
