use super::*;
use log::{debug, error, info, warn};
use admin_routes::{set_user_status, StatusBody};

use mongodb::Database;
use rocket::serde::{Deserialize, Serialize};
use validator::Validate;
use ODM::models::*;
use ODM::notifications;
use ODM::odm::{self, ProfileUpdate};
use ODM::odm_utils::{doc_to_user, doc_to_vehicle, Page};

/// How many notifications a profile carries
pub const PROFILE_NOTIFICATIONS: i64 = 10;

pub fn routes() -> Vec<Route> {
    routes![get_profile, put_profile, delete_profile, list_users, get_user, patch_user_status]
}

/// A public user with their vehicles and newest notifications
#[derive(Serialize, Debug, Clone)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub struct Profile {
    #[serde(flatten)]
    pub user: PublicUser,
    pub vehicles: Vec<Vehicle>,
    pub notifications: Vec<Notification>,
}

pub async fn profile_view(db: &Database, user: &UserDocument) -> mongodb::error::Result<Profile> {
    let vehicles = odm::get_vehicles_for_user(db, user.id).await?;
    let notifications = notifications::recent_for_user(db, user.id, PROFILE_NOTIFICATIONS).await?;
    Ok(Profile {
        user: doc_to_user(user),
        vehicles: vehicles.iter().map(doc_to_vehicle).collect(),
        notifications,
    })
}

#[derive(Deserialize, Validate, Debug, Default)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub struct UserProfileBody {
    pub name: Option<String>,
    #[validate(
        email(code = "INVALID_EMAIL", message = "Invalid email format"),
        custom(function = "dotted_domain")
    )]
    pub email: Option<String>,
    #[validate(custom(function = "routes_utils::mobile_number"))]
    pub mobile_number: Option<String>,
}

impl UserProfileBody {
    fn normalized(self) -> UserProfileBody {
        UserProfileBody {
            name: non_empty(self.name),
            email: non_empty(self.email).map(|e| e.to_lowercase()),
            mobile_number: non_empty(self.mobile_number),
        }
    }
}

#[get("/profile")]
async fn get_profile(db: &State<MongoState>, user: AuthUser) -> ApiResult<Json<Value>> {
    let profile = profile_view(&db.db, &user.user).await?;
    Ok(Json(json!({ "user": profile })))
}

/// Name, email and mobile number; each one optional
#[put("/profile", data = "<body>")]
async fn put_profile(db: &State<MongoState>, user: AuthUser, body: Result<Json<UserProfileBody>, JsonError<'_>>, route: &Route) -> ApiResult<Json<Value>> {
    let body = validated(body?.into_inner().normalized(), "Invalid profile", &["name", "email", "mobileNumber"])?;
    let update = ProfileUpdate { name: body.name, email: body.email, mobile_number: body.mobile_number };
    let updated = odm::update_user_profile(&db.db, user.id, update)
        .await?
        .ok_or_else(|| ApiError::not_found("User"))?;

    info!("Server>>Client:\tApproving action {} for {}", route, &updated.email);
    Ok(Json(json!({
        "message": "Profile updated successfully",
        "user": doc_to_user(&updated),
    })))
}

/// Self deactivation; the account's code goes back to the pool
#[delete("/profile")]
async fn delete_profile(db: &State<MongoState>, user: AuthUser, route: &Route) -> ApiResult<Json<Value>> {
    odm::deactivate_user(&db.db, user.id)
        .await?
        .ok_or_else(|| ApiError::not_found("User"))?;

    info!("Server>>Client:\tApproving action {} for {}", route, &user.user.email);
    Ok(Json(json!({ "message": "Account deactivated successfully" })))
}

#[get("/?<page>&<limit>&<search>")]
async fn list_users(db: &State<MongoState>, _admin: AdminUser, page: Option<u64>, limit: Option<u64>, search: Option<String>) -> ApiResult<Json<Value>> {
    let page = Page::new(page, limit);
    let (users, total) = odm::list_users(&db.db, search.as_deref(), page).await?;
    Ok(Json(json!({
        "users": users.iter().map(doc_to_user).collect::<Vec<_>>(),
        "pagination": page.pagination(total),
    })))
}

#[get("/<id>")]
async fn get_user(db: &State<MongoState>, _admin: AdminUser, id: &str) -> ApiResult<Json<Value>> {
    let id = parse_oid(id, "User")?;
    let user = odm::get_user_by_id(&db.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("User"))?;
    let profile = profile_view(&db.db, &user).await?;
    Ok(Json(json!({ "user": profile })))
}

#[patch("/<id>/status", data = "<body>")]
async fn patch_user_status(db: &State<MongoState>, admin: AdminUser, id: &str, body: Result<Json<StatusBody>, JsonError<'_>>) -> ApiResult<Json<Value>> {
    let id = parse_oid(id, "User")?;
    set_user_status(&db.db, &admin, id, body?.into_inner()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_fields_are_each_optional() {
        let body = UserProfileBody { name: Some("  ".into()), ..UserProfileBody::default() }.normalized();
        assert_eq!(body.name, None);
        assert!(validated(body, "Invalid profile", &[]).is_ok());
    }

    #[test]
    fn a_changed_email_still_needs_a_dotted_domain() {
        let body = UserProfileBody { email: Some(" New@Host ".into()), ..UserProfileBody::default() }.normalized();
        assert_eq!(body.email.as_deref(), Some("new@host"));
        match validated(body, "Invalid profile", &["email"]) {
            Err(ApiError::Validation { code, .. }) => assert_eq!(code, "INVALID_EMAIL"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
