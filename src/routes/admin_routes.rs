use super::*;
use log::{debug, error, info, warn};
use user_routes::profile_view;

use bson::oid::ObjectId;
use mongodb::Database;
use rocket::serde::Deserialize;
use ODM::models::*;
use ODM::odm;
use ODM::odm_utils::{doc_to_user, Page};
use ODM::stats::{self, Timeframe};
use ODM::tickets;

/// Tickets shown on the dashboard and on a user's detail page
pub const RECENT_TICKETS: i64 = 5;
pub const USER_TICKETS: i64 = 10;

pub fn routes() -> Vec<Route> {
    routes![dashboard, list_users, get_user, patch_user_status, statistics, reconcile_user]
}

#[derive(Deserialize, Debug, Default)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub struct StatusBody {
    pub is_active: Option<bool>,
}

///
/// Applies an admin's `{isActive}` request to user `id`
///
/// Admin accounts are never modified. Deactivation is terminal, so asking
/// to reactivate a deactivated account is a 400; asking for the state the
/// account is already in changes nothing.
///
pub async fn set_user_status(db: &Database, admin: &AdminUser, id: ObjectId, body: StatusBody) -> ApiResult<Json<Value>> {
    let is_active = body
        .is_active
        .ok_or_else(|| ApiError::validation("isActive is required"))?;

    let user = odm::get_user_by_id(db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("User"))?;
    if user.role == Role::Admin {
        return Err(ApiError::Forbidden("Cannot modify admin user status".into()));
    }

    let user = match (user.is_active, is_active) {
        (false, true) => return Err(ApiError::validation("Deactivated accounts cannot be reactivated")),
        (true, false) => odm::deactivate_user(db, id)
            .await?
            .ok_or_else(|| ApiError::not_found("User"))?,
        _ => user,
    };

    info!("Server>>Client:\t{} set {} active={}", &admin.0.user.email, &user.email, user.is_active);
    Ok(Json(json!({
        "message": "User status updated successfully",
        "user": doc_to_user(&user),
    })))
}

#[get("/dashboard")]
async fn dashboard(db: &State<MongoState>, _admin: AdminUser) -> ApiResult<Json<Value>> {
    let counts = stats::dashboard(&db.db).await?;
    let recent = tickets::recent(&db.db, None, RECENT_TICKETS).await?;
    Ok(Json(json!({
        "statistics": counts,
        "recentTickets": tickets::populate(&db.db, &recent).await?,
    })))
}

#[get("/users?<page>&<limit>&<search>")]
async fn list_users(db: &State<MongoState>, _admin: AdminUser, page: Option<u64>, limit: Option<u64>, search: Option<String>) -> ApiResult<Json<Value>> {
    let page = Page::new(page, limit);
    let (users, total) = odm::list_users(&db.db, search.as_deref(), page).await?;
    Ok(Json(json!({
        "users": users.iter().map(doc_to_user).collect::<Vec<_>>(),
        "pagination": page.pagination(total),
    })))
}

/// A user with vehicles, newest notifications and newest tickets
#[get("/users/<id>")]
async fn get_user(db: &State<MongoState>, _admin: AdminUser, id: &str) -> ApiResult<Json<Value>> {
    let id = parse_oid(id, "User")?;
    let user = odm::get_user_by_id(&db.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("User"))?;
    let profile = profile_view(&db.db, &user).await?;
    let recent = tickets::recent(&db.db, Some(id), USER_TICKETS).await?;
    Ok(Json(json!({
        "user": profile,
        "tickets": tickets::populate(&db.db, &recent).await?,
    })))
}

#[patch("/users/<id>/status", data = "<body>")]
async fn patch_user_status(db: &State<MongoState>, admin: AdminUser, id: &str, body: Result<Json<StatusBody>, JsonError<'_>>) -> ApiResult<Json<Value>> {
    let id = parse_oid(id, "User")?;
    set_user_status(&db.db, &admin, id, body?.into_inner()).await
}

/// Tickets and scans per day; unknown timeframes mean a week
#[get("/statistics?<timeframe>")]
async fn statistics(db: &State<MongoState>, _admin: AdminUser, timeframe: Option<String>) -> ApiResult<Json<Value>> {
    let window = Timeframe::parse(timeframe.as_deref());
    let series = stats::statistics(&db.db, window).await?;
    let name = match window {
        Timeframe::Day => "day",
        Timeframe::Week => "week",
        Timeframe::Month => "month",
    };
    Ok(Json(json!({
        "timeframe": name,
        "statistics": series,
    })))
}

/// Rebuilds the user's back-reference arrays from the source collections
#[post("/users/<id>/reconcile")]
async fn reconcile_user(db: &State<MongoState>, admin: AdminUser, id: &str) -> ApiResult<Json<Value>> {
    let id = parse_oid(id, "User")?;
    let user = odm::reconcile_user_references(&db.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("User"))?;

    info!("Server>>Client:\t{} reconciled references of {}", &admin.0.user.email, &user.email);
    Ok(Json(json!({
        "message": "User references reconciled",
        "vehicles": user.vehicles.len(),
        "notifications": user.notifications.len(),
    })))
}
