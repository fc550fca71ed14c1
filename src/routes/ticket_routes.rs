use super::*;
use log::{debug, error, info, warn};

use bson::oid::ObjectId;
use mongodb::Database;
use rocket::serde::Deserialize;
use validator::{Validate, ValidationError};
use ODM::models::*;
use ODM::notifications::{self, NotificationContext};
use ODM::odm;
use ODM::odm_utils::{now, Page};
use ODM::tickets::{self, NewTicket};

pub fn routes() -> Vec<Route> {
    routes![post_ticket, my_tickets, get_ticket, post_comment, patch_status, patch_assign]
}

#[derive(Deserialize, Validate, Debug, Default)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub struct TicketBody {
    #[validate(required(message = "Subject is required"))]
    pub subject: Option<String>,
    #[validate(required(message = "Description is required"))]
    pub description: Option<String>,
    #[validate(required(message = "Category is required"))]
    pub category: Option<String>,
    #[validate(custom(function = "priority_name"))]
    pub priority: Option<String>,
    pub vehicle_id: Option<String>,
}

impl TicketBody {
    fn normalized(self) -> TicketBody {
        TicketBody {
            subject: non_empty(self.subject),
            description: non_empty(self.description),
            category: non_empty(self.category),
            priority: non_empty(self.priority),
            vehicle_id: non_empty(self.vehicle_id),
        }
    }
}

const TICKET_ORDER: &[&str] = &["subject", "description", "category", "priority"];

#[derive(Deserialize, Debug, Default)]
#[serde(crate = "rocket::serde")]
pub struct CommentBody {
    pub content: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(crate = "rocket::serde")]
pub struct StatusChangeBody {
    pub status: Option<String>,
    pub resolution: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub struct AssignBody {
    pub admin_id: Option<String>,
}

pub fn parse_priority(value: &str) -> Option<TicketPriority> {
    match value.trim().to_lowercase().as_str() {
        "low" => Some(TicketPriority::Low),
        "medium" => Some(TicketPriority::Medium),
        "high" => Some(TicketPriority::High),
        "urgent" => Some(TicketPriority::Urgent),
        _ => None,
    }
}

/// Rule for `priority`
pub fn priority_name(value: &str) -> Result<(), ValidationError> {
    if parse_priority(value).is_some() {
        return Ok(());
    }
    let mut error = ValidationError::new("priority");
    error.message = Some("Priority must be one of low, medium, high, urgent".into());
    Err(error)
}

/// A checked ticket body
pub fn validate_ticket(body: TicketBody) -> ApiResult<(NewTicket, Option<String>)> {
    let body = validated(body.normalized(), "Subject, description and category are required", TICKET_ORDER)?;
    let priority = body.priority.as_deref().and_then(parse_priority).unwrap_or_default();
    match (body.subject, body.description, body.category) {
        (Some(subject), Some(description), Some(category)) => Ok((
            NewTicket { subject, description, category, priority, vehicle: None },
            body.vehicle_id,
        )),
        _ => Err(ApiError::validation("Subject, description and category are required")),
    }
}

pub fn parse_status(value: &str) -> Option<TicketStatus> {
    match value.trim().to_lowercase().as_str() {
        "open" => Some(TicketStatus::Open),
        "assigned" => Some(TicketStatus::Assigned),
        "resolved" => Some(TicketStatus::Resolved),
        _ => None,
    }
}

/// What a status request amounts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusChange {
    /// Same status again, nothing to write
    Unchanged,
    Move {
        next: TicketStatus,
        resolution: Option<String>,
    },
}

///
/// Checks a status request against the ticket's current status
///
/// Tickets move `open -> assigned -> resolved`, skipping assigned is
/// allowed, and a resolution only comes with `resolved`.
///
pub fn plan_status_change(current: TicketStatus, next: TicketStatus, resolution: Option<String>) -> ApiResult<StatusChange> {
    if resolution.is_some() && next != TicketStatus::Resolved {
        return Err(ApiError::validation("A resolution can only be given when resolving a ticket"));
    }
    if !current.can_become(next) {
        return Err(ApiError::validation(format!(
            "A {} ticket cannot become {}",
            current.as_str(),
            next.as_str()
        )));
    }
    if current == next {
        return Ok(StatusChange::Unchanged);
    }
    Ok(StatusChange::Move { next, resolution })
}

/// Who hears about a comment: the owner when an admin wrote it, otherwise
/// the assigned admin or, failing that, any admin
async fn comment_recipient(db: &Database, ticket: &TicketDocument, author: &AuthUser) -> mongodb::error::Result<Option<ObjectId>> {
    if author.is_admin() && author.id != ticket.user {
        return Ok(Some(ticket.user));
    }
    if let Some(admin) = ticket.assigned_to {
        return Ok(Some(admin));
    }
    Ok(odm::first_admin(db).await?.map(|admin| admin.id))
}

/// Best-effort `system` notification about a ticket
async fn notify_about(db: &Database, recipient: ObjectId, ticket: &TicketDocument, title: &str, message: &str) {
    let context = NotificationContext { ticket: Some(ticket.id), ..NotificationContext::default() };
    if let Err(e) = notifications::notify(db, recipient, NotificationType::System, title, message, context).await {
        warn!("Ticket {} notification to {} was not stored: {}", ticket.id, recipient, e);
    }
}

/// The ticket, if the caller owns it or is an admin
async fn visible_ticket(db: &Database, user: &AuthUser, id: &str, refusal: &str) -> ApiResult<TicketDocument> {
    let id = parse_oid(id, "Ticket")?;
    let ticket = tickets::get_ticket(db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Ticket"))?;
    if ticket.user != user.id && !user.is_admin() {
        return Err(ApiError::Forbidden(refusal.to_string()));
    }
    Ok(ticket)
}

///
/// Open a support ticket
///
/// INPUT:  subject, description, category, optional priority and vehicleId
/// OUTPUT: 201 with the ticket
///
#[post("/", data = "<body>")]
async fn post_ticket(db: &State<MongoState>, user: AuthUser, body: Result<Json<TicketBody>, JsonError<'_>>, route: &Route) -> ApiResult<(Status, Json<Value>)> {
    let (mut ticket, vehicle_id) = validate_ticket(body?.into_inner())?;

    if let Some(value) = vehicle_id {
        let id = parse_oid(&value, "Vehicle")?;
        odm::get_owned_vehicle(&db.db, user.id, id)
            .await?
            .ok_or_else(|| ApiError::not_found("Vehicle"))?;
        ticket.vehicle = Some(id);
    }
    let vehicle = ticket.vehicle;

    let ticket = tickets::insert_ticket(&db.db, user.id, ticket).await?;
    if let Some(vehicle) = vehicle {
        if let Err(e) = odm::add_vehicle_ticket(&db.db, vehicle, ticket.id).await {
            warn!("Ticket {} stored without back-reference on vehicle {}: {}", ticket.id, vehicle, e);
        }
    }
    notify_about(
        &db.db,
        user.id,
        &ticket,
        "New Support Ticket",
        &format!("A new support ticket has been created: {}", ticket.subject),
    ).await;

    info!("Server>>Client:\tApproving action {} for {}", route, &user.user.email);
    Ok((Status::Created, Json(json!({
        "message": "Support ticket created successfully",
        "ticket": tickets::populate_one(&db.db, &ticket).await?,
    }))))
}

#[get("/my-tickets?<page>&<limit>&<status>")]
async fn my_tickets(db: &State<MongoState>, user: AuthUser, page: Option<u64>, limit: Option<u64>, status: Option<String>) -> ApiResult<Json<Value>> {
    let status = match non_empty(status) {
        None => None,
        Some(value) => Some(parse_status(&value).ok_or_else(|| ApiError::validation("Status must be one of open, assigned, resolved"))?),
    };
    let page = Page::new(page, limit);
    let (found, total) = tickets::list_for_user(&db.db, user.id, status, page).await?;
    Ok(Json(json!({
        "tickets": tickets::populate(&db.db, &found).await?,
        "pagination": page.pagination(total),
    })))
}

#[get("/<id>")]
async fn get_ticket(db: &State<MongoState>, user: AuthUser, id: &str) -> ApiResult<Json<Value>> {
    let ticket = visible_ticket(&db.db, &user, id, "Not authorized to view this ticket").await?;
    Ok(Json(json!({ "ticket": tickets::populate_one(&db.db, &ticket).await? })))
}

/// Comments are accepted in every status
#[post("/<id>/comments", data = "<body>")]
async fn post_comment(db: &State<MongoState>, user: AuthUser, id: &str, body: Result<Json<CommentBody>, JsonError<'_>>, route: &Route) -> ApiResult<Json<Value>> {
    let content = non_empty(body?.into_inner().content)
        .ok_or_else(|| ApiError::validation("Comment content is required"))?;
    let ticket = visible_ticket(&db.db, &user, id, "Not authorized to comment on this ticket").await?;

    let updated = tickets::add_comment(&db.db, ticket.id, user.id, &content)
        .await?
        .ok_or_else(|| ApiError::not_found("Ticket"))?;

    match comment_recipient(&db.db, &updated, &user).await {
        Ok(Some(recipient)) => {
            notify_about(&db.db, recipient, &updated, "New Ticket Comment", &format!("New comment on ticket: {}", updated.subject)).await
        }
        Ok(None) => debug!("No admin to tell about a comment on ticket {}", updated.id),
        Err(e) => warn!("Could not pick a recipient for a comment on ticket {}: {}", updated.id, e),
    }

    info!("Server>>Client:\tApproving action {} for {}", route, &user.user.email);
    Ok(Json(json!({
        "message": "Comment added successfully",
        "ticket": tickets::populate_one(&db.db, &updated).await?,
    })))
}

#[patch("/<id>/status", data = "<body>")]
async fn patch_status(db: &State<MongoState>, admin: AdminUser, id: &str, body: Result<Json<StatusChangeBody>, JsonError<'_>>, route: &Route) -> ApiResult<Json<Value>> {
    let body = body?.into_inner();
    let next = non_empty(body.status)
        .as_deref()
        .and_then(parse_status)
        .ok_or_else(|| ApiError::validation("Status must be one of open, assigned, resolved"))?;

    let id = parse_oid(id, "Ticket")?;
    let ticket = tickets::get_ticket(&db.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Ticket"))?;

    let (next, resolution) = match plan_status_change(ticket.status, next, non_empty(body.resolution))? {
        StatusChange::Unchanged => {
            return Ok(Json(json!({
                "message": "Ticket status unchanged",
                "ticket": tickets::populate_one(&db.db, &ticket).await?,
            })));
        }
        StatusChange::Move { next, resolution } => (next, resolution),
    };

    let resolution = resolution.map(|content| TicketResolution { content, resolved_by: admin.0.id, resolved_at: now() });
    let updated = tickets::set_status(&db.db, &ticket, next, resolution)
        .await?
        .ok_or_else(|| ApiError::validation("The ticket changed meanwhile, please retry"))?;

    notify_about(
        &db.db,
        updated.user,
        &updated,
        "Ticket Status Updated",
        &format!("Your ticket \"{}\" has been marked as {}", updated.subject, next.as_str()),
    ).await;

    info!("Server>>Client:\tApproving action {} for {}", route, &admin.0.user.email);
    Ok(Json(json!({
        "message": "Ticket status updated successfully",
        "ticket": tickets::populate_one(&db.db, &updated).await?,
    })))
}

#[patch("/<id>/assign", data = "<body>")]
async fn patch_assign(db: &State<MongoState>, admin: AdminUser, id: &str, body: Result<Json<AssignBody>, JsonError<'_>>, route: &Route) -> ApiResult<Json<Value>> {
    let assignee = non_empty(body?.into_inner().admin_id)
        .ok_or_else(|| ApiError::validation("adminId is required"))?;
    let assignee = parse_oid(&assignee, "Admin")?;

    let id = parse_oid(id, "Ticket")?;
    let ticket = tickets::get_ticket(&db.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Ticket"))?;
    if ticket.status == TicketStatus::Resolved {
        return Err(ApiError::validation("Resolved tickets cannot be assigned"));
    }
    odm::get_admin(&db.db, assignee)
        .await?
        .ok_or_else(|| ApiError::not_found("Admin"))?;

    let updated = tickets::assign(&db.db, &ticket, assignee)
        .await?
        .ok_or_else(|| ApiError::validation("The ticket changed meanwhile, please retry"))?;

    notify_about(
        &db.db,
        assignee,
        &updated,
        "Ticket Assigned",
        &format!("You have been assigned to ticket: {}", updated.subject),
    ).await;

    info!("Server>>Client:\tApproving action {} for {}", route, &admin.0.user.email);
    Ok(Json(json!({
        "message": "Ticket assigned successfully",
        "ticket": tickets::populate_one(&db.db, &updated).await?,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use TicketStatus::*;

    #[test]
    fn resolutions_only_come_with_resolved() {
        assert!(plan_status_change(Open, Assigned, Some("done".into())).is_err());
        assert_eq!(
            plan_status_change(Assigned, Resolved, Some("done".into())).unwrap(),
            StatusChange::Move { next: Resolved, resolution: Some("done".into()) }
        );
    }

    #[test]
    fn backwards_moves_are_rejected_and_repeats_are_no_ops() {
        assert!(plan_status_change(Resolved, Open, None).is_err());
        assert!(plan_status_change(Assigned, Open, None).is_err());
        assert_eq!(plan_status_change(Assigned, Assigned, None).unwrap(), StatusChange::Unchanged);
        assert_eq!(
            plan_status_change(Open, Resolved, None).unwrap(),
            StatusChange::Move { next: Resolved, resolution: None }
        );
    }

    #[test]
    fn ticket_bodies_default_to_medium_priority() {
        let body = TicketBody {
            subject: Some(" Gate ".into()),
            description: Some("Barrier stuck".into()),
            category: Some("parking".into()),
            vehicle_id: Some("  ".into()),
            ..TicketBody::default()
        };
        let (ticket, vehicle_id) = validate_ticket(body).unwrap();
        assert_eq!(ticket.subject, "Gate");
        assert_eq!(ticket.priority, TicketPriority::Medium);
        assert_eq!(vehicle_id, None);
    }

    #[test]
    fn ticket_bodies_list_missing_fields_and_reject_unknown_priorities() {
        match validate_ticket(TicketBody { subject: Some("Gate".into()), ..TicketBody::default() }) {
            Err(ApiError::Validation { details: Some(details), .. }) => {
                assert!(details.contains_key("description"));
                assert!(details.contains_key("category"));
                assert!(!details.contains_key("subject"));
            }
            other => panic!("unexpected {:?}", other),
        }

        let body = TicketBody {
            subject: Some("Gate".into()),
            description: Some("Barrier stuck".into()),
            category: Some("parking".into()),
            priority: Some("whenever".into()),
            ..TicketBody::default()
        };
        match validate_ticket(body) {
            Err(ApiError::Validation { details: Some(details), .. }) => assert!(details.contains_key("priority")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn names_parse_case_insensitively() {
        assert_eq!(parse_status(" Resolved "), Some(Resolved));
        assert_eq!(parse_status("closed"), None);
        assert_eq!(parse_priority("URGENT"), Some(TicketPriority::Urgent));
        assert_eq!(parse_priority("whenever"), None);
    }
}
