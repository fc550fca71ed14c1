//!
//! Documentation of the Database Utilities module.
//! Contains all the utilities needed for a ParkPal connection.
//!

use super::*;
use models::*;
use bson::{doc, Bson, DateTime, Document};
use bson::oid::ObjectId;
use mongodb::error::{Error, ErrorKind, WriteFailure};

/// Mongo's duplicate key error code
pub const DUPLICATE_KEY: i32 = 11000;

/// Default page size of every listing
pub const DEFAULT_LIMIT: u64 = 20;
/// Hard cap on a page size
pub const MAX_LIMIT: u64 = 100;
/// Last page anyone may ask for, keeps skip well inside what the server takes
pub const MAX_PAGE: u64 = 1_000_000;

/// Converts a UserDocument to PublicUser (never carries the password)
pub fn doc_to_user(document: &UserDocument) -> PublicUser {
    PublicUser {
        id:            document.id.to_hex(),
        email:         document.email.clone(),
        name:          document.name.clone(),
        mobile_number: document.mobile_number.clone(),
        role:          document.role,
        is_active:     document.is_active,
        qr_code:       document.qr_code.clone(),
        created_at:    document.created_at.to_chrono(),
    }
}

/// Converts a VehicleDocument to Vehicle
pub fn doc_to_vehicle(document: &VehicleDocument) -> Vehicle {
    Vehicle {
        id:                  document.id.to_hex(),
        owner:               document.owner.to_hex(),
        registration_number: document.registration_number.clone(),
        registration_year:   document.registration_year,
        vehicle_type:        document.vehicle_type,
        make:                document.make.clone(),
        model:               document.model.clone(),
        color:               document.color.clone(),
        is_active:           document.is_active,
        tickets:             document.tickets.iter().map(|id| id.to_hex()).collect(),
        created_at:          document.created_at.to_chrono(),
        updated_at:          document.updated_at.to_chrono(),
    }
}

/// Converts a NotificationDocument to Notification, with whatever
/// references the caller managed to populate
pub fn doc_to_notification(
    document: &NotificationDocument,
    scanned_by: Option<NamedRef>,
    vehicle: Option<NamedRef>,
) -> Notification {
    Notification {
        id:               document.id.to_hex(),
        user:             document.user.to_hex(),
        kind:             document.kind,
        title:            document.title.clone(),
        message:          document.message.clone(),
        data:             Bson::Document(document.data.clone()).into_relaxed_extjson(),
        read:             document.read,
        scanned_by:       scanned_by.or_else(|| document.scanned_by.map(bare_ref)),
        scanned_location: document.scanned_location.clone(),
        vehicle:          vehicle.or_else(|| document.vehicle.map(bare_ref)),
        ticket:           document.ticket.map(|id| id.to_hex()),
        created_at:       document.created_at.to_chrono(),
    }
}

/// Display fields found for the references of a batch of tickets
#[derive(Debug, Clone, Default)]
pub struct TicketRefs {
    /// (id, name, email)
    pub users: Vec<(ObjectId, String, String)>,
    /// (id, registration number)
    pub vehicles: Vec<(ObjectId, String)>,
}

impl TicketRefs {
    /// Every user and vehicle id the tickets point at, without repeats
    pub fn wanted(found: &[TicketDocument]) -> (Vec<ObjectId>, Vec<ObjectId>) {
        let mut users = vec![];
        let mut vehicles = vec![];
        for ticket in found {
            users.push(ticket.user);
            users.extend(ticket.assigned_to);
            users.extend(ticket.comments.iter().map(|c| c.user));
            users.extend(ticket.resolution.as_ref().map(|r| r.resolved_by));
            vehicles.extend(ticket.vehicle);
        }
        users.sort();
        users.dedup();
        vehicles.sort();
        vehicles.dedup();
        (users, vehicles)
    }

    fn user(&self, id: ObjectId, with_email: bool) -> NamedRef {
        match self.users.iter().find(|(uid, _, _)| *uid == id) {
            Some((_, name, email)) => NamedRef {
                id: id.to_hex(),
                name: Some(name.clone()),
                email: if with_email { Some(email.clone()) } else { None },
                registration_number: None,
            },
            None => bare_ref(id),
        }
    }

    fn vehicle(&self, id: ObjectId) -> NamedRef {
        match self.vehicles.iter().find(|(vid, _)| *vid == id) {
            Some((_, plate)) => NamedRef {
                id: id.to_hex(),
                name: None,
                email: None,
                registration_number: Some(plate.clone()),
            },
            None => bare_ref(id),
        }
    }
}

///
/// Converts a TicketDocument to Ticket
///
/// References found in `refs` carry their display fields (the owner's
/// name and email, other users' names, the vehicle's registration number).
/// Anything missing from `refs` stays a bare id.
///
pub fn doc_to_ticket(document: &TicketDocument, refs: &TicketRefs) -> Ticket {
    Ticket {
        id:          document.id.to_hex(),
        user:        refs.user(document.user, true),
        subject:     document.subject.clone(),
        description: document.description.clone(),
        category:    document.category.clone(),
        priority:    document.priority,
        status:      document.status,
        vehicle:     document.vehicle.map(|id| refs.vehicle(id)),
        assigned_to: document.assigned_to.map(|id| refs.user(id, false)),
        comments:    document.comments.iter().map(|c| Comment {
            user:       refs.user(c.user, false),
            content:    c.content.clone(),
            created_at: c.created_at.to_chrono(),
        }).collect(),
        resolution:  document.resolution.as_ref().map(|r| Resolution {
            content:     r.content.clone(),
            resolved_by: refs.user(r.resolved_by, false),
            resolved_at: r.resolved_at.to_chrono(),
        }),
        created_at:  document.created_at.to_chrono(),
        updated_at:  document.updated_at.to_chrono(),
    }
}

fn bare_ref(id: ObjectId) -> NamedRef {
    NamedRef { id: id.to_hex(), name: None, email: None, registration_number: None }
}

/// Current time as a bson date
pub fn now() -> DateTime {
    DateTime::now()
}

/// Page number and size, already clamped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u64,
    pub limit: u64,
}

impl Page {
    pub fn new(page: Option<u64>, limit: Option<u64>) -> Page {
        Page {
            page:  page.filter(|p| *p >= 1).unwrap_or(1).min(MAX_PAGE),
            limit: limit.filter(|l| *l >= 1).unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT),
        }
    }

    pub fn skip(&self) -> u64 {
        (self.page - 1).saturating_mul(self.limit)
    }

    pub fn limit_i64(&self) -> i64 {
        self.limit as i64
    }

    pub fn pagination(&self, total: u64) -> Pagination {
        Pagination { current: self.page, pages: (total + self.limit - 1) / self.limit, total }
    }
}

/// Escapes regex metacharacters so a search term matches literally
pub fn escape_regex(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if "\\.+*?()|[]{}^$#&-~".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Case-insensitive substring filter over `fields`
pub fn search_filter(term: &str, fields: &[&str]) -> Document {
    let pattern = escape_regex(term.trim());
    let clauses: Vec<Document> = fields
        .iter()
        .map(|field| doc! { *field: { "$regex": pattern.clone(), "$options": "i" } })
        .collect();
    doc! { "$or": clauses }
}

/// Server error code and message, when the error came from the server
fn server_error(error: &Error) -> Option<(i32, &str)> {
    match error.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(e)) => Some((e.code, e.message.as_str())),
        ErrorKind::Command(e) => Some((e.code, e.message.as_str())),
        _ => None,
    }
}

///
/// If `error` is a duplicate key violation, returns the field it was about
///
/// The field is read off the index name in the server message
/// (`index: email_1 dup key: ...`).
///
pub fn duplicate_field(error: &Error) -> Option<String> {
    let (code, message) = server_error(error)?;
    if code != DUPLICATE_KEY {
        return None;
    }
    Some(duplicate_field_from_message(message))
}

pub fn duplicate_field_from_message(message: &str) -> String {
    for field in ["email", "mobileNumber", "registrationNumber", "code"] {
        if message.contains(&format!("index: {}_", field)) || message.contains(&format!("{{ {}:", field)) {
            return field.to_string();
        }
    }
    "unknown".to_string()
}

pub fn is_duplicate_key(error: &Error) -> bool {
    duplicate_field(error).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_defaults_and_clamps() {
        assert_eq!(Page::new(None, None), Page { page: 1, limit: 20 });
        assert_eq!(Page::new(Some(0), Some(0)), Page { page: 1, limit: 20 });
        assert_eq!(Page::new(Some(3), Some(500)), Page { page: 3, limit: 100 });
        assert_eq!(Page::new(Some(3), Some(10)).skip(), 20);
    }

    #[test]
    fn huge_pages_stay_in_range() {
        let page = Page::new(Some(u64::MAX), Some(u64::MAX));
        assert_eq!(page, Page { page: MAX_PAGE, limit: MAX_LIMIT });
        assert!(page.skip() <= i64::MAX as u64);
        assert_eq!(page.skip(), (MAX_PAGE - 1) * MAX_LIMIT);
    }

    fn resolved_ticket(owner: ObjectId, admin: ObjectId, vehicle: ObjectId) -> TicketDocument {
        TicketDocument {
            id: ObjectId::new(),
            user: owner,
            subject: "Blocked in".to_string(),
            description: "Someone parks across my gate".to_string(),
            category: "parking".to_string(),
            priority: TicketPriority::High,
            status: TicketStatus::Resolved,
            vehicle: Some(vehicle),
            assigned_to: Some(admin),
            comments: vec![
                TicketComment { user: owner, content: "Still there".to_string(), created_at: now() },
                TicketComment { user: admin, content: "On it".to_string(), created_at: now() },
            ],
            resolution: Some(TicketResolution { content: "Towed".to_string(), resolved_by: admin, resolved_at: now() }),
            created_at: now(),
            updated_at: now(),
        }
    }

    #[test]
    fn ticket_references_are_asked_for_once() {
        let (owner, admin, vehicle) = (ObjectId::new(), ObjectId::new(), ObjectId::new());
        let found = vec![resolved_ticket(owner, admin, vehicle), resolved_ticket(owner, admin, vehicle)];

        let (users, vehicles) = TicketRefs::wanted(&found);
        assert_eq!(users.len(), 2);
        assert!(users.contains(&owner) && users.contains(&admin));
        assert_eq!(vehicles, vec![vehicle]);
    }

    #[test]
    fn tickets_carry_names_and_plates() {
        let (owner, admin, vehicle) = (ObjectId::new(), ObjectId::new(), ObjectId::new());
        let refs = TicketRefs {
            users: vec![
                (owner, "Asha".to_string(), "asha@example.com".to_string()),
                (admin, "Desk".to_string(), "desk@example.com".to_string()),
            ],
            vehicles: vec![(vehicle, "KA01AB1234".to_string())],
        };

        let ticket = doc_to_ticket(&resolved_ticket(owner, admin, vehicle), &refs);
        assert_eq!(ticket.user.name.as_deref(), Some("Asha"));
        assert_eq!(ticket.user.email.as_deref(), Some("asha@example.com"));
        assert_eq!(ticket.vehicle.unwrap().registration_number.as_deref(), Some("KA01AB1234"));
        let assigned = ticket.assigned_to.unwrap();
        assert_eq!(assigned.name.as_deref(), Some("Desk"));
        assert_eq!(assigned.email, None);
        assert_eq!(ticket.comments[1].user.name.as_deref(), Some("Desk"));
        assert_eq!(ticket.resolution.unwrap().resolved_by.name.as_deref(), Some("Desk"));

        let json = serde_json::to_value(&ticket.comments[0]).unwrap();
        assert_eq!(json["user"], serde_json::json!({ "id": owner.to_hex(), "name": "Asha" }));
    }

    #[test]
    fn unknown_references_stay_bare_ids() {
        let (owner, admin, vehicle) = (ObjectId::new(), ObjectId::new(), ObjectId::new());
        let ticket = doc_to_ticket(&resolved_ticket(owner, admin, vehicle), &TicketRefs::default());
        assert_eq!(ticket.user, NamedRef { id: owner.to_hex(), name: None, email: None, registration_number: None });
        assert_eq!(ticket.vehicle.unwrap().id, vehicle.to_hex());
    }

    #[test]
    fn pages_round_up() {
        let page = Page::new(None, Some(20));
        assert_eq!(page.pagination(0).pages, 0);
        assert_eq!(page.pagination(20).pages, 1);
        assert_eq!(page.pagination(21), Pagination { current: 1, pages: 2, total: 21 });
    }

    #[test]
    fn search_terms_are_literal() {
        assert_eq!(escape_regex("a.b*c"), "a\\.b\\*c");
        assert_eq!(escape_regex("+91 (98)"), "\\+91 \\(98\\)");
        let filter = search_filter("ann", &["name", "email"]);
        let clauses = filter.get_array("$or").unwrap();
        assert_eq!(clauses.len(), 2);
    }

    #[test]
    fn duplicate_field_comes_from_the_index_name() {
        let message = "E11000 duplicate key error collection: parkpal.users index: mobileNumber_1 dup key: { mobileNumber: \"9876543210\" }";
        assert_eq!(duplicate_field_from_message(message), "mobileNumber");
        let message = "E11000 duplicate key error collection: parkpal.vehicles index: registrationNumber_1 dup key: { registrationNumber: \"X\" }";
        assert_eq!(duplicate_field_from_message(message), "registrationNumber");
        assert_eq!(duplicate_field_from_message("E11000 something else"), "unknown");
    }
}
