//!
//! Documentation of the Models module.
//! Contains all the models needed for a ParkPal connection.
//!
//! Every collection has a `*Document` struct that is stored as-is, and a
//! view struct (ids as hex strings, dates as RFC 3339) that is sent to
//! clients. Conversions live in `odm_utils`.
//!

use serde::{Serialize, Deserialize};
use bson::{oid::ObjectId, DateTime, Document};

pub const USERS: &str = "users";
pub const VEHICLES: &str = "vehicles";
pub const NOTIFICATIONS: &str = "notifications";
pub const TICKETS: &str = "tickets";
pub const QR_CODES: &str = "qr_codes";

/// The Action enum, used to decide for updating functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Delete,
    Append
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Default for Role {
    fn default() -> Self {
        Role::User
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VehicleType {
    #[serde(rename = "2-wheeler")]
    TwoWheeler,
    #[serde(rename = "4-wheeler")]
    FourWheeler,
    #[serde(rename = "other")]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    QrScan,
    TicketExpiry,
    PaymentSuccess,
    PaymentFailed,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Open,
    Assigned,
    Resolved,
}

impl TicketStatus {
    /// Tickets only move forward; re-setting the current status is allowed
    pub fn can_become(self, next: TicketStatus) -> bool {
        use TicketStatus::*;
        matches!(
            (self, next),
            (Open, Open) | (Assigned, Assigned) | (Resolved, Resolved)
                | (Open, Assigned) | (Open, Resolved) | (Assigned, Resolved)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::Assigned => "assigned",
            TicketStatus::Resolved => "resolved",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Default for TicketPriority {
    fn default() -> Self {
        TicketPriority::Medium
    }
}

/// Which kind of record a short code belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    User,
    Vehicle,
}

/*
Models for the MongoDB operations
*/
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UserDocument {
    /// The ID of the model.
    #[serde(rename = "_id")]
    pub id: ObjectId,
    /// The user's email address, lower case
    pub email: String,
    /// argon2id PHC string
    pub password: String,
    pub name: String,
    pub mobile_number: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// The encoded QR payload
    #[serde(default)]
    pub qr_code: String,
    /// The opaque id inside `qr_code`
    #[serde(default)]
    pub qr_id: String,
    /// Owned vehicles (back-references)
    #[serde(default)]
    pub vehicles: Vec<ObjectId>,
    /// Notifications (back-references)
    #[serde(default)]
    pub notifications: Vec<ObjectId>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct VehicleDocument {
    /// The ID of the model.
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub owner: ObjectId,
    /// Always upper case
    pub registration_number: String,
    pub registration_year: i32,
    pub vehicle_type: VehicleType,
    pub make: String,
    pub model: String,
    pub color: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub qr_code: String,
    #[serde(default)]
    pub qr_id: String,
    #[serde(default)]
    pub tickets: Vec<ObjectId>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

/// GeoJSON point plus a free-text address
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ScannedLocation {
    #[serde(rename = "type")]
    pub kind: String,
    /// `[longitude, latitude]`
    pub coordinates: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl ScannedLocation {
    pub fn point(longitude: f64, latitude: f64, address: Option<String>) -> ScannedLocation {
        ScannedLocation { kind: "Point".into(), coordinates: vec![longitude, latitude], address }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NotificationDocument {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    /// The owner
    pub user: ObjectId,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub data: Document,
    #[serde(default)]
    pub read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scanned_by: Option<ObjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scanned_location: Option<ScannedLocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle: Option<ObjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket: Option<ObjectId>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TicketComment {
    pub user: ObjectId,
    pub content: String,
    pub created_at: DateTime,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TicketResolution {
    pub content: String,
    pub resolved_by: ObjectId,
    pub resolved_at: DateTime,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TicketDocument {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub user: ObjectId,
    pub subject: String,
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub priority: TicketPriority,
    pub status: TicketStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle: Option<ObjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<ObjectId>,
    #[serde(default)]
    pub comments: Vec<TicketComment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<TicketResolution>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

/// One entry of the short code index
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CodeDocument {
    /// The 3 digits, as a string
    pub code: String,
    pub qr_id: String,
    pub subject: SubjectKind,
    /// The user, or the owner when the subject is a vehicle
    pub user: ObjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle: Option<ObjectId>,
    pub created_at: DateTime,
}

/// Who a scanned payload or a dialed code points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    User { user: ObjectId },
    Vehicle { vehicle: ObjectId, owner: ObjectId },
}

impl Identity {
    /// The account that gets called or notified
    pub fn owner(&self) -> ObjectId {
        match self {
            Identity::User { user } => *user,
            Identity::Vehicle { owner, .. } => *owner,
        }
    }
}

impl From<&CodeDocument> for Identity {
    fn from(entry: &CodeDocument) -> Self {
        match (entry.subject, entry.vehicle) {
            (SubjectKind::Vehicle, Some(vehicle)) => Identity::Vehicle { vehicle, owner: entry.user },
            _ => Identity::User { user: entry.user },
        }
    }
}

fn default_true() -> bool {
    true
}

/*
Views sent back to clients
*/
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: String,
    pub email: String,
    pub name: String,
    pub mobile_number: String,
    pub role: Role,
    pub is_active: bool,
    pub qr_code: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    pub id: String,
    pub owner: String,
    pub registration_number: String,
    pub registration_year: i32,
    pub vehicle_type: VehicleType,
    pub make: String,
    pub model: String,
    pub color: String,
    pub is_active: bool,
    pub tickets: Vec<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// A populated reference: id plus one display field
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NamedRef {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_number: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub user: String,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    pub data: serde_json::Value,
    pub read: bool,
    pub scanned_by: Option<NamedRef>,
    pub scanned_location: Option<ScannedLocation>,
    pub vehicle: Option<NamedRef>,
    pub ticket: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub user: NamedRef,
    pub content: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub content: String,
    pub resolved_by: NamedRef,
    pub resolved_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: String,
    pub user: NamedRef,
    pub subject: String,
    pub description: String,
    pub category: String,
    pub priority: TicketPriority,
    pub status: TicketStatus,
    pub vehicle: Option<NamedRef>,
    pub assigned_to: Option<NamedRef>,
    pub comments: Vec<Comment>,
    pub resolution: Option<Resolution>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// `{current, pages, total}` block of every paged listing
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub current: u64,
    pub pages: u64,
    pub total: u64,
}
