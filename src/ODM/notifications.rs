//!
//! Documentation of the notifications module.
//! Fan-out: every notification is one record in `notifications` plus a
//! back-reference in the owner's `notifications` array.
//!
//! The record is authoritative and every listing reads it; the array is a
//! shortcut. A failed back-reference write is logged and left for
//! `odm::reconcile_user_references`.
//!

use super::*;
use models::*;
use odm_utils::*;

use bson::{doc, Document};
use bson::oid::ObjectId;
use futures::stream::TryStreamExt;
use mongodb::{Collection, Database};
use mongodb::options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument};
use log::{debug, warn};

fn notifications(db: &Database) -> Collection<NotificationDocument> {
    db.collection::<NotificationDocument>(NOTIFICATIONS)
}

/// Optional references and payload of a notification
#[derive(Debug, Clone, Default)]
pub struct NotificationContext {
    pub data: Document,
    pub scanned_by: Option<ObjectId>,
    pub scanned_location: Option<ScannedLocation>,
    pub vehicle: Option<ObjectId>,
    pub ticket: Option<ObjectId>,
}

///
/// Creates a notification for `owner` and links it from the owner
///
/// # Output
///
/// * Err(_) - the record could not be stored, nothing was written
/// * Ok(record) - stored; the back-reference is best-effort
///
pub async fn notify(
    db: &Database,
    owner: ObjectId,
    kind: NotificationType,
    title: &str,
    message: &str,
    context: NotificationContext,
) -> mongodb::error::Result<NotificationDocument> {
    let created = now();
    let record = NotificationDocument {
        id: ObjectId::new(),
        user: owner,
        kind,
        title: title.to_string(),
        message: message.to_string(),
        data: context.data,
        read: false,
        scanned_by: context.scanned_by,
        scanned_location: context.scanned_location,
        vehicle: context.vehicle,
        ticket: context.ticket,
        created_at: created,
        updated_at: created,
    };

    notifications(db).insert_one(&record, None).await?;

    match odm::update_user_refs(db, owner, "notifications", Action::Append, record.id).await {
        Ok(true) => debug!("Notification {} delivered to {}", record.id, owner),
        Ok(false) => warn!("Notification {} stored but owner {} is gone", record.id, owner),
        Err(e) => warn!("Notification {} stored without back-reference on {}: {}", record.id, owner, e),
    }

    Ok(record)
}

/// A page of a user's notifications, newest first, with scanner names and
/// vehicle registration numbers filled in
pub async fn list_for_user(
    db: &Database,
    owner: ObjectId,
    page: Page,
) -> mongodb::error::Result<(Vec<Notification>, u64)> {
    let find_options = FindOptions::builder()
        .sort(doc! { "createdAt": -1 })
        .skip(page.skip())
        .limit(page.limit_i64())
        .build();

    let found: Vec<NotificationDocument> = notifications(db)
        .find(doc! { "user": owner }, find_options)
        .await?
        .try_collect()
        .await?;
    let total = notifications(db).count_documents(doc! { "user": owner }, None).await?;

    Ok((populate(db, &found).await?, total))
}

/// The `limit` newest notifications of a user
pub async fn recent_for_user(db: &Database, owner: ObjectId, limit: i64) -> mongodb::error::Result<Vec<Notification>> {
    let find_options = FindOptions::builder().sort(doc! { "createdAt": -1 }).limit(limit).build();
    let found: Vec<NotificationDocument> = notifications(db)
        .find(doc! { "user": owner }, find_options)
        .await?
        .try_collect()
        .await?;
    populate(db, &found).await
}

async fn populate(db: &Database, found: &[NotificationDocument]) -> mongodb::error::Result<Vec<Notification>> {
    let scanners: Vec<ObjectId> = found.iter().filter_map(|n| n.scanned_by).collect();
    let vehicles: Vec<ObjectId> = found.iter().filter_map(|n| n.vehicle).collect();
    let names = odm::user_names(db, &scanners).await?;
    let plates = odm::registration_numbers(db, &vehicles).await?;

    Ok(found
        .iter()
        .map(|n| {
            let scanned_by = n.scanned_by.and_then(|id| {
                names.iter().find(|(uid, _)| *uid == id).map(|(uid, name)| NamedRef {
                    id: uid.to_hex(),
                    name: Some(name.clone()),
                    email: None,
                    registration_number: None,
                })
            });
            let vehicle = n.vehicle.and_then(|id| {
                plates.iter().find(|(vid, _)| *vid == id).map(|(vid, plate)| NamedRef {
                    id: vid.to_hex(),
                    name: None,
                    email: None,
                    registration_number: Some(plate.clone()),
                })
            });
            doc_to_notification(n, scanned_by, vehicle)
        })
        .collect())
}

///
/// Marks one of the owner's notifications read
///
/// Idempotent: marking an already read notification returns it unchanged.
/// `None` when the owner has no such notification.
///
pub async fn mark_read(db: &Database, owner: ObjectId, id: ObjectId) -> mongodb::error::Result<Option<NotificationDocument>> {
    let options = FindOneAndUpdateOptions::builder()
        .return_document(ReturnDocument::After)
        .build();
    notifications(db)
        .find_one_and_update(
            doc! { "_id": id, "user": owner },
            doc! { "$set": { "read": true, "updatedAt": now() } },
            options,
        )
        .await
}

/// Marks every unread notification of `owner` read, returns how many changed
pub async fn mark_all_read(db: &Database, owner: ObjectId) -> mongodb::error::Result<u64> {
    let result = notifications(db)
        .update_many(
            doc! { "user": owner, "read": false },
            doc! { "$set": { "read": true, "updatedAt": now() } },
            None,
        )
        .await?;
    Ok(result.modified_count)
}

///
/// Deletes one of the owner's notifications and its back-reference
///
/// Both writes are attempted even when the first fails; the first error
/// is the one reported.
///
pub async fn delete_notification(db: &Database, owner: ObjectId, id: ObjectId) -> mongodb::error::Result<Option<NotificationDocument>> {
    let deleted = notifications(db)
        .find_one_and_delete(doc! { "_id": id, "user": owner }, None)
        .await;

    // an unknown id is a 404, and then there is nothing to unlink either
    if let Ok(None) = deleted {
        return Ok(None);
    }

    let unlinked = odm::update_user_refs(db, owner, "notifications", Action::Delete, id).await;
    if let Err(e) = &unlinked {
        warn!("Back-reference to notification {} on {} not removed: {}", id, owner, e);
    }

    let record = deleted?;
    unlinked?;
    Ok(record)
}

/// Counts `qr_scan` notifications created since `since`
pub async fn count_scans_since(db: &Database, since: bson::DateTime) -> mongodb::error::Result<u64> {
    notifications(db)
        .count_documents(doc! { "type": "qr_scan", "createdAt": { "$gte": since } }, None)
        .await
}
