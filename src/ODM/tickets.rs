//!
//! Documentation of the tickets module.
//! Support tickets: created by a user, commented on by the user or an
//! admin, moved along `open -> assigned -> resolved` by admins.
//!

use super::*;
use models::*;
use odm_utils::*;

use bson::doc;
use bson::oid::ObjectId;
use futures::stream::TryStreamExt;
use mongodb::{Collection, Database};
use mongodb::options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument};

fn tickets(db: &Database) -> Collection<TicketDocument> {
    db.collection::<TicketDocument>(TICKETS)
}

fn return_after() -> FindOneAndUpdateOptions {
    FindOneAndUpdateOptions::builder()
        .return_document(ReturnDocument::After)
        .build()
}

///
/// Views of `found` with their references filled in
///
/// One lookup for all users and one for all vehicles, however many
/// tickets there are.
///
pub async fn populate(db: &Database, found: &[TicketDocument]) -> mongodb::error::Result<Vec<Ticket>> {
    let (users, vehicles) = TicketRefs::wanted(found);
    let refs = TicketRefs {
        users: odm::user_contacts(db, &users).await?,
        vehicles: odm::registration_numbers(db, &vehicles).await?,
    };
    Ok(found.iter().map(|ticket| doc_to_ticket(ticket, &refs)).collect())
}

/// A single populated ticket
pub async fn populate_one(db: &Database, ticket: &TicketDocument) -> mongodb::error::Result<Ticket> {
    let (users, vehicles) = TicketRefs::wanted(std::slice::from_ref(ticket));
    let refs = TicketRefs {
        users: odm::user_contacts(db, &users).await?,
        vehicles: odm::registration_numbers(db, &vehicles).await?,
    };
    Ok(doc_to_ticket(ticket, &refs))
}

#[derive(Debug, Clone)]
pub struct NewTicket {
    pub subject: String,
    pub description: String,
    pub category: String,
    pub priority: TicketPriority,
    pub vehicle: Option<ObjectId>,
}

/// Stores a new open ticket for `user`
pub async fn insert_ticket(db: &Database, user: ObjectId, ticket: NewTicket) -> mongodb::error::Result<TicketDocument> {
    let created = now();
    let document = TicketDocument {
        id: ObjectId::new(),
        user,
        subject: ticket.subject,
        description: ticket.description,
        category: ticket.category,
        priority: ticket.priority,
        status: TicketStatus::Open,
        vehicle: ticket.vehicle,
        assigned_to: None,
        comments: vec![],
        resolution: None,
        created_at: created,
        updated_at: created,
    };
    tickets(db).insert_one(&document, None).await?;
    Ok(document)
}

pub async fn get_ticket(db: &Database, id: ObjectId) -> mongodb::error::Result<Option<TicketDocument>> {
    tickets(db).find_one(doc! { "_id": id }, None).await
}

/// A page of a user's tickets, newest first, optionally by status
pub async fn list_for_user(
    db: &Database,
    user: ObjectId,
    status: Option<TicketStatus>,
    page: Page,
) -> mongodb::error::Result<(Vec<TicketDocument>, u64)> {
    let mut filter = doc! { "user": user };
    if let Some(status) = status {
        filter.insert("status", status.as_str());
    }
    let find_options = FindOptions::builder()
        .sort(doc! { "createdAt": -1 })
        .skip(page.skip())
        .limit(page.limit_i64())
        .build();

    let found = tickets(db).find(filter.clone(), find_options).await?.try_collect().await?;
    let total = tickets(db).count_documents(filter, None).await?;
    Ok((found, total))
}

/// The `limit` newest tickets, of one user or of everyone
pub async fn recent(db: &Database, user: Option<ObjectId>, limit: i64) -> mongodb::error::Result<Vec<TicketDocument>> {
    let filter = user.map(|id| doc! { "user": id });
    let find_options = FindOptions::builder().sort(doc! { "createdAt": -1 }).limit(limit).build();
    tickets(db).find(filter, find_options).await?.try_collect().await
}

/// The `limit` newest tickets among `ids`
pub async fn by_ids(db: &Database, ids: &[ObjectId], limit: i64) -> mongodb::error::Result<Vec<TicketDocument>> {
    if ids.is_empty() {
        return Ok(vec![]);
    }
    let find_options = FindOptions::builder().sort(doc! { "createdAt": -1 }).limit(limit).build();
    tickets(db)
        .find(doc! { "_id": { "$in": ids.to_vec() } }, find_options)
        .await?
        .try_collect()
        .await
}

/// Appends a comment; comments are accepted in every status
pub async fn add_comment(
    db: &Database,
    id: ObjectId,
    author: ObjectId,
    content: &str,
) -> mongodb::error::Result<Option<TicketDocument>> {
    let comment = bson::to_bson(&TicketComment { user: author, content: content.to_string(), created_at: now() })?;
    tickets(db)
        .find_one_and_update(
            doc! { "_id": id },
            doc! { "$push": { "comments": comment }, "$set": { "updatedAt": now() } },
            return_after(),
        )
        .await
}

///
/// Moves a ticket to `next`, attaching `resolution` when it becomes resolved
///
/// The caller has already checked the transition with
/// `TicketStatus::can_become`. The filter repeats the expected current
/// status so a concurrent change makes this a `None`.
///
pub async fn set_status(
    db: &Database,
    ticket: &TicketDocument,
    next: TicketStatus,
    resolution: Option<TicketResolution>,
) -> mongodb::error::Result<Option<TicketDocument>> {
    let mut set = doc! { "status": next.as_str(), "updatedAt": now() };
    if let Some(resolution) = resolution {
        set.insert("resolution", bson::to_bson(&resolution)?);
    }
    tickets(db)
        .find_one_and_update(
            doc! { "_id": ticket.id, "status": ticket.status.as_str() },
            doc! { "$set": set },
            return_after(),
        )
        .await
}

/// Assigns a ticket to an admin; an open ticket becomes assigned
pub async fn assign(db: &Database, ticket: &TicketDocument, admin: ObjectId) -> mongodb::error::Result<Option<TicketDocument>> {
    let status = match ticket.status {
        TicketStatus::Open => TicketStatus::Assigned,
        other => other,
    };
    tickets(db)
        .find_one_and_update(
            doc! { "_id": ticket.id, "status": ticket.status.as_str() },
            doc! { "$set": { "assignedTo": admin, "status": status.as_str(), "updatedAt": now() } },
            return_after(),
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use TicketStatus::*;

    #[test]
    fn tickets_only_move_forward() {
        assert!(Open.can_become(Assigned));
        assert!(Open.can_become(Resolved));
        assert!(Assigned.can_become(Resolved));
        assert!(Assigned.can_become(Assigned));

        assert!(!Assigned.can_become(Open));
        assert!(!Resolved.can_become(Open));
        assert!(!Resolved.can_become(Assigned));
    }

    #[test]
    fn status_names_match_the_stored_strings() {
        for status in [Open, Assigned, Resolved] {
            assert_eq!(bson::to_bson(&status).unwrap().as_str(), Some(status.as_str()));
        }
    }
}
