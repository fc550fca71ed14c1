//!
//! Documentation of the short code index.
//! Maps every issued 3-digit code to the user or vehicle it was issued
//! for, so a dialed code resolves with one indexed lookup.
//!
//! Codes are unique (unique index on `code`). On a collision a new code
//! is drawn; after `RANDOM_ATTEMPTS` draws the free codes are listed and
//! tried one by one. Codes are released when their subject is deactivated.
//!

use std::collections::{HashMap, HashSet};

use super::*;
use models::*;
use odm_utils::*;
use qr::qr::{self as issuance, IssuedCode, QrPayload, ShortCode, Subject};

use bson::{doc, Bson};
use bson::oid::ObjectId;
use futures::stream::TryStreamExt;
use mongodb::Database;
use rand::seq::SliceRandom;
use log::{debug, info, warn};

/// Random draws before falling back to listing the free codes
pub const RANDOM_ATTEMPTS: usize = 32;

fn codes(db: &Database) -> mongodb::Collection<CodeDocument> {
    db.collection::<CodeDocument>(QR_CODES)
}

///
/// Issues a code for `subject` and records it in the index
///
/// # Arguments
///
/// * `user` - the user, or the owner when `vehicle` is set
/// * `vehicle` - the vehicle the code is for, if any
///
/// # Output
///
/// * Err(CodeSpaceExhausted) - all 900 codes are in use
/// * Ok(issued) - the code is reserved and belongs to the caller
///
pub async fn reserve_code(
    db: &Database,
    subject: &Subject,
    user: ObjectId,
    vehicle: Option<ObjectId>,
) -> OdmResult<IssuedCode> {
    for attempt in 0..RANDOM_ATTEMPTS {
        let code = ShortCode::random(&mut rand::thread_rng());
        match try_reserve(db, subject, code, user, vehicle).await? {
            Some(issued) => return Ok(issued),
            None => debug!("Short code {} taken, redrawing (attempt {})", code, attempt + 1),
        }
    }

    let mut free = free_codes(&used_codes(db).await?);
    free.shuffle(&mut rand::thread_rng());
    info!("Random draws exhausted, {} short codes left", free.len());

    for code in free {
        if let Some(issued) = try_reserve(db, subject, code, user, vehicle).await? {
            return Ok(issued);
        }
    }

    Err(OdmError::CodeSpaceExhausted)
}

/// One insert into the index; `None` when the code is already taken
async fn try_reserve(
    db: &Database,
    subject: &Subject,
    code: ShortCode,
    user: ObjectId,
    vehicle: Option<ObjectId>,
) -> OdmResult<Option<IssuedCode>> {
    let issued = issuance::with_code(subject, code)?;
    let entry = CodeDocument {
        code: code.to_string(),
        qr_id: issued.opaque_id.clone(),
        subject: match subject {
            Subject::User => SubjectKind::User,
            Subject::Vehicle { .. } => SubjectKind::Vehicle,
        },
        user,
        vehicle,
        created_at: now(),
    };

    match codes(db).insert_one(&entry, None).await {
        Ok(_) => Ok(Some(issued)),
        Err(e) if is_duplicate_key(&e) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Every code currently in the index
pub async fn used_codes(db: &Database) -> mongodb::error::Result<HashSet<ShortCode>> {
    let values = codes(db).distinct("code", None, None).await?;
    Ok(values
        .iter()
        .filter_map(Bson::as_str)
        .filter_map(ShortCode::parse)
        .collect())
}

/// Codes not in `used`, ascending
pub fn free_codes(used: &HashSet<ShortCode>) -> Vec<ShortCode> {
    ShortCode::all().filter(|code| !used.contains(code)).collect()
}

/// Gives the code issued under `qr_id` back to the pool
pub async fn release_code(db: &Database, qr_id: &str) -> mongodb::error::Result<bool> {
    if qr_id.is_empty() {
        return Ok(false);
    }
    let result = codes(db).delete_one(doc! { "qrId": qr_id }, None).await?;
    Ok(result.deleted_count > 0)
}

/// Index entry of `code`, if issued
pub async fn lookup_code(db: &Database, code: ShortCode) -> mongodb::error::Result<Option<CodeDocument>> {
    codes(db).find_one(doc! { "code": code.to_string() }, None).await
}

///
/// Resolves a dialed code or a scanned payload to the identity it was
/// issued for
///
/// Three digits are treated as a short code, anything else as a payload.
/// Deactivated users and vehicles never resolve.
///
/// # Output
///
/// * Ok(None) - unknown code, malformed payload or inactive subject
/// * Ok(Some(identity)) - who the code belongs to
///
pub async fn resolve(db: &Database, code_or_payload: &str) -> mongodb::error::Result<Option<Identity>> {
    match ShortCode::parse(code_or_payload) {
        Some(code) => resolve_code(db, code).await,
        None => resolve_payload(db, code_or_payload).await,
    }
}

/// The IVR path: one lookup in the index, then an activity check
pub async fn resolve_code(db: &Database, code: ShortCode) -> mongodb::error::Result<Option<Identity>> {
    let entry = match lookup_code(db, code).await? {
        Some(value) => value,
        None => return Ok(None),
    };
    let identity = Identity::from(&entry);
    confirm_active(db, identity, &entry.qr_id).await
}

/// The scan path: decode with the fixed schemas, then match the record
/// that carries the same opaque id
pub async fn resolve_payload(db: &Database, raw: &str) -> mongodb::error::Result<Option<Identity>> {
    let payload = match QrPayload::decode(raw) {
        Some(value) => value,
        None => {
            debug!("Scanned payload did not match any schema");
            return Ok(None);
        }
    };

    match payload {
        QrPayload::Vehicle(v) => {
            let vehicle = db
                .collection::<VehicleDocument>(VEHICLES)
                .find_one(doc! {
                    "registrationNumber": v.registration_number.trim().to_uppercase(),
                    "qrId": &v.id,
                    "isActive": true,
                }, None)
                .await?;
            match vehicle {
                None => Ok(None),
                Some(vehicle) => {
                    let identity = Identity::Vehicle { vehicle: vehicle.id, owner: vehicle.owner };
                    confirm_active(db, identity, &v.id).await
                }
            }
        }
        QrPayload::User(u) => {
            let user = db
                .collection::<UserDocument>(USERS)
                .find_one(doc! { "qrId": &u.id, "isActive": true }, None)
                .await?;
            Ok(user.map(|user| Identity::User { user: user.id }))
        }
    }
}

/// Checks that the subject (and for vehicles, the owner) is still active
/// and still holds `qr_id`
async fn confirm_active(db: &Database, identity: Identity, qr_id: &str) -> mongodb::error::Result<Option<Identity>> {
    let users = db.collection::<UserDocument>(USERS);
    match identity {
        Identity::User { user } => {
            let found = users
                .find_one(doc! { "_id": user, "qrId": qr_id, "isActive": true }, None)
                .await?;
            Ok(found.map(|_| identity))
        }
        Identity::Vehicle { vehicle, owner } => {
            let found = db
                .collection::<VehicleDocument>(VEHICLES)
                .find_one(doc! { "_id": vehicle, "qrId": qr_id, "isActive": true }, None)
                .await?;
            if found.is_none() {
                return Ok(None);
            }
            let owner_doc = users.find_one(doc! { "_id": owner, "isActive": true }, None).await?;
            Ok(owner_doc.map(|_| identity))
        }
    }
}

//
// Backfill of records written before the index existed
//

/// A stored payload waiting to be indexed
#[derive(Debug, Clone)]
pub struct BackfillRecord {
    pub identity: Identity,
    pub payload: String,
}

#[derive(Debug, Default)]
pub struct BackfillPlan {
    pub entries: Vec<CodeDocument>,
    /// Records whose payload did not decode (or was the wrong schema)
    pub malformed: Vec<Identity>,
    /// Records that lost their code to an earlier holder
    pub collisions: Vec<(Identity, ShortCode)>,
}

///
/// Decides which stored payloads get an index entry
///
/// `taken` maps codes already in the index to the opaque id holding them.
/// Records are visited in order; the first holder of a code keeps it.
/// A malformed payload is skipped, never fatal.
///
pub fn plan_backfill(records: Vec<BackfillRecord>, taken: &HashMap<ShortCode, String>) -> BackfillPlan {
    let mut plan = BackfillPlan::default();
    let mut holders: HashMap<ShortCode, String> = taken.clone();

    for record in records {
        let payload = match (QrPayload::decode(&record.payload), record.identity) {
            (Some(p @ QrPayload::User(_)), Identity::User { .. }) => p,
            (Some(p @ QrPayload::Vehicle(_)), Identity::Vehicle { .. }) => p,
            _ => {
                plan.malformed.push(record.identity);
                continue;
            }
        };

        let code = payload.code();
        match holders.get(&code) {
            Some(holder) if holder == payload.id() => continue,
            Some(_) => {
                plan.collisions.push((record.identity, code));
                continue;
            }
            None => {}
        }

        holders.insert(code, payload.id().to_string());
        let (subject, user, vehicle) = match record.identity {
            Identity::User { user } => (SubjectKind::User, user, None),
            Identity::Vehicle { vehicle, owner } => (SubjectKind::Vehicle, owner, Some(vehicle)),
        };
        plan.entries.push(CodeDocument {
            code: code.to_string(),
            qr_id: payload.id().to_string(),
            subject,
            user,
            vehicle,
            created_at: now(),
        });
    }

    plan
}

///
/// Indexes the codes of active users and vehicles that have a stored
/// payload but no entry yet
///
/// # Log
///
/// * `warn` - one line per malformed payload and per collision
/// * `info` - how many entries were added
///
pub async fn backfill(db: &Database) -> mongodb::error::Result<usize> {
    let mut taken = HashMap::new();
    let mut cursor = codes(db).find(None, None).await?;
    while let Some(entry) = cursor.try_next().await? {
        if let Some(code) = ShortCode::parse(&entry.code) {
            taken.insert(code, entry.qr_id);
        }
    }

    let mut records = vec![];
    let mut users = db
        .collection::<UserDocument>(USERS)
        .find(doc! { "isActive": true, "qrCode": { "$nin": ["", Bson::Null] } }, None)
        .await?;
    while let Some(user) = users.try_next().await? {
        records.push(BackfillRecord { identity: Identity::User { user: user.id }, payload: user.qr_code });
    }
    let mut vehicles = db
        .collection::<VehicleDocument>(VEHICLES)
        .find(doc! { "isActive": true, "qrCode": { "$nin": ["", Bson::Null] } }, None)
        .await?;
    while let Some(vehicle) = vehicles.try_next().await? {
        records.push(BackfillRecord {
            identity: Identity::Vehicle { vehicle: vehicle.id, owner: vehicle.owner },
            payload: vehicle.qr_code,
        });
    }

    let plan = plan_backfill(records, &taken);
    for identity in &plan.malformed {
        warn!("Skipping malformed QR payload of {:?}", identity);
    }
    for (identity, code) in &plan.collisions {
        warn!("Short code {} of {:?} is already held, left unindexed", code, identity);
    }

    let mut added = 0;
    for entry in &plan.entries {
        match codes(db).insert_one(entry, None).await {
            Ok(_) => added += 1,
            Err(e) if is_duplicate_key(&e) => warn!("Short code {} was claimed during backfill", entry.code),
            Err(e) => return Err(e),
        }
    }
    if added > 0 {
        info!("Backfilled {} short codes", added);
    }
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_record(payload: &str) -> (ObjectId, BackfillRecord) {
        let id = ObjectId::new();
        (id, BackfillRecord { identity: Identity::User { user: id }, payload: payload.to_string() })
    }

    #[test]
    fn free_codes_skip_the_used_ones() {
        let used: HashSet<ShortCode> = [100, 101, 999].iter().filter_map(|c| ShortCode::new(*c)).collect();
        let free = free_codes(&used);
        assert_eq!(free.len(), 897);
        assert_eq!(free.first().map(|c| c.value()), Some(102));
        assert_eq!(free.last().map(|c| c.value()), Some(998));
    }

    #[test]
    fn full_index_leaves_nothing_free() {
        let used: HashSet<ShortCode> = ShortCode::all().collect();
        assert!(free_codes(&used).is_empty());
    }

    #[test]
    fn first_holder_keeps_a_colliding_code() {
        let (first, a) = user_record(r#"{"id":"aaa","code":"482","timestamp":1}"#);
        let (second, b) = user_record(r#"{"id":"bbb","code":"482","timestamp":2}"#);
        let plan = plan_backfill(vec![a, b], &HashMap::new());

        assert_eq!(plan.entries.len(), 1);
        assert_eq!(plan.entries[0].user, first);
        assert_eq!(plan.entries[0].qr_id, "aaa");
        assert_eq!(plan.collisions.len(), 1);
        assert_eq!(plan.collisions[0].0, Identity::User { user: second });
    }

    #[test]
    fn malformed_payloads_are_skipped_not_fatal() {
        let (_, broken) = user_record("data:image/png;base64,iVBORw0KGgo=");
        let (good_id, good) = user_record(r#"{"id":"ccc","code":"123","timestamp":1}"#);
        let plan = plan_backfill(vec![broken, good], &HashMap::new());

        assert_eq!(plan.malformed.len(), 1);
        assert_eq!(plan.entries.len(), 1);
        assert_eq!(plan.entries[0].user, good_id);
        assert_eq!(plan.entries[0].code, "123");
    }

    #[test]
    fn wrong_schema_for_the_record_kind_is_malformed() {
        let vehicle = ObjectId::new();
        let owner = ObjectId::new();
        let record = BackfillRecord {
            identity: Identity::Vehicle { vehicle, owner },
            payload: r#"{"id":"ddd","code":"555","timestamp":1}"#.into(),
        };
        let plan = plan_backfill(vec![record], &HashMap::new());
        assert!(plan.entries.is_empty());
        assert_eq!(plan.malformed, vec![Identity::Vehicle { vehicle, owner }]);
    }

    #[test]
    fn already_indexed_records_are_left_alone() {
        let (_, record) = user_record(r#"{"id":"eee","code":"700","timestamp":1}"#);
        let mut taken = HashMap::new();
        taken.insert(ShortCode::new(700).unwrap(), "eee".to_string());
        let plan = plan_backfill(vec![record], &taken);
        assert!(plan.entries.is_empty());
        assert!(plan.collisions.is_empty());
    }

    #[test]
    fn vehicle_entries_point_at_the_owner() {
        let vehicle = ObjectId::new();
        let owner = ObjectId::new();
        let record = BackfillRecord {
            identity: Identity::Vehicle { vehicle, owner },
            payload: r#"{"id":"fff","code":"321","timestamp":1,"registrationNumber":"KA01","vehicleType":"2-wheeler"}"#.into(),
        };
        let plan = plan_backfill(vec![record], &HashMap::new());
        let entry = &plan.entries[0];
        assert_eq!(Identity::from(entry), Identity::Vehicle { vehicle, owner });
        assert_eq!(Identity::from(entry).owner(), owner);
    }
}
