//!
//! Documentation of the odm module.
//! Used to connect to the ParkPal database.
//!

use super::*;
use models::*;
use odm_utils::*;
use config::config::ParkpalConfig;
use qr::qr::{IssuedCode, Subject};
use std::time::Duration;

use bson::{doc, Document};
use bson::oid::ObjectId;
use futures::stream::TryStreamExt;
use mongodb::{Client, Collection, Database, IndexModel};
use mongodb::options::{ClientOptions, FindOneAndUpdateOptions, FindOptions, IndexOptions, ReturnDocument};
use log::{error, info, warn};

///
/// Initiate DB connection
///
///
/// # Arguments
///
/// * `config` - A config object containing 'database' and 'database_uri'
///
///
/// # Log
///
/// * `info` - "Database Connected!", indicating success
/// * `error` - "Could not connect to MongoDB {error}", indicating error
///
pub async fn init(config: &ParkpalConfig) -> mongodb::error::Result<Database> {
    let database = connect(config).await?;

    match database.run_command(doc! { "ping": 1 }, None).await {
        Ok(_) => {
            info!("Database Connected!");
        },
        Err(value) => {
            error!("Could not connect to MongoDB {}", value);
            return Err(value);
        },
    }

    ensure_indexes(&database).await?;
    Ok(database)
}

/// basic connection, nothing is sent to the server until the first query
pub async fn connect(config: &ParkpalConfig) -> mongodb::error::Result<Database> {
    let mut client_options = ClientOptions::parse(&config.database_uri).await?;
    client_options.app_name = Some("parkpal".to_string());
    client_options.connect_timeout = Some(Duration::from_secs(config.timeout));
    client_options.heartbeat_freq = Some(Duration::from_secs(config.timeout.max(1)));
    client_options.server_selection_timeout = Some(Duration::from_secs(config.timeout));
    let client = Client::with_options(client_options)?;

    // a database named in the URI wins over the config file
    let database = client
        .default_database()
        .unwrap_or_else(|| client.database(&config.database));

    Ok(database)
}

fn unique(keys: Document) -> IndexModel {
    IndexModel::builder()
        .keys(keys)
        .options(IndexOptions::builder().unique(true).build())
        .build()
}

fn plain(keys: Document) -> IndexModel {
    IndexModel::builder().keys(keys).build()
}

/// Creates the unique and lookup indexes; a no-op when they exist
pub async fn ensure_indexes(db: &Database) -> mongodb::error::Result<()> {
    users(db).create_indexes(vec![
        unique(doc! { "email": 1 }),
        unique(doc! { "mobileNumber": 1 }),
        plain(doc! { "qrId": 1 }),
    ], None).await?;

    vehicles(db).create_indexes(vec![
        unique(doc! { "registrationNumber": 1 }),
        plain(doc! { "owner": 1 }),
    ], None).await?;

    db.collection::<Document>(NOTIFICATIONS).create_indexes(vec![
        plain(doc! { "user": 1, "read": 1 }),
        plain(doc! { "user": 1, "createdAt": -1 }),
    ], None).await?;

    db.collection::<Document>(TICKETS).create_indexes(vec![
        plain(doc! { "user": 1, "createdAt": -1 }),
    ], None).await?;

    db.collection::<Document>(QR_CODES).create_indexes(vec![
        unique(doc! { "code": 1 }),
        plain(doc! { "qrId": 1 }),
    ], None).await?;

    Ok(())
}

fn users(db: &Database) -> Collection<UserDocument> {
    db.collection::<UserDocument>(USERS)
}

fn vehicles(db: &Database) -> Collection<VehicleDocument> {
    db.collection::<VehicleDocument>(VEHICLES)
}

fn return_after() -> FindOneAndUpdateOptions {
    FindOneAndUpdateOptions::builder()
        .return_document(ReturnDocument::After)
        .build()
}

/// Undoes a reservation while rolling back; a failure here is only logged
async fn release_reserved(db: &Database, opaque_id: &str) {
    if let Err(e) = qr_index::release_code(db, opaque_id).await {
        warn!("Rollback could not release code {}: {}", opaque_id, e);
    }
}

//
// USER ACTIONS
//

/// Fields needed to register a user, already validated
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub mobile_number: String,
}

/// The bounded set of profile fields a user may change
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub mobile_number: Option<String>,
}

///
/// Get user by id
///
/// # Output
///
/// * Err(_) - indicates DB error
/// * Ok(None) - user has not been found
/// * Ok(Some(value)) - user has been found
///
pub async fn get_user_by_id(db: &Database, id: ObjectId) -> mongodb::error::Result<Option<UserDocument>> {
    users(db).find_one(doc! { "_id": id }, None).await
}

/// Get user by email (lower case)
pub async fn get_user_by_email(db: &Database, email: &str) -> mongodb::error::Result<Option<UserDocument>> {
    users(db).find_one(doc! { "email": email.to_lowercase() }, None).await
}

///
/// Returns which unique field (`email` or `mobileNumber`) another user
/// already holds
///
/// `except` is the user doing an update, who may keep their own values
///
pub async fn find_conflict(
    db: &Database,
    email: Option<&str>,
    mobile_number: Option<&str>,
    except: Option<ObjectId>,
) -> mongodb::error::Result<Option<String>> {
    let mut clauses = vec![];
    if let Some(email) = email {
        clauses.push(doc! { "email": email });
    }
    if let Some(mobile) = mobile_number {
        clauses.push(doc! { "mobileNumber": mobile });
    }
    if clauses.is_empty() {
        return Ok(None);
    }

    let mut filter = doc! { "$or": clauses };
    if let Some(id) = except {
        filter.insert("_id", doc! { "$ne": id });
    }

    let existing = users(db).find_one(filter, None).await?;
    Ok(existing.map(|user| {
        if Some(user.email.as_str()) == email { "email".to_string() } else { "mobileNumber".to_string() }
    }))
}

///
/// Registers a user and issues their code
///
/// The code is reserved first; if the user insert then fails, the code
/// is released again.
///
pub async fn insert_user(db: &Database, user: NewUser) -> OdmResult<(UserDocument, IssuedCode)> {
    if let Some(field) = find_conflict(db, Some(&user.email), Some(&user.mobile_number), None).await? {
        return Err(OdmError::Duplicate(field));
    }

    let id = ObjectId::new();
    let issued = qr_index::reserve_code(db, &Subject::User, id, None).await?;
    let created = now();
    let document = UserDocument {
        id,
        email: user.email,
        password: user.password_hash,
        name: user.name,
        mobile_number: user.mobile_number,
        role: Role::User,
        is_active: true,
        qr_code: issued.payload.encode(),
        qr_id: issued.opaque_id.clone(),
        vehicles: vec![],
        notifications: vec![],
        created_at: created,
        updated_at: created,
    };

    if let Err(e) = users(db).insert_one(&document, None).await {
        release_reserved(db, &issued.opaque_id).await;
        return Err(e.into());
    }

    Ok((document, issued))
}

/// Applies the whitelisted profile fields, returning the updated user
pub async fn update_user_profile(
    db: &Database,
    id: ObjectId,
    update: ProfileUpdate,
) -> OdmResult<Option<UserDocument>> {
    if let Some(field) = find_conflict(db, update.email.as_deref(), update.mobile_number.as_deref(), Some(id)).await? {
        return Err(OdmError::Duplicate(field));
    }

    let mut set = doc! { "updatedAt": now() };
    if let Some(name) = update.name {
        set.insert("name", name);
    }
    if let Some(email) = update.email {
        set.insert("email", email);
    }
    if let Some(mobile) = update.mobile_number {
        set.insert("mobileNumber", mobile);
    }

    let user = users(db)
        .find_one_and_update(doc! { "_id": id }, doc! { "$set": set }, return_after())
        .await?;
    Ok(user)
}

///
/// Deactivates a user and gives their codes back
///
/// Deactivation is terminal and takes the user's vehicles with it, so no
/// code of theirs stays dialable. Returns `None` for an unknown user.
///
pub async fn deactivate_user(db: &Database, id: ObjectId) -> mongodb::error::Result<Option<UserDocument>> {
    let user = users(db)
        .find_one_and_update(
            doc! { "_id": id },
            doc! { "$set": { "isActive": false, "updatedAt": now() } },
            return_after(),
        )
        .await?;

    let user = match user {
        Some(value) => value,
        None => return Ok(None),
    };
    qr_index::release_code(db, &user.qr_id).await?;

    for vehicle in get_vehicles_for_user(db, id).await? {
        if let Err(e) = deactivate_vehicle(db, id, vehicle.id).await {
            warn!("Vehicle {} of deactivated user {} kept its code: {}", vehicle.id, id, e);
        }
    }
    Ok(Some(user))
}

///
/// Update a back-reference array of a user, using the Action enum
///
/// # Example
/// ```ignore
/// update_user_refs(&db, user, "vehicles", Action::Append, vehicle_id).await?;
/// ```
///
pub async fn update_user_refs(
    db: &Database,
    id: ObjectId,
    field: &str,
    action: Action,
    reference: ObjectId,
) -> mongodb::error::Result<bool> {
    let update = match action {
        Action::Append => doc! { "$addToSet": { field: reference } },
        Action::Delete => doc! { "$pull": { field: reference } },
    };
    let result = users(db).update_one(doc! { "_id": id }, update, None).await?;
    Ok(result.matched_count > 0)
}

/// Users with role `user`, newest first, optionally filtered
pub async fn list_users(
    db: &Database,
    search: Option<&str>,
    page: Page,
) -> mongodb::error::Result<(Vec<UserDocument>, u64)> {
    let mut filter = doc! { "role": "user" };
    if let Some(term) = search.map(str::trim).filter(|t| !t.is_empty()) {
        filter.extend(search_filter(term, &["name", "email", "mobileNumber"]));
    }

    let find_options = FindOptions::builder()
        .sort(doc! { "createdAt": -1 })
        .skip(page.skip())
        .limit(page.limit_i64())
        .build();

    let found: Vec<UserDocument> = users(db).find(filter.clone(), find_options).await?.try_collect().await?;
    let total = users(db).count_documents(filter, None).await?;
    Ok((found, total))
}

/// The admin with `id`, if that user is an admin
pub async fn get_admin(db: &Database, id: ObjectId) -> mongodb::error::Result<Option<UserDocument>> {
    users(db).find_one(doc! { "_id": id, "role": "admin" }, None).await
}

/// Any admin, the oldest one
pub async fn first_admin(db: &Database) -> mongodb::error::Result<Option<UserDocument>> {
    let options = mongodb::options::FindOneOptions::builder().sort(doc! { "createdAt": 1 }).build();
    users(db).find_one(doc! { "role": "admin", "isActive": true }, options).await
}

/// Ids to display names, for populating references
pub async fn user_names(db: &Database, ids: &[ObjectId]) -> mongodb::error::Result<Vec<(ObjectId, String)>> {
    if ids.is_empty() {
        return Ok(vec![]);
    }
    let found: Vec<UserDocument> = users(db)
        .find(doc! { "_id": { "$in": ids.to_vec() } }, None)
        .await?
        .try_collect()
        .await?;
    Ok(found.into_iter().map(|u| (u.id, u.name)).collect())
}

/// Ids to (name, email), for references whose reader may contact the user
pub async fn user_contacts(db: &Database, ids: &[ObjectId]) -> mongodb::error::Result<Vec<(ObjectId, String, String)>> {
    if ids.is_empty() {
        return Ok(vec![]);
    }
    let found: Vec<UserDocument> = users(db)
        .find(doc! { "_id": { "$in": ids.to_vec() } }, None)
        .await?
        .try_collect()
        .await?;
    Ok(found.into_iter().map(|u| (u.id, u.name, u.email)).collect())
}

///
/// Rebuilds a user's `vehicles` and `notifications` back-references from
/// the source collections
///
/// Repairs what a half-done two-write left behind. Returns `None` for an
/// unknown user.
///
pub async fn reconcile_user_references(db: &Database, id: ObjectId) -> mongodb::error::Result<Option<UserDocument>> {
    let owned: Vec<ObjectId> = vehicles(db)
        .find(doc! { "owner": id, "isActive": true }, None)
        .await?
        .try_collect::<Vec<VehicleDocument>>()
        .await?
        .into_iter()
        .map(|v| v.id)
        .collect();

    let notifications: Vec<ObjectId> = db
        .collection::<NotificationDocument>(NOTIFICATIONS)
        .find(doc! { "user": id }, FindOptions::builder().sort(doc! { "createdAt": 1 }).build())
        .await?
        .try_collect::<Vec<NotificationDocument>>()
        .await?
        .into_iter()
        .map(|n| n.id)
        .collect();

    let user = users(db)
        .find_one_and_update(
            doc! { "_id": id },
            doc! { "$set": { "vehicles": owned, "notifications": notifications } },
            return_after(),
        )
        .await?;
    Ok(user)
}

//
// VEHICLE actions
//

/// Fields needed to register a vehicle, already validated
#[derive(Debug, Clone)]
pub struct NewVehicle {
    pub registration_number: String,
    pub registration_year: i32,
    pub vehicle_type: VehicleType,
    pub make: String,
    pub model: String,
    pub color: String,
}

///
/// Registers a vehicle for `owner` and issues its code
///
/// Order: owner check, code reservation, vehicle insert, owner
/// back-reference. A failure at any step undoes the earlier ones.
///
pub async fn insert_vehicle(db: &Database, owner: ObjectId, vehicle: NewVehicle) -> OdmResult<(VehicleDocument, IssuedCode)> {
    match get_user_by_id(db, owner).await? {
        Some(user) if user.is_active => {},
        _ => return Err(OdmError::Invalid("Vehicle owner must be an active user".into())),
    }

    let registration_number = vehicle.registration_number.trim().to_uppercase();
    if vehicles(db).find_one(doc! { "registrationNumber": &registration_number }, None).await?.is_some() {
        return Err(OdmError::Duplicate("registrationNumber".into()));
    }

    let id = ObjectId::new();
    let subject = Subject::Vehicle {
        registration_number: registration_number.clone(),
        vehicle_type: vehicle.vehicle_type,
    };
    let issued = qr_index::reserve_code(db, &subject, owner, Some(id)).await?;
    let created = now();
    let document = VehicleDocument {
        id,
        owner,
        registration_number,
        registration_year: vehicle.registration_year,
        vehicle_type: vehicle.vehicle_type,
        make: vehicle.make,
        model: vehicle.model,
        color: vehicle.color,
        is_active: true,
        qr_code: issued.payload.encode(),
        qr_id: issued.opaque_id.clone(),
        tickets: vec![],
        created_at: created,
        updated_at: created,
    };

    if let Err(e) = vehicles(db).insert_one(&document, None).await {
        release_reserved(db, &issued.opaque_id).await;
        return Err(e.into());
    }

    let linked = update_user_refs(db, owner, "vehicles", Action::Append, id).await;
    if !matches!(linked, Ok(true)) {
        warn!("Rolling back vehicle {} of {}: owner back-reference failed", id, owner);
        if let Err(e) = vehicles(db).delete_one(doc! { "_id": id }, None).await {
            warn!("Rollback could not remove vehicle {}: {}", id, e);
        }
        release_reserved(db, &issued.opaque_id).await;
        return match linked {
            Err(e) => Err(e.into()),
            _ => Err(OdmError::NotFound("User")),
        };
    }

    Ok((document, issued))
}

/// An active vehicle, only if `owner` owns it
pub async fn get_owned_vehicle(db: &Database, owner: ObjectId, id: ObjectId) -> mongodb::error::Result<Option<VehicleDocument>> {
    vehicles(db).find_one(doc! { "_id": id, "owner": owner, "isActive": true }, None).await
}

/// All active vehicles of a user
pub async fn get_vehicles_for_user(db: &Database, owner: ObjectId) -> mongodb::error::Result<Vec<VehicleDocument>> {
    let find_options = FindOptions::builder().sort(doc! { "createdAt": -1 }).build();
    vehicles(db)
        .find(doc! { "owner": owner, "isActive": true }, find_options)
        .await?
        .try_collect()
        .await
}

/// Get vehicle by id, active or not
pub async fn get_vehicle(db: &Database, id: ObjectId) -> mongodb::error::Result<Option<VehicleDocument>> {
    vehicles(db).find_one(doc! { "_id": id }, None).await
}

/// Ids to registration numbers, for populating references
pub async fn registration_numbers(db: &Database, ids: &[ObjectId]) -> mongodb::error::Result<Vec<(ObjectId, String)>> {
    if ids.is_empty() {
        return Ok(vec![]);
    }
    let found: Vec<VehicleDocument> = vehicles(db)
        .find(doc! { "_id": { "$in": ids.to_vec() } }, None)
        .await?
        .try_collect()
        .await?;
    Ok(found.into_iter().map(|v| (v.id, v.registration_number)).collect())
}

/// Updates the one mutable attribute (color)
pub async fn update_vehicle_color(
    db: &Database,
    owner: ObjectId,
    id: ObjectId,
    color: Option<String>,
) -> mongodb::error::Result<Option<VehicleDocument>> {
    let mut set = doc! { "updatedAt": now() };
    if let Some(color) = color {
        set.insert("color", color);
    }
    vehicles(db)
        .find_one_and_update(
            doc! { "_id": id, "owner": owner, "isActive": true },
            doc! { "$set": set },
            return_after(),
        )
        .await
}

///
/// Soft deletes a vehicle
///
/// Clears the active flag, drops the owner's back-reference and releases
/// the vehicle's code. Returns `None` when the owner has no such vehicle.
///
pub async fn deactivate_vehicle(db: &Database, owner: ObjectId, id: ObjectId) -> mongodb::error::Result<Option<VehicleDocument>> {
    let vehicle = vehicles(db)
        .find_one_and_update(
            doc! { "_id": id, "owner": owner, "isActive": true },
            doc! { "$set": { "isActive": false, "updatedAt": now() } },
            return_after(),
        )
        .await?;

    let vehicle = match vehicle {
        Some(value) => value,
        None => return Ok(None),
    };

    if let Err(e) = update_user_refs(db, owner, "vehicles", Action::Delete, id).await {
        warn!("Vehicle {} deactivated but owner back-reference kept: {}", id, e);
    }
    qr_index::release_code(db, &vehicle.qr_id).await?;

    Ok(Some(vehicle))
}

/// Records a ticket on the vehicle it is about
pub async fn add_vehicle_ticket(db: &Database, vehicle: ObjectId, ticket: ObjectId) -> mongodb::error::Result<()> {
    vehicles(db)
        .update_one(doc! { "_id": vehicle }, doc! { "$addToSet": { "tickets": ticket } }, None)
        .await?;
    Ok(())
}
