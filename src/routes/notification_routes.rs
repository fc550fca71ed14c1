use super::*;
use log::{debug, error, info, warn};

use bson::doc;
use rocket::serde::Deserialize;
use validator::Validate;
use ODM::models::*;
use ODM::notifications::{self, NotificationContext};
use ODM::odm;
use ODM::odm_utils::{doc_to_notification, Page};
use ODM::qr_index;

pub fn routes() -> Vec<Route> {
    routes![get_notifications, mark_read, mark_all_read, scan, delete_notification]
}

/// Where a scan happened; coordinates come in pairs
#[derive(Deserialize, Validate, Debug, Default, Clone, PartialEq)]
#[serde(crate = "rocket::serde")]
pub struct ScanBody {
    #[validate(range(min = -90.0, max = 90.0, message = "latitude must be between -90 and 90"))]
    pub latitude: Option<f64>,
    #[validate(range(min = -180.0, max = 180.0, message = "longitude must be between -180 and 180"))]
    pub longitude: Option<f64>,
    pub address: Option<String>,
}

///
/// Turns a scan body into a stored location
///
/// # Output
///
/// * Err(_) - half a coordinate pair, or a coordinate out of range
/// * Ok(None) - no coordinates given
/// * Ok(Some(location)) - a GeoJSON point
///
pub fn scan_location(body: ScanBody) -> ApiResult<Option<ScannedLocation>> {
    let body = validated(body, "Invalid scan location", &["latitude", "longitude"])?;
    let address = non_empty(body.address);
    match (body.latitude, body.longitude) {
        (None, None) => Ok(None),
        (Some(latitude), Some(longitude)) => Ok(Some(ScannedLocation::point(longitude, latitude, address))),
        _ => Err(ApiError::validation("latitude and longitude must be given together")),
    }
}

#[get("/?<page>&<limit>")]
async fn get_notifications(db: &State<MongoState>, user: AuthUser, page: Option<u64>, limit: Option<u64>) -> ApiResult<Json<Value>> {
    let page = Page::new(page, limit);
    let (found, total) = notifications::list_for_user(&db.db, user.id, page).await?;
    Ok(Json(json!({
        "notifications": found,
        "pagination": page.pagination(total),
    })))
}

/// Idempotent
#[patch("/<id>/read")]
async fn mark_read(db: &State<MongoState>, user: AuthUser, id: &str) -> ApiResult<Json<Value>> {
    let id = parse_oid(id, "Notification")?;
    let notification = notifications::mark_read(&db.db, user.id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Notification"))?;
    Ok(Json(json!({
        "message": "Notification marked as read",
        "notification": doc_to_notification(&notification, None, None),
    })))
}

#[post("/read-all")]
async fn mark_all_read(db: &State<MongoState>, user: AuthUser) -> ApiResult<Json<Value>> {
    let updated = notifications::mark_all_read(&db.db, user.id).await?;
    Ok(Json(json!({
        "message": "All notifications marked as read",
        "updated": updated,
    })))
}

///
/// A scan of a vehicle or user code by the caller
///
/// INPUT:  the scanned payload or a 3 digit code, optional location
/// OUTPUT: who was notified; 404 when the code resolves to nobody
///
#[post("/scan/<qr_code>", data = "<body>")]
async fn scan(db: &State<MongoState>, user: AuthUser, qr_code: &str, body: Result<Json<ScanBody>, JsonError<'_>>, route: &Route) -> ApiResult<Json<Value>> {
    let body = match body {
        Ok(value) => value.into_inner(),
        // no body at all is a scan without a location
        Err(JsonError::Parse(raw, _)) if raw.trim().is_empty() => ScanBody::default(),
        Err(e) => return Err(e.into()),
    };
    let location = scan_location(body)?;

    let identity = qr_index::resolve(&db.db, qr_code)
        .await?
        .ok_or_else(|| ApiError::NotFound("Invalid QR code".into()))?;
    let owner = odm::get_user_by_id(&db.db, identity.owner())
        .await?
        .ok_or_else(|| ApiError::NotFound("Invalid QR code".into()))?;

    let (title, message, vehicle, scanned) = match identity {
        Identity::Vehicle { vehicle, .. } => {
            let found = odm::get_vehicle(&db.db, vehicle)
                .await?
                .ok_or_else(|| ApiError::NotFound("Invalid QR code".into()))?;
            (
                "Vehicle QR Code Scanned",
                format!("Your vehicle ({}) was scanned", found.registration_number),
                Some(vehicle),
                json!({
                    "registrationNumber": found.registration_number,
                    "vehicleType": found.vehicle_type,
                    "owner": owner.name,
                }),
            )
        }
        Identity::User { .. } => (
            "QR Code Scanned",
            "Your QR code was scanned".to_string(),
            None,
            json!({ "owner": owner.name }),
        ),
    };

    let context = NotificationContext {
        data: doc! { "scannedAt": bson::DateTime::now() },
        scanned_by: Some(user.id),
        scanned_location: location,
        vehicle,
        ticket: None,
    };
    let notification = notifications::notify(&db.db, owner.id, NotificationType::QrScan, title, &message, context).await?;

    info!("Server>>Client:\tApproving action {} for {}, notified {} ({})", route, &user.user.email, &owner.email, notification.id);
    let subject = if vehicle.is_some() { "vehicle" } else { "user" };
    let mut response = json!({ "message": "QR code scanned successfully" });
    response[subject] = scanned;
    Ok(Json(response))
}

#[delete("/<id>")]
async fn delete_notification(db: &State<MongoState>, user: AuthUser, id: &str) -> ApiResult<Json<Value>> {
    let id = parse_oid(id, "Notification")?;
    notifications::delete_notification(&db.db, user.id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Notification"))?;
    Ok(Json(json!({ "message": "Notification deleted successfully" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locations_need_both_coordinates() {
        assert_eq!(scan_location(ScanBody::default()).unwrap(), None);

        let half = ScanBody { latitude: Some(18.5), ..ScanBody::default() };
        assert!(scan_location(half).is_err());

        let full = ScanBody { latitude: Some(18.5), longitude: Some(73.8), address: Some(" Pune ".into()) };
        let point = scan_location(full).unwrap().unwrap();
        assert_eq!(point.kind, "Point");
        assert_eq!(point.coordinates, vec![73.8, 18.5]);
        assert_eq!(point.address.as_deref(), Some("Pune"));
    }

    #[test]
    fn coordinates_are_range_checked() {
        let body = ScanBody { latitude: Some(91.0), longitude: Some(0.0), address: None };
        assert!(scan_location(body).is_err());
        let body = ScanBody { latitude: Some(0.0), longitude: Some(-180.5), address: None };
        assert!(scan_location(body).is_err());
    }
}
