use super::*;
use log::{debug, error, info, warn};

use chrono::Datelike;
use rocket::serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};
use ODM::models::*;
use ODM::odm::{self, NewVehicle};
use ODM::odm_utils::doc_to_vehicle;
use ODM::tickets;
use qr::qr::{render_image, QrPayload};

/// Tickets listed with each vehicle on `GET /`
pub const VEHICLE_TICKETS: i64 = 5;
pub const MIN_REGISTRATION_YEAR: i32 = 1900;
const VEHICLE_ORDER: &[&str] = &["registrationNumber", "registrationYear", "vehicleType", "make", "model", "color"];

pub fn routes() -> Vec<Route> {
    routes![post_vehicle, get_vehicles, get_vehicle, get_vehicle_qr, put_vehicle, delete_vehicle]
}

#[derive(Deserialize, Validate, Debug, Default)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub struct VehicleBody {
    #[validate(required(message = "Registration number is required"))]
    pub registration_number: Option<String>,
    #[validate(
        required(message = "Registration year is required"),
        range(min = 1900, message = "Registration year must be 1900 or later")
    )]
    pub registration_year: Option<i32>,
    #[validate(required(message = "Vehicle type is required"), custom(function = "vehicle_type_name"))]
    pub vehicle_type: Option<String>,
    #[validate(required(message = "Make is required"))]
    pub make: Option<String>,
    #[validate(required(message = "Model is required"))]
    pub model: Option<String>,
    #[validate(required(message = "Color is required"))]
    pub color: Option<String>,
}

impl VehicleBody {
    /// Trimmed, blanks as missing, registration number upper case
    fn normalized(self) -> VehicleBody {
        VehicleBody {
            registration_number: non_empty(self.registration_number).map(|r| r.to_uppercase()),
            registration_year: self.registration_year,
            vehicle_type: non_empty(self.vehicle_type),
            make: non_empty(self.make),
            model: non_empty(self.model),
            color: non_empty(self.color),
        }
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(crate = "rocket::serde")]
pub struct ColorBody {
    pub color: Option<String>,
}

/// A vehicle with its tickets
#[derive(Serialize, Debug)]
#[serde(crate = "rocket::serde")]
struct VehicleWithTickets {
    #[serde(flatten)]
    vehicle: Vehicle,
    #[serde(rename = "ticketDetails")]
    ticket_details: Vec<Ticket>,
}

pub fn parse_vehicle_type(value: &str) -> Option<VehicleType> {
    match value.trim().to_lowercase().as_str() {
        "2-wheeler" => Some(VehicleType::TwoWheeler),
        "4-wheeler" => Some(VehicleType::FourWheeler),
        "other" => Some(VehicleType::Other),
        _ => None,
    }
}

/// Rule for `vehicleType`
pub fn vehicle_type_name(value: &str) -> Result<(), ValidationError> {
    if parse_vehicle_type(value).is_some() {
        return Ok(());
    }
    let mut error = ValidationError::new("vehicle_type");
    error.message = Some("Vehicle type must be one of 2-wheeler, 4-wheeler, other".into());
    Err(error)
}

/// Checks a registration body; `this_year` bounds the registration year
pub fn validate_vehicle(body: VehicleBody, this_year: i32) -> ApiResult<NewVehicle> {
    let body = validated(body.normalized(), "All fields are required", VEHICLE_ORDER)?;
    let (registration_number, registration_year, vehicle_type, make, model, color) =
        match (body.registration_number, body.registration_year, body.vehicle_type, body.make, body.model, body.color) {
            (Some(a), Some(b), Some(c), Some(d), Some(e), Some(f)) => (a, b, c, d, e, f),
            _ => return Err(ApiError::validation("All fields are required")),
        };
    let vehicle_type = parse_vehicle_type(&vehicle_type)
        .ok_or_else(|| ApiError::validation("Vehicle type must be one of 2-wheeler, 4-wheeler, other"))?;

    // the upper bound moves with the calendar, so it is checked here
    if registration_year > this_year + 1 {
        return Err(ApiError::validation(format!(
            "Registration year must be between {} and {}",
            MIN_REGISTRATION_YEAR,
            this_year + 1
        )));
    }

    Ok(NewVehicle { registration_number, registration_year, vehicle_type, make, model, color })
}

///
/// Register a vehicle for the caller and issue its code
///
/// INPUT:  registrationNumber, registrationYear, vehicleType, make, model, color
/// OUTPUT: 201 with the vehicle, its payload, short code and QR image
///
#[post("/", data = "<body>")]
async fn post_vehicle(db: &State<MongoState>, user: AuthUser, body: Result<Json<VehicleBody>, JsonError<'_>>, route: &Route) -> ApiResult<(Status, Json<Value>)> {
    let vehicle = validate_vehicle(body?.into_inner(), chrono::Utc::now().year())?;
    let (vehicle, issued) = odm::insert_vehicle(&db.db, user.id, vehicle).await?;

    info!("Server>>Client:\tApproving action {} for {}, vehicle {} got code {}", route, &user.user.email, &vehicle.registration_number, issued.short_code);
    Ok((Status::Created, Json(json!({
        "message": "Vehicle registered successfully",
        "vehicle": doc_to_vehicle(&vehicle),
        "qrCode": vehicle.qr_code,
        "shortCode": issued.short_code,
        "qrImage": issued.image,
    }))))
}

/// Active vehicles of the caller, each with its newest tickets
#[get("/")]
async fn get_vehicles(db: &State<MongoState>, user: AuthUser) -> ApiResult<Json<Value>> {
    let owned = odm::get_vehicles_for_user(&db.db, user.id).await?;
    let mut vehicles = Vec::with_capacity(owned.len());
    for vehicle in &owned {
        let recent = tickets::by_ids(&db.db, &vehicle.tickets, VEHICLE_TICKETS).await?;
        vehicles.push(VehicleWithTickets {
            vehicle: doc_to_vehicle(vehicle),
            ticket_details: tickets::populate(&db.db, &recent).await?,
        });
    }
    Ok(Json(json!({ "vehicles": vehicles })))
}

#[get("/<id>")]
async fn get_vehicle(db: &State<MongoState>, user: AuthUser, id: &str) -> ApiResult<Json<Value>> {
    let id = parse_oid(id, "Vehicle")?;
    let vehicle = odm::get_owned_vehicle(&db.db, user.id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Vehicle"))?;
    // a limit of 0 is no limit
    let all = tickets::by_ids(&db.db, &vehicle.tickets, 0).await?;
    let view = VehicleWithTickets {
        vehicle: doc_to_vehicle(&vehicle),
        ticket_details: tickets::populate(&db.db, &all).await?,
    };
    Ok(Json(json!({ "vehicle": view })))
}

/// The stored payload, its short code and a fresh rendering of it
#[get("/<id>/qr")]
async fn get_vehicle_qr(db: &State<MongoState>, user: AuthUser, id: &str) -> ApiResult<Json<Value>> {
    let id = parse_oid(id, "Vehicle")?;
    let vehicle = odm::get_owned_vehicle(&db.db, user.id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Vehicle"))?;

    let image = render_image(&vehicle.qr_code)
        .map_err(|e| ApiError::Internal(format!("QR rendering failed: {}", e)))?;
    let short_code = QrPayload::decode(&vehicle.qr_code).map(|payload| payload.code());

    Ok(Json(json!({
        "registrationNumber": vehicle.registration_number,
        "qrCode": vehicle.qr_code,
        "shortCode": short_code,
        "qrImage": image,
    })))
}

/// Only the color can change
#[put("/<id>", data = "<body>")]
async fn put_vehicle(db: &State<MongoState>, user: AuthUser, id: &str, body: Result<Json<ColorBody>, JsonError<'_>>, route: &Route) -> ApiResult<Json<Value>> {
    let id = parse_oid(id, "Vehicle")?;
    let color = non_empty(body?.into_inner().color);
    let vehicle = odm::update_vehicle_color(&db.db, user.id, id, color)
        .await?
        .ok_or_else(|| ApiError::not_found("Vehicle"))?;

    info!("Server>>Client:\tApproving action {} for {}", route, &user.user.email);
    Ok(Json(json!({
        "message": "Vehicle updated successfully",
        "vehicle": doc_to_vehicle(&vehicle),
    })))
}

/// Soft delete
#[delete("/<id>")]
async fn delete_vehicle(db: &State<MongoState>, user: AuthUser, id: &str, route: &Route) -> ApiResult<Json<Value>> {
    let id = parse_oid(id, "Vehicle")?;
    odm::deactivate_vehicle(&db.db, user.id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Vehicle"))?;

    info!("Server>>Client:\tApproving action {} for {}", route, &user.user.email);
    Ok(Json(json!({ "message": "Vehicle deleted successfully" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> VehicleBody {
        VehicleBody {
            registration_number: Some(" mh12ab1234 ".into()),
            registration_year: Some(2020),
            vehicle_type: Some("4-wheeler".into()),
            make: Some("Maruti".into()),
            model: Some("Swift".into()),
            color: Some("Red".into()),
        }
    }

    #[test]
    fn registration_numbers_are_uppercased() {
        let vehicle = validate_vehicle(complete(), 2024).unwrap();
        assert_eq!(vehicle.registration_number, "MH12AB1234");
        assert_eq!(vehicle.vehicle_type, VehicleType::FourWheeler);
    }

    #[test]
    fn unknown_types_and_future_years_are_rejected() {
        let body = VehicleBody { vehicle_type: Some("truck".into()), ..complete() };
        assert!(validate_vehicle(body, 2024).is_err());

        let body = VehicleBody { registration_year: Some(2031), ..complete() };
        assert!(validate_vehicle(body, 2024).is_err());

        let body = VehicleBody { registration_year: Some(2025), ..complete() };
        assert!(validate_vehicle(body, 2024).is_ok());

        let body = VehicleBody { registration_year: Some(1899), ..complete() };
        match validate_vehicle(body, 2024) {
            Err(ApiError::Validation { details: Some(details), .. }) => assert!(details.contains_key("registrationYear")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn missing_fields_are_listed() {
        let body = VehicleBody { make: None, color: Some("  ".into()), ..complete() };
        match validate_vehicle(body, 2024) {
            Err(ApiError::Validation { details: Some(details), .. }) => {
                assert!(details.contains_key("make"));
                assert!(details.contains_key("color"));
                assert_eq!(details.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
