#![allow(unused_imports)]
pub mod api_error;
pub mod routes_utils;
pub mod cors;
pub mod auth_routes;
pub mod user_routes;
pub mod vehicle_routes;
pub mod notification_routes;
pub mod ticket_routes;
pub mod admin_routes;
pub mod ivr_routes;

use super::ODM;
use super::auth;
use super::config;
use super::qr;
use super::voice_format;

use rocket::serde::json::{Json, Error as JsonError, Value, json};
use rocket::http::Status;
use rocket::{Catcher, Request, Route, State};

pub use api_error::*;
pub use routes_utils::*;
pub use cors::Cors;

use log::{debug, error, info, trace, warn};

/// Every route group with its mount point
pub fn routes() -> Vec<(&'static str, Vec<Route>)> {
    vec![
        ("/", routes![cors::preflight]),
        ("/api/auth", auth_routes::routes()),
        ("/api/users", user_routes::routes()),
        ("/api/vehicles", vehicle_routes::routes()),
        ("/api/notifications", notification_routes::routes()),
        ("/api/tickets", ticket_routes::routes()),
        ("/api/admin", admin_routes::routes()),
        ("/ivr", ivr_routes::routes()),
    ]
}

pub fn catchers() -> Vec<Catcher> {
    catchers![bad_request, unauthorized, forbidden, not_found, unprocessable, internal_error, default_catcher]
}

/*
JSON catchers, so no failure leaves as an HTML page
*/
#[catch(400)]
fn bad_request(request: &Request) -> Json<ErrorBody> {
    Json(guard_failure(request).unwrap_or_else(|| ErrorBody::coded("Bad request", "VALIDATION_ERROR")))
}

#[catch(401)]
fn unauthorized(request: &Request) -> Json<ErrorBody> {
    Json(guard_failure(request).unwrap_or_else(|| ErrorBody::message("Authentication required")))
}

#[catch(403)]
fn forbidden(request: &Request) -> Json<ErrorBody> {
    Json(guard_failure(request).unwrap_or_else(|| ErrorBody::message("Forbidden")))
}

#[catch(404)]
fn not_found(request: &Request) -> Json<ErrorBody> {
    Json(ErrorBody::message(format!("Route {} {} not found", request.method(), request.uri().path())))
}

#[catch(422)]
fn unprocessable(_request: &Request) -> Json<ErrorBody> {
    Json(ErrorBody::coded("Request body could not be processed", "VALIDATION_ERROR"))
}

#[catch(500)]
fn internal_error(request: &Request) -> Json<ErrorBody> {
    Json(guard_failure(request).unwrap_or_else(|| ErrorBody::coded("Something went wrong!", "INTERNAL_SERVER_ERROR")))
}

#[catch(default)]
fn default_catcher(status: Status, request: &Request) -> Json<ErrorBody> {
    warn!("Server>>Client:\tUnhandled status {} for {}", status, request.uri());
    Json(ErrorBody::message(status.reason().unwrap_or("Unknown error")))
}
