//!
//! #  ParkPal - reach a vehicle's owner without knowing who they are
//!
//! ParkPal is a JSON backend for a parking helper app.
//!
//! Every account and every registered vehicle carries a QR code and a
//! 3 digit short code. Whoever finds a blocking or damaged vehicle can:
//!
//! * Scan its code, which notifies the owner
//! * Dial the short code, which bridges the call to the owner's phone
//!
//! Owners manage their vehicles and notifications, raise support tickets,
//! and admins look after users, tickets and statistics.
//!

#![allow(dead_code)]
#![allow(unused_variables)]
#![allow(unused_imports)]
#![allow(non_snake_case)]
#[macro_use] extern crate rocket;

mod routes;
mod ODM;
mod config;
mod qr;
mod auth;
mod voice_format;

use config::config::ParkpalConfig;
use mongodb::Database;
use routes::{Config, Cors, MongoState};
use rocket::{Build, Rocket};
use voice_format::voice_format::VoiceFormat;
use log::{debug, error, info, trace, warn};


/// Assembles the server: mounts, catchers, managed state and CORS
pub fn build_rocket(config: ParkpalConfig, db: Database, voice: VoiceFormat) -> Rocket<Build> {
    let figment = rocket::Config::figment()
        .merge(("address", config.address.clone()))
        .merge(("port", config.port));

    let mut lift = rocket::custom(figment);
    for (base, routes) in routes::routes() {
        lift = lift.mount(base, routes);
    }

    lift.register("/", routes::catchers())
        .attach(Cors::new(config.cors_origin.clone()))
        .manage(MongoState { db })
        .manage(voice)
        .manage(Config { config })
}

/// The main functions, runs w/ cargo run
#[rocket::main]
async fn main() -> Result<(), ()> {
    let config = match config::config::init().await {
        Err(e) => {
            println!("{}", format!("CONFIG failed to launch {}", e));
            return Ok(());
        },
        Ok(value) => value,
    };
    if let Err(e) = config::config::setup_logger(&config).await {
        println!("LOGGER failed to start {}", e);
    }
    if config.jwt_secret.is_none() {
        warn!("No JWT secret configured, registration and login will fail");
    }

    let db = match ODM::odm::init(&config).await {
        Err(value) => return Ok(()),
        Ok(value) => value,
    };
    match ODM::qr_index::backfill(&db).await {
        Ok(0) => debug!("Every record already holds a short code"),
        Ok(count) => info!("Issued short codes to {} older records", count),
        Err(e) => warn!("Short code backfill failed, older records stay unreachable by phone: {}", e),
    }
    let voice = match VoiceFormat::new() {
        Err(e) => {
            error!("Voice templates failed to load {}", e);
            return Ok(());
        },
        Ok(value) => value,
    };
    warn!("PARKPAL IS LAUNCHING");

    let lift = build_rocket(config, db, voice).launch().await;

    warn!("PARKPAL OVER");
    match lift {
        Ok(value) => return Ok(()),
        Err(value) => {
            error!("Rocket could not run, error {}", value);
            return Ok(());
        }
    }
}
