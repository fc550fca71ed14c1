//!
//! Documentation of the CORS module.
//! Cross-origin headers on every response, and a catch-all preflight route.
//!

use super::*;
use rocket::fairing::{Fairing, Info, Kind};
use rocket::http::Header;
use rocket::{Request, Response};

pub const ALLOWED_METHODS: &str = "GET, POST, PUT, PATCH, DELETE, OPTIONS";
pub const ALLOWED_HEADERS: &str = "Authorization, Content-Type";
/// Preflight cache, one hour
pub const MAX_AGE_SECS: u32 = 60 * 60;

pub struct Cors {
    origin: String,
}

impl Cors {
    pub fn new<S: Into<String>>(origin: S) -> Cors {
        Cors { origin: origin.into() }
    }
}

#[rocket::async_trait]
impl Fairing for Cors {
    fn info(&self) -> Info {
        Info { name: "CORS headers", kind: Kind::Response }
    }

    async fn on_response<'r>(&self, _request: &'r Request<'_>, response: &mut Response<'r>) {
        response.set_header(Header::new("Access-Control-Allow-Origin", self.origin.clone()));
        response.set_header(Header::new("Access-Control-Allow-Methods", ALLOWED_METHODS));
        response.set_header(Header::new("Access-Control-Allow-Headers", ALLOWED_HEADERS));
        response.set_header(Header::new("Access-Control-Max-Age", MAX_AGE_SECS.to_string()));
        if self.origin != "*" {
            response.set_header(Header::new("Vary", "Origin"));
        }
    }
}

/// Answers every preflight; the fairing adds the headers
#[options("/<_..>")]
pub fn preflight() -> Status {
    Status::NoContent
}
