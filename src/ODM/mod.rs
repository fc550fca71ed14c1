//!
//! Documentation of the ODM module.
//! Contains all the files needed for a MongoDB database connections.
//!

use super::config;
use super::qr;
pub mod odm;
pub mod models;
pub mod odm_utils;
pub mod qr_index;
pub mod notifications;
pub mod tickets;
pub mod stats;

use thiserror::Error;

/// Failures of the multi-step operations (registration, issuance, ...)
#[derive(Debug, Error)]
pub enum OdmError {
    #[error("database error: {0}")]
    Mongo(#[from] mongodb::error::Error),
    /// Caught by a pre-check, before the unique index had to
    #[error("duplicate {0}")]
    Duplicate(String),
    #[error("all short codes are taken")]
    CodeSpaceExhausted,
    #[error("could not render QR image: {0}")]
    Render(#[from] qrcode::types::QrError),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Invalid(String),
}

pub type OdmResult<T> = Result<T, OdmError>;
