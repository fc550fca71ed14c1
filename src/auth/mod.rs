//!
//! Documentation of the auth module.
//! Password hashing and bearer tokens.
//!

pub mod auth;
