//!
//! Documentation of the QR module.
//! Issuance and decoding of QR identities.
//!

pub mod qr;
