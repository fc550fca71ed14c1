//!
//! Documentation of the voice_format module.
//! Voice-control documents for the telephony webhooks.
//!

pub mod voice_format;
