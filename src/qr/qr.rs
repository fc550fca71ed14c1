//!
//! Documentation of the QR module.
//! Issues the identity carried by a printed QR code: an unguessable id,
//! a 3-digit code that can be typed on a phone keypad, and the payload
//! that ties both to a user or a vehicle.
//!

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use qrcode::QrCode;
use qrcode::render::svg;
use rand::{Rng, RngCore};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ODM::models::VehicleType;

/// Lowest dialable short code
pub const MIN_CODE: u16 = 100;
/// Highest dialable short code
pub const MAX_CODE: u16 = 999;
/// Number of short codes in existence
pub const CODE_SPACE: usize = (MAX_CODE - MIN_CODE + 1) as usize;

const OPAQUE_ID_BYTES: usize = 32;

/// A 3-digit keypad code, always within `100..=999`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShortCode(u16);

impl ShortCode {
    pub fn new(value: u16) -> Option<ShortCode> {
        (MIN_CODE..=MAX_CODE).contains(&value).then_some(ShortCode(value))
    }

    /// Draws a code uniformly from the whole code space
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> ShortCode {
        ShortCode(rng.gen_range(MIN_CODE..=MAX_CODE))
    }

    /// Parses exactly three ASCII digits, the shape a keypad produces
    pub fn parse(digits: &str) -> Option<ShortCode> {
        let digits = digits.trim();
        if digits.len() != 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse::<u16>().ok().and_then(ShortCode::new)
    }

    pub fn value(self) -> u16 {
        self.0
    }

    /// Every code in ascending order
    pub fn all() -> impl Iterator<Item = ShortCode> {
        (MIN_CODE..=MAX_CODE).map(ShortCode)
    }
}

impl fmt::Display for ShortCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Stored and embedded as a string, since that is what the keypad sends back
impl Serialize for ShortCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ShortCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ShortCode::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid short code {:?}", raw)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserCode {
    pub id: String,
    pub code: ShortCode,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct VehicleIdentity {
    pub id: String,
    pub code: ShortCode,
    pub timestamp: i64,
    pub registration_number: String,
    pub vehicle_type: VehicleType,
}

/// The record embedded in a QR code.
///
/// The JSON carries no tag, the two schemas are told apart by their
/// fields. Vehicle is listed first because it is the wider one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QrPayload {
    Vehicle(VehicleIdentity),
    User(UserCode),
}

impl QrPayload {
    pub fn id(&self) -> &str {
        match self {
            QrPayload::Vehicle(v) => &v.id,
            QrPayload::User(u) => &u.id,
        }
    }

    pub fn code(&self) -> ShortCode {
        match self {
            QrPayload::Vehicle(v) => v.code,
            QrPayload::User(u) => u.code,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            QrPayload::Vehicle(v) => v.timestamp,
            QrPayload::User(u) => u.timestamp,
        }
    }

    pub fn encode(&self) -> String {
        // plain structs of strings and integers always serialize
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Decodes a stored or scanned payload. Anything that is not exactly
    /// one of the two schemas is a non-match.
    pub fn decode(raw: &str) -> Option<QrPayload> {
        serde_json::from_str(raw.trim()).ok()
    }
}

/// What a code is being issued for
#[derive(Debug, Clone)]
pub enum Subject {
    User,
    Vehicle {
        registration_number: String,
        vehicle_type: VehicleType,
    },
}

/// The result of one issuance: id, code, payload and a printable image
#[derive(Debug, Clone)]
pub struct IssuedCode {
    pub opaque_id: String,
    pub short_code: ShortCode,
    pub payload: QrPayload,
    pub image: String,
}

/// 64 hex characters from the OS random source
pub fn opaque_id() -> String {
    let mut bytes = [0u8; OPAQUE_ID_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Builds the payload for `subject` around an already chosen code
pub fn build_payload(subject: &Subject, opaque_id: String, code: ShortCode, timestamp: i64) -> QrPayload {
    match subject {
        Subject::User => QrPayload::User(UserCode { id: opaque_id, code, timestamp }),
        Subject::Vehicle { registration_number, vehicle_type } => QrPayload::Vehicle(VehicleIdentity {
            id: opaque_id,
            code,
            timestamp,
            registration_number: registration_number.clone(),
            vehicle_type: *vehicle_type,
        }),
    }
}

///
/// Issues a fresh identity for `subject`
///
/// The code is drawn at random; making it unique is the caller's job
/// (see `ODM::qr_index::reserve_code`), which will call again with
/// `with_code` when the draw collides.
///
pub fn issue_code<R: Rng + ?Sized>(subject: &Subject, rng: &mut R) -> Result<IssuedCode, qrcode::types::QrError> {
    with_code(subject, ShortCode::random(rng))
}

/// Same as `issue_code` with a code picked by the caller
pub fn with_code(subject: &Subject, short_code: ShortCode) -> Result<IssuedCode, qrcode::types::QrError> {
    let opaque_id = opaque_id();
    let timestamp = chrono::Utc::now().timestamp_millis();
    let payload = build_payload(subject, opaque_id.clone(), short_code, timestamp);
    let image = render_image(&payload.encode())?;

    Ok(IssuedCode { opaque_id, short_code, payload, image })
}

///
/// Renders `data` as a QR code inside a `data:image/svg+xml;base64,` URL,
/// ready for an `<img src>`
///
pub fn render_image(data: &str) -> Result<String, qrcode::types::QrError> {
    let code = QrCode::new(data.as_bytes())?;
    let image = code
        .render::<svg::Color>()
        .min_dimensions(256, 256)
        .quiet_zone(true)
        .build();

    Ok(format!("data:image/svg+xml;base64,{}", STANDARD.encode(image)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn issued_codes_stay_in_the_dialable_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..2000 {
            let code = ShortCode::random(&mut rng).value();
            assert!((100..=999).contains(&code), "{} escaped the range", code);
        }
    }

    #[test]
    fn user_payload_decodes_to_the_same_id_code_and_timestamp() {
        let mut rng = StdRng::seed_from_u64(1);
        let issued = issue_code(&Subject::User, &mut rng).unwrap();
        let decoded = QrPayload::decode(&issued.payload.encode()).unwrap();

        assert_eq!(decoded.id(), issued.opaque_id);
        assert_eq!(decoded.code(), issued.short_code);
        assert_eq!(decoded.timestamp(), issued.payload.timestamp());
        assert!(matches!(decoded, QrPayload::User(_)));
        assert_eq!(issued.opaque_id.len(), 64);
    }

    #[test]
    fn vehicle_payload_keeps_its_identity_fields() {
        let subject = Subject::Vehicle {
            registration_number: "MH12AB1234".into(),
            vehicle_type: VehicleType::FourWheeler,
        };
        let issued = with_code(&subject, ShortCode::new(482).unwrap()).unwrap();
        let raw = issued.payload.encode();

        assert!(raw.contains("\"code\":\"482\""));
        assert!(raw.contains("\"registrationNumber\":\"MH12AB1234\""));
        assert!(raw.contains("\"vehicleType\":\"4-wheeler\""));
        match QrPayload::decode(&raw) {
            Some(QrPayload::Vehicle(v)) => assert_eq!(v.registration_number, "MH12AB1234"),
            other => panic!("expected a vehicle payload, got {:?}", other),
        }
    }

    #[test]
    fn payload_written_by_hand_uses_the_stored_wire_shape() {
        let raw = r#"{"id":"abc","code":"123","timestamp":1700000000000}"#;
        let payload = QrPayload::decode(raw).unwrap();
        assert_eq!(payload.code().value(), 123);
        assert_eq!(payload.timestamp(), 1_700_000_000_000);
    }

    #[test]
    fn schema_mismatches_fail_closed() {
        for raw in [
            "",
            "not json",
            "data:image/png;base64,AAAA",
            r#"{"id":"abc","code":"12","timestamp":1}"#,
            r#"{"id":"abc","code":"1000","timestamp":1}"#,
            r#"{"id":"abc","code":482,"timestamp":1}"#,
            r#"{"id":"abc","timestamp":1}"#,
            r#"{"id":"abc","code":"482","timestamp":1,"extra":true}"#,
            r#"{"id":"abc","code":"482","timestamp":1,"registrationNumber":"X","vehicleType":"tank"}"#,
        ] {
            assert!(QrPayload::decode(raw).is_none(), "{:?} should not decode", raw);
        }
    }

    #[test]
    fn keypad_digits_parse_strictly() {
        assert_eq!(ShortCode::parse("482").map(ShortCode::value), Some(482));
        assert_eq!(ShortCode::parse(" 100 ").map(ShortCode::value), Some(100));
        assert!(ShortCode::parse("099").is_none());
        assert!(ShortCode::parse("48").is_none());
        assert!(ShortCode::parse("4821").is_none());
        assert!(ShortCode::parse("+12").is_none());
        assert_eq!(ShortCode::all().count(), CODE_SPACE);
    }

    #[test]
    fn image_is_an_svg_data_url() {
        let image = render_image(r#"{"id":"x","code":"100","timestamp":0}"#).unwrap();
        assert!(image.starts_with("data:image/svg+xml;base64,"));
        let encoded = image.trim_start_matches("data:image/svg+xml;base64,");
        let svg = String::from_utf8(STANDARD.decode(encoded).unwrap()).unwrap();
        assert!(svg.contains("<svg"));
    }
}
