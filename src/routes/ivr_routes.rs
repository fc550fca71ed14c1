use super::*;
use log::{debug, error, info, warn};

use mongodb::Database;
use rocket::form::Form;
use rocket::http::ContentType;
use ODM::odm;
use ODM::qr_index;
use qr::qr::ShortCode;
use voice_format::voice_format::{self as voice, VoiceFormat, Verb};

pub fn routes() -> Vec<Route> {
    routes![welcome, menu]
}

/// What the telephony provider posts after a gather
#[derive(FromForm, Debug, Default)]
pub struct MenuForm {
    #[field(name = "Digits")]
    pub digits: Option<String>,
}

///
/// Picks the document for a caller who dialed `digits`
///
/// Anything that is not a 3 digit code, or a code nobody holds, is an
/// invalid code. Lookup failures get the generic failure document.
///
pub async fn menu_verbs(db: &Database, digits: Option<&str>) -> Vec<Verb> {
    let code = match digits.and_then(ShortCode::parse) {
        Some(code) => code,
        None => return voice::invalid(),
    };
    let identity = match qr_index::resolve_code(db, code).await {
        Ok(Some(identity)) => identity,
        Ok(None) => return voice::invalid(),
        Err(e) => {
            error!("Short code {} lookup failed: {}", code.value(), e);
            return voice::failure();
        }
    };
    match odm::get_user_by_id(db, identity.owner()).await {
        Ok(Some(user)) if user.is_active && !user.mobile_number.trim().is_empty() => {
            info!("Server>>Client:\tBridging code {} to {}", code.value(), &user.email);
            voice::connect(&user.mobile_number)
        }
        Ok(_) => voice::invalid(),
        Err(e) => {
            error!("Owner lookup for short code {} failed: {}", code.value(), e);
            voice::failure()
        }
    }
}

#[post("/welcome")]
fn welcome(voice_format: &State<VoiceFormat>) -> (ContentType, String) {
    (ContentType::XML, voice_format.render_or_fallback(&voice::welcome()))
}

/// Bodies the provider sends are not always complete; a missing form is no digits
#[post("/menu", data = "<form>")]
async fn menu(db: &State<MongoState>, voice_format: &State<VoiceFormat>, form: Option<Form<MenuForm>>) -> (ContentType, String) {
    let digits = form.and_then(|form| form.into_inner().digits);
    debug!("Client>>Server:\tIVR digits {:?}", digits);
    let verbs = menu_verbs(&db.db, digits.as_deref()).await;
    (ContentType::XML, voice_format.render_or_fallback(&verbs))
}
