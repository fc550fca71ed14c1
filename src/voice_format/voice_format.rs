//!
//! Documentation of the voice format module.
//! Renders the XML documents the telephony provider executes.
//!
//! A document is a list of verbs; the template below turns each one into
//! its element. The template is compiled once at launch and managed by
//! Rocket.
//!

use serde::Serialize;
use tera::{Context, Tera};

pub const WELCOME_URL: &str = "/ivr/welcome";
pub const MENU_URL: &str = "/ivr/menu";
pub const CODE_DIGITS: u8 = 3;

pub const WELCOME_PROMPT: &str = "Welcome to ParkPal. Please enter your 3 digit code.";
pub const CONNECTING: &str = "Please hold while we connect your call.";
pub const INVALID_CODE: &str = "Invalid code entered.";
pub const FAILURE: &str = "Sorry, we encountered an error. Please try again later.";

const TEMPLATE_NAME: &str = "voice.xml";

// The voice document, one element per verb
const VOICE_TEMPLATE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Response>
{%- for verb in verbs %}
{%- if verb.verb == "say" %}<Say>{{ verb.text }}</Say>
{%- elif verb.verb == "gather" %}<Gather action="{{ verb.action | safe }}" numDigits="{{ verb.num_digits }}" method="POST"><Say>{{ verb.prompt }}</Say></Gather>
{%- elif verb.verb == "dial" %}<Dial>{{ verb.number }}</Dial>
{%- elif verb.verb == "redirect" %}<Redirect method="POST">{{ verb.url | safe }}</Redirect>
{%- endif %}
{%- endfor %}</Response>
"#;

/// Served when the template itself cannot render
pub const FALLBACK: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Response><Say>Sorry, we encountered an error. Please try again later.</Say><Redirect method=\"POST\">/ivr/welcome</Redirect></Response>\n";

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(tag = "verb", rename_all = "lowercase")]
pub enum Verb {
    Say { text: String },
    Gather { action: String, num_digits: u8, prompt: String },
    Dial { number: String },
    Redirect { url: String },
}

fn say(text: &str) -> Verb {
    Verb::Say { text: text.to_string() }
}

fn back_to_welcome() -> Verb {
    Verb::Redirect { url: WELCOME_URL.to_string() }
}

/// Prompt for the code; no input falls through to a redirect that asks again
pub fn welcome() -> Vec<Verb> {
    vec![
        Verb::Gather { action: MENU_URL.to_string(), num_digits: CODE_DIGITS, prompt: WELCOME_PROMPT.to_string() },
        back_to_welcome(),
    ]
}

/// Bridge the caller to `number`
pub fn connect(number: &str) -> Vec<Verb> {
    vec![say(CONNECTING), Verb::Dial { number: normalize_dial_number(number) }]
}

pub fn invalid() -> Vec<Verb> {
    vec![say(INVALID_CODE), back_to_welcome()]
}

pub fn failure() -> Vec<Verb> {
    vec![say(FAILURE), back_to_welcome()]
}

/// Dialing needs the international `+` prefix; prepended when missing
pub fn normalize_dial_number(number: &str) -> String {
    let trimmed = number.trim();
    if trimmed.starts_with('+') {
        trimmed.to_string()
    } else {
        format!("+{}", trimmed)
    }
}

/// Compiled voice template, kept in Rocket's managed state
pub struct VoiceFormat {
    tera: Tera,
}

impl VoiceFormat {
    pub fn new() -> Result<VoiceFormat, tera::Error> {
        let mut tera = Tera::default();
        // `.xml` templates are autoescaped, so spoken text is safe to embed
        tera.add_raw_template(TEMPLATE_NAME, VOICE_TEMPLATE)?;
        Ok(VoiceFormat { tera })
    }

    pub fn render(&self, verbs: &[Verb]) -> Result<String, tera::Error> {
        let mut ctx = Context::new();
        ctx.insert("verbs", verbs);
        self.tera.render(TEMPLATE_NAME, &ctx)
    }

    /// Like `render`, degrading to `FALLBACK` instead of failing
    pub fn render_or_fallback(&self, verbs: &[Verb]) -> String {
        match self.render(verbs) {
            Ok(value) => value,
            Err(e) => {
                log::error!("Voice template failed to render: {}", e);
                FALLBACK.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(verbs: &[Verb]) -> String {
        VoiceFormat::new().unwrap().render(verbs).unwrap()
    }

    #[test]
    fn welcome_gathers_three_digits() {
        let xml = render(&welcome());
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("<Gather action=\"/ivr/menu\" numDigits=\"3\" method=\"POST\">"));
        assert!(xml.contains(WELCOME_PROMPT));
        assert!(xml.contains("<Redirect method=\"POST\">/ivr/welcome</Redirect>"));
        assert!(xml.trim_end().ends_with("</Response>"));
    }

    #[test]
    fn connect_dials_the_normalized_number() {
        let xml = render(&connect("9876543210"));
        assert!(xml.contains(&format!("<Say>{}</Say>", CONNECTING)));
        assert!(xml.contains("<Dial>+9876543210</Dial>"));
        assert!(!xml.contains("<Redirect"));
    }

    #[test]
    fn invalid_code_goes_back_to_welcome_without_dialing() {
        let xml = render(&invalid());
        assert!(xml.contains("<Say>Invalid code entered.</Say>"));
        assert!(xml.contains("/ivr/welcome</Redirect>"));
        assert!(!xml.contains("<Dial>"));
    }

    #[test]
    fn spoken_text_is_escaped() {
        let xml = render(&[Verb::Say { text: "<Dial>+1</Dial> & more".into() }]);
        assert!(!xml.contains("<Dial>"));
        assert!(xml.contains("&lt;Dial&gt;"));
        assert!(xml.contains("&amp; more"));
    }

    #[test]
    fn fallback_matches_the_rendered_failure() {
        assert_eq!(render(&failure()).trim_end(), FALLBACK.trim_end());
    }

    #[test]
    fn dial_numbers_get_one_plus() {
        assert_eq!(normalize_dial_number("9876543210"), "+9876543210");
        assert_eq!(normalize_dial_number("+919876543210"), "+919876543210");
        assert_eq!(normalize_dial_number(" 919876543210 "), "+919876543210");
    }
}
