//! Carrier webhook helpers: signature validation and TwiML generation.
//!
//! The carrier signs each webhook with base64(HMAC-SHA1(url + params
//! concatenated in alphabetical key order, auth token)). When no auth token
//! is configured the check is skipped with a warning so local development
//! works without carrier credentials.

use std::collections::BTreeMap;

use base64::prelude::{Engine as _, BASE64_STANDARD};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use tracing::warn;

type HmacSha1 = Hmac<Sha1>;

pub struct SignatureValidator {
    auth_token: Option<String>,
}

impl SignatureValidator {
    pub fn new(auth_token: &str) -> Self {
        Self {
            auth_token: (!auth_token.is_empty()).then(|| auth_token.to_owned()),
        }
    }

    /// `params` must iterate in alphabetical key order (BTreeMap does).
    pub fn validate(
        &self,
        url: &str,
        params: &BTreeMap<String, String>,
        signature: Option<&str>,
    ) -> bool {
        let Some(token) = &self.auth_token else {
            warn!("twilio signature validation skipped: no auth token configured");
            return true;
        };
        let Some(signature) = signature else {
            return false;
        };

        let mut signed = url.to_owned();
        for (key, value) in params {
            signed.push_str(key);
            signed.push_str(value);
        }
        let Ok(mut mac) = HmacSha1::new_from_slice(token.as_bytes()) else {
            return false;
        };
        mac.update(signed.as_bytes());
        let expected = BASE64_STANDARD.encode(mac.finalize().into_bytes());
        expected == signature
    }
}

/// Call-control markup instructing the carrier to open a media stream
/// against the session WebSocket.
pub fn build_stream_twiml(stream_url: &str, session_id: &str) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            "<Response>",
            r#"<Say voice="alice">Connecting you to the call assistant.</Say>"#,
            r#"<Connect><Stream url="{url}" name="session-{id}"/></Connect>"#,
            "</Response>"
        ),
        url = xml_escape(stream_url),
        id = xml_escape(session_id),
    )
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    /// Compute a signature the way the carrier does, for round-trip tests.
    fn sign(token: &str, url: &str, params: &BTreeMap<String, String>) -> String {
        let mut signed = url.to_owned();
        for (key, value) in params {
            signed.push_str(key);
            signed.push_str(value);
        }
        let mut mac = HmacSha1::new_from_slice(token.as_bytes()).expect("hmac key");
        mac.update(signed.as_bytes());
        BASE64_STANDARD.encode(mac.finalize().into_bytes())
    }

    #[test]
    fn valid_signature_is_accepted_and_tampered_rejected() {
        let token = "secret-token";
        let url = "https://example.test/twilio/voice/inbound";
        let form = params(&[("CallSid", "CA123"), ("From", "+14155550100")]);
        let signature = sign(token, url, &form);

        let validator = SignatureValidator::new(token);
        assert!(validator.validate(url, &form, Some(&signature)));
        assert!(!validator.validate(url, &form, Some("bogus")));
        assert!(!validator.validate(url, &form, None));

        let mut tampered = form.clone();
        tampered.insert("From".to_owned(), "+19995550000".to_owned());
        assert!(!validator.validate(url, &tampered, Some(&signature)));
    }

    #[test]
    fn missing_auth_token_skips_validation() {
        let validator = SignatureValidator::new("");
        assert!(validator.validate("https://example.test/", &BTreeMap::new(), None));
    }

    #[test]
    fn twiml_escapes_the_stream_url() {
        let twiml = build_stream_twiml(
            "wss://example.test/ws/session/abc?source=twilio&session_id=abc",
            "abc",
        );
        assert!(twiml.contains("source=twilio&amp;session_id=abc"));
        assert!(twiml.contains(r#"name="session-abc""#));
        assert!(twiml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
    }
}
