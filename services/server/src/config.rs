//! Environment-based configuration.
//!
//! `DATABASE_URL` is the only required variable; everything else has a
//! workable default so a bare development environment comes up. Twilio
//! credentials and the OpenRouter key degrade gracefully when absent:
//! signature validation is skipped with a warning and guidance generation
//! fails soft.

use std::env;

/// PII redaction behavior for transcript payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedactionMode {
    Off,
    Basic,
}

impl RedactionMode {
    pub fn parse(s: &str) -> Self {
        match s {
            "off" => Self::Off,
            _ => Self::Basic,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    /// Reserved for scale-out pub/sub; the single-process hub does not use it.
    pub redis_url: String,
    pub environment: String,
    pub log_level: String,
    pub bind_addr: String,
    pub openrouter_api_key: String,
    pub openrouter_base_url: String,
    pub llm_primary_model: String,
    pub llm_fallback_model: String,
    pub pii_redaction_mode: RedactionMode,
    pub twilio_account_sid: String,
    pub twilio_auth_token: String,
    pub twilio_phone_number: String,
    pub twilio_stream_ws_base_url: String,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            redis_url: env_or("REDIS_URL", "redis://redis:6379/0"),
            environment: env_or("ENVIRONMENT", "development"),
            log_level: env_or("LOG_LEVEL", "info"),
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:8080"),
            openrouter_api_key: env_or("OPENROUTER_API_KEY", ""),
            openrouter_base_url: env_or("OPENROUTER_BASE_URL", "https://openrouter.ai/api/v1"),
            llm_primary_model: env_or("LLM_PRIMARY_MODEL", ""),
            llm_fallback_model: env_or("LLM_FALLBACK_MODEL", ""),
            pii_redaction_mode: RedactionMode::parse(&env_or("PII_REDACTION_MODE", "basic")),
            twilio_account_sid: env_or("TWILIO_ACCOUNT_SID", ""),
            twilio_auth_token: env_or("TWILIO_AUTH_TOKEN", ""),
            twilio_phone_number: env_or("TWILIO_PHONE_NUMBER", ""),
            twilio_stream_ws_base_url: env_or("TWILIO_STREAM_WS_BASE_URL", "wss://localhost:8080"),
        }
    }

    /// A settings value for tests: everything defaulted, no env reads.
    pub fn for_tests(database_url: &str) -> Self {
        Self {
            database_url: database_url.to_owned(),
            redis_url: "redis://redis:6379/0".to_owned(),
            environment: "test".to_owned(),
            log_level: "info".to_owned(),
            bind_addr: "127.0.0.1:0".to_owned(),
            openrouter_api_key: String::new(),
            openrouter_base_url: "https://openrouter.ai/api/v1".to_owned(),
            llm_primary_model: String::new(),
            llm_fallback_model: String::new(),
            pii_redaction_mode: RedactionMode::Basic,
            twilio_account_sid: String::new(),
            twilio_auth_token: String::new(),
            twilio_phone_number: String::new(),
            twilio_stream_ws_base_url: "wss://localhost:8080".to_owned(),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redaction_mode_parses_off_and_defaults_to_basic() {
        assert_eq!(RedactionMode::parse("off"), RedactionMode::Off);
        assert_eq!(RedactionMode::parse("basic"), RedactionMode::Basic);
        assert_eq!(RedactionMode::parse("anything-else"), RedactionMode::Basic);
    }
}
