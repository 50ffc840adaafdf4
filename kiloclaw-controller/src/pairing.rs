//! Pairing-request passthrough (spec §4.3.13): strict input validation before
//! interpolation into an exec command, plus a short-TTL cache for the `list`
//! result scoped to `(app_name, machine_id)`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use regex::Regex;
use std::sync::OnceLock;

use kiloclaw_core::{Error, Result};

fn channel_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_-]{0,63}$").unwrap())
}

fn code_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9]{1,32}$").unwrap())
}

pub fn validate_channel(channel: &str) -> Result<()> {
    if channel_regex().is_match(channel) {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "pairing channel {channel:?} does not match the required pattern"
        )))
    }
}

pub fn validate_code(code: &str) -> Result<()> {
    if code_regex().is_match(code) {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "pairing code {code:?} does not match the required pattern"
        )))
    }
}

const PAIRING_CACHE_TTL: Duration = Duration::from_secs(120);

/// In-process TTL cache standing in for the external KV spec §4.3.13 calls
/// for; entries expire after two minutes or on explicit invalidation (on
/// approval success).
#[derive(Default)]
pub struct PairingCache {
    entries: Mutex<HashMap<(String, String), (String, Instant)>>,
}

impl PairingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, app_name: &str, machine_id: &str) -> Option<String> {
        let key = (app_name.to_string(), machine_id.to_string());
        let entries = self.entries.lock().unwrap();
        let (value, inserted_at) = entries.get(&key)?;
        if inserted_at.elapsed() < PAIRING_CACHE_TTL {
            Some(value.clone())
        } else {
            None
        }
    }

    pub fn put(&self, app_name: &str, machine_id: &str, value: String) {
        let key = (app_name.to_string(), machine_id.to_string());
        self.entries.lock().unwrap().insert(key, (value, Instant::now()));
    }

    pub fn invalidate(&self, app_name: &str, machine_id: &str) {
        let key = (app_name.to_string(), machine_id.to_string());
        self.entries.lock().unwrap().remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_channel_and_code() {
        assert!(validate_channel("telegram").is_ok());
        assert!(validate_channel("my-channel_1").is_ok());
        assert!(validate_code("AbC123").is_ok());
    }

    #[test]
    fn rejects_channel_starting_with_digit_or_uppercase() {
        assert!(validate_channel("1channel").is_err());
        assert!(validate_channel("Telegram").is_err());
    }

    #[test]
    fn rejects_injection_attempts() {
        assert!(validate_channel("telegram; rm -rf /").is_err());
        assert!(validate_code("123; cat /etc/passwd").is_err());
    }

    #[test]
    fn cache_round_trips_and_invalidates() {
        let cache = PairingCache::new();
        cache.put("app", "m1", "[]".to_string());
        assert_eq!(cache.get("app", "m1"), Some("[]".to_string()));
        cache.invalidate("app", "m1");
        assert_eq!(cache.get("app", "m1"), None);
    }
}
