use anyhow::{anyhow, Context};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::session::SessionSettings;

#[derive(Debug, Clone)]
pub struct Settings {
    pub api_url: String,
    pub api_token: Option<String>,
    pub api_timeout: Duration,
    pub dwell: Duration,
    pub speech_rate: f32,
    pub session_idle: Duration,
    pub port: u16,
}

impl Settings {
    // Reads `.env` (if any) and the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url = lookup("LEARN_API_URL")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "http://localhost:8080/api".into());
        let api_token = lookup("LEARN_API_TOKEN").filter(|s| !s.trim().is_empty());
        let timeout_secs: u64 = parse_or(&lookup, "LEARN_API_TIMEOUT_SECS", 15)?;
        let dwell_secs: u64 = parse_or(&lookup, "DWELL_SECS", 10)?;
        let speech_rate: f32 = parse_or(&lookup, "SPEECH_RATE", 0.9)?;
        if !(speech_rate > 0.0 && speech_rate <= 10.0) {
            return Err(anyhow!("SPEECH_RATE must be in (0, 10], got {}", speech_rate));
        }
        let idle_secs: u64 = parse_or(&lookup, "SESSION_IDLE_SECS", 1800)?;
        if idle_secs == 0 {
            return Err(anyhow!("SESSION_IDLE_SECS must be positive"));
        }
        let port: u16 = parse_or(&lookup, "PORT", 8082)?;

        Ok(Self {
            api_url,
            api_token,
            api_timeout: Duration::from_secs(timeout_secs),
            dwell: Duration::from_secs(dwell_secs),
            speech_rate,
            session_idle: Duration::from_secs(idle_secs),
            port,
        })
    }

    pub fn session(&self) -> SessionSettings {
        SessionSettings {
            dwell: self.dwell,
            speech_rate: self.speech_rate,
        }
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid {}: {:?}", key, raw)),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> anyhow::Result<Settings> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let s = load(&[]).unwrap();
        assert_eq!(s.api_url, "http://localhost:8080/api");
        assert_eq!(s.api_token, None);
        assert_eq!(s.dwell, Duration::from_secs(10));
        assert_eq!(s.api_timeout, Duration::from_secs(15));
        assert_eq!(s.port, 8082);
        assert_eq!(s.session_idle, Duration::from_secs(1800));
        assert!((s.speech_rate - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_overrides_and_blank_values() {
        let s = load(&[("DWELL_SECS", "3"), ("LEARN_API_TOKEN", " "), ("PORT", "")]).unwrap();
        assert_eq!(s.dwell, Duration::from_secs(3));
        assert_eq!(s.api_token, None);
        assert_eq!(s.port, 8082);
        assert_eq!(s.session().dwell, Duration::from_secs(3));
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        let err = load(&[("DWELL_SECS", "ten")]).unwrap_err();
        assert!(err.to_string().contains("DWELL_SECS"));
        assert!(load(&[("SPEECH_RATE", "0")]).is_err());
        assert!(load(&[("PORT", "70000")]).is_err());
        assert!(load(&[("SESSION_IDLE_SECS", "0")]).is_err());
    }
}
