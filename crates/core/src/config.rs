//! Process configuration for the pixray generation service.
//!
//! Endpoint URLs, the auth scheme, and the fixed generation parameters
//! all vary per deployment, so they are configuration data rather than
//! code. Loaded from environment variables; a missing credential or
//! endpoint fails fast at startup instead of degrading silently.

use std::path::PathBuf;

use crate::error::ConfigError;

/// Default seconds between status polls.
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
/// Default cap on poll attempts before a job is forced to fail.
const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 720;
/// Default wall-clock cap per job, in seconds.
const DEFAULT_JOB_DEADLINE_SECS: u64 = 3600;

/// Connection and polling configuration for the remote pixray API.
#[derive(Debug, Clone)]
pub struct PixrayConfig {
    /// Prediction submit endpoint. Polls go to `<submit_url>/<uuid>`.
    pub submit_url: String,
    /// Output-file endpoint. Artifacts are read from `<files_url>/<name>`.
    pub files_url: String,
    /// Bearer credential, for deployments that require one.
    pub auth_token: Option<String>,
    /// Fixed generation parameters merged into every submit body.
    pub settings: serde_json::Map<String, serde_json::Value>,
    /// Seconds between status polls.
    pub poll_interval_secs: u64,
    /// Poll attempts allowed before the job is forced to fail.
    pub max_poll_attempts: u32,
    /// Wall-clock seconds allowed before the job is forced to fail.
    pub job_deadline_secs: u64,
    /// Directory downloaded artifacts land in.
    pub output_dir: PathBuf,
}

impl PixrayConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                     | Required | Default |
    /// |-----------------------------|----------|---------|
    /// | `PIXRAY_SUBMIT_URL`         | yes      | --      |
    /// | `PIXRAY_FILES_URL`          | yes      | --      |
    /// | `PIXRAY_AUTH_TOKEN`         | see note | --      |
    /// | `PIXRAY_REQUIRE_AUTH`       | no       | `false` |
    /// | `PIXRAY_SETTINGS`           | no       | `{}`    |
    /// | `PIXRAY_POLL_INTERVAL_SECS` | no       | `5`     |
    /// | `PIXRAY_MAX_POLL_ATTEMPTS`  | no       | `720`   |
    /// | `PIXRAY_JOB_DEADLINE_SECS`  | no       | `3600`  |
    /// | `EASEL_OUTPUT_DIR`          | no       | `.`     |
    ///
    /// `PIXRAY_SETTINGS` must be a JSON object. When
    /// `PIXRAY_REQUIRE_AUTH` is `true`, `PIXRAY_AUTH_TOKEN` must be set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// `from_env` delegates here; tests supply a map-backed closure.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let submit_url = required(&lookup, "PIXRAY_SUBMIT_URL")?;
        let files_url = required(&lookup, "PIXRAY_FILES_URL")?;

        let auth_token = lookup("PIXRAY_AUTH_TOKEN").filter(|t| !t.is_empty());
        let require_auth = parse_or(&lookup, "PIXRAY_REQUIRE_AUTH", false, parse_bool)?;
        if require_auth && auth_token.is_none() {
            return Err(ConfigError::MissingVar("PIXRAY_AUTH_TOKEN"));
        }

        let settings = match lookup("PIXRAY_SETTINGS") {
            None => serde_json::Map::new(),
            Some(raw) => match serde_json::from_str::<serde_json::Value>(&raw) {
                Ok(serde_json::Value::Object(map)) => map,
                Ok(_) => {
                    return Err(ConfigError::InvalidVar {
                        var: "PIXRAY_SETTINGS",
                        message: "must be a JSON object".into(),
                    })
                }
                Err(e) => {
                    return Err(ConfigError::InvalidVar {
                        var: "PIXRAY_SETTINGS",
                        message: e.to_string(),
                    })
                }
            },
        };

        let poll_interval_secs = parse_or(
            &lookup,
            "PIXRAY_POLL_INTERVAL_SECS",
            DEFAULT_POLL_INTERVAL_SECS,
            parse_number,
        )?;
        let max_poll_attempts = parse_or(
            &lookup,
            "PIXRAY_MAX_POLL_ATTEMPTS",
            DEFAULT_MAX_POLL_ATTEMPTS,
            parse_number,
        )?;
        let job_deadline_secs = parse_or(
            &lookup,
            "PIXRAY_JOB_DEADLINE_SECS",
            DEFAULT_JOB_DEADLINE_SECS,
            parse_number,
        )?;

        let output_dir = lookup("EASEL_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            submit_url,
            files_url,
            auth_token,
            settings,
            poll_interval_secs,
            max_poll_attempts,
            job_deadline_secs,
            output_dir,
        })
    }
}

fn required(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<String, ConfigError> {
    lookup(var)
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::MissingVar(var))
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
    parse: impl Fn(&str) -> Result<T, String>,
) -> Result<T, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(raw) => parse(&raw).map_err(|message| ConfigError::InvalidVar { var, message }),
    }
}

fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(format!("expected a boolean, got '{other}'")),
    }
}

fn parse_number<T: std::str::FromStr>(raw: &str) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| e.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    const MINIMAL: &[(&str, &str)] = &[
        ("PIXRAY_SUBMIT_URL", "https://api.example/predictions"),
        ("PIXRAY_FILES_URL", "https://api.example/files"),
    ];

    #[test]
    fn minimal_env_uses_defaults() {
        let config = PixrayConfig::from_lookup(lookup_from(MINIMAL)).unwrap();
        assert_eq!(config.submit_url, "https://api.example/predictions");
        assert_eq!(config.auth_token, None);
        assert!(config.settings.is_empty());
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.max_poll_attempts, 720);
        assert_eq!(config.job_deadline_secs, 3600);
        assert_eq!(config.output_dir, PathBuf::from("."));
    }

    #[test]
    fn missing_submit_url_is_fatal() {
        let lookup = lookup_from(&[("PIXRAY_FILES_URL", "https://api.example/files")]);
        assert_matches!(
            PixrayConfig::from_lookup(lookup),
            Err(ConfigError::MissingVar("PIXRAY_SUBMIT_URL"))
        );
    }

    #[test]
    fn require_auth_without_token_is_fatal() {
        let lookup = lookup_from(&[
            ("PIXRAY_SUBMIT_URL", "https://api.example/predictions"),
            ("PIXRAY_FILES_URL", "https://api.example/files"),
            ("PIXRAY_REQUIRE_AUTH", "true"),
        ]);
        assert_matches!(
            PixrayConfig::from_lookup(lookup),
            Err(ConfigError::MissingVar("PIXRAY_AUTH_TOKEN"))
        );
    }

    #[test]
    fn require_auth_with_token_passes() {
        let lookup = lookup_from(&[
            ("PIXRAY_SUBMIT_URL", "https://api.example/predictions"),
            ("PIXRAY_FILES_URL", "https://api.example/files"),
            ("PIXRAY_REQUIRE_AUTH", "true"),
            ("PIXRAY_AUTH_TOKEN", "tok-123"),
        ]);
        let config = PixrayConfig::from_lookup(lookup).unwrap();
        assert_eq!(config.auth_token.as_deref(), Some("tok-123"));
    }

    #[test]
    fn settings_must_be_a_json_object() {
        let lookup = lookup_from(&[
            ("PIXRAY_SUBMIT_URL", "https://api.example/predictions"),
            ("PIXRAY_FILES_URL", "https://api.example/files"),
            ("PIXRAY_SETTINGS", "[1, 2, 3]"),
        ]);
        assert_matches!(
            PixrayConfig::from_lookup(lookup),
            Err(ConfigError::InvalidVar {
                var: "PIXRAY_SETTINGS",
                ..
            })
        );
    }

    #[test]
    fn settings_object_is_carried_through() {
        let lookup = lookup_from(&[
            ("PIXRAY_SUBMIT_URL", "https://api.example/predictions"),
            ("PIXRAY_FILES_URL", "https://api.example/files"),
            ("PIXRAY_SETTINGS", r#"{"quality": "best", "size": 512}"#),
        ]);
        let config = PixrayConfig::from_lookup(lookup).unwrap();
        assert_eq!(config.settings["quality"], "best");
        assert_eq!(config.settings["size"], 512);
    }

    #[test]
    fn invalid_number_is_fatal() {
        let lookup = lookup_from(&[
            ("PIXRAY_SUBMIT_URL", "https://api.example/predictions"),
            ("PIXRAY_FILES_URL", "https://api.example/files"),
            ("PIXRAY_POLL_INTERVAL_SECS", "soon"),
        ]);
        assert_matches!(
            PixrayConfig::from_lookup(lookup),
            Err(ConfigError::InvalidVar {
                var: "PIXRAY_POLL_INTERVAL_SECS",
                ..
            })
        );
    }

    #[test]
    fn poll_tuning_overrides_apply() {
        let lookup = lookup_from(&[
            ("PIXRAY_SUBMIT_URL", "https://api.example/predictions"),
            ("PIXRAY_FILES_URL", "https://api.example/files"),
            ("PIXRAY_POLL_INTERVAL_SECS", "2"),
            ("PIXRAY_MAX_POLL_ATTEMPTS", "10"),
            ("PIXRAY_JOB_DEADLINE_SECS", "60"),
            ("EASEL_OUTPUT_DIR", "/tmp/artifacts"),
        ]);
        let config = PixrayConfig::from_lookup(lookup).unwrap();
        assert_eq!(config.poll_interval_secs, 2);
        assert_eq!(config.max_poll_attempts, 10);
        assert_eq!(config.job_deadline_secs, 60);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/artifacts"));
    }
}
