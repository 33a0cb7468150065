//! Application configuration.
//!
//! Everything is read from the environment (after `.env` is loaded by the
//! binary). Unset variables fall back to the section defaults; a variable
//! that is set but unparsable is a configuration error rather than a silent
//! fallback.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::api::server::ApiServerConfig;
use crate::database::retry::RetryPolicy;
use crate::{Error, Result};

/// Generation limits and lifecycle settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Ceiling on work units per job (items x languages).
    pub max_items_per_job: u32,
    /// Queued or processing jobs one owner may have at once.
    pub max_active_jobs_per_owner: u32,
    pub default_language: String,
    pub supported_languages: Vec<String>,
    /// Age after which an unfinished job is considered orphaned.
    pub stale_after_minutes: u32,
    /// How long shutdown waits for cancelled jobs to finalize.
    pub shutdown_timeout_secs: u64,
    /// Hand jobs to the external queue when one is wired in.
    pub use_external_queue: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_items_per_job: 50,
            max_active_jobs_per_owner: 5,
            default_language: "en".to_string(),
            supported_languages: vec!["en".to_string()],
            stale_after_minutes: 30,
            shutdown_timeout_secs: 30,
            use_external_queue: false,
        }
    }
}

/// Provider base URLs and per-call timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderEndpoints {
    pub content_url: String,
    pub lyrics_url: String,
    pub artwork_url: String,
    pub audio_url: String,
    /// Sent as a bearer token when present.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub fetch_timeout_secs: u64,
    pub generation_timeout_secs: u64,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            content_url: "http://127.0.0.1:8081/content".to_string(),
            lyrics_url: "http://127.0.0.1:8081/lyrics".to_string(),
            artwork_url: "http://127.0.0.1:8081/artwork".to_string(),
            audio_url: "http://127.0.0.1:8081/audio".to_string(),
            api_key: None,
            fetch_timeout_secs: 30,
            generation_timeout_secs: 120,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub log_dir: String,
    pub api: ApiServerConfig,
    pub generation: GenerationConfig,
    pub retry: RetryPolicy,
    pub providers: ProviderEndpoints,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:songsmith.db?mode=rwc".to_string(),
            log_dir: "logs".to_string(),
            api: ApiServerConfig::default(),
            generation: GenerationConfig::default(),
            retry: RetryPolicy::default(),
            providers: ProviderEndpoints::default(),
        }
    }
}

/// Typed view over a variable source.
struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn set_string(&self, key: &str, target: &mut String) {
        if let Some(value) = self.string(key) {
            *target = value;
        }
    }

    fn set_parsed<T>(&self, key: &str, target: &mut T) -> Result<()>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        if let Some(raw) = self.string(key) {
            *target = raw
                .parse()
                .map_err(|e| Error::config(format!("{key}='{raw}': {e}")))?;
        }
        Ok(())
    }

    fn set_list(&self, key: &str, target: &mut Vec<String>) {
        if let Some(raw) = self.string(key) {
            *target = raw
                .split(',')
                .map(|s| s.trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
        }
    }
}

impl AppConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);
        let mut config = Self::default();

        vars.set_string("DATABASE_URL", &mut config.database_url);
        vars.set_string("LOG_DIR", &mut config.log_dir);

        vars.set_string("API_BIND_ADDRESS", &mut config.api.bind_address);
        vars.set_parsed("API_PORT", &mut config.api.port)?;

        let generation = &mut config.generation;
        vars.set_parsed("GENERATION_MAX_ITEMS", &mut generation.max_items_per_job)?;
        vars.set_parsed(
            "GENERATION_MAX_ACTIVE_JOBS",
            &mut generation.max_active_jobs_per_owner,
        )?;
        vars.set_string("GENERATION_DEFAULT_LANGUAGE", &mut generation.default_language);
        vars.set_list("GENERATION_LANGUAGES", &mut generation.supported_languages);
        vars.set_parsed(
            "GENERATION_STALE_AFTER_MINUTES",
            &mut generation.stale_after_minutes,
        )?;
        vars.set_parsed(
            "GENERATION_SHUTDOWN_TIMEOUT_SECS",
            &mut generation.shutdown_timeout_secs,
        )?;
        vars.set_parsed(
            "GENERATION_USE_EXTERNAL_QUEUE",
            &mut generation.use_external_queue,
        )?;

        let retry = &mut config.retry;
        vars.set_parsed("RETRY_MAX_ATTEMPTS", &mut retry.max_attempts)?;
        vars.set_parsed("RETRY_BASE_DELAY_MS", &mut retry.base_delay_ms)?;
        vars.set_parsed("RETRY_MAX_DELAY_MS", &mut retry.max_delay_ms)?;
        vars.set_parsed("RETRY_MAX_JITTER_MS", &mut retry.max_jitter_ms)?;

        let providers = &mut config.providers;
        vars.set_string("PROVIDER_CONTENT_URL", &mut providers.content_url);
        vars.set_string("PROVIDER_LYRICS_URL", &mut providers.lyrics_url);
        vars.set_string("PROVIDER_ARTWORK_URL", &mut providers.artwork_url);
        vars.set_string("PROVIDER_AUDIO_URL", &mut providers.audio_url);
        providers.api_key = vars.string("PROVIDER_API_KEY");
        vars.set_parsed("PROVIDER_FETCH_TIMEOUT_SECS", &mut providers.fetch_timeout_secs)?;
        vars.set_parsed(
            "PROVIDER_GENERATION_TIMEOUT_SECS",
            &mut providers.generation_timeout_secs,
        )?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let generation = &self.generation;
        if generation.max_items_per_job == 0 {
            return Err(Error::config("GENERATION_MAX_ITEMS must be at least 1"));
        }
        if generation.max_active_jobs_per_owner == 0 {
            return Err(Error::config("GENERATION_MAX_ACTIVE_JOBS must be at least 1"));
        }
        if generation.stale_after_minutes == 0 {
            return Err(Error::config(
                "GENERATION_STALE_AFTER_MINUTES must be at least 1",
            ));
        }
        if !generation
            .supported_languages
            .contains(&generation.default_language)
        {
            return Err(Error::config(format!(
                "default language '{}' is not in the supported languages {:?}",
                generation.default_language, generation.supported_languages
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::config("RETRY_MAX_ATTEMPTS must be at least 1"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(Error::config(
                "RETRY_BASE_DELAY_MS must not exceed RETRY_MAX_DELAY_MS",
            ));
        }
        if self.providers.fetch_timeout_secs == 0 || self.providers.generation_timeout_secs == 0 {
            return Err(Error::config("provider timeouts must be at least 1 second"));
        }
        Ok(())
    }
}
