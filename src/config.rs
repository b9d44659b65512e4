use crate::defaults;
use crate::error::{Result, RoundtableError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub orchestration: OrchestrationConfig,
    pub session: SessionConfig,
    pub watchdog: WatchdogConfig,
    pub summary: SummaryConfig,
    pub generation: GenerationConfig,
    pub conversation: ConversationConfig,
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestrationConfig {
    pub chaos_mode: bool,
    pub allow_self_reply: bool,
    pub normal_tick_ms: u64,
    pub chaos_tick_ms: u64,
    pub normal_cooldown_ms: u64,
    pub chaos_cooldown_ms: u64,
    pub lru_fraction: f64,
}

/// Session lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub max_cached_sessions: usize,
    pub idle_timeout_secs: u64,
    pub recent_transcript_turns: usize,
}

/// Turn timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WatchdogConfig {
    pub speech_time_limit_secs: u64,
    pub upload_margin_factor: f64,
    pub upload_buffer_secs: u64,
    pub force_skip_poll_ms: u64,
    pub force_skip_grace_ms: u64,
}

/// Summarizer configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SummaryConfig {
    pub enabled: bool,
    pub meta_threshold: usize,
    pub max_suggestions: usize,
    pub model: String,
}

/// Sampling parameters shared by every speaker session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_p: f32,
    /// API key for the generation service. Only ever read from the environment.
    #[serde(skip)]
    pub api_key: Option<String>,
}

/// Conversation-level settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConversationConfig {
    pub topic: String,
    pub user_name: String,
    pub audio_accumulation: bool,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            chaos_mode: false,
            allow_self_reply: false,
            normal_tick_ms: defaults::NORMAL_TICK_MS,
            chaos_tick_ms: defaults::CHAOS_TICK_MS,
            normal_cooldown_ms: defaults::NORMAL_COOLDOWN_MS,
            chaos_cooldown_ms: defaults::CHAOS_COOLDOWN_MS,
            lru_fraction: defaults::LRU_FRACTION,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_cached_sessions: defaults::MAX_CACHED_SESSIONS,
            idle_timeout_secs: defaults::SESSION_IDLE_TIMEOUT_SECS,
            recent_transcript_turns: defaults::RECENT_TRANSCRIPT_TURNS,
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            speech_time_limit_secs: defaults::SPEECH_TIME_LIMIT_SECS,
            upload_margin_factor: defaults::UPLOAD_MARGIN_FACTOR,
            upload_buffer_secs: defaults::UPLOAD_BUFFER_SECS,
            force_skip_poll_ms: defaults::FORCE_SKIP_POLL_MS,
            force_skip_grace_ms: defaults::FORCE_SKIP_GRACE_MS,
        }
    }
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            meta_threshold: defaults::META_SUMMARY_THRESHOLD,
            max_suggestions: defaults::MAX_SUGGESTIONS,
            model: defaults::SUMMARY_MODEL.to_string(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: defaults::TEMPERATURE,
            top_p: defaults::TOP_P,
            api_key: None,
        }
    }
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            topic: defaults::DEFAULT_TOPIC.to_string(),
            user_name: defaults::DEFAULT_USER_NAME.to_string(),
            audio_accumulation: false,
        }
    }
}

impl OrchestrationConfig {
    /// Tick interval for the current mode.
    pub fn tick_interval(&self) -> Duration {
        if self.chaos_mode {
            Duration::from_millis(self.chaos_tick_ms)
        } else {
            Duration::from_millis(self.normal_tick_ms)
        }
    }

    /// Cooldown for the current mode.
    pub fn cooldown(&self) -> Duration {
        if self.chaos_mode {
            Duration::from_millis(self.chaos_cooldown_ms)
        } else {
            Duration::from_millis(self.normal_cooldown_ms)
        }
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl WatchdogConfig {
    pub fn speech_limit(&self) -> Duration {
        Duration::from_secs(self.speech_time_limit_secs)
    }

    pub fn force_skip_poll(&self) -> Duration {
        Duration::from_millis(self.force_skip_poll_ms)
    }

    pub fn force_skip_grace(&self) -> Duration {
        Duration::from_millis(self.force_skip_grace_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only falls back to defaults when the file is missing; invalid TOML is an error.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e)
                if e.downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound) =>
            {
                Ok(Self::default())
            }
            Err(e) => Err(e.context(format!("Failed to load config from {}", path.display()))),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - ROUNDTABLE_TOPIC → conversation.topic
    /// - ROUNDTABLE_API_KEY → generation.api_key
    /// - ROUNDTABLE_SPEECH_LIMIT → watchdog.speech_time_limit_secs
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(topic) = std::env::var("ROUNDTABLE_TOPIC")
            && !topic.is_empty()
        {
            self.conversation.topic = topic;
        }

        if let Ok(key) = std::env::var("ROUNDTABLE_API_KEY")
            && !key.is_empty()
        {
            self.generation.api_key = Some(key);
        }

        if let Ok(limit) = std::env::var("ROUNDTABLE_SPEECH_LIMIT")
            && let Ok(secs) = limit.trim().parse::<u64>()
            && secs > 0
        {
            self.watchdog.speech_time_limit_secs = secs;
        }

        self
    }

    /// Reject values the orchestrator cannot run with.
    pub fn validate(&self) -> Result<()> {
        let o = &self.orchestration;
        if o.normal_tick_ms == 0 || o.chaos_tick_ms == 0 {
            return Err(invalid("orchestration.*_tick_ms", "must be positive"));
        }
        if o.normal_cooldown_ms == 0 || o.chaos_cooldown_ms == 0 {
            return Err(invalid("orchestration.*_cooldown_ms", "must be positive"));
        }
        if !(o.lru_fraction > 0.0 && o.lru_fraction <= 1.0) {
            return Err(invalid("orchestration.lru_fraction", "must be in (0, 1]"));
        }
        if self.session.max_cached_sessions == 0 {
            return Err(invalid("session.max_cached_sessions", "must be positive"));
        }
        if self.watchdog.speech_time_limit_secs == 0 {
            return Err(invalid("watchdog.speech_time_limit_secs", "must be positive"));
        }
        if self.watchdog.force_skip_poll_ms == 0 {
            return Err(invalid("watchdog.force_skip_poll_ms", "must be positive"));
        }
        if self.summary.meta_threshold == 0 {
            return Err(invalid("summary.meta_threshold", "must be positive"));
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/roundtable/config.toml on Linux
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("roundtable").join("config.toml"))
            .ok_or_else(|| RoundtableError::Other("Could not determine config directory".into()))
    }
}

fn invalid(key: &str, message: &str) -> RoundtableError {
    RoundtableError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_roundtable_env() {
        remove_env("ROUNDTABLE_TOPIC");
        remove_env("ROUNDTABLE_API_KEY");
        remove_env("ROUNDTABLE_SPEECH_LIMIT");
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert!(!config.orchestration.chaos_mode);
        assert!(!config.orchestration.allow_self_reply);
        assert_eq!(config.orchestration.normal_tick_ms, 1000);
        assert_eq!(config.orchestration.chaos_tick_ms, 400);
        assert_eq!(config.orchestration.lru_fraction, 0.5);

        assert_eq!(config.session.max_cached_sessions, 6);
        assert_eq!(config.session.idle_timeout_secs, 120);

        assert_eq!(config.watchdog.speech_time_limit_secs, 240);
        assert_eq!(config.watchdog.force_skip_poll_ms, 100);

        assert!(config.summary.enabled);
        assert_eq!(config.summary.meta_threshold, 10);
        assert_eq!(config.summary.max_suggestions, 10);

        assert_eq!(config.generation.temperature, 1.5);
        assert_eq!(config.generation.api_key, None);
        assert!(!config.conversation.audio_accumulation);
    }

    #[test]
    fn test_mode_dependent_durations() {
        let mut o = OrchestrationConfig::default();
        assert_eq!(o.tick_interval(), Duration::from_millis(1000));
        assert_eq!(o.cooldown(), Duration::from_millis(1000));
        o.chaos_mode = true;
        assert_eq!(o.tick_interval(), Duration::from_millis(400));
        assert_eq!(o.cooldown(), Duration::from_millis(500));
    }

    #[test]
    fn test_load_from_toml_file() {
        let toml_content = r#"
            [orchestration]
            chaos_mode = true
            lru_fraction = 1.0

            [conversation]
            topic = "Dialectics"
            user_name = "Ada"
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();
        assert!(config.orchestration.chaos_mode);
        assert_eq!(config.orchestration.lru_fraction, 1.0);
        assert_eq!(config.conversation.topic, "Dialectics");
        assert_eq!(config.conversation.user_name, "Ada");
        // Untouched sections keep defaults
        assert_eq!(config.session, SessionConfig::default());
    }

    #[test]
    fn test_load_invalid_toml_is_error() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"[orchestration\nchaos_mode = ").unwrap();
        assert!(Config::load(temp_file.path()).is_err());
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[orchestration]\nlru_fraction = 0.0\n")
            .unwrap();
        let err = Config::load(temp_file.path()).unwrap_err();
        assert!(err.to_string().contains("lru_fraction"), "got: {err}");
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = Config::load_or_default(Path::new("/nonexistent/roundtable.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_or_default_invalid_file_is_error() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"not = [valid").unwrap();
        assert!(Config::load_or_default(temp_file.path()).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_cache() {
        let mut config = Config::default();
        config.session.max_cached_sessions = 0;
        assert!(matches!(
            config.validate(),
            Err(RoundtableError::ConfigInvalidValue { .. })
        ));
    }

    #[test]
    fn test_api_key_is_never_serialized() {
        let mut config = Config::default();
        config.generation.api_key = Some("secret".to_string());
        let serialized = toml::to_string(&config).unwrap();
        assert!(!serialized.contains("secret"));
    }

    #[test]
    fn test_env_overrides() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_roundtable_env();

        set_env("ROUNDTABLE_TOPIC", "Labour theory of value");
        set_env("ROUNDTABLE_API_KEY", "k-123");
        set_env("ROUNDTABLE_SPEECH_LIMIT", "30");

        let config = Config::default().with_env_overrides();
        assert_eq!(config.conversation.topic, "Labour theory of value");
        assert_eq!(config.generation.api_key.as_deref(), Some("k-123"));
        assert_eq!(config.watchdog.speech_time_limit_secs, 30);

        clear_roundtable_env();
    }

    #[test]
    fn test_env_overrides_ignore_empty_and_invalid() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_roundtable_env();

        set_env("ROUNDTABLE_TOPIC", "");
        set_env("ROUNDTABLE_SPEECH_LIMIT", "soon");

        let config = Config::default().with_env_overrides();
        assert_eq!(config.conversation.topic, defaults::DEFAULT_TOPIC);
        assert_eq!(config.watchdog.speech_time_limit_secs, 240);

        clear_roundtable_env();
    }

    #[test]
    fn test_roundtrip_through_toml() {
        let config = Config::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
