//! Configuration types for the resolver

use crate::core::{ResolveError, Result};
use std::time::Duration;

/// Default global a mod's configuration script assigns its options to
pub const DEFAULT_OPTIONS_GLOBAL: &str = "configuration_options";

/// How interpreter sessions are handed out within one orchestrator run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPolicy {
    /// One session per run, options binding cleared before every mod
    #[default]
    PerBatch,
    /// A fresh session for every mod script
    PerMod,
}

/// Bounds applied to every script evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptLimits {
    /// Wall-clock budget for one script
    pub timeout: Duration,
    /// Maximum VM instructions for one script, `None` for no count limit
    pub instruction_budget: Option<u64>,
    /// Memory ceiling of a session in bytes
    pub memory_limit: usize,
    /// Instructions between two budget checks
    pub hook_interval: u32,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(2000),
            instruction_budget: Some(50_000_000),
            memory_limit: 32 * 1024 * 1024, // 32MB
            hook_interval: 1000,
        }
    }
}

/// Configuration for resolution runs
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Base URL of the mod catalog service
    pub catalog_url: String,
    pub request_timeout: Duration,
    pub user_agent: String,
    pub script_limits: ScriptLimits,
    /// Global read back after a script runs
    pub options_global: String,
    /// Value of the `locale` global visible to scripts
    pub locale: Option<String>,
    pub session_policy: SessionPolicy,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            catalog_url: "http://127.0.0.1:8080".to_string(),
            request_timeout: Duration::from_secs(30),
            user_agent: "mod-resolver/0.1.0".to_string(),
            script_limits: ScriptLimits::default(),
            options_global: DEFAULT_OPTIONS_GLOBAL.to_string(),
            locale: None,
            session_policy: SessionPolicy::default(),
        }
    }
}

impl ResolverConfig {
    /// Load configuration from the process environment, reading `.env` first
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok(); // Ignore error if .env not present
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = ResolverConfigBuilder::new();

        if let Some(url) = lookup("MOD_CATALOG_URL") {
            builder = builder.catalog_url(url);
        }
        if let Some(secs) = lookup("MOD_CATALOG_TIMEOUT_SECS") {
            builder = builder.request_timeout(Duration::from_secs(parse_number(
                "MOD_CATALOG_TIMEOUT_SECS",
                &secs,
            )?));
        }
        if let Some(millis) = lookup("MOD_SCRIPT_TIMEOUT_MS") {
            builder = builder.script_timeout(Duration::from_millis(parse_number(
                "MOD_SCRIPT_TIMEOUT_MS",
                &millis,
            )?));
        }
        if let Some(bytes) = lookup("MOD_SCRIPT_MEMORY_LIMIT") {
            builder =
                builder.memory_limit(parse_number("MOD_SCRIPT_MEMORY_LIMIT", &bytes)? as usize);
        }
        if let Some(locale) = lookup("MOD_SCRIPT_LOCALE") {
            builder = builder.locale(locale);
        }

        builder.build()
    }
}

fn parse_number(field: &str, raw: &str) -> Result<u64> {
    raw.trim().parse::<u64>().map_err(|_| ResolveError::Configuration {
        message: format!("{} must be a whole number, got '{}'", field, raw),
        field: Some(field.to_string()),
        suggestion: Some(format!("Set {} to a positive integer", field)),
    })
}

/// Fluent builder for [`ResolverConfig`]
#[derive(Debug, Clone, Default)]
pub struct ResolverConfigBuilder {
    config: ResolverConfig,
}

impl ResolverConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn catalog_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.catalog_url = url.into();
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn user_agent<S: Into<String>>(mut self, user_agent: S) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn script_timeout(mut self, timeout: Duration) -> Self {
        self.config.script_limits.timeout = timeout;
        self
    }

    pub fn instruction_budget(mut self, budget: Option<u64>) -> Self {
        self.config.script_limits.instruction_budget = budget;
        self
    }

    pub fn memory_limit(mut self, bytes: usize) -> Self {
        self.config.script_limits.memory_limit = bytes;
        self
    }

    pub fn options_global<S: Into<String>>(mut self, name: S) -> Self {
        self.config.options_global = name.into();
        self
    }

    pub fn locale<S: Into<String>>(mut self, locale: S) -> Self {
        self.config.locale = Some(locale.into());
        self
    }

    pub fn session_policy(mut self, policy: SessionPolicy) -> Self {
        self.config.session_policy = policy;
        self
    }

    /// Validate and produce the configuration
    pub fn build(self) -> Result<ResolverConfig> {
        let config = self.config;

        let parsed = url::Url::parse(&config.catalog_url).map_err(|source| {
            let mut err = ResolveError::from(source);
            if let ResolveError::InvalidUrl { url, .. } = &mut err {
                *url = config.catalog_url.clone();
            }
            err
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ResolveError::Configuration {
                message: format!("catalog URL '{}' must use http or https", config.catalog_url),
                field: Some("MOD_CATALOG_URL".to_string()),
                suggestion: Some("Use a URL such as http://127.0.0.1:8080".to_string()),
            });
        }
        if config.script_limits.timeout.is_zero() {
            return Err(ResolveError::Configuration {
                message: "script timeout must be non-zero".to_string(),
                field: Some("MOD_SCRIPT_TIMEOUT_MS".to_string()),
                suggestion: Some("Use a value such as 2000".to_string()),
            });
        }
        if config.script_limits.hook_interval == 0 {
            return Err(ResolveError::Configuration {
                message: "hook interval must be non-zero".to_string(),
                field: None,
                suggestion: None,
            });
        }
        if config.options_global.trim().is_empty() {
            return Err(ResolveError::Configuration {
                message: "options global name must not be empty".to_string(),
                field: None,
                suggestion: Some(format!("Use the default '{}'", DEFAULT_OPTIONS_GLOBAL)),
            });
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ResolverConfig::default();
        assert_eq!(config.options_global, "configuration_options");
        assert_eq!(config.session_policy, SessionPolicy::PerBatch);
        assert_eq!(config.script_limits.timeout, Duration::from_millis(2000));
        assert!(config.locale.is_none());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = ResolverConfig::from_lookup(lookup_from(&[
            ("MOD_CATALOG_URL", "https://catalog.example"),
            ("MOD_CATALOG_TIMEOUT_SECS", "5"),
            ("MOD_SCRIPT_TIMEOUT_MS", "250"),
            ("MOD_SCRIPT_MEMORY_LIMIT", "1048576"),
            ("MOD_SCRIPT_LOCALE", "zh"),
        ]))
        .unwrap();

        assert_eq!(config.catalog_url, "https://catalog.example");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.script_limits.timeout, Duration::from_millis(250));
        assert_eq!(config.script_limits.memory_limit, 1_048_576);
        assert_eq!(config.locale.as_deref(), Some("zh"));
    }

    #[test]
    fn test_from_lookup_rejects_bad_number() {
        let err = ResolverConfig::from_lookup(lookup_from(&[("MOD_SCRIPT_TIMEOUT_MS", "soon")]))
            .unwrap_err();
        match err {
            ResolveError::Configuration { field, .. } => {
                assert_eq!(field.as_deref(), Some("MOD_SCRIPT_TIMEOUT_MS"));
            }
            other => panic!("Expected Configuration error, got {:?}", other),
        }
    }

    #[test]
    fn test_builder_validation() {
        assert!(ResolverConfigBuilder::new().catalog_url("catalog").build().is_err());
        assert!(ResolverConfigBuilder::new()
            .catalog_url("ftp://catalog.example")
            .build()
            .is_err());
        assert!(ResolverConfigBuilder::new()
            .script_timeout(Duration::ZERO)
            .build()
            .is_err());
        assert!(ResolverConfigBuilder::new().options_global(" ").build().is_err());

        let config = ResolverConfigBuilder::new()
            .session_policy(SessionPolicy::PerMod)
            .instruction_budget(None)
            .build()
            .unwrap();
        assert_eq!(config.session_policy, SessionPolicy::PerMod);
        assert_eq!(config.script_limits.instruction_budget, None);
    }
}
