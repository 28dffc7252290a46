//! Configuration loading and validation.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{ConfigError, Result, ValidationError};

/// Main configuration for the netsieve engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Directory for joint files and downloaded list copies.
    /// Defaults to the platform cache directory.
    pub cache_dir: Option<PathBuf>,

    /// Directory of redirect resources consulted before the built-in table.
    pub resources_dir: Option<PathBuf>,

    /// Timeout for list downloads and modified requests, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Number of memoized first/third-party verdicts.
    #[serde(default = "default_third_party_cache_capacity")]
    pub third_party_cache_capacity: u64,

    #[serde(default)]
    pub modify: ModifySettings,

    #[serde(default)]
    pub theme: Theme,

    #[serde(default)]
    pub user_rules: UserRulesSettings,

    /// Filter lists merged into the category containers.
    #[serde(default)]
    pub lists: Vec<ListConfig>,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Network-modify settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModifySettings {
    #[serde(default = "default_modify_enabled")]
    pub enabled: bool,

    /// When set, main-frame navigations are never modified.
    #[serde(default)]
    pub sub_resources_only: bool,
}

impl Default for ModifySettings {
    fn default() -> Self {
        Self {
            enabled: default_modify_enabled(),
            sub_resources_only: false,
        }
    }
}

/// Colors of the block page.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Theme {
    #[serde(default = "default_background")]
    pub background: String,
    #[serde(default = "default_foreground")]
    pub foreground: String,
    #[serde(default = "default_accent")]
    pub accent: String,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            background: default_background(),
            foreground: default_foreground(),
            accent: default_accent(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserRulesSettings {
    /// JSON file holding user rules. Rules are kept in memory only when unset.
    pub path: Option<PathBuf>,
}

/// One configured filter list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListConfig {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default = "default_list_enabled")]
    pub enabled: bool,
    pub source: ListSource,
}

/// Where the raw content of a filter list comes from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ListSource {
    File { path: PathBuf },
    Remote { url: String },
}

/// Prometheus exporter settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}

const fn default_request_timeout() -> u64 {
    30
}

const fn default_third_party_cache_capacity() -> u64 {
    2048
}

const fn default_modify_enabled() -> bool {
    true
}

const fn default_list_enabled() -> bool {
    true
}

fn default_background() -> String {
    "#ffffff".into()
}

fn default_foreground() -> String {
    "#202124".into()
}

fn default_accent() -> String {
    "#d93025".into()
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9090))
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate().map_err(ConfigError::Validation)?;
        Ok(config)
    }

    /// Directory for joint files and list copies.
    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(default_cache_dir)
    }

    fn validate(&self) -> std::result::Result<(), ValidationError> {
        if self.request_timeout_secs == 0 {
            return Err(ValidationError::ZeroRequestTimeout);
        }

        if self.third_party_cache_capacity == 0 {
            return Err(ValidationError::ZeroThirdPartyCacheCapacity);
        }

        for (name, value) in [
            ("background", &self.theme.background),
            ("foreground", &self.theme.foreground),
            ("accent", &self.theme.accent),
        ] {
            if value.trim().is_empty() {
                return Err(ValidationError::EmptyThemeColor { name });
            }
        }

        let mut seen = HashSet::new();
        for list in &self.lists {
            if list.id.is_empty() {
                return Err(ValidationError::EmptyListId);
            }
            if !seen.insert(list.id.as_str()) {
                return Err(ValidationError::DuplicateListId {
                    id: list.id.clone(),
                });
            }
            match &list.source {
                ListSource::File { path } if path.as_os_str().is_empty() => {
                    return Err(ValidationError::EmptyListPath {
                        id: list.id.clone(),
                    });
                }
                ListSource::Remote { url } if url.is_empty() => {
                    return Err(ValidationError::EmptyListUrl {
                        id: list.id.clone(),
                    });
                }
                ListSource::Remote { url }
                    if !url.starts_with("http://") && !url.starts_with("https://") =>
                {
                    return Err(ValidationError::InvalidListUrl {
                        id: list.id.clone(),
                        url: url.clone(),
                    });
                }
                _ => {}
            }
        }

        Ok(())
    }
}

/// Returns the default cache directory.
///
/// Falls back to `./cache/netsieve` if the platform cache directory cannot
/// be determined.
#[must_use]
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir().map_or_else(|| PathBuf::from("./cache/netsieve"), |p| p.join("netsieve"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            cache_dir = "/tmp/netsieve"
            request_timeout_secs = 10
            third_party_cache_capacity = 64

            [modify]
            enabled = false
            sub_resources_only = true

            [theme]
            accent = "red"

            [user_rules]
            path = "/tmp/rules.json"

            [[lists]]
            id = "easylist"
            title = "EasyList"
            source = { type = "remote", url = "https://easylist.to/easylist/easylist.txt" }

            [[lists]]
            id = "local"
            enabled = false
            source = { type = "file", path = "/etc/netsieve/local.txt" }
        "#;

        let config = Config::parse(toml).unwrap();
        assert_eq!(config.cache_dir(), PathBuf::from("/tmp/netsieve"));
        assert_eq!(config.request_timeout_secs, 10);
        assert_eq!(config.third_party_cache_capacity, 64);
        assert!(!config.modify.enabled);
        assert!(config.modify.sub_resources_only);
        assert_eq!(config.theme.accent, "red");
        assert_eq!(config.theme.background, "#ffffff");
        assert_eq!(
            config.user_rules.path.as_deref(),
            Some(Path::new("/tmp/rules.json"))
        );
        assert_eq!(config.lists.len(), 2);
        assert!(config.lists[0].enabled);
        assert!(!config.lists[1].enabled);
        assert_eq!(
            config.lists[1].source,
            ListSource::File {
                path: "/etc/netsieve/local.txt".into()
            }
        );
    }

    #[test]
    fn test_default_values() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.third_party_cache_capacity, 2048);
        assert!(config.modify.enabled);
        assert!(!config.modify.sub_resources_only);
        assert!(config.lists.is_empty());
        assert!(config.resources_dir.is_none());
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn test_metrics_config() {
        let toml = r#"
            [metrics]
            enabled = true
            listen = "0.0.0.0:9100"
        "#;

        let config = Config::parse(toml).unwrap();
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.listen.port(), 9100);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        assert!(Config::parse("request_timeout_secs = 0").is_err());
    }

    #[test]
    fn test_zero_cache_capacity_rejected() {
        assert!(Config::parse("third_party_cache_capacity = 0").is_err());
    }

    #[test]
    fn test_empty_theme_color_rejected() {
        let toml = r#"
            [theme]
            background = "  "
        "#;
        assert!(Config::parse(toml).is_err());
    }

    #[test]
    fn test_duplicate_list_id_rejected() {
        let toml = r#"
            [[lists]]
            id = "a"
            source = { type = "file", path = "/a.txt" }

            [[lists]]
            id = "a"
            source = { type = "file", path = "/b.txt" }
        "#;
        assert!(Config::parse(toml).is_err());
    }

    #[test]
    fn test_invalid_list_url_rejected() {
        let toml = r#"
            [[lists]]
            id = "a"
            source = { type = "remote", url = "ftp://example.com/list.txt" }
        "#;
        assert!(Config::parse(toml).is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(Config::parse(r#"unknown_field = "value""#).is_err());
    }
}
