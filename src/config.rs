use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// File name searched by [`BridgeConfig::discover`]
pub const CONFIG_FILE: &str = ".objbridge.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub ownership: OwnershipPolicy,

    #[serde(default)]
    pub tracking: TrackingConfig,

    #[serde(default)]
    pub bindings: BindingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which selectors hand their caller an owned reference.
///
/// Objects returned by a selector in an owned family are released when their
/// wrapper is reclaimed. A consuming family (`init`) takes over the receiver's
/// reference and returns it in the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipPolicy {
    #[serde(default = "default_owned_families")]
    pub owned_families: Vec<String>,

    #[serde(default = "default_consuming_families")]
    pub consuming_families: Vec<String>,
}

/// Ownership behaviour of a selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodFamily {
    /// Returns a reference the caller owns
    Owned,
    /// Consumes the receiver's reference and returns an owned one
    Consuming,
    /// Returns a borrowed reference
    Borrowed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Tally every outbound method call by selector and signature
    #[serde(default = "default_false")]
    pub track_method_calls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingConfig {
    /// Guess signatures for scripting methods installed without one
    #[serde(default = "default_true")]
    pub infer_signatures: bool,

    #[serde(default = "default_false")]
    pub verbose: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default = "default_false")]
    pub json: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,

    #[serde(default = "default_false")]
    pub spans: bool,
}

impl Default for OwnershipPolicy {
    fn default() -> Self {
        Self {
            owned_families: default_owned_families(),
            consuming_families: default_consuming_families(),
        }
    }
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            infer_signatures: true,
            verbose: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
            file: None,
            spans: false,
        }
    }
}

fn default_true() -> bool { true }
fn default_false() -> bool { false }
fn default_level() -> String { "info".to_string() }

fn default_owned_families() -> Vec<String> {
    ["alloc", "new", "copy", "mutableCopy"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_consuming_families() -> Vec<String> {
    vec!["init".to_string()]
}

impl OwnershipPolicy {
    /// Classify a selector name
    pub fn family_of(&self, selector: &str) -> MethodFamily {
        if self.consuming_families.iter().any(|f| in_family(selector, f)) {
            MethodFamily::Consuming
        } else if self.owned_families.iter().any(|f| in_family(selector, f)) {
            MethodFamily::Owned
        } else {
            MethodFamily::Borrowed
        }
    }

    /// Whether an object returned by `selector` is owned by the caller
    pub fn returns_owned(&self, selector: &str) -> bool {
        self.family_of(selector) == MethodFamily::Owned
    }
}

/// Cocoa naming rule: `family` prefix not followed by a lowercase letter
fn in_family(selector: &str, family: &str) -> bool {
    let name = selector.trim_start_matches('_');
    match name.strip_prefix(family) {
        Some(rest) => !rest.starts_with(|c: char| c.is_ascii_lowercase()),
        None => false,
    }
}

impl BridgeConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("Failed to read config: {}", e)))?;

        Self::parse(&content)
    }

    /// Parse configuration from TOML string
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| BridgeError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Find and load configuration from the current directory or its parents
    pub fn discover() -> Self {
        let mut current = std::env::current_dir().ok();

        while let Some(dir) = current {
            let config_path = dir.join(CONFIG_FILE);
            if config_path.exists() {
                if let Ok(config) = Self::load(&config_path) {
                    return config;
                }
            }

            current = dir.parent().map(|p| p.to_path_buf());
        }

        Self::default()
    }

    /// Generate default configuration file content
    pub fn generate_default() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate config"))
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| BridgeError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, content)
            .map_err(|e| BridgeError::Config(format!("Failed to write config: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert!(config.bindings.infer_signatures);
        assert!(!config.tracking.track_method_calls);
        assert_eq!(config.ownership.owned_families.len(), 4);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[ownership]
owned_families = ["alloc", "create"]

[tracking]
track_method_calls = true

[logging]
level = "debug"
"#;

        let config = BridgeConfig::parse(toml).unwrap();
        assert!(config.tracking.track_method_calls);
        assert_eq!(config.logging.level, "debug");
        assert!(config.ownership.returns_owned("createWidget"));
        assert!(!config.ownership.returns_owned("copy"));
        assert_eq!(config.ownership.consuming_families, vec!["init".to_string()]);
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            BridgeConfig::parse("[tracking\n"),
            Err(BridgeError::Config(_))
        ));
    }

    #[test]
    fn test_method_families() {
        let policy = OwnershipPolicy::default();
        assert_eq!(policy.family_of("alloc"), MethodFamily::Owned);
        assert_eq!(policy.family_of("allocWithZone:"), MethodFamily::Owned);
        assert_eq!(policy.family_of("newObject"), MethodFamily::Owned);
        assert_eq!(policy.family_of("copy"), MethodFamily::Owned);
        assert_eq!(policy.family_of("mutableCopyWithZone:"), MethodFamily::Owned);
        assert_eq!(policy.family_of("_copyItems"), MethodFamily::Owned);
        assert_eq!(policy.family_of("init"), MethodFamily::Consuming);
        assert_eq!(policy.family_of("initWithUTF8String:"), MethodFamily::Consuming);

        assert_eq!(policy.family_of("allocate"), MethodFamily::Borrowed);
        assert_eq!(policy.family_of("newsletter"), MethodFamily::Borrowed);
        assert_eq!(policy.family_of("copyright"), MethodFamily::Borrowed);
        assert_eq!(policy.family_of("initialize"), MethodFamily::Borrowed);
        assert_eq!(policy.family_of("description"), MethodFamily::Borrowed);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        let mut config = BridgeConfig::default();
        config.bindings.verbose = true;
        config.save(&path).unwrap();

        let loaded = BridgeConfig::load(&path).unwrap();
        assert!(loaded.bindings.verbose);
        assert_eq!(loaded.ownership, config.ownership);
    }

    #[test]
    fn test_generate_default_parses() {
        let text = BridgeConfig::generate_default();
        assert!(BridgeConfig::parse(&text).is_ok());
    }
}
