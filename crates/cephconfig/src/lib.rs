//! Ceph configuration file parser
//!
//! Parses ceph.conf style files into sections of options and exposes typed
//! lookups on top of them.
//!
//! Option names are normalized the way Ceph does it: `mon host`, `mon_host`
//! and `mon-host` all name the same option.
//!
//! # Example
//!
//! ```no_run
//! use cephconfig::CephConfig;
//!
//! let config = CephConfig::from_file("/etc/ceph/ceph.conf").unwrap();
//! let keyring = config.get_with_fallback(&["client", "global"], "keyring");
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Cluster name substituted for `$cluster`
pub const DEFAULT_CLUSTER: &str = "ceph";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config file at line {line}: {message}")]
    ParseError { line: usize, message: String },

    #[error("Invalid value for {option}: {message}")]
    InvalidValue { option: String, message: String },

    #[error("Missing required option: {0}")]
    MissingOption(String),
}

impl ConfigError {
    fn invalid(option: &str, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            option: option.to_string(),
            message: message.into(),
        }
    }
}

/// Trait for types that can be parsed from ceph.conf values
pub trait ConfigValue: Sized + Clone {
    /// Parse from a string value in ceph.conf
    fn parse_config_value(s: &str) -> Result<Self, String>;
}

/// Size value in bytes (supports K, M, G, T with optional B suffix)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size(pub u64);

impl ConfigValue for Size {
    fn parse_config_value(s: &str) -> Result<Self, String> {
        parse_size(s).map(Size)
    }
}

/// Count value (plain integer)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Count(pub u64);

impl ConfigValue for Count {
    fn parse_config_value(s: &str) -> Result<Self, String> {
        s.trim()
            .parse()
            .map(Count)
            .map_err(|_| format!("invalid count: {}", s))
    }
}

impl ConfigValue for bool {
    fn parse_config_value(s: &str) -> Result<Self, String> {
        match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" | "on" => Ok(true),
            "false" | "no" | "0" | "off" => Ok(false),
            _ => Err(format!("invalid bool: {}", s)),
        }
    }
}

impl ConfigValue for String {
    fn parse_config_value(s: &str) -> Result<Self, String> {
        Ok(s.to_string())
    }
}

/// A named option with a default, read from a set of sections
pub struct ConfigOption<T: ConfigValue> {
    name: &'static str,
    default: T,
}

impl<T: ConfigValue> ConfigOption<T> {
    pub const fn new(name: &'static str, default: T) -> Self {
        Self { name, default }
    }

    /// Get the value from config, falling back to the default when unset
    ///
    /// A value that is present but malformed is an error rather than a
    /// silent fallback.
    pub fn get(&self, config: &CephConfig, sections: &[&str]) -> Result<T, ConfigError> {
        match config.get_with_fallback(sections, self.name) {
            Some(raw) => {
                T::parse_config_value(raw).map_err(|message| ConfigError::invalid(self.name, message))
            }
            None => Ok(self.default.clone()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn default_value(&self) -> &T {
        &self.default
    }
}

fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim().replace('_', "");
    let num_end = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());

    let (num_str, unit) = s.split_at(num_end);
    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("invalid number: {}", num_str))?;

    let shift = match unit.trim().to_uppercase().as_str() {
        "" | "B" => 0,
        "K" | "KB" | "KI" | "KIB" => 10,
        "M" | "MB" | "MI" | "MIB" => 20,
        "G" | "GB" | "GI" | "GIB" => 30,
        "T" | "TB" | "TI" | "TIB" => 40,
        other => return Err(format!("unknown size unit: {}", other)),
    };

    Ok((num * (1u64 << shift) as f64) as u64)
}

/// Normalize an option name: spaces, dashes and underscores are equivalent
pub fn normalize_key(key: &str) -> String {
    key.trim()
        .split(|c: char| c == ' ' || c == '_' || c == '-' || c == '\t')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}

/// Strip a trailing `;` or `#` comment from a value
fn strip_comment(value: &str) -> &str {
    match value.find([';', '#']) {
        Some(pos) => value[..pos].trim_end(),
        None => value,
    }
}

/// Represents a parsed Ceph configuration
#[derive(Debug, Clone, Default)]
pub struct CephConfig {
    sections: HashMap<String, HashMap<String, String>>,
}

impl CephConfig {
    /// Parse a Ceph configuration file from the given path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse a Ceph configuration from a string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let mut current_section = String::from("global");

        for (idx, raw) in content.lines().enumerate() {
            let line = raw.trim();

            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            if let Some(rest) = line.strip_prefix('[') {
                let name = rest.strip_suffix(']').ok_or_else(|| ConfigError::ParseError {
                    line: idx + 1,
                    message: format!("unterminated section header: {}", line),
                })?;
                current_section = name.trim().to_string();
                config.sections.entry(current_section.clone()).or_default();
                continue;
            }

            let (key, value) = line.split_once('=').ok_or_else(|| ConfigError::ParseError {
                line: idx + 1,
                message: format!("expected 'key = value', got: {}", line),
            })?;

            let key = normalize_key(key);
            if key.is_empty() {
                return Err(ConfigError::ParseError {
                    line: idx + 1,
                    message: "empty option name".to_string(),
                });
            }

            config
                .sections
                .entry(current_section.clone())
                .or_default()
                .insert(key, strip_comment(value.trim()).to_string());
        }

        Ok(config)
    }

    /// Set a value programmatically (overrides anything parsed)
    pub fn set(&mut self, section: &str, key: &str, value: impl Into<String>) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(normalize_key(key), value.into());
    }

    /// Get a configuration value from a specific section
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|s| s.get(&normalize_key(key)))
            .map(|v| v.as_str())
    }

    /// Get a configuration value, checking multiple sections in order
    pub fn get_with_fallback(&self, sections: &[&str], key: &str) -> Option<&str> {
        sections.iter().find_map(|section| self.get(section, key))
    }

    /// Get all sections in the configuration
    pub fn sections(&self) -> Vec<&str> {
        self.sections.keys().map(|s| s.as_str()).collect()
    }
}

/// Expand `$cluster`, `$type`, `$id` and `$name` for an entity like `client.admin`
///
/// Unknown metavariables are left as they are.
pub fn expand_metavariables(value: &str, entity: &str) -> String {
    let (ty, id) = entity.split_once('.').unwrap_or((entity, ""));
    [
        ("$cluster", DEFAULT_CLUSTER),
        ("$name", entity),
        ("$type", ty),
        ("$id", id),
    ]
    .iter()
    .fold(value.to_string(), |acc, (var, with)| acc.replace(var, with))
}

/// Define a configuration struct with typed options
///
/// # Example
///
/// ```
/// use cephconfig::{define_options, CephConfig, Count, Size};
///
/// define_options! {
///     /// Client tunables
///     pub struct ClientOptions {
///         /// Read-ahead window
///         client_readahead: Size = Size(4 * 1024 * 1024),
///         /// Retries before giving up
///         client_retries: Count = Count(3),
///     }
/// }
///
/// let ceph_config = CephConfig::parse("[client]\nclient readahead = 1M\n").unwrap();
/// let opts = ClientOptions::from_ceph_config(&ceph_config, &["client", "global"]).unwrap();
///
/// assert_eq!(opts.client_readahead.0, 1024 * 1024);
/// assert_eq!(opts.client_retries.0, 3);
/// ```
#[macro_export]
macro_rules! define_options {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $field:ident: $ty:ty = $default:expr
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        $vis struct $name {
            $(
                $(#[$field_meta])*
                pub $field: $ty,
            )*
        }

        impl $name {
            /// Create with default values
            pub fn new() -> Self {
                Self {
                    $(
                        $field: $default,
                    )*
                }
            }

            /// Load from ceph.conf with section fallback
            pub fn from_ceph_config(
                config: &$crate::CephConfig,
                sections: &[&str],
            ) -> Result<Self, $crate::ConfigError> {
                Ok(Self {
                    $(
                        $field: $crate::ConfigOption::new(stringify!($field), $default)
                            .get(config, sections)?,
                    )*
                })
            }

            /// Get option names (for introspection)
            pub fn option_names() -> &'static [&'static str] {
                &[
                    $(stringify!($field),)*
                ]
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_CONFIG: &str = r#"
; striper test configuration
[global]
fsid = 7150dbe1-1803-44b9-9a3d-b893308fd02e
auth client required = cephx
rados_striper_stripe_unit = 64K   ; small units for tests

[client]
keyring = /etc/ceph/$cluster.$name.keyring
striper-data-dir = /var/lib/striper
# per-entity overrides follow

[client.backup]
name = client.backup
"#;

    #[test]
    fn test_parse_config() {
        let config = CephConfig::parse(TEST_CONFIG).unwrap();

        assert_eq!(
            config.get("global", "fsid"),
            Some("7150dbe1-1803-44b9-9a3d-b893308fd02e")
        );
        assert_eq!(config.get("client.backup", "name"), Some("client.backup"));

        let mut sections = config.sections();
        sections.sort();
        assert_eq!(sections, vec!["client", "client.backup", "global"]);
    }

    #[test]
    fn test_key_normalization() {
        let config = CephConfig::parse(TEST_CONFIG).unwrap();

        assert_eq!(config.get("global", "auth_client_required"), Some("cephx"));
        assert_eq!(config.get("global", "auth-client-required"), Some("cephx"));
        assert_eq!(config.get("client", "striper data dir"), Some("/var/lib/striper"));
        assert_eq!(normalize_key("  Mon   Host "), "mon_host");
    }

    #[test]
    fn test_trailing_comment_stripped() {
        let config = CephConfig::parse(TEST_CONFIG).unwrap();
        assert_eq!(config.get("global", "rados striper stripe unit"), Some("64K"));
    }

    #[test]
    fn test_get_with_fallback() {
        let config = CephConfig::parse(TEST_CONFIG).unwrap();

        assert_eq!(
            config.get_with_fallback(&["client", "global"], "fsid"),
            Some("7150dbe1-1803-44b9-9a3d-b893308fd02e")
        );
        assert_eq!(
            config.get_with_fallback(&["client", "global"], "nonexistent"),
            None
        );
    }

    #[test]
    fn test_set_overrides() {
        let mut config = CephConfig::parse(TEST_CONFIG).unwrap();
        config.set("client", "striper data dir", "/tmp/other");
        assert_eq!(config.get("client", "striper_data_dir"), Some("/tmp/other"));
    }

    #[test]
    fn test_parse_errors_report_line() {
        let err = CephConfig::parse("[global]\nthis is not an option\n").unwrap_err();
        match err {
            ConfigError::ParseError { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }

        assert!(CephConfig::parse("[global\nkey = value\n").is_err());
        assert!(CephConfig::parse("[global]\n = value\n").is_err());
    }

    #[test]
    fn test_expand_metavariables() {
        let config = CephConfig::parse(TEST_CONFIG).unwrap();
        let keyring = config.get("client", "keyring").unwrap();

        assert_eq!(
            expand_metavariables(keyring, "client.admin"),
            "/etc/ceph/ceph.client.admin.keyring"
        );
        assert_eq!(
            expand_metavariables("/var/run/$type-$id.asok", "client.rgw"),
            "/var/run/client-rgw.asok"
        );
        assert_eq!(expand_metavariables("$host/x", "client.admin"), "$host/x");
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("100").unwrap(), 100);
        assert_eq!(parse_size("100B").unwrap(), 100);
        assert_eq!(parse_size("1K").unwrap(), 1024);
        assert_eq!(parse_size("64KiB").unwrap(), 64 * 1024);
        assert_eq!(parse_size("4M").unwrap(), 4 * 1024 * 1024);
        assert_eq!(parse_size("1G").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_size("1T").unwrap(), 1024 * 1024 * 1024 * 1024);
        assert_eq!(parse_size("100_M").unwrap(), 100 * 1024 * 1024);
        assert_eq!(parse_size("1.5M").unwrap(), (1.5 * 1024.0 * 1024.0) as u64);
        assert!(parse_size("12Q").is_err());
        assert!(parse_size("M").is_err());
    }

    #[test]
    fn test_value_types() {
        assert_eq!(Count::parse_config_value(" 7 ").unwrap().0, 7);
        assert!(Count::parse_config_value("abc").is_err());
        assert!(bool::parse_config_value("Yes").unwrap());
        assert!(!bool::parse_config_value("off").unwrap());
        assert!(bool::parse_config_value("maybe").is_err());
        assert_eq!(String::parse_config_value("cephx").unwrap(), "cephx");
    }

    #[test]
    fn test_config_option_get() {
        let config = CephConfig::parse(TEST_CONFIG).unwrap();

        let opt = ConfigOption::new("rados_striper_stripe_unit", Size(4 << 20));
        assert_eq!(opt.get(&config, &["client", "global"]).unwrap().0, 64 * 1024);
        assert_eq!(opt.name(), "rados_striper_stripe_unit");
        assert_eq!(opt.default_value().0, 4 << 20);

        let opt = ConfigOption::new("rados_striper_stripe_count", Count(1));
        assert_eq!(opt.get(&config, &["client", "global"]).unwrap().0, 1);

        let opt = ConfigOption::new("fsid", Count(0));
        assert!(matches!(
            opt.get(&config, &["global"]),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_define_options_macro() {
        define_options! {
            /// Test options
            pub struct TestOptions {
                /// Stripe unit
                rados_striper_stripe_unit: Size = Size(4 << 20),
                /// Auth mode
                auth_client_required: String = String::from("none"),
                /// Keyring path
                keyring: String = String::new(),
            }
        }

        let defaults = TestOptions::default();
        assert_eq!(defaults.rados_striper_stripe_unit.0, 4 << 20);
        assert_eq!(defaults.auth_client_required, "none");

        let ceph_config = CephConfig::parse(TEST_CONFIG).unwrap();
        let opts = TestOptions::from_ceph_config(&ceph_config, &["client", "global"]).unwrap();
        assert_eq!(opts.rados_striper_stripe_unit.0, 64 * 1024);
        assert_eq!(opts.auth_client_required, "cephx");
        assert_eq!(opts.keyring, "/etc/ceph/$cluster.$name.keyring");

        let opts = TestOptions::from_ceph_config(&ceph_config, &["mon"]).unwrap();
        assert_eq!(opts.keyring, "");

        assert_eq!(TestOptions::option_names().len(), 3);
    }
}
