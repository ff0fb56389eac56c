//! Ceph keyring file parsing and the shared authentication check
//!
//! ```text
//! [client.admin]
//!     key = AQD8J8JoSpspNhAAU49nK6K8fO4MgTYFnrk+HQ==
//!     caps mon = "allow *"
//! ```

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::StriperOptions;
use crate::store::{StoreError, StoreResult};

#[derive(Debug, Error)]
pub enum KeyringError {
    #[error("Failed to read keyring file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid key for {entity}: {message}")]
    InvalidKey { entity: String, message: String },
}

/// Parsed keyring: entity name to secret and capabilities
#[derive(Debug, Clone, Default)]
pub struct Keyring {
    keys: HashMap<String, Bytes>,
    caps: HashMap<String, HashMap<String, String>>,
}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, KeyringError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_string(&content)
    }

    pub fn from_string(content: &str) -> Result<Self, KeyringError> {
        let mut keyring = Keyring::new();
        let mut current_entity: Option<String> = None;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(entity) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                current_entity = Some(entity.trim().to_string());
                continue;
            }

            let (Some(entity), Some((key, value))) = (&current_entity, line.split_once('=')) else {
                warn!("Ignoring keyring line outside an entity: {}", line);
                continue;
            };

            match key.trim() {
                "key" => keyring.add_key(entity, value.trim())?,
                key if key.starts_with("caps ") => {
                    keyring
                        .caps
                        .entry(entity.clone())
                        .or_default()
                        .insert(key["caps ".len()..].trim().to_string(), value.trim().to_string());
                }
                other => warn!("Unknown keyring field: {}", other),
            }
        }

        debug!("Loaded {} keys from keyring", keyring.keys.len());
        Ok(keyring)
    }

    /// Add (or replace) the base64 secret of an entity
    pub fn add_key(&mut self, entity: &str, key_b64: &str) -> Result<(), KeyringError> {
        let secret = STANDARD
            .decode(key_b64)
            .map_err(|e| KeyringError::InvalidKey {
                entity: entity.to_string(),
                message: e.to_string(),
            })?;
        if secret.is_empty() {
            return Err(KeyringError::InvalidKey {
                entity: entity.to_string(),
                message: "empty secret".to_string(),
            });
        }

        self.keys.insert(entity.to_string(), Bytes::from(secret));
        Ok(())
    }

    pub fn get_key(&self, entity: &str) -> Option<&Bytes> {
        self.keys.get(entity)
    }

    pub fn get_caps(&self, entity: &str, service: &str) -> Option<&str> {
        self.caps.get(entity)?.get(service).map(String::as_str)
    }

    pub fn has_entity(&self, entity: &str) -> bool {
        self.keys.contains_key(entity)
    }

    pub fn entities(&self) -> impl Iterator<Item = &String> {
        self.keys.keys()
    }
}

/// Check the client's credentials against the keyring a store trusts
///
/// A store without a keyring accepts every client.
pub(crate) fn authenticate(
    options: &StriperOptions,
    store_keyring: Option<&Keyring>,
) -> StoreResult<()> {
    if !options.auth_required() {
        debug!("Authentication disabled for {}", options.name);
        return Ok(());
    }

    let path = options.keyring_path().ok_or_else(|| {
        StoreError::PermissionDenied(format!("no keyring configured for {}", options.name))
    })?;
    let client = Keyring::from_file(&path).map_err(|e| {
        StoreError::PermissionDenied(format!("keyring {}: {}", path.display(), e))
    })?;
    let secret = client.get_key(&options.name).ok_or_else(|| {
        StoreError::PermissionDenied(format!(
            "no key for {} in {}",
            options.name,
            path.display()
        ))
    })?;

    if let Some(trusted) = store_keyring {
        if trusted.get_key(&options.name) != Some(secret) {
            return Err(StoreError::PermissionDenied(format!(
                "{} is not known to the store",
                options.name
            )));
        }
    }

    info!("Authenticated as {}", options.name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEYRING: &str = r#"
[client.admin]
    key = AQD8J8JoSpspNhAAU49nK6K8fO4MgTYFnrk+HQ==
    caps mon = "allow *"
    caps osd = "allow *"

[client.test]
    key = AQABCDEFghijklmnU49nK6K8fO4MgTYFnrk+HQ==
    caps osd = "allow rw pool=test"
"#;

    #[test]
    fn test_parse_keyring() {
        let keyring = Keyring::from_string(KEYRING).unwrap();

        assert!(keyring.has_entity("client.admin"));
        assert!(keyring.has_entity("client.test"));
        assert!(!keyring.has_entity("client.nobody"));
        assert_eq!(keyring.get_key("client.admin").unwrap().len(), 28);
        assert_eq!(keyring.get_caps("client.admin", "mon"), Some("\"allow *\""));
        assert_eq!(
            keyring.get_caps("client.test", "osd"),
            Some("\"allow rw pool=test\"")
        );
        assert_eq!(keyring.entities().count(), 2);
    }

    #[test]
    fn test_invalid_key_rejected() {
        let err = Keyring::from_string("[client.bad]\nkey = not*base64\n").unwrap_err();
        assert!(matches!(err, KeyringError::InvalidKey { .. }));

        let mut keyring = Keyring::new();
        assert!(keyring.add_key("client.empty", "").is_err());
    }

    fn write_keyring(content: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("striper-keyring-{}", uuid::Uuid::new_v4()));
        std::fs::write(&path, content).unwrap();
        path
    }

    fn options_with_keyring(path: &Path) -> StriperOptions {
        StriperOptions {
            keyring: path.display().to_string(),
            ..StriperOptions::default()
        }
    }

    #[test]
    fn test_authenticate() {
        let path = write_keyring(KEYRING);
        let options = options_with_keyring(&path);
        let trusted = Keyring::from_string(KEYRING).unwrap();

        assert!(authenticate(&options, None).is_ok());
        assert!(authenticate(&options, Some(&trusted)).is_ok());

        let mut other = Keyring::new();
        other
            .add_key("client.admin", "AQABCDEFghijklmnU49nK6K8fO4MgTYFnrk+HQ==")
            .unwrap();
        assert!(matches!(
            authenticate(&options, Some(&other)),
            Err(StoreError::PermissionDenied(_))
        ));

        let stranger = StriperOptions {
            name: "client.nobody".to_string(),
            ..options.clone()
        };
        assert!(authenticate(&stranger, None).is_err());

        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_authenticate_missing_keyring() {
        let options = StriperOptions {
            keyring: "/nonexistent/keyring".to_string(),
            ..StriperOptions::default()
        };
        assert!(matches!(
            authenticate(&options, None),
            Err(StoreError::PermissionDenied(_))
        ));

        let disabled = StriperOptions {
            auth_client_required: "none".to_string(),
            ..options
        };
        assert!(authenticate(&disabled, None).is_ok());
    }
}
