//! Client options read from ceph.conf
//!
//! Options are looked up in the entity's own section (`[client.admin]`), then
//! `[client]`, then `[global]`.

use cephconfig::{define_options, expand_metavariables, CephConfig, ConfigError, Count, Size};
use std::path::PathBuf;

use crate::store::StripeLayout;

define_options! {
    /// Options consumed by the striping layer and the stores it talks to
    pub struct StriperOptions {
        /// Entity this client authenticates as
        name: String = String::from("client.admin"),

        /// Keyring holding the entity's secret (metavariables allowed)
        keyring: String = String::from("/etc/ceph/$cluster.$name.keyring"),

        /// `cephx` or `none`
        auth_client_required: String = String::from("cephx"),

        /// Layout used for newly created objects
        rados_striper_stripe_unit: Size = Size(4 << 20),
        rados_striper_stripe_count: Count = Count(1),
        rados_striper_object_size: Size = Size(4 << 20),

        /// First buffer size tried by getxattr
        striper_xattr_initial_size: Size = Size(4096),

        /// Largest xattr value getxattr will grow its buffer to
        striper_xattr_max_size: Size = Size(1 << 20),

        /// Chunk size of the chunked write strategy
        striper_write_chunk_size: Size = Size(64 << 10),

        /// Largest single write request a store accepts
        striper_max_write_size: Size = Size(90 << 20),

        /// Root directory of the filesystem store
        striper_data_dir: String = String::new(),
    }
}

impl StriperOptions {
    /// Load options for the entity configured in `config`
    pub fn load(config: &CephConfig) -> Result<Self, ConfigError> {
        let entity = config
            .get_with_fallback(&["client", "global"], "name")
            .unwrap_or("client.admin")
            .to_string();

        let options = Self::from_ceph_config(config, &[entity.as_str(), "client", "global"])?;
        options.validate()?;
        Ok(options)
    }

    /// Check cross-option constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.layout()?;

        let initial = self.striper_xattr_initial_size.0;
        if initial == 0 || initial > self.striper_xattr_max_size.0 {
            return Err(ConfigError::InvalidValue {
                option: "striper_xattr_initial_size".to_string(),
                message: format!(
                    "must be between 1 and striper_xattr_max_size ({})",
                    self.striper_xattr_max_size.0
                ),
            });
        }

        if self.striper_write_chunk_size.0 == 0 {
            return Err(ConfigError::InvalidValue {
                option: "striper_write_chunk_size".to_string(),
                message: "must be non-zero".to_string(),
            });
        }

        match self.auth_client_required.as_str() {
            "cephx" | "none" => Ok(()),
            other => Err(ConfigError::InvalidValue {
                option: "auth_client_required".to_string(),
                message: format!("unsupported auth method {:?}", other),
            }),
        }
    }

    /// Layout for newly created objects
    pub fn layout(&self) -> Result<StripeLayout, ConfigError> {
        StripeLayout::new(
            self.rados_striper_stripe_unit.0,
            self.rados_striper_stripe_count.0,
            self.rados_striper_object_size.0,
        )
        .map_err(|e| ConfigError::InvalidValue {
            option: "rados_striper_object_size".to_string(),
            message: e.to_string(),
        })
    }

    /// Whether the client has to prove its identity
    pub fn auth_required(&self) -> bool {
        self.auth_client_required == "cephx"
    }

    /// Keyring path with metavariables expanded
    pub fn keyring_path(&self) -> Option<PathBuf> {
        if self.keyring.is_empty() {
            return None;
        }
        Some(PathBuf::from(expand_metavariables(&self.keyring, &self.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = StriperOptions::load(&CephConfig::default()).unwrap();

        assert_eq!(options.name, "client.admin");
        assert!(options.auth_required());
        assert_eq!(
            options.layout().unwrap(),
            StripeLayout::new(4 << 20, 1, 4 << 20).unwrap()
        );
        assert_eq!(
            options.keyring_path().unwrap(),
            PathBuf::from("/etc/ceph/ceph.client.admin.keyring")
        );
    }

    #[test]
    fn test_entity_section_wins() {
        let config = CephConfig::parse(
            r#"
[global]
rados striper stripe unit = 1M
rados striper object size = 4M

[client]
name = client.backup

[client.backup]
rados striper stripe unit = 512K
auth client required = none
"#,
        )
        .unwrap();

        let options = StriperOptions::load(&config).unwrap();
        assert_eq!(options.name, "client.backup");
        assert_eq!(options.rados_striper_stripe_unit.0, 512 << 10);
        assert_eq!(options.rados_striper_object_size.0, 4 << 20);
        assert!(!options.auth_required());
    }

    #[test]
    fn test_invalid_layout_rejected() {
        let config = CephConfig::parse(
            "[global]\nrados striper stripe unit = 3M\nrados striper object size = 4M\n",
        )
        .unwrap();

        assert!(matches!(
            StriperOptions::load(&config),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_invalid_auth_and_xattr_sizes_rejected() {
        let config = CephConfig::parse("[global]\nauth client required = kerberos\n").unwrap();
        assert!(StriperOptions::load(&config).is_err());

        let config = CephConfig::parse(
            "[global]\nstriper xattr initial size = 2M\nstriper xattr max size = 1M\n",
        )
        .unwrap();
        assert!(StriperOptions::load(&config).is_err());
    }
}
