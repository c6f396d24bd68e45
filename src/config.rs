//! Node configuration loading (§10.1, §6's CLI/config surface).
//!
//! Grounded on `control::config::ControlConfig::load`: a `Deserialize`
//! struct with `rename_all = "kebab-case"`, loaded by reading the file
//! and parsing with `toml::from_str`, with both failure modes turned into
//! a descriptive error rather than a panic.

use crate::address::{AddressRegistry, NodeAddr};
use crate::crypto::KeyRing;
use crate::error::MeshError;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// RSA key material for this node: its own private key (to decrypt
/// inbound envelopes) and the public key of every peer it may need to
/// encrypt for, matching the actual key-transport directionality
/// `crypto::KeyRing` implements — see the open-question note in the
/// grounding ledger.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RsaKeyConfig {
    pub own_private_pem: Option<String>,
    #[serde(default)]
    pub peer_public_pems: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NodeConfig {
    pub my_addr: NodeAddr,
    #[serde(default)]
    pub is_command_center: bool,
    #[serde(default)]
    pub initial_path: Vec<NodeAddr>,
    #[serde(default)]
    pub dynamic_path: bool,
    #[serde(default)]
    pub encryption_enabled: bool,
    #[serde(default)]
    pub rsa_keys: Option<RsaKeyConfig>,
    #[serde(default)]
    pub command_centers: Vec<NodeAddr>,
    pub uploader_endpoint: Option<String>,
    pub uploader_api_key: Option<String>,
}

impl NodeConfig {
    /// Loads and parses a TOML config file, failing fast (§7's
    /// `ConfigError`: "before any radio/task is spawned") rather than
    /// leaving the node half-initialized.
    pub fn load(path: &Path) -> Result<Self, MeshError> {
        let content = std::fs::read_to_string(path).map_err(|e| MeshError::ConfigError(format!("failed to read config file {}: {e}", path.display())))?;
        toml::from_str(&content).map_err(|e| MeshError::ConfigError(format!("failed to parse config file {}: {e}", path.display())))
    }

    pub fn address_registry(&self) -> AddressRegistry {
        AddressRegistry::new(self.command_centers.clone())
    }

    /// Builds the RSA key ring from the config's PEM material, if
    /// encryption is enabled. Returns `Ok(None)` when encryption is
    /// disabled, so callers don't have to special-case an empty ring.
    pub fn build_keyring(&self) -> Result<Option<KeyRing>, MeshError> {
        if !self.encryption_enabled {
            return Ok(None);
        }
        let keys = self.rsa_keys.as_ref().ok_or_else(|| MeshError::ConfigError("encryption-enabled is true but no [rsa-keys] table was provided".into()))?;
        let mut ring = KeyRing::new();
        if let Some(pem) = &keys.own_private_pem {
            ring = ring.with_own_private_pem(pem)?;
        }
        for (addr_str, pem) in &keys.peer_public_pems {
            let addr: NodeAddr = addr_str.parse().map_err(|_| MeshError::ConfigError(format!("invalid peer address key '{addr_str}' in [rsa-keys.peer-public-pems]")))?;
            ring = ring.with_peer_public_pem(addr, pem)?;
        }
        Ok(Some(ring))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn loads_minimal_config() {
        let f = write_temp(
            r#"
            my-addr = 5
            is-command-center = false
            "#,
        );
        let cfg = NodeConfig::load(f.path()).unwrap();
        assert_eq!(cfg.my_addr, 5);
        assert!(!cfg.is_command_center);
        assert!(cfg.initial_path.is_empty());
        assert!(!cfg.encryption_enabled);
    }

    #[test]
    fn loads_full_config_with_command_centers_and_path() {
        let f = write_temp(
            r#"
            my-addr = 1
            is-command-center = false
            initial-path = [2, 9]
            dynamic-path = true
            encryption-enabled = false
            command-centers = [9, 223]
            "#,
        );
        let cfg = NodeConfig::load(f.path()).unwrap();
        assert_eq!(cfg.initial_path, vec![2, 9]);
        assert!(cfg.dynamic_path);
        let registry = cfg.address_registry();
        assert!(registry.is_command_center(9));
        assert!(registry.is_command_center(223));
        assert!(!registry.is_command_center(1));
    }

    #[test]
    fn missing_file_is_a_config_error_not_a_panic() {
        let result = NodeConfig::load(Path::new("/nonexistent/path/config.toml"));
        assert!(matches!(result, Err(MeshError::ConfigError(_))));
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let f = write_temp("this is not valid toml {{{");
        assert!(matches!(NodeConfig::load(f.path()), Err(MeshError::ConfigError(_))));
    }

    #[test]
    fn encryption_enabled_without_keys_table_is_an_error() {
        let f = write_temp(
            r#"
            my-addr = 1
            encryption-enabled = true
            "#,
        );
        let cfg = NodeConfig::load(f.path()).unwrap();
        assert!(matches!(cfg.build_keyring(), Err(MeshError::ConfigError(_))));
    }

    #[test]
    fn encryption_disabled_skips_keyring_entirely() {
        let f = write_temp(
            r#"
            my-addr = 1
            encryption-enabled = false
            "#,
        );
        let cfg = NodeConfig::load(f.path()).unwrap();
        assert!(cfg.build_keyring().unwrap().is_none());
    }
}
