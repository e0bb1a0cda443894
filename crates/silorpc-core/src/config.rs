//! RPC configuration surface: topology mode, control-plane address, shared
//! secrets, and the static region directory.
//!
//! Config is TOML on disk, validated against the generated JSON schema
//! before deserialization so operators get every violation in one pass.

use anyhow::Result;
use jsonschema::{validator_for, Validator};
use once_cell::sync::Lazy;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::auth::{AuthError, RequestSigner};
use crate::region::{Region, RegionDirectory, RegionResolutionError};
use crate::topology::TopologyMode;

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct TopologyConfig {
    /// One of `monolith`, `control`, `region`.
    #[serde(default = "default_mode")]
    pub mode: TopologyMode,
    /// Address of the control-plane silo, required for any remote call to a
    /// control-affinity service.
    #[serde(default)]
    pub control_address: Option<String>,
}

fn default_mode() -> TopologyMode {
    TopologyMode::Monolith
}

impl Default for TopologyConfig {
    fn default() -> Self {
        TopologyConfig {
            mode: default_mode(),
            control_address: None,
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct AuthConfig {
    /// Rotation order matters: index 0 signs, every index verifies.
    #[serde(default)]
    pub shared_secrets: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct RegionConfig {
    pub name: String,
    /// Network locator for remote calls; omit for the region this process
    /// runs in.
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct RpcConfig {
    #[serde(default)]
    pub topology: TopologyConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub regions: Vec<RegionConfig>,
}

static CONFIG_SCHEMA: Lazy<Validator> = Lazy::new(|| {
    let schema = schemars::schema_for!(RpcConfig);
    let schema_value = serde_json::to_value(&schema).expect("schema value");
    validator_for(&schema_value).expect("valid schema")
});

/// JSON schema describing the configuration structure.
pub fn config_schema_json() -> serde_json::Value {
    let schema = schemars::schema_for!(RpcConfig);
    serde_json::to_value(&schema).expect("schema json")
}

/// Load and validate a TOML config file.
pub fn load_config(path: &str) -> Result<RpcConfig> {
    let content = std::fs::read_to_string(path)?;
    let raw: toml::Value = toml::from_str(&content)?;
    let json_value = serde_json::to_value(&raw)?;
    let validation_errors: Vec<String> = CONFIG_SCHEMA
        .iter_errors(&json_value)
        .map(|e| e.to_string())
        .collect();
    if !validation_errors.is_empty() {
        anyhow::bail!(
            "invalid rpc config `{path}`: {}",
            validation_errors.join("; ")
        );
    }
    let config: RpcConfig = serde_json::from_value(json_value)?;
    Ok(config)
}

impl RpcConfig {
    pub fn mode(&self) -> TopologyMode {
        self.topology.mode
    }

    pub fn signer(&self) -> Result<RequestSigner, AuthError> {
        RequestSigner::new(self.auth.shared_secrets.clone())
    }

    pub fn region_directory(&self) -> Result<RegionDirectory, RegionResolutionError> {
        RegionDirectory::new(
            self.regions
                .iter()
                .map(|r| Region::new(r.name.clone(), r.address.clone())),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(raw: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(raw.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_a_full_config() {
        let file = write_config(
            r#"
[topology]
mode = "region"
control_address = "https://control.internal"

[auth]
shared_secrets = ["new", "old"]

[[regions]]
name = "us"
address = "https://us.internal"

[[regions]]
name = "de"
"#,
        );
        let config = load_config(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.mode(), TopologyMode::Region);
        assert_eq!(
            config.topology.control_address.as_deref(),
            Some("https://control.internal")
        );
        let directory = config.region_directory().unwrap();
        assert_eq!(directory.names(), vec!["de", "us"]);
        assert!(directory.get("de").unwrap().address.is_none());
        assert!(config.signer().is_ok());
    }

    #[test]
    fn empty_config_defaults_to_monolith() {
        let file = write_config("");
        let config = load_config(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.mode(), TopologyMode::Monolith);
        assert!(config.regions.is_empty());
    }

    #[test]
    fn missing_secrets_surface_through_signer() {
        let file = write_config("");
        let config = load_config(file.path().to_str().unwrap()).unwrap();
        assert!(matches!(
            config.signer(),
            Err(AuthError::NoSecretsConfigured)
        ));
    }

    #[test]
    fn rejects_unknown_topology_mode() {
        let file = write_config("[topology]\nmode = \"edge\"\n");
        assert!(load_config(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn duplicate_region_names_are_rejected() {
        let file = write_config(
            "[[regions]]\nname = \"us\"\n\n[[regions]]\nname = \"us\"\n",
        );
        let config = load_config(file.path().to_str().unwrap()).unwrap();
        assert!(config.region_directory().is_err());
    }
}
