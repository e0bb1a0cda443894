//! Region shards and the strategies that map call arguments onto one.
//!
//! Resolvers are supplied per-method by the contract author. A resolution
//! miss (`MappingNotFound`) is recoverable only for methods declared with an
//! optional return; the dispatch engine owns that distinction.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::schema::ArgumentMap;

/// A topology shard. `address` is `None` for the region this process runs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub name: String,
    pub address: Option<String>,
}

impl Region {
    pub fn new(name: impl Into<String>, address: Option<String>) -> Region {
        Region {
            name: name.into(),
            address,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegionResolutionError {
    /// The arguments name an entity with no region mapping. Legitimate for
    /// deleted or unmapped entities; the caller's return type decides whether
    /// it is recoverable.
    #[error("no region mapping for the supplied arguments")]
    MappingNotFound,
    #[error("region resolution misconfigured: {0}")]
    Misconfigured(String),
}

/// Maps a set of call arguments to a target region.
pub trait RegionResolver: Send + Sync {
    fn resolve(&self, args: &ArgumentMap) -> Result<Region, RegionResolutionError>;
}

/// Read-only directory of configured regions, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct RegionDirectory {
    regions: HashMap<String, Region>,
}

impl RegionDirectory {
    pub fn new(
        regions: impl IntoIterator<Item = Region>,
    ) -> Result<RegionDirectory, RegionResolutionError> {
        let mut table = HashMap::new();
        for region in regions {
            if table.insert(region.name.clone(), region.clone()).is_some() {
                return Err(RegionResolutionError::Misconfigured(format!(
                    "duplicate region name `{}`",
                    region.name
                )));
            }
        }
        Ok(RegionDirectory { regions: table })
    }

    pub fn get(&self, name: &str) -> Option<&Region> {
        self.regions.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.regions.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

/// Always resolves to one fixed region.
pub struct FixedRegion(pub Region);

impl RegionResolver for FixedRegion {
    fn resolve(&self, _args: &ArgumentMap) -> Result<Region, RegionResolutionError> {
        Ok(self.0.clone())
    }
}

/// Resolves from an argument that carries a region name directly.
pub struct ByRegionNameArg {
    pub param: &'static str,
    pub directory: Arc<RegionDirectory>,
}

impl RegionResolver for ByRegionNameArg {
    fn resolve(&self, args: &ArgumentMap) -> Result<Region, RegionResolutionError> {
        let name = args
            .get(self.param)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                RegionResolutionError::Misconfigured(format!(
                    "resolver expects a string argument `{}`",
                    self.param
                ))
            })?;
        self.directory
            .get(name)
            .cloned()
            .ok_or(RegionResolutionError::MappingNotFound)
    }
}

/// Seam for entity-to-region lookups (organization tables and the like live
/// behind this trait, outside the dispatch layer).
pub trait RegionMapping: Send + Sync {
    fn region_for(&self, key: &Value) -> Option<Region>;
}

/// Resolves by feeding one argument through a [`RegionMapping`].
pub struct ByMappingKey {
    pub param: &'static str,
    pub mapping: Arc<dyn RegionMapping>,
}

impl RegionResolver for ByMappingKey {
    fn resolve(&self, args: &ArgumentMap) -> Result<Region, RegionResolutionError> {
        let key = args.get(self.param).ok_or_else(|| {
            RegionResolutionError::Misconfigured(format!(
                "resolver expects an argument `{}`",
                self.param
            ))
        })?;
        self.mapping
            .region_for(key)
            .ok_or(RegionResolutionError::MappingNotFound)
    }
}
