//! Types for `uv.lock`.
//!
//! The lockfile is the already-solved transitive dependency graph of the
//! extension; only the shape consumed downstream is modeled, unknown fields
//! are ignored.

use anyhow::{bail, Context};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(serde::Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct UvLock {
    pub version: u64,
    #[serde(default)]
    pub package: Vec<Package>,
    /// Only present for single-file scripts.
    pub manifest: Option<Manifest>,
}

impl UvLock {
    pub fn from_str(data: &str) -> anyhow::Result<Self> {
        let lockfile: Self = toml::from_str(data)?;
        if lockfile.version != 1 {
            bail!("Unsupported uv.lock version {}", lockfile.version);
        }
        Ok(lockfile)
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let data = fs_err::read_to_string(path)
            .with_context(|| format!("Failed to read the lockfile at {}", path.display()))?;
        Self::from_str(&data)
            .with_context(|| format!("Invalid lockfile at {}", path.display()))
    }
}

/// `[[package]]`
#[derive(serde::Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Package {
    pub name: String,
    pub version: String,
    pub source: Option<Source>,
    /// Presence (even empty) marks a package installable from wheels.
    pub wheels: Option<Vec<WheelEntry>>,
    #[serde(default)]
    pub dependencies: Vec<DependencyEntry>,
    /// The lockfile has already chosen which optional groups apply; groups it
    /// did not include are simply absent, so all listed groups are active.
    #[serde(default)]
    pub optional_dependencies: BTreeMap<String, Vec<DependencyEntry>>,
    pub metadata: Option<Metadata>,
}

/// `[package.source]`
#[derive(serde::Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Source {
    pub registry: Option<String>,
    #[serde(rename = "virtual")]
    pub virtual_: Option<String>,
    pub editable: Option<String>,
}

/// `[[package.wheels]]`, e.g.
/// `{ url = "https://.../tqdm-4.66.2-py3-none-any.whl", hash = "sha256:...", size = 78268 }`
#[derive(serde::Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct WheelEntry {
    pub url: Option<String>,
    pub hash: Option<String>,
    pub size: Option<u64>,
}

/// A dependency reference with an optional environment marker.
///
/// `version` pins the exact resolved version when several versions of the
/// same package coexist in the lockfile; `requires-dist` entries carry a
/// `specifier` range instead.
#[derive(serde::Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct DependencyEntry {
    pub name: String,
    pub version: Option<String>,
    pub specifier: Option<String>,
    pub marker: Option<String>,
}

/// `[package.metadata]`
#[derive(serde::Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Metadata {
    #[serde(default)]
    pub requires_dist: Vec<DependencyEntry>,
}

/// `[manifest]`: the top-level requirements of a single-file script.
#[derive(serde::Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Manifest {
    #[serde(default)]
    pub requirements: Vec<DependencyEntry>,
}
