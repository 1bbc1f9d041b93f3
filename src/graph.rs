//! The dependency graph of an extension, built from the lockfile.
//!
//! Nodes are `(package, version)` pairs held in an arena; edges are integer
//! index pairs carrying an optional environment marker. An arena keeps
//! marker-filtered traversal cheap and cycle-safe even if a pathological
//! lockfile presents a cycle.

use crate::lockfile::{DependencyEntry, UvLock};
use crate::markers::marker_is_valid_for;
use crate::releases::BLVersion;
use anyhow::Context;
use pep440_rs::{Version, VersionSpecifiers};
use pep508_rs::MarkerTree;
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use wheel_compat_rs::{normalize_name, BLPlatform, Wheel};

/// One installable Python dependency from the lockfile.
#[derive(Debug, Clone)]
pub struct PyDep {
    /// PEP 503 normalized.
    pub name: String,
    /// PEP 440 canonical.
    pub version: Version,
    pub registry: String,
    pub wheels: Vec<Wheel>,
}

#[derive(Debug, Clone)]
struct Edge {
    /// The dependent package.
    downstream: usize,
    /// The package it depends on.
    upstream: usize,
    marker: Option<MarkerTree>,
}

#[derive(Debug, Clone)]
struct Target {
    name: String,
    specifier: Option<VersionSpecifiers>,
    marker: Option<MarkerTree>,
}

#[derive(Debug, Clone)]
pub struct VendoredConflict {
    pub name: String,
    pub requested: Version,
    pub vendored: Vec<Version>,
}

#[derive(Error, Debug)]
pub enum GraphError {
    #[error(
        "None of the requested platforms ({bl_platforms}) are supported by Blender {bl_version}"
    )]
    PlatformNotSupported {
        bl_version: String,
        bl_platforms: String,
    },
    #[error("{0}")]
    VendoringConflict(VendoringConflictReport),
}

/// The itemized report for dependencies that clash with Blender's own
/// vendored `site-packages`.
#[derive(Debug, Clone)]
pub struct VendoringConflictReport {
    pub bl_version: String,
    pub conflicts: Vec<VendoredConflict>,
}

impl fmt::Display for VendoringConflictReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for conflict in &self.conflicts {
            writeln!(
                f,
                "Requested version of {} conflicts with the vendored site-packages of Blender {}:",
                conflict.name, self.bl_version,
            )?;
            for vendored in &conflict.vendored {
                writeln!(
                    f,
                    "  Provided by Blender {}: {}=={}",
                    self.bl_version, conflict.name, vendored,
                )?;
            }
            writeln!(f, "  Requested: {}=={}", conflict.name, conflict.requested)?;
        }
        Ok(())
    }
}

/// The whole dependency graph plus the constraint overrides the project may
/// declare on top of the per-version defaults.
#[derive(Debug, Clone, Default)]
pub struct DepGraph {
    nodes: Vec<PyDep>,
    edges: Vec<Edge>,
    targets: Vec<Target>,

    pub min_glibc_version: Option<(u16, u16)>,
    pub min_macos_version: Option<(u16, u16)>,
    pub valid_python_tags: Option<BTreeSet<String>>,
    pub valid_abi_tags: Option<BTreeSet<String>>,
}

impl DepGraph {
    /// Build the graph from a parsed lockfile.
    ///
    /// `module_name` is the extension's own package name; the root package is
    /// deliberately excluded from the node set. Top-level targets come from
    /// the root package's `requires-dist` metadata, or from the `[manifest]`
    /// table for single-file scripts.
    pub fn from_uv_lock(uv_lock: &UvLock, module_name: &str) -> anyhow::Result<Self> {
        let module_name = normalize_name(module_name);

        let mut nodes = Vec::new();
        for package in &uv_lock.package {
            let registry = match package.source.as_ref().and_then(|s| s.registry.as_ref()) {
                Some(registry) => registry.clone(),
                None => continue,
            };
            let wheel_entries = match &package.wheels {
                Some(wheel_entries) => wheel_entries,
                None => continue,
            };
            let name = normalize_name(&package.name);
            if name == module_name {
                continue;
            }

            let mut wheels = Vec::new();
            for entry in wheel_entries {
                let url = match &entry.url {
                    Some(url) => url.clone(),
                    None => continue,
                };
                let hash = entry.hash.clone().with_context(|| {
                    format!("Wheel of {} {} has no hash", package.name, package.version)
                })?;
                let size = entry.size.with_context(|| {
                    format!("Wheel of {} {} has no size", package.name, package.version)
                })?;
                let wheel = Wheel {
                    url,
                    registry: registry.clone(),
                    hash,
                    size,
                };
                // Parse eagerly so bad filenames fail at load time.
                wheel.parsed_filename().with_context(|| {
                    format!(
                        "Couldn't parse a wheel filename of {} {} in the lockfile",
                        package.name, package.version,
                    )
                })?;
                wheels.push(wheel);
            }

            let version = Version::from_str(&package.version).map_err(|err| {
                anyhow::anyhow!(
                    "Invalid version `{}` for package {} in the lockfile: {}",
                    package.version,
                    package.name,
                    err,
                )
            })?;
            nodes.push(PyDep {
                name,
                version,
                registry,
                wheels,
            });
        }

        // Dependency edges: mandatory dependencies plus every listed
        // optional-dependency group (the lockfile already chose which apply).
        let mut edges = Vec::new();
        for package in &uv_lock.package {
            let downstream_name = normalize_name(&package.name);
            let downstream_indices: Vec<usize> = nodes
                .iter()
                .enumerate()
                .filter(|(_, node)| node.name == downstream_name)
                .map(|(idx, _)| idx)
                .collect();
            if downstream_indices.is_empty() {
                continue;
            }
            let dependency_entries = package
                .dependencies
                .iter()
                .chain(package.optional_dependencies.values().flatten());
            for entry in dependency_entries {
                let marker = parse_marker(entry)?;
                let upstream_name = normalize_name(&entry.name);
                for (upstream, node) in nodes.iter().enumerate() {
                    if node.name != upstream_name {
                        continue;
                    }
                    if let Some(version) = &entry.version {
                        if Version::from_str(version)
                            .map(|version| version != node.version)
                            .unwrap_or(false)
                        {
                            continue;
                        }
                    }
                    for &downstream in &downstream_indices {
                        edges.push(Edge {
                            downstream,
                            upstream,
                            marker: marker.clone(),
                        });
                    }
                }
            }
        }

        // Top-level targets.
        let mut targets = Vec::new();
        if let Some(manifest) = &uv_lock.manifest {
            for entry in &manifest.requirements {
                targets.push(Target {
                    name: normalize_name(&entry.name),
                    specifier: parse_specifier(entry)?,
                    marker: parse_marker(entry)?,
                });
            }
        } else {
            let root_package = uv_lock
                .package
                .iter()
                .find(|package| normalize_name(&package.name) == module_name)
                .with_context(|| {
                    format!(
                        "The lockfile has no root package named `{}`; was it generated for this project?",
                        module_name,
                    )
                })?;
            if let Some(metadata) = &root_package.metadata {
                for entry in &metadata.requires_dist {
                    targets.push(Target {
                        name: normalize_name(&entry.name),
                        specifier: parse_specifier(entry)?,
                        marker: parse_marker(entry)?,
                    });
                }
            }
        }

        Ok(DepGraph {
            nodes,
            edges,
            targets,
            ..DepGraph::default()
        })
    }

    pub fn node(&self, idx: usize) -> &PyDep {
        &self.nodes[idx]
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Names of the top-level dependencies from which `idx` is reachable.
    /// Used in diagnostics to point at the declaration that pulled a
    /// dependency in.
    pub fn targets_reaching(&self, idx: usize) -> Vec<String> {
        let mut reaching = BTreeSet::new();
        for target in &self.targets {
            let start: Vec<usize> = self.nodes_matching(target);
            if self.reachable(&start, None, None, None).contains(&idx) {
                reaching.insert(target.name.clone());
            }
        }
        reaching.into_iter().collect()
    }

    /// The live dependency set for `(pkg_name, bl_version, bl_platforms)`:
    /// targets whose marker holds under at least one requested platform,
    /// together with everything reachable from them over marker-filtered
    /// edges. Dependencies equal to a Blender-vendored version are dropped;
    /// version mismatches abort with an itemized conflict report.
    pub fn live_dep_indices(
        &self,
        pkg_name: &str,
        bl_version: &BLVersion,
        bl_platforms: &BTreeSet<BLPlatform>,
    ) -> anyhow::Result<Vec<usize>> {
        if !bl_platforms
            .iter()
            .any(|bl_platform| bl_version.valid_bl_platforms.contains(bl_platform))
        {
            return Err(GraphError::PlatformNotSupported {
                bl_version: bl_version.version_string(),
                bl_platforms: bl_platforms
                    .iter()
                    .map(|p| p.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            }
            .into());
        }

        let mut start = Vec::new();
        for target in &self.targets {
            let marker_holds = match &target.marker {
                None => true,
                Some(marker) => bl_platforms.iter().try_fold(false, |acc, &bl_platform| {
                    anyhow::Ok(
                        acc || marker_is_valid_for(marker, bl_version, bl_platform, pkg_name)?,
                    )
                })?,
            };
            if marker_holds {
                start.extend(self.nodes_matching(target));
            }
        }

        let live = self.reachable(
            &start,
            Some(pkg_name),
            Some(bl_version),
            Some(bl_platforms),
        );

        let mut conflicts = Vec::new();
        let mut live_indices = Vec::new();
        for idx in live {
            let node = &self.nodes[idx];
            match bl_version.vendored_site_packages.get(&node.name) {
                Some(vendored) if vendored.iter().all(|v| *v == node.version) => {
                    // Blender already ships it; nothing to vendor.
                }
                Some(vendored) => conflicts.push(VendoredConflict {
                    name: node.name.clone(),
                    requested: node.version.clone(),
                    vendored: vendored.iter().cloned().collect(),
                }),
                None => live_indices.push(idx),
            }
        }

        if !conflicts.is_empty() {
            return Err(GraphError::VendoringConflict(VendoringConflictReport {
                bl_version: bl_version.version_string(),
                conflicts,
            })
            .into());
        }

        live_indices.sort_by(|&a, &b| {
            (&self.nodes[a].name, &self.nodes[a].version)
                .cmp(&(&self.nodes[b].name, &self.nodes[b].version))
        });
        Ok(live_indices)
    }

    fn nodes_matching(&self, target: &Target) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| {
                node.name == target.name
                    && target
                        .specifier
                        .as_ref()
                        .map(|specifier| specifier.contains(&node.version))
                        .unwrap_or(true)
            })
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Breadth-first closure over the edge relation. When an environment is
    /// given, edges whose marker is false under every requested platform are
    /// removed first.
    fn reachable(
        &self,
        start: &[usize],
        pkg_name: Option<&str>,
        bl_version: Option<&BLVersion>,
        bl_platforms: Option<&BTreeSet<BLPlatform>>,
    ) -> BTreeSet<usize> {
        let mut seen: BTreeSet<usize> = start.iter().copied().collect();
        let mut queue: VecDeque<usize> = start.iter().copied().collect();
        while let Some(current) = queue.pop_front() {
            for edge in &self.edges {
                if edge.downstream != current || seen.contains(&edge.upstream) {
                    continue;
                }
                let edge_active = match (&edge.marker, pkg_name, bl_version, bl_platforms) {
                    (Some(marker), Some(pkg_name), Some(bl_version), Some(bl_platforms)) => {
                        bl_platforms.iter().any(|&bl_platform| {
                            marker_is_valid_for(marker, bl_version, bl_platform, pkg_name)
                                .unwrap_or(false)
                        })
                    }
                    _ => true,
                };
                if edge_active {
                    seen.insert(edge.upstream);
                    queue.push_back(edge.upstream);
                }
            }
        }
        seen
    }
}

fn parse_marker(entry: &DependencyEntry) -> anyhow::Result<Option<MarkerTree>> {
    entry
        .marker
        .as_ref()
        .map(|marker| {
            MarkerTree::from_str(marker).map_err(|err| {
                anyhow::anyhow!(
                    "Invalid marker `{}` on dependency {} in the lockfile: {}",
                    marker,
                    entry.name,
                    err,
                )
            })
        })
        .transpose()
}

fn parse_specifier(entry: &DependencyEntry) -> anyhow::Result<Option<VersionSpecifiers>> {
    entry
        .specifier
        .as_ref()
        .map(|specifier| {
            VersionSpecifiers::from_str(specifier).map_err(|err| {
                anyhow::anyhow!(
                    "Invalid specifier `{}` on dependency {} in the lockfile: {}",
                    specifier,
                    entry.name,
                    err,
                )
            })
        })
        .transpose()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::lockfile::UvLock;
    use crate::releases::BLReleaseOfficial;
    use indoc::indoc;

    const LOCK: &str = indoc! {r#"
        version = 1

        [[package]]
        name = "simple-proj"
        version = "0.1.0"
        source = { editable = "." }

        [package.metadata]
        requires-dist = [
            { name = "tqdm", specifier = "==4.66.2" },
            { name = "windows-only", marker = "sys_platform == 'win32'" },
        ]

        [[package]]
        name = "tqdm"
        version = "4.66.2"
        source = { registry = "https://pypi.org/simple" }
        dependencies = [
            { name = "colorama", marker = "sys_platform == 'win32'" },
        ]
        wheels = [
            { url = "https://example.org/tqdm-4.66.2-py3-none-any.whl", hash = "sha256:aaaa", size = 78268 },
        ]

        [[package]]
        name = "colorama"
        version = "0.4.6"
        source = { registry = "https://pypi.org/simple" }
        wheels = [
            { url = "https://example.org/colorama-0.4.6-py2.py3-none-any.whl", hash = "sha256:bbbb", size = 25335 },
        ]

        [[package]]
        name = "windows-only"
        version = "1.0.0"
        source = { registry = "https://pypi.org/simple" }
        wheels = [
            { url = "https://example.org/windows_only-1.0.0-py3-none-any.whl", hash = "sha256:cccc", size = 100 },
        ]
    "#};

    fn graph() -> DepGraph {
        DepGraph::from_uv_lock(&UvLock::from_str(LOCK).unwrap(), "simple_proj").unwrap()
    }

    fn names(graph: &DepGraph, indices: &[usize]) -> Vec<String> {
        indices
            .iter()
            .map(|&idx| graph.node(idx).name.clone())
            .collect()
    }

    #[test]
    fn root_package_is_not_a_node() {
        let graph = graph();
        let bl_version = BLReleaseOfficial::BL4_2_0.bl_version();
        let platforms: BTreeSet<BLPlatform> = [BLPlatform::LinuxX64].into_iter().collect();
        let live = graph
            .live_dep_indices("simple_proj", &bl_version, &platforms)
            .unwrap();
        assert!(!names(&graph, &live).contains(&"simple_proj".to_string()));
    }

    #[test]
    fn marker_pruning_per_platform() {
        let graph = graph();
        let bl_version = BLReleaseOfficial::BL4_2_0.bl_version();

        let linux: BTreeSet<BLPlatform> = [BLPlatform::LinuxX64].into_iter().collect();
        let live = graph
            .live_dep_indices("simple_proj", &bl_version, &linux)
            .unwrap();
        assert_eq!(names(&graph, &live), vec!["tqdm"]);

        let windows: BTreeSet<BLPlatform> = [BLPlatform::WindowsX64].into_iter().collect();
        let live = graph
            .live_dep_indices("simple_proj", &bl_version, &windows)
            .unwrap();
        assert_eq!(names(&graph, &live), vec!["colorama", "tqdm", "windows_only"]);
    }

    #[test]
    fn unsupported_platform_is_an_error() {
        let graph = graph();
        // 4.2.0 has no windows-arm64 binaries.
        let bl_version = BLReleaseOfficial::BL4_2_0.bl_version();
        let platforms: BTreeSet<BLPlatform> = [BLPlatform::WindowsArm64].into_iter().collect();
        assert!(graph
            .live_dep_indices("simple_proj", &bl_version, &platforms)
            .is_err());
    }

    #[test]
    fn targets_reaching_names_the_culprit() {
        let graph = graph();
        let colorama_idx = (0..3)
            .find(|&idx| graph.node(idx).name == "colorama")
            .unwrap();
        assert_eq!(graph.targets_reaching(colorama_idx), vec!["tqdm"]);
    }

    #[test]
    fn vendored_equal_is_dropped_and_mismatch_is_fatal() {
        let lock_toml = indoc! {r#"
            version = 1

            [[package]]
            name = "simple-proj"
            version = "0.1.0"
            source = { editable = "." }

            [package.metadata]
            requires-dist = [{ name = "numpy" }]

            [[package]]
            name = "numpy"
            version = "1.24.3"
            source = { registry = "https://pypi.org/simple" }
            wheels = [
                { url = "https://example.org/numpy-1.24.3-cp311-cp311-manylinux_2_17_x86_64.whl", hash = "sha256:dddd", size = 17000000 },
            ]
        "#};
        let graph =
            DepGraph::from_uv_lock(&UvLock::from_str(lock_toml).unwrap(), "simple_proj").unwrap();
        let platforms: BTreeSet<BLPlatform> = [BLPlatform::LinuxX64].into_iter().collect();

        // Blender 4.2 vendors numpy 1.24.3: the dependency is dropped.
        let bl_version = BLReleaseOfficial::BL4_2_0.bl_version();
        let live = graph
            .live_dep_indices("simple_proj", &bl_version, &platforms)
            .unwrap();
        assert!(live.is_empty());

        // Blender 4.4 vendors numpy 1.26.4: same request is now a conflict.
        let bl_version = BLReleaseOfficial::BL4_4_0.bl_version();
        let err = graph
            .live_dep_indices("simple_proj", &bl_version, &platforms)
            .unwrap_err();
        let report = err.to_string();
        assert!(report.contains("numpy"), "{report}");
        assert!(report.contains("1.26.4"), "{report}");
        assert!(report.contains("1.24.3"), "{report}");
    }

    #[test]
    fn missing_root_package_is_fatal() {
        let lock_toml = "version = 1\n";
        let err =
            DepGraph::from_uv_lock(&UvLock::from_str(lock_toml).unwrap(), "simple_proj")
                .unwrap_err();
        assert!(err.to_string().contains("root package"));
    }
}
