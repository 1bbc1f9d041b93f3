//! Per-(Blender version, platform) wheel selection.
//!
//! For every live dependency and platform exactly one wheel must satisfy the
//! interpreter tags, ABI tags and OS-version floors at once. Selection never
//! stops at the first failure: diagnostics are collected across every
//! (dependency, platform) pair and reported as one fatal error.

use crate::graph::DepGraph;
use crate::releases::BLVersion;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use wheel_compat_rs::{BLPlatform, Wheel};

/// Why a dependency could not be covered on one platform.
#[derive(Debug, Clone)]
pub struct ResolutionFailure {
    /// `name==version`.
    pub dependency: String,
    pub bl_version: String,
    pub bl_platform: BLPlatform,
    /// `("glibc"|"macos", floor)`; `None` on Windows.
    pub os_requirement: Option<(&'static str, (u16, u16))>,
    /// Wheels rejected solely on OS-version grounds: filename and the
    /// OS versions its platform tags require.
    pub rejected_wheels: Vec<(String, Vec<(u16, u16)>)>,
    /// Top-level dependencies that pulled the failing dependency in.
    pub pulled_in_by: Vec<String>,
}

#[derive(Debug)]
pub struct ResolutionError {
    pub failures: Vec<ResolutionFailure>,
}

impl std::error::Error for ResolutionError {}

impl fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "No compatible wheel for {} (dependency, platform) pair(s):",
            self.failures.len()
        )?;
        for failure in &self.failures {
            writeln!(
                f,
                "\n{} not found for `{}` (Blender {}).",
                failure.dependency, failure.bl_platform, failure.bl_version,
            )?;
            if let Some((os_name, (major, minor))) = failure.os_requirement {
                writeln!(f, "  Extension supports: {} >= {}.{}", os_name, major, minor)?;
            }
            if failure.rejected_wheels.is_empty() {
                writeln!(f, "  Rejected wheels: no candidates were found.")?;
            } else {
                writeln!(f, "  Rejected wheels:")?;
                for (filename, os_versions) in &failure.rejected_wheels {
                    let os_name = failure.os_requirement.map(|(name, _)| name).unwrap_or("os");
                    let versions = os_versions
                        .iter()
                        .map(|(major, minor)| format!("{}.{}", major, minor))
                        .collect::<Vec<_>>()
                        .join(", ");
                    writeln!(f, "  - {}: {} >= {}", filename, os_name, versions)?;
                }
            }
            writeln!(f, "  Remedies:")?;
            writeln!(
                f,
                "  1. Remove `{}` from `tool.blendpack.supported_platforms`.",
                failure.bl_platform,
            )?;
            match failure.pulled_in_by.as_slice() {
                [] | [_] => writeln!(
                    f,
                    "  2. Remove `{}` from `project.dependencies`.",
                    failure
                        .pulled_in_by
                        .first()
                        .map(String::as_str)
                        .unwrap_or_else(|| failure
                            .dependency
                            .split("==")
                            .next()
                            .unwrap_or(&failure.dependency)),
                )?,
                pulled_in_by => writeln!(
                    f,
                    "  2. Remove one of `{}` from `project.dependencies`.",
                    pulled_in_by.join("`, `"),
                )?,
            }
            if let Some((os_name, _)) = failure.os_requirement {
                if !failure.rejected_wheels.is_empty() {
                    writeln!(
                        f,
                        "  3. Raise `tool.blendpack.min_{}_version` to cover a rejected wheel.",
                        os_name,
                    )?;
                }
            }
        }
        Ok(())
    }
}

/// The outcome of wheel selection for one Blender version across its
/// requested platforms. Failures are carried, not thrown, so callers can
/// aggregate them across versions before going fatal.
#[derive(Debug, Clone, Default)]
pub struct CellSelection {
    pub wheels_by_platform: BTreeMap<BLPlatform, Vec<Wheel>>,
    pub failures: Vec<ResolutionFailure>,
}

/// Select one wheel per live dependency for every requested platform of
/// `bl_version`.
pub fn select_wheels(
    graph: &DepGraph,
    pkg_name: &str,
    bl_version: &BLVersion,
    bl_platforms: &BTreeSet<BLPlatform>,
) -> anyhow::Result<CellSelection> {
    let valid_python_tags = graph
        .valid_python_tags
        .clone()
        .unwrap_or_else(|| bl_version.valid_python_tags.clone());
    let valid_abi_tags = graph
        .valid_abi_tags
        .clone()
        .unwrap_or_else(|| bl_version.valid_abi_tags.clone());
    let min_glibc_version = graph
        .min_glibc_version
        .unwrap_or(bl_version.min_glibc_version);
    let min_macos_version = graph
        .min_macos_version
        .unwrap_or(bl_version.min_macos_version);

    let requested_platforms: Vec<BLPlatform> = bl_platforms
        .iter()
        .copied()
        .filter(|bl_platform| bl_version.valid_bl_platforms.contains(bl_platform))
        .collect();

    let mut selection = CellSelection::default();
    for &bl_platform in &requested_platforms {
        // The live set is platform-specific: an edge guarded by e.g.
        // `sys_platform == 'win32'` must not demand wheels elsewhere.
        let live =
            graph.live_dep_indices(pkg_name, bl_version, &[bl_platform].into_iter().collect())?;
        let mut selected = Vec::new();
        for &dep_idx in &live {
            let dep = graph.node(dep_idx);

            let tag_compatible: Vec<&Wheel> = dep
                .wheels
                .iter()
                .filter(|wheel| wheel.works_with_python_tags(&valid_python_tags))
                .filter(|wheel| wheel.works_with_abi_tags(&valid_abi_tags))
                .collect();
            // Semivalid wheels could run on the platform if the OS were new
            // enough; they power the diagnostics below.
            let semivalid: Vec<&Wheel> = tag_compatible
                .iter()
                .copied()
                .filter(|wheel| wheel.works_with_platform(bl_platform, None, None))
                .collect();
            let mut valid: Vec<&Wheel> = semivalid
                .iter()
                .copied()
                .filter(|wheel| {
                    wheel.works_with_platform(
                        bl_platform,
                        Some(min_glibc_version),
                        Some(min_macos_version),
                    )
                })
                .collect();

            if valid.is_empty() {
                selection.failures.push(failure_for(
                    graph,
                    dep_idx,
                    bl_version,
                    bl_platform,
                    min_glibc_version,
                    min_macos_version,
                    &semivalid,
                ));
                continue;
            }

            // Deterministic preference: widest OS support first (largest
            // OS-version tag on Linux/macOS, `any` down to `win32` on
            // Windows), ties broken by filename.
            let sort_key = |wheel: &Wheel| -> u64 {
                if bl_platform.is_linux() {
                    wheel.sort_key_preferred_linux()
                } else if bl_platform.is_macos() {
                    wheel.sort_key_preferred_macos()
                } else {
                    wheel.sort_key_preferred_windows()
                }
            };
            valid.sort_by(|a, b| {
                sort_key(a)
                    .cmp(&sort_key(b))
                    .reverse()
                    .then_with(|| a.filename().unwrap_or("").cmp(b.filename().unwrap_or("")))
            });
            selected.push(valid[0].clone());
        }
        selected.sort_by(|a, b| a.url.cmp(&b.url));
        selection.wheels_by_platform.insert(bl_platform, selected);
    }
    Ok(selection)
}

fn failure_for(
    graph: &DepGraph,
    dep_idx: usize,
    bl_version: &BLVersion,
    bl_platform: BLPlatform,
    min_glibc_version: (u16, u16),
    min_macos_version: (u16, u16),
    semivalid: &[&Wheel],
) -> ResolutionFailure {
    let dep = graph.node(dep_idx);
    let os_requirement = if bl_platform.is_linux() {
        Some(("glibc", min_glibc_version))
    } else if bl_platform.is_macos() {
        Some(("macos", min_macos_version))
    } else {
        None
    };
    let rejected_wheels = semivalid
        .iter()
        .map(|wheel| {
            let os_versions = if bl_platform.is_linux() {
                wheel.glibc_versions().unwrap_or_default()
            } else if bl_platform.is_macos() {
                wheel.macos_versions().unwrap_or_default()
            } else {
                Vec::new()
            };
            (
                wheel.filename().unwrap_or("<unnamed wheel>").to_string(),
                os_versions,
            )
        })
        .collect();
    ResolutionFailure {
        dependency: format!("{}=={}", dep.name, dep.version),
        bl_version: bl_version.version_string(),
        bl_platform,
        os_requirement,
        rejected_wheels,
        pulled_in_by: graph.targets_reaching(dep_idx),
    }
}
