//! Builds the marker environments a Blender version exposes per platform and
//! evaluates dependency markers against them.
//!
//! Wheels that depend on `platform_release` markers are incompatible with
//! Blender extensions: the user's exact kernel release cannot be known when
//! the archive is built, so that field stays empty.

use crate::releases::BLVersion;
use anyhow::Context;
use pep508_rs::{MarkerEnvironment, MarkerTree, StringVersion};
use std::str::FromStr;
use wheel_compat_rs::BLPlatform;

/// All candidate marker environments for `(bl_version, bl_platform)`: one per
/// `platform_machine` alternative per `extra` alternative.
///
/// The `extra` axis covers the Blender-version extras plus, when `pkg_name`
/// is given, the synthetic `extra-<len>-<name>-<extra>` names the external
/// resolver uses to disambiguate conflicting optional-dependency groups. Each
/// environment is paired with the single `extra` it represents; markers are
/// evaluated one extra at a time, or `extra != ...` clauses would observe
/// extras from other Blender versions.
pub fn marker_environments(
    bl_version: &BLVersion,
    bl_platform: BLPlatform,
    pkg_name: Option<&str>,
) -> anyhow::Result<Vec<(MarkerEnvironment, String)>> {
    let (major, minor, patch) = bl_version.py_sys_version;
    let python_version = StringVersion::from_str(&format!("{}.{}", major, minor))
        .ok()
        .context("The catalogued Python version is not a valid version")?;
    let python_full_version = StringVersion::from_str(&format!("{}.{}.{}", major, minor, patch))
        .ok()
        .context("The catalogued Python version is not a valid version")?;
    let implementation_version =
        StringVersion::from_str(&bl_version.pymarker_implementation_version())
            .ok()
            .context("The catalogued Python version is not a valid version")?;

    let mut extras: Vec<String> = bl_version.pymarker_extras.iter().cloned().collect();
    if let Some(pkg_name) = pkg_name {
        extras.extend(bl_version.pymarker_encoded_package_extras(pkg_name));
    }

    let mut environments = Vec::new();
    for platform_machine in bl_platform.pymarker_platform_machines() {
        for extra in &extras {
            environments.push((
                MarkerEnvironment {
                    implementation_name: "cpython".to_string(),
                    implementation_version: implementation_version.clone(),
                    os_name: bl_platform.pymarker_os_name().to_string(),
                    platform_machine: platform_machine.to_string(),
                    platform_python_implementation: "CPython".to_string(),
                    platform_release: String::new(),
                    platform_system: bl_platform.pymarker_platform_system().to_string(),
                    platform_version: String::new(),
                    python_full_version: python_full_version.clone(),
                    python_version: python_version.clone(),
                    sys_platform: bl_platform.pymarker_sys_platform().to_string(),
                },
                extra.clone(),
            ));
        }
    }
    Ok(environments)
}

/// Whether a marker evaluates true in at least one of the marker environments
/// `(bl_version, bl_platform)` exposes for `pkg_name`.
pub fn marker_is_valid_for(
    marker: &MarkerTree,
    bl_version: &BLVersion,
    bl_platform: BLPlatform,
    pkg_name: &str,
) -> anyhow::Result<bool> {
    let environments = marker_environments(bl_version, bl_platform, Some(pkg_name))?;
    Ok(environments
        .iter()
        .any(|(environment, extra)| marker.evaluate(environment, &[extra.as_str()])))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::releases::BLReleaseOfficial;

    fn marker(s: &str) -> MarkerTree {
        MarkerTree::from_str(s).unwrap()
    }

    #[test]
    fn platform_markers() {
        let bl_version = BLReleaseOfficial::BL4_2_0.bl_version();
        let win32 = marker("sys_platform == 'win32'");
        assert!(
            marker_is_valid_for(&win32, &bl_version, BLPlatform::WindowsX64, "simple").unwrap()
        );
        assert!(!marker_is_valid_for(&win32, &bl_version, BLPlatform::LinuxX64, "simple").unwrap());

        let not_darwin = marker("platform_system != 'Darwin'");
        assert!(
            marker_is_valid_for(&not_darwin, &bl_version, BLPlatform::LinuxX64, "simple").unwrap()
        );
        assert!(
            !marker_is_valid_for(&not_darwin, &bl_version, BLPlatform::MacosArm64, "simple")
                .unwrap()
        );
    }

    #[test]
    fn python_version_markers() {
        let bl_version = BLReleaseOfficial::BL4_3_0.bl_version();
        assert!(marker_is_valid_for(
            &marker("python_version >= '3.10'"),
            &bl_version,
            BLPlatform::LinuxX64,
            "simple",
        )
        .unwrap());
        assert!(!marker_is_valid_for(
            &marker("python_version < '3.10'"),
            &bl_version,
            BLPlatform::LinuxX64,
            "simple",
        )
        .unwrap());
    }

    #[test]
    fn version_extras() {
        let bl_version = BLReleaseOfficial::BL4_2_0.bl_version();
        assert!(marker_is_valid_for(
            &marker("extra == 'blender4-2'"),
            &bl_version,
            BLPlatform::LinuxX64,
            "simple",
        )
        .unwrap());
        assert!(!marker_is_valid_for(
            &marker("extra == 'blender4-4'"),
            &bl_version,
            BLPlatform::LinuxX64,
            "simple",
        )
        .unwrap());
    }

    #[test]
    fn encoded_package_extras() {
        // The resolver encodes `simple_proj` as `simple-proj` in extra names.
        let bl_version = BLReleaseOfficial::BL4_2_0.bl_version();
        let encoded = marker("extra == 'extra-11-simple-proj-blender4-2'");
        assert!(
            marker_is_valid_for(&encoded, &bl_version, BLPlatform::LinuxX64, "simple_proj")
                .unwrap()
        );
        assert!(
            !marker_is_valid_for(&encoded, &bl_version, BLPlatform::LinuxX64, "other").unwrap()
        );

        // Each environment carries exactly one extra, so a conjunction of
        // inequalities over sibling extras stays satisfiable.
        let exclusion = marker(
            "extra != 'extra-11-simple-proj-blender4-3' and extra != 'extra-11-simple-proj-blender4-4'",
        );
        assert!(marker_is_valid_for(
            &exclusion,
            &bl_version,
            BLPlatform::LinuxX64,
            "simple_proj",
        )
        .unwrap());
    }

    #[test]
    fn machine_alternatives_are_all_tried() {
        let bl_version = BLReleaseOfficial::BL4_2_1.bl_version();
        let aarch64 = marker("platform_machine == 'aarch64'");
        assert!(
            marker_is_valid_for(&aarch64, &bl_version, BLPlatform::LinuxArm64, "simple").unwrap()
        );
        assert!(
            !marker_is_valid_for(&aarch64, &bl_version, BLPlatform::WindowsArm64, "simple")
                .unwrap()
        );
    }
}
