//! The `uv` collaborator: lockfile generation and the managed
//! vendored-extras rewrite of `pyproject.toml`.

use crate::releases::BLReleaseOfficial;
use crate::spec::{BLExtSpec, ExtensionSource};
use anyhow::{bail, Context};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

const MANAGED_BEGIN: &str = "# MANAGED BY BLENDPACK (DO NOT EDIT)";
const MANAGED_END: &str = "# END MANAGED BY BLENDPACK";

/// Locate the `uv` executable: an explicit path override first, then the
/// `UV` environment variable, then `PATH`.
pub fn find_uv_exe(path_override: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(path) = path_override {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = env::var_os("UV") {
        return Ok(PathBuf::from(path));
    }
    which::which("uv").context("Couldn't find `uv` on PATH; is it installed?")
}

/// Run `uv lock` (or `uv lock --script <file>`) so the lockfile matches the
/// descriptor.
pub fn update_lockfile(path_lockfile: &Path, path_uv: Option<&Path>) -> anyhow::Result<()> {
    let path_uv = find_uv_exe(path_uv)?;
    let lockfile_name = path_lockfile
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let project_dir = path_lockfile.parent().unwrap_or_else(|| Path::new("."));

    let mut command = Command::new(&path_uv);
    command.current_dir(project_dir).arg("lock");
    if lockfile_name != "uv.lock" {
        // `<script>.py.lock` locks against the script's inline metadata.
        let script_name = lockfile_name
            .strip_suffix(".lock")
            .with_context(|| format!("Unexpected lockfile name `{}`", lockfile_name))?
            .to_string();
        command.arg("--script").arg(script_name);
    }

    debug!("Running {:?}", command);
    let output = command
        .output()
        .with_context(|| format!("Failed to run `{}` lock", path_uv.display()))?;
    if !output.status.success() {
        bail!(
            "`{} lock` failed:\n{}",
            path_uv.display(),
            String::from_utf8_lossy(&output.stderr),
        );
    }
    Ok(())
}

/// Generate the lockfile if it doesn't exist yet.
pub fn ensure_lockfile(path_lockfile: &Path, path_uv: Option<&Path>) -> anyhow::Result<()> {
    if path_lockfile.is_file() {
        return Ok(());
    }
    update_lockfile(path_lockfile, path_uv)
}

/// The managed span for a descriptor: one optional-dependency group per
/// targeted Blender version pinning its vendored packages, registered as
/// mutually conflicting extras.
fn managed_span(spec: &BLExtSpec) -> String {
    let mut pins_by_extra: BTreeMap<&'static str, Vec<String>> = BTreeMap::new();
    for release in
        BLReleaseOfficial::from_version_range(spec.blender_version_min, spec.blender_version_max)
    {
        let entry = pins_by_extra.entry(release.pymarker_extra()).or_default();
        for (name, versions) in release.bl_version().vendored_site_packages {
            for version in versions {
                let pin = format!("{}=={}", name, version);
                if !entry.contains(&pin) {
                    entry.push(pin);
                }
            }
        }
    }
    for pins in pins_by_extra.values_mut() {
        pins.sort();
    }

    let mut span = String::new();
    span.push_str(MANAGED_BEGIN);
    span.push('\n');
    span.push_str("[project.optional-dependencies]\n");
    for (extra, pins) in &pins_by_extra {
        span.push_str(&format!("{} = [\n", extra));
        for pin in pins {
            span.push_str(&format!("    \"{}\",\n", pin));
        }
        span.push_str("]\n");
    }
    span.push_str("\n[tool.uv]\nconflicts = [\n    [\n");
    for extra in pins_by_extra.keys() {
        span.push_str(&format!("        {{ extra = \"{}\" }},\n", extra));
    }
    span.push_str("    ],\n]\n");
    span.push_str(MANAGED_END);
    span.push('\n');
    span
}

/// Rewrite the project descriptor so the external resolver sees each
/// supported Blender version's vendored packages as mutually exclusive
/// extras. The rewrite is idempotent and only ever touches the span between
/// the sentinel comments; returns whether the file changed.
///
/// Single-file scripts cannot carry conflicting extras in inline metadata,
/// so the script case is rejected outright.
pub fn rewrite_vendored_extras(spec: &BLExtSpec) -> anyhow::Result<bool> {
    if matches!(spec.source, ExtensionSource::Script { .. }) {
        bail!(
            "Vendored-extras rewriting is not supported for single-file scripts; convert `{}` to a project extension to use it",
            spec.path_descriptor.display(),
        );
    }

    let raw = fs_err::read_to_string(&spec.path_descriptor)?;
    let span = managed_span(spec);

    let rewritten = match (raw.find(MANAGED_BEGIN), raw.find(MANAGED_END)) {
        (Some(begin), Some(end)) => {
            let end = end + MANAGED_END.len();
            let end = if raw[end..].starts_with('\n') { end + 1 } else { end };
            format!("{}{}{}", &raw[..begin], span, &raw[end..])
        }
        (None, None) => {
            if raw.contains("[project.optional-dependencies]") {
                bail!(
                    "`{}` already defines `[project.optional-dependencies]` outside the managed span; move it inside or remove it",
                    spec.path_descriptor.display(),
                );
            }
            let mut rewritten = raw.clone();
            if !rewritten.ends_with('\n') {
                rewritten.push('\n');
            }
            rewritten.push('\n');
            rewritten.push_str(&span);
            rewritten
        }
        _ => bail!(
            "`{}` contains an unbalanced managed span; restore both sentinel comments or delete the span",
            spec.path_descriptor.display(),
        ),
    };

    if rewritten == raw {
        return Ok(false);
    }
    fs_err::write(&spec.path_descriptor, rewritten)?;
    Ok(true)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::graph::DepGraph;
    use indoc::indoc;
    use std::collections::{BTreeMap, BTreeSet};
    use wheel_compat_rs::BLPlatform;

    fn spec_at(path_descriptor: &Path) -> BLExtSpec {
        BLExtSpec {
            id: "simple".to_string(),
            name: "Simple".to_string(),
            version: "0.1.0".to_string(),
            tagline: "Does a thing".to_string(),
            maintainer: None,
            license: "SPDX:GPL-3.0-or-later".to_string(),
            blender_version_min: (4, 2, 0),
            blender_version_max: Some((4, 4, 0)),
            permissions: BTreeMap::new(),
            copyright: vec!["2025 Simple Contributors".to_string()],
            tags: None,
            website: None,
            granular_bl_platforms: [BLPlatform::LinuxX64].into_iter().collect::<BTreeSet<_>>(),
            deps: DepGraph::default(),
            release_profile: None,
            source: ExtensionSource::Project {
                path_package: path_descriptor.parent().unwrap().join("simple"),
            },
            path_descriptor: path_descriptor.to_path_buf(),
            path_lockfile: path_descriptor.parent().unwrap().join("uv.lock"),
        }
    }

    #[test]
    fn rewrite_is_idempotent_and_scoped_to_the_span() {
        let dir = tempfile::tempdir().unwrap();
        let path_descriptor = dir.path().join("pyproject.toml");
        let original = indoc! {r#"
            [project]
            name = "simple"
            version = "0.1.0"
        "#};
        fs_err::write(&path_descriptor, original).unwrap();
        let spec = spec_at(&path_descriptor);

        assert!(rewrite_vendored_extras(&spec).unwrap());
        let once = fs_err::read_to_string(&path_descriptor).unwrap();
        assert!(once.starts_with(original));
        assert!(once.contains(MANAGED_BEGIN));
        assert!(once.contains("blender4-2 = ["));
        assert!(once.contains("blender4-3 = ["));
        assert!(!once.contains("blender4-4 = ["));
        assert!(once.contains("\"numpy==1.24.3\","));
        assert!(once.contains("{ extra = \"blender4-2\" },"));

        // Running the rewrite again produces the same bytes.
        assert!(!rewrite_vendored_extras(&spec).unwrap());
        assert_eq!(fs_err::read_to_string(&path_descriptor).unwrap(), once);
    }

    #[test]
    fn script_rewrite_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let path_descriptor = dir.path().join("simple.py");
        fs_err::write(&path_descriptor, "import bpy\n").unwrap();
        let mut spec = spec_at(&path_descriptor);
        spec.source = ExtensionSource::Script {
            path_script: path_descriptor.clone(),
        };
        let err = rewrite_vendored_extras(&spec).unwrap_err();
        assert!(err.to_string().contains("single-file scripts"));
    }

    #[test]
    fn foreign_optional_dependencies_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path_descriptor = dir.path().join("pyproject.toml");
        fs_err::write(
            &path_descriptor,
            indoc! {r#"
                [project]
                name = "simple"
                version = "0.1.0"

                [project.optional-dependencies]
                dev = ["pytest"]
            "#},
        )
        .unwrap();
        let err = rewrite_vendored_extras(&spec_at(&path_descriptor)).unwrap_err();
        assert!(err.to_string().contains("managed span"));
    }
}
