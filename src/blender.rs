//! The Blender collaborator: executable discovery, `--version` parsing, the
//! built-in extension validator, and installing a built archive into a local
//! development repository.
//!
//! [`run_extension`] hands its inputs to the bundled startup script through
//! the environment: `BLEXT_ADDON_NAME`, `BLEXT_ZIP_PATH`, `BLEXT_LOCAL_PATH`.
//! The names are kept verbatim so scripts written against other tooling that
//! sets them keep working.

use anyhow::{bail, Context};
use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Python source executed inside Blender to (re)install a built archive into
/// a local development repository.
static BL_INIT_SCRIPT: &str = include_str!("bl_init.py");

/// Locate the Blender executable: an explicit path override first, then the
/// `BLENDER` environment variable, then `PATH`.
pub fn find_blender_exe(path_override: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(path) = path_override {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = env::var_os("BLENDER") {
        return Ok(PathBuf::from(path));
    }
    which::which("blender").context("Couldn't find `blender` on PATH; is it installed?")
}

/// Everything `blender --version` reports about a build.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BlenderBuildInfo {
    pub version: (u32, u32, u32),
    pub build_date: String,
    pub build_time: String,
    pub build_commit_date: String,
    pub build_commit_time: String,
    pub build_hash: String,
    pub build_branch: String,
    pub build_platform: String,
    pub build_type: String,
    pub build_c_flags: String,
    pub build_cxx_flags: String,
    pub build_link_flags: String,
    pub build_system: String,
}

/// Parse the output of a `blender --version` invocation.
///
/// Line 1 carries the version; the trailing lines are `key: value` pairs.
/// Every missing key is reported together rather than one at a time.
pub fn parse_blender_version_output(output: &str) -> anyhow::Result<BlenderBuildInfo> {
    let first_line = output.lines().next().unwrap_or_default();
    let version = first_line
        .split_whitespace()
        .find_map(crate::releases::parse_version)
        .with_context(|| {
            format!(
                "No `M.m.p` version found in the first line of `blender --version`: {}",
                first_line
            )
        })?;

    let mut values: Vec<Option<String>> = vec![None; BUILD_KEYS.len()];
    for line in output.lines().skip(1) {
        let Some((key, value)) = line.trim_start().split_once(':') else {
            continue;
        };
        if let Some(idx) = BUILD_KEYS.iter().position(|&known| known == key.trim()) {
            values[idx] = Some(value.trim().to_string());
        }
    }

    let missing: Vec<&str> = BUILD_KEYS
        .iter()
        .zip(&values)
        .filter(|(_, value)| value.is_none())
        .map(|(&key, _)| key)
        .collect();
    if !missing.is_empty() {
        bail!(
            "`blender --version` output is missing the key(s): {}",
            missing.join(", ")
        );
    }

    let mut values = values.into_iter().map(Option::unwrap);
    Ok(BlenderBuildInfo {
        version,
        build_date: values.next().unwrap(),
        build_time: values.next().unwrap(),
        build_commit_date: values.next().unwrap(),
        build_commit_time: values.next().unwrap(),
        build_hash: values.next().unwrap(),
        build_branch: values.next().unwrap(),
        build_platform: values.next().unwrap(),
        build_type: values.next().unwrap(),
        build_c_flags: values.next().unwrap(),
        build_cxx_flags: values.next().unwrap(),
        build_link_flags: values.next().unwrap(),
        build_system: values.next().unwrap(),
    })
}

const BUILD_KEYS: [&str; 12] = [
    "build date",
    "build time",
    "build commit date",
    "build commit time",
    "build hash",
    "build branch",
    "build platform",
    "build type",
    "build c flags",
    "build c++ flags",
    "build link flags",
    "build system",
];

/// Query a Blender executable for its build information.
pub fn query_blender_version(path_blender: &Path) -> anyhow::Result<BlenderBuildInfo> {
    let output = Command::new(path_blender)
        .arg("--version")
        .output()
        .with_context(|| format!("Failed to run `{} --version`", path_blender.display()))?;
    if !output.status.success() {
        bail!("`{} --version` exited non-zero", path_blender.display());
    }
    parse_blender_version_output(&String::from_utf8_lossy(&output.stdout))
}

/// Run Blender's own manifest validator over a built archive. Exit code zero
/// means valid; anything else surfaces the captured stderr verbatim.
pub fn validate_extension(path_blender: &Path, path_zip: &Path) -> anyhow::Result<()> {
    let mut command = Command::new(path_blender);
    command
        .arg("--factory-startup")
        .arg("--command")
        .arg("extension")
        .arg("validate")
        .arg(path_zip);
    debug!("Running {:?}", command);
    let output = command
        .output()
        .with_context(|| format!("Failed to run `{}`", path_blender.display()))?;
    if !output.status.success() {
        bail!(
            "`blender --command extension validate {}` rejected the archive:\n{}",
            path_zip.display(),
            String::from_utf8_lossy(&output.stderr),
        );
    }
    Ok(())
}

/// Install a built archive into Blender's local development repository and
/// enable it, then leave Blender running (or exit, when headless).
///
/// The bundled startup script does the repository bookkeeping; it receives
/// the addon name, the archive path, and the repository directory via the
/// `BLEXT_*` environment variables.
pub fn run_extension(
    path_blender: &Path,
    path_zip: &Path,
    addon_name: &str,
    path_local_repo: &Path,
    path_blend: Option<&Path>,
    headless: bool,
) -> anyhow::Result<()> {
    fs_err::create_dir_all(path_local_repo)?;
    let mut startup_script = tempfile::Builder::new()
        .prefix("bl_init")
        .suffix(".py")
        .tempfile()
        .context("Couldn't write the Blender startup script")?;
    startup_script.write_all(BL_INIT_SCRIPT.as_bytes())?;

    let mut command = Command::new(path_blender);
    command
        .arg("--python")
        .arg(startup_script.path())
        .arg("--factory-startup")
        .env("BLEXT_ADDON_NAME", addon_name)
        .env("BLEXT_ZIP_PATH", path_zip)
        .env("BLEXT_LOCAL_PATH", path_local_repo);
    if headless {
        command.arg("--background");
    }
    if let Some(path_blend) = path_blend {
        command.arg(path_blend);
    }

    debug!("Running {:?}", command);
    let status = command
        .status()
        .with_context(|| format!("Failed to run `{}`", path_blender.display()))?;
    // The startup script lives until Blender exits.
    drop(startup_script);
    if !status.success() {
        bail!(
            "`blender` exited non-zero while installing and running {}",
            path_zip.display(),
        );
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::{parse_blender_version_output, BL_INIT_SCRIPT};
    use indoc::indoc;

    const VERSION_OUTPUT: &str = indoc! {"
        Blender 4.2.0
                build date: 2024-07-16
                build time: 00:20:19
                build commit date: 2024-07-15
                build commit time: 21:50
                build hash: a51f293548ad
                build branch: blender-v4.2-release
                build platform: Linux
                build type: release
                build c flags: -Wall
                build c++ flags: -Wall
                build link flags: -Wl,--version-script
                build system: CMake
    "};

    #[test]
    fn parses_full_output() {
        let info = parse_blender_version_output(VERSION_OUTPUT).unwrap();
        assert_eq!(info.version, (4, 2, 0));
        assert_eq!(info.build_hash, "a51f293548ad");
        assert_eq!(info.build_branch, "blender-v4.2-release");
        assert_eq!(info.build_system, "CMake");
        assert_eq!(info.build_cxx_flags, "-Wall");
    }

    #[test]
    fn missing_keys_are_aggregated() {
        let err = parse_blender_version_output("Blender 4.2.0\n\tbuild date: 2024-07-16\n")
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("build time"), "{message}");
        assert!(message.contains("build system"), "{message}");
        assert!(!message.contains("build date,"), "{message}");
    }

    #[test]
    fn missing_version_is_fatal() {
        assert!(parse_blender_version_output("no version here\n").is_err());
    }

    #[test]
    fn startup_script_reads_the_documented_env_vars() {
        for env_var in ["BLEXT_ADDON_NAME", "BLEXT_ZIP_PATH", "BLEXT_LOCAL_PATH"] {
            assert!(BL_INIT_SCRIPT.contains(env_var), "{env_var}");
        }
        assert!(BL_INIT_SCRIPT.contains("package_install_files"));
    }
}
