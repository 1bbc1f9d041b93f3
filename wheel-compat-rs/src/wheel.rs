//! Parses wheel filenames and checks wheels for platform compatibility.

use crate::{BLPlatform, WheelCompatError};
use fs_err::File;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::io;
use std::path::Path;
use std::str::FromStr;

/// Legacy manylinux tags and their PEP 600 equivalents.
///
/// Legacy tags are normalized away so that glibc versions can be parsed
/// uniformly from `manylinux_X_Y_*` tags later on.
const MANYLINUX_LEGACY_ALIASES: &[(&str, &str)] = &[
    ("manylinux1_x86_64", "manylinux_2_5_x86_64"),
    ("manylinux1_i686", "manylinux_2_5_i686"),
    ("manylinux2010_x86_64", "manylinux_2_12_x86_64"),
    ("manylinux2010_i686", "manylinux_2_12_i686"),
    ("manylinux2014_x86_64", "manylinux_2_17_x86_64"),
    ("manylinux2014_i686", "manylinux_2_17_i686"),
    ("manylinux2014_aarch64", "manylinux_2_17_aarch64"),
    ("manylinux2014_armv7l", "manylinux_2_17_armv7l"),
    ("manylinux2014_ppc64", "manylinux_2_17_ppc64"),
    ("manylinux2014_ppc64le", "manylinux_2_17_ppc64le"),
    ("manylinux2014_s390x", "manylinux_2_17_s390x"),
];

/// Normalizes a package name following PEP 503: lowercase, with runs of
/// `-`, `_` and `.` collapsed to a single `_`.
pub fn normalize_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut last_was_separator = false;
    for c in name.chars() {
        if matches!(c, '-' | '_' | '.') {
            if !last_was_separator {
                normalized.push('_');
            }
            last_was_separator = true;
        } else {
            normalized.extend(c.to_lowercase());
            last_was_separator = false;
        }
    }
    normalized
}

/// The components of a wheel filename.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct WheelFilename {
    pub distribution: String,
    pub version: String,
    pub build_tag: Option<String>,
    pub python_tags: Vec<String>,
    pub abi_tags: Vec<String>,
    pub platform_tags: Vec<String>,
}

impl FromStr for WheelFilename {
    type Err = WheelCompatError;

    fn from_str(filename: &str) -> Result<Self, Self::Err> {
        let basename = filename.strip_suffix(".whl").ok_or_else(|| {
            WheelCompatError::InvalidWheelFileName(
                filename.to_string(),
                "Must end with .whl".to_string(),
            )
        })?;
        // https://www.python.org/dev/peps/pep-0427/#file-name-convention
        match basename.split('-').collect::<Vec<_>>().as_slice() {
            &[distribution, version, build_tag, python_tag, abi_tag, platform_tag] => {
                Ok(WheelFilename {
                    distribution: distribution.to_string(),
                    version: version.to_string(),
                    build_tag: Some(build_tag.to_string()),
                    python_tags: python_tag.split('.').map(String::from).collect(),
                    abi_tags: abi_tag.split('.').map(String::from).collect(),
                    platform_tags: platform_tag.split('.').map(String::from).collect(),
                })
            }
            &[distribution, version, python_tag, abi_tag, platform_tag] => Ok(WheelFilename {
                distribution: distribution.to_string(),
                version: version.to_string(),
                build_tag: None,
                python_tags: python_tag.split('.').map(String::from).collect(),
                abi_tags: abi_tag.split('.').map(String::from).collect(),
                platform_tags: platform_tag.split('.').map(String::from).collect(),
            }),
            _ => Err(WheelCompatError::InvalidWheelFileName(
                filename.to_string(),
                "Expected four or five \"-\" in the filename".to_string(),
            )),
        }
    }
}

impl WheelFilename {
    /// Platform tags with legacy manylinux tags normalized to PEP 600.
    ///
    /// When both a legacy tag and its PEP 600 equivalent are present, the
    /// legacy form is dropped.
    pub fn normalized_platform_tags(&self) -> BTreeSet<String> {
        self.platform_tags
            .iter()
            .map(|platform_tag| {
                match MANYLINUX_LEGACY_ALIASES
                    .iter()
                    .find(|(legacy, _)| legacy == platform_tag)
                {
                    Some((_, pep600)) => pep600.to_string(),
                    None => platform_tag.clone(),
                }
            })
            .collect()
    }
}

/// A single downloadable wheel, as declared by the lockfile.
///
/// The filename and its parsed tags are derived from the URL at construction,
/// so a `Wheel` value always carries a valid wheel filename.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Wheel {
    pub url: String,
    pub registry: String,
    /// `sha256:<hex>`
    pub hash: String,
    pub size: u64,
}

impl Wheel {
    /// The last path segment of the URL; must end with `.whl`.
    pub fn filename(&self) -> Result<&str, WheelCompatError> {
        let last_segment = self
            .url
            .rsplit('/')
            .next()
            .filter(|segment| segment.ends_with(".whl"));
        last_segment.ok_or_else(|| WheelCompatError::NoFilenameInUrl(self.url.clone()))
    }

    pub fn parsed_filename(&self) -> Result<WheelFilename, WheelCompatError> {
        WheelFilename::from_str(self.filename()?)
    }

    /// Normalized name of the project this wheel distributes.
    pub fn project(&self) -> Result<String, WheelCompatError> {
        Ok(normalize_name(&self.parsed_filename()?.distribution))
    }

    pub fn python_tags(&self) -> Result<BTreeSet<String>, WheelCompatError> {
        Ok(self.parsed_filename()?.python_tags.into_iter().collect())
    }

    pub fn abi_tags(&self) -> Result<BTreeSet<String>, WheelCompatError> {
        Ok(self.parsed_filename()?.abi_tags.into_iter().collect())
    }

    pub fn platform_tags(&self) -> Result<BTreeSet<String>, WheelCompatError> {
        Ok(self.parsed_filename()?.normalized_platform_tags())
    }

    /// Minimum glibc version of each `manylinux_X_Y_*` platform tag.
    pub fn glibc_versions(&self) -> Result<Vec<(u16, u16)>, WheelCompatError> {
        Ok(self
            .platform_tags()?
            .iter()
            .filter_map(|tag| parse_tag_version(tag, "manylinux_"))
            .collect())
    }

    /// Minimum macOS version of each `macosx_X_Y_*` platform tag.
    pub fn macos_versions(&self) -> Result<Vec<(u16, u16)>, WheelCompatError> {
        Ok(self
            .platform_tags()?
            .iter()
            .filter_map(|tag| parse_tag_version(tag, "macosx_"))
            .collect())
    }

    /// Whether the wheel's interpreter tags overlap the environment's.
    pub fn works_with_python_tags(&self, valid_python_tags: &BTreeSet<String>) -> bool {
        match self.python_tags() {
            Ok(python_tags) => !python_tags.is_disjoint(valid_python_tags),
            Err(_) => false,
        }
    }

    /// Whether the wheel's ABI tags overlap the environment's.
    ///
    /// `valid_abi_tags` should always include `none`, the ABI tag of
    /// pure-Python wheels.
    pub fn works_with_abi_tags(&self, valid_abi_tags: &BTreeSet<String>) -> bool {
        match self.abi_tags() {
            Ok(abi_tags) => !abi_tags.is_disjoint(valid_abi_tags),
            Err(_) => false,
        }
    }

    /// Whether this wheel ought to run on the given platform.
    ///
    /// `min_glibc_version` and `min_macos_version` are the OS-version floors
    /// of the target environment; `None` skips the OS-version check, which
    /// yields the "semivalid" notion used for diagnostics.
    pub fn works_with_platform(
        &self,
        bl_platform: BLPlatform,
        min_glibc_version: Option<(u16, u16)>,
        min_macos_version: Option<(u16, u16)>,
    ) -> bool {
        let platform_tags = match self.platform_tags() {
            Ok(platform_tags) => platform_tags,
            Err(_) => return false,
        };

        // 'any' denotes a pure-python wheel, which works on all platforms
        if platform_tags.contains("any") {
            return true;
        }

        // At least one tag must end with one of the platform's architecture
        // aliases, and at least one must start with its OS prefix.
        let arch_matches = platform_tags.iter().any(|tag| {
            bl_platform
                .pypi_arches()
                .iter()
                .any(|arch| tag.ends_with(arch))
        });
        let os_matches = platform_tags
            .iter()
            .any(|tag| tag.starts_with(bl_platform.wheel_platform_tag_prefix()));
        if !(arch_matches && os_matches) {
            return false;
        }

        // The wheel's minimum OS version must not exceed the environment's floor.
        match bl_platform {
            BLPlatform::LinuxX64 | BLPlatform::LinuxArm64 => match min_glibc_version {
                None => true,
                Some(min_glibc) => self
                    .glibc_versions()
                    .map(|versions| versions.iter().any(|&glibc| glibc <= min_glibc))
                    .unwrap_or(false),
            },
            BLPlatform::MacosX64 | BLPlatform::MacosArm64 => match min_macos_version {
                None => true,
                Some(min_macos) => self
                    .macos_versions()
                    .map(|versions| versions.iter().any(|&macos| macos <= min_macos))
                    .unwrap_or(false),
            },
            BLPlatform::WindowsX64 | BLPlatform::WindowsArm64 => true,
        }
    }

    /// Sort key for picking one of several valid Linux wheels: the summed
    /// glibc versions, so the wheel with the largest OS-version tag wins.
    pub fn sort_key_preferred_linux(&self) -> u64 {
        self.glibc_versions()
            .unwrap_or_default()
            .iter()
            .map(|&(major, minor)| 1_000 * u64::from(major) + u64::from(minor))
            .sum()
    }

    /// Sort key for picking one of several valid macOS wheels.
    pub fn sort_key_preferred_macos(&self) -> u64 {
        self.macos_versions()
            .unwrap_or_default()
            .iter()
            .map(|&(major, minor)| 1_000 * u64::from(major) + u64::from(minor))
            .sum()
    }

    /// Sort key for picking one of several valid Windows wheels:
    /// `any > win_arm64 > win_amd64 > win32`.
    pub fn sort_key_preferred_windows(&self) -> u64 {
        self.platform_tags()
            .unwrap_or_default()
            .iter()
            .map(|tag| match tag.as_str() {
                "any" => 3,
                "win_arm64" => 2,
                "win_amd64" => 1,
                _ => 0,
            })
            .sum()
    }

    /// Whether the file at `wheel_path` is, in fact, this wheel.
    ///
    /// Implemented by comparing the file's sha256 digest to the declared hash.
    /// A missing file is simply not a valid download.
    pub fn is_download_valid(&self, wheel_path: &Path) -> Result<bool, WheelCompatError> {
        if !wheel_path.is_file() {
            return Ok(false);
        }
        let mut file = File::open(wheel_path)?;
        let mut hasher = Sha256::new();
        io::copy(&mut file, &mut hasher)?;
        let file_digest = format!("sha256:{:x}", hasher.finalize());
        Ok(file_digest == self.hash)
    }
}

fn parse_tag_version(platform_tag: &str, prefix: &str) -> Option<(u16, u16)> {
    let mut parts = platform_tag.strip_prefix(prefix)?.split('_');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}
