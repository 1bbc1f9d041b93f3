//! The catalog of known official Blender releases and the logical Blender
//! version ("chunk") an extension archive targets.
//!
//! Newer Blender releases than the ones listed here cannot be targeted: the
//! catalog is the only source of facts like vendored `site-packages` versions,
//! and those facts cannot be known ahead of a release.

use crate::manifest::BLManifestVersion;
use chrono::{DateTime, FixedOffset};
use pep440_rs::Version;
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use wheel_compat_rs::{normalize_name, BLPlatform};

/// Every released, extension-capable official Blender version.
///
/// Declared in ascending version order so the derived `Ord` sorts by
/// `(version, release date)`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum BLReleaseOfficial {
    // Blender 4.2 LTS
    BL4_2_0,
    BL4_2_1,
    BL4_2_2,
    BL4_2_3,
    BL4_2_4,
    BL4_2_5,
    BL4_2_6,
    BL4_2_7,
    BL4_2_8,
    // Blender 4.3
    BL4_3_0,
    BL4_3_1,
    BL4_3_2,
    // Blender 4.4
    BL4_4_0,
}

use BLReleaseOfficial as R;

impl BLReleaseOfficial {
    pub const ALL: [BLReleaseOfficial; 13] = [
        R::BL4_2_0,
        R::BL4_2_1,
        R::BL4_2_2,
        R::BL4_2_3,
        R::BL4_2_4,
        R::BL4_2_5,
        R::BL4_2_6,
        R::BL4_2_7,
        R::BL4_2_8,
        R::BL4_3_0,
        R::BL4_3_1,
        R::BL4_3_2,
        R::BL4_4_0,
    ];

    pub fn version(self) -> (u32, u32, u32) {
        match self {
            R::BL4_2_0 => (4, 2, 0),
            R::BL4_2_1 => (4, 2, 1),
            R::BL4_2_2 => (4, 2, 2),
            R::BL4_2_3 => (4, 2, 3),
            R::BL4_2_4 => (4, 2, 4),
            R::BL4_2_5 => (4, 2, 5),
            R::BL4_2_6 => (4, 2, 6),
            R::BL4_2_7 => (4, 2, 7),
            R::BL4_2_8 => (4, 2, 8),
            R::BL4_3_0 => (4, 3, 0),
            R::BL4_3_1 => (4, 3, 1),
            R::BL4_3_2 => (4, 3, 2),
            R::BL4_4_0 => (4, 4, 0),
        }
    }

    pub fn is_4_2(self) -> bool {
        matches!(self.version(), (4, 2, _))
    }

    pub fn is_4_3(self) -> bool {
        matches!(self.version(), (4, 3, _))
    }

    pub fn is_4_4(self) -> bool {
        matches!(self.version(), (4, 4, _))
    }

    /// When the release was tagged, from the creation date of the `git` tag.
    pub fn released_on(self) -> DateTime<FixedOffset> {
        let released_on = match self {
            R::BL4_2_0 => "2024-07-16 02:20:19 -0400",
            R::BL4_2_1 => "2024-08-19 13:21:12 +0200",
            R::BL4_2_2 => "2024-09-23 14:18:24 +0200",
            R::BL4_2_3 => "2024-10-14 17:20:17 +0200",
            R::BL4_2_4 => "2024-11-18 11:34:40 +0100",
            R::BL4_2_5 => "2024-12-16 20:54:56 +0100",
            R::BL4_2_6 => "2025-01-20 16:04:15 +0100",
            R::BL4_2_7 => "2025-02-17 13:50:33 +0100",
            R::BL4_2_8 => "2025-03-17 15:22:41 +0100",
            R::BL4_3_0 => "2024-11-19 09:52:10 +0100",
            R::BL4_3_1 => "2024-12-10 08:46:11 +0100",
            R::BL4_3_2 => "2024-12-16 22:10:40 +0100",
            R::BL4_4_0 => "2025-03-17 18:00:48 +0100",
        };
        DateTime::parse_from_str(released_on, "%Y-%m-%d %H:%M:%S %z")
            .expect("release dates in the catalog are well-formed")
    }

    pub fn min_glibc_version(self) -> (u16, u16) {
        (2, 28)
    }

    pub fn min_macos_version(self) -> (u16, u16) {
        // 4.4 follows VFX Reference Platform CY2025, which requires 12.0+.
        if self.is_4_4() {
            (12, 0)
        } else {
            (11, 0)
        }
    }

    pub fn valid_manifest_versions(self) -> &'static [BLManifestVersion] {
        &[BLManifestVersion::V1_0_0]
    }

    /// Platforms with official Blender binaries for this release.
    pub fn valid_bl_platforms(self) -> &'static [BLPlatform] {
        match self {
            // windows-arm64 binaries first shipped with 4.2.1.
            R::BL4_2_0 => &[
                BLPlatform::LinuxX64,
                BLPlatform::MacosArm64,
                BLPlatform::MacosX64,
                BLPlatform::WindowsX64,
            ],
            _ => &[
                BLPlatform::LinuxX64,
                BLPlatform::MacosArm64,
                BLPlatform::MacosX64,
                BLPlatform::WindowsArm64,
                BLPlatform::WindowsX64,
            ],
        }
    }

    /// Extension tags this Blender release can parse.
    pub fn valid_extension_tags(self) -> &'static [&'static str] {
        &[
            "3D View",
            "Add Curve",
            "Add Mesh",
            "Animation",
            "Bake",
            "Camera",
            "Compositing",
            "Development",
            "Game Engine",
            "Geometry Nodes",
            "Grease Pencil",
            "Import-Export",
            "Lighting",
            "Material",
            "Modeling",
            "Mesh",
            "Node",
            "Object",
            "Paint",
            "Pipeline",
            "Physics",
            "Render",
            "Rigging",
            "Scene",
            "Sculpt",
            "Sequencer",
            "System",
            "Text Editor",
            "Tracking",
            "User Interface",
            "UV",
        ]
    }

    /// Python packages shipped inside Blender itself, with their versions.
    fn vendored_site_packages_raw(self) -> &'static [(&'static str, &'static str)] {
        match self {
            v if v.is_4_2() => &[
                ("autopep8", "1.6.0"),
                ("certifi", "2021.10.8"),
                ("charset_normalizer", "2.0.10"),
                ("Cython", "0.29.30"),
                ("idna", "3.3"),
                ("numpy", "1.24.3"),
                ("pip", "23.2.1"),
                ("pycodestyle", "2.8.0"),
                ("requests", "2.27.1"),
                ("setuptools", "63.2.0"),
                ("toml", "0.10.2"),
                ("urllib3", "1.26.8"),
                ("zstandard", "0.16.0"),
            ],
            v if v.is_4_3() => &[
                ("autopep8", "2.3.1"),
                ("certifi", "2021.10.8"),
                ("charset_normalizer", "2.0.10"),
                ("Cython", "0.29.30"),
                ("idna", "3.3"),
                ("numpy", "1.24.3"),
                ("pip", "24.0"),
                ("pycodestyle", "2.12.1"),
                ("requests", "2.27.1"),
                ("setuptools", "63.2.0"),
                ("urllib3", "1.26.8"),
                ("zstandard", "0.16.0"),
            ],
            _ => &[
                ("autopep8", "2.3.1"),
                ("certifi", "2021.10.8"),
                ("charset_normalizer", "2.0.10"),
                ("Cython", "3.0.11"),
                ("idna", "3.3"),
                ("numpy", "1.26.4"),
                ("pip", "24.0"),
                ("pycodestyle", "2.12.1"),
                ("requests", "2.27.1"),
                ("setuptools", "63.2.0"),
                ("urllib3", "1.26.8"),
                ("zstandard", "0.16.0"),
            ],
        }
    }

    /// The exact Python interpreter version bundled with this release.
    pub fn py_sys_version(self) -> (u16, u16, u16) {
        match self {
            v if v.is_4_2() => (3, 11, 7),
            v if v.is_4_3() => (3, 11, 9),
            _ => (3, 11, 11),
        }
    }

    /// Interpreter tags compatible with this release's Python runtime.
    pub fn valid_python_tags(self) -> &'static [&'static str] {
        &["py3", "cp36", "cp37", "cp38", "cp39", "cp310", "cp311"]
    }

    /// ABI tags compatible with this release's Python runtime.
    pub fn valid_abi_tags(self) -> &'static [&'static str] {
        &["none", "abi3", "cp311"]
    }

    /// The optional-dependency `extra` name encoding this Blender version in
    /// lockfile markers. Uses `-` rather than `_`, matching the lockfile.
    pub fn pymarker_extra(self) -> &'static str {
        match self {
            v if v.is_4_2() => "blender4-2",
            v if v.is_4_3() => "blender4-3",
            _ => "blender4-4",
        }
    }

    /// All releases of one `major.minor` family, ascending.
    pub fn from_family(major: u32, minor: u32) -> Vec<BLReleaseOfficial> {
        Self::ALL
            .into_iter()
            .filter(|release| {
                let (release_major, release_minor, _) = release.version();
                (release_major, release_minor) == (major, minor)
            })
            .collect()
    }

    /// All releases in the inclusive-below, exclusive-above range
    /// `[version_min, version_max)`, ascending. An absent `version_max` leaves
    /// the range open above.
    pub fn from_version_range(
        version_min: (u32, u32, u32),
        version_max: Option<(u32, u32, u32)>,
    ) -> Vec<BLReleaseOfficial> {
        Self::ALL
            .into_iter()
            .filter(|release| {
                release.version() >= version_min
                    && version_max
                        .map(|version_max| release.version() < version_max)
                        .unwrap_or(true)
            })
            .collect()
    }

    /// Project this release onto the logical Blender version it represents.
    pub fn bl_version(self) -> BLVersion {
        let (major, minor, patch) = self.version();
        BLVersion {
            released_on: self.released_on(),
            blender_version_min: self.version(),
            blender_version_max: Some((major, minor, patch + 1)),
            source_versions: vec![self.version()],
            valid_manifest_versions: self.valid_manifest_versions().iter().copied().collect(),
            valid_extension_tags: self
                .valid_extension_tags()
                .iter()
                .map(|tag| tag.to_string())
                .collect(),
            valid_bl_platforms: self.valid_bl_platforms().iter().copied().collect(),
            min_glibc_version: self.min_glibc_version(),
            min_macos_version: self.min_macos_version(),
            py_sys_version: self.py_sys_version(),
            valid_python_tags: self
                .valid_python_tags()
                .iter()
                .map(|tag| tag.to_string())
                .collect(),
            valid_abi_tags: self
                .valid_abi_tags()
                .iter()
                .map(|tag| tag.to_string())
                .collect(),
            pymarker_extras: [self.pymarker_extra().to_string()].into_iter().collect(),
            vendored_site_packages: self
                .vendored_site_packages_raw()
                .iter()
                .map(|(name, version)| {
                    (
                        normalize_name(name),
                        [Version::from_str(version)
                            .expect("vendored package versions in the catalog are well-formed")]
                        .into_iter()
                        .collect(),
                    )
                })
                .collect(),
        }
    }
}

/// A logical Blender version: either a single release or a chunk of
/// consecutive releases that one archive can serve.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BLVersion {
    /// Release instant of the earliest release covered.
    pub released_on: DateTime<FixedOffset>,
    /// Inclusive lower version bound, embedded in the manifest.
    pub blender_version_min: (u32, u32, u32),
    /// Exclusive upper version bound; `None` leaves the manifest open above.
    pub blender_version_max: Option<(u32, u32, u32)>,
    /// The granular versions covered, ascending.
    pub source_versions: Vec<(u32, u32, u32)>,

    pub valid_manifest_versions: BTreeSet<BLManifestVersion>,
    pub valid_extension_tags: BTreeSet<String>,
    pub valid_bl_platforms: BTreeSet<BLPlatform>,
    pub min_glibc_version: (u16, u16),
    pub min_macos_version: (u16, u16),

    pub py_sys_version: (u16, u16, u16),
    pub valid_python_tags: BTreeSet<String>,
    pub valid_abi_tags: BTreeSet<String>,

    pub pymarker_extras: BTreeSet<String>,
    /// Vendored versions per package name. A chunk accumulates one entry per
    /// distinct version across its merged releases; an extension dependency
    /// only passes when it matches every one of them.
    pub vendored_site_packages: BTreeMap<String, BTreeSet<Version>>,
}

pub fn format_version((major, minor, patch): (u32, u32, u32)) -> String {
    format!("{}.{}.{}", major, minor, patch)
}

/// Parse an all-digit `M.m.p` Blender version string.
pub fn parse_version(s: &str) -> Option<(u32, u32, u32)> {
    let mut numbers = s.split('.').map(|number| number.parse::<u32>().ok());
    match (numbers.next(), numbers.next(), numbers.next(), numbers.next()) {
        (Some(Some(major)), Some(Some(minor)), Some(Some(patch)), None) => {
            Some((major, minor, patch))
        }
        _ => None,
    }
}

impl BLVersion {
    /// Display string: the single version, or `min-max` for a chunk.
    pub fn version_string(&self) -> String {
        if self.source_versions.len() == 1 {
            format_version(self.blender_version_min)
        } else {
            match self.blender_version_max {
                Some(version_max) => format!(
                    "{}-{}",
                    format_version(self.blender_version_min),
                    format_version(version_max),
                ),
                None => format!("{}+", format_version(self.blender_version_min)),
            }
        }
    }

    pub fn max_manifest_version(&self) -> BLManifestVersion {
        *self
            .valid_manifest_versions
            .iter()
            .next_back()
            .expect("every catalogued Blender version supports at least one manifest schema")
    }

    /// Value of `implementation_version` in this version's marker environment.
    pub fn pymarker_implementation_version(&self) -> String {
        let (major, minor, patch) = self.py_sys_version;
        format!("{}.{}.{}", major, minor, patch)
    }

    /// `extra` names the external resolver synthesizes to disambiguate
    /// conflicting optional-dependency groups: `extra-<len>-<name>-<extra>`,
    /// with `_` replaced by `-` in the package name.
    pub fn pymarker_encoded_package_extras(&self, pkg_name: &str) -> Vec<String> {
        let pkg_name = pkg_name.replace('_', "-");
        self.pymarker_extras
            .iter()
            .map(|extra| format!("extra-{}-{}-{}", pkg_name.len(), pkg_name, extra))
            .collect()
    }

    /// Will an extension that works with one version also work with the
    /// other? Each check may be relaxed to what the extension actually uses.
    pub fn is_smooshable_with(
        &self,
        other: &BLVersion,
        ext_bl_platforms: Option<&BTreeSet<BLPlatform>>,
        ext_wheels_python_tags: Option<&BTreeSet<String>>,
        ext_wheels_abi_tags: Option<&BTreeSet<String>>,
        ext_tags: Option<&BTreeSet<String>>,
    ) -> bool {
        // One archive needs at least one manifest schema both sides parse.
        !self
            .valid_manifest_versions
            .is_disjoint(&other.valid_manifest_versions)
            && match ext_bl_platforms {
                None => self.valid_bl_platforms == other.valid_bl_platforms,
                Some(ext_bl_platforms) => {
                    ext_bl_platforms.is_subset(&self.valid_bl_platforms)
                        && ext_bl_platforms.is_subset(&other.valid_bl_platforms)
                }
            }
            && match ext_wheels_python_tags {
                None => self.valid_python_tags == other.valid_python_tags,
                Some(ext_python_tags) => {
                    ext_python_tags.is_subset(&self.valid_python_tags)
                        && ext_python_tags.is_subset(&other.valid_python_tags)
                }
            }
            && match ext_wheels_abi_tags {
                None => self.valid_abi_tags == other.valid_abi_tags,
                Some(ext_abi_tags) => {
                    ext_abi_tags.is_subset(&self.valid_abi_tags)
                        && ext_abi_tags.is_subset(&other.valid_abi_tags)
                }
            }
            && match ext_tags {
                None => self.valid_extension_tags == other.valid_extension_tags,
                Some(ext_tags) => {
                    ext_tags.is_subset(&self.valid_extension_tags)
                        && ext_tags.is_subset(&other.valid_extension_tags)
                }
            }
    }

    /// Merge `other` into this chunk. Callers must have checked
    /// `is_smooshable_with` first.
    pub fn smoosh_with(&self, other: &BLVersion) -> BLVersion {
        let mut source_versions: Vec<(u32, u32, u32)> = self
            .source_versions
            .iter()
            .chain(&other.source_versions)
            .copied()
            .collect();
        source_versions.sort();
        source_versions.dedup();

        BLVersion {
            released_on: self.released_on.min(other.released_on),
            blender_version_min: self.blender_version_min.min(other.blender_version_min),
            blender_version_max: match (self.blender_version_max, other.blender_version_max) {
                (Some(a), Some(b)) => Some(a.max(b)),
                _ => None,
            },
            source_versions,
            valid_manifest_versions: self
                .valid_manifest_versions
                .intersection(&other.valid_manifest_versions)
                .copied()
                .collect(),
            valid_extension_tags: self
                .valid_extension_tags
                .intersection(&other.valid_extension_tags)
                .cloned()
                .collect(),
            valid_bl_platforms: self
                .valid_bl_platforms
                .intersection(&other.valid_bl_platforms)
                .copied()
                .collect(),
            min_glibc_version: self.min_glibc_version.min(other.min_glibc_version),
            min_macos_version: self.min_macos_version.min(other.min_macos_version),
            py_sys_version: self.py_sys_version.min(other.py_sys_version),
            valid_python_tags: self
                .valid_python_tags
                .intersection(&other.valid_python_tags)
                .cloned()
                .collect(),
            valid_abi_tags: self
                .valid_abi_tags
                .intersection(&other.valid_abi_tags)
                .cloned()
                .collect(),
            pymarker_extras: self
                .pymarker_extras
                .union(&other.pymarker_extras)
                .cloned()
                .collect(),
            vendored_site_packages: {
                let mut merged = self.vendored_site_packages.clone();
                for (name, versions) in &other.vendored_site_packages {
                    merged
                        .entry(name.clone())
                        .or_default()
                        .extend(versions.iter().cloned());
                }
                merged
            },
        }
    }
}

/// Fold sorted granular versions into the smallest set of chunks such that
/// one archive serves each chunk. Returns the chunks and, for each granular
/// input, the index of the chunk it landed in.
///
/// The reduction is monotone over the sorted input and idempotent: re-chunking
/// a chunked list changes nothing.
pub fn smoosh_bl_versions(
    sorted_granular: &[BLVersion],
    ext_bl_platforms: Option<&BTreeSet<BLPlatform>>,
    ext_wheels_python_tags: Option<&BTreeSet<String>>,
    ext_wheels_abi_tags: Option<&BTreeSet<String>>,
    ext_tags: Option<&BTreeSet<String>>,
) -> (Vec<BLVersion>, Vec<usize>) {
    let mut chunks: Vec<BLVersion> = Vec::new();
    let mut chunk_by_granular = Vec::with_capacity(sorted_granular.len());

    for granular in sorted_granular {
        match chunks.last_mut() {
            Some(accumulator)
                if accumulator.is_smooshable_with(
                    granular,
                    ext_bl_platforms,
                    ext_wheels_python_tags,
                    ext_wheels_abi_tags,
                    ext_tags,
                ) =>
            {
                *accumulator = accumulator.smoosh_with(granular);
            }
            _ => chunks.push(granular.clone()),
        }
        chunk_by_granular.push(chunks.len() - 1);
    }

    (chunks, chunk_by_granular)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn range_is_inclusive_below_exclusive_above() {
        let releases = BLReleaseOfficial::from_version_range((4, 2, 0), Some((4, 4, 0)));
        assert_eq!(releases.len(), 12);
        assert_eq!(releases.first().unwrap().version(), (4, 2, 0));
        assert_eq!(releases.last().unwrap().version(), (4, 3, 2));

        let open_above = BLReleaseOfficial::from_version_range((4, 3, 1), None);
        assert_eq!(
            open_above.iter().map(|r| r.version()).collect::<Vec<_>>(),
            vec![(4, 3, 1), (4, 3, 2), (4, 4, 0)],
        );

        assert!(BLReleaseOfficial::from_version_range((5, 0, 0), None).is_empty());
    }

    #[test]
    fn family_enumeration() {
        assert_eq!(BLReleaseOfficial::from_family(4, 2).len(), 9);
        assert_eq!(BLReleaseOfficial::from_family(4, 3).len(), 3);
        assert_eq!(
            BLReleaseOfficial::from_family(4, 4),
            vec![R::BL4_4_0],
        );
        assert!(BLReleaseOfficial::from_family(5, 0).is_empty());
    }

    #[test]
    fn release_dates_are_timezone_aware_and_comparable() {
        // 4.3.0 was released before the 4.2.5 LTS backport.
        assert!(R::BL4_3_0.released_on() < R::BL4_2_5.released_on());
        assert!(R::BL4_2_0.released_on() < R::BL4_4_0.released_on());
    }

    #[test]
    fn vendored_packages_are_normalized() {
        let bl_version = R::BL4_2_0.bl_version();
        assert!(bl_version.vendored_site_packages.contains_key("cython"));
        assert!(!bl_version.vendored_site_packages.contains_key("Cython"));
        assert_eq!(
            bl_version.vendored_site_packages["numpy"],
            [Version::from_str("1.24.3").unwrap()].into_iter().collect(),
        );
    }

    #[test]
    fn full_range_smooshes_to_one_chunk_for_common_platforms() {
        // Restricted to platforms every release supports, all properties the
        // extension observes agree, so the whole range coalesces.
        let granular: Vec<BLVersion> = BLReleaseOfficial::from_version_range((4, 2, 0), None)
            .into_iter()
            .map(|release| release.bl_version())
            .collect();
        let ext_platforms: BTreeSet<BLPlatform> = [BLPlatform::LinuxX64].into_iter().collect();
        let (chunks, chunk_by_granular) =
            smoosh_bl_versions(&granular, Some(&ext_platforms), None, None, None);
        assert_eq!(chunks.len(), 1);
        assert!(chunk_by_granular.iter().all(|&idx| idx == 0));
        assert_eq!(chunks[0].blender_version_min, (4, 2, 0));
        assert_eq!(chunks[0].blender_version_max, Some((4, 4, 1)));
        assert_eq!(chunks[0].source_versions.len(), granular.len());
        // Extras from all three release families are carried.
        assert_eq!(chunks[0].pymarker_extras.len(), 3);
        // The chunk keeps the most permissive macOS floor.
        assert_eq!(chunks[0].min_macos_version, (11, 0));
    }

    #[test]
    fn windows_arm64_splits_4_2_0_off() {
        // 4.2.0 has no windows-arm64 binaries, so requiring that platform
        // forces a chunk boundary after 4.2.0.
        let granular: Vec<BLVersion> = BLReleaseOfficial::from_version_range((4, 2, 0), None)
            .into_iter()
            .map(|release| release.bl_version())
            .collect();
        let ext_platforms: BTreeSet<BLPlatform> =
            [BLPlatform::WindowsArm64].into_iter().collect();
        let (chunks, chunk_by_granular) =
            smoosh_bl_versions(&granular, Some(&ext_platforms), None, None, None);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].source_versions, vec![(4, 2, 0)]);
        assert_eq!(chunk_by_granular[0], 0);
        assert!(chunk_by_granular[1..].iter().all(|&idx| idx == 1));
    }

    #[test]
    fn smooshing_is_idempotent() {
        let granular: Vec<BLVersion> = BLReleaseOfficial::from_version_range((4, 2, 0), None)
            .into_iter()
            .map(|release| release.bl_version())
            .collect();
        let ext_platforms: BTreeSet<BLPlatform> = [BLPlatform::LinuxX64].into_iter().collect();
        let (chunks, _) = smoosh_bl_versions(&granular, Some(&ext_platforms), None, None, None);
        let (rechunked, _) = smoosh_bl_versions(&chunks, Some(&ext_platforms), None, None, None);
        assert_eq!(chunks, rechunked);
    }

    #[test]
    fn version_strings() {
        let single = R::BL4_2_0.bl_version();
        assert_eq!(single.version_string(), "4.2.0");

        let granular: Vec<BLVersion> = BLReleaseOfficial::from_version_range((4, 2, 0), None)
            .into_iter()
            .map(|release| release.bl_version())
            .collect();
        let ext_platforms: BTreeSet<BLPlatform> = [BLPlatform::LinuxX64].into_iter().collect();
        let (mut chunks, _) =
            smoosh_bl_versions(&granular, Some(&ext_platforms), None, None, None);
        assert_eq!(chunks[0].version_string(), "4.2.0-4.4.1");
        chunks[0].blender_version_max = Some((4, 4, 0));
        assert_eq!(chunks[0].version_string(), "4.2.0-4.4.0");
        chunks[0].blender_version_max = None;
        assert_eq!(chunks[0].version_string(), "4.2.0+");
    }

    #[test]
    fn parse_and_format_versions() {
        assert_eq!(parse_version("4.2.0"), Some((4, 2, 0)));
        assert_eq!(parse_version("4.2"), None);
        assert_eq!(parse_version("4.2.x"), None);
        assert_eq!(format_version((4, 11, 2)), "4.11.2");
    }
}
