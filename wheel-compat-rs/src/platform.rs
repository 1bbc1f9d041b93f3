//! The closed set of OS/architecture combinations supported by Blender,
//! plus the canonical multi-platform grouping used to name archives.

use crate::{Wheel, WheelCompatError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One OS/architecture combination supported by Blender.
///
/// The string forms correspond exactly to the `platforms` values of the
/// official Blender extension manifest. Variants are declared in the
/// lexicographic order of those strings so that the derived `Ord` sorts the
/// same way the canonical string form does.
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
pub enum BLPlatform {
    #[serde(rename = "linux-arm64")]
    LinuxArm64,
    #[serde(rename = "linux-x64")]
    LinuxX64,
    #[serde(rename = "macos-arm64")]
    MacosArm64,
    #[serde(rename = "macos-x64")]
    MacosX64,
    #[serde(rename = "windows-arm64")]
    WindowsArm64,
    #[serde(rename = "windows-x64")]
    WindowsX64,
}

impl BLPlatform {
    pub const ALL: [BLPlatform; 6] = [
        BLPlatform::LinuxArm64,
        BLPlatform::LinuxX64,
        BLPlatform::MacosArm64,
        BLPlatform::MacosX64,
        BLPlatform::WindowsArm64,
        BLPlatform::WindowsX64,
    ];

    pub fn is_linux(self) -> bool {
        matches!(self, BLPlatform::LinuxX64 | BLPlatform::LinuxArm64)
    }

    pub fn is_macos(self) -> bool {
        matches!(self, BLPlatform::MacosX64 | BLPlatform::MacosArm64)
    }

    pub fn is_windows(self) -> bool {
        matches!(self, BLPlatform::WindowsX64 | BLPlatform::WindowsArm64)
    }

    /// PyPI CPU-architecture suffixes a wheel platform tag may end with to be
    /// considered compatible with this platform.
    ///
    /// PyPI has its own conventions for tagging CPU architectures, including
    /// the `universal*` family on macOS, so this is a hard-coded bridge rather
    /// than a string comparison.
    pub fn pypi_arches(self) -> &'static [&'static str] {
        match self {
            BLPlatform::LinuxX64 => &["x86_64"],
            BLPlatform::LinuxArm64 => &["aarch64", "armv7l", "arm64"],
            BLPlatform::MacosX64 => {
                &["x86_64", "universal", "universal2", "intel", "fat3", "fat64"]
            }
            BLPlatform::MacosArm64 => &["arm64", "universal2"],
            BLPlatform::WindowsX64 => &["", "amd64"],
            BLPlatform::WindowsArm64 => &["arm64"],
        }
    }

    /// Prefix of wheel platform tags that target this platform's OS family.
    pub fn wheel_platform_tag_prefix(self) -> &'static str {
        match self {
            BLPlatform::LinuxX64 | BLPlatform::LinuxArm64 => "manylinux_",
            BLPlatform::MacosX64 | BLPlatform::MacosArm64 => "macosx_",
            BLPlatform::WindowsX64 | BLPlatform::WindowsArm64 => "win",
        }
    }

    /// Value of `os.name` in a Python running on this platform.
    pub fn pymarker_os_name(self) -> &'static str {
        if self.is_windows() {
            "nt"
        } else {
            "posix"
        }
    }

    /// Values `platform.machine()` may take on this platform.
    pub fn pymarker_platform_machines(self) -> &'static [&'static str] {
        match self {
            BLPlatform::LinuxX64 => &["x86_64"],
            BLPlatform::LinuxArm64 => &["aarch64", "armv7l", "arm64"],
            BLPlatform::MacosX64 => &["x86_64", "i386"],
            BLPlatform::MacosArm64 => &["arm64"],
            BLPlatform::WindowsX64 => &["amd64"],
            BLPlatform::WindowsArm64 => &["arm64"],
        }
    }

    /// Value of `platform.system()` in a Python running on this platform.
    pub fn pymarker_platform_system(self) -> &'static str {
        match self {
            BLPlatform::LinuxX64 | BLPlatform::LinuxArm64 => "Linux",
            BLPlatform::MacosX64 | BLPlatform::MacosArm64 => "Darwin",
            BLPlatform::WindowsX64 | BLPlatform::WindowsArm64 => "Windows",
        }
    }

    /// Value of `sys.platform` in a Python running on this platform.
    pub fn pymarker_sys_platform(self) -> &'static str {
        match self {
            BLPlatform::LinuxX64 | BLPlatform::LinuxArm64 => "linux",
            BLPlatform::MacosX64 | BLPlatform::MacosArm64 => "darwin",
            BLPlatform::WindowsX64 | BLPlatform::WindowsArm64 => "win32",
        }
    }
}

impl fmt::Display for BLPlatform {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            BLPlatform::LinuxArm64 => "linux-arm64",
            BLPlatform::LinuxX64 => "linux-x64",
            BLPlatform::MacosArm64 => "macos-arm64",
            BLPlatform::MacosX64 => "macos-x64",
            BLPlatform::WindowsArm64 => "windows-arm64",
            BLPlatform::WindowsX64 => "windows-x64",
        })
    }
}

impl FromStr for BLPlatform {
    type Err = WheelCompatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let platform = match s {
            "linux-arm64" => BLPlatform::LinuxArm64,
            "linux-x64" => BLPlatform::LinuxX64,
            "macos-arm64" => BLPlatform::MacosArm64,
            "macos-x64" => BLPlatform::MacosX64,
            "windows-arm64" => BLPlatform::WindowsArm64,
            "windows-x64" => BLPlatform::WindowsX64,
            unknown => return Err(WheelCompatError::UnknownPlatform(unknown.to_string())),
        };
        Ok(platform)
    }
}

/// A non-empty set of [`BLPlatform`]s served by a single extension archive.
///
/// The canonical string form is the members sorted and joined by `_`, e.g.
/// `linux-x64_macos-arm64`. The `Ord` impl is lexicographic on that form,
/// which makes platform sets usable directly as map keys.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct BLPlatformSet {
    /// Sorted, deduplicated, never empty.
    platforms: Vec<BLPlatform>,
}

impl BLPlatformSet {
    pub fn from_platform(bl_platform: BLPlatform) -> Self {
        Self {
            platforms: vec![bl_platform],
        }
    }

    pub fn from_platforms(
        bl_platforms: impl IntoIterator<Item = BLPlatform>,
    ) -> Result<Self, WheelCompatError> {
        let mut platforms: Vec<BLPlatform> = bl_platforms.into_iter().collect();
        platforms.sort();
        platforms.dedup();
        if platforms.is_empty() {
            return Err(WheelCompatError::EmptyPlatformSet);
        }
        Ok(Self { platforms })
    }

    pub fn platforms(&self) -> &[BLPlatform] {
        &self.platforms
    }

    pub fn contains(&self, bl_platform: BLPlatform) -> bool {
        self.platforms.binary_search(&bl_platform).is_ok()
    }

    pub fn is_windows(&self) -> bool {
        self.platforms.iter().any(|p| p.is_windows())
    }

    /// Union with a single platform, keeping the canonical ordering.
    pub fn smoosh_with(&self, bl_platform: BLPlatform) -> Self {
        let mut platforms = self.platforms.clone();
        if let Err(idx) = platforms.binary_search(&bl_platform) {
            platforms.insert(idx, bl_platform);
        }
        Self { platforms }
    }

    /// Whether one archive can serve both this set and `bl_platform`.
    ///
    /// `wheels` must yield every wheel currently selected for the platforms of
    /// this set, once per supported Blender version, paired with the OS-version
    /// floors in effect for that version. The merge is valid iff each of those
    /// wheels also passes compatibility for `bl_platform` under the same
    /// floors, so that the union archive carries wheels valid for both sides.
    pub fn is_smooshable_with<'a>(
        &self,
        bl_platform: BLPlatform,
        wheels: impl IntoIterator<Item = (&'a Wheel, Option<(u16, u16)>, Option<(u16, u16)>)>,
    ) -> bool {
        wheels
            .into_iter()
            .all(|(wheel, min_glibc_version, min_macos_version)| {
                wheel.works_with_platform(bl_platform, min_glibc_version, min_macos_version)
            })
    }
}

impl fmt::Display for BLPlatformSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut first = true;
        for platform in &self.platforms {
            if !first {
                f.write_str("_")?;
            }
            write!(f, "{}", platform)?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for BLPlatformSet {
    type Err = WheelCompatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_platforms(
            s.split('_')
                .map(BLPlatform::from_str)
                .collect::<Result<Vec<_>, _>>()?,
        )
    }
}

impl From<BLPlatform> for BLPlatformSet {
    fn from(bl_platform: BLPlatform) -> Self {
        Self::from_platform(bl_platform)
    }
}

#[cfg(test)]
mod test {
    use crate::{BLPlatform, BLPlatformSet};
    use std::str::FromStr;

    #[test]
    fn platform_roundtrip() {
        for platform in BLPlatform::ALL {
            assert_eq!(
                BLPlatform::from_str(&platform.to_string()).unwrap(),
                platform
            );
        }
    }

    #[test]
    fn platform_ordering_matches_string_ordering() {
        let mut by_enum = BLPlatform::ALL.to_vec();
        by_enum.sort();
        let mut by_string = BLPlatform::ALL.to_vec();
        by_string.sort_by_key(|p| p.to_string());
        assert_eq!(by_enum, by_string);
    }

    #[test]
    fn singleton_set_roundtrip() {
        for platform in BLPlatform::ALL {
            let set = BLPlatformSet::from_platform(platform);
            assert_eq!(set.platforms(), &[platform]);
            assert_eq!(set.to_string(), platform.to_string());
        }
    }

    #[test]
    fn canonical_form_is_sorted_and_stable() {
        let a = BLPlatformSet::from_platforms([
            BLPlatform::WindowsX64,
            BLPlatform::LinuxX64,
            BLPlatform::MacosArm64,
        ])
        .unwrap();
        let b = BLPlatformSet::from_platforms([
            BLPlatform::MacosArm64,
            BLPlatform::WindowsX64,
            BLPlatform::LinuxX64,
            BLPlatform::LinuxX64,
        ])
        .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "linux-x64_macos-arm64_windows-x64");
        assert_eq!(BLPlatformSet::from_str(&a.to_string()).unwrap(), a);
    }

    #[test]
    fn empty_set_is_rejected() {
        assert!(BLPlatformSet::from_platforms([]).is_err());
    }

    #[test]
    fn smoosh_keeps_ordering() {
        let set = BLPlatformSet::from_platform(BLPlatform::MacosX64)
            .smoosh_with(BLPlatform::LinuxX64)
            .smoosh_with(BLPlatform::MacosX64);
        assert_eq!(set.to_string(), "linux-x64_macos-x64");
    }
}
