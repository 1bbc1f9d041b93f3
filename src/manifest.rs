//! The `blender_manifest.toml` schema and its validation rules.
//!
//! Validation mirrors what `blender --command extension validate` rejects for
//! the `1.0.0` schema, so that an archive we emit never fails Blender's own
//! validator. Any divergence between the two is a bug here, not in Blender.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Manifest schema versions Blender can parse.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum BLManifestVersion {
    V1_0_0,
}

impl BLManifestVersion {
    pub fn schema_version(self) -> &'static str {
        match self {
            BLManifestVersion::V1_0_0 => "1.0.0",
        }
    }
}

pub const MANIFEST_FILENAME: &str = "blender_manifest.toml";

/// Permissions an extension may request, with the closed key set Blender
/// accepts.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Files,
    Network,
    Clipboard,
    Camera,
    Microphone,
}

impl Permission {
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "files" => Some(Permission::Files),
            "network" => Some(Permission::Network),
            "clipboard" => Some(Permission::Clipboard),
            "camera" => Some(Permission::Camera),
            "microphone" => Some(Permission::Microphone),
            _ => None,
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Permission::Files => "files",
            Permission::Network => "network",
            Permission::Clipboard => "clipboard",
            Permission::Camera => "camera",
            Permission::Microphone => "microphone",
        })
    }
}

/// One schema-validation failure, named field first.
#[derive(Debug, Clone)]
pub struct SchemaViolation {
    pub field: String,
    pub rule: String,
}

/// Aggregate of every invariant a specification or manifest violates.
#[derive(Debug)]
pub struct SchemaError {
    pub violations: Vec<SchemaViolation>,
}

impl std::error::Error for SchemaError {}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "The extension specification is invalid:")?;
        for violation in &self.violations {
            writeln!(f, "- `{}`: {}", violation.field, violation.rule)?;
        }
        Ok(())
    }
}

/// The `1.0.0` Blender extension manifest.
///
/// `toml` serializes struct fields in declaration order, and every plain
/// value must precede a table, so the table-valued `permissions` map comes
/// last.
#[derive(Debug, Clone, Serialize)]
pub struct BLManifest {
    pub schema_version: String,
    pub id: String,
    pub version: String,
    pub name: String,
    pub tagline: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maintainer: Option<String>,
    #[serde(rename = "type")]
    pub extension_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    pub blender_version_min: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blender_version_max: Option<String>,
    pub license: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub copyright: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platforms: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wheels: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<BTreeMap<String, String>>,
}

impl BLManifest {
    /// Check every rule Blender's validator would check.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut violations = Vec::new();
        let mut check = |ok: bool, field: &str, rule: &str| {
            if !ok {
                violations.push(SchemaViolation {
                    field: field.to_string(),
                    rule: rule.to_string(),
                });
            }
        };

        check(
            is_valid_identifier(&self.id),
            "id",
            "must be a valid identifier that does not contain `__` and neither starts nor ends with `_`",
        );
        check(
            is_clean_string(&self.name),
            "name",
            "must be a non-empty string without surrounding whitespace or control characters",
        );
        check(
            is_valid_tagline(&self.tagline),
            "tagline",
            "must be at most 64 characters and end with an alphanumeric character or one of `)`, `]`, `}`",
        );
        check(
            is_valid_semver(&self.version),
            "version",
            "must be a semantic version whose numeric segments contain only digits",
        );
        check(
            all_version_numbers_are_digits(&self.blender_version_min)
                && blender_version_is_at_least_4_2(&self.blender_version_min),
            "blender_version_min",
            "must be an all-digit version of at least 4.2",
        );
        if let Some(blender_version_max) = &self.blender_version_max {
            check(
                all_version_numbers_are_digits(blender_version_max)
                    && blender_version_is_at_least_4_2(blender_version_max),
                "blender_version_max",
                "must be an all-digit version of at least 4.2",
            );
        }
        if let Some(maintainer) = &self.maintainer {
            check(
                is_clean_string(maintainer),
                "maintainer",
                "must be a non-empty string without surrounding whitespace or control characters",
            );
        }
        check(
            !self.license.is_empty(),
            "license",
            "must name at least one SPDX license",
        );
        if let Some(copyright) = &self.copyright {
            for line in copyright {
                check(
                    is_valid_copyright_line(line),
                    "copyright",
                    "each line must start with a year or year range, followed by a non-empty name",
                );
            }
        }
        if let Some(permissions) = &self.permissions {
            for (key, justification) in permissions {
                check(
                    Permission::from_key(key).is_some(),
                    "permissions",
                    "keys must be one of files, network, clipboard, camera, microphone",
                );
                check(
                    is_valid_tagline(justification),
                    "permissions",
                    "justifications follow the tagline rules",
                );
            }
        }
        if let Some(wheels) = &self.wheels {
            for wheel in wheels {
                check(
                    is_valid_wheel_path(wheel),
                    "wheels",
                    "entries must be clean relative `.whl` paths with 4 or 5 dashes in the filename",
                );
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(SchemaError { violations })
        }
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string(self)?)
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// `str.isidentifier()` without `__` and without leading/trailing `_`.
pub fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    let first_is_valid = chars
        .next()
        .map(|c| c.is_alphabetic() || c == '_')
        .unwrap_or(false);
    first_is_valid
        && s.chars().all(|c| c.is_alphanumeric() || c == '_')
        && !s.contains("__")
        && !s.starts_with('_')
        && !s.ends_with('_')
}

pub fn is_clean_string(s: &str) -> bool {
    !s.trim().is_empty() && s == s.trim() && !s.chars().any(is_bl_control_char)
}

fn is_bl_control_char(c: char) -> bool {
    matches!(c, '\u{0000}'..='\u{001f}' | '\u{007f}'..='\u{009f}')
}

pub fn is_valid_tagline(s: &str) -> bool {
    s.chars().count() <= 64
        && !s.contains("__")
        && !s.starts_with('_')
        && !s.ends_with('_')
        && s.chars()
            .last()
            .map(|c| c.is_alphanumeric() || matches!(c, ')' | ']' | '}'))
            .unwrap_or(false)
}

/// `M.m.p` with optional `-prerelease` and `+buildmetadata`, as Blender
/// defines semver.
pub fn is_valid_semver(s: &str) -> bool {
    let without_build = s.split_once('+').map(|(core, _)| core).unwrap_or(s);
    let core = without_build
        .split_once('-')
        .map(|(core, prerelease)| if prerelease.is_empty() { "" } else { core })
        .unwrap_or(without_build);
    core.split('.').count() == 3 && all_version_numbers_are_digits(core)
}

pub fn all_version_numbers_are_digits(s: &str) -> bool {
    !s.is_empty()
        && s.split('.')
            .all(|number| !number.is_empty() && number.chars().all(|c| c.is_ascii_digit()))
}

pub fn blender_version_is_at_least_4_2(s: &str) -> bool {
    let mut numbers = s.split('.').filter_map(|n| n.parse::<u32>().ok());
    match (numbers.next(), numbers.next()) {
        (Some(major), Some(minor)) => major > 4 || (major == 4 && minor >= 2),
        (Some(major), None) => major > 4,
        _ => false,
    }
}

/// `<year> <name>` or `<year1>-<year2> <name>`.
pub fn is_valid_copyright_line(s: &str) -> bool {
    let (year, name) = match s.split_once(' ') {
        Some((year, name)) => (year, name),
        None => return false,
    };
    let year_is_valid = match year.split_once('-') {
        Some((from, to)) => {
            !from.is_empty()
                && !to.is_empty()
                && from.chars().all(|c| c.is_ascii_digit())
                && to.chars().all(|c| c.is_ascii_digit())
        }
        None => !year.is_empty() && year.chars().all(|c| c.is_ascii_digit()),
    };
    year_is_valid && !name.trim().is_empty()
}

fn is_valid_wheel_path(s: &str) -> bool {
    let filename = s.rsplit('/').next().unwrap_or(s);
    is_clean_string(s)
        && !s.contains('"')
        && !s.contains('\\')
        && filename.to_lowercase().ends_with(".whl")
        && matches!(filename.split('-').count(), 5 | 6)
}

#[cfg(test)]
mod test {
    use super::*;

    fn minimal_manifest() -> BLManifest {
        BLManifest {
            schema_version: "1.0.0".to_string(),
            id: "my_extension".to_string(),
            version: "0.1.0".to_string(),
            name: "My Extension".to_string(),
            tagline: "Does a thing (well)".to_string(),
            maintainer: Some("Jane Doe <jane@example.com>".to_string()),
            extension_type: "add-on".to_string(),
            website: None,
            tags: None,
            blender_version_min: "4.2.0".to_string(),
            blender_version_max: None,
            license: vec!["SPDX:GPL-3.0-or-later".to_string()],
            copyright: Some(vec!["2025 My Extension Contributors".to_string()]),
            platforms: None,
            permissions: None,
            wheels: None,
        }
    }

    #[test]
    fn minimal_manifest_is_valid() {
        minimal_manifest().validate().unwrap();
    }

    #[test]
    fn toml_export_omits_absent_fields() {
        let toml_str = minimal_manifest().to_toml().unwrap();
        assert!(toml_str.contains("schema_version = \"1.0.0\""));
        assert!(toml_str.contains("type = \"add-on\""));
        assert!(!toml_str.contains("blender_version_max"));
        assert!(!toml_str.contains("wheels"));
        assert!(!toml_str.contains("platforms"));
    }

    #[test]
    fn bad_fields_are_aggregated() {
        let mut manifest = minimal_manifest();
        manifest.id = "_bad__id_".to_string();
        manifest.tagline = "ends in a dash-".to_string();
        manifest.blender_version_min = "4.1.0".to_string();
        manifest.copyright = Some(vec!["no year here".to_string()]);
        let err = manifest.validate().unwrap_err();
        let fields: Vec<&str> = err
            .violations
            .iter()
            .map(|violation| violation.field.as_str())
            .collect();
        assert_eq!(
            fields,
            vec!["id", "tagline", "blender_version_min", "copyright"]
        );
    }

    #[test]
    fn copyright_year_ranges() {
        assert!(is_valid_copyright_line("2024 Jane"));
        assert!(is_valid_copyright_line("2024-2025 Jane Doe"));
        assert!(!is_valid_copyright_line("Jane Doe"));
        assert!(!is_valid_copyright_line("2024"));
        assert!(!is_valid_copyright_line("2024- Jane"));
    }

    #[test]
    fn identifier_rules() {
        assert!(is_valid_identifier("simple_proj"));
        assert!(!is_valid_identifier("_simple"));
        assert!(!is_valid_identifier("simple_"));
        assert!(!is_valid_identifier("simple__proj"));
        assert!(!is_valid_identifier("0simple"));
        assert!(!is_valid_identifier("my-ext"));
    }

    #[test]
    fn wheel_path_rules() {
        assert!(is_valid_wheel_path(
            "./wheels/tqdm-4.66.2-py3-none-any.whl"
        ));
        assert!(!is_valid_wheel_path("./wheels/tqdm.whl"));
        assert!(!is_valid_wheel_path(
            ".\\wheels\\tqdm-4.66.2-py3-none-any.whl"
        ));
    }
}
