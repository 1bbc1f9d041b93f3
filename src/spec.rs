//! The extension specification: one frozen value parsed from a project
//! descriptor (or inline script metadata) plus its lockfile, and the build
//! plan derived from it.
//!
//! `pyproject.toml` is the single source of truth. Standard `[project]`
//! fields are scraped where they fit; everything Blender-specific lives in
//! `[tool.blendpack]`.

use crate::graph::DepGraph;
use crate::inline_metadata::parse_inline_script_metadata;
use crate::lockfile::UvLock;
use crate::manifest::{
    self, BLManifest, Permission, SchemaError, SchemaViolation, MANIFEST_FILENAME,
};
use crate::profiles::{ReleaseProfile, StandardReleaseProfile};
use crate::releases::{
    format_version, parse_version, smoosh_bl_versions, BLReleaseOfficial, BLVersion,
};
use crate::resolve::{select_wheels, ResolutionError, ResolutionFailure};
use anyhow::{bail, Context};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use wheel_compat_rs::{BLPlatform, BLPlatformSet, Wheel};

/// Where the extension's Python source lives.
#[derive(Debug, Clone)]
pub enum ExtensionSource {
    /// A package directory next to `pyproject.toml`, named after the project.
    Project { path_package: PathBuf },
    /// A single `.py` file with inline metadata, packed as `__init__.py`.
    Script { path_script: PathBuf },
}

/// Aggregated "missing or malformed descriptor field" report.
#[derive(Debug)]
pub struct DescriptorError {
    pub path: PathBuf,
    pub problems: Vec<String>,
}

impl std::error::Error for DescriptorError {}

impl fmt::Display for DescriptorError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "In `{}`:", self.path.display())?;
        for problem in &self.problems {
            writeln!(f, "- {}", problem)?;
        }
        Ok(())
    }
}

/// A fully parsed, validated extension specification. Immutable once built;
/// all derived views live on [`BuildPlan`].
#[derive(Debug, Clone)]
pub struct BLExtSpec {
    pub id: String,
    /// Pretty, user-facing name.
    pub name: String,
    pub version: String,
    pub tagline: String,
    pub maintainer: Option<String>,
    /// `SPDX:<license-id>`.
    pub license: String,
    pub blender_version_min: (u32, u32, u32),
    pub blender_version_max: Option<(u32, u32, u32)>,
    pub permissions: BTreeMap<Permission, String>,
    pub copyright: Vec<String>,
    pub tags: Option<BTreeSet<String>>,
    pub website: Option<String>,

    pub granular_bl_platforms: BTreeSet<BLPlatform>,
    pub deps: DepGraph,
    pub release_profile: Option<ReleaseProfile>,
    pub source: ExtensionSource,
    pub path_descriptor: PathBuf,
    pub path_lockfile: PathBuf,
}

impl BLExtSpec {
    /// Parse a specification from `pyproject.toml` or a `.py` script with
    /// inline metadata. The lockfile is read from its conventional sibling
    /// path (`uv.lock`, or `<script>.py.lock`).
    pub fn from_descriptor_path(
        path_descriptor: &Path,
        release_profile_id: Option<&str>,
    ) -> anyhow::Result<Self> {
        if !path_descriptor.is_file() {
            bail!(
                "No extension project specification exists at `{}`",
                path_descriptor.display()
            );
        }
        let filename = path_descriptor
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();

        let (descriptor, source_is_script) = if filename == "pyproject.toml" {
            let raw = fs_err::read_to_string(path_descriptor)?;
            let descriptor: toml::Value = toml::from_str(&raw)
                .with_context(|| format!("Invalid TOML in `{}`", path_descriptor.display()))?;
            (descriptor, false)
        } else if filename.ends_with(".py") {
            let raw = fs_err::read_to_string(path_descriptor)?;
            let descriptor = parse_inline_script_metadata(&raw)?.with_context(|| {
                format!(
                    "Could not find inline script metadata in `{}` (looking for a `# /// script` block)",
                    path_descriptor.display()
                )
            })?;
            (descriptor, true)
        } else {
            bail!(
                "Only `pyproject.toml` and `*.py` scripts with inline script metadata are supported, got `{}`",
                path_descriptor.display()
            );
        };

        Self::from_descriptor_value(&descriptor, path_descriptor, source_is_script, release_profile_id)
    }

    fn from_descriptor_value(
        descriptor: &toml::Value,
        path_descriptor: &Path,
        source_is_script: bool,
        release_profile_id: Option<&str>,
    ) -> anyhow::Result<Self> {
        let mut problems: Vec<String> = Vec::new();

        let project = match descriptor.get("project").and_then(|v| v.as_table()) {
            Some(project) => project,
            None => {
                return Err(DescriptorError {
                    path: path_descriptor.to_path_buf(),
                    problems: vec!["`[project]` table is missing.".to_string()],
                }
                .into());
            }
        };
        let tool_blendpack = match descriptor
            .get("tool")
            .and_then(|tool| tool.get("blendpack"))
            .and_then(|v| v.as_table())
        {
            Some(tool_blendpack) => tool_blendpack,
            None => {
                return Err(DescriptorError {
                    path: path_descriptor.to_path_buf(),
                    problems: vec![
                        "`[tool.blendpack]` table is missing. Is this project a Blender extension? Add the table to configure it as one.".to_string(),
                    ],
                }
                .into());
            }
        };

        let require_str = |table: &toml::map::Map<String, toml::Value>,
                              table_name: &str,
                              key: &str,
                              problems: &mut Vec<String>|
         -> Option<String> {
            match table.get(key) {
                Some(toml::Value::String(value)) => Some(value.clone()),
                Some(other) => {
                    problems.push(format!(
                        "`{}.{}` must be a string (current value: {}).",
                        table_name, key, other
                    ));
                    None
                }
                None => {
                    problems.push(format!("`{}.{}` is not defined.", table_name, key));
                    None
                }
            }
        };

        let project_name = require_str(project, "project", "name", &mut problems);
        let project_version = require_str(project, "project", "version", &mut problems);
        let description = require_str(project, "project", "description", &mut problems);
        let extension_license = match require_str(project, "project", "license", &mut problems) {
            Some(license) => Some(license),
            None => {
                problems.push(
                    "Note that all Blender extensions must declare a GPL-compatible license."
                        .to_string(),
                );
                None
            }
        };

        // requires-python lives at the top level for inline script metadata.
        let requires_python = if source_is_script {
            descriptor
                .get("requires-python")
                .or_else(|| project.get("requires-python"))
        } else {
            project.get("requires-python")
        };
        if !matches!(requires_python, Some(toml::Value::String(_))) {
            problems.push("`project.requires-python` is not defined.".to_string());
        }

        // First maintainer; a missing list falls back to a placeholder.
        let maintainer = match project.get("maintainers") {
            None => Some("Unknown <unknown@example.com>".to_string()),
            Some(toml::Value::Array(maintainers)) => {
                let first = maintainers.first().and_then(|m| {
                    let name = m.get("name")?.as_str()?;
                    let email = m.get("email")?.as_str()?;
                    Some(format!("{} <{}>", name, email))
                });
                if first.is_none() {
                    problems.push(
                        "`project.maintainers` must be a non-empty list of `{ name, email }` records.".to_string(),
                    );
                }
                first
            }
            Some(_) => {
                problems.push("`project.maintainers` must be a list.".to_string());
                None
            }
        };

        let website = project
            .get("urls")
            .and_then(|urls| urls.get("Homepage"))
            .and_then(|homepage| homepage.as_str())
            .map(String::from);

        let pretty_name = require_str(tool_blendpack, "tool.blendpack", "pretty_name", &mut problems);
        let blender_version_min_str =
            require_str(tool_blendpack, "tool.blendpack", "blender_version_min", &mut problems);
        let blender_version_max_str = match tool_blendpack.get("blender_version_max") {
            None => None,
            Some(toml::Value::String(value)) => Some(value.clone()),
            Some(other) => {
                problems.push(format!(
                    "`tool.blendpack.blender_version_max` must be a string (current value: {}).",
                    other
                ));
                None
            }
        };
        let copyright = match tool_blendpack.get("copyright") {
            Some(toml::Value::Array(lines)) => lines
                .iter()
                .map(|line| line.as_str().map(String::from))
                .collect::<Option<Vec<String>>>()
                .or_else(|| {
                    problems.push(
                        "`tool.blendpack.copyright` must be an array of strings.".to_string(),
                    );
                    None
                }),
            Some(_) => {
                problems
                    .push("`tool.blendpack.copyright` must be an array of strings.".to_string());
                None
            }
            None => {
                problems.push(
                    "`tool.blendpack.copyright` is not defined. Example: `copyright = [\"2025 <project> Contributors\"]`.".to_string(),
                );
                None
            }
        };

        let blender_version_min = blender_version_min_str.as_deref().and_then(|s| {
            let parsed = parse_version(s);
            if parsed.is_none() {
                problems.push(format!(
                    "`tool.blendpack.blender_version_min` must be an all-digit `M.m.p` version (current value: {}).",
                    s
                ));
            }
            parsed
        });
        let blender_version_max = blender_version_max_str.as_deref().and_then(|s| {
            let parsed = parse_version(s);
            if parsed.is_none() {
                problems.push(format!(
                    "`tool.blendpack.blender_version_max` must be an all-digit `M.m.p` version (current value: {}).",
                    s
                ));
            }
            parsed
        });

        let permissions = match tool_blendpack.get("permissions") {
            None => BTreeMap::new(),
            Some(toml::Value::Table(table)) => {
                let mut permissions = BTreeMap::new();
                for (key, justification) in table {
                    match (Permission::from_key(key), justification.as_str()) {
                        (Some(permission), Some(justification)) => {
                            permissions.insert(permission, justification.to_string());
                        }
                        (None, _) => problems.push(format!(
                            "`tool.blendpack.permissions` key `{}` is not one of files, network, clipboard, camera, microphone.",
                            key
                        )),
                        (_, None) => problems.push(format!(
                            "`tool.blendpack.permissions.{}` must be a short justification string.",
                            key
                        )),
                    }
                }
                permissions
            }
            Some(_) => {
                problems.push("`tool.blendpack.permissions` must be a table.".to_string());
                BTreeMap::new()
            }
        };

        let tags = match tool_blendpack.get("bl_tags") {
            None => None,
            Some(toml::Value::Array(tags)) => Some(
                tags.iter()
                    .filter_map(|tag| tag.as_str().map(String::from))
                    .collect::<BTreeSet<String>>(),
            ),
            Some(_) => {
                problems.push("`tool.blendpack.bl_tags` must be an array of strings.".to_string());
                None
            }
        };

        let supported_platforms = match tool_blendpack.get("supported_platforms") {
            None => None,
            Some(toml::Value::Array(platforms)) => {
                let mut parsed = BTreeSet::new();
                for platform in platforms {
                    match platform.as_str().map(BLPlatform::from_str) {
                        Some(Ok(platform)) => {
                            parsed.insert(platform);
                        }
                        _ => problems.push(format!(
                            "`tool.blendpack.supported_platforms` entry {} is not a known platform.",
                            platform
                        )),
                    }
                }
                Some(parsed)
            }
            Some(_) => {
                problems.push(
                    "`tool.blendpack.supported_platforms` must be an array of platform strings."
                        .to_string(),
                );
                None
            }
        };

        let version_pair = |value: &toml::Value| -> Option<(u16, u16)> {
            let array = value.as_array()?;
            match array.as_slice() {
                [major, minor] => Some((
                    u16::try_from(major.as_integer()?).ok()?,
                    u16::try_from(minor.as_integer()?).ok()?,
                )),
                _ => None,
            }
        };
        let min_glibc_version = match tool_blendpack.get("min_glibc_version") {
            None => None,
            Some(value) => match version_pair(value) {
                Some(pair) => Some(pair),
                None => {
                    problems.push(
                        "`tool.blendpack.min_glibc_version` must be a `[major, minor]` pair."
                            .to_string(),
                    );
                    None
                }
            },
        };
        let min_macos_version = match tool_blendpack.get("min_macos_version") {
            None => None,
            Some(value) => match version_pair(value) {
                Some(pair) => Some(pair),
                None => {
                    problems.push(
                        "`tool.blendpack.min_macos_version` must be a `[major, minor]` pair."
                            .to_string(),
                    );
                    None
                }
            },
        };
        let string_set = |value: &toml::Value| -> Option<BTreeSet<String>> {
            value
                .as_array()?
                .iter()
                .map(|tag| tag.as_str().map(String::from))
                .collect()
        };
        let supported_python_tags = tool_blendpack
            .get("supported_python_tags")
            .and_then(|value| string_set(value));
        let supported_abi_tags = tool_blendpack
            .get("supported_abi_tags")
            .and_then(|value| string_set(value));

        // Release profile: a standard name, or a custom profile from
        // `[tool.blendpack.profiles.<id>]`.
        let release_profile = match release_profile_id {
            None => None,
            Some(profile_id) => {
                let custom = tool_blendpack
                    .get("profiles")
                    .and_then(|profiles| profiles.get(profile_id));
                match custom {
                    Some(profile_value) => Some(
                        profile_value
                            .clone()
                            .try_into::<ReleaseProfile>()
                            .with_context(|| {
                                format!(
                                    "`[tool.blendpack.profiles.{}]` is not a valid release profile",
                                    profile_id
                                )
                            })?,
                    ),
                    None => match StandardReleaseProfile::from_str(profile_id) {
                        Ok(standard) => Some(standard.release_profile()),
                        Err(()) => bail!(
                            "The release profile `{}` is not a standard profile and is not defined in `[tool.blendpack.profiles]`. Standard profiles: {}",
                            profile_id,
                            StandardReleaseProfile::ALL
                                .map(|profile| profile.to_string())
                                .join(", "),
                        ),
                    },
                }
            }
        };

        if !problems.is_empty() {
            return Err(DescriptorError {
                path: path_descriptor.to_path_buf(),
                problems,
            }
            .into());
        }
        let (project_name, project_version, description, extension_license, pretty_name, copyright, blender_version_min) = match (
            project_name,
            project_version,
            description,
            extension_license,
            pretty_name,
            copyright,
            blender_version_min,
        ) {
            (Some(a), Some(b), Some(c), Some(d), Some(e), Some(f), Some(g)) => {
                (a, b, c, d, e, f, g)
            }
            _ => bail!("Descriptor parsing reached an impossible state; please report this bug"),
        };

        // The extension module must be named after the project.
        let source = if source_is_script {
            let stem = path_descriptor
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
            let stem = stem.trim_end_matches(".py");
            if stem != project_name {
                return Err(DescriptorError {
                    path: path_descriptor.to_path_buf(),
                    problems: vec![
                        "Script extension filename did not match `project.name`.".to_string(),
                        format!("Either rename the script to `{}.py`,", project_name),
                        format!("or set `project.name = \"{}\"`.", stem),
                    ],
                }
                .into());
            }
            ExtensionSource::Script {
                path_script: path_descriptor.to_path_buf(),
            }
        } else {
            let path_package = path_descriptor
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(&project_name);
            if !path_package.is_dir() {
                return Err(DescriptorError {
                    path: path_descriptor.to_path_buf(),
                    problems: vec![
                        "Extension package directory did not match `project.name`.".to_string(),
                        format!("Either rename the extension package to `{}/`,", project_name),
                        "or set `project.name` to the name of the extension package.".to_string(),
                    ],
                }
                .into());
            }
            ExtensionSource::Project { path_package }
        };

        // The lockfile lives next to the descriptor.
        let path_lockfile = if source_is_script {
            path_descriptor.with_file_name(format!(
                "{}.lock",
                path_descriptor
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_default()
            ))
        } else {
            path_descriptor
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join("uv.lock")
        };
        let uv_lock = UvLock::from_path(&path_lockfile)?;
        let mut deps = DepGraph::from_uv_lock(&uv_lock, &project_name)?;
        deps.min_glibc_version = min_glibc_version;
        deps.min_macos_version = min_macos_version;
        deps.valid_python_tags = supported_python_tags;
        deps.valid_abi_tags = supported_abi_tags;

        // Default to the largest common subset of platforms supported by
        // every targeted Blender version, so one archive can serve them all.
        let granular_bl_platforms = match supported_platforms {
            Some(platforms) if !platforms.is_empty() => platforms,
            _ => BLReleaseOfficial::from_version_range(blender_version_min, blender_version_max)
                .iter()
                .map(|release| {
                    release
                        .valid_bl_platforms()
                        .iter()
                        .copied()
                        .collect::<BTreeSet<BLPlatform>>()
                })
                .reduce(|a, b| a.intersection(&b).copied().collect())
                .unwrap_or_default(),
        };

        let mut spec = BLExtSpec {
            id: project_name,
            name: pretty_name,
            version: project_version,
            tagline: description,
            maintainer,
            license: format!("SPDX:{}", extension_license),
            blender_version_min,
            blender_version_max,
            permissions,
            copyright,
            tags,
            website,
            granular_bl_platforms,
            deps,
            release_profile,
            source,
            path_descriptor: path_descriptor.to_path_buf(),
            path_lockfile,
        };
        spec.apply_profile_overrides()?;
        spec.validate()?;
        Ok(spec)
    }

    /// Replace specification fields named by the active release profile's
    /// `overrides` map.
    fn apply_profile_overrides(&mut self) -> anyhow::Result<()> {
        let overrides = match &self.release_profile {
            Some(release_profile) if !release_profile.overrides.is_empty() => {
                release_profile.overrides.clone()
            }
            _ => return Ok(()),
        };
        for (field, value) in overrides {
            let value_str = value
                .as_str()
                .with_context(|| format!("Profile override `{}` must be a string", field))?;
            match field.as_str() {
                "name" => self.name = value_str.to_string(),
                "tagline" => self.tagline = value_str.to_string(),
                "version" => self.version = value_str.to_string(),
                "maintainer" => self.maintainer = Some(value_str.to_string()),
                "website" => self.website = Some(value_str.to_string()),
                "license" => self.license = format!("SPDX:{}", value_str),
                unknown => bail!(
                    "Profile override `{}` does not name an overridable specification field",
                    unknown
                ),
            }
        }
        Ok(())
    }

    /// Granular Blender versions in `[min, max)`, sorted by
    /// `(version, release date)`.
    pub fn granular_bl_versions(&self) -> Vec<BLVersion> {
        let mut granular: Vec<BLVersion> =
            BLReleaseOfficial::from_version_range(self.blender_version_min, self.blender_version_max)
                .into_iter()
                .map(|release| release.bl_version())
                .collect();
        granular.sort_by(|a, b| {
            (a.blender_version_min, a.released_on).cmp(&(b.blender_version_min, b.released_on))
        });
        granular
    }

    /// Enforce every specification invariant that doesn't require wheel
    /// resolution. Violations are aggregated.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut violations = Vec::new();
        let mut check = |ok: bool, field: &str, rule: String| {
            if !ok {
                violations.push(SchemaViolation {
                    field: field.to_string(),
                    rule,
                });
            }
        };

        check(
            manifest::is_valid_identifier(&self.id)
                && self.id.chars().next().map(char::is_alphanumeric).unwrap_or(false)
                && self.id.chars().last().map(char::is_alphanumeric).unwrap_or(false),
            "project.name",
            "must be a valid identifier that begins and ends with an alphanumeric and contains no `__`".to_string(),
        );
        check(
            manifest::is_clean_string(&self.name),
            "tool.blendpack.pretty_name",
            "must be a non-empty string without surrounding whitespace or control characters"
                .to_string(),
        );
        check(
            manifest::is_valid_tagline(&self.tagline),
            "project.description",
            "must be at most 64 characters and end with an alphanumeric character or one of `)`, `]`, `}`"
                .to_string(),
        );
        check(
            manifest::is_valid_semver(&self.version),
            "project.version",
            "must be a semantic version".to_string(),
        );
        check(
            manifest::blender_version_is_at_least_4_2(&format_version(self.blender_version_min)),
            "tool.blendpack.blender_version_min",
            "must be at least 4.2".to_string(),
        );
        for line in &self.copyright {
            check(
                manifest::is_valid_copyright_line(line),
                "tool.blendpack.copyright",
                format!(
                    "line `{}` must start with a year or year range, followed by a non-empty name",
                    line
                ),
            );
        }
        for justification in self.permissions.values() {
            check(
                manifest::is_valid_tagline(justification),
                "tool.blendpack.permissions",
                format!("justification `{}` must follow the tagline rules", justification),
            );
        }

        let granular_bl_versions = self.granular_bl_versions();
        check(
            !granular_bl_versions.is_empty(),
            "tool.blendpack.blender_version_min",
            format!(
                "no catalogued Blender release falls in the range [{}, {})",
                format_version(self.blender_version_min),
                self.blender_version_max
                    .map(format_version)
                    .unwrap_or_else(|| "open".to_string()),
            ),
        );
        for bl_version in &granular_bl_versions {
            check(
                self.granular_bl_platforms
                    .iter()
                    .any(|platform| bl_version.valid_bl_platforms.contains(platform)),
                "tool.blendpack.supported_platforms",
                format!(
                    "no declared platform is supported by Blender {}",
                    bl_version.version_string()
                ),
            );
        }
        for platform in &self.granular_bl_platforms {
            check(
                granular_bl_versions
                    .iter()
                    .any(|bl_version| bl_version.valid_bl_platforms.contains(platform)),
                "tool.blendpack.supported_platforms",
                format!("`{}` is not supported by any targeted Blender version", platform),
            );
        }
        if let Some(tags) = &self.tags {
            for bl_version in &granular_bl_versions {
                let unknown_tags: Vec<&str> = tags
                    .iter()
                    .filter(|tag| !bl_version.valid_extension_tags.contains(*tag))
                    .map(String::as_str)
                    .collect();
                check(
                    unknown_tags.is_empty(),
                    "tool.blendpack.bl_tags",
                    format!(
                        "tag(s) `{}` are not in the valid tag vocabulary of Blender {}",
                        unknown_tags.join("`, `"),
                        bl_version.version_string(),
                    ),
                );
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(SchemaError { violations })
        }
    }

    /// Reduce the (version × platform) grid and resolve every cell's wheels.
    pub fn build_plan(&self) -> anyhow::Result<BuildPlan> {
        let granular_bl_versions = self.granular_bl_versions();

        // Version axis.
        let (mut bl_versions, chunk_by_granular) = smoosh_bl_versions(
            &granular_bl_versions,
            Some(&self.granular_bl_platforms),
            self.deps.valid_python_tags.as_ref(),
            self.deps.valid_abi_tags.as_ref(),
            self.tags.as_ref(),
        );
        // The declared upper bound (or its absence) governs the final chunk.
        if let Some(last) = bl_versions.last_mut() {
            last.blender_version_max = self.blender_version_max;
        }

        // Wheels per (version chunk, granular platform); resolution failures
        // aggregate across the whole grid before going fatal.
        let mut wheels_granular: Vec<BTreeMap<BLPlatform, Vec<Wheel>>> = Vec::new();
        let mut failures: Vec<ResolutionFailure> = Vec::new();
        for bl_version in &bl_versions {
            let mut selection =
                select_wheels(&self.deps, &self.id, bl_version, &self.granular_bl_platforms)?;
            failures.append(&mut selection.failures);
            wheels_granular.push(selection.wheels_by_platform);
        }
        if !failures.is_empty() {
            return Err(ResolutionError { failures }.into());
        }

        // Platform axis: a platform joins a set iff every wheel already
        // selected for the set stays compatible with it under each version's
        // OS floors.
        let sorted_platforms: Vec<BLPlatform> =
            self.granular_bl_platforms.iter().copied().collect();
        let mut platform_sets: Vec<BLPlatformSet> = Vec::new();
        let mut set_by_granular_platform: BTreeMap<BLPlatform, usize> = BTreeMap::new();
        for &platform in &sorted_platforms {
            let merged = match platform_sets.last_mut() {
                None => None,
                Some(accumulator) => {
                    let mut wheels: Vec<(&Wheel, Option<(u16, u16)>, Option<(u16, u16)>)> =
                        Vec::new();
                    for (bl_version, by_platform) in bl_versions.iter().zip(&wheels_granular) {
                        let min_glibc = Some(
                            self.deps
                                .min_glibc_version
                                .unwrap_or(bl_version.min_glibc_version),
                        );
                        let min_macos = Some(
                            self.deps
                                .min_macos_version
                                .unwrap_or(bl_version.min_macos_version),
                        );
                        for set_platform in accumulator.platforms() {
                            for wheel in by_platform.get(set_platform).into_iter().flatten() {
                                wheels.push((wheel, min_glibc, min_macos));
                            }
                        }
                    }
                    if accumulator.is_smooshable_with(platform, wheels) {
                        *accumulator = accumulator.smoosh_with(platform);
                        Some(())
                    } else {
                        None
                    }
                }
            };
            if merged.is_none() {
                platform_sets.push(BLPlatformSet::from_platform(platform));
            }
            set_by_granular_platform.insert(platform, platform_sets.len() - 1);
        }

        let is_platform_universal = bl_versions.iter().all(|bl_version| {
            bl_version
                .valid_bl_platforms
                .iter()
                .all(|platform| self.granular_bl_platforms.contains(platform))
        });

        Ok(BuildPlan {
            bl_versions,
            chunk_by_granular,
            platform_sets,
            set_by_granular_platform,
            wheels_granular,
            is_platform_universal,
        })
    }

    /// The manifest for one archive cell.
    pub fn manifest_for_cell(
        &self,
        plan: &BuildPlan,
        version_idx: usize,
        set_idx: usize,
    ) -> BLManifest {
        let bl_version = &plan.bl_versions[version_idx];
        let platform_set = &plan.platform_sets[set_idx];
        let wheels = plan.wheel_filenames_for_cell(version_idx, set_idx);
        BLManifest {
            schema_version: bl_version.max_manifest_version().schema_version().to_string(),
            id: self.id.clone(),
            version: self.version.clone(),
            name: self.name.clone(),
            tagline: self.tagline.clone(),
            maintainer: self.maintainer.clone(),
            extension_type: "add-on".to_string(),
            website: self.website.clone(),
            tags: self
                .tags
                .as_ref()
                .map(|tags| tags.iter().cloned().collect()),
            blender_version_min: format_version(bl_version.blender_version_min),
            blender_version_max: bl_version.blender_version_max.map(format_version),
            license: vec![self.license.clone()],
            copyright: if self.copyright.is_empty() {
                None
            } else {
                Some(self.copyright.clone())
            },
            platforms: if plan.is_platform_universal {
                None
            } else {
                Some(
                    platform_set
                        .platforms()
                        .iter()
                        .map(|platform| platform.to_string())
                        .collect(),
                )
            },
            permissions: if self.permissions.is_empty() {
                None
            } else {
                Some(
                    self.permissions
                        .iter()
                        .map(|(permission, justification)| {
                            (permission.to_string(), justification.clone())
                        })
                        .collect(),
                )
            },
            wheels: if wheels.is_empty() {
                None
            } else {
                Some(wheels.iter().map(|name| format!("./wheels/{}", name)).collect())
            },
        }
    }

    /// `<id>-<version>__<bl-chunk>__<platform-chunk>`, with `.` replaced by
    /// `_` in versions; universal extensions drop the platform segment and
    /// join id and version with `_`.
    pub fn archive_stem(&self, plan: &BuildPlan, version_idx: usize, set_idx: usize) -> String {
        let version = self.version.replace('.', "_");
        let bl_chunk = plan.bl_versions[version_idx]
            .version_string()
            .replace('.', "_");
        if plan.is_platform_universal {
            format!("{}_{}__{}", self.id, version, bl_chunk)
        } else {
            format!(
                "{}-{}__{}__{}",
                self.id, version, bl_chunk, plan.platform_sets[set_idx]
            )
        }
    }

    pub fn manifest_filename(&self) -> &'static str {
        MANIFEST_FILENAME
    }
}

/// Everything derived from a specification: the reduced grid, the per-cell
/// wheel sets, and the archive naming. Spec and plan together drive the
/// archive pipeline.
#[derive(Debug, Clone)]
pub struct BuildPlan {
    /// Chunked Blender versions, ascending.
    pub bl_versions: Vec<BLVersion>,
    /// For each granular version (sorted), the index of its chunk.
    pub chunk_by_granular: Vec<usize>,
    /// Chunked platform sets, ascending.
    pub platform_sets: Vec<BLPlatformSet>,
    pub set_by_granular_platform: BTreeMap<BLPlatform, usize>,
    /// Selected wheels per (version chunk, granular platform).
    pub wheels_granular: Vec<BTreeMap<BLPlatform, Vec<Wheel>>>,
    pub is_platform_universal: bool,
}

impl BuildPlan {
    /// All (version chunk, platform set) archive cells.
    pub fn cells(&self) -> Vec<(usize, usize)> {
        let mut cells = Vec::new();
        for version_idx in 0..self.bl_versions.len() {
            for set_idx in 0..self.platform_sets.len() {
                cells.push((version_idx, set_idx));
            }
        }
        cells
    }

    /// Union of the wheels selected for every granular platform of the cell,
    /// deduplicated and sorted by filename.
    pub fn wheels_for_cell(&self, version_idx: usize, set_idx: usize) -> Vec<Wheel> {
        let by_platform = &self.wheels_granular[version_idx];
        let mut wheels: Vec<Wheel> = Vec::new();
        for platform in self.platform_sets[set_idx].platforms() {
            for wheel in by_platform.get(platform).into_iter().flatten() {
                if !wheels.contains(wheel) {
                    wheels.push(wheel.clone());
                }
            }
        }
        wheels.sort_by(|a, b| a.url.cmp(&b.url));
        wheels
    }

    pub fn wheel_filenames_for_cell(&self, version_idx: usize, set_idx: usize) -> Vec<String> {
        let mut filenames: Vec<String> = self
            .wheels_for_cell(version_idx, set_idx)
            .iter()
            .filter_map(|wheel| wheel.filename().ok().map(String::from))
            .collect();
        filenames.sort();
        filenames
    }

    /// Every wheel any cell needs.
    pub fn required_wheels(&self) -> Vec<Wheel> {
        let mut wheels: Vec<Wheel> = Vec::new();
        for by_platform in &self.wheels_granular {
            for cell_wheels in by_platform.values() {
                for wheel in cell_wheels {
                    if !wheels.contains(wheel) {
                        wheels.push(wheel.clone());
                    }
                }
            }
        }
        wheels.sort_by(|a, b| a.url.cmp(&b.url));
        wheels
    }

    /// Required wheels whose download in `path_wheels` is missing or fails
    /// hash verification.
    pub fn missing_wheels(&self, path_wheels: &Path) -> anyhow::Result<Vec<Wheel>> {
        let mut missing = Vec::new();
        for wheel in self.required_wheels() {
            let path = path_wheels.join(wheel.filename()?);
            if !wheel.is_download_valid(&path)? {
                missing.push(wheel);
            }
        }
        Ok(missing)
    }

    /// `{on-disk wheel path -> in-archive path}` for one cell's pre-pack.
    pub fn prepack_file_map(
        &self,
        path_wheels: &Path,
        version_idx: usize,
        set_idx: usize,
    ) -> anyhow::Result<BTreeMap<PathBuf, PathBuf>> {
        let mut file_map = BTreeMap::new();
        for wheel in self.wheels_for_cell(version_idx, set_idx) {
            let filename = wheel.filename()?.to_string();
            file_map.insert(
                path_wheels.join(&filename),
                Path::new("wheels").join(&filename),
            );
        }
        Ok(file_map)
    }
}
