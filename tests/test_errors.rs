//! User-facing failure modes: aggregated reports, actionable remedies.

use blendpack::BLExtSpec;
use indoc::indoc;
use std::path::{Path, PathBuf};

fn write_project(dir: &Path, name: &str, pyproject: &str, uv_lock: &str) -> PathBuf {
    let path_descriptor = dir.join("pyproject.toml");
    fs_err::write(&path_descriptor, pyproject).unwrap();
    fs_err::create_dir_all(dir.join(name)).unwrap();
    fs_err::write(dir.join(name).join("__init__.py"), "def register(): pass\n").unwrap();
    fs_err::write(dir.join("uv.lock"), uv_lock).unwrap();
    path_descriptor
}

const EMPTY_LOCK: &str = indoc! {r#"
    version = 1

    [[package]]
    name = "simple"
    version = "0.1.0"
    source = { editable = "." }
"#};

fn pyproject(tool_extra: &str) -> String {
    format!(
        indoc! {r#"
            [project]
            name = "simple"
            version = "0.1.0"
            description = "A simple example extension"
            license = "GPL-3.0-or-later"
            requires-python = ">=3.11"
            maintainers = [{{ name = "Jane Doe", email = "jane@example.com" }}]

            [tool.blendpack]
            pretty_name = "Simple"
            blender_version_min = "4.2.0"
            blender_version_max = "4.4.0"
            copyright = ["2025 Simple Contributors"]
            {}
        "#},
        tool_extra,
    )
}

#[test]
fn missing_descriptor_fields_are_aggregated() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_project(
        dir.path(),
        "simple",
        indoc! {r#"
            [project]
            name = "simple"

            [tool.blendpack]
            pretty_name = "Simple"
        "#},
        EMPTY_LOCK,
    );
    let message = BLExtSpec::from_descriptor_path(&path, None)
        .unwrap_err()
        .to_string();
    // One report naming every missing field, not one error per field.
    assert!(message.contains("`project.version` is not defined."), "{message}");
    assert!(message.contains("`project.description` is not defined."), "{message}");
    assert!(message.contains("`project.license` is not defined."), "{message}");
    assert!(message.contains("`project.requires-python` is not defined."), "{message}");
    assert!(
        message.contains("`tool.blendpack.blender_version_min` is not defined."),
        "{message}"
    );
    assert!(message.contains("`tool.blendpack.copyright` is not defined."), "{message}");
}

#[test]
fn package_dir_mismatch_lists_remedies() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_project(dir.path(), "not_simple", &pyproject(""), EMPTY_LOCK);
    let message = BLExtSpec::from_descriptor_path(&path, None)
        .unwrap_err()
        .to_string();
    assert!(message.contains("did not match `project.name`"), "{message}");
    assert!(message.contains("rename the extension package to `simple/`"), "{message}");
    assert!(message.contains("set `project.name`"), "{message}");
}

#[test]
fn missing_lockfile_is_fatal_with_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_project(dir.path(), "simple", &pyproject(""), EMPTY_LOCK);
    fs_err::remove_file(dir.path().join("uv.lock")).unwrap();
    let message = BLExtSpec::from_descriptor_path(&path, None)
        .unwrap_err()
        .to_string();
    assert!(message.contains("uv.lock"), "{message}");
}

#[test]
fn invalid_tagline_and_copyright_are_schema_violations() {
    let dir = tempfile::tempdir().unwrap();
    let descriptor = pyproject("").replace(
        "description = \"A simple example extension\"",
        "description = \"Ends with a dash-\"",
    );
    let descriptor = descriptor.replace(
        "copyright = [\"2025 Simple Contributors\"]",
        "copyright = [\"Simple Contributors\"]",
    );
    let path = write_project(dir.path(), "simple", &descriptor, EMPTY_LOCK);
    let message = BLExtSpec::from_descriptor_path(&path, None)
        .unwrap_err()
        .to_string();
    assert!(message.contains("project.description"), "{message}");
    assert!(message.contains("tool.blendpack.copyright"), "{message}");
}

#[test]
fn unknown_extension_tags_are_enumerated() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_project(
        dir.path(),
        "simple",
        &pyproject("bl_tags = [\"Imaginary\", \"Mesh\"]"),
        EMPTY_LOCK,
    );
    let message = BLExtSpec::from_descriptor_path(&path, None)
        .unwrap_err()
        .to_string();
    assert!(message.contains("`Imaginary`"), "{message}");
    assert!(!message.contains("`Mesh`,"), "{message}");
    assert!(message.contains("valid tag vocabulary"), "{message}");
}

#[test]
fn vendored_version_conflict_names_both_versions() {
    let dir = tempfile::tempdir().unwrap();
    let lock = indoc! {r#"
        version = 1

        [[package]]
        name = "simple"
        version = "0.1.0"
        source = { editable = "." }
        dependencies = [{ name = "numpy" }]

        [package.metadata]
        requires-dist = [{ name = "numpy", specifier = "==2.0.0" }]

        [[package]]
        name = "numpy"
        version = "2.0.0"
        source = { registry = "https://pypi.org/simple" }
        wheels = [
            { url = "https://files.pythonhosted.org/packages/aa/numpy-2.0.0-cp311-cp311-manylinux_2_17_x86_64.manylinux2014_x86_64.whl", hash = "sha256:aaaa", size = 17000000 },
        ]
    "#};
    let descriptor = pyproject("supported_platforms = [\"linux-x64\"]")
        .replace("blender_version_max = \"4.4.0\"", "blender_version_max = \"4.3.0\"");
    let path = write_project(dir.path(), "simple", &descriptor, lock);

    let spec = BLExtSpec::from_descriptor_path(&path, None).unwrap();
    let message = spec.build_plan().unwrap_err().to_string();
    // Blender 4.2.x vendors numpy 1.24.3; requesting 2.0.0 is fatal.
    assert!(message.contains("numpy"), "{message}");
    assert!(message.contains("2.0.0"), "{message}");
    assert!(message.contains("1.24.3"), "{message}");
}

#[test]
fn uncoverable_macos_requirement_suggests_raising_the_floor() {
    let dir = tempfile::tempdir().unwrap();
    let lock = indoc! {r#"
        version = 1

        [[package]]
        name = "simple"
        version = "0.1.0"
        source = { editable = "." }
        dependencies = [{ name = "fastnoise" }]

        [package.metadata]
        requires-dist = [{ name = "fastnoise", specifier = "==1.0.0" }]

        [[package]]
        name = "fastnoise"
        version = "1.0.0"
        source = { registry = "https://pypi.org/simple" }
        wheels = [
            { url = "https://files.pythonhosted.org/packages/aa/fastnoise-1.0.0-cp311-cp311-macosx_12_0_arm64.whl", hash = "sha256:aaaa", size = 100000 },
        ]
    "#};
    let descriptor = pyproject(indoc! {r#"
        supported_platforms = ["macos-arm64"]
        min_macos_version = [11, 0]
    "#})
    .replace("blender_version_min = \"4.2.0\"", "blender_version_min = \"4.3.0\"");
    let path = write_project(dir.path(), "simple", &descriptor, lock);

    let spec = BLExtSpec::from_descriptor_path(&path, None).unwrap();
    let message = spec.build_plan().unwrap_err().to_string();
    assert!(
        message.contains("fastnoise-1.0.0-cp311-cp311-macosx_12_0_arm64.whl"),
        "{message}"
    );
    assert!(message.contains("macos >= 12.0"), "{message}");
    assert!(message.contains("Raise `tool.blendpack.min_macos_version`"), "{message}");
    assert!(message.contains("Remove `macos-arm64`"), "{message}");
}
