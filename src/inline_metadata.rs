//! Inline script metadata: a `# /// script` ... `# ///` comment block whose
//! body is TOML equivalent to a `pyproject.toml`.
//!
//! https://packaging.python.org/en/latest/specifications/inline-script-metadata

use anyhow::{bail, Context};
use regex::Regex;

const INLINE_METADATA_BLOCK_NAME: &str = "script";

/// Extract and parse the single `script` metadata block of a Python source
/// file. Returns `None` when the file carries no such block.
pub fn parse_inline_script_metadata(py_source_code: &str) -> anyhow::Result<Option<toml::Value>> {
    let block_regex = Regex::new(
        r"(?m)^# /// (?P<type>[a-zA-Z0-9-]+)\r?\n(?P<content>(?:#(?:| .*)\r?\n)+)# ///$",
    )
    .unwrap();

    let matches: Vec<_> = block_regex
        .captures_iter(py_source_code)
        .filter(|captures| &captures["type"] == INLINE_METADATA_BLOCK_NAME)
        .collect();

    match matches.as_slice() {
        [] => Ok(None),
        [captures] => {
            let toml_source: String = captures["content"]
                .lines()
                .map(|line| {
                    // "# <text>" loses the two-character prefix, a bare "#" one.
                    line.strip_prefix("# ")
                        .unwrap_or_else(|| line.strip_prefix('#').unwrap_or(line))
                })
                .collect::<Vec<_>>()
                .join("\n");
            let value = toml::from_str(&toml_source)
                .context("The inline `script` metadata block is not valid TOML")?;
            Ok(Some(value))
        }
        _ => bail!("Multiple `script` blocks of inline script metadata were found"),
    }
}
