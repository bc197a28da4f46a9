use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

const SEPARATORS: [char; 2] = ['/', '\\'];

/// Turns a client supplied path into a relative path that stays below the
/// storage root. Empty segments and `.` are dropped, `..` and drive prefixes
/// are rejected.
pub fn sanitize_relative(input: &str) -> Result<PathBuf> {
    let mut result = PathBuf::new();
    for segment in input.split(SEPARATORS) {
        match segment {
            "" | "." => {}
            ".." => {
                return Err(Error::Validation(format!(
                    "path '{input}' escapes the storage root"
                )));
            }
            s if s.contains(':') => {
                return Err(Error::Validation(format!(
                    "path '{input}' contains a drive prefix"
                )));
            }
            s => result.push(s),
        }
    }
    Ok(result)
}

/// Like [`sanitize_relative`] but the result must name a single entry.
pub fn sanitize_name(input: &str) -> Result<String> {
    let path = sanitize_relative(input)?;
    let mut components = path.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) => Ok(name.to_string_lossy().into_owned()),
        _ => Err(Error::Validation(format!("invalid file name '{input}'"))),
    }
}

/// Forward slash form of a relative path.
#[must_use]
pub fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Path of `full` relative to `root`, forward slash separated.
#[must_use]
pub fn relative_to(root: &Path, full: &Path) -> String {
    match full.strip_prefix(root) {
        Ok(rel) => to_slash(rel),
        Err(_) => full.to_string_lossy().replace('\\', "/"),
    }
}
