//! Path checks applied before any device interaction.

use std::borrow::Cow;

use crate::error::{FuseError, Result};

/// Suffix that turns `<path>` into "the thumbnail of `<path>`".
pub const THUMBNAIL_SUFFIX: &str = "#thumb";

fn decode(input: &str) -> String {
    urlencoding::decode(input)
        .map(Cow::into_owned)
        .unwrap_or_else(|_| input.to_string())
}

/// Rejects empty paths and paths that climb out of their parent.
///
/// The path is URL-decoded twice and backslashes are read as separators
/// first, so encoded forms such as `%252e%252e%252f` are caught too.
pub fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(FuseError::invalid_path(path));
    }
    let normalized = decode(&decode(path)).replace('\\', "/");
    if normalized == ".." || normalized.contains("../") || normalized.ends_with("/..") {
        return Err(FuseError::invalid_path(path));
    }
    Ok(())
}

/// The real file behind a thumbnail path, if `path` names one.
pub fn thumbnail_target(path: &str) -> Option<&str> {
    path.strip_suffix(THUMBNAIL_SUFFIX)
        .filter(|target| !target.is_empty() && !target.ends_with('/'))
}

pub fn join(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{}{}", parent, name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// `path` re-rooted from `from` to `to`, if it is `from` or lies under it.
pub fn rebase(path: &str, from: &str, to: &str) -> Option<String> {
    if path == from {
        return Some(to.to_string());
    }
    let rest = path.strip_prefix(from)?;
    let rest = if from.ends_with('/') { rest } else { rest.strip_prefix('/')? };
    Some(join(to, rest))
}
