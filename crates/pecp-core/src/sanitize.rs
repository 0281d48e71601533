//! # Policy Filename Sanitization
//!
//! Policy filenames come from user input and end up as paths on disk (the
//! compiler build directory) and inside archives. Only basenames survive.
//! Any parent-directory component is rejected outright instead of being
//! stripped, and every on-disk path is re-checked for containment after
//! joining.

use std::path::{Component, Path, PathBuf};

use crate::error::PlaneError;

/// Extension of policy source files.
pub const POLICY_EXTENSION: &str = "rego";

/// Derive the basename a policy is stored under.
///
/// `declared` is the policy's own filename, if any. `fallback` is the stem
/// used when nothing is declared. The result always ends in
/// `.`[`POLICY_EXTENSION`].
///
/// # Errors
///
/// Returns a security error when either input contains a `..` component.
pub fn safe_policy_filename(declared: Option<&str>, fallback: &str) -> Result<String, PlaneError> {
    let candidate = match declared.map(str::trim) {
        Some(name) if !name.is_empty() => name,
        _ => fallback.trim(),
    };

    let segments: Vec<&str> = candidate.split(['/', '\\']).collect();
    if segments.iter().any(|s| *s == "..") {
        return Err(PlaneError::path_traversal(candidate));
    }

    let base = segments
        .iter()
        .rev()
        .find(|s| !s.is_empty() && **s != ".")
        .copied()
        .unwrap_or("policy");

    let suffix = format!(".{POLICY_EXTENSION}");
    if base.ends_with(&suffix) && base.len() > suffix.len() {
        Ok(base.to_string())
    } else {
        Ok(format!("{base}{suffix}"))
    }
}

/// Join `filename` onto `dir` and verify the result stays directly inside it.
///
/// # Errors
///
/// Returns a security error if the joined path is absolute, carries a
/// parent or root component, or would land outside `dir`.
pub fn resolve_within(dir: &Path, filename: &str) -> Result<PathBuf, PlaneError> {
    let relative = Path::new(filename);
    let mut normal = 0usize;
    for component in relative.components() {
        match component {
            Component::Normal(_) => normal += 1,
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(PlaneError::path_traversal(filename));
            }
        }
    }
    if normal != 1 {
        return Err(PlaneError::path_traversal(filename));
    }

    let resolved = dir.join(relative);
    if resolved.parent() != Some(dir) {
        return Err(PlaneError::path_traversal(filename));
    }
    Ok(resolved)
}
