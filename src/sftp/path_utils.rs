//! Remote path utilities
//!
//! Remote paths always use `/` as separator, whatever the gateway or host OS.

use super::error::SftpError;

/// Check if a remote path is absolute.
pub fn is_absolute_remote_path(path: &str) -> bool {
    path.starts_with('/')
}

/// Join remote path components with exactly one `/` between them.
///
/// - `/home` + `file.txt` → `/home/file.txt`
/// - `/home/` + `/file.txt` → `/home/file.txt`
/// - `/` + `home` → `/home`
pub fn join_remote_path(base: &str, component: &str) -> String {
    let base = base.trim_end_matches('/');
    let component = component.trim_start_matches('/');
    if component.is_empty() {
        return if base.is_empty() { "/".to_string() } else { base.to_string() };
    }
    format!("{}/{}", base, component)
}

/// Collapse repeated separators and drop a trailing `/` (except for root).
pub fn normalize_remote_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        out.push('/');
        out.push_str(segment);
    }
    if out.is_empty() {
        "/".to_string()
    } else if is_absolute_remote_path(path) {
        out
    } else {
        out[1..].to_string()
    }
}

/// Parent directory of a remote path. Root is its own parent.
pub fn parent_remote_path(path: &str) -> String {
    let normalized = normalize_remote_path(path);
    match normalized.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => normalized[..idx].to_string(),
    }
}

/// Resolve a user-supplied name against the current directory.
///
/// Absolute names are used as-is. Empty names and `.`/`..` components are
/// rejected: mutations must name a concrete entry.
pub fn resolve_remote_path(cwd: &str, name: &str) -> Result<String, SftpError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(SftpError::InvalidPath("empty name".to_string()));
    }
    if trimmed.split('/').any(|s| s == "." || s == "..") {
        return Err(SftpError::InvalidPath(name.to_string()));
    }

    if is_absolute_remote_path(trimmed) {
        Ok(normalize_remote_path(trimmed))
    } else {
        Ok(normalize_remote_path(&join_remote_path(cwd, trimmed)))
    }
}
