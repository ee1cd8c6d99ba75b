//! Key Normalization
//!
//! Every object key and listing prefix passes through here before it reaches
//! the index or the log. Keys are slash separated, relative and lexically
//! clean; any `..` segment is refused before any I/O happens.
//!
//! ```text
//!   " \a\.\b.txt "  ──trim──▶ "\a\.\b.txt" ──\→/──▶ "/a/./b.txt"
//!                   ──strip one /──▶ "a/./b.txt" ──clean──▶ "a/b.txt"
//! ```

use xxhash_rust::xxh64::xxh64;

use crate::error::{Result, VaultError};

/// Normalize an object key.
///
/// Errors:
/// - `InvalidKey` for empty, whitespace-only or `.`-only keys
/// - `Permission` when any segment of the cleaned key is `..`
pub fn clean_key(key: &str) -> Result<String> {
    let key = key.trim();
    if key.is_empty() {
        return Err(VaultError::InvalidKey("empty key".to_string()));
    }
    let key = key.replace('\\', "/");
    let key = key.strip_prefix('/').unwrap_or(&key);
    if key.is_empty() {
        return Err(VaultError::InvalidKey("empty key".to_string()));
    }

    let cleaned = clean_path(key);
    if cleaned == "." || cleaned == "/" {
        return Err(VaultError::InvalidKey("empty key".to_string()));
    }
    reject_traversal(&cleaned)?;
    Ok(cleaned)
}

/// Normalize a listing prefix. Same rules as [`clean_key`] except that an
/// empty result is allowed and means "everything".
pub fn clean_prefix(prefix: &str) -> Result<String> {
    let prefix = prefix.trim();
    if prefix.is_empty() {
        return Ok(String::new());
    }
    let prefix = prefix.replace('\\', "/");
    let prefix = prefix.strip_prefix('/').unwrap_or(&prefix);
    if prefix.is_empty() {
        return Ok(String::new());
    }

    let cleaned = clean_path(prefix);
    if cleaned == "." || cleaned == "/" {
        return Ok(String::new());
    }
    reject_traversal(&cleaned)?;
    Ok(cleaned)
}

/// Whether a raw key asks about a directory (`"photos/"`).
pub(crate) fn is_dir_query(key: &str) -> bool {
    let key = key.trim();
    key.ends_with('/') || key.ends_with('\\')
}

/// Sanitize a bucket name into a single safe directory component.
pub fn safe_bucket_name(name: &str) -> String {
    let name = name.trim().replace(['/', '\\'], "_");
    match name.as_str() {
        "" => "default".to_string(),
        "." | ".." => format!("_{}", name),
        _ => name,
    }
}

/// Stable hash used for shard and index partition selection
pub fn key_hash(key: &str) -> u64 {
    xxh64(key.as_bytes(), 0)
}

fn reject_traversal(cleaned: &str) -> Result<()> {
    if cleaned.split('/').any(|part| part == "..") {
        return Err(VaultError::Permission(format!(
            "key escapes bucket root: {}",
            cleaned
        )));
    }
    Ok(())
}

/// Lexical path cleaning for slash separated paths.
///
/// Collapses repeated slashes, drops `.` segments and resolves `..` against
/// the preceding segment. A rooted path never climbs above `/`; a relative
/// path keeps leading `..` segments so the caller can refuse them.
fn clean_path(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if rooted => {}
                _ => parts.push(".."),
            },
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

// =============================================================================
// Tests
// =============================================================================
