//! Mapping of mountpoint paths to on-disk state file names.

use std::fs;
use std::path::PathBuf;

use sha2::{Digest, Sha256};

/// Directory holding the per-filesystem state records.
pub const STATE_DIR: &str = "/var/lib/cowherd";

/// Return the state directory, creating it if necessary.
pub fn state_dir() -> std::io::Result<PathBuf> {
    let path = PathBuf::from(STATE_DIR);
    fs::create_dir_all(&path)?;
    Ok(path)
}

/// Convert a mountpoint path into a filename that is safe for the
/// state directory.
///
/// Slashes become dashes, a leading dot is escaped and the root (or
/// empty) path maps to `-`. A short hash of the original path is
/// appended so two paths with different canonical forms can never
/// collapse into the same filename.
pub fn path_to_filename(path: &str) -> String {
    // the empty path is treated like the root path
    let path = if path.is_empty() { "/" } else { path };

    let mut name = path.strip_prefix('/').unwrap_or(path).to_string();
    if name.starts_with('.') {
        name.insert(0, '_');
    }
    if name.is_empty() {
        // we hit the root path /
        name.push('-');
    } else {
        name = name.replace('/', "-").replace('\\', "-");
    }

    let digest = Sha256::digest(path.as_bytes());
    format!(
        "{}-{:02x}{:02x}{:02x}{:02x}",
        name, digest[0], digest[1], digest[2], digest[3]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn escaped_part(filename: &str) -> &str {
        &filename[..filename.len() - 9]
    }

    #[test]
    fn test_path_escape() {
        assert_eq!(escaped_part(&path_to_filename("/")), "-");
        assert_eq!(
            escaped_part(&path_to_filename("/this/is/a path with/spaces/.txt")),
            "this-is-a path with-spaces-.txt"
        );
        assert_eq!(escaped_part(&path_to_filename("..")), "_..");
        assert_eq!(
            escaped_part(&path_to_filename("/a/cräzü/path----/../txt")),
            "a-cräzü-path-----..-txt"
        );
    }

    #[test]
    fn test_empty_path_is_root() {
        assert_eq!(path_to_filename(""), path_to_filename("/"));
    }

    #[test]
    fn test_filenames_are_deterministic() {
        assert_eq!(path_to_filename("/home"), path_to_filename("/home"));
    }

    #[test]
    fn test_escape_collisions_are_disambiguated() {
        // both paths escape to "a-b", the hash suffix must keep them apart
        let a = path_to_filename("/a/b");
        let b = path_to_filename("/a\\b");
        assert_eq!(escaped_part(&a), escaped_part(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_suffix_shape() {
        let name = path_to_filename("/srv/data");
        let suffix = &name[name.len() - 9..];
        assert!(suffix.starts_with('-'));
        assert!(suffix[1..].chars().all(|c| c.is_ascii_hexdigit()));
    }
}
