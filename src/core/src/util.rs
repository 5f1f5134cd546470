//! Small shared helpers: name randomization and directory lookups.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use rand::Rng;

use crate::error::Result;

/// Next non-negative pseudo-random 63-bit integer as a hex string.
///
/// A weak generator is fine here, the values only randomize file names.
pub fn next_rand_hex() -> String {
    let val: u64 = rand::thread_rng().gen::<u64>() >> 1;
    format!("{val:x}")
}

/// Next pseudo-random value in u16 range, for request-file suffixes.
pub fn next_rand_u16() -> u16 {
    rand::thread_rng().gen()
}

/// Find the newest file in `dir` whose file name starts with `prefix`.
///
/// Entries whose metadata cannot be read are skipped, they do not exist as
/// far as this lookup is concerned. Returns `None` when nothing matches.
pub fn newest_file_with_prefix(dir: &Path, prefix: &str) -> Result<Option<PathBuf>> {
    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for entry in fs::read_dir(dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(_) => continue,
        };
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !name.starts_with(prefix) {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let path = entry.path();
        match &newest {
            Some((best, _)) if *best >= modified => {}
            _ => newest = Some((modified, path)),
        }
    }
    Ok(newest.map(|(_, path)| path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_rand_hex_is_hex() {
        let hex = next_rand_hex();
        assert!(!hex.is_empty());
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_newest_file_with_prefix_picks_latest() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::write(dir.path().join("pipe_a"), b"old").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(dir.path().join("pipe_b"), b"new").unwrap();
        fs::write(dir.path().join("other"), b"x").unwrap();

        let found = newest_file_with_prefix(dir.path(), "pipe_").unwrap().unwrap();
        assert_eq!(found.file_name().unwrap(), "pipe_b");
    }

    #[test]
    fn test_newest_file_with_prefix_no_match() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::write(dir.path().join("other"), b"x").unwrap();
        assert!(newest_file_with_prefix(dir.path(), "pipe_").unwrap().is_none());
    }
}
