// Durable credential store - KEY=value line files in the dotenv style

use std::io;
use std::path::{Path, PathBuf};

/// Narrow seam over the durable store the rotator persists through, so the
/// whole-file rewrite below can be swapped for an atomic store without
/// touching rotation logic.
pub trait CredentialStore: Send + Sync {
    /// All `(key, value)` entries in file order.
    fn read_all(&self) -> io::Result<Vec<(String, String)>>;

    /// Replace the value of `key`, or append the entry if missing. Unrelated
    /// lines, comments and ordering are preserved.
    fn write_one(&self, key: &str, value: &str) -> io::Result<()>;
}

/// `KEY=value` text file, one entry per line. Lines that are blank, start
/// with `#`, or carry no `=` are kept verbatim but never parsed as entries.
pub struct EnvFileStore {
    path: PathBuf,
}

impl EnvFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse_line(line: &str) -> Option<(String, String)> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return None;
        }
        let (key, value) = trimmed.split_once('=')?;
        Some((key.trim().to_string(), value.trim().to_string()))
    }
}

impl CredentialStore for EnvFileStore {
    fn read_all(&self) -> io::Result<Vec<(String, String)>> {
        let content = std::fs::read_to_string(&self.path)?;
        Ok(content.lines().filter_map(Self::parse_line).collect())
    }

    // Whole-file read-modify-write: not atomic across processes, acceptable
    // for a single-writer deployment.
    fn write_one(&self, key: &str, value: &str) -> io::Result<()> {
        let content = std::fs::read_to_string(&self.path).unwrap_or_default();
        let mut lines: Vec<String> = content.lines().map(|l| l.to_string()).collect();

        let mut replaced = false;
        for line in lines.iter_mut() {
            if let Some((existing, _)) = Self::parse_line(line) {
                if existing == key {
                    *line = format!("{}={}", key, value);
                    replaced = true;
                    break;
                }
            }
        }
        if !replaced {
            lines.push(format!("{}={}", key, value));
        }

        let mut updated = lines.join("\n");
        if content.ends_with('\n') || content.is_empty() {
            updated.push('\n');
        }
        std::fs::write(&self.path, updated)?;
        tracing::info!("credential store updated: {} rewritten in {:?}", key, self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn store_with(content: &str) -> (tempfile::TempDir, EnvFileStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        (dir, EnvFileStore::new(path))
    }

    #[test]
    fn reads_entries_in_file_order() {
        let (_dir, store) = store_with(
            "# proxy credentials\nGITHUB_TOKEN=gho_active\n\nGITHUB_TOKEN2=gho_two\nPORT=3000\n",
        );
        let entries = store.read_all().unwrap();
        assert_eq!(
            entries,
            vec![
                ("GITHUB_TOKEN".to_string(), "gho_active".to_string()),
                ("GITHUB_TOKEN2".to_string(), "gho_two".to_string()),
                ("PORT".to_string(), "3000".to_string()),
            ]
        );
    }

    #[test]
    fn write_one_replaces_only_the_matching_line() {
        let (_dir, store) = store_with(
            "# proxy credentials\nGITHUB_TOKEN=gho_old\nGITHUB_TOKEN2=gho_two\nPORT=3000\n",
        );
        store.write_one("GITHUB_TOKEN", "gho_new").unwrap();

        let content = std::fs::read_to_string(store.path()).unwrap();
        assert!(content.contains("# proxy credentials"));
        assert!(content.contains("GITHUB_TOKEN=gho_new"));
        assert!(content.contains("GITHUB_TOKEN2=gho_two"));
        assert!(content.contains("PORT=3000"));
        assert!(!content.contains("gho_old"));
    }

    #[test]
    fn write_one_appends_when_key_is_missing() {
        let (_dir, store) = store_with("PORT=3000\n");
        store.write_one("GITHUB_TOKEN", "gho_new").unwrap();

        let entries = store.read_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1], ("GITHUB_TOKEN".to_string(), "gho_new".to_string()));
    }

    #[test]
    fn read_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = EnvFileStore::new(dir.path().join("missing.env"));
        assert!(store.read_all().is_err());
    }
}
