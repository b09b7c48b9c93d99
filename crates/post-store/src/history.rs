//! Visited-post history backing the related-post ranker.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Entries kept, most recent first.
pub const MAX_READ_HISTORY: usize = 50;

#[derive(Debug, Default, Serialize, Deserialize)]
struct HistoryFile {
    #[serde(default)]
    read: Vec<String>,
}

/// Bounded list of read post ids, optionally persisted as JSON.
#[derive(Debug, Default)]
pub struct ReadHistory {
    path: Option<PathBuf>,
    ids: Vec<String>,
}

impl ReadHistory {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load from `path`. A missing or unreadable file yields an empty history.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let ids = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<HistoryFile>(&raw) {
                Ok(file) => file.read,
                Err(e) => {
                    log::warn!("Ignoring corrupt read history {}: {e}", path.display());
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                log::warn!("Failed to read history {}: {e}", path.display());
                Vec::new()
            }
        };
        let mut history = Self {
            path: Some(path),
            ids,
        };
        history.ids.truncate(MAX_READ_HISTORY);
        history
    }

    /// Record a visit. Already-read ids are left where they are.
    pub fn mark_read(&mut self, id: &str) -> std::io::Result<()> {
        if self.contains(id) {
            return Ok(());
        }
        self.ids.insert(0, id.to_string());
        self.ids.truncate(MAX_READ_HISTORY);
        self.persist()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|i| i == id)
    }

    /// Most recent first.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn as_set(&self) -> HashSet<String> {
        self.ids.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn persist(&self) -> std::io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(&HistoryFile {
            read: self.ids.clone(),
        })?;
        std::fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn most_recent_first_and_capped() {
        let mut history = ReadHistory::in_memory();
        for i in 0..60 {
            history.mark_read(&format!("p{i}")).unwrap();
        }
        assert_eq!(history.len(), MAX_READ_HISTORY);
        assert_eq!(history.ids()[0], "p59");
        assert!(!history.contains("p0"));
        assert!(history.contains("p10"));
    }

    #[test]
    fn repeat_visit_is_a_no_op() {
        let mut history = ReadHistory::in_memory();
        history.mark_read("a").unwrap();
        history.mark_read("b").unwrap();
        history.mark_read("a").unwrap();
        assert_eq!(history.ids(), ["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn persists_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/history.json");
        let mut history = ReadHistory::load(&path);
        assert!(history.is_empty());
        history.mark_read("a").unwrap();

        let reloaded = ReadHistory::load(&path);
        assert!(reloaded.contains("a"));
        assert_eq!(reloaded.as_set().len(), 1);
    }

    #[test]
    fn corrupt_file_yields_empty_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(ReadHistory::load(&path).is_empty());
    }
}
