use anyhow::Context;
use serde_derive::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// One history log line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Unix seconds
    pub time: i64,
    /// Watts, never negative
    pub power: f64,
    /// Cumulative energy in kWh. Only the export log records it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy: Option<f64>,
}

/// Append-only sink with one independent log per sensor.
pub trait HistoryRecorder: Send + Sync {
    fn append(&self, log_name: &str, entry: &HistoryEntry) -> anyhow::Result<()>;
}

/// Writes each log as JSON lines under a storage directory.
pub struct FileHistory {
    dir: PathBuf,
}

impl FileHistory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn log_path(&self, log_name: &str) -> PathBuf {
        self.dir.join(log_name)
    }

    /// Reads back every entry of a log. Missing logs read as empty.
    pub fn read_log(&self, log_name: &str) -> anyhow::Result<Vec<HistoryEntry>> {
        let path = self.log_path(log_name);
        if !path.exists() {
            return Ok(Vec::new());
        }
        read_entries(&path)
    }
}

fn read_entries(path: &Path) -> anyhow::Result<Vec<HistoryEntry>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read history log {}", path.display()))?;
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).context("corrupt history line"))
        .collect()
}

impl HistoryRecorder for FileHistory {
    fn append(&self, log_name: &str, entry: &HistoryEntry) -> anyhow::Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let path = self.log_path(log_name);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open history log {}", path.display()))?;
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let history = FileHistory::new(dir.path());

        let first = HistoryEntry {
            time: 1_700_000_000,
            power: 1500.0,
            energy: None,
        };
        let second = HistoryEntry {
            time: 1_700_000_010,
            power: 0.0,
            energy: None,
        };
        history.append("history_consumption_x.jsonl", &first).unwrap();
        history.append("history_consumption_x.jsonl", &second).unwrap();

        let entries = history.read_log("history_consumption_x.jsonl").unwrap();
        assert_eq!(entries, vec![first, second]);
    }

    #[test]
    fn test_logs_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let history = FileHistory::new(dir.path());

        let entry = HistoryEntry {
            time: 1,
            power: 850.0,
            energy: Some(321.9),
        };
        history.append("history_return_y.jsonl", &entry).unwrap();

        assert_eq!(history.read_log("history_return_y.jsonl").unwrap(), vec![entry]);
        assert!(history.read_log("history_consumption_y.jsonl").unwrap().is_empty());
    }

    #[test]
    fn test_energy_omitted_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let history = FileHistory::new(dir.path());
        history
            .append(
                "log.jsonl",
                &HistoryEntry {
                    time: 5,
                    power: 2.5,
                    energy: None,
                },
            )
            .unwrap();

        let raw = fs::read_to_string(history.log_path("log.jsonl")).unwrap();
        assert_eq!(raw, "{\"time\":5,\"power\":2.5}\n");
    }

    #[test]
    fn test_creates_missing_storage_dir() {
        let dir = tempfile::tempdir().unwrap();
        let history = FileHistory::new(dir.path().join("nested").join("store"));
        history
            .append(
                "log.jsonl",
                &HistoryEntry {
                    time: 5,
                    power: 2.5,
                    energy: None,
                },
            )
            .unwrap();
        assert_eq!(history.read_log("log.jsonl").unwrap().len(), 1);
    }
}
