use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::services::runs::RunResult;

/// Append-only history of finished runs, one JSON document per line.
pub struct ResultStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ResultStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, result: &RunResult) -> Result<()> {
        let mut line = serde_json::to_string(result).context("serialize run result")?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("open {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("append to {}", self.path.display()))?;
        file.sync_data().await.ok();
        Ok(())
    }

    /// Oldest first. Lines that fail to parse are skipped.
    pub async fn list(&self) -> Result<Vec<RunResult>> {
        let _guard = self.lock.lock().await;
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("read {}", self.path.display()));
            }
        };
        let mut results = Vec::new();
        for (index, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<RunResult>(line) {
                Ok(result) => results.push(result),
                Err(err) => tracing::warn!(
                    path = %self.path.display(),
                    line = index + 1,
                    error = %err,
                    "skipping unreadable result line"
                ),
            }
        }
        Ok(results)
    }

    pub async fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("remove {}", self.path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::runs::MachineSummary;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn sample(id: &str) -> RunResult {
        RunResult {
            id: id.to_string(),
            timestamp: "2026-01-01T00:00:00+00:00".to_string(),
            machines: BTreeMap::from([(
                "m1".to_string(),
                MachineSummary {
                    name: "box".to_string(),
                    host: "a.local".to_string(),
                },
            )]),
            benchmarks: BTreeMap::from([(
                "m1".to_string(),
                BTreeMap::from([("cpp_sorting".to_string(), 0.5)]),
            )]),
        }
    }

    #[tokio::test]
    async fn appends_and_lists_in_order() {
        let dir = TempDir::new().unwrap();
        let store = ResultStore::new(dir.path().join("nested/results.jsonl"));
        assert!(store.list().await.unwrap().is_empty());

        store.append(&sample("r1")).await.unwrap();
        store.append(&sample("r2")).await.unwrap();
        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0], sample("r1"));
        assert_eq!(listed[1].id, "r2");
    }

    #[tokio::test]
    async fn skips_corrupt_lines_and_clears() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results.jsonl");
        let store = ResultStore::new(&path);
        store.append(&sample("r1")).await.unwrap();
        std::fs::write(
            &path,
            format!(
                "{}\nnot json\n",
                std::fs::read_to_string(&path).unwrap().trim_end()
            ),
        )
        .unwrap();
        assert_eq!(store.list().await.unwrap().len(), 1);

        store.clear().await.unwrap();
        store.clear().await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }
}
