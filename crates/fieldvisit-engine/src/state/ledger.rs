use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};

const GENESIS: &str = "genesis";

fn line_hash(line: &str) -> String {
    format!("sha256:{:x}", Sha256::digest(line.as_bytes()))
}

/// Append-only JSONL ledger where every entry carries the hash of the line before it.
#[derive(Debug, Clone)]
pub struct HashChainLedger {
    path: PathBuf,
}

impl HashChainLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<String> {
        if !self.path.exists() {
            return Ok(String::new());
        }
        std::fs::read_to_string(&self.path)
            .with_context(|| format!("cannot read ledger {}", self.path.display()))
    }

    /// Append `payload` under `event_type`; returns the new entry's hash.
    pub fn append(&self, event_type: &str, payload: &Value) -> Result<String> {
        let mut content = self.read()?;
        let prev_hash = content
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .map(line_hash)
            .unwrap_or_else(|| GENESIS.to_string());

        let entry = serde_json::json!({
            "event_type": event_type,
            "payload": payload,
            "prev_hash": prev_hash,
            "ts": chrono::Utc::now().to_rfc3339(),
        });
        let line = serde_json::to_string(&entry)?;
        let hash = line_hash(&line);

        content.push_str(&line);
        content.push('\n');
        super::atomic::atomic_write(&self.path, content.as_bytes())
            .with_context(|| format!("cannot write ledger {}", self.path.display()))?;
        Ok(hash)
    }

    /// All entries in order. A missing file is an empty ledger.
    pub fn entries(&self) -> Result<Vec<Value>> {
        let content = self.read()?;
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                serde_json::from_str(line).with_context(|| {
                    format!("invalid JSON at line {} of {}", i + 1, self.path.display())
                })
            })
            .collect()
    }

    pub fn count(&self, event_type: &str) -> Result<u64> {
        Ok(self
            .entries()?
            .iter()
            .filter(|e| e.get("event_type").and_then(Value::as_str) == Some(event_type))
            .count() as u64)
    }

    /// Verify every link; returns the number of entries.
    pub fn verify(&self) -> Result<u64> {
        let (count, _) = self.walk(None)?;
        Ok(count)
    }

    /// Index of the first entry that is unreadable or does not link to its predecessor.
    pub fn first_break(&self) -> Result<Option<u64>> {
        let content = self.read()?;
        let mut head = GENESIS.to_string();
        let lines = content.lines().filter(|line| !line.trim().is_empty());
        for (index, line) in (0u64..).zip(lines) {
            let prev = serde_json::from_str::<Value>(line)
                .ok()
                .and_then(|e| e.get("prev_hash").and_then(Value::as_str).map(str::to_string));
            if prev.as_deref() != Some(head.as_str()) {
                return Ok(Some(index));
            }
            head = line_hash(line);
        }
        Ok(None)
    }

    /// Record the current head so later tampering with this prefix is detectable.
    pub fn checkpoint(&self, checkpoint_path: &Path) -> Result<Value> {
        let (count, head) = self.walk(None)?;
        let checkpoint = serde_json::json!({
            "ledger": self.path.display().to_string(),
            "entries": count,
            "chain_head": head,
            "created_at": chrono::Utc::now().to_rfc3339(),
        });
        super::atomic::atomic_write(
            checkpoint_path,
            serde_json::to_string_pretty(&checkpoint)?.as_bytes(),
        )
        .with_context(|| format!("cannot write checkpoint {}", checkpoint_path.display()))?;
        Ok(checkpoint)
    }

    /// True if the ledger still starts with the prefix the checkpoint recorded.
    pub fn verify_checkpoint(&self, checkpoint_path: &Path) -> Result<bool> {
        let content = std::fs::read_to_string(checkpoint_path)
            .with_context(|| format!("cannot read checkpoint {}", checkpoint_path.display()))?;
        let checkpoint: Value = serde_json::from_str(&content)?;
        let expected_count = checkpoint.get("entries").and_then(Value::as_u64).unwrap_or(0);
        let expected_head = checkpoint
            .get("chain_head")
            .and_then(Value::as_str)
            .unwrap_or(GENESIS);

        match self.walk(Some(expected_count)) {
            Ok((count, head)) => Ok(count == expected_count && head == expected_head),
            Err(_) => Ok(false),
        }
    }

    /// Walk up to `limit` entries checking links; returns (count, head hash).
    fn walk(&self, limit: Option<u64>) -> Result<(u64, String)> {
        let content = self.read()?;
        let mut count = 0u64;
        let mut head = GENESIS.to_string();

        for (i, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            if limit.is_some_and(|l| count >= l) {
                break;
            }
            let entry: Value = serde_json::from_str(line)
                .with_context(|| format!("invalid JSON at line {}", i + 1))?;
            let prev = entry
                .get("prev_hash")
                .and_then(Value::as_str)
                .unwrap_or(GENESIS);
            if prev != head {
                bail!(
                    "hash chain broken at entry {count}: expected prev_hash '{head}', got '{prev}'"
                );
            }
            head = line_hash(line);
            count += 1;
        }
        Ok((count, head))
    }
}
