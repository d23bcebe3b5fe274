use anyhow::{bail, Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Locks older than this are considered abandoned.
const STALE_LOCK_SECONDS: i64 = 60;

/// Write content atomically: write to temp file, fsync, rename.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let temp_path = dir.join(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));

    let mut file = std::fs::File::create(&temp_path)
        .with_context(|| format!("cannot create temp file for {}", path.display()))?;
    file.write_all(content)?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(&temp_path, path)
        .with_context(|| format!("cannot rename temp to {}", path.display()))?;
    Ok(())
}

/// Advisory lock guarding a ledger or record file against concurrent writers.
///
/// The `.lock` file holds the PID and acquisition timestamp and is removed on drop.
pub struct AdvisoryLock {
    lock_path: PathBuf,
}

impl AdvisoryLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        let mut name = path.as_os_str().to_owned();
        name.push(".lock");
        let lock_path = PathBuf::from(name);

        if lock_path.exists() {
            let content = std::fs::read_to_string(&lock_path).unwrap_or_default();
            let held_since = content.lines().nth(1).and_then(|ts| ts.parse::<i64>().ok());
            match held_since {
                Some(ts) if chrono::Utc::now().timestamp() - ts <= STALE_LOCK_SECONDS => {
                    bail!("{} is locked by another writer", path.display());
                }
                _ => {
                    let _ = std::fs::remove_file(&lock_path);
                }
            }
        }

        let content = format!("{}\n{}\n", std::process::id(), chrono::Utc::now().timestamp());
        std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
            .and_then(|mut f| f.write_all(content.as_bytes()))
            .with_context(|| format!("cannot acquire lock {}", lock_path.display()))?;

        Ok(Self { lock_path })
    }

    pub fn release(self) -> Result<()> {
        if self.lock_path.exists() {
            std::fs::remove_file(&self.lock_path)
                .with_context(|| format!("cannot release lock {}", self.lock_path.display()))?;
        }
        Ok(())
    }
}

impl Drop for AdvisoryLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.lock_path);
    }
}
