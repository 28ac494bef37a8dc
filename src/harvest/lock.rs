use crate::error::HarvestError;
use crate::harvest::util::now_epoch_secs;
use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockPayload {
    pub pid: u32,
    pub build_uuid: String,
    pub started_at_epoch_secs: u64,
}

/// Exclusive hold on the output tree for one run. Released on drop.
#[derive(Debug)]
pub struct RunLock {
    file: File,
}

impl RunLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;

        if let Err(err) = FileExt::try_lock_exclusive(&file) {
            if err.kind() == fs2::lock_contended_error().kind() {
                return Err(HarvestError::Locked {
                    path: path.display().to_string(),
                }
                .into());
            }
            return Err(err).with_context(|| format!("failed to lock {}", path.display()));
        }

        let payload = LockPayload {
            pid: std::process::id(),
            build_uuid: env!("BUILD_UUID").to_string(),
            started_at_epoch_secs: now_epoch_secs()?,
        };
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(serde_json::to_string(&payload)?.as_bytes())?;
        file.flush()?;

        Ok(Self { file })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = self.file.set_len(0);
        let _ = FileExt::unlock(&self.file);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    Free,
    /// Another handle holds the lock. The payload is absent if unreadable.
    Held(Option<LockPayload>),
}

/// Report whether a run currently holds the lock at `path`. A payload left
/// behind by a crashed run does not count as held.
pub fn lock_state(path: &Path) -> Result<LockState> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(LockState::Free),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to open {}", path.display()));
        }
    };
    match FileExt::try_lock_exclusive(&file) {
        Ok(()) => {
            FileExt::unlock(&file)
                .with_context(|| format!("failed to unlock {}", path.display()))?;
            Ok(LockState::Free)
        }
        Err(err) if err.kind() == fs2::lock_contended_error().kind() => {
            Ok(LockState::Held(read_payload(path)))
        }
        Err(err) => Err(err).with_context(|| format!("failed to test lock {}", path.display())),
    }
}

/// Who last held the lock, if the file says anything readable.
pub fn read_payload(path: &Path) -> Option<LockPayload> {
    let raw = fs::read_to_string(path).ok()?;
    serde_json::from_str(raw.trim()).ok()
}

#[cfg(test)]
mod tests {
    use super::{LockPayload, LockState, RunLock, lock_state, read_payload};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn second_holder_is_refused_until_release() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("out/.lc-harvest.lock");

        let held = RunLock::acquire(&path).expect("first lock");
        let payload = read_payload(&path).expect("payload");
        assert_eq!(payload.pid, std::process::id());

        let err = RunLock::acquire(&path).unwrap_err();
        assert!(err.to_string().starts_with("E001_LOCKED"));

        drop(held);
        assert!(read_payload(&path).is_none());
        RunLock::acquire(&path).expect("relock");
    }

    #[test]
    fn leftover_payload_without_holder_reads_as_free() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join(".lc-harvest.lock");
        assert_eq!(lock_state(&path).expect("state"), LockState::Free);

        let stale = LockPayload {
            pid: 4_000_000,
            build_uuid: "old".to_string(),
            started_at_epoch_secs: 1,
        };
        fs::write(&path, serde_json::to_string(&stale).expect("json")).expect("write");

        assert_eq!(lock_state(&path).expect("state"), LockState::Free);
        RunLock::acquire(&path).expect("stale payload does not block");
    }

    #[test]
    fn live_holder_reads_as_held() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join(".lc-harvest.lock");
        let held = RunLock::acquire(&path).expect("lock");

        match lock_state(&path).expect("state") {
            LockState::Held(Some(payload)) => assert_eq!(payload.pid, std::process::id()),
            other => panic!("expected held lock, got {other:?}"),
        }

        drop(held);
        assert_eq!(lock_state(&path).expect("state"), LockState::Free);
    }
}
