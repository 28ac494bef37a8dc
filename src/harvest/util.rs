use anyhow::{Context, Result};
use std::fs;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tempfile::NamedTempFile;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Return the current Unix epoch in seconds.
pub fn now_epoch_secs() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

/// Truncate `input` to at most `max_chars` characters, stripping control
/// characters and appending `…` when truncated.
pub fn truncate_with_ellipsis(input: &str, max_chars: usize) -> String {
    let clean: String = input.chars().filter(|c| !c.is_control()).collect();
    if clean.chars().count() > max_chars {
        let mut s: String = clean.chars().take(max_chars).collect();
        s.push('…');
        s
    } else {
        clean
    }
}

pub fn modified_time(path: &Path) -> Result<SystemTime> {
    let meta = fs::metadata(path).with_context(|| format!("failed to stat {}", path.display()))?;
    meta.modified()
        .with_context(|| format!("no modification time for {}", path.display()))
}

/// True when `path` is a regular file with at least one byte.
pub fn non_empty_file(path: &Path) -> bool {
    fs::metadata(path).is_ok_and(|meta| meta.is_file() && meta.len() > 0)
}

/// Hidden temporary file in `dir`, readable like a normally created file, to
/// be persisted under its final name once complete.
pub fn staging_file(dir: &Path) -> std::io::Result<NamedTempFile> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(".staging-");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(fs::Permissions::from_mode(0o644));
    }
    builder.tempfile_in(dir)
}

#[derive(Debug)]
pub enum ProcessOutcome {
    Exited(Output),
    TimedOut { after: Duration },
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

/// Run `cmd` to completion or until `timeout` elapses. On expiry the spawned
/// child is killed and reaped; no other process is touched.
pub fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> Result<ProcessOutcome> {
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    let mut child = cmd.spawn()?;
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());
    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(ProcessOutcome::Exited(Output {
                status,
                stdout: stdout.join().unwrap_or_default(),
                stderr: stderr.join().unwrap_or_default(),
            }));
        }
        if started.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(ProcessOutcome::TimedOut { after: timeout });
        }
        thread::sleep(POLL_INTERVAL);
    }
}
