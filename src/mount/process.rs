//! Child-process control behind one interface, with the platform specifics
//! kept in [`platform`].

use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{DebridDavError, DebridDavResult};

/// What to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Extra environment; credentials go here rather than on the command line
    pub env: Vec<(String, String)>,
}

#[cfg_attr(test, mockall::automock)]
pub trait ProcessControl: Send + Sync {
    /// Spawn the process and return its pid.
    fn start(&self, spec: &ProcessSpec) -> DebridDavResult<u32>;

    /// Ask the process to exit, killing it after `grace`.
    fn stop(&self, pid: u32, grace: Duration) -> DebridDavResult<()>;

    fn is_running(&self, pid: u32) -> bool;

    /// Release a FUSE mount point left behind by a stopped process.
    fn unmount_path(&self, path: &Path) -> DebridDavResult<()>;
}

/// Real processes, tracked by pid so they can be reaped.
#[derive(Default)]
pub struct SystemProcessControl {
    children: DashMap<u32, Child>,
}

impl SystemProcessControl {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProcessControl for SystemProcessControl {
    fn start(&self, spec: &ProcessSpec) -> DebridDavResult<u32> {
        let child = Command::new(&spec.program)
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                DebridDavError::IoError(format!("failed to start {}: {}", spec.program.display(), e))
            })?;
        let pid = child.id();
        info!(pid = pid, program = %spec.program.display(), "Process started");
        self.children.insert(pid, child);
        Ok(pid)
    }

    fn stop(&self, pid: u32, grace: Duration) -> DebridDavResult<()> {
        let Some((_, mut child)) = self.children.remove(&pid) else {
            // Not ours, or already reaped.
            if platform::is_alive(pid) {
                platform::terminate(pid)?;
            }
            return Ok(());
        };

        if let Ok(Some(status)) = child.try_wait() {
            debug!(pid = pid, status = %status, "Process already exited");
            return Ok(());
        }
        if let Err(e) = platform::terminate(pid) {
            warn!(pid = pid, error = %e, "Graceful stop failed");
        }

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if let Ok(Some(_)) = child.try_wait() {
                info!(pid = pid, "Process stopped");
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        warn!(pid = pid, "Process ignored stop request; killing");
        child.kill()?;
        child.wait()?;
        Ok(())
    }

    fn is_running(&self, pid: u32) -> bool {
        match self.children.get_mut(&pid) {
            Some(mut child) => matches!(child.try_wait(), Ok(None)),
            None => platform::is_alive(pid),
        }
    }

    fn unmount_path(&self, path: &Path) -> DebridDavResult<()> {
        platform::unmount(path)
    }
}

#[cfg(unix)]
mod platform {
    use std::path::Path;
    use std::process::Command;

    use crate::error::{DebridDavError, DebridDavResult};

    pub fn terminate(pid: u32) -> DebridDavResult<()> {
        // SAFETY: kill(2) has no memory-safety preconditions.
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error().into())
        }
    }

    pub fn is_alive(pid: u32) -> bool {
        // SAFETY: signal 0 only checks that the pid exists.
        unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
    }

    fn run(program: &str, args: &[&str]) -> DebridDavResult<()> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| DebridDavError::IoError(format!("failed to run {}: {}", program, e)))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(DebridDavError::IoError(format!(
                "{} failed: {}",
                program,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    /// Try fusermount3, then fusermount, then umount.
    pub fn unmount(path: &Path) -> DebridDavResult<()> {
        let lossy = path.to_string_lossy();
        let path: &str = &lossy;
        let mut last = None;
        for (program, args) in [
            ("fusermount3", vec!["-u", path]),
            ("fusermount", vec!["-u", path]),
            ("umount", vec![path]),
        ] {
            match run(program, &args) {
                Ok(()) => return Ok(()),
                Err(e) => last = Some(e),
            }
        }
        Err(last.unwrap_or_else(|| DebridDavError::IoError("no unmount tool".to_string())))
    }
}

#[cfg(not(unix))]
mod platform {
    use std::path::Path;
    use std::process::Command;

    use crate::error::{DebridDavError, DebridDavResult};

    pub fn terminate(pid: u32) -> DebridDavResult<()> {
        let status = Command::new("taskkill")
            .args(["/PID", &pid.to_string()])
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(DebridDavError::IoError(format!("taskkill failed for {}", pid)))
        }
    }

    pub fn is_alive(_pid: u32) -> bool {
        false
    }

    /// The mount process owns the drive; nothing is left behind once it exits.
    pub fn unmount(_path: &Path) -> DebridDavResult<()> {
        Ok(())
    }
}
