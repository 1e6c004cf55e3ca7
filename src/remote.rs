//! Remote execution over an authenticated shell transport.
//!
//! `Transport` is the seam between the orchestration core and the actual
//! remote-shell mechanism; `SshTransport` implements it with the system
//! `ssh`/`scp` binaries. `RemoteExecutor` layers the per-VM capability set
//! on top: detached launch, clean-overwrite directory copy, chmod, kill,
//! host-identity reset and a reachability probe.
//!
//! Per-call failure is non-fatal: every capability returns a success flag
//! and logs a warning, so a fan-out loop over VMs keeps going when one VM
//! misbehaves.

use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

/// Authenticated exec + recursive copy, addressed by hostname.
pub trait Transport: Send + Sync {
    /// Run `command` on `host`. `Ok(true)` iff the remote command exited 0.
    fn exec(&self, host: &str, command: &str) -> Result<bool>;

    /// Recursively copy `local` to `remote` on `host`.
    fn copy_dir(&self, host: &str, local: &Path, remote: &str) -> Result<bool>;

    /// Drop any cached host-authentication fingerprint for `host`.
    fn forget_host(&self, host: &str) -> Result<()>;
}

/// Transport backed by the system `ssh`/`scp` binaries, keyed by the pool's
/// private key. Strict host-key checking is disabled because VM addresses
/// are reused across pool recreations.
pub struct SshTransport {
    user: String,
    key_path: PathBuf,
}

impl SshTransport {
    pub fn new(user: impl Into<String>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            user: user.into(),
            key_path: key_path.into(),
        }
    }

    fn target(&self, host: &str) -> String {
        format!("{}@{}", self.user, host)
    }
}

impl Transport for SshTransport {
    fn exec(&self, host: &str, command: &str) -> Result<bool> {
        let status = Command::new("ssh")
            .arg(self.target(host))
            .arg("-i")
            .arg(&self.key_path)
            .arg("-o")
            .arg("StrictHostKeyChecking=no")
            .arg(command)
            .status()
            .map_err(|e| Error::Transport(format!("failed to spawn ssh: {}", e)))?;
        Ok(status.success())
    }

    fn copy_dir(&self, host: &str, local: &Path, remote: &str) -> Result<bool> {
        let status = Command::new("scp")
            .arg("-i")
            .arg(&self.key_path)
            .arg("-o")
            .arg("StrictHostKeyChecking=no")
            .arg("-r")
            .arg(local)
            .arg(format!("{}:{}", self.target(host), remote))
            .status()
            .map_err(|e| Error::Transport(format!("failed to spawn scp: {}", e)))?;
        Ok(status.success())
    }

    fn forget_host(&self, host: &str) -> Result<()> {
        let status = Command::new("ssh-keygen")
            .arg("-R")
            .arg(host)
            .status()
            .map_err(|e| Error::Transport(format!("failed to spawn ssh-keygen: {}", e)))?;
        if !status.success() {
            // Nothing cached for this host; not an error.
            tracing::debug!(host, "no host entry removed");
        }
        Ok(())
    }
}

/// Per-VM shell-level capabilities, parameterized by the pool credential
/// baked into the transport.
pub struct RemoteExecutor {
    transport: Arc<dyn Transport>,
}

impl RemoteExecutor {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Run a command on the VM. With `detach` the command is launched inside
    /// a persistent multiplexer session and the call returns once it has
    /// been launched, not once it completes; the session handle is opaque
    /// and completion is unknowable without a separate probe.
    pub fn run_command(&self, host: &str, command: &str, detach: bool) -> bool {
        let wrapped;
        let command = if detach {
            wrapped = format!("screen -d -m {}", command);
            wrapped.as_str()
        } else {
            command
        };

        match self.transport.exec(host, command) {
            Ok(ok) => {
                if !ok {
                    tracing::warn!(host, command, "remote command failed");
                }
                ok
            }
            Err(e) => {
                tracing::warn!(host, command, error = %e, "remote command could not be dispatched");
                false
            }
        }
    }

    /// Replace `remote` on the VM with the contents of `local`. The remote
    /// directory is removed first: copy is a clean overwrite, not a merge.
    pub fn copy_directory(&self, host: &str, local: &Path, remote: &str) -> bool {
        self.run_command(host, &format!("rm -rf {}", remote), false);

        match self.transport.copy_dir(host, local, remote) {
            Ok(ok) => {
                if !ok {
                    tracing::warn!(host, remote, "directory copy failed");
                }
                ok
            }
            Err(e) => {
                tracing::warn!(host, remote, error = %e, "directory copy could not be dispatched");
                false
            }
        }
    }

    pub fn make_executable(&self, host: &str, path: &str) -> bool {
        self.run_command(host, &format!("chmod +x {}", path), false)
    }

    /// Kill every detached session on the VM. No-op if none are running.
    pub fn kill_all_detached(&self, host: &str) -> bool {
        self.run_command(host, "killall screen", false)
    }

    /// Drop any cached host fingerprint prior to first contact.
    pub fn forget_host_identity(&self, host: &str) {
        if let Err(e) = self.transport.forget_host(host) {
            tracing::warn!(host, error = %e, "could not reset host identity");
        }
    }

    /// Connect once and exit, verifying connectivity and key acceptance.
    pub fn probe_reachable(&self, host: &str) -> bool {
        self.run_command(host, "exit", false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Transport that records every call instead of talking to a VM.
    #[derive(Default)]
    struct RecordingTransport {
        calls: Mutex<Vec<String>>,
        fail_exec: bool,
    }

    impl RecordingTransport {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    impl Transport for RecordingTransport {
        fn exec(&self, host: &str, command: &str) -> Result<bool> {
            self.calls.lock().push(format!("exec {} {}", host, command));
            Ok(!self.fail_exec)
        }

        fn copy_dir(&self, host: &str, local: &Path, remote: &str) -> Result<bool> {
            self.calls
                .lock()
                .push(format!("copy {} {} {}", host, local.display(), remote));
            Ok(true)
        }

        fn forget_host(&self, host: &str) -> Result<()> {
            self.calls.lock().push(format!("forget {}", host));
            Ok(())
        }
    }

    #[test]
    fn test_copy_directory_removes_then_copies() {
        let transport = Arc::new(RecordingTransport::default());
        let executor = RemoteExecutor::new(transport.clone());

        assert!(executor.copy_directory("demo-0.example", Path::new("pool/task"), "task"));

        let calls = transport.calls();
        assert_eq!(
            calls,
            vec![
                "exec demo-0.example rm -rf task",
                "copy demo-0.example pool/task task",
            ]
        );
    }

    #[test]
    fn test_detach_wraps_in_multiplexer_session() {
        let transport = Arc::new(RecordingTransport::default());
        let executor = RemoteExecutor::new(transport.clone());

        assert!(executor.run_command("h", "task/run.sh", true));
        assert_eq!(transport.calls(), vec!["exec h screen -d -m task/run.sh"]);
    }

    #[test]
    fn test_plain_command_not_wrapped() {
        let transport = Arc::new(RecordingTransport::default());
        let executor = RemoteExecutor::new(transport.clone());

        executor.run_command("h", "task/run.sh", false);
        assert_eq!(transport.calls(), vec!["exec h task/run.sh"]);
    }

    #[test]
    fn test_capability_commands() {
        let transport = Arc::new(RecordingTransport::default());
        let executor = RemoteExecutor::new(transport.clone());

        executor.make_executable("h", "setup/run.sh");
        executor.kill_all_detached("h");
        executor.probe_reachable("h");
        executor.forget_host_identity("h");

        assert_eq!(
            transport.calls(),
            vec![
                "exec h chmod +x setup/run.sh",
                "exec h killall screen",
                "exec h exit",
                "forget h",
            ]
        );
    }

    #[test]
    fn test_failed_command_reports_false() {
        let transport = Arc::new(RecordingTransport {
            fail_exec: true,
            ..Default::default()
        });
        let executor = RemoteExecutor::new(transport);

        assert!(!executor.run_command("h", "exit", false));
        assert!(!executor.kill_all_detached("h"));
    }
}
