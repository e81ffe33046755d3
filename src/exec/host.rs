// src/exec/host.rs

//! Executor that runs commands on the build host

use super::{BindMount, CommandOutput, CommandSpec, PrivilegedExecutor};
use crate::error::{Error, Result};
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use tracing::debug;
use wait_timeout::ChildExt;

/// How the host executor obtains root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// Prefix every command with `sudo --non-interactive`
    Sudo,
    /// Run commands as-is (the process already runs as root, or tests)
    None,
}

/// Runs privileged commands directly on the host
#[derive(Debug, Clone)]
pub struct HostExecutor {
    escalation: Escalation,
}

impl HostExecutor {
    pub fn new(escalation: Escalation) -> Self {
        Self { escalation }
    }

    /// Use `sudo` only when not already running as root
    pub fn detect() -> Self {
        if nix::unistd::geteuid().is_root() {
            Self::new(Escalation::None)
        } else {
            Self::new(Escalation::Sudo)
        }
    }

    pub fn escalation(&self) -> Escalation {
        self.escalation
    }

    /// Full argv that will be spawned for `spec`
    pub fn host_argv(&self, spec: &CommandSpec) -> Vec<String> {
        let mut argv = Vec::new();
        if self.escalation == Escalation::Sudo {
            argv.extend(["sudo", "--non-interactive", "--"].map(String::from));
            if !spec.env.is_empty() {
                // sudo resets the environment, so pass it through `env`
                argv.push("env".to_string());
                argv.extend(spec.env.iter().map(|(k, v)| format!("{}={}", k, v)));
            }
        }
        if !spec.binds.is_empty() {
            argv.extend(bind_wrapper(&spec.binds));
        }
        argv.extend(spec.argv.iter().cloned());
        argv
    }
}

impl PrivilegedExecutor for HostExecutor {
    fn execute(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let argv = self.host_argv(spec);
        let rendered = spec.display();
        let (program, args) = argv.split_first().ok_or_else(|| Error::Spawn {
            command: rendered.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty argv"),
        })?;

        debug!("Executing: {}", argv.join(" "));

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        if self.escalation == Escalation::None {
            for (key, value) in &spec.env {
                cmd.env(key, value);
            }
        }

        let mut child = cmd.spawn().map_err(|source| Error::Spawn {
            command: rendered.clone(),
            source,
        })?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = match spec.timeout {
            Some(timeout) => match child.wait_timeout(timeout)? {
                Some(status) => status,
                None => {
                    kill_and_reap(&mut child);
                    return Err(Error::Timeout {
                        command: rendered,
                        timeout,
                    });
                }
            },
            None => child.wait()?,
        };

        Ok(CommandOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout: join_drain(stdout),
            stderr: join_drain(stderr),
        })
    }
}

/// Wrap a command so it sees `mounts` read-only in a private mount namespace
fn bind_wrapper(mounts: &[BindMount]) -> Vec<String> {
    let mut script = String::new();
    for bm in mounts {
        let src = shell_quote(&bm.source.to_string_lossy());
        let dst = shell_quote(&bm.target.to_string_lossy());
        script.push_str(&format!("mount --bind {} {}\n", src, dst));
        if !bm.writable {
            script.push_str(&format!("mount -o remount,bind,ro {}\n", dst));
        }
    }
    script.push_str("exec \"$@\"\n");

    vec![
        "unshare".to_string(),
        "--mount".to_string(),
        "--propagation".to_string(),
        "private".to_string(),
        "--".to_string(),
        "/bin/sh".to_string(),
        "-euc".to_string(),
        script,
        "strata-bind".to_string(),
    ]
}

/// Single-quote a string for POSIX sh
pub(crate) fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn join_drain(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

fn kill_and_reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_sudo_prefix_and_env() {
        let exec = HostExecutor::new(Escalation::Sudo);
        let spec = CommandSpec::new(["true"]).with_env("A", "1");
        assert_eq!(
            exec.host_argv(&spec),
            vec!["sudo", "--non-interactive", "--", "env", "A=1", "true"]
        );
    }

    #[test]
    fn test_no_escalation_passes_argv_through() {
        let exec = HostExecutor::new(Escalation::None);
        let spec = CommandSpec::new(["chmod", "0755", "/x"]).with_env("A", "1");
        assert_eq!(exec.host_argv(&spec), vec!["chmod", "0755", "/x"]);
    }

    #[test]
    fn test_bind_wrapper_remounts_readonly() {
        let exec = HostExecutor::new(Escalation::None);
        let spec = CommandSpec::new(["chown", "root:root", "/x"])
            .with_binds([BindMount::readonly("/etc/passwd", "/etc/passwd")]);
        let argv = exec.host_argv(&spec);
        assert_eq!(&argv[..5], &["unshare", "--mount", "--propagation", "private", "--"]);
        let script = &argv[7];
        assert!(script.contains("mount --bind '/etc/passwd' '/etc/passwd'"));
        assert!(script.contains("mount -o remount,bind,ro '/etc/passwd'"));
        assert_eq!(&argv[argv.len() - 3..], &["chown", "root:root", "/x"]);
    }

    #[test]
    fn test_bind_wrapper_leaves_writable_binds_writable() {
        let exec = HostExecutor::new(Escalation::None);
        let spec = CommandSpec::new(["true"]).with_binds([
            BindMount::writable("/vol/img", "/mnt/img"),
            BindMount::readonly("/etc/group", "/etc/group"),
        ]);
        let script = &exec.host_argv(&spec)[7];
        assert!(script.contains("mount --bind '/vol/img' '/mnt/img'"));
        assert!(!script.contains("remount,bind,ro '/mnt/img'"));
        assert!(script.contains("mount -o remount,bind,ro '/etc/group'"));
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_execute_captures_output_and_exit_code() {
        let exec = HostExecutor::new(Escalation::None);
        let out = exec
            .execute(&CommandSpec::new(["sh", "-c", "echo out; echo err >&2; exit 3"]))
            .unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stdout, "out\n");
        assert_eq!(out.stderr, "err\n");
    }

    #[test]
    fn test_execute_passes_env() {
        let exec = HostExecutor::new(Escalation::None);
        let out = exec
            .execute(&CommandSpec::new(["sh", "-c", "echo $STRATA_TEST"]).with_env("STRATA_TEST", "ohai"))
            .unwrap();
        assert!(out.is_success());
        assert_eq!(out.stdout, "ohai\n");
    }

    #[test]
    fn test_execute_runs_in_cwd() {
        let temp = tempfile::TempDir::new().unwrap();
        let exec = HostExecutor::new(Escalation::None);
        let out = exec
            .execute(&CommandSpec::new(["pwd", "-P"]).with_cwd(temp.path()))
            .unwrap();
        let expected = temp.path().canonicalize().unwrap();
        assert_eq!(out.stdout.trim_end(), expected.to_string_lossy());
    }

    #[test]
    fn test_execute_timeout_kills_child() {
        let exec = HostExecutor::new(Escalation::None);
        let spec = CommandSpec::new(["sleep", "10"]).with_timeout(Some(Duration::from_millis(100)));
        let err = exec.execute(&spec).unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[test]
    fn test_execute_missing_binary_is_spawn_error() {
        let exec = HostExecutor::new(Escalation::None);
        let err = exec
            .execute(&CommandSpec::new(["/nonexistent/strata-binary"]))
            .unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
    }
}
