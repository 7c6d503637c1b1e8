//! Invocation of the external password-store command.
//!
//! A [`Retriever`] holds the configured argv prefix (default: `pass`) and
//! spawns one child process per retrieval: `<prefix> show <name>` for the
//! password facet, `<prefix> otp show <name>` for the one-time code.  Stdout
//! is filtered through a [`FirstLineWriter`] so only the secret line is
//! kept; stderr is captured whole and carried verbatim inside the error
//! when the command fails.
//!
//! Retrievals are never retried: `pass` may pop an interactive pinentry
//! prompt, and re-invoking it behind the caller's back would re-prompt.

use std::io::Write as _;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::AsyncReadExt as _;
use tokio::process::Command;

use crate::Secret;
use crate::firstline::FirstLineWriter;

/// Default store command when none is configured.
pub const DEFAULT_COMMAND: &str = "pass";

/// Operation suffix for the password facet (`pass show <name>`).
pub const PASSWORD_OP: &[&str] = &["show"];
/// Operation suffix for the one-time-code facet (`pass otp show <name>`).
pub const OTP_OP: &[&str] = &["otp", "show"];

/// Time allowed for a single store invocation, pinentry included.  The
/// child is killed when this expires so a stuck gpg-agent cannot wedge the
/// read forever.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum RetrieveError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} failed ({status}): {stderr}")]
    CommandFailed {
        program: String,
        status: ExitStatus,
        /// Captured stderr, verbatim, for operator diagnosis.
        stderr: String,
    },
    #[error("{program} did not finish within {timeout:?}")]
    TimedOut { program: String, timeout: Duration },
    #[error("i/o error talking to {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Runs the password-store command and captures the first line of stdout.
pub struct Retriever {
    /// Full argv prefix, e.g. `["pass"]` or `["env", "PASSWORD_STORE_DIR=/x", "pass"]`.
    command: Vec<String>,
    timeout: Duration,
}

impl Retriever {
    /// `command` is the argv prefix used for every invocation.  An empty
    /// prefix falls back to [`DEFAULT_COMMAND`] — the layout is never
    /// silently defaulted, but the command is.
    pub fn new(mut command: Vec<String>, timeout: Duration) -> Self {
        if command.is_empty() {
            command.push(DEFAULT_COMMAND.to_string());
        }
        Self { command, timeout }
    }

    /// Run `<command> <operation> <name>` to completion and return the first
    /// line of its stdout.
    ///
    /// Exactly one subprocess per call; concurrent callers each own their
    /// child and buffers.  On timeout the child is killed, not abandoned.
    pub async fn retrieve(&self, operation: &[&str], name: &str) -> Result<Secret, RetrieveError> {
        let program = self.command[0].clone();

        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..])
            .args(operation)
            .arg(name)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| RetrieveError::Spawn {
            program: program.clone(),
            source: e,
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // Drain both pipes concurrently so a chatty stderr can never
        // deadlock against a full stdout buffer, then reap the child.
        let run = async {
            let first_line = async {
                let mut buf = Vec::new();
                if let Some(mut out) = stdout {
                    let mut sink = FirstLineWriter::new(&mut buf);
                    let mut chunk = [0u8; 4096];
                    loop {
                        let n = out.read(&mut chunk).await?;
                        if n == 0 {
                            break;
                        }
                        sink.write_all(&chunk[..n])?;
                    }
                }
                Ok::<_, std::io::Error>(buf)
            };
            let err_text = async {
                let mut buf = Vec::new();
                if let Some(mut err) = stderr {
                    err.read_to_end(&mut buf).await?;
                }
                Ok::<_, std::io::Error>(buf)
            };
            let (first_line, err_text) = tokio::join!(first_line, err_text);
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((first_line?, err_text?, status))
        };

        // Bind before matching so the future (which borrows `child`) is
        // dropped and the arms may kill the child.
        let outcome = tokio::time::timeout(self.timeout, run).await;
        let (first_line, err_text, status) = match outcome {
            Ok(Ok(parts)) => parts,
            Ok(Err(e)) => {
                let _ = child.start_kill();
                return Err(RetrieveError::Io {
                    program,
                    source: e,
                });
            }
            Err(_elapsed) => {
                let _ = child.start_kill();
                return Err(RetrieveError::TimedOut {
                    program,
                    timeout: self.timeout,
                });
            }
        };

        if !status.success() {
            return Err(RetrieveError::CommandFailed {
                program,
                status,
                stderr: String::from_utf8_lossy(&err_text).into_owned(),
            });
        }

        Ok(Secret::from_bytes(first_line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// Write an executable `/bin/sh` stub standing in for the store command.
    fn stub_script(dir: &TempDir, name: &str, body: &str) -> String {
        let path = dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn retriever(command: Vec<String>) -> Retriever {
        Retriever::new(command, Duration::from_secs(10))
    }

    #[tokio::test]
    async fn first_line_of_stdout_is_the_secret() {
        let dir = TempDir::new().unwrap();
        let script = stub_script(
            &dir,
            "pass",
            "echo 'hunter2'\necho 'note: expires soon'",
        );
        let secret = retriever(vec![script])
            .retrieve(PASSWORD_OP, "mail/alice")
            .await
            .unwrap();
        assert_eq!(secret.as_str(), "hunter2");
    }

    #[tokio::test]
    async fn nonzero_exit_carries_stderr_verbatim() {
        let dir = TempDir::new().unwrap();
        let script = stub_script(&dir, "pass", "echo 'gpg: decryption failed' >&2\nexit 1");
        let err = retriever(vec![script])
            .retrieve(PASSWORD_OP, "mail/alice")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("gpg: decryption failed"));
        match err {
            // Verbatim capture: the trailing newline from echo is kept.
            RetrieveError::CommandFailed { stderr, .. } => {
                assert_eq!(stderr, "gpg: decryption failed\n");
            }
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn spawn_failure_names_the_program() {
        let err = retriever(vec!["/nonexistent/credential-store".to_string()])
            .retrieve(PASSWORD_OP, "x")
            .await
            .unwrap_err();
        match err {
            RetrieveError::Spawn { program, .. } => {
                assert_eq!(program, "/nonexistent/credential-store");
            }
            other => panic!("expected Spawn, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn argv_is_prefix_then_operation_then_name() {
        let dir = TempDir::new().unwrap();
        let script = stub_script(&dir, "rec", r#"printf '%s\n' "$@" >> "$0.log""#);
        retriever(vec![script.clone(), "--flag".to_string()])
            .retrieve(OTP_OP, "svc/bob")
            .await
            .unwrap();
        let log = std::fs::read_to_string(format!("{script}.log")).unwrap();
        let args: Vec<&str> = log.lines().collect();
        assert_eq!(args, ["--flag", "otp", "show", "svc/bob"]);
    }

    #[tokio::test]
    async fn slow_command_is_killed_on_timeout() {
        let dir = TempDir::new().unwrap();
        let script = stub_script(&dir, "slow", "sleep 30");
        let err = Retriever::new(vec![script], Duration::from_millis(100))
            .retrieve(PASSWORD_OP, "x")
            .await
            .unwrap_err();
        assert!(matches!(err, RetrieveError::TimedOut { .. }));
    }

    #[tokio::test]
    async fn empty_first_line_yields_empty_secret() {
        let dir = TempDir::new().unwrap();
        let script = stub_script(&dir, "pass", "echo\necho 'tail'");
        let secret = retriever(vec![script])
            .retrieve(PASSWORD_OP, "x")
            .await
            .unwrap();
        assert_eq!(secret.as_str(), "");
    }

    #[tokio::test]
    async fn empty_prefix_falls_back_to_default_command() {
        let r = Retriever::new(Vec::new(), Duration::from_secs(1));
        assert_eq!(r.command, vec![DEFAULT_COMMAND.to_string()]);
    }
}
