//! Runs each step as a child process of the current executable

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use warden_config::{join_doc_roots, join_domains};

use crate::issuance::CertificateRequest;

use super::{
    CheckStatus, RenewalRunner, RunnerError, DEFAULT_TTL_DAYS, EXIT_CHECK_RENEW, EXIT_CHECK_VALID,
};

/// [`RenewalRunner`] spawning `warden setup|check|issue`
///
/// Each certificate is obtained in its own process, so one crashing or
/// hanging issuance cannot take the others down.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: PathBuf,
    server: String,
    storage: PathBuf,
    ttl_days: u32,
    timeout: Option<Duration>,
    verbose: bool,
}

impl ProcessRunner {
    pub fn new(
        program: impl Into<PathBuf>,
        server: impl Into<String>,
        storage: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            server: server.into(),
            storage: storage.into(),
            ttl_days: DEFAULT_TTL_DAYS,
            timeout: None,
            verbose: false,
        }
    }

    /// Runner spawning the currently running executable
    pub fn current_exe(
        server: impl Into<String>,
        storage: impl Into<PathBuf>,
    ) -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?, server, storage))
    }

    /// Kill and fail any child running longer than `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_ttl_days(mut self, ttl_days: u32) -> Self {
        self.ttl_days = ttl_days;
        self
    }

    /// Pass `--verbose` to every child
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command(&self, subcommand: &str) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg(subcommand)
            .arg("--server")
            .arg(&self.server)
            .arg("--storage")
            .arg(&self.storage);
        if self.verbose {
            command.arg("--verbose");
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    async fn execute(&self, mut command: Command) -> Result<(String, Output), RunnerError> {
        let description = describe(&command);
        debug!(command = %description, "Spawning child");

        let output = command.output();
        let output = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, output).await.map_err(|_| {
                warn!(command = %description, timeout_secs = timeout.as_secs(), "Child timed out");
                RunnerError::Timeout {
                    command: description.clone(),
                    timeout,
                }
            })?,
            None => output.await,
        }
        .map_err(|source| RunnerError::Spawn {
            command: description.clone(),
            source,
        })?;

        debug!(command = %description, status = ?output.status.code(), "Child exited");
        Ok((description, output))
    }
}

#[async_trait]
impl RenewalRunner for ProcessRunner {
    async fn setup(&self, email: &str) -> Result<(), RunnerError> {
        let mut command = self.command("setup");
        command.arg("--email").arg(email);

        let (description, output) = self.execute(command).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(exit_error(description, &output))
        }
    }

    async fn check(&self, request: &CertificateRequest) -> Result<CheckStatus, RunnerError> {
        let mut command = self.command("check");
        command
            .arg("--name")
            .arg(request.common_name().as_str())
            .arg("--names")
            .arg(join_domains(&request.domains))
            .arg("--ttl")
            .arg(self.ttl_days.to_string());

        let (description, output) = self.execute(command).await?;
        match output.status.code() {
            Some(EXIT_CHECK_VALID) => Ok(CheckStatus::Valid),
            Some(EXIT_CHECK_RENEW) => Ok(CheckStatus::NeedsRenewal),
            _ => Err(exit_error(description, &output)),
        }
    }

    async fn issue(&self, request: &CertificateRequest) -> Result<(), RunnerError> {
        let mut command = self.command("issue");
        command
            .arg("--domains")
            .arg(join_domains(&request.domains))
            .arg("--path")
            .arg(join_doc_roots(&request.doc_roots)?)
            .arg("--bits")
            .arg(request.bits.to_string());
        if let Some(user) = &request.user {
            command.arg("--user").arg(user);
        }
        if request.rekey {
            command.arg("--rekey");
        }

        let (description, output) = self.execute(command).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(exit_error(description, &output))
        }
    }
}

fn describe(command: &Command) -> String {
    let command = command.as_std();
    let mut parts = vec![command.get_program().to_string_lossy().into_owned()];
    parts.extend(command.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

fn exit_error(command: String, output: &Output) -> RunnerError {
    let code = output.status.code();
    let stderr = String::from_utf8_lossy(&output.stderr);
    let reason = failure_reason(&stderr).unwrap_or_else(|| match code {
        Some(code) => format!("exited with status {}", code),
        None => "terminated by a signal".to_string(),
    });
    warn!(command = %command, code = ?code, reason = %reason, "Child failed");
    RunnerError::Exit {
        command,
        code,
        reason,
    }
}

/// The reported error from a child's stderr
///
/// Prefers everything from the last `Error: ` line on, falling back to the
/// last non-empty line.
fn failure_reason(stderr: &str) -> Option<String> {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    match lines.iter().rposition(|l| l.starts_with("Error: ")) {
        Some(start) => {
            let reason = lines[start..].join(" ");
            Some(reason.trim_start_matches("Error: ").to_string())
        }
        None => lines.last().map(|l| l.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;
    use warden_common::DnsName;

    use crate::renewal::EXIT_COMMAND_ERROR;

    #[test]
    fn test_failure_reason_prefers_error_block() {
        let stderr = "\
  INFO warden: Issuing certificate
  WARN warden: Domain does not resolve
Error: Authorization failed:
  - b.example: Self-verification failed
";
        assert_eq!(
            failure_reason(stderr).unwrap(),
            "Authorization failed: - b.example: Self-verification failed"
        );
    }

    #[test]
    fn test_failure_reason_falls_back_to_last_line() {
        assert_eq!(failure_reason("one\ntwo\n\n").unwrap(), "two");
        assert!(failure_reason("  \n").is_none());
    }

    #[tokio::test]
    async fn test_issue_arguments() {
        let script = ScriptRunner::new(r#"printf '%s\n' "$@" > "$(dirname "$0")/args""#);
        let request = CertificateRequest::new(
            vec![
                DnsName::parse("example.com").unwrap(),
                DnsName::parse("www.example.com").unwrap(),
            ],
            vec![PathBuf::from("/var/www")],
            Some("www-data".to_string()),
            4096,
            true,
        )
        .unwrap();

        script.runner.issue(&request).await.unwrap();

        let args = script.recorded_args();
        assert_eq!(
            args,
            [
                "issue",
                "--server",
                "ca.test",
                "--storage",
                "/tmp/storage",
                "--domains",
                "example.com,www.example.com",
                "--path",
                "/var/www:/var/www",
                "--bits",
                "4096",
                "--user",
                "www-data",
                "--rekey",
            ]
        );
    }

    #[tokio::test]
    async fn test_issue_arguments_without_options() {
        let script = ScriptRunner::new(r#"printf '%s\n' "$@" > "$(dirname "$0")/args""#);
        let request = CertificateRequest::new(
            vec![DnsName::parse("example.com").unwrap()],
            vec![PathBuf::from("/var/www")],
            None,
            2048,
            false,
        )
        .unwrap();

        script.runner.issue(&request).await.unwrap();

        let args = script.recorded_args();
        assert!(args.windows(2).any(|w| w == ["--bits", "2048"]));
        assert!(!args.iter().any(|a| a == "--user" || a == "--rekey"));
    }

    #[tokio::test]
    async fn test_exit_codes_of_check() {
        // The script exits with N whatever arguments follow
        let request = CertificateRequest::new(
            vec![DnsName::parse("example.com").unwrap()],
            vec![PathBuf::from("/var/www")],
            None,
            2048,
            false,
        )
        .unwrap();

        let cases = [
            ("exit 0", Some(CheckStatus::Valid)),
            ("exit 1", Some(CheckStatus::NeedsRenewal)),
            ("echo 'Error: boom' >&2; exit 7", None),
        ];
        for (script, expected) in cases {
            let script = ScriptRunner::new(script);
            let result = script.runner.check(&request).await;
            match expected {
                Some(status) => assert_eq!(result.unwrap(), status),
                None => {
                    let err = result.unwrap_err();
                    assert!(matches!(
                        &err,
                        RunnerError::Exit { code: Some(7), reason, .. } if reason == "boom"
                    ));
                }
            }
        }
    }

    #[tokio::test]
    async fn test_failed_check_is_not_a_renewal() {
        let request = CertificateRequest::new(
            vec![DnsName::parse("example.com").unwrap()],
            vec![PathBuf::from("/var/www")],
            None,
            2048,
            false,
        )
        .unwrap();

        let script = ScriptRunner::new(&format!(
            "echo 'Error: Failed to parse certificate' >&2; exit {}",
            EXIT_COMMAND_ERROR
        ));
        let err = script.runner.check(&request).await.unwrap_err();
        assert!(matches!(
            &err,
            RunnerError::Exit { code: Some(EXIT_COMMAND_ERROR), reason, .. }
                if reason == "Failed to parse certificate"
        ));
    }

    #[test]
    fn test_command_error_differs_from_check_statuses() {
        assert_ne!(EXIT_COMMAND_ERROR, EXIT_CHECK_VALID);
        assert_ne!(EXIT_COMMAND_ERROR, EXIT_CHECK_RENEW);
    }

    #[tokio::test]
    async fn test_timeout_fails_the_step() {
        let mut script = ScriptRunner::new("sleep 5");
        script.runner = script.runner.with_timeout(Some(Duration::from_millis(100)));
        let err = script.runner.setup("ops@example.com").await.unwrap_err();
        assert!(matches!(err, RunnerError::Timeout { .. }));
    }

    /// A `ProcessRunner` whose program is a shell script in a temporary
    /// directory
    struct ScriptRunner {
        dir: TempDir,
        runner: ProcessRunner,
    }

    impl ScriptRunner {
        fn new(script: &str) -> Self {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("runner.sh");
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            let runner = ProcessRunner::new(path, "ca.test", "/tmp/storage");
            Self { dir, runner }
        }

        /// Arguments the script wrote to `args`, one per line
        fn recorded_args(&self) -> Vec<String> {
            std::fs::read_to_string(self.dir.path().join("args"))
                .unwrap()
                .lines()
                .map(str::to_string)
                .collect()
        }
    }
}
