//! Adapter over the OS service manager for the slate encoder unit.
//!
//! Invocations are idempotent (`start` on an active unit is a no-op) and
//! bounded by a hard timeout so a wedged systemd never stalls the decision
//! loop. When the daemon is not root, commands go through `sudo -n`; a
//! NoNewPrivileges lockout is reported as `PermissionDenied` with a
//! remediation hint rather than retried blindly.

use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// Hard deadline for any single service-manager invocation.
const SERVICE_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of a control operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceOutcome {
    /// The unit changed state as requested.
    Changed,
    AlreadyInDesiredState,
    PermissionDenied,
    Timeout,
    Failed(String),
}

impl ServiceOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ServiceOutcome::Changed | ServiceOutcome::AlreadyInDesiredState
        )
    }
}

impl fmt::Display for ServiceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceOutcome::Changed => write!(f, "changed"),
            ServiceOutcome::AlreadyInDesiredState => write!(f, "already in desired state"),
            ServiceOutcome::PermissionDenied => write!(f, "permission denied"),
            ServiceOutcome::Timeout => {
                write!(f, "timed out after {}s", SERVICE_TIMEOUT.as_secs())
            }
            ServiceOutcome::Failed(message) => write!(f, "{message}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceController {
    unit: String,
    use_sudo: bool,
}

impl ServiceController {
    pub fn new(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            use_sudo: !nix::unistd::geteuid().is_root(),
        }
    }

    #[cfg(test)]
    fn with_sudo(unit: impl Into<String>, use_sudo: bool) -> Self {
        Self {
            unit: unit.into(),
            use_sudo,
        }
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Whether the unit is currently active. Errors degrade to `false`; the
    /// decision loop treats that the same as a stopped unit and recovers on
    /// a later tick.
    pub async fn is_active(&self) -> bool {
        match self.run_systemctl("is-active").await {
            Invocation::Completed { code: 0, stdout, .. } => stdout.trim() == "active",
            Invocation::Completed { .. } => false,
            Invocation::TimedOut => {
                warn!("systemctl is-active {} timed out", self.unit);
                false
            }
            Invocation::SpawnFailed(err) => {
                warn!("could not query {}: {err}", self.unit);
                false
            }
        }
    }

    pub async fn start(&self) -> ServiceOutcome {
        if self.is_active().await {
            debug!("unit {} already active", self.unit);
            return ServiceOutcome::AlreadyInDesiredState;
        }
        let outcome = self.control("start").await;
        if outcome == ServiceOutcome::Changed {
            info!("unit {} started", self.unit);
        }
        outcome
    }

    pub async fn stop(&self) -> ServiceOutcome {
        if !self.is_active().await {
            debug!("unit {} already inactive", self.unit);
            return ServiceOutcome::AlreadyInDesiredState;
        }
        let outcome = self.control("stop").await;
        if outcome == ServiceOutcome::Changed {
            info!("unit {} stopped", self.unit);
        }
        outcome
    }

    pub async fn restart(&self) -> ServiceOutcome {
        let outcome = self.control("restart").await;
        if outcome == ServiceOutcome::Changed {
            info!("unit {} restarted", self.unit);
        }
        outcome
    }

    async fn control(&self, verb: &str) -> ServiceOutcome {
        match self.run_systemctl(verb).await {
            Invocation::Completed { code: 0, .. } => ServiceOutcome::Changed,
            Invocation::Completed {
                code,
                stdout,
                stderr,
            } => {
                let message = classify_message(&stdout, &stderr, code);
                let outcome = classify_failure(&message);
                error!("systemctl {verb} {} failed: {message}", self.unit);
                if outcome == ServiceOutcome::PermissionDenied {
                    error!(
                        "the monitor account cannot control {}; grant it passwordless \
                         sudo for systemctl or drop NoNewPrivileges from its unit",
                        self.unit
                    );
                }
                outcome
            }
            Invocation::TimedOut => {
                error!("systemctl {verb} {} timed out", self.unit);
                ServiceOutcome::Timeout
            }
            Invocation::SpawnFailed(err) => {
                error!("could not run systemctl {verb} {}: {err}", self.unit);
                ServiceOutcome::Failed(err)
            }
        }
    }

    async fn run_systemctl(&self, verb: &str) -> Invocation {
        let mut command = if self.use_sudo {
            let mut c = Command::new("sudo");
            c.arg("-n").arg("systemctl");
            c
        } else {
            Command::new("systemctl")
        };
        command
            .arg("--no-ask-password")
            .arg(verb)
            .arg(&self.unit)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let future = command.output();
        match tokio::time::timeout(SERVICE_TIMEOUT, future).await {
            Ok(Ok(output)) => Invocation::Completed {
                code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            },
            Ok(Err(err)) => Invocation::SpawnFailed(err.to_string()),
            Err(_) => Invocation::TimedOut,
        }
    }
}

enum Invocation {
    Completed {
        code: i32,
        stdout: String,
        stderr: String,
    },
    TimedOut,
    SpawnFailed(String),
}

fn classify_message(stdout: &str, stderr: &str, code: i32) -> String {
    let message = stderr.trim();
    let message = if message.is_empty() {
        stdout.trim()
    } else {
        message
    };
    if message.is_empty() {
        format!("systemctl exited with code {code}")
    } else {
        message.to_string()
    }
}

fn classify_failure(message: &str) -> ServiceOutcome {
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("no new privileges")
        || lowered.contains("permission denied")
        || lowered.contains("a password is required")
        || lowered.contains("interactive authentication required")
    {
        ServiceOutcome::PermissionDenied
    } else {
        ServiceOutcome::Failed(message.to_string())
    }
}
