//! External task bridge
//!
//! Tasks are created by an out-of-process script. The contract is textual:
//! the script receives four positional arguments (`title`, `note`, `project`,
//! comma-joined `tags`) and prints something that [`classify_output`] reads
//! as success or failure.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, error};

/// Deadline for a single bridge invocation
pub const BRIDGE_TIMEOUT: Duration = Duration::from_secs(30);

const SUCCESS_TOKENS: [&str; 5] = ["true", "ok", "success", "created", "done"];

/// Task creation input
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct TaskRequest {
    /// Task title (required, non-empty)
    #[serde(default)]
    pub title: String,
    /// Free-form note
    #[serde(default)]
    pub note: String,
    /// Project path, `/`-separated for nested folders
    #[serde(default)]
    pub project: String,
    /// Tag names, in order
    #[serde(default)]
    pub tags: Vec<String>,
}

impl TaskRequest {
    /// The four positional bridge arguments, in contract order
    #[must_use]
    pub fn bridge_args(&self) -> [String; 4] {
        [
            self.title.clone(),
            self.note.clone(),
            self.project.clone(),
            self.tags.join(","),
        ]
    }
}

/// Bridge invocation failures
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The script could not be started
    #[error("failed to start task bridge: {0}")]
    Spawn(#[source] std::io::Error),
    /// The deadline fired; the subprocess was killed
    #[error("task bridge timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    /// Non-zero exit status
    #[error("task bridge exited with {status}: {output}")]
    Exited {
        /// Exit status description
        status: String,
        /// Combined output
        output: String,
    },
    /// Exit status zero but the output did not read as success
    #[error("task bridge reported failure: {0}")]
    Rejected(String),
}

impl BridgeError {
    /// Short label for metrics and logs
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Spawn(_) => "spawn",
            Self::Timeout(_) => "timeout",
            Self::Exited { .. } => "exit_status",
            Self::Rejected(_) => "rejected",
        }
    }
}

/// Something that can create a task
#[async_trait]
pub trait TaskBridge: Send + Sync {
    /// Create the task; `Ok` carries the bridge output
    async fn create_task(&self, task: &TaskRequest) -> Result<String, BridgeError>;
}

/// Runs the bridge script as a subprocess
pub struct ScriptBridge {
    script: PathBuf,
    timeout: Duration,
}

impl ScriptBridge {
    /// Bridge running `script` with the default deadline
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
            timeout: BRIDGE_TIMEOUT,
        }
    }

    /// Override the deadline
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Script path
    #[must_use]
    pub fn script(&self) -> &Path {
        &self.script
    }

    fn command(&self, args: &[String; 4]) -> Command {
        let is_applescript = self
            .script
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("applescript") || e.eq_ignore_ascii_case("scpt"));

        let mut cmd = if is_applescript {
            let mut cmd = Command::new("osascript");
            cmd.arg(&self.script);
            cmd
        } else {
            Command::new(&self.script)
        };
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl TaskBridge for ScriptBridge {
    async fn create_task(&self, task: &TaskRequest) -> Result<String, BridgeError> {
        let args = task.bridge_args();
        let started = Instant::now();
        debug!(script = %self.script.display(), title = %task.title, "Invoking task bridge");

        let child = self.command(&args).spawn().map_err(BridgeError::Spawn)?;

        // Dropping the `wait_with_output` future on timeout drops the child,
        // and `kill_on_drop` terminates it.
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| BridgeError::Timeout(self.timeout))?
            .map_err(BridgeError::Spawn)?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let combined = combined.trim().to_string();

        debug!(
            elapsed_ms = started.elapsed().as_millis(),
            status = %output.status,
            "Task bridge finished"
        );

        if !output.status.success() {
            error!(status = %output.status, output = %combined, "Task bridge exited with failure");
            return Err(BridgeError::Exited {
                status: output.status.to_string(),
                output: combined,
            });
        }

        if classify_output(&combined) {
            Ok(combined)
        } else {
            Err(BridgeError::Rejected(combined))
        }
    }
}

/// Decide whether bridge output means "task created".
///
/// Success when the last non-empty line is one of the success tokens
/// (case-insensitive), or, as a fallback, when any line contains one.
#[must_use]
pub fn classify_output(output: &str) -> bool {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return false;
    }

    let lines: Vec<String> = trimmed
        .lines()
        .map(|l| l.trim().to_ascii_lowercase())
        .filter(|l| !l.is_empty())
        .collect();

    if let Some(last) = lines.last() {
        if SUCCESS_TOKENS.contains(&last.as_str()) {
            return true;
        }
    }

    lines
        .iter()
        .any(|line| SUCCESS_TOKENS.iter().any(|token| line.contains(token)))
}
