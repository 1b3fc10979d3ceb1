//! Capability handler backed by an external command.
//!
//! The command receives the context bundle as JSON on stdin and must print a
//! handler response as its last JSON line on stdout. A non-zero exit status
//! or an unparseable reply is reported as an error, which the orchestrator
//! classifies as a technical blocker.

use super::{HandlerResponse, SkillHandler};
use crate::context::ContextBundle;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Runs a program per delegation.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    program: String,
    args: Vec<String>,
    working_dir: PathBuf,
}

impl CommandHandler {
    /// Create a handler running `program args...` in `working_dir`.
    pub fn new(program: &str, args: Vec<String>, working_dir: PathBuf) -> Self {
        Self {
            program: program.to_string(),
            args,
            working_dir,
        }
    }

    /// Command line shown in logs.
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

#[async_trait]
impl SkillHandler for CommandHandler {
    async fn execute(&self, bundle: &ContextBundle) -> Result<HandlerResponse> {
        let payload =
            serde_json::to_vec(bundle).context("Failed to serialize context bundle")?;

        tracing::debug!(
            command = %self.display(),
            task = %bundle.task.id,
            bytes = payload.len(),
            "Spawning capability handler"
        );

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("PLANNER_TASK_ID", &bundle.task.id)
            .env("PLANNER_CAPABILITY", &bundle.capability)
            .env("PLANNER_PHASE", bundle.phase.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .current_dir(&self.working_dir)
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn handler '{}'", self.display()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .await
                .context("Failed to write context bundle to handler stdin")?;
            stdin.shutdown().await.context("Failed to close handler stdin")?;
        }

        let output = child
            .wait_with_output()
            .await
            .context("Failed to wait for handler")?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "handler '{}' exited with {}: {}",
                self.display(),
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
        }

        HandlerResponse::parse(&stdout)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::dag::Task;
    use crate::phase::ProjectPhase;
    use tempfile::tempdir;

    fn bundle() -> ContextBundle {
        ContextBundle {
            task: Task::new("a", "Task A", "x", vec![]),
            capability: "x".into(),
            upstream: vec![],
            decisions: Default::default(),
            phase: ProjectPhase::Building,
            phase_context: String::new(),
        }
    }

    fn sh(script: &str, dir: PathBuf) -> CommandHandler {
        CommandHandler::new("sh", vec!["-c".into(), script.into()], dir)
    }

    #[tokio::test]
    async fn test_command_reply_is_parsed() {
        let dir = tempdir().unwrap();
        let handler = sh(
            r#"cat > /dev/null; echo working; echo '{"status":"completed","outputs":["o1"]}'"#,
            dir.path().to_path_buf(),
        );

        let response = handler.execute(&bundle()).await.unwrap();
        assert_eq!(response, HandlerResponse::completed(["o1"]));
    }

    #[tokio::test]
    async fn test_command_receives_bundle_on_stdin() {
        let dir = tempdir().unwrap();
        let handler = sh(
            r#"grep -q '"id":"a"' && echo '{"status":"completed","outputs":["seen"]}'"#,
            dir.path().to_path_buf(),
        );

        let response = handler.execute(&bundle()).await.unwrap();
        assert_eq!(response, HandlerResponse::completed(["seen"]));
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_an_error() {
        let dir = tempdir().unwrap();
        let handler = sh("cat > /dev/null; echo boom >&2; exit 3", dir.path().to_path_buf());

        let err = handler.execute(&bundle()).await.unwrap_err().to_string();
        assert!(err.contains("exited with 3"));
        assert!(err.contains("boom"));
    }

    #[tokio::test]
    async fn test_missing_program_is_an_error() {
        let dir = tempdir().unwrap();
        let handler = CommandHandler::new(
            "definitely-not-a-planner-handler",
            vec![],
            dir.path().to_path_buf(),
        );
        assert!(handler.execute(&bundle()).await.is_err());
    }
}
