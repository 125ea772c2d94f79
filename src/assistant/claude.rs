use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use super::{Assistant, DISALLOWED_TOOLS, DevelopmentRequest, SessionOutcome, development_prompt, reports_budget_exhausted};
use crate::errors::AssistantError;

/// The `claude` CLI driven in `--print` mode with the prompt on stdin.
#[derive(Debug, Clone)]
pub struct ClaudeCli {
    cmd: String,
    model: String,
    session_timeout: Duration,
    prompt_timeout: Duration,
}

/// Output of one process run.
struct RunOutput {
    stdout: String,
    timed_out: bool,
}

impl ClaudeCli {
    pub fn new(cmd: &str, model: &str, session_timeout: Duration, prompt_timeout: Duration) -> Self {
        Self {
            cmd: cmd.to_string(),
            model: model.to_string(),
            session_timeout,
            prompt_timeout,
        }
    }

    fn base_command(&self, working_dir: Option<&Path>) -> Command {
        let mut cmd = Command::new(&self.cmd);
        cmd.arg("--print");
        if self.model != "default" {
            cmd.arg("--model").arg(&self.model);
        }
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Spawn, feed the prompt, and wait under a timeout.
    ///
    /// On timeout the child is killed (dropping it does so) and whatever the
    /// workspace holds is left for the caller to salvage.
    async fn run(&self, mut cmd: Command, prompt: &str, limit: Duration) -> Result<RunOutput, AssistantError> {
        let mut child = cmd.spawn().map_err(AssistantError::Spawn)?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(prompt.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(output) => {
                let output = output?;
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                if !output.status.success() {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    // Usage-limit failures are reported, not raised.
                    if reports_budget_exhausted(&stdout) || reports_budget_exhausted(&stderr) {
                        return Ok(RunOutput {
                            stdout: format!("{}\n{}", stdout, stderr),
                            timed_out: false,
                        });
                    }
                    debug!(stderr = %stderr.trim(), "assistant stderr");
                    return Err(AssistantError::NonZeroExit {
                        code: output.status.code().unwrap_or(-1),
                    });
                }
                Ok(RunOutput {
                    stdout,
                    timed_out: false,
                })
            }
            Err(_) => Ok(RunOutput {
                stdout: String::new(),
                timed_out: true,
            }),
        }
    }
}

#[async_trait]
impl Assistant for ClaudeCli {
    fn model_id(&self) -> &str {
        &self.model
    }

    #[instrument(skip_all, fields(work_item = request.work_item.id, fix = request.is_fix()))]
    async fn develop(&self, request: &DevelopmentRequest) -> Result<SessionOutcome, AssistantError> {
        let mut cmd = self.base_command(Some(&request.workspace));
        cmd.arg("--dangerously-skip-permissions");
        cmd.arg("--disallowedTools").arg(DISALLOWED_TOOLS.join(","));

        info!("Starting development session");
        let run = self.run(cmd, &development_prompt(request), self.session_timeout).await?;
        if run.timed_out {
            warn!(
                secs = self.session_timeout.as_secs(),
                "Development session timed out; child killed"
            );
        }
        Ok(SessionOutcome {
            completed: !run.timed_out,
            budget_exhausted: reports_budget_exhausted(&run.stdout),
            output: run.stdout,
        })
    }

    #[instrument(skip_all)]
    async fn complete(&self, prompt: &str) -> Result<String, AssistantError> {
        let run = self.run(self.base_command(None), prompt, self.prompt_timeout).await?;
        if run.timed_out {
            return Err(AssistantError::Timeout {
                secs: self.prompt_timeout.as_secs(),
            });
        }
        if run.stdout.trim().is_empty() {
            return Err(AssistantError::EmptyResponse);
        }
        Ok(run.stdout)
    }
}
