//! WebUI process bootstrapper
//!
//! Spawns the WebUI when the worker is responsible for starting it. The
//! child's stdout and stderr are forwarded line by line to the `webui` log
//! target, and the process is killed when the handle is dropped.

use crate::core::config::LaunchConfig;
use anyhow::{Context, Result};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{info, warn};

/// Handle to a spawned WebUI process
#[derive(Debug)]
pub struct WebUiProcess {
    child: Child,
}

impl WebUiProcess {
    /// Spawn the configured command
    ///
    /// # Errors
    ///
    /// Returns error if the command cannot be started.
    pub fn spawn(config: &LaunchConfig) -> Result<Self> {
        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &config.working_dir {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to start WebUI command '{}'", config.command))?;

        info!(
            "Started WebUI process (pid {}): {} {}",
            child.id().unwrap_or_default(),
            config.command,
            config.args.join(" ")
        );

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, false));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, true));
        }

        Ok(Self { child })
    }

    /// Exit status if the process has already terminated
    pub fn try_exit_status(&mut self) -> Result<Option<ExitStatus>> {
        self.child
            .try_wait()
            .context("Failed to query WebUI process status")
    }

    /// Kill the process and wait for it to exit
    pub async fn shutdown(&mut self) {
        if let Ok(Some(_)) = self.child.try_wait() {
            return;
        }
        if let Err(e) = self.child.kill().await {
            warn!("Failed to stop WebUI process: {}", e);
        } else {
            info!("WebUI process stopped");
        }
    }
}

async fn forward_lines<R>(reader: R, is_stderr: bool)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if is_stderr {
                    warn!(target: "webui", "{}", line);
                } else {
                    info!(target: "webui", "{}", line);
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Stopped reading WebUI output: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn launch(command: &str, args: &[&str]) -> LaunchConfig {
        LaunchConfig {
            enabled: true,
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            ..LaunchConfig::default()
        }
    }

    #[tokio::test]
    async fn test_missing_command_fails() {
        let result = WebUiProcess::spawn(&launch("definitely-not-a-webui-binary", &[]));
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reports_exit() {
        let mut process = WebUiProcess::spawn(&launch("sh", &["-c", "echo starting; exit 3"])).unwrap();

        let mut status = None;
        for _ in 0..100 {
            status = process.try_exit_status().unwrap();
            if status.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(status.and_then(|s| s.code()), Some(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shutdown_kills_running_process() {
        let mut process = WebUiProcess::spawn(&launch("sleep", &["30"])).unwrap();
        assert!(process.try_exit_status().unwrap().is_none());
        process.shutdown().await;
        assert!(process.try_exit_status().unwrap().is_some());
    }
}
