//! Engine backed by the `frida` command line tool.
//!
//! Each loaded script is one `frida -p <pid> -l <file> -q -t inf` child. The
//! script stays injected for as long as the child runs.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::engine::{InstrumentationEngine, MessageHandler};
use crate::error::{Error, Result};

pub const DEFAULT_FRIDA_PROGRAM: &str = "frida";

/// How long a freshly spawned child must survive to count as loaded.
pub const DEFAULT_STARTUP_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct FridaCli {
    program: PathBuf,
    startup_grace: Duration,
}

impl FridaCli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            startup_grace: DEFAULT_STARTUP_GRACE,
        }
    }

    pub fn with_startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace = grace;
        self
    }

    /// Shrink the startup grace to half of `step_timeout` so that a load
    /// bounded by that timeout can still succeed.
    pub fn fit_to_step_timeout(mut self, step_timeout: Duration) -> Self {
        self.startup_grace = self.startup_grace.min(step_timeout / 2);
        self
    }

    pub fn startup_grace(&self) -> Duration {
        self.startup_grace
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Default for FridaCli {
    fn default() -> Self {
        Self::new(DEFAULT_FRIDA_PROGRAM)
    }
}

pub struct FridaSession {
    pid: u32,
    script_file: Option<NamedTempFile>,
}

impl FridaSession {
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

pub struct FridaScript {
    pid: u32,
    path: PathBuf,
    on_message: MessageHandler,
    child: Option<Child>,
    forwarders: Vec<JoinHandle<()>>,
}

impl FridaScript {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }
}

/// Send `signal` to `pid` with `kill`. `false` means no such process.
async fn send_signal(pid: u32, signal: &str) -> std::io::Result<bool> {
    let output = Command::new("kill")
        .arg(format!("-{}", signal))
        .arg(pid.to_string())
        .output()
        .await?;
    Ok(output.status.success())
}

fn forward_lines<R>(reader: R, on_message: MessageHandler) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            on_message(&line);
        }
    })
}

#[async_trait]
impl InstrumentationEngine for FridaCli {
    type Session = FridaSession;
    type Script = FridaScript;

    async fn attach(&self, pid: u32) -> Result<FridaSession> {
        let alive = send_signal(pid, "0").await.map_err(|e| Error::Attach {
            pid,
            message: e.to_string(),
        })?;
        if !alive {
            return Err(Error::Attach {
                pid,
                message: "process is not running".to_string(),
            });
        }
        Ok(FridaSession {
            pid,
            script_file: None,
        })
    }

    async fn create_script(
        &self,
        session: &mut FridaSession,
        source: &str,
        on_message: MessageHandler,
    ) -> Result<FridaScript> {
        let mut file = tempfile::Builder::new()
            .prefix("devbridge-")
            .suffix(".js")
            .tempfile()?;
        file.write_all(source.as_bytes())?;
        file.flush()?;

        let path = file.path().to_path_buf();
        debug!("PID {}: script written to {}", session.pid, path.display());
        session.script_file = Some(file);

        Ok(FridaScript {
            pid: session.pid,
            path,
            on_message,
            child: None,
            forwarders: Vec::new(),
        })
    }

    async fn load_script(&self, script: &mut FridaScript) -> Result<()> {
        let pid = script.pid;
        let load_error = |message: String| Error::ScriptLoad { pid, message };

        let mut child = Command::new(&self.program)
            .arg("-p")
            .arg(pid.to_string())
            .arg("-l")
            .arg(&script.path)
            .args(["-q", "-t", "inf"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                load_error(format!(
                    "failed to start {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        if let Some(stdout) = child.stdout.take() {
            script
                .forwarders
                .push(forward_lines(stdout, script.on_message.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            script
                .forwarders
                .push(forward_lines(stderr, script.on_message.clone()));
        }

        match tokio::time::timeout(self.startup_grace, child.wait()).await {
            Ok(Ok(status)) => Err(load_error(format!("frida exited early ({})", status))),
            Ok(Err(e)) => Err(load_error(e.to_string())),
            Err(_) => {
                script.child = Some(child);
                Ok(())
            }
        }
    }

    async fn unload_script(&self, script: &mut FridaScript) -> Result<()> {
        for task in script.forwarders.drain(..) {
            task.abort();
        }
        let Some(mut child) = script.child.take() else {
            return Ok(());
        };
        let pid = script.pid;

        // SIGTERM lets frida remove its hooks before exiting.
        if let Some(child_pid) = child.id() {
            if let Err(e) = send_signal(child_pid, "TERM").await {
                warn!("PID {}: failed to signal frida: {}", pid, e);
            }
        }
        match tokio::time::timeout(self.startup_grace, child.wait()).await {
            Ok(Ok(status)) => {
                debug!("PID {}: frida exited ({})", pid, status);
                Ok(())
            }
            Ok(Err(e)) => Err(Error::ScriptUnload {
                pid,
                message: e.to_string(),
            }),
            Err(_) => child.kill().await.map_err(|e| Error::ScriptUnload {
                pid,
                message: format!("frida did not exit: {}", e),
            }),
        }
    }

    async fn detach(&self, session: &mut FridaSession) -> Result<()> {
        if let Some(file) = session.script_file.take() {
            file.close().map_err(|e| Error::Detach {
                pid: session.pid,
                message: format!("failed to remove script file: {}", e),
            })?;
        }
        Ok(())
    }
}
