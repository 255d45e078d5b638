use std::sync::Arc;
use std::time::Duration;

use strum::{Display, EnumString};
use tracing::{error, info, warn};

use super::bounded;
use super::engine::{InstrumentationEngine, MessageHandler};
use super::locator::ProcessLocator;
use crate::config::{OffsetConfig, ScriptTemplate};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum SessionState {
    Attaching,
    Active,
    Detaching,
    Detached,
    Failed,
}

/// One target process with the script loaded.
pub struct TargetSession<E: InstrumentationEngine> {
    pid: u32,
    state: SessionState,
    session: E::Session,
    script: E::Script,
}

impl<E: InstrumentationEngine> TargetSession<E> {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn state(&self) -> SessionState {
        self.state
    }
}

#[derive(Debug)]
pub struct TargetFailure {
    pub pid: u32,
    /// `Failed` for attach errors, `Detaching` for teardown errors
    pub state: SessionState,
    pub error: Error,
}

#[derive(Debug, Default)]
pub struct AttachReport {
    pub attached: Vec<u32>,
    pub failures: Vec<TargetFailure>,
}

#[derive(Debug, Default)]
pub struct DetachReport {
    pub detached: Vec<u32>,
    pub failures: Vec<TargetFailure>,
}

impl DetachReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Attaches the rendered script to every target and detaches on shutdown.
///
/// The session list is the only record of what is attached.
pub struct Orchestrator<E: InstrumentationEngine> {
    engine: E,
    locator: Box<dyn ProcessLocator>,
    template: ScriptTemplate,
    step_timeout: Duration,
    sessions: Vec<TargetSession<E>>,
}

impl<E: InstrumentationEngine> Orchestrator<E> {
    pub fn new(
        engine: E,
        locator: Box<dyn ProcessLocator>,
        template: ScriptTemplate,
        step_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            locator,
            template,
            step_timeout,
            sessions: Vec::new(),
        }
    }

    pub fn sessions(&self) -> &[TargetSession<E>] {
        &self.sessions
    }

    /// Attach to every discovered target.
    ///
    /// Individual failures are logged and reported; only zero targets or
    /// zero successful attaches fail the whole call.
    pub async fn start(&mut self, config: &OffsetConfig) -> Result<AttachReport> {
        let pids = self.locator.find_pids().await?;
        if pids.is_empty() {
            return Err(Error::NoTargets("process lookup returned nothing".to_string()));
        }

        let source = self.template.render(config)?;
        let mut report = AttachReport::default();

        for pid in pids.iter().copied() {
            info!("Attaching to PID {}", pid);
            match self.attach_one(pid, &source).await {
                Ok(session) => {
                    info!("Script loaded into PID {}", pid);
                    report.attached.push(pid);
                    self.sessions.push(session);
                }
                Err(failure) => {
                    error!("PID {}: {}", pid, failure.error);
                    report.failures.push(failure);
                }
            }
        }

        if report.attached.is_empty() {
            return Err(Error::NoAttachableTargets(pids.len()));
        }
        info!(
            "Attached to {} of {} target processes",
            report.attached.len(),
            pids.len()
        );
        Ok(report)
    }

    async fn attach_one(
        &self,
        pid: u32,
        source: &str,
    ) -> std::result::Result<TargetSession<E>, TargetFailure> {
        let timeout = self.step_timeout;
        let failed = |error| TargetFailure {
            pid,
            state: SessionState::Failed,
            error,
        };

        let mut session = bounded(
            timeout,
            || format!("attach PID {}", pid),
            self.engine.attach(pid),
        )
        .await
        .map_err(failed)?;

        let on_message: MessageHandler = Arc::new(move |message: &str| {
            info!("[PID {}] {}", pid, message);
        });

        let script = match bounded(
            timeout,
            || format!("create script for PID {}", pid),
            self.engine.create_script(&mut session, source, on_message),
        )
        .await
        {
            Ok(mut script) => {
                let loaded = bounded(
                    timeout,
                    || format!("load script into PID {}", pid),
                    self.engine.load_script(&mut script),
                )
                .await;
                loaded.map(|()| script)
            }
            Err(e) => Err(e),
        };

        match script {
            Ok(script) => Ok(TargetSession {
                pid,
                state: SessionState::Active,
                session,
                script,
            }),
            Err(e) => {
                // Attached but unusable: let go of the process.
                let detach = bounded(
                    timeout,
                    || format!("detach PID {}", pid),
                    self.engine.detach(&mut session),
                )
                .await;
                if let Err(detach_err) = detach {
                    warn!("PID {}: detach after failed load: {}", pid, detach_err);
                }
                Err(failed(e))
            }
        }
    }

    /// Unload and detach every session. The list is empty afterwards no
    /// matter what fails.
    pub async fn shutdown(&mut self) -> DetachReport {
        let sessions = std::mem::take(&mut self.sessions);
        let mut report = DetachReport::default();
        let timeout = self.step_timeout;

        for mut target in sessions {
            let pid = target.pid;
            target.state = SessionState::Detaching;
            info!("Detaching from PID {}", pid);

            let mut clean = true;
            if let Err(e) = bounded(
                timeout,
                || format!("unload script from PID {}", pid),
                self.engine.unload_script(&mut target.script),
            )
            .await
            {
                error!("PID {}: {}", pid, e);
                clean = false;
                report.failures.push(TargetFailure {
                    pid,
                    state: target.state,
                    error: e,
                });
            }

            if let Err(e) = bounded(
                timeout,
                || format!("detach PID {}", pid),
                self.engine.detach(&mut target.session),
            )
            .await
            {
                error!("PID {}: {}", pid, e);
                clean = false;
                report.failures.push(TargetFailure {
                    pid,
                    state: target.state,
                    error: e,
                });
            }

            target.state = SessionState::Detached;
            if clean {
                report.detached.push(pid);
            }
        }
        report
    }
}
