//! Owns the bridge and the attached sessions for one run.

use std::sync::Arc;
use std::time::Duration;

use strum::Display;
use tracing::{error, info, warn};

use crate::bridge::{Bridge, BridgeConfig};
use crate::codec::PayloadCodec;
use crate::config::OffsetConfig;
use crate::error::{Error, Result};
use crate::session::{AttachReport, DetachReport, InstrumentationEngine, Orchestrator};

/// Default bound for each attach and teardown step.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    pub bridge: BridgeConfig,
    pub step_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            bridge: BridgeConfig::default(),
            step_timeout: DEFAULT_STEP_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Phase {
    Idle,
    Running,
    ShuttingDown,
    Stopped,
}

#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub detach: DetachReport,
    pub endpoint_failures: Vec<String>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.detach.is_clean() && self.endpoint_failures.is_empty()
    }
}

pub struct Controller<E: InstrumentationEngine> {
    config: ControllerConfig,
    codec: Arc<dyn PayloadCodec>,
    orchestrator: Orchestrator<E>,
    bridge: Option<Bridge>,
    phase: Phase,
}

impl<E: InstrumentationEngine> Controller<E> {
    pub fn new(
        config: ControllerConfig,
        codec: Arc<dyn PayloadCodec>,
        orchestrator: Orchestrator<E>,
    ) -> Self {
        Self {
            config,
            codec,
            orchestrator,
            bridge: None,
            phase: Phase::Idle,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn bridge(&self) -> Option<&Bridge> {
        self.bridge.as_ref()
    }

    pub fn orchestrator(&self) -> &Orchestrator<E> {
        &self.orchestrator
    }

    /// Bring up both endpoints, then attach to the targets.
    ///
    /// On failure anything already started is torn down again and the
    /// controller ends up stopped.
    pub async fn start(&mut self, offsets: &OffsetConfig) -> Result<AttachReport> {
        if self.phase != Phase::Idle {
            return Err(Error::NotIdle(self.phase.to_string()));
        }

        let bridge = match Bridge::bind(&self.config.bridge, self.codec.clone()).await {
            Ok(bridge) => bridge,
            Err(e) => {
                self.phase = Phase::Stopped;
                return Err(e);
            }
        };
        self.bridge = Some(bridge);

        match self.orchestrator.start(offsets).await {
            Ok(report) => {
                self.phase = Phase::Running;
                Ok(report)
            }
            Err(e) => {
                warn!("Startup failed, closing endpoints");
                self.shutdown().await;
                Err(e)
            }
        }
    }

    /// Tear everything down. Only the first call does anything; later
    /// calls return `None`.
    ///
    /// Order: drop client connections, detach every session, then close
    /// both endpoints.
    pub async fn shutdown(&mut self) -> Option<ShutdownReport> {
        if matches!(self.phase, Phase::ShuttingDown | Phase::Stopped) {
            return None;
        }
        self.phase = Phase::ShuttingDown;
        info!("Shutting down...");

        if let Some(bridge) = &self.bridge {
            let terminated = bridge.terminate_connections();
            info!("Terminated {} client connections", terminated);
        }

        let detach = self.orchestrator.shutdown().await;
        info!(
            "Detached from {} target processes ({} failures)",
            detach.detached.len(),
            detach.failures.len()
        );

        let mut endpoint_failures = Vec::new();
        if let Some(bridge) = &mut self.bridge {
            for e in bridge.close(self.config.step_timeout).await {
                endpoint_failures.push(e.to_string());
            }
        }

        let report = ShutdownReport {
            detach,
            endpoint_failures,
        };
        if report.is_clean() {
            info!("Shutdown complete");
        } else {
            error!("Shutdown finished with errors");
        }
        self.phase = Phase::Stopped;
        Some(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ProtobufCodec;
    use crate::config::ScriptTemplate;
    use crate::session::FixedTargets;
    use crate::session::mock::{MockEngine, sample_config};
    use std::collections::HashSet;
    use std::net::{Ipv4Addr, SocketAddr};

    fn controller(engine: MockEngine, pids: Vec<u32>) -> Controller<MockEngine> {
        let config = ControllerConfig {
            bridge: BridgeConfig {
                debug_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
                inspector_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            },
            step_timeout: Duration::from_millis(200),
        };
        let orchestrator = Orchestrator::new(
            engine,
            Box::new(FixedTargets::new(pids, None)),
            ScriptTemplate::builtin(),
            config.step_timeout,
        );
        Controller::new(config, Arc::new(ProtobufCodec), orchestrator)
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let mut controller = controller(MockEngine::default(), vec![1, 2]);
        let report = controller.start(&sample_config()).await.unwrap();
        assert_eq!(report.attached, vec![1, 2]);
        assert_eq!(controller.phase(), Phase::Running);
        assert!(!controller.bridge().unwrap().is_closed());

        let report = controller.shutdown().await.unwrap();
        assert!(report.is_clean());
        assert_eq!(report.detach.detached, vec![1, 2]);
        assert!(controller.orchestrator().sessions().is_empty());
        assert!(controller.bridge().unwrap().is_closed());
        assert_eq!(controller.phase(), Phase::Stopped);
    }

    #[tokio::test]
    async fn test_shutdown_runs_once() {
        let mut controller = controller(MockEngine::default(), vec![1]);
        controller.start(&sample_config()).await.unwrap();

        assert!(controller.shutdown().await.is_some());
        assert!(controller.shutdown().await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_with_detach_failures() {
        let engine = MockEngine {
            fail_detach: HashSet::from([2]),
            ..Default::default()
        };
        let mut controller = controller(engine, vec![1, 2]);
        controller.start(&sample_config()).await.unwrap();

        let report = controller.shutdown().await.unwrap();
        assert!(!report.is_clean());
        assert_eq!(report.detach.failures.len(), 1);
        assert!(report.endpoint_failures.is_empty());
        assert!(controller.orchestrator().sessions().is_empty());
        assert!(controller.bridge().unwrap().is_closed());
    }

    #[tokio::test]
    async fn test_failed_start_closes_endpoints() {
        let engine = MockEngine {
            fail_attach: HashSet::from([1]),
            ..Default::default()
        };
        let mut controller = controller(engine, vec![1]);

        let err = controller.start(&sample_config()).await.unwrap_err();
        assert!(matches!(err, Error::NoAttachableTargets(1)));
        assert_eq!(controller.phase(), Phase::Stopped);
        assert!(controller.bridge().unwrap().is_closed());
        assert!(controller.shutdown().await.is_none());
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let mut controller = controller(MockEngine::default(), vec![1]);
        controller.start(&sample_config()).await.unwrap();
        let err = controller.start(&sample_config()).await.unwrap_err();
        assert!(matches!(err, Error::NotIdle(_)));
        controller.shutdown().await;
    }
}
