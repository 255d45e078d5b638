//! # devbridge-core
//!
//! Core library for the devtools bridge.
//!
//! This crate provides:
//! - Offset config loading, per-architecture resolution and validation
//! - The instrumentation script template
//! - Process discovery and script attach/detach through an instrumentation engine
//! - The WebSocket bridge between the instrumented runtime and a CDP inspector
//! - The controller that ties startup and shutdown together

pub mod bridge;
pub mod codec;
pub mod config;
pub mod controller;
pub mod error;
pub mod session;
pub mod shutdown;

pub use bridge::{Bridge, BridgeConfig, DEBUG_PORT, DEFAULT_CDP_PORT};
pub use codec::{Category, DebugEnvelope, PayloadCodec, ProtobufCodec};
pub use config::{
    Arch, DEFAULT_APP_VERSION, OffsetConfig, ScriptTemplate, config_path_for_version,
    load_offset_config,
};
pub use controller::{Controller, ControllerConfig, DEFAULT_STEP_TIMEOUT, Phase, ShutdownReport};
pub use error::{Error, Result};
pub use session::{
    AttachReport, DetachReport, FixedTargets, FridaCli, InstrumentationEngine, Orchestrator,
    PgrepLocator, ProcessLocator, SessionState, probe_app_version,
};
pub use shutdown::ShutdownSignal;
