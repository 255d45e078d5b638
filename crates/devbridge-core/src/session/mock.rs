//! Recording engine for orchestrator and controller tests.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

use super::engine::{InstrumentationEngine, MessageHandler};
use crate::config::OffsetConfig;
use crate::error::{Error, Result};

/// Engine that records every call and fails on request.
#[derive(Default)]
pub(crate) struct MockEngine {
    pub fail_attach: HashSet<u32>,
    pub fail_load: HashSet<u32>,
    pub fail_unload: HashSet<u32>,
    pub fail_detach: HashSet<u32>,
    pub hang_detach: HashSet<u32>,
    pub calls: Mutex<Vec<String>>,
    pub sources: Mutex<Vec<String>>,
}

impl MockEngine {
    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

pub(crate) struct MockHandle(u32);

#[async_trait]
impl InstrumentationEngine for MockEngine {
    type Session = MockHandle;
    type Script = MockHandle;

    async fn attach(&self, pid: u32) -> Result<MockHandle> {
        self.record(format!("attach {}", pid));
        if self.fail_attach.contains(&pid) {
            return Err(Error::Attach {
                pid,
                message: "process not found".to_string(),
            });
        }
        Ok(MockHandle(pid))
    }

    async fn create_script(
        &self,
        session: &mut MockHandle,
        source: &str,
        on_message: MessageHandler,
    ) -> Result<MockHandle> {
        self.sources.lock().unwrap().push(source.to_string());
        on_message("created");
        Ok(MockHandle(session.0))
    }

    async fn load_script(&self, script: &mut MockHandle) -> Result<()> {
        self.record(format!("load {}", script.0));
        if self.fail_load.contains(&script.0) {
            return Err(Error::ScriptLoad {
                pid: script.0,
                message: "bad script".to_string(),
            });
        }
        Ok(())
    }

    async fn unload_script(&self, script: &mut MockHandle) -> Result<()> {
        self.record(format!("unload {}", script.0));
        if self.fail_unload.contains(&script.0) {
            return Err(Error::ScriptUnload {
                pid: script.0,
                message: "gone".to_string(),
            });
        }
        Ok(())
    }

    async fn detach(&self, session: &mut MockHandle) -> Result<()> {
        self.record(format!("detach {}", session.0));
        if self.hang_detach.contains(&session.0) {
            std::future::pending::<()>().await;
        }
        if self.fail_detach.contains(&session.0) {
            return Err(Error::Detach {
                pid: session.0,
                message: "gone".to_string(),
            });
        }
        Ok(())
    }
}

pub(crate) fn sample_config() -> OffsetConfig {
    OffsetConfig {
        version: Some(17078),
        load_start_hook_offset: 0x1,
        load_start_hook_offset2: 0x2,
        cdp_filter_hook_offset: 0x3,
        resource_cache_policy_hook_offset: 0x4,
        struct_offset: 10,
        source_arch: Some("arm64".to_string()),
    }
}
