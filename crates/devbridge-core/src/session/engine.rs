use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

/// Callback receiving every message a loaded script emits.
pub type MessageHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Something that can inject a script into a running process.
#[async_trait]
pub trait InstrumentationEngine: Send + Sync {
    type Session: Send;
    type Script: Send;

    async fn attach(&self, pid: u32) -> Result<Self::Session>;

    async fn create_script(
        &self,
        session: &mut Self::Session,
        source: &str,
        on_message: MessageHandler,
    ) -> Result<Self::Script>;

    async fn load_script(&self, script: &mut Self::Script) -> Result<()>;

    async fn unload_script(&self, script: &mut Self::Script) -> Result<()>;

    async fn detach(&self, session: &mut Self::Session) -> Result<()>;
}
