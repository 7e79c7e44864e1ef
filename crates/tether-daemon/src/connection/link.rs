use async_trait::async_trait;
use tether_types::TetherResult;

/// The remote side the agent keeps a session with.
#[async_trait]
pub trait ControlPlaneLink: Send + Sync + 'static {
    async fn connect(&self) -> TetherResult<()>;

    async fn disconnect(&self) -> TetherResult<()>;

    /// Runs after every successful (re)connect, before workers restart.
    async fn on_connected(&self) -> TetherResult<()> {
        Ok(())
    }
}
