pub mod meter;
pub mod ups;

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;

use crate::error::HomefluxResult;

pub use meter::{Aggregate, MeterAgent, ReadKind, UtilityApi};
pub use ups::{UpsAgent, UpsTransport};

/// A source-specific collector producing normalized readings from one
/// external system.
///
/// State machine: Disconnected -> `connect` -> Connected -> `disconnect`
/// -> Disconnected. Calling `connect` while connected tears down the old
/// session first; calling `disconnect` while disconnected is a logged
/// no-op. Fetch operations attempted while disconnected fail fast with
/// [`HomefluxError::NotConnected`](crate::error::HomefluxError).
#[async_trait]
pub trait SourceAgent: Send {
    /// Name used in logs and error context.
    fn name(&self) -> &str;

    fn is_connected(&self) -> bool;

    async fn connect(&mut self) -> HomefluxResult<()>;

    async fn disconnect(&mut self);
}

/// Connect the agent, run `op`, and disconnect on every exit path,
/// including when `op` fails.
pub async fn with_connection<A, T, F>(agent: &mut A, op: F) -> HomefluxResult<T>
where
    A: SourceAgent,
    F: for<'a> FnOnce(&'a mut A) -> Pin<Box<dyn Future<Output = HomefluxResult<T>> + Send + 'a>>,
{
    agent.connect().await?;
    let result = op(agent).await;
    agent.disconnect().await;
    result
}
