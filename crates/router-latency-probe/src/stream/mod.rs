pub mod filter;
pub mod supply;
pub mod websocket;

pub use filter::RouterFilter;
pub use supply::FilteredSupply;
pub use websocket::WebsocketSupplier;

use crate::{Result, event::Envelope};
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Unordered event sequence. An `Err` item or the end of the stream means the
/// subscription is gone and must be re-acquired with a fresh token.
pub type EventStream = BoxStream<'static, Result<Envelope>>;

#[async_trait]
pub trait EventSupplier: Send + Sync {
    async fn subscribe(&self, token: &str, app_guid: &str) -> Result<EventStream>;
}
