//! Account-WebSocket pool: frames, the halted gate, socket instances, and
//! the subscription router.

pub mod frame;
pub mod gate;
pub mod instance;
pub mod router;

pub use frame::{InboundFrame, RequestFrame, WsResponse};
pub use gate::HaltedGate;
pub use instance::AccountSocket;
pub use router::SubscriptionRouter;

use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;

/// An async callback invoked with the parsed content of each event frame
/// delivered for a subscription.
pub type SubscriptionHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, ()> + Send + Sync>;
