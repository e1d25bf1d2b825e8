//! In-process publish/subscribe bus.
//!
//! Producers post typed payloads without knowing who consumes them. Consumers
//! register handlers (async callbacks) or delivery queues (`mpsc` senders)
//! against a payload type. A single dispatch loop dequeues posted payloads in
//! order and fans each one out to everything registered for its type.
//!
//! ```ignore
//! let bus = Bus::new();
//! bus.add_handlers("ping", [handler_fn(|p| async move {
//!     tracing::info!(n = ?p.data().get("n"), "pong");
//!     Ok(())
//! })])?;
//! bus.post_and_wait(SimplePayload::new("ping").with("n", 1).shared()).await?;
//! ```

pub mod bus;
pub mod config;
mod dispatch;
pub mod error;
pub mod handler;
pub mod payload;
mod registry;
mod rider;

pub use bus::Bus;
pub use config::BusConfig;
pub use error::{BusError, Result};
pub use handler::{handler_fn, BoxedHandler, Handler};
pub use payload::{DataBag, Payload, SharedPayload, SimplePayload};
pub use registry::DeliveryQueue;
pub use rider::Mode;
