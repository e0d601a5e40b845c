//! Session engine for the fleet ops console.
//!
//! Owns the single hub connection and everything that survives its
//! interruptions: the command outbox, the reconciled device entity table,
//! and the persisted optimistic-removal cache. Rendering stays behind the
//! [`reconciler::Renderer`] trait.

pub mod cache;
pub mod reconciler;
pub mod session;
pub mod transport;

pub use cache::{QueueCache, QueueCacheEntry};
pub use reconciler::{Ingest, Reconciler, Renderer};
pub use session::{AlwaysConfirm, ConfirmGate, Dispatch, Intent, Session};
pub use transport::{
    Connection, ConnectionState, ReconnectPolicy, Transport, TransportManager, WsTransport,
};
