//! Webhook Ingestion
//!
//! Handshake verification, signed event delivery, payload extraction, and
//! the asynchronous event routing pipeline.

pub mod handlers;
pub mod payload;
pub mod router;
pub mod verify;
pub mod worker;

pub use router::EventRouter;
pub use verify::VerificationError;
