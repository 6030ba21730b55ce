//! # InvokeLens Core
//!
//! The event model shared by every InvokeLens crate: [`Event`] and its
//! builder, [`Span`] trees, prompt fingerprints, and the error enums.
//!
//! Delivery backends implement [`Transport`], which lives here so the
//! queue and scheduler in `invokelens` never depend on `reqwest` or a bus
//! client directly. Tests swap in an in-memory transport.

pub mod error;
pub mod event;
pub mod prompt;
pub mod span;
pub mod transport;

pub use error::{DeliveryError, Error, EventError, Result};
pub use event::{Batch, Event, EventBuilder, EventType, Status};
pub use prompt::PromptFingerprint;
pub use span::{Span, SpanKind, SpanStatus};
pub use transport::{DeliveryOutcome, Transport};
