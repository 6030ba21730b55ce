//! Cost estimation, response detection, span tracing and prompt
//! fingerprinting for InvokeLens events.
//!
//! Everything here is synchronous and side-effect free apart from the
//! span collector's interior mutability; the delivery pipeline lives in
//! the `invokelens` crate.

pub mod detect;
pub mod fingerprint;
pub mod pricing;
pub mod trace;

pub use detect::{
    AgentTraceDetector, ConverseDetector, Detected, DetectorChain, InvokeModelDetector,
    ResponseMetadataDetector, UsageDetector,
};
pub use fingerprint::{compute_fingerprint, similarity};
pub use pricing::{DEFAULT_FALLBACK_PRICING, ModelPricing, PricingTable, estimate_cost};
pub use trace::{ActiveSpan, MAX_SPANS_PER_TRACE, TraceContext};
