//! Observability infrastructure.
//!
//! Structured logging through `tracing`, installed by the host binary.

pub mod tracing;
