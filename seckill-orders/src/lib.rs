//! Seckill Orders - Flash-Sale Order Placement
//!
//! [`OrderPlacementService`] turns a purchase request into exactly one
//! [`seckill_core::OrderOutcome`], and [`PlacementResponse`] maps that (or a
//! fault) onto a stable client code. Tracing setup for binaries lives in
//! [`telemetry`].

pub mod response;
pub mod service;
pub mod telemetry;

pub use response::{PlacementCode, PlacementResponse};
pub use service::{OrderPlacementService, ResourceLoader, RESOURCE_CACHE_PREFIX};
pub use telemetry::{init_tracing, TelemetryConfig, TelemetryError};
