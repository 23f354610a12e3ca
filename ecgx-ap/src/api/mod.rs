//! HTTP API handlers

pub mod analyses;
pub mod health;
pub mod notifications;
pub mod sse;
pub mod validations;

pub use analyses::analysis_routes;
pub use health::health_routes;
pub use notifications::notification_routes;
pub use sse::event_stream;
pub use validations::validation_routes;
