//! # ECGX Common Library
//!
//! Shared code for the ECGX clinical analysis services including:
//! - Error taxonomy shared across service boundaries
//! - Event types (EcgEvent enum) and the broadcast EventBus
//! - Configuration loading (TOML file + environment overrides)
//! - Clinical urgency and notification priority vocabulary

pub mod config;
pub mod error;
pub mod events;
pub mod urgency;

pub use error::{Error, Result};
pub use urgency::ClinicalUrgency;
