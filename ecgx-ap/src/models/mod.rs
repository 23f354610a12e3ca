//! Domain models for the analysis pipeline service

mod analysis;
mod notification;
mod user;
mod validation;

pub use analysis::{AnalysisStatus, ClinicalReport, EcgAnalysis};
pub use notification::{ChannelDelivery, ChannelKind, Notification, NotificationType};
pub use user::{Patient, QuietHours, UserRole, ValidatorProfile};
pub use validation::{Validation, ValidationReview, ValidationStatus};
