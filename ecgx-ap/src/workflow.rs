//! Validation workflow
//!
//! Creates and resolves human validation tasks for completed analyses.
//! Critical analyses are assigned synchronously to a senior-capable
//! validator; when none is available the workflow escalates to the
//! administrators instead of failing the pipeline.

use crate::db;
use crate::models::{
    AnalysisStatus, ChannelKind, EcgAnalysis, Notification, NotificationType, Validation,
    ValidationReview, ValidationStatus, ValidatorProfile,
};
use crate::notify::NotificationDispatcher;
use chrono::Utc;
use ecgx_common::events::{EcgEvent, EventBus};
use ecgx_common::urgency::NotificationPriority;
use ecgx_common::{ClinicalUrgency, Error, Result};
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

/// Validation workflow over the shared database and notification dispatcher
pub struct ValidationWorkflow {
    pool: SqlitePool,
    event_bus: EventBus,
    dispatcher: Arc<NotificationDispatcher>,
    senior_years: u32,
}

impl ValidationWorkflow {
    pub fn new(
        pool: SqlitePool,
        event_bus: EventBus,
        dispatcher: Arc<NotificationDispatcher>,
        senior_years: u32,
    ) -> Self {
        Self {
            pool,
            event_bus,
            dispatcher,
            senior_years,
        }
    }

    /// Create a validation task for a named validator
    ///
    /// # Errors
    /// - `NotFound` when the analysis or validator does not exist
    /// - `InvalidInput` when the analysis is not COMPLETED or the
    ///   validator lacks the capability for its urgency
    /// - `Conflict` when the validator already has an open validation
    ///   for this analysis
    pub async fn create_validation(
        &self,
        analysis_id: Uuid,
        validator_id: Uuid,
    ) -> Result<Validation> {
        let analysis = db::analyses::load_analysis(&self.pool, analysis_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("analysis {}", analysis_id)))?;

        if analysis.status != AnalysisStatus::Completed {
            return Err(Error::InvalidInput(format!(
                "analysis {} is {}, only COMPLETED analyses can be validated",
                analysis_id,
                analysis.status.as_str()
            )));
        }
        let urgency = analysis
            .report
            .as_ref()
            .map(|r| r.clinical_urgency)
            .unwrap_or(ClinicalUrgency::Routine);

        let validator = db::directory::load_user(&self.pool, validator_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("validator {}", validator_id)))?;

        if !validator.can_validate(urgency, self.senior_years) {
            return Err(Error::InvalidInput(format!(
                "validator {} cannot validate a {} analysis",
                validator_id,
                urgency.as_str()
            )));
        }

        if db::validations::has_open_validation(&self.pool, analysis_id, validator_id).await? {
            return Err(Error::Conflict(format!(
                "validator {} already has an open validation for analysis {}",
                validator_id, analysis_id
            )));
        }

        let requires_second_opinion =
            urgency == ClinicalUrgency::Critical && !validator.is_senior(self.senior_years);
        self.open_validation(&analysis, &validator, urgency, requires_second_opinion)
            .await
    }

    /// Assign a completed analysis to the best available validator
    ///
    /// CRITICAL analyses with no capable validator escalate: administrators
    /// are alerted and `Ok(None)` is returned so the pipeline completes
    /// rather than erroring. Lower urgencies with no validator simply stay
    /// unassigned.
    pub async fn assign_validator(&self, analysis: &EcgAnalysis) -> Result<Option<Validation>> {
        let urgency = analysis
            .report
            .as_ref()
            .map(|r| r.clinical_urgency)
            .unwrap_or(ClinicalUrgency::Routine);

        let candidates = db::directory::available_validators(&self.pool).await?;
        let mut capable = Vec::new();
        for candidate in candidates {
            if !candidate.can_validate(urgency, self.senior_years) {
                continue;
            }
            if db::validations::has_open_validation(&self.pool, analysis.guid, candidate.guid)
                .await?
            {
                continue;
            }
            capable.push(candidate);
        }

        let Some(validator) = capable.into_iter().next() else {
            if urgency == ClinicalUrgency::Critical {
                self.escalate(analysis, "no senior validator available for critical analysis")
                    .await?;
            } else {
                tracing::warn!(
                    analysis_id = %analysis.guid,
                    urgency = %urgency.as_str(),
                    "No validator available, analysis remains unassigned"
                );
            }
            return Ok(None);
        };

        let requires_second_opinion =
            urgency == ClinicalUrgency::Critical && !validator.is_senior(self.senior_years);
        let validation = self
            .open_validation(analysis, &validator, urgency, requires_second_opinion)
            .await?;
        Ok(Some(validation))
    }

    /// Submit a validator's review for an open validation
    ///
    /// A REJECTED review on an analysis flagged `requires_immediate_attention`
    /// fans an urgent alert out to every administrator and cardiologist.
    pub async fn submit_validation(
        &self,
        validation_id: Uuid,
        review: &ValidationReview,
    ) -> Result<Validation> {
        let mut validation = db::validations::load_validation(&self.pool, validation_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("validation {}", validation_id)))?;

        if validation.status.is_terminal() {
            return Err(Error::Conflict(format!(
                "validation {} was already submitted",
                validation_id
            )));
        }

        validation.apply_review(review);
        if !db::validations::submit_validation(&self.pool, &validation).await? {
            // Lost the CAS to a concurrent submit
            return Err(Error::Conflict(format!(
                "validation {} was already submitted",
                validation_id
            )));
        }

        tracing::info!(
            validation_id = %validation.guid,
            analysis_id = %validation.analysis_id,
            approved = review.approved,
            "Validation submitted"
        );

        self.event_bus.emit(EcgEvent::ValidationSubmitted {
            validation_id: validation.guid,
            analysis_id: validation.analysis_id,
            validator_id: validation.validator_id,
            approved: review.approved,
            timestamp: Utc::now(),
        });

        if validation.status == ValidationStatus::Rejected {
            let analysis =
                db::analyses::load_analysis(&self.pool, validation.analysis_id).await?;
            let immediate = analysis
                .as_ref()
                .and_then(|a| a.report.as_ref())
                .map(|r| r.requires_immediate_attention)
                .unwrap_or(false);
            if immediate {
                self.alert_rejection(&validation).await?;
            }
        }

        Ok(validation)
    }

    async fn open_validation(
        &self,
        analysis: &EcgAnalysis,
        validator: &ValidatorProfile,
        urgency: ClinicalUrgency,
        requires_second_opinion: bool,
    ) -> Result<Validation> {
        let validation = Validation::new(analysis.guid, validator.guid, requires_second_opinion);
        db::validations::insert_validation(&self.pool, &validation).await?;

        tracing::info!(
            validation_id = %validation.guid,
            analysis_id = %analysis.guid,
            validator_id = %validator.guid,
            urgency = %urgency.as_str(),
            requires_second_opinion,
            "Validation task created"
        );

        self.event_bus.emit(EcgEvent::ValidationCreated {
            validation_id: validation.guid,
            analysis_id: analysis.guid,
            validator_id: validator.guid,
            urgent: urgency >= ClinicalUrgency::Urgent,
            requires_second_opinion,
            timestamp: Utc::now(),
        });

        let (notification_type, priority, channels) = match urgency {
            ClinicalUrgency::Critical => (
                NotificationType::UrgentAlert,
                NotificationPriority::Critical,
                vec![
                    ChannelKind::InApp,
                    ChannelKind::Email,
                    ChannelKind::Sms,
                    ChannelKind::Push,
                ],
            ),
            ClinicalUrgency::Urgent => (
                NotificationType::ValidationAssigned,
                NotificationPriority::High,
                vec![ChannelKind::InApp, ChannelKind::Email],
            ),
            ClinicalUrgency::Routine => (
                NotificationType::ValidationAssigned,
                NotificationPriority::Normal,
                vec![ChannelKind::InApp, ChannelKind::Email],
            ),
        };

        let diagnosis = analysis
            .report
            .as_ref()
            .map(|r| r.primary_diagnosis.clone())
            .unwrap_or_else(|| "pending diagnosis".to_string());

        let notification = Notification::new(
            validator.guid,
            format!("{} validation assigned", urgency.as_str()),
            format!(
                "Analysis {} ({}) awaits your review",
                analysis.guid, diagnosis
            ),
            notification_type,
            priority,
            channels,
        )
        .with_analysis(analysis.guid);

        self.dispatcher
            .create_and_dispatch(notification, validator)
            .await?;

        Ok(validation)
    }

    /// Alert administrators that a critical analysis has no validator
    async fn escalate(&self, analysis: &EcgAnalysis, reason: &str) -> Result<()> {
        tracing::error!(
            analysis_id = %analysis.guid,
            reason,
            "Escalating critical analysis to administrators"
        );

        self.event_bus.emit(EcgEvent::EscalationRaised {
            analysis_id: analysis.guid,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });

        let admins = db::directory::administrators(&self.pool).await?;
        if admins.is_empty() {
            tracing::error!(
                analysis_id = %analysis.guid,
                "No administrators in directory, escalation has no recipients"
            );
        }
        for admin in &admins {
            let notification = Notification::new(
                admin.guid,
                "Critical analysis unassigned",
                format!("Analysis {}: {}", analysis.guid, reason),
                NotificationType::SystemAlert,
                NotificationPriority::Critical,
                vec![
                    ChannelKind::InApp,
                    ChannelKind::Email,
                    ChannelKind::Sms,
                    ChannelKind::Push,
                ],
            )
            .with_analysis(analysis.guid);

            if let Err(err) = self
                .dispatcher
                .create_and_dispatch(notification, admin)
                .await
            {
                tracing::warn!(
                    recipient_id = %admin.guid,
                    error = %err,
                    "Escalation notification failed, continuing"
                );
            }
        }

        Ok(())
    }

    /// Fan a rejection of an immediate-attention analysis out to every
    /// administrator and cardiologist
    async fn alert_rejection(&self, validation: &Validation) -> Result<()> {
        let mut recipients = db::directory::administrators(&self.pool).await?;
        recipients.extend(db::directory::cardiologists(&self.pool).await?);

        for recipient in &recipients {
            let notification = Notification::new(
                recipient.guid,
                "AI diagnosis rejected on critical analysis",
                format!(
                    "Validator rejected the AI read on analysis {}, immediate review required",
                    validation.analysis_id
                ),
                NotificationType::UrgentAlert,
                NotificationPriority::Critical,
                vec![
                    ChannelKind::InApp,
                    ChannelKind::Email,
                    ChannelKind::Sms,
                    ChannelKind::Push,
                ],
            )
            .with_analysis(validation.analysis_id);

            if let Err(err) = self
                .dispatcher
                .create_and_dispatch(notification, recipient)
                .await
            {
                tracing::warn!(
                    recipient_id = %recipient.guid,
                    error = %err,
                    "Rejection alert failed, continuing"
                );
            }
        }

        Ok(())
    }
}
