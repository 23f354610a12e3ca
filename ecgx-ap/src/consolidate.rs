//! Clinical consolidation of per-model results
//!
//! Merges independent model outputs into one diagnosis via
//! agreement-weighted voting, derives measurements, and computes the
//! clinical-urgency verdict. Pure and deterministic: identical input maps
//! produce identical output, regardless of hash-map iteration order.
//!
//! The urgency determination is a plain case-insensitive substring scan
//! over fixed keyword lists. It is kept exactly as validated in
//! production, including its known false-positive surface.

use crate::types::{Anomaly, DiagnosticResult, Feature, Finding, InferenceError, ModelMeasurements};
use ecgx_common::ClinicalUrgency;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Diagnoses that force CRITICAL regardless of confidence
const EMERGENCY_KEYWORDS: &[&str] = &[
    "ventricular fibrillation",
    "cardiac arrest",
    "asystole",
    "tamponade",
    "ruptured aneurysm",
    "torsades",
];

/// Diagnoses that force URGENT
const URGENT_KEYWORDS: &[&str] = &[
    "infarction",
    "hemorrhage",
    "embolism",
    "ventricular tachycardia",
    "complete heart block",
];

/// Malignant-sounding terms; URGENT when confidence exceeds 0.9
const MALIGNANT_KEYWORDS: &[&str] = &["malignant", "aneurysm", "dissection"];

/// Severity-escalation confidence threshold
const SEVERE_FINDING_CONFIDENCE: f64 = 0.8;

/// High-confidence threshold for malignant-sounding diagnoses
const MALIGNANT_CONFIDENCE: f64 = 0.9;

/// A differential diagnosis with its ensemble confidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Differential {
    pub diagnosis: String,
    pub confidence: f64,
}

/// Consolidated ensemble verdict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Consolidation {
    pub primary_diagnosis: String,
    pub secondary_diagnosis: Option<String>,
    /// Non-winning diagnoses, sorted by descending average confidence
    pub differential: Vec<Differential>,
    /// Average confidence among models that agreed on the winner
    pub confidence: f64,
    pub findings: Vec<Finding>,
    pub features: Vec<Feature>,
    pub anomalies: Vec<Anomaly>,
    pub measurements: ModelMeasurements,
    pub rhythm: String,
    pub urgency: ClinicalUrgency,
    pub requires_immediate_attention: bool,
    pub recommendations: Vec<String>,
    pub icd10_codes: Vec<String>,
    /// Ensemble accuracy proxy: min(confidence + 0.1, 1.0)
    pub ensemble_quality: f64,
    /// Models that agreed on the winning diagnosis
    pub agreeing_models: Vec<String>,
    pub interpretation: String,
}

/// Consolidate per-model results into one clinical verdict
///
/// # Errors
/// `NoUsableOutput` when the result map is empty (the orchestrator treats
/// this as a retryable analysis failure).
pub fn consolidate(
    results: &HashMap<String, DiagnosticResult>,
) -> Result<Consolidation, InferenceError> {
    if results.is_empty() {
        return Err(InferenceError::NoUsableOutput);
    }

    // Sorted model order makes every downstream step reproducible
    let mut model_names: Vec<&String> = results.keys().collect();
    model_names.sort();

    // 1. Group primary diagnoses: normalized key → (count, confidences, label)
    let mut groups: BTreeMap<String, (usize, f64, String, Vec<String>)> = BTreeMap::new();
    for name in &model_names {
        let result = &results[*name];
        let key = result.primary_diagnosis.trim().to_lowercase();
        let entry = groups
            .entry(key)
            .or_insert_with(|| (0, 0.0, result.primary_diagnosis.trim().to_string(), Vec::new()));
        entry.0 += 1;
        entry.1 += result.confidence;
        entry.3.push((*name).clone());
    }

    // 2. Winner: max agreement, tie-break max average confidence.
    //    BTreeMap order breaks any remaining tie deterministically.
    let (winner_key, _) = groups
        .iter()
        .max_by(|(_, a), (_, b)| {
            let a_avg = a.1 / a.0 as f64;
            let b_avg = b.1 / b.0 as f64;
            a.0.cmp(&b.0)
                .then(a_avg.partial_cmp(&b_avg).unwrap_or(std::cmp::Ordering::Equal))
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .expect("non-empty result map");

    let (win_count, win_sum, win_label, agreeing_models) = groups.remove(&winner_key).unwrap();
    let confidence = win_sum / win_count as f64;

    // 3. Remaining groups become differentials, descending avg confidence
    let mut differential: Vec<Differential> = groups
        .into_values()
        .map(|(count, sum, label, _)| Differential {
            diagnosis: label,
            confidence: sum / count as f64,
        })
        .collect();
    differential.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.diagnosis.cmp(&b.diagnosis))
    });
    let secondary_diagnosis = differential.first().map(|d| d.diagnosis.clone());

    // 4. Union + dedup findings/features/anomalies, first occurrence wins
    let mut findings: Vec<Finding> = Vec::new();
    let mut features: Vec<Feature> = Vec::new();
    let mut anomalies: Vec<Anomaly> = Vec::new();
    let mut recommendations: Vec<String> = Vec::new();
    {
        let mut finding_keys = HashSet::new();
        let mut feature_keys = HashSet::new();
        let mut anomaly_keys = HashSet::new();
        let mut rec_keys = HashSet::new();

        for name in &model_names {
            let result = &results[*name];
            for finding in &result.findings {
                if finding_keys.insert(finding.description.trim().to_lowercase()) {
                    findings.push(finding.clone());
                }
            }
            for feature in &result.features {
                if feature_keys.insert(feature.description.trim().to_lowercase()) {
                    features.push(feature.clone());
                }
            }
            for anomaly in &result.anomalies {
                let key = format!(
                    "{}|{}",
                    anomaly.kind.trim().to_lowercase(),
                    anomaly
                        .location
                        .as_deref()
                        .unwrap_or("")
                        .trim()
                        .to_lowercase()
                );
                if anomaly_keys.insert(key) {
                    anomalies.push(anomaly.clone());
                }
            }
            for rec in &result.recommendations {
                if rec_keys.insert(rec.trim().to_lowercase()) {
                    recommendations.push(rec.clone());
                }
            }
        }
    }

    // 6. Urgency from the winning diagnosis text and finding severities
    let urgency = determine_urgency(&win_label, confidence, &findings, &anomalies);

    // Measurements: field-wise average across reporting models
    let measurements = average_measurements(&model_names, results);

    let rhythm = derive_rhythm(&win_label);
    let icd10_codes = icd10_lookup(&win_label)
        .into_iter()
        .chain(secondary_diagnosis.as_deref().map(icd10_lookup).unwrap_or_default())
        .collect();

    let interpretation = format!(
        "{} ({} of {} models agree, confidence {:.2}); urgency {}",
        win_label,
        win_count,
        model_names.len(),
        confidence,
        urgency.as_str()
    );

    Ok(Consolidation {
        primary_diagnosis: win_label,
        secondary_diagnosis,
        differential,
        confidence,
        findings,
        features,
        anomalies,
        measurements,
        rhythm,
        urgency,
        requires_immediate_attention: urgency == ClinicalUrgency::Critical,
        recommendations,
        icd10_codes,
        // 7. Ensemble accuracy proxy
        ensemble_quality: (confidence + 0.1).min(1.0),
        agreeing_models,
        interpretation,
    })
}

/// Keyword-tier urgency scan (case-insensitive substring matching)
fn determine_urgency(
    diagnosis: &str,
    confidence: f64,
    findings: &[Finding],
    anomalies: &[Anomaly],
) -> ClinicalUrgency {
    let text = diagnosis.to_lowercase();

    if EMERGENCY_KEYWORDS.iter().any(|k| text.contains(k)) {
        return ClinicalUrgency::Critical;
    }

    if URGENT_KEYWORDS.iter().any(|k| text.contains(k)) {
        return ClinicalUrgency::Urgent;
    }

    let high_acuity_finding = findings
        .iter()
        .filter_map(|f| f.severity)
        .chain(anomalies.iter().filter_map(|a| a.severity))
        .any(|s| s.is_high_acuity());
    if high_acuity_finding && confidence > SEVERE_FINDING_CONFIDENCE {
        return ClinicalUrgency::Urgent;
    }

    if confidence > MALIGNANT_CONFIDENCE
        && MALIGNANT_KEYWORDS.iter().any(|k| text.contains(k))
    {
        return ClinicalUrgency::Urgent;
    }

    ClinicalUrgency::Routine
}

/// Field-wise average of measurements over models that reported the field
fn average_measurements(
    model_names: &[&String],
    results: &HashMap<String, DiagnosticResult>,
) -> ModelMeasurements {
    fn avg(values: Vec<f64>) -> Option<f64> {
        if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        }
    }

    let collect = |field: fn(&ModelMeasurements) -> Option<f64>| -> Option<f64> {
        avg(model_names
            .iter()
            .filter_map(|n| field(&results[*n].measurements))
            .collect())
    };

    ModelMeasurements {
        heart_rate_bpm: collect(|m| m.heart_rate_bpm),
        pr_ms: collect(|m| m.pr_ms),
        qrs_ms: collect(|m| m.qrs_ms),
        qt_ms: collect(|m| m.qt_ms),
        qtc_ms: collect(|m| m.qtc_ms),
    }
}

/// Rhythm label from the winning diagnosis
fn derive_rhythm(diagnosis: &str) -> String {
    let text = diagnosis.to_lowercase();
    for (keyword, rhythm) in [
        ("atrial fibrillation", "Atrial Fibrillation"),
        ("atrial flutter", "Atrial Flutter"),
        ("ventricular fibrillation", "Ventricular Fibrillation"),
        ("ventricular tachycardia", "Ventricular Tachycardia"),
        ("bradycardia", "Sinus Bradycardia"),
        ("tachycardia", "Sinus Tachycardia"),
        ("asystole", "Asystole"),
    ] {
        if text.contains(keyword) {
            return rhythm.to_string();
        }
    }
    "Sinus Rhythm".to_string()
}

/// Fixed ICD-10 lookup for common ECG diagnoses
fn icd10_lookup(diagnosis: &str) -> Vec<String> {
    let text = diagnosis.to_lowercase();
    let mut codes = Vec::new();
    for (keyword, code) in [
        ("atrial fibrillation", "I48.91"),
        ("atrial flutter", "I48.92"),
        ("ventricular fibrillation", "I49.01"),
        ("ventricular tachycardia", "I47.2"),
        ("myocardial infarction", "I21.9"),
        ("infarction", "I21.9"),
        ("bradycardia", "R00.1"),
        ("tachycardia", "R00.0"),
        ("heart block", "I44.2"),
        ("cardiac arrest", "I46.9"),
    ] {
        if text.contains(keyword) && !codes.contains(&code.to_string()) {
            codes.push(code.to_string());
        }
    }
    codes
}
