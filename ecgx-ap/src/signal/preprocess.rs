//! Waveform cleaning and normalization
//!
//! NaN/Inf samples become 0.0, then each lead is z-score normalized
//! (subtract the per-lead mean, divide by the per-lead std + epsilon).

use super::loader::RawRecording;
use crate::types::{EcgSignal, ProcessingError};

/// Epsilon added to the per-lead std to avoid divide-by-zero on flat leads
const NORM_EPSILON: f32 = 1e-8;

/// Clean and normalize a raw recording into an inference-ready signal
pub fn preprocess(raw: RawRecording) -> Result<EcgSignal, ProcessingError> {
    let mut leads = raw.leads;

    for lead in leads.iter_mut() {
        scrub_non_finite(lead);
        zscore_normalize(lead);
    }

    Ok(EcgSignal {
        sample_rate: raw.metadata.sample_rate,
        lead_names: raw.metadata.lead_names,
        leads,
    })
}

/// Replace NaN and ±Inf with zero
fn scrub_non_finite(samples: &mut [f32]) {
    for s in samples.iter_mut() {
        if !s.is_finite() {
            *s = 0.0;
        }
    }
}

/// In-place per-lead z-score normalization
fn zscore_normalize(samples: &mut [f32]) {
    if samples.is_empty() {
        return;
    }
    let n = samples.len() as f32;
    let mean: f32 = samples.iter().sum::<f32>() / n;
    let variance: f32 = samples.iter().map(|s| (s - mean).powi(2)).sum::<f32>() / n;
    let std = variance.sqrt();

    for s in samples.iter_mut() {
        *s = (*s - mean) / (std + NORM_EPSILON);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RecordingMetadata;

    fn raw(leads: Vec<Vec<f32>>) -> RawRecording {
        let names = (0..leads.len()).map(|i| format!("L{}", i)).collect();
        let samples = leads.first().map(|l| l.len()).unwrap_or(0);
        RawRecording {
            metadata: RecordingMetadata {
                sample_rate: 500,
                duration_secs: samples as f64 / 500.0,
                lead_count: leads.len(),
                lead_names: names,
                sample_count: samples,
                device: None,
                content_hash: "test".into(),
                file_size: 0,
            },
            leads,
        }
    }

    #[test]
    fn nan_and_inf_become_zero() {
        let signal =
            preprocess(raw(vec![vec![f32::NAN, f32::INFINITY, f32::NEG_INFINITY, 0.0]])).unwrap();
        // All-zero after scrub means mean 0, std 0 — values stay finite
        assert!(signal.leads[0].iter().all(|s| s.is_finite()));
        assert!(signal.leads[0].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn normalized_lead_has_zero_mean_unit_std() {
        let signal = preprocess(raw(vec![vec![1.0, 2.0, 3.0, 4.0, 5.0]])).unwrap();
        let lead = &signal.leads[0];
        let n = lead.len() as f32;
        let mean: f32 = lead.iter().sum::<f32>() / n;
        let var: f32 = lead.iter().map(|s| (s - mean).powi(2)).sum::<f32>() / n;
        assert!(mean.abs() < 1e-5);
        assert!((var.sqrt() - 1.0).abs() < 1e-3);
    }

    #[test]
    fn flat_lead_does_not_divide_by_zero() {
        let signal = preprocess(raw(vec![vec![2.5; 100]])).unwrap();
        assert!(signal.leads[0].iter().all(|s| s.is_finite()));
    }
}
