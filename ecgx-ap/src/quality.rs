//! Signal quality analysis
//!
//! Computes noise level, baseline wander, and an SNR estimate from the
//! preprocessed signal, combines them into an overall score, and names the
//! artifacts it detected. Deterministic for identical input; low scores
//! flag the analysis low-confidence and raise a quality alert downstream,
//! they never block processing.

use crate::types::EcgSignal;
use serde::{Deserialize, Serialize};

/// Quality analyzer tunables
#[derive(Debug, Clone)]
pub struct QualityConfig {
    /// Moving-average window for baseline estimation, seconds
    pub baseline_window_secs: f64,
    /// Noise level (mean |first difference|) considered severe
    pub noise_ceiling: f64,
    /// Baseline wander amplitude considered severe
    pub wander_ceiling: f64,
    /// Fraction of identical consecutive samples that marks a flat lead
    pub flat_fraction: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            baseline_window_secs: 0.8,
            noise_ceiling: 0.6,
            wander_ceiling: 1.0,
            flat_fraction: 0.9,
        }
    }
}

/// Quality metrics for one recording
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    /// Composite score, 0.0 (unusable) – 1.0 (clean)
    pub overall_score: f64,
    /// Mean absolute first difference across leads (normalized units)
    pub noise_level: f64,
    /// Mean baseline drift amplitude across leads
    pub baseline_wander: f64,
    /// Signal-to-noise estimate in dB
    pub snr_db: f64,
    /// Named artifacts detected (empty when clean)
    pub artifacts: Vec<String>,
}

/// Signal quality analyzer
pub struct QualityAnalyzer {
    config: QualityConfig,
}

impl QualityAnalyzer {
    pub fn new() -> Self {
        Self::with_config(QualityConfig::default())
    }

    pub fn with_config(config: QualityConfig) -> Self {
        Self { config }
    }

    /// Analyze a preprocessed signal
    pub fn analyze(&self, signal: &EcgSignal) -> QualityReport {
        if signal.leads.is_empty() || signal.samples_per_lead() == 0 {
            return QualityReport {
                overall_score: 0.0,
                noise_level: 0.0,
                baseline_wander: 0.0,
                snr_db: 0.0,
                artifacts: vec!["empty_signal".to_string()],
            };
        }

        let window = ((self.config.baseline_window_secs * signal.sample_rate as f64) as usize)
            .max(1)
            .min(signal.samples_per_lead());

        let mut noise_sum = 0.0f64;
        let mut wander_sum = 0.0f64;
        let mut signal_power_sum = 0.0f64;
        let mut noise_power_sum = 0.0f64;
        let mut flat_leads = 0usize;

        for lead in &signal.leads {
            noise_sum += mean_abs_diff(lead);
            wander_sum += baseline_drift(lead, window);

            // Residual after the moving-average baseline approximates the
            // in-band signal; the first difference approximates noise.
            signal_power_sum += power(lead);
            noise_power_sum += diff_power(lead);

            if flat_fraction(lead) >= self.config.flat_fraction {
                flat_leads += 1;
            }
        }

        let lead_count = signal.leads.len() as f64;
        let noise_level = noise_sum / lead_count;
        let baseline_wander = wander_sum / lead_count;

        let snr_db = if noise_power_sum > 0.0 {
            10.0 * (signal_power_sum / noise_power_sum).log10()
        } else {
            // No sample-to-sample variation at all: flat signal
            0.0
        };

        let mut artifacts = Vec::new();
        if noise_level > self.config.noise_ceiling {
            artifacts.push("high_frequency_noise".to_string());
        }
        if baseline_wander > self.config.wander_ceiling {
            artifacts.push("baseline_wander".to_string());
        }
        if flat_leads > 0 {
            artifacts.push(format!("flat_leads:{}", flat_leads));
        }

        // Each penalty scales its metric against the configured ceiling;
        // combined multiplicatively so any severe issue collapses the score.
        let noise_penalty = (1.0 - (noise_level / self.config.noise_ceiling).min(1.0)).max(0.0);
        let wander_penalty =
            (1.0 - (baseline_wander / self.config.wander_ceiling).min(1.0)).max(0.0);
        let flat_penalty = 1.0 - (flat_leads as f64 / lead_count);

        let overall_score = (0.2 + 0.8 * noise_penalty * wander_penalty * flat_penalty)
            .min(1.0)
            .max(0.0)
            * if flat_leads == signal.leads.len() { 0.0 } else { 1.0 };

        QualityReport {
            overall_score,
            noise_level,
            baseline_wander,
            snr_db,
            artifacts,
        }
    }
}

impl Default for QualityAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn mean_abs_diff(samples: &[f32]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let sum: f64 = samples
        .windows(2)
        .map(|w| (w[1] - w[0]).abs() as f64)
        .sum();
    sum / (samples.len() - 1) as f64
}

/// Peak-to-peak excursion of the moving-average baseline
fn baseline_drift(samples: &[f32], window: usize) -> f64 {
    if samples.len() < window || window == 0 {
        return 0.0;
    }
    let mut min_avg = f64::MAX;
    let mut max_avg = f64::MIN;
    let mut sum: f64 = samples[..window].iter().map(|s| *s as f64).sum();
    let w = window as f64;
    min_avg = min_avg.min(sum / w);
    max_avg = max_avg.max(sum / w);
    for i in window..samples.len() {
        sum += samples[i] as f64 - samples[i - window] as f64;
        let avg = sum / w;
        min_avg = min_avg.min(avg);
        max_avg = max_avg.max(avg);
    }
    max_avg - min_avg
}

fn power(samples: &[f32]) -> f64 {
    samples.iter().map(|s| (*s as f64).powi(2)).sum::<f64>() / samples.len().max(1) as f64
}

fn diff_power(samples: &[f32]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    samples
        .windows(2)
        .map(|w| ((w[1] - w[0]) as f64).powi(2))
        .sum::<f64>()
        / (samples.len() - 1) as f64
}

fn flat_fraction(samples: &[f32]) -> f64 {
    if samples.len() < 2 {
        return 1.0;
    }
    let flat = samples.windows(2).filter(|w| w[0] == w[1]).count();
    flat as f64 / (samples.len() - 1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_signal(noise: f32) -> EcgSignal {
        // 10 s of a 1.2 Hz tone at 500 Hz, optional deterministic "noise"
        let samples: Vec<f32> = (0..5000)
            .map(|i| {
                let t = i as f32 / 500.0;
                let clean = (2.0 * std::f32::consts::PI * 1.2 * t).sin();
                // Deterministic pseudo-noise from a fixed pattern
                let jitter = ((i * 2654435761u32 as usize) % 1000) as f32 / 1000.0 - 0.5;
                clean + noise * jitter
            })
            .collect();
        EcgSignal {
            sample_rate: 500,
            lead_names: vec!["II".into()],
            leads: vec![samples],
        }
    }

    #[test]
    fn deterministic_for_identical_input() {
        let analyzer = QualityAnalyzer::new();
        let signal = sine_signal(0.2);
        let a = analyzer.analyze(&signal);
        let b = analyzer.analyze(&signal);
        assert_eq!(a.overall_score, b.overall_score);
        assert_eq!(a.noise_level, b.noise_level);
        assert_eq!(a.snr_db, b.snr_db);
        assert_eq!(a.artifacts, b.artifacts);
    }

    #[test]
    fn clean_signal_scores_higher_than_noisy() {
        let analyzer = QualityAnalyzer::new();
        let clean = analyzer.analyze(&sine_signal(0.0));
        let noisy = analyzer.analyze(&sine_signal(2.0));
        assert!(clean.overall_score > noisy.overall_score);
        assert!(clean.snr_db > noisy.snr_db);
    }

    #[test]
    fn flat_signal_scores_zero_with_artifact() {
        let analyzer = QualityAnalyzer::new();
        let signal = EcgSignal {
            sample_rate: 500,
            lead_names: vec!["I".into()],
            leads: vec![vec![0.0; 5000]],
        };
        let report = analyzer.analyze(&signal);
        assert_eq!(report.overall_score, 0.0);
        assert!(report.artifacts.iter().any(|a| a.starts_with("flat_leads")));
    }

    #[test]
    fn empty_signal_is_unusable() {
        let analyzer = QualityAnalyzer::new();
        let report = analyzer.analyze(&EcgSignal {
            sample_rate: 500,
            lead_names: vec![],
            leads: vec![],
        });
        assert_eq!(report.overall_score, 0.0);
        assert_eq!(report.artifacts, vec!["empty_signal".to_string()]);
    }
}
