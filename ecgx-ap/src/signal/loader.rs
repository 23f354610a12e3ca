//! Recording file parsing
//!
//! Two on-disk formats are supported:
//! - CSV: header row with lead names, one lead per column
//! - JSON envelope: `{"sample_rate": .., "device": .., "leads":
//!   [{"name": "I", "samples": [..]}, ..]}`
//!
//! Anything else is an `UnsupportedFormat` error. The raw (un-normalized)
//! samples are returned; preprocessing happens in a separate pass.

use crate::types::{ProcessingError, RecordingMetadata};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Default sample rate assumed for CSV recordings without an embedded rate
const DEFAULT_SAMPLE_RATE_HZ: u32 = 500;

/// A parsed but not yet preprocessed recording
#[derive(Debug, Clone)]
pub struct RawRecording {
    pub metadata: RecordingMetadata,
    /// Raw per-lead samples, leads × samples
    pub leads: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct JsonEnvelope {
    sample_rate: u32,
    #[serde(default)]
    device: Option<String>,
    /// Declared lead count; validated against `leads.len()` when present
    #[serde(default)]
    lead_count: Option<usize>,
    leads: Vec<JsonLead>,
}

#[derive(Debug, Deserialize)]
struct JsonLead {
    name: String,
    samples: Vec<f32>,
}

/// Load a recording from disk, detecting the format by extension
pub fn load_recording(path: &Path) -> Result<RawRecording, ProcessingError> {
    if !path.exists() {
        return Err(ProcessingError::FileNotFound(path.to_path_buf()));
    }

    let bytes = std::fs::read(path)?;
    let content_hash = format!("{:x}", Sha256::digest(&bytes));
    let file_size = bytes.len() as u64;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    let (sample_rate, device, declared_leads, lead_names, leads) = match extension.as_deref() {
        Some("csv") => parse_csv(&bytes)?,
        Some("json") => parse_json(&bytes)?,
        other => {
            return Err(ProcessingError::UnsupportedFormat(format!(
                "unrecognized extension {:?} for {}",
                other.unwrap_or("<none>"),
                path.display()
            )))
        }
    };

    if let Some(declared) = declared_leads {
        if declared != leads.len() {
            return Err(ProcessingError::LeadMismatch {
                declared,
                actual: leads.len(),
            });
        }
    }

    if leads.is_empty() {
        return Err(ProcessingError::MalformedData("recording has no leads".into()));
    }
    let first_len = leads[0].len();
    if first_len == 0 {
        return Err(ProcessingError::MalformedData("leads contain no samples".into()));
    }
    if leads.iter().any(|l| l.len() != first_len) {
        return Err(ProcessingError::MalformedData(
            "leads have differing sample counts".into(),
        ));
    }

    let metadata = RecordingMetadata {
        sample_rate,
        duration_secs: first_len as f64 / sample_rate as f64,
        lead_count: leads.len(),
        lead_names,
        sample_count: first_len,
        device,
        content_hash,
        file_size,
    };

    tracing::debug!(
        path = %path.display(),
        leads = metadata.lead_count,
        samples = metadata.sample_count,
        sample_rate = metadata.sample_rate,
        "Recording loaded"
    );

    Ok(RawRecording {
        metadata,
        leads,
    })
}

type ParsedFile = (
    u32,
    Option<String>,
    Option<usize>,
    Vec<String>,
    Vec<Vec<f32>>,
);

fn parse_csv(bytes: &[u8]) -> Result<ParsedFile, ProcessingError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| ProcessingError::UnsupportedFormat("CSV is not valid UTF-8".into()))?;

    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let header = lines
        .next()
        .ok_or_else(|| ProcessingError::UnsupportedFormat("empty CSV file".into()))?;

    let lead_names: Vec<String> = header.split(',').map(|s| s.trim().to_string()).collect();
    if lead_names.iter().any(|n| n.is_empty()) {
        return Err(ProcessingError::UnsupportedFormat(
            "CSV header has empty column names".into(),
        ));
    }
    // A header of numbers means there is no header row at all
    if lead_names.iter().all(|n| n.parse::<f64>().is_ok()) {
        return Err(ProcessingError::UnsupportedFormat(
            "CSV missing lead-name header row".into(),
        ));
    }

    let mut leads: Vec<Vec<f32>> = vec![Vec::new(); lead_names.len()];
    for (line_no, line) in lines.enumerate() {
        let cells: Vec<&str> = line.split(',').map(|s| s.trim()).collect();
        if cells.len() != lead_names.len() {
            return Err(ProcessingError::UnsupportedFormat(format!(
                "CSV row {} has {} cells, expected {}",
                line_no + 2,
                cells.len(),
                lead_names.len()
            )));
        }
        for (i, cell) in cells.iter().enumerate() {
            // Non-numeric cells become NaN and are scrubbed in preprocessing
            let value = cell.parse::<f32>().unwrap_or(f32::NAN);
            leads[i].push(value);
        }
    }

    Ok((DEFAULT_SAMPLE_RATE_HZ, None, None, lead_names, leads))
}

fn parse_json(bytes: &[u8]) -> Result<ParsedFile, ProcessingError> {
    let envelope: JsonEnvelope = serde_json::from_slice(bytes)
        .map_err(|e| ProcessingError::UnsupportedFormat(format!("JSON parse failed: {}", e)))?;

    if envelope.sample_rate == 0 {
        return Err(ProcessingError::UnsupportedFormat(
            "sample_rate must be positive".into(),
        ));
    }

    let lead_names: Vec<String> = envelope.leads.iter().map(|l| l.name.clone()).collect();
    let leads: Vec<Vec<f32>> = envelope.leads.into_iter().map(|l| l.samples).collect();

    Ok((
        envelope.sample_rate,
        envelope.device,
        envelope.lead_count,
        lead_names,
        leads,
    ))
}
