//! Signal loading and preprocessing
//!
//! `load_and_preprocess` is the single entry point used by the
//! orchestrator: it reads a raw recording file, extracts acquisition
//! metadata, scrubs non-finite samples, and z-score normalizes each lead.

mod loader;
mod preprocess;

pub use loader::{load_recording, RawRecording};
pub use preprocess::preprocess;

use crate::types::{EcgSignal, ProcessingError, RecordingMetadata};
use std::path::Path;

/// Load a raw ECG recording and preprocess it for inference
///
/// # Errors
/// - `FileNotFound` when the path is missing
/// - `UnsupportedFormat` when the extension or contents cannot be parsed
/// - `LeadMismatch` when a declared lead count disagrees with the parsed
///   channel count
/// - `MalformedData` when leads are empty or ragged
pub fn load_and_preprocess(
    path: &Path,
) -> Result<(EcgSignal, RecordingMetadata), ProcessingError> {
    let raw = load_recording(path)?;
    let metadata = raw.metadata.clone();
    let signal = preprocess(raw)?;
    Ok((signal, metadata))
}
