// afinador-core/src/lib.rs

//! The core logic for the Afinador instrument tuner.
//! This crate owns the real-time pitch-to-note pipeline: capture
//! sessions bound to a selectable input device, the detection loop,
//! signal level metering, and note/detuning math. It is completely
//! headless and contains no GUI code; presentation layers consume
//! [`Reading`] snapshots.

pub mod audio;
pub mod level;
pub mod pitch;
pub mod tuner;
pub mod tuning;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tuning::NoteReading;

/// One published snapshot of the analysis pipeline.
///
/// Rewritten once per detection cycle. `frequency` and `note` are absent
/// while the input has no confident pitch (silence, noise); that is the
/// normal idle state, not an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// RMS magnitude of the analysis window, for level metering.
    pub level: f32,
    /// The detected fundamental frequency in Hz.
    pub frequency: Option<f32>,
    /// The nearest-note reading derived from `frequency`.
    pub note: Option<NoteReading>,
}

/// Errors surfaced by session management.
///
/// Per-cycle analysis failures are recovered inside the detection loop
/// and never appear here; an unpitched cycle publishes an absent reading.
#[derive(Debug, Error)]
pub enum TunerError {
    /// The capture device is missing, busy, permission-denied, or has no
    /// usable input format. The cause chain is inlined in the message.
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),
    /// Device enumeration found nothing to open or default to.
    #[error("no audio input devices available")]
    NoInputDevices,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn published_reading_serializes_for_presentation() {
        let reading = Reading {
            level: 0.5,
            frequency: Some(440.0),
            note: Some(tuning::nearest_note(440.0)),
        };
        let json = serde_json::to_value(&reading).expect("serialization failed");
        assert_eq!(json["level"], 0.5);
        assert_eq!(json["frequency"], 440.0);
        assert_eq!(json["note"]["note"], "A");
        assert_eq!(json["note"]["octave"], 4);
        assert_eq!(json["note"]["label"], "in tune");
    }

    #[test]
    fn blank_reading_is_all_absent() {
        let reading = Reading::default();
        assert_eq!(reading.level, 0.0);
        assert!(reading.frequency.is_none());
        assert!(reading.note.is_none());
    }
}
