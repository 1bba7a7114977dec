//! # Musical Tuning Module
//!
//! Maps detected frequencies onto the 12-tone equal-tempered scale and
//! measures how far the player is from the ideal pitch. All math is
//! anchored to A4 = 440 Hz; deviations are reported both in Hz and in
//! cents (100 cents = one semitone).

use serde::{Deserialize, Serialize};

/// Reference pitch for A4 in Hz.
pub const A4_HZ: f32 = 440.0;

/// Absolute semitone index of A4 when C0 is semitone 0.
const A4_SEMITONE: i32 = 57;

/// Below this absolute deviation in Hz the note is reported as in tune.
const IN_TUNE_THRESHOLD_HZ: f32 = 0.5;

/// Clamp bound for the display detuning coordinate, in cents.
pub const MAX_DISPLAY_CENTS: f32 = 50.0;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// The nearest equal-tempered note for one detected frequency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteReading {
    /// Pitch class, e.g. "A" or "C#".
    pub note: String,
    /// Octave number; A4 = 440 Hz sits in octave 4.
    pub octave: i32,
    /// Equal-tempered frequency of the matched note in Hz.
    pub ideal_frequency: f32,
    /// Signed deviation from `ideal_frequency` in Hz.
    pub detune_hz: f32,
    /// Signed deviation in cents. Unclamped; bounded to roughly one half
    /// semitone either way by the nearest-semitone construction. Use
    /// [`NoteReading::display_cents`] for the visualization coordinate.
    pub detune_cents: f32,
    /// Human status line: "in tune", "+6.0 Hz (sharp)", "-6.0 Hz (flat)".
    pub label: String,
}

impl NoteReading {
    /// Concatenated note name, e.g. "A4".
    pub fn name(&self) -> String {
        format!("{}{}", self.note, self.octave)
    }

    /// Detuning clamped to the 50-cent display range. Clamping only
    /// absorbs float edge noise at exact half-semitone boundaries; the
    /// semantic value stays in `detune_cents`.
    pub fn display_cents(&self) -> f32 {
        self.detune_cents.clamp(-MAX_DISPLAY_CENTS, MAX_DISPLAY_CENTS)
    }
}

/// Maps a frequency to its nearest equal-tempered note.
///
/// Only defined for finite, positive frequencies; the detection loop
/// filters estimates before calling, since the log math has no meaning at
/// or below zero.
pub fn nearest_note(frequency: f32) -> NoteReading {
    debug_assert!(frequency.is_finite() && frequency > 0.0);

    // Nearest semitone relative to A4, then shifted so C0 is index 0.
    let semitones_from_a4 = (12.0 * (frequency / A4_HZ).log2()).round() as i32;
    let absolute = semitones_from_a4 + A4_SEMITONE;

    // rem_euclid/div_euclid keep names and octaves defined below C0.
    let note = NOTE_NAMES[absolute.rem_euclid(12) as usize].to_string();
    let octave = absolute.div_euclid(12);

    let ideal_frequency = A4_HZ * (semitones_from_a4 as f32 / 12.0).exp2();
    let detune_hz = frequency - ideal_frequency;
    let detune_cents = 1200.0 * (frequency / ideal_frequency).log2();

    let label = if detune_hz.abs() < IN_TUNE_THRESHOLD_HZ {
        "in tune".to_string()
    } else if detune_hz > 0.0 {
        format!("+{:.1} Hz (sharp)", detune_hz)
    } else {
        format!("{:.1} Hz (flat)", detune_hz)
    };

    NoteReading {
        note,
        octave,
        ideal_frequency,
        detune_hz,
        detune_cents,
        label,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a4_is_the_reference_point() {
        let reading = nearest_note(440.0);
        assert_eq!(reading.note, "A");
        assert_eq!(reading.octave, 4);
        assert_eq!(reading.ideal_frequency, 440.0);
        assert_eq!(reading.detune_hz, 0.0);
        assert_eq!(reading.detune_cents, 0.0);
        assert_eq!(reading.label, "in tune");
        assert_eq!(reading.name(), "A4");
    }

    #[test]
    fn middle_c_maps_to_c4() {
        let reading = nearest_note(261.63);
        assert_eq!(reading.note, "C");
        assert_eq!(reading.octave, 4);
    }

    #[test]
    fn sharp_tone_gets_a_signed_label() {
        let reading = nearest_note(446.0);
        assert_eq!(reading.note, "A");
        assert_eq!(reading.octave, 4);
        assert_eq!(reading.detune_hz, 6.0);
        assert_eq!(reading.label, "+6.0 Hz (sharp)");
        assert!((reading.detune_cents - 23.45).abs() < 0.05);
    }

    #[test]
    fn flat_tone_gets_a_signed_label() {
        let reading = nearest_note(434.0);
        assert_eq!(reading.detune_hz, -6.0);
        assert_eq!(reading.label, "-6.0 Hz (flat)");
    }

    #[test]
    fn half_hertz_threshold_bounds_in_tune() {
        assert_eq!(nearest_note(440.4).label, "in tune");
        assert_eq!(nearest_note(440.6).label, "+0.6 Hz (sharp)");
    }

    #[test]
    fn ideal_frequency_is_the_nearest_semitone_step() {
        fn cents_between(a: f32, b: f32) -> f32 {
            (1200.0 * (a / b).log2()).abs()
        }

        let semitone_ratio = (1.0f32 / 12.0).exp2();
        let mut frequency = 30.0f32;
        while frequency < 4000.0 {
            let reading = nearest_note(frequency);

            // The matched frequency is an exact semitone step from A4.
            let steps = (12.0 * (reading.ideal_frequency / A4_HZ).log2()).round();
            let exact = A4_HZ * (steps / 12.0).exp2();
            assert!((reading.ideal_frequency - exact).abs() < 1e-2);

            // Neither neighboring semitone is nearer in pitch distance.
            let distance = cents_between(frequency, reading.ideal_frequency);
            let above = reading.ideal_frequency * semitone_ratio;
            let below = reading.ideal_frequency / semitone_ratio;
            assert!(distance <= cents_between(frequency, above) + 1e-2);
            assert!(distance <= cents_between(frequency, below) + 1e-2);
            assert!(distance <= 50.0 + 1e-2);

            frequency *= 1.01;
        }
    }

    #[test]
    fn detune_grows_monotonically_within_a_note() {
        let readings: Vec<_> = [435.0, 437.0, 440.0, 443.0, 445.0]
            .iter()
            .map(|&f| nearest_note(f))
            .collect();
        assert!(readings.iter().all(|r| r.note == "A" && r.octave == 4));
        for pair in readings.windows(2) {
            assert!(pair[0].detune_hz < pair[1].detune_hz);
        }
    }

    #[test]
    fn display_cents_stays_in_the_bar_range() {
        let mut frequency = 20.0f32;
        while frequency < 10_000.0 {
            let cents = nearest_note(frequency).display_cents();
            assert!((-MAX_DISPLAY_CENTS..=MAX_DISPLAY_CENTS).contains(&cents));
            frequency *= 1.007;
        }
    }

    #[test]
    fn mapping_is_pure() {
        let first = nearest_note(123.456);
        let second = nearest_note(123.456);
        assert_eq!(first, second);
        assert_eq!(
            first.ideal_frequency.to_bits(),
            second.ideal_frequency.to_bits()
        );
        assert_eq!(first.detune_cents.to_bits(), second.detune_cents.to_bits());
    }

    #[test]
    fn subsonic_frequencies_stay_defined() {
        let reading = nearest_note(10.0);
        assert!(reading.octave <= 0);
        assert!(!reading.note.is_empty());
        assert!(reading.ideal_frequency > 0.0);
    }
}
