//! Signal level metering.

/// Root-mean-square magnitude of a frame of samples.
///
/// Each cycle's level stands alone; there is no smoothing or decay
/// across frames. An empty frame meters as silence.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_meters_zero() {
        assert_eq!(rms(&[0.0; 2048]), 0.0);
    }

    #[test]
    fn dc_meters_its_magnitude() {
        let frame = vec![0.25; 512];
        assert!((rms(&frame) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn full_scale_sine_meters_inverse_sqrt_two() {
        // 32 whole periods, so the RMS is exact up to rounding.
        let frame: Vec<f32> = (0..2048)
            .map(|i| (2.0 * std::f32::consts::PI * i as f32 / 64.0).sin())
            .collect();
        assert!((rms(&frame) - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-3);
    }

    #[test]
    fn empty_frame_meters_zero() {
        assert_eq!(rms(&[]), 0.0);
    }
}
