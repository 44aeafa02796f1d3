use std::f32::consts::{FRAC_PI_2, SQRT_2};

/// Constant-power balance, normalised so the centre position is unity gain
/// on both sides. Out-of-range and NaN positions are clamped.
#[inline]
pub(crate) fn balance_gains(pan: f32) -> (f32, f32) {
    let pan = if pan.is_nan() { 0.0 } else { pan.clamp(-1.0, 1.0) };
    let angle = (pan + 1.0) * 0.5 * FRAC_PI_2;
    (
        (angle.cos() * SQRT_2).min(1.0),
        (angle.sin() * SQRT_2).min(1.0),
    )
}

/// Volume as applied at render time: negative and NaN become silence.
#[inline]
pub(crate) fn effective_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        0.0
    } else {
        volume.max(0.0)
    }
}

/// Applies volume and balance to an interleaved stereo block.
pub(crate) fn apply_gain(block: &mut [f32], volume: f32, pan: f32) {
    let (left, right) = balance_gains(pan);
    let volume = effective_volume(volume);
    let (left, right) = (left * volume, right * volume);
    for frame in block.chunks_exact_mut(2) {
        frame[0] *= left;
        frame[1] *= right;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centre_is_unity() {
        let (l, r) = balance_gains(0.0);
        assert!((l - 1.0).abs() < 1e-6);
        assert!((r - 1.0).abs() < 1e-6);
    }

    #[test]
    fn extremes_mute_opposite_side() {
        let (l, r) = balance_gains(1.0);
        assert!(l.abs() < 1e-6);
        assert!((r - 1.0).abs() < 1e-6);
        assert_eq!(balance_gains(-7.0), balance_gains(-1.0));
        assert_eq!(balance_gains(f32::NAN), balance_gains(0.0));
    }

    #[test]
    fn negative_volume_is_silence() {
        let mut block = [1.0, 1.0];
        apply_gain(&mut block, -2.0, 0.0);
        assert_eq!(block, [0.0, 0.0]);
        assert_eq!(effective_volume(f32::NAN), 0.0);
    }
}
