//! Grid, note-value and velocity-bin generators

use crate::settings::Settings;

// ============================================================================
// Note values
// ============================================================================

/// Generate straight note durations in ticks around `base` (usually the PPQN).
///
/// `base` is multiplied by halving factors starting at `upper_multiplier` down to 1, then divided
/// by doubling divisors from 2 up to `lower_divisor`.
///
/// # Example
/// ```
/// use tessitura_core::durations::note_durations;
/// assert_eq!(note_durations(4, 8, 24), vec![96, 48, 24, 12, 6, 3]);
/// ```
pub fn note_durations(upper_multiplier: u64, lower_divisor: u64, base: u64) -> Vec<u64> {
    let mut durations = Vec::new();

    let mut multiplier = upper_multiplier as f64;
    while multiplier >= 1.0 {
        durations.push((multiplier * base as f64) as u64);
        multiplier /= 2.0;
    }

    let mut divisor = 2;
    while divisor <= lower_divisor {
        durations.push(base / divisor);
        divisor *= 2;
    }

    durations
}

/// Tuplet durations for the given ratio, e.g. `(3, 2)` turns 24 into 16.
pub fn tuplet_durations(durations: &[u64], numerator: u64, denominator: u64) -> Vec<u64> {
    if numerator == 0 {
        return vec![];
    }
    durations
        .iter()
        .map(|d| d * denominator / numerator)
        .collect()
}

/// Dotted durations up to `iterations` dots, keeping only whole-tick results.
pub fn dotted_durations(durations: &[u64], iterations: u32) -> Vec<u64> {
    let mut dotted = Vec::new();
    for iteration in 0..iterations {
        // d * (2 - 1 / 2^(i + 1)) == d * (2^(i + 2) - 1) / 2^(i + 1)
        let denominator = 1u64 << (iteration + 1);
        let factor = (1u64 << (iteration + 2)) - 1;
        for duration in durations {
            let numerator = duration * factor;
            if numerator % denominator == 0 {
                dotted.push(numerator / denominator);
            }
        }
    }
    dotted
}

/// Default quantisation grid: quarter note down to a sixteenth (each shifted by powers of two),
/// followed by the matching triplet grid.
pub fn default_step_sizes(upper_shift: u32, lower_shift: u32) -> Vec<u64> {
    let settings = Settings::global();
    let mut steps = note_durations(1 << upper_shift, 4 << lower_shift, settings.ppqn);
    let triplets = tuplet_durations(&steps, 3, 2);
    steps.extend(triplets);
    steps
}

/// Every note value the engine considers valid: straight, tuplet and dotted.
pub fn default_note_values() -> Vec<u64> {
    let settings = Settings::global();
    let normal = note_durations(
        settings.note_value_upper_bound,
        settings.note_value_lower_bound,
        settings.ppqn,
    );
    let mut values = normal.clone();
    for &(numerator, denominator) in &settings.valid_tuplets {
        values.extend(tuplet_durations(&normal, numerator, denominator));
    }
    values.extend(dotted_durations(&normal, settings.dotted_iterations));
    values.retain(|&v| v > 0);
    values
}

/// Index of the candidate closest to `value`; earlier candidates win ties.
pub fn find_minimal_distance(value: u64, candidates: &[u64]) -> Option<usize> {
    let mut best: Option<(usize, u64)> = None;
    for (i, &candidate) in candidates.iter().enumerate() {
        let distance = candidate.abs_diff(value);
        if best.is_none_or(|(_, d)| distance < d) {
            best = Some((i, distance));
            if distance == 0 {
                break;
            }
        }
    }
    best.map(|(i, _)| i)
}

// ============================================================================
// Velocity bins
// ============================================================================

fn bin_size(velocity_max: u8, bins: u8) -> u64 {
    if bins == 0 {
        return u64::from(velocity_max);
    }
    (f64::from(velocity_max) / f64::from(bins)).round() as u64
}

/// Upper edges of the velocity bins.
pub fn velocity_bins(velocity_max: u8, bins: u8) -> Vec<u8> {
    let size = bin_size(velocity_max, bins);
    (0..u64::from(bins))
        .map(|i| {
            let edge = (i + 1) * size + size / 2;
            edge.min(u64::from(velocity_max)) as u8
        })
        .collect()
}

/// Index of the first bin whose upper edge is not below `velocity`.
pub fn bin_velocity(velocity: u8, bins: &[u8]) -> usize {
    bins.iter()
        .position(|&edge| velocity <= edge)
        .unwrap_or(bins.len())
}

/// Representative velocity of a bin.
pub fn velocity_from_bin(index: usize) -> u8 {
    let settings = Settings::global();
    let size = bin_size(settings.velocity_max, settings.velocity_bins);
    ((index as u64 + 1) * size).min(u64::from(settings.velocity_max)) as u8
}

/// Snap a velocity to its bin's representative value; silence stays silent.
pub fn digitise_velocity(velocity: u8) -> u8 {
    if velocity == 0 {
        return 0;
    }
    let settings = Settings::global();
    let bins = velocity_bins(settings.velocity_max, settings.velocity_bins);
    velocity_from_bin(bin_velocity(velocity, &bins))
}

pub fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 { a } else { gcd(b, a % b) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_durations() {
        assert_eq!(note_durations(4, 8, 24), vec![96, 48, 24, 12, 6, 3]);
        assert_eq!(note_durations(1, 4, 24), vec![24, 12, 6]);
    }

    #[test]
    fn test_tuplet_and_dotted_durations() {
        assert_eq!(tuplet_durations(&[24, 12, 6], 3, 2), vec![16, 8, 4]);
        assert_eq!(dotted_durations(&[96, 24, 3], 1), vec![144, 36]);
        assert_eq!(dotted_durations(&[96], 2), vec![144, 168]);
    }

    #[test]
    fn test_default_step_sizes() {
        assert_eq!(default_step_sizes(0, 0), vec![24, 12, 6, 16, 8, 4]);
        assert_eq!(default_step_sizes(0, 1), vec![24, 12, 6, 3, 16, 8, 4, 2]);
    }

    #[test]
    fn test_default_note_values_contains_dotted_and_triplets() {
        let values = default_note_values();
        for value in [96, 48, 24, 12, 6, 3, 64, 32, 16, 8, 4, 2, 144, 72, 36, 18, 9] {
            assert!(values.contains(&value), "missing {value}");
        }
    }

    #[test]
    fn test_find_minimal_distance_prefers_earlier() {
        assert_eq!(find_minimal_distance(18, &[12, 24]), Some(0));
        assert_eq!(find_minimal_distance(20, &[12, 24]), Some(1));
        assert_eq!(find_minimal_distance(5, &[]), None);
    }

    #[test]
    fn test_velocity_bins() {
        let bins = velocity_bins(127, 8);
        assert_eq!(bins, vec![24, 40, 56, 72, 88, 104, 120, 127]);
        assert_eq!(bin_velocity(1, &bins), 0);
        assert_eq!(bin_velocity(24, &bins), 0);
        assert_eq!(bin_velocity(25, &bins), 1);
        assert_eq!(bin_velocity(127, &bins), 7);
        assert_eq!(velocity_from_bin(0), 16);
        assert_eq!(velocity_from_bin(7), 127);
        assert_eq!(digitise_velocity(0), 0);
        assert_eq!(digitise_velocity(100), 96);
    }
}
