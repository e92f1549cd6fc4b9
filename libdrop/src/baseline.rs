use super::constants::{LOWER_SIGMA_QUANTILE, MEDIAN_QUANTILE, UPPER_SIGMA_QUANTILE};

/// Quantile of already sorted data, interpolating linearly between order statistics
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

/// Flat baseline estimate of a trace
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Baseline {
    pub median: f64,
    /// Half the distance between the +-1 sigma quantiles
    pub spread: f64,
}

impl Baseline {
    /// Estimate the baseline from every sample
    pub fn estimate(samples: &[f64]) -> Self {
        let mut sorted = samples.to_vec();
        sorted.sort_by(f64::total_cmp);
        let (Some(low), Some(median), Some(high)) = (
            quantile(&sorted, LOWER_SIGMA_QUANTILE),
            quantile(&sorted, MEDIAN_QUANTILE),
            quantile(&sorted, UPPER_SIGMA_QUANTILE),
        ) else {
            return Self::default();
        };
        Self {
            median,
            spread: (high - low).abs() / 2.0,
        }
    }

    /// Estimate the baseline from the samples outside `[exclude_start, exclude_end)`.
    ///
    /// Falls back to the whole trace if the exclusion covers everything.
    pub fn estimate_excluding(samples: &[f64], exclude_start: usize, exclude_end: usize) -> Self {
        let start = exclude_start.min(samples.len());
        let end = exclude_end.clamp(start, samples.len());
        if start == 0 && end == samples.len() {
            return Self::estimate(samples);
        }
        let mut kept = Vec::with_capacity(samples.len() - (end - start));
        kept.extend_from_slice(&samples[..start]);
        kept.extend_from_slice(&samples[end..]);
        Self::estimate(&kept)
    }
}

/// RMS of a trace about its trailing moving average of `length` samples.
///
/// The first `length - 1` samples have no full window and are compared with themselves.
pub fn rolling_noise_rms(samples: &[f64], length: usize) -> f64 {
    if samples.is_empty() || length <= 1 {
        return 0.0;
    }
    let mut window_sum = 0.0;
    let mut sum_squares = 0.0;
    for (idx, value) in samples.iter().enumerate() {
        window_sum += value;
        if idx >= length {
            window_sum -= samples[idx - length];
        }
        if idx + 1 >= length {
            let residual = value - window_sum / length as f64;
            sum_squares += residual * residual;
        }
    }
    (sum_squares / samples.len() as f64).sqrt()
}
