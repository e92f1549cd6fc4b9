use ndarray::{s, ArrayView1};
use serde::{Deserialize, Serialize};

use super::waveform::trapezoid;

/// One signal excursion, in analysis-window sample coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pulse {
    pub id: usize,
    pub start_sample: usize,
    pub end_sample: usize,
    pub area_integral: f64,
    pub peak_height: f64,
    pub peak_sample_index: usize,
    /// Signal channels active inside the pulse
    pub coincidence: usize,
}

/// Result of a pulse search over one waveform
#[derive(Debug, Clone, Default)]
pub struct PulseSearch {
    pub pulses: Vec<Pulse>,
    /// Sliding-window charge, indexed from the first full window
    pub charge: Vec<f64>,
    /// A falling edge came before its rising edge; the pulse list was discarded
    pub anomaly: bool,
    /// More than the allowed number of pulses were found; only the earliest were kept
    pub truncated: bool,
}

/// Sliding-window trapezoidal charge.
///
/// Entry j covers samples `[j, j + 2 * half_width)`, i.e. it is centred on sample
/// `j + half_width`.
pub fn charge_series(amplitude: ArrayView1<f64>, half_width: usize, charge_scale: f64) -> Vec<f64> {
    let n = amplitude.len();
    if half_width == 0 || n < 2 * half_width {
        return vec![];
    }
    (half_width..n - half_width)
        .map(|i| trapezoid(amplitude.slice(s![i - half_width..i + half_width])) * charge_scale)
        .collect()
}

/// Threshold crossings of a charge series as (rising, falling) edge indices.
///
/// Rising at n when `q[n] < threshold <= q[n+1]`, falling at n+1 when
/// `q[n] >= threshold > q[n+1]`.
pub fn find_edges(charge: &[f64], threshold: f64) -> (Vec<usize>, Vec<usize>) {
    let mut rising = Vec::new();
    let mut falling = Vec::new();
    for (n, pair) in charge.windows(2).enumerate() {
        if pair[0] < threshold && threshold <= pair[1] {
            rising.push(n);
        } else if pair[0] >= threshold && threshold > pair[1] {
            falling.push(n + 1);
        }
    }
    (rising, falling)
}

/// Balance the edge lists. An extra falling edge closes a pulse that began before the
/// window and is dropped; a missing one is closed at `end`.
pub fn reconcile_edges(rising: &[usize], falling: &mut Vec<usize>, end: usize) {
    if falling.len() > rising.len() {
        falling.remove(0);
    } else if falling.len() < rising.len() {
        falling.push(end);
    }
}

/// Pair edges in order. None if any falling edge precedes its rising edge.
pub fn pair_edges(rising: &[usize], falling: &[usize]) -> Option<Vec<(usize, usize)>> {
    let pairs: Vec<(usize, usize)> = rising.iter().copied().zip(falling.iter().copied()).collect();
    if pairs.iter().any(|(rise, fall)| fall < rise) {
        None
    } else {
        Some(pairs)
    }
}

/// Charge-integration threshold crossing search.
///
/// `integration_width` is the full sliding window; its half width maps charge indices
/// back into sample indices. Pulses come out ordered by start sample with at most
/// `max_pulses` kept. Coincidence is left at zero for the caller to fill.
pub fn find_pulses(
    amplitude: ArrayView1<f64>,
    threshold: f64,
    integration_width: usize,
    charge_scale: f64,
    max_pulses: usize,
) -> PulseSearch {
    let n_samples = amplitude.len();
    let half_width = integration_width / 2;
    let charge = charge_series(amplitude, half_width, charge_scale);
    let (rising, mut falling) = find_edges(&charge, threshold);
    reconcile_edges(&rising, &mut falling, n_samples);

    let Some(pairs) = pair_edges(&rising, &falling) else {
        return PulseSearch {
            pulses: vec![],
            charge,
            anomaly: true,
            truncated: false,
        };
    };

    let mut pulses = Vec::new();
    let mut truncated = false;
    for (rise, fall) in pairs {
        if fall == rise {
            log::debug!("Dropping zero width pulse at charge index {}", rise);
            continue;
        }
        if pulses.len() == max_pulses {
            truncated = true;
            break;
        }
        let window = &charge[rise..fall.min(charge.len())];
        let (peak_offset, peak_height) = window.iter().enumerate().fold(
            (0, f64::NEG_INFINITY),
            |(best_idx, best), (idx, q)| if *q > best { (idx, *q) } else { (best_idx, best) },
        );
        let start_sample = rise + half_width;
        let end_sample = (fall + half_width).min(n_samples);
        pulses.push(Pulse {
            id: pulses.len(),
            start_sample,
            end_sample,
            area_integral: trapezoid(amplitude.slice(s![start_sample..end_sample])) * charge_scale,
            peak_height,
            peak_sample_index: peak_offset + rise + half_width,
            coincidence: 0,
        });
    }

    PulseSearch {
        pulses,
        charge,
        anomaly: false,
        truncated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use ndarray::Array1;

    fn rectangle(n: usize, start: usize, end: usize, height: f64) -> Array1<f64> {
        Array1::from_shape_fn(n, |i| if (start..end).contains(&i) { height } else { 0.0 })
    }

    #[test]
    fn test_single_rectangle() {
        let trace = rectangle(300, 100, 110, 20.0);
        let search = find_pulses(trace.view(), 10.0, 4, 1.0, 100);
        assert!(!search.anomaly);
        assert_eq!(search.pulses.len(), 1);
        let pulse = &search.pulses[0];
        assert_eq!(pulse.start_sample, 98);
        assert_eq!(pulse.end_sample, 112);
        // Full window over the plateau: three unit intervals of height 20
        assert_approx_eq!(pulse.peak_height, 60.0);
        assert_eq!(pulse.peak_sample_index, 102);
        // trapezoid over [98, 112): half steps at both rectangle edges
        assert_approx_eq!(pulse.area_integral, 180.0 + 20.0);
        assert_eq!(search.charge.len(), 296);
    }

    #[test]
    fn test_pulses_are_ordered() {
        let mut trace = rectangle(1000, 100, 110, 20.0);
        trace += &rectangle(1000, 400, 430, 5.0);
        trace += &rectangle(1000, 700, 705, 50.0);
        let search = find_pulses(trace.view(), 10.0, 6, 1.0, 100);
        assert_eq!(search.pulses.len(), 3);
        for pair in search.pulses.windows(2) {
            assert!(pair[0].start_sample < pair[1].start_sample);
            assert!(pair[0].end_sample <= pair[1].start_sample);
        }
        for (idx, pulse) in search.pulses.iter().enumerate() {
            assert_eq!(pulse.id, idx);
            assert!(pulse.end_sample > pulse.start_sample);
        }
    }

    #[test]
    fn test_extra_falling_edge_dropped() {
        let charge = [20.0, 20.0, 5.0, 5.0, 20.0, 20.0, 5.0];
        let (rising, mut falling) = find_edges(&charge, 10.0);
        assert_eq!(rising, vec![3]);
        assert_eq!(falling, vec![2, 6]);
        reconcile_edges(&rising, &mut falling, 100);
        assert_eq!(falling, vec![6]);
        assert_eq!(pair_edges(&rising, &falling), Some(vec![(3, 6)]));
    }

    #[test]
    fn test_missing_falling_edge_appended() {
        let charge = [5.0, 20.0, 20.0, 5.0, 5.0, 20.0, 20.0];
        let (rising, mut falling) = find_edges(&charge, 10.0);
        assert_eq!(rising, vec![0, 4]);
        assert_eq!(falling, vec![3]);
        reconcile_edges(&rising, &mut falling, 100);
        assert_eq!(falling, vec![3, 100]);
    }

    #[test]
    fn test_open_pulse_runs_to_end() {
        let trace = rectangle(50, 40, 50, 20.0);
        let search = find_pulses(trace.view(), 10.0, 4, 1.0, 100);
        assert_eq!(search.pulses.len(), 1);
        assert_eq!(search.pulses[0].start_sample, 38);
        assert_eq!(search.pulses[0].end_sample, 50);
    }

    #[test]
    fn test_falling_before_rising_is_anomaly() {
        let mut trace = rectangle(30, 0, 10, 20.0);
        trace += &rectangle(30, 20, 30, 20.0);
        let search = find_pulses(trace.view(), 10.0, 4, 1.0, 100);
        assert!(search.anomaly);
        assert!(search.pulses.is_empty());
        assert_eq!(search.charge.len(), 26);
    }

    #[test]
    fn test_pulse_cap() {
        let mut trace = Array1::<f64>::zeros(400);
        for k in 0..10 {
            trace += &rectangle(400, 20 + 30 * k, 30 + 30 * k, 20.0);
        }
        let search = find_pulses(trace.view(), 10.0, 4, 1.0, 4);
        assert!(search.truncated);
        assert_eq!(search.pulses.len(), 4);
        assert_eq!(search.pulses[0].start_sample, 18);
    }

    #[test]
    fn test_short_trace() {
        let trace = Array1::from(vec![1.0, 2.0]);
        let search = find_pulses(trace.view(), 1.0, 4, 1.0, 100);
        assert!(search.charge.is_empty());
        assert!(search.pulses.is_empty());
        assert!(!search.anomaly);
    }
}
