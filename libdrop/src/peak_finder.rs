use ndarray::{s, ArrayView1};

use super::pulse_finder::Pulse;
use super::waveform::trapezoid;

/// Local maxima of a trace. A flat top counts once, at its middle sample. The first and
/// last samples are never peaks.
pub fn local_maxima(x: ArrayView1<f64>) -> Vec<usize> {
    let mut peaks = Vec::new();
    let n = x.len();
    if n < 3 {
        return peaks;
    }
    let mut i = 1;
    while i < n - 1 {
        if x[i - 1] < x[i] {
            let mut ahead = i + 1;
            while ahead < n - 1 && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                let right = ahead - 1;
                peaks.push((i + right) / 2);
                i = ahead;
                continue;
            }
        }
        i += 1;
    }
    peaks
}

/// Keep the tallest peaks so that no two kept peaks are closer than `distance` samples
fn select_by_distance(x: ArrayView1<f64>, peaks: &[usize], distance: usize) -> Vec<usize> {
    if distance <= 1 || peaks.len() < 2 {
        return peaks.to_vec();
    }
    let mut order: Vec<usize> = (0..peaks.len()).collect();
    order.sort_by(|a, b| x[peaks[*a]].total_cmp(&x[peaks[*b]]));
    let mut keep = vec![true; peaks.len()];
    for &position in order.iter().rev() {
        if !keep[position] {
            continue;
        }
        let peak = peaks[position];
        for left in (0..position).rev() {
            if peak - peaks[left] >= distance {
                break;
            }
            keep[left] = false;
        }
        for right in position + 1..peaks.len() {
            if peaks[right] - peak >= distance {
                break;
            }
            keep[right] = false;
        }
    }
    peaks
        .iter()
        .zip(keep)
        .filter_map(|(peak, kept)| kept.then_some(*peak))
        .collect()
}

/// Peaks at least `height` tall, standing at least `threshold` above both neighbours,
/// and at least `distance` samples from any taller kept peak.
pub fn find_peaks(x: ArrayView1<f64>, height: f64, threshold: f64, distance: usize) -> Vec<usize> {
    let candidates: Vec<usize> = local_maxima(x)
        .into_iter()
        .filter(|p| x[*p] >= height)
        .filter(|p| (x[*p] - x[p - 1]).min(x[*p] - x[p + 1]) >= threshold)
        .collect();
    select_by_distance(x, &candidates, distance)
}

/// Build fixed-window pulses around peaks of a trace.
///
/// Each window is `[peak - pre_pulse, peak + post_pulse]`, clamped to the trace. Returns
/// the pulses and whether the list was cut at `max_pulses`.
pub fn peak_window_pulses(
    trace: ArrayView1<f64>,
    peaks: &[usize],
    pre_pulse: usize,
    post_pulse: usize,
    charge_scale: f64,
    max_pulses: usize,
) -> (Vec<Pulse>, bool) {
    let n = trace.len();
    let truncated = peaks.len() > max_pulses;
    let pulses = peaks
        .iter()
        .take(max_pulses)
        .enumerate()
        .map(|(id, peak)| {
            let start_sample = peak.saturating_sub(pre_pulse);
            let end_sample = (peak + post_pulse + 1).min(n);
            let window = trace.slice(s![start_sample..end_sample]);
            let (offset, peak_height) = window.iter().enumerate().fold(
                (0, f64::NEG_INFINITY),
                |(best_idx, best), (idx, a)| if *a > best { (idx, *a) } else { (best_idx, best) },
            );
            Pulse {
                id,
                start_sample,
                end_sample,
                area_integral: trapezoid(window) * charge_scale,
                peak_height,
                peak_sample_index: start_sample + offset,
                coincidence: 0,
            }
        })
        .collect();
    (pulses, truncated)
}

/// Number of channels with at least one peak in `[start, end)`
pub fn count_channels_with_peaks(channel_peaks: &[Vec<usize>], start: usize, end: usize) -> usize {
    channel_peaks
        .iter()
        .filter(|peaks| peaks.iter().any(|p| (start..end).contains(p)))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use ndarray::Array1;

    #[test]
    fn test_local_maxima() {
        let x = Array1::from(vec![0.0, 1.0, 0.0, 2.0, 0.0, 3.0, 0.0]);
        assert_eq!(local_maxima(x.view()), vec![1, 3, 5]);
        let plateau = Array1::from(vec![0.0, 2.0, 2.0, 2.0, 0.0]);
        assert_eq!(local_maxima(plateau.view()), vec![2]);
        let edge = Array1::from(vec![3.0, 1.0, 0.0, 0.0]);
        assert!(local_maxima(edge.view()).is_empty());
        // A rising plateau that never falls is not a peak
        let shelf = Array1::from(vec![0.0, 2.0, 2.0, 2.0]);
        assert!(local_maxima(shelf.view()).is_empty());
    }

    #[test]
    fn test_height_and_threshold() {
        let x = Array1::from(vec![0.0, 1.0, 0.0, 2.0, 0.0, 3.0, 0.0]);
        assert_eq!(find_peaks(x.view(), 1.5, 0.0, 1), vec![3, 5]);
        let y = Array1::from(vec![0.0, 1.0, 0.5, 3.0, 2.9, 0.0]);
        assert_eq!(find_peaks(y.view(), 0.0, 0.2, 1), vec![1]);
    }

    #[test]
    fn test_distance_prefers_taller() {
        let x = Array1::from(vec![0.0, 5.0, 0.0, 4.0, 0.0, 6.0, 0.0]);
        assert_eq!(find_peaks(x.view(), 0.0, 0.0, 3), vec![1, 5]);
        assert_eq!(find_peaks(x.view(), 0.0, 0.0, 5), vec![5]);
    }

    #[test]
    fn test_window_pulses() {
        let mut trace = Array1::<f64>::zeros(100);
        trace[50] = 10.0;
        trace[51] = 4.0;
        trace[95] = 8.0;
        let peaks = find_peaks(trace.view(), 1.0, 0.0, 1);
        assert_eq!(peaks, vec![50, 95]);
        let (pulses, truncated) = peak_window_pulses(trace.view(), &peaks, 10, 20, 0.5, 100);
        assert!(!truncated);
        assert_eq!(pulses[0].start_sample, 40);
        assert_eq!(pulses[0].end_sample, 71);
        assert_eq!(pulses[0].peak_sample_index, 50);
        assert_approx_eq!(pulses[0].peak_height, 10.0);
        // trapezoid: 5 + 7 + 2 = 14
        assert_approx_eq!(pulses[0].area_integral, 7.0);
        assert_eq!(pulses[1].end_sample, 100);

        let (capped, truncated) = peak_window_pulses(trace.view(), &peaks, 10, 20, 0.5, 1);
        assert!(truncated);
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn test_coincidence_count() {
        let channel_peaks = vec![vec![10, 60], vec![45], vec![]];
        assert_eq!(count_channels_with_peaks(&channel_peaks, 40, 70), 2);
        assert_eq!(count_channels_with_peaks(&channel_peaks, 0, 5), 0);
    }
}
