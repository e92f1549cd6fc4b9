use ndarray::{s, Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use super::baseline::{rolling_noise_rms, Baseline};
use super::calibration::CalibrationTable;
use super::channel_map::ChannelMap;
use super::config::{Config, Roi};
use super::error::{ConfigError, WaveformError};
use super::event::Event;

/// Trapezoidal sum with unit spacing
pub fn trapezoid(samples: ArrayView1<f64>) -> f64 {
    samples
        .iter()
        .zip(samples.iter().skip(1))
        .map(|(left, right)| 0.5 * (left + right))
        .sum()
}

/// Calibrated, aligned amplitudes of every channel of one event.
///
/// Signal channels are in photoelectrons per sample, auxiliary channels in mV. All
/// baselines are in the amplitude units of their channel.
#[derive(Debug, Clone)]
pub struct ProcessedWaveform {
    pub event_id: u32,
    /// channels x analysis samples
    pub amplitude: Array2<f64>,
    pub sum: Array1<f64>,
    pub baselines: Vec<Baseline>,
    pub sum_baseline: Baseline,
    pub saturated: Vec<bool>,
    pub noise_rms: Vec<f64>,
}

impl ProcessedWaveform {
    pub fn channel(&self, index: usize) -> ArrayView1<f64> {
        self.amplitude.row(index)
    }

    pub fn n_samples(&self) -> usize {
        self.sum.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRoiFeatures {
    pub channel: String,
    pub height: f64,
    pub area: f64,
    pub low: f64,
    pub pre_roi_spread: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SumRoiFeatures {
    pub height: f64,
    pub area: f64,
}

/// Features of one region of interest, per channel and summed over signal channels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoiFeatures {
    pub start: usize,
    pub end: usize,
    pub channels: Vec<ChannelRoiFeatures>,
    pub sum: SumRoiFeatures,
}

/// Integrate one trace over a ROI after re-baselining on the mean of the pre-ROI window.
///
/// Returns (height, area, low, pre_roi_spread).
pub fn integrate_roi(
    trace: ArrayView1<f64>,
    roi: &Roi,
    pre_roi_length: usize,
    charge_scale: f64,
) -> (f64, f64, f64, f64) {
    let pre_start = roi.start.saturating_sub(pre_roi_length);
    let pre = trace.slice(s![pre_start..roi.start]);
    let (local, pre_roi_spread) = if pre.is_empty() {
        (0.0, 0.0)
    } else {
        (
            pre.sum() / pre.len() as f64,
            Baseline::estimate(&pre.to_vec()).spread,
        )
    };

    let region = trace.slice(s![roi.start..roi.end]).mapv(|a| a - local);
    let height = region.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let low = region.iter().copied().fold(f64::INFINITY, f64::min);
    let area = trapezoid(region.view()) * charge_scale;
    (height, area, low, pre_roi_spread)
}

/// WaveformProcessor turns the raw traces of an Event into calibrated amplitudes.
///
/// Per channel: shift by the time correction, crop to the analysis window, convert to
/// amplitude units, and subtract a median baseline estimated away from the trigger.
#[derive(Debug)]
pub struct WaveformProcessor<'a> {
    channel_map: &'a ChannelMap,
    daq_length: usize,
    analysis_length: usize,
    trigger_position: usize,
    exclusion_before: usize,
    exclusion_after: usize,
    rolling_length: usize,
    sigma_above_baseline: f64,
    adc_full_scale: i16,
    charge_scale: f64,
    pre_roi_length: usize,
    rois: Vec<Roi>,
    shifts: Vec<usize>,
    scales: Vec<f64>,
}

impl<'a> WaveformProcessor<'a> {
    /// Create a processor for a run. Fails if the largest time correction would push the
    /// analysis window past the end of the acquisition window.
    pub fn new(
        config: &Config,
        channel_map: &'a ChannelMap,
        calibration: &CalibrationTable,
    ) -> Result<Self, ConfigError> {
        let max_shift = calibration.max_shift(config.sample_period_ns);
        let window_end = config.analysis_length.checked_add(max_shift);
        if window_end.map_or(true, |end| end > config.daq_length) {
            return Err(ConfigError::AnalysisWindowTooLong(
                config.analysis_length,
                max_shift,
                config.daq_length,
            ));
        }

        let adc_to_mv = config.adc_to_mv();
        let mut shifts = Vec::with_capacity(channel_map.len());
        let mut scales = Vec::with_capacity(channel_map.len());
        for descriptor in channel_map.channels() {
            let (shift, spe_mean) = calibration
                .get(descriptor.index)
                .map(|c| (c.shift_samples(config.sample_period_ns), c.spe_mean))
                .unwrap_or((0, 1.0));
            shifts.push(shift);
            scales.push(if descriptor.is_signal() {
                adc_to_mv / spe_mean
            } else {
                adc_to_mv
            });
        }

        Ok(Self {
            channel_map,
            daq_length: config.daq_length,
            analysis_length: config.analysis_length,
            trigger_position: config.trigger_position(),
            exclusion_before: config.baseline_exclusion.before,
            exclusion_after: config.baseline_exclusion.after,
            rolling_length: config.rolling_length,
            sigma_above_baseline: config.sigma_above_baseline,
            adc_full_scale: config.adc_full_scale(),
            charge_scale: config.charge_scale(),
            pre_roi_length: config.pre_roi_length,
            rois: config.rois(),
            shifts,
            scales,
        })
    }

    pub fn charge_scale(&self) -> f64 {
        self.charge_scale
    }

    fn exclusion_window(&self, shift_low: usize, shift_high: usize) -> (usize, usize) {
        let start = self
            .trigger_position
            .saturating_sub(shift_high)
            .saturating_sub(self.exclusion_before);
        let end = self.trigger_position.saturating_sub(shift_low) + self.exclusion_after;
        (start, end)
    }

    /// Align, calibrate and baseline-subtract every channel of an event
    pub fn process(&self, event: &Event) -> Result<ProcessedWaveform, WaveformError> {
        let n_channels = self.channel_map.len();
        let mut amplitude = Array2::<f64>::zeros((n_channels, self.analysis_length));
        let mut sum = Array1::<f64>::zeros(self.analysis_length);
        let mut baselines = Vec::with_capacity(n_channels);
        let mut saturated = Vec::with_capacity(n_channels);
        let mut noise_rms = Vec::with_capacity(n_channels);

        for descriptor in self.channel_map.channels() {
            let index = descriptor.index;
            let raw = event.traces.get(index).map_or(&[][..], |t| t.as_slice());
            if raw.len() != self.daq_length {
                return Err(WaveformError::MalformedTrace(
                    event.event_id,
                    descriptor.name.clone(),
                    descriptor.board_id(),
                    self.daq_length,
                    raw.len(),
                ));
            }

            let shift = self.shifts[index];
            let window = &raw[shift..shift + self.analysis_length];
            saturated.push(
                window
                    .iter()
                    .any(|sample| *sample <= 0 || *sample >= self.adc_full_scale),
            );

            let scale = self.scales[index];
            let values: Vec<f64> = window.iter().map(|s| *s as f64 * scale).collect();
            let (excl_start, excl_end) = self.exclusion_window(shift, shift);
            let baseline = Baseline::estimate_excluding(&values, excl_start, excl_end);
            let row: Array1<f64> = values.iter().map(|v| baseline.median - v).collect();

            noise_rms.push(rolling_noise_rms(
                row.as_slice().unwrap_or_default(),
                self.rolling_length,
            ));
            if descriptor.is_signal() {
                sum += &row;
            }
            amplitude.row_mut(index).assign(&row);
            baselines.push(baseline);
        }

        // The sum exclusion covers the trigger region of every aligned signal channel
        let signal_shifts: Vec<usize> = self
            .channel_map
            .signal_channels()
            .map(|d| self.shifts[d.index])
            .collect();
        let shift_low = signal_shifts.iter().copied().min().unwrap_or(0);
        let shift_high = signal_shifts.iter().copied().max().unwrap_or(0);
        let (excl_start, excl_end) = self.exclusion_window(shift_low, shift_high);
        let sum_baseline =
            Baseline::estimate_excluding(sum.as_slice().unwrap_or_default(), excl_start, excl_end);
        sum -= sum_baseline.median;

        Ok(ProcessedWaveform {
            event_id: event.event_id,
            amplitude,
            sum,
            baselines,
            sum_baseline,
            saturated,
            noise_rms,
        })
    }

    /// Height, area and low point of every channel in every configured ROI
    pub fn roi_features(&self, waveform: &ProcessedWaveform) -> Vec<RoiFeatures> {
        self.rois
            .iter()
            .map(|roi| {
                let mut sum = SumRoiFeatures::default();
                let channels = self
                    .channel_map
                    .channels()
                    .iter()
                    .map(|descriptor| {
                        let (height, area, low, pre_roi_spread) = integrate_roi(
                            waveform.channel(descriptor.index),
                            roi,
                            self.pre_roi_length,
                            self.charge_scale,
                        );
                        if descriptor.is_signal() {
                            sum.height += height;
                            sum.area += area;
                        }
                        ChannelRoiFeatures {
                            channel: descriptor.name.clone(),
                            height,
                            area,
                            low,
                            pre_roi_spread,
                        }
                    })
                    .collect();
                RoiFeatures {
                    start: roi.start,
                    end: roi.end,
                    channels,
                    sum,
                }
            })
            .collect()
    }

    /// Number of signal channels that rise above `sigma_above_baseline` times their own
    /// baseline spread within `[start, end)`
    pub fn coincidence(&self, waveform: &ProcessedWaveform, start: usize, end: usize) -> usize {
        let end = end.min(waveform.n_samples());
        let start = start.min(end);
        if start == end {
            return 0;
        }
        self.channel_map
            .signal_channels()
            .filter(|descriptor| {
                let threshold =
                    self.sigma_above_baseline * waveform.baselines[descriptor.index].spread;
                waveform
                    .channel(descriptor.index)
                    .slice(s![start..end])
                    .iter()
                    .any(|a| *a > threshold)
            })
            .count()
    }

    /// Names of the channels that touched either end of the ADC range
    pub fn saturated_channels(&self, waveform: &ProcessedWaveform) -> Vec<String> {
        self.channel_map
            .channels()
            .iter()
            .filter(|descriptor| waveform.saturated[descriptor.index])
            .map(|descriptor| descriptor.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::collections::BTreeMap;

    const CALIBRATION: &str =
        "ch_name,spe_mean,time_correction\nadc_b1_ch0,2.0,20.0\nadc_b1_ch1,1.0,0.0\n";

    fn test_config() -> Config {
        let mut config = Config::default();
        config.n_boards = 1;
        config.board_id_order = vec![1];
        config.active_channels = BTreeMap::from([(1, vec![0, 1, 2])]);
        config.non_signal_channels = vec![String::from("adc_b1_ch2")];
        config.board_time_offset = BTreeMap::new();
        config.daq_length = 200;
        config.analysis_length = 150;
        config.baseline_exclusion.before = 10;
        config.baseline_exclusion.after = 30;
        config.dynamic_range_mv = 16383.0; // one mV per count
        config.roi_start = vec![60];
        config.roi_end = vec![100];
        config.pre_roi_length = 20;
        config.rolling_length = 10;
        config
    }

    fn test_event() -> Event {
        let mut ch0 = vec![1000i16; 200];
        for sample in ch0[80..90].iter_mut() {
            *sample = 900;
        }
        let mut ch1 = vec![1000i16; 200];
        for sample in ch1[70..75].iter_mut() {
            *sample = 960;
        }
        let mut aux = vec![1000i16; 200];
        aux[5] = 16383;
        Event {
            event_id: 3,
            trigger_time_tag: 0,
            traces: vec![ch0, ch1, aux],
        }
    }

    #[test]
    fn test_alignment_and_calibration() {
        let config = test_config();
        let map = ChannelMap::new(&config).unwrap();
        let calibration = CalibrationTable::from_csv(CALIBRATION, &map, &config).unwrap();
        let processor = WaveformProcessor::new(&config, &map, &calibration).unwrap();
        let waveform = processor.process(&test_event()).unwrap();

        assert_eq!(waveform.amplitude.dim(), (3, 150));
        // Shifted by 10 samples and divided by an SPE mean of 2
        assert_approx_eq!(waveform.amplitude[[0, 70]], 50.0);
        assert_approx_eq!(waveform.amplitude[[0, 80]], 0.0);
        assert_approx_eq!(waveform.amplitude[[1, 72]], 40.0);
        assert_approx_eq!(waveform.sum[72], 90.0);
        assert_approx_eq!(waveform.sum[78], 50.0);
        assert_approx_eq!(waveform.baselines[0].median, 500.0);
        assert_approx_eq!(waveform.baselines[2].median, 1000.0);
        assert_eq!(waveform.saturated, vec![false, false, true]);
        assert_eq!(processor.saturated_channels(&waveform), vec!["adc_b1_ch2"]);
    }

    #[test]
    fn test_roi_sum_matches_sum_channel() {
        let config = test_config();
        let map = ChannelMap::new(&config).unwrap();
        let calibration = CalibrationTable::from_csv(CALIBRATION, &map, &config).unwrap();
        let processor = WaveformProcessor::new(&config, &map, &calibration).unwrap();
        let waveform = processor.process(&test_event()).unwrap();
        let features = processor.roi_features(&waveform);

        assert_eq!(features.len(), 1);
        let roi = &features[0];
        assert_approx_eq!(roi.channels[0].area, 20.0);
        assert_approx_eq!(roi.channels[0].height, 50.0);
        assert_approx_eq!(roi.channels[1].area, 8.0);
        assert_approx_eq!(roi.sum.area, 28.0);

        let channel_total: f64 = roi
            .channels
            .iter()
            .zip(map.channels())
            .filter(|(_, d)| d.is_signal())
            .map(|(f, _)| f.area)
            .sum();
        let (_, sum_area, _, _) = integrate_roi(
            waveform.sum.view(),
            &config.rois()[0],
            config.pre_roi_length,
            processor.charge_scale(),
        );
        assert_approx_eq!(channel_total, sum_area);
    }

    #[test]
    fn test_coincidence() {
        let config = test_config();
        let map = ChannelMap::new(&config).unwrap();
        let calibration = CalibrationTable::from_csv(CALIBRATION, &map, &config).unwrap();
        let processor = WaveformProcessor::new(&config, &map, &calibration).unwrap();
        let waveform = processor.process(&test_event()).unwrap();
        assert_eq!(processor.coincidence(&waveform, 70, 80), 2);
        assert_eq!(processor.coincidence(&waveform, 76, 80), 1);
        assert_eq!(processor.coincidence(&waveform, 0, 50), 0);
        assert_eq!(processor.coincidence(&waveform, 140, 400), 0);
    }

    #[test]
    fn test_malformed_trace() {
        let config = test_config();
        let map = ChannelMap::new(&config).unwrap();
        let calibration = CalibrationTable::from_csv(CALIBRATION, &map, &config).unwrap();
        let processor = WaveformProcessor::new(&config, &map, &calibration).unwrap();
        let mut event = test_event();
        event.traces[1].pop();
        assert!(matches!(
            processor.process(&event),
            Err(WaveformError::MalformedTrace(3, name, 1, 200, 199)) if name == "adc_b1_ch1"
        ));
    }

    #[test]
    fn test_window_too_long() {
        let mut config = test_config();
        config.analysis_length = 195;
        let map = ChannelMap::new(&config).unwrap();
        let calibration = CalibrationTable::from_csv(CALIBRATION, &map, &config).unwrap();
        assert!(matches!(
            WaveformProcessor::new(&config, &map, &calibration),
            Err(ConfigError::AnalysisWindowTooLong(195, 10, 200))
        ));
    }

    #[test]
    fn test_huge_time_correction() {
        let config = test_config();
        let map = ChannelMap::new(&config).unwrap();
        let calibration = CalibrationTable::from_csv(
            "ch_name,spe_mean,time_correction\nadc_b1_ch0,1.0,1e30\nadc_b1_ch1,1.0,0.0\n",
            &map,
            &config,
        )
        .unwrap();
        assert!(matches!(
            WaveformProcessor::new(&config, &map, &calibration),
            Err(ConfigError::AnalysisWindowTooLong(150, usize::MAX, 200))
        ));
    }
}
