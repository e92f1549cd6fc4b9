use std::path::Path;
use std::sync::mpsc::Sender;

use super::board_sync::{BoardSynchronizer, StopReason, SyncStatus};
use super::caen_file::CaenFile;
use super::calibration::CalibrationTable;
use super::channel_map::ChannelMap;
use super::config::{Config, PulseAlgorithm};
use super::error::ProcessorError;
use super::event::Event;
use super::peak_finder::{count_channels_with_peaks, find_peaks, peak_window_pulses};
use super::pulse_finder::find_pulses;
use super::rq::{EventRq, RqSink, RqWriter, RunSummary};
use super::rq_writer::YamlRqWriter;
use super::trigger::TriggerSource;
use super::waveform::{ProcessedWaveform, WaveformProcessor};
use super::worker_status::WorkerStatus;

const PROGRESS_STEP: f32 = 0.01;

/// Range of event ids handed to the waveform processor, `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IdRange {
    pub start: u32,
    pub end: Option<u32>,
}

impl IdRange {
    pub fn new(start: u32, end: Option<u32>) -> Self {
        Self { start, end }
    }

    fn is_past_end(&self, event_id: u32) -> bool {
        self.end.is_some_and(|end| event_id >= end)
    }
}

/// Build the channel map and calibration for a run.
///
/// Any problem here means the run cannot produce meaningful output, so it is reported
/// before a single trigger is read.
pub fn load_run_setup(config: &Config) -> Result<(ChannelMap, CalibrationTable), ProcessorError> {
    config.validate()?;
    let channel_map = ChannelMap::new(config)?;
    let calibration = CalibrationTable::new(&config.calibration_path, &channel_map, config)?;
    log::info!(
        "Loaded calibration for {} channels ({} signal) from {}",
        channel_map.len(),
        channel_map.signal_channels().count(),
        config.calibration_path.display()
    );
    Ok((channel_map, calibration))
}

/// Pulse finding and feature extraction for one processed event
fn reconstruct_event(
    config: &Config,
    channel_map: &ChannelMap,
    processor: &WaveformProcessor,
    event: &Event,
    waveform: &ProcessedWaveform,
) -> EventRq {
    let (pulses, pulse_anomaly, pulses_truncated) = match config.pulse_algorithm {
        PulseAlgorithm::ChargeThreshold => {
            let mut search = find_pulses(
                waveform.sum.view(),
                config.pulse_threshold,
                config.integration_width,
                processor.charge_scale(),
                config.max_pulses,
            );
            for pulse in search.pulses.iter_mut() {
                pulse.coincidence =
                    processor.coincidence(waveform, pulse.start_sample, pulse.end_sample);
            }
            (search.pulses, search.anomaly, search.truncated)
        }
        PulseAlgorithm::PeakWindow => {
            let params = config.scipy_find_peaks;
            let spread = waveform.sum_baseline.spread;
            let peaks = find_peaks(
                waveform.sum.view(),
                params.height * spread,
                params.threshold * spread,
                params.distance,
            );
            let (mut pulses, truncated) = peak_window_pulses(
                waveform.sum.view(),
                &peaks,
                config.pre_pulse,
                config.post_pulse,
                processor.charge_scale(),
                config.max_pulses,
            );
            let channel_peaks: Vec<Vec<usize>> = channel_map
                .signal_channels()
                .map(|descriptor| {
                    let spread = waveform.baselines[descriptor.index].spread;
                    find_peaks(
                        waveform.channel(descriptor.index),
                        params.height * spread,
                        params.threshold * spread,
                        params.distance,
                    )
                })
                .collect();
            for pulse in pulses.iter_mut() {
                pulse.coincidence =
                    count_channels_with_peaks(&channel_peaks, pulse.start_sample, pulse.end_sample);
            }
            (pulses, false, truncated)
        }
    };

    if pulse_anomaly {
        log::warn!(
            "Event {} has a falling edge before its rising edge in the summed charge; no pulses kept",
            event.event_id
        );
    }
    if pulses_truncated {
        log::warn!(
            "Event {} has more than {} pulses; only the earliest were kept",
            event.event_id,
            config.max_pulses
        );
    }

    EventRq {
        event_id: event.event_id,
        trigger_time_tag: event.trigger_time_tag,
        saturated_channels: processor.saturated_channels(waveform),
        noise_rms: waveform.noise_rms.clone(),
        roi: processor.roi_features(waveform),
        pulses,
        pulse_anomaly,
        pulses_truncated,
    }
}

/// The main loop of the reconstruction.
///
/// Pulls board cycles from the synchronizer until it stops, processes every event in the
/// id range, and hands the results to the writer in order. Per-event problems are logged
/// and counted. A desync STOP ends the run normally with `StopReason::Desync` in the
/// summary. A trigger source failure still flushes the processed events and writes the
/// summary before the error is returned.
/// Returns the run summary and the sink.
pub fn process_run<T: TriggerSource, S: RqSink>(
    config: &Config,
    channel_map: &ChannelMap,
    calibration: &CalibrationTable,
    source: &mut T,
    mut writer: RqWriter<S>,
    range: IdRange,
    tx: &Sender<WorkerStatus>,
) -> Result<(RunSummary, S), ProcessorError> {
    let processor = WaveformProcessor::new(config, channel_map, calibration)?;
    let mut sync = BoardSynchronizer::new(config, channel_map.clone());

    let total_bytes = source.total_bytes();
    let mut next_report = PROGRESS_STEP;
    let mut n_dropped: u64 = 0;
    let mut n_anomalies: u64 = 0;
    let mut n_events: u64 = 0;

    let mut source_error = None;

    tx.send(WorkerStatus::new(0.0, 0))?;
    let stop_reason = loop {
        let status = match sync.step(source) {
            Ok(status) => status,
            Err(e) => {
                log::error!(
                    "Trigger source failed after event {:?}: {}",
                    sync.current_event_id(),
                    e
                );
                source_error = Some(e);
                break StopReason::SourceError;
            }
        };

        if total_bytes > 0 {
            let progress = source.bytes_read() as f32 / total_bytes as f32;
            if progress >= next_report {
                tx.send(WorkerStatus::new(progress, n_events))?;
                next_report = progress + PROGRESS_STEP;
            }
        }

        let event = match status {
            SyncStatus::Event(event) => event,
            SyncStatus::Skip(reason) => {
                log::warn!("Skipping event: {}", reason);
                continue;
            }
            SyncStatus::Stop(reason) => break reason,
        };

        if event.event_id < range.start {
            continue;
        }
        if range.is_past_end(event.event_id) {
            log::info!("Reached event {}, stopping.", event.event_id);
            break StopReason::EndId;
        }

        let waveform = match processor.process(&event) {
            Ok(waveform) => waveform,
            Err(e) => {
                log::warn!("{}. Dropping the event.", e);
                n_dropped += 1;
                continue;
            }
        };
        let rq = reconstruct_event(config, channel_map, &processor, &event, &waveform);
        if rq.pulse_anomaly {
            n_anomalies += 1;
        }
        writer.write_event(rq)?;
        n_events += 1;
    };

    if stop_reason == StopReason::Desync {
        log::error!(
            "Run stopped after event {:?} because the boards could not be resynchronized",
            sync.current_event_id()
        );
    }

    let summary = RunSummary {
        n_boards: config.n_boards,
        n_triggers: sync.n_triggers(),
        n_events,
        n_skipped: sync.n_skipped(),
        n_dropped,
        n_anomalies,
        stop_reason,
        active_channels: channel_map
            .channels()
            .iter()
            .map(|descriptor| descriptor.name.clone())
            .collect(),
    };
    let sink = writer.close(&summary)?;
    if let Some(e) = source_error {
        return Err(e.into());
    }
    tx.send(WorkerStatus::new(1.0, n_events))?;

    log::info!("Run finished: {}", summary.stop_reason);
    log::info!("  Boards:           {}", summary.n_boards);
    log::info!("  Triggers read:    {}", summary.n_triggers);
    log::info!("  Events written:   {}", summary.n_events);
    log::info!("  Events skipped:   {}", summary.n_skipped);
    log::info!("  Events dropped:   {}", summary.n_dropped);
    log::info!("  Pulse anomalies:  {}", summary.n_anomalies);
    log::info!("  Pass rate:        {:.2}%", summary.pass_rate() * 100.0);

    Ok((summary, sink))
}

/// The function to be called by a separate thread (typically the CLI).
///
/// Loads the calibration, opens the binary input, and writes `<input stem>.rq.yml` to the
/// output directory.
pub fn process(
    config: &Config,
    input_path: &Path,
    output_dir: &Path,
    range: IdRange,
    tx: Sender<WorkerStatus>,
) -> Result<RunSummary, ProcessorError> {
    let (channel_map, calibration) = load_run_setup(config)?;
    let mut source = CaenFile::open(input_path, config)?;
    log::info!(
        "Processing {} ({})",
        input_path.display(),
        human_bytes::human_bytes(source.total_bytes() as f64)
    );
    let writer = RqWriter::new(YamlRqWriter::new(input_path, output_dir)?, config.batch_size);
    let (summary, _) = process_run(
        config,
        &channel_map,
        &calibration,
        &mut source,
        writer,
        range,
        &tx,
    )?;
    Ok(summary)
}
