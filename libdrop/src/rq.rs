use serde::{Deserialize, Serialize};

use super::board_sync::StopReason;
use super::error::RqWriterError;
use super::pulse_finder::Pulse;
use super::waveform::RoiFeatures;

/// Reduced quantities of one event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRq {
    pub event_id: u32,
    pub trigger_time_tag: u64,
    pub saturated_channels: Vec<String>,
    pub noise_rms: Vec<f64>,
    pub roi: Vec<RoiFeatures>,
    pub pulses: Vec<Pulse>,
    pub pulse_anomaly: bool,
    pub pulses_truncated: bool,
}

/// Written once when a run finishes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub n_boards: usize,
    pub n_triggers: u64,
    pub n_events: u64,
    pub n_skipped: u64,
    pub n_dropped: u64,
    pub n_anomalies: u64,
    pub stop_reason: StopReason,
    pub active_channels: Vec<String>,
}

impl RunSummary {
    /// Fraction of triggers that ended up in an emitted event
    pub fn pass_rate(&self) -> f64 {
        if self.n_triggers == 0 {
            return 0.0;
        }
        (self.n_events * self.n_boards as u64) as f64 / self.n_triggers as f64
    }
}

/// Destination for reduced quantities
pub trait RqSink {
    /// Persist a batch of events, in order
    fn write_batch(&mut self, batch: &[EventRq]) -> Result<(), RqWriterError>;

    /// Persist the run summary. Called exactly once, after the last batch.
    fn write_run_summary(&mut self, summary: &RunSummary) -> Result<(), RqWriterError>;
}

/// Sink that keeps everything in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    pub batches: Vec<Vec<EventRq>>,
    pub summary: Option<RunSummary>,
}

impl MemorySink {
    pub fn events(&self) -> impl Iterator<Item = &EventRq> {
        self.batches.iter().flatten()
    }
}

impl RqSink for MemorySink {
    fn write_batch(&mut self, batch: &[EventRq]) -> Result<(), RqWriterError> {
        self.batches.push(batch.to_vec());
        Ok(())
    }

    fn write_run_summary(&mut self, summary: &RunSummary) -> Result<(), RqWriterError> {
        self.summary = Some(summary.clone());
        Ok(())
    }
}

/// Collects EventRqs into fixed-size batches before handing them to a sink
#[derive(Debug)]
pub struct RqWriter<S: RqSink> {
    sink: S,
    batch: Vec<EventRq>,
    batch_size: usize,
    n_written: u64,
}

impl<S: RqSink> RqWriter<S> {
    pub fn new(sink: S, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            sink,
            batch: Vec::with_capacity(batch_size),
            batch_size,
            n_written: 0,
        }
    }

    /// Queue an event, flushing if the batch is full
    pub fn write_event(&mut self, rq: EventRq) -> Result<(), RqWriterError> {
        self.batch.push(rq);
        if self.batch.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Hand any queued events to the sink
    pub fn flush(&mut self) -> Result<(), RqWriterError> {
        if self.batch.is_empty() {
            return Ok(());
        }
        self.sink.write_batch(&self.batch)?;
        self.n_written += self.batch.len() as u64;
        log::debug!("Flushed {} events to the RQ sink", self.batch.len());
        self.batch.clear();
        Ok(())
    }

    /// Events handed to the sink so far
    pub fn n_written(&self) -> u64 {
        self.n_written
    }

    /// Flush the last partial batch, write the summary, and give back the sink
    pub fn close(mut self, summary: &RunSummary) -> Result<S, RqWriterError> {
        self.flush()?;
        self.sink.write_run_summary(summary)?;
        Ok(self.sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rq(event_id: u32) -> EventRq {
        EventRq {
            event_id,
            trigger_time_tag: 0,
            saturated_channels: vec![],
            noise_rms: vec![],
            roi: vec![],
            pulses: vec![],
            pulse_anomaly: false,
            pulses_truncated: false,
        }
    }

    fn summary() -> RunSummary {
        RunSummary {
            n_boards: 3,
            n_triggers: 12,
            n_events: 3,
            n_skipped: 1,
            n_dropped: 0,
            n_anomalies: 0,
            stop_reason: StopReason::EndOfStream,
            active_channels: vec![],
        }
    }

    #[test]
    fn test_batching() {
        let mut writer = RqWriter::new(MemorySink::default(), 2);
        for id in 0..5 {
            writer.write_event(rq(id)).unwrap();
        }
        assert_eq!(writer.n_written(), 4);
        let sink = writer.close(&summary()).unwrap();
        let sizes: Vec<usize> = sink.batches.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        let ids: Vec<u32> = sink.events().map(|e| e.event_id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
        assert!(sink.summary.is_some());
    }

    #[test]
    fn test_pass_rate() {
        assert_eq!(summary().pass_rate(), 0.75);
        let mut empty = summary();
        empty.n_triggers = 0;
        assert_eq!(empty.pass_rate(), 0.0);
    }
}
