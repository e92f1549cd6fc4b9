//! # libdrop
//!
//! libdrop is the event reconstruction core of DROP (Data Reconstruction Offline
//! Package), written in Rust. It reads the interleaved per-board records written by a set
//! of daisy-chained CAEN V1730 digitizers, synchronizes them into whole detector events,
//! converts raw samples into calibrated, time-aligned amplitudes, and extracts reduced
//! quantities (ROI integrals and pulses) for every event.
//!
//! ## Installation
//!
//! The only method of install is from source. If you have not used Rust before, see the
//! [Rust docs](https://www.rust-lang.org/tools/install) to install the tool chain.
//!
//! To build and install the CLI use `cargo install --path ./drop_cli` from the top level
//! of the repository. Run `drop_cli --help` for usage.
//!
//! ## Pipeline
//!
//! ```text
//! CaenFile (TriggerSource) -> BoardSynchronizer -> WaveformProcessor -> pulse finding -> RqSink
//! ```
//!
//! - [`caen_file::CaenFile`] reads one board record at a time and undoes the trigger time
//! tag rollover. Any type implementing [`trigger::TriggerSource`] can stand in for it.
//! - [`board_sync::BoardSynchronizer`] reads one board cycle per step, in `board_id_order`,
//! and yields an [`event::Event`], a SKIP (one board out of order; the event is dropped and
//! the offending trigger starts the next cycle) or a STOP (end of stream or unrecoverable
//! desync).
//! - [`waveform::WaveformProcessor`] shifts each channel by its time correction, crops it
//! to the analysis window, subtracts a median baseline estimated away from the trigger,
//! divides signal channels by their SPE mean, and builds the summed channel.
//! - [`pulse_finder`] finds pulses as threshold crossings of a sliding-window charge
//! series. [`peak_finder`] provides the alternate peak-window mode.
//! - [`rq::RqWriter`] batches the per-event results for an [`rq::RqSink`] and writes a run
//! summary at the end.
//!
//! Per-event problems (out of order boards, malformed traces, inconsistent pulse edges)
//! are logged with the event id and counted; they never stop a run. Configuration and
//! calibration problems stop the run before the first trigger is read.
//!
//! ## Configuration
//!
//! Configurations are YAML. A template can be generated with `drop_cli new`. Fields that
//! are left out take their default values. The main fields are:
//!
//! ```yml
//! n_boards: 3
//! board_id_order: [1, 2, 3]
//! active_channels:
//!   1: [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15]
//!   2: [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15]
//!   3: [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15]
//! non_signal_channels: [adc_b3_ch15]
//! calibration_path: /path/to/calibration.csv
//! board_time_offset: {1: 144.0, 2: 96.0, 3: 48.0}
//! daq_software: tool_daq
//! extended_time_tag: false
//! daq_length: 2000
//! analysis_length: 1800
//! post_trigger: 0.5
//! baseline_exclusion: {before: 50, after: 200}
//! rolling_length: 100
//! sigma_above_baseline: 3.0
//! roi_start: [700]
//! roi_end: [900]
//! pre_roi_length: 50
//! pulse_algorithm: charge_threshold
//! pulse_threshold: 10.0
//! integration_width: 30
//! max_pulses: 100
//! pre_pulse: 10
//! post_pulse: 50
//! scipy_find_peaks: {distance: 20, threshold: 0.0, height: 5.0}
//! batch_size: 1000
//! ```
//!
//! ### Calibration Format
//!
//! The calibration is a CSV file with a header row:
//!
//! ```csv
//! ch_name,spe_mean,time_correction
//! adc_b1_ch0,1.62,4.0
//! ```
//!
//! Every signal channel needs a row with a positive `spe_mean` (pC). Channels listed in
//! `non_signal_channels` need no row. The board's `board_time_offset` is added to each
//! `time_correction` (ns) before it is converted to a sample shift.
//!
//! ## Output
//!
//! The CLI writes `<input stem>.rq.yml` to the output directory. Each flushed batch is a
//! YAML document holding a list of events; the last document is the run summary.
pub mod baseline;
pub mod board_sync;
pub mod caen_file;
pub mod calibration;
pub mod channel;
pub mod channel_map;
pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod peak_finder;
pub mod process;
pub mod pulse_finder;
pub mod rq;
pub mod rq_writer;
pub mod trigger;
pub mod waveform;
pub mod worker_status;
