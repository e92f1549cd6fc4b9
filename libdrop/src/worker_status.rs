/// Progress message sent from the processing thread
#[derive(Debug, Clone, Default)]
pub struct WorkerStatus {
    /// Fraction of the input consumed, 0 to 1
    pub progress: f32,
    pub events_processed: u64,
}

impl WorkerStatus {
    pub fn new(progress: f32, events_processed: u64) -> Self {
        Self {
            progress,
            events_processed,
        }
    }
}
