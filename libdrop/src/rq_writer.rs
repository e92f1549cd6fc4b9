use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::error::RqWriterError;
use super::rq::{EventRq, RqSink, RunSummary};

/// Writes reduced quantities as a stream of YAML documents.
///
/// Each flushed batch becomes one document holding a list of events; the run summary is
/// the final document.
#[derive(Debug)]
pub struct YamlRqWriter {
    path: PathBuf,
    file: BufWriter<File>,
}

impl YamlRqWriter {
    /// Create `<output_dir>/<input stem>.rq.yml`
    pub fn new(input_path: &Path, output_dir: &Path) -> Result<Self, RqWriterError> {
        let stem = input_path
            .file_stem()
            .ok_or_else(|| RqWriterError::BadInputPath(input_path.to_path_buf()))?;
        std::fs::create_dir_all(output_dir)?;
        let path = output_dir.join(format!("{}.rq.yml", stem.to_string_lossy()));
        let file = BufWriter::new(File::create(&path)?);
        log::info!("Writing reduced quantities to {}", path.display());
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_document<T: serde::Serialize + ?Sized>(&mut self, value: &T) -> Result<(), RqWriterError> {
        self.file.write_all(b"---\n")?;
        self.file.write_all(serde_yaml::to_string(value)?.as_bytes())?;
        Ok(())
    }
}

impl RqSink for YamlRqWriter {
    fn write_batch(&mut self, batch: &[EventRq]) -> Result<(), RqWriterError> {
        self.write_document(batch)
    }

    fn write_run_summary(&mut self, summary: &RunSummary) -> Result<(), RqWriterError> {
        self.write_document(summary)?;
        self.file.flush()?;
        Ok(())
    }
}
