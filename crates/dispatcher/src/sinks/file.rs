//! FileDeadLetter - appends dead letters to a JSON lines file

use contracts::{ContractError, DeadLetter, DeadLetterSink};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// Dead letter sink writing one JSON object per line.
///
/// The file is opened in append mode so letters survive restarts.
pub struct FileDeadLetter {
    name: String,
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl FileDeadLetter {
    /// Open (or create) the file, creating parent directories as needed
    pub fn open(name: impl Into<String>, path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            name: name.into(),
            path,
            writer: Some(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&mut self, letter: &DeadLetter) -> std::io::Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| std::io::Error::other("dead letter file already closed"))?;
        serde_json::to_writer(&mut *writer, letter)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        writer.write_all(b"\n")?;
        // Letters are rare; flush each one so a crash loses nothing.
        writer.flush()
    }

    fn write_error(&self, e: std::io::Error) -> ContractError {
        ContractError::dead_letter_write(&self.name, format!("{}: {e}", self.path.display()))
    }
}

impl DeadLetterSink for FileDeadLetter {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "file_dead_letter_write",
        skip(self, letter),
        fields(sink = %self.name, reading_id = %letter.reading.reading_id)
    )]
    async fn write(&mut self, letter: &DeadLetter) -> Result<(), ContractError> {
        self.append(letter).map_err(|e| self.write_error(e))
    }

    #[instrument(name = "file_dead_letter_flush", skip(self))]
    async fn flush(&mut self) -> Result<(), ContractError> {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.flush() {
                return Err(self.write_error(e));
            }
        }
        Ok(())
    }

    #[instrument(name = "file_dead_letter_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                return Err(self.write_error(e));
            }
        }
        debug!(sink = %self.name, path = %self.path.display(), "FileDeadLetter closed");
        Ok(())
    }
}
