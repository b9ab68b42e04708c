use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::config::{HarvesterConfig, StorageFormat};
use crate::error::StoreError;
use crate::validate::TextRecord;

/// One storage format behind the store. The on-disk encoding is the
/// swappable part; the append-and-flush contract is not.
pub trait RecordSink: Send {
    fn name(&self) -> &'static str;
    fn path(&self) -> &Path;
    /// Must leave the record fully flushed to the OS before returning.
    fn append(&mut self, record: &TextRecord) -> io::Result<()>;
}

/// Fans a validated record out to every configured sink, flushing before
/// returning so a crash after `append` cannot lose the record. Each sink is
/// guarded by its own mutex: concurrent workers append freely, writes to one
/// file never interleave.
pub struct RecordStore {
    sinks: Vec<Mutex<Box<dyn RecordSink>>>,
}

impl RecordStore {
    /// Creates the output directory and one fresh, run-stamped file per
    /// configured format. Errors here mean the run cannot start.
    pub fn open(config: &HarvesterConfig, run_id: &str) -> anyhow::Result<Self> {
        fs::create_dir_all(&config.output_dir)?;
        let mut sinks: Vec<Mutex<Box<dyn RecordSink>>> = vec![];
        for format in &config.storage_formats {
            let sink: Box<dyn RecordSink> = match format {
                StorageFormat::Jsonl => {
                    Box::new(JsonlSink::create(&config.output_dir, run_id)?)
                }
                StorageFormat::Csv => Box::new(CsvSink::create(&config.output_dir, run_id)?),
            };
            sinks.push(Mutex::new(sink));
        }
        Ok(Self { sinks })
    }

    pub fn append(&self, record: &TextRecord) -> Result<(), StoreError> {
        for sink in &self.sinks {
            // A poisoned lock only means another worker panicked mid-append;
            // the sink itself is still usable append-only.
            let mut sink = sink.lock().unwrap_or_else(|e| e.into_inner());
            sink.append(record).map_err(|source| StoreError {
                sink: sink.name(),
                source_url: record.source_url.clone(),
                source,
            })?;
        }
        Ok(())
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.sinks
            .iter()
            .map(|s| {
                s.lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .path()
                    .to_path_buf()
            })
            .collect()
    }
}

struct JsonlSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonlSink {
    fn create(dir: &Path, run_id: &str) -> io::Result<Self> {
        let path = dir.join(format!("text_{run_id}.jsonl"));
        let file = append_only(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }
}

impl RecordSink for JsonlSink {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn append(&mut self, record: &TextRecord) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}

struct CsvSink {
    path: PathBuf,
    writer: csv::Writer<File>,
}

const CSV_HEADER: [&str; 5] = ["source_url", "language", "length", "extracted_at", "text"];

impl CsvSink {
    fn create(dir: &Path, run_id: &str) -> io::Result<Self> {
        let path = dir.join(format!("text_{run_id}.csv"));
        let mut writer = csv::Writer::from_writer(append_only(&path)?);
        writer.write_record(CSV_HEADER).map_err(csv_io)?;
        writer.flush()?;
        Ok(Self { path, writer })
    }
}

impl RecordSink for CsvSink {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn append(&mut self, record: &TextRecord) -> io::Result<()> {
        let extracted_at = record.extracted_at.to_rfc3339();
        self.writer
            .write_record([
                record.source_url.as_str(),
                record.language(),
                record.length(),
                extracted_at.as_str(),
                record.text.as_str(),
            ])
            .map_err(csv_io)?;
        self.writer.flush()
    }
}

fn append_only(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn csv_io(e: csv::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}
