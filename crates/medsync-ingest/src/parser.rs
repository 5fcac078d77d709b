//! Streaming parser for the converted archive document
//!
//! The converted DrugBank export is far too large to hold as a single
//! `serde_json::Value`. Instead the document is walked with a
//! [`DeserializeSeed`] that only materializes the objects addressed by a
//! [`RecordPath`]; everything else is skipped with [`IgnoredAny`].
//!
//! Parsing runs on a blocking worker. Each record is handed to a bounded
//! channel the moment its closing brace is read, so the consumer sees a
//! single-pass [`RecordStream`] with backpressure.

use crate::error::{IngestError, Result};
use crate::models::RawDrugRecord;
use crate::progress::ProgressReporter;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde::de::{self, DeserializeSeed, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

/// Records buffered between the parsing worker and the consumer
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Lazy, single-pass sequence of parsed records
pub type RecordStream = BoxStream<'static, Result<RawDrugRecord>>;

/// One step of a [`RecordPath`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// A literal object key
    Key(String),
    /// Any key of an object or any element of an array
    Any,
}

impl PathSegment {
    fn matches_key(&self, key: &str) -> bool {
        match self {
            PathSegment::Key(k) => k == key,
            PathSegment::Any => true,
        }
    }
}

/// Location of the record collection inside the document, e.g. `drugbank.drug.*`
///
/// The final segment must be `*`: the nodes it matches are the records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPath {
    segments: Vec<PathSegment>,
}

impl RecordPath {
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }
}

impl FromStr for RecordPath {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        let segments = s
            .split('.')
            .map(|segment| match segment.trim() {
                "" => Err(IngestError::RecordPath(s.to_string())),
                "*" => Ok(PathSegment::Any),
                key => Ok(PathSegment::Key(key.to_string())),
            })
            .collect::<Result<Vec<_>>>()?;

        if segments.last() != Some(&PathSegment::Any) {
            return Err(IngestError::RecordPath(s.to_string()));
        }

        Ok(Self { segments })
    }
}

impl fmt::Display for RecordPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<&str> = self
            .segments
            .iter()
            .map(|s| match s {
                PathSegment::Key(k) => k.as_str(),
                PathSegment::Any => "*",
            })
            .collect();
        f.write_str(&rendered.join("."))
    }
}

/// Walk a JSON document and hand every record under `path` to `emit`
///
/// Stops at the first error returned by `emit`.
pub fn read_records<R, F>(reader: R, path: &RecordPath, mut emit: F) -> serde_json::Result<()>
where
    R: Read,
    F: FnMut(RawDrugRecord) -> std::result::Result<(), String>,
{
    let mut de = serde_json::Deserializer::from_reader(reader);
    Select {
        segments: &path.segments,
        emit: &mut emit,
    }
    .deserialize(&mut de)?;
    de.end()
}

struct Select<'a, F> {
    segments: &'a [PathSegment],
    emit: &'a mut F,
}

impl<'de, F> DeserializeSeed<'de> for Select<'_, F>
where
    F: FnMut(RawDrugRecord) -> std::result::Result<(), String>,
{
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> std::result::Result<(), D::Error>
    where
        D: Deserializer<'de>,
    {
        if self.segments.is_empty() {
            let record = RawDrugRecord::deserialize(deserializer)?;
            return (self.emit)(record).map_err(de::Error::custom);
        }
        deserializer.deserialize_any(self)
    }
}

impl<'de, F> Visitor<'de> for Select<'_, F>
where
    F: FnMut(RawDrugRecord) -> std::result::Result<(), String>,
{
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON document")
    }

    fn visit_map<A>(self, mut map: A) -> std::result::Result<(), A::Error>
    where
        A: MapAccess<'de>,
    {
        let Select { segments, emit } = self;
        let Some((head, rest)) = segments.split_first() else {
            return Ok(());
        };

        // An XML collection with a single element converts to an object, not an array
        if rest.is_empty() && *head == PathSegment::Any {
            let record = RawDrugRecord::deserialize(de::value::MapAccessDeserializer::new(map))?;
            return emit(record).map_err(de::Error::custom);
        }

        while let Some(key) = map.next_key::<String>()? {
            if head.matches_key(&key) {
                map.next_value_seed(Select {
                    segments: rest,
                    emit: &mut *emit,
                })?;
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }
        Ok(())
    }

    fn visit_seq<A>(self, mut seq: A) -> std::result::Result<(), A::Error>
    where
        A: SeqAccess<'de>,
    {
        let Select { segments, emit } = self;
        match segments.split_first() {
            Some((PathSegment::Any, rest)) => {
                while seq
                    .next_element_seed(Select {
                        segments: rest,
                        emit: &mut *emit,
                    })?
                    .is_some()
                {}
            }
            _ => while seq.next_element::<IgnoredAny>()?.is_some() {},
        }
        Ok(())
    }

    // Scalars on the path hold no records
    fn visit_bool<E: de::Error>(self, _v: bool) -> std::result::Result<(), E> {
        Ok(())
    }

    fn visit_i64<E: de::Error>(self, _v: i64) -> std::result::Result<(), E> {
        Ok(())
    }

    fn visit_u64<E: de::Error>(self, _v: u64) -> std::result::Result<(), E> {
        Ok(())
    }

    fn visit_f64<E: de::Error>(self, _v: f64) -> std::result::Result<(), E> {
        Ok(())
    }

    fn visit_str<E: de::Error>(self, _v: &str) -> std::result::Result<(), E> {
        Ok(())
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<(), E> {
        Ok(())
    }
}

/// Streaming reader for converted archive documents
#[derive(Debug, Clone)]
pub struct StreamingParser {
    record_path: RecordPath,
    progress_interval: u64,
    channel_capacity: usize,
}

impl StreamingParser {
    pub fn new(record_path: RecordPath) -> Self {
        Self {
            record_path,
            progress_interval: crate::config::DEFAULT_PROGRESS_INTERVAL,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Refresh the progress line every `interval` records (minimum 1)
    pub fn with_progress_interval(mut self, interval: u64) -> Self {
        self.progress_interval = interval.max(1);
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn record_path(&self) -> &RecordPath {
        &self.record_path
    }

    /// Start parsing `path` and return the records as they complete
    ///
    /// Must be called inside a tokio runtime. The stream ends after the last
    /// record or after the first error.
    pub fn stream(&self, path: impl Into<PathBuf>) -> RecordStream {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let path = path.into();
        let record_path = self.record_path.clone();

        let worker = tokio::task::spawn_blocking(move || {
            let file = match File::open(&path) {
                Ok(file) => file,
                Err(source) => {
                    let _ = tx.blocking_send(Err(IngestError::StreamIo { path, source }));
                    return;
                },
            };

            let result = read_records(BufReader::new(file), &record_path, |record| {
                tx.blocking_send(Ok(record))
                    .map_err(|_| "record consumer went away".to_string())
            });

            match result {
                Ok(()) => debug!(path = %path.display(), "Finished reading document"),
                Err(_) if tx.is_closed() => {
                    debug!(path = %path.display(), "Record consumer dropped, stopping parse");
                },
                Err(err) => {
                    let _ = tx.blocking_send(Err(classify(err, &path)));
                },
            }
        });

        supervised(rx, worker)
    }

    /// Parse the whole document, reporting progress, and return every record in order
    pub async fn collect(
        &self,
        path: impl Into<PathBuf>,
        progress: &dyn ProgressReporter,
    ) -> Result<Vec<RawDrugRecord>> {
        progress.start("Parsing drugs ...");

        let mut stream = self.stream(path);
        let mut records = Vec::new();

        while let Some(item) = stream.next().await {
            match item {
                Ok(record) => {
                    let count = records.len() as u64;
                    if count % self.progress_interval == 0 {
                        progress.update(count);
                    }
                    records.push(record);
                },
                Err(err) => {
                    progress.clear();
                    return Err(err);
                },
            }
        }

        progress.clear();
        Ok(records)
    }
}

/// Records from `rx`, followed by an error if `worker` died instead of finishing
///
/// A panicking worker drops its sender like a finished one, so the channel
/// closing alone does not mean the document was read to the end.
fn supervised(
    rx: mpsc::Receiver<Result<RawDrugRecord>>,
    worker: JoinHandle<()>,
) -> RecordStream {
    let failure = stream::once(worker).filter_map(|joined| async move {
        joined
            .err()
            .map(|e| Err::<RawDrugRecord, _>(IngestError::ParserWorker(e.to_string())))
    });

    ReceiverStream::new(rx).chain(failure).boxed()
}

fn classify(err: serde_json::Error, path: &Path) -> IngestError {
    if err.is_io() {
        IngestError::StreamIo {
            path: path.to_path_buf(),
            source: err.into(),
        }
    } else {
        IngestError::MalformedDocument(err)
    }
}
