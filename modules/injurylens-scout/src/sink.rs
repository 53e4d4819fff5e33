use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use injurylens_common::{
    content_hash, scrub_pii, AnnotatedItem, Channel, InjuryLensError, Item, LabelMatch, MatchResult,
};

use crate::traits::RecordSink;

pub const SCHEMA_VERSION: u32 = 1;

// =============================================================================
// Records
// =============================================================================

/// One matched post as written by the search stage. Title and body are
/// scrubbed of contact details; the in-memory item is untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: String,
    pub channel: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub created_utc: i64,
    #[serde(default)]
    pub permalink: String,
    #[serde(default)]
    pub score: Option<i64>,
    #[serde(default)]
    pub num_comments: Option<i64>,
    #[serde(default)]
    pub matched_event_group: String,
    #[serde(default)]
    pub matched_event: String,
    #[serde(default)]
    pub matched_age_group: String,
    #[serde(default)]
    pub matched_age: String,
    pub schema_version: u32,
    pub content_hash: String,
}

impl From<&MatchResult> for MatchRecord {
    fn from(result: &MatchResult) -> Self {
        let item = &result.item;
        let title = scrub_pii(&item.title);
        let body = scrub_pii(&item.body);
        let content_hash = content_hash(&format!("{title}\n{body}"));
        Self {
            id: item.id.clone(),
            channel: item.channel.to_string(),
            title,
            body,
            created_utc: item.created_at.timestamp(),
            permalink: item.permalink.clone(),
            score: item.score,
            num_comments: item.num_comments,
            matched_event_group: result.event_group.clone(),
            matched_event: result.event_term.clone(),
            matched_age_group: result.age_group.clone(),
            matched_age: result.age_term.clone(),
            schema_version: SCHEMA_VERSION,
            content_hash,
        }
    }
}

impl MatchRecord {
    /// Rebuild an item for a later classify run. `None` when the timestamp
    /// is out of range.
    pub fn into_item(self) -> Option<Item> {
        let created_at = DateTime::<Utc>::from_timestamp(self.created_utc, 0)?;
        Some(Item {
            id: self.id,
            title: self.title,
            body: self.body,
            channel: Channel::new(self.channel),
            created_at,
            author: None,
            permalink: self.permalink,
            score: self.score,
            num_comments: self.num_comments,
        })
    }
}

/// One classified post as written by the classify stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelRecord {
    pub id: String,
    pub channel: String,
    pub created_utc: i64,
    pub permalink: String,
    pub title: String,
    pub label: String,
    pub label_match: LabelMatch,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl From<&AnnotatedItem> for LabelRecord {
    fn from(annotated: &AnnotatedItem) -> Self {
        let item = &annotated.item;
        Self {
            id: item.id.clone(),
            channel: item.channel.to_string(),
            created_utc: item.created_at.timestamp(),
            permalink: item.permalink.clone(),
            title: scrub_pii(&item.title),
            label: annotated.label.name.clone(),
            label_match: annotated.label.matched_by,
            failure: annotated.failure.clone(),
            raw_response: annotated.raw_response.clone(),
            details: annotated.details.clone(),
        }
    }
}

// =============================================================================
// Sinks
// =============================================================================

/// Keeps every record in memory, in arrival order.
#[derive(Debug)]
pub struct MemorySink<T> {
    records: Vec<T>,
}

impl<T> Default for MemorySink<T> {
    fn default() -> Self {
        Self { records: Vec::new() }
    }
}

impl<T> MemorySink<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[T] {
        &self.records
    }

    pub fn into_records(self) -> Vec<T> {
        self.records
    }
}

impl<T: Clone + Send> RecordSink<T> for MemorySink<T> {
    fn accept(&mut self, record: &T) -> Result<(), InjuryLensError> {
        self.records.push(record.clone());
        Ok(())
    }
}

enum Writer {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl Write for Writer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Writer::Plain(w) => w.write(buf),
            Writer::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Writer::Plain(w) => w.flush(),
            Writer::Gzip(w) => w.flush(),
        }
    }
}

/// One JSON object per line. A `.gz` path is written gzip-compressed.
/// [`JsonlSink::create`] appends, adding a new gzip member per run;
/// [`JsonlSink::create_new`] replaces whatever was there.
pub struct JsonlSink {
    path: PathBuf,
    writer: Option<Writer>,
    written: u64,
}

impl JsonlSink {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(path.as_ref(), true)
    }

    pub fn create_new(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(path.as_ref(), false)
    }

    fn open(path: &Path, append: bool) -> Result<Self> {
        let path = path.to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(append)
            .write(true)
            .truncate(!append)
            .open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let file = BufWriter::new(file);

        let writer = if is_gzip(&path) {
            Writer::Gzip(GzEncoder::new(file, Compression::default()))
        } else {
            Writer::Plain(file)
        };

        Ok(Self {
            path,
            writer: Some(writer),
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    fn write_json<S: Serialize>(&mut self, record: &S) -> Result<(), InjuryLensError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| InjuryLensError::Output(format!("{} is already closed", self.path.display())))?;
        let line = serde_json::to_string(record).map_err(|e| InjuryLensError::Output(e.to_string()))?;
        writeln!(writer, "{line}").map_err(|e| InjuryLensError::Output(format!("{}: {e}", self.path.display())))?;
        self.written += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), InjuryLensError> {
        let output_err = |e: std::io::Error| InjuryLensError::Output(format!("{}: {e}", self.path.display()));
        match self.writer.take() {
            None => Ok(()),
            Some(Writer::Plain(mut w)) => w.flush().map_err(output_err),
            Some(Writer::Gzip(w)) => w.finish().and_then(|mut inner| inner.flush()).map_err(output_err),
        }?;
        info!(path = %self.path.display(), records = self.written, "Output written");
        Ok(())
    }
}

impl RecordSink<MatchResult> for JsonlSink {
    fn accept(&mut self, record: &MatchResult) -> Result<(), InjuryLensError> {
        self.write_json(&MatchRecord::from(record))
    }

    fn finish(&mut self) -> Result<(), InjuryLensError> {
        self.close()
    }
}

impl RecordSink<AnnotatedItem> for JsonlSink {
    fn accept(&mut self, record: &AnnotatedItem) -> Result<(), InjuryLensError> {
        self.write_json(&LabelRecord::from(record))
    }

    fn finish(&mut self) -> Result<(), InjuryLensError> {
        self.close()
    }
}

fn is_gzip(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

// =============================================================================
// Reading stage-1 output
// =============================================================================

/// Read search-stage output back into items. Lines that do not decode are
/// skipped with a warning.
pub fn read_items(path: &Path) -> Result<Vec<Item>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let reader: Box<dyn Read> = if is_gzip(path) {
        Box::new(MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    };

    let mut items = Vec::new();
    let mut skipped = 0usize;
    for (index, line) in BufReader::new(reader).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<MatchRecord>(&line).map(MatchRecord::into_item) {
            Ok(Some(item)) => items.push(item),
            Ok(None) => {
                warn!(line = index + 1, "Skipping record with invalid timestamp");
                skipped += 1;
            }
            Err(e) => {
                warn!(line = index + 1, error = %e, "Skipping undecodable record");
                skipped += 1;
            }
        }
    }

    info!(path = %path.display(), items = items.len(), skipped, "Loaded items");
    Ok(items)
}

// =============================================================================
// Output paths
// =============================================================================

/// `<dir>/reddit_child_injury_<YYYYMMDD>.jsonl.gz`
pub fn raw_output_path(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("reddit_child_injury_{}.jsonl.gz", date.format("%Y%m%d")))
}

/// `<dir>/<raw stem>_labels.jsonl`
pub fn labels_output_path(dir: &Path, raw: &Path) -> PathBuf {
    let name = raw.file_name().and_then(|n| n.to_str()).unwrap_or("items");
    let name = name.strip_suffix(".gz").unwrap_or(name);
    let stem = name.strip_suffix(".jsonl").unwrap_or(name);
    dir.join(format!("{stem}_labels.jsonl"))
}

/// Most recently modified `.jsonl` / `.jsonl.gz` file in `dir`.
pub fn newest_raw_file(dir: &Path) -> Result<Option<PathBuf>> {
    if !dir.exists() {
        return Ok(None);
    }
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in std::fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if !(name.ends_with(".jsonl") || name.ends_with(".jsonl.gz")) {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        if newest.as_ref().is_none_or(|(t, _)| modified > *t) {
            newest = Some((modified, path));
        }
    }
    Ok(newest.map(|(_, path)| path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::item;
    use injurylens_common::ClassificationLabel;
    use std::sync::Arc;

    fn matched(id: &str, title: &str, body: &str) -> MatchResult {
        MatchResult {
            item: Arc::new(item(id, title, body)),
            query_index: 0,
            event_group: "fall".into(),
            event_term: "fell".into(),
            age_group: "toddler".into(),
            age_term: "toddler".into(),
        }
    }

    #[test]
    fn match_record_scrubs_text_but_not_the_item() {
        let result = matched("a1", "Toddler fell", "call me at 555-123-4567 or mom@example.com");
        let record = MatchRecord::from(&result);
        assert_eq!(record.body, "call me at [redacted-phone] or [redacted-email]");
        assert!(result.item.body.contains("mom@example.com"));
        assert_eq!(record.schema_version, 1);
        assert_eq!(record.content_hash, content_hash(&format!("{}\n{}", record.title, record.body)));
        assert_eq!(record.matched_event, "fell");
    }

    #[test]
    fn label_record_carries_failure_and_details() {
        let annotated = AnnotatedItem {
            item: Arc::new(item("a1", "Toddler burn", "")),
            label: ClassificationLabel::unresolved("unknown"),
            raw_response: None,
            failure: Some("transient: 503".into()),
            details: None,
        };
        let json = serde_json::to_value(LabelRecord::from(&annotated)).unwrap();
        assert_eq!(json["label"], "unknown");
        assert_eq!(json["label_match"], "fallback");
        assert_eq!(json["failure"], "transient: 503");
        assert!(json.get("raw_response").is_none());
    }

    #[test]
    fn gzip_round_trip_through_read_items() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw").join("out.jsonl.gz");

        let mut sink = JsonlSink::create(&path).unwrap();
        RecordSink::<MatchResult>::accept(&mut sink, &matched("a1", "Toddler fell", "off the bed")).unwrap();
        RecordSink::<MatchResult>::accept(&mut sink, &matched("a2", "Baby burn", "hot tea")).unwrap();
        RecordSink::<MatchResult>::finish(&mut sink).unwrap();
        assert_eq!(sink.written(), 2);

        let items = read_items(&path).unwrap();
        let ids: Vec<_> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["a1", "a2"]);
        assert_eq!(items[0].body, "off the bed");
        assert_eq!(items[0].created_at, crate::testing::test_time());
    }

    #[test]
    fn appended_runs_are_all_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl.gz");
        for id in ["a1", "a2"] {
            let mut sink = JsonlSink::create(&path).unwrap();
            RecordSink::<MatchResult>::accept(&mut sink, &matched(id, "t", "b")).unwrap();
            RecordSink::<MatchResult>::finish(&mut sink).unwrap();
        }
        assert_eq!(read_items(&path).unwrap().len(), 2);
    }

    #[test]
    fn create_new_replaces_earlier_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        for id in ["a1", "a2"] {
            let mut sink = JsonlSink::create_new(&path).unwrap();
            RecordSink::<MatchResult>::accept(&mut sink, &matched(id, "t", "b")).unwrap();
            RecordSink::<MatchResult>::finish(&mut sink).unwrap();
        }
        let items = read_items(&path).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "a2");
    }

    #[test]
    fn bad_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let good = serde_json::to_string(&MatchRecord::from(&matched("a1", "t", "b"))).unwrap();
        std::fs::write(&path, format!("{good}\nnot json\n\n{{\"id\":\"x\"}}\n{good}\n")).unwrap();

        let items = read_items(&path).unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn output_paths() {
        let date = NaiveDate::from_ymd_opt(2025, 9, 1).unwrap();
        let raw = raw_output_path(Path::new("data/raw"), date);
        assert_eq!(raw, PathBuf::from("data/raw/reddit_child_injury_20250901.jsonl.gz"));
        assert_eq!(
            labels_output_path(Path::new("data/interim"), &raw),
            PathBuf::from("data/interim/reddit_child_injury_20250901_labels.jsonl")
        );
        assert_eq!(
            labels_output_path(Path::new("out"), Path::new("foo.gz")),
            PathBuf::from("out/foo_labels.jsonl")
        );
        assert_eq!(
            labels_output_path(Path::new("out"), Path::new("foo.jsonl")),
            PathBuf::from("out/foo_labels.jsonl")
        );
    }

    #[test]
    fn newest_raw_file_ignores_other_files() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(newest_raw_file(&dir.path().join("missing")).unwrap(), None);
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        std::fs::write(dir.path().join("a.jsonl"), "").unwrap();
        assert_eq!(newest_raw_file(dir.path()).unwrap(), Some(dir.path().join("a.jsonl")));
    }
}
