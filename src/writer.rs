use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::{ScrapeError, SinkError};
use crate::models::JobRecord;
use crate::source::{DedupeKey, FieldNames};
use crate::Result;

const BOM: &[u8] = b"\xEF\xBB\xBF";
const TAG_SEPARATOR: &str = ", ";
const RECORD_SEPARATOR: &str = "\n---\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Csv,
    Json,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTarget {
    pub path: PathBuf,
    pub format: OutputFormat,
}

impl OutputTarget {
    /// `<dir>/<source>_jobs.<ext>`
    pub fn in_dir(dir: &Path, source: &str, format: OutputFormat) -> Self {
        Self {
            path: dir.join(format!("{source}_jobs.{}", format.extension())),
            format,
        }
    }
}

/// Accumulates records in scrape order and writes them out at the end of a run.
#[derive(Debug, Clone, Default)]
pub struct RecordSink {
    records: Vec<JobRecord>,
    dedupe_by: Option<DedupeKey>,
}

impl RecordSink {
    pub fn new(dedupe_by: Option<DedupeKey>) -> Self {
        Self {
            records: Vec::new(),
            dedupe_by,
        }
    }

    pub fn append(&mut self, record: JobRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[JobRecord] {
        &self.records
    }

    /// Records as they will be written: scrape order, repeats dropped if dedupe is on.
    pub fn output(&self) -> Vec<&JobRecord> {
        match self.dedupe_by {
            None => self.records.iter().collect(),
            Some(DedupeKey::DetailUrl) => {
                let mut seen = HashSet::new();
                self.records
                    .iter()
                    .filter(|record| record.detail_url.is_empty() || seen.insert(&record.detail_url))
                    .collect()
            }
        }
    }

    pub fn to_csv_bytes(&self, names: &FieldNames) -> std::result::Result<Vec<u8>, SinkError> {
        let mut writer = csv::Writer::from_writer(BOM.to_vec());
        writer.write_record(names.ordered())?;
        for record in self.output() {
            writer.write_record(csv_row(record))?;
        }
        writer.into_inner().map_err(|e| SinkError::Io(e.into_error()))
    }

    pub fn to_json_string(&self, names: &FieldNames) -> std::result::Result<String, SinkError> {
        let objects: Vec<Value> = self
            .output()
            .into_iter()
            .map(|record| json_object(record, names))
            .collect();
        Ok(serde_json::to_string_pretty(&objects)?)
    }

    /// Writes the whole accumulated sequence. Flushing twice gives identical files.
    pub fn flush(&self, path: &Path, format: OutputFormat, names: &FieldNames) -> Result<()> {
        let serialization = |source: SinkError| ScrapeError::Serialization {
            path: path.to_path_buf(),
            source,
        };

        let bytes = match format {
            OutputFormat::Csv => self.to_csv_bytes(names).map_err(serialization)?,
            OutputFormat::Json => self
                .to_json_string(names)
                .map(String::into_bytes)
                .map_err(serialization)?,
        };

        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| serialization(e.into()))?;
        }
        fs::write(path, bytes).map_err(|e| serialization(e.into()))?;

        info!(path = %path.display(), records = self.output().len(), "saved");
        Ok(())
    }

    /// Attempts every target before reporting the first failure.
    pub fn flush_all(&self, targets: &[OutputTarget], names: &FieldNames) -> Result<()> {
        let mut first_error = None;
        for target in targets {
            if let Err(e) = self.flush(&target.path, target.format, names) {
                warn!(error = %e, "flush failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn csv_row(record: &JobRecord) -> [String; 8] {
    [
        record.title.clone(),
        record.company.clone(),
        record.category.clone(),
        record.location.clone(),
        join_tags(&record.tags),
        record.detail_url.clone(),
        record.description.clone(),
        record.requirements.clone(),
    ]
}

fn json_object(record: &JobRecord, names: &FieldNames) -> Value {
    let mut object = Map::new();
    let text = |value: &str| Value::String(value.to_string());
    object.insert(names.title.clone(), text(&record.title));
    object.insert(names.company.clone(), text(&record.company));
    object.insert(names.category.clone(), text(&record.category));
    object.insert(names.location.clone(), text(&record.location));
    object.insert(
        names.tags.clone(),
        Value::Array(record.tags.iter().map(|tag| text(tag)).collect()),
    );
    object.insert(names.detail_url.clone(), text(&record.detail_url));
    object.insert(names.description.clone(), text(&record.description));
    object.insert(names.requirements.clone(), text(&record.requirements));
    Value::Object(object)
}

/// Parses a CSV written by [`RecordSink::flush`]. A leading BOM is optional and
/// columns are matched by header name.
pub fn read_csv(bytes: &[u8], names: &FieldNames) -> std::result::Result<Vec<JobRecord>, SinkError> {
    let bytes = bytes.strip_prefix(BOM).unwrap_or(bytes);
    let mut reader = csv::Reader::from_reader(bytes);
    let headers = reader.headers()?.clone();
    let column = |name: &str| headers.iter().position(|header| header == name);
    let columns = names.ordered().map(column);

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let [title, company, category, location, tags, detail_url, description, requirements] =
            columns.map(|index| index.and_then(|i| row.get(i)).unwrap_or_default().to_string());

        let mut record = JobRecord {
            title,
            company,
            category,
            location,
            detail_url,
            description,
            requirements,
            ..Default::default()
        };
        record.push_tags(split_tags(&tags));
        records.push(record);
    }
    Ok(records)
}

/// Parses a JSON array written by [`RecordSink::flush`].
pub fn read_json(text: &str, names: &FieldNames) -> std::result::Result<Vec<JobRecord>, SinkError> {
    let objects: Vec<Map<String, Value>> = serde_json::from_str(text)?;
    Ok(objects
        .iter()
        .map(|object| {
            let text = |name: &str| {
                object
                    .get(name)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            };
            let mut record = JobRecord {
                title: text(&names.title),
                company: text(&names.company),
                category: text(&names.category),
                location: text(&names.location),
                detail_url: text(&names.detail_url),
                description: text(&names.description),
                requirements: text(&names.requirements),
                ..Default::default()
            };
            match object.get(&names.tags) {
                Some(Value::Array(tags)) => record.push_tags(
                    tags.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string),
                ),
                Some(Value::String(tags)) => record.push_tags(split_tags(tags)),
                _ => {}
            }
            record
        })
        .collect())
}

/// Tags in one cell, `", "`-separated. A tag that contains a comma or starts with
/// a quote is wrapped in quotes, inner quotes doubled.
fn join_tags(tags: &[String]) -> String {
    tags.iter()
        .map(|tag| {
            if tag.contains(',') || tag.starts_with('"') {
                format!("\"{}\"", tag.replace('"', "\"\""))
            } else {
                tag.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(TAG_SEPARATOR)
}

fn split_tags(cell: &str) -> Vec<String> {
    let mut tags = Vec::new();
    let mut rest = cell.trim();
    while !rest.is_empty() {
        if let Some(quoted) = rest.strip_prefix('"') {
            let mut tag = String::new();
            let mut end = quoted.len();
            let mut chars = quoted.char_indices().peekable();
            while let Some((i, c)) = chars.next() {
                if c != '"' {
                    tag.push(c);
                } else if chars.next_if(|&(_, next)| next == '"').is_some() {
                    tag.push('"');
                } else {
                    end = i + 1;
                    break;
                }
            }
            tags.push(tag);
            rest = quoted[end..].trim_start_matches(',').trim_start();
        } else {
            let (tag, tail) = rest.split_once(TAG_SEPARATOR).unwrap_or((rest, ""));
            tags.push(tag.trim().to_string());
            rest = tail.trim_start();
        }
    }
    tags
}

/// Loads a flushed output file, picking the parser by extension.
pub fn read_records(path: &Path, names: &FieldNames) -> Result<Vec<JobRecord>> {
    let serialization = |source: SinkError| ScrapeError::Serialization {
        path: path.to_path_buf(),
        source,
    };
    let bytes = fs::read(path).map_err(|e| serialization(e.into()))?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        let text = String::from_utf8_lossy(&bytes);
        read_json(text.trim_start_matches('\u{feff}'), names).map_err(serialization)
    } else {
        read_csv(&bytes, names).map_err(serialization)
    }
}

/// One `【label】value` block per record, blocks separated by a `---` line.
///
/// Description and requirements start on the line after their label, with a
/// blank line between the two.
pub fn render_text(records: &[JobRecord], names: &FieldNames) -> String {
    records
        .iter()
        .map(|record| {
            let lines = [
                format!("【{}】{}", names.title, record.title),
                format!("【{}】{}", names.company, record.company),
                format!("【{}】{}", names.category, record.category),
                format!("【{}】{}", names.location, record.location),
                format!("【{}】{}", names.tags, join_tags(&record.tags)),
                format!("【{}】{}", names.detail_url, record.detail_url),
                format!("【{}】\n{}\n", names.description, record.description),
                format!("【{}】\n{}", names.requirements, record.requirements),
            ];
            lines.join("\n").trim().to_string()
        })
        .collect::<Vec<_>>()
        .join(RECORD_SEPARATOR)
}
