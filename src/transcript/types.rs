use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Naive layouts accepted in addition to RFC 3339. Interpreted as UTC.
const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Epoch numbers above this are taken as milliseconds.
const MILLIS_THRESHOLD: f64 = 1e11;

/// One utterance as delivered by the transcript source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptEntry {
    pub speaker: String,
    pub transcript: String,
    pub timestamp: DateTime<Utc>,
}

impl TranscriptEntry {
    /// Entries without a speaker or without text never reach a rendering.
    pub fn is_usable(&self) -> bool {
        !self.speaker.is_empty() && !self.transcript.is_empty()
    }
}

/// Wire shape before timestamp validation. Every field is optional so that
/// unusable entries can be dropped instead of failing the whole load.
#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(default)]
    speaker: Option<String>,
    #[serde(default)]
    transcript: Option<String>,
    #[serde(default)]
    timestamp: Value,
}

/// A maximal run of consecutive utterances from one speaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: String,
    pub text: String,
}

/// Output of the normalizer: merged turns plus the filtered, sorted entries
/// they were built from (the detailed rendering replays the latter).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedDocument {
    pub turns: Vec<Turn>,
    pub entries: Vec<TranscriptEntry>,
}

impl NormalizedDocument {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct speakers in order of first appearance.
    pub fn speakers(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for turn in &self.turns {
            if !seen.contains(&turn.speaker.as_str()) {
                seen.push(turn.speaker.as_str());
            }
        }
        seen
    }
}

/// Parse a JSON array of transcript entries.
///
/// A usable entry (speaker and text present) with a missing or unparseable
/// timestamp fails the load, naming the entry index and the offending value.
/// Unusable entries are kept with a placeholder time; the normalizer drops them.
pub fn parse_entries(json: &str) -> Result<Vec<TranscriptEntry>> {
    let raw: Vec<RawEntry> =
        serde_json::from_str(json).context("Transcript is not a JSON array of entries")?;

    raw.into_iter()
        .enumerate()
        .map(|(index, entry)| {
            let speaker = entry.speaker.unwrap_or_default();
            let transcript = entry.transcript.unwrap_or_default();
            let timestamp = match parse_timestamp(&entry.timestamp) {
                Some(ts) => ts,
                None if speaker.is_empty() || transcript.is_empty() => DateTime::<Utc>::MIN_UTC,
                None => bail!(
                    "entry {} ({}): unrecognised timestamp {}",
                    index,
                    speaker,
                    entry.timestamp
                ),
            };
            Ok(TranscriptEntry {
                speaker,
                transcript,
                timestamp,
            })
        })
        .collect()
}

/// RFC 3339 / naive date-time strings, or epoch seconds (milliseconds when large).
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp_str(s.trim()),
        Value::Number(n) => n.as_f64().and_then(from_epoch),
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn from_epoch(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() {
        return None;
    }
    if value.abs() > MILLIS_THRESHOLD {
        return DateTime::from_timestamp_millis(value as i64);
    }
    let secs = value.floor();
    let nanos = ((value - secs) * 1e9) as u32;
    DateTime::from_timestamp(secs as i64, nanos)
}
