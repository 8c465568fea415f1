pub mod fetch;
pub mod types;

use chrono::{Local, TimeZone};

use types::{NormalizedDocument, TranscriptEntry, Turn};

const DOCUMENT_TITLE: &str = "# Conversation Transcript";
const DETAILED_HEADING: &str = "## Detailed Transcript (with timestamps)";

/// Locale-style label used in the detailed section, e.g. `5/1/2024, 2:30:00 PM`.
const TIMESTAMP_LABEL: &str = "%-m/%-d/%Y, %-I:%M:%S %p";

/// Filter, order and merge raw entries.
///
/// Entries lacking a speaker or text are dropped. The rest are sorted by
/// timestamp; `sort_by_key` is stable so ties keep input order. Consecutive
/// entries from the same speaker collapse into one turn, joined by a space.
pub fn normalize(entries: &[TranscriptEntry]) -> NormalizedDocument {
    let mut sorted: Vec<TranscriptEntry> =
        entries.iter().filter(|e| e.is_usable()).cloned().collect();
    sorted.sort_by_key(|e| e.timestamp);

    let mut turns: Vec<Turn> = Vec::new();
    let mut current: Option<Turn> = None;

    for entry in &sorted {
        match current.as_mut() {
            Some(turn) if turn.speaker == entry.speaker => {
                turn.text.push(' ');
                turn.text.push_str(&entry.transcript);
            }
            _ => {
                if let Some(done) = current.take() {
                    turns.push(done);
                }
                current = Some(Turn {
                    speaker: entry.speaker.clone(),
                    text: entry.transcript.clone(),
                });
            }
        }
    }
    if let Some(done) = current {
        turns.push(done);
    }

    NormalizedDocument {
        turns,
        entries: sorted,
    }
}

/// One `**Speaker**: text` block per merged turn.
pub fn render_compact(doc: &NormalizedDocument) -> String {
    let mut out = String::new();
    for turn in &doc.turns {
        out.push_str(&format!("**{}**: {}\n\n", turn.speaker, turn.text));
    }
    out
}

/// Every filtered entry individually, with a timestamp label in `tz`.
pub fn render_detailed<Tz>(doc: &NormalizedDocument, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let mut out = String::new();
    for entry in &doc.entries {
        let label = entry.timestamp.with_timezone(tz).format(TIMESTAMP_LABEL);
        out.push_str(&format!(
            "**{}** ({}):\n{}\n\n",
            entry.speaker, label, entry.transcript
        ));
    }
    out
}

/// `Speaker: text`, one line per filtered entry.
pub fn render_plain(doc: &NormalizedDocument) -> String {
    let mut out = format!("{}\n\n", DOCUMENT_TITLE);
    for entry in &doc.entries {
        out.push_str(&format!("{}: {}\n", entry.speaker, entry.transcript));
    }
    out
}

/// Full markdown document, compact section first, labels in `tz`.
pub fn render_document_in<Tz>(doc: &NormalizedDocument, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!(
        "{}\n\n{}{}\n\n{}",
        DOCUMENT_TITLE,
        render_compact(doc),
        DETAILED_HEADING,
        render_detailed(doc, tz)
    )
}

/// Full markdown document with labels in the machine's local time zone.
pub fn render_document(doc: &NormalizedDocument) -> String {
    render_document_in(doc, &Local)
}
