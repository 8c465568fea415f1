use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::extract::{Extraction, Extractor, RAW_RESPONSE_KEY};
use crate::llm::ChatModel;
use crate::sheet;
use crate::transcript::fetch::{TranscriptApi, TranscriptSource};
use crate::transcript::types::NormalizedDocument;
use crate::transcript::{normalize, render_document, render_plain};

pub const MARKDOWN_FILE: &str = "transcript.md";
pub const PLAIN_FILE: &str = "transcript.txt";
pub const EXTRACTION_FILE: &str = "extracted_data.json";

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub source: TranscriptSource,
    pub spreadsheet: PathBuf,
    pub output_dir: PathBuf,
    /// Stop once the transcript documents are written.
    pub markdown_only: bool,
}

/// What a run produced.
#[derive(Debug)]
pub struct RunSummary {
    pub entries: usize,
    pub turns: usize,
    pub markdown_path: PathBuf,
    pub extraction: Option<Extraction>,
    pub appended_row: Option<usize>,
}

pub struct Pipeline<M> {
    api: TranscriptApi,
    extractor: Extractor<M>,
}

impl<M: ChatModel> Pipeline<M> {
    pub fn new(api: TranscriptApi, extractor: Extractor<M>) -> Self {
        Self { api, extractor }
    }

    /// Fetch, normalize, extract, append. Each step finishes before the next starts.
    pub async fn run(&self, opts: &RunOptions) -> Result<RunSummary> {
        std::fs::create_dir_all(&opts.output_dir).with_context(|| {
            format!(
                "Failed to create output directory {}",
                opts.output_dir.display()
            )
        })?;

        let entries = opts.source.load(&self.api).await?;
        info!(count = entries.len(), "Retrieved transcript entries");

        let doc = normalize(&entries);
        if doc.is_empty() {
            warn!("Transcript has no usable entries");
        }
        let speakers = doc.speakers();
        info!(
            turns = doc.turns.len(),
            speakers = speakers.len(),
            "Transcript normalized"
        );
        let markdown = render_document(&doc);
        let markdown_path = write_documents(&opts.output_dir, &doc, &markdown)?;

        let mut summary = RunSummary {
            entries: entries.len(),
            turns: doc.turns.len(),
            markdown_path,
            extraction: None,
            appended_row: None,
        };
        if opts.markdown_only {
            return Ok(summary);
        }

        let headers = sheet::read_headers(&opts.spreadsheet)
            .context("Failed to read spreadsheet headers")?;
        info!(count = headers.len(), headers = %headers.join(", "), "Read spreadsheet headers");

        let extraction = self.extractor.extract(&markdown, &headers).await?;
        if extraction.is_raw() {
            warn!(
                key = RAW_RESPONSE_KEY,
                "Could not parse JSON from model response; keeping raw response"
            );
        }
        write_extraction(&opts.output_dir, &extraction)?;

        let row = sheet::append_extraction(&opts.spreadsheet, &extraction, &headers)
            .context("Failed to write data to spreadsheet")?;

        summary.extraction = Some(extraction);
        summary.appended_row = Some(row);
        Ok(summary)
    }
}

/// Write the markdown and plain renderings. Returns the markdown path.
pub fn write_documents(dir: &Path, doc: &NormalizedDocument, markdown: &str) -> Result<PathBuf> {
    let markdown_path = dir.join(MARKDOWN_FILE);
    std::fs::write(&markdown_path, markdown)
        .with_context(|| format!("Failed to write {}", markdown_path.display()))?;
    info!(path = %markdown_path.display(), "Markdown saved");

    let plain_path = dir.join(PLAIN_FILE);
    std::fs::write(&plain_path, render_plain(doc))
        .with_context(|| format!("Failed to write {}", plain_path.display()))?;
    debug!(path = %plain_path.display(), "Plain transcript saved");

    Ok(markdown_path)
}

pub fn write_extraction(dir: &Path, extraction: &Extraction) -> Result<PathBuf> {
    let path = dir.join(EXTRACTION_FILE);
    let json = serde_json::to_string_pretty(extraction).context("serialize extraction")?;
    std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), "Extracted data saved");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranscriptApiConfig;
    use crate::llm::Message;

    const SAMPLE: &str = r#"[
        {"speaker": "Alice", "transcript": "Hi, I'm Alice from Acme.", "timestamp": "2024-05-01T14:30:00Z"},
        {"speaker": "Alice", "transcript": "Our budget is 10k.", "timestamp": "2024-05-01T14:30:05Z"},
        {"speaker": "Bob", "transcript": "Great, thanks.", "timestamp": "2024-05-01T14:30:10Z"},
        {"speaker": null, "transcript": "[noise]", "timestamp": null}
    ]"#;

    struct CannedModel(&'static str);

    impl ChatModel for CannedModel {
        async fn chat(&self, _messages: &[Message]) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct Fixture {
        _tmp: tempfile::TempDir,
        opts: RunOptions,
    }

    fn fixture(markdown_only: bool) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let sample = tmp.path().join("sample.json");
        std::fs::write(&sample, SAMPLE).unwrap();
        let spreadsheet = tmp.path().join("leads.csv");
        std::fs::write(&spreadsheet, "Company,Budget,Contact\n").unwrap();
        let opts = RunOptions {
            source: TranscriptSource::File(sample),
            spreadsheet,
            output_dir: tmp.path().join("output"),
            markdown_only,
        };
        Fixture { _tmp: tmp, opts }
    }

    fn pipeline(reply: &'static str) -> Pipeline<CannedModel> {
        let api = TranscriptApi::new(TranscriptApiConfig::default()).unwrap();
        Pipeline::new(api, Extractor::new(CannedModel(reply)))
    }

    #[tokio::test]
    async fn test_full_run_appends_row_and_writes_artifacts() {
        let fx = fixture(false);
        let reply = "```json\n{\"Company\": \"Acme\", \"Budget\": \"10k\"}\n```";
        let summary = pipeline(reply).run(&fx.opts).await.unwrap();

        assert_eq!(summary.entries, 4);
        assert_eq!(summary.turns, 2);
        assert_eq!(summary.appended_row, Some(1));

        let sheet = std::fs::read_to_string(&fx.opts.spreadsheet).unwrap();
        assert_eq!(sheet, "Company,Budget,Contact\nAcme,10k,\n");

        let markdown = std::fs::read_to_string(&summary.markdown_path).unwrap();
        assert!(markdown.contains("**Alice**: Hi, I'm Alice from Acme. Our budget is 10k.\n\n**Bob**: Great, thanks."));
        assert!(!markdown.contains("[noise]"));

        let saved = std::fs::read_to_string(fx.opts.output_dir.join(EXTRACTION_FILE)).unwrap();
        assert_eq!(saved, "{\n  \"Company\": \"Acme\",\n  \"Budget\": \"10k\"\n}");
        assert!(fx.opts.output_dir.join(PLAIN_FILE).exists());
    }

    #[tokio::test]
    async fn test_raw_reply_is_not_fatal() {
        let fx = fixture(false);
        let summary = pipeline("Sorry, nothing to extract.").run(&fx.opts).await.unwrap();
        assert!(summary.extraction.unwrap().is_raw());

        let saved = std::fs::read_to_string(fx.opts.output_dir.join(EXTRACTION_FILE)).unwrap();
        assert!(saved.contains("\"raw_response\": \"Sorry, nothing to extract.\""));
        let sheet = std::fs::read_to_string(&fx.opts.spreadsheet).unwrap();
        assert_eq!(sheet, "Company,Budget,Contact\n,,\n");
    }

    #[tokio::test]
    async fn test_markdown_only_skips_extraction() {
        let fx = fixture(true);
        let summary = pipeline("{}").run(&fx.opts).await.unwrap();
        assert!(summary.extraction.is_none());
        assert!(summary.markdown_path.exists());
        assert!(!fx.opts.output_dir.join(EXTRACTION_FILE).exists());
        let sheet = std::fs::read_to_string(&fx.opts.spreadsheet).unwrap();
        assert_eq!(sheet, "Company,Budget,Contact\n");
    }

    #[tokio::test]
    async fn test_missing_spreadsheet_is_fatal_after_documents() {
        let mut fx = fixture(false);
        fx.opts.spreadsheet = fx.opts.output_dir.join("missing.csv");
        let err = pipeline("{}").run(&fx.opts).await.unwrap_err();
        assert!(err.to_string().contains("spreadsheet headers"));
        assert!(fx.opts.output_dir.join(MARKDOWN_FILE).exists());
    }
}
