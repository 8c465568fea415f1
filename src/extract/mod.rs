pub mod prompts;

use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Serialize, Serializer};
use serde_json::Value;
use tracing::{debug, info};

use crate::llm::{ChatModel, Message};

/// Reserved key under which an unparseable reply is kept.
pub const RAW_RESPONSE_KEY: &str = "raw_response";

static JSON_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```json[ \t]*\r?\n(.*?)\r?\n[ \t]*```").unwrap());
static ANY_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[^\n`]*\r?\n(.*?)\r?\n[ \t]*```").unwrap());
static FIRST_OBJECT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\{.*?\}").unwrap());
static WIDEST_OBJECT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\{.*\}").unwrap());

/// What the model gave back for one transcript.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// Field name to value, in header order. Fields the model left out are
    /// simply absent.
    Fields(Vec<(String, String)>),
    /// No structured payload could be recovered.
    Raw { raw_response: String },
}

impl Extraction {
    pub fn get(&self, field: &str) -> Option<&str> {
        match self {
            Self::Fields(pairs) => pairs
                .iter()
                .find(|(name, _)| name == field)
                .map(|(_, value)| value.as_str()),
            Self::Raw { .. } => None,
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, Self::Raw { .. })
    }
}

/// Serialized as a flat JSON object; field order is kept.
impl Serialize for Extraction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Fields(pairs) => serializer.collect_map(pairs.iter().map(|(k, v)| (k, v))),
            Self::Raw { raw_response } => {
                serializer.collect_map([(RAW_RESPONSE_KEY, raw_response)])
            }
        }
    }
}

pub struct Extractor<M> {
    model: M,
}

impl<M: ChatModel> Extractor<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }

    /// One model call per invocation. Transport failures propagate; an
    /// unstructured reply degrades to [`Extraction::Raw`].
    pub async fn extract(&self, document: &str, fields: &[String]) -> Result<Extraction> {
        let messages = vec![
            Message::system(prompts::SYSTEM_PROMPT),
            Message::user(prompts::build_extraction_prompt(fields, document)),
        ];
        info!(fields = fields.len(), document_len = document.len(), "Requesting extraction");

        let reply = self
            .model
            .chat(&messages)
            .await
            .context("Failed to extract data with the language model")?;
        debug!(reply_len = reply.len(), "Extraction reply received");

        Ok(parse_response(&reply, fields))
    }
}

/// Recover a field mapping from free text.
///
/// Tries a ```json fence, then any fence, then the first `{...}` span. The
/// first pattern that matches decides; if its contents are not a JSON object
/// the whole reply is returned as [`Extraction::Raw`].
pub fn parse_response(reply: &str, fields: &[String]) -> Extraction {
    let candidate = JSON_FENCE
        .captures(reply)
        .or_else(|| ANY_FENCE.captures(reply))
        .and_then(|c| c.get(1))
        .map(|m| vec![m.as_str()])
        .or_else(|| {
            FIRST_OBJECT.find(reply).map(|first| {
                let mut spans = vec![first.as_str()];
                // nested objects need the widest span
                if let Some(widest) = WIDEST_OBJECT.find(reply) {
                    spans.push(widest.as_str());
                }
                spans
            })
        });

    let object = candidate.and_then(|spans| {
        spans
            .into_iter()
            .find_map(|span| match serde_json::from_str::<Value>(span.trim()) {
                Ok(Value::Object(map)) => Some(map),
                _ => None,
            })
    });

    match object {
        Some(map) => Extraction::Fields(to_field_map(map, fields)),
        None => Extraction::Raw {
            raw_response: reply.to_string(),
        },
    }
}

/// Pick the requested fields out of `map`, in header order.
fn to_field_map(mut map: serde_json::Map<String, Value>, fields: &[String]) -> Vec<(String, String)> {
    let mut out = Vec::with_capacity(fields.len());
    for field in fields {
        let text = match map.remove(field) {
            None | Some(Value::Null) => continue,
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
        };
        out.push((field.clone(), text));
    }
    for key in map.keys() {
        debug!(key = %key, "Dropping field not in spreadsheet headers");
    }
    out
}
