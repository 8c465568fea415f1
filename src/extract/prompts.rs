pub const SYSTEM_PROMPT: &str =
    "You are an assistant specialized in extracting structured information from conversation transcripts.";

/// Value the model is told to use for fields it cannot find.
pub const NOT_FOUND: &str = "Not found in transcript";

/// Build the user prompt: requested fields in schema order, the sentinel rule,
/// then the document verbatim.
pub fn build_extraction_prompt(fields: &[String], document: &str) -> String {
    let field_list = fields
        .iter()
        .map(|f| format!("- {}", f))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"
I need to extract specific information from the following transcript.
Please extract the following fields from the transcript:
{field_list}

Return the data in a valid JSON format where each field corresponds to the extracted information.
If a field cannot be found, indicate with "{NOT_FOUND}".

Transcript:
{document}
"#
    )
}
