use qbank_index::ScoredResult;

use crate::schema::OUTPUT_FIELDS;

pub const SYSTEM_INSTRUCTION: &str = "SYSTEM: You are an academic examiner. Use ONLY the text inside the SOURCE blocks below and no outside knowledge. \
If the sources do not contain the material needed, set status to NOT_FOUND and leave answer empty. \
Reply with a single JSON object and nothing else.";

const NO_SOURCES: &str = "(no sources retrieved)";

/// One labelled block per passage: `SOURCE:<label>:<page>` followed by the text.
pub fn render_sources(passages: &[ScoredResult]) -> String {
    if passages.is_empty() {
        return NO_SOURCES.to_string();
    }
    passages
        .iter()
        .map(|hit| {
            let meta = &hit.metadata;
            let label = if !meta.label.is_empty() {
                meta.label.as_str()
            } else if !meta.source_id.is_empty() {
                meta.source_id.as_str()
            } else {
                "source"
            };
            let page = meta
                .position
                .map(|page| page.to_string())
                .unwrap_or_else(|| "?".to_string());
            format!("SOURCE:{label}:{page}\n{}\n", meta.excerpt.trim())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn build_prompt(passages: &[ScoredResult], task: &str, marks: i64) -> String {
    format!(
        "{SYSTEM_INSTRUCTION}\nSOURCES:\n{}\n\nTask: {task} marks={marks}. Return JSON with fields [{}].\nJSON only:",
        render_sources(passages),
        OUTPUT_FIELDS.join(", ")
    )
}

pub fn with_retry_notice(base: &str, retry: usize) -> String {
    format!(
        "{base}\n# Retry {retry}: STRICT VALID JSON with fields [{}].",
        OUTPUT_FIELDS.join(", ")
    )
}
