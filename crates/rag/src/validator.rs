use once_cell::sync::Lazy;
use qbank_index::ScoredResult;
use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::schema::{GenerationResult, GenerationStatus, OUTPUT_FIELDS};

pub const BACKFILL_PASSAGES: usize = 3;

static UNQUOTED_KEY: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r#"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)(\s*:)"#).ok());

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("json_parse_error: {0}")]
    Parse(String),
    #[error("expected a JSON object")]
    NotAnObject,
    #[error("Missing field: {0}")]
    MissingField(&'static str),
    #[error("marks must be integer")]
    MarksNotInteger,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedObject {
    pub object: Map<String, Value>,
    /// Text that actually parsed; differs from the raw input after repair.
    pub text: String,
    pub repaired: bool,
}

/// Parse raw model output, falling back to structural repair when the text is
/// not valid JSON as-is.
pub fn parse_object(raw: &str) -> Result<ParsedObject, ValidationError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(object)) => Ok(ParsedObject {
            object,
            text: raw.to_string(),
            repaired: false,
        }),
        Ok(_) => Err(ValidationError::NotAnObject),
        Err(parse_err) => {
            let Some(text) = repair(raw) else {
                return Err(ValidationError::Parse(parse_err.to_string()));
            };
            match serde_json::from_str::<Value>(&text) {
                Ok(Value::Object(object)) => Ok(ParsedObject {
                    object,
                    text,
                    repaired: true,
                }),
                Ok(_) => Err(ValidationError::NotAnObject),
                Err(_) => Err(ValidationError::Parse(parse_err.to_string())),
            }
        }
    }
}

/// Extract the first balanced `{...}` span and, if it still does not parse,
/// quote bare object keys.
pub fn repair(raw: &str) -> Option<String> {
    let span = first_balanced_object(raw)?;
    if serde_json::from_str::<Value>(span).is_ok() {
        return Some(span.to_string());
    }
    let regex = UNQUOTED_KEY.as_ref()?;
    Some(regex.replace_all(span, r#"$1"$2"$3"#).into_owned())
}

fn first_balanced_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in raw[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

pub fn validate_object(object: &Map<String, Value>) -> Result<GenerationResult, ValidationError> {
    for field in OUTPUT_FIELDS {
        if !object.contains_key(field) {
            return Err(ValidationError::MissingField(field));
        }
    }
    let marks = object
        .get("marks")
        .and_then(Value::as_i64)
        .ok_or(ValidationError::MarksNotInteger)?;
    let result = GenerationResult {
        question_id: text_field(object, "question_id"),
        question_text: text_field(object, "question_text"),
        marks,
        answer: text_field(object, "answer"),
        answer_format: text_field(object, "answer_format"),
        page_references: list_field(object, "page_references"),
        diagram_images: list_field(object, "diagram_images"),
        verbatim_quotes: list_field(object, "verbatim_quotes"),
        status: GenerationStatus::parse(&text_field(object, "status")),
    };
    Ok(result.normalized())
}

pub fn validate(raw: &str) -> Result<GenerationResult, ValidationError> {
    let parsed = parse_object(raw)?;
    validate_object(&parsed.object)
}

pub fn not_found(task: &str, marks: i64, question_id: impl Into<String>) -> GenerationResult {
    GenerationResult {
        question_id: question_id.into(),
        question_text: task.to_string(),
        marks,
        answer: String::new(),
        answer_format: "text".to_string(),
        page_references: Vec::new(),
        diagram_images: Vec::new(),
        verbatim_quotes: Vec::new(),
        status: GenerationStatus::NotFound,
    }
}

pub fn backfill_page_references(result: &mut GenerationResult, passages: &[ScoredResult]) {
    if !result.is_found() || !result.page_references.is_empty() {
        return;
    }
    result.page_references = passages
        .iter()
        .take(BACKFILL_PASSAGES)
        .filter_map(|hit| hit.metadata.page_reference())
        .collect();
}

fn text_field(object: &Map<String, Value>, key: &str) -> String {
    match object.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn list_field(object: &Map<String, Value>, key: &str) -> Vec<String> {
    match object.get(key) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .filter(|item| !item.is_empty())
            .collect(),
        Some(Value::String(s)) if s.trim().is_empty() => Vec::new(),
        Some(Value::String(s)) => vec![s.clone()],
        Some(other) => vec![other.to_string()],
    }
}
