use serde::{Deserialize, Serialize};

pub const OUTPUT_FIELDS: [&str; 9] = [
    "question_id",
    "question_text",
    "marks",
    "answer",
    "answer_format",
    "page_references",
    "diagram_images",
    "verbatim_quotes",
    "status",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GenerationStatus {
    #[serde(rename = "FOUND")]
    Found,
    #[serde(rename = "NOT_FOUND")]
    NotFound,
}

impl GenerationStatus {
    pub fn parse(value: &str) -> Self {
        let normalized: String = value
            .trim()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        if normalized.eq_ignore_ascii_case("NOTFOUND") {
            GenerationStatus::NotFound
        } else {
            GenerationStatus::Found
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationStatus::Found => "FOUND",
            GenerationStatus::NotFound => "NOT_FOUND",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub question_id: String,
    pub question_text: String,
    pub marks: i64,
    pub answer: String,
    pub answer_format: String,
    pub page_references: Vec<String>,
    pub diagram_images: Vec<String>,
    pub verbatim_quotes: Vec<String>,
    pub status: GenerationStatus,
}

impl GenerationResult {
    /// A NOT_FOUND result never carries an answer or page references.
    pub fn normalized(mut self) -> Self {
        if self.status == GenerationStatus::NotFound {
            self.answer.clear();
            self.page_references.clear();
        }
        self
    }

    pub fn is_found(&self) -> bool {
        self.status == GenerationStatus::Found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parsing_is_lenient() {
        assert_eq!(GenerationStatus::parse("NOT_FOUND"), GenerationStatus::NotFound);
        assert_eq!(GenerationStatus::parse(" not found "), GenerationStatus::NotFound);
        assert_eq!(GenerationStatus::parse("FOUND"), GenerationStatus::Found);
        assert_eq!(GenerationStatus::parse("whatever"), GenerationStatus::Found);
    }

    #[test]
    fn status_serializes_with_wire_names() {
        let json = serde_json::to_string(&GenerationStatus::NotFound).unwrap();
        assert_eq!(json, "\"NOT_FOUND\"");
    }
}
