//! Deterministic offline responder. It never calls out and answers from the
//! first `SOURCE:` block in the prompt, which keeps demos and tests
//! reproducible.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde_json::json;

pub(crate) fn synthesize_response(prompt: &str) -> String {
    let marks = parse_marks(prompt).unwrap_or(0);
    let task = extract_task(prompt);
    let Some((reference, passage)) = first_source_block(prompt) else {
        return json!({
            "question_id": question_id(&task, ""),
            "question_text": task,
            "marks": marks,
            "answer": "",
            "answer_format": "text",
            "page_references": [],
            "diagram_images": [],
            "verbatim_quotes": [],
            "status": "NOT_FOUND",
        })
        .to_string();
    };
    let quote = summarize_text(&passage, 16);
    let answer = summarize_text(&passage, (marks.max(1) as usize) * 15);
    json!({
        "question_id": question_id(&task, &passage),
        "question_text": format!("{} ({}): explain \"{}\"", task, reference, quote),
        "marks": marks,
        "answer": answer,
        "answer_format": if marks >= 5 { "points" } else { "text" },
        "page_references": [],
        "diagram_images": [],
        "verbatim_quotes": [quote],
        "status": "FOUND",
    })
    .to_string()
}

fn parse_marks(prompt: &str) -> Option<i64> {
    let task_line = prompt
        .lines()
        .find(|line| line.trim_start().starts_with("Task:"))
        .unwrap_or(prompt);
    let start = task_line.find("marks=")? + "marks=".len();
    let digits: String = task_line[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

fn extract_task(prompt: &str) -> String {
    prompt
        .lines()
        .find_map(|line| line.trim().strip_prefix("Task:"))
        .map(|rest| rest.split(" marks=").next().unwrap_or(rest).trim().to_string())
        .unwrap_or_default()
}

fn first_source_block(prompt: &str) -> Option<(String, String)> {
    let mut lines = prompt.lines();
    while let Some(line) = lines.next() {
        if let Some(reference) = line.trim().strip_prefix("SOURCE:") {
            let body: Vec<&str> = lines
                .by_ref()
                .take_while(|l| !l.trim().is_empty() && !l.trim().starts_with("SOURCE:"))
                .collect();
            return Some((reference.to_string(), body.join(" ")));
        }
    }
    None
}

fn question_id(task: &str, passage: &str) -> String {
    let mut hasher = DefaultHasher::new();
    task.hash(&mut hasher);
    passage.hash(&mut hasher);
    format!("q{:08x}", hasher.finish() as u32)
}

fn summarize_text(text: &str, max_words: usize) -> String {
    text.split_whitespace()
        .take(max_words)
        .collect::<Vec<&str>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn answers_from_first_source_block() {
        let prompt = "SYSTEM: be strict\nSOURCES:\nSOURCE:unit1.pdf:4\nOhm's law relates voltage and current.\n\nSOURCE:unit2.pdf:1\nOther.\n\nTask: Generate a 5-mark question marks=5. Return JSON";
        let value: Value = serde_json::from_str(&synthesize_response(prompt)).unwrap();
        assert_eq!(value["status"], "FOUND");
        assert_eq!(value["marks"], 5);
        assert!(value["question_text"]
            .as_str()
            .unwrap()
            .contains("unit1.pdf:4"));
        assert!(value["answer"].as_str().unwrap().starts_with("Ohm's law"));
    }

    #[test]
    fn same_prompt_same_output() {
        let prompt = "SOURCE:a:1\ntext\n\nTask: t marks=2.";
        assert_eq!(synthesize_response(prompt), synthesize_response(prompt));
    }

    #[test]
    fn task_and_marks_are_parsed() {
        assert_eq!(parse_marks("x marks=10. y"), Some(10));
        assert_eq!(parse_marks("nothing"), None);
        assert_eq!(
            extract_task("FILES\nTask: Generate a 2-mark question marks=2. Return"),
            "Generate a 2-mark question"
        );
    }

    #[test]
    fn both_outcomes_carry_the_full_question_schema() {
        let found = "SOURCE:a.pdf:2\nCapacitors store charge.\n\nTask: t marks=3.";
        for prompt in [found, "Task: t marks=3."] {
            let value: Value = serde_json::from_str(&synthesize_response(prompt)).unwrap();
            for key in [
                "question_id",
                "question_text",
                "marks",
                "answer",
                "answer_format",
                "page_references",
                "diagram_images",
                "verbatim_quotes",
                "status",
            ] {
                assert!(value.get(key).is_some(), "{key} missing");
            }
        }
    }
}
