use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct ExtractReport {
    pub requested: usize,
    pub duplicates_removed: usize,
    pub questions: usize,
    pub answers: usize,
    pub comments: usize,
    pub unknown_question_ids: Vec<i64>,
}

/// Copy the questions named in `question_ids` into a new export file.
///
/// Records are copied verbatim in source file order, so the subset can be fed
/// back into `migrate` to retry failed questions.
pub fn extract_questions(
    questions_path: &Path,
    question_ids: &[i64],
    output: &Path,
) -> Result<ExtractReport> {
    let mut wanted = BTreeSet::new();
    let unique = question_ids.iter().filter(|id| wanted.insert(**id)).count();
    if unique == 0 {
        bail!("no question ids to extract");
    }

    let content = fs::read_to_string(questions_path)
        .with_context(|| format!("failed to read questions file {}", questions_path.display()))?;
    let records: Vec<Value> = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse questions file {}", questions_path.display()))?;

    let mut found = BTreeSet::new();
    let extracted = records
        .into_iter()
        .filter(|record| {
            record
                .get("question_id")
                .and_then(Value::as_i64)
                .is_some_and(|id| wanted.contains(&id) && found.insert(id))
        })
        .collect::<Vec<_>>();

    let unknown_question_ids = wanted.difference(&found).copied().collect::<Vec<_>>();
    for id in &unknown_question_ids {
        warn!("question {id} not found in {}", questions_path.display());
    }
    if extracted.is_empty() {
        bail!("none of the requested questions exist in {}", questions_path.display());
    }

    let answers: usize = extracted.iter().map(|record| array_len(record, "answers")).sum();
    let comments: usize = extracted
        .iter()
        .map(|record| {
            let on_answers: usize = record
                .get("answers")
                .and_then(Value::as_array)
                .map(|answers| answers.iter().map(|answer| array_len(answer, "comments")).sum())
                .unwrap_or(0);
            array_len(record, "comments") + on_answers
        })
        .sum();

    if let Some(parent) = output.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let rendered = serde_json::to_string_pretty(&extracted)?;
    fs::write(output, rendered)
        .with_context(|| format!("failed to write {}", output.display()))?;
    info!("extracted {} questions to {}", extracted.len(), output.display());

    Ok(ExtractReport {
        requested: question_ids.len(),
        duplicates_removed: question_ids.len() - unique,
        questions: extracted.len(),
        answers,
        comments,
        unknown_question_ids,
    })
}

fn array_len(record: &Value, key: &str) -> usize {
    record.get(key).and_then(Value::as_array).map_or(0, Vec::len)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::{Value, json};
    use tempfile::tempdir;

    use super::extract_questions;

    #[test]
    fn extracts_requested_questions_in_file_order() {
        let dir = tempdir().expect("tempdir");
        let source = dir.path().join("questions.json");
        fs::write(
            &source,
            json!([
                {"question_id": 1, "title": "one", "custom": "kept"},
                {"question_id": 2, "title": "two", "comments": [{"body": "c"}],
                    "answers": [{"answer_id": 20, "comments": [{"body": "a"}, {"body": "b"}]}]},
                {"question_id": 3, "title": "three"}
            ])
            .to_string(),
        )
        .expect("write source");
        let output = dir.path().join("retry/subset.json");

        let report = extract_questions(&source, &[2, 1, 2, 99], &output).expect("extract");
        assert_eq!(report.requested, 4);
        assert_eq!(report.duplicates_removed, 1);
        assert_eq!(report.questions, 2);
        assert_eq!(report.answers, 1);
        assert_eq!(report.comments, 3);
        assert_eq!(report.unknown_question_ids, vec![99]);

        let written: Vec<Value> =
            serde_json::from_str(&fs::read_to_string(&output).expect("read")).expect("parse");
        let ids = written
            .iter()
            .map(|record| record["question_id"].as_i64().expect("id"))
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(written[0]["custom"], "kept");
    }

    #[test]
    fn no_matching_questions_is_an_error() {
        let dir = tempdir().expect("tempdir");
        let source = dir.path().join("questions.json");
        fs::write(&source, json!([{"question_id": 1}]).to_string()).expect("write source");
        let output = dir.path().join("subset.json");

        let error = extract_questions(&source, &[5], &output).expect_err("must fail");
        assert!(error.to_string().contains("none of the requested questions"));
        assert!(!output.exists());
        assert!(extract_questions(&source, &[], &output).is_err());
    }
}
