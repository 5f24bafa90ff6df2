use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;

use crate::model::{SourceQuestion, SourceTag};

/// Label applied to questions whose view count meets the popularity threshold.
pub const POPULAR_LABEL: &str = "popular";

pub fn load_questions(path: &Path) -> Result<Vec<SourceQuestion>> {
    load_json_array(path, "questions")
}

pub fn load_tags(path: &Path) -> Result<Vec<SourceTag>> {
    load_json_array(path, "tags")
}

fn load_json_array<T: DeserializeOwned>(path: &Path, kind: &str) -> Result<Vec<T>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read {kind} file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse {kind} file {}", path.display()))
}

/// Questions in ascending creation order; ties keep file order.
pub fn chronological(questions: &[SourceQuestion]) -> Vec<&SourceQuestion> {
    let mut ordered = questions.iter().collect::<Vec<_>>();
    ordered.sort_by_key(|question| question.content.creation_date.sort_key());
    ordered
}

/// Tag usage thresholds, the ignore list and the popularity rule.
#[derive(Debug, Clone)]
pub struct TagPolicy {
    min_usage: u64,
    popular_views: u64,
    ignored: BTreeSet<String>,
    counts: BTreeMap<String, u64>,
    descriptions: BTreeMap<String, String>,
}

impl TagPolicy {
    pub fn new(tags: &[SourceTag], min_usage: u64, popular_views: u64, ignored: &[String]) -> Self {
        Self {
            min_usage,
            popular_views,
            ignored: ignored
                .iter()
                .map(|tag| tag.trim().to_string())
                .filter(|tag| !tag.is_empty())
                .collect(),
            counts: tags.iter().map(|tag| (tag.name.clone(), tag.count)).collect(),
            descriptions: tags
                .iter()
                .filter_map(|tag| {
                    tag.description
                        .as_ref()
                        .map(|description| (tag.name.clone(), description.clone()))
                })
                .collect(),
        }
    }

    /// Usage count; tags missing from the tags file count as zero.
    pub fn usage(&self, tag: &str) -> u64 {
        self.counts.get(tag).copied().unwrap_or(0)
    }

    pub fn is_under_threshold(&self, tag: &str) -> bool {
        self.usage(tag) < self.min_usage
    }

    pub fn is_ignored(&self, tag: &str) -> bool {
        self.ignored.contains(tag)
    }

    /// Names of known tags below the usage threshold.
    pub fn under_threshold(&self) -> Vec<String> {
        self.counts
            .keys()
            .filter(|tag| self.is_under_threshold(tag))
            .cloned()
            .collect()
    }

    pub fn question_is_ignored(&self, question: &SourceQuestion) -> bool {
        question.tags.iter().any(|tag| self.is_ignored(tag))
    }

    /// Tags of a question that become labels, in source order.
    pub fn labels_for(&self, question: &SourceQuestion) -> Vec<String> {
        let mut labels = Vec::new();
        for tag in &question.tags {
            if !self.is_under_threshold(tag) && !self.is_ignored(tag) && !labels.contains(tag) {
                labels.push(tag.clone());
            }
        }
        labels
    }

    pub fn is_popular(&self, question: &SourceQuestion) -> bool {
        question.view_count >= self.popular_views
    }

    /// Every label worth provisioning, with its description.
    pub fn provisionable(&self, questions: &[SourceQuestion]) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        for (name, count) in &self.counts {
            if *count >= self.min_usage && !self.is_ignored(name) {
                labels.insert(name.clone(), self.description(name));
            }
        }
        for question in questions {
            if self.question_is_ignored(question) {
                continue;
            }
            for label in self.labels_for(question) {
                let description = self.description(&label);
                labels.entry(label).or_insert(description);
            }
        }
        labels
    }

    pub fn description(&self, tag: &str) -> String {
        self.descriptions.get(tag).cloned().unwrap_or_default()
    }
}
