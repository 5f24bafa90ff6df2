use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::transform::parse_timestamp_text;

pub const UNKNOWN_USER: &str = "Unknown User";

/// Creation time as found in the export, normalized once at parse time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CreationDate {
    Epoch(i64),
    Text(String),
    #[default]
    Missing,
}

impl CreationDate {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Bool(flag) => Self::Epoch(i64::from(*flag)),
            Value::Number(number) => number
                .as_i64()
                .or_else(|| {
                    number
                        .as_f64()
                        .filter(|value| value.is_finite())
                        .map(|value| value.floor() as i64)
                })
                .map(Self::Epoch)
                .unwrap_or(Self::Missing),
            Value::String(text) if !text.trim().is_empty() => Self::Text(text.trim().to_string()),
            _ => Self::Missing,
        }
    }

    pub fn epoch_seconds(&self) -> Option<i64> {
        match self {
            Self::Epoch(seconds) => Some(*seconds),
            Self::Text(text) => parse_timestamp_text(text).map(|parsed| parsed.timestamp()),
            Self::Missing => None,
        }
    }

    /// Chronological sort key; undated records sort first.
    pub fn sort_key(&self) -> i64 {
        self.epoch_seconds().unwrap_or(0)
    }
}

impl<'de> Deserialize<'de> for CreationDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_value(&value))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceOwner {
    pub display_name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl SourceOwner {
    pub fn author_name(&self) -> Option<String> {
        if let Some(name) = self.display_name.as_deref().map(str::trim)
            && !name.is_empty()
        {
            return Some(name.to_string());
        }
        let full = format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or_default(),
            self.last_name.as_deref().unwrap_or_default()
        );
        let full = full.trim();
        if full.is_empty() {
            None
        } else {
            Some(full.to_string())
        }
    }
}

/// Fields shared by questions, answers and comments.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostContent {
    pub body_markdown: Option<String>,
    pub body_html: Option<String>,
    pub body: Option<String>,
    pub owner: Option<SourceOwner>,
    #[serde(default)]
    pub creation_date: CreationDate,
    #[serde(default)]
    pub score: i64,
}

impl PostContent {
    /// Markdown when exported, otherwise the HTML-encoded body.
    pub fn raw_body(&self) -> &str {
        self.body_markdown
            .as_deref()
            .or(self.body_html.as_deref())
            .or(self.body.as_deref())
            .unwrap_or_default()
    }

    pub fn author_name(&self) -> String {
        self.owner
            .as_ref()
            .and_then(SourceOwner::author_name)
            .unwrap_or_else(|| UNKNOWN_USER.to_string())
    }
}

pub trait SourcePost {
    fn content(&self) -> &PostContent;

    fn raw_body(&self) -> &str {
        self.content().raw_body()
    }

    fn author_name(&self) -> String {
        self.content().author_name()
    }

    fn created(&self) -> &CreationDate {
        &self.content().creation_date
    }

    fn score(&self) -> i64 {
        self.content().score
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceComment {
    pub comment_id: Option<i64>,
    #[serde(flatten)]
    pub content: PostContent,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceAnswer {
    pub answer_id: Option<i64>,
    #[serde(flatten)]
    pub content: PostContent,
    #[serde(default)]
    pub is_accepted: bool,
    pub link: Option<String>,
    pub share_link: Option<String>,
    #[serde(default)]
    pub comments: Vec<SourceComment>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceQuestion {
    pub question_id: i64,
    pub title: Option<String>,
    #[serde(flatten)]
    pub content: PostContent,
    #[serde(default)]
    pub view_count: u64,
    #[serde(default)]
    pub tags: Vec<String>,
    pub accepted_answer_id: Option<i64>,
    pub link: Option<String>,
    pub share_link: Option<String>,
    #[serde(default)]
    pub comments: Vec<SourceComment>,
    #[serde(default)]
    pub answers: Vec<SourceAnswer>,
}

impl SourcePost for SourceQuestion {
    fn content(&self) -> &PostContent {
        &self.content
    }
}

impl SourcePost for SourceAnswer {
    fn content(&self) -> &PostContent {
        &self.content
    }
}

impl SourcePost for SourceComment {
    fn content(&self) -> &PostContent {
        &self.content
    }
}

impl SourceQuestion {
    pub fn raw_title(&self) -> String {
        match self.title.as_deref() {
            Some(title) if !title.trim().is_empty() => title.to_string(),
            _ => format!("Question #{}", self.question_id),
        }
    }

    pub fn source_urls(&self) -> Vec<&str> {
        canonical_urls(self.link.as_deref(), self.share_link.as_deref())
    }

    pub fn accepted_answer(&self) -> Option<i64> {
        self.accepted_answer_id.or_else(|| {
            self.answers
                .iter()
                .find(|answer| answer.is_accepted)
                .and_then(|answer| answer.answer_id)
        })
    }

    pub fn is_accepted(&self, answer: &SourceAnswer) -> bool {
        answer.is_accepted
            || (answer.answer_id.is_some() && answer.answer_id == self.accepted_answer_id)
    }
}

impl SourceAnswer {
    pub fn source_urls(&self) -> Vec<&str> {
        canonical_urls(self.link.as_deref(), self.share_link.as_deref())
    }
}

fn canonical_urls<'a>(link: Option<&'a str>, share_link: Option<&'a str>) -> Vec<&'a str> {
    let mut urls = Vec::with_capacity(2);
    for url in [link, share_link].into_iter().flatten() {
        let url = url.trim();
        if !url.is_empty() && !urls.contains(&url) {
            urls.push(url);
        }
    }
    urls
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SourceTag {
    pub name: String,
    #[serde(default)]
    pub count: u64,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteLabel {
    pub id: String,
    pub name: String,
}

/// A discussion comment; replies reuse the same shape with no nested replies.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemoteComment {
    pub id: String,
    pub body: String,
    pub url: String,
    pub is_answer: bool,
    pub reply_to: Option<String>,
    pub replies: Vec<RemoteComment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemoteThread {
    pub id: String,
    pub number: i64,
    pub title: String,
    pub body: String,
    pub url: String,
    pub labels: Vec<RemoteLabel>,
    pub comments: Vec<RemoteComment>,
}

impl RemoteThread {
    pub fn has_label(&self, name: &str) -> bool {
        self.labels.iter().any(|label| label.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedThread {
    pub id: String,
    pub number: i64,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedComment {
    pub id: String,
    pub url: String,
}
