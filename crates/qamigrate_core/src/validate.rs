use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use similar::TextDiff;
use tracing::info;

use crate::corpus::{POPULAR_LABEL, TagPolicy};
use crate::github::DiscussionsApi;
use crate::model::{RemoteComment, RemoteThread, SourceAnswer, SourcePost, SourceQuestion};
use crate::transform::{
    Action, decode_entities, image_filenames, normalize_image_urls, strip_attribution_header,
    strip_image_markup,
};

const DIFF_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct ValidationOptions {
    pub category: String,
    /// Minimum similarity, in percent, for a body to count as present.
    pub similarity_threshold: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct QuestionRef {
    pub question_id: i64,
    pub title: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestionIssues {
    pub question_id: i64,
    pub title: String,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub total_questions: usize,
    pub migrated_questions: usize,
    pub remote_threads: usize,
    pub missing: Vec<QuestionRef>,
    pub ignored: Vec<QuestionRef>,
    pub content_issues: Vec<QuestionIssues>,
    pub answer_issues: Vec<QuestionIssues>,
    pub comment_issues: Vec<QuestionIssues>,
    pub missing_popular: Vec<String>,
    pub unexpected_popular: Vec<String>,
}

impl ValidationReport {
    pub fn success_rate(&self) -> f64 {
        if self.total_questions == 0 {
            return 0.0;
        }
        self.migrated_questions as f64 / self.total_questions as f64 * 100.0
    }

    pub fn has_discrepancies(&self) -> bool {
        !(self.missing.is_empty()
            && self.content_issues.is_empty()
            && self.answer_issues.is_empty()
            && self.comment_issues.is_empty()
            && self.missing_popular.is_empty()
            && self.unexpected_popular.is_empty())
    }

    pub fn ids_with_answer_or_comment_issues(&self) -> BTreeSet<i64> {
        self.answer_issues
            .iter()
            .chain(&self.comment_issues)
            .map(|entry| entry.question_id)
            .collect()
    }

    pub fn render_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Migration Validation Report\n");
        let _ = writeln!(out, "## Summary");
        let _ = writeln!(out, "- Total Source Questions: {}", self.total_questions);
        let _ = writeln!(out, "- Successfully Migrated: {}", self.migrated_questions);
        let _ = writeln!(out, "- Success Rate: {:.1}%", self.success_rate());
        let _ = writeln!(out, "- Remote Discussions: {}", self.remote_threads);
        let _ = writeln!(out, "- Missing Questions: {}", self.missing.len());
        let _ = writeln!(out, "- Ignored Questions: {}", self.ignored.len());
        let _ = writeln!(out, "- Content Issues: {}", self.content_issues.len());
        let _ = writeln!(out, "- Answer Mismatches: {}", self.answer_issues.len());
        let _ = writeln!(out, "- Comment Mismatches: {}", self.comment_issues.len());
        let _ = writeln!(out, "- Missing Popular Tag: {}", self.missing_popular.len());
        let _ = writeln!(out, "- Tagged Popular But Are Not: {}", self.unexpected_popular.len());

        render_refs(&mut out, "Missing Questions", &self.missing);
        render_refs(&mut out, "Ignored Questions", &self.ignored);
        render_issues(&mut out, "Content Issues", &self.content_issues);
        render_issues(&mut out, "Answer Issues", &self.answer_issues);
        render_issues(&mut out, "Comment Issues", &self.comment_issues);

        if !self.missing_popular.is_empty() || !self.unexpected_popular.is_empty() {
            let _ = writeln!(out, "\n## Popular Tag Audit");
            if !self.missing_popular.is_empty() {
                let _ = writeln!(out, "### Missing popular tag");
                for title in &self.missing_popular {
                    let _ = writeln!(out, "- {title}");
                }
            }
            if !self.unexpected_popular.is_empty() {
                let _ = writeln!(out, "### Tagged as popular but are not");
                for title in &self.unexpected_popular {
                    let _ = writeln!(out, "- {title}");
                }
            }
        }

        let ids = self.ids_with_answer_or_comment_issues();
        if !ids.is_empty() {
            let _ = writeln!(out, "\n## Question IDs with Answer or Comment Issues");
            for id in ids {
                let _ = writeln!(out, "- {id}");
            }
        }
        out
    }

    /// Write the report as Markdown, or pretty JSON when `json` is set.
    pub fn write(&self, path: &Path, json: bool) -> Result<()> {
        let rendered = if json {
            serde_json::to_string_pretty(self).context("failed to serialize validation report")?
        } else {
            self.render_markdown()
        };
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(path, rendered).with_context(|| format!("failed to write {}", path.display()))
    }
}

fn render_refs(out: &mut String, heading: &str, refs: &[QuestionRef]) {
    if refs.is_empty() {
        return;
    }
    let _ = writeln!(out, "\n## {heading}");
    for entry in refs {
        let _ = writeln!(out, "- {} - {}", entry.question_id, entry.title);
    }
}

fn render_issues(out: &mut String, heading: &str, entries: &[QuestionIssues]) {
    if entries.is_empty() {
        return;
    }
    let _ = writeln!(out, "\n## {heading}");
    for entry in entries {
        let _ = writeln!(out, "### {} - {}", entry.question_id, entry.title);
        for issue in &entry.issues {
            let _ = writeln!(out, "- {issue}");
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Upper bound of the diff ratio for two strings of these lengths.
fn ratio_ceiling(left: usize, right: usize) -> f64 {
    let total = left + right;
    if total == 0 {
        return 1.0;
    }
    2.0 * left.min(right) as f64 / total as f64
}

/// Whether `source` survives in `remote` once headers and image hosts are discounted.
pub fn content_present(source: &str, remote: &str, threshold: f64) -> bool {
    let source_normalized = collapse_whitespace(&normalize_image_urls(source));
    if source_normalized.is_empty() {
        return true;
    }
    let remote_full = collapse_whitespace(&normalize_image_urls(remote));
    if remote_full.contains(&source_normalized) {
        return true;
    }

    let remote = strip_attribution_header(remote);
    let remote_normalized = collapse_whitespace(&normalize_image_urls(remote));
    let source_len = source_normalized.chars().count();
    let remote_len = remote_normalized.chars().count();
    if ratio_ceiling(source_len, remote_len) * 100.0 >= threshold {
        let ratio = TextDiff::configure()
            .timeout(DIFF_TIMEOUT)
            .diff_chars(source_normalized.as_str(), remote_normalized.as_str())
            .ratio();
        if f64::from(ratio) * 100.0 >= threshold {
            return true;
        }
    }

    let source_text = collapse_whitespace(&strip_image_markup(source));
    let remote_text = collapse_whitespace(&strip_image_markup(remote));
    !source_text.is_empty() && remote_text.contains(&source_text)
}

fn format_set(names: &BTreeSet<String>) -> String {
    names.iter().cloned().collect::<Vec<_>>().join(", ")
}

fn missing_images(source: &str, remote: &str) -> BTreeSet<String> {
    let remote = image_filenames(remote);
    image_filenames(source)
        .into_iter()
        .filter(|name| !remote.contains(name))
        .collect()
}

/// Index of the first unused candidate whose body contains `source`.
fn match_body(
    source: &str,
    candidates: &[&RemoteComment],
    used: &mut BTreeSet<usize>,
    threshold: f64,
) -> Option<usize> {
    let index = candidates
        .iter()
        .enumerate()
        .find(|(index, candidate)| {
            !used.contains(index) && content_present(source, &candidate.body, threshold)
        })
        .map(|(index, _)| index)?;
    used.insert(index);
    Some(index)
}

fn answer_label(answer: &SourceAnswer) -> String {
    answer
        .answer_id
        .map(|id| format!("Answer {id}"))
        .unwrap_or_else(|| "Answer".to_string())
}

/// Compares source questions against remote threads without touching the network.
pub struct Validator<'a> {
    policy: &'a TagPolicy,
    threshold: f64,
}

impl<'a> Validator<'a> {
    pub fn new(policy: &'a TagPolicy, threshold: f64) -> Self {
        Self { policy, threshold }
    }

    pub fn validate(&self, questions: &[SourceQuestion], threads: &[RemoteThread]) -> ValidationReport {
        let mut by_title: BTreeMap<String, &RemoteThread> = BTreeMap::new();
        for thread in threads {
            by_title.entry(thread.title.trim().to_string()).or_insert(thread);
        }

        let mut report = ValidationReport {
            total_questions: questions.len(),
            remote_threads: threads.len(),
            ..ValidationReport::default()
        };

        for question in questions {
            let title = decode_entities(&question.raw_title());
            let reference = QuestionRef {
                question_id: question.question_id,
                title: title.clone(),
            };
            let Some(thread) = by_title.get(title.trim()) else {
                if self.policy.question_is_ignored(question) {
                    report.ignored.push(reference);
                } else {
                    report.missing.push(reference);
                }
                continue;
            };
            report.migrated_questions += 1;

            let issues = [
                (self.question_content(question, &title, thread), &mut report.content_issues),
                (self.answers(question, thread), &mut report.answer_issues),
                (self.comments(question, thread), &mut report.comment_issues),
            ];
            for (issues, bucket) in issues {
                if !issues.is_empty() {
                    bucket.push(QuestionIssues {
                        question_id: question.question_id,
                        title: title.clone(),
                        issues,
                    });
                }
            }
        }

        self.popular_audit(questions, threads, &mut report);
        report
    }

    fn question_content(&self, question: &SourceQuestion, title: &str, thread: &RemoteThread) -> Vec<String> {
        let mut issues = Vec::new();
        if title != thread.title {
            issues.push(format!(
                "Title mismatch: source='{title}' vs remote='{}'",
                thread.title
            ));
        }

        let body = decode_entities(question.raw_body());
        let missing = missing_images(&body, &thread.body);
        if !missing.is_empty() {
            issues.push(format!("Missing images: {}", format_set(&missing)));
        }
        if !content_present(&body, &thread.body, self.threshold) {
            issues.push("Body content not found in discussion".to_string());
        }

        let missing_labels = self
            .policy
            .labels_for(question)
            .into_iter()
            .filter(|label| !thread.has_label(label))
            .collect::<BTreeSet<_>>();
        if !missing_labels.is_empty() {
            issues.push(format!("Missing labels: {}", format_set(&missing_labels)));
        }
        issues
    }

    fn answer_comments<'t>(thread: &'t RemoteThread) -> Vec<&'t RemoteComment> {
        let marker = Action::Answered.marker();
        thread
            .comments
            .iter()
            .filter(|comment| comment.body.contains(&marker))
            .collect()
    }

    /// Greedy one-to-one pairing of source answers with answer comments.
    fn pair_answers<'t>(
        &self,
        question: &SourceQuestion,
        candidates: &[&'t RemoteComment],
    ) -> Vec<Option<&'t RemoteComment>> {
        let mut used = BTreeSet::new();
        question
            .answers
            .iter()
            .map(|answer| {
                let body = decode_entities(answer.raw_body());
                match_body(&body, candidates, &mut used, self.threshold).map(|index| candidates[index])
            })
            .collect()
    }

    fn answers(&self, question: &SourceQuestion, thread: &RemoteThread) -> Vec<String> {
        let mut issues = Vec::new();
        let candidates = Self::answer_comments(thread);
        if question.answers.len() != candidates.len() {
            issues.push(format!(
                "Answer count mismatch: source={} vs remote={}",
                question.answers.len(),
                candidates.len()
            ));
        }

        let pairs = self.pair_answers(question, &candidates);
        for (answer, matched) in question.answers.iter().zip(&pairs) {
            let label = answer_label(answer);
            match matched {
                Some(comment) => {
                    let body = decode_entities(answer.raw_body());
                    let missing = missing_images(&body, &comment.body);
                    if !missing.is_empty() {
                        issues.push(format!("Missing images in {label}: {}", format_set(&missing)));
                    }
                    let accepted = question.is_accepted(answer);
                    if accepted && !comment.is_answer {
                        issues.push(format!("{label} is accepted in the source but not marked in the discussion"));
                    } else if !accepted && comment.is_answer {
                        issues.push(format!("{label} is marked as the answer but is not accepted in the source"));
                    }
                }
                None => issues.push(format!("{label} not found in discussion")),
            }
        }

        let marked = thread.comments.iter().filter(|comment| comment.is_answer).count();
        let source_accepted = question.accepted_answer().is_some();
        if source_accepted && marked != 1 {
            issues.push(format!(
                "Accepted answer not properly marked (marked comments: {marked})"
            ));
        } else if !source_accepted && marked > 0 {
            issues.push("Discussion has an accepted answer but the source does not".to_string());
        }
        issues.dedup();
        issues
    }

    fn comments(&self, question: &SourceQuestion, thread: &RemoteThread) -> Vec<String> {
        let mut issues = Vec::new();
        let comment_marker = Action::CommentedOn.marker();
        let question_comments = thread
            .comments
            .iter()
            .filter(|comment| comment.reply_to.is_none() && comment.body.contains(&comment_marker))
            .collect::<Vec<_>>();

        let mut used = BTreeSet::new();
        for comment in &question.comments {
            let body = decode_entities(comment.raw_body());
            if match_body(&body, &question_comments, &mut used, self.threshold).is_none() {
                issues.push(format!(
                    "Question comment {} not found in discussion",
                    comment.comment_id.map(|id| id.to_string()).unwrap_or_default()
                ));
            }
        }

        let answer_comments = Self::answer_comments(thread);
        let pairs = self.pair_answers(question, &answer_comments);
        for (answer, matched) in question.answers.iter().zip(&pairs) {
            let Some(remote_answer) = matched else {
                continue;
            };
            let replies = remote_answer.replies.iter().collect::<Vec<_>>();
            let mut used = BTreeSet::new();
            for comment in &answer.comments {
                let body = decode_entities(comment.raw_body());
                if match_body(&body, &replies, &mut used, self.threshold).is_none() {
                    issues.push(format!(
                        "Comment {} on {} not found among replies",
                        comment.comment_id.map(|id| id.to_string()).unwrap_or_default(),
                        answer_label(answer)
                    ));
                }
            }
        }

        let source_question_comments = question.comments.len();
        let source_answer_comments = question
            .answers
            .iter()
            .map(|answer| answer.comments.len())
            .sum::<usize>();
        let remote_answer_replies = answer_comments
            .iter()
            .map(|comment| comment.replies.len())
            .sum::<usize>();
        let source_total = source_question_comments + source_answer_comments;
        let remote_total = question_comments.len() + remote_answer_replies;
        if source_total != remote_total {
            issues.push(format!(
                "Comment count mismatch: source={source_total} vs remote={remote_total} \
                 (question comments: source={source_question_comments} vs remote={}, \
                 answer comments: source={source_answer_comments} vs remote={remote_answer_replies})",
                question_comments.len()
            ));
        }
        issues
    }

    fn popular_audit(
        &self,
        questions: &[SourceQuestion],
        threads: &[RemoteThread],
        report: &mut ValidationReport,
    ) {
        let expected = questions
            .iter()
            .filter(|question| {
                self.policy.is_popular(question) && !self.policy.question_is_ignored(question)
            })
            .map(|question| decode_entities(&question.raw_title()).trim().to_string())
            .collect::<BTreeSet<_>>();
        let observed = threads
            .iter()
            .filter(|thread| thread.has_label(POPULAR_LABEL))
            .map(|thread| thread.title.trim().to_string())
            .collect::<BTreeSet<_>>();
        report.missing_popular = expected.difference(&observed).cloned().collect();
        report.unexpected_popular = observed.difference(&expected).cloned().collect();
    }
}

/// Fetch the category's threads and compare them with the source corpus.
pub fn validate_migration<A: DiscussionsApi>(
    api: &mut A,
    questions: &[SourceQuestion],
    policy: &TagPolicy,
    options: &ValidationOptions,
) -> Result<ValidationReport> {
    info!("starting migration validation");
    let category_id = api.category_id(&options.category)?;
    let threads = api.list_threads(&category_id)?;
    info!(
        "found {} source questions and {} remote discussions",
        questions.len(),
        threads.len()
    );
    Ok(Validator::new(policy, options.similarity_threshold).validate(questions, &threads))
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use super::{
        ValidationOptions, Validator, content_present, ratio_ceiling, validate_migration,
    };
    use crate::assets::ImageRehoster;
    use crate::corpus::TagPolicy;
    use crate::migrate::{CleanMode, MigrationOptions, MigrationOrchestrator};
    use crate::model::{RemoteComment, RemoteLabel, RemoteThread, SourceQuestion, SourceTag};
    use crate::redirect::RedirectLog;
    use crate::testing::{FAKE_CATEGORY, FakeDiscussions};

    fn tags() -> Vec<SourceTag> {
        serde_json::from_value(json!([
            {"name": "rust", "count": 3},
            {"name": "rare", "count": 0},
            {"name": "deprecated", "count": 4}
        ]))
        .expect("tags")
    }

    fn policy() -> TagPolicy {
        TagPolicy::new(&tags(), 1, 100, &["deprecated".to_string()])
    }

    fn corpus() -> Vec<SourceQuestion> {
        serde_json::from_value(json!([
            {
                "question_id": 1,
                "title": "Accepted &amp; answered",
                "body_markdown": "How?\n\n![diagram](https://so.example/img/flow.png)",
                "creation_date": 1736935800,
                "view_count": 500,
                "tags": ["rust", "rare"],
                "accepted_answer_id": 11,
                "comments": [{"comment_id": 100, "body": "Which version?"}],
                "answers": [
                    {"answer_id": 10, "body": "Maybe this"},
                    {
                        "answer_id": 11, "body": "Definitely this",
                        "comments": [{"comment_id": 101, "body": "Worked for me"}]
                    }
                ]
            },
            {
                "question_id": 2,
                "title": "Old API",
                "body": "legacy",
                "creation_date": 1736936000,
                "tags": ["deprecated"]
            }
        ]))
        .expect("questions")
    }

    fn migrate(api: &mut FakeDiscussions, questions: &[SourceQuestion]) {
        let mut orchestrator = MigrationOrchestrator::new(
            api,
            policy(),
            ImageRehoster::default(),
            RedirectLog::in_memory(),
        );
        orchestrator
            .run(
                questions,
                &MigrationOptions {
                    category: FAKE_CATEGORY.to_string(),
                    clean: CleanMode::Keep,
                    limit: None,
                },
            )
            .expect("migrate");
    }

    fn options() -> ValidationOptions {
        ValidationOptions {
            category: FAKE_CATEGORY.to_string(),
            similarity_threshold: 95.0,
        }
    }

    #[test]
    fn migrated_corpus_validates_cleanly_and_ignored_is_not_missing() {
        let mut api = FakeDiscussions::default();
        let questions = corpus();
        migrate(&mut api, &questions);

        let thread = api.thread("Accepted & answered").expect("thread");
        assert_eq!(thread.comments.iter().filter(|comment| comment.is_answer).count(), 1);

        let report = validate_migration(&mut api, &questions, &policy(), &options()).expect("validate");
        assert_eq!(report.total_questions, 2);
        assert_eq!(report.migrated_questions, 1);
        assert!(report.missing.is_empty());
        assert_eq!(report.ignored.len(), 1);
        assert_eq!(report.ignored[0].question_id, 2);
        assert!(report.content_issues.is_empty(), "{:?}", report.content_issues);
        assert!(report.answer_issues.is_empty(), "{:?}", report.answer_issues);
        assert!(report.comment_issues.is_empty(), "{:?}", report.comment_issues);
        assert!(report.missing_popular.is_empty());
        assert!(report.unexpected_popular.is_empty());
        assert!(!report.has_discrepancies());
    }

    #[test]
    fn unmigrated_question_without_ignored_tags_is_missing() {
        let questions = corpus();
        let policy = TagPolicy::new(&tags(), 1, 100, &[]);
        let validator = Validator::new(&policy, 95.0);
        let report = validator.validate(&questions, &[]);
        assert_eq!(report.missing.len(), 2);
        assert!(report.ignored.is_empty());
        assert_eq!(report.missing_popular, vec!["Accepted & answered".to_string()]);
        assert_eq!(report.success_rate(), 0.0);
    }

    fn thread(body: &str, comments: Vec<RemoteComment>, labels: &[&str]) -> RemoteThread {
        RemoteThread {
            id: "D1".to_string(),
            number: 1,
            title: "Accepted & answered".to_string(),
            body: body.to_string(),
            url: "https://github.com/acme/forum/discussions/1".to_string(),
            labels: labels
                .iter()
                .map(|name| RemoteLabel {
                    id: format!("L-{name}"),
                    name: name.to_string(),
                })
                .collect(),
            comments,
        }
    }

    fn comment(id: &str, body: &str, is_answer: bool) -> RemoteComment {
        RemoteComment {
            id: id.to_string(),
            body: body.to_string(),
            is_answer,
            ..RemoteComment::default()
        }
    }

    #[test]
    fn discrepancies_land_in_their_buckets() {
        let questions = corpus();
        let remote = thread(
            "> [!NOTE]\n> Originally asked by X on Unknown Date\n> 0 votes\n\nHow?",
            vec![
                comment("C1", "> [!NOTE]\n> Originally answered by X on Unknown Date\n> 0 votes\n\nMaybe this", true),
                comment("C2", "> [!NOTE]\n> Originally commented on by X on Unknown Date\n> 0 votes\n\nWhich version?", false),
            ],
            &["popular"],
        );
        let policy = policy();
        let report = Validator::new(&policy, 95.0).validate(&questions, &[remote]);

        let content = &report.content_issues[0].issues;
        assert!(content.iter().any(|issue| issue == "Missing images: flow.png"), "{content:?}");
        assert!(content.iter().any(|issue| issue == "Missing labels: rust"), "{content:?}");

        let answers = &report.answer_issues[0].issues;
        assert!(answers.iter().any(|issue| issue.starts_with("Answer count mismatch: source=2 vs remote=1")));
        assert!(answers.iter().any(|issue| issue == "Answer 11 not found in discussion"));
        assert!(answers.iter().any(|issue| issue.contains("Answer 10 is marked as the answer")));

        let comments = &report.comment_issues[0].issues;
        assert!(comments.iter().any(|issue| issue.starts_with("Comment count mismatch: source=2 vs remote=1")));
        assert_eq!(
            report.ids_with_answer_or_comment_issues().into_iter().collect::<Vec<_>>(),
            vec![1]
        );
        assert!(report.missing_popular.is_empty());
    }

    #[test]
    fn popular_label_on_unpopular_thread_is_reported() {
        let questions: Vec<SourceQuestion> =
            serde_json::from_value(json!([{"question_id": 5, "title": "Quiet", "view_count": 3}]))
                .expect("questions");
        let mut remote = thread("", Vec::new(), &["popular"]);
        remote.title = "Quiet".to_string();
        let policy = policy();
        let report = Validator::new(&policy, 95.0).validate(&questions, &[remote]);
        assert_eq!(report.unexpected_popular, vec!["Quiet".to_string()]);
    }

    #[test]
    fn content_matching_discounts_headers_and_image_hosts() {
        let remote = "> [!NOTE]\n> Originally asked by A on Unknown Date\n> 1 vote\n\n\
                      See ![d](https://github.com/acme/forum/blob/main/discussion_images/d.png?raw=true)   now";
        assert!(content_present("See ![d](https://so.example/d.png) now", remote, 95.0));
        assert!(!content_present("Completely different text here", remote, 95.0));
        assert!(content_present("", remote, 95.0));
        assert!(content_present("See now!", "See now", 80.0));
        assert!(!content_present("See now!", "See now", 100.0));
    }

    #[test]
    fn bodies_opening_with_a_quote_still_match() {
        let questions: Vec<SourceQuestion> = serde_json::from_value(json!([{
            "question_id": 4,
            "title": "Linker missing",
            "body_markdown": "> error: linker not found\n\nHow do I fix this?",
            "tags": ["rust"],
            "accepted_answer_id": 5,
            "answers": [{
                "answer_id": 5,
                "body_markdown": "> How do I fix this?\n\nInstall cc.",
                "comments": [{"comment_id": 6, "body": "> Install cc.\n\nThat worked"}]
            }]
        }]))
        .expect("questions");
        let mut api = FakeDiscussions::default();
        migrate(&mut api, &questions);

        let report = validate_migration(&mut api, &questions, &policy(), &options()).expect("validate");
        assert_eq!(report.migrated_questions, 1);
        assert!(report.content_issues.is_empty(), "{:?}", report.content_issues);
        assert!(report.answer_issues.is_empty(), "{:?}", report.answer_issues);
        assert!(report.comment_issues.is_empty(), "{:?}", report.comment_issues);
    }

    #[test]
    fn length_mismatch_skips_the_diff() {
        assert_eq!(ratio_ceiling(0, 0), 1.0);
        assert_eq!(ratio_ceiling(10, 10), 1.0);
        assert!(ratio_ceiling(10, 1_000) * 100.0 < 95.0);
        let long_remote = "x".repeat(5_000);
        assert!(!content_present("short answer text", &long_remote, 95.0));
    }

    #[test]
    fn report_renders_markdown_and_json() {
        let questions = corpus();
        let policy = TagPolicy::new(&tags(), 1, 100, &[]);
        let validator = Validator::new(&policy, 95.0);
        let report = validator.validate(&questions, &[]);

        let markdown = report.render_markdown();
        assert!(markdown.starts_with("# Migration Validation Report"));
        assert!(markdown.contains("- Success Rate: 0.0%"));
        assert!(markdown.contains("## Missing Questions\n- 1 - Accepted & answered\n- 2 - Old API\n"));
        assert!(markdown.contains("### Missing popular tag\n- Accepted & answered"));

        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("reports/validation.json");
        report.write(&path, true).expect("write json");
        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(parsed["missing"][1]["question_id"], 2);
    }
}
