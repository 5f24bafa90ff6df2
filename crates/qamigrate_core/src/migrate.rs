use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::assets::ImageRehoster;
use crate::corpus::{POPULAR_LABEL, TagPolicy, chronological};
use crate::delete::{CleanReport, clean_category};
use crate::error::MigrateError;
use crate::github::DiscussionsApi;
use crate::model::{SourcePost, SourceQuestion};
use crate::redirect::{RedirectLog, RedirectRecord};
use crate::transform::{Action, attribution_header, decode_entities};

pub const LABEL_COLOR: &str = "ededed";
pub const MAX_LABEL_DESCRIPTION: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MigrationPhase {
    Idle,
    Clean,
    LabelProvisioning,
    ThreadReplay,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CleanMode {
    #[default]
    Keep,
    /// Empty the category, then migrate.
    Clean,
    /// Empty the category and stop.
    CleanOnly,
}

#[derive(Debug, Clone)]
pub struct MigrationOptions {
    pub category: String,
    pub clean: CleanMode,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedQuestion {
    pub question_id: i64,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    pub questions: usize,
    pub created: usize,
    pub resumed: usize,
    pub ignored: usize,
    pub failed: Vec<FailedQuestion>,
    pub labels_created: usize,
    pub comments_created: usize,
    pub answers_marked: usize,
    pub images_uploaded: usize,
    pub redirects_written: usize,
    pub clean: Option<CleanReport>,
    pub request_count: usize,
}

enum QuestionOutcome {
    Created,
    Resumed,
    Ignored,
}

/// Label descriptions are capped at 100 characters, ellipsis included.
pub fn truncate_description(description: &str) -> String {
    if description.chars().count() <= MAX_LABEL_DESCRIPTION {
        return description.to_string();
    }
    let mut truncated = description
        .chars()
        .take(MAX_LABEL_DESCRIPTION - 3)
        .collect::<String>();
    truncated.push_str("...");
    truncated
}

fn by_creation<T: SourcePost>(items: &[T]) -> Vec<&T> {
    let mut ordered = items.iter().collect::<Vec<_>>();
    ordered.sort_by_key(|item| item.created().sort_key());
    ordered
}

/// Errors that end the whole run instead of a single question.
/// An exhausted retry budget only costs the current question.
fn aborts_run(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<MigrateError>()
        .is_some_and(|error| error.is_fatal() && !matches!(error, MigrateError::Api { .. }))
}

pub struct MigrationOrchestrator<'a, A: DiscussionsApi> {
    api: &'a mut A,
    policy: TagPolicy,
    images: ImageRehoster,
    redirects: RedirectLog,
    phase: MigrationPhase,
    /// Label name to remote id.
    labels: BTreeMap<String, String>,
    /// Trimmed thread title to remote id, for the target category.
    threads_by_title: BTreeMap<String, String>,
}

impl<'a, A: DiscussionsApi> MigrationOrchestrator<'a, A> {
    pub fn new(
        api: &'a mut A,
        policy: TagPolicy,
        images: ImageRehoster,
        redirects: RedirectLog,
    ) -> Self {
        Self {
            api,
            policy,
            images,
            redirects,
            phase: MigrationPhase::Idle,
            labels: BTreeMap::new(),
            threads_by_title: BTreeMap::new(),
        }
    }

    pub fn phase(&self) -> MigrationPhase {
        self.phase
    }

    pub fn redirects(&self) -> &RedirectLog {
        &self.redirects
    }

    fn enter(&mut self, phase: MigrationPhase) {
        debug!("migration phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    pub fn run(
        &mut self,
        questions: &[SourceQuestion],
        options: &MigrationOptions,
    ) -> Result<MigrationReport> {
        let mut report = MigrationReport::default();
        let category_id = self
            .api
            .category_id(&options.category)
            .with_context(|| format!("failed to resolve category {}", options.category))?;
        info!("category_id for '{}': {category_id}", options.category);

        if options.clean != CleanMode::Keep {
            self.enter(MigrationPhase::Clean);
            report.clean = Some(clean_category(self.api, &category_id)?);
            if options.clean == CleanMode::CleanOnly {
                info!("cleanup complete; exiting due to clean-only mode");
                self.enter(MigrationPhase::Done);
                report.request_count = self.api.request_count();
                return Ok(report);
            }
        }

        let selected = match options.limit {
            Some(limit) => &questions[..limit.min(questions.len())],
            None => questions,
        };

        self.enter(MigrationPhase::LabelProvisioning);
        report.labels_created = self.provision_labels(selected)?;

        self.enter(MigrationPhase::ThreadReplay);
        let repository_id = self.api.repository_id()?;
        self.threads_by_title = self
            .api
            .list_thread_summaries(&category_id)?
            .into_iter()
            .map(|thread| (thread.title.trim().to_string(), thread.id))
            .collect();

        for question in chronological(selected) {
            report.questions += 1;
            match self.replay_question(&repository_id, &category_id, question, &mut report) {
                Ok(QuestionOutcome::Created) => report.created += 1,
                Ok(QuestionOutcome::Resumed) => report.resumed += 1,
                Ok(QuestionOutcome::Ignored) => report.ignored += 1,
                Err(failure) if aborts_run(&failure) => {
                    return Err(failure.context(format!(
                        "aborting migration at question {}",
                        question.question_id
                    )));
                }
                Err(failure) => {
                    let item = MigrateError::ItemProcessing {
                        question_id: question.question_id,
                        message: format!("{failure:#}"),
                    };
                    error!("{item}");
                    report.failed.push(FailedQuestion {
                        question_id: question.question_id,
                        message: format!("{failure:#}"),
                    });
                }
            }
        }

        self.enter(MigrationPhase::Done);
        report.images_uploaded = self.images.uploaded();
        report.redirects_written = self.redirects.len();
        report.request_count = self.api.request_count();
        info!(
            "migration finished: {} created, {} resumed, {} ignored, {} failed",
            report.created,
            report.resumed,
            report.ignored,
            report.failed.len()
        );
        Ok(report)
    }

    /// Create any missing label for eligible tags (and the popular label when used).
    fn provision_labels(&mut self, questions: &[SourceQuestion]) -> Result<usize> {
        self.labels = self
            .api
            .list_labels()?
            .into_iter()
            .map(|label| (label.name, label.id))
            .collect();

        let mut wanted = self.policy.provisionable(questions);
        let needs_popular = questions
            .iter()
            .any(|question| !self.policy.question_is_ignored(question) && self.policy.is_popular(question));
        if needs_popular {
            wanted
                .entry(POPULAR_LABEL.to_string())
                .or_insert_with(|| "Frequently viewed question".to_string());
        }

        let mut created = 0;
        for (name, description) in wanted {
            if self.labels.contains_key(&name) {
                continue;
            }
            match self
                .api
                .create_label(&name, &truncate_description(&description), LABEL_COLOR)
            {
                Ok(label) => {
                    info!("created label {name}");
                    self.labels.insert(label.name, label.id);
                    created += 1;
                }
                Err(failure) if aborts_run(&failure) => return Err(failure),
                Err(failure) => warn!("failed to create label {name}: {failure:#}"),
            }
        }
        Ok(created)
    }

    fn label_ids_for(&self, question: &SourceQuestion) -> Vec<String> {
        let mut names = self.policy.labels_for(question);
        if self.policy.is_popular(question) {
            names.push(POPULAR_LABEL.to_string());
        }
        names
            .iter()
            .filter_map(|name| {
                let id = self.labels.get(name);
                if id.is_none() {
                    debug!("label {name} does not exist remotely; skipping");
                }
                id.cloned()
            })
            .collect()
    }

    fn render_body(&mut self, item: &impl SourcePost, action: Action) -> Result<String> {
        let decoded = decode_entities(item.raw_body());
        let body = self.images.rehost(self.api, &decoded)?;
        Ok(format!("{}{body}", attribution_header(item, action)))
    }

    fn record_redirects(&mut self, urls: &[&str], remote_url: &str) -> Result<()> {
        for url in urls {
            match RedirectRecord::new(url, remote_url) {
                Ok(record) => self.redirects.append(record)?,
                Err(failure) => warn!("skipping redirect for {url}: {failure:#}"),
            }
        }
        Ok(())
    }

    fn replay_question(
        &mut self,
        repository_id: &str,
        category_id: &str,
        question: &SourceQuestion,
        report: &mut MigrationReport,
    ) -> Result<QuestionOutcome> {
        if self.policy.question_is_ignored(question) {
            info!(
                "skipping question {} with ignored tags {:?}",
                question.question_id, question.tags
            );
            return Ok(QuestionOutcome::Ignored);
        }

        let title = decode_entities(&question.raw_title());
        let key = title.trim().to_string();
        let label_ids = self.label_ids_for(question);

        if let Some(thread_id) = self.threads_by_title.get(&key).cloned() {
            info!("discussion already exists for title '{key}', applying labels only");
            self.api.add_labels(&thread_id, &label_ids)?;
            return Ok(QuestionOutcome::Resumed);
        }

        let body = self.render_body(question, Action::Asked)?;
        let thread = self
            .api
            .create_thread(repository_id, category_id, &title, &body)
            .context("failed to create discussion")?;
        self.threads_by_title.insert(key, thread.id.clone());
        info!("created discussion #{} for question {}", thread.number, question.question_id);
        self.api.add_labels(&thread.id, &label_ids)?;
        self.record_redirects(&question.source_urls(), &thread.url)?;

        for comment in by_creation(&question.comments) {
            let body = self.render_body(comment, Action::CommentedOn)?;
            self.api.add_comment(&thread.id, &body, None)?;
            report.comments_created += 1;
        }

        let mut answer_comments = BTreeMap::new();
        for answer in by_creation(&question.answers) {
            let body = self.render_body(answer, Action::Answered)?;
            let created = self.api.add_comment(&thread.id, &body, None)?;
            report.comments_created += 1;
            if let Some(answer_id) = answer.answer_id {
                answer_comments.insert(answer_id, created.id.clone());
            }
            self.record_redirects(&answer.source_urls(), &created.url)?;

            for reply in by_creation(&answer.comments) {
                let body = self.render_body(reply, Action::CommentedOn)?;
                self.api.add_comment(&thread.id, &body, Some(&created.id))?;
                report.comments_created += 1;
            }
        }

        if let Some(accepted) = question.accepted_answer()
            && let Some(comment_id) = answer_comments.get(&accepted)
        {
            self.api
                .mark_answer(comment_id)
                .context("failed to mark accepted answer")?;
            report.answers_marked += 1;
        }
        Ok(QuestionOutcome::Created)
    }
}
