use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::github::DiscussionsApi;
use crate::model::{RemoteThread, SourceQuestion};
use crate::transform::decode_entities;

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanReport {
    pub threads_deleted: usize,
    pub comments_deleted: usize,
    pub labels_removed: usize,
}

/// Strip labels, then comments, then each thread of a category.
pub fn clean_category<A: DiscussionsApi>(api: &mut A, category_id: &str) -> Result<CleanReport> {
    let threads = api.list_threads(category_id)?;
    info!("cleaning {} discussions from category {category_id}", threads.len());
    let mut report = CleanReport::default();
    for thread in &threads {
        if !thread.labels.is_empty() {
            let label_ids = thread
                .labels
                .iter()
                .map(|label| label.id.clone())
                .collect::<Vec<_>>();
            api.remove_labels(&thread.id, &label_ids)
                .with_context(|| format!("failed to remove labels from #{}", thread.number))?;
            report.labels_removed += label_ids.len();
        }
        report.comments_deleted += delete_thread_with_comments(api, thread)?;
        report.threads_deleted += 1;
    }
    Ok(report)
}

fn delete_thread_with_comments<A: DiscussionsApi>(api: &mut A, thread: &RemoteThread) -> Result<usize> {
    let mut deleted = 0;
    for comment in &thread.comments {
        api.delete_comment(&comment.id)
            .with_context(|| format!("failed to delete comment {} on #{}", comment.id, thread.number))?;
        deleted += 1 + comment.replies.len();
    }
    api.delete_thread(&thread.id)
        .with_context(|| format!("failed to delete discussion #{}", thread.number))?;
    info!("deleted discussion #{}: {}", thread.number, thread.title);
    Ok(deleted)
}

#[derive(Debug, Clone)]
pub struct DeleteOptions {
    pub category: String,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeletedThread {
    pub question_id: i64,
    pub title: String,
    pub number: i64,
    pub url: String,
    pub comments: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteReport {
    pub category: String,
    pub dry_run: bool,
    pub requested: usize,
    pub deleted: Vec<DeletedThread>,
    pub unknown_question_ids: Vec<i64>,
    pub missing_titles: Vec<String>,
}

/// Read question ids, one per line. Blank lines and `#` comments are skipped.
pub fn load_question_ids(path: &Path) -> Result<Vec<i64>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read question ids file {}", path.display()))?;
    let mut ids = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match line.parse::<i64>() {
            Ok(id) => ids.push(id),
            Err(_) => warn!("invalid question id on line {}: {line}", index + 1),
        }
    }
    Ok(ids)
}

/// Delete the discussions created for the given source questions, matched by title.
pub fn delete_threads_for_questions<A: DiscussionsApi>(
    api: &mut A,
    questions: &[SourceQuestion],
    question_ids: &[i64],
    options: &DeleteOptions,
) -> Result<DeleteReport> {
    let titles = questions
        .iter()
        .map(|question| {
            let title = decode_entities(&question.raw_title());
            (question.question_id, title.trim().to_string())
        })
        .collect::<BTreeMap<_, _>>();

    let category_id = api.category_id(&options.category)?;
    let threads = api.list_threads(&category_id)?;
    let mut report = DeleteReport {
        category: options.category.clone(),
        dry_run: options.dry_run,
        requested: question_ids.len(),
        deleted: Vec::new(),
        unknown_question_ids: Vec::new(),
        missing_titles: Vec::new(),
    };

    for question_id in question_ids {
        let Some(title) = titles.get(question_id) else {
            warn!("question {question_id} not found in questions file");
            report.unknown_question_ids.push(*question_id);
            continue;
        };
        let Some(thread) = threads.iter().find(|thread| thread.title.trim() == title) else {
            warn!("no discussion titled {title:?} for question {question_id}");
            report.missing_titles.push(title.clone());
            continue;
        };
        let comments = if options.dry_run {
            info!("would delete discussion #{}: {}", thread.number, thread.title);
            thread
                .comments
                .iter()
                .map(|comment| 1 + comment.replies.len())
                .sum()
        } else {
            delete_thread_with_comments(api, thread)?
        };
        report.deleted.push(DeletedThread {
            question_id: *question_id,
            title: thread.title.clone(),
            number: thread.number,
            url: thread.url.clone(),
            comments,
        });
    }
    Ok(report)
}

#[derive(Debug, Clone, Serialize)]
pub struct LabelPurgeReport {
    pub dry_run: bool,
    pub labels: Vec<String>,
    pub deleted: usize,
}

pub fn delete_all_labels<A: DiscussionsApi>(api: &mut A, dry_run: bool) -> Result<LabelPurgeReport> {
    let labels = api.list_labels()?;
    let mut deleted = 0;
    if !dry_run {
        for label in &labels {
            api.delete_label(&label.id)
                .with_context(|| format!("failed to delete label {}", label.name))?;
            deleted += 1;
        }
        info!("deleted {deleted} labels");
    }
    Ok(LabelPurgeReport {
        dry_run,
        labels: labels.into_iter().map(|label| label.name).collect(),
        deleted,
    })
}
