use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use crate::client::ApiClient;
use crate::config::RepoIdent;
use crate::model::{CreatedComment, CreatedThread, RemoteComment, RemoteLabel, RemoteThread};

/// Remote operations against a repository's discussions, labels and asset store.
pub trait DiscussionsApi {
    fn repository_id(&mut self) -> Result<String>;
    fn category_id(&mut self, category: &str) -> Result<String>;
    fn list_labels(&mut self) -> Result<Vec<RemoteLabel>>;
    fn create_label(&mut self, name: &str, description: &str, color: &str) -> Result<RemoteLabel>;
    fn delete_label(&mut self, label_id: &str) -> Result<()>;
    /// Threads in a category with labels but without comments.
    fn list_thread_summaries(&mut self, category_id: &str) -> Result<Vec<RemoteThread>>;
    /// Threads in a category including comments and replies.
    fn list_threads(&mut self, category_id: &str) -> Result<Vec<RemoteThread>>;
    fn create_thread(
        &mut self,
        repository_id: &str,
        category_id: &str,
        title: &str,
        body: &str,
    ) -> Result<CreatedThread>;
    fn add_labels(&mut self, labelable_id: &str, label_ids: &[String]) -> Result<()>;
    fn remove_labels(&mut self, labelable_id: &str, label_ids: &[String]) -> Result<()>;
    fn add_comment(
        &mut self,
        thread_id: &str,
        body: &str,
        reply_to: Option<&str>,
    ) -> Result<CreatedComment>;
    fn mark_answer(&mut self, comment_id: &str) -> Result<()>;
    fn delete_comment(&mut self, comment_id: &str) -> Result<()>;
    fn delete_thread(&mut self, thread_id: &str) -> Result<()>;
    fn asset_exists(&mut self, path: &str) -> Result<bool>;
    fn upload_asset(&mut self, path: &str, contents: &[u8]) -> Result<()>;
    /// Public URL of a stored asset.
    fn asset_url(&self, path: &str) -> String;
    fn request_count(&self) -> usize;
}

pub struct GithubDiscussions {
    client: ApiClient,
    repo: RepoIdent,
    branch: String,
    repository_id: Option<String>,
}

impl GithubDiscussions {
    pub fn new(client: ApiClient, repo: RepoIdent, branch: &str) -> Self {
        Self {
            client,
            repo,
            branch: branch.to_string(),
            repository_id: None,
        }
    }

    fn repo_variables(&self) -> Value {
        json!({ "owner": self.repo.owner, "name": self.repo.name })
    }

    /// Follow a `{nodes, pageInfo}` connection found at `pointer` until exhausted.
    fn paginate<T: DeserializeOwned>(
        &mut self,
        query: &str,
        variables: Value,
        pointer: &str,
    ) -> Result<Vec<T>> {
        self.paginate_from(query, variables, pointer, None)
    }

    /// Like `paginate`, resuming after `cursor` when a first page came from elsewhere.
    fn paginate_from<T: DeserializeOwned>(
        &mut self,
        query: &str,
        mut variables: Value,
        pointer: &str,
        mut cursor: Option<String>,
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        loop {
            variables["after"] = cursor.take().map(Value::String).unwrap_or(Value::Null);
            let data = self.client.request(query, variables.clone())?;
            let connection = data
                .pointer(pointer)
                .cloned()
                .with_context(|| format!("GraphQL response is missing {pointer}"))?;
            let page: Connection<T> = serde_json::from_value(connection)
                .with_context(|| format!("failed to decode connection at {pointer}"))?;
            items.extend(page.nodes);
            match (page.page_info.has_next_page, page.page_info.end_cursor) {
                (true, Some(end_cursor)) => cursor = Some(end_cursor),
                _ => break,
            }
        }
        Ok(items)
    }

    fn mutate(&mut self, query: &str, variables: Value, pointer: &str) -> Result<Value> {
        let data = self.client.request(query, variables)?;
        data.pointer(pointer)
            .cloned()
            .with_context(|| format!("mutation response is missing {pointer}"))
    }

    /// Fetch the label pages a nested `labels(first: 100)` left behind.
    fn complete_labels(
        &mut self,
        thread_id: &str,
        labels: &mut Option<Connection<RemoteLabel>>,
    ) -> Result<()> {
        if let Some(labels) = labels
            && labels.page_info.has_next_page
            && let Some(after) = labels.page_info.end_cursor.take()
        {
            debug!("fetching remaining labels for {thread_id}");
            let more: Vec<RemoteLabel> = self.paginate_from(
                THREAD_LABELS_QUERY,
                json!({ "id": thread_id }),
                "/node/labels",
                Some(after),
            )?;
            labels.nodes.extend(more);
        }
        Ok(())
    }

    fn complete_replies(&mut self, comment: &mut CommentNode) -> Result<()> {
        if let Some(replies) = &mut comment.replies
            && replies.page_info.has_next_page
            && let Some(after) = replies.page_info.end_cursor.take()
        {
            debug!("fetching remaining replies for comment {}", comment.id);
            let more: Vec<CommentNode> = self.paginate_from(
                COMMENT_REPLIES_QUERY,
                json!({ "id": comment.id }),
                "/node/replies",
                Some(after),
            )?;
            replies.nodes.extend(more);
        }
        Ok(())
    }

    fn head_oid(&mut self) -> Result<String> {
        let mut variables = self.repo_variables();
        variables["qualifiedName"] = Value::String(format!("refs/heads/{}", self.branch));
        let data = self.client.request(BRANCH_HEAD_QUERY, variables)?;
        data.pointer("/repository/ref/target/oid")
            .and_then(Value::as_str)
            .map(str::to_string)
            .with_context(|| format!("branch {} not found in {}", self.branch, self.repo))
    }
}

impl DiscussionsApi for GithubDiscussions {
    fn repository_id(&mut self) -> Result<String> {
        if let Some(id) = &self.repository_id {
            return Ok(id.clone());
        }
        let data = self.client.request(REPOSITORY_ID_QUERY, self.repo_variables())?;
        let id = data
            .pointer("/repository/id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .with_context(|| format!("repository {} not found", self.repo))?;
        self.repository_id = Some(id.clone());
        Ok(id)
    }

    fn category_id(&mut self, category: &str) -> Result<String> {
        let categories: Vec<CategoryNode> = self.paginate(
            CATEGORIES_QUERY,
            self.repo_variables(),
            "/repository/discussionCategories",
        )?;
        match categories.into_iter().find(|node| node.name == category) {
            Some(node) => Ok(node.id),
            None => bail!("discussion category {category:?} not found in {}", self.repo),
        }
    }

    fn list_labels(&mut self) -> Result<Vec<RemoteLabel>> {
        self.paginate(LABELS_QUERY, self.repo_variables(), "/repository/labels")
    }

    fn create_label(&mut self, name: &str, description: &str, color: &str) -> Result<RemoteLabel> {
        let repository_id = self.repository_id()?;
        let label = self.mutate(
            CREATE_LABEL_MUTATION,
            json!({
                "input": {
                    "repositoryId": repository_id,
                    "name": name,
                    "description": description,
                    "color": color,
                }
            }),
            "/createLabel/label",
        )?;
        serde_json::from_value(label).context("failed to decode created label")
    }

    fn delete_label(&mut self, label_id: &str) -> Result<()> {
        self.mutate(
            DELETE_LABEL_MUTATION,
            json!({ "input": { "id": label_id } }),
            "/deleteLabel",
        )?;
        Ok(())
    }

    fn list_thread_summaries(&mut self, category_id: &str) -> Result<Vec<RemoteThread>> {
        let mut variables = self.repo_variables();
        variables["categoryId"] = Value::String(category_id.to_string());
        let nodes: Vec<ThreadSummaryNode> = self.paginate(
            THREAD_SUMMARIES_QUERY,
            variables,
            "/repository/discussions",
        )?;
        let mut threads = Vec::with_capacity(nodes.len());
        for mut node in nodes {
            self.complete_labels(&node.id, &mut node.labels)?;
            threads.push(node.into_thread());
        }
        Ok(threads)
    }

    fn list_threads(&mut self, category_id: &str) -> Result<Vec<RemoteThread>> {
        let mut variables = self.repo_variables();
        variables["categoryId"] = Value::String(category_id.to_string());
        let nodes: Vec<ThreadNode> =
            self.paginate(THREADS_QUERY, variables, "/repository/discussions")?;

        let mut threads = Vec::with_capacity(nodes.len());
        for mut node in nodes {
            if node.comments.page_info.has_next_page
                && let Some(after) = node.comments.page_info.end_cursor.take()
            {
                debug!("fetching remaining comments for discussion #{}", node.number);
                let more: Vec<CommentNode> = self.paginate_from(
                    THREAD_COMMENTS_QUERY,
                    json!({ "id": node.id }),
                    "/node/comments",
                    Some(after),
                )?;
                node.comments.nodes.extend(more);
            }
            self.complete_labels(&node.id, &mut node.labels)?;
            for comment in &mut node.comments.nodes {
                self.complete_replies(comment)?;
            }
            threads.push(node.into_thread());
        }
        Ok(threads)
    }

    fn create_thread(
        &mut self,
        repository_id: &str,
        category_id: &str,
        title: &str,
        body: &str,
    ) -> Result<CreatedThread> {
        let discussion = self.mutate(
            CREATE_DISCUSSION_MUTATION,
            json!({
                "input": {
                    "repositoryId": repository_id,
                    "categoryId": category_id,
                    "title": title,
                    "body": body,
                }
            }),
            "/createDiscussion/discussion",
        )?;
        let node: CreatedThreadNode =
            serde_json::from_value(discussion).context("failed to decode created discussion")?;
        Ok(CreatedThread {
            id: node.id,
            number: node.number,
            url: node.url,
        })
    }

    fn add_labels(&mut self, labelable_id: &str, label_ids: &[String]) -> Result<()> {
        if label_ids.is_empty() {
            return Ok(());
        }
        self.mutate(
            ADD_LABELS_MUTATION,
            json!({ "input": { "labelableId": labelable_id, "labelIds": label_ids } }),
            "/addLabelsToLabelable",
        )?;
        Ok(())
    }

    fn remove_labels(&mut self, labelable_id: &str, label_ids: &[String]) -> Result<()> {
        if label_ids.is_empty() {
            return Ok(());
        }
        self.mutate(
            REMOVE_LABELS_MUTATION,
            json!({ "input": { "labelableId": labelable_id, "labelIds": label_ids } }),
            "/removeLabelsFromLabelable",
        )?;
        Ok(())
    }

    fn add_comment(
        &mut self,
        thread_id: &str,
        body: &str,
        reply_to: Option<&str>,
    ) -> Result<CreatedComment> {
        let mut input = json!({ "discussionId": thread_id, "body": body });
        if let Some(reply_to) = reply_to {
            input["replyToId"] = Value::String(reply_to.to_string());
        }
        let comment = self.mutate(
            ADD_COMMENT_MUTATION,
            json!({ "input": input }),
            "/addDiscussionComment/comment",
        )?;
        let node: CreatedCommentNode =
            serde_json::from_value(comment).context("failed to decode created comment")?;
        Ok(CreatedComment {
            id: node.id,
            url: node.url,
        })
    }

    fn mark_answer(&mut self, comment_id: &str) -> Result<()> {
        self.mutate(
            MARK_ANSWER_MUTATION,
            json!({ "input": { "id": comment_id } }),
            "/markDiscussionCommentAsAnswer",
        )?;
        Ok(())
    }

    fn delete_comment(&mut self, comment_id: &str) -> Result<()> {
        self.mutate(
            DELETE_COMMENT_MUTATION,
            json!({ "input": { "id": comment_id } }),
            "/deleteDiscussionComment",
        )?;
        Ok(())
    }

    fn delete_thread(&mut self, thread_id: &str) -> Result<()> {
        self.mutate(
            DELETE_DISCUSSION_MUTATION,
            json!({ "input": { "id": thread_id } }),
            "/deleteDiscussion",
        )?;
        Ok(())
    }

    fn asset_exists(&mut self, path: &str) -> Result<bool> {
        let mut variables = self.repo_variables();
        variables["expression"] = Value::String(format!("{}:{path}", self.branch));
        let data = self.client.request(OBJECT_QUERY, variables)?;
        Ok(data
            .pointer("/repository/object")
            .is_some_and(|object| !object.is_null()))
    }

    fn upload_asset(&mut self, path: &str, contents: &[u8]) -> Result<()> {
        let head = self.head_oid()?;
        let filename = path.rsplit('/').next().unwrap_or(path);
        self.mutate(
            CREATE_COMMIT_MUTATION,
            json!({
                "input": {
                    "branch": {
                        "repositoryNameWithOwner": self.repo.to_string(),
                        "branchName": self.branch,
                    },
                    "message": { "headline": format!("Add discussion image {filename}") },
                    "fileChanges": {
                        "additions": [{ "path": path, "contents": STANDARD.encode(contents) }]
                    },
                    "expectedHeadOid": head,
                }
            }),
            "/createCommitOnBranch/commit",
        )?;
        Ok(())
    }

    fn asset_url(&self, path: &str) -> String {
        format!(
            "https://github.com/{}/{}/blob/{}/{path}?raw=true",
            self.repo.owner, self.repo.name, self.branch
        )
    }

    fn request_count(&self) -> usize {
        self.client.request_count()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Connection<T> {
    #[serde(default = "Vec::new")]
    nodes: Vec<T>,
    #[serde(default)]
    page_info: PageInfo,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    #[serde(default)]
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CategoryNode {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct IdRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ThreadSummaryNode {
    id: String,
    number: i64,
    title: String,
    url: String,
    labels: Option<Connection<RemoteLabel>>,
}

impl ThreadSummaryNode {
    fn into_thread(self) -> RemoteThread {
        RemoteThread {
            id: self.id,
            number: self.number,
            title: self.title,
            url: self.url,
            labels: self.labels.map(|labels| labels.nodes).unwrap_or_default(),
            ..RemoteThread::default()
        }
    }
}

#[derive(Debug, Deserialize)]
struct ThreadNode {
    id: String,
    number: i64,
    title: String,
    #[serde(default)]
    body: String,
    url: String,
    labels: Option<Connection<RemoteLabel>>,
    comments: Connection<CommentNode>,
}

impl ThreadNode {
    fn into_thread(self) -> RemoteThread {
        RemoteThread {
            id: self.id,
            number: self.number,
            title: self.title,
            body: self.body,
            url: self.url,
            labels: self.labels.map(|labels| labels.nodes).unwrap_or_default(),
            comments: self
                .comments
                .nodes
                .into_iter()
                .map(CommentNode::into_comment)
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentNode {
    id: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    is_answer: bool,
    reply_to: Option<IdRef>,
    replies: Option<Connection<CommentNode>>,
}

impl CommentNode {
    fn into_comment(self) -> RemoteComment {
        RemoteComment {
            id: self.id,
            body: self.body,
            url: self.url,
            is_answer: self.is_answer,
            reply_to: self.reply_to.map(|reply_to| reply_to.id),
            replies: self
                .replies
                .map(|replies| {
                    replies
                        .nodes
                        .into_iter()
                        .map(CommentNode::into_comment)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreatedThreadNode {
    id: String,
    number: i64,
    url: String,
}

#[derive(Debug, Deserialize)]
struct CreatedCommentNode {
    id: String,
    url: String,
}

const REPOSITORY_ID_QUERY: &str = r#"
query($owner: String!, $name: String!) {
  repository(owner: $owner, name: $name) { id }
}"#;

const CATEGORIES_QUERY: &str = r#"
query($owner: String!, $name: String!, $after: String) {
  repository(owner: $owner, name: $name) {
    discussionCategories(first: 100, after: $after) {
      nodes { id name }
      pageInfo { hasNextPage endCursor }
    }
  }
}"#;

const LABELS_QUERY: &str = r#"
query($owner: String!, $name: String!, $after: String) {
  repository(owner: $owner, name: $name) {
    labels(first: 100, after: $after) {
      nodes { id name }
      pageInfo { hasNextPage endCursor }
    }
  }
}"#;

const THREAD_SUMMARIES_QUERY: &str = r#"
query($owner: String!, $name: String!, $categoryId: ID, $after: String) {
  repository(owner: $owner, name: $name) {
    discussions(first: 100, categoryId: $categoryId, after: $after) {
      nodes {
        id number title url
        labels(first: 100) { nodes { id name } pageInfo { hasNextPage endCursor } }
      }
      pageInfo { hasNextPage endCursor }
    }
  }
}"#;

const THREADS_QUERY: &str = r#"
query($owner: String!, $name: String!, $categoryId: ID, $after: String) {
  repository(owner: $owner, name: $name) {
    discussions(first: 25, categoryId: $categoryId, after: $after) {
      nodes {
        id number title body url
        labels(first: 100) { nodes { id name } pageInfo { hasNextPage endCursor } }
        comments(first: 100) {
          nodes {
            id body url isAnswer
            replyTo { id }
            replies(first: 100) {
              nodes { id body url isAnswer replyTo { id } }
              pageInfo { hasNextPage endCursor }
            }
          }
          pageInfo { hasNextPage endCursor }
        }
      }
      pageInfo { hasNextPage endCursor }
    }
  }
}"#;

const THREAD_COMMENTS_QUERY: &str = r#"
query($id: ID!, $after: String) {
  node(id: $id) {
    ... on Discussion {
      comments(first: 100, after: $after) {
        nodes {
          id body url isAnswer
          replyTo { id }
          replies(first: 100) {
              nodes { id body url isAnswer replyTo { id } }
              pageInfo { hasNextPage endCursor }
            }
        }
        pageInfo { hasNextPage endCursor }
      }
    }
  }
}"#;

const THREAD_LABELS_QUERY: &str = r#"
query($id: ID!, $after: String) {
  node(id: $id) {
    ... on Discussion {
      labels(first: 100, after: $after) {
        nodes { id name }
        pageInfo { hasNextPage endCursor }
      }
    }
  }
}"#;

const COMMENT_REPLIES_QUERY: &str = r#"
query($id: ID!, $after: String) {
  node(id: $id) {
    ... on DiscussionComment {
      replies(first: 100, after: $after) {
        nodes { id body url isAnswer replyTo { id } }
        pageInfo { hasNextPage endCursor }
      }
    }
  }
}"#;

const CREATE_LABEL_MUTATION: &str = r#"
mutation($input: CreateLabelInput!) {
  createLabel(input: $input) { label { id name } }
}"#;

const DELETE_LABEL_MUTATION: &str = r#"
mutation($input: DeleteLabelInput!) {
  deleteLabel(input: $input) { clientMutationId }
}"#;

const CREATE_DISCUSSION_MUTATION: &str = r#"
mutation($input: CreateDiscussionInput!) {
  createDiscussion(input: $input) { discussion { id number url } }
}"#;

const ADD_LABELS_MUTATION: &str = r#"
mutation($input: AddLabelsToLabelableInput!) {
  addLabelsToLabelable(input: $input) { clientMutationId }
}"#;

const REMOVE_LABELS_MUTATION: &str = r#"
mutation($input: RemoveLabelsFromLabelableInput!) {
  removeLabelsFromLabelable(input: $input) { clientMutationId }
}"#;

const ADD_COMMENT_MUTATION: &str = r#"
mutation($input: AddDiscussionCommentInput!) {
  addDiscussionComment(input: $input) { comment { id url } }
}"#;

const MARK_ANSWER_MUTATION: &str = r#"
mutation($input: MarkDiscussionCommentAsAnswerInput!) {
  markDiscussionCommentAsAnswer(input: $input) { clientMutationId }
}"#;

const DELETE_COMMENT_MUTATION: &str = r#"
mutation($input: DeleteDiscussionCommentInput!) {
  deleteDiscussionComment(input: $input) { clientMutationId }
}"#;

const DELETE_DISCUSSION_MUTATION: &str = r#"
mutation($input: DeleteDiscussionInput!) {
  deleteDiscussion(input: $input) { clientMutationId }
}"#;

const OBJECT_QUERY: &str = r#"
query($owner: String!, $name: String!, $expression: String!) {
  repository(owner: $owner, name: $name) { object(expression: $expression) { id } }
}"#;

const BRANCH_HEAD_QUERY: &str = r#"
query($owner: String!, $name: String!, $qualifiedName: String!) {
  repository(owner: $owner, name: $name) { ref(qualifiedName: $qualifiedName) { target { oid } } }
}"#;

const CREATE_COMMIT_MUTATION: &str = r#"
mutation($input: CreateCommitOnBranchInput!) {
  createCommitOnBranch(input: $input) { commit { oid } }
}"#;
