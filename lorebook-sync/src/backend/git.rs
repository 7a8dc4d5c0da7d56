//! Git-hosted file backend using the GitHub REST API.
//!
//! Reads go through the contents API at the configured branch. A commit
//! turns the whole write buffer into one Git commit:
//!
//! 1. Look up the branch head (a 404 means the branch does not exist yet)
//! 2. Upload one blob per written file
//! 3. Build a tree on top of the head commit's tree, with deletions as
//!    entries whose `sha` is `null`
//! 4. Create a commit whose parent is the head (no parent for a new branch)
//! 5. Move the branch ref, or create it

use super::{FileBackend, FileOp, FileReadonlyBackend, FileReader, FileWriter, WriteBuffer};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Git backend configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitBackendConfig {
    /// Base URL of the GitHub REST API.
    pub api_base_url: String,
    pub owner: String,
    pub repo: String,
    pub branch: String,
    /// Personal access token. Empty means anonymous (read-only on public repos).
    pub token: String,
    /// Force-move the branch ref even when the update is not a fast-forward.
    pub force: bool,
    /// Create the branch on first commit when it does not exist.
    pub create_branch: bool,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for GitBackendConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.github.com".to_string(),
            owner: String::new(),
            repo: String::new(),
            branch: "main".to_string(),
            token: String::new(),
            force: false,
            create_branch: true,
            timeout_secs: 60,
        }
    }
}

/// A repository visible to the authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitRepository {
    pub owner: String,
    pub name: String,
    pub default_branch: String,
}

/// A branch of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitBranch {
    pub name: String,
    pub sha: String,
}

// ── API payloads ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ContentResponse {
    sha: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: String,
}

#[derive(Debug, Deserialize)]
struct BlobResponse {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ShaResponse {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct RefResponse {
    object: ShaResponse,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    tree: ShaResponse,
}

#[derive(Debug, Deserialize)]
struct RepoOwner {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RepoResponse {
    name: String,
    owner: RepoOwner,
    #[serde(default)]
    default_branch: String,
}

#[derive(Debug, Deserialize)]
struct BranchResponse {
    name: String,
    commit: ShaResponse,
}

#[derive(Debug, Serialize)]
struct TreeEntry {
    path: String,
    mode: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    sha: Option<String>,
}

// ── Client ───────────────────────────────────────────────────────

/// Thin GitHub REST client shared by the backend and the setup flow.
pub struct GitHubClient {
    api_base_url: String,
    token: String,
    client: Client,
}

impl GitHubClient {
    pub fn new(api_base_url: &str, token: &str, timeout_secs: u64) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent("lorebook")
            .build()
            .map_err(|e| SyncError::Network(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url, path)
    }

    fn request(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header("Accept", "application/vnd.github+json");
        if self.token.is_empty() {
            request
        } else {
            request.bearer_auth(&self.token)
        }
    }

    async fn send(&self, request: RequestBuilder, url: &str) -> SyncResult<Response> {
        self.request(request)
            .send()
            .await
            .map_err(|e| SyncError::Network(format!("request to {url} failed: {e}")))
    }

    async fn json<T: serde::de::DeserializeOwned>(response: Response, url: &str) -> SyncResult<T> {
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        response
            .json()
            .await
            .map_err(|e| SyncError::Network(format!("failed to parse response from {url}: {e}")))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> SyncResult<T> {
        let url = self.url(path);
        let response = self.send(self.client.get(&url), &url).await?;
        Self::json(response, &url).await
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> SyncResult<T> {
        let url = self.url(path);
        let response = self.send(self.client.post(&url).json(body), &url).await?;
        Self::json(response, &url).await
    }

    /// Repositories the token can see.
    pub async fn list_repositories(&self) -> SyncResult<Vec<GitRepository>> {
        let repos: Vec<RepoResponse> = self.get_json("/user/repos?per_page=100").await?;
        Ok(repos
            .into_iter()
            .map(|r| GitRepository {
                owner: r.owner.login,
                name: r.name,
                default_branch: r.default_branch,
            })
            .collect())
    }

    /// Branches of one repository.
    pub async fn list_branches(&self, owner: &str, repo: &str) -> SyncResult<Vec<GitBranch>> {
        let branches: Vec<BranchResponse> = self
            .get_json(&format!("/repos/{owner}/{repo}/branches?per_page=100"))
            .await?;
        Ok(branches
            .into_iter()
            .map(|b| GitBranch {
                name: b.name,
                sha: b.commit.sha,
            })
            .collect())
    }

    /// Reads a file at `branch`, `None` on 404.
    pub async fn read_file(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        name: &str,
    ) -> SyncResult<Option<Vec<u8>>> {
        let url = self.url(&format!(
            "/repos/{owner}/{repo}/contents/{}?ref={}",
            encode_path(name),
            urlencoding::encode(branch)
        ));
        debug!("GET {}", url);
        let response = self.send(self.client.get(&url), &url).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let content: ContentResponse = Self::json(response, &url).await?;

        // Files over the contents API size limit come back without inline content.
        let encoded = if content.encoding == "base64" {
            content.content
        } else {
            let blob: BlobResponse = self
                .get_json(&format!("/repos/{owner}/{repo}/git/blobs/{}", content.sha))
                .await?;
            blob.content
        };
        decode_base64(&encoded).map(Some)
    }

    /// Head commit sha of `branch`, `None` when the branch does not exist.
    pub async fn branch_head(&self, owner: &str, repo: &str, branch: &str) -> SyncResult<Option<String>> {
        let url = self.url(&format!("/repos/{owner}/{repo}/git/ref/heads/{branch}"));
        let response = self.send(self.client.get(&url), &url).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let head: RefResponse = Self::json(response, &url).await?;
        Ok(Some(head.object.sha))
    }
}

fn encode_path(name: &str) -> String {
    name.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn decode_base64(encoded: &str) -> SyncResult<Vec<u8>> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|e| SyncError::Network(format!("invalid base64 content: {e}")))
}

// ── Backend ──────────────────────────────────────────────────────

struct GitInner {
    config: GitBackendConfig,
    client: GitHubClient,
}

/// A branch of a GitHub repository used as a file tree.
#[derive(Clone)]
pub struct GitFileBackend {
    inner: Arc<GitInner>,
}

impl GitFileBackend {
    pub fn new(config: GitBackendConfig) -> SyncResult<Self> {
        let client = GitHubClient::new(&config.api_base_url, &config.token, config.timeout_secs)?;
        Ok(Self {
            inner: Arc::new(GitInner { config, client }),
        })
    }

    pub fn config(&self) -> &GitBackendConfig {
        &self.inner.config
    }
}

#[async_trait]
impl FileReader for GitFileBackend {
    async fn read(&self, name: &str) -> SyncResult<Option<Vec<u8>>> {
        let c = &self.inner.config;
        self.inner
            .client
            .read_file(&c.owner, &c.repo, &c.branch, name)
            .await
    }
}

impl FileReadonlyBackend for GitFileBackend {
    fn reader(&self) -> Arc<dyn FileReader> {
        Arc::new(self.clone())
    }
}

impl FileBackend for GitFileBackend {
    fn writer(&self) -> Box<dyn FileWriter> {
        Box::new(GitFileWriter {
            inner: self.inner.clone(),
            buffer: WriteBuffer::new(),
        })
    }
}

struct GitFileWriter {
    inner: Arc<GitInner>,
    buffer: WriteBuffer,
}

impl GitFileWriter {
    async fn land(&self, ops: Vec<FileOp>) -> SyncResult<String> {
        let GitInner { config, client } = self.inner.as_ref();
        let (owner, repo, branch) = (&config.owner, &config.repo, &config.branch);

        let head = client.branch_head(owner, repo, branch).await?;
        if head.is_none() && !config.create_branch {
            return Err(SyncError::InvalidState(format!(
                "branch '{branch}' does not exist and branch creation is disabled"
            )));
        }

        let base_tree = match &head {
            Some(sha) => {
                let commit: CommitResponse = client
                    .get_json(&format!("/repos/{owner}/{repo}/git/commits/{sha}"))
                    .await?;
                Some(commit.tree.sha)
            }
            None => None,
        };

        let mut entries = Vec::with_capacity(ops.len());
        for op in ops {
            match op {
                FileOp::Write { name, content } => {
                    let blob: ShaResponse = client
                        .post_json(
                            &format!("/repos/{owner}/{repo}/git/blobs"),
                            &serde_json::json!({
                                "content": STANDARD.encode(&content),
                                "encoding": "base64",
                            }),
                        )
                        .await?;
                    entries.push(TreeEntry {
                        path: name,
                        mode: "100644",
                        kind: "blob",
                        sha: Some(blob.sha),
                    });
                }
                // A new branch has nothing to delete.
                FileOp::Delete { name } if base_tree.is_some() => entries.push(TreeEntry {
                    path: name,
                    mode: "100644",
                    kind: "blob",
                    sha: None,
                }),
                FileOp::Delete { .. } => {}
            }
        }

        let mut tree_body = serde_json::json!({ "tree": entries });
        if let Some(base) = &base_tree {
            tree_body["base_tree"] = serde_json::Value::String(base.clone());
        }
        let tree: ShaResponse = client
            .post_json(&format!("/repos/{owner}/{repo}/git/trees"), &tree_body)
            .await?;

        let parents: Vec<&String> = head.iter().collect();
        let message = format!("Lorebook sync {}", chrono::Utc::now().to_rfc3339());
        let commit: ShaResponse = client
            .post_json(
                &format!("/repos/{owner}/{repo}/git/commits"),
                &serde_json::json!({
                    "message": message,
                    "tree": tree.sha,
                    "parents": parents,
                }),
            )
            .await?;

        match head {
            Some(_) => {
                let url = client.url(&format!("/repos/{owner}/{repo}/git/refs/heads/{branch}"));
                let response = client
                    .send(
                        client.client.patch(&url).json(&serde_json::json!({
                            "sha": commit.sha,
                            "force": config.force,
                        })),
                        &url,
                    )
                    .await?;
                let _: serde_json::Value = GitHubClient::json(response, &url).await?;
            }
            None => {
                let _: serde_json::Value = client
                    .post_json(
                        &format!("/repos/{owner}/{repo}/git/refs"),
                        &serde_json::json!({
                            "ref": format!("refs/heads/{branch}"),
                            "sha": commit.sha,
                        }),
                    )
                    .await?;
                info!("Created branch {} in {}/{}", branch, owner, repo);
            }
        }

        Ok(commit.sha)
    }
}

#[async_trait]
impl FileWriter for GitFileWriter {
    fn write(&mut self, name: &str, content: Vec<u8>) {
        self.buffer.write(name, content);
    }

    fn delete(&mut self, name: &str) {
        self.buffer.delete(name);
    }

    fn pending(&self) -> usize {
        self.buffer.len()
    }

    async fn commit(&mut self) -> SyncResult<()> {
        let ops: Vec<FileOp> = self.buffer.take_final().into_values().collect();
        if ops.is_empty() {
            return Ok(());
        }
        let count = ops.len();
        let sha = self.land(ops).await?;
        info!(
            "Committed {} files to {}/{}@{} ({})",
            count, self.inner.config.owner, self.inner.config.repo, self.inner.config.branch, sha
        );
        Ok(())
    }
}
