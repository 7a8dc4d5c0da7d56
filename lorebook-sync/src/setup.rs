//! Git remote setup flow.
//!
//! `Initial → SelectRepo → SelectBranch → Complete`. Each step validates the
//! current state and only advances when its remote call succeeds, so a
//! failed step can simply be retried.

use crate::backend::git::{GitBackendConfig, GitBranch, GitHubClient, GitRepository};
use crate::error::{SyncError, SyncResult};
use tracing::{debug, info};

/// State of the setup flow.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GitSetup {
    #[default]
    Initial,
    SelectRepo {
        api_base_url: String,
        token: String,
        repositories: Vec<GitRepository>,
    },
    SelectBranch {
        api_base_url: String,
        token: String,
        repository: GitRepository,
        branches: Vec<GitBranch>,
        /// Listing carried along so `back` can return to it.
        repositories: Vec<GitRepository>,
    },
    Complete(GitBackendConfig),
}

impl GitSetup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step_name(&self) -> &'static str {
        match self {
            GitSetup::Initial => "initial",
            GitSetup::SelectRepo { .. } => "select-repo",
            GitSetup::SelectBranch { .. } => "select-branch",
            GitSetup::Complete(_) => "complete",
        }
    }

    fn unexpected(&self, wanted: &str) -> SyncError {
        SyncError::InvalidState(format!(
            "git setup is at '{}', expected '{}'",
            self.step_name(),
            wanted
        ))
    }

    /// `Initial → SelectRepo`: lists the repositories the token can see.
    pub async fn authenticate(&mut self, api_base_url: &str, token: &str) -> SyncResult<()> {
        if !matches!(self, GitSetup::Initial) {
            return Err(self.unexpected("initial"));
        }
        let client = GitHubClient::new(api_base_url, token, 30)?;
        let repositories = client.list_repositories().await?;
        info!("Git setup found {} repositories", repositories.len());
        *self = GitSetup::SelectRepo {
            api_base_url: api_base_url.to_string(),
            token: token.to_string(),
            repositories,
        };
        Ok(())
    }

    /// `SelectRepo → SelectBranch`: lists the branches of the chosen
    /// repository. A repository missing from the cached listing triggers one
    /// fresh listing before it is reported as not found.
    pub async fn select_repository(&mut self, owner: &str, name: &str) -> SyncResult<()> {
        let GitSetup::SelectRepo {
            api_base_url,
            token,
            repositories,
        } = self
        else {
            return Err(self.unexpected("select-repo"));
        };
        let client = GitHubClient::new(api_base_url, token, 30)?;
        let find = |list: &[GitRepository]| {
            list.iter()
                .find(|r| r.owner == owner && r.name == name)
                .cloned()
        };
        let repository = match find(repositories.as_slice()) {
            Some(repository) => repository,
            None => {
                debug!("{}/{} not in cached listing, listing again", owner, name);
                *repositories = client.list_repositories().await?;
                find(repositories.as_slice())
                    .ok_or_else(|| SyncError::NotFound(format!("repository {owner}/{name}")))?
            }
        };

        let branches = client.list_branches(owner, name).await?;
        *self = GitSetup::SelectBranch {
            api_base_url: api_base_url.clone(),
            token: token.clone(),
            repository,
            branches,
            repositories: std::mem::take(repositories),
        };
        Ok(())
    }

    /// `SelectBranch → Complete`. A branch that does not exist yet is
    /// created by the first push.
    pub fn select_branch(&mut self, branch: &str) -> SyncResult<()> {
        let GitSetup::SelectBranch {
            api_base_url,
            token,
            repository,
            ..
        } = self
        else {
            return Err(self.unexpected("select-branch"));
        };
        if branch.is_empty() {
            return Err(SyncError::InvalidState("branch name is empty".to_string()));
        }
        let config = GitBackendConfig {
            api_base_url: api_base_url.clone(),
            owner: repository.owner.clone(),
            repo: repository.name.clone(),
            branch: branch.to_string(),
            token: token.clone(),
            ..GitBackendConfig::default()
        };
        *self = GitSetup::Complete(config);
        Ok(())
    }

    /// Steps back one state. `Initial` stays put. Stepping back from
    /// `Complete` leaves an empty repository listing, which
    /// `select_repository` refills on demand.
    pub fn back(&mut self) {
        let previous = match std::mem::take(self) {
            GitSetup::Initial | GitSetup::SelectRepo { .. } => GitSetup::Initial,
            GitSetup::SelectBranch {
                api_base_url,
                token,
                repositories,
                ..
            } => GitSetup::SelectRepo {
                api_base_url,
                token,
                repositories,
            },
            GitSetup::Complete(config) => GitSetup::SelectBranch {
                api_base_url: config.api_base_url,
                token: config.token,
                repository: GitRepository {
                    owner: config.owner,
                    name: config.repo,
                    default_branch: config.branch,
                },
                branches: Vec::new(),
                repositories: Vec::new(),
            },
        };
        *self = previous;
    }

    /// The finished configuration, once complete.
    pub fn config(&self) -> Option<&GitBackendConfig> {
        match self {
            GitSetup::Complete(config) => Some(config),
            _ => None,
        }
    }
}
