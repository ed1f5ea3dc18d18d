//! Runtime configuration for the run client and the orchestrator.

use crate::error::{Error, Result};
use crate::model::RunId;
use std::fmt;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://gitlab.com/api/v4";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);

/// Project identity on the remote service: a numeric id or a namespaced path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Access token. Never rendered in clear text.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(********)")
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("********")
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub project: Option<ProjectId>,
    pub credential: Option<Credential>,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    /// Upper bound on concurrent log fetches within one collection pass.
    pub log_concurrency: Option<usize>,
    pub artifacts_base_url: Option<String>,
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            project: None,
            credential: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: Duration::from_secs(30),
            log_concurrency: None,
            artifacts_base_url: None,
            user_agent: format!("ci-run-watch/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Config {
    /// Project identity and credential, or `InvalidRequest` when either is
    /// missing or blank.
    pub fn identity(&self) -> Result<(&ProjectId, &Credential)> {
        let project = self
            .project
            .as_ref()
            .filter(|p| !p.as_str().trim().is_empty())
            .ok_or_else(|| Error::invalid_request("no project identity is configured"))?;
        let credential = self
            .credential
            .as_ref()
            .filter(|c| !c.expose().trim().is_empty())
            .ok_or_else(|| Error::invalid_request("no access credential is configured"))?;
        Ok((project, credential))
    }

    /// Where a successful run's published artifacts live, if publishing is configured.
    pub fn artifacts_url(&self, run_id: &RunId) -> Option<String> {
        let base = self.artifacts_base_url.as_deref()?.trim_end_matches('/');
        if base.is_empty() {
            return None;
        }
        let project = self.project.as_ref()?;
        Some(format!("{base}/{project}/{run_id}/index.html"))
    }
}
