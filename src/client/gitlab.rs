//! GitLab REST v4 implementation of [`RunClient`].

use super::{RemoteResult, RunClient};
use crate::config::{Config, Credential, ProjectId};
use crate::error::{Error, RemoteError};
use crate::model::{JobId, JobSummary, Parameter, RunId, RunStatus, StartedRun};
use reqwest::header::HeaderMap;
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

const TOKEN_HEADER: &str = "PRIVATE-TOKEN";
const NEXT_PAGE_HEADER: &str = "x-next-page";
const PER_PAGE: &str = "100";

#[derive(Debug, Deserialize)]
struct PipelineDto {
    id: u64,
    status: String,
}

#[derive(Debug, Deserialize)]
struct JobDto {
    id: u64,
    name: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct BranchDto {
    name: String,
}

#[derive(Debug, Serialize)]
struct VariableDto<'a> {
    key: &'a str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct CreatePipelineBody<'a> {
    #[serde(rename = "ref")]
    git_ref: &'a str,
    variables: Vec<VariableDto<'a>>,
}

#[derive(Clone)]
pub struct GitLabClient {
    http: reqwest::Client,
    api_url: Url,
    project: ProjectId,
    token: Credential,
}

impl GitLabClient {
    pub fn new(cfg: &Config) -> Result<Self, Error> {
        let (project, token) = cfg.identity()?;
        let api_url = Url::parse(&cfg.api_url)
            .map_err(|e| Error::invalid_request(format!("invalid API URL {}: {e}", cfg.api_url)))?;
        if api_url.cannot_be_a_base() {
            return Err(Error::invalid_request(format!(
                "invalid API URL {}: not a base URL",
                cfg.api_url
            )));
        }
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(cfg.request_timeout)
            .build()
            .map_err(RemoteError::from)?;
        Ok(Self {
            http,
            api_url,
            project: project.clone(),
            token: token.clone(),
        })
    }

    /// `<api>/projects/<project>/<segments...>`, each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> RemoteResult<Url> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::transport("API URL cannot carry a path"))?
            .pop_if_empty()
            .push("projects")
            .push(self.project.as_str())
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, req: RequestBuilder) -> RemoteResult<Response> {
        let resp = req.header(TOKEN_HEADER, self.token.expose()).send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(error_from_response(status, &body))
    }

    async fn get_paginated<T: DeserializeOwned>(&self, segments: &[&str]) -> RemoteResult<Vec<T>> {
        let mut items = Vec::new();
        let mut page = String::from("1");
        loop {
            let mut url = self.endpoint(segments)?;
            url.query_pairs_mut()
                .append_pair("per_page", PER_PAGE)
                .append_pair("page", &page);
            tracing::debug!(path = url.path(), page = %page, "GET");
            let resp = self.send(self.http.get(url)).await?;
            let next = next_page(resp.headers());
            let mut batch: Vec<T> = resp.json().await?;
            items.append(&mut batch);
            match next {
                Some(n) => page = n,
                None => break,
            }
        }
        Ok(items)
    }
}

#[async_trait::async_trait]
impl RunClient for GitLabClient {
    async fn start_run(&self, git_ref: &str, parameters: &[Parameter]) -> RemoteResult<StartedRun> {
        let url = self.endpoint(&["pipeline"])?;
        let body = create_pipeline_body(git_ref, parameters);
        tracing::debug!(path = url.path(), git_ref, "POST");
        let resp = self.send(self.http.post(url).json(&body)).await?;
        let pipeline: PipelineDto = resp.json().await?;
        Ok(StartedRun {
            id: RunId::from(pipeline.id),
            status: Some(map_status(&pipeline.status)),
        })
    }

    async fn get_run_status(&self, run_id: &RunId) -> RemoteResult<RunStatus> {
        let url = self.endpoint(&["pipelines", run_id.as_str()])?;
        let resp = self.send(self.http.get(url)).await?;
        let pipeline: PipelineDto = resp.json().await?;
        Ok(map_status(&pipeline.status))
    }

    async fn list_jobs(&self, run_id: &RunId) -> RemoteResult<Vec<JobSummary>> {
        let jobs: Vec<JobDto> = self
            .get_paginated(&["pipelines", run_id.as_str(), "jobs"])
            .await?;
        Ok(jobs
            .into_iter()
            .map(|job| JobSummary {
                id: JobId::from(job.id),
                name: job.name,
                status: map_status(&job.status),
            })
            .collect())
    }

    async fn get_job_log(&self, job_id: &JobId) -> RemoteResult<String> {
        let url = self.endpoint(&["jobs", job_id.as_str(), "trace"])?;
        let resp = self.send(self.http.get(url)).await?;
        Ok(resp.text().await?)
    }

    async fn list_refs(&self) -> RemoteResult<Vec<String>> {
        let branches: Vec<BranchDto> = self.get_paginated(&["repository", "branches"]).await?;
        Ok(branches.into_iter().map(|b| b.name).collect())
    }
}

fn create_pipeline_body<'a>(git_ref: &'a str, parameters: &'a [Parameter]) -> CreatePipelineBody<'a> {
    CreatePipelineBody {
        git_ref,
        variables: parameters
            .iter()
            .map(|p| VariableDto {
                key: &p.key,
                value: &p.value,
            })
            .collect(),
    }
}

/// Collapse GitLab's pipeline/job states onto the six-value vocabulary.
fn map_status(raw: &str) -> RunStatus {
    match raw {
        "success" => RunStatus::Success,
        "failed" => RunStatus::Failed,
        "canceled" | "cancelled" => RunStatus::Canceled,
        "skipped" => RunStatus::Skipped,
        "running" | "canceling" => RunStatus::Running,
        _ => RunStatus::Pending,
    }
}

fn next_page(headers: &HeaderMap) -> Option<String> {
    headers
        .get(NEXT_PAGE_HEADER)?
        .to_str()
        .ok()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn error_from_response(status: StatusCode, body: &str) -> RemoteError {
    let reason = status.canonical_reason().unwrap_or("Unknown status");
    let detail = body_message(body).unwrap_or_else(|| "Unknown error".to_string());
    RemoteError::http(status.as_u16(), format!("{reason} - {detail}"))
}

fn body_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let field = value.get("message").or_else(|| value.get("error"))?;
    match field {
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
