//! GitHub adapters: latest releases and recently updated issues.
//!
//! Both adapters fan out over their `repositories` with
//! [`FanOut`](crate::executor::FanOut) and report degraded batches through
//! the error queue.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::{Deserialize, Serialize};

use crate::executor::{Batch, FanOut};
use crate::models::{Activity, ActivityMeta, Issue, Release};
use crate::source::{Source, StreamSink};
use crate::source_type::SourceType;
use crate::sources::{emit_batch, get_json, http_client, sort_newest};

const API_BASE: &str = "https://api.github.com";

fn default_workers() -> usize {
    4
}

fn default_issue_limit() -> usize {
    10
}

/// Latest release of each repository.
///
/// ```toml
/// [[sources]]
/// type = "github-releases"
/// repositories = ["rust-lang/rust", "tokio-rs/tokio"]
/// include_prereleases = false
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubReleasesSource {
    pub repositories: Vec<String>,
    /// Falls back to `GITHUB_TOKEN`.
    pub token: Option<String>,
    pub include_prereleases: bool,
    pub workers: usize,
    #[serde(skip)]
    client: Option<reqwest::Client>,
}

impl Default for GithubReleasesSource {
    fn default() -> Self {
        Self {
            repositories: Vec::new(),
            token: None,
            include_prereleases: false,
            workers: default_workers(),
            client: None,
        }
    }
}

#[async_trait]
impl Source for GithubReleasesSource {
    fn uid(&self) -> String {
        format!("{}/{}", SourceType::GithubReleases, self.repositories.join(","))
    }

    fn name(&self) -> String {
        format!("Releases ({})", self.repositories.join(", "))
    }

    fn url(&self) -> String {
        repositories_url(&self.repositories)
    }

    fn source_type(&self) -> SourceType {
        SourceType::GithubReleases
    }

    async fn initialize(&mut self) -> Result<()> {
        validate_repositories(&self.repositories)?;
        self.client = Some(github_client(self.token.as_deref())?);
        Ok(())
    }

    async fn stream(&self, sink: StreamSink) {
        let Some(client) = self.client.clone() else {
            sink.error(anyhow::anyhow!("source '{}' is not initialized", self.uid()))
                .await;
            return;
        };

        let source_uid = self.uid();
        let include_prereleases = self.include_prereleases;
        let fan_out = FanOut::new(move |repository: String| {
            let client = client.clone();
            let source_uid = source_uid.clone();
            async move {
                fetch_latest_release(&client, &repository, include_prereleases)
                    .await
                    .map(|raw| map_release(raw, &repository, &source_uid))
                    .with_context(|| format!("fetching latest release of {}", repository))
            }
        })
        .workers(self.workers);

        let results = tokio::select! {
            _ = sink.cancelled() => return,
            results = fan_out.run(self.repositories.clone()) => results,
        };

        let batch = Batch::collect(results);
        for (index, err) in &batch.failures {
            tracing::warn!(
                source = %self.uid(),
                repository = %self.repositories[*index],
                error = %format!("{:#}", err),
                "release fetch failed"
            );
        }

        let (mut releases, outcome) = batch.into_parts();
        sort_newest(&mut releases);
        emit_batch(&sink, releases, outcome).await;
    }

    fn config(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

/// Most recently updated issues and pull requests of each repository.
///
/// ```toml
/// [[sources]]
/// type = "github-issues"
/// repositories = ["tokio-rs/tokio"]
/// limit = 10
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubIssuesSource {
    pub repositories: Vec<String>,
    /// Falls back to `GITHUB_TOKEN`.
    pub token: Option<String>,
    /// Issues fetched per repository.
    pub limit: usize,
    pub workers: usize,
    #[serde(skip)]
    client: Option<reqwest::Client>,
}

impl Default for GithubIssuesSource {
    fn default() -> Self {
        Self {
            repositories: Vec::new(),
            token: None,
            limit: default_issue_limit(),
            workers: default_workers(),
            client: None,
        }
    }
}

#[async_trait]
impl Source for GithubIssuesSource {
    fn uid(&self) -> String {
        format!("{}/{}", SourceType::GithubIssues, self.repositories.join(","))
    }

    fn name(&self) -> String {
        format!("Issue Activity ({})", self.repositories.join(", "))
    }

    fn url(&self) -> String {
        repositories_url(&self.repositories)
    }

    fn source_type(&self) -> SourceType {
        SourceType::GithubIssues
    }

    async fn initialize(&mut self) -> Result<()> {
        validate_repositories(&self.repositories)?;
        if self.limit == 0 || self.limit > 100 {
            self.limit = default_issue_limit();
        }
        self.client = Some(github_client(self.token.as_deref())?);
        Ok(())
    }

    async fn stream(&self, sink: StreamSink) {
        let Some(client) = self.client.clone() else {
            sink.error(anyhow::anyhow!("source '{}' is not initialized", self.uid()))
                .await;
            return;
        };

        let source_uid = self.uid();
        let limit = self.limit;
        let fan_out = FanOut::new(move |repository: String| {
            let client = client.clone();
            let source_uid = source_uid.clone();
            async move {
                fetch_issues(&client, &repository, limit)
                    .await
                    .map(|raw| {
                        raw.into_iter()
                            .map(|issue| map_issue(issue, &repository, &source_uid))
                            .collect::<Vec<_>>()
                    })
                    .with_context(|| format!("fetching issues of {}", repository))
            }
        })
        .workers(self.workers);

        let results = tokio::select! {
            _ = sink.cancelled() => return,
            results = fan_out.run(self.repositories.clone()) => results,
        };

        let batch = Batch::collect(results);
        for (index, err) in &batch.failures {
            tracing::warn!(
                source = %self.uid(),
                repository = %self.repositories[*index],
                error = %format!("{:#}", err),
                "issue fetch failed"
            );
        }

        let (lists, outcome) = batch.into_parts();
        let mut issues: Vec<Activity> = lists.into_iter().flatten().collect();
        sort_newest(&mut issues);
        emit_batch(&sink, issues, outcome).await;
    }

    fn config(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

fn validate_repositories(repositories: &[String]) -> Result<()> {
    if repositories.is_empty() {
        bail!("at least one repository is required");
    }
    for repository in repositories {
        split_repository(repository)?;
    }
    Ok(())
}

fn split_repository(repository: &str) -> Result<(&str, &str)> {
    match repository.split_once('/') {
        Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
            Ok((owner, repo))
        }
        _ => bail!("invalid repository format: {} (expected owner/repo)", repository),
    }
}

fn repositories_url(repositories: &[String]) -> String {
    match repositories {
        [single] => format!("https://github.com/{}", single),
        _ => "https://github.com".to_string(),
    }
}

fn github_client(token: Option<&str>) -> Result<reqwest::Client> {
    let token = token
        .map(str::to_string)
        .or_else(|| std::env::var("GITHUB_TOKEN").ok())
        .filter(|t| !t.is_empty());

    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/vnd.github+json"),
    );
    headers.insert(
        "X-GitHub-Api-Version",
        HeaderValue::from_static("2022-11-28"),
    );
    if let Some(token) = token {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
            .context("GitHub token is not a valid header value")?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    http_client(headers)
}

// ============ Releases ============

#[derive(Debug, Deserialize)]
pub(crate) struct RawRelease {
    id: u64,
    tag_name: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    body: Option<String>,
    html_url: String,
    #[serde(default)]
    prerelease: bool,
    created_at: DateTime<Utc>,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    author: Option<RawUser>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawUser {
    #[serde(default)]
    avatar_url: Option<String>,
}

async fn fetch_latest_release(
    client: &reqwest::Client,
    repository: &str,
    include_prereleases: bool,
) -> Result<RawRelease> {
    let (owner, repo) = split_repository(repository)?;

    if !include_prereleases {
        let url = format!("{}/repos/{}/{}/releases/latest", API_BASE, owner, repo);
        return get_json(client.get(url)).await;
    }

    let url = format!("{}/repos/{}/{}/releases?per_page=1", API_BASE, owner, repo);
    let releases: Vec<RawRelease> = get_json(client.get(url)).await?;
    releases
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("no releases found for repository {}", repository))
}

pub(crate) fn map_release(raw: RawRelease, repository: &str, source_uid: &str) -> Activity {
    let name = raw
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| raw.tag_name.clone());

    Activity::Release(Release {
        meta: ActivityMeta {
            uid: raw.id.to_string(),
            source_uid: source_uid.to_string(),
            source_type: SourceType::GithubReleases,
            title: format!("{} {}", repository, name),
            body: raw.body.unwrap_or_default(),
            url: raw.html_url,
            image_url: raw.author.and_then(|a| a.avatar_url),
            created_at: raw.published_at.unwrap_or(raw.created_at),
        },
        repository: repository.to_string(),
        tag_name: raw.tag_name,
        prerelease: raw.prerelease,
    })
}

// ============ Issues ============

#[derive(Debug, Deserialize)]
pub(crate) struct RawIssue {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    html_url: String,
    state: String,
    #[serde(default)]
    labels: Vec<RawLabel>,
    #[serde(default)]
    comments: u64,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    user: Option<RawUser>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawLabel {
    name: String,
}

async fn fetch_issues(
    client: &reqwest::Client,
    repository: &str,
    limit: usize,
) -> Result<Vec<RawIssue>> {
    let (owner, repo) = split_repository(repository)?;
    let url = format!(
        "{}/repos/{}/{}/issues?state=all&sort=updated&direction=desc&per_page={}",
        API_BASE, owner, repo, limit
    );
    get_json(client.get(url)).await
}

pub(crate) fn map_issue(raw: RawIssue, repository: &str, source_uid: &str) -> Activity {
    Activity::Issue(Issue {
        meta: ActivityMeta {
            uid: format!("{}#{}", repository, raw.number),
            source_uid: source_uid.to_string(),
            source_type: SourceType::GithubIssues,
            title: raw.title,
            body: raw.body.unwrap_or_default(),
            url: raw.html_url,
            image_url: raw.user.and_then(|u| u.avatar_url),
            created_at: raw.updated_at,
        },
        repository: repository.to_string(),
        number: raw.number,
        state: raw.state,
        labels: raw.labels.into_iter().map(|l| l.name).collect(),
        comments: raw.comments,
    })
}
