//! [`ReviewService`] over GitHub pull requests and the CodeRabbit report API.
//!
//! Writes (forks, refs, pulls, comments) use a single admin token. Every
//! action looks for existing remote state first so a repeated phase is
//! harmless, including a retry after only part of it went through.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method};
use serde_json::{Value, json};
use tokio::sync::OnceCell;

use crate::config::JudgeConfig;
use crate::error::{Result, WallError};
use crate::github::{GitHubClient, link_rel};
use crate::judge::parse::ReviewParser;
use crate::judge::service::{JudgeTarget, ReviewService, ReviewVerdict};
use crate::remote::{RemoteError, truncate_body};
use crate::store::PipelinePhase;

const REQUEST_TITLE: &str = "Wall of Shame: Full Repository Code Review";
const REQUEST_BODY: &str = "Every commit since the first one, up for review.";
const REPORT_TIMEOUT: Duration = Duration::from_secs(600);
/// Pause between the trigger comment and the judging prompt.
const COMMENT_SPACING: Duration = Duration::from_secs(2);

const JUDGE_PROMPT: &str = r#"@coderabbitai Judge this entire repository as if it were on trial.

Be brutally honest and specific. Call out the worst patterns you find, with file names.

End your reply with a JSON block in exactly this shape:

```json
{"grade": "<letter A-F with optional + or ->", "verdict": "<one savage sentence>", "badge": "<short funny title>"}
```"#;

pub struct GitHubReviewService {
    client: GitHubClient,
    admin_token: String,
    config: JudgeConfig,
    parser: ReviewParser,
    report_client: Client,
    report_key: Option<String>,
    auth_user: OnceCell<String>,
    comment_spacing: Duration,
}

impl GitHubReviewService {
    pub fn new(client: GitHubClient, admin_token: impl Into<String>, config: JudgeConfig) -> Result<Self> {
        let parser = ReviewParser::new(config.min_response_len)
            .map_err(|e| WallError::Config(format!("Invalid review pattern: {}", e)))?;
        let report_client = Client::builder()
            .timeout(REPORT_TIMEOUT)
            .build()
            .map_err(|e| WallError::Config(format!("Failed to build report client: {}", e)))?;

        Ok(Self {
            client,
            admin_token: admin_token.into(),
            config,
            parser,
            report_client,
            report_key: None,
            auth_user: OnceCell::new(),
            comment_spacing: COMMENT_SPACING,
        })
    }

    pub fn with_report_key(mut self, key: impl Into<String>) -> Self {
        self.report_key = Some(key.into());
        self
    }

    pub fn with_comment_spacing(mut self, spacing: Duration) -> Self {
        self.comment_spacing = spacing;
        self
    }

    async fn get_json(&self, path: &str) -> std::result::Result<Value, RemoteError> {
        let request = self.client.request(Method::GET, path, &self.admin_token);
        Ok(self.client.send(request).await?.json().await?)
    }

    async fn send_json(&self, method: Method, path: &str, body: Value) -> std::result::Result<Value, RemoteError> {
        let request = self.client.request(method, path, &self.admin_token).json(&body);
        Ok(self.client.send(request).await?.json().await?)
    }

    /// Login the admin token belongs to.
    async fn auth_user(&self) -> std::result::Result<&str, RemoteError> {
        let user = self
            .auth_user
            .get_or_try_init(|| async {
                let me = self.get_json("/user").await?;
                str_field(&me, "login")
            })
            .await?;
        Ok(user.as_str())
    }

    async fn fork_default_branch(&self, fork: &str, target: &JudgeTarget) -> std::result::Result<String, RemoteError> {
        if let Some(branch) = &target.default_branch {
            return Ok(branch.clone());
        }
        let repo = self.get_json(&format!("/repos/{}", fork)).await?;
        str_field(&repo, "default_branch")
    }

    /// Oldest commit on `branch`: the last entry of the last history page.
    async fn oldest_commit(&self, fork: &str, branch: &str) -> std::result::Result<String, RemoteError> {
        let path = format!("/repos/{}/commits?sha={}&per_page=100", fork, branch);
        let request = self.client.request(Method::GET, &path, &self.admin_token);
        let response = self.client.send(request).await?;
        let last_page = link_rel(response.headers(), "last");
        let mut commits: Value = response.json().await?;

        if let Some(url) = last_page {
            commits = self.get_json(&url).await?;
        }
        commits
            .as_array()
            .and_then(|list| list.last())
            .map(|c| str_field(c, "sha"))
            .unwrap_or_else(|| Err(RemoteError::Malformed(format!("{} has no commits", fork))))
    }

    fn request_number(target: &JudgeTarget) -> std::result::Result<u64, RemoteError> {
        let raw = target.require(PipelinePhase::RequestOpened)?;
        raw.parse()
            .map_err(|_| RemoteError::Malformed(format!("bad pull request reference: {}", raw)))
    }

    fn report_path(&self, entity_id: &str) -> PathBuf {
        self.config.report_dir.join(format!("{}.json", entity_id))
    }
}

#[async_trait]
impl ReviewService for GitHubReviewService {
    async fn derive_state(&self, target: &JudgeTarget) -> std::result::Result<String, RemoteError> {
        let me = self.auth_user().await?;
        match self.get_json(&format!("/repos/{}/{}", me, target.repo)).await {
            Ok(existing) if existing.get("fork").and_then(|f| f.as_bool()) == Some(true) => {
                log::info!("{}: reusing fork {}/{}", target.entity_id, me, target.repo);
                return str_field(&existing, "full_name");
            }
            Ok(_) | Err(RemoteError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let fork = self
            .send_json(
                Method::POST,
                &format!("/repos/{}/{}/forks", target.login, target.repo),
                json!({}),
            )
            .await?;
        log::info!("{}: forked {}/{}", target.entity_id, target.login, target.repo);
        str_field(&fork, "full_name")
    }

    async fn create_baseline(&self, target: &JudgeTarget) -> std::result::Result<String, RemoteError> {
        let fork = target.require(PipelinePhase::Forked)?;
        let branch = self.fork_default_branch(fork, target).await?;
        // A fresh fork can take a moment to materialize
        let sha = match self.oldest_commit(fork, &branch).await {
            Err(RemoteError::NotFound(msg)) | Err(RemoteError::Permanent { status: 409, message: msg }) => {
                return Err(RemoteError::Transient(format!("fork {} not ready: {}", fork, msg)));
            }
            other => other?,
        };

        let baseline = &self.config.baseline_branch;
        let created = self
            .send_json(
                Method::POST,
                &format!("/repos/{}/git/refs", fork),
                json!({ "ref": format!("refs/heads/{}", baseline), "sha": sha }),
            )
            .await;
        match created {
            Ok(_) => {}
            Err(RemoteError::Permanent { status: 422, .. }) => {
                self.send_json(
                    Method::PATCH,
                    &format!("/repos/{}/git/refs/heads/{}", fork, baseline),
                    json!({ "sha": sha, "force": true }),
                )
                .await?;
            }
            Err(e) => return Err(e),
        }
        Ok(sha)
    }

    async fn open_comparison(&self, target: &JudgeTarget) -> std::result::Result<String, RemoteError> {
        let fork = target.require(PipelinePhase::Forked)?;
        let branch = self.fork_default_branch(fork, target).await?;
        let owner = fork.split('/').next().unwrap_or(fork);
        let baseline = &self.config.baseline_branch;

        let open = self
            .get_json(&format!(
                "/repos/{}/pulls?head={}:{}&base={}&state=open",
                fork, owner, branch, baseline
            ))
            .await?;
        if let Some(number) = open.as_array().and_then(|l| l.first()).and_then(|pr| pr.get("number")) {
            log::info!("{}: reusing open pull request #{}", target.entity_id, number);
            return Ok(number.to_string());
        }

        let created = self
            .send_json(
                Method::POST,
                &format!("/repos/{}/pulls", fork),
                json!({ "title": REQUEST_TITLE, "head": branch, "base": baseline, "body": REQUEST_BODY }),
            )
            .await?;
        created
            .get("number")
            .and_then(|n| n.as_u64())
            .map(|n| n.to_string())
            .ok_or_else(|| RemoteError::Malformed("pull request response without number".to_string()))
    }

    async fn trigger_review(&self, target: &JudgeTarget) -> std::result::Result<String, RemoteError> {
        let fork = target.require(PipelinePhase::Forked)?;
        let number = Self::request_number(target)?;
        let me = self.auth_user().await?;
        let path = format!("/repos/{}/issues/{}/comments", fork, number);

        let thread = self.get_json(&format!("{}?per_page=100", path)).await?;
        let posted = posted_comments(&thread, me, &self.config.trigger_comment);

        let triggered_at = match posted.trigger_at {
            Some(at) => {
                log::info!("{}: review already triggered at {}", target.entity_id, at);
                at
            }
            None => {
                let at = Utc::now();
                self.send_json(Method::POST, &path, json!({ "body": self.config.trigger_comment }))
                    .await?;
                tokio::time::sleep(self.comment_spacing).await;
                at
            }
        };
        if !posted.prompt {
            self.send_json(Method::POST, &path, json!({ "body": JUDGE_PROMPT })).await?;
        }

        Ok(triggered_at.to_rfc3339())
    }

    async fn fetch_review_result(&self, target: &JudgeTarget) -> std::result::Result<Option<ReviewVerdict>, RemoteError> {
        let fork = target.require(PipelinePhase::Forked)?;
        let number = Self::request_number(target)?;
        let since = target.require(PipelinePhase::ReviewTriggered)?;
        let since: DateTime<Utc> = since
            .parse()
            .map_err(|_| RemoteError::Malformed(format!("bad trigger time: {}", since)))?;

        let comments = self
            .get_json(&format!(
                "/repos/{}/issues/{}/comments?since={}&per_page=100",
                fork,
                number,
                since.format("%Y-%m-%dT%H:%M:%SZ")
            ))
            .await?;
        let bot = self.config.review_bot.to_lowercase();

        let review = comments.as_array().into_iter().flatten().find_map(|comment| {
            let login = comment.pointer("/user/login")?.as_str()?.to_lowercase();
            let body = comment.get("body")?.as_str()?;
            (login.contains(&bot) && self.parser.is_review(body)).then_some(body)
        });

        match review {
            Some(body) => self.parser.parse(body).map(Some),
            None => Ok(None),
        }
    }

    async fn generate_summary(
        &self,
        target: &JudgeTarget,
        verdict: &ReviewVerdict,
    ) -> std::result::Result<String, RemoteError> {
        let Some(key) = &self.report_key else {
            return Err(RemoteError::Permanent {
                status: 0,
                message: format!("{} is not set", self.config.coderabbit_key_env),
            });
        };
        let fork = target.require(PipelinePhase::Forked)?;
        let from = target
            .require(PipelinePhase::ReviewTriggered)?
            .parse::<DateTime<Utc>>()
            .map(|t| t.date_naive())
            .unwrap_or_else(|_| Utc::now().date_naive());
        let prompt = format!(
            "Summarize the review of {} for the Wall of Shame. The reviewer graded it {}: \"{}\". \
             List the worst offenses, the funniest commit habits and one thing done right.",
            fork, verdict.grade, verdict.verdict
        );

        let url = format!("{}/report.generate", self.config.coderabbit_api_url.trim_end_matches('/'));
        let response = self
            .report_client
            .post(&url)
            .header("x-coderabbitai-api-key", key)
            .json(&json!({
                "from": from.to_string(),
                "to": Utc::now().date_naive().to_string(),
                "promptTemplate": "Custom",
                "prompt": prompt,
                "groupBy": "REPOSITORY",
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RemoteError::from_status(status.as_u16(), truncate_body(&text, 200)));
        }
        let report: Value = response.json().await?;

        let path = self.report_path(&target.entity_id);
        let write = async {
            tokio::fs::create_dir_all(&self.config.report_dir).await?;
            tokio::fs::write(&path, serde_json::to_vec_pretty(&report)?).await?;
            Ok::<_, WallError>(())
        };
        write
            .await
            .map_err(|e| RemoteError::Permanent {
                status: 0,
                message: format!("failed to save report: {}", e),
            })?;

        Ok(path.display().to_string())
    }
}

/// Our own comments already on a pull request thread.
#[derive(Debug, Default, PartialEq)]
struct PostedComments {
    /// When the trigger comment was posted
    trigger_at: Option<DateTime<Utc>>,
    prompt: bool,
}

fn posted_comments(thread: &Value, me: &str, trigger: &str) -> PostedComments {
    let mut posted = PostedComments::default();
    for comment in thread.as_array().into_iter().flatten() {
        let author = comment.pointer("/user/login").and_then(|l| l.as_str()).unwrap_or("");
        if !author.eq_ignore_ascii_case(me) {
            continue;
        }
        let body = comment.get("body").and_then(|b| b.as_str()).unwrap_or("").trim();
        if body == trigger.trim() && posted.trigger_at.is_none() {
            posted.trigger_at = Some(
                comment
                    .get("created_at")
                    .and_then(|t| t.as_str())
                    .and_then(|t| t.parse().ok())
                    .unwrap_or_else(Utc::now),
            );
        } else if body == JUDGE_PROMPT.trim() {
            posted.prompt = true;
        }
    }
    posted
}

fn str_field(value: &Value, name: &str) -> std::result::Result<String, RemoteError> {
    value
        .get(name)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| RemoteError::Malformed(format!("response missing {}", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GithubConfig;
    use crate::domain::{RepoSummary, TrackedEntity};
    use mockito::Matcher;

    const COMMENTS_PATH: &str = "/repos/judge-bot/site/issues/4/comments";

    fn target() -> JudgeTarget {
        let repo = RepoSummary {
            name: "site".to_string(),
            stars: 2,
            language: None,
            description: None,
            default_branch: Some("main".to_string()),
            fork: false,
        };
        JudgeTarget::new(&TrackedEntity::new("alice"), &repo)
            .with_reference(PipelinePhase::Forked, "judge-bot/site")
            .with_reference(PipelinePhase::RequestOpened, "4")
    }

    fn service(server: &mockito::ServerGuard) -> GitHubReviewService {
        let github = GithubConfig {
            api_url: server.url(),
            ..GithubConfig::default()
        };
        GitHubReviewService::new(GitHubClient::new(&github).unwrap(), "admin-token", JudgeConfig::default())
            .unwrap()
            .with_comment_spacing(Duration::ZERO)
    }

    async fn thread_mock(server: &mut mockito::ServerGuard, body: &str) -> mockito::Mock {
        server
            .mock("GET", Matcher::Regex(format!("^{}", COMMENTS_PATH)))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await
    }

    async fn prompt_mock(server: &mut mockito::ServerGuard, status: usize) -> mockito::Mock {
        server
            .mock("POST", COMMENTS_PATH)
            .match_body(Matcher::Regex("Judge this entire repository".to_string()))
            .with_status(status)
            .with_body("{}")
            .expect(1)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn test_trigger_retry_posts_only_the_missing_comment() {
        let mut server = mockito::Server::new_async().await;
        let _user = server
            .mock("GET", "/user")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"login": "judge-bot"}"#)
            .create_async()
            .await;
        let trigger = server
            .mock("POST", COMMENTS_PATH)
            .match_body(Matcher::PartialJson(json!({ "body": "@coderabbitai review" })))
            .with_status(201)
            .with_body("{}")
            .expect(1)
            .create_async()
            .await;
        let service = service(&server);

        // Trigger lands, the judging prompt hits a 502
        let empty = thread_mock(&mut server, "[]").await;
        let failing = prompt_mock(&mut server, 502).await;
        let err = service.trigger_review(&target()).await.unwrap_err();
        assert!(err.is_retryable());
        failing.assert_async().await;
        empty.remove_async().await;
        failing.remove_async().await;

        let _thread = thread_mock(
            &mut server,
            r#"[{"user": {"login": "Judge-Bot"}, "body": "@coderabbitai review", "created_at": "2026-03-01T10:00:00Z"}]"#,
        )
        .await;
        let prompt = prompt_mock(&mut server, 201).await;
        let triggered_at = service.trigger_review(&target()).await.unwrap();

        assert_eq!(triggered_at, "2026-03-01T10:00:00+00:00");
        trigger.assert_async().await;
        prompt.assert_async().await;
    }

    #[test]
    fn test_posted_comments_ignores_other_authors() {
        let thread = json!([
            { "user": { "login": "alice" }, "body": "@coderabbitai review", "created_at": "2026-03-01T09:00:00Z" },
            { "user": { "login": "judge-bot" }, "body": JUDGE_PROMPT, "created_at": "2026-03-01T10:00:02Z" },
        ]);
        let posted = posted_comments(&thread, "judge-bot", "@coderabbitai review");
        assert_eq!(posted.trigger_at, None);
        assert!(posted.prompt);
    }

    #[test]
    fn test_str_field() {
        let value = json!({ "full_name": "bot/dotfiles", "fork": true });
        assert_eq!(str_field(&value, "full_name").unwrap(), "bot/dotfiles");
        assert!(matches!(str_field(&value, "fork"), Err(RemoteError::Malformed(_))));
    }

    #[test]
    fn test_judge_prompt_asks_for_parseable_block() {
        let parser = ReviewParser::new(0).unwrap();
        // The example block in the prompt is itself recognized as a JSON block
        let err = parser.parse(JUDGE_PROMPT).unwrap_err();
        assert!(matches!(err, RemoteError::Malformed(_)));
        assert!(JUDGE_PROMPT.contains("\"grade\""));
    }
}
