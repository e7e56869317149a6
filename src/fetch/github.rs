//! [`PageSource`] over the GitHub REST API.

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;

use crate::credentials::{Credential, QuotaMeta};
use crate::fetch::source::{CollectionKind, CommitItem, Page, PageRequest, PageSource, ProfileItem, RepoItem};
use crate::github::{GitHubClient, next_link, page_param};
use crate::remote::RemoteError;
use crate::store::Item;

#[derive(Debug, Deserialize)]
struct UserResponse {
    login: String,
    name: Option<String>,
    bio: Option<String>,
    #[serde(default)]
    followers: u64,
}

#[derive(Debug, Deserialize)]
struct RepoResponse {
    name: String,
    #[serde(default)]
    stargazers_count: u64,
    language: Option<String>,
    description: Option<String>,
    default_branch: Option<String>,
    #[serde(default)]
    fork: bool,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    sha: String,
    commit: CommitDetail,
    author: Option<AccountRef>,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    message: String,
}

#[derive(Debug, Deserialize)]
struct AccountRef {
    login: String,
}

pub struct GitHubSource {
    client: GitHubClient,
}

impl GitHubSource {
    pub fn new(client: GitHubClient) -> Self {
        Self { client }
    }

    async fn get_page<T: serde::de::DeserializeOwned>(
        &self,
        credential: &Credential,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<(T, Option<String>, QuotaMeta), RemoteError> {
        let request = self.client.request(Method::GET, path, credential.token()).query(query);
        let response = self.client.send(request).await?;
        let quota = QuotaMeta::from_headers(response.headers());
        let next = next_link(response.headers()).and_then(|url| page_param(&url));
        let body = response.json::<T>().await?;
        Ok((body, next, quota))
    }
}

fn to_item<T: serde::Serialize>(key: impl Into<String>, payload: &T) -> Result<Item, RemoteError> {
    let value = serde_json::to_value(payload).map_err(|e| RemoteError::Malformed(e.to_string()))?;
    Ok(Item::new(key, value))
}

#[async_trait]
impl PageSource for GitHubSource {
    async fn fetch_page(&self, credential: &Credential, request: &PageRequest) -> Result<Page, RemoteError> {
        let page = request.page_token.clone().unwrap_or_else(|| "1".to_string());
        let paging = [("per_page", request.page_size.to_string()), ("page", page)];

        match &request.collection {
            CollectionKind::Profile => {
                let (user, _, quota): (UserResponse, _, _) =
                    self.get_page(credential, &format!("/users/{}", request.login), &[]).await?;
                let item = to_item(
                    user.login.to_lowercase(),
                    &ProfileItem {
                        login: user.login,
                        name: user.name,
                        bio: user.bio,
                        followers: user.followers,
                    },
                )?;
                Ok(Page {
                    items: vec![item],
                    next_token: None,
                    quota,
                })
            }
            CollectionKind::Repositories => {
                let mut query = vec![("type", "owner".to_string())];
                query.extend(paging);
                let (repos, next_token, quota): (Vec<RepoResponse>, _, _) = self
                    .get_page(credential, &format!("/users/{}/repos", request.login), &query)
                    .await?;
                let items = repos
                    .into_iter()
                    .map(|r| {
                        to_item(
                            r.name.clone(),
                            &RepoItem {
                                name: r.name,
                                stars: r.stargazers_count,
                                language: r.language,
                                description: r.description,
                                default_branch: r.default_branch,
                                fork: r.fork,
                            },
                        )
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Page {
                    items,
                    next_token,
                    quota,
                })
            }
            CollectionKind::Commits { repo } => {
                let mut query = vec![("author", request.login.clone())];
                query.extend(paging);
                let path = format!("/repos/{}/{}/commits", request.login, repo);
                let (commits, next_token, quota): (Vec<CommitResponse>, _, _) =
                    self.get_page(credential, &path, &query).await?;
                let items = commits
                    .into_iter()
                    .map(|c| {
                        to_item(
                            c.sha.clone(),
                            &CommitItem {
                                sha: c.sha,
                                message: c.commit.message,
                                author_login: c.author.map(|a| a.login),
                            },
                        )
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Page {
                    items,
                    next_token,
                    quota,
                })
            }
        }
    }
}
