//! Mattermost REST API v4 client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

/// Header carrying the session token after login.
const TOKEN_HEADER: &str = "Token";
const API_PREFIX: [&str; 2] = ["api", "v4"];

/// Invite-only team.
pub const TEAM_TYPE_INVITE: &str = "I";

pub type Result<T> = std::result::Result<T, PlatformError>;

/// Errors returned by Mattermost.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("resource not found")]
    NotFound,

    #[error("mattermost replied {status}: {message}")]
    Status { status: StatusCode, message: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("login succeeded without session token")]
    MissingToken,

    #[error("invalid mattermost url")]
    InvalidUrl,
}

impl PlatformError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, PlatformError::NotFound)
    }
}

/// Error body sent by Mattermost.
#[derive(Debug, Deserialize)]
struct AppError {
    message: String,
}

/// Mattermost account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub auth_service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_data: Option<String>,
    /// Fields not managed here, sent back untouched on update.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Mattermost team.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Team {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub name: String,
    pub display_name: String,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamMember {
    pub team_id: String,
    pub user_id: String,
}

#[derive(Debug, Serialize)]
struct Login<'a> {
    login_id: &'a str,
    password: &'a str,
}

/// Operations the synchronization needs from the chat platform.
#[async_trait]
pub trait Platform: Send + Sync {
    async fn get_user_by_email(&self, email: &str) -> Result<User>;

    async fn create_user(&self, user: &User) -> Result<User>;

    async fn update_user(&self, user: &User) -> Result<User>;

    async fn get_team_by_name(&self, name: &str) -> Result<Team>;

    async fn create_team(&self, team: &Team) -> Result<Team>;

    /// Adding an existing member succeeds.
    async fn add_team_member(&self, team_id: &str, user_id: &str)
    -> Result<()>;
}

/// Authenticated Mattermost session.
#[derive(Debug, Clone)]
pub struct MattermostClient {
    http: Client,
    base: Url,
}

impl MattermostClient {
    /// Open a session with an admin login.
    pub async fn login(
        url: &str,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let base = Url::parse(url).map_err(|_| PlatformError::InvalidUrl)?;
        let http = Client::builder().timeout(timeout).build()?;

        let response = http
            .post(endpoint(&base, &["users", "login"])?)
            .json(&Login {
                login_id: username,
                password,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let err = error_from(response).await;
            tracing::error!(error = %err, %username, "mattermost login failed");
            return Err(err);
        }

        let token = response
            .headers()
            .get(TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or(PlatformError::MissingToken)?
            .to_owned();

        tracing::info!(%base, %username, "mattermost session opened");

        Self::with_token(base.as_str(), &token, timeout)
    }

    /// Use a personal access or session token.
    pub fn with_token(url: &str, token: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(url).map_err(|_| PlatformError::InvalidUrl)?;

        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| PlatformError::MissingToken)?;
        value.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value);

        let http = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self { http, base })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        endpoint(&self.base, segments)
    }
}

#[async_trait]
impl Platform for MattermostClient {
    async fn get_user_by_email(&self, email: &str) -> Result<User> {
        let response = self
            .http
            .get(self.endpoint(&["users", "email", email])?)
            .send()
            .await?;
        decode(response).await
    }

    async fn create_user(&self, user: &User) -> Result<User> {
        let response = self
            .http
            .post(self.endpoint(&["users"])?)
            .json(user)
            .send()
            .await?;
        decode(response).await
    }

    async fn update_user(&self, user: &User) -> Result<User> {
        let response = self
            .http
            .put(self.endpoint(&["users", &user.id])?)
            .json(user)
            .send()
            .await?;
        decode(response).await
    }

    async fn get_team_by_name(&self, name: &str) -> Result<Team> {
        let response = self
            .http
            .get(self.endpoint(&["teams", "name", name])?)
            .send()
            .await?;
        decode(response).await
    }

    async fn create_team(&self, team: &Team) -> Result<Team> {
        let response = self
            .http
            .post(self.endpoint(&["teams"])?)
            .json(team)
            .send()
            .await?;
        decode(response).await
    }

    async fn add_team_member(
        &self,
        team_id: &str,
        user_id: &str,
    ) -> Result<()> {
        let response = self
            .http
            .post(self.endpoint(&["teams", team_id, "members"])?)
            .json(&TeamMember {
                team_id: team_id.to_owned(),
                user_id: user_id.to_owned(),
            })
            .send()
            .await?;
        decode::<TeamMember>(response).await?;
        Ok(())
    }
}

/// Build `<base>/api/v4/<segments>` with each segment percent-encoded.
fn endpoint(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| PlatformError::InvalidUrl)?
        .pop_if_empty()
        .extend(API_PREFIX)
        .extend(segments);
    Ok(url)
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    if response.status().is_success() {
        Ok(response.json::<T>().await?)
    } else {
        Err(error_from(response).await)
    }
}

async fn error_from(response: Response) -> PlatformError {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return PlatformError::NotFound;
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<AppError>(&body)
        .map(|err| err.message)
        .unwrap_or(body);

    PlatformError::Status { status, message }
}
