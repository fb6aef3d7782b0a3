use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::{Error, ErrorKind, Result};
use crate::records::{Session, User};
use crate::session::SessionContext;

/// Client for the token endpoints. Successful sign-ins land in the shared
/// [`SessionContext`]; sign-up never does, because accounts require email
/// confirmation before their first sign-in.
pub struct AuthClient {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    session: SessionContext,
}

#[derive(Debug, Clone)]
pub struct SignUpOutcome {
    pub user_id: Option<String>,
    pub confirmation_sent: bool,
}

#[derive(Debug, Deserialize)]
struct SignUpResponse {
    id: Option<String>,
    confirmation_sent_at: Option<String>,
    user: Option<User>,
}

#[derive(Debug, Deserialize)]
struct AuthErrorBody {
    error_description: Option<String>,
    msg: Option<String>,
    message: Option<String>,
    error: Option<String>,
}

impl AuthErrorBody {
    fn detail(self, fallback: &str) -> String {
        self.error_description
            .or(self.msg)
            .or(self.message)
            .or(self.error)
            .unwrap_or_else(|| fallback.to_string())
    }
}

impl AuthClient {
    pub fn new(
        http: reqwest::Client,
        base_url: String,
        anon_key: String,
        session: SessionContext,
    ) -> Self {
        Self {
            http,
            base_url,
            anon_key,
            session,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    /// Register a new account. `redirect_to` is where the confirmation email
    /// should send the user afterwards.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        redirect_to: Option<&str>,
    ) -> Result<SignUpOutcome> {
        let mut request = self
            .http
            .post(self.endpoint("signup"))
            .header("apikey", &self.anon_key)
            .json(&json!({ "email": email, "password": password }));
        if let Some(redirect) = redirect_to {
            request = request.query(&[("redirect_to", redirect)]);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(self.error_from(status, response).await);
        }
        let body: SignUpResponse = response
            .json()
            .await
            .map_err(|e| Error::Decode(format!("sign-up response: {e}")))?;
        let confirmation_sent = body.confirmation_sent_at.is_some();
        let user_id = body.id.or(body.user.map(|u| u.id));
        debug!(confirmation_sent, "sign-up accepted");
        Ok(SignUpOutcome {
            user_id,
            confirmation_sent,
        })
    }

    /// Password sign-in. On success the session is stored and broadcast.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        let session = self
            .token_grant(
                "password",
                json!({ "email": email, "password": password }),
            )
            .await?;
        self.session.set(session.clone()).await;
        Ok(session)
    }

    /// Exchange the stored refresh token for a fresh session.
    pub async fn refresh(&self) -> Result<Session> {
        let current = self.session.current().await.ok_or(Error::AuthRequired)?;
        let refresh_token = current.refresh_token.ok_or(Error::AuthRequired)?;
        let session = self
            .token_grant("refresh_token", json!({ "refresh_token": refresh_token }))
            .await?;
        self.session.set(session.clone()).await;
        Ok(session)
    }

    async fn token_grant(&self, grant_type: &str, body: serde_json::Value) -> Result<Session> {
        let response = self
            .http
            .post(self.endpoint("token"))
            .query(&[("grant_type", grant_type)])
            .header("apikey", &self.anon_key)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(self.error_from(status, response).await);
        }
        response
            .json()
            .await
            .map_err(|e| Error::Decode(format!("token response: {e}")))
    }

    /// Revoke the current token and clear the stored session. The local
    /// sign-out happens even when the revocation call fails.
    pub async fn sign_out(&self) -> Result<()> {
        if let Some(token) = self.session.access_token().await {
            let result = self
                .http
                .post(self.endpoint("logout"))
                .header("apikey", &self.anon_key)
                .bearer_auth(&token)
                .send()
                .await;
            match result {
                Ok(response) if !response.status().is_success() => {
                    warn!("token revocation returned {}", response.status());
                }
                Err(e) => warn!("token revocation failed: {e}"),
                _ => {}
            }
        }
        self.session.clear().await;
        Ok(())
    }

    /// Fetch the user behind the stored token. A rejected token is put
    /// through the refresh grant once before the session is treated as
    /// signed out; `None` means there is no usable session left.
    pub async fn current_user(&self) -> Result<Option<User>> {
        let Some(token) = self.session.access_token().await else {
            return Ok(None);
        };
        if let Some(user) = self.fetch_user(&token).await? {
            return Ok(Some(user));
        }
        debug!("stored token rejected, trying the refresh grant");
        let renewed = match self.refresh().await {
            Ok(session) => session,
            Err(e) if e.kind() == ErrorKind::Permission => {
                debug!("refresh grant rejected, signing out locally");
                self.session.clear().await;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        match self.fetch_user(&renewed.access_token).await? {
            Some(user) => Ok(Some(user)),
            None => {
                self.session.clear().await;
                Ok(None)
            }
        }
    }

    /// GET the user endpoint with one bearer token. `None` means the token
    /// was rejected outright.
    async fn fetch_user(&self, token: &str) -> Result<Option<User>> {
        let response = self
            .http
            .get(self.endpoint("user"))
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
            .send()
            .await?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(self.error_from(status, response).await);
        }
        let user: User = response
            .json()
            .await
            .map_err(|e| Error::Decode(format!("user response: {e}")))?;
        Ok(Some(user))
    }

    async fn error_from(&self, status: reqwest::StatusCode, response: reqwest::Response) -> Error {
        let body = response.json::<AuthErrorBody>().await.ok();
        let detail = body
            .map(|b| b.detail(status.as_str()))
            .unwrap_or_else(|| status.to_string());
        match status {
            reqwest::StatusCode::UNAUTHORIZED => Error::AuthRequired,
            reqwest::StatusCode::BAD_REQUEST | reqwest::StatusCode::UNPROCESSABLE_ENTITY
            | reqwest::StatusCode::FORBIDDEN => Error::Auth(detail),
            _ => Error::Auth(format!("HTTP {}: {detail}", status.as_u16())),
        }
    }
}
