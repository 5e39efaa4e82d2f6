//! Session context
//!
//! Signed-in staff sessions (super admin, company admin, watchmen), kept in an
//! explicit value that is loaded from and saved to a JSON file.

use crate::api::{read_envelope, ApiError, HttpVisitorApi};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid session file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("login failed: {0}")]
    LoginFailed(String),
    #[error("not signed in as {0}")]
    NoSession(Role),
    #[error("unknown role: {0}")]
    UnknownRole(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    SuperAdmin,
    CompanyAdmin,
    Watchmen,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::SuperAdmin, Role::CompanyAdmin, Role::Watchmen];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "super-admin",
            Role::CompanyAdmin => "company-admin",
            Role::Watchmen => "watchmen",
        }
    }

    fn login_path(&self) -> [&'static str; 2] {
        match self {
            Role::SuperAdmin => ["super-admin", "signin"],
            Role::CompanyAdmin => ["company", "login"],
            Role::Watchmen => ["watchmen", "signin"],
        }
    }

    /// Name of the identifier key in the login body.
    fn identifier_key(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "emailId",
            Role::CompanyAdmin => "email",
            Role::Watchmen => "mobile",
        }
    }

    /// Watchmen tokens cannot be checked server side.
    fn verify_path(&self) -> Option<[&'static str; 2]> {
        match self {
            Role::SuperAdmin => Some(["super-admin", "verify-token"]),
            Role::CompanyAdmin => Some(["company", "verify-company"]),
            Role::Watchmen => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| SessionError::UnknownRole(s.to_string()))
    }
}

/// One signed-in role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleSession {
    pub token: String,
    /// The user or company document returned at sign in.
    #[serde(default)]
    pub profile: Option<serde_json::Value>,
    pub saved_at: DateTime<Utc>,
}

impl RoleSession {
    pub fn new(token: impl Into<String>, profile: Option<serde_json::Value>) -> Self {
        Self {
            token: token.into(),
            profile,
            saved_at: Utc::now(),
        }
    }
}

/// All sessions held by this machine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    /// Keyed by [`Role::as_str`].
    #[serde(default)]
    sessions: BTreeMap<String, RoleSession>,
}

impl SessionContext {
    /// Load from `path`; a missing file is an empty context.
    pub fn load(path: &Path) -> Result<Self, SessionError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), SessionError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        tracing::debug!(path = %path.display(), roles = self.sessions.len(), "Saved sessions");
        Ok(())
    }

    pub fn set(&mut self, role: Role, session: RoleSession) {
        self.sessions.insert(role.as_str().to_string(), session);
    }

    pub fn get(&self, role: Role) -> Option<&RoleSession> {
        self.sessions.get(role.as_str())
    }

    pub fn token(&self, role: Role) -> Option<&str> {
        self.get(role).map(|s| s.token.as_str())
    }

    pub fn clear(&mut self, role: Role) -> Option<RoleSession> {
        self.sessions.remove(role.as_str())
    }

    pub fn clear_all(&mut self) {
        self.sessions.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Role, &RoleSession)> {
        self.sessions
            .iter()
            .filter_map(|(role, session)| Some((role.parse().ok()?, session)))
    }
}

#[derive(Debug, Deserialize)]
struct LoginData {
    #[serde(default)]
    token: Option<String>,
    #[serde(default, alias = "user", alias = "company")]
    profile: Option<serde_json::Value>,
}

/// Staff sign in and token checks.
pub struct SessionClient {
    http: HttpVisitorApi,
}

impl SessionClient {
    pub fn new(http: HttpVisitorApi) -> Self {
        Self { http }
    }

    pub async fn login(
        &self,
        role: Role,
        identifier: &str,
        password: &str,
    ) -> Result<RoleSession, SessionError> {
        let url = self.http.endpoint(&role.login_path())?;
        let mut body = serde_json::Map::new();
        body.insert(role.identifier_key().into(), identifier.into());
        body.insert("password".into(), password.into());

        tracing::info!(role = %role, "Signing in");
        let resp = self
            .http
            .http()
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let data: LoginData = read_envelope(resp)
            .await?
            .ok_or_else(|| SessionError::LoginFailed("response carried no data".into()))?;
        let token = data
            .token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SessionError::LoginFailed("response carried no token".into()))?;

        tracing::info!(role = %role, "Signed in");
        Ok(RoleSession::new(token, data.profile))
    }

    /// Check `token` and return the current profile. Watchmen sessions are
    /// taken at face value.
    pub async fn verify(
        &self,
        role: Role,
        token: &str,
    ) -> Result<Option<serde_json::Value>, SessionError> {
        let Some(path) = role.verify_path() else {
            tracing::debug!(role = %role, "No verification endpoint, accepting token");
            return Ok(None);
        };
        let url = self.http.endpoint(&path)?;
        let resp = self
            .http
            .http()
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Ok(read_envelope(resp).await?)
    }

    /// Verify the stored session for `role` and store the refreshed profile.
    pub async fn refresh(&self, context: &mut SessionContext, role: Role) -> Result<(), SessionError> {
        let token = context
            .token(role)
            .ok_or(SessionError::NoSession(role))?
            .to_string();
        let profile = self.verify(role, &token).await?;
        if let (Some(profile), Some(session)) = (profile, context.sessions.get_mut(role.as_str())) {
            session.profile = Some(profile);
            session.saved_at = Utc::now();
        }
        Ok(())
    }
}
