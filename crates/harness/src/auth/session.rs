use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    OrgAdmin,
    User,
    Anonymous,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::OrgAdmin => "org_admin",
            Self::User => "user",
            Self::Anonymous => "anonymous",
        }
    }

    pub fn default_permissions(self) -> Vec<String> {
        let perms: &[&str] = match self {
            Self::Admin => &["admin:*", "org:*", "survey:*", "users:*"],
            Self::OrgAdmin => &["org:read", "org:write", "survey:*", "users:manage"],
            Self::User => &["survey:read", "survey:write", "profile:*"],
            Self::Anonymous => &["public:read"],
        };
        perms.iter().map(|p| p.to_string()).collect()
    }

    pub fn session_file(self, dir: &Path) -> PathBuf {
        dir.join(format!("{}-session.json", self.as_str()))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credentials of a test user able to log in as `role`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSpec {
    pub role: Role,
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub organization_id: Option<String>,
    /// Overrides the role's default permissions
    #[serde(default)]
    pub permissions: Option<Vec<String>>,
}

impl UserSpec {
    pub fn new(role: Role, email: impl Into<String>) -> Self {
        Self {
            role,
            email: email.into(),
            password: "test-password".to_string(),
            organization_id: None,
            permissions: None,
        }
    }

    pub fn with_organization(mut self, org: impl Into<String>) -> Self {
        self.organization_id = Some(org.into());
        self
    }

    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions = Some(permissions.into_iter().map(Into::into).collect());
        self
    }

    pub(crate) fn effective_permissions(&self) -> Vec<String> {
        self.permissions
            .clone()
            .unwrap_or_else(|| self.role.default_permissions())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSession {
    pub session_id: String,
    pub user_id: String,
    pub role: Role,
    pub permissions: Vec<String>,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl AuthSession {
    /// Permissions-only session; never cached or persisted.
    pub fn anonymous() -> Self {
        Self {
            session_id: format!("anonymous-{}", uuid::Uuid::new_v4()),
            user_id: "anonymous".to_string(),
            role: Role::Anonymous,
            permissions: Role::Anonymous.default_permissions(),
            access_token: String::new(),
            refresh_token: None,
            expires_at: Utc::now() + chrono::Duration::days(365 * 100),
            metadata: serde_json::Value::Null,
        }
    }

    /// Anonymous sessions are always valid; others need a token and an
    /// expiry in the future.
    pub fn is_valid(&self) -> bool {
        self.role == Role::Anonymous
            || (self.expires_at > Utc::now() && !self.access_token.is_empty())
    }

    pub fn bearer(&self) -> Option<String> {
        (!self.access_token.is_empty()).then(|| format!("Bearer {}", self.access_token))
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| {
            p == permission
                || p.strip_suffix('*')
                    .is_some_and(|prefix| permission.starts_with(prefix))
        })
    }
}
