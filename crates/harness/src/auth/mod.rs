//! Role-scoped authentication sessions for test scenarios.
//!
//! Authentication is simulated: tokens are synthesized locally rather than
//! issued by an identity provider. Sessions are cached in memory and, when
//! enabled, persisted as `<role>-session.json` so later runs can reuse them.
//! Persisted files are written without locking; two runs authenticating the
//! same role at once may overwrite each other's file.

mod session;

pub use session::{AuthSession, Role, UserSpec};

use chrono::Utc;
use common::EventBus;
use futures::future::try_join_all;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::events::AuthEvent;
use crate::validation::ValidationResult;

pub struct AuthenticationFlowCoordinator {
    config: AuthConfig,
    sessions: Arc<RwLock<HashMap<String, AuthSession>>>,
    events: EventBus<AuthEvent>,
}

impl AuthenticationFlowCoordinator {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            events: EventBus::default(),
        }
    }

    pub fn events(&self) -> &EventBus<AuthEvent> {
        &self.events
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Returns a live session for `role`, reusing a cached or persisted one
    /// when it is still valid.
    pub async fn authenticate_as_role(
        &self,
        role: Role,
        scenario: Option<&str>,
    ) -> HarnessResult<AuthSession> {
        if role == Role::Anonymous {
            return Ok(AuthSession::anonymous());
        }

        match self.resolve_session(role, scenario).await {
            Ok(session) => Ok(session),
            Err(e) => {
                warn!(role = %role, error = %e, "❌ Authentication failed");
                self.events
                    .emit(AuthEvent::Failed {
                        role,
                        error: e.to_string(),
                    })
                    .await;
                Err(e)
            }
        }
    }

    async fn resolve_session(
        &self,
        role: Role,
        scenario: Option<&str>,
    ) -> HarnessResult<AuthSession> {
        let (live, stale): (Vec<AuthSession>, Vec<AuthSession>) = {
            let sessions = self.sessions.read().await;
            sessions
                .values()
                .filter(|s| s.role == role)
                .cloned()
                .partition(AuthSession::is_valid)
        };

        for expired in stale {
            debug!(session_id = %expired.session_id, role = %role, "dropping expired session");
            self.invalidate_session(&expired.session_id).await;
        }

        if let Some(session) = live.into_iter().next() {
            debug!(session_id = %session.session_id, role = %role, "reusing cached session");
            self.emit_success(&session, scenario, true).await;
            return Ok(session);
        }

        if let Some(session) = self.restore_authentication_state(role).await? {
            self.sessions
                .write()
                .await
                .insert(session.session_id.clone(), session.clone());
            self.emit_success(&session, scenario, true).await;
            return Ok(session);
        }

        let user = self
            .config
            .users
            .get(&role)
            .ok_or(HarnessError::MissingUserSpec(role))?;
        let session = self.perform_authentication(user, scenario);
        self.sessions
            .write()
            .await
            .insert(session.session_id.clone(), session.clone());

        if self.config.persist_sessions {
            if let Err(e) = self.persist_authentication_state(&session).await {
                warn!(role = %role, error = %e, "⚠️ Session could not be persisted");
            }
        }

        info!(role = %role, session_id = %session.session_id, "✅ Authenticated");
        self.emit_success(&session, scenario, false).await;
        Ok(session)
    }

    async fn emit_success(&self, session: &AuthSession, scenario: Option<&str>, reused: bool) {
        self.events
            .emit(AuthEvent::Success {
                session_id: session.session_id.clone(),
                role: session.role,
                scenario: scenario.map(str::to_string),
                reused,
            })
            .await;
    }

    /// Simulated login: synthesizes an identity and a token pair.
    fn perform_authentication(&self, user: &UserSpec, scenario: Option<&str>) -> AuthSession {
        if user.role == Role::Anonymous {
            return AuthSession::anonymous();
        }

        let local_part = user.email.split('@').next().unwrap_or(&user.email);
        AuthSession {
            session_id: Uuid::new_v4().to_string(),
            user_id: format!("{}-{}", user.role.as_str(), local_part),
            role: user.role,
            permissions: user.effective_permissions(),
            access_token: random_token("access"),
            refresh_token: Some(random_token("refresh")),
            expires_at: Utc::now() + self.config.session_ttl(),
            metadata: serde_json::json!({
                "email": user.email,
                "organization_id": user.organization_id,
                "scenario": scenario,
                "authenticated_at": Utc::now(),
                "simulated": true,
            }),
        }
    }

    /// Checks one session, or every cached session when `session` is `None`.
    pub async fn validate_authentication_state(
        &self,
        session: Option<&AuthSession>,
    ) -> ValidationResult {
        let sessions: Vec<AuthSession> = match session {
            Some(s) => vec![s.clone()],
            None => self.sessions.read().await.values().cloned().collect(),
        };

        let mut result = ValidationResult::ok();
        if sessions.is_empty() {
            result.warning("No active authentication sessions");
        }

        let soon = Utc::now() + chrono::Duration::minutes(5);
        for s in &sessions {
            if !s.is_valid() {
                result.error(format!(
                    "Session {} ({}) is expired or has no access token",
                    s.session_id, s.role
                ));
            } else if s.role != Role::Anonymous && s.expires_at < soon {
                result.warning(format!(
                    "Session {} ({}) expires at {}",
                    s.session_id, s.role, s.expires_at
                ));
            }
        }

        self.events
            .emit(AuthEvent::ValidationDone(result.clone()))
            .await;
        result
    }

    /// Writes `session` to `<auth_dir>/<role>-session.json`.
    pub async fn persist_authentication_state(
        &self,
        session: &AuthSession,
    ) -> HarnessResult<PathBuf> {
        match self.write_session_file(session).await {
            Ok(path) => {
                debug!(role = %session.role, path = %path.display(), "session persisted");
                self.events
                    .emit(AuthEvent::SessionPersisted {
                        role: session.role,
                        path: path.clone(),
                    })
                    .await;
                Ok(path)
            }
            Err(e) => {
                self.events
                    .emit(AuthEvent::PersistFailed {
                        role: session.role,
                        error: e.to_string(),
                    })
                    .await;
                Err(e)
            }
        }
    }

    async fn write_session_file(&self, session: &AuthSession) -> HarnessResult<PathBuf> {
        if session.role == Role::Anonymous {
            return Err(HarnessError::Configuration(
                "anonymous sessions are not persisted".to_string(),
            ));
        }
        tokio::fs::create_dir_all(&self.config.auth_dir).await?;
        let path = session.role.session_file(&self.config.auth_dir);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(session)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(path)
    }

    /// Loads the persisted session for `role`. Missing, unreadable or
    /// no-longer-valid files yield `None`.
    pub async fn restore_authentication_state(
        &self,
        role: Role,
    ) -> HarnessResult<Option<AuthSession>> {
        let path = role.session_file(&self.config.auth_dir);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                self.events
                    .emit(AuthEvent::Failed {
                        role,
                        error: e.to_string(),
                    })
                    .await;
                return Err(e.into());
            }
        };

        let session: AuthSession = match serde_json::from_slice(&bytes) {
            Ok(session) => session,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "⚠️ Ignoring unreadable session file");
                return Ok(None);
            }
        };

        if session.role != role || !session.is_valid() {
            debug!(path = %path.display(), "persisted session is stale");
            return Ok(None);
        }

        info!(role = %role, session_id = %session.session_id, "♻️ Restored persisted session");
        self.events
            .emit(AuthEvent::SessionRestored {
                session_id: session.session_id.clone(),
                role,
            })
            .await;
        Ok(Some(session))
    }

    /// Authenticates every user concurrently; each gets a fresh session.
    pub async fn setup_multi_user_scenario(
        &self,
        users: Vec<UserSpec>,
    ) -> HarnessResult<Vec<AuthSession>> {
        let attempts = users.iter().map(|user| async move {
            if user.role != Role::Anonymous && user.email.trim().is_empty() {
                return Err(HarnessError::MissingUserSpec(user.role));
            }
            Ok::<_, HarnessError>(self.perform_authentication(user, Some("multi_user")))
        });

        match try_join_all(attempts).await {
            Ok(sessions) => {
                {
                    let mut cache = self.sessions.write().await;
                    for s in sessions.iter().filter(|s| s.role != Role::Anonymous) {
                        cache.insert(s.session_id.clone(), s.clone());
                    }
                }
                info!(users = sessions.len(), "👥 Multi-user scenario ready");
                self.events
                    .emit(AuthEvent::MultiUserReady {
                        sessions: sessions.len(),
                    })
                    .await;
                Ok(sessions)
            }
            Err(e) => {
                self.events
                    .emit(AuthEvent::MultiUserFailed {
                        error: e.to_string(),
                    })
                    .await;
                Err(e)
            }
        }
    }

    /// Issues a new access token and pushes the expiry out by the session TTL.
    pub async fn refresh_authentication_token(
        &self,
        session: &AuthSession,
    ) -> HarnessResult<AuthSession> {
        let has_refresh = session
            .refresh_token
            .as_deref()
            .is_some_and(|t| !t.is_empty());
        if !has_refresh {
            let error = HarnessError::MissingRefreshToken(session.session_id.clone());
            self.events
                .emit(AuthEvent::RefreshFailed {
                    session_id: session.session_id.clone(),
                    error: error.to_string(),
                })
                .await;
            return Err(error);
        }

        let mut refreshed = session.clone();
        refreshed.access_token = random_token("access");
        refreshed.refresh_token = Some(random_token("refresh"));
        refreshed.expires_at = Utc::now() + self.config.session_ttl();

        self.sessions
            .write()
            .await
            .insert(refreshed.session_id.clone(), refreshed.clone());

        if self.config.persist_sessions {
            if let Err(e) = self.persist_authentication_state(&refreshed).await {
                warn!(session_id = %refreshed.session_id, error = %e, "⚠️ Refreshed session not persisted");
            }
        }

        debug!(session_id = %refreshed.session_id, "token refreshed");
        self.events
            .emit(AuthEvent::TokenRefreshed {
                session_id: refreshed.session_id.clone(),
            })
            .await;
        Ok(refreshed)
    }

    /// Drops a cached session and, if it is the persisted one for its role,
    /// removes the file too. Returns whether anything was dropped.
    pub async fn invalidate_session(&self, session_id: &str) -> bool {
        let Some(session) = self.sessions.write().await.remove(session_id) else {
            return false;
        };

        let path = session.role.session_file(&self.config.auth_dir);
        let persisted_id = tokio::fs::read(&path)
            .await
            .ok()
            .and_then(|bytes| serde_json::from_slice::<AuthSession>(&bytes).ok())
            .map(|s| s.session_id);
        if persisted_id.as_deref() == Some(session_id) {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "could not remove session file");
            }
        }

        self.events
            .emit(AuthEvent::SessionInvalidated {
                session_id: session.session_id,
                role: session.role,
            })
            .await;
        true
    }

    pub async fn active_sessions(&self) -> Vec<AuthSession> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn session_for_role(&self, role: Role) -> Option<AuthSession> {
        self.sessions
            .read()
            .await
            .values()
            .find(|s| s.role == role && s.is_valid())
            .cloned()
    }

    /// Clears the in-memory cache. Persisted files stay for reuse.
    pub async fn reset(&self) {
        let cleared = {
            let mut sessions = self.sessions.write().await;
            let n = sessions.len();
            sessions.clear();
            n
        };
        debug!(cleared, "auth sessions cleared");
        self.events.emit(AuthEvent::Reset { cleared }).await;
    }
}

fn random_token(kind: &str) -> String {
    let body: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(40)
        .map(char::from)
        .collect();
    format!("test_{kind}_{body}")
}
