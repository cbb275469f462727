//! Session lifecycle: login, persistence across restarts, logout.
//!
//! The bearer token is stored in the credential store (see `storage`); the
//! rest of the profile lives in `local_settings` under category `session`.
//! A `Session` is created here and passed explicitly to every operation.

use std::fmt;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::api::ColetaApi;
use crate::db::{self, DbState};
use crate::error::{ColetaError, Result};
use crate::models::LoginResponse;
use crate::storage::{self, CredentialStore, KEY_ACCESS_TOKEN};

const SESSION_CATEGORY: &str = "session";
const KEY_USER_ID: &str = "user_id";
const KEY_LOGIN: &str = "login";
const KEY_DISPLAY_NAME: &str = "display_name";
const KEY_IS_ADMIN: &str = "is_admin";

/// An authenticated user.
#[derive(Clone, PartialEq)]
pub struct Session {
    pub user_id: i64,
    pub login: String,
    pub display_name: String,
    pub is_admin: bool,
    token: Zeroizing<String>,
}

impl Session {
    pub fn new(
        user_id: i64,
        login: impl Into<String>,
        display_name: impl Into<String>,
        is_admin: bool,
        token: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            login: login.into(),
            display_name: display_name.into(),
            is_admin,
            token: Zeroizing::new(token.into()),
        }
    }

    fn from_login(login: &str, resp: LoginResponse) -> Self {
        Self::new(
            resp.user_id,
            login,
            resp.display_name,
            resp.is_admin,
            resp.access_token,
        )
    }

    pub fn token(&self) -> &str {
        self.token.as_str()
    }

    /// Admin operations are refused locally for non-admin sessions.
    pub fn require_admin(&self) -> Result<()> {
        if self.is_admin {
            Ok(())
        } else {
            Err(ColetaError::validation(
                "Acesso restrito a administradores",
            ))
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("login", &self.login)
            .field("display_name", &self.display_name)
            .field("is_admin", &self.is_admin)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Authenticate against the API and persist the new session.
pub async fn login(
    api: &dyn ColetaApi,
    db_state: &DbState,
    creds: &dyn CredentialStore,
    login: &str,
    password: &str,
) -> Result<Session> {
    let login = login.trim();
    if login.is_empty() || password.is_empty() {
        return Err(ColetaError::validation("Informe usuário e senha"));
    }

    let resp = api.login(login, password).await?;
    if resp.access_token.trim().is_empty() {
        return Err(ColetaError::InvalidResponse(
            "login response has an empty token".into(),
        ));
    }
    let session = Session::from_login(login, resp);
    persist(db_state, creds, &session)?;

    info!(
        user_id = session.user_id,
        login = %session.login,
        is_admin = session.is_admin,
        "login successful"
    );
    Ok(session)
}

fn persist(db_state: &DbState, creds: &dyn CredentialStore, session: &Session) -> Result<()> {
    creds.set(KEY_ACCESS_TOKEN, session.token())?;
    let conn = db_state.lock()?;
    db::set_setting(&conn, SESSION_CATEGORY, KEY_USER_ID, &session.user_id.to_string())?;
    db::set_setting(&conn, SESSION_CATEGORY, KEY_LOGIN, &session.login)?;
    db::set_setting(&conn, SESSION_CATEGORY, KEY_DISPLAY_NAME, &session.display_name)?;
    db::set_setting(
        &conn,
        SESSION_CATEGORY,
        KEY_IS_ADMIN,
        if session.is_admin { "true" } else { "false" },
    )?;
    Ok(())
}

/// Rebuild the last session from local state. `None` when any piece is
/// missing, which is treated as logged out.
pub fn restore(db_state: &DbState, creds: &dyn CredentialStore) -> Result<Option<Session>> {
    let Some(token) = creds.get(KEY_ACCESS_TOKEN) else {
        return Ok(None);
    };
    let conn = db_state.lock()?;
    let user_id = db::get_setting(&conn, SESSION_CATEGORY, KEY_USER_ID)
        .and_then(|v| v.parse::<i64>().ok());
    let login = db::get_setting(&conn, SESSION_CATEGORY, KEY_LOGIN);
    let (Some(user_id), Some(login)) = (user_id, login) else {
        warn!("token present but session profile incomplete, ignoring");
        return Ok(None);
    };
    let display_name =
        db::get_setting(&conn, SESSION_CATEGORY, KEY_DISPLAY_NAME).unwrap_or_else(|| login.clone());
    let is_admin =
        db::get_setting(&conn, SESSION_CATEGORY, KEY_IS_ADMIN).as_deref() == Some("true");

    Ok(Some(Session::new(user_id, login, display_name, is_admin, token)))
}

/// Restore and check the token with the server. A rejected token logs the
/// user out; an unreachable server keeps the session so work can continue
/// offline.
pub async fn restore_verified(
    api: &dyn ColetaApi,
    db_state: &DbState,
    creds: &dyn CredentialStore,
) -> Result<Option<Session>> {
    let Some(session) = restore(db_state, creds)? else {
        return Ok(None);
    };
    match api.verify_token(&session).await {
        Ok(check) if check.valid => Ok(Some(session)),
        Ok(_) => {
            logout(db_state, creds)?;
            Ok(None)
        }
        Err(e) if e.is_auth_failure() => {
            info!(login = %session.login, "stored token rejected, logging out");
            logout(db_state, creds)?;
            Ok(None)
        }
        Err(e) => {
            warn!(error = %e, "token check failed, keeping stored session");
            Ok(Some(session))
        }
    }
}

/// Forget the token and profile. Queued offline work is left alone.
pub fn logout(db_state: &DbState, creds: &dyn CredentialStore) -> Result<()> {
    storage::clear_all(creds)?;
    let conn = db_state.lock()?;
    db::delete_all_settings(&conn, SESSION_CATEGORY)?;
    info!("logged out");
    Ok(())
}
