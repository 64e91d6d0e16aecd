//! Session lifecycle: load from disk, create through the vendor's OTP login,
//! persist, and invalidate on server-signaled expiry
//!
//! A session is either fully populated or absent. Loading fails soft: a
//! missing, empty, or structurally invalid file means "no session", never an
//! error. A login rejection (account not found) is likewise an expected
//! outcome, surfaced as `Ok(None)`.

use crate::client::{ApiClient, ApiError, LoginOutcome};
use crate::keys::generate_session_key;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Bearer token plus the opaque per-session identifier the offer feed
/// requires. Persisted verbatim with the vendor's field names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub access_token: String,
    pub session_key: String,
}

impl Session {
    fn is_valid(&self) -> bool {
        !self.access_token.is_empty() && !self.session_key.is_empty()
    }
}

/// Supplies the phone number and one-time code during login. Interactive in
/// the shipped binary, scripted in tests.
pub trait CredentialPrompt: Send {
    fn phone_number(&mut self) -> Result<u64>;
    fn one_time_code(&mut self) -> Result<u32>;
}

/// Reads credentials from stdin
pub struct StdinPrompt;

impl CredentialPrompt for StdinPrompt {
    fn phone_number(&mut self) -> Result<u64> {
        ask("Enter your phone number: ")?
            .parse()
            .context("Phone number must be digits only")
    }

    fn one_time_code(&mut self) -> Result<u32> {
        ask("Enter the OTP: ")?
            .parse()
            .context("OTP must be digits only")
    }
}

fn ask(prompt: &str) -> Result<String> {
    print!("{prompt}");
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin()
        .read_line(&mut line)
        .context("Failed to read input")?;

    Ok(line.trim().to_string())
}

/// Produces a bearer token through the vendor's login flow.
///
/// `Ok(None)` means the vendor rejected the account, which is an expected
/// outcome rather than an error.
#[async_trait]
pub trait Authenticator: Send {
    async fn login(&mut self) -> Result<Option<String>>;
}

/// Two-step OTP login against the vendor API
pub struct OtpAuthenticator<P> {
    client: ApiClient,
    prompt: P,
}

impl<P: CredentialPrompt> OtpAuthenticator<P> {
    pub fn new(client: ApiClient, prompt: P) -> Self {
        Self { client, prompt }
    }
}

#[async_trait]
impl<P: CredentialPrompt> Authenticator for OtpAuthenticator<P> {
    async fn login(&mut self) -> Result<Option<String>> {
        let phone = self.prompt.phone_number()?;
        self.client
            .send_login_otp(phone)
            .await
            .context("Failed to request a login code")?;
        info!("OTP sent");

        let otp = self.prompt.one_time_code()?;
        match self.client.verify_login_otp(phone, otp).await {
            Ok(LoginOutcome::LoggedIn { access_token }) => {
                info!("Logged in");
                Ok(Some(access_token))
            }
            Ok(LoginOutcome::UnknownAccount) => {
                warn!("Account not found; register through the vendor's mobile app first");
                Ok(None)
            }
            Err(err @ ApiError::Status { status: 400, .. }) => {
                // The vendor answers a wrong code with a 400 and a message.
                warn!(error = %err, "Login code rejected");
                Ok(None)
            }
            Err(err) => Err(err).context("Failed to verify the login code"),
        }
    }
}

/// Owns the persisted session record and an in-memory copy of it
pub struct SessionStore {
    path: PathBuf,
    cached: Option<Session>,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: None,
        }
    }

    /// The previously persisted session, if structurally valid. The result
    /// is cached so repeated calls within a run do not re-read storage.
    pub fn load(&mut self) -> Option<Session> {
        if let Some(session) = &self.cached {
            return Some(session.clone());
        }

        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(_) => {
                debug!(path = %self.path.display(), "No session file");
                return None;
            }
        };

        if content.trim().is_empty() {
            warn!("Session file is empty");
            return None;
        }

        let session: Session = match serde_json::from_str(&content) {
            Ok(session) => session,
            Err(err) => {
                warn!(error = %err, "Session file is not valid JSON");
                return None;
            }
        };

        if !session.is_valid() {
            warn!("Session record is missing a token or key");
            return None;
        }

        debug!("Session loaded");
        self.cached = Some(session.clone());
        Some(session)
    }

    /// Create a session through the authenticator and persist it. `Ok(None)`
    /// when the login was rejected.
    pub async fn create(&mut self, auth: &mut dyn Authenticator) -> Result<Option<Session>> {
        let Some(access_token) = auth.login().await? else {
            return Ok(None);
        };

        let session = Session {
            access_token,
            session_key: generate_session_key()?,
        };
        self.persist(&session)?;
        self.cached = Some(session.clone());

        debug!("Session created");
        Ok(Some(session))
    }

    /// Cached or persisted session when available, otherwise a new one.
    pub async fn ensure(&mut self, auth: &mut dyn Authenticator) -> Result<Option<Session>> {
        if let Some(session) = self.load() {
            return Ok(Some(session));
        }

        self.create(auth).await
    }

    /// Drop the cached session and remove the stale record so the next
    /// `ensure` re-authenticates instead of reusing a rejected token.
    pub fn invalidate(&mut self) {
        self.cached = None;

        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(error = %err, "Failed to remove stale session file");
            }
        }
    }

    fn persist(&self, session: &Session) -> Result<()> {
        let json = serde_json::to_string(session)?;
        fs::write(&self.path, json)
            .with_context(|| format!("Failed to write session file {}", self.path.display()))?;

        debug!(path = %self.path.display(), "Session saved");
        Ok(())
    }
}
