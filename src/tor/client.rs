//! Authenticated control sessions
//!
//! Tries cookie, then password, then NULL authentication. Tor drops the
//! connection after a rejected AUTHENTICATE, so every attempt after the
//! first opens a fresh connection.

use super::control::{ProtocolInfo, TorController};
use crate::config::TorConfig;
use crate::error::{AuthError, ControlError, SignalError};
use crate::rotation::{ControlChannel, ControlSession};
use std::path::PathBuf;
use tracing::{debug, info};

/// Common cookie file locations
const COOKIE_PATHS: &[&str] = &[
    "/run/tor/control.authcookie",
    "/var/run/tor/control.authcookie",
    "/var/lib/tor/control_auth_cookie",
    "/usr/local/var/lib/tor/control_auth_cookie",
];

/// One way of proving ourselves to Tor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Cookie { path: PathBuf, cookie: Vec<u8> },
    Password(String),
    Null,
}

impl Credential {
    pub fn method(&self) -> &'static str {
        match self {
            Credential::Cookie { .. } => "cookie",
            Credential::Password(_) => "password",
            Credential::Null => "null",
        }
    }

    fn bytes(&self) -> Option<&[u8]> {
        match self {
            Credential::Cookie { cookie, .. } => Some(cookie),
            Credential::Password(password) => Some(password.as_bytes()),
            Credential::Null => None,
        }
    }
}

/// Opens authenticated [`TorController`] sessions
pub struct TorControlClient {
    config: TorConfig,
}

impl TorControlClient {
    pub fn new(config: TorConfig) -> Self {
        Self { config }
    }

    /// Connect and authenticate, trying each usable credential in order
    pub async fn connect(&self) -> Result<TorController, AuthError> {
        let addr = self.config.control_addr();
        let timeout = self.config.command_timeout();

        let mut probe = TorController::connect(&addr, timeout).await?;
        let info = probe.protocol_info().await?;
        debug!(
            "Tor {} offers auth methods {:?}",
            info.tor_version.as_deref().unwrap_or("?"),
            info.auth_methods
        );

        let candidates = self.candidates(&info);
        if candidates.is_empty() {
            probe.close().await;
            return Err(AuthError::NoUsableMethod);
        }

        let mut probe = Some(probe);
        let mut last_rejection = None;

        for credential in candidates {
            let mut conn = match probe.take() {
                Some(conn) => conn,
                None => TorController::connect(&addr, timeout).await?,
            };

            match conn.authenticate(credential.bytes()).await {
                Ok(()) => {
                    info!("Authenticated to Tor control port via {}", credential.method());
                    return Ok(conn);
                },
                Err(ControlError::Status { code, message }) => {
                    debug!("{} authentication rejected: {} {}", credential.method(), code, message);
                    last_rejection = Some(AuthError::Rejected {
                        method: credential.method().to_string(),
                        message: format!("{} {}", code, message),
                    });
                },
                Err(e) => return Err(e.into()),
            }
        }

        Err(last_rejection.unwrap_or(AuthError::NoUsableMethod))
    }

    /// Credentials worth trying, in preference order
    pub fn candidates(&self, info: &ProtocolInfo) -> Vec<Credential> {
        let mut candidates = Vec::new();

        if info.allows("COOKIE") {
            if let Some(credential) = self.read_cookie(info) {
                candidates.push(credential);
            }
        }

        if let Some(password) = &self.config.control_password {
            if info.allows("HASHEDPASSWORD") {
                candidates.push(Credential::Password(password.clone()));
            }
        }

        if info.auth_methods.iter().any(|m| m == "NULL") {
            candidates.push(Credential::Null);
        }

        candidates
    }

    fn read_cookie(&self, info: &ProtocolInfo) -> Option<Credential> {
        let paths = self
            .config
            .cookie_path
            .iter()
            .chain(info.cookie_file.iter())
            .cloned()
            .chain(COOKIE_PATHS.iter().map(PathBuf::from));

        for path in paths {
            match std::fs::read(&path) {
                Ok(cookie) => {
                    debug!("Using control cookie from {}", path.display());
                    return Some(Credential::Cookie { path, cookie });
                },
                Err(e) => debug!("Cookie {} not readable: {}", path.display(), e),
            }
        }
        None
    }
}

impl ControlChannel for TorControlClient {
    type Session = TorController;

    async fn authenticate(&mut self) -> Result<TorController, AuthError> {
        self.connect().await
    }
}

impl ControlSession for TorController {
    async fn signal_new_identity(&mut self) -> Result<(), SignalError> {
        TorController::signal_new_identity(self).await
    }

    async fn circuit_established(&mut self) -> Result<bool, SignalError> {
        Ok(TorController::circuit_established(self).await?)
    }

    async fn close(&mut self) {
        TorController::close(self).await;
    }
}
