//! Control-plane session management.

use crate::error::{ConnectionFailure, CoreError, Result};
use pvm_api::{ApiError, ClusterIdentity, ControlPlane, Credentials, Endpoint, Session};
use std::sync::Arc;

/// Opens and memoizes the authenticated session.
///
/// The session is created on first use and reused until
/// [`invalidate`](Self::invalidate) is called. An expired session is not
/// refreshed automatically; calls made through it fail and the caller decides
/// whether to [`reconnect`](Self::reconnect).
pub struct Connector {
    control_plane: Arc<dyn ControlPlane>,
    endpoint: Endpoint,
    credentials: Credentials,
    session: Option<Arc<dyn Session>>,
    identity: Option<ClusterIdentity>,
}

impl Connector {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        endpoint: Endpoint,
        credentials: Credentials,
    ) -> Self {
        Self {
            control_plane,
            endpoint,
            credentials,
            session: None,
            identity: None,
        }
    }

    /// The current session, logging in first if there is none.
    pub async fn session(&mut self) -> Result<Arc<dyn Session>> {
        if let Some(session) = &self.session {
            return Ok(session.clone());
        }
        self.connect().await
    }

    /// Log in and confirm the session by reading the cluster identity.
    ///
    /// # Errors
    ///
    /// [`CoreError::Connection`] with [`ConnectionFailure::Auth`] when the
    /// credentials are refused, [`ConnectionFailure::Transport`] otherwise.
    pub async fn connect(&mut self) -> Result<Arc<dyn Session>> {
        tracing::debug!(
            endpoint = %self.endpoint.api_url(),
            principal = %self.credentials.principal(),
            "Connecting to control plane"
        );

        let session = self
            .control_plane
            .connect(&self.endpoint, &self.credentials)
            .await
            .map_err(connection_error)?;
        let identity = session.cluster_identity().await.map_err(connection_error)?;

        tracing::info!(
            endpoint = %self.endpoint,
            cluster = %identity.name,
            version = %identity.version,
            "Connected to cluster"
        );

        self.identity = Some(identity);
        self.session = Some(session.clone());
        Ok(session)
    }

    /// Drop the memoized session.
    pub fn invalidate(&mut self) {
        if self.session.take().is_some() {
            tracing::debug!(endpoint = %self.endpoint, "Session invalidated");
        }
        self.identity = None;
    }

    /// Drop the current session and log in again.
    pub async fn reconnect(&mut self) -> Result<Arc<dyn Session>> {
        self.invalidate();
        self.connect().await
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Identity reported by the cluster at login.
    pub fn identity(&self) -> Option<&ClusterIdentity> {
        self.identity.as_ref()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

fn connection_error(err: ApiError) -> CoreError {
    let (kind, message) = match err {
        ApiError::Auth(m) | ApiError::Rejected(m) => (ConnectionFailure::Auth, m),
        ApiError::Transport(m) | ApiError::NotFound(m) | ApiError::Agent(m) => {
            (ConnectionFailure::Transport, m)
        }
    };
    tracing::warn!(kind = %kind, error = %message, "Control plane login failed");
    CoreError::Connection { kind, message }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_classification() {
        let err = connection_error(ApiError::Auth("401".into()));
        assert!(matches!(
            err,
            CoreError::Connection {
                kind: ConnectionFailure::Auth,
                ..
            }
        ));

        let err = connection_error(ApiError::Transport("timeout".into()));
        assert!(matches!(
            err,
            CoreError::Connection {
                kind: ConnectionFailure::Transport,
                ..
            }
        ));
    }
}
