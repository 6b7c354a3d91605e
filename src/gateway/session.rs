//! Session establishment: connect, list instances, re-authenticate once

use super::{DirectoryBackend, Gateway, GatewaySettings, Instance};
use crate::error::{IdcError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Produces authenticated backends and runs the external login step
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, profile: &str, region: &str) -> Result<Arc<dyn DirectoryBackend>>;

    /// Refreshes the SSO session for `profile`
    async fn login(&self, profile: &str) -> Result<()>;
}

/// An authenticated, not yet instance-bound gateway and the instances it sees
#[derive(Debug, Clone)]
pub struct Session {
    pub gateway: Gateway,
    pub instances: Vec<Instance>,
}

/// Connects for (profile, region) and lists instances.
///
/// An auth-expiry failure triggers exactly one login followed by exactly one
/// retry; whatever the retry returns is final. Zero instances is
/// [`IdcError::NoInstances`].
pub async fn establish(
    connector: &dyn Connector,
    profile: &str,
    region: &str,
    settings: GatewaySettings,
) -> Result<Session> {
    match attempt(connector, profile, region, settings).await {
        Err(e) if e.is_auth_expired() => {
            warn!(profile, error = %e, "SSO session expired, running login");
            connector.login(profile).await?;
            attempt(connector, profile, region, settings).await
        }
        other => other,
    }
}

async fn attempt(
    connector: &dyn Connector,
    profile: &str,
    region: &str,
    settings: GatewaySettings,
) -> Result<Session> {
    let backend = connector.connect(profile, region).await?;
    let gateway = Gateway::new(backend, settings);
    let instances = gateway.list_instances().await?;
    if instances.is_empty() {
        return Err(IdcError::NoInstances);
    }
    info!(profile, region, count = instances.len(), "session established");
    Ok(Session { gateway, instances })
}
