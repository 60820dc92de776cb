//! Error taxonomy for the discovery/collection pipeline.
//!
//! Only [`DiscoveryError`] and [`PersistError::CreateDir`] end a run. Everything
//! else is recovered by the caller and turned into a [`crate::Diagnostic`].

use std::fmt;
use std::path::PathBuf;

use crate::ResourceIdentity;

/// Opaque cause coming from the transport layer.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryStage {
    Groups,
}

impl fmt::Display for DiscoveryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryStage::Groups => f.write_str("groups"),
        }
    }
}

/// The API group catalog could not be retrieved. Fatal.
#[derive(Debug, thiserror::Error)]
#[error("discovery failed at stage {stage}")]
pub struct DiscoveryError {
    pub stage: DiscoveryStage,
    #[source]
    pub cause: BoxError,
}

impl DiscoveryError {
    pub fn groups(cause: impl Into<BoxError>) -> Self {
        Self { stage: DiscoveryStage::Groups, cause: cause.into() }
    }
}

/// Resource listing for one group/version failed; that group/version is skipped.
#[derive(Debug, thiserror::Error)]
#[error("listing resources for {group_version} failed")]
pub struct PartialDiscoveryError {
    pub group_version: String,
    #[source]
    pub cause: BoxError,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("listing {identity} failed")]
    Transport {
        identity: ResourceIdentity,
        #[source]
        cause: BoxError,
    },
    #[error("{identity} is cluster-scoped; namespace {namespace:?} cannot be applied")]
    NamespaceOnClusterScoped { identity: ResourceIdentity, namespace: String },
}

impl FetchError {
    pub fn transport(identity: ResourceIdentity, cause: impl Into<BoxError>) -> Self {
        FetchError::Transport { identity, cause: cause.into() }
    }

    pub fn identity(&self) -> &ResourceIdentity {
        match self {
            FetchError::Transport { identity, .. } => identity,
            FetchError::NamespaceOnClusterScoped { identity, .. } => identity,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("creating output directory {path:?}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("refusing to persist key {key:?}: not a plain file name")]
    InvalidKey { key: String },
    #[error("serializing {key}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("writing {path:?}")]
    Write {
        key: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("reading {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl PersistError {
    /// The key (or directory) the failure relates to.
    pub fn target(&self) -> String {
        match self {
            PersistError::CreateDir { path, .. } | PersistError::Read { path, .. } | PersistError::Parse { path, .. } => {
                path.display().to_string()
            }
            PersistError::InvalidKey { key } | PersistError::Serialize { key, .. } | PersistError::Write { key, .. } => key.clone(),
        }
    }

    pub fn is_fatal(&self) -> bool { matches!(self, PersistError::CreateDir { .. }) }
}

/// `outer: inner: root` rendering of an error and its sources.
pub(crate) fn render_chain(e: &(dyn std::error::Error + 'static)) -> String {
    let mut out = e.to_string();
    let mut cur = e.source();
    while let Some(s) = cur {
        out.push_str(": ");
        out.push_str(&s.to_string());
        cur = s.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Diagnostic, Stage};

    #[test]
    fn fetch_error_renders_cause_chain_into_diagnostic() {
        let e = FetchError::transport(ResourceIdentity::new("apps", "v1", "deployments"), "connection refused");
        let d = Diagnostic::from(&e);
        assert_eq!(d.stage, Stage::Fetch);
        assert_eq!(d.target, "deployments.v1.apps");
        assert_eq!(d.message, "listing deployments.v1.apps failed: connection refused");
    }

    #[test]
    fn only_create_dir_is_fatal() {
        let io = || std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(PersistError::CreateDir { path: "out".into(), source: io() }.is_fatal());
        assert!(!PersistError::Write { key: "pods".into(), path: "out/pods.json".into(), source: io() }.is_fatal());
        assert!(!PersistError::InvalidKey { key: "../x".into() }.is_fatal());
    }
}
