use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use super::Capability;

/// Where in a plugin's lifecycle a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginErrorKind {
    /// The entry is missing, malformed, or names an unknown plugin
    Configuration,
    /// The plugin's factory rejected its arguments
    Construction,
    /// An operation on a constructed instance failed
    Invocation,
}

impl PluginErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginErrorKind::Configuration => "configuration",
            PluginErrorKind::Construction => "construction",
            PluginErrorKind::Invocation => "invocation",
        }
    }
}

impl fmt::Display for PluginErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure attributed to one configuration entry.
///
/// The cause is shared so the same error can be handed out from the
/// runtime's error log and from a cached failed resolution.
#[derive(Debug, Clone, Error)]
#[error("{capability} '{name}' {kind} error: {cause:#}")]
pub struct PluginError {
    name: String,
    capability: Capability,
    kind: PluginErrorKind,
    cause: Arc<anyhow::Error>,
}

impl PluginError {
    pub fn new(
        name: &str,
        capability: Capability,
        kind: PluginErrorKind,
        cause: impl Into<anyhow::Error>,
    ) -> Self {
        Self {
            name: name.to_string(),
            capability,
            kind,
            cause: Arc::new(cause.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    pub fn kind(&self) -> PluginErrorKind {
        self.kind
    }

    pub fn cause(&self) -> &anyhow::Error {
        &self.cause
    }

    /// Look for an error of type `E` anywhere in the cause chain.
    pub fn find_cause<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.cause.chain().find_map(|err| err.downcast_ref::<E>())
    }
}
