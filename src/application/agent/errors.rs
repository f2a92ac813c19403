use thiserror::Error;

use crate::application::registry::RegistryError;
use crate::application::tooling::RemoteToolError;

/// Errors surfaced by the agent's setup surface (tool registration and
/// remote-server attachment). Query processing itself never returns an
/// error: unrecoverable failures become synthesized final answers.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Remote(#[from] RemoteToolError),
}
