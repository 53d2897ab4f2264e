//! Controller error types.

use thiserror::Error;

use tierscale_core::{CollaboratorError, ParseModeError};

use crate::controller::TransitionOutcome;

/// Errors returned by controller operations.
///
/// Validation failures and conflicts leave the controller untouched.
/// `Persistence` is different: the transition it carries was already
/// applied in memory, recorded, and announced.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("invalid scaling mode: {0}")]
    InvalidMode(#[from] ParseModeError),

    #[error("tier \"{0}\" does not exist")]
    UnknownTier(String),

    #[error("manual tier selection is only available in manual mode")]
    ManualModeRequired,

    #[error("scaling decision does not call for a transition")]
    NotNeeded,

    #[error("scaling operation already in progress")]
    AlreadyScaling,

    #[error("moved to tier {} but its limits were not persisted: {source}", .outcome.record.new_tier)]
    Persistence {
        outcome: Box<TransitionOutcome>,
        #[source]
        source: CollaboratorError,
    },
}

impl ControllerError {
    /// True for rejections that left the controller state unchanged.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, Self::Persistence { .. })
    }
}

pub type ControllerResult<T> = Result<T, ControllerError>;
