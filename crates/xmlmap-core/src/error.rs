//! Error types shared by the branch contexts and the document driver.

use thiserror::Error;

/// Error returned by user supplied mapping functions and hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Misuse of a branch context.
#[derive(Debug, Error)]
pub enum BranchError {
    /// An object of the same concrete type is already live on the branch.
    #[error("an object of type {type_name} already exists on this branch; remove it first")]
    DuplicateBinding { type_name: &'static str },
}

/// Which hook of a rule node failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    Start,
    End,
}

impl std::fmt::Display for HookPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookPhase::Start => f.write_str("start"),
            HookPhase::End => f.write_str("end"),
        }
    }
}

/// Error type produced while building rule trees or driving a document.
#[derive(Debug, Error)]
pub enum MapError {
    /// The rule tree itself is unusable.
    #[error("configuration: {0}")]
    Config(String),
    /// A branch context rejected an insertion made on behalf of an element.
    #[error("configuration error in <{element}>: {source}")]
    Branch {
        element: String,
        #[source]
        source: BranchError,
    },
    /// A start or end hook returned an error.
    #[error("{phase} hook of <{element}> failed: {source}")]
    Hook {
        element: String,
        phase: HookPhase,
        #[source]
        source: BoxError,
    },
    /// An attribute mapping function returned an error.
    #[error("mapping attributes {attributes:?} of <{element}> failed: {source}")]
    Attribute {
        element: String,
        attributes: Vec<String>,
        #[source]
        source: BoxError,
    },
    /// A text mapping function returned an error.
    #[error("mapping text of <{element}> failed: {source}")]
    Text {
        element: String,
        #[source]
        source: BoxError,
    },
}

impl MapError {
    /// Wrap a hook failure, surfacing branch misuse as a configuration error.
    pub(crate) fn hook(element: &str, phase: HookPhase, err: BoxError) -> Self {
        match err.downcast::<BranchError>() {
            Ok(branch) => MapError::Branch {
                element: element.to_string(),
                source: *branch,
            },
            Err(source) => MapError::Hook {
                element: element.to_string(),
                phase,
                source,
            },
        }
    }

    /// Whether the error stems from a misconfigured rule tree rather than from
    /// the data being mapped.
    pub fn is_configuration(&self) -> bool {
        matches!(self, MapError::Config(_) | MapError::Branch { .. })
    }
}
