//! Error types for the Veldt environment model, organized by subsystem:
//! kernel (attach, lookup, relations, update), operator hooks, event
//! handlers, and storage.

use std::error::Error;
use std::fmt;
use std::io;

use crate::id::ItemId;

/// Errors from the environment kernel.
///
/// Every kernel mutator checks its preconditions before touching state, so
/// a returned error means the environment is unchanged.
#[derive(Debug)]
pub enum EnvError {
    /// Attach would create a colliding id.
    DuplicateId {
        /// The id that already exists.
        id: ItemId,
    },
    /// The operation requires an attached item.
    Unattached {
        /// The requested or assigned id of the item.
        id: String,
    },
    /// The operation mixes items owned by different environments.
    CrossEnvironment {
        /// The foreign item.
        id: String,
    },
    /// An id or typed lookup has no match.
    NotFound {
        /// What was looked up.
        what: String,
    },
    /// A singleton-typed lookup matched more than one item.
    AmbiguousLookup {
        /// The type that was searched for.
        type_name: &'static str,
    },
    /// A metadata read used a different type than the write.
    MetadataTypeMismatch {
        /// The metadata key.
        key: String,
        /// The type the reader asked for.
        expected: &'static str,
        /// The type the value actually has.
        found: &'static str,
    },
    /// Adding the edge would exceed the operator's declared arity.
    ArityExceeded {
        /// The operator.
        operator: ItemId,
        /// The declared bound.
        arity: usize,
    },
    /// The layer is already the output of another operator.
    AlreadyGenerated {
        /// The contested layer.
        layer: ItemId,
        /// The operator that already generates it.
        operator: ItemId,
    },
    /// The mutation is refused because the layer is immutable.
    ImmutableLayer {
        /// The immutable layer.
        layer: ItemId,
    },
    /// Linking would create a cycle in the frame tree or layer graph.
    WouldCycle {
        /// The intended parent.
        parent: ItemId,
        /// The intended child.
        child: ItemId,
    },
    /// Update propagation found operators on a dependency cycle.
    ///
    /// The acyclic part of the graph has been processed; the listed
    /// operators were left untouched.
    OperatorCycle {
        /// The operators on the cycle, in id order.
        operators: Vec<ItemId>,
    },
    /// An operator's update hook failed.
    OperatorFailed {
        /// The failing operator.
        operator: ItemId,
        /// The underlying hook error.
        reason: OperatorError,
    },
}

impl fmt::Display for EnvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateId { id } => write!(f, "id '{id}' already exists"),
            Self::Unattached { id } => write!(f, "item '{id}' is not attached"),
            Self::CrossEnvironment { id } => {
                write!(f, "item '{id}' belongs to a different environment")
            }
            Self::NotFound { what } => write!(f, "{what} not found"),
            Self::AmbiguousLookup { type_name } => {
                write!(f, "more than one item of type {type_name}")
            }
            Self::MetadataTypeMismatch {
                key,
                expected,
                found,
            } => write!(
                f,
                "metadata '{key}' holds {found}, not the requested {expected}"
            ),
            Self::ArityExceeded { operator, arity } => {
                write!(f, "operator '{operator}' is bounded to {arity} edge(s)")
            }
            Self::AlreadyGenerated { layer, operator } => {
                write!(f, "layer '{layer}' is already generated by '{operator}'")
            }
            Self::ImmutableLayer { layer } => write!(f, "layer '{layer}' is immutable"),
            Self::WouldCycle { parent, child } => {
                write!(f, "linking '{child}' under '{parent}' would create a cycle")
            }
            Self::OperatorCycle { operators } => {
                write!(f, "operator dependency cycle: ")?;
                for (i, op) in operators.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "'{op}'")?;
                }
                Ok(())
            }
            Self::OperatorFailed { operator, reason } => {
                write!(f, "operator '{operator}' failed: {reason}")
            }
        }
    }
}

impl Error for EnvError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::OperatorFailed { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

/// Errors from individual operator update hooks.
///
/// Returned by [`Operator::update`](crate::operator::Operator::update) and
/// wrapped in [`EnvError::OperatorFailed`] by `update_all`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OperatorError {
    /// The hook itself failed.
    ExecutionFailed {
        /// Human-readable description of the failure.
        reason: String,
    },
    /// An input the hook needs is missing or of the wrong kind.
    MissingInput {
        /// What was expected.
        detail: String,
    },
    /// An output the hook needs is missing or of the wrong kind.
    MissingOutput {
        /// What was expected.
        detail: String,
    },
}

impl fmt::Display for OperatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExecutionFailed { reason } => write!(f, "execution failed: {reason}"),
            Self::MissingInput { detail } => write!(f, "missing input: {detail}"),
            Self::MissingOutput { detail } => write!(f, "missing output: {detail}"),
        }
    }
}

impl Error for OperatorError {}

/// Error returned by an event handler.
///
/// Handler failures never abort delivery: the environment logs them and
/// carries on with the remaining handlers, and the mutation that triggered
/// the event still commits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandlerError {
    /// Human-readable description of the failure.
    pub reason: String,
}

impl HandlerError {
    /// Build a handler error from any displayable reason.
    pub fn new(reason: impl fmt::Display) -> Self {
        Self {
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler failed: {}", self.reason)
    }
}

impl Error for HandlerError {}

/// Errors from serialization and the event-stream codec.
#[derive(Debug)]
pub enum StorageError {
    /// An I/O error occurred during read or write.
    Io(io::Error),
    /// Deserialization encountered an unregistered class tag.
    UnknownClass {
        /// The unregistered tag.
        tag: String,
    },
    /// A manifest line could not be parsed.
    MalformedManifest {
        /// 1-based line number.
        line: usize,
        /// What went wrong.
        detail: String,
    },
    /// An item record lacks an attribute its factory requires.
    MissingAttribute {
        /// The missing key.
        key: String,
    },
    /// An attribute value could not be parsed.
    MalformedAttribute {
        /// The attribute key.
        key: String,
        /// What went wrong.
        detail: String,
    },
    /// An event frame could not be decoded (truncated or corrupt data).
    MalformedEvent {
        /// What went wrong.
        detail: String,
    },
    /// Replaying the manifest or event stream through the kernel failed.
    Env(EnvError),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::UnknownClass { tag } => write!(f, "unknown class tag '{tag}'"),
            Self::MalformedManifest { line, detail } => {
                write!(f, "malformed manifest at line {line}: {detail}")
            }
            Self::MissingAttribute { key } => write!(f, "missing attribute '{key}'"),
            Self::MalformedAttribute { key, detail } => {
                write!(f, "malformed attribute '{key}': {detail}")
            }
            Self::MalformedEvent { detail } => write!(f, "malformed event: {detail}"),
            Self::Env(e) => write!(f, "environment rejected replay: {e}"),
        }
    }
}

impl Error for StorageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Env(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<EnvError> for StorageError {
    fn from(e: EnvError) -> Self {
        Self::Env(e)
    }
}
