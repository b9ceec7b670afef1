//! Node-level error type.

use crate::block::BlockError;
use regtree_common::model::ModelError;
use thiserror::Error;

/// Errors raised by tree operations.
#[derive(Debug, Clone, Error)]
pub enum NodeError {
    /// No node at this path.
    #[error("no node at '{0}'")]
    NotFound(String),

    /// Sibling with the same name exists.
    #[error("'{parent}' already has a child named '{name}'")]
    Duplicate {
        /// Parent path
        parent: String,
        /// Rejected name
        name: String,
    },

    /// Write to a read-only node.
    #[error("'{0}' is read-only")]
    ReadOnly(String),

    /// Read of a write-only node.
    #[error("'{0}' is write-only")]
    WriteOnly(String),

    /// Owning device has been dropped.
    #[error("'{0}' is no longer attached to a device")]
    Detached(String),

    /// Register access requested on a device without a memory block.
    #[error("'{0}' has no memory block")]
    NoMemory(String),

    /// Operation not supported by the node class.
    #[error("'{path}' is a {class}, expected a {expected}")]
    WrongKind {
        /// Node path
        path: String,
        /// Actual class
        class: &'static str,
        /// Class the operation needs
        expected: &'static str,
    },

    /// Required argument absent.
    #[error("missing argument '{0}'")]
    MissingArgument(&'static str),

    /// Argument has the wrong shape.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Value conversion failed.
    #[error("{path}: {source}")]
    Model {
        /// Node path
        path: String,
        /// Codec error
        source: ModelError,
    },

    /// Memory pipeline failure.
    #[error("{path}: {source}")]
    Block {
        /// Node path
        path: String,
        /// Block error
        source: BlockError,
    },

    /// Configuration text could not be parsed or applied.
    #[error("configuration: {0}")]
    ConfigText(String),
}
