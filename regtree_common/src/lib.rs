//! regtree common library
//!
//! Shared building blocks for the regtree workspace crates.
//!
//! # Module Structure
//!
//! - [`model`] - Type codecs between dynamic values, register bytes and display strings
//! - [`transaction`] - Memory transactions with a single terminal state
//! - [`config`] - Configuration loading traits and types
//! - [`tree_config`] - Server TOML layout: endpoints, memory transport, node tree
//! - [`consts`] - Workspace-wide constants
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use regtree_common::prelude::*;
//!
//! let txn = Transaction::new(0x1000, TransactionKind::Write, 4);
//! txn.done();
//! assert!(txn.wait().is_ok());
//! ```

#![deny(missing_docs)]

pub mod config;
pub mod consts;
pub mod model;
pub mod prelude;
pub mod transaction;
pub mod tree_config;

pub use model::Value;
