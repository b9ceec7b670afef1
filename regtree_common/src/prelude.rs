//! Prelude module for common re-exports.
//!
//! ```rust
//! use regtree_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, LogLevel, SharedConfig};

// ─── Values & codecs ────────────────────────────────────────────────
pub use crate::model::{DisplayFormat, Mode, Model, ModelError, ModelKind, Value};

// ─── Transactions ───────────────────────────────────────────────────
pub use crate::transaction::{
    Transaction, TransactionError, TransactionKind, TransactionState,
};

// ─── Constants ──────────────────────────────────────────────────────
pub use crate::consts::{PATH_SEPARATOR, ROOT_PATH_SENTINEL, SLEEP_STEP_KEY};
