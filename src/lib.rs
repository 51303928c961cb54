//! Convergent Edit: promise-driven, idempotent editing of line-oriented files
//!
//! A file is loaded into an in-memory [`Document`], a bundle of edit
//! promises (deletions, field edits, insertions, replacements) is applied to
//! it, and the result is written back only if it differs from what is on
//! disk. Every operator converges: applying the same bundle twice leaves the
//! file unchanged the second time.
//!
//! # Architecture
//!
//! - [`document`]: generational line list with stable line handles
//! - [`region`], [`chunk`], [`whitespace`], [`selector`]: matching primitives
//! - [`ops`]: the four edit operators
//! - [`session`]: load, multi-pass apply, compare, save
//! - [`config`]: TOML edit bundles
//! - [`lock`], [`io`], [`expand`]: collaborators for locking, file I/O and
//!   variable expansion
//!
//! # Safety
//!
//! - Relative paths are rejected
//! - Atomic file writes (tempfile + fsync + rename), optional backups
//! - Size limit enforced before reading
//! - Replacements whose text matches their own pattern are refused
//!
//! # Example
//!
//! ```no_run
//! use convergent_edit::{load_from_str, AnchorRegistry, EditSession, MemoryLocks};
//! use std::path::Path;
//!
//! let bundle = load_from_str(r#"
//! [[replace_patterns]]
//! promiser = "^PermitRootLogin yes$"
//! replace_with = "PermitRootLogin no"
//! "#)?;
//!
//! let path = Path::new("/etc/ssh/sshd_config");
//! let mut session = EditSession::load(path, &bundle.edit_defaults.load_options())?;
//! let report = session.apply(&bundle, &mut MemoryLocks::new(), &mut AnchorRegistry::new())?;
//! println!("{} edits", report.edits);
//! let _ = session.finish(false)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod chunk;
pub mod config;
pub mod document;
pub mod expand;
pub mod io;
pub mod lock;
pub mod ops;
pub mod pattern;
pub mod region;
pub mod selector;
pub mod session;
pub mod whitespace;

// Re-exports
pub use config::{load_from_path, load_from_str, ConfigError, EditBundle, ValidationError};
pub use document::{Document, LineId};
pub use expand::{Context, Snapshot};
pub use io::{BackupPolicy, IoError, LoadOptions, NewlineMode};
pub use lock::{LockDb, LockError, LockKey, LockManager, LockPolicy, MemoryLocks};
pub use ops::{EditError, EditReport, OpContext};
pub use pattern::PatternError;
pub use region::{select_region, Region, RegionError, RegionSpec};
pub use session::{
    AnchorRegistry, BundleReport, Category, EditSession, PromiseOutcome, PromiseRecord,
    SessionError, SessionOutcome, SessionState,
};
pub use whitespace::{PolicySet, WhitespacePolicy};
