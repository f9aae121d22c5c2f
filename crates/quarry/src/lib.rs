//! # quarry
//!
//! Logical dump, load and copy engine for MySQL-compatible servers.
//!
//! ## Features
//!
//! - **Consistent dumps**: one snapshot shared by every worker session, taken
//!   under a brief global read lock or a per-table lock fallback
//! - **Parallel chunking**: tables are split into ranges by their index and
//!   written as independent, optionally compressed data files
//! - **Resumable loads**: a progress ledger records every finished unit so an
//!   interrupted load picks up where it stopped
//! - **Streaming copy**: dump and load run together over a bounded in-memory
//!   store
//! - **Compatibility**: DDL rewrites for managed targets and an upgrade check
//!   against the target version
//!
//! ## Example
//!
//! ```rust,ignore
//! use quarry::prelude::*;
//!
//! let storage = open_location("/backups/world", &StorageOptions::default())?;
//! let summary = dump_schemas(source, storage, vec!["world".into()], DumpOptions::default(), Console::stdout()).await?;
//! println!("{} rows dumped", summary.rows);
//! ```

pub mod catalog;
pub mod checksum;
pub mod chunker;
pub mod compat;
pub mod console;
pub mod coordinator;
pub mod copy;
pub mod dialect;
pub mod dump;
pub mod error;
pub mod filter;
pub mod ident;
pub mod layout;
pub mod ledger;
pub mod load;
pub mod options;
pub mod rate_limiter;
pub mod script;
pub mod version;

pub use console::Console;
pub use copy::{copy_instance, copy_schemas, copy_tables, CopySummary};
pub use dump::{dump_instance, dump_schemas, dump_tables, DumpSummary, Dumper};
pub use error::{Error, Result};
pub use load::{load_dump, LoadSummary, Loader};
pub use options::{CopyOptions, DumpOptions, DumpScope, LoadOptions};
pub use version::Version;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::console::Console;
    pub use crate::copy::{copy_instance, copy_schemas, copy_tables, CopySummary};
    pub use crate::dump::{dump_instance, dump_schemas, dump_tables, DumpSummary};
    pub use crate::error::{Error, Result};
    pub use crate::filter::FilterOptions;
    pub use crate::load::{load_dump, LoadSummary};
    pub use crate::options::{CopyOptions, DumpOptions, LoadOptions};
    pub use quarry_session::SessionFactory;
    pub use quarry_storage::{open_location, Storage, StorageOptions};
}
