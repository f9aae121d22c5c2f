//! # quarry-storage
//!
//! Storage layer for quarry dumps.
//!
//! ## Features
//!
//! - **Uniform object access**: one [`Storage`] trait over the local filesystem,
//!   S3, OCI Object Storage, Azure Blob Storage, OCI pre-authenticated requests
//!   and memory
//! - **Atomic writes**: objects are written under a `.dumping` name and published
//!   on finish, so readers never observe partial files
//! - **Retries**: transient remote failures are retried with linear then
//!   exponential back-off
//! - **Compression**: streaming `gzip` and `zstd` codecs with configurable level
//!
//! ## Example
//!
//! ```rust,ignore
//! use quarry_storage::{open_location, StorageOptions};
//!
//! let storage = open_location("s3://backups/world", &StorageOptions::default())?;
//! storage.write_all("@.json", b"{}").await?;
//! ```

pub mod compression;
pub mod credentials;
pub mod error;
pub mod local;
pub mod location;
pub mod memory;
pub mod remote;
pub mod retry;
pub mod storage;

pub use compression::{Compression, CompressedWriter, DecompressingReader};
pub use error::{Error, ErrorCategory, Result};
pub use local::LocalStorage;
pub use location::{Location, ParKind, ParUrl, StorageOptions};
pub use memory::MemoryStorage;
pub use remote::RemoteStorage;
pub use retry::RetryPolicy;
pub use storage::{ObjectInfo, ReadStream, Storage, WriteStream, DUMPING_SUFFIX};

use std::sync::Arc;

/// Open the storage for a location string
pub fn open_location(location: &str, options: &StorageOptions) -> Result<Arc<dyn Storage>> {
    open(&Location::parse(location)?, options)
}

/// Open the storage for a parsed location
pub fn open(location: &Location, options: &StorageOptions) -> Result<Arc<dyn Storage>> {
    match location {
        Location::Local { path } => Ok(Arc::new(LocalStorage::new(path.clone()))),
        #[cfg(feature = "s3")]
        Location::S3 { bucket, prefix } => Ok(Arc::new(RemoteStorage::s3(bucket, prefix, options)?)),
        #[cfg(feature = "s3")]
        Location::Oci { bucket, prefix } => {
            Ok(Arc::new(RemoteStorage::oci(bucket, prefix, options)?))
        }
        #[cfg(feature = "azure")]
        Location::Azure { container, prefix } => {
            Ok(Arc::new(RemoteStorage::azure(container, prefix, options)?))
        }
        #[cfg(feature = "par")]
        Location::Par(par) => Ok(Arc::new(RemoteStorage::par(par.clone())?)),
        #[allow(unreachable_patterns)]
        other => {
            let _ = options;
            Err(Error::config(format!(
                "Support for '{}' is not enabled in this build",
                other
            )))
        }
    }
}

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::compression::Compression;
    pub use crate::error::{Error as StorageError, Result as StorageResult};
    pub use crate::storage::{ObjectInfo, ReadStream, Storage, WriteStream};
    pub use crate::{open_location, LocalStorage, MemoryStorage, StorageOptions};
}
