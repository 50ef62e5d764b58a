//! # Bucket Store
//!
//! One asynchronous key-value contract over interchangeable embedded storage
//! backends. Pick a backend by name at runtime, open a namespace, and use the
//! same `get`/`set`/`remove`/`each` operations whichever engine sits beneath.
//!
//! ## Features
//!
//! - **Interchangeable backends**: redb, sled and SQLite behind one trait
//! - **Atomic units of work**: multi-key writes commit entirely or not at all
//! - **Schema versions**: a namespace opened at a new version starts empty
//! - **One error taxonomy**: every backend failure maps onto five kinds
//! - **Runtime selection**: a registry probes which backends can run here
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bucket_store::prelude::*;
//! use serde_json::json;
//!
//! # async fn demo() -> BucketResult<()> {
//! let config = BucketConfig::builder()
//!     .db_name("app")
//!     .table_name("profiles")
//!     .location(StorageLocation::Directory("./data".into()))
//!     .build();
//!
//! let registry = DriverRegistry::global();
//! let driver = registry.create_preferred(["sqlite", "redb", "sled"], &config)?;
//! driver.init().await?;
//!
//! driver.set_many([("ada", json!({"lang": "en"})), ("grace", json!({"lang": "fr"}))]).await?;
//! assert_eq!(driver.get_length().await?, 2);
//!
//! driver.each(|key, value: serde_json::Value| println!("{key}: {value}")).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Cargo features
//!
//! - `redb`, `sled`, `sqlite`: one per backend
//! - `native` (default): all three

pub mod backend;
pub mod codec;
pub mod config;
pub mod databases;
pub mod driver;
pub mod error;
pub mod key;
pub mod lifecycle;
pub mod namespace;
pub mod prelude;
pub mod registry;
pub mod transaction;

pub use config::{BucketConfig, StorageLocation};
pub use driver::Driver;
pub use error::{BucketError, BucketResult, ErrorKind};
pub use key::RecordKey;
pub use registry::DriverRegistry;
