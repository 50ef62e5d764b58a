#[cfg(any(feature = "redb", feature = "sled"))]
mod shared;

#[cfg(feature = "redb")]
pub mod redb_store;

#[cfg(feature = "sled")]
pub mod sled_store;

#[cfg(feature = "sqlite")]
pub mod sqlite_store;
