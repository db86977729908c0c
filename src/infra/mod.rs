//! Infrastructure layer implementations.

pub mod banks;
pub mod cache;
pub mod database;
pub mod gateway;

pub use cache::NoopCacheInvalidator;
pub use database::{PostgresConfig, PostgresStore};
pub use gateway::{FlutterwaveClient, PaystackClient};
