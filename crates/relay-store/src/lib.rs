//! # relay-store
//!
//! Persistence for channels and messages.
//!
//! The relay only depends on the [`MessageStore`] contract; two backends
//! implement it:
//!
//! - [`MemoryStore`] - process-local maps, used for tests and single-node
//!   deployments without a database
//! - [`PgMessageStore`] - PostgreSQL via SQLx
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relay_store::{MessageStore, NewMessage, PgMessageStore, PgStoreConfig};
//!
//! async fn example() -> Result<(), relay_store::StoreError> {
//!     let config = PgStoreConfig {
//!         url: "postgresql://localhost/relay".to_string(),
//!         ..PgStoreConfig::default()
//!     };
//!     let store = PgMessageStore::connect(&config).await?;
//!     store.ensure_schema().await?;
//!
//!     let channel = store.create_channel("room1", "u1", None).await?;
//!     let message = store
//!         .create_message(NewMessage::new(&channel.channel_name, "hi", "u1"))
//!         .await?;
//!     let record = store.get_message_enriched(message.id).await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use models::{Channel, Message, NewMessage};
pub use postgres::{PgMessageStore, PgStoreConfig};
pub use store::MessageStore;
