//! Conversation memory (threads, messages, resources) on top of a plain
//! key-value store.
//!
//! Message order within a thread lives in a per-thread order index kept as
//! one JSON blob next to the messages. Index writes go through a per-key
//! [`order::UpdateSerializer`], which is the only serialization this crate
//! provides.

pub mod builder;
pub mod client;
pub mod config;
pub mod error;
pub mod kv;
pub mod models;
pub mod order;
pub mod pagination;
pub mod reconcile;
pub mod repositories;
pub mod trait_client;

pub use builder::MemoryStoreBuilder;
pub use client::MemoryStore;
pub use config::StoreConfig;
pub use error::{ErrorCategory, ErrorContext, MemoryError, Result, ERROR_DOMAIN};
pub use kv::{KeyInfo, KvAdapter, KvError, MemoryKv, Table};
#[cfg(feature = "mongodb")]
pub use kv::MongoKv;
pub use models::{
    DateRange, IncludeRequest, ListMessagesQuery, ListThreadsQuery, Message, MessageContent,
    MessageContentUpdate, MessageFilter, MessagePage, MessageRole, MessageUpdate, Metadata,
    PerPage, Resource, SortDirection, Thread, ThreadOrderBy, ThreadOrderField, ThreadPage,
};
pub use order::{OrderEntry, OrderIndex, OrderSnapshot, UpdateSerializer};
pub use pagination::MessageListing;
pub use reconcile::{ReconcileReport, Reconciler};
pub use repositories::{MessageLocator, MessageRepository, ResourceRepository, ThreadRepository};
pub use trait_client::MemoryStorage;
