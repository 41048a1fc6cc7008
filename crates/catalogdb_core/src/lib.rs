//! # CatalogDB Core
//!
//! Transactional engine of CatalogDB, an embeddable store for e-commerce
//! catalogs.
//!
//! This crate provides:
//! - Copy-on-write versioned structures ([`VersionedMap`], [`LayerDelta`])
//! - The entity model with versioned, droppable attributes, associated
//!   data, prices and references
//! - Selling price resolution ([`compute_selling_price`])
//! - Entity collections with a global index and one reduced index per
//!   referenced entity
//! - Immutable [`Catalog`] snapshots published by committing
//!   [`Transaction`]s
//! - The [`Database`] / [`Session`] facade
//!
//! ## Lifecycle
//!
//! A new catalog is WARMING_UP: writes are buffered in memory and persisted
//! in bulk by [`Session::flush`]. [`Session::go_live`] switches it to
//! ALIVE, after which every commit is durable before it becomes visible.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod catalog;
mod collection;
mod config;
mod database;
mod dir;
mod error;
mod index;
mod layer;
mod model;
mod pricing;
mod schema;
mod sequence;
mod session;
mod transaction;
mod types;

pub use cache::{CacheKey, CacheSupervisor, LruCacheSupervisor, NoCacheSupervisor};
pub use catalog::{Catalog, CatalogHeader, CatalogPublisher, FORMAT_VERSION, HEADER_FILE};
pub use collection::{CollectionHeader, EntityCollection};
pub use config::Config;
pub use database::Database;
pub use dir::CatalogDir;
pub use error::{CoreError, CoreResult};
pub use index::{
    AttributeIndex, EntityIndex, EntityIndexKey, GlobalEntityIndex, HierarchyIndex, IndexLookup,
    IndexMaintainer, IndexedPrice, PriceSuperIndex, ReducedEntityIndex,
};
pub use layer::{LayerDelta, Versioned, VersionedCell, VersionedMap};
pub use model::{
    AssociatedDataRecord, AssociatedDataRequirement, AttributeRecord, AttributeType,
    AttributeValue, DateTimeRange, Droppable, Entity, EntityBuilder, EntityContentRequirements,
    EntityExistence, EntityMutation, EntityReference, LocalMutation, Price,
    PriceInnerRecordHandling, PriceKey, PriceValue, Reference, ReferenceGroup, ReferenceKey,
    SealedEntity,
};
pub use pricing::compute_selling_price;
pub use schema::{AttributeSchema, EntitySchema, EvolutionMode, ReferenceSchema};
pub use session::Session;
pub use transaction::{CommitOutcome, PendingWrites, Transaction, TransactionState};
pub use types::{CatalogState, CollectionId, IndexId, PrimaryKey, TransactionId};

/// Version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
