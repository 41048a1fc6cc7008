//! The entity data model.
//!
//! - [`Entity`] with versioned, droppable units
//! - [`LocalMutation`] / [`EntityMutation`] describing changes
//! - [`EntityBuilder`] producing minimal mutations
//! - [`SealedEntity`] exposing only the fetched sections

mod builder;
mod entity;
mod mutation;
mod price;
mod reference;
mod sealed;
mod value;

pub use builder::EntityBuilder;
pub(crate) use entity::AppliedChange;
pub use entity::{AssociatedDataRecord, AttributeRecord, Droppable, Entity};
pub use mutation::{EntityExistence, EntityMutation, LocalMutation};
pub use price::{DateTimeRange, Price, PriceInnerRecordHandling, PriceKey, PriceValue};
pub use reference::{Reference, ReferenceGroup, ReferenceKey};
pub use sealed::{
    AssociatedDataRequirement, EntityContentRequirements, EntityReference, SealedEntity,
};
pub use value::{AttributeType, AttributeValue};
