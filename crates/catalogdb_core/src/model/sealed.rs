//! Read-only entities and the content they were fetched with.

use crate::error::{CoreError, CoreResult};
use crate::model::builder::EntityBuilder;
use crate::model::entity::Entity;
use crate::model::price::{Price, PriceInnerRecordHandling};
use crate::model::reference::Reference;
use crate::model::value::AttributeValue;
use crate::pricing::compute_selling_price;
use crate::types::PrimaryKey;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Which associated data to fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum AssociatedDataRequirement {
    /// None.
    #[default]
    None,
    /// Every key.
    All,
    /// Only these keys.
    Named(BTreeSet<String>),
}

impl AssociatedDataRequirement {
    /// Returns whether `name` is fetched.
    #[must_use]
    pub fn covers_key(&self, name: &str) -> bool {
        match self {
            Self::None => false,
            Self::All => true,
            Self::Named(names) => names.contains(name),
        }
    }

    fn covers(&self, other: &Self) -> bool {
        match (self, other) {
            (_, Self::None) | (Self::All, _) => true,
            (Self::Named(mine), Self::Named(theirs)) => theirs.is_subset(mine),
            _ => false,
        }
    }

    fn union(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::All, _) | (_, Self::All) => Self::All,
            (Self::None, x) | (x, Self::None) => x.clone(),
            (Self::Named(a), Self::Named(b)) => Self::Named(a.union(b).cloned().collect()),
        }
    }

    fn intersect(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::None, _) | (_, Self::None) => Self::None,
            (Self::All, x) | (x, Self::All) => x.clone(),
            (Self::Named(a), Self::Named(b)) => Self::Named(a.intersection(b).cloned().collect()),
        }
    }
}

/// The sections of an entity a read fetches. The body is always fetched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct EntityContentRequirements {
    /// Fetch attributes.
    pub attributes: bool,
    /// Associated data to fetch.
    pub associated_data: AssociatedDataRequirement,
    /// Fetch prices.
    pub prices: bool,
    /// Fetch references.
    pub references: bool,
}

impl EntityContentRequirements {
    /// Only the entity body.
    #[must_use]
    pub fn body_only() -> Self {
        Self::default()
    }

    /// Every section.
    #[must_use]
    pub fn all() -> Self {
        Self {
            attributes: true,
            associated_data: AssociatedDataRequirement::All,
            prices: true,
            references: true,
        }
    }

    /// Adds attributes.
    #[must_use]
    pub fn with_attributes(mut self) -> Self {
        self.attributes = true;
        self
    }

    /// Adds prices.
    #[must_use]
    pub fn with_prices(mut self) -> Self {
        self.prices = true;
        self
    }

    /// Adds references.
    #[must_use]
    pub fn with_references(mut self) -> Self {
        self.references = true;
        self
    }

    /// Adds the named associated data.
    #[must_use]
    pub fn with_associated_data<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let named = AssociatedDataRequirement::Named(names.into_iter().map(Into::into).collect());
        self.associated_data = self.associated_data.union(&named);
        self
    }

    /// Adds every associated data key.
    #[must_use]
    pub fn with_all_associated_data(mut self) -> Self {
        self.associated_data = AssociatedDataRequirement::All;
        self
    }

    /// Returns whether everything `other` asks for is included.
    #[must_use]
    pub fn covers(&self, other: &Self) -> bool {
        (self.attributes || !other.attributes)
            && (self.prices || !other.prices)
            && (self.references || !other.references)
            && self.associated_data.covers(&other.associated_data)
    }

    /// Sections in either requirement.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            attributes: self.attributes || other.attributes,
            associated_data: self.associated_data.union(&other.associated_data),
            prices: self.prices || other.prices,
            references: self.references || other.references,
        }
    }

    /// Sections in both requirements.
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Self {
        Self {
            attributes: self.attributes && other.attributes,
            associated_data: self.associated_data.intersect(&other.associated_data),
            prices: self.prices && other.prices,
            references: self.references && other.references,
        }
    }
}

/// Lightweight handle to a stored entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityReference {
    /// Entity type.
    pub entity_type: String,
    /// Primary key.
    pub primary_key: PrimaryKey,
}

impl fmt::Display for EntityReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.primary_key)
    }
}

/// An immutable entity together with the sections it was fetched with.
///
/// Reading a section that was not fetched is a `ContentNotFetched` error,
/// which is distinct from the section being empty.
#[derive(Debug, Clone)]
pub struct SealedEntity {
    entity: Arc<Entity>,
    requirements: EntityContentRequirements,
}

impl SealedEntity {
    pub(crate) fn new(entity: Arc<Entity>, requirements: EntityContentRequirements) -> Self {
        Self {
            entity,
            requirements,
        }
    }

    pub(crate) fn entity(&self) -> &Arc<Entity> {
        &self.entity
    }

    /// Hides sections outside `requirements` without refetching.
    #[must_use]
    pub fn limit(&self, requirements: &EntityContentRequirements) -> Self {
        Self {
            entity: Arc::clone(&self.entity),
            requirements: self.requirements.intersect(requirements),
        }
    }

    /// The sections this entity was fetched with.
    #[must_use]
    pub fn requirements(&self) -> &EntityContentRequirements {
        &self.requirements
    }

    /// Entity type.
    #[must_use]
    pub fn entity_type(&self) -> &str {
        self.entity.entity_type()
    }

    /// Primary key.
    #[must_use]
    pub fn primary_key(&self) -> PrimaryKey {
        self.entity.primary_key()
    }

    /// Body version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.entity.version()
    }

    /// Hierarchical parent.
    #[must_use]
    pub fn parent(&self) -> Option<PrimaryKey> {
        self.entity.parent()
    }

    /// Lightweight reference to this entity.
    #[must_use]
    pub fn reference(&self) -> EntityReference {
        EntityReference {
            entity_type: self.entity_type().to_owned(),
            primary_key: self.primary_key(),
        }
    }

    fn ensure(&self, fetched: bool, section: &'static str) -> CoreResult<()> {
        if fetched {
            Ok(())
        } else {
            Err(CoreError::ContentNotFetched { section })
        }
    }

    /// Live attribute value.
    ///
    /// # Errors
    ///
    /// `ContentNotFetched` unless attributes were fetched.
    pub fn attribute(&self, name: &str) -> CoreResult<Option<&AttributeValue>> {
        self.ensure(self.requirements.attributes, "attributes")?;
        Ok(self.entity.attribute(name))
    }

    /// Live attributes.
    ///
    /// # Errors
    ///
    /// `ContentNotFetched` unless attributes were fetched.
    pub fn attributes(&self) -> CoreResult<impl Iterator<Item = (&str, &AttributeValue)>> {
        self.ensure(self.requirements.attributes, "attributes")?;
        Ok(self.entity.attributes())
    }

    /// Live associated data value.
    ///
    /// # Errors
    ///
    /// `ContentNotFetched` unless `name` was fetched.
    pub fn associated_data(&self, name: &str) -> CoreResult<Option<&AttributeValue>> {
        self.ensure(
            self.requirements.associated_data.covers_key(name),
            "associated data",
        )?;
        Ok(self.entity.associated_data(name))
    }

    /// All stored prices, dropped and non-sellable included.
    ///
    /// # Errors
    ///
    /// `ContentNotFetched` unless prices were fetched.
    pub fn prices(&self) -> CoreResult<impl Iterator<Item = &Price>> {
        self.ensure(self.requirements.prices, "prices")?;
        Ok(self.entity.prices())
    }

    /// Price inner record handling.
    ///
    /// # Errors
    ///
    /// `ContentNotFetched` unless prices were fetched.
    pub fn price_inner_record_handling(&self) -> CoreResult<PriceInnerRecordHandling> {
        self.ensure(self.requirements.prices, "prices")?;
        Ok(self.entity.price_inner_record_handling())
    }

    /// Live references.
    ///
    /// # Errors
    ///
    /// `ContentNotFetched` unless references were fetched.
    pub fn references(&self) -> CoreResult<impl Iterator<Item = &Reference>> {
        self.ensure(self.requirements.references, "references")?;
        Ok(self.entity.references())
    }

    /// Resolves the selling price using the entity's inner record handling.
    ///
    /// # Errors
    ///
    /// `ContentNotFetched` unless prices were fetched, and `Consistency` on
    /// a `Sum` over mixed tax rates.
    pub fn selling_price(
        &self,
        currency: &str,
        at: Option<DateTime<Utc>>,
        price_lists: &[&str],
    ) -> CoreResult<Option<Price>> {
        let handling = self.price_inner_record_handling()?;
        compute_selling_price(self.entity.prices(), handling, currency, at, price_lists, |_| true)
    }

    /// Opens the entity for editing.
    #[must_use]
    pub fn open_for_write(&self) -> EntityBuilder {
        EntityBuilder::from_entity(Arc::clone(&self.entity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::mutation::LocalMutation;

    fn create_sealed(requirements: EntityContentRequirements) -> SealedEntity {
        let mut entity = Entity::new("product", 1);
        entity
            .apply(&LocalMutation::upsert_attribute("code", "phone"))
            .unwrap();
        entity
            .apply(&LocalMutation::UpsertAssociatedData {
                name: "manual".into(),
                value: "pdf".into(),
                expected_version: None,
            })
            .unwrap();
        SealedEntity::new(Arc::new(entity), requirements)
    }

    #[test]
    fn unfetched_sections_are_reported() {
        let sealed = create_sealed(EntityContentRequirements::body_only());
        assert!(matches!(
            sealed.attribute("code"),
            Err(CoreError::ContentNotFetched {
                section: "attributes"
            })
        ));
        assert!(sealed.prices().is_err());
        assert_eq!(sealed.primary_key(), 1);
    }

    #[test]
    fn missing_is_not_unfetched() {
        let sealed = create_sealed(EntityContentRequirements::all());
        assert_eq!(sealed.attribute("ean").unwrap(), None);
        assert_eq!(
            sealed.attribute("code").unwrap(),
            Some(&AttributeValue::from("phone"))
        );
    }

    #[test]
    fn limit_hides_without_refetch() {
        let sealed = create_sealed(EntityContentRequirements::all());
        let limited = sealed.limit(&EntityContentRequirements::body_only().with_associated_data(["manual"]));
        assert!(limited.attribute("code").is_err());
        assert!(limited.associated_data("manual").unwrap().is_some());
        assert!(Arc::ptr_eq(limited.entity(), sealed.entity()));
    }

    #[test]
    fn requirement_algebra() {
        let attributes = EntityContentRequirements::body_only().with_attributes();
        let manual = EntityContentRequirements::body_only().with_associated_data(["manual"]);
        let both = attributes.union(&manual);
        assert!(both.covers(&attributes));
        assert!(both.covers(&manual));
        assert!(!attributes.covers(&manual));
        assert!(EntityContentRequirements::all().covers(&both));
        assert_eq!(both.intersect(&attributes), attributes);
    }
}
