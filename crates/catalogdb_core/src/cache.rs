//! Entity cache supervisors.
//!
//! Reads of whole entities go through a [`CacheSupervisor`]. The key
//! carries the collection version, so a cached entity is only ever served
//! to readers of the snapshot it was loaded from.

use crate::error::CoreResult;
use crate::model::{EntityContentRequirements, SealedEntity};
use crate::types::{CollectionId, PrimaryKey};
use lru::LruCache;
use parking_lot::Mutex;
use std::fmt;
use std::num::NonZeroUsize;

/// Identity of a cached entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Storage id of the collection.
    pub collection_id: CollectionId,
    /// Entity type.
    pub entity_type: String,
    /// Primary key.
    pub primary_key: PrimaryKey,
    /// Collection version the entity was read at.
    pub collection_version: u64,
}

/// Loads an entity with the given content.
pub type Loader<'a> = dyn FnMut(&EntityContentRequirements) -> CoreResult<Option<SealedEntity>> + 'a;
/// Fetches additional content into an entity.
pub type Enricher<'a> =
    dyn FnMut(SealedEntity, &EntityContentRequirements) -> CoreResult<SealedEntity> + 'a;
/// Hides content of an entity.
pub type Limiter<'a> = dyn Fn(&SealedEntity, &EntityContentRequirements) -> SealedEntity + 'a;

/// Decides whether an entity read is served from memory.
///
/// Implementations must be transparent: the result equals what `loader`
/// returns for `requirements`.
pub trait CacheSupervisor: Send + Sync + fmt::Debug {
    /// Returns the entity for `key` with exactly `requirements` fetched.
    ///
    /// # Errors
    ///
    /// Errors from `loader` or `enricher`.
    fn analyse(
        &self,
        key: CacheKey,
        requirements: &EntityContentRequirements,
        loader: &mut Loader<'_>,
        enricher: &mut Enricher<'_>,
        limiter: &Limiter<'_>,
    ) -> CoreResult<Option<SealedEntity>>;

    /// Number of cached entities.
    fn len(&self) -> usize;

    /// Returns true if nothing is cached.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Supervisor that always loads.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCacheSupervisor;

impl CacheSupervisor for NoCacheSupervisor {
    fn analyse(
        &self,
        _key: CacheKey,
        requirements: &EntityContentRequirements,
        loader: &mut Loader<'_>,
        _enricher: &mut Enricher<'_>,
        _limiter: &Limiter<'_>,
    ) -> CoreResult<Option<SealedEntity>> {
        loader(requirements)
    }

    fn len(&self) -> usize {
        0
    }
}

/// Least-recently-used cache of sealed entities.
///
/// A cached entity that lacks requested content is enriched and the richer
/// form replaces it; narrower requests are answered by limiting.
pub struct LruCacheSupervisor {
    entries: Mutex<LruCache<CacheKey, SealedEntity>>,
}

impl LruCacheSupervisor {
    /// Creates a cache holding up to `capacity` entities.
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }
}

impl fmt::Debug for LruCacheSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.lock();
        f.debug_struct("LruCacheSupervisor")
            .field("len", &entries.len())
            .field("capacity", &entries.cap())
            .finish()
    }
}

impl CacheSupervisor for LruCacheSupervisor {
    fn analyse(
        &self,
        key: CacheKey,
        requirements: &EntityContentRequirements,
        loader: &mut Loader<'_>,
        enricher: &mut Enricher<'_>,
        limiter: &Limiter<'_>,
    ) -> CoreResult<Option<SealedEntity>> {
        let cached = self.entries.lock().get(&key).cloned();
        let entity = match cached {
            Some(entity) if entity.requirements().covers(requirements) => {
                return Ok(Some(limiter(&entity, requirements)));
            }
            Some(entity) => {
                let wider = entity.requirements().union(requirements);
                enricher(entity, &wider)?
            }
            None => match loader(requirements)? {
                Some(entity) => entity,
                None => return Ok(None),
            },
        };
        self.entries.lock().put(key, entity.clone());
        Ok(Some(limiter(&entity, requirements)))
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Supervisor for a configured capacity; zero disables caching.
#[must_use]
pub fn supervisor_for(capacity: usize) -> std::sync::Arc<dyn CacheSupervisor> {
    match NonZeroUsize::new(capacity) {
        Some(capacity) => std::sync::Arc::new(LruCacheSupervisor::new(capacity)),
        None => std::sync::Arc::new(NoCacheSupervisor),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Entity, LocalMutation};
    use std::sync::Arc;

    fn create_key(version: u64) -> CacheKey {
        CacheKey {
            collection_id: CollectionId::new(1),
            entity_type: "product".into(),
            primary_key: 1,
            collection_version: version,
        }
    }

    fn create_entity() -> Arc<Entity> {
        let mut entity = Entity::new("product", 1);
        entity
            .apply(&LocalMutation::upsert_attribute("code", "phone"))
            .unwrap();
        Arc::new(entity)
    }

    fn run(
        cache: &dyn CacheSupervisor,
        key: CacheKey,
        requirements: &EntityContentRequirements,
        loads: &mut u32,
        enrichments: &mut u32,
    ) -> SealedEntity {
        let entity = create_entity();
        cache
            .analyse(
                key,
                requirements,
                &mut |req| {
                    *loads += 1;
                    Ok(Some(SealedEntity::new(Arc::clone(&entity), req.clone())))
                },
                &mut |sealed, req| {
                    *enrichments += 1;
                    Ok(SealedEntity::new(Arc::clone(sealed.entity()), req.clone()))
                },
                &|sealed, req| sealed.limit(req),
            )
            .unwrap()
            .unwrap()
    }

    #[test]
    fn no_cache_always_loads() {
        let (mut loads, mut enrichments) = (0, 0);
        let req = EntityContentRequirements::all();
        run(&NoCacheSupervisor, create_key(1), &req, &mut loads, &mut enrichments);
        run(&NoCacheSupervisor, create_key(1), &req, &mut loads, &mut enrichments);
        assert_eq!(loads, 2);
    }

    #[test]
    fn lru_serves_narrower_requests_from_memory() {
        let cache = supervisor_for(8);
        let (mut loads, mut enrichments) = (0, 0);
        let all = EntityContentRequirements::all();
        run(cache.as_ref(), create_key(1), &all, &mut loads, &mut enrichments);
        let body = run(
            cache.as_ref(),
            create_key(1),
            &EntityContentRequirements::body_only(),
            &mut loads,
            &mut enrichments,
        );
        assert_eq!(loads, 1);
        assert!(body.attribute("code").is_err());
    }

    #[test]
    fn lru_enriches_wider_requests() {
        let cache = supervisor_for(8);
        let (mut loads, mut enrichments) = (0, 0);
        let body = EntityContentRequirements::body_only();
        run(cache.as_ref(), create_key(1), &body, &mut loads, &mut enrichments);
        let with_attributes = run(
            cache.as_ref(),
            create_key(1),
            &body.clone().with_attributes(),
            &mut loads,
            &mut enrichments,
        );
        assert_eq!((loads, enrichments), (1, 1));
        assert!(with_attributes.attribute("code").unwrap().is_some());
    }

    #[test]
    fn versions_do_not_share_entries() {
        let cache = supervisor_for(8);
        let (mut loads, mut enrichments) = (0, 0);
        let all = EntityContentRequirements::all();
        run(cache.as_ref(), create_key(1), &all, &mut loads, &mut enrichments);
        run(cache.as_ref(), create_key(2), &all, &mut loads, &mut enrichments);
        assert_eq!(loads, 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn zero_capacity_disables_caching() {
        let cache = supervisor_for(0);
        let (mut loads, mut enrichments) = (0, 0);
        let all = EntityContentRequirements::all();
        run(cache.as_ref(), create_key(1), &all, &mut loads, &mut enrichments);
        run(cache.as_ref(), create_key(1), &all, &mut loads, &mut enrichments);
        assert_eq!(loads, 2);
        assert!(cache.is_empty());
    }
}
