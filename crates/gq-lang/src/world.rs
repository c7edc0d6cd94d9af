//! The world of features an expression is evaluated against.
//!
//! The engine only reads the world while evaluating. Mutation goes through a
//! [`Change`] value that the caller applies afterwards, holding the write
//! side of [`SharedWorld`] for just that call.

use std::{collections::BTreeMap, fmt::Debug, sync::Arc};

use parking_lot::{RwLock, RwLockUpgradableReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geo::{Feature, FeatureId, FeatureType, Geometry, LatLng, Query, Tag};

pub trait World: Send + Sync {
    fn find_feature(&self, id: &FeatureId) -> Option<Arc<Feature>>;

    fn find_features(&self, query: &Query) -> Vec<Arc<Feature>>;

    /// Every feature of the given type, in id order.
    fn all_features(&self, feature_type: FeatureType) -> Vec<Arc<Feature>>;
}

pub trait MutableWorld: World {
    fn add_tag(&mut self, id: &FeatureId, tag: Tag) -> Result<(), ApplyChangeError>;
}

/// A deferred modification produced by evaluating an expression.
pub trait Change: Debug + Send + Sync {
    /// Applies the change, returning the ids of the features it modified.
    fn apply(&self, world: &mut dyn MutableWorld) -> Result<Vec<FeatureId>, ApplyChangeError>;
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApplyChangeError {
    #[error("Feature `{0}` not found")]
    FeatureNotFound(FeatureId),
    #[error("Change rejected: {0}")]
    Rejected(String),
}

/// Sets a tag on one feature, replacing any tag with the same key.
#[derive(Debug, Clone, PartialEq)]
pub struct AddTag {
    pub id: FeatureId,
    pub tag: Tag,
}

impl Change for AddTag {
    fn apply(&self, world: &mut dyn MutableWorld) -> Result<Vec<FeatureId>, ApplyChangeError> {
        world.add_tag(&self.id, self.tag.clone())?;
        Ok(vec![self.id.clone()])
    }
}

/// Several changes applied in order. The first failure stops the rest.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet(pub Vec<Arc<dyn Change>>);

impl Change for ChangeSet {
    fn apply(&self, world: &mut dyn MutableWorld) -> Result<Vec<FeatureId>, ApplyChangeError> {
        let mut modified = Vec::new();
        for change in &self.0 {
            modified.extend(change.apply(world)?);
        }
        Ok(modified)
    }
}

/// An in-memory world, loadable from JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Feature>", into = "Vec<Feature>")]
pub struct MemoryWorld {
    features: BTreeMap<FeatureId, Arc<Feature>>,
}

impl MemoryWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_features(features: impl IntoIterator<Item = Feature>) -> Self {
        let mut world = MemoryWorld::new();
        for feature in features {
            world.insert(feature);
        }
        world
    }

    pub fn insert(&mut self, feature: Feature) {
        self.features.insert(feature.id.clone(), Arc::new(feature));
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// A handful of features around Bank station in the City of London.
    ///
    /// Areas 1 to 3 are buildings (tagged `building=yes`, `building=yes` and
    /// `building=office`), area 4 is a park, point 10 is a bank and path 20 a
    /// street.
    pub fn fixture() -> Self {
        fn square(lat: f64, lng: f64, size: f64) -> Geometry {
            Geometry::Area(vec![vec![
                LatLng::new(lat, lng),
                LatLng::new(lat, lng + size),
                LatLng::new(lat + size, lng + size),
                LatLng::new(lat + size, lng),
            ]])
        }

        const OSM_WAY: &str = "openstreetmap.org/way";
        const OSM_NODE: &str = "openstreetmap.org/node";

        MemoryWorld::from_features([
            Feature {
                id: FeatureId::area(OSM_WAY, 1),
                tags: vec![Tag::new("building", "yes"), Tag::new("name", "Bank Station")],
                geometry: square(51.5133, -0.0890, 0.0005),
            },
            Feature {
                id: FeatureId::area(OSM_WAY, 2),
                tags: vec![Tag::new("building", "yes"), Tag::new("levels", "4")],
                geometry: square(51.5140, -0.0880, 0.0002),
            },
            Feature {
                id: FeatureId::area(OSM_WAY, 3),
                tags: vec![Tag::new("building", "office"), Tag::new("levels", "12")],
                geometry: square(51.5120, -0.0870, 0.0003),
            },
            Feature {
                id: FeatureId::area(OSM_WAY, 4),
                tags: vec![Tag::new("leisure", "park"), Tag::new("name", "Finsbury Circus")],
                geometry: square(51.5170, -0.0860, 0.0010),
            },
            Feature {
                id: FeatureId::point(OSM_NODE, 10),
                tags: vec![Tag::new("amenity", "bank"), Tag::new("name", "Bank of England")],
                geometry: Geometry::Point(LatLng::new(51.5142, -0.0885)),
            },
            Feature {
                id: FeatureId::new(FeatureType::Path, OSM_WAY, 20),
                tags: vec![Tag::new("highway", "primary"), Tag::new("name", "Threadneedle Street")],
                geometry: Geometry::Path(vec![
                    LatLng::new(51.5138, -0.0880),
                    LatLng::new(51.5141, -0.0860),
                ]),
            },
        ])
    }
}

impl From<Vec<Feature>> for MemoryWorld {
    fn from(features: Vec<Feature>) -> Self {
        MemoryWorld::from_features(features)
    }
}

impl From<MemoryWorld> for Vec<Feature> {
    fn from(world: MemoryWorld) -> Self {
        world
            .features
            .into_values()
            .map(Arc::unwrap_or_clone)
            .collect()
    }
}

impl World for MemoryWorld {
    fn find_feature(&self, id: &FeatureId) -> Option<Arc<Feature>> {
        self.features.get(id).cloned()
    }

    fn find_features(&self, query: &Query) -> Vec<Arc<Feature>> {
        self.features
            .values()
            .filter(|feature| query.matches(&feature.tags))
            .cloned()
            .collect()
    }

    fn all_features(&self, feature_type: FeatureType) -> Vec<Arc<Feature>> {
        self.features
            .values()
            .filter(|feature| feature.id.kind == feature_type)
            .cloned()
            .collect()
    }
}

impl MutableWorld for MemoryWorld {
    fn add_tag(&mut self, id: &FeatureId, tag: Tag) -> Result<(), ApplyChangeError> {
        let feature = self
            .features
            .get_mut(id)
            .ok_or_else(|| ApplyChangeError::FeatureNotFound(id.clone()))?;
        let feature = Arc::make_mut(feature);
        let key = tag.key.trim_start_matches(['#', '@']).to_string();

        match feature.tags.iter_mut().find(|t| t.key == key) {
            Some(existing) => existing.value = tag.value,
            None => feature.tags.push(Tag::new(key, tag.value)),
        }
        Ok(())
    }
}

/// A world shared between readers and a single writer.
///
/// Evaluation holds an upgradable read lock, so plain readers keep running.
/// Applying a change upgrades to the write lock for the one `apply` call and
/// downgrades straight after.
#[derive(Debug, Default)]
pub struct SharedWorld<W> {
    inner: RwLock<W>,
}

impl<W: MutableWorld> SharedWorld<W> {
    pub fn new(world: W) -> Self {
        SharedWorld {
            inner: RwLock::new(world),
        }
    }

    pub fn read(&self) -> parking_lot::RwLockReadGuard<'_, W> {
        self.inner.read()
    }

    pub fn upgradable_read(&self) -> RwLockUpgradableReadGuard<'_, W> {
        self.inner.upgradable_read()
    }

    pub fn into_inner(self) -> W {
        self.inner.into_inner()
    }

    /// Applies `change` through the upgrade protocol, returning the downgraded
    /// read guard together with the result.
    pub fn apply<'a>(
        guard: RwLockUpgradableReadGuard<'a, W>,
        change: &dyn Change,
    ) -> (
        parking_lot::RwLockReadGuard<'a, W>,
        Result<Vec<FeatureId>, ApplyChangeError>,
    ) {
        let mut write = RwLockUpgradableReadGuard::upgrade(guard);
        let result = change.apply(&mut *write);
        (RwLockWriteGuard::downgrade(write), result)
    }
}
