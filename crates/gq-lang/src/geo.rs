//! Domain values shared by the language and the host world.
//!
//! These are plain data: identifiers, tags, tag queries and the small amount
//! of geometry the bundled host functions need.

use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use thiserror::Error;

use crate::number::format_float;

const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// Short prefixes accepted in place of a full `/type/namespace/value` id.
const NAMESPACE_ALIASES: &[(&str, FeatureType, &str)] = &[
    ("n", FeatureType::Point, "openstreetmap.org/node"),
    ("w", FeatureType::Path, "openstreetmap.org/way"),
    ("a", FeatureType::Area, "openstreetmap.org/way"),
    ("r", FeatureType::Relation, "openstreetmap.org/relation"),
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub const fn new(lat: f64, lng: f64) -> Self {
        LatLng { lat, lng }
    }
}

impl Display for LatLng {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", format_float(self.lat), format_float(self.lng))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureType {
    Point,
    Path,
    Area,
    Relation,
    Collection,
    Expression,
}

impl Display for FeatureType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            FeatureType::Point => "point",
            FeatureType::Path => "path",
            FeatureType::Area => "area",
            FeatureType::Relation => "relation",
            FeatureType::Collection => "collection",
            FeatureType::Expression => "expression",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for FeatureType {
    type Err = FeatureIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "point" => Ok(FeatureType::Point),
            "path" => Ok(FeatureType::Path),
            "area" => Ok(FeatureType::Area),
            "relation" => Ok(FeatureType::Relation),
            "collection" => Ok(FeatureType::Collection),
            "expression" => Ok(FeatureType::Expression),
            _ => Err(FeatureIdError::UnknownType(s.to_string())),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeatureIdError {
    #[error("Feature ids start with `/`, got `{0}`")]
    MissingSlash(String),
    #[error("Unknown feature type `{0}`")]
    UnknownType(String),
    #[error("Invalid feature id value `{0}`")]
    InvalidValue(String),
    #[error("Malformed feature id `{0}`")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FeatureId {
    pub kind: FeatureType,
    pub namespace: SmolStr,
    pub value: u64,
}

impl FeatureId {
    pub fn new(kind: FeatureType, namespace: impl Into<SmolStr>, value: u64) -> Self {
        FeatureId {
            kind,
            namespace: namespace.into(),
            value,
        }
    }

    pub fn area(namespace: impl Into<SmolStr>, value: u64) -> Self {
        FeatureId::new(FeatureType::Area, namespace, value)
    }

    pub fn point(namespace: impl Into<SmolStr>, value: u64) -> Self {
        FeatureId::new(FeatureType::Point, namespace, value)
    }

    fn alias(&self) -> Option<&'static str> {
        NAMESPACE_ALIASES
            .iter()
            .find(|(_, kind, namespace)| *kind == self.kind && self.namespace == *namespace)
            .map(|(alias, _, _)| *alias)
    }
}

impl Display for FeatureId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.alias() {
            Some(alias) => write!(f, "/{}/{}", alias, self.value),
            None => write!(f, "/{}/{}/{}", self.kind, self.namespace, self.value),
        }
    }
}

impl FromStr for FeatureId {
    type Err = FeatureIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix('/')
            .ok_or_else(|| FeatureIdError::MissingSlash(s.to_string()))?;
        let segments = rest.split('/').collect::<Vec<_>>();
        let parse_value = |value: &str| {
            value
                .parse::<u64>()
                .map_err(|_| FeatureIdError::InvalidValue(value.to_string()))
        };

        match segments.as_slice() {
            [alias, value] => {
                let (_, kind, namespace) = NAMESPACE_ALIASES
                    .iter()
                    .find(|(name, _, _)| name == alias)
                    .ok_or_else(|| FeatureIdError::Malformed(s.to_string()))?;
                Ok(FeatureId::new(*kind, *namespace, parse_value(*value)?))
            }
            [kind, namespace @ .., value] if !namespace.is_empty() => {
                if namespace.iter().any(|segment| segment.is_empty()) {
                    return Err(FeatureIdError::Malformed(s.to_string()));
                }
                Ok(FeatureId::new(
                    kind.parse()?,
                    namespace.join("/"),
                    parse_value(*value)?,
                ))
            }
            _ => Err(FeatureIdError::Malformed(s.to_string())),
        }
    }
}

/// A key/value tag. Keys keep their leading `#` or `@`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub key: SmolStr,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<SmolStr>, value: impl Into<String>) -> Self {
        Tag {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn int_value(&self) -> Option<i64> {
        self.value.parse().ok()
    }

    pub fn float_value(&self) -> Option<f64> {
        self.value.parse().ok()
    }

    /// Bare keys strip the `#`/`@` marker so `#building` matches a feature's
    /// `building` tag.
    fn matches_key(&self, key: &str) -> bool {
        bare_key(&self.key) == bare_key(key)
    }
}

fn bare_key(key: &str) -> &str {
    key.trim_start_matches(['#', '@'])
}

impl Display for Tag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.value.is_empty() {
            return write!(f, "{}", self.key);
        }

        let is_word = self
            .value
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic())
            && self
                .value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !matches!(self.value.as_str(), "true" | "false");
        let is_int = self.int_value().is_some_and(|n| n.to_string() == self.value);

        if is_word || is_int {
            write!(f, "{}={}", self.key, self.value)
        } else {
            write!(f, "{}={}", self.key, quote(&self.value))
        }
    }
}

/// Renders `value` as a string literal of the expression language.
pub fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\t' => quoted.push_str("\\t"),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

/// A predicate over feature tags.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "op", content = "args", rename_all = "snake_case")]
pub enum Query {
    /// Matches every feature; written `[]`.
    All,
    Keyed(SmolStr),
    Tagged(Tag),
    Intersection(Vec<Query>),
    Union(Vec<Query>),
}

impl Query {
    pub fn matches(&self, tags: &[Tag]) -> bool {
        match self {
            Query::All => true,
            Query::Keyed(key) => tags.iter().any(|tag| tag.matches_key(key)),
            Query::Tagged(expected) => tags
                .iter()
                .any(|tag| tag.matches_key(&expected.key) && tag.value == expected.value),
            Query::Intersection(queries) => queries.iter().all(|q| q.matches(tags)),
            Query::Union(queries) => queries.iter().any(|q| q.matches(tags)),
        }
    }

    /// Writes the query at `level`, parenthesising groups that would
    /// otherwise bind differently when read back.
    ///
    /// Groups with a single term print as that term. An empty union, which
    /// matches nothing, is written `()`; an empty intersection matches
    /// everything and prints like `All`.
    fn fmt_level(&self, f: &mut Formatter<'_>, level: Level) -> fmt::Result {
        match self {
            Query::All => write!(f, "[]"),
            Query::Keyed(key) => write!(f, "{}", key),
            Query::Tagged(tag) if tag.value.is_empty() => write!(f, "{}=\"\"", tag.key),
            Query::Tagged(tag) => write!(f, "{}", tag),
            Query::Union(queries) | Query::Intersection(queries) if queries.len() == 1 => {
                queries[0].fmt_level(f, level)
            }
            Query::Union(queries) if queries.is_empty() => write!(f, "()"),
            Query::Intersection(queries) if queries.is_empty() => write!(f, "[]"),
            Query::Union(queries) if level == Level::Union => {
                write!(f, "{}", queries.iter().map(|q| QueryTerm(q, Level::Intersection)).join(" | "))
            }
            Query::Intersection(queries) if level != Level::Term => {
                write!(f, "{}", queries.iter().map(|q| QueryTerm(q, Level::Term)).join(" & "))
            }
            group => write!(f, "({})", QueryTerm(group, Level::Union)),
        }
    }
}

/// Binding strength of the position a query is written in, loosest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Union,
    Intersection,
    Term,
}

struct QueryTerm<'a>(&'a Query, Level);

impl Display for QueryTerm<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt_level(f, self.1)
    }
}

impl Display for Query {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Query::All => write!(f, "[]"),
            query => write!(f, "[{}]", QueryTerm(query, Level::Union)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates", rename_all = "snake_case")]
pub enum Geometry {
    Point(LatLng),
    Path(Vec<LatLng>),
    /// Each polygon is a single outer ring.
    Area(Vec<Vec<LatLng>>),
    Relation(Vec<FeatureId>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: FeatureId,
    #[serde(default)]
    pub tags: Vec<Tag>,
    pub geometry: Geometry,
}

impl Feature {
    pub fn tag(&self, key: &str) -> Option<&Tag> {
        self.tags.iter().find(|tag| tag.matches_key(key))
    }
}

/// Area of a set of polygons on a spherical earth, in square meters.
pub fn area_m2(polygons: &[Vec<LatLng>]) -> f64 {
    polygons.iter().map(|ring| ring_area_m2(ring)).sum()
}

fn ring_area_m2(ring: &[LatLng]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }

    let sum: f64 = ring
        .iter()
        .zip(ring.iter().cycle().skip(1))
        .map(|(a, b)| {
            (b.lng - a.lng).to_radians()
                * (2.0 + a.lat.to_radians().sin() + b.lat.to_radians().sin())
        })
        .sum();

    (sum * EARTH_RADIUS_METERS * EARTH_RADIUS_METERS / 2.0).abs()
}
