//! Points of interest (voorzieningen) found around an area.
//!
//! Items come from OpenStreetMap via Overpass. Each element is classified
//! into a [`PoiCategory`] from its OSM tags; elements that do not fit a
//! category are dropped by the backend rather than guessed at.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Facility category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoiCategory {
    PrimarySchool,
    SecondarySchool,
    Childcare,
    Supermarket,
    GeneralPractitioner,
    PlaceOfWorship,
    SportsCentre,
    Playground,
    CommunityCentre,
}

/// Name fragments that mark a school as secondary education.
const SECONDARY_SCHOOL_HINTS: &[&str] = &[
    "vmbo",
    "havo",
    "vwo",
    "mavo",
    "gymnasium",
    "lyceum",
    "college",
    "scholengemeenschap",
];

/// Name fragments that mark a school as primary education.
const PRIMARY_SCHOOL_HINTS: &[&str] = &[
    "basisschool",
    "obs",
    "cbs",
    "openbare school",
    "katholieke school",
];

impl PoiCategory {
    /// Every category, in display order.
    pub const ALL: [PoiCategory; 9] = [
        Self::PrimarySchool,
        Self::SecondarySchool,
        Self::Childcare,
        Self::Supermarket,
        Self::GeneralPractitioner,
        Self::PlaceOfWorship,
        Self::SportsCentre,
        Self::Playground,
        Self::CommunityCentre,
    ];

    /// Dutch display label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::PrimarySchool => "Basisschool",
            Self::SecondarySchool => "Middelbare school",
            Self::Childcare => "Kinderdagverblijf",
            Self::Supermarket => "Supermarkt",
            Self::GeneralPractitioner => "Huisarts",
            Self::PlaceOfWorship => "Religieus centrum",
            Self::SportsCentre => "Sportvereniging",
            Self::Playground => "Speelterrein",
            Self::CommunityCentre => "Wijkcentrum",
        }
    }

    /// Classifies an OSM element by its tags.
    ///
    /// Schools are only classified when the tags or the name say which level
    /// they teach; an ambiguous school yields `None`.
    pub fn classify<'a, F>(tag: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        match (tag("amenity"), tag("shop"), tag("leisure")) {
            (Some("school"), _, _) => classify_school(&tag),
            (Some("kindergarten"), _, _) => Some(Self::Childcare),
            (_, Some("supermarket"), _) => Some(Self::Supermarket),
            (Some("doctors"), _, _) => Some(Self::GeneralPractitioner),
            (Some("place_of_worship"), _, _) => Some(Self::PlaceOfWorship),
            (_, _, Some("sports_centre")) => Some(Self::SportsCentre),
            (_, _, Some("pitch")) => Some(Self::Playground),
            (Some("community_centre"), _, _) => Some(Self::CommunityCentre),
            _ => None,
        }
    }

    /// Classifies using a tag map.
    pub fn classify_tags(tags: &BTreeMap<String, String>) -> Option<Self> {
        Self::classify(|k| tags.get(k).map(String::as_str))
    }
}

fn classify_school<'a, F>(tag: &F) -> Option<PoiCategory>
where
    F: Fn(&str) -> Option<&'a str>,
{
    let school_type = tag("school:type");
    let isced = tag("isced:level");
    let name = tag("name")
        .or_else(|| tag("name:nl"))
        .unwrap_or_default()
        .to_lowercase();

    if school_type == Some("secondary") || isced.is_some_and(|l| l.starts_with('3')) {
        return Some(PoiCategory::SecondarySchool);
    }
    if SECONDARY_SCHOOL_HINTS.iter().any(|h| name.contains(h)) {
        return Some(PoiCategory::SecondarySchool);
    }
    if school_type == Some("primary") || matches!(isced, Some("0" | "1" | "2")) {
        return Some(PoiCategory::PrimarySchool);
    }
    if PRIMARY_SCHOOL_HINTS.iter().any(|h| name.contains(h)) {
        return Some(PoiCategory::PrimarySchool);
    }
    None
}

impl fmt::Display for PoiCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A classified facility with a location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointOfInterest {
    /// `<osm type>-<osm id>`, e.g. `node-123`.
    pub id: String,
    pub category: PoiCategory,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl PointOfInterest {
    /// Builds an item from OSM tags, resolving its display name.
    ///
    /// The name falls back to `name:nl` and then to `"<label> (geen naam)"`.
    pub fn new(
        id: impl Into<String>,
        category: PoiCategory,
        lat: f64,
        lon: f64,
        tags: BTreeMap<String, String>,
    ) -> Self {
        let name = tags
            .get("name")
            .or_else(|| tags.get("name:nl"))
            .cloned()
            .unwrap_or_else(|| format!("{} (geen naam)", category.label()));
        Self {
            id: id.into(),
            category,
            name,
            lat,
            lon,
            tags,
        }
    }
}

/// Groups items by category. Categories without items are omitted.
pub fn group_by_category(
    items: &[PointOfInterest],
) -> BTreeMap<PoiCategory, Vec<&PointOfInterest>> {
    let mut grouped: BTreeMap<PoiCategory, Vec<&PointOfInterest>> = BTreeMap::new();
    for item in items {
        grouped.entry(item.category).or_default().push(item);
    }
    grouped
}
