//! Overpass (OpenStreetMap) points-of-interest backend.
//!
//! Sends one Overpass QL query per bounding box covering every facility
//! category, then classifies the returned elements. Ways and relations are
//! located by the `center` Overpass computes for them (`out center;`).

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::debug;

use super::{AsyncHttpClient, BoxFuture, PoiSource, SourceError};
use crate::geo::BoundingBox;
use crate::poi::{PointOfInterest, PoiCategory};

/// Public Overpass interpreter endpoint.
pub const OVERPASS_API_URL: &str = "https://overpass-api.de/api/interpreter";

/// Default client timeout for Overpass requests in seconds.
///
/// Overpass queries over a gemeente can take tens of seconds.
pub const DEFAULT_OVERPASS_TIMEOUT_SECS: u64 = 45;

/// Server-side query timeout passed in the query header.
const QUERY_TIMEOUT_SECS: u64 = 60;

/// OSM tag filters that together cover every [`PoiCategory`].
///
/// Schools are fetched unfiltered and split into primary/secondary during
/// classification.
const TAG_FILTERS: &[(&str, &str)] = &[
    ("amenity", "school"),
    ("amenity", "kindergarten"),
    ("shop", "supermarket"),
    ("amenity", "doctors"),
    ("amenity", "place_of_worship"),
    ("leisure", "sports_centre"),
    ("leisure", "pitch"),
    ("amenity", "community_centre"),
];

/// Builds the Overpass QL query for `bbox`.
pub fn build_query(bbox: &BoundingBox) -> String {
    let area = bbox.to_overpass();
    let mut query = format!("[out:json][timeout:{}];\n(\n", QUERY_TIMEOUT_SECS);
    for (key, value) in TAG_FILTERS {
        for element in ["node", "way", "relation"] {
            query.push_str(&format!("  {}[\"{}\"=\"{}\"]({});\n", element, key, value, area));
        }
    }
    query.push_str(");\nout center;\n");
    query
}

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    #[serde(default)]
    elements: Vec<OverpassElement>,
}

#[derive(Debug, Deserialize)]
struct OverpassElement {
    #[serde(rename = "type")]
    kind: String,
    id: u64,
    lat: Option<f64>,
    lon: Option<f64>,
    center: Option<Center>,
    #[serde(default)]
    tags: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct Center {
    lat: f64,
    lon: f64,
}

impl OverpassElement {
    fn into_point(self) -> Option<PointOfInterest> {
        let (lat, lon) = match (self.lat, self.lon, &self.center) {
            (Some(lat), Some(lon), _) => (lat, lon),
            (_, _, Some(center)) => (center.lat, center.lon),
            _ => return None,
        };
        let category = PoiCategory::classify_tags(&self.tags)?;
        Some(PointOfInterest::new(
            format!("{}-{}", self.kind, self.id),
            category,
            lat,
            lon,
            self.tags,
        ))
    }
}

/// Parses an Overpass JSON response into classified items.
///
/// Elements without a location or category are skipped.
pub fn parse_response(body: &[u8]) -> Result<Vec<PointOfInterest>, SourceError> {
    let response: OverpassResponse =
        serde_json::from_slice(body).map_err(|e| SourceError::Parse(e.to_string()))?;
    Ok(response
        .elements
        .into_iter()
        .filter_map(OverpassElement::into_point)
        .collect())
}

/// Points-of-interest backend backed by an Overpass interpreter.
pub struct OverpassPoiSource<C: AsyncHttpClient> {
    http_client: C,
    endpoint: String,
}

impl<C: AsyncHttpClient> OverpassPoiSource<C> {
    /// Creates a backend using the public Overpass endpoint.
    pub fn new(http_client: C) -> Self {
        Self::with_endpoint(http_client, OVERPASS_API_URL)
    }

    /// Creates a backend with a custom interpreter endpoint.
    pub fn with_endpoint(http_client: C, endpoint: impl Into<String>) -> Self {
        Self {
            http_client,
            endpoint: endpoint.into(),
        }
    }

    async fn query(&self, bbox: &BoundingBox) -> Result<Vec<PointOfInterest>, SourceError> {
        let body = self
            .http_client
            .post(&self.endpoint, build_query(bbox))
            .await?;
        let items = parse_response(&body)?;
        debug!(bbox = %bbox.to_overpass(), items = items.len(), "Overpass query complete");
        Ok(items)
    }
}

impl<C: AsyncHttpClient> PoiSource for OverpassPoiSource<C> {
    fn fetch_points<'a>(
        &'a self,
        bbox: &'a BoundingBox,
    ) -> BoxFuture<'a, Result<Vec<PointOfInterest>, SourceError>> {
        Box::pin(self.query(bbox))
    }

    fn name(&self) -> &str {
        "Overpass"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MockAsyncHttpClient;

    const SAMPLE: &str = r#"{
        "elements": [
            {"type": "node", "id": 1, "lat": 52.37, "lon": 4.89,
             "tags": {"shop": "supermarket", "name": "Albert Heijn"}},
            {"type": "way", "id": 2, "center": {"lat": 52.38, "lon": 4.90},
             "tags": {"amenity": "school", "school:type": "primary"}},
            {"type": "node", "id": 3, "lat": 52.36, "lon": 4.88,
             "tags": {"amenity": "school", "name": "De Vlinder"}},
            {"type": "relation", "id": 4,
             "tags": {"amenity": "doctors"}},
            {"type": "node", "id": 5, "lat": 52.35, "lon": 4.87}
        ]
    }"#;

    fn bbox() -> BoundingBox {
        BoundingBox::new(52.3, 4.8, 52.4, 4.95)
    }

    #[test]
    fn test_query_covers_every_filter() {
        let query = build_query(&bbox());
        assert!(query.starts_with("[out:json][timeout:60];"));
        assert!(query.trim_end().ends_with("out center;"));
        assert!(query.contains(r#"node["shop"="supermarket"](52.3,4.8,52.4,4.95);"#));
        assert!(query.contains(r#"relation["leisure"="pitch"](52.3,4.8,52.4,4.95);"#));
        assert_eq!(query.matches("(52.3,4.8,52.4,4.95)").count(), TAG_FILTERS.len() * 3);
    }

    #[test]
    fn test_parse_classifies_and_skips() {
        let items = parse_response(SAMPLE.as_bytes()).unwrap();
        assert_eq!(items.len(), 2);

        assert_eq!(items[0].id, "node-1");
        assert_eq!(items[0].category, PoiCategory::Supermarket);
        assert_eq!(items[0].name, "Albert Heijn");

        assert_eq!(items[1].id, "way-2");
        assert_eq!(items[1].category, PoiCategory::PrimarySchool);
        assert_eq!((items[1].lat, items[1].lon), (52.38, 4.90));
        assert_eq!(items[1].name, "Basisschool (geen naam)");
    }

    #[test]
    fn test_parse_empty_result() {
        assert!(parse_response(br#"{"elements": []}"#).unwrap().is_empty());
        assert!(parse_response(br#"{}"#).unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let result = parse_response(b"<html>rate limited</html>");
        assert!(matches!(result, Err(SourceError::Parse(_))));
    }

    #[tokio::test]
    async fn test_fetch_posts_query_to_endpoint() {
        let client = MockAsyncHttpClient::new(Ok(SAMPLE.as_bytes().to_vec()));
        let source = OverpassPoiSource::with_endpoint(client, "http://overpass.test/api");

        let items = source.fetch_points(&bbox()).await.unwrap();
        assert_eq!(items.len(), 2);

        let requests = source.http_client.requests.lock();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].url, "http://overpass.test/api");
        assert!(requests[0].body.as_deref().unwrap().contains("out center;"));
    }

    #[tokio::test]
    async fn test_fetch_propagates_http_errors() {
        let client = MockAsyncHttpClient::new(Err(SourceError::Timeout {
            url: OVERPASS_API_URL.to_string(),
            timeout_secs: 45,
        }));
        let source = OverpassPoiSource::new(client);
        let result = source.fetch_points(&bbox()).await;
        assert!(matches!(result, Err(SourceError::Timeout { .. })));
    }
}
