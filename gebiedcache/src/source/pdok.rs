//! PDOK geometry backend.
//!
//! Looks up buurt/wijk/gemeente polygons in the CBS "wijken en buurten"
//! OGC API published by PDOK.
//!
//! # URL Pattern
//!
//! `{base}/collections/{buurten|wijken|gemeenten}/items?{property}={code}`
//!
//! The property holding the code differs between dataset vintages, so each
//! candidate (`buurtcode`/`wijkcode`/`gemeentecode`, `statcode`, `code`) is
//! tried in turn. When none match, the older generalised
//! `gebiedsindelingen` API is queried as a fallback.

use tracing::{debug, warn};

use super::{AsyncHttpClient, BoxFuture, GeometrySource, SourceError};
use crate::area::{AreaKey, AreaKind};
use crate::geo::{Feature, FeatureCollection};

/// Base URL of the 2024 wijken-en-buurten API.
pub const PDOK_BASE_URL: &str = "https://api.pdok.nl/cbs/wijken-en-buurten-2024/ogc/v1";

/// Base URL of the generalised area-division API used as fallback.
pub const PDOK_FALLBACK_URL: &str = "https://api.pdok.nl/cbs/gebiedsindelingen/ogc/v1";

/// Code properties tried against the fallback API.
const FALLBACK_PROPERTIES: [&str; 2] = ["statcode", "code"];

/// Geometry backend backed by the PDOK OGC API.
pub struct PdokGeometrySource<C: AsyncHttpClient> {
    http_client: C,
    base_url: String,
    fallback_url: String,
}

impl<C: AsyncHttpClient> PdokGeometrySource<C> {
    /// Creates a backend using the public PDOK endpoints.
    pub fn new(http_client: C) -> Self {
        Self::with_urls(http_client, PDOK_BASE_URL, PDOK_FALLBACK_URL)
    }

    /// Creates a backend with custom endpoints.
    pub fn with_urls(
        http_client: C,
        base_url: impl Into<String>,
        fallback_url: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            fallback_url: fallback_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Every URL to try for `code`, in order.
    fn candidate_urls(&self, kind: AreaKind, code: &str) -> Vec<String> {
        let primary = kind.code_properties().into_iter().map(|prop| {
            format!(
                "{}/collections/{}/items?{}={}",
                self.base_url,
                kind.collection(),
                prop,
                code
            )
        });
        let fallback = FALLBACK_PROPERTIES.into_iter().map(|prop| {
            format!(
                "{}/collections/{}_gegeneraliseerd_2024/items?{}={}",
                self.fallback_url,
                kind.name(),
                prop,
                code
            )
        });
        primary.chain(fallback).collect()
    }

    async fn lookup(&self, key: &AreaKey) -> Result<Option<Feature>, SourceError> {
        let Some(kind) = key.kind() else {
            debug!(area = %key, "Not a buurt/wijk/gemeente code, skipping PDOK lookup");
            return Ok(None);
        };

        let mut answered = false;
        let mut last_error = None;

        for url in self.candidate_urls(kind, key.as_str()) {
            let body = match self.http_client.get(&url).await {
                Ok(body) => body,
                Err(e) => {
                    warn!(area = %key, url = %url, error = %e, "PDOK request failed");
                    last_error = Some(e);
                    continue;
                }
            };

            match serde_json::from_slice::<FeatureCollection>(&body) {
                Ok(collection) => {
                    answered = true;
                    if let Some(feature) = collection.features.into_iter().next() {
                        debug!(area = %key, url = %url, "PDOK feature found");
                        return Ok(Some(feature));
                    }
                }
                Err(e) => {
                    warn!(area = %key, url = %url, error = %e, "Unreadable PDOK response");
                    last_error = Some(SourceError::Parse(e.to_string()));
                }
            }
        }

        match (answered, last_error) {
            // Every request failed outright: report it as a lookup failure.
            (false, Some(e)) => Err(e),
            _ => Ok(None),
        }
    }
}

impl<C: AsyncHttpClient> GeometrySource for PdokGeometrySource<C> {
    fn fetch_geometry<'a>(
        &'a self,
        key: &'a AreaKey,
    ) -> BoxFuture<'a, Result<Option<Feature>, SourceError>> {
        Box::pin(self.lookup(key))
    }

    fn name(&self) -> &str {
        "PDOK"
    }
}
