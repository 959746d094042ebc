//! Fetch backends for area geometry and points of interest.
//!
//! The store depends only on the two traits defined here:
//!
//! - [`GeometrySource`]: area key → polygon feature (PDOK in production)
//! - [`PoiSource`]: bounding box → facilities (Overpass in production)
//!
//! Both are dyn-compatible (`Pin<Box<dyn Future>>` returns) so the store can
//! hold them as `Arc<dyn …>` and tests can substitute scripted fakes.
//!
//! # Example
//!
//! ```ignore
//! use gebiedcache::source::{AsyncReqwestClient, OverpassPoiSource, PdokGeometrySource};
//!
//! let geometry = PdokGeometrySource::new(AsyncReqwestClient::new()?);
//! let pois = OverpassPoiSource::new(AsyncReqwestClient::with_timeout(45)?);
//! ```

mod http;
mod overpass;
mod pdok;

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::area::AreaKey;
use crate::geo::{BoundingBox, Feature};
use crate::poi::PointOfInterest;

pub use http::{AsyncHttpClient, AsyncReqwestClient, DEFAULT_TIMEOUT_SECS};
pub use overpass::{
    build_query, parse_response, OverpassPoiSource, DEFAULT_OVERPASS_TIMEOUT_SECS,
    OVERPASS_API_URL,
};
pub use pdok::{PdokGeometrySource, PDOK_BASE_URL, PDOK_FALLBACK_URL};

#[cfg(test)]
pub(crate) use http::tests::MockAsyncHttpClient;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors raised by a fetch backend.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    /// The request could not be sent or the body could not be read.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// The request did not complete in time.
    #[error("Request to {url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },

    /// The response body was not what the backend expected.
    #[error("Failed to parse response: {0}")]
    Parse(String),
}

/// Looks up the polygon of an area.
pub trait GeometrySource: Send + Sync {
    /// Fetches the feature for `key`.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(feature))` if the area was found
    /// - `Ok(None)` if the backend answered but has no such area
    /// - `Err(_)` on transport or parse failure
    fn fetch_geometry<'a>(
        &'a self,
        key: &'a AreaKey,
    ) -> BoxFuture<'a, Result<Option<Feature>, SourceError>>;

    /// Backend name, for logs.
    fn name(&self) -> &str;
}

/// Looks up facilities inside a bounding box.
pub trait PoiSource: Send + Sync {
    /// Fetches all classified items inside `bbox`.
    ///
    /// An empty result is `Ok(vec![])`, never an error.
    fn fetch_points<'a>(
        &'a self,
        bbox: &'a BoundingBox,
    ) -> BoxFuture<'a, Result<Vec<PointOfInterest>, SourceError>>;

    /// Backend name, for logs.
    fn name(&self) -> &str;
}
