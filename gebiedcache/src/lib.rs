//! gebiedcache - per-area cache for Dutch neighbourhood data
//!
//! Loads the geometry of a buurt, wijk or gemeente (by CBS code) from PDOK
//! and the facilities inside it from OpenStreetMap via Overpass, and keeps the
//! result in a time-limited in-memory cache. Concurrent requests for the same
//! area share one fetch; failed fetches are retried with backoff.
//!
//! # Modules
//!
//! - [`store`]: the cache and fetch coordinator ([`AreaStore`])
//! - [`source`]: fetch backend traits and the PDOK/Overpass clients
//! - [`area`], [`geo`], [`poi`]: area keys, GeoJSON and facility types
//! - [`config`], [`logging`]: configuration file and tracing setup
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use gebiedcache::{AreaKey, AreaStore, StoreConfig};
//! use gebiedcache::source::{AsyncReqwestClient, OverpassPoiSource, PdokGeometrySource};
//!
//! let store = AreaStore::new(
//!     StoreConfig::default(),
//!     Arc::new(PdokGeometrySource::new(AsyncReqwestClient::new()?)),
//!     Arc::new(OverpassPoiSource::new(AsyncReqwestClient::with_timeout(45)?)),
//! );
//!
//! let entry = store.ensure(&AreaKey::new("BU03630000")).await?;
//! for (category, items) in gebiedcache::poi::group_by_category(&entry.items) {
//!     println!("{}: {}", category, items.len());
//! }
//! ```

pub mod area;
pub mod config;
pub mod geo;
pub mod logging;
pub mod poi;
pub mod source;
pub mod store;

pub use area::{AreaKey, AreaKind};
pub use store::{AreaStore, AttemptStatus, CacheEntry, FetchError, StoreConfig};
