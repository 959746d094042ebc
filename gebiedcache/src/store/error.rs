//! Error types surfaced by the area store.

use thiserror::Error;

use crate::area::AreaKey;

/// Why no data is available for an area.
///
/// `Clone` because one outcome is handed to every caller that joined the
/// same in-flight fetch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    /// The geometry backend raised an error.
    #[error("geometry lookup for {key} failed: {reason}")]
    GeometryLookupFailed { key: AreaKey, reason: String },

    /// The geometry backend answered but returned no usable geometry.
    #[error("no geometry found for {key}")]
    GeometryMissing { key: AreaKey },

    /// The points-of-interest backend raised an error.
    #[error("points-of-interest lookup for {key} failed: {reason}")]
    PointsLookupFailed { key: AreaKey, reason: String },

    /// Every attempt failed; `last` is the final attempt's error.
    #[error("giving up on {key} after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        key: AreaKey,
        attempts: u32,
        last: Box<FetchError>,
    },

    /// The fetch task terminated abnormally (panicked backend).
    #[error("fetch for {key} aborted: {reason}")]
    Aborted { key: AreaKey, reason: String },
}

impl FetchError {
    /// The area this error is about.
    pub fn key(&self) -> &AreaKey {
        match self {
            Self::GeometryLookupFailed { key, .. }
            | Self::GeometryMissing { key }
            | Self::PointsLookupFailed { key, .. }
            | Self::RetriesExhausted { key, .. }
            | Self::Aborted { key, .. } => key,
        }
    }

    /// The innermost backend error, unwrapping `RetriesExhausted`.
    pub fn root_cause(&self) -> &FetchError {
        match self {
            Self::RetriesExhausted { last, .. } => last.root_cause(),
            other => other,
        }
    }

    /// Whether this is a missing-geometry outcome (possibly wrapped).
    pub fn is_geometry_missing(&self) -> bool {
        matches!(self.root_cause(), Self::GeometryMissing { .. })
    }
}
