//! storewatch-core — face detection and fingerprint matching.
//!
//! Faces are found with an OpenCV-format Haar cascade, fingerprinted as
//! normalized equalized pixel vectors, and matched against registered
//! customers by dot-product similarity.

pub mod cascade;
pub mod fingerprint;
pub mod imgproc;
pub mod types;

pub use cascade::{find_cascade, CascadeError, DetectParams, HaarCascade};
pub use fingerprint::{Fingerprint, FingerprintError};
pub use types::{
    recognize, DotMatcher, FaceRect, GalleryEntry, MatchResult, Matcher, Presence,
    DEFAULT_MATCH_THRESHOLD,
};
