use crate::fingerprint::Fingerprint;
use serde::{Deserialize, Serialize};

/// Dot-product similarity a query must exceed to count as the same person.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.85;

/// Axis-aligned face rectangle in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FaceRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// A registered customer as seen by the matcher.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub customer_id: i64,
    pub name: String,
    pub fingerprint: Fingerprint,
    /// Whether the customer currently has an open visit.
    pub in_store: bool,
}

/// Result of matching a query fingerprint against the gallery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub matched: bool,
    /// Dot-product similarity of the best candidate.
    pub similarity: f64,
    pub customer_id: Option<i64>,
    pub name: Option<String>,
}

impl MatchResult {
    pub fn no_match(similarity: f64) -> Self {
        Self {
            matched: false,
            similarity,
            customer_id: None,
            name: None,
        }
    }
}

/// Strategy for comparing a query against registered customers.
pub trait Matcher {
    fn compare(&self, query: &Fingerprint, gallery: &[GalleryEntry], threshold: f64) -> MatchResult;
}

/// Linear-scan dot-product matcher.
///
/// Both sides are L2-normalized, so the dot product is the cosine
/// similarity. The whole gallery is scanned and the best candidate wins;
/// it matches only when strictly above the threshold. Entries whose
/// dimension differs from the query never match.
pub struct DotMatcher;

impl Matcher for DotMatcher {
    fn compare(&self, query: &Fingerprint, gallery: &[GalleryEntry], threshold: f64) -> MatchResult {
        let mut best_sim = f64::NEG_INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, entry) in gallery.iter().enumerate() {
            let Some(sim) = query.similarity(&entry.fingerprint) else {
                continue;
            };
            if sim > best_sim {
                best_sim = sim;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_sim > threshold => MatchResult {
                matched: true,
                similarity: best_sim,
                customer_id: Some(gallery[idx].customer_id),
                name: Some(gallery[idx].name.clone()),
            },
            _ => MatchResult::no_match(if best_sim == f64::NEG_INFINITY { 0.0 } else { best_sim }),
        }
    }
}

/// What the store should do with a face in front of the camera.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Presence {
    /// Not registered: offer registration.
    Unknown,
    /// Registered and currently inside.
    CheckedIn { customer_id: i64, name: String },
    /// Registered but last visit is closed: offer check-in.
    Away { customer_id: i64, name: String },
}

impl Presence {
    pub fn label(&self) -> String {
        match self {
            Presence::Unknown => "Register new".to_string(),
            Presence::CheckedIn { name, .. } => format!("Checked-in: {name}"),
            Presence::Away { name, .. } => format!("Check-in available: {name}"),
        }
    }
}

/// Match a query and classify it against the gallery's in-store flags.
pub fn recognize(
    query: &Fingerprint,
    gallery: &[GalleryEntry],
    matcher: &dyn Matcher,
    threshold: f64,
) -> (Presence, MatchResult) {
    let result = matcher.compare(query, gallery, threshold);
    let presence = match result.customer_id {
        Some(id) if result.matched => {
            let in_store = gallery
                .iter()
                .find(|e| e.customer_id == id)
                .map(|e| e.in_store)
                .unwrap_or(false);
            let name = result.name.clone().unwrap_or_default();
            if in_store {
                Presence::CheckedIn { customer_id: id, name }
            } else {
                Presence::Away { customer_id: id, name }
            }
        }
        _ => Presence::Unknown,
    };
    (presence, result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(values: Vec<f64>) -> Fingerprint {
        Fingerprint::from_values(values)
    }

    fn entry(id: i64, name: &str, values: Vec<f64>, in_store: bool) -> GalleryEntry {
        GalleryEntry {
            customer_id: id,
            name: name.into(),
            fingerprint: fp(values),
            in_store,
        }
    }

    #[test]
    fn test_face_rect_area() {
        let r = FaceRect::new(10, 20, 30, 40);
        assert_eq!(r.area(), 1200);
        assert_eq!(FaceRect::new(0, 0, u32::MAX, 2).area(), u32::MAX as u64 * 2);
    }

    #[test]
    fn test_matcher_scans_whole_gallery() {
        let query = fp(vec![1.0, 0.0, 0.0]);
        let gallery = vec![
            entry(1, "decoy1", vec![0.0, 1.0, 0.0], false),
            entry(2, "close", vec![0.9, 0.435_889_894, 0.0], false),
            entry(3, "exact", vec![1.0, 0.0, 0.0], true),
        ];

        let result = DotMatcher.compare(&query, &gallery, DEFAULT_MATCH_THRESHOLD);
        assert!(result.matched);
        assert_eq!(result.customer_id, Some(3));
        assert_eq!(result.name.as_deref(), Some("exact"));
        assert!((result.similarity - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_matcher_threshold_is_strict() {
        let query = fp(vec![1.0, 0.0]);
        let gallery = vec![entry(1, "edge", vec![0.5, 0.866_025_403_784_438_6], false)];
        let result = DotMatcher.compare(&query, &gallery, 0.5);
        assert!(!result.matched);
        assert!((result.similarity - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_matcher_skips_dimension_mismatch() {
        let query = fp(vec![1.0, 0.0]);
        let gallery = vec![entry(1, "short", vec![1.0], false)];
        let result = DotMatcher.compare(&query, &gallery, 0.5);
        assert_eq!(result, MatchResult::no_match(0.0));
    }

    #[test]
    fn test_matcher_empty_gallery() {
        let query = fp(vec![1.0, 0.0]);
        let result = DotMatcher.compare(&query, &[], 0.5);
        assert!(!result.matched);
        assert_eq!(result.similarity, 0.0);
    }

    #[test]
    fn test_recognize_presence() {
        let query = fp(vec![0.0, 1.0]);
        let inside = vec![entry(7, "Ana", vec![0.0, 1.0], true)];
        let (presence, _) = recognize(&query, &inside, &DotMatcher, DEFAULT_MATCH_THRESHOLD);
        assert_eq!(presence, Presence::CheckedIn { customer_id: 7, name: "Ana".into() });

        let away = vec![entry(7, "Ana", vec![0.0, 1.0], false)];
        let (presence, _) = recognize(&query, &away, &DotMatcher, DEFAULT_MATCH_THRESHOLD);
        assert_eq!(presence, Presence::Away { customer_id: 7, name: "Ana".into() });
        assert_eq!(presence.label(), "Check-in available: Ana");

        let (presence, result) = recognize(&fp(vec![1.0, 0.0]), &away, &DotMatcher, 0.85);
        assert_eq!(presence, Presence::Unknown);
        assert!(!result.matched);
    }
}
