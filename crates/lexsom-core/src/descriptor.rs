//! Compact 2x2 boolean descriptors for clusters, used as a cheap relevance signal.

use serde::{Deserialize, Serialize};

use crate::cluster::ClusterMetadata;

/// `avg_confidence` above this marks a cluster as high confidence.
pub const HIGH_CONFIDENCE_THRESHOLD: f32 = 0.7;
/// More member documents than this marks a cluster as large.
pub const LARGE_CLUSTER_THRESHOLD: usize = 10;
/// A member document newer than this (7 days) marks recent activity.
pub const RECENT_WINDOW_MS: i64 = 604_800_000;

const HIGH_CONFIDENCE_BOOST: f32 = 0.3;
const CRITICAL_EVIDENCE_BOOST: f32 = 0.4;
const LARGE_CLUSTER_BOOST: f32 = 0.2;
const RECENT_ACTIVITY_BOOST: f32 = 0.1;

/// `[[high_confidence, critical_evidence], [large_cluster, recent_activity]]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BooleanPattern(pub [[bool; 2]; 2]);

impl BooleanPattern {
    /// Derives the pattern from cluster statistics and member document timestamps.
    pub fn derive(
        metadata: &ClusterMetadata,
        member_timestamps: impl IntoIterator<Item = i64>,
        now_millis: i64,
    ) -> Self {
        let high_confidence = metadata.avg_confidence > HIGH_CONFIDENCE_THRESHOLD;
        let critical = metadata
            .dominant_evidence_type
            .as_ref()
            .is_some_and(|e| e.is_critical());
        let large = metadata.size > LARGE_CLUSTER_THRESHOLD;
        let recent = member_timestamps
            .into_iter()
            .any(|ts| now_millis.saturating_sub(ts) <= RECENT_WINDOW_MS);
        Self([[high_confidence, critical], [large, recent]])
    }

    pub fn high_confidence(&self) -> bool {
        self.0[0][0]
    }

    pub fn critical_evidence(&self) -> bool {
        self.0[0][1]
    }

    pub fn large_cluster(&self) -> bool {
        self.0[1][0]
    }

    pub fn recent_activity(&self) -> bool {
        self.0[1][1]
    }

    /// Sum of the fixed weights of the set flags, at most 1.
    pub fn boost(&self) -> f32 {
        let mut boost = 0.0;
        if self.high_confidence() {
            boost += HIGH_CONFIDENCE_BOOST;
        }
        if self.critical_evidence() {
            boost += CRITICAL_EVIDENCE_BOOST;
        }
        if self.large_cluster() {
            boost += LARGE_CLUSTER_BOOST;
        }
        if self.recent_activity() {
            boost += RECENT_ACTIVITY_BOOST;
        }
        f32::min(boost, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::EvidenceType;

    const NOW: i64 = 1_700_000_000_000;

    fn metadata(avg_confidence: f32, evidence: Option<&str>, size: usize) -> ClusterMetadata {
        ClusterMetadata {
            size,
            avg_confidence,
            dominant_evidence_type: evidence.map(EvidenceType::from),
            created_at: NOW,
        }
    }

    #[test]
    fn all_flags_set() {
        let p = BooleanPattern::derive(&metadata(0.9, Some("testimony"), 11), [NOW - 1000], NOW);
        assert_eq!(p, BooleanPattern([[true, true], [true, true]]));
        assert!((p.boost() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn thresholds_are_strict() {
        let p = BooleanPattern::derive(&metadata(0.7, Some("digital"), 10), std::iter::empty(), NOW);
        assert_eq!(p, BooleanPattern::default());
        assert_eq!(p.boost(), 0.0);
    }

    #[test]
    fn recency_window_edges() {
        let m = metadata(0.0, None, 0);
        assert!(BooleanPattern::derive(&m, [NOW - RECENT_WINDOW_MS], NOW).recent_activity());
        assert!(!BooleanPattern::derive(&m, [NOW - RECENT_WINDOW_MS - 1], NOW).recent_activity());
        // Timestamps from the future still count as recent.
        assert!(BooleanPattern::derive(&m, [NOW + 5_000], NOW).recent_activity());
    }

    #[test]
    fn identical_inputs_give_identical_patterns() {
        let a = BooleanPattern::derive(&metadata(0.8, Some("forensic"), 3), [NOW, NOW - 10], NOW);
        let b = BooleanPattern::derive(&metadata(0.8, Some("forensic"), 3), [NOW - 10, NOW], NOW);
        assert_eq!(a, b);
    }

    #[test]
    fn boost_sums_weights() {
        let p = BooleanPattern([[true, false], [false, true]]);
        assert!((p.boost() - 0.4).abs() < 1e-6);
        let p = BooleanPattern([[false, true], [true, false]]);
        assert!((p.boost() - 0.6).abs() < 1e-6);
    }

    #[test]
    fn serializes_as_nested_arrays() {
        let p = BooleanPattern([[true, true], [false, true]]);
        assert_eq!(
            serde_json::to_string(&p).unwrap(),
            "[[true,true],[false,true]]"
        );
    }
}
