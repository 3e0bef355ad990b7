//! §4.6 scoring: `score = base_relevance × success_rate × confidence ×
//! decay × similarity`. Pure arithmetic over a `Learning` snapshot and a
//! query context; no Store access here, mirroring `TriggerEngine`'s
//! separation of pure decision logic from the I/O that gathers its inputs.

use crate::domain::{Learning, ScaleLevel};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

#[derive(Debug, Clone)]
pub struct ScoreRequest {
    pub scale_level: ScaleLevel,
    pub project_type: String,
    pub tags: BTreeSet<String>,
}

/// §4.6 decay: piecewise-linear in `days_old`, floored at 0.5.
pub fn decay(indexed_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let days_old = now.signed_duration_since(indexed_at).num_seconds() as f64 / 86_400.0;
    if days_old <= 30.0 {
        1.0
    } else if days_old <= 90.0 {
        1.0 - (days_old - 30.0) / 60.0 * 0.2
    } else if days_old <= 180.0 {
        0.8 - (days_old - 90.0) / 90.0 * 0.2
    } else {
        0.5
    }
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

/// §4.6 similarity: weighted sum of scale proximity, project-type match,
/// tag Jaccard overlap, and a flat category-universal bonus, clamped to
/// `[0, 1]`.
pub fn similarity(learning: &Learning, request: &ScoreRequest) -> f64 {
    let scale_diff = (learning.scale_level as i32 - request.scale_level as i32).unsigned_abs();
    let scale_term = match scale_diff {
        0 => 0.3,
        1 => 0.15,
        _ => 0.0,
    };
    let project_term = if learning.project_type == request.project_type {
        0.2
    } else {
        0.0
    };
    let tag_term = jaccard(&learning.tags, &request.tags) * 0.3;
    let category_term = if learning.category.is_universal() { 0.2 } else { 0.0 };

    (scale_term + project_term + tag_term + category_term).clamp(0.0, 1.0)
}

/// Full §4.6 score for one learning against one request, at the given
/// instant (passed explicitly rather than read from the clock, so scoring
/// stays a pure function of its inputs).
pub fn score(learning: &Learning, request: &ScoreRequest, now: DateTime<Utc>) -> f64 {
    learning.base_relevance
        * learning.success_rate
        * learning.confidence_score
        * decay(learning.indexed_at, now)
        * similarity(learning, request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LearningCategory;

    fn learning_with(tags: &[&str], scale_level: ScaleLevel, project_type: &str) -> Learning {
        Learning {
            id: 1,
            category: LearningCategory::Quality,
            text: "write integration tests for auth flows".to_string(),
            tags: tags.iter().map(|s| s.to_string()).collect(),
            scale_level,
            project_type: project_type.to_string(),
            base_relevance: 0.9,
            application_count: 1,
            success_rate: 1.0,
            confidence_score: Learning::compute_confidence(1, 1.0),
            indexed_at: Utc::now(),
            superseded_by: None,
        }
    }

    #[test]
    fn decay_is_exactly_one_when_freshly_indexed() {
        let now = Utc::now();
        assert_eq!(decay(now, now), 1.0);
    }

    #[test]
    fn decay_at_180_days_is_point_six_not_point_five() {
        let indexed_at = Utc::now() - chrono::Duration::days(180);
        let now = Utc::now();
        assert!((decay(indexed_at, now) - 0.6).abs() < 1e-6);
    }

    #[test]
    fn decay_past_180_days_floors_at_point_five() {
        let indexed_at = Utc::now() - chrono::Duration::days(400);
        let now = Utc::now();
        assert_eq!(decay(indexed_at, now), 0.5);
    }

    #[test]
    fn low_tag_overlap_falls_below_threshold_high_overlap_clears_it() {
        let learning = learning_with(&["auth", "api"], 3, "backend-service");
        let low_overlap = ScoreRequest {
            scale_level: 3,
            project_type: "frontend-app".to_string(),
            tags: ["auth", "frontend"].into_iter().map(String::from).collect(),
        };
        let high_overlap = ScoreRequest {
            scale_level: 3,
            project_type: "backend-service".to_string(),
            tags: ["auth", "api"].into_iter().map(String::from).collect(),
        };
        let now = Utc::now();
        let low_score = score(&learning, &low_overlap, now);
        let high_score = score(&learning, &high_overlap, now);
        assert!(low_score < 0.3, "expected below threshold, got {low_score}");
        assert!(high_score > low_score);
        assert!(high_score >= 0.3, "expected above threshold, got {high_score}");
    }
}
