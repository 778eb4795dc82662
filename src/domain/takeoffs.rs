//! Takeoffs: the stored result of analyzing a lead's photos.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use std::collections::HashSet;
use uuid::Uuid;

use super::ai::{PhotoAnalysis, ScopeOfWork};
use super::leads::LeadRow;

/// Combined view over every successfully analyzed photo
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregateAnalysis {
    pub photo_count: usize,
    pub detected_issues: Vec<String>,
    pub materials: Vec<String>,
    pub total_area_sqft: Option<f64>,
    pub average_confidence: f64,
}

/// Union of `items` in first-seen order, ignoring case
fn merge_unique<'a>(items: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.to_lowercase()))
        .map(str::to_string)
        .collect()
}

pub fn aggregate(analyses: &[PhotoAnalysis]) -> AggregateAnalysis {
    let areas: Vec<f64> = analyses
        .iter()
        .filter_map(|a| a.estimated_area_sqft)
        .filter(|a| a.is_finite() && *a >= 0.0)
        .collect();

    let average_confidence = if analyses.is_empty() {
        0.0
    } else {
        let sum: f64 = analyses.iter().map(|a| a.confidence.clamp(0.0, 1.0)).sum();
        sum / analyses.len() as f64
    };

    AggregateAnalysis {
        photo_count: analyses.len(),
        detected_issues: merge_unique(analyses.iter().flat_map(|a| a.detected_issues.iter())),
        materials: merge_unique(analyses.iter().flat_map(|a| a.materials.iter())),
        total_area_sqft: if areas.is_empty() {
            None
        } else {
            Some(areas.iter().sum())
        },
        average_confidence,
    }
}

/// Everything the lead score depends on
#[derive(Debug, Clone)]
pub struct ScoreInputs<'a> {
    pub average_confidence: f64,
    pub analyzed_photos: usize,
    pub budget_min: Option<Decimal>,
    pub budget_max: Option<Decimal>,
    pub timeline: Option<&'a str>,
    pub description_len: usize,
    pub has_phone: bool,
}

impl<'a> ScoreInputs<'a> {
    pub fn new(lead: &'a LeadRow, aggregate: &AggregateAnalysis) -> Self {
        Self {
            average_confidence: aggregate.average_confidence,
            analyzed_photos: aggregate.photo_count,
            budget_min: lead.budget_min,
            budget_max: lead.budget_max,
            timeline: lead.timeline.as_deref(),
            description_len: lead.description.trim().chars().count(),
            has_phone: lead
                .homeowner_phone
                .as_deref()
                .is_some_and(|p| !p.trim().is_empty()),
        }
    }
}

fn budget_points(budget: Option<Decimal>) -> i32 {
    match budget {
        None => 0,
        Some(b) if b < Decimal::from(1_000) => 5,
        Some(b) if b < Decimal::from(5_000) => 10,
        Some(b) if b < Decimal::from(20_000) => 15,
        Some(_) => 20,
    }
}

fn timeline_points(timeline: Option<&str>) -> i32 {
    match timeline {
        Some("asap") => 15,
        Some("within_1_month") => 12,
        Some("1_3_months") => 8,
        Some("3_6_months") => 5,
        Some("flexible") => 3,
        _ => 0,
    }
}

/// Lead quality score in 0..=100
pub fn score_lead(inputs: &ScoreInputs<'_>) -> i32 {
    let confidence = if inputs.average_confidence.is_finite() {
        inputs.average_confidence.clamp(0.0, 1.0)
    } else {
        0.0
    };

    let mut score = (confidence * 30.0).round() as i32;
    score += (inputs.analyzed_photos.min(5) as i32) * 4;
    score += budget_points(inputs.budget_max.or(inputs.budget_min));
    score += timeline_points(inputs.timeline);
    score += match inputs.description_len {
        n if n >= 200 => 10,
        n if n >= 50 => 5,
        _ => 0,
    };
    if inputs.has_phone {
        score += 5;
    }

    score.clamp(0, 100)
}

/// Takeoff entity
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TakeoffRow {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub contractor_id: Uuid,
    pub photo_analyses: Json<Vec<PhotoAnalysis>>,
    pub aggregate: Json<AggregateAnalysis>,
    pub scope_of_work: Json<ScopeOfWork>,
    pub score: i32,
    pub created_at: DateTime<Utc>,
}

pub const TAKEOFF_COLUMNS: &str =
    "id, lead_id, contractor_id, photo_analyses, aggregate, scope_of_work, score, created_at";

#[derive(Debug, Clone, Serialize)]
pub struct TakeoffResponse {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub photo_analyses: Vec<PhotoAnalysis>,
    pub aggregate: AggregateAnalysis,
    pub scope_of_work: ScopeOfWork,
    pub score: i32,
    pub created_at: DateTime<Utc>,
}

impl From<TakeoffRow> for TakeoffResponse {
    fn from(t: TakeoffRow) -> Self {
        Self {
            id: t.id,
            lead_id: t.lead_id,
            photo_analyses: t.photo_analyses.0,
            aggregate: t.aggregate.0,
            scope_of_work: t.scope_of_work.0,
            score: t.score,
            created_at: t.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeResponse {
    pub takeoff: TakeoffResponse,
    pub score: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn analysis(issues: &[&str], materials: &[&str], area: Option<f64>, confidence: f64) -> PhotoAnalysis {
        PhotoAnalysis {
            summary: "photo".to_string(),
            detected_issues: issues.iter().map(|s| s.to_string()).collect(),
            materials: materials.iter().map(|s| s.to_string()).collect(),
            estimated_area_sqft: area,
            confidence,
        }
    }

    #[test]
    fn aggregate_merges_and_averages() {
        let agg = aggregate(&[
            analysis(&["Missing shingles", "Water stain"], &["asphalt"], Some(400.0), 0.9),
            analysis(&["missing shingles", "Rotten fascia"], &["Asphalt", "wood"], None, 0.5),
        ]);
        assert_eq!(agg.photo_count, 2);
        assert_eq!(
            agg.detected_issues,
            vec!["Missing shingles", "Water stain", "Rotten fascia"]
        );
        assert_eq!(agg.materials, vec!["asphalt", "wood"]);
        assert_eq!(agg.total_area_sqft, Some(400.0));
        assert!((agg.average_confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn aggregate_of_nothing_is_empty() {
        let agg = aggregate(&[]);
        assert_eq!(agg.photo_count, 0);
        assert_eq!(agg.total_area_sqft, None);
        assert_eq!(agg.average_confidence, 0.0);
    }

    #[test]
    fn strong_lead_scores_full_marks() {
        let inputs = ScoreInputs {
            average_confidence: 1.0,
            analyzed_photos: 6,
            budget_min: None,
            budget_max: Some(Decimal::from(25_000)),
            timeline: Some("asap"),
            description_len: 250,
            has_phone: true,
        };
        assert_eq!(score_lead(&inputs), 100);
    }

    #[test]
    fn weak_lead_scores_low() {
        let inputs = ScoreInputs {
            average_confidence: 0.2,
            analyzed_photos: 1,
            budget_min: None,
            budget_max: None,
            timeline: None,
            description_len: 10,
            has_phone: false,
        };
        // 6 (confidence) + 4 (one photo)
        assert_eq!(score_lead(&inputs), 10);
    }

    #[test]
    fn budget_min_used_when_max_missing() {
        assert_eq!(budget_points(Some(Decimal::from(4_999))), 10);
        let inputs = ScoreInputs {
            average_confidence: 0.0,
            analyzed_photos: 0,
            budget_min: Some(Decimal::from(7_500)),
            budget_max: None,
            timeline: None,
            description_len: 0,
            has_phone: false,
        };
        assert_eq!(score_lead(&inputs), 15);
    }

    proptest! {
        #[test]
        fn score_is_always_within_bounds(
            confidence in proptest::num::f64::ANY,
            photos in 0usize..50,
            budget in proptest::option::of(-100_000i64..1_000_000),
            description_len in 0usize..10_000,
            has_phone in any::<bool>(),
        ) {
            let inputs = ScoreInputs {
                average_confidence: confidence,
                analyzed_photos: photos,
                budget_min: None,
                budget_max: budget.map(Decimal::from),
                timeline: Some("within_1_month"),
                description_len,
                has_phone,
            };
            let score = score_lead(&inputs);
            prop_assert!((0..=100).contains(&score));
        }
    }
}
