//! Models exchanged with the AI service.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Vision analysis of a single lead photo
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhotoAnalysis {
    pub summary: String,
    #[serde(default)]
    pub detected_issues: Vec<String>,
    #[serde(default)]
    pub materials: Vec<String>,
    #[serde(default)]
    pub estimated_area_sqft: Option<f64>,
    /// 0.0 – 1.0
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScopeTask {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub trade: Option<String>,
}

/// Generated scope of work for a lead
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScopeOfWork {
    pub summary: String,
    #[serde(default)]
    pub tasks: Vec<ScopeTask>,
    #[serde(default)]
    pub assumptions: Vec<String>,
    #[serde(default)]
    pub exclusions: Vec<String>,
}

/// Priced line proposed by the AI; totals are always recomputed locally
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratedLineItem {
    pub description: String,
    pub quantity: Decimal,
    #[serde(default = "default_unit")]
    pub unit: String,
    pub unit_price: Decimal,
}

fn default_unit() -> String {
    "ea".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedEstimate {
    pub line_items: Vec<GeneratedLineItem>,
    #[serde(default)]
    pub notes: Option<String>,
}
