use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::{distributions::Alphanumeric, Rng};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sqlx::types::Json;
use uuid::Uuid;

use super::ai::GeneratedLineItem;
use super::{round2, MAX_AMOUNT};
use crate::auth::TenantOwned;
use crate::validation::{Validate, ValidationErrors};

pub const MAX_LINE_ITEMS: usize = 200;
pub const MAX_QUANTITY: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);
pub const MAX_UNIT_PRICE: Decimal = Decimal::from_parts(100_000_000, 0, 0, false, 0);
const PUBLIC_TOKEN_LEN: usize = 32;

/// Estimate status. DRAFT → SENT → ACCEPTED.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EstimateStatus {
    Draft,
    Sent,
    Accepted,
}

impl EstimateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Sent => "SENT",
            Self::Accepted => "ACCEPTED",
        }
    }

    pub fn from_db(s: &str) -> Self {
        match s {
            "SENT" => Self::Sent,
            "ACCEPTED" => Self::Accepted,
            _ => Self::Draft,
        }
    }

    pub fn is_editable(&self) -> bool {
        matches!(self, Self::Draft)
    }

    /// Visible on the public link and payable
    pub fn is_published(&self) -> bool {
        matches!(self, Self::Sent | Self::Accepted)
    }
}

/// Random secret that lets a homeowner open an estimate without an account
pub fn generate_public_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PUBLIC_TOKEN_LEN)
        .map(char::from)
        .collect()
}

type HmacSha256 = Hmac<Sha256>;

/// Constant-time comparison of a presented public token
pub fn public_token_matches(expected: &str, presented: &str) -> bool {
    let tag = |token: &str| {
        HmacSha256::new_from_slice(b"quotecraft-public-token").map(|mut mac| {
            mac.update(token.as_bytes());
            mac
        })
    };
    match (tag(expected), tag(presented)) {
        (Ok(expected), Ok(presented)) => presented
            .verify_slice(&expected.finalize().into_bytes())
            .is_ok(),
        _ => false,
    }
}

/// Line item as entered by a contractor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItemInput {
    pub description: String,
    pub quantity: Decimal,
    #[serde(default = "default_unit")]
    pub unit: String,
    pub unit_price: Decimal,
}

fn default_unit() -> String {
    "ea".to_string()
}

impl From<GeneratedLineItem> for LineItemInput {
    fn from(g: GeneratedLineItem) -> Self {
        Self {
            description: g.description,
            quantity: g.quantity,
            unit: g.unit,
            unit_price: g.unit_price,
        }
    }
}

fn validate_line_items(errors: &mut ValidationErrors, items: &[LineItemInput]) {
    if items.is_empty() {
        errors.add("line_items", "must contain at least one item");
    }
    if items.len() > MAX_LINE_ITEMS {
        errors.add(
            "line_items",
            format!("must contain at most {} items", MAX_LINE_ITEMS),
        );
    }
    for (i, item) in items.iter().enumerate() {
        let mut item_errors = ValidationErrors::default();
        item_errors.required("description", &item.description);
        item_errors.max_len("description", &item.description, 500);
        item_errors.max_len("unit", &item.unit, 20);
        if item.quantity <= Decimal::ZERO {
            item_errors.add("quantity", "must be greater than zero");
        } else if item.quantity > MAX_QUANTITY {
            item_errors.add("quantity", format!("must be at most {}", MAX_QUANTITY));
        }
        if item.unit_price.is_sign_negative() {
            item_errors.add("unit_price", "must not be negative");
        } else if item.unit_price > MAX_UNIT_PRICE {
            item_errors.add("unit_price", format!("must be at most {}", MAX_UNIT_PRICE));
        }
        errors.nest(&format!("line_items[{}]", i), item_errors);
    }
}

/// Priced line item with its computed total
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineItem {
    pub description: String,
    pub quantity: Decimal,
    pub unit: String,
    pub unit_price: Decimal,
    pub total: Decimal,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct EstimateTotals {
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
    pub deposit_amount: Decimal,
}

/// Price every line and derive subtotal, tax, total and deposit.
///
/// Fails on `line_items` when any amount would not fit a money column.
pub fn compute_totals(
    items: Vec<LineItemInput>,
    tax_rate: Decimal,
    deposit_percent: Decimal,
) -> Result<(Vec<LineItem>, EstimateTotals), ValidationErrors> {
    fn too_large() -> ValidationErrors {
        let mut errors = ValidationErrors::default();
        errors.add(
            "line_items",
            format!("estimate total must not exceed {}", MAX_AMOUNT),
        );
        errors
    }
    let bounded = |value: Option<Decimal>| value.filter(|v| *v <= MAX_AMOUNT).ok_or_else(too_large);

    let mut priced = Vec::with_capacity(items.len());
    let mut subtotal = Decimal::ZERO;
    for item in items {
        let total = bounded(item.quantity.checked_mul(item.unit_price).map(round2))?;
        subtotal = bounded(subtotal.checked_add(total))?;
        priced.push(LineItem {
            total,
            description: item.description.trim().to_string(),
            quantity: item.quantity,
            unit: item.unit,
            unit_price: item.unit_price,
        });
    }

    let tax_amount = bounded(subtotal.checked_mul(tax_rate).map(round2))?;
    let total = bounded(subtotal.checked_add(tax_amount))?;
    let deposit_amount = bounded(
        total
            .checked_mul(deposit_percent)
            .and_then(|v| v.checked_div(Decimal::ONE_HUNDRED))
            .map(round2),
    )?;

    Ok((
        priced,
        EstimateTotals {
            subtotal,
            tax_amount,
            total,
            deposit_amount,
        },
    ))
}

/// Estimate entity
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EstimateRow {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub contractor_id: Uuid,
    pub takeoff_id: Option<Uuid>,
    pub status: String,
    pub line_items: Json<Vec<LineItem>>,
    pub subtotal: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
    pub deposit_percent: Decimal,
    pub deposit_amount: Decimal,
    pub currency: String,
    pub notes: Option<String>,
    pub public_token: String,
    pub valid_until: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const ESTIMATE_COLUMNS: &str = "id, lead_id, contractor_id, takeoff_id, status, line_items, \
     subtotal, tax_rate, tax_amount, total, deposit_percent, deposit_amount, currency, notes, \
     public_token, valid_until, sent_at, accepted_at, created_at, updated_at";

impl TenantOwned for EstimateRow {
    fn contractor_id(&self) -> Uuid {
        self.contractor_id
    }
}

impl EstimateRow {
    pub fn status(&self) -> EstimateStatus {
        EstimateStatus::from_db(&self.status)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EstimateResponse {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub takeoff_id: Option<Uuid>,
    pub status: EstimateStatus,
    pub line_items: Vec<LineItem>,
    pub subtotal: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
    pub deposit_percent: Decimal,
    pub deposit_amount: Decimal,
    pub currency: String,
    pub notes: Option<String>,
    pub public_token: String,
    pub valid_until: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<EstimateRow> for EstimateResponse {
    fn from(e: EstimateRow) -> Self {
        Self {
            status: e.status(),
            id: e.id,
            lead_id: e.lead_id,
            takeoff_id: e.takeoff_id,
            line_items: e.line_items.0,
            subtotal: e.subtotal,
            tax_rate: e.tax_rate,
            tax_amount: e.tax_amount,
            total: e.total,
            deposit_percent: e.deposit_percent,
            deposit_amount: e.deposit_amount,
            currency: e.currency,
            notes: e.notes,
            public_token: e.public_token,
            valid_until: e.valid_until,
            sent_at: e.sent_at,
            accepted_at: e.accepted_at,
            created_at: e.created_at,
            updated_at: e.updated_at,
        }
    }
}

/// What a homeowner sees on the public link
#[derive(Debug, Clone, Serialize)]
pub struct PublicEstimateResponse {
    pub id: Uuid,
    pub contractor_name: String,
    pub homeowner_name: String,
    pub project_type: String,
    pub status: EstimateStatus,
    pub line_items: Vec<LineItem>,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
    pub deposit_amount: Decimal,
    pub amount_paid: Decimal,
    pub currency: String,
    pub notes: Option<String>,
    pub valid_until: Option<DateTime<Utc>>,
}

/// Contractor adjustments to a draft estimate
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateEstimateRequest {
    #[serde(default)]
    pub line_items: Option<Vec<LineItemInput>>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
}

impl Validate for UpdateEstimateRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        if self.line_items.is_none() && self.notes.is_none() && self.valid_until.is_none() {
            errors.add("body", "at least one of line_items, notes, valid_until is required");
        }
        if let Some(items) = &self.line_items {
            validate_line_items(&mut errors, items);
        }
        if let Some(notes) = &self.notes {
            errors.max_len("notes", notes, 5000);
        }
        if let Some(valid_until) = self.valid_until {
            if valid_until <= Utc::now() {
                errors.add("valid_until", "must be in the future");
            }
        }
        errors.into_result()
    }
}

/// Reject AI output that would not pass contractor validation either
pub fn validate_generated(items: &[LineItemInput]) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();
    validate_line_items(&mut errors, items);
    errors.into_result()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn item(description: &str, quantity: &str, unit_price: &str) -> LineItemInput {
        LineItemInput {
            description: description.to_string(),
            quantity: dec(quantity),
            unit: "sqft".to_string(),
            unit_price: dec(unit_price),
        }
    }

    #[test]
    fn totals_are_recomputed_from_lines() {
        let (lines, totals) = compute_totals(
            vec![
                item("Tear-off", "1200", "1.25"),
                item("Architectural shingles", "12.5", "389.99"),
                item("Drip edge", "3", "0.335"),
            ],
            dec("0.0825"),
            dec("30"),
        )
        .unwrap();

        assert_eq!(lines[0].total, dec("1500.00"));
        // 12.5 * 389.99 = 4874.875 → 4874.88
        assert_eq!(lines[1].total, dec("4874.88"));
        // 3 * 0.335 = 1.005 → 1.01
        assert_eq!(lines[2].total, dec("1.01"));
        assert_eq!(totals.subtotal, dec("6375.89"));
        // 6375.89 * 0.0825 = 526.010925 → 526.01
        assert_eq!(totals.tax_amount, dec("526.01"));
        assert_eq!(totals.total, dec("6901.90"));
        // 30% of 6901.90 = 2070.57
        assert_eq!(totals.deposit_amount, dec("2070.57"));
    }

    #[test]
    fn zero_tax_and_deposit() {
        let (_, totals) =
            compute_totals(vec![item("Labor", "8", "75")], Decimal::ZERO, Decimal::ZERO).unwrap();
        assert_eq!(totals.total, dec("600"));
        assert_eq!(totals.deposit_amount, Decimal::ZERO);
    }

    #[test]
    fn update_requires_some_change() {
        let req = UpdateEstimateRequest {
            line_items: None,
            notes: None,
            valid_until: None,
        };
        assert!(req.validate().unwrap_err().contains("body"));
    }

    #[test]
    fn line_item_rules() {
        let req = UpdateEstimateRequest {
            line_items: Some(vec![item("", "0", "-1")]),
            notes: None,
            valid_until: None,
        };
        let errors = req.validate().unwrap_err();
        assert!(errors.contains("line_items[0].description"));
        assert!(errors.contains("line_items[0].quantity"));
        assert!(errors.contains("line_items[0].unit_price"));
    }

    #[test]
    fn oversized_quantities_and_prices_are_rejected() {
        let req = UpdateEstimateRequest {
            line_items: Some(vec![item(
                "Everything",
                "100000000000000000000",
                "100000000000000000000",
            )]),
            notes: None,
            valid_until: None,
        };
        let errors = req.validate().unwrap_err();
        assert!(errors.contains("line_items[0].quantity"));
        assert!(errors.contains("line_items[0].unit_price"));
    }

    #[test]
    fn totals_beyond_money_column_are_rejected() {
        // Each item passes its own bounds, the product does not fit NUMERIC(12, 2)
        let err = compute_totals(
            vec![item("Bulk", "1000000", "1000000")],
            Decimal::ZERO,
            Decimal::ZERO,
        )
        .unwrap_err();
        assert!(err.contains("line_items"));

        let err = compute_totals(
            vec![item("Huge", "100000000000000000000", "100000000000000000000")],
            Decimal::ZERO,
            Decimal::ZERO,
        )
        .unwrap_err();
        assert!(err.contains("line_items"));
    }

    #[test]
    fn tax_can_push_total_over_the_limit() {
        let err = compute_totals(
            vec![item("Near limit", "1", "99999999.99"), item("More", "100", "99000000")],
            dec("0.5"),
            Decimal::ZERO,
        )
        .unwrap_err();
        assert!(err.contains("line_items"));
    }

    #[test]
    fn public_tokens_are_unique_alphanumeric() {
        let a = generate_public_token();
        let b = generate_public_token();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn public_token_comparison() {
        let token = generate_public_token();
        assert!(public_token_matches(&token, &token));
        assert!(!public_token_matches(&token, &token[..31]));
        assert!(!public_token_matches(&token, ""));
        assert!(!public_token_matches(&token, &generate_public_token()));
    }

    #[test]
    fn published_statuses() {
        assert!(!EstimateStatus::Draft.is_published());
        assert!(EstimateStatus::Sent.is_published());
        assert!(EstimateStatus::Accepted.is_published());
        assert!(EstimateStatus::Draft.is_editable());
        assert!(!EstimateStatus::Sent.is_editable());
    }
}
