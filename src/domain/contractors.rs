use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

/// Contractor (tenant) entity
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Contractor {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub email: String,
    pub phone: Option<String>,
    /// Fraction, e.g. 0.0825
    pub tax_rate: Decimal,
    /// Percent of the total collected up front, e.g. 30
    pub deposit_percent: Decimal,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContractorResponse {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub email: String,
    pub phone: Option<String>,
    pub tax_rate: Decimal,
    pub deposit_percent: Decimal,
    pub currency: String,
}

impl From<Contractor> for ContractorResponse {
    fn from(c: Contractor) -> Self {
        Self {
            id: c.id,
            name: c.name,
            slug: c.slug,
            email: c.email,
            phone: c.phone,
            tax_rate: c.tax_rate,
            deposit_percent: c.deposit_percent,
            currency: c.currency,
        }
    }
}

/// Columns selected for `Contractor`
pub const CONTRACTOR_COLUMNS: &str =
    "id, name, slug, email, phone, tax_rate, deposit_percent, currency, created_at";
