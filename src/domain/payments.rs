use chrono::{DateTime, Duration, Utc};
use rust_decimal::{prelude::ToPrimitive, Decimal};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::round2;
use crate::auth::TenantOwned;
use crate::validation::{Validate, ValidationErrors};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentType {
    Deposit,
    Final,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "DEPOSIT",
            Self::Final => "FINAL",
        }
    }

    pub fn from_db(s: &str) -> Self {
        match s {
            "FINAL" => Self::Final,
            _ => Self::Deposit,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Deposit => "Deposit",
            Self::Final => "Final payment",
        }
    }
}

/// Payment status. PENDING → COMPLETED, or PENDING → FAILED when checkout expires.
/// PENDING → DUPLICATE when the money arrives for something already paid; the
/// contractor refunds those.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Duplicate,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Duplicate => "DUPLICATE",
        }
    }

    pub fn from_db(s: &str) -> Self {
        match s {
            "COMPLETED" => Self::Completed,
            "FAILED" => Self::Failed,
            "DUPLICATE" => Self::Duplicate,
            _ => Self::Pending,
        }
    }
}

/// Amount owed for a new checkout, or `None` when nothing is due.
///
/// DEPOSIT charges the estimate's deposit. FINAL charges whatever remains
/// after completed payments.
pub fn amount_due(
    payment_type: PaymentType,
    total: Decimal,
    deposit_amount: Decimal,
    completed: Decimal,
) -> Option<Decimal> {
    let amount = match payment_type {
        PaymentType::Deposit => deposit_amount,
        PaymentType::Final => total - completed,
    };
    let amount = round2(amount);
    (amount > Decimal::ZERO).then_some(amount)
}

/// Lifetime requested for a hosted checkout session (Stripe allows 30 min to 24 h)
pub const CHECKOUT_SESSION_TTL_MINUTES: i64 = 31;

/// How long a PENDING payment blocks another checkout. Outlives the session.
const PENDING_HOLD_MINUTES: i64 = 35;

/// Why a new checkout cannot be opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutBlocked {
    DepositPaid,
    CheckoutInProgress,
    NothingDue,
}

impl CheckoutBlocked {
    pub fn message(&self) -> &'static str {
        match self {
            Self::DepositPaid => "Deposit has already been paid",
            Self::CheckoutInProgress => "A checkout for this estimate is already in progress",
            Self::NothingDue => "Nothing is due on this estimate",
        }
    }
}

fn completed_of(payments: &[PaymentRow]) -> impl Iterator<Item = &PaymentRow> {
    payments
        .iter()
        .filter(|p| PaymentStatus::from_db(&p.status) == PaymentStatus::Completed)
}

/// Amount to charge for a new checkout, given every payment of the estimate.
///
/// A live PENDING payment of either type blocks the checkout, so two open
/// sessions can never both be paid.
pub fn checkout_amount(
    payment_type: PaymentType,
    total: Decimal,
    deposit_amount: Decimal,
    payments: &[PaymentRow],
    now: DateTime<Utc>,
) -> Result<Decimal, CheckoutBlocked> {
    let deposit_paid = completed_of(payments)
        .any(|p| PaymentType::from_db(&p.payment_type) == PaymentType::Deposit);
    if payment_type == PaymentType::Deposit && deposit_paid {
        return Err(CheckoutBlocked::DepositPaid);
    }

    let hold = Duration::minutes(PENDING_HOLD_MINUTES);
    let in_progress = payments.iter().any(|p| {
        PaymentStatus::from_db(&p.status) == PaymentStatus::Pending && p.created_at + hold > now
    });
    if in_progress {
        return Err(CheckoutBlocked::CheckoutInProgress);
    }

    let completed: Decimal = completed_of(payments).map(|p| p.amount).sum();
    amount_due(payment_type, total, deposit_amount, completed).ok_or(CheckoutBlocked::NothingDue)
}

/// Whether a captured payment still applies to the estimate, checked against
/// the other payments at settlement time
pub fn settles_as(
    payment: &PaymentRow,
    total: Decimal,
    payments: &[PaymentRow],
) -> PaymentStatus {
    let others: Vec<&PaymentRow> = completed_of(payments).filter(|p| p.id != payment.id).collect();
    let applies = match PaymentType::from_db(&payment.payment_type) {
        PaymentType::Deposit => !others
            .iter()
            .any(|p| PaymentType::from_db(&p.payment_type) == PaymentType::Deposit),
        PaymentType::Final => {
            let completed: Decimal = others.iter().map(|p| p.amount).sum();
            payment.amount <= total - completed
        }
    };
    if applies {
        PaymentStatus::Completed
    } else {
        PaymentStatus::Duplicate
    }
}

/// Amount in the currency's minor unit (cents)
pub fn to_minor_units(amount: Decimal) -> Option<i64> {
    (round2(amount) * Decimal::ONE_HUNDRED).to_i64()
}

/// Payment entity
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PaymentRow {
    pub id: Uuid,
    pub estimate_id: Uuid,
    pub contractor_id: Uuid,
    pub payment_type: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: String,
    pub checkout_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

pub const PAYMENT_COLUMNS: &str = "id, estimate_id, contractor_id, payment_type, amount, \
     currency, status, checkout_session_id, created_at, completed_at";

impl TenantOwned for PaymentRow {
    fn contractor_id(&self) -> Uuid {
        self.contractor_id
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentResponse {
    pub id: Uuid,
    pub estimate_id: Uuid,
    pub payment_type: PaymentType,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<PaymentRow> for PaymentResponse {
    fn from(p: PaymentRow) -> Self {
        Self {
            id: p.id,
            estimate_id: p.estimate_id,
            payment_type: PaymentType::from_db(&p.payment_type),
            amount: p.amount,
            currency: p.currency,
            status: PaymentStatus::from_db(&p.status),
            created_at: p.created_at,
            completed_at: p.completed_at,
        }
    }
}

/// Homeowner request for a hosted checkout
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    pub token: String,
    pub payment_type: PaymentType,
}

impl Validate for CheckoutRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        errors.required("token", &self.token);
        errors.max_len("token", &self.token, 64);
        errors.into_result()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutResponse {
    pub url: String,
    pub session_id: String,
    pub payment_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
}
