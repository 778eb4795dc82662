use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::documents::FileType;
use super::takeoffs::TakeoffResponse;
use super::MAX_AMOUNT;
use crate::auth::TenantOwned;
use crate::validation::{Validate, ValidationErrors};

/// Photos accepted with one intake submission
pub const MAX_INTAKE_PHOTOS: usize = 10;

pub const TIMELINES: &[&str] = &[
    "asap",
    "within_1_month",
    "1_3_months",
    "3_6_months",
    "flexible",
];

/// Lead status. Moves forward only: NEW → QUALIFIED → ESTIMATED.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeadStatus {
    #[default]
    New,
    Qualified,
    Estimated,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Qualified => "QUALIFIED",
            Self::Estimated => "ESTIMATED",
        }
    }

    pub fn from_db(s: &str) -> Self {
        match s {
            "QUALIFIED" => Self::Qualified,
            "ESTIMATED" => Self::Estimated,
            _ => Self::New,
        }
    }

    pub fn can_transition_to(&self, next: LeadStatus) -> bool {
        next >= *self
    }

    /// Status after a pipeline step that reaches `target`; never moves backwards
    pub fn advanced_to(self, target: LeadStatus) -> LeadStatus {
        self.max(target)
    }
}

/// Lead entity
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LeadRow {
    pub id: Uuid,
    pub contractor_id: Uuid,
    pub homeowner_name: String,
    pub homeowner_email: String,
    pub homeowner_phone: Option<String>,
    pub address: Option<String>,
    pub project_type: String,
    pub description: String,
    pub budget_min: Option<Decimal>,
    pub budget_max: Option<Decimal>,
    pub timeline: Option<String>,
    pub status: String,
    pub score: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TenantOwned for LeadRow {
    fn contractor_id(&self) -> Uuid {
        self.contractor_id
    }
}

impl LeadRow {
    pub fn status(&self) -> LeadStatus {
        LeadStatus::from_db(&self.status)
    }
}

/// Columns selected for `LeadRow`
pub const LEAD_COLUMNS: &str = "id, contractor_id, homeowner_name, homeowner_email, \
     homeowner_phone, address, project_type, description, budget_min, budget_max, \
     timeline, status, score, created_at, updated_at";

#[derive(Debug, Clone, Serialize)]
pub struct LeadResponse {
    pub id: Uuid,
    pub homeowner_name: String,
    pub homeowner_email: String,
    pub homeowner_phone: Option<String>,
    pub address: Option<String>,
    pub project_type: String,
    pub description: String,
    pub budget_min: Option<Decimal>,
    pub budget_max: Option<Decimal>,
    pub timeline: Option<String>,
    pub status: LeadStatus,
    pub score: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<LeadRow> for LeadResponse {
    fn from(l: LeadRow) -> Self {
        Self {
            status: l.status(),
            id: l.id,
            homeowner_name: l.homeowner_name,
            homeowner_email: l.homeowner_email,
            homeowner_phone: l.homeowner_phone,
            address: l.address,
            project_type: l.project_type,
            description: l.description,
            budget_min: l.budget_min,
            budget_max: l.budget_max,
            timeline: l.timeline,
            score: l.score,
            created_at: l.created_at,
            updated_at: l.updated_at,
        }
    }
}

/// Photo attached to a lead
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PhotoRow {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub storage_key: String,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
}

pub const PHOTO_COLUMNS: &str =
    "id, lead_id, storage_key, file_name, content_type, size_bytes, created_at";

/// Photo already uploaded to the contractor's intake prefix
#[derive(Debug, Clone, Deserialize)]
pub struct IntakePhoto {
    pub storage_key: String,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
}

/// Public intake form submission
#[derive(Debug, Clone, Deserialize)]
pub struct CreateLeadRequest {
    pub contractor_slug: String,
    pub homeowner_name: String,
    pub homeowner_email: String,
    #[serde(default)]
    pub homeowner_phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    pub project_type: String,
    pub description: String,
    #[serde(default)]
    pub budget_min: Option<Decimal>,
    #[serde(default)]
    pub budget_max: Option<Decimal>,
    #[serde(default)]
    pub timeline: Option<String>,
    #[serde(default)]
    pub photos: Vec<IntakePhoto>,
}

impl Validate for CreateLeadRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();

        errors.required("contractor_slug", &self.contractor_slug);
        errors.required("homeowner_name", &self.homeowner_name);
        errors.max_len("homeowner_name", &self.homeowner_name, 200);
        errors.email("homeowner_email", &self.homeowner_email);
        if let Some(phone) = self.homeowner_phone.as_deref().filter(|p| !p.trim().is_empty()) {
            errors.phone("homeowner_phone", phone);
        }
        if let Some(address) = &self.address {
            errors.max_len("address", address, 500);
        }
        errors.required("project_type", &self.project_type);
        errors.max_len("project_type", &self.project_type, 100);
        errors.required("description", &self.description);
        errors.max_len("description", &self.description, 5000);

        for (field, value) in [("budget_min", self.budget_min), ("budget_max", self.budget_max)] {
            if value.is_some_and(|v| v.is_sign_negative()) {
                errors.add(field, "must not be negative");
            } else if value.is_some_and(|v| v > MAX_AMOUNT) {
                errors.add(field, format!("must be at most {}", MAX_AMOUNT));
            }
        }
        if let (Some(min), Some(max)) = (self.budget_min, self.budget_max) {
            if min > max {
                errors.add("budget_max", "must be greater than or equal to budget_min");
            }
        }
        if let Some(timeline) = &self.timeline {
            errors.one_of("timeline", timeline, TIMELINES);
        }

        if self.photos.len() > MAX_INTAKE_PHOTOS {
            errors.add(
                "photos",
                format!("at most {} photos can be attached", MAX_INTAKE_PHOTOS),
            );
        }
        for (i, photo) in self.photos.iter().enumerate() {
            let mut photo_errors = ValidationErrors::default();
            photo_errors.required("storage_key", &photo.storage_key);
            photo_errors.required("file_name", &photo.file_name);
            if !FileType::Photo.accepts(&photo.content_type) {
                photo_errors.add("content_type", "must be an image");
            }
            if photo.size_bytes <= 0 {
                photo_errors.add("size_bytes", "must be greater than zero");
            }
            errors.nest(&format!("photos[{}]", i), photo_errors);
        }

        errors.into_result()
    }
}

/// Contractor-side lead update
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateLeadRequest {
    pub status: LeadStatus,
}

impl Validate for UpdateLeadRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        Ok(())
    }
}

/// Query parameters for listing leads
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LeadListQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub status: Option<LeadStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateLeadResponse {
    pub lead: LeadResponse,
    pub photos: Vec<PhotoRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeadDetailResponse {
    pub lead: LeadResponse,
    pub photos: Vec<PhotoRow>,
    pub latest_takeoff: Option<TakeoffResponse>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CreateLeadRequest {
        CreateLeadRequest {
            contractor_slug: "acme-roofing".to_string(),
            homeowner_name: "Dana Homeowner".to_string(),
            homeowner_email: "dana@example.com".to_string(),
            homeowner_phone: Some("555-201-3344".to_string()),
            address: Some("12 Elm St".to_string()),
            project_type: "roof_repair".to_string(),
            description: "Shingles blew off in the storm.".to_string(),
            budget_min: Some(Decimal::from(1000)),
            budget_max: Some(Decimal::from(5000)),
            timeline: Some("asap".to_string()),
            photos: vec![],
        }
    }

    #[test]
    fn valid_request_passes() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn inverted_budget_is_rejected() {
        let mut req = request();
        req.budget_min = Some(Decimal::from(9000));
        let errors = req.validate().unwrap_err();
        assert!(errors.contains("budget_max"));
    }

    #[test]
    fn budget_beyond_money_column_is_rejected() {
        let mut req = request();
        req.budget_max = Some(Decimal::from(10_000_000_000_i64));
        let errors = req.validate().unwrap_err();
        assert!(errors.contains("budget_max"));
        assert!(!errors.contains("budget_min"));
    }

    #[test]
    fn too_many_photos_is_rejected() {
        let mut req = request();
        req.photos = (0..=MAX_INTAKE_PHOTOS)
            .map(|i| IntakePhoto {
                storage_key: format!("c/intake/photo/{}.jpg", i),
                file_name: format!("{}.jpg", i),
                content_type: "image/jpeg".to_string(),
                size_bytes: 100,
            })
            .collect();
        assert!(req.validate().unwrap_err().contains("photos"));
    }

    #[test]
    fn photo_errors_name_the_index() {
        let mut req = request();
        req.photos = vec![IntakePhoto {
            storage_key: "c/intake/photo/a.gif".to_string(),
            file_name: "a.gif".to_string(),
            content_type: "image/gif".to_string(),
            size_bytes: 100,
        }];
        assert!(req.validate().unwrap_err().contains("photos[0].content_type"));
    }

    #[test]
    fn unknown_timeline_is_rejected() {
        let mut req = request();
        req.timeline = Some("someday".to_string());
        assert!(req.validate().unwrap_err().contains("timeline"));
    }

    #[test]
    fn status_moves_forward_only() {
        assert!(LeadStatus::New.can_transition_to(LeadStatus::Qualified));
        assert!(LeadStatus::Qualified.can_transition_to(LeadStatus::Qualified));
        assert!(!LeadStatus::Estimated.can_transition_to(LeadStatus::New));
        assert_eq!(
            LeadStatus::Estimated.advanced_to(LeadStatus::Qualified),
            LeadStatus::Estimated
        );
        assert_eq!(LeadStatus::New.advanced_to(LeadStatus::Qualified), LeadStatus::Qualified);
    }

    #[test]
    fn status_round_trips_through_db_text() {
        for status in [LeadStatus::New, LeadStatus::Qualified, LeadStatus::Estimated] {
            assert_eq!(LeadStatus::from_db(status.as_str()), status);
        }
    }
}
