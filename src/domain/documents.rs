use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::auth::TenantOwned;
use crate::validation::{Validate, ValidationErrors};

const PHOTO_CONTENT_TYPES: &[&str] = &["image/jpeg", "image/png", "image/webp", "image/heic"];
const DOCUMENT_CONTENT_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/webp",
    "image/heic",
    "application/pdf",
];

/// Kind of attachment; selects the storage prefix and accepted content types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Photo,
    #[default]
    Document,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Document => "document",
        }
    }

    pub fn from_db(s: &str) -> Self {
        match s {
            "photo" => Self::Photo,
            _ => Self::Document,
        }
    }

    pub fn allowed_content_types(&self) -> &'static [&'static str] {
        match self {
            Self::Photo => PHOTO_CONTENT_TYPES,
            Self::Document => DOCUMENT_CONTENT_TYPES,
        }
    }

    pub fn accepts(&self, content_type: &str) -> bool {
        self.allowed_content_types().contains(&content_type)
    }
}

/// How the browser will upload: a presigned PUT URL or a signed POST form
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UploadMethod {
    #[default]
    Put,
    Post,
}

fn validate_file(
    errors: &mut ValidationErrors,
    file_type: FileType,
    file_name: &str,
    content_type: &str,
    size_bytes: i64,
) {
    errors.required("file_name", file_name);
    errors.max_len("file_name", file_name, 255);
    if !file_type.accepts(content_type) {
        errors.add(
            "content_type",
            format!(
                "must be one of: {}",
                file_type.allowed_content_types().join(", ")
            ),
        );
    }
    if size_bytes <= 0 {
        errors.add("size_bytes", "must be greater than zero");
    }
}

/// Request a presigned upload for a lead attachment
#[derive(Debug, Clone, Deserialize)]
pub struct PresignUploadRequest {
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    #[serde(default)]
    pub file_type: FileType,
    #[serde(default)]
    pub method: UploadMethod,
}

impl Validate for PresignUploadRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        validate_file(
            &mut errors,
            self.file_type,
            &self.file_name,
            &self.content_type,
            self.size_bytes,
        );
        errors.into_result()
    }
}

/// Request a presigned photo upload from the public intake form
#[derive(Debug, Clone, Deserialize)]
pub struct IntakeUploadRequest {
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    #[serde(default)]
    pub method: UploadMethod,
}

impl Validate for IntakeUploadRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        validate_file(
            &mut errors,
            FileType::Photo,
            &self.file_name,
            &self.content_type,
            self.size_bytes,
        );
        errors.into_result()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PresignedUploadResponse {
    pub method: UploadMethod,
    pub url: String,
    pub storage_key: String,
    /// Form fields to send before the file for POST uploads
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeMap<String, String>>,
    /// Headers the client must send with a PUT upload
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    pub max_size_bytes: u64,
    pub expires_at: DateTime<Utc>,
}

/// Register an object that was uploaded with a presigned URL
#[derive(Debug, Clone, Deserialize)]
pub struct CompleteDocumentRequest {
    pub storage_key: String,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    #[serde(default)]
    pub file_type: FileType,
}

impl Validate for CompleteDocumentRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        errors.required("storage_key", &self.storage_key);
        errors.max_len("storage_key", &self.storage_key, 512);
        validate_file(
            &mut errors,
            self.file_type,
            &self.file_name,
            &self.content_type,
            self.size_bytes,
        );
        errors.into_result()
    }
}

/// Document entity
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DocumentRow {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub contractor_id: Uuid,
    pub uploaded_by: Option<Uuid>,
    pub storage_key: String,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub file_type: String,
    pub created_at: DateTime<Utc>,
}

pub const DOCUMENT_COLUMNS: &str = "id, lead_id, contractor_id, uploaded_by, storage_key, \
     file_name, content_type, size_bytes, file_type, created_at";

impl TenantOwned for DocumentRow {
    fn contractor_id(&self) -> Uuid {
        self.contractor_id
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentResponse {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub storage_key: String,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub file_type: FileType,
    pub created_at: DateTime<Utc>,
}

impl From<DocumentRow> for DocumentResponse {
    fn from(d: DocumentRow) -> Self {
        Self {
            id: d.id,
            lead_id: d.lead_id,
            storage_key: d.storage_key,
            file_name: d.file_name,
            content_type: d.content_type,
            size_bytes: d.size_bytes,
            file_type: FileType::from_db(&d.file_type),
            created_at: d.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn photo_uploads_reject_pdf() {
        let req = IntakeUploadRequest {
            file_name: "plan.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            size_bytes: 1024,
            method: UploadMethod::Put,
        };
        let errors = req.validate().unwrap_err();
        assert!(errors.contains("content_type"));
    }

    #[test]
    fn documents_accept_pdf() {
        let req = PresignUploadRequest {
            file_name: "permit.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            size_bytes: 2048,
            file_type: FileType::Document,
            method: UploadMethod::Post,
        };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn zero_byte_uploads_are_rejected() {
        let req = PresignUploadRequest {
            file_name: "roof.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            size_bytes: 0,
            file_type: FileType::Photo,
            method: UploadMethod::Put,
        };
        assert!(req.validate().unwrap_err().contains("size_bytes"));
    }
}
