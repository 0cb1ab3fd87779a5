use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

pub const NOTE_PREVIEW_CHARS: usize = 50;
const ELLIPSIS: &str = "...";

// Stored metadata record (profile.json), one per profile directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: Uuid,
    pub name: String,
    pub address: String,
    pub contact: Option<String>,
    pub date: String,
    pub note: String,
    pub photo: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    pub fn new(id: Uuid, fields: ProfileFields, photo: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: fields.name,
            address: fields.address,
            contact: fields.contact,
            date: fields.date,
            note: fields.note,
            photo,
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrites every text field; `id`, `photo` and `created_at` are untouched.
    pub fn apply(&mut self, fields: ProfileFields) {
        self.name = fields.name;
        self.address = fields.address;
        self.contact = fields.contact;
        self.date = fields.date;
        self.note = fields.note;
    }

    pub fn photo_url(&self) -> String {
        photo_url(&self.id, &self.photo)
    }

    pub fn summary(&self) -> ProfileSummary {
        ProfileSummary {
            id: self.id,
            name: self.name.clone(),
            date: self.date.clone(),
            photo: self.photo_url(),
            note: truncate_note(&self.note),
        }
    }

    pub fn detail(self) -> ProfileDetail {
        let photo_url = self.photo_url();
        ProfileDetail {
            profile: self,
            photo_url,
        }
    }
}

// Validated, normalized text fields shared by create and update
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileFields {
    pub name: String,
    pub address: String,
    pub contact: Option<String>,
    pub date: String,
    pub note: String,
}

// Raw text fields as they arrive in the multipart form
#[derive(Debug, Default)]
pub struct ProfileForm {
    pub name: Option<String>,
    pub address: Option<String>,
    pub contact: Option<String>,
    pub date: Option<String>,
    pub note: Option<String>,
}

impl ProfileForm {
    /// Records a text part; returns false for field names the form doesn't know.
    pub fn set(&mut self, field: &str, value: String) -> bool {
        let slot = match field {
            "name" => &mut self.name,
            "address" => &mut self.address,
            "contact" => &mut self.contact,
            "date" => &mut self.date,
            "note" => &mut self.note,
            _ => return false,
        };
        *slot = Some(value);
        true
    }

    pub fn validate(self) -> Result<ProfileFields, ApiError> {
        Ok(ProfileFields {
            name: required("name", self.name)?,
            address: required("address", self.address)?,
            date: required("date", self.date)?,
            note: required("note", self.note)?,
            contact: normalize_contact(self.contact),
        })
    }
}

fn required(field: &str, value: Option<String>) -> Result<String, ApiError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(ApiError::validation(format!("Field '{}' is required", field))),
    }
}

/// Empty or whitespace-only contact is stored as null, on create and update alike.
pub fn normalize_contact(contact: Option<String>) -> Option<String> {
    contact
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}

// An uploaded image, fully buffered and within the size limit
#[derive(Debug, Clone)]
pub struct PhotoUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl PhotoUpload {
    /// Lowercased extension of the original filename, falling back to the
    /// content-type subtype when the filename has none usable.
    pub fn extension(&self) -> String {
        let from_name = std::path::Path::new(&self.file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .filter(|ext| is_clean_extension(ext));

        from_name.unwrap_or_else(|| extension_from_content_type(&self.content_type))
    }

    pub fn stored_name(&self) -> String {
        format!("photo.{}", self.extension())
    }
}

fn is_clean_extension(ext: &str) -> bool {
    !ext.is_empty() && ext.len() <= 10 && ext.chars().all(|c| c.is_ascii_alphanumeric())
}

fn extension_from_content_type(content_type: &str) -> String {
    let subtype = content_type
        .split(';')
        .next()
        .and_then(|essence| essence.split('/').nth(1))
        .map(|sub| sub.split('+').next().unwrap_or(sub).trim().to_ascii_lowercase())
        .unwrap_or_default();

    match subtype.as_str() {
        "jpeg" | "pjpeg" => "jpg".to_string(),
        s if is_clean_extension(s) => s.to_string(),
        _ => "img".to_string(),
    }
}

// Listing entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub id: Uuid,
    pub name: String,
    pub date: String,
    pub photo: String,
    pub note: String,
}

// Full record plus the derived photo URL
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileDetail {
    #[serde(flatten)]
    pub profile: Profile,
    pub photo_url: String,
}

// Response body for create and update
#[derive(Debug, Serialize, Deserialize)]
pub struct SaveResponse {
    pub success: bool,
    pub id: Uuid,
    pub link: String,
}

impl SaveResponse {
    pub fn new(id: Uuid) -> Self {
        Self {
            success: true,
            id,
            link: share_link(&id),
        }
    }
}

pub fn photo_url(id: &Uuid, photo: &str) -> String {
    format!("/images/{}/{}", id, photo)
}

pub fn share_link(id: &Uuid) -> String {
    format!("/view.html?id={}", id)
}

pub fn truncate_note(note: &str) -> String {
    match note.char_indices().nth(NOTE_PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}{}", &note[..cut], ELLIPSIS),
        None => note.to_string(),
    }
}
