use axum::{
    Router,
    routing::{get, post, put, delete},
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::Json as RespJson,
};

use crate::app::AppState;
use crate::error::ApiError;
use crate::model::profile::{
    PhotoUpload,
    ProfileDetail,
    ProfileFields,
    ProfileForm,
    ProfileSummary,
    SaveResponse,
};

pub const PHOTO_FIELD: &str = "photo";

// Create profiles router, nested under /api/profiles
pub fn profiles_router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_profile))         // POST /api/profiles
        .route("/", get(list_profiles))           // GET /api/profiles
        .route("/:id", get(get_profile))          // GET /api/profiles/{id}
        .route("/:id", put(update_profile))       // PUT /api/profiles/{id}
        .route("/:id", delete(delete_profile))    // DELETE /api/profiles/{id}
}

// Create new profile (multipart: text fields + one image)
async fn create_profile(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, RespJson<SaveResponse>), ApiError> {
    let (fields, photo) = read_upload(multipart, state.max_photo_bytes).await?;
    let photo = photo.ok_or_else(|| ApiError::validation("A photo is required"))?;

    let profile = state.store.create(fields, &photo).await?;

    tracing::info!("✅ Profile {} created ({} bytes photo)", profile.id, photo.bytes.len());
    Ok((StatusCode::CREATED, RespJson(SaveResponse::new(profile.id))))
}

// List all profiles, newest date first
async fn list_profiles(
    State(state): State<AppState>,
) -> Result<RespJson<Vec<ProfileSummary>>, ApiError> {
    let profiles = state.store.list().await?;
    tracing::debug!("📋 Listed {} profiles", profiles.len());
    Ok(RespJson(profiles))
}

// Get profile by ID
async fn get_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<RespJson<ProfileDetail>, ApiError> {
    tracing::debug!("🔍 Getting profile with ID: {}", id);
    let profile = state.store.get(&id).await?;
    Ok(RespJson(profile.detail()))
}

// Update profile; every text field is rewritten, the photo only if one is sent
async fn update_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
    multipart: Multipart,
) -> Result<RespJson<SaveResponse>, ApiError> {
    let (fields, photo) = read_upload(multipart, state.max_photo_bytes).await?;

    let profile = state.store.update(&id, fields, photo.as_ref()).await?;

    tracing::info!(
        "🔄 Profile {} updated{}",
        profile.id,
        if photo.is_some() { " with new photo" } else { "" }
    );
    Ok(RespJson(SaveResponse::new(profile.id)))
}

// Delete profile together with its photo
async fn delete_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<RespJson<serde_json::Value>, ApiError> {
    state.store.delete(&id).await?;

    tracing::info!("🗑️ Profile {} deleted", id);
    Ok(RespJson(serde_json::json!({
        "success": true
    })))
}

/// Drains the multipart body and validates it before anything touches disk.
/// The photo is buffered in memory and capped at `max_photo_bytes`.
async fn read_upload(
    mut multipart: Multipart,
    max_photo_bytes: usize,
) -> Result<(ProfileFields, Option<PhotoUpload>), ApiError> {
    let mut form = ProfileForm::default();
    let mut photo: Option<PhotoUpload> = None;

    while let Some(mut field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();

        if name != PHOTO_FIELD {
            let value = field.text().await?;
            if !form.set(&name, value) {
                tracing::debug!("Ignoring unknown form field: {}", name);
            }
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().unwrap_or_default().to_string();

        let mut bytes = Vec::new();
        while let Some(chunk) = field.chunk().await? {
            if bytes.len() + chunk.len() > max_photo_bytes {
                return Err(ApiError::PayloadTooLarge);
            }
            bytes.extend_from_slice(&chunk);
        }

        // Browsers submit an empty part for an untouched file input
        if file_name.is_empty() && bytes.is_empty() {
            continue;
        }
        if photo.is_some() {
            return Err(ApiError::validation("Only one photo may be uploaded"));
        }
        if !content_type.to_ascii_lowercase().starts_with("image/") {
            return Err(ApiError::UnsupportedMediaType);
        }
        if bytes.is_empty() {
            return Err(ApiError::validation("Uploaded photo is empty"));
        }

        photo = Some(PhotoUpload {
            file_name,
            content_type,
            bytes,
        });
    }

    Ok((form.validate()?, photo))
}
