use axum::{
    extract::DefaultBodyLimit,
    routing::get,
    Router,
};
use tower_http::{
    services::{ServeDir, ServeFile},
    cors::{CorsLayer, Any},
};

use crate::config::Config;
use crate::routes::health::health_check;
use crate::routes::profiles::profiles_router;
use crate::storage::ProfileStore;

// Room for the text fields and multipart framing on top of the photo itself
const FORM_OVERHEAD_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub store: ProfileStore,
    pub max_photo_bytes: usize,
}

pub fn build_router(config: &Config, store: ProfileStore) -> Router {
    let images = ServeDir::new(store.root());

    let serve_dir = ServeDir::new(&config.public_dir)
        .not_found_service(ServeFile::new(config.public_dir.join("index.html")));

    let state = AppState {
        store,
        max_photo_bytes: config.max_photo_bytes,
    };

    let api = Router::new()
        .nest("/api/profiles", profiles_router())
        .route("/api/health", get(health_check))
        .layer(DefaultBodyLimit::max(config.max_photo_bytes + FORM_OVERHEAD_BYTES))
        .with_state(state);

    Router::new()
        .merge(api)
        // Stored photos, /images/{id}/photo.{ext}
        .nest_service("/images", images)
        // Everything else is the static frontend
        .fallback_service(serve_dir)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
}
