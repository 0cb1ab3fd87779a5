use axum::response::Json as RespJson;

pub async fn health_check() -> RespJson<serde_json::Value> {
    RespJson(serde_json::json!({
        "success": true,
        "status": "ok",
        "timestamp": chrono::Utc::now()
    }))
}
