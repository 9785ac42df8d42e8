use crate::server::AppState;
use actix_web::{HttpResponse, get, web::Data};
use serde_json::json;

#[utoipa::path(
    responses(
        (status = 200, description = "Health check, with how this node got its slot")
    ),
    tags = ["health"]
)]
#[get("/health")]
pub async fn health(app_state: Data<AppState>) -> HttpResponse {
    let identity = &app_state.identity;

    HttpResponse::Ok().json(json!({
        "status": "ok",
        "slot": identity.slot.id,
        "origin": identity.origin,
    }))
}

#[utoipa::path(
    responses(
        (status = 200, description = "Home endpoint")
    ),
    tags = ["health"]
)]
#[get("/")]
pub async fn home() -> HttpResponse {
    HttpResponse::Ok().body("Ringkeeper")
}
