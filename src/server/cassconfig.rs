use crate::{identity::ResolvedIdentity, server::AppState};
use actix_web::{
    HttpResponse, get,
    web::{Data, Json},
};
use utoipa_actix_web::{scope, service_config::ServiceConfig};

pub fn configure_routes(config: &mut ServiceConfig) {
    config.service(
        scope::scope("/v1/cassconfig")
            .service(get_token)
            .service(is_replace_token)
            .service(get_replaced_ip)
            .service(get_identity),
    );
}

#[utoipa::path(
    summary = "Token of this node",
    description = "Initial token the data store must start with, as a decimal string",
    responses(
        (status = 200, description = "Token", body = String, content_type = "text/plain")
    ),
    tags = ["cassconfig"],
    operation_id = "getToken"
)]
#[get("/get_token")]
async fn get_token(app_state: Data<AppState>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain")
        .body(app_state.identity.slot.token.clone())
}

#[utoipa::path(
    summary = "Whether the node replaces a dead one",
    responses(
        (status = 200, description = "true when the token was taken over from a dead node", body = bool)
    ),
    tags = ["cassconfig"],
    operation_id = "isReplaceToken"
)]
#[get("/is_replace_token")]
async fn is_replace_token(app_state: Data<AppState>) -> Json<bool> {
    Json(app_state.identity.replaced_ip.is_some())
}

#[utoipa::path(
    summary = "Address of the replaced node",
    description = "Address the data store must pass as its replace address",
    responses(
        (status = 200, description = "Replaced address", body = String, content_type = "text/plain"),
        (status = 404, description = "This node did not replace anyone")
    ),
    tags = ["cassconfig"],
    operation_id = "getReplacedIp"
)]
#[get("/get_replaced_ip")]
async fn get_replaced_ip(app_state: Data<AppState>) -> HttpResponse {
    match app_state.identity.replaced_ip {
        Some(ip) => HttpResponse::Ok()
            .content_type("text/plain")
            .body(ip.to_string()),
        None => HttpResponse::NotFound().finish(),
    }
}

#[utoipa::path(
    summary = "Resolved identity",
    description = "Slot, origin and replaced address of this node",
    responses(
        (status = 200, description = "Identity", body = ResolvedIdentity)
    ),
    tags = ["cassconfig"],
    operation_id = "getIdentity"
)]
#[get("/identity")]
async fn get_identity(app_state: Data<AppState>) -> Json<ResolvedIdentity> {
    Json(app_state.identity.clone())
}
