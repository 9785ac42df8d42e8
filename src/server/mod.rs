mod cassconfig;
mod health;
mod openapi;

use crate::{
    identity::ResolvedIdentity,
    server::{health::*, openapi::ApiDoc},
};
use actix_web::{App, HttpServer, web::Data};
use std::{net::TcpListener, sync::Arc};
use utoipa::OpenApi;
use utoipa_actix_web::AppExt;
use utoipa_swagger_ui::SwaggerUi;

pub type AppState = Arc<AppStateInner>;

#[derive(Debug)]
pub struct AppStateInner {
    /// Resolved once at boot and never changes afterwards.
    pub identity: ResolvedIdentity,
}

pub async fn start_server(state: AppState, listener: TcpListener) -> std::io::Result<()> {
    let data = Data::new(state);

    let server = HttpServer::new(move || {
        App::new()
            .into_utoipa_app()
            .openapi(ApiDoc::openapi())
            .service(home)
            .service(health)
            .configure(cassconfig::configure_routes)
            .app_data(data.clone())
            .openapi_service(|api| {
                SwaggerUi::new("/swagger-ui/{_:.*}").url("/api/openapi.json", api)
            })
            .into_app()
    })
    .listen(listener)?
    .run();

    server.await
}

#[cfg(test)]
pub async fn start_server_test(identity: ResolvedIdentity) -> u16 {
    let state = AppStateInner { identity };

    let listener = TcpListener::bind("0.0.0.0:0").expect("failed to bind to random port");
    let port = listener
        .local_addr()
        .expect("failed to get local addr")
        .port();

    tokio::spawn(async {
        start_server(Arc::new(state), listener).await.unwrap();
    });

    port
}
