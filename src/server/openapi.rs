use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    tags(
        (name = "health", description = "Health-related endpoints."),
        (name = "cassconfig", description = "Boot configuration read by the data store's startup scripts."),
    ),
)]
pub struct ApiDoc;
