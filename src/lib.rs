//! HTTP wiring for the render proxy.

use std::sync::Arc;

use poem::{
    Endpoint, EndpointExt, Route,
    middleware::{AddData, Cors},
};
use poem_openapi::OpenApiService;

use crate::core::pipeline::RenderPipeline;
use crate::routes::render::ApiRender;
use crate::settings::Config;

pub mod core;
pub mod error;
pub mod routes;
pub mod schemas;
pub mod settings;

/// Shared by every handler through `AddData`.
pub struct AppState {
    pub pipeline: RenderPipeline,
}

impl AppState {
    pub fn new(pipeline: RenderPipeline) -> Arc<Self> {
        Arc::new(Self { pipeline })
    }
}

/// Mount the render API under the configured prefix, with Swagger UI at
/// `/docs` and the raw document at `/openapi.json`.
pub fn build_app(app_state: Arc<AppState>, config: &Config) -> impl Endpoint + use<> {
    let prefix = config.api_prefix();
    let api = OpenApiService::new(ApiRender, "Render Proxy API", env!("CARGO_PKG_VERSION"))
        .description("Renders web pages to images and PDFs with an external renderer.")
        .server(prefix.clone());
    let openapi_json = api.spec_endpoint();
    let docs = api.swagger_ui();

    Route::new()
        .nest(prefix, api)
        .nest("/docs", docs)
        .at("/openapi.json", openapi_json)
        .with(AddData::new(app_state))
        .with(Cors::new())
}
