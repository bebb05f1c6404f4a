use std::sync::Arc;

use poem::{http::StatusCode, web::Data};
use poem_openapi::{
    OpenApi, Tags,
    param::Query,
    payload::{Json, PlainText},
};
use serde_json::Value as JsonValue;

use crate::{
    AppState,
    core::pipeline::RenderRequest,
    error::PipelineError,
    schemas::{
        common::{HealthResponse, RenderSlots},
        render::{RenderFailure, RenderParams, RenderResponse},
    },
};

/// Seconds clients are asked to wait while a URL is being scanned.
const SCAN_RETRY_AFTER_SECS: u32 = 60;

#[derive(Tags)]
enum ApiRenderTags {
    Render,
}

pub struct ApiRender;

#[OpenApi()]
impl ApiRender {
    #[oai(path = "/", method = "get")]
    async fn index(&self) -> PlainText<String> {
        PlainText("HI!".to_string())
    }

    /// Render
    ///
    /// Render a URL to an image or PDF with the configured renderer.
    /// `options` is a JSON object, validated against the configured schema.
    #[oai(path = "/render", method = "get", tag = "ApiRenderTags::Render")]
    async fn render_get(
        &self,
        url: Query<Option<String>>,
        format: Query<Option<String>>,
        // Any value other than empty, `0` or `false` asks for a redirect.
        redirect: Query<Option<String>>,
        options: Query<Option<String>>,
        state: Data<&Arc<AppState>>,
    ) -> RenderResponse {
        let params = RenderParams {
            url: url.0,
            format: format.0,
            redirect: redirect.0.as_deref().map(redirect_requested),
            options: options.0.map(JsonValue::String),
        };
        render(params.into(), state.0).await
    }

    /// Render
    ///
    /// Same as `GET /render` with the parameters in a JSON body.
    ///
    /// # Example Request
    /// ```json
    /// {
    ///   "url": "https://example.com",
    ///   "format": "png",
    ///   "options": { "width": 1024 }
    /// }
    /// ```
    #[oai(path = "/render", method = "post", tag = "ApiRenderTags::Render")]
    async fn render_post(
        &self,
        Json(json): Json<RenderParams>,
        state: Data<&Arc<AppState>>,
    ) -> RenderResponse {
        render(json.into(), state.0).await
    }

    #[oai(path = "/health", method = "get")]
    async fn health(&self, state: Data<&Arc<AppState>>) -> Json<HealthResponse> {
        let render_slots = state
            .pipeline
            .render_slots()
            .map(|(available, capacity)| RenderSlots {
                available: available as u32,
                capacity: capacity as u32,
                utilization_pct: (capacity - available) as f64 / capacity as f64 * 100.0,
            });

        Json(HealthResponse {
            status: "healthy".to_string(),
            render_slots,
            reputation_check: state.pipeline.reputation_enabled(),
        })
    }
}

async fn render(request: RenderRequest, state: &AppState) -> RenderResponse {
    tracing::info!("Render requested: format={}", request.format);

    match state.pipeline.run(&request).await {
        Ok(success) if request.redirect => RenderResponse::Redirect(success.image),
        Ok(success) => match serde_json::to_value(&success) {
            Ok(body) => RenderResponse::Ok(Json(body)),
            Err(e) => {
                tracing::error!("Failed to serialize render result: {}", e);
                RenderResponse::InternalServerError(Json(RenderFailure {
                    error: "Failed to serialize render result".to_string(),
                    details: JsonValue::Null,
                }))
            }
        },
        Err(e) => {
            if e.status().is_server_error() {
                tracing::error!("Render error: {}", e);
            } else {
                tracing::info!("Render refused: {}", e);
            }
            failure_response(&e)
        }
    }
}

/// Query flags are loose: `redirect`, `redirect=1` and `redirect=yes` all
/// count.
fn redirect_requested(value: &str) -> bool {
    let value = value.trim();
    !(value.is_empty() || value == "0" || value.eq_ignore_ascii_case("false"))
}

fn failure_response(error: &PipelineError) -> RenderResponse {
    let body = Json(error.to_failure());
    match error.status() {
        StatusCode::BAD_REQUEST => RenderResponse::BadRequest(body),
        StatusCode::FORBIDDEN => RenderResponse::Forbidden(body),
        StatusCode::BAD_GATEWAY => RenderResponse::BadGateway(body),
        StatusCode::SERVICE_UNAVAILABLE => {
            RenderResponse::ServiceUnavailable(body, SCAN_RETRY_AFTER_SECS)
        }
        StatusCode::GATEWAY_TIMEOUT => RenderResponse::GatewayTimeout(body),
        _ => RenderResponse::InternalServerError(body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_flag_is_loose() {
        for value in ["1", "true", "yes", "on"] {
            assert!(redirect_requested(value), "{value}");
        }
        for value in ["", " ", "0", "false", "FALSE"] {
            assert!(!redirect_requested(value), "{value:?}");
        }
    }
}
