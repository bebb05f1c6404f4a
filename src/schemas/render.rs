use poem_openapi::{ApiResponse, Object, payload::Json};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::core::options::ValidatedOptions;
use crate::core::pipeline::RenderRequest;
use crate::core::reputation::ReputationResult;

#[derive(Object, Deserialize, Debug, Clone, Default)]
pub struct RenderParams {
    /// Page to render. Required.
    pub url: Option<String>,

    /// Output format (default "png")
    pub format: Option<String>,

    /// Answer with a redirect to the artifact instead of JSON
    pub redirect: Option<bool>,

    /// Renderer options, either a JSON object or a JSON-encoded string
    pub options: Option<JsonValue>,
}

impl From<RenderParams> for RenderRequest {
    fn from(params: RenderParams) -> Self {
        let options = match params.options {
            None | Some(JsonValue::Null) => String::new(),
            Some(JsonValue::String(raw)) => raw,
            Some(other) => other.to_string(),
        };
        RenderRequest::new(params.url.unwrap_or_default())
            .with_format(params.format)
            .with_redirect(params.redirect.unwrap_or(false))
            .with_options(options)
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RenderStatus {
    pub status: i32,
    pub output: String,
    pub final_output: String,
}

/// Success payload handed to the response layer.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RenderSuccess {
    pub hash: String,
    pub url: String,
    pub format: String,
    pub options: ValidatedOptions,
    /// Unix seconds at which the render was requested
    pub time: i64,
    /// Seconds spent in the renderer
    pub duration: f64,
    /// Unix seconds until which the artifact is advertised as available
    pub expiration: i64,
    pub image: String,
    pub size: u64,
    pub render: RenderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub virus_result: Option<ReputationResult>,
}

#[derive(Object, Serialize, Debug, Clone)]
pub struct RenderFailure {
    pub error: String,
    pub details: JsonValue,
}

#[derive(ApiResponse)]
pub enum RenderResponse {
    #[oai(status = 200, content_type = "application/json")]
    Ok(Json<JsonValue>),

    #[oai(status = 302)]
    Redirect(#[oai(header = "Location")] String),

    #[oai(status = 400)]
    BadRequest(Json<RenderFailure>),

    #[oai(status = 403)]
    Forbidden(Json<RenderFailure>),

    #[oai(status = 500)]
    InternalServerError(Json<RenderFailure>),

    #[oai(status = 502)]
    BadGateway(Json<RenderFailure>),

    #[oai(status = 503)]
    ServiceUnavailable(Json<RenderFailure>, #[oai(header = "Retry-After")] u32),

    #[oai(status = 504)]
    GatewayTimeout(Json<RenderFailure>),
}
