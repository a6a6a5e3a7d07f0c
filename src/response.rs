//! Response formatting for the two render modes.

use crate::entry::{Entry, Props};
use crate::error::{Error, Result};
use crate::manifest::Manifest;
use crate::script::RenderOutput;
use crate::template::PageTemplate;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::Response;
use serde::Serialize;

pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Hydration descriptor for one component in no-reload mode
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseEntry {
    #[serde(rename = "File")]
    pub file: String,
    #[serde(rename = "Props")]
    pub props: Props,
    #[serde(rename = "CSS")]
    pub css: Vec<String>,
}

impl ResponseEntry {
    pub fn resolve(entry: &Entry, manifest: &Manifest) -> Self {
        let assets = manifest.get(entry.comp());
        Self {
            file: format!("/{}", assets.client),
            props: entry.props().clone(),
            css: assets.css.clone(),
        }
    }
}

fn with_content_type(body: Vec<u8>, content_type: &'static str) -> Response<Vec<u8>> {
    let mut response = Response::new(body);
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// Merge a successful render into the page template
pub fn html_response(
    template: &PageTemplate,
    output: &RenderOutput,
) -> Result<Response<Vec<u8>>> {
    let mut body = Vec::with_capacity(output.head.len() + output.body.len() + 512);
    template.execute(&mut body, output).map_err(Error::Template)?;
    Ok(with_content_type(body, HTML_CONTENT_TYPE))
}

/// Serialize hydration descriptors as a JSON array
pub fn json_response(entries: &[ResponseEntry]) -> Result<Response<Vec<u8>>> {
    let body = serde_json::to_vec(entries)?;
    Ok(with_content_type(body, JSON_CONTENT_TYPE))
}

/// Response for a failed render. Render errors expose their message; any
/// other failure is reported generically and logged.
pub fn error_response(err: &Error) -> Response<Vec<u8>> {
    if !err.is_render_error() {
        tracing::error!(error = %err, "Render failed");
    }

    let body = err.public_message().as_bytes().to_vec();
    let mut response = with_content_type(body, TEXT_CONTENT_TYPE);
    *response.status_mut() = err.status();
    response
}
