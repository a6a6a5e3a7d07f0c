//! # SSR Bridge
//!
//! Server-side rendering of UI components through an embedded, single-threaded
//! script runtime (deno_core).
//!
//! A render request is a list of [`Entry`] values (component identifier plus
//! props) and produces one of two responses:
//!
//! - **reload**: the components are rendered by the server bundle and merged
//!   into the page template, `text/html; charset=utf-8`
//! - **noreload**: the script runtime is skipped and each entry is resolved
//!   against the component manifest into a hydration descriptor,
//!   `application/json; charset=utf-8`
//!
//! The script runtime is never entered concurrently. It lives on its own
//! thread and renders one request at a time; everything else (manifest
//! lookups, template execution, JSON encoding) runs on the caller's task.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ssr_bridge::{BridgeConfig, Entry, Renderer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let renderer = Renderer::from_config(BridgeConfig::new("./build/server")).await?;
//!
//!     let entries = vec![Entry::new("Layout", None)];
//!     let response = renderer.render(entries, false).await?;
//!
//!     println!("{}", String::from_utf8_lossy(response.body()));
//!     Ok(())
//! }
//! ```

mod config;
mod entry;
mod error;
mod loader;
mod manifest;
mod ops;
mod renderer;
mod response;
mod runtime;
mod script;
mod template;

pub use config::BridgeConfig;
pub use entry::{parse_entries, Entry, Props};
pub use error::{Error, RenderError, Result};
pub use loader::BundleLoader;
pub use manifest::{Manifest, ManifestEntry};
pub use ops::ConsoleOutput;
pub use renderer::Renderer;
pub use response::{
    error_response, html_response, json_response, ResponseEntry, HTML_CONTENT_TYPE,
    JSON_CONTENT_TYPE, TEXT_CONTENT_TYPE,
};
pub use runtime::{create_runtime, DenoContext, ScriptError};
pub use script::{RenderOutput, ScriptContext};
pub use template::PageTemplate;
