//! Boundary of the script execution context.
//!
//! A script context is a single logical thread of script execution. It is
//! never entered concurrently: the renderer owns it on a dedicated thread and
//! feeds it one render at a time.

use crate::entry::Entry;
use crate::manifest::Manifest;
use serde::Deserialize;

/// Head and body fragments produced by one render call
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RenderOutput {
    pub head: String,
    pub body: String,
}

#[allow(async_fn_in_trait)]
pub trait ScriptContext {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Component manifest exported by the loaded bundle
    fn manifest(&self) -> &Manifest;

    /// Render the full entry sequence into one head/body pair
    async fn render(&mut self, entries: &[Entry]) -> Result<RenderOutput, Self::Error>;

    /// Whether `error` is a failure raised by component code itself, as
    /// opposed to an engine or bundle fault
    fn is_render_error(&self, error: &Self::Error) -> bool;
}
