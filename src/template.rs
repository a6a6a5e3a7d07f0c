//! Page template: merges rendered head/body fragments into the document.
//!
//! The bundler emits `template.html` with `{{.Head}}` and `{{.Body}}` actions.
//! Fragments are substituted verbatim; the script context already produced
//! escaped HTML.

use crate::script::RenderOutput;
use anyhow::{anyhow, Result};
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Head,
    Body,
}

/// A parsed page template
#[derive(Debug, Clone)]
pub struct PageTemplate {
    segments: Vec<Segment>,
}

impl PageTemplate {
    /// Parse template source.
    ///
    /// Fails on unterminated or unknown actions so a broken build is caught
    /// at start-up rather than on the first request.
    pub fn parse(source: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut rest = source;

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Text(rest[..start].to_string()));
            }

            let after_open = &rest[start + 2..];
            let offset = source.len() - rest.len() + start;
            let end = after_open
                .find("}}")
                .ok_or_else(|| anyhow!("Unterminated template action at byte {}", offset))?;

            let segment = match after_open[..end].trim() {
                ".Head" => Segment::Head,
                ".Body" => Segment::Body,
                other => return Err(anyhow!("Unsupported template action: {{{{{}}}}}", other)),
            };
            segments.push(segment);

            rest = &after_open[end + 2..];
        }

        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }

        Ok(Self { segments })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read template '{}': {}", path.display(), e))?;
        Self::parse(&source)
    }

    /// Write the document for `output` into `w`
    pub fn execute<W: Write>(&self, w: &mut W, output: &RenderOutput) -> std::io::Result<()> {
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => w.write_all(text.as_bytes())?,
                Segment::Head => w.write_all(output.head.as_bytes())?,
                Segment::Body => w.write_all(output.body.as_bytes())?,
            }
        }
        Ok(())
    }
}
