//! Rendering bridge.
//!
//! The script context is not safe to enter concurrently, so it is owned by a
//! single thread running its own current-thread runtime. Callers submit render
//! jobs over a channel and await the reply; the one consumer is the only
//! serialization point. Formatting happens back on the caller's task, so only
//! the script call itself is serialized.

use crate::config::BridgeConfig;
use crate::entry::Entry;
use crate::error::{Error, RenderError, Result};
use crate::manifest::Manifest;
use crate::response::{html_response, json_response, ResponseEntry};
use crate::runtime::DenoContext;
use crate::script::{RenderOutput, ScriptContext};
use crate::template::PageTemplate;
use anyhow::anyhow;
use http::Response;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};

/// Pending renders beyond the one in flight
const QUEUE_DEPTH: usize = 64;

struct RenderJob {
    entries: Vec<Entry>,
    reply: oneshot::Sender<Result<RenderOutput>>,
}

/// Handle to the rendering bridge. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct Renderer {
    template: PageTemplate,
    manifest: Arc<Manifest>,
    jobs: mpsc::Sender<RenderJob>,
}

impl Renderer {
    /// Start a renderer over the server build described by `config`
    pub async fn from_config(config: BridgeConfig) -> anyhow::Result<Self> {
        let template = PageTemplate::load(config.template_path())?;
        Self::start(template, move || async move { DenoContext::load(&config).await }).await
    }

    /// Start a renderer over any script context.
    ///
    /// `init` runs on the script thread, since contexts such as a V8 isolate
    /// must stay on the thread that created them.
    pub async fn start<C, F, Fut>(template: PageTemplate, init: F) -> anyhow::Result<Self>
    where
        C: ScriptContext + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<C>> + 'static,
    {
        let (jobs_tx, jobs_rx) = mpsc::channel(QUEUE_DEPTH);
        let (ready_tx, ready_rx) = oneshot::channel();

        std::thread::Builder::new()
            .name("ssr-script".to_string())
            .spawn(move || run_script_thread(init, ready_tx, jobs_rx))
            .map_err(|e| anyhow!("Failed to spawn script thread: {}", e))?;

        let manifest = ready_rx
            .await
            .map_err(|_| anyhow!("Script thread exited during start-up"))??;

        tracing::info!(components = manifest.len(), "Renderer ready");

        Ok(Self {
            template,
            manifest: Arc::new(manifest),
            jobs: jobs_tx,
        })
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Render `entries` into a response.
    ///
    /// With `noreload` unset the components are server-rendered into the page
    /// template. With `noreload` set the script context is not touched and the
    /// response is the JSON hydration descriptor for each entry.
    pub async fn render(&self, entries: Vec<Entry>, noreload: bool) -> Result<Response<Vec<u8>>> {
        if noreload {
            return json_response(&self.hydration_entries(&entries));
        }

        let output = self.render_page(entries).await?;
        html_response(&self.template, &output)
    }

    /// Run one server render on the script context
    pub async fn render_page(&self, entries: Vec<Entry>) -> Result<RenderOutput> {
        let (reply, response) = oneshot::channel();

        self.jobs
            .send(RenderJob { entries, reply })
            .await
            .map_err(|_| script_gone())?;

        response.await.map_err(|_| script_gone())?
    }

    /// Hydration descriptors for `entries`, resolved against the manifest
    pub fn hydration_entries(&self, entries: &[Entry]) -> Vec<ResponseEntry> {
        entries
            .iter()
            .map(|entry| ResponseEntry::resolve(entry, &self.manifest))
            .collect()
    }
}

fn script_gone() -> Error {
    Error::Execution(anyhow!("Script context is no longer running"))
}

fn run_script_thread<C, F, Fut>(
    init: F,
    ready: oneshot::Sender<anyhow::Result<Manifest>>,
    mut jobs: mpsc::Receiver<RenderJob>,
) where
    C: ScriptContext,
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<C>>,
{
    let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            let _ = ready.send(Err(anyhow!("Failed to build script runtime: {}", e)));
            return;
        }
    };

    let mut context = match rt.block_on(init()) {
        Ok(context) => context,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    if ready.send(Ok(context.manifest().clone())).is_err() {
        return;
    }

    while let Some(RenderJob { entries, reply }) = jobs.blocking_recv() {
        let started = Instant::now();
        let result = rt
            .block_on(context.render(&entries))
            .map_err(|e| classify(&context, e));

        match &result {
            Ok(_) => tracing::debug!(
                entries = entries.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Rendered"
            ),
            Err(e) => tracing::warn!(
                render_error = e.is_render_error(),
                error = %e,
                "Render failed"
            ),
        }

        // Caller may have gone away; nothing to do then.
        let _ = reply.send(result);
    }

    tracing::debug!("Script thread shutting down");
}

fn classify<C: ScriptContext>(context: &C, error: C::Error) -> Error {
    if context.is_render_error(&error) {
        Error::Render(RenderError::new(error))
    } else {
        Error::Execution(error.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestEntry;
    use crate::response::{HTML_CONTENT_TYPE, JSON_CONTENT_TYPE};
    use http::header::CONTENT_TYPE;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, thiserror::Error, PartialEq)]
    enum MockError {
        #[error("component threw: {0}")]
        Thrown(String),
        #[error("engine fault: {0}")]
        Fault(String),
    }

    /// Script context that fails loudly if it is ever entered twice
    struct MockContext {
        manifest: Manifest,
        in_flight: Arc<AtomicBool>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptContext for MockContext {
        type Error = MockError;

        fn manifest(&self) -> &Manifest {
            &self.manifest
        }

        async fn render(
            &mut self,
            entries: &[Entry],
        ) -> std::result::Result<RenderOutput, MockError> {
            if self.in_flight.swap(true, Ordering::SeqCst) {
                panic!("script context re-entered");
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
            self.in_flight.store(false, Ordering::SeqCst);

            let first = entries.first().map(Entry::comp).unwrap_or_default();
            match first {
                "Throws" => Err(MockError::Thrown("boom".to_string())),
                "Crashes" => Err(MockError::Fault("out of memory".to_string())),
                comp => Ok(RenderOutput {
                    head: "<title>X</title>".to_string(),
                    body: format!("<div>{comp}</div>"),
                }),
            }
        }

        fn is_render_error(&self, error: &MockError) -> bool {
            matches!(error, MockError::Thrown(_))
        }
    }

    fn button_manifest() -> Manifest {
        Manifest::from_iter([(
            "Button".to_string(),
            ManifestEntry {
                client: "button.js".to_string(),
                css: vec!["button.css".to_string()],
            },
        )])
    }

    async fn start_mock() -> (Renderer, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let template =
            PageTemplate::parse("<html><head>{{.Head}}</head><body>{{.Body}}</body></html>")
                .unwrap();

        let renderer = Renderer::start(template, move || async move {
            Ok(MockContext {
                manifest: button_manifest(),
                in_flight: Arc::new(AtomicBool::new(false)),
                calls: counter,
            })
        })
        .await
        .unwrap();

        (renderer, calls)
    }

    fn entry(comp: &str) -> Entry {
        Entry::new(comp, None)
    }

    #[tokio::test]
    async fn test_reload_renders_html() {
        let (renderer, _) = start_mock().await;

        let response = renderer.render(vec![entry("Y")], false).await.unwrap();

        assert_eq!(response.headers()[CONTENT_TYPE], HTML_CONTENT_TYPE);
        assert_eq!(
            String::from_utf8(response.into_body()).unwrap(),
            "<html><head><title>X</title></head><body><div>Y</div></body></html>"
        );
    }

    #[tokio::test]
    async fn test_noreload_skips_script_context() {
        let (renderer, calls) = start_mock().await;
        let props = json!({"label": "Hi"}).as_object().cloned();

        let response = renderer
            .render(vec![Entry::new("Button", props)], true)
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(response.headers()[CONTENT_TYPE], JSON_CONTENT_TYPE);
        assert_eq!(
            String::from_utf8(response.into_body()).unwrap(),
            r#"[{"File":"/button.js","Props":{"label":"Hi"},"CSS":["button.css"]}]"#
        );
    }

    #[tokio::test]
    async fn test_noreload_passes_any_props_through() {
        let (renderer, calls) = start_mock().await;
        let props = json!({"constructor": "Foo"}).as_object().cloned();

        let response = renderer
            .render(vec![Entry::new("Button", props)], true)
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            String::from_utf8(response.into_body()).unwrap(),
            r#"[{"File":"/button.js","Props":{"constructor":"Foo"},"CSS":["button.css"]}]"#
        );
    }

    #[tokio::test]
    async fn test_noreload_defaults_props_and_tolerates_unknown_components() {
        let (renderer, _) = start_mock().await;

        let resolved = renderer.hydration_entries(&[entry("Button"), entry("Stale")]);

        assert_eq!(resolved[0].props, serde_json::Map::new());
        assert_eq!(resolved[1].file, "/");
        assert!(resolved[1].css.is_empty());

        let body = renderer.render(vec![entry("Stale")], true).await.unwrap().into_body();
        assert_eq!(body, br#"[{"File":"/","Props":{},"CSS":[]}]"#);
    }

    #[tokio::test]
    async fn test_render_error_is_tagged() {
        let (renderer, _) = start_mock().await;

        let err = renderer.render(vec![entry("Throws")], false).await.unwrap_err();

        assert!(err.is_render_error());
        assert_eq!(err.public_message(), "component threw: boom");
    }

    #[tokio::test]
    async fn test_execution_fault_is_passed_through() {
        let (renderer, _) = start_mock().await;

        let err = renderer.render(vec![entry("Crashes")], false).await.unwrap_err();

        match err {
            Error::Execution(inner) => assert_eq!(
                inner.downcast_ref::<MockError>(),
                Some(&MockError::Fault("out of memory".to_string()))
            ),
            other => panic!("expected execution fault, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failure_does_not_block_next_render() {
        let (renderer, calls) = start_mock().await;

        assert!(renderer.render(vec![entry("Crashes")], false).await.is_err());
        assert!(renderer.render(vec![entry("Throws")], false).await.is_err());
        assert!(renderer.render(vec![entry("Ok")], false).await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_never_reenter() {
        let (renderer, calls) = start_mock().await;
        let renderer = Arc::new(renderer);

        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let renderer = renderer.clone();
                tokio::spawn(async move {
                    renderer.render(vec![entry(&format!("C{i}"))], false).await
                })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 32);
    }

    #[tokio::test]
    async fn test_start_up_failure_is_reported() {
        let template = PageTemplate::parse("{{.Body}}").unwrap();

        let result = Renderer::start::<MockContext, _, _>(template, || async {
            Err(anyhow!("renderfile.js has no render export"))
        })
        .await;

        assert!(result.unwrap_err().to_string().contains("no render export"));
    }
}
