use std::path::PathBuf;

/// Configuration for the rendering bridge
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Server build directory (template, server bundle and its chunks).
    /// Scripts can only load modules from inside this directory.
    pub server_dir: PathBuf,
    /// Page template, relative to `server_dir`
    pub template: String,
    /// Server bundle exporting `render` and `manifest`, relative to `server_dir`
    pub renderfile: String,
    /// Optional module exporting `isRenderError`, relative to `server_dir`
    pub exports: Option<String>,
    /// Maximum V8 heap size in bytes (default: 64MB, None = unlimited)
    pub max_heap_size: Option<usize>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            server_dir: PathBuf::from("./server"),
            template: String::from("template.html"),
            renderfile: String::from("renderfile.js"),
            exports: Some(String::from("exports.js")),
            max_heap_size: Some(64 * 1024 * 1024), // 64MB default
        }
    }
}

impl BridgeConfig {
    pub fn new(server_dir: impl Into<PathBuf>) -> Self {
        Self {
            server_dir: server_dir.into(),
            ..Default::default()
        }
    }

    pub fn template_path(&self) -> PathBuf {
        self.server_dir.join(&self.template)
    }

    pub fn renderfile_path(&self) -> PathBuf {
        self.server_dir.join(&self.renderfile)
    }

    pub fn exports_path(&self) -> Option<PathBuf> {
        self.exports.as_ref().map(|name| self.server_dir.join(name))
    }
}
