//! Module loader confined to the server build directory.
//!
//! The server bundle and every chunk it imports must live inside the build
//! directory. Remote specifiers, path traversal and anything other than
//! `.js`/`.mjs` are refused.

use anyhow::{anyhow, Error};
use deno_core::{
    ModuleLoadResponse, ModuleLoader, ModuleSource, ModuleSourceCode, ModuleSpecifier, ModuleType,
    RequestedModuleType, ResolutionKind,
};
use std::path::{Path, PathBuf};

const REMOTE_SCHEMES: &[&str] = &["http:", "https:", "data:", "blob:", "node:", "npm:"];

pub struct BundleLoader {
    root: PathBuf,
}

impl BundleLoader {
    /// Create a loader serving modules from `root`.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, Error> {
        let root = root
            .as_ref()
            .canonicalize()
            .map_err(|e| {
                anyhow!(
                    "Failed to open server build directory '{}': {}",
                    root.as_ref().display(),
                    e
                )
            })?;

        if !root.is_dir() {
            return Err(anyhow!("Server build path '{}' is not a directory", root.display()));
        }

        Ok(Self { root })
    }

    /// `file://` URL for a module inside the build directory
    pub fn module_url(&self, path: &Path) -> Result<ModuleSpecifier, Error> {
        let path = self.check(path)?;
        ModuleSpecifier::from_file_path(&path)
            .map_err(|_| anyhow!("Invalid module path: {}", path.display()))
    }

    /// Canonicalize `path` and make sure it is a script inside the build directory
    fn check(&self, path: &Path) -> Result<PathBuf, Error> {
        let canonical = path
            .canonicalize()
            .map_err(|e| anyhow!("Module '{}' not found: {}", path.display(), e))?;

        if !canonical.starts_with(&self.root) {
            return Err(anyhow!(
                "Access denied: '{}' is outside the server build directory",
                path.display()
            ));
        }

        if !matches!(canonical.extension().and_then(|e| e.to_str()), Some("js") | Some("mjs")) {
            return Err(anyhow!("Only .js and .mjs modules can be loaded, got: {}", path.display()));
        }

        Ok(canonical)
    }

    fn resolve_specifier(&self, specifier: &str, referrer: &str) -> Result<ModuleSpecifier, Error> {
        if REMOTE_SCHEMES.iter().any(|scheme| specifier.starts_with(scheme)) {
            return Err(anyhow!("Remote imports are forbidden: {}", specifier));
        }

        if specifier.starts_with("./") || specifier.starts_with("../") {
            let base = ModuleSpecifier::parse(referrer)
                .map_err(|e| anyhow!("Invalid referrer '{}': {}", referrer, e))?;
            return base
                .join(specifier)
                .map_err(|e| anyhow!("Failed to resolve '{}': {}", specifier, e));
        }

        if specifier.starts_with("file://") {
            return ModuleSpecifier::parse(specifier)
                .map_err(|e| anyhow!("Invalid file URL '{}': {}", specifier, e));
        }

        // Absolute paths stay absolute; bare names are chunk names at the root
        let path = if specifier.starts_with('/') {
            PathBuf::from(specifier)
        } else {
            self.root.join(specifier)
        };
        ModuleSpecifier::from_file_path(&path)
            .map_err(|_| anyhow!("Invalid module specifier: {}", specifier))
    }
}

impl ModuleLoader for BundleLoader {
    fn resolve(
        &self,
        specifier: &str,
        referrer: &str,
        _kind: ResolutionKind,
    ) -> Result<ModuleSpecifier, Error> {
        let resolved = self.resolve_specifier(specifier, referrer)?;

        if resolved.scheme() != "file" {
            return Err(anyhow!("Only file:// modules allowed, got: {}", resolved.scheme()));
        }

        let path = resolved
            .to_file_path()
            .map_err(|_| anyhow!("Failed to convert URL to path: {}", resolved))?;
        self.check(&path)?;

        Ok(resolved)
    }

    fn load(
        &self,
        module_specifier: &ModuleSpecifier,
        _maybe_referrer: Option<&ModuleSpecifier>,
        _is_dyn_import: bool,
        _requested_module_type: RequestedModuleType,
    ) -> ModuleLoadResponse {
        let load = || -> Result<ModuleSource, Error> {
            let path = module_specifier
                .to_file_path()
                .map_err(|_| anyhow!("Invalid file path: {}", module_specifier))?;
            let path = self.check(&path)?;

            let code = std::fs::read_to_string(&path)
                .map_err(|e| anyhow!("Failed to read '{}': {}", path.display(), e))?;

            tracing::trace!(module = %module_specifier, bytes = code.len(), "Loaded module");

            Ok(ModuleSource::new(
                ModuleType::JavaScript,
                ModuleSourceCode::String(code.into()),
                module_specifier,
                None,
            ))
        };

        ModuleLoadResponse::Sync(load())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn referrer(dir: &Path) -> String {
        format!("file://{}/renderfile.js", dir.canonicalize().unwrap().display())
    }

    #[test]
    fn test_blocks_remote_urls() {
        let dir = tempdir().unwrap();
        let loader = BundleLoader::new(dir.path()).unwrap();

        for specifier in ["https://evil.com/payload.js", "node:fs", "data:text/javascript,1"] {
            let result = loader.resolve(specifier, &referrer(dir.path()), ResolutionKind::Import);
            assert!(result.unwrap_err().to_string().contains("Remote imports are forbidden"));
        }
    }

    #[test]
    fn test_blocks_path_traversal() {
        let dir = tempdir().unwrap();
        let outside = tempdir().unwrap();
        fs::write(outside.path().join("secret.js"), "export default 1;").unwrap();
        let loader = BundleLoader::new(dir.path()).unwrap();

        let escaped = outside.path().join("secret.js");
        let from = referrer(dir.path());
        let result = loader.resolve(escaped.to_str().unwrap(), &from, ResolutionKind::Import);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("outside the server build directory"));

        let result = loader.resolve("../../../etc/passwd", &from, ResolutionKind::Import);
        assert!(result.is_err());
    }

    #[test]
    fn test_resolves_relative_and_bare_chunks() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("chunks")).unwrap();
        fs::write(dir.path().join("chunks/button-abc123.js"), "export default 1;").unwrap();
        let loader = BundleLoader::new(dir.path()).unwrap();

        let from = referrer(dir.path());
        let relative = loader.resolve("./chunks/button-abc123.js", &from, ResolutionKind::Import);
        let bare = loader.resolve("chunks/button-abc123.js", &from, ResolutionKind::Import);

        assert_eq!(relative.unwrap(), bare.unwrap());
    }

    #[test]
    fn test_blocks_non_js_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("template.html"), "<html></html>").unwrap();
        let loader = BundleLoader::new(dir.path()).unwrap();

        let from = referrer(dir.path());
        let result = loader.resolve("./template.html", &from, ResolutionKind::Import);
        assert!(result.unwrap_err().to_string().contains("Only .js and .mjs"));
    }

    #[test]
    fn test_module_url_requires_existing_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("renderfile.js"), "export {};").unwrap();
        let loader = BundleLoader::new(dir.path()).unwrap();

        assert_eq!(loader.module_url(&dir.path().join("renderfile.js")).unwrap().scheme(), "file");
        assert!(loader.module_url(&dir.path().join("exports.js")).is_err());
    }
}
