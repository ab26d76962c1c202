//! On-demand bundling of the dynamic-fetch worker script.
//!
//! When dynamic builds are enabled, the root index module exports a
//! `fetchContent` function that spawns a worker thread pointed at a single
//! self-contained script. That script re-invokes content resolution and
//! generation out-of-process, so it cannot reach the parent process's
//! in-memory configuration — everything it needs (config file path, config
//! hash, tool version, working directory) is captured **at bundle time** and
//! embedded as literals in a small synthesized entry script.
//!
//! Actual bundling is delegated to an external esbuild-like collaborator via
//! [`WorkerBundler`]. This module owns the request shape: ESM output for a
//! server runtime, a banner injecting the `require` shim and `__dirname`
//! placeholder the format lacks, a loader rule treating native-extension
//! files as opaque assets, an exclude list of known-unbundlable packages,
//! and the [`SourceToDistPlugin`] that keeps the tool's own internal
//! packages from being bundled twice.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// File name of the bundled worker inside `generated/`.
pub const DYNAMIC_WORKER_FILE: &str = "dynamic-build-worker.mjs";

/// Import-specifier prefix of the tool's own internal packages.
const INTERNAL_PACKAGE_NAMESPACE: &str = "@contentgen/";

/// Packages the external bundler is known to choke on; always excluded.
const UNBUNDLABLE_PACKAGES: &[&str] = &["esbuild", "fsevents"];

/// ESM output has no `require` or `__dirname`; the banner injects both.
const ESM_BANNER: &str = "import { createRequire } from 'node:module';\n\
const require = createRequire(import.meta.url);\n\
const __dirname = '.';";

#[derive(Error, Debug)]
#[error("bundler failed: {message}")]
pub struct BundleError {
    pub message: String,
}

#[derive(Error, Debug)]
pub enum VersionError {
    #[error("failed to resolve working directory: {0}")]
    Cwd(#[from] std::io::Error),
    #[error("tool version string is unavailable")]
    Unavailable,
}

/// Values captured at bundle time for the worker entry script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicBuildConfig {
    /// Path of the originating configuration file.
    pub config_path: PathBuf,
    /// Build hash of the compiled configuration.
    pub config_hash: String,
    /// Version string of the resolving tool.
    pub tool_version: String,
    /// Working directory the worker should resolve content from.
    pub cwd: PathBuf,
}

impl DynamicBuildConfig {
    /// Capture the current working directory and the tool's own version.
    pub fn detect(
        config_path: impl Into<PathBuf>,
        config_hash: impl Into<String>,
    ) -> Result<Self, VersionError> {
        let cwd = std::env::current_dir()?;
        let tool_version = option_env!("CARGO_PKG_VERSION")
            .ok_or(VersionError::Unavailable)?
            .to_string();
        Ok(Self {
            config_path: config_path.into(),
            config_hash: config_hash.into(),
            tool_version,
            cwd,
        })
    }
}

/// Target platform for the bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Node,
}

/// Output module format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleFormat {
    Esm,
}

/// How the bundler should load files matching an extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderRule {
    pub extension: String,
    pub loader: Loader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loader {
    /// Emit the file as an opaque asset and import its path.
    File,
}

/// Everything the external bundler needs for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleRequest {
    pub entry_source: String,
    pub resolve_dir: PathBuf,
    pub platform: Platform,
    pub format: ModuleFormat,
    pub bundle: bool,
    pub banner: String,
    pub loader_rules: Vec<LoaderRule>,
    pub externals: Vec<String>,
    pub plugins: Vec<SourceToDistPlugin>,
    pub outfile: PathBuf,
}

/// Non-fatal diagnostics from a successful bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleOutput {
    pub warnings: Vec<String>,
}

/// External bundler collaborator (esbuild-like).
#[async_trait]
pub trait WorkerBundler: Send + Sync {
    async fn bundle(&self, request: &BundleRequest) -> Result<BundleOutput, BundleError>;
}

/// Module-resolution plugin rewriting internal-package source paths to their
/// distribution tree.
///
/// The external bundler resolves `@contentgen/*` specifiers to the package's
/// `src/` tree when a workspace checkout is on disk, which would bundle a
/// second, incompatible copy of modules the worker also receives through the
/// `dist/` tree. The plugin intercepts specifiers under the internal
/// namespace, lets resolution proceed normally, then rewrites any resolved
/// path under `src/` to its `dist/` sibling (`.ts` → `.js`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceToDistPlugin {
    /// Specifier prefix the plugin intercepts.
    pub package_filter: String,
}

impl SourceToDistPlugin {
    pub fn internal() -> Self {
        Self {
            package_filter: INTERNAL_PACKAGE_NAMESPACE.to_string(),
        }
    }

    /// Whether an import specifier falls under the intercepted namespace.
    pub fn applies_to(&self, specifier: &str) -> bool {
        specifier.starts_with(&self.package_filter)
    }

    /// Rewrite a resolved source-tree path to its distribution-tree sibling.
    /// Returns `None` when the path is not under a `src/` segment, in which
    /// case the resolution stands as-is.
    pub fn rewrite(&self, resolved: &Path) -> Option<PathBuf> {
        let s = resolved.to_str()?;
        let idx = s.find("/src/")?;
        let mut rewritten = format!("{}/dist/{}", &s[..idx], &s[idx + "/src/".len()..]);
        if let Some(stem) = rewritten.strip_suffix(".ts") {
            rewritten = format!("{stem}.js");
        }
        Some(PathBuf::from(rewritten))
    }
}

/// Synthesize the worker entry script, embedding the captured configuration
/// as literals. Values go through JSON string escaping so arbitrary paths
/// cannot break out of the literal.
pub fn render_worker_entry(config: &DynamicBuildConfig) -> String {
    let config_path = js_string(&config.config_path.to_string_lossy());
    let config_hash = js_string(&config.config_hash);
    let tool_version = js_string(&config.tool_version);
    let cwd = js_string(&config.cwd.to_string_lossy());
    format!(
        "import {{ parentPort, workerData }} from 'node:worker_threads'\n\
         import {{ runDynamicBuild }} from '{INTERNAL_PACKAGE_NAMESPACE}core'\n\
         \n\
         try {{\n\
         \x20 const result = await runDynamicBuild({{\n\
         \x20   configPath: {config_path},\n\
         \x20   configHash: {config_hash},\n\
         \x20   toolVersion: {tool_version},\n\
         \x20   cwd: {cwd},\n\
         \x20   sourceKey: workerData.sourceKey,\n\
         \x20 }})\n\
         \x20 parentPort.postMessage({{ result }})\n\
         }} catch (error) {{\n\
         \x20 parentPort.postMessage({{ fatalError: String(error && error.stack ? error.stack : error) }})\n\
         }}\n"
    )
}

/// Build the full bundle request for the dynamic-build worker.
pub fn worker_bundle_request(config: &DynamicBuildConfig, outfile: PathBuf) -> BundleRequest {
    BundleRequest {
        entry_source: render_worker_entry(config),
        resolve_dir: config.cwd.clone(),
        platform: Platform::Node,
        format: ModuleFormat::Esm,
        bundle: true,
        banner: ESM_BANNER.to_string(),
        loader_rules: vec![LoaderRule {
            extension: ".node".to_string(),
            loader: Loader::File,
        }],
        externals: UNBUNDLABLE_PACKAGES.iter().map(|s| (*s).to_string()).collect(),
        plugins: vec![SourceToDistPlugin::internal()],
        outfile,
    }
}

/// Bundle the worker into `<package>/generated/dynamic-build-worker.mjs`.
///
/// Bundler warnings are logged and never fail the step; bundler errors
/// surface as [`BundleError`].
pub async fn bundle_dynamic_worker(
    bundler: &dyn WorkerBundler,
    config: &DynamicBuildConfig,
    package_dir: &Path,
) -> Result<BundleOutput, BundleError> {
    let outfile = package_dir.join("generated").join(DYNAMIC_WORKER_FILE);
    let request = worker_bundle_request(config, outfile);
    let output = bundler.bundle(&request).await?;
    for warning in &output.warnings {
        warn!(%warning, "bundler warning");
    }
    debug!(outfile = %request.outfile.display(), "dynamic-build worker bundled");
    Ok(output)
}

fn js_string(value: &str) -> String {
    // serde_json string rendering is valid JS string literal syntax.
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DynamicBuildConfig {
        DynamicBuildConfig {
            config_path: PathBuf::from("/project/content.config.ts"),
            config_hash: "cfg123".into(),
            tool_version: "0.3.0".into(),
            cwd: PathBuf::from("/project"),
        }
    }

    #[test]
    fn entry_script_embeds_all_captured_values() {
        let script = render_worker_entry(&config());
        assert!(script.contains(r#"configPath: "/project/content.config.ts""#));
        assert!(script.contains(r#"configHash: "cfg123""#));
        assert!(script.contains(r#"toolVersion: "0.3.0""#));
        assert!(script.contains(r#"cwd: "/project""#));
        assert!(script.contains("sourceKey: workerData.sourceKey"));
        assert!(script.contains("parentPort.postMessage({ result })"));
        assert!(script.contains("fatalError"));
    }

    #[test]
    fn entry_script_escapes_special_characters() {
        let mut cfg = config();
        cfg.config_path = PathBuf::from(r#"/pro"ject/config.ts"#);
        let script = render_worker_entry(&cfg);
        assert!(script.contains(r#"configPath: "/pro\"ject/config.ts""#));
    }

    #[test]
    fn bundle_request_shape() {
        let request = worker_bundle_request(&config(), PathBuf::from("/pkg/generated/w.mjs"));
        assert_eq!(request.platform, Platform::Node);
        assert_eq!(request.format, ModuleFormat::Esm);
        assert!(request.bundle);
        assert!(request.banner.contains("createRequire"));
        assert!(request.banner.contains("__dirname"));
        assert_eq!(request.loader_rules[0].extension, ".node");
        assert_eq!(request.loader_rules[0].loader, Loader::File);
        assert!(request.externals.contains(&"esbuild".to_string()));
        assert_eq!(request.resolve_dir, PathBuf::from("/project"));
    }

    #[test]
    fn plugin_intercepts_internal_namespace_only() {
        let plugin = SourceToDistPlugin::internal();
        assert!(plugin.applies_to("@contentgen/core"));
        assert!(plugin.applies_to("@contentgen/source-files/fetch"));
        assert!(!plugin.applies_to("react"));
        assert!(!plugin.applies_to("node:path"));
    }

    #[test]
    fn plugin_rewrites_src_to_dist() {
        let plugin = SourceToDistPlugin::internal();
        let rewritten = plugin
            .rewrite(Path::new("/repo/packages/core/src/fetch/index.ts"))
            .unwrap();
        assert_eq!(
            rewritten,
            PathBuf::from("/repo/packages/core/dist/fetch/index.js")
        );
    }

    #[test]
    fn plugin_leaves_non_source_paths_alone() {
        let plugin = SourceToDistPlugin::internal();
        assert_eq!(
            plugin.rewrite(Path::new("/repo/packages/core/dist/index.js")),
            None
        );
    }

    #[test]
    fn plugin_rewrites_only_first_src_segment() {
        let plugin = SourceToDistPlugin::internal();
        let rewritten = plugin
            .rewrite(Path::new("/repo/src/nested/src/mod.ts"))
            .unwrap();
        assert_eq!(rewritten, PathBuf::from("/repo/dist/nested/src/mod.js"));
    }

    #[test]
    fn detect_captures_cwd_and_version() {
        let cfg = DynamicBuildConfig::detect("/p/config.ts", "hash1").unwrap();
        assert_eq!(cfg.config_path, PathBuf::from("/p/config.ts"));
        assert_eq!(cfg.config_hash, "hash1");
        assert!(!cfg.tool_version.is_empty());
        assert!(cfg.cwd.is_absolute());
    }
}
