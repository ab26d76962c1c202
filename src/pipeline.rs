//! The generation pipeline: one failure-aware unit of work composing schema
//! resolution, data fetch, artifact synthesis, incremental writes, optional
//! worker bundling, and an optional success callback.
//!
//! ## Stages per cycle
//!
//! ```text
//! ResolvingInputs → Writing → (Bundling?) → Callback → Done
//! ```
//!
//! - **ResolvingInputs**: the target package directory and the schema are
//!   resolved concurrently; either failing aborts the cycle.
//! - **Writing**: artifacts are synthesized from the fetched snapshot and
//!   written as one concurrent batch through the [`WriteCache`]. All writes
//!   settle before the batch is judged; partial writes committed before a
//!   failure stay on disk (a later successful cycle repairs them).
//! - **Bundling**: only when dynamic builds are enabled; runs after the
//!   write batch settles.
//! - **Callback**: a configured [`SuccessCallback`] receives the path of the
//!   freshly generated root index module. Callback failures are first-class
//!   cycle failures, not swallowed.
//!
//! ## One-shot vs. streaming
//!
//! [`Pipeline::run_once`] takes the first fetch emission and finishes,
//! surfacing the cycle outcome as a `Result`. [`Pipeline::run_stream`] runs
//! one full cycle per emission and yields each cycle's outcome as a stream
//! element — a failed cycle does not terminate the stream, so a long-running
//! watch process keeps going. Cycle *N+1* is not polled before cycle *N*
//! settles, and the [`WriteCache`] lives for the whole stream, so unchanged
//! artifacts are skipped across cycles.
//!
//! Every fallible step returns a typed error; the cycle-level
//! [`GenerateError`] preserves the original error's identity. There are no
//! automatic retries.

use crate::artifacts::{self, SynthesisError};
use crate::bundler::{self, BundleError, DynamicBuildConfig, VersionError, WorkerBundler};
use crate::cache::{WriteCache, WriteError, WriteStats};
use crate::types::{DataCache, GenerationOptions, IndexImportShape, SchemaDef};
use async_trait::async_trait;
use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
#[error("schema provision failed: {message}")]
pub struct SchemaError {
    pub message: String,
}

#[derive(Error, Debug)]
#[error("data fetch failed: {message}")]
pub struct FetchError {
    pub message: String,
}

#[derive(Error, Debug)]
#[error("success callback failed: {message}")]
pub struct CallbackError {
    pub message: String,
}

/// Failure of one generation cycle. Wraps the originating step's error
/// without downgrading it to a generic message.
#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("failed to resolve output directory {path}: {source}")]
    ResolveTargetDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),
    #[error("failed to create directory {path}: {source}")]
    Mkdir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error(transparent)]
    Bundle(#[from] BundleError),
    #[error(transparent)]
    Version(#[from] VersionError),
    #[error(transparent)]
    Callback(#[from] CallbackError),
    #[error("data fetch stream ended without emitting a snapshot")]
    EmptyFetchStream,
    #[error("dynamic build enabled but no bundler or build source configured")]
    DynamicBuildUnconfigured,
}

/// Resolves a schema for a build identifier.
#[async_trait]
pub trait SchemaProvider: Send + Sync {
    async fn provide_schema(&self, build_hash: &str) -> Result<SchemaDef, SchemaError>;
}

/// Produces a lazy, potentially unbounded sequence of data snapshots — one
/// per upstream trigger (e.g. a filesystem-watch event). Errors are
/// per-emission; the sequence may continue after one.
pub trait DataFetcher: Send + Sync {
    fn fetch_data(
        &self,
        schema: &SchemaDef,
        verbose: bool,
    ) -> BoxStream<'static, Result<DataCache, FetchError>>;
}

/// Invoked once per successful cycle with the path of the freshly generated
/// root index module. Loading the module is the embedder's concern — the
/// pipeline never dynamically imports generated code itself.
#[async_trait]
pub trait SuccessCallback: Send + Sync {
    async fn on_success(&self, index_module: &Path) -> Result<(), CallbackError>;
}

/// Where the dynamic-build worker's embedded configuration comes from.
/// The working directory and tool version are captured at bundle time.
#[derive(Debug, Clone)]
pub struct DynamicBuildSource {
    pub config_path: PathBuf,
    pub config_hash: String,
}

/// Outcome of one successful generation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationSummary {
    /// Number of documents in the generated package.
    pub documents: usize,
    /// Write activity for the cycle's artifact batch.
    pub stats: WriteStats,
}

/// The generation pipeline. Construct with [`Pipeline::new`], attach the
/// optional collaborators, then drive with [`run_once`](Pipeline::run_once)
/// or [`run_stream`](Pipeline::run_stream).
pub struct Pipeline {
    schema_provider: Arc<dyn SchemaProvider>,
    fetcher: Arc<dyn DataFetcher>,
    bundler: Option<Arc<dyn WorkerBundler>>,
    dynamic_build: Option<DynamicBuildSource>,
    on_success: Option<Arc<dyn SuccessCallback>>,
    options: GenerationOptions,
}

impl Pipeline {
    pub fn new(
        schema_provider: Arc<dyn SchemaProvider>,
        fetcher: Arc<dyn DataFetcher>,
        options: GenerationOptions,
    ) -> Self {
        Self {
            schema_provider,
            fetcher,
            bundler: None,
            dynamic_build: None,
            on_success: None,
            options,
        }
    }

    pub fn with_bundler(mut self, bundler: Arc<dyn WorkerBundler>) -> Self {
        self.bundler = Some(bundler);
        self
    }

    pub fn with_dynamic_build(mut self, source: DynamicBuildSource) -> Self {
        self.dynamic_build = Some(source);
        self
    }

    pub fn with_success_callback(mut self, callback: Arc<dyn SuccessCallback>) -> Self {
        self.on_success = Some(callback);
        self
    }

    /// One-shot generation: resolve inputs, take the first fetch emission,
    /// run one cycle with the production (JSON-attribute) index shape.
    pub async fn run_once(
        &self,
        package_dir: &Path,
        build_hash: &str,
    ) -> Result<GenerationSummary, GenerateError> {
        let write_cache = WriteCache::new();
        let schema = self.resolve_inputs(package_dir, build_hash).await?;
        let mut emissions = self.fetcher.fetch_data(&schema, self.options.verbose);
        let data = emissions
            .next()
            .await
            .ok_or(GenerateError::EmptyFetchStream)??;
        self.run_cycle(
            &schema,
            &data,
            package_dir,
            &write_cache,
            IndexImportShape::JsonAsserted,
        )
        .await
    }

    /// Streaming generation: one full cycle per fetch emission, each cycle's
    /// outcome yielded as a stream element. Uses the dev (`.mjs`) index
    /// shape so module-graph watchers pick up regenerated documents.
    ///
    /// Stopping the upstream producer ends the stream after the cycle in
    /// flight; a cycle already writing is never aborted mid-batch.
    pub fn run_stream<'a>(
        &'a self,
        package_dir: &Path,
        build_hash: &str,
    ) -> BoxStream<'a, Result<GenerationSummary, GenerateError>> {
        enum State {
            Init,
            Running {
                schema: Arc<SchemaDef>,
                emissions: BoxStream<'static, Result<DataCache, FetchError>>,
                write_cache: Arc<WriteCache>,
            },
            Done,
        }

        let package_dir = package_dir.to_path_buf();
        let build_hash = build_hash.to_string();
        stream::unfold(State::Init, move |state| {
            let package_dir = package_dir.clone();
            let build_hash = build_hash.clone();
            async move {
                let mut state = state;
                loop {
                    match state {
                        State::Init => match self.resolve_inputs(&package_dir, &build_hash).await
                        {
                            Ok(schema) => {
                                let emissions =
                                    self.fetcher.fetch_data(&schema, self.options.verbose);
                                state = State::Running {
                                    schema: Arc::new(schema),
                                    emissions,
                                    write_cache: Arc::new(WriteCache::new()),
                                };
                            }
                            Err(err) => return Some((Err(err), State::Done)),
                        },
                        State::Running {
                            schema,
                            mut emissions,
                            write_cache,
                        } => {
                            return match emissions.next().await {
                                None => None,
                                Some(Err(err)) => Some((
                                    Err(err.into()),
                                    State::Running {
                                        schema,
                                        emissions,
                                        write_cache,
                                    },
                                )),
                                Some(Ok(data)) => {
                                    let outcome = self
                                        .run_cycle(
                                            &schema,
                                            &data,
                                            &package_dir,
                                            &write_cache,
                                            IndexImportShape::Module,
                                        )
                                        .await;
                                    Some((
                                        outcome,
                                        State::Running {
                                            schema,
                                            emissions,
                                            write_cache,
                                        },
                                    ))
                                }
                            };
                        }
                        State::Done => return None,
                    }
                }
            }
        })
        .boxed()
    }

    /// Resolve the target directory and the schema concurrently. Both start
    /// independently; either failing aborts the cycle with that error.
    async fn resolve_inputs(
        &self,
        package_dir: &Path,
        build_hash: &str,
    ) -> Result<SchemaDef, GenerateError> {
        let ensure_dir = async {
            tokio::fs::create_dir_all(package_dir).await.map_err(|source| {
                GenerateError::ResolveTargetDir {
                    path: package_dir.to_path_buf(),
                    source,
                }
            })
        };
        let schema = async {
            self.schema_provider
                .provide_schema(build_hash)
                .await
                .map_err(GenerateError::Schema)
        };
        let ((), schema) = futures::try_join!(ensure_dir, schema)?;
        debug!(
            hash = %schema.hash,
            types = schema.document_type_defs.len(),
            "schema resolved"
        );
        Ok(schema)
    }

    async fn run_cycle(
        &self,
        schema: &SchemaDef,
        data: &DataCache,
        package_dir: &Path,
        write_cache: &WriteCache,
        shape: IndexImportShape,
    ) -> Result<GenerationSummary, GenerateError> {
        debug!(documents = data.len(), "generation cycle started");
        let package =
            artifacts::synthesize_package(schema, data, &self.options, shape, package_dir)?;

        // Directory creation is idempotent and must complete before any file
        // inside it is written.
        future::try_join_all(package.directories.iter().map(|dir| async move {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| GenerateError::Mkdir {
                    path: dir.clone(),
                    source,
                })
        }))
        .await?;

        // The whole batch fans out and settles before being judged, so a
        // failed write never aborts its siblings mid-flight.
        let results = future::join_all(package.artifacts.iter().map(|artifact| {
            write_cache.write(
                &artifact.file_path,
                &artifact.content,
                artifact.fingerprint.as_deref(),
                artifact.rm_before_write,
            )
        }))
        .await;
        let mut stats = WriteStats::default();
        for result in results {
            stats.record(result?);
        }
        debug!(%stats, "artifact batch settled");

        self.bundle_step(package_dir).await?;

        if let Some(callback) = &self.on_success {
            let index_module = package_dir.join("generated").join("index.mjs");
            callback
                .on_success(&index_module)
                .await
                .map_err(GenerateError::Callback)?;
        }

        Ok(GenerationSummary {
            documents: package.document_count,
            stats,
        })
    }

    async fn bundle_step(&self, package_dir: &Path) -> Result<(), GenerateError> {
        if !self.options.enable_dynamic_build {
            return Ok(());
        }
        let (bundler, source) = match (self.bundler.as_deref(), self.dynamic_build.as_ref()) {
            (Some(bundler), Some(source)) => (bundler, source),
            _ => return Err(GenerateError::DynamicBuildUnconfigured),
        };
        let config = DynamicBuildConfig::detect(&source.config_path, &source.config_hash)?;
        bundler::bundle_dynamic_worker(bundler, &config, package_dir).await?;
        Ok(())
    }
}
