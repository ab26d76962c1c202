//! # contentgen
//!
//! The generation stage of a content-to-code pipeline: given a resolved
//! content schema and a set of fetched content documents, deterministically
//! synthesize a data package on disk — per-document JSON snapshots, per-type
//! data modules, a root index module, type declarations, and a package
//! manifest — and do it incrementally, so repeated invocations (a watch/dev
//! loop) only rewrite what actually changed.
//!
//! # Architecture
//!
//! Everything flows strictly downstream:
//!
//! ```text
//! schema + fetched documents → synthesized artifacts → filtered-by-cache
//! writes → side effects (worker bundle, success callback)
//! ```
//!
//! Schema resolution, data fetch, and bundling are external collaborators,
//! supplied as trait objects ([`pipeline::SchemaProvider`],
//! [`pipeline::DataFetcher`], [`bundler::WorkerBundler`]); this crate owns
//! only what happens between them. Artifact synthesis is a pure function —
//! tests can exercise the full package layout without touching the
//! filesystem.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`types`] | Data model: schema, documents, data cache, generation options |
//! | [`naming`] | Stable, collision-free identifier and file-name derivation |
//! | [`cache`] | Skip-unchanged write cache — one fingerprint per output path |
//! | [`artifacts`] | Pure formatters producing the full artifact set per cycle |
//! | [`bundler`] | Dynamic-fetch worker bundling via an external esbuild-like bundler |
//! | [`pipeline`] | Orchestration: one-shot and streaming generation entry points |
//!
//! # Incrementality
//!
//! The write cache is invocation-scoped and never persisted: a fresh process
//! writes everything once, then skips unchanged fingerprinted artifacts for
//! as long as the invocation (or streaming session) lives. Document files
//! are fingerprinted by the fetch stage's per-document hash; aggregate files
//! by the ordered concatenation of member hashes, so reorders invalidate
//! them too. Cheap artifacts (manifest, declarations, index, barrels) are
//! rewritten every cycle, and the declaration files are deleted first so
//! editors watching them see the change.
//!
//! # One-shot vs. streaming
//!
//! [`pipeline::Pipeline::run_once`] processes the first data snapshot and
//! finishes — the production build path. [`pipeline::Pipeline::run_stream`]
//! runs one cycle per snapshot emission and yields each cycle's outcome
//! (summary or typed error) as a stream element, so a watch process keeps
//! running through failed cycles.

pub mod artifacts;
pub mod bundler;
pub mod cache;
pub mod naming;
pub mod pipeline;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
