//! Shared types consumed and produced by the generation pipeline.
//!
//! The schema ([`SchemaDef`]) and the fetched data ([`DataCache`]) are
//! produced by external collaborators and consumed read-only here. Both are
//! serializable because the debug flag snapshots them verbatim to the
//! `.cache/` directory.
//!
//! Iteration order matters: artifact synthesis must be deterministic across
//! runs, so both maps are `BTreeMap` — the set of types and the set of cache
//! items always enumerate in the same order for the same input.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Definition of one document type within a schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentTypeDef {
    /// Type name, unique within the schema (e.g. `Post`).
    pub name: String,
    /// Singleton types hold exactly one document; collection types hold many.
    pub is_singleton: bool,
    /// Changes iff the type's shape changes.
    pub hash: String,
}

/// A resolved content schema: document type definitions plus an overall hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDef {
    /// Type definitions keyed by type name.
    pub document_type_defs: BTreeMap<String, DocumentTypeDef>,
    /// Overall schema hash; changes iff the schema's shape changes.
    pub hash: String,
}

impl SchemaDef {
    /// Type definitions in deterministic (name) order.
    pub fn type_defs(&self) -> impl Iterator<Item = &DocumentTypeDef> {
        self.document_type_defs.values()
    }
}

/// One resolved content document: a free-form field map.
///
/// Invariants guaranteed by the fetch collaborator (not re-validated here):
/// an `_id` field unique across the fetched set, and a type-discriminator
/// field (name configured via [`GenerationOptions::type_field_name`]) naming
/// an existing type in the paired schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl Document {
    /// The document's `_id`, if present and a string.
    pub fn id(&self) -> Option<&str> {
        self.fields.get("_id").and_then(|v| v.as_str())
    }

    /// The owning type's name, read from the configured discriminator field.
    pub fn type_name<'a>(&'a self, type_field_name: &str) -> Option<&'a str> {
        self.fields.get(type_field_name).and_then(|v| v.as_str())
    }
}

/// One fetched document plus its content fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheItem {
    pub document: Document,
    /// Content fingerprint computed by the fetch collaborator.
    pub document_hash: String,
}

/// A snapshot of fetched documents, keyed by the fetch collaborator's key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataCache {
    pub cache_items_map: BTreeMap<String, CacheItem>,
}

impl DataCache {
    /// Number of documents in the snapshot.
    pub fn len(&self) -> usize {
        self.cache_items_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache_items_map.is_empty()
    }
}

/// Renders one document type's declaration for `generated/types.d.ts`.
pub type TypeRenderer = fn(&DocumentTypeDef) -> String;

/// Options fixed for the duration of one pipeline invocation.
#[derive(Debug, Clone)]
pub struct GenerationOptions {
    /// Name of the source plugin that produced the content (informational,
    /// embedded in the generated package description).
    pub source_plugin_type: String,
    /// Name of the type-discriminator field on every document.
    pub type_field_name: String,
    /// When set, bundle the dynamic-build worker and export `fetchContent`
    /// from the root index module.
    pub enable_dynamic_build: bool,
    /// When set, snapshot the raw schema and data cache to `.cache/` for
    /// diagnostics. Has no effect on correctness.
    pub debug_snapshots: bool,
    /// Forwarded to the data fetcher.
    pub verbose: bool,
    /// Renderer for per-type declarations in `generated/types.d.ts`.
    pub type_renderer: TypeRenderer,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            source_plugin_type: "local".to_string(),
            type_field_name: "type".to_string(),
            enable_dynamic_build: false,
            debug_snapshots: false,
            verbose: false,
            type_renderer: default_type_renderer,
        }
    }
}

/// Default per-type declaration: an open record with the two fields every
/// document is guaranteed to carry.
pub fn default_type_renderer(def: &DocumentTypeDef) -> String {
    format!(
        "export type {name} = {{\n  _id: string\n  type: '{name}'\n  [field: string]: unknown\n}}\n",
        name = def.name
    )
}

/// Shape of the per-type import in the root index module.
///
/// Dev/streaming cycles import the `.mjs` barrel so freshly written document
/// files are picked up by module-graph watchers; one-shot cycles import the
/// aggregate JSON with an import attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexImportShape {
    /// `import allPosts from './Post/_index.json' with { type: 'json' }`
    JsonAsserted,
    /// `import { allPosts } from './Post/_index.mjs'`
    Module,
}
