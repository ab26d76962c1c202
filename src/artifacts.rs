//! Artifact synthesis: pure formatters from schema + fetched data to the
//! full set of files that make up the generated data package.
//!
//! Nothing in this module touches the filesystem. Each formatter maps typed
//! input to a string payload plus a declared file path and an optional
//! fingerprint; the pipeline decides what actually hits disk (via
//! [`crate::cache::WriteCache`]). Keeping all target-format knowledge (JSON
//! vs. declaration syntax vs. manifest syntax) isolated per formatter means
//! new output formats can be added without touching the orchestration.
//!
//! ## Generated package layout
//!
//! ```text
//! <package>/
//! ├── package.json                   # manifest, version embeds schema hash
//! ├── generated/
//! │   ├── types.d.ts                 # per-type declarations
//! │   ├── index.d.ts                 # data-constant declarations
//! │   ├── index.mjs                  # root index module
//! │   ├── Page/
//! │   │   ├── home.json              # one file per document
//! │   │   ├── _index.mjs             # barrel (dev form)
//! │   │   └── _index.json            # aggregate (production form)
//! │   └── Post/
//! │       └── ...
//! └── .cache/                        # debug snapshots (optional)
//! ```
//!
//! ## Freshness
//!
//! Individual document files are fingerprinted by their `documentHash`;
//! aggregate files by the concatenation of member hashes in order, so any
//! reorder or member change invalidates them. Everything else (manifest,
//! declarations, index, barrels) is cheap to regenerate and rewritten every
//! cycle; the two `.d.ts` files are additionally removed before each rewrite
//! because editors only pick up declaration changes on delete+recreate.

use crate::bundler::DYNAMIC_WORKER_FILE;
use crate::naming::{data_variable_name, document_identifier, id_to_file_name};
use crate::types::{
    CacheItem, DataCache, DocumentTypeDef, GenerationOptions, IndexImportShape, SchemaDef,
};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the generated package in its manifest.
const PACKAGE_NAME: &str = "dot-generated-content";

/// Subdirectory holding every generated module and snapshot.
const GENERATED_DIR: &str = "generated";

/// Subdirectory holding debug snapshots.
const DEBUG_CACHE_DIR: &str = ".cache";

#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("cache item {key:?} has no {field:?} discriminator field")]
    MissingTypeField { key: String, field: String },
    #[error("cache item {key:?} names unknown document type {type_name:?}")]
    UnknownType { key: String, type_name: String },
    #[error("cache item {key:?} has no _id field")]
    MissingId { key: String },
    #[error("failed to serialize {what}: {source}")]
    Serialize {
        what: String,
        source: serde_json::Error,
    },
}

/// An in-memory description of one file to materialize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub file_path: PathBuf,
    pub content: String,
    /// When present, enables skip-on-unchanged; when absent the artifact is
    /// unconditionally written every cycle.
    pub fingerprint: Option<String>,
    /// Remove the file before writing so downstream watchers see a delete.
    pub rm_before_write: bool,
}

/// The full ordered output of one synthesis pass.
#[derive(Debug)]
pub struct SynthesizedPackage {
    /// Artifacts in synthesis order. Paths are unique within one pass.
    pub artifacts: Vec<Artifact>,
    /// Directories that must exist before any artifact is written.
    pub directories: Vec<PathBuf>,
    /// Number of documents in the snapshot.
    pub document_count: usize,
}

/// One document prepared for emission: its cache entry plus derived names.
struct DocEntry<'a> {
    item: &'a CacheItem,
    file_name: String,
    identifier: String,
}

/// One document type with its data-variable name and ordered documents.
struct TypeBundle<'a> {
    def: &'a DocumentTypeDef,
    var_name: String,
    docs: Vec<DocEntry<'a>>,
}

/// Synthesize the complete artifact set for one generation cycle.
pub fn synthesize_package(
    schema: &SchemaDef,
    data: &DataCache,
    options: &GenerationOptions,
    shape: IndexImportShape,
    package_dir: &Path,
) -> Result<SynthesizedPackage, SynthesisError> {
    let bundles = build_type_bundles(schema, data, options)?;
    let generated = package_dir.join(GENERATED_DIR);

    let mut directories = vec![generated.clone()];
    for bundle in &bundles {
        directories.push(generated.join(&bundle.def.name));
    }

    let mut artifacts = Vec::new();

    artifacts.push(Artifact {
        file_path: package_dir.join("package.json"),
        content: render_package_manifest(schema, options)?,
        fingerprint: None,
        rm_before_write: false,
    });
    artifacts.push(Artifact {
        file_path: generated.join("types.d.ts"),
        content: render_type_declarations(schema, options),
        fingerprint: None,
        rm_before_write: true,
    });
    artifacts.push(Artifact {
        file_path: generated.join("index.d.ts"),
        content: render_data_declarations(&bundles, options.enable_dynamic_build),
        fingerprint: None,
        rm_before_write: true,
    });
    artifacts.push(Artifact {
        file_path: generated.join("index.mjs"),
        content: render_index_module(&bundles, shape, options.enable_dynamic_build),
        fingerprint: None,
        rm_before_write: false,
    });

    for bundle in &bundles {
        let type_dir = generated.join(&bundle.def.name);

        artifacts.push(Artifact {
            file_path: type_dir.join("_index.mjs"),
            content: render_barrel_module(bundle),
            fingerprint: None,
            rm_before_write: false,
        });

        for entry in &bundle.docs {
            artifacts.push(Artifact {
                file_path: type_dir.join(format!("{}.json", entry.file_name)),
                content: pretty_json(&entry.item.document, "document")?,
                fingerprint: Some(entry.item.document_hash.clone()),
                rm_before_write: false,
            });
        }

        artifacts.push(Artifact {
            file_path: type_dir.join("_index.json"),
            content: render_aggregate_json(bundle)?,
            fingerprint: Some(aggregate_fingerprint(bundle)),
            rm_before_write: false,
        });
    }

    if options.debug_snapshots {
        let cache_dir = package_dir.join(DEBUG_CACHE_DIR);
        directories.push(cache_dir.clone());
        artifacts.push(Artifact {
            file_path: cache_dir.join("schema.json"),
            content: pretty_json(schema, "schema snapshot")?,
            fingerprint: None,
            rm_before_write: false,
        });
        artifacts.push(Artifact {
            file_path: cache_dir.join("data-cache.json"),
            content: pretty_json(data, "data cache snapshot")?,
            fingerprint: None,
            rm_before_write: false,
        });
    }

    Ok(SynthesizedPackage {
        artifacts,
        directories,
        document_count: data.len(),
    })
}

/// Group cache items per type (preserving cache order within a type) and
/// derive per-document file names and identifiers.
fn build_type_bundles<'a>(
    schema: &'a SchemaDef,
    data: &'a DataCache,
    options: &GenerationOptions,
) -> Result<Vec<TypeBundle<'a>>, SynthesisError> {
    let mut by_type: BTreeMap<&str, Vec<(&str, &CacheItem)>> = BTreeMap::new();
    for (key, item) in &data.cache_items_map {
        let type_name = item
            .document
            .type_name(&options.type_field_name)
            .ok_or_else(|| SynthesisError::MissingTypeField {
                key: key.clone(),
                field: options.type_field_name.clone(),
            })?;
        if !schema.document_type_defs.contains_key(type_name) {
            return Err(SynthesisError::UnknownType {
                key: key.clone(),
                type_name: type_name.to_string(),
            });
        }
        by_type.entry(type_name).or_default().push((key, item));
    }

    let mut bundles = Vec::new();
    for def in schema.type_defs() {
        let var_name = data_variable_name(&def.name, def.is_singleton);
        // The data-variable name is reserved up front so no document's
        // synthesized identifier can shadow it inside the barrel file.
        let mut used: HashSet<String> = HashSet::new();
        used.insert(var_name.clone());

        let mut docs = Vec::new();
        for (index, &(key, item)) in by_type
            .get(def.name.as_str())
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .enumerate()
        {
            let id = item
                .document
                .id()
                .ok_or_else(|| SynthesisError::MissingId {
                    key: key.to_string(),
                })?;
            let identifier = document_identifier(id, &def.name, index, &used);
            used.insert(identifier.clone());
            docs.push(DocEntry {
                item,
                file_name: id_to_file_name(id),
                identifier,
            });
        }
        bundles.push(TypeBundle {
            def,
            var_name,
            docs,
        });
    }
    Ok(bundles)
}

// ============================================================================
// Formatters
// ============================================================================

/// Render the package manifest. The version string embeds the schema hash so
/// two schemas that differ produce distinguishable manifests.
pub fn render_package_manifest(
    schema: &SchemaDef,
    options: &GenerationOptions,
) -> Result<String, SynthesisError> {
    let manifest = serde_json::json!({
        "name": PACKAGE_NAME,
        "description": format!(
            "Data package generated from {} content. Do not edit by hand.",
            options.source_plugin_type
        ),
        "version": format!("0.0.0-{}", schema.hash),
        "exports": {
            "./generated": { "import": "./generated/index.mjs" }
        },
        "typesVersions": {
            "*": { "generated": ["./generated"] }
        },
    });
    pretty_json(&manifest, "package manifest")
}

fn render_type_declarations(schema: &SchemaDef, options: &GenerationOptions) -> String {
    let mut out = String::from("// Type declarations for the generated data package.\n\n");
    for def in schema.type_defs() {
        out.push_str(&(options.type_renderer)(def));
        out.push('\n');
    }
    out
}

fn render_data_declarations(bundles: &[TypeBundle<'_>], dynamic_build: bool) -> String {
    let type_names: Vec<&str> = bundles.iter().map(|b| b.def.name.as_str()).collect();
    let mut out = String::new();
    if !type_names.is_empty() {
        out.push_str(&format!(
            "import type {{ {} }} from './types'\n\n",
            type_names.join(", ")
        ));
    }
    for bundle in bundles {
        if bundle.def.is_singleton {
            // An empty singleton emits a null placeholder; the declaration
            // reflects the current snapshot so typed consumers see it.
            let nullable = if bundle.docs.is_empty() { " | null" } else { "" };
            out.push_str(&format!(
                "export declare const {}: {}{}\n",
                bundle.var_name, bundle.def.name, nullable
            ));
        } else {
            out.push_str(&format!(
                "export declare const {}: {}[]\n",
                bundle.var_name, bundle.def.name
            ));
        }
    }
    let mut union = if type_names.is_empty() {
        "never".to_string()
    } else {
        type_names.join(" | ")
    };
    if bundles.iter().any(|b| b.def.is_singleton && b.docs.is_empty()) {
        union.push_str(" | null");
    }
    out.push_str(&format!("\nexport declare const allDocuments: ({union})[]\n"));
    if dynamic_build {
        // The runtime resolves with the worker's unwrapped `result` value
        // and rejects on `fatalError`, so the promise type is `unknown`.
        out.push_str(
            "\nexport declare const fetchContent: (sourceKey: string) => Promise<unknown>\n",
        );
    }
    out
}

fn render_index_module(
    bundles: &[TypeBundle<'_>],
    shape: IndexImportShape,
    dynamic_build: bool,
) -> String {
    let mut out = String::new();
    for bundle in bundles {
        match shape {
            IndexImportShape::JsonAsserted => out.push_str(&format!(
                "import {var} from './{ty}/_index.json' with {{ type: 'json' }}\n",
                var = bundle.var_name,
                ty = bundle.def.name
            )),
            IndexImportShape::Module => out.push_str(&format!(
                "import {{ {var} }} from './{ty}/_index.mjs'\n",
                var = bundle.var_name,
                ty = bundle.def.name
            )),
        }
    }

    let var_names: Vec<&str> = bundles.iter().map(|b| b.var_name.as_str()).collect();
    if !var_names.is_empty() {
        out.push_str(&format!("\nexport {{ {} }}\n", var_names.join(", ")));
    }

    // Singletons contribute one element, collections are spread.
    let elements: Vec<String> = bundles
        .iter()
        .map(|b| {
            if b.def.is_singleton {
                b.var_name.clone()
            } else {
                format!("...{}", b.var_name)
            }
        })
        .collect();
    out.push_str(&format!(
        "\nexport const allDocuments = [{}]\n",
        elements.join(", ")
    ));

    if dynamic_build {
        out.push_str(&format!(
            "\nimport {{ Worker }} from 'node:worker_threads'\n\n\
             export const fetchContent = (sourceKey) =>\n\
             \x20 new Promise((resolve, reject) => {{\n\
             \x20   const worker = new Worker(new URL('./{DYNAMIC_WORKER_FILE}', import.meta.url), {{\n\
             \x20     workerData: {{ sourceKey }},\n\
             \x20   }})\n\
             \x20   worker.on('message', (message) => {{\n\
             \x20     if ('result' in message) resolve(message.result)\n\
             \x20     else reject(message.fatalError)\n\
             \x20     worker.terminate()\n\
             \x20   }})\n\
             \x20   worker.on('error', reject)\n\
             \x20 }})\n"
        ));
    }
    out
}

/// Render a type's barrel module.
///
/// Singletons re-export their one document directly; collections assemble an
/// ordered array literal from one import per document. A singleton with no
/// document exports `null` — a caller-detectable placeholder rather than a
/// missing binding.
fn render_barrel_module(bundle: &TypeBundle<'_>) -> String {
    let mut out = String::new();
    for entry in &bundle.docs {
        out.push_str(&format!(
            "import {ident} from './{file}.json' with {{ type: 'json' }}\n",
            ident = entry.identifier,
            file = entry.file_name
        ));
    }
    if bundle.def.is_singleton {
        match bundle.docs.first() {
            Some(entry) => out.push_str(&format!(
                "\nexport const {} = {}\n",
                bundle.var_name, entry.identifier
            )),
            None => out.push_str(&format!("export const {} = null\n", bundle.var_name)),
        }
    } else {
        let idents: Vec<&str> = bundle.docs.iter().map(|d| d.identifier.as_str()).collect();
        let separator = if bundle.docs.is_empty() { "" } else { "\n" };
        out.push_str(&format!(
            "{separator}export const {} = [{}]\n",
            bundle.var_name,
            idents.join(", ")
        ));
    }
    out
}

fn render_aggregate_json(bundle: &TypeBundle<'_>) -> Result<String, SynthesisError> {
    if bundle.def.is_singleton {
        match bundle.docs.first() {
            Some(entry) => pretty_json(&entry.item.document, "aggregate document"),
            None => Ok("null\n".to_string()),
        }
    } else {
        let docs: Vec<_> = bundle.docs.iter().map(|d| &d.item.document).collect();
        pretty_json(&docs, "aggregate document list")
    }
}

/// Concatenated member hashes in current order, so any reorder or member
/// change invalidates the aggregate file.
fn aggregate_fingerprint(bundle: &TypeBundle<'_>) -> String {
    bundle
        .docs
        .iter()
        .map(|d| d.item.document_hash.as_str())
        .collect()
}

fn pretty_json<T: serde::Serialize>(value: &T, what: &str) -> Result<String, SynthesisError> {
    let mut out = serde_json::to_string_pretty(value).map_err(|source| {
        SynthesisError::Serialize {
            what: what.to_string(),
            source,
        }
    })?;
    out.push('\n');
    Ok(out)
}
