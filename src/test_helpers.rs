//! Fixture builders and stub collaborators shared by unit tests.

use crate::bundler::{BundleError, BundleOutput, BundleRequest, WorkerBundler};
use crate::pipeline::{
    CallbackError, DataFetcher, FetchError, SchemaError, SchemaProvider, SuccessCallback,
};
use crate::types::{CacheItem, DataCache, Document, DocumentTypeDef, SchemaDef};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub(crate) fn collection_type(name: &str) -> DocumentTypeDef {
    DocumentTypeDef {
        name: name.to_string(),
        is_singleton: false,
        hash: format!("{name}-hash"),
    }
}

pub(crate) fn singleton_type(name: &str) -> DocumentTypeDef {
    DocumentTypeDef {
        name: name.to_string(),
        is_singleton: true,
        hash: format!("{name}-hash"),
    }
}

pub(crate) fn schema_of(defs: &[DocumentTypeDef]) -> SchemaDef {
    SchemaDef {
        document_type_defs: defs
            .iter()
            .cloned()
            .map(|def| (def.name.clone(), def))
            .collect(),
        hash: "schema-hash".to_string(),
    }
}

pub(crate) fn doc(id: &str, type_name: &str, hash: &str) -> CacheItem {
    let mut fields = serde_json::Map::new();
    fields.insert("_id".into(), serde_json::Value::String(id.to_string()));
    fields.insert("type".into(), serde_json::Value::String(type_name.to_string()));
    fields.insert(
        "title".into(),
        serde_json::Value::String(format!("Title of {id}")),
    );
    CacheItem {
        document: Document { fields },
        document_hash: hash.to_string(),
    }
}

/// Build a cache keyed by document id.
pub(crate) fn cache_of(items: &[CacheItem]) -> DataCache {
    let mut cache_items_map = BTreeMap::new();
    for item in items {
        let key = item.document.id().expect("fixture document has an _id");
        cache_items_map.insert(key.to_string(), item.clone());
    }
    DataCache { cache_items_map }
}

pub(crate) struct StaticSchemaProvider(pub SchemaDef);

#[async_trait]
impl SchemaProvider for StaticSchemaProvider {
    async fn provide_schema(&self, _build_hash: &str) -> Result<SchemaDef, SchemaError> {
        Ok(self.0.clone())
    }
}

pub(crate) struct FailingSchemaProvider;

#[async_trait]
impl SchemaProvider for FailingSchemaProvider {
    async fn provide_schema(&self, _build_hash: &str) -> Result<SchemaDef, SchemaError> {
        Err(SchemaError {
            message: "config did not compile".to_string(),
        })
    }
}

/// Emits a fixed list of snapshots, then ends.
pub(crate) struct StaticFetcher {
    emissions: Mutex<Vec<Result<DataCache, FetchError>>>,
}

impl StaticFetcher {
    pub(crate) fn new(emissions: Vec<Result<DataCache, FetchError>>) -> Self {
        Self {
            emissions: Mutex::new(emissions),
        }
    }
}

impl DataFetcher for StaticFetcher {
    fn fetch_data(
        &self,
        _schema: &SchemaDef,
        _verbose: bool,
    ) -> BoxStream<'static, Result<DataCache, FetchError>> {
        let emissions = std::mem::take(&mut *self.emissions.lock().unwrap());
        stream::iter(emissions).boxed()
    }
}

#[derive(Default)]
pub(crate) struct RecordingBundler {
    pub(crate) requests: Mutex<Vec<BundleRequest>>,
    pub(crate) warnings: Vec<String>,
}

#[async_trait]
impl WorkerBundler for RecordingBundler {
    async fn bundle(&self, request: &BundleRequest) -> Result<BundleOutput, BundleError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(BundleOutput {
            warnings: self.warnings.clone(),
        })
    }
}

#[derive(Default)]
pub(crate) struct RecordingCallback {
    pub(crate) calls: Mutex<Vec<PathBuf>>,
    pub(crate) fail: bool,
}

#[async_trait]
impl SuccessCallback for RecordingCallback {
    async fn on_success(&self, index_module: &Path) -> Result<(), CallbackError> {
        self.calls.lock().unwrap().push(index_module.to_path_buf());
        if self.fail {
            Err(CallbackError {
                message: "embedder rejected reload".to_string(),
            })
        } else {
            Ok(())
        }
    }
}
