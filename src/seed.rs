use crate::errors::CanopyError;
use crate::store::{Document, MemoryStore};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Root structure of the seed documents JSON file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedFile {
    /// entity type -> documents
    #[serde(default)]
    pub collections: BTreeMap<String, Vec<Document>>,
}

/// In-memory stores keyed by entity type.
pub type Stores = HashMap<String, Arc<MemoryStore>>;

/// Read a seed file into one store per entity type. Later documents with an
/// already seen `_id` replace earlier ones.
pub fn load_seed_file(path: &Path) -> Result<Stores, CanopyError> {
    tracing::info!("Loading documents from {}", path.display());

    let content = fs::read_to_string(path)?;
    let seed: SeedFile = serde_json::from_str(&content).map_err(|e| {
        CanopyError::BadRequest(format!(
            "Failed to parse seed file {}: {}\n\nExpected format:\n{{\n  \"collections\": {{\n    \"posts\": [\n      {{ \"_id\": \"p1\", \"userId\": \"u1\", \"users\": [{{ \"userId\": \"u1\", \"role\": \"author\" }}] }}\n    ]\n  }}\n}}",
            path.display(),
            e
        ))
    })?;

    let stores = stores_from_seed(seed);

    let mut documents = 0;
    for store in stores.values() {
        documents += store.len()?;
    }
    tracing::info!(
        "Seeded {} document(s) across {} entity type(s)",
        documents,
        stores.len()
    );

    Ok(stores)
}

pub fn stores_from_seed(seed: SeedFile) -> Stores {
    seed.collections
        .into_iter()
        .map(|(entity_type, docs)| (entity_type, Arc::new(MemoryStore::from_documents(docs))))
        .collect()
}

/// Write every store back as a seed file.
pub fn write_seed_file(path: &Path, stores: &Stores) -> Result<(), CanopyError> {
    let mut seed = SeedFile::default();
    for (entity_type, store) in stores {
        seed.collections
            .insert(entity_type.clone(), store.snapshot()?);
    }

    let content = serde_json::to_string_pretty(&seed)?;
    fs::write(path, content)?;

    tracing::debug!("Wrote {} entity type(s) to {}", stores.len(), path.display());
    Ok(())
}
