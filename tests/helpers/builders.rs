use canopy::authz::{EntityTypeOptions, PolicyMap, PolicyRegistry};
use canopy::store::{Document, DocumentStore, MemoryStore};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// A registry together with the in-memory stores backing it
pub struct TestRegistry {
    pub registry: PolicyRegistry,
    pub stores: HashMap<String, Arc<MemoryStore>>,
}

impl TestRegistry {
    /// Current stored state of a document
    pub fn stored(&self, entity_type: &str, id: &str) -> Document {
        self.stores[entity_type]
            .fetch_by_id(id)
            .expect("Failed to read store")
            .expect("Document not found")
    }

    /// The document's users list, or an empty list when it has none
    pub fn users(&self, entity_type: &str, id: &str) -> Vec<Value> {
        match self.stored(entity_type, id).get("users") {
            Some(Value::Array(users)) => users.clone(),
            _ => Vec::new(),
        }
    }
}

/// Builder for registries with in-memory entity types
pub struct RegistryBuilder {
    registry: PolicyRegistry,
    stores: HashMap<String, Arc<MemoryStore>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self {
            registry: PolicyRegistry::new(),
            stores: HashMap::new(),
        }
    }

    pub fn with_max_rule_depth(mut self, depth: usize) -> Self {
        self.registry = self.registry.with_max_rule_depth(depth);
        self
    }

    pub fn entity(mut self, name: &str, options: EntityTypeOptions) -> Self {
        let store = Arc::new(MemoryStore::new());
        self.registry
            .register_entity_type(name, store.clone(), options)
            .expect("Failed to register entity type");
        self.stores.insert(name.to_string(), store);
        self
    }

    pub fn doc(self, entity_type: &str, doc: Document) -> Self {
        self.stores
            .get(entity_type)
            .expect("Register the entity type before adding documents")
            .insert(doc)
            .expect("Failed to insert document");
        self
    }

    pub fn global_role(mut self, name: &str, policy: PolicyMap) -> Self {
        self.registry
            .define_role(name, policy, None)
            .expect("Failed to define global role");
        self
    }

    pub fn role_on(mut self, entity_type: &str, name: &str, policy: PolicyMap) -> Self {
        self.registry
            .define_role(name, policy, Some(entity_type))
            .expect("Failed to define entity type role");
        self
    }

    pub fn static_permissions(mut self, entity_type: &str, policy: PolicyMap) -> Self {
        self.registry
            .define_static_permissions(entity_type, policy)
            .expect("Failed to define static permissions");
        self
    }

    pub fn build(self) -> TestRegistry {
        TestRegistry {
            registry: self.registry,
            stores: self.stores,
        }
    }
}

/// Builder for test documents
pub struct DocumentBuilder {
    doc: Document,
    users: Vec<Value>,
    role_permissions: Map<String, Value>,
}

impl DocumentBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            doc: Document::new(id),
            users: Vec::new(),
            role_permissions: Map::new(),
        }
    }

    pub fn owned_by(mut self, user: &str) -> Self {
        self.doc.set("userId", json!(user));
        self
    }

    /// Adds a grant entry holding only a role
    pub fn member(mut self, user: &str, role: &str) -> Self {
        self.users.push(json!({ "userId": user, "role": role }));
        self
    }

    /// Adds a raw grant entry
    pub fn entry(mut self, entry: Value) -> Self {
        self.users.push(entry);
        self
    }

    /// Overrides one role's value for a subject type on this document only
    pub fn role_override(mut self, role: &str, subject_type: &str, value: Value) -> Self {
        let role_map = self
            .role_permissions
            .entry(role.to_string())
            .or_insert_with(|| json!({}));
        if let Value::Object(map) = role_map {
            map.insert(subject_type.to_string(), value);
        }
        self
    }

    pub fn build(mut self) -> Document {
        if !self.users.is_empty() {
            self.doc.set("users", Value::Array(self.users));
        }
        if !self.role_permissions.is_empty() {
            self.doc
                .set("permissions", Value::Object(self.role_permissions));
        }
        self.doc
    }
}
