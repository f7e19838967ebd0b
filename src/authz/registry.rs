use std::collections::HashMap;
use std::sync::Arc;

use crate::authz::actions::{Action, ActionTable};
use crate::authz::errors::AuthzError;
use crate::authz::locks::DocumentLocks;
use crate::authz::types::{AuthorizationMode, EntityTypeOptions, PolicyMap};
use crate::store::DocumentStore;

/// Default bound on nested evaluation through computed rules.
pub const DEFAULT_MAX_RULE_DEPTH: usize = 10;

/// Supplies the acting subject when a caller does not name one.
pub trait SubjectProvider: Send + Sync {
    fn current_subject_id(&self) -> Option<String>;
}

/// A provider that always answers with the same subject.
#[derive(Debug, Clone, Default)]
pub struct FixedSubject(pub Option<String>);

impl SubjectProvider for FixedSubject {
    fn current_subject_id(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Authorization configuration of one registered entity type.
#[derive(Debug, Clone)]
pub struct EntityTypeConfig {
    pub name: String,
    pub store: Arc<dyn DocumentStore>,
    pub authorization_mode: AuthorizationMode,
    pub users_field_name: String,
    pub owner_field_name: Option<String>,
    pub role_permissions_field_name: String,
    /// role name -> subject type -> value
    pub roles: HashMap<String, PolicyMap>,
    pub static_permissions: Option<PolicyMap>,
}

/// Every entity type, role and action the engine knows about.
///
/// Built once during startup (`&mut self` registration calls), then shared
/// read-only, typically behind an `Arc`.
pub struct PolicyRegistry {
    entity_types: HashMap<String, EntityTypeConfig>,
    global_roles: HashMap<String, PolicyMap>,
    actions: ActionTable,
    subject_provider: Option<Arc<dyn SubjectProvider>>,
    max_rule_depth: usize,
    pub(crate) locks: DocumentLocks,
}

impl std::fmt::Debug for PolicyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&String> = self.entity_types.keys().collect();
        types.sort();
        f.debug_struct("PolicyRegistry")
            .field("entity_types", &types)
            .field("global_roles", &self.global_roles.len())
            .field("actions", &self.actions)
            .field("max_rule_depth", &self.max_rule_depth)
            .finish()
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyRegistry {
    /// An empty registry with the default actions (create, view, edit, delete).
    pub fn new() -> Self {
        Self {
            entity_types: HashMap::new(),
            global_roles: HashMap::new(),
            actions: ActionTable::with_defaults(),
            subject_provider: None,
            max_rule_depth: DEFAULT_MAX_RULE_DEPTH,
            locks: DocumentLocks::default(),
        }
    }

    pub fn with_subject_provider(mut self, provider: Arc<dyn SubjectProvider>) -> Self {
        self.subject_provider = Some(provider);
        self
    }

    pub fn with_max_rule_depth(mut self, depth: usize) -> Self {
        self.max_rule_depth = depth;
        self
    }

    pub fn max_rule_depth(&self) -> usize {
        self.max_rule_depth
    }

    pub fn register_entity_type(
        &mut self,
        name: &str,
        store: Arc<dyn DocumentStore>,
        options: EntityTypeOptions,
    ) -> Result<(), AuthzError> {
        if self.entity_types.contains_key(name) {
            return Err(AuthzError::Configuration(format!(
                "entity type `{name}` is already registered"
            )));
        }

        tracing::debug!(entity_type = name, mode = ?options.authorization_mode, "Registered entity type");

        self.entity_types.insert(
            name.to_string(),
            EntityTypeConfig {
                name: name.to_string(),
                store,
                authorization_mode: options.authorization_mode,
                users_field_name: options.users_field_name,
                owner_field_name: options.owner_field_name,
                role_permissions_field_name: options.role_permissions_field_name,
                roles: HashMap::new(),
                static_permissions: None,
            },
        );
        Ok(())
    }

    pub fn define_static_permissions(
        &mut self,
        entity_type: &str,
        policy: PolicyMap,
    ) -> Result<(), AuthzError> {
        let config = self
            .entity_types
            .get_mut(entity_type)
            .ok_or_else(|| AuthzError::UnregisteredEntityType(entity_type.to_string()))?;

        if config.authorization_mode != AuthorizationMode::StaticPermissionMap {
            tracing::warn!(
                entity_type,
                "static permissions defined on an entity type that authorizes by document roles; they will not be consulted"
            );
        }
        config.static_permissions = Some(policy);
        Ok(())
    }

    /// Defines `role` for one entity type, or globally when `entity_type`
    /// is `None`. Redefining a role replaces its policy.
    pub fn define_role(
        &mut self,
        role: &str,
        policy: PolicyMap,
        entity_type: Option<&str>,
    ) -> Result<(), AuthzError> {
        let roles = match entity_type {
            Some(t) => {
                &mut self
                    .entity_types
                    .get_mut(t)
                    .ok_or_else(|| AuthzError::UnregisteredEntityType(t.to_string()))?
                    .roles
            }
            None => &mut self.global_roles,
        };
        if roles.insert(role.to_string(), policy).is_some() {
            tracing::debug!(role, entity_type = ?entity_type, "Replaced role definition");
        }
        Ok(())
    }

    pub fn lookup_config(&self, entity_type: &str) -> Result<&EntityTypeConfig, AuthzError> {
        self.entity_types
            .get(entity_type)
            .ok_or_else(|| AuthzError::UnregisteredEntityType(entity_type.to_string()))
    }

    pub fn global_role(&self, role: &str) -> Option<&PolicyMap> {
        self.global_roles.get(role)
    }

    /// The entity type's own definition if it has one, else the global one.
    pub fn find_role(&self, entity_type: &str, role: &str) -> Result<Option<&PolicyMap>, AuthzError> {
        let config = self.lookup_config(entity_type)?;
        Ok(config.roles.get(role).or_else(|| self.global_role(role)))
    }

    pub fn entity_type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entity_types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn role_count(&self) -> usize {
        self.global_roles.len() + self.entity_types.values().map(|c| c.roles.len()).sum::<usize>()
    }

    /// Adds an action to the verb table. Adding an existing action is a no-op.
    pub fn add_action_type(&mut self, action: &str) {
        self.actions.add(action);
    }

    /// Verb handle for `action`.
    pub fn action<'a>(&'a self, action: &'a str) -> Result<Action<'a>, AuthzError> {
        self.actions.bind(self, action)
    }

    pub fn actions(&self) -> &ActionTable {
        &self.actions
    }

    /// The explicit subject, else the ambient one, else anonymous (`None`).
    pub fn subject_or_current(&self, subject: Option<&str>) -> Option<String> {
        match subject {
            Some(s) => Some(s.to_string()),
            None => self
                .subject_provider
                .as_ref()
                .and_then(|p| p.current_subject_id()),
        }
    }
}
