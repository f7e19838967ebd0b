use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::authz::errors::AuthzError;
use crate::store::Document;

/// String form of [`PolicyValue::Own`] inside stored documents and policy files.
pub const OWN_TAG: &str = "own";
/// Grant entry field holding the subject id.
pub const USER_ID_FIELD: &str = "userId";
/// Grant entry field holding the assigned role.
pub const ROLE_FIELD: &str = "role";

pub const DEFAULT_USERS_FIELD: &str = "users";
pub const DEFAULT_OWNER_FIELD: &str = "userId";
pub const DEFAULT_ROLE_PERMISSIONS_FIELD: &str = "permissions";

/// Subject-type name -> value (containerized checks) or action -> value
/// (direct checks).
pub type PolicyMap = HashMap<String, PolicyValue>;

type RuleFn = dyn Fn(&Target, &str, &Target) -> bool + Send + Sync;

/// A policy decided at check time by user code.
///
/// The rule receives the target and container exactly as the caller passed
/// them (id or document) plus the container's entity type name.
#[derive(Clone)]
pub struct ComputedRule(Arc<RuleFn>);

impl ComputedRule {
    pub fn new(rule: impl Fn(&Target, &str, &Target) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(rule))
    }

    pub fn call(&self, target: &Target, container_type: &str, container: &Target) -> bool {
        (self.0)(target, container_type, container)
    }
}

impl fmt::Debug for ComputedRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ComputedRule(..)")
    }
}

impl PartialEq for ComputedRule {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PolicyValue {
    Bool(bool),
    /// Allowed iff the requester owns the target.
    Own,
    Computed(ComputedRule),
    ActionMap(PolicyMap),
}

impl PolicyValue {
    pub fn computed(rule: impl Fn(&Target, &str, &Target) -> bool + Send + Sync + 'static) -> Self {
        PolicyValue::Computed(ComputedRule::new(rule))
    }

    /// Builds an action map from `(action, value)` pairs.
    pub fn actions<K: Into<String>>(entries: impl IntoIterator<Item = (K, PolicyValue)>) -> Self {
        PolicyValue::ActionMap(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Reads a value stored in a document. Returns `None` for shapes that
    /// carry no policy meaning (numbers, arrays, other strings, null); the
    /// engine treats those as a deny.
    pub fn from_json(value: &Value) -> Option<PolicyValue> {
        match value {
            Value::Bool(b) => Some(PolicyValue::Bool(*b)),
            Value::String(s) if s == OWN_TAG => Some(PolicyValue::Own),
            Value::Object(map) => Some(PolicyValue::ActionMap(
                map.iter()
                    .filter_map(|(k, v)| PolicyValue::from_json(v).map(|pv| (k.clone(), pv)))
                    .collect(),
            )),
            _ => None,
        }
    }

    /// The stored form of this value. Computed rules live in code and cannot
    /// be written into a document.
    pub fn to_json(&self) -> Result<Value, AuthzError> {
        match self {
            PolicyValue::Bool(b) => Ok(Value::Bool(*b)),
            PolicyValue::Own => Ok(Value::String(OWN_TAG.to_string())),
            PolicyValue::Computed(_) => Err(AuthzError::Configuration(
                "computed rules cannot be stored on a document; define them in a role or static permission map".into(),
            )),
            PolicyValue::ActionMap(map) => {
                let mut out = Map::new();
                for (k, v) in map {
                    out.insert(k.clone(), v.to_json()?);
                }
                Ok(Value::Object(out))
            }
        }
    }
}

impl From<bool> for PolicyValue {
    fn from(b: bool) -> Self {
        PolicyValue::Bool(b)
    }
}

/// An entity as a caller refers to it: by id, or by an already loaded document.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Id(String),
    Doc(Document),
}

impl Target {
    pub fn id(&self) -> Option<&str> {
        match self {
            Target::Id(id) => Some(id),
            Target::Doc(doc) => doc.id(),
        }
    }
}

impl From<&str> for Target {
    fn from(id: &str) -> Self {
        Target::Id(id.to_string())
    }
}

impl From<String> for Target {
    fn from(id: String) -> Self {
        Target::Id(id)
    }
}

impl From<Document> for Target {
    fn from(doc: Document) -> Self {
        Target::Doc(doc)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthorizationMode {
    /// Grants and roles are stored on each container document.
    #[default]
    DocumentRoles,
    /// One permission map per entity type, shared by every document.
    StaticPermissionMap,
}

impl AuthorizationMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "document" | "document-roles" => Some(AuthorizationMode::DocumentRoles),
            "static" | "permissions" => Some(AuthorizationMode::StaticPermissionMap),
            _ => None,
        }
    }
}

/// Registration options for an entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityTypeOptions {
    pub authorization_mode: AuthorizationMode,
    pub users_field_name: String,
    /// `None` when documents of this type have no owner.
    pub owner_field_name: Option<String>,
    pub role_permissions_field_name: String,
}

impl Default for EntityTypeOptions {
    fn default() -> Self {
        Self {
            authorization_mode: AuthorizationMode::DocumentRoles,
            users_field_name: DEFAULT_USERS_FIELD.to_string(),
            owner_field_name: Some(DEFAULT_OWNER_FIELD.to_string()),
            role_permissions_field_name: DEFAULT_ROLE_PERMISSIONS_FIELD.to_string(),
        }
    }
}

impl EntityTypeOptions {
    pub fn static_permissions() -> Self {
        Self {
            authorization_mode: AuthorizationMode::StaticPermissionMap,
            ..Self::default()
        }
    }

    pub fn with_owner_field(mut self, field: impl Into<String>) -> Self {
        self.owner_field_name = Some(field.into());
        self
    }

    pub fn without_owner(mut self) -> Self {
        self.owner_field_name = None;
        self
    }

    pub fn with_users_field(mut self, field: impl Into<String>) -> Self {
        self.users_field_name = field.into();
        self
    }

    pub fn with_role_permissions_field(mut self, field: impl Into<String>) -> Self {
        self.role_permissions_field_name = field.into();
        self
    }
}

// ---------- Parsed policy file types ----------

#[derive(Debug, Clone)]
pub struct EntityDecl {
    pub name: String,
    pub options: EntityTypeOptions,
}

#[derive(Debug, Clone)]
pub struct RoleDecl {
    pub name: String,
    /// `None` for a global role.
    pub entity_type: Option<String>,
    pub policy: PolicyMap,
}

#[derive(Debug, Clone)]
pub struct StaticPermissionsDecl {
    pub entity_type: String,
    pub policy: PolicyMap,
}

/// Intermediate result from parsing a single KDL file.
#[derive(Debug, Clone, Default)]
pub struct ParsedPolicy {
    pub actions: Vec<String>,
    pub entity_types: Vec<EntityDecl>,
    pub roles: Vec<RoleDecl>,
    pub static_permissions: Vec<StaticPermissionsDecl>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_shapes() {
        assert_eq!(PolicyValue::from_json(&json!(true)), Some(PolicyValue::Bool(true)));
        assert_eq!(PolicyValue::from_json(&json!("own")), Some(PolicyValue::Own));
        assert_eq!(PolicyValue::from_json(&json!("mine")), None);
        assert_eq!(PolicyValue::from_json(&json!(1)), None);
        assert_eq!(PolicyValue::from_json(&json!(null)), None);

        let nested = PolicyValue::from_json(&json!({ "edit": true, "delete": "own", "x": 3 }));
        let Some(PolicyValue::ActionMap(map)) = nested else {
            panic!("expected an action map");
        };
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("delete"), Some(&PolicyValue::Own));
    }

    #[test]
    fn test_to_json_rejects_computed() {
        let value = PolicyValue::actions([("edit", PolicyValue::computed(|_, _, _| true))]);
        let err = value.to_json().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_to_json_nested() {
        let value = PolicyValue::actions([("edit", true.into()), ("delete", PolicyValue::Own)]);
        assert_eq!(value.to_json().unwrap(), json!({ "edit": true, "delete": "own" }));
    }

    #[test]
    fn test_target_id() {
        assert_eq!(Target::from("p1").id(), Some("p1"));
        assert_eq!(Target::from(Document::new("p2")).id(), Some("p2"));
        assert_eq!(Target::Doc(Document::default()).id(), None);
    }

    #[test]
    fn test_default_owner_field_is_independent() {
        let opts = EntityTypeOptions::default().with_users_field("members");
        assert_eq!(opts.users_field_name, "members");
        assert_eq!(opts.owner_field_name.as_deref(), Some("userId"));
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!(
            AuthorizationMode::parse("document"),
            Some(AuthorizationMode::DocumentRoles)
        );
        assert_eq!(
            AuthorizationMode::parse("static"),
            Some(AuthorizationMode::StaticPermissionMap)
        );
        assert_eq!(AuthorizationMode::parse("bogus"), None);
    }
}
