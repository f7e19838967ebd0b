//! Per-action verbs.
//!
//! Every action type (create, view, edit, delete, plus any custom ones) maps
//! to the same four operations: a direct check, a containerized check, a
//! setter and a containerized setter. `allow`/`deny` are the setters with a
//! fixed boolean. Callers look the action up once and call through the handle:
//!
//! ```ignore
//! registry.action("edit")?.check_in("comments", &comment, "posts", &post, Some("u1"))?;
//! registry.action("edit")?.allow_in("comments", "posts", "p1", Some("u1"))?;
//! ```

use std::collections::BTreeMap;

use crate::authz::engine;
use crate::authz::errors::AuthzError;
use crate::authz::grants;
use crate::authz::registry::PolicyRegistry;
use crate::authz::types::{PolicyValue, Target};

pub const DEFAULT_ACTIONS: [&str; 4] = ["create", "view", "edit", "delete"];

type CheckFn =
    fn(&PolicyRegistry, &str, &str, &Target, Option<&str>) -> Result<bool, AuthzError>;
type CheckInFn = fn(
    &PolicyRegistry,
    &str,
    &str,
    &Target,
    &str,
    &Target,
    Option<&str>,
) -> Result<bool, AuthzError>;
type SetFn =
    fn(&PolicyRegistry, &str, &str, &str, &PolicyValue, Option<&str>) -> Result<(), AuthzError>;
type SetInFn = fn(
    &PolicyRegistry,
    &str,
    &str,
    &str,
    &str,
    &PolicyValue,
    Option<&str>,
) -> Result<(), AuthzError>;

#[derive(Clone, Copy)]
pub struct ActionVerbs {
    pub check: CheckFn,
    pub check_in: CheckInFn,
    pub set: SetFn,
    pub set_in: SetInFn,
}

impl Default for ActionVerbs {
    fn default() -> Self {
        Self {
            check: engine::check,
            check_in: engine::check_in,
            set: grants::set_permission,
            set_in: grants::set_permission_in,
        }
    }
}

/// Action name -> verbs. Built during startup; lookups never allocate.
#[derive(Clone, Default)]
pub struct ActionTable {
    verbs: BTreeMap<String, ActionVerbs>,
}

impl std::fmt::Debug for ActionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.verbs.keys()).finish()
    }
}

impl ActionTable {
    pub fn with_defaults() -> Self {
        let mut table = Self::default();
        for action in DEFAULT_ACTIONS {
            table.add(action);
        }
        table
    }

    pub fn add(&mut self, action: &str) {
        self.verbs.entry(action.to_string()).or_default();
    }

    pub fn contains(&self, action: &str) -> bool {
        self.verbs.contains_key(action)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.verbs.keys().map(String::as_str)
    }

    pub(crate) fn bind<'a>(
        &self,
        registry: &'a PolicyRegistry,
        action: &'a str,
    ) -> Result<Action<'a>, AuthzError> {
        let verbs = *self
            .verbs
            .get(action)
            .ok_or_else(|| AuthzError::UnknownAction(action.to_string()))?;
        Ok(Action {
            name: action,
            verbs,
            registry,
        })
    }
}

/// One action's verbs bound to a registry.
#[derive(Clone, Copy)]
pub struct Action<'a> {
    name: &'a str,
    verbs: ActionVerbs,
    registry: &'a PolicyRegistry,
}

impl<'a> Action<'a> {
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn check(
        &self,
        entity_type: &str,
        target: &Target,
        subject: Option<&str>,
    ) -> Result<bool, AuthzError> {
        (self.verbs.check)(self.registry, self.name, entity_type, target, subject)
    }

    pub fn check_in(
        &self,
        subject_type: &str,
        target: &Target,
        container_type: &str,
        container: &Target,
        subject: Option<&str>,
    ) -> Result<bool, AuthzError> {
        (self.verbs.check_in)(
            self.registry,
            self.name,
            subject_type,
            target,
            container_type,
            container,
            subject,
        )
    }

    pub fn set(
        &self,
        entity_type: &str,
        entity_id: &str,
        value: &PolicyValue,
        subject: Option<&str>,
    ) -> Result<(), AuthzError> {
        (self.verbs.set)(self.registry, self.name, entity_type, entity_id, value, subject)
    }

    pub fn allow(&self, entity_type: &str, entity_id: &str, subject: Option<&str>) -> Result<(), AuthzError> {
        self.set(entity_type, entity_id, &PolicyValue::Bool(true), subject)
    }

    pub fn deny(&self, entity_type: &str, entity_id: &str, subject: Option<&str>) -> Result<(), AuthzError> {
        self.set(entity_type, entity_id, &PolicyValue::Bool(false), subject)
    }

    pub fn set_in(
        &self,
        subject_type: &str,
        container_type: &str,
        container_id: &str,
        value: &PolicyValue,
        subject: Option<&str>,
    ) -> Result<(), AuthzError> {
        (self.verbs.set_in)(
            self.registry,
            subject_type,
            self.name,
            container_type,
            container_id,
            value,
            subject,
        )
    }

    pub fn allow_in(
        &self,
        subject_type: &str,
        container_type: &str,
        container_id: &str,
        subject: Option<&str>,
    ) -> Result<(), AuthzError> {
        self.set_in(subject_type, container_type, container_id, &PolicyValue::Bool(true), subject)
    }

    pub fn deny_in(
        &self,
        subject_type: &str,
        container_type: &str,
        container_id: &str,
        subject: Option<&str>,
    ) -> Result<(), AuthzError> {
        self.set_in(subject_type, container_type, container_id, &PolicyValue::Bool(false), subject)
    }
}
