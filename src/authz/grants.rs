//! Writes per-user grants and role assignments onto documents.
//!
//! Every mutation is a read-modify-write of one document's users list: the
//! document is fetched, the subject's entry is cloned and changed (or
//! created), the clone replaces the old entry, and the whole list is written
//! back with a single `update_fields` call.

use serde_json::{Map, Value};

use crate::authz::errors::AuthzError;
use crate::authz::registry::{EntityTypeConfig, PolicyRegistry};
use crate::authz::types::{PolicyValue, ROLE_FIELD, USER_ID_FIELD};

/// Replace the subject's grant entry on the container with a role
/// assignment. The role must exist on the container type or globally.
pub fn assign_role(
    registry: &PolicyRegistry,
    container_type: &str,
    container_id: &str,
    role: &str,
    subject: Option<&str>,
) -> Result<(), AuthzError> {
    if registry.find_role(container_type, role)?.is_none() {
        tracing::error!(
            role,
            container_type,
            "Role has not been defined; define it globally or for the entity type before assigning it"
        );
        return Err(AuthzError::UndefinedRole {
            role: role.to_string(),
            entity_type: container_type.to_string(),
        });
    }

    let subject = require_subject(registry, subject, "assign a role")?;
    modify_users(registry, container_type, container_id, |users| {
        let mut entry = Map::new();
        entry.insert(USER_ID_FIELD.to_string(), Value::String(subject.clone()));
        entry.insert(ROLE_FIELD.to_string(), Value::String(role.to_string()));
        upsert_entry(users, &subject, |_| Value::Object(entry));
        true
    })?;

    tracing::info!(role, container_type, container_id, subject, "Assigned role");
    Ok(())
}

/// Remove the subject's grant entry. Returns whether an entry was removed.
pub fn revoke_role(
    registry: &PolicyRegistry,
    container_type: &str,
    container_id: &str,
    subject: Option<&str>,
) -> Result<bool, AuthzError> {
    let subject = require_subject(registry, subject, "revoke a role")?;
    let removed = modify_users(registry, container_type, container_id, |users| {
        let before = users.len();
        users.retain(|entry| entry_user_id(entry) != Some(subject.as_str()));
        users.len() != before
    })?;

    if removed {
        tracing::info!(container_type, container_id, subject, "Revoked role");
    } else {
        tracing::debug!(
            container_type,
            container_id,
            subject,
            "User does not have permissions defined; nothing to revoke"
        );
    }
    Ok(removed)
}

/// `entry[action] = value` on the entity's own document.
pub fn set_permission(
    registry: &PolicyRegistry,
    action: &str,
    entity_type: &str,
    entity_id: &str,
    value: &PolicyValue,
    subject: Option<&str>,
) -> Result<(), AuthzError> {
    let stored = value.to_json()?;
    let subject = require_subject(registry, subject, "set a permission")?;
    modify_users(registry, entity_type, entity_id, |users| {
        upsert_entry(users, &subject, |existing| {
            let mut entry = clone_or_new(existing, &subject);
            entry.insert(action.to_string(), stored);
            Value::Object(entry)
        });
        true
    })?;

    tracing::debug!(action, entity_type, entity_id, subject, "Set permission");
    Ok(())
}

/// `entry[subject_type][action] = value` on the container's document.
pub fn set_permission_in(
    registry: &PolicyRegistry,
    subject_type: &str,
    action: &str,
    container_type: &str,
    container_id: &str,
    value: &PolicyValue,
    subject: Option<&str>,
) -> Result<(), AuthzError> {
    let stored = value.to_json()?;
    let subject = require_subject(registry, subject, "set a permission")?;
    modify_users(registry, container_type, container_id, |users| {
        upsert_entry(users, &subject, |existing| {
            let mut entry = clone_or_new(existing, &subject);
            let mut nested = match entry.remove(subject_type) {
                Some(Value::Object(map)) => map,
                _ => Map::new(),
            };
            nested.insert(action.to_string(), stored);
            entry.insert(subject_type.to_string(), Value::Object(nested));
            Value::Object(entry)
        });
        true
    })?;

    tracing::debug!(
        subject_type,
        action,
        container_type,
        container_id,
        subject,
        "Set permission in container"
    );
    Ok(())
}

/// Merge several action values into the subject's entry at once.
pub fn set_permissions(
    registry: &PolicyRegistry,
    entity_type: &str,
    entity_id: &str,
    permissions: &[(&str, PolicyValue)],
    subject: Option<&str>,
) -> Result<(), AuthzError> {
    let stored = permissions
        .iter()
        .map(|(action, value)| Ok((action.to_string(), value.to_json()?)))
        .collect::<Result<Vec<_>, AuthzError>>()?;
    let subject = require_subject(registry, subject, "set permissions")?;
    modify_users(registry, entity_type, entity_id, |users| {
        upsert_entry(users, &subject, |existing| {
            let mut entry = clone_or_new(existing, &subject);
            entry.extend(stored);
            Value::Object(entry)
        });
        true
    })
    .map(|_| ())
}

/// Replace the subject's whole map for one subject type.
pub fn set_permissions_in(
    registry: &PolicyRegistry,
    subject_type: &str,
    container_type: &str,
    container_id: &str,
    permissions: &PolicyValue,
    subject: Option<&str>,
) -> Result<(), AuthzError> {
    let stored = permissions.to_json()?;
    let subject = require_subject(registry, subject, "set permissions")?;
    modify_users(registry, container_type, container_id, |users| {
        upsert_entry(users, &subject, |existing| {
            let mut entry = clone_or_new(existing, &subject);
            entry.insert(subject_type.to_string(), stored);
            Value::Object(entry)
        });
        true
    })
    .map(|_| ())
}

fn require_subject(
    registry: &PolicyRegistry,
    subject: Option<&str>,
    operation: &str,
) -> Result<String, AuthzError> {
    registry.subject_or_current(subject).ok_or_else(|| {
        AuthzError::Configuration(format!(
            "cannot {operation} for an anonymous subject; pass a user id or configure a subject provider"
        ))
    })
}

/// Runs one read-modify-write of the document's users list under the
/// document's lock. `edit` returns whether it changed anything; unchanged
/// lists are not written back.
fn modify_users(
    registry: &PolicyRegistry,
    entity_type: &str,
    id: &str,
    edit: impl FnOnce(&mut Vec<Value>) -> bool,
) -> Result<bool, AuthzError> {
    let config = registry.lookup_config(entity_type)?;

    let lock = registry.locks.handle(entity_type, id)?;
    let _guard = lock.lock().map_err(|e| crate::store::StoreError::LockPoisoned {
        context: e.to_string(),
    })?;

    let doc = config
        .store
        .fetch_by_id(id)?
        .ok_or_else(|| AuthzError::DocumentNotFound {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
        })?;

    let mut users = match doc.get(&config.users_field_name) {
        Some(Value::Array(users)) => users.clone(),
        _ => Vec::new(),
    };

    if !edit(&mut users) {
        return Ok(false);
    }

    persist_users(config, id, users)?;
    Ok(true)
}

fn persist_users(config: &EntityTypeConfig, id: &str, users: Vec<Value>) -> Result<(), AuthzError> {
    let mut fields = Map::new();
    fields.insert(config.users_field_name.clone(), Value::Array(users));
    config.store.update_fields(id, fields)?;
    Ok(())
}

fn entry_user_id(entry: &Value) -> Option<&str> {
    entry.get(USER_ID_FIELD).and_then(Value::as_str)
}

/// Swap the subject's entry for `build(existing)`, or append it. Any extra
/// entries for the same subject are dropped so ids stay unique.
fn upsert_entry(
    users: &mut Vec<Value>,
    subject: &str,
    build: impl FnOnce(Option<&Value>) -> Value,
) {
    let position = users
        .iter()
        .position(|entry| entry_user_id(entry) == Some(subject));

    match position {
        Some(index) => {
            let replacement = build(Some(&users[index]));
            users[index] = replacement;
            let mut seen = false;
            users.retain(|entry| {
                if entry_user_id(entry) != Some(subject) {
                    return true;
                }
                let keep = !seen;
                seen = true;
                keep
            });
        }
        None => users.push(build(None)),
    }
}

fn clone_or_new(existing: Option<&Value>, subject: &str) -> Map<String, Value> {
    match existing.and_then(Value::as_object) {
        Some(entry) => entry.clone(),
        None => {
            let mut entry = Map::new();
            entry.insert(USER_ID_FIELD.to_string(), Value::String(subject.to_string()));
            entry
        }
    }
}
