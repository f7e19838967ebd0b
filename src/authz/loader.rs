use std::path::Path;
use std::sync::Arc;

use crate::authz::errors::AuthzError;
use crate::authz::policy::parse_kdl_document;
use crate::authz::registry::PolicyRegistry;
use crate::authz::types::*;
use crate::store::DocumentStore;

/// Load all `.kdl` policy files from the given directory into `registry`.
///
/// `store_for` supplies the document store of each declared entity type.
pub fn load_policies<F>(
    dir: &Path,
    registry: &mut PolicyRegistry,
    store_for: F,
) -> Result<(), AuthzError>
where
    F: FnMut(&str) -> Arc<dyn DocumentStore>,
{
    if !dir.is_dir() {
        return Err(AuthzError::InvalidPolicy(format!(
            "policies directory `{}` does not exist or is not a directory",
            dir.display()
        )));
    }

    let mut all_parsed = Vec::new();
    let mut file_count = 0;

    let mut entries: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .map(|ext| ext == "kdl")
                .unwrap_or(false)
        })
        .collect();
    entries.sort_by_key(|e| e.path());

    for entry in entries {
        let path = entry.path();
        let contents =
            std::fs::read_to_string(&path).map_err(|source| AuthzError::PolicyLoadError {
                path: path.display().to_string(),
                source,
            })?;
        let parsed = parse_kdl_document(&contents)?;
        all_parsed.push(parsed);
        file_count += 1;
    }

    compile_policies(registry, all_parsed, store_for)?;

    tracing::info!(
        files = file_count,
        entity_types = registry.entity_type_names().len(),
        roles = registry.role_count(),
        actions = registry.actions().names().count(),
        "Loaded authorization policies"
    );

    Ok(())
}

/// Merge parsed policies into `registry`.
///
/// Declarations are applied by kind across all files (actions, then entity
/// types, then roles, then static permissions), so a role may reference an
/// entity type declared in a later file.
pub fn compile_policies<F>(
    registry: &mut PolicyRegistry,
    parsed: Vec<ParsedPolicy>,
    mut store_for: F,
) -> Result<(), AuthzError>
where
    F: FnMut(&str) -> Arc<dyn DocumentStore>,
{
    let mut entity_types = Vec::new();
    let mut roles = Vec::new();
    let mut static_permissions = Vec::new();

    for p in parsed {
        for action in &p.actions {
            registry.add_action_type(action);
        }
        entity_types.extend(p.entity_types);
        roles.extend(p.roles);
        static_permissions.extend(p.static_permissions);
    }

    for decl in entity_types {
        let store = store_for(&decl.name);
        registry.register_entity_type(&decl.name, store, decl.options)?;
    }

    for role in roles {
        check_actions(registry, &role.policy, &format!("role `{}`", role.name));
        registry.define_role(&role.name, role.policy, role.entity_type.as_deref())?;
    }

    for decl in static_permissions {
        check_actions(
            registry,
            &decl.policy,
            &format!("permissions on `{}`", decl.entity_type),
        );
        registry.define_static_permissions(&decl.entity_type, decl.policy)?;
    }

    Ok(())
}

/// Warn about action names no verb exists for; they can still be checked
/// through the engine directly.
fn check_actions(registry: &PolicyRegistry, policy: &PolicyMap, context: &str) {
    for (subject_type, value) in policy {
        if let PolicyValue::ActionMap(actions) = value {
            for action in actions.keys() {
                if !registry.actions().contains(action) {
                    tracing::warn!(
                        action,
                        subject_type,
                        "{context} grants an action that is not in the action table"
                    );
                }
            }
        }
    }
}
