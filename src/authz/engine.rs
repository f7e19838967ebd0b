use std::borrow::Cow;

use serde_json::{Map, Value};

use crate::authz::errors::AuthzError;
use crate::authz::registry::{EntityTypeConfig, PolicyRegistry};
use crate::authz::resolver::{self, ResolveRequest};
use crate::authz::types::{AuthorizationMode, PolicyMap, Target, ROLE_FIELD, USER_ID_FIELD};
use crate::store::Document;

/// Can `subject` perform `action` on the entity itself, according to the
/// grant entry stored on that entity's document?
///
/// `subject` falls back to the registry's current-subject accessor; with
/// neither, the request is anonymous and finds no grant entry.
pub fn check(
    registry: &PolicyRegistry,
    action: &str,
    entity_type: &str,
    target: &Target,
    subject: Option<&str>,
) -> Result<bool, AuthzError> {
    let config = registry.lookup_config(entity_type)?;
    let doc = load_document(config, target)?;
    let subject = registry.subject_or_current(subject);
    let subject = subject.as_deref();

    let Some(entry) = find_grant_entry(&doc, &config.users_field_name, subject) else {
        tracing::debug!(
            action,
            entity_type,
            entity_id = ?target.id(),
            subject = ?subject,
            "No grant entry for user. Assuming permission is denied."
        );
        return Ok(false);
    };

    let Some(raw) = entry.get(action) else {
        tracing::debug!(
            action,
            entity_type,
            entity_id = ?target.id(),
            subject = ?subject,
            "Grant entry has no value for action. Assuming permission is denied."
        );
        return Ok(false);
    };

    let req = ResolveRequest {
        action,
        target_type: entity_type,
        target,
        container_type: entity_type,
        container: target,
        subject,
    };
    resolver::resolve_stored(registry, raw, &req)
}

/// Can `subject` perform `action` on an entity of `subject_type` held by
/// the given container?
pub fn check_in(
    registry: &PolicyRegistry,
    action: &str,
    subject_type: &str,
    target: &Target,
    container_type: &str,
    container: &Target,
    subject: Option<&str>,
) -> Result<bool, AuthzError> {
    let config = registry.lookup_config(container_type)?;
    let subject = registry.subject_or_current(subject);
    let req = ResolveRequest {
        action,
        target_type: subject_type,
        target,
        container_type,
        container,
        subject: subject.as_deref(),
    };

    match config.authorization_mode {
        AuthorizationMode::StaticPermissionMap => check_static(registry, config, &req),
        AuthorizationMode::DocumentRoles => check_document_roles(registry, config, &req),
    }
}

fn check_static(
    registry: &PolicyRegistry,
    config: &EntityTypeConfig,
    req: &ResolveRequest<'_>,
) -> Result<bool, AuthzError> {
    let value = config
        .static_permissions
        .as_ref()
        .and_then(|perms| perms.get(req.target_type));

    match value {
        Some(value) => resolver::resolve(registry, value, req),
        None => {
            tracing::debug!(
                container_type = req.container_type,
                target_type = req.target_type,
                "No static permissions defined. Assuming permission is denied."
            );
            Ok(false)
        }
    }
}

fn check_document_roles(
    registry: &PolicyRegistry,
    config: &EntityTypeConfig,
    req: &ResolveRequest<'_>,
) -> Result<bool, AuthzError> {
    let doc = load_document(config, req.container)?;

    let Some(entry) = find_grant_entry(&doc, &config.users_field_name, req.subject) else {
        tracing::debug!(
            container_type = req.container_type,
            container_id = ?req.container.id(),
            subject = ?req.subject,
            "No permissions defined for user. Assuming permission is denied."
        );
        return Ok(false);
    };

    // An explicit per-subject-type grant always wins over role membership.
    if let Some(raw) = entry.get(req.target_type) {
        return resolver::resolve_stored(registry, raw, req);
    }

    let Some(role) = entry.get(ROLE_FIELD).and_then(Value::as_str) else {
        tracing::debug!(
            target_type = req.target_type,
            container_type = req.container_type,
            subject = ?req.subject,
            "No user level permissions and no role. Assuming permission is denied."
        );
        return Ok(false);
    };

    // 1. Per-document override of the role.
    if let Some(raw) = doc
        .get(&config.role_permissions_field_name)
        .and_then(|perms| perms.get(role))
        .and_then(|role_perms| role_perms.get(req.target_type))
    {
        tracing::debug!(role, source = "document", "Using role permissions");
        return resolver::resolve_stored(registry, raw, req);
    }

    // 2. The container type's role registry, then 3. the global one.
    let registries: [(&str, Option<&PolicyMap>); 2] = [
        ("entity_type", config.roles.get(role)),
        ("global", registry.global_role(role)),
    ];
    for (source, policy) in registries {
        if let Some(value) = policy.and_then(|p| p.get(req.target_type)) {
            tracing::debug!(role, source, "Using role permissions");
            return resolver::resolve(registry, value, req);
        }
    }

    tracing::debug!(
        role,
        action = req.action,
        target_type = req.target_type,
        container_type = req.container_type,
        "No permissions defined for role. Assuming permission is denied."
    );
    Ok(false)
}

/// One request in a [`check_batch`] call.
#[derive(Debug, Clone)]
pub enum CheckRequest {
    Direct {
        action: String,
        entity_type: String,
        target: Target,
        subject: Option<String>,
    },
    In {
        action: String,
        subject_type: String,
        target: Target,
        container_type: String,
        container: Target,
        subject: Option<String>,
    },
}

/// Evaluates every request on its own; an error in one request does not
/// affect the others.
pub fn check_batch(
    registry: &PolicyRegistry,
    requests: &[CheckRequest],
) -> Vec<Result<bool, AuthzError>> {
    requests
        .iter()
        .map(|request| match request {
            CheckRequest::Direct {
                action,
                entity_type,
                target,
                subject,
            } => check(registry, action, entity_type, target, subject.as_deref()),
            CheckRequest::In {
                action,
                subject_type,
                target,
                container_type,
                container,
                subject,
            } => check_in(
                registry,
                action,
                subject_type,
                target,
                container_type,
                container,
                subject.as_deref(),
            ),
        })
        .collect()
}

/// The caller's document, or the stored one when the caller gave an id.
fn load_document<'a>(
    config: &EntityTypeConfig,
    target: &'a Target,
) -> Result<Cow<'a, Document>, AuthzError> {
    match target {
        Target::Doc(doc) => Ok(Cow::Borrowed(doc)),
        Target::Id(id) => config
            .store
            .fetch_by_id(id)?
            .map(Cow::Owned)
            .ok_or_else(|| AuthzError::DocumentNotFound {
                entity_type: config.name.clone(),
                id: id.clone(),
            }),
    }
}

/// The grant entry for `subject` in the document's users list. Anonymous
/// subjects have no entry.
pub(crate) fn find_grant_entry<'d>(
    doc: &'d Document,
    users_field: &str,
    subject: Option<&str>,
) -> Option<&'d Map<String, Value>> {
    let subject = subject?;
    doc.get(users_field)?
        .as_array()?
        .iter()
        .filter_map(Value::as_object)
        .find(|entry| entry.get(USER_ID_FIELD).and_then(Value::as_str) == Some(subject))
}
