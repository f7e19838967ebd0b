use kdl::{KdlDocument, KdlNode, KdlValue};

use crate::authz::errors::AuthzError;
use crate::authz::types::*;

/// Parse a KDL document string into typed policy structs.
pub fn parse_kdl_document(source: &str) -> Result<ParsedPolicy, AuthzError> {
    let doc: KdlDocument = source
        .parse()
        .map_err(|e: kdl::KdlError| AuthzError::KdlParse(e.to_string()))?;

    let mut policy = ParsedPolicy::default();

    for node in doc.nodes() {
        match node.name().value() {
            "actions" => {
                policy.actions.extend(dash_list(node));
            }
            "entity" => {
                policy.entity_types.push(parse_entity(node)?);
            }
            "role" => {
                let name = first_string_arg(node).ok_or_else(|| {
                    AuthzError::InvalidPolicy(
                        "role node requires a string argument (e.g. role \"author\" { ... })".into(),
                    )
                })?;
                let entity_type = string_prop(node, "on")?;
                let policy_map = parse_subject_map(node, &format!("role `{name}`"))?;

                policy.roles.push(RoleDecl {
                    name,
                    entity_type,
                    policy: policy_map,
                });
            }
            "permissions" => {
                let entity_type = string_prop(node, "on")?.ok_or_else(|| {
                    AuthzError::InvalidPolicy(
                        "permissions node requires an `on` property (e.g. permissions on=\"comments\" { ... })"
                            .into(),
                    )
                })?;
                let policy_map = parse_subject_map(node, &format!("permissions on `{entity_type}`"))?;

                policy.static_permissions.push(StaticPermissionsDecl {
                    entity_type,
                    policy: policy_map,
                });
            }
            other => {
                tracing::warn!("ignoring unknown top-level KDL node `{other}`");
            }
        }
    }

    Ok(policy)
}

fn parse_entity(node: &KdlNode) -> Result<EntityDecl, AuthzError> {
    let name = first_string_arg(node).ok_or_else(|| {
        AuthzError::InvalidPolicy(
            "entity node requires a string argument (e.g. entity \"posts\" mode=\"document-roles\")"
                .into(),
        )
    })?;

    let mut options = EntityTypeOptions::default();

    if let Some(mode) = string_prop(node, "mode")? {
        options.authorization_mode = AuthorizationMode::parse(&mode).ok_or_else(|| {
            AuthzError::InvalidPolicy(format!(
                "unknown mode `{mode}` for entity `{name}` (expected \"document-roles\" or \"static\")"
            ))
        })?;
    }
    if let Some(field) = string_prop(node, "users-field")? {
        options.users_field_name = field;
    }
    if let Some(field) = string_prop(node, "role-permissions-field")? {
        options.role_permissions_field_name = field;
    }
    match node.get("owner-field") {
        None => {}
        Some(KdlValue::Null) => options.owner_field_name = None,
        Some(value) => {
            let field = value.as_string().ok_or_else(|| {
                AuthzError::InvalidPolicy(format!(
                    "`owner-field` of entity `{name}` must be a string or #null"
                ))
            })?;
            options.owner_field_name = Some(field.to_string());
        }
    }

    Ok(EntityDecl { name, options })
}

/// Children of a role or permissions node: one node per subject type.
///
/// ```kdl
/// role "author" {
///     comments create=#true delete="own"
///     attachments "own"
/// }
/// ```
fn parse_subject_map(node: &KdlNode, context: &str) -> Result<PolicyMap, AuthzError> {
    let mut map = PolicyMap::new();
    let Some(children) = node.children() else {
        return Ok(map);
    };

    for child in children.nodes() {
        let subject_type = child.name().value().to_string();
        if child.children().is_some() {
            return Err(AuthzError::InvalidPolicy(format!(
                "`{subject_type}` in {context} takes action=value properties, not a block (e.g. {subject_type} create=#true)"
            )));
        }
        let args: Vec<&KdlValue> = child
            .entries()
            .iter()
            .filter(|e| e.name().is_none())
            .map(|e| e.value())
            .collect();
        let props: Vec<(&str, &KdlValue)> = child
            .entries()
            .iter()
            .filter_map(|e| e.name().map(|n| (n.value(), e.value())))
            .collect();

        let value = match (args.as_slice(), props.is_empty()) {
            ([single], true) => parse_value(single, context, &subject_type)?,
            ([], _) => {
                let mut actions = PolicyMap::new();
                for (action, raw) in props {
                    let value = parse_value(raw, context, &format!("{subject_type}.{action}"))?;
                    actions.insert(action.to_string(), value);
                }
                PolicyValue::ActionMap(actions)
            }
            _ => {
                return Err(AuthzError::InvalidPolicy(format!(
                    "`{subject_type}` in {context} takes either one value or action=value properties"
                )))
            }
        };

        if map.insert(subject_type.clone(), value).is_some() {
            return Err(AuthzError::InvalidPolicy(format!(
                "`{subject_type}` appears twice in {context}"
            )));
        }
    }

    Ok(map)
}

fn parse_value(raw: &KdlValue, context: &str, key: &str) -> Result<PolicyValue, AuthzError> {
    if let Some(b) = raw.as_bool() {
        return Ok(PolicyValue::Bool(b));
    }
    match raw.as_string() {
        Some(OWN_TAG) => Ok(PolicyValue::Own),
        _ => Err(AuthzError::InvalidPolicy(format!(
            "invalid value `{raw}` for `{key}` in {context} (expected #true, #false, or \"own\")"
        ))),
    }
}

/// Extract the first string argument from a KDL node.
fn first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn string_prop(node: &KdlNode, key: &str) -> Result<Option<String>, AuthzError> {
    match node.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_string()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| {
                AuthzError::InvalidPolicy(format!(
                    "`{key}` on `{}` must be a string",
                    node.name().value()
                ))
            }),
    }
}

/// Extract dash-list children: nodes named "-" whose first argument is a string.
/// ```kdl
/// actions {
///     - "publish"
///     - "archive"
/// }
/// ```
fn dash_list(node: &KdlNode) -> Vec<String> {
    let Some(children) = node.children() else {
        return Vec::new();
    };
    children
        .nodes()
        .iter()
        .filter(|n| n.name().value() == "-")
        .filter_map(first_string_arg)
        .collect()
}
