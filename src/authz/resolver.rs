//! Turns a policy value into an allow/deny decision.

use std::cell::Cell;

use serde_json::Value;

use crate::authz::errors::AuthzError;
use crate::authz::ownership;
use crate::authz::registry::PolicyRegistry;
use crate::authz::types::{ComputedRule, PolicyValue, Target};

thread_local! {
    static RULE_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Everything a policy value may need to decide a request.
#[derive(Debug, Clone, Copy)]
pub struct ResolveRequest<'a> {
    pub action: &'a str,
    pub target_type: &'a str,
    pub target: &'a Target,
    pub container_type: &'a str,
    pub container: &'a Target,
    pub subject: Option<&'a str>,
}

/// Resolve `value` for the request. Only configuration and store problems
/// are errors; every missing piece of policy is a deny.
pub fn resolve(
    registry: &PolicyRegistry,
    value: &PolicyValue,
    req: &ResolveRequest<'_>,
) -> Result<bool, AuthzError> {
    match value {
        PolicyValue::ActionMap(map) => match map.get(req.action) {
            Some(inner) => resolve(registry, inner, req),
            None => {
                tracing::debug!(
                    action = req.action,
                    target_type = req.target_type,
                    container_type = req.container_type,
                    subject = ?req.subject,
                    "Could not find permission for action. Assuming permission is denied."
                );
                Ok(false)
            }
        },
        PolicyValue::Bool(allowed) => {
            tracing::debug!(
                action = req.action,
                target_type = req.target_type,
                container_type = req.container_type,
                allowed,
                "Resolved literal permission"
            );
            Ok(*allowed)
        }
        PolicyValue::Own => ownership::check(registry, req.target_type, req.target, req.subject),
        PolicyValue::Computed(rule) => Ok(invoke_rule(registry, rule, req)),
    }
}

/// [`resolve`] for a value as stored in a document.
pub fn resolve_stored(
    registry: &PolicyRegistry,
    raw: &Value,
    req: &ResolveRequest<'_>,
) -> Result<bool, AuthzError> {
    match PolicyValue::from_json(raw) {
        Some(value) => resolve(registry, &value, req),
        None => {
            tracing::debug!(
                action = req.action,
                target_type = req.target_type,
                stored = %raw,
                "Stored permission is not a policy value. Assuming permission is denied."
            );
            Ok(false)
        }
    }
}

struct DepthGuard;

impl DepthGuard {
    fn enter(max: usize) -> Option<Self> {
        RULE_DEPTH.with(|depth| {
            if depth.get() >= max {
                None
            } else {
                depth.set(depth.get() + 1);
                Some(DepthGuard)
            }
        })
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        RULE_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

fn invoke_rule(registry: &PolicyRegistry, rule: &ComputedRule, req: &ResolveRequest<'_>) -> bool {
    let Some(_guard) = DepthGuard::enter(registry.max_rule_depth()) else {
        tracing::warn!(
            action = req.action,
            target_type = req.target_type,
            max_depth = registry.max_rule_depth(),
            "Computed rule nesting limit reached. Assuming permission is denied."
        );
        return false;
    };

    let allowed = rule.call(req.target, req.container_type, req.container);
    tracing::debug!(
        action = req.action,
        target_type = req.target_type,
        container_type = req.container_type,
        allowed,
        "Resolved computed permission"
    );
    allowed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::types::{EntityTypeOptions, PolicyMap};
    use crate::store::{Document, MemoryStore};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn registry() -> PolicyRegistry {
        let comments = MemoryStore::from_documents([
            Document::new("c1").with("userId", json!("u1")),
            Document::new("c2").with("userId", json!("u2")),
        ]);
        let mut reg = PolicyRegistry::new();
        reg.register_entity_type("comments", Arc::new(comments), EntityTypeOptions::default())
            .unwrap();
        reg.register_entity_type(
            "posts",
            Arc::new(MemoryStore::new()),
            EntityTypeOptions::default(),
        )
        .unwrap();
        reg
    }

    fn run(reg: &PolicyRegistry, value: &PolicyValue, action: &str, target: &str) -> bool {
        let target = Target::from(target);
        let container = Target::from("p1");
        let req = ResolveRequest {
            action,
            target_type: "comments",
            target: &target,
            container_type: "posts",
            container: &container,
            subject: Some("u1"),
        };
        resolve(reg, value, &req).unwrap()
    }

    #[test]
    fn test_bool_is_returned_verbatim() {
        let reg = registry();
        assert!(run(&reg, &PolicyValue::Bool(true), "edit", "c1"));
        assert!(!run(&reg, &PolicyValue::Bool(false), "edit", "c1"));
    }

    #[test]
    fn test_empty_action_map_denies() {
        let reg = registry();
        for action in ["create", "view", "edit", "delete", "anything"] {
            assert!(!run(&reg, &PolicyValue::ActionMap(PolicyMap::new()), action, "c1"));
        }
    }

    #[test]
    fn test_action_map_unwraps() {
        let reg = registry();
        let value = PolicyValue::actions([("create", true.into()), ("delete", PolicyValue::Own)]);
        assert!(run(&reg, &value, "create", "c2"));
        assert!(run(&reg, &value, "delete", "c1"));
        assert!(!run(&reg, &value, "delete", "c2"));
        assert!(!run(&reg, &value, "edit", "c1"));
    }

    #[test]
    fn test_nested_action_map_is_tolerated() {
        let reg = registry();
        let value = PolicyValue::actions([(
            "edit",
            PolicyValue::actions([("edit", true.into())]),
        )]);
        assert!(run(&reg, &value, "edit", "c1"));
    }

    #[test]
    fn test_computed_receives_caller_forms() {
        let reg = registry();
        let value = PolicyValue::computed(|target, container_type, container| {
            target.id() == Some("c1") && container_type == "posts" && container.id() == Some("p1")
        });
        assert!(run(&reg, &value, "edit", "c1"));
        assert!(!run(&reg, &value, "edit", "c2"));
    }

    #[test]
    fn test_stored_value_of_unknown_shape_denies() {
        let reg = registry();
        let target = Target::from("c1");
        let req = ResolveRequest {
            action: "edit",
            target_type: "comments",
            target: &target,
            container_type: "posts",
            container: &target,
            subject: Some("u1"),
        };
        assert!(!resolve_stored(&reg, &json!(42), &req).unwrap());
        assert!(!resolve_stored(&reg, &json!("yes"), &req).unwrap());
        assert!(resolve_stored(&reg, &json!({ "edit": true }), &req).unwrap());
    }

    #[test]
    fn test_reentrant_rules_are_bounded() {
        let reg = Arc::new(registry().with_max_rule_depth(3));
        let calls = Arc::new(AtomicUsize::new(0));

        // A rule that asks the resolver about itself forever.
        let value: Arc<std::sync::OnceLock<PolicyValue>> = Arc::new(std::sync::OnceLock::new());
        let rule = {
            let reg = Arc::clone(&reg);
            let value = Arc::clone(&value);
            let calls = Arc::clone(&calls);
            PolicyValue::computed(move |target, container_type, container| {
                calls.fetch_add(1, Ordering::SeqCst);
                let req = ResolveRequest {
                    action: "edit",
                    target_type: "comments",
                    target,
                    container_type,
                    container,
                    subject: Some("u1"),
                };
                resolve(&reg, value.get().unwrap(), &req).unwrap()
            })
        };
        value.set(rule.clone()).unwrap();

        assert!(!run(&reg, &rule, "edit", "c1"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
