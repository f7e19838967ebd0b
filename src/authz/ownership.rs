use serde_json::Value;

use crate::authz::errors::AuthzError;
use crate::authz::registry::PolicyRegistry;
use crate::authz::types::Target;

/// Does `subject` own `target`? The target is always re-read from the store
/// by id so that an ownership decision reflects stored state.
///
/// A missing document, a document without the owner field, and an anonymous
/// subject all deny. An entity type without an owner field is a
/// configuration error.
pub fn check(
    registry: &PolicyRegistry,
    entity_type: &str,
    target: &Target,
    subject: Option<&str>,
) -> Result<bool, AuthzError> {
    let config = registry.lookup_config(entity_type)?;
    let owner_field = config.owner_field_name.as_deref().ok_or_else(|| {
        AuthzError::Configuration(format!(
            "no owner field is defined for the `{entity_type}` entity type; set one when registering it to use \"own\" permissions"
        ))
    })?;

    let Some(entity_id) = target.id() else {
        tracing::debug!(entity_type, "Ownership target has no _id. Assuming permission is denied.");
        return Ok(false);
    };

    let Some(doc) = config.store.fetch_by_id(entity_id)? else {
        tracing::debug!(entity_type, entity_id, "No document found. Assuming permission is denied.");
        return Ok(false);
    };

    let Some(owner) = doc.get(owner_field) else {
        tracing::debug!(
            entity_type,
            entity_id,
            owner_field,
            "No owner id found. Assuming permission is denied."
        );
        return Ok(false);
    };

    let owns = match subject {
        Some(subject) => matches!(owner, Value::String(s) if s == subject),
        None => false,
    };

    tracing::debug!(
        entity_type,
        entity_id,
        subject = ?subject,
        owns,
        "Resolved ownership"
    );
    Ok(owns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::types::EntityTypeOptions;
    use crate::store::{Document, MemoryStore};
    use serde_json::json;
    use std::sync::Arc;

    fn registry(options: EntityTypeOptions) -> PolicyRegistry {
        let store = MemoryStore::from_documents([
            Document::new("c1").with("authorId", json!("u1")),
            Document::new("c2"),
        ]);
        let mut reg = PolicyRegistry::new();
        reg.register_entity_type("comments", Arc::new(store), options)
            .unwrap();
        reg
    }

    #[test]
    fn test_owner_matches() {
        let reg = registry(EntityTypeOptions::default().with_owner_field("authorId"));
        assert!(check(&reg, "comments", &"c1".into(), Some("u1")).unwrap());
        assert!(!check(&reg, "comments", &"c1".into(), Some("u2")).unwrap());
    }

    #[test]
    fn test_missing_owner_field_denies_even_anonymous() {
        let reg = registry(EntityTypeOptions::default().with_owner_field("authorId"));
        assert!(!check(&reg, "comments", &"c2".into(), Some("u1")).unwrap());
        assert!(!check(&reg, "comments", &"c2".into(), None).unwrap());
        assert!(!check(&reg, "comments", &"c1".into(), None).unwrap());
    }

    #[test]
    fn test_missing_document_denies() {
        let reg = registry(EntityTypeOptions::default().with_owner_field("authorId"));
        assert!(!check(&reg, "comments", &"nope".into(), Some("u1")).unwrap());
    }

    #[test]
    fn test_refetches_by_id() {
        let reg = registry(EntityTypeOptions::default().with_owner_field("authorId"));
        // A caller-supplied document claiming u2 ownership is not trusted.
        let forged = Document::new("c1").with("authorId", json!("u2"));
        assert!(!check(&reg, "comments", &forged.into(), Some("u2")).unwrap());
    }

    #[test]
    fn test_no_owner_field_configured() {
        let reg = registry(EntityTypeOptions::default().without_owner());
        let err = check(&reg, "comments", &"c1".into(), Some("u1")).unwrap_err();
        assert!(matches!(err, AuthzError::Configuration(_)));
    }

    #[test]
    fn test_unregistered_type() {
        let reg = registry(EntityTypeOptions::default());
        let err = check(&reg, "posts", &"p1".into(), Some("u1")).unwrap_err();
        assert!(matches!(err, AuthzError::UnregisteredEntityType(_)));
    }
}
