use miette::Diagnostic;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error, Diagnostic)]
pub enum AuthzError {
    #[error("Entity type `{0}` is not registered")]
    #[diagnostic(
        code(canopy::authz::unregistered_entity_type),
        help("Register it with PolicyRegistry::register_entity_type(\"{0}\", store, options) or an `entity \"{0}\"` node in a policy file")
    )]
    UnregisteredEntityType(String),

    #[error("Configuration error: {0}")]
    #[diagnostic(code(canopy::authz::configuration))]
    Configuration(String),

    #[error("Role `{role}` is not defined for `{entity_type}` or globally")]
    #[diagnostic(
        code(canopy::authz::undefined_role),
        help("Define the role with: role \"{role}\" {{ ... }} (global) or role \"{role}\" on=\"{entity_type}\" {{ ... }}")
    )]
    UndefinedRole { role: String, entity_type: String },

    #[error("Could not find {entity_type} with _id `{id}`")]
    #[diagnostic(code(canopy::authz::document_not_found))]
    DocumentNotFound { entity_type: String, id: String },

    #[error("Unknown action `{0}`")]
    #[diagnostic(
        code(canopy::authz::unknown_action),
        help("Add the action with PolicyRegistry::add_action_type or an `actions {{ - \"{0}\" }}` node")
    )]
    UnknownAction(String),

    #[error("Invalid policy: {0}")]
    #[diagnostic(
        code(canopy::authz::invalid_policy),
        help("Each policy file must contain valid `actions`, `entity`, `role`, or `permissions` KDL nodes")
    )]
    InvalidPolicy(String),

    #[error("Failed to load policy file `{path}`")]
    #[diagnostic(
        code(canopy::authz::policy_load),
        help("Check that the file exists and contains valid KDL syntax")
    )]
    PolicyLoadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("KDL parse error: {0}")]
    #[diagnostic(
        code(canopy::authz::kdl_parse),
        help("Check your KDL file syntax; see https://kdl.dev")
    )]
    KdlParse(String),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    #[diagnostic(code(canopy::authz::io))]
    Io(#[from] std::io::Error),
}

impl AuthzError {
    /// Errors caused by how the registry was set up rather than by the data
    /// being checked.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            AuthzError::UnregisteredEntityType(_)
                | AuthzError::Configuration(_)
                | AuthzError::UnknownAction(_)
        )
    }
}
