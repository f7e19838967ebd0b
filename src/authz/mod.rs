//! Document level authorization.
//!
//! A [`PolicyRegistry`] is built once at startup (in code or from KDL policy
//! files via [`loader::load_policies`]) and then shared read-only. Checks go
//! through [`engine::check`] / [`engine::check_in`], writes through
//! [`grants`], or both through the per-action verbs of
//! [`PolicyRegistry::action`].
//!
//! Resolution order for a containerized check on a role-mode container:
//!
//! ```text
//! grant entry for subject ── entry[subject_type] ──────────────► resolve
//!        │
//!        └─ entry.role ── document role overrides ─┐
//!                         entity type role ────────┼─ first with subject_type ─► resolve
//!                         global role ─────────────┘
//! ```
//!
//! Anything missing along the way is a deny, never an error.

pub mod actions;
pub mod engine;
pub mod errors;
pub mod grants;
pub mod loader;
pub mod locks;
pub mod ownership;
pub mod policy;
pub mod registry;
pub mod resolver;
pub mod types;

pub use actions::{Action, ActionTable, DEFAULT_ACTIONS};
pub use errors::AuthzError;
pub use registry::{EntityTypeConfig, FixedSubject, PolicyRegistry, SubjectProvider};
pub use types::{
    AuthorizationMode, ComputedRule, EntityTypeOptions, PolicyMap, PolicyValue, Target,
};
