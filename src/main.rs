use std::collections::hash_map::Entry;
use std::sync::Arc;

use canopy::authz::{loader, PolicyRegistry, PolicyValue, Target};
use canopy::errors::CanopyError;
use canopy::seed::{self, Stores};
use canopy::settings::Settings;
use canopy::store::{DocumentStore, MemoryStore};
use clap::{Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "canopy", version, about = "Document level authorization")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "canopy.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check an action on a document directly
    Check {
        action: String,
        entity_type: String,
        id: String,
        #[arg(long)]
        user: Option<String>,
    },
    /// Check an action on a document through its container
    CheckIn {
        action: String,
        subject_type: String,
        id: String,
        container_type: String,
        container_id: String,
        #[arg(long)]
        user: Option<String>,
    },
    /// Give the user a role on a container document
    AssignRole {
        container_type: String,
        container_id: String,
        role: String,
        #[arg(long)]
        user: Option<String>,
    },
    /// Remove the user's role on a container document
    RevokeRole {
        container_type: String,
        container_id: String,
        #[arg(long)]
        user: Option<String>,
    },
    /// Store an explicit grant (true, false or own) for the user
    SetPermission {
        action: String,
        entity_type: String,
        id: String,
        value: String,
        /// Grant on documents of this type contained in `entity_type`/`id`
        #[arg(long)]
        within: Option<String>,
        #[arg(long)]
        user: Option<String>,
    },
    /// Print the loaded entity types, roles and actions
    Show,
}

fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let settings = Settings::load(&cli.config)?;
    tracing::info!(?settings, "Loaded configuration");

    let mut stores = match &settings.store.seed_file {
        Some(path) if path.exists() => seed::load_seed_file(path)?,
        Some(path) => {
            tracing::warn!("Seed file {} not found, starting with empty stores", path.display());
            Stores::new()
        }
        None => Stores::new(),
    };

    let mut registry =
        PolicyRegistry::new().with_max_rule_depth(settings.engine.max_rule_depth);
    for action in &settings.engine.custom_actions {
        registry.add_action_type(action);
    }
    loader::load_policies(&settings.policies.dir, &mut registry, |entity_type| {
        let store = match stores.entry(entity_type.to_string()) {
            Entry::Occupied(e) => e.get().clone(),
            Entry::Vacant(e) => e.insert(Arc::new(MemoryStore::new())).clone(),
        };
        store as Arc<dyn DocumentStore>
    })?;

    let mutated = run(&registry, cli.command)?;

    if mutated && settings.store.persist {
        if let Some(path) = &settings.store.seed_file {
            seed::write_seed_file(path, &stores)?;
            tracing::info!("Persisted documents to {}", path.display());
        }
    }
    Ok(())
}

/// Executes one command. Returns whether any document was written.
fn run(registry: &PolicyRegistry, command: Command) -> Result<bool, CanopyError> {
    match command {
        Command::Check {
            action,
            entity_type,
            id,
            user,
        } => {
            let allowed = registry
                .action(&action)?
                .check(&entity_type, &Target::from(id), user.as_deref())?;
            print_decision(allowed);
            Ok(false)
        }
        Command::CheckIn {
            action,
            subject_type,
            id,
            container_type,
            container_id,
            user,
        } => {
            let allowed = registry.action(&action)?.check_in(
                &subject_type,
                &Target::from(id),
                &container_type,
                &Target::from(container_id),
                user.as_deref(),
            )?;
            print_decision(allowed);
            Ok(false)
        }
        Command::AssignRole {
            container_type,
            container_id,
            role,
            user,
        } => {
            canopy::authz::grants::assign_role(
                registry,
                &container_type,
                &container_id,
                &role,
                user.as_deref(),
            )?;
            println!("assigned {role} on {container_type}/{container_id}");
            Ok(true)
        }
        Command::RevokeRole {
            container_type,
            container_id,
            user,
        } => {
            let removed = canopy::authz::grants::revoke_role(
                registry,
                &container_type,
                &container_id,
                user.as_deref(),
            )?;
            if removed {
                println!("revoked role on {container_type}/{container_id}");
            } else {
                println!("no role to revoke on {container_type}/{container_id}");
            }
            Ok(removed)
        }
        Command::SetPermission {
            action,
            entity_type,
            id,
            value,
            within,
            user,
        } => {
            let value = parse_grant(&value)?;
            let verbs = registry.action(&action)?;
            match within {
                Some(subject_type) => {
                    verbs.set_in(&subject_type, &entity_type, &id, &value, user.as_deref())?
                }
                None => verbs.set(&entity_type, &id, &value, user.as_deref())?,
            }
            println!("set {action} on {entity_type}/{id}");
            Ok(true)
        }
        Command::Show => {
            println!("actions: {}", registry.actions().names().collect::<Vec<_>>().join(", "));
            for name in registry.entity_type_names() {
                let config = registry.lookup_config(name)?;
                let mut roles: Vec<&str> = config.roles.keys().map(String::as_str).collect();
                roles.sort_unstable();
                println!(
                    "entity {name}: mode={:?} users={} owner={} roles=[{}]",
                    config.authorization_mode,
                    config.users_field_name,
                    config.owner_field_name.as_deref().unwrap_or("-"),
                    roles.join(", ")
                );
            }
            println!("roles: {}", registry.role_count());
            Ok(false)
        }
    }
}

fn parse_grant(value: &str) -> Result<PolicyValue, CanopyError> {
    match value {
        "true" => Ok(PolicyValue::Bool(true)),
        "false" => Ok(PolicyValue::Bool(false)),
        "own" => Ok(PolicyValue::Own),
        other => Err(CanopyError::BadRequest(format!(
            "grant value must be `true`, `false` or `own`, got `{other}`"
        ))),
    }
}

fn print_decision(allowed: bool) {
    println!("{}", if allowed { "allowed" } else { "denied" });
}
