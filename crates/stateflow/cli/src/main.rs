//! Thin command surface over the workflow engine.
//!
//! Each subcommand constructs a transition (or a query) and delegates to
//! the engine; no workflow logic lives here. Definitions and capability
//! grants are plain JSON files loaded at startup. Without `--database-url`
//! the in-memory store is used, which only lives for one invocation.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use stateflow_engine::{
    ExecutionContext, ExecutionEngine, InMemoryEntityAdapter, Scheduler,
    StaticCapabilityProvider, WorkflowRegistry,
};
use stateflow_store::{InMemoryTransitionStore, QueryWindow, TransitionStore};
use stateflow_types::{ActorId, EntityRef, FieldName, Transition, WorkflowType, WorkflowTypeId};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "stateflow", about = "Stateflow workflow engine CLI")]
#[command(version)]
struct Cli {
    /// JSON file holding the workflow type definitions
    #[arg(long, global = true, default_value = "workflows.json")]
    definitions: PathBuf,

    /// JSON file mapping actor ids to capability lists
    #[arg(long, global = true)]
    grants: Option<PathBuf>,

    /// PostgreSQL connection string; omit to use the in-memory store
    #[arg(long, global = true, env = "STATEFLOW_DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show an entity's current workflow state
    State {
        #[arg(long)]
        workflow: String,
        /// Entity reference as type:id, e.g. article:42
        #[arg(long)]
        entity: String,
        #[arg(long, default_value = "workflow")]
        field: String,
    },

    /// Execute an immediate transition
    Transition {
        #[arg(long)]
        workflow: String,
        #[arg(long)]
        entity: String,
        #[arg(long, default_value = "workflow")]
        field: String,
        #[arg(long)]
        actor: String,
        /// Target state id
        #[arg(long)]
        to: String,
        #[arg(long)]
        comment: Option<String>,
        /// Bypass authorization (administrative override)
        #[arg(long)]
        force: bool,
    },

    /// Record a transition to execute at a future due time
    Schedule {
        #[arg(long)]
        workflow: String,
        #[arg(long)]
        entity: String,
        #[arg(long, default_value = "workflow")]
        field: String,
        #[arg(long)]
        actor: String,
        #[arg(long)]
        to: String,
        /// Due time, RFC 3339 (e.g. 2026-09-01T06:00:00Z)
        #[arg(long)]
        due: String,
        #[arg(long)]
        comment: Option<String>,
    },

    /// Fire all scheduled transitions due within a window
    RunDue {
        /// Window start, RFC 3339; defaults to one hour before --until
        #[arg(long)]
        since: Option<String>,
        /// Window end, RFC 3339; defaults to now
        #[arg(long)]
        until: Option<String>,
    },

    /// Undo the most recent executed transition for an entity
    Revert {
        #[arg(long)]
        workflow: String,
        #[arg(long)]
        entity: String,
        #[arg(long, default_value = "workflow")]
        field: String,
        #[arg(long)]
        actor: String,
    },

    /// List an entity's transition history, newest first
    History {
        #[arg(long)]
        entity: String,
        #[arg(long, default_value = "workflow")]
        field: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let registry = Arc::new(load_definitions(&cli.definitions)?);
    let provider = Arc::new(load_grants(cli.grants.as_deref())?);
    let store = open_store(cli.database_url.as_deref()).await?;
    let adapter = Arc::new(InMemoryEntityAdapter::new());

    let engine = Arc::new(ExecutionEngine::new(
        registry.clone(),
        store.clone(),
        adapter.clone(),
        provider,
    ));

    match cli.command {
        Commands::State {
            workflow,
            entity,
            field,
        } => {
            let workflow_id = WorkflowTypeId::new(workflow);
            let workflow = registry
                .get(&workflow_id)
                .with_context(|| format!("unknown workflow type '{workflow_id}'"))?;
            let entity = parse_entity(&entity)?;
            let field = FieldName::new(field);
            let state = store.current_state(workflow, &entity, &field).await?;
            println!("{} [{}] {}", entity, field, workflow.state_label(&state));
        }

        Commands::Transition {
            workflow,
            entity,
            field,
            actor,
            to,
            comment,
            force,
        } => {
            let mut transition =
                build_transition(&registry, &store, &adapter, &workflow, &entity, &field, &actor, &to)
                    .await?;
            if let Some(comment) = comment {
                transition.set_comment(comment);
            }
            let mut ctx = ExecutionContext::new();
            let result = engine.execute(&mut transition, &mut ctx, force).await?;
            println!("{} -> {}", transition.from_state(), result);
        }

        Commands::Schedule {
            workflow,
            entity,
            field,
            actor,
            to,
            due,
            comment,
        } => {
            let due = parse_time(&due)?;
            let mut transition =
                build_transition(&registry, &store, &adapter, &workflow, &entity, &field, &actor, &to)
                    .await?;
            if let Some(comment) = comment {
                transition.set_comment(comment);
            }
            let mut ctx = ExecutionContext::new();
            engine.schedule(&mut transition, due, &mut ctx).await?;
            println!(
                "scheduled {} -> {} at {}",
                transition.from_state(),
                transition.to_state(),
                due.to_rfc3339()
            );
        }

        Commands::RunDue { since, until } => {
            let until = match until {
                Some(raw) => parse_time(&raw)?,
                None => Utc::now(),
            };
            let since = match since {
                Some(raw) => parse_time(&raw)?,
                None => until - Duration::hours(1),
            };
            let scheduler = Scheduler::new(engine.clone());
            let summary = scheduler.run_due(since, until).await?;
            println!("fired {}, discarded {}", summary.fired, summary.discarded);
        }

        Commands::Revert {
            workflow,
            entity,
            field,
            actor,
        } => {
            let workflow_id = WorkflowTypeId::new(workflow);
            let entity = parse_entity(&entity)?;
            let field = FieldName::new(field);
            let actor = ActorId::new(actor);
            adapter.insert_entity(&entity, actor.clone());
            let mut ctx = ExecutionContext::new();
            let result = engine
                .revert_last(&workflow_id, &entity, &field, &actor, &mut ctx)
                .await?;
            println!("{} [{}] {}", entity, field, result);
        }

        Commands::History {
            entity,
            field,
            limit,
        } => {
            let entity = parse_entity(&entity)?;
            let field = FieldName::new(field);
            let records = store
                .history(&entity, &field, QueryWindow::limited(limit))
                .await?;
            if records.is_empty() {
                println!("no history for {} [{}]", entity, field);
            }
            for record in records {
                let flags = if record.is_forced() { " (forced)" } else { "" };
                println!(
                    "{}  {} -> {}  by {}{}  {}",
                    record.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    record.from_state(),
                    record.to_state(),
                    record.actor,
                    flags,
                    record.comment(),
                );
            }
        }
    }

    Ok(())
}

fn load_definitions(path: &std::path::Path) -> Result<WorkflowRegistry> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read definitions file {}", path.display()))?;
    let definitions: Vec<WorkflowType> = serde_json::from_str(&raw)
        .with_context(|| format!("invalid definitions file {}", path.display()))?;

    let mut registry = WorkflowRegistry::new();
    for definition in definitions {
        registry
            .register(definition)
            .context("invalid workflow definition")?;
    }
    Ok(registry)
}

fn load_grants(path: Option<&std::path::Path>) -> Result<StaticCapabilityProvider> {
    let mut provider = StaticCapabilityProvider::new();
    let Some(path) = path else {
        return Ok(provider);
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read grants file {}", path.display()))?;
    let grants: HashMap<String, Vec<String>> = serde_json::from_str(&raw)
        .with_context(|| format!("invalid grants file {}", path.display()))?;
    for (actor, capabilities) in grants {
        for capability in capabilities {
            provider = provider.grant(actor.clone(), capability);
        }
    }
    Ok(provider)
}

async fn open_store(database_url: Option<&str>) -> Result<Arc<dyn TransitionStore>> {
    match database_url {
        Some(url) => {
            #[cfg(feature = "postgres")]
            {
                let store = stateflow_store::postgres::PostgresTransitionStore::connect(url)
                    .await
                    .context("failed to open postgres store")?;
                Ok(Arc::new(store))
            }
            #[cfg(not(feature = "postgres"))]
            {
                let _ = url;
                bail!("this build has no postgres support; rebuild with --features postgres")
            }
        }
        None => {
            tracing::warn!("using the in-memory store; state lives only for this invocation");
            Ok(Arc::new(InMemoryTransitionStore::new()))
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn build_transition(
    registry: &WorkflowRegistry,
    store: &Arc<dyn TransitionStore>,
    adapter: &Arc<InMemoryEntityAdapter>,
    workflow: &str,
    entity: &str,
    field: &str,
    actor: &str,
    to: &str,
) -> Result<Transition> {
    let workflow_id = WorkflowTypeId::new(workflow);
    let workflow = registry
        .get(&workflow_id)
        .with_context(|| format!("unknown workflow type '{workflow_id}'"))?;
    let entity = parse_entity(entity)?;
    let field = FieldName::new(field);
    let actor = ActorId::new(actor);

    // The CLI owns no real entities; register the target so it resolves,
    // owned by the acting user
    adapter.insert_entity(&entity, actor.clone());

    let from = store.current_state(workflow, &entity, &field).await?;
    Ok(Transition::new(
        workflow_id,
        from,
        stateflow_types::StateId::new(to),
        entity,
        field,
        actor,
    ))
}

fn parse_entity(raw: &str) -> Result<EntityRef> {
    match raw.split_once(':') {
        Some((entity_type, id)) if !entity_type.is_empty() && !id.is_empty() => {
            Ok(EntityRef::new(entity_type, id))
        }
        _ => bail!("entity must be given as type:id, e.g. article:42"),
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("invalid RFC 3339 time '{raw}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_entity() {
        let entity = parse_entity("article:42").unwrap();
        assert_eq!(entity.entity_type, "article");
        assert_eq!(entity.entity_id.as_deref(), Some("42"));

        assert!(parse_entity("article").is_err());
        assert!(parse_entity(":42").is_err());
    }

    #[test]
    fn test_parse_time() {
        let t = parse_time("2026-09-01T06:00:00Z").unwrap();
        assert_eq!(t.to_rfc3339(), "2026-09-01T06:00:00+00:00");
        assert!(parse_time("tomorrow").is_err());
    }
}
