use console::{Term, style};
use hubsync::{EntityId, EntityKey, EntityKind, SyncOutcome, UserId};

use crate::commands::shared::build_engine;
use crate::config::Config;

/// Handle the `sync` command: refresh one entity now.
///
/// With `user`, the sync runs on that user's credential and ahead of any
/// queued background work for the entity.
pub(crate) async fn handle_sync(
    kind: &str,
    key: &str,
    user: Option<i64>,
    config: &Config,
    database_url: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let id = parse_entity(kind, key)?;
    let engine = build_engine(config, database_url).await?;
    let actor = engine.dispatcher.registry().get(id);

    let outcome = match user {
        Some(user) => actor.sync_interactive(UserId(user)).await?,
        None => actor.sync().await?,
    };

    let summary = match outcome {
        SyncOutcome::Refreshed => "refreshed",
        SyncOutcome::NotModified => "not modified",
        SyncOutcome::Fresh => "still fresh, no request made",
    };

    if Term::stdout().is_term() {
        println!("{} {id}: {summary}", style("✓").green());
        println!("  {} entities stored", engine.store.len());
    } else {
        tracing::info!(entity = %id, ?outcome, stored = engine.store.len(), "Sync finished");
    }
    Ok(())
}

/// Parse `kind` and `key` into an entity id.
///
/// Repository-scoped kinds take `REPOSITORY_ID/ID`; accounts and
/// repositories take a bare id.
pub(crate) fn parse_entity(kind: &str, key: &str) -> Result<EntityId, hubsync::actor::IdError> {
    let kind: EntityKind = kind.parse()?;
    let key: EntityKey = key.parse()?;
    EntityId::new(kind, key)
}
