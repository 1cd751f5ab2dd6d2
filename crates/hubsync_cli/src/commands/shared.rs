//! Engine wiring shared by the commands.

use std::path::Path;
use std::sync::Arc;

use hubsync::{
    ActorRegistry, ChannelSink, DbCacheStore, Dispatcher, GitHubClient, MemoryCredentials,
    MemoryEntityStore, QueuedMessage, RateLimitRegistry, ReqwestTransport, SyncContext,
};
use tokio::sync::mpsc;

use crate::config::Config;

/// A wired engine plus the handles the commands report from.
pub(crate) struct Engine {
    pub dispatcher: Dispatcher,
    pub store: Arc<MemoryEntityStore>,
    /// Derived messages enqueued by actors during syncs.
    pub fan_out: mpsc::Receiver<QueuedMessage>,
}

/// Connect to the cache database and wire every engine component.
pub(crate) async fn build_engine(
    config: &Config,
    database_url: &str,
) -> Result<Engine, Box<dyn std::error::Error>> {
    ensure_sqlite_dir(database_url)?;
    let db = hubsync::connect_and_migrate(database_url).await?;

    let pairs = config.credential_pairs();
    if pairs.is_empty() {
        tracing::warn!("No credentials configured; syncs will fail with no credential");
    }
    let credentials = Arc::new(MemoryCredentials::from_pairs(pairs));

    let client = build_client(config)?;

    let store = Arc::new(MemoryEntityStore::new());
    let (sink, fan_out) = ChannelSink::new(config.run.fan_out_capacity.max(1));
    let context = SyncContext::new(
        client,
        Arc::new(DbCacheStore::new(db)),
        store.clone(),
        credentials,
        &config.engine,
    )
    .with_sink(Arc::new(sink));

    let dispatcher = Dispatcher::new(ActorRegistry::new(context), &config.engine.dispatch);

    Ok(Engine {
        dispatcher,
        store,
        fan_out,
    })
}

/// A client over the real network with its own budget registry.
pub(crate) fn build_client(config: &Config) -> Result<GitHubClient, hubsync::HttpError> {
    let transport = Arc::new(ReqwestTransport::with_timeout(config.engine.client.timeout())?);
    Ok(GitHubClient::new(
        transport,
        Arc::new(RateLimitRegistry::new()),
        &config.engine.client,
    ))
}

/// Create the parent directory of a file-backed SQLite database.
fn ensure_sqlite_dir(database_url: &str) -> std::io::Result<()> {
    let Some(db_path) = database_url.strip_prefix("sqlite://") else {
        return Ok(());
    };
    // Strip query parameters (e.g., ?mode=rwc) before path operations
    let db_path = db_path.split('?').next().unwrap_or(db_path);
    let db_path = Path::new(db_path);

    if db_path.is_relative() && !db_path.as_os_str().is_empty() {
        tracing::warn!(
            "Database path '{}' is relative - behavior depends on current directory. \
             Consider using an absolute path.",
            db_path.display()
        );
    }

    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}
