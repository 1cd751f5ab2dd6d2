//! Sync procedures, one per entity kind.
//!
//! Every procedure fetches the entity itself conditionally. Repositories and
//! issues also refresh their sub-collection listings, each cached under its
//! own [`CacheResource`].

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::cache::{AccessToken, CacheKey, CacheMetadata, CacheResource, CacheStore, WorkerSlot};
use crate::collab::{
    CredentialProvider, Diagnostic, Diagnostics, EntityStore, LogDiagnostics, NullSink, RemoteEntity,
    UpdateSink,
};
use crate::config::{ActorConfig, EngineConfig};
use crate::dispatch::{DeliveryLog, EntityTarget, QueueTable, QueuedMessage, UpdateMessage};
use crate::github::{FetchResult, GitHubClient, ItemRef};
use crate::http::HttpMethod;

use super::error::SyncError;
use super::id::{EntityId, EntityKind, UserId};

/// Result of a successful sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The remote returned a new representation, which was persisted.
    Refreshed,
    /// The remote confirmed the cached representation.
    NotModified,
    /// The cached representation has not expired; no request was made.
    Fresh,
}

/// Which credential a sync runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialChoice {
    /// Any candidate; the one with the most remaining budget wins.
    Any,
    /// The token of a specific user.
    Principal(UserId),
    /// A token supplied by the caller.
    Token(AccessToken),
}

/// Everything an actor needs, shared by all actors of a registry.
pub struct SyncContext {
    pub client: GitHubClient,
    pub cache: Arc<dyn CacheStore>,
    pub store: Arc<dyn EntityStore>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub sink: Arc<dyn UpdateSink>,
    pub diagnostics: Arc<dyn Diagnostics>,
    pub deliveries: Arc<DeliveryLog>,
    pub queues: QueueTable,
    pub config: ActorConfig,
    pub(crate) permits: Arc<Semaphore>,
}

impl SyncContext {
    /// Build a context without fan-out; diagnostics go to the log.
    pub fn new(
        client: GitHubClient,
        cache: Arc<dyn CacheStore>,
        store: Arc<dyn EntityStore>,
        credentials: Arc<dyn CredentialProvider>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            client,
            cache,
            store,
            credentials,
            sink: Arc::new(NullSink),
            diagnostics: Arc::new(LogDiagnostics),
            deliveries: Arc::new(DeliveryLog::from_config(&config.dispatch)),
            queues: QueueTable::new(&config.dispatch),
            config: config.actors.clone(),
            permits: Arc::new(Semaphore::new(config.actors.max_concurrent_syncs.max(1))),
        }
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn UpdateSink>) -> Self {
        self.sink = sink;
        self
    }

    #[must_use]
    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn Diagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub(crate) async fn resolve_token(
        &self,
        id: EntityId,
        choice: &CredentialChoice,
    ) -> Result<AccessToken, SyncError> {
        match choice {
            CredentialChoice::Any => {
                let candidates = self.credentials.candidates(&id).await;
                self.client
                    .budgets()
                    .best_of(&candidates)
                    .ok_or(SyncError::NoCredential(id))
            }
            CredentialChoice::Principal(user) => self
                .credentials
                .token_for(*user)
                .await
                .ok_or(SyncError::NoCredential(id)),
            CredentialChoice::Token(token) => Ok(token.clone()),
        }
    }
}

/// One of the registry's sync permits, held by a running sync.
///
/// The permit is handed back while the sync waits for a rate-limit reset.
pub(crate) struct SyncPermit {
    permits: Arc<Semaphore>,
    held: Mutex<Option<OwnedSemaphorePermit>>,
}

impl SyncPermit {
    pub(crate) async fn acquire(permits: &Arc<Semaphore>) -> Result<Arc<Self>, SyncError> {
        let permit = Arc::clone(permits)
            .acquire_owned()
            .await
            .map_err(|_| SyncError::Transient("Sync permits closed".to_string()))?;
        Ok(Arc::new(Self {
            permits: Arc::clone(permits),
            held: Mutex::new(Some(permit)),
        }))
    }

    #[cfg(test)]
    fn is_held(&self) -> bool {
        self.held.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }
}

#[async_trait]
impl WorkerSlot for SyncPermit {
    fn release(&self) {
        self.held.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    async fn reclaim(&self) {
        match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => {
                *self.held.lock().unwrap_or_else(|e| e.into_inner()) = Some(permit);
            }
            Err(_) => tracing::debug!("Sync permits closed during a rate-limit wait"),
        }
    }
}

/// Run the sync procedure for `id`.
pub(crate) async fn sync_entity(
    ctx: &SyncContext,
    id: EntityId,
    token: &AccessToken,
) -> Result<SyncOutcome, SyncError> {
    let key = CacheKey::new(id, CacheResource::Entity, token.clone());
    let cached = ctx.cache.get(&key).await?;

    if ctx.config.honor_expires
        && let Some(cached) = &cached
        && cached.is_fresh(Utc::now())
    {
        tracing::debug!(entity = %id, "Cached copy has not expired, skipping request");
        return Ok(SyncOutcome::Fresh);
    }

    let response = ctx
        .client
        .request::<Value>(HttpMethod::Get, &id.path(), token, cached.as_ref())
        .await
        .map_err(|e| SyncError::from_client(e, id, token))?;

    let outcome = if response.is_not_modified() {
        if let Some(cached) = &cached {
            ctx.cache.put(&key, cached.revalidated(Utc::now())).await?;
        }
        SyncOutcome::NotModified
    } else {
        if let Some(location) = &response.redirect {
            tracing::debug!(entity = %id, location = %location, "Entity moved");
        }
        let fetched_at = Utc::now();
        let metadata = CacheMetadata::from_response(&response, fetched_at);
        if let Some(document) = response.result {
            ctx.store
                .persist(RemoteEntity {
                    id,
                    document,
                    fetched_at,
                })
                .await?;
        }
        // Validators are recorded only once the representation is stored.
        ctx.cache.put(&key, metadata).await?;
        SyncOutcome::Refreshed
    };

    match id.kind {
        EntityKind::Repository => {
            if let Err(e) = sync_repository_issues(ctx, id, token).await {
                tracing::warn!(entity = %id, error = %e, "Issue listing refresh failed");
            }
        }
        EntityKind::Issue => {
            if let Err(e) = sync_issue_children(ctx, id, token).await {
                tracing::warn!(entity = %id, error = %e, "Issue timeline refresh failed");
            }
        }
        _ => {}
    }

    tracing::info!(entity = %id, ?outcome, "Sync completed");
    Ok(outcome)
}

async fn sync_repository_issues(
    ctx: &SyncContext,
    repository: EntityId,
    token: &AccessToken,
) -> Result<(), SyncError> {
    let Some(repository_id) = repository.repository_id() else {
        return Ok(());
    };
    let path = format!("/repositories/{repository_id}/issues?state=all&sort=updated&direction=desc");

    let issues = sync_listing(ctx, repository, CacheResource::Issues, &path, token, |item| {
        item.number.map(|number| EntityId::issue(repository_id, number))
    })
    .await?;

    if let Some(issues) = issues {
        let dropped = fan_out(ctx, repository, &issues, token);
        if dropped > 0 {
            // Without validators the next sync lists these issues again.
            let key = CacheKey::new(repository, CacheResource::Issues, token.clone());
            ctx.cache
                .put(
                    &key,
                    CacheMetadata {
                        etag: None,
                        last_modified: None,
                        expires: None,
                        last_refresh: Utc::now(),
                    },
                )
                .await?;
            ctx.diagnostics.record(Diagnostic {
                entity: repository,
                credential: Some(token.fingerprint()),
                error: format!("Dropped {dropped} derived issue updates"),
                at: Utc::now(),
            });
        }
    }
    Ok(())
}

async fn sync_issue_children(
    ctx: &SyncContext,
    issue: EntityId,
    token: &AccessToken,
) -> Result<(), SyncError> {
    let Some(repository_id) = issue.repository_id() else {
        return Ok(());
    };
    let issue_path = issue.path();

    sync_listing(
        ctx,
        issue,
        CacheResource::Comments,
        &format!("{issue_path}/comments"),
        token,
        |item| Some(EntityId::comment(repository_id, item.id)),
    )
    .await?;

    sync_listing(
        ctx,
        issue,
        CacheResource::Events,
        &format!("{issue_path}/events"),
        token,
        |item| Some(EntityId::event(repository_id, item.id)),
    )
    .await?;

    Ok(())
}

/// Refresh one listing and persist its items.
///
/// Returns the ids of the persisted items, or `None` when the listing was
/// not modified.
async fn sync_listing(
    ctx: &SyncContext,
    owner: EntityId,
    resource: CacheResource,
    path: &str,
    token: &AccessToken,
    key_item: impl Fn(&ItemRef) -> Option<EntityId>,
) -> Result<Option<Vec<EntityId>>, SyncError> {
    let key = CacheKey::new(owner, resource, token.clone());
    let cached = ctx.cache.get(&key).await?;

    let fetched = ctx
        .client
        .fetch_listing::<Value>(
            path,
            token,
            cached.as_ref(),
            ctx.config.per_page,
            ctx.config.max_pages,
        )
        .await
        .map_err(|e| SyncError::from_client(e, owner, token))?;

    let listing = match fetched {
        FetchResult::NotModified => {
            if let Some(cached) = &cached {
                ctx.cache.put(&key, cached.revalidated(Utc::now())).await?;
            }
            return Ok(None);
        }
        FetchResult::Fetched(listing) => listing,
    };

    if listing.truncated {
        tracing::debug!(entity = %owner, resource = resource.as_str(), pages = listing.pages, "Listing truncated");
    }

    let fetched_at = Utc::now();
    let metadata = listing.cache_metadata(fetched_at);
    let mut persisted = Vec::with_capacity(listing.items.len());

    for document in listing.items {
        let item = match serde_json::from_value::<ItemRef>(document.clone()) {
            Ok(item) => item,
            Err(e) => {
                tracing::debug!(entity = %owner, error = %e, "Skipping listing item without id");
                continue;
            }
        };
        let Some(id) = key_item(&item) else {
            continue;
        };
        ctx.store
            .persist(RemoteEntity {
                id,
                document,
                fetched_at,
            })
            .await?;
        persisted.push(id);
    }

    ctx.cache.put(&key, metadata).await?;
    tracing::debug!(entity = %owner, resource = resource.as_str(), items = persisted.len(), "Listing refreshed");
    Ok(Some(persisted))
}

/// Enqueue update messages for changed issues, at most `max_fanout`.
///
/// Returns how many of those messages could not be enqueued.
fn fan_out(ctx: &SyncContext, parent: EntityId, issues: &[EntityId], token: &AccessToken) -> usize {
    let queue = ctx.queues.update_queue(EntityKind::Issue);
    let wanted = issues.len().min(ctx.config.max_fanout);
    let mut enqueued = 0;

    for issue in &issues[..wanted] {
        let message = UpdateMessage::new(EntityTarget::for_entity(issue)).with_token(token.clone());
        let body = match serde_json::to_value(&message) {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(entity = %issue, error = %e, "Failed to encode derived update");
                continue;
            }
        };
        if let Err(e) = ctx.sink.enqueue(QueuedMessage::new(queue.clone(), body)) {
            tracing::warn!(entity = %parent, error = %e, enqueued, "Stopping fan-out");
            break;
        }
        enqueued += 1;
    }

    if issues.len() > ctx.config.max_fanout {
        tracing::debug!(
            entity = %parent,
            changed = issues.len(),
            max_fanout = ctx.config.max_fanout,
            "Fan-out capped"
        );
    }
    wanted - enqueued
}
