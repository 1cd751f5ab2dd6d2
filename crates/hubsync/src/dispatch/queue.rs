//! Well-known queue names.
//!
//! Producers publish to two namespaces: discovery ("spider") queues for
//! newly seen entities and update queues for refreshes of known ones. The
//! queue name alone decides how a message is decoded and routed.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

use crate::actor::EntityKind;
use crate::config::DispatchConfig;

/// Discovery queue kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpiderKind {
    AccessToken,
    User,
    Organization,
}

impl SpiderKind {
    pub const ALL: [SpiderKind; 3] = [
        SpiderKind::AccessToken,
        SpiderKind::User,
        SpiderKind::Organization,
    ];

    #[must_use]
    pub fn suffix(self) -> &'static str {
        match self {
            SpiderKind::AccessToken => "access-token",
            SpiderKind::User => "user",
            SpiderKind::Organization => "organization",
        }
    }
}

/// Update queue kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateKind {
    Account,
    Comment,
    Issue,
    IssueEvent,
    Milestone,
    Repository,
    Webhook,
    RateLimit,
}

impl UpdateKind {
    pub const ALL: [UpdateKind; 8] = [
        UpdateKind::Account,
        UpdateKind::Comment,
        UpdateKind::Issue,
        UpdateKind::IssueEvent,
        UpdateKind::Milestone,
        UpdateKind::Repository,
        UpdateKind::Webhook,
        UpdateKind::RateLimit,
    ];

    #[must_use]
    pub fn suffix(self) -> &'static str {
        match self {
            UpdateKind::Account => "account",
            UpdateKind::Comment => "comment",
            UpdateKind::Issue => "issue",
            UpdateKind::IssueEvent => "issue-event",
            UpdateKind::Milestone => "milestone",
            UpdateKind::Repository => "repository",
            UpdateKind::Webhook => "webhook",
            UpdateKind::RateLimit => "rate-limit",
        }
    }

    /// The entity kind refreshed by this queue; `None` for rate-limit snapshots.
    #[must_use]
    pub fn entity_kind(self) -> Option<EntityKind> {
        match self {
            UpdateKind::Account => Some(EntityKind::Account),
            UpdateKind::Comment => Some(EntityKind::Comment),
            UpdateKind::Issue => Some(EntityKind::Issue),
            UpdateKind::IssueEvent => Some(EntityKind::Event),
            UpdateKind::Milestone => Some(EntityKind::Milestone),
            UpdateKind::Repository => Some(EntityKind::Repository),
            UpdateKind::Webhook => Some(EntityKind::Webhook),
            UpdateKind::RateLimit => None,
        }
    }

    #[must_use]
    pub fn for_entity(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Account => UpdateKind::Account,
            EntityKind::Repository => UpdateKind::Repository,
            EntityKind::Issue => UpdateKind::Issue,
            EntityKind::Comment => UpdateKind::Comment,
            EntityKind::Milestone => UpdateKind::Milestone,
            EntityKind::Event => UpdateKind::IssueEvent,
            EntityKind::Webhook => UpdateKind::Webhook,
        }
    }
}

/// A resolved queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Spider(SpiderKind),
    Update(UpdateKind),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("Unknown queue: {0}")]
    UnknownQueue(String),
}

/// Mapping between queue names and queue kinds.
#[derive(Clone)]
pub struct QueueTable {
    by_name: HashMap<String, QueueKind>,
    spider_prefix: String,
    update_prefix: String,
}

impl QueueTable {
    pub fn new(config: &DispatchConfig) -> Self {
        let mut by_name = HashMap::new();
        for kind in SpiderKind::ALL {
            by_name.insert(
                format!("{}{}", config.spider_prefix, kind.suffix()),
                QueueKind::Spider(kind),
            );
        }
        for kind in UpdateKind::ALL {
            by_name.insert(
                format!("{}{}", config.update_prefix, kind.suffix()),
                QueueKind::Update(kind),
            );
        }
        Self {
            by_name,
            spider_prefix: config.spider_prefix.clone(),
            update_prefix: config.update_prefix.clone(),
        }
    }

    pub fn resolve(&self, queue: &str) -> Result<QueueKind, QueueError> {
        self.by_name
            .get(queue)
            .copied()
            .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))
    }

    #[must_use]
    pub fn name(&self, kind: QueueKind) -> String {
        match kind {
            QueueKind::Spider(kind) => format!("{}{}", self.spider_prefix, kind.suffix()),
            QueueKind::Update(kind) => format!("{}{}", self.update_prefix, kind.suffix()),
        }
    }

    /// Update queue refreshing entities of `kind`.
    #[must_use]
    pub fn update_queue(&self, kind: EntityKind) -> String {
        self.name(QueueKind::Update(UpdateKind::for_entity(kind)))
    }

    /// Every known queue name, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_name.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for QueueTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueTable")
            .field("spider_prefix", &self.spider_prefix)
            .field("update_prefix", &self.update_prefix)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_names_resolve() {
        let table = QueueTable::new(&DispatchConfig::default());

        assert_eq!(
            table.resolve("spider-access-token"),
            Ok(QueueKind::Spider(SpiderKind::AccessToken))
        );
        assert_eq!(
            table.resolve("update-issue-event"),
            Ok(QueueKind::Update(UpdateKind::IssueEvent))
        );
        assert_eq!(
            table.resolve("update-rate-limit"),
            Ok(QueueKind::Update(UpdateKind::RateLimit))
        );
        assert_eq!(table.names().len(), 11);
    }

    #[test]
    fn test_unknown_queue_has_no_fallback() {
        let table = QueueTable::new(&DispatchConfig::default());
        assert_eq!(
            table.resolve("update-gist"),
            Err(QueueError::UnknownQueue("update-gist".to_string()))
        );
        assert!(table.resolve("issue").is_err());
    }

    #[test]
    fn test_custom_prefixes() {
        let config = DispatchConfig {
            spider_prefix: "prod-spider-".to_string(),
            update_prefix: "prod-update-".to_string(),
            ..DispatchConfig::default()
        };
        let table = QueueTable::new(&config);

        assert!(table.resolve("update-issue").is_err());
        assert_eq!(table.update_queue(EntityKind::Issue), "prod-update-issue");
        assert_eq!(
            table.name(QueueKind::Spider(SpiderKind::User)),
            "prod-spider-user"
        );
    }

    #[test]
    fn test_entity_kinds_map_both_ways() {
        for kind in EntityKind::ALL {
            assert_eq!(UpdateKind::for_entity(kind).entity_kind(), Some(kind));
        }
        assert_eq!(UpdateKind::RateLimit.entity_kind(), None);
    }
}
