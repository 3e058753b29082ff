//! Session Registry
//!
//! Tag bookkeeping over live connections. A tag names the session document
//! that declared a connection; a connection carrying several tags is shared
//! and only destroyed once the last of them is unloaded.

use crate::error::SessionError;
use crate::graph::{Graph, LiveMap, MapProperty};
use crate::reconciler::Reconciler;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What an unload or clear did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnloadReport {
    /// Connections destroyed because no tag was left.
    pub released: usize,
    /// Connections kept alive with a reduced tag set.
    pub retained: usize,
    /// Queued specs dropped because no tag was left.
    pub unstaged: usize,
    /// Connections the graph refused to release or update. They keep their
    /// previous tags.
    pub failed: usize,
}

impl UnloadReport {
    /// One-line summary for command output.
    pub fn summary(&self) -> String {
        let mut line = format!(
            "{} connection(s) removed, {} kept by other sessions",
            self.released, self.retained
        );
        if self.failed > 0 {
            line.push_str(&format!(", {} could not be changed", self.failed));
        }
        line
    }
}

/// Tag queries and tag-scoped teardown.
pub struct SessionRegistry {
    reconciler: Arc<Reconciler>,
}

impl SessionRegistry {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self { reconciler }
    }

    fn graph(&self) -> &dyn Graph {
        self.reconciler.graph().as_ref()
    }

    /// Connections visible to the user: no hidden endpoint and nothing
    /// touching this process's management device.
    fn user_maps(&self, tag: Option<&str>) -> Vec<LiveMap> {
        let management = &self.reconciler.config().management_device;
        self.graph()
            .maps(tag)
            .into_iter()
            .filter(|m| !m.touches_hidden() && !m.touches_device(management))
            .collect()
    }

    /// Distinct tags across user-visible live connections.
    pub async fn tags(&self) -> Result<BTreeSet<String>, SessionError> {
        self.reconciler.poll().await?;
        Ok(self
            .user_maps(None)
            .into_iter()
            .flat_map(|m| m.properties.tags)
            .collect())
    }

    /// Remove `tag` from every connection carrying it. Connections left
    /// without tags are destroyed; queued specs lose the tag as well.
    pub async fn unload(&self, tag: &str) -> Result<UnloadReport, SessionError> {
        self.reconciler.poll().await?;
        self.release_tag(tag)
    }

    /// `unload` against the graph state as last polled.
    pub fn release_tag(&self, tag: &str) -> Result<UnloadReport, SessionError> {
        let mut report = UnloadReport {
            unstaged: self.reconciler.unstage_tag(tag),
            ..UnloadReport::default()
        };

        let graph = self.graph();
        for map in self.user_maps(Some(tag)) {
            let remaining: Vec<String> = map
                .properties
                .tags
                .iter()
                .filter(|t| t.as_str() != tag)
                .cloned()
                .collect();
            let released = remaining.is_empty();
            let result = if released {
                graph.release_map(map.id)
            } else {
                graph.set_map_property(map.id, MapProperty::Tags(remaining))
            };
            match result {
                Ok(()) if released => {
                    debug!(map = %map.id, "Released connection");
                    report.released += 1;
                }
                Ok(()) => report.retained += 1,
                Err(e) => {
                    warn!(map = %map.id, tag = tag, error = %e, "Failed to unload connection");
                    report.failed += 1;
                }
            }
        }

        info!(
            tag = tag,
            released = report.released,
            retained = report.retained,
            unstaged = report.unstaged,
            failed = report.failed,
            "Unloaded session"
        );
        Ok(report)
    }

    /// Unload `tag`, or with no tag destroy every user-visible connection and
    /// empty the staging queue.
    pub async fn clear(&self, tag: Option<&str>) -> Result<UnloadReport, SessionError> {
        if let Some(tag) = tag {
            return self.unload(tag).await;
        }

        self.reconciler.poll().await?;
        let mut report = UnloadReport {
            unstaged: self.reconciler.clear_staged(),
            ..UnloadReport::default()
        };
        let graph = self.graph();
        for map in self.user_maps(None) {
            match graph.release_map(map.id) {
                Ok(()) => report.released += 1,
                Err(e) => {
                    warn!(map = %map.id, error = %e, "Failed to release connection");
                    report.failed += 1;
                }
            }
        }
        info!(
            released = report.released,
            unstaged = report.unstaged,
            failed = report.failed,
            "Cleared all sessions"
        );
        Ok(report)
    }
}
