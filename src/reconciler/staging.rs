//! Staging queue shared by the supervisor and foreground callers.

use crate::document::{add_tag, ConnectionSpec};
use crate::graph::MapId;
use crate::resolver::DeviceOverrides;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;

/// Where a queued spec is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Waiting for its endpoints to become available.
    Staged,
    /// Live and under supervision (persistent specs only).
    Materialized,
}

/// One spec in the staging queue.
#[derive(Debug, Clone)]
pub struct StagedEntry {
    pub spec: ConnectionSpec,
    pub overrides: Option<Arc<DeviceOverrides>>,
    pub state: EntryState,
    /// Live connections created for this spec on its last materialization.
    pub maps: Vec<MapId>,
    /// Passes in which every endpoint resolved but no connection was created.
    pub failed_attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl StagedEntry {
    pub fn new(spec: ConnectionSpec, overrides: Option<Arc<DeviceOverrides>>) -> Self {
        Self {
            spec,
            overrides,
            state: EntryState::Staged,
            maps: Vec::new(),
            failed_attempts: 0,
            enqueued_at: Utc::now(),
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.spec.policy.is_persistent()
    }

    /// Same endpoints, overrides and supervision kind.
    fn same_connection(&self, other: &StagedEntry) -> bool {
        self.spec.sources == other.spec.sources
            && self.spec.destination == other.spec.destination
            && self.overrides.as_deref() == other.overrides.as_deref()
            && self.is_persistent() == other.is_persistent()
    }

    /// Take over `newer`'s properties and policy, keeping the union of both
    /// tag sets. A supervised connection is re-staged when anything it applies
    /// to the live graph changed.
    fn absorb(&mut self, newer: StagedEntry) {
        let mut incoming = newer.spec;
        let mut tags = self.spec.session_tags.clone();
        for tag in &incoming.session_tags {
            add_tag(&mut tags, tag);
        }
        incoming.session_tags = tags;
        let changed = ConnectionSpec {
            policy: incoming.policy,
            ..self.spec.clone()
        } != incoming;
        self.spec = incoming;
        self.overrides = newer.overrides;
        self.failed_attempts = 0;
        if changed && self.state == EntryState::Materialized {
            self.state = EntryState::Staged;
            self.maps.clear();
        }
    }
}

/// FIFO of staged and supervised specs.
///
/// A pass takes every entry out with `drain`, works without holding the lock,
/// then hands survivors back with `restore`. Entries pushed meanwhile stay
/// behind the survivors, or fold into one of them, and are picked up on the
/// next pass. Tag removals and
/// clears made while a pass is out are replayed onto its survivors.
#[derive(Debug, Default)]
pub struct StagingQueue {
    entries: VecDeque<StagedEntry>,
    in_pass: bool,
    removed_in_pass: Vec<String>,
    cleared_in_pass: bool,
}

impl StagingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `entry`, or fold it into a queued entry for the same connection.
    /// Returns `true` when it was folded in.
    pub fn push(&mut self, entry: StagedEntry) -> bool {
        match self.entries.iter_mut().find(|queued| queued.same_connection(&entry)) {
            Some(queued) => {
                queued.absorb(entry);
                true
            }
            None => {
                self.entries.push_back(entry);
                false
            }
        }
    }

    pub fn drain(&mut self) -> Vec<StagedEntry> {
        self.in_pass = true;
        self.removed_in_pass.clear();
        self.cleared_in_pass = false;
        self.entries.drain(..).collect()
    }

    pub fn restore(&mut self, mut survivors: Vec<StagedEntry>) {
        self.in_pass = false;
        if std::mem::take(&mut self.cleared_in_pass) {
            survivors.clear();
        }
        for tag in std::mem::take(&mut self.removed_in_pass) {
            strip_tag(&mut survivors, &tag);
        }
        let late: Vec<StagedEntry> = self.entries.drain(..).collect();
        self.entries.extend(survivors);
        for entry in late {
            self.push(entry);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Nothing left that a synchronous wait could still resolve: the queue is
    /// empty or holds only persistent specs.
    pub fn is_settled(&self) -> bool {
        self.entries.iter().all(StagedEntry::is_persistent)
    }

    pub fn count_in(&self, state: EntryState) -> usize {
        self.entries.iter().filter(|e| e.state == state).count()
    }

    /// Drop `tag` from every queued spec. Specs left without tags are removed;
    /// returns how many were removed.
    pub fn remove_tag(&mut self, tag: &str) -> usize {
        if self.in_pass {
            self.removed_in_pass.push(tag.to_string());
        }
        let before = self.entries.len();
        for entry in self.entries.iter_mut() {
            entry.spec.session_tags.retain(|t| t != tag);
        }
        self.entries.retain(|e| !e.spec.session_tags.is_empty());
        before - self.entries.len()
    }

    /// Remove every queued spec.
    pub fn clear(&mut self) -> usize {
        if self.in_pass {
            self.cleared_in_pass = true;
        }
        let removed = self.entries.len();
        self.entries.clear();
        removed
    }
}

fn strip_tag(entries: &mut Vec<StagedEntry>, tag: &str) {
    for entry in entries.iter_mut() {
        entry.spec.session_tags.retain(|t| t != tag);
    }
    entries.retain(|e| !e.spec.session_tags.is_empty());
}
