//! Graph Nodes
//!
//! This module defines the records that live in the dependency graph arena:
//! deps (reactive slots), subscribers (effects and computeds) and the links
//! joining them.

use std::ops::BitOr;

use slotmap::new_key_type;

new_key_type! {
    /// Handle to a [`DepNode`] in the graph arena.
    pub struct DepId;

    /// Handle to a [`SubscriberNode`] in the graph arena.
    ///
    /// Handles are generational: a handle to a removed subscriber never
    /// aliases a newer one.
    pub struct SubscriberId;

    /// Handle to a [`Link`] in the graph arena.
    pub struct LinkId;
}

/// The kind of subscriber in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A side-effecting computation. Effects are leaves of the graph: they
    /// read deps but nobody reads them.
    Effect,

    /// A derived value. Computeds read deps and own a dep of their own, so
    /// they sit in the middle of the graph.
    Computed,
}

/// State bits of a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u8);

impl Flags {
    /// The subscriber has not been stopped.
    pub const ACTIVE: Flags = Flags(1 << 0);
    /// The subscriber's function is executing right now.
    pub const RUNNING: Flags = Flags(1 << 1);
    /// Already collected by the current batch.
    pub const NOTIFIED: Flags = Flags(1 << 2);
    /// A dependency may have changed since the last evaluation.
    pub const DIRTY: Flags = Flags(1 << 3);
    /// Writes made by the subscriber during its own run re-notify it.
    pub const ALLOW_RECURSE: Flags = Flags(1 << 4);
    /// Notifications are parked until resumed.
    pub const PAUSED: Flags = Flags(1 << 5);
    /// A computed holds a cached value.
    pub const EVALUATED: Flags = Flags(1 << 6);
    /// The last evaluation panicked; the next read re-runs unconditionally.
    pub const FAILED: Flags = Flags(1 << 7);

    /// No bits set.
    pub const fn empty() -> Self {
        Flags(0)
    }

    /// Check whether all bits of `other` are set.
    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set the bits of `other`.
    pub fn insert(&mut self, other: Flags) {
        self.0 |= other.0;
    }

    /// Clear the bits of `other`.
    pub fn remove(&mut self, other: Flags) {
        self.0 &= !other.0;
    }

    /// Set or clear the bits of `other`.
    pub fn set(&mut self, other: Flags, value: bool) {
        if value {
            self.insert(other);
        } else {
            self.remove(other);
        }
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

/// One reactive slot and everyone currently subscribed to it.
#[derive(Debug, Default)]
pub struct DepNode {
    /// Bumped on every write to the slot.
    pub(crate) version: u64,

    /// First link of the subscriber list.
    pub(crate) subs_head: Option<LinkId>,

    /// Last link of the subscriber list.
    pub(crate) subs_tail: Option<LinkId>,

    /// Number of links in the subscriber list.
    pub(crate) sub_count: usize,

    /// The computed owning this dep, if it is a computed's output.
    pub(crate) computed: Option<SubscriberId>,

    /// Link of the subscriber currently running against this dep. Forms a
    /// stack through [`Link::prev_active_link`] for nested runs.
    pub(crate) active_link: Option<LinkId>,
}

impl DepNode {
    /// Current version of the slot.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sub_count
    }
}

/// A subscriber's node in the graph: its state and its list of deps.
#[derive(Debug)]
pub struct SubscriberNode {
    pub(crate) kind: NodeKind,
    pub(crate) flags: Flags,

    /// First link of the dep list.
    pub(crate) deps_head: Option<LinkId>,

    /// Last link of the dep list. Links read during the current run are
    /// moved here.
    pub(crate) deps_tail: Option<LinkId>,

    /// Global write counter observed at the last evaluation (computeds).
    pub(crate) global_version: u64,

    /// The subscriber's own output dep (computeds).
    pub(crate) dep: Option<DepId>,
}

impl SubscriberNode {
    pub(crate) fn new(kind: NodeKind) -> Self {
        let mut flags = Flags::ACTIVE;
        if kind == NodeKind::Computed {
            // Start dirty to ensure first computation
            flags.insert(Flags::DIRTY);
        }

        Self {
            kind,
            flags,
            deps_head: None,
            deps_tail: None,
            global_version: 0,
            dep: None,
        }
    }

    /// What kind of subscriber this is.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Current state bits.
    pub fn flags(&self) -> Flags {
        self.flags
    }
}

/// One (dep, subscriber) edge.
///
/// A link sits in two doubly-linked lists at once: the subscriber's dep list
/// (`prev_dep`/`next_dep`) and the dep's subscriber list
/// (`prev_sub`/`next_sub`). It is always inserted into and removed from both
/// lists together.
#[derive(Debug)]
pub struct Link {
    pub(crate) dep: DepId,
    pub(crate) sub: SubscriberId,

    /// Dep version at the last read. `None` while a run is in progress and
    /// the link has not been read yet.
    pub(crate) version: Option<u64>,

    pub(crate) prev_dep: Option<LinkId>,
    pub(crate) next_dep: Option<LinkId>,
    pub(crate) prev_sub: Option<LinkId>,
    pub(crate) next_sub: Option<LinkId>,

    /// The dep's active link before this one was pushed.
    pub(crate) prev_active_link: Option<LinkId>,
}

impl Link {
    pub(crate) fn new(dep: DepId, sub: SubscriberId, version: u64) -> Self {
        Self {
            dep,
            sub,
            version: Some(version),
            prev_dep: None,
            next_dep: None,
            prev_sub: None,
            next_sub: None,
            prev_active_link: None,
        }
    }

    /// The dep end of the edge.
    pub fn dep(&self) -> DepId {
        self.dep
    }

    /// The subscriber end of the edge.
    pub fn sub(&self) -> SubscriberId {
        self.sub
    }

    /// Dep version recorded at the last read.
    pub fn version(&self) -> Option<u64> {
        self.version
    }
}
