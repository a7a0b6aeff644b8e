//! Dependency Graph
//!
//! This module implements the dependency link graph that connects reactive
//! slots (deps) to the computations reading them (subscribers).
//!
//! # Overview
//!
//! Every (dep, subscriber) pair is a [`Link`]. A link sits in two
//! doubly-linked lists at the same time:
//!
//! - the subscriber's list of deps it read during its last run, used to
//!   clean up stale dependencies between runs;
//! - the dep's list of subscribers, walked when the dep is written.
//!
//! # Design Decisions
//!
//! 1. Nodes and links live in slot-map arenas and refer to each other by
//!    generational keys rather than pointers. A stale key looks up as absent
//!    instead of dangling.
//!
//! 2. Each link records the dep version it last saw. A subscriber is dirty
//!    when any of its links is behind its dep, which lets computeds be
//!    re-validated without re-running them.
//!
//! 3. Writes propagate with an explicit stack, so arbitrarily deep computed
//!    chains are walked without recursion.

mod arena;
mod node;

pub use arena::{Graph, GraphStats, Propagation};
pub use node::{DepId, DepNode, Flags, Link, LinkId, NodeKind, SubscriberId, SubscriberNode};
