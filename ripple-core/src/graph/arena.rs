//! Link Arena
//!
//! The arena owns every dep, subscriber and link. "Pointers" between them are
//! generational slot-map keys, so a stale handle resolves to nothing instead
//! of dangling.
//!
//! All list surgery lives here and never calls back into user code; the
//! runtime layers tracking context and notification on top.

use serde::Serialize;
use slotmap::SlotMap;
use smallvec::{smallvec, SmallVec};
use tracing::trace;

use super::node::{DepId, DepNode, Flags, Link, LinkId, NodeKind, SubscriberId, SubscriberNode};

/// Subscribers collected while propagating a write.
#[derive(Debug, Default)]
pub struct Propagation {
    /// Effects to trigger once the batch ends, in notification order.
    pub effects: Vec<SubscriberId>,

    /// Computeds marked dirty by this batch.
    pub computeds: Vec<SubscriberId>,
}

impl Propagation {
    /// Check whether nothing was collected.
    pub fn is_empty(&self) -> bool {
        self.effects.is_empty() && self.computeds.is_empty()
    }
}

/// Size of the graph, for diagnostics and leak checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct GraphStats {
    pub deps: usize,
    pub subscribers: usize,
    pub links: usize,
}

/// The dependency graph.
#[derive(Debug, Default)]
pub struct Graph {
    deps: SlotMap<DepId, DepNode>,
    subs: SlotMap<SubscriberId, SubscriberNode>,
    links: SlotMap<LinkId, Link>,
}

impl Graph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a dep with no subscribers.
    pub fn add_dep(&mut self) -> DepId {
        self.deps.insert(DepNode::default())
    }

    /// Add a subscriber. Computeds also get their own output dep.
    pub fn add_subscriber(&mut self, kind: NodeKind) -> SubscriberId {
        match kind {
            NodeKind::Effect => self.subs.insert(SubscriberNode::new(kind)),
            NodeKind::Computed => self.add_computed().0,
        }
    }

    /// Add a computed together with its output dep.
    pub fn add_computed(&mut self) -> (SubscriberId, DepId) {
        let id = self.subs.insert(SubscriberNode::new(NodeKind::Computed));
        let dep = self.deps.insert(DepNode {
            computed: Some(id),
            ..DepNode::default()
        });
        self.subs[id].dep = Some(dep);
        (id, dep)
    }

    pub fn dep(&self, id: DepId) -> Option<&DepNode> {
        self.deps.get(id)
    }

    pub fn dep_mut(&mut self, id: DepId) -> Option<&mut DepNode> {
        self.deps.get_mut(id)
    }

    pub fn sub(&self, id: SubscriberId) -> Option<&SubscriberNode> {
        self.subs.get(id)
    }

    pub fn sub_mut(&mut self, id: SubscriberId) -> Option<&mut SubscriberNode> {
        self.subs.get_mut(id)
    }

    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.links.get(id)
    }

    pub fn link_mut(&mut self, id: LinkId) -> Option<&mut Link> {
        self.links.get_mut(id)
    }

    /// Remove a dep and every link into it.
    pub fn remove_dep(&mut self, dep: DepId) {
        let mut cur = self.deps.get(dep).and_then(|d| d.subs_head);
        while let Some(link) = cur {
            cur = self.links[link].next_sub;
            self.unlink_from_sub(link);
            self.links.remove(link);
        }
        self.deps.remove(dep);
    }

    /// Remove a subscriber, its links, and (for computeds) its output dep.
    pub fn remove_subscriber(&mut self, sub: SubscriberId) {
        self.clear_deps(sub);
        if let Some(node) = self.subs.remove(sub) {
            if let Some(dep) = node.dep {
                self.remove_dep(dep);
            }
        }
    }

    /// Unlink every dep of `sub` from both sides.
    pub fn clear_deps(&mut self, sub: SubscriberId) {
        let Some(node) = self.subs.get_mut(sub) else {
            return;
        };
        let mut cur = node.deps_head.take();
        node.deps_tail = None;

        while let Some(link) = cur {
            let (next, dep, prev_active) = {
                let l = &self.links[link];
                (l.next_dep, l.dep, l.prev_active_link)
            };
            cur = next;

            if let Some(dep_node) = self.deps.get_mut(dep) {
                if dep_node.active_link == Some(link) {
                    dep_node.active_link = prev_active;
                }
            }
            self.unlink_from_dep(link);
            self.links.remove(link);
        }
    }

    /// Record that `sub` read `dep` during its current run.
    ///
    /// Returns the link joining them, or `None` if the read is not tracked
    /// (a computed reading its own output, or unknown handles).
    pub fn track(&mut self, dep: DepId, sub: SubscriberId) -> Option<LinkId> {
        let (version, computed, prev_active) = {
            let d = self.deps.get(dep)?;
            (d.version, d.computed, d.active_link)
        };
        if computed == Some(sub) {
            return None;
        }

        // Same-dep re-read: the last dep read in this run is `dep` again.
        if let Some(tail) = self.subs.get(sub)?.deps_tail {
            let link = &self.links[tail];
            if link.dep == dep && link.version.is_some() {
                return Some(tail);
            }
        }

        if let Some(active) = prev_active {
            let reusable = self
                .links
                .get(active)
                .filter(|link| link.sub == sub)
                .map(|link| link.version.is_none());
            match reusable {
                Some(true) => {
                    // Carried over from the previous run: mark it read.
                    self.links[active].version = Some(version);
                    self.move_to_tail(active);
                    return Some(active);
                }
                Some(false) => return Some(active),
                None => {}
            }
        }

        let mut link = Link::new(dep, sub, version);
        link.prev_active_link = prev_active;
        let id = self.links.insert(link);

        self.deps[dep].active_link = Some(id);
        self.append_to_sub(id);
        self.append_to_dep(id);

        trace!(?dep, ?sub, "linked");
        Some(id)
    }

    /// Prepare `sub` for a new run: mark every link as unread and push it as
    /// its dep's active link.
    pub fn prepare(&mut self, sub: SubscriberId) {
        let mut cur = self.subs.get(sub).and_then(|s| s.deps_head);
        while let Some(link) = cur {
            let l = &mut self.links[link];
            cur = l.next_dep;
            l.version = None;
            let dep = l.dep;
            if let Some(dep_node) = self.deps.get_mut(dep) {
                self.links[link].prev_active_link = dep_node.active_link;
                dep_node.active_link = Some(link);
            }
        }
    }

    /// Finish a run of `sub`: unlink every link that was not read, and pop
    /// the active links pushed by [`Graph::prepare`] and [`Graph::track`].
    ///
    /// Returns the number of links pruned.
    pub fn cleanup(&mut self, sub: SubscriberId) -> usize {
        let mut pruned = 0;
        let mut cur = self.subs.get(sub).and_then(|s| s.deps_head);

        while let Some(link) = cur {
            let (next, dep, prev_active, stale) = {
                let l = &mut self.links[link];
                (l.next_dep, l.dep, l.prev_active_link.take(), l.version.is_none())
            };
            cur = next;

            if let Some(dep_node) = self.deps.get_mut(dep) {
                dep_node.active_link = prev_active;
            }

            if stale {
                self.unlink_from_sub(link);
                self.unlink_from_dep(link);
                self.links.remove(link);
                pruned += 1;
            }
        }

        if pruned > 0 {
            trace!(?sub, pruned, "pruned stale links");
        }
        pruned
    }

    /// Walk the subscribers of `dep`, marking computeds dirty (and walking
    /// their own subscribers in turn) and collecting effects to trigger.
    ///
    /// `active` is the subscriber currently running, which is never
    /// re-notified of its own writes unless it allows recursion.
    pub fn propagate(&mut self, dep: DepId, active: Option<SubscriberId>, out: &mut Propagation) {
        let mut stack: SmallVec<[DepId; 8]> = smallvec![dep];

        while let Some(dep) = stack.pop() {
            let mut cur = self.deps.get(dep).and_then(|d| d.subs_head);
            while let Some(link) = cur {
                let (next, sub) = {
                    let l = &self.links[link];
                    (l.next_sub, l.sub)
                };
                cur = next;

                let Some(node) = self.subs.get_mut(sub) else {
                    continue;
                };
                match node.kind {
                    NodeKind::Computed => {
                        if active == Some(sub) {
                            continue;
                        }
                        node.flags.insert(Flags::DIRTY);
                        if !node.flags.contains(Flags::NOTIFIED) {
                            node.flags.insert(Flags::NOTIFIED);
                            out.computeds.push(sub);
                            if let Some(own) = node.dep {
                                stack.push(own);
                            }
                        }
                    }
                    NodeKind::Effect => {
                        if node.flags.contains(Flags::RUNNING)
                            && !node.flags.contains(Flags::ALLOW_RECURSE)
                        {
                            continue;
                        }
                        if !node.flags.contains(Flags::NOTIFIED) {
                            node.flags.insert(Flags::NOTIFIED);
                            out.effects.push(sub);
                        }
                    }
                }
            }
        }
    }

    /// Subscribers of `dep`, in subscription order.
    pub fn subscribers_of(&self, dep: DepId) -> Vec<SubscriberId> {
        let mut out = Vec::new();
        let mut cur = self.deps.get(dep).and_then(|d| d.subs_head);
        while let Some(link) = cur {
            let l = &self.links[link];
            out.push(l.sub);
            cur = l.next_sub;
        }
        out
    }

    /// Deps of `sub`, in list order.
    pub fn deps_of(&self, sub: SubscriberId) -> Vec<DepId> {
        let mut out = Vec::new();
        let mut cur = self.subs.get(sub).and_then(|s| s.deps_head);
        while let Some(link) = cur {
            let l = &self.links[link];
            out.push(l.dep);
            cur = l.next_dep;
        }
        out
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            deps: self.deps.len(),
            subscribers: self.subs.len(),
            links: self.links.len(),
        }
    }

    fn move_to_tail(&mut self, link: LinkId) {
        let sub = self.links[link].sub;
        if self.subs[sub].deps_tail == Some(link) {
            return;
        }
        self.unlink_from_sub(link);
        self.append_to_sub(link);
    }

    fn append_to_sub(&mut self, link: LinkId) {
        let sub = self.links[link].sub;
        let tail = self.subs[sub].deps_tail;

        {
            let l = &mut self.links[link];
            l.prev_dep = tail;
            l.next_dep = None;
        }
        match tail {
            Some(tail) => self.links[tail].next_dep = Some(link),
            None => self.subs[sub].deps_head = Some(link),
        }
        self.subs[sub].deps_tail = Some(link);
    }

    fn append_to_dep(&mut self, link: LinkId) {
        let dep = self.links[link].dep;
        let tail = self.deps[dep].subs_tail;

        {
            let l = &mut self.links[link];
            l.prev_sub = tail;
            l.next_sub = None;
        }
        match tail {
            Some(tail) => self.links[tail].next_sub = Some(link),
            None => self.deps[dep].subs_head = Some(link),
        }
        let dep_node = &mut self.deps[dep];
        dep_node.subs_tail = Some(link);
        dep_node.sub_count += 1;
    }

    fn unlink_from_sub(&mut self, link: LinkId) {
        let (sub, prev, next) = {
            let l = &mut self.links[link];
            (l.sub, l.prev_dep.take(), l.next_dep.take())
        };
        match prev {
            Some(prev) => self.links[prev].next_dep = next,
            None => {
                if let Some(node) = self.subs.get_mut(sub) {
                    node.deps_head = next;
                }
            }
        }
        match next {
            Some(next) => self.links[next].prev_dep = prev,
            None => {
                if let Some(node) = self.subs.get_mut(sub) {
                    node.deps_tail = prev;
                }
            }
        }
    }

    fn unlink_from_dep(&mut self, link: LinkId) {
        let (dep, prev, next) = {
            let l = &mut self.links[link];
            (l.dep, l.prev_sub.take(), l.next_sub.take())
        };
        match prev {
            Some(prev) => self.links[prev].next_sub = next,
            None => {
                if let Some(node) = self.deps.get_mut(dep) {
                    node.subs_head = next;
                }
            }
        }
        match next {
            Some(next) => self.links[next].prev_sub = prev,
            None => {
                if let Some(node) = self.deps.get_mut(dep) {
                    node.subs_tail = prev;
                }
            }
        }
        if let Some(node) = self.deps.get_mut(dep) {
            node.sub_count -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(graph: &mut Graph, sub: SubscriberId, reads: &[DepId]) {
        graph.prepare(sub);
        for &dep in reads {
            graph.track(dep, sub);
        }
        graph.cleanup(sub);
    }

    #[test]
    fn add_and_remove_nodes() {
        let mut graph = Graph::new();

        let dep = graph.add_dep();
        let effect = graph.add_subscriber(NodeKind::Effect);
        let computed = graph.add_subscriber(NodeKind::Computed);

        // The computed brings its own output dep.
        assert_eq!(graph.stats(), GraphStats { deps: 2, subscribers: 2, links: 0 });

        run(&mut graph, effect, &[dep]);
        assert_eq!(graph.stats().links, 1);

        graph.remove_subscriber(computed);
        graph.remove_dep(dep);
        assert_eq!(graph.stats(), GraphStats { deps: 0, subscribers: 1, links: 0 });
        assert!(graph.deps_of(effect).is_empty());
    }

    #[test]
    fn track_links_both_sides() {
        let mut graph = Graph::new();
        let a = graph.add_dep();
        let b = graph.add_dep();
        let sub = graph.add_subscriber(NodeKind::Effect);

        run(&mut graph, sub, &[a, b]);

        assert_eq!(graph.deps_of(sub), vec![a, b]);
        assert_eq!(graph.subscribers_of(a), vec![sub]);
        assert_eq!(graph.subscribers_of(b), vec![sub]);
        assert_eq!(graph.dep(a).unwrap().subscriber_count(), 1);
    }

    #[test]
    fn repeated_reads_share_one_link() {
        let mut graph = Graph::new();
        let a = graph.add_dep();
        let b = graph.add_dep();
        let sub = graph.add_subscriber(NodeKind::Effect);

        run(&mut graph, sub, &[a, a, b, a, b]);

        assert_eq!(graph.stats().links, 2);
        assert_eq!(graph.deps_of(sub), vec![a, b]);
    }

    #[test]
    fn cleanup_prunes_unread_links() {
        let mut graph = Graph::new();
        let a = graph.add_dep();
        let b = graph.add_dep();
        let sub = graph.add_subscriber(NodeKind::Effect);

        run(&mut graph, sub, &[a]);
        assert_eq!(graph.deps_of(sub), vec![a]);

        run(&mut graph, sub, &[b]);
        assert_eq!(graph.deps_of(sub), vec![b]);
        assert!(graph.subscribers_of(a).is_empty());
        assert_eq!(graph.dep(a).unwrap().subscriber_count(), 0);
        assert_eq!(graph.stats().links, 1);
    }

    #[test]
    fn reused_links_follow_read_order() {
        let mut graph = Graph::new();
        let a = graph.add_dep();
        let b = graph.add_dep();
        let c = graph.add_dep();
        let sub = graph.add_subscriber(NodeKind::Effect);

        run(&mut graph, sub, &[a, b, c]);
        run(&mut graph, sub, &[c, a]);

        assert_eq!(graph.deps_of(sub), vec![c, a]);
        assert_eq!(graph.stats().links, 2);
    }

    #[test]
    fn nested_runs_keep_outer_links() {
        let mut graph = Graph::new();
        let a = graph.add_dep();
        let outer = graph.add_subscriber(NodeKind::Effect);
        let inner = graph.add_subscriber(NodeKind::Effect);

        run(&mut graph, outer, &[a]);

        graph.prepare(outer);
        graph.track(a, outer);
        run(&mut graph, inner, &[a]);
        // Re-reading after the nested run must reuse the outer link.
        graph.track(a, outer);
        graph.cleanup(outer);

        assert_eq!(graph.deps_of(outer), vec![a]);
        assert_eq!(graph.subscribers_of(a), vec![outer, inner]);
        assert_eq!(graph.stats().links, 2);
        assert!(graph.dep(a).unwrap().active_link.is_none());
    }

    #[test]
    fn computed_does_not_track_itself() {
        let mut graph = Graph::new();
        let computed = graph.add_subscriber(NodeKind::Computed);
        let own = graph.sub(computed).unwrap().dep.unwrap();

        graph.prepare(computed);
        assert!(graph.track(own, computed).is_none());
        graph.cleanup(computed);
        assert_eq!(graph.stats().links, 0);
    }

    #[test]
    fn propagate_walks_computed_chains() {
        let mut graph = Graph::new();
        let source = graph.add_dep();
        let c1 = graph.add_subscriber(NodeKind::Computed);
        let c2 = graph.add_subscriber(NodeKind::Computed);
        let effect = graph.add_subscriber(NodeKind::Effect);

        let c1_dep = graph.sub(c1).unwrap().dep.unwrap();
        let c2_dep = graph.sub(c2).unwrap().dep.unwrap();
        run(&mut graph, c1, &[source]);
        run(&mut graph, c2, &[c1_dep]);
        run(&mut graph, effect, &[c2_dep, source]);
        graph.sub_mut(c1).unwrap().flags.remove(Flags::DIRTY);
        graph.sub_mut(c2).unwrap().flags.remove(Flags::DIRTY);

        let mut out = Propagation::default();
        graph.propagate(source, None, &mut out);

        // Reached twice (through c2 and directly) but collected once.
        assert_eq!(out.effects, vec![effect]);
        assert_eq!(out.computeds.len(), 2);
        assert!(graph.sub(c1).unwrap().flags().contains(Flags::DIRTY));
        assert!(graph.sub(c2).unwrap().flags().contains(Flags::DIRTY));
    }

    #[test]
    fn propagate_skips_running_effects() {
        let mut graph = Graph::new();
        let dep = graph.add_dep();
        let effect = graph.add_subscriber(NodeKind::Effect);
        run(&mut graph, effect, &[dep]);

        graph.sub_mut(effect).unwrap().flags.insert(Flags::RUNNING);
        let mut out = Propagation::default();
        graph.propagate(dep, Some(effect), &mut out);
        assert!(out.is_empty());

        graph.sub_mut(effect).unwrap().flags.insert(Flags::ALLOW_RECURSE);
        graph.propagate(dep, Some(effect), &mut out);
        assert_eq!(out.effects, vec![effect]);
    }

    #[test]
    fn clear_deps_restores_active_links() {
        let mut graph = Graph::new();
        let a = graph.add_dep();
        let sub = graph.add_subscriber(NodeKind::Effect);
        run(&mut graph, sub, &[a]);

        graph.prepare(sub);
        graph.clear_deps(sub);

        assert!(graph.dep(a).unwrap().active_link.is_none());
        assert_eq!(graph.stats().links, 0);
        assert!(graph.deps_of(sub).is_empty());
    }
}
