//! Props and children diffing.
//!
//! Keyed children are reconciled in five steps:
//!
//! 1. patch the common prefix;
//! 2. patch the common suffix;
//! 3. if only new nodes remain, mount them;
//! 4. if only old nodes remain, unmount them;
//! 5. otherwise map the remaining new keys to their positions, patch or
//!    unmount every remaining old node, then walk the new nodes backwards
//!    moving or mounting them. Nodes on the longest increasing subsequence of
//!    old positions stay where they are, so the number of moves is minimal.

use std::collections::HashMap;

use tracing::{instrument, trace};

use super::host::HostId;
use super::renderer::Renderer;
use super::vnode::{Key, Props, VNode};

impl Renderer {
    pub(crate) fn patch_props(&self, el: HostId, old: &Props, new: &Props) {
        let mut host = self.host_mut();
        for (key, value) in new {
            if old.get(key) != Some(value) {
                host.set_prop(el, key, value);
            }
        }
        for key in old.keys() {
            if !new.contains_key(key) {
                host.remove_prop(el, key);
            }
        }
    }

    /// Patch a child list. Keyed reconciliation is used as soon as either
    /// side carries a key.
    pub(crate) fn patch_children(&self, old: Vec<VNode>, new: &mut [VNode], container: HostId, anchor: Option<HostId>) {
        let keyed = new.iter().chain(&old).any(|child| child.key.is_some());
        if keyed {
            self.patch_keyed_children(old, new, container, anchor);
        } else {
            self.patch_unkeyed_children(old, new, container, anchor);
        }
    }

    /// Patch by position, then mount or unmount the tail.
    fn patch_unkeyed_children(&self, old: Vec<VNode>, new: &mut [VNode], container: HostId, anchor: Option<HostId>) {
        let mut old = old.into_iter();
        for child in new.iter_mut() {
            self.patch(old.next(), child, container, anchor);
        }
        for rest in old {
            self.unmount(rest, true);
        }
    }

    #[instrument(skip_all, fields(old = old.len(), new = new.len()))]
    fn patch_keyed_children(&self, old: Vec<VNode>, new: &mut [VNode], container: HostId, anchor: Option<HostId>) {
        let mut old: Vec<Option<VNode>> = old.into_iter().map(Some).collect();
        let mut i = 0;
        let mut old_end = old.len();
        let mut new_end = new.len();

        // 1. Common prefix.
        while i < old_end && i < new_end && matches!(&old[i], Some(o) if o.same_type(&new[i])) {
            self.patch(old[i].take(), &mut new[i], container, None);
            i += 1;
        }

        // 2. Common suffix.
        while i < old_end && i < new_end && matches!(&old[old_end - 1], Some(o) if o.same_type(&new[new_end - 1])) {
            self.patch(old[old_end - 1].take(), &mut new[new_end - 1], container, None);
            old_end -= 1;
            new_end -= 1;
        }

        // 3. Only additions left.
        if i >= old_end {
            let anchor = self.anchor_after(new, new_end, anchor);
            for child in &mut new[i..new_end] {
                self.patch(None, child, container, anchor);
            }
            return;
        }

        // 4. Only removals left.
        if i >= new_end {
            for child in old[i..old_end].iter_mut().filter_map(Option::take) {
                self.unmount(child, true);
            }
            return;
        }

        // 5. Unknown sequence.
        let (old_start, new_start) = (i, i);
        let key_to_new: HashMap<Key, usize> = (new_start..new_end)
            .filter_map(|j| new[j].key.clone().map(|key| (key, j)))
            .collect();

        let to_patch = new_end - new_start;
        // Old position + 1 for every remaining new node, 0 if it is new.
        let mut new_to_old = vec![0usize; to_patch];
        let mut patched = 0;
        let mut moved = false;
        let mut max_new_so_far = 0;

        for old_index in old_start..old_end {
            let Some(prev) = old[old_index].take() else {
                continue;
            };
            if patched >= to_patch {
                self.unmount(prev, true);
                continue;
            }

            let found = match &prev.key {
                Some(key) => key_to_new.get(key).copied(),
                None => (new_start..new_end)
                    .find(|&j| new_to_old[j - new_start] == 0 && new[j].key.is_none() && prev.same_type(&new[j])),
            };
            let Some(new_index) = found else {
                self.unmount(prev, true);
                continue;
            };

            new_to_old[new_index - new_start] = old_index + 1;
            if new_index >= max_new_so_far {
                max_new_so_far = new_index;
            } else {
                moved = true;
            }
            self.patch(Some(prev), &mut new[new_index], container, None);
            patched += 1;
        }

        let stable = if moved { get_sequence(&new_to_old) } else { Vec::new() };
        let mut stable = stable.iter().rev().peekable();
        let mut moves = 0usize;

        for offset in (0..to_patch).rev() {
            let index = new_start + offset;
            let before = self.anchor_after(new, index + 1, anchor);
            if new_to_old[offset] == 0 {
                self.patch(None, &mut new[index], container, before);
            } else if moved {
                if stable.peek() == Some(&&offset) {
                    stable.next();
                } else {
                    self.move_vnode(&new[index], container, before);
                    moves += 1;
                }
            }
        }
        trace!(patched, moves, "keyed children reconciled");
    }

    /// The host node to insert before so a node lands right before
    /// `new[index]`, or `fallback` past the end of the list.
    fn anchor_after(&self, new: &[VNode], index: usize, fallback: Option<HostId>) -> Option<HostId> {
        new.get(index).map_or(fallback, |vnode| self.first_host_node(vnode))
    }
}

/// Indices of a longest strictly increasing subsequence of `values`,
/// ignoring zeros.
///
/// ```rust
/// use ripple_core::render::get_sequence;
///
/// assert_eq!(get_sequence(&[2, 3, 1, 5, 6, 8, 7, 9, 4]), vec![0, 1, 3, 4, 6, 7]);
/// ```
pub fn get_sequence(values: &[usize]) -> Vec<usize> {
    let mut predecessors = vec![0usize; values.len()];
    // result[k]: index of the smallest tail of an increasing run of length k + 1.
    let mut result: Vec<usize> = Vec::new();

    for (i, &value) in values.iter().enumerate() {
        if value == 0 {
            continue;
        }
        match result.last() {
            Some(&last) if values[last] >= value => {
                let pos = result.partition_point(|&r| values[r] < value);
                if value < values[result[pos]] {
                    if pos > 0 {
                        predecessors[i] = result[pos - 1];
                    }
                    result[pos] = i;
                }
            }
            Some(&last) => {
                predecessors[i] = last;
                result.push(i);
            }
            None => result.push(i),
        }
    }

    let mut sequence = vec![0usize; result.len()];
    if let Some(&last) = result.last() {
        let mut v = last;
        for slot in sequence.iter_mut().rev() {
            *slot = v;
            v = predecessors[v];
        }
    }
    sequence
}

// ---- Tests ----

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::host::HostOp;
    use crate::render::vnode::{h, text};
    use serde_json::Value;

    #[test]
    fn sequence_skips_new_nodes() {
        assert_eq!(get_sequence(&[3, 0, 1, 2]), vec![2, 3]);
        assert_eq!(get_sequence(&[5, 4, 3]), vec![2]);
        assert!(get_sequence(&[]).is_empty());
        assert!(get_sequence(&[0, 0]).is_empty());
    }

    fn list(keys: &[&str]) -> VNode {
        h(
            "ul",
            Vec::<(String, Value)>::new(),
            keys.iter()
                .map(|k| h("li", Vec::<(String, Value)>::new(), vec![text(*k)]).with_key(*k))
                .collect(),
        )
    }

    fn html(keys: &[&str]) -> String {
        let items: String = keys.iter().map(|k| format!("<li>{k}</li>")).collect();
        format!("<ul>{items}</ul>")
    }

    fn inserts(ops: &[HostOp]) -> usize {
        ops.iter().filter(|op| **op == HostOp::Insert).count()
    }

    fn creates(ops: &[HostOp]) -> usize {
        ops.iter()
            .filter(|op| matches!(op, HostOp::CreateElement { .. }))
            .count()
    }

    fn rerender(from: &[&str], to: &[&str]) -> Vec<HostOp> {
        let renderer = Renderer::new();
        renderer.render(Some(list(from)));
        assert_eq!(renderer.html(), html(from));
        renderer.take_ops();

        renderer.render(Some(list(to)));
        assert_eq!(renderer.html(), html(to));
        renderer.take_ops()
    }

    #[test]
    fn keyed_append_and_prepend() {
        let ops = rerender(&["a", "b"], &["a", "b", "c"]);
        assert_eq!(creates(&ops), 1);

        let ops = rerender(&["b", "c"], &["a", "b", "c"]);
        assert_eq!(creates(&ops), 1);
    }

    #[test]
    fn keyed_removal_reuses_the_rest() {
        let ops = rerender(&["a", "b", "c", "d"], &["a", "d"]);
        assert_eq!(creates(&ops), 0);
        assert_eq!(inserts(&ops), 0);
        assert_eq!(ops.iter().filter(|op| **op == HostOp::Remove).count(), 2);
    }

    #[test]
    fn keyed_swap_moves_minimally() {
        // Only "e" and "b" leave the increasing run c-d.
        let ops = rerender(&["a", "b", "c", "d", "e", "f"], &["a", "e", "c", "d", "b", "f"]);
        assert_eq!(creates(&ops), 0);
        assert_eq!(inserts(&ops), 2);
    }

    #[test]
    fn keyed_reverse() {
        let ops = rerender(&["a", "b", "c", "d"], &["d", "c", "b", "a"]);
        assert_eq!(creates(&ops), 0);
        assert_eq!(inserts(&ops), 3);
    }

    #[test]
    fn keyed_mixed_insert_remove_move() {
        let ops = rerender(&["a", "b", "c", "d", "e"], &["a", "x", "d", "b", "e"]);
        assert_eq!(creates(&ops), 1);
        // One move for "d", plus the new item and its text.
        assert_eq!(inserts(&ops), 3);
    }

    #[test]
    fn unkeyed_children_patch_by_position() {
        let renderer = Renderer::new();
        let node = |items: &[&str]| {
            h(
                "p",
                Vec::<(String, Value)>::new(),
                items.iter().map(|t| text(*t)).collect(),
            )
        };
        renderer.render(Some(node(&["a", "b", "c"])));
        renderer.take_ops();

        renderer.render(Some(node(&["a", "x"])));
        assert_eq!(renderer.html(), "<p>ax</p>");
        assert_eq!(
            renderer.take_ops(),
            vec![HostOp::SetText { text: "x".into() }, HostOp::Remove]
        );
    }
}
