//! The renderer: mounts, patches and unmounts vnode trees against a
//! [`HostTree`].

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::rc::Rc;

use tracing::{debug, instrument};

use super::component::ComponentInstance;
use super::host::{HostId, HostOp, HostTree};
use super::vnode::{VNode, VNodeKind};

pub(crate) struct RendererInner {
    host: RefCell<HostTree>,
    container: HostId,
    pub(super) root: RefCell<Option<VNode>>,
    next_uid: Cell<u32>,
}

/// Renders vnode trees into an in-memory host tree.
///
/// ```rust
/// use ripple_core::render::{h, text, Renderer};
/// use serde_json::json;
///
/// let renderer = Renderer::new();
/// renderer.render(Some(h("p", [("id", json!("greeting"))], vec![text("hi")])));
/// assert_eq!(renderer.html(), r#"<p id="greeting">hi</p>"#);
/// ```
#[derive(Clone)]
pub struct Renderer(pub(super) Rc<RendererInner>);

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer {
    /// Create a renderer with an empty `root` container element.
    pub fn new() -> Self {
        let mut host = HostTree::new();
        let container = host.create_element("root");
        host.take_ops();
        Self(Rc::new(RendererInner {
            host: RefCell::new(host),
            container,
            root: RefCell::new(None),
            next_uid: Cell::new(0),
        }))
    }

    /// Render `vnode` into the container, patching whatever was rendered
    /// before. `None` unmounts everything.
    #[instrument(skip_all)]
    pub fn render(&self, vnode: Option<VNode>) {
        let prev = self.0.root.borrow_mut().take();
        match (prev, vnode) {
            (Some(prev), None) => self.unmount(prev, true),
            (prev, Some(mut next)) => {
                self.patch(prev, &mut next, self.0.container, None);
                *self.0.root.borrow_mut() = Some(next);
            }
            (None, None) => {}
        }
    }

    /// The instance mounted at the root, if the root vnode is a component.
    pub fn root_component(&self) -> Option<Rc<ComponentInstance>> {
        self.0.root.borrow().as_ref().and_then(|vnode| vnode.instance.clone())
    }

    pub fn container(&self) -> HostId {
        self.0.container
    }

    pub fn host(&self) -> Ref<'_, HostTree> {
        self.0.host.borrow()
    }

    pub(crate) fn host_mut(&self) -> RefMut<'_, HostTree> {
        self.0.host.borrow_mut()
    }

    /// Markup of the container's children.
    pub fn html(&self) -> String {
        self.host().inner_html(self.0.container)
    }

    /// Drain the host operation log.
    pub fn take_ops(&self) -> Vec<HostOp> {
        self.host_mut().take_ops()
    }

    pub(crate) fn next_uid(&self) -> u32 {
        let uid = self.0.next_uid.get();
        self.0.next_uid.set(uid + 1);
        uid
    }

    /// Patch `old` into `new`, or mount `new` when there is no `old`. A node
    /// of a different type is unmounted and replaced in place.
    pub(crate) fn patch(&self, old: Option<VNode>, new: &mut VNode, container: HostId, anchor: Option<HostId>) {
        let mut anchor = anchor;
        let old = match old {
            Some(old) if !old.same_type(new) => {
                anchor = self.next_host_node(&old);
                self.unmount(old, true);
                None
            }
            other => other,
        };

        let Some(old) = old else {
            match new.kind {
                VNodeKind::Text(_) => self.mount_text(new, container, anchor),
                VNodeKind::Element { .. } => self.mount_element(new, container, anchor),
                VNodeKind::Fragment(_) => self.mount_fragment(new, container, anchor),
                VNodeKind::Component { .. } => self.mount_component(new, container, anchor),
            }
            return;
        };
        match new.kind {
            VNodeKind::Text(_) => self.patch_text(old, new),
            VNodeKind::Element { .. } => self.patch_element(old, new),
            VNodeKind::Fragment(_) => self.patch_fragment(old, new, container),
            VNodeKind::Component { .. } => self.update_component(old, new),
        }
    }

    fn mount_text(&self, vnode: &mut VNode, container: HostId, anchor: Option<HostId>) {
        let VNode { kind: VNodeKind::Text(text), el, .. } = vnode else {
            return;
        };
        let mut host = self.host_mut();
        let id = host.create_text(text);
        host.insert(id, container, anchor);
        *el = Some(id);
    }

    fn patch_text(&self, old: VNode, new: &mut VNode) {
        let VNode { kind: VNodeKind::Text(text), el, .. } = new else {
            return;
        };
        *el = old.el;
        if let (VNodeKind::Text(prev), Some(id)) = (&old.kind, old.el) {
            if prev != text {
                self.host_mut().set_text(id, text);
            }
        }
    }

    fn mount_element(&self, vnode: &mut VNode, container: HostId, anchor: Option<HostId>) {
        let VNode {
            kind: VNodeKind::Element { tag, props, children },
            el,
            ..
        } = vnode
        else {
            return;
        };

        let id = {
            let mut host = self.host_mut();
            let id = host.create_element(tag);
            for (key, value) in props.iter() {
                host.set_prop(id, key, value);
            }
            id
        };
        for child in children.iter_mut() {
            self.patch(None, child, id, None);
        }
        self.host_mut().insert(id, container, anchor);
        *el = Some(id);
    }

    fn patch_element(&self, old: VNode, new: &mut VNode) {
        let VNode {
            kind: VNodeKind::Element {
                props: old_props,
                children: old_children,
                ..
            },
            el: Some(id),
            ..
        } = old
        else {
            return;
        };
        let VNode {
            kind: VNodeKind::Element { props, children, .. },
            el,
            ..
        } = new
        else {
            return;
        };

        *el = Some(id);
        self.patch_props(id, &old_props, props);
        self.patch_children(old_children, children, id, None);
    }

    fn mount_fragment(&self, vnode: &mut VNode, container: HostId, anchor: Option<HostId>) {
        let VNode {
            kind: VNodeKind::Fragment(children),
            el,
            anchor: end,
            ..
        } = vnode
        else {
            return;
        };

        let (start_id, end_id) = {
            let mut host = self.host_mut();
            let start_id = host.create_text("");
            let end_id = host.create_text("");
            host.insert(start_id, container, anchor);
            host.insert(end_id, container, anchor);
            (start_id, end_id)
        };
        for child in children.iter_mut() {
            self.patch(None, child, container, Some(end_id));
        }
        *el = Some(start_id);
        *end = Some(end_id);
    }

    fn patch_fragment(&self, old: VNode, new: &mut VNode, container: HostId) {
        let VNode {
            kind: VNodeKind::Fragment(old_children),
            el: old_el,
            anchor: old_end,
            ..
        } = old
        else {
            return;
        };
        let VNode {
            kind: VNodeKind::Fragment(children),
            el,
            anchor: end,
            ..
        } = new
        else {
            return;
        };

        *el = old_el;
        *end = old_end;
        self.patch_children(old_children, children, container, old_end);
    }

    /// Tear down `vnode`. With `remove`, its host nodes are also removed;
    /// without, only components below it are unmounted (the caller removes
    /// an ancestor host node).
    pub(crate) fn unmount(&self, vnode: VNode, remove: bool) {
        if let Some(instance) = vnode.instance {
            self.unmount_component(instance, remove);
            return;
        }
        match vnode.kind {
            VNodeKind::Text(_) => {
                if let (true, Some(id)) = (remove, vnode.el) {
                    self.host_mut().remove(id);
                }
            }
            VNodeKind::Element { children, .. } => {
                for child in children {
                    self.unmount(child, false);
                }
                if let (true, Some(id)) = (remove, vnode.el) {
                    self.host_mut().remove(id);
                }
            }
            VNodeKind::Fragment(children) => {
                for child in children {
                    self.unmount(child, remove);
                }
                if remove {
                    let mut host = self.host_mut();
                    for id in [vnode.el, vnode.anchor].into_iter().flatten() {
                        host.remove(id);
                    }
                }
            }
            VNodeKind::Component { .. } => {}
        }
    }

    /// Move the host nodes of a mounted vnode before `anchor`.
    pub(crate) fn move_vnode(&self, vnode: &VNode, container: HostId, anchor: Option<HostId>) {
        if let Some(instance) = &vnode.instance {
            if let Some(subtree) = instance.subtree.borrow().as_ref() {
                self.move_vnode(subtree, container, anchor);
            }
            return;
        }
        match &vnode.kind {
            VNodeKind::Fragment(children) => {
                if let Some(start) = vnode.el {
                    self.host_mut().insert(start, container, anchor);
                }
                for child in children {
                    self.move_vnode(child, container, anchor);
                }
                if let Some(end) = vnode.anchor {
                    self.host_mut().insert(end, container, anchor);
                }
            }
            _ => {
                if let Some(id) = vnode.el {
                    self.host_mut().insert(id, container, anchor);
                }
            }
        }
    }

    /// The first host node `vnode` rendered. Components are resolved through
    /// their current subtree, since their root may have been replaced.
    pub(crate) fn first_host_node(&self, vnode: &VNode) -> Option<HostId> {
        if let Some(instance) = &vnode.instance {
            return instance
                .subtree
                .borrow()
                .as_ref()
                .and_then(|subtree| self.first_host_node(subtree));
        }
        vnode.el
    }

    /// The host node right after everything `vnode` rendered.
    pub(crate) fn next_host_node(&self, vnode: &VNode) -> Option<HostId> {
        if let Some(instance) = &vnode.instance {
            return instance
                .subtree
                .borrow()
                .as_ref()
                .and_then(|subtree| self.next_host_node(subtree));
        }
        let last = match vnode.kind {
            VNodeKind::Fragment(_) => vnode.anchor,
            _ => vnode.el,
        }?;
        self.host().next_sibling(last)
    }
}

impl Drop for RendererInner {
    fn drop(&mut self) {
        if let Some(root) = self.root.get_mut().take() {
            debug!("renderer dropped with a mounted tree");
            stop_components(&root);
        }
    }
}

/// Stop the scope of every component instance in `vnode`.
fn stop_components(vnode: &VNode) {
    if let Some(instance) = &vnode.instance {
        instance.scope().stop();
        if let Some(subtree) = instance.subtree.borrow().as_ref() {
            stop_components(subtree);
        }
        return;
    }
    match &vnode.kind {
        VNodeKind::Element { children, .. } | VNodeKind::Fragment(children) => {
            children.iter().for_each(stop_components);
        }
        VNodeKind::Text(_) | VNodeKind::Component { .. } => {}
    }
}

// ---- Tests ----
