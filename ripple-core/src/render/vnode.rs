//! Virtual nodes.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use super::component::{Component, ComponentInstance};
use super::host::HostId;

/// Element attributes and properties, in the order they were written.
pub type Props = IndexMap<String, Value>;

/// Identity of a child among its siblings.
pub type Key = String;

pub enum VNodeKind {
    Element {
        tag: String,
        props: Props,
        children: Vec<VNode>,
    },
    Text(String),
    /// Children without a wrapping element, framed by two empty text
    /// anchors in the host tree.
    Fragment(Vec<VNode>),
    Component {
        component: Component,
        props: Map<String, Value>,
    },
}

/// A node of a render function's output.
///
/// The host handles are filled in when the node is mounted, and carried
/// over to the next tree on patch.
pub struct VNode {
    pub kind: VNodeKind,
    pub key: Option<Key>,
    pub(crate) el: Option<HostId>,
    pub(crate) anchor: Option<HostId>,
    pub(crate) instance: Option<Rc<ComponentInstance>>,
}

impl VNode {
    fn from_kind(kind: VNodeKind) -> Self {
        Self {
            kind,
            key: None,
            el: None,
            anchor: None,
            instance: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// The host node backing this vnode once mounted. For a fragment this is
    /// its start anchor, for a component the root of its subtree.
    pub fn el(&self) -> Option<HostId> {
        self.el
    }

    pub fn component_instance(&self) -> Option<&Rc<ComponentInstance>> {
        self.instance.as_ref()
    }

    /// Whether `other` may be patched into this node instead of replacing it.
    pub(crate) fn same_type(&self, other: &VNode) -> bool {
        if self.key != other.key {
            return false;
        }
        match (&self.kind, &other.kind) {
            (VNodeKind::Element { tag: a, .. }, VNodeKind::Element { tag: b, .. }) => a == b,
            (VNodeKind::Text(_), VNodeKind::Text(_)) => true,
            (VNodeKind::Fragment(_), VNodeKind::Fragment(_)) => true,
            (VNodeKind::Component { component: a, .. }, VNodeKind::Component { component: b, .. }) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for VNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("VNode");
        match &self.kind {
            VNodeKind::Element { tag, props, children } => s
                .field("tag", tag)
                .field("props", props)
                .field("children", children),
            VNodeKind::Text(text) => s.field("text", text),
            VNodeKind::Fragment(children) => s.field("fragment", children),
            VNodeKind::Component { component, props } => s.field("component", &component.name()).field("props", props),
        };
        s.field("key", &self.key).finish()
    }
}

/// An element node.
///
/// ```rust
/// use ripple_core::render::{h, text};
/// use serde_json::json;
///
/// let node = h("p", [("class", json!("note"))], vec![text("hello")]);
/// ```
pub fn h<K: Into<String>>(tag: &str, props: impl IntoIterator<Item = (K, Value)>, children: Vec<VNode>) -> VNode {
    VNode::from_kind(VNodeKind::Element {
        tag: tag.to_string(),
        props: props.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        children,
    })
}

pub fn text(text: impl Into<String>) -> VNode {
    VNode::from_kind(VNodeKind::Text(text.into()))
}

pub fn fragment(children: Vec<VNode>) -> VNode {
    VNode::from_kind(VNodeKind::Fragment(children))
}

/// A component node. `props` must be a JSON object; anything else mounts
/// with no props.
pub fn component(component: &Component, props: Value) -> VNode {
    let props = match props {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    VNode::from_kind(VNodeKind::Component {
        component: component.clone(),
        props,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn same_type_compares_tag_and_key() {
        let a = h("li", [("id", json!(1))], vec![]).with_key("a");
        let b = h("li", Vec::<(String, Value)>::new(), vec![]).with_key("a");
        let c = h("li", Vec::<(String, Value)>::new(), vec![]).with_key("c");
        let d = h("p", Vec::<(String, Value)>::new(), vec![]).with_key("a");

        assert!(a.same_type(&b));
        assert!(!a.same_type(&c));
        assert!(!a.same_type(&d));
        assert!(text("x").same_type(&text("y")));
        assert!(!text("x").same_type(&fragment(vec![])));
    }

    #[test]
    fn component_props_must_be_object() {
        let counter = Component::new("Counter", |_| Box::new(|| text("0")));
        let node = component(&counter, json!([1, 2]));
        match node.kind {
            VNodeKind::Component { props, .. } => assert!(props.is_empty()),
            _ => panic!("expected a component node"),
        }
    }
}
