//! Virtual DOM Renderer
//!
//! The consumer of the reactive core. Render functions return [`VNode`]
//! trees; the [`Renderer`] mounts them into a [`HostTree`] and patches the
//! host tree when a new tree comes in.
//!
//! # Components
//!
//! Every component instance gets its own render effect. Reads made by the
//! render function are tracked, and a write to any of them queues the
//! instance's update job on the [scheduler](crate::scheduler) instead of
//! re-rendering on the spot. Several writes before the next flush cause a
//! single re-render, and parents (lower uids) re-render before their
//! children.
//!
//! ```rust
//! use ripple_core::render::{component, h, text, Component, Renderer};
//! use ripple_core::{flush_jobs, Ref};
//! use serde_json::{json, Value};
//!
//! let count = Ref::new(0);
//! let counter = Component::new("Counter", {
//!     let count = count.clone();
//!     move |_| {
//!         let count = count.clone();
//!         Box::new(move || h("span", Vec::<(String, Value)>::new(), vec![text(count.get().to_string())]))
//!     }
//! });
//!
//! let renderer = Renderer::new();
//! renderer.render(Some(component(&counter, json!({}))));
//! assert_eq!(renderer.html(), "<span>0</span>");
//!
//! count.set(1);
//! count.set(2);
//! flush_jobs();
//! assert_eq!(renderer.html(), "<span>2</span>");
//! ```

mod component;
mod diff;
mod host;
mod renderer;
mod vnode;

pub use component::{Component, ComponentInstance, RenderFn};
pub use diff::get_sequence;
pub use host::{HostId, HostOp, HostTree};
pub use renderer::Renderer;
pub use vnode::{component, fragment, h, text, Key, Props, VNode, VNodeKind};
