//! Components
//!
//! A component is a setup function that runs once per instance and returns
//! the instance's render function. Each instance owns:
//!
//! - a detached [`EffectScope`] collecting everything its setup creates;
//! - its props as a [`Reactive`] object, updated in place by the parent;
//! - a render effect whose scheduler queues the instance's update [`Job`],
//!   with the instance's creation-order uid as job id, so parents re-render
//!   before children and bursts of writes cause one re-render.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use super::renderer::{Renderer, RendererInner};
use super::vnode::{VNode, VNodeKind};
use crate::reactive::{untracked, Effect, EffectOptions, EffectScope, Reactive, ScopeContext};
use crate::render::host::HostId;
use crate::scheduler::{invalidate_job, queue_job, Job};

/// A render function: turns the instance state into a tree.
pub type RenderFn = Box<dyn Fn() -> VNode>;

struct ComponentDef {
    name: String,
    setup: Box<dyn Fn(&Reactive) -> RenderFn>,
}

/// A component definition. Cloning is cheap and keeps identity, which is
/// what the renderer compares to decide between patching and replacing.
///
/// ```rust
/// use ripple_core::render::{text, Component};
///
/// let hello = Component::new("Hello", |props| {
///     let props = props.clone();
///     Box::new(move || {
///         let name = props.get("name").and_then(|v| v.as_str().map(str::to_owned));
///         text(format!("Hello, {}!", name.unwrap_or_default()))
///     })
/// });
/// assert_eq!(hello.name(), "Hello");
/// ```
#[derive(Clone)]
pub struct Component(Rc<ComponentDef>);

impl Component {
    pub fn new<F>(name: impl Into<String>, setup: F) -> Self
    where
        F: Fn(&Reactive) -> RenderFn + 'static,
    {
        Self(Rc::new(ComponentDef {
            name: name.into(),
            setup: Box::new(setup),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Component").field(&self.0.name).finish()
    }
}

/// A mounted component.
pub struct ComponentInstance {
    uid: u32,
    name: String,
    props: Reactive,
    scope: EffectScope,
    render: RenderFn,
    pub(crate) subtree: RefCell<Option<VNode>>,
    /// Where the first render mounts.
    mount_target: Cell<Option<(HostId, Option<HostId>)>>,
    effect: RefCell<Option<Effect>>,
    job: RefCell<Option<Job>>,
    render_count: Cell<usize>,
}

impl ComponentInstance {
    /// Creation-order id, also the id of the update job.
    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn props(&self) -> &Reactive {
        &self.props
    }

    pub fn scope(&self) -> &EffectScope {
        &self.scope
    }

    /// How many times the render function ran.
    pub fn render_count(&self) -> usize {
        self.render_count.get()
    }

    pub fn is_mounted(&self) -> bool {
        self.subtree.borrow().is_some()
    }

    /// Re-render now if something the last render read has changed.
    pub fn update(&self) {
        let effect = self.effect.borrow().clone();
        if let Some(effect) = effect.filter(Effect::is_active) {
            effect.run_if_dirty();
        }
    }

    fn job(&self) -> Option<Job> {
        self.job.borrow().clone()
    }

    /// Bring the props in line with `next`. Writes of equal values do not
    /// trigger.
    fn update_props(&self, next: &Map<String, Value>) {
        untracked(|| {
            for (key, value) in next {
                if let Err(err) = self.props.set(key, value.clone()) {
                    warn!(component = %self.name, %key, error = %err, "failed to update prop");
                }
            }
            for key in self.props.keys() {
                if !next.contains_key(&key) {
                    if let Err(err) = self.props.delete(&key) {
                        warn!(component = %self.name, %key, error = %err, "failed to remove prop");
                    }
                }
            }
        });
    }
}

impl fmt::Debug for ComponentInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentInstance")
            .field("uid", &self.uid)
            .field("name", &self.name)
            .field("render_count", &self.render_count.get())
            .finish()
    }
}

impl Renderer {
    #[instrument(skip_all, fields(component = %component_name(vnode)))]
    pub(crate) fn mount_component(&self, vnode: &mut VNode, container: HostId, anchor: Option<HostId>) {
        let VNode {
            kind: VNodeKind::Component { component, props },
            el,
            instance: slot,
            ..
        } = vnode
        else {
            return;
        };

        let uid = self.next_uid();
        let scope = EffectScope::detached();
        let props = Reactive::new(props.clone());
        let render = {
            let _scope = ScopeContext::enter(scope.clone());
            untracked(|| (component.0.setup)(&props))
        };

        let instance = Rc::new(ComponentInstance {
            uid,
            name: component.0.name.clone(),
            props,
            scope: scope.clone(),
            render,
            subtree: RefCell::new(None),
            mount_target: Cell::new(Some((container, anchor))),
            effect: RefCell::new(None),
            job: RefCell::new(None),
            render_count: Cell::new(0),
        });

        let job = Job::with_id(uid, {
            let instance = Rc::downgrade(&instance);
            move || {
                if let Some(instance) = instance.upgrade() {
                    instance.update();
                }
            }
        })
        .allow_recurse();

        let effect = {
            let _scope = ScopeContext::enter(scope);
            let renderer = Rc::downgrade(&self.0);
            let weak = Rc::downgrade(&instance);
            Effect::with_options(
                move || render_instance(&renderer, &weak),
                EffectOptions {
                    scheduler: Some(Rc::new({
                        let job = job.clone();
                        move |_: &Effect| queue_job(job.clone())
                    })),
                    lazy: true,
                    ..EffectOptions::default()
                },
            )
        };
        *instance.job.borrow_mut() = Some(job);
        *instance.effect.borrow_mut() = Some(effect.clone());

        debug!(uid, "mounting component");
        effect.run();
        *el = instance.subtree.borrow().as_ref().and_then(|subtree| self.first_host_node(subtree));
        *slot = Some(instance);
    }

    /// Patch a component vnode: hand the new props to the instance and
    /// re-render it now if they changed anything it reads.
    pub(crate) fn update_component(&self, old: VNode, new: &mut VNode) {
        let Some(instance) = old.instance else {
            return;
        };
        let VNode {
            kind: VNodeKind::Component { props, .. },
            el,
            instance: slot,
            ..
        } = new
        else {
            return;
        };

        instance.update_props(props);
        if let Some(job) = instance.job().filter(Job::is_queued) {
            invalidate_job(&job);
            instance.update();
        }

        *el = instance.subtree.borrow().as_ref().and_then(|subtree| self.first_host_node(subtree));
        *slot = Some(instance);
    }

    pub(crate) fn unmount_component(&self, instance: Rc<ComponentInstance>, remove: bool) {
        debug!(uid = instance.uid, renders = instance.render_count(), "unmounting component");
        instance.scope.stop();
        if let Some(job) = instance.job.borrow_mut().take() {
            job.dispose();
            invalidate_job(&job);
        }
        instance.effect.borrow_mut().take();

        let subtree = instance.subtree.borrow_mut().take();
        if let Some(subtree) = subtree {
            self.unmount(subtree, remove);
        }
    }

    /// One run of a render effect: call the render function (tracked), then
    /// mount or patch the result (untracked).
    fn render_component(&self, instance: &ComponentInstance) {
        let mut next = (instance.render)();
        instance.render_count.set(instance.render_count.get() + 1);

        untracked(|| {
            let prev = instance.subtree.borrow_mut().take();
            match prev {
                None => {
                    let Some((container, anchor)) = instance.mount_target.take() else {
                        return;
                    };
                    self.patch(None, &mut next, container, anchor);
                }
                Some(prev) => {
                    let Some(container) = self.first_host_node(&prev).and_then(|el| self.host().parent(el)) else {
                        return;
                    };
                    let anchor = self.next_host_node(&prev);
                    self.patch(Some(prev), &mut next, container, anchor);
                }
            }
            *instance.subtree.borrow_mut() = Some(next);
        });
    }
}

fn render_instance(renderer: &Weak<RendererInner>, instance: &Weak<ComponentInstance>) {
    if let (Some(renderer), Some(instance)) = (renderer.upgrade(), instance.upgrade()) {
        Renderer(renderer).render_component(&instance);
    }
}

fn component_name(vnode: &VNode) -> &str {
    match &vnode.kind {
        VNodeKind::Component { component, .. } => component.name(),
        _ => "",
    }
}

// ---- Tests ----
