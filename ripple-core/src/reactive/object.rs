//! Reactive Objects
//!
//! [`Reactive`] wraps a JSON object or array and tracks reads per key.
//!
//! # Keys
//!
//! Each target keeps a lazily created dep per key that was read inside a
//! tracking context:
//!
//! - `Prop(name)` for object properties
//! - `Index(i)` for array elements
//! - `Length` for the length of an array
//! - `Iterate` for "the set of keys / elements", read by iteration
//!
//! A write triggers only the deps it affects. Writes that trigger several
//! deps do so inside one batch, so an effect reading more than one of them
//! runs once.
//!
//! # Nesting
//!
//! Nested objects and arrays are wrapped on first access and the wrapper is
//! stored in place, so reading the same nested value twice returns the same
//! proxy.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::Debug;
use std::mem;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::{Map, Value};
use smallvec::SmallVec;

use super::runtime::Runtime;
use crate::error::ReactiveError;
use crate::graph::DepId;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Key {
    Prop(String),
    Index(usize),
    Length,
    Iterate,
}

enum Slot {
    Raw(Value),
    Proxy(Reactive),
}

impl Slot {
    fn to_value(&self) -> Value {
        match self {
            Slot::Raw(value) => value.clone(),
            Slot::Proxy(proxy) => proxy.to_raw(),
        }
    }

    /// Check whether writing `value` over this slot is a no-op.
    fn holds(&self, value: &Value) -> bool {
        match self {
            Slot::Raw(old) if !is_container(old) => old == value,
            _ => false,
        }
    }

    /// The proxy for a nested container, wrapping it on first access.
    fn proxy(&mut self) -> Option<Reactive> {
        match self {
            Slot::Proxy(proxy) => Some(proxy.clone()),
            Slot::Raw(value) if is_container(value) => {
                let proxy = Reactive::from_value(mem::take(value))?;
                *self = Slot::Proxy(proxy.clone());
                Some(proxy)
            }
            Slot::Raw(_) => None,
        }
    }
}

fn is_container(value: &Value) -> bool {
    value.is_object() || value.is_array()
}

enum Data {
    Object(IndexMap<String, Slot>),
    Array(Vec<Slot>),
}

impl Data {
    fn kind(&self) -> &'static str {
        match self {
            Data::Object(_) => "object",
            Data::Array(_) => "array",
        }
    }
}

struct Target {
    data: RefCell<Data>,
    deps: RefCell<HashMap<Key, DepId>>,
}

impl Drop for Target {
    fn drop(&mut self) {
        for dep in self.deps.get_mut().values() {
            Runtime::dispose_dep(*dep);
        }
    }
}

/// A reactive JSON object or array.
///
/// Cloning produces another handle to the same target.
///
/// # Example
///
/// ```rust
/// use ripple_core::{effect, Reactive};
/// use serde_json::json;
///
/// let state = Reactive::from_value(json!({ "count": 0 })).unwrap();
///
/// let e = effect({
///     let state = state.clone();
///     move || println!("count = {:?}", state.get("count"))
/// });
///
/// state.set("count", 1).unwrap(); // Prints "count = Some(Number(1))"
/// e.stop();
/// ```
#[derive(Clone)]
pub struct Reactive(Rc<Target>);

impl Reactive {
    /// Wrap a JSON object.
    pub fn new(object: Map<String, Value>) -> Self {
        Self::from_data(Data::Object(
            object.into_iter().map(|(k, v)| (k, Slot::Raw(v))).collect(),
        ))
    }

    /// Wrap a JSON array.
    pub fn array(items: Vec<Value>) -> Self {
        Self::from_data(Data::Array(items.into_iter().map(Slot::Raw).collect()))
    }

    /// Wrap an object or array. Scalars cannot be made reactive.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(object) => Some(Self::new(object)),
            Value::Array(items) => Some(Self::array(items)),
            _ => None,
        }
    }

    fn from_data(data: Data) -> Self {
        Self(Rc::new(Target {
            data: RefCell::new(data),
            deps: RefCell::new(HashMap::new()),
        }))
    }

    pub fn is_array(&self) -> bool {
        matches!(*self.0.data.borrow(), Data::Array(_))
    }

    fn mismatch(&self, expected: &'static str) -> ReactiveError {
        ReactiveError::KindMismatch {
            expected,
            found: self.0.data.borrow().kind(),
        }
    }

    fn track(&self, key: Key) {
        if !Runtime::is_tracking() {
            return;
        }
        let dep = *self
            .0
            .deps
            .borrow_mut()
            .entry(key)
            .or_insert_with(Runtime::create_dep);
        Runtime::track(dep);
    }

    /// Trigger the deps of every key matching `affected`.
    fn trigger(&self, affected: impl Fn(&Key) -> bool) {
        let deps: SmallVec<[DepId; 4]> = self
            .0
            .deps
            .borrow()
            .iter()
            .filter(|(key, _)| affected(key))
            .map(|(_, dep)| *dep)
            .collect();

        match deps.len() {
            0 => {}
            1 => Runtime::trigger(deps[0]),
            _ => Runtime::batch(|| {
                for dep in deps {
                    Runtime::trigger(dep);
                }
            }),
        }
    }

    // ---- Objects ----

    /// Read a property.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.track(Key::Prop(key.to_owned()));
        match &*self.0.data.borrow() {
            Data::Object(map) => map.get(key).map(Slot::to_value),
            Data::Array(_) => None,
        }
    }

    /// Read a nested object or array property as a reactive proxy.
    ///
    /// Repeated calls return the same proxy.
    pub fn child(&self, key: &str) -> Option<Reactive> {
        self.track(Key::Prop(key.to_owned()));
        match &mut *self.0.data.borrow_mut() {
            Data::Object(map) => map.get_mut(key).and_then(Slot::proxy),
            Data::Array(_) => None,
        }
    }

    /// Check whether a property exists.
    pub fn has(&self, key: &str) -> bool {
        self.track(Key::Prop(key.to_owned()));
        match &*self.0.data.borrow() {
            Data::Object(map) => map.contains_key(key),
            Data::Array(_) => false,
        }
    }

    /// Write a property.
    ///
    /// Writing an equal scalar is a no-op. Adding a property also notifies
    /// iteration.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<(), ReactiveError> {
        let value = value.into();
        let (added, old) = {
            let mut data = self.0.data.borrow_mut();
            let Data::Object(map) = &mut *data else {
                drop(data);
                return Err(self.mismatch("object"));
            };
            match map.get_mut(key) {
                Some(slot) if slot.holds(&value) => return Ok(()),
                Some(slot) => (false, Some(mem::replace(slot, Slot::Raw(value)))),
                None => {
                    map.insert(key.to_owned(), Slot::Raw(value));
                    (true, None)
                }
            }
        };
        drop(old);

        if added {
            self.trigger(|k| matches!(k, Key::Prop(p) if p == key) || *k == Key::Iterate);
        } else {
            self.trigger(|k| matches!(k, Key::Prop(p) if p == key));
        }
        Ok(())
    }

    /// Delete a property. Returns whether it existed.
    pub fn delete(&self, key: &str) -> Result<bool, ReactiveError> {
        let removed = {
            let mut data = self.0.data.borrow_mut();
            let Data::Object(map) = &mut *data else {
                drop(data);
                return Err(self.mismatch("object"));
            };
            map.shift_remove(key)
        };
        let Some(old) = removed else {
            return Ok(false);
        };
        drop(old);

        self.trigger(|k| matches!(k, Key::Prop(p) if p == key) || *k == Key::Iterate);
        Ok(true)
    }

    /// Property names in insertion order (objects) or index strings
    /// (arrays). Tracks iteration.
    pub fn keys(&self) -> Vec<String> {
        self.track(Key::Iterate);
        match &*self.0.data.borrow() {
            Data::Object(map) => map.keys().cloned().collect(),
            Data::Array(items) => (0..items.len()).map(|i| i.to_string()).collect(),
        }
    }

    /// Values in order. Tracks iteration.
    pub fn values(&self) -> Vec<Value> {
        self.track(Key::Iterate);
        match &*self.0.data.borrow() {
            Data::Object(map) => map.values().map(Slot::to_value).collect(),
            Data::Array(items) => items.iter().map(Slot::to_value).collect(),
        }
    }

    /// Number of properties or elements.
    pub fn len(&self) -> usize {
        let is_array = self.is_array();
        self.track(if is_array { Key::Length } else { Key::Iterate });
        match &*self.0.data.borrow() {
            Data::Object(map) => map.len(),
            Data::Array(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ---- Arrays ----

    /// Read an element.
    pub fn index(&self, index: usize) -> Option<Value> {
        self.track(Key::Index(index));
        match &*self.0.data.borrow() {
            Data::Array(items) => items.get(index).map(Slot::to_value),
            Data::Object(_) => None,
        }
    }

    /// Read a nested object or array element as a reactive proxy.
    pub fn child_at(&self, index: usize) -> Option<Reactive> {
        self.track(Key::Index(index));
        match &mut *self.0.data.borrow_mut() {
            Data::Array(items) => items.get_mut(index).and_then(Slot::proxy),
            Data::Object(_) => None,
        }
    }

    /// Write an element. Writing past the end fills the gap with `null` and
    /// grows the array.
    pub fn set_index(&self, index: usize, value: impl Into<Value>) -> Result<(), ReactiveError> {
        let value = value.into();
        let (old_len, old) = {
            let mut data = self.0.data.borrow_mut();
            let Data::Array(items) = &mut *data else {
                drop(data);
                return Err(self.mismatch("array"));
            };
            let old_len = items.len();
            match items.get_mut(index) {
                Some(slot) if slot.holds(&value) => return Ok(()),
                Some(slot) => (old_len, Some(mem::replace(slot, Slot::Raw(value)))),
                None => {
                    items.resize_with(index, || Slot::Raw(Value::Null));
                    items.push(Slot::Raw(value));
                    (old_len, None)
                }
            }
        };
        drop(old);

        if index < old_len {
            self.trigger(|k| *k == Key::Index(index) || *k == Key::Iterate);
        } else {
            self.trigger(|k| match k {
                Key::Index(i) => (old_len..=index).contains(i),
                Key::Length | Key::Iterate => true,
                Key::Prop(_) => false,
            });
        }
        Ok(())
    }

    /// Append an element. Returns the new length.
    pub fn push(&self, value: impl Into<Value>) -> Result<usize, ReactiveError> {
        let len = match &*self.0.data.borrow() {
            Data::Array(items) => items.len(),
            Data::Object(_) => return Err(self.mismatch("array")),
        };
        self.set_index(len, value)?;
        Ok(len + 1)
    }

    /// Remove the last element.
    pub fn pop(&self) -> Result<Option<Value>, ReactiveError> {
        let (index, removed) = {
            let mut data = self.0.data.borrow_mut();
            let Data::Array(items) = &mut *data else {
                drop(data);
                return Err(self.mismatch("array"));
            };
            match items.pop() {
                Some(slot) => (items.len(), slot),
                None => return Ok(None),
            }
        };
        let value = removed.to_value();
        drop(removed);

        self.trigger(|k| matches!(k, Key::Length | Key::Iterate) || *k == Key::Index(index));
        Ok(Some(value))
    }

    /// Truncate or extend (with `null`) the array.
    pub fn set_len(&self, len: usize) -> Result<(), ReactiveError> {
        let (old_len, removed) = {
            let mut data = self.0.data.borrow_mut();
            let Data::Array(items) = &mut *data else {
                drop(data);
                return Err(self.mismatch("array"));
            };
            let old_len = items.len();
            if len == old_len {
                return Ok(());
            }
            let removed = if len < old_len { items.split_off(len) } else { Vec::new() };
            items.resize_with(len, || Slot::Raw(Value::Null));
            (old_len, removed)
        };
        drop(removed);

        let (lo, hi) = (len.min(old_len), len.max(old_len));
        self.trigger(|k| match k {
            Key::Index(i) => (lo..hi).contains(i),
            Key::Length | Key::Iterate => true,
            Key::Prop(_) => false,
        });
        Ok(())
    }

    // ---- Whole target ----

    /// Read every key at every depth, so the current subscriber reacts to
    /// any nested change.
    pub fn traverse(&self) {
        self.track(Key::Iterate);
        if self.is_array() {
            self.track(Key::Length);
        }
        for key in self.keys() {
            let child = match key.parse::<usize>() {
                Ok(index) if self.is_array() => self.child_at(index),
                _ => self.child(&key),
            };
            if let Some(child) = child {
                child.traverse();
            }
        }
    }

    /// Snapshot of the current contents, without tracking.
    pub fn to_raw(&self) -> Value {
        match &*self.0.data.borrow() {
            Data::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), v.to_value())).collect()),
            Data::Array(items) => Value::Array(items.iter().map(Slot::to_value).collect()),
        }
    }

    /// Check whether two handles point to the same target.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Reactive {
    /// Identity, not contents.
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Debug for Reactive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Reactive").field(&self.to_raw()).finish()
    }
}

// ---- Tests ----

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::effect::effect;
    use serde_json::json;
    use std::cell::Cell;

    fn counter() -> Rc<Cell<usize>> {
        Rc::new(Cell::new(0))
    }

    fn watch_runs(f: impl Fn() + 'static) -> Rc<Cell<usize>> {
        let runs = counter();
        let r = runs.clone();
        effect(move || {
            f();
            r.set(r.get() + 1);
        });
        runs
    }

    #[test]
    fn property_reads_are_tracked_per_key() {
        let state = Reactive::from_value(json!({ "a": 1, "b": 2 })).unwrap();
        let runs = watch_runs({
            let state = state.clone();
            move || {
                state.get("a");
            }
        });

        state.set("b", 3).unwrap();
        assert_eq!(runs.get(), 1);

        state.set("a", 5).unwrap();
        assert_eq!(runs.get(), 2);
        assert_eq!(state.get("a"), Some(json!(5)));
    }

    #[test]
    fn equal_scalar_write_is_noop() {
        let state = Reactive::from_value(json!({ "a": 1 })).unwrap();
        let runs = watch_runs({
            let state = state.clone();
            move || {
                state.get("a");
            }
        });

        state.set("a", 1).unwrap();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn adding_and_deleting_keys_notify_iteration() {
        let state = Reactive::from_value(json!({ "a": 1 })).unwrap();
        let runs = watch_runs({
            let state = state.clone();
            move || {
                state.keys();
            }
        });

        state.set("a", 2).unwrap();
        assert_eq!(runs.get(), 1);

        state.set("b", 1).unwrap();
        assert_eq!(runs.get(), 2);

        assert_eq!(state.delete("a"), Ok(true));
        assert_eq!(runs.get(), 3);
        assert_eq!(state.delete("missing"), Ok(false));
        assert_eq!(runs.get(), 3);
        assert_eq!(state.keys(), vec!["b".to_string()]);
    }

    #[test]
    fn has_tracks_the_key() {
        let state = Reactive::from_value(json!({})).unwrap();
        let seen = Rc::new(Cell::new(false));
        let _e = effect({
            let state = state.clone();
            let seen = seen.clone();
            move || seen.set(state.has("x"))
        });

        assert!(!seen.get());
        state.set("x", true).unwrap();
        assert!(seen.get());
    }

    #[test]
    fn nested_proxies_are_stable() {
        let state = Reactive::from_value(json!({ "user": { "name": "ada" } })).unwrap();
        let first = state.child("user").unwrap();
        let second = state.child("user").unwrap();
        assert!(first.ptr_eq(&second));

        let runs = watch_runs({
            let state = state.clone();
            move || {
                state.child("user").unwrap().get("name");
            }
        });

        first.set("name", "grace").unwrap();
        assert_eq!(runs.get(), 2);
        assert_eq!(state.to_raw(), json!({ "user": { "name": "grace" } }));
    }

    #[test]
    fn array_index_write_does_not_touch_length() {
        let list = Reactive::from_value(json!([1, 2, 3])).unwrap();
        let length_runs = watch_runs({
            let list = list.clone();
            move || {
                list.len();
            }
        });
        let index_runs = watch_runs({
            let list = list.clone();
            move || {
                list.index(1);
            }
        });

        list.set_index(1, 20).unwrap();
        assert_eq!(length_runs.get(), 1);
        assert_eq!(index_runs.get(), 2);
    }

    #[test]
    fn writing_past_the_end_grows_the_array() {
        let list = Reactive::from_value(json!([1])).unwrap();
        let length_runs = watch_runs({
            let list = list.clone();
            move || {
                list.len();
            }
        });
        let hole_runs = watch_runs({
            let list = list.clone();
            move || {
                list.index(2);
            }
        });

        list.set_index(3, 4).unwrap();
        assert_eq!(list.to_raw(), json!([1, null, null, 4]));
        assert_eq!(length_runs.get(), 2);
        assert_eq!(hole_runs.get(), 2);
    }

    #[test]
    fn push_and_pop() {
        let list = Reactive::array(vec![]);
        let runs = watch_runs({
            let list = list.clone();
            move || {
                list.values();
            }
        });

        assert_eq!(list.push(1), Ok(1));
        assert_eq!(list.push(2), Ok(2));
        assert_eq!(runs.get(), 3);

        assert_eq!(list.pop(), Ok(Some(json!(2))));
        assert_eq!(runs.get(), 4);
        assert_eq!(list.to_raw(), json!([1]));
    }

    #[test]
    fn truncation_notifies_removed_indices() {
        let list = Reactive::from_value(json!([1, 2, 3, 4])).unwrap();
        let kept = watch_runs({
            let list = list.clone();
            move || {
                list.index(0);
            }
        });
        let removed = watch_runs({
            let list = list.clone();
            move || {
                list.index(3);
            }
        });

        list.set_len(2).unwrap();
        assert_eq!(kept.get(), 1);
        assert_eq!(removed.get(), 2);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn multi_key_write_runs_effect_once() {
        let list = Reactive::from_value(json!([1, 2])).unwrap();
        let runs = watch_runs({
            let list = list.clone();
            move || {
                list.len();
                list.values();
                list.index(1);
            }
        });

        list.pop().unwrap();
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn kind_mismatch_is_reported() {
        let list = Reactive::array(vec![]);
        assert_eq!(
            list.set("a", 1),
            Err(ReactiveError::KindMismatch {
                expected: "object",
                found: "array"
            })
        );

        let object = Reactive::new(Map::new());
        assert!(object.push(1).is_err());
        assert!(Reactive::from_value(json!(3)).is_none());
    }

    #[test]
    fn traverse_tracks_nested_writes() {
        let state = Reactive::from_value(json!({ "a": { "b": [1, { "c": 2 }] } })).unwrap();
        let runs = watch_runs({
            let state = state.clone();
            move || state.traverse()
        });

        let inner = state.child("a").unwrap().child("b").unwrap().child_at(1).unwrap();
        inner.set("c", 3).unwrap();
        assert_eq!(runs.get(), 2);

        state.child("a").unwrap().child("b").unwrap().push(5).unwrap();
        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn untracked_reads_allocate_no_deps() {
        let before = Runtime::stats().deps;
        let state = Reactive::from_value(json!({ "a": 1 })).unwrap();
        state.get("a");
        state.keys();
        assert_eq!(Runtime::stats().deps, before);
    }
}
