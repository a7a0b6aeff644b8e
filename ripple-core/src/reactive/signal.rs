//! Ref Implementation
//!
//! A Ref is a single reactive value. When a ref's value changes, all
//! computations that depend on it are notified.
//!
//! # How Refs Work
//!
//! 1. When you read a ref (`ref.get()`), it checks if there's an active
//!    reactive context (a computed or effect being executed).
//!
//! 2. If there is, the ref links that subscriber to its dep.
//!
//! 3. When you write a ref (`ref.set(value)`), it compares the new value
//!    with the old one and, if they differ, triggers its dep.
//!
//! # Example
//!
//! ```rust
//! use ripple_core::Ref;
//!
//! let count = Ref::new(0);
//! assert_eq!(count.get(), 0);
//!
//! count.set(5);
//! assert_eq!(count.get(), 5);
//! ```

use std::cell::RefCell;
use std::fmt::Debug;
use std::mem;
use std::rc::Rc;

use super::context::untracked;
use super::runtime::Runtime;
use crate::graph::DepId;

/// Equality used by [`Ref::new`]: `==`, except that two values which are
/// not equal to themselves (NaN) count as the same.
#[allow(clippy::eq_op)]
fn same_or_both_unordered<T: PartialEq>(a: &T, b: &T) -> bool {
    a == b || (a != a && b != b)
}

/// Same-value equality for floats: NaN equals NaN, and `0.0` differs from
/// `-0.0`.
///
/// Pass it to [`Ref::with_equality`] when the sign of zero matters.
pub fn same_value(a: &f64, b: &f64) -> bool {
    (a.is_nan() && b.is_nan()) || a.to_bits() == b.to_bits()
}

struct RefInner<T> {
    dep: DepId,
    value: RefCell<T>,
    equals: fn(&T, &T) -> bool,
}

impl<T> Drop for RefInner<T> {
    fn drop(&mut self) {
        Runtime::dispose_dep(self.dep);
    }
}

/// A reactive value.
///
/// Cloning a ref produces another handle to the same value.
pub struct Ref<T: 'static>(Rc<RefInner<T>>);

impl<T: 'static> Ref<T> {
    /// Create a new ref with the given initial value.
    pub fn new(value: T) -> Self
    where
        T: PartialEq,
    {
        Self::with_equality(value, same_or_both_unordered::<T>)
    }

    /// Create a ref that uses `equals` to decide whether a write changes it.
    pub fn with_equality(value: T, equals: fn(&T, &T) -> bool) -> Self {
        Self(Rc::new(RefInner {
            dep: Runtime::create_dep(),
            value: RefCell::new(value),
            equals,
        }))
    }

    /// The ref's dep in the graph.
    pub fn dep_id(&self) -> DepId {
        self.0.dep
    }

    /// Get the current value.
    ///
    /// If called within a reactive context, records the dependency.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.with(T::clone)
    }

    /// Get the current value without recording a dependency.
    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        untracked(|| self.get())
    }

    /// Borrow the current value, recording a dependency.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        Runtime::track(self.0.dep);
        f(&*self.0.value.borrow())
    }

    /// Set a new value.
    ///
    /// Subscribers are notified only if the value changed.
    pub fn set(&self, value: T) {
        if (self.0.equals)(&*self.0.value.borrow(), &value) {
            return;
        }
        let old = mem::replace(&mut *self.0.value.borrow_mut(), value);
        drop(old);
        Runtime::trigger(self.0.dep);
    }

    /// Update the value in place. Always notifies subscribers.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        f(&mut self.0.value.borrow_mut());
        Runtime::trigger(self.0.dep);
    }

    /// Notify subscribers without changing the value.
    pub fn trigger(&self) {
        Runtime::trigger(self.0.dep);
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        Runtime::subscriber_count(self.0.dep)
    }

    /// Check whether two handles point to the same ref.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: 'static> Clone for Ref<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<T: Debug + 'static> Debug for Ref<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ref")
            .field("value", &*self.0.value.borrow())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Records a read of a [`CustomRef`].
#[derive(Debug, Clone, Copy)]
pub struct Tracker(DepId);

impl Tracker {
    pub fn track(&self) {
        Runtime::track(self.0);
    }
}

/// Notifies readers of a [`CustomRef`].
#[derive(Debug, Clone, Copy)]
pub struct Trigger(DepId);

impl Trigger {
    pub fn trigger(&self) {
        Runtime::trigger(self.0);
    }
}

struct CustomRefInner<T> {
    dep: DepId,
    get: Box<dyn Fn() -> T>,
    set: Box<dyn Fn(T)>,
}

impl<T> Drop for CustomRefInner<T> {
    fn drop(&mut self) {
        Runtime::dispose_dep(self.dep);
    }
}

/// A ref whose reads and writes are user code.
///
/// The factory receives a [`Tracker`] and a [`Trigger`] for the ref's dep
/// and returns the getter and setter. The getter decides when to track and
/// the setter decides when (and whether) to trigger.
///
/// ```rust
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use ripple_core::CustomRef;
///
/// let store = Rc::new(Cell::new(0));
/// let value = CustomRef::new({
///     let store = store.clone();
///     move |tracker, trigger| {
///         let read = store.clone();
///         let getter = move || {
///             tracker.track();
///             read.get()
///         };
///         let setter = move |v| {
///             store.set(v);
///             trigger.trigger();
///         };
///         (getter, setter)
///     }
/// });
///
/// value.set(3);
/// assert_eq!(value.get(), 3);
/// ```
pub struct CustomRef<T: 'static>(Rc<CustomRefInner<T>>);

impl<T: 'static> CustomRef<T> {
    pub fn new<F, G, S>(factory: F) -> Self
    where
        F: FnOnce(Tracker, Trigger) -> (G, S),
        G: Fn() -> T + 'static,
        S: Fn(T) + 'static,
    {
        let dep = Runtime::create_dep();
        let (get, set) = factory(Tracker(dep), Trigger(dep));
        Self(Rc::new(CustomRefInner {
            dep,
            get: Box::new(get),
            set: Box::new(set),
        }))
    }

    pub fn get(&self) -> T {
        (self.0.get)()
    }

    pub fn set(&self, value: T) {
        (self.0.set)(value)
    }

    pub fn subscriber_count(&self) -> usize {
        Runtime::subscriber_count(self.0.dep)
    }
}

impl<T: 'static> Clone for CustomRef<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

// ---- Tests ----

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::effect::effect;
    use std::cell::Cell;

    #[test]
    fn ref_get_and_set() {
        let r = Ref::new(42);
        assert_eq!(r.get(), 42);

        r.set(100);
        assert_eq!(r.get(), 100);
    }

    #[test]
    fn ref_update() {
        let r = Ref::new(vec![1, 2, 3]);
        r.update(|v| v.push(4));
        assert_eq!(r.get(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn ref_notifies_subscribers() {
        let r = Ref::new(0);
        let runs = Rc::new(Cell::new(0));

        let _e = effect({
            let r = r.clone();
            let runs = runs.clone();
            move || {
                r.get();
                runs.set(runs.get() + 1);
            }
        });

        assert_eq!(r.subscriber_count(), 1);
        r.set(1);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn equal_write_does_not_notify() {
        let r = Ref::new(1);
        let runs = Rc::new(Cell::new(0));

        let _e = effect({
            let r = r.clone();
            let runs = runs.clone();
            move || {
                r.get();
                runs.set(runs.get() + 1);
            }
        });

        r.set(1);
        assert_eq!(runs.get(), 1);

        // update() and trigger() always notify.
        r.update(|_| {});
        r.trigger();
        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn nan_writes_are_not_changes() {
        let r = Ref::new(f64::NAN);
        let version = Runtime::dep_version(r.dep_id());
        r.set(f64::NAN);
        assert_eq!(Runtime::dep_version(r.dep_id()), version);
    }

    #[test]
    fn same_value_distinguishes_signed_zero() {
        assert!(same_value(&f64::NAN, &f64::NAN));
        assert!(!same_value(&0.0, &-0.0));

        let r = Ref::with_equality(0.0, same_value);
        let version = Runtime::dep_version(r.dep_id()).unwrap();
        r.set(-0.0);
        assert_eq!(Runtime::dep_version(r.dep_id()), Some(version + 1));

        // The default equality treats them as equal.
        let plain = Ref::new(0.0);
        let version = Runtime::dep_version(plain.dep_id());
        plain.set(-0.0);
        assert_eq!(Runtime::dep_version(plain.dep_id()), version);
    }

    #[test]
    fn ref_clone_shares_state() {
        let r1 = Ref::new(1);
        let r2 = r1.clone();

        r1.set(2);
        assert_eq!(r2.get(), 2);
        assert!(r1.ptr_eq(&r2));
    }

    #[test]
    fn dropping_ref_disposes_dep() {
        let before = Runtime::stats().deps;
        let r = Ref::new(1);
        assert_eq!(Runtime::stats().deps, before + 1);
        drop(r);
        assert_eq!(Runtime::stats().deps, before);
    }

    #[test]
    fn custom_ref_controls_tracking() {
        let store = Rc::new(Cell::new(0));
        let value = CustomRef::new({
            let store = store.clone();
            move |tracker, trigger| {
                let read = store.clone();
                let getter = move || {
                    tracker.track();
                    read.get()
                };
                // Only even values are published.
                let setter = move |v: i32| {
                    store.set(v);
                    if v % 2 == 0 {
                        trigger.trigger();
                    }
                };
                (getter, setter)
            }
        });

        let seen = Rc::new(Cell::new(-1));
        let _e = effect({
            let value = value.clone();
            let seen = seen.clone();
            move || seen.set(value.get())
        });

        assert_eq!(seen.get(), 0);
        value.set(1);
        assert_eq!(seen.get(), 0);
        value.set(2);
        assert_eq!(seen.get(), 2);
        assert_eq!(value.subscriber_count(), 1);
    }
}
