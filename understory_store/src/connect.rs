// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Connections and subscribers: how a UI component binds to a store.
//!
//! A [`Connection`] is built once per component kind from [`ConnectOptions`]
//! and stamps out one [`Subscriber`] per component instance. The subscriber
//! owns the component's [`LocalState`] and drives its [`Host`].

use alloc::boxed::Box;
use alloc::rc::{Rc, Weak};
use core::cell::{Cell, RefCell};
use core::hash::Hash;

use tracing::{debug, trace};

use crate::error::StoreError;
use crate::registry::Select;
use crate::store::{Delivery, Member, Store};
use crate::types::{Lifecycle, LocalState, Report, ScopeValue, SelectorId, SubscriberId};

/// The UI side of a subscriber: something that can be re-rendered.
///
/// Any `FnMut(&LocalState<D, O>)` is a host.
pub trait Host<D, O> {
    /// Render with the subscriber's new local state.
    fn render(&mut self, state: &LocalState<D, O>);
}

impl<D, O, F> Host<D, O> for F
where
    F: FnMut(&LocalState<D, O>),
{
    fn render(&mut self, state: &LocalState<D, O>) {
        self(state);
    }
}

/// How a component kind reads and writes the store.
///
/// - `select` maps the whole state `S` to the component's scope `Sc`, and
///   `deselect` writes a scope back into a state.
/// - `get` derives the store part `D` of the local state from the scope and
///   the component's props `P`; `set` folds a new `D` back into the scope.
/// - `initial` seeds the private part `O` of every subscriber's local state.
///
/// Subscribers are grouped by `(selector, scope)` and notified only when
/// their scope changes, so a narrow `select` means fewer notifications.
pub struct ConnectOptions<S, Sc, D, O = (), P = ()> {
    pub(crate) select: Rc<dyn Fn(&S) -> Sc>,
    deselect: Rc<dyn Fn(&S, Sc) -> S>,
    pub(crate) get: Rc<dyn Fn(&Sc, &P) -> D>,
    set: Rc<dyn Fn(&Sc, D) -> Sc>,
    pub(crate) initial: O,
    whole_store: bool,
}

impl<S, Sc, D, O: core::fmt::Debug, P> core::fmt::Debug for ConnectOptions<S, Sc, D, O, P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("initial", &self.initial)
            .field("whole_store", &self.whole_store)
            .finish_non_exhaustive()
    }
}

impl<S, D, P> ConnectOptions<S, S, D, (), P>
where
    S: Clone + 'static,
    D: 'static,
    P: 'static,
{
    /// Options scoped to the whole store.
    ///
    /// Every whole-store subscriber of a store shares one group.
    pub fn new(
        get: impl Fn(&S, &P) -> D + 'static,
        set: impl Fn(&S, D) -> S + 'static,
    ) -> Self {
        Self {
            select: Rc::new(|state: &S| state.clone()),
            deselect: Rc::new(|_: &S, scope: S| scope),
            get: Rc::new(get),
            set: Rc::new(set),
            initial: (),
            whole_store: true,
        }
    }
}

impl<S, Sc, D, P> ConnectOptions<S, Sc, D, (), P>
where
    S: 'static,
    Sc: 'static,
    D: 'static,
    P: 'static,
{
    /// Options scoped to the slice `select` picks out of the state.
    ///
    /// `deselect(state, scope)` must return `state` with `scope` written back
    /// where `select` found it.
    pub fn scoped(
        select: impl Fn(&S) -> Sc + 'static,
        deselect: impl Fn(&S, Sc) -> S + 'static,
        get: impl Fn(&Sc, &P) -> D + 'static,
        set: impl Fn(&Sc, D) -> Sc + 'static,
    ) -> Self {
        Self {
            select: Rc::new(select),
            deselect: Rc::new(deselect),
            get: Rc::new(get),
            set: Rc::new(set),
            initial: (),
            whole_store: false,
        }
    }
}

impl<S, Sc, D, O, P> ConnectOptions<S, Sc, D, O, P> {
    /// Seed the private part of every subscriber's local state.
    pub fn with_initial<O2>(self, initial: O2) -> ConnectOptions<S, Sc, D, O2, P> {
        ConnectOptions {
            select: self.select,
            deselect: self.deselect,
            get: self.get,
            set: self.set,
            initial,
            whole_store: self.whole_store,
        }
    }

    /// Returns true if these options watch the whole store.
    pub fn is_whole_store(&self) -> bool {
        self.whole_store
    }
}

/// A component kind bound to a store. Creates [`Subscriber`]s.
pub struct Connection<S, Sc, D, O = (), P = ()> {
    store: Store<S>,
    options: Rc<ConnectOptions<S, Sc, D, O, P>>,
    selector: SelectorId,
    select: Select<S>,
}

impl<S, Sc, D, O, P> Clone for Connection<S, Sc, D, O, P> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            options: Rc::clone(&self.options),
            selector: self.selector,
            select: Rc::clone(&self.select),
        }
    }
}

impl<S, Sc, D, O, P> core::fmt::Debug for Connection<S, Sc, D, O, P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Connection")
            .field("selector", &self.selector)
            .finish_non_exhaustive()
    }
}

impl<S: Clone + PartialEq + 'static> Store<S> {
    /// Bind a component kind to this store.
    ///
    /// ```
    /// use understory_store::{ConnectOptions, Store};
    ///
    /// let store = Store::new((1_i32, 10_i32));
    /// let left = store.connect(ConnectOptions::scoped(
    ///     |s: &(i32, i32)| s.0,
    ///     |s: &(i32, i32), left| (left, s.1),
    ///     |left: &i32, _: &()| *left,
    ///     |_: &i32, left| left,
    /// ));
    /// let sub = left.subscriber(());
    /// sub.mount().unwrap();
    ///
    /// let report = store.send_update(|s| (s.0, s.1 + 1));
    /// assert!(report.notified.is_empty(), "right side changes are invisible");
    ///
    /// let report = sub.set_store(|left| left + 1).unwrap();
    /// assert!(report.was_notified(sub.id()));
    /// assert_eq!(store.current(), (2, 11));
    /// ```
    pub fn connect<Sc, D, O, P>(
        &self,
        options: ConnectOptions<S, Sc, D, O, P>,
    ) -> Connection<S, Sc, D, O, P>
    where
        Sc: PartialEq + Hash + 'static,
        D: 'static,
        O: 'static,
        P: 'static,
    {
        let selector = if options.whole_store {
            SelectorId::IDENTITY
        } else {
            self.next_selector_id()
        };
        let typed = Rc::clone(&options.select);
        let select: Select<S> = Rc::new(move |state: &S| Rc::new(typed(state)) as Rc<dyn ScopeValue>);
        debug!(?selector, "connected");
        Connection {
            store: self.clone(),
            options: Rc::new(options),
            selector,
            select,
        }
    }
}

impl<S, Sc, D, O, P> Connection<S, Sc, D, O, P>
where
    S: Clone + PartialEq + 'static,
    Sc: PartialEq + Hash + 'static,
    D: Clone + PartialEq + 'static,
    O: Clone + 'static,
    P: Clone + 'static,
{
    /// The store this connection is bound to.
    pub fn store(&self) -> &Store<S> {
        &self.store
    }

    /// The selector identity shared by this connection's subscribers.
    pub fn selector(&self) -> SelectorId {
        self.selector
    }

    /// Create a subscriber without a host.
    ///
    /// Its local state is still kept current; nothing is rendered.
    pub fn subscriber(&self, props: P) -> Subscriber<S, Sc, D, O, P> {
        self.subscriber_with_host(props, |_: &LocalState<D, O>| {})
    }

    /// Create a subscriber that renders through `host`.
    ///
    /// The local state is derived from the state current right now; the
    /// subscriber is not registered until [`Subscriber::mount`].
    pub fn subscriber_with_host(
        &self,
        props: P,
        host: impl Host<D, O> + 'static,
    ) -> Subscriber<S, Sc, D, O, P> {
        let id = self.store.next_subscriber_id();
        let state = self.store.current();
        let scope = (self.options.select)(&state);
        let local = LocalState {
            store: (self.options.get)(&scope, &props),
            own: self.options.initial.clone(),
        };
        trace!(subscriber = ?id, selector = ?self.selector, "subscriber created");
        Subscriber {
            inner: Rc::new(SubscriberInner {
                id,
                connection: self.clone(),
                props: RefCell::new(props),
                local: RefCell::new(local),
                lifecycle: Cell::new(Lifecycle::Created),
                host: RefCell::new(Box::new(host)),
                render_pending: Cell::new(false),
            }),
        }
    }
}

struct SubscriberInner<S, Sc, D, O, P> {
    id: SubscriberId,
    connection: Connection<S, Sc, D, O, P>,
    props: RefCell<P>,
    local: RefCell<LocalState<D, O>>,
    lifecycle: Cell<Lifecycle>,
    host: RefCell<Box<dyn Host<D, O>>>,
    render_pending: Cell<bool>,
}

impl<S, Sc, D, O, P> SubscriberInner<S, Sc, D, O, P>
where
    D: Clone + PartialEq,
    O: Clone,
{
    /// Store `derived` as the store part. Returns false if it was already equal.
    fn replace_derived(&self, derived: D) -> bool {
        let mut local = self.local.borrow_mut();
        if local.store == derived {
            return false;
        }
        local.store = derived;
        true
    }

    /// Render the current local state.
    ///
    /// A render requested while the host is already rendering (for example a
    /// host that calls `set_own`) runs after the current one returns.
    fn render(&self) {
        self.render_pending.set(true);
        let Ok(mut host) = self.host.try_borrow_mut() else {
            return;
        };
        while self.render_pending.replace(false) {
            let snapshot = self.local.borrow().clone();
            host.render(&snapshot);
        }
    }
}

impl<S, Sc, D, O, P> Member for SubscriberInner<S, Sc, D, O, P>
where
    Sc: 'static,
    D: Clone + PartialEq,
    O: Clone,
{
    fn deliver(&self, scope: &dyn ScopeValue) -> Delivery {
        if self.lifecycle.get() != Lifecycle::Mounted {
            return Delivery::Inactive;
        }
        let Some(scope) = scope.as_any().downcast_ref::<Sc>() else {
            return Delivery::Inactive;
        };
        let derived = (self.connection.options.get)(scope, &self.props.borrow());
        if !self.replace_derived(derived) {
            return Delivery::Unchanged;
        }
        self.render();
        Delivery::Rendered
    }
}

/// One component instance bound to a store.
///
/// Moves through [`Lifecycle`]: created by a [`Connection`], registered by
/// [`mount`](Self::mount), deregistered by [`unmount`](Self::unmount) or by
/// being dropped.
pub struct Subscriber<S, Sc, D, O = (), P = ()> {
    inner: Rc<SubscriberInner<S, Sc, D, O, P>>,
}

impl<S, Sc, D, O, P> core::fmt::Debug for Subscriber<S, Sc, D, O, P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.inner.id)
            .field("lifecycle", &self.inner.lifecycle.get())
            .field("selector", &self.inner.connection.selector)
            .finish_non_exhaustive()
    }
}

impl<S, Sc, D, O, P> Subscriber<S, Sc, D, O, P>
where
    S: Clone + PartialEq + 'static,
    Sc: PartialEq + Hash + 'static,
    D: Clone + PartialEq + 'static,
    O: Clone + 'static,
    P: Clone + 'static,
{
    /// This subscriber's id.
    pub fn id(&self) -> SubscriberId {
        self.inner.id
    }

    /// Where this subscriber is in its life.
    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.lifecycle.get()
    }

    /// A copy of the current local state.
    pub fn state(&self) -> LocalState<D, O> {
        self.inner.local.borrow().clone()
    }

    /// A copy of the current props.
    pub fn props(&self) -> P {
        self.inner.props.borrow().clone()
    }

    fn store(&self) -> &Store<S> {
        &self.inner.connection.store
    }

    fn options(&self) -> &ConnectOptions<S, Sc, D, O, P> {
        &self.inner.connection.options
    }

    fn derive(&self, state: &S) -> D {
        let scope = (self.options().select)(state);
        (self.options().get)(&scope, &self.inner.props.borrow())
    }

    fn ensure_usable(&self) -> Result<(), StoreError> {
        match self.lifecycle() {
            Lifecycle::Unmounted => Err(StoreError::Unmounted(self.id())),
            _ => Ok(()),
        }
    }

    /// Register with the store so scope changes are delivered.
    ///
    /// If the scope changed since construction, the local state is refreshed
    /// and the host rendered once.
    ///
    /// # Errors
    ///
    /// - [`StoreError::AlreadyMounted`] if already mounted.
    /// - [`StoreError::Unmounted`] if unmounted before.
    pub fn mount(&self) -> Result<(), StoreError> {
        match self.lifecycle() {
            Lifecycle::Created => {}
            Lifecycle::Mounted => return Err(StoreError::AlreadyMounted(self.id())),
            Lifecycle::Unmounted => return Err(StoreError::Unmounted(self.id())),
        }
        let state = self.store().current();
        let scope = (self.options().select)(&state);
        let derived = (self.options().get)(&scope, &self.inner.props.borrow());

        let handle = Rc::downgrade(&self.inner);
        let handle: Weak<dyn Member> = handle;
        let connection = &self.inner.connection;
        self.store().register(
            connection.selector,
            &connection.select,
            Rc::new(scope),
            self.id(),
            handle,
        );
        self.inner.lifecycle.set(Lifecycle::Mounted);

        if self.inner.replace_derived(derived) {
            trace!(subscriber = ?self.id(), "scope changed before mount");
            self.inner.render();
        }
        Ok(())
    }

    /// Deregister from the store. No notification is delivered afterwards.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotMounted`] if the subscriber is not mounted.
    pub fn unmount(&self) -> Result<(), StoreError> {
        if self.lifecycle() != Lifecycle::Mounted {
            return Err(StoreError::NotMounted(self.id()));
        }
        self.inner.lifecycle.set(Lifecycle::Unmounted);
        self.store().unregister(self.id());
        Ok(())
    }

    /// Update the store through this subscriber's view of it.
    ///
    /// `f` receives the store part of the local state, re-derived from the
    /// state current when the update is applied (not when it was issued), and
    /// returns its replacement. The result is folded back with the
    /// connection's `set` and `deselect`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unmounted`] if the subscriber was unmounted.
    pub fn set_store(&self, f: impl FnOnce(&D) -> D + 'static) -> Result<Report, StoreError> {
        self.ensure_usable()?;
        let options = Rc::clone(&self.inner.connection.options);
        let props = self.props();
        Ok(self.store().send_update(move |state: &S| {
            let scope = (options.select)(state);
            let derived = (options.get)(&scope, &props);
            let scope = (options.set)(&scope, f(&derived));
            (options.deselect)(state, scope)
        }))
    }

    /// Update the whole store.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unmounted`] if the subscriber was unmounted.
    pub fn set_global_store(
        &self,
        f: impl FnOnce(&S) -> S + 'static,
    ) -> Result<Report, StoreError> {
        self.ensure_usable()?;
        Ok(self.store().send_update(f))
    }

    /// Update the private part of the local state. Renders when mounted.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unmounted`] if the subscriber was unmounted.
    pub fn set_own(&self, f: impl FnOnce(&O) -> O) -> Result<(), StoreError> {
        self.ensure_usable()?;
        let own = self.inner.local.borrow().own.clone();
        let own = f(&own);
        self.inner.local.borrow_mut().own = own;
        if self.lifecycle() == Lifecycle::Mounted {
            self.inner.render();
        }
        Ok(())
    }

    /// Replace the props and re-derive the store part of the local state.
    /// Renders when mounted and the derived state changed.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unmounted`] if the subscriber was unmounted.
    pub fn set_props(&self, props: P) -> Result<(), StoreError> {
        self.ensure_usable()?;
        *self.inner.props.borrow_mut() = props;
        let derived = self.derive(&self.store().current());
        if self.inner.replace_derived(derived) && self.lifecycle() == Lifecycle::Mounted {
            self.inner.render();
        }
        Ok(())
    }
}

impl<S, Sc, D, O, P> Drop for Subscriber<S, Sc, D, O, P> {
    fn drop(&mut self) {
        if self.inner.lifecycle.get() == Lifecycle::Mounted {
            self.inner.lifecycle.set(Lifecycle::Unmounted);
            self.inner.connection.store.unregister(self.inner.id);
        }
    }
}
