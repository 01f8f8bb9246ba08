use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

use crate::cache::ResourceCache;
use crate::codec::ResourceCodec;
use crate::utils::CancelOnDrop;

/// What a bound UI slot should currently render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingState<R> {
    /// Nothing is bound.
    Empty,
    /// A fetch for the bound locator is underway.
    Loading,
    /// The bound resource, ready to render.
    Ready(R),
    /// The bound resource could not be produced; render a placeholder.
    Unavailable,
}

/// Connects one UI slot (a list cell, a now-playing view) to the cache.
///
/// A binding owns at most one waiting task at a time. Rebinding or
/// unbinding aborts that task, and only that task: the underlying network
/// fetch keeps running on the coordinator and still populates the cache, so
/// a slot that scrolls away and back gets an instant hit.
///
/// State transitions are published on a [`watch`] channel; the UI renders
/// whatever the latest state says and never has to sequence futures itself.
pub struct ResourceBinding<C: ResourceCodec> {
    cache: ResourceCache<C>,
    state: Arc<watch::Sender<BindingState<C::Resource>>>,
    locator: Option<String>,
    waiter: Option<CancelOnDrop<()>>,
}

impl<C: ResourceCodec> fmt::Debug for ResourceBinding<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceBinding")
            .field("locator", &self.locator)
            .finish_non_exhaustive()
    }
}

impl<C: ResourceCodec> ResourceBinding<C> {
    pub fn new(cache: ResourceCache<C>) -> Self {
        let (state, _) = watch::channel(BindingState::Empty);

        Self {
            cache,
            state: Arc::new(state),
            locator: None,
            waiter: None,
        }
    }

    /// Binds the slot to a locator.
    ///
    /// Binding to the current locator is a no-op. Otherwise the previous
    /// waiting task is aborted and the slot transitions to [`Ready`]
    /// immediately on a memory hit, or to [`Loading`] and then to whatever
    /// the fetch produces.
    ///
    /// [`Ready`]: BindingState::Ready
    /// [`Loading`]: BindingState::Loading
    pub fn bind(&mut self, locator: &str) {
        if self.locator.as_deref() == Some(locator) {
            return;
        }

        self.waiter = None;
        self.locator = Some(locator.to_owned());

        if let Some(resource) = self.cache.lookup_sync(locator) {
            self.state.send_replace(BindingState::Ready(resource));
            return;
        }

        self.state.send_replace(BindingState::Loading);

        let cache = self.cache.clone();
        let state = Arc::clone(&self.state);
        let locator = locator.to_owned();
        let handle = tokio::spawn(async move {
            let update = match cache.fetch(&locator).await {
                Some(resource) => BindingState::Ready(resource),
                None => BindingState::Unavailable,
            };
            state.send_replace(update);
        });
        self.waiter = Some(CancelOnDrop::new(handle));
    }

    /// Releases the slot, aborting its waiting task.
    pub fn unbind(&mut self) {
        self.waiter = None;
        self.locator = None;
        self.state.send_replace(BindingState::Empty);
    }

    /// The locator this slot is currently bound to.
    pub fn locator(&self) -> Option<&str> {
        self.locator.as_deref()
    }

    /// Returns a receiver of this slot's state transitions.
    pub fn subscribe(&self) -> watch::Receiver<BindingState<C::Resource>> {
        self.state.subscribe()
    }
}
