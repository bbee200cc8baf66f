//! Arena-backed cancellation sources.
//!
//! Every source lives as a record in a shared [`Arena`]; a
//! [`CancellationSource`] is a counted handle to one record. Sources created
//! with [`CancellationSource::child`] share their parent's arena, and the
//! parent/child link is an ordinary handler registration on the parent that
//! refers to the child by index. The link holds no strong reference to the
//! child, so the tree never forms an `Rc` cycle.
//!
//! Handlers are kept in registration order under a per-tree monotonically
//! increasing [`HandlerToken`]. `cancel` notifies a snapshot taken before the
//! first handler runs, with the arena borrow released, so handlers are free to
//! register, detach, or cancel other sources.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;

use crate::tracing_compat::trace;
use crate::util::{Arena, ArenaIndex};

use super::signal::Cancelled;

/// Identifies one handler registration within a cancellation tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandlerToken(u64);

impl HandlerToken {
    /// Returns the raw token value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

type Handler = Rc<RefCell<dyn FnMut(&Detach)>>;

struct SourceRecord {
    cancelled: bool,
    handles: usize,
    handlers: BTreeMap<HandlerToken, Handler>,
    parent_link: Option<Detach>,
}

impl SourceRecord {
    fn new() -> Self {
        Self {
            cancelled: false,
            handles: 1,
            handlers: BTreeMap::new(),
            parent_link: None,
        }
    }
}

#[derive(Default)]
struct TreeInner {
    sources: Arena<SourceRecord>,
    next_token: u64,
}

impl TreeInner {
    fn issue_token(&mut self) -> HandlerToken {
        let token = HandlerToken(self.next_token);
        self.next_token += 1;
        token
    }
}

type Tree = Rc<RefCell<TreeInner>>;

/// A one-shot, hierarchical cancellation flag with observer callbacks.
///
/// Cloning yields another handle to the same source. The source's record is
/// released when the last handle is dropped; any [`Detach`] handles pointing
/// at it become no-ops.
pub struct CancellationSource {
    tree: Tree,
    id: ArenaIndex,
}

impl CancellationSource {
    /// Creates a root source in a fresh cancellation tree.
    #[must_use]
    pub fn new() -> Self {
        let tree: Tree = Rc::new(RefCell::new(TreeInner::default()));
        Self::alloc(&tree)
    }

    fn alloc(tree: &Tree) -> Self {
        let id = tree.borrow_mut().sources.insert(SourceRecord::new());
        Self {
            tree: Rc::clone(tree),
            id,
        }
    }

    /// Creates a source that is cancelled whenever `self` is.
    ///
    /// The link is torn down when the child is cancelled or when
    /// [`detach_from_parent`](Self::detach_from_parent) is called. If `self`
    /// is already cancelled the child starts out cancelled.
    #[must_use]
    pub fn child(&self) -> Self {
        let child = Self::alloc(&self.tree);
        let target = child.downgrade();
        let link = self.add_event_handler(move |_| target.cancel());
        {
            let mut inner = child.tree.borrow_mut();
            // A cancelled parent fired the link inline; nothing to keep.
            if let Some(record) = inner.sources.get_mut(child.id) {
                if !record.cancelled {
                    record.parent_link = Some(link);
                }
            }
        }
        child
    }

    /// Returns true once the source has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.tree
            .borrow()
            .sources
            .get(self.id)
            .is_some_and(|record| record.cancelled)
    }

    /// Cancels the source and notifies every registered handler.
    ///
    /// Handlers are notified in registration order from a snapshot taken
    /// before the first one runs. A handler that is still executing when a
    /// nested `cancel` reaches it is skipped for the nested call. Calling
    /// `cancel` again re-notifies the handlers that are still registered.
    pub fn cancel(&self) {
        cancel_record(&self.tree, self.id);
    }

    /// Registers `handler` to run when the source is cancelled.
    ///
    /// If the source is already cancelled, `handler` runs immediately, once,
    /// and is not registered; the returned [`Detach`] is then inert.
    pub fn add_event_handler<F>(&self, mut handler: F) -> Detach
    where
        F: FnMut(&Detach) + 'static,
    {
        let mut inner = self.tree.borrow_mut();
        let token = inner.issue_token();
        let detach = Detach {
            tree: Rc::downgrade(&self.tree),
            source: self.id,
            token,
        };
        let already = inner
            .sources
            .get(self.id)
            .map_or(true, |record| record.cancelled);
        if already {
            drop(inner);
            handler(&detach);
            return detach;
        }
        if let Some(record) = inner.sources.get_mut(self.id) {
            record
                .handlers
                .insert(token, Rc::new(RefCell::new(handler)) as Handler);
        }
        detach
    }

    /// Removes the registration identified by `token`.
    ///
    /// Returns false if the registration is not (or no longer) attached.
    pub fn remove_event_handler(&self, token: HandlerToken) -> bool {
        let removed = self
            .tree
            .borrow_mut()
            .sources
            .get_mut(self.id)
            .and_then(|record| record.handlers.remove(&token));
        removed.is_some()
    }

    /// Severs the link installed by [`child`](Self::child), if still present.
    pub fn detach_from_parent(&self) -> bool {
        let link = self
            .tree
            .borrow_mut()
            .sources
            .get_mut(self.id)
            .and_then(|record| record.parent_link.take());
        link.is_some_and(|link| link.detach())
    }

    /// Returns true while the link to the parent source is still attached.
    #[must_use]
    pub fn is_linked_to_parent(&self) -> bool {
        let link = self
            .tree
            .borrow()
            .sources
            .get(self.id)
            .and_then(|record| record.parent_link.clone());
        link.is_some_and(|link| link.is_attached())
    }

    /// Number of handlers currently registered.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.tree
            .borrow()
            .sources
            .get(self.id)
            .map_or(0, |record| record.handlers.len())
    }

    /// Returns a future that resolves once the source is cancelled.
    #[must_use]
    pub fn cancelled(&self) -> Cancelled {
        Cancelled::new(self.clone())
    }

    /// Returns true if both handles refer to the same source.
    #[must_use]
    pub fn same_source(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.tree, &other.tree) && self.id == other.id
    }

    /// Number of live sources in this source's tree.
    #[must_use]
    pub fn tree_len(&self) -> usize {
        self.tree.borrow().sources.len()
    }

    fn downgrade(&self) -> WeakSource {
        WeakSource {
            tree: Rc::downgrade(&self.tree),
            id: self.id,
        }
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for CancellationSource {
    fn clone(&self) -> Self {
        if let Some(record) = self.tree.borrow_mut().sources.get_mut(self.id) {
            record.handles += 1;
        }
        Self {
            tree: Rc::clone(&self.tree),
            id: self.id,
        }
    }
}

impl Drop for CancellationSource {
    fn drop(&mut self) {
        let released = {
            let mut inner = self.tree.borrow_mut();
            let last = match inner.sources.get_mut(self.id) {
                Some(record) => {
                    record.handles -= 1;
                    record.handles == 0
                }
                None => false,
            };
            if last {
                inner.sources.remove(self.id)
            } else {
                None
            }
        };
        // Handlers may own other sources of this tree; drop them unborrowed.
        if let Some(record) = released {
            if let Some(link) = &record.parent_link {
                link.detach();
            }
            drop(record);
        }
    }
}

impl fmt::Debug for CancellationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.tree.borrow();
        let record = inner.sources.get(self.id);
        f.debug_struct("CancellationSource")
            .field("id", &self.id)
            .field("cancelled", &record.is_some_and(|r| r.cancelled))
            .field("handlers", &record.map_or(0, |r| r.handlers.len()))
            .finish()
    }
}

/// Non-owning reference used by parent links.
struct WeakSource {
    tree: Weak<RefCell<TreeInner>>,
    id: ArenaIndex,
}

impl WeakSource {
    fn cancel(&self) {
        if let Some(tree) = self.tree.upgrade() {
            cancel_record(&tree, self.id);
        }
    }
}

fn cancel_record(tree: &Tree, id: ArenaIndex) {
    let (snapshot, parent_link) = {
        let mut inner = tree.borrow_mut();
        let Some(record) = inner.sources.get_mut(id) else {
            return;
        };
        record.cancelled = true;
        let snapshot: SmallVec<[(HandlerToken, Handler); 4]> = record
            .handlers
            .iter()
            .map(|(token, handler)| (*token, Rc::clone(handler)))
            .collect();
        (snapshot, record.parent_link.take())
    };
    trace!(source = ?id, handlers = snapshot.len(), "cancellation source fired");

    if let Some(link) = parent_link {
        link.detach();
    }

    let weak = Rc::downgrade(tree);
    for (token, handler) in snapshot {
        let detach = Detach {
            tree: weak.clone(),
            source: id,
            token,
        };
        let Ok(mut callback) = handler.try_borrow_mut() else {
            trace!(source = ?id, token = token.as_u64(), "skipping re-entrant handler");
            continue;
        };
        (*callback)(&detach);
    }
}

/// Handle scoped to one handler registration.
///
/// Detaching is one-shot: the first successful call returns true, every later
/// call (or a call after the source was released) returns false.
#[derive(Clone)]
pub struct Detach {
    tree: Weak<RefCell<TreeInner>>,
    source: ArenaIndex,
    token: HandlerToken,
}

impl Detach {
    /// Removes the registration this handle is scoped to.
    pub fn detach(&self) -> bool {
        let Some(tree) = self.tree.upgrade() else {
            return false;
        };
        let removed = tree
            .borrow_mut()
            .sources
            .get_mut(self.source)
            .and_then(|record| record.handlers.remove(&self.token));
        // The callback may own sources of this tree.
        removed.is_some()
    }

    /// Returns true while the registration is attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.tree.upgrade().is_some_and(|tree| {
            tree.borrow()
                .sources
                .get(self.source)
                .is_some_and(|record| record.handlers.contains_key(&self.token))
        })
    }

    /// Token of the registration.
    #[must_use]
    pub const fn token(&self) -> HandlerToken {
        self.token
    }
}

impl fmt::Debug for Detach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Detach")
            .field("source", &self.source)
            .field("token", &self.token)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    fn counter() -> (Rc<Cell<u32>>, impl FnMut(&Detach) + 'static) {
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        (hits, move |_: &Detach| h.set(h.get() + 1))
    }

    #[test]
    fn cancel_notifies_in_registration_order() {
        init_test("cancel_notifies_in_registration_order");
        let source = CancellationSource::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        for label in ["a", "b", "c"] {
            let order = Rc::clone(&order);
            source.add_event_handler(move |_| order.borrow_mut().push(label));
        }
        source.cancel();
        crate::assert_with_log!(
            *order.borrow() == ["a", "b", "c"],
            "order",
            ["a", "b", "c"],
            order.borrow()
        );
        assert!(source.is_cancelled());
        crate::test_complete!("cancel_notifies_in_registration_order");
    }

    #[test]
    fn late_registration_runs_once_synchronously() {
        init_test("late_registration_runs_once_synchronously");
        let source = CancellationSource::new();
        source.cancel();
        let (hits, handler) = counter();
        let detach = source.add_event_handler(handler);
        crate::assert_with_log!(hits.get() == 1, "immediate call", 1, hits.get());
        assert_eq!(source.handler_count(), 0);
        assert!(!detach.detach());

        source.cancel();
        crate::assert_with_log!(hits.get() == 1, "not registered", 1, hits.get());
        crate::test_complete!("late_registration_runs_once_synchronously");
    }

    #[test]
    fn detach_is_one_shot() {
        init_test("detach_is_one_shot");
        let source = CancellationSource::new();
        let (hits, handler) = counter();
        let detach = source.add_event_handler(handler);
        assert!(detach.is_attached());
        assert!(detach.detach());
        assert!(!detach.detach());
        assert!(!source.remove_event_handler(detach.token()));
        source.cancel();
        assert_eq!(hits.get(), 0);
        crate::test_complete!("detach_is_one_shot");
    }

    #[test]
    fn remove_event_handler_by_token() {
        init_test("remove_event_handler_by_token");
        let source = CancellationSource::new();
        let (hits, handler) = counter();
        let token = source.add_event_handler(handler).token();
        assert!(source.remove_event_handler(token));
        assert!(!source.remove_event_handler(token));
        source.cancel();
        assert_eq!(hits.get(), 0);
        crate::test_complete!("remove_event_handler_by_token");
    }

    #[test]
    fn handler_detaching_peer_does_not_change_current_snapshot() {
        init_test("handler_detaching_peer_does_not_change_current_snapshot");
        let source = CancellationSource::new();
        let peer_slot: Rc<RefCell<Option<Detach>>> = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&peer_slot);
        source.add_event_handler(move |own| {
            own.detach();
            if let Some(peer) = slot.borrow().as_ref() {
                peer.detach();
            }
        });
        let (hits, handler) = counter();
        *peer_slot.borrow_mut() = Some(source.add_event_handler(handler));

        source.cancel();
        crate::assert_with_log!(hits.get() == 1, "peer still notified", 1, hits.get());
        assert_eq!(source.handler_count(), 0);

        source.cancel();
        assert_eq!(hits.get(), 1);
        crate::test_complete!("handler_detaching_peer_does_not_change_current_snapshot");
    }

    #[test]
    fn repeated_cancel_renotifies_registered_handlers() {
        init_test("repeated_cancel_renotifies_registered_handlers");
        let source = CancellationSource::new();
        let (hits, handler) = counter();
        source.add_event_handler(handler);
        source.cancel();
        source.cancel();
        crate::assert_with_log!(hits.get() == 2, "renotified", 2, hits.get());
        crate::test_complete!("repeated_cancel_renotifies_registered_handlers");
    }

    #[test]
    fn reentrant_cancel_skips_running_handler() {
        init_test("reentrant_cancel_skips_running_handler");
        let source = CancellationSource::new();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let inner = source.clone();
        source.add_event_handler(move |_| {
            h.set(h.get() + 1);
            if h.get() == 1 {
                inner.cancel();
            }
        });
        source.cancel();
        crate::assert_with_log!(hits.get() == 1, "no recursion", 1, hits.get());
        crate::test_complete!("reentrant_cancel_skips_running_handler");
    }

    #[test]
    fn child_follows_parent_and_unlinks() {
        init_test("child_follows_parent_and_unlinks");
        let parent = CancellationSource::new();
        let child = parent.child();
        assert!(child.is_linked_to_parent());
        assert_eq!(parent.handler_count(), 1);

        parent.cancel();
        assert!(child.is_cancelled());
        crate::assert_with_log!(
            !child.is_linked_to_parent(),
            "link removed on child cancel",
            false,
            child.is_linked_to_parent()
        );
        assert_eq!(parent.handler_count(), 0);
        crate::test_complete!("child_follows_parent_and_unlinks");
    }

    #[test]
    fn child_cancel_does_not_reach_parent() {
        init_test("child_cancel_does_not_reach_parent");
        let parent = CancellationSource::new();
        let child = parent.child();
        let grandchild = child.child();
        child.cancel();
        assert!(grandchild.is_cancelled());
        assert!(!parent.is_cancelled());
        assert_eq!(parent.handler_count(), 0);
        crate::test_complete!("child_cancel_does_not_reach_parent");
    }

    #[test]
    fn detach_from_parent_stops_propagation() {
        init_test("detach_from_parent_stops_propagation");
        let parent = CancellationSource::new();
        let child = parent.child();
        assert!(child.detach_from_parent());
        assert!(!child.detach_from_parent());
        parent.cancel();
        assert!(!child.is_cancelled());
        crate::test_complete!("detach_from_parent_stops_propagation");
    }

    #[test]
    fn child_of_cancelled_parent_starts_cancelled() {
        init_test("child_of_cancelled_parent_starts_cancelled");
        let parent = CancellationSource::new();
        parent.cancel();
        let child = parent.child();
        assert!(child.is_cancelled());
        assert!(!child.is_linked_to_parent());
        assert_eq!(parent.handler_count(), 0);
        crate::test_complete!("child_of_cancelled_parent_starts_cancelled");
    }

    #[test]
    fn dropping_last_handle_releases_record() {
        init_test("dropping_last_handle_releases_record");
        let parent = CancellationSource::new();
        let child = parent.child();
        let twin = child.clone();
        assert_eq!(parent.tree_len(), 2);
        drop(child);
        assert_eq!(parent.tree_len(), 2);
        drop(twin);
        crate::assert_with_log!(parent.tree_len() == 1, "released", 1, parent.tree_len());
        assert_eq!(parent.handler_count(), 0);
        parent.cancel();
        crate::test_complete!("dropping_last_handle_releases_record");
    }

    #[test]
    fn detach_after_release_is_noop() {
        init_test("detach_after_release_is_noop");
        let source = CancellationSource::new();
        let (_hits, handler) = counter();
        let detach = source.add_event_handler(handler);
        drop(source);
        assert!(!detach.is_attached());
        assert!(!detach.detach());
        crate::test_complete!("detach_after_release_is_noop");
    }
}
