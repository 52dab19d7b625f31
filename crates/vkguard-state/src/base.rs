use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use ash::vk;
use parking_lot::Mutex;

/// A raw handle value tagged with its object type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypedHandle {
    pub raw: u64,
    pub ty: vk::ObjectType,
}

impl TypedHandle {
    pub fn new(raw: u64, ty: vk::ObjectType) -> Self {
        Self { raw, ty }
    }

    pub fn from_handle<H: vk::Handle>(handle: H) -> Self {
        Self {
            raw: handle.as_raw(),
            ty: H::TYPE,
        }
    }
}

impl fmt::Display for TypedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} 0x{:x}", self.ty, self.raw)
    }
}

/// Graph bookkeeping embedded in every state object.
#[derive(Default)]
pub struct StateNode {
    children: Mutex<Vec<(TypedHandle, Weak<dyn StateObject>)>>,
    destroyed: AtomicBool,
}

impl StateNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_child(&self, handle: TypedHandle, child: Weak<dyn StateObject>) {
        let mut children = self.children.lock();
        children.retain(|(_, weak)| weak.strong_count() > 0);
        if !children.iter().any(|(h, _)| *h == handle) {
            children.push((handle, child));
        }
    }

    pub fn remove_child(&self, handle: TypedHandle) {
        self.children.lock().retain(|(h, _)| *h != handle);
    }

    /// Live children, in link order.
    pub fn children(&self) -> Vec<Arc<dyn StateObject>> {
        self.children
            .lock()
            .iter()
            .filter_map(|(_, weak)| weak.upgrade())
            .collect()
    }

    pub fn child_count(&self) -> usize {
        self.children
            .lock()
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .count()
    }

    fn take_children(&self) -> Vec<Arc<dyn StateObject>> {
        std::mem::take(&mut *self.children.lock())
            .into_iter()
            .filter_map(|(_, weak)| weak.upgrade())
            .collect()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Returns false when the node was already destroyed.
    fn mark_destroyed(&self) -> bool {
        !self.destroyed.swap(true, Ordering::AcqRel)
    }
}

impl fmt::Debug for StateNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateNode")
            .field("children", &self.child_count())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

/// Common interface of every tracked object.
pub trait StateObject: Send + Sync {
    fn handle(&self) -> TypedHandle;

    fn node(&self) -> &StateNode;

    /// Objects this one holds an owning reference to and is registered
    /// under as a child.
    fn parents(&self) -> Vec<Arc<dyn StateObject>> {
        Vec::new()
    }

    /// `parent` is being destroyed: drop every reference to it. Must not
    /// destroy `self`.
    fn notify_invalidate(&self, _parent: TypedHandle) {}

    /// Drop all owning references to parents. Called once, when `self` is
    /// destroyed.
    fn release_parents(&self) {}

    fn is_destroyed(&self) -> bool {
        self.node().is_destroyed()
    }
}

impl fmt::Debug for dyn StateObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.handle())
    }
}

/// Register `child` under `parent` so that destroying the parent reaches it.
pub fn link<C: StateObject + 'static>(parent: &dyn StateObject, child: &Arc<C>) {
    let as_dyn: Arc<dyn StateObject> = child.clone();
    parent
        .node()
        .add_child(child.handle(), Arc::downgrade(&as_dyn));
}

/// Tear down one node: broadcast invalidation to its children, unlink it
/// from its parents, then release its own references. Repeated calls are
/// no-ops.
pub fn destroy_object(obj: &dyn StateObject) {
    if !obj.node().mark_destroyed() {
        return;
    }
    let me = obj.handle();
    for child in obj.node().take_children() {
        child.notify_invalidate(me);
    }
    for parent in obj.parents() {
        parent.node().remove_child(me);
    }
    obj.release_parents();
}

/// Clear `slot` if it points at `parent`.
pub(crate) fn clear_if<T: StateObject>(slot: &mut Option<Arc<T>>, parent: TypedHandle) -> bool {
    if slot.as_ref().is_some_and(|p| p.handle() == parent) {
        *slot = None;
        true
    } else {
        false
    }
}

pub(crate) fn as_parent<T: StateObject + 'static>(slot: &Option<Arc<T>>) -> Option<Arc<dyn StateObject>> {
    slot.as_ref().map(|p| p.clone() as Arc<dyn StateObject>)
}
