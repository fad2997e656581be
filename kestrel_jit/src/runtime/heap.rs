//! Heap access capabilities for compile threads.
//!
//! A thread may touch heap objects only through a [`LocalHeap`] that is
//! unparked. Parking tells the collector the thread holds no raw heap
//! references and may be ignored at a safepoint. Handles created on the main
//! thread travel to workers as [`PersistentHandles`], attached to a worker's
//! local heap for the duration of a [`LocalHeapScope`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

// =============================================================================
// Heap
// =============================================================================

#[derive(Debug, Default)]
struct HeapCounters {
    local_heaps: AtomicUsize,
    unparked: AtomicUsize,
}

/// The shared heap. Owns the main thread's [`LocalHeap`].
#[derive(Debug)]
pub struct Heap {
    counters: Arc<HeapCounters>,
    main_thread: LocalHeap,
}

impl Heap {
    pub fn new() -> Self {
        let counters = Arc::new(HeapCounters::default());
        let main_thread = LocalHeap::attach(&counters, ThreadKind::Main);
        Self {
            counters,
            main_thread,
        }
    }

    /// The main thread's local heap. Starts unparked.
    pub fn main_thread_local_heap(&self) -> &LocalHeap {
        &self.main_thread
    }

    /// Create a parked local heap for a background thread.
    pub fn new_background_local_heap(&self) -> LocalHeap {
        LocalHeap::attach(&self.counters, ThreadKind::Background)
    }

    /// Local heaps currently attached, the main thread's included.
    pub fn local_heap_count(&self) -> usize {
        self.counters.local_heaps.load(Ordering::Acquire)
    }

    /// Local heaps currently unparked.
    pub fn unparked_count(&self) -> usize {
        self.counters.unparked.load(Ordering::Acquire)
    }

    /// Panics in debug builds if the main thread is parked.
    pub fn assert_main_thread_unparked(&self) {
        self.main_thread.assert_unparked();
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Local Heap
// =============================================================================

/// Which thread a [`LocalHeap`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadKind {
    Main,
    Background,
}

/// Per-thread heap access capability.
#[derive(Debug)]
pub struct LocalHeap {
    counters: Arc<HeapCounters>,
    kind: ThreadKind,
    parked: AtomicBool,
    persistent_handles: Mutex<Option<PersistentHandles>>,
}

impl LocalHeap {
    fn attach(counters: &Arc<HeapCounters>, kind: ThreadKind) -> Self {
        counters.local_heaps.fetch_add(1, Ordering::AcqRel);
        let parked = kind == ThreadKind::Background;
        if !parked {
            counters.unparked.fetch_add(1, Ordering::AcqRel);
        }
        Self {
            counters: Arc::clone(counters),
            kind,
            parked: AtomicBool::new(parked),
            persistent_handles: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> ThreadKind {
        self.kind
    }

    pub fn is_main_thread(&self) -> bool {
        self.kind == ThreadKind::Main
    }

    pub fn is_parked(&self) -> bool {
        self.parked.load(Ordering::Acquire)
    }

    pub fn park(&self) {
        let was_parked = self.parked.swap(true, Ordering::AcqRel);
        debug_assert!(!was_parked, "local heap parked twice");
        if !was_parked {
            self.counters.unparked.fetch_sub(1, Ordering::AcqRel);
        }
    }

    pub fn unpark(&self) {
        let was_parked = self.parked.swap(false, Ordering::AcqRel);
        debug_assert!(was_parked, "local heap unparked twice");
        if was_parked {
            self.counters.unparked.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Panics in debug builds if the heap is parked.
    pub fn assert_unparked(&self) {
        debug_assert!(
            !self.is_parked(),
            "heap access from a parked {:?} thread",
            self.kind
        );
    }

    pub fn has_persistent_handles(&self) -> bool {
        self.persistent_handles.lock().is_some()
    }

    /// Number of handles in the attached block, or 0.
    pub fn persistent_handle_count(&self) -> usize {
        self.persistent_handles
            .lock()
            .as_ref()
            .map_or(0, PersistentHandles::len)
    }

    fn attach_persistent_handles(&self, handles: PersistentHandles) {
        let previous = self.persistent_handles.lock().replace(handles);
        debug_assert!(previous.is_none(), "persistent handles already attached");
    }

    fn detach_persistent_handles(&self) -> Option<PersistentHandles> {
        self.persistent_handles.lock().take()
    }
}

impl Drop for LocalHeap {
    fn drop(&mut self) {
        debug_assert!(
            self.persistent_handles.get_mut().is_none(),
            "local heap dropped with persistent handles attached"
        );
        if !*self.parked.get_mut() {
            self.counters.unparked.fetch_sub(1, Ordering::AcqRel);
        }
        self.counters.local_heaps.fetch_sub(1, Ordering::AcqRel);
    }
}

// =============================================================================
// Persistent Handles
// =============================================================================

/// Object references that outlive the handle scope that created them.
///
/// Each handle is the tagged address of a heap object. The block is owned by
/// exactly one thread at a time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistentHandles {
    handles: Vec<u64>,
}

impl PersistentHandles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handle and return its index.
    pub fn new_handle(&mut self, address: u64) -> usize {
        self.handles.push(address);
        self.handles.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<u64> {
        self.handles.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

// =============================================================================
// Scopes
// =============================================================================

/// Unparks a local heap and lends it a block of persistent handles.
///
/// On drop the handles go back into `slot` and the heap returns to its
/// previous parked state.
pub struct LocalHeapScope<'a> {
    local_heap: &'a LocalHeap,
    slot: &'a mut Option<PersistentHandles>,
    unparked_here: bool,
}

impl<'a> LocalHeapScope<'a> {
    pub fn new(local_heap: &'a LocalHeap, slot: &'a mut Option<PersistentHandles>) -> Self {
        let unparked_here = local_heap.is_parked();
        if unparked_here {
            local_heap.unpark();
        }
        if let Some(handles) = slot.take() {
            local_heap.attach_persistent_handles(handles);
        }
        Self {
            local_heap,
            slot,
            unparked_here,
        }
    }

    pub fn local_heap(&self) -> &LocalHeap {
        self.local_heap
    }
}

impl Drop for LocalHeapScope<'_> {
    fn drop(&mut self) {
        *self.slot = self.local_heap.detach_persistent_handles();
        if self.unparked_here {
            self.local_heap.park();
        }
    }
}

/// Parks a local heap for the lifetime of the scope.
pub struct ParkedScope<'a> {
    local_heap: &'a LocalHeap,
}

impl<'a> ParkedScope<'a> {
    pub fn new(local_heap: &'a LocalHeap) -> Self {
        local_heap.park();
        Self { local_heap }
    }
}

impl Drop for ParkedScope<'_> {
    fn drop(&mut self) {
        self.local_heap.unpark();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_main_thread_starts_unparked() {
        let heap = Heap::new();
        assert!(!heap.main_thread_local_heap().is_parked());
        assert!(heap.main_thread_local_heap().is_main_thread());
        assert_eq!(heap.local_heap_count(), 1);
        assert_eq!(heap.unparked_count(), 1);
    }

    #[test]
    fn test_background_starts_parked() {
        let heap = Heap::new();
        let local = heap.new_background_local_heap();
        assert!(local.is_parked());
        assert_eq!(local.kind(), ThreadKind::Background);
        assert_eq!(heap.local_heap_count(), 2);
        assert_eq!(heap.unparked_count(), 1);

        drop(local);
        assert_eq!(heap.local_heap_count(), 1);
    }

    #[test]
    fn test_parked_scope_restores() {
        let heap = Heap::new();
        {
            let _parked = ParkedScope::new(heap.main_thread_local_heap());
            assert!(heap.main_thread_local_heap().is_parked());
            assert_eq!(heap.unparked_count(), 0);
        }
        heap.assert_main_thread_unparked();
        assert_eq!(heap.unparked_count(), 1);
    }

    #[test]
    fn test_local_heap_scope_lends_handles() {
        let heap = Heap::new();
        let local = heap.new_background_local_heap();
        let mut handles = PersistentHandles::new();
        assert_eq!(handles.new_handle(0x1001), 0);
        assert_eq!(handles.new_handle(0x2001), 1);
        let mut slot = Some(handles);

        {
            let scope = LocalHeapScope::new(&local, &mut slot);
            scope.local_heap().assert_unparked();
            assert_eq!(scope.local_heap().persistent_handle_count(), 2);
            assert_eq!(heap.unparked_count(), 2);
        }

        assert!(local.is_parked());
        assert!(!local.has_persistent_handles());
        let handles = slot.expect("handles returned to the slot");
        assert_eq!(handles.get(1), Some(0x2001));
        assert_eq!(handles.get(2), None);
    }

    #[test]
    fn test_local_heap_scope_on_unparked_heap_keeps_it_unparked() {
        let heap = Heap::new();
        let mut slot = None;
        {
            let _scope = LocalHeapScope::new(heap.main_thread_local_heap(), &mut slot);
        }
        assert!(!heap.main_thread_local_heap().is_parked());
        assert!(slot.is_none());
    }
}
