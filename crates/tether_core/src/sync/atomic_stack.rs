//! # Atomic Stack
//!
//! Multi-producer intrusive stack with compare-and-swap push.
//!
//! ## Safety Note
//!
//! This module requires unsafe code for raw node links.
//! Every unsafe block documents which ownership rule makes it sound.

#![allow(unsafe_code)]
//!
//! ## Consumers
//!
//! Nodes leave the stack in two ways:
//! - [`AtomicStack::take_all`] detaches the whole chain with one swap
//! - [`AtomicStack::pop_node`] unlinks the head with a CAS loop
//!
//! Removal is guarded by a consumer flag taken with a single CAS. A remover
//! that loses the race does not wait: `pop_node` reports an empty stack and
//! `take_all` returns an empty drain, so the nodes are picked up next time.
//! With one remover at a time a node cannot be unlinked and re-pushed while
//! another thread still reads its link, which rules out ABA.

use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

/// Stack node. Boxed nodes can be moved between stacks to avoid allocation.
pub struct Node<T> {
    value: T,
    next: *mut Node<T>,
}

impl<T> Node<T> {
    /// Allocates a detached node.
    #[must_use]
    pub fn new(value: T) -> Box<Self> {
        Box::new(Self {
            value,
            next: ptr::null_mut(),
        })
    }

    /// The carried value.
    #[inline]
    #[must_use]
    pub const fn value(&self) -> &T {
        &self.value
    }

    /// Mutable access to the carried value.
    #[inline]
    pub fn value_mut(&mut self) -> &mut T {
        &mut self.value
    }

    /// Swaps in a new value, returning the old one.
    #[inline]
    pub fn replace(&mut self, value: T) -> T {
        std::mem::replace(&mut self.value, value)
    }

    /// Consumes the node.
    #[inline]
    #[must_use]
    pub fn into_inner(self: Box<Self>) -> T {
        self.value
    }
}

// SAFETY: `next` is only dereferenced by the stack that owns the chain; a
// detached node owns nothing but its value.
unsafe impl<T: Send> Send for Node<T> {}

/// Lock-free LIFO stack.
///
/// # Thread Safety
///
/// Any number of threads may push concurrently. Removal never blocks; see
/// the module documentation for how competing removers are resolved.
///
/// # Example
///
/// ```rust,ignore
/// let stack = AtomicStack::new();
/// stack.push(1);
/// stack.push(2);
///
/// let values: Vec<i32> = stack.take_all().map(Node::into_inner).collect();
/// assert_eq!(values, vec![2, 1]);
/// ```
pub struct AtomicStack<T> {
    head: AtomicPtr<Node<T>>,
    consumer: AtomicBool,
    _owns: PhantomData<Box<Node<T>>>,
}

// SAFETY: values move between threads only through whole-node ownership
// transfers published with Release and observed with Acquire.
unsafe impl<T: Send> Send for AtomicStack<T> {}
// SAFETY: see above; shared access only performs atomic operations on `head`
// and `consumer`.
unsafe impl<T: Send> Sync for AtomicStack<T> {}

impl<T> AtomicStack<T> {
    /// Creates an empty stack.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
            consumer: AtomicBool::new(false),
            _owns: PhantomData,
        }
    }

    /// Whether the stack currently holds no nodes.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }

    /// Pushes a value in a freshly allocated node.
    pub fn push(&self, value: T) {
        self.push_node(Node::new(value));
    }

    /// Pushes an existing node.
    pub fn push_node(&self, node: Box<Node<T>>) {
        let raw = Box::into_raw(node);
        // SAFETY: `raw` came from `Box::into_raw` and is owned by this call
        // until the CAS in `push_chain` publishes it.
        unsafe {
            (*raw).next = ptr::null_mut();
            self.push_chain(raw, raw);
        }
    }

    /// Pops the most recently pushed node.
    ///
    /// # Returns
    ///
    /// `None` if the stack is empty or another remover is active.
    pub fn pop_node(&self) -> Option<Box<Node<T>>> {
        if !self.acquire_consumer() {
            return None;
        }

        let mut head = self.head.load(Ordering::Acquire);
        let popped = loop {
            if head.is_null() {
                break None;
            }
            // SAFETY: only the consumer-flag holder unlinks nodes, so `head`
            // stays allocated while we read its link.
            let next = unsafe { (*head).next };
            match self
                .head
                .compare_exchange_weak(head, next, Ordering::Acquire, Ordering::Acquire)
            {
                Ok(_) => {
                    // SAFETY: the CAS unlinked `head`; we are its sole owner.
                    let mut node = unsafe { Box::from_raw(head) };
                    node.next = ptr::null_mut();
                    break Some(node);
                }
                Err(current) => head = current,
            }
        };

        self.consumer.store(false, Ordering::Release);
        popped
    }

    /// Pops the most recently pushed value.
    pub fn pop(&self) -> Option<T> {
        self.pop_node().map(Node::into_inner)
    }

    /// Detaches every node pushed so far.
    ///
    /// Nodes pushed after the swap stay on the stack. Iteration order is
    /// most recent first.
    pub fn take_all(&self) -> Drain<T> {
        if !self.acquire_consumer() {
            return Drain::empty();
        }
        let head = self.head.swap(ptr::null_mut(), Ordering::Acquire);
        self.consumer.store(false, Ordering::Release);
        Drain {
            next: head,
            _owns: PhantomData,
        }
    }

    fn acquire_consumer(&self) -> bool {
        self.consumer
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Links `first..=last` in front of the current head.
    ///
    /// # Safety
    ///
    /// The caller must exclusively own the chain and `last` must be reachable
    /// from `first`.
    unsafe fn push_chain(&self, first: *mut Node<T>, last: *mut Node<T>) {
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            // SAFETY: the chain is unpublished, so nobody else touches `last`.
            unsafe { (*last).next = head };
            match self
                .head
                .compare_exchange_weak(head, first, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(current) => head = current,
            }
        }
    }
}

impl<T> Default for AtomicStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for AtomicStack<T> {
    fn drop(&mut self) {
        let head = std::mem::replace(self.head.get_mut(), ptr::null_mut());
        drop(Drain::<T> {
            next: head,
            _owns: PhantomData,
        });
    }
}

/// Detached chain returned by [`AtomicStack::take_all`].
///
/// Yields owned nodes so callers can recycle them; nodes left unconsumed are
/// freed on drop.
pub struct Drain<T> {
    next: *mut Node<T>,
    _owns: PhantomData<Box<Node<T>>>,
}

// SAFETY: the drain exclusively owns its detached chain.
unsafe impl<T: Send> Send for Drain<T> {}

impl<T> Drain<T> {
    const fn empty() -> Self {
        Self {
            next: ptr::null_mut(),
            _owns: PhantomData,
        }
    }
}

impl<T> Iterator for Drain<T> {
    type Item = Box<Node<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next.is_null() {
            return None;
        }
        // SAFETY: every pointer in a detached chain came from `Box::into_raw`
        // and is owned by this drain.
        let mut node = unsafe { Box::from_raw(self.next) };
        self.next = std::mem::replace(&mut node.next, ptr::null_mut());
        Some(node)
    }
}

impl<T> Drop for Drain<T> {
    fn drop(&mut self) {
        for _ in self.by_ref() {}
    }
}
