//! Resolution of attribute references through chains of indirection.
//!
//! Each hop inspects one indirection record and either stops or follows the
//! record's source, accumulating its structural offset. The per-hop decision
//! is shared by [`AttributeId::resolve_slow`], [`AttributeId::traverses`] and
//! [`AttributeId::chain`] so the three always agree on the path taken.

use smallvec::SmallVec;
use tracing::trace;

use super::id::{AttributeId, OffsetAttributeId, TraversalOptions};
use super::store::AttributeStore;
use crate::profile::{record, ProfileCounter};

/// Hops after which a chain is considered cyclic.
pub const MAX_INDIRECTION_DEPTH: usize = 1 << 16;

enum Step {
    /// `current` is terminal.
    Stop,
    /// Mutable indirection left unfollowed under `SKIP_MUTABLE_REFERENCE`.
    Pinned,
    /// Weak source has expired; resolution ends at nil.
    Expired,
    Follow { source: AttributeId, offset: u32 },
}

fn step<S: AttributeStore + ?Sized>(
    store: &S,
    current: AttributeId,
    options: TraversalOptions,
) -> Step {
    if !current.is_indirect() {
        return Step::Stop;
    }
    let ptr = current.to_indirect_ptr();
    if options.contains(TraversalOptions::UPDATE_DEPENDENCIES) {
        if let Some(dependency) = store.indirect_node(ptr).dependency() {
            store.update_dependency(dependency);
        }
    }
    let indirect = store.indirect_node(ptr);
    if options.contains(TraversalOptions::SKIP_MUTABLE_REFERENCE) && indirect.is_mutable() {
        return Step::Pinned;
    }
    if indirect.is_weak()
        && options.contains(TraversalOptions::EVALUATE_WEAK_REFERENCES)
        && !options.contains(TraversalOptions::ASSERT_NOT_NIL)
        && store.is_expired(indirect.source())
    {
        return Step::Expired;
    }
    Step::Follow {
        source: indirect.source().attribute(),
        offset: indirect.offset(),
    }
}

fn check_depth(start: AttributeId, hops: usize) {
    if hops > MAX_INDIRECTION_DEPTH {
        crate::precondition_failure!(
            "indirection cycle: {} still unresolved after {} hops",
            start,
            MAX_INDIRECTION_DEPTH
        );
    }
}

impl AttributeId {
    /// Resolves `self` to a concrete attribute and byte offset.
    ///
    /// Direct references resolve to themselves at offset zero without
    /// touching the store.
    #[inline]
    pub fn resolve<S: AttributeStore + ?Sized>(
        self,
        store: &S,
        options: TraversalOptions,
    ) -> OffsetAttributeId {
        if self.is_direct() {
            return OffsetAttributeId::new(self, 0);
        }
        self.resolve_slow(store, options)
    }

    /// Full resolution loop; see [`TraversalOptions`] for the modifiers.
    ///
    /// # Panics
    ///
    /// When `ASSERT_NOT_NIL` is set and resolution ends at nil or unset, or
    /// when the chain exceeds [`MAX_INDIRECTION_DEPTH`] hops.
    pub fn resolve_slow<S: AttributeStore + ?Sized>(
        self,
        store: &S,
        options: TraversalOptions,
    ) -> OffsetAttributeId {
        record(ProfileCounter::ResolveSlowCall, 1);
        let mut current = self;
        let mut offset: u32 = 0;
        let mut hops = 0usize;
        let mut traversed = false;
        loop {
            match step(store, current, options) {
                Step::Stop | Step::Pinned => break,
                Step::Expired => {
                    record(ProfileCounter::ResolveWeakExpired, 1);
                    trace!(from = %current, "resolve.weak.expired");
                    current = AttributeId::nil();
                    offset = 0;
                    traversed = true;
                    break;
                }
                Step::Follow { source, offset: delta } => {
                    hops += 1;
                    check_depth(self, hops);
                    offset = match offset.checked_add(delta) {
                        Some(offset) => offset,
                        None => crate::precondition_failure!("offset overflow resolving {}", self),
                    };
                    traversed = true;
                    current = source;
                }
            }
        }
        record(ProfileCounter::ResolveHop, hops as u64);

        if options.contains(TraversalOptions::ASSERT_NOT_NIL) && (current.is_nil() || current.is_unset()) {
            crate::precondition_failure!("{} resolved to {} under ASSERT_NOT_NIL", self, current);
        }
        if options.contains(TraversalOptions::REPORT_INDIRECTION_IN_OFFSET) {
            offset = match (traversed, offset.checked_add(1)) {
                (false, _) => 0,
                (true, Some(reported)) => reported,
                (true, None) => crate::precondition_failure!(
                    "offset overflow reporting indirection for {}",
                    self
                ),
            };
        }
        trace!(from = %self, to = %current, offset, hops, "resolve.slow");
        OffsetAttributeId::new(current, offset)
    }

    /// Returns `true` when resolving `self` under `options` visits `other`,
    /// counting the start and the terminal reference.
    pub fn traverses<S: AttributeStore + ?Sized>(
        self,
        store: &S,
        other: AttributeId,
        options: TraversalOptions,
    ) -> bool {
        let mut current = self;
        let mut hops = 0usize;
        loop {
            if current == other {
                return true;
            }
            match step(store, current, options) {
                Step::Stop | Step::Pinned => return false,
                Step::Expired => return other.is_nil(),
                Step::Follow { source, .. } => {
                    hops += 1;
                    check_depth(self, hops);
                    current = source;
                }
            }
        }
    }

    /// Every reference visited by resolution, start to terminal.
    pub fn chain<S: AttributeStore + ?Sized>(
        self,
        store: &S,
        options: TraversalOptions,
    ) -> SmallVec<[AttributeId; 8]> {
        let mut visited = SmallVec::new();
        let mut current = self;
        loop {
            visited.push(current);
            match step(store, current, options) {
                Step::Stop | Step::Pinned => return visited,
                Step::Expired => {
                    visited.push(AttributeId::nil());
                    return visited;
                }
                Step::Follow { source, .. } => {
                    check_depth(self, visited.len());
                    current = source;
                }
            }
        }
    }
}
