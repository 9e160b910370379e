use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::OnceLock;

/// Snapshot of resolver and table profiling counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProfileSnapshot {
    /// Number of resolutions that entered the slow path.
    pub resolve_slow_calls: u64,
    /// Number of indirection records followed by the slow path.
    pub resolve_hops: u64,
    /// Number of weak references that resolved to nil.
    pub resolve_weak_expired: u64,
    /// Number of bucket-array growths.
    pub table_grows: u64,
    /// Number of growths refused at the maximum bucket width.
    pub table_grow_refused: u64,
    /// Number of inserts served from a table's free list.
    pub table_spare_reuses: u64,
    /// Number of inserts that needed a fresh heap slot.
    pub table_fresh_allocs: u64,
    /// Number of arena pages handed out.
    pub arena_pages: u64,
}

/// Counter selector for [`record`].
#[derive(Clone, Copy, Debug)]
pub enum ProfileCounter {
    /// Resolution slow-path entry.
    ResolveSlowCall,
    /// Indirection hops followed.
    ResolveHop,
    /// Weak reference evaluated to nil.
    ResolveWeakExpired,
    /// Bucket array doubled.
    TableGrow,
    /// Bucket growth refused at the width cap.
    TableGrowRefused,
    /// Insert reused a retired entry.
    TableSpareReuse,
    /// Insert allocated a fresh entry.
    TableFreshAlloc,
    /// Arena page allocation.
    ArenaPage,
}

#[derive(Default)]
struct ProfileCounters {
    resolve_slow_calls: AtomicU64,
    resolve_hops: AtomicU64,
    resolve_weak_expired: AtomicU64,
    table_grows: AtomicU64,
    table_grow_refused: AtomicU64,
    table_spare_reuses: AtomicU64,
    table_fresh_allocs: AtomicU64,
    arena_pages: AtomicU64,
}

impl ProfileCounters {
    fn slot(&self, counter: ProfileCounter) -> &AtomicU64 {
        match counter {
            ProfileCounter::ResolveSlowCall => &self.resolve_slow_calls,
            ProfileCounter::ResolveHop => &self.resolve_hops,
            ProfileCounter::ResolveWeakExpired => &self.resolve_weak_expired,
            ProfileCounter::TableGrow => &self.table_grows,
            ProfileCounter::TableGrowRefused => &self.table_grow_refused,
            ProfileCounter::TableSpareReuse => &self.table_spare_reuses,
            ProfileCounter::TableFreshAlloc => &self.table_fresh_allocs,
            ProfileCounter::ArenaPage => &self.arena_pages,
        }
    }
}

/// Environment variable that turns profiling on at first use.
pub const PROFILE_ENV: &str = "ATTRGRAPH_PROFILE";

static PROFILE_ENABLED: OnceLock<AtomicBool> = OnceLock::new();
static PROFILE_COUNTERS: OnceLock<ProfileCounters> = OnceLock::new();

fn enabled_flag() -> &'static AtomicBool {
    PROFILE_ENABLED.get_or_init(|| AtomicBool::new(std::env::var_os(PROFILE_ENV).is_some()))
}

/// Returns whether profiling counters are being collected.
pub fn profiling_enabled() -> bool {
    enabled_flag().load(Ordering::Relaxed)
}

/// Turns profiling on or off for the rest of the process.
pub fn set_profiling_enabled(enabled: bool) {
    enabled_flag().store(enabled, Ordering::Relaxed);
}

fn counters() -> Option<&'static ProfileCounters> {
    profiling_enabled().then(|| PROFILE_COUNTERS.get_or_init(ProfileCounters::default))
}

/// Adds `amount` to `counter` when profiling is enabled.
#[inline]
pub fn record(counter: ProfileCounter, amount: u64) {
    if let Some(counters) = counters() {
        counters.slot(counter).fetch_add(amount, Ordering::Relaxed);
    }
}

/// Retrieves a snapshot of current profiling counters, optionally resetting them.
pub fn profile_snapshot(reset: bool) -> Option<ProfileSnapshot> {
    let counters = counters()?;
    let load = |counter: &AtomicU64| {
        if reset {
            counter.swap(0, Ordering::Relaxed)
        } else {
            counter.load(Ordering::Relaxed)
        }
    };
    Some(ProfileSnapshot {
        resolve_slow_calls: load(&counters.resolve_slow_calls),
        resolve_hops: load(&counters.resolve_hops),
        resolve_weak_expired: load(&counters.resolve_weak_expired),
        table_grows: load(&counters.table_grows),
        table_grow_refused: load(&counters.table_grow_refused),
        table_spare_reuses: load(&counters.table_spare_reuses),
        table_fresh_allocs: load(&counters.table_fresh_allocs),
        arena_pages: load(&counters.arena_pages),
    })
}
