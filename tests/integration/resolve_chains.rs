#![allow(clippy::all)]

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Once;

use attrgraph::attribute::{MAX_INDIRECT_OFFSET, MAX_INDIRECTION_DEPTH};
use attrgraph::metadata::{TypeDescriptor, TypeRegistry};
use attrgraph::primitives::arena::ArenaPtr;
use attrgraph::types::{Result, TypeId, ZoneId};
use attrgraph::{
    AttributeId, IndirectSpec, Kind, MemoryStore, OffsetAttributeId, TraversalOptions,
};
use proptest::prelude::*;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("attrgraph=warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

struct Graph {
    store: MemoryStore,
    zone: ZoneId,
    int: TypeId,
}

impl Graph {
    fn new() -> Result<Self> {
        init_tracing();
        let mut types = TypeRegistry::new();
        let int = types.register(TypeDescriptor::structure("Int", 8))?;
        let mut store = MemoryStore::new(types)?;
        let zone = store.create_zone();
        Ok(Self { store, zone, int })
    }

    fn node(&mut self) -> Result<AttributeId> {
        self.store.add_node(self.zone, self.int)
    }

    fn indirect(&mut self, spec: IndirectSpec) -> Result<AttributeId> {
        self.store.add_indirect(self.zone, spec)
    }

    /// Builds `node <- hop(offsets[0]) <- hop(offsets[1]) ...` and returns
    /// the node and the outermost reference.
    fn chain_of(&mut self, offsets: &[u32]) -> Result<(AttributeId, AttributeId)> {
        let node = self.node()?;
        let mut outer = node;
        for &offset in offsets {
            outer = self.indirect(IndirectSpec::to(outer).offset(offset))?;
        }
        Ok((node, outer))
    }
}

const REPORT: TraversalOptions = TraversalOptions::REPORT_INDIRECTION_IN_OFFSET;
const WEAK: TraversalOptions = TraversalOptions::EVALUATE_WEAK_REFERENCES;

#[test]
fn offsets_accumulate_along_the_chain() -> Result<()> {
    let mut graph = Graph::new()?;
    let (node, outer) = graph.chain_of(&[4, 8, 16])?;
    let store = &graph.store;

    assert_eq!(
        outer.resolve(store, TraversalOptions::NONE),
        OffsetAttributeId::new(node, 28)
    );
    assert_eq!(outer.resolve(store, REPORT), OffsetAttributeId::new(node, 29));
    let chain = outer.chain(store, TraversalOptions::NONE);
    assert_eq!(chain.len(), 4);
    assert_eq!(chain[0], outer);
    assert_eq!(chain[3], node);
    assert!(chain[1..3].iter().all(|hop| hop.kind() == Kind::Indirect));
    Ok(())
}

#[test]
fn reported_offset_distinguishes_direct_from_zero_hop() -> Result<()> {
    let mut graph = Graph::new()?;
    let (node, alias) = graph.chain_of(&[0])?;
    let store = &graph.store;
    assert_eq!(node.resolve(store, REPORT).offset(), 0);
    assert_eq!(node.resolve_slow(store, REPORT).offset(), 0);
    assert_eq!(alias.resolve(store, REPORT), OffsetAttributeId::new(node, 1));
    assert_eq!(alias.resolve(store, TraversalOptions::NONE).offset(), 0);
    Ok(())
}

#[test]
fn nil_terminated_chains_resolve_to_nil() -> Result<()> {
    let mut graph = Graph::new()?;
    let dangling = graph.indirect(IndirectSpec::to(AttributeId::nil()).offset(12))?;
    let store = &graph.store;
    assert_eq!(
        dangling.resolve(store, TraversalOptions::NONE),
        OffsetAttributeId::new(AttributeId::nil(), 12)
    );
    assert_eq!(dangling.resolve(store, REPORT).offset(), 13);
    assert!(dangling.traverses(store, AttributeId::nil(), TraversalOptions::NONE));
    Ok(())
}

#[test]
#[should_panic(expected = "ASSERT_NOT_NIL")]
fn asserting_not_nil_on_a_nil_chain_is_fatal() {
    let mut graph = Graph::new().unwrap();
    let dangling = graph.indirect(IndirectSpec::to(AttributeId::nil())).unwrap();
    dangling.resolve(&graph.store, TraversalOptions::ASSERT_NOT_NIL);
}

#[test]
#[should_panic(expected = "ASSERT_NOT_NIL")]
fn asserting_not_nil_on_unset_is_fatal() {
    let graph = Graph::new().unwrap();
    AttributeId::unset().resolve(&graph.store, TraversalOptions::ASSERT_NOT_NIL);
}

#[test]
fn unset_resolves_to_itself() -> Result<()> {
    let graph = Graph::new()?;
    let resolved = AttributeId::unset().resolve(&graph.store, REPORT);
    assert!(resolved.attribute().is_unset());
    assert_eq!(resolved.offset(), 0);
    Ok(())
}

#[test]
#[should_panic(expected = "indirection cycle")]
fn self_referencing_indirection_is_fatal() {
    let mut graph = Graph::new().unwrap();
    let node = graph.node().unwrap();
    let loop_ = graph.indirect(IndirectSpec::to(node).mutable()).unwrap();
    graph.store.set_source(loop_, loop_, 0).unwrap();
    loop_.resolve(&graph.store, TraversalOptions::NONE);
}

#[test]
fn cycles_behind_a_mutable_hop_are_not_entered_when_skipped() -> Result<()> {
    let mut graph = Graph::new()?;
    let node = graph.node()?;
    let loop_ = graph.indirect(IndirectSpec::to(node).mutable())?;
    graph.store.set_source(loop_, loop_, 0)?;
    let resolved = loop_.resolve(&graph.store, TraversalOptions::SKIP_MUTABLE_REFERENCE);
    assert_eq!(resolved, OffsetAttributeId::new(loop_, 0));
    Ok(())
}

#[test]
#[should_panic(expected = "offset overflow")]
fn overflowing_the_accumulated_offset_is_fatal() {
    let mut graph = Graph::new().unwrap();
    let (_, outer) = graph.chain_of(&[MAX_INDIRECT_OFFSET; 5]).unwrap();
    outer.resolve(&graph.store, TraversalOptions::NONE);
}

fn chain_summing_to(graph: &mut Graph, last: u32) -> (AttributeId, AttributeId) {
    let offsets = [MAX_INDIRECT_OFFSET, MAX_INDIRECT_OFFSET, MAX_INDIRECT_OFFSET, MAX_INDIRECT_OFFSET, last];
    graph.chain_of(&offsets).unwrap()
}

#[test]
fn reported_offsets_stay_distinct_up_to_the_limit() -> Result<()> {
    let mut graph = Graph::new()?;
    let (node, short) = chain_summing_to(&mut graph, 2);
    let (_, full) = chain_summing_to(&mut graph, 3);
    let store = &graph.store;
    assert_eq!(short.resolve(store, TraversalOptions::NONE).offset(), u32::MAX - 1);
    assert_eq!(full.resolve(store, TraversalOptions::NONE).offset(), u32::MAX);
    assert_eq!(short.resolve(store, REPORT), OffsetAttributeId::new(node, u32::MAX));
    Ok(())
}

#[test]
#[should_panic(expected = "offset overflow")]
fn reporting_an_offset_of_u32_max_is_fatal() {
    let mut graph = Graph::new().unwrap();
    let (_, full) = chain_summing_to(&mut graph, 3);
    full.resolve(&graph.store, REPORT);
}

#[test]
fn expired_weak_sources_resolve_to_nil() -> Result<()> {
    let mut graph = Graph::new()?;
    let source_zone = graph.store.create_zone();
    let target = graph.store.add_node(source_zone, graph.int)?;
    let weak = graph.indirect(IndirectSpec::to(target).offset(4).weak())?;
    let strong = graph.indirect(IndirectSpec::to(target).offset(4))?;

    assert_eq!(
        weak.resolve(&graph.store, WEAK),
        OffsetAttributeId::new(target, 4)
    );
    graph.store.invalidate_zone(source_zone)?;
    let store = &graph.store;

    assert_eq!(
        weak.resolve(store, WEAK),
        OffsetAttributeId::new(AttributeId::nil(), 0)
    );
    assert_eq!(weak.resolve(store, WEAK | REPORT).offset(), 1);
    assert_eq!(weak.chain(store, WEAK).as_slice(), &[weak, AttributeId::nil()]);
    assert!(weak.traverses(store, AttributeId::nil(), WEAK));
    assert!(!weak.traverses(store, target, WEAK));

    // Without weak evaluation, or when a non-nil result is demanded, the
    // stale source is still followed.
    assert_eq!(
        weak.resolve(store, TraversalOptions::NONE),
        OffsetAttributeId::new(target, 4)
    );
    assert_eq!(
        weak.resolve(store, WEAK | TraversalOptions::ASSERT_NOT_NIL),
        OffsetAttributeId::new(target, 4)
    );
    assert_eq!(strong.resolve(store, WEAK), OffsetAttributeId::new(target, 4));
    Ok(())
}

#[test]
fn skipping_mutable_references_stops_at_them() -> Result<()> {
    let mut graph = Graph::new()?;
    let node = graph.node()?;
    let mutable = graph.indirect(IndirectSpec::to(node).offset(8).mutable())?;
    let outer = graph.indirect(IndirectSpec::to(mutable).offset(4))?;
    let store = &graph.store;

    let skip = TraversalOptions::SKIP_MUTABLE_REFERENCE;
    assert_eq!(outer.resolve(store, skip), OffsetAttributeId::new(mutable, 4));
    assert_eq!(outer.resolve(store, skip | REPORT).offset(), 5);
    assert_eq!(
        outer.resolve(store, TraversalOptions::NONE),
        OffsetAttributeId::new(node, 12)
    );
    assert!(!outer.traverses(store, node, skip));
    assert!(outer.traverses(store, mutable, skip));
    assert_eq!(outer.chain(store, skip).as_slice(), &[outer, mutable]);
    Ok(())
}

#[test]
fn dependencies_are_refreshed_once_per_tracking_hop() -> Result<()> {
    let mut graph = Graph::new()?;
    let calls = Rc::new(Cell::new(0usize));
    let counter = Rc::clone(&calls);
    graph
        .store
        .set_refresh_hook(move |_| counter.set(counter.get() + 1));
    graph.store.record_refreshes(true);

    let node = graph.node()?;
    let (inner_dep, outer_dep) = (graph.node()?, graph.node()?);
    let inner = graph.indirect(IndirectSpec::to(node).tracking(inner_dep))?;
    let middle = graph.indirect(IndirectSpec::to(inner).offset(2))?;
    let outer = graph.indirect(IndirectSpec::to(middle).tracking(outer_dep))?;
    let store = &graph.store;

    assert_eq!(
        outer.resolve(store, TraversalOptions::NONE),
        OffsetAttributeId::new(node, 2)
    );
    assert!(store.take_refreshes().is_empty());
    assert_eq!(calls.get(), 0);

    let resolved = outer.resolve(store, TraversalOptions::UPDATE_DEPENDENCIES);
    assert_eq!(resolved, OffsetAttributeId::new(node, 2));
    assert_eq!(store.take_refreshes(), vec![outer_dep, inner_dep]);
    assert_eq!(calls.get(), 2);

    // A skipped mutable hop is still refreshed before it is inspected.
    let pinned = outer.resolve(
        store,
        TraversalOptions::UPDATE_DEPENDENCIES | TraversalOptions::SKIP_MUTABLE_REFERENCE,
    );
    assert_eq!(pinned, OffsetAttributeId::new(outer, 0));
    assert_eq!(store.take_refreshes(), vec![outer_dep]);
    Ok(())
}

#[test]
fn refresh_log_stays_empty_unless_recording() -> Result<()> {
    let mut graph = Graph::new()?;
    let calls = Rc::new(Cell::new(0usize));
    let counter = Rc::clone(&calls);
    graph
        .store
        .set_refresh_hook(move |_| counter.set(counter.get() + 1));

    let node = graph.node()?;
    let dependency = graph.node()?;
    let tracked = graph.indirect(IndirectSpec::to(node).tracking(dependency))?;
    for _ in 0..1_000 {
        tracked.resolve(&graph.store, TraversalOptions::UPDATE_DEPENDENCIES);
    }
    assert!(graph.store.take_refreshes().is_empty());
    assert_eq!(calls.get(), 1_000);

    graph.store.record_refreshes(true);
    tracked.resolve(&graph.store, TraversalOptions::UPDATE_DEPENDENCIES);
    graph.store.record_refreshes(false);
    assert!(graph.store.take_refreshes().is_empty());
    assert_eq!(calls.get(), 1_001);
    Ok(())
}

#[test]
fn retargeting_changes_every_dependent_resolution() -> Result<()> {
    let mut graph = Graph::new()?;
    let (first, second) = (graph.node()?, graph.node()?);
    let mutable = graph.indirect(IndirectSpec::to(first).mutable())?;
    let outer = graph.indirect(IndirectSpec::to(mutable).offset(3))?;
    assert!(outer.traverses(&graph.store, first, TraversalOptions::NONE));

    graph.store.set_source(mutable, second, 5)?;
    assert_eq!(
        outer.resolve(&graph.store, TraversalOptions::NONE),
        OffsetAttributeId::new(second, 8)
    );
    assert!(!outer.traverses(&graph.store, first, TraversalOptions::NONE));
    assert!(outer.traverses(&graph.store, second, TraversalOptions::NONE));
    Ok(())
}

#[test]
fn long_chains_below_the_depth_limit_resolve() -> Result<()> {
    let mut graph = Graph::new()?;
    let hops = vec![1u32; 2048];
    assert!(hops.len() < MAX_INDIRECTION_DEPTH);
    let (node, outer) = graph.chain_of(&hops)?;
    assert_eq!(
        outer.resolve(&graph.store, TraversalOptions::NONE),
        OffsetAttributeId::new(node, 2048)
    );
    assert_eq!(outer.chain(&graph.store, TraversalOptions::NONE).len(), 2049);
    Ok(())
}

proptest! {
    #[test]
    fn prop_with_kind_preserves_pointer_bits(word in 1u32..(1 << 30)) {
        let node = AttributeId::from_node(ArenaPtr::from_offset(word << 2));
        for kind in [Kind::Direct, Kind::Indirect, Kind::Nil, Kind::Reserved] {
            let tagged = node.with_kind(kind);
            prop_assert_eq!(tagged.kind(), kind);
            prop_assert_eq!(tagged.raw() & !0x3, node.raw());
            prop_assert_eq!(tagged.with_kind(Kind::Direct), node);
        }
    }

    #[test]
    fn prop_resolution_sums_hop_offsets(offsets in prop::collection::vec(0u32..4096, 1..24)) {
        let mut graph = Graph::new().unwrap();
        let (node, outer) = graph.chain_of(&offsets).unwrap();
        let total: u32 = offsets.iter().sum();
        let store = &graph.store;

        let plain = outer.resolve(store, TraversalOptions::NONE);
        prop_assert_eq!(plain, OffsetAttributeId::new(node, total));
        prop_assert_eq!(outer.resolve_slow(store, TraversalOptions::NONE), plain);
        prop_assert_eq!(outer.resolve(store, REPORT).offset(), total + 1);
        prop_assert_eq!(outer.chain(store, TraversalOptions::NONE).len(), offsets.len() + 1);
        prop_assert!(outer.traverses(store, node, TraversalOptions::NONE));
        prop_assert!(!node.traverses(store, outer, TraversalOptions::NONE));
    }
}
