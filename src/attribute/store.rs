use std::cell::RefCell;
use std::fmt;

use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use super::id::{AttributeId, Kind};
use super::node::{IndirectNode, Node, WeakAttributeId, MAX_INDIRECT_OFFSET};
use crate::metadata::TypeRegistry;
use crate::primitives::arena::{Arena, ArenaOptions, ArenaPtr, ZonePages};
use crate::primitives::table::HashTable;
use crate::types::{Error, PageId, Result, TypeId, ZoneId};

const NODE_RECORD_SIZE: u32 = 28;
const INDIRECT_RECORD_SIZE: u32 = 16;
const MUTABLE_INDIRECT_RECORD_SIZE: u32 = 40;

/// Storage the resolver reads attribute records from.
///
/// Handing out a pointer that does not name a live record of the requested
/// type is a contract violation; implementations abort rather than return.
pub trait AttributeStore {
    /// Node record behind `ptr`.
    fn node(&self, ptr: ArenaPtr<Node>) -> &Node;

    /// Indirection record behind `ptr`.
    fn indirect_node(&self, ptr: ArenaPtr<IndirectNode>) -> &IndirectNode;

    /// Zone owning `page`, if any.
    fn page_owner(&self, page: PageId) -> Option<ZoneId>;

    /// Returns `true` once the zone recorded in `weak` no longer owns its attribute.
    fn is_expired(&self, weak: WeakAttributeId) -> bool;

    /// Revalidates `dependency` ahead of reading a mutable indirection's source.
    fn update_dependency(&self, dependency: AttributeId);

    /// Byte size of values of type `ty`, when known.
    fn value_size(&self, ty: TypeId) -> Option<usize>;
}

/// Parameters of an indirection created through [`MemoryStore::add_indirect`].
#[derive(Clone, Debug)]
pub struct IndirectSpec {
    source: AttributeId,
    offset: u32,
    size: Option<usize>,
    weak: bool,
    mutable: Option<Option<AttributeId>>,
}

impl IndirectSpec {
    /// Plain indirection to `source` at offset zero.
    pub fn to(source: AttributeId) -> Self {
        Self {
            source,
            offset: 0,
            size: None,
            weak: false,
            mutable: None,
        }
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    pub fn size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub fn weak(mut self) -> Self {
        self.weak = true;
        self
    }

    /// Makes the indirection retargetable.
    pub fn mutable(mut self) -> Self {
        self.mutable = Some(self.mutable.flatten());
        self
    }

    /// Makes the indirection retargetable and revalidated against `dependency`.
    pub fn tracking(mut self, dependency: AttributeId) -> Self {
        self.mutable = Some(Some(dependency));
        self
    }
}

#[derive(Default)]
struct Zone {
    pages: ZonePages,
    invalidated: bool,
}

fn live_zone(zones: &mut FxHashMap<ZoneId, Zone>, zone: ZoneId) -> Result<&mut Zone> {
    match zones.get_mut(&zone) {
        None => Err(Error::UnknownZone(zone)),
        Some(state) if state.invalidated => Err(Error::ZoneInvalidated(zone)),
        Some(state) => Ok(state),
    }
}

type RefreshHook = Box<dyn Fn(AttributeId)>;

/// In-memory [`AttributeStore`] over an [`Arena`].
///
/// Records are allocated in their zone's arena pages and located through
/// pointer-keyed [`HashTable`]s. Dependency refreshes are handed
/// to an optional hook.
pub struct MemoryStore {
    arena: Arena,
    zones: FxHashMap<ZoneId, Zone>,
    next_zone: u32,
    nodes: Vec<Node>,
    node_index: HashTable<ArenaPtr<Node>, usize>,
    indirects: Vec<IndirectNode>,
    indirect_index: HashTable<ArenaPtr<IndirectNode>, usize>,
    types: TypeRegistry,
    refreshes: RefCell<Vec<AttributeId>>,
    recording: bool,
    refresh_hook: Option<RefreshHook>,
}

impl MemoryStore {
    /// Creates a store resolving value types through `types`.
    pub fn new(types: TypeRegistry) -> Result<Self> {
        Self::with_options(types, ArenaOptions::default())
    }

    pub fn with_options(types: TypeRegistry, options: ArenaOptions) -> Result<Self> {
        Ok(Self {
            arena: Arena::new(options)?,
            zones: FxHashMap::default(),
            next_zone: 1,
            nodes: Vec::new(),
            node_index: HashTable::new(),
            indirects: Vec::new(),
            indirect_index: HashTable::new(),
            types,
            refreshes: RefCell::new(Vec::new()),
            recording: false,
            refresh_hook: None,
        })
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub fn types_mut(&mut self) -> &mut TypeRegistry {
        &mut self.types
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn indirect_count(&self) -> usize {
        self.indirects.len()
    }

    /// Opens a new zone.
    pub fn create_zone(&mut self) -> ZoneId {
        let zone = ZoneId(self.next_zone);
        self.next_zone += 1;
        self.zones.insert(zone, Zone::default());
        debug!(zone = zone.0, "store.zone.create");
        zone
    }

    /// Invalidates `zone`, expiring every weak reference into it.
    pub fn invalidate_zone(&mut self, zone: ZoneId) -> Result<()> {
        let state = live_zone(&mut self.zones, zone)?;
        state.invalidated = true;
        debug!(zone = zone.0, pages = state.pages.pages().len(), "store.zone.invalidate");
        Ok(())
    }

    /// Returns `true` for a known zone that has not been invalidated.
    pub fn is_zone_valid(&self, zone: ZoneId) -> bool {
        self.zones.get(&zone).is_some_and(|state| !state.invalidated)
    }

    fn alloc(&mut self, zone: ZoneId, size: u32) -> Result<ArenaPtr<()>> {
        let state = live_zone(&mut self.zones, zone)?;
        Ok(state.pages.alloc(&mut self.arena, zone, size))
    }

    /// Adds a concrete node holding a value of type `ty`.
    pub fn add_node(&mut self, zone: ZoneId, ty: TypeId) -> Result<AttributeId> {
        self.types.get(ty)?;
        let ptr = self.alloc(zone, NODE_RECORD_SIZE)?.cast::<Node>();
        self.node_index.insert(ptr, self.nodes.len());
        self.nodes.push(Node::new(ty));
        let attribute = AttributeId::from_node(ptr);
        trace!(%attribute, zone = zone.0, ty = ty.0, "store.node.add");
        Ok(attribute)
    }

    /// Adds an indirection described by `spec`.
    pub fn add_indirect(&mut self, zone: ZoneId, spec: IndirectSpec) -> Result<AttributeId> {
        if spec.offset > MAX_INDIRECT_OFFSET {
            return Err(Error::InvalidArgument(format!(
                "indirection offset {} exceeds {}",
                spec.offset, MAX_INDIRECT_OFFSET
            )));
        }
        self.check_live(spec.source)?;
        if let Some(Some(dependency)) = spec.mutable {
            self.check_live(dependency)?;
        }
        let record_size = if spec.mutable.is_some() {
            MUTABLE_INDIRECT_RECORD_SIZE
        } else {
            INDIRECT_RECORD_SIZE
        };
        let ptr = self.alloc(zone, record_size)?.cast::<IndirectNode>();
        let source = self.weak(spec.source);
        self.indirect_index.insert(ptr, self.indirects.len());
        self.indirects.push(IndirectNode::new(
            source,
            spec.offset,
            spec.size,
            spec.weak,
            spec.mutable,
        ));
        let attribute = AttributeId::from_indirect(ptr);
        trace!(%attribute, source = %spec.source, offset = spec.offset, "store.indirect.add");
        Ok(attribute)
    }

    /// Adds an indirection projecting the dotted field `path` out of
    /// `source`, whose value has type `base`.
    pub fn add_projection(
        &mut self,
        zone: ZoneId,
        source: AttributeId,
        base: TypeId,
        path: &str,
    ) -> Result<AttributeId> {
        let projection = self.types.projection(base, path)?;
        let offset = u32::try_from(projection.offset).map_err(|_| {
            Error::InvalidArgument(format!("projection offset {} overflows", projection.offset))
        })?;
        let mut spec = IndirectSpec::to(source).offset(offset);
        if let Some(size) = projection.size {
            spec = spec.size(size);
        }
        self.add_indirect(zone, spec)
    }

    /// Points the mutable indirection `attribute` at `source`.
    pub fn set_source(&mut self, attribute: AttributeId, source: AttributeId, offset: u32) -> Result<()> {
        if offset > MAX_INDIRECT_OFFSET {
            return Err(Error::InvalidArgument(format!(
                "indirection offset {offset} exceeds {MAX_INDIRECT_OFFSET}"
            )));
        }
        self.check_live(source)?;
        let weak = self.weak(source);
        self.mutable_record(attribute)?.retarget(weak, offset);
        debug!(%attribute, %source, offset, "store.indirect.retarget");
        Ok(())
    }

    /// Restores the source a mutable indirection was created with.
    pub fn reset_source(&mut self, attribute: AttributeId) -> Result<()> {
        self.mutable_record(attribute)?.reset();
        Ok(())
    }

    fn mutable_record(&mut self, attribute: AttributeId) -> Result<&mut IndirectNode> {
        let index = if attribute.is_indirect() {
            self.indirect_index.lookup(&attribute.to_indirect_ptr())
        } else {
            None
        };
        match index.map(|index| &mut self.indirects[index]) {
            Some(record) if record.is_mutable() => Ok(record),
            _ => Err(Error::InvalidArgument(format!(
                "{attribute} is not a mutable indirection"
            ))),
        }
    }

    /// Rejects dangling references and references into invalidated zones.
    fn check_live(&self, attribute: AttributeId) -> Result<()> {
        let known = match attribute.kind() {
            Kind::Direct if attribute.is_direct() => {
                self.node_index.contains_key(&attribute.to_node_ptr())
            }
            Kind::Indirect => self.indirect_index.contains_key(&attribute.to_indirect_ptr()),
            Kind::Reserved => false,
            Kind::Direct | Kind::Nil => true,
        };
        if !known {
            return Err(Error::InvalidArgument(format!("{attribute} names no record")));
        }
        match attribute.zone(self) {
            Some(zone) if !self.is_zone_valid(zone) => Err(Error::ZoneInvalidated(zone)),
            _ => Ok(()),
        }
    }

    fn weak(&self, attribute: AttributeId) -> WeakAttributeId {
        WeakAttributeId::new(attribute, attribute.zone(self))
    }

    /// Turns the refresh log on or off. Turning it off discards what was logged.
    pub fn record_refreshes(&mut self, enabled: bool) {
        self.recording = enabled;
        if !enabled {
            self.refreshes.get_mut().clear();
        }
    }

    /// Drains the dependencies refreshed while recording since the last call.
    pub fn take_refreshes(&self) -> Vec<AttributeId> {
        self.refreshes.take()
    }

    /// Installs a hook run on every dependency refresh.
    pub fn set_refresh_hook(&mut self, hook: impl Fn(AttributeId) + 'static) {
        self.refresh_hook = Some(Box::new(hook));
    }
}

impl AttributeStore for MemoryStore {
    fn node(&self, ptr: ArenaPtr<Node>) -> &Node {
        match self.node_index.lookup(&ptr) {
            Some(index) => &self.nodes[index],
            None => crate::precondition_failure!("no node at {:?}", ptr),
        }
    }

    fn indirect_node(&self, ptr: ArenaPtr<IndirectNode>) -> &IndirectNode {
        match self.indirect_index.lookup(&ptr) {
            Some(index) => &self.indirects[index],
            None => crate::precondition_failure!("no indirection at {:?}", ptr),
        }
    }

    fn page_owner(&self, page: PageId) -> Option<ZoneId> {
        self.arena.page_owner(page)
    }

    fn is_expired(&self, weak: WeakAttributeId) -> bool {
        let Some(zone) = weak.zone() else {
            return false;
        };
        !self.is_zone_valid(zone) || weak.attribute().zone(self) != Some(zone)
    }

    fn update_dependency(&self, dependency: AttributeId) {
        trace!(%dependency, "store.dependency.refresh");
        if self.recording {
            self.refreshes.borrow_mut().push(dependency);
        }
        if let Some(hook) = &self.refresh_hook {
            hook(dependency);
        }
    }

    fn value_size(&self, ty: TypeId) -> Option<usize> {
        self.types.byte_size(ty)
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("zones", &self.zones.len())
            .field("pages", &self.arena.page_count())
            .field("nodes", &self.nodes.len())
            .field("indirects", &self.indirects.len())
            .finish()
    }
}
