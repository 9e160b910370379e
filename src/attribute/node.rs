use super::id::AttributeId;
use crate::types::{TypeId, ZoneId};

/// Largest structural offset an indirection can carry.
pub const MAX_INDIRECT_OFFSET: u32 = (1 << 30) - 1;

/// Concrete attribute node. Only the value type matters to resolution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    ty: TypeId,
}

impl Node {
    pub fn new(ty: TypeId) -> Self {
        Self { ty }
    }

    /// Type of the node's value.
    pub fn ty(&self) -> TypeId {
        self.ty
    }
}

/// An attribute reference paired with the zone that owned it when the
/// reference was taken. Expires once that zone is invalidated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WeakAttributeId {
    attribute: AttributeId,
    zone: Option<ZoneId>,
}

impl WeakAttributeId {
    pub fn new(attribute: AttributeId, zone: Option<ZoneId>) -> Self {
        Self { attribute, zone }
    }

    pub fn attribute(&self) -> AttributeId {
        self.attribute
    }

    /// Zone recorded when the reference was taken; `None` for nil or unset sources.
    pub fn zone(&self) -> Option<ZoneId> {
        self.zone
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct MutableState {
    dependency: Option<AttributeId>,
    initial_source: WeakAttributeId,
    initial_offset: u32,
}

/// Indirection record forwarding resolution to a source attribute.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndirectNode {
    source: WeakAttributeId,
    offset: u32,
    size: Option<usize>,
    weak: bool,
    mutable: Option<MutableState>,
}

impl IndirectNode {
    pub(crate) fn new(
        source: WeakAttributeId,
        offset: u32,
        size: Option<usize>,
        weak: bool,
        mutable: Option<Option<AttributeId>>,
    ) -> Self {
        Self {
            source,
            offset,
            size,
            weak,
            mutable: mutable.map(|dependency| MutableState {
                dependency,
                initial_source: source,
                initial_offset: offset,
            }),
        }
    }

    pub fn source(&self) -> WeakAttributeId {
        self.source
    }

    /// Structural byte offset added when projecting into the source's value.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Byte size of the projected value, when known.
    pub fn size(&self) -> Option<usize> {
        self.size
    }

    pub fn is_weak(&self) -> bool {
        self.weak
    }

    pub fn is_mutable(&self) -> bool {
        self.mutable.is_some()
    }

    /// Attribute this mutable indirection revalidates itself against.
    pub fn dependency(&self) -> Option<AttributeId> {
        self.mutable.as_ref().and_then(|state| state.dependency)
    }

    pub(crate) fn retarget(&mut self, source: WeakAttributeId, offset: u32) {
        self.source = source;
        self.offset = offset;
    }

    /// Restores the source and offset the record was created with.
    pub(crate) fn reset(&mut self) {
        if let Some(state) = &self.mutable {
            self.source = state.initial_source;
            self.offset = state.initial_offset;
        }
    }
}
