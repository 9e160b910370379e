use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use super::node::{IndirectNode, Node};
use super::store::AttributeStore;
use crate::primitives::arena::{ArenaPtr, PAGE_SHIFT};
use crate::types::{PageId, ZoneId};

const KIND_MASK: u32 = 0x3;

/// Kind tag stored in the two low bits of an [`AttributeId`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Kind {
    /// Points at a concrete node.
    Direct = 0,
    /// Points at an indirection record.
    Indirect = 1,
    /// Resolved to nothing; carries no pointer.
    Nil = 2,
    /// Unused bit pattern.
    Reserved = 3,
}

/// Tagged 32-bit reference to an attribute.
///
/// The low two bits hold the [`Kind`]; the rest is the arena offset of the
/// referenced record, which is always 4-byte aligned. The all-zero value is
/// the *unset* reference and is distinct from [`AttributeId::nil`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AttributeId(u32);

impl AttributeId {
    /// References a concrete node.
    pub fn from_node(node: ArenaPtr<Node>) -> Self {
        Self::tagged(node.cast(), Kind::Direct)
    }

    /// References an indirection record.
    pub fn from_indirect(indirect: ArenaPtr<IndirectNode>) -> Self {
        Self::tagged(indirect.cast(), Kind::Indirect)
    }

    fn tagged(ptr: ArenaPtr<()>, kind: Kind) -> Self {
        if ptr.is_null() || !ptr.is_aligned() {
            crate::precondition_failure!("cannot tag arena pointer {:?} as {:?}", ptr, kind);
        }
        Self(ptr.offset() | kind as u32)
    }

    /// The nil reference.
    pub const fn nil() -> Self {
        Self(Kind::Nil as u32)
    }

    /// The unset reference.
    pub const fn unset() -> Self {
        Self(0)
    }

    /// Raw 32-bit encoding.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Kind encoded in the low bits.
    pub const fn kind(self) -> Kind {
        match self.0 & KIND_MASK {
            0 => Kind::Direct,
            1 => Kind::Indirect,
            2 => Kind::Nil,
            _ => Kind::Reserved,
        }
    }

    /// Copy of `self` with the kind bits replaced and every other bit kept.
    pub const fn with_kind(self, kind: Kind) -> Self {
        Self((self.0 & !KIND_MASK) | kind as u32)
    }

    /// A set identifier of kind `Direct`; the all-zero value is not direct.
    pub const fn is_direct(self) -> bool {
        self.0 != 0 && self.0 & KIND_MASK == Kind::Direct as u32
    }

    /// Refers to an indirect node.
    pub const fn is_indirect(self) -> bool {
        self.0 & KIND_MASK == Kind::Indirect as u32
    }

    /// Carries the nil kind, whatever its other bits.
    pub const fn is_nil(self) -> bool {
        self.0 & KIND_MASK == Kind::Nil as u32
    }

    /// The all-zero value, never handed out by a store.
    pub const fn is_unset(self) -> bool {
        self.0 == 0
    }

    const fn pointer_bits(self) -> u32 {
        self.0 & !KIND_MASK
    }

    /// Pointer to the referenced node. The reference must be direct.
    pub fn to_node_ptr(self) -> ArenaPtr<Node> {
        if !self.is_direct() {
            crate::precondition_failure!("{:?} is not a direct attribute", self);
        }
        ArenaPtr::from_offset(self.pointer_bits())
    }

    /// Pointer to the referenced indirection record. The reference must be indirect.
    pub fn to_indirect_ptr(self) -> ArenaPtr<IndirectNode> {
        if !self.is_indirect() {
            crate::precondition_failure!("{:?} is not an indirect attribute", self);
        }
        ArenaPtr::from_offset(self.pointer_bits())
    }

    /// Arena page holding the referenced record.
    pub const fn page_ptr(self) -> PageId {
        PageId(self.pointer_bits() >> PAGE_SHIFT)
    }

    /// Zone owning the referenced record, or `None` when the reference is
    /// not backed by arena storage.
    pub fn zone<S: AttributeStore + ?Sized>(self, store: &S) -> Option<ZoneId> {
        if self.pointer_bits() == 0 || self.is_nil() {
            return None;
        }
        store.page_owner(self.page_ptr())
    }

    /// Best-effort byte size of the referenced value.
    ///
    /// Direct references report the size of their node's value type,
    /// indirect ones the size recorded on the indirection.
    pub fn size<S: AttributeStore + ?Sized>(self, store: &S) -> Option<usize> {
        match self.kind() {
            Kind::Direct if self.is_direct() => store.value_size(store.node(self.to_node_ptr()).ty()),
            Kind::Indirect => store.indirect_node(self.to_indirect_ptr()).size(),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unset() {
            return f.write_str("unset");
        }
        match self.kind() {
            Kind::Direct => write!(f, "#{:#x}", self.pointer_bits()),
            Kind::Indirect => write!(f, "#{:#x}*", self.pointer_bits()),
            Kind::Nil => f.write_str("nil"),
            Kind::Reserved => write!(f, "reserved({:#x})", self.0),
        }
    }
}

impl fmt::Debug for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AttributeId({self})")
    }
}

/// Modifiers for attribute resolution. Any combination is legal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TraversalOptions(u32);

impl TraversalOptions {
    /// Plain resolution with no modifiers.
    pub const NONE: Self = Self(0);
    /// Refresh each indirection's tracked dependency before reading its source.
    pub const UPDATE_DEPENDENCIES: Self = Self(1 << 0);
    /// The resolved attribute must not be nil; nil is a fatal error.
    pub const ASSERT_NOT_NIL: Self = Self(1 << 1);
    /// Stop at the first mutable indirection instead of following it.
    pub const SKIP_MUTABLE_REFERENCE: Self = Self(1 << 2);
    /// Report `0` when no indirection was traversed, otherwise the offset plus one.
    pub const REPORT_INDIRECTION_IN_OFFSET: Self = Self(1 << 3);
    /// Resolve to nil when a weak indirection's source has expired.
    /// Ignored together with `ASSERT_NOT_NIL`.
    pub const EVALUATE_WEAK_REFERENCES: Self = Self(1 << 4);

    /// Raw flag bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns `true` when every bit of `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for TraversalOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for TraversalOptions {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for TraversalOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(TraversalOptions, &str); 5] = [
            (TraversalOptions::UPDATE_DEPENDENCIES, "UPDATE_DEPENDENCIES"),
            (TraversalOptions::ASSERT_NOT_NIL, "ASSERT_NOT_NIL"),
            (TraversalOptions::SKIP_MUTABLE_REFERENCE, "SKIP_MUTABLE_REFERENCE"),
            (
                TraversalOptions::REPORT_INDIRECTION_IN_OFFSET,
                "REPORT_INDIRECTION_IN_OFFSET",
            ),
            (
                TraversalOptions::EVALUATE_WEAK_REFERENCES,
                "EVALUATE_WEAK_REFERENCES",
            ),
        ];
        let mut set = f.debug_set();
        for (flag, name) in NAMES {
            if self.contains(flag) {
                set.entry(&format_args!("{name}"));
            }
        }
        set.finish()
    }
}

/// An attribute together with a byte offset into its value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct OffsetAttributeId {
    attribute: AttributeId,
    offset: u32,
}

impl OffsetAttributeId {
    /// Pairs `attribute` with a byte `offset`.
    pub const fn new(attribute: AttributeId, offset: u32) -> Self {
        Self { attribute, offset }
    }

    /// The attribute holding the value.
    pub const fn attribute(self) -> AttributeId {
        self.attribute
    }

    /// Byte offset into the attribute's value.
    pub const fn offset(self) -> u32 {
        self.offset
    }
}

impl fmt::Display for OffsetAttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.attribute, self.offset)
    }
}
