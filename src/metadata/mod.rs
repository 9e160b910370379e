//! Type metadata consumed by attribute sizing and structural projections.
//!
//! A [`TypeRegistry`] owns [`TypeDescriptor`]s addressed by [`TypeId`]. Each
//! descriptor records the kind, byte size and stored-field layout of a value
//! type; enum-like types carry cases instead of fields. Field types may be
//! unresolvable, mirroring metadata that cannot be introspected.

#![forbid(unsafe_code)]


use std::fmt;

use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::types::{Error, Result, TypeId};

/// Broad classification of a registered type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeKind {
    None,
    Class,
    Struct,
    Enum,
    Optional,
    Tuple,
    Function,
    Existential,
    Metatype,
}

impl TypeKind {
    fn is_nominal(self) -> bool {
        matches!(
            self,
            TypeKind::Class | TypeKind::Struct | TypeKind::Enum | TypeKind::Optional
        )
    }

    fn keyword(self) -> Option<&'static str> {
        match self {
            TypeKind::Class => Some("class"),
            TypeKind::Struct => Some("struct"),
            TypeKind::Enum | TypeKind::Optional => Some("enum"),
            _ => None,
        }
    }
}

/// Five-word structural signature of a type. All zero when unknown.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TypeSignature(pub [u32; 5]);

impl TypeSignature {
    /// Returns `true` for the all-zero signature.
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|word| *word == 0)
    }
}

/// Stored field of a struct, tuple or class layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldRecord {
    pub name: String,
    pub offset: usize,
    pub size: usize,
    /// `None` when the field's type cannot be resolved.
    pub ty: Option<TypeId>,
}

/// Case of an enum or optional; `payload` is `None` for payload-less or
/// unresolvable cases.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaseRecord {
    pub name: String,
    pub payload: Option<TypeId>,
}

/// Option bits for [`TypeRegistry::apply_fields_with`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ApplyOptions(u32);

impl ApplyOptions {
    pub const NONE: Self = Self(0);
    /// Visit the stored fields of class instances.
    pub const HEAP_CLASSES: Self = Self(1);
    /// Skip fields whose type cannot be resolved instead of failing.
    pub const CONTINUE_AFTER_UNKNOWN_FIELD: Self = Self(2);
    /// Visit enum and optional cases, passing the case index as the offset.
    pub const ENUM_CASES: Self = Self(4);

    /// Returns `true` when every bit of `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for ApplyOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Description of a value type.
#[derive(Clone, Debug)]
pub struct TypeDescriptor {
    name: String,
    kind: TypeKind,
    size: Option<usize>,
    signature: Option<TypeSignature>,
    fields: Vec<FieldRecord>,
    cases: Vec<CaseRecord>,
}

impl TypeDescriptor {
    /// Starts a descriptor of `kind` called `name`, with unknown size.
    pub fn new(kind: TypeKind, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            size: None,
            signature: None,
            fields: Vec::new(),
            cases: Vec::new(),
        }
    }

    /// Starts a struct descriptor of `size` bytes.
    pub fn structure(name: impl Into<String>, size: usize) -> Self {
        Self::new(TypeKind::Struct, name).size(size)
    }

    /// Sets the byte size.
    pub fn size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    /// Sets the structural signature.
    pub fn signature(mut self, signature: TypeSignature) -> Self {
        self.signature = Some(signature);
        self
    }

    /// Appends a stored field of type `ty`.
    pub fn field(mut self, name: impl Into<String>, offset: usize, size: usize, ty: TypeId) -> Self {
        self.fields.push(FieldRecord {
            name: name.into(),
            offset,
            size,
            ty: Some(ty),
        });
        self
    }

    /// Appends a stored field whose type cannot be resolved.
    pub fn opaque_field(mut self, name: impl Into<String>, offset: usize, size: usize) -> Self {
        self.fields.push(FieldRecord {
            name: name.into(),
            offset,
            size,
            ty: None,
        });
        self
    }

    /// Appends an enum case.
    pub fn case(mut self, name: impl Into<String>, payload: Option<TypeId>) -> Self {
        self.cases.push(CaseRecord {
            name: name.into(),
            payload,
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    pub fn fields(&self) -> &[FieldRecord] {
        &self.fields
    }

    pub fn cases(&self) -> &[CaseRecord] {
        &self.cases
    }

    fn validate(&self) -> Result<()> {
        if !self.cases.is_empty() && !matches!(self.kind, TypeKind::Enum | TypeKind::Optional) {
            return Err(Error::InvalidArgument(format!(
                "{:?} type `{}` cannot have cases",
                self.kind, self.name
            )));
        }
        if let Some(size) = self.size {
            let overruns =
                |f: &&FieldRecord| f.offset.checked_add(f.size).map_or(true, |end| end > size);
            if let Some(field) = self.fields.iter().find(overruns) {
                return Err(Error::InvalidArgument(format!(
                    "field `{}` of `{}` ends past its {} bytes",
                    field.name, self.name, size
                )));
            }
        }
        Ok(())
    }
}

/// Location of a projected field inside a value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Projection {
    pub offset: usize,
    pub size: Option<usize>,
    pub ty: Option<TypeId>,
}

/// Registry of type descriptors.
#[derive(Default)]
pub struct TypeRegistry {
    types: Vec<TypeDescriptor>,
    by_name: FxHashMap<String, TypeId>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `descriptor`, returning its id.
    ///
    /// Nominal types must have unique names; field and case types must
    /// already be registered.
    pub fn register(&mut self, descriptor: TypeDescriptor) -> Result<TypeId> {
        descriptor.validate()?;
        let referenced = descriptor
            .fields
            .iter()
            .filter_map(|f| f.ty)
            .chain(descriptor.cases.iter().filter_map(|c| c.payload));
        for ty in referenced {
            self.get(ty)?;
        }
        let id = TypeId(self.types.len() as u32 + 1);
        if descriptor.kind.is_nominal() {
            if self.by_name.contains_key(&descriptor.name) {
                return Err(Error::InvalidArgument(format!(
                    "type `{}` is already registered",
                    descriptor.name
                )));
            }
            self.by_name.insert(descriptor.name.clone(), id);
        }
        debug!(ty = id.0, name = %descriptor.name, kind = ?descriptor.kind, "metadata.register");
        self.types.push(descriptor);
        Ok(id)
    }

    /// Returns the descriptor of `id`.
    pub fn get(&self, id: TypeId) -> Result<&TypeDescriptor> {
        (id.0 as usize)
            .checked_sub(1)
            .and_then(|index| self.types.get(index))
            .ok_or(Error::UnknownType(id))
    }

    /// Finds a nominal type by name.
    pub fn lookup(&self, name: &str) -> Option<TypeId> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn kind(&self, id: TypeId) -> Result<TypeKind> {
        Ok(self.get(id)?.kind)
    }

    /// Kind-qualified name, e.g. `struct Point`.
    pub fn description(&self, id: TypeId) -> Result<String> {
        let ty = self.get(id)?;
        Ok(match ty.kind.keyword() {
            Some(keyword) => format!("{keyword} {}", ty.name),
            None => ty.name.clone(),
        })
    }

    pub fn signature(&self, id: TypeId) -> Result<Option<TypeSignature>> {
        Ok(self.get(id)?.signature)
    }

    /// Name of the nominal declaration behind `id`; `None` for structural types.
    pub fn nominal_name(&self, id: TypeId) -> Result<Option<&str>> {
        let ty = self.get(id)?;
        Ok(ty.kind.is_nominal().then_some(ty.name.as_str()))
    }

    /// Byte size of `id`, or `None` when unknown or unregistered.
    pub fn byte_size(&self, id: TypeId) -> Option<usize> {
        self.get(id).ok().and_then(|ty| ty.size)
    }

    pub fn field_layout(&self, id: TypeId) -> Result<&[FieldRecord]> {
        Ok(&self.get(id)?.fields)
    }

    /// Visits `(name, offset, type)` for each resolvable stored field of a
    /// struct, tuple or class. Unresolvable fields are skipped.
    pub fn apply_fields(&self, id: TypeId, mut body: impl FnMut(&str, usize, TypeId)) -> Result<()> {
        let ty = self.get(id)?;
        if !matches!(ty.kind, TypeKind::Struct | TypeKind::Tuple | TypeKind::Class) {
            return Ok(());
        }
        for field in &ty.fields {
            if let Some(field_ty) = field.ty {
                body(&field.name, field.offset, field_ty);
            }
        }
        Ok(())
    }

    /// Option-driven field visitor.
    ///
    /// Classes are visited only with `HEAP_CLASSES`; structs and tuples only
    /// without `HEAP_CLASSES` and `ENUM_CASES`; enums and optionals only with
    /// `ENUM_CASES`, in which case the case index takes the offset's place.
    /// Returns `false` when the type is not visited, when an unresolvable
    /// field is met without `CONTINUE_AFTER_UNKNOWN_FIELD`, or when `body`
    /// returns `false`.
    ///
    /// A `false` from `body` always ends the walk, even with
    /// `CONTINUE_AFTER_UNKNOWN_FIELD`; that flag only skips unresolvable fields.
    pub fn apply_fields_with(
        &self,
        id: TypeId,
        options: ApplyOptions,
        mut body: impl FnMut(&str, usize, TypeId) -> bool,
    ) -> Result<bool> {
        let ty = self.get(id)?;
        let heap = options.contains(ApplyOptions::HEAP_CLASSES);
        let cases = options.contains(ApplyOptions::ENUM_CASES);
        let continue_unknown = options.contains(ApplyOptions::CONTINUE_AFTER_UNKNOWN_FIELD);
        let fields = ty.fields.iter().map(|f| (f.name.as_str(), f.offset, f.ty));
        let enum_cases = ty
            .cases
            .iter()
            .enumerate()
            .map(|(index, c)| (c.name.as_str(), index, c.payload));
        Ok(match ty.kind {
            TypeKind::Class if heap => visit_members(fields, continue_unknown, &mut body),
            TypeKind::Struct | TypeKind::Tuple if !heap && !cases => {
                visit_members(fields, continue_unknown, &mut body)
            }
            TypeKind::Enum | TypeKind::Optional if cases => {
                visit_members(enum_cases, continue_unknown, &mut body)
            }
            _ => false,
        })
    }

    /// Resolves a dotted field path (`"origin.x"`) inside `id`.
    ///
    /// The empty path projects the whole value.
    pub fn projection(&self, id: TypeId, path: &str) -> Result<Projection> {
        let mut projection = Projection {
            offset: 0,
            size: self.get(id)?.size,
            ty: Some(id),
        };
        if path.is_empty() {
            return Ok(projection);
        }
        let mut parent = (id, "");
        for segment in path.split('.') {
            let Some(container) = projection.ty else {
                return Err(Error::UnresolvedFieldType {
                    ty: parent.0,
                    field: parent.1.to_string(),
                });
            };
            let field = self
                .field_layout(container)?
                .iter()
                .find(|f| f.name == segment)
                .ok_or_else(|| Error::UnknownField {
                    ty: container,
                    field: segment.to_string(),
                })?;
            let offset = projection.offset.checked_add(field.offset).ok_or_else(|| {
                Error::InvalidArgument(format!("offset of `{path}` overflows in `{id}`"))
            })?;
            projection = Projection {
                offset,
                size: Some(field.size),
                ty: field.ty,
            };
            parent = (container, segment);
        }
        Ok(projection)
    }

    /// Structural byte offset of a dotted field path inside `id`.
    pub fn field_offset(&self, id: TypeId, path: &str) -> Result<usize> {
        Ok(self.projection(id, path)?.offset)
    }
}

fn visit_members<'a>(
    members: impl Iterator<Item = (&'a str, usize, Option<TypeId>)>,
    continue_unknown: bool,
    body: &mut impl FnMut(&str, usize, TypeId) -> bool,
) -> bool {
    for (name, offset, ty) in members {
        match ty {
            Some(ty) => {
                if !body(name, offset, ty) {
                    return false;
                }
            }
            None if continue_unknown => trace!(field = name, "metadata.field.unknown"),
            None => return false,
        }
    }
    true
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.types.len())
            .finish()
    }
}
