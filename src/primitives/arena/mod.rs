#![forbid(unsafe_code)]

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::profile::{record, ProfileCounter};
use crate::types::{Error, PageId, Result, ZoneId};

/// Size in bytes of an arena page.
pub const PAGE_SIZE: u32 = 0x200;
/// Shift converting an arena offset into a page index.
pub const PAGE_SHIFT: u32 = PAGE_SIZE.trailing_zeros();
/// Mask selecting the in-page part of an arena offset.
pub const PAGE_MASK: u32 = PAGE_SIZE - 1;
/// Minimum alignment of every arena allocation. Leaves the two low bits free for tags.
pub const ARENA_ALIGN: u32 = 4;

/// Page-relative pointer into an [`Arena`].
///
/// The pointer is a 32-bit byte offset into the arena's single address
/// space; the page it lives in is `offset >> PAGE_SHIFT`. Offset zero is the
/// null pointer and is never handed out.
#[repr(transparent)]
pub struct ArenaPtr<T> {
    offset: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ArenaPtr<T> {
    /// The null pointer.
    pub const NULL: Self = Self::from_offset(0);

    /// Wraps a raw arena offset.
    pub const fn from_offset(offset: u32) -> Self {
        Self {
            offset,
            _marker: PhantomData,
        }
    }

    /// Returns the raw arena offset.
    pub const fn offset(self) -> u32 {
        self.offset
    }

    /// Returns `true` for the null pointer.
    pub const fn is_null(self) -> bool {
        self.offset == 0
    }

    /// Reinterprets the pointee type.
    pub const fn cast<U>(self) -> ArenaPtr<U> {
        ArenaPtr::from_offset(self.offset)
    }

    /// Returns the page containing the pointer.
    pub const fn page(self) -> PageId {
        PageId(self.offset >> PAGE_SHIFT)
    }

    /// Returns the offset of the pointer within its page.
    pub const fn page_offset(self) -> u32 {
        self.offset & PAGE_MASK
    }

    /// Returns the absolute address of the pointee in the arena's address space.
    pub const fn to_absolute(self) -> usize {
        self.offset as usize
    }

    /// Returns `true` when the offset satisfies the arena alignment.
    pub const fn is_aligned(self) -> bool {
        self.offset % ARENA_ALIGN == 0
    }
}

impl<T> Clone for ArenaPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ArenaPtr<T> {}

impl<T> PartialEq for ArenaPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.offset == other.offset
    }
}

impl<T> Eq for ArenaPtr<T> {}

impl<T> Hash for ArenaPtr<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.offset.hash(state);
    }
}

impl<T> fmt::Debug for ArenaPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArenaPtr({:#x})", self.offset)
    }
}

/// Configuration for an [`Arena`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArenaOptions {
    /// Maximum number of pages the arena may hand out. `None` means the
    /// whole 32-bit address space.
    pub max_pages: Option<u32>,
}

impl ArenaOptions {
    /// Limits the number of pages the arena may hand out.
    pub fn max_pages(mut self, pages: u32) -> Self {
        self.max_pages = Some(pages);
        self
    }

    /// Checks that the options describe a usable arena.
    pub fn validate(&self) -> Result<()> {
        match self.max_pages {
            Some(0) => Err(Error::InvalidArgument("arena needs at least one page".into())),
            Some(pages) if pages > Arena::ADDRESSABLE_PAGES => Err(Error::InvalidArgument(
                format!("arena cannot address more than {} pages", Arena::ADDRESSABLE_PAGES),
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct PageInfo {
    zone: Option<ZoneId>,
    used: u32,
}

/// Page allocator backing every arena pointer.
///
/// Pages belong to exactly one zone. Page zero is reserved so that no
/// allocation ever lives at offset zero.
pub struct Arena {
    options: ArenaOptions,
    pages: Vec<PageInfo>,
}

impl Arena {
    /// Number of pages a 32-bit offset can address, minus the reserved page.
    pub const ADDRESSABLE_PAGES: u32 = (u32::MAX >> PAGE_SHIFT) - 1;

    /// Creates an arena after validating `options`.
    pub fn new(options: ArenaOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            options,
            pages: vec![PageInfo {
                zone: None,
                used: PAGE_SIZE,
            }],
        })
    }

    /// Returns the number of pages handed out so far.
    pub fn page_count(&self) -> u32 {
        (self.pages.len() - 1) as u32
    }

    /// Returns the zone owning `page`, or `None` for unknown or reserved pages.
    pub fn page_owner(&self, page: PageId) -> Option<ZoneId> {
        self.pages.get(page.0 as usize).and_then(|info| info.zone)
    }

    /// Hands a fresh page to `zone`.
    ///
    /// Running out of pages is a fatal condition.
    pub fn alloc_page(&mut self, zone: ZoneId) -> PageId {
        let limit = self
            .options
            .max_pages
            .unwrap_or(Self::ADDRESSABLE_PAGES);
        if self.page_count() >= limit {
            crate::precondition_failure!("arena exhausted: {} pages in use", limit);
        }
        let page = PageId(self.pages.len() as u32);
        self.pages.push(PageInfo { zone: Some(zone), used: 0 });
        record(ProfileCounter::ArenaPage, 1);
        debug!(page = page.0, zone = zone.0, "arena.page.alloc");
        page
    }

    /// Bump-allocates `size` bytes in `page`, returning `None` when the page is full.
    pub fn alloc_in(&mut self, page: PageId, size: u32) -> Option<ArenaPtr<()>> {
        let info = self.pages.get_mut(page.0 as usize)?;
        info.zone?;
        let start = align_up(info.used, ARENA_ALIGN);
        let end = start.checked_add(size)?;
        if end > PAGE_SIZE {
            return None;
        }
        info.used = end;
        let ptr = ArenaPtr::from_offset((page.0 << PAGE_SHIFT) | start);
        trace!(page = page.0, offset = ptr.offset(), size, "arena.alloc");
        Some(ptr)
    }
}

fn align_up(value: u32, align: u32) -> u32 {
    (value + align - 1) & !(align - 1)
}

/// Allocation cursor of a zone: the pages it owns and the page it bumps into.
#[derive(Debug, Default)]
pub struct ZonePages {
    pages: SmallVec<[PageId; 4]>,
}

impl ZonePages {
    /// Returns the pages owned by the zone, oldest first.
    pub fn pages(&self) -> &[PageId] {
        &self.pages
    }

    /// Allocates `size` bytes for `zone`, opening a new page when the current one is full.
    pub fn alloc(&mut self, arena: &mut Arena, zone: ZoneId, size: u32) -> ArenaPtr<()> {
        if size == 0 || size > PAGE_SIZE {
            crate::precondition_failure!("arena allocation of {} bytes does not fit a page", size);
        }
        if let Some(&page) = self.pages.last() {
            if let Some(ptr) = arena.alloc_in(page, size) {
                return ptr;
            }
        }
        let page = arena.alloc_page(zone);
        self.pages.push(page);
        match arena.alloc_in(page, size) {
            Some(ptr) => ptr,
            None => crate::precondition_failure!("fresh page {} rejected {} bytes", page, size),
        }
    }
}
