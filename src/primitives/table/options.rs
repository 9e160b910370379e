use crate::types::{Error, Result};

/// Widest bucket array a table may ever reach (`1 << 30` buckets).
pub const MAX_BUCKET_WIDTH: u32 = 30;

/// Sizing policy for a [`super::HashTable`] and its entry heap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableOptions {
    /// Bucket-count exponent used when buckets are first created.
    pub initial_width: u32,
    /// Exponent beyond which growth is refused and chains get longer.
    pub max_width: u32,
    /// Average entries per bucket tolerated before the bucket array doubles.
    pub load_factor: u32,
    /// Entries reserved each time the heap runs out of slots.
    pub heap_increment: usize,
    /// Hard cap on heap slots; reaching it is fatal. `None` means unbounded.
    pub max_entries: Option<usize>,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            initial_width: 4,
            max_width: MAX_BUCKET_WIDTH,
            load_factor: 4,
            heap_increment: 64,
            max_entries: None,
        }
    }
}

impl TableOptions {
    /// Sets the initial bucket-count exponent.
    pub fn initial_width(mut self, width: u32) -> Self {
        self.initial_width = width;
        self
    }

    /// Sets the maximum bucket-count exponent.
    pub fn max_width(mut self, width: u32) -> Self {
        self.max_width = width;
        self
    }

    /// Sets the tolerated average chain length.
    pub fn load_factor(mut self, factor: u32) -> Self {
        self.load_factor = factor;
        self
    }

    /// Sets how many slots the heap reserves per growth step.
    pub fn heap_increment(mut self, entries: usize) -> Self {
        self.heap_increment = entries;
        self
    }

    /// Caps the number of heap slots.
    pub fn max_entries(mut self, entries: usize) -> Self {
        self.max_entries = Some(entries);
        self
    }

    /// Checks the options for internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.max_width > MAX_BUCKET_WIDTH {
            return Err(Error::InvalidArgument(format!(
                "max_width {} exceeds {}",
                self.max_width, MAX_BUCKET_WIDTH
            )));
        }
        if self.initial_width > self.max_width {
            return Err(Error::InvalidArgument(format!(
                "initial_width {} exceeds max_width {}",
                self.initial_width, self.max_width
            )));
        }
        if self.load_factor == 0 {
            return Err(Error::InvalidArgument("load_factor must be positive".into()));
        }
        if self.heap_increment == 0 {
            return Err(Error::InvalidArgument("heap_increment must be positive".into()));
        }
        if self.max_entries == Some(0) {
            return Err(Error::InvalidArgument("max_entries must be positive".into()));
        }
        Ok(())
    }

    /// Entry count above which a table of `width` wants to grow.
    pub(crate) fn growth_threshold(&self, width: u32) -> u64 {
        u64::from(self.load_factor) << width
    }
}
