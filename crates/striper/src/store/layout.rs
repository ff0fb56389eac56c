//! Striping layout
//!
//! A logical object is cut into `stripe_unit` sized blocks. Consecutive blocks
//! are dealt round-robin across `stripe_count` backing objects; once each of
//! those objects holds `object_size` bytes the next object set begins.
//!
//! ```text
//!  stripe_unit = 4, stripe_count = 3, object_size = 8
//!
//!  object   .0       .1       .2       .3 ...
//!  stripe0  [0..4)   [4..8)   [8..12)
//!  stripe1  [12..16) [16..20) [20..24)
//!  stripe2                             [24..28)
//! ```

use super::{StoreError, StoreResult};

/// Name of backing object `objectno` of the striped object `oid`
pub fn object_name(oid: &str, objectno: u64) -> String {
    format!("{}.{:016x}", oid, objectno)
}

/// Object number of `name` if it is a backing object of `oid`
pub fn parse_object_name(oid: &str, name: &str) -> Option<u64> {
    let suffix = name.strip_prefix(oid)?.strip_prefix('.')?;
    if suffix.len() != 16 || !suffix.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u64::from_str_radix(suffix, 16).ok()
}

/// A contiguous piece of a logical range that lives in a single backing object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectExtent {
    /// Backing object number
    pub objectno: u64,
    /// Offset inside the backing object
    pub offset: u64,
    pub length: u64,
    /// Offset of this piece relative to the start of the logical range
    pub buffer_offset: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StripeLayout {
    pub stripe_unit: u64,
    pub stripe_count: u64,
    pub object_size: u64,
}

impl StripeLayout {
    /// Validate and build a layout
    pub fn new(stripe_unit: u64, stripe_count: u64, object_size: u64) -> StoreResult<Self> {
        if stripe_unit == 0 {
            return Err(StoreError::InvalidArgument(
                "stripe unit must be non-zero".to_string(),
            ));
        }
        if stripe_count == 0 {
            return Err(StoreError::InvalidArgument(
                "stripe count must be non-zero".to_string(),
            ));
        }
        if object_size < stripe_unit || object_size % stripe_unit != 0 {
            return Err(StoreError::InvalidArgument(format!(
                "object size {} is not a multiple of stripe unit {}",
                object_size, stripe_unit
            )));
        }

        Ok(Self {
            stripe_unit,
            stripe_count,
            object_size,
        })
    }

    fn units_per_object(&self) -> u64 {
        self.object_size / self.stripe_unit
    }

    /// Map the logical range `[offset, offset + len)` onto backing objects
    ///
    /// Adjacent blocks that land next to each other in the same object are
    /// merged into one extent.
    pub fn extents(&self, offset: u64, len: u64) -> Vec<ObjectExtent> {
        let su = self.stripe_unit;
        let sc = self.stripe_count;
        let upo = self.units_per_object();

        let mut extents: Vec<ObjectExtent> = Vec::new();
        let end = offset.saturating_add(len);
        let mut cur = offset;

        while cur < end {
            let blockno = cur / su;
            let stripeno = blockno / sc;
            let stripepos = blockno % sc;
            let objectsetno = stripeno / upo;
            let objectno = objectsetno * sc + stripepos;

            let within = cur % su;
            let object_offset = (stripeno % upo) * su + within;
            let length = (su - within).min(end - cur);
            let buffer_offset = cur - offset;

            match extents.last_mut() {
                Some(last)
                    if last.objectno == objectno
                        && last.offset + last.length == object_offset
                        && last.buffer_offset + last.length == buffer_offset =>
                {
                    last.length += length;
                }
                _ => extents.push(ObjectExtent {
                    objectno,
                    offset: object_offset,
                    length,
                    buffer_offset,
                }),
            }

            cur += length;
        }

        extents
    }

    /// Bytes of backing object `objectno` that hold data below logical `size`
    pub fn object_len_below(&self, objectno: u64, size: u64) -> u64 {
        let su = self.stripe_unit;
        let sc = self.stripe_count;
        let upo = self.units_per_object();
        let set = objectno / sc;
        let pos = objectno % sc;

        let mut len = 0;
        for k in 0..upo {
            let stripeno = set * upo + k;
            let block_start = (stripeno * sc + pos) * su;
            if block_start >= size {
                break;
            }
            len = k * su + (size - block_start).min(su);
        }
        len
    }
}
