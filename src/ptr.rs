//! Pointer representations that are safe to persist.
//!
//! Two forms, by where the pointer lives:
//!
//! - [`RelPtr`] names a pointer cell *inside* the image. The cell holds a
//!   signed byte offset relative to its own position, so the whole image
//!   can be reloaded anywhere without fixups, and a freshly zeroed region
//!   reads as all-null. RelPtr values never leave the image; code outside
//!   converts to an [`OffsetPtr`] first.
//! - [`OffsetPtr`] is the host-side handle: an absolute byte offset,
//!   meaningful only together with the owning image. This is the only
//!   form the index, the pending list, and worker stacks may hold.

use crate::error::{AirwalkError, Result};
use crate::image::BinaryImage;

/// Absolute byte offset into an image, for use outside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OffsetPtr(u64);

impl OffsetPtr {
    pub fn new(offset: u64) -> Self {
        OffsetPtr(offset)
    }

    pub fn offset(self) -> u64 {
        self.0
    }
}

/// A self-relative pointer cell at a known image offset.
///
/// The encoded value is `referent - cell`; zero is the null pointer (a
/// cell "pointing at itself" designates nothing, by construction no
/// record starts inside a pointer cell).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelPtr {
    cell: u64,
}

impl RelPtr {
    /// Encoded size of a pointer cell.
    pub const SIZE: u64 = 8;

    pub fn at(cell: u64) -> Self {
        RelPtr { cell }
    }

    pub fn cell(self) -> u64 {
        self.cell
    }

    /// Decode the cell. A non-null referent outside the image is a
    /// corruption signal, not a valid pointer.
    pub fn load(self, image: &BinaryImage) -> Result<Option<OffsetPtr>> {
        let delta = image.read_i64(self.cell)?;
        if delta == 0 {
            return Ok(None);
        }
        let target = self
            .cell
            .checked_add_signed(delta)
            .filter(|&t| t < image.size())
            .ok_or_else(|| {
                AirwalkError::corrupt(format!(
                    "relative pointer at {} resolves outside image ({delta:+})",
                    self.cell
                ))
            })?;
        Ok(Some(OffsetPtr::new(target)))
    }

    /// Encode `target` into the cell; `None` stores null.
    pub fn store(self, image: &mut BinaryImage, target: Option<OffsetPtr>) -> Result<()> {
        let delta = match target {
            None => 0,
            Some(ptr) => {
                if ptr.offset() >= image.size() {
                    return Err(AirwalkError::corrupt(format!(
                        "storing pointer to {} outside image of {} bytes",
                        ptr.offset(),
                        image.size()
                    )));
                }
                ptr.offset() as i64 - self.cell as i64
            }
        };
        image.write_i64(self.cell, delta)
    }

    /// Copy the referent of `other` into this cell, re-deriving the
    /// relative encoding for the new location.
    pub fn copy_from(self, image: &mut BinaryImage, other: RelPtr) -> Result<()> {
        let target = other.load(image)?;
        self.store(image, target)
    }
}
