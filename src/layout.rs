//! On-disk record layouts for the state file.
//!
//! Every record is bracketed by the framing bytes `[` and `]`, a cheap
//! locally-checkable corruption signal. All scalars are little-endian;
//! the header's endian stamp rejects files written by an other-endian
//! host. Offsets below are relative to the record start.
//!
//! ```text
//! Header (64 bytes, at offset 0)
//!   0   '['
//!   1   magic "W00T"
//!   8   endian_stamp  u32 = 1
//!   12  file_version  u32 = 1
//!   16  visit_serial  u32 >= 1
//!   24  all_nodes     list head link
//!   40  root_nodes    list head link
//!   56  ']'
//!   57  reserved to 64
//!
//! Node (48 bytes, 8-aligned)
//!   0   '['
//!   1   callsign, 16 bytes NUL-terminated
//!   24  links         list head link
//!   40  query_count   u32
//!   44  ']'
//!   45  pad to 48
//! ```

use crate::callsign::{Callsign, CALLSIGN_FIELD};
use crate::error::{AirwalkError, Result};
use crate::image::BinaryImage;
use crate::list::{ListHead, LINK_SIZE};

pub const FRAMING_START: u8 = b'[';
pub const FRAMING_END: u8 = b']';

fn check_framing(image: &BinaryImage, start_at: u64, end_at: u64, what: &str) -> Result<()> {
    if image.read_u8(start_at)? != FRAMING_START {
        return Err(AirwalkError::corrupt(format!(
            "{what} framing error: start of record not found"
        )));
    }
    if image.read_u8(end_at)? != FRAMING_END {
        return Err(AirwalkError::corrupt(format!(
            "{what} framing error: end of record not found"
        )));
    }
    Ok(())
}

/// The header record, exactly one, at offset 0.
pub mod header {
    use super::*;

    pub const MAGIC: [u8; 4] = *b"W00T";
    pub const ENDIAN_STAMP: u32 = 1;
    pub const FILE_VERSION: u32 = 1;

    pub const SIZE: u64 = 64;

    const MAGIC_AT: u64 = 1;
    const ENDIAN_AT: u64 = 8;
    const VERSION_AT: u64 = 12;
    const VISIT_SERIAL_AT: u64 = 16;
    const ALL_NODES_AT: u64 = 24;
    const ROOT_NODES_AT: u64 = 40;
    const END_AT: u64 = ALL_NODES_AT + 2 * LINK_SIZE;

    /// Write a fresh header into an empty image.
    pub fn init(image: &mut BinaryImage) -> Result<()> {
        debug_assert_eq!(image.size(), 0);
        let at = image.allocate(SIZE, 8);
        image.write_u8(at, FRAMING_START)?;
        image.write_bytes(at + MAGIC_AT, &MAGIC)?;
        image.write_u32(at + ENDIAN_AT, ENDIAN_STAMP)?;
        image.write_u32(at + VERSION_AT, FILE_VERSION)?;
        image.write_u32(at + VISIT_SERIAL_AT, 1)?;
        // Both list heads stay zeroed: a zeroed link is an empty list.
        image.write_u8(at + END_AT, FRAMING_END)?;
        Ok(())
    }

    /// Validate magic, endian stamp, version, and framing.
    pub fn verify(image: &BinaryImage) -> Result<()> {
        if image.size() < SIZE {
            return Err(AirwalkError::corrupt(format!(
                "file too short for a header: {} bytes",
                image.size()
            )));
        }
        check_framing(image, 0, END_AT, "header")?;
        if image.bytes(MAGIC_AT, MAGIC.len() as u64)? != &MAGIC[..] {
            return Err(AirwalkError::corrupt(
                "identifier does not match; this is not a state file",
            ));
        }
        if image.read_u32(ENDIAN_AT)? != ENDIAN_STAMP {
            return Err(AirwalkError::corrupt(
                "endian stamp is wrong; file may be from an other-endian machine",
            ));
        }
        let version = image.read_u32(VERSION_AT)?;
        if version != FILE_VERSION {
            return Err(AirwalkError::corrupt(format!(
                "unsupported file version {version}"
            )));
        }
        if image.read_u32(VISIT_SERIAL_AT)? == 0 {
            return Err(AirwalkError::corrupt("visit serial must be at least 1"));
        }
        Ok(())
    }

    pub fn visit_serial(image: &BinaryImage) -> Result<u32> {
        image.read_u32(VISIT_SERIAL_AT)
    }

    pub fn set_visit_serial(image: &mut BinaryImage, serial: u32) -> Result<()> {
        image.write_u32(VISIT_SERIAL_AT, serial)
    }

    /// Head of the list of every node.
    pub fn all_nodes() -> ListHead {
        ListHead::at(ALL_NODES_AT)
    }

    /// Head of the list of seed nodes.
    pub fn root_nodes() -> ListHead {
        ListHead::at(ROOT_NODES_AT)
    }
}

/// Node records, appended after the header in discovery order.
pub mod node {
    use super::*;

    pub const SIZE: u64 = 48;
    pub const ALIGN: u64 = 8;

    const CALLSIGN_AT: u64 = 1;
    const LINKS_AT: u64 = 24;
    const QUERY_COUNT_AT: u64 = 40;
    const END_AT: u64 = 44;

    /// Allocate and initialise a node record; returns its offset.
    pub fn append(image: &mut BinaryImage, callsign: &Callsign) -> Result<u64> {
        let at = image.allocate(SIZE, ALIGN);
        image.write_u8(at, FRAMING_START)?;
        image.write_bytes(at + CALLSIGN_AT, &callsign.to_field())?;
        image.write_u8(at + END_AT, FRAMING_END)?;
        Ok(at)
    }

    /// Validate framing and callsign termination of the record at `at`.
    pub fn verify(image: &BinaryImage, at: u64) -> Result<()> {
        if at + SIZE > image.size() {
            return Err(AirwalkError::corrupt(format!(
                "node record at {at} extends past end of image"
            )));
        }
        check_framing(image, at, at + END_AT, "node")?;
        callsign(image, at)?;
        Ok(())
    }

    pub fn callsign(image: &BinaryImage, at: u64) -> Result<Callsign> {
        let mut field = [0u8; CALLSIGN_FIELD];
        field.copy_from_slice(image.bytes(at + CALLSIGN_AT, CALLSIGN_FIELD as u64)?);
        Callsign::from_field(&field)
    }

    /// Head of this node's neighbour list.
    pub fn links(at: u64) -> ListHead {
        ListHead::at(at + LINKS_AT)
    }

    pub fn query_count(image: &BinaryImage, at: u64) -> Result<u32> {
        image.read_u32(at + QUERY_COUNT_AT)
    }

    pub fn set_query_count(image: &mut BinaryImage, at: u64, count: u32) -> Result<()> {
        image.write_u32(at + QUERY_COUNT_AT, count)
    }
}
