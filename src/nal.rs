/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! Annex-B byte stream scanning.
//!
//! NAL units in an Annex-B H.264 elementary stream are delimited by 3-byte
//! (`00 00 01`) or 4-byte (`00 00 00 01`) start codes. The unit's type is the
//! low 5 bits of the byte that follows the start code. This module only
//! frames and classifies units; it never parses their payloads.

use std::ops::Range;

/// NAL unit classification for the types this pipeline cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalUnitType {
    /// Coded slice of a non-IDR picture (type 1).
    NonIdrSlice,
    /// Coded slice of an IDR picture (type 5).
    IdrSlice,
    /// Supplemental enhancement information (type 6).
    Sei,
    /// Sequence parameter set (type 7).
    Sps,
    /// Picture parameter set (type 8).
    Pps,
    /// Access unit delimiter (type 9).
    AccessUnitDelimiter,
    /// Any other type id.
    Other(u8),
}

impl NalUnitType {
    /// Classify a NAL header byte (the byte immediately after a start code).
    pub fn from_header(header: u8) -> Self {
        match header & 0x1F {
            1 => NalUnitType::NonIdrSlice,
            5 => NalUnitType::IdrSlice,
            6 => NalUnitType::Sei,
            7 => NalUnitType::Sps,
            8 => NalUnitType::Pps,
            9 => NalUnitType::AccessUnitDelimiter,
            other => NalUnitType::Other(other),
        }
    }
}

/// Returns true when `data` begins with a 3- or 4-byte Annex-B start code.
pub fn has_annex_b_prefix(data: &[u8]) -> bool {
    matches!(data, [0, 0, 0, 1, ..] | [0, 0, 1, ..])
}

/// Length of the start code at `offset`, if one begins exactly there.
///
/// A 4-byte code is preferred over the 3-byte code embedded in its tail.
pub fn start_code_len_at(data: &[u8], offset: usize) -> Option<usize> {
    let rest = data.get(offset..)?;
    if rest.starts_with(&[0, 0, 0, 1]) {
        Some(4)
    } else if rest.starts_with(&[0, 0, 1]) {
        Some(3)
    } else {
        None
    }
}

/// Index of the first start code at or after `offset`, or `None`.
pub fn find_next_start_code(data: &[u8], offset: usize) -> Option<usize> {
    if offset >= data.len() {
        return None;
    }
    let mut i = offset;
    // A start code needs at least 3 bytes of room.
    while i + 3 <= data.len() {
        if start_code_len_at(data, i).is_some() {
            return Some(i);
        }
        i += 1;
    }
    None
}

/// Byte range of the first NAL unit of type `wanted`, spanning from its
/// start code to the next start code or the end of `data`.
///
/// Units whose header byte is missing (a start code at the very end of the
/// buffer) are skipped rather than read out of bounds.
pub fn find_unit_of_type(data: &[u8], wanted: NalUnitType) -> Option<Range<usize>> {
    let mut search_from = 0;
    while let Some(start) = find_next_start_code(data, search_from) {
        let code_len = start_code_len_at(data, start)?;
        let header_index = start + code_len;
        if header_index >= data.len() {
            return None;
        }
        if NalUnitType::from_header(data[header_index]) == wanted {
            let end = find_next_start_code(data, header_index).unwrap_or(data.len());
            return Some(start..end);
        }
        search_from = header_index;
    }
    None
}
