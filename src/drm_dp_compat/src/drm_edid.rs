// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! drm_edid: Minimal EDID container, enough for the digital input check and the CEC physical
//! address lookup.

use zerocopy::AsBytes;
use zerocopy::FromBytes;

use crate::dp_cec::CEC_PHYS_ADDR_INVALID;
use crate::dp_utils::*;

pub const EDID_LENGTH: usize = 128;
pub const DRM_EDID_INPUT_DIGITAL: u8 = 1 << 7;

const CTA_EXT_TAG: u8 = 0x02;
const CTA_DATA_BLOCK_VENDOR: u8 = 0x03;
const HDMI_IEEE_OUI: [u8; 3] = [0x03, 0x0c, 0x00];

/// EDID 1.x base block.
#[repr(C)]
#[derive(Copy, Clone, AsBytes, FromBytes)]
pub struct Edid {
    pub header: [u8; 8],
    pub mfg_id: [u8; 2],
    pub prod_code: [u8; 2],
    pub serial: [u8; 4],
    pub mfg_week: u8,
    pub mfg_year: u8,
    pub version: u8,
    pub revision: u8,
    pub input: u8,
    pub width_cm: u8,
    pub height_cm: u8,
    pub gamma: u8,
    pub features: u8,
    pub red_green_lo: u8,
    pub blue_white_lo: u8,
    pub red_x: u8,
    pub red_y: u8,
    pub green_x: u8,
    pub green_y: u8,
    pub blue_x: u8,
    pub blue_y: u8,
    pub white_x: u8,
    pub white_y: u8,
    pub established_timings: [u8; 3],
    pub standard_timings: [u8; 16],
    pub detailed_timings: [u8; 72],
    pub extensions: u8,
    pub checksum: u8,
}

/// An EDID as read from a sink: the base block and the extension blocks actually present.
#[derive(Clone)]
pub struct DrmEdid {
    edid: Edid,
    extensions: Vec<[u8; EDID_LENGTH]>,
}

impl DrmEdid {
    /// Wraps raw EDID data.  Extension blocks announced by the base block but missing from `data`
    /// are ignored.
    pub fn from_bytes(data: &[u8]) -> DpResult<DrmEdid> {
        let base = data
            .get(..EDID_LENGTH)
            .ok_or(DpError::InvalidEdidLength(data.len()))?;
        let edid = Edid::read_from(base).ok_or(DpError::InvalidEdidLength(data.len()))?;

        let extensions = data[EDID_LENGTH..]
            .chunks_exact(EDID_LENGTH)
            .take(usize::from(edid.extensions))
            .map(|block| {
                let mut ext = [0u8; EDID_LENGTH];
                ext.copy_from_slice(block);
                ext
            })
            .collect();

        Ok(DrmEdid { edid, extensions })
    }

    pub fn edid(&self) -> &Edid {
        &self.edid
    }

    pub fn extensions(&self) -> &[[u8; EDID_LENGTH]] {
        &self.extensions
    }
}

/// Returns true if an EDID is present and describes a digital input.
pub fn edid_is_digital(drm_edid: Option<&DrmEdid>) -> bool {
    drm_edid.map_or(false, |e| e.edid.input & DRM_EDID_INPUT_DIGITAL != 0)
}

/// Returns the CEC physical address advertised in the HDMI vendor specific data block of a
/// CTA-861 extension, or `CEC_PHYS_ADDR_INVALID`.
pub fn cec_phys_addr(drm_edid: &DrmEdid) -> u16 {
    for ext in &drm_edid.extensions {
        if ext[0] != CTA_EXT_TAG {
            continue;
        }

        // Data blocks sit between byte 4 and the first detailed timing descriptor.
        let dtd_start = usize::from(ext[2]).min(EDID_LENGTH - 1);
        let mut offset = 4;
        while offset < dtd_start {
            let tag = ext[offset] >> 5;
            let len = usize::from(ext[offset] & 0x1f);
            let block = &ext[offset + 1..(offset + 1 + len).min(dtd_start)];

            if tag == CTA_DATA_BLOCK_VENDOR && block.len() >= 5 && block[..3] == HDMI_IEEE_OUI {
                return u16::from_be_bytes([block[3], block[4]]);
            }
            offset += 1 + len;
        }
    }
    CEC_PHYS_ADDR_INVALID
}
