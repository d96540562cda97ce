// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Proposed and committed payload tables of an MST link.

use log::debug;

use crate::dp_mst::topology::PortId;
use crate::dp_utils::*;

/// Highest VCPI usable on a link; VCPI 0 is reserved.
pub const DP_MST_MAX_VCPI: u32 = 63;

/// One stream's allocation on the link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MstPayload {
    pub port: PortId,
    pub pbn: u32,
    pub time_slots: u32,
    /// Virtual channel id, assigned on the first passing check.
    pub vcpi: Option<u8>,
    /// Set once the payload has been released; it will be torn down on commit.
    pub delete: bool,
}

/// Payload state of one MST link.  A proposal is obtained with
/// `MstTopologyMgr::duplicate_state()` and becomes live through `commit_state()`, so a rejected
/// proposal never touches the committed table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MstTopologyState {
    pub total_avail_slots: u32,
    /// Bitmask of VCPIs in use, bit n standing for VCPI n + 1.
    pub payload_mask: u64,
    /// PBN per time slot for the current link configuration, 0 with no active stream.
    pub pbn_div: u32,
    payloads: Vec<MstPayload>,
}

impl MstTopologyState {
    pub fn new(total_avail_slots: u32, pbn_div: u32) -> MstTopologyState {
        MstTopologyState {
            total_avail_slots,
            pbn_div,
            ..Default::default()
        }
    }

    /// All payloads, in insertion order.
    pub fn payloads(&self) -> &[MstPayload] {
        &self.payloads
    }

    pub(crate) fn payloads_mut(&mut self) -> &mut [MstPayload] {
        &mut self.payloads
    }

    /// The payload targeting `port`, released or not.
    pub fn payload(&self, port: PortId) -> Option<&MstPayload> {
        self.payloads.iter().find(|p| p.port == port)
    }

    /// The payload targeting `port`, unless it has been released.
    pub fn live_payload(&self, port: PortId) -> Option<&MstPayload> {
        self.payload(port).filter(|p| !p.delete)
    }

    /// Number of payloads not released.
    pub fn live_count(&self) -> usize {
        self.payloads.iter().filter(|p| !p.delete).count()
    }

    /// Requests `pbn` and `time_slots` for `port`, updating its payload if one exists.  A
    /// released payload is revived and will get a fresh VCPI.
    pub fn add_payload(&mut self, port: PortId, pbn: u32, time_slots: u32) -> &mut MstPayload {
        let index = match self.payloads.iter().position(|p| p.port == port) {
            Some(index) => index,
            None => {
                self.payloads.push(MstPayload {
                    port,
                    pbn: 0,
                    time_slots: 0,
                    vcpi: None,
                    delete: false,
                });
                self.payloads.len() - 1
            }
        };

        let payload = &mut self.payloads[index];
        if payload.delete {
            payload.delete = false;
            payload.vcpi = None;
        }
        debug!(
            "{} requests {} PBN, {} time slots (was {})",
            port, pbn, time_slots, payload.time_slots
        );
        payload.pbn = pbn;
        payload.time_slots = time_slots;
        payload
    }

    /// Requests `pbn` for `port`, deriving the time slot count from `pbn_div`.  Returns the
    /// number of slots requested.
    pub fn find_time_slots(&mut self, port: PortId, pbn: u32) -> DpResult<u32> {
        let pbn_div = self.pbn_div;
        let mut time_slots = checked_arithmetic!(pbn / pbn_div)?;
        if pbn % pbn_div != 0 {
            time_slots += 1;
        }

        self.add_payload(port, pbn, time_slots);
        Ok(time_slots)
    }

    /// Releases the payload of `port`: its PBN drops to zero and its VCPI becomes available
    /// again.  Releasing twice is harmless.
    pub fn release_payload(&mut self, port: PortId) -> DpResult<()> {
        let payload = self
            .payloads
            .iter_mut()
            .find(|p| p.port == port)
            .ok_or(DpError::InvalidPortId(port))?;

        if !payload.delete {
            debug!("{} releases {} time slots", port, payload.time_slots);
            payload.pbn = 0;
            payload.time_slots = 0;
            payload.delete = true;
            if let Some(bit) = payload.vcpi.and_then(|vcpi| vcpi.checked_sub(1)) {
                self.payload_mask &= !1u64.checked_shl(u32::from(bit)).unwrap_or(0);
            }
        }
        Ok(())
    }

    /// Drops released payloads once their teardown has been committed.
    pub fn retire_deleted(&mut self) {
        self.payloads.retain(|p| !p.delete);
    }
}

/// Returns the lowest VCPI not present in `mask`.
pub(crate) fn first_free_vcpi(mask: u64) -> Option<u8> {
    let bit = (!mask).trailing_zeros();
    if bit < DP_MST_MAX_VCPI {
        Some(bit as u8 + 1)
    } else {
        None
    }
}
