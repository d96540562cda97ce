// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The MST topology tree: branch devices and the ports hanging off them, stored in an arena and
//! addressed by stable handles.  Ownership flows from the primary branch down, while
//! `MstPort::parent()` and `MstBranch::port_parent()` are plain back-references.

use std::fmt;

use crate::dp_utils::*;

/// Handle to a branch device in an `MstTopology`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BranchId(usize);

/// Handle to a port in an `MstTopology`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortId(usize);

impl PortId {
    #[cfg(test)]
    pub(crate) fn from_index(index: usize) -> PortId {
        PortId(index)
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[MSTB:{}]", self.0)
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[MST PORT:{}]", self.0)
    }
}

/// Peer device type, as reported in LINK_ADDRESS replies.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum PeerDeviceType {
    #[default]
    None = 0,
    SourceOrSst = 1,
    MstBranching = 2,
    SstSink = 3,
    DpLegacyConv = 4,
}

/// Returns true if a port with this peer device is a leaf for bandwidth accounting.  A
/// branching device without multi-channel sink support is an SST branch and counts as a leaf.
pub fn is_end_device(pdt: PeerDeviceType, mcs: bool) -> bool {
    match pdt {
        PeerDeviceType::DpLegacyConv | PeerDeviceType::SstSink => true,
        PeerDeviceType::MstBranching => !mcs,
        _ => true,
    }
}

/// A DP branch device.
#[derive(Clone, Debug)]
pub struct MstBranch {
    port_parent: Option<PortId>,
    ports: Vec<PortId>,
    lct: u8,
}

impl MstBranch {
    /// The port this branch hangs off, `None` for the primary branch.
    pub fn port_parent(&self) -> Option<PortId> {
        self.port_parent
    }

    /// Ports of this branch, in enumeration order.
    pub fn ports(&self) -> &[PortId] {
        &self.ports
    }

    /// Link count total: 1 for the primary branch, +1 per hop.
    pub fn lct(&self) -> u8 {
        self.lct
    }
}

/// A port of a DP branch device.
#[derive(Clone, Debug)]
pub struct MstPort {
    parent: BranchId,
    port_num: u8,
    pdt: PeerDeviceType,
    mcs: bool,
    full_pbn: u32,
    mstb: Option<BranchId>,
}

impl MstPort {
    pub fn parent(&self) -> BranchId {
        self.parent
    }

    pub fn port_num(&self) -> u8 {
        self.port_num
    }

    pub fn pdt(&self) -> PeerDeviceType {
        self.pdt
    }

    /// Multi-channel sink support of the peer device.
    pub fn mcs(&self) -> bool {
        self.mcs
    }

    /// Maximum PBN routable through this port.
    pub fn full_pbn(&self) -> u32 {
        self.full_pbn
    }

    /// The branch device behind this port, if one has been probed.
    pub fn mstb(&self) -> Option<BranchId> {
        self.mstb
    }
}

/// Arena holding every branch and port ever probed on one MST link.  Handles stay valid for the
/// lifetime of the topology; ports removed by `unlink_port()` keep their slot but are no longer
/// reachable from the primary branch.
#[derive(Clone, Debug, Default)]
pub struct MstTopology {
    branches: Vec<MstBranch>,
    ports: Vec<MstPort>,
    primary: Option<BranchId>,
}

impl MstTopology {
    pub fn new() -> MstTopology {
        Default::default()
    }

    /// Creates the primary branch, the device directly attached to the source.  Any previously
    /// probed tree becomes unreachable.
    pub fn set_primary(&mut self) -> BranchId {
        let id = BranchId(self.branches.len());
        self.branches.push(MstBranch {
            port_parent: None,
            ports: Vec::new(),
            lct: 1,
        });
        self.primary = Some(id);
        id
    }

    /// Drops the primary branch, e.g. when the link leaves MST mode.
    pub fn clear_primary(&mut self) {
        self.primary = None;
    }

    pub fn primary(&self) -> Option<BranchId> {
        self.primary
    }

    pub fn branch(&self, id: BranchId) -> DpResult<&MstBranch> {
        self.branches.get(id.0).ok_or(DpError::InvalidBranchId(id))
    }

    pub fn port(&self, id: PortId) -> DpResult<&MstPort> {
        self.ports.get(id.0).ok_or(DpError::InvalidPortId(id))
    }

    fn port_mut(&mut self, id: PortId) -> DpResult<&mut MstPort> {
        self.ports.get_mut(id.0).ok_or(DpError::InvalidPortId(id))
    }

    /// Adds a port to `parent`.
    pub fn add_port(
        &mut self,
        parent: BranchId,
        port_num: u8,
        pdt: PeerDeviceType,
        mcs: bool,
        full_pbn: u32,
    ) -> DpResult<PortId> {
        let id = PortId(self.ports.len());
        self.branches
            .get_mut(parent.0)
            .ok_or(DpError::InvalidBranchId(parent))?
            .ports
            .push(id);
        self.ports.push(MstPort {
            parent,
            port_num,
            pdt,
            mcs,
            full_pbn,
            mstb: None,
        });
        Ok(id)
    }

    /// Adds the branch device found behind `port`, replacing any previous one.
    pub fn add_branch(&mut self, port: PortId) -> DpResult<BranchId> {
        let parent = self.port(port)?.parent;
        let lct = self.branch(parent)?.lct.saturating_add(1);
        let id = BranchId(self.branches.len());
        self.branches.push(MstBranch {
            port_parent: Some(port),
            ports: Vec::new(),
            lct,
        });
        self.port_mut(port)?.mstb = Some(id);
        Ok(id)
    }

    pub fn set_full_pbn(&mut self, port: PortId, full_pbn: u32) -> DpResult<()> {
        self.port_mut(port)?.full_pbn = full_pbn;
        Ok(())
    }

    /// Updates the peer device of `port`.  Ports no longer leading to an MST branch lose their
    /// child branch.
    pub fn set_peer_device(&mut self, port: PortId, pdt: PeerDeviceType, mcs: bool) -> DpResult<()> {
        let port = self.port_mut(port)?;
        port.pdt = pdt;
        port.mcs = mcs;
        if pdt != PeerDeviceType::MstBranching {
            port.mstb = None;
        }
        Ok(())
    }

    /// Removes `port` from its parent branch.
    pub fn unlink_port(&mut self, port: PortId) -> DpResult<()> {
        let parent = self.port(port)?.parent;
        self.branches
            .get_mut(parent.0)
            .ok_or(DpError::InvalidBranchId(parent))?
            .ports
            .retain(|&p| p != port);
        Ok(())
    }

    /// Returns true if `port` sits anywhere below `branch`, following parent links upwards.
    pub fn port_downstream_of_branch(&self, port: PortId, branch: BranchId) -> bool {
        let mut port = port;
        loop {
            let parent = match self.ports.get(port.0) {
                Some(p) => p.parent,
                None => return false,
            };
            if parent == branch {
                return true;
            }

            match self.branches.get(parent.0).and_then(|b| b.port_parent) {
                Some(p) => port = p,
                None => return false,
            }
        }
    }

    /// Searches the subtree of `mstb` for `to_find`, so that only ports still linked into the
    /// tree are accepted.
    fn find_port_validated(&self, mstb: BranchId, to_find: PortId) -> Option<PortId> {
        let branch = self.branches.get(mstb.0)?;
        for &port in &branch.ports {
            if port == to_find {
                return Some(port);
            }

            if let Some(child) = self.ports.get(port.0).and_then(|p| p.mstb) {
                if let Some(found) = self.find_port_validated(child, to_find) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Returns true if `port` is downstream of `parent`.  With no `parent` (the root port) this
    /// checks that `port` is part of the topology at all.
    pub fn port_downstream_of_parent(&self, port: PortId, parent: Option<PortId>) -> bool {
        let primary = match self.primary {
            Some(primary) => primary,
            None => return false,
        };
        let port = match self.find_port_validated(primary, port) {
            Some(port) => port,
            None => return false,
        };
        let parent = match parent {
            Some(parent) => parent,
            None => return true,
        };
        if self.find_port_validated(primary, parent).is_none() {
            return false;
        }

        match self.ports.get(parent.0).and_then(|p| p.mstb) {
            Some(mstb) => self.port_downstream_of_branch(port, mstb),
            None => false,
        }
    }
}
