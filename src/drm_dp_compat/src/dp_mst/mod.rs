// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! dp_mst: Bandwidth and time slot admission control for DisplayPort Multi-Stream Transport.
//!
//! An `MstTopologyMgr` owns the branch/port tree of one MST link behind a single lock, plus the
//! committed payload table.  Callers duplicate the committed state, add or release payloads on
//! the copy and run `atomic_check_mgr()` on it before committing.  The check walks the tree
//! verifying that no port carries more PBN than it can route, then verifies the link's time
//! slot budget and payload count and assigns VCPIs to new payloads.

mod state;
mod topology;

use std::sync::Mutex;
use std::sync::MutexGuard;

use log::debug;

pub use self::state::MstPayload;
pub use self::state::MstTopologyState;
pub use self::state::DP_MST_MAX_VCPI;
pub use self::topology::is_end_device;
pub use self::topology::BranchId;
pub use self::topology::MstBranch;
pub use self::topology::MstPort;
pub use self::topology::MstTopology;
pub use self::topology::PeerDeviceType;
pub use self::topology::PortId;
use crate::dp_mst::state::first_free_vcpi;
use crate::dp_utils::*;

/// Time slots available to payloads on an 8b/10b link; slot 0 carries the MTP header.
pub const DP_MST_SLOTS_8B10B: u32 = 63;
/// Time slots available to payloads on a 128b/132b link.
pub const DP_MST_SLOTS_128B132B: u32 = 64;

/// The manager of one MST link.
pub struct MstTopologyMgr {
    topology: Mutex<MstTopology>,
    state: Mutex<MstTopologyState>,
    max_payloads: u32,
}

impl MstTopologyMgr {
    /// Locks the topology for the hotplug side to update it.
    pub fn lock_topology(&self) -> MutexGuard<'_, MstTopology> {
        self.topology.lock().unwrap()
    }

    pub fn max_payloads(&self) -> u32 {
        self.max_payloads
    }

    /// Returns a private copy of the committed payload state to build a proposal on.
    pub fn duplicate_state(&self) -> MstTopologyState {
        self.state.lock().unwrap().clone()
    }

    /// Replaces the committed payload state with a proposal that passed `atomic_check_mgr()`.
    pub fn commit_state(&self, state: MstTopologyState) {
        *self.state.lock().unwrap() = state;
    }

    /// Returns a copy of the committed payload state.
    pub fn committed_state(&self) -> MstTopologyState {
        self.duplicate_state()
    }

    /// Checks that the payloads of `state` fit the topology and the link.
    ///
    /// Bandwidth is accounted per port over the whole tree while holding the topology lock.
    /// Errors are attributed to the first port found over its limit (see
    /// `DpError::failing_port()`).  Afterwards the time slot budget and payload count are checked
    /// and payloads without a VCPI get the lowest free one.  On error `state` is left untouched.
    /// A manager without a primary branch skips the bandwidth walk but still enforces the link
    /// budget.
    pub fn atomic_check_mgr(&self, state: &mut MstTopologyState) -> DpResult<()> {
        {
            let topology = self.lock_topology();
            // Without a primary branch no payload is routed anywhere, so nothing uses bandwidth.
            if let Some(primary) = topology.primary() {
                check_mstb_bw_limit(&topology, primary, state)?;
            }
        }

        check_payload_alloc_limits(self.max_payloads, state)
    }

    /// Returns true if `port` is downstream of `parent` in the current topology.  With no
    /// `parent`, returns true if `port` is part of the topology.
    pub fn port_downstream_of_parent(&self, port: PortId, parent: Option<PortId>) -> bool {
        self.lock_topology().port_downstream_of_parent(port, parent)
    }
}

/// Checks every manager/state pair of an atomic update, stopping at the first failure.
pub fn atomic_check<'a, I>(checks: I) -> DpResult<()>
where
    I: IntoIterator<Item = (&'a MstTopologyMgr, &'a mut MstTopologyState)>,
{
    for (mgr, state) in checks {
        mgr.atomic_check_mgr(state)?;
    }
    Ok(())
}

fn check_port_bw_limit(
    topology: &MstTopology,
    port_id: PortId,
    state: &MstTopologyState,
) -> DpResult<u32> {
    let port = topology.port(port_id)?;
    if port.pdt() == PeerDeviceType::None {
        return Ok(0);
    }

    let pbn_used = if is_end_device(port.pdt(), port.mcs()) {
        let payload = match state.live_payload(port_id) {
            Some(payload) => payload,
            None => return Ok(0),
        };

        // The sink deasserted HPD but the branch still reports it as attached.
        if port.full_pbn() == 0 {
            debug!("{} {} no BW available for the port", port.parent(), port_id);
            return Err(DpError::NoPortBandwidth(port_id));
        }

        payload.pbn
    } else {
        let mstb = match port.mstb() {
            Some(mstb) => mstb,
            None => return Ok(0),
        };
        let pbn_used = check_mstb_bw_limit(topology, mstb, state)?;
        if pbn_used == 0 {
            return Ok(0);
        }
        pbn_used
    };

    if pbn_used > port.full_pbn() {
        debug!(
            "{} {} required PBN of {} exceeds port limit of {}",
            port.parent(),
            port_id,
            pbn_used,
            port.full_pbn()
        );
        return Err(DpError::BandwidthExceeded {
            port: port_id,
            used: pbn_used,
            limit: port.full_pbn(),
        });
    }

    debug!(
        "{} {} (port #{}) uses {} out of {} PBN",
        port.parent(),
        port_id,
        port.port_num(),
        pbn_used,
        port.full_pbn()
    );
    Ok(pbn_used)
}

fn check_mstb_bw_limit(
    topology: &MstTopology,
    mstb: BranchId,
    state: &MstTopologyState,
) -> DpResult<u32> {
    // Skip branches with no live payload below them.
    let found = state.payloads().iter().any(|payload| {
        payload.pbn != 0
            && !payload.delete
            && topology.port_downstream_of_branch(payload.port, mstb)
    });
    if !found {
        return Ok(0);
    }

    let branch = topology.branch(mstb)?;
    match branch.port_parent() {
        Some(port_parent) => {
            let parent = topology.port(port_parent)?.parent();
            debug!(
                "{} {} Checking bandwidth limits on {} (lct {})",
                parent,
                port_parent,
                mstb,
                branch.lct()
            );
        }
        None => debug!("{} Checking bandwidth limits (lct {})", mstb, branch.lct()),
    }

    let mut pbn_used = 0u32;
    for &port in branch.ports() {
        let port_pbn = check_port_bw_limit(topology, port, state)?;
        pbn_used = checked_arithmetic!(pbn_used + port_pbn)?;
    }
    Ok(pbn_used)
}

fn check_payload_alloc_limits(max_payloads: u32, state: &mut MstTopologyState) -> DpResult<()> {
    // VCPIs are assigned on a scratch copy so that a failure leaves `state` as it was.
    let mut scratch = state.clone();
    let total_avail_slots = scratch.total_avail_slots;
    let mut payload_mask = scratch.payload_mask;
    let mut used_slots = 0u32;
    let mut payload_count = 0u32;

    for payload in scratch.payloads_mut() {
        // Releasing payloads is always OK, even if the port is gone.
        if payload.delete {
            debug!("{} releases all time slots", payload.port);
            continue;
        }

        debug!("{} requires {} time slots", payload.port, payload.time_slots);

        let requested = used_slots.saturating_add(payload.time_slots);
        if requested > total_avail_slots {
            debug!(
                "{} not enough time slots (avail={})",
                payload.port,
                total_avail_slots - used_slots
            );
            return Err(DpError::TimeSlotsExceeded {
                requested,
                available: total_avail_slots,
            });
        }
        used_slots = requested;

        payload_count += 1;
        if payload_count > max_payloads {
            debug!("too many payloads (max={})", max_payloads);
            return Err(DpError::TooManyPayloads { max: max_payloads });
        }

        if payload.vcpi.is_none() {
            let vcpi = first_free_vcpi(payload_mask).ok_or(DpError::TooManyPayloads {
                max: max_payloads,
            })?;
            debug!("{} assigned VCPI #{}", payload.port, vcpi);
            payload_mask |= 1u64 << (vcpi - 1);
            payload.vcpi = Some(vcpi);
        }
    }

    scratch.payload_mask = payload_mask;
    if payload_count == 0 {
        scratch.pbn_div = 0;
    }

    debug!(
        "mst state pbn_div={} avail={} used={}",
        scratch.pbn_div,
        total_avail_slots - used_slots,
        used_slots
    );

    *state = scratch;
    Ok(())
}

/// Configures and builds an `MstTopologyMgr`.
pub struct MstTopologyMgrBuilder {
    max_payloads: u32,
    total_avail_slots: u32,
    pbn_div: u32,
    topology: MstTopology,
}

impl MstTopologyMgrBuilder {
    /// Create a new MstTopologyMgrBuilder supporting up to `max_payloads` streams.
    pub fn new(max_payloads: u32) -> MstTopologyMgrBuilder {
        MstTopologyMgrBuilder {
            max_payloads,
            total_avail_slots: DP_MST_SLOTS_8B10B,
            pbn_div: 0,
            topology: MstTopology::new(),
        }
    }

    /// Sets the time slots usable by payloads.
    pub fn set_total_avail_slots(mut self, total_avail_slots: u32) -> MstTopologyMgrBuilder {
        self.total_avail_slots = total_avail_slots;
        self
    }

    /// Selects the slot count of a 128b/132b (UHBR) or 8b/10b link.
    pub fn set_uhbr(mut self, v: bool) -> MstTopologyMgrBuilder {
        self.total_avail_slots = if v {
            DP_MST_SLOTS_128B132B
        } else {
            DP_MST_SLOTS_8B10B
        };
        self
    }

    /// Sets the PBN per time slot of the current link configuration.
    pub fn set_pbn_div(mut self, pbn_div: u32) -> MstTopologyMgrBuilder {
        self.pbn_div = pbn_div;
        self
    }

    /// Starts the manager with an already probed topology.
    pub fn set_topology(mut self, topology: MstTopology) -> MstTopologyMgrBuilder {
        self.topology = topology;
        self
    }

    pub fn build(self) -> DpResult<MstTopologyMgr> {
        if self.max_payloads == 0 {
            return Err(DpError::InvalidMgrBuild("at least one payload is required"));
        }
        if self.total_avail_slots == 0 {
            return Err(DpError::InvalidMgrBuild("no time slots available"));
        }

        let max_payloads = self.max_payloads;
        let total_avail_slots = self.total_avail_slots;
        checked_range!(max_payloads; <= DP_MST_MAX_VCPI)?;
        checked_range!(total_avail_slots; <= DP_MST_SLOTS_128B132B)?;

        Ok(MstTopologyMgr {
            topology: Mutex::new(self.topology),
            state: Mutex::new(MstTopologyState::new(total_avail_slots, self.pbn_div)),
            max_payloads,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn single_port_mgr(full_pbn: u32) -> (MstTopologyMgr, PortId) {
        let mut topology = MstTopology::new();
        let primary = topology.set_primary();
        let port = topology
            .add_port(primary, 1, PeerDeviceType::SstSink, false, full_pbn)
            .unwrap();
        let mgr = MstTopologyMgrBuilder::new(4)
            .set_pbn_div(40)
            .set_topology(topology)
            .build()
            .unwrap();
        (mgr, port)
    }

    // primary -> port (branch, 50) -> relay -> sink (50)
    fn three_level_mgr(limit: u32) -> (MstTopologyMgr, PortId, PortId) {
        let mut topology = MstTopology::new();
        let primary = topology.set_primary();
        let relay_port = topology
            .add_port(primary, 1, PeerDeviceType::MstBranching, true, limit)
            .unwrap();
        let relay = topology.add_branch(relay_port).unwrap();
        let sink = topology
            .add_port(relay, 1, PeerDeviceType::SstSink, false, limit)
            .unwrap();
        let mgr = MstTopologyMgrBuilder::new(4)
            .set_topology(topology)
            .build()
            .unwrap();
        (mgr, relay_port, sink)
    }

    #[test]
    fn usage_equal_to_capacity_passes() {
        let (mgr, port) = single_port_mgr(100);
        let mut state = mgr.duplicate_state();
        state.add_payload(port, 100, 3);

        mgr.atomic_check_mgr(&mut state).unwrap();
        assert_eq!(state.payload(port).unwrap().vcpi, Some(1));
        assert_eq!(state.payload_mask, 0b1);
    }

    #[test]
    fn usage_over_capacity_fails() {
        let (mgr, port) = single_port_mgr(100);
        let mut state = mgr.duplicate_state();
        state.add_payload(port, 101, 3);

        let err = mgr.atomic_check_mgr(&mut state).unwrap_err();
        match err {
            DpError::BandwidthExceeded { used, limit, .. } => {
                assert_eq!(used, 101);
                assert_eq!(limit, 100);
            }
            ref e => panic!("unexpected error {}", e),
        }
        assert_eq!(err.errno(), -libc::ENOSPC);
        assert_eq!(err.failing_port(), Some(port));
        // Nothing was assigned.
        assert_eq!(state.payload(port).unwrap().vcpi, None);
    }

    #[test]
    fn deepest_failing_port_is_reported() {
        let (mgr, _, sink) = three_level_mgr(50);
        let mut state = mgr.duplicate_state();
        state.add_payload(sink, 51, 2);

        let err = mgr.atomic_check_mgr(&mut state).unwrap_err();
        assert_eq!(err.failing_port(), Some(sink));
        assert_eq!(err.errno(), -libc::ENOSPC);
    }

    #[test]
    fn aggregate_over_relay_port_fails() {
        let mut topology = MstTopology::new();
        let primary = topology.set_primary();
        let relay_port = topology
            .add_port(primary, 1, PeerDeviceType::MstBranching, true, 50)
            .unwrap();
        let relay = topology.add_branch(relay_port).unwrap();
        let sink_a = topology
            .add_port(relay, 1, PeerDeviceType::SstSink, false, 40)
            .unwrap();
        let sink_b = topology
            .add_port(relay, 2, PeerDeviceType::DpLegacyConv, false, 40)
            .unwrap();
        let mgr = MstTopologyMgrBuilder::new(4)
            .set_topology(topology)
            .build()
            .unwrap();

        let mut state = mgr.duplicate_state();
        state.add_payload(sink_a, 30, 2);
        state.add_payload(sink_b, 30, 2);

        let err = mgr.atomic_check_mgr(&mut state).unwrap_err();
        assert_eq!(err.failing_port(), Some(relay_port));
        match err {
            DpError::BandwidthExceeded { used, limit, .. } => {
                assert_eq!(used, 60);
                assert_eq!(limit, 50);
            }
            e => panic!("unexpected error {}", e),
        }

        state.add_payload(sink_b, 20, 2);
        mgr.atomic_check_mgr(&mut state).unwrap();
    }

    #[test]
    fn zero_capacity_end_device_is_invalid() {
        let (mgr, port) = single_port_mgr(0);
        let mut state = mgr.duplicate_state();
        state.add_payload(port, 10, 1);

        let err = mgr.atomic_check_mgr(&mut state).unwrap_err();
        assert!(matches!(err, DpError::NoPortBandwidth(p) if p == port));
        assert_eq!(err.errno(), -libc::EINVAL);
        assert_eq!(err.failing_port(), Some(port));
    }

    #[test]
    fn zero_capacity_without_payload_passes() {
        let mut topology = MstTopology::new();
        let primary = topology.set_primary();
        let used = topology
            .add_port(primary, 1, PeerDeviceType::SstSink, false, 100)
            .unwrap();
        topology
            .add_port(primary, 2, PeerDeviceType::SstSink, false, 0)
            .unwrap();
        topology
            .add_port(primary, 3, PeerDeviceType::None, false, 0)
            .unwrap();
        let mgr = MstTopologyMgrBuilder::new(4)
            .set_topology(topology)
            .build()
            .unwrap();

        let mut state = mgr.duplicate_state();
        state.add_payload(used, 80, 3);
        mgr.atomic_check_mgr(&mut state).unwrap();
    }

    #[test]
    fn sst_branch_counts_as_end_device() {
        let mut topology = MstTopology::new();
        let primary = topology.set_primary();
        let port = topology
            .add_port(primary, 1, PeerDeviceType::MstBranching, false, 100)
            .unwrap();
        let mgr = MstTopologyMgrBuilder::new(4)
            .set_topology(topology)
            .build()
            .unwrap();

        let mut state = mgr.duplicate_state();
        state.add_payload(port, 120, 3);
        assert_eq!(
            mgr.atomic_check_mgr(&mut state).unwrap_err().failing_port(),
            Some(port)
        );
    }

    #[test]
    fn time_slot_budget() {
        let (mgr, port) = single_port_mgr(1000);
        let mut state = mgr.duplicate_state();
        state.add_payload(port, 100, 64);

        let err = mgr.atomic_check_mgr(&mut state).unwrap_err();
        assert!(matches!(
            err,
            DpError::TimeSlotsExceeded {
                requested: 64,
                available: 63
            }
        ));
        assert_eq!(err.errno(), -libc::ENOSPC);
        assert_eq!(err.failing_port(), None);

        state.add_payload(port, 100, 63);
        mgr.atomic_check_mgr(&mut state).unwrap();
    }

    #[test]
    fn too_many_payloads() {
        let mut topology = MstTopology::new();
        let primary = topology.set_primary();
        let ports: Vec<PortId> = (0..3)
            .map(|n| {
                topology
                    .add_port(primary, n, PeerDeviceType::SstSink, false, 100)
                    .unwrap()
            })
            .collect();
        let mgr = MstTopologyMgrBuilder::new(2)
            .set_topology(topology)
            .build()
            .unwrap();

        let mut state = mgr.duplicate_state();
        for &port in &ports {
            state.add_payload(port, 10, 1);
        }

        let err = mgr.atomic_check_mgr(&mut state).unwrap_err();
        assert!(matches!(err, DpError::TooManyPayloads { max: 2 }));
        assert_eq!(err.errno(), -libc::EINVAL);
        assert_eq!(err.failing_port(), None);
        assert!(state.payloads().iter().all(|p| p.vcpi.is_none()));
        assert_eq!(state.payload_mask, 0);

        // Released payloads do not count.
        state.release_payload(ports[0]).unwrap();
        mgr.atomic_check_mgr(&mut state).unwrap();
    }

    #[test]
    fn vcpi_assignment_is_stable() {
        let mut topology = MstTopology::new();
        let primary = topology.set_primary();
        let a = topology
            .add_port(primary, 1, PeerDeviceType::SstSink, false, 100)
            .unwrap();
        let b = topology
            .add_port(primary, 2, PeerDeviceType::SstSink, false, 100)
            .unwrap();
        let c = topology
            .add_port(primary, 3, PeerDeviceType::SstSink, false, 100)
            .unwrap();
        let mgr = MstTopologyMgrBuilder::new(4)
            .set_pbn_div(40)
            .set_topology(topology)
            .build()
            .unwrap();

        let mut state = mgr.duplicate_state();
        state.add_payload(a, 10, 1);
        state.add_payload(b, 10, 1);
        mgr.atomic_check_mgr(&mut state).unwrap();
        let first = state.clone();

        mgr.atomic_check_mgr(&mut state).unwrap();
        assert_eq!(state, first);
        assert_eq!(state.payload(a).unwrap().vcpi, Some(1));
        assert_eq!(state.payload(b).unwrap().vcpi, Some(2));

        // The freed VCPI is reused first-fit.
        state.release_payload(a).unwrap();
        state.add_payload(c, 10, 1);
        mgr.atomic_check_mgr(&mut state).unwrap();
        assert_eq!(state.payload(c).unwrap().vcpi, Some(1));
        assert_eq!(state.payload(b).unwrap().vcpi, Some(2));
    }

    #[test]
    fn releasing_everything_resets_pbn_div() {
        let (mgr, port) = single_port_mgr(100);
        let mut state = mgr.duplicate_state();
        state.add_payload(port, 50, 2);
        mgr.atomic_check_mgr(&mut state).unwrap();
        assert_eq!(state.pbn_div, 40);

        state.release_payload(port).unwrap();
        mgr.atomic_check_mgr(&mut state).unwrap();
        assert_eq!(state.pbn_div, 0);
    }

    #[test]
    fn failed_check_leaves_committed_state_alone() {
        let (mgr, port) = single_port_mgr(100);
        let mut state = mgr.duplicate_state();
        state.add_payload(port, 50, 2);
        mgr.atomic_check_mgr(&mut state).unwrap();
        mgr.commit_state(state);

        let committed = mgr.committed_state();
        let mut proposal = mgr.duplicate_state();
        proposal.add_payload(port, 150, 2);
        assert!(mgr.atomic_check_mgr(&mut proposal).is_err());
        assert_eq!(mgr.committed_state(), committed);
        assert_eq!(committed.payload(port).unwrap().pbn, 50);
    }

    #[test]
    fn branch_without_payloads_is_skipped() {
        let (mgr, _, sink) = three_level_mgr(50);
        mgr.lock_topology().set_full_pbn(sink, 0).unwrap();

        // A zero PBN payload doesn't make the relay branch worth visiting, so the sink's
        // missing bandwidth goes unnoticed.
        let mut state = mgr.duplicate_state();
        state.add_payload(sink, 0, 0);
        mgr.atomic_check_mgr(&mut state).unwrap();
        assert_eq!(state.payload(sink).unwrap().vcpi, Some(1));

        state.add_payload(sink, 10, 1);
        let err = mgr.atomic_check_mgr(&mut state).unwrap_err();
        assert!(matches!(err, DpError::NoPortBandwidth(p) if p == sink));
    }

    #[test]
    fn hotplug_updates_are_seen() {
        let (mgr, port) = single_port_mgr(100);
        let mut state = mgr.duplicate_state();
        state.add_payload(port, 80, 2);
        mgr.atomic_check_mgr(&mut state).unwrap();

        mgr.lock_topology().set_full_pbn(port, 60).unwrap();
        assert_eq!(
            mgr.atomic_check_mgr(&mut state).unwrap_err().failing_port(),
            Some(port)
        );

        mgr.lock_topology()
            .set_peer_device(port, PeerDeviceType::None, false)
            .unwrap();
        mgr.atomic_check_mgr(&mut state).unwrap();
    }

    #[test]
    fn check_waits_for_hotplug_update() {
        let (mgr, port) = single_port_mgr(100);
        let mut state = mgr.duplicate_state();
        state.add_payload(port, 80, 2);

        thread::scope(|s| {
            let mut topology = mgr.lock_topology();
            let check = s.spawn(|| mgr.atomic_check_mgr(&mut state));

            // The check can't start until the update below is complete.
            topology.set_full_pbn(port, 0).unwrap();
            topology.set_full_pbn(port, 60).unwrap();
            drop(topology);

            match check.join().unwrap() {
                Err(DpError::BandwidthExceeded { used, limit, .. }) => {
                    assert_eq!(used, 80);
                    assert_eq!(limit, 60);
                }
                r => panic!("unexpected result {:?}", r),
            }
        });
    }

    #[test]
    fn hotplug_updates_are_atomic_to_checks() {
        let (mgr, port) = single_port_mgr(100);

        thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..200 {
                    let mut topology = mgr.lock_topology();
                    topology.set_full_pbn(port, 0).unwrap();
                    topology.set_full_pbn(port, 100).unwrap();
                }
            });

            for _ in 0..200 {
                let mut state = mgr.duplicate_state();
                state.add_payload(port, 100, 3);
                mgr.atomic_check_mgr(&mut state).unwrap();
            }
        });
    }

    #[test]
    fn no_primary_still_checks_link_budget() {
        let mut topology = MstTopology::new();
        let primary = topology.set_primary();
        let ports: Vec<PortId> = (0..3)
            .map(|n| {
                topology
                    .add_port(primary, n, PeerDeviceType::SstSink, false, 100)
                    .unwrap()
            })
            .collect();
        let mgr = MstTopologyMgrBuilder::new(2)
            .set_topology(topology)
            .build()
            .unwrap();
        mgr.lock_topology().clear_primary();

        // Bandwidth is not accounted without a primary branch.
        let mut state = mgr.duplicate_state();
        state.add_payload(ports[0], 1000, 20);
        mgr.atomic_check_mgr(&mut state).unwrap();
        assert_eq!(state.payload(ports[0]).unwrap().vcpi, Some(1));

        // 120 of 63 slots.
        let mut state = mgr.duplicate_state();
        for &port in &ports {
            state.add_payload(port, 10, 40);
        }
        let err = mgr.atomic_check_mgr(&mut state).unwrap_err();
        assert!(matches!(err, DpError::TimeSlotsExceeded { .. }));
        assert_eq!(err.failing_port(), None);
        assert!(state.payloads().iter().all(|p| p.vcpi.is_none()));

        // Within the slot budget but over the payload count.
        let mut state = mgr.duplicate_state();
        for &port in &ports {
            state.add_payload(port, 10, 1);
        }
        assert!(matches!(
            mgr.atomic_check_mgr(&mut state),
            Err(DpError::TooManyPayloads { max: 2 })
        ));
    }

    #[test]
    fn check_multiple_managers() {
        let (mgr_a, port_a) = single_port_mgr(100);
        let (mgr_b, port_b) = single_port_mgr(100);
        let mut state_a = mgr_a.duplicate_state();
        let mut state_b = mgr_b.duplicate_state();
        state_a.add_payload(port_a, 90, 3);
        state_b.add_payload(port_b, 90, 3);

        atomic_check([(&mgr_a, &mut state_a), (&mgr_b, &mut state_b)]).unwrap();

        state_b.add_payload(port_b, 110, 3);
        let err = atomic_check([(&mgr_a, &mut state_a), (&mgr_b, &mut state_b)]).unwrap_err();
        assert_eq!(err.failing_port(), Some(port_b));
    }

    #[test]
    fn downstream_of_parent_takes_lock() {
        let (mgr, relay_port, sink) = three_level_mgr(50);
        assert!(mgr.port_downstream_of_parent(sink, Some(relay_port)));
        assert!(mgr.port_downstream_of_parent(sink, None));
        assert!(!mgr.port_downstream_of_parent(relay_port, Some(sink)));
    }

    #[test]
    fn builder_validation() {
        assert!(MstTopologyMgrBuilder::new(0).build().is_err());
        assert!(MstTopologyMgrBuilder::new(64).build().is_err());
        assert!(MstTopologyMgrBuilder::new(4)
            .set_total_avail_slots(0)
            .build()
            .is_err());
        assert!(MstTopologyMgrBuilder::new(4)
            .set_total_avail_slots(65)
            .build()
            .is_err());

        let mgr = MstTopologyMgrBuilder::new(4).set_uhbr(true).build().unwrap();
        assert_eq!(mgr.committed_state().total_avail_slots, 64);
        assert_eq!(mgr.max_payloads(), 4);
    }
}
