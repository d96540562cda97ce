// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! dp_cec: CEC tunneling over the DisplayPort AUX channel.
//!
//! The AUX transport and the CEC core are external; they are reached through the `DpAux` and
//! `CecFramework` traits.  `DpCec` keeps at most one adapter registered per connector and
//! replaces it whenever the sink's tunneling capabilities change.

use std::fmt;
use std::sync::Mutex;

use bitflags::bitflags;
use log::debug;
use log::error;
use zerocopy::AsBytes;
use zerocopy::FromBytes;

use crate::dp_utils::*;
use crate::drm_edid::cec_phys_addr;
use crate::drm_edid::DrmEdid;

/// DPCD device identification.
pub const DP_SINK_OUI: u32 = 0x400;
pub const DP_BRANCH_OUI: u32 = 0x500;

/// DPCD CEC tunneling registers.
pub const DP_CEC_TUNNELING_CAPABILITY: u32 = 0x3000;
pub const DP_CEC_TUNNELING_CAPABLE: u8 = 1 << 0;
pub const DP_CEC_SNOOPING_CAPABLE: u8 = 1 << 1;
pub const DP_CEC_MULTIPLE_LA_CAPABLE: u8 = 1 << 2;

pub const DP_CEC_TUNNELING_CONTROL: u32 = 0x3001;
pub const DP_CEC_TUNNELING_ENABLE: u8 = 1 << 0;
pub const DP_CEC_SNOOPING_ENABLE: u8 = 1 << 1;

pub const DP_CEC_RX_MESSAGE_INFO: u32 = 0x3002;
pub const DP_CEC_TX_MESSAGE_INFO: u32 = 0x3003;
pub const DP_CEC_TX_MESSAGE_SEND: u8 = 1 << 7;
pub const DP_CEC_LOGICAL_ADDRESS_MASK: u32 = 0x300e;
pub const DP_CEC_RX_MESSAGE_BUFFER: u32 = 0x3010;
pub const DP_CEC_TX_MESSAGE_BUFFER: u32 = 0x3020;

pub const CEC_LOG_ADDR_BROADCAST: u8 = 15;
pub const CEC_LOG_ADDR_INVALID: u8 = 0xff;
pub const CEC_MAX_LOG_ADDRS: u32 = 4;
pub const CEC_MAX_MSG_SIZE: usize = 16;
pub const CEC_PHYS_ADDR_INVALID: u16 = 0xffff;

const CEC_MAX_TX_RETRIES: u8 = 5;

bitflags! {
    /// CEC adapter capabilities.
    pub struct CecCaps: u32 {
        const PHYS_ADDR = 1 << 0;
        const LOG_ADDRS = 1 << 1;
        const TRANSMIT = 1 << 2;
        const PASSTHROUGH = 1 << 3;
        const RC = 1 << 4;
        const MONITOR_ALL = 1 << 5;
        const NEEDS_HPD = 1 << 6;
        const MONITOR_PIN = 1 << 7;
        const CONNECTOR_INFO = 1 << 8;
        const DEFAULTS = Self::LOG_ADDRS.bits
            | Self::TRANSMIT.bits
            | Self::PASSTHROUGH.bits
            | Self::RC.bits;
    }
}

/// Access to the DPCD of a sink over the AUX channel.
///
/// Implementations backed by a device node can return `nix` errors with `?`; they convert into
/// `DpError::NixError` and keep their errno.
pub trait DpAux {
    /// Returns false if no transfer function is wired up, i.e. this is not a DP connector.
    fn has_transfer(&self) -> bool {
        true
    }

    /// Reads DPCD registers starting at `offset`.  Returns the number of bytes read.
    fn dpcd_read(&mut self, offset: u32, buf: &mut [u8]) -> DpResult<usize>;

    /// Writes DPCD registers starting at `offset`.  Returns the number of bytes written.
    fn dpcd_write(&mut self, offset: u32, buf: &[u8]) -> DpResult<usize>;

    fn dpcd_readb(&mut self, offset: u32) -> DpResult<u8> {
        let mut value = [0u8];
        let actual = self.dpcd_read(offset, &mut value)?;
        if actual != 1 {
            return Err(DpError::AuxShortTransfer {
                offset,
                expected: 1,
                actual,
            });
        }
        Ok(value[0])
    }

    fn dpcd_writeb(&mut self, offset: u32, value: u8) -> DpResult<()> {
        dpcd_write_all(self, offset, &[value])
    }
}

fn dpcd_write_all<A: DpAux + ?Sized>(aux: &mut A, offset: u32, buf: &[u8]) -> DpResult<()> {
    let actual = aux.dpcd_write(offset, buf)?;
    if actual != buf.len() {
        return Err(DpError::AuxShortTransfer {
            offset,
            expected: buf.len(),
            actual,
        });
    }
    Ok(())
}

/// DPCD device identification block.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromBytes)]
pub struct DpDpcdIdent {
    pub oui: [u8; 3],
    pub device_id: [u8; 6],
    pub hw_rev: u8,
    pub sw_major_rev: u8,
    pub sw_minor_rev: u8,
}

/// Reads the sink or branch identification block.
pub fn read_desc<A: DpAux + ?Sized>(aux: &mut A, is_branch: bool) -> DpResult<DpDpcdIdent> {
    let offset = if is_branch { DP_BRANCH_OUI } else { DP_SINK_OUI };
    let mut ident = DpDpcdIdent::default();
    let buf = ident.as_bytes_mut();
    let expected = buf.len();
    let actual = aux.dpcd_read(offset, buf)?;
    if actual != expected {
        return Err(DpError::AuxShortTransfer {
            offset,
            expected,
            actual,
        });
    }
    Ok(ident)
}

/// Reads the CEC tunneling capability byte, if the sink supports tunneling at all.
fn cec_cap<A: DpAux + ?Sized>(aux: &mut A) -> Option<u8> {
    match aux.dpcd_readb(DP_CEC_TUNNELING_CAPABILITY) {
        Ok(cap) if cap & DP_CEC_TUNNELING_CAPABLE != 0 => Some(cap),
        _ => None,
    }
}

/// A CEC adapter tunneled over AUX.  The CEC core drives it through these callbacks.
#[derive(Debug)]
pub struct DpCecAdapter {
    name: String,
    capabilities: CecCaps,
    available_log_addrs: u32,
    log_addr_mask: u16,
}

impl DpCecAdapter {
    fn new(name: &str, capabilities: CecCaps, available_log_addrs: u32) -> DpCecAdapter {
        DpCecAdapter {
            name: name.to_string(),
            capabilities,
            available_log_addrs,
            log_addr_mask: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capabilities(&self) -> CecCaps {
        self.capabilities
    }

    pub fn available_log_addrs(&self) -> u32 {
        self.available_log_addrs
    }

    /// Logical addresses claimed so far.
    pub fn log_addr_mask(&self) -> u16 {
        self.log_addr_mask
    }

    /// Turns tunneling on or off.  Failures are only reported when enabling.
    pub fn enable<A: DpAux + ?Sized>(&self, aux: &mut A, enable: bool) -> DpResult<()> {
        let val = if enable { DP_CEC_TUNNELING_ENABLE } else { 0 };
        match aux.dpcd_writeb(DP_CEC_TUNNELING_CONTROL, val) {
            Err(e) if enable => Err(e),
            _ => Ok(()),
        }
    }

    /// Claims logical address `addr`, or releases all of them with `CEC_LOG_ADDR_INVALID`.
    /// The broadcast address is always kept.
    pub fn log_addr<A: DpAux + ?Sized>(&mut self, aux: &mut A, addr: u8) -> DpResult<()> {
        let claim = addr != CEC_LOG_ADDR_INVALID;
        let mut la_mask = if claim {
            self.log_addr_mask | 1u16.checked_shl(u32::from(addr)).unwrap_or(0)
        } else {
            0
        };
        la_mask |= 1 << CEC_LOG_ADDR_BROADCAST;

        match dpcd_write_all(aux, DP_CEC_LOGICAL_ADDRESS_MASK, &la_mask.to_le_bytes()) {
            Err(e) if claim => Err(e),
            _ => {
                self.log_addr_mask = if claim {
                    la_mask & !(1 << CEC_LOG_ADDR_BROADCAST)
                } else {
                    0
                };
                Ok(())
            }
        }
    }

    /// Queues `msg` for transmission with up to `attempts` tries.
    pub fn transmit<A: DpAux + ?Sized>(&self, aux: &mut A, attempts: u8, msg: &[u8]) -> DpResult<()> {
        if msg.is_empty() || msg.len() > CEC_MAX_MSG_SIZE {
            return Err(DpError::InvalidCecMessage(msg.len()));
        }
        let retries = attempts.saturating_sub(1).min(CEC_MAX_TX_RETRIES);

        dpcd_write_all(aux, DP_CEC_TX_MESSAGE_BUFFER, msg)?;
        let info = (msg.len() - 1) as u8 | (retries << 4) | DP_CEC_TX_MESSAGE_SEND;
        aux.dpcd_writeb(DP_CEC_TX_MESSAGE_INFO, info)
    }

    /// Toggles snooping of all CEC traffic, when the sink supports it.
    pub fn monitor_all_enable<A: DpAux + ?Sized>(&self, aux: &mut A, enable: bool) -> DpResult<()> {
        if !self.capabilities.contains(CecCaps::MONITOR_ALL) {
            return Ok(());
        }

        let res = aux
            .dpcd_readb(DP_CEC_TUNNELING_CONTROL)
            .and_then(|mut val| {
                if enable {
                    val |= DP_CEC_SNOOPING_ENABLE;
                } else {
                    val &= !DP_CEC_SNOOPING_ENABLE;
                }
                aux.dpcd_writeb(DP_CEC_TUNNELING_CONTROL, val)
            });
        match res {
            Err(e) if enable => Err(e),
            _ => Ok(()),
        }
    }

    /// Describes the branch device carrying the tunnel.
    pub fn status<A: DpAux + ?Sized, W: fmt::Write>(&self, aux: &mut A, out: &mut W) -> fmt::Result {
        let id = match read_desc(aux, true) {
            Ok(id) => id,
            Err(_) => return Ok(()),
        };

        let oui: Vec<String> = id.oui.iter().map(|b| format!("{:02x}", b)).collect();
        writeln!(out, "OUI: {}", oui.join("-"))?;
        let id_len = id
            .device_id
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(id.device_id.len());
        writeln!(out, "ID: {}", id.device_id[..id_len].escape_ascii())?;
        writeln!(out, "HW Rev: {}.{}", id.hw_rev >> 4, id.hw_rev & 0xf)?;
        // Some vendors report this in hex, so show both.
        writeln!(
            out,
            "FW/SW Rev: {}.{} (0x{:02x}.0x{:02x})",
            id.sw_major_rev, id.sw_minor_rev, id.sw_major_rev, id.sw_minor_rev
        )
    }
}

/// The CEC core, which owns registered adapters.
pub trait CecFramework {
    type Handle;

    fn register_adapter(&mut self, adapter: &DpCecAdapter) -> DpResult<Self::Handle>;
    fn unregister_adapter(&mut self, handle: Self::Handle);
    fn set_phys_addr(&mut self, handle: &Self::Handle, phys_addr: u16);
}

struct RegisteredAdapter<H> {
    adapter: DpCecAdapter,
    handle: H,
}

/// CEC tunneling state of one DP connector.
pub struct DpCec<H> {
    connector_name: String,
    adapter: Mutex<Option<RegisteredAdapter<H>>>,
}

impl<H> DpCec<H> {
    pub fn new(connector_name: &str) -> DpCec<H> {
        DpCec {
            connector_name: connector_name.to_string(),
            adapter: Mutex::new(None),
        }
    }

    fn default_caps() -> CecCaps {
        let caps = CecCaps::DEFAULTS | CecCaps::NEEDS_HPD | CecCaps::CONNECTOR_INFO;
        // The CEC core strips RC support when it is not built in.
        #[cfg(not(feature = "cec_rc"))]
        let caps = caps - CecCaps::RC;
        caps
    }

    /// Sets up CEC tunneling for a newly connected sink.
    ///
    /// Without tunneling support any existing adapter is unregistered.  If an adapter with the
    /// same capabilities is already registered only its physical address is updated, otherwise
    /// the adapter is replaced.
    pub fn attach<A, F>(&self, aux: &mut A, framework: &mut F, source_physical_address: u16)
    where
        A: DpAux + ?Sized,
        F: CecFramework<Handle = H>,
    {
        if !aux.has_transfer() {
            return;
        }

        let mut caps = Self::default_caps();
        let mut current = self.adapter.lock().unwrap();

        let cap = match cec_cap(aux) {
            Some(cap) => cap,
            None => {
                if let Some(old) = current.take() {
                    debug!("{}: CEC tunneling gone, unregistering adapter", self.connector_name);
                    framework.unregister_adapter(old.handle);
                }
                return;
            }
        };

        if cap & DP_CEC_SNOOPING_CAPABLE != 0 {
            caps |= CecCaps::MONITOR_ALL;
        }
        let num_las = if cap & DP_CEC_MULTIPLE_LA_CAPABLE != 0 {
            CEC_MAX_LOG_ADDRS
        } else {
            1
        };

        if let Some(old) = current.take() {
            if old.adapter.capabilities == caps && old.adapter.available_log_addrs == num_las {
                framework.set_phys_addr(&old.handle, source_physical_address);
                *current = Some(old);
                return;
            }
            debug!("{}: CEC capabilities changed", self.connector_name);
            framework.unregister_adapter(old.handle);
        }

        let adapter = DpCecAdapter::new(&self.connector_name, caps, num_las);
        match framework.register_adapter(&adapter) {
            Ok(handle) => {
                framework.set_phys_addr(&handle, source_physical_address);
                *current = Some(RegisteredAdapter { adapter, handle });
            }
            Err(e) => error!(
                "{}: failed to register CEC adapter: {}",
                self.connector_name, e
            ),
        }
    }

    /// Like `attach()`, taking the physical address from the sink's EDID.
    pub fn set_edid<A, F>(&self, aux: &mut A, framework: &mut F, edid: Option<&DrmEdid>)
    where
        A: DpAux + ?Sized,
        F: CecFramework<Handle = H>,
    {
        let pa = match edid {
            Some(edid) if edid.edid().extensions != 0 => cec_phys_addr(edid),
            _ => CEC_PHYS_ADDR_INVALID,
        };

        self.attach(aux, framework, pa);
    }

    /// Unregisters the adapter, e.g. when the connector goes away.
    pub fn unregister<F: CecFramework<Handle = H>>(&self, framework: &mut F) {
        if let Some(old) = self.adapter.lock().unwrap().take() {
            framework.unregister_adapter(old.handle);
        }
    }

    /// Runs `f` on the registered adapter, if any.
    pub fn with_adapter<R>(&self, f: impl FnOnce(&mut DpCecAdapter) -> R) -> Option<R> {
        self.adapter
            .lock()
            .unwrap()
            .as_mut()
            .map(|registered| f(&mut registered.adapter))
    }
}
