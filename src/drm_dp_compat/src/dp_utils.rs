// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! dp_utils: Error type and shared result alias used by the rest of the crate.

use std::num::TryFromIntError;

#[cfg(unix)]
use nix::Error as NixError;
use remain::sorted;
use thiserror::Error;

use crate::dp_mst::BranchId;
use crate::dp_mst::PortId;

/// An error generated while using this crate.
#[sorted]
#[derive(Error, Debug)]
pub enum DpError {
    /// A DPCD access moved fewer bytes than requested.
    #[error("short AUX transfer at DPCD {offset:#06x}: {actual} of {expected} bytes")]
    AuxShortTransfer {
        offset: u32,
        expected: usize,
        actual: usize,
    },
    /// The PBN routed through a port exceeds what the port can carry.
    #[error("{port} required PBN of {used} exceeds port limit of {limit}")]
    BandwidthExceeded { port: PortId, used: u32, limit: u32 },
    /// The external CEC framework refused an adapter operation.
    #[error("CEC adapter operation failed with errno {0}")]
    CecAdapterError(i32),
    /// Checked Arithmetic error
    #[error("arithmetic failed: {}({}) {op} {}({})", .field1.0, .field1.1, .field2.0, .field2.1)]
    CheckedArithmetic {
        field1: (&'static str, usize),
        field2: (&'static str, usize),
        op: &'static str,
    },
    /// Checked Range error
    #[error("range check failed: {}({}) vs {}({})", .field1.0, .field1.1, .field2.0, .field2.1)]
    CheckedRange {
        field1: (&'static str, usize),
        field2: (&'static str, usize),
    },
    /// UHBR channel coding already accounts for FEC, so both flags can't be requested.
    #[error("UHBR and FEC bandwidth overhead flags are mutually exclusive")]
    ConflictingOverheadFlags,
    /// A blob's length is not a multiple of the expected element size.
    #[error("[BLOB:{blob_id}] length {length} not divisible by element size {elem_size}")]
    InvalidBlobElementSize {
        blob_id: u32,
        length: usize,
        elem_size: usize,
    },
    /// No blob is registered under the requested id.
    #[error("cannot find blob ID {0}")]
    InvalidBlobId(u64),
    /// A blob's length differs from the expected size.
    #[error("[BLOB:{blob_id}] length {length} different from expected {expected}")]
    InvalidBlobLength {
        blob_id: u32,
        length: usize,
        expected: usize,
    },
    /// The branch handle does not belong to this topology.
    #[error("invalid branch handle {0}")]
    InvalidBranchId(BranchId),
    /// A CEC message must carry between 1 and 16 bytes.
    #[error("invalid CEC message length {0}")]
    InvalidCecMessage(usize),
    /// An EDID shorter than one base block was supplied.
    #[error("invalid EDID length {0}")]
    InvalidEdidLength(usize),
    /// Indicates an error in the MstTopologyMgrBuilder.
    #[error("invalid MST manager build parameters: {0}")]
    InvalidMgrBuild(&'static str),
    /// The port handle does not belong to this topology or has no payload.
    #[error("invalid port handle {0}")]
    InvalidPortId(PortId),
    /// Nix crate error.
    #[cfg(unix)]
    #[error("The errno is {0}")]
    NixError(NixError),
    /// An attached end device reports no bandwidth at all.
    #[error("{0} no BW available for the port")]
    NoPortBandwidth(PortId),
    /// The live payloads need more time slots than the link provides.
    #[error("not enough time slots: {requested} requested, {available} available")]
    TimeSlotsExceeded { requested: u32, available: u32 },
    /// More live payloads than the manager supports.
    #[error("too many payloads (max={max})")]
    TooManyPayloads { max: u32 },
    /// An attempted integer conversion failed.
    #[error("int conversion failed: {0}")]
    TryFromIntError(TryFromIntError),
}

impl DpError {
    /// Returns the kernel-style negative errno matching this error.
    pub fn errno(&self) -> i32 {
        match self {
            DpError::BandwidthExceeded { .. } | DpError::TimeSlotsExceeded { .. } => -libc::ENOSPC,
            DpError::AuxShortTransfer { .. } => -libc::EIO,
            DpError::CecAdapterError(e) => -e.abs(),
            #[cfg(unix)]
            DpError::NixError(e) => -(*e as i32),
            DpError::TryFromIntError(_) => -libc::ERANGE,
            _ => -libc::EINVAL,
        }
    }

    /// Returns the port a bandwidth failure is attributed to.  `None` means the failure is
    /// global to the link (slot budget, payload count) or unrelated to the topology.
    pub fn failing_port(&self) -> Option<PortId> {
        match self {
            DpError::BandwidthExceeded { port, .. } => Some(*port),
            DpError::NoPortBandwidth(port) => Some(*port),
            _ => None,
        }
    }
}

#[cfg(unix)]
impl From<NixError> for DpError {
    fn from(e: NixError) -> DpError {
        DpError::NixError(e)
    }
}

impl From<TryFromIntError> for DpError {
    fn from(e: TryFromIntError) -> DpError {
        DpError::TryFromIntError(e)
    }
}

/// The result of an operation in this crate.
pub type DpResult<T> = std::result::Result<T, DpError>;
