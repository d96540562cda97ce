// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A crate for DisplayPort helpers: MST bandwidth and time slot admission checks, link
//! bandwidth overhead calculation, and the EDID, blob property and CEC tunneling pieces they
//! lean on.

#[macro_use]
mod macros;
mod dp_cec;
mod dp_helper;
mod dp_mst;
mod dp_utils;
mod drm_edid;
mod drm_property;

pub use crate::dp_cec::*;
pub use crate::dp_helper::*;
pub use crate::dp_mst::*;
pub use crate::dp_utils::*;
pub use crate::drm_edid::*;
pub use crate::drm_property::*;
