// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! dp_helper: DisplayPort link math and DPCD capability helpers.
//!
//! The bandwidth overhead helpers follow DP Standard v2.1 2.6.4, 2.7.9 and 2.8.  Ratios are
//! expressed in 1ppm units, so 1000000 means "no overhead".

use bitflags::bitflags;
use log::warn;

use crate::dp_utils::*;

/// DSC capability block, DPCD 0x060 through 0x06f.
pub const DP_DSC_SUPPORT: usize = 0x060;
pub const DP_DSC_BITS_PER_PIXEL_INC: usize = 0x06f;
pub const DP_DSC_RECEIVER_CAP_SIZE: usize = 0x10;

/// Encodings of the DP_DSC_BITS_PER_PIXEL_INC register.
pub const DP_DSC_BITS_PER_PIXEL_1_16: u8 = 0x0;
pub const DP_DSC_BITS_PER_PIXEL_1_8: u8 = 0x1;
pub const DP_DSC_BITS_PER_PIXEL_1_4: u8 = 0x2;
pub const DP_DSC_BITS_PER_PIXEL_1_2: u8 = 0x3;
pub const DP_DSC_BITS_PER_PIXEL_1_1: u8 = 0x4;

/// DP_DSC_ENABLE / DP_DSC_SUPPORT bits added alongside HBLANK expansion.
pub const DP_HBLANK_EXPANSION_CAPABLE: u8 = 1 << 3;
pub const DP_DSC_PASSTHROUGH_EN: u8 = 1 << 1;

/// Link rates at or above this value (in 10kbit/s units) use 128b/132b channel coding.
pub const DP_UHBR_MIN_LINK_RATE: u32 = 1_000_000;

const BW_OVERHEAD_NONE_PPM: u64 = 1_000_000;
/// SSC downspread and reference clock variation margin: 5300ppm + 300ppm ~ 0.6%.
const BW_OVERHEAD_SSC_REF_CLK_PPM: u64 = 6_000;
/// 8b/10b FEC symbol insertion: (256 * 6 + 1) / (256 * 250) = 2.4015625%.
const BW_OVERHEAD_FEC_PPM: u64 = 24_016;

const SYMBOL_SIZE_8B10B: u32 = 8;
const SYMBOL_SIZE_128B132B: u32 = 32;

bitflags! {
    /// Link and stream properties affecting `bw_overhead()`.
    pub struct BwOverheadFlags: u32 {
        const MST = 1 << 0;
        const UHBR = 1 << 1;
        const SSC_REF_CLK = 1 << 2;
        const FEC = 1 << 3;
        const DSC = 1 << 4;
    }
}

/// Returns the bits per pixel precision supported by a DSC sink, as the denominator of the
/// increment (16 means 1/16 bpp steps).  Returns 0 for reserved encodings.
pub fn dsc_sink_bpp_incr(dsc_dpcd: &[u8; DP_DSC_RECEIVER_CAP_SIZE]) -> u8 {
    match dsc_dpcd[DP_DSC_BITS_PER_PIXEL_INC - DP_DSC_SUPPORT] {
        DP_DSC_BITS_PER_PIXEL_1_16 => 16,
        DP_DSC_BITS_PER_PIXEL_1_8 => 8,
        DP_DSC_BITS_PER_PIXEL_1_4 => 4,
        DP_DSC_BITS_PER_PIXEL_1_2 => 2,
        DP_DSC_BITS_PER_PIXEL_1_1 => 1,
        _ => 0,
    }
}

/// Determines if a link rate in 10kbit/s units is an UHBR rate.
pub fn is_uhbr_rate(link_rate: u32) -> bool {
    link_rate >= DP_UHBR_MIN_LINK_RATE
}

fn mst_alignment(lane_count: u32, is_mst: bool) -> u64 {
    if is_mst {
        // MTP symbols are spread over 4 lane-slots.
        u64::from((4 / lane_count.max(1)).max(1))
    } else {
        1
    }
}

/// Number of link symbol cycles needed to carry `pixels` at `bpp_x16` (bits per pixel in .4
/// binary fixed point).  In MST mode the result is aligned to a full MTP slot across lanes.
pub fn link_symbol_cycles(
    lane_count: u32,
    pixels: u32,
    bpp_x16: u32,
    symbol_size: u32,
    is_mst: bool,
) -> u64 {
    let data_bits = u64::from(pixels) * u64::from(bpp_x16);
    let bits_per_cycle = 16 * u64::from(symbol_size) * u64::from(lane_count.max(1));
    let cycles = data_bits.div_ceil(bits_per_cycle);
    let align = mst_alignment(lane_count, is_mst);

    cycles.div_ceil(align) * align
}

/// Like `link_symbol_cycles()`, but for a DSC compressed stream split into `slice_count`
/// slices, each followed by an end-of-chunk symbol.
pub fn link_dsc_symbol_cycles(
    lane_count: u32,
    pixels: u32,
    slice_count: u32,
    bpp_x16: u32,
    symbol_size: u32,
    is_mst: bool,
) -> u64 {
    let slice_count = slice_count.max(1);
    let slice_pixels = pixels.div_ceil(slice_count);
    let slice_data_cycles =
        link_symbol_cycles(lane_count, slice_pixels, bpp_x16, symbol_size, is_mst);
    let slice_eoc_cycles = mst_alignment(lane_count, is_mst);

    u64::from(slice_count) * (slice_data_cycles + slice_eoc_cycles)
}

/// Calculates the bandwidth allocation overhead of a DP link stream, as 100% + overhead% in
/// 1ppm units.
///
/// The result depends on the link's `lane_count`, SST/MST mode, symbol size (UHBR), FEC and
/// SSC/REF_CLK mode, as well as the stream's `hactive` timing, `bpp_x16` color depth and
/// compression mode.  `dsc_slice_count` is only used with `BwOverheadFlags::DSC`.
///
/// The 8b/10b and 128b/132b channel coding efficiency is not included here, see
/// `bw_channel_coding_efficiency()`.  UHBR links account for FEC in their coding efficiency, so
/// passing both `UHBR` and `FEC` is rejected.
pub fn bw_overhead(
    lane_count: u32,
    hactive: u32,
    dsc_slice_count: u32,
    bpp_x16: u32,
    flags: BwOverheadFlags,
) -> DpResult<u32> {
    if flags.contains(BwOverheadFlags::UHBR | BwOverheadFlags::FEC) {
        warn!("FEC overhead requested on an UHBR link (flags {:#x})", flags.bits());
        return Err(DpError::ConflictingOverheadFlags);
    }

    let symbol_size = if flags.contains(BwOverheadFlags::UHBR) {
        SYMBOL_SIZE_128B132B
    } else {
        SYMBOL_SIZE_8B10B
    };
    let is_mst = flags.contains(BwOverheadFlags::MST);

    let mut overhead = BW_OVERHEAD_NONE_PPM;
    if flags.contains(BwOverheadFlags::SSC_REF_CLK) {
        overhead += BW_OVERHEAD_SSC_REF_CLK_PPM;
    }
    if flags.contains(BwOverheadFlags::FEC) {
        overhead += BW_OVERHEAD_FEC_PPM;
    }

    let symbol_cycles = if flags.contains(BwOverheadFlags::DSC) {
        link_dsc_symbol_cycles(
            lane_count,
            hactive,
            dsc_slice_count,
            bpp_x16,
            symbol_size,
            is_mst,
        )
    } else {
        link_symbol_cycles(lane_count, hactive, bpp_x16, symbol_size, is_mst)
    };

    let lane_symbols = u64::from(symbol_size) * u64::from(lane_count);
    let link_symbols = checked_arithmetic!(symbol_cycles * lane_symbols)?;
    let scaled_overhead = overhead * 16;
    let total = checked_arithmetic!(link_symbols * scaled_overhead)?;
    let data_bits = u64::from(hactive) * u64::from(bpp_x16);

    let mut ratio = checked_arithmetic!(total / data_bits)?;
    if total % data_bits != 0 {
        ratio += 1;
    }

    Ok(u32::try_from(ratio)?)
}

/// Returns the channel coding efficiency of a DP link in 1ppm units: 128b/132b (UHBR) or
/// 8b/10b.
///
/// For 128b/132b this includes the link and PHY level control symbol insertion (LLCP, FEC,
/// PHY sync).  On 8b/10b MST links the efficiency is only 78.75% due to the 1 in 64 MTPH
/// overhead, which callers have to account for themselves.
pub fn bw_channel_coding_efficiency(is_uhbr: bool) -> u32 {
    if is_uhbr {
        967_100
    } else {
        800_000
    }
}
