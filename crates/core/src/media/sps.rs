//! H.264 Sequence Parameter Set parsing (ITU-T H.264 §7.3.2.1).
//!
//! Only the fields needed to size a decoder are extracted: coded picture
//! dimensions after cropping and, when the VUI carries fixed-rate timing,
//! the frame rate. Everything else is read and discarded in bitstream
//! order.
//!
//! Parsing is best-effort. [`parse_sps`] never fails: a truncated or
//! garbage SPS yields [`VideoParams::UNKNOWN`] and the stream carries on.

use super::bits::{BitReader, strip_emulation_prevention};
use crate::error::{Result, RtspError};
use crate::track::{UNKNOWN, VideoParams};

/// `profile_idc` values whose SPS carries chroma format, bit depth and
/// scaling matrices.
const HIGH_PROFILES: [u32; 9] = [100, 110, 122, 244, 44, 83, 86, 118, 128];

/// Parse an SPS NAL unit, with or without an Annex-B start code.
pub fn parse_sps(nal: &[u8]) -> VideoParams {
    match try_parse_sps(nal) {
        Ok(params) => params,
        Err(e) => {
            tracing::debug!(error = %e, len = nal.len(), "SPS not parsed");
            VideoParams::UNKNOWN
        }
    }
}

/// Strict variant of [`parse_sps`] that reports why parsing stopped.
pub fn try_parse_sps(nal: &[u8]) -> Result<VideoParams> {
    let nal = skip_start_code(nal);
    if nal.first().map(|b| b & 0x1F) != Some(7) {
        return Err(RtspError::UnsupportedSample("not an SPS NAL unit".into()));
    }

    let rbsp = strip_emulation_prevention(&nal[1..]);
    let mut r = BitReader::new(&rbsp);

    let profile_idc = r.read_bits(8)?;
    r.skip(8)?; // constraint_set flags + reserved
    r.skip(8)?; // level_idc
    r.read_ue()?; // seq_parameter_set_id

    if HIGH_PROFILES.contains(&profile_idc) {
        let chroma_format_idc = r.read_ue()?;
        if chroma_format_idc == 3 {
            r.skip(1)?; // separate_colour_plane_flag
        }
        r.read_ue()?; // bit_depth_luma_minus8
        r.read_ue()?; // bit_depth_chroma_minus8
        r.skip(1)?; // qpprime_y_zero_transform_bypass_flag
        if r.read_flag()? {
            let lists = if chroma_format_idc == 3 { 12 } else { 8 };
            for i in 0..lists {
                if r.read_flag()? {
                    skip_scaling_list(&mut r, if i < 6 { 16 } else { 64 })?;
                }
            }
        }
    }

    r.read_ue()?; // log2_max_frame_num_minus4
    match r.read_ue()? {
        0 => {
            r.read_ue()?; // log2_max_pic_order_cnt_lsb_minus4
        }
        1 => {
            r.skip(1)?; // delta_pic_order_always_zero_flag
            r.read_se()?; // offset_for_non_ref_pic
            r.read_se()?; // offset_for_top_to_bottom_field
            let cycle = r.read_ue()?;
            for _ in 0..cycle {
                r.read_se()?;
            }
        }
        _ => {}
    }

    r.read_ue()?; // max_num_ref_frames
    r.skip(1)?; // gaps_in_frame_num_value_allowed_flag
    let width_mbs = r.read_ue()? as i64 + 1;
    let height_map_units = r.read_ue()? as i64 + 1;
    let frame_mbs_only = r.read_bits(1)? as i64;
    if frame_mbs_only == 0 {
        r.skip(1)?; // mb_adaptive_frame_field_flag
    }
    r.skip(1)?; // direct_8x8_inference_flag

    let (mut crop_left, mut crop_right, mut crop_top, mut crop_bottom) = (0i64, 0i64, 0i64, 0i64);
    if r.read_flag()? {
        crop_left = r.read_ue()? as i64;
        crop_right = r.read_ue()? as i64;
        crop_top = r.read_ue()? as i64;
        crop_bottom = r.read_ue()? as i64;
    }

    let fps = if r.read_flag()? {
        read_vui_fps(&mut r)?
    } else {
        None
    };

    let width = width_mbs * 16 - 2 * (crop_left + crop_right);
    let height = (2 - frame_mbs_only) * height_map_units * 16
        - if frame_mbs_only != 0 { 2 } else { 4 } * (crop_top + crop_bottom);

    Ok(VideoParams {
        width: known(width),
        height: known(height),
        fps: fps.map(known).unwrap_or(UNKNOWN),
    })
}

/// Walk the VUI up to `timing_info` (Annex E.1.1) and derive the frame
/// rate when `fixed_frame_rate_flag` is set.
fn read_vui_fps(r: &mut BitReader<'_>) -> Result<Option<i64>> {
    if r.read_flag()? {
        // aspect_ratio_idc == Extended_SAR carries explicit sar_width/height
        if r.read_bits(8)? == 255 {
            r.skip(32)?;
        }
    }
    if r.read_flag()? {
        r.skip(1)?; // overscan_appropriate_flag
    }
    if r.read_flag()? {
        r.skip(4)?; // video_format + video_full_range_flag
        if r.read_flag()? {
            r.skip(24)?; // colour_primaries, transfer_characteristics, matrix_coefficients
        }
    }
    if r.read_flag()? {
        r.read_ue()?;
        r.read_ue()?;
    }
    if !r.read_flag()? {
        return Ok(None);
    }

    let num_units_in_tick = r.read_bits(32)? as i64;
    let time_scale = r.read_bits(32)? as i64;
    let fixed_frame_rate = r.read_flag()?;
    if !fixed_frame_rate || num_units_in_tick == 0 {
        return Ok(None);
    }
    // Two ticks per frame: ceil(time_scale / num_units_in_tick) / 2.
    let ticks = (time_scale + num_units_in_tick - 1) / num_units_in_tick;
    Ok(Some(ticks / 2))
}

fn skip_scaling_list(r: &mut BitReader<'_>, size: usize) -> Result<()> {
    let mut last_scale = 8i32;
    let mut next_scale = 8i32;
    for _ in 0..size {
        if next_scale != 0 {
            let delta = r.read_se()?;
            next_scale = (last_scale + delta + 256).rem_euclid(256);
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }
    Ok(())
}

fn skip_start_code(nal: &[u8]) -> &[u8] {
    if nal.starts_with(&[0, 0, 0, 1]) {
        &nal[4..]
    } else if nal.starts_with(&[0, 0, 1]) {
        &nal[3..]
    } else {
        nal
    }
}

fn known(value: i64) -> i32 {
    if value > 0 && value <= i32::MAX as i64 {
        value as i32
    } else {
        UNKNOWN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// High profile, level 4.2, 1920x1088 cropped to 1080, with scaling
    /// matrices off and an emulation prevention byte.
    const HIGH_1080P: [u8; 26] = [
        0x67, 0x64, 0x00, 0x2a, 0xac, 0xd9, 0x40, 0x78, 0x02, 0x27, 0xe5, 0x84, 0x00, 0x00, 0x03,
        0x00, 0x04, 0x00, 0x00, 0x03, 0x00, 0xf0, 0x3c, 0x60, 0xc6, 0x58,
    ];

    /// Main profile 1080p from a surveillance camera.
    const MAIN_1080P: [u8; 37] = [
        0x67, 0x4d, 0x40, 0x29, 0x96, 0x52, 0x80, 0xf0, 0x04, 0x4f, 0xcb, 0x80, 0xb5, 0x01, 0x01,
        0x01, 0x40, 0x00, 0x00, 0x03, 0x00, 0x40, 0x00, 0x00, 0x0c, 0x8e, 0x08, 0x00, 0x0c, 0x35,
        0x00, 0x06, 0x6a, 0x5f, 0x7b, 0xe1, 0xe2,
    ];

    /// Constrained baseline 640x360.
    const BASELINE_360P: [u8; 24] = [
        0x67, 0x42, 0xc0, 0x1e, 0x95, 0xa0, 0x28, 0x0b, 0xfe, 0x5c, 0x04, 0x40, 0x00, 0x00, 0x03,
        0x00, 0x40, 0x00, 0x00, 0x0c, 0x83, 0xc5, 0x8b, 0x92,
    ];

    /// Baseline 1080p with VUI timing: num_units_in_tick=1, time_scale=50,
    /// fixed_frame_rate_flag=1.
    const TIMED_1080P_25: [u8; 21] = [
        0x67, 0x42, 0xc0, 0x28, 0xf4, 0x03, 0xc0, 0x11, 0x3f, 0x2c, 0x20, 0x00, 0x00, 0x03, 0x00,
        0x20, 0x00, 0x00, 0x06, 0x50, 0x80,
    ];

    #[test]
    fn high_profile_1080p() {
        let p = parse_sps(&HIGH_1080P);
        assert_eq!((p.width, p.height), (1920, 1080));
        assert_eq!(p.fps, UNKNOWN, "no fixed-rate timing");
    }

    #[test]
    fn main_profile_1080p() {
        let p = parse_sps(&MAIN_1080P);
        assert_eq!((p.width, p.height), (1920, 1080));
    }

    #[test]
    fn baseline_360p() {
        let p = parse_sps(&BASELINE_360P);
        assert_eq!((p.width, p.height), (640, 360));
    }

    #[test]
    fn fixed_frame_rate_from_vui() {
        let p = parse_sps(&TIMED_1080P_25);
        assert_eq!(
            p,
            VideoParams {
                width: 1920,
                height: 1080,
                fps: 25
            }
        );
    }

    #[test]
    fn accepts_start_code_prefix() {
        let mut annex_b = vec![0, 0, 0, 1];
        annex_b.extend_from_slice(&HIGH_1080P);
        assert_eq!(parse_sps(&annex_b).width, 1920);

        let mut short = vec![0, 0, 1];
        short.extend_from_slice(&BASELINE_360P);
        assert_eq!(parse_sps(&short).height, 360);
    }

    #[test]
    fn truncated_sps_is_unknown() {
        assert_eq!(parse_sps(&HIGH_1080P[..8]), VideoParams::UNKNOWN);
        assert_eq!(parse_sps(&[0x67]), VideoParams::UNKNOWN);
        assert_eq!(parse_sps(&[]), VideoParams::UNKNOWN);
    }

    #[test]
    fn garbage_is_unknown() {
        assert_eq!(parse_sps(&[0x67, 0x00, 0x00, 0x00, 0x00]), VideoParams::UNKNOWN);
        assert_eq!(parse_sps(&[0x68, 0xce, 0x38, 0x80]), VideoParams::UNKNOWN, "PPS is not an SPS");
        assert!(try_parse_sps(&[0xff; 3]).is_err());
    }
}
