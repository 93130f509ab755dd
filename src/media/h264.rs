//! H.264/AVC bitstream helpers
//!
//! FLV carries H.264 in AVCC form (length-prefixed NAL units) behind a small
//! packet header:
//!
//! ```text
//! +-----------------+-----------------+------
//! | AVCPacketType   | CompositionTime | Data
//! | (1 byte)        | (3 bytes, SI24) |
//! +-----------------+-----------------+------
//! ```
//!
//! The sequence header (packet type 0) is an AVCDecoderConfigurationRecord,
//! which MP4 stores verbatim in its `avcC` box. The record is only looked
//! into far enough to find the first SPS so that the picture dimensions can
//! be reported alongside it.

use bytes::{Buf, Bytes};

use crate::error::{MediaError, Result};

/// AVC packet type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvcPacketType {
    /// Decoder configuration record
    SequenceHeader = 0,
    /// One or more NAL units
    Nalu = 1,
    /// End of sequence
    EndOfSequence = 2,
}

impl AvcPacketType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(AvcPacketType::SequenceHeader),
            1 => Some(AvcPacketType::Nalu),
            2 => Some(AvcPacketType::EndOfSequence),
            _ => None,
        }
    }
}

/// NAL unit types this crate cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluType {
    Slice,
    Idr,
    Sei,
    Sps,
    Pps,
    Aud,
    Other(u8),
}

impl NaluType {
    pub fn from_byte(b: u8) -> Self {
        match b & 0x1F {
            1 => NaluType::Slice,
            5 => NaluType::Idr,
            6 => NaluType::Sei,
            7 => NaluType::Sps,
            8 => NaluType::Pps,
            9 => NaluType::Aud,
            other => NaluType::Other(other),
        }
    }
}

/// Parsed AVC video packet (payload after the FLV frame/codec byte)
#[derive(Debug, Clone)]
pub enum AvcVideoPacket {
    SequenceHeader(AvcConfig),
    Frame {
        composition_time: i32,
        nalus: Bytes,
    },
    EndOfSequence,
}

impl AvcVideoPacket {
    pub fn parse(mut data: Bytes) -> Result<Self> {
        if data.len() < 4 {
            return Err(MediaError::InvalidAvcPacket.into());
        }

        let packet_type = data.get_u8();
        let composition_time = read_si24(&mut data);

        match AvcPacketType::from_byte(packet_type) {
            Some(AvcPacketType::SequenceHeader) => {
                Ok(AvcVideoPacket::SequenceHeader(AvcConfig::parse(data)?))
            }
            Some(AvcPacketType::Nalu) => Ok(AvcVideoPacket::Frame {
                composition_time,
                nalus: data,
            }),
            Some(AvcPacketType::EndOfSequence) => Ok(AvcVideoPacket::EndOfSequence),
            None => Err(MediaError::InvalidAvcPacket.into()),
        }
    }
}

/// Read a signed big-endian 24-bit integer
pub(crate) fn read_si24(data: &mut Bytes) -> i32 {
    let raw = ((data.get_u8() as i32) << 16) | ((data.get_u8() as i32) << 8) | data.get_u8() as i32;
    if raw & 0x80_0000 != 0 {
        raw | !0xFF_FFFF
    } else {
        raw
    }
}

/// AVCDecoderConfigurationRecord
#[derive(Debug, Clone)]
pub struct AvcConfig {
    pub profile: u8,
    pub compatibility: u8,
    pub level: u8,
    /// Size of the NAL length prefix in bytes
    pub nalu_length_size: u8,
    pub sps: Vec<Bytes>,
    pub pps: Vec<Bytes>,
    /// The record as received
    pub raw: Bytes,
}

impl AvcConfig {
    pub fn parse(data: Bytes) -> Result<Self> {
        if data.len() < 7 {
            return Err(MediaError::InvalidAvcPacket.into());
        }

        let raw = data.clone();
        let mut data = data;

        if data.get_u8() != 1 {
            return Err(MediaError::InvalidAvcPacket.into());
        }

        let profile = data.get_u8();
        let compatibility = data.get_u8();
        let level = data.get_u8();
        let nalu_length_size = (data.get_u8() & 0x03) + 1;

        let num_sps = (data.get_u8() & 0x1F) as usize;
        let sps = read_parameter_sets(&mut data, num_sps)?;

        if data.is_empty() {
            return Err(MediaError::InvalidAvcPacket.into());
        }
        let num_pps = data.get_u8() as usize;
        let pps = read_parameter_sets(&mut data, num_pps)?;

        Ok(AvcConfig {
            profile,
            compatibility,
            level,
            nalu_length_size,
            sps,
            pps,
            raw,
        })
    }

    /// Picture dimensions from the first SPS
    pub fn dimensions(&self) -> Result<(u32, u32)> {
        let sps = self.sps.first().ok_or(MediaError::InvalidSps)?;
        let info = SpsInfo::parse(sps)?;
        Ok((info.width, info.height))
    }
}

fn read_parameter_sets(data: &mut Bytes, count: usize) -> Result<Vec<Bytes>> {
    let mut sets = Vec::with_capacity(count);
    for _ in 0..count {
        if data.len() < 2 {
            return Err(MediaError::InvalidAvcPacket.into());
        }
        let len = data.get_u16() as usize;
        if data.len() < len {
            return Err(MediaError::InvalidAvcPacket.into());
        }
        sets.push(data.copy_to_bytes(len));
    }
    Ok(sets)
}

/// Fields of a sequence parameter set needed for container headers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpsInfo {
    pub profile: u8,
    pub level: u8,
    pub width: u32,
    pub height: u32,
}

impl SpsInfo {
    /// Parse an SPS NAL unit (including its one-byte NAL header)
    pub fn parse(nalu: &[u8]) -> Result<Self> {
        if nalu.len() < 4 || NaluType::from_byte(nalu[0]) != NaluType::Sps {
            return Err(MediaError::InvalidSps.into());
        }

        let rbsp = strip_emulation_prevention(&nalu[1..]);
        let mut r = BitReader::new(&rbsp);

        let profile = r.read_bits(8)? as u8;
        r.read_bits(8)?; // constraint flags
        let level = r.read_bits(8)? as u8;
        r.read_ue()?; // seq_parameter_set_id

        let mut chroma_format_idc = 1;
        let mut separate_colour_plane = false;
        if matches!(
            profile,
            100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134 | 135
        ) {
            chroma_format_idc = r.read_ue()?;
            if chroma_format_idc == 3 {
                separate_colour_plane = r.read_bit()?;
            }
            r.read_ue()?; // bit_depth_luma_minus8
            r.read_ue()?; // bit_depth_chroma_minus8
            r.read_bit()?; // qpprime_y_zero_transform_bypass_flag
            if r.read_bit()? {
                let lists = if chroma_format_idc == 3 { 12 } else { 8 };
                for i in 0..lists {
                    if r.read_bit()? {
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
                r.read_bit()?; // delta_pic_order_always_zero_flag
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
        r.read_bit()?; // gaps_in_frame_num_value_allowed_flag

        let width_mbs = r.read_ue()?.checked_add(1).ok_or(MediaError::InvalidSps)?;
        let height_map_units = r.read_ue()?.checked_add(1).ok_or(MediaError::InvalidSps)?;
        let frame_mbs_only = r.read_bit()?;
        if !frame_mbs_only {
            r.read_bit()?; // mb_adaptive_frame_field_flag
        }
        r.read_bit()?; // direct_8x8_inference_flag

        let field_factor: u32 = if frame_mbs_only { 1 } else { 2 };
        let mut width = width_mbs.checked_mul(16).ok_or(MediaError::InvalidSps)?;
        let mut height = height_map_units
            .checked_mul(16 * field_factor)
            .ok_or(MediaError::InvalidSps)?;

        if r.read_bit()? {
            let left = r.read_ue()?;
            let right = r.read_ue()?;
            let top = r.read_ue()?;
            let bottom = r.read_ue()?;

            let chroma_array_type = if separate_colour_plane {
                0
            } else {
                chroma_format_idc
            };
            let (crop_x, crop_y): (u32, u32) = match chroma_array_type {
                1 => (2, 2 * field_factor),
                2 => (2, field_factor),
                _ => (1, field_factor),
            };
            let crop = |unit: u32, a: u32, b: u32| {
                a.checked_add(b).and_then(|sum| sum.checked_mul(unit))
            };
            width = crop(crop_x, left, right)
                .and_then(|c| width.checked_sub(c))
                .ok_or(MediaError::InvalidSps)?;
            height = crop(crop_y, top, bottom)
                .and_then(|c| height.checked_sub(c))
                .ok_or(MediaError::InvalidSps)?;
        }

        Ok(SpsInfo {
            profile,
            level,
            width,
            height,
        })
    }
}

fn skip_scaling_list(r: &mut BitReader<'_>, size: usize) -> Result<()> {
    let mut last = 8i64;
    let mut next = 8i64;
    for _ in 0..size {
        if next != 0 {
            let delta = r.read_se()?;
            next = (last + delta + 256).rem_euclid(256);
        }
        if next != 0 {
            last = next;
        }
    }
    Ok(())
}

/// Remove emulation prevention bytes (00 00 03 -> 00 00)
fn strip_emulation_prevention(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0;
    for &b in data {
        if zeros >= 2 && b == 0x03 {
            zeros = 0;
            continue;
        }
        if b == 0 {
            zeros += 1;
        } else {
            zeros = 0;
        }
        out.push(b);
    }
    out
}

/// MSB-first bit reader with Exp-Golomb support
struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read_bit(&mut self) -> Result<bool> {
        let byte = self
            .data
            .get(self.pos / 8)
            .ok_or(MediaError::InvalidSps)?;
        let bit = (byte >> (7 - (self.pos % 8))) & 1;
        self.pos += 1;
        Ok(bit == 1)
    }

    fn read_bits(&mut self, n: u32) -> Result<u32> {
        let mut value = 0u32;
        for _ in 0..n {
            value = (value << 1) | self.read_bit()? as u32;
        }
        Ok(value)
    }

    fn read_ue(&mut self) -> Result<u32> {
        let mut leading_zeros = 0;
        while !self.read_bit()? {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return Err(MediaError::InvalidSps.into());
            }
        }
        let suffix = self.read_bits(leading_zeros)?;
        Ok(((1u64 << leading_zeros) - 1 + suffix as u64) as u32)
    }

    fn read_se(&mut self) -> Result<i64> {
        let k = self.read_ue()? as i64;
        if k % 2 == 1 {
            Ok((k + 1) / 2)
        } else {
            Ok(-(k / 2))
        }
    }
}
