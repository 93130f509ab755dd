//! ISO-BMFF box serialization for fragmented MP4
//!
//! ```text
//! header:    ftyp, moov[mvhd, trak[tkhd, mdia[mdhd, hdlr, minf[...]]], mvex[trex]]
//! fragment:  moof[mfhd, traf[tfhd, tfdt, trun]], mdat
//! trailer:   mfra[tfra, mfro]
//! ```
//!
//! Container boxes are written with a zero size placeholder that is patched
//! once their children are in place.

use bytes::{BufMut, BytesMut};

use crate::media::{CodecId, CodecParameters};

/// Track id of the single output track
pub const TRACK_ID: u32 = 1;

const SAMPLE_FLAGS_SYNC: u32 = 0x0200_0000;
const SAMPLE_FLAGS_NON_SYNC: u32 = 0x0101_0000;

const TRUN_DATA_OFFSET: u32 = 0x000001;
const TRUN_SAMPLE_DURATION: u32 = 0x000100;
const TRUN_SAMPLE_SIZE: u32 = 0x000200;
const TRUN_SAMPLE_FLAGS: u32 = 0x000400;
const TRUN_SAMPLE_CTS: u32 = 0x000800;

const TFHD_DEFAULT_BASE_IS_MOOF: u32 = 0x020000;

fn begin_box(buf: &mut BytesMut, fourcc: &[u8; 4]) -> usize {
    let start = buf.len();
    buf.put_u32(0);
    buf.put_slice(fourcc);
    start
}

fn end_box(buf: &mut BytesMut, start: usize) {
    let size = (buf.len() - start) as u32;
    buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
}

fn put_full_box_header(buf: &mut BytesMut, version: u8, flags: u32) {
    buf.put_u32(((version as u32) << 24) | (flags & 0x00FF_FFFF));
}

fn put_matrix(buf: &mut BytesMut) {
    for v in [0x0001_0000u32, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000] {
        buf.put_u32(v);
    }
}

/// `ftyp` box
pub fn write_ftyp(buf: &mut BytesMut) {
    let start = begin_box(buf, b"ftyp");
    buf.put_slice(b"isom");
    buf.put_u32(0x200);
    for brand in [b"isom", b"iso2", b"avc1", b"mp41"] {
        buf.put_slice(brand);
    }
    end_box(buf, start);
}

/// `moov` box describing one video track with no samples
pub fn write_moov(buf: &mut BytesMut, codec: &CodecParameters, timescale: u32) {
    let moov = begin_box(buf, b"moov");

    let mvhd = begin_box(buf, b"mvhd");
    put_full_box_header(buf, 0, 0);
    buf.put_u32(0); // creation time
    buf.put_u32(0); // modification time
    buf.put_u32(1000); // movie timescale
    buf.put_u32(0); // duration
    buf.put_u32(0x0001_0000); // rate 1.0
    buf.put_u16(0x0100); // volume 1.0
    buf.put_slice(&[0; 10]);
    put_matrix(buf);
    buf.put_slice(&[0; 24]); // pre_defined
    buf.put_u32(TRACK_ID + 1);
    end_box(buf, mvhd);

    let trak = begin_box(buf, b"trak");
    write_tkhd(buf, codec);
    write_mdia(buf, codec, timescale);
    end_box(buf, trak);

    let mvex = begin_box(buf, b"mvex");
    let trex = begin_box(buf, b"trex");
    put_full_box_header(buf, 0, 0);
    buf.put_u32(TRACK_ID);
    buf.put_u32(1); // sample description index
    buf.put_u32(0); // default duration
    buf.put_u32(0); // default size
    buf.put_u32(0); // default flags
    end_box(buf, trex);
    end_box(buf, mvex);

    end_box(buf, moov);
}

fn write_tkhd(buf: &mut BytesMut, codec: &CodecParameters) {
    let tkhd = begin_box(buf, b"tkhd");
    put_full_box_header(buf, 0, 0x000003); // enabled, in movie
    buf.put_u32(0);
    buf.put_u32(0);
    buf.put_u32(TRACK_ID);
    buf.put_u32(0); // reserved
    buf.put_u32(0); // duration
    buf.put_slice(&[0; 8]);
    buf.put_u16(0); // layer
    buf.put_u16(0); // alternate group
    buf.put_u16(0); // volume
    buf.put_u16(0);
    put_matrix(buf);
    buf.put_u32(codec.width << 16);
    buf.put_u32(codec.height << 16);
    end_box(buf, tkhd);
}

fn write_mdia(buf: &mut BytesMut, codec: &CodecParameters, timescale: u32) {
    let mdia = begin_box(buf, b"mdia");

    let mdhd = begin_box(buf, b"mdhd");
    put_full_box_header(buf, 0, 0);
    buf.put_u32(0);
    buf.put_u32(0);
    buf.put_u32(timescale);
    buf.put_u32(0); // duration
    buf.put_u16(0x55C4); // language: und
    buf.put_u16(0);
    end_box(buf, mdhd);

    let hdlr = begin_box(buf, b"hdlr");
    put_full_box_header(buf, 0, 0);
    buf.put_u32(0);
    buf.put_slice(b"vide");
    buf.put_slice(&[0; 12]);
    buf.put_slice(b"VideoHandler\0");
    end_box(buf, hdlr);

    let minf = begin_box(buf, b"minf");

    let vmhd = begin_box(buf, b"vmhd");
    put_full_box_header(buf, 0, 1);
    buf.put_slice(&[0; 8]); // graphics mode + opcolor
    end_box(buf, vmhd);

    let dinf = begin_box(buf, b"dinf");
    let dref = begin_box(buf, b"dref");
    put_full_box_header(buf, 0, 0);
    buf.put_u32(1);
    let url = begin_box(buf, b"url ");
    put_full_box_header(buf, 0, 1); // self-contained
    end_box(buf, url);
    end_box(buf, dref);
    end_box(buf, dinf);

    let stbl = begin_box(buf, b"stbl");
    write_stsd(buf, codec);
    for fourcc in [b"stts", b"stsc", b"stco"] {
        let b = begin_box(buf, fourcc);
        put_full_box_header(buf, 0, 0);
        buf.put_u32(0);
        end_box(buf, b);
    }
    let stsz = begin_box(buf, b"stsz");
    put_full_box_header(buf, 0, 0);
    buf.put_u32(0);
    buf.put_u32(0);
    end_box(buf, stsz);
    end_box(buf, stbl);

    end_box(buf, minf);
    end_box(buf, mdia);
}

/// Sample entry and configuration box names for a codec
pub fn sample_entry_names(codec: CodecId) -> Option<(&'static [u8; 4], &'static [u8; 4])> {
    match codec {
        CodecId::H264 => Some((b"avc1", b"avcC")),
        CodecId::Hevc => Some((b"hvc1", b"hvcC")),
        CodecId::Other(_) => None,
    }
}

fn write_stsd(buf: &mut BytesMut, codec: &CodecParameters) {
    let stsd = begin_box(buf, b"stsd");
    put_full_box_header(buf, 0, 0);
    buf.put_u32(1);

    // Callers validate the codec before writing a header
    let (entry_name, config_name) = sample_entry_names(codec.codec).unwrap_or((b"avc1", b"avcC"));

    let entry = begin_box(buf, entry_name);
    buf.put_slice(&[0; 6]);
    buf.put_u16(1); // data reference index
    buf.put_slice(&[0; 16]); // pre_defined + reserved
    buf.put_u16(codec.width as u16);
    buf.put_u16(codec.height as u16);
    buf.put_u32(0x0048_0000); // 72 dpi
    buf.put_u32(0x0048_0000);
    buf.put_u32(0);
    buf.put_u16(1); // frame count
    buf.put_slice(&[0; 32]); // compressor name
    buf.put_u16(0x0018); // depth
    buf.put_i16(-1);

    let config = begin_box(buf, config_name);
    buf.put_slice(&codec.extradata);
    end_box(buf, config);

    end_box(buf, entry);
    end_box(buf, stsd);
}

/// One sample of a fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleInfo {
    pub duration: u32,
    pub size: u32,
    pub cts_offset: i32,
    pub keyframe: bool,
}

/// `moof` plus the 8-byte `mdat` header; sample data follows directly
pub fn write_fragment_header(
    buf: &mut BytesMut,
    sequence: u32,
    base_decode_time: u64,
    samples: &[SampleInfo],
    default_base_moof: bool,
) {
    let moof = begin_box(buf, b"moof");

    let mfhd = begin_box(buf, b"mfhd");
    put_full_box_header(buf, 0, 0);
    buf.put_u32(sequence);
    end_box(buf, mfhd);

    let traf = begin_box(buf, b"traf");

    let tfhd = begin_box(buf, b"tfhd");
    let tfhd_flags = if default_base_moof {
        TFHD_DEFAULT_BASE_IS_MOOF
    } else {
        0
    };
    put_full_box_header(buf, 0, tfhd_flags);
    buf.put_u32(TRACK_ID);
    end_box(buf, tfhd);

    let tfdt = begin_box(buf, b"tfdt");
    put_full_box_header(buf, 1, 0);
    buf.put_u64(base_decode_time);
    end_box(buf, tfdt);

    let trun = begin_box(buf, b"trun");
    put_full_box_header(
        buf,
        1,
        TRUN_DATA_OFFSET
            | TRUN_SAMPLE_DURATION
            | TRUN_SAMPLE_SIZE
            | TRUN_SAMPLE_FLAGS
            | TRUN_SAMPLE_CTS,
    );
    buf.put_u32(samples.len() as u32);
    let data_offset_pos = buf.len();
    buf.put_i32(0);
    for sample in samples {
        buf.put_u32(sample.duration);
        buf.put_u32(sample.size);
        buf.put_u32(if sample.keyframe {
            SAMPLE_FLAGS_SYNC
        } else {
            SAMPLE_FLAGS_NON_SYNC
        });
        buf.put_i32(sample.cts_offset);
    }
    end_box(buf, trun);

    end_box(buf, traf);
    end_box(buf, moof);

    // first sample byte = moof size + mdat header
    let data_offset = (buf.len() - moof + 8) as i32;
    buf[data_offset_pos..data_offset_pos + 4].copy_from_slice(&data_offset.to_be_bytes());

    let data_size: u64 = samples.iter().map(|s| s.size as u64).sum();
    buf.put_u32((data_size + 8) as u32);
    buf.put_slice(b"mdat");
}

/// Random access entry: decode time and byte offset of a keyframe fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RandomAccessPoint {
    pub time: u64,
    pub moof_offset: u64,
}

/// `mfra` box with one `tfra` for the output track
pub fn write_mfra(buf: &mut BytesMut, points: &[RandomAccessPoint]) {
    let mfra = begin_box(buf, b"mfra");

    let tfra = begin_box(buf, b"tfra");
    put_full_box_header(buf, 1, 0);
    buf.put_u32(TRACK_ID);
    buf.put_u32(0); // 1-byte traf/trun/sample numbers
    buf.put_u32(points.len() as u32);
    for point in points {
        buf.put_u64(point.time);
        buf.put_u64(point.moof_offset);
        buf.put_u8(1);
        buf.put_u8(1);
        buf.put_u8(1);
    }
    end_box(buf, tfra);

    let mfro = begin_box(buf, b"mfro");
    put_full_box_header(buf, 0, 0);
    let mfra_size = (buf.len() - mfra + 4) as u32;
    buf.put_u32(mfra_size);
    end_box(buf, mfro);

    end_box(buf, mfra);
}

#[cfg(test)]
pub(crate) mod tests {
    use bytes::Bytes;

    use super::*;

    /// Walk top-level boxes, returning (fourcc, offset, size)
    pub(crate) fn top_level_boxes(data: &[u8]) -> Vec<([u8; 4], usize, usize)> {
        let mut out = Vec::new();
        let mut offset = 0;
        while offset + 8 <= data.len() {
            let size = u32::from_be_bytes(data[offset..offset + 4].try_into().unwrap()) as usize;
            let fourcc: [u8; 4] = data[offset + 4..offset + 8].try_into().unwrap();
            if size < 8 {
                break;
            }
            out.push((fourcc, offset, size));
            offset += size;
        }
        out
    }

    fn find_child(data: &[u8], fourcc: &[u8; 4]) -> Option<usize> {
        data.windows(4).position(|w| w == fourcc).map(|p| p - 4)
    }

    fn codec() -> CodecParameters {
        CodecParameters::new(CodecId::H264, Bytes::from_static(&[0x01, 0x42, 0x00, 0x1F]))
            .with_dimensions(640, 480)
    }

    #[test]
    fn test_ftyp_layout() {
        let mut buf = BytesMut::new();
        write_ftyp(&mut buf);
        assert_eq!(buf.len(), 32);
        assert_eq!(&buf[4..8], b"ftyp");
        assert_eq!(&buf[8..12], b"isom");
    }

    #[test]
    fn test_moov_sizes_are_consistent() {
        let mut buf = BytesMut::new();
        write_moov(&mut buf, &codec(), 90_000);

        let boxes = top_level_boxes(&buf);
        assert_eq!(boxes.len(), 1);
        assert_eq!(&boxes[0].0, b"moov");
        assert_eq!(boxes[0].2, buf.len());

        let mvhd = find_child(&buf, b"mvhd").unwrap();
        assert_eq!(
            u32::from_be_bytes(buf[mvhd..mvhd + 4].try_into().unwrap()),
            108
        );
        let tkhd = find_child(&buf, b"tkhd").unwrap();
        assert_eq!(
            u32::from_be_bytes(buf[tkhd..tkhd + 4].try_into().unwrap()),
            92
        );
    }

    #[test]
    fn test_moov_carries_config_verbatim() {
        let mut buf = BytesMut::new();
        write_moov(&mut buf, &codec(), 90_000);

        let avcc = find_child(&buf, b"avcC").unwrap();
        assert_eq!(
            u32::from_be_bytes(buf[avcc..avcc + 4].try_into().unwrap()),
            12
        );
        assert_eq!(&buf[avcc + 8..avcc + 12], &[0x01, 0x42, 0x00, 0x1F]);

        let mdhd = find_child(&buf, b"mdhd").unwrap();
        let timescale = u32::from_be_bytes(buf[mdhd + 20..mdhd + 24].try_into().unwrap());
        assert_eq!(timescale, 90_000);
    }

    #[test]
    fn test_hevc_uses_hvc1() {
        let mut buf = BytesMut::new();
        let hevc = CodecParameters::new(CodecId::Hevc, Bytes::from_static(&[0x01]));
        write_moov(&mut buf, &hevc, 90_000);
        assert!(find_child(&buf, b"hvc1").is_some());
        assert!(find_child(&buf, b"hvcC").is_some());
        assert!(sample_entry_names(CodecId::Other(4)).is_none());
    }

    #[test]
    fn test_fragment_data_offset_points_past_mdat_header() {
        let samples = [
            SampleInfo {
                duration: 3000,
                size: 100,
                cts_offset: 0,
                keyframe: true,
            },
            SampleInfo {
                duration: 3000,
                size: 50,
                cts_offset: 3000,
                keyframe: false,
            },
        ];
        let mut buf = BytesMut::new();
        write_fragment_header(&mut buf, 7, 90_000, &samples, true);

        let boxes = top_level_boxes(&buf);
        assert_eq!(&boxes[0].0, b"moof");
        let moof_size = boxes[0].2;
        assert_eq!(&buf[moof_size + 4..moof_size + 8], b"mdat");
        assert_eq!(
            u32::from_be_bytes(buf[moof_size..moof_size + 4].try_into().unwrap()),
            158
        );

        let trun = find_child(&buf, b"trun").unwrap();
        let data_offset = i32::from_be_bytes(buf[trun + 16..trun + 20].try_into().unwrap());
        assert_eq!(data_offset as usize, moof_size + 8);

        let mfhd = find_child(&buf, b"mfhd").unwrap();
        assert_eq!(
            u32::from_be_bytes(buf[mfhd + 12..mfhd + 16].try_into().unwrap()),
            7
        );
    }

    #[test]
    fn test_mfra_size_matches_mfro() {
        let mut buf = BytesMut::new();
        write_mfra(
            &mut buf,
            &[
                RandomAccessPoint {
                    time: 0,
                    moof_offset: 700,
                },
                RandomAccessPoint {
                    time: 90_000,
                    moof_offset: 9000,
                },
            ],
        );
        let boxes = top_level_boxes(&buf);
        assert_eq!(boxes.len(), 1);
        assert_eq!(&boxes[0].0, b"mfra");
        let mfro_size = u32::from_be_bytes(buf[buf.len() - 4..].try_into().unwrap()) as usize;
        assert_eq!(mfro_size, buf.len());
    }
}
