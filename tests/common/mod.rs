//! Synthetic MP4/fMP4 fixture builders for the integration suite.
//!
//! Streams are assembled box by box with placeholder-size patching, so
//! every fixture is self-describing: the builder returns both the wire
//! bytes and the plaintext payloads the demuxer is expected to deliver.

#![allow(dead_code)]

use aes::Aes128;
use bytes::{BufMut, BytesMut};
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;

type Aes128Ctr = Ctr128BE<Aes128>;

/// Content key shared by all encrypted fixtures.
pub const KEY: [u8; 16] = [
    0xeb, 0xdd, 0x62, 0xf1, 0x68, 0x14, 0xd2, 0x7b, 0x68, 0xef, 0x12, 0x2a, 0xfc, 0xe4, 0xae, 0x3c,
];

/// Key id shared by all encrypted fixtures.
pub const KEY_ID: [u8; 16] = *b"0123456789012345";

pub const VIDEO_TRACK: u32 = 1;
pub const AUDIO_TRACK: u32 = 2;
pub const VIDEO_TIMESCALE: u32 = 90_000;
pub const AUDIO_TIMESCALE: u32 = 44_100;
pub const VIDEO_SAMPLE_DURATION: u32 = 3_000;
pub const AUDIO_SAMPLE_DURATION: u32 = 1_024;

/// Clear prefix used by subsample-encrypted video fixtures.
pub const CLEAR_PREFIX: u16 = 9;

fn write_box(buf: &mut BytesMut, fourcc: &[u8; 4], f: impl FnOnce(&mut BytesMut)) {
    let start = buf.len();
    buf.put_u32(0); // placeholder
    buf.put_slice(fourcc);
    f(buf);
    patch_u32(buf, start, (buf.len() - start) as u32);
}

fn patch_u32(buf: &mut BytesMut, pos: usize, value: u32) {
    buf[pos..pos + 4].copy_from_slice(&value.to_be_bytes());
}

// ---------------------------------------------------------------------------
// Initialization segments
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
pub enum Media {
    Video { pasp: Option<(u32, u32)> },
    Audio,
}

#[derive(Clone, Copy)]
pub struct TrackSpec {
    pub track_id: u32,
    pub media: Media,
    pub protected: bool,
}

/// Per-track stbl tables for non-fragmented fixtures.
struct TrackTables<'a> {
    sample_duration: u32,
    sizes: &'a [u32],
    chunk_offset: u64,
    /// 1-based sync stride; `None` leaves stss out (all sync).
    sync_stride: Option<usize>,
}

pub fn ftyp() -> Vec<u8> {
    let mut buf = BytesMut::new();
    write_box(&mut buf, b"ftyp", |b| {
        b.put_slice(b"iso5");
        b.put_u32(0);
        b.put_slice(b"iso5");
        b.put_slice(b"dash");
    });
    buf.to_vec()
}

/// Build ftyp + moov for a fragmented stream (empty sample tables, trex
/// defaults per track, optional pssh).
pub fn init_segment(tracks: &[TrackSpec], with_pssh: bool) -> Vec<u8> {
    let mut bytes = ftyp();
    let mut buf = BytesMut::new();
    write_box(&mut buf, b"moov", |buf| {
        write_mvhd(buf);
        for spec in tracks {
            write_trak(buf, spec, None);
        }
        write_box(buf, b"mvex", |buf| {
            for spec in tracks {
                write_box(buf, b"trex", |b| {
                    b.put_u32(0);
                    b.put_u32(spec.track_id);
                    b.put_u32(1); // sample description index
                    b.put_u32(default_duration(spec));
                    b.put_u32(0);
                    b.put_u32(0x0101_0000);
                });
            }
        });
        if with_pssh {
            write_pssh(buf);
        }
    });
    bytes.extend_from_slice(&buf);
    bytes
}

fn default_duration(spec: &TrackSpec) -> u32 {
    match spec.media {
        Media::Video { .. } => VIDEO_SAMPLE_DURATION,
        Media::Audio => AUDIO_SAMPLE_DURATION,
    }
}

fn write_pssh(buf: &mut BytesMut) {
    write_box(buf, b"pssh", |b| {
        b.put_u32(0);
        b.put_slice(&[0xed; 16]); // system id
        let data = b"fixture-pssh-data";
        b.put_u32(data.len() as u32);
        b.put_slice(data);
    });
}

fn write_mvhd(buf: &mut BytesMut) {
    write_box(buf, b"mvhd", |b| {
        b.put_u32(0); // version/flags
        b.put_u32(0); // creation
        b.put_u32(0); // modification
        b.put_u32(1000); // movie timescale
        b.put_u32(0); // duration
        b.put_u32(0x0001_0000); // rate
        b.put_u16(0x0100); // volume
        b.put_slice(&[0u8; 10]);
        b.put_slice(&unity_matrix());
        b.put_slice(&[0u8; 24]);
        b.put_u32(0xffff_ffff); // next track id
    });
}

fn unity_matrix() -> [u8; 36] {
    let mut m = [0u8; 36];
    m[0..4].copy_from_slice(&0x0001_0000u32.to_be_bytes());
    m[16..20].copy_from_slice(&0x0001_0000u32.to_be_bytes());
    m[32..36].copy_from_slice(&0x4000_0000u32.to_be_bytes());
    m
}

fn write_trak(buf: &mut BytesMut, spec: &TrackSpec, tables: Option<&TrackTables>) {
    write_box(buf, b"trak", |buf| {
        write_box(buf, b"tkhd", |b| {
            b.put_u32(0x0000_0007); // version 0, enabled+in-movie
            b.put_u32(0);
            b.put_u32(0);
            b.put_u32(spec.track_id);
            b.put_u32(0); // reserved
            b.put_u32(0); // duration
            b.put_slice(&[0u8; 8]);
            b.put_u16(0); // layer
            b.put_u16(0); // alternate group
            b.put_u16(0); // volume
            b.put_u16(0);
            b.put_slice(&unity_matrix());
            match spec.media {
                Media::Video { .. } => {
                    b.put_u32(640 << 16);
                    b.put_u32(360 << 16);
                }
                Media::Audio => {
                    b.put_u32(0);
                    b.put_u32(0);
                }
            }
        });
        write_box(buf, b"mdia", |buf| {
            write_box(buf, b"mdhd", |b| {
                b.put_u32(0);
                b.put_u32(0);
                b.put_u32(0);
                b.put_u32(match spec.media {
                    Media::Video { .. } => VIDEO_TIMESCALE,
                    Media::Audio => AUDIO_TIMESCALE,
                });
                b.put_u32(0); // duration
                b.put_u16(0x55c4); // language: und
                b.put_u16(0);
            });
            write_box(buf, b"hdlr", |b| {
                b.put_u32(0);
                b.put_u32(0);
                b.put_slice(match spec.media {
                    Media::Video { .. } => b"vide",
                    Media::Audio => b"soun",
                });
                b.put_slice(&[0u8; 12]);
                b.put_u8(0); // empty name
            });
            write_box(buf, b"minf", |buf| {
                match spec.media {
                    Media::Video { .. } => write_box(buf, b"vmhd", |b| {
                        b.put_u32(1);
                        b.put_slice(&[0u8; 8]);
                    }),
                    Media::Audio => write_box(buf, b"smhd", |b| {
                        b.put_u32(0);
                        b.put_u32(0);
                    }),
                }
                write_box(buf, b"dinf", |buf| {
                    write_box(buf, b"dref", |buf| {
                        buf.put_u32(0);
                        buf.put_u32(1);
                        write_box(buf, b"url ", |b| b.put_u32(1));
                    });
                });
                write_stbl(buf, spec, tables);
            });
        });
    });
}

fn write_stbl(buf: &mut BytesMut, spec: &TrackSpec, tables: Option<&TrackTables>) {
    write_box(buf, b"stbl", |buf| {
        write_box(buf, b"stsd", |buf| {
            buf.put_u32(0);
            buf.put_u32(1);
            match spec.media {
                Media::Video { pasp } => write_video_entry(buf, pasp, spec.protected),
                Media::Audio => write_audio_entry(buf, spec.protected),
            }
        });
        let n = tables.map(|t| t.sizes.len()).unwrap_or(0) as u32;
        write_box(buf, b"stts", |b| {
            b.put_u32(0);
            if n == 0 {
                b.put_u32(0);
            } else {
                b.put_u32(1);
                b.put_u32(n);
                b.put_u32(tables.unwrap().sample_duration);
            }
        });
        if let Some(t) = tables {
            if let Some(stride) = t.sync_stride {
                write_box(buf, b"stss", |b| {
                    let syncs: Vec<u32> = (0..t.sizes.len())
                        .filter(|i| i % stride == 0)
                        .map(|i| i as u32 + 1)
                        .collect();
                    b.put_u32(0);
                    b.put_u32(syncs.len() as u32);
                    for s in syncs {
                        b.put_u32(s);
                    }
                });
            }
        }
        write_box(buf, b"stsc", |b| {
            b.put_u32(0);
            if n == 0 {
                b.put_u32(0);
            } else {
                b.put_u32(1);
                b.put_u32(1);
                b.put_u32(n);
                b.put_u32(1);
            }
        });
        write_box(buf, b"stsz", |b| {
            b.put_u32(0);
            b.put_u32(0);
            b.put_u32(n);
            if let Some(t) = tables {
                for size in t.sizes {
                    b.put_u32(*size);
                }
            }
        });
        write_box(buf, b"stco", |b| {
            b.put_u32(0);
            if n == 0 {
                b.put_u32(0);
            } else {
                b.put_u32(1);
                b.put_u32(tables.unwrap().chunk_offset as u32);
            }
        });
    });
}

fn write_video_entry(buf: &mut BytesMut, pasp: Option<(u32, u32)>, protected: bool) {
    let fourcc: &[u8; 4] = if protected { b"encv" } else { b"avc1" };
    write_box(buf, fourcc, |b| {
        b.put_slice(&[0u8; 6]);
        b.put_u16(1); // data reference index
        b.put_slice(&[0u8; 16]);
        b.put_u16(640);
        b.put_u16(360);
        b.put_u32(0x0048_0000); // 72 dpi
        b.put_u32(0x0048_0000);
        b.put_u32(0);
        b.put_u16(1); // frame count
        b.put_slice(&[0u8; 32]); // compressor name
        b.put_u16(24); // depth
        b.put_u16(0xffff);
        write_box(b, b"avcC", |b| {
            b.put_slice(&[0x01, 0x64, 0x00, 0x1e, 0xff, 0xe1, 0x00, 0x00]);
        });
        if let Some((h, v)) = pasp {
            write_box(b, b"pasp", |b| {
                b.put_u32(h);
                b.put_u32(v);
            });
        }
        if protected {
            write_sinf(b, b"avc1");
        }
    });
}

fn write_audio_entry(buf: &mut BytesMut, protected: bool) {
    let fourcc: &[u8; 4] = if protected { b"enca" } else { b"mp4a" };
    write_box(buf, fourcc, |b| {
        b.put_slice(&[0u8; 6]);
        b.put_u16(1); // data reference index
        b.put_slice(&[0u8; 8]);
        b.put_u16(2); // channels
        b.put_u16(16); // sample size
        b.put_u32(0);
        b.put_u32(AUDIO_TIMESCALE << 16);
        write_box(b, b"esds", |b| {
            b.put_u32(0);
            // ES descriptor with an AAC-LC decoder config.
            b.put_slice(&[
                0x03, 0x19, 0x00, 0x01, 0x00, 0x04, 0x11, 0x40, 0x15, 0x00, 0x00, 0x00, 0x00,
                0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x05, 0x02, 0x12, 0x10, 0x06, 0x01, 0x02,
            ]);
        });
        if protected {
            write_sinf(b, b"mp4a");
        }
    });
}

fn write_sinf(buf: &mut BytesMut, original: &[u8; 4]) {
    write_box(buf, b"sinf", |buf| {
        write_box(buf, b"frma", |b| b.put_slice(original));
        write_box(buf, b"schm", |b| {
            b.put_u32(0);
            b.put_slice(b"cenc");
            b.put_u32(0x0001_0000);
        });
        write_box(buf, b"schi", |buf| {
            write_box(buf, b"tenc", |b| {
                b.put_u32(0);
                b.put_u16(0); // reserved
                b.put_u8(1); // protected
                b.put_u8(8); // iv size
                b.put_slice(&KEY_ID);
            });
        });
    });
}

// ---------------------------------------------------------------------------
// Fragments
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum CencMode {
    Clear,
    /// Inline senc records.
    Senc,
    /// saiz/saio records stored at the head of the mdat payload.
    AuxInMdat,
}

pub struct FragmentSpec<'a> {
    pub track_id: u32,
    pub sequence: u32,
    pub base_dts: u64,
    pub duration: u32,
    /// Plaintext payloads; the builder encrypts on the wire as needed.
    pub payloads: &'a [Vec<u8>],
    /// `i % keyframe_stride == 0` marks a sync sample.
    pub keyframe_stride: usize,
    pub cts: Option<&'a [i32]>,
    pub mode: CencMode,
    /// Clear head of each subsample map; 0 encrypts whole samples.
    pub clear_prefix: u16,
}

fn sample_iv(sequence: u32, index: usize) -> [u8; 8] {
    (((sequence as u64) << 32) | index as u64).to_be_bytes()
}

fn encrypt_payload(plain: &[u8], iv8: &[u8; 8], clear_prefix: u16) -> Vec<u8> {
    let mut iv = [0u8; 16];
    iv[..8].copy_from_slice(iv8);
    let mut cipher = Aes128Ctr::new(&KEY.into(), &iv.into());
    let mut out = plain.to_vec();
    let start = (clear_prefix as usize).min(out.len());
    cipher.apply_keystream(&mut out[start..]);
    out
}

/// Serialize one moof + mdat pair.
pub fn fragment(spec: &FragmentSpec) -> Vec<u8> {
    let n = spec.payloads.len();
    let encrypted = spec.mode != CencMode::Clear;
    let subsampled = encrypted && spec.clear_prefix > 0;
    let ivs: Vec<[u8; 8]> = (0..n).map(|i| sample_iv(spec.sequence, i)).collect();

    let wire: Vec<Vec<u8>> = if encrypted {
        spec.payloads
            .iter()
            .zip(&ivs)
            .map(|(p, iv)| encrypt_payload(p, iv, spec.clear_prefix))
            .collect()
    } else {
        spec.payloads.to_vec()
    };

    // CENC auxiliary record per sample: IV, then a one-pair subsample
    // map when subsampling.
    let aux_records: Vec<Vec<u8>> = if spec.mode == CencMode::AuxInMdat {
        ivs.iter()
            .enumerate()
            .map(|(i, iv)| {
                let mut rec = iv.to_vec();
                if subsampled {
                    rec.extend_from_slice(&1u16.to_be_bytes());
                    rec.extend_from_slice(&spec.clear_prefix.to_be_bytes());
                    let enc = (wire[i].len() - spec.clear_prefix as usize) as u32;
                    rec.extend_from_slice(&enc.to_be_bytes());
                }
                rec
            })
            .collect()
    } else {
        Vec::new()
    };
    let aux_len: usize = aux_records.iter().map(|r| r.len()).sum();

    let mut buf = BytesMut::new();
    let mut trun_offset_pos = 0usize;
    let mut saio_offset_pos = 0usize;

    write_box(&mut buf, b"moof", |buf| {
        write_box(buf, b"mfhd", |b| {
            b.put_u32(0);
            b.put_u32(spec.sequence);
        });
        write_box(buf, b"traf", |buf| {
            write_box(buf, b"tfhd", |b| {
                b.put_u32(0x0002_0000); // default-base-is-moof
                b.put_u32(spec.track_id);
            });
            write_box(buf, b"tfdt", |b| {
                b.put_u32(0x0100_0000); // version 1
                b.put_u64(spec.base_dts);
            });
            write_box(buf, b"trun", |b| {
                let mut flags = 0x000001 | 0x000100 | 0x000200 | 0x000400;
                if spec.cts.is_some() {
                    flags |= 0x000800;
                }
                b.put_u32(flags);
                b.put_u32(n as u32);
                trun_offset_pos = b.len();
                b.put_u32(0); // placeholder
                for i in 0..n {
                    b.put_u32(spec.duration);
                    b.put_u32(wire[i].len() as u32);
                    b.put_u32(if i % spec.keyframe_stride == 0 {
                        0x0200_0000
                    } else {
                        0x0101_0000
                    });
                    if let Some(cts) = spec.cts {
                        b.put_i32(cts[i]);
                    }
                }
            });
            match spec.mode {
                CencMode::Clear => {}
                CencMode::Senc => {
                    write_box(buf, b"senc", |b| {
                        b.put_u32(if subsampled { 2 } else { 0 });
                        b.put_u32(n as u32);
                        for (i, iv) in ivs.iter().enumerate() {
                            b.put_slice(iv);
                            if subsampled {
                                b.put_u16(1);
                                b.put_u16(spec.clear_prefix);
                                b.put_u32((wire[i].len() - spec.clear_prefix as usize) as u32);
                            }
                        }
                    });
                }
                CencMode::AuxInMdat => {
                    let record_size = if subsampled { 16u8 } else { 8u8 };
                    write_box(buf, b"saiz", |b| {
                        b.put_u32(0);
                        b.put_u8(record_size);
                        b.put_u32(n as u32);
                    });
                    write_box(buf, b"saio", |b| {
                        b.put_u32(0);
                        b.put_u32(1);
                        saio_offset_pos = b.len();
                        b.put_u32(0); // placeholder
                    });
                }
            }
        });
    });

    let data_start = buf.len() + 8;
    patch_u32(&mut buf, trun_offset_pos, (data_start + aux_len) as u32);
    if spec.mode == CencMode::AuxInMdat {
        patch_u32(&mut buf, saio_offset_pos, data_start as u32);
    }

    let total: usize = aux_len + wire.iter().map(|w| w.len()).sum::<usize>();
    buf.put_u32((total + 8) as u32);
    buf.put_slice(b"mdat");
    for rec in &aux_records {
        buf.put_slice(rec);
    }
    for sample in &wire {
        buf.put_slice(sample);
    }
    buf.to_vec()
}

// ---------------------------------------------------------------------------
// Payload generators and assembled streams
// ---------------------------------------------------------------------------

pub fn video_payloads(count: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| {
            let size = 120 + (i % 7) * 13;
            (0..size).map(|j| (i * 31 + j) as u8).collect()
        })
        .collect()
}

pub fn audio_payloads(count: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| {
            let size = 40 + i % 5;
            (0..size).map(|j| (i * 17 + j * 3) as u8).collect()
        })
        .collect()
}

const VIDEO_FRAGMENTS: [usize; 4] = [21, 21, 21, 19];
const AUDIO_FRAGMENTS: [usize; 4] = [30, 30, 30, 29];

pub struct StreamFixture {
    pub bytes: Vec<u8>,
    /// Byte offset of each moof, for resuming after a flush.
    pub moof_offsets: Vec<usize>,
    pub video: Vec<Vec<u8>>,
    pub audio: Vec<Vec<u8>>,
}

fn video_cts(count: usize) -> Vec<i32> {
    (0..count)
        .map(|i| if i % 4 == 1 { VIDEO_SAMPLE_DURATION as i32 } else { 0 })
        .collect()
}

/// Two-track fragmented stream: 82 video + 119 audio samples over four
/// interleaved fragment pairs. Video carries an 8:9 pasp.
pub fn av_fragmented_stream(video_mode: CencMode, with_pssh: bool) -> StreamFixture {
    let video = video_payloads(82);
    let audio = audio_payloads(119);
    let specs = [
        TrackSpec {
            track_id: VIDEO_TRACK,
            media: Media::Video { pasp: Some((8, 9)) },
            protected: video_mode != CencMode::Clear,
        },
        TrackSpec {
            track_id: AUDIO_TRACK,
            media: Media::Audio,
            protected: false,
        },
    ];
    let mut bytes = init_segment(&specs, with_pssh);
    let mut moof_offsets = Vec::new();

    let (mut vi, mut ai) = (0usize, 0usize);
    let (mut vdts, mut adts) = (0u64, 0u64);
    for k in 0..4 {
        let vn = VIDEO_FRAGMENTS[k];
        let cts = video_cts(vn);
        moof_offsets.push(bytes.len());
        bytes.extend(fragment(&FragmentSpec {
            track_id: VIDEO_TRACK,
            sequence: (2 * k + 1) as u32,
            base_dts: vdts,
            duration: VIDEO_SAMPLE_DURATION,
            payloads: &video[vi..vi + vn],
            keyframe_stride: vn,
            cts: Some(&cts),
            mode: video_mode,
            clear_prefix: if video_mode == CencMode::Clear { 0 } else { CLEAR_PREFIX },
        }));
        vi += vn;
        vdts += (vn as u64) * VIDEO_SAMPLE_DURATION as u64;

        let an = AUDIO_FRAGMENTS[k];
        moof_offsets.push(bytes.len());
        bytes.extend(fragment(&FragmentSpec {
            track_id: AUDIO_TRACK,
            sequence: (2 * k + 2) as u32,
            base_dts: adts,
            duration: AUDIO_SAMPLE_DURATION,
            payloads: &audio[ai..ai + an],
            keyframe_stride: 1,
            cts: None,
            mode: CencMode::Clear,
            clear_prefix: 0,
        }));
        ai += an;
        adts += (an as u64) * AUDIO_SAMPLE_DURATION as u64;
    }

    StreamFixture {
        bytes,
        moof_offsets,
        video,
        audio,
    }
}

/// Audio-only fragmented stream with 119 samples.
pub fn audio_fragmented_stream() -> StreamFixture {
    let audio = audio_payloads(119);
    let specs = [TrackSpec {
        track_id: AUDIO_TRACK,
        media: Media::Audio,
        protected: false,
    }];
    let mut bytes = init_segment(&specs, false);
    let mut moof_offsets = Vec::new();

    let mut ai = 0usize;
    let mut adts = 0u64;
    for (k, an) in AUDIO_FRAGMENTS.iter().copied().enumerate() {
        moof_offsets.push(bytes.len());
        bytes.extend(fragment(&FragmentSpec {
            track_id: AUDIO_TRACK,
            sequence: k as u32 + 1,
            base_dts: adts,
            duration: AUDIO_SAMPLE_DURATION,
            payloads: &audio[ai..ai + an],
            keyframe_stride: 1,
            cts: None,
            mode: CencMode::Clear,
            clear_prefix: 0,
        }));
        ai += an;
        adts += (an as u64) * AUDIO_SAMPLE_DURATION as u64;
    }

    StreamFixture {
        bytes,
        moof_offsets,
        video: Vec::new(),
        audio,
    }
}

/// Video-only encrypted stream: 82 subsample-encrypted samples over four
/// fragments, with a moov-level pssh.
pub fn encrypted_video_stream(mode: CencMode) -> StreamFixture {
    let video = video_payloads(82);
    let specs = [TrackSpec {
        track_id: VIDEO_TRACK,
        media: Media::Video { pasp: None },
        protected: true,
    }];
    let mut bytes = init_segment(&specs, true);
    let mut moof_offsets = Vec::new();

    let mut vi = 0usize;
    let mut vdts = 0u64;
    for (k, vn) in VIDEO_FRAGMENTS.iter().copied().enumerate() {
        let cts = video_cts(vn);
        moof_offsets.push(bytes.len());
        bytes.extend(fragment(&FragmentSpec {
            track_id: VIDEO_TRACK,
            sequence: k as u32 + 1,
            base_dts: vdts,
            duration: VIDEO_SAMPLE_DURATION,
            payloads: &video[vi..vi + vn],
            keyframe_stride: vn,
            cts: Some(&cts),
            mode,
            clear_prefix: CLEAR_PREFIX,
        }));
        vi += vn;
        vdts += (vn as u64) * VIDEO_SAMPLE_DURATION as u64;
    }

    StreamFixture {
        bytes,
        moof_offsets,
        video,
        audio: Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Non-fragmented files
// ---------------------------------------------------------------------------

pub struct FlatFixture {
    pub bytes: Vec<u8>,
    pub video: Vec<Vec<u8>>,
    pub audio: Vec<Vec<u8>>,
}

fn flat_moov(video_sizes: &[u32], audio_sizes: &[u32], video_off: u64, audio_off: u64) -> Vec<u8> {
    let mut buf = BytesMut::new();
    write_box(&mut buf, b"moov", |buf| {
        write_mvhd(buf);
        write_trak(
            buf,
            &TrackSpec {
                track_id: VIDEO_TRACK,
                media: Media::Video { pasp: None },
                protected: false,
            },
            Some(&TrackTables {
                sample_duration: VIDEO_SAMPLE_DURATION,
                sizes: video_sizes,
                chunk_offset: video_off,
                sync_stride: Some(21),
            }),
        );
        write_trak(
            buf,
            &TrackSpec {
                track_id: AUDIO_TRACK,
                media: Media::Audio,
                protected: false,
            },
            Some(&TrackTables {
                sample_duration: AUDIO_SAMPLE_DURATION,
                sizes: audio_sizes,
                chunk_offset: audio_off,
                sync_stride: None,
            }),
        );
    });
    buf.to_vec()
}

/// Non-fragmented file with 82 video + 119 audio samples in one chunk
/// each. With `trailing_moov`, the moov follows the mdat.
pub fn flat_av_file(trailing_moov: bool) -> FlatFixture {
    let video = video_payloads(82);
    let audio = audio_payloads(119);
    let video_sizes: Vec<u32> = video.iter().map(|p| p.len() as u32).collect();
    let audio_sizes: Vec<u32> = audio.iter().map(|p| p.len() as u32).collect();
    let video_bytes: usize = video.iter().map(|p| p.len()).sum();

    let ftyp = ftyp();
    let mut mdat_payload: Vec<u8> = Vec::new();
    for p in video.iter().chain(audio.iter()) {
        mdat_payload.extend_from_slice(p);
    }

    let mut bytes = ftyp.clone();
    if trailing_moov {
        let video_off = (ftyp.len() + 8) as u64;
        let audio_off = video_off + video_bytes as u64;
        bytes.extend_from_slice(&((mdat_payload.len() + 8) as u32).to_be_bytes());
        bytes.extend_from_slice(b"mdat");
        bytes.extend_from_slice(&mdat_payload);
        bytes.extend(flat_moov(&video_sizes, &audio_sizes, video_off, audio_off));
    } else {
        // The moov length is offset-independent, so size it with dummy
        // offsets first.
        let probe = flat_moov(&video_sizes, &audio_sizes, 0, 0);
        let video_off = (ftyp.len() + probe.len() + 8) as u64;
        let audio_off = video_off + video_bytes as u64;
        bytes.extend(flat_moov(&video_sizes, &audio_sizes, video_off, audio_off));
        bytes.extend_from_slice(&((mdat_payload.len() + 8) as u32).to_be_bytes());
        bytes.extend_from_slice(b"mdat");
        bytes.extend_from_slice(&mdat_payload);
    }

    FlatFixture {
        bytes,
        video,
        audio,
    }
}
