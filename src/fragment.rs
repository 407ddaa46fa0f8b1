//! Movie fragment (moof) parsing.
//!
//! Decodes mfhd/traf/tfhd/tfdt/trun into per-track sample runs with
//! absolute data offsets, merging trex defaults, tfhd overrides, and
//! per-sample trun fields. Protection metadata is normalized from either
//! an inline senc box or the saiz/saio auxiliary-information pair into
//! one `{iv, subsample map}` record per sample.

use tracing::debug;

use crate::atoms::{AtomIter, AtomType, ByteReader};
use crate::error::{Error, Result};
use crate::moov::MovieInfo;

// tfhd flags.
const TFHD_BASE_DATA_OFFSET: u32 = 0x000001;
const TFHD_SAMPLE_DESCRIPTION_INDEX: u32 = 0x000002;
const TFHD_DEFAULT_SAMPLE_DURATION: u32 = 0x000008;
const TFHD_DEFAULT_SAMPLE_SIZE: u32 = 0x000010;
const TFHD_DEFAULT_SAMPLE_FLAGS: u32 = 0x000020;
const TFHD_DEFAULT_BASE_IS_MOOF: u32 = 0x020000;

// trun flags.
const TRUN_DATA_OFFSET: u32 = 0x000001;
const TRUN_FIRST_SAMPLE_FLAGS: u32 = 0x000004;
const TRUN_SAMPLE_DURATION: u32 = 0x000100;
const TRUN_SAMPLE_SIZE: u32 = 0x000200;
const TRUN_SAMPLE_FLAGS: u32 = 0x000400;
const TRUN_SAMPLE_CTS_OFFSET: u32 = 0x000800;

// Bit 16 of sample flags: sample_is_non_sync_sample.
const SAMPLE_FLAG_NON_SYNC: u32 = 0x0001_0000;

// senc flag: subsample encryption entries present.
const SENC_SUBSAMPLES: u32 = 0x000002;

/// Per-sample encryption record, normalized from senc or saiz/saio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SampleEncryption {
    /// Initialization vector (8 or 16 bytes).
    pub iv: Vec<u8>,
    /// `(clear, encrypted)` byte-run pairs; empty means the whole
    /// payload is encrypted.
    pub subsamples: Vec<(u16, u32)>,
}

impl SampleEncryption {
    /// Total byte count the subsample map covers.
    pub fn mapped_len(&self) -> u64 {
        self.subsamples
            .iter()
            .map(|(clear, enc)| *clear as u64 + *enc as u64)
            .sum()
    }
}

/// Where a run's encryption records live.
#[derive(Debug)]
pub(crate) enum AuxInfo {
    /// Clear run (no records).
    None,
    /// Inline senc records, already decoded.
    Senc(Vec<SampleEncryption>),
    /// saiz/saio records: absolute offset and size of each sample's
    /// record, resolved once the referenced bytes are buffered.
    Cenc(Vec<(u64, u8)>),
}

/// One sample addressed inside the fragment's data.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FragmentSample {
    /// Absolute stream offset of the sample data.
    pub offset: u64,
    pub size: u32,
    pub dts: u64,
    pub duration: u32,
    pub cts_offset: i32,
    pub is_keyframe: bool,
}

/// All samples one traf contributes.
#[derive(Debug)]
pub(crate) struct TrackRun {
    pub track_id: u32,
    /// Per-sample IV size from tenc, when the track is protected.
    pub iv_size: u8,
    pub key_id: [u8; 16],
    pub samples: Vec<FragmentSample>,
    pub aux: AuxInfo,
}

impl TrackRun {
    /// One past the last byte this run needs, sample data and
    /// auxiliary records included.
    pub fn data_end(&self) -> u64 {
        let samples_end = self
            .samples
            .iter()
            .map(|s| s.offset + s.size as u64)
            .max()
            .unwrap_or(0);
        let aux_end = match &self.aux {
            AuxInfo::Cenc(entries) => entries
                .iter()
                .map(|(off, size)| off + *size as u64)
                .max()
                .unwrap_or(0),
            _ => 0,
        };
        samples_end.max(aux_end)
    }
}

/// A fully parsed moof.
#[derive(Debug)]
pub(crate) struct Fragment {
    pub sequence_number: u32,
    pub runs: Vec<TrackRun>,
}

impl Fragment {
    /// One past the last byte any run needs.
    pub fn data_end(&self) -> u64 {
        self.runs.iter().map(|r| r.data_end()).max().unwrap_or(0)
    }
}

/// Parse a complete moof payload. `moof_start` is the absolute stream
/// offset of the moof header, the anchor for default-base-is-moof and
/// for implicit base data offsets.
pub(crate) fn parse_moof(data: &[u8], moof_start: u64, movie: &MovieInfo) -> Result<Fragment> {
    let mut sequence_number = 0u32;
    let mut runs = Vec::new();

    for child in AtomIter::new(data) {
        let (atom, payload) = child?;
        match atom.atom_type {
            AtomType::MFHD => {
                let mut r = ByteReader::new(payload);
                r.version_flags()?;
                sequence_number = r.u32()?;
            }
            AtomType::TRAF => {
                // Without default-base-is-moof or an explicit base, a
                // traf anchors where the previous traf's data ended.
                let prev_end = runs.last().map(|r: &TrackRun| r.data_end());
                runs.push(parse_traf(payload, moof_start, prev_end, movie)?);
            }
            _ => {}
        }
    }

    if runs.is_empty() {
        return Err(Error::invalid_fragment("moof without traf"));
    }
    debug!(
        sequence_number,
        runs = runs.len(),
        "parsed moof"
    );
    Ok(Fragment {
        sequence_number,
        runs,
    })
}

#[derive(Default)]
struct TfhdDefaults {
    track_id: u32,
    base_data_offset: Option<u64>,
    base_is_moof: bool,
    sample_duration: Option<u32>,
    sample_size: Option<u32>,
    sample_flags: Option<u32>,
}

fn parse_tfhd(data: &[u8]) -> Result<TfhdDefaults> {
    let mut r = ByteReader::new(data);
    let (_, flags) = r.version_flags()?;
    let mut tfhd = TfhdDefaults {
        track_id: r.u32()?,
        base_is_moof: flags & TFHD_DEFAULT_BASE_IS_MOOF != 0,
        ..Default::default()
    };
    if flags & TFHD_BASE_DATA_OFFSET != 0 {
        tfhd.base_data_offset = Some(r.u64()?);
    }
    if flags & TFHD_SAMPLE_DESCRIPTION_INDEX != 0 {
        r.skip(4)?;
    }
    if flags & TFHD_DEFAULT_SAMPLE_DURATION != 0 {
        tfhd.sample_duration = Some(r.u32()?);
    }
    if flags & TFHD_DEFAULT_SAMPLE_SIZE != 0 {
        tfhd.sample_size = Some(r.u32()?);
    }
    if flags & TFHD_DEFAULT_SAMPLE_FLAGS != 0 {
        tfhd.sample_flags = Some(r.u32()?);
    }
    Ok(tfhd)
}

fn parse_traf(
    data: &[u8],
    moof_start: u64,
    prev_end: Option<u64>,
    movie: &MovieInfo,
) -> Result<TrackRun> {
    let mut tfhd = None;
    let mut decode_time = 0u64;
    let mut truns = Vec::new();
    let mut senc_payload = None;
    let mut saiz_payload = None;
    let mut saio_payload = None;

    for child in AtomIter::new(data) {
        let (atom, payload) = child?;
        match atom.atom_type {
            AtomType::TFHD => tfhd = Some(parse_tfhd(payload)?),
            AtomType::TFDT => {
                let mut r = ByteReader::new(payload);
                let (version, _) = r.version_flags()?;
                decode_time = if version == 1 { r.u64()? } else { r.u32()? as u64 };
            }
            AtomType::TRUN => truns.push(payload),
            AtomType::SENC => senc_payload = Some(payload),
            AtomType::SAIZ => saiz_payload = Some(payload),
            AtomType::SAIO => saio_payload = Some(payload),
            _ => {}
        }
    }

    let tfhd = tfhd.ok_or_else(|| Error::invalid_fragment("traf without tfhd"))?;
    let track = movie
        .track(tfhd.track_id)
        .ok_or_else(|| Error::invalid_fragment(format!("traf for unknown track {}", tfhd.track_id)))?;
    let trex = movie.trex_for(tfhd.track_id);

    let default_duration = tfhd
        .sample_duration
        .or(trex.map(|t| t.sample_duration))
        .unwrap_or(0);
    let default_size = tfhd
        .sample_size
        .or(trex.map(|t| t.sample_size))
        .unwrap_or(0);
    let default_flags = tfhd
        .sample_flags
        .or(trex.map(|t| t.sample_flags))
        .unwrap_or(0);

    let base = match tfhd.base_data_offset {
        Some(offset) => offset,
        None if tfhd.base_is_moof => moof_start,
        None => prev_end.unwrap_or(moof_start),
    };

    let mut samples = Vec::new();
    let mut running_offset = base;
    let mut dts = decode_time;

    for trun in truns {
        let mut r = ByteReader::new(trun);
        let (version, flags) = r.version_flags()?;
        let sample_count = r.u32()?;

        if flags & TRUN_DATA_OFFSET != 0 {
            let data_offset = r.i32()?;
            running_offset = base
                .checked_add_signed(data_offset as i64)
                .ok_or_else(|| Error::invalid_fragment("trun data offset underflows"))?;
        }
        let first_sample_flags = if flags & TRUN_FIRST_SAMPLE_FLAGS != 0 {
            Some(r.u32()?)
        } else {
            None
        };

        for i in 0..sample_count {
            let duration = if flags & TRUN_SAMPLE_DURATION != 0 {
                r.u32()?
            } else {
                default_duration
            };
            let size = if flags & TRUN_SAMPLE_SIZE != 0 {
                r.u32()?
            } else {
                default_size
            };
            let sample_flags = if flags & TRUN_SAMPLE_FLAGS != 0 {
                r.u32()?
            } else if i == 0 {
                first_sample_flags.unwrap_or(default_flags)
            } else {
                default_flags
            };
            let cts_offset = if flags & TRUN_SAMPLE_CTS_OFFSET != 0 {
                if version == 0 {
                    r.u32()? as i32
                } else {
                    r.i32()?
                }
            } else {
                0
            };

            samples.push(FragmentSample {
                offset: running_offset,
                size,
                dts,
                duration,
                cts_offset,
                is_keyframe: sample_flags & SAMPLE_FLAG_NON_SYNC == 0,
            });
            running_offset += size as u64;
            dts += duration as u64;
        }
    }

    let iv_size = track
        .protection
        .as_ref()
        .map(|p| p.default_iv_size)
        .unwrap_or(0);
    let key_id = track
        .protection
        .as_ref()
        .map(|p| p.default_key_id)
        .unwrap_or([0; 16]);

    let aux = if let Some(senc) = senc_payload {
        AuxInfo::Senc(parse_senc(senc, iv_size, samples.len())?)
    } else if let (Some(saiz), Some(saio)) = (saiz_payload, saio_payload) {
        AuxInfo::Cenc(parse_saiz_saio(saiz, saio, base, samples.len())?)
    } else {
        AuxInfo::None
    };

    Ok(TrackRun {
        track_id: tfhd.track_id,
        iv_size,
        key_id,
        samples,
        aux,
    })
}

/// Decode inline senc records.
fn parse_senc(data: &[u8], iv_size: u8, sample_count: usize) -> Result<Vec<SampleEncryption>> {
    if iv_size == 0 {
        return Err(Error::invalid_fragment("senc present for unprotected track"));
    }
    let mut r = ByteReader::new(data);
    let (_, flags) = r.version_flags()?;
    let count = r.u32()? as usize;
    if count != sample_count {
        return Err(Error::InvalidFragment(format!(
            "senc carries {} entries for {} samples",
            count, sample_count
        )));
    }

    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let iv = r.bytes(iv_size as usize)?.to_vec();
        let subsamples = if flags & SENC_SUBSAMPLES != 0 {
            let n = r.u16()? as usize;
            let mut pairs = Vec::with_capacity(n);
            for _ in 0..n {
                pairs.push((r.u16()?, r.u32()?));
            }
            pairs
        } else {
            Vec::new()
        };
        entries.push(SampleEncryption { iv, subsamples });
    }
    Ok(entries)
}

/// Resolve saiz/saio into absolute per-sample record locations.
fn parse_saiz_saio(
    saiz: &[u8],
    saio: &[u8],
    base: u64,
    sample_count: usize,
) -> Result<Vec<(u64, u8)>> {
    let mut r = ByteReader::new(saiz);
    let (_, flags) = r.version_flags()?;
    if flags & 1 != 0 {
        r.skip(8)?; // aux_info_type + parameter
    }
    let default_size = r.u8()?;
    let count = r.u32()? as usize;
    if count != sample_count {
        return Err(Error::InvalidFragment(format!(
            "saiz carries {} entries for {} samples",
            count, sample_count
        )));
    }
    let mut sizes = Vec::with_capacity(count);
    for _ in 0..count {
        sizes.push(if default_size == 0 {
            r.u8()?
        } else {
            default_size
        });
    }

    let mut r = ByteReader::new(saio);
    let (version, flags) = r.version_flags()?;
    if flags & 1 != 0 {
        r.skip(8)?;
    }
    let entry_count = r.u32()? as usize;
    let mut offsets = Vec::with_capacity(entry_count);
    for _ in 0..entry_count {
        offsets.push(if version == 1 { r.u64()? } else { r.u32()? as u64 });
    }

    let mut entries = Vec::with_capacity(sample_count);
    if entry_count == 1 {
        // One contiguous block of records.
        let mut at = base + offsets[0];
        for size in sizes {
            entries.push((at, size));
            at += size as u64;
        }
    } else if entry_count == sample_count {
        for (offset, size) in offsets.into_iter().zip(sizes) {
            entries.push((base + offset, size));
        }
    } else {
        return Err(Error::InvalidFragment(format!(
            "saio carries {} offsets for {} samples",
            entry_count, sample_count
        )));
    }
    Ok(entries)
}

/// Decode one auxiliary-information record (CENC format) into a
/// [`SampleEncryption`]: IV, then an optional subsample map when the
/// record is longer than the IV.
pub(crate) fn parse_cenc_aux_record(
    record: &[u8],
    iv_size: u8,
) -> Result<SampleEncryption> {
    let mut r = ByteReader::new(record);
    let iv = r.bytes(iv_size as usize)?.to_vec();
    let subsamples = if r.remaining() > 0 {
        let n = r.u16()? as usize;
        let mut pairs = Vec::with_capacity(n);
        for _ in 0..n {
            pairs.push((r.u16()?, r.u32()?));
        }
        pairs
    } else {
        Vec::new()
    };
    Ok(SampleEncryption { iv, subsamples })
}
