//! Movie metadata (moov) parsing.
//!
//! Walks the fully buffered moov payload into immutable track descriptors
//! plus the parser-internal state a stream needs afterwards: flattened
//! sample tables for non-fragmented files, trex defaults for fragmented
//! ones, and protection signalling (tenc, pssh) for encrypted tracks.

use tracing::debug;

use crate::atoms::{Atom, AtomIter, AtomType, ByteReader};
use crate::dimensions::{resolve_pixel_aspect, DimensionSource};
use crate::error::{Error, Result};
use crate::sample_table::{SampleTable, SampleTableBuilder};
use crate::track::{Codec, ProtectionInfo, TrackInfo, TrackKind};

/// Fragment defaults for one track, from mvex/trex.
#[derive(Debug, Clone, Default)]
pub(crate) struct TrexDefaults {
    pub track_id: u32,
    pub sample_duration: u32,
    pub sample_size: u32,
    pub sample_flags: u32,
}

/// Everything extracted from one moov box.
#[derive(Debug, Default)]
pub(crate) struct MovieInfo {
    pub timescale: u32,
    pub duration: u64,
    pub tracks: Vec<TrackInfo>,
    /// Flattened sample tables per track id (non-fragmented streams).
    pub tables: Vec<(u32, SampleTable)>,
    pub trex: Vec<TrexDefaults>,
    /// Concatenated raw pssh boxes, header included.
    pub pssh: Vec<u8>,
}

impl MovieInfo {
    pub fn track(&self, track_id: u32) -> Option<&TrackInfo> {
        self.tracks.iter().find(|t| t.track_id == track_id)
    }

    pub fn trex_for(&self, track_id: u32) -> Option<&TrexDefaults> {
        self.trex.iter().find(|t| t.track_id == track_id)
    }

    /// Whether any track carries flattened (non-fragmented) samples.
    pub fn has_sample_tables(&self) -> bool {
        self.tables.iter().any(|(_, t)| !t.is_empty())
    }
}

struct ParsedTrack {
    info: TrackInfo,
    table: SampleTable,
}

/// Parse a complete moov payload.
pub(crate) fn parse_moov(data: &[u8], dims: &dyn DimensionSource) -> Result<MovieInfo> {
    let mut movie = MovieInfo::default();

    for child in AtomIter::new(data) {
        let (atom, payload) = child?;
        match atom.atom_type {
            AtomType::MVHD => parse_mvhd(payload, &mut movie)?,
            AtomType::TRAK => {
                let parsed = parse_trak(payload, dims)?;
                if movie.track(parsed.info.track_id).is_some() {
                    return Err(Error::invalid_moov("duplicate track id"));
                }
                debug!(
                    track_id = parsed.info.track_id,
                    codec = %parsed.info.codec,
                    samples = parsed.table.len(),
                    "parsed trak"
                );
                movie.tables.push((parsed.info.track_id, parsed.table));
                movie.tracks.push(parsed.info);
            }
            AtomType::MVEX => parse_mvex(payload, &mut movie)?,
            AtomType::PSSH => append_raw_box(&atom, payload, &mut movie.pssh),
            _ => {}
        }
    }

    if movie.tracks.is_empty() {
        return Err(Error::invalid_moov("no tracks"));
    }
    if movie.timescale == 0 {
        return Err(Error::invalid_moov("movie timescale is zero"));
    }

    // Protection-system data travels with the encrypted tracks.
    if !movie.pssh.is_empty() {
        let pssh = movie.pssh.clone();
        for track in movie.tracks.iter_mut().filter(|t| t.is_encrypted()) {
            track.eme_init_data = pssh.clone();
        }
    }

    Ok(movie)
}

/// Re-serialize a box with a canonical 8-byte header.
fn append_raw_box(atom: &Atom, payload: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(&((payload.len() + 8) as u32).to_be_bytes());
    out.extend_from_slice(&atom.atom_type.0);
    out.extend_from_slice(payload);
}

fn parse_mvhd(data: &[u8], movie: &mut MovieInfo) -> Result<()> {
    let mut r = ByteReader::new(data);
    let (version, _) = r.version_flags()?;
    if version == 1 {
        r.skip(16)?; // creation + modification (64-bit)
        movie.timescale = r.u32()?;
        movie.duration = r.u64()?;
    } else {
        r.skip(8)?;
        movie.timescale = r.u32()?;
        movie.duration = r.u32()? as u64;
    }
    Ok(())
}

fn parse_mvex(data: &[u8], movie: &mut MovieInfo) -> Result<()> {
    for child in AtomIter::new(data) {
        let (atom, payload) = child?;
        if atom.atom_type != AtomType::TREX {
            continue;
        }
        let mut r = ByteReader::new(payload);
        r.version_flags()?;
        let track_id = r.u32()?;
        r.skip(4)?; // default sample description index
        movie.trex.push(TrexDefaults {
            track_id,
            sample_duration: r.u32()?,
            sample_size: r.u32()?,
            sample_flags: r.u32()?,
        });
    }
    Ok(())
}

fn parse_trak(data: &[u8], dims: &dyn DimensionSource) -> Result<ParsedTrack> {
    let mut track_id = 0u32;
    let mut mdia: Option<&[u8]> = None;

    for child in AtomIter::new(data) {
        let (atom, payload) = child?;
        match atom.atom_type {
            AtomType::TKHD => {
                let mut r = ByteReader::new(payload);
                let (version, _) = r.version_flags()?;
                r.skip(if version == 1 { 16 } else { 8 })?;
                track_id = r.u32()?;
            }
            AtomType::MDIA => mdia = Some(payload),
            _ => {}
        }
    }

    if track_id == 0 {
        return Err(Error::invalid_moov("trak without a valid track id"));
    }
    let mdia = mdia.ok_or_else(|| Error::invalid_moov("trak without mdia"))?;
    parse_mdia(mdia, track_id, dims)
}

fn parse_mdia(data: &[u8], track_id: u32, dims: &dyn DimensionSource) -> Result<ParsedTrack> {
    let mut timescale = 0u32;
    let mut duration = 0u64;
    let mut kind = TrackKind::Other([0; 4]);
    let mut stbl: Option<&[u8]> = None;

    for child in AtomIter::new(data) {
        let (atom, payload) = child?;
        match atom.atom_type {
            AtomType::MDHD => {
                let mut r = ByteReader::new(payload);
                let (version, _) = r.version_flags()?;
                if version == 1 {
                    r.skip(16)?;
                    timescale = r.u32()?;
                    duration = r.u64()?;
                } else {
                    r.skip(8)?;
                    timescale = r.u32()?;
                    duration = r.u32()? as u64;
                }
            }
            AtomType::HDLR => {
                let mut r = ByteReader::new(payload);
                r.version_flags()?;
                r.skip(4)?; // pre_defined
                kind = TrackKind::from_handler(r.fourcc()?);
            }
            AtomType::MINF => {
                for grandchild in AtomIter::new(payload) {
                    let (atom, payload) = grandchild?;
                    if atom.atom_type == AtomType::STBL {
                        stbl = Some(payload);
                    }
                }
            }
            _ => {}
        }
    }

    if timescale == 0 {
        return Err(Error::invalid_moov("track timescale is zero"));
    }
    let stbl = stbl.ok_or_else(|| Error::invalid_moov("track without stbl"))?;

    let mut info = TrackInfo {
        track_id,
        kind,
        codec: Codec::Unknown([0; 4]),
        timescale,
        duration,
        width: None,
        height: None,
        pixel_width: 1,
        pixel_height: 1,
        sample_rate: None,
        channels: None,
        codec_config: None,
        protection: None,
        eme_init_data: Vec::new(),
    };
    let table = parse_stbl(stbl, &mut info, dims)?;
    Ok(ParsedTrack { info, table })
}

fn parse_stbl(data: &[u8], info: &mut TrackInfo, dims: &dyn DimensionSource) -> Result<SampleTable> {
    let mut builder = SampleTableBuilder::new();
    let mut saw_stsd = false;

    for child in AtomIter::new(data) {
        let (atom, payload) = child?;
        match atom.atom_type {
            AtomType::STSD => {
                parse_stsd(payload, info, dims)?;
                saw_stsd = true;
            }
            AtomType::STTS => builder.parse_stts(payload)?,
            AtomType::CTTS => builder.parse_ctts(payload)?,
            AtomType::STSS => builder.parse_stss(payload)?,
            AtomType::STSC => builder.parse_stsc(payload)?,
            AtomType::STSZ => builder.parse_stsz(payload)?,
            AtomType::STCO => builder.parse_chunk_offsets(payload, false)?,
            AtomType::CO64 => builder.parse_chunk_offsets(payload, true)?,
            _ => {}
        }
    }

    if !saw_stsd {
        return Err(Error::invalid_moov("stbl without stsd"));
    }
    builder.build()
}

fn parse_stsd(data: &[u8], info: &mut TrackInfo, dims: &dyn DimensionSource) -> Result<()> {
    let mut r = ByteReader::new(data);
    r.version_flags()?;
    let entry_count = r.u32()?;
    if entry_count == 0 {
        return Err(Error::invalid_moov("stsd with no sample entries"));
    }

    // Only the first sample description drives the descriptor.
    let entries = r.bytes(r.remaining())?;
    let mut iter = AtomIter::new(entries);
    let (entry, payload) = iter
        .next()
        .ok_or_else(|| Error::invalid_moov("stsd payload is empty"))??;

    match info.kind {
        TrackKind::Video => parse_visual_entry(entry.atom_type, payload, info, dims),
        TrackKind::Audio => parse_audio_entry(entry.atom_type, payload, info),
        TrackKind::Other(_) => {
            info.codec = Codec::from_fourcc(entry.atom_type.0);
            Ok(())
        }
    }
}

fn parse_visual_entry(
    fourcc: AtomType,
    data: &[u8],
    info: &mut TrackInfo,
    dims: &dyn DimensionSource,
) -> Result<()> {
    let mut r = ByteReader::new(data);
    r.skip(8)?; // reserved + data_reference_index
    r.skip(16)?; // pre_defined + reserved
    info.width = Some(r.u16()? as u32);
    info.height = Some(r.u16()? as u32);
    r.skip(50)?; // resolution, frame_count, compressor name, depth

    let mut pasp = None;
    let mut protection = None;
    for child in AtomIter::new(r.bytes(r.remaining())?) {
        let (atom, payload) = child?;
        match atom.atom_type {
            AtomType::AVCC | AtomType::HVCC | AtomType::AV1C => {
                info.codec_config = Some(payload.to_vec());
            }
            AtomType::PASP => {
                let mut r = ByteReader::new(payload);
                pasp = Some((r.u32()?, r.u32()?));
            }
            AtomType::SINF => protection = Some(parse_sinf(payload)?),
            _ => {}
        }
    }

    let format = match &protection {
        Some(p) => p.original_format,
        None => fourcc.0,
    };
    info.codec = Codec::from_fourcc(format);
    info.protection = protection;

    let (pw, ph) = resolve_pixel_aspect(pasp, info.codec, info.codec_config.as_deref(), dims);
    info.pixel_width = pw;
    info.pixel_height = ph;
    Ok(())
}

fn parse_audio_entry(fourcc: AtomType, data: &[u8], info: &mut TrackInfo) -> Result<()> {
    let mut r = ByteReader::new(data);
    r.skip(8)?; // reserved + data_reference_index
    r.skip(8)?; // reserved
    info.channels = Some(r.u16()?);
    r.skip(2)?; // sample size
    r.skip(4)?; // pre_defined + reserved
    info.sample_rate = Some(r.u32()? >> 16); // 16.16 fixed point

    let mut protection = None;
    for child in AtomIter::new(r.bytes(r.remaining())?) {
        let (atom, payload) = child?;
        match atom.atom_type {
            AtomType::ESDS => info.codec_config = Some(payload.to_vec()),
            AtomType::SINF => protection = Some(parse_sinf(payload)?),
            _ => {}
        }
    }

    let format = match &protection {
        Some(p) => p.original_format,
        None => fourcc.0,
    };
    info.codec = Codec::from_fourcc(format);
    info.protection = protection;
    Ok(())
}

/// Parse sinf into protection signalling: frma gives the original format,
/// schm the scheme, schi/tenc the default key id and IV size.
fn parse_sinf(data: &[u8]) -> Result<ProtectionInfo> {
    let mut original_format = None;
    let mut scheme = None;
    let mut tenc = None;

    for child in AtomIter::new(data) {
        let (atom, payload) = child?;
        match atom.atom_type {
            AtomType::FRMA => {
                let mut r = ByteReader::new(payload);
                original_format = Some(r.fourcc()?);
            }
            AtomType::SCHM => {
                let mut r = ByteReader::new(payload);
                r.version_flags()?;
                scheme = Some(r.fourcc()?);
            }
            AtomType::SCHI => {
                for grandchild in AtomIter::new(payload) {
                    let (atom, payload) = grandchild?;
                    if atom.atom_type == AtomType::TENC {
                        tenc = Some(parse_tenc(payload)?);
                    }
                }
            }
            _ => {}
        }
    }

    let original_format =
        original_format.ok_or_else(|| Error::invalid_moov("sinf without frma"))?;
    let scheme = scheme.ok_or_else(|| Error::invalid_moov("sinf without schm"))?;
    if &scheme != b"cenc" {
        return Err(Error::Unsupported(format!(
            "protection scheme '{}'",
            std::str::from_utf8(&scheme).unwrap_or("????")
        )));
    }
    let (iv_size, key_id) = tenc.ok_or_else(|| Error::invalid_moov("sinf without tenc"))?;

    Ok(ProtectionInfo {
        scheme,
        original_format,
        default_iv_size: iv_size,
        default_key_id: key_id,
    })
}

fn parse_tenc(data: &[u8]) -> Result<(u8, [u8; 16])> {
    let mut r = ByteReader::new(data);
    r.version_flags()?;
    r.skip(2)?; // reserved (v0) / pattern block sizes (v1)
    let is_protected = r.u8()?;
    let iv_size = r.u8()?;
    let mut key_id = [0u8; 16];
    key_id.copy_from_slice(r.bytes(16)?);

    if is_protected == 0 {
        return Err(Error::invalid_moov("tenc marks the track unprotected"));
    }
    if iv_size != 8 && iv_size != 16 {
        return Err(Error::Unsupported(format!(
            "per-sample IV size {}",
            iv_size
        )));
    }
    Ok((iv_size, key_id))
}
