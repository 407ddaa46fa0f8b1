//! Streaming MP4/fMP4 demuxer.
//!
//! Bytes are pushed in with [`Mp4Demuxer::append`] in chunks of any size;
//! the demuxer assembles top-level boxes across chunk boundaries, fires
//! one initialization callback per track set, and one sample callback per
//! media unit. Delivery depends only on the byte stream, never on how it
//! was chunked.

use std::collections::HashSet;
use std::io::{Read, Seek, SeekFrom};

use tracing::{debug, warn};

use crate::atoms::{read_atom, AtomType, MAX_BOX_SIZE};
use crate::buffer::ByteQueue;
use crate::cenc::{DecryptorSource, KeySource};
use crate::dimensions::{DimensionSource, NoDimensionSource};
use crate::error::{Error, Result};
use crate::fragment::{parse_cenc_aux_record, parse_moof, AuxInfo, Fragment, SampleEncryption};
use crate::moov::{parse_moov, MovieInfo};
use crate::sample_table::SampleEntry;
use crate::track::{MediaSample, TrackInfo};

/// Observer for parsed output.
pub trait StreamSink {
    /// Called once per initialization segment with all track descriptors.
    fn on_init(&mut self, tracks: &[TrackInfo]);

    /// Called once per media sample, in stream order per track.
    /// Returning `false` aborts parsing.
    fn on_sample(&mut self, track_id: u32, sample: MediaSample) -> bool;
}

/// Parser lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// No initialization segment seen yet.
    AwaitingInit,
    /// A moov box is being decoded.
    ParsingInit,
    /// Initialized; between fragments.
    Ready,
    /// A moof was decoded and its media data is still arriving.
    ParsingFragment,
    /// A fatal error occurred; only reconstruction helps.
    Error,
}

/// Ceiling on media data retained ahead of an initialization segment
/// (trailing-moov containers). A stream that exceeds it without ever
/// presenting a moov is treated as corrupt.
const MAX_PREINIT_MEDIA: u64 = 256 * 1024 * 1024;

/// A completed mdat payload kept until the samples addressing it have
/// been delivered.
struct RetainedMdat {
    /// Absolute stream offset of the first payload byte.
    start: u64,
    data: Vec<u8>,
}

fn read_range(mdats: &[RetainedMdat], offset: u64, len: u64) -> Option<&[u8]> {
    mdats.iter().find_map(|mdat| {
        let end = mdat.start + mdat.data.len() as u64;
        if offset >= mdat.start && offset + len <= end {
            let lo = (offset - mdat.start) as usize;
            Some(&mdat.data[lo..lo + len as usize])
        } else {
            None
        }
    })
}

/// Incremental ISO-BMFF demuxer.
pub struct Mp4Demuxer<S: StreamSink> {
    sink: S,
    dims: Box<dyn DimensionSource>,
    decryptor: Option<DecryptorSource>,
    state: ParserState,
    queue: ByteQueue,
    movie: Option<MovieInfo>,
    pending_fragment: Option<Fragment>,
    mdats: Vec<RetainedMdat>,
    /// Offset-ordered samples of a non-fragmented stream, with the
    /// delivery watermark.
    flat_samples: Vec<(u32, SampleEntry)>,
    next_flat: usize,
    /// Media data bytes retained while no moov has been seen yet.
    preinit_retained: u64,
    /// Tracks whose key could not be resolved; their samples are
    /// withheld for the rest of the stream.
    failed_tracks: HashSet<u32>,
    /// A new moov is honored only on a fresh parser or after a flush.
    allow_reinit: bool,
}

impl<S: StreamSink> Mp4Demuxer<S> {
    /// Create a demuxer for clear streams.
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            dims: Box::new(NoDimensionSource),
            decryptor: None,
            state: ParserState::AwaitingInit,
            queue: ByteQueue::new(),
            movie: None,
            pending_fragment: None,
            mdats: Vec::new(),
            flat_samples: Vec::new(),
            next_flat: 0,
            preinit_retained: 0,
            failed_tracks: HashSet::new(),
            allow_reinit: true,
        }
    }

    /// Create a demuxer that decrypts protected samples with keys from
    /// the given source.
    pub fn with_key_source(sink: S, key_source: Box<dyn KeySource>) -> Self {
        let mut demuxer = Self::new(sink);
        demuxer.decryptor = Some(DecryptorSource::new(key_source));
        demuxer
    }

    /// Install a codec-config reader for pixel aspect resolution.
    /// Takes effect for initialization segments parsed afterwards.
    pub fn set_dimension_source(&mut self, dims: Box<dyn DimensionSource>) {
        self.dims = dims;
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Track descriptors of the current initialization, if any.
    pub fn tracks(&self) -> Option<&[TrackInfo]> {
        self.movie.as_ref().map(|m| m.tracks.as_slice())
    }

    /// Access the sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Consume the demuxer, returning the sink.
    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Push a chunk of stream bytes. Chunks may be of any size, down to
    /// a single byte; delivery is invariant under chunking.
    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        if self.state == ParserState::Error {
            return Err(Error::Poisoned);
        }
        self.queue.push(data);
        let result = self.process();
        if result.is_err() {
            self.state = ParserState::Error;
        }
        result
    }

    /// Discard partially buffered data and return to a resumable state.
    /// Appending may continue at any later top-level box boundary.
    pub fn flush(&mut self) -> Result<()> {
        if self.state == ParserState::Error {
            return Err(Error::Poisoned);
        }
        if self.pending_fragment.take().is_some() {
            debug!("discarding incomplete fragment at flush");
        }
        self.queue.reset();
        self.mdats.clear();
        self.preinit_retained = 0;
        self.allow_reinit = true;
        self.state = if self.movie.is_some() {
            ParserState::Ready
        } else {
            ParserState::AwaitingInit
        };
        Ok(())
    }

    /// Pre-load initialization metadata from a seekable source, for
    /// containers whose moov trails the media data. Top-level boxes are
    /// scanned by header only; the moov payload is the only box read.
    pub fn load_init<R: Read + Seek>(&mut self, reader: &mut R) -> Result<()> {
        if self.state == ParserState::Error {
            return Err(Error::Poisoned);
        }
        let result = self.scan_for_moov(reader);
        if result.is_err() {
            self.state = ParserState::Error;
        }
        result
    }

    fn scan_for_moov<R: Read + Seek>(&mut self, reader: &mut R) -> Result<()> {
        let len = reader.seek(SeekFrom::End(0))?;
        let mut pos = 0u64;

        while pos + 8 <= len {
            reader.seek(SeekFrom::Start(pos))?;
            let mut header = [0u8; 8];
            reader.read_exact(&mut header)?;
            let size32 = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
            let fourcc = AtomType([header[4], header[5], header[6], header[7]]);

            let (size, header_size) = match size32 {
                0 => (len - pos, 8u64),
                1 => {
                    let mut ext = [0u8; 8];
                    reader.read_exact(&mut ext)?;
                    (u64::from_be_bytes(ext), 16u64)
                }
                n => (n as u64, 8u64),
            };
            // The declared size is untrusted 64-bit input; reject
            // anything whose end cannot be computed or lies past EOF.
            let end = match pos.checked_add(size) {
                Some(end) if size >= header_size && end <= len => end,
                _ => {
                    return Err(Error::InvalidBox(format!(
                        "box '{}' at offset {} declares {} bytes",
                        fourcc, pos, size
                    )))
                }
            };

            if fourcc == AtomType::MOOV {
                if size > MAX_BOX_SIZE {
                    return Err(Error::BoxTooLarge {
                        atom: fourcc.as_str().to_string(),
                        size,
                        max: MAX_BOX_SIZE,
                    });
                }
                let mut payload = vec![0u8; (size - header_size) as usize];
                reader.read_exact(&mut payload)?;
                return self.handle_moov(&payload);
            }
            pos = end;
        }
        Err(Error::invalid_moov("no moov box in source"))
    }

    fn process(&mut self) -> Result<()> {
        loop {
            let atom = match read_atom(self.queue.data(), 0)? {
                Some(atom) => atom,
                None => break,
            };
            // A size-0 box has no determinable end in a push stream;
            // it can only be consumed via `load_init`.
            if atom.extends_to_end {
                break;
            }

            let box_start = self.queue.head_offset();
            match atom.atom_type {
                AtomType::MOOV => {
                    self.state = ParserState::ParsingInit;
                    let payload = self.queue.data()[atom.data_offset..atom.end()].to_vec();
                    self.queue.consume(atom.size as usize);
                    self.handle_moov(&payload)?;
                }
                AtomType::MOOF => {
                    let payload = self.queue.data()[atom.data_offset..atom.end()].to_vec();
                    self.queue.consume(atom.size as usize);
                    self.handle_moof(&payload, box_start)?;
                }
                AtomType::MDAT => {
                    let data = self.queue.data()[atom.data_offset..atom.end()].to_vec();
                    let start = box_start + atom.header_size as u64;
                    self.queue.consume(atom.size as usize);
                    self.handle_mdat(start, data)?;
                }
                other => {
                    debug!(atom = %other, size = atom.size, "skipping top-level box");
                    self.queue.consume(atom.size as usize);
                }
            }
        }
        Ok(())
    }

    fn handle_moov(&mut self, payload: &[u8]) -> Result<()> {
        if self.movie.is_some() && !self.allow_reinit {
            debug!("ignoring repeated moov");
            self.state = ParserState::Ready;
            return Ok(());
        }

        let movie = parse_moov(payload, self.dims.as_ref())?;
        if movie.has_sample_tables() && movie.tracks.iter().any(|t| t.is_encrypted()) {
            return Err(Error::unsupported("encrypted non-fragmented stream"));
        }

        // The fetch hook fires only when the stream actually carries
        // protection-system data; keys can still be resolved lazily
        // per key id otherwise.
        if !movie.pssh.is_empty() && movie.tracks.iter().any(|t| t.is_encrypted()) {
            if let Some(decryptor) = &mut self.decryptor {
                decryptor.fetch(&movie.pssh)?;
            }
        }

        self.flat_samples = flatten_tables(&movie);
        self.next_flat = 0;
        self.preinit_retained = 0;
        self.failed_tracks.clear();
        self.allow_reinit = false;

        debug!(
            tracks = movie.tracks.len(),
            timescale = movie.timescale,
            duration = movie.duration,
            "initialized"
        );
        self.sink.on_init(&movie.tracks);
        self.movie = Some(movie);
        self.state = ParserState::Ready;

        // Media data retained ahead of a trailing moov is deliverable now.
        self.deliver_flat()
    }

    fn handle_moof(&mut self, payload: &[u8], moof_start: u64) -> Result<()> {
        let movie = self
            .movie
            .as_ref()
            .ok_or_else(|| Error::invalid_fragment("moof before initialization segment"))?;
        let fragment = parse_moof(payload, moof_start, movie)?;
        self.pending_fragment = Some(fragment);
        self.state = ParserState::ParsingFragment;
        self.try_complete_fragment()
    }

    fn handle_mdat(&mut self, start: u64, data: Vec<u8>) -> Result<()> {
        if self.movie.is_none() {
            // Possibly a trailing-moov container; keep the data, within
            // a cumulative budget.
            self.preinit_retained += data.len() as u64;
            if self.preinit_retained > MAX_PREINIT_MEDIA {
                return Err(Error::unsupported(
                    "media data before the initialization segment exceeds the retention limit",
                ));
            }
            self.mdats.push(RetainedMdat { start, data });
            return Ok(());
        }
        self.mdats.push(RetainedMdat { start, data });
        self.try_complete_fragment()?;
        self.deliver_flat()
    }

    /// Materialize the pending fragment once every byte range it
    /// addresses is buffered.
    fn try_complete_fragment(&mut self) -> Result<()> {
        let Some(fragment) = &self.pending_fragment else {
            return Ok(());
        };

        let arrived = self.queue.head_offset();
        for run in &fragment.runs {
            let mut ranges: Vec<(u64, u64)> = run
                .samples
                .iter()
                .map(|s| (s.offset, s.size as u64))
                .collect();
            if let AuxInfo::Cenc(entries) = &run.aux {
                ranges.extend(entries.iter().map(|(off, size)| (*off, *size as u64)));
            }
            for (offset, len) in ranges {
                if read_range(&self.mdats, offset, len).is_some() {
                    continue;
                }
                if offset + len <= arrived {
                    // The bytes already streamed past and were not in
                    // any media data box; they will never arrive.
                    return Err(Error::invalid_fragment(
                        "fragment addresses bytes outside media data",
                    ));
                }
                return Ok(()); // still waiting
            }
        }

        let fragment = match self.pending_fragment.take() {
            Some(fragment) => fragment,
            None => return Ok(()),
        };
        let end = fragment.data_end();
        self.materialize_fragment(fragment)?;
        self.state = ParserState::Ready;
        self.prune_mdats(end);
        Ok(())
    }

    fn materialize_fragment(&mut self, fragment: Fragment) -> Result<()> {
        debug!(sequence = fragment.sequence_number, "materializing fragment");
        for run in fragment.runs {
            let crypto = resolve_run_crypto(&run.aux, &self.mdats, run.iv_size, run.samples.len())?;

            for (sample, entry) in run.samples.iter().zip(crypto) {
                // A poisoned track stays silent even through later clear
                // runs; withholding covers the rest of the session.
                if self.failed_tracks.contains(&run.track_id) {
                    continue;
                }
                let bytes = read_range(&self.mdats, sample.offset, sample.size as u64)
                    .ok_or_else(|| {
                        Error::invalid_fragment("sample data missing from media data box")
                    })?;
                let mut data = bytes.to_vec();

                if let Some(entry) = entry {
                    let Some(decryptor) = &mut self.decryptor else {
                        warn!(
                            track_id = run.track_id,
                            "no key source; withholding protected sample"
                        );
                        continue;
                    };
                    match decryptor.decrypt(&run.key_id, &entry, &mut data) {
                        Ok(()) => {}
                        Err(e @ (Error::MissingKey { .. } | Error::KeyFetch(_))) => {
                            // Key problems poison the track, not the stream.
                            warn!(track_id = run.track_id, error = %e, "withholding track");
                            self.failed_tracks.insert(run.track_id);
                            continue;
                        }
                        Err(e) => return Err(e),
                    }
                }

                let media = MediaSample {
                    data,
                    dts: sample.dts,
                    pts: (sample.dts as i64 + sample.cts_offset as i64).max(0) as u64,
                    duration: sample.duration,
                    is_keyframe: sample.is_keyframe,
                };
                if !self.sink.on_sample(run.track_id, media) {
                    return Err(Error::Aborted);
                }
            }
        }
        Ok(())
    }

    /// Deliver non-fragmented samples that are now fully buffered, in
    /// stream offset order.
    fn deliver_flat(&mut self) -> Result<()> {
        while self.next_flat < self.flat_samples.len() {
            let (track_id, entry) = self.flat_samples[self.next_flat];
            let Some(bytes) = read_range(&self.mdats, entry.offset, entry.size as u64) else {
                break;
            };
            let media = MediaSample {
                data: bytes.to_vec(),
                dts: entry.dts,
                pts: entry.pts(),
                duration: entry.duration,
                is_keyframe: entry.is_keyframe,
            };
            self.next_flat += 1;
            if !self.sink.on_sample(track_id, media) {
                return Err(Error::Aborted);
            }
        }

        let keep_from = self
            .flat_samples
            .get(self.next_flat)
            .map(|(_, entry)| entry.offset)
            .unwrap_or(u64::MAX);
        self.prune_mdats(keep_from);
        Ok(())
    }

    /// Drop retained media data that nothing can address anymore.
    fn prune_mdats(&mut self, consumed_end: u64) {
        self.mdats
            .retain(|mdat| mdat.start + mdat.data.len() as u64 > consumed_end);
    }
}

/// Merge per-track sample tables into one offset-ordered list.
fn flatten_tables(movie: &MovieInfo) -> Vec<(u32, SampleEntry)> {
    let mut flat: Vec<(u32, SampleEntry)> = movie
        .tables
        .iter()
        .flat_map(|(track_id, table)| table.samples.iter().map(|s| (*track_id, *s)))
        .collect();
    flat.sort_by_key(|(_, s)| s.offset);
    flat
}

fn resolve_run_crypto(
    aux: &AuxInfo,
    mdats: &[RetainedMdat],
    iv_size: u8,
    sample_count: usize,
) -> Result<Vec<Option<SampleEncryption>>> {
    match aux {
        AuxInfo::None => Ok(vec![None; sample_count]),
        AuxInfo::Senc(entries) => Ok(entries.iter().cloned().map(Some).collect()),
        AuxInfo::Cenc(entries) => entries
            .iter()
            .map(|(offset, size)| {
                let record = read_range(mdats, *offset, *size as u64).ok_or_else(|| {
                    Error::invalid_fragment("encryption records missing from media data box")
                })?;
                parse_cenc_aux_record(record, iv_size).map(Some)
            })
            .collect(),
    }
}
