//! Sample table resolution for non-fragmented streams.
//!
//! The stbl child tables describe where every sample lives and when it
//! plays:
//! - stts: sample durations (decoding time)
//! - stss: sync sample table (keyframes)
//! - stsc: sample-to-chunk mapping
//! - stsz: sample sizes
//! - stco/co64: chunk offsets
//! - ctts: composition time offsets (for B-frames)
//!
//! The builder parses the raw table payloads and flattens them into one
//! offset-addressed entry per sample.

use crate::atoms::ByteReader;
use crate::error::{Error, Result};

/// A resolved sample entry addressing bytes in the original stream.
#[derive(Debug, Clone, Copy)]
pub struct SampleEntry {
    /// Absolute stream offset where the sample data starts.
    pub offset: u64,
    /// Sample size in bytes.
    pub size: u32,
    /// Decode timestamp in media timescale.
    pub dts: u64,
    /// Sample duration in media timescale.
    pub duration: u32,
    /// Composition time offset (for PTS calculation).
    pub cts_offset: i32,
    /// Whether this sample is a keyframe (sync sample).
    pub is_keyframe: bool,
}

impl SampleEntry {
    /// Get the presentation timestamp.
    pub fn pts(&self) -> u64 {
        (self.dts as i64 + self.cts_offset as i64).max(0) as u64
    }
}

/// Flattened sample table for one track.
#[derive(Debug, Clone, Default)]
pub struct SampleTable {
    /// All resolved samples in decode order.
    pub samples: Vec<SampleEntry>,
}

impl SampleTable {
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }
}

/// Builder accumulating raw stbl tables before resolution.
#[derive(Default)]
pub struct SampleTableBuilder {
    stts_entries: Vec<(u32, u32)>,
    sync_samples: Vec<u32>,
    stsc_entries: Vec<(u32, u32, u32)>,
    uniform_size: u32,
    sample_sizes: Vec<u32>,
    chunk_offsets: Vec<u64>,
    ctts_entries: Vec<(u32, i32)>,
}

/// Ceiling on declared table entry counts, to reject absurd headers
/// before allocating.
const MAX_TABLE_ENTRIES: u32 = 4 * 1024 * 1024;

fn checked_count(count: u32, what: &str) -> Result<usize> {
    if count > MAX_TABLE_ENTRIES {
        return Err(Error::InvalidMoov(format!(
            "{} declares {} entries",
            what, count
        )));
    }
    Ok(count as usize)
}

impl SampleTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an stts payload (decoding time to sample).
    pub fn parse_stts(&mut self, data: &[u8]) -> Result<()> {
        let mut r = ByteReader::new(data);
        r.version_flags()?;
        let count = checked_count(r.u32()?, "stts")?;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push((r.u32()?, r.u32()?));
        }
        self.stts_entries = entries;
        Ok(())
    }

    /// Parse a ctts payload (composition time offsets).
    pub fn parse_ctts(&mut self, data: &[u8]) -> Result<()> {
        let mut r = ByteReader::new(data);
        let (version, _) = r.version_flags()?;
        let count = checked_count(r.u32()?, "ctts")?;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let sample_count = r.u32()?;
            // Version 0 offsets are unsigned but fit the same lane.
            let offset = if version == 0 {
                r.u32()? as i64 as i32
            } else {
                r.i32()?
            };
            entries.push((sample_count, offset));
        }
        self.ctts_entries = entries;
        Ok(())
    }

    /// Parse an stss payload (sync samples, 1-based).
    pub fn parse_stss(&mut self, data: &[u8]) -> Result<()> {
        let mut r = ByteReader::new(data);
        r.version_flags()?;
        let count = checked_count(r.u32()?, "stss")?;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(r.u32()?);
        }
        self.sync_samples = entries;
        Ok(())
    }

    /// Parse an stsc payload (sample-to-chunk mapping).
    pub fn parse_stsc(&mut self, data: &[u8]) -> Result<()> {
        let mut r = ByteReader::new(data);
        r.version_flags()?;
        let count = checked_count(r.u32()?, "stsc")?;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push((r.u32()?, r.u32()?, r.u32()?));
        }
        self.stsc_entries = entries;
        Ok(())
    }

    /// Parse an stsz payload (sample sizes).
    pub fn parse_stsz(&mut self, data: &[u8]) -> Result<()> {
        let mut r = ByteReader::new(data);
        r.version_flags()?;
        self.uniform_size = r.u32()?;
        let count = checked_count(r.u32()?, "stsz")?;
        if self.uniform_size == 0 {
            let mut sizes = Vec::with_capacity(count);
            for _ in 0..count {
                sizes.push(r.u32()?);
            }
            self.sample_sizes = sizes;
        } else {
            // Uniform size still declares the count.
            self.sample_sizes = vec![self.uniform_size; count];
            self.uniform_size = 0;
        }
        Ok(())
    }

    /// Parse an stco (32-bit) or co64 (64-bit) chunk offset payload.
    pub fn parse_chunk_offsets(&mut self, data: &[u8], wide: bool) -> Result<()> {
        let mut r = ByteReader::new(data);
        r.version_flags()?;
        let count = checked_count(r.u32()?, "stco")?;
        let mut offsets = Vec::with_capacity(count);
        for _ in 0..count {
            offsets.push(if wide { r.u64()? } else { r.u32()? as u64 });
        }
        self.chunk_offsets = offsets;
        Ok(())
    }

    /// Resolve all tables into a flat sample list.
    pub fn build(self) -> Result<SampleTable> {
        let sample_count = self.sample_sizes.len() as u32;
        if sample_count == 0 {
            return Ok(SampleTable::default());
        }
        if self.chunk_offsets.is_empty() || self.stsc_entries.is_empty() {
            return Err(Error::invalid_moov(
                "sample table has sizes but no chunk layout",
            ));
        }

        let sample_chunks = self.resolve_sample_chunks(sample_count);
        let offsets = self.resolve_offsets(&sample_chunks, sample_count);
        let (dts_values, durations) = self.resolve_timestamps(sample_count);
        let cts_offsets = self.resolve_cts_offsets(sample_count);
        let sync_set: std::collections::HashSet<u32> = self.sync_samples.iter().copied().collect();

        let mut samples = Vec::with_capacity(sample_count as usize);
        for i in 0..sample_count {
            // Empty stss means every sample is a sync sample.
            let is_keyframe = self.sync_samples.is_empty() || sync_set.contains(&(i + 1));
            samples.push(SampleEntry {
                offset: offsets[i as usize],
                size: self.sample_sizes[i as usize],
                dts: dts_values[i as usize],
                duration: durations[i as usize],
                cts_offset: cts_offsets[i as usize],
                is_keyframe,
            });
        }

        Ok(SampleTable { samples })
    }

    fn resolve_sample_chunks(&self, sample_count: u32) -> Vec<u32> {
        let mut result = Vec::with_capacity(sample_count as usize);
        let num_chunks = self.chunk_offsets.len() as u32;

        'outer: for i in 0..self.stsc_entries.len() {
            let (first_chunk, samples_per_chunk, _) = self.stsc_entries[i];
            let next_first = if i + 1 < self.stsc_entries.len() {
                self.stsc_entries[i + 1].0
            } else {
                num_chunks + 1
            };

            for chunk in first_chunk..next_first {
                if chunk > num_chunks {
                    break;
                }
                for _ in 0..samples_per_chunk {
                    if result.len() as u32 >= sample_count {
                        break 'outer;
                    }
                    result.push(chunk - 1); // 1-based on the wire
                }
            }
        }

        while (result.len() as u32) < sample_count {
            result.push(result.last().copied().unwrap_or(0));
        }
        result
    }

    fn resolve_offsets(&self, sample_chunks: &[u32], sample_count: u32) -> Vec<u64> {
        let mut offsets = Vec::with_capacity(sample_count as usize);
        let mut chunk_fill = vec![0u64; self.chunk_offsets.len()];

        for i in 0..sample_count as usize {
            let chunk_idx = sample_chunks[i] as usize;
            let chunk_base = self.chunk_offsets.get(chunk_idx).copied().unwrap_or(0);
            offsets.push(chunk_base + chunk_fill.get(chunk_idx).copied().unwrap_or(0));
            if let Some(fill) = chunk_fill.get_mut(chunk_idx) {
                *fill += self.sample_sizes[i] as u64;
            }
        }
        offsets
    }

    fn resolve_timestamps(&self, sample_count: u32) -> (Vec<u64>, Vec<u32>) {
        let mut dts_values = Vec::with_capacity(sample_count as usize);
        let mut durations = Vec::with_capacity(sample_count as usize);
        let mut current_dts = 0u64;

        'outer: for (count, delta) in &self.stts_entries {
            for _ in 0..*count {
                if dts_values.len() as u32 >= sample_count {
                    break 'outer;
                }
                dts_values.push(current_dts);
                durations.push(*delta);
                current_dts += *delta as u64;
            }
        }

        let last_duration = durations.last().copied().unwrap_or(1);
        while (dts_values.len() as u32) < sample_count {
            dts_values.push(current_dts);
            durations.push(last_duration);
            current_dts += last_duration as u64;
        }
        (dts_values, durations)
    }

    fn resolve_cts_offsets(&self, sample_count: u32) -> Vec<i32> {
        if self.ctts_entries.is_empty() {
            return vec![0; sample_count as usize];
        }

        let mut offsets = Vec::with_capacity(sample_count as usize);
        'outer: for (count, offset) in &self.ctts_entries {
            for _ in 0..*count {
                if offsets.len() as u32 >= sample_count {
                    break 'outer;
                }
                offsets.push(*offset);
            }
        }
        while (offsets.len() as u32) < sample_count {
            offsets.push(0);
        }
        offsets
    }
}
