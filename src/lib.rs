//! fragbox: streaming ISO-BMFF (MP4/fMP4) demuxing with CENC decryption
//!
//! This crate turns an incrementally arriving MP4 byte stream into track
//! descriptors and media samples, without ever seeing the whole file.
//!
//! # Modules
//!
//! - `atoms` - box headers, fourcc codes, window scanning
//! - `buffer` - growing byte queue with a consumed watermark
//! - `moov` - movie metadata into track descriptors
//! - `sample_table` - stts/stsc/stsz/stco flattening (non-fragmented files)
//! - `fragment` - moof/trun decoding and senc/saiz/saio normalization
//! - `cenc` - AES-128-CTR subsample decryption behind a key source
//! - `demuxer` - the push-parser facade tying it all together
//!
//! # Usage
//!
//! Implement [`StreamSink`] for whatever consumes the output, feed bytes
//! with [`Mp4Demuxer::append`] in chunks of any size, and receive one
//! `on_init` per initialization segment plus one `on_sample` per media
//! unit. [`Mp4Demuxer::flush`] discards partial data so appending can
//! resume at a later box boundary; [`Mp4Demuxer::load_init`] pre-loads
//! metadata from a seekable source when the moov trails the media data.
//!
//! For protected content, construct with [`Mp4Demuxer::with_key_source`];
//! samples are decrypted before delivery. Without a key source, protected
//! samples are withheld and the descriptors still expose the stream's
//! protection-system data so keys can be acquired out of band.

pub mod atoms;
pub mod buffer;
pub mod cenc;
pub mod demuxer;
pub mod dimensions;
pub mod error;
mod fragment;
mod moov;
pub mod sample_table;
pub mod track;

pub use cenc::KeySource;
pub use demuxer::{Mp4Demuxer, ParserState, StreamSink};
pub use dimensions::{DimensionSource, NoDimensionSource};
pub use error::{Error, Result};
pub use sample_table::{SampleEntry, SampleTable};
pub use track::{Codec, MediaSample, ProtectionInfo, TrackInfo, TrackKind};
