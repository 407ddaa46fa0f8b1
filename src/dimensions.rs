//! Pixel aspect resolution for video tracks.
//!
//! The pasp box wins when present. When it is absent, the codec
//! configuration record may still carry aspect information (e.g. H.264
//! VUI sample aspect ratio); a [`DimensionSource`] lets the caller plug
//! in a codec-config reader without this crate parsing bitstreams. When
//! neither yields a value the aspect defaults to square (1:1).

use crate::track::Codec;

/// Extracts pixel aspect information from codec configuration records.
pub trait DimensionSource {
    /// Pixel aspect ratio `(h_spacing, v_spacing)` carried by the codec
    /// configuration record, or `None` when the record has no aspect
    /// information.
    fn pixel_aspect(&self, codec: Codec, config: &[u8]) -> Option<(u32, u32)>;
}

/// Default source: codec configuration is never consulted.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDimensionSource;

impl DimensionSource for NoDimensionSource {
    fn pixel_aspect(&self, _codec: Codec, _config: &[u8]) -> Option<(u32, u32)> {
        None
    }
}

/// Resolve the final pixel aspect for a video track.
pub(crate) fn resolve_pixel_aspect(
    pasp: Option<(u32, u32)>,
    codec: Codec,
    config: Option<&[u8]>,
    source: &dyn DimensionSource,
) -> (u32, u32) {
    let from_config = || config.and_then(|c| source.pixel_aspect(codec, c));
    match pasp.or_else(from_config) {
        Some((0, _)) | Some((_, 0)) | None => (1, 1),
        Some(aspect) => aspect,
    }
}
