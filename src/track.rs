//! Track descriptors and media samples delivered to the sink.

/// Handler kind of a track, from the hdlr box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
    Other([u8; 4]),
}

impl TrackKind {
    pub fn from_handler(bytes: [u8; 4]) -> Self {
        match &bytes {
            b"vide" => Self::Video,
            b"soun" => Self::Audio,
            _ => Self::Other(bytes),
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Self::Video)
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, Self::Audio)
    }
}

/// Codec family derived from the sample entry fourcc (the original format
/// fourcc for protected entries).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    H264,
    H265,
    Av1,
    Aac,
    Unknown([u8; 4]),
}

impl Codec {
    pub fn from_fourcc(fourcc: [u8; 4]) -> Self {
        match &fourcc {
            b"avc1" | b"avc3" => Self::H264,
            b"hvc1" | b"hev1" => Self::H265,
            b"av01" => Self::Av1,
            b"mp4a" => Self::Aac,
            _ => Self::Unknown(fourcc),
        }
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::H264 => write!(f, "h264"),
            Self::H265 => write!(f, "h265"),
            Self::Av1 => write!(f, "av1"),
            Self::Aac => write!(f, "aac"),
            Self::Unknown(fourcc) => {
                write!(f, "{}", std::str::from_utf8(fourcc).unwrap_or("????"))
            }
        }
    }
}

/// Protection signalling for a track (sinf/schm/tenc).
#[derive(Debug, Clone)]
pub struct ProtectionInfo {
    /// Protection scheme fourcc (e.g. `cenc`).
    pub scheme: [u8; 4],
    /// Original (unprotected) sample entry fourcc, from frma.
    pub original_format: [u8; 4],
    /// Default per-sample IV size in bytes (8 or 16 for CTR schemes).
    pub default_iv_size: u8,
    /// Default key id all samples use unless overridden.
    pub default_key_id: [u8; 16],
}

/// Immutable description of one track, delivered once per initialization.
#[derive(Debug, Clone)]
pub struct TrackInfo {
    /// Track ID.
    pub track_id: u32,
    /// Handler kind (video/audio/other).
    pub kind: TrackKind,
    /// Codec family.
    pub codec: Codec,
    /// Media timescale (ticks per second for this track).
    pub timescale: u32,
    /// Track duration in media timescale, when declared.
    pub duration: u64,
    /// Coded frame width (video tracks).
    pub width: Option<u32>,
    /// Coded frame height (video tracks).
    pub height: Option<u32>,
    /// Pixel aspect ratio numerator (video tracks, 1 when square).
    pub pixel_width: u32,
    /// Pixel aspect ratio denominator (video tracks, 1 when square).
    pub pixel_height: u32,
    /// Sample rate (audio tracks).
    pub sample_rate: Option<u32>,
    /// Channel count (audio tracks).
    pub channels: Option<u16>,
    /// Codec configuration record (avcC, hvcC, av1C, esds payload).
    pub codec_config: Option<Vec<u8>>,
    /// Protection signalling, when the track is encrypted.
    pub protection: Option<ProtectionInfo>,
    /// Concatenated protection-system initialization boxes (pssh), verbatim.
    pub eme_init_data: Vec<u8>,
}

impl TrackInfo {
    /// Whether the track carries protected samples.
    pub fn is_encrypted(&self) -> bool {
        self.protection.is_some()
    }

    /// Get duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.timescale == 0 {
            0.0
        } else {
            self.duration as f64 / self.timescale as f64
        }
    }
}

/// One media unit (video frame / audio frame) delivered to the sink.
///
/// Timestamps are in the owning track's timescale. Protected payloads are
/// delivered decrypted.
#[derive(Debug, Clone)]
pub struct MediaSample {
    /// Sample payload.
    pub data: Vec<u8>,
    /// Decode timestamp.
    pub dts: u64,
    /// Presentation timestamp.
    pub pts: u64,
    /// Sample duration in timescale ticks.
    pub duration: u32,
    /// Whether this sample is a sync sample (keyframe).
    pub is_keyframe: bool,
}
