//! ISO-BMFF box headers and scanning primitives.
//!
//! A box starts with a 32-bit big-endian size and a four-character type.
//! A size of 1 switches to a 64-bit extended size following the type; a
//! size of 0 means the box extends to the end of the enclosing window.
//! `uuid` boxes carry a 16-byte user type after the size fields.

use crate::error::{Error, Result};

/// Sanity ceiling for a single declared box size. Anything larger is
/// treated as a corrupt stream rather than buffered.
pub const MAX_BOX_SIZE: u64 = 256 * 1024 * 1024;

/// Four-character box type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AtomType(pub [u8; 4]);

impl AtomType {
    pub const FTYP: Self = Self(*b"ftyp");
    pub const STYP: Self = Self(*b"styp");
    pub const MOOV: Self = Self(*b"moov");
    pub const MOOF: Self = Self(*b"moof");
    pub const MDAT: Self = Self(*b"mdat");
    pub const FREE: Self = Self(*b"free");
    pub const SKIP: Self = Self(*b"skip");
    pub const SIDX: Self = Self(*b"sidx");
    pub const SSIX: Self = Self(*b"ssix");
    pub const PRFT: Self = Self(*b"prft");
    pub const UUID: Self = Self(*b"uuid");

    pub const MVHD: Self = Self(*b"mvhd");
    pub const TRAK: Self = Self(*b"trak");
    pub const TKHD: Self = Self(*b"tkhd");
    pub const EDTS: Self = Self(*b"edts");
    pub const MDIA: Self = Self(*b"mdia");
    pub const MDHD: Self = Self(*b"mdhd");
    pub const HDLR: Self = Self(*b"hdlr");
    pub const MINF: Self = Self(*b"minf");
    pub const STBL: Self = Self(*b"stbl");
    pub const STSD: Self = Self(*b"stsd");
    pub const STTS: Self = Self(*b"stts");
    pub const CTTS: Self = Self(*b"ctts");
    pub const STSS: Self = Self(*b"stss");
    pub const STSC: Self = Self(*b"stsc");
    pub const STSZ: Self = Self(*b"stsz");
    pub const STCO: Self = Self(*b"stco");
    pub const CO64: Self = Self(*b"co64");
    pub const UDTA: Self = Self(*b"udta");

    pub const MVEX: Self = Self(*b"mvex");
    pub const MEHD: Self = Self(*b"mehd");
    pub const TREX: Self = Self(*b"trex");
    pub const MFHD: Self = Self(*b"mfhd");
    pub const TRAF: Self = Self(*b"traf");
    pub const TFHD: Self = Self(*b"tfhd");
    pub const TFDT: Self = Self(*b"tfdt");
    pub const TRUN: Self = Self(*b"trun");

    pub const PSSH: Self = Self(*b"pssh");
    pub const SENC: Self = Self(*b"senc");
    pub const SAIZ: Self = Self(*b"saiz");
    pub const SAIO: Self = Self(*b"saio");
    pub const SINF: Self = Self(*b"sinf");
    pub const FRMA: Self = Self(*b"frma");
    pub const SCHM: Self = Self(*b"schm");
    pub const SCHI: Self = Self(*b"schi");
    pub const TENC: Self = Self(*b"tenc");

    pub const AVC1: Self = Self(*b"avc1");
    pub const AVC3: Self = Self(*b"avc3");
    pub const HVC1: Self = Self(*b"hvc1");
    pub const HEV1: Self = Self(*b"hev1");
    pub const AV01: Self = Self(*b"av01");
    pub const MP4A: Self = Self(*b"mp4a");
    pub const ENCV: Self = Self(*b"encv");
    pub const ENCA: Self = Self(*b"enca");
    pub const AVCC: Self = Self(*b"avcC");
    pub const HVCC: Self = Self(*b"hvcC");
    pub const AV1C: Self = Self(*b"av1C");
    pub const ESDS: Self = Self(*b"esds");
    pub const PASP: Self = Self(*b"pasp");

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Get the 4-char code as a string.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl std::fmt::Display for AtomType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parsed box header.
#[derive(Debug, Clone)]
pub struct Atom {
    /// Box type code.
    pub atom_type: AtomType,
    /// Total box size including header.
    pub size: u64,
    /// Size of the header (8, 16, 24, or 32 bytes).
    pub header_size: u8,
    /// Offset of the payload within the scanned window.
    pub data_offset: usize,
    /// Declared with size 0 (extends to the end of the enclosing window).
    pub extends_to_end: bool,
}

impl Atom {
    /// Get the payload size (size - header).
    pub fn data_size(&self) -> u64 {
        self.size.saturating_sub(self.header_size as u64)
    }

    /// Offset one past the last payload byte within the scanned window.
    pub fn end(&self) -> usize {
        self.data_offset + self.data_size() as usize
    }
}

/// Scan one box header at `window[pos..]`.
///
/// Returns `Ok(None)` when the window does not yet hold the complete box
/// (header or payload); callers append more data and retry. Malformed
/// headers and oversized declarations are hard errors.
pub fn read_atom(window: &[u8], pos: usize) -> Result<Option<Atom>> {
    let avail = window.len().saturating_sub(pos);
    if avail < 8 {
        return Ok(None);
    }

    let size32 = u32::from_be_bytes([window[pos], window[pos + 1], window[pos + 2], window[pos + 3]]);
    let atom_type = AtomType([window[pos + 4], window[pos + 5], window[pos + 6], window[pos + 7]]);
    let mut header_size: usize = 8;

    let mut extends_to_end = false;
    let size = match size32 {
        0 => {
            extends_to_end = true;
            avail as u64
        }
        1 => {
            if avail < 16 {
                return Ok(None);
            }
            header_size = 16;
            u64::from_be_bytes([
                window[pos + 8],
                window[pos + 9],
                window[pos + 10],
                window[pos + 11],
                window[pos + 12],
                window[pos + 13],
                window[pos + 14],
                window[pos + 15],
            ])
        }
        n => n as u64,
    };

    if atom_type == AtomType::UUID {
        // The 16-byte user type counts as header; payload follows it.
        header_size += 16;
        if avail < header_size {
            return Ok(None);
        }
    }

    if size < header_size as u64 {
        return Err(Error::InvalidBox(format!(
            "box '{}' declares {} bytes, smaller than its {}-byte header",
            atom_type, size, header_size
        )));
    }
    if size > MAX_BOX_SIZE {
        return Err(Error::BoxTooLarge {
            atom: atom_type.as_str().to_string(),
            size,
            max: MAX_BOX_SIZE,
        });
    }
    if (avail as u64) < size {
        return Ok(None);
    }

    Ok(Some(Atom {
        atom_type,
        size,
        header_size: header_size as u8,
        data_offset: pos + header_size,
        extends_to_end,
    }))
}

/// Iterator over the child boxes of a fully buffered container payload.
///
/// Yields `(header, payload)` pairs; a child that does not fit inside the
/// window is a hard error since the parent is complete.
pub struct AtomIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> AtomIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl<'a> Iterator for AtomIter<'a> {
    type Item = Result<(Atom, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }
        match read_atom(self.data, self.pos) {
            Ok(Some(atom)) => {
                let payload = &self.data[atom.data_offset..atom.end()];
                self.pos += atom.size as usize;
                Some(Ok((atom, payload)))
            }
            Ok(None) => {
                self.pos = self.data.len();
                Some(Err(Error::invalid_box("truncated child box in container")))
            }
            Err(e) => {
                self.pos = self.data.len();
                Some(Err(e))
            }
        }
    }
}

/// Bounds-checked big-endian reader over a box payload.
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::InvalidBox(format!(
                "payload truncated: need {} bytes, have {}",
                n,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn i32(&mut self) -> Result<i32> {
        Ok(self.u32()? as i32)
    }

    pub fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn fourcc(&mut self) -> Result<[u8; 4]> {
        let b = self.take(4)?;
        Ok([b[0], b[1], b[2], b[3]])
    }

    /// Read a full-box version/flags word, returning (version, flags).
    pub fn version_flags(&mut self) -> Result<(u8, u32)> {
        let word = self.u32()?;
        Ok(((word >> 24) as u8, word & 0x00ff_ffff))
    }
}
