//! Packet framing shared by every opcode.
//!
//! Every datagram starts with the two-byte marker `0x24 0x24` followed
//! by a one-byte opcode. Multi-byte integers are big-endian.
//!
//! ## FRAME packet (10 byte header + payload)
//!
//! ```text
//! marker:      [u8; 2]  0x24 0x24
//! opcode:      u8       20
//! frame_id:    u8       wraps at 256
//! format:      u8       10 = RAW888, 20 = JPEG, 30 = RGB565
//! index:       u16 BE
//! total:       u16 BE
//! size_code:   u8       <128: value * 32 bytes, >=128: literal length
//! payload:     [u8]     <= 1440
//! ```

use std::fmt;
use std::net::Ipv4Addr;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::NuvoError;

// ── Constants ────────────────────────────────────────────────────

/// Two-byte marker that opens every packet.
pub const MARKER: [u8; 2] = [0x24, 0x24];

/// Well-known UDP port shared by senders and modules.
pub const UDP_PORT: u16 = 2000;

/// Destination for all outbound traffic.
pub const BROADCAST_ADDR: Ipv4Addr = Ipv4Addr::BROADCAST;

/// Maximum fragment payload.
pub const FRAME_CHUNK: usize = 1440;

/// Size code for a full 1440-byte fragment.
pub const MAX_SIZE_CODE: u8 = (FRAME_CHUNK / 32) as u8;

/// Upper bound on fragments per frame accepted in strict mode.
pub const MAX_FRAGMENTS: u16 = 4096;

/// Receive buffer large enough for any protocol datagram.
pub const MAX_DATAGRAM: usize = 2048;

// ── Opcode ───────────────────────────────────────────────────────

/// Packet opcodes, the third byte of every datagram.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Module announcement.
    Register = 15,
    /// One fragment of a frame.
    Frame = 20,
    /// All fragments of a frame were sent.
    FrameFinish = 30,
    /// Commit: display the named frame.
    Sync = 100,
    /// Layout declaration.
    Config = 120,
    /// Gamma table, broadcast or targeted.
    Gamma = 127,
    /// Ask every module to announce itself.
    RegRequest = 130,
    /// Display enable and brightness.
    State = 140,
    /// Diagnostic highlight of one module.
    Marker = 160,
}

impl TryFrom<u8> for Opcode {
    type Error = NuvoError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            15 => Ok(Opcode::Register),
            20 => Ok(Opcode::Frame),
            30 => Ok(Opcode::FrameFinish),
            100 => Ok(Opcode::Sync),
            120 => Ok(Opcode::Config),
            127 => Ok(Opcode::Gamma),
            130 => Ok(Opcode::RegRequest),
            140 => Ok(Opcode::State),
            160 => Ok(Opcode::Marker),
            _ => Err(NuvoError::UnknownVariant {
                type_name: "Opcode",
                value: value as u64,
            }),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Opcode::Register => "REGISTER",
            Opcode::Frame => "FRAME",
            Opcode::FrameFinish => "FRAME_FINISH",
            Opcode::Sync => "SYNC",
            Opcode::Config => "CONFIG",
            Opcode::Gamma => "GAMMA",
            Opcode::RegRequest => "REG_REQUEST",
            Opcode::State => "STATE",
            Opcode::Marker => "MARKER",
        };
        f.write_str(name)
    }
}

// ── FormatType ───────────────────────────────────────────────────

/// Payload format carried in every FRAME packet.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatType {
    /// 3 bytes per pixel, byte order per configuration.
    Raw888 = 10,
    /// Embedded JPEG still.
    Jpeg = 20,
    /// Reserved; never decoded.
    Rgb565 = 30,
}

impl TryFrom<u8> for FormatType {
    type Error = NuvoError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            10 => Ok(FormatType::Raw888),
            20 => Ok(FormatType::Jpeg),
            30 => Ok(FormatType::Rgb565),
            _ => Err(NuvoError::UnknownVariant {
                type_name: "FormatType",
                value: value as u64,
            }),
        }
    }
}

// ── Size code ────────────────────────────────────────────────────

/// Decode a fragment size code into a byte count.
///
/// Codes below 128 count 32-byte units; 128 and above are literal.
pub fn size_code_to_len(code: u8) -> usize {
    if code >= 128 {
        code as usize
    } else {
        code as usize * 32
    }
}

/// Unit-form size code for a payload of `len` bytes, clamped to `1..=45`.
pub fn len_to_size_code(len: usize) -> u8 {
    len.div_ceil(32).clamp(1, MAX_SIZE_CODE as usize) as u8
}

/// Smallest multiple of 32 that is `>= n`, capped at [`FRAME_CHUNK`].
pub fn roundup32(n: usize) -> usize {
    (n.div_ceil(32) * 32).min(FRAME_CHUNK)
}

// ── PacketHeader ─────────────────────────────────────────────────

/// Marker plus opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Raw opcode; unknown values are kept so they can be dumped.
    pub opcode: u8,
}

impl PacketHeader {
    /// Encoded size on the wire.
    pub const SIZE: usize = 3;

    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode: opcode as u8,
        }
    }

    /// Serialize to bytes.
    pub fn encode(&self) -> [u8; Self::SIZE] {
        [MARKER[0], MARKER[1], self.opcode]
    }

    /// Parse the header of a datagram.
    pub fn decode(data: &[u8]) -> Result<Self, NuvoError> {
        if data.len() < Self::SIZE {
            return Err(NuvoError::truncated(Self::SIZE, data.len()));
        }
        if data[..2] != MARKER {
            return Err(NuvoError::InvalidMarker);
        }
        Ok(Self { opcode: data[2] })
    }

    /// Typed opcode, if known.
    pub fn kind(&self) -> Result<Opcode, NuvoError> {
        Opcode::try_from(self.opcode)
    }
}

// ── FragmentHeader ───────────────────────────────────────────────

/// Header of a FRAME packet (see module docs for the layout).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    pub frame_id: u8,
    pub format: u8,
    pub index: u16,
    pub total: u16,
    pub size_code: u8,
}

impl FragmentHeader {
    /// Encoded size on the wire, packet header included.
    pub const SIZE: usize = 10;

    /// Serialize to bytes.
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[..3].copy_from_slice(&PacketHeader::new(Opcode::Frame).encode());
        buf[3] = self.frame_id;
        buf[4] = self.format;
        buf[5..7].copy_from_slice(&self.index.to_be_bytes());
        buf[7..9].copy_from_slice(&self.total.to_be_bytes());
        buf[9] = self.size_code;
        buf
    }

    /// Deserialize from a full FRAME datagram.
    pub fn decode(data: &[u8]) -> Result<Self, NuvoError> {
        if data.len() < Self::SIZE {
            return Err(NuvoError::truncated(Self::SIZE, data.len()));
        }
        Ok(Self {
            frame_id: data[3],
            format: data[4],
            index: u16::from_be_bytes([data[5], data[6]]),
            total: u16::from_be_bytes([data[7], data[8]]),
            size_code: data[9],
        })
    }

    /// Byte count claimed by the size code.
    pub fn claimed_len(&self) -> usize {
        size_code_to_len(self.size_code)
    }

    pub fn is_last(&self) -> bool {
        self.index.wrapping_add(1) == self.total
    }
}

/// Build a FRAME datagram.
pub fn encode_fragment(header: &FragmentHeader, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(FragmentHeader::SIZE + payload.len());
    buf.put_slice(&header.encode());
    buf.put_slice(payload);
    buf.freeze()
}

// ── Short packets ────────────────────────────────────────────────

/// SYNC naming `frame_id`.
pub fn encode_sync(frame_id: u8) -> [u8; 4] {
    [MARKER[0], MARKER[1], Opcode::Sync as u8, frame_id]
}

/// FRAME_FINISH naming `frame_id`.
pub fn encode_frame_finish(frame_id: u8) -> [u8; 4] {
    [MARKER[0], MARKER[1], Opcode::FrameFinish as u8, frame_id]
}

pub fn encode_reg_request() -> [u8; 5] {
    [MARKER[0], MARKER[1], Opcode::RegRequest as u8, 0, 0]
}

/// STATE with display-enabled flag and brightness percentage.
pub fn encode_state(enabled: bool, brightness: u8) -> [u8; 5] {
    [
        MARKER[0],
        MARKER[1],
        Opcode::State as u8,
        enabled as u8,
        brightness,
    ]
}

/// Frame id carried by SYNC and FRAME_FINISH packets.
pub fn decode_frame_ref(data: &[u8]) -> Result<u8, NuvoError> {
    data.get(3).copied().ok_or(NuvoError::truncated(4, data.len()))
}

/// Body of a packet after the marker and opcode.
pub fn body(data: &[u8]) -> &[u8] {
    data.get(PacketHeader::SIZE..).unwrap_or(&[])
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_code_unit_and_literal_forms() {
        assert_eq!(size_code_to_len(45), 1440);
        assert_eq!(size_code_to_len(1), 32);
        assert_eq!(size_code_to_len(200), 200);
        assert_eq!(size_code_to_len(128), 128);
        assert_eq!(size_code_to_len(0), 0);
    }

    #[test]
    fn unit_code_covers_roundup32() {
        for len in 1..=FRAME_CHUNK {
            assert_eq!(size_code_to_len(len_to_size_code(len)), roundup32(len), "len {len}");
        }
    }

    #[test]
    fn roundup32_caps_at_chunk() {
        assert_eq!(roundup32(0), 0);
        assert_eq!(roundup32(1), 32);
        assert_eq!(roundup32(32), 32);
        assert_eq!(roundup32(33), 64);
        assert_eq!(roundup32(1439), 1440);
        assert_eq!(roundup32(5000), 1440);
    }

    #[test]
    fn size_code_clamps() {
        assert_eq!(len_to_size_code(0), 1);
        assert_eq!(len_to_size_code(9999), 45);
    }

    #[test]
    fn opcode_try_from() {
        assert_eq!(Opcode::try_from(100).unwrap(), Opcode::Sync);
        assert_eq!(Opcode::try_from(160).unwrap(), Opcode::Marker);
        assert!(Opcode::try_from(99).is_err());
        assert_eq!(FormatType::try_from(20).unwrap(), FormatType::Jpeg);
        assert!(FormatType::try_from(11).is_err());
    }

    #[test]
    fn packet_header_rejects_bad_marker() {
        assert!(matches!(
            PacketHeader::decode(&[0x24, 0x25, 20]),
            Err(NuvoError::InvalidMarker)
        ));
        assert!(matches!(
            PacketHeader::decode(&[0x24]),
            Err(NuvoError::Truncated { .. })
        ));
        let h = PacketHeader::decode(&encode_sync(7)).unwrap();
        assert_eq!(h.kind().unwrap(), Opcode::Sync);
    }

    #[test]
    fn fragment_header_layout() {
        let hdr = FragmentHeader {
            frame_id: 9,
            format: FormatType::Raw888 as u8,
            index: 0x0102,
            total: 0x0304,
            size_code: 45,
        };
        let bytes = hdr.encode();
        assert_eq!(bytes, [0x24, 0x24, 20, 9, 10, 1, 2, 3, 4, 45]);
        assert_eq!(FragmentHeader::decode(&bytes).unwrap(), hdr);
        assert_eq!(hdr.claimed_len(), 1440);
        assert!(!hdr.is_last());
    }

    #[test]
    fn short_packets() {
        assert_eq!(encode_frame_finish(3), [0x24, 0x24, 30, 3]);
        assert_eq!(encode_reg_request(), [0x24, 0x24, 130, 0, 0]);
        assert_eq!(encode_state(true, 100), [0x24, 0x24, 140, 1, 100]);
        assert_eq!(decode_frame_ref(&encode_sync(255)).unwrap(), 255);
        assert!(decode_frame_ref(&[0x24, 0x24, 100]).is_err());
        assert!(body(&[0x24]).is_empty());
    }
}
