//! SLIP framing for the orientation sensor's serial link (RFC 1055).
//!
//! Every packet on the wire is one type byte followed by four big-endian
//! 32-bit words, byte-stuffed so that `END` only ever appears as a frame
//! terminator. Only orientation (quaternion) packets are consumed; everything
//! else is recognised and dropped.

use heapless::Vec;
use static_assertions::const_assert_eq;
use thiserror::Error;
use tracing::trace;

pub const END: u8 = 0xC0;
pub const ESC: u8 = 0xDB;
pub const ESC_END: u8 = 0xDC;
pub const ESC_ESC: u8 = 0xDD;

pub const PACKET_WORDS: usize = 4;
pub const PACKET_SIZE: usize = 1 + PACKET_WORDS * 4;

const_assert_eq!(PACKET_SIZE, 17);

/// One unescaped frame, at most a packet long.
pub type Frame = Vec<u8, PACKET_SIZE>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Orientation = 0,
    Accel = 1,
    Gyro = 2,
    Mag = 3,
    Color = 4,
    Blink = 5,
}

impl TryFrom<u8> for PacketType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PacketType::Orientation),
            1 => Ok(PacketType::Accel),
            2 => Ok(PacketType::Gyro),
            3 => Ok(PacketType::Mag),
            4 => Ok(PacketType::Color),
            5 => Ok(PacketType::Blink),
            other => Err(DecodeError::UnknownType(other)),
        }
    }
}

/// Unit quaternion as sent by the sensor, `w` first.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Quaternion(pub [f32; 4]);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Packet {
    Orientation(Quaternion),
    Accel([f32; 3]),
    Gyro([f32; 3]),
    Mag([f32; 3]),
    Color([u8; 4]),
    Blink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("frame length {0} does not match packet size 17")]
    Length(usize),
    #[error("unknown packet type {0}")]
    UnknownType(u8),
    #[error("packet type {0:?} is not consumed")]
    Unsupported(PacketType),
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Orientation(_) => PacketType::Orientation,
            Packet::Accel(_) => PacketType::Accel,
            Packet::Gyro(_) => PacketType::Gyro,
            Packet::Mag(_) => PacketType::Mag,
            Packet::Color(_) => PacketType::Color,
            Packet::Blink => PacketType::Blink,
        }
    }

    /// Parse an unescaped frame. Only orientation packets are accepted.
    pub fn parse(frame: &[u8]) -> Result<Packet, DecodeError> {
        if frame.len() != PACKET_SIZE {
            return Err(DecodeError::Length(frame.len()));
        }

        let packet_type = PacketType::try_from(frame[0])?;
        if packet_type != PacketType::Orientation {
            return Err(DecodeError::Unsupported(packet_type));
        }

        let mut quat = [0f32; PACKET_WORDS];
        for (i, value) in quat.iter_mut().enumerate() {
            let start = 1 + i * 4;
            let word = u32::from_be_bytes([
                frame[start],
                frame[start + 1],
                frame[start + 2],
                frame[start + 3],
            ]);
            *value = f32::from_bits(word);
        }

        Ok(Packet::Orientation(Quaternion(quat)))
    }

    /// Lay the packet out as an unescaped frame: type byte plus four
    /// big-endian words, unused words zeroed.
    pub fn to_frame(&self) -> Frame {
        let mut words = [0u32; PACKET_WORDS];
        match self {
            Packet::Orientation(Quaternion(q)) => {
                for (word, value) in words.iter_mut().zip(q) {
                    *word = value.to_bits();
                }
            }
            Packet::Accel(v) | Packet::Gyro(v) | Packet::Mag(v) => {
                for (word, value) in words.iter_mut().zip(v) {
                    *word = value.to_bits();
                }
            }
            Packet::Color(rgba) => words[0] = u32::from_be_bytes(*rgba),
            Packet::Blink => {}
        }

        let mut frame = Frame::new();
        // Capacity is exactly PACKET_SIZE, so none of these pushes can fail
        let _ = frame.push(self.packet_type() as u8);
        for word in words {
            let _ = frame.extend_from_slice(&word.to_be_bytes());
        }
        frame
    }
}

/// Incremental SLIP decoder. Feed it bytes in any chunking; it hands back a
/// frame each time a terminator closes one.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Frame,
    escaping: bool,
    overflows: u32,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the state machine by one byte. Returns the accumulated frame
    /// when `byte` is `END`.
    pub fn next_frame(&mut self, byte: u8) -> Option<Frame> {
        let completed = match byte {
            END => Some(core::mem::take(&mut self.buffer)),
            ESC => {
                self.escaping = true;
                None
            }
            ESC_END => {
                self.store(if self.escaping { END } else { ESC_END });
                None
            }
            ESC_ESC => {
                self.store(if self.escaping { ESC } else { ESC_ESC });
                None
            }
            other => {
                self.store(other);
                None
            }
        };

        if byte != ESC {
            self.escaping = false;
        }

        completed
    }

    /// Advance by one byte and parse any completed frame into a packet.
    /// Malformed or unconsumed frames are dropped.
    pub fn push(&mut self, byte: u8) -> Option<Packet> {
        let frame = self.next_frame(byte)?;
        match Packet::parse(&frame) {
            Ok(packet) => Some(packet),
            Err(e) => {
                if !frame.is_empty() {
                    trace!("dropping frame: {}", e);
                }
                None
            }
        }
    }

    /// Decode a chunk, calling `on_packet` for every packet it completes.
    pub fn decode(&mut self, bytes: &[u8], mut on_packet: impl FnMut(Packet)) {
        for &byte in bytes {
            if let Some(packet) = self.push(byte) {
                on_packet(packet);
            }
        }
    }

    /// Number of times the buffer overflowed and was reset.
    pub fn overflows(&self) -> u32 {
        self.overflows
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn store(&mut self, byte: u8) {
        if self.buffer.push(byte).is_err() {
            // No packet is longer than the buffer, so this one is garbage
            self.buffer.clear();
            self.overflows = self.overflows.wrapping_add(1);
        }
    }
}

/// Byte-stuff `frame` and terminate it with `END`, appending to `out`.
pub fn encode(frame: &[u8], out: &mut alloc::vec::Vec<u8>) {
    out.reserve(frame.len() + 2);
    for &byte in frame {
        match byte {
            END => out.extend_from_slice(&[ESC, ESC_END]),
            ESC => out.extend_from_slice(&[ESC, ESC_ESC]),
            other => out.push(other),
        }
    }
    out.push(END);
}

/// Encode a packet as a complete SLIP frame, with a leading `END` to flush
/// any line noise the receiver may be holding.
pub fn encode_packet(packet: &Packet) -> alloc::vec::Vec<u8> {
    let mut out = alloc::vec![END];
    encode(&packet.to_frame(), &mut out);
    out
}
