//! Wire codec: packet header encode/decode with big-endian integer
//! discipline. Oblivious to what a payload means; it only enforces the
//! framing contract (§4.1 of the design spec).

mod frame;

pub use frame::{AudioDataStreamHead, VideoDataStreamHead};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};
use std::result;
use thiserror::Error;

/// Fixed size of a [`PacketHead`] on the wire, not counting payload.
pub const HEADER_SIZE: usize = 8;

pub type Result<T> = result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("connection closed")]
    Eof,
    #[error("short read while parsing header")]
    ShortRead,
    #[error("payload length {length} exceeds buffer capacity {max}")]
    PayloadTooLarge { length: u32, max: usize },
    #[error("unsupported main type {0}")]
    BadMainType(u16),
    #[error("message type {0} out of range")]
    MessageTypeOutOfRange(u16),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MainType {
    Request = 0,
    Response = 1,
    Data = 2,
}

impl MainType {
    fn from_u16(v: u16) -> Option<MainType> {
        match v {
            0 => Some(MainType::Request),
            1 => Some(MainType::Response),
            2 => Some(MainType::Data),
            _ => None,
        }
    }
}

/// The nine request/response/data message kinds, position-indexed to
/// match the wire contract (§4.1). Index order is the numeric contract,
/// not an implementation detail.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MessageType {
    Reset = 0,
    GetVersion = 1,
    ConfigVideoStream = 2,
    ConfigShrinkVideoStream = 3,
    DumpVideoFrame = 4,
    DumpRealtimeVideoFrame = 5,
    StopDumpVideo = 6,
    DumpRealtimeAudioPage = 7,
    StopDumpAudio = 8,
}

impl MessageType {
    pub const COUNT: u16 = 9;

    pub fn from_u16(v: u16) -> result::Result<MessageType, Error> {
        use MessageType::*;
        Ok(match v {
            0 => Reset,
            1 => GetVersion,
            2 => ConfigVideoStream,
            3 => ConfigShrinkVideoStream,
            4 => DumpVideoFrame,
            5 => DumpRealtimeVideoFrame,
            6 => StopDumpVideo,
            7 => DumpRealtimeAudioPage,
            8 => StopDumpAudio,
            _ => return Err(Error::MessageTypeOutOfRange(v)),
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    Ok = 0,
    UnsupportedCommand = 1,
    Argument = 2,
    RealtimeStreamExists = 3,
    VideoMemoryOverflowStop = 4,
    VideoMemoryOverflowDrop = 5,
    AudioMemoryOverflowStop = 6,
    AudioMemoryOverflowDrop = 7,
    MemoryAllocFail = 8,
}

/// `{ type: u16, error_code: u16, length: u32 }` plus its `length`-byte
/// payload, all multi-byte fields network byte order.
#[derive(Clone, Debug)]
pub struct PacketHead {
    pub main_type: MainType,
    pub message_type: u16,
    pub error_code: u16,
    pub payload: Vec<u8>,
}

impl PacketHead {
    fn wire_type(&self) -> u16 {
        ((self.main_type as u16) << 8) | self.message_type
    }

    /// Reads one complete request packet from `r`. Enforces only the
    /// framing contract: `length <= max_payload`.
    pub fn read_request(r: &mut impl Read, max_payload: usize) -> Result<PacketHead> {
        let wire_type = match r.read_u16::<BigEndian>() {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(Error::Eof),
            Err(e) => return Err(Error::Io(e)),
        };
        let error_code = r.read_u16::<BigEndian>().map_err(|_| Error::ShortRead)?;
        let length = r.read_u32::<BigEndian>().map_err(|_| Error::ShortRead)?;

        if length as usize > max_payload {
            return Err(Error::PayloadTooLarge {
                length,
                max: max_payload,
            });
        }

        let main_type_bits = wire_type >> 8;
        let message_type = wire_type & 0x00ff;
        let main_type =
            MainType::from_u16(main_type_bits).ok_or(Error::BadMainType(main_type_bits))?;
        if main_type != MainType::Request {
            return Err(Error::BadMainType(main_type_bits));
        }
        if message_type >= MessageType::COUNT {
            return Err(Error::MessageTypeOutOfRange(message_type));
        }

        let mut payload = vec![0u8; length as usize];
        r.read_exact(&mut payload).map_err(|_| Error::ShortRead)?;

        Ok(PacketHead {
            main_type,
            message_type,
            error_code,
            payload,
        })
    }

    pub fn response(message_type: u16, error_code: ErrorCode, payload: Vec<u8>) -> PacketHead {
        PacketHead {
            main_type: MainType::Response,
            message_type,
            error_code: error_code as u16,
            payload,
        }
    }

    pub fn response_text(message_type: u16, error_code: ErrorCode, text: &str) -> PacketHead {
        PacketHead::response(message_type, error_code, text.as_bytes().to_vec())
    }

    pub fn data(message_type: u16, payload: Vec<u8>) -> PacketHead {
        PacketHead {
            main_type: MainType::Data,
            message_type,
            error_code: ErrorCode::Ok as u16,
            payload,
        }
    }

    /// Writes `self` to `w` as a complete packet (header + payload).
    pub fn write(&self, w: &mut impl Write) -> Result<()> {
        w.write_u16::<BigEndian>(self.wire_type())?;
        w.write_u16::<BigEndian>(self.error_code)?;
        w.write_u32::<BigEndian>(self.payload.len() as u32)?;
        w.write_all(&self.payload)?;
        Ok(())
    }

    /// Encodes just the 8-byte header, for tests that want to inspect it
    /// without a payload attached.
    pub fn encode_header(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        {
            let mut cursor = Cursor::new(&mut buf[..]);
            cursor.write_u16::<BigEndian>(self.wire_type()).unwrap();
            cursor.write_u16::<BigEndian>(self.error_code).unwrap();
            cursor
                .write_u32::<BigEndian>(self.payload.len() as u32)
                .unwrap();
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_header_is_exactly_eight_bytes_plus_payload() {
        let pkt = PacketHead::response_text(
            MessageType::DumpVideoFrame as u16,
            ErrorCode::Argument,
            "Frame number is 0",
        );
        let mut buf = Vec::new();
        pkt.write(&mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + "Frame number is 0".len());

        let decoded = PacketHead::read_request(
            &mut &*decoded_as_request_bytes(&pkt),
            4096,
        )
        .unwrap();
        assert_eq!(decoded.message_type, MessageType::DumpVideoFrame as u16);
        assert_eq!(decoded.payload, pkt.payload);
    }

    /// Helper: re-stamp a packet as a Request so `read_request` (which
    /// only accepts Request frames) can round-trip it in this test.
    fn decoded_as_request_bytes(pkt: &PacketHead) -> Vec<u8> {
        let as_request = PacketHead {
            main_type: MainType::Request,
            message_type: pkt.message_type,
            error_code: pkt.error_code,
            payload: pkt.payload.clone(),
        };
        let mut buf = Vec::new();
        as_request.write(&mut buf).unwrap();
        buf
    }

    #[test]
    fn get_version_response_matches_literal_scenario() {
        let pkt = PacketHead::response(
            MessageType::GetVersion as u16,
            ErrorCode::Ok,
            vec![0x01, 0x00],
        );
        let mut buf = Vec::new();
        pkt.write(&mut buf).unwrap();
        assert_eq!(
            buf,
            vec![0x01, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x01, 0x00]
        );
    }

    #[test]
    fn config_video_stream_request_parses_dimensions() {
        let bytes = [0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x04, 0x02, 0x80, 0x01, 0xE0];
        let pkt = PacketHead::read_request(&mut &bytes[..], 4096).unwrap();
        assert_eq!(pkt.message_type, MessageType::ConfigVideoStream as u16);
        assert_eq!(pkt.payload, vec![0x02, 0x80, 0x01, 0xE0]);
    }

    #[test]
    fn message_type_at_or_beyond_nine_is_rejected() {
        let bytes = [0x00, 0x09, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        let err = PacketHead::read_request(&mut &bytes[..], 4096).unwrap_err();
        matches!(err, Error::MessageTypeOutOfRange(9));
    }

    #[test]
    fn payload_longer_than_max_buffer_is_rejected() {
        let bytes = [0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00];
        let err = PacketHead::read_request(&mut &bytes[..], 16).unwrap_err();
        matches!(err, Error::PayloadTooLarge { .. });
    }

    #[test]
    fn response_main_type_is_rejected_as_a_request() {
        let bytes = [0x01, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        let err = PacketHead::read_request(&mut &bytes[..], 4096).unwrap_err();
        matches!(err, Error::BadMainType(1));
    }
}
