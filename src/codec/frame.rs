//! Data stream headers that follow a `Data`-typed [`super::PacketHead`]:
//! `VideoDataStream` and `AudioDataStream` (§6).

use byteorder::{BigEndian, WriteBytesExt};
use std::io::{self, Write};

/// `u32 frame_number | u16 width | u16 height | u8 channel | 3 bytes padding`
pub struct VideoDataStreamHead {
    pub frame_number: u32,
    pub width: u16,
    pub height: u16,
    pub channel: u8,
}

impl VideoDataStreamHead {
    pub const WIRE_SIZE: usize = 4 + 2 + 2 + 1 + 3;

    pub fn write(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_u32::<BigEndian>(self.frame_number)?;
        w.write_u16::<BigEndian>(self.width)?;
        w.write_u16::<BigEndian>(self.height)?;
        w.write_u8(self.channel)?;
        w.write_all(&[0u8; 3])
    }
}

/// `u32 page_count | 4096 bytes raw PCM page`. The header itself is a
/// fixed 12 bytes: the `page_count` field plus zero padding, matching the
/// wire contract of §6.
pub struct AudioDataStreamHead {
    pub page_count: u32,
}

impl AudioDataStreamHead {
    pub const PAGE_SIZE: usize = 4096;
    pub const WIRE_SIZE: usize = 12;

    pub fn write(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_u32::<BigEndian>(self.page_count)?;
        w.write_all(&[0u8; Self::WIRE_SIZE - 4])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_head_encodes_to_twelve_bytes() {
        let head = VideoDataStreamHead {
            frame_number: 7,
            width: 640,
            height: 480,
            channel: 1,
        };
        let mut buf = Vec::new();
        head.write(&mut buf).unwrap();
        assert_eq!(buf.len(), VideoDataStreamHead::WIRE_SIZE);
        assert_eq!(&buf[0..4], &[0, 0, 0, 7]);
        assert_eq!(&buf[4..6], &[0x02, 0x80]);
        assert_eq!(&buf[6..8], &[0x01, 0xE0]);
        assert_eq!(buf[8], 1);
        assert_eq!(&buf[9..12], &[0, 0, 0]);
    }

    #[test]
    fn audio_head_encodes_to_twelve_bytes_with_padding() {
        let head = AudioDataStreamHead { page_count: 20 };
        let mut buf = Vec::new();
        head.write(&mut buf).unwrap();
        assert_eq!(buf.len(), AudioDataStreamHead::WIRE_SIZE);
        assert_eq!(&buf[0..4], &[0, 0, 0, 20]);
        assert!(buf[4..].iter().all(|&b| b == 0));
    }
}
