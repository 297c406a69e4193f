//! Per-connection Session State Machine (§4.2): owns capture configuration,
//! mapped buffers, the scratch dump buffer, and the current mode, and
//! dispatches incoming requests to handlers.
//!
//! Grounded on the teacher's `vm::vcpu` run-loop shape (one thread per
//! unit of concurrency, owning its resources outright) and its
//! `io::virtio::device` message-dispatch pattern (a tagged kind matched
//! exhaustively against a fixed handler table), generalized from "one
//! vcpu" to "one client connection".

mod handlers;
mod pacing;
mod shrink;

pub use pacing::RealtimeMode;

use crate::codec;
use crate::hal::{self, Channel, Hal};
use crate::mapper::{FrameBufferMapper, MappedRegion};
use crate::system::{self, FileDesc};
use crate::util::{info, warn};
use std::io;
use std::net::TcpStream;
use std::result;
use std::sync::Arc;
use thiserror::Error;

pub const DEFAULT_MAX_REQUEST_PAYLOAD: usize = 2048;

/// Non-fatal request-validation failures (§7): each carries the exact
/// response text named in §4 and maps to one wire `ErrorCode`. A `Fatal`
/// framing/I/O/allocation condition is never represented here — it is
/// carried directly as `io::Error` through `HandlerError::Fatal` and ends
/// the session.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Argument(String),
    #[error("Realtime stream already exists")]
    RealtimeStreamExists,
    #[error("{0}")]
    MemoryAllocFail(String),
}

impl Error {
    fn code(&self) -> codec::ErrorCode {
        match self {
            Error::Argument(_) => codec::ErrorCode::Argument,
            Error::RealtimeStreamExists => codec::ErrorCode::RealtimeStreamExists,
            Error::MemoryAllocFail(_) => codec::ErrorCode::MemoryAllocFail,
        }
    }
}

pub type Result<T> = result::Result<T, Error>;

/// What a handler can fail with: a business-rule rejection the dispatcher
/// answers with a response packet (session continues), or an I/O-level
/// condition that ends the session.
enum HandlerError {
    Business(Error),
    Fatal(io::Error),
}

impl From<Error> for HandlerError {
    fn from(e: Error) -> Self {
        HandlerError::Business(e)
    }
}

impl From<io::Error> for HandlerError {
    fn from(e: io::Error) -> Self {
        HandlerError::Fatal(e)
    }
}

type HandlerResult = result::Result<(), HandlerError>;

fn system_err_to_io(e: system::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e.to_string())
}

fn hal_err_to_io(e: hal::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e.to_string())
}

fn codec_err_to_io(e: codec::Error) -> io::Error {
    match e {
        codec::Error::Io(e) => e,
        other => io::Error::new(io::ErrorKind::Other, other.to_string()),
    }
}

fn page_align(n: usize) -> usize {
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    let page_size = if page_size <= 0 { 4096 } else { page_size as usize };
    (n + page_size - 1) / page_size * page_size
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    Idle,
    NonRealtime,
    RealtimeVideo,
    RealtimeAudio,
}

#[derive(Default)]
struct ChannelSlot {
    dump_address: u64,
    mapped: Option<MappedRegion>,
}

impl ChannelSlot {
    fn is_used(&self) -> bool {
        self.dump_address != 0
    }

    fn clear(&mut self) {
        self.dump_address = 0;
        self.mapped = None;
    }
}

pub struct Session {
    stream: TcpStream,
    peer: String,
    hal: Arc<Hal>,
    mem_device: Arc<FileDesc>,

    message_type: u16,
    mode: Mode,
    stop_dump: bool,

    screen_width: u16,
    screen_height: u16,
    shrink_width: u8,
    shrink_height: u8,
    is_shrink: bool,

    channels: [ChannelSlot; 2],
    is_dual: bool,
    dump_limit: u32,
    unit_aligned_size: usize,
    realtime_check_channel: Option<Channel>,
    realtime_mode: Option<RealtimeMode>,

    scratch: Option<Vec<u8>>,
    out_buf: Vec<u8>,
    emitted_count: u32,

    max_request_payload: usize,
}

impl Session {
    fn new(
        stream: TcpStream,
        peer: String,
        hal: Arc<Hal>,
        mem_device: Arc<FileDesc>,
        max_request_payload: usize,
    ) -> Session {
        Session {
            stream,
            peer,
            hal,
            mem_device,
            message_type: 0,
            mode: Mode::Idle,
            stop_dump: false,
            screen_width: 0,
            screen_height: 0,
            shrink_width: 0,
            shrink_height: 0,
            is_shrink: false,
            channels: Default::default(),
            is_dual: false,
            dump_limit: 0,
            unit_aligned_size: 0,
            realtime_check_channel: None,
            realtime_mode: None,
            scratch: None,
            out_buf: Vec::new(),
            emitted_count: 0,
            max_request_payload,
        }
    }

    fn reset_capture_state(&mut self) {
        self.screen_width = 0;
        self.screen_height = 0;
        self.shrink_width = 0;
        self.shrink_height = 0;
        self.is_shrink = false;
        self.channels[0].clear();
        self.channels[1].clear();
        self.is_dual = false;
        self.dump_limit = 0;
        self.unit_aligned_size = 0;
        self.realtime_check_channel = None;
        self.realtime_mode = None;
        self.scratch = None;
        self.emitted_count = 0;
        self.stop_dump = false;
    }

    fn send(&mut self, pkt: codec::PacketHead) -> io::Result<()> {
        pkt.write(&mut self.stream).map_err(codec_err_to_io)
    }

    fn send_ok(&mut self) -> io::Result<()> {
        self.send(codec::PacketHead::response(
            self.message_type,
            codec::ErrorCode::Ok,
            Vec::new(),
        ))
    }

    /// Allocates (or re-validates) the scratch dump buffer, per §4.3/§4.5's
    /// `MemoryAllocFail` path. Uses `try_reserve_exact` so an allocation
    /// failure surfaces as a business error rather than aborting the
    /// process.
    fn allocate_scratch(&mut self, size: usize) -> Result<()> {
        let mut buf: Vec<u8> = Vec::new();
        buf.try_reserve_exact(size)
            .map_err(|_| Error::MemoryAllocFail("Memory alloc fail".to_string()))?;
        buf.resize(size, 0);
        self.scratch = Some(buf);
        Ok(())
    }

    /// Maps `size` bytes of physical memory at `phys_addr` into `channels[idx]`.
    fn map_channel(&mut self, idx: usize, phys_addr: u64, size: usize) -> Result<()> {
        let mapper = FrameBufferMapper::new(&self.mem_device);
        let region = mapper
            .map(phys_addr, size)
            .map_err(|_| Error::Argument("Memory map fail".to_string()))?;
        self.channels[idx].dump_address = phys_addr;
        self.channels[idx].mapped = Some(region);
        Ok(())
    }

    /// Copies one raw `unit_aligned_size`-byte unit at linear/ring index
    /// `index` out of channel `idx`'s mapping and into the scratch buffer.
    fn capture_unit(&mut self, idx: usize, index: u64) -> io::Result<()> {
        let offset = index as usize * self.unit_aligned_size;
        let scratch = self.scratch.as_mut().expect("scratch allocated before capture");
        let region = self.channels[idx]
            .mapped
            .as_ref()
            .expect("channel mapped before capture");
        region
            .read_at(offset, scratch)
            .map_err(system_err_to_io)
    }

    /// Applies the shrink transform (§4.6) to the bytes last captured by
    /// `capture_unit`, filling `out_buf`. Returns the output geometry.
    fn apply_shrink(&mut self) -> (u16, u16) {
        let scratch = self.scratch.as_ref().expect("scratch allocated before shrink");
        if self.is_shrink {
            let (out_w, out_h) = shrink::output_dimensions(
                self.screen_width,
                self.screen_height,
                self.shrink_width,
                self.shrink_height,
            );
            shrink::shrink_frame(
                scratch,
                self.screen_width,
                self.shrink_width,
                self.shrink_height,
                out_w,
                out_h,
                &mut self.out_buf,
            );
            (out_w, out_h)
        } else {
            shrink::copy_full_frame(scratch, self.screen_width, self.screen_height, &mut self.out_buf);
            (self.screen_width, self.screen_height)
        }
    }

    /// Central dispatch point (§4.2): runs the handler for `message`,
    /// then resolves the result into exactly one outcome — a response
    /// packet for a non-fatal business error, or session termination for
    /// a fatal one. Also used from inside the realtime pacing loop to
    /// service interleaved requests.
    fn dispatch(&mut self, message: codec::MessageType, payload: &[u8]) -> io::Result<()> {
        use codec::MessageType::*;

        self.message_type = message as u16;

        let result = match message {
            Reset => handlers::reset(self),
            GetVersion => handlers::get_version(self),
            ConfigVideoStream => handlers::config_video_stream(self, payload),
            ConfigShrinkVideoStream => handlers::config_shrink_video_stream(self, payload),
            DumpVideoFrame => handlers::dump_video_frame(self, payload),
            DumpRealtimeVideoFrame => handlers::dump_realtime_video_frame(self, payload),
            StopDumpVideo => handlers::stop_dump_video(self),
            DumpRealtimeAudioPage => handlers::dump_realtime_audio_page(self, payload),
            StopDumpAudio => handlers::stop_dump_audio(self),
        };

        match result {
            Ok(()) => Ok(()),
            Err(HandlerError::Business(e)) => {
                warn!(
                    "session {}: {} (message {})",
                    self.peer, e, self.message_type
                );
                let pkt = codec::PacketHead::response_text(self.message_type, e.code(), &e.to_string());
                self.send(pkt)
            }
            Err(HandlerError::Fatal(io_err)) => Err(io_err),
        }
    }
}

/// Runs one accepted connection to completion (§4.2's top-level contract):
/// reads one complete request, dispatches it, loops, until EOF, a framing
/// error, or a fatal handler error closes the connection.
pub fn run(stream: TcpStream, hal: Arc<Hal>, max_request_payload: usize) -> io::Result<()> {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "<unknown>".to_string());
    let mem_device = hal.device();
    let mut session = Session::new(stream, peer.clone(), hal, mem_device, max_request_payload);

    info!("session {}: accepted", peer);

    loop {
        let request = match codec::PacketHead::read_request(&mut session.stream, session.max_request_payload) {
            Ok(r) => r,
            Err(codec::Error::Eof) => {
                info!("session {}: peer closed connection", peer);
                break;
            }
            Err(e) => {
                warn!("session {}: framing error: {}", peer, e);
                break;
            }
        };

        let message = match codec::MessageType::from_u16(request.message_type) {
            Ok(m) => m,
            Err(_) => unreachable!("read_request already validated message_type range"),
        };

        if let Err(e) = session.dispatch(message, &request.payload) {
            warn!("session {}: fatal error: {}", peer, e);
            break;
        }
    }

    info!("session {}: closed", peer);
    Ok(())
}
