//! Message handlers (§4.2-§4.5): one function per wire message type,
//! dispatched from `Session::dispatch`. Each handler either performs its
//! own response writes and returns `Ok(())`, or rejects the request with
//! `HandlerError::Business` (the dispatcher then writes the error
//! response) — never both.

use super::{hal_err_to_io, page_align, Error, HandlerError, HandlerResult, Mode, RealtimeMode, Session};
use crate::codec::{self, ErrorCode, MessageType, PacketHead, VideoDataStreamHead};
use crate::hal::Channel;
use byteorder::{BigEndian, ReadBytesExt};
use std::io::{self, Cursor, Read};

const BYTES_PER_PIXEL: usize = 3;
const AUDIO_PAGE_SIZE: usize = codec::AudioDataStreamHead::PAGE_SIZE;

fn read_u16(cursor: &mut impl Read) -> HandlerResult2<u16> {
    cursor
        .read_u16::<BigEndian>()
        .map_err(|_| Error::Argument("Invalid request payload".to_string()).into())
}

fn read_u32(cursor: &mut impl Read) -> HandlerResult2<u32> {
    cursor
        .read_u32::<BigEndian>()
        .map_err(|_| Error::Argument("Invalid request payload".to_string()).into())
}

fn read_u8(cursor: &mut impl Read) -> HandlerResult2<u8> {
    cursor
        .read_u8()
        .map_err(|_| Error::Argument("Invalid request payload".to_string()).into())
}

/// Local convenience alias; the public `HandlerResult` is `Result<(), _>`,
/// but the small parsing helpers above need to hand back a parsed value.
type HandlerResult2<T> = Result<T, HandlerError>;

pub(super) fn reset(session: &mut Session) -> HandlerResult {
    if matches!(session.mode, Mode::RealtimeVideo | Mode::RealtimeAudio) {
        return Err(Error::RealtimeStreamExists.into());
    }
    session.reset_capture_state();
    session.mode = Mode::Idle;
    session.send_ok()?;
    Ok(())
}

pub(super) fn get_version(session: &mut Session) -> HandlerResult {
    session.send(PacketHead::response(
        session.message_type,
        ErrorCode::Ok,
        vec![1, 0],
    ))?;
    Ok(())
}

pub(super) fn config_video_stream(session: &mut Session, payload: &[u8]) -> HandlerResult {
    let mut cur = Cursor::new(payload);
    let width = read_u16(&mut cur)?;
    let height = read_u16(&mut cur)?;
    session.screen_width = width;
    session.screen_height = height;
    session.send_ok()?;
    Ok(())
}

pub(super) fn config_shrink_video_stream(session: &mut Session, payload: &[u8]) -> HandlerResult {
    let mut cur = Cursor::new(payload);
    let shrink_width = read_u8(&mut cur)?;
    let shrink_height = read_u8(&mut cur)?;
    session.shrink_width = shrink_width;
    session.shrink_height = shrink_height;
    session.is_shrink = shrink_width != 0 || shrink_height != 0;
    session.send_ok()?;
    Ok(())
}

pub(super) fn stop_dump_video(session: &mut Session) -> HandlerResult {
    stop_dump(session, Mode::RealtimeVideo)
}

pub(super) fn stop_dump_audio(session: &mut Session) -> HandlerResult {
    stop_dump(session, Mode::RealtimeAudio)
}

fn stop_dump(session: &mut Session, active_mode: Mode) -> HandlerResult {
    if session.mode == active_mode {
        session.stop_dump = true;
    }
    session.send_ok()?;
    Ok(())
}

/// §4.3: atomic configure/prepare/acknowledge/stream non-realtime dump.
pub(super) fn dump_video_frame(session: &mut Session, payload: &[u8]) -> HandlerResult {
    let mut cur = Cursor::new(payload);
    let addr1 = read_u32(&mut cur)?;
    let addr2 = read_u32(&mut cur)?;
    let number_of_frames = read_u16(&mut cur)?;

    if number_of_frames == 0 {
        return Err(Error::Argument("Frame number is 0".to_string()).into());
    }

    let raw_unit_size = session.screen_width as usize * session.screen_height as usize * BYTES_PER_PIXEL;
    let unit_aligned_size = page_align(raw_unit_size);
    let region_size = unit_aligned_size * number_of_frames as usize;

    configure_or_release(session, |s| {
        s.allocate_scratch(unit_aligned_size)?;
        s.map_channel(0, addr1 as u64, region_size)?;
        if addr2 != 0 {
            s.map_channel(1, addr2 as u64, region_size)?;
        } else {
            s.channels[1].clear();
        }
        Ok(())
    })?;

    session.unit_aligned_size = unit_aligned_size;
    session.dump_limit = number_of_frames as u32;
    session.mode = Mode::NonRealtime;
    session.send_ok()?;

    let result = stream_non_realtime_video(session, number_of_frames);
    session.reset_capture_state();
    session.mode = Mode::Idle;
    result.map_err(HandlerError::from)
}

fn stream_non_realtime_video(session: &mut Session, number_of_frames: u16) -> io::Result<()> {
    for frame_number in 0..number_of_frames as u32 {
        for channel in 0..2usize {
            if !session.channels[channel].is_used() {
                continue;
            }
            session.capture_unit(channel, frame_number as u64)?;
            let (out_w, out_h) = session.apply_shrink();

            let head = VideoDataStreamHead {
                frame_number,
                width: out_w,
                height: out_h,
                channel: channel as u8,
            };
            let mut wire_payload = Vec::with_capacity(VideoDataStreamHead::WIRE_SIZE + session.out_buf.len());
            head.write(&mut wire_payload)?;
            wire_payload.extend_from_slice(&session.out_buf);

            let pkt = PacketHead::data(MessageType::DumpVideoFrame as u16, wire_payload);
            session.send(pkt)?;
        }
    }
    Ok(())
}

/// §4.4: auto-detect a running channel, configure realtime video capture,
/// and run the pacing loop until it ends.
pub(super) fn dump_realtime_video_frame(session: &mut Session, payload: &[u8]) -> HandlerResult {
    if matches!(session.mode, Mode::RealtimeVideo | Mode::RealtimeAudio) {
        return Err(Error::RealtimeStreamExists.into());
    }

    let mut cur = Cursor::new(payload);
    let is_dual = read_u8(&mut cur)? != 0;
    let mode_byte = read_u8(&mut cur)?;
    let realtime_mode = RealtimeMode::from_u8(mode_byte)
        .ok_or_else(|| Error::Argument("Realtime mode is wrong".to_string()))?;

    let channel = detect_running_channel(session)?;
    let (width, height) = session
        .hal
        .video_dimensions(channel)
        .map_err(|e| HandlerError::Fatal(hal_err_to_io(e)))?;

    let unit_aligned_size = page_align(width as usize * height as usize * BYTES_PER_PIXEL);
    let dump_limit = session
        .hal
        .video_dump_limit(channel)
        .map_err(|e| HandlerError::Fatal(hal_err_to_io(e)))?;
    let start = session
        .hal
        .video_dump_start_address(channel)
        .map_err(|e| HandlerError::Fatal(hal_err_to_io(e)))?;
    let end = session
        .hal
        .video_dump_end_address(channel)
        .map_err(|e| HandlerError::Fatal(hal_err_to_io(e)))?;

    check_region_large_enough(start, end, unit_aligned_size, dump_limit)?;

    if is_dual {
        let other = channel.other();
        let other_running = session
            .hal
            .video_run(other)
            .map_err(|e| HandlerError::Fatal(hal_err_to_io(e)))?;
        if !other_running {
            return Err(Error::Argument("Second channel is not running".to_string()).into());
        }
        let (other_width, other_height) = session
            .hal
            .video_dimensions(other)
            .map_err(|e| HandlerError::Fatal(hal_err_to_io(e)))?;
        let other_dump_limit = session
            .hal
            .video_dump_limit(other)
            .map_err(|e| HandlerError::Fatal(hal_err_to_io(e)))?;
        if (other_width, other_height, other_dump_limit) != (width, height, dump_limit) {
            return Err(Error::Argument("Width or height or limit is not the same".to_string()).into());
        }
        let other_start = session
            .hal
            .video_dump_start_address(other)
            .map_err(|e| HandlerError::Fatal(hal_err_to_io(e)))?;
        let other_end = session
            .hal
            .video_dump_end_address(other)
            .map_err(|e| HandlerError::Fatal(hal_err_to_io(e)))?;
        check_region_large_enough(other_start, other_end, unit_aligned_size, dump_limit)?;

        configure_or_release(session, |s| {
            s.allocate_scratch(unit_aligned_size)?;
            s.map_channel(0, start, unit_aligned_size * dump_limit as usize)?;
            s.map_channel(1, other_start, unit_aligned_size * dump_limit as usize)?;
            Ok(())
        })?;
    } else {
        session.channels[1].clear();
        configure_or_release(session, |s| {
            s.allocate_scratch(unit_aligned_size)?;
            s.map_channel(0, start, unit_aligned_size * dump_limit as usize)?;
            Ok(())
        })?;
    }

    session.screen_width = width;
    session.screen_height = height;
    session.unit_aligned_size = unit_aligned_size;
    session.dump_limit = dump_limit;
    session.is_dual = is_dual;
    session.realtime_check_channel = Some(channel);
    session.realtime_mode = Some(realtime_mode);
    session.emitted_count = 0;
    session.mode = Mode::RealtimeVideo;

    session.send_ok()?;

    let own_message_type = MessageType::DumpRealtimeVideoFrame as u16;
    let end_reason = run_realtime_video_loop(session, own_message_type).map_err(HandlerError::from)?;
    log_stream_end(session, "video", end_reason);

    session.reset_capture_state();
    session.mode = Mode::Idle;
    Ok(())
}

/// §4.5: configure and run a realtime audio page stream.
pub(super) fn dump_realtime_audio_page(session: &mut Session, payload: &[u8]) -> HandlerResult {
    if matches!(session.mode, Mode::RealtimeVideo | Mode::RealtimeAudio) {
        return Err(Error::RealtimeStreamExists.into());
    }

    let mut cur = Cursor::new(payload);
    let mode_byte = read_u8(&mut cur)?;
    let realtime_mode = RealtimeMode::from_u8(mode_byte)
        .ok_or_else(|| Error::Argument("Realtime mode is wrong".to_string()))?;

    let running = session
        .hal
        .audio_run()
        .map_err(|e| HandlerError::Fatal(hal_err_to_io(e)))?;
    if !running {
        return Err(Error::Argument("Capture HW is not running".to_string()).into());
    }

    let start = session
        .hal
        .audio_dump_start_address()
        .map_err(|e| HandlerError::Fatal(hal_err_to_io(e)))?;
    let end = session
        .hal
        .audio_dump_end_address()
        .map_err(|e| HandlerError::Fatal(hal_err_to_io(e)))?;
    if end <= start {
        return Err(Error::Argument("Dump memory is not enough".to_string()).into());
    }
    let dump_limit = ((end - start) / AUDIO_PAGE_SIZE as u64) as u32;

    session.channels[1].clear();
    configure_or_release(session, |s| {
        s.allocate_scratch(AUDIO_PAGE_SIZE)?;
        s.map_channel(0, start, AUDIO_PAGE_SIZE * dump_limit as usize)?;
        Ok(())
    })?;

    session.unit_aligned_size = AUDIO_PAGE_SIZE;
    session.dump_limit = dump_limit;
    session.is_dual = false;
    session.realtime_check_channel = None;
    session.realtime_mode = Some(realtime_mode);
    session.emitted_count = 0;
    session.mode = Mode::RealtimeAudio;

    session.send_ok()?;

    let own_message_type = MessageType::DumpRealtimeAudioPage as u16;
    let end_reason = run_realtime_audio_loop(session, own_message_type).map_err(HandlerError::from)?;
    log_stream_end(session, "audio", end_reason);

    session.reset_capture_state();
    session.mode = Mode::Idle;
    Ok(())
}

fn detect_running_channel(session: &mut Session) -> HandlerResult2<Channel> {
    let a_running = session
        .hal
        .video_run(Channel::A)
        .map_err(|e| HandlerError::Fatal(hal_err_to_io(e)))?;
    if a_running {
        return Ok(Channel::A);
    }
    let b_running = session
        .hal
        .video_run(Channel::B)
        .map_err(|e| HandlerError::Fatal(hal_err_to_io(e)))?;
    if b_running {
        return Ok(Channel::B);
    }
    Err(Error::Argument("Capture HW is not running".to_string()).into())
}

fn check_region_large_enough(start: u64, end: u64, unit_aligned_size: usize, dump_limit: u32) -> HandlerResult2<()> {
    let required = unit_aligned_size as u64 * dump_limit as u64;
    if end <= start || end - start <= required {
        return Err(Error::Argument("Dump memory is not enough".to_string()).into());
    }
    Ok(())
}

/// Runs a scratch-allocate/map-channel configure step and, if any part of
/// it fails partway through, releases whatever scratch/mapping it already
/// established before propagating the error — a configure step either
/// ends fully established or fully cleared (§3, §7).
fn configure_or_release<F>(session: &mut Session, f: F) -> HandlerResult2<()>
where
    F: FnOnce(&mut Session) -> super::Result<()>,
{
    if let Err(e) = f(session) {
        session.reset_capture_state();
        return Err(e.into());
    }
    Ok(())
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum StreamEnd {
    Stopped,
    OverflowStop,
}

fn log_stream_end(session: &Session, kind: &str, end: StreamEnd) {
    match end {
        StreamEnd::Stopped => {
            crate::util::info!("session {}: {} realtime stream stopped by request", session.peer, kind)
        }
        StreamEnd::OverflowStop => {
            crate::util::info!("session {}: {} realtime stream stopped on overflow", session.peer, kind)
        }
    }
}

fn run_realtime_video_loop(session: &mut Session, own_message_type: u16) -> io::Result<StreamEnd> {
    loop {
        poll_and_dispatch(session)?;
        if session.stop_dump {
            session.stop_dump = false;
            return Ok(StreamEnd::Stopped);
        }

        let channel = session.realtime_check_channel.expect("set before entering loop");
        let hw = session.hal.video_frame_count(channel).map_err(hal_err_to_io)? as u16;

        match super::pacing::decide(session.emitted_count, hw, session.dump_limit, session.realtime_mode.expect("set before entering loop")) {
            super::pacing::Decision::Idle => {
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
            super::pacing::Decision::Emit { ring_slot } => {
                for channel_idx in 0..2usize {
                    if !session.channels[channel_idx].is_used() {
                        continue;
                    }
                    session.capture_unit(channel_idx, ring_slot as u64)?;
                    let (out_w, out_h) = session.apply_shrink();
                    let head = VideoDataStreamHead {
                        frame_number: session.emitted_count,
                        width: out_w,
                        height: out_h,
                        channel: channel_idx as u8,
                    };
                    let mut wire_payload =
                        Vec::with_capacity(VideoDataStreamHead::WIRE_SIZE + session.out_buf.len());
                    head.write(&mut wire_payload)?;
                    wire_payload.extend_from_slice(&session.out_buf);
                    session.send(PacketHead::data(own_message_type, wire_payload))?;
                }
                session.emitted_count += 1;
            }
            super::pacing::Decision::StopOverflow => {
                session.send(PacketHead::response_text(
                    own_message_type,
                    ErrorCode::VideoMemoryOverflowStop,
                    "Stop dump realtime video due to memory overflow",
                ))?;
                return Ok(StreamEnd::OverflowStop);
            }
            super::pacing::Decision::DropOverflow { dropped } => {
                let text = format!("Drop realtime video frame {}", dropped);
                session.send(PacketHead::response_text(
                    own_message_type,
                    ErrorCode::VideoMemoryOverflowDrop,
                    &text,
                ))?;
                session.emitted_count += dropped;
            }
        }
    }
}

fn run_realtime_audio_loop(session: &mut Session, own_message_type: u16) -> io::Result<StreamEnd> {
    loop {
        poll_and_dispatch(session)?;
        if session.stop_dump {
            session.stop_dump = false;
            return Ok(StreamEnd::Stopped);
        }

        let hw = session.hal.audio_page_count().map_err(hal_err_to_io)? as u16;

        match super::pacing::decide(session.emitted_count, hw, session.dump_limit, session.realtime_mode.expect("set before entering loop")) {
            super::pacing::Decision::Idle => {
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
            super::pacing::Decision::Emit { ring_slot } => {
                session.capture_unit(0, ring_slot as u64)?;
                let head = codec::AudioDataStreamHead {
                    page_count: session.emitted_count,
                };
                let mut wire_payload = Vec::with_capacity(codec::AudioDataStreamHead::WIRE_SIZE + AUDIO_PAGE_SIZE);
                head.write(&mut wire_payload)?;
                wire_payload.extend_from_slice(&session.scratch.as_ref().expect("scratch allocated")[..AUDIO_PAGE_SIZE]);
                session.send(PacketHead::data(own_message_type, wire_payload))?;
                session.emitted_count += 1;
            }
            super::pacing::Decision::StopOverflow => {
                session.send(PacketHead::response_text(
                    own_message_type,
                    ErrorCode::AudioMemoryOverflowStop,
                    "Stop dump realtime audio due to memory overflow",
                ))?;
                return Ok(StreamEnd::OverflowStop);
            }
            super::pacing::Decision::DropOverflow { dropped } => {
                let text = format!("Drop realtime audio page {}", dropped);
                session.send(PacketHead::response_text(
                    own_message_type,
                    ErrorCode::AudioMemoryOverflowDrop,
                    &text,
                ))?;
                session.emitted_count += dropped;
            }
        }
    }
}

/// Non-blocking check for an interleaved in-band request (§4.7 step 1).
/// Only the readability probe itself runs non-blocking — the socket is
/// flipped back to blocking before the request body is read and before
/// `Session::dispatch` writes anything, so neither a multi-segment
/// request nor a response/data-frame write (§4.4's realtime frames in
/// particular can be hundreds of KB, well past the kernel send buffer)
/// can fail with `WouldBlock`. Assumes control packets arriving mid-stream
/// land as one readable chunk once the first byte is visible; a
/// production hardening pass would buffer partial reads explicitly
/// instead of relying on a single `peek`.
fn poll_and_dispatch(session: &mut Session) -> io::Result<()> {
    session.stream.set_nonblocking(true)?;
    let mut probe = [0u8; 1];
    let peeked = session.stream.peek(&mut probe);
    session.stream.set_nonblocking(false)?;

    match peeked {
        Ok(0) => return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed")),
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
        Err(e) => return Err(e),
    }

    let request = match codec::PacketHead::read_request(&mut session.stream, session.max_request_payload) {
        Ok(r) => r,
        Err(codec::Error::Eof) => {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed"))
        }
        Err(e) => return Err(io::Error::new(io::ErrorKind::Other, e.to_string())),
    };

    let message = codec::MessageType::from_u16(request.message_type)
        .expect("read_request already validated message_type range");
    session.dispatch(message, &request.payload)
}
