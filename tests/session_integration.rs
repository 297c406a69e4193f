//! End-to-end session tests against a fake board: a sparse scratch file
//! stands in for `/dev/mem`, with register words poked directly at known
//! byte offsets and dump regions backed by the high end of the same file
//! (mapped through the real `+0xC000_0000` translation, §4.9).
//!
//! Grounded on the teacher's plain `#[test]` integration style (no
//! snapshot/property-testing crate) and on driving the wire protocol
//! exactly as a real client would: connect, write request bytes, read
//! response bytes back (§10.6).

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::unix::fs::FileExt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use stream_server::hal::{Hal, RegisterMap};
use stream_server::session;

// Register word indices, per the wire-level hardware register map (§6).
// Mirrored here rather than imported since the production `hal::word`
// module is crate-private.
const CONTROL: u64 = 0;
const START_ADDR: u64 = 2;
const END_ADDR: u64 = 3;
const DUMP_LIMIT: u64 = 5;
const FRAME_WIDTH: u64 = 6;
const FRAME_HEIGHT: u64 = 7;
const FRAME_COUNT: u64 = 8;
const AUDIO_PAGE_COUNT: u64 = 5;

const VIDEO_RUN: u32 = 0b0100; // bits 3:2 nonzero
const AUDIO_RUN: u32 = 0b0010; // bit 1

const VIDEO_A_BASE: u64 = 0;
const VIDEO_B_BASE: u64 = 4096;
const AUDIO_BASE: u64 = 8192;

/// Matches `hal::PHYS_ADDR_OFFSET`; every dump-region address HAL reports
/// is `raw_register_value + this`, so dump regions are addressed starting
/// here regardless of how small the raw register values are.
const PHYS_ADDR_OFFSET: u64 = 0xC000_0000;
const DUMP_REGION_SIZE: u64 = 4 * 1024 * 1024;

struct FakeBoard {
    _tmp: tempfile::NamedTempFile,
    poker: std::fs::File,
}

impl FakeBoard {
    fn new() -> FakeBoard {
        let tmp = tempfile::NamedTempFile::new().expect("create scratch file");
        tmp.as_file()
            .set_len(PHYS_ADDR_OFFSET + DUMP_REGION_SIZE)
            .expect("size scratch file (sparse)");
        let poker = tmp.reopen().expect("reopen scratch file for poking");
        FakeBoard { _tmp: tmp, poker }
    }

    fn path(&self) -> std::path::PathBuf {
        self._tmp.path().to_path_buf()
    }

    fn write_word(&self, base: u64, word_index: u64, value: u32) {
        self.poker
            .write_at(&value.to_ne_bytes(), base + word_index * 4)
            .expect("poke register word");
    }

    fn register_map(&self) -> RegisterMap {
        RegisterMap {
            video_a_base: VIDEO_A_BASE,
            video_b_base: VIDEO_B_BASE,
            audio_base: AUDIO_BASE,
        }
    }

    fn configure_video_channel(&self, base: u64, width: u32, height: u32, dump_limit: u32) {
        self.write_word(base, CONTROL, VIDEO_RUN);
        self.write_word(base, FRAME_WIDTH, width);
        self.write_word(base, FRAME_HEIGHT, height);
        self.write_word(base, DUMP_LIMIT, dump_limit);
        self.write_word(base, START_ADDR, 0);
        // Comfortably larger than unit_aligned_size * dump_limit for any
        // small test geometry.
        self.write_word(base, END_ADDR, 50 * 1024 * 1024);
    }

    fn configure_audio(&self, page_count_hw: u32, region_bytes: u32) {
        self.write_word(AUDIO_BASE, CONTROL, AUDIO_RUN);
        self.write_word(AUDIO_BASE, START_ADDR, 0);
        self.write_word(AUDIO_BASE, END_ADDR, region_bytes);
        self.write_word(AUDIO_BASE, AUDIO_PAGE_COUNT, page_count_hw);
    }
}

struct RawResponse {
    main_type_bits: u16,
    message_type: u16,
    error_code: u16,
    payload: Vec<u8>,
}

fn send_request(client: &mut TcpStream, message_type: u16, payload: &[u8]) {
    let wire_type = message_type; // main_type = Request = 0
    client.write_u16::<BigEndian>(wire_type).unwrap();
    client.write_u16::<BigEndian>(0).unwrap();
    client.write_u32::<BigEndian>(payload.len() as u32).unwrap();
    client.write_all(payload).unwrap();
}

fn read_response(client: &mut TcpStream) -> RawResponse {
    let wire_type = client.read_u16::<BigEndian>().unwrap();
    let error_code = client.read_u16::<BigEndian>().unwrap();
    let length = client.read_u32::<BigEndian>().unwrap();
    let mut payload = vec![0u8; length as usize];
    client.read_exact(&mut payload).unwrap();
    RawResponse {
        main_type_bits: wire_type >> 8,
        message_type: wire_type & 0x00ff,
        error_code,
        payload,
    }
}

/// Binds an ephemeral port, runs one session against `hal` on a
/// background thread, and returns a connected client plus its handle.
fn spawn_session(hal: Arc<Hal>) -> (TcpStream, thread::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
        let (stream, _peer) = listener.accept().expect("accept test client");
        let _ = session::run(stream, hal, 2048);
    });
    let client = TcpStream::connect(addr).expect("connect to session");
    (client, handle)
}

const MSG_GET_VERSION: u16 = 1;
const MSG_DUMP_VIDEO_FRAME: u16 = 4;
const MSG_DUMP_REALTIME_VIDEO: u16 = 5;
const MSG_STOP_DUMP_VIDEO: u16 = 6;
const MSG_DUMP_REALTIME_AUDIO: u16 = 7;
const MSG_STOP_DUMP_AUDIO: u16 = 8;

#[test]
fn get_version_round_trip() {
    let board = FakeBoard::new();
    let hal = Arc::new(Hal::init(&board.path(), board.register_map()).unwrap());
    let (mut client, handle) = spawn_session(hal);

    send_request(&mut client, MSG_GET_VERSION, &[]);
    let resp = read_response(&mut client);
    assert_eq!(resp.main_type_bits, 1); // Response
    assert_eq!(resp.message_type, MSG_GET_VERSION);
    assert_eq!(resp.error_code, 0);
    assert_eq!(resp.payload, vec![1, 0]);

    drop(client);
    handle.join().unwrap();
}

#[test]
fn zero_frame_count_is_rejected_and_session_continues() {
    let board = FakeBoard::new();
    let hal = Arc::new(Hal::init(&board.path(), board.register_map()).unwrap());
    let (mut client, handle) = spawn_session(hal);

    let mut payload = Vec::new();
    payload.write_u32::<BigEndian>(0).unwrap(); // memory_address1
    payload.write_u32::<BigEndian>(0).unwrap(); // memory_address2
    payload.write_u16::<BigEndian>(0).unwrap(); // number_of_frames
    send_request(&mut client, MSG_DUMP_VIDEO_FRAME, &payload);

    let resp = read_response(&mut client);
    assert_eq!(resp.message_type, MSG_DUMP_VIDEO_FRAME);
    assert_eq!(resp.error_code, 2); // Argument
    assert_eq!(resp.payload, b"Frame number is 0");

    // Session must still be alive and in Idle.
    send_request(&mut client, MSG_GET_VERSION, &[]);
    let resp = read_response(&mut client);
    assert_eq!(resp.message_type, MSG_GET_VERSION);
    assert_eq!(resp.error_code, 0);

    drop(client);
    handle.join().unwrap();
}

#[test]
fn dual_channel_dimension_mismatch_is_rejected() {
    let board = FakeBoard::new();
    board.configure_video_channel(VIDEO_A_BASE, 64, 48, 8);
    board.configure_video_channel(VIDEO_B_BASE, 32, 48, 8); // width differs

    let hal = Arc::new(Hal::init(&board.path(), board.register_map()).unwrap());
    let (mut client, handle) = spawn_session(hal);

    let mut payload = Vec::new();
    payload.write_u8(1).unwrap(); // is_dual
    payload.write_u8(2).unwrap(); // mode = BestEffort
    send_request(&mut client, MSG_DUMP_REALTIME_VIDEO, &payload);

    let resp = read_response(&mut client);
    assert_eq!(resp.message_type, MSG_DUMP_REALTIME_VIDEO);
    assert_eq!(resp.error_code, 2); // Argument
    assert_eq!(resp.payload, b"Width or height or limit is not the same");

    drop(client);
    handle.join().unwrap();
}

/// Exercises the `Emit` branch of the realtime video pacing loop end to
/// end: the hardware frame counter is preset ahead of the session by
/// exactly one unit (within `dump_limit`), so the loop must actually
/// capture, shrink-copy, and write a `Data` frame back over the socket —
/// this is the path that a non-blocking stream during the write would
/// silently break for any frame larger than the kernel send buffer.
#[test]
fn realtime_video_single_channel_emits_a_data_frame_then_stops() {
    let board = FakeBoard::new();
    board.configure_video_channel(VIDEO_A_BASE, 8, 6, 4);
    board.write_word(VIDEO_A_BASE, FRAME_COUNT, 1);

    let hal = Arc::new(Hal::init(&board.path(), board.register_map()).unwrap());
    let (mut client, handle) = spawn_session(hal);

    let mut payload = Vec::new();
    payload.write_u8(0).unwrap(); // is_dual
    payload.write_u8(2).unwrap(); // mode = BestEffort
    send_request(&mut client, MSG_DUMP_REALTIME_VIDEO, &payload);

    let ok = read_response(&mut client);
    assert_eq!(ok.message_type, MSG_DUMP_REALTIME_VIDEO);
    assert_eq!(ok.error_code, 0);

    let data = read_response(&mut client);
    assert_eq!(data.main_type_bits, 2); // Data
    assert_eq!(data.message_type, MSG_DUMP_REALTIME_VIDEO);
    assert_eq!(data.payload.len(), 12 + 8 * 6 * 3);
    assert_eq!(&data.payload[0..4], &0u32.to_be_bytes()); // frame_number
    assert_eq!(&data.payload[4..6], &8u16.to_be_bytes()); // width
    assert_eq!(&data.payload[6..8], &6u16.to_be_bytes()); // height

    thread::sleep(Duration::from_millis(50));
    send_request(&mut client, MSG_STOP_DUMP_VIDEO, &[]);
    let stop_ok = read_response(&mut client);
    assert_eq!(stop_ok.message_type, MSG_STOP_DUMP_VIDEO);
    assert_eq!(stop_ok.error_code, 0);

    drop(client);
    handle.join().unwrap();
}

/// Drives a short BestEffort realtime audio stream: the hardware page
/// counter is pre-set ahead of the session's starting `emitted_count`
/// past `dump_limit`, forcing an immediate overflow-drop on the first
/// pacing decision (mirrors the literal scenario of dump_limit=8,
/// catching up from a large jump), then a `StopDumpAudio` control
/// message ends the stream cleanly.
#[test]
fn realtime_audio_overflow_drop_then_stop() {
    let board = FakeBoard::new();
    let dump_limit = 8u32;
    board.configure_audio(17, dump_limit * 4096);

    let hal = Arc::new(Hal::init(&board.path(), board.register_map()).unwrap());
    let (mut client, handle) = spawn_session(hal);

    let mut payload = Vec::new();
    payload.write_u8(2).unwrap(); // mode = BestEffort
    send_request(&mut client, MSG_DUMP_REALTIME_AUDIO, &payload);

    let ok = read_response(&mut client);
    assert_eq!(ok.message_type, MSG_DUMP_REALTIME_AUDIO);
    assert_eq!(ok.error_code, 0);

    let drop_resp = read_response(&mut client);
    assert_eq!(drop_resp.message_type, MSG_DUMP_REALTIME_AUDIO);
    assert_eq!(drop_resp.error_code, 7); // AudioMemoryOverflowDrop
    assert_eq!(drop_resp.payload, b"Drop realtime audio page 17");

    thread::sleep(Duration::from_millis(50));
    send_request(&mut client, MSG_STOP_DUMP_AUDIO, &[]);

    let stop_ok = read_response(&mut client);
    assert_eq!(stop_ok.message_type, MSG_STOP_DUMP_AUDIO);
    assert_eq!(stop_ok.error_code, 0);

    // Back to Idle: a plain GetVersion still works.
    send_request(&mut client, MSG_GET_VERSION, &[]);
    let resp = read_response(&mut client);
    assert_eq!(resp.message_type, MSG_GET_VERSION);
    assert_eq!(resp.error_code, 0);

    drop(client);
    handle.join().unwrap();
}
