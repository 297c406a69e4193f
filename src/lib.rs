//! stream-server — TCP streaming server for a hardware capture board.
//!
//! Clients connect over TCP, negotiate a captured video or audio region,
//! and either pull a bounded batch of frames or subscribe to an
//! open-ended realtime stream. Pixels and audio pages are read directly
//! out of the board's shared memory (written by on-board FPGA dump
//! controllers) and forwarded over the socket.
//!
//! # Architecture
//!
//! ```text
//! Hal (register windows)
//!   └─> Session (per connection)
//!        ├─> FrameBufferMapper (dump buffer -> session address space)
//!        ├─> codec (wire framing)
//!        ├─> pacing loop (realtime modes)
//!        └─> shrink transform (optional pixel decimation)
//! ```
//!
//! One OS thread runs one session; the accept front end in [`server`]
//! admits at most two sessions concurrently (one video, one audio).

pub mod util;

pub mod codec;
pub mod config;
pub mod hal;
pub mod mapper;
pub mod server;
pub mod session;
pub mod system;
