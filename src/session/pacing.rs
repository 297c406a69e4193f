//! Realtime pacing arithmetic (§4.7): correlates the hardware counter with
//! the session's own emitted count to decide emit / idle / drop / stop.
//!
//! Kept free of I/O so the wraparound arithmetic can be tested directly
//! against the quantified invariant (§8) without a `Hal` or socket.

const HW_COUNT_WRAP: u32 = 65536;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RealtimeMode {
    StopWhenOverflow = 1,
    BestEffort = 2,
}

impl RealtimeMode {
    pub fn from_u8(v: u8) -> Option<RealtimeMode> {
        match v {
            1 => Some(RealtimeMode::StopWhenOverflow),
            2 => Some(RealtimeMode::BestEffort),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Hardware has not produced a new unit since the last sample.
    Idle,
    /// Emit the unit at ring slot `emitted_count mod dump_limit`.
    Emit { ring_slot: u32 },
    /// `StopWhenOverflow`: the ring has wrapped past the oldest unread
    /// slot; end the stream.
    StopOverflow,
    /// `BestEffort`: the ring has wrapped; skip forward and keep going.
    DropOverflow { dropped: u32 },
}

/// `difference = ((hw - (emitted mod 65536)) + 65536) mod 65536` (§4.7,
/// §8). Always in `[0, 65536)`; zero iff `hw == emitted mod 65536`.
pub fn counter_difference(emitted_count: u32, hw: u16) -> u32 {
    let emitted_mod = emitted_count % HW_COUNT_WRAP;
    (hw as u32 + HW_COUNT_WRAP - emitted_mod) % HW_COUNT_WRAP
}

/// One step of the pacing decision (§4.7 steps 3-7). Does not mutate
/// `emitted_count`; callers apply the count update implied by the
/// returned `Decision` (see `session::run_realtime_*`).
pub fn decide(emitted_count: u32, hw: u16, dump_limit: u32, mode: RealtimeMode) -> Decision {
    let difference = counter_difference(emitted_count, hw);
    if difference == 0 {
        return Decision::Idle;
    }
    if difference > dump_limit {
        return match mode {
            RealtimeMode::StopWhenOverflow => Decision::StopOverflow,
            RealtimeMode::BestEffort => Decision::DropOverflow { dropped: difference },
        };
    }
    Decision::Emit {
        ring_slot: emitted_count % dump_limit,
    }
}
