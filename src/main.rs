//! CLI entry point (§10.4): parses arguments, initializes logging and the
//! HAL, installs a SIGINT handler, and runs the accept loop until
//! shutdown.

use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use stream_server::config::Config;
use stream_server::hal::Hal;
use stream_server::session::DEFAULT_MAX_REQUEST_PAYLOAD;
use stream_server::server;
use stream_server::util::{error, info, LogLevel, Logger};

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = match Config::from_args(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    Logger::set_level(verbosity_to_level(config.verbosity));

    info!(
        "stream_server: starting on {}:{} (mem device {})",
        config.listen_addr,
        config.port,
        config.mem_device_path.display()
    );

    let hal = match Hal::init(&config.mem_device_path, config.register_map) {
        Ok(hal) => Arc::new(hal),
        Err(e) => {
            error!("stream_server: failed to initialize hardware access layer: {}", e);
            process::exit(1);
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    install_sigint_handler(Arc::clone(&shutdown));

    let recv_buffer_min = config.recv_buffer_min.max(DEFAULT_MAX_REQUEST_PAYLOAD);
    if let Err(e) = server::run(&config.listen_addr, config.port, hal, recv_buffer_min, shutdown) {
        error!("stream_server: server exited with error: {}", e);
        process::exit(1);
    }

    info!("stream_server: exited cleanly");
}

fn verbosity_to_level(verbosity: u8) -> LogLevel {
    match verbosity {
        0 => LogLevel::Info,
        1 => LogLevel::Debug,
        _ => LogLevel::Trace,
    }
}

/// Grounded on the teacher's use of `signal-hook` for host-side signal
/// handling: a dedicated thread drains the signal iterator and flips a
/// shared flag the accept loop polls, rather than handling the signal
/// inside a true OS signal handler (§10.4).
fn install_sigint_handler(shutdown: Arc<AtomicBool>) {
    use signal_hook::iterator::Signals;

    let signals = match Signals::new(&[signal_hook::SIGINT, signal_hook::SIGTERM]) {
        Ok(s) => s,
        Err(e) => {
            error!("stream_server: failed to install signal handler: {}", e);
            return;
        }
    };

    std::thread::spawn(move || {
        for signal in signals.forever() {
            info!("stream_server: received signal {}, shutting down", signal);
            shutdown.store(true, Ordering::Relaxed);
            break;
        }
    });
}
