//! Helpers shared by the ptymux integration tests

use ptymux::{ChildCommand, Multiplexer, MuxConfig, Registry, Session};
use std::fs::File;
use std::io::Write;
use std::sync::Once;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new("ptymux=debug,ptymux_pty=debug")),
            )
            .with_test_writer()
            .init();
    });
}

/// Configuration running `cat` in every slot with a short shutdown grace
pub fn cat_config(sessions: usize) -> MuxConfig {
    MuxConfig {
        sessions,
        command: ChildCommand::new("cat"),
        history_capacity: 4096,
        shutdown_grace: Duration::from_secs(2),
        ..MuxConfig::default()
    }
}

/// `sh -c script` as a session command
pub fn sh(script: &str) -> ChildCommand {
    ChildCommand::new("sh").arg("-c").arg(script)
}

/// Pipe standing in for the operator's terminal: (read end for the mux, write end for the test)
pub fn input_pipe() -> (File, File) {
    let (read_end, write_end) = nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC).expect("create input pipe");
    (File::from(read_end), File::from(write_end))
}

/// Multiplexer drawing into memory, plus the writer for its operator input
pub fn memory_mux(config: &MuxConfig) -> (Multiplexer<Vec<u8>>, File) {
    let registry = Registry::create(config.sessions, &config.command, config.history_capacity)
        .expect("create sessions");
    let (input, keys) = input_pipe();
    (Multiplexer::new(registry, input, Vec::new(), config), keys)
}

/// Send operator bytes
pub fn type_keys(keys: &mut File, bytes: &[u8]) {
    keys.write_all(bytes).expect("write operator input");
}

/// Run loop iterations until `done` holds or `limit` passes; returns whether it held
pub fn drive_until<F>(mux: &mut Multiplexer<Vec<u8>>, limit: Duration, mut done: F) -> bool
where
    F: FnMut(&Multiplexer<Vec<u8>>) -> bool,
{
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if done(mux) {
            return true;
        }
        mux.poll_with_timeout(Duration::from_millis(50))
            .expect("loop iteration");
    }
    done(mux)
}

/// A session's retained output as text
pub fn history_text(session: &Session) -> String {
    String::from_utf8_lossy(&session.history().to_vec()).into_owned()
}

/// Everything the multiplexer has drawn so far
pub fn screen_text(mux: &Multiplexer<Vec<u8>>) -> String {
    String::from_utf8_lossy(mux.renderer().get_ref()).into_owned()
}
