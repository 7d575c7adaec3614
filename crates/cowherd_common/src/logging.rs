//! Logging setup.
//!
//! The log output style is chosen once at startup: colored, timestamped
//! console output when attached to a terminal, plain lines otherwise so
//! the journal or syslog can attach its own metadata.

use tracing::Level;

/// Check whether stdout is connected to a terminal.
pub fn is_tty() -> bool {
    atty::is(atty::Stream::Stdout)
}

/// Install the global tracing subscriber.
///
/// With `verbose` set, debug messages are shown as well.
pub fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    if is_tty() {
        tracing_subscriber::fmt().with_max_level(level).init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_ansi(false)
            .without_time()
            .init();
    }
}
