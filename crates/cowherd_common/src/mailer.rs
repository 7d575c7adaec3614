//! Notification delivery - issue mails and terminal broadcasts.
//!
//! Mail goes out through the local `sendmail` transport; urgent
//! warnings additionally reach logged-in users via `wall`.

use std::io::Write;
use std::process::{Command, Stdio};

use tracing::{info, warn};

use crate::error::Error;

/// Check whether a `sendmail` transport is available on this system.
pub fn have_sendmail() -> bool {
    Command::new("which")
        .arg("sendmail")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Send an email via sendmail.
///
/// The body must already contain the `Subject:` line and any further
/// headers; the `To:` header is prepended from `to_address`.
pub fn send_email(to_address: &str, body: &str) -> Result<(), Error> {
    let mut child = Command::new("sendmail")
        .arg("-t")
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| Error::Mail(format!("Failed to send mail with sendmail: {}", e)))?;

    let content = format!("To: {}\n{}", to_address, body);
    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(content.as_bytes())
            .map_err(|e| Error::Mail(format!("Failed to write mail to sendmail: {}", e)))?;
    }

    let status = child
        .wait()
        .map_err(|e| Error::Mail(format!("Failed to wait for sendmail: {}", e)))?;
    if !status.success() {
        return Err(Error::Mail(format!(
            "Sendmail failed with exit status {}",
            status.code().unwrap_or(-1)
        )));
    }

    Ok(())
}

/// Broadcast a message to the terminals of all logged-in users.
pub fn broadcast_message(message: &str) {
    match Command::new("wall").arg(message).output() {
        Ok(output) if output.status.success() => {
            info!("Terminal broadcast sent");
        }
        Ok(_) => {
            warn!("Failed to send terminal broadcast");
        }
        Err(e) => {
            warn!("Error sending terminal broadcast: {}", e);
        }
    }
}
