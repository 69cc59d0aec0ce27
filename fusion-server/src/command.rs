//! Command-send retry wrapper.
//!
//! §7: "I/O send failure on a command: surfaced to the caller. Recommended
//! policy: one automatic retry after ~50ms; a second failure is reported
//! to the caller, not logged as fatal."

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use fusion_core::{Receiver, RoverId};
use tracing::warn;

pub async fn send_command_with_retry(
    receiver: Arc<Receiver>,
    rover_id: RoverId,
    command_byte: u8,
    endpoint: SocketAddr,
) -> std::io::Result<()> {
    match receiver.send_command(rover_id, command_byte, endpoint) {
        Ok(()) => Ok(()),
        Err(first_err) => {
            warn!(rover_id, %endpoint, "command send failed, retrying once: {first_err}");
            tokio::time::sleep(Duration::from_millis(50)).await;
            receiver.send_command(rover_id, command_byte, endpoint)
        }
    }
}
