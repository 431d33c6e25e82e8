use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, trace, warn};

use super::controller::{ClientShared, ClientStatus};
use crate::codec::Frame;
use crate::service::StopSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// not connected, nothing to do
    Idle,
    SendHeart,
    /// nothing received for longer than the reconnect timeout
    Reconnect,
}

/// Decides what one heartbeat tick does.
pub fn heartbeat_check(
    status: ClientStatus,
    since_last_received: Duration,
    reconnect_timeout: Duration,
) -> HeartbeatAction {
    if !status.is_connected() {
        return HeartbeatAction::Idle;
    }
    if since_last_received <= reconnect_timeout {
        HeartbeatAction::SendHeart
    } else {
        HeartbeatAction::Reconnect
    }
}

/// Periodic liveness check, owned by one client and stopped with it.
pub(super) async fn heartbeat_task(shared: Arc<ClientShared>, mut stop: StopSignal) {
    let heart = match Frame::heartbeat().to_bytes() {
        Ok(heart) => heart,
        Err(e) => {
            error!("cannot encode heartbeat frame: {}", e);
            return;
        }
    };
    let period = shared.config().heartbeat_interval();
    let reconnect_timeout = shared.config().reconnect_timeout();
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = stop.stopped() => {
                debug!("heartbeat task received stop signal");
                break;
            }
        }
        if !shared.is_running() || stop.poll_stopped() {
            break;
        }
        let (status, since_last_received) = shared.liveness();
        match heartbeat_check(status, since_last_received, reconnect_timeout) {
            HeartbeatAction::SendHeart => shared.send_heartbeat(&heart),
            HeartbeatAction::Reconnect => {
                warn!(
                    "nothing received for {:?}, reconnecting to {}",
                    since_last_received,
                    shared.config().address()
                );
                shared.cancel_session();
            }
            HeartbeatAction::Idle => trace!("heartbeat idle in status {:?}", status),
        }
    }
    debug!("heartbeat task exited");
}
