//! Bounded command bus between control surfaces and the clock thread.

use crossfire::mpmc;
use crossfire::{MAsyncTx, MRx, TryRecvError, TrySendError, detect_backoff_cfg};
use floodswarm_core::{MissionCommand, MissionState, apply_command};
use std::sync::Arc;
use tracing::{debug, warn};

pub type CommandSender = MAsyncTx<MissionCommand>;
pub type CommandReceiver = MRx<MissionCommand>;
pub type CommandSubmit = Arc<dyn Fn(MissionCommand) -> bool + Send + Sync>;

/// Create the bounded bus used to hand commands to the clock thread.
pub fn create_command_bus(capacity: usize) -> (CommandSender, CommandReceiver) {
    detect_backoff_cfg();
    mpmc::bounded_tx_async_rx_blocking(capacity)
}

/// Drain and apply every pending command between ticks.
pub fn drain_pending_commands(receiver: &CommandReceiver, state: &mut MissionState) {
    loop {
        match receiver.try_recv() {
            Ok(command) => {
                debug!(?command, "applying mission command");
                if let Err(err) = apply_command(state, command) {
                    warn!(%err, "mission command rejected");
                }
            }
            Err(TryRecvError::Empty) => break,
            Err(TryRecvError::Disconnected) => break,
        }
    }
}

/// Non-blocking submit handle shared with control surfaces.
pub fn make_command_submit(sender: CommandSender) -> CommandSubmit {
    let sender = Arc::new(sender);
    Arc::new(
        move |command: MissionCommand| match sender.try_send(command) {
            Ok(()) => true,
            Err(TrySendError::Full(cmd)) => {
                warn!(?cmd, "mission command queue full; dropping command");
                false
            }
            Err(TrySendError::Disconnected(cmd)) => {
                warn!(?cmd, "mission command queue disconnected");
                false
            }
        },
    )
}
