//! reliable transfer engine for Lossline

use std::num::NonZeroUsize;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use lossline_core::Sequence;

pub mod baseline;
pub mod channel;
pub mod receiver;
pub mod scheduler;
pub mod sender;
pub mod simulated;

pub use baseline::{EchoReceiver, EchoSender, ECHO_ACK};
pub use channel::{Datagram, UdpChannel};
pub use receiver::{ReassemblyBuffer, ReceiveReport, Receiver};
pub use scheduler::RetransmitScheduler;
pub use sender::{Sender, TransferReport};
pub use simulated::{ChannelStats, FaultConfig, SimulatedChannel};

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("channel io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no datagram within {0:?}")]
    Timeout(Duration),

    #[error("session expired after {elapsed:?} with {acknowledged}/{total} frames acknowledged")]
    SessionExpired {
        elapsed: Duration,
        acknowledged: usize,
        total: usize,
    },

    #[error("retransmit queue empty with {unacknowledged} frames unacknowledged")]
    SchedulerStalled { unacknowledged: usize },

    #[error("retransmit task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),

    #[error("transfer incomplete, missing frames {missing:?}")]
    Incomplete { missing: Vec<Sequence> },
}

/// What the receiver does with sequence slots that never arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GapPolicy {
    /// Write nothing and report the missing sequences.
    Fail,
    /// Write the slots that did arrive, in order, and log each hole.
    Skip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    pub retransmit_interval: Duration,
    /// Frames admitted to the retransmit queue at once. `None` sends everything immediately.
    pub max_in_flight: Option<NonZeroUsize>,
    /// Upper bound on a whole `send`. `None` retries forever.
    pub session_timeout: Option<Duration>,
    pub gap_policy: GapPolicy,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            retransmit_interval: Duration::from_millis(5),
            max_in_flight: None,
            session_timeout: None,
            gap_policy: GapPolicy::Fail,
        }
    }
}
