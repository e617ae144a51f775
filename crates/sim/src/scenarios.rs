//! Simulation scenarios running full transfers over the simulated channel

use std::num::NonZeroUsize;
use std::time::Duration;
use anyhow::{Context, Result};
use log::info;
use rand::Rng;

use lossline_link::{
    ChannelStats, EchoReceiver, EchoSender, FaultConfig, LinkConfig, ReceiveReport, Receiver,
    Sender, SimulatedChannel, TransferReport,
};

const SENDER_IDLE: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub struct TransferOutcome {
    pub sent: TransferReport,
    pub received: ReceiveReport,
    /// Sender → receiver datagrams.
    pub forward: ChannelStats,
    /// Receiver → sender datagrams.
    pub backward: ChannelStats,
    pub intact: bool,
}

#[derive(Debug)]
pub struct EchoOutcome {
    pub attempts: u32,
    pub bytes_written: usize,
    pub intact: bool,
}

pub fn random_payload(len: usize) -> Vec<u8> {
    let mut payload = vec![0u8; len];
    rand::rng().fill(&mut payload[..]);
    payload
}

/// Receiver idle time long enough to outlast the channel's worst delay.
fn receiver_idle(faults: &FaultConfig) -> Duration {
    (faults.latency + faults.latency_jitter) * 4 + Duration::from_millis(250)
}

fn endpoints(faults: &FaultConfig) -> (SimulatedChannel, SimulatedChannel) {
    let forward = FaultConfig {
        recv_timeout: SENDER_IDLE,
        ..faults.clone()
    };
    let backward = FaultConfig {
        recv_timeout: receiver_idle(faults),
        ..faults.clone()
    };
    SimulatedChannel::asymmetric(forward, backward)
}

/// Sends `payload_len` random bytes through a sender/receiver pair.
pub async fn transfer_test(
    faults: FaultConfig,
    config: LinkConfig,
    payload_len: usize,
) -> Result<TransferOutcome> {
    info!("Transfer of {} bytes over {:?}", payload_len, faults);

    let payload = random_payload(payload_len);
    let (sender_end, receiver_end) = endpoints(&faults);
    let mut sender = Sender::new(sender_end, config.clone());
    let mut receiver = Receiver::new(receiver_end, config);

    let mut output = Vec::with_capacity(payload_len);
    let (sent, received) = tokio::join!(sender.send(&payload), receiver.run(&mut output));
    let sent = sent.context("sender failed")?;
    let received = received.context("receiver failed")?;

    Ok(TransferOutcome {
        sent,
        received,
        forward: sender.channel().get_stats().await,
        backward: receiver.channel().get_stats().await,
        intact: output == payload,
    })
}

/// Same payload through the echo baseline, which has no integrity checks.
pub async fn echo_baseline_test(faults: FaultConfig, payload_len: usize) -> Result<EchoOutcome> {
    info!("Echo baseline of {} bytes over {:?}", payload_len, faults);

    let payload = random_payload(payload_len);
    let (sender_end, receiver_end) = endpoints(&faults);
    let sender = EchoSender::new(sender_end);
    let receiver = EchoReceiver::new(receiver_end);

    let mut output = Vec::with_capacity(payload_len);
    let (attempts, written) = tokio::join!(sender.send(&payload), receiver.run(&mut output));
    let attempts = attempts.context("echo sender failed")?;
    let bytes_written = written.context("echo receiver failed")?;

    Ok(EchoOutcome {
        attempts,
        bytes_written,
        intact: output == payload,
    })
}

/// One transfer per in-flight limit, same channel each time.
pub async fn in_flight_sweep(
    faults: FaultConfig,
    limits: &[Option<NonZeroUsize>],
    payload_len: usize,
) -> Result<Vec<(Option<NonZeroUsize>, TransferOutcome)>> {
    let mut results = Vec::with_capacity(limits.len());
    for &limit in limits {
        let config = LinkConfig {
            max_in_flight: limit,
            ..Default::default()
        };
        let outcome = transfer_test(faults.clone(), config, payload_len)
            .await
            .with_context(|| format!("in-flight limit {:?}", limit))?;
        results.push((limit, outcome));
    }
    Ok(results)
}
