//! Receiver engine: verifies frames, acknowledges them, reassembles the stream.
//!
//! The end of a transfer is not signalled on the wire. The receiver treats a
//! channel read timeout as "the sender is done" and flushes what it holds.

use std::collections::BTreeMap;
use log::{debug, info, trace, warn};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use lossline_core::{decode_frame, encode_ack, Sequence};

use crate::channel::Datagram;
use crate::{GapPolicy, LinkConfig, LinkError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiveReport {
    /// Distinct sequence numbers stored.
    pub frames_accepted: u64,
    pub duplicates: u64,
    pub corrupt: u64,
    pub acks_sent: u64,
    pub bytes_written: usize,
    /// Sequences that never arrived but were skipped under `GapPolicy::Skip`.
    pub gaps: Vec<Sequence>,
}

/// Sparse sequence → payload map, flushed in ascending order.
#[derive(Debug, Default)]
pub struct ReassemblyBuffer {
    received: BTreeMap<Sequence, Vec<u8>>,
}

impl ReassemblyBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `payload` at `sequence`, replacing any earlier copy.
    /// Returns true if the slot was empty.
    pub fn store(&mut self, sequence: Sequence, payload: &[u8]) -> bool {
        self.received.insert(sequence, payload.to_vec()).is_none()
    }

    pub fn len(&self) -> usize {
        self.received.len()
    }

    pub fn is_empty(&self) -> bool {
        self.received.is_empty()
    }

    /// Unfilled slots below the highest sequence seen. Frames missing after
    /// the highest one cannot be detected.
    pub fn missing(&self) -> Vec<Sequence> {
        let Some(&last) = self.received.keys().next_back() else {
            return Vec::new();
        };
        (0..last)
            .filter(|sequence| !self.received.contains_key(sequence))
            .collect()
    }

    pub fn payloads(&self) -> impl Iterator<Item = &[u8]> {
        self.received.values().map(Vec::as_slice)
    }
}

pub struct Receiver<C> {
    channel: C,
    config: LinkConfig,
    buffer: ReassemblyBuffer,
}

impl<C: Datagram> Receiver<C> {
    pub fn new(channel: C, config: LinkConfig) -> Self {
        Self {
            channel,
            config,
            buffer: ReassemblyBuffer::new(),
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Frames held since the last successful flush.
    pub fn buffered(&self) -> &ReassemblyBuffer {
        &self.buffer
    }

    /// Receives until the channel goes quiet, then writes the reassembled
    /// stream to `output` once.
    ///
    /// If the flush fails, with `LinkError::Incomplete` or an I/O error, the
    /// frames stay buffered. Running again adds whatever arrives late and
    /// retries the flush.
    pub async fn run<W>(&mut self, output: &mut W) -> Result<ReceiveReport, LinkError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut report = ReceiveReport::default();

        loop {
            let raw = match self.channel.recv().await {
                Ok(raw) => raw,
                Err(LinkError::Timeout(idle)) => {
                    info!("No data for {:?}, treating as end of transfer", idle);
                    break;
                }
                Err(e) => return Err(e),
            };
            self.handle_datagram(&raw, &mut report).await;
        }

        flush(&self.buffer, self.config.gap_policy, output, &mut report).await?;
        self.buffer = ReassemblyBuffer::new();
        Ok(report)
    }

    async fn handle_datagram(&mut self, raw: &[u8], report: &mut ReceiveReport) {
        let frame = match decode_frame(raw) {
            Ok(frame) => frame,
            Err(e) => {
                report.corrupt += 1;
                debug!("Discarding frame: {}", e);
                return;
            }
        };

        // acknowledged every time, so a lost ack is covered by the next retransmission
        match self.channel.send(&encode_ack(frame.sequence)).await {
            Ok(()) => report.acks_sent += 1,
            Err(e) => warn!("Failed to send ack #{}: {}", frame.sequence, e),
        }

        if self.buffer.store(frame.sequence, frame.payload) {
            report.frames_accepted += 1;
            trace!("Stored frame #{} ({} bytes)", frame.sequence, frame.payload.len());
        } else {
            report.duplicates += 1;
            trace!("Duplicate frame #{}", frame.sequence);
        }
    }
}

async fn flush<W>(
    buffer: &ReassemblyBuffer,
    policy: GapPolicy,
    output: &mut W,
    report: &mut ReceiveReport,
) -> Result<(), LinkError>
where
    W: AsyncWrite + Unpin,
{
    let missing = buffer.missing();
    if !missing.is_empty() {
        match policy {
            GapPolicy::Fail => {
                warn!("Transfer ended with {} frames missing", missing.len());
                return Err(LinkError::Incomplete { missing });
            }
            GapPolicy::Skip => {
                for sequence in &missing {
                    warn!("Frame #{} never arrived, skipping", sequence);
                }
            }
        }
    }

    for payload in buffer.payloads() {
        output.write_all(payload).await?;
        report.bytes_written += payload.len();
    }
    output.flush().await?;
    report.gaps = missing;

    info!(
        "Flushed {} frames ({} bytes)",
        buffer.len(),
        report.bytes_written
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use lossline_core::{decode_ack, encode_frame};
    use crate::simulated::{FaultConfig, SimulatedChannel};

    fn quiet_pair() -> (SimulatedChannel, SimulatedChannel) {
        SimulatedChannel::pair(FaultConfig {
            recv_timeout: Duration::from_millis(50),
            ..Default::default()
        })
    }

    #[test]
    fn test_buffer_orders_and_overwrites() {
        let mut buffer = ReassemblyBuffer::new();
        assert!(buffer.store(1, b"world"));
        assert!(buffer.store(0, b"hello "));
        assert!(!buffer.store(1, b"WORLD"));

        let joined: Vec<u8> = buffer.payloads().flatten().copied().collect();
        assert_eq!(joined, b"hello WORLD");
        assert!(buffer.missing().is_empty());
    }

    #[test]
    fn test_buffer_reports_interior_gaps() {
        let mut buffer = ReassemblyBuffer::new();
        assert!(buffer.missing().is_empty());
        buffer.store(1, b"b");
        buffer.store(4, b"e");
        assert_eq!(buffer.missing(), vec![0, 2, 3]);
    }

    #[tokio::test]
    async fn test_duplicate_frame_stored_once_acked_twice() {
        let (receiver_end, sender_end) = quiet_pair();
        let mut receiver = Receiver::new(receiver_end, LinkConfig::default());

        let frame = encode_frame(0, b"only once");
        sender_end.send(&frame).await.unwrap();
        sender_end.send(&frame).await.unwrap();

        let mut output = Vec::new();
        let report = receiver.run(&mut output).await.unwrap();

        assert_eq!(output, b"only once");
        assert_eq!(report.frames_accepted, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.acks_sent, 2);

        for _ in 0..2 {
            let ack = sender_end.recv().await.unwrap();
            assert_eq!(decode_ack(&ack).unwrap().sequence, 0);
        }
    }

    #[tokio::test]
    async fn test_corrupt_frames_are_not_acknowledged() {
        let (receiver_end, sender_end) = quiet_pair();
        let mut receiver = Receiver::new(receiver_end, LinkConfig::default());

        let mut bad = encode_frame(0, b"damaged");
        bad[2] ^= 0x10;
        sender_end.send(&bad).await.unwrap();
        sender_end.send(b"tiny").await.unwrap();
        sender_end.send(&encode_frame(0, b"intact")).await.unwrap();

        let mut output = Vec::new();
        let report = receiver.run(&mut output).await.unwrap();

        assert_eq!(output, b"intact");
        assert_eq!(report.corrupt, 2);
        assert_eq!(report.acks_sent, 1);
        assert!(sender_end.recv().await.is_ok());
        assert!(sender_end.recv().await.is_err());
    }

    #[tokio::test]
    async fn test_reorders_out_of_order_frames() {
        let (receiver_end, sender_end) = quiet_pair();
        let mut receiver = Receiver::new(receiver_end, LinkConfig::default());

        sender_end.send(&encode_frame(2, b"c")).await.unwrap();
        sender_end.send(&encode_frame(0, b"a")).await.unwrap();
        sender_end.send(&encode_frame(1, b"b")).await.unwrap();

        let mut output = Vec::new();
        let report = receiver.run(&mut output).await.unwrap();
        assert_eq!(output, b"abc");
        assert_eq!(report.bytes_written, 3);
    }

    #[tokio::test]
    async fn test_gap_fails_by_default() {
        let (receiver_end, sender_end) = quiet_pair();
        let mut receiver = Receiver::new(receiver_end, LinkConfig::default());

        sender_end.send(&encode_frame(0, b"a")).await.unwrap();
        sender_end.send(&encode_frame(2, b"c")).await.unwrap();

        let mut output = Vec::new();
        match receiver.run(&mut output).await {
            Err(LinkError::Incomplete { missing }) => assert_eq!(missing, vec![1]),
            other => panic!("expected incomplete transfer, got {:?}", other),
        }
        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_frames_for_next_run() {
        let (receiver_end, sender_end) = quiet_pair();
        let mut receiver = Receiver::new(receiver_end, LinkConfig::default());

        sender_end.send(&encode_frame(0, b"a")).await.unwrap();
        sender_end.send(&encode_frame(2, b"c")).await.unwrap();

        let mut output = Vec::new();
        assert!(matches!(
            receiver.run(&mut output).await,
            Err(LinkError::Incomplete { .. })
        ));
        assert_eq!(receiver.buffered().len(), 2);

        // the missing frame turns up on a retransmission
        sender_end.send(&encode_frame(1, b"b")).await.unwrap();
        let report = receiver.run(&mut output).await.unwrap();

        assert_eq!(output, b"abc");
        assert_eq!(report.bytes_written, 3);
        assert!(receiver.buffered().is_empty());
    }

    #[tokio::test]
    async fn test_gap_skipped_when_allowed() {
        let (receiver_end, sender_end) = quiet_pair();
        let config = LinkConfig {
            gap_policy: GapPolicy::Skip,
            ..Default::default()
        };
        let mut receiver = Receiver::new(receiver_end, config);

        sender_end.send(&encode_frame(0, b"a")).await.unwrap();
        sender_end.send(&encode_frame(2, b"c")).await.unwrap();

        let mut output = Vec::new();
        let report = receiver.run(&mut output).await.unwrap();
        assert_eq!(output, b"ac");
        assert_eq!(report.gaps, vec![1]);
    }

    #[tokio::test]
    async fn test_silence_flushes_nothing() {
        let (receiver_end, _sender_end) = quiet_pair();
        let mut receiver = Receiver::new(receiver_end, LinkConfig::default());

        let mut output = Vec::new();
        let report = receiver.run(&mut output).await.unwrap();
        assert!(output.is_empty());
        assert_eq!(report, ReceiveReport::default());
    }
}
