//! Sender engine: frames a payload, retransmits on a timer, collects acks.
//!
//! Two tasks share one `TransferSession` behind a mutex. The retransmit task
//! pops due frames and re-sends anything still unacknowledged. The calling
//! task reads acks and marks frames done. Every decision about a frame is
//! made under the lock, so an ack seen by one side is visible to the other
//! before it acts.

use std::num::NonZeroUsize;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use bytes::Bytes;
use log::{debug, error, info, trace, warn};
use tokio::sync::{watch, Mutex, Notify};
use tokio::time::{sleep_until, timeout, Instant};

use lossline_core::{decode_ack, encode_frame, Sequence, MAX_PAYLOAD};

use crate::channel::Datagram;
use crate::scheduler::RetransmitScheduler;
use crate::{LinkConfig, LinkError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferReport {
    pub frames: usize,
    pub bytes: usize,
    pub transmissions: u64,
    pub retransmissions: u64,
    pub duplicate_acks: u64,
    /// Acks accepted with fewer than all replicas intact.
    pub recovered_acks: u64,
    /// Acks discarded as corrupt or out of range.
    pub rejected_acks: u64,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, Default)]
struct AckCounters {
    duplicate: u64,
    recovered: u64,
    rejected: u64,
}

#[derive(Debug, PartialEq, Eq)]
enum AckOutcome {
    New,
    Duplicate,
    OutOfRange,
}

enum Step {
    Transmit(Sequence, Bytes),
    SleepUntil(Instant),
    Idle,
    Stalled(usize),
}

/// Frames, ack flags and the retransmit queue for one sender.
///
/// `frames`, `acknowledged` and `attempts` are indexed by sequence number and
/// always have the same length. An acknowledged flag never goes back to false.
#[derive(Debug, Default)]
struct TransferSession {
    frames: Vec<Bytes>,
    acknowledged: Vec<bool>,
    attempts: Vec<u32>,
    acknowledged_count: usize,
    /// Frames `[0, admitted)` have entered the retransmit queue.
    admitted: usize,
    scheduler: RetransmitScheduler,
    acks: AckCounters,
}

impl TransferSession {
    fn push_payload(&mut self, payload: &[u8]) -> Range<usize> {
        let first = self.frames.len();
        assert!(
            first + lossline_core::types::frame_count(payload.len()) <= Sequence::MAX as usize,
            "session exhausted the sequence space"
        );

        for (i, chunk) in payload.chunks(MAX_PAYLOAD).enumerate() {
            let sequence = (first + i) as Sequence;
            self.frames.push(Bytes::from(encode_frame(sequence, chunk)));
            self.acknowledged.push(false);
            self.attempts.push(0);
        }
        first..self.frames.len()
    }

    fn in_flight(&self) -> usize {
        self.admitted - self.acknowledged_count
    }

    /// Moves frames into the retransmit queue while the in-flight limit allows.
    fn admit(&mut self, now: Instant, max_in_flight: Option<NonZeroUsize>) -> usize {
        let mut admitted = 0;
        while self.admitted < self.frames.len()
            && max_in_flight.map_or(true, |limit| self.in_flight() < limit.get())
        {
            self.scheduler.schedule(self.admitted as Sequence, now);
            self.admitted += 1;
            admitted += 1;
        }
        admitted
    }

    /// Only admitted frames can be acknowledged; an ack for a frame that was
    /// never sent is out of range and leaves it pending.
    fn acknowledge(&mut self, sequence: Sequence) -> AckOutcome {
        let index = sequence as usize;
        if index >= self.admitted {
            return AckOutcome::OutOfRange;
        }
        match self.acknowledged.get_mut(index) {
            None => AckOutcome::OutOfRange,
            Some(true) => AckOutcome::Duplicate,
            Some(flag) => {
                *flag = true;
                self.acknowledged_count += 1;
                AckOutcome::New
            }
        }
    }

    fn next_step(&mut self, now: Instant, interval: Duration) -> Step {
        while let Some(sequence) = self.scheduler.pop_due(now) {
            let index = sequence as usize;
            if self.acknowledged[index] {
                trace!("Dropping job for acknowledged frame {}", sequence);
                continue;
            }
            self.scheduler.schedule(sequence, now + interval);
            self.attempts[index] += 1;
            return Step::Transmit(sequence, self.frames[index].clone());
        }

        match self.scheduler.next_deadline() {
            Some(deadline) => Step::SleepUntil(deadline),
            None if self.in_flight() > 0 => Step::Stalled(self.in_flight()),
            None => Step::Idle,
        }
    }

    fn is_complete(&self) -> bool {
        self.acknowledged_count == self.frames.len()
    }

    fn report(&self, range: Range<usize>, bytes: usize, acks_before: AckCounters, elapsed: Duration) -> TransferReport {
        let attempts = &self.attempts[range.clone()];
        TransferReport {
            frames: range.len(),
            bytes,
            transmissions: attempts.iter().map(|&n| u64::from(n)).sum(),
            retransmissions: attempts.iter().map(|&n| u64::from(n.saturating_sub(1))).sum(),
            duplicate_acks: self.acks.duplicate - acks_before.duplicate,
            recovered_acks: self.acks.recovered - acks_before.recovered,
            rejected_acks: self.acks.rejected - acks_before.rejected,
            elapsed,
        }
    }
}

pub struct Sender<C> {
    channel: Arc<C>,
    config: LinkConfig,
    session: Arc<Mutex<TransferSession>>,
    wake: Arc<Notify>,
}

impl<C: Datagram + 'static> Sender<C> {
    pub fn new(channel: C, config: LinkConfig) -> Self {
        Self {
            channel: Arc::new(channel),
            config,
            session: Arc::new(Mutex::new(TransferSession::default())),
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// `(acknowledged, total)` frames over the whole session.
    pub async fn progress(&self) -> (usize, usize) {
        let session = self.session.lock().await;
        (session.acknowledged_count, session.frames.len())
    }

    /// Sends `payload` and resolves once every frame of it is acknowledged.
    ///
    /// Repeated calls extend the same session; sequence numbers continue
    /// where the previous call stopped.
    pub async fn send(&mut self, payload: &[u8]) -> Result<TransferReport, LinkError> {
        let started = Instant::now();

        let (range, acks_before) = {
            let mut session = self.session.lock().await;
            let acks_before = session.acks;
            let range = session.push_payload(payload);
            session.admit(started, self.config.max_in_flight);
            (range, acks_before)
        };

        if range.is_empty() {
            debug!("Nothing to send");
            return Ok(TransferReport::default());
        }

        info!(
            "Sending {} bytes as {} frames (sequences {}..{})",
            payload.len(),
            range.len(),
            range.start,
            range.end
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut retransmit = tokio::spawn(retransmit_loop(
            Arc::clone(&self.channel),
            Arc::clone(&self.session),
            Arc::clone(&self.wake),
            self.config.retransmit_interval,
            stop_rx,
        ));

        let mut retransmit_done = false;
        let outcome = tokio::select! {
            acked = self.collect_acks(started) => acked,
            finished = &mut retransmit => {
                retransmit_done = true;
                match finished {
                    Ok(Ok(())) => self.collect_acks(started).await,
                    Ok(Err(e)) => Err(e),
                    Err(e) => Err(LinkError::TaskFailed(e)),
                }
            }
        };

        let _ = stop_tx.send(true);
        if !retransmit_done {
            if let Ok(Err(e)) = retransmit.await {
                debug!("Retransmit task ended with {} after completion", e);
            }
        }
        outcome?;

        let report = self
            .session
            .lock()
            .await
            .report(range, payload.len(), acks_before, started.elapsed());
        info!(
            "All {} frames acknowledged in {:?} ({} retransmissions)",
            report.frames, report.elapsed, report.retransmissions
        );
        Ok(report)
    }

    async fn collect_acks(&self, started: Instant) -> Result<(), LinkError> {
        loop {
            if self.session.lock().await.is_complete() {
                return Ok(());
            }

            let received = match self.config.session_timeout {
                None => self.channel.recv().await,
                Some(limit) => match limit.checked_sub(started.elapsed()).filter(|r| !r.is_zero()) {
                    Some(remaining) => timeout(remaining, self.channel.recv())
                        .await
                        .unwrap_or(Err(LinkError::Timeout(remaining))),
                    None => return Err(self.expired(started).await),
                },
            };

            let raw = match received {
                Ok(raw) => raw,
                Err(LinkError::Timeout(waited)) => {
                    debug!("No ack within {:?}, still waiting", waited);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let vote = decode_ack(&raw);
            let mut session = self.session.lock().await;
            let vote = match vote {
                Ok(vote) => vote,
                Err(e) => {
                    session.acks.rejected += 1;
                    debug!("Ignoring ack: {}", e);
                    continue;
                }
            };

            if vote.is_partial() {
                session.acks.recovered += 1;
                info!("Recovered ack #{} from {} intact replicas", vote.sequence, vote.votes);
            }

            match session.acknowledge(vote.sequence) {
                AckOutcome::New => {
                    trace!("Received ack #{}", vote.sequence);
                    if session.admit(Instant::now(), self.config.max_in_flight) > 0 {
                        self.wake.notify_one();
                    }
                }
                AckOutcome::Duplicate => {
                    session.acks.duplicate += 1;
                    trace!("Duplicate ack #{}", vote.sequence);
                }
                AckOutcome::OutOfRange => {
                    session.acks.rejected += 1;
                    warn!("Ack #{} names no frame of this session", vote.sequence);
                }
            }
        }
    }

    async fn expired(&self, started: Instant) -> LinkError {
        let session = self.session.lock().await;
        LinkError::SessionExpired {
            elapsed: started.elapsed(),
            acknowledged: session.acknowledged_count,
            total: session.frames.len(),
        }
    }
}

async fn retransmit_loop<C: Datagram>(
    channel: Arc<C>,
    session: Arc<Mutex<TransferSession>>,
    wake: Arc<Notify>,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) -> Result<(), LinkError> {
    loop {
        if *stop.borrow() {
            return Ok(());
        }

        let step = session.lock().await.next_step(Instant::now(), interval);
        match step {
            Step::Transmit(sequence, frame) => {
                debug!("Sending frame #{} ({} bytes)", sequence, frame.len());
                channel.send(&frame).await?;
            }
            Step::SleepUntil(deadline) => {
                tokio::select! {
                    _ = sleep_until(deadline) => {}
                    _ = wake.notified() => {}
                    changed = stop.changed() => if changed.is_err() { return Ok(()); },
                }
            }
            Step::Idle => {
                tokio::select! {
                    _ = wake.notified() => {}
                    changed = stop.changed() => if changed.is_err() { return Ok(()); },
                }
            }
            Step::Stalled(unacknowledged) => {
                error!("Retransmit queue drained with {} frames unacknowledged", unacknowledged);
                return Err(LinkError::SchedulerStalled { unacknowledged });
            }
        }
    }
}
