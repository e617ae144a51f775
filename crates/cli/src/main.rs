//! Command line front end: moves stdin to stdout across two hosts over UDP.
//!
//! The receiver listens on 50005 and answers on 50006 by default; the sender
//! is the mirror image, so both ends can run with no flags on one machine.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroUsize;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;
use tokio::io::AsyncReadExt;

use lossline_link::{
    EchoReceiver, EchoSender, GapPolicy, LinkConfig, Receiver, Sender, UdpChannel,
};

const RECEIVER_INBOUND: u16 = 50005;
const RECEIVER_OUTBOUND: u16 = 50006;

/// Reliable byte stream over a lossy UDP path.
#[derive(Parser)]
#[command(name = "lossline", author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Read stdin and send it until every frame is acknowledged.
    Send {
        #[command(flatten)]
        endpoint: Endpoint,
        /// Delay before an unacknowledged frame is sent again.
        #[arg(long, default_value_t = 5)]
        retransmit_ms: u64,
        /// Frames outstanding at once (at least 1); unlimited when omitted.
        #[arg(long)]
        max_in_flight: Option<NonZeroUsize>,
        /// Give up if the whole transfer takes longer than this.
        #[arg(long)]
        session_timeout_secs: Option<u64>,
    },
    /// Receive a stream and write it to stdout once the sender goes quiet.
    Recv {
        #[command(flatten)]
        endpoint: Endpoint,
        /// Write what arrived even if frames are missing in between.
        #[arg(long)]
        allow_gaps: bool,
    },
    /// Baseline: send stdin as one datagram until anything comes back.
    EchoSend {
        #[command(flatten)]
        endpoint: Endpoint,
    },
    /// Baseline: write every datagram to stdout and reply to each.
    EchoRecv {
        #[command(flatten)]
        endpoint: Endpoint,
    },
}

#[derive(Args)]
struct Endpoint {
    /// Local port to receive on.
    #[arg(long)]
    inbound_port: Option<u16>,
    /// Peer port to send to.
    #[arg(long)]
    outbound_port: Option<u16>,
    /// Peer host.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    host: IpAddr,
    /// Seconds of silence before a read gives up.
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,
}

#[derive(Clone, Copy)]
enum Role {
    Sending,
    Receiving,
}

impl Endpoint {
    async fn open(&self, role: Role) -> Result<UdpChannel> {
        let (inbound, outbound) = match role {
            Role::Receiving => (RECEIVER_INBOUND, RECEIVER_OUTBOUND),
            Role::Sending => (RECEIVER_OUTBOUND, RECEIVER_INBOUND),
        };
        let local = SocketAddr::new(
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            self.inbound_port.unwrap_or(inbound),
        );
        let peer = SocketAddr::new(self.host, self.outbound_port.unwrap_or(outbound));

        info!("Receiving on port {} and sending to {}", local.port(), peer);
        UdpChannel::bind(local, peer, Duration::from_secs(self.timeout_secs))
            .await
            .with_context(|| format!("failed to bind {}", local))
    }
}

async fn read_stdin() -> Result<Vec<u8>> {
    let mut data = Vec::new();
    tokio::io::stdin()
        .read_to_end(&mut data)
        .await
        .context("failed to read stdin")?;
    Ok(data)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Send {
            endpoint,
            retransmit_ms,
            max_in_flight,
            session_timeout_secs,
        } => {
            let config = LinkConfig {
                retransmit_interval: Duration::from_millis(retransmit_ms),
                max_in_flight,
                session_timeout: session_timeout_secs.map(Duration::from_secs),
                ..Default::default()
            };
            let data = read_stdin().await?;
            let channel = endpoint.open(Role::Sending).await?;
            let report = Sender::new(channel, config)
                .send(&data)
                .await
                .context("transfer failed")?;
            info!(
                "Sent {} bytes in {} frames, {} transmissions, {:?}",
                report.bytes, report.frames, report.transmissions, report.elapsed
            );
        }
        Mode::Recv {
            endpoint,
            allow_gaps,
        } => {
            let config = LinkConfig {
                gap_policy: if allow_gaps { GapPolicy::Skip } else { GapPolicy::Fail },
                ..Default::default()
            };
            let channel = endpoint.open(Role::Receiving).await?;
            let mut stdout = tokio::io::stdout();
            let report = Receiver::new(channel, config)
                .run(&mut stdout)
                .await
                .context("receive failed")?;
            info!(
                "Wrote {} bytes from {} frames ({} duplicates, {} corrupt)",
                report.bytes_written, report.frames_accepted, report.duplicates, report.corrupt
            );
        }
        Mode::EchoSend { endpoint } => {
            let data = read_stdin().await?;
            let channel = endpoint.open(Role::Sending).await?;
            let attempts = EchoSender::new(channel).send(&data).await?;
            info!("Echo delivered after {} attempts", attempts);
        }
        Mode::EchoRecv { endpoint } => {
            let channel = endpoint.open(Role::Receiving).await?;
            let mut stdout = tokio::io::stdout();
            let written = EchoReceiver::new(channel).run(&mut stdout).await?;
            info!("Echo wrote {} bytes", written);
        }
    }

    Ok(())
}
