//! transfer simulation for Lossline

use std::num::NonZeroUsize;

use anyhow::Result;
use colored::Colorize;
use lossline_core::MAX_PAYLOAD;
use lossline_link::LinkConfig;
use lossline_sim::{scenarios, ChannelPresets};

const PAYLOAD_LEN: usize = 64 * MAX_PAYLOAD + 100;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    println!("{}", "Lossline Transfer Simulation".bright_blue().bold());
    println!("{}", "============================".bright_blue());
    println!("Payload: {} bytes ({} byte frames)", PAYLOAD_LEN, MAX_PAYLOAD);

    for (name, faults) in ChannelPresets::all() {
        println!("{}", format!("\n>>> Channel: {}", name).bright_green().bold());
        println!(
            "Loss: {}%  Corruption: {}%  Duplication: {}%  Latency: {:?} (+{:?} jitter)",
            (faults.drop_rate * 100.0) as u32,
            (faults.corrupt_rate * 100.0) as u32,
            (faults.duplicate_rate * 100.0) as u32,
            faults.latency,
            faults.latency_jitter,
        );

        let outcome = scenarios::transfer_test(faults.clone(), LinkConfig::default(), PAYLOAD_LEN).await?;
        let verdict = if outcome.intact {
            "✓ output matches input".bright_green()
        } else {
            "✗ output differs from input".bright_red()
        };
        println!("{}", verdict);
        println!(
            "  frames: {}  transmissions: {}  retransmissions: {}",
            outcome.sent.frames, outcome.sent.transmissions, outcome.sent.retransmissions
        );
        println!(
            "  acks: {} duplicate, {} recovered, {} rejected",
            outcome.sent.duplicate_acks, outcome.sent.recovered_acks, outcome.sent.rejected_acks
        );
        println!(
            "  receiver: {} accepted, {} duplicate, {} corrupt",
            outcome.received.frames_accepted, outcome.received.duplicates, outcome.received.corrupt
        );
        println!(
            "  channel: {} → ({} dropped, {} corrupted), {} ← ({} dropped, {} corrupted)",
            outcome.forward.datagrams_sent,
            outcome.forward.datagrams_dropped,
            outcome.forward.datagrams_corrupted,
            outcome.backward.datagrams_sent,
            outcome.backward.datagrams_dropped,
            outcome.backward.datagrams_corrupted,
        );
        println!("  elapsed: {:?}", outcome.sent.elapsed);

        let echo = scenarios::echo_baseline_test(faults, PAYLOAD_LEN).await?;
        println!(
            "  echo baseline: {} attempts, {} bytes written, {}",
            echo.attempts,
            echo.bytes_written,
            if echo.intact { "intact".green() } else { "damaged".red() }
        );
    }

    println!("{}", "\n>>> In-flight limit sweep (lossy)".bright_yellow().bold());
    let limits = [None, NonZeroUsize::new(1), NonZeroUsize::new(4), NonZeroUsize::new(16)];
    for (limit, outcome) in scenarios::in_flight_sweep(ChannelPresets::lossy(), &limits, PAYLOAD_LEN).await? {
        let label = limit.map_or_else(|| "unlimited".to_string(), |n| n.to_string());
        println!(
            "  {:>9}: {:?}, {} retransmissions",
            label, outcome.sent.elapsed, outcome.sent.retransmissions
        );
    }

    println!("\n{}", "All simulations complete!".bright_green().bold());
    Ok(())
}
