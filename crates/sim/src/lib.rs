//! simulation tools for Lossline

pub mod scenarios;

use std::time::Duration;
use lossline_link::FaultConfig;

pub struct ChannelPresets;

impl ChannelPresets {
    pub fn lossless() -> FaultConfig {
        FaultConfig::default()
    }

    pub fn lossy() -> FaultConfig {
        FaultConfig {
            drop_rate: 0.10,
            latency: Duration::from_millis(10),
            latency_jitter: Duration::from_millis(5),
            ..Default::default()
        }
    }

    pub fn noisy() -> FaultConfig {
        FaultConfig {
            drop_rate: 0.05,
            corrupt_rate: 0.20,
            duplicate_rate: 0.05,
            latency: Duration::from_millis(20),
            latency_jitter: Duration::from_millis(10),
            ..Default::default()
        }
    }

    /// Heavy loss, bit flips, duplicates and reordering all at once.
    pub fn hostile() -> FaultConfig {
        FaultConfig {
            drop_rate: 0.40,
            corrupt_rate: 0.20,
            duplicate_rate: 0.20,
            latency: Duration::from_millis(50),
            latency_jitter: Duration::from_millis(50),
            ..Default::default()
        }
    }

    pub fn all() -> Vec<(&'static str, FaultConfig)> {
        vec![
            ("lossless", Self::lossless()),
            ("lossy", Self::lossy()),
            ("noisy", Self::noisy()),
            ("hostile", Self::hostile()),
        ]
    }

    pub fn by_name(name: &str) -> Option<FaultConfig> {
        Self::all()
            .into_iter()
            .find(|(preset, _)| *preset == name)
            .map(|(_, config)| config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fault_rate(config: &FaultConfig) -> f32 {
        config.drop_rate + config.corrupt_rate + config.duplicate_rate
    }

    #[test]
    fn test_presets_get_harsher() {
        let rates: Vec<f32> = ChannelPresets::all()
            .iter()
            .map(|(_, config)| fault_rate(config))
            .collect();
        assert!(rates.windows(2).all(|pair| pair[0] < pair[1]), "{:?}", rates);
        // every preset must still let a transfer converge
        assert!(ChannelPresets::all()
            .iter()
            .all(|(_, config)| config.drop_rate < 1.0));
    }

    #[test]
    fn test_lookup_by_name() {
        assert_eq!(ChannelPresets::by_name("noisy").unwrap().corrupt_rate, 0.20);
        assert!(ChannelPresets::by_name("solar storm").is_none());
    }
}
