//! Resolved engine configuration, built once from [`crate::cli::Opt`] and
//! thereafter read-only — the same "parse once, validate, hand a plain
//! struct to the engine" shape as the teacher's
//! `shared/recording_props.rs`.

use crate::cli::Opt;
use crate::error::InitError;
use crate::pool::DEFAULT_POOL_SIZE;
use crate::ring::DEFAULT_RING_CAPACITY;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub port: u16,
    pub queue: u16,
    pub udp_port: u16,
    pub core: Option<u32>,
    pub shm_name: String,
    pub warmup_packets: usize,
    pub skip_warmup: bool,
    pub benchmark: bool,
    pub pool_capacity: usize,
    pub ring_capacity: usize,
}

impl EngineConfig {
    pub fn from_opt(opt: &Opt) -> Result<Self, InitError> {
        let core = match opt.core {
            c if c < 0 => None,
            c => Some(c as u32),
        };
        let warmup_packets = if opt.no_warmup {
            0
        } else {
            usize::try_from(opt.warmup)
                .map_err(|_| InitError::InvalidConfig("--warmup must not be negative"))?
        };

        Ok(EngineConfig {
            port: opt.port,
            queue: opt.queue,
            udp_port: opt.udp_port,
            core,
            shm_name: opt.shm.clone(),
            warmup_packets,
            skip_warmup: opt.no_warmup,
            benchmark: opt.benchmark,
            pool_capacity: DEFAULT_POOL_SIZE,
            ring_capacity: DEFAULT_RING_CAPACITY,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_core_means_no_pinning() {
        let opt = Opt::parse_from_args(["-c", "-1"]);
        let cfg = EngineConfig::from_opt(&opt).unwrap();
        assert_eq!(cfg.core, None);
    }

    #[test]
    fn positive_core_is_preserved() {
        let opt = Opt::parse_from_args(["-c", "3"]);
        let cfg = EngineConfig::from_opt(&opt).unwrap();
        assert_eq!(cfg.core, Some(3));
    }

    #[test]
    fn no_warmup_flag_zeroes_warmup_packets() {
        let opt = Opt::parse_from_args(["--no-warmup"]);
        let cfg = EngineConfig::from_opt(&opt).unwrap();
        assert_eq!(cfg.warmup_packets, 0);
        assert!(cfg.skip_warmup);
    }

    #[test]
    fn default_warmup_matches_spec() {
        let opt = Opt::parse_from_args([]);
        let cfg = EngineConfig::from_opt(&opt).unwrap();
        assert_eq!(cfg.warmup_packets, 1000);
    }
}

#[cfg(test)]
impl Opt {
    fn parse_from_args<I, T>(args: I) -> Opt
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        use clap::Parser;
        let mut full = vec![std::ffi::OsString::from("bbo-ingest")];
        full.extend(args.into_iter().map(Into::into));
        Opt::parse_from(full)
    }
}
