//! CLI surface (spec.md §6). Everything after the kernel-bypass framework's
//! own `--` argument separator; framework arguments precede it and are not
//! modeled here (spec.md §1 treats framework init as an external
//! collaborator). Styled after `samply/src/cli.rs`: doc comments become
//! `--help` text, `clap` derive macros do the parsing.

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "bbo-ingest",
    version,
    about = "Kernel-bypass ingest core: raw Ethernet frames to normalized BBO records in a shared-memory ring."
)]
pub struct Opt {
    /// NIC port id.
    #[arg(short = 'p', long, default_value_t = 0)]
    pub port: u16,

    /// RX queue id.
    #[arg(short = 'q', long, default_value_t = 0)]
    pub queue: u16,

    /// Filter UDP destination port.
    #[arg(short = 'u', long = "udp-port", default_value_t = 12345)]
    pub udp_port: u16,

    /// Pin to CPU core (-1 = none).
    #[arg(short = 'c', long, default_value_t = -1)]
    pub core: i32,

    /// Shared-memory name suffix.
    #[arg(short = 's', long, default_value = "gateway")]
    pub shm: String,

    /// Synthetic warm-up packet count.
    #[arg(short = 'w', long, default_value_t = 1000)]
    pub warmup: i32,

    /// Skip warm-up.
    #[arg(short = 'n', long = "no-warmup", default_value_t = false)]
    pub no_warmup: bool,

    /// Periodic (5s) stats print.
    #[arg(short = 'b', long, default_value_t = false)]
    pub benchmark: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let opt = Opt::parse_from(["bbo-ingest"]);
        assert_eq!(opt.port, 0);
        assert_eq!(opt.queue, 0);
        assert_eq!(opt.udp_port, 12345);
        assert_eq!(opt.core, -1);
        assert_eq!(opt.shm, "gateway");
        assert_eq!(opt.warmup, 1000);
        assert!(!opt.no_warmup);
        assert!(!opt.benchmark);
    }

    #[test]
    fn long_flags_override_defaults() {
        let opt = Opt::parse_from([
            "bbo-ingest",
            "--port",
            "1",
            "--udp-port",
            "9999",
            "--core",
            "3",
            "--shm",
            "custom",
            "--no-warmup",
            "--benchmark",
        ]);
        assert_eq!(opt.port, 1);
        assert_eq!(opt.udp_port, 9999);
        assert_eq!(opt.core, 3);
        assert_eq!(opt.shm, "custom");
        assert!(opt.no_warmup);
        assert!(opt.benchmark);
    }

    #[test]
    fn short_flags_work() {
        let opt = Opt::parse_from(["bbo-ingest", "-p", "2", "-u", "1", "-c", "5"]);
        assert_eq!(opt.port, 2);
        assert_eq!(opt.udp_port, 1);
        assert_eq!(opt.core, 5);
    }
}
