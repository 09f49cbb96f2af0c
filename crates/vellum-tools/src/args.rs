//! Argument groups shared by several binaries.

use clap::Args;
use vellum_pipeline::SauvolaConfig;

/// `-v/--verbose`.
#[derive(Debug, Clone, Copy, Args)]
pub struct Verbosity {
    /// Log progress at info level (overridden by `RUST_LOG`).
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

/// Sauvola window parameters.
#[derive(Debug, Clone, Copy, Args)]
pub struct SauvolaArgs {
    /// Analysis window size in pixels.
    #[arg(short = 'w', long, default_value_t = SauvolaConfig::DEFAULT_WINDOW_SIZE)]
    pub window_size: u32,

    /// Sauvola k.
    #[arg(short = 'k', long, alias = "k-param", default_value_t = SauvolaConfig::DEFAULT_K)]
    pub k: f64,

    /// Standard-deviation normalizer, as a multiple of 127.5.
    #[arg(short = 'r', long, default_value_t = SauvolaConfig::DEFAULT_R_SCALE)]
    pub r_scale: f64,
}

impl SauvolaArgs {
    /// Apply these values on top of `base`.
    #[must_use]
    pub fn apply(&self, base: SauvolaConfig) -> SauvolaConfig {
        SauvolaConfig {
            window_size: self.window_size,
            k: self.k,
            r_scale: self.r_scale,
            ..base
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        sauvola: SauvolaArgs,
        #[command(flatten)]
        verbosity: Verbosity,
    }

    #[test]
    fn defaults_match_config() {
        let h = Harness::try_parse_from(["t"]).unwrap();
        let config = h.sauvola.apply(SauvolaConfig::default());
        assert_eq!(config, SauvolaConfig::default());
        assert!(!h.verbosity.verbose);
    }

    #[test]
    fn short_flags_override() {
        let h = Harness::try_parse_from(["t", "-w", "31", "-k", "0.2", "-r", "1.5", "-v"]).unwrap();
        let config = h.sauvola.apply(SauvolaConfig::default());
        assert_eq!(config.window_size, 31);
        assert!((config.k - 0.2).abs() < f64::EPSILON);
        assert!((config.r_scale - 1.5).abs() < f64::EPSILON);
        assert!(h.verbosity.verbose);
    }
}
