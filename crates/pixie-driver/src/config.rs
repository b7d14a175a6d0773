//! Protocol constants and system configuration
//!
//! Every iteration count and wait below was tuned against real modules.
//! They are kept as defaults rather than re-derived; override individual
//! fields only when bringing up unusual hardware.

use crate::timing::Delay;
use std::sync::Arc;

/// Environment variable that forces offline mode in [`SystemConfig::from_env`].
pub const OFFLINE_ENV: &str = "PIXIE_OFFLINE";

/// Hardware-tuned retry counts, poll bounds and waits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// Clear/program/verify cycles per FPGA before giving up.
    pub fpga_attempts: u32,
    /// INIT polls per cycle.
    pub fpga_init_polls: u32,
    /// Wait between INIT polls, and after the program strobe (µs).
    pub fpga_init_poll_interval_us: u64,
    /// Wait after each bitstream word (ns).
    pub fpga_word_delay_ns: u64,
    /// Settle time before the clock-manager reset strobe (ms).
    pub dcm_reset_settle_ms: u64,
    /// Full reset-to-power-up cycles for processor boot.
    pub dsp_boot_attempts: u32,
    /// Hold and release time around processor reset (ms).
    pub dsp_reset_hold_ms: u64,
    /// Retries when verifying a processor configuration register.
    pub dsp_register_retries: u32,
    /// Settle time after each zero-fill segment (ms).
    pub dsp_zero_settle_ms: u64,
    /// Polls of the power-up-init-done flag.
    pub power_up_polls: u32,
    /// Wait between power-up polls (ms).
    pub power_up_poll_interval_ms: u64,
    /// Watermark polls before a burst is abandoned.
    pub watermark_polls: u32,
    /// Vendor DMA transfer timeout (ms).
    pub dma_timeout_ms: u32,
    /// Largest processor-memory read moved by a single burst (words).
    pub dma_block_words: usize,
    /// Remainders shorter than this are read word by word.
    pub single_word_threshold: usize,
    /// Polls of the external-memory clear-active bit.
    pub clear_polls: u32,
    /// Wait before each clear-active poll (µs).
    pub clear_poll_interval_us: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            fpga_attempts: 10,
            fpga_init_polls: 100,
            fpga_init_poll_interval_us: 200,
            fpga_word_delay_ns: 2_000,
            dcm_reset_settle_ms: 10,
            dsp_boot_attempts: 10,
            dsp_reset_hold_ms: 1,
            dsp_register_retries: 5,
            dsp_zero_settle_ms: 2,
            power_up_polls: 10,
            power_up_poll_interval_ms: 1,
            watermark_polls: 1_000,
            dma_timeout_ms: 5_000,
            dma_block_words: 8_192,
            single_word_threshold: 48,
            clear_polls: 1_000,
            clear_poll_interval_us: 100,
        }
    }
}

/// Where protocol waits come from.
#[derive(Debug, Clone, Default)]
pub enum DelaySource {
    /// Calibrate a host spin loop at system init.
    #[default]
    Calibrated,
    /// Use a caller-supplied delay.
    Custom(Arc<dyn Delay>),
}

/// Configuration for [`System::init`](crate::System::init).
#[derive(Debug, Clone, Default)]
pub struct SystemConfig {
    /// Run without hardware: every hardware-touching call succeeds without
    /// reaching a register.
    pub offline: bool,
    /// Offline module variant (1..=7) selecting the reported ADC; `None`
    /// reports the default revision F / serial 1000 identity.
    pub offline_variant: Option<u8>,
    /// Protocol constants.
    pub protocol: ProtocolConfig,
    /// Delay source.
    pub delay: DelaySource,
}

impl SystemConfig {
    /// Default configuration with [`OFFLINE_ENV`] honoured.
    ///
    /// Any value other than empty, `0` or `false` selects offline mode.
    #[must_use]
    pub fn from_env() -> Self {
        let offline = std::env::var(OFFLINE_ENV).is_ok_and(|v| env_flag(&v));
        if offline {
            tracing::debug!("{OFFLINE_ENV} set, running offline");
        }
        Self::default().with_offline(offline)
    }

    /// Set offline mode.
    #[must_use]
    pub const fn with_offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    /// Select an offline module variant.
    #[must_use]
    pub const fn with_offline_variant(mut self, variant: u8) -> Self {
        self.offline_variant = Some(variant);
        self
    }

    /// Replace the protocol constants.
    #[must_use]
    pub fn with_protocol(mut self, protocol: ProtocolConfig) -> Self {
        self.protocol = protocol;
        self
    }

    /// Use a caller-supplied delay instead of host calibration.
    #[must_use]
    pub fn with_delay(mut self, delay: Arc<dyn Delay>) -> Self {
        self.delay = DelaySource::Custom(delay);
        self
    }
}

fn env_flag(value: &str) -> bool {
    !matches!(value.trim().to_ascii_lowercase().as_str(), "" | "0" | "false" | "no")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::NoDelay;

    #[test]
    fn test_defaults_match_hardware_tuning() {
        let p = ProtocolConfig::default();
        assert_eq!(p.fpga_attempts * p.fpga_init_polls, 1_000);
        assert_eq!(p.dma_timeout_ms, 5_000);
        assert_eq!(p.dma_block_words, 8_192);
        assert_eq!(p.single_word_threshold, 48);
        assert_eq!(p.watermark_polls, 1_000);
    }

    #[test]
    fn test_builder() {
        let cfg = SystemConfig::default()
            .with_offline(true)
            .with_offline_variant(3)
            .with_delay(Arc::new(NoDelay));
        assert!(cfg.offline);
        assert_eq!(cfg.offline_variant, Some(3));
        assert!(matches!(cfg.delay, DelaySource::Custom(_)));
    }

    #[test]
    fn test_env_flag() {
        assert!(env_flag("1"));
        assert!(env_flag("yes"));
        assert!(!env_flag("0"));
        assert!(!env_flag(" False "));
        assert!(!env_flag(""));
    }
}
