//! Radio session configuration.

use std::time::Duration;

/// Tunables for a [`Radio`](crate::Radio) session.
///
/// ```
/// use indy_mac::RadioConfig;
/// use std::time::Duration;
///
/// let config = RadioConfig::default()
///     .poll_interval(Duration::from_millis(5))
///     .responsiveness_timeout(Some(Duration::from_secs(2)));
/// assert_eq!(config.get_poll_interval(), Duration::from_millis(5));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioConfig {
    poll_interval: Duration,
    responsiveness_timeout: Option<Duration>,
    legacy_firmware: Option<bool>,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            responsiveness_timeout: Some(Duration::from_secs(5)),
            legacy_firmware: None,
        }
    }
}

impl RadioConfig {
    /// Sleep between byte-availability checks while waiting for MAC data (default: 10ms).
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// How long the byte count may stay unchanged before the MAC is declared
    /// unresponsive (default: 5s). `None` disables the check.
    ///
    /// The check only applies to firmware 2.4 and later.
    pub fn responsiveness_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.responsiveness_timeout = timeout;
        self
    }

    /// Force the pre-2.4 firmware behavior on or off instead of deriving it
    /// from `MAC_VER`.
    pub fn legacy_firmware(mut self, legacy: bool) -> Self {
        self.legacy_firmware = Some(legacy);
        self
    }

    pub fn get_poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn get_responsiveness_timeout(&self) -> Option<Duration> {
        self.responsiveness_timeout
    }

    pub(crate) fn legacy_override(&self) -> Option<bool> {
        self.legacy_firmware
    }
}
