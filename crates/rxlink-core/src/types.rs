//! Shared value types.

use std::fmt;

/// Identifier of a tuner channel on the receiver.
///
/// Multi-channel receivers number their tuners from zero; the value is
/// carried verbatim in frequency commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TunerChannel(pub u32);

impl TunerChannel {
    /// Create a channel identifier from its numeric index.
    pub const fn new(index: u32) -> Self {
        TunerChannel(index)
    }

    /// The numeric index of this channel.
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl From<u32> for TunerChannel {
    fn from(index: u32) -> Self {
        TunerChannel(index)
    }
}

impl fmt::Display for TunerChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel {}", self.0)
    }
}

/// The last tuning request the device acknowledged for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrequencyTarget {
    /// Frequency in hertz.
    pub frequency_hz: u64,
    /// The channel the frequency applies to.
    pub channel: TunerChannel,
}

/// Format a frequency in hertz as MHz with six decimals, e.g. `1420.000000 MHz`.
pub fn format_freq_mhz(hz: u64) -> String {
    format!("{}.{:06} MHz", hz / 1_000_000, hz % 1_000_000)
}
