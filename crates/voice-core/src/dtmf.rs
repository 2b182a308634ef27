//! DTMF tones
//!
//! Keypad tones that can be sent into an active call. The signaling engine
//! decides how they travel (RFC 4733 telephone-events or SIP INFO); the
//! controller only hands over the digit and the timing preferences.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A single DTMF tone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dtmf {
    /// Digit 0
    Zero,
    /// Digit 1
    One,
    /// Digit 2
    Two,
    /// Digit 3
    Three,
    /// Digit 4
    Four,
    /// Digit 5
    Five,
    /// Digit 6
    Six,
    /// Digit 7
    Seven,
    /// Digit 8
    Eight,
    /// Digit 9
    Nine,
    /// `*`
    Star,
    /// `#`
    Pound,
    /// Extended tone A
    A,
    /// Extended tone B
    B,
    /// Extended tone C
    C,
    /// Extended tone D
    D,
}

impl Dtmf {
    /// The keypad character for this tone
    pub fn as_char(self) -> char {
        match self {
            Dtmf::Zero => '0',
            Dtmf::One => '1',
            Dtmf::Two => '2',
            Dtmf::Three => '3',
            Dtmf::Four => '4',
            Dtmf::Five => '5',
            Dtmf::Six => '6',
            Dtmf::Seven => '7',
            Dtmf::Eight => '8',
            Dtmf::Nine => '9',
            Dtmf::Star => '*',
            Dtmf::Pound => '#',
            Dtmf::A => 'A',
            Dtmf::B => 'B',
            Dtmf::C => 'C',
            Dtmf::D => 'D',
        }
    }

    /// Parse a keypad character. Letters are case-insensitive.
    pub fn from_char(c: char) -> Option<Self> {
        let tone = match c.to_ascii_uppercase() {
            '0' => Dtmf::Zero,
            '1' => Dtmf::One,
            '2' => Dtmf::Two,
            '3' => Dtmf::Three,
            '4' => Dtmf::Four,
            '5' => Dtmf::Five,
            '6' => Dtmf::Six,
            '7' => Dtmf::Seven,
            '8' => Dtmf::Eight,
            '9' => Dtmf::Nine,
            '*' => Dtmf::Star,
            '#' => Dtmf::Pound,
            'A' => Dtmf::A,
            'B' => Dtmf::B,
            'C' => Dtmf::C,
            'D' => Dtmf::D,
            _ => return None,
        };
        Some(tone)
    }

    /// The numeric digit, for tones `0`-`9`
    pub fn digit(self) -> Option<u8> {
        self.as_char().to_digit(10).map(|d| d as u8)
    }
}

impl fmt::Display for Dtmf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

impl TryFrom<char> for Dtmf {
    type Error = InvalidDtmf;

    fn try_from(c: char) -> Result<Self, Self::Error> {
        Dtmf::from_char(c).ok_or(InvalidDtmf(c))
    }
}

impl FromStr for Dtmf {
    type Err = InvalidDtmf;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Dtmf::try_from(c),
            (Some(c), Some(_)) => Err(InvalidDtmf(c)),
            (None, _) => Err(InvalidDtmf(' ')),
        }
    }
}

/// A character that is not a DTMF tone
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("'{0}' is not a DTMF tone")]
pub struct InvalidDtmf(pub char);

/// How a tone travels to the remote party
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DtmfTransport {
    /// Out-of-band via SIP INFO
    Info,
    /// In the media path as RFC 4733 telephone-events
    Rfc2833,
}

/// Per-tone options forwarded to the signaling engine
///
/// `None` fields leave the choice to the engine's own defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtmfOptions {
    /// How long the tone plays
    pub duration: Option<Duration>,
    /// Silence between consecutive tones
    pub inter_tone_gap: Option<Duration>,
    /// Preferred transport
    pub transport: Option<DtmfTransport>,
}

impl DtmfOptions {
    /// Options with engine defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the tone duration
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Set the gap between tones
    pub fn with_inter_tone_gap(mut self, gap: Duration) -> Self {
        self.inter_tone_gap = Some(gap);
        self
    }

    /// Set the preferred transport
    pub fn with_transport(mut self, transport: DtmfTransport) -> Self {
        self.transport = Some(transport);
        self
    }
}
