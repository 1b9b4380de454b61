//! GPIO Abstractions
//!
//! Status LED showing the radio link state.

use embassy_stm32::gpio::Output;

/// What the LED should show
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkIndication {
    /// No front-end answered
    NoRadio,
    /// Night or no inverter enabled
    Idle,
    /// Polling inverters
    Polling,
}

impl LinkIndication {
    /// Derive the indication from the DTU state
    #[must_use]
    pub const fn from_state(chip_connected: bool, polling: bool) -> Self {
        match (chip_connected, polling) {
            (false, _) => Self::NoRadio,
            (true, false) => Self::Idle,
            (true, true) => Self::Polling,
        }
    }
}

#[cfg(feature = "embedded")]
impl defmt::Format for LinkIndication {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Self::NoRadio => defmt::write!(f, "no radio"),
            Self::Idle => defmt::write!(f, "idle"),
            Self::Polling => defmt::write!(f, "polling"),
        }
    }
}

/// Status LED driver
pub struct StatusLed<'d> {
    pin: Output<'d>,
    lit: bool,
    shown: Option<LinkIndication>,
}

impl<'d> StatusLed<'d> {
    /// Create a new status LED (initially off)
    #[must_use]
    pub fn new(pin: Output<'d>) -> Self {
        Self {
            pin,
            lit: false,
            shown: None,
        }
    }

    fn set(&mut self, lit: bool) {
        if lit {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
        self.lit = lit;
    }

    /// Advance the pattern by one step: solid while polling, blinking
    /// while idle, dark without radio
    pub fn show(&mut self, indication: LinkIndication) {
        if self.shown != Some(indication) {
            defmt::debug!("link {}", indication);
            self.shown = Some(indication);
        }
        match indication {
            LinkIndication::NoRadio => self.set(false),
            LinkIndication::Idle => self.set(!self.lit),
            LinkIndication::Polling => self.set(true),
        }
    }
}
