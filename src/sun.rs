//! Day/Night Gate
//!
//! Sunrise and sunset from the sunrise equation, evaluated in `f32` with
//! [`micromath`] on the target. Inverters produce nothing at night, so
//! polling can be suspended between (sunset + offset) and
//! (sunrise + offset).
//!
//! Time arguments are Unix epoch seconds (UTC).

#[cfg(feature = "embedded")]
use micromath::F32Ext;

use crate::config::SunConfig;

/// Seconds per day
pub const SECONDS_PER_DAY: u32 = 86_400;

/// Days from 1970-01-01 to 2000-01-01
const J2000_DAY: i64 = 10_957;

/// Axial tilt of the earth (degrees)
const OBLIQUITY_DEG: f32 = 23.44;

/// Sun altitude at rise/set incl. refraction (degrees)
const HORIZON_DEG: f32 = -0.83;

/// Sunrise and sunset of one day
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SunTimes {
    /// Sunrise (epoch seconds)
    pub sunrise: u32,
    /// Sunset (epoch seconds)
    pub sunset: u32,
}

/// Communication window derived from sun times and offsets
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SunWindow {
    /// Sunrise (epoch seconds)
    pub sunrise: u32,
    /// Sunset (epoch seconds)
    pub sunset: u32,
    /// Seconds added to sunrise
    pub offset_sunrise_s: i32,
    /// Seconds added to sunset
    pub offset_sunset_s: i32,
}

impl SunWindow {
    /// Combine sun times with the configured offsets
    #[must_use]
    pub const fn new(times: SunTimes, config: &SunConfig) -> Self {
        Self {
            sunrise: times.sunrise,
            sunset: times.sunset,
            offset_sunrise_s: config.offset_sunrise_s,
            offset_sunset_s: config.offset_sunset_s,
        }
    }

    /// First second of the window
    #[must_use]
    pub const fn comm_start(&self) -> u32 {
        self.sunrise.saturating_add_signed(self.offset_sunrise_s)
    }

    /// First second after the window
    #[must_use]
    pub const fn comm_stop(&self) -> u32 {
        self.sunset.saturating_add_signed(self.offset_sunset_s)
    }
}

#[cfg(feature = "embedded")]
impl defmt::Format for SunWindow {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{}..{}", self.comm_start(), self.comm_stop());
    }
}

/// Local time offset estimated from the longitude (whole hours)
#[must_use]
pub fn timezone_offset_s(longitude: f32) -> i32 {
    let shifted = if longitude >= 0.0 {
        longitude + 7.5
    } else {
        longitude - 7.5
    };
    (shifted / 15.0) as i32 * 3600
}

/// Compute sunrise and sunset for the local day containing `timestamp`.
///
/// Polar night yields a zero-length day at solar noon; midnight sun
/// yields the whole local day.
#[must_use]
pub fn calculate(timestamp: u32, latitude: f32, longitude: f32) -> SunTimes {
    let tz = i64::from(timezone_offset_s(longitude));
    let day = (i64::from(timestamp) + tz).div_euclid(i64::from(SECONDS_PER_DAY));
    let n = day - J2000_DAY;

    // mean solar time relative to day n
    let d = 0.0008 - longitude / 360.0;
    let j = n as f32 + d;

    let m = (357.529_1 + 0.985_600_28 * j) % 360.0;
    let m_rad = m.to_radians();
    let c = 1.914_8 * m_rad.sin() + 0.02 * (2.0 * m_rad).sin() + 0.000_3 * (3.0 * m_rad).sin();
    let lambda = ((m + c + 180.0 + 102.937_2) % 360.0).to_radians();
    let transit = d + 0.005_3 * m_rad.sin() - 0.006_9 * (2.0 * lambda).sin();

    let sin_decl = lambda.sin() * OBLIQUITY_DEG.to_radians().sin();
    let cos_decl = sin_decl.asin().cos();
    let phi = latitude.to_radians();
    let cos_omega = (HORIZON_DEG.to_radians().sin() - phi.sin() * sin_decl) / (phi.cos() * cos_decl);

    let noon = (n + J2000_DAY) * i64::from(SECONDS_PER_DAY) + i64::from(SECONDS_PER_DAY / 2);
    let transit_s = noon + (transit * SECONDS_PER_DAY as f32) as i64;

    let (rise, set) = if cos_omega > 1.0 {
        (transit_s, transit_s)
    } else if cos_omega < -1.0 {
        let start = day * i64::from(SECONDS_PER_DAY) - tz;
        (start, start + i64::from(SECONDS_PER_DAY))
    } else {
        let half = (cos_omega.acos().to_degrees() / 360.0 * SECONDS_PER_DAY as f32) as i64;
        (transit_s - half, transit_s + half)
    };

    SunTimes {
        sunrise: clamp_epoch(rise),
        sunset: clamp_epoch(set),
    }
}

fn clamp_epoch(t: i64) -> u32 {
    u32::try_from(t.max(0)).unwrap_or(u32::MAX)
}

/// Check whether polling is allowed at `now`
#[must_use]
pub fn comm_enabled(now: u32, window: Option<&SunWindow>, always_on: bool) -> bool {
    if always_on {
        return true;
    }
    match window {
        Some(w) => now >= w.comm_start() && now < w.comm_stop(),
        None => true,
    }
}

/// Next time the gate changes state within this window
#[must_use]
pub fn next_boundary(now: u32, window: &SunWindow) -> Option<u32> {
    if now < window.comm_start() {
        Some(window.comm_start())
    } else if now < window.comm_stop() {
        Some(window.comm_stop())
    } else {
        None
    }
}
