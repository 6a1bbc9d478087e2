//! FAT32 date and time encodings.
//!
//! Dates pack `[yyyyyyy:mmmm:ddddd]` into 16 bits with the year stored as an
//! offset from 1980; times pack `[hhhhh:mmmmmm:sssss]` with a two second
//! resolution. Out-of-range components are clamped rather than rejected, the
//! way the on-disk format expects.

use modular_bitfield::prelude::*;

/// A date in the FAT32 on-disk encoding.
#[bitfield(bits = 16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fat32Date {
    pub day: B5,
    pub month: B4,
    pub year_since_1980: B7,
}

impl Fat32Date {
    /// Builds a date from calendar components, clamping each into the
    /// representable range (years 1980-2107, months 1-12, days 1-31).
    pub fn from_ymd(year: i32, month: i32, day: i32) -> Self {
        Self::new()
            .with_year_since_1980((year - 1980).clamp(0, 127) as u8)
            .with_month(month.clamp(1, 12) as u8)
            .with_day(day.clamp(1, 31) as u8)
    }

    /// Returns the calendar year.
    pub fn year(&self) -> u16 {
        u16::from(self.year_since_1980()) + 1980
    }

    /// Decodes a date from its on-disk 16-bit form.
    pub fn from_raw(raw: u16) -> Self {
        Self::from_bytes(raw.to_le_bytes())
    }

    /// Encodes the date into its on-disk 16-bit form.
    pub fn to_raw(self) -> u16 {
        u16::from_le_bytes(self.into_bytes())
    }
}

/// A time of day in the FAT32 on-disk encoding. Seconds are stored in units
/// of two.
#[bitfield(bits = 16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fat32Time {
    pub seconds_over_two: B5,
    pub minutes: B6,
    pub hours: B5,
}

impl Fat32Time {
    /// Builds a time from wall-clock components, clamping each into the
    /// representable range (hours 0-23, minutes 0-59, seconds 0-59).
    pub fn from_hms(hours: i32, minutes: i32, seconds: i32) -> Self {
        Self::new()
            .with_hours(hours.clamp(0, 23) as u8)
            .with_minutes(minutes.clamp(0, 59) as u8)
            .with_seconds_over_two((seconds / 2).clamp(0, 29) as u8)
    }

    /// Returns the seconds component, in whole seconds.
    pub fn seconds(&self) -> u16 {
        u16::from(self.seconds_over_two()) * 2
    }

    /// Decodes a time from its on-disk 16-bit form.
    pub fn from_raw(raw: u16) -> Self {
        Self::from_bytes(raw.to_le_bytes())
    }

    /// Encodes the time into its on-disk 16-bit form.
    pub fn to_raw(self) -> u16 {
        u16::from_le_bytes(self.into_bytes())
    }
}

/// The hundredths-of-a-second component of a FAT32 creation timestamp.
/// Spans two seconds, so the valid range is 0-199.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fat32TimeHundredths(u8);

impl Fat32TimeHundredths {
    /// Builds the component, clamped to 0-199.
    pub fn new(hundredths: i32) -> Self {
        Self(hundredths.clamp(0, 199) as u8)
    }

    /// Returns the stored hundredths value.
    pub fn hundredths(&self) -> u8 {
        self.0
    }

    /// Decodes from the on-disk byte.
    pub fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    /// Encodes into the on-disk byte.
    pub fn to_raw(self) -> u8 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_packs_fields_into_the_documented_bits() {
        let date = Fat32Date::from_ymd(2024, 3, 17);

        assert_eq!(date.year(), 2024);
        assert_eq!(date.month(), 3);
        assert_eq!(date.day(), 17);
        assert_eq!(date.to_raw(), ((2024 - 1980) << 9 | 3 << 5 | 17) as u16);
        assert_eq!(Fat32Date::from_raw(date.to_raw()), date);
    }

    #[test]
    fn date_clamps_out_of_range_components() {
        let before_epoch = Fat32Date::from_ymd(1901, 0, 0);
        assert_eq!(before_epoch.year(), 1980);
        assert_eq!(before_epoch.month(), 1);
        assert_eq!(before_epoch.day(), 1);

        let far_future = Fat32Date::from_ymd(3000, 13, 32);
        assert_eq!(far_future.year(), 2107);
        assert_eq!(far_future.month(), 12);
        assert_eq!(far_future.day(), 31);
    }

    #[test]
    fn time_has_two_second_resolution() {
        let time = Fat32Time::from_hms(13, 45, 37);

        assert_eq!(time.hours(), 13);
        assert_eq!(time.minutes(), 45);
        assert_eq!(time.seconds(), 36);
        assert_eq!(time.to_raw(), (13 << 11 | 45 << 5 | 18) as u16);
        assert_eq!(Fat32Time::from_raw(time.to_raw()), time);
    }

    #[test]
    fn time_clamps_out_of_range_components() {
        let time = Fat32Time::from_hms(25, 61, 75);

        assert_eq!(time.hours(), 23);
        assert_eq!(time.minutes(), 59);
        assert_eq!(time.seconds(), 58);
    }

    #[test]
    fn hundredths_clamp_to_two_seconds() {
        assert_eq!(Fat32TimeHundredths::new(-5).hundredths(), 0);
        assert_eq!(Fat32TimeHundredths::new(120).hundredths(), 120);
        assert_eq!(Fat32TimeHundredths::new(240).hundredths(), 199);
    }
}
