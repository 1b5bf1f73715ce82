//! Driver for the LC709203F single-cell LiPo/LiIon battery monitor and fuel
//! gauge.
//!
//! The chip speaks a CRC-protected word protocol over I2C; [`ll`] implements
//! the framing and retry policy, this module exposes typed accessors over the
//! fixed register map. All methods take `&mut self`, so a transaction can
//! never interleave with another one on the same handle.

#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate logger;

use embedded_hal_async::{
    delay::DelayNs as AsyncDelayNs,
    i2c::{ErrorType, I2c as AsyncI2c},
};

pub mod ll;

use ll::Command;

/// Probe attempts during initialization. The chip ignores bus traffic for a
/// while after power-up, so the first transfers may time out legitimately.
const PROBE_ATTEMPTS: u32 = 3;

/// Settle time between initialization steps, in milliseconds.
const SETTLE_DELAY_MS: u32 = 100;

/// Magic word that triggers an RSOC recalibration when written to
/// [`Command::InitRsoc`].
const RSOC_INIT_KEY: u16 = 0xAA55;

const ZERO_CELSIUS_IN_DECIKELVIN: f32 = 2731.5;

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<I>
where
    I: ErrorType,
{
    /// The underlying bus transfer failed and the retry budget is exhausted.
    /// Carries the error of the final attempt.
    Transfer(I::Error),
    /// The checksum of a read response kept mismatching through the retry
    /// budget.
    Crc,
    /// The value is outside the set the register accepts. Nothing was written.
    InvalidValue,
    /// The cell temperature register is owned by the chip while thermistor
    /// mode is active.
    ThermistorEnabled,
}

/// Options for [`Lc709203f::set_power_mode`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum PowerMode {
    Operate = 0x0001,
    Sleep = 0x0002,
}

impl PowerMode {
    pub const fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            0x0001 => Some(Self::Operate),
            0x0002 => Some(Self::Sleep),
            _ => None,
        }
    }
}

/// Battery pack size presets for [`Lc709203f::set_pack_size`]. The raw codes
/// are the APA register values the datasheet prescribes per capacity.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum PackSize {
    Mah100 = 0x08,
    Mah200 = 0x0B,
    Mah400 = 0x0E,
    Mah500 = 0x10,
    Mah1000 = 0x19,
    Mah2000 = 0x2D,
    Mah3000 = 0x36,
}

impl PackSize {
    pub const fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            0x08 => Some(Self::Mah100),
            0x0B => Some(Self::Mah200),
            0x0E => Some(Self::Mah400),
            0x10 => Some(Self::Mah500),
            0x19 => Some(Self::Mah1000),
            0x2D => Some(Self::Mah2000),
            0x36 => Some(Self::Mah3000),
            _ => None,
        }
    }

    /// Returns the nominal pack capacity of the preset in mAh.
    pub const fn capacity_mah(self) -> u16 {
        match self {
            Self::Mah100 => 100,
            Self::Mah200 => 200,
            Self::Mah400 => 400,
            Self::Mah500 => 500,
            Self::Mah1000 => 1000,
            Self::Mah2000 => 2000,
            Self::Mah3000 => 3000,
        }
    }

    /// Returns the preset matching a nominal capacity exactly, if any.
    pub const fn from_capacity_mah(mah: u16) -> Option<Self> {
        match mah {
            100 => Some(Self::Mah100),
            200 => Some(Self::Mah200),
            400 => Some(Self::Mah400),
            500 => Some(Self::Mah500),
            1000 => Some(Self::Mah1000),
            2000 => Some(Self::Mah2000),
            3000 => Some(Self::Mah3000),
            _ => None,
        }
    }
}

pub struct Lc709203f<I> {
    iface: ll::Interface<I>,
}

impl<I> Lc709203f<I> {
    /// Creates a driver for a gauge at the factory-default address. No bus
    /// traffic happens until [`Self::init_async`].
    pub const fn new(i2c: I) -> Self {
        Self::new_with_address(i2c, ll::DEFAULT_ADDRESS)
    }

    pub const fn new_with_address(i2c: I, address: u8) -> Self {
        Self {
            iface: ll::Interface::new(i2c, address),
        }
    }

    pub fn inner_mut(&mut self) -> &mut I {
        self.iface.inner_mut()
    }

    pub fn into_inner(self) -> I {
        self.iface.into_inner()
    }
}

impl<I> Lc709203f<I>
where
    I: AsyncI2c,
{
    /// Brings the gauge into its default operating configuration: operational
    /// power mode, 500 mAh pack, the 4.2 V battery profile, and a fresh RSOC
    /// estimate.
    ///
    /// The chip ignores configuration writes issued too soon after power-up,
    /// so the device is first probed until it responds, and the RSOC
    /// initialization is bracketed by settle delays.
    pub async fn init_async(&mut self, delay: &mut impl AsyncDelayNs) -> Result<(), Error<I>> {
        let mut attempt = 1;
        loop {
            match self.iface.read_word(Command::IcVersion).await {
                Ok(_) => {
                    debug!("Gauge responded to probe {}", attempt);
                    break;
                }
                Err(error) if attempt >= PROBE_ATTEMPTS => {
                    error!("Gauge did not respond to {} probes", attempt);
                    return Err(error);
                }
                Err(_) => {
                    attempt += 1;
                    delay.delay_ms(SETTLE_DELAY_MS).await;
                }
            }
        }

        self.set_power_mode(PowerMode::Operate).await?;
        self.set_pack_size(PackSize::Mah500).await?;
        self.set_battery_profile(1).await?;
        delay.delay_ms(SETTLE_DELAY_MS).await;

        self.init_rsoc().await?;
        delay.delay_ms(SETTLE_DELAY_MS).await;

        Ok(())
    }

    /// Makes the chip recalibrate its relative state of charge estimate from
    /// the current cell voltage.
    pub async fn init_rsoc(&mut self) -> Result<(), Error<I>> {
        self.iface.write_word(Command::InitRsoc, RSOC_INIT_KEY).await
    }

    /// Returns the cell voltage in volts, or `None` if the bus gave up. Meant
    /// for polling loops that prefer a missed sample over error plumbing.
    pub async fn read_cell_voltage(&mut self) -> Option<f32> {
        self.iface
            .read_word(Command::CellVoltage)
            .await
            .ok()
            .map(|raw| raw as f32 / 1000.0)
    }

    /// Returns the remaining cell capacity in percent, or `None` if the bus
    /// gave up. Same polling-friendly contract as [`Self::read_cell_voltage`].
    pub async fn read_cell_percent(&mut self) -> Option<f32> {
        self.iface
            .read_word(Command::CellIte)
            .await
            .ok()
            .map(|raw| raw as f32 / 10.0)
    }

    /// Returns the cell temperature in °C.
    pub async fn read_cell_temperature(&mut self) -> Result<f32, Error<I>> {
        let raw = self.iface.read_word(Command::CellTemperature).await?;
        Ok((raw as f32 - ZERO_CELSIUS_IN_DECIKELVIN) / 10.0)
    }

    /// Reports the cell temperature to the chip, in °C. Only valid while
    /// thermistor mode is off; with a thermistor attached the chip measures
    /// temperature itself and the register is not writable.
    pub async fn set_cell_temperature(&mut self, celsius: f32) -> Result<(), Error<I>> {
        if self.thermistor_enabled().await? {
            return Err(Error::ThermistorEnabled);
        }

        let raw = (celsius * 10.0 + ZERO_CELSIUS_IN_DECIKELVIN) as u16;
        self.iface.write_word(Command::CellTemperature, raw).await
    }

    pub async fn read_ic_version(&mut self) -> Result<u16, Error<I>> {
        self.iface.read_word(Command::IcVersion).await
    }

    pub async fn power_mode(&mut self) -> Result<PowerMode, Error<I>> {
        let raw = self.iface.read_word(Command::PowerMode).await?;
        PowerMode::from_raw(raw).ok_or(Error::InvalidValue)
    }

    pub async fn set_power_mode(&mut self, mode: PowerMode) -> Result<(), Error<I>> {
        self.iface.write_word(Command::PowerMode, mode as u16).await
    }

    /// Returns the selected battery profile, 0 or 1.
    pub async fn battery_profile(&mut self) -> Result<u16, Error<I>> {
        self.iface.read_word(Command::BatteryProfile).await
    }

    /// Selects the battery profile. Profile 1 is the 4.2 V / 3.7 V chemistry,
    /// profile 0 the 4.35 V / 3.8 V one.
    pub async fn set_battery_profile(&mut self, profile: u16) -> Result<(), Error<I>> {
        if profile > 1 {
            return Err(Error::InvalidValue);
        }
        self.iface.write_word(Command::BatteryProfile, profile).await
    }

    pub async fn pack_size(&mut self) -> Result<PackSize, Error<I>> {
        let raw = self.iface.read_word(Command::Apa).await?;
        PackSize::from_raw(raw).ok_or(Error::InvalidValue)
    }

    pub async fn set_pack_size(&mut self, size: PackSize) -> Result<(), Error<I>> {
        self.iface.write_word(Command::Apa, size as u16).await
    }

    pub async fn thermistor_b(&mut self) -> Result<u16, Error<I>> {
        self.iface.read_word(Command::ThermistorB).await
    }

    /// Sets the B-constant of the attached thermistor.
    pub async fn set_thermistor_b(&mut self, bconstant: u16) -> Result<(), Error<I>> {
        self.iface.write_word(Command::ThermistorB, bconstant).await
    }

    /// Returns whether the chip sources temperature from the thermistor pin.
    pub async fn thermistor_enabled(&mut self) -> Result<bool, Error<I>> {
        let raw = self.iface.read_word(Command::Status).await?;
        Ok(raw != 0)
    }

    /// Switches the temperature source between the thermistor pin and
    /// [`Self::set_cell_temperature`] reports.
    pub async fn enable_thermistor(&mut self, enabled: bool) -> Result<(), Error<I>> {
        self.iface.write_word(Command::Status, enabled as u16).await
    }

    /// Returns the low-RSOC alarm threshold in percent; 0 means disabled.
    pub async fn alarm_percent(&mut self) -> Result<u8, Error<I>> {
        let raw = self.iface.read_word(Command::AlarmPercent).await?;
        Ok(raw as u8)
    }

    /// Sets the low-RSOC alarm threshold in percent, 0..=100. 0 disables the
    /// alarm.
    pub async fn set_alarm_percent(&mut self, percent: u8) -> Result<(), Error<I>> {
        if percent > 100 {
            return Err(Error::InvalidValue);
        }
        self.iface
            .write_word(Command::AlarmPercent, percent as u16)
            .await
    }

    /// Returns the low-voltage alarm threshold in mV; 0 means disabled.
    pub async fn alarm_voltage(&mut self) -> Result<u16, Error<I>> {
        self.iface.read_word(Command::AlarmVoltage).await
    }

    /// Sets the low-voltage alarm threshold in mV. 0 disables the alarm.
    pub async fn set_alarm_voltage(&mut self, millivolts: u16) -> Result<(), Error<I>> {
        self.iface.write_word(Command::AlarmVoltage, millivolts).await
    }
}
