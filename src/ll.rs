//! Word-level transaction layer.
//!
//! Every register access on the LC709203F is a 16-bit word transfer protected
//! by a CRC-8 in SMBus fashion: the checksum covers the device address bytes
//! and the command byte in addition to the data, even though the bus layer
//! supplies addressing out-of-band. A mismatch on a read is treated like any
//! other failed transfer and the whole transaction is retried.

use embedded_hal_async::i2c::I2c as AsyncI2c;

use crate::Error;

/// Factory-programmed 7-bit bus address.
pub const DEFAULT_ADDRESS: u8 = 0x0B;

/// Transaction attempts before the last error is surfaced.
const MAX_ATTEMPTS: u32 = 10;

/// Register command codes of the LC709203F.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Command {
    /// Thermistor B-constant to use in thermistor mode.
    ThermistorB = 0x06,
    /// RSOC initialization, write-only.
    InitRsoc = 0x07,
    /// Cell temperature in 0.1 K units.
    CellTemperature = 0x08,
    /// Cell voltage in mV, read-only.
    CellVoltage = 0x09,
    /// Adjustment Pack Application, the battery pack size preset.
    Apa = 0x0B,
    /// Indicator To Empty, the remaining capacity in 0.1% units. Read-only.
    CellIte = 0x0F,
    /// IC version, read-only.
    IcVersion = 0x11,
    /// Battery profile selector (0 or 1).
    BatteryProfile = 0x12,
    /// Low RSOC alarm threshold in percent, 0 disables.
    AlarmPercent = 0x13,
    /// Low cell voltage alarm threshold in mV, 0 disables.
    AlarmVoltage = 0x14,
    /// Operational mode (operate or sleep).
    PowerMode = 0x15,
    /// Status bits; bit 0 selects thermistor mode.
    Status = 0x16,
}

/// CRC-8 over `data` with polynomial 0x07, init 0x00, MSB first, no final
/// XOR. Matches the checksum the chip computes on its end of every transfer.
///
/// ```rust
/// // Frame writing 0xAA55 to the RSOC initialization register at
/// // address 0x0B, as published in the datasheet.
/// assert_eq!(lc709203f::ll::crc8(&[0x16, 0x07, 0x55, 0xAA]), 0x17);
/// ```
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0;
    for byte in data {
        crc ^= byte;
        for _ in 0..8 {
            if crc & 0x80 != 0 {
                crc = (crc << 1) ^ 0x07;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Owns the bus and performs framed word transfers against one device.
///
/// Exclusive access for the duration of a transaction comes from `&mut self`;
/// the frame buffer is stack-local, so an aborted attempt leaves no state
/// behind.
pub struct Interface<I> {
    i2c: I,
    address: u8,
}

impl<I> Interface<I> {
    pub const fn new(i2c: I, address: u8) -> Self {
        Self { i2c, address }
    }

    pub fn inner_mut(&mut self) -> &mut I {
        &mut self.i2c
    }

    pub fn into_inner(self) -> I {
        self.i2c
    }
}

impl<I> Interface<I>
where
    I: AsyncI2c,
{
    /// Reads one 16-bit register, retrying failed or corrupted transfers.
    pub async fn read_word(&mut self, command: Command) -> Result<u16, Error<I>> {
        let mut attempt = 1;
        loop {
            match self.read_word_once(command).await {
                Ok(value) => return Ok(value),
                Err(_) if attempt < MAX_ATTEMPTS => {
                    debug!(
                        "Reading {:?} failed, retrying ({}/{})",
                        command, attempt, MAX_ATTEMPTS
                    );
                    attempt += 1;
                }
                Err(error) => {
                    warn!("Reading {:?} failed {} times, giving up", command, attempt);
                    return Err(error);
                }
            }
        }
    }

    /// Writes one 16-bit register, retrying failed transfers. The chip does
    /// not echo anything back on writes; a write it rejects because of a bad
    /// checksum is silently dropped on its side.
    pub async fn write_word(&mut self, command: Command, value: u16) -> Result<(), Error<I>> {
        let mut attempt = 1;
        loop {
            match self.write_word_once(command, value).await {
                Ok(()) => return Ok(()),
                Err(_) if attempt < MAX_ATTEMPTS => {
                    debug!(
                        "Writing {:?} failed, retrying ({}/{})",
                        command, attempt, MAX_ATTEMPTS
                    );
                    attempt += 1;
                }
                Err(error) => {
                    warn!("Writing {:?} failed {} times, giving up", command, attempt);
                    return Err(error);
                }
            }
        }
    }

    async fn read_word_once(&mut self, command: Command) -> Result<u16, Error<I>> {
        // [write address, command, read address, data low, data high, crc]
        let mut frame = [0; 6];
        frame[0] = self.address << 1;
        frame[1] = command as u8;
        frame[2] = (self.address << 1) | 1;

        let (header, response) = frame.split_at_mut(3);
        self.i2c
            .write_read(self.address, &header[1..2], response)
            .await
            .map_err(Error::Transfer)?;

        if crc8(&frame[..5]) != frame[5] {
            return Err(Error::Crc);
        }

        Ok(u16::from_le_bytes([frame[3], frame[4]]))
    }

    async fn write_word_once(&mut self, command: Command, value: u16) -> Result<(), Error<I>> {
        let [low, high] = value.to_le_bytes();
        let mut frame = [self.address << 1, command as u8, low, high, 0];
        frame[4] = crc8(&frame[..4]);

        // The address byte is part of the checksum but is never retransmitted;
        // the bus transfer addresses the device out-of-band.
        self.i2c
            .write(self.address, &frame[1..])
            .await
            .map_err(Error::Transfer)
    }
}
