//! MPU-6050 accelerometer/gyroscope driver over async I2C.
//!
//! The device is left at its power-on full-scale ranges (±2 g, ±250 °/s), so
//! the scale factors below are fixed.

use embedded_hal_async::i2c::I2c;

pub const DEFAULT_ADDRESS: u8 = 0x68;

pub const WHO_AM_I: u8 = 0x75;
pub const WHO_AM_I_VALUE: u8 = 0x68;
pub const PWR_MGMT_1: u8 = 0x6B;
pub const ACCEL_XOUT_H: u8 = 0x3B;
pub const GYRO_CONFIG: u8 = 0x1B;
pub const ACCEL_CONFIG: u8 = 0x1C;

/// Accel xyz, temperature, gyro xyz; big-endian i16 each.
pub const BURST_LEN: usize = 14;

/// LSB per g at ±2 g.
pub const ACCEL_LSB_PER_G: f32 = 16384.0;
/// LSB per °/s at ±250 °/s.
pub const GYRO_LSB_PER_DPS: f32 = 131.0;
const TEMP_LSB_PER_C: f32 = 340.0;
const TEMP_OFFSET_C: f32 = 36.53;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mpu6050Error<E> {
    I2c(E),
    /// Something answered at the address but it is not an MPU-6050.
    NotFound { who_am_i: u8 },
}

/// One burst read, unscaled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RawSample {
    pub accel: [i16; 3],
    pub temp: i16,
    pub gyro: [i16; 3],
}

impl RawSample {
    pub fn from_be_bytes(buf: &[u8; BURST_LEN]) -> Self {
        let word = |i: usize| i16::from_be_bytes([buf[i], buf[i + 1]]);
        Self {
            accel: [word(0), word(2), word(4)],
            temp: word(6),
            gyro: [word(8), word(10), word(12)],
        }
    }

    pub fn scaled(&self) -> Mpu6050Data {
        Mpu6050Data {
            accel_g: self.accel.map(|v| v as f32 / ACCEL_LSB_PER_G),
            gyro_dps: self.gyro.map(|v| v as f32 / GYRO_LSB_PER_DPS),
            temp_c: self.temp as f32 / TEMP_LSB_PER_C + TEMP_OFFSET_C,
        }
    }
}

/// Sample in physical units.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Mpu6050Data {
    pub accel_g: [f32; 3],
    pub gyro_dps: [f32; 3],
    pub temp_c: f32,
}

pub struct Mpu6050<I2C> {
    i2c: I2C,
    address: u8,
}

impl<I2C: I2c> Mpu6050<I2C> {
    pub fn new(i2c: I2C) -> Self {
        Self::with_address(i2c, DEFAULT_ADDRESS)
    }

    /// Use the alternate address (0x69) when AD0 is pulled high.
    pub fn with_address(i2c: I2C, address: u8) -> Self {
        Self { i2c, address }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub async fn who_am_i(&mut self) -> Result<u8, Mpu6050Error<I2C::Error>> {
        self.read_register(WHO_AM_I).await
    }

    /// Verify the chip identity and take it out of sleep.
    pub async fn init(&mut self) -> Result<(), Mpu6050Error<I2C::Error>> {
        let who_am_i = self.who_am_i().await?;
        if who_am_i != WHO_AM_I_VALUE {
            error!(
                "mpu6050: unexpected WHO_AM_I {} at {}",
                who_am_i,
                self.address
            );
            return Err(Mpu6050Error::NotFound { who_am_i });
        }

        self.write_register(PWR_MGMT_1, 0x00).await?;
        info!("mpu6050: awake at {}", self.address);
        Ok(())
    }

    pub async fn read_raw(&mut self) -> Result<RawSample, Mpu6050Error<I2C::Error>> {
        let mut buf = [0u8; BURST_LEN];
        self.i2c
            .write_read(self.address, &[ACCEL_XOUT_H], &mut buf)
            .await
            .map_err(Mpu6050Error::I2c)?;
        Ok(RawSample::from_be_bytes(&buf))
    }

    pub async fn read(&mut self) -> Result<Mpu6050Data, Mpu6050Error<I2C::Error>> {
        Ok(self.read_raw().await?.scaled())
    }

    /// Give the bus back.
    pub fn release(self) -> I2C {
        self.i2c
    }

    async fn read_register(&mut self, reg: u8) -> Result<u8, Mpu6050Error<I2C::Error>> {
        let mut buf = [0u8; 1];
        self.i2c
            .write_read(self.address, &[reg], &mut buf)
            .await
            .map_err(Mpu6050Error::I2c)?;
        Ok(buf[0])
    }

    async fn write_register(&mut self, reg: u8, value: u8) -> Result<(), Mpu6050Error<I2C::Error>> {
        self.i2c
            .write(self.address, &[reg, value])
            .await
            .map_err(Mpu6050Error::I2c)
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Register-file I2C target: a write sets the register pointer and stores
    //! any following bytes, a read streams from the pointer.

    use embedded_hal_async::i2c::{ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation};

    pub struct MockI2c {
        pub address: u8,
        pub registers: [u8; 128],
        pub writes: Vec<(u8, u8)>,
        pub fail: bool,
        pointer: usize,
    }

    impl MockI2c {
        pub fn new(address: u8) -> Self {
            let mut registers = [0u8; 128];
            registers[super::WHO_AM_I as usize] = super::WHO_AM_I_VALUE;
            // power-on sleep bit
            registers[super::PWR_MGMT_1 as usize] = 0x40;
            Self {
                address,
                registers,
                writes: Vec::new(),
                fail: false,
                pointer: 0,
            }
        }

        pub fn load_burst(&mut self, burst: &[u8; super::BURST_LEN]) {
            let start = super::ACCEL_XOUT_H as usize;
            self.registers[start..start + burst.len()].copy_from_slice(burst);
        }
    }

    impl ErrorType for MockI2c {
        type Error = ErrorKind;
    }

    impl I2c for MockI2c {
        async fn transaction(
            &mut self,
            address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), Self::Error> {
            if self.fail {
                return Err(ErrorKind::Bus);
            }
            if address != self.address {
                return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
            }
            for op in operations {
                match op {
                    Operation::Write(bytes) => {
                        let Some((&reg, values)) = bytes.split_first() else {
                            continue;
                        };
                        self.pointer = reg as usize;
                        for &value in values {
                            self.registers[self.pointer] = value;
                            self.writes.push((self.pointer as u8, value));
                            self.pointer += 1;
                        }
                    }
                    Operation::Read(buf) => {
                        let end = self.pointer + buf.len();
                        buf.copy_from_slice(&self.registers[self.pointer..end]);
                        self.pointer = end;
                    }
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockI2c;
    use super::*;
    use embassy_futures::block_on;
    use embedded_hal_async::i2c::ErrorKind;

    const LEVEL_BURST: [u8; BURST_LEN] = [
        0x00, 0x00, // ax 0
        0xC0, 0x00, // ay -16384
        0x40, 0x00, // az 16384
        0x00, 0x00, // temp 0
        0x00, 0x83, // gx 131
        0xFF, 0x7D, // gy -131
        0x00, 0x00, // gz 0
    ];

    #[test]
    fn init_checks_identity_and_wakes() {
        let mut mpu = Mpu6050::new(MockI2c::new(DEFAULT_ADDRESS));
        block_on(mpu.init()).unwrap();

        let i2c = mpu.release();
        assert_eq!(i2c.writes, vec![(PWR_MGMT_1, 0x00)]);
        assert_eq!(i2c.registers[PWR_MGMT_1 as usize], 0);
    }

    #[test]
    fn init_rejects_other_chips() {
        let mut bus = MockI2c::new(DEFAULT_ADDRESS);
        bus.registers[WHO_AM_I as usize] = 0x71;
        let mut mpu = Mpu6050::new(bus);

        assert_eq!(
            block_on(mpu.init()),
            Err(Mpu6050Error::NotFound { who_am_i: 0x71 })
        );
        assert!(mpu.release().writes.is_empty());
    }

    #[test]
    fn missing_device_surfaces_bus_error() {
        let mut mpu = Mpu6050::with_address(MockI2c::new(DEFAULT_ADDRESS), 0x69);
        assert!(matches!(
            block_on(mpu.who_am_i()),
            Err(Mpu6050Error::I2c(ErrorKind::NoAcknowledge(_)))
        ));
    }

    #[test]
    fn burst_read_decodes_big_endian_words() {
        let mut bus = MockI2c::new(DEFAULT_ADDRESS);
        bus.load_burst(&LEVEL_BURST);
        let mut mpu = Mpu6050::new(bus);

        let raw = block_on(mpu.read_raw()).unwrap();
        assert_eq!(raw.accel, [0, -16384, 16384]);
        assert_eq!(raw.temp, 0);
        assert_eq!(raw.gyro, [131, -131, 0]);
    }

    #[test]
    fn read_scales_to_physical_units() {
        let mut bus = MockI2c::new(DEFAULT_ADDRESS);
        bus.load_burst(&LEVEL_BURST);
        let mut mpu = Mpu6050::new(bus);

        let data = block_on(mpu.read()).unwrap();
        assert_eq!(data.accel_g, [0.0, -1.0, 1.0]);
        assert_eq!(data.gyro_dps, [1.0, -1.0, 0.0]);
        assert!((data.temp_c - 36.53).abs() < 1e-4);
    }

    #[test]
    fn temperature_uses_datasheet_formula() {
        let raw = RawSample {
            temp: -3400,
            ..Default::default()
        };
        assert!((raw.scaled().temp_c - 26.53).abs() < 1e-4);
    }

    #[test]
    fn bus_failure_during_read() {
        let mut bus = MockI2c::new(DEFAULT_ADDRESS);
        bus.fail = true;
        let mut mpu = Mpu6050::new(bus);
        assert_eq!(
            block_on(mpu.read_raw()),
            Err(Mpu6050Error::I2c(ErrorKind::Bus))
        );
    }
}
