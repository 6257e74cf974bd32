//! ADS1115 16-bit ADC over I2C, read as the battery divider input.
//!
//! Single-ended, PGA ±4.096 V, 128 SPS, single-shot. Raw counts go straight
//! to the battery device; set its calibration divisor to match (about 8000
//! counts per volt behind a 1:1 divider).

use rppal::i2c::I2c;
use std::{thread, time::Duration};

use yaha_core::hal::AnalogInput;

// ── ADS1115 registers ───────────────────────────────────────────────────────

const REG_CONVERSION: u8 = 0x00;
const REG_CONFIG: u8 = 0x01;

/// OS=1 (start), PGA=001 (±4.096 V), MODE=1 (single-shot), DR=100 (128 SPS),
/// comparator off. The MUX bits are or-ed in per channel.
const CONFIG_BASE: u16 = 0b1_000_001_1_100_0_0_0_11;

const MUX_SHIFT: u8 = 12;
/// AINx against GND.
const MUX_SINGLE_ENDED: [u16; 4] = [0b100, 0b101, 0b110, 0b111];

const CONVERSION_WAIT: Duration = Duration::from_millis(9);
const OS_READY_BIT: u16 = 1 << 15;
const READY_POLLS: usize = 3;

fn config_for_channel(channel: usize) -> u16 {
    CONFIG_BASE | (MUX_SINGLE_ENDED[channel] << MUX_SHIFT)
}

// ── Driver ──────────────────────────────────────────────────────────────────

pub struct Ads1115 {
    i2c: I2c,
    channel: usize,
}

impl Ads1115 {
    /// Open I2C bus 1 for the converter at `addr`, reading `channel` (0-3).
    pub fn new(addr: u16, channel: usize) -> anyhow::Result<Self> {
        anyhow::ensure!(
            channel < MUX_SINGLE_ENDED.len(),
            "ADS1115 channel {channel} out of range (0-3)"
        );
        let mut i2c = I2c::new()?;
        i2c.set_slave_address(addr)?;
        tracing::info!(
            addr = format_args!("0x{addr:02x}"),
            channel,
            "ads1115 initialised"
        );
        Ok(Self { i2c, channel })
    }

    fn conversion(&mut self) -> anyhow::Result<i16> {
        self.i2c
            .block_write(REG_CONFIG, &config_for_channel(self.channel).to_be_bytes())?;
        thread::sleep(CONVERSION_WAIT);

        for _ in 0..READY_POLLS {
            let mut buf = [0u8; 2];
            self.i2c.block_read(REG_CONFIG, &mut buf)?;
            if u16::from_be_bytes(buf) & OS_READY_BIT != 0 {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }

        let mut buf = [0u8; 2];
        self.i2c.block_read(REG_CONVERSION, &mut buf)?;
        Ok(i16::from_be_bytes(buf))
    }
}

impl AnalogInput for Ads1115 {
    fn read_raw(&mut self) -> anyhow::Result<u16> {
        let raw = self.conversion()?;
        // Single-ended reads are never negative unless the bus glitched.
        Ok(raw.max(0) as u16)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
