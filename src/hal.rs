//! ==============================================================================
//! hal.rs - Hardware Abstraction Layer
//! ==============================================================================
//!
//! purpose:
//!     distance readings from the grovepi ultrasonic rangers.
//!     abstracts away the difference between running on a real Raspberry Pi
//!     with a GrovePi+ hat (using `rppal`) and a development machine (mock).
//!
//! design philosophy:
//!     - "Compile Anywhere": The host should compile on Windows/Mac/Linux.
//!     - "Zero Cost": On the Pi, this compiles down to direct `rppal` calls.
//!
//! relationships:
//!     - used by: main.rs (one sampler task per catalog entry)
//!     - uses: rppal (on feature="hardware")
//!
//! ==============================================================================

use anyhow::Result;

pub trait ProximitySensor: Send + Sync {
    /// blocking read of the ranger on a grovepi digital port
    fn measure_distance(&self, port: u8) -> Result<f32>;
}

// ==============================================================================================
// MOCK IMPLEMENTATION (For WSL / Non-Hardware Build)
// ==============================================================================================
#[cfg(not(feature = "hardware"))]
pub struct Hal {
    distance: f32,
}

#[cfg(not(feature = "hardware"))]
impl Hal {
    pub fn new() -> Result<Self> {
        tracing::info!("Using MOCK HAL (No hardware access)");
        // nothing in front of the sensor
        Ok(Self { distance: 120.0 })
    }
}

#[cfg(not(feature = "hardware"))]
impl ProximitySensor for Hal {
    fn measure_distance(&self, port: u8) -> Result<f32> {
        tracing::trace!("[MOCK ULTRASONIC] Port {} -> {}", port, self.distance);
        Ok(self.distance)
    }
}

// ==============================================================================================
// REAL IMPLEMENTATION (For Raspberry Pi + GrovePi+)
// ==============================================================================================
#[cfg(feature = "hardware")]
pub struct Hal {
    i2c: std::sync::Mutex<rppal::i2c::I2c>,
}

#[cfg(feature = "hardware")]
const GROVEPI_ADDR: u16 = 0x04;
#[cfg(feature = "hardware")]
const CMD_ULTRASONIC_READ: u8 = 7;

#[cfg(feature = "hardware")]
impl Hal {
    pub fn new() -> Result<Self> {
        tracing::info!("Using REAL HARDWARE HAL (rppal)");
        let mut i2c = rppal::i2c::I2c::new()?;
        i2c.set_slave_address(GROVEPI_ADDR)?;
        Ok(Self { i2c: std::sync::Mutex::new(i2c) })
    }
}

#[cfg(feature = "hardware")]
impl ProximitySensor for Hal {
    fn measure_distance(&self, port: u8) -> Result<f32> {
        // all rangers share the grovepi bus; one transaction at a time
        let i2c = self
            .i2c
            .lock()
            .map_err(|_| anyhow::anyhow!("grovepi bus lock poisoned"))?;
        i2c.block_write(1, &[CMD_ULTRASONIC_READ, port, 0, 0])?;
        // firmware needs time to fire the ping and time the echo
        std::thread::sleep(std::time::Duration::from_millis(60));
        let mut buf = [0u8; 3];
        i2c.block_read(1, &mut buf)?;
        Ok((buf[1] as u16 * 256 + buf[2] as u16) as f32)
    }
}
