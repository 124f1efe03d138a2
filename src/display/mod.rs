//! ==============================================================================
//! display - character/color lcd and its step interpreter
//! ==============================================================================
//!
//! purpose:
//!     operator feedback on a 16x2 grove lcd with rgb backlight.
//!     `Display` is the driver contract; `Lcd` is the concrete driver,
//!     mocked unless the crate is built with `--features hardware`
//!     (same split as hal.rs).
//!
//! relationships:
//!     - step.rs: declarative display steps parsed from json
//!     - interpreter.rs: runs a list of steps against a `Display`
//!     - used by: workflow.rs (countdown before the reader capture)
//!     - used by: server.rs (POST /lcd, via the controller)
//!
//! ==============================================================================

pub mod interpreter;
pub mod step;

pub use interpreter::{ScriptError, StepInterpreter};
pub use step::{DisplayStep, Rgb, WriteStep};

use anyhow::Result;

pub const LCD_COLS: usize = 16;
pub const LCD_ROWS: u8 = 2;

/// primitive display operations; cursor and color are implicit device state
pub trait Display: Send {
    fn power_on(&mut self) -> Result<()>;
    fn power_off(&mut self) -> Result<()>;
    fn set_color(&mut self, r: u8, g: u8, b: u8) -> Result<()>;
    fn clear(&mut self) -> Result<()>;
    fn set_cursor(&mut self, row: u8, col: u8) -> Result<()>;
    /// `raw` writes at the cursor; otherwise the screen is cleared and the
    /// text wrapped over both lines
    fn set_text(&mut self, text: &str, raw: bool) -> Result<()>;
}

/// wrap text the way the lcd lays it out: newline or 16 columns per row,
/// two rows at most
pub fn layout(text: &str) -> Vec<String> {
    let mut rows = vec![String::new()];
    for c in text.chars() {
        let full = rows.last().map(|r| r.chars().count() == LCD_COLS).unwrap_or(false);
        if c == '\n' || full {
            if rows.len() == LCD_ROWS as usize {
                break;
            }
            rows.push(String::new());
            if c == '\n' {
                continue;
            }
        }
        if let Some(row) = rows.last_mut() {
            row.push(c);
        }
    }
    rows
}

// ==============================================================================================
// MOCK IMPLEMENTATION (no lcd attached)
// ==============================================================================================
#[cfg(not(feature = "hardware"))]
pub struct Lcd {
    on: bool,
    cursor: (u8, u8),
    color: (u8, u8, u8),
}

#[cfg(not(feature = "hardware"))]
impl Lcd {
    pub fn new() -> Result<Self> {
        tracing::info!("Using MOCK LCD (No hardware access)");
        Ok(Self { on: false, cursor: (0, 0), color: (0, 0, 0) })
    }
}

#[cfg(not(feature = "hardware"))]
impl Display for Lcd {
    fn power_on(&mut self) -> Result<()> {
        self.on = true;
        tracing::debug!("[MOCK LCD] on");
        Ok(())
    }

    fn power_off(&mut self) -> Result<()> {
        self.on = false;
        tracing::debug!("[MOCK LCD] off");
        Ok(())
    }

    fn set_color(&mut self, r: u8, g: u8, b: u8) -> Result<()> {
        self.color = (r, g, b);
        tracing::debug!("[MOCK LCD] backlight RGB({}, {}, {})", r, g, b);
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        tracing::debug!("[MOCK LCD] clear");
        Ok(())
    }

    fn set_cursor(&mut self, row: u8, col: u8) -> Result<()> {
        self.cursor = (row.min(LCD_ROWS - 1), col);
        Ok(())
    }

    fn set_text(&mut self, text: &str, raw: bool) -> Result<()> {
        if raw {
            tracing::debug!("[MOCK LCD] at {:?}: {}", self.cursor, text);
        } else {
            self.cursor = (0, 0);
            for (row, line) in layout(text).iter().enumerate() {
                tracing::debug!(
                    "[MOCK LCD] row {} (on={}, color={:?}): {}",
                    row,
                    self.on,
                    self.color,
                    line
                );
            }
        }
        Ok(())
    }
}

// ==============================================================================================
// REAL IMPLEMENTATION (grove lcd rgb backlight on the pi i2c bus)
// ==============================================================================================
#[cfg(feature = "hardware")]
pub struct Lcd {
    i2c: rppal::i2c::I2c,
}

#[cfg(feature = "hardware")]
const TEXT_ADDR: u16 = 0x3e;
#[cfg(feature = "hardware")]
const RGB_ADDR: u16 = 0x62;

#[cfg(feature = "hardware")]
impl Lcd {
    pub fn new() -> Result<Self> {
        tracing::info!("Using REAL LCD (rppal i2c)");
        let mut lcd = Self { i2c: rppal::i2c::I2c::new()? };
        // backlight controller: normal mode, all leds driven by pwm
        lcd.rgb_register(0x00, 0x00)?;
        lcd.rgb_register(0x01, 0x00)?;
        lcd.rgb_register(0x08, 0xaa)?;
        lcd.command(0x28)?; // two lines
        Ok(lcd)
    }

    fn command(&mut self, cmd: u8) -> Result<()> {
        self.i2c.set_slave_address(TEXT_ADDR)?;
        self.i2c.write(&[0x80, cmd])?;
        Ok(())
    }

    fn data(&mut self, byte: u8) -> Result<()> {
        self.i2c.set_slave_address(TEXT_ADDR)?;
        self.i2c.write(&[0x40, byte])?;
        Ok(())
    }

    fn rgb_register(&mut self, reg: u8, value: u8) -> Result<()> {
        self.i2c.set_slave_address(RGB_ADDR)?;
        self.i2c.write(&[reg, value])?;
        Ok(())
    }

    fn write_chars(&mut self, line: &str) -> Result<()> {
        for c in line.chars() {
            self.data(if c.is_ascii() { c as u8 } else { b'?' })?;
        }
        Ok(())
    }
}

#[cfg(feature = "hardware")]
impl Display for Lcd {
    fn power_on(&mut self) -> Result<()> {
        self.command(0x08 | 0x04)
    }

    fn power_off(&mut self) -> Result<()> {
        self.command(0x08)
    }

    fn set_color(&mut self, r: u8, g: u8, b: u8) -> Result<()> {
        self.rgb_register(0x04, r)?;
        self.rgb_register(0x03, g)?;
        self.rgb_register(0x02, b)
    }

    fn clear(&mut self) -> Result<()> {
        self.command(0x01)?;
        // controller needs ~1.5ms after a clear
        std::thread::sleep(std::time::Duration::from_millis(2));
        Ok(())
    }

    fn set_cursor(&mut self, row: u8, col: u8) -> Result<()> {
        let base = if row == 0 { 0x80 } else { 0xc0 };
        self.command(base | (col & 0x0f))
    }

    fn set_text(&mut self, text: &str, raw: bool) -> Result<()> {
        if raw {
            return self.write_chars(text);
        }
        self.clear()?;
        self.command(0x08 | 0x04)?;
        for (row, line) in layout(text).iter().enumerate() {
            self.set_cursor(row as u8, 0)?;
            self.write_chars(line)?;
        }
        Ok(())
    }
}
