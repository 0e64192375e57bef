//! 1-Wire master for a single DS2433 (4 kbit EEPROM) on the bus.
//!
//! Layers:
//! - `Hardware`: one open-drain pin (drive low / release / sample) plus a
//!   delay that must never return early
//! - `OneWireBus`: reset/presence and read/write time slots (standard
//!   speed, 70µs slots), bytes LSB first
//! - `MemoryOperations`: Read ROM (single device only), Read Memory, and
//!   page writes through the scratchpad:
//!   - Write Scratchpad 0x0F, TA1, TA2, data
//!   - Read Scratchpad 0xAA -> TA1, TA2, E/S, data (verify echo)
//!   - Copy Scratchpad 0x55, TA1, TA2, E/S (authorization as echoed)
//!
//! Memory is 512 bytes in 16 pages of 32 bytes; a scratchpad write must
//! stay inside one page.

mod address;
mod bus;
mod error;
mod gpio;
mod hardware;
mod operations;

#[cfg(test)]
pub mod doubles;

pub use self::address::{
	DeviceAddress,
	crc8,
};

pub use self::bus::{
	OneWireBus,
	PinBus,
};

pub use self::error::{
	BusError,
	kind_of,
};

pub use self::gpio::SysfsPin;

pub use self::hardware::{
	Hardware,
	precise_delay,
	reliable_sleep,
	spin_wait,
};

pub use self::operations::{
	MEMORY_SIZE,
	MemoryOperations,
	PAGE_SIZE,
	PageChunks,
	Transaction,
};

/// Direct bus on a sysfs GPIO pin.
pub fn open_gpio_bus(pin: u32) -> crate::AResult<PinBus<SysfsPin>> {
	let pin = SysfsPin::open(pin)?;
	let name = format!("GPIO{}", pin.number());
	Ok(PinBus::new(pin, name))
}
