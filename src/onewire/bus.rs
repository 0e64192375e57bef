use std::time::Duration;

use super::Hardware;

// standard speed timings, all in µs
const RESET_LOW: u64 = 480;
const PRESENCE_SAMPLE: u64 = 70;
const PRESENCE_TAIL: u64 = 410;
const WRITE_ONE_LOW: u64 = 6;
const WRITE_ONE_HIGH: u64 = 64;
const WRITE_ZERO_LOW: u64 = 60;
const WRITE_ZERO_HIGH: u64 = 10;
const READ_INIT_LOW: u64 = 3;
const READ_SAMPLE: u64 = 9;
const READ_TAIL: u64 = 55;

fn us(v: u64) -> Duration {
	Duration::from_micros(v)
}

/// Bit-level access to a 1-Wire bus.
///
/// Every method is a complete blocking transaction on the line.
pub trait OneWireBus {
	/// Reset pulse; returns whether a device answered with a presence pulse.
	fn reset(&mut self) -> bool;
	fn write_bit(&mut self, bit: bool);
	fn read_bit(&mut self) -> bool;

	/// Release the line and sample its idle level (should be high with a
	/// working pull-up).
	fn sample_idle(&mut self) -> bool;

	/// Millisecond waits between transactions (EEPROM programming times).
	fn delay(&mut self, duration: Duration);

	/// Short name of the data line for diagnostics ("GPIO17").
	fn line_name(&self) -> String {
		"1-Wire line".into()
	}

	// least significant bit first
	fn write_byte(&mut self, byte: u8) {
		for bit in 0..8 {
			self.write_bit(0 != (byte >> bit) & 1);
		}
	}

	fn read_byte(&mut self) -> u8 {
		let mut result = 0u8;
		for bit in 0..8 {
			if self.read_bit() {
				result |= 1 << bit;
			}
		}
		result
	}

	fn write_bytes(&mut self, data: &[u8]) {
		for &b in data {
			self.write_byte(b);
		}
	}
}

impl<'a, B: OneWireBus + ?Sized> OneWireBus for &'a mut B {
	fn reset(&mut self) -> bool {
		B::reset(*self)
	}
	fn write_bit(&mut self, bit: bool) {
		B::write_bit(*self, bit)
	}
	fn read_bit(&mut self) -> bool {
		B::read_bit(*self)
	}
	fn sample_idle(&mut self) -> bool {
		B::sample_idle(*self)
	}
	fn delay(&mut self, duration: Duration) {
		B::delay(*self, duration)
	}
	fn line_name(&self) -> String {
		B::line_name(*self)
	}
}

/// Bit-banged 1-Wire master on a single pin.
pub struct PinBus<H: Hardware> {
	pin: H,
	name: String,
}

impl<H: Hardware> PinBus<H> {
	pub fn new(pin: H, name: String) -> Self {
		PinBus {
			pin,
			name,
		}
	}

	pub fn into_inner(self) -> H {
		self.pin
	}
}

impl<H: Hardware> OneWireBus for PinBus<H> {
	fn reset(&mut self) -> bool {
		self.pin.drive_low();
		self.pin.delay(us(RESET_LOW));
		self.pin.release();
		self.pin.delay(us(PRESENCE_SAMPLE));
		// device pulls the line low to signal presence
		let presence = !self.pin.read_pin();
		self.pin.delay(us(PRESENCE_TAIL));
		presence
	}

	fn write_bit(&mut self, bit: bool) {
		let (low, high) = if bit {
			(WRITE_ONE_LOW, WRITE_ONE_HIGH)
		} else {
			(WRITE_ZERO_LOW, WRITE_ZERO_HIGH)
		};
		self.pin.drive_low();
		self.pin.delay(us(low));
		self.pin.release();
		self.pin.delay(us(high));
	}

	fn read_bit(&mut self) -> bool {
		self.pin.drive_low();
		self.pin.delay(us(READ_INIT_LOW));
		self.pin.release();
		self.pin.delay(us(READ_SAMPLE));
		let bit = self.pin.read_pin();
		self.pin.delay(us(READ_TAIL));
		bit
	}

	fn sample_idle(&mut self) -> bool {
		self.pin.release();
		self.pin.read_pin()
	}

	fn delay(&mut self, duration: Duration) {
		self.pin.delay(duration);
	}

	fn line_name(&self) -> String {
		self.name.clone()
	}
}
