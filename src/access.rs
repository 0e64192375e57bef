//! Whole-image access to the cartridge EEPROM, either on a local bus or
//! through a bridge.
use crate::onewire::{
	DeviceAddress,
	MemoryOperations,
	OneWireBus,
};

/// What the refill logic and the host tool need from a cartridge
/// connection. All transfers start at offset 0.
pub trait EepromAccess {
	fn reset(&mut self) -> crate::AResult<bool>;
	fn search(&mut self) -> crate::AResult<DeviceAddress>;
	fn read_memory(&mut self, len: usize) -> crate::AResult<Vec<u8>>;
	fn write_memory(&mut self, data: &[u8]) -> crate::AResult<()>;
}

impl<'a, A: EepromAccess + ?Sized> EepromAccess for &'a mut A {
	fn reset(&mut self) -> crate::AResult<bool> {
		A::reset(*self)
	}
	fn search(&mut self) -> crate::AResult<DeviceAddress> {
		A::search(*self)
	}
	fn read_memory(&mut self, len: usize) -> crate::AResult<Vec<u8>> {
		A::read_memory(*self, len)
	}
	fn write_memory(&mut self, data: &[u8]) -> crate::AResult<()> {
		A::write_memory(*self, data)
	}
}

/// A bus driven from this process.
pub struct Direct<B: OneWireBus>(pub B);

impl<B: OneWireBus> EepromAccess for Direct<B> {
	fn reset(&mut self) -> crate::AResult<bool> {
		Ok(self.0.reset())
	}

	fn search(&mut self) -> crate::AResult<DeviceAddress> {
		MemoryOperations::search(&mut self.0)
	}

	fn read_memory(&mut self, len: usize) -> crate::AResult<Vec<u8>> {
		MemoryOperations::read_memory(&mut self.0, 0, len)
	}

	fn write_memory(&mut self, data: &[u8]) -> crate::AResult<()> {
		MemoryOperations::write_memory(&mut self.0, 0, data)
	}
}
