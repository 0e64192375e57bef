use chrono::{
	DateTime,
	Utc,
};

use crate::onewire::DeviceAddress;

/// Fields of a decoded cartridge the refill logic looks at. Units are
/// whatever the codec uses for material quantity.
pub trait Record {
	fn current_quantity(&self) -> f64;
	fn initial_quantity(&self) -> f64;
	fn set_current_quantity(&mut self, quantity: f64);
	fn set_last_use(&mut self, when: DateTime<Utc>);
}

/// Turns raw EEPROM images into records and back.
///
/// Images are bound to the device address and a machine type; decoding
/// fails when any checksum or the decryption doesn't validate.
pub trait Codec {
	type Record: Record;

	/// Machine types in the order auto-detection tries them.
	fn machine_types(&self) -> Vec<String>;

	fn decode(&self, machine: &str, device: &DeviceAddress, image: &[u8]) -> crate::AResult<Self::Record>;

	fn encode(&self, machine: &str, device: &DeviceAddress, record: &Self::Record) -> crate::AResult<Vec<u8>>;
}

impl<'a, C: Codec + ?Sized> Codec for &'a C {
	type Record = C::Record;

	fn machine_types(&self) -> Vec<String> {
		C::machine_types(*self)
	}

	fn decode(&self, machine: &str, device: &DeviceAddress, image: &[u8]) -> crate::AResult<Self::Record> {
		C::decode(*self, machine, device, image)
	}

	fn encode(&self, machine: &str, device: &DeviceAddress, record: &Self::Record) -> crate::AResult<Vec<u8>> {
		C::encode(*self, machine, device, record)
	}
}
