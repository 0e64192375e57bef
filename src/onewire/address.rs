use std::fmt;
use std::str;

use super::BusError;

/// Dallas/Maxim CRC8 (polynomial 0x31, reflected: 0x8c), initial value 0.
pub fn crc8(data: &[u8]) -> u8 {
	let mut crc = 0u8;
	for &byte in data {
		crc ^= byte;
		for _ in 0..8 {
			if crc & 1 != 0 {
				crc = (crc >> 1) ^ 0x8c;
			} else {
				crc >>= 1;
			}
		}
	}
	crc
}

/// 64-bit ROM code of a 1-Wire device: family code, 48-bit serial, CRC8.
///
/// Can only be constructed with a valid CRC byte.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceAddress([u8; 8]);

impl DeviceAddress {
	pub fn from_bytes(bytes: [u8; 8]) -> Result<Self, BusError> {
		let expected = crc8(&bytes[..7]);
		if expected != bytes[7] {
			return Err(BusError::CrcMismatch {
				expected,
				actual: bytes[7],
			});
		}
		Ok(DeviceAddress(bytes))
	}

	/// Append the CRC byte to a 7-byte family code + serial.
	pub fn with_crc(rom: [u8; 7]) -> Self {
		let mut bytes = [0u8; 8];
		bytes[..7].copy_from_slice(&rom);
		bytes[7] = crc8(&rom);
		DeviceAddress(bytes)
	}

	pub fn as_bytes(&self) -> &[u8; 8] {
		&self.0
	}

	pub fn family(&self) -> u8 {
		self.0[0]
	}
}

impl fmt::Display for DeviceAddress {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		for b in &self.0 {
			write!(f, "{:02x}", b)?;
		}
		Ok(())
	}
}

impl fmt::Debug for DeviceAddress {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "DeviceAddress({})", self)
	}
}

impl str::FromStr for DeviceAddress {
	type Err = ::failure::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		ensure!(s.len() == 16, "device address needs 16 hex digits: {:?}", s);

		let mut bytes = [0u8; 8];
		with_context!(("invalid device address {:?}", s), {
			hex::decode_to_slice(s, &mut bytes)?;
			Ok(())
		})?;
		Ok(DeviceAddress::from_bytes(bytes)?)
	}
}
