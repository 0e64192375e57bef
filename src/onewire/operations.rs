use std::ops::{
	Deref,
	DerefMut,
};
use std::time::Duration;

use super::{
	BusError,
	DeviceAddress,
	OneWireBus,
};

// ROM commands
const READ_ROM: u8 = 0x33;
const SKIP_ROM: u8 = 0xcc;

// DS2433 memory function commands
const READ_MEMORY: u8 = 0xf0;
const WRITE_SCRATCHPAD: u8 = 0x0f;
const READ_SCRATCHPAD: u8 = 0xaa;
const COPY_SCRATCHPAD: u8 = 0x55;

pub const PAGE_SIZE: usize = 32;
pub const MEMORY_SIZE: usize = 512;

const SCRATCHPAD_SETTLE: Duration = Duration::from_millis(10);
// tPROGMAX is 5ms on the datasheet; stay well clear of it
const COPY_COMPLETE: Duration = Duration::from_millis(15);
const BLOCK_GAP: Duration = Duration::from_millis(50);

/// A reset + Skip ROM sequence addressing the single device on the bus.
///
/// Leaves the line released when dropped, whatever happened in between.
pub struct Transaction<'a, B: ?Sized + OneWireBus + 'a>(&'a mut B);

impl<'a, B: ?Sized + OneWireBus> Drop for Transaction<'a, B> {
	fn drop(&mut self) {
		self.0.sample_idle();
	}
}

impl<'a, B: ?Sized + OneWireBus> Deref for Transaction<'a, B> {
	type Target = B;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

impl<'a, B: ?Sized + OneWireBus> DerefMut for Transaction<'a, B> {
	fn deref_mut(&mut self) -> &mut Self::Target {
		&mut self.0
	}
}

/// Splits a write at `address` of `len` bytes into blocks that never
/// cross a page boundary.
#[derive(Clone, Debug)]
pub struct PageChunks {
	address: usize,
	end: usize,
}

impl PageChunks {
	pub fn new(address: usize, len: usize) -> Self {
		PageChunks {
			address,
			end: address + len,
		}
	}
}

impl Iterator for PageChunks {
	// (address, length)
	type Item = (usize, usize);

	fn next(&mut self) -> Option<Self::Item> {
		if self.address >= self.end {
			return None;
		}
		let page_end = (self.address / PAGE_SIZE + 1) * PAGE_SIZE;
		let len = (page_end.min(self.end) - self.address).min(PAGE_SIZE);
		let chunk = (self.address, len);
		self.address += len;
		Some(chunk)
	}
}

fn check_range(address: usize, len: usize) -> crate::AResult<()> {
	if len == 0 || address + len > MEMORY_SIZE {
		return Err(BusError::SizeOutOfRange(address + len, MEMORY_SIZE).into());
	}
	Ok(())
}

/// DS2433 memory access on a bus with exactly one device.
pub trait MemoryOperations: OneWireBus {
	fn start_transaction(&mut self) -> crate::AResult<Transaction<Self>> {
		if !self.reset() {
			return Err(BusError::NoPresence.into());
		}
		self.write_byte(SKIP_ROM);
		Ok(Transaction(self))
	}

	/// Read ROM; only works with a single device on the bus.
	fn search(&mut self) -> crate::AResult<DeviceAddress> {
		if !self.reset() {
			return Err(BusError::NoPresence.into());
		}
		let mut tx = Transaction(self);
		tx.write_byte(READ_ROM);
		let mut rom = [0u8; 8];
		for b in rom.iter_mut() {
			*b = tx.read_byte();
		}
		trace!("read ROM: {:02x?}", rom);
		Ok(DeviceAddress::from_bytes(rom)?)
	}

	/// A device that stops answering reads as 0xff; callers compare
	/// content, not length.
	fn read_memory(&mut self, address: u16, len: usize) -> crate::AResult<Vec<u8>> {
		check_range(address as usize, len)?;
		let mut tx = self.start_transaction()?;
		tx.write_byte(READ_MEMORY);
		tx.write_bytes(&address.to_le_bytes());
		let mut result = Vec::with_capacity(len);
		for _ in 0..len {
			result.push(tx.read_byte());
		}
		Ok(result)
	}

	/// Write up to one page through the scratchpad: write, read back and
	/// compare, then copy to memory with the authorization bytes exactly
	/// as the device echoed them.
	fn write_block(&mut self, address: u16, data: &[u8]) -> crate::AResult<()> {
		check_range(address as usize, data.len())?;
		let offset = address as usize % PAGE_SIZE;
		ensure!(offset + data.len() <= PAGE_SIZE,
			"block at 0x{:03x} with {} bytes crosses a page boundary", address, data.len()
		);

		{
			let mut tx = self.start_transaction()?;
			tx.write_byte(WRITE_SCRATCHPAD);
			tx.write_bytes(&address.to_le_bytes());
			tx.write_bytes(data);
		}
		self.delay(SCRATCHPAD_SETTLE);

		let authorization = {
			let mut tx = self.start_transaction()?;
			tx.write_byte(READ_SCRATCHPAD);
			let ta1 = tx.read_byte();
			let ta2 = tx.read_byte();
			let es = tx.read_byte();
			if u16::from_le_bytes([ta1, ta2]) != address {
				warn!("scratchpad address echo 0x{:02x}{:02x} for block at 0x{:03x}", ta2, ta1, address);
				return Err(BusError::ScratchpadVerificationMismatch { address }.into());
			}
			for (i, &expected) in data.iter().enumerate() {
				let echo = tx.read_byte();
				if echo != expected {
					warn!("scratchpad byte {} at 0x{:03x}: wrote 0x{:02x}, read 0x{:02x}", i, address, expected, echo);
					return Err(BusError::ScratchpadVerificationMismatch { address }.into());
				}
			}
			[ta1, ta2, es]
		};

		{
			let mut tx = self.start_transaction()?;
			tx.write_byte(COPY_SCRATCHPAD);
			tx.write_bytes(&authorization);
		}
		// no completion polling: worst case programming time
		self.delay(COPY_COMPLETE);

		debug!("committed {} bytes at 0x{:03x}", data.len(), address);
		Ok(())
	}

	/// Not transactional: a failing block leaves earlier blocks committed.
	fn write_memory(&mut self, address: u16, data: &[u8]) -> crate::AResult<()> {
		check_range(address as usize, data.len())?;
		let mut committed = 0usize;
		for (block_address, len) in PageChunks::new(address as usize, data.len()) {
			let start = block_address - address as usize;
			if let Err(e) = self.write_block(block_address as u16, &data[start..start + len]) {
				if committed == 0 {
					return Err(e);
				}
				error!("write failed after {} of {} bytes: {}", committed, data.len(), e);
				return Err(BusError::PartialWrite {
					committed,
					total: data.len(),
					reason: e.to_string(),
				}.into());
			}
			committed += len;
			self.delay(BLOCK_GAP);
		}
		Ok(())
	}
}

impl<B: OneWireBus + ?Sized> MemoryOperations for B {
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::onewire::doubles::SimulatedEeprom;
	use crate::onewire::kind_of;

	fn payload(len: usize) -> Vec<u8> {
		(0..len).map(|i| (i * 7 + 3) as u8).collect()
	}

	#[test]
	fn search_returns_rom_with_valid_crc() {
		let mut device = SimulatedEeprom::ds2433();
		let rom = device.rom;

		assert_eq!(device.search().unwrap(), rom);
	}

	#[test]
	fn search_without_device_fails_with_no_presence() {
		let mut device = SimulatedEeprom::ds2433();
		device.present = false;

		let e = device.search().unwrap_err();
		assert_eq!(kind_of(&e), Some(&BusError::NoPresence));
	}

	#[test]
	fn page_chunks_never_cross_pages() {
		let chunks: Vec<_> = PageChunks::new(0, 64).collect();
		assert_eq!(chunks, vec![(0, 32), (32, 32)]);

		let chunks: Vec<_> = PageChunks::new(20, 50).collect();
		assert_eq!(chunks, vec![(20, 12), (32, 32), (64, 6)]);

		for (address, len) in PageChunks::new(5, 507) {
			assert!(len >= 1 && len <= PAGE_SIZE);
			assert_eq!(address / PAGE_SIZE, (address + len - 1) / PAGE_SIZE);
		}
	}

	#[test]
	fn write_memory_issues_page_aligned_scratchpad_writes() {
		// Given
		let mut device = SimulatedEeprom::ds2433();

		// When
		device.write_memory(0, &payload(64)).unwrap();

		// Then
		assert_eq!(device.scratchpad_writes, vec![(0, 32), (32, 32)]);
		assert_eq!(device.copies, 2);
	}

	#[test]
	fn write_then_read_round_trips() {
		for &len in &[1usize, 31, 32, 33, 64, 512] {
			let mut device = SimulatedEeprom::ds2433();
			let data = payload(len);

			device.write_memory(0, &data).unwrap();

			assert_eq!(device.read_memory(0, len).unwrap(), data, "length {}", len);
		}
	}

	#[test]
	fn write_block_waits_for_settle_and_copy() {
		let mut device = SimulatedEeprom::ds2433();

		device.write_block(0x40, &[1, 2, 3]).unwrap();

		assert_eq!(device.elapsed, Duration::from_millis(25));
		assert_eq!(&device.memory[0x40..0x43], &[1, 2, 3]);
	}

	#[test]
	fn unaligned_block_is_rejected() {
		let mut device = SimulatedEeprom::ds2433();

		assert!(device.write_block(30, &[0; 4]).is_err());
		assert!(device.scratchpad_writes.is_empty());
	}

	#[test]
	fn corrupted_scratchpad_is_not_committed() {
		// Given
		let mut device = SimulatedEeprom::ds2433();
		device.corrupt_scratchpad = true;

		// When
		let e = device.write_memory(0, &payload(40)).unwrap_err();

		// Then
		assert_eq!(kind_of(&e), Some(&BusError::ScratchpadVerificationMismatch { address: 0 }));
		assert_eq!(device.copies, 0);
		assert!(device.memory.iter().all(|&b| b == 0xff));
	}

	#[test]
	fn removed_device_mid_write_reports_committed_bytes() {
		let mut device = RemovedAfter {
			device: SimulatedEeprom::ds2433(),
			resets_left: 3 * 2,
		};

		let e = device.write_memory(0, &payload(96)).unwrap_err();

		match kind_of(&e) {
			Some(BusError::PartialWrite { committed, total, .. }) => {
				assert_eq!(*committed, 64);
				assert_eq!(*total, 96);
			},
			other => panic!("unexpected error {:?}", other),
		}
	}

	#[test]
	fn out_of_range_reads_are_rejected() {
		let mut device = SimulatedEeprom::ds2433();

		assert!(device.read_memory(0, 0).is_err());
		assert!(device.read_memory(0, 513).is_err());
		assert!(device.read_memory(500, 13).is_err());
		assert_eq!(device.resets, 0);
	}

	// device disappears after a number of resets
	struct RemovedAfter {
		device: SimulatedEeprom,
		resets_left: usize,
	}

	impl OneWireBus for RemovedAfter {
		fn reset(&mut self) -> bool {
			if self.resets_left == 0 {
				self.device.present = false;
			} else {
				self.resets_left -= 1;
			}
			self.device.reset()
		}
		fn write_bit(&mut self, bit: bool) {
			self.device.write_bit(bit)
		}
		fn read_bit(&mut self) -> bool {
			self.device.read_bit()
		}
		fn sample_idle(&mut self) -> bool {
			self.device.sample_idle()
		}
		fn delay(&mut self, duration: Duration) {
			self.device.delay(duration)
		}
	}
}
