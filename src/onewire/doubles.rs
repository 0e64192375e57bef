//! Test doubles: a recording pin and a bit-level DS2433 simulation.
use std::collections::VecDeque;
use std::time::Duration;

use super::{
	DeviceAddress,
	Hardware,
	MEMORY_SIZE,
	OneWireBus,
	PAGE_SIZE,
};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PinEvent {
	Low,
	Release,
	Sample(bool),
	Delay(Duration),
}

/// Pin that records every call; sampled levels are taken from `levels`
/// (idle high once exhausted).
#[derive(Debug, Default)]
pub struct RecordingPin {
	pub events: Vec<PinEvent>,
	pub levels: VecDeque<bool>,
}

impl Hardware for RecordingPin {
	fn drive_low(&mut self) {
		self.events.push(PinEvent::Low);
	}

	fn release(&mut self) {
		self.events.push(PinEvent::Release);
	}

	fn read_pin(&mut self) -> bool {
		let level = self.levels.pop_front().unwrap_or(true);
		self.events.push(PinEvent::Sample(level));
		level
	}

	fn delay(&mut self, duration: Duration) {
		self.events.push(PinEvent::Delay(duration));
	}
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum State {
	// waiting for a reset pulse
	Idle,
	RomCommand,
	FunctionCommand,
	Address {
		command: u8,
		bytes: usize,
	},
	ScratchpadData,
	CopyAuthorization {
		bytes: usize,
	},
	// device only answers read slots until the next reset
	Talking,
}

/// A DS2433 (4 kbit, 16 pages of 32 bytes) simulated at bit level.
///
/// Only reset/write_bit/read_bit are used by the code under test, so all
/// byte assembly and command decoding happens here.
pub struct SimulatedEeprom {
	pub rom: DeviceAddress,
	pub memory: [u8; MEMORY_SIZE],
	pub present: bool,
	pub idle_level: bool,
	// flip a bit in the scratchpad echo of every write
	pub corrupt_scratchpad: bool,
	// after this many committed copies, stop committing
	pub fail_after_copies: Option<usize>,
	// (target address, byte count) of every Write Scratchpad
	pub scratchpad_writes: Vec<(u16, usize)>,
	pub copies: usize,
	pub elapsed: Duration,
	pub resets: usize,

	state: State,
	in_byte: u8,
	in_bits: u8,
	outgoing: VecDeque<u8>,
	out_bit: u8,
	read_pointer: Option<usize>,
	target: u16,
	scratchpad: [u8; PAGE_SIZE],
	ending_offset: u8,
	in_scratchpad: usize,
	authorization: [u8; 3],
}

impl SimulatedEeprom {
	pub fn new(rom: DeviceAddress) -> Self {
		SimulatedEeprom {
			rom,
			memory: [0xff; MEMORY_SIZE],
			present: true,
			idle_level: true,
			corrupt_scratchpad: false,
			fail_after_copies: None,
			scratchpad_writes: Vec::new(),
			copies: 0,
			elapsed: Duration::from_secs(0),
			resets: 0,
			state: State::Idle,
			in_byte: 0,
			in_bits: 0,
			outgoing: VecDeque::new(),
			out_bit: 0,
			read_pointer: None,
			target: 0,
			scratchpad: [0xff; PAGE_SIZE],
			ending_offset: 0,
			in_scratchpad: 0,
			authorization: [0; 3],
		}
	}

	pub fn ds2433() -> Self {
		SimulatedEeprom::new(DeviceAddress::with_crc([0x23, 0x62, 0x47, 0x4d, 0x01, 0x00, 0x00]))
	}

	fn finish_scratchpad_write(&mut self) {
		if self.state == State::ScratchpadData {
			self.scratchpad_writes.push((self.target, self.in_scratchpad));
		}
	}

	fn receive_byte(&mut self, byte: u8) {
		let state = self.state;
		self.state = match state {
			State::Idle | State::Talking => state,
			State::RomCommand => match byte {
				0x33 => {
					self.outgoing.extend(self.rom.as_bytes().iter().cloned());
					State::Talking
				},
				0xcc => State::FunctionCommand,
				_ => State::Idle,
			},
			State::FunctionCommand => match byte {
				0xf0 | 0x0f => State::Address { command: byte, bytes: 0 },
				0xaa => {
					let [ta1, ta2] = self.target.to_le_bytes();
					self.outgoing.extend(&[ta1, ta2, self.ending_offset]);
					let start = (self.target as usize) % PAGE_SIZE;
					for i in start..=(self.ending_offset as usize) {
						let mut b = self.scratchpad[i];
						if self.corrupt_scratchpad && i == start {
							b ^= 0x01;
						}
						self.outgoing.push_back(b);
					}
					State::Talking
				},
				0x55 => State::CopyAuthorization { bytes: 0 },
				_ => State::Idle,
			},
			State::Address { command, bytes } => {
				if bytes == 0 {
					self.target = byte as u16;
					State::Address { command, bytes: 1 }
				} else {
					self.target |= (byte as u16) << 8;
					self.target &= (MEMORY_SIZE - 1) as u16;
					if command == 0xf0 {
						self.read_pointer = Some(self.target as usize);
						State::Talking
					} else {
						self.scratchpad = [0xff; PAGE_SIZE];
						self.ending_offset = (self.target as usize % PAGE_SIZE) as u8;
						self.in_scratchpad = 0;
						State::ScratchpadData
					}
				}
			},
			State::ScratchpadData => {
				let offset = self.target as usize % PAGE_SIZE + self.in_scratchpad;
				// the real device ignores data past the end of the page
				if offset < PAGE_SIZE {
					self.scratchpad[offset] = byte;
					self.ending_offset = offset as u8;
					self.in_scratchpad += 1;
				}
				State::ScratchpadData
			},
			State::CopyAuthorization { bytes } => {
				self.authorization[bytes] = byte;
				if bytes < 2 {
					State::CopyAuthorization { bytes: bytes + 1 }
				} else {
					self.copy_scratchpad();
					State::Talking
				}
			},
		};
	}

	fn copy_scratchpad(&mut self) {
		let [ta1, ta2] = self.target.to_le_bytes();
		let es = self.ending_offset;
		if self.authorization != [ta1, ta2, es] {
			return;
		}
		if let Some(limit) = self.fail_after_copies {
			if self.copies >= limit {
				return;
			}
		}
		let start = self.target as usize % PAGE_SIZE;
		let page = self.target as usize - start;
		for i in start..=(es as usize) {
			self.memory[page + i] = self.scratchpad[i];
		}
		self.copies += 1;
	}

	fn next_output_bit(&mut self) -> bool {
		if self.outgoing.is_empty() {
			if let Some(ptr) = self.read_pointer {
				if ptr < MEMORY_SIZE {
					self.outgoing.push_back(self.memory[ptr]);
					self.read_pointer = Some(ptr + 1);
				}
			}
		}
		let byte = match self.outgoing.front() {
			Some(b) => *b,
			// nobody drives the line: pulled up
			None => return true,
		};
		let bit = 0 != (byte >> self.out_bit) & 1;
		self.out_bit += 1;
		if self.out_bit == 8 {
			self.out_bit = 0;
			self.outgoing.pop_front();
		}
		bit
	}
}

impl OneWireBus for SimulatedEeprom {
	fn reset(&mut self) -> bool {
		self.finish_scratchpad_write();
		self.resets += 1;
		self.in_byte = 0;
		self.in_bits = 0;
		self.outgoing.clear();
		self.out_bit = 0;
		self.read_pointer = None;
		self.state = if self.present { State::RomCommand } else { State::Idle };
		self.present
	}

	fn write_bit(&mut self, bit: bool) {
		if !self.present || self.state == State::Idle {
			return;
		}
		if bit {
			self.in_byte |= 1 << self.in_bits;
		}
		self.in_bits += 1;
		if self.in_bits == 8 {
			let byte = self.in_byte;
			self.in_byte = 0;
			self.in_bits = 0;
			self.receive_byte(byte);
		}
	}

	fn read_bit(&mut self) -> bool {
		if !self.present {
			return true;
		}
		self.next_output_bit()
	}

	fn sample_idle(&mut self) -> bool {
		self.idle_level
	}

	fn delay(&mut self, duration: Duration) {
		self.elapsed += duration;
	}

	fn line_name(&self) -> String {
		"GPIO4".into()
	}
}
