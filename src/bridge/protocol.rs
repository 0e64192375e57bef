use std::fmt;
use std::time::Duration;

use crate::onewire::{
	DeviceAddress,
	MEMORY_SIZE,
	MemoryOperations,
	OneWireBus,
};

const DEBUG_RESETS: usize = 5;
const DEBUG_RESET_PAUSE: Duration = Duration::from_millis(100);

pub fn version_string() -> String {
	format!("Linux 1-Wire Bridge v{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
	Version,
	Reset,
	Search,
	Read(usize),
	Write(Vec<u8>),
	Debug,
}

/// Why a line couldn't be turned into a `Command`; displays as the text
/// after "ERROR ".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseError {
	Unknown,
	InvalidRead,
	InvalidWrite,
	InvalidSize,
	InvalidHex,
	SizeMismatch,
}

impl fmt::Display for ParseError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str(match self {
			ParseError::Unknown => "Unknown command",
			ParseError::InvalidRead => "Invalid READ command",
			ParseError::InvalidWrite => "Invalid WRITE command",
			ParseError::InvalidSize => "Invalid size",
			ParseError::InvalidHex => "Invalid hex data",
			ParseError::SizeMismatch => "Size mismatch",
		})
	}
}

fn parse_size(s: &str) -> Option<Result<usize, ParseError>> {
	let size = s.parse::<i64>().ok()?;
	if size <= 0 || size > MEMORY_SIZE as i64 {
		Some(Err(ParseError::InvalidSize))
	} else {
		Some(Ok(size as usize))
	}
}

impl Command {
	/// Parse one trimmed, non-empty line. Keywords are case-insensitive.
	///
	/// Validates everything that doesn't need the bus, so `WRITE 4 aabbcc`
	/// is a size mismatch whether or not a device was found.
	pub fn parse(line: &str) -> Result<Command, ParseError> {
		let mut words = line.split_whitespace();
		let keyword = words.next().unwrap_or("").to_ascii_uppercase();
		let args: Vec<&str> = words.collect();

		match (keyword.as_str(), args.len()) {
			("VERSION", 0) => Ok(Command::Version),
			("RESET", 0) => Ok(Command::Reset),
			("SEARCH", 0) => Ok(Command::Search),
			("DEBUG", 0) => Ok(Command::Debug),
			("READ", 1) => {
				let size = parse_size(args[0]).ok_or(ParseError::InvalidRead)??;
				Ok(Command::Read(size))
			},
			("READ", _) => Err(ParseError::InvalidRead),
			("WRITE", 2) => {
				let size = parse_size(args[0]).ok_or(ParseError::InvalidWrite)??;
				let data = hex::decode(args[1]).map_err(|_| ParseError::InvalidHex)?;
				if data.len() != size {
					return Err(ParseError::SizeMismatch);
				}
				Ok(Command::Write(data))
			},
			("WRITE", _) => Err(ParseError::InvalidWrite),
			_ => Err(ParseError::Unknown),
		}
	}
}

/// Bus state of one bridge: the bus itself and the device found by the
/// last successful `SEARCH` of the current connection.
pub struct Session<B: OneWireBus> {
	bus: B,
	device: Option<DeviceAddress>,
}

impl<B: OneWireBus> Session<B> {
	pub fn new(bus: B) -> Self {
		Session {
			bus,
			device: None,
		}
	}

	pub fn into_bus(self) -> B {
		self.bus
	}

	pub fn device(&self) -> Option<DeviceAddress> {
		self.device
	}

	/// Forget the device of a previous connection.
	pub fn begin(&mut self) {
		self.device = None;
	}

	/// Response to one input line; `None` for blank lines. Multi-line
	/// responses are joined with "\n", without a trailing newline.
	pub fn handle_line(&mut self, line: &str) -> Option<String> {
		let line = line.trim();
		if line.is_empty() {
			return None;
		}
		debug!("> {}", line);
		let response = match Command::parse(line) {
			Ok(command) => self.execute(command),
			Err(e) => format!("ERROR {}", e),
		};
		debug!("< {}", response.lines().next().unwrap_or(""));
		Some(response)
	}

	pub fn execute(&mut self, command: Command) -> String {
		match command {
			Command::Version => version_string(),
			Command::Reset => {
				if self.bus.reset() {
					"OK".into()
				} else {
					"ERROR Reset failed".into()
				}
			},
			Command::Search => match self.bus.search() {
				Ok(address) => {
					self.device = Some(address);
					format!("ROM:{}", address)
				},
				Err(e) => {
					info!("search failed: {}", e);
					self.device = None;
					"ERROR No device found".into()
				},
			},
			Command::Read(size) => {
				if self.device.is_none() {
					return "ERROR No device found, run SEARCH first".into();
				}
				match self.bus.read_memory(0, size) {
					Ok(data) => format!("DATA:{}", hex::encode(data)),
					Err(e) => {
						warn!("read of {} bytes failed: {}", size, e);
						"ERROR Read failed".into()
					},
				}
			},
			Command::Write(data) => {
				if self.device.is_none() {
					return "ERROR No device found, run SEARCH first".into();
				}
				match self.bus.write_memory(0, &data) {
					Ok(()) => "OK".into(),
					Err(e) => {
						warn!("write of {} bytes failed: {}", data.len(), e);
						"ERROR Write failed".into()
					},
				}
			},
			Command::Debug => self.diagnose(),
		}
	}

	fn diagnose(&mut self) -> String {
		let line = self.bus.line_name();
		let mut out = Vec::new();
		out.push(format!("DEBUG: Testing 1-wire bus on {}...", line));
		out.push("  Required: 4.7k pullup to 3.3V + EEPROM data line".to_string());
		out.push(String::new());
		let idle = if self.bus.sample_idle() {
			"HIGH (good - pullup present)"
		} else {
			"LOW (BAD - no pullup or short to ground!)"
		};
		out.push(format!("  {} state (idle): {}", line, idle));
		out.push(String::new());
		for attempt in 1..=DEBUG_RESETS {
			let result = if self.bus.reset() {
				"PRESENCE DETECTED (device found!)"
			} else {
				"NO PRESENCE (no device responding)"
			};
			out.push(format!("  Reset #{}: {}", attempt, result));
			self.bus.delay(DEBUG_RESET_PAUSE);
		}
		out.push(String::new());
		out.push(format!("DEBUG: If {}=LOW, add 4.7k resistor from {} to 3.3V", line, line));
		out.push(format!("DEBUG: If {}=HIGH but no presence, check EEPROM connection", line));
		out.join("\n")
	}
}
