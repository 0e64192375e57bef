use std::io::{
	self,
	BufRead,
	BufReader,
	Read,
	Write,
};
use std::net::{
	TcpStream,
	ToSocketAddrs,
};
use std::thread;
use std::time::{
	Duration,
	Instant,
};

use crate::access::EepromAccess;
use crate::onewire::{
	BusError,
	DeviceAddress,
	MEMORY_SIZE,
};

const IDENTIFY_ATTEMPTS: usize = 3;
const IDENTIFY_BACKOFF: Duration = Duration::from_millis(500);
const IDENTIFICATION: &str = "1-Wire Bridge";

// transport reads return this often so the response deadline is checked
const READ_SLICE: Duration = Duration::from_millis(100);
// boards reset when the port opens; give them time to print their banner
const SERIAL_BOOT: Duration = Duration::from_millis(500);
const GREETING_WAIT: Duration = Duration::from_secs(1);
// upper bound for dropping late output before a command
const RESYNC_LIMIT: Duration = Duration::from_secs(2);
// one page takes ~100ms on the bus, a full image well over a second
const WRITE_ALLOWANCE_PER_PAGE: Duration = Duration::from_millis(250);

pub type SerialBridge = BridgeClient<Box<dyn serialport::SerialPort>, Box<dyn serialport::SerialPort>>;
pub type TcpBridge = BridgeClient<TcpStream, TcpStream>;

fn remote_error(response: &str) -> failure::Error {
	match response {
		"ERROR No device found" | "ERROR No device found, run SEARCH first" => BusError::NoPresence.into(),
		_ => BusError::Protocol(format!("unexpected response {:?}", truncate(response))).into(),
	}
}

fn truncate(s: &str) -> &str {
	match s.char_indices().nth(100) {
		Some((i, _)) => &s[..i],
		None => s,
	}
}

/// Caller side of the bridge line protocol: one command line out, one
/// response line back.
pub struct BridgeClient<R: Read, W: Write> {
	reader: BufReader<R>,
	writer: W,
	timeout: Duration,
	pending: Vec<u8>,
	// a response missed its deadline and may still arrive
	out_of_sync: bool,
}

fn is_timeout(e: &io::Error) -> bool {
	e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock
}

impl<R: Read, W: Write> BridgeClient<R, W> {
	/// `reader` should have a short read timeout (or none when testing);
	/// `timeout` bounds the wait for each response.
	pub fn new(reader: R, writer: W, timeout: Duration) -> Self {
		BridgeClient {
			reader: BufReader::new(reader),
			writer,
			timeout,
			pending: Vec::new(),
			out_of_sync: false,
		}
	}

	fn read_line_until(&mut self, deadline: Instant) -> crate::AResult<Option<String>> {
		loop {
			match self.reader.read_until(b'\n', &mut self.pending) {
				Ok(0) => {
					return Err(BusError::Transport("connection closed by bridge".into()).into());
				},
				Ok(_) => {
					if self.pending.ends_with(b"\n") {
						let line = String::from_utf8_lossy(&self.pending).trim().to_string();
						self.pending.clear();
						return Ok(Some(line));
					}
				},
				Err(ref e) if is_timeout(e) => (),
				Err(e) => return Err(BusError::Transport(e.to_string()).into()),
			}
			if Instant::now() >= deadline {
				return Ok(None);
			}
		}
	}

	/// Drop everything the bridge sends until the line stays quiet for one
	/// read slice, so a late response isn't taken for the next one.
	fn resync(&mut self) -> crate::AResult<()> {
		let limit = Instant::now() + RESYNC_LIMIT;
		loop {
			match self.reader.read_until(b'\n', &mut self.pending) {
				// closed; the command itself will report it
				Ok(0) => break,
				Ok(_) => {
					if self.pending.ends_with(b"\n") {
						debug!("dropping late response {:?}", truncate(String::from_utf8_lossy(&self.pending).trim()));
						self.pending.clear();
					}
				},
				Err(ref e) if is_timeout(e) => break,
				Err(e) => return Err(BusError::Transport(e.to_string()).into()),
			}
			if Instant::now() >= limit {
				return Err(BusError::Transport(format!("bridge still talking after {:?}", RESYNC_LIMIT)).into());
			}
		}
		self.pending.clear();
		self.out_of_sync = false;
		Ok(())
	}

	fn send(&mut self, line: &str) -> crate::AResult<()> {
		debug!("> {}", truncate(line));
		let result = self.writer.write_all(line.as_bytes())
			.and_then(|_| self.writer.write_all(b"\n"))
			.and_then(|_| self.writer.flush());
		result.map_err(|e| BusError::Transport(e.to_string()).into())
	}

	fn command_with_timeout(&mut self, line: &str, timeout: Duration) -> crate::AResult<String> {
		if self.out_of_sync {
			self.resync()?;
		}
		self.send(line)?;
		let deadline = Instant::now() + timeout;
		loop {
			let response = self.read_line_until(deadline);
			if let Ok(None) | Err(_) = response {
				self.out_of_sync = true;
			}
			match response? {
				// stray blank lines aren't responses
				Some(ref response) if response.is_empty() => (),
				Some(response) => {
					debug!("< {}", truncate(&response));
					return Ok(response);
				},
				None => {
					return Err(BusError::Transport(format!("no response to {:?} within {:?}", truncate(line), timeout)).into());
				},
			}
		}
	}

	pub fn command(&mut self, line: &str) -> crate::AResult<String> {
		let timeout = self.timeout;
		self.command_with_timeout(line, timeout)
	}

	/// Drop everything the bridge sends until `marker` shows up or `wait`
	/// passes.
	pub fn discard_until(&mut self, marker: &str, wait: Duration) -> crate::AResult<()> {
		let deadline = Instant::now() + wait;
		while let Some(line) = self.read_line_until(deadline)? {
			trace!("discarding {:?}", line);
			if line == marker {
				break;
			}
		}
		Ok(())
	}

	/// Ask for the version up to three times, for bridges that are still
	/// booting.
	pub fn identify(&mut self) -> crate::AResult<String> {
		for attempt in 1..=IDENTIFY_ATTEMPTS {
			match self.command("VERSION") {
				Ok(ref version) if version.contains(IDENTIFICATION) => {
					info!("Connected to {}", version);
					return Ok(version.clone());
				},
				Ok(other) => warn!("identification attempt {}: unexpected response {:?}", attempt, truncate(&other)),
				Err(e) => warn!("identification attempt {}: {}", attempt, e),
			}
			if attempt < IDENTIFY_ATTEMPTS {
				thread::sleep(IDENTIFY_BACKOFF);
			}
		}
		Err(BusError::Transport(format!("bridge didn't identify itself after {} attempts", IDENTIFY_ATTEMPTS)).into())
	}

	/// Multi-line `DEBUG` dump; ends with the second hint line.
	pub fn debug(&mut self) -> crate::AResult<Vec<String>> {
		let mut lines = vec![self.command("DEBUG")?];
		if lines[0].starts_with("ERROR") {
			return Err(remote_error(&lines[0]));
		}
		let deadline = Instant::now() + self.timeout + Duration::from_secs(1);
		loop {
			match self.read_line_until(deadline)? {
				Some(line) => {
					let last = line.starts_with("DEBUG:") && line.contains("but no presence");
					lines.push(line);
					if last {
						break;
					}
				},
				None => {
					self.out_of_sync = true;
					break;
				},
			}
		}
		Ok(lines)
	}
}

impl<R: Read, W: Write> EepromAccess for BridgeClient<R, W> {
	fn reset(&mut self) -> crate::AResult<bool> {
		let response = self.command("RESET")?;
		match response.as_str() {
			"OK" => Ok(true),
			"ERROR Reset failed" => Ok(false),
			_ => Err(remote_error(&response)),
		}
	}

	fn search(&mut self) -> crate::AResult<DeviceAddress> {
		let response = self.command("SEARCH")?;
		if response.starts_with("ROM:") {
			response[4..].parse()
		} else {
			Err(remote_error(&response))
		}
	}

	fn read_memory(&mut self, len: usize) -> crate::AResult<Vec<u8>> {
		if len == 0 || len > MEMORY_SIZE {
			return Err(BusError::SizeOutOfRange(len, MEMORY_SIZE).into());
		}
		let response = self.command(&format!("READ {}", len))?;
		if !response.starts_with("DATA:") {
			return Err(remote_error(&response));
		}
		let data = hex::decode(response[5..].trim()).map_err(|e| {
			BusError::Protocol(format!("invalid hex data from bridge: {}", e))
		})?;
		if data.len() != len {
			return Err(BusError::ShortRead { expected: len, actual: data.len() }.into());
		}
		Ok(data)
	}

	fn write_memory(&mut self, data: &[u8]) -> crate::AResult<()> {
		if data.is_empty() || data.len() > MEMORY_SIZE {
			return Err(BusError::SizeOutOfRange(data.len(), MEMORY_SIZE).into());
		}
		let pages = (data.len() + 31) / 32;
		let timeout = self.timeout + WRITE_ALLOWANCE_PER_PAGE * pages as u32;
		let response = self.command_with_timeout(&format!("WRITE {} {}", data.len(), hex::encode(data)), timeout)?;
		match response.as_str() {
			"OK" => Ok(()),
			_ => Err(remote_error(&response)),
		}
	}
}

/// Open a bridge on a serial port and make sure it answers.
pub fn open_serial(path: &str, baud: u32, timeout: Duration) -> crate::AResult<SerialBridge> {
	let client = with_context!(("couldn't open bridge on {}", path), {
		let port = serialport::new(path, baud)
			.timeout(READ_SLICE)
			.open()?;
		thread::sleep(SERIAL_BOOT);
		port.clear(serialport::ClearBuffer::Input)?;
		let reader = port.try_clone()?;
		Ok(BridgeClient::new(reader, port, timeout))
	})?;
	connect(client)
}

/// Connect to a TCP bridge, skip its greeting and make sure it answers.
pub fn open_tcp<A: ToSocketAddrs>(address: A, timeout: Duration) -> crate::AResult<TcpBridge> {
	let mut client = with_context!("couldn't connect to bridge", {
		let stream = TcpStream::connect(address)?;
		stream.set_read_timeout(Some(READ_SLICE))?;
		stream.set_nodelay(true)?;
		let reader = stream.try_clone()?;
		Ok(BridgeClient::new(reader, stream, timeout))
	})?;
	client.discard_until("Ready", GREETING_WAIT)?;
	connect(client)
}

fn connect<R: Read, W: Write>(mut client: BridgeClient<R, W>) -> crate::AResult<BridgeClient<R, W>> {
	client.identify()?;
	Ok(client)
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::bridge::{
		Session,
		serve_tcp,
		version_string,
	};
	use crate::onewire::doubles::SimulatedEeprom;
	use crate::onewire::kind_of;
	use std::collections::VecDeque;
	use std::io::Cursor;
	use std::net::TcpListener;
	use std::sync::Arc;
	use std::sync::atomic::{
		AtomicBool,
		Ordering,
	};

	fn scripted(responses: &str) -> BridgeClient<Cursor<Vec<u8>>, Vec<u8>> {
		BridgeClient::new(Cursor::new(responses.as_bytes().to_vec()), Vec::new(), Duration::from_millis(10))
	}

	fn sent(client: &BridgeClient<Cursor<Vec<u8>>, Vec<u8>>) -> String {
		String::from_utf8(client.writer.clone()).unwrap()
	}

	#[test]
	fn sends_one_line_per_command() {
		let mut client = scripted("OK\n");

		assert!(client.reset().unwrap());
		assert_eq!(sent(&client), "RESET\n");
	}

	#[test]
	fn identify_retries_until_version_matches() {
		let mut client = scripted("garbage from boot\nLinux 1-Wire Bridge v0.1.0\n");

		let version = client.identify().unwrap();

		assert_eq!(version, "Linux 1-Wire Bridge v0.1.0");
		assert_eq!(sent(&client), "VERSION\nVERSION\n");
	}

	#[test]
	fn identify_gives_up_after_three_attempts() {
		let mut client = scripted("a\nb\nc\nLinux 1-Wire Bridge v0.1.0\n");

		assert!(client.identify().is_err());
		assert_eq!(sent(&client), "VERSION\nVERSION\nVERSION\n");
	}

	#[test]
	fn search_parses_rom_and_maps_missing_device() {
		let rom = DeviceAddress::with_crc([0x23, 1, 2, 3, 4, 5, 6]);
		let mut client = scripted(&format!("ROM:{}\nERROR No device found\n", rom));

		assert_eq!(client.search().unwrap(), rom);
		let e = client.search().unwrap_err();
		assert_eq!(kind_of(&e), Some(&BusError::NoPresence));
	}

	#[test]
	fn short_data_is_reported() {
		let mut client = scripted("DATA:0102\n");

		let e = client.read_memory(3).unwrap_err();

		assert_eq!(kind_of(&e), Some(&BusError::ShortRead { expected: 3, actual: 2 }));
	}

	#[test]
	fn sizes_are_checked_before_sending() {
		let mut client = scripted("");

		assert!(client.read_memory(600).is_err());
		assert!(client.write_memory(&[]).is_err());
		assert_eq!(sent(&client), "");
	}

	#[test]
	fn closed_connection_is_a_transport_error() {
		let mut client = scripted("");

		let e = client.command("VERSION").unwrap_err();

		match kind_of(&e) {
			Some(BusError::Transport(_)) => (),
			other => panic!("unexpected error {:?}", other),
		}
	}

	// yields the chunks in order; `None` is a read timeout
	struct SlowReader(VecDeque<Option<Vec<u8>>>);

	impl Read for SlowReader {
		fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
			match self.0.pop_front() {
				Some(Some(chunk)) => {
					buf[..chunk.len()].copy_from_slice(&chunk);
					Ok(chunk.len())
				},
				Some(None) => Err(io::ErrorKind::TimedOut.into()),
				None => Ok(0),
			}
		}
	}

	#[test]
	fn late_response_is_dropped_before_next_command() {
		// Given: the VERSION answer only shows up after its deadline
		let rom = DeviceAddress::with_crc([0x23, 1, 2, 3, 4, 5, 6]);
		let reader = SlowReader(vec![
			None,
			Some(b"Linux 1-Wire Bridge v0.1.0\n".to_vec()),
			None,
			Some(format!("ROM:{}\n", rom).into_bytes()),
		].into_iter().collect());
		let mut client = BridgeClient::new(reader, Vec::new(), Duration::from_millis(0));

		// When
		let version = client.command("VERSION");
		let found = client.search();

		// Then
		assert!(version.is_err());
		assert_eq!(found.unwrap(), rom);
		assert_eq!(String::from_utf8(client.writer.clone()).unwrap(), "VERSION\nSEARCH\n");
	}

	#[test]
	fn slow_booting_bridge_stays_in_step() {
		// Given: a bridge that answers its first command after the client gave up
		let listener = TcpListener::bind("127.0.0.1:0").unwrap();
		let address = listener.local_addr().unwrap();
		let rom = DeviceAddress::with_crc([0x23, 1, 2, 3, 4, 5, 6]);
		let bridge = thread::spawn(move || {
			let (stream, _) = listener.accept().unwrap();
			let mut writer = stream.try_clone().unwrap();
			writer.write_all(b"booting\nReady\n").unwrap();
			let mut first = true;
			for line in BufReader::new(stream).lines() {
				let line = match line {
					Ok(line) => line,
					Err(_) => break,
				};
				if first {
					thread::sleep(Duration::from_millis(400));
					first = false;
				}
				let response = match line.as_str() {
					"VERSION" => version_string(),
					"SEARCH" => format!("ROM:{}", rom),
					_ => "ERROR Unknown command".to_string(),
				};
				if writer.write_all(format!("{}\n", response).as_bytes()).is_err() {
					break;
				}
			}
		});

		// When
		let mut client = open_tcp(address, Duration::from_millis(300)).unwrap();
		let found = client.search();
		drop(client);
		bridge.join().unwrap();

		// Then
		assert_eq!(found.unwrap(), rom);
	}

	#[test]
	fn tcp_client_drives_remote_bus() {
		// Given: a bridge serving a simulated cartridge on loopback
		let listener = TcpListener::bind("127.0.0.1:0").unwrap();
		let address = listener.local_addr().unwrap();
		let stop = Arc::new(AtomicBool::new(false));
		let server_stop = stop.clone();
		let server = thread::spawn(move || {
			let mut session = Session::new(SimulatedEeprom::ds2433());
			serve_tcp(&mut session, listener, &server_stop).unwrap();
			session.into_bus()
		});

		// When
		let mut client = open_tcp(address, Duration::from_secs(5)).unwrap();
		let rom = client.search().unwrap();
		client.write_memory(&[0xde, 0xad, 0xbe, 0xef]).unwrap();
		let data = client.read_memory(5).unwrap();
		let debug = client.debug().unwrap();
		drop(client);
		stop.store(true, Ordering::SeqCst);
		let device = server.join().unwrap();

		// Then
		assert_eq!(rom, device.rom);
		assert_eq!(data, vec![0xde, 0xad, 0xbe, 0xef, 0xff]);
		assert_eq!(&device.memory[..4], &[0xde, 0xad, 0xbe, 0xef]);
		assert!(debug.len() > 10);
		assert!(debug.last().unwrap().contains("but no presence"));
		assert!(version_string().contains(IDENTIFICATION));
	}
}
