use std::io::{
	self,
	BufRead,
	BufReader,
	Read,
	Write,
};
use std::net::{
	TcpListener,
	TcpStream,
};
use std::sync::atomic::{
	AtomicBool,
	Ordering,
};
use std::thread;
use std::time::Duration;

use super::{
	Session,
	version_string,
};
use crate::onewire::{
	BusError,
	OneWireBus,
};

// how often blocking reads come back to look at the stop flag
const POLL_INTERVAL: Duration = Duration::from_millis(500);
const ACCEPT_POLL: Duration = Duration::from_millis(50);
const REOPEN_DELAY: Duration = Duration::from_secs(1);

pub const DEFAULT_BAUD: u32 = 115_200;

// "WRITE 512 " and 1024 hex digits, plus slack for whitespace
const MAX_LINE_LENGTH: usize = 1100;

fn is_timeout(e: &io::Error) -> bool {
	match e.kind() {
		io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => true,
		_ => false,
	}
}

fn transport(e: io::Error) -> failure::Error {
	BusError::Transport(e.to_string()).into()
}

/// Answer command lines from `reader` on `writer` until end of stream or
/// until `stop` is set. Read timeouts are not errors.
///
/// Lines longer than any valid command are dropped up to their newline and
/// answered with `ERROR Unknown command`.
pub fn serve_lines<B, R, W>(session: &mut Session<B>, mut reader: R, writer: &mut W, stop: &AtomicBool) -> crate::AResult<()>
where
	B: OneWireBus,
	R: BufRead,
	W: Write + ?Sized,
{
	let mut line = Vec::new();
	let mut oversized = false;
	while !stop.load(Ordering::SeqCst) {
		// one byte over the limit tells a full line from a cut-off one
		let room = (MAX_LINE_LENGTH + 1 - line.len()) as u64;
		let eof = match (&mut reader).take(room).read_until(b'\n', &mut line) {
			Ok(0) => true,
			Ok(_) => {
				if !line.ends_with(b"\n") && line.len() > MAX_LINE_LENGTH {
					if !oversized {
						warn!("dropping line longer than {} bytes", MAX_LINE_LENGTH);
					}
					oversized = true;
					line.clear();
					continue;
				}
				!line.ends_with(b"\n")
			},
			Err(ref e) if is_timeout(e) => continue,
			Err(e) => return Err(transport(e)),
		};

		let response = if oversized {
			oversized = false;
			if eof {
				None
			} else {
				Some("ERROR Unknown command".to_string())
			}
		} else if !line.is_empty() {
			session.handle_line(&String::from_utf8_lossy(&line))
		} else {
			None
		};
		line.clear();

		if let Some(response) = response {
			writer.write_all(response.as_bytes()).map_err(transport)?;
			writer.write_all(b"\n").map_err(transport)?;
			writer.flush().map_err(transport)?;
		}

		if eof {
			break;
		}
	}
	Ok(())
}

/// Serve on a serial port until `stop` is set; port errors close and
/// reopen the port.
pub fn run_serial<B: OneWireBus>(session: &mut Session<B>, path: &str, baud: u32, stop: &AtomicBool) -> crate::AResult<()> {
	info!("Starting 1-Wire bridge on {} ({} baud)", path, baud);
	while !stop.load(Ordering::SeqCst) {
		let result = with_context!(("serial port {}", path), {
			let mut port = serialport::new(path, baud)
				.timeout(POLL_INTERVAL)
				.open()?;
			let reader = BufReader::new(port.try_clone()?);
			info!("{}", version_string());
			info!("Ready");
			session.begin();
			serve_lines(session, reader, &mut port, stop)
		});
		if let Err(e) = result {
			error!("{}", e);
			thread::sleep(REOPEN_DELAY);
		}
	}
	info!("Shutting down");
	Ok(())
}

fn serve_client<B: OneWireBus>(session: &mut Session<B>, mut stream: TcpStream, stop: &AtomicBool) -> crate::AResult<()> {
	stream.set_nonblocking(false)?;
	stream.set_read_timeout(Some(POLL_INTERVAL))?;
	stream.write_all(format!("{}\nReady\n", version_string()).as_bytes())?;

	let reader = BufReader::new(stream.try_clone()?);
	session.begin();
	serve_lines(session, reader, &mut stream, stop)
}

/// Accept one client at a time; further clients wait in the listen
/// backlog until the current one disconnects.
pub fn serve_tcp<B: OneWireBus>(session: &mut Session<B>, listener: TcpListener, stop: &AtomicBool) -> crate::AResult<()> {
	listener.set_nonblocking(true)?;
	info!("{}", version_string());
	info!("Listening on {}", listener.local_addr()?);

	while !stop.load(Ordering::SeqCst) {
		let (stream, peer) = match listener.accept() {
			Ok(client) => client,
			Err(ref e) if is_timeout(e) => {
				thread::sleep(ACCEPT_POLL);
				continue;
			},
			Err(e) => return Err(e.into()),
		};
		info!("Client connected: {}", peer);
		if let Err(e) = serve_client(session, stream, stop) {
			warn!("Client {}: {}", peer, e);
		}
		info!("Client disconnected: {}", peer);
	}
	info!("Shutting down");
	Ok(())
}

pub fn run_tcp<B: OneWireBus>(session: &mut Session<B>, port: u16, stop: &AtomicBool) -> crate::AResult<()> {
	info!("Starting 1-Wire bridge TCP server on port {}", port);
	let listener = with_context!(("couldn't listen on port {}", port), {
		Ok(TcpListener::bind(("0.0.0.0", port))?)
	})?;
	serve_tcp(session, listener, stop)
}
