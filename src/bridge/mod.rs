//! Line protocol that exposes a local 1-Wire bus over a serial port or
//! TCP, and the client that drives a remote bus through it.
//!
//! One command per line, one response per line (`DEBUG` being the only
//! multi-line response). Responses are `OK`, `ROM:<hex>`, `DATA:<hex>`,
//! the version string, or `ERROR <reason>`.

mod client;
mod protocol;
mod server;

pub use self::client::{
	BridgeClient,
	SerialBridge,
	TcpBridge,
	open_serial,
	open_tcp,
};

pub use self::protocol::{
	Command,
	ParseError,
	Session,
	version_string,
};

pub use self::server::{
	DEFAULT_BAUD,
	run_serial,
	run_tcp,
	serve_lines,
	serve_tcp,
};
