#[macro_use]
extern crate clap;
#[macro_use]
extern crate failure;
#[macro_use]
extern crate log;

extern crate cartridge_onewire;
use cartridge_onewire::*;

use std::fs;
use std::io::{
	self,
	Write,
};
use std::process::exit;
use std::time::Duration;

use failure::ResultExt;

use cartridge_onewire::access::{
	Direct,
	EepromAccess,
};
use cartridge_onewire::bridge::{
	Command,
	SerialBridge,
	Session,
	TcpBridge,
};
use cartridge_onewire::onewire::{
	MEMORY_SIZE,
	PinBus,
	SysfsPin,
};

fn get_param<T>(matches: &clap::ArgMatches, name: &str) -> AResult<T>
where
	T: std::str::FromStr,
	failure::Error: From<<T as std::str::FromStr>::Err>,
{
	let param = match matches.value_of(name) {
		Some(p) => p,
		None => bail!("missing parameter {}", name),
	};
	param.parse::<T>().map_err(|e| {
		let e = failure::Error::from(e);
		let msg = format!("invalid parameter {}: {}", name, e);
		e.context(msg).into()
	})
}

fn get_str<'a>(matches: &'a clap::ArgMatches, name: &str) -> AResult<&'a str> {
	match matches.value_of(name) {
		Some(p) => Ok(p),
		None => bail!("missing parameter {}", name),
	}
}

enum Connection {
	Serial(SerialBridge),
	Tcp(TcpBridge),
	Gpio(Direct<PinBus<SysfsPin>>),
}

impl Connection {
	fn open(matches: &clap::ArgMatches) -> AResult<Self> {
		let timeout = Duration::from_secs(get_param(matches, "timeout")?);
		if matches.is_present("serial") {
			let path = get_str(matches, "serial")?;
			let baud: u32 = get_param(matches, "baud")?;
			Ok(Connection::Serial(bridge::open_serial(path, baud, timeout)?))
		} else if matches.is_present("tcp") {
			let address = get_str(matches, "tcp")?;
			Ok(Connection::Tcp(bridge::open_tcp(address, timeout)?))
		} else {
			let pin: u32 = get_param(matches, "gpio")?;
			Ok(Connection::Gpio(Direct(onewire::open_gpio_bus(pin)?)))
		}
	}

	fn access(&mut self) -> &mut dyn EepromAccess {
		match self {
			Connection::Serial(client) => client as &mut dyn EepromAccess,
			Connection::Tcp(client) => client as &mut dyn EepromAccess,
			Connection::Gpio(direct) => direct as &mut dyn EepromAccess,
		}
	}

	fn version(&mut self) -> AResult<String> {
		match self {
			Connection::Serial(client) => client.command("VERSION"),
			Connection::Tcp(client) => client.command("VERSION"),
			Connection::Gpio(Direct(bus)) => Ok(format!("local bus on {}", onewire::OneWireBus::line_name(bus))),
		}
	}

	fn debug(&mut self) -> AResult<Vec<String>> {
		match self {
			Connection::Serial(client) => client.debug(),
			Connection::Tcp(client) => client.debug(),
			Connection::Gpio(Direct(bus)) => {
				let dump = Session::new(bus).execute(Command::Debug);
				Ok(dump.lines().map(str::to_string).collect())
			},
		}
	}
}

fn hexdump(data: &[u8]) {
	for (row, chunk) in data.chunks(16).enumerate() {
		let bytes: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
		println!("{:04x}: {}", row * 16, bytes.join(" "));
	}
}

fn read(connection: &mut Connection, sub_m: &clap::ArgMatches) -> AResult<()> {
	let size: usize = get_param(sub_m, "SIZE")?;
	let access = connection.access();
	let device = access.search()?;
	info!("Reading {} bytes from {}", size, device);
	let data = access.read_memory(size)?;

	match sub_m.value_of("output") {
		Some(path) => {
			fs::write(path, &data).with_context(|e| format!("couldn't write {}: {}", path, e))?;
			info!("Saved {} bytes to {}", data.len(), path);
		},
		None => hexdump(&data),
	}
	Ok(())
}

fn write(connection: &mut Connection, sub_m: &clap::ArgMatches) -> AResult<()> {
	let path = get_str(sub_m, "FILE")?;
	let data = fs::read(path).with_context(|e| format!("couldn't read {}: {}", path, e))?;
	if data.is_empty() || data.len() > MEMORY_SIZE {
		return Err(BusError::SizeOutOfRange(data.len(), MEMORY_SIZE).into());
	}

	let access = connection.access();
	let device = access.search()?;
	info!("Writing {} bytes to {}", data.len(), device);
	access.write_memory(&data)?;

	let written = access.read_memory(data.len())?;
	if written != data {
		return Err(BusError::PostWriteVerificationMismatch.into());
	}
	info!("Write verified");
	Ok(())
}

fn main_app() -> AResult<()> {
	let matches = clap_app!(@app (app_from_crate!())
		(about: "Read and write cartridge EEPROMs through a 1-Wire bridge or a local GPIO pin")
		(@setting SubcommandRequiredElseHelp)
		(global_setting: clap::AppSettings::VersionlessSubcommands)
		(@group connection +required =>
			(@arg serial: -s --serial +takes_value "Bridge on this serial port")
			(@arg tcp: -t --tcp +takes_value "Bridge at HOST:PORT")
			(@arg gpio: -g --gpio +takes_value "Local bus on this GPIO pin")
		)
		(@arg baud: -b --baud +takes_value default_value("115200") "Serial baud rate")
		(@arg timeout: --timeout +takes_value default_value("2") "Response timeout in seconds")
		(@subcommand version =>
			(about: "show bridge version")
		)
		(@subcommand reset =>
			(about: "reset the bus and check for a presence pulse")
		)
		(@subcommand search =>
			(about: "show the ROM address of the connected device")
		)
		(@subcommand read =>
			(about: "read memory from offset 0, as hexdump or into a file")
			(@arg output: -o --output +takes_value "write raw binary to this file")
			(@arg SIZE: default_value("512") "number of bytes (1-512)")
		)
		(@subcommand write =>
			(about: "write a binary image at offset 0 and verify it")
			(@arg FILE: +required "image to write (1-512 bytes)")
		)
		(@subcommand debug =>
			(about: "diagnose the bus wiring")
		)
	).get_matches();

	let mut connection = Connection::open(&matches)?;

	match matches.subcommand() {
		("version", _) => {
			println!("{}", connection.version()?);
			Ok(())
		},
		("reset", _) => {
			if !connection.access().reset()? {
				bail!("no presence pulse");
			}
			println!("OK");
			Ok(())
		},
		("search", _) => {
			println!("{}", connection.access().search()?);
			Ok(())
		},
		("read", Some(sub_m)) => {
			read(&mut connection, sub_m)
		},
		("write", Some(sub_m)) => {
			write(&mut connection, sub_m)
		},
		("debug", _) => {
			let stdout = io::stdout();
			let mut out = stdout.lock();
			for line in connection.debug()? {
				writeln!(out, "{}", line)?;
			}
			Ok(())
		},
		("", _) => bail!("no subcommand"),
		(cmd, _) => bail!("not implemented subcommand {:?}", cmd),
	}
}

fn main() {
	env_logger::from_env(env_logger::Env::default().default_filter_or("info")).init();

	if let Err(e) = main_app() {
		error!("Error: {}", e);
		exit(1);
	}
}
