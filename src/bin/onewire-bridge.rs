#[macro_use]
extern crate clap;
#[macro_use]
extern crate failure;
#[macro_use]
extern crate log;

extern crate cartridge_onewire;
use cartridge_onewire::*;

use std::process::exit;

use cartridge_onewire::bridge::Session;

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

fn main_app() -> AResult<()> {
	let matches = clap_app!(@app (app_from_crate!())
		(about: "Serve a 1-Wire bus on a GPIO pin over a serial port or TCP")
		(@arg pin: -p --pin +takes_value default_value("17") "GPIO pin of the 1-Wire data line")
		(@arg tcp: -t --tcp +takes_value conflicts_with[PORT] "Listen on this TCP port instead of a serial port")
		(@arg baud: -b --baud +takes_value default_value("115200") "Serial baud rate")
		(@arg realtime: -r --realtime "Request real-time scheduling for bus timing")
		(@arg PORT: required_unless[tcp] "Serial port to serve on")
	).get_matches();

	let pin: u32 = get_param(&matches, "pin")?;
	let stop = signal::install_termination_handler()?;

	if matches.is_present("realtime") {
		realtime::enable_realtime();
	}

	let bus = onewire::open_gpio_bus(pin)?;
	info!("1-Wire bus on GPIO{}", pin);
	let mut session = Session::new(bus);

	if matches.is_present("tcp") {
		let port: u16 = get_param(&matches, "tcp")?;
		bridge::run_tcp(&mut session, port, stop)
	} else {
		let path = match matches.value_of("PORT") {
			Some(path) => path,
			None => bail!("need a serial port or --tcp"),
		};
		let baud: u32 = get_param(&matches, "baud")?;
		bridge::run_serial(&mut session, path, baud, stop)
	}
}

fn main() {
	env_logger::from_env(env_logger::Env::default().default_filter_or("info")).init();

	if let Err(e) = main_app() {
		error!("Error: {}", e);
		exit(1);
	}
}
