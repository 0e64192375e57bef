use std::fs;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use super::Hardware;

const SYSFS_GPIO: &str = "/sys/class/gpio";

// udev needs a moment to fix permissions of a freshly exported pin
const EXPORT_SETTLE: Duration = Duration::from_millis(100);

fn write_file(path: PathBuf, data: &str) -> io::Result<()> {
	fs::OpenOptions::new().write(true).open(path)?.write_all_at(data.as_bytes(), 0)
}

/// Open-drain pin through the Linux sysfs GPIO interface.
///
/// "Driving high" is emulated by switching the pin to input; driving low
/// writes "low" to `direction`, which switches to output with level 0
/// in one step. The pin is released (and unexported, if we exported it)
/// on drop.
pub struct SysfsPin {
	number: u32,
	direction: fs::File,
	value: fs::File,
	exported_by_us: bool,
}

impl SysfsPin {
	pub fn open(number: u32) -> crate::AResult<Self> {
		let base = PathBuf::from(format!("{}/gpio{}", SYSFS_GPIO, number));
		let exported_by_us = if base.exists() {
			false
		} else {
			with_context!(("couldn't export GPIO{}", number), {
				write_file(PathBuf::from(SYSFS_GPIO).join("export"), &number.to_string())?;
				Ok(())
			})?;
			thread::sleep(EXPORT_SETTLE);
			true
		};

		let open = |name: &str| -> crate::AResult<fs::File> {
			with_context!(("couldn't open {} of GPIO{}", name, number), {
				Ok(fs::OpenOptions::new().read(true).write(true).open(base.join(name))?)
			})
		};

		let pin = SysfsPin {
			number,
			direction: open("direction")?,
			value: open("value")?,
			exported_by_us,
		};
		pin.set_direction("in")?;
		info!("GPIO{}: opened{}", number, if exported_by_us { " (exported)" } else { "" });
		Ok(pin)
	}

	pub fn number(&self) -> u32 {
		self.number
	}

	fn set_direction(&self, direction: &str) -> io::Result<()> {
		self.direction.write_all_at(direction.as_bytes(), 0)
	}
}

impl Hardware for SysfsPin {
	fn drive_low(&mut self) {
		if let Err(e) = self.set_direction("low") {
			error!("GPIO{}: couldn't drive low: {}", self.number, e);
		}
	}

	fn release(&mut self) {
		if let Err(e) = self.set_direction("in") {
			error!("GPIO{}: couldn't release: {}", self.number, e);
		}
	}

	fn read_pin(&mut self) -> bool {
		let mut buf = [0u8; 1];
		match self.value.read_at(&mut buf, 0) {
			Ok(1) => buf[0] == b'1',
			Ok(_) | Err(_) => {
				// a line we can't read looks like an idle line
				warn!("GPIO{}: failed to read value", self.number);
				true
			},
		}
	}
}

impl Drop for SysfsPin {
	fn drop(&mut self) {
		if let Err(e) = self.set_direction("in") {
			error!("GPIO{}: couldn't release on close: {}", self.number, e);
		}
		if self.exported_by_us {
			let unexport = PathBuf::from(SYSFS_GPIO).join("unexport");
			if let Err(e) = write_file(unexport, &self.number.to_string()) {
				error!("GPIO{}: couldn't unexport: {}", self.number, e);
			}
		}
		debug!("GPIO{}: released", self.number);
	}
}
