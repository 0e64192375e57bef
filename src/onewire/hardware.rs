use std::thread;
use std::time::{
	Duration,
	Instant,
};

// below this a sleeping thread usually oversleeps a whole time slot
const SPIN_THRESHOLD: Duration = Duration::from_micros(500);

pub fn reliable_sleep(mut duration: Duration) {
	loop {
		let now = Instant::now();
		thread::sleep(duration);
		let elapsed = now.elapsed();
		if elapsed >= duration {
			return;
		}
		duration -= elapsed;
	}
}

pub fn spin_wait(duration: Duration) {
	let start = Instant::now();
	while start.elapsed() < duration {
		std::hint::spin_loop();
	}
}

/// Spin for the microsecond waits of a bit slot, sleep for the rest.
pub fn precise_delay(duration: Duration) {
	if duration < SPIN_THRESHOLD {
		spin_wait(duration);
	} else {
		reliable_sleep(duration);
	}
}

/// A single open-drain data line with an external pull-up.
///
/// The line is only ever driven low; "high" means releasing it and
/// letting the pull-up (or a device holding it low) decide the level.
pub trait Hardware {
	fn drive_low(&mut self);
	fn release(&mut self);
	fn read_pin(&mut self) -> bool;

	// wait for (at least) `duration`; slot timing depends on this never
	// returning early. Oversleeping a few µs is fine, tens of µs are not.
	fn delay(&mut self, duration: Duration) {
		precise_delay(duration);
	}
}

impl<'a, H: Hardware + ?Sized> Hardware for &'a mut H {
	fn drive_low(&mut self) {
		H::drive_low(*self)
	}
	fn release(&mut self) {
		H::release(*self)
	}
	fn read_pin(&mut self) -> bool {
		H::read_pin(*self)
	}
	fn delay(&mut self, duration: Duration) {
		H::delay(*self, duration)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn delays_never_return_early() {
		for &us in &[3u64, 55, 480, 2_000] {
			let duration = Duration::from_micros(us);
			let start = Instant::now();
			precise_delay(duration);
			assert!(start.elapsed() >= duration);
		}
	}
}
