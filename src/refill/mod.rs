//! Automatic refill: watch the bus for a cartridge, decode its image and
//! rewrite it with the initial quantity when it has run low.
//!
//! One attempt per insertion. A failed refill is reported and then left
//! alone until the cartridge is reinserted or `request_refill` is called.

mod codec;

pub use self::codec::{
	Codec,
	Record,
};

use chrono::Utc;
use std::fmt;
use std::sync::atomic::{
	AtomicBool,
	Ordering,
};
use std::thread;
use std::time::Duration;

use crate::access::EepromAccess;
use crate::onewire::{
	BusError,
	DeviceAddress,
	MEMORY_SIZE,
	kind_of,
};

#[derive(Clone, Debug, PartialEq)]
pub struct RefillConfig {
	/// Machine type handed to the codec.
	pub machine: String,
	/// Cartridges with at least this much material left are not touched.
	pub threshold: f64,
	/// Try every machine type the codec knows instead of just `machine`.
	pub auto_detect: bool,
	/// Wait after insertion before the first transfer.
	pub settle: Duration,
	pub poll_interval: Duration,
	pub image_size: usize,
}

impl Default for RefillConfig {
	fn default() -> Self {
		RefillConfig {
			machine: "prodigy".to_string(),
			threshold: 10.0,
			auto_detect: false,
			settle: Duration::from_secs(1),
			poll_interval: Duration::from_millis(500),
			image_size: MEMORY_SIZE,
		}
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefillOutcome {
	NoRefillNeeded,
	RefillSucceeded,
	RefillFailed(String),
}

impl RefillOutcome {
	/// Status line as sent to status displays.
	pub fn status(&self) -> String {
		match self {
			RefillOutcome::NoRefillNeeded => "REFILL_DONE:NO_REFILL_NEEDED".to_string(),
			RefillOutcome::RefillSucceeded => "REFILL_DONE:SUCCESS".to_string(),
			RefillOutcome::RefillFailed(reason) => format!("ERROR:{}", reason),
		}
	}
}

impl fmt::Display for RefillOutcome {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str(&self.status())
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
	WaitingForInsertion,
	Settling,
	Reading,
	Decoding,
	ThresholdCheck,
	Refilling,
	Writing,
	Verifying,
	Reporting,
	WaitingForRemoval,
}

/// Receives the result of every insertion cycle.
pub trait Reporter {
	fn report(&mut self, device: &DeviceAddress, outcome: &RefillOutcome);
}

impl<'a, R: Reporter + ?Sized> Reporter for &'a mut R {
	fn report(&mut self, device: &DeviceAddress, outcome: &RefillOutcome) {
		R::report(*self, device, outcome)
	}
}

pub struct LogReporter;

impl Reporter for LogReporter {
	fn report(&mut self, device: &DeviceAddress, outcome: &RefillOutcome) {
		match outcome {
			RefillOutcome::RefillFailed(_) => error!("{}: {}", device, outcome),
			_ => info!("{}: {}", device, outcome),
		}
	}
}

pub struct RefillController<A, C, R>
where
	A: EepromAccess,
	C: Codec,
	R: Reporter,
{
	access: A,
	codec: C,
	reporter: R,
	config: RefillConfig,
	phase: Phase,
	// presence seen by the previous poll
	present: Option<DeviceAddress>,
	refill_requested: bool,
	sleep: fn(Duration),
}

impl<A, C, R> RefillController<A, C, R>
where
	A: EepromAccess,
	C: Codec,
	R: Reporter,
{
	pub fn new(access: A, codec: C, reporter: R, config: RefillConfig) -> Self {
		RefillController {
			access,
			codec,
			reporter,
			config,
			phase: Phase::WaitingForInsertion,
			present: None,
			refill_requested: false,
			sleep: thread::sleep,
		}
	}

	/// Replace the function used for the settle and poll waits.
	pub fn with_sleep(mut self, sleep: fn(Duration)) -> Self {
		self.sleep = sleep;
		self
	}

	pub fn phase(&self) -> Phase {
		self.phase
	}

	pub fn config(&self) -> &RefillConfig {
		&self.config
	}

	pub fn access_mut(&mut self) -> &mut A {
		&mut self.access
	}

	pub fn reporter(&self) -> &R {
		&self.reporter
	}

	pub fn into_parts(self) -> (A, C, R) {
		(self.access, self.codec, self.reporter)
	}

	/// Run one more refill cycle on the cartridge currently present. The
	/// request is consumed by the next tick, with or without a cartridge.
	pub fn request_refill(&mut self) {
		self.refill_requested = true;
	}

	fn enter(&mut self, phase: Phase) {
		trace!("{:?} -> {:?}", self.phase, phase);
		self.phase = phase;
	}

	fn poll_presence(&mut self) -> Option<DeviceAddress> {
		match self.access.search() {
			Ok(device) => Some(device),
			Err(e) => {
				match kind_of(&e) {
					Some(BusError::NoPresence) => (),
					_ => warn!("presence poll failed: {}", e),
				}
				None
			},
		}
	}

	/// Poll presence once and run a full cycle on an insertion edge (or a
	/// pending manual request). Returns the outcome if a cycle ran.
	pub fn tick(&mut self) -> Option<RefillOutcome> {
		let previous = self.present;
		let current = self.poll_presence();
		self.present = current;
		let requested = self.refill_requested;
		self.refill_requested = false;

		match (previous, current) {
			(previous, None) => {
				if let Some(device) = previous {
					info!("Cartridge {} removed", device);
				}
				if requested {
					warn!("refill requested but no cartridge present");
				}
				self.enter(Phase::WaitingForInsertion);
				None
			},
			(Some(previous), Some(device)) if previous == device => {
				if requested {
					info!("Manual refill of cartridge {}", device);
					Some(self.process(device))
				} else {
					None
				}
			},
			(_, Some(device)) => {
				info!("Cartridge {} inserted", device);
				Some(self.process(device))
			},
		}
	}

	/// Tick until `stop` is set. Refill failures never end the loop.
	pub fn run(&mut self, stop: &AtomicBool) {
		info!(
			"Monitoring for cartridges: machine {}, auto-detect {}, threshold {:.2}",
			self.config.machine,
			if self.config.auto_detect { "on" } else { "off" },
			self.config.threshold,
		);
		while !stop.load(Ordering::SeqCst) {
			self.tick();
			(self.sleep)(self.config.poll_interval);
		}
		info!("Shutting down");
	}

	fn process(&mut self, device: DeviceAddress) -> RefillOutcome {
		let outcome = match self.refill(device) {
			Ok(outcome) => outcome,
			Err(e) => RefillOutcome::RefillFailed(e.to_string()),
		};
		self.enter(Phase::Reporting);
		self.reporter.report(&device, &outcome);
		self.enter(Phase::WaitingForRemoval);
		outcome
	}

	fn refill(&mut self, device: DeviceAddress) -> crate::AResult<RefillOutcome> {
		self.enter(Phase::Settling);
		(self.sleep)(self.config.settle);

		match self.access.search() {
			Ok(found) if found == device => (),
			Ok(found) => {
				// the new one gets its own insertion edge on the next tick
				self.present = None;
				info!("Cartridge {} replaced by {} while settling", device, found);
				return Err(BusError::DeviceChanged(device).into());
			},
			Err(e) => {
				self.present = None;
				return Err(e);
			},
		}

		self.enter(Phase::Reading);
		let image = self.access.read_memory(self.config.image_size)?;

		self.enter(Phase::Decoding);
		let (machine, mut record) = self.decode(&device, &image)?;

		self.enter(Phase::ThresholdCheck);
		let current = record.current_quantity();
		let initial = record.initial_quantity();
		let remaining = if initial > 0.0 { current / initial * 100.0 } else { 0.0 };
		info!(
			"Cartridge {} ({}): {:.2} of {:.2} left ({:.1}%)",
			device, machine, current, initial, remaining,
		);
		if current >= self.config.threshold {
			info!("At or above threshold {:.2}, no refill needed", self.config.threshold);
			return Ok(RefillOutcome::NoRefillNeeded);
		}

		self.enter(Phase::Refilling);
		info!("Below threshold {:.2}, refilling to {:.2}", self.config.threshold, initial);
		record.set_current_quantity(initial);
		record.set_last_use(Utc::now());
		let encoded = self.codec.encode(&machine, &device, &record).map_err(|e| {
			BusError::Codec(format!("couldn't encode {} cartridge: {}", machine, e))
		})?;

		self.enter(Phase::Writing);
		self.access.write_memory(&encoded)?;

		self.enter(Phase::Verifying);
		let written = self.access.read_memory(encoded.len())?;
		if written != encoded {
			return Err(BusError::PostWriteVerificationMismatch.into());
		}
		Ok(RefillOutcome::RefillSucceeded)
	}

	fn decode(&self, device: &DeviceAddress, image: &[u8]) -> crate::AResult<(String, C::Record)> {
		let machines = if self.config.auto_detect {
			self.codec.machine_types()
		} else {
			vec![self.config.machine.clone()]
		};

		for machine in machines {
			match self.codec.decode(&machine, device, image) {
				Ok(record) => {
					debug!("Decoded as {} cartridge", machine);
					return Ok((machine, record));
				},
				Err(e) if !self.config.auto_detect => {
					return Err(BusError::Codec(format!("couldn't decode {} cartridge: {}", machine, e)).into());
				},
				Err(e) => debug!("not a {} cartridge: {}", machine, e),
			}
		}
		Err(BusError::Codec("failed to decode with any machine type".to_string()).into())
	}
}
