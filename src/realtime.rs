//! Scheduling for bit-banged timing: real-time priority and locked
//! memory keep the kernel and page faults out of the time slots.

use std::io;

use libc::{
	MCL_CURRENT,
	MCL_FUTURE,
	SCHED_FIFO,
	mlockall,
	sched_get_priority_max,
	sched_param,
	sched_setscheduler,
};

fn set_fifo_priority() -> crate::AResult<i32> {
	let priority = unsafe { sched_get_priority_max(SCHED_FIFO) };
	if priority < 0 {
		bail!("no SCHED_FIFO priority range: {}", io::Error::last_os_error());
	}
	let param = sched_param {
		sched_priority: priority,
	};
	if 0 != unsafe { sched_setscheduler(0, SCHED_FIFO, &param) } {
		bail!("sched_setscheduler: {}", io::Error::last_os_error());
	}
	Ok(priority)
}

fn lock_memory() -> crate::AResult<()> {
	if 0 != unsafe { mlockall(MCL_CURRENT | MCL_FUTURE) } {
		bail!("mlockall: {}", io::Error::last_os_error());
	}
	Ok(())
}

/// Best effort: switch this process to SCHED_FIFO at maximum priority and
/// lock its memory. Failures (usually missing privileges) only warn.
/// Returns whether both steps worked.
pub fn enable_realtime() -> bool {
	let scheduled = match set_fifo_priority() {
		Ok(priority) => {
			info!("Running with SCHED_FIFO priority {}", priority);
			true
		},
		Err(e) => {
			warn!("Couldn't get real-time priority, bus timing may suffer: {}", e);
			false
		},
	};
	let locked = match lock_memory() {
		Ok(()) => true,
		Err(e) => {
			warn!("Couldn't lock memory: {}", e);
			false
		},
	};
	scheduled && locked
}
