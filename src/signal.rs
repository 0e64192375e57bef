//! SIGINT/SIGTERM turned into a stop flag, so loops can wind down and
//! release the bus on their own.

use std::io;
use std::mem;
use std::ptr;
use std::sync::atomic::{
	AtomicBool,
	Ordering,
};

use libc::{
	SIGINT,
	SIGTERM,
	c_int,
	sigaction,
	sigemptyset,
};

static STOP: AtomicBool = AtomicBool::new(false);

extern "C" fn request_stop(_signal: c_int) {
	STOP.store(true, Ordering::SeqCst);
}

/// Install the handler for SIGINT and SIGTERM and return the flag it
/// sets. Without SA_RESTART, blocking reads return early with EINTR.
pub fn install_termination_handler() -> crate::AResult<&'static AtomicBool> {
	for &signal in &[SIGINT, SIGTERM] {
		let res = unsafe {
			let mut action: sigaction = mem::zeroed();
			action.sa_sigaction = request_stop as extern "C" fn(c_int) as usize;
			sigemptyset(&mut action.sa_mask);
			action.sa_flags = 0;
			sigaction(signal, &action, ptr::null_mut())
		};
		if 0 != res {
			bail!("couldn't install handler for signal {}: {}", signal, io::Error::last_os_error());
		}
	}
	Ok(&STOP)
}
