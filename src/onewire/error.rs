use super::DeviceAddress;

/// Failure kinds of bus, memory and bridge operations.
///
/// Wrapped in `failure::Error` like everything else; use `kind_of` to
/// get the kind back out of an error chain.
#[derive(Debug, Clone, PartialEq, Fail)]
pub enum BusError {
	#[fail(display = "no presence pulse on the bus")]
	NoPresence,
	#[fail(display = "device address CRC mismatch: computed 0x{:02x}, address carries 0x{:02x}", expected, actual)]
	CrcMismatch {
		expected: u8,
		actual: u8,
	},
	#[fail(display = "size {} out of range (1..={})", _0, _1)]
	SizeOutOfRange(usize, usize),
	#[fail(display = "scratchpad verification failed for block at 0x{:03x}", address)]
	ScratchpadVerificationMismatch {
		address: u16,
	},
	#[fail(display = "copy scratchpad did not complete for block at 0x{:03x}", address)]
	CopyCommitTimeout {
		address: u16,
	},
	#[fail(display = "read back data differs from written data")]
	PostWriteVerificationMismatch,
	#[fail(display = "short read: expected {} bytes, got {}", expected, actual)]
	ShortRead {
		expected: usize,
		actual: usize,
	},
	#[fail(display = "partially written: {} of {} bytes committed before failure ({})", committed, total, reason)]
	PartialWrite {
		committed: usize,
		total: usize,
		reason: String,
	},
	#[fail(display = "device {} is no longer present", _0)]
	DeviceChanged(DeviceAddress),
	#[fail(display = "codec error: {}", _0)]
	Codec(String),
	#[fail(display = "protocol error: {}", _0)]
	Protocol(String),
	#[fail(display = "transport error: {}", _0)]
	Transport(String),
}

/// Find the first `BusError` in the cause chain of `e`.
pub fn kind_of(e: &failure::Error) -> Option<&BusError> {
	e.iter_chain().filter_map(|c| c.downcast_ref::<BusError>()).next()
}
