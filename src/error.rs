

use std::path::PathBuf;

use thiserror::Error;

/// The master error type.
#[derive(Debug, Error)]
pub enum PulseError {
	#[error("{0}")]
	Custom(String),
	#[error("IO Error: {0}")]
	IoError(#[from] std::io::Error),
	#[error("Not a database file: {0}")]
	Nofile(PathBuf),
	#[error("File version does not match engine version, migrate first: {0}")]
	NeedMigration(PathBuf),
	#[error("Unknown row tag byte: {0:#04x}")]
	BadTag(u8),
	#[error("Input ended in the middle of a record.")]
	TruncatedInput,
	#[error("Malformed variable-length integer.")]
	BadVarint,
	#[error("Expected {expected} quote levels, got {actual}.")]
	DepthMismatch { expected: usize, actual: usize },
	#[error("Trade price is not storable.")]
	BadPrice,
	#[error("Volume does not fit in 32 bits.")]
	BadVolume,
	#[error("Bid quotes are not storable.")]
	BadBid,
	#[error("Ask quotes are not storable.")]
	BadAsk,
	#[error("Timestamp must be a positive millisecond count.")]
	BadTimestamp,
	#[error("Event is not valid for this database.")]
	InvalidEvent,
	#[error("Timestamp does not belong to the day this file covers.")]
	NotThisDay,
	#[error("Database is open for reading, reopen in append mode.")]
	ReopenInAppendMode,
	#[error("Delta row with no preceding full snapshot.")]
	OrphanDelta,
	#[error("Configuration key not found: {0}")]
	NoKey(String),
	#[error("Malformed header: {0}")]
	BadHeader(String),
	#[error("Corrupt database file: {0}")]
	Corrupt(String),
}

impl PulseError {
	#[inline(always)]
	pub fn custom<T, S: AsRef<str>>(msg: S) -> Result<T, Self> {
		Err(PulseError::Custom(msg.as_ref().to_owned()))
	}

	#[inline(always)]
	pub fn corrupt<T, S: AsRef<str>>(msg: S) -> Result<T, Self> {
		Err(PulseError::Corrupt(msg.as_ref().to_owned()))
	}
}

pub type PulseResult<T> = Result<T, PulseError>;
