use std::io::{Read, Write};

use crate::ioext::{ReadExt, WriteExt};
use crate::PulseResult;

use super::CANDLE_SIZE;

/// Running O/H/L/C of the day's trades, in scaled prices.
///
/// On disk the candle occupies a fixed 16-byte slot between the header
/// and the chunk map: `<valid:1 | open:31, high:32, low:32, close:32>`,
/// big-endian. The slot is zeroed on create; the valid bit flips on the
/// first persisted trade. The open price is capped at 31 bits by the
/// layout, which event validation guarantees.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Candle {
	pub open: u32,
	pub high: u32,
	pub low: u32,
	pub close: u32,
}

impl Candle {
	/// The candle after the first trade of the day.
	pub fn opening(price: u32) -> Self {
		Self { open: price, high: price, low: price, close: price }
	}

	/// Folds one more trade into the candle. The open never moves.
	pub fn update(&mut self, price: u32) {
		self.high = self.high.max(price);
		self.low = self.low.min(price);
		self.close = price;
	}

	/// Applies a trade to an optional candle, opening it if necessary.
	pub fn accumulate(candle: &mut Option<Candle>, price: u32) {
		match candle {
			Some(candle) => candle.update(price),
			None => *candle = Some(Candle::opening(price)),
		}
	}

	/// Reads a candle slot. A cleared valid bit means no trade has been
	/// persisted yet and yields `None`.
	pub fn read_slot<R: Read>(reader: &mut R) -> PulseResult<Option<Candle>> {
		let word: u32 = reader.read_value()?;
		let high: u32 = reader.read_value()?;
		let low: u32 = reader.read_value()?;
		let close: u32 = reader.read_value()?;
		if word & 0x8000_0000 == 0 {
			return Ok(None);
		}
		Ok(Some(Candle {
			open: word & 0x7FFF_FFFF,
			high,
			low,
			close,
		}))
	}

	/// Writes a candle slot; `None` writes the zeroed (invalid) slot.
	pub fn write_slot<W: Write>(candle: Option<&Candle>, writer: &mut W) -> PulseResult<usize> {
		match candle {
			Some(candle) => {
				writer.write_value(0x8000_0000u32 | (candle.open & 0x7FFF_FFFF))?;
				writer.write_value(candle.high)?;
				writer.write_value(candle.low)?;
				writer.write_value(candle.close)?;
			}
			None => {
				writer.write_all(&[0u8; CANDLE_SIZE as usize])?;
			}
		}
		Ok(CANDLE_SIZE as usize)
	}
}
