
use crate::{PulseError, PulseResult};

/// One price level of a market-depth snapshot.
#[derive(Debug, PartialEq, Clone, Copy, Default)]
pub struct Quote {
	pub price: f64,
	pub volume: u32,
}

impl Quote {
	pub fn new(price: f64, volume: u32) -> Self {
		Self { price, volume }
	}
}

/// A full market-depth snapshot at one instant.
/// `bid` and `ask` are ordered best-first and are padded or truncated
/// to the file's depth before they ever reach the codec.
#[derive(Debug, PartialEq, Clone)]
pub struct MarketData {
	/// Milliseconds since the Unix epoch.
	pub timestamp: u64,
	pub bid: Vec<Quote>,
	pub ask: Vec<Quote>,
}

/// A single trade.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct Trade {
	/// Milliseconds since the Unix epoch.
	pub timestamp: u64,
	pub price: f64,
	pub volume: u32,
}

/// Everything a database file can store.
#[derive(Debug, PartialEq, Clone)]
pub enum Event {
	MarketData(MarketData),
	Trade(Trade),
}

/// Converts a price to its on-disk scaled integer representation.
/// Scaled prices must fit in 32 bits.
pub fn scale_price(price: f64, scale: u32) -> Option<i64> {
	if !price.is_finite() {
		return None;
	}
	let scaled = (price * scale as f64).round();
	if scaled < i32::MIN as f64 || scaled > i32::MAX as f64 {
		return None;
	}
	Some(scaled as i64)
}

/// The inverse of [scale_price].
pub fn unscale_price(scaled: i64, scale: u32) -> f64 {
	scaled as f64 / scale as f64
}

impl MarketData {
	pub fn new(timestamp: u64, bid: Vec<Quote>, ask: Vec<Quote>) -> Self {
		Self { timestamp, bid, ask }
	}

	/// Pads each side with `(0.0, 0)` quotes or truncates it so that both
	/// sides hold exactly `depth` levels.
	pub fn set_depth(&mut self, depth: usize) {
		self.bid.resize(depth, Quote::default());
		self.ask.resize(depth, Quote::default());
	}

	/// [set_depth] on an owned value.
	pub fn with_depth(mut self, depth: usize) -> Self {
		self.set_depth(depth);
		self
	}
}

impl Event {
	pub fn timestamp(&self) -> u64 {
		match self {
			Event::MarketData(md) => md.timestamp,
			Event::Trade(trade) => trade.timestamp,
		}
	}

	pub fn is_market_data(&self) -> bool {
		matches!(self, Event::MarketData(_))
	}

	/// Checks that an event can be stored with the given scale before any
	/// byte of it is written. A failed check leaves no trace in the file.
	pub fn validate(&self, scale: u32) -> PulseResult<()> {
		if self.timestamp() == 0 {
			return Err(PulseError::BadTimestamp);
		}
		match self {
			Event::MarketData(md) => {
				for quote in md.bid.iter() {
					scale_price(quote.price, scale).ok_or(PulseError::BadBid)?;
				}
				for quote in md.ask.iter() {
					scale_price(quote.price, scale).ok_or(PulseError::BadAsk)?;
				}
			}
			Event::Trade(trade) => {
				// Trade prices feed the candle, which stores the open in
				// 31 bits, so they must be non-negative as well.
				let scaled = scale_price(trade.price, scale).ok_or(PulseError::BadPrice)?;
				if scaled < 0 {
					return Err(PulseError::BadPrice);
				}
			}
		}
		Ok(())
	}
}

impl From<MarketData> for Event {
	fn from(value: MarketData) -> Self {
		Event::MarketData(value)
	}
}

impl From<Trade> for Event {
	fn from(value: Trade) -> Self {
		Event::Trade(value)
	}
}
