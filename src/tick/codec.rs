//! The pure row codec.
//!
//! Three row kinds share the stream, discriminated by the two high bits
//! of the first byte:
//!
//! | kind     | tag    | body |
//! |----------|--------|------|
//! | full md  | `0x80` | timestamp, then `2 * depth` slots of (price, volume) |
//! | trade    | `0xC0` | timestamp, price, volume |
//! | delta md | `0x00` | timestamp delta, change bitmap, deltas for changed slots |
//!
//! Timestamps and volumes are unsigned LEB128; prices and all deltas are
//! zigzag-coded signed LEB128. The delta bitmap holds one bit per
//! (price, volume) slot, bid side first, MSB-first within each byte.
//! Nothing in here touches a file; everything works on byte slices.

use crate::event::{
	Event,
	MarketData,
	Quote,
	Trade,
	scale_price,
	unscale_price,
};
use crate::{PulseError, PulseResult};

pub const TAG_FULL_MD: u8 = 0x80;
pub const TAG_TRADE: u8 = 0xC0;
pub const TAG_DELTA_MD: u8 = 0x00;

/// Longest legal LEB128 encoding of a 64-bit value.
const MAX_VARINT_LEN: usize = 10;

/// What kind of row sits at some offset.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RowKind {
	FullMd,
	DeltaMd,
	Trade,
}

impl RowKind {
	pub fn from_tag(tag: u8) -> PulseResult<RowKind> {
		match tag {
			TAG_FULL_MD => Ok(RowKind::FullMd),
			TAG_TRADE => Ok(RowKind::Trade),
			TAG_DELTA_MD => Ok(RowKind::DeltaMd),
			other => Err(PulseError::BadTag(other)),
		}
	}
}

pub fn write_varu64(out: &mut Vec<u8>, mut value: u64) {
	loop {
		let byte = (value & 0x7F) as u8;
		value >>= 7;
		if value == 0 {
			out.push(byte);
			return;
		}
		out.push(byte | 0x80);
	}
}

/// Reads an unsigned LEB128 value off the front of `buf`.
/// Returns the value and the number of bytes consumed.
pub fn read_varu64(buf: &[u8]) -> PulseResult<(u64, usize)> {
	let mut value: u64 = 0;
	for (i, &byte) in buf.iter().enumerate().take(MAX_VARINT_LEN) {
		let payload = (byte & 0x7F) as u64;
		// The tenth byte may only carry the final bit of a u64.
		if i == MAX_VARINT_LEN - 1 && byte > 0x01 {
			return Err(PulseError::BadVarint);
		}
		value |= payload << (7 * i);
		if byte & 0x80 == 0 {
			return Ok((value, i + 1));
		}
	}
	if buf.len() < MAX_VARINT_LEN {
		Err(PulseError::TruncatedInput)
	} else {
		Err(PulseError::BadVarint)
	}
}

const fn zigzag(value: i64) -> u64 {
	((value << 1) ^ (value >> 63)) as u64
}

const fn unzigzag(value: u64) -> i64 {
	((value >> 1) as i64) ^ -((value & 1) as i64)
}

pub fn write_vari64(out: &mut Vec<u8>, value: i64) {
	write_varu64(out, zigzag(value));
}

pub fn read_vari64(buf: &[u8]) -> PulseResult<(i64, usize)> {
	let (raw, len) = read_varu64(buf)?;
	Ok((unzigzag(raw), len))
}

fn read_volume(buf: &[u8]) -> PulseResult<(u32, usize)> {
	let (raw, len) = read_varu64(buf)?;
	if raw > u32::MAX as u64 {
		return Err(PulseError::BadVolume);
	}
	Ok((raw as u32, len))
}

fn encode_quotes(
	quotes: &[Quote],
	scale: u32,
	side_err: PulseError,
	out: &mut Vec<u8>,
) -> PulseResult<()> {
	for quote in quotes {
		let scaled = match scale_price(quote.price, scale) {
			Some(scaled) => scaled,
			None => return Err(side_err),
		};
		write_vari64(out, scaled);
		write_varu64(out, quote.volume as u64);
	}
	Ok(())
}

/// Encodes a self-contained market-data snapshot.
/// The snapshot must already be depth-normalized.
pub fn encode_full_md(md: &MarketData, scale: u32, out: &mut Vec<u8>) -> PulseResult<()> {
	out.push(TAG_FULL_MD);
	write_varu64(out, md.timestamp);
	encode_quotes(&md.bid, scale, PulseError::BadBid, out)?;
	encode_quotes(&md.ask, scale, PulseError::BadAsk, out)?;
	Ok(())
}

pub fn encode_trade(trade: &Trade, scale: u32, out: &mut Vec<u8>) -> PulseResult<()> {
	let scaled = scale_price(trade.price, scale).ok_or(PulseError::BadPrice)?;
	out.push(TAG_TRADE);
	write_varu64(out, trade.timestamp);
	write_vari64(out, scaled);
	write_varu64(out, trade.volume as u64);
	Ok(())
}

/// Encodes `next` as differences against `prev`. Both snapshots must be
/// normalized to the same depth.
pub fn encode_delta_md(
	prev: &MarketData,
	next: &MarketData,
	scale: u32,
	out: &mut Vec<u8>,
) -> PulseResult<()> {
	if prev.bid.len() != next.bid.len() || prev.ask.len() != next.ask.len() {
		return Err(PulseError::DepthMismatch {
			expected: prev.bid.len() + prev.ask.len(),
			actual: next.bid.len() + next.ask.len(),
		});
	}
	let slots = prev.bid.len() + prev.ask.len();
	let mut bitmap = vec![0u8; slots.div_ceil(8)];
	let mut deltas: Vec<u8> = Vec::new();
	let pairs = prev.bid.iter().chain(prev.ask.iter())
		.zip(next.bid.iter().chain(next.ask.iter()));
	for (i, (old, new)) in pairs.enumerate() {
		let old_price = scale_price(old.price, scale).ok_or(PulseError::InvalidEvent)?;
		let side_err = if i < prev.bid.len() { PulseError::BadBid } else { PulseError::BadAsk };
		let new_price = match scale_price(new.price, scale) {
			Some(scaled) => scaled,
			None => return Err(side_err),
		};
		if old_price == new_price && old.volume == new.volume {
			continue;
		}
		bitmap[i / 8] |= 0x80 >> (i % 8);
		write_vari64(&mut deltas, new_price - old_price);
		write_vari64(&mut deltas, new.volume as i64 - old.volume as i64);
	}
	out.push(TAG_DELTA_MD);
	write_vari64(out, next.timestamp as i64 - prev.timestamp as i64);
	out.extend_from_slice(&bitmap);
	out.extend_from_slice(&deltas);
	Ok(())
}

fn decode_quotes(buf: &[u8], depth: usize, scale: u32) -> PulseResult<(Vec<Quote>, usize)> {
	let mut quotes = Vec::with_capacity(depth);
	let mut pos = 0;
	for _ in 0..depth {
		let (scaled, len) = read_vari64(&buf[pos..])?;
		pos += len;
		let (volume, len) = read_volume(&buf[pos..])?;
		pos += len;
		quotes.push(Quote::new(unscale_price(scaled, scale), volume));
	}
	Ok((quotes, pos))
}

/// Decodes one row off the front of `buf`, producing the event and the
/// number of bytes consumed. Delta rows are resolved against `prev`; a
/// delta with no previous snapshot is an [PulseError::OrphanDelta].
pub fn decode_row(
	buf: &[u8],
	depth: usize,
	scale: u32,
	prev: Option<&MarketData>,
) -> PulseResult<(Event, usize)> {
	let tag = *buf.first().ok_or(PulseError::TruncatedInput)?;
	let mut pos = 1;
	match RowKind::from_tag(tag)? {
		RowKind::FullMd => {
			let (timestamp, len) = read_varu64(&buf[pos..])?;
			pos += len;
			let (bid, len) = decode_quotes(&buf[pos..], depth, scale)?;
			pos += len;
			let (ask, len) = decode_quotes(&buf[pos..], depth, scale)?;
			pos += len;
			Ok((Event::MarketData(MarketData::new(timestamp, bid, ask)), pos))
		}
		RowKind::Trade => {
			let (timestamp, len) = read_varu64(&buf[pos..])?;
			pos += len;
			let (scaled, len) = read_vari64(&buf[pos..])?;
			pos += len;
			let (volume, len) = read_volume(&buf[pos..])?;
			pos += len;
			let trade = Trade {
				timestamp,
				price: unscale_price(scaled, scale),
				volume,
			};
			Ok((Event::Trade(trade), pos))
		}
		RowKind::DeltaMd => {
			let prev = prev.ok_or(PulseError::OrphanDelta)?;
			decode_delta_md(buf, &mut pos, depth, scale, prev)
		}
	}
}

fn decode_delta_md(
	buf: &[u8],
	pos: &mut usize,
	depth: usize,
	scale: u32,
	prev: &MarketData,
) -> PulseResult<(Event, usize)> {
	if prev.bid.len() + prev.ask.len() != 2 * depth {
		return Err(PulseError::DepthMismatch {
			expected: 2 * depth,
			actual: prev.bid.len() + prev.ask.len(),
		});
	}
	let (ts_delta, len) = read_vari64(&buf[*pos..])?;
	*pos += len;
	let timestamp = prev.timestamp as i64 + ts_delta;
	if timestamp <= 0 {
		return Err(PulseError::BadTimestamp);
	}
	let slots = 2 * depth;
	let bitmap_len = slots.div_ceil(8);
	if buf.len() < *pos + bitmap_len {
		return Err(PulseError::TruncatedInput);
	}
	let bitmap = &buf[*pos..*pos + bitmap_len];
	*pos += bitmap_len;
	let mut quotes = Vec::with_capacity(slots);
	for (i, old) in prev.bid.iter().chain(prev.ask.iter()).enumerate() {
		if bitmap[i / 8] & (0x80 >> (i % 8)) == 0 {
			quotes.push(*old);
			continue;
		}
		let (price_delta, len) = read_vari64(&buf[*pos..])?;
		*pos += len;
		let (volume_delta, len) = read_vari64(&buf[*pos..])?;
		*pos += len;
		let old_price = scale_price(old.price, scale).ok_or(PulseError::InvalidEvent)?;
		let volume = old.volume as i64 + volume_delta;
		if volume < 0 || volume > u32::MAX as i64 {
			return Err(PulseError::BadVolume);
		}
		quotes.push(Quote::new(
			unscale_price(old_price + price_delta, scale),
			volume as u32,
		));
	}
	let ask = quotes.split_off(depth);
	let md = MarketData::new(timestamp as u64, quotes, ask);
	Ok((Event::MarketData(md), *pos))
}

/// Decodes the tag and the leading timestamp field of the row at the
/// front of `buf` without touching the body. For full rows the value is
/// the absolute millisecond timestamp; for delta rows it is the signed
/// timestamp delta.
pub fn peek_timestamp(buf: &[u8]) -> PulseResult<(RowKind, i64)> {
	let tag = *buf.first().ok_or(PulseError::TruncatedInput)?;
	let kind = RowKind::from_tag(tag)?;
	match kind {
		RowKind::FullMd | RowKind::Trade => {
			let (timestamp, _) = read_varu64(&buf[1..])?;
			Ok((kind, timestamp as i64))
		}
		RowKind::DeltaMd => {
			let (delta, _) = read_vari64(&buf[1..])?;
			Ok((kind, delta))
		}
	}
}
