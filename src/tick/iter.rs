use crate::event::{Event, MarketData};
use crate::PulseResult;

use super::codec;
use super::reader::DbReader;

/// A decoding cursor over one reader's row stream.
///
/// The iterator owns nothing but its position and the running snapshot
/// it needs to resolve delta rows, so any number of them can run over
/// the same [DbReader] without interfering.
pub struct EventIter<'a> {
	reader: &'a DbReader,
	cursor: usize,
	last_md: Option<MarketData>,
	range: Option<(u64, u64)>,
	filter: Option<Box<dyn Fn(&Event) -> bool + 'a>>,
	done: bool,
}

impl<'a> EventIter<'a> {
	pub(crate) fn new(reader: &'a DbReader) -> Self {
		Self {
			reader,
			cursor: reader.rows_offset(),
			last_md: None,
			range: None,
			filter: None,
			done: false,
		}
	}

	/// Restricts the cursor to events with `start <= timestamp <= end`.
	///
	/// Seeks the cursor to the latest chunk whose first timestamp is at
	/// or before `start` (events before `start` inside that chunk are
	/// skipped while decoding), or to the first row if every chunk
	/// starts later. The running snapshot is discarded; the chunk
	/// boundary row is self-contained, so decoding needs no context
	/// from before the seek target.
	pub fn set_range(&mut self, start: u64, end: u64) {
		let chunk = self.reader.chunks().iter()
			.take_while(|chunk| chunk.first_timestamp <= start)
			.last();
		self.cursor = match chunk {
			Some(chunk) => chunk.offset as usize,
			None => self.reader.rows_offset(),
		};
		self.last_md = None;
		self.done = false;
		self.range = Some((start, end));
	}

	/// [Self::set_range] on an owned cursor.
	pub fn with_range(mut self, start: u64, end: u64) -> Self {
		self.set_range(start, end);
		self
	}

	/// Drops every event the predicate rejects. The predicate sees the
	/// fully reconstructed event, after any range restriction.
	pub fn with_filter<F: Fn(&Event) -> bool + 'a>(mut self, filter: F) -> Self {
		self.filter = Some(Box::new(filter));
		self
	}

	/// Decodes rows until one passes the filters, and returns it.
	/// `Ok(None)` is end of stream; decode failures end the iteration.
	pub fn read_event(&mut self) -> PulseResult<Option<Event>> {
		let data = self.reader.data();
		let header = self.reader.header();
		loop {
			if self.done || self.cursor >= data.len() {
				self.done = true;
				return Ok(None);
			}
			let (event, consumed) = codec::decode_row(
				&data[self.cursor..],
				header.depth,
				header.scale,
				self.last_md.as_ref(),
			)?;
			self.cursor += consumed;
			if let Event::MarketData(md) = &event {
				self.last_md = Some(md.clone());
			}
			if let Some((start, end)) = self.range {
				if event.timestamp() < start {
					continue;
				}
				if event.timestamp() > end {
					self.done = true;
					return Ok(None);
				}
			}
			if let Some(filter) = &self.filter {
				if !filter(&event) {
					continue;
				}
			}
			return Ok(Some(event));
		}
	}

	/// Drains the cursor into a vector.
	pub fn all_events(mut self) -> PulseResult<Vec<Event>> {
		let mut events = Vec::new();
		while let Some(event) = self.read_event()? {
			events.push(event);
		}
		Ok(events)
	}
}

impl Iterator for EventIter<'_> {
	type Item = PulseResult<Event>;

	fn next(&mut self) -> Option<Self::Item> {
		match self.read_event() {
			Ok(Some(event)) => Some(Ok(event)),
			Ok(None) => None,
			Err(error) => {
				self.done = true;
				Some(Err(error))
			}
		}
	}
}
