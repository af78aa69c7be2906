//! The narrow surface most callers go through: open a file for reading
//! or appending, push events in, pull events or summaries out. The
//! heavy lifting lives in [crate::tick].

use std::path::Path;

use chrono::NaiveDate;

use crate::event::Event;
use crate::fs::PathResolver;
use crate::tick::appender::{AppendOptions, DbAppender};
use crate::tick::iter::EventIter;
use crate::tick::reader::{DbReader, Info};
use crate::{PulseError, PulseResult};

/// An open database file, tagged by mode. Append operations on a
/// read-mode handle (and the reverse) fail instead of panicking, so a
/// handle can be threaded through code that does not statically know
/// the mode.
pub enum PulseDb {
	Read(DbReader),
	Append(DbAppender),
}

impl PulseDb {
	pub fn open_read<P: AsRef<Path>>(path: P) -> PulseResult<Self> {
		Ok(PulseDb::Read(DbReader::open(path)?))
	}

	/// Opens for reading even when the file version does not match the
	/// engine's; the validator is skipped.
	pub fn open_read_migrating<P: AsRef<Path>>(path: P) -> PulseResult<Self> {
		Ok(PulseDb::Read(DbReader::open_migrating(path)?))
	}

	pub fn open_append<P: AsRef<Path>>(
		path: P,
		stock: &str,
		date: NaiveDate,
		options: &AppendOptions,
	) -> PulseResult<Self> {
		Ok(PulseDb::Append(DbAppender::open(path, stock, date, options)?))
	}

	pub fn append(&mut self, event: Event) -> PulseResult<()> {
		match self {
			PulseDb::Append(appender) => appender.append(event),
			PulseDb::Read(_) => Err(PulseError::ReopenInAppendMode),
		}
	}

	pub fn reader(&self) -> PulseResult<&DbReader> {
		match self {
			PulseDb::Read(reader) => Ok(reader),
			PulseDb::Append(_) => {
				PulseError::custom("database is open for appending, reopen for reading")
			}
		}
	}

	/// A fresh event cursor; read-mode handles only.
	pub fn iter(&self) -> PulseResult<EventIter<'_>> {
		Ok(self.reader()?.iter())
	}

	/// Every event in the file, in file order; read-mode handles only.
	pub fn events(&self) -> PulseResult<Vec<Event>> {
		self.reader()?.all_events()
	}

	pub fn info(&self, fields: &[&str]) -> PulseResult<Vec<(String, Info)>> {
		Ok(self.reader()?.info(fields))
	}

	/// Flushes whatever the mode requires and releases the handle.
	pub fn close(self) -> PulseResult<()> {
		match self {
			PulseDb::Read(_) => Ok(()),
			PulseDb::Append(appender) => appender.close(),
		}
	}
}

/// Every event of the file at `path`.
pub fn events<P: AsRef<Path>>(path: P) -> PulseResult<Vec<Event>> {
	DbReader::open(path)?.all_events()
}

/// Events of the file at `path` with `start <= timestamp <= end`.
pub fn events_between<P: AsRef<Path>>(path: P, start: u64, end: u64) -> PulseResult<Vec<Event>> {
	let reader = DbReader::open(path)?;
	let events = reader.iter().with_range(start, end).all_events()?;
	Ok(events)
}

/// Selected header fields of the file at `path`; [PulseError::Nofile]
/// if there is no such file.
pub fn info<P: AsRef<Path>>(path: P, fields: &[&str]) -> PulseResult<Vec<(String, Info)>> {
	Ok(DbReader::open(path)?.info(fields))
}

/// [PulseDb::open_read] with the path resolved from (stock, date).
pub fn open_read_stock<R: PathResolver>(
	resolver: &R,
	stock: &str,
	date: NaiveDate,
) -> PulseResult<PulseDb> {
	PulseDb::open_read(resolver.path(stock, date))
}

/// [PulseDb::open_append] with the path resolved from (stock, date).
pub fn open_append_stock<R: PathResolver>(
	resolver: &R,
	stock: &str,
	date: NaiveDate,
	options: &AppendOptions,
) -> PulseResult<PulseDb> {
	PulseDb::open_append(resolver.path(stock, date), stock, date, options)
}

/// [events] with the path resolved from (stock, date).
pub fn events_stock<R: PathResolver>(
	resolver: &R,
	stock: &str,
	date: NaiveDate,
) -> PulseResult<Vec<Event>> {
	events(resolver.path(stock, date))
}

/// [info] with the path resolved from (stock, date).
pub fn info_stock<R: PathResolver>(
	resolver: &R,
	stock: &str,
	date: NaiveDate,
	fields: &[&str],
) -> PulseResult<Vec<(String, Info)>> {
	info(resolver.path(stock, date), fields)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::event::{MarketData, Quote, Trade};
	use rand::Rng;

	fn day() -> NaiveDate {
		NaiveDate::from_ymd_opt(2024, 1, 5).unwrap()
	}

	const DAY_START: u64 = 1704412800000;

	fn trade(timestamp: u64, price: f64, volume: u32) -> Event {
		Event::Trade(Trade { timestamp, price, volume })
	}

	fn md(timestamp: u64, bid: &[(f64, u32)], ask: &[(f64, u32)]) -> Event {
		Event::MarketData(MarketData::new(
			timestamp,
			bid.iter().map(|&(p, v)| Quote::new(p, v)).collect(),
			ask.iter().map(|&(p, v)| Quote::new(p, v)).collect(),
		))
	}

	/// `PULSEDB_LOG=trace cargo test` shows the engine's tracing output.
	fn init_tracing() {
		use tracing_subscriber::EnvFilter;
		let _ = tracing_subscriber::fmt()
			.with_env_filter(EnvFilter::from_env("PULSEDB_LOG"))
			.with_test_writer()
			.try_init();
	}

	fn write_events(path: &Path, depth: usize, events: &[Event]) -> PulseResult<()> {
		init_tracing();
		let options = AppendOptions { depth, ..AppendOptions::default() };
		let mut db = PulseDb::open_append(path, "TEST", day(), &options)?;
		for event in events.iter().cloned() {
			db.append(event)?;
		}
		db.close()
	}

	/// Three chunks of mixed rows for the range and iterator tests.
	fn mixed_events() -> Vec<Event> {
		vec![
			md(DAY_START + 500, &[(12.30, 5)], &[(12.40, 5)]),
			trade(DAY_START + 600, 12.34, 1),
			md(DAY_START + 700, &[(12.31, 5)], &[(12.40, 5)]),
			md(DAY_START + 300_000, &[(12.32, 5)], &[(12.41, 5)]),
			trade(DAY_START + 300_100, 12.36, 2),
			md(DAY_START + 300_200, &[(12.33, 5)], &[(12.41, 5)]),
			trade(DAY_START + 600_000 + 50, 12.38, 1),
			md(DAY_START + 600_000 + 60, &[(12.35, 5)], &[(12.42, 5)]),
		]
	}

	#[test]
	fn append_on_read_handle_is_refused() -> PulseResult<()> {
		let dir = tempfile::tempdir()?;
		let path = dir.path().join("TEST.pulse");
		write_events(&path, 1, &mixed_events())?;
		let mut db = PulseDb::open_read(&path)?;
		assert!(matches!(
			db.append(trade(DAY_START + 900_000, 1.0, 1)),
			Err(PulseError::ReopenInAppendMode)
		));
		Ok(())
	}

	/// Whatever goes in comes back out, modulo depth normalization.
	#[test]
	fn write_read_round_trip() -> PulseResult<()> {
		let dir = tempfile::tempdir()?;
		let path = dir.path().join("TEST.pulse");
		let input = mixed_events();
		write_events(&path, 1, &input)?;
		let expected: Vec<Event> = input.into_iter()
			.map(|event| match event {
				Event::MarketData(md) => Event::MarketData(md.with_depth(1)),
				trade => trade,
			})
			.collect();
		assert_eq!(expected, events(&path)?);
		Ok(())
	}

	/// Randomized round trip: a few hundred events with drifting quotes
	/// across many buckets survive the delta chain byte-exactly.
	#[test]
	fn randomized_round_trip() -> PulseResult<()> {
		let dir = tempfile::tempdir()?;
		let path = dir.path().join("TEST.pulse");
		let mut rng = rand::thread_rng();
		let depth = 2;
		let mut timestamp = DAY_START + rng.gen_range(1..500);
		let mut input = Vec::new();
		for _ in 0..300 {
			timestamp += rng.gen_range(1..40_000);
			let event = if rng.gen_bool(0.7) {
				let levels = rng.gen_range(0..=3);
				let quotes = |rng: &mut rand::rngs::ThreadRng| -> Vec<Quote> {
					(0..levels)
						.map(|_| Quote::new(
							rng.gen_range(1000..2000) as f64 / 100.0,
							rng.gen_range(0..100),
						))
						.collect()
				};
				md_event(timestamp, quotes(&mut rng), quotes(&mut rng))
			} else {
				trade(
					timestamp,
					rng.gen_range(1000..2000) as f64 / 100.0,
					rng.gen_range(1..100),
				)
			};
			input.push(event);
		}
		write_events(&path, depth, &input)?;
		let expected: Vec<Event> = input.into_iter()
			.map(|event| match event {
				Event::MarketData(md) => Event::MarketData(md.with_depth(depth)),
				trade => trade,
			})
			.collect();
		assert_eq!(expected, events(&path)?);
		Ok(())
	}

	fn md_event(timestamp: u64, bid: Vec<Quote>, ask: Vec<Quote>) -> Event {
		Event::MarketData(MarketData::new(timestamp, bid, ask))
	}

	/// A range read equals filtering the full stream, wherever the
	/// bounds land relative to chunk boundaries.
	#[test]
	fn range_read_matches_filtered_full_read() -> PulseResult<()> {
		let dir = tempfile::tempdir()?;
		let path = dir.path().join("TEST.pulse");
		write_events(&path, 1, &mixed_events())?;
		let all = events(&path)?;
		let ranges = [
			(0, u64::MAX),
			// Mid-chunk start: bucket 0 still has rows past `start`.
			(DAY_START + 650, DAY_START + 300_150),
			// Exactly on a chunk's first timestamp.
			(DAY_START + 300_000, DAY_START + 600_000 + 50),
			// Before any data.
			(1, DAY_START + 550),
			// Past all data.
			(DAY_START + 700_000, DAY_START + 800_000),
		];
		for (start, end) in ranges {
			let expected: Vec<Event> = all.iter()
				.filter(|e| start <= e.timestamp() && e.timestamp() <= end)
				.cloned()
				.collect();
			assert_eq!(
				expected,
				events_between(&path, start, end)?,
				"range {}..{}",
				start,
				end
			);
		}
		Ok(())
	}

	/// Two cursors over one reader advance independently.
	#[test]
	fn iterators_are_independent() -> PulseResult<()> {
		let dir = tempfile::tempdir()?;
		let path = dir.path().join("TEST.pulse");
		write_events(&path, 1, &mixed_events())?;
		let db = PulseDb::open_read(&path)?;
		let all = db.events()?;

		let start = DAY_START + 300_000;
		let end = DAY_START + 600_000;
		let mut ranged = db.iter()?.with_range(start, end);
		let mut plain = db.iter()?;
		let mut from_ranged = Vec::new();
		let mut from_plain = Vec::new();
		// Interleave the two cursors to prove they do not share state.
		loop {
			let a = ranged.read_event()?;
			let b = plain.read_event()?;
			if let Some(event) = a {
				from_ranged.push(event);
			}
			match b {
				Some(event) => from_plain.push(event),
				None => break,
			}
		}
		assert_eq!(all, from_plain);
		let expected: Vec<Event> = all.iter()
			.filter(|e| start <= e.timestamp() && e.timestamp() <= end)
			.cloned()
			.collect();
		assert_eq!(expected, from_ranged);
		Ok(())
	}

	/// Predicate filters see reconstructed events and compose with the
	/// range restriction.
	#[test]
	fn predicate_filter() -> PulseResult<()> {
		let dir = tempfile::tempdir()?;
		let path = dir.path().join("TEST.pulse");
		write_events(&path, 1, &mixed_events())?;
		let db = PulseDb::open_read(&path)?;
		let trades = db.iter()?
			.with_filter(|event| !event.is_market_data())
			.all_events()?;
		assert_eq!(3, trades.len());
		assert!(trades.iter().all(|e| !e.is_market_data()));

		let bounded = db.iter()?
			.with_range(DAY_START + 600, DAY_START + 300_100)
			.with_filter(|event| !event.is_market_data())
			.all_events()?;
		assert_eq!(2, bounded.len());
		Ok(())
	}

	/// The resolver-level surface: append and read back without ever
	/// naming a path.
	#[test]
	fn resolver_round_trip() -> PulseResult<()> {
		use crate::fs::DiskLayout;

		let dir = tempfile::tempdir()?;
		let options = AppendOptions { variant: "index".to_owned(), ..AppendOptions::default() };
		let layout = DiskLayout::for_options(dir.path(), &options);
		let mut db = open_append_stock(&layout, "SPX", day(), &options)?;
		db.append(trade(DAY_START + 500, 47.11, 3))?;
		db.close()?;

		assert!(layout.path("SPX", day()).starts_with(dir.path().join("index")));
		let events = events_stock(&layout, "SPX", day())?;
		assert_eq!(vec![trade(DAY_START + 500, 47.11, 3)], events);
		let report = info_stock(&layout, "SPX", day(), &["stock"])?;
		assert_eq!(("stock".to_owned(), Info::Str("SPX".to_owned())), report[0]);

		let db = open_read_stock(&layout, "SPX", day())?;
		assert_eq!(1, db.events()?.len());
		Ok(())
	}

	#[test]
	fn info_reports_header_and_presence() -> PulseResult<()> {
		let dir = tempfile::tempdir()?;
		let path = dir.path().join("TEST.pulse");
		write_events(&path, 1, &mixed_events())?;
		let report = info(&path, &["stock", "date", "presence"])?;
		assert_eq!(("stock".to_owned(), Info::Str("TEST".to_owned())), report[0]);
		assert_eq!(("date".to_owned(), Info::Date(day())), report[1]);
		assert_eq!(
			("presence".to_owned(), Info::Presence { chunks: 288, occupied: vec![0, 1, 2] }),
			report[2]
		);
		assert!(matches!(
			info(dir.path().join("absent.pulse"), &["stock"]),
			Err(PulseError::Nofile(_))
		));
		Ok(())
	}
}
