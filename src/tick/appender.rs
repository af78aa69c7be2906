use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::config::Config;
use crate::event::{Event, MarketData, Trade, scale_price};
use crate::ioext::{WriteExt, WriteZeroes};
use crate::{PulseError, PulseResult};

use super::candle::Candle;
use super::chunkmap::{self, ChunkEntry};
use super::codec;
use super::header::DbHeader;
use super::reader::DbReader;
use super::{CANDLE_SIZE, CURRENT_VERSION, validate};

/// Options for [DbAppender::open] when it has to create the file.
/// An existing file keeps the parameters it was created with.
#[derive(Debug, Clone)]
pub struct AppendOptions {
	/// File-naming variant, consumed by the path resolver.
	pub variant: String,
	/// Disables fsync on chunk-boundary writes.
	pub nosync: bool,
	pub have_candle: bool,
	pub depth: usize,
	pub scale: u32,
	/// Bucket duration in seconds.
	pub chunk_size: u32,
}

impl Default for AppendOptions {
	fn default() -> Self {
		Self {
			variant: "stock".to_owned(),
			nosync: false,
			have_candle: true,
			depth: 1,
			scale: 100,
			chunk_size: 300,
		}
	}
}

impl AppendOptions {
	/// Reads the option keys from a configuration collaborator, falling
	/// back to the defaults above for missing keys.
	pub fn from_config<C: Config>(config: &C) -> PulseResult<Self> {
		let defaults = Self::default();
		Ok(Self {
			variant: config.get_value_or("type", &defaults.variant).to_owned(),
			nosync: parse_flag(config.get_value_or("nosync", "false"))?,
			have_candle: parse_flag(config.get_value_or("have_candle", "true"))?,
			depth: parse_number(config.get_value_or("depth", "1"))? as usize,
			scale: parse_number(config.get_value_or("scale", "100"))?,
			chunk_size: parse_number(config.get_value_or("chunk_size", "300"))?,
		})
	}
}

fn parse_flag(value: &str) -> PulseResult<bool> {
	match value {
		"true" => Ok(true),
		"false" => Ok(false),
		other => PulseError::custom(format!("bad boolean option: {:?}", other)),
	}
}

fn parse_number(value: &str) -> PulseResult<u32> {
	value.parse::<u32>()
		.map_err(|_| PulseError::Custom(format!("bad numeric option: {:?}", value)))
}

/// A database file open for appending.
///
/// The appender owns the write handle and every piece of running state:
/// the delta basis, the candle, the in-memory chunk map, and the time
/// at which the next bucket begins. Each appended event lands at EOF;
/// the only other writes the file ever sees are the positioned updates
/// of one chunk-map cell and of the candle slot.
pub struct DbAppender {
	path: PathBuf,
	file: File,
	header: DbHeader,
	candle_offset: u64,
	chunk_map_offset: u64,
	sync: bool,
	/// Basis for delta rows. `None` means the next market-data row must
	/// be written in full.
	last_md: Option<MarketData>,
	last_timestamp: u64,
	/// Wall-clock millisecond at which the next bucket starts. `None`
	/// until the first chunk of the session is opened.
	next_chunk_time: Option<u64>,
	chunks: Vec<ChunkEntry>,
	candle: Option<Candle>,
	closed: bool,
}

impl DbAppender {
	/// Opens `path` for appending, creating the file (and its parent
	/// directories) if it does not exist yet. `options` only shape a
	/// newly created file, except `nosync`, which is a session property.
	pub fn open<P: AsRef<Path>>(
		path: P,
		stock: &str,
		date: NaiveDate,
		options: &AppendOptions,
	) -> PulseResult<Self> {
		let path = path.as_ref();
		if path.exists() {
			Self::continue_file(path, options)
		} else {
			Self::create(path, stock, date, options)
		}
	}

	fn create(
		path: &Path,
		stock: &str,
		date: NaiveDate,
		options: &AppendOptions,
	) -> PulseResult<Self> {
		let header = DbHeader {
			version: CURRENT_VERSION,
			stock: stock.to_owned(),
			date,
			depth: options.depth,
			scale: options.scale,
			chunk_size: options.chunk_size,
			have_candle: options.have_candle,
		};
		validate::check_parameters(&header)?;
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)?;
		}
		let mut file = OpenOptions::new()
			.read(true).write(true)
			.create_new(true)
			.open(path)?;
		let header_len = header.write_to(&mut file)? as u64;
		let candle_offset = header_len;
		if header.have_candle {
			file.write_zeroes(CANDLE_SIZE)?;
		}
		let chunk_map_offset = candle_offset + header.candle_size();
		file.write_zeroes(header.chunk_map_size())?;
		tracing::debug!(
			path = %path.display(),
			stock = %header.stock,
			"created database file"
		);
		Ok(Self {
			path: path.to_owned(),
			file,
			header,
			candle_offset,
			chunk_map_offset,
			sync: !options.nosync,
			last_md: None,
			last_timestamp: 0,
			next_chunk_time: None,
			chunks: Vec::new(),
			candle: None,
			closed: false,
		})
	}

	/// Reopens an existing file and rebuilds the running state by
	/// replaying the last chunk. Chunks are self-contained, so replaying
	/// one reproduces the delta basis exactly; replaying its trades into
	/// the persisted candle is idempotent and recovers any trades that
	/// landed after the last candle write.
	fn continue_file(path: &Path, options: &AppendOptions) -> PulseResult<Self> {
		let reader = DbReader::open(path)?;
		let header = reader.header().clone();
		let chunk_map_offset = reader.chunk_map_offset();
		let candle_offset = chunk_map_offset - header.candle_size();
		let mut candle = reader.candle();
		let mut last_md = None;
		let mut last_timestamp = 0;
		let mut next_chunk_time = None;
		if let Some(last) = reader.chunks().last() {
			let data = reader.data();
			let mut pos = last.offset as usize;
			while pos < data.len() {
				let (event, consumed) = codec::decode_row(
					&data[pos..],
					header.depth,
					header.scale,
					last_md.as_ref(),
				)?;
				pos += consumed;
				last_timestamp = event.timestamp();
				match event {
					Event::MarketData(md) => last_md = Some(md),
					Event::Trade(trade) => {
						if header.have_candle {
							let scaled = scale_price(trade.price, header.scale)
								.ok_or(PulseError::BadPrice)?;
							Candle::accumulate(&mut candle, scaled as u32);
						}
					}
				}
			}
			next_chunk_time = Some(header.bucket_start_ms(last.bucket + 1));
		}
		let chunks = reader.chunks().to_vec();
		let mut file = OpenOptions::new().read(true).write(true).open(path)?;
		file.seek(SeekFrom::End(0))?;
		tracing::debug!(
			path = %path.display(),
			stock = %header.stock,
			chunks = chunks.len(),
			"reopened database file for append"
		);
		Ok(Self {
			path: path.to_owned(),
			file,
			header,
			candle_offset,
			chunk_map_offset,
			sync: !options.nosync,
			last_md,
			last_timestamp,
			next_chunk_time,
			chunks,
			candle,
			closed: false,
		})
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn header(&self) -> &DbHeader {
		&self.header
	}

	pub fn chunks(&self) -> &[ChunkEntry] {
		&self.chunks
	}

	pub fn candle(&self) -> Option<Candle> {
		self.candle
	}

	pub fn last_timestamp(&self) -> u64 {
		self.last_timestamp
	}

	/// Appends one event. Validation happens before any byte is
	/// written, so a rejected event leaves the file untouched.
	pub fn append(&mut self, event: Event) -> PulseResult<()> {
		event.validate(self.header.scale)?;
		// Quotes are normalized to the file depth up front; the basis
		// snapshot and everything on disk always have exactly `depth`
		// levels per side.
		let event = match event {
			Event::MarketData(md) => Event::MarketData(md.with_depth(self.header.depth)),
			trade => trade,
		};
		let timestamp = event.timestamp();
		let boundary = match self.next_chunk_time {
			None => true,
			Some(next) => timestamp >= next,
		};
		if boundary {
			self.append_boundary(event, timestamp)?;
		} else {
			match event {
				Event::MarketData(md) => self.append_md(md)?,
				Event::Trade(trade) => self.append_trade(trade)?,
			}
		}
		self.last_timestamp = timestamp;
		Ok(())
	}

	/// Opens a new chunk: the event is written as a self-contained row
	/// at EOF, its offset lands in the bucket's chunk-map cell, and the
	/// candle is persisted. A boundary trade clears the delta basis so
	/// that every delta chain starts inside its own chunk.
	fn append_boundary(&mut self, event: Event, timestamp: u64) -> PulseResult<()> {
		let bucket = self.header.bucket_of(timestamp).ok_or(PulseError::NotThisDay)?;
		let mut row = Vec::new();
		match &event {
			Event::MarketData(md) => codec::encode_full_md(md, self.header.scale, &mut row)?,
			Event::Trade(trade) => codec::encode_trade(trade, self.header.scale, &mut row)?,
		}
		let eof = self.file.seek(SeekFrom::End(0))?;
		let offset = eof - self.chunk_map_offset;
		if offset > u32::MAX as u64 {
			return PulseError::corrupt("row stream exceeds the 32-bit offset space");
		}
		self.file.write_all(&row)?;
		self.file.seek(SeekFrom::Start(
			self.chunk_map_offset + chunkmap::cell_offset(bucket),
		))?;
		self.file.write_value(offset as u32)?;
		self.chunks.push(ChunkEntry {
			bucket,
			first_timestamp: timestamp,
			offset: offset as u32,
		});
		self.next_chunk_time = Some(self.header.bucket_start_ms(bucket + 1));
		match event {
			Event::MarketData(md) => self.last_md = Some(md),
			Event::Trade(trade) => {
				self.last_md = None;
				self.update_candle(&trade)?;
			}
		}
		self.persist_candle()?;
		if self.sync {
			self.file.sync_data()?;
		}
		tracing::trace!(bucket, offset, "opened chunk");
		Ok(())
	}

	fn append_md(&mut self, md: MarketData) -> PulseResult<()> {
		let mut row = Vec::new();
		match &self.last_md {
			None => codec::encode_full_md(&md, self.header.scale, &mut row)?,
			Some(prev) => codec::encode_delta_md(prev, &md, self.header.scale, &mut row)?,
		}
		self.file.seek(SeekFrom::End(0))?;
		self.file.write_all(&row)?;
		self.last_md = Some(md);
		Ok(())
	}

	fn append_trade(&mut self, trade: Trade) -> PulseResult<()> {
		let mut row = Vec::new();
		codec::encode_trade(&trade, self.header.scale, &mut row)?;
		self.file.seek(SeekFrom::End(0))?;
		self.file.write_all(&row)?;
		self.update_candle(&trade)
	}

	fn update_candle(&mut self, trade: &Trade) -> PulseResult<()> {
		if !self.header.have_candle {
			return Ok(());
		}
		// Validation guarantees a non-negative 31-bit scaled price.
		let scaled = scale_price(trade.price, self.header.scale).ok_or(PulseError::BadPrice)?;
		Candle::accumulate(&mut self.candle, scaled as u32);
		Ok(())
	}

	fn persist_candle(&mut self) -> PulseResult<()> {
		if !self.header.have_candle {
			return Ok(());
		}
		self.file.seek(SeekFrom::Start(self.candle_offset))?;
		Candle::write_slot(self.candle.as_ref(), &mut self.file)?;
		Ok(())
	}

	/// Persists the candle and releases the handle. Dropping an
	/// appender does the same as a best effort, but only `close`
	/// reports failures.
	pub fn close(mut self) -> PulseResult<()> {
		self.finish()
	}

	fn finish(&mut self) -> PulseResult<()> {
		if self.closed {
			return Ok(());
		}
		self.closed = true;
		self.persist_candle()?;
		self.file.sync_data()?;
		tracing::debug!(path = %self.path.display(), "closed database file");
		Ok(())
	}
}

impl Drop for DbAppender {
	fn drop(&mut self) {
		let _ = self.finish();
	}
}
