//! The filesystem naming collaborator. The engine itself only ever
//! consumes resolved paths; this module maps (stock, date) pairs to
//! them and answers what is on disk.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::tick::appender::AppendOptions;
use crate::{PulseError, PulseResult};

/// Extension of every database file.
pub const FILE_EXT: &str = "pulse";

/// Maps (stock, date) pairs to file paths and enumerates what exists.
pub trait PathResolver {
	fn path(&self, stock: &str, date: NaiveDate) -> PathBuf;

	/// All stocks with at least one file.
	fn stocks(&self) -> PulseResult<Vec<String>>;

	/// All dates stored for one stock, ascending.
	fn dates(&self, stock: &str) -> PulseResult<Vec<NaiveDate>>;

	/// Dates for which every listed stock has a file, ascending.
	fn common_dates(&self, stocks: &[&str]) -> PulseResult<Vec<NaiveDate>> {
		let mut stocks = stocks.iter();
		let mut common: BTreeSet<NaiveDate> = match stocks.next() {
			Some(first) => self.dates(first)?.into_iter().collect(),
			None => return Ok(Vec::new()),
		};
		for stock in stocks {
			let dates: BTreeSet<NaiveDate> = self.dates(stock)?.into_iter().collect();
			common = common.intersection(&dates).copied().collect();
		}
		Ok(common.into_iter().collect())
	}

	fn parse_date(&self, text: &str) -> PulseResult<NaiveDate> {
		parse_date(text)
	}
}

/// Parses `YYYY-MM-DD` (file names) or `YYYY/MM/DD` (header fields).
pub fn parse_date(text: &str) -> PulseResult<NaiveDate> {
	NaiveDate::parse_from_str(text, "%Y-%m-%d")
		.or_else(|_| NaiveDate::parse_from_str(text, "%Y/%m/%d"))
		.map_err(|_| PulseError::Custom(format!("bad date: {:?}", text)))
}

/// The default on-disk layout:
/// `<root>/<variant>/<stock>/<YYYY-MM-DD>.pulse`.
pub struct DiskLayout {
	root: PathBuf,
	variant: String,
}

impl DiskLayout {
	pub fn new<P: AsRef<Path>>(root: P) -> Self {
		Self {
			root: root.as_ref().to_owned(),
			variant: "stock".to_owned(),
		}
	}

	/// Switches the file-naming variant (the `type` append option).
	pub fn with_variant<S: AsRef<str>>(mut self, variant: S) -> Self {
		self.variant = variant.as_ref().to_owned();
		self
	}

	/// A layout honoring the naming variant of a set of append options.
	pub fn for_options<P: AsRef<Path>>(root: P, options: &AppendOptions) -> Self {
		Self::new(root).with_variant(&options.variant)
	}

	fn variant_dir(&self) -> PathBuf {
		self.root.join(&self.variant)
	}
}

impl PathResolver for DiskLayout {
	fn path(&self, stock: &str, date: NaiveDate) -> PathBuf {
		self.variant_dir()
			.join(stock)
			.join(format!("{}.{}", date.format("%Y-%m-%d"), FILE_EXT))
	}

	fn stocks(&self) -> PulseResult<Vec<String>> {
		let dir = self.variant_dir();
		if !dir.is_dir() {
			return Ok(Vec::new());
		}
		let mut stocks = Vec::new();
		for entry in fs::read_dir(dir)? {
			let entry = entry?;
			if !entry.file_type()?.is_dir() {
				continue;
			}
			if let Ok(name) = entry.file_name().into_string() {
				stocks.push(name);
			}
		}
		stocks.sort();
		Ok(stocks)
	}

	fn dates(&self, stock: &str) -> PulseResult<Vec<NaiveDate>> {
		let dir = self.variant_dir().join(stock);
		if !dir.is_dir() {
			return Ok(Vec::new());
		}
		let mut dates = Vec::new();
		for entry in fs::read_dir(dir)? {
			let path = entry?.path();
			if path.extension().and_then(|e| e.to_str()) != Some(FILE_EXT) {
				continue;
			}
			let stem = match path.file_stem().and_then(|s| s.to_str()) {
				Some(stem) => stem,
				None => continue,
			};
			// Stray files that don't carry a date are not ours.
			if let Ok(date) = parse_date(stem) {
				dates.push(date);
			}
		}
		dates.sort();
		Ok(dates)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn date(text: &str) -> NaiveDate {
		parse_date(text).unwrap()
	}

	fn touch(path: &Path) {
		fs::create_dir_all(path.parent().unwrap()).unwrap();
		fs::write(path, b"").unwrap();
	}

	#[test]
	fn path_layout() {
		let layout = DiskLayout::new("/data");
		assert_eq!(
			PathBuf::from("/data/stock/AAPL/2024-01-05.pulse"),
			layout.path("AAPL", date("2024-01-05"))
		);
		let layout = layout.with_variant("index");
		assert_eq!(
			PathBuf::from("/data/index/SPX/2024-01-05.pulse"),
			layout.path("SPX", date("2024-01-05"))
		);
	}

	#[test]
	fn listing_and_intersection() -> PulseResult<()> {
		let dir = tempfile::tempdir()?;
		let layout = DiskLayout::new(dir.path());
		touch(&layout.path("AAPL", date("2024-01-05")));
		touch(&layout.path("AAPL", date("2024-01-08")));
		touch(&layout.path("MSFT", date("2024-01-08")));
		touch(&layout.path("MSFT", date("2024-01-09")));
		touch(&layout.variant_dir().join("AAPL").join("notes.txt"));

		assert_eq!(vec!["AAPL".to_owned(), "MSFT".to_owned()], layout.stocks()?);
		assert_eq!(
			vec![date("2024-01-05"), date("2024-01-08")],
			layout.dates("AAPL")?
		);
		assert_eq!(
			vec![date("2024-01-08")],
			layout.common_dates(&["AAPL", "MSFT"])?
		);
		assert!(layout.common_dates(&[])?.is_empty());
		assert!(layout.dates("GOOG")?.is_empty());
		Ok(())
	}

	#[test]
	fn both_date_renderings_parse() {
		assert_eq!(date("2024-01-05"), parse_date("2024/01/05").unwrap());
		assert!(parse_date("yesterday").is_err());
	}
}
