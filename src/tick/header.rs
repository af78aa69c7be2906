use std::io::Write;

use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};

use crate::{PulseError, PulseResult};

use super::{CANDLE_SIZE, SECONDS_PER_DAY, SHEBANG, number_of_chunks};

/// The textual header at the top of every database file.
/// All parameters are fixed when the file is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbHeader {
    pub version: u32,
    pub stock: String,
    pub date: NaiveDate,
    /// Price levels per side in every market-data row.
    pub depth: usize,
    /// Power-of-ten multiplier storing prices as integers.
    pub scale: u32,
    /// Bucket duration in seconds.
    pub chunk_size: u32,
    pub have_candle: bool,
}

impl DbHeader {
    pub fn number_of_chunks(&self) -> u32 {
        number_of_chunks(self.chunk_size)
    }

    /// Size of the chunk map in bytes.
    pub fn chunk_map_size(&self) -> u64 {
        4 * self.number_of_chunks() as u64
    }

    pub fn candle_size(&self) -> u64 {
        if self.have_candle { CANDLE_SIZE } else { 0 }
    }

    /// Midnight UTC of the file's date, in milliseconds since the epoch.
    pub fn day_start_ms(&self) -> u64 {
        let midnight = self.date.and_time(NaiveTime::MIN);
        Utc.from_utc_datetime(&midnight).timestamp_millis() as u64
    }

    /// The bucket a timestamp falls into, if it belongs to this day at all.
    pub fn bucket_of(&self, timestamp: u64) -> Option<u32> {
        let day_start = self.day_start_ms();
        if timestamp < day_start {
            return None;
        }
        let bucket = (timestamp - day_start) / (self.chunk_size as u64 * 1000);
        if bucket < self.number_of_chunks() as u64 {
            Some(bucket as u32)
        } else {
            None
        }
    }

    /// Millisecond timestamp at which the given bucket begins.
    pub fn bucket_start_ms(&self, bucket: u32) -> u64 {
        self.day_start_ms() + bucket as u64 * self.chunk_size as u64 * 1000
    }

    /// Writes the shebang, one `key: value` line per parameter, and the
    /// blank terminator line. Returns the number of bytes written.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> PulseResult<usize> {
        let mut text = String::new();
        text.push_str(SHEBANG);
        text.push('\n');
        text.push_str(&format!("version: {}\n", self.version));
        text.push_str(&format!("stock: {}\n", self.stock));
        text.push_str(&format!("date: {}\n", self.date.format("%Y/%m/%d")));
        text.push_str(&format!("depth: {}\n", self.depth));
        text.push_str(&format!("scale: {}\n", self.scale));
        text.push_str(&format!("chunk_size: {}\n", self.chunk_size));
        text.push_str(&format!("have_candle: {}\n", self.have_candle));
        text.push('\n');
        writer.write_all(text.as_bytes())?;
        Ok(text.len())
    }

    /// Parses a header off the front of `buf`. Returns the header and the
    /// offset of the first byte past the terminator line.
    pub fn parse(buf: &[u8]) -> PulseResult<(DbHeader, usize)> {
        let mut pos = 0;
        let mut first = true;
        let mut version: Option<u32> = None;
        let mut stock: Option<String> = None;
        let mut date: Option<NaiveDate> = None;
        let mut depth: Option<usize> = None;
        let mut scale: Option<u32> = None;
        let mut chunk_size: Option<u32> = None;
        let mut have_candle: Option<bool> = None;
        loop {
            let rest = &buf[pos..];
            let eol = rest.iter().position(|&b| b == b'\n')
                .ok_or_else(|| PulseError::BadHeader("unterminated header".into()))?;
            let line = std::str::from_utf8(&rest[..eol])
                .map_err(|_| PulseError::BadHeader("header is not UTF-8".into()))?;
            pos += eol + 1;
            if first {
                if line != SHEBANG {
                    return Err(PulseError::BadHeader(format!("bad shebang line: {:?}", line)));
                }
                first = false;
                continue;
            }
            if line.is_empty() {
                break;
            }
            if line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once(':')
                .ok_or_else(|| PulseError::BadHeader(format!("not a key: value line: {:?}", line)))?;
            let value = value.trim();
            match key.trim() {
                "version" => version = Some(parse_int(key, value)? as u32),
                "stock" => stock = Some(value.to_owned()),
                "date" => date = Some(parse_date(value)?),
                "depth" => depth = Some(parse_int(key, value)? as usize),
                "scale" => scale = Some(parse_int(key, value)? as u32),
                "chunk_size" => chunk_size = Some(parse_int(key, value)? as u32),
                "have_candle" => have_candle = Some(parse_bool(value)?),
                // Unknown keys from newer writers are skipped, not fatal.
                _ => {}
            }
        }
        let header = DbHeader {
            version: require(version, "version")?,
            stock: require(stock, "stock")?,
            date: require(date, "date")?,
            depth: require(depth, "depth")?,
            scale: require(scale, "scale")?,
            chunk_size: require(chunk_size, "chunk_size")?,
            have_candle: have_candle.unwrap_or(true),
        };
        if header.chunk_size == 0 || SECONDS_PER_DAY % header.chunk_size != 0 {
            return Err(PulseError::BadHeader(format!(
                "chunk_size {} does not divide a day",
                header.chunk_size
            )));
        }
        Ok((header, pos))
    }
}

fn parse_int(key: &str, value: &str) -> PulseResult<u64> {
    value.parse::<u64>()
        .map_err(|_| PulseError::BadHeader(format!("bad integer for {}: {:?}", key, value)))
}

fn parse_bool(value: &str) -> PulseResult<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(PulseError::BadHeader(format!("bad boolean: {:?}", other))),
    }
}

pub fn parse_date(value: &str) -> PulseResult<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y/%m/%d")
        .map_err(|_| PulseError::BadHeader(format!("bad date: {:?}", value)))
}

fn require<T>(value: Option<T>, key: &str) -> PulseResult<T> {
    value.ok_or_else(|| PulseError::BadHeader(format!("missing header key: {}", key)))
}
