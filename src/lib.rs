pub mod error;
pub mod ioext;
pub mod event;
pub mod tick;
pub mod db;
pub mod fs;
pub mod config;

pub use error::PulseError;
pub use error::PulseResult;

pub use event::{Event, MarketData, Quote, Trade};

pub use db::PulseDb;
pub use tick::appender::{AppendOptions, DbAppender};
pub use tick::header::DbHeader;
pub use tick::candle::Candle;
pub use tick::iter::EventIter;
pub use tick::reader::{DbReader, Info};
