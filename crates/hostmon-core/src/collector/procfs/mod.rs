//! Parsers for the `/proc` files the probe reads.

pub mod parser;

pub use parser::{CpuInfoEntry, CpuStat, MemInfo, ParseError};
