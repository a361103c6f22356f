//! Decode, decrypt and print wireless M-Bus telegrams from utility meters.
pub mod config;
pub mod crypto;
pub mod drivers;
pub mod meter;
pub mod printer;
pub mod serial;
pub mod wmbus;

pub use config::CONFIG;
pub use drivers::{find_driver, DriverInfo};
pub use meter::{Meter, MeterInfo};
pub use printer::{PrinterConfig, PrinterManager, Reading};
pub use serial::{RawChunk, SerialManager};
pub use wmbus::telegram::Telegram;
