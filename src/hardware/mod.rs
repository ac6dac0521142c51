//! Serial transport to the instrument and its simulated stand-in.

pub mod mock;
pub mod transport;

pub use transport::{DynSerial, SerialPortIO, SerialTransport, Transport};
