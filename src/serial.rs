//! Native asynchronous serial port support for [`Explorer`](crate::Explorer).
//!
//! Uses the [`serial2-tokio`](https://crates.io/crates/serial2-tokio) crate.

extern crate std;

use crate::Error;
use core::time::Duration;
use embedded_hal_async::delay::DelayNs;
use embedded_io_adapters::tokio_1::FromTokio;
use embedded_io_async::ErrorType;
use serial2_tokio::{CharSize, FlowControl, Parity, SerialPort, Settings, StopBits};

/// Baud rate used by IoT Explorer modules out of the box.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Serial port type implementing [`Read`](embedded_io_async::Read)
/// and [`Write`](embedded_io_async::Write).
pub type Port = FromTokio<SerialPort>;

/// Port-specific error type to be used as `E` for the generic [`Error<E>`] type.
pub type PortError = <Port as ErrorType>::Error;

/// Opens a native serial port at the given path, using 8N1 framing.
///
/// Returns a [`Port`] that can be passed to [`Explorer::new`](crate::Explorer::new).
pub fn open(path: &str, baud_rate: u32) -> Result<Port, Error<std::io::Error>> {
    let port = SerialPort::open(path, |mut settings: Settings| {
        settings.set_raw();
        settings.set_baud_rate(baud_rate)?;
        settings.set_char_size(CharSize::Bits8);
        settings.set_parity(Parity::None);
        settings.set_stop_bits(StopBits::One);
        settings.set_flow_control(FlowControl::None);

        Ok(settings)
    })?;

    port.discard_buffers()?;

    Ok(FromTokio::new(port))
}

/// Delay provider backed by the Tokio timer.
#[derive(Copy, Clone, Debug, Default)]
pub struct Delay;

impl DelayNs for Delay {
    async fn delay_ns(&mut self, ns: u32) {
        tokio::time::sleep(Duration::from_nanos(ns.into())).await;
    }

    async fn delay_ms(&mut self, ms: u32) {
        tokio::time::sleep(Duration::from_millis(ms.into())).await;
    }
}
