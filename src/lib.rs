//! Drive a Wi-Fi/IoT co-processor through its AT command set.
//!
//! # Overview
//!
//! The `explorer_at` crate implements the serial command/response protocol
//! spoken by IoT Explorer Wi-Fi modules. It turns a raw, half-duplex byte stream
//! into three things:
//!
//! - Synchronous command execution with success/failure classification and timeout ([`Modem`]).
//! - An inbound channel of control messages pushed by the cloud ([`frame`]).
//! - Batched, de-duplicated property reports sent back to the cloud ([`report`]).
//!
//! The [`Explorer`] engine ties these together with the provisioning flows
//! (credential setup, broker connection, smartconfig pairing, hard reset).
//! It is designed for a single cooperative control loop: every call completes
//! before the next one starts, and the only waits are the bounded timeouts of
//! individual commands.
//!
//! # Getting started
//!
//! The module is attached through a UART, typically configured as follows:
//!
//! - **Baud rate:** 115200
//! - **Parity:** None
//! - **Data bits:** 8
//! - **Stop bits:** 1
//!
//! Any port implementing [`Read`] and [`Write`] from [`embedded_io_async`] can
//! be used, together with a [`DelayNs`] implementation for timing.
//! If you enable the `native-serial` feature, a host serial port and a matching
//! delay can be obtained from the `serial` module.
//!
//! # Examples
//!
//! ## Bringing up the connection and running the control loop
//!
//! ```no_run
//! use explorer_at::{
//!     Config, Explorer,
//!     device::Device,
//!     embedded_hal_async::delay::DelayNs,
//!     embedded_io_async::{Read, Write},
//!     provision::Credentials,
//! };
//!
//! async fn run<P: Read + Write, D: DelayNs>(
//!     port: P,
//!     delay: D,
//!     dev: &mut impl Device,
//! ) -> explorer_at::Result<(), P::Error> {
//!     let creds = Credentials::new("K55ED9N9JG", "door_01", "c2VjcmV0");
//!     let mut explorer = Explorer::new(port, delay, Config::default());
//!
//!     explorer.configure(creds).await?;
//!     explorer.connect().await?;
//!     explorer.notify_full_report(dev.properties());
//!
//!     loop {
//!         if let Err(err) = explorer.poll(dev).await {
//!             log::warn!("Poll failed: {err:?}");
//!         }
//!     }
//! }
//! ```
//!
//! ## Low-level command execution using [`Modem`]
//!
//! ```no_run
//! use explorer_at::{
//!     Modem,
//!     command::PendingCommand,
//!     embedded_hal_async::delay::DelayNs,
//!     embedded_io_async::{Read, Write},
//! };
//!
//! async fn addresses<P: Read + Write, D: DelayNs>(
//!     port: P,
//!     delay: D,
//! ) -> explorer_at::Result<(), P::Error> {
//!     let mut modem = Modem::new(port, delay);
//!     let ack = modem.execute(&PendingCommand::query_address()).await?;
//!
//!     log::info!("Module answered: {ack}");
//!
//!     Ok(())
//! }
//! ```
//!
//! # Protocol details
//!
//! Commands are single lines terminated by CRLF. Acknowledgements are free-form
//! text recognized by substrings such as `+TCMQTTCONN:OK`. Before a command is
//! sent, all unread bytes are discarded; while it is in flight, the command is
//! the only user of the link, so push messages arriving during a long
//! exchange (e.g. pairing) are not seen by the framer.

#![no_std]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

extern crate alloc;

pub mod command;
pub mod device;
pub mod explorer;
pub mod frame;
pub mod matcher;
pub mod message;
pub mod provision;
pub mod report;

#[cfg(feature = "native-serial")]
#[cfg_attr(docsrs, doc(cfg(feature = "native-serial")))]
pub mod serial;

#[cfg(test)]
mod testing;

pub use embedded_hal;
pub use embedded_hal_async;
pub use embedded_io_async;
pub use explorer::{Config, Explorer};

use crate::{
    command::PendingCommand,
    matcher::{AckMatcher, LINE_TERMINATOR, Verdict, find},
};
use alloc::{string::String, vec::Vec};
use core::{
    fmt::{Display, Formatter},
    future,
    time::Duration,
};
use embassy_futures::select::{self, Either};
use embedded_hal_async::delay::DelayNs;
use embedded_io_async::{Read, Write};
use log::{debug, trace};

/// A specialized [`Result`] type for protocol operations.
///
/// Uses [`Error<E>`] as the error variant, which can include port-specific errors.
pub type Result<T, E> = core::result::Result<T, Error<E>>;

/// Error type for protocol operations.
///
/// The generic parameter `E` allows the error type to carry a port-specific error.
///
/// This enum is marked `#[non_exhaustive]` to allow for future variants.
#[non_exhaustive]
#[derive(PartialEq, Eq, Debug)]
pub enum Error<E> {
    /// No success token arrived before the deadline.
    CommandTimeout {
        /// Command text.
        command: String,
        /// Acknowledgement text received so far.
        ack: String,
    },
    /// A failure token arrived and no success token matched.
    CommandRejected {
        /// Command text.
        command: String,
        /// Acknowledgement text received so far.
        ack: String,
    },
    /// The module did not print its boot banner after a hard reset.
    ResetTimeout,
    /// The reset control line could not be driven.
    ResetLine,
    /// The port accepted fewer bytes than the command consists of.
    LinkWriteShortfall {
        /// Bytes accepted by the port.
        written: usize,
        /// Bytes of the complete command line.
        expected: usize,
    },
    /// The provided argument is invalid, or required state is missing.
    InvalidArgument,
    /// A port-specific input/output error.
    Io(E),
}

impl<E: core::error::Error> Display for Error<E> {
    fn fmt(&self, f: &mut Formatter) -> core::fmt::Result {
        match self {
            Self::CommandTimeout { command, ack } => {
                write!(f, "command timed out: {command} (ack: {ack:?})")
            }
            Self::CommandRejected { command, ack } => {
                write!(f, "command rejected: {command} (ack: {ack:?})")
            }
            Self::ResetTimeout => write!(f, "module did not boot after reset"),
            Self::ResetLine => write!(f, "reset line could not be driven"),
            Self::LinkWriteShortfall { written, expected } => {
                write!(f, "port accepted {written} of {expected} bytes")
            }
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::Io(err) => write!(f, "input/output error: {err}"),
        }
    }
}

impl<E: core::error::Error> core::error::Error for Error<E> {}

impl<E> From<E> for Error<E> {
    fn from(err: E) -> Self {
        Self::Io(err)
    }
}

/// Default interval between two reads while waiting for an answer.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Size of the buffer used for a single read.
const READ_CHUNK_SIZE: usize = 256;

/// Upper bound of reads when discarding stale bytes.
const MAX_DRAIN_READS: usize = 64;

/// Asynchronous AT command executor.
///
/// Owns the port exclusively: only one command may be in flight at a time.
/// Reads never wait for data; each exchange polls the port, sleeping
/// one poll interval between reads, until an answer is recognized or the
/// command's timeout has elapsed.
#[derive(Debug)]
pub struct Modem<P, D> {
    port: P,
    delay: D,
    poll_interval: Duration,
}

impl<P: Read + Write, D: DelayNs> Modem<P, D> {
    /// Constructs a new command executor.
    pub fn new(port: P, delay: D) -> Self {
        Self {
            port,
            delay,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Sets the interval between two reads while waiting for an answer.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Executes a command and returns the full acknowledgement text.
    ///
    /// Unread bytes are discarded before sending. The returned text contains
    /// everything received until a success token matched, so callers can parse
    /// additional fields from it.
    ///
    /// # Errors
    ///
    /// - [`Error::CommandRejected`] if a failure token arrived on a completed line
    ///   and no success token matched, or a failure token was seen when the timeout elapsed.
    /// - [`Error::CommandTimeout`] if no token arrived in time.
    /// - [`Error::LinkWriteShortfall`] if the command could not be written completely.
    pub async fn execute(&mut self, cmd: &PendingCommand) -> Result<String, P::Error> {
        self.drain().await?;
        self.write_line(&cmd.text).await?;

        let matcher = AckMatcher::new(cmd.success, cmd.failure);
        let mut ack = Vec::new();
        let mut elapsed = Duration::ZERO;

        loop {
            if self.read_available(&mut ack).await? > 0 {
                match matcher.scan(&ack) {
                    Some(Verdict::Success(idx)) => {
                        debug!("{} acknowledged with {}", cmd.text, cmd.success[idx]);

                        return Ok(into_text(ack));
                    }
                    Some(Verdict::Failure(idx)) => {
                        debug!("{} rejected with {}", cmd.text, cmd.failure[idx]);

                        return Err(Error::CommandRejected {
                            command: cmd.text.clone(),
                            ack: into_text(ack),
                        });
                    }
                    None => {}
                }
            }

            if elapsed >= cmd.timeout {
                break;
            }

            self.sleep(self.poll_interval).await;
            elapsed += self.poll_interval;
        }

        let command = cmd.text.clone();
        let rejected = matcher.saw_failure(&ack);
        let ack = into_text(ack);

        debug!("{command} timed out after {elapsed:?} (ack: {ack:?})");

        if rejected {
            Err(Error::CommandRejected { command, ack })
        } else {
            Err(Error::CommandTimeout { command, ack })
        }
    }

    /// Waits until `token` appears on the port.
    ///
    /// Returns whether the token was seen before the timeout elapsed.
    pub async fn wait_for(&mut self, token: &str, timeout: Duration) -> Result<bool, P::Error> {
        let mut received = Vec::new();
        let mut elapsed = Duration::ZERO;

        loop {
            if self.read_available(&mut received).await? > 0
                && find(&received, token.as_bytes()).is_some()
            {
                return Ok(true);
            }

            if elapsed >= timeout {
                return Ok(false);
            }

            self.sleep(self.poll_interval).await;
            elapsed += self.poll_interval;
        }
    }

    /// Discards all bytes currently available on the port.
    ///
    /// Returns the number of discarded bytes.
    pub async fn drain(&mut self) -> Result<usize, P::Error> {
        let mut scratch = Vec::new();

        for _ in 0..MAX_DRAIN_READS {
            if self.read_available(&mut scratch).await? == 0 {
                break;
            }
        }

        if !scratch.is_empty() {
            debug!("Discarded {} stale bytes", scratch.len());
        }

        Ok(scratch.len())
    }

    /// Appends bytes currently available on the port to `buf`, without waiting.
    ///
    /// Returns the number of bytes read, which is zero if the port has no data.
    pub async fn read_available(&mut self, buf: &mut Vec<u8>) -> Result<usize, P::Error> {
        let mut chunk = [0x00; READ_CHUNK_SIZE];

        // A read that cannot complete immediately is abandoned
        match select::select(self.port.read(&mut chunk), future::ready(())).await {
            Either::First(res) => {
                let len = res?;

                if len > 0 {
                    trace!("Read from port: {:?}", String::from_utf8_lossy(&chunk[..len]));
                    buf.extend_from_slice(&chunk[..len]);
                }

                Ok(len)
            }
            Either::Second(()) => Ok(0),
        }
    }

    /// Sleeps for the given duration.
    pub async fn sleep(&mut self, dur: Duration) {
        self.delay
            .delay_ms(dur.as_millis().try_into().unwrap_or(u32::MAX))
            .await;
    }

    /// Returns a mutable reference to the underlying port.
    pub fn port(&mut self) -> &mut P {
        &mut self.port
    }

    /// Writes a command line, appending the line terminator.
    async fn write_line(&mut self, text: &str) -> Result<(), P::Error> {
        let mut line = Vec::with_capacity(text.len() + LINE_TERMINATOR.len());

        line.extend_from_slice(text.as_bytes());
        line.extend_from_slice(LINE_TERMINATOR);
        trace!("Write to port: {text}");

        let mut written = 0;

        while written < line.len() {
            match self.port.write(&line[written..]).await? {
                0 => {
                    return Err(Error::LinkWriteShortfall {
                        written,
                        expected: line.len(),
                    });
                }
                len => written += len,
            }
        }

        self.port.flush().await?;

        Ok(())
    }
}

fn into_text(ack: Vec<u8>) -> String {
    String::from_utf8(ack).unwrap_or_else(|err| String::from_utf8_lossy(err.as_bytes()).into())
}
