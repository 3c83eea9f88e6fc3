//! Test doubles for the serial link, timing, output pins and devices.

use crate::{
    device::{Device, DeviceKind, Property, PropertyMap},
    message::ControlMessage,
    report::ReportQueue,
};
use alloc::{
    boxed::Box,
    collections::VecDeque,
    string::{String, ToString},
    vec::Vec,
};
use core::{convert::Infallible, future};
use embedded_hal::digital::{self, ErrorKind, OutputPin};
use embedded_hal_async::delay::DelayNs;
use embedded_io_async::{ErrorType, Read, Write};
use log::LevelFilter;

pub fn init_logger() {
    let _ = env_logger::builder()
        .filter_level(LevelFilter::max())
        .is_test(true)
        .try_init();
}

/// Link delivering scripted chunks, one per read.
///
/// Replies are released chunk by chunk once a complete command line has been
/// written, in the order they were queued. A read with nothing to deliver
/// never completes.
#[derive(Debug, Default)]
pub struct ScriptedLink {
    incoming: VecDeque<Vec<u8>>,
    replies: VecDeque<Vec<Vec<u8>>>,
    written: Vec<u8>,
    lines: usize,
    write_limit: Option<usize>,
}

impl ScriptedLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts at most `limit` bytes in total, then reports zero-length writes.
    pub fn with_write_limit(mut self, limit: usize) -> Self {
        self.write_limit = Some(limit);
        self
    }

    /// Makes bytes available immediately.
    pub fn push(&mut self, chunk: &[u8]) {
        self.incoming.push_back(chunk.to_vec());
    }

    /// Queues the answer to the next command line.
    pub fn reply(&mut self, chunks: &[&[u8]]) {
        self.replies
            .push_back(chunks.iter().map(|chunk| chunk.to_vec()).collect());
    }

    /// Queues an empty answer to the next command line.
    pub fn silence(&mut self) {
        self.replies.push_back(Vec::new());
    }

    /// Returns all written command lines, without terminator.
    pub fn written_lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.written)
            .split_terminator("\r\n")
            .map(ToString::to_string)
            .collect()
    }

    /// Returns whether all queued input has been consumed.
    pub fn is_exhausted(&self) -> bool {
        self.incoming.is_empty() && self.replies.is_empty()
    }

    fn release_replies(&mut self) {
        let lines = self
            .written
            .windows(2)
            .filter(|window| window == b"\r\n")
            .count();

        for _ in self.lines..lines {
            if let Some(reply) = self.replies.pop_front() {
                self.incoming.extend(reply);
            }
        }

        self.lines = lines;
    }
}

impl ErrorType for ScriptedLink {
    type Error = Infallible;
}

impl Read for ScriptedLink {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let Some(mut chunk) = self.incoming.pop_front() else {
            return future::pending().await;
        };

        let len = chunk.len().min(buf.len());

        buf[..len].copy_from_slice(&chunk[..len]);

        if len < chunk.len() {
            self.incoming.push_front(chunk.split_off(len));
        }

        Ok(len)
    }
}

impl Write for ScriptedLink {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let len = match self.write_limit {
            Some(limit) => buf.len().min(limit.saturating_sub(self.written.len())),
            None => buf.len(),
        };

        self.written.extend_from_slice(&buf[..len]);
        self.release_replies();

        Ok(len)
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Delay returning immediately.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoDelay;

impl DelayNs for NoDelay {
    async fn delay_ns(&mut self, _ns: u32) {}
}

/// Output pin recording every level it is driven to.
#[derive(Debug, Default)]
pub struct RecordingPin {
    pub levels: Vec<bool>,
}

impl digital::ErrorType for RecordingPin {
    type Error = Infallible;
}

impl OutputPin for RecordingPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.levels.push(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.levels.push(true);
        Ok(())
    }
}

/// Output pin that cannot be driven.
#[derive(Debug, Default)]
pub struct BrokenPin;

impl digital::ErrorType for BrokenPin {
    type Error = ErrorKind;
}

impl OutputPin for BrokenPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        Err(ErrorKind::Other)
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Err(ErrorKind::Other)
    }
}

/// Device with two switch properties, recording every message it receives.
#[derive(Debug)]
pub struct TestDevice {
    pub props: PropertyMap,
    pub received: Vec<ControlMessage>,
}

impl TestDevice {
    pub fn new() -> Self {
        Self {
            props: PropertyMap::new([("door", 0), ("light", 0)]),
            received: Vec::new(),
        }
    }
}

#[async_trait::async_trait(?Send)]
impl Device for TestDevice {
    fn kind(&self) -> DeviceKind {
        DeviceKind::DoorLock
    }

    fn descriptors(&self) -> &'static [Property] {
        &[]
    }

    fn properties(&self) -> &PropertyMap {
        &self.props
    }

    async fn on_control_message(&mut self, msg: ControlMessage, reports: &mut ReportQueue) {
        if let ControlMessage::Control { params, .. } = &msg {
            for (key, val) in params {
                if self.props.set(key, val.clone()).is_ok() {
                    reports.notify([key]);
                }
            }
        }

        self.received.push(msg);
    }
}
