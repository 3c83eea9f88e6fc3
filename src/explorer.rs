//! Protocol engine driving a device facade.
//!
//! An [`Explorer`] owns the link to the co-processor and everything needed
//! to exchange data with the cloud: the inbound framer, the report queue and
//! the connection state. The application calls [`Explorer::poll`] from its
//! control loop, which dispatches received control messages to the device
//! and publishes the property reports they caused.

use crate::{
    Error, Modem, Result,
    command::PendingCommand,
    device::{Device, PropertyMap},
    frame::{DEFAULT_CAPACITY, InboundFramer},
    message::ReportEnvelope,
    provision::{ConnectionState, Credentials},
    report::{ReportQueue, ReportUnit, SendCounter},
};
use alloc::vec::Vec;
use core::time::Duration;
use embedded_hal_async::delay::DelayNs;
use embedded_io_async::{Read, Write};
use log::{debug, warn};

/// Engine configuration.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct Config {
    /// Interval between two reads while waiting for an answer.
    pub poll_interval: Duration,
    /// Maximum size of an incomplete inbound frame.
    pub rx_capacity: usize,
    /// Time the user is given to complete smartconfig pairing.
    pub smart_config_timeout: Duration,
    /// Length of the low pulse on the reset line.
    pub reset_pulse: Duration,
    /// Time the module is given to boot after a reset.
    pub reset_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval: crate::DEFAULT_POLL_INTERVAL,
            rx_capacity: DEFAULT_CAPACITY,
            smart_config_timeout: Duration::from_secs(60),
            reset_pulse: Duration::from_millis(200),
            reset_timeout: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Sets the interval between two reads while waiting for an answer.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the maximum size of an incomplete inbound frame.
    #[must_use]
    pub fn with_rx_capacity(mut self, capacity: usize) -> Self {
        self.rx_capacity = capacity;
        self
    }

    /// Sets the time the user is given to complete smartconfig pairing.
    #[must_use]
    pub fn with_smart_config_timeout(mut self, timeout: Duration) -> Self {
        self.smart_config_timeout = timeout;
        self
    }

    /// Sets the length of the low pulse on the reset line.
    #[must_use]
    pub fn with_reset_pulse(mut self, pulse: Duration) -> Self {
        self.reset_pulse = pulse;
        self
    }

    /// Sets the time the module is given to boot after a reset.
    #[must_use]
    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }
}

/// Protocol engine for IoT Explorer modules.
///
/// Must be driven from a single control loop: device handlers only receive
/// the [`ReportQueue`] and can never call back into the engine.
#[derive(Debug)]
pub struct Explorer<P, D> {
    pub(crate) modem: Modem<P, D>,
    pub(crate) framer: InboundFramer,
    pub(crate) reports: ReportQueue,
    pub(crate) counter: SendCounter,
    pub(crate) state: ConnectionState,
    pub(crate) credentials: Option<Credentials>,
    pub(crate) config: Config,
}

impl<P: Read + Write, D: DelayNs> Explorer<P, D> {
    /// Constructs a new engine in the unconfigured state.
    pub fn new(port: P, delay: D, config: Config) -> Self {
        Self {
            modem: Modem::new(port, delay).with_poll_interval(config.poll_interval),
            framer: InboundFramer::new(config.rx_capacity),
            reports: ReportQueue::new(),
            counter: SendCounter::default(),
            state: ConnectionState::Unconfigured,
            credentials: None,
            config,
        }
    }

    /// Runs one iteration of the control loop.
    ///
    /// Reads whatever bytes are available without waiting, hands every complete
    /// control message to the device and then publishes pending reports if
    /// connected. Malformed messages are logged and skipped.
    ///
    /// # Errors
    ///
    /// - Errors of the underlying port.
    /// - The first failed report, see [`Explorer::drain_reports`].
    pub async fn poll(&mut self, dev: &mut impl Device) -> Result<(), P::Error> {
        let mut received = Vec::new();

        if self.modem.read_available(&mut received).await? > 0 {
            self.framer.extend(&received);
        }

        while let Some(res) = self.framer.next_frame() {
            match res {
                Ok(msg) => {
                    debug!("Dispatching to {}: {msg:?}", dev.kind());
                    dev.on_control_message(msg, &mut self.reports).await;
                }
                Err(err) => warn!("Dropped malformed push message: {err}"),
            }
        }

        if self.state == ConnectionState::Connected {
            self.drain_reports(&*dev).await?;
        }

        Ok(())
    }

    /// Queues property keys to be reported on the next drain.
    ///
    /// Plain keys are merged into one report, nested key lists
    /// are reported separately.
    pub fn notify_report<U: Into<ReportUnit>>(&mut self, units: impl IntoIterator<Item = U>) {
        self.reports.notify(units);
    }

    /// Queues a report of every property, split into two halves.
    pub fn notify_full_report(&mut self, props: &PropertyMap) {
        self.reports.notify_full_report(props);
    }

    /// Publishes all pending reports.
    ///
    /// Reports are only sent while connected; otherwise the queue is kept.
    /// Returns the number of reports sent.
    ///
    /// # Errors
    ///
    /// The first failed report aborts the drain. Neither it nor the
    /// remaining reports of this drain are sent again.
    pub async fn drain_reports(&mut self, dev: &impl Device) -> Result<usize, P::Error> {
        if self.state != ConnectionState::Connected {
            debug!("Holding {} report units until connected", self.reports.len());

            return Ok(0);
        }

        let creds = self.credentials.as_ref().ok_or(Error::InvalidArgument)?;
        let batches = self.reports.take(dev.properties());
        let mut sent = 0;

        for (idx, batch) in batches.iter().enumerate() {
            let envelope = ReportEnvelope::new(self.counter.next(), batch);
            let payload = match envelope.to_escaped() {
                Ok(payload) => payload,
                Err(err) => {
                    warn!("Skipped unserializable report: {err}");
                    continue;
                }
            };
            let cmd = PendingCommand::publish(&creds.product_id, &creds.device_name, &payload);

            if let Err(err) = self.modem.execute(&cmd).await {
                warn!(
                    "Report {} failed, dropping {} more: {err:?}",
                    envelope.client_token(),
                    batches.len() - idx - 1
                );

                return Err(err);
            }

            debug!("Sent report {}", envelope.client_token());
            sent += 1;
        }

        Ok(sent)
    }

    /// Returns the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the pending report units.
    pub fn reports(&self) -> &ReportQueue {
        &self.reports
    }

    /// Returns the pending report units for queueing reports
    /// outside of control message handlers.
    pub fn reports_mut(&mut self) -> &mut ReportQueue {
        &mut self.reports
    }

    /// Returns the sequence number of the next report.
    pub fn next_sequence(&self) -> u32 {
        self.counter.peek()
    }

    /// Returns the underlying command executor.
    ///
    /// Allows sending commands that have no dedicated flow.
    pub fn modem(&mut self) -> &mut Modem<P, D> {
        &mut self.modem
    }
}
