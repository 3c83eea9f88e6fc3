//! Provisioning flows.
//!
//! Bringing a device online takes up to three steps, each of them a short
//! sequence of commands:
//!
//! 1. [`Explorer::configure`] stores the cloud credentials on the module,
//!    registering the device first if a product secret is supplied.
//! 2. [`Explorer::connect`] connects to the broker and subscribes to the
//!    device's downlink topic.
//! 3. If the module has no Wi-Fi network yet, [`Explorer::smart_config`]
//!    waits for the user to pair it from a phone.
//!
//! No flow retries on its own. A failed step leaves the engine disconnected
//! and the control loop decides when to try again, typically through
//! [`Explorer::try_connect`].

use crate::{
    Error, Explorer, Result,
    command::PendingCommand,
    device::Device,
    frame::InboundFramer,
    matcher::find,
};
use alloc::{
    string::{String, ToString},
    vec::Vec,
};
use core::time::Duration;
use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_io_async::{Read, Write};
use log::{debug, info};

/// Banner printed by the module once it has booted.
pub const BOOT_BANNER: &str = "ready\r\n";

/// Connection state of the engine.
#[derive(strum::Display, PartialEq, Eq, Copy, Clone, Debug)]
#[strum(serialize_all = "title_case")]
pub enum ConnectionState {
    /// No credentials have been stored on the module.
    Unconfigured,
    /// Credentials are stored, but no broker connection exists.
    Configured,
    /// Connected to the broker and subscribed to the downlink topic.
    Connected,
}

/// Cloud identity of a device.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Credentials {
    /// Product identifier.
    pub product_id: String,
    /// Device name, unique within the product.
    pub device_name: String,
    /// Device secret, used unless the device registers itself.
    pub device_secret: String,
    /// Product secret, enabling dynamic registration.
    pub product_secret: Option<String>,
}

impl Credentials {
    /// Constructs credentials for a pre-registered device.
    pub fn new(
        product_id: impl Into<String>,
        device_name: impl Into<String>,
        device_secret: impl Into<String>,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            device_name: device_name.into(),
            device_secret: device_secret.into(),
            product_secret: None,
        }
    }

    /// Enables dynamic registration with the given product secret.
    #[must_use]
    pub fn with_product_secret(mut self, secret: impl Into<String>) -> Self {
        self.product_secret = Some(secret.into());
        self
    }
}

/// Derives a device name from a MAC address, e.g. `a4_cf_12_00_3b_7e`.
#[must_use]
pub fn device_name_from_mac(mac: &str) -> String {
    mac.replace(':', "_")
}

/// Extracts the quoted value following `field` in a status answer.
///
/// Answers look like `+CIFSR:STAIP,"192.168.1.5"`. A missing field or
/// an all-zero address yields an empty string.
#[must_use]
pub fn parse_address(ack: &str, field: &str) -> String {
    let mut prefix = Vec::with_capacity(field.len() + 2);

    prefix.extend_from_slice(field.as_bytes());
    prefix.extend_from_slice(b",\"");

    let Some(start) = find(ack.as_bytes(), &prefix).map(|pos| pos + prefix.len()) else {
        return String::new();
    };
    let value = ack[start..].split('"').next().unwrap_or_default();

    if value.chars().all(|c| matches!(c, '0' | '.' | ':')) {
        String::new()
    } else {
        value.to_string()
    }
}

impl<P: Read + Write, D: DelayNs> Explorer<P, D> {
    /// Stores the credentials on the module.
    ///
    /// With a product secret, the device is registered dynamically.
    /// A device that is already registered is accepted.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if the product ID or device name is empty.
    /// - Any error of the executed commands.
    pub async fn configure(&mut self, creds: Credentials) -> Result<(), P::Error> {
        if creds.product_id.is_empty() || creds.device_name.is_empty() {
            return Err(Error::InvalidArgument);
        }

        match &creds.product_secret {
            None => {
                self.modem
                    .execute(&PendingCommand::set_device_info(
                        &creds.product_id,
                        &creds.device_name,
                        &creds.device_secret,
                    ))
                    .await?;
            }
            Some(secret) => {
                self.modem
                    .execute(&PendingCommand::set_product_info(
                        &creds.product_id,
                        secret,
                        &creds.device_name,
                    ))
                    .await?;
                self.modem.execute(&PendingCommand::register()).await?;
            }
        }

        info!("Configured as {}/{}", creds.product_id, creds.device_name);

        self.credentials = Some(creds);
        self.state = ConnectionState::Configured;

        Ok(())
    }

    /// Connects to the broker and subscribes to the downlink topic.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if the engine has not been configured.
    /// - Any error of the executed commands, leaving the engine disconnected.
    pub async fn connect(&mut self) -> Result<(), P::Error> {
        if self.state == ConnectionState::Unconfigured {
            return Err(Error::InvalidArgument);
        }

        let creds = self.credentials.as_ref().ok_or(Error::InvalidArgument)?;

        self.state = ConnectionState::Configured;
        self.modem.execute(&PendingCommand::connect()).await?;
        self.modem
            .execute(&PendingCommand::subscribe(
                &creds.product_id,
                &creds.device_name,
            ))
            .await?;

        info!("Connected as {}/{}", creds.product_id, creds.device_name);

        self.state = ConnectionState::Connected;

        Ok(())
    }

    /// Starts smartconfig pairing and waits for the module to join a network.
    ///
    /// Uses the configured pairing timeout if none is given. The connection
    /// state is left unchanged, whatever the outcome.
    ///
    /// # Errors
    ///
    /// - [`Error::CommandTimeout`] if pairing did not succeed in time.
    pub async fn smart_config(&mut self, timeout: Option<Duration>) -> Result<(), P::Error> {
        let timeout = timeout.unwrap_or(self.config.smart_config_timeout);

        info!("Waiting up to {timeout:?} for smartconfig pairing");

        self.modem
            .execute(&PendingCommand::start_smart_config(timeout))
            .await?;

        info!("Smartconfig pairing succeeded");

        Ok(())
    }

    /// Stops smartconfig pairing.
    ///
    /// # Errors
    ///
    /// Any error of the executed command.
    pub async fn stop_smart_config(&mut self) -> Result<(), P::Error> {
        self.modem
            .execute(&PendingCommand::stop_smart_config())
            .await?;

        Ok(())
    }

    /// Hard-resets the module through its reset line.
    ///
    /// The line is pulsed low, then the module's boot banner is awaited.
    /// Boot messages following the banner are discarded, as is every
    /// partially received push message.
    ///
    /// # Errors
    ///
    /// - [`Error::ResetLine`] if the line could not be driven.
    /// - [`Error::ResetTimeout`] if the module did not boot in time.
    pub async fn reset_module<O: OutputPin>(&mut self, pin: &mut O) -> Result<(), P::Error> {
        pin.set_low().map_err(|_| Error::ResetLine)?;
        self.modem.sleep(self.config.reset_pulse).await;
        pin.set_high().map_err(|_| Error::ResetLine)?;

        if self.state == ConnectionState::Connected {
            self.state = ConnectionState::Configured;
        }

        if !self
            .modem
            .wait_for(BOOT_BANNER, self.config.reset_timeout)
            .await?
        {
            return Err(Error::ResetTimeout);
        }

        self.modem.drain().await?;
        self.framer = InboundFramer::new(self.config.rx_capacity);

        info!("Module reset");

        Ok(())
    }

    /// Returns the station IP address, or an empty string if there is none.
    ///
    /// # Errors
    ///
    /// Any error of the executed command.
    pub async fn get_ip(&mut self) -> Result<String, P::Error> {
        let ack = self.modem.execute(&PendingCommand::query_address()).await?;

        Ok(parse_address(&ack, "STAIP"))
    }

    /// Returns the station MAC address, or an empty string if there is none.
    ///
    /// # Errors
    ///
    /// Any error of the executed command.
    pub async fn get_mac(&mut self) -> Result<String, P::Error> {
        let ack = self.modem.execute(&PendingCommand::query_address()).await?;

        Ok(parse_address(&ack, "STAMAC"))
    }

    /// Checks whether the module responds to commands.
    ///
    /// # Errors
    ///
    /// Any error of the executed command.
    pub async fn probe(&mut self) -> Result<(), P::Error> {
        self.modem.execute(&PendingCommand::probe()).await?;

        Ok(())
    }

    /// Restores the module's factory settings, erasing its stored
    /// credentials and Wi-Fi network.
    ///
    /// # Errors
    ///
    /// Any error of the executed command.
    pub async fn restore_factory_settings(&mut self) -> Result<(), P::Error> {
        self.modem.execute(&PendingCommand::restore()).await?;
        self.state = ConnectionState::Unconfigured;

        info!("Factory settings restored");

        Ok(())
    }

    /// Stores credentials to be used by [`Explorer::try_connect`].
    ///
    /// An empty device name is derived from the module's MAC address.
    pub fn set_credentials(&mut self, creds: Credentials) {
        self.credentials = Some(creds);
    }

    /// Returns the stored credentials.
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Brings the connection up if the module has joined a network.
    ///
    /// Returns `false` if the module has no IP address yet, in which case
    /// pairing is required. Otherwise, the stored credentials are configured,
    /// the broker is connected and all properties are queued for reporting.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if no credentials are stored, or no device
    ///   name could be derived.
    /// - Any error of the provisioning flows.
    pub async fn try_connect(&mut self, dev: &impl Device) -> Result<bool, P::Error> {
        let ip = self.get_ip().await?;

        if ip.is_empty() {
            debug!("No IP address yet");

            return Ok(false);
        }

        let mut creds = self.credentials.clone().ok_or(Error::InvalidArgument)?;

        if creds.device_name.is_empty() {
            let mac = self.get_mac().await?;

            if mac.is_empty() {
                return Err(Error::InvalidArgument);
            }

            creds.device_name = device_name_from_mac(&mac);
        }

        info!("Got IP address {ip}");

        self.configure(creds).await?;
        self.connect().await?;
        self.reports.notify_full_report(dev.properties());

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Config,
        testing::{BrokenPin, NoDelay, RecordingPin, ScriptedLink, TestDevice, init_logger},
    };
    use core::convert::Infallible;

    const ADDRESSES: &[u8] = b"AT+CIFSR\r\n+CIFSR:STAIP,\"192.168.1.5\"\r\n+CIFSR:STAMAC,\"a4:cf:12:00:3b:7e\"\r\n\r\nOK\r\n";
    const NO_ADDRESSES: &[u8] = b"+CIFSR:STAIP,\"0.0.0.0\"\r\n+CIFSR:STAMAC,\"a4:cf:12:00:3b:7e\"\r\nOK\r\n";

    fn credentials() -> Credentials {
        Credentials::new("K55ED9N9JG", "door_01", "c2VjcmV0")
    }

    #[test]
    fn parse_ip() {
        assert_eq!(
            parse_address(r#"+CIFSR:STAIP,"192.168.1.5""#, "STAIP"),
            "192.168.1.5",
            "address should be extracted"
        );
        assert_eq!(
            parse_address(r#"+CIFSR:STAIP,"0.0.0.0""#, "STAIP"),
            "",
            "zero address should be empty"
        );
        assert_eq!(
            parse_address(r#"+CIFSR:STAMAC,"00:00:00:00:00:00""#, "STAMAC"),
            "",
            "zero MAC address should be empty"
        );
        assert_eq!(parse_address("OK\r\n", "STAIP"), "", "missing field should be empty");
    }

    #[test]
    fn mac_device_name() {
        assert_eq!(
            device_name_from_mac("a4:cf:12:00:3b:7e"),
            "a4_cf_12_00_3b_7e",
            "device name should be correct"
        );
    }

    #[tokio::test]
    async fn configure_direct() -> Result<(), Infallible> {
        init_logger();

        let mut link = ScriptedLink::new();

        link.reply(&[b"OK\r\n", b"+TCDEVINFOSET:OK\r\n"]);

        let mut explorer = Explorer::new(&mut link, NoDelay, Config::default());

        explorer.configure(credentials()).await?;

        assert_eq!(
            explorer.state(),
            ConnectionState::Configured,
            "state should be configured"
        );
        assert_eq!(
            link.written_lines(),
            [r#"AT+TCDEVINFOSET=1,"K55ED9N9JG","door_01","c2VjcmV0""#],
            "credentials should be written"
        );

        Ok(())
    }

    #[tokio::test]
    async fn register_already_registered() -> Result<(), Infallible> {
        init_logger();

        let mut link = ScriptedLink::new();

        link.reply(&[b"+TCPRDINFOSET:OK\r\n"]);
        link.reply(&[b"OK\r\n", b"+TCDEVREG:FAIL,1021\r\n"]);

        let mut explorer = Explorer::new(&mut link, NoDelay, Config::default());

        explorer
            .configure(credentials().with_product_secret("cHJvZHVjdA=="))
            .await?;

        assert_eq!(
            explorer.state(),
            ConnectionState::Configured,
            "state should be configured"
        );
        assert_eq!(
            link.written_lines(),
            [
                r#"AT+TCPRDINFOSET=1,"K55ED9N9JG","cHJvZHVjdA==","door_01""#,
                "AT+TCDEVREG"
            ],
            "registration should follow product credentials"
        );

        Ok(())
    }

    #[tokio::test]
    async fn register_rejected() {
        init_logger();

        let mut link = ScriptedLink::new();

        link.reply(&[b"+TCPRDINFOSET:OK\r\n"]);
        link.reply(&[b"+TCDEVREG:FAIL,1003\r\n"]);

        let mut explorer = Explorer::new(&mut link, NoDelay, Config::default());
        let res = explorer
            .configure(credentials().with_product_secret("cHJvZHVjdA=="))
            .await;

        assert!(
            matches!(res, Err(Error::CommandRejected { .. })),
            "result should be command rejected error"
        );
        assert_eq!(
            explorer.state(),
            ConnectionState::Unconfigured,
            "state should be unchanged"
        );
        assert!(explorer.credentials().is_none(), "credentials should not be stored");
    }

    #[tokio::test]
    async fn configure_requires_device_name() {
        init_logger();

        let mut link = ScriptedLink::new();
        let mut explorer = Explorer::new(&mut link, NoDelay, Config::default());
        let res = explorer
            .configure(Credentials::new("K55ED9N9JG", "", "c2VjcmV0"))
            .await;

        assert_eq!(
            res,
            Err(Error::InvalidArgument),
            "result should be invalid argument error"
        );
    }

    #[tokio::test]
    async fn connect_and_subscribe() -> Result<(), Infallible> {
        init_logger();

        let mut link = ScriptedLink::new();

        link.reply(&[b"+TCDEVINFOSET:OK\r\n"]);
        link.reply(&[b"OK\r\n", b"+TCMQTTCONN:OK\r\n"]);
        link.reply(&[b"OK\r\n+TCMQTTSUB:OK\r\n"]);

        let mut explorer = Explorer::new(&mut link, NoDelay, Config::default());

        explorer.configure(credentials()).await?;
        explorer.connect().await?;

        assert_eq!(
            explorer.state(),
            ConnectionState::Connected,
            "state should be connected"
        );
        assert_eq!(
            link.written_lines()[1..],
            [
                "AT+TCMQTTCONN=1,5000,240,1,1",
                r#"AT+TCMQTTSUB="$thing/down/property/K55ED9N9JG/door_01",0"#
            ],
            "connect and subscribe should be written"
        );

        Ok(())
    }

    #[tokio::test]
    async fn failed_subscribe_leaves_disconnected() -> Result<(), Infallible> {
        init_logger();

        let mut link = ScriptedLink::new();

        link.reply(&[b"+TCDEVINFOSET:OK\r\n"]);
        link.reply(&[b"+TCMQTTCONN:OK\r\n"]);
        link.reply(&[b"+TCMQTTSUB:FAIL\r\n"]);

        let mut explorer = Explorer::new(&mut link, NoDelay, Config::default());

        explorer.configure(credentials()).await?;

        assert!(
            matches!(
                explorer.connect().await,
                Err(Error::CommandRejected { .. })
            ),
            "result should be command rejected error"
        );
        assert_eq!(
            explorer.state(),
            ConnectionState::Configured,
            "state should be configured"
        );

        Ok(())
    }

    #[tokio::test]
    async fn connect_requires_configuration() {
        init_logger();

        let mut link = ScriptedLink::new();
        let mut explorer = Explorer::new(&mut link, NoDelay, Config::default());

        assert_eq!(
            explorer.connect().await,
            Err(Error::InvalidArgument),
            "result should be invalid argument error"
        );
        assert!(link.written_lines().is_empty(), "nothing should be sent");
    }

    #[tokio::test]
    async fn smart_config_timeout_keeps_state() -> Result<(), Infallible> {
        init_logger();

        let mut link = ScriptedLink::new();

        link.reply(&[b"+TCDEVINFOSET:OK\r\n"]);
        link.reply(&[b"+TCMQTTCONN:OK\r\n"]);
        link.reply(&[b"+TCMQTTSUB:OK\r\n"]);
        link.reply(&[b"OK\r\n", b"+TCSTARTSMART:FAIL\r\n"]);

        let mut explorer = Explorer::new(&mut link, NoDelay, Config::default());

        explorer.configure(credentials()).await?;
        explorer.connect().await?;

        let res = explorer.smart_config(Some(Duration::from_secs(1))).await;

        assert!(
            matches!(res, Err(Error::CommandTimeout { ref command, .. }) if command == "AT+TCSTARTSMART"),
            "result should be command timeout error"
        );
        assert_eq!(
            explorer.state(),
            ConnectionState::Connected,
            "state should be unchanged"
        );

        Ok(())
    }

    #[tokio::test]
    async fn smart_config_success() -> Result<(), Infallible> {
        init_logger();

        let mut link = ScriptedLink::new();

        link.reply(&[
            b"OK\r\n",
            b"+TCSTARTSMART:WIFI_CONNECT_SUCCESS\r\n",
        ]);

        let mut explorer = Explorer::new(&mut link, NoDelay, Config::default());

        explorer.smart_config(None).await?;

        assert_eq!(
            explorer.state(),
            ConnectionState::Unconfigured,
            "state should be unchanged"
        );

        Ok(())
    }

    #[tokio::test]
    async fn reset_waits_for_banner() -> Result<(), Infallible> {
        init_logger();

        let mut link = ScriptedLink::new();
        let mut pin = RecordingPin::default();

        link.push(b"\x00\xfe rst cause:2\r\n");
        link.push(b"ready\r\n");
        link.push(b"WIFI DISCONNECT\r\n");

        let mut explorer = Explorer::new(&mut link, NoDelay, Config::default());

        explorer.reset_module(&mut pin).await?;

        assert_eq!(pin.levels, [false, true], "reset line should be pulsed low");
        assert!(link.is_exhausted(), "boot messages should be discarded");

        Ok(())
    }

    #[tokio::test]
    async fn reset_timeout() {
        init_logger();

        let mut link = ScriptedLink::new();
        let mut pin = RecordingPin::default();

        link.push(b"\x00\xfe rst cause:2\r\n");

        let mut explorer = Explorer::new(&mut link, NoDelay, Config::default());

        assert_eq!(
            explorer.reset_module(&mut pin).await,
            Err(Error::ResetTimeout),
            "result should be reset timeout error"
        );
        assert_eq!(pin.levels, [false, true], "reset line should be released");
    }

    #[tokio::test]
    async fn reset_line_failure() {
        init_logger();

        let mut link = ScriptedLink::new();
        let mut explorer = Explorer::new(&mut link, NoDelay, Config::default());

        assert_eq!(
            explorer.reset_module(&mut BrokenPin).await,
            Err(Error::ResetLine),
            "result should be reset line error"
        );
    }

    #[tokio::test]
    async fn addresses() -> Result<(), Infallible> {
        init_logger();

        let mut link = ScriptedLink::new();

        link.reply(&[ADDRESSES]);
        link.reply(&[ADDRESSES]);
        link.reply(&[NO_ADDRESSES]);

        let mut explorer = Explorer::new(&mut link, NoDelay, Config::default());

        assert_eq!(explorer.get_ip().await?, "192.168.1.5", "IP should be correct");
        assert_eq!(
            explorer.get_mac().await?,
            "a4:cf:12:00:3b:7e",
            "MAC should be correct"
        );
        assert_eq!(explorer.get_ip().await?, "", "zero IP should be empty");

        Ok(())
    }

    #[tokio::test]
    async fn probe_and_restore() -> Result<(), Infallible> {
        init_logger();

        let mut link = ScriptedLink::new();

        link.reply(&[b"AT\r\n\r\nOK\r\n"]);
        link.reply(&[b"+TCDEVINFOSET:OK\r\n"]);
        link.reply(&[b"AT+RESTORE\r\n\r\nOK\r\n"]);

        let mut explorer = Explorer::new(&mut link, NoDelay, Config::default());

        explorer.probe().await?;
        explorer.configure(credentials()).await?;
        explorer.restore_factory_settings().await?;

        assert_eq!(
            explorer.state(),
            ConnectionState::Unconfigured,
            "state should be reset"
        );

        Ok(())
    }

    #[tokio::test]
    async fn try_connect_without_network() -> Result<(), Infallible> {
        init_logger();

        let mut link = ScriptedLink::new();
        let dev = TestDevice::new();

        link.reply(&[NO_ADDRESSES]);

        let mut explorer = Explorer::new(&mut link, NoDelay, Config::default());

        explorer.set_credentials(credentials());

        assert!(!explorer.try_connect(&dev).await?, "pairing should be required");
        assert_eq!(
            explorer.state(),
            ConnectionState::Unconfigured,
            "state should be unchanged"
        );
        assert_eq!(link.written_lines(), ["AT+CIFSR"], "only status should be queried");

        Ok(())
    }

    #[tokio::test]
    async fn try_connect_derives_device_name() -> Result<(), Infallible> {
        init_logger();

        let mut link = ScriptedLink::new();
        let dev = TestDevice::new();

        link.reply(&[ADDRESSES]);
        link.reply(&[ADDRESSES]);
        link.reply(&[b"+TCDEVINFOSET:OK\r\n"]);
        link.reply(&[b"+TCMQTTCONN:OK\r\n"]);
        link.reply(&[b"+TCMQTTSUB:OK\r\n"]);

        let mut explorer = Explorer::new(&mut link, NoDelay, Config::default());

        explorer.set_credentials(Credentials::new("K55ED9N9JG", "", "c2VjcmV0"));

        assert!(explorer.try_connect(&dev).await?, "connection should be up");
        assert_eq!(
            explorer.state(),
            ConnectionState::Connected,
            "state should be connected"
        );
        assert_eq!(
            explorer.credentials().map(|creds| creds.device_name.as_str()),
            Some("a4_cf_12_00_3b_7e"),
            "device name should be derived from MAC"
        );
        assert_eq!(
            explorer.reports().len(),
            2,
            "full report should be queued in two halves"
        );
        assert_eq!(
            link.written_lines()[2],
            r#"AT+TCDEVINFOSET=1,"K55ED9N9JG","a4_cf_12_00_3b_7e","c2VjcmV0""#,
            "derived device name should be configured"
        );

        Ok(())
    }

    #[tokio::test]
    async fn try_connect_requires_credentials() {
        init_logger();

        let mut link = ScriptedLink::new();
        let dev = TestDevice::new();

        link.reply(&[ADDRESSES]);

        let mut explorer = Explorer::new(&mut link, NoDelay, Config::default());

        assert_eq!(
            explorer.try_connect(&dev).await,
            Err(Error::InvalidArgument),
            "result should be invalid argument error"
        );
    }
}
