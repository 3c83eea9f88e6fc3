//! AT commands understood by the co-processor.
//!
//! Every exchange is described by a [`PendingCommand`]: the command text, the
//! tokens that decide its outcome and the time the module is given to answer.

use alloc::{format, string::String};
use core::time::Duration;

/// Timeout for storing device or product credentials.
pub const CONFIGURE_TIMEOUT: Duration = Duration::from_secs(3);
/// Timeout for dynamic registration, which involves a round trip to the cloud.
pub const REGISTER_TIMEOUT: Duration = Duration::from_secs(15);
/// Timeout for connecting to the broker.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout for subscribing to the downlink topic.
pub const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout for publishing a property report.
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout for status queries (IP and MAC address).
pub const STATUS_TIMEOUT: Duration = Duration::from_secs(2);
/// Timeout for the bare `AT` probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
/// Timeout for restoring factory settings.
pub const RESTORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Broker connection parameters: TLS mode, command timeout (ms),
/// keep-alive (s), clean session, auto reconnect.
const CONNECT_PARAMS: &str = "1,5000,240,1,1";

/// Credential mode used for all configuration commands (key authentication).
const TLS_MODE: u8 = 1;

const OK: &[&str] = &["OK\r\n"];
const GENERIC_FAILURE: &[&str] = &["ERROR"];

/// AT command verb.
#[derive(strum::IntoStaticStr, PartialEq, Eq, Copy, Clone, Debug)]
pub enum Command {
    /// Liveness probe.
    #[strum(serialize = "AT")]
    Attention,
    /// Sets device identity and secret.
    #[strum(serialize = "AT+TCDEVINFOSET")]
    SetDeviceInfo,
    /// Sets product identity and secret for dynamic registration.
    #[strum(serialize = "AT+TCPRDINFOSET")]
    SetProductInfo,
    /// Registers the device with the cloud.
    #[strum(serialize = "AT+TCDEVREG")]
    Register,
    /// Connects to the broker.
    #[strum(serialize = "AT+TCMQTTCONN")]
    Connect,
    /// Subscribes to a topic.
    #[strum(serialize = "AT+TCMQTTSUB")]
    Subscribe,
    /// Publishes a message.
    #[strum(serialize = "AT+TCMQTTPUB")]
    Publish,
    /// Starts Wi-Fi smartconfig pairing.
    #[strum(serialize = "AT+TCSTARTSMART")]
    StartSmartConfig,
    /// Stops Wi-Fi smartconfig pairing.
    #[strum(serialize = "AT+TCSTOPSMART")]
    StopSmartConfig,
    /// Queries station IP and MAC address.
    #[strum(serialize = "AT+CIFSR")]
    QueryAddress,
    /// Restores factory settings.
    #[strum(serialize = "AT+RESTORE")]
    Restore,
}

impl Command {
    /// Returns the command verb as sent on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// A command waiting to be executed.
///
/// Created at call time and consumed by [`Modem::execute`](crate::Modem::execute).
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct PendingCommand {
    /// Full command text, without line terminator.
    pub text: String,
    /// Success tokens, in priority order.
    pub success: &'static [&'static str],
    /// Failure tokens, in priority order.
    pub failure: &'static [&'static str],
    /// Time the module is given to answer.
    pub timeout: Duration,
}

impl PendingCommand {
    fn new(
        text: String,
        success: &'static [&'static str],
        failure: &'static [&'static str],
        timeout: Duration,
    ) -> Self {
        Self {
            text,
            success,
            failure,
            timeout,
        }
    }

    /// Bare `AT` probe.
    #[must_use]
    pub fn probe() -> Self {
        Self::new(
            Command::Attention.as_str().into(),
            OK,
            GENERIC_FAILURE,
            PROBE_TIMEOUT,
        )
    }

    /// Stores device identity and secret.
    #[must_use]
    pub fn set_device_info(product_id: &str, device_name: &str, device_secret: &str) -> Self {
        Self::new(
            format!(
                r#"{}={TLS_MODE},"{product_id}","{device_name}","{device_secret}""#,
                Command::SetDeviceInfo.as_str()
            ),
            &["+TCDEVINFOSET:OK"],
            &["+TCDEVINFOSET:FAIL", "ERROR"],
            CONFIGURE_TIMEOUT,
        )
    }

    /// Stores product identity and secret for dynamic registration.
    #[must_use]
    pub fn set_product_info(product_id: &str, product_secret: &str, device_name: &str) -> Self {
        Self::new(
            format!(
                r#"{}={TLS_MODE},"{product_id}","{product_secret}","{device_name}""#,
                Command::SetProductInfo.as_str()
            ),
            &["+TCPRDINFOSET:OK"],
            &["+TCPRDINFOSET:FAIL", "ERROR"],
            CONFIGURE_TIMEOUT,
        )
    }

    /// Registers the device.
    ///
    /// Error code 1021 means the device is already registered and is accepted as success.
    #[must_use]
    pub fn register() -> Self {
        Self::new(
            Command::Register.as_str().into(),
            &["+TCDEVREG:OK", "+TCDEVREG:FAIL,1021"],
            &["+TCDEVREG:FAIL", "ERROR"],
            REGISTER_TIMEOUT,
        )
    }

    /// Connects to the broker.
    #[must_use]
    pub fn connect() -> Self {
        Self::new(
            format!("{}={CONNECT_PARAMS}", Command::Connect.as_str()),
            &["+TCMQTTCONN:OK"],
            &["+TCMQTTCONN:FAIL", "ERROR"],
            CONNECT_TIMEOUT,
        )
    }

    /// Subscribes to the per-device downlink topic.
    #[must_use]
    pub fn subscribe(product_id: &str, device_name: &str) -> Self {
        Self::new(
            format!(
                r#"{}="{}",0"#,
                Command::Subscribe.as_str(),
                downlink_topic(product_id, device_name)
            ),
            &["+TCMQTTSUB:OK"],
            &["+TCMQTTSUB:FAIL", "ERROR"],
            SUBSCRIBE_TIMEOUT,
        )
    }

    /// Publishes an already escaped payload to the per-device uplink topic.
    #[must_use]
    pub fn publish(product_id: &str, device_name: &str, escaped_payload: &str) -> Self {
        Self::new(
            format!(
                r#"{}="{}",1,"{escaped_payload}""#,
                Command::Publish.as_str(),
                uplink_topic(product_id, device_name)
            ),
            &["+TCMQTTPUB:OK"],
            &["+TCMQTTPUB:FAIL", "ERROR"],
            PUBLISH_TIMEOUT,
        )
    }

    /// Starts smartconfig pairing.
    ///
    /// The module only answers once the phone-side pairing succeeded,
    /// so the timeout is chosen by the caller.
    #[must_use]
    pub fn start_smart_config(timeout: Duration) -> Self {
        Self::new(
            Command::StartSmartConfig.as_str().into(),
            &["+TCSTARTSMART:WIFI_CONNECT_SUCCESS"],
            &[],
            timeout,
        )
    }

    /// Stops smartconfig pairing.
    #[must_use]
    pub fn stop_smart_config() -> Self {
        Self::new(
            Command::StopSmartConfig.as_str().into(),
            OK,
            GENERIC_FAILURE,
            CONFIGURE_TIMEOUT,
        )
    }

    /// Queries station IP and MAC address.
    #[must_use]
    pub fn query_address() -> Self {
        Self::new(
            Command::QueryAddress.as_str().into(),
            OK,
            GENERIC_FAILURE,
            STATUS_TIMEOUT,
        )
    }

    /// Restores factory settings. The module reboots afterwards.
    #[must_use]
    pub fn restore() -> Self {
        Self::new(
            Command::Restore.as_str().into(),
            OK,
            GENERIC_FAILURE,
            RESTORE_TIMEOUT,
        )
    }

    /// Sends arbitrary command text.
    ///
    /// Tokens must be `'static`, which makes this mostly useful for tools
    /// working with a fixed set of answers.
    #[must_use]
    pub fn raw(
        text: String,
        success: &'static [&'static str],
        failure: &'static [&'static str],
        timeout: Duration,
    ) -> Self {
        Self::new(text, success, failure, timeout)
    }
}

/// Topic the device receives control messages on.
#[must_use]
pub fn downlink_topic(product_id: &str, device_name: &str) -> String {
    format!("$thing/down/property/{product_id}/{device_name}")
}

/// Topic the device publishes property reports to.
#[must_use]
pub fn uplink_topic(product_id: &str, device_name: &str) -> String {
    format!("$thing/up/property/{product_id}/{device_name}")
}
