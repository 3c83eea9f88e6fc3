//! Device support for face-recognition door locks.
//!
//! The lock's relay is driven through an [`OutputPin`] (active low). Face
//! recognition itself runs outside of this crate: the application feeds each
//! result into [`DoorLock::on_detection`] and performs enrolments when
//! [`DoorLock::enrollment_requested`] says so.

use crate::{
    device::{Device, DeviceKind, Property, PropertyMap, Value, initial_properties},
    message::ControlMessage,
    report::ReportQueue,
};
use alloc::{
    boxed::Box,
    format,
    string::{String, ToString},
    vec::Vec,
};
use embedded_hal::digital::OutputPin;
use log::{debug, info, warn};

const PROP_DOOR: Property = Property {
    id: "door",
    name: "Door",
    unit: None,
};
const PROP_LAST_USER: Property = Property {
    id: "last_user",
    name: "Last User",
    unit: None,
};
const PROP_FEATURE: Property = Property {
    id: "feature",
    name: "Feature",
    unit: None,
};
const PROP_ADD_USER: Property = Property {
    id: "add_user",
    name: "Add User",
    unit: None,
};

/// Result of a face recognition pass.
#[derive(PartialEq, Clone, Debug)]
pub struct Detection {
    /// Best matching enrolled user.
    pub identity: String,
    /// Similarity score of the match.
    pub confidence: f32,
}

/// Door lock device implementation.
#[derive(Debug)]
pub struct DoorLock<O> {
    relay: O,
    props: PropertyMap,
    users: Vec<String>,
    enrollment: bool,
}

impl<O: OutputPin> DoorLock<O> {
    const PROPERTIES: &'static [Property] =
        &[PROP_DOOR, PROP_LAST_USER, PROP_FEATURE, PROP_ADD_USER];

    /// Constructs a door lock with the door closed.
    ///
    /// `users` are the identities enrolled so far, in enrolment order.
    ///
    /// # Errors
    ///
    /// Returns the pin's error if the relay could not be released.
    pub fn new(mut relay: O, users: Vec<String>) -> Result<Self, O::Error> {
        relay.set_high()?;

        Ok(Self {
            relay,
            props: initial_properties(
                Self::PROPERTIES,
                [Value::from(0), Value::from(""), Value::from(""), Value::from(0)],
            ),
            users,
            enrollment: false,
        })
    }

    /// Opens or closes the door.
    ///
    /// Returns whether the door state changed.
    ///
    /// # Errors
    ///
    /// Returns the pin's error if the relay could not be driven.
    pub fn set_door(&mut self, open: bool) -> Result<bool, O::Error> {
        if open {
            self.relay.set_low()?;
        } else {
            self.relay.set_high()?;
        }

        Ok(self.set(PROP_DOOR.id, u8::from(open)))
    }

    /// Returns whether the door is open.
    pub fn is_open(&self) -> bool {
        self.props.get(PROP_DOOR.id).is_some_and(Value::is_on)
    }

    /// Handles a face recognition result.
    ///
    /// A known identity with a confidence of at least `threshold` opens the
    /// door and becomes the last user. Non-finite scores are rejected.
    /// Returns whether access was granted.
    ///
    /// # Errors
    ///
    /// Returns the pin's error if the relay could not be driven.
    pub fn on_detection(
        &mut self,
        det: &Detection,
        threshold: f32,
        reports: &mut ReportQueue,
    ) -> Result<bool, O::Error> {
        if !det.confidence.is_finite()
            || det.confidence < threshold
            || !self.users.contains(&det.identity)
        {
            debug!("Rejected {} ({})", det.identity, det.confidence);

            return Ok(false);
        }

        info!("Admitted {} ({})", det.identity, det.confidence);

        self.set_door(true)?;
        self.set(PROP_LAST_USER.id, det.identity.as_str());
        reports.notify([PROP_DOOR.id, PROP_LAST_USER.id]);

        Ok(true)
    }

    /// Returns whether the cloud asked for a new user to be enrolled.
    pub fn enrollment_requested(&self) -> bool {
        self.enrollment
    }

    /// Completes a pending enrolment with the captured face feature.
    ///
    /// Returns the new user's identity, e.g. `No.3`.
    pub fn finish_enrollment(&mut self, feature: &str, reports: &mut ReportQueue) -> String {
        let user = format!("No.{}", self.users.len() + 1);

        info!("Enrolled {user}");

        self.users.push(user.clone());
        self.enrollment = false;
        self.set(PROP_FEATURE.id, feature);
        self.set(PROP_ADD_USER.id, 0);
        reports.notify([PROP_ADD_USER.id, PROP_FEATURE.id]);

        user
    }

    /// Abandons a pending enrolment, e.g. after a timeout.
    pub fn cancel_enrollment(&mut self, reports: &mut ReportQueue) {
        if self.enrollment {
            info!("Enrolment cancelled");

            self.enrollment = false;
            self.set(PROP_ADD_USER.id, 0);
            reports.notify([PROP_ADD_USER.id]);
        }
    }

    /// Returns the enrolled identities.
    pub fn users(&self) -> &[String] {
        &self.users
    }

    fn set(&mut self, key: &str, val: impl Into<Value>) -> bool {
        // Keys come from the descriptors above
        self.props.set(key, val).unwrap_or_default()
    }
}

#[async_trait::async_trait(?Send)]
impl<O: OutputPin> Device for DoorLock<O> {
    fn kind(&self) -> DeviceKind {
        DeviceKind::DoorLock
    }

    fn descriptors(&self) -> &'static [Property] {
        Self::PROPERTIES
    }

    fn properties(&self) -> &PropertyMap {
        &self.props
    }

    async fn on_control_message(&mut self, msg: ControlMessage, reports: &mut ReportQueue) {
        let params = match msg {
            ControlMessage::Control { params, .. } => params,
            ControlMessage::ReportReply {
                client_token,
                code,
                status,
            } => {
                debug!("Report {client_token} acknowledged with {code} ({status})");

                return;
            }
        };

        for (key, val) in &params {
            info!("Control {key}: {val}");

            match key.as_str() {
                "door" => {
                    if let Err(err) = self.set_door(val.is_on()) {
                        warn!("Failed to drive door relay: {err:?}");
                    }
                }
                "add_user" => {
                    self.enrollment = val.is_on();
                    self.set(PROP_ADD_USER.id, u8::from(self.enrollment));
                }
                _ => debug!("Ignored control of {key}"),
            }
        }

        reports.notify(params.keys().map(ToString::to_string));
    }
}
