//! Device support for air-quality monitors.
//!
//! Readings of the particulate matter and formaldehyde sensors are pushed in
//! by the application. Only values that actually changed are queued for
//! reporting. The monitor's lamp is driven through an [`OutputPin`] (active low)
//! and can be switched from the cloud.

use crate::{
    device::{Device, DeviceKind, Property, PropertyMap, Value, initial_properties},
    message::ControlMessage,
    report::ReportQueue,
};
use alloc::{boxed::Box, string::ToString, vec::Vec};
use embedded_hal::digital::OutputPin;
use log::{debug, info, warn};

const PROP_PM1_0: Property = Property {
    id: "pm1_0",
    name: "PM1.0",
    unit: Some("µg/m³"),
};
const PROP_PM2_5: Property = Property {
    id: "pm2_5",
    name: "PM2.5",
    unit: Some("µg/m³"),
};
const PROP_PM10: Property = Property {
    id: "pm10",
    name: "PM10",
    unit: Some("µg/m³"),
};
const PROP_CH2O: Property = Property {
    id: "ch2o",
    name: "Formaldehyde",
    unit: Some("µg/m³"),
};
const PROP_LIGHT: Property = Property {
    id: "light",
    name: "Light",
    unit: None,
};

/// Particulate matter concentrations, in µg/m³.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Default)]
pub struct Particulates {
    /// Particles up to 1.0 µm.
    pub pm1_0: u16,
    /// Particles up to 2.5 µm.
    pub pm2_5: u16,
    /// Particles up to 10 µm.
    pub pm10: u16,
}

/// Air-quality monitor device implementation.
#[derive(Debug)]
pub struct AirMonitor<O> {
    lamp: O,
    props: PropertyMap,
}

impl<O: OutputPin> AirMonitor<O> {
    const PROPERTIES: &'static [Property] =
        &[PROP_PM1_0, PROP_PM2_5, PROP_PM10, PROP_CH2O, PROP_LIGHT];

    /// Constructs a monitor with the lamp switched off and all readings at zero.
    ///
    /// # Errors
    ///
    /// Returns the pin's error if the lamp could not be switched off.
    pub fn new(mut lamp: O) -> Result<Self, O::Error> {
        lamp.set_high()?;

        Ok(Self {
            lamp,
            props: initial_properties(Self::PROPERTIES, [0u16; 5].map(Value::from)),
        })
    }

    /// Stores a particulate matter reading.
    ///
    /// Returns the number of changed values, which are queued for reporting.
    pub fn update_particulates(&mut self, reading: Particulates, reports: &mut ReportQueue) -> usize {
        let changed: Vec<&str> = [
            (PROP_PM1_0.id, reading.pm1_0),
            (PROP_PM2_5.id, reading.pm2_5),
            (PROP_PM10.id, reading.pm10),
        ]
        .into_iter()
        .filter(|&(key, val)| self.set(key, val))
        .map(|(key, _)| key)
        .collect();

        reports.notify(changed.iter().copied());

        changed.len()
    }

    /// Stores a formaldehyde reading in µg/m³.
    ///
    /// Returns whether the value changed, in which case it is queued for reporting.
    pub fn update_formaldehyde(&mut self, ug_m3: u16, reports: &mut ReportQueue) -> bool {
        let changed = self.set(PROP_CH2O.id, ug_m3);

        if changed {
            reports.notify([PROP_CH2O.id]);
        }

        changed
    }

    /// Switches the lamp on or off.
    ///
    /// Returns whether the lamp state changed.
    ///
    /// # Errors
    ///
    /// Returns the pin's error if the lamp could not be driven.
    pub fn set_light(&mut self, on: bool) -> Result<bool, O::Error> {
        if on {
            self.lamp.set_low()?;
        } else {
            self.lamp.set_high()?;
        }

        Ok(self.set(PROP_LIGHT.id, u8::from(on)))
    }

    /// Returns whether the lamp is on.
    pub fn is_light_on(&self) -> bool {
        self.props.get(PROP_LIGHT.id).is_some_and(Value::is_on)
    }

    fn set(&mut self, key: &str, val: impl Into<Value>) -> bool {
        // Keys come from the descriptors above
        self.props.set(key, val).unwrap_or_default()
    }
}

#[async_trait::async_trait(?Send)]
impl<O: OutputPin> Device for AirMonitor<O> {
    fn kind(&self) -> DeviceKind {
        DeviceKind::AirMonitor
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

            if key == PROP_LIGHT.id {
                if let Err(err) = self.set_light(val.is_on()) {
                    warn!("Failed to switch lamp: {err:?}");
                }
            } else {
                debug!("Ignored control of {key}");
            }
        }

        reports.notify(params.keys().map(ToString::to_string));
    }
}
