//! Converters writing to and reading from the simulated radio.
//!
//! A set stores the normalised value on every addressed endpoint and
//! returns the state to publish. A get makes the device report its stored
//! value through the network event channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use meshbridge_app::ports::{ConvertContext, Converter, Operation, SetOutcome, Target};
use meshbridge_domain::endpoint::{ENDPOINT_SCOPED_KEYS, with_endpoint_suffix};
use meshbridge_domain::error::ConverterError;
use meshbridge_domain::id::DeviceId;
use meshbridge_domain::state::StateMap;

use crate::network::VirtualNetwork;

const MAX_BRIGHTNESS: u64 = 254;
const MIN_MIREDS: u64 = 153;
const MAX_MIREDS: u64 = 500;

fn invalid(key: &str, value: &Value) -> ConverterError {
    ConverterError::Failed(format!("invalid value {value} for '{key}'"))
}

fn endpoints(network: &VirtualNetwork, target: &Target) -> Vec<(DeviceId, u8)> {
    match target {
        Target::Endpoint { device, endpoint } => vec![(device.clone(), *endpoint)],
        Target::Group(id) => network.group_members(*id),
    }
}

fn write_all(network: &VirtualNetwork, target: &Target, values: &StateMap) {
    for (device, endpoint) in endpoints(network, target) {
        for (key, value) in values {
            network.write(&device, endpoint, key, value.clone());
        }
    }
}

/// Make the addressed device report `keys`, suffixed for named endpoints.
fn report(
    network: &VirtualNetwork,
    target: &Target,
    keys: &[&str],
    ctx: &ConvertContext,
) -> Result<(), ConverterError> {
    let Target::Endpoint { device, endpoint } = target else {
        return Err(ConverterError::Failed("groups cannot be read".to_string()));
    };
    let mut payload = Map::new();
    for key in keys {
        let Some(value) = network.read(device, *endpoint, key) else {
            continue;
        };
        let key = match ctx.endpoint_name.as_deref() {
            Some(name) if ENDPOINT_SCOPED_KEYS.contains(key) => with_endpoint_suffix(key, name),
            _ => (*key).to_string(),
        };
        payload.insert(key, value);
    }
    if !payload.is_empty() {
        network.report(device, payload);
    }
    Ok(())
}

fn on_off(on: bool) -> Value {
    Value::from(if on { "ON" } else { "OFF" })
}

/// `state`, `brightness` and `brightness_percent` on a dimmable light or a
/// relay.
pub struct OnOffConverter {
    network: Arc<VirtualNetwork>,
    dimmable: bool,
    read_after_write: Option<Duration>,
}

impl OnOffConverter {
    #[must_use]
    pub fn new(network: Arc<VirtualNetwork>, dimmable: bool) -> Self {
        Self {
            network,
            dimmable,
            read_after_write: None,
        }
    }

    /// Ask for a read-back after every set.
    #[must_use]
    pub fn read_after_write(mut self, delay: Duration) -> Self {
        self.read_after_write = Some(delay);
        self
    }

    fn is_on(&self, target: &Target) -> bool {
        endpoints(&self.network, target)
            .first()
            .and_then(|(device, endpoint)| self.network.read(device, *endpoint, "state"))
            .is_some_and(|state| state == "ON")
    }

    fn state_for(&self, target: &Target, value: &Value) -> Result<StateMap, ConverterError> {
        let requested = value.as_str().map(str::to_ascii_uppercase);
        let on = match requested.as_deref() {
            Some("ON") => true,
            Some("OFF") => false,
            Some("TOGGLE") => !self.is_on(target),
            _ => return Err(invalid("state", value)),
        };
        let mut state = Map::new();
        state.insert("state".to_string(), on_off(on));
        Ok(state)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    fn brightness_for(&self, key: &str, value: &Value) -> Result<StateMap, ConverterError> {
        if !self.dimmable {
            return Err(ConverterError::NoConverter(key.to_string()));
        }
        let raw = value.as_f64().ok_or_else(|| invalid(key, value))?;
        if raw < 0.0 {
            return Err(invalid(key, value));
        }
        let brightness = if key == "brightness_percent" {
            (raw.min(100.0) * MAX_BRIGHTNESS as f64 / 100.0).round() as u64
        } else {
            (raw.round() as u64).min(MAX_BRIGHTNESS)
        };
        let mut state = Map::new();
        state.insert("state".to_string(), on_off(brightness > 0));
        state.insert("brightness".to_string(), Value::from(brightness));
        Ok(state)
    }
}

#[async_trait]
impl Converter for OnOffConverter {
    fn supports(&self, _operation: Operation) -> bool {
        true
    }

    async fn convert_set(
        &self,
        target: &Target,
        key: &str,
        value: &Value,
        _ctx: &ConvertContext,
    ) -> Result<Option<SetOutcome>, ConverterError> {
        let state = match key {
            "state" => self.state_for(target, value)?,
            "brightness" | "brightness_percent" => self.brightness_for(key, value)?,
            other => return Err(ConverterError::NoConverter(other.to_string())),
        };
        write_all(&self.network, target, &state);
        let outcome = SetOutcome::with_state(state);
        Ok(Some(match self.read_after_write {
            Some(delay) => outcome.read_after(delay),
            None => outcome,
        }))
    }

    async fn convert_get(
        &self,
        target: &Target,
        key: &str,
        ctx: &ConvertContext,
    ) -> Result<(), ConverterError> {
        let keys: &[&str] = match key {
            "state" => &["state"],
            "brightness" | "brightness_percent" if self.dimmable => &["brightness"],
            other => return Err(ConverterError::NoConverter(other.to_string())),
        };
        report(&self.network, target, keys, ctx)
    }
}

/// `color_temp` in mireds, with named presets.
pub struct ColorTempConverter {
    network: Arc<VirtualNetwork>,
}

impl ColorTempConverter {
    #[must_use]
    pub fn new(network: Arc<VirtualNetwork>) -> Self {
        Self { network }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn mireds(value: &Value) -> Option<u64> {
        match value {
            Value::String(preset) => match preset.as_str() {
                "coolest" => Some(MIN_MIREDS),
                "cool" => Some(250),
                "neutral" => Some(370),
                "warm" => Some(454),
                "warmest" => Some(MAX_MIREDS),
                _ => None,
            },
            other => other
                .as_f64()
                .filter(|v| *v >= 0.0)
                .map(|v| (v.round() as u64).clamp(MIN_MIREDS, MAX_MIREDS)),
        }
    }
}

#[async_trait]
impl Converter for ColorTempConverter {
    fn supports(&self, _operation: Operation) -> bool {
        true
    }

    async fn convert_set(
        &self,
        target: &Target,
        key: &str,
        value: &Value,
        _ctx: &ConvertContext,
    ) -> Result<Option<SetOutcome>, ConverterError> {
        let mireds = Self::mireds(value).ok_or_else(|| invalid(key, value))?;
        let mut state = Map::new();
        state.insert("color_temp".to_string(), Value::from(mireds));
        write_all(&self.network, target, &state);
        Ok(Some(SetOutcome::with_state(state)))
    }

    async fn convert_get(
        &self,
        target: &Target,
        _key: &str,
        ctx: &ConvertContext,
    ) -> Result<(), ConverterError> {
        report(&self.network, target, &["color_temp"], ctx)
    }
}

/// `color` as `{x, y}`, `{r, g, b}` or `#rrggbb`. Write only.
pub struct ColorConverter {
    network: Arc<VirtualNetwork>,
}

impl ColorConverter {
    #[must_use]
    pub fn new(network: Arc<VirtualNetwork>) -> Self {
        Self { network }
    }

    fn normalise(value: &Value) -> Option<Value> {
        match value {
            Value::String(hex) => {
                let digits = hex.strip_prefix('#')?;
                if digits.len() != 6 {
                    return None;
                }
                let channel = |at: usize| u8::from_str_radix(digits.get(at..at + 2)?, 16).ok();
                Some(json!({ "r": channel(0)?, "g": channel(2)?, "b": channel(4)? }))
            }
            Value::Object(map) => {
                let xy = ["x", "y"].iter().all(|k| map.get(*k).is_some_and(Value::is_number));
                let rgb = ["r", "g", "b"].iter().all(|k| map.get(*k).is_some_and(Value::is_number));
                (xy || rgb).then(|| value.clone())
            }
            _ => None,
        }
    }
}

#[async_trait]
impl Converter for ColorConverter {
    fn supports(&self, operation: Operation) -> bool {
        operation == Operation::Set
    }

    async fn convert_set(
        &self,
        target: &Target,
        key: &str,
        value: &Value,
        _ctx: &ConvertContext,
    ) -> Result<Option<SetOutcome>, ConverterError> {
        let color = Self::normalise(value).ok_or_else(|| invalid(key, value))?;
        let mut state = Map::new();
        state.insert("color".to_string(), color);
        write_all(&self.network, target, &state);
        Ok(Some(SetOutcome::with_state(state)))
    }
}

/// `alert` effects and `flash` in seconds. Write only, nothing to publish.
pub struct AlertConverter {
    network: Arc<VirtualNetwork>,
}

impl AlertConverter {
    const EFFECTS: [&'static str; 4] = ["none", "select", "lselect", "blink"];

    #[must_use]
    pub fn new(network: Arc<VirtualNetwork>) -> Self {
        Self { network }
    }
}

#[async_trait]
impl Converter for AlertConverter {
    fn supports(&self, operation: Operation) -> bool {
        operation == Operation::Set
    }

    async fn convert_set(
        &self,
        target: &Target,
        key: &str,
        value: &Value,
        _ctx: &ConvertContext,
    ) -> Result<Option<SetOutcome>, ConverterError> {
        let effect = match (key, value) {
            ("alert", Value::String(effect)) if Self::EFFECTS.contains(&effect.as_str()) => {
                effect.clone()
            }
            ("flash", seconds) if seconds.as_f64().is_some_and(|s| s > 2.0) => "lselect".to_string(),
            ("flash", seconds) if seconds.is_number() => "select".to_string(),
            _ => return Err(invalid(key, value)),
        };
        let mut values = Map::new();
        values.insert("alert".to_string(), Value::from(effect));
        write_all(&self.network, target, &values);
        Ok(None)
    }
}

/// Accepts `transition` and drops it. Lets a transition time travel with a
/// broadcast without being reported as unsupported.
pub struct IgnoreTransitionConverter;

#[async_trait]
impl Converter for IgnoreTransitionConverter {
    fn supports(&self, operation: Operation) -> bool {
        operation == Operation::Set
    }

    async fn convert_set(
        &self,
        _target: &Target,
        _key: &str,
        _value: &Value,
        _ctx: &ConvertContext,
    ) -> Result<Option<SetOutcome>, ConverterError> {
        Ok(None)
    }
}

/// Cover `position` and `tilt` as a percentage.
pub struct CoverConverter {
    network: Arc<VirtualNetwork>,
}

impl CoverConverter {
    #[must_use]
    pub fn new(network: Arc<VirtualNetwork>) -> Self {
        Self { network }
    }
}

#[async_trait]
impl Converter for CoverConverter {
    fn supports(&self, _operation: Operation) -> bool {
        true
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    async fn convert_set(
        &self,
        target: &Target,
        key: &str,
        value: &Value,
        _ctx: &ConvertContext,
    ) -> Result<Option<SetOutcome>, ConverterError> {
        let percent = value
            .as_f64()
            .filter(|v| (0.0..=100.0).contains(v))
            .ok_or_else(|| invalid(key, value))?;
        let mut state = Map::new();
        state.insert(key.to_string(), Value::from(percent.round() as u64));
        write_all(&self.network, target, &state);
        Ok(Some(SetOutcome::with_state(state)))
    }

    async fn convert_get(
        &self,
        target: &Target,
        key: &str,
        ctx: &ConvertContext,
    ) -> Result<(), ConverterError> {
        match key {
            "position" => report(&self.network, target, &["position"], ctx),
            "tilt" => report(&self.network, target, &["tilt"], ctx),
            other => Err(ConverterError::NoConverter(other.to_string())),
        }
    }
}

/// `occupied_heating_setpoint` in degrees Celsius, kept to two decimals.
pub struct SetpointConverter {
    network: Arc<VirtualNetwork>,
}

impl SetpointConverter {
    const KEY: &'static str = "occupied_heating_setpoint";

    #[must_use]
    pub fn new(network: Arc<VirtualNetwork>) -> Self {
        Self { network }
    }
}

#[async_trait]
impl Converter for SetpointConverter {
    fn supports(&self, _operation: Operation) -> bool {
        true
    }

    async fn convert_set(
        &self,
        target: &Target,
        key: &str,
        value: &Value,
        _ctx: &ConvertContext,
    ) -> Result<Option<SetOutcome>, ConverterError> {
        let celsius = value
            .as_f64()
            .filter(|v| v.is_finite())
            .ok_or_else(|| invalid(key, value))?;
        let mut state = Map::new();
        state.insert(Self::KEY.to_string(), json!((celsius * 100.0).round() / 100.0));
        write_all(&self.network, target, &state);
        Ok(Some(SetOutcome::with_state(state)))
    }

    async fn convert_get(
        &self,
        target: &Target,
        _key: &str,
        ctx: &ConvertContext,
    ) -> Result<(), ConverterError> {
        report(&self.network, target, &[Self::KEY], ctx)
    }
}

/// `scene_recall` of a scene number stored on the device. Write only.
pub struct SceneRecallConverter {
    network: Arc<VirtualNetwork>,
}

impl SceneRecallConverter {
    #[must_use]
    pub fn new(network: Arc<VirtualNetwork>) -> Self {
        Self { network }
    }
}

#[async_trait]
impl Converter for SceneRecallConverter {
    fn supports(&self, operation: Operation) -> bool {
        operation == Operation::Set
    }

    async fn convert_set(
        &self,
        target: &Target,
        key: &str,
        value: &Value,
        _ctx: &ConvertContext,
    ) -> Result<Option<SetOutcome>, ConverterError> {
        let scene = value
            .as_u64()
            .filter(|id| *id <= u64::from(u8::MAX))
            .ok_or_else(|| invalid(key, value))?;
        let mut values = Map::new();
        values.insert("scene".to_string(), Value::from(scene));
        write_all(&self.network, target, &values);
        Ok(None)
    }
}

/// `brightness_move` and `brightness_move_onoff`: a signed rate, `0` or
/// `"stop"` to halt. The on/off flavour switches the light on when moving up.
pub struct BrightnessMoveConverter {
    network: Arc<VirtualNetwork>,
}

impl BrightnessMoveConverter {
    #[must_use]
    pub fn new(network: Arc<VirtualNetwork>) -> Self {
        Self { network }
    }
}

#[async_trait]
impl Converter for BrightnessMoveConverter {
    fn supports(&self, operation: Operation) -> bool {
        operation == Operation::Set
    }

    async fn convert_set(
        &self,
        target: &Target,
        key: &str,
        value: &Value,
        _ctx: &ConvertContext,
    ) -> Result<Option<SetOutcome>, ConverterError> {
        let rate = match value {
            Value::String(stop) if stop == "stop" => 0,
            other => other.as_i64().ok_or_else(|| invalid(key, value))?,
        };
        let mut values = Map::new();
        values.insert("brightness_move".to_string(), Value::from(rate));
        write_all(&self.network, target, &values);
        if key == "brightness_move_onoff" && rate > 0 {
            let mut state = Map::new();
            state.insert("state".to_string(), on_off(true));
            write_all(&self.network, target, &state);
            return Ok(Some(SetOutcome::with_state(state)));
        }
        Ok(None)
    }
}
