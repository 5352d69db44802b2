use crate::{
    devices::hardware::gpio::{Level, OutputLines},
    error::AgentError,
};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use std::{
    collections::{BTreeMap, HashSet},
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use strum_macros::{Display, EnumString};
use tracing::{debug, error, info};

/// Cached state of a relay.
#[derive(EnumString, Display, Deserialize, Serialize, Copy, Clone, Debug, PartialEq, Eq, Default)]
#[strum(ascii_case_insensitive)]
pub enum ActuatorState {
    /// Relay energised.
    On,
    /// Relay released, the state every actuator starts in.
    #[default]
    Off,
}

/// One relay output as wired on the board.
#[serde_as]
#[derive(Deserialize, Serialize, Clone, PartialEq, Eq, Debug)]
pub struct ActuatorConfig {
    /// Name used as the trailing topic segment, i.e. `waterPump`.
    pub name: String,
    /// BCM line number the relay input is wired to.
    pub line: u8,
    /// When set, switching the actuator on arms a safety timer that
    /// switches it off again after this many seconds.
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub auto_off: Option<Duration>,
}

impl ActuatorConfig {
    /// Actuator without a safety timer.
    ///
    /// * `name`: actuator name.
    /// * `line`: BCM line number.
    pub fn new(name: &str, line: u8) -> Self {
        Self {
            name: String::from(name),
            line,
            auto_off: None,
        }
    }

    /// Add a safety timer to the actuator.
    ///
    /// * `auto_off`: time after which the actuator is forced off.
    pub fn with_auto_off(mut self, auto_off: Duration) -> Self {
        self.auto_off = Some(auto_off);
        self
    }
}

fn default_gpio_root() -> PathBuf {
    PathBuf::from("/sys/class/gpio")
}

/// Relay board wiring.
#[derive(Deserialize, Serialize, Clone, PartialEq, Eq, Debug)]
pub struct RelayBoardConfig {
    /// Sysfs gpio directory.
    #[serde(default = "default_gpio_root")]
    pub gpio_root: PathBuf,
    /// Set for boards whose relays energise when the input is pulled low.
    #[serde(default)]
    pub active_low: bool,
    /// Every relay on the board. Fixed for the lifetime of the agent.
    pub actuators: Vec<ActuatorConfig>,
}

impl RelayBoardConfig {
    /// Board wired active high on the default gpio directory.
    ///
    /// * `actuators`: relays on the board.
    pub fn new(actuators: Vec<ActuatorConfig>) -> Self {
        Self {
            gpio_root: default_gpio_root(),
            active_low: false,
            actuators,
        }
    }

    /// Check names and lines are unique.
    pub fn validate(&self) -> Result<(), AgentError> {
        let mut names = HashSet::new();
        let mut lines = HashSet::new();
        for actuator in &self.actuators {
            if actuator.name.is_empty() || actuator.name.contains('/') {
                return Err(AgentError::Config(format!(
                    "actuator name {:?} cannot be used as a topic segment",
                    actuator.name
                )));
            }
            if !names.insert(actuator.name.as_str()) {
                return Err(AgentError::Config(format!(
                    "actuator {} configured twice",
                    actuator.name
                )));
            }
            if !lines.insert(actuator.line) {
                return Err(AgentError::Config(format!(
                    "line {} is wired to more than one actuator",
                    actuator.line
                )));
            }
        }
        Ok(())
    }
}

/// A relay in the registry.
struct Actuator {
    line: u8,
    auto_off: Option<Duration>,
    state: Mutex<ActuatorState>,
}

/// Fixed mapping of actuator names to output lines. It is the only
/// writer of the lines and the only holder of actuator state; reads come
/// from the cached state, never from the hardware.
pub struct ActuatorRegistry {
    lines: Arc<dyn OutputLines>,
    active_low: bool,
    actuators: BTreeMap<String, Actuator>,
}

impl ActuatorRegistry {
    /// Build the registry, preparing every line and driving it off.
    ///
    /// * `config`: `RelayBoardConfig`
    /// * `lines`: output line driver.
    pub fn new(config: &RelayBoardConfig, lines: Arc<dyn OutputLines>) -> Result<Self, AgentError> {
        config.validate()?;
        let registry = Self {
            lines,
            active_low: config.active_low,
            actuators: config
                .actuators
                .iter()
                .map(|c| {
                    (
                        c.name.clone(),
                        Actuator {
                            line: c.line,
                            auto_off: c.auto_off,
                            state: Mutex::new(ActuatorState::Off),
                        },
                    )
                })
                .collect(),
        };

        for (name, actuator) in &registry.actuators {
            registry.lines.configure(actuator.line)?;
            registry
                .lines
                .write(actuator.line, registry.level(ActuatorState::Off))?;
            debug!(actuator = %name, line = actuator.line, "line set up");
        }
        Ok(registry)
    }

    fn level(&self, state: ActuatorState) -> Level {
        match (state, self.active_low) {
            (ActuatorState::On, false) | (ActuatorState::Off, true) => Level::High,
            (ActuatorState::Off, false) | (ActuatorState::On, true) => Level::Low,
        }
    }

    fn actuator(&self, name: &str) -> Result<&Actuator, AgentError> {
        self.actuators
            .get(name)
            .ok_or_else(|| AgentError::UnknownActuator(String::from(name)))
    }

    /// Drive an actuator and record its new state. The line is written even
    /// when the state does not change.
    ///
    /// * `name`: actuator name.
    /// * `state`: requested state.
    pub fn set(&self, name: &str, state: ActuatorState) -> Result<(), AgentError> {
        self.set_if(name, state, || true).map(drop)
    }

    /// Like `set`, but `condition` is checked while the actuator is locked
    /// and nothing is written when it returns false. Returns whether the
    /// line was written.
    ///
    /// * `name`: actuator name.
    /// * `state`: requested state.
    /// * `condition`: evaluated with no other switch of this actuator in flight.
    pub fn set_if(
        &self,
        name: &str,
        state: ActuatorState,
        condition: impl FnOnce() -> bool,
    ) -> Result<bool, AgentError> {
        let actuator = self.actuator(name)?;
        let mut current = actuator.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !condition() {
            return Ok(false);
        }
        self.lines.write(actuator.line, self.level(state))?;
        if *current == state {
            info!(actuator = name, line = actuator.line, %state, "actuator already in state");
        } else {
            info!(actuator = name, line = actuator.line, %state, "actuator switched");
        }
        *current = state;
        Ok(true)
    }

    /// Cached state of an actuator.
    ///
    /// * `name`: actuator name.
    pub fn get(&self, name: &str) -> Result<ActuatorState, AgentError> {
        let actuator = self.actuator(name)?;
        let state = *actuator.state.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(state)
    }

    /// Safety timer duration configured for an actuator.
    ///
    /// * `name`: actuator name.
    pub fn auto_off(&self, name: &str) -> Result<Option<Duration>, AgentError> {
        Ok(self.actuator(name)?.auto_off)
    }

    /// Whether the actuator exists.
    pub fn contains(&self, name: &str) -> bool {
        self.actuators.contains_key(name)
    }

    /// Names of every actuator, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.actuators.keys().map(String::as_str)
    }

    /// State of every actuator, sorted by name.
    pub fn snapshot(&self) -> Vec<(String, ActuatorState)> {
        self.actuators
            .iter()
            .map(|(name, a)| {
                (
                    name.clone(),
                    *a.state.lock().unwrap_or_else(PoisonError::into_inner),
                )
            })
            .collect()
    }

    /// Switch everything off, carrying on past lines that fail.
    pub fn all_off(&self) {
        for name in self.actuators.keys() {
            if let Err(e) = self.set(name, ActuatorState::Off) {
                error!(actuator = %name, "failed to switch off: {e}");
            }
        }
    }
}

static_assertions::assert_impl_all!(ActuatorRegistry: Send, Sync);
