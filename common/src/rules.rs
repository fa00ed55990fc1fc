//! Per-mode control laws.
//!
//! Rules are stateless between cycles. The controller refreshes a rule's
//! [`RuleContext`] right before evaluating it, and evaluation only returns a
//! [`RelayCommand`]; applying it is the controller's job.

use tracing::debug;

use crate::{
    config::ThresholdConfig,
    types::{OperationMode, RelayState, SensorReading},
};

/// Everything a rule looks at during one control cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuleContext {
    pub reading: SensorReading,
    pub thresholds: ThresholdConfig,
    pub window_active: bool,
    pub relays: RelayState,
}

impl Default for RuleContext {
    fn default() -> Self {
        Self {
            reading: SensorReading::invalid(),
            thresholds: ThresholdConfig::default(),
            window_active: false,
            relays: RelayState::default(),
        }
    }
}

/// Desired relay states. `None` leaves a relay as it is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayCommand {
    pub pool_pump: Option<bool>,
    pub solar_pump: Option<bool>,
}

impl RelayCommand {
    pub const NONE: Self = Self {
        pool_pump: None,
        solar_pump: None,
    };

    fn solar(solar_pump: Option<bool>) -> Self {
        Self {
            pool_pump: None,
            solar_pump,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlRule {
    /// Pool pump follows the timer window; solar heating runs while it
    /// actually gains heat.
    Automatic(RuleContext),
    /// Relays only move on explicit commands.
    Manual(RuleContext),
    /// Heat as fast as possible regardless of the timer window.
    Boost(RuleContext),
    /// Pool pump follows the timer window, solar stays off.
    Scheduled(RuleContext),
}

impl ControlRule {
    pub fn for_mode(mode: OperationMode) -> Self {
        let context = RuleContext::default();
        match mode {
            OperationMode::Automatic => Self::Automatic(context),
            OperationMode::Manual => Self::Manual(context),
            OperationMode::Boost => Self::Boost(context),
            OperationMode::Scheduled => Self::Scheduled(context),
        }
    }

    pub fn mode(&self) -> OperationMode {
        match self {
            Self::Automatic(_) => OperationMode::Automatic,
            Self::Manual(_) => OperationMode::Manual,
            Self::Boost(_) => OperationMode::Boost,
            Self::Scheduled(_) => OperationMode::Scheduled,
        }
    }

    pub fn context(&self) -> &RuleContext {
        match self {
            Self::Automatic(context)
            | Self::Manual(context)
            | Self::Boost(context)
            | Self::Scheduled(context) => context,
        }
    }

    pub fn refresh(&mut self, context: RuleContext) {
        match self {
            Self::Automatic(current)
            | Self::Manual(current)
            | Self::Boost(current)
            | Self::Scheduled(current) => *current = context,
        }
    }

    pub fn evaluate(&self) -> RelayCommand {
        match self {
            Self::Automatic(context) => evaluate_automatic(context),
            Self::Manual(_) => RelayCommand::NONE,
            Self::Boost(context) => evaluate_boost(context),
            Self::Scheduled(context) => RelayCommand {
                pool_pump: Some(context.window_active),
                solar_pump: Some(false),
            },
        }
    }
}

fn evaluate_automatic(context: &RuleContext) -> RelayCommand {
    let pool_pump = Some(context.window_active);
    let solar_pump = if context.window_active {
        automatic_solar(context)
    } else {
        debug!("auto: pool pump outside timer window, solar off");
        Some(false)
    };

    RelayCommand {
        pool_pump,
        solar_pump,
    }
}

fn automatic_solar(context: &RuleContext) -> Option<bool> {
    let RuleContext {
        reading,
        thresholds: t,
        relays,
        ..
    } = context;

    if !reading.is_valid() {
        debug!(
            "auto: invalid reading (pool {}, solar {}), solar off",
            reading.pool_temp, reading.solar_temp
        );
        return Some(false);
    }

    let pool = reading.pool_temp;
    let solar = reading.solar_temp;
    let hyst = t.hysteresis;

    if relays.solar_pump_on {
        if solar < t.solar_min_temp - hyst {
            debug!("auto: solar {solar} below minimum {}, solar off", t.solar_min_temp);
            Some(false)
        } else if pool >= solar + hyst {
            debug!("auto: pool {pool} caught up with solar {solar}, solar off");
            Some(false)
        } else if pool >= t.pool_max_temp + hyst {
            debug!("auto: pool {pool} above maximum {}, solar off", t.pool_max_temp);
            Some(false)
        } else {
            None
        }
    } else if pool <= t.pool_max_temp && pool <= solar && t.solar_min_temp <= solar {
        debug!("auto: pool {pool} below maximum and solar {solar} warm enough, solar on");
        Some(true)
    } else {
        None
    }
}

fn evaluate_boost(context: &RuleContext) -> RelayCommand {
    let RuleContext {
        reading,
        thresholds: t,
        relays,
        ..
    } = context;

    if !relays.pool_pump_on {
        debug!("boost: pool pump is off, solar off");
        return RelayCommand::solar(Some(false));
    }
    if !reading.is_valid() {
        debug!("boost: invalid reading, solar off");
        return RelayCommand::solar(Some(false));
    }

    let pool = reading.pool_temp;
    let solar = reading.solar_temp;
    let hyst = t.hysteresis;

    if pool < t.pool_max_temp - hyst && pool < solar - hyst {
        debug!("boost: pool {pool} below maximum {}, solar on", t.pool_max_temp);
        RelayCommand::solar(Some(true))
    } else if pool > t.pool_max_temp + hyst && pool > solar + hyst {
        debug!("boost: pool {pool} reached maximum {}, solar off", t.pool_max_temp);
        RelayCommand::solar(Some(false))
    } else {
        RelayCommand::NONE
    }
}

/// One rule per mode, created once and indexed by [`OperationMode::index`].
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: [ControlRule; 4],
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            rules: OperationMode::ALL.map(ControlRule::for_mode),
        }
    }
}

impl RuleSet {
    pub fn get(&self, mode: OperationMode) -> &ControlRule {
        &self.rules[mode.index()]
    }

    /// Refreshes the rule for `mode` and hands it back ready to evaluate.
    pub fn select(&mut self, mode: OperationMode, context: RuleContext) -> &ControlRule {
        let rule = &mut self.rules[mode.index()];
        rule.refresh(context);
        rule
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn context(pool: f32, solar: f32, window_active: bool, solar_on: bool) -> RuleContext {
        RuleContext {
            reading: SensorReading::new(pool, solar),
            thresholds: ThresholdConfig::default(),
            window_active,
            relays: RelayState {
                pool_pump_on: window_active,
                solar_pump_on: solar_on,
            },
        }
    }

    fn automatic(context: RuleContext) -> RelayCommand {
        ControlRule::Automatic(context).evaluate()
    }

    #[test]
    fn arena_is_indexed_by_mode() {
        let rules = RuleSet::default();
        for mode in OperationMode::ALL {
            assert_eq!(rules.get(mode).mode(), mode);
        }
    }

    #[test]
    fn select_refreshes_context() {
        let mut rules = RuleSet::default();
        let ctx = context(24.0, 60.0, true, false);
        let rule = rules.select(OperationMode::Boost, ctx);
        assert_eq!(rule.context(), &ctx);

        let untouched = rules.get(OperationMode::Automatic).context();
        assert!(!untouched.reading.is_valid());
        assert!(!untouched.window_active);
        assert_eq!(untouched.relays, RelayState::default());
    }

    #[test]
    fn automatic_turns_solar_on_when_heat_is_available() {
        assert_eq!(
            automatic(context(24.0, 60.0, true, false)),
            RelayCommand {
                pool_pump: Some(true),
                solar_pump: Some(true),
            }
        );
    }

    #[test]
    fn automatic_keeps_solar_off_when_collector_is_cold() {
        // Solar warmer than pool but below the 55 °C minimum.
        let command = automatic(context(24.0, 40.0, true, false));
        assert_eq!(command.solar_pump, None);
    }

    #[test]
    fn automatic_forces_solar_off_outside_window() {
        assert_eq!(
            automatic(context(24.0, 60.0, false, true)),
            RelayCommand {
                pool_pump: Some(false),
                solar_pump: Some(false),
            }
        );
    }

    #[test]
    fn automatic_forces_solar_off_on_invalid_reading() {
        let command = automatic(context(f32::NAN, 60.0, true, true));
        assert_eq!(command.pool_pump, Some(true));
        assert_eq!(command.solar_pump, Some(false));

        let command = automatic(context(24.0, f32::NAN, true, false));
        assert_eq!(command.solar_pump, Some(false));
    }

    #[test]
    fn automatic_turns_solar_off_with_hysteresis() {
        // Collector dropped below 55 - 1.
        assert_eq!(automatic(context(24.0, 53.9, true, true)).solar_pump, Some(false));
        // Within the dead band the pump stays on.
        assert_eq!(automatic(context(24.0, 54.5, true, true)).solar_pump, None);
        // Pool reached the collector temperature plus hysteresis.
        let mut ctx = context(27.0, 26.0, true, true);
        ctx.thresholds.solar_min_temp = 20.0;
        assert_eq!(automatic(ctx).solar_pump, Some(false));
        // Pool above maximum plus hysteresis.
        assert_eq!(automatic(context(29.5, 60.0, true, true)).solar_pump, Some(false));
        assert_eq!(automatic(context(29.0, 60.0, true, true)).solar_pump, None);
    }

    #[test]
    fn manual_never_commands() {
        let command = ControlRule::Manual(context(10.0, 90.0, true, false)).evaluate();
        assert_eq!(command, RelayCommand::NONE);
    }

    #[test]
    fn scheduled_follows_window_with_solar_off() {
        let rule = ControlRule::Scheduled(context(20.0, 90.0, true, true));
        assert_eq!(
            rule.evaluate(),
            RelayCommand {
                pool_pump: Some(true),
                solar_pump: Some(false),
            }
        );
        let rule = ControlRule::Scheduled(context(20.0, 90.0, false, false));
        assert_eq!(rule.evaluate().pool_pump, Some(false));
    }

    #[test]
    fn boost_ignores_window_and_heats() {
        let mut ctx = context(24.0, 40.0, false, false);
        ctx.relays.pool_pump_on = true;
        assert_eq!(
            ControlRule::Boost(ctx).evaluate(),
            RelayCommand {
                pool_pump: None,
                solar_pump: Some(true),
            }
        );
    }

    #[test]
    fn boost_stops_above_maximum() {
        let mut ctx = context(30.0, 28.0, true, true);
        ctx.relays.pool_pump_on = true;
        assert_eq!(ControlRule::Boost(ctx).evaluate().solar_pump, Some(false));

        // Dead band: neither condition holds.
        let ctx = context(28.5, 40.0, true, true);
        assert_eq!(ControlRule::Boost(ctx).evaluate(), RelayCommand::NONE);
    }

    #[test]
    fn boost_fails_safe() {
        let mut ctx = context(24.0, 60.0, true, true);
        ctx.relays.pool_pump_on = false;
        assert_eq!(ControlRule::Boost(ctx).evaluate().solar_pump, Some(false));

        let ctx = context(f32::NAN, 60.0, true, true);
        assert_eq!(ControlRule::Boost(ctx).evaluate().solar_pump, Some(false));
    }
}
