//! Quantitative limits and live consumption counters.
//!
//! ## Thread Safety
//!
//! [`Counters`] is shared by every concurrent operation in a run. Each charge
//! is a single locked check-then-increment, so:
//! - No charge succeeds if it would exceed a limit
//! - Failed charges do not modify any counter
//! - Layered charges (see [`charge_layers`]) apply to every layer or to none

use crate::error::{Denial, DenialKind};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Declared ceilings for one run. Zero or absent means unlimited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Cumulative spend per currency, in minor units.
    pub budget_per_run: HashMap<String, u64>,
    /// Largest single charge per currency, in minor units.
    pub budget_per_call: HashMap<String, u64>,
    pub max_net_bytes: u64,
    pub max_net_calls: u64,
    pub max_fs_bytes: u64,
    pub max_fs_calls: u64,
    /// Per-tool call caps, keyed by tool name.
    pub tool_max_calls: HashMap<String, u64>,
    pub max_sleep_seconds: u64,
}

impl Limits {
    /// No limits at all.
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn with_run_budget(mut self, currency: &str, cents: u64) -> Self {
        self.budget_per_run.insert(currency_key(currency), cents);
        self
    }

    pub fn with_call_budget(mut self, currency: &str, cents: u64) -> Self {
        self.budget_per_call.insert(currency_key(currency), cents);
        self
    }

    pub fn with_net(mut self, max_bytes: u64, max_calls: u64) -> Self {
        self.max_net_bytes = max_bytes;
        self.max_net_calls = max_calls;
        self
    }

    pub fn with_fs(mut self, max_bytes: u64, max_calls: u64) -> Self {
        self.max_fs_bytes = max_bytes;
        self.max_fs_calls = max_calls;
        self
    }

    pub fn with_tool_calls(mut self, tool: impl Into<String>, max_calls: u64) -> Self {
        self.tool_max_calls.insert(tool.into(), max_calls);
        self
    }

    pub fn with_max_sleep(mut self, seconds: u64) -> Self {
        self.max_sleep_seconds = seconds;
        self
    }

    fn run_budget(&self, currency: &str) -> u64 {
        ceiling(&self.budget_per_run, currency)
    }

    fn call_budget(&self, currency: &str) -> u64 {
        ceiling(&self.budget_per_call, currency)
    }

    fn tool_budget(&self, tool: &str) -> u64 {
        ceiling(&self.tool_max_calls, tool)
    }

    /// Fails with `TimeExceeded` if `duration` is above the sleep ceiling.
    pub fn check_sleep(&self, duration: Duration) -> Result<(), Denial> {
        if self.max_sleep_seconds > 0 && duration > Duration::from_secs(self.max_sleep_seconds) {
            return Err(Denial::new(
                DenialKind::TimeExceeded,
                format!(
                    "sleep of {:.3}s exceeds limit of {}s",
                    duration.as_secs_f64(),
                    self.max_sleep_seconds
                ),
            ));
        }
        Ok(())
    }
}

/// Ceiling configured for `key`, ignoring ASCII case. The smallest non-zero
/// ceiling wins across spellings.
fn ceiling(map: &HashMap<String, u64>, key: &str) -> u64 {
    map.iter()
        .filter(|(k, max)| **max > 0 && k.eq_ignore_ascii_case(key))
        .map(|(_, max)| *max)
        .min()
        .unwrap_or(0)
}

fn currency_key(currency: &str) -> String {
    currency.to_ascii_uppercase()
}

fn tool_key(tool: &str) -> String {
    tool.to_ascii_lowercase()
}

/// Live consumption. Starts zeroed and only grows.
#[derive(Debug, Default)]
pub struct Counters {
    state: Mutex<CounterState>,
}

/// A point-in-time copy of [`Counters`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterState {
    pub spent: HashMap<String, u64>,
    pub net_bytes: u64,
    pub net_calls: u64,
    pub fs_bytes: u64,
    pub fs_calls: u64,
    pub tool_calls: HashMap<String, u64>,
}

impl CounterState {
    pub fn spent(&self, currency: &str) -> u64 {
        self.spent.get(&currency_key(currency)).copied().unwrap_or(0)
    }

    pub fn tool_calls(&self, tool: &str) -> u64 {
        self.tool_calls.get(&tool_key(tool)).copied().unwrap_or(0)
    }
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CounterState {
        self.state.lock().clone()
    }
}

/// One chargeable action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Charge {
    Budget { currency: String, cents: u64 },
    Net { bytes: u64 },
    Fs { bytes: u64 },
    ToolCall { name: String },
}

impl Charge {
    pub fn budget(currency: &str, cents: u64) -> Self {
        Charge::Budget {
            currency: currency_key(currency),
            cents,
        }
    }

    pub fn tool_call(name: impl Into<String>) -> Self {
        Charge::ToolCall {
            name: tool_key(&name.into()),
        }
    }

    fn check(&self, limits: &Limits, state: &CounterState) -> Result<(), Denial> {
        match self {
            Charge::Budget { currency, cents } => {
                let per_call = limits.call_budget(currency);
                if per_call > 0 && *cents > per_call {
                    return Err(Denial::new(
                        DenialKind::BudgetExceeded,
                        format!("charge of {cents} {currency} exceeds per-call limit {per_call}"),
                    ));
                }
                let per_run = limits.run_budget(currency);
                let spent = state.spent(currency);
                if per_run > 0 && spent.checked_add(*cents).is_none_or(|total| total > per_run) {
                    return Err(Denial::new(
                        DenialKind::BudgetExceeded,
                        format!(
                            "charge of {cents} {currency} would exceed run limit {per_run} \
                             (spent {spent})"
                        ),
                    ));
                }
                Ok(())
            }
            Charge::Net { bytes } => check_axis(
                DenialKind::NetExceeded,
                "net",
                (state.net_bytes, state.net_calls),
                (limits.max_net_bytes, limits.max_net_calls),
                *bytes,
            ),
            Charge::Fs { bytes } => check_axis(
                DenialKind::FsExceeded,
                "fs",
                (state.fs_bytes, state.fs_calls),
                (limits.max_fs_bytes, limits.max_fs_calls),
                *bytes,
            ),
            Charge::ToolCall { name } => {
                let max = limits.tool_budget(name);
                let calls = state.tool_calls(name);
                if max > 0 && calls >= max {
                    return Err(Denial::new(
                        DenialKind::ToolExceeded,
                        format!("tool '{name}' reached its limit of {max} calls"),
                    ));
                }
                Ok(())
            }
        }
    }

    fn apply(&self, state: &mut CounterState) {
        match self {
            Charge::Budget { currency, cents } => {
                let spent = state.spent.entry(currency_key(currency)).or_default();
                *spent = spent.saturating_add(*cents);
            }
            Charge::Net { bytes } => {
                state.net_bytes = state.net_bytes.saturating_add(*bytes);
                state.net_calls = state.net_calls.saturating_add(1);
            }
            Charge::Fs { bytes } => {
                state.fs_bytes = state.fs_bytes.saturating_add(*bytes);
                state.fs_calls = state.fs_calls.saturating_add(1);
            }
            Charge::ToolCall { name } => {
                let calls = state.tool_calls.entry(tool_key(name)).or_default();
                *calls = calls.saturating_add(1);
            }
        }
    }
}

fn check_axis(
    kind: DenialKind,
    axis: &str,
    (bytes_used, calls_used): (u64, u64),
    (max_bytes, max_calls): (u64, u64),
    bytes: u64,
) -> Result<(), Denial> {
    if max_bytes > 0 && bytes_used.checked_add(bytes).is_none_or(|total| total > max_bytes) {
        return Err(Denial::new(
            kind,
            format!("{axis} bytes would exceed {max_bytes} (used {bytes_used}, requested {bytes})"),
        ));
    }
    if max_calls > 0 && calls_used >= max_calls {
        return Err(Denial::new(
            kind,
            format!("{axis} calls would exceed {max_calls}"),
        ));
    }
    Ok(())
}

/// Apply `charge` to every `(limits, counters)` layer as one unit.
///
/// Layers must be ordered root first; every caller locks in that order.
/// All layers are checked before any is mutated.
pub fn charge_layers(layers: &[(&Limits, &Counters)], charge: &Charge) -> Result<(), Denial> {
    let mut guards: Vec<MutexGuard<'_, CounterState>> =
        layers.iter().map(|(_, counters)| counters.state.lock()).collect();

    for ((limits, _), state) in layers.iter().zip(guards.iter()) {
        charge.check(limits, state)?;
    }
    for state in guards.iter_mut() {
        charge.apply(state);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn charge(limits: &Limits, counters: &Counters, c: Charge) -> Result<(), Denial> {
        charge_layers(&[(limits, counters)], &c)
    }

    #[test]
    fn per_call_budget_does_not_mutate_on_failure() {
        let limits = Limits::default().with_call_budget("usd", 60);
        let counters = Counters::new();

        let err = charge(&limits, &counters, Charge::budget("USD", 61)).unwrap_err();
        assert_eq!(err.kind, DenialKind::BudgetExceeded);
        assert_eq!(counters.snapshot().spent("usd"), 0);

        charge(&limits, &counters, Charge::budget("usd", 60)).unwrap();
        assert_eq!(counters.snapshot().spent("USD"), 60);
    }

    #[test]
    fn per_run_budget_is_cumulative() {
        let limits = Limits::default().with_run_budget("USD", 100);
        let counters = Counters::new();

        charge(&limits, &counters, Charge::budget("USD", 90)).unwrap();
        let err = charge(&limits, &counters, Charge::budget("USD", 20)).unwrap_err();
        assert_eq!(err.kind, DenialKind::BudgetExceeded);
        assert_eq!(counters.snapshot().spent("USD"), 90);

        charge(&limits, &counters, Charge::budget("USD", 10)).unwrap();
        assert_eq!(counters.snapshot().spent("USD"), 100);
    }

    #[test]
    fn currencies_are_independent() {
        let limits = Limits::default().with_run_budget("USD", 10);
        let counters = Counters::new();

        charge(&limits, &counters, Charge::budget("EUR", 1_000)).unwrap();
        charge(&limits, &counters, Charge::budget("USD", 10)).unwrap();
        assert!(charge(&limits, &counters, Charge::budget("USD", 1)).is_err());
    }

    #[test]
    fn net_bytes_and_calls() {
        let limits = Limits::default().with_net(100, 2);
        let counters = Counters::new();

        charge(&limits, &counters, Charge::Net { bytes: 60 }).unwrap();
        let err = charge(&limits, &counters, Charge::Net { bytes: 41 }).unwrap_err();
        assert_eq!(err.kind, DenialKind::NetExceeded);

        charge(&limits, &counters, Charge::Net { bytes: 40 }).unwrap();
        let err = charge(&limits, &counters, Charge::Net { bytes: 0 }).unwrap_err();
        assert_eq!(err.kind, DenialKind::NetExceeded);

        let snap = counters.snapshot();
        assert_eq!((snap.net_bytes, snap.net_calls), (100, 2));
    }

    #[test]
    fn fs_zero_means_unlimited() {
        let limits = Limits::default();
        let counters = Counters::new();
        for _ in 0..1_000 {
            charge(&limits, &counters, Charge::Fs { bytes: u64::MAX / 2 }).unwrap();
        }
        assert_eq!(counters.snapshot().fs_calls, 1_000);
    }

    #[test]
    fn fs_limit() {
        let limits = Limits::default().with_fs(0, 1);
        let counters = Counters::new();
        charge(&limits, &counters, Charge::Fs { bytes: 5 }).unwrap();
        let err = charge(&limits, &counters, Charge::Fs { bytes: 5 }).unwrap_err();
        assert_eq!(err.kind, DenialKind::FsExceeded);
    }

    #[test]
    fn tool_calls_capped_per_tool() {
        let limits = Limits::default().with_tool_calls("http.get", 2);
        let counters = Counters::new();

        charge(&limits, &counters, Charge::tool_call("http.get")).unwrap();
        charge(&limits, &counters, Charge::tool_call("http.get")).unwrap();
        let err = charge(&limits, &counters, Charge::tool_call("http.get")).unwrap_err();
        assert_eq!(err.kind, DenialKind::ToolExceeded);

        charge(&limits, &counters, Charge::tool_call("fs.read")).unwrap();
        let snap = counters.snapshot();
        assert_eq!(snap.tool_calls("http.get"), 2);
        assert_eq!(snap.tool_calls("fs.read"), 1);
    }

    #[test]
    fn sleep_ceiling() {
        let limits = Limits::default().with_max_sleep(5);
        assert!(limits.check_sleep(Duration::from_secs(5)).is_ok());
        let err = limits.check_sleep(Duration::from_millis(5_001)).unwrap_err();
        assert_eq!(err.kind, DenialKind::TimeExceeded);
        assert!(Limits::unlimited().check_sleep(Duration::from_secs(86_400)).is_ok());
    }

    #[test]
    fn layered_charge_is_all_or_nothing() {
        let parent_limits = Limits::default().with_tool_calls("t", 1);
        let child_limits = Limits::default();
        let parent = Counters::new();
        let child = Counters::new();
        let layers = [(&parent_limits, &parent), (&child_limits, &child)];

        charge_layers(&layers, &Charge::tool_call("t")).unwrap();
        assert!(charge_layers(&layers, &Charge::tool_call("t")).is_err());

        assert_eq!(parent.snapshot().tool_calls("t"), 1);
        assert_eq!(child.snapshot().tool_calls("t"), 1);
    }

    #[test]
    fn limits_deserialize_with_defaults() {
        let limits: Limits = toml::from_str(
            r#"
max_net_bytes = 1024
[budget_per_run]
usd = 500
[tool_max_calls]
"fs.write" = 3
"#,
        )
        .unwrap();
        assert_eq!(limits.run_budget("USD"), 500);
        assert_eq!(limits.tool_budget("fs.write"), 3);
        assert_eq!(limits.max_fs_bytes, 0);
    }

    #[test]
    fn lowercase_currency_keys_are_enforced() {
        let limits = Limits {
            budget_per_run: HashMap::from([("usd".to_string(), 100)]),
            ..Limits::default()
        };
        let counters = Counters::new();

        let err = charge(&limits, &counters, Charge::budget("usd", 1_000_000)).unwrap_err();
        assert_eq!(err.kind, DenialKind::BudgetExceeded);
        assert_eq!(counters.snapshot().spent("USD"), 0);

        let per_call: Limits = serde_json::from_str(r#"{"budget_per_call":{"usd":60}}"#).unwrap();
        let err = charge(&per_call, &counters, Charge::budget("USD", 61)).unwrap_err();
        assert_eq!(err.kind, DenialKind::BudgetExceeded);
    }

    #[test]
    fn raw_charge_variants_share_counters_with_constructors() {
        let limits = Limits::default().with_run_budget("EUR", 10).with_tool_calls("t", 1);
        let counters = Counters::new();

        let raw = Charge::Budget {
            currency: "eur".to_string(),
            cents: 6,
        };
        charge(&limits, &counters, raw.clone()).unwrap();
        assert!(charge(&limits, &counters, raw).is_err());
        assert_eq!(counters.snapshot().spent("EUR"), 6);

        let raw = Charge::ToolCall {
            name: "T".to_string(),
        };
        charge(&limits, &counters, raw.clone()).unwrap();
        assert!(charge(&limits, &counters, Charge::tool_call("t")).is_err());
        assert_eq!(counters.snapshot().tool_calls("T"), 1);
    }

    #[test]
    fn tool_caps_ignore_case() {
        let limits = Limits::default().with_tool_calls("HTTP.GET", 1);
        let counters = Counters::new();

        charge(&limits, &counters, Charge::tool_call("http.get")).unwrap();
        let err = charge(&limits, &counters, Charge::tool_call("http.get")).unwrap_err();
        assert_eq!(err.kind, DenialKind::ToolExceeded);
        assert_eq!(counters.snapshot().tool_calls("Http.Get"), 1);
    }

    #[test]
    fn smallest_ceiling_wins_across_spellings() {
        let limits = Limits {
            budget_per_run: HashMap::from([("usd".to_string(), 50), ("USD".to_string(), 500)]),
            ..Limits::default()
        };
        assert_eq!(limits.run_budget("Usd"), 50);
    }
}
