//! Granted capabilities plus the run's limits and counters.

use crate::capability::parse_all;
use crate::error::{Denial, ParseCapabilityError};
use crate::limits::{Charge, CounterState, Counters, Limits, charge_layers};
use crate::{Capability, matcher};
use std::time::Duration;

/// Everything a run has been granted.
///
/// Owns its [`Counters`]; one `GrantSet` exists per run (or per policy
/// layer), and it is shared by reference across concurrent operations.
#[derive(Debug, Default)]
pub struct GrantSet {
    grants: Vec<Capability>,
    limits: Limits,
    counters: Counters,
}

impl GrantSet {
    pub fn new(grants: Vec<Capability>, limits: Limits) -> Self {
        Self {
            grants,
            limits,
            counters: Counters::new(),
        }
    }

    /// Build from capability strings such as `"fs:read:/data/*"`.
    pub fn parse<I, S>(specs: I, limits: Limits) -> Result<Self, ParseCapabilityError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self::new(parse_all(specs)?, limits))
    }

    /// Nothing granted, nothing limited.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn grants(&self) -> &[Capability] {
        &self.grants
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn snapshot(&self) -> CounterState {
        self.counters.snapshot()
    }

    /// Whether a single capability is granted.
    pub fn check(&self, capability: &Capability) -> bool {
        matcher::satisfied(std::slice::from_ref(capability), &self.grants)
    }

    /// Whether every capability in `needs` is granted.
    pub fn satisfies(&self, needs: &[Capability]) -> bool {
        matcher::satisfied(needs, &self.grants)
    }

    pub fn check_and_charge_budget(&self, currency: &str, cents: u64) -> Result<(), Denial> {
        self.charge(&Charge::budget(currency, cents))
    }

    pub fn count_net(&self, bytes: u64) -> Result<(), Denial> {
        self.charge(&Charge::Net { bytes })
    }

    pub fn count_fs(&self, bytes: u64) -> Result<(), Denial> {
        self.charge(&Charge::Fs { bytes })
    }

    pub fn count_tool_call(&self, name: &str) -> Result<(), Denial> {
        self.charge(&Charge::tool_call(name))
    }

    /// Bound a sleep the caller is about to perform. Charges nothing.
    pub fn check_sleep(&self, duration: Duration) -> Result<(), Denial> {
        self.limits.check_sleep(duration)
    }

    fn charge(&self, charge: &Charge) -> Result<(), Denial> {
        charge_layers(&[(&self.limits, &self.counters)], charge)
    }
}
