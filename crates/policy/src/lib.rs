//! Capability-based authorization gate.
//!
//! Core principle: **All side effects require an explicit capability.**
//!
//! Before a tool runs, [`Gate::can_call`] checks the trust context, the
//! tool's integrity, the deny/allow name rules, the capabilities the tool
//! requires, and the run's quantitative limits. The first failing stage
//! returns a typed [`Denial`].
//!
//! # Example
//!
//! ```
//! use policy::{Capability, ExecPolicy, Gate, GrantSet, Limits, ToolMeta, TrustContext};
//!
//! let grants = GrantSet::parse(
//!     ["fs:read:/data/*"],
//!     Limits::default().with_tool_calls("fs.read", 10),
//! )?;
//! let policy = ExecPolicy::builder(TrustContext::Normal)
//!     .allow(["fs.*"])
//!     .deny(["fs.delete"])
//!     .grants(grants)
//!     .build();
//!
//! let tool = ToolMeta::new("fs.read").requires(Capability::parse("fs:read:/data/report.csv")?);
//! let gate = Gate::default();
//! assert!(gate.can_call(Some(&policy), &tool).is_ok());
//! assert!(gate.can_call(None, &tool).is_err());
//! # Ok::<(), policy::Error>(())
//! ```

mod capability;
mod config;
mod critical;
mod error;
mod exec;
mod gate;
mod grant;
pub mod integrity;
mod limits;
pub mod matcher;
mod tool;
mod value;

pub use capability::{ALLOW_ALL, Capability, parse_all};
pub use config::{LoadedPolicy, PolicyConfig, RuleConfig, ScopeConfig};
pub use critical::{AbortOnCritical, CriticalEvent, CriticalHandler, CriticalSink};
pub use error::{Denial, DenialKind, Error, FieldError, ParseCapabilityError, Result};
pub use exec::{
    ExecPolicy, ExecPolicyBuilder, TrustContext, is_write_effect, rule_matches,
    rule_matches_capability,
};
pub use gate::Gate;
pub use grant::GrantSet;
pub use integrity::{SpecFetcher, ToolSpec};
pub use limits::{Charge, CounterState, Counters, Limits, charge_layers};
pub use tool::ToolMeta;
pub use value::{Table, Value};
