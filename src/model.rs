//! Model-name parsing and the per-trace dispatcher
//! (`original_source/src/Models.h`, spec section 4.12).

use std::fmt;

use crate::analysis;
use crate::error::{AxeError, Result};
use crate::trace::Trace;
use crate::valorder;

/// One of the five shared-memory consistency models this checker judges
/// traces against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTag {
    Sc,
    Tso,
    Pso,
    Wmo,
    Pow,
}

impl fmt::Display for ModelTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModelTag::Sc => "SC",
            ModelTag::Tso => "TSO",
            ModelTag::Pso => "PSO",
            ModelTag::Wmo => "WMO",
            ModelTag::Pow => "POW",
        };
        f.write_str(s)
    }
}

/// Parses a model name, case-insensitively.
pub fn parse_model(s: &str) -> Result<ModelTag> {
    match s.to_ascii_uppercase().as_str() {
        "SC" => Ok(ModelTag::Sc),
        "TSO" => Ok(ModelTag::Tso),
        "PSO" => Ok(ModelTag::Pso),
        "WMO" => Ok(ModelTag::Wmo),
        "POW" => Ok(ModelTag::Pow),
        other => Err(AxeError::usage(format!(
            "unknown model '{other}' (expected one of SC, TSO, PSO, WMO, POW)"
        ))),
    }
}

/// Flags that change how a trace is checked, independent of which model is
/// selected.
#[derive(Debug, Clone, Copy, Default)]
pub struct Options {
    /// `-g`: assume a global clock domain (enables sync-time edges under
    /// POW).
    pub global_clock: bool,
    /// `-i`: caller has already dropped every begin/end time from the batch
    /// before calling [`Trace::new`]; kept here only so callers can thread
    /// the flag through alongside `global_clock` without a separate channel.
    pub ignore_times: bool,
}

/// Checks whether `trace` is admitted by `model`.
pub fn check(trace: &Trace, model: ModelTag, opts: Options) -> bool {
    match model {
        ModelTag::Sc | ModelTag::Tso | ModelTag::Pso | ModelTag::Wmo => {
            analysis::check(trace, model)
        }
        ModelTag::Pow => valorder::check(trace, opts.global_clock),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(parse_model("sc").unwrap(), ModelTag::Sc);
        assert_eq!(parse_model("Tso").unwrap(), ModelTag::Tso);
        assert_eq!(parse_model("POW").unwrap(), ModelTag::Pow);
    }

    #[test]
    fn parse_rejects_unknown() {
        assert!(parse_model("RISCV").is_err());
    }
}
