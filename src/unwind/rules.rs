//! Register recovery rules.
//!
//! The output of interpreting call frame instructions up to a target address is a
//! [`RuleState`]: one CFA rule plus one recovery rule per register the instructions
//! mentioned. Rules describe *how* to recover a caller-frame value from the current
//! frame; actually doing so is the apply step in [`crate::unwind::UnwindTable`].

use std::collections::BTreeMap;

/// How one register's caller-frame value is recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterRule {
    /// The value is unrecoverable; explicitly distinct from "no rule"
    Undefined,
    /// The register is preserved across the call, current value is the caller's
    SameValue,
    /// The value was saved at `CFA + offset`; read memory there
    CfaOffset(i64),
    /// The value lives in another register of the current frame
    Register(u64),
}

/// How the canonical frame address is computed: `value(register) + offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CfaRule {
    /// Register number whose current value anchors the CFA
    pub register: u64,
    /// Signed displacement from the anchor register
    pub offset: i64,
}

/// The complete rule set in effect at one machine address.
///
/// Registers absent from the map have no rule; the apply step treats them the same as
/// [`RegisterRule::SameValue`]. That is deliberately different from an explicit
/// [`RegisterRule::Undefined`] entry, which drops the register from the output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleState {
    /// CFA rule, `None` until a `def_cfa` instruction ran
    pub cfa: Option<CfaRule>,
    /// Per-register recovery rules, keyed by DWARF register number
    pub registers: BTreeMap<u64, RegisterRule>,
}

impl RuleState {
    /// Set the rule for one register, replacing any previous rule.
    pub fn set_register(&mut self, register: u64, rule: RegisterRule) {
        self.registers.insert(register, rule);
    }

    /// The rule for one register, if any instruction established one.
    #[must_use]
    pub fn register(&self, register: u64) -> Option<RegisterRule> {
        self.registers.get(&register).copied()
    }
}
