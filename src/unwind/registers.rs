//! Register bank translation.
//!
//! Rule interpretation is register-number-agnostic; callers think in architecture
//! register *names*. [`RegisterBank`] bridges the two using an externally supplied
//! ordered name array (index = DWARF register number), which is the only
//! architecture-specific input this engine touches.

use std::collections::HashMap;

/// A numbered register array built from a named snapshot.
///
/// Every slot covered by the name array starts populated; names missing from the
/// snapshot default to 0. A slot becomes `None` only through an explicit undefined
/// rule, and `None` slots are omitted when translating back to names.
#[derive(Debug, Clone)]
pub struct RegisterBank {
    values: Vec<Option<u64>>,
}

impl RegisterBank {
    /// Build a bank from a named register snapshot and the DWARF-number → name array.
    #[must_use]
    pub fn from_named(snapshot: &HashMap<String, u64>, names: &[&str]) -> RegisterBank {
        let values = names
            .iter()
            .map(|name| Some(snapshot.get(*name).copied().unwrap_or(0)))
            .collect();
        RegisterBank { values }
    }

    /// Current value of a numbered register.
    ///
    /// Registers past the end of the name array read as 0; only an explicit
    /// undefined rule yields `None`.
    #[must_use]
    pub fn get(&self, register: u64) -> Option<u64> {
        match usize::try_from(register) {
            Ok(index) if index < self.values.len() => self.values[index],
            Ok(_) => Some(0),
            Err(_) => Some(0),
        }
    }

    /// Store a recovered value (or `None` for undefined) into a numbered register.
    ///
    /// Registers past the end of the name array are dropped, mirroring
    /// [`RegisterBank::get`]. The bank never grows past the name array, so a rule
    /// keyed by an arbitrary register number cannot force an allocation.
    pub fn set(&mut self, register: u64, value: Option<u64>) {
        let Ok(index) = usize::try_from(register) else {
            return;
        };
        if let Some(slot) = self.values.get_mut(index) {
            *slot = value;
        }
    }

    /// Translate back into named registers, omitting undefined slots and slots the
    /// name array does not cover.
    #[must_use]
    pub fn to_named(&self, names: &[&str]) -> HashMap<String, u64> {
        let mut out = HashMap::new();
        for (index, name) in names.iter().enumerate() {
            if let Some(Some(value)) = self.values.get(index) {
                out.insert((*name).to_string(), *value);
            }
        }
        out
    }
}
