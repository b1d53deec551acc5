//! Call frame instruction interpretation.
//!
//! An [`UnwindTable`] is the rule state in effect at one target instruction address,
//! produced by replaying DWARF call frame instructions. Building one is a two-pass
//! process:
//!
//! 1. The parent CIE's `initial_instructions` run against a fresh [`RuleState`] with
//!    the current address pinned at 0 - they establish the callee-saved-register
//!    convention unconditionally. The resulting register rules are snapshotted.
//! 2. The FDE's own instructions run from the FDE's base address, stopping as soon as
//!    the current address would pass the target. The surviving state describes the
//!    target address.
//!
//! Applying the table to a register snapshot is a separate step, and it is
//! deliberately two-phased: every rule's input is read from the *pre-step* bank, then
//! all results commit at once. Register-copy rules therefore never observe another
//! rule's output in the same step, regardless of map iteration order.
//!
//! # Instruction Coverage
//!
//! The location, offset, register, CFA-definition and state-stack opcodes are
//! implemented. DWARF expression opcodes and the value-rule family are consumed and
//! logged as unsupported. The short-form `restore` opcode is an intentional no-op.
//! A byte that matches no known opcode stops the replay where it stands, keeping the
//! rules accumulated so far.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use crate::{
    cfi::{CieRc, Fde},
    file::{io::ByteOrder, parser::Parser},
    memory::MemorySource,
    unwind::rules::{CfaRule, RegisterRule, RuleState},
    Result,
};

/// `DW_CFA` extended opcode bytes (high two bits clear).
mod opcode {
    pub const NOP: u8 = 0x00;
    pub const SET_LOC: u8 = 0x01;
    pub const ADVANCE_LOC1: u8 = 0x02;
    pub const ADVANCE_LOC2: u8 = 0x03;
    pub const ADVANCE_LOC4: u8 = 0x04;
    pub const OFFSET_EXTENDED: u8 = 0x05;
    pub const RESTORE_EXTENDED: u8 = 0x06;
    pub const UNDEFINED: u8 = 0x07;
    pub const SAME_VALUE: u8 = 0x08;
    pub const REGISTER: u8 = 0x09;
    pub const REMEMBER_STATE: u8 = 0x0A;
    pub const RESTORE_STATE: u8 = 0x0B;
    pub const DEF_CFA: u8 = 0x0C;
    pub const DEF_CFA_REGISTER: u8 = 0x0D;
    pub const DEF_CFA_OFFSET: u8 = 0x0E;
    pub const DEF_CFA_EXPRESSION: u8 = 0x0F;
    pub const EXPRESSION: u8 = 0x10;
    pub const OFFSET_EXTENDED_SF: u8 = 0x11;
    pub const DEF_CFA_SF: u8 = 0x12;
    pub const DEF_CFA_OFFSET_SF: u8 = 0x13;
    pub const VAL_OFFSET: u8 = 0x14;
    pub const VAL_OFFSET_SF: u8 = 0x15;
    pub const VAL_EXPRESSION: u8 = 0x16;
}

/// Opcodes this engine recognises but does not implement, for log classification.
#[derive(Debug, Clone, Copy, strum::Display)]
#[strum(serialize_all = "snake_case")]
enum UnsupportedInstruction {
    DefCfaExpression,
    Expression,
    ValExpression,
    ValOffset,
    ValOffsetSf,
}

/// Outcome of executing one instruction.
enum Control {
    Continue,
    Stop,
}

/// The recovered machine state for one caller frame.
#[derive(Debug, Clone)]
pub struct FrameState {
    /// Recovered named registers; registers with an undefined rule are absent
    pub registers: HashMap<String, u64>,
    /// The canonical frame address, conventionally the caller's stack pointer
    pub frame_address: u64,
    /// Value of the return-address register, 0 if unrecoverable
    pub return_address: u64,
}

/// The rule state in effect at one target instruction address.
///
/// Building the table never touches target memory; applying it does. The build is a
/// pure function of `(FDE, target address)` - building twice yields identical state.
///
/// # Examples
///
/// ```rust,no_run
/// use std::collections::HashMap;
/// use cfiscope::{ByteOrder, memory::SliceSource, unwind::UnwindTable};
///
/// # fn demo(fde: &cfiscope::cfi::Fde, stack: &[u8]) -> cfiscope::Result<()> {
/// let table = UnwindTable::build(fde, 0x40_0123)?;
///
/// let mut registers = HashMap::new();
/// registers.insert("rsp".to_string(), 0x7FFF_0000_u64);
/// let names = ["rax", "rdx", "rcx", "rbx", "rsi", "rdi", "rbp", "rsp"];
///
/// let memory = SliceSource::new(0x7FFF_0000, stack, ByteOrder::LittleEndian, 8);
/// let frame = table.apply(&registers, &names, &memory)?;
/// println!("caller sp = 0x{:x}", frame.frame_address);
/// # Ok(())
/// # }
/// ```
pub struct UnwindTable {
    state: RuleState,
    cie: CieRc,
}

impl UnwindTable {
    /// Replay the CIE and FDE instruction streams up to `target_ip`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for structurally invalid instruction
    /// streams (truncated operands, `def_cfa_register`/`def_cfa_offset` with no prior
    /// CFA rule, unbalanced `restore_state`), and [`crate::Error::UnsupportedEncoding`]
    /// if the FDE's base address cannot be resolved.
    pub fn build(fde: &Fde, target_ip: u64) -> Result<UnwindTable> {
        let cie = fde.cie.clone();
        let mut interpreter = Interpreter::new(&cie);

        // CIE rules apply to every address the CIE governs.
        interpreter.run(&cie.initial_instructions, 0, u64::MAX)?;
        interpreter.cie_registers = interpreter.state.registers.clone();

        interpreter.run(&fde.instructions, fde.base_address()?, target_ip)?;

        Ok(UnwindTable {
            state: interpreter.state,
            cie,
        })
    }

    /// The accumulated rule state.
    #[must_use]
    pub fn rule_state(&self) -> &RuleState {
        &self.state
    }

    /// Recover the caller frame from a register snapshot.
    ///
    /// `names` is the architecture's DWARF-number → register-name array. All rule
    /// inputs are read from the snapshot as given; results commit together at the
    /// end, so rules never observe each other's output. A memory fault while reading
    /// one register's saved value drops that register from the result instead of
    /// failing the step.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if no CFA rule was established for the
    /// target address.
    pub fn apply(
        &self,
        registers: &HashMap<String, u64>,
        names: &[&str],
        memory: &dyn MemorySource,
    ) -> Result<FrameState> {
        let Some(cfa_rule) = self.state.cfa else {
            return Err(malformed_error!("no CFA rule in effect at target address"));
        };

        let mut bank = crate::unwind::registers::RegisterBank::from_named(registers, names);

        let base = bank.get(cfa_rule.register).unwrap_or(0);
        let cfa = base.wrapping_add_signed(cfa_rule.offset);

        // Phase one: evaluate every rule against the pre-step bank.
        let mut pending = Vec::with_capacity(self.state.registers.len());
        for (&register, &rule) in &self.state.registers {
            let value = match rule {
                RegisterRule::Undefined => None,
                RegisterRule::SameValue => bank.get(register),
                RegisterRule::Register(source) => bank.get(source),
                RegisterRule::CfaOffset(offset) => {
                    let address = cfa.wrapping_add_signed(offset);
                    match memory.read_pointer(address) {
                        Ok(value) => Some(value),
                        Err(err) => {
                            debug!(
                                register,
                                address,
                                error = %err,
                                "saved register value unreadable, leaving register unknown"
                            );
                            None
                        }
                    }
                }
            };
            pending.push((register, value));
        }

        // Phase two: commit.
        for (register, value) in pending {
            bank.set(register, value);
        }

        let return_address = bank
            .get(self.cie.return_address_register)
            .unwrap_or_default();

        Ok(FrameState {
            registers: bank.to_named(names),
            frame_address: cfa,
            return_address,
        })
    }
}

/// One instruction-stream replay invocation. The save/restore stack is owned here,
/// never shared.
struct Interpreter {
    state: RuleState,
    cie_registers: BTreeMap<u64, RegisterRule>,
    saved: Vec<RuleState>,
    current_address: u64,
    code_alignment_factor: u64,
    data_alignment_factor: i64,
    byte_order: ByteOrder,
    word_size: u8,
}

impl Interpreter {
    fn new(cie: &CieRc) -> Interpreter {
        Interpreter {
            state: RuleState::default(),
            cie_registers: BTreeMap::new(),
            saved: Vec::new(),
            current_address: 0,
            code_alignment_factor: cie.code_alignment_factor,
            data_alignment_factor: cie.data_alignment_factor,
            byte_order: cie.byte_order,
            word_size: cie.word_size,
        }
    }

    /// Replay one instruction stream, stopping once the current address passes
    /// `target` or the stream ends.
    fn run(&mut self, instructions: &[u8], start_address: u64, target: u64) -> Result<()> {
        self.current_address = start_address;

        let mut parser = Parser::with_layout(instructions, self.byte_order, self.word_size);

        while parser.has_more_data() && target >= self.current_address {
            match self.step(&mut parser)? {
                Control::Continue => {}
                Control::Stop => break,
            }
        }
        Ok(())
    }

    fn step(&mut self, parser: &mut Parser<'_>) -> Result<Control> {
        let byte = parser.read::<u8>()?;

        match byte >> 6 {
            0b01 => {
                self.advance(u64::from(byte & 0x3F));
                return Ok(Control::Continue);
            }
            0b10 => {
                let offset = parser.read_uleb128()?;
                self.offset_rule(u64::from(byte & 0x3F), offset);
                return Ok(Control::Continue);
            }
            0b11 => {
                // restore: reinstating the single-register CIE rule is a known
                // incompleteness; the operand is in the opcode byte, so the
                // stream stays in sync.
                let register = u64::from(byte & 0x3F);
                debug!(
                    register,
                    has_cie_rule = self.cie_registers.contains_key(&register),
                    "restore instruction ignored"
                );
                return Ok(Control::Continue);
            }
            _ => {}
        }

        match byte {
            opcode::NOP => {}
            opcode::SET_LOC => {
                self.current_address = parser.read_pointer()?;
            }
            opcode::ADVANCE_LOC1 => {
                let delta = parser.read::<u8>()?;
                self.advance(u64::from(delta));
            }
            opcode::ADVANCE_LOC2 => {
                let delta = parser.read::<u16>()?;
                self.advance(u64::from(delta));
            }
            opcode::ADVANCE_LOC4 => {
                let delta = parser.read::<u32>()?;
                self.advance(u64::from(delta));
            }
            opcode::OFFSET_EXTENDED => {
                let register = parser.read_uleb128()?;
                let offset = parser.read_uleb128()?;
                self.offset_rule(register, offset);
            }
            opcode::OFFSET_EXTENDED_SF => {
                let register = parser.read_uleb128()?;
                let offset = parser.read_sleb128()?;
                self.state.set_register(
                    register,
                    RegisterRule::CfaOffset(offset.wrapping_mul(self.data_alignment_factor)),
                );
            }
            opcode::RESTORE_EXTENDED => {
                let register = parser.read_uleb128()?;
                debug!(register, "restore_extended instruction ignored");
            }
            opcode::UNDEFINED => {
                let register = parser.read_uleb128()?;
                self.state.set_register(register, RegisterRule::Undefined);
            }
            opcode::SAME_VALUE => {
                let register = parser.read_uleb128()?;
                self.state.set_register(register, RegisterRule::SameValue);
            }
            opcode::REGISTER => {
                let dest = parser.read_uleb128()?;
                let source = parser.read_uleb128()?;
                self.state.set_register(dest, RegisterRule::Register(source));
            }
            opcode::REMEMBER_STATE => {
                self.saved.push(self.state.clone());
            }
            opcode::RESTORE_STATE => {
                let Some(previous) = self.saved.pop() else {
                    return Err(malformed_error!(
                        "restore_state with no matching remember_state"
                    ));
                };
                self.state = previous;
            }
            opcode::DEF_CFA => {
                let register = parser.read_uleb128()?;
                let offset = parser.read_uleb128()?;
                #[allow(clippy::cast_possible_wrap)]
                let offset = offset as i64;
                self.state.cfa = Some(CfaRule { register, offset });
            }
            opcode::DEF_CFA_SF => {
                let register = parser.read_uleb128()?;
                let offset = parser.read_sleb128()?;
                self.state.cfa = Some(CfaRule {
                    register,
                    offset: offset.wrapping_mul(self.data_alignment_factor),
                });
            }
            opcode::DEF_CFA_REGISTER => {
                let register = parser.read_uleb128()?;
                let Some(cfa) = self.state.cfa.as_mut() else {
                    return Err(malformed_error!("def_cfa_register with no prior CFA rule"));
                };
                cfa.register = register;
            }
            opcode::DEF_CFA_OFFSET => {
                let offset = parser.read_uleb128()?;
                let Some(cfa) = self.state.cfa.as_mut() else {
                    return Err(malformed_error!("def_cfa_offset with no prior CFA rule"));
                };
                #[allow(clippy::cast_possible_wrap)]
                {
                    cfa.offset = offset as i64;
                }
            }
            opcode::DEF_CFA_OFFSET_SF => {
                let offset = parser.read_sleb128()?;
                let Some(cfa) = self.state.cfa.as_mut() else {
                    return Err(malformed_error!(
                        "def_cfa_offset_sf with no prior CFA rule"
                    ));
                };
                cfa.offset = offset.wrapping_mul(self.data_alignment_factor);
            }
            opcode::DEF_CFA_EXPRESSION => {
                let length = parser.read_uleb128()?;
                self.skip_block(parser, length)?;
                self.unsupported(UnsupportedInstruction::DefCfaExpression);
            }
            opcode::EXPRESSION => {
                let _register = parser.read_uleb128()?;
                let length = parser.read_uleb128()?;
                self.skip_block(parser, length)?;
                self.unsupported(UnsupportedInstruction::Expression);
            }
            opcode::VAL_EXPRESSION => {
                let _register = parser.read_uleb128()?;
                let length = parser.read_uleb128()?;
                self.skip_block(parser, length)?;
                self.unsupported(UnsupportedInstruction::ValExpression);
            }
            opcode::VAL_OFFSET => {
                let _register = parser.read_uleb128()?;
                let _offset = parser.read_uleb128()?;
                self.unsupported(UnsupportedInstruction::ValOffset);
            }
            opcode::VAL_OFFSET_SF => {
                let _register = parser.read_uleb128()?;
                let _offset = parser.read_sleb128()?;
                self.unsupported(UnsupportedInstruction::ValOffsetSf);
            }
            _ => {
                // Operand width of an unknown opcode is unknowable; the stream
                // cannot be resynchronised past this point.
                warn!(
                    opcode = byte,
                    offset = parser.pos(),
                    "unknown call frame instruction, stopping replay"
                );
                return Ok(Control::Stop);
            }
        }

        Ok(Control::Continue)
    }

    fn advance(&mut self, delta: u64) {
        self.current_address = self
            .current_address
            .wrapping_add(delta.wrapping_mul(self.code_alignment_factor));
    }

    #[allow(clippy::cast_possible_wrap)]
    fn offset_rule(&mut self, register: u64, factored_offset: u64) {
        let offset = (factored_offset as i64).wrapping_mul(self.data_alignment_factor);
        self.state
            .set_register(register, RegisterRule::CfaOffset(offset));
    }

    fn skip_block(&self, parser: &mut Parser<'_>, length: u64) -> Result<()> {
        let length = usize::try_from(length)
            .map_err(|_| malformed_error!("expression block length overflows"))?;
        parser.advance_by(length)
    }

    fn unsupported(&self, instruction: UnsupportedInstruction) {
        warn!(
            instruction = %instruction,
            address = self.current_address,
            "unsupported call frame instruction skipped"
        );
    }
}
