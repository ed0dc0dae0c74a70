use thiserror::Error;
use typed_builder::TypedBuilder;

use crate::isa::{IllegalInstruction, Instruction, Opcode, Sel};
use crate::{AUX_PAYLOAD_MASK, NO_BRANCH, STATUS_SHIFT};

/// Register file: two general-purpose registers plus the accumulator.
///
/// Everything is 8 bits wide; arithmetic wraps and shifts truncate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Registers {
    pub a: u8,
    pub b: u8,
    pub acc: u8,
}

/// 2-bit status code on the top of the status/aux bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    NotReady = 0b00,
    Error = 0b01,
    Valid = 0b10,
}

impl Status {
    /// The consumer contract is "10 means valid"; every other code is some
    /// flavour of not-a-result.
    pub fn from_bits(bits: u8) -> Status {
        match bits & 0b11 {
            0b10 => Status::Valid,
            0b00 => Status::NotReady,
            _ => Status::Error,
        }
    }
}

/// Result/status pair exposed once an instruction's latency window closes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Report {
    pub status: Status,
    /// Primary result bus value. Undefined (held at 0) when status is an
    /// error; the hardware left the bus high-impedance.
    pub result: u8,
    /// 6-bit auxiliary payload: branch target index, or [`NO_BRANCH`].
    pub aux: u8,
}

impl Report {
    fn valid(result: u8, aux: u8) -> Report {
        Report {
            status: Status::Valid,
            result,
            aux: aux & AUX_PAYLOAD_MASK,
        }
    }

    fn error() -> Report {
        Report {
            status: Status::Error,
            result: 0,
            aux: 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.status == Status::Valid
    }

    /// Branch target for the external sequencer, when one was reported.
    pub fn branch_target(&self) -> Option<u8> {
        (self.is_valid() && self.aux != NO_BRANCH).then_some(self.aux)
    }

    /// The report as it appears on the 8-bit status/aux bus.
    pub fn status_word(&self) -> u8 {
        ((self.status as u8) << STATUS_SHIFT) | (self.aux & AUX_PAYLOAD_MASK)
    }
}

/// Phase of the instruction state machine, as seen after a clock tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// Waiting for the immediate byte to be driven onto the bus.
    LatchImmediate,
    /// Executing; the payload is the number of cycles left in the window.
    Execute(u8),
    /// The report just became visible. Transient; the core is ready for a
    /// new instruction on the next cycle.
    Report,
}

/// What one clock tick did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickOutcome {
    pub phase: Phase,
    /// Present exactly on the tick that reaches the report phase.
    pub report: Option<Report>,
}

/// Bus protocol violations. The original hardware has no channel for these;
/// the software model surfaces them as typed errors instead of guessing.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CoreError {
    #[error("core is disabled")]
    Disabled,
    #[error("core is still settling after reset")]
    Settling,
    #[error("instruction applied while another is in flight")]
    Busy,
    #[error("immediate byte was not supplied in its latch window")]
    MissingImmediate,
    #[error("immediate byte supplied outside its latch window")]
    UnexpectedImmediate,
}

/// Timing knobs for the core.
///
/// The 5-cycle latency is inferred from the stimulus timing of the original
/// bench, not from a datasheet, so it stays tunable.
#[derive(TypedBuilder, Clone, Copy, Debug)]
pub struct CoreConfig {
    /// Clock cycles from the instruction latch to the report, inclusive.
    /// Uniform across opcodes; instructions without an immediate spend the
    /// spare cycle executing.
    #[builder(default = 5)]
    pub latency: u8,
    /// Cycles the core ignores input after a reset release.
    #[builder(default = 1)]
    pub settle_cycles: u8,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig::builder().build()
    }
}

/// Instruction currently in flight, latched until its window closes.
#[derive(Clone, Copy, Debug)]
struct InFlight {
    instr: Instruction,
    /// Set when the word decoded to an operand combination the opcode
    /// forbids; execution then degenerates to an error report.
    fault: Option<IllegalInstruction>,
    imm: Option<u8>,
}

/// The reconstructed execution core: fetch/decode/execute/report state
/// machine around the three-register file.
///
/// One instruction is in flight at a time. The caller drives the clock via
/// [`tick`] and the input bus via [`apply`] / [`apply_immediate`]; the only
/// observable outputs are the result and status buses.
///
/// [`tick`]: Core::tick
/// [`apply`]: Core::apply
/// [`apply_immediate`]: Core::apply_immediate
#[derive(Debug)]
pub struct Core {
    cfg: CoreConfig,
    regs: Registers,
    enabled: bool,
    /// Settle cycles remaining after a reset release.
    settle: u8,
    phase: Phase,
    pending_word: Option<u8>,
    pending_imm: Option<u8>,
    current: Option<InFlight>,
    report: Option<Report>,
}

impl Default for Core {
    fn default() -> Self {
        Core::new(CoreConfig::default())
    }
}

impl Core {
    pub fn new(cfg: CoreConfig) -> Core {
        assert!(
            cfg.latency >= 3,
            "latency must cover the latch, immediate and report cycles"
        );
        Core {
            cfg,
            regs: Registers::default(),
            enabled: true,
            settle: 0,
            phase: Phase::Idle,
            pending_word: None,
            pending_imm: None,
            current: None,
            report: None,
        }
    }

    pub fn config(&self) -> CoreConfig {
        self.cfg
    }

    /// Snapshot of the register file. Writeback is atomic, so mid-window
    /// observations always show the pre-instruction state.
    pub fn registers(&self) -> Registers {
        self.regs
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The enable pin. While deasserted the core ignores clocks and rejects
    /// bus input.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Report from the last completed instruction, held until the next
    /// instruction is latched or reset is asserted.
    pub fn report(&self) -> Option<Report> {
        self.report
    }

    /// Result bus: defined only while a report is held.
    pub fn result_bus(&self) -> Option<u8> {
        self.report.map(|r| r.result)
    }

    /// Status/aux bus value; reads as not-ready (all zero) between reports.
    pub fn status_bus(&self) -> u8 {
        self.report.map(|r| r.status_word()).unwrap_or(0)
    }

    /// Assert reset: clears the register file, discards any in-flight
    /// instruction and held report, and starts the settle period. Overrides
    /// every other behavior, from any phase.
    pub fn reset(&mut self) {
        self.regs = Registers::default();
        self.phase = Phase::Idle;
        self.pending_word = None;
        self.pending_imm = None;
        self.current = None;
        self.report = None;
        self.settle = self.cfg.settle_cycles;
        log::debug!("core reset, settling for {} cycle(s)", self.settle);
    }

    /// Drive an instruction word onto the bus; it is latched by the next
    /// tick. Rejected while a prior instruction is still in flight.
    pub fn apply(&mut self, word: u8) -> Result<(), CoreError> {
        if !self.enabled {
            return Err(CoreError::Disabled);
        }
        if self.settle > 0 {
            return Err(CoreError::Settling);
        }
        if self.phase != Phase::Idle || self.pending_word.is_some() {
            return Err(CoreError::Busy);
        }
        self.pending_word = Some(word);
        Ok(())
    }

    /// Drive the immediate byte; legal exactly one cycle after an
    /// immediate-consuming instruction word was latched.
    pub fn apply_immediate(&mut self, byte: u8) -> Result<(), CoreError> {
        if !self.enabled {
            return Err(CoreError::Disabled);
        }
        if self.phase != Phase::LatchImmediate || self.pending_imm.is_some() {
            return Err(CoreError::UnexpectedImmediate);
        }
        self.pending_imm = Some(byte);
        Ok(())
    }

    /// Advance the state machine by one clock cycle.
    ///
    /// Returns the phase reached and, on the tick that closes an
    /// instruction's latency window, its report.
    pub fn tick(&mut self) -> Result<TickOutcome, CoreError> {
        if !self.enabled {
            return Ok(TickOutcome {
                phase: self.phase,
                report: None,
            });
        }
        if self.settle > 0 {
            self.settle -= 1;
            return Ok(TickOutcome {
                phase: Phase::Idle,
                report: None,
            });
        }
        match self.phase {
            Phase::Idle => {
                if let Some(word) = self.pending_word.take() {
                    self.latch(word);
                }
                Ok(TickOutcome {
                    phase: self.phase,
                    report: None,
                })
            }
            Phase::LatchImmediate => match self.pending_imm.take() {
                Some(byte) => {
                    if let Some(cur) = self.current.as_mut() {
                        cur.imm = Some(byte);
                    }
                    self.phase = Phase::Execute(self.cfg.latency - 2);
                    Ok(TickOutcome {
                        phase: self.phase,
                        report: None,
                    })
                }
                None => {
                    // Abort the instruction rather than execute on garbage;
                    // the register file stays intact.
                    self.current = None;
                    self.phase = Phase::Idle;
                    Err(CoreError::MissingImmediate)
                }
            },
            Phase::Execute(left) if left > 1 => {
                self.phase = Phase::Execute(left - 1);
                Ok(TickOutcome {
                    phase: self.phase,
                    report: None,
                })
            }
            Phase::Execute(_) => {
                let report = match self.current.take() {
                    Some(cur) => self.execute(cur),
                    None => unreachable!("execute phase without a latched instruction"),
                };
                self.report = Some(report);
                self.phase = Phase::Idle;
                Ok(TickOutcome {
                    phase: Phase::Report,
                    report: Some(report),
                })
            }
            Phase::Report => {
                // Report is only ever returned from a tick, never rested in.
                unreachable!("report phase is transient")
            }
        }
    }

    fn latch(&mut self, word: u8) {
        self.report = None;
        let instr = Instruction::decode(word);
        let fault = instr.validate().err();
        log::trace!("latched {:#04x}: {}", word, instr);
        // Illegal words never open an immediate window; the driver of one
        // cannot know whether the opcode would have wanted a byte.
        let needs_imm = fault.is_none() && instr.needs_immediate();
        self.current = Some(InFlight { instr, fault, imm: None });
        self.phase = if needs_imm {
            Phase::LatchImmediate
        } else {
            Phase::Execute(self.cfg.latency - 1)
        };
    }

    /// Operand in a value position; `00` selects the latched immediate.
    fn value(&self, sel: Sel, imm: u8) -> u8 {
        match sel {
            Sel::Imm => imm,
            Sel::RegA => self.regs.a,
            Sel::RegB => self.regs.b,
            Sel::Acc => self.regs.acc,
        }
    }

    /// Operand in a register position. Validation rejects the immediate
    /// selector here before execution is reached.
    fn reg(&self, sel: Sel) -> u8 {
        match sel {
            Sel::Imm => 0,
            Sel::RegA => self.regs.a,
            Sel::RegB => self.regs.b,
            Sel::Acc => self.regs.acc,
        }
    }

    fn write(&mut self, dest: Sel, val: u8) {
        match dest {
            Sel::Imm => {}
            Sel::RegA => self.regs.a = val,
            Sel::RegB => self.regs.b = val,
            Sel::Acc => self.regs.acc = val,
        }
    }

    /// Run the latched instruction to completion. Called once, on the final
    /// cycle of the window; this is where the atomic writeback happens.
    fn execute(&mut self, cur: InFlight) -> Report {
        if let Some(fault) = cur.fault {
            log::debug!("illegal instruction: {}", fault);
            return Report::error();
        }
        let Instruction {
            opcode,
            source_1,
            source_2,
        } = cur.instr;
        // Legal immediate-consuming instructions always latched a byte.
        let imm = cur.imm.unwrap_or(0);
        match opcode {
            Opcode::NoOp => Report::valid(0, NO_BRANCH),
            Opcode::Add => self.alu(self.reg(source_1).wrapping_add(self.value(source_2, imm))),
            Opcode::Sub => self.alu(self.reg(source_1).wrapping_sub(self.value(source_2, imm))),
            Opcode::Shl => self.alu(self.reg(source_1) << 1),
            Opcode::Shr => self.alu(self.reg(source_1) >> 1),
            Opcode::And => self.alu(self.reg(source_1) & self.value(source_2, imm)),
            Opcode::Or => self.alu(self.reg(source_1) | self.value(source_2, imm)),
            Opcode::Xor => self.alu(self.reg(source_1) ^ self.value(source_2, imm)),
            Opcode::Not => self.alu(!self.reg(source_1)),
            Opcode::Greater => {
                self.alu((self.reg(source_1) > self.value(source_2, imm)) as u8)
            }
            Opcode::Less => self.alu((self.reg(source_1) < self.value(source_2, imm)) as u8),
            Opcode::Equal => {
                self.alu((self.reg(source_1) == self.value(source_2, imm)) as u8)
            }
            Opcode::Jump => Report::valid(1, imm),
            Opcode::Load => {
                let val = self.value(source_2, imm);
                self.write(source_1, val);
                Report::valid(val, NO_BRANCH)
            }
            Opcode::Bez => self.branch(self.reg(source_1) == 0, imm),
            Opcode::Bnez => self.branch(self.reg(source_1) != 0, imm),
        }
    }

    /// ALU results always land in the accumulator.
    fn alu(&mut self, val: u8) -> Report {
        self.regs.acc = val;
        Report::valid(val, NO_BRANCH)
    }

    /// Control flow reports the target on the aux bus and a taken flag on
    /// the result bus; the core itself keeps no program counter.
    fn branch(&mut self, taken: bool, target: u8) -> Report {
        if taken {
            Report::valid(1, target)
        } else {
            Report::valid(0, NO_BRANCH)
        }
    }
}
