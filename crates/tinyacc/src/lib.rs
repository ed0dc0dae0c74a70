use thiserror::Error;

use tinyacc_core::{Core, CoreError, Instruction, Opcode, Registers, Report, Sel, Status};

/// Step cap for a run, from the original bench's runaway guard.
pub const MAX_STEPS: usize = 64;

/// Highest program index a report can name: targets ride the 6-bit aux
/// payload and the all-ones value is reserved for "no branch".
pub const MAX_PROGRAM_LEN: usize = 63;

/// One program position: an instruction word and, when the instruction
/// consumes one, the immediate byte driven on the following cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Step {
    pub instruction: Instruction,
    pub immediate: Option<u8>,
}

impl Step {
    pub fn new(instruction: Instruction, immediate: Option<u8>) -> Step {
        Step {
            instruction,
            immediate,
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ProgramError {
    #[error("program has {len} instructions, more than the {MAX_PROGRAM_LEN} a branch can address")]
    TooLong { len: usize },
    #[error("instruction {index} expects an immediate byte but the stream ended")]
    TruncatedImmediate { index: usize },
}

/// An ordered list of encoded instructions for the sequencer.
///
/// The core has no memory of its own; the program lives out here and the
/// sequencer feeds it in word by word.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Program {
    steps: Vec<Step>,
}

impl Program {
    pub fn from_steps(steps: Vec<Step>) -> Result<Program, ProgramError> {
        if steps.len() > MAX_PROGRAM_LEN {
            return Err(ProgramError::TooLong { len: steps.len() });
        }
        Ok(Program { steps })
    }

    /// Decode a flat byte stream in which each immediate byte directly
    /// follows its instruction word, the same layout the bus sees.
    ///
    /// Illegal instruction words are kept (the core will report them as
    /// errors); they consume no immediate.
    pub fn from_bytes(bytes: &[u8]) -> Result<Program, ProgramError> {
        let mut steps = Vec::new();
        let mut iter = bytes.iter().copied();
        while let Some(word) = iter.next() {
            let instruction = Instruction::decode(word);
            let immediate = if instruction.validate().is_ok() && instruction.needs_immediate() {
                match iter.next() {
                    Some(byte) => Some(byte),
                    None => {
                        return Err(ProgramError::TruncatedImmediate { index: steps.len() })
                    }
                }
            } else {
                None
            };
            steps.push(Step::new(instruction, immediate));
        }
        Program::from_steps(steps)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RunError {
    #[error("core reported an error for instruction {pc}")]
    CoreFault { pc: usize },
    #[error("bus protocol violation: {0}")]
    Protocol(#[from] CoreError),
    #[error("run exceeded the {limit}-step limit")]
    StepLimit { limit: usize },
    #[error("no report surfaced after the full latency window")]
    MissingReport,
}

/// Terminal state of a completed run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub registers: Registers,
    /// Instructions executed, branches included.
    pub steps: usize,
}

/// External sequencer for the core.
///
/// Owns the program counter the hardware never had: the core only reports
/// branch targets, and the runner decides where to fetch next.
pub struct Runner {
    core: Core,
    program: Program,
    max_steps: usize,
}

impl Runner {
    pub fn new(program: Program) -> Runner {
        Runner::with_core(Core::default(), program)
    }

    pub fn with_core(core: Core, program: Program) -> Runner {
        Runner {
            core,
            program,
            max_steps: MAX_STEPS,
        }
    }

    pub fn with_step_limit(mut self, max_steps: usize) -> Runner {
        self.max_steps = max_steps;
        self
    }

    pub fn core(&self) -> &Core {
        &self.core
    }

    /// Reset the core, then execute from index 0 until the program counter
    /// runs off the end, an error status comes back, or the step cap hits.
    pub fn run(&mut self) -> Result<RunSummary, RunError> {
        self.core.reset();
        for _ in 0..self.core.config().settle_cycles {
            self.core.tick()?;
        }

        let mut pc = 0usize;
        let mut executed = 0usize;
        while pc < self.program.len() {
            if executed == self.max_steps {
                return Err(RunError::StepLimit {
                    limit: self.max_steps,
                });
            }
            let step = self.program.steps[pc];
            log::info!("INS {}: {}", pc, step.instruction);
            if let Some(imm) = step.immediate {
                log::info!("IMM: {}", imm);
            }

            let report = self.drive(step)?;
            executed += 1;
            match report.status {
                Status::Valid => log::info!("RES: {:#010b}", report.result),
                _ => {
                    log::info!("ERR: {:#010b}", report.status_word());
                    return Err(RunError::CoreFault { pc });
                }
            }
            pc = match report.branch_target() {
                Some(target) => target as usize,
                None => pc + 1,
            };
        }

        Ok(RunSummary {
            registers: self.core.registers(),
            steps: executed,
        })
    }

    /// One pass of the bus protocol: instruction word, clock, immediate on
    /// the next cycle, clocks until the report surfaces.
    fn drive(&mut self, step: Step) -> Result<Report, RunError> {
        self.core.apply(step.instruction.encode())?;
        let mut report = None;
        for cycle in 0..self.core.config().latency {
            let out = self.core.tick()?;
            if cycle == 0 {
                if let Some(byte) = step.immediate {
                    self.core.apply_immediate(byte)?;
                }
            }
            if out.report.is_some() {
                report = out.report;
            }
        }
        report.ok_or(RunError::MissingReport)
    }
}

/// The countdown program the original bench drove: load 5 into A, count it
/// down to zero through the accumulator, then shift B.
pub fn countdown_demo() -> Program {
    let step = |opcode, s1, s2, imm| Step::new(Instruction::new(opcode, s1, s2), imm);
    let steps = vec![
        step(Opcode::NoOp, Sel::Imm, Sel::Imm, None),
        step(Opcode::Load, Sel::RegA, Sel::Imm, Some(5)),
        step(Opcode::Load, Sel::RegB, Sel::Imm, Some(10)),
        step(Opcode::Sub, Sel::RegA, Sel::Imm, Some(1)),
        step(Opcode::Load, Sel::RegA, Sel::Acc, None),
        // Back to the SUB while A is nonzero.
        step(Opcode::Bnez, Sel::RegA, Sel::Imm, Some(3)),
        step(Opcode::Shl, Sel::RegB, Sel::Imm, None),
    ];
    Program::from_steps(steps).expect("demo program fits the address space")
}
