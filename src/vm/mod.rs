use std::fmt;
use std::io::{self, Write};

use crate::table::SymbolTable;

/// Operand stack capacity. Push faults with `StackOverflow` once the stack
/// would reach this size.
pub const VM_STACK_CAP: usize = 512;

// ── Registers ───────────────────────────────────────────────────────

/// The fixed register file. Register ids travel as plain `u64` words on the
/// operand stack during the call sequence, hence the explicit encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Reg {
    /// Instruction pointer.
    Ip = 0,
    /// Frame pointer: base stack position of the executing call.
    Fp = 1,
    /// Stack-pointer mirror, kept equal to the operand stack's length.
    /// Writing to it resizes the stack to match.
    Sp = 2,
    /// Return address.
    Ra = 3,
    /// Accumulator: function results pass through here.
    Rax = 4,
    /// Scratch register used to stage the frame base during calls.
    Cpsr = 5,
}

pub const REG_COUNT: usize = 6;

impl Reg {
    pub fn as_u64(self) -> u64 {
        self as u64
    }

    pub fn from_u64(id: u64) -> Option<Reg> {
        match id {
            0 => Some(Reg::Ip),
            1 => Some(Reg::Fp),
            2 => Some(Reg::Sp),
            3 => Some(Reg::Ra),
            4 => Some(Reg::Rax),
            5 => Some(Reg::Cpsr),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Reg::Ip => "ip",
            Reg::Fp => "fp",
            Reg::Sp => "sp",
            Reg::Ra => "ra",
            Reg::Rax => "rax",
            Reg::Cpsr => "cpsr",
        }
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Tagged values ───────────────────────────────────────────────────

/// A tagged machine word. Exactly one variant is active; every consumer
/// matches on the tag instead of assuming a representation.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub enum Word<'src> {
    U64(u64),
    I64(i64),
    F64(f64),
    /// View into the source text (identifier names, string literals).
    Str(&'src str),
}

impl<'src> Word<'src> {
    /// Unsigned reading of the word. Strings have none.
    pub fn to_u64(self) -> Result<u64, VmFault> {
        match self {
            Word::U64(v) => Ok(v),
            Word::I64(v) => Ok(v as u64),
            Word::F64(v) => Ok(v as u64),
            Word::Str(_) => Err(VmFault::TypeMismatch { wanted: "number", found: "string" }),
        }
    }

    pub fn to_f64(self) -> Result<f64, VmFault> {
        match self {
            Word::U64(v) => Ok(v as f64),
            Word::I64(v) => Ok(v as f64),
            Word::F64(v) => Ok(v),
            Word::Str(_) => Err(VmFault::TypeMismatch { wanted: "float", found: "string" }),
        }
    }
}

impl fmt::Display for Word<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Unsigned words print through the signed reading, so a wrapped
            // negation shows up as a negative number.
            Word::U64(v) => write!(f, "{}", *v as i64),
            Word::I64(v) => write!(f, "{}", v),
            Word::F64(v) => write!(f, "{}", v),
            Word::Str(s) => f.write_str(s),
        }
    }
}

// ── Instructions ────────────────────────────────────────────────────

/// One bytecode instruction. The operand's type is fixed by the opcode:
/// jumps carry an absolute program offset, global ops a name, local ops a
/// stack offset, register ops a register id.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub enum Inst<'src> {
    Push(Word<'src>),
    Pop,

    Add,
    /// Float-tagged addition; emitted when the left operand was lexically a
    /// float literal.
    AddF,
    Sub,
    Mul,
    Div,

    Eq,
    Ne,
    Gt,
    Lt,

    Neg,
    Print,

    /// Bind the top-of-stack value to a global name.
    DefGlobal(&'src str),
    /// Duplicate the value at an absolute stack offset, materializing a new
    /// local binding from an existing stack position.
    DefLocal(u64),
    LoadGlobal(&'src str),
    /// Push the value at the frame-pointer-relative offset.
    LoadLocal(u64),

    Jump(u64),
    JumpIf(u64),
    JumpIfNot(u64),
    Ret,

    /// Push a register's value.
    Load(Reg),
    /// Pop the top of stack into a register.
    Store(Reg),
    /// Pop a register id off the stack and copy that source register into
    /// the named destination register.
    Mov(Reg),

    Halt,
}

impl Inst<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Inst::Push(_) => "push",
            Inst::Pop => "pop",
            Inst::Add => "plus",
            Inst::AddF => "plusf",
            Inst::Sub => "minus",
            Inst::Mul => "mult",
            Inst::Div => "div",
            Inst::Eq => "eq",
            Inst::Ne => "ne",
            Inst::Gt => "gt",
            Inst::Lt => "lt",
            Inst::Neg => "neg",
            Inst::Print => "print",
            Inst::DefGlobal(_) => "defg",
            Inst::DefLocal(_) => "defl",
            Inst::LoadGlobal(_) => "varg",
            Inst::LoadLocal(_) => "varl",
            Inst::Jump(_) => "jmpa",
            Inst::JumpIf(_) => "jmpt",
            Inst::JumpIfNot(_) => "jmpnt",
            Inst::Ret => "ret",
            Inst::Load(_) => "ldr",
            Inst::Store(_) => "str",
            Inst::Mov(_) => "mov",
            Inst::Halt => "eof",
        }
    }
}

impl fmt::Display for Inst<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inst::Push(word) => write!(f, "{} {}", self.name(), word),
            Inst::DefGlobal(name) | Inst::LoadGlobal(name) => {
                write!(f, "{} {}", self.name(), name)
            }
            Inst::DefLocal(offset) | Inst::LoadLocal(offset) => {
                write!(f, "{} {}", self.name(), offset)
            }
            Inst::Jump(target) | Inst::JumpIf(target) | Inst::JumpIfNot(target) => {
                write!(f, "{} {}", self.name(), target)
            }
            Inst::Load(reg) | Inst::Store(reg) | Inst::Mov(reg) => {
                write!(f, "{} {}", self.name(), reg)
            }
            _ => f.write_str(self.name()),
        }
    }
}

// ── Faults ──────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum VmFault {
    #[error("stack overflow")]
    StackOverflow,
    #[error("stack underflow")]
    StackUnderflow,
    #[error("illegal stack offset {offset}")]
    IllegalStackOffset { offset: u64 },
    #[error("illegal jump target {target}")]
    IllegalJumpTarget { target: u64 },
    #[error("division by zero")]
    DivisionByZero,
    #[error("undefined global: {name}")]
    UndefinedGlobal { name: String },
    #[error("illegal register id {id}")]
    IllegalRegister { id: u64 },
    #[error("type mismatch: wanted {wanted}, found {found}")]
    TypeMismatch { wanted: &'static str, found: &'static str },
    #[error("write failed: {0}")]
    Io(#[from] io::Error),
}

/// A fault together with the instruction pointer at the time it was raised.
#[derive(Debug, thiserror::Error)]
#[error("fault at instruction {ip}: {fault}")]
pub struct VmError {
    pub ip: u64,
    pub fault: VmFault,
}

type Exec<T> = Result<T, VmFault>;

// ── The machine ─────────────────────────────────────────────────────

/// Executes an instruction program against an operand stack, the register
/// file, and a symbol table holding global bindings. Output from `print`
/// goes through the supplied writer.
///
/// Calls follow a fixed convention: the caller saves `fp`, `ra`, and `cpsr`
/// on the stack, stages the new frame base in `cpsr` (the stack position
/// where the first argument lands), pushes the arguments, moves `cpsr` into
/// `fp`, stores the return address, and jumps to the entry offset. Saving
/// `cpsr` lets calls nest in argument position. The callee leaves its result
/// in `rax` and returns through `ra`; the caller drops the arguments,
/// restores `sp`, `cpsr`, `ra`, and `fp`, and pushes `rax` as the call's
/// value.
pub struct Vm<'src, W = io::Stdout> {
    program: Vec<Inst<'src>>,
    stack: Vec<Word<'src>>,
    regs: [Word<'src>; REG_COUNT],
    globals: SymbolTable<Word<'src>>,
    out: W,
}

impl<'src> Vm<'src> {
    pub fn new() -> Self {
        Vm::with_output(io::stdout())
    }
}

impl<'src> Default for Vm<'src> {
    fn default() -> Self {
        Vm::new()
    }
}

impl<'src, W: Write> Vm<'src, W> {
    pub fn with_output(out: W) -> Self {
        Vm {
            program: Vec::new(),
            stack: Vec::new(),
            regs: [Word::U64(0); REG_COUNT],
            globals: SymbolTable::new(),
            out,
        }
    }

    /// Copy a finished program in. Backpatching is complete by this point;
    /// the VM never mutates instructions.
    pub fn load(&mut self, program: Vec<Inst<'src>>) {
        self.program = program;
        self.regs = [Word::U64(0); REG_COUNT];
        self.stack.clear();
    }

    pub fn stack(&self) -> &[Word<'src>] {
        &self.stack
    }

    pub fn globals(&self) -> &SymbolTable<Word<'src>> {
        &self.globals
    }

    pub fn into_output(self) -> W {
        self.out
    }

    fn reg_u64(&self, reg: Reg) -> Exec<u64> {
        self.regs[reg as usize].to_u64()
    }

    fn push(&mut self, word: Word<'src>) -> Exec<()> {
        if self.stack.len() + 1 >= VM_STACK_CAP {
            return Err(VmFault::StackOverflow);
        }
        self.stack.push(word);
        self.regs[Reg::Sp as usize] = Word::U64(self.stack.len() as u64);
        Ok(())
    }

    fn pop(&mut self) -> Exec<Word<'src>> {
        let word = self.stack.pop().ok_or(VmFault::StackUnderflow)?;
        self.regs[Reg::Sp as usize] = Word::U64(self.stack.len() as u64);
        Ok(word)
    }

    fn peek(&self) -> Exec<Word<'src>> {
        self.stack.last().copied().ok_or(VmFault::StackUnderflow)
    }

    /// Top two operands as (second-from-top, top).
    fn pop_pair(&mut self) -> Exec<(Word<'src>, Word<'src>)> {
        if self.stack.len() < 2 {
            return Err(VmFault::StackUnderflow);
        }
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        Ok((lhs, rhs))
    }

    /// A write to sp resizes the operand stack. The stack cannot grow this
    /// way; values would have to come from nowhere.
    fn sync_sp(&mut self) -> Exec<()> {
        let sp = self.reg_u64(Reg::Sp)?;
        if sp > self.stack.len() as u64 {
            return Err(VmFault::IllegalStackOffset { offset: sp });
        }
        self.stack.truncate(sp as usize);
        Ok(())
    }

    fn checked_target(&self, target: u64) -> Exec<u64> {
        if target >= self.program.len() as u64 {
            return Err(VmFault::IllegalJumpTarget { target });
        }
        Ok(target)
    }

    /// Run the fetch-decode-execute loop until `Halt` or a fault. A fault
    /// stops the loop and reports the offset of the faulting instruction.
    pub fn run(&mut self) -> Result<(), VmError> {
        loop {
            let ip = match self.reg_u64(Reg::Ip) {
                Ok(ip) => ip,
                Err(fault) => return Err(VmError { ip: 0, fault }),
            };
            match self.step(ip) {
                Ok(true) => continue,
                Ok(false) => return Ok(()),
                Err(fault) => return Err(VmError { ip, fault }),
            }
        }
    }

    /// Execute the instruction at `ip`. Returns false on `Halt`.
    fn step(&mut self, ip: u64) -> Exec<bool> {
        if ip >= self.program.len() as u64 {
            return Err(VmFault::IllegalJumpTarget { target: ip });
        }
        let inst = self.program[ip as usize];
        self.regs[Reg::Ip as usize] = Word::U64(ip + 1);

        match inst {
            Inst::Push(word) => self.push(word)?,
            Inst::Pop => {
                self.pop()?;
            }

            Inst::Add => {
                let (lhs, rhs) = self.pop_pair()?;
                self.push(Word::U64(lhs.to_u64()?.wrapping_add(rhs.to_u64()?)))?;
            }
            Inst::AddF => {
                let (lhs, rhs) = self.pop_pair()?;
                self.push(Word::F64(lhs.to_f64()? + rhs.to_f64()?))?;
            }
            Inst::Sub => {
                let (lhs, rhs) = self.pop_pair()?;
                self.push(Word::U64(lhs.to_u64()?.wrapping_sub(rhs.to_u64()?)))?;
            }
            Inst::Mul => {
                let (lhs, rhs) = self.pop_pair()?;
                self.push(Word::U64(lhs.to_u64()?.wrapping_mul(rhs.to_u64()?)))?;
            }
            Inst::Div => {
                let (lhs, rhs) = self.pop_pair()?;
                let divisor = rhs.to_u64()?;
                if divisor == 0 {
                    return Err(VmFault::DivisionByZero);
                }
                self.push(Word::U64(lhs.to_u64()? / divisor))?;
            }

            Inst::Eq => {
                let (lhs, rhs) = self.pop_pair()?;
                let eq = word_eq(lhs, rhs)?;
                self.push(Word::U64(eq as u64))?;
            }
            Inst::Ne => {
                let (lhs, rhs) = self.pop_pair()?;
                let eq = word_eq(lhs, rhs)?;
                self.push(Word::U64(!eq as u64))?;
            }
            Inst::Gt => {
                // Second-from-top compared against top: `a > b` holds the
                // compiler's emission order.
                let (lhs, rhs) = self.pop_pair()?;
                let gt = match (lhs, rhs) {
                    (Word::Str(a), Word::Str(b)) => a > b,
                    _ => lhs.to_u64()? > rhs.to_u64()?,
                };
                self.push(Word::U64(gt as u64))?;
            }
            Inst::Lt => {
                let (lhs, rhs) = self.pop_pair()?;
                let lt = match (lhs, rhs) {
                    (Word::Str(a), Word::Str(b)) => a < b,
                    _ => lhs.to_u64()? < rhs.to_u64()?,
                };
                self.push(Word::U64(lt as u64))?;
            }

            Inst::Neg => {
                let top = self.stack.last_mut().ok_or(VmFault::StackUnderflow)?;
                *top = match *top {
                    Word::U64(v) => Word::U64(v.wrapping_neg()),
                    Word::I64(v) => Word::I64(v.wrapping_neg()),
                    Word::F64(v) => Word::F64(-v),
                    Word::Str(_) => {
                        return Err(VmFault::TypeMismatch { wanted: "number", found: "string" })
                    }
                };
            }

            Inst::Print => {
                let top = self.peek()?;
                writeln!(self.out, "{}", top).map_err(VmFault::Io)?;
            }

            Inst::DefGlobal(name) => {
                let value = self.peek()?;
                self.globals.insert(name, value);
            }
            Inst::DefLocal(offset) => {
                if offset >= self.stack.len() as u64 {
                    return Err(VmFault::IllegalStackOffset { offset });
                }
                let word = self.stack[offset as usize];
                self.push(word)?;
            }
            Inst::LoadGlobal(name) => {
                let value = *self
                    .globals
                    .get(name)
                    .map_err(|_| VmFault::UndefinedGlobal { name: name.to_string() })?;
                self.push(value)?;
            }
            Inst::LoadLocal(offset) => {
                let fp = self.reg_u64(Reg::Fp)?;
                let slot = fp + offset;
                if slot >= self.stack.len() as u64 {
                    return Err(VmFault::IllegalStackOffset { offset: slot });
                }
                let word = self.stack[slot as usize];
                self.push(word)?;
            }

            Inst::Jump(target) => {
                let target = self.checked_target(target)?;
                self.regs[Reg::Ip as usize] = Word::U64(target);
            }
            Inst::JumpIf(target) => {
                let cond = self.pop()?.to_u64()?;
                let target = self.checked_target(target)?;
                if cond != 0 {
                    self.regs[Reg::Ip as usize] = Word::U64(target);
                }
            }
            Inst::JumpIfNot(target) => {
                let cond = self.pop()?.to_u64()?;
                let target = self.checked_target(target)?;
                if cond == 0 {
                    self.regs[Reg::Ip as usize] = Word::U64(target);
                }
            }
            Inst::Ret => {
                let ra = self.reg_u64(Reg::Ra)?;
                self.regs[Reg::Ip as usize] = Word::U64(ra);
            }

            Inst::Load(reg) => {
                let value = self.regs[reg as usize];
                self.push(value)?;
            }
            Inst::Store(reg) => {
                let value = self.pop()?;
                self.regs[reg as usize] = value;
                if reg == Reg::Sp {
                    self.sync_sp()?;
                }
            }
            Inst::Mov(dst) => {
                let id = self.pop()?.to_u64()?;
                let src = Reg::from_u64(id).ok_or(VmFault::IllegalRegister { id })?;
                self.regs[dst as usize] = self.regs[src as usize];
                if dst == Reg::Sp {
                    self.sync_sp()?;
                }
            }

            Inst::Halt => return Ok(false),
        }

        Ok(true)
    }
}

/// Equality across tags: strings compare by content, numbers by their
/// unsigned reading, and a string never equals a number.
fn word_eq(lhs: Word<'_>, rhs: Word<'_>) -> Result<bool, VmFault> {
    match (lhs, rhs) {
        (Word::Str(a), Word::Str(b)) => Ok(a == b),
        (Word::Str(_), _) | (_, Word::Str(_)) => Ok(false),
        _ => Ok(lhs.to_u64()? == rhs.to_u64()?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_program<'src>(program: Vec<Inst<'src>>) -> (Vm<'src, Vec<u8>>, Result<(), VmError>) {
        let mut vm = Vm::with_output(Vec::new());
        vm.load(program);
        let result = vm.run();
        (vm, result)
    }

    fn printed(vm: Vm<'_, Vec<u8>>) -> String {
        String::from_utf8(vm.into_output()).unwrap()
    }

    #[test]
    fn push_pop_arithmetic() {
        let (vm, result) = run_program(vec![
            Inst::Push(Word::U64(2)),
            Inst::Push(Word::U64(3)),
            Inst::Mul,
            Inst::Push(Word::U64(1)),
            Inst::Add,
            Inst::Halt,
        ]);
        result.unwrap();
        assert_eq!(vm.stack(), &[Word::U64(7)]);
    }

    #[test]
    fn binary_op_on_short_stack_underflows() {
        for op in [Inst::Add, Inst::AddF, Inst::Sub, Inst::Mul, Inst::Div, Inst::Eq, Inst::Ne, Inst::Gt, Inst::Lt] {
            let (_, result) = run_program(vec![Inst::Push(Word::U64(1)), op, Inst::Halt]);
            let err = result.unwrap_err();
            assert!(
                matches!(err.fault, VmFault::StackUnderflow),
                "{:?} did not underflow",
                op
            );
            assert_eq!(err.ip, 1);
        }
    }

    #[test]
    fn division_by_zero_faults() {
        let (_, result) = run_program(vec![
            Inst::Push(Word::U64(4)),
            Inst::Push(Word::U64(0)),
            Inst::Div,
            Inst::Halt,
        ]);
        assert!(matches!(result.unwrap_err().fault, VmFault::DivisionByZero));
    }

    #[test]
    fn comparison_orders_second_against_top() {
        // push 5, push 3, gt  ⇒  5 > 3
        let (vm, result) = run_program(vec![
            Inst::Push(Word::U64(5)),
            Inst::Push(Word::U64(3)),
            Inst::Gt,
            Inst::Halt,
        ]);
        result.unwrap();
        assert_eq!(vm.stack(), &[Word::U64(1)]);
    }

    #[test]
    fn negate_then_add_wraps_back() {
        // -3 + 5 == 2 through wrapping arithmetic
        let (vm, result) = run_program(vec![
            Inst::Push(Word::U64(3)),
            Inst::Neg,
            Inst::Push(Word::U64(5)),
            Inst::Add,
            Inst::Print,
            Inst::Halt,
        ]);
        result.unwrap();
        assert_eq!(printed(vm), "2\n");
    }

    #[test]
    fn print_inspects_without_consuming() {
        let (vm, result) = run_program(vec![
            Inst::Push(Word::U64(42)),
            Inst::Print,
            Inst::Halt,
        ]);
        result.unwrap();
        assert_eq!(vm.stack().len(), 1);
        assert_eq!(printed(vm), "42\n");
    }

    #[test]
    fn print_formats_every_variant() {
        let (vm, result) = run_program(vec![
            Inst::Push(Word::F64(1.5)),
            Inst::Print,
            Inst::Pop,
            Inst::Push(Word::Str("hi")),
            Inst::Print,
            Inst::Halt,
        ]);
        result.unwrap();
        assert_eq!(printed(vm), "1.5\nhi\n");
    }

    #[test]
    fn float_add_converts_integer_operand() {
        let (vm, result) = run_program(vec![
            Inst::Push(Word::F64(1.5)),
            Inst::Push(Word::U64(2)),
            Inst::AddF,
            Inst::Halt,
        ]);
        result.unwrap();
        assert_eq!(vm.stack(), &[Word::F64(3.5)]);
    }

    #[test]
    fn globals_round_trip_through_the_table() {
        let (vm, result) = run_program(vec![
            Inst::Push(Word::U64(7)),
            Inst::DefGlobal("x"),
            Inst::Pop,
            Inst::LoadGlobal("x"),
            Inst::Halt,
        ]);
        result.unwrap();
        assert_eq!(vm.stack(), &[Word::U64(7)]);
    }

    #[test]
    fn undefined_global_faults_with_name() {
        let (_, result) = run_program(vec![Inst::LoadGlobal("ghost"), Inst::Halt]);
        match result.unwrap_err().fault {
            VmFault::UndefinedGlobal { name } => assert_eq!(name, "ghost"),
            other => panic!("unexpected fault: {:?}", other),
        }
    }

    #[test]
    fn jump_out_of_range_faults() {
        let (_, result) = run_program(vec![Inst::Jump(99), Inst::Halt]);
        assert!(matches!(
            result.unwrap_err().fault,
            VmFault::IllegalJumpTarget { target: 99 }
        ));
    }

    #[test]
    fn conditional_jumps_consume_the_condition() {
        let (vm, result) = run_program(vec![
            Inst::Push(Word::U64(0)),
            Inst::JumpIfNot(3),
            Inst::Push(Word::U64(111)),
            Inst::Push(Word::U64(222)),
            Inst::Halt,
        ]);
        result.unwrap();
        assert_eq!(vm.stack(), &[Word::U64(222)]);
    }

    #[test]
    fn stack_overflow_is_a_fault_not_a_panic() {
        // One push per iteration; the jump back keeps pushing until the
        // capacity check trips.
        let (_, result) = run_program(vec![Inst::Push(Word::U64(1)), Inst::Jump(0)]);
        assert!(matches!(result.unwrap_err().fault, VmFault::StackOverflow));
    }

    #[test]
    fn def_local_duplicates_stack_slot() {
        let (vm, result) = run_program(vec![
            Inst::Push(Word::U64(9)),
            Inst::DefLocal(0),
            Inst::Halt,
        ]);
        result.unwrap();
        assert_eq!(vm.stack(), &[Word::U64(9), Word::U64(9)]);
    }

    #[test]
    fn def_local_out_of_range_faults() {
        let (_, result) = run_program(vec![Inst::DefLocal(3), Inst::Halt]);
        assert!(matches!(
            result.unwrap_err().fault,
            VmFault::IllegalStackOffset { offset: 3 }
        ));
    }

    #[test]
    fn load_local_is_frame_relative() {
        let (vm, result) = run_program(vec![
            Inst::Push(Word::U64(10)),
            Inst::Push(Word::U64(20)),
            // fp := 1
            Inst::Push(Word::U64(1)),
            Inst::Store(Reg::Fp),
            Inst::LoadLocal(0),
            Inst::Halt,
        ]);
        result.unwrap();
        assert_eq!(vm.stack(), &[Word::U64(10), Word::U64(20), Word::U64(20)]);
    }

    #[test]
    fn register_load_store_mov() {
        let (vm, result) = run_program(vec![
            Inst::Push(Word::U64(5)),
            Inst::Store(Reg::Rax),
            // cpsr := rax via mov
            Inst::Push(Word::U64(Reg::Rax.as_u64())),
            Inst::Mov(Reg::Cpsr),
            Inst::Load(Reg::Cpsr),
            Inst::Halt,
        ]);
        result.unwrap();
        assert_eq!(vm.stack(), &[Word::U64(5)]);
    }

    #[test]
    fn mov_with_bad_register_id_faults() {
        let (_, result) = run_program(vec![
            Inst::Push(Word::U64(77)),
            Inst::Mov(Reg::Fp),
            Inst::Halt,
        ]);
        assert!(matches!(
            result.unwrap_err().fault,
            VmFault::IllegalRegister { id: 77 }
        ));
    }

    #[test]
    fn sp_mirror_tracks_stack_length() {
        let (vm, result) = run_program(vec![
            Inst::Push(Word::U64(1)),
            Inst::Push(Word::U64(2)),
            Inst::Pop,
            Inst::Load(Reg::Sp),
            Inst::Halt,
        ]);
        result.unwrap();
        // sp read before the push that materializes it
        assert_eq!(vm.stack(), &[Word::U64(1), Word::U64(1)]);
    }

    #[test]
    fn writing_sp_truncates_the_stack() {
        let (vm, result) = run_program(vec![
            Inst::Push(Word::U64(10)),
            Inst::Push(Word::U64(20)),
            Inst::Push(Word::U64(30)),
            Inst::Push(Word::U64(1)),
            Inst::Store(Reg::Sp),
            Inst::Halt,
        ]);
        result.unwrap();
        assert_eq!(vm.stack(), &[Word::U64(10)]);
    }

    #[test]
    fn growing_sp_by_register_write_faults() {
        let (_, result) = run_program(vec![
            Inst::Push(Word::U64(9)),
            Inst::Store(Reg::Sp),
            Inst::Halt,
        ]);
        assert!(matches!(
            result.unwrap_err().fault,
            VmFault::IllegalStackOffset { offset: 9 }
        ));
    }

    #[test]
    fn ret_follows_the_return_address_register() {
        let (vm, result) = run_program(vec![
            Inst::Push(Word::U64(4)),
            Inst::Store(Reg::Ra),
            Inst::Ret,
            Inst::Push(Word::U64(999)),
            Inst::Halt,
        ]);
        result.unwrap();
        assert_eq!(vm.stack(), &[] as &[Word<'_>]);
    }

    #[test]
    fn fault_reports_the_faulting_ip() {
        let (_, result) = run_program(vec![
            Inst::Push(Word::U64(1)),
            Inst::Pop,
            Inst::Pop,
            Inst::Halt,
        ]);
        let err = result.unwrap_err();
        assert_eq!(err.ip, 2);
    }
}
