use crate::language::compiler::scalar::Fun;
use crate::language::types::Type;
use crate::runtime::environment::Env;
use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::value::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::trace;

/// Debug tag naming the source construct an instruction came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    Expr,
    Send,
    Define,
    Assign,
    IncDec,
    Var,
    If,
    For,
    Post,
    Range,
    Switch,
    Case,
    Break,
    Continue,
    Return,
    Block,
    Halt,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Op::Expr => "expr",
            Op::Send => "send",
            Op::Define => "define",
            Op::Assign => "assign",
            Op::IncDec => "incdec",
            Op::Var => "var",
            Op::If => "if",
            Op::For => "for",
            Op::Post => "post",
            Op::Range => "range",
            Op::Switch => "switch",
            Op::Case => "case",
            Op::Break => "break",
            Op::Continue => "continue",
            Op::Return => "return",
            Op::Block => "block",
            Op::Halt => "halt",
        };
        f.write_str(name)
    }
}

pub enum Instr {
    /// Runs an effect and falls through.
    Exec { op: Op, run: Fun<()> },
    /// Leaves `unwind` block scopes, then continues at `target`.
    Jump {
        op: Op,
        target: usize,
        unwind: usize,
    },
    JumpIfFalse {
        op: Op,
        cond: Fun<bool>,
        target: usize,
    },
    EnterScope { op: Op, slots: usize },
    LeaveScope { op: Op },
    Return {
        op: Op,
        values: Option<Fun<Vec<Value>>>,
    },
    Halt,
}

impl Instr {
    pub fn op(&self) -> Op {
        match self {
            Instr::Exec { op, .. }
            | Instr::Jump { op, .. }
            | Instr::JumpIfFalse { op, .. }
            | Instr::EnterScope { op, .. }
            | Instr::LeaveScope { op }
            | Instr::Return { op, .. } => *op,
            Instr::Halt => Op::Halt,
        }
    }
}

impl fmt::Debug for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Exec { op, .. } => write!(f, "exec {op}"),
            Instr::Jump { op, target, unwind } => write!(f, "jump {op} -> {target} (unwind {unwind})"),
            Instr::JumpIfFalse { op, target, .. } => write!(f, "jump-if-false {op} -> {target}"),
            Instr::EnterScope { op, slots } => write!(f, "enter {op} [{slots}]"),
            Instr::LeaveScope { op } => write!(f, "leave {op}"),
            Instr::Return { op, .. } => write!(f, "return {op}"),
            Instr::Halt => write!(f, "halt"),
        }
    }
}

/// Outcome of one instruction.
#[derive(Debug)]
pub enum Step {
    Next,
    Goto { target: usize, unwind: usize },
    Enter(usize),
    Leave,
    Return(Vec<Value>),
    Halt,
}

/// Instruction budget of one top-level call. Every frame the call creates
/// charges the same budget.
#[derive(Debug, Default)]
pub struct StepBudget {
    limit: Option<u64>,
    used: AtomicU64,
}

impl StepBudget {
    pub fn new(limit: Option<u64>) -> Self {
        Self {
            limit,
            used: AtomicU64::new(0),
        }
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Relaxed)
    }

    fn charge(&self) -> RuntimeResult<()> {
        let used = self.used.fetch_add(1, Ordering::Relaxed) + 1;
        match self.limit {
            Some(limit) if used > limit => Err(RuntimeError::StepLimit { limit }),
            _ => Ok(()),
        }
    }
}

/// Flat instruction sequence of one function body.
pub struct Code {
    pub name: String,
    pub instrs: Vec<Instr>,
    pub trace: bool,
}

impl Code {
    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    pub fn ops(&self) -> Vec<Op> {
        self.instrs.iter().map(Instr::op).collect()
    }
}

impl fmt::Debug for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "code {}:", self.name)?;
        for (ip, instr) in self.instrs.iter().enumerate() {
            writeln!(f, "  {ip:4}: {instr:?}")?;
        }
        Ok(())
    }
}

pub fn execute(instr: &Instr, env: &Env) -> RuntimeResult<Step> {
    match instr {
        Instr::Exec { run, .. } => {
            run(env)?;
            Ok(Step::Next)
        }
        Instr::Jump { target, unwind, .. } => Ok(Step::Goto {
            target: *target,
            unwind: *unwind,
        }),
        Instr::JumpIfFalse { cond, target, .. } => {
            if cond(env)? {
                Ok(Step::Next)
            } else {
                Ok(Step::Goto {
                    target: *target,
                    unwind: 0,
                })
            }
        }
        Instr::EnterScope { slots, .. } => Ok(Step::Enter(*slots)),
        Instr::LeaveScope { .. } => Ok(Step::Leave),
        Instr::Return { values, .. } => Ok(Step::Return(match values {
            Some(values) => values(env)?,
            None => Vec::new(),
        })),
        Instr::Halt => Ok(Step::Halt),
    }
}

fn leave(env: Env) -> RuntimeResult<Env> {
    env.parent()
        .cloned()
        .ok_or_else(|| RuntimeError::mismatch("scope exit past the function frame"))
}

/// Runs the code attached to a function frame until it returns.
///
/// `profile`, when given, receives one hit count per instruction.
pub fn run_frame(frame: &Env, mut profile: Option<&mut Vec<u64>>) -> RuntimeResult<Vec<Value>> {
    let info = frame
        .frame_info()
        .ok_or_else(|| RuntimeError::mismatch("environment has no code attached"))?;
    let code = Arc::clone(&info.code);
    let mut env = frame.clone();
    let mut ip = 0;
    loop {
        let Some(instr) = code.instrs.get(ip) else {
            return Ok(Vec::new());
        };
        info.budget().charge()?;
        if let Some(counts) = profile.as_deref_mut() {
            if let Some(count) = counts.get_mut(ip) {
                *count += 1;
            }
        }
        if code.trace {
            trace!(function = %code.name, ip, op = %instr.op(), "execute");
        }
        info.set_ip(ip);
        match execute(instr, &env)? {
            Step::Next => ip += 1,
            Step::Goto { target, unwind } => {
                for _ in 0..unwind {
                    env = leave(env)?;
                }
                ip = target;
            }
            Step::Enter(slots) => {
                env = Env::child(&env, slots);
                ip += 1;
            }
            Step::Leave => {
                env = leave(env)?;
                ip += 1;
            }
            Step::Return(values) => return Ok(values),
            Step::Halt => return Ok(Vec::new()),
        }
    }
}

pub struct FunctionBody {
    pub code: Arc<Code>,
    pub frame_size: usize,
    pub params: usize,
    /// Initial values of the result slots that follow the parameters.
    pub result_zeros: Vec<Value>,
}

/// A compiled function. The body is filled in once compilation of the
/// declaration finishes, so recursive references can be created earlier.
pub struct Function {
    pub name: String,
    pub ty: Type,
    body: OnceLock<FunctionBody>,
}

/// Per-instruction hit counts of one profiled call.
#[derive(Clone, Debug)]
pub struct Profile {
    pub ops: Vec<Op>,
    pub counts: Vec<u64>,
}

impl Profile {
    /// Hit counts of the instructions tagged `op`, in code order.
    pub fn counts_for(&self, op: Op) -> Vec<u64> {
        self.ops
            .iter()
            .zip(&self.counts)
            .filter(|(tag, _)| **tag == op)
            .map(|(_, count)| *count)
            .collect()
    }
}

impl Function {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            body: OnceLock::new(),
        }
    }

    pub fn with_body(name: impl Into<String>, ty: Type, body: FunctionBody) -> Self {
        let function = Self::new(name, ty);
        let _ = function.body.set(body);
        function
    }

    /// Returns `false` when a body was already attached.
    pub fn set_body(&self, body: FunctionBody) -> bool {
        self.body.set(body).is_ok()
    }

    pub fn body(&self) -> Option<&FunctionBody> {
        self.body.get()
    }

    fn frame(&self, parent: &Env, args: Vec<Value>, budget: Arc<StepBudget>) -> RuntimeResult<Env> {
        let body = self.body().ok_or_else(|| RuntimeError::UnknownFunction {
            name: self.name.clone(),
        })?;
        if args.len() != body.params {
            return Err(RuntimeError::ArityMismatch {
                name: self.name.clone(),
                expected: body.params,
                received: args.len(),
            });
        }
        let mut slots = args;
        slots.extend(body.result_zeros.iter().cloned());
        if slots.len() < body.frame_size {
            slots.resize(body.frame_size, Value::Nil);
        }
        Ok(Env::frame(parent, slots, Arc::clone(&body.code), budget))
    }

    /// Runs the function in a frame under `parent`, charging its steps to
    /// `budget`.
    pub fn invoke(
        &self,
        parent: &Env,
        args: Vec<Value>,
        budget: Arc<StepBudget>,
    ) -> RuntimeResult<Vec<Value>> {
        let frame = self.frame(parent, args, budget)?;
        run_frame(&frame, None)
    }

    pub fn invoke_profiled(
        &self,
        parent: &Env,
        args: Vec<Value>,
        budget: Arc<StepBudget>,
    ) -> RuntimeResult<(Vec<Value>, Profile)> {
        let frame = self.frame(parent, args, budget)?;
        let code = frame
            .frame_info()
            .map(|info| Arc::clone(&info.code))
            .ok_or_else(|| RuntimeError::mismatch("environment has no code attached"))?;
        let mut counts = vec![0; code.len()];
        let values = run_frame(&frame, Some(&mut counts))?;
        Ok((
            values,
            Profile {
                ops: code.ops(),
                counts,
            },
        ))
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "func {} {}", self.name, self.ty)
    }
}
