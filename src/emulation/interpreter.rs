//! The instruction interpreter.
//!
//! Execution is iterative: IL calls push a [`Frame`], returns pop it, so call depth is bounded by
//! [`EmulationLimits::max_call_depth`](crate::emulation::EmulationLimits) rather than by the
//! native stack.
//!
//! # Exception Handling
//!
//! A managed exception is dispatched against the handlers of the current frame, innermost
//! first, using the position of the throwing instruction:
//!
//! - a catch clause whose type matches receives the exception on an empty stack
//! - a finally or fault clause runs, and the search resumes after it at `endfinally`
//! - without a match the frame is discarded and the search continues at the caller's `call`
//!
//! When no frame handles it, the exception becomes [`CallOutcome::Throw`]. `leave` runs every
//! finally clause it exits before jumping to its target.

use std::{cmp::Ordering, sync::Arc};

use log::trace;

use crate::{
    assembly::{Immediate, Instruction, OpCode, Operand},
    emulation::{
        frame::{load_indirect, store_indirect, Continuation, Frame},
        loader::LoadedMethod,
        native::{NativeCall, NativeMethod},
        value::{DIVIDE_BY_ZERO, NULL_REFERENCE},
        CallOutcome, EmValue, EmulationConfig, EmulationError, ManagedHeap, ManagedPointer,
    },
    metadata::token::Token,
    Result,
};

/// Exception type raised for integer overflow in division.
const OVERFLOW: &str = "System.OverflowException";

/// A resolved call target.
#[derive(Debug, Clone)]
pub(crate) enum Callee {
    Il(Arc<LoadedMethod>),
    Native(NativeMethod),
}

/// Source of call targets.
pub(crate) trait MethodResolver {
    fn resolve(&self, token: Token) -> Option<Callee>;
}

enum Step {
    Continue,
    Return(Option<EmValue>),
    Throw {
        exception: EmValue,
        position: usize,
        resume: usize,
    },
}

impl Step {
    fn throw(exception: EmValue, position: usize) -> Self {
        Step::Throw {
            exception,
            position,
            resume: 0,
        }
    }

    fn fault(type_name: &str, message: &str, position: usize) -> Self {
        Step::throw(EmValue::exception(type_name, message), position)
    }
}

enum Arith {
    Value(EmValue),
    Fault(&'static str),
}

enum Numbers {
    I32(i32, i32),
    I64(i64, i64),
    F64(f64, f64),
    Bool(bool, bool),
}

fn numbers(operation: &'static str, a: &EmValue, b: &EmValue) -> Result<Numbers> {
    Ok(match (a, b) {
        (EmValue::Bool(x), EmValue::Bool(y)) => Numbers::Bool(*x, *y),
        (EmValue::I32(_) | EmValue::Bool(_), EmValue::I32(_) | EmValue::Bool(_)) => {
            Numbers::I32(a.as_i32()?, b.as_i32()?)
        }
        (EmValue::I64(_) | EmValue::I32(_), EmValue::I64(_) | EmValue::I32(_)) => {
            Numbers::I64(a.as_i64()?, b.as_i64()?)
        }
        (EmValue::F64(x), EmValue::F64(y)) => Numbers::F64(*x, *y),
        (EmValue::I32(_) | EmValue::I64(_) | EmValue::Bool(_) | EmValue::F64(_), _) => {
            return Err(b.mismatch(operation, a.type_name()))
        }
        _ => return Err(a.mismatch(operation, "number")),
    })
}

fn arithmetic(opcode: OpCode, a: &EmValue, b: &EmValue) -> Result<Arith> {
    let operation = opcode.mnemonic();
    let value = match numbers(operation, a, b)? {
        Numbers::Bool(x, y) => match opcode {
            OpCode::And => EmValue::Bool(x & y),
            OpCode::Or => EmValue::Bool(x | y),
            OpCode::Xor => EmValue::Bool(x ^ y),
            _ => return arithmetic(opcode, &EmValue::I32(i32::from(x)), &EmValue::I32(i32::from(y))),
        },
        Numbers::I32(x, y) => match opcode {
            OpCode::Add => EmValue::I32(x.wrapping_add(y)),
            OpCode::Sub => EmValue::I32(x.wrapping_sub(y)),
            OpCode::Mul => EmValue::I32(x.wrapping_mul(y)),
            OpCode::Div | OpCode::Rem if y == 0 => return Ok(Arith::Fault(DIVIDE_BY_ZERO)),
            OpCode::Div => match x.checked_div(y) {
                Some(quotient) => EmValue::I32(quotient),
                None => return Ok(Arith::Fault(OVERFLOW)),
            },
            OpCode::Rem => match x.checked_rem(y) {
                Some(remainder) => EmValue::I32(remainder),
                None => return Ok(Arith::Fault(OVERFLOW)),
            },
            OpCode::And => EmValue::I32(x & y),
            OpCode::Or => EmValue::I32(x | y),
            OpCode::Xor => EmValue::I32(x ^ y),
            _ => return Err(a.mismatch(operation, "operands of a binary operation")),
        },
        Numbers::I64(x, y) => match opcode {
            OpCode::Add => EmValue::I64(x.wrapping_add(y)),
            OpCode::Sub => EmValue::I64(x.wrapping_sub(y)),
            OpCode::Mul => EmValue::I64(x.wrapping_mul(y)),
            OpCode::Div | OpCode::Rem if y == 0 => return Ok(Arith::Fault(DIVIDE_BY_ZERO)),
            OpCode::Div => match x.checked_div(y) {
                Some(quotient) => EmValue::I64(quotient),
                None => return Ok(Arith::Fault(OVERFLOW)),
            },
            OpCode::Rem => match x.checked_rem(y) {
                Some(remainder) => EmValue::I64(remainder),
                None => return Ok(Arith::Fault(OVERFLOW)),
            },
            OpCode::And => EmValue::I64(x & y),
            OpCode::Or => EmValue::I64(x | y),
            OpCode::Xor => EmValue::I64(x ^ y),
            _ => return Err(a.mismatch(operation, "operands of a binary operation")),
        },
        Numbers::F64(x, y) => match opcode {
            OpCode::Add => EmValue::F64(x + y),
            OpCode::Sub => EmValue::F64(x - y),
            OpCode::Mul => EmValue::F64(x * y),
            OpCode::Div => EmValue::F64(x / y),
            OpCode::Rem => EmValue::F64(x % y),
            _ => return Err(a.mismatch(operation, "integer")),
        },
    };
    Ok(Arith::Value(value))
}

/// Reference or numeric equality as used by `ceq`, `beq` and `bne.un`.
fn equals(operation: &'static str, a: &EmValue, b: &EmValue) -> Result<bool> {
    match (a, b) {
        (EmValue::Null, EmValue::Null) => Ok(true),
        (EmValue::Null, EmValue::String(_) | EmValue::Object(_) | EmValue::Exception(_))
        | (EmValue::String(_) | EmValue::Object(_) | EmValue::Exception(_), EmValue::Null) => {
            Ok(false)
        }
        (EmValue::String(x), EmValue::String(y)) => Ok(x == y),
        (EmValue::Object(x), EmValue::Object(y)) => Ok(x == y),
        (EmValue::Exception(x), EmValue::Exception(y)) => Ok(Arc::ptr_eq(x, y)),
        (EmValue::Pointer(x), EmValue::Pointer(y)) => Ok(x == y),
        _ => compare(operation, a, b).map(|ordering| ordering == Some(Ordering::Equal)),
    }
}

/// Numeric ordering; `None` for unordered floats.
fn compare(operation: &'static str, a: &EmValue, b: &EmValue) -> Result<Option<Ordering>> {
    Ok(match numbers(operation, a, b)? {
        Numbers::Bool(x, y) => Some(x.cmp(&y)),
        Numbers::I32(x, y) => Some(x.cmp(&y)),
        Numbers::I64(x, y) => Some(x.cmp(&y)),
        Numbers::F64(x, y) => x.partial_cmp(&y),
    })
}

fn invalid_operand(instr: &Instruction, expected: &'static str) -> crate::Error {
    EmulationError::InvalidOperand {
        instruction: instr.mnemonic(),
        expected,
    }
    .into()
}

/// Executes one top-level call.
pub(crate) struct Interpreter<'r> {
    resolver: &'r dyn MethodResolver,
    heap: &'r mut ManagedHeap,
    console: &'r mut Vec<String>,
    config: &'r EmulationConfig,
    frames: Vec<Frame>,
    executed: u64,
}

impl<'r> Interpreter<'r> {
    pub(crate) fn new(
        resolver: &'r dyn MethodResolver,
        heap: &'r mut ManagedHeap,
        console: &'r mut Vec<String>,
        config: &'r EmulationConfig,
    ) -> Self {
        Interpreter {
            resolver,
            heap,
            console,
            config,
            frames: Vec::new(),
            executed: 0,
        }
    }

    /// Number of instructions executed so far.
    pub(crate) fn executed(&self) -> u64 {
        self.executed
    }

    /// Calls `token` with `args` and runs until the call completes.
    pub(crate) fn run(&mut self, token: Token, args: Vec<EmValue>) -> Result<CallOutcome> {
        match self.resolve(token)? {
            Callee::Native(native) => {
                if args.len() != native.arity {
                    return Err(EmulationError::ArgumentCountMismatch {
                        token,
                        expected: native.arity,
                        found: args.len(),
                    }
                    .into());
                }
                self.call_native(&native, args)
            }
            Callee::Il(method) => {
                let expected = method.descriptor.slot_count();
                if args.len() != expected {
                    return Err(EmulationError::ArgumentCountMismatch {
                        token,
                        expected,
                        found: args.len(),
                    }
                    .into());
                }
                self.push_frame(method, args)?;
                self.execute()
            }
        }
    }

    fn resolve(&self, token: Token) -> Result<Callee> {
        self.resolver
            .resolve(token)
            .ok_or_else(|| EmulationError::MethodNotFound { token }.into())
    }

    fn push_frame(&mut self, method: Arc<LoadedMethod>, args: Vec<EmValue>) -> Result<()> {
        let depth = self.frames.len() + 1;
        if self.config.limits.depth_exceeded(depth) {
            return Err(EmulationError::CallDepthExceeded {
                depth,
                limit: self.config.limits.max_call_depth,
            }
            .into());
        }

        trace!("enter {} (depth {})", method.descriptor.full_name(), depth);
        self.frames.push(Frame::new(method, args, self.config));
        Ok(())
    }

    fn call_native(&mut self, native: &NativeMethod, args: Vec<EmValue>) -> Result<CallOutcome> {
        trace!("native {} ({} args)", native.name, args.len());

        let mut call = NativeCall::new(
            &native.name,
            args,
            &mut self.frames,
            &mut *self.heap,
            &mut *self.console,
        );
        let outcome = (native.handler)(&mut call)?;

        match &outcome {
            CallOutcome::Return(value) => {
                if value.is_some() != native.returns_value {
                    return Err(EmulationError::NativeReturnMismatch {
                        name: native.name.clone(),
                        declared: native.returns_value,
                    }
                    .into());
                }
            }
            CallOutcome::Throw(exception) => {
                if !matches!(exception, EmValue::Exception(_)) {
                    return Err(exception.mismatch("throw", "exception"));
                }
            }
        }
        Ok(outcome)
    }

    fn execute(&mut self) -> Result<CallOutcome> {
        loop {
            match self.step()? {
                Step::Continue => {}
                Step::Return(value) => {
                    self.frames.pop();
                    match self.frames.last_mut() {
                        None => return Ok(CallOutcome::Return(value)),
                        Some(caller) => caller.stack.extend(value),
                    }
                }
                Step::Throw {
                    exception,
                    position,
                    resume,
                } => {
                    if let Some(outcome) = self.unwind(exception, position, resume)? {
                        return Ok(outcome);
                    }
                }
            }
        }
    }

    /// Dispatches `exception` through the frames. Returns the outcome if it leaves the call.
    fn unwind(
        &mut self,
        exception: EmValue,
        position: usize,
        resume: usize,
    ) -> Result<Option<CallOutcome>> {
        let mut position = position;
        let mut resume = resume;
        loop {
            if self.dispatch(&exception, position, resume)? {
                return Ok(None);
            }

            self.frames.pop();
            match self.frames.last() {
                None => return Ok(Some(CallOutcome::Throw(exception))),
                Some(caller) => {
                    position = caller.ip.saturating_sub(1);
                    resume = 0;
                }
            }
        }
    }

    /// Finds a handler for `exception` in the top frame, starting at handler index `resume`.
    fn dispatch(&mut self, exception: &EmValue, position: usize, resume: usize) -> Result<bool> {
        let type_name = match exception {
            EmValue::Exception(object) => object.type_name.clone(),
            other => return Err(other.mismatch("throw", "exception")),
        };

        let frame = self.top()?;
        let method = Arc::clone(&frame.method);
        frame
            .finally
            .retain(|pending| !method.handlers[pending.handler()].handler_range.contains(&position));
        frame
            .caught
            .retain(|(handler, _)| !method.handlers[*handler].handler_range.contains(&position));

        for (index, handler) in method.handlers.iter().enumerate().skip(resume) {
            if !handler.try_range.contains(&position) {
                continue;
            }

            if handler.clause.is_catch() {
                if handler.clause.catches(&type_name) {
                    trace!("{} caught at IL_{:04}", type_name, handler.handler_range.start);
                    frame.stack.clear();
                    frame.stack.push(exception.clone());
                    frame.caught.push((index, exception.clone()));
                    frame.ip = handler.handler_range.start;
                    return Ok(true);
                }
            } else if handler.clause.is_finally() || handler.clause.is_fault() {
                frame.stack.clear();
                frame.finally.push(Continuation::Unwind {
                    handler: index,
                    exception: exception.clone(),
                    position,
                });
                frame.ip = handler.handler_range.start;
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn top(&mut self) -> Result<&mut Frame> {
        self.frames.last_mut().ok_or_else(|| {
            EmulationError::StackUnderflow {
                instruction: "frame",
            }
            .into()
        })
    }

    fn pop(&mut self, instr: &Instruction) -> Result<EmValue> {
        let frame = self.top()?;
        frame.stack.pop().ok_or_else(|| {
            EmulationError::StackUnderflow {
                instruction: instr.mnemonic(),
            }
            .into()
        })
    }

    fn pop_many(&mut self, count: usize, instr: &Instruction) -> Result<Vec<EmValue>> {
        let frame = self.top()?;
        if frame.stack.len() < count {
            return Err(EmulationError::StackUnderflow {
                instruction: instr.mnemonic(),
            }
            .into());
        }
        let at = frame.stack.len() - count;
        Ok(frame.stack.split_off(at))
    }

    fn push(&mut self, value: EmValue) -> Result<()> {
        self.top()?.stack.push(value);
        Ok(())
    }

    fn jump(&mut self, method: &LoadedMethod, instr: &Instruction) -> Result<()> {
        let target = instr
            .label()
            .and_then(|label| method.target(label))
            .ok_or_else(|| invalid_operand(instr, "marked label"))?;
        self.top()?.ip = target;
        Ok(())
    }

    fn step(&mut self) -> Result<Step> {
        self.executed += 1;
        if self.config.limits.instructions_exceeded(self.executed) {
            return Err(EmulationError::InstructionLimitExceeded {
                executed: self.executed,
                limit: self.config.limits.max_instructions,
            }
            .into());
        }

        let depth = self.frames.len().saturating_sub(1);
        let frame = self.top()?;
        let method = Arc::clone(&frame.method);
        let position = frame.ip;
        let instr = method
            .body
            .instructions
            .get(position)
            .ok_or(EmulationError::FellThrough {
                token: method.token,
            })?;
        frame.ip += 1;

        match instr.opcode {
            OpCode::Nop => {}

            OpCode::Ldarg => {
                let slot = self.argument_slot(instr)?;
                let value = self.top()?.args[slot].clone();
                self.push(value)?;
            }
            OpCode::Ldarga => {
                let slot = self.argument_slot(instr)?;
                let index = u16::try_from(slot).map_err(|_| invalid_operand(instr, "argument"))?;
                self.push(EmValue::Pointer(ManagedPointer::to_argument(depth, index)))?;
            }
            OpCode::Starg => {
                let slot = self.argument_slot(instr)?;
                let value = self.pop(instr)?;
                self.top()?.args[slot] = value;
            }
            OpCode::Ldloc => {
                let local = self.local_slot(instr)?;
                let value = self.top()?.locals[local].clone();
                self.push(value)?;
            }
            OpCode::Ldloca => {
                let local = self.local_slot(instr)?;
                let index = u16::try_from(local).map_err(|_| invalid_operand(instr, "local"))?;
                self.push(EmValue::Pointer(ManagedPointer::to_local(depth, index)))?;
            }
            OpCode::Stloc => {
                let local = self.local_slot(instr)?;
                let value = self.pop(instr)?;
                self.top()?.locals[local] = value;
            }

            OpCode::LdcI4 | OpCode::LdcI8 | OpCode::LdcR8 => {
                let value = match &instr.operand {
                    Operand::Immediate(Immediate::Int32(v)) => EmValue::I32(*v),
                    Operand::Immediate(Immediate::Int64(v)) => EmValue::I64(*v),
                    Operand::Immediate(Immediate::Float64(v)) => EmValue::F64(*v),
                    _ => return Err(invalid_operand(instr, "immediate")),
                };
                self.push(value)?;
            }
            OpCode::Ldstr => match &instr.operand {
                Operand::String(text) => self.push(EmValue::string(text))?,
                _ => return Err(invalid_operand(instr, "string")),
            },
            OpCode::Ldnull => self.push(EmValue::Null)?,
            OpCode::Dup => {
                let value = self.pop(instr)?;
                self.push(value.clone())?;
                self.push(value)?;
            }
            OpCode::Pop => {
                self.pop(instr)?;
            }

            OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::Rem
            | OpCode::And
            | OpCode::Or
            | OpCode::Xor => {
                let b = self.pop(instr)?;
                let a = self.pop(instr)?;
                match arithmetic(instr.opcode, &a, &b)? {
                    Arith::Value(value) => self.push(value)?,
                    Arith::Fault(type_name) => {
                        return Ok(Step::fault(type_name, "Arithmetic operation failed.", position))
                    }
                }
            }
            OpCode::Neg => {
                let value = match self.pop(instr)? {
                    EmValue::I32(v) => EmValue::I32(v.wrapping_neg()),
                    EmValue::I64(v) => EmValue::I64(v.wrapping_neg()),
                    EmValue::F64(v) => EmValue::F64(-v),
                    other => return Err(other.mismatch("neg", "number")),
                };
                self.push(value)?;
            }
            OpCode::Ceq | OpCode::Cgt | OpCode::Clt => {
                let b = self.pop(instr)?;
                let a = self.pop(instr)?;
                let result = match instr.opcode {
                    OpCode::Ceq => equals("ceq", &a, &b)?,
                    OpCode::Cgt => compare("cgt", &a, &b)? == Some(Ordering::Greater),
                    _ => compare("clt", &a, &b)? == Some(Ordering::Less),
                };
                self.push(EmValue::I32(i32::from(result)))?;
            }

            OpCode::Br => self.jump(&method, instr)?,
            OpCode::Brtrue | OpCode::Brfalse => {
                let condition = self.pop(instr)?.is_truthy()?;
                if condition == (instr.opcode == OpCode::Brtrue) {
                    self.jump(&method, instr)?;
                }
            }
            OpCode::Beq
            | OpCode::BneUn
            | OpCode::Blt
            | OpCode::Bgt
            | OpCode::Ble
            | OpCode::Bge => {
                let b = self.pop(instr)?;
                let a = self.pop(instr)?;
                let operation = instr.mnemonic();
                let taken = match instr.opcode {
                    OpCode::Beq => equals(operation, &a, &b)?,
                    OpCode::BneUn => !equals(operation, &a, &b)?,
                    OpCode::Blt => compare(operation, &a, &b)? == Some(Ordering::Less),
                    OpCode::Bgt => compare(operation, &a, &b)? == Some(Ordering::Greater),
                    OpCode::Ble => matches!(
                        compare(operation, &a, &b)?,
                        Some(Ordering::Less | Ordering::Equal)
                    ),
                    _ => matches!(
                        compare(operation, &a, &b)?,
                        Some(Ordering::Greater | Ordering::Equal)
                    ),
                };
                if taken {
                    self.jump(&method, instr)?;
                }
            }

            OpCode::Call => {
                let Operand::Method(token) = instr.operand else {
                    return Err(invalid_operand(instr, "method token"));
                };
                return self.call(token, instr, position);
            }
            OpCode::Ret => {
                let value = if method.descriptor.returns_value() {
                    Some(self.pop(instr)?)
                } else {
                    None
                };
                trace!("leave {}", method.descriptor.full_name());
                return Ok(Step::Return(value));
            }

            OpCode::Throw => {
                return match self.pop(instr)? {
                    EmValue::Null => Ok(Step::fault(
                        NULL_REFERENCE,
                        "Object reference not set to an instance of an object.",
                        position,
                    )),
                    exception @ EmValue::Exception(_) => Ok(Step::throw(exception, position)),
                    other => Err(other.mismatch("throw", "exception")),
                };
            }
            OpCode::Rethrow => {
                let frame = self.top()?;
                let exception = frame
                    .caught
                    .iter()
                    .rev()
                    .find(|(handler, _)| method.handlers[*handler].handler_range.contains(&position))
                    .map(|(_, exception)| exception.clone())
                    .ok_or(EmulationError::RethrowOutsideHandler)?;
                return Ok(Step::throw(exception, position));
            }
            OpCode::Leave => self.leave(&method, instr, position)?,
            OpCode::Endfinally => return self.end_finally(&method),

            OpCode::Ldfld => {
                let Operand::Field(field) = &instr.operand else {
                    return Err(invalid_operand(instr, "field"));
                };
                match self.pop(instr)? {
                    EmValue::Object(object) => {
                        let value = self.heap.get_field(object, field)?;
                        self.push(value)?;
                    }
                    EmValue::Null => {
                        return Ok(Step::fault(
                            NULL_REFERENCE,
                            "Object reference not set to an instance of an object.",
                            position,
                        ))
                    }
                    other => return Err(other.mismatch("ldfld", "object")),
                }
            }
            OpCode::Stfld => {
                let Operand::Field(field) = &instr.operand else {
                    return Err(invalid_operand(instr, "field"));
                };
                let value = self.pop(instr)?;
                match self.pop(instr)? {
                    EmValue::Object(object) => self.heap.set_field(object, field, value)?,
                    EmValue::Null => {
                        return Ok(Step::fault(
                            NULL_REFERENCE,
                            "Object reference not set to an instance of an object.",
                            position,
                        ))
                    }
                    other => return Err(other.mismatch("stfld", "object")),
                }
            }
            OpCode::Ldind => match self.pop(instr)? {
                EmValue::Pointer(pointer) => {
                    let value = load_indirect(&self.frames, pointer)?;
                    self.push(value)?;
                }
                other => return Err(other.mismatch("ldind", "pointer")),
            },
            OpCode::Stind => {
                let value = self.pop(instr)?;
                match self.pop(instr)? {
                    EmValue::Pointer(pointer) => store_indirect(&mut self.frames, pointer, value)?,
                    other => return Err(other.mismatch("stind", "pointer")),
                }
            }
        }

        Ok(Step::Continue)
    }

    fn argument_slot(&mut self, instr: &Instruction) -> Result<usize> {
        let Operand::Argument(slot) = instr.operand else {
            return Err(invalid_operand(instr, "argument"));
        };
        let count = self.top()?.args.len();
        let index = usize::from(slot);
        if index >= count {
            return Err(EmulationError::ArgumentIndexOutOfBounds { index, count }.into());
        }
        Ok(index)
    }

    fn local_slot(&mut self, instr: &Instruction) -> Result<usize> {
        let Operand::Local(local) = instr.operand else {
            return Err(invalid_operand(instr, "local"));
        };
        let count = self.top()?.locals.len();
        let index = usize::from(local);
        if index >= count {
            return Err(EmulationError::LocalIndexOutOfBounds { index, count }.into());
        }
        Ok(index)
    }

    fn call(&mut self, token: Token, instr: &Instruction, position: usize) -> Result<Step> {
        match self.resolve(token)? {
            Callee::Il(callee) => {
                let args = self.pop_many(callee.descriptor.slot_count(), instr)?;
                self.push_frame(callee, args)?;
                Ok(Step::Continue)
            }
            Callee::Native(native) => {
                let args = self.pop_many(native.arity, instr)?;
                match self.call_native(&native, args)? {
                    CallOutcome::Return(value) => {
                        self.top()?.stack.extend(value);
                        Ok(Step::Continue)
                    }
                    CallOutcome::Throw(exception) => Ok(Step::throw(exception, position)),
                }
            }
        }
    }

    fn leave(&mut self, method: &LoadedMethod, instr: &Instruction, position: usize) -> Result<()> {
        let target = instr
            .label()
            .and_then(|label| method.target(label))
            .ok_or_else(|| invalid_operand(instr, "marked label"))?;

        let frame = self.top()?;
        frame.stack.clear();
        frame.caught.retain(|(handler, _)| {
            let range = &method.handlers[*handler].handler_range;
            !range.contains(&position) || range.contains(&target)
        });

        let mut exited = method
            .handlers
            .iter()
            .enumerate()
            .filter(|(_, handler)| {
                handler.clause.is_finally()
                    && handler.try_range.contains(&position)
                    && !handler.try_range.contains(&target)
            })
            .map(|(index, _)| index);

        match exited.next() {
            None => frame.ip = target,
            Some(first) => {
                frame.finally.push(Continuation::Leave {
                    handler: first,
                    target,
                    remaining: exited.collect(),
                });
                frame.ip = method.handlers[first].handler_range.start;
            }
        }
        Ok(())
    }

    fn end_finally(&mut self, method: &LoadedMethod) -> Result<Step> {
        let frame = self.top()?;
        frame.stack.clear();
        let continuation = frame
            .finally
            .pop()
            .ok_or(EmulationError::EndFinallyOutsideHandler)?;

        match continuation {
            Continuation::Leave {
                target,
                mut remaining,
                ..
            } => {
                if remaining.is_empty() {
                    frame.ip = target;
                } else {
                    let next = remaining.remove(0);
                    frame.ip = method.handlers[next].handler_range.start;
                    frame.finally.push(Continuation::Leave {
                        handler: next,
                        target,
                        remaining,
                    });
                }
                Ok(Step::Continue)
            }
            Continuation::Unwind {
                handler,
                exception,
                position,
            } => Ok(Step::Throw {
                exception,
                position,
                resume: handler + 1,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        assembly::MethodBodyBuilder,
        emulation::{
            CallOutcome, EmValue, EmulationConfig, EmulationError, Runtime, DIVIDE_BY_ZERO,
            NULL_REFERENCE,
        },
        metadata::{
            method::{MethodDescriptor, TypeSig},
            token::{Token, TABLE_METHOD_DEF},
        },
        test::{add_descriptor, invoke_i32},
        Error,
    };

    fn define_log(runtime: &mut Runtime) -> Token {
        runtime.define_native("Log", 1, false, |call| {
            let text = call.arg(0)?.as_str()?.to_string();
            call.write_line(text);
            Ok(CallOutcome::Return(None))
        })
        .unwrap()
    }

    fn define_fail(runtime: &mut Runtime) -> Token {
        runtime.define_native("Fail", 0, false, |_| {
            Ok(CallOutcome::Throw(EmValue::exception(
                "System.InvalidOperationException",
                "boom",
            )))
        })
        .unwrap()
    }

    #[test]
    fn test_branches() {
        let mut runtime = Runtime::new();
        let max = runtime
            .define_method(
                add_descriptor(),
                MethodBodyBuilder::new()
                    .implementation(|asm| {
                        asm.ldarg(0)?
                            .ldarg(1)?
                            .ble("second")?
                            .ldarg(0)?
                            .ret()?
                            .label("second")?
                            .ldarg(1)?
                            .ret()?;
                        Ok(())
                    })
                    .build()
                    .unwrap(),
            )
            .unwrap();

        assert_eq!(invoke_i32(&mut runtime, max, &[7.into(), 3.into()]), 7);
        assert_eq!(invoke_i32(&mut runtime, max, &[3.into(), 7.into()]), 7);
    }

    #[test]
    fn test_divide_by_zero_is_managed() {
        let mut runtime = Runtime::new();
        let div = runtime
            .define_method(
                add_descriptor(),
                MethodBodyBuilder::new()
                    .implementation(|asm| {
                        asm.ldarg(0)?.ldarg(1)?.div()?.ret()?;
                        Ok(())
                    })
                    .build()
                    .unwrap(),
            )
            .unwrap();

        assert_eq!(invoke_i32(&mut runtime, div, &[9.into(), 3.into()]), 3);
        let outcome = runtime.invoke(div, &[1.into(), 0.into()]).unwrap();
        assert_eq!(
            outcome.exception().map(|e| e.type_name.as_str()),
            Some(DIVIDE_BY_ZERO)
        );
    }

    #[test]
    fn test_typed_catch() {
        let mut runtime = Runtime::new();
        let safe_div = runtime
            .define_method(
                add_descriptor(),
                MethodBodyBuilder::new()
                    .local("result", TypeSig::I32)
                    .catch_handler("try", "handler", "end", Some(DIVIDE_BY_ZERO))
                    .implementation(|asm| {
                        asm.label("try")?
                            .ldarg(0)?
                            .ldarg(1)?
                            .div()?
                            .stloc(0)?
                            .leave("end")?
                            .label("handler")?
                            .pop()?
                            .ldc_i4(-1)?
                            .stloc(0)?
                            .leave("end")?
                            .label("end")?
                            .ldloc(0)?
                            .ret()?;
                        Ok(())
                    })
                    .build()
                    .unwrap(),
            )
            .unwrap();

        assert_eq!(invoke_i32(&mut runtime, safe_div, &[8.into(), 2.into()]), 4);
        assert_eq!(invoke_i32(&mut runtime, safe_div, &[8.into(), 0.into()]), -1);
    }

    #[test]
    fn test_typed_catch_ignores_other_types() {
        let mut runtime = Runtime::new();
        let fail = define_fail(&mut runtime);
        let method = runtime
            .define_method(
                MethodDescriptor::new("Run", "Job"),
                MethodBodyBuilder::new()
                    .catch_handler("try", "handler", "end", Some(DIVIDE_BY_ZERO))
                    .implementation(move |asm| {
                        asm.label("try")?
                            .call(fail)?
                            .leave("end")?
                            .label("handler")?
                            .pop()?
                            .leave("end")?
                            .label("end")?
                            .ret()?;
                        Ok(())
                    })
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let outcome = runtime.invoke(method, &[]).unwrap();
        assert_eq!(
            outcome.exception().map(|e| e.message.as_str()),
            Some("boom")
        );
    }

    #[test]
    fn test_finally_on_leave_and_unwind() {
        let mut runtime = Runtime::new();
        let log = define_log(&mut runtime);
        let fail = define_fail(&mut runtime);

        let guarded = move |body_call: Option<Token>| {
            MethodBodyBuilder::new()
                .finally_handler("try", "finally", "end")
                .implementation(move |asm| {
                    asm.label("try")?;
                    match body_call {
                        Some(fail) => asm.call(fail)?,
                        None => asm.ldstr("body")?.call(log)?,
                    };
                    asm.leave("end")?
                        .label("finally")?
                        .ldstr("finally")?
                        .call(log)?
                        .endfinally()?
                        .label("end")?
                        .ret()?;
                    Ok(())
                })
                .build()
                .unwrap()
        };

        let normal = runtime
            .define_method(MethodDescriptor::new("Normal", "Job"), guarded(None))
            .unwrap();
        let throwing = runtime
            .define_method(MethodDescriptor::new("Throwing", "Job"), guarded(Some(fail)))
            .unwrap();

        assert_eq!(
            runtime.invoke(normal, &[]).unwrap(),
            CallOutcome::Return(None)
        );
        assert_eq!(runtime.take_console(), ["body", "finally"]);

        let outcome = runtime.invoke(throwing, &[]).unwrap();
        assert!(outcome.is_throw());
        assert_eq!(runtime.take_console(), ["finally"]);
    }

    #[test]
    fn test_rethrow_keeps_identity() {
        let mut runtime = Runtime::new();
        let log = define_log(&mut runtime);
        let fail = define_fail(&mut runtime);
        let method = runtime
            .define_method(
                MethodDescriptor::new("Run", "Job"),
                MethodBodyBuilder::new()
                    .catch_handler("try", "handler", "end", None)
                    .implementation(move |asm| {
                        asm.label("try")?
                            .call(fail)?
                            .leave("end")?
                            .label("handler")?
                            .pop()?
                            .ldstr("caught")?
                            .call(log)?
                            .rethrow()?
                            .label("end")?
                            .ret()?;
                        Ok(())
                    })
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let outcome = runtime.invoke(method, &[]).unwrap();
        assert_eq!(
            outcome.exception().map(|e| e.type_name.as_str()),
            Some("System.InvalidOperationException")
        );
        assert_eq!(runtime.console(), ["caught"]);
    }

    #[test]
    fn test_exception_crosses_frames() {
        let mut runtime = Runtime::new();
        let fail = define_fail(&mut runtime);
        let inner = runtime
            .define_method(
                MethodDescriptor::new("Inner", "Job"),
                MethodBodyBuilder::new()
                    .implementation(move |asm| {
                        asm.call(fail)?.ret()?;
                        Ok(())
                    })
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let outer = runtime
            .define_method(
                MethodDescriptor::new("Outer", "Job").returns(TypeSig::I32),
                MethodBodyBuilder::new()
                    .local("result", TypeSig::I32)
                    .catch_handler("try", "handler", "end", Some("System.Exception"))
                    .implementation(move |asm| {
                        asm.label("try")?
                            .call(inner)?
                            .leave("end")?
                            .label("handler")?
                            .pop()?
                            .ldc_i4(99)?
                            .stloc(0)?
                            .leave("end")?
                            .label("end")?
                            .ldloc(0)?
                            .ret()?;
                        Ok(())
                    })
                    .build()
                    .unwrap(),
            )
            .unwrap();

        assert_eq!(invoke_i32(&mut runtime, outer, &[]), 99);
    }

    #[test]
    fn test_by_ref_argument() {
        let mut runtime = Runtime::new();
        let inc = runtime
            .define_method(
                MethodDescriptor::new("Inc", "Calc").param_by_ref("x", TypeSig::I32),
                MethodBodyBuilder::new()
                    .implementation(|asm| {
                        asm.ldarg(0)?.ldarg(0)?.ldind()?.ldc_i4(1)?.add()?.stind()?.ret()?;
                        Ok(())
                    })
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let caller = runtime
            .define_method(
                MethodDescriptor::new("Caller", "Calc").returns(TypeSig::I32),
                MethodBodyBuilder::new()
                    .local("x", TypeSig::I32)
                    .implementation(move |asm| {
                        asm.ldc_i4(41)?
                            .stloc(0)?
                            .ldloca(0)?
                            .call(inc)?
                            .ldloc(0)?
                            .ret()?;
                        Ok(())
                    })
                    .build()
                    .unwrap(),
            )
            .unwrap();

        assert_eq!(invoke_i32(&mut runtime, caller, &[]), 42);
    }

    #[test]
    fn test_fields_and_null_receiver() {
        let mut runtime = Runtime::new();
        let get = runtime
            .define_method(
                MethodDescriptor::new("get_Count", "Counter")
                    .instance()
                    .returns(TypeSig::I32),
                MethodBodyBuilder::new()
                    .implementation(|asm| {
                        asm.ldarg(0)?.ldfld("count")?.ret()?;
                        Ok(())
                    })
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let counter = runtime
            .heap_mut()
            .alloc_object_with_fields("Counter", vec![("count", EmValue::I32(5))])
            .unwrap();
        assert_eq!(invoke_i32(&mut runtime, get, &[EmValue::Object(counter)]), 5);

        let outcome = runtime.invoke(get, &[EmValue::Null]).unwrap();
        assert_eq!(
            outcome.exception().map(|e| e.type_name.as_str()),
            Some(NULL_REFERENCE)
        );
    }

    #[test]
    fn test_limits() {
        let mut runtime = Runtime::with_config(EmulationConfig::minimal());
        let spin = runtime
            .define_method(
                MethodDescriptor::new("Spin", "Job"),
                MethodBodyBuilder::new()
                    .implementation(|asm| {
                        asm.label("top")?.br("top")?;
                        Ok(())
                    })
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let err = runtime.invoke(spin, &[]).unwrap_err();
        assert!(matches!(
            err,
            Error::Emulation(EmulationError::InstructionLimitExceeded { limit: 10_000, .. })
        ));

        let recurse = Token::from_parts(TABLE_METHOD_DEF, 2);
        let defined = runtime
            .define_method(
                MethodDescriptor::new("Recurse", "Job"),
                MethodBodyBuilder::new()
                    .implementation(move |asm| {
                        asm.call(recurse)?.ret()?;
                        Ok(())
                    })
                    .build()
                    .unwrap(),
            )
            .unwrap();
        assert_eq!(defined, recurse);

        let err = runtime.invoke(recurse, &[]).unwrap_err();
        assert!(matches!(
            err,
            Error::Emulation(EmulationError::CallDepthExceeded { limit: 10, .. })
        ));
    }

    #[test]
    fn test_call_errors() {
        let mut runtime = Runtime::new();
        let add = crate::test::define_add(&mut runtime);
        let err = runtime.invoke(add, &[EmValue::I32(1)]).unwrap_err();
        assert!(matches!(
            err,
            Error::Emulation(EmulationError::ArgumentCountMismatch { expected: 2, found: 1, .. })
        ));

        let liar = runtime
            .define_native("Liar", 0, true, |_| Ok(CallOutcome::Return(None)))
            .unwrap();
        assert!(runtime.invoke(liar, &[]).is_err());
        assert!(runtime.invoke(Token::new(0x0600_0099), &[]).is_err());
    }
}
