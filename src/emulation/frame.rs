//! Call frames and managed pointer resolution.

use std::sync::Arc;

use crate::{
    emulation::{
        loader::LoadedMethod, EmValue, EmulationConfig, EmulationError, ManagedPointer,
        PointerTarget,
    },
    Result,
};

/// Upper bound on pointer-to-pointer hops when resolving a managed pointer.
const MAX_POINTER_HOPS: usize = 64;

/// Work queued behind a running `finally` block.
#[derive(Debug, Clone)]
pub(crate) enum Continuation {
    /// A `leave` is in progress: run the `remaining` finally blocks, then jump to `target`.
    Leave {
        handler: usize,
        target: usize,
        remaining: Vec<usize>,
    },
    /// An exception is unwinding: continue the handler search after `handler`.
    Unwind {
        handler: usize,
        exception: EmValue,
        position: usize,
    },
}

impl Continuation {
    /// Index of the finally handler that is currently running.
    pub(crate) fn handler(&self) -> usize {
        match self {
            Continuation::Leave { handler, .. } | Continuation::Unwind { handler, .. } => *handler,
        }
    }
}

/// Activation record of an IL method.
#[derive(Debug)]
pub(crate) struct Frame {
    pub(crate) method: Arc<LoadedMethod>,
    /// Position of the next instruction
    pub(crate) ip: usize,
    pub(crate) args: Vec<EmValue>,
    pub(crate) locals: Vec<EmValue>,
    pub(crate) stack: Vec<EmValue>,
    /// Exceptions held by running catch handlers, by handler index
    pub(crate) caught: Vec<(usize, EmValue)>,
    pub(crate) finally: Vec<Continuation>,
}

impl Frame {
    pub(crate) fn new(method: Arc<LoadedMethod>, args: Vec<EmValue>, config: &EmulationConfig) -> Self {
        let locals = method
            .body
            .locals
            .iter()
            .map(|local| {
                if config.zero_init_locals {
                    EmValue::default_for(&local.ty)
                } else {
                    EmValue::Null
                }
            })
            .collect();

        Frame {
            method,
            ip: 0,
            args,
            locals,
            stack: Vec::new(),
            caught: Vec::new(),
            finally: Vec::new(),
        }
    }
}

fn slot(frames: &[Frame], pointer: ManagedPointer) -> Option<&EmValue> {
    let frame = frames.get(pointer.frame)?;
    match pointer.target {
        PointerTarget::Argument(index) => frame.args.get(usize::from(index)),
        PointerTarget::Local(index) => frame.locals.get(usize::from(index)),
    }
}

fn slot_mut(frames: &mut [Frame], pointer: ManagedPointer) -> Option<&mut EmValue> {
    let frame = frames.get_mut(pointer.frame)?;
    match pointer.target {
        PointerTarget::Argument(index) => frame.args.get_mut(usize::from(index)),
        PointerTarget::Local(index) => frame.locals.get_mut(usize::from(index)),
    }
}

fn dangling(pointer: ManagedPointer) -> crate::Error {
    let index = match pointer.target {
        PointerTarget::Argument(index) | PointerTarget::Local(index) => index,
    };
    EmulationError::DanglingPointer {
        frame: pointer.frame,
        index,
    }
    .into()
}

/// Follows `pointer` through slots that hold pointers themselves (by-reference parameters
/// passed on by reference) to the slot that holds the value.
pub(crate) fn resolve_pointer(frames: &[Frame], pointer: ManagedPointer) -> Result<ManagedPointer> {
    let mut current = pointer;
    for _ in 0..MAX_POINTER_HOPS {
        match slot(frames, current).ok_or_else(|| dangling(current))? {
            EmValue::Pointer(next) => current = *next,
            _ => return Ok(current),
        }
    }
    Err(dangling(current))
}

/// Reads the value `pointer` refers to.
pub(crate) fn load_indirect(frames: &[Frame], pointer: ManagedPointer) -> Result<EmValue> {
    let target = resolve_pointer(frames, pointer)?;
    slot(frames, target).cloned().ok_or_else(|| dangling(target))
}

/// Writes `value` to the slot `pointer` refers to.
pub(crate) fn store_indirect(frames: &mut [Frame], pointer: ManagedPointer, value: EmValue) -> Result<()> {
    let target = resolve_pointer(frames, pointer)?;
    let slot = slot_mut(frames, target).ok_or_else(|| dangling(target))?;
    *slot = value;
    Ok(())
}
