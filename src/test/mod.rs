//! Shared builders for unit tests.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use crate::{
    assembly::{MethodBody, MethodBodyBuilder},
    emulation::{CallOutcome, EmValue, Runtime},
    metadata::{
        method::{MethodDescriptor, TypeSig},
        token::Token,
    },
    patch::Hook,
};

/// `static int Calc::Add(int a, int b)`
pub fn add_descriptor() -> MethodDescriptor {
    MethodDescriptor::new("Add", "Calc")
        .param("a", TypeSig::I32)
        .param("b", TypeSig::I32)
        .returns(TypeSig::I32)
}

/// `return a + b;`
pub fn add_body() -> MethodBody {
    MethodBodyBuilder::new()
        .implementation(|asm| {
            asm.ldarg(0)?.ldarg(1)?.add()?.ret()?;
            Ok(())
        })
        .build()
        .unwrap()
}

pub fn define_add(runtime: &mut Runtime) -> Token {
    runtime.define_method(add_descriptor(), add_body()).unwrap()
}

/// Runs `token` and expects an `int32` result.
pub fn invoke_i32(runtime: &mut Runtime, token: Token, args: &[EmValue]) -> i32 {
    match runtime.invoke(token, args).unwrap() {
        CallOutcome::Return(Some(value)) => value.as_i32().unwrap(),
        other => panic!("expected an int32 result, got {other:?}"),
    }
}

/// A void hook counting its invocations.
pub fn counting_hook(name: &str) -> (Hook, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    let hook = Hook::new(name, move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(CallOutcome::Return(None))
    });
    (hook, count)
}

pub fn count(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}
