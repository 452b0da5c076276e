//! Patching a calculator method
//!
//! Defines `int Calculator::Add(int a, int b)` and `int Calculator::Divide(int a, int b)` on
//! the reference runtime, layers logging and recovery hooks on them and prints what the
//! patched methods do.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example calculator
//! ```

use dotpatch::prelude::*;

type Emit = fn(&mut InstructionAssembler) -> Result<()>;

/// `static int Calculator::<name>(int a, int b)`
fn binary(name: &str, body: Emit) -> Result<(MethodDescriptor, MethodBody)> {
    let descriptor = MethodDescriptor::new(name, "Calculator")
        .param("a", TypeSig::I32)
        .param("b", TypeSig::I32)
        .returns(TypeSig::I32);
    let body = MethodBodyBuilder::new()
        .implementation(move |asm| body(asm))
        .build()?;
    Ok((descriptor, body))
}

fn main() -> Result<()> {
    let mut runtime = Runtime::new();

    let (descriptor, body) = binary("Add", |asm| {
        asm.ldarg(0)?.ldarg(1)?.add()?.ret()?;
        Ok(())
    })?;
    let add = runtime.define_method(descriptor, body)?;

    let (descriptor, body) = binary("Divide", |asm| {
        asm.ldarg(0)?.ldarg(1)?.div()?.ret()?;
        Ok(())
    })?;
    let divide = runtime.define_method(descriptor, body)?;

    let log_operands = Hook::new("LogOperands", |call| {
        let (a, b) = (call.arg(0)?.as_i32()?, call.arg(1)?.as_i32()?);
        call.write_line(format!("{a} + {b}"));
        Ok(CallOutcome::Return(None))
    })
    .param("a")
    .param("b");

    let log_result = Hook::new("LogResult", |call| {
        let result = call.arg(0)?.as_i32()?;
        call.write_line(format!("The results are: {result}"));
        Ok(CallOutcome::Return(None))
    })
    .param("__result");

    // Exception Finalizer(Exception __exception, ref int __result)
    let recover = Hook::new("Recover", |call| {
        let current = call.arg(0)?;
        if let Some(exception) = current.as_exception()? {
            call.write_line(format!("recovered from {exception}"));
            call.set(1, EmValue::I32(0))?;
        }
        Ok(CallOutcome::Return(Some(EmValue::Null)))
    })
    .param("__exception")
    .by_ref("__result")
    .returns(ReturnKind::Value);

    let mut patcher = Patcher::new(runtime);
    patcher.patch(
        add,
        HookSet::new()
            .prefix(log_operands)
            .postfix(log_result)
            .finalizer(recover.clone()),
    )?;
    patcher.patch(divide, HookSet::new().finalizer(recover))?;

    let runtime = patcher.host_mut();
    let sum = runtime.invoke(add, &[EmValue::I32(4), EmValue::I32(2)])?;
    let quotient = runtime.invoke(divide, &[EmValue::I32(1), EmValue::I32(0)])?;

    for line in runtime.take_console() {
        println!("{line}");
    }
    println!("Add(4, 2) = {sum:?}");
    println!("Divide(1, 0) = {quotient:?}");
    println!();
    println!("{}", runtime.dump(add)?);

    patcher.dispose_all()?;
    let sum = patcher
        .host_mut()
        .invoke(add, &[EmValue::I32(4), EmValue::I32(2)])?;
    println!("unpatched Add(4, 2) = {sum:?}");
    Ok(())
}
