//! Integration tests for prefix, postfix and finalizer patches executed on the reference
//! runtime.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use dotpatch::{emulation::DIVIDE_BY_ZERO, prelude::*};

/// `static int Calculator::Add(int a, int b) => a + b;`
fn define_add(runtime: &mut Runtime) -> Result<Token> {
    runtime.define_method(
        MethodDescriptor::new("Add", "Calculator")
            .param("a", TypeSig::I32)
            .param("b", TypeSig::I32)
            .returns(TypeSig::I32),
        MethodBodyBuilder::new()
            .implementation(|asm| {
                asm.ldarg(0)?.ldarg(1)?.add()?.ret()?;
                Ok(())
            })
            .build()?,
    )
}

/// `static int Calculator::Divide(int a, int b) => a / b;`
fn define_divide(runtime: &mut Runtime) -> Result<Token> {
    runtime.define_method(
        MethodDescriptor::new("Divide", "Calculator")
            .param("a", TypeSig::I32)
            .param("b", TypeSig::I32)
            .returns(TypeSig::I32),
        MethodBodyBuilder::new()
            .implementation(|asm| {
                asm.ldarg(0)?.ldarg(1)?.div()?.ret()?;
                Ok(())
            })
            .build()?,
    )
}

fn int(outcome: &CallOutcome) -> Option<i32> {
    outcome.value().and_then(|value| value.as_i32().ok())
}

fn exception_type(outcome: &CallOutcome) -> Option<&str> {
    outcome.exception().map(|e| e.type_name.as_str())
}

fn counter() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    (Arc::clone(&count), count)
}

/// Void prefix logging both operands.
fn log_operands() -> Hook {
    Hook::new("LogOperands", |call| {
        let (a, b) = (call.arg(0)?.as_i32()?, call.arg(1)?.as_i32()?);
        call.write_line(format!("{a} + {b}"));
        Ok(CallOutcome::Return(None))
    })
    .param("a")
    .param("b")
}

/// Postfix reading `__result` by value.
fn log_result() -> Hook {
    Hook::new("LogResult", |call| {
        let result = call.arg(0)?.as_i32()?;
        call.write_line(format!("The results are: {result}"));
        Ok(CallOutcome::Return(None))
    })
    .param("__result")
}

/// Finalizer returning `null`, which clears any exception.
fn swallow() -> Hook {
    Hook::new("Swallow", |_| Ok(CallOutcome::Return(Some(EmValue::Null))))
        .param("__exception")
        .returns(ReturnKind::Value)
}

#[test]
fn test_unpatched_method_runs_unchanged() -> Result<()> {
    let mut runtime = Runtime::new();
    let add = define_add(&mut runtime)?;

    let outcome = runtime.invoke(add, &[EmValue::I32(4), EmValue::I32(2)])?;
    assert_eq!(int(&outcome), Some(6));
    assert!(runtime.console().is_empty());
    assert!(runtime.detours(add).is_empty());
    Ok(())
}

#[test]
fn test_add_scenario() -> Result<()> {
    let mut runtime = Runtime::new();
    let add = define_add(&mut runtime)?;

    let mut patcher = Patcher::new(runtime);
    patcher.patch(
        add,
        HookSet::new()
            .prefix(log_operands())
            .postfix(log_result())
            .finalizer(swallow()),
    )?;

    let outcome = patcher
        .host_mut()
        .invoke(add, &[EmValue::I32(4), EmValue::I32(2)])?;
    assert_eq!(int(&outcome), Some(6));
    assert_eq!(patcher.host().console(), ["4 + 2", "The results are: 6"]);
    Ok(())
}

#[test]
fn test_bool_prefix_controls_body() -> Result<()> {
    let mut runtime = Runtime::new();
    let add = define_add(&mut runtime)?;

    // bool Prefix(int a) => a != 0;
    let guard = Hook::new("NonZero", |call| {
        Ok(CallOutcome::Return(Some(EmValue::Bool(
            call.arg(0)?.as_i32()? != 0,
        ))))
    })
    .param("a")
    .returns(ReturnKind::Bool);

    let (postfixes, seen) = counter();
    let postfix = Hook::new("Count", move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(CallOutcome::Return(None))
    });

    let mut patcher = Patcher::new(runtime);
    patcher.patch(add, HookSet::new().prefix(guard).postfix(postfix))?;
    let runtime = patcher.host_mut();

    let outcome = runtime.invoke(add, &[EmValue::I32(4), EmValue::I32(2)])?;
    assert_eq!(int(&outcome), Some(6));
    assert_eq!(postfixes.load(Ordering::SeqCst), 1);

    // skipped: the default of the return type, and no postfix
    let outcome = runtime.invoke(add, &[EmValue::I32(0), EmValue::I32(2)])?;
    assert_eq!(int(&outcome), Some(0));
    assert_eq!(postfixes.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn test_false_prefix_skips_later_prefixes() -> Result<()> {
    let mut runtime = Runtime::new();
    let add = define_add(&mut runtime)?;

    let deny = Hook::new("Deny", |call| {
        call.write_line("deny");
        Ok(CallOutcome::Return(Some(EmValue::Bool(false))))
    })
    .returns(ReturnKind::Bool);
    let (second_runs, seen) = counter();
    let second = Hook::new("Second", move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(CallOutcome::Return(None))
    });

    let mut patcher = Patcher::new(runtime);
    patcher.patch(add, HookSet::new().prefix(deny).prefix(second))?;

    let outcome = patcher
        .host_mut()
        .invoke(add, &[EmValue::I32(4), EmValue::I32(2)])?;
    assert_eq!(int(&outcome), Some(0));
    assert_eq!(second_runs.load(Ordering::SeqCst), 0);
    assert_eq!(patcher.host().console(), ["deny"]);
    Ok(())
}

#[test]
fn test_postfix_overwrites_result() -> Result<()> {
    let mut runtime = Runtime::new();
    let add = define_add(&mut runtime)?;

    let zero = Hook::new("Zero", |call| {
        call.set(0, EmValue::I32(0))?;
        Ok(CallOutcome::Return(None))
    })
    .by_ref("__result");

    let mut patcher = Patcher::new(runtime);
    patcher.patch(add, HookSet::new().postfix(zero))?;

    let outcome = patcher
        .host_mut()
        .invoke(add, &[EmValue::I32(4), EmValue::I32(2)])?;
    assert_eq!(int(&outcome), Some(0));
    Ok(())
}

#[test]
fn test_prefix_writes_original_argument() -> Result<()> {
    let mut runtime = Runtime::new();
    let add = define_add(&mut runtime)?;

    let double_a = Hook::new("DoubleA", |call| {
        let a = call.value(0)?.as_i32()?;
        call.set(0, EmValue::I32(a * 2))?;
        Ok(CallOutcome::Return(None))
    })
    .by_ref("a");

    let mut patcher = Patcher::new(runtime);
    patcher.patch(add, HookSet::new().prefix(double_a))?;

    let outcome = patcher
        .host_mut()
        .invoke(add, &[EmValue::I32(4), EmValue::I32(2)])?;
    assert_eq!(int(&outcome), Some(10));
    Ok(())
}

#[test]
fn test_prefix_writes_through_by_ref_parameter() -> Result<()> {
    let mut runtime = Runtime::new();
    // static void Counter::Increment(ref int x) => x += 1;
    let increment = runtime.define_method(
        MethodDescriptor::new("Increment", "Counter").param_by_ref("x", TypeSig::I32),
        MethodBodyBuilder::new()
            .implementation(|asm| {
                asm.ldarg(0)?
                    .ldarg(0)?
                    .ldind()?
                    .ldc_i4(1)?
                    .add()?
                    .stind()?
                    .ret()?;
                Ok(())
            })
            .build()?,
    )?;
    // static int Counter::Run() { int x = 5; Increment(ref x); return x; }
    let run = runtime.define_method(
        MethodDescriptor::new("Run", "Counter").returns(TypeSig::I32),
        MethodBodyBuilder::new()
            .local("x", TypeSig::I32)
            .implementation(move |asm| {
                asm.ldc_i4(5)?
                    .stloc(0)?
                    .ldloca(0)?
                    .call(increment)?
                    .ldloc(0)?
                    .ret()?;
                Ok(())
            })
            .build()?,
    )?;

    let reset = Hook::new("Reset", |call| {
        call.set(0, EmValue::I32(100))?;
        Ok(CallOutcome::Return(None))
    })
    .by_ref("x");

    let mut patcher = Patcher::new(runtime);
    patcher.patch(increment, HookSet::new().prefix(reset))?;

    let outcome = patcher.host_mut().invoke(run, &[])?;
    assert_eq!(int(&outcome), Some(101));
    Ok(())
}

#[test]
fn test_instance_reads_receiver() -> Result<()> {
    let mut runtime = Runtime::new();
    // int Counter::get_Count() => this.count;
    let get_count = runtime.define_method(
        MethodDescriptor::new("get_Count", "Counter")
            .instance()
            .returns(TypeSig::I32),
        MethodBodyBuilder::new()
            .implementation(|asm| {
                asm.ldarg(0)?.ldfld("count")?.ret()?;
                Ok(())
            })
            .build()?,
    )?;

    let bump = Hook::new("Bump", |call| {
        let count = call.field(0, "count")?.as_i32()?;
        call.write_line(format!("count was {count}"));
        call.set_field(0, "count", EmValue::I32(count + 1))
            .map(|()| CallOutcome::Return(None))
    })
    .param("__instance");

    let counter = runtime
        .heap_mut()
        .alloc_object_with_fields("Counter", vec![("count", EmValue::I32(2))])?;

    let mut patcher = Patcher::new(runtime);
    patcher.patch(get_count, HookSet::new().prefix(bump))?;

    let outcome = patcher
        .host_mut()
        .invoke(get_count, &[EmValue::Object(counter)])?;
    assert_eq!(int(&outcome), Some(3));
    assert_eq!(patcher.host().console(), ["count was 2"]);
    assert_eq!(
        patcher.host().heap().get_field(counter, "count")?,
        EmValue::I32(3)
    );
    Ok(())
}

#[test]
fn test_finalizer_clears_body_exception() -> Result<()> {
    let mut runtime = Runtime::new();
    let divide = define_divide(&mut runtime)?;

    // void Finalizer(ref Exception __exception, ref int __result)
    let recover = Hook::new("Recover", |call| {
        let current = call.value(0)?;
        if let Some(exception) = current.as_exception()? {
            call.write_line(exception.type_name.clone());
            call.set(0, EmValue::Null)?;
            call.set(1, EmValue::I32(-1))?;
        }
        Ok(CallOutcome::Return(None))
    })
    .by_ref("__exception")
    .by_ref("__result");

    let mut patcher = Patcher::new(runtime);
    patcher.patch(divide, HookSet::new().finalizer(recover))?;
    let runtime = patcher.host_mut();

    let outcome = runtime.invoke(divide, &[EmValue::I32(8), EmValue::I32(2)])?;
    assert_eq!(int(&outcome), Some(4));
    assert!(runtime.console().is_empty());

    let outcome = runtime.invoke(divide, &[EmValue::I32(8), EmValue::I32(0)])?;
    assert_eq!(int(&outcome), Some(-1));
    assert_eq!(runtime.console(), [DIVIDE_BY_ZERO]);
    Ok(())
}

#[test]
fn test_finalizer_replaces_exception() -> Result<()> {
    let mut runtime = Runtime::new();
    let divide = define_divide(&mut runtime)?;

    let wrap = Hook::new("Wrap", |call| {
        let current = call.arg(0)?;
        let replacement = match current.as_exception()? {
            Some(inner) => EmValue::exception("System.ArithmeticException", &inner.message),
            None => EmValue::Null,
        };
        Ok(CallOutcome::Return(Some(replacement)))
    })
    .param("__exception")
    .returns(ReturnKind::Value);

    let mut patcher = Patcher::new(runtime);
    patcher.patch(divide, HookSet::new().finalizer(wrap))?;
    let runtime = patcher.host_mut();

    let outcome = runtime.invoke(divide, &[EmValue::I32(9), EmValue::I32(3)])?;
    assert_eq!(int(&outcome), Some(3));

    let outcome = runtime.invoke(divide, &[EmValue::I32(9), EmValue::I32(0)])?;
    assert_eq!(
        exception_type(&outcome),
        Some("System.ArithmeticException")
    );
    Ok(())
}

#[test]
fn test_finalizer_replacement_short_circuits_chain() -> Result<()> {
    let mut runtime = Runtime::new();
    let add = define_add(&mut runtime)?;

    let fail = Hook::new("Fail", |_| {
        Ok(CallOutcome::Return(Some(EmValue::exception(
            "System.InvalidOperationException",
            "rejected",
        ))))
    })
    .returns(ReturnKind::Value);
    let (later_runs, seen) = counter();
    let later = Hook::new("Later", move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(CallOutcome::Return(None))
    });

    let mut patcher = Patcher::new(runtime);
    patcher.patch(add, HookSet::new().finalizer(fail).finalizer(later))?;

    let outcome = patcher
        .host_mut()
        .invoke(add, &[EmValue::I32(1), EmValue::I32(2)])?;
    assert_eq!(
        exception_type(&outcome),
        Some("System.InvalidOperationException")
    );
    assert_eq!(later_runs.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn test_skipped_call_still_runs_finalizers() -> Result<()> {
    let mut runtime = Runtime::new();
    let add = define_add(&mut runtime)?;

    let deny = Hook::new("Deny", |_| Ok(CallOutcome::Return(Some(EmValue::Bool(false)))))
        .returns(ReturnKind::Bool);
    let finally = Hook::new("Finally", |call| {
        let seen = match call.arg(0)? {
            EmValue::Null => "no exception".to_string(),
            other => other.to_string(),
        };
        call.write_line(seen);
        Ok(CallOutcome::Return(None))
    })
    .param("__exception");

    let mut patcher = Patcher::new(runtime);
    patcher.patch(add, HookSet::new().prefix(deny).finalizer(finally))?;

    let outcome = patcher
        .host_mut()
        .invoke(add, &[EmValue::I32(4), EmValue::I32(2)])?;
    assert_eq!(int(&outcome), Some(0));
    assert_eq!(patcher.host().console(), ["no exception"]);
    Ok(())
}

#[test]
fn test_by_ref_exception_on_normal_path_throws() -> Result<()> {
    let mut runtime = Runtime::new();
    let add = define_add(&mut runtime)?;

    // void Finalizer(ref Exception __exception) => __exception = new NotSupportedException();
    let veto = Hook::new("Veto", |call| {
        call.set(
            0,
            EmValue::exception("System.NotSupportedException", "vetoed"),
        )?;
        Ok(CallOutcome::Return(None))
    })
    .by_ref("__exception");
    let (later_runs, seen) = counter();
    let later = Hook::new("Later", move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(CallOutcome::Return(None))
    });

    let mut patcher = Patcher::new(runtime);
    patcher.patch(add, HookSet::new().finalizer(veto).finalizer(later))?;

    let outcome = patcher
        .host_mut()
        .invoke(add, &[EmValue::I32(1), EmValue::I32(2)])?;
    assert_eq!(
        exception_type(&outcome),
        Some("System.NotSupportedException")
    );
    // the whole chain runs before the pending exception is raised
    assert_eq!(later_runs.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn test_finalizer_sees_exception_from_block_after_return() -> Result<()> {
    let mut runtime = Runtime::new();
    let failure = runtime.define_native("Failure", 0, true, |_| {
        Ok(CallOutcome::Return(Some(EmValue::exception(
            "System.InvalidOperationException",
            "boom",
        ))))
    })?;
    // static int Guard::Check(int a) { if (a == 0) throw Failure(); return a; }
    // compiled with the throw block placed after the return
    let check = runtime.define_method(
        MethodDescriptor::new("Check", "Guard")
            .param("a", TypeSig::I32)
            .returns(TypeSig::I32),
        MethodBodyBuilder::new()
            .implementation(move |asm| {
                asm.ldarg(0)?
                    .brfalse("fail")?
                    .ldarg(0)?
                    .ret()?
                    .label("fail")?
                    .call(failure)?
                    .throw()?;
                Ok(())
            })
            .build()?,
    )?;

    let outcome = runtime.invoke(check, &[EmValue::I32(0)])?;
    assert_eq!(
        exception_type(&outcome),
        Some("System.InvalidOperationException")
    );

    let observe = Hook::new("Observe", |call| {
        if let EmValue::Exception(exception) = call.arg(0)? {
            call.write_line(exception.to_string());
        }
        Ok(CallOutcome::Return(Some(EmValue::Null)))
    })
    .param("__exception")
    .returns(ReturnKind::Value);

    let mut patcher = Patcher::new(runtime);
    patcher.patch(check, HookSet::new().postfix(log_result()).finalizer(observe))?;
    let runtime = patcher.host_mut();

    assert_eq!(int(&runtime.invoke(check, &[EmValue::I32(5)])?), Some(5));
    assert_eq!(int(&runtime.invoke(check, &[EmValue::I32(0)])?), Some(0));
    assert_eq!(
        runtime.console(),
        [
            "The results are: 5",
            "System.InvalidOperationException: boom"
        ]
    );
    Ok(())
}

#[test]
fn test_prefix_exception_propagates_without_finalizer() -> Result<()> {
    let mut runtime = Runtime::new();
    let add = define_add(&mut runtime)?;

    let reject = Hook::new("Reject", |_| {
        Ok(CallOutcome::Throw(EmValue::exception(
            "System.ArgumentException",
            "no",
        )))
    });
    let mut patcher = Patcher::new(runtime);
    patcher.patch(add, HookSet::new().prefix(reject).postfix(log_result()))?;

    let outcome = patcher
        .host_mut()
        .invoke(add, &[EmValue::I32(1), EmValue::I32(2)])?;
    assert_eq!(exception_type(&outcome), Some("System.ArgumentException"));
    assert!(patcher.host().console().is_empty());
    Ok(())
}

#[test]
fn test_postfix_exception_reaches_finalizer() -> Result<()> {
    let mut runtime = Runtime::new();
    let add = define_add(&mut runtime)?;

    let explode = Hook::new("Explode", |_| {
        Ok(CallOutcome::Throw(EmValue::exception(
            "System.InvalidOperationException",
            "postfix",
        )))
    });
    let observe = Hook::new("Observe", |call| {
        let seen = match call.arg(0)? {
            EmValue::Exception(exception) => exception.to_string(),
            _ => "none".to_string(),
        };
        call.write_line(seen);
        Ok(CallOutcome::Return(None))
    })
    .param("__exception");

    let mut patcher = Patcher::new(runtime);
    patcher.patch(add, HookSet::new().postfix(explode).finalizer(observe))?;

    let outcome = patcher
        .host_mut()
        .invoke(add, &[EmValue::I32(1), EmValue::I32(2)])?;
    assert_eq!(
        exception_type(&outcome),
        Some("System.InvalidOperationException")
    );
    assert_eq!(
        patcher.host().console(),
        ["System.InvalidOperationException: postfix"]
    );
    Ok(())
}

#[test]
fn test_void_method_hooks() -> Result<()> {
    let mut runtime = Runtime::new();
    let log = runtime.define_native("Log", 1, false, |call| {
        let text = call.arg(0)?.as_str()?.to_string();
        call.write_line(text);
        Ok(CallOutcome::Return(None))
    })?;
    // static void Greeter::Greet() => Log("hello");
    let greet = runtime.define_method(
        MethodDescriptor::new("Greet", "Greeter"),
        MethodBodyBuilder::new()
            .implementation(move |asm| {
                asm.ldstr("hello")?.call(log)?.ret()?;
                Ok(())
            })
            .build()?,
    )?;

    let line = |name: &'static str| {
        Hook::new(name, move |call| {
            call.write_line(name);
            Ok(CallOutcome::Return(None))
        })
    };

    let mut patcher = Patcher::new(runtime);
    patcher.patch(
        greet,
        HookSet::new()
            .prefix(line("before"))
            .postfix(line("after"))
            .finalizer(line("finally")),
    )?;

    let outcome = patcher.host_mut().invoke(greet, &[])?;
    assert_eq!(outcome, CallOutcome::Return(None));
    assert_eq!(
        patcher.host().console(),
        ["before", "hello", "after", "finally"]
    );
    Ok(())
}

#[test]
fn test_multiple_returns_pass_through_postfix() -> Result<()> {
    let mut runtime = Runtime::new();
    // static int Math::Sign(int a) { if (a < 0) return -1; return 1; }
    let sign = runtime.define_method(
        MethodDescriptor::new("Sign", "Math")
            .param("a", TypeSig::I32)
            .returns(TypeSig::I32),
        MethodBodyBuilder::new()
            .implementation(|asm| {
                asm.ldarg(0)?
                    .ldc_i4(0)?
                    .bge("positive")?
                    .ldc_i4(-1)?
                    .ret()?
                    .label("positive")?
                    .ldc_i4(1)?
                    .ret()?;
                Ok(())
            })
            .build()?,
    )?;

    let mut patcher = Patcher::new(runtime);
    patcher.patch(sign, HookSet::new().postfix(log_result()))?;
    let runtime = patcher.host_mut();

    assert_eq!(int(&runtime.invoke(sign, &[EmValue::I32(-5)])?), Some(-1));
    assert_eq!(int(&runtime.invoke(sign, &[EmValue::I32(5)])?), Some(1));
    assert_eq!(
        runtime.console(),
        ["The results are: -1", "The results are: 1"]
    );
    Ok(())
}

#[test]
fn test_unpatch_restores_behavior() -> Result<()> {
    let mut runtime = Runtime::new();
    let add = define_add(&mut runtime)?;
    let pristine = runtime.body(add).cloned();

    let (prefix_runs, seen) = counter();
    let prefix = Hook::new("Count", move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(CallOutcome::Return(None))
    });

    let mut patcher = Patcher::new(runtime);
    let handle = patcher.patch(add, HookSet::new().prefix(prefix))?;
    patcher
        .host_mut()
        .invoke(add, &[EmValue::I32(1), EmValue::I32(1)])?;
    assert_eq!(prefix_runs.load(Ordering::SeqCst), 1);

    patcher.unpatch(handle)?;
    let outcome = patcher
        .host_mut()
        .invoke(add, &[EmValue::I32(1), EmValue::I32(1)])?;
    assert_eq!(int(&outcome), Some(2));
    assert_eq!(prefix_runs.load(Ordering::SeqCst), 1);
    assert_eq!(patcher.host().body(add).cloned(), pristine);
    assert!(patcher.installed().is_empty());

    assert!(matches!(
        patcher.unpatch(handle),
        Err(Error::DetourNotFound { .. })
    ));
    Ok(())
}

#[test]
fn test_binding_error_leaves_method_untouched() -> Result<()> {
    let mut runtime = Runtime::new();
    let add = define_add(&mut runtime)?;
    let mut patcher = Patcher::new(runtime);

    let unknown = Hook::new("Unknown", |_| Ok(CallOutcome::Return(None))).param("c");
    let err = patcher
        .patch(add, HookSet::new().prefix(log_operands()).postfix(unknown))
        .unwrap_err();
    assert!(matches!(err, Error::Binding(_)));
    assert!(err.to_string().contains("'c'"));

    let result_in_prefix =
        Hook::new("Early", |_| Ok(CallOutcome::Return(None))).param("__result");
    assert!(matches!(
        patcher.patch(add, HookSet::new().prefix(result_in_prefix)),
        Err(Error::Binding(_))
    ));

    let exception_in_postfix =
        Hook::new("Late", |_| Ok(CallOutcome::Return(None))).param("__exception");
    assert!(matches!(
        patcher.patch(add, HookSet::new().postfix(exception_in_postfix)),
        Err(Error::Binding(_))
    ));

    assert!(patcher.installed().is_empty());
    assert!(patcher.host().detours(add).is_empty());

    let outcome = patcher
        .host_mut()
        .invoke(add, &[EmValue::I32(4), EmValue::I32(2)])?;
    assert_eq!(int(&outcome), Some(6));
    assert!(patcher.host().console().is_empty());
    Ok(())
}
