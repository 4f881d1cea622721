//! End-to-end tests: build a module, rewrite it, encode it, run it
//!
//! Every program here is run twice, unrewritten on a bare VM and rewritten
//! through a dispatch runtime, and both runs must agree.

mod common;

use common::*;
use shadowcall::backend::bytecode::{BodyBuilder, FunctionDef, Module, Opcode, Param, Vm};
use shadowcall::backend::{
    DispatchError, RewriteConfig, RewriteError, Rewriter, RuntimeConfig, TypeRef, Value, VmError,
};
use shadowcall::Config;
use std::sync::Arc;

fn rewrite(mut module: Module) -> Module {
    Rewriter::default().rewrite(&mut module).expect("rewrite succeeds");
    module
}

#[test]
fn test_three_methods_agree_with_baseline() {
    let baseline = run_plain(three_methods(Some("Pure")));
    assert_eq!(baseline, Value::Int(12));

    let (value, stats) = run_shadow(rewrite(three_methods(Some("Pure"))));
    assert_eq!(value, Value::Int(12));
    assert_eq!(stats.submitted, 3);
    assert_eq!(stats.faulted, 0);
}

#[test]
fn test_shadow_module_survives_artifact_encoding() {
    let shadow = rewrite(three_methods(Some("Pure")));
    let decoded = Module::from_bytes(&shadow.to_bytes()).expect("decodes");
    assert_eq!(decoded, shadow);
    assert!(decoded.shadow);

    // A decoded shadow module is never rewritten twice
    let mut again = decoded.clone();
    assert_eq!(Rewriter::default().rewrite(&mut again), Err(RewriteError::AlreadyRewritten));

    let (value, _) = run_shadow(decoded);
    assert_eq!(value, Value::Int(12));
}

/// `acc = 0; for i in 0..10 { acc = acc + square(i) }; acc`
fn sum_of_squares() -> Module {
    ProgramBuilder::new()
        .int_fn("square", 1, Some("Pure"), |_, b| {
            b.emit_byte(Opcode::LoadArg, 0);
            b.emit_byte(Opcode::LoadArg, 0);
            b.emit(Opcode::Mul);
            b.emit(Opcode::Return);
        })
        .main(|p, b| {
            let acc = b.add_local(TypeRef::Int);
            let i = b.add_local(TypeRef::Int);
            b.emit_int(0);
            b.emit_byte(Opcode::StoreLocal, acc);
            b.emit_int(0);
            b.emit_byte(Opcode::StoreLocal, i);

            let loop_start = b.current_offset();
            b.emit_byte(Opcode::LoadLocal, i);
            b.emit_int(10);
            b.emit(Opcode::Lt);
            let exit = b.emit_jump(Opcode::JumpIfFalse);

            let square = p.symbol("square");
            b.emit_byte(Opcode::LoadLocal, acc);
            b.emit_byte(Opcode::LoadLocal, i);
            b.emit_call(square, 1);
            b.emit(Opcode::Add);
            b.emit_byte(Opcode::StoreLocal, acc);

            b.emit_byte(Opcode::LoadLocal, i);
            b.emit_int(1);
            b.emit(Opcode::Add);
            b.emit_byte(Opcode::StoreLocal, i);
            b.emit_loop(loop_start);

            b.patch_jump(exit);
            b.emit_byte(Opcode::LoadLocal, acc);
            b.emit(Opcode::Return);
        })
}

#[test]
fn test_loop_of_deferred_calls() {
    assert_eq!(run_plain(sum_of_squares()), Value::Int(285));

    let mut module = sum_of_squares();
    let report = Rewriter::default().rewrite(&mut module).expect("rewrite");
    assert_eq!(report.patches.unwraps_inserted, 1);
    assert_eq!(report.patches.branch_warnings, 0);

    let (value, stats) = run_shadow(module);
    assert_eq!(value, Value::Int(285));
    assert_eq!(stats.submitted, 10);
}

#[test]
fn test_identical_calls_share_one_computation() {
    let module = ProgramBuilder::new()
        .int_fn("double", 1, Some("Pure"), doubling)
        .main(|p, b| {
            p.call(b, "double", &[16]);
            p.call(b, "double", &[16]);
            b.emit(Opcode::Add);
            b.emit(Opcode::Return);
        });

    let (value, stats) = run_shadow(rewrite(module));
    assert_eq!(value, Value::Int(64));
    assert_eq!(stats.submitted, 1);
    assert_eq!(stats.reused, 1);
    assert_eq!(stats.entries, 1);
}

#[test]
fn test_deferred_result_returned_from_entry() {
    let module = ProgramBuilder::new()
        .int_fn("add", 2, Some("Pure"), adding)
        .main(|p, b| {
            p.call(b, "add", &[40, 2]);
            b.emit(Opcode::Return);
        });

    let shadow = rewrite(module);
    let runtime = runtime(shadow, RuntimeConfig::default());
    let result = Vm::new(Arc::clone(runtime.program()))
        .with_runtime(Arc::clone(&runtime))
        .run_entry()
        .expect("runs");

    let Value::Deferred(deferred) = result else {
        panic!("expected a deferred result, got {:?}", result);
    };
    // Calls are keyed by the hidden implementation they run
    assert_eq!(deferred.fingerprint().function.as_ref(), "add__impl");
    assert_eq!(deferred.typed::<i64>().value(), Ok(42));
    runtime.registry().clear();
}

#[test]
fn test_void_pure_function_is_fire_and_forget() {
    let mut log = BodyBuilder::new();
    log.emit(Opcode::PushNil);
    log.emit(Opcode::Return);
    let log = FunctionDef::new(
        "log",
        vec![Param::new("x", TypeRef::Int)],
        TypeRef::Void,
        log.build().expect("body"),
    )
    .with_attribute("Pure");

    let module = ProgramBuilder::new().function(log).main(|p, b| {
        p.call(b, "log", &[1]);
        b.emit(Opcode::Pop);
        b.emit_int(7);
        b.emit(Opcode::Return);
    });

    let shadow = rewrite(module);
    let stub = shadow.find_function(&sym("log")).expect("stub");
    assert_eq!(stub.return_type, TypeRef::Void);

    let (value, stats) = run_shadow(shadow);
    assert_eq!(value, Value::Int(7));
    assert_eq!(stats.submitted, 1);
}

#[test]
fn test_fault_in_hidden_implementation_reaches_caller() {
    let module = ProgramBuilder::new()
        .int_fn("div", 2, Some("Pure"), |_, b| {
            b.emit_byte(Opcode::LoadArg, 0);
            b.emit_byte(Opcode::LoadArg, 1);
            b.emit(Opcode::Div);
            b.emit(Opcode::Return);
        })
        .main(|p, b| {
            p.call(b, "div", &[1, 0]);
            b.emit_int(1);
            b.emit(Opcode::Add);
            b.emit(Opcode::Return);
        });

    let runtime = runtime(rewrite(module), RuntimeConfig::default());
    let err = Vm::new(Arc::clone(runtime.program()))
        .with_runtime(Arc::clone(&runtime))
        .run_entry()
        .expect_err("division by zero surfaces");
    match err {
        VmError::Dispatch(DispatchError::Faulted { call, reason }) => {
            assert!(call.contains("div"), "call was {}", call);
            assert!(reason.contains("Division by zero"), "reason was {}", reason);
        }
        other => panic!("unexpected error {:?}", other),
    }
    runtime.registry().clear();
}

#[test]
fn test_custom_marker_from_config() {
    let config = Config::from_toml_str("[rewrite]\nmarker = \"Parallel\"\nclone_suffix = \"_body\"\n")
        .expect("valid config");

    let mut module = three_methods(Some("Parallel"));
    let report = Rewriter::new(config.rewrite.clone()).rewrite(&mut module).expect("rewrite");
    assert_eq!(report.clones[0], sym("Method1_body"));

    // The default marker does not match
    let mut unmarked = three_methods(Some("Parallel"));
    let report = Rewriter::new(RewriteConfig::default()).rewrite(&mut unmarked).expect("rewrite");
    assert!(report.rewritten.is_empty());

    let (value, _) = run_shadow(module);
    assert_eq!(value, Value::Int(12));
}
