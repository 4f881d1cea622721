//! Tests for the binary rewriter and dataflow pass.

use std::sync::Arc;

use super::*;
use crate::backend::bytecode::{
    BodyBuilder, FunctionBody, Module, Opcode, Param, Program, TypeDef, Vm, VmError,
};
use crate::backend::dispatch::{CallFingerprint, DispatchRuntime, FutureRegistry, RuntimeConfig};
use crate::backend::models::{TypeRef, Value};

const TYPE: &str = "demo.Program";

fn sym(name: &str) -> SymbolRef {
    SymbolRef::new(TYPE, name)
}

/// `x * x`
fn square_body() -> FunctionBody {
    let mut b = BodyBuilder::new();
    b.emit_byte(Opcode::LoadArg, 0);
    b.emit_byte(Opcode::LoadArg, 0);
    b.emit(Opcode::Mul);
    b.emit(Opcode::Return);
    b.build().expect("body")
}

/// `x + 100`
fn shift_body() -> FunctionBody {
    let mut b = BodyBuilder::new();
    b.emit_byte(Opcode::LoadArg, 0);
    b.emit_int(100);
    b.emit(Opcode::Add);
    b.emit(Opcode::Return);
    b.build().expect("body")
}

fn int_fn(name: &str, body: FunctionBody) -> FunctionDef {
    FunctionDef::new(name, vec![Param::new("x", TypeRef::Int)], TypeRef::Int, body)
}

/// Module with pure `square` and `shift` plus a `main` built by `f`
fn module_with_main(f: impl FnOnce(&mut Module, &mut BodyBuilder)) -> Module {
    let mut module = Module::new();
    let mut main = BodyBuilder::new();
    f(&mut module, &mut main);
    module
        .with_type(
            TypeDef::new(TYPE)
                .with_function(int_fn("square", square_body()).with_attribute("Pure"))
                .with_function(int_fn("shift", shift_body()).with_attribute("Pure"))
                .with_function(FunctionDef::new("main", vec![], TypeRef::Int, main.build().expect("main"))),
        )
        .with_entry(sym("main"))
}

fn call(module: &mut Module, b: &mut BodyBuilder, name: &str, arg: i64) {
    let index = module.intern_symbol(sym(name)).expect("symbol");
    b.emit_int(arg);
    b.emit_call(index, 1);
}

fn rewritten(mut module: Module, config: RewriteConfig) -> (Module, RewriteReport) {
    let report = Rewriter::new(config).rewrite(&mut module).expect("rewrite");
    (module, report)
}

fn runtime_for(module: Module) -> Arc<DispatchRuntime> {
    let program = Arc::new(Program::link(module).expect("links"));
    DispatchRuntime::new(program, Arc::new(FutureRegistry::new()), RuntimeConfig::default()).expect("runtime")
}

fn run_entry(runtime: &Arc<DispatchRuntime>) -> Result<Value, VmError> {
    Vm::new(Arc::clone(runtime.program()))
        .with_runtime(Arc::clone(runtime))
        .run_entry()
}

fn opcodes(body: &FunctionBody) -> Vec<Opcode> {
    body.instructions().expect("decodes").iter().map(|i| i.opcode).collect()
}

#[test]
fn test_rewrite_clones_and_stubs_marked_functions() {
    let module = module_with_main(|m, b| {
        call(m, b, "square", 3);
        b.emit(Opcode::Return);
    });
    let original_square = module.find_function(&sym("square")).expect("square").clone();
    let (module, report) = rewritten(module, RewriteConfig::default());

    assert!(module.shadow);
    assert_eq!(report.rewritten, vec![sym("square"), sym("shift")]);
    assert_eq!(report.clones, vec![sym("square__impl"), sym("shift__impl")]);

    let clone = module.find_function(&sym("square__impl")).expect("clone");
    assert_eq!(clone.body.code(), original_square.body.code());
    assert!(clone.attributes.is_empty());

    let stub = module.find_function(&sym("square")).expect("stub");
    assert_eq!(stub.return_type, TypeRef::Int.deferred());
    assert_eq!(stub.params, original_square.params);
    assert!(opcodes(&stub.body).contains(&Opcode::Submit));
    assert!(module.symbol_index(&sym("square__impl")).is_some());

    // Clones are appended after the original functions of their type
    let names: Vec<_> = module.types[0].functions.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["square", "shift", "main", "square__impl", "shift__impl"]);
}

#[test]
fn test_clone_matches_baseline() {
    let module = module_with_main(|_, b| {
        b.emit(Opcode::PushNil);
        b.emit(Opcode::Return);
    });
    let baseline = Arc::new(Program::link(module.clone()).expect("links"));
    let (shadow, _) = rewritten(module, RewriteConfig::default());
    let shadow = Arc::new(Program::link(shadow).expect("links"));

    let original = baseline.lookup(&sym("square")).expect("square");
    let hidden = shadow.lookup(&sym("square__impl")).expect("clone");
    for x in [-4, 0, 3, 12] {
        let expected = Vm::new(Arc::clone(&baseline)).invoke(original, vec![Value::Int(x)]);
        let actual = Vm::new(Arc::clone(&shadow)).invoke(hidden, vec![Value::Int(x)]);
        assert_eq!(actual, expected);
    }
}

#[test]
fn test_square_of_three_resolves_to_nine() {
    let module = module_with_main(|m, b| {
        call(m, b, "square", 3);
        b.emit(Opcode::Return);
    });
    let (module, _) = rewritten(module, RewriteConfig::default());
    let runtime = runtime_for(module);

    let result = run_entry(&runtime).expect("runs");
    let deferred = result.as_deferred().expect("deferred result").typed::<i64>();
    assert_eq!(deferred.value(), Ok(9));
    assert_eq!(deferred.value(), Ok(9));
    assert_eq!(runtime.registry().len(), 1);
    runtime.registry().clear();
}

#[test]
fn test_straight_line_sum_gets_one_unwrap_per_operand() {
    let module = module_with_main(|m, b| {
        call(m, b, "square", 2);
        call(m, b, "shift", 3);
        b.emit(Opcode::Add);
        b.emit(Opcode::Return);
    });
    let (module, report) = rewritten(module, RewriteConfig::default());
    assert_eq!(report.patches.unwraps_inserted, 2);

    let main = module.find_function(&sym("main")).expect("main");
    assert_eq!(
        opcodes(&main.body),
        vec![
            Opcode::PushIntSmall,
            Opcode::Call,
            Opcode::Unwrap,
            Opcode::PushIntSmall,
            Opcode::Call,
            Opcode::Unwrap,
            Opcode::Add,
            Opcode::Return,
        ]
    );

    let runtime = runtime_for(module);
    assert_eq!(run_entry(&runtime), Ok(Value::Int(4 + 103)));
    runtime.registry().clear();
}

#[test]
fn test_plain_operand_is_left_alone() {
    let module = module_with_main(|m, b| {
        call(m, b, "square", 5);
        b.emit_int(1);
        b.emit(Opcode::Sub);
        b.emit(Opcode::Return);
    });
    let (module, report) = rewritten(module, RewriteConfig::default());
    assert_eq!(report.patches.unwraps_inserted, 1);

    let main = module.find_function(&sym("main")).expect("main");
    let ops = opcodes(&main.body);
    assert_eq!(ops.iter().filter(|&&op| op == Opcode::Unwrap).count(), 1);
    assert_eq!(ops[2], Opcode::Unwrap);

    let runtime = runtime_for(module);
    assert_eq!(run_entry(&runtime), Ok(Value::Int(24)));
    runtime.registry().clear();
}

#[test]
fn test_deferred_local_is_retyped() {
    let mut local = 0;
    let module = module_with_main(|m, b| {
        local = b.add_local(TypeRef::Int);
        call(m, b, "square", 4);
        b.emit_byte(Opcode::StoreLocal, local);
        b.emit_byte(Opcode::LoadLocal, local);
        b.emit_int(2);
        b.emit(Opcode::Mul);
        b.emit(Opcode::Return);
    });
    let (module, report) = rewritten(module, RewriteConfig::default());
    assert_eq!(report.patches.locals_retyped, 1);

    let main = module.find_function(&sym("main")).expect("main");
    assert_eq!(main.body.locals()[local as usize].ty, TypeRef::Int.deferred());
    let ops = opcodes(&main.body);
    let load = ops.iter().position(|&op| op == Opcode::LoadLocal).expect("load");
    assert_eq!(ops[load + 1], Opcode::Unwrap);

    let runtime = runtime_for(module);
    assert_eq!(run_entry(&runtime), Ok(Value::Int(32)));
    runtime.registry().clear();
}

#[test]
fn test_at_store_strategy_unwraps_before_store() {
    let mut local = 0;
    let module = module_with_main(|m, b| {
        local = b.add_local(TypeRef::Int);
        call(m, b, "square", 4);
        b.emit_byte(Opcode::StoreLocal, local);
        b.emit_byte(Opcode::LoadLocal, local);
        b.emit_int(2);
        b.emit(Opcode::Mul);
        b.emit(Opcode::Return);
    });
    let config = RewriteConfig {
        patch_strategy: PatchStrategy::AtStore,
        ..RewriteConfig::default()
    };
    let (module, report) = rewritten(module, config);
    assert_eq!(report.patches.locals_retyped, 0);
    assert_eq!(report.patches.unwraps_inserted, 1);

    let main = module.find_function(&sym("main")).expect("main");
    assert_eq!(main.body.locals()[local as usize].ty, TypeRef::Int);
    let ops = opcodes(&main.body);
    assert_eq!(&ops[1..4], &[Opcode::Call, Opcode::Unwrap, Opcode::StoreLocal]);

    let runtime = runtime_for(module);
    assert_eq!(run_entry(&runtime), Ok(Value::Int(32)));
    runtime.registry().clear();
}

#[test]
fn test_jumps_survive_insertion() {
    // if square(3) > 5 { 1 } else { 2 }
    let module = module_with_main(|m, b| {
        call(m, b, "square", 3);
        b.emit_int(5);
        b.emit(Opcode::Gt);
        let else_label = b.emit_jump(Opcode::JumpIfFalse);
        b.emit_int(1);
        let end = b.emit_jump(Opcode::Jump);
        b.patch_jump(else_label);
        b.emit_int(2);
        b.patch_jump(end);
        b.emit(Opcode::Return);
    });
    let (module, report) = rewritten(module, RewriteConfig::default());
    assert_eq!(report.patches.unwraps_inserted, 1);
    assert_eq!(report.patches.branch_warnings, 0);

    let main = module.find_function(&sym("main")).expect("main");
    let mut check = main.body.clone();
    assert_eq!(check.recompute_max_stack(), Ok(main.body.max_stack()));

    let runtime = runtime_for(module);
    assert_eq!(run_entry(&runtime), Ok(Value::Int(1)));
    runtime.registry().clear();
}

/// `square(3)` is still on the stack below the condition when the branch is taken
fn branch_on_deferred() -> Module {
    module_with_main(|m, b| {
        call(m, b, "square", 3);
        b.emit(Opcode::PushTrue);
        let label = b.emit_jump(Opcode::JumpIfFalse);
        b.patch_jump(label);
        b.emit(Opcode::Return);
    })
}

#[test]
fn test_branch_on_deferred_warns() {
    let (_, report) = rewritten(branch_on_deferred(), RewriteConfig::default());
    assert_eq!(report.patches.branch_warnings, 1);
}

#[test]
fn test_branch_on_deferred_fails_in_strict_mode() {
    let mut module = branch_on_deferred();
    let before = module.clone();
    let config = RewriteConfig {
        strict_branches: true,
        ..RewriteConfig::default()
    };
    let err = Rewriter::new(config).rewrite(&mut module).expect_err("strict");
    assert!(matches!(err, RewriteError::DeferredAcrossBranch { ref function, .. } if *function == sym("main")));
    assert_eq!(module, before);
}

#[test]
fn test_void_function_gets_no_wrapper() {
    let mut b = BodyBuilder::new();
    b.emit(Opcode::PushNil);
    b.emit(Opcode::Return);
    let mut module = Module::new().with_type(
        TypeDef::new(TYPE).with_function(
            FunctionDef::new("log", vec![Param::new("x", TypeRef::Float)], TypeRef::Void, b.build().expect("body"))
                .with_attribute("Pure"),
        ),
    );
    Rewriter::default().rewrite(&mut module).expect("rewrite");

    let stub = module.find_function(&sym("log")).expect("stub");
    assert_eq!(stub.return_type, TypeRef::Void);
    let ops = opcodes(&stub.body);
    assert!(!ops.contains(&Opcode::Defer));
    assert!(ops.contains(&Opcode::Box));
}

#[test]
fn test_unmarked_functions_untouched() {
    let module = module_with_main(|_, b| {
        b.emit_int(1);
        b.emit(Opcode::Return);
    });
    let config = RewriteConfig {
        marker: "Deferred".to_string(),
        ..RewriteConfig::default()
    };
    let (shadow, report) = rewritten(module.clone(), config);
    assert!(report.rewritten.is_empty());
    assert_eq!(shadow.types, module.types);
    assert!(shadow.shadow);
}

#[test]
fn test_rewrite_twice_is_rejected() {
    let (mut module, _) = rewritten(module_with_main(|_, b| {
        b.emit(Opcode::PushNil);
        b.emit(Opcode::Return);
    }), RewriteConfig::default());
    assert_eq!(Rewriter::default().rewrite(&mut module), Err(RewriteError::AlreadyRewritten));
}

#[test]
fn test_clone_name_collision() {
    let mut module = module_with_main(|_, b| {
        b.emit(Opcode::PushNil);
        b.emit(Opcode::Return);
    });
    module.types[0].functions.push(int_fn("square__impl", square_body()));
    let before = module.clone();

    let err = Rewriter::default().rewrite(&mut module).expect_err("collision");
    assert_eq!(
        err,
        RewriteError::CloneNameCollision {
            original: sym("square"),
            clone: sym("square__impl"),
        }
    );
    assert_eq!(module, before);
}

#[test]
fn test_deferred_return_type_is_rejected() {
    let mut module = Module::new().with_type(
        TypeDef::new(TYPE).with_function(
            FunctionDef::new("f", vec![], TypeRef::Int.deferred(), square_body()).with_attribute("Pure"),
        ),
    );
    assert_eq!(
        Rewriter::default().rewrite(&mut module),
        Err(RewriteError::UnsupportedReturnType(sym("f")))
    );
}

#[test]
fn test_malformed_clone_body_aborts() {
    let bad = FunctionBody::from_parts(vec![0xEE], vec![], vec![], 0, false);
    let mut module = Module::new().with_type(
        TypeDef::new(TYPE).with_function(int_fn("f", bad).with_attribute("Pure")),
    );
    let err = Rewriter::default().rewrite(&mut module).expect_err("malformed");
    assert!(matches!(err, RewriteError::MalformedBody { ref function, .. } if *function == sym("f__impl")));
    assert!(!module.shadow);
}

#[test]
fn test_distinct_arguments_get_distinct_entries() {
    let module = module_with_main(|m, b| {
        call(m, b, "shift", 1);
        call(m, b, "shift", 2);
        b.emit(Opcode::Sub);
        b.emit(Opcode::Return);
    });
    let (module, _) = rewritten(module, RewriteConfig::default());
    let runtime = runtime_for(module);

    assert_eq!(run_entry(&runtime), Ok(Value::Int(101 - 102)));
    let stats = runtime.registry().stats();
    assert_eq!((stats.entries, stats.submitted, stats.reused), (2, 2, 0));
    runtime.registry().clear();
}

#[test]
fn test_hidden_implementations_are_patched_too() {
    // quad(x) = square(x) * 2, both pure
    let mut module = Module::new();
    let square = module.intern_symbol(sym("square")).expect("symbol");
    let quad = module.intern_symbol(sym("quad")).expect("symbol");

    let mut quad_body = BodyBuilder::new();
    quad_body.emit_byte(Opcode::LoadArg, 0);
    quad_body.emit_call(square, 1);
    quad_body.emit_int(2);
    quad_body.emit(Opcode::Mul);
    quad_body.emit(Opcode::Return);

    let mut main = BodyBuilder::new();
    main.emit_int(5);
    main.emit_call(quad, 1);
    main.emit(Opcode::Unwrap);
    main.emit(Opcode::Return);

    let mut module = module
        .with_type(
            TypeDef::new(TYPE)
                .with_function(int_fn("square", square_body()).with_attribute("Pure"))
                .with_function(int_fn("quad", quad_body.build().expect("body")).with_attribute("Pure"))
                .with_function(FunctionDef::new("main", vec![], TypeRef::Int, main.build().expect("body"))),
        )
        .with_entry(sym("main"));
    let report = Rewriter::default().rewrite(&mut module).expect("rewrite");
    assert_eq!(report.patches.unwraps_inserted, 1);

    let hidden = module.find_function(&sym("quad__impl")).expect("clone");
    assert!(opcodes(&hidden.body).contains(&Opcode::Unwrap));

    let runtime = runtime_for(module);
    assert_eq!(run_entry(&runtime), Ok(Value::Int(50)));
    runtime.registry().clear();
}

#[test]
fn test_config_from_toml() {
    let config: RewriteConfig = toml::from_str(
        "marker = \"Memo\"\nclone_suffix = \"$hidden\"\nstrict_branches = true\npatch_strategy = \"at_store\"",
    )
    .expect("parses");
    assert_eq!(config.marker, "Memo");
    assert_eq!(config.clone_suffix, "$hidden");
    assert!(config.strict_branches);
    assert_eq!(config.patch_strategy, PatchStrategy::AtStore);
    assert!(toml::from_str::<RewriteConfig>("unknown = 1").is_err());
}

#[test]
fn test_pure_result_passed_to_pure_call() {
    // square(square(2))
    let module = module_with_main(|m, b| {
        call(m, b, "square", 2);
        let square = m.intern_symbol(sym("square")).expect("symbol");
        b.emit_call(square, 1);
        b.emit(Opcode::Unwrap);
        b.emit(Opcode::Return);
    });
    let baseline = Arc::new(Program::link(module.clone()).expect("links"));
    assert_eq!(Vm::new(baseline).run_entry(), Ok(Value::Int(16)));

    let (module, report) = rewritten(module, RewriteConfig::default());
    // The inner result is forwarded to the stub, not unwrapped by the caller
    assert_eq!(report.patches.unwraps_inserted, 0);

    let runtime = runtime_for(module);
    assert_eq!(run_entry(&runtime), Ok(Value::Int(16)));

    // The outer call is keyed by the inner call's fingerprint
    let inner = CallFingerprint::new(TYPE, "square__impl", &[Value::Int(2)]);
    assert!(runtime.registry().get(&inner).is_some());
    let stats = runtime.registry().stats();
    assert_eq!(stats.entries, 2);
    runtime.registry().clear();
}

#[test]
fn test_pure_result_passed_to_plain_call_is_unwrapped() {
    // inc(square(3)) with inc left alone
    let mut module = Module::new();
    let square = module.intern_symbol(sym("square")).expect("symbol");
    let inc = module.intern_symbol(sym("inc")).expect("symbol");

    let mut inc_body = BodyBuilder::new();
    inc_body.emit_byte(Opcode::LoadArg, 0);
    inc_body.emit_int(1);
    inc_body.emit(Opcode::Add);
    inc_body.emit(Opcode::Return);

    let mut main = BodyBuilder::new();
    main.emit_int(3);
    main.emit_call(square, 1);
    main.emit_call(inc, 1);
    main.emit(Opcode::Return);

    let module = module
        .with_type(
            TypeDef::new(TYPE)
                .with_function(int_fn("square", square_body()).with_attribute("Pure"))
                .with_function(int_fn("inc", inc_body.build().expect("body")))
                .with_function(FunctionDef::new("main", vec![], TypeRef::Int, main.build().expect("body"))),
        )
        .with_entry(sym("main"));

    let (module, report) = rewritten(module, RewriteConfig::default());
    assert_eq!(report.patches.unwraps_inserted, 1);
    let main = module.find_function(&sym("main")).expect("main");
    assert_eq!(
        opcodes(&main.body),
        vec![Opcode::PushIntSmall, Opcode::Call, Opcode::Unwrap, Opcode::Call, Opcode::Return]
    );

    let runtime = runtime_for(module);
    assert_eq!(run_entry(&runtime), Ok(Value::Int(10)));
    runtime.registry().clear();
}

#[test]
fn test_deferred_condition_is_unwrapped() {
    // positive(x) = x > 0; main = if positive(5) { 1 } else { 0 }
    let mut positive = BodyBuilder::new();
    positive.emit_byte(Opcode::LoadArg, 0);
    positive.emit_int(0);
    positive.emit(Opcode::Gt);
    positive.emit(Opcode::Return);
    let positive = FunctionDef::new(
        "positive",
        vec![Param::new("x", TypeRef::Int)],
        TypeRef::Bool,
        positive.build().expect("body"),
    )
    .with_attribute("Pure");

    let mut module = Module::new();
    let index = module.intern_symbol(sym("positive")).expect("symbol");
    let mut main = BodyBuilder::new();
    main.emit_int(5);
    main.emit_call(index, 1);
    let otherwise = main.emit_jump(Opcode::JumpIfFalse);
    main.emit_int(1);
    main.emit(Opcode::Return);
    main.patch_jump(otherwise);
    main.emit_int(0);
    main.emit(Opcode::Return);

    let mut module = module
        .with_type(
            TypeDef::new(TYPE)
                .with_function(positive)
                .with_function(FunctionDef::new("main", vec![], TypeRef::Int, main.build().expect("body"))),
        )
        .with_entry(sym("main"));

    let config = RewriteConfig {
        strict_branches: true,
        ..RewriteConfig::default()
    };
    let report = Rewriter::new(config).rewrite(&mut module).expect("condition is consumed, not carried");
    assert_eq!(report.patches.unwraps_inserted, 1);
    assert_eq!(report.patches.branch_warnings, 0);

    let runtime = runtime_for(module);
    assert_eq!(run_entry(&runtime), Ok(Value::Int(1)));
    runtime.registry().clear();
}

#[test]
fn test_plain_store_clears_deferred_local() {
    // x = square(3); x = x + 1; x + x
    let module = module_with_main(|m, b| {
        let x = b.add_local(TypeRef::Int);
        call(m, b, "square", 3);
        b.emit_byte(Opcode::StoreLocal, x);
        b.emit_byte(Opcode::LoadLocal, x);
        b.emit_int(1);
        b.emit(Opcode::Add);
        b.emit_byte(Opcode::StoreLocal, x);
        b.emit_byte(Opcode::LoadLocal, x);
        b.emit_byte(Opcode::LoadLocal, x);
        b.emit(Opcode::Add);
        b.emit(Opcode::Return);
    });

    let (module, report) = rewritten(module, RewriteConfig::default());
    assert_eq!(report.patches.unwraps_inserted, 1);
    // The slot held a deferred value for part of the body
    assert_eq!(report.patches.locals_retyped, 1);

    let runtime = runtime_for(module);
    assert_eq!(run_entry(&runtime), Ok(Value::Int(20)));
    runtime.registry().clear();
}
