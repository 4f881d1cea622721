// Three pure methods dispatched in parallel
//
// Run with:
//   cargo run --example parallel

use shadowcall::backend::bytecode::{BodyBuilder, FunctionDef, Module, Opcode, Param, SymbolRef, TypeDef};
use shadowcall::backend::{Rewriter, TypeRef};
use shadowcall::InProcessLauncher;
use tracing::Level;

const TYPE: &str = "demo.Program";

fn method(name: &str) -> FunctionDef {
    let mut body = BodyBuilder::new();
    body.emit_byte(Opcode::LoadArg, 0);
    body.emit_int(2);
    body.emit(Opcode::Mul);
    body.emit(Opcode::Return);
    FunctionDef::new(
        name,
        vec![Param::new("x", TypeRef::Int)],
        TypeRef::Int,
        body.build().expect("valid body"),
    )
    .with_attribute("Pure")
}

/// `a = Method1(1); b = Method2(2); c = Method3(3); (a + b) * 1000 + (a + b + c)`
fn program() -> Module {
    let mut module = Module::new();
    let symbols: Vec<u16> = ["Method1", "Method2", "Method3"]
        .iter()
        .map(|name| module.intern_symbol(SymbolRef::new(TYPE, *name)).expect("symbol"))
        .collect();

    let mut main = BodyBuilder::new();
    let locals: Vec<u8> = (0..3).map(|_| main.add_local(TypeRef::Int)).collect();
    for (arg, (&symbol, &local)) in symbols.iter().zip(&locals).enumerate() {
        main.emit_int(arg as i64 + 1);
        main.emit_call(symbol, 1);
        main.emit_byte(Opcode::StoreLocal, local);
    }
    // a + b
    main.emit_byte(Opcode::LoadLocal, locals[0]);
    main.emit_byte(Opcode::LoadLocal, locals[1]);
    main.emit(Opcode::Add);
    main.emit(Opcode::Dup);
    main.emit_int(1000);
    main.emit(Opcode::Mul);
    main.emit(Opcode::Swap);
    // a + b + c
    main.emit_byte(Opcode::LoadLocal, locals[2]);
    main.emit(Opcode::Add);
    main.emit(Opcode::Add);
    main.emit(Opcode::Return);

    module
        .with_type(
            TypeDef::new(TYPE)
                .with_function(method("Method1"))
                .with_function(method("Method2"))
                .with_function(method("Method3"))
                .with_function(FunctionDef::new("main", vec![], TypeRef::Int, main.build().expect("valid body"))),
        )
        .with_entry(SymbolRef::new(TYPE, "main"))
}

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_writer(std::io::stderr)
        .init();

    let mut module = program();
    let report = match Rewriter::default().rewrite(&mut module) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    println!("=== Shadow module ===");
    println!("{}", module.disassemble());
    println!("Rewritten: {:?}", report.rewritten.iter().map(|s| s.to_string()).collect::<Vec<_>>());
    println!("Unwraps inserted: {}", report.patches.unwraps_inserted);

    match InProcessLauncher::default().run_module(module) {
        Ok(value) => {
            println!();
            println!("(a + b) * 1000 + (a + b + c) = {}", value);
            println!("expected                     = {}", 6 * 1000 + 12);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
