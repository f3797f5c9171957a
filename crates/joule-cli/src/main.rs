//! `joule` -- run a compiled chunk or an inline one-liner.
//!
//! Usage:
//!   joule -c script.luac [args...]
//!   joule -e 'print(1+2)'
//!   joule -d -c script.luac     # dump the root prototype's bytecode first

use clap::Parser;
use joule_runtime::error::Error;
use joule_runtime::objects::{Closure, ClosureKind};
use joule_runtime::proto::Prototype;
use joule_runtime::Vm;
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "joule")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run precompiled Lua 5.1 chunks", long_about = None)]
struct Cli {
    /// Compiled chunk to load and run
    #[arg(short = 'c', long = "chunk", value_name = "PATH")]
    chunk: Option<PathBuf>,

    /// Inline chunk source, as raw compiled bytes read from a literal string
    /// (mutually exclusive with `-c`; mainly useful for embedding short
    /// precompiled snippets without a separate file)
    #[arg(short = 'e', long = "exec", value_name = "TEXT")]
    exec: Option<String>,

    /// Dump the root prototype's bytecode before running it
    #[arg(short = 'd', long = "dump")]
    dump: bool,

    /// Extra arguments passed through to the script as the global `arg` table
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,
}

fn main() {
    let cli = Cli::parse();

    let bytes = match (&cli.chunk, &cli.exec) {
        (Some(path), None) => match std::fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                eprintln!("joule: cannot read {}: {e}", path.display());
                process::exit(1);
            }
        },
        (None, Some(text)) => text.clone().into_bytes(),
        (Some(_), Some(_)) => {
            eprintln!("joule: -c and -e are mutually exclusive");
            process::exit(1);
        }
        (None, None) => {
            eprintln!("joule: one of -c <path> or -e <text> is required");
            process::exit(1);
        }
    };

    let mut vm = Vm::new();
    let proto = match joule_runtime::load_chunk(&bytes, &mut vm.interner) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("joule: {e}");
            process::exit(1);
        }
    };

    if cli.dump {
        dump_prototype(&proto, 0);
    }

    install_arg_table(&mut vm, &cli.args);

    let env = joule_core::Value::from_table(vm.globals);
    let closure_ref = vm.heap.alloc_closure(Closure {
        env,
        kind: ClosureKind::Lua { proto, upvalues: Vec::new() },
    });
    let closure = joule_core::Value::from_function(closure_ref);

    match vm.call(closure, &[]) {
        Ok(_) => {}
        Err(e) => {
            eprintln!("joule: {}", format_error(&e));
            process::exit(1);
        }
    }
}

fn format_error(e: &Error) -> String {
    e.payload_string()
}

fn install_arg_table(vm: &mut Vm, args: &[String]) {
    let t = vm.heap.alloc_table(joule_core::Table::new());
    for (i, a) in args.iter().enumerate() {
        let v = vm.intern(a.as_bytes());
        let key = joule_core::Value::int(i as i64);
        let interner = &vm.interner;
        unsafe {
            let _ = t.get_mut().value.set(interner, key, v);
        }
    }
    vm.set_global("arg", joule_core::Value::from_table(t));
}

fn dump_prototype(proto: &Prototype, depth: usize) {
    let indent = "  ".repeat(depth);
    println!(
        "{indent}function <{}:{},{}> ({} instructions, {} params{})",
        proto.source,
        proto.start_line,
        proto.end_line,
        proto.code.len(),
        proto.num_parameters,
        if proto.is_vararg { ", vararg" } else { "" }
    );
    for (pc, instr) in proto.code.iter().enumerate() {
        println!(
            "{indent}  [{}] line {}: op={} a={} b={} c={} bx={}",
            pc,
            proto.line_of(pc),
            instr.op(),
            instr.a(),
            instr.b(),
            instr.c(),
            instr.bx()
        );
    }
    for nested in &proto.protos {
        dump_prototype(nested, depth + 1);
    }
}
