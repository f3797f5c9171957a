//! `io.write`/`io.read` -- direct stdin/stdout, no file handles.

use super::arg;
use crate::vm::Vm;
use joule_core::Value;
use std::io::{self, BufRead, Write as _};

fn tostring_bytes(vm: &Vm, v: Value) -> Vec<u8> {
    if let Some(h) = v.as_string_handle() {
        return vm.interner.bytes_of(h).to_vec();
    }
    if let Some(n) = v.as_f64() {
        return format!("{n}").into_bytes();
    }
    v.type_name().as_bytes().to_vec()
}

pub fn install(vm: &mut Vm) {
    let t = vm.heap.alloc_table(joule_core::Table::new());

    let f = vm.register_native("io.write", |vm, args| {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        for i in 0..args.len() {
            let _ = out.write_all(&tostring_bytes(vm, arg(args, i)));
        }
        let _ = out.flush();
        Ok(Vec::new())
    });
    vm.table_set_str(t, "write", f);

    let f = vm.register_native("io.read", |vm, _args| {
        let mut line = String::new();
        let n = io::stdin().lock().read_line(&mut line).unwrap_or(0);
        if n == 0 {
            return Ok(vec![Value::nil()]);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(vec![vm.intern(line.as_bytes())])
    });
    vm.table_set_str(t, "read", f);

    vm.set_global("io", Value::from_table(t));
}
