//! `string.format` (identity passthrough, no `%`-directive parsing) and
//! `string.rep` -- the minimal surface `lib/string.c` implements.

use super::arg;
use crate::error::Error;
use crate::vm::Vm;
use joule_core::Value;

pub fn install(vm: &mut Vm) {
    let t = vm.heap.alloc_table(joule_core::Table::new());

    let f = vm.register_native("string.format", |_vm, args| Ok(vec![arg(args, 0)]));
    vm.table_set_str(t, "format", f);

    let f = vm.register_native("string.rep", |vm, args| {
        let s = arg(args, 0);
        let h = s
            .as_string_handle()
            .ok_or_else(|| Error::bad_type(1, "string", s.type_name(), "rep"))?;
        let n = arg(args, 1).as_f64().unwrap_or(0.0).max(0.0) as usize;
        let bytes = vm.interner.bytes_of(h).to_vec();
        let repeated = bytes.repeat(n);
        Ok(vec![vm.intern(&repeated)])
    });
    vm.table_set_str(t, "rep", f);

    vm.set_global("string", Value::from_table(t));
}
