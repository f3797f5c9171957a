//! `os.time/clock/date` -- the surface `lib/os.c` implements.

use crate::vm::Vm;
use joule_core::Value;
use std::time::{SystemTime, UNIX_EPOCH};

pub fn install(vm: &mut Vm) {
    let t = vm.heap.alloc_table(joule_core::Table::new());

    let f = vm.register_native("os.time", |_vm, _args| {
        let secs = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
        Ok(vec![Value::number(secs as f64)])
    });
    vm.table_set_str(t, "time", f);

    let f = vm.register_native("os.clock", |_vm, _args| {
        let secs = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0);
        Ok(vec![Value::number(secs)])
    });
    vm.table_set_str(t, "clock", f);

    let f = vm.register_native("os.date", |vm, _args| {
        let secs = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
        Ok(vec![vm.intern(format!("{secs}").as_bytes())])
    });
    vm.table_set_str(t, "date", f);

    vm.set_global("os", Value::from_table(t));
}
