//! `math.floor/ceil/abs/sqrt/huge/pi` -- the surface the reference library's
//! `lib/math.c` implements, no more.

use super::arg;
use crate::error::Error;
use crate::vm::Vm;
use joule_core::Value;

fn want_number(v: Value, index: u32, func: &'static str) -> Result<f64, Error> {
    v.as_f64().ok_or_else(|| Error::bad_type(index, "number", v.type_name(), func))
}

pub fn install(vm: &mut Vm) {
    let t = vm.heap.alloc_table(joule_core::Table::new());

    let f = vm.register_native("math.floor", |_vm, args| {
        Ok(vec![Value::number(want_number(arg(args, 0), 1, "floor")?.floor())])
    });
    vm.table_set_str(t, "floor", f);

    let f = vm.register_native("math.ceil", |_vm, args| {
        Ok(vec![Value::number(want_number(arg(args, 0), 1, "ceil")?.ceil())])
    });
    vm.table_set_str(t, "ceil", f);

    let f = vm.register_native("math.abs", |_vm, args| {
        Ok(vec![Value::number(want_number(arg(args, 0), 1, "abs")?.abs())])
    });
    vm.table_set_str(t, "abs", f);

    let f = vm.register_native("math.sqrt", |_vm, args| {
        Ok(vec![Value::number(want_number(arg(args, 0), 1, "sqrt")?.sqrt())])
    });
    vm.table_set_str(t, "sqrt", f);

    vm.table_set_str(t, "huge", Value::number(f64::INFINITY));
    vm.table_set_str(t, "pi", Value::number(std::f64::consts::PI));

    vm.set_global("math", Value::from_table(t));
}
