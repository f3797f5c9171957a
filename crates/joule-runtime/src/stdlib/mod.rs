//! Global environment installer. Each sub-table carries only the operations
//! the reference library's own `lib/*.c` files implement for it -- not a
//! fuller standard library.

mod base;
mod coroutine_lib;
mod io_lib;
mod math_lib;
mod os_lib;
mod string_lib;
mod table_lib;

use crate::vm::Vm;
use joule_core::Value;

pub(crate) fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).copied().unwrap_or(Value::nil())
}

pub fn install(vm: &mut Vm) {
    let version = vm.intern_static("joule 5.1");
    vm.set_global("_VERSION", version);

    base::install(vm);
    math_lib::install(vm);
    string_lib::install(vm);
    table_lib::install(vm);
    os_lib::install(vm);
    io_lib::install(vm);
    coroutine_lib::install(vm);
}
