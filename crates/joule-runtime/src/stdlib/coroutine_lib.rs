//! `coroutine.create/resume/yield/status/running/wrap`, wired straight to
//! the scheduling primitives on [`crate::vm::Vm`].

use super::arg;
use crate::error::Error;
use crate::objects::ThreadStatus;
use crate::vm::Vm;
use joule_core::Value;

fn status_name(status: ThreadStatus) -> &'static str {
    match status {
        ThreadStatus::NeverRun | ThreadStatus::Suspended => "suspended",
        ThreadStatus::Running => "running",
        ThreadStatus::Normal => "normal",
        ThreadStatus::Dead => "dead",
    }
}

pub fn install(vm: &mut Vm) {
    let t = vm.heap.alloc_table(joule_core::Table::new());

    let f = vm.register_native("coroutine.create", |vm, args| {
        Ok(vec![vm.create_coroutine(arg(args, 0))?])
    });
    vm.table_set_str(t, "create", f);

    let f = vm.register_native("coroutine.resume", |vm, args| {
        let co = arg(args, 0);
        let rest = args.get(1..).unwrap_or(&[]).to_vec();
        match vm.resume(co, rest) {
            Ok(mut vals) => {
                let mut out = vec![Value::bool(true)];
                out.append(&mut vals);
                Ok(out)
            }
            Err(e) if e.is_catchable() => Ok(vec![Value::bool(false), vm.error_to_value(&e)]),
            Err(e) => Err(e),
        }
    });
    vm.table_set_str(t, "resume", f);

    let f = vm.register_native("coroutine.yield", |vm, args| vm.yield_current(args.to_vec()));
    vm.table_set_str(t, "yield", f);

    let f = vm.register_native("coroutine.status", |vm, args| {
        let status = vm.coroutine_status(arg(args, 0))?;
        Ok(vec![vm.intern_static(status_name(status))])
    });
    vm.table_set_str(t, "status", f);

    let f = vm.register_native("coroutine.running", |vm, _args| {
        Ok(vec![vm.current_coroutine_thread().unwrap_or(Value::nil())])
    });
    vm.table_set_str(t, "running", f);

    let f = vm.register_native("coroutine.wrap", |vm, args| {
        let closure = arg(args, 0);
        let thread = vm.create_coroutine(closure)?;
        let wrapper = vm.register_native("coroutine.wrap closure", move |vm, args| {
            vm.resume(thread, args.to_vec()).map_err(|e| {
                if e.is_catchable() {
                    Error::raw_no_position(e.payload_string())
                } else {
                    e
                }
            })
        });
        Ok(vec![wrapper])
    });
    vm.table_set_str(t, "wrap", f);

    vm.set_global("coroutine", Value::from_table(t));
}
