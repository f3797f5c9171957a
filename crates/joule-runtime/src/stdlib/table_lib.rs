//! `table.insert/remove/concat/getn`, wired straight to the array-shift and
//! concat helpers on [`joule_core::Table`].

use super::arg;
use crate::error::Error;
use crate::heap::GcBox;
use crate::vm::Vm;
use joule_core::{Table, Value};

fn want_table(v: Value, index: u32, func: &'static str) -> Result<crate::heap::TableRef, Error> {
    v.as_table::<GcBox<Table>>().ok_or_else(|| Error::bad_type(index, "table", v.type_name(), func))
}

pub fn install(vm: &mut Vm) {
    let t = vm.heap.alloc_table(Table::new());

    let f = vm.register_native("table.insert", |_vm, args| {
        let table_ref = want_table(arg(args, 0), 1, "insert")?;
        if args.len() >= 3 {
            let pos = arg(args, 1).as_f64().unwrap_or(1.0) as i64;
            let v = arg(args, 2);
            unsafe { table_ref.get_mut() }.value.insert_at(pos, v);
        } else {
            let v = arg(args, 1);
            let len = unsafe { table_ref.get() }.value.length();
            unsafe { table_ref.get_mut() }.value.insert_at(len + 1, v);
        }
        Ok(Vec::new())
    });
    vm.table_set_str(t, "insert", f);

    let f = vm.register_native("table.remove", |_vm, args| {
        let table_ref = want_table(arg(args, 0), 1, "remove")?;
        let len = unsafe { table_ref.get() }.value.length();
        let pos = if args.len() >= 2 {
            arg(args, 1).as_f64().unwrap_or(len as f64) as i64
        } else {
            len
        };
        Ok(vec![unsafe { table_ref.get_mut() }.value.remove_at(pos)])
    });
    vm.table_set_str(t, "remove", f);

    let f = vm.register_native("table.concat", |vm, args| {
        let table_ref = want_table(arg(args, 0), 1, "concat")?;
        let sep = arg(args, 1).as_string_handle().map(|h| vm.interner.bytes_of(h).to_vec()).unwrap_or_default();
        let len = unsafe { table_ref.get() }.value.length();
        let i = if args.len() >= 3 { arg(args, 2).as_f64().unwrap_or(1.0) as i64 } else { 1 };
        let j = if args.len() >= 4 { arg(args, 3).as_f64().unwrap_or(len as f64) as i64 } else { len };
        let joined = unsafe { table_ref.get() }
            .value
            .concat(&vm.interner, &sep, i, j)
            .map_err(|v| Error::bad_value(1, format!("invalid value ({}) at index in table for 'concat'", v.type_name()), "concat"))?;
        Ok(vec![vm.intern(&joined)])
    });
    vm.table_set_str(t, "concat", f);

    let f = vm.register_native("table.getn", |_vm, args| {
        let table_ref = want_table(arg(args, 0), 1, "getn")?;
        Ok(vec![Value::int(unsafe { table_ref.get() }.value.length())])
    });
    vm.table_set_str(t, "getn", f);

    vm.set_global("table", Value::from_table(t));
}
