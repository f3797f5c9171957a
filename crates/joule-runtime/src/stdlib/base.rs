//! `assert`, `type`, `tostring`, `tonumber`, `print`, `select`, `rawget`,
//! `setmetatable`, `getmetatable`, `loadstring`, `pcall`, `xpcall`.

use super::arg;
use crate::error::Error;
use crate::heap::GcBox;
use crate::vm::Vm;
use joule_core::{Table, Value};

fn tostring_value(vm: &Vm, v: Value) -> String {
    match v.tag() {
        Some(joule_core::Tag::Nil) | None => "nil".to_string(),
        Some(joule_core::Tag::Boolean) => v.as_bool().unwrap().to_string(),
        Some(joule_core::Tag::Number) => joule_core::value_number_to_string(v.as_f64().unwrap()),
        Some(joule_core::Tag::String) => vm.interner.str_of(v.as_string_handle().unwrap()).to_string(),
        Some(joule_core::Tag::Table) => format!("table: 0x{:012x}", v.raw_bits() & 0xffff_ffff_ffff),
        Some(joule_core::Tag::Function) => format!("function: 0x{:012x}", v.raw_bits() & 0xffff_ffff_ffff),
        Some(joule_core::Tag::Thread) => format!("thread: 0x{:012x}", v.raw_bits() & 0xffff_ffff_ffff),
        Some(joule_core::Tag::Userdata) => format!("userdata: 0x{:012x}", v.raw_bits() & 0xffff_ffff_ffff),
        Some(joule_core::Tag::Upvalue) => "upvalue".to_string(),
    }
}

pub fn install(vm: &mut Vm) {
    let f = vm.register_native("assert", |vm, args| {
        let v = arg(args, 0);
        if v.truthy() {
            Ok(args.to_vec())
        } else {
            let msg = arg(args, 1);
            if msg.is_nil() {
                Err(Error::raw_no_position("assertion failed!"))
            } else {
                Err(Error::raw_no_position(tostring_value(vm, msg)))
            }
        }
    });
    vm.set_global("assert", f);

    let f = vm.register_native("type", |vm, args| {
        let name = arg(args, 0).type_name();
        Ok(vec![vm.intern_static(name)])
    });
    vm.set_global("type", f);

    let f = vm.register_native("tostring", |vm, args| {
        let s = tostring_value(vm, arg(args, 0));
        Ok(vec![vm.intern(s.as_bytes())])
    });
    vm.set_global("tostring", f);

    let f = vm.register_native("tonumber", |vm, args| {
        let v = arg(args, 0);
        let base_arg = arg(args, 1);
        if base_arg.is_nil() {
            if let Some(n) = v.as_f64() {
                return Ok(vec![Value::number(n)]);
            }
        }
        let base = if base_arg.is_nil() { None } else { Some(base_arg.as_f64().unwrap_or(10.0) as u32) };
        let parsed = v.as_string_handle().and_then(|h| {
            let bytes = vm.interner.bytes_of(h);
            std::str::from_utf8(bytes).ok().and_then(|s| joule_core::parse_number(s, base))
        });
        Ok(vec![parsed.map(Value::number).unwrap_or(Value::nil())])
    });
    vm.set_global("tonumber", f);

    let f = vm.register_native("print", |vm, args| {
        let parts: Vec<String> = args.iter().map(|v| tostring_value(vm, *v)).collect();
        println!("{}", parts.join("\t"));
        Ok(Vec::new())
    });
    vm.set_global("print", f);

    let f = vm.register_native("select", |vm, args| {
        let sel = arg(args, 0);
        if let Some(h) = sel.as_string_handle() {
            if vm.interner.bytes_of(h) == b"#" {
                return Ok(vec![Value::int(args.len() as i64 - 1)]);
            }
        }
        let n = sel.as_f64().unwrap_or(1.0) as usize;
        Ok(args.get(n..).map(|s| s.to_vec()).unwrap_or_default())
    });
    vm.set_global("select", f);

    let f = vm.register_native("rawget", |_vm, args| {
        let t = arg(args, 0)
            .as_table::<GcBox<Table>>()
            .ok_or_else(|| Error::bad_type(1, "table", arg(args, 0).type_name(), "rawget"))?;
        Ok(vec![unsafe { t.get() }.value.get(arg(args, 1))])
    });
    vm.set_global("rawget", f);

    let f = vm.register_native("setmetatable", |_vm, args| {
        let t = arg(args, 0)
            .as_table::<GcBox<Table>>()
            .ok_or_else(|| Error::bad_type(1, "table", arg(args, 0).type_name(), "setmetatable"))?;
        let mt = arg(args, 1);
        unsafe { t.get_mut() }.value.metatable = if mt.is_nil() { None } else { Some(mt) };
        Ok(vec![arg(args, 0)])
    });
    vm.set_global("setmetatable", f);

    let f = vm.register_native("getmetatable", |_vm, args| {
        let v = arg(args, 0);
        match v.as_table::<GcBox<Table>>() {
            Some(t) => Ok(vec![unsafe { t.get() }.value.metatable.unwrap_or(Value::nil())]),
            None => Ok(vec![Value::nil()]),
        }
    });
    vm.set_global("getmetatable", f);

    let f = vm.register_native("loadstring", |vm, args| {
        let v = arg(args, 0);
        let h = v
            .as_string_handle()
            .ok_or_else(|| Error::bad_type(1, "string", v.type_name(), "loadstring"))?;
        let bytes = vm.interner.bytes_of(h).to_vec();
        match crate::loader::load_chunk(&bytes, &mut vm.interner) {
            Ok(proto) => {
                let env = Value::from_table(vm.globals);
                let closure = vm.heap.alloc_closure(crate::objects::Closure {
                    env,
                    kind: crate::objects::ClosureKind::Lua { proto, upvalues: vec![] },
                });
                Ok(vec![Value::from_function(closure)])
            }
            Err(e) => Ok(vec![Value::nil(), vm.intern(e.payload_string().as_bytes())]),
        }
    });
    vm.set_global("loadstring", f);

    let f = vm.register_native("pcall", |vm, args| {
        if args.is_empty() {
            return Err(Error::missing_arg(1, "value", "pcall"));
        }
        Ok(vm.pcall(args[0], &args[1..]))
    });
    vm.set_global("pcall", f);

    let f = vm.register_native("xpcall", |vm, args| {
        if args.len() < 2 {
            return Err(Error::missing_arg(2, "value", "xpcall"));
        }
        let callee = args[0];
        let handler = args[1];
        match vm.call(callee, &args[2..]) {
            Ok(mut vals) => {
                let mut out = vec![Value::bool(true)];
                out.append(&mut vals);
                Ok(out)
            }
            Err(e) if e.is_catchable() => {
                let payload = vm.error_to_value(&e);
                let handled = match vm.call(handler, &[payload]) {
                    Ok(v) => v,
                    Err(_) => vec![vm.intern_static("error in error handling")],
                };
                let mut out = vec![Value::bool(false)];
                out.extend(handled);
                Ok(out)
            }
            Err(e) => panic!("{e}"),
        }
    });
    vm.set_global("xpcall", f);
}
