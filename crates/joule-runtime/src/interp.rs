//! Register-VM dispatch loop. One [`run_lua`] call per Lua-level call frame;
//! native closures are invoked directly by [`call_closure`] without a frame
//! of their own. Grounded on the bit layout in [`crate::proto::Instr`] and
//! the instruction semantics of the reference interpreter's `lvm.c`.

use crate::error::Error;
use crate::heap::{ClosureRef, GcBox, UpvalueRef};
use crate::objects::{Closure, ClosureKind, UpvalueCell};
use crate::proto::{Constant, Prototype, Rk};
use crate::vm::Vm;
use joule_core::{compare, parse_number, raw_eq, Order, Table, Value};
use std::collections::HashMap;
use std::rc::Rc;

const FIELDS_PER_FLUSH: i64 = 50;

// Metaevent cache slots, matching `joule_core::table::METAEVENTS` order.
const META_ADD: usize = 0;
const META_SUB: usize = 1;
const META_MUL: usize = 2;
const META_DIV: usize = 3;
const META_MOD: usize = 4;
const META_POW: usize = 5;
const META_CONCAT: usize = 7;
const META_LEN: usize = 8;
const META_INDEX: usize = 12;
const META_NEWINDEX: usize = 13;
const META_CALL: usize = 14;

fn metamethod_of(v: Value, event: usize) -> Option<Value> {
    let t = v.as_table::<GcBox<Table>>()?;
    let mt = unsafe { t.get() }.value.metatable?;
    let mt_ref = mt.as_table::<GcBox<Table>>()?;
    unsafe { mt_ref.get() }.value.metamethod(event)
}

/// Call a Lua or native closure. Entry point used by the `Vm`, by nested
/// CALL/TAILCALL instructions, and by the coroutine spawn body.
pub fn call_closure(vm: &mut Vm, closure_ref: ClosureRef, args: &[Value]) -> Result<Vec<Value>, Error> {
    let is_native = matches!(unsafe { closure_ref.get() }.value.kind, ClosureKind::Native { .. });
    if is_native {
        let func = match &unsafe { closure_ref.get() }.value.kind {
            ClosureKind::Native { func, .. } => func.clone(),
            ClosureKind::Lua { .. } => unreachable!(),
        };
        func(vm, args)
    } else {
        run_lua(vm, closure_ref, args)
    }
}

/// Resolve a callable value (function, or table with `__call`) and invoke it.
pub fn call_value(vm: &mut Vm, callee: Value, args: &[Value]) -> Result<Vec<Value>, Error> {
    if let Some(closure_ref) = callee.as_function::<GcBox<Closure>>() {
        return call_closure(vm, closure_ref, args);
    }
    if let Some(handler) = metamethod_of(callee, META_CALL) {
        let mut full_args = Vec::with_capacity(args.len() + 1);
        full_args.push(callee);
        full_args.extend_from_slice(args);
        return call_value(vm, handler, &full_args);
    }
    Err(Error::raw_no_position(format!(
        "attempt to call a {} value",
        callee.type_name()
    )))
}

fn table_index(vm: &mut Vm, t: Value, key: Value) -> Result<Value, Error> {
    if let Some(table_ref) = t.as_table::<GcBox<Table>>() {
        let raw = unsafe { table_ref.get() }.value.get(key);
        if !raw.is_nil() {
            return Ok(raw);
        }
        return match metamethod_of(t, META_INDEX) {
            Some(handler) if handler.as_function::<GcBox<Closure>>().is_some() => {
                Ok(call_value(vm, handler, &[t, key])?.into_iter().next().unwrap_or(Value::nil()))
            }
            Some(handler) => table_index(vm, handler, key),
            None => Ok(Value::nil()),
        };
    }
    if let Some(handler) = metamethod_of(t, META_INDEX) {
        return table_index(vm, handler, key);
    }
    Err(Error::raw_no_position(format!("attempt to index a {} value", t.type_name())))
}

fn table_newindex(vm: &mut Vm, t: Value, key: Value, val: Value) -> Result<(), Error> {
    if let Some(table_ref) = t.as_table::<GcBox<Table>>() {
        let has_raw = !unsafe { table_ref.get() }.value.get(key).is_nil();
        if has_raw {
            let interner = &vm.interner;
            unsafe { table_ref.get_mut().value.set(interner, key, val) }
                .map_err(|_| Error::raw_no_position("invalid table key"))?;
            return Ok(());
        }
        return match metamethod_of(t, META_NEWINDEX) {
            Some(handler) if handler.as_function::<GcBox<Closure>>().is_some() => {
                call_value(vm, handler, &[t, key, val])?;
                Ok(())
            }
            Some(handler) => table_newindex(vm, handler, key, val),
            None => {
                let interner = &vm.interner;
                unsafe { table_ref.get_mut().value.set(interner, key, val) }
                    .map_err(|_| Error::raw_no_position("invalid table key"))
            }
        };
    }
    if let Some(handler) = metamethod_of(t, META_NEWINDEX) {
        return table_newindex(vm, handler, key, val);
    }
    Err(Error::raw_no_position(format!("attempt to index a {} value", t.type_name())))
}

/// A number as-is, or a string coerced by parsing it as a base-10 double --
/// the reference interpreter's arithmetic opcodes run every operand through
/// `lv_tonumber(_, 10)` before computing, rather than requiring both sides to
/// already be numbers.
fn coerce_arith_operand(vm: &Vm, v: Value) -> Option<f64> {
    if let Some(n) = v.as_f64() {
        return Some(n);
    }
    let bytes = vm.interner.bytes_of(v.as_string_handle()?);
    parse_number(std::str::from_utf8(bytes).ok()?, None)
}

fn arith(vm: &mut Vm, op: u8, x: Value, y: Value) -> Result<Value, Error> {
    if let (Some(a), Some(b)) = (coerce_arith_operand(vm, x), coerce_arith_operand(vm, y)) {
        let r = match op {
            12 => a + b,
            13 => a - b,
            14 => a * b,
            15 => a / b,
            16 => a - (a / b).floor() * b,
            17 => a.powf(b),
            _ => unreachable!(),
        };
        return Ok(Value::number(r));
    }
    let event = match op {
        12 => META_ADD,
        13 => META_SUB,
        14 => META_MUL,
        15 => META_DIV,
        16 => META_MOD,
        17 => META_POW,
        _ => unreachable!(),
    };
    if let Some(handler) = metamethod_of(x, event).or_else(|| metamethod_of(y, event)) {
        return Ok(call_value(vm, handler, &[x, y])?.into_iter().next().unwrap_or(Value::nil()));
    }
    Err(Error::arithmetic("attempt to perform arithmetic on a non-number value"))
}

fn value_len(vm: &mut Vm, v: Value) -> Result<Value, Error> {
    if let Some(h) = v.as_string_handle() {
        return Ok(Value::int(vm.interner.bytes_of(h).len() as i64));
    }
    if let Some(table_ref) = v.as_table::<GcBox<Table>>() {
        if let Some(handler) = metamethod_of(v, META_LEN) {
            return Ok(call_value(vm, handler, &[v])?.into_iter().next().unwrap_or(Value::nil()));
        }
        return Ok(Value::int(unsafe { table_ref.get() }.value.length()));
    }
    Err(Error::arithmetic(format!("attempt to get length of a {} value", v.type_name())))
}

fn append_concat_operand(vm: &mut Vm, out: &mut Vec<u8>, v: Value) -> Result<(), Error> {
    if let Some(h) = v.as_string_handle() {
        out.extend_from_slice(vm.interner.bytes_of(h));
        Ok(())
    } else if let Some(n) = v.as_f64() {
        out.extend_from_slice(joule_core::value_number_to_string(n).as_bytes());
        Ok(())
    } else {
        Err(Error::arithmetic(format!("attempt to concatenate a {} value", v.type_name())))
    }
}

fn reg_get(regs: &[Value], open: &HashMap<u32, UpvalueRef>, i: u32) -> Value {
    if let Some(uv) = open.get(&i) {
        return *unsafe { uv.get() }.value.value.borrow();
    }
    regs[i as usize]
}

fn reg_set(regs: &mut [Value], open: &HashMap<u32, UpvalueRef>, i: u32, v: Value) {
    if let Some(uv) = open.get(&i) {
        *unsafe { uv.get() }.value.value.borrow_mut() = v;
    }
    regs[i as usize] = v;
}

fn load_constant(vm: &mut Vm, proto: &Prototype, idx: u32) -> Value {
    match &proto.constants[idx as usize] {
        Constant::Nil => Value::nil(),
        Constant::Bool(b) => Value::bool(*b),
        Constant::Number(n) => Value::number(*n),
        Constant::Str(bytes) => Value::from_string(vm.interner.intern_static(bytes)),
    }
}

fn rk_value(vm: &mut Vm, proto: &Prototype, regs: &[Value], open: &HashMap<u32, UpvalueRef>, n: u32) -> Value {
    match crate::proto::decode_rk(n) {
        Rk::Register(r) => reg_get(regs, open, r),
        Rk::Constant(c) => load_constant(vm, proto, c),
    }
}

fn run_lua(vm: &mut Vm, closure_ref: ClosureRef, args: &[Value]) -> Result<Vec<Value>, Error> {
    let (proto, upvalues) = match &unsafe { closure_ref.get() }.value.kind {
        ClosureKind::Lua { proto, upvalues } => (proto.clone(), upvalues.clone()),
        ClosureKind::Native { .. } => return Err(Error::internal("run_lua called on a native closure")),
    };

    let mut regs: Vec<Value> = vec![Value::nil(); proto.max_stack.max(proto.num_parameters) as usize];
    let nparams = proto.num_parameters as usize;
    for (i, a) in args.iter().take(nparams).enumerate() {
        regs[i] = *a;
    }
    let varargs: Vec<Value> = if proto.is_vararg && args.len() > nparams {
        args[nparams..].to_vec()
    } else {
        Vec::new()
    };

    let mut open_upvalues: HashMap<u32, UpvalueRef> = HashMap::new();
    let mut pc: usize = 0;
    let mut top: usize = regs.len();

    let frame_id = vm.heap.push_frame_root(&regs);

    let result = 'dispatch: loop {
        if pc >= proto.code.len() {
            break Ok(Vec::new());
        }
        let instr = proto.code[pc];
        pc += 1;

        macro_rules! bail {
            ($e:expr) => {
                break 'dispatch Err($e)
            };
        }

        match instr.op() {
            0 => {
                let v = reg_get(&regs, &open_upvalues, instr.b());
                reg_set(&mut regs, &open_upvalues, instr.a(), v);
            }
            1 => {
                let k = load_constant(vm, &proto, instr.bx());
                reg_set(&mut regs, &open_upvalues, instr.a(), k);
            }
            2 => {
                reg_set(&mut regs, &open_upvalues, instr.a(), Value::bool(instr.b() != 0));
                if instr.c() != 0 {
                    pc += 1;
                }
            }
            3 => {
                for i in instr.a()..=instr.b() {
                    reg_set(&mut regs, &open_upvalues, i, Value::nil());
                }
            }
            4 => {
                let v = *unsafe { upvalues[instr.b() as usize].get() }.value.value.borrow();
                reg_set(&mut regs, &open_upvalues, instr.a(), v);
            }
            5 => {
                let key = load_constant(vm, &proto, instr.bx());
                let v = unsafe { vm.globals.get() }.value.get(key);
                reg_set(&mut regs, &open_upvalues, instr.a(), v);
            }
            6 => {
                let t = reg_get(&regs, &open_upvalues, instr.b());
                let key = rk_value(vm, &proto, &regs, &open_upvalues, instr.c());
                match table_index(vm, t, key) {
                    Ok(v) => reg_set(&mut regs, &open_upvalues, instr.a(), v),
                    Err(e) => bail!(e),
                }
            }
            7 => {
                let key = load_constant(vm, &proto, instr.bx());
                let v = reg_get(&regs, &open_upvalues, instr.a());
                let interner = &vm.interner;
                let _ = unsafe { vm.globals.get_mut().value.set(interner, key, v) };
            }
            8 => {
                let v = reg_get(&regs, &open_upvalues, instr.a());
                *unsafe { upvalues[instr.b() as usize].get() }.value.value.borrow_mut() = v;
            }
            9 => {
                let t = reg_get(&regs, &open_upvalues, instr.a());
                let key = rk_value(vm, &proto, &regs, &open_upvalues, instr.b());
                let val = rk_value(vm, &proto, &regs, &open_upvalues, instr.c());
                if let Err(e) = table_newindex(vm, t, key, val) {
                    bail!(e);
                }
            }
            10 => {
                let t = vm.heap.alloc_table(Table::new());
                reg_set(&mut regs, &open_upvalues, instr.a(), Value::from_table(t));
            }
            11 => {
                let t = reg_get(&regs, &open_upvalues, instr.b());
                let key = rk_value(vm, &proto, &regs, &open_upvalues, instr.c());
                match table_index(vm, t, key) {
                    Ok(method) => {
                        reg_set(&mut regs, &open_upvalues, instr.a() + 1, t);
                        reg_set(&mut regs, &open_upvalues, instr.a(), method);
                    }
                    Err(e) => bail!(e),
                }
            }
            op @ 12..=17 => {
                let x = rk_value(vm, &proto, &regs, &open_upvalues, instr.b());
                let y = rk_value(vm, &proto, &regs, &open_upvalues, instr.c());
                match arith(vm, op, x, y) {
                    Ok(v) => reg_set(&mut regs, &open_upvalues, instr.a(), v),
                    Err(e) => bail!(e),
                }
            }
            18 => {
                let x = reg_get(&regs, &open_upvalues, instr.b());
                match x.as_f64() {
                    Some(n) => reg_set(&mut regs, &open_upvalues, instr.a(), Value::number(-n)),
                    None => bail!(Error::arithmetic("attempt to perform arithmetic on a non-number value")),
                }
            }
            19 => {
                let x = reg_get(&regs, &open_upvalues, instr.b());
                reg_set(&mut regs, &open_upvalues, instr.a(), Value::bool(!x.truthy()));
            }
            20 => {
                let x = reg_get(&regs, &open_upvalues, instr.b());
                match value_len(vm, x) {
                    Ok(v) => reg_set(&mut regs, &open_upvalues, instr.a(), v),
                    Err(e) => bail!(e),
                }
            }
            21 => {
                let mut bytes = Vec::new();
                let mut failed = None;
                for i in instr.b()..=instr.c() {
                    let v = reg_get(&regs, &open_upvalues, i);
                    if let Err(e) = append_concat_operand(vm, &mut bytes, v) {
                        failed = Some(e);
                        break;
                    }
                }
                match failed {
                    Some(e) => bail!(e),
                    None => {
                        let h = vm.interner.intern(&bytes);
                        reg_set(&mut regs, &open_upvalues, instr.a(), Value::from_string(h));
                    }
                }
            }
            22 => {
                pc = (pc as i64 + instr.sbx() as i64) as usize;
            }
            23 => {
                let x = rk_value(vm, &proto, &regs, &open_upvalues, instr.b());
                let y = rk_value(vm, &proto, &regs, &open_upvalues, instr.c());
                if raw_eq(x, y) != (instr.a() != 0) {
                    pc += 1;
                }
            }
            24 => {
                let x = rk_value(vm, &proto, &regs, &open_upvalues, instr.b());
                let y = rk_value(vm, &proto, &regs, &open_upvalues, instr.c());
                let interner = &vm.interner;
                match compare(x, y, |h| interner.bytes_of(h)) {
                    Some(ord) => {
                        if (ord == Order::Less) != (instr.a() != 0) {
                            pc += 1;
                        }
                    }
                    None => bail!(Error::arithmetic("attempt to compare incompatible values")),
                }
            }
            25 => {
                let x = rk_value(vm, &proto, &regs, &open_upvalues, instr.b());
                let y = rk_value(vm, &proto, &regs, &open_upvalues, instr.c());
                let interner = &vm.interner;
                match compare(x, y, |h| interner.bytes_of(h)) {
                    Some(ord) => {
                        if (ord != Order::Greater) != (instr.a() != 0) {
                            pc += 1;
                        }
                    }
                    None => bail!(Error::arithmetic("attempt to compare incompatible values")),
                }
            }
            26 => {
                let x = reg_get(&regs, &open_upvalues, instr.a());
                if x.truthy() != (instr.c() != 0) {
                    pc += 1;
                }
            }
            27 => {
                let x = reg_get(&regs, &open_upvalues, instr.b());
                if x.truthy() == (instr.c() != 0) {
                    reg_set(&mut regs, &open_upvalues, instr.a(), x);
                } else {
                    pc += 1;
                }
            }
            op @ (28 | 29) => {
                let a = instr.a();
                let b = instr.b();
                let c = instr.c();
                let callee = reg_get(&regs, &open_upvalues, a);
                let call_args: Vec<Value> = if b == 0 {
                    ((a + 1)..top as u32).map(|i| reg_get(&regs, &open_upvalues, i)).collect()
                } else {
                    (1..b).map(|i| reg_get(&regs, &open_upvalues, a + i)).collect()
                };
                let results = match call_value(vm, callee, &call_args) {
                    Ok(r) => r,
                    Err(e) => bail!(e),
                };
                if op == 29 {
                    // No true tail-call elimination (Rust call stack depth
                    // follows Lua call depth 1:1); semantically equivalent
                    // since the caller's frame is about to return anyway.
                    break 'dispatch Ok(results);
                }
                if c == 0 {
                    for (i, v) in results.iter().enumerate() {
                        reg_set(&mut regs, &open_upvalues, a + i as u32, *v);
                    }
                    top = a as usize + results.len();
                } else {
                    for i in 0..(c - 1) {
                        let v = results.get(i as usize).copied().unwrap_or(Value::nil());
                        reg_set(&mut regs, &open_upvalues, a + i, v);
                    }
                }
            }
            30 => {
                let a = instr.a();
                let b = instr.b();
                let vals: Vec<Value> = if b == 0 {
                    (a as usize..top).map(|i| reg_get(&regs, &open_upvalues, i as u32)).collect()
                } else {
                    (0..(b - 1)).map(|i| reg_get(&regs, &open_upvalues, a + i)).collect()
                };
                break 'dispatch Ok(vals);
            }
            31 => {
                let a = instr.a();
                let step = reg_get(&regs, &open_upvalues, a + 2).as_f64().unwrap_or(0.0);
                let limit = reg_get(&regs, &open_upvalues, a + 1).as_f64().unwrap_or(0.0);
                let idx = reg_get(&regs, &open_upvalues, a).as_f64().unwrap_or(0.0) + step;
                let still_going = if step > 0.0 { idx <= limit } else { idx >= limit };
                if still_going {
                    reg_set(&mut regs, &open_upvalues, a, Value::number(idx));
                    reg_set(&mut regs, &open_upvalues, a + 3, Value::number(idx));
                    pc = (pc as i64 + instr.sbx() as i64) as usize;
                }
            }
            32 => {
                let a = instr.a();
                let step = reg_get(&regs, &open_upvalues, a + 2).as_f64().unwrap_or(0.0);
                let init = reg_get(&regs, &open_upvalues, a).as_f64().unwrap_or(0.0);
                reg_set(&mut regs, &open_upvalues, a, Value::number(init - step));
                pc = (pc as i64 + instr.sbx() as i64) as usize;
            }
            33 => {
                let a = instr.a();
                let c = instr.c();
                let generator = reg_get(&regs, &open_upvalues, a);
                let state = reg_get(&regs, &open_upvalues, a + 1);
                let control = reg_get(&regs, &open_upvalues, a + 2);
                let results = match call_value(vm, generator, &[state, control]) {
                    Ok(r) => r,
                    Err(e) => bail!(e),
                };
                for i in 0..c {
                    let v = results.get(i as usize).copied().unwrap_or(Value::nil());
                    reg_set(&mut regs, &open_upvalues, a + 3 + i, v);
                }
                let first = reg_get(&regs, &open_upvalues, a + 3);
                if !first.is_nil() {
                    reg_set(&mut regs, &open_upvalues, a + 2, first);
                } else {
                    pc += 1;
                }
            }
            34 => {
                let a = instr.a();
                let b = instr.b();
                let c = instr.c();
                let t = reg_get(&regs, &open_upvalues, a);
                let Some(table_ref) = t.as_table::<GcBox<Table>>() else {
                    bail!(Error::internal("SETLIST target is not a table"));
                };
                let n = if b == 0 { top - a as usize - 1 } else { b as usize };
                let base = (c as i64 - 1) * FIELDS_PER_FLUSH;
                let interner = &vm.interner;
                for i in 1..=n {
                    let v = reg_get(&regs, &open_upvalues, a + i as u32);
                    let _ = unsafe { table_ref.get_mut().value.set(interner, Value::int(base + i as i64), v) };
                }
            }
            35 => {
                let a = instr.a();
                open_upvalues.retain(|&reg, uv| {
                    if reg < a {
                        true
                    } else {
                        unsafe { uv.get() }.value.refcount.set(unsafe { uv.get() }.value.refcount.get().saturating_sub(1));
                        false
                    }
                });
            }
            36 => {
                let bx = instr.bx() as usize;
                let child_proto = proto.protos[bx].clone();
                let mut child_upvalues = Vec::with_capacity(child_proto.num_upvalues as usize);
                for _ in 0..child_proto.num_upvalues {
                    let pseudo = proto.code[pc];
                    pc += 1;
                    match pseudo.op() {
                        0 => {
                            let reg_idx = pseudo.b();
                            let uv = *open_upvalues.entry(reg_idx).or_insert_with(|| {
                                let initial = regs[reg_idx as usize];
                                vm.heap.alloc_upvalue(UpvalueCell::new(initial))
                            });
                            unsafe { uv.get() }.value.refcount.set(unsafe { uv.get() }.value.refcount.get() + 1);
                            child_upvalues.push(uv);
                        }
                        4 => {
                            child_upvalues.push(upvalues[pseudo.b() as usize]);
                        }
                        other => bail!(Error::internal(format!("malformed CLOSURE upvalue pseudo-instruction {other}"))),
                    }
                }
                let env = unsafe { closure_ref.get() }.value.env;
                let new_closure = vm.heap.alloc_closure(Closure {
                    env,
                    kind: ClosureKind::Lua { proto: child_proto, upvalues: child_upvalues },
                });
                reg_set(&mut regs, &open_upvalues, instr.a(), Value::from_function(new_closure));
            }
            37 => {
                let a = instr.a();
                let b = instr.b();
                let n = if b == 0 { varargs.len() } else { (b - 1) as usize };
                for i in 0..n {
                    let v = varargs.get(i).copied().unwrap_or(Value::nil());
                    reg_set(&mut regs, &open_upvalues, a + i as u32, v);
                }
                if b == 0 {
                    top = a as usize + n;
                }
            }
            other => bail!(Error::internal(format!("unknown opcode {other}"))),
        }
    };

    vm.heap.pop_frame_root(frame_id);
    vm.collect_if_needed();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::Instr;

    fn make_proto(code: Vec<Instr>, constants: Vec<Constant>, max_stack: u8) -> Rc<Prototype> {
        Rc::new(Prototype {
            source: "test".into(),
            start_line: 0,
            end_line: 0,
            num_upvalues: 0,
            num_parameters: 0,
            is_vararg: false,
            max_stack,
            code,
            constants,
            protos: vec![],
            lines: vec![],
            locals: vec![],
            upvalue_names: vec![],
        })
    }

    fn instr(op: u8, a: u32, b: u32, c: u32) -> Instr {
        Instr(op as u32 | (a << 6) | (c << 14) | (b << 23))
    }

    fn instr_bx(op: u8, a: u32, bx: u32) -> Instr {
        Instr(op as u32 | (a << 6) | (bx << 14))
    }

    fn load_closure(vm: &mut Vm, proto: Rc<Prototype>) -> ClosureRef {
        vm.heap.alloc_closure(Closure {
            env: Value::from_table(vm.globals),
            kind: ClosureKind::Lua { proto, upvalues: vec![] },
        })
    }

    #[test]
    fn loadk_and_return_roundtrip() {
        let mut vm = Vm::new();
        let proto = make_proto(
            vec![instr_bx(1, 0, 0), instr(30, 0, 2, 0)],
            vec![Constant::Number(7.0)],
            1,
        );
        let closure = load_closure(&mut vm, proto);
        let result = call_closure(&mut vm, closure, &[]).unwrap();
        assert_eq!(result[0].as_f64(), Some(7.0));
    }

    #[test]
    fn add_two_constants() {
        let mut vm = Vm::new();
        let proto = make_proto(
            vec![
                instr_bx(1, 0, 0),
                instr_bx(1, 1, 1),
                instr(12, 2, 256, 257),
                instr(30, 2, 2, 0),
            ],
            vec![Constant::Number(3.0), Constant::Number(4.0)],
            3,
        );
        let closure = load_closure(&mut vm, proto);
        let result = call_closure(&mut vm, closure, &[]).unwrap();
        assert_eq!(result[0].as_f64(), Some(7.0));
    }

    #[test]
    fn setglobal_then_getglobal() {
        let mut vm = Vm::new();
        let proto = make_proto(
            vec![
                instr_bx(1, 0, 0),
                instr_bx(7, 0, 1),
                instr_bx(5, 1, 1),
                instr(30, 1, 2, 0),
            ],
            vec![Constant::Number(42.0), Constant::Str(b"x".to_vec())],
            2,
        );
        let closure = load_closure(&mut vm, proto);
        let result = call_closure(&mut vm, closure, &[]).unwrap();
        assert_eq!(result[0].as_f64(), Some(42.0));
    }

    #[test]
    fn calling_non_callable_table_without_metamethod_errors() {
        let mut vm = Vm::new();
        let t = vm.heap.alloc_table(Table::new());
        assert!(call_value(&mut vm, Value::from_table(t), &[]).is_err());
    }

    #[test]
    fn arithmetic_coerces_a_string_operand() {
        let mut vm = Vm::new();
        let ten = vm.intern("10".as_bytes());
        // ADD r1, r0, k0 ; RETURN r1, 2  (r0 holds the string "10", passed in)
        let mut proto = make_proto(
            vec![instr(12, 1, 0, 256), instr(30, 1, 2, 0)],
            vec![Constant::Number(5.0)],
            2,
        );
        Rc::get_mut(&mut proto).unwrap().num_parameters = 1;
        let closure = load_closure(&mut vm, proto);
        let result = call_closure(&mut vm, closure, &[ten]).unwrap();
        assert_eq!(result[0].as_f64(), Some(15.0));
    }
}
