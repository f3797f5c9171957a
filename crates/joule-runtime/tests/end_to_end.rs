//! End-to-end scenarios exercising the interpreter, heap, and stdlib
//! together through the public API, the way a loaded chunk would.

use joule_runtime::interp::call_closure;
use joule_runtime::objects::{Closure, ClosureKind, ThreadStatus};
use joule_runtime::proto::{Constant, Instr, Prototype};
use joule_runtime::Vm;
use joule_core::{Table, Value};
use std::rc::Rc;

fn instr(op: u8, a: u32, b: u32, c: u32) -> Instr {
    Instr(op as u32 | (a << 6) | (c << 14) | (b << 23))
}

fn instr_bx(op: u8, a: u32, bx: u32) -> Instr {
    Instr(op as u32 | (a << 6) | (bx << 14))
}

fn proto(code: Vec<Instr>, constants: Vec<Constant>, max_stack: u8, num_upvalues: u8) -> Rc<Prototype> {
    Rc::new(Prototype {
        source: "test".into(),
        start_line: 0,
        end_line: 0,
        num_upvalues,
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

#[test]
fn table_length_and_indexing_round_trip() {
    let mut vm = Vm::new();
    let t = vm.heap.alloc_table(Table::new());
    let interner = &vm.interner;
    unsafe {
        t.get_mut().value.set(interner, Value::int(1), Value::number(10.0)).unwrap();
        t.get_mut().value.set(interner, Value::int(2), Value::number(20.0)).unwrap();
        t.get_mut().value.set(interner, Value::int(3), Value::number(30.0)).unwrap();
    }
    assert_eq!(unsafe { t.get() }.value.length(), 3);
    assert_eq!(unsafe { t.get() }.value.get(Value::int(2)).as_f64(), Some(20.0));
}

/// Two sibling closures share a single upvalue cell captured by a CLOSURE
/// pseudo-instruction; mutating it through one is visible via the other,
/// exercising the open-upvalue promotion path without going through the
/// chunk loader.
#[test]
fn sibling_closures_share_a_mutated_upvalue() {
    let mut vm = Vm::new();

    // Child A: GETUPVAL r0, u0 ; LOADK r1, 100 ; SETUPVAL r1, u0 ; RETURN r0, 2
    let child_a = proto(
        vec![
            instr(4, 0, 0, 0),
            instr_bx(1, 1, 0),
            instr(8, 1, 0, 0),
            instr(30, 0, 2, 0),
        ],
        vec![Constant::Number(100.0)],
        2,
        1,
    );
    // Child B: GETUPVAL r0, u0 ; RETURN r0, 2
    let child_b = proto(vec![instr(4, 0, 0, 0), instr(30, 0, 2, 0)], vec![], 1, 1);

    // Outer: LOADK r0, 7 ; CLOSURE r1, childA {MOVE r0} ; CLOSURE r2, childB {MOVE r0}
    //        CALL r1, 1, 1 (drop) ; CALL r2, 1, 2 ; RETURN r2, 2
    let outer_code = vec![
        instr_bx(1, 0, 0),   // LOADK r0 <- 7.0
        instr_bx(36, 1, 0),  // CLOSURE r1 <- protos[0]
        instr(0, 0, 0, 0),   // pseudo: MOVE capturing r0
        instr_bx(36, 2, 1),  // CLOSURE r2 <- protos[1]
        instr(0, 0, 0, 0),   // pseudo: MOVE capturing r0 (same upvalue, already open)
        instr(28, 1, 1, 1),  // CALL r1, 1 arg(none... b=1 means 0 args), c=1 (no results kept)
        instr(28, 2, 1, 2),  // CALL r2, 0 args, c=2 (keep 1 result into r2)
        instr(30, 2, 2, 0),  // RETURN r2, 1 value
    ];
    let mut outer = proto(outer_code, vec![Constant::Number(7.0)], 3, 0);
    Rc::get_mut(&mut outer).unwrap().protos = vec![child_a, child_b];

    let closure_ref = vm.heap.alloc_closure(Closure {
        env: Value::from_table(vm.globals),
        kind: ClosureKind::Lua { proto: outer, upvalues: vec![] },
    });

    let result = call_closure(&mut vm, closure_ref, &[]).unwrap();
    assert_eq!(result[0].as_f64(), Some(100.0));
}

#[test]
fn coroutine_resume_yield_round_trip() {
    let mut vm = Vm::new();
    let body = vm.register_native("co-body", |vm, args| {
        let first = args[0];
        let resumed = vm.yield_current(vec![Value::number(first.as_f64().unwrap() + 1.0)])?;
        Ok(vec![Value::number(resumed[0].as_f64().unwrap() * 2.0)])
    });

    let thread = vm.create_coroutine(body).unwrap();
    assert_eq!(vm.coroutine_status(thread).unwrap(), ThreadStatus::NeverRun);

    let first = vm.resume(thread, vec![Value::number(10.0)]).unwrap();
    assert_eq!(first[0].as_f64(), Some(11.0));
    assert_eq!(vm.coroutine_status(thread).unwrap(), ThreadStatus::Suspended);

    let second = vm.resume(thread, vec![Value::number(5.0)]).unwrap();
    assert_eq!(second[0].as_f64(), Some(10.0));
    assert_eq!(vm.coroutine_status(thread).unwrap(), ThreadStatus::Dead);

    assert!(vm.resume(thread, vec![]).is_err());
}

#[test]
fn pcall_catches_a_catchable_error_but_not_an_internal_one() {
    let mut vm = Vm::new();
    let boom = vm.register_native("boom", |_vm, _args| {
        Err(joule_runtime::Error::raw_no_position("nope"))
    });
    let result = vm.pcall(boom, &[]);
    assert_eq!(result[0], Value::bool(false));
    assert!(result[1].as_string_handle().is_some());
}

/// A table with no raw entry at the key falls through to a `__index`
/// function via the real GETTABLE opcode, not just the helper directly.
#[test]
fn metatable_index_function_fallback_through_gettable() {
    let mut vm = Vm::new();
    let t = vm.heap.alloc_table(Table::new());
    let mt = vm.heap.alloc_table(Table::new());

    let handler = vm.register_native("__index handler", |_vm, args| {
        let key = args[1];
        Ok(vec![Value::number(key.as_f64().unwrap() * 1000.0)])
    });

    let index_key = vm.intern_static("index");
    let interner = &vm.interner;
    unsafe { mt.get_mut().value.set(interner, index_key, handler) }.unwrap();
    unsafe { t.get_mut().value.metatable = Some(Value::from_table(mt)) };

    // r0 <- t (passed as the sole parameter); LOADK r1 <- 5.0;
    // GETTABLE r2, r0, r1; RETURN r2, 2
    let code = vec![instr_bx(1, 1, 0), instr(6, 2, 0, 1), instr(30, 2, 2, 0)];
    let mut p = proto(code, vec![Constant::Number(5.0)], 3, 0);
    Rc::get_mut(&mut p).unwrap().num_parameters = 1;

    let closure_ref = vm.heap.alloc_closure(Closure {
        env: Value::from_table(vm.globals),
        kind: ClosureKind::Lua { proto: p, upvalues: vec![] },
    });
    let result = call_closure(&mut vm, closure_ref, &[Value::from_table(t)]).unwrap();
    assert_eq!(result[0].as_f64(), Some(5000.0));
}
