//! The `Vm` context: globals, intern store, heap, and coroutine registry.
//! Carried by value through every interpreter and stdlib entry point (no
//! `static`/`OnceLock` VM state), so tests can build isolated `Vm`s and run
//! them independently, even concurrently across OS threads.

use crate::coroutine::{self, CoroutineChannels, Handoff};
use crate::error::Error;
use crate::heap::{GcBox, Heap, TableRef, ThreadRef};
use crate::interp;
use crate::objects::{Closure, ClosureKind, ThreadData, ThreadStatus};
use joule_core::{StringInterner, Table, Value};
use std::cell::Cell;
use std::collections::HashMap;

struct CoroutineEntry {
    thread_value: Value,
    closure: Value,
    channels: Option<CoroutineChannels>,
}

pub struct Vm {
    pub heap: Heap,
    pub interner: StringInterner,
    pub globals: TableRef,
    coroutines: HashMap<u64, CoroutineEntry>,
}

impl Vm {
    pub fn new() -> Self {
        coroutine::init_scheduler();
        let mut heap = Heap::new();
        let globals = heap.alloc_table(Table::new());
        let mut vm = Vm {
            heap,
            interner: StringInterner::new(),
            globals,
            coroutines: HashMap::new(),
        };
        crate::stdlib::install(&mut vm);
        vm
    }

    /// Intern a static identifier (stdlib names, metamethod event strings) --
    /// these are never swept.
    pub fn intern_static(&mut self, s: &str) -> Value {
        Value::from_string(self.interner.intern_static(s.as_bytes()))
    }

    pub fn intern(&mut self, bytes: &[u8]) -> Value {
        Value::from_string(self.interner.intern(bytes))
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        let key = self.intern_static(name);
        let interner = &self.interner;
        unsafe {
            let _ = self.globals.get_mut().value.set(interner, key, value);
        }
    }

    /// Set a field on a table, interning `name` as the key. Used by the
    /// stdlib installer to populate the `math`/`string`/`table`/`os`/`io`/
    /// `coroutine` sub-tables.
    pub fn table_set_str(&mut self, t: crate::heap::TableRef, name: &str, value: Value) {
        let key = self.intern_static(name);
        let interner = &self.interner;
        unsafe {
            let _ = t.get_mut().value.set(interner, key, value);
        }
    }

    pub fn register_native(
        &mut self,
        name: &'static str,
        f: impl Fn(&mut Vm, &[Value]) -> Result<Vec<Value>, Error> + 'static,
    ) -> Value {
        let closure_ref = self.heap.alloc_closure(Closure {
            env: Value::from_table(self.globals),
            kind: ClosureKind::Native {
                name: name.to_string(),
                func: std::rc::Rc::new(f),
            },
        });
        Value::from_function(closure_ref)
    }

    /// Run a garbage collection pass if the heap's soft limit has been
    /// exceeded, marking the globals table and every still-tracked
    /// coroutine's thread object as roots in addition to whatever live
    /// interpreter frames have registered themselves.
    pub fn collect_if_needed(&mut self) {
        if !self.heap.should_collect() {
            return;
        }
        let globals = self.globals;
        let thread_roots: Vec<Value> = self.coroutines.values().map(|e| e.thread_value).collect();
        let mut interner = std::mem::take(&mut self.interner);
        self.heap.collect(&mut interner, |h| {
            h.mark_value(Value::from_table(globals));
            for t in &thread_roots {
                h.mark_value(*t);
            }
        });
        self.interner = interner;
    }

    /// Call a Lua or native closure with `args`, returning its results.
    pub fn call(&mut self, callee: Value, args: &[Value]) -> Result<Vec<Value>, Error> {
        let closure_ref = callee
            .as_function::<GcBox<Closure>>()
            .ok_or_else(|| Error::raw_no_position("attempt to call a non-function value"))?;
        interp::call_closure(self, closure_ref, args)
    }

    pub fn pcall(&mut self, callee: Value, args: &[Value]) -> Vec<Value> {
        match self.call(callee, args) {
            Ok(mut vals) => {
                let mut out = vec![Value::bool(true)];
                out.append(&mut vals);
                out
            }
            Err(e) if e.is_catchable() => {
                vec![Value::bool(false), self.error_to_value(&e)]
            }
            Err(e) => {
                // Internal errors are not catchable even by pcall; re-raise
                // by panicking the native-call boundary (the top-level
                // runner is the only place this terminates the process).
                panic!("{e}");
            }
        }
    }

    pub fn error_to_value(&mut self, e: &Error) -> Value {
        self.intern(e.payload_string().as_bytes())
    }

    pub fn create_coroutine(&mut self, closure: Value) -> Result<Value, Error> {
        if closure.as_function::<GcBox<Closure>>().is_none() {
            return Err(Error::raw_no_position("coroutine.create expects a function"));
        }
        let id = coroutine::next_id();
        let thread_ref: ThreadRef = self.heap.alloc_thread(ThreadData {
            id,
            status: Cell::new(ThreadStatus::NeverRun),
            closure,
            caller: Cell::new(None),
        });
        let thread_value = Value::from_thread(thread_ref);
        self.coroutines.insert(
            id,
            CoroutineEntry {
                thread_value,
                closure,
                channels: None,
            },
        );
        Ok(thread_value)
    }

    pub fn coroutine_status(&self, thread_value: Value) -> Result<ThreadStatus, Error> {
        let thread_ref = thread_value
            .as_thread::<GcBox<ThreadData>>()
            .ok_or_else(|| Error::raw_no_position("expected a thread value"))?;
        Ok(unsafe { thread_ref.get() }.value.status.get())
    }

    /// The thread value for the currently-running coroutine, or `None` at
    /// the main thread (used by `coroutine.running`).
    pub fn current_coroutine_thread(&self) -> Option<Value> {
        let id = coroutine::current()?;
        self.coroutines.get(&id).map(|e| e.thread_value)
    }

    /// Resume a suspended or never-run coroutine with `args`. Returns the
    /// values it yielded or returned (boolean success wrapping is the
    /// stdlib's `coroutine.resume` caller's job, matching the reference
    /// library's two-valued return).
    pub fn resume(&mut self, thread_value: Value, args: Vec<Value>) -> Result<Vec<Value>, Error> {
        let thread_ref = thread_value
            .as_thread::<GcBox<ThreadData>>()
            .ok_or_else(|| Error::raw_no_position("expected a thread value"))?;
        let id = unsafe { thread_ref.get() }.value.id;

        {
            let status = unsafe { thread_ref.get() }.value.status.get();
            match status {
                ThreadStatus::Dead => {
                    return Err(Error::raw_no_position("cannot resume dead coroutine"));
                }
                ThreadStatus::Running | ThreadStatus::Normal => {
                    return Err(Error::raw_no_position("cannot resume non-suspended coroutine"));
                }
                _ => {}
            }
        }

        let prev_current = coroutine::current();
        unsafe {
            thread_ref.get().value.caller.set(prev_current);
            thread_ref.get().value.status.set(ThreadStatus::Running);
        }

        let first_resume = {
            let entry = self.coroutines.get(&id).expect("coroutine registered at create");
            entry.channels.is_none()
        };
        if first_resume {
            let chans = coroutine::make_channels();
            let closure_value = self.coroutines.get(&id).unwrap().closure;
            let resume_rx = chans.resume_rx.clone();
            let out_of_co = chans.out_of_co.clone();
            self.coroutines.get_mut(&id).unwrap().channels = Some(chans);
            let vm_addr = self as *mut Vm as usize;
            may::coroutine::spawn(move || {
                coroutine::set_current(Some(id));
                let vm: &mut Vm = unsafe { &mut *(vm_addr as *mut Vm) };
                let first_args = resume_rx.recv().expect("coroutine: resume channel closed");
                let result = interp::call_value(vm, closure_value, &first_args);
                let handoff = match result {
                    Ok(vals) => Handoff::Returned(vals),
                    Err(e) => Handoff::Raised(e),
                };
                let _ = out_of_co.send(handoff);
            });
        }

        let entry = self.coroutines.get(&id).unwrap();
        let channels = entry.channels.as_ref().unwrap();
        channels.into_co.send(args).expect("resume: coroutine channel gone");
        let handoff = channels.handoff_rx.recv().expect("resume: coroutine vanished without a handoff");

        match handoff {
            Handoff::Yielded(vals) => {
                unsafe { thread_ref.get().value.status.set(ThreadStatus::Suspended) };
                Ok(vals)
            }
            Handoff::Returned(vals) => {
                unsafe { thread_ref.get().value.status.set(ThreadStatus::Dead) };
                self.coroutines.get_mut(&id).unwrap().channels = None;
                Ok(vals)
            }
            Handoff::Raised(e) => {
                unsafe { thread_ref.get().value.status.set(ThreadStatus::Dead) };
                self.coroutines.get_mut(&id).unwrap().channels = None;
                Err(e)
            }
        }
    }

    /// Called from the `coroutine.yield` native closure, deep inside the
    /// interpreter dispatch loop of whichever coroutine is currently running.
    pub fn yield_current(&mut self, values: Vec<Value>) -> Result<Vec<Value>, Error> {
        let id = coroutine::current()
            .ok_or_else(|| Error::raw_no_position("attempt to yield from outside a coroutine"))?;
        let entry = self.coroutines.get(&id).expect("running coroutine missing its registry entry");
        let channels = entry.channels.as_ref().expect("channels exist once a coroutine has been spawned");
        let out_of_co = channels.out_of_co.clone();
        let resume_rx = channels.resume_rx.clone();
        Ok(coroutine::yield_values(&out_of_co, &resume_rx, values))
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_vm_has_globals_table() {
        let vm = Vm::new();
        assert_eq!(Value::from_table(vm.globals).type_name(), "table");
    }

    #[test]
    fn set_and_read_global() {
        let mut vm = Vm::new();
        vm.set_global("answer", Value::number(42.0));
        let key = vm.intern_static("answer");
        let got = unsafe { vm.globals.get().value.get(key) };
        assert_eq!(got.as_f64(), Some(42.0));
    }

    #[test]
    fn calling_non_function_is_an_error() {
        let mut vm = Vm::new();
        assert!(vm.call(Value::number(1.0), &[]).is_err());
    }
}
