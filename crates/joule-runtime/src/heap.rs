//! Tracked heap and mark-sweep collector.
//!
//! Each allocation is boxed behind a [`GcBox`] carrying a mark bit; the
//! `Heap` keeps one `Vec<Box<GcBox<T>>>` per concrete object kind (tables,
//! closures, upvalue cells, threads, userdata) rather than a single
//! intrusive linked list -- the pointers handed out as [`joule_core::GcRef`]
//! point at heap-allocated `Box` contents, which stay put across `Vec`
//! growth, so this gives the same "objects live until swept" guarantee the
//! reference implementation gets from its header chain, with less unsafe
//! code. `unsafe` is confined to this module: every other part of the
//! runtime only ever touches a `GcRef<T>`.

use crate::objects::{Closure, ClosureKind, ThreadData, UpvalueCell, UserdataObj};
use joule_core::{GcRef, StringInterner, Table, Tag, Value};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::collections::HashSet;

pub struct GcBox<T> {
    marked: Cell<bool>,
    pub value: T,
}

impl<T> std::ops::Deref for GcBox<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.value
    }
}
impl<T> std::ops::DerefMut for GcBox<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

pub type TableRef = GcRef<GcBox<Table>>;
pub type ClosureRef = GcRef<GcBox<Closure>>;
pub type UpvalueRef = GcRef<GcBox<UpvalueCell>>;
pub type ThreadRef = GcRef<GcBox<ThreadData>>;
pub type UserdataRef = GcRef<GcBox<UserdataObj>>;

const DEFAULT_INITIAL_LIMIT: usize = 1 << 20; // 1 MiB, overridable by env var

fn initial_limit() -> usize {
    match std::env::var("JOULE_GC_INITIAL_LIMIT") {
        Ok(s) => match s.parse::<usize>() {
            Ok(n) if n > 0 => n,
            _ => {
                eprintln!("joule: invalid JOULE_GC_INITIAL_LIMIT {s:?}, using default");
                DEFAULT_INITIAL_LIMIT
            }
        },
        Err(_) => DEFAULT_INITIAL_LIMIT,
    }
}

pub struct Heap {
    tables: Vec<Box<GcBox<Table>>>,
    closures: Vec<Box<GcBox<Closure>>>,
    upvalues: Vec<Box<GcBox<UpvalueCell>>>,
    threads: Vec<Box<GcBox<ThreadData>>>,
    userdata: Vec<Box<GcBox<UserdataObj>>>,

    live_bytes: usize,
    limit: usize,
    collecting: bool,

    frame_roots: RefCell<HashMap<u64, *const Vec<Value>>>,
    next_frame_id: Cell<u64>,

    reachable_strings: RefCell<HashSet<u32>>,
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            tables: Vec::new(),
            closures: Vec::new(),
            upvalues: Vec::new(),
            threads: Vec::new(),
            userdata: Vec::new(),
            live_bytes: 0,
            limit: initial_limit(),
            collecting: false,
            frame_roots: RefCell::new(HashMap::new()),
            next_frame_id: Cell::new(0),
            reachable_strings: RefCell::new(HashSet::new()),
        }
    }

    pub fn live_bytes(&self) -> usize {
        self.live_bytes
    }

    pub fn should_collect(&self) -> bool {
        !self.collecting && self.live_bytes >= self.limit
    }

    pub fn alloc_table(&mut self, t: Table) -> TableRef {
        let mut b = Box::new(GcBox { marked: Cell::new(false), value: t });
        let ptr: *mut GcBox<Table> = &mut *b;
        self.tables.push(b);
        self.live_bytes += std::mem::size_of::<GcBox<Table>>();
        unsafe { GcRef::from_raw(ptr) }
    }

    pub fn alloc_closure(&mut self, c: Closure) -> ClosureRef {
        let mut b = Box::new(GcBox { marked: Cell::new(false), value: c });
        let ptr: *mut GcBox<Closure> = &mut *b;
        self.closures.push(b);
        self.live_bytes += std::mem::size_of::<GcBox<Closure>>();
        unsafe { GcRef::from_raw(ptr) }
    }

    pub fn alloc_upvalue(&mut self, u: UpvalueCell) -> UpvalueRef {
        let mut b = Box::new(GcBox { marked: Cell::new(false), value: u });
        let ptr: *mut GcBox<UpvalueCell> = &mut *b;
        self.upvalues.push(b);
        self.live_bytes += std::mem::size_of::<GcBox<UpvalueCell>>();
        unsafe { GcRef::from_raw(ptr) }
    }

    pub fn alloc_thread(&mut self, t: ThreadData) -> ThreadRef {
        let mut b = Box::new(GcBox { marked: Cell::new(false), value: t });
        let ptr: *mut GcBox<ThreadData> = &mut *b;
        self.threads.push(b);
        self.live_bytes += std::mem::size_of::<GcBox<ThreadData>>();
        unsafe { GcRef::from_raw(ptr) }
    }

    pub fn alloc_userdata(&mut self, u: UserdataObj) -> UserdataRef {
        let mut b = Box::new(GcBox { marked: Cell::new(false), value: u });
        let ptr: *mut GcBox<UserdataObj> = &mut *b;
        self.userdata.push(b);
        self.live_bytes += std::mem::size_of::<GcBox<UserdataObj>>();
        unsafe { GcRef::from_raw(ptr) }
    }

    /// Register a currently-executing register window as a GC root. Held
    /// for as long as the interpreter frame that owns `regs` is anywhere on
    /// some Rust call stack -- including a parked `may::coroutine` task,
    /// whose stack memory (and thus `regs`) stays valid while suspended.
    pub fn push_frame_root(&self, regs: &Vec<Value>) -> u64 {
        let id = self.next_frame_id.get();
        self.next_frame_id.set(id + 1);
        self.frame_roots.borrow_mut().insert(id, regs as *const Vec<Value>);
        id
    }

    pub fn pop_frame_root(&self, id: u64) {
        self.frame_roots.borrow_mut().remove(&id);
    }

    pub fn mark_value(&self, v: Value) {
        match v.tag() {
            Some(Tag::String) => {
                if let Some(h) = v.as_string_handle() {
                    self.reachable_strings.borrow_mut().insert(h.0);
                }
            }
            Some(Tag::Table) => {
                if let Some(r) = v.as_table::<GcBox<Table>>() {
                    self.mark_table(r);
                }
            }
            Some(Tag::Function) => {
                if let Some(r) = v.as_function::<GcBox<Closure>>() {
                    self.mark_closure(r);
                }
            }
            Some(Tag::Upvalue) => {
                if let Some(r) = v.as_upvalue::<GcBox<UpvalueCell>>() {
                    self.mark_upvalue(r);
                }
            }
            Some(Tag::Thread) => {
                if let Some(r) = v.as_thread::<GcBox<ThreadData>>() {
                    self.mark_thread(r);
                }
            }
            Some(Tag::Userdata) => {
                if let Some(r) = v.as_userdata::<GcBox<UserdataObj>>() {
                    self.mark_userdata(r);
                }
            }
            _ => {}
        }
    }

    fn mark_table(&self, r: TableRef) {
        let b = unsafe { r.get() };
        if b.marked.replace(true) {
            return;
        }
        if let Some(mt) = b.value.metatable {
            self.mark_value(mt);
        }
        let mut cur = Value::nil();
        while let Some((k, v)) = b.value.next(cur) {
            self.mark_value(k);
            self.mark_value(v);
            cur = k;
        }
    }

    fn mark_closure(&self, r: ClosureRef) {
        let b = unsafe { r.get() };
        if b.marked.replace(true) {
            return;
        }
        self.mark_value(b.value.env);
        if let ClosureKind::Lua { upvalues, .. } = &b.value.kind {
            for uv in upvalues {
                self.mark_upvalue(*uv);
            }
        }
    }

    fn mark_upvalue(&self, r: UpvalueRef) {
        let b = unsafe { r.get() };
        if b.marked.replace(true) {
            return;
        }
        self.mark_value(*b.value.value.borrow());
    }

    fn mark_thread(&self, r: ThreadRef) {
        let b = unsafe { r.get() };
        if b.marked.replace(true) {
            return;
        }
        self.mark_value(b.value.closure);
    }

    fn mark_userdata(&self, r: UserdataRef) {
        let b = unsafe { r.get() };
        b.marked.set(true);
    }

    /// Run a full stop-the-world collection. `mark_roots` is invoked with
    /// `&Heap` so the caller (the `Vm`) can mark the globals table and any
    /// other subsystem-owned roots before the frame-root sweep here marks
    /// every live register window.
    pub fn collect(&mut self, interner: &mut StringInterner, mark_roots: impl FnOnce(&Heap)) {
        assert!(!self.collecting, "GC is not reentrant");
        self.collecting = true;
        self.reachable_strings.borrow_mut().clear();

        mark_roots(self);
        for ptr in self.frame_roots.borrow().values() {
            for v in unsafe { &**ptr } {
                self.mark_value(*v);
            }
        }

        self.tables.retain(|b| b.marked.replace(false));
        self.closures.retain(|b| b.marked.replace(false));
        self.upvalues.retain(|b| b.marked.replace(false));
        self.threads.retain(|b| b.marked.replace(false));
        self.userdata.retain(|b| b.marked.replace(false));

        interner.sweep(&self.reachable_strings.borrow());

        self.live_bytes = (self.tables.len() * std::mem::size_of::<GcBox<Table>>())
            + (self.closures.len() * std::mem::size_of::<GcBox<Closure>>())
            + (self.upvalues.len() * std::mem::size_of::<GcBox<UpvalueCell>>())
            + (self.threads.len() * std::mem::size_of::<GcBox<ThreadData>>())
            + (self.userdata.len() * std::mem::size_of::<GcBox<UserdataObj>>());

        if self.live_bytes >= self.limit {
            self.limit *= 2;
        } else if self.live_bytes * 2 < self.limit {
            self.limit = (self.limit / 2).max(DEFAULT_INITIAL_LIMIT / 16);
        }
        self.collecting = false;
    }

    pub fn counts(&self) -> (usize, usize, usize, usize, usize) {
        (
            self.tables.len(),
            self.closures.len(),
            self.upvalues.len(),
            self.threads.len(),
            self.userdata.len(),
        )
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::ThreadStatus;

    #[test]
    fn alloc_table_roundtrips_through_value() {
        let mut heap = Heap::new();
        let r = heap.alloc_table(Table::new());
        let v = Value::from_table(r);
        assert_eq!(v.as_table::<GcBox<Table>>(), Some(r));
    }

    #[test]
    fn unreferenced_table_is_collected() {
        let mut heap = Heap::new();
        let mut interner = StringInterner::new();
        heap.alloc_table(Table::new());
        assert_eq!(heap.counts().0, 1);
        heap.collect(&mut interner, |_| {});
        assert_eq!(heap.counts().0, 0);
    }

    #[test]
    fn rooted_table_survives_collection() {
        let mut heap = Heap::new();
        let mut interner = StringInterner::new();
        let r = heap.alloc_table(Table::new());
        heap.collect(&mut interner, |h| h.mark_value(Value::from_table(r)));
        assert_eq!(heap.counts().0, 1);
    }

    #[test]
    fn frame_root_keeps_referenced_table_alive() {
        let mut heap = Heap::new();
        let mut interner = StringInterner::new();
        let r = heap.alloc_table(Table::new());
        let regs = vec![Value::from_table(r)];
        let id = heap.push_frame_root(&regs);
        heap.collect(&mut interner, |_| {});
        assert_eq!(heap.counts().0, 1);
        heap.pop_frame_root(id);
        heap.collect(&mut interner, |_| {});
        assert_eq!(heap.counts().0, 0);
    }

    #[test]
    fn cyclic_tables_both_survive_then_both_collected() {
        let mut heap = Heap::new();
        let mut interner = StringInterner::new();
        let r1 = heap.alloc_table(Table::new());
        let r2 = heap.alloc_table(Table::new());
        unsafe {
            r1.get_mut().value.metatable = Some(Value::from_table(r2));
            r2.get_mut().value.metatable = Some(Value::from_table(r1));
        }
        heap.collect(&mut interner, |h| h.mark_value(Value::from_table(r1)));
        assert_eq!(heap.counts().0, 2);
        heap.collect(&mut interner, |_| {});
        assert_eq!(heap.counts().0, 0);
    }

    #[test]
    fn closure_marks_env_and_upvalues() {
        let mut heap = Heap::new();
        let mut interner = StringInterner::new();
        let env = heap.alloc_table(Table::new());
        let uv = heap.alloc_upvalue(UpvalueCell::new(Value::number(1.0)));
        let closure = heap.alloc_closure(Closure {
            env: Value::from_table(env),
            kind: ClosureKind::Lua {
                proto: std::rc::Rc::new(crate::proto::Prototype {
                    source: "t".into(),
                    start_line: 0,
                    end_line: 0,
                    num_upvalues: 1,
                    num_parameters: 0,
                    is_vararg: false,
                    max_stack: 2,
                    code: vec![],
                    constants: vec![],
                    protos: vec![],
                    lines: vec![],
                    locals: vec![],
                    upvalue_names: vec![],
                }),
                upvalues: vec![uv],
            },
        });
        heap.collect(&mut interner, |h| h.mark_value(Value::from_function(closure)));
        assert_eq!(heap.counts(), (1, 1, 1, 0, 0));
    }

    #[test]
    fn thread_marks_its_closure() {
        let mut heap = Heap::new();
        let mut interner = StringInterner::new();
        let env = heap.alloc_table(Table::new());
        let co_closure = heap.alloc_closure(Closure {
            env: Value::from_table(env),
            kind: ClosureKind::Native {
                name: "x".into(),
                func: std::rc::Rc::new(|_, _| Ok(vec![])),
            },
        });
        let thread = heap.alloc_thread(ThreadData {
            id: 1,
            status: Cell::new(ThreadStatus::Suspended),
            closure: Value::from_function(co_closure),
            caller: Cell::new(None),
        });
        heap.collect(&mut interner, |h| h.mark_value(Value::from_thread(thread)));
        let (tables, closures, _, threads, _) = heap.counts();
        assert_eq!(closures, 1, "thread's closure must be marked reachable");
        assert_eq!(tables, 1, "closure's env table must be marked transitively");
        assert_eq!(threads, 1);
    }
}
