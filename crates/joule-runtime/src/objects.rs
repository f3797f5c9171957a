//! Heap-resident object kinds that aren't the plain [`joule_core::Table`]:
//! closures, upvalue cells, and the thread (coroutine) handle. All three
//! live behind the mark-sweep [`crate::heap::Heap`]; [`crate::proto::Prototype`]
//! does not (see its module docs).

use crate::proto::Prototype;
use joule_core::Value;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

pub type NativeFn = Rc<dyn Fn(&mut crate::vm::Vm, &[Value]) -> Result<Vec<Value>, crate::error::Error>>;

pub enum ClosureKind {
    Lua {
        proto: Rc<Prototype>,
        upvalues: Vec<crate::heap::UpvalueRef>,
    },
    Native {
        name: String,
        func: NativeFn,
    },
}

pub struct Closure {
    pub env: Value,
    pub kind: ClosureKind,
}

impl Closure {
    pub fn name(&self) -> &str {
        match &self.kind {
            ClosureKind::Lua { proto, .. } => &proto.source,
            ClosureKind::Native { name, .. } => name,
        }
    }
}

/// An upvalue cell: open while shared with a live register window, closed
/// once detached. Since the interpreter's register window lives in a plain
/// `Vec<Value>` rather than the reference implementation's raw stack slot,
/// "open" vs "closed" is realized as whether any `RegSlot::Open` still
/// points at this cell (tracked by refcount, not by cell state itself).
pub struct UpvalueCell {
    pub value: RefCell<Value>,
    pub refcount: Cell<u32>,
}

impl UpvalueCell {
    pub fn new(initial: Value) -> Self {
        UpvalueCell {
            value: RefCell::new(initial),
            refcount: Cell::new(0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    NeverRun,
    Suspended,
    Running,
    Normal,
    Dead,
}

/// The Lua-visible half of a coroutine. The scheduling machinery (channels,
/// the spawned `may::coroutine` task) lives in [`crate::coroutine`] keyed by
/// `id`; this struct is what a `Value::Thread` points to and what the GC
/// walks as a root.
pub struct ThreadData {
    pub id: u64,
    pub status: Cell<ThreadStatus>,
    pub closure: Value,
    pub caller: Cell<Option<u64>>,
}

/// Opaque userdata. Nothing in this runtime's stdlib surface allocates one
/// directly, but the type tag is part of the closed value set (§3) and
/// native-library extension points may want it, so the heap kind exists.
pub struct UserdataObj {
    pub tag: &'static str,
    pub data: Box<dyn std::any::Any>,
}
