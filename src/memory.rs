use crate::tree::StmtId;
use bitflags::bitflags;
use std::ops::Range;
use std::{error, fmt};

/// Bound on the depth of the collector root stack.
pub const ROOT_STACK_LIMIT: usize = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The active semispace cannot satisfy an allocation even after a
    /// collection.
    OutOfMemory,
    /// The static region is exhausted.
    StaticExhausted,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::OutOfMemory => "out of memory",
            Self::StaticExhausted => "static region exhausted",
        })
    }
}

impl error::Error for Error {}

bitflags! {
    /// Low bits of a cell header word. The payload length occupies the
    /// remaining bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CellFlags: u64 {
        /// Set by the collector; the first payload slot holds the new
        /// address.
        const FORWARDED = 0b01;
        /// Payload is raw data (integers, reals, string handles) and its
        /// slots are not traced.
        const BINARY = 0b10;
    }
}

/// A payload slot word: nil, a heap cell address, or a code handle.
///
/// Raw binary payload (integer values, real bits, string-table indices)
/// shares the same slot storage but is only read through [`Heap::raw`]
/// on cells whose `BINARY` flag is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Value(u64);

const CODE_TAG: u64 = 1 << 63;

impl Value {
    /// The undefined value. `NIL` in source programs is this.
    pub const NIL: Value = Value(0);

    #[must_use]
    pub fn is_nil(self) -> bool {
        self.0 == 0
    }

    /// A statement-list handle stored in a cell slot (closure code,
    /// method-table entries). Never traced by the collector.
    #[must_use]
    pub fn code(id: StmtId) -> Value {
        Value(CODE_TAG | u64::from(id.index()))
    }

    /// The statement handle, if this word is one.
    #[must_use]
    pub fn as_code(self) -> Option<StmtId> {
        if self.0 & CODE_TAG != 0 {
            Some(StmtId::from_index(self.0 as u32))
        } else {
            None
        }
    }

    /// Whether this word addresses a heap cell.
    #[must_use]
    pub fn is_cell(self) -> bool {
        !self.is_nil() && self.0 & CODE_TAG == 0
    }

    fn addr(self) -> usize {
        debug_assert!(self.is_cell());
        self.0 as usize
    }
}

/// The cell heap: a static (non-collected) region followed by two
/// semispaces, plus the interpreter registers and the root stack.
///
/// Cell layout: one header word (payload length `<< 2` or-ed with
/// [`CellFlags`]) followed by `n + 1` payload slots, indices `0..=n` for
/// an allocation of size `n`.
///
/// One heap per interpreter; nothing here is process-wide.
#[derive(Debug)]
pub struct Heap {
    words: Vec<u64>,
    static_next: usize,
    static_limit: usize,
    space: usize,
    space_a: usize,
    space_b: usize,
    active: usize,
    alloc_next: usize,
    roots: Vec<Value>,
    strings: Vec<Box<str>>,
    initializing: bool,
    /// The global context register. Holds the cell addressed by
    /// `getGlobalOffset`.
    pub global_context: Value,
    /// The current context register: the active activation, instance or
    /// global cell.
    pub current_context: Value,
}

impl Heap {
    /// A heap with `static_words` words of static region and two
    /// semispaces of `space_words` words each. Allocation starts in the
    /// static region until [`Heap::end_initialization`].
    #[must_use]
    pub fn new(static_words: usize, space_words: usize) -> Self {
        let static_limit = 1 + static_words;
        Heap {
            words: vec![0; static_limit + 2 * space_words],
            static_next: 1,
            static_limit,
            space: space_words,
            space_a: static_limit,
            space_b: static_limit + space_words,
            active: static_limit,
            alloc_next: static_limit,
            roots: Vec::with_capacity(ROOT_STACK_LIMIT + 16),
            strings: Vec::new(),
            initializing: true,
            global_context: Value::NIL,
            current_context: Value::NIL,
        }
    }

    /// Whether allocations are still landing in the static region.
    #[must_use]
    pub fn is_initializing(&self) -> bool {
        self.initializing
    }

    /// Ends the bootstrap phase; subsequent binary/string constants are
    /// collected like everything else.
    pub fn end_initialization(&mut self) {
        self.initializing = false;
    }

    /// Allocates an `n`-slot cell from the non-collected region. Used
    /// during bootstrap and for class static tables.
    pub fn static_alloc(&mut self, n: usize) -> Result<Value, Error> {
        let addr = self.static_next;
        if addr + n + 2 > self.static_limit {
            return Err(Error::StaticExhausted);
        }
        self.static_next += n + 2;
        self.words[addr] = (n as u64) << 2;
        Ok(Value(addr as u64))
    }

    /// Allocates an `n`-slot cell from the active semispace, collecting
    /// if the fast path fails. Payload slots start out nil.
    pub fn alloc(&mut self, n: usize) -> Result<Value, Error> {
        if self.alloc_next + n + 2 > self.active + self.space {
            self.collect();
            if self.alloc_next + n + 2 > self.active + self.space {
                return Err(Error::OutOfMemory);
            }
        }
        let addr = self.alloc_next;
        self.alloc_next += n + 2;
        self.words[addr] = (n as u64) << 2;
        self.words[addr + 1..=addr + 1 + n].fill(0);
        Ok(Value(addr as u64))
    }

    /// Two-space copy. Roots are the outgoing slots of the static
    /// region, the context registers, and the root stack. Cells with the
    /// `BINARY` flag are copied without tracing their slots.
    pub fn collect(&mut self) {
        let from = self.active..self.active + self.space;
        let to = if self.active == self.space_a {
            self.space_b
        } else {
            self.space_a
        };
        let mut next = to;

        self.global_context = Self::forward(&mut self.words, &from, &mut next, self.global_context);
        self.current_context =
            Self::forward(&mut self.words, &from, &mut next, self.current_context);
        for i in 0..self.roots.len() {
            self.roots[i] = Self::forward(&mut self.words, &from, &mut next, self.roots[i]);
        }

        // Static cells are never moved but their outgoing slots are roots.
        let mut addr = 1;
        while addr < self.static_next {
            let header = self.words[addr];
            let len = (header >> 2) as usize;
            if CellFlags::from_bits_truncate(header) & CellFlags::BINARY == CellFlags::empty() {
                for i in 0..=len {
                    let slot = Value(self.words[addr + 1 + i]);
                    self.words[addr + 1 + i] =
                        Self::forward(&mut self.words, &from, &mut next, slot).0;
                }
            }
            addr += len + 2;
        }

        // Cheney scan of everything copied so far.
        let mut scan = to;
        while scan < next {
            let header = self.words[scan];
            let len = (header >> 2) as usize;
            if CellFlags::from_bits_truncate(header) & CellFlags::BINARY == CellFlags::empty() {
                for i in 0..=len {
                    let slot = Value(self.words[scan + 1 + i]);
                    self.words[scan + 1 + i] =
                        Self::forward(&mut self.words, &from, &mut next, slot).0;
                }
            }
            scan += len + 2;
        }

        self.active = to;
        self.alloc_next = next;
    }

    fn forward(words: &mut [u64], from: &Range<usize>, next: &mut usize, v: Value) -> Value {
        if !v.is_cell() {
            return v;
        }
        let addr = v.addr();
        if !from.contains(&addr) {
            // Static cell, or already copied this collection.
            return v;
        }
        let header = words[addr];
        if CellFlags::from_bits_truncate(header).contains(CellFlags::FORWARDED) {
            return Value(words[addr + 1]);
        }
        let len = (header >> 2) as usize;
        let new = *next;
        *next += len + 2;
        words.copy_within(addr..addr + len + 2, new);
        words[addr] = header | CellFlags::FORWARDED.bits();
        words[addr + 1] = new as u64;
        Value(new as u64)
    }

    /// Payload length of a cell.
    #[must_use]
    pub fn len(&self, v: Value) -> usize {
        (self.words[v.addr()] >> 2) as usize
    }

    #[must_use]
    pub fn flags(&self, v: Value) -> CellFlags {
        CellFlags::from_bits_truncate(self.words[v.addr()])
    }

    /// Marks a cell's payload as raw data.
    pub fn set_binary(&mut self, v: Value) {
        self.words[v.addr()] |= CellFlags::BINARY.bits();
    }

    #[must_use]
    pub fn slot(&self, v: Value, i: usize) -> Value {
        debug_assert!(i <= self.len(v));
        Value(self.words[v.addr() + 1 + i])
    }

    pub fn set_slot(&mut self, v: Value, i: usize, val: Value) {
        debug_assert!(i <= self.len(v));
        self.words[v.addr() + 1 + i] = val.0;
    }

    /// Raw payload word of a binary cell.
    #[must_use]
    pub fn raw(&self, v: Value, i: usize) -> u64 {
        self.words[v.addr() + 1 + i]
    }

    pub fn set_raw(&mut self, v: Value, i: usize, word: u64) {
        self.words[v.addr() + 1 + i] = word;
    }

    /// Pushes a live temporary for the duration of an allocation.
    pub fn push_root(&mut self, v: Value) {
        self.roots.push(v);
    }

    /// Pops the temporary back, at its possibly-moved address.
    pub fn pop_root(&mut self) -> Value {
        self.roots.pop().unwrap_or(Value::NIL)
    }

    #[must_use]
    pub fn root_depth(&self) -> usize {
        self.roots.len()
    }

    /// Interns string text, returning the raw handle stored in string
    /// cell payloads. Text is never reclaimed.
    pub fn intern(&mut self, text: impl Into<Box<str>>) -> u64 {
        self.strings.push(text.into());
        (self.strings.len() - 1) as u64
    }

    #[must_use]
    pub fn string(&self, handle: u64) -> &str {
        &self.strings[handle as usize]
    }
}

impl Default for Heap {
    fn default() -> Self {
        Heap::new(1 << 14, 1 << 18)
    }
}

#[test]
fn test_alloc_headers() {
    let mut h = Heap::new(64, 256);
    let s = h.static_alloc(4).unwrap();
    assert_eq!(4, h.len(s));
    assert_eq!(CellFlags::empty(), h.flags(s));
    let v = h.alloc(2).unwrap();
    assert_eq!(2, h.len(v));
    for i in 0..=2 {
        assert!(h.slot(v, i).is_nil());
    }
    h.set_binary(v);
    assert!(h.flags(v).contains(CellFlags::BINARY));
    h.set_raw(v, 2, (-7i64) as u64);
    assert_eq!(-7, h.raw(v, 2) as i64);
}

#[test]
fn test_value_tags() {
    assert!(Value::NIL.is_nil());
    assert!(!Value::NIL.is_cell());
    let c = Value::code(StmtId::from_index(9));
    assert!(!c.is_cell());
    assert_eq!(Some(StmtId::from_index(9)), c.as_code());
    assert_eq!(None, Value(17).as_code());
}

#[test]
fn test_collect_moves_rooted_graph() {
    let mut h = Heap::new(64, 64);
    h.end_initialization();
    let a = h.alloc(2).unwrap();
    h.push_root(a);
    let b = h.alloc(2).unwrap();
    let a = h.pop_root();
    h.set_slot(a, 0, b);
    h.set_slot(b, 2, a);

    // Garbage that should not survive.
    for _ in 0..3 {
        h.alloc(1).unwrap();
    }

    h.push_root(a);
    h.collect();
    let a2 = h.pop_root();
    assert_ne!(a, a2);
    let b2 = h.slot(a2, 0);
    assert_eq!(a2, h.slot(b2, 2));
    assert_eq!(2, h.len(a2));
    assert!(!h.flags(a2).contains(CellFlags::FORWARDED));
}

#[test]
fn test_collect_traces_registers_and_static() {
    let mut h = Heap::new(64, 64);
    let table = h.static_alloc(3).unwrap();
    h.end_initialization();
    let obj = h.alloc(1).unwrap();
    h.set_slot(table, 0, obj);
    h.global_context = h.alloc(1).unwrap();
    let g = h.global_context;
    h.set_slot(g, 0, obj);
    h.collect();
    // The static cell itself did not move, and its outgoing slot was
    // retargeted to the copied object.
    let moved = h.slot(table, 0);
    assert!(moved.is_cell());
    assert_eq!(moved, h.slot(h.global_context, 0));
}

#[test]
fn test_binary_payload_not_traced() {
    let mut h = Heap::new(64, 64);
    h.end_initialization();
    let n = h.alloc(2).unwrap();
    h.set_binary(n);
    // A raw word that happens to look like an address.
    h.set_raw(n, 2, 5);
    h.push_root(n);
    h.collect();
    let n = h.pop_root();
    assert_eq!(5, h.raw(n, 2));
}

#[test]
fn test_out_of_memory() {
    let mut h = Heap::new(16, 16);
    h.end_initialization();
    assert_eq!(Err(Error::OutOfMemory), h.alloc(32));
    // Unreachable cells are reclaimed by the collection an allocation
    // triggers.
    for _ in 0..100 {
        h.alloc(1).unwrap();
    }
}

#[test]
fn test_intern_strings() {
    let mut h = Heap::new(16, 16);
    let a = h.intern("alpha");
    let b = h.intern(String::from("beta"));
    assert_eq!("alpha", h.string(a));
    assert_eq!("beta", h.string(b));
}
