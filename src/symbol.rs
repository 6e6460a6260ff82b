//! The string interner, which doubles as the compiled program's string table.
//!
//! Interned strings live in a single append-only byte buffer, each stored as
//! a 4-byte little-endian length prefix followed by the raw bytes; this is
//! the exact layout the backends use for string constants. Deduplication
//! happens on intern, so symbol equality is string equality.

use std::sync::Mutex;

use byteorder::{ByteOrder, LE};
use hashbrown::HashMap;

/// An interned string. `Symbol::NULL` (id 0) is the empty string and serves
/// as the distinguished null of the symbol id space.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Symbol(pub u32);

impl Symbol {
  /// The null symbol, which resolves to the empty string.
  pub const NULL: Symbol = Symbol(0);
}

impl std::fmt::Debug for Symbol {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "Symbol({})", self.0)
  }
}

#[derive(Default)]
struct Inner {
  map: HashMap<&'static str, Symbol>,
  strs: Vec<&'static str>,
  /// `[u32 LE length][bytes]` records, appended in intern order.
  buf: Vec<u8>,
  /// Offset of each symbol's length prefix in `buf`.
  offsets: Vec<u32>,
}

impl Inner {
  fn intern(&mut self, s: &str) -> Symbol {
    if let Some(&sym) = self.map.get(s) { return sym }
    let sym = Symbol(self.strs.len() as u32);
    // Strings are never removed, so leaking here just moves their ownership
    // to the process lifetime and lets `get` hand out plain references.
    let s: &'static str = Box::leak(s.to_owned().into_boxed_str());
    self.map.insert(s, sym);
    self.strs.push(s);
    self.offsets.push(self.buf.len() as u32);
    let mut len = [0; 4];
    LE::write_u32(&mut len, s.len() as u32);
    self.buf.extend_from_slice(&len);
    self.buf.extend_from_slice(s.as_bytes());
    sym
  }
}

/// The symbol table. Interning locks internally, so the parallel parse and
/// body phases can share one table; reads after interning are lock-free
/// copies of the leaked string reference.
pub struct Interner(Mutex<Inner>);

impl Default for Interner {
  fn default() -> Self {
    let mut inner = Inner::default();
    let null = inner.intern("");
    assert!(null == Symbol::NULL);
    Self(Mutex::new(inner))
  }
}

impl Interner {
  /// Intern a string, returning its stable symbol.
  pub fn intern(&self, s: &str) -> Symbol {
    self.0.lock().expect("interner poisoned").intern(s)
  }

  /// Resolve a symbol to its string.
  #[must_use] pub fn get(&self, sym: Symbol) -> &'static str {
    self.0.lock().expect("interner poisoned").strs[sym.0 as usize]
  }

  /// The length-prefixed record for `sym`, as the backends lay it out.
  #[must_use] pub fn literal_bytes(&self, sym: Symbol) -> Vec<u8> {
    let inner = self.0.lock().expect("interner poisoned");
    let off = inner.offsets[sym.0 as usize] as usize;
    let len = LE::read_u32(&inner.buf[off..off + 4]) as usize;
    inner.buf[off..off + 4 + len].to_vec()
  }

  /// The number of interned symbols.
  #[must_use] pub fn len(&self) -> usize {
    self.0.lock().expect("interner poisoned").strs.len()
  }
  /// Whether only the null symbol is present.
  #[must_use] pub fn is_empty(&self) -> bool { self.len() <= 1 }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn dedups() {
    let i = Interner::default();
    let a = i.intern("fib");
    let b = i.intern("fib");
    let c = i.intern("main");
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(i.get(a), "fib");
    assert_eq!(i.get(c), "main");
  }

  #[test]
  fn null_is_empty() {
    let i = Interner::default();
    assert_eq!(i.intern(""), Symbol::NULL);
    assert_eq!(i.get(Symbol::NULL), "");
  }

  #[test]
  fn literal_records_are_length_prefixed() {
    let i = Interner::default();
    let s = i.intern("ab\0c");
    let bytes = i.literal_bytes(s);
    assert_eq!(&bytes[..4], &[4, 0, 0, 0]);
    assert_eq!(&bytes[4..], b"ab\0c");
  }
}
