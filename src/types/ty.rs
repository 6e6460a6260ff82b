//! The hash-consed type store.
//!
//! Primitive types occupy a fixed low-numbered prefix of the id space so
//! their ids are compile-time constants. Every composite kind is interned
//! through the cons table; nominal kinds (structs, enums, newtypes) carry a
//! unique declaration discriminator in their key, so interning preserves
//! identity semantics while keeping the invariant that structural equality
//! of keys coincides with id equality.
//!
//! The store exists in two layers: the global partition, mutated only during
//! the single-threaded declaration phase, and a per-function [`LocalTypes`]
//! overlay used by the parallel body phase. Local ids start at the frozen
//! global length; a local partition can reference global ids but never the
//! reverse. After a body finishes, [`Types::merge`] folds the local kinds
//! back into the global table by hash-cons lookup.

use bitflags::bitflags;
use hashbrown::HashMap;

use crate::symbol::{Interner, Symbol};
use crate::types::{Idx, ScopeId};

/// Pointer size of the (sole) supported target, in bytes.
pub const PTR_SIZE: u64 = 8;

crate::types::mk_idx! {
  /// A type. Id 0 is the error type; ids 1..[`TyId::FIRST_COMPOSITE`] are
  /// the primitives.
  TyId,
}

impl TyId {
  pub const ERROR: TyId = TyId(0);
  pub const VOID: TyId = TyId(1);
  pub const I8: TyId = TyId(2);
  pub const I16: TyId = TyId(3);
  pub const I32: TyId = TyId(4);
  pub const I64: TyId = TyId(5);
  pub const ISIZE: TyId = TyId(6);
  pub const F32: TyId = TyId(7);
  pub const F64: TyId = TyId(8);
  pub const CHAR: TyId = TyId(9);
  pub const BYTE: TyId = TyId(10);
  pub const BOOL: TyId = TyId(11);
  /// The first id handed out to a composite type.
  pub const FIRST_COMPOSITE: u32 = 12;
}

bitflags! {
  /// Structural properties, computed once at intern time and propagated
  /// bottom-up.
  #[derive(Copy, Clone, Default, PartialEq, Eq, Debug)]
  pub struct TyFlags: u8 {
    /// Contains an open type parameter somewhere; such types need
    /// substitution before layout questions have answers.
    const HAS_PARAM = 1;
    /// Contains an affine component by value (not behind a pointer).
    const HAS_LINEAR = 2;
  }
}

/// A type. Arrays, pointers, slices, functions, tagged types, and linear
/// wrappers are structural; primitives, structs, enums, newtypes, and type
/// parameters are nominal.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum TyKind {
  Error,
  Void, I8, I16, I32, I64, Isize, F32, F64, Char, Byte, Bool,
  /// `elem[index]`; `index` is an [`TyKind::ArrayLen`] or a type parameter.
  Array { index: TyId, elem: TyId },
  /// A literal array length, lifted into the type grammar.
  ArrayLen(i64),
  /// `*elem`.
  Ptr(TyId),
  /// `*mut elem`.
  PtrMut(TyId),
  /// `@elem`.
  Slice(TyId),
  /// `@mut elem`.
  SliceMut(TyId),
  Fn { tyargs: u32, params: Box<[TyId]>, ret: TyId },
  /// A struct declaration or one of its instantiations. `args` holds the
  /// type arguments; a generic declaration's `args` are its own parameter
  /// types, so the declaration is its identity instantiation.
  Struct {
    scope: ScopeId,
    name: Symbol,
    align: u32,
    size: u32,
    tyargs: u32,
    fields: Box<[TyId]>,
    linear: bool,
    args: Box<[TyId]>,
  },
  Enum { scope: ScopeId, name: Symbol, repr: TyId },
  /// A tag-type declaration. `decl` is a per-declaration discriminator so
  /// equal-looking newtypes from different declarations stay distinct.
  Newtype { decl: u32, name: Symbol, arity: u32, inner: TyId },
  /// A newtype applied to its tag arguments; layout-equal to `inner`.
  Tagged { newtype: TyId, inner: TyId, args: Box<[TyId]> },
  /// The affine wrapper.
  Linear(TyId),
  TyParam { index: u32, name: Symbol },
}

const PRIMITIVES: [TyKind; 12] = [
  TyKind::Error, TyKind::Void, TyKind::I8, TyKind::I16, TyKind::I32, TyKind::I64,
  TyKind::Isize, TyKind::F32, TyKind::F64, TyKind::Char, TyKind::Byte, TyKind::Bool,
];

/// Read access to a (possibly layered) type store, with the derived
/// queries every pass shares.
pub trait TyRead {
  fn kind(&self, t: TyId) -> &TyKind;
  fn flags(&self, t: TyId) -> TyFlags;

  /// Strip tag wrappers down to the representation type.
  fn strip_tags(&self, t: TyId) -> TyId {
    match *self.kind(t) {
      TyKind::Tagged { inner, .. } => self.strip_tags(inner),
      _ => t,
    }
  }

  fn is_integer(&self, t: TyId) -> bool {
    matches!(self.kind(t),
      TyKind::I8 | TyKind::I16 | TyKind::I32 | TyKind::I64 | TyKind::Isize
      | TyKind::Char | TyKind::Byte)
  }

  fn is_signed(&self, t: TyId) -> bool {
    matches!(self.kind(t),
      TyKind::I8 | TyKind::I16 | TyKind::I32 | TyKind::I64 | TyKind::Isize)
  }

  fn is_float(&self, t: TyId) -> bool {
    matches!(self.kind(t), TyKind::F32 | TyKind::F64)
  }

  /// Whether values of this type obey the consume-once discipline.
  fn is_affine(&self, t: TyId) -> bool {
    matches!(self.kind(t), TyKind::Linear(_)) || self.flags(t).contains(TyFlags::HAS_LINEAR)
  }

  /// The pointee, for either pointer mutability; `None` otherwise.
  fn pointee(&self, t: TyId) -> Option<(TyId, bool)> {
    match *self.kind(t) {
      TyKind::Ptr(elem) => Some((elem, false)),
      TyKind::PtrMut(elem) => Some((elem, true)),
      _ => None,
    }
  }

  /// The slice element, for either mutability; `None` otherwise.
  fn slice_elem(&self, t: TyId) -> Option<(TyId, bool)> {
    match *self.kind(t) {
      TyKind::Slice(elem) => Some((elem, false)),
      TyKind::SliceMut(elem) => Some((elem, true)),
      _ => None,
    }
  }

  /// Size in bytes, or `None` while the type is open.
  fn size_of(&self, t: TyId) -> Option<u64> {
    Some(match *self.kind(t) {
      TyKind::Error | TyKind::ArrayLen(_) | TyKind::TyParam { .. } => return None,
      TyKind::Void => 0,
      TyKind::I8 | TyKind::Char | TyKind::Byte | TyKind::Bool => 1,
      TyKind::I16 => 2,
      TyKind::I32 | TyKind::F32 => 4,
      TyKind::I64 | TyKind::F64 => 8,
      TyKind::Isize | TyKind::Ptr(_) | TyKind::PtrMut(_) | TyKind::Fn { .. } => PTR_SIZE,
      TyKind::Slice(_) | TyKind::SliceMut(_) => 2 * PTR_SIZE,
      TyKind::Array { index, elem } => match *self.kind(index) {
        TyKind::ArrayLen(n) => self.size_of(elem)?.checked_mul(n as u64)?,
        _ => return None,
      },
      TyKind::Struct { size, .. } => {
        if self.flags(t).contains(TyFlags::HAS_PARAM) { return None }
        u64::from(size)
      }
      TyKind::Enum { repr, .. } => self.size_of(repr)?,
      TyKind::Newtype { inner, .. } | TyKind::Tagged { inner, .. } | TyKind::Linear(inner) =>
        self.size_of(inner)?,
    })
  }

  /// Alignment in bytes: a power of two for sized types, `None` while open.
  fn align_of(&self, t: TyId) -> Option<u64> {
    Some(match *self.kind(t) {
      TyKind::Error | TyKind::ArrayLen(_) | TyKind::TyParam { .. } => return None,
      TyKind::Void | TyKind::I8 | TyKind::Char | TyKind::Byte | TyKind::Bool => 1,
      TyKind::I16 => 2,
      TyKind::I32 | TyKind::F32 => 4,
      TyKind::I64 | TyKind::F64 => 8,
      TyKind::Isize | TyKind::Ptr(_) | TyKind::PtrMut(_) | TyKind::Fn { .. }
      | TyKind::Slice(_) | TyKind::SliceMut(_) => PTR_SIZE,
      TyKind::Array { elem, .. } => self.align_of(elem)?,
      TyKind::Struct { align, .. } => {
        if self.flags(t).contains(TyFlags::HAS_PARAM) { return None }
        u64::from(align)
      }
      TyKind::Enum { repr, .. } => self.align_of(repr)?,
      TyKind::Newtype { inner, .. } | TyKind::Tagged { inner, .. } | TyKind::Linear(inner) =>
        self.align_of(inner)?,
    })
  }

  /// Byte offset of field `idx` under sequential natural alignment.
  fn field_offset(&self, fields: &[TyId], idx: usize) -> Option<u64> {
    let mut off = 0u64;
    for (i, &f) in fields.iter().enumerate() {
      let align = self.align_of(f)?;
      off = off.next_multiple_of(align);
      if i == idx { return Some(off) }
      off += self.size_of(f)?;
    }
    None
  }

  /// A human rendering for diagnostics.
  fn display(&self, t: TyId, interner: &Interner) -> String {
    match *self.kind(t) {
      TyKind::Error => "<error>".into(),
      TyKind::Void => "void".into(),
      TyKind::I8 => "i8".into(), TyKind::I16 => "i16".into(),
      TyKind::I32 => "i32".into(), TyKind::I64 => "i64".into(),
      TyKind::Isize => "isize".into(),
      TyKind::F32 => "f32".into(), TyKind::F64 => "f64".into(),
      TyKind::Char => "char".into(), TyKind::Byte => "byte".into(),
      TyKind::Bool => "bool".into(),
      TyKind::ArrayLen(n) => n.to_string(),
      TyKind::Array { index, elem } =>
        format!("{}[{}]", self.display(elem, interner), self.display(index, interner)),
      TyKind::Ptr(e) => format!("*{}", self.display(e, interner)),
      TyKind::PtrMut(e) => format!("*mut {}", self.display(e, interner)),
      TyKind::Slice(e) => format!("@{}", self.display(e, interner)),
      TyKind::SliceMut(e) => format!("@mut {}", self.display(e, interner)),
      TyKind::Fn { ref params, ret, .. } => {
        let params = params.iter().map(|&p| self.display(p, interner))
          .collect::<Vec<_>>().join(", ");
        if ret == TyId::VOID { format!("function({params})") }
        else { format!("function({params}) -> {}", self.display(ret, interner)) }
      }
      TyKind::Struct { name, ref args, tyargs, .. } => {
        if tyargs == 0 { interner.get(name).to_owned() }
        else {
          let args = args.iter().map(|&a| self.display(a, interner))
            .collect::<Vec<_>>().join(", ");
          format!("{}[{args}]", interner.get(name))
        }
      }
      TyKind::Enum { name, .. } | TyKind::Newtype { name, .. } => interner.get(name).to_owned(),
      TyKind::Tagged { newtype, ref args, .. } => {
        let name = match *self.kind(newtype) {
          TyKind::Newtype { name, .. } => name,
          _ => Symbol::NULL,
        };
        if args.is_empty() { interner.get(name).to_owned() }
        else {
          let args = args.iter().map(|&a| self.display(a, interner))
            .collect::<Vec<_>>().join(", ");
          format!("{}[{args}]", interner.get(name))
        }
      }
      TyKind::Linear(inner) => format!("`Affine[{}]", self.display(inner, interner)),
      TyKind::TyParam { name, .. } => interner.get(name).to_owned(),
    }
  }
}

/// Mutable access: [`Types`] for the global partition, [`LocalTypes`] for a
/// per-function overlay.
pub trait TyIntern: TyRead {
  fn intern(&mut self, kind: TyKind) -> TyId;
}

fn compute_flags<T: TyRead + ?Sized>(store: &T, kind: &TyKind) -> TyFlags {
  let mut flags = TyFlags::empty();
  match *kind {
    TyKind::TyParam { .. } => flags |= TyFlags::HAS_PARAM,
    TyKind::Linear(inner) => flags |= TyFlags::HAS_LINEAR | store.flags(inner),
    TyKind::Array { index, elem } => flags |= store.flags(index) | store.flags(elem),
    // Pointers and slices propagate openness but not affinity: a borrow of
    // a linear value is not itself linear.
    TyKind::Ptr(e) | TyKind::PtrMut(e) | TyKind::Slice(e) | TyKind::SliceMut(e) =>
      flags |= store.flags(e) & TyFlags::HAS_PARAM,
    TyKind::Fn { ref params, ret, .. } => {
      for &p in params.iter() { flags |= store.flags(p) & TyFlags::HAS_PARAM }
      flags |= store.flags(ret) & TyFlags::HAS_PARAM;
    }
    TyKind::Struct { ref fields, linear, ref args, .. } => {
      if linear { flags |= TyFlags::HAS_LINEAR }
      for &f in fields.iter() { flags |= store.flags(f) }
      for &a in args.iter() { flags |= store.flags(a) & TyFlags::HAS_PARAM }
    }
    TyKind::Tagged { inner, ref args, .. } => {
      flags |= store.flags(inner);
      for &a in args.iter() { flags |= store.flags(a) & TyFlags::HAS_PARAM }
    }
    TyKind::Newtype { inner, .. } => flags |= store.flags(inner),
    _ => {}
  }
  flags
}

/// The global type partition.
pub struct Types {
  kinds: Vec<TyKind>,
  flags: Vec<TyFlags>,
  cons: HashMap<TyKind, TyId>,
  next_newtype_decl: u32,
}

impl Default for Types {
  fn default() -> Self {
    let mut t = Types {
      kinds: vec![],
      flags: vec![],
      cons: HashMap::default(),
      next_newtype_decl: 0,
    };
    for (i, kind) in PRIMITIVES.iter().enumerate() {
      t.kinds.push(kind.clone());
      t.flags.push(TyFlags::empty());
      t.cons.insert(kind.clone(), TyId(i as u32));
    }
    t
  }
}

impl TyRead for Types {
  fn kind(&self, t: TyId) -> &TyKind { &self.kinds[t.into_usize()] }
  fn flags(&self, t: TyId) -> TyFlags { self.flags[t.into_usize()] }
}

impl TyIntern for Types {
  fn intern(&mut self, kind: TyKind) -> TyId {
    if let Some(&t) = self.cons.get(&kind) { return t }
    let flags = compute_flags(self, &kind);
    let id = TyId(self.kinds.len() as u32);
    self.cons.insert(kind.clone(), id);
    self.kinds.push(kind);
    self.flags.push(flags);
    id
  }
}

impl Types {
  /// The number of types; also the base id of any local overlay.
  #[must_use] pub fn len(&self) -> u32 { self.kinds.len() as u32 }
  #[must_use] pub fn is_empty(&self) -> bool { self.kinds.is_empty() }

  /// Iterate every interned type.
  pub fn iter(&self) -> impl Iterator<Item = (TyId, &TyKind)> {
    self.kinds.iter().enumerate().map(|(i, k)| (TyId(i as u32), k))
  }

  /// A fresh discriminator for a newtype declaration.
  pub fn fresh_newtype_decl(&mut self) -> u32 {
    let n = self.next_newtype_decl;
    self.next_newtype_decl += 1;
    n
  }

  /// Fold a finished local partition into the global one by hash-cons
  /// lookup, returning the remap table for the local ids.
  pub fn merge(&mut self, base: u32, local: Vec<TyKind>) -> Vec<TyId> {
    let mut remap = Vec::with_capacity(local.len());
    for kind in local {
      let kind = remap_kind(kind, &mut |t: TyId| {
        if t.0 < base { t } else { remap[(t.0 - base) as usize] }
      });
      remap.push(self.intern(kind));
    }
    remap
  }
}

fn remap_slice(ids: Box<[TyId]>, f: &mut impl FnMut(TyId) -> TyId) -> Box<[TyId]> {
  ids.iter().map(|&t| f(t)).collect()
}

/// Apply an id map to the direct components of a kind.
pub fn remap_kind(kind: TyKind, f: &mut impl FnMut(TyId) -> TyId) -> TyKind {
  match kind {
    TyKind::Array { index, elem } => TyKind::Array { index: f(index), elem: f(elem) },
    TyKind::Ptr(e) => TyKind::Ptr(f(e)),
    TyKind::PtrMut(e) => TyKind::PtrMut(f(e)),
    TyKind::Slice(e) => TyKind::Slice(f(e)),
    TyKind::SliceMut(e) => TyKind::SliceMut(f(e)),
    TyKind::Fn { tyargs, params, ret } =>
      TyKind::Fn { tyargs, params: remap_slice(params, f), ret: f(ret) },
    TyKind::Struct { scope, name, align, size, tyargs, fields, linear, args } => TyKind::Struct {
      scope, name, align, size, tyargs,
      fields: remap_slice(fields, f),
      linear,
      args: remap_slice(args, f),
    },
    TyKind::Enum { scope, name, repr } => TyKind::Enum { scope, name, repr: f(repr) },
    TyKind::Newtype { decl, name, arity, inner } =>
      TyKind::Newtype { decl, name, arity, inner: f(inner) },
    TyKind::Tagged { newtype, inner, args } =>
      TyKind::Tagged { newtype: f(newtype), inner: f(inner), args: remap_slice(args, f) },
    TyKind::Linear(inner) => TyKind::Linear(f(inner)),
    k => k,
  }
}

/// A per-function overlay on the frozen global partition.
pub struct LocalTypes<'a> {
  global: &'a Types,
  base: u32,
  kinds: Vec<TyKind>,
  flags: Vec<TyFlags>,
  cons: HashMap<TyKind, TyId>,
}

impl<'a> LocalTypes<'a> {
  #[must_use] pub fn new(global: &'a Types) -> Self {
    LocalTypes {
      global,
      base: global.len(),
      kinds: vec![],
      flags: vec![],
      cons: HashMap::default(),
    }
  }

  /// Tear down the overlay for merging.
  #[must_use] pub fn into_parts(self) -> (u32, Vec<TyKind>) { (self.base, self.kinds) }
}

impl TyRead for LocalTypes<'_> {
  fn kind(&self, t: TyId) -> &TyKind {
    if t.0 < self.base { self.global.kind(t) } else { &self.kinds[(t.0 - self.base) as usize] }
  }
  fn flags(&self, t: TyId) -> TyFlags {
    if t.0 < self.base { self.global.flags(t) } else { self.flags[(t.0 - self.base) as usize] }
  }
}

impl TyIntern for LocalTypes<'_> {
  fn intern(&mut self, kind: TyKind) -> TyId {
    if let Some(&t) = self.global.cons.get(&kind) { return t }
    if let Some(&t) = self.cons.get(&kind) { return t }
    let flags = compute_flags(self, &kind);
    let id = TyId(self.base + self.kinds.len() as u32);
    self.cons.insert(kind.clone(), id);
    self.kinds.push(kind);
    self.flags.push(flags);
    id
  }
}

/// Substitute type arguments for the open parameters of `t`. `args[i]`
/// replaces the parameter with index `i`. Struct layouts are recomputed once
/// the substitution closes them.
pub fn subst<T: TyIntern>(store: &mut T, t: TyId, args: &[TyId]) -> TyId {
  if !store.flags(t).contains(TyFlags::HAS_PARAM) { return t }
  let kind = match store.kind(t).clone() {
    TyKind::TyParam { index, .. } =>
      return args.get(index as usize).copied().unwrap_or(TyId::ERROR),
    kind => remap_kind(kind, &mut |inner| subst(store, inner, args)),
  };
  let kind = match kind {
    TyKind::Struct { scope, name, tyargs, fields, linear, args, .. } => {
      let (size, align) = struct_layout(store, &fields).unwrap_or((0, 1));
      TyKind::Struct {
        scope, name, tyargs, fields, linear, args,
        size: size as u32, align: align as u32,
      }
    }
    kind => kind,
  };
  store.intern(kind)
}

/// Sequential field layout: `(size, align)` with trailing padding to the
/// struct alignment, or `None` while a field is open.
pub fn struct_layout<T: TyRead + ?Sized>(store: &T, fields: &[TyId]) -> Option<(u64, u64)> {
  let mut size = 0u64;
  let mut align = 1u64;
  for &f in fields {
    let fa = store.align_of(f)?;
    align = align.max(fa);
    size = size.next_multiple_of(fa) + store.size_of(f)?;
  }
  Some((size.next_multiple_of(align), align))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn primitive_ids_are_stable() {
    let t = Types::default();
    assert!(matches!(t.kind(TyId::I64), TyKind::I64));
    assert!(matches!(t.kind(TyId::BOOL), TyKind::Bool));
    assert_eq!(t.len(), TyId::FIRST_COMPOSITE);
  }

  #[test]
  fn structural_kinds_are_interned() {
    let mut t = Types::default();
    let p1 = t.intern(TyKind::Ptr(TyId::I32));
    let p2 = t.intern(TyKind::Ptr(TyId::I32));
    assert_eq!(p1, p2);
    let s1 = t.intern(TyKind::Slice(TyId::I32));
    assert_ne!(p1, s1);
    let f1 = t.intern(TyKind::Fn { tyargs: 0, params: Box::new([TyId::I32]), ret: TyId::I32 });
    let f2 = t.intern(TyKind::Fn { tyargs: 0, params: Box::new([TyId::I32]), ret: TyId::I32 });
    assert_eq!(f1, f2);
  }

  #[test]
  fn local_overlay_references_global() {
    let mut g = Types::default();
    let ptr = g.intern(TyKind::Ptr(TyId::I64));
    let base = g.len();
    let mut local = LocalTypes::new(&g);
    // A global hit does not grow the overlay.
    assert_eq!(local.intern(TyKind::Ptr(TyId::I64)), ptr);
    let slice = local.intern(TyKind::Slice(TyId::I64));
    assert!(slice.0 >= base);
    let (base, kinds) = local.into_parts();
    let remap = g.merge(base, kinds);
    let merged = remap[(slice.0 - base) as usize];
    assert_eq!(g.intern(TyKind::Slice(TyId::I64)), merged);
  }

  #[test]
  fn merge_remaps_nested_local_references() {
    let mut g = Types::default();
    let base = g.len();
    let mut local = LocalTypes::new(&g);
    let inner = local.intern(TyKind::Ptr(TyId::BYTE));
    let outer = local.intern(TyKind::Slice(inner));
    let (b, kinds) = local.into_parts();
    let remap = g.merge(b, kinds);
    let outer2 = remap[(outer.0 - base) as usize];
    let expect_inner = g.intern(TyKind::Ptr(TyId::BYTE));
    assert_eq!(*g.kind(outer2), TyKind::Slice(expect_inner));
  }

  #[test]
  fn slice_is_two_pointers() {
    let mut t = Types::default();
    let s = t.intern(TyKind::SliceMut(TyId::I32));
    assert_eq!(t.size_of(s), Some(16));
    assert_eq!(t.align_of(s), Some(8));
  }

  #[test]
  fn struct_layout_pads_fields() {
    let t = Types::default();
    // { i8, i32, i8 } -> offsets 0, 4, 8; size 12, align 4.
    let fields = [TyId::I8, TyId::I32, TyId::I8];
    assert_eq!(struct_layout(&t, &fields), Some((12, 4)));
    assert_eq!(t.field_offset(&fields, 1), Some(4));
    assert_eq!(t.field_offset(&fields, 2), Some(8));
  }

  #[test]
  fn linear_is_layout_transparent() {
    let mut t = Types::default();
    let l = t.intern(TyKind::Linear(TyId::I32));
    assert_eq!(t.size_of(l), Some(4));
    assert_eq!(t.align_of(l), Some(4));
    assert!(t.is_affine(l));
    assert!(!t.is_affine(TyId::I32));
  }

  #[test]
  fn borrows_of_linear_are_not_linear() {
    let mut t = Types::default();
    let l = t.intern(TyKind::Linear(TyId::I32));
    let p = t.intern(TyKind::Ptr(l));
    assert!(!t.is_affine(p));
  }

  #[test]
  fn tagged_eq_both_sides() {
    let mut t = Types::default();
    let decl = t.fresh_newtype_decl();
    let file = t.intern(TyKind::Newtype {
      decl, name: Symbol(1), arity: 1, inner: TyId::I32,
    });
    let a = t.intern(TyKind::Tagged { newtype: file, inner: TyId::I32, args: Box::new([TyId::I8]) });
    let b = t.intern(TyKind::Tagged { newtype: file, inner: TyId::I32, args: Box::new([TyId::I8]) });
    let c = t.intern(TyKind::Tagged { newtype: file, inner: TyId::I32, args: Box::new([TyId::I16]) });
    // Equality is structural on both sides: same newtype and same args.
    assert_eq!(a, b);
    assert_ne!(a, c);
  }

  #[test]
  fn distinct_newtype_decls_stay_distinct() {
    let mut t = Types::default();
    let d1 = t.fresh_newtype_decl();
    let d2 = t.fresh_newtype_decl();
    let n1 = t.intern(TyKind::Newtype { decl: d1, name: Symbol(1), arity: 0, inner: TyId::I32 });
    let n2 = t.intern(TyKind::Newtype { decl: d2, name: Symbol(1), arity: 0, inner: TyId::I32 });
    assert_ne!(n1, n2);
  }

  #[test]
  fn subst_replaces_parameters() {
    let mut t = Types::default();
    let p = t.intern(TyKind::TyParam { index: 0, name: Symbol(1) });
    let ptr = t.intern(TyKind::Ptr(p));
    assert!(t.flags(ptr).contains(TyFlags::HAS_PARAM));
    assert_eq!(t.size_of(p), None);
    let got = subst(&mut t, ptr, &[TyId::I64]);
    assert_eq!(*t.kind(got), TyKind::Ptr(TyId::I64));
    assert_eq!(subst(&mut t, TyId::BOOL, &[TyId::I64]), TyId::BOOL);
  }
}
