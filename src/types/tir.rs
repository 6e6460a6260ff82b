//! The typed instruction IR, produced per function by the body phase of
//! type analysis. Each instruction is a tag, a back-reference to the syntax
//! node it came from (for diagnostics), and two payload words; argument
//! lists and block statement lists live in the extras buffer.
//!
//! Value-producing instructions are reached through [`ValKind::Temp`]
//! operands rather than block lists; block lists hold statements only, so
//! conditions and switch arms are re-evaluated wherever control re-enters
//! them.
//!
//! [`ValKind::Temp`]: crate::types::value::ValKind::Temp

use crate::types::value::ValId;
use crate::types::{Idx, InstId, NodeId};

/// The typed instruction tags. `val(a)` means payload word `a` is a
/// [`ValId`]; `extra[b]` an index into [`Tir::extra`]; `blk` a statement
/// list (`[n, inst ids...]`, 0 for the reserved empty list).
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum InstKind {
  // Arithmetic and comparison: val(a) op val(b).
  Add, Sub, Mul, Div, Rem,
  BitAnd, BitOr, BitXor, Shl, Shr,
  Eq, Ne, Lt, Le, Gt, Ge,
  // Unary: val(a).
  Neg, Not,

  /// Call: val(a) callee, `extra[b]` = `[nargs, args..., ntyargs, tyargs...]`
  /// where tyargs are type ids.
  Call,
  /// Struct construction: `extra[a]` = `[n, field values...]`.
  CtorStruct,
  /// Field extraction or projection: val(a), field index `b`.
  Field,
  /// Slice length extraction: val(a).
  SliceLen,
  /// Slice data-pointer extraction: val(a).
  SliceData,
  /// Pointer-to-array decaying to a slice: val(a).
  ArrayToSlice,
  /// Representation-preserving conversion (mutability drop, tag drop):
  /// val(a).
  IdCast,
  /// Pointer-to-pointer conversion: val(a).
  PtrCast,
  /// Explicit `as` cast: val(a), source type id `b`.
  Cast,
  /// Integer widening with high bits cleared: val(a).
  ZeroExt,
  /// Array indexing through a place: val(a) array, val(b) index.
  Index,
  /// Slice indexing: val(a) slice, val(b) index.
  SliceIndex,
  /// Pointer dereference: val(a).
  Deref,
  /// Address of an immutable place: val(a).
  Addr,
  /// Address of a mutable place: val(a).
  AddrMut,
  /// Address of a temporary; lowering allocates hidden storage: val(a).
  AddrTemp,
  /// Slice from parts: val(a) length, val(b) data pointer.
  NewSlice,
  /// Array literal: `extra[a]` = `[n, element values...]`.
  ArrayLit,

  /// Declare immutable local `a` initialized to val(b).
  Let,
  /// Declare mutable local `a` initialized to val(b).
  LetMut,
  /// Store val(b) into place val(a).
  Assign,
  /// Evaluate val(a) for effect.
  Eval,
  /// Return val(a).
  Ret,
  RetVoid,
  Break,
  Continue,
  /// val(a) condition; `extra[b]` = `[then blk, else blk]`.
  If,
  /// val(a) condition; `extra[b]` = `[body blk, next blk]`. `next` is the
  /// hoisted `for` step, run at the continue point.
  While,
  /// val(a) scrutinee (0 for a bool switch); `extra[b]` =
  /// `[n, (pattern value | 0 for else, arm value)...]`. The instruction's
  /// temp is the switch result.
  Switch,
}

/// One typed instruction.
#[derive(Copy, Clone, Debug)]
pub struct Inst {
  pub kind: InstKind,
  /// The originating syntax node.
  pub node: NodeId,
  pub a: u32,
  pub b: u32,
}

/// One function's typed instruction stream.
pub struct Tir {
  pub insts: Vec<Inst>,
  pub extra: Vec<u32>,
}

impl Default for Tir {
  fn default() -> Self {
    // extra[0] is the reserved empty statement list.
    Tir { insts: vec![], extra: vec![0] }
  }
}

impl Tir {
  pub fn push(&mut self, kind: InstKind, node: NodeId, a: u32, b: u32) -> InstId {
    let id = InstId(self.insts.len() as u32);
    self.insts.push(Inst { kind, node, a, b });
    id
  }

  /// Append a counted list, returning its extras index.
  pub fn push_list(&mut self, items: &[u32]) -> u32 {
    let at = self.extra.len() as u32;
    self.extra.push(items.len() as u32);
    self.extra.extend_from_slice(items);
    at
  }

  /// Append raw words, returning the start index.
  pub fn push_extra(&mut self, words: &[u32]) -> u32 {
    let at = self.extra.len() as u32;
    self.extra.extend_from_slice(words);
    at
  }

  #[must_use] pub fn inst(&self, id: InstId) -> Inst { self.insts[id.into_usize()] }

  /// The counted list at `extra[at]`.
  #[must_use] pub fn list(&self, at: u32) -> &[u32] {
    let at = at as usize;
    let n = self.extra[at] as usize;
    &self.extra[at + 1..at + 1 + n]
  }

  /// Raw words starting at `extra[at]`.
  #[must_use] pub fn words(&self, at: u32, n: usize) -> &[u32] {
    &self.extra[at as usize..at as usize + n]
  }

  /// The call payload at `extra[at]`: `(args, type args)`.
  #[must_use] pub fn call_parts(&self, at: u32) -> (&[u32], &[u32]) {
    let at = at as usize;
    let nargs = self.extra[at] as usize;
    let args = &self.extra[at + 1..at + 1 + nargs];
    let ntys = self.extra[at + 1 + nargs] as usize;
    let tys = &self.extra[at + 2 + nargs..at + 2 + nargs + ntys];
    (args, tys)
  }

  /// The statement instruction ids of block `blk`, mapped to [`ValId`]-free
  /// instruction ids.
  #[must_use] pub fn block(&self, blk: u32) -> Vec<InstId> {
    self.list(blk).iter().map(|&i| InstId(i)).collect()
  }

  /// Switch arms at `extra[at]`: `(pattern value or 0, arm value)`.
  #[must_use] pub fn switch_arms(&self, at: u32) -> Vec<(ValId, ValId)> {
    let n = self.extra[at as usize] as usize;
    (0..n).map(|i| {
      let p = self.extra[at as usize + 1 + 2 * i];
      let v = self.extra[at as usize + 2 + 2 * i];
      (ValId(p), ValId(v))
    }).collect()
  }
}
