//! The low-level IR: a flat instruction list per function, split into basic
//! blocks, consumed by the backend emitters. Each instruction carries a tag,
//! a type, and two payload words whose meaning the tag fixes: two operands,
//! an operand plus an index, a single operand, the halves of a raw 64-bit
//! immediate, or a value reference. Call argument lists live in a
//! per-function extras buffer.

use crate::types::ty::TyId;
use crate::types::{BlockId, Idx, LirId};

/// Sentinel for a branch target that has not been patched yet. Any survivor
/// after lowering is a bug.
pub const HOLE: u32 = u32::MAX;

/// The low-level instruction tags. `op(a)` means the payload word is a
/// [`LirId`]; branch targets are [`BlockId`]s.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum LirKind {
  // Two-operand arithmetic: op(a), op(b); `ty` is the operand type.
  Add, Sub, Mul, Div, Rem,
  And, Or, Xor, Shl, Shr,
  // Comparisons: op(a), op(b); `ty` is the operand type, the result is i1.
  Eq, Ne, Lt, Le, Gt, Ge,
  // Unary: op(a).
  Neg, Not,

  /// The `i`th incoming parameter; `a` = index.
  Param,
  /// A stack slot of `ty`; the result is its address.
  Alloc,
  /// Load `ty` through address op(a).
  Load,
  /// Store op(b) into address op(a); `ty` is the stored type.
  Store,
  /// Copy `size_of(ty)` bytes from address op(b) to address op(a).
  Memcpy,
  /// Address of element: base address op(a), index value op(b); `ty` is
  /// the element type.
  IndexAddr,
  /// Address of field `b` of the aggregate at address op(a); `ty` is the
  /// field type.
  FieldAddr,
  /// Machine cast of op(a); `b` holds the source type id so the emitter
  /// can pick the conversion, `ty` is the target.
  Cast,
  /// Integer widening of op(a) with the high bits cleared regardless of
  /// the source signedness; `b` holds the source type id.
  Zext,
  /// A 64-bit immediate: `a`,`b` are the low and high halves; `ty` gives
  /// the interpretation (integer, float bits, null pointer).
  Imm,
  /// A reference to a global value (function, extern, string constant):
  /// `a` is a [`ValId`](crate::types::value::ValId).
  Ref,
  /// Call op(a) with `extra[b]` = `[n, argument ops...]`; `ty` is the
  /// result type.
  Call,

  /// Unconditional branch to block `a`.
  Br,
  /// Branch to block `b` when op(a) is false; fall through otherwise.
  BrIfNot,
  /// Return op(a).
  Ret,
  RetVoid,
}

impl LirKind {
  /// Whether this instruction ends a basic block.
  #[must_use] pub fn is_terminator(self) -> bool {
    matches!(self, LirKind::Br | LirKind::BrIfNot | LirKind::Ret | LirKind::RetVoid)
  }
}

/// One low-level instruction.
#[derive(Copy, Clone, Debug)]
pub struct LirInst {
  pub kind: LirKind,
  pub ty: TyId,
  pub a: u32,
  pub b: u32,
}

impl LirInst {
  #[must_use] pub fn op_a(self) -> LirId { LirId(self.a) }
  #[must_use] pub fn op_b(self) -> LirId { LirId(self.b) }
  #[must_use] pub fn imm(self) -> u64 { u64::from(self.a) | u64::from(self.b) << 32 }
}

/// One function's lowered code.
#[derive(Default)]
pub struct Lir {
  pub insts: Vec<LirInst>,
  pub extra: Vec<u32>,
  /// Start index of each basic block; block `i` spans
  /// `blocks[i] .. blocks[i+1]` (or the end of `insts`).
  pub blocks: Vec<u32>,
}

impl Lir {
  pub fn push(&mut self, kind: LirKind, ty: TyId, a: u32, b: u32) -> LirId {
    let id = LirId(self.insts.len() as u32);
    self.insts.push(LirInst { kind, ty, a, b });
    id
  }

  /// Append a counted list, returning its extras index.
  pub fn push_list(&mut self, items: &[u32]) -> u32 {
    let at = self.extra.len() as u32;
    self.extra.push(items.len() as u32);
    self.extra.extend_from_slice(items);
    at
  }

  /// The counted list at `extra[at]`.
  #[must_use] pub fn list(&self, at: u32) -> &[u32] {
    let at = at as usize;
    let n = self.extra[at] as usize;
    &self.extra[at + 1..at + 1 + n]
  }

  #[must_use] pub fn inst(&self, id: LirId) -> LirInst { self.insts[id.into_usize()] }

  /// The instruction range of block `b`.
  #[must_use] pub fn block_range(&self, b: BlockId) -> std::ops::Range<usize> {
    let start = self.blocks[b.into_usize()] as usize;
    let end = self.blocks.get(b.into_usize() + 1).map_or(self.insts.len(), |&e| e as usize);
    start..end
  }

  /// Check basic-block well-formedness: every block ends with exactly one
  /// terminator, terminators appear only at block ends, and every branch
  /// target is a real block. Used by debug assertions and tests.
  pub fn check_blocks(&self) -> Result<(), String> {
    if self.blocks.first() != Some(&0) {
      return Err("function entry is not a block start".into())
    }
    for b in 0..self.blocks.len() {
      let range = self.block_range(BlockId(b as u32));
      if range.is_empty() { return Err(format!("block {b} is empty")) }
      for i in range.clone() {
        let inst = self.insts[i];
        let last = i + 1 == range.end;
        if inst.kind.is_terminator() != last {
          return Err(format!("terminator misplaced at {i} in block {b}"))
        }
        if last {
          let tgt = match inst.kind {
            LirKind::Br => Some(inst.a),
            LirKind::BrIfNot => Some(inst.b),
            _ => None,
          };
          if let Some(tgt) = tgt {
            if tgt == HOLE { return Err(format!("unpatched branch at {i}")) }
            if tgt as usize >= self.blocks.len() {
              return Err(format!("branch to missing block {tgt} at {i}"))
            }
          }
        }
      }
    }
    Ok(())
  }
}
