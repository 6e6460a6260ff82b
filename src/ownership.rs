//! The substructural checker: a flow-sensitive interpretation of each
//! function's typed IR over a per-variable state vector, enforcing the
//! consume-once discipline of affine types and the borrow rules.
//!
//! Each value reference is visited with the access its context wants: an
//! `RValue` consumes, an `LValue` reads, an `LValueMut` writes, and a
//! `Statement` touches nothing. Non-affine types bypass the consume check
//! entirely; borrow states are tracked for every variable. Branches are
//! evaluated from a snapshot of the entry state and merged by marking any
//! variable that diverged as consumed. A loop records the set of variables
//! live at its header; consuming one of those inside the loop body is the
//! repeated-consume error even on the first pass.

use crate::diag::{self, DiagSink};
use crate::infer::{FnBody, GlobalEnv};
use crate::symbol::Interner;
use crate::types::tir::{Inst, InstKind};
use crate::types::ty::TyRead;
use crate::types::value::{ValId, ValKind};
use crate::types::{FileId, Idx, LocalId, NodeId};
use crate::ParsedFile;

/// The per-variable state.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum OwnState {
  NotConsumed,
  Consumed,
  Borrowed,
  BorrowedMut,
}

/// What a value reference's context wants from it.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum Access {
  RValue,
  LValue,
  LValueMut,
  Statement,
  /// Internal: the operand of `&`.
  Borrow,
  /// Internal: the operand of a mutable `&`.
  BorrowMut,
}

struct Checker<'a> {
  env: &'a GlobalEnv,
  body: &'a FnBody,
  file: FileId,
  ast: &'a crate::types::ast::Ast,
  interner: &'a Interner,
  diags: &'a DiagSink,
  states: Vec<OwnState>,
  /// Number of locals currently in scope.
  live: usize,
  /// Locals in scope at the nearest enclosing loop header.
  loop_top: usize,
}

impl Checker<'_> {
  fn error(&self, node: NodeId, code: diag::ECode, msg: impl Into<String>) {
    self.diags.error(self.file, self.ast.span(node), code, msg);
  }

  fn val(&self, v: ValId) -> &crate::types::value::Val {
    if v.0 < self.body.vals_base {
      self.env.values.get(v)
    } else {
      &self.body.vals[(v.0 - self.body.vals_base) as usize]
    }
  }

  fn local_name(&self, l: LocalId) -> &str {
    self.interner.get(self.body.locals[l.into_usize()].name)
  }

  fn transition(&mut self, node: NodeId, l: LocalId, access: Access) {
    let idx = l.into_usize();
    if idx >= self.live {
      // A reference ahead of its declaration only happens behind earlier
      // errors; nothing to track.
      return
    }
    let affine = self.env.types.is_affine(self.body.locals[idx].ty);
    let state = self.states[idx];
    let name = || format!("`{}`", self.local_name(l));
    match access {
      Access::Statement => {}
      Access::RValue => {
        if !affine { return }
        match state {
          OwnState::NotConsumed => {
            if idx < self.loop_top {
              self.error(node, diag::CONSUMED_IN_LOOP,
                format!("{} is consumed in a loop", name()));
            }
            self.states[idx] = OwnState::Consumed;
          }
          OwnState::Consumed =>
            self.error(node, diag::USE_OF_CONSUMED,
              format!("use of consumed value {}", name())),
          OwnState::Borrowed =>
            self.error(node, diag::MOVE_BORROWED,
              format!("cannot move {} while it is borrowed", name())),
          OwnState::BorrowedMut =>
            self.error(node, diag::BORROW_CONFLICT,
              format!("cannot move {} while it is mutably borrowed", name())),
        }
      }
      Access::LValue => match state {
        OwnState::Consumed =>
          self.error(node, diag::USE_OF_CONSUMED,
            format!("use of consumed value {}", name())),
        OwnState::BorrowedMut =>
          self.error(node, diag::BORROW_CONFLICT,
            format!("cannot read {} while it is mutably borrowed", name())),
        _ => {}
      },
      Access::LValueMut => match state {
        OwnState::Consumed =>
          self.error(node, diag::USE_OF_CONSUMED,
            format!("use of consumed value {}", name())),
        OwnState::Borrowed =>
          self.error(node, diag::BORROW_CONFLICT,
            format!("cannot write {} while it is borrowed", name())),
        OwnState::BorrowedMut =>
          self.error(node, diag::BORROW_CONFLICT,
            format!("cannot write {} while it is mutably borrowed", name())),
        _ => {}
      },
      Access::Borrow => match state {
        OwnState::Consumed =>
          self.error(node, diag::USE_OF_CONSUMED,
            format!("use of consumed value {}", name())),
        OwnState::BorrowedMut =>
          self.error(node, diag::BORROW_CONFLICT,
            format!("cannot borrow {} while it is mutably borrowed", name())),
        _ => self.states[idx] = OwnState::Borrowed,
      },
      Access::BorrowMut => match state {
        OwnState::Consumed =>
          self.error(node, diag::USE_OF_CONSUMED,
            format!("use of consumed value {}", name())),
        OwnState::Borrowed =>
          self.error(node, diag::BORROW_CONFLICT,
            format!("cannot mutably borrow {} while it is borrowed", name())),
        OwnState::BorrowedMut =>
          self.error(node, diag::MULTIPLE_MUTABLE,
            format!("{} is already mutably borrowed", name())),
        OwnState::NotConsumed => self.states[idx] = OwnState::BorrowedMut,
      },
    }
  }

  fn walk_val(&mut self, node: NodeId, v: ValId, access: Access) {
    if v == ValId::ERROR { return }
    match self.val(v).kind {
      ValKind::Var(l) | ValKind::VarMut(l) => self.transition(node, l, access),
      ValKind::Temp(inst) => self.walk_temp(inst, access),
      _ => {}
    }
  }

  fn walk_temp(&mut self, inst: crate::types::InstId, access: Access) {
    let Inst { kind, node, a, b } = self.body.tir.inst(inst);
    use InstKind as I;
    match kind {
      I::Add | I::Sub | I::Mul | I::Div | I::Rem | I::BitAnd | I::BitOr | I::BitXor
      | I::Shl | I::Shr | I::Eq | I::Ne | I::Lt | I::Le | I::Gt | I::Ge => {
        self.walk_val(node, ValId(a), Access::RValue);
        self.walk_val(node, ValId(b), Access::RValue);
      }
      I::Neg | I::Not | I::IdCast | I::PtrCast | I::Cast | I::ZeroExt | I::ArrayToSlice
      | I::AddrTemp => self.walk_val(node, ValId(a), Access::RValue),
      I::SliceLen | I::SliceData => self.walk_val(node, ValId(a), Access::LValue),
      I::Deref => self.walk_val(node, ValId(a), Access::LValue),
      I::Addr => self.walk_val(node, ValId(a), Access::Borrow),
      I::AddrMut => self.walk_val(node, ValId(a), Access::BorrowMut),
      // Projections inherit the surrounding access.
      I::Field => self.walk_val(node, ValId(a), access),
      I::Index => {
        self.walk_val(node, ValId(a), access);
        self.walk_val(node, ValId(b), Access::RValue);
      }
      I::SliceIndex => {
        self.walk_val(node, ValId(a), Access::LValue);
        self.walk_val(node, ValId(b), Access::RValue);
      }
      I::Call => {
        self.walk_val(node, ValId(a), Access::RValue);
        let (args, _) = self.body.tir.call_parts(b);
        for &arg in args.to_vec().iter() {
          self.walk_val(node, ValId(arg), Access::RValue);
        }
      }
      I::CtorStruct | I::ArrayLit => {
        for &e in self.body.tir.list(a).to_vec().iter() {
          self.walk_val(node, ValId(e), Access::RValue);
        }
      }
      I::NewSlice => {
        self.walk_val(node, ValId(a), Access::RValue);
        self.walk_val(node, ValId(b), Access::RValue);
      }
      I::Switch => {
        if a != 0 { self.walk_val(node, ValId(a), Access::RValue) }
        let arms = self.body.tir.switch_arms(b);
        let entry = self.states.clone();
        let mut ends = vec![];
        let mut has_else = false;
        for (pat, val) in arms {
          self.states.clone_from(&entry);
          if pat != ValId(0) { self.walk_val(node, pat, Access::RValue) }
          has_else |= pat == ValId(0);
          self.walk_val(node, val, Access::RValue);
          ends.push(self.states.clone());
        }
        if !has_else { ends.push(entry.clone()) }
        self.states = merge(entry, ends);
      }
      I::Let | I::LetMut | I::Assign | I::Eval | I::Ret | I::RetVoid | I::Break
      | I::Continue | I::If | I::While => panic!("statement {kind:?} used as a value"),
    }
  }

  /// Whether this statement unconditionally leaves the block.
  fn walk_stmt(&mut self, inst: crate::types::InstId) {
    let Inst { kind, node, a, b } = self.body.tir.inst(inst);
    use InstKind as I;
    match kind {
      I::Let | I::LetMut => {
        self.walk_val(node, ValId(b), Access::RValue);
        // Local ids are assigned in analysis order, so the live bound only
        // ever grows along a path.
        self.live = self.live.max(a as usize + 1);
        self.states[a as usize] = OwnState::NotConsumed;
      }
      I::Assign => {
        let place_ty = self.val(ValId(a)).ty;
        if self.env.types.is_affine(place_ty) {
          self.error(node, diag::ASSIGN_TO_LINEAR, "cannot assign to linear type");
        }
        self.walk_val(node, ValId(b), Access::RValue);
        self.walk_val(node, ValId(a), Access::LValueMut);
      }
      I::Eval => self.walk_val(node, ValId(a), Access::Statement),
      I::Ret => self.walk_val(node, ValId(a), Access::RValue),
      I::RetVoid | I::Break | I::Continue => {}
      I::If => {
        self.walk_val(node, ValId(a), Access::RValue);
        let &[then_blk, else_blk] = self.body.tir.words(b, 2) else { unreachable!() };
        let entry = self.states.clone();
        self.walk_block(then_blk);
        let then_end = self.states.clone();
        self.states.clone_from(&entry);
        if else_blk != 0 { self.walk_block(else_blk) }
        let else_end = std::mem::replace(&mut self.states, vec![]);
        self.states = merge(entry, vec![then_end, else_end]);
      }
      I::While => {
        let &[body_blk, next_blk] = self.body.tir.words(b, 2) else { unreachable!() };
        let entry = self.states.clone();
        let saved_top = self.loop_top;
        self.loop_top = self.live;
        self.walk_val(node, ValId(a), Access::RValue);
        self.walk_block(body_blk);
        self.walk_block(next_blk);
        self.loop_top = saved_top;
        let end = std::mem::replace(&mut self.states, vec![]);
        // The loop may run zero times; borrow state does not leak out.
        self.states = entry.iter().zip(end.iter()).map(|(&e, &x)| {
          if e == x { e }
          else if matches!(x, OwnState::Borrowed | OwnState::BorrowedMut) { e }
          else { OwnState::Consumed }
        }).collect();
      }
      _ => panic!("value instruction {kind:?} in a statement list"),
    }
  }

  fn walk_block(&mut self, blk: u32) {
    for inst in self.body.tir.block(blk) {
      self.walk_stmt(inst);
    }
  }
}

/// Merge arm end-states: a variable that ended in different states across
/// arms is consumed.
fn merge(entry: Vec<OwnState>, ends: Vec<Vec<OwnState>>) -> Vec<OwnState> {
  let mut out = entry;
  for (i, slot) in out.iter_mut().enumerate() {
    let mut val = None;
    let mut diverged = false;
    for end in &ends {
      match val {
        None => val = Some(end[i]),
        Some(v) if v != end[i] => diverged = true,
        _ => {}
      }
    }
    *slot = if diverged { OwnState::Consumed } else { val.unwrap_or(*slot) };
  }
  out
}

/// Check one function. Diagnostics are emitted on the way; the return value
/// reports whether the function passed.
pub fn check(
  env: &GlobalEnv,
  files: &[ParsedFile],
  body: &FnBody,
  interner: &Interner,
  diags: &DiagSink,
) -> bool {
  let before = diags.count();
  let mut ck = Checker {
    env,
    body,
    file: body.file,
    ast: &files[body.file.into_usize()].ast,
    interner,
    diags,
    states: vec![OwnState::NotConsumed; body.locals.len()],
    live: body.params as usize,
    loop_top: 0,
  };
  ck.walk_block(body.root_blk);
  diags.count() == before
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::diag;
  use crate::lexer::lex;
  use crate::parser::parse;
  use crate::types::FileId;

  fn check_sources(sources: &[&str]) -> Vec<diag::Diag> {
    let interner = crate::symbol::Interner::default();
    let diags = DiagSink::default();
    let files: Vec<ParsedFile> = sources.iter().enumerate().map(|(i, text)| {
      let toks = lex(text, FileId(i as u32), &interner, &diags);
      let (ast, root) = parse(&toks, FileId(i as u32), &diags);
      ParsedFile { ast, root }
    }).collect();
    let resolved = crate::roles::run(&files, &interner, &diags);
    let mut env = crate::infer::declare(&files, &resolved, &interner, &diags);
    let bodies = crate::infer::analyze_bodies(&mut env, &files, &resolved, &interner, &diags);
    assert!(!diags.has_errors(), "sources must typecheck before the ownership pass");
    for body in &bodies {
      check(&env, &files, body, &interner, &diags);
    }
    diags.into_sorted()
  }

  fn codes(diags: &[diag::Diag]) -> Vec<diag::ECode> {
    diags.iter().map(|d| d.code).collect()
  }

  const PRELUDE: &str =
    "module m newtype File = i32 \
     function g(f `Affine[File]) { } ";

  #[test]
  fn double_consume_is_reported_once() {
    let diags = check_sources(&[&format!(
      "{PRELUDE} function main() {{ mut f = `Affine[File](File(3)); g(f); g(f) }}")]);
    let uses: Vec<_> = diags.iter().filter(|d| d.code == diag::USE_OF_CONSUMED).collect();
    assert_eq!(uses.len(), 1, "{diags:#?}");
    assert!(uses[0].msg.contains("use of consumed value"), "{diags:#?}");
  }

  #[test]
  fn single_consume_passes() {
    let diags = check_sources(&[&format!(
      "{PRELUDE} function main() {{ mut f = `Affine[File](File(3)); g(f) }}")]);
    assert!(diags.is_empty(), "{diags:#?}");
  }

  #[test]
  fn non_affine_values_bypass() {
    let diags = check_sources(&[
      "module m function h(x i64) { } function main() { let x = 3; h(x); h(x) }",
    ]);
    assert!(diags.is_empty(), "{diags:#?}");
  }

  #[test]
  fn consume_in_loop() {
    let diags = check_sources(&[&format!(
      "{PRELUDE} function main() {{ \
         mut f = `Affine[File](File(3)) \
         while true {{ g(f) }} }}")]);
    assert!(codes(&diags).contains(&diag::CONSUMED_IN_LOOP), "{diags:#?}");
  }

  #[test]
  fn consume_of_loop_local_passes() {
    let diags = check_sources(&[&format!(
      "{PRELUDE} function main() {{ \
         while true {{ mut f = `Affine[File](File(3)); g(f) }} }}")]);
    assert!(diags.is_empty(), "{diags:#?}");
  }

  #[test]
  fn branch_merge_marks_divergent_consumed() {
    let diags = check_sources(&[&format!(
      "{PRELUDE} function main() {{ \
         mut f = `Affine[File](File(3)) \
         if true {{ g(f) }} \
         g(f) }}")]);
    assert!(codes(&diags).contains(&diag::USE_OF_CONSUMED), "{diags:#?}");
  }

  #[test]
  fn consume_in_both_branches_then_use() {
    let diags = check_sources(&[&format!(
      "{PRELUDE} function main() {{ \
         mut f = `Affine[File](File(3)) \
         if true {{ g(f) }} else {{ g(f) }} \
         g(f) }}")]);
    // Both arms consumed: merged state is consumed, third use reports.
    let uses: Vec<_> = diags.iter().filter(|d| d.code == diag::USE_OF_CONSUMED).collect();
    assert_eq!(uses.len(), 1, "{diags:#?}");
  }

  #[test]
  fn assign_to_linear_is_forbidden() {
    let diags = check_sources(&[&format!(
      "{PRELUDE} function main() {{ \
         mut f = `Affine[File](File(3)) \
         f = `Affine[File](File(4)) \
         g(f) }}")]);
    assert!(codes(&diags).contains(&diag::ASSIGN_TO_LINEAR), "{diags:#?}");
  }

  #[test]
  fn move_while_borrowed() {
    // An immutable binding borrows sharedly, so the move reports as a move
    // of a borrowed value.
    let diags = check_sources(&[&format!(
      "{PRELUDE} function main() {{ \
         let f = `Affine[File](File(3)) \
         let p = &f \
         g(f) }}")]);
    assert!(codes(&diags).contains(&diag::MOVE_BORROWED), "{diags:#?}");
  }

  #[test]
  fn multiple_mutable_borrows() {
    let diags = check_sources(&[
      "module m function main() { \
         mut x = 1 \
         let p = &x \
         let q = &x \
         let r = p; let s = q }",
    ]);
    // Two mutable borrows of a mutable place conflict.
    assert!(codes(&diags).contains(&diag::MULTIPLE_MUTABLE), "{diags:#?}");
  }
}
