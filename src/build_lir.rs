//! Lowering from the typed IR to the low-level IR.
//!
//! Each function's structured instruction stream flattens into basic blocks
//! with explicit conditional and unconditional branches. Locals become stack
//! slots, place contexts compute addresses, slice indexing becomes the
//! load-data-pointer-then-offset two-step, and forward branches are emitted
//! against holes that are patched once their target block exists.
//!
//! Monomorphization happens here: lowering starts from the non-generic
//! functions and instantiates a generic callee the first time a call site
//! demands a particular set of type arguments, so only reachable
//! specializations are emitted.

use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::infer::{Entity, FnBody, GlobalEnv};
use crate::symbol::{Interner, Symbol};
use crate::types::lir::{Lir, LirKind, HOLE};
use crate::types::tir::{Inst, InstKind};
use crate::types::ty::TyIntern;
use crate::types::ty::{subst, TyId, TyKind, TyRead, Types};
use crate::types::value::{Val, ValId, ValKind, Values};
use crate::types::{DefId, Idx, IdxVec, InstId, LirId, LocalId};

/// One lowered (and, for generics, specialized) function.
pub struct LoweredFn {
  pub def: DefId,
  pub name: Symbol,
  pub params: Vec<TyId>,
  pub ret: TyId,
  pub lir: Lir,
  pub is_main: bool,
}

/// The monomorphization state: pending jobs and the symbol assigned to each
/// `(definition, type arguments)` pair.
struct Mono {
  queue: Vec<(DefId, Vec<TyId>, Symbol)>,
  done: HashMap<(DefId, Vec<TyId>), ValId>,
}

fn mangle_ty(types: &Types, t: TyId, interner: &Interner) -> String {
  match *types.kind(t) {
    TyKind::Void => "void".into(),
    TyKind::I8 => "i8".into(), TyKind::I16 => "i16".into(),
    TyKind::I32 => "i32".into(), TyKind::I64 => "i64".into(),
    TyKind::Isize => "isize".into(),
    TyKind::F32 => "f32".into(), TyKind::F64 => "f64".into(),
    TyKind::Char => "char".into(), TyKind::Byte => "byte".into(),
    TyKind::Bool => "bool".into(),
    TyKind::Ptr(e) => format!("p_{}", mangle_ty(types, e, interner)),
    TyKind::PtrMut(e) => format!("pm_{}", mangle_ty(types, e, interner)),
    TyKind::Slice(e) => format!("s_{}", mangle_ty(types, e, interner)),
    TyKind::SliceMut(e) => format!("sm_{}", mangle_ty(types, e, interner)),
    TyKind::Struct { name, .. } | TyKind::Enum { name, .. } =>
      format!("{}_{}", interner.get(name), t.0),
    TyKind::Tagged { inner, .. } | TyKind::Linear(inner) => mangle_ty(types, inner, interner),
    _ => format!("t{}", t.0),
  }
}

struct Lower<'a> {
  types: &'a mut Types,
  values: &'a mut Values,
  entities: &'a IdxVec<DefId, Entity>,
  interner: &'a Interner,
  mono: &'a mut Mono,
  by_def: &'a HashMap<DefId, &'a FnBody>,
  body: &'a FnBody,
  args: &'a [TyId],
  lir: Lir,
  /// The address instruction for each local slot.
  var_slot: Vec<LirId>,
  /// Lowered value per typed instruction; keeps shared operands (compound
  /// assignment reads) single-emission.
  memo: HashMap<InstId, LirId>,
  /// A new block starts before the next instruction.
  pending_block: bool,
  break_pending: SmallVec<[Vec<LirId>; 2]>,
  continue_pending: SmallVec<[Vec<LirId>; 2]>,
}

impl Lower<'_> {
  fn val(&self, v: ValId) -> &Val {
    if v.0 < self.body.vals_base {
      self.values.get(v)
    } else {
      &self.body.vals[(v.0 - self.body.vals_base) as usize]
    }
  }

  /// Substitute this instantiation's type arguments.
  fn sub(&mut self, t: TyId) -> TyId {
    if self.args.is_empty() { t } else { subst(self.types, t, self.args) }
  }

  fn val_ty(&mut self, v: ValId) -> TyId {
    let t = self.val(v).ty;
    self.sub(t)
  }

  fn emit(&mut self, kind: LirKind, ty: TyId, a: u32, b: u32) -> LirId {
    if self.pending_block {
      self.lir.blocks.push(self.lir.insts.len() as u32);
      self.pending_block = false;
    }
    let id = self.lir.push(kind, ty, a, b);
    if kind.is_terminator() { self.pending_block = true }
    id
  }

  /// The id of the block that starts here. Callers only ask for a target
  /// right after a terminator, so the boundary is real.
  fn here(&mut self) -> u32 {
    if self.pending_block {
      self.lir.blocks.push(self.lir.insts.len() as u32);
      self.pending_block = false;
    }
    (self.lir.blocks.len() - 1) as u32
  }

  fn patch_br(&mut self, br: LirId, target: u32) {
    let inst = &mut self.lir.insts[br.into_usize()];
    match inst.kind {
      LirKind::Br => { debug_assert_eq!(inst.a, HOLE); inst.a = target }
      LirKind::BrIfNot => { debug_assert_eq!(inst.b, HOLE); inst.b = target }
      k => panic!("patching a non-branch {k:?}"),
    }
  }

  fn imm(&mut self, v: i64, ty: TyId) -> LirId {
    let v = v as u64;
    self.emit(LirKind::Imm, ty, v as u32, (v >> 32) as u32)
  }

  fn is_aggregate(&self, t: TyId) -> bool {
    matches!(self.types.kind(self.types.strip_tags(t)), TyKind::Array { .. })
  }

  /// Store or copy `value` into `slot`.
  fn store(&mut self, slot: LirId, value: LirId, ty: TyId) {
    if self.is_aggregate(ty) {
      self.emit(LirKind::Memcpy, ty, slot.0, value.0);
    } else {
      self.emit(LirKind::Store, ty, slot.0, value.0);
    }
  }

  /// Materialize a value into a fresh stack slot, returning the address.
  fn spill(&mut self, value: LirId, ty: TyId) -> LirId {
    let slot = self.emit(LirKind::Alloc, ty, 0, 0);
    self.store(slot, value, ty);
    slot
  }

  // Values.

  /// Lower a value reference to the value itself. Aggregates (arrays) are
  /// represented by their address.
  fn rvalue(&mut self, v: ValId) -> LirId {
    let ty = self.val_ty(v);
    match self.val(v).kind {
      ValKind::Error => panic!("error value survived to lowering"),
      ValKind::Int(n) => self.imm(n, ty),
      ValKind::Float(f) => {
        let bits = if ty == TyId::F32 {
          u64::from((f as f32).to_bits())
        } else { f.to_bits() };
        self.emit(LirKind::Imm, ty, bits as u32, (bits >> 32) as u32)
      }
      ValKind::Null => self.imm(0, ty),
      ValKind::Func { .. } | ValKind::ExternFunc(_) => self.emit(LirKind::Ref, ty, v.0, 0),
      ValKind::Str(sym) => {
        // A string constant is a byte slice over its table record.
        let len = self.interner.get(sym).len() as i64;
        let data_ty = self.types.intern(TyKind::Ptr(TyId::BYTE));
        let data = self.emit(LirKind::Ref, data_ty, v.0, 0);
        let slot = self.emit(LirKind::Alloc, ty, 0, 0);
        let len_addr = self.emit(LirKind::FieldAddr, TyId::ISIZE, slot.0, 0);
        let len_imm = self.imm(len, TyId::ISIZE);
        self.emit(LirKind::Store, TyId::ISIZE, len_addr.0, len_imm.0);
        let data_addr = self.emit(LirKind::FieldAddr, data_ty, slot.0, 1);
        self.emit(LirKind::Store, data_ty, data_addr.0, data.0);
        self.emit(LirKind::Load, ty, slot.0, 0)
      }
      ValKind::ExternVar(_) => {
        let addr = self.emit(LirKind::Ref, ty, v.0, 0);
        if self.is_aggregate(ty) { addr } else { self.emit(LirKind::Load, ty, addr.0, 0) }
      }
      ValKind::Var(l) | ValKind::VarMut(l) => {
        let slot = self.var_slot[l.into_usize()];
        if self.is_aggregate(ty) { slot } else { self.emit(LirKind::Load, ty, slot.0, 0) }
      }
      ValKind::Temp(inst) => {
        if let Some(&id) = self.memo.get(&inst) { return id }
        let id = self.lower_inst(inst);
        self.memo.insert(inst, id);
        id
      }
    }
  }

  /// Lower a value reference to an address.
  fn place(&mut self, v: ValId) -> LirId {
    let ty = self.val_ty(v);
    match self.val(v).kind {
      ValKind::Var(l) | ValKind::VarMut(l) => self.var_slot[l.into_usize()],
      ValKind::ExternVar(_) => self.emit(LirKind::Ref, ty, v.0, 0),
      ValKind::Temp(inst) => {
        let Inst { kind, a, b, .. } = self.body.tir.inst(inst);
        match kind {
          InstKind::Deref => self.rvalue(ValId(a)),
          InstKind::Field => {
            let base = self.place(ValId(a));
            self.emit(LirKind::FieldAddr, ty, base.0, b)
          }
          InstKind::Index => {
            let base = self.place(ValId(a));
            let idx = self.rvalue(ValId(b));
            self.emit(LirKind::IndexAddr, ty, base.0, idx.0)
          }
          InstKind::SliceIndex => self.slice_index_addr(ValId(a), ValId(b), ty),
          _ => {
            // Not an addressable computation: spill the value.
            let value = self.rvalue(v);
            self.spill(value, ty)
          }
        }
      }
      _ => {
        let value = self.rvalue(v);
        self.spill(value, ty)
      }
    }
  }

  /// The GEP-like two-step: load the data pointer, then offset it.
  fn slice_index_addr(&mut self, slice: ValId, index: ValId, elem: TyId) -> LirId {
    let sl = self.place(slice);
    let ptr_ty = self.types.intern(TyKind::Ptr(elem));
    let data_addr = self.emit(LirKind::FieldAddr, ptr_ty, sl.0, 1);
    let data = self.emit(LirKind::Load, ptr_ty, data_addr.0, 0);
    let idx = self.rvalue(index);
    self.emit(LirKind::IndexAddr, elem, data.0, idx.0)
  }

  fn lower_inst(&mut self, inst: InstId) -> LirId {
    let Inst { kind, a, b, .. } = self.body.tir.inst(inst);
    use InstKind as I;
    let temp_val = |this: &Lower<'_>| {
      // The value this instruction produced, for its result type.
      this.body.vals.iter().position(|v| v.kind == ValKind::Temp(inst))
        .map(|i| ValId(this.body.vals_base + i as u32))
        .expect("instruction without a temporary")
    };
    match kind {
      I::Add | I::Sub | I::Mul | I::Div | I::Rem | I::BitAnd | I::BitOr | I::BitXor
      | I::Shl | I::Shr => {
        let x = self.rvalue(ValId(a));
        let y = self.rvalue(ValId(b));
        let ty = self.val_ty(ValId(a));
        self.emit(arith_kind(kind), ty, x.0, y.0)
      }
      I::Eq | I::Ne | I::Lt | I::Le | I::Gt | I::Ge => {
        let x = self.rvalue(ValId(a));
        let y = self.rvalue(ValId(b));
        // Comparisons carry the operand type; the result is bool.
        let ty = self.val_ty(ValId(a));
        self.emit(compare_kind(kind), ty, x.0, y.0)
      }
      I::Neg => {
        let x = self.rvalue(ValId(a));
        let ty = self.val_ty(ValId(a));
        self.emit(LirKind::Neg, ty, x.0, 0)
      }
      I::Not => {
        let x = self.rvalue(ValId(a));
        self.emit(LirKind::Not, TyId::BOOL, x.0, 0)
      }
      I::Call => self.lower_call(inst, ValId(a), b),
      I::CtorStruct => {
        let v = temp_val(self);
        let ty = self.val_ty(v);
        let TyKind::Struct { ref fields, .. } = *self.types.kind(self.types.strip_tags(ty))
        else { panic!("constructor of a non-struct") };
        let fields = fields.clone();
        let elems: Vec<u32> = self.body.tir.list(a).to_vec();
        let slot = self.emit(LirKind::Alloc, ty, 0, 0);
        for (i, (&e, &fty)) in elems.iter().zip(fields.iter()).enumerate() {
          let fty = self.sub(fty);
          let value = self.rvalue(ValId(e));
          let addr = self.emit(LirKind::FieldAddr, fty, slot.0, i as u32);
          self.store(addr, value, fty);
        }
        self.emit(LirKind::Load, ty, slot.0, 0)
      }
      I::ArrayLit => {
        let v = temp_val(self);
        let ty = self.val_ty(v);
        let TyKind::Array { elem, .. } = *self.types.kind(ty) else {
          panic!("array literal without array type")
        };
        let elems: Vec<u32> = self.body.tir.list(a).to_vec();
        let slot = self.emit(LirKind::Alloc, ty, 0, 0);
        for (i, &e) in elems.iter().enumerate() {
          let value = self.rvalue(ValId(e));
          let idx = self.imm(i as i64, TyId::ISIZE);
          let addr = self.emit(LirKind::IndexAddr, elem, slot.0, idx.0);
          self.store(addr, value, elem);
        }
        // Arrays are address-valued.
        slot
      }
      I::Field => {
        let v = temp_val(self);
        let ty = self.val_ty(v);
        let base = self.place(ValId(a));
        let addr = self.emit(LirKind::FieldAddr, ty, base.0, b);
        if self.is_aggregate(ty) { addr } else { self.emit(LirKind::Load, ty, addr.0, 0) }
      }
      I::SliceLen => {
        let operand_ty = self.val_ty(ValId(a));
        // Arrays of generic length land here once substitution fixes them.
        if let TyKind::Array { index, .. } = *self.types.kind(self.types.strip_tags(operand_ty)) {
          let TyKind::ArrayLen(n) = *self.types.kind(index) else {
            panic!("array length survived substitution")
          };
          return self.imm(n, TyId::ISIZE)
        }
        let sl = self.place(ValId(a));
        let addr = self.emit(LirKind::FieldAddr, TyId::ISIZE, sl.0, 0);
        self.emit(LirKind::Load, TyId::ISIZE, addr.0, 0)
      }
      I::SliceData => {
        let v = temp_val(self);
        let ty = self.val_ty(v);
        let sl = self.place(ValId(a));
        let addr = self.emit(LirKind::FieldAddr, ty, sl.0, 1);
        self.emit(LirKind::Load, ty, addr.0, 0)
      }
      I::ArrayToSlice => {
        let v = temp_val(self);
        let ty = self.val_ty(v);
        let ptr = self.rvalue(ValId(a));
        let ptr_ty = self.val_ty(ValId(a));
        let (elem, _) = self.types.slice_elem(ty).expect("array decays to a slice");
        let arr = self.types.pointee(ptr_ty).expect("array pointer").0;
        let TyKind::Array { index, .. } = *self.types.kind(self.types.strip_tags(arr)) else {
          panic!("array-to-slice on a non-array pointer")
        };
        let TyKind::ArrayLen(n) = *self.types.kind(index) else {
          panic!("array length survived substitution")
        };
        let elem_ptr = self.types.intern(TyKind::Ptr(elem));
        let data = self.emit(LirKind::Cast, elem_ptr, ptr.0, ptr_ty.0);
        let slot = self.emit(LirKind::Alloc, ty, 0, 0);
        let len_addr = self.emit(LirKind::FieldAddr, TyId::ISIZE, slot.0, 0);
        let len = self.imm(n, TyId::ISIZE);
        self.emit(LirKind::Store, TyId::ISIZE, len_addr.0, len.0);
        let data_addr = self.emit(LirKind::FieldAddr, elem_ptr, slot.0, 1);
        self.emit(LirKind::Store, elem_ptr, data_addr.0, data.0);
        self.emit(LirKind::Load, ty, slot.0, 0)
      }
      I::IdCast => self.rvalue(ValId(a)),
      I::PtrCast | I::Cast => {
        let v = temp_val(self);
        let ty = self.val_ty(v);
        let x = self.rvalue(ValId(a));
        let src = if kind == I::Cast { self.sub(TyId(b)) } else { self.val_ty(ValId(a)) };
        self.emit(LirKind::Cast, ty, x.0, src.0)
      }
      I::ZeroExt => {
        let v = temp_val(self);
        let ty = self.val_ty(v);
        let src = self.val_ty(ValId(a));
        let x = self.rvalue(ValId(a));
        self.emit(LirKind::Zext, ty, x.0, src.0)
      }
      I::Index => {
        let v = temp_val(self);
        let ty = self.val_ty(v);
        let base = self.place(ValId(a));
        let idx = self.rvalue(ValId(b));
        let addr = self.emit(LirKind::IndexAddr, ty, base.0, idx.0);
        if self.is_aggregate(ty) { addr } else { self.emit(LirKind::Load, ty, addr.0, 0) }
      }
      I::SliceIndex => {
        let v = temp_val(self);
        let ty = self.val_ty(v);
        let addr = self.slice_index_addr(ValId(a), ValId(b), ty);
        if self.is_aggregate(ty) { addr } else { self.emit(LirKind::Load, ty, addr.0, 0) }
      }
      I::Deref => {
        let v = temp_val(self);
        let ty = self.val_ty(v);
        let ptr = self.rvalue(ValId(a));
        if self.is_aggregate(ty) { ptr } else { self.emit(LirKind::Load, ty, ptr.0, 0) }
      }
      I::Addr | I::AddrMut => self.place(ValId(a)),
      I::AddrTemp => {
        // ALLOC; ASSIGN; ADDRESS on a hidden slot.
        let ty = self.val_ty(ValId(a));
        let value = self.rvalue(ValId(a));
        self.spill(value, ty)
      }
      I::NewSlice => {
        let v = temp_val(self);
        let ty = self.val_ty(v);
        let len = self.rvalue(ValId(a));
        let ptr = self.rvalue(ValId(b));
        let ptr_ty = self.val_ty(ValId(b));
        let slot = self.emit(LirKind::Alloc, ty, 0, 0);
        let len_addr = self.emit(LirKind::FieldAddr, TyId::ISIZE, slot.0, 0);
        self.emit(LirKind::Store, TyId::ISIZE, len_addr.0, len.0);
        let data_addr = self.emit(LirKind::FieldAddr, ptr_ty, slot.0, 1);
        self.emit(LirKind::Store, ptr_ty, data_addr.0, ptr.0);
        self.emit(LirKind::Load, ty, slot.0, 0)
      }
      I::Switch => self.lower_switch(inst, ValId(a), b),
      I::Let | I::LetMut | I::Assign | I::Eval | I::Ret | I::RetVoid | I::Break
      | I::Continue | I::If | I::While => panic!("statement {kind:?} used as a value"),
    }
  }

  fn lower_call(&mut self, inst: InstId, callee: ValId, extra: u32) -> LirId {
    let (args, tyargs) = {
      let (a, t) = self.body.tir.call_parts(extra);
      (a.to_vec(), t.to_vec())
    };
    let ret = {
      let v = self.body.vals.iter().position(|v| v.kind == ValKind::Temp(inst))
        .map(|i| ValId(self.body.vals_base + i as u32))
        .expect("call without a temporary");
      self.val_ty(v)
    };
    let f = if tyargs.is_empty() {
      self.rvalue(callee)
    } else {
      // Specialize the callee under this instantiation's own arguments.
      let concrete: Vec<TyId> = tyargs.iter().map(|&t| self.sub(TyId(t))).collect();
      let ValKind::Func { def, .. } = self.val(callee).kind else {
        panic!("generic call to a non-function value")
      };
      let spec = self.instantiate(def, concrete);
      let fty = self.values.get(spec).ty;
      self.emit(LirKind::Ref, fty, spec.0, 0)
    };
    let mut ops = Vec::with_capacity(args.len());
    for &arg in &args {
      ops.push(self.rvalue(ValId(arg)).0);
    }
    let at = self.lir.push_list(&ops);
    self.emit(LirKind::Call, ret, f.0, at)
  }

  fn instantiate(&mut self, def: DefId, args: Vec<TyId>) -> ValId {
    if let Some(&v) = self.mono.done.get(&(def, args.clone())) { return v }
    let base = self.by_def.get(&def).expect("generic function without a body");
    let mut name = self.interner.get(base.name).to_owned();
    for &a in &args {
      name.push_str("__");
      name.push_str(&mangle_ty(self.types, a, self.interner));
    }
    let name = self.interner.intern(&name);
    // Build the specialized function type for the emitters.
    let Entity::Func { ty: base_ty, .. } = self.entities[def] else {
      panic!("generic call to a non-function definition")
    };
    let TyKind::Fn { ref params, ret, .. } = *self.types.kind(base_ty) else {
      panic!("function without function type")
    };
    let (params, ret) = (params.clone(), ret);
    let params: Vec<TyId> = params.iter().map(|&p| subst(self.types, p, &args)).collect();
    let ret = subst(self.types, ret, &args);
    let fnty = self.types.intern(TyKind::Fn { tyargs: 0, params: params.into(), ret });
    let val = self.values.push(ValKind::Func { name, def }, fnty);
    self.mono.done.insert((def, args.clone()), val);
    self.mono.queue.push((def, args, name));
    val
  }

  fn lower_switch(&mut self, inst: InstId, scrut: ValId, extra: u32) -> LirId {
    let arms = self.body.tir.switch_arms(extra);
    let ret = {
      let v = self.body.vals.iter().position(|v| v.kind == ValKind::Temp(inst))
        .map(|i| ValId(self.body.vals_base + i as u32))
        .expect("switch without a temporary");
      self.val_ty(v)
    };
    let result = self.emit(LirKind::Alloc, ret, 0, 0);
    let scrut_lir = (scrut != ValId(0)).then(|| {
      let ty = self.val_ty(scrut);
      (self.rvalue(scrut), ty)
    });

    // The default arm is placed last.
    let mut ordered: Vec<(ValId, ValId)> =
      arms.iter().copied().filter(|&(p, _)| p != ValId(0)).collect();
    ordered.extend(arms.iter().copied().filter(|&(p, _)| p == ValId(0)));

    let mut end_brs: Vec<LirId> = vec![];
    for (i, &(pat, value)) in ordered.iter().enumerate() {
      let last = i + 1 == ordered.len();
      let skip = if pat != ValId(0) {
        let cond = match scrut_lir {
          Some((s, sty)) => {
            let p = self.rvalue(pat);
            self.emit(LirKind::Eq, sty, s.0, p.0)
          }
          // The bool switch uses the pattern value itself.
          None => self.rvalue(pat),
        };
        Some(self.emit(LirKind::BrIfNot, TyId::BOOL, cond.0, HOLE))
      } else { None };
      let value = self.rvalue(value);
      self.store(result, value, ret);
      end_brs.push(self.emit(LirKind::Br, TyId::VOID, HOLE, 0));
      if let Some(skip) = skip {
        if last {
          end_brs.push(skip);
        } else {
          let next = self.here();
          self.patch_br(skip, next);
        }
      }
    }
    let end = self.here();
    for br in end_brs { self.patch_br(br, end) }
    if self.is_aggregate(ret) { result } else { self.emit(LirKind::Load, ret, result.0, 0) }
  }

  // Statements.

  /// Whether the statement ended the current block with a terminator.
  fn lower_stmt(&mut self, inst: InstId) -> bool {
    let Inst { kind, a, b, .. } = self.body.tir.inst(inst);
    use InstKind as I;
    match kind {
      I::Let | I::LetMut => {
        let local = LocalId(a);
        let ty = {
          let t = self.body.locals[local.into_usize()].ty;
          self.sub(t)
        };
        let slot = self.emit(LirKind::Alloc, ty, 0, 0);
        self.var_slot[local.into_usize()] = slot;
        let value = self.rvalue(ValId(b));
        self.store(slot, value, ty);
        false
      }
      I::Assign => {
        let ty = self.val_ty(ValId(a));
        let value = self.rvalue(ValId(b));
        let addr = self.place(ValId(a));
        self.store(addr, value, ty);
        false
      }
      I::Eval => { self.rvalue(ValId(a)); false }
      I::Ret => {
        let value = self.rvalue(ValId(a));
        let ty = self.val_ty(ValId(a));
        self.emit(LirKind::Ret, ty, value.0, 0);
        true
      }
      I::RetVoid => { self.emit(LirKind::RetVoid, TyId::VOID, 0, 0); true }
      I::Break => {
        let br = self.emit(LirKind::Br, TyId::VOID, HOLE, 0);
        self.break_pending.last_mut().expect("break inside a loop").push(br);
        true
      }
      I::Continue => {
        let br = self.emit(LirKind::Br, TyId::VOID, HOLE, 0);
        self.continue_pending.last_mut().expect("continue inside a loop").push(br);
        true
      }
      I::If => {
        let &[then_blk, else_blk] = self.body.tir.words(b, 2) else { unreachable!() };
        let cond = self.rvalue(ValId(a));
        let skip = self.emit(LirKind::BrIfNot, TyId::BOOL, cond.0, HOLE);
        let then_done = self.lower_block(then_blk);
        if else_blk == 0 {
          if !then_done {
            let join_br = self.emit(LirKind::Br, TyId::VOID, HOLE, 0);
            let join = self.here();
            self.patch_br(skip, join);
            self.patch_br(join_br, join);
          } else {
            let join = self.here();
            self.patch_br(skip, join);
          }
          false
        } else {
          let join_br = (!then_done).then(|| self.emit(LirKind::Br, TyId::VOID, HOLE, 0));
          let else_start = self.here();
          self.patch_br(skip, else_start);
          let else_done = self.lower_block(else_blk);
          let else_join = (!else_done).then(|| self.emit(LirKind::Br, TyId::VOID, HOLE, 0));
          if join_br.is_none() && else_join.is_none() {
            // Both arms terminated; anything after is a new block anyway.
            return true
          }
          let join = self.here();
          if let Some(br) = join_br { self.patch_br(br, join) }
          if let Some(br) = else_join { self.patch_br(br, join) }
          false
        }
      }
      I::While => {
        let &[body_blk, next_blk] = self.body.tir.words(b, 2) else { unreachable!() };
        let entry = self.emit(LirKind::Br, TyId::VOID, HOLE, 0);
        let header = self.here();
        self.patch_br(entry, header);
        let cond = self.rvalue(ValId(a));
        let exit_br = self.emit(LirKind::BrIfNot, TyId::BOOL, cond.0, HOLE);
        self.break_pending.push(vec![]);
        self.continue_pending.push(vec![]);
        let body_done = self.lower_block(body_blk);
        if !body_done {
          let br = self.emit(LirKind::Br, TyId::VOID, HOLE, 0);
          self.continue_pending.last_mut().expect("loop stack").push(br);
        }
        // The continue point runs the hoisted `for` step, then loops.
        let cont = self.here();
        for br in self.continue_pending.pop().expect("loop stack") {
          self.patch_br(br, cont);
        }
        self.lower_block(next_blk);
        let back = self.emit(LirKind::Br, TyId::VOID, HOLE, 0);
        self.patch_br(back, header);
        let exit = self.here();
        self.patch_br(exit_br, exit);
        for br in self.break_pending.pop().expect("loop stack") {
          self.patch_br(br, exit);
        }
        false
      }
      _ => panic!("value instruction {kind:?} in a statement list"),
    }
  }

  fn lower_block(&mut self, blk: u32) -> bool {
    let mut done = false;
    for inst in self.body.tir.block(blk) {
      if done {
        // Statements after a terminator are unreachable; skip them.
        break
      }
      done = self.lower_stmt(inst);
    }
    done
  }
}

fn arith_kind(kind: InstKind) -> LirKind {
  match kind {
    InstKind::Add => LirKind::Add, InstKind::Sub => LirKind::Sub,
    InstKind::Mul => LirKind::Mul, InstKind::Div => LirKind::Div,
    InstKind::Rem => LirKind::Rem, InstKind::BitAnd => LirKind::And,
    InstKind::BitOr => LirKind::Or, InstKind::BitXor => LirKind::Xor,
    InstKind::Shl => LirKind::Shl, InstKind::Shr => LirKind::Shr,
    k => panic!("not arithmetic: {k:?}"),
  }
}

fn compare_kind(kind: InstKind) -> LirKind {
  match kind {
    InstKind::Eq => LirKind::Eq, InstKind::Ne => LirKind::Ne,
    InstKind::Lt => LirKind::Lt, InstKind::Le => LirKind::Le,
    InstKind::Gt => LirKind::Gt, InstKind::Ge => LirKind::Ge,
    k => panic!("not a comparison: {k:?}"),
  }
}

/// Lower every reachable function: all non-generic bodies, plus each
/// generic instantiation demanded by a lowered call site.
pub fn lower_all(
  env: &mut GlobalEnv,
  bodies: &[FnBody],
  interner: &Interner,
) -> Vec<LoweredFn> {
  let by_def: HashMap<DefId, &FnBody> = bodies.iter().map(|b| (b.def, b)).collect();
  let mut mono = Mono { queue: vec![], done: HashMap::default() };
  for body in bodies {
    if body.tyargs == 0 {
      mono.queue.push((body.def, vec![], body.name));
    }
  }

  let entry = env.entry;
  let mut out = vec![];
  while let Some((def, args, name)) = mono.queue.pop() {
    let body = by_def[&def];
    let mut lower = Lower {
      types: &mut env.types,
      values: &mut env.values,
      entities: &env.entities,
      interner,
      mono: &mut mono,
      by_def: &by_def,
      body,
      args: &args,
      lir: Lir::default(),
      var_slot: vec![LirId(0); body.locals.len()],
      memo: HashMap::default(),
      pending_block: false,
      break_pending: SmallVec::new(),
      continue_pending: SmallVec::new(),
    };
    lower.lir.blocks.push(0);

    // Parameters: array parameters are passed by address and used directly;
    // everything else spills to a slot.
    let mut params = vec![];
    for i in 0..body.params as usize {
      let ty = lower.sub(body.locals[i].ty);
      params.push(ty);
      let p = lower.emit(LirKind::Param, ty, i as u32, 0);
      lower.var_slot[i] = if lower.is_aggregate(ty) { p } else { lower.spill(p, ty) };
    }

    let done = lower.lower_block(body.root_blk);
    let ret = lower.sub(body.ret);
    if !done {
      // A void function may fall off the end.
      lower.emit(LirKind::RetVoid, TyId::VOID, 0, 0);
    }
    let lir = lower.lir;
    debug_assert!(lir.check_blocks().is_ok(), "{:?}", lir.check_blocks());
    out.push(LoweredFn {
      def,
      name,
      params,
      ret,
      lir,
      is_main: Some(def) == entry && args.is_empty(),
    });
  }
  out
}
