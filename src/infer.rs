//! Type analysis, in two phases.
//!
//! The declaration phase walks the dependency-ordered definition list
//! single-threaded, populating the global type and value partitions:
//! function and extern signatures, struct layouts, enum scopes, newtypes,
//! and compile-time constants. The body phase then runs per function, in
//! parallel, each function writing only its own instruction buffer and its
//! own thread-local type/value overlay on the frozen global partition; the
//! overlays are folded back in by hash-cons lookup once the parallel region
//! ends.
//!
//! The expression analyzer carries a type hint downward. Constant operands
//! fold with checked arithmetic; a fold that would overflow its type is an
//! error, never a silent wrap.

use bit_set::BitSet;
use hashbrown::HashMap;
use if_chain::if_chain;
use rayon::prelude::*;

use crate::diag::{self, DiagSink, Note};
use crate::roles::{Builtin, Res, Resolved, Role};
use crate::symbol::{Interner, Symbol};
use crate::types::ast::{Ast, NodeKind};
use crate::types::tir::{InstKind, Tir};
use crate::types::ty::{
  self, subst, LocalTypes, TyFlags, TyId, TyIntern, TyKind, TyRead, Types,
};
use crate::types::value::{Category, LocalValues, Val, ValId, ValKind, Values};
use crate::types::{DefId, FileId, Idx, IdxVec, LocalId, NodeId, ScopeId, Span};
use crate::ParsedFile;

/// The declaration-phase record for one definition.
#[derive(Clone, Debug)]
pub enum Entity {
  /// The definition failed analysis; uses short-circuit.
  Invalid,
  Func { val: ValId, ty: TyId, def: DefId },
  ExternFunc { val: ValId, ty: TyId },
  ExternVar { val: ValId, ty: TyId },
  /// A struct, enum, or type alias.
  Type(TyId),
  /// A newtype declaration.
  TagType(TyId),
  /// A compile-time constant.
  Const(ValId),
}

/// A member scope of a struct (fields) or enum (members): name to index.
#[derive(Debug, Default)]
pub struct MemberScope {
  pub names: HashMap<Symbol, u32>,
  pub order: Vec<Symbol>,
}

impl MemberScope {
  fn insert(&mut self, name: Symbol) -> Result<u32, u32> {
    match self.names.entry(name) {
      hashbrown::hash_map::Entry::Occupied(e) => Err(*e.get()),
      hashbrown::hash_map::Entry::Vacant(e) => {
        let idx = self.order.len() as u32;
        e.insert(idx);
        self.order.push(name);
        Ok(idx)
      }
    }
  }
}

/// The frozen output of the declaration phase.
pub struct GlobalEnv {
  pub types: Types,
  pub values: Values,
  pub scopes: IdxVec<ScopeId, MemberScope>,
  pub entities: IdxVec<DefId, Entity>,
  /// The `main` function, once seen.
  pub entry: Option<DefId>,
  /// The tag type of `size_of` results.
  pub size_ty: TyId,
  /// The tag type of `align_of` results.
  pub align_ty: TyId,
}

/// A local declaration inside one function body.
#[derive(Clone, Debug)]
pub struct LocalDecl {
  pub name: Symbol,
  pub ty: TyId,
  pub mutable: bool,
  pub node: NodeId,
}

/// One analyzed function body, with its partitions merged back into the
/// global tables.
pub struct FnBody {
  pub def: DefId,
  pub file: FileId,
  /// The mangled name.
  pub name: Symbol,
  pub tir: Tir,
  /// The extras index of the top-level statement list.
  pub root_blk: u32,
  pub locals: Vec<LocalDecl>,
  /// The number of leading locals that are parameters.
  pub params: u32,
  pub vals_base: u32,
  pub vals: Vec<Val>,
  pub ret: TyId,
  pub tyargs: u32,
}

// Store handles: the declaration phase writes the global partitions, the
// body phase a local overlay. One analyzer serves both.

enum TyStore<'a> {
  Global(&'a mut Types),
  Local(LocalTypes<'a>),
}

impl TyRead for TyStore<'_> {
  fn kind(&self, t: TyId) -> &TyKind {
    match self { TyStore::Global(g) => g.kind(t), TyStore::Local(l) => l.kind(t) }
  }
  fn flags(&self, t: TyId) -> TyFlags {
    match self { TyStore::Global(g) => g.flags(t), TyStore::Local(l) => l.flags(t) }
  }
}

impl TyIntern for TyStore<'_> {
  fn intern(&mut self, kind: TyKind) -> TyId {
    match self { TyStore::Global(g) => g.intern(kind), TyStore::Local(l) => l.intern(kind) }
  }
}

enum ValStore<'a> {
  Global(&'a mut Values),
  Local(LocalValues<'a>),
}

impl ValStore<'_> {
  fn push(&mut self, kind: ValKind, ty: TyId) -> ValId {
    match self { ValStore::Global(g) => g.push(kind, ty), ValStore::Local(l) => l.push(kind, ty) }
  }
  fn get(&self, v: ValId) -> &Val {
    match self { ValStore::Global(g) => g.get(v), ValStore::Local(l) => l.get(v) }
  }
}

/// A lexical scope entry in the body walk.
#[derive(Copy, Clone)]
enum ScopeEntry {
  Local(Symbol, LocalId),
  TyParam(Symbol, TyId),
}

/// The per-definition analyzer. Shared by the declaration phase (signature
/// types, constant initializers) and the body phase (function bodies).
struct Analyzer<'a> {
  files: &'a [ParsedFile],
  resolved: &'a Resolved,
  interner: &'a Interner,
  diags: &'a DiagSink,
  scopes: &'a IdxVec<ScopeId, MemberScope>,
  entities: &'a IdxVec<DefId, Entity>,
  size_ty: TyId,
  align_ty: TyId,

  file: FileId,
  tys: TyStore<'a>,
  vals: ValStore<'a>,
  tir: Tir,
  locals: Vec<LocalDecl>,
  scope: Vec<ScopeEntry>,
  scope_marks: Vec<usize>,
  loop_depth: u32,
  ret: TyId,
}

/// No-hint marker; the error type doubles as "no expectation".
const NO_HINT: TyId = TyId::ERROR;

impl<'a> Analyzer<'a> {
  fn ast(&self) -> &'a Ast { &self.files[self.file.into_usize()].ast }

  fn role(&self, node: NodeId) -> Role { self.resolved.role(self.file, node) }
  fn res(&self, node: NodeId) -> Res { self.resolved.resolution(self.file, node) }
  fn span(&self, node: NodeId) -> Span { self.ast().span(node) }

  fn error(&self, node: NodeId, code: diag::ECode, msg: impl Into<String>) {
    self.diags.error(self.file, self.span(node), code, msg);
  }

  fn show(&self, t: TyId) -> String { self.tys.display(t, self.interner) }

  fn push_scope(&mut self) { self.scope_marks.push(self.scope.len()) }
  fn pop_scope(&mut self) {
    let mark = self.scope_marks.pop().expect("unbalanced scope stack");
    self.scope.truncate(mark);
  }

  fn lookup_scope(&self, name: Symbol) -> Option<ScopeEntry> {
    self.scope.iter().rev().find(|e| match e {
      ScopeEntry::Local(n, _) | ScopeEntry::TyParam(n, _) => *n == name,
    }).copied()
  }

  /// Create an instruction and its temporary.
  fn temp(&mut self, kind: InstKind, node: NodeId, a: u32, b: u32, ty: TyId) -> ValId {
    let inst = self.tir.push(kind, node, a, b);
    self.vals.push(ValKind::Temp(inst), ty)
  }

  fn int_const(&mut self, v: i64, ty: TyId) -> ValId {
    self.vals.push(ValKind::Int(v), ty)
  }

  /// The constant integer behind a value, looking through nothing.
  fn as_int(&self, v: ValId) -> Option<i64> {
    match self.vals.get(v).kind { ValKind::Int(n) => Some(n), _ => None }
  }

  fn as_float(&self, v: ValId) -> Option<f64> {
    match self.vals.get(v).kind { ValKind::Float(n) => Some(n), _ => None }
  }

  // Value categories.

  fn category(&self, v: ValId) -> Category {
    match self.vals.get(v).kind {
      ValKind::Var(_) | ValKind::Str(_) => Category::Place,
      ValKind::VarMut(_) | ValKind::ExternVar(_) => Category::PlaceMut,
      ValKind::Temp(inst) => {
        let inst = self.tir.inst(inst);
        match inst.kind {
          InstKind::Deref => {
            let ptr = self.vals.get(ValId(inst.a)).ty;
            match self.tys.pointee(ptr) {
              Some((_, true)) => Category::PlaceMut,
              _ => Category::Place,
            }
          }
          InstKind::SliceIndex => {
            let slice = self.vals.get(ValId(inst.a)).ty;
            match self.tys.slice_elem(slice) {
              Some((_, true)) => Category::PlaceMut,
              _ => Category::Place,
            }
          }
          InstKind::Field | InstKind::Index => self.category(ValId(inst.a)),
          _ => Category::Temp,
        }
      }
      _ => Category::Temp,
    }
  }

  // Types from type expressions.

  fn entity_type(&mut self, node: NodeId, d: DefId) -> TyId {
    match self.entities[d] {
      Entity::Type(t) => t,
      Entity::TagType(t) => {
        // A bare tag type denotes its zero-argument application.
        match *self.tys.kind(t) {
          TyKind::Newtype { arity: 0, inner, .. } =>
            self.tys.intern(TyKind::Tagged { newtype: t, inner, args: Box::new([]) }),
          TyKind::Newtype { arity, .. } => {
            self.error(node, diag::INDEX_COUNT,
              format!("tag type expects {arity} arguments"));
            TyId::ERROR
          }
          _ => TyId::ERROR,
        }
      }
      Entity::Invalid => TyId::ERROR,
      _ => {
        self.error(node, diag::EXPECTED_TYPE, "expected a type");
        TyId::ERROR
      }
    }
  }

  /// Analyze a type expression.
  fn ty_expr(&mut self, node: NodeId) -> TyId {
    if node == NodeId(0) || self.role(node) == Role::Invalid { return TyId::ERROR }
    let n = self.ast().node(node);
    match n.kind {
      NodeKind::Ident => match self.res(node) {
        Res::Prim(t) => t,
        Res::Def(d) => {
          let t = self.entity_type(node, d);
          if_chain! {
            if let TyKind::Struct { tyargs, ref args, .. } = *self.tys.kind(t);
            if tyargs > 0 && args.iter().any(|&a| self.tys.flags(a).contains(TyFlags::HAS_PARAM));
            then {
              self.error(node, diag::INDEX_COUNT,
                format!("generic struct `{}` expects {tyargs} type arguments", self.show(t)));
              return TyId::ERROR
            }
          }
          t
        }
        Res::Local => match self.lookup_scope(Symbol(n.a)) {
          Some(ScopeEntry::TyParam(_, t)) => t,
          _ => {
            self.error(node, diag::EXPECTED_TYPE, "expected a type");
            TyId::ERROR
          }
        },
        _ => {
          self.error(node, diag::EXPECTED_TYPE, "expected a type");
          TyId::ERROR
        }
      },
      NodeKind::FieldOp => match self.res(node) {
        Res::Def(d) => self.entity_type(node, d),
        _ => {
          self.error(node, diag::EXPECTED_TYPE, "expected a type");
          TyId::ERROR
        }
      },
      NodeKind::Star => {
        let inner = self.ty_expr(NodeId(n.a));
        if inner == TyId::ERROR { return TyId::ERROR }
        self.tys.intern(if n.b != 0 { TyKind::PtrMut(inner) } else { TyKind::Ptr(inner) })
      }
      NodeKind::At => {
        let inner = self.ty_expr(NodeId(n.a));
        if inner == TyId::ERROR { return TyId::ERROR }
        self.tys.intern(if n.b != 0 { TyKind::SliceMut(inner) } else { TyKind::Slice(inner) })
      }
      NodeKind::IndexOp => self.ty_apply(node),
      NodeKind::BuiltinId => {
        self.error(node, diag::EXPECTED_TYPE, "this builtin is not a type by itself");
        TyId::ERROR
      }
      _ => {
        self.error(node, diag::EXPECTED_TYPE, "expected a type");
        TyId::ERROR
      }
    }
  }

  /// Bracket application in type position: arrays, generic structs, tagged
  /// newtypes, and `Affine`.
  fn ty_apply(&mut self, node: NodeId) -> TyId {
    let n = self.ast().node(node);
    let args: Vec<NodeId> = self.ast().list(n.b).iter().map(|&a| NodeId(a)).collect();
    let target = NodeId(n.a);

    if let Res::Macro(Builtin::Affine) = self.res(target) {
      if args.len() != 1 {
        self.error(node, diag::INDEX_COUNT, "`Affine` expects one type argument");
        return TyId::ERROR
      }
      let inner = self.ty_expr(args[0]);
      if inner == TyId::ERROR { return TyId::ERROR }
      return self.tys.intern(TyKind::Linear(inner))
    }

    // Tag types apply to type arguments.
    if self.role(target) == Role::TagType {
      let nt = match self.res(target) {
        Res::Def(d) => match self.entities[d] {
          Entity::TagType(t) => t,
          _ => return TyId::ERROR,
        },
        _ => return TyId::ERROR,
      };
      let TyKind::Newtype { arity, inner, .. } = *self.tys.kind(nt) else { return TyId::ERROR };
      if args.len() != arity as usize {
        self.error(node, diag::INDEX_COUNT, format!("tag type expects {arity} arguments"));
        return TyId::ERROR
      }
      let args: Vec<TyId> = args.iter().map(|&a| self.ty_expr(a)).collect();
      if args.contains(&TyId::ERROR) { return TyId::ERROR }
      return self.tys.intern(TyKind::Tagged { newtype: nt, inner, args: args.into() })
    }

    let base = self.ty_expr(target);
    if base == TyId::ERROR { return TyId::ERROR }
    match *self.tys.kind(base) {
      // Generic struct application.
      TyKind::Struct { tyargs, .. } if tyargs > 0 => {
        if args.len() != tyargs as usize {
          self.error(node, diag::INDEX_COUNT,
            format!("generic struct expects {tyargs} type arguments"));
          return TyId::ERROR
        }
        let args: Vec<TyId> = args.iter().map(|&a| self.ty_expr(a)).collect();
        if args.contains(&TyId::ERROR) { return TyId::ERROR }
        subst(&mut self.tys, base, &args)
      }
      // Array type `T[N]`.
      _ => {
        if args.len() != 1 {
          self.error(node, diag::INDEX_COUNT, "array types take one length");
          return TyId::ERROR
        }
        let len = args[0];
        let index = match self.ast().kind(len) {
          NodeKind::Int => {
            let v = self.ast().int_value(len);
            if v < 0 {
              self.error(len, diag::INDEX_OPERAND, "array length must be non-negative");
              return TyId::ERROR
            }
            self.tys.intern(TyKind::ArrayLen(v))
          }
          NodeKind::Ident => match self.lookup_scope(Symbol(self.ast().node(len).a)) {
            Some(ScopeEntry::TyParam(_, t)) => t,
            _ => match self.res(len) {
              Res::Def(d) => match self.entities[d] {
                Entity::Const(v) => match self.vals.get(v).kind {
                  ValKind::Int(v) if v >= 0 => self.tys.intern(TyKind::ArrayLen(v)),
                  _ => {
                    self.error(len, diag::INDEX_OPERAND, "array length must be an integer constant");
                    return TyId::ERROR
                  }
                },
                _ => {
                  self.error(len, diag::INDEX_OPERAND, "array length must be a constant");
                  return TyId::ERROR
                }
              },
              _ => {
                self.error(len, diag::INDEX_OPERAND, "array length must be a constant");
                return TyId::ERROR
              }
            },
          },
          _ => {
            self.error(len, diag::INDEX_OPERAND, "array length must be an integer constant");
            return TyId::ERROR
          }
        };
        self.tys.intern(TyKind::Array { index, elem: base })
      }
    }
  }

  // Implicit conversions.

  /// Convert `v` to `want`, applying the ordered implicit-conversion set;
  /// reports a type mismatch when nothing applies.
  fn coerce(&mut self, node: NodeId, v: ValId, want: TyId) -> ValId {
    if v == ValId::ERROR || want == TyId::ERROR { return if want == TyId::ERROR { v } else { ValId::ERROR } }
    let have = self.vals.get(v).ty;
    if have == want || have == TyId::ERROR { return v }

    // `null` adopts any pointer-shaped expectation.
    if matches!(self.vals.get(v).kind, ValKind::Null)
      && matches!(self.tys.kind(want),
        TyKind::Ptr(_) | TyKind::PtrMut(_) | TyKind::Slice(_) | TyKind::SliceMut(_)) {
      return self.vals.push(ValKind::Null, want)
    }

    let havek = self.tys.kind(have).clone();
    let wantk = self.tys.kind(want).clone();
    match (&havek, &wantk) {
      // *mut T[N] -> @mut T, *(mut) T[N] -> @T
      (TyKind::PtrMut(arr), TyKind::SliceMut(elem))
      | (TyKind::PtrMut(arr) | TyKind::Ptr(arr), TyKind::Slice(elem)) => {
        if let TyKind::Array { elem: have_elem, .. } = *self.tys.kind(*arr) {
          if have_elem == *elem {
            return self.temp(InstKind::ArrayToSlice, node, v.0, 0, want)
          }
        }
      }
      // *mut T -> *T, @mut T -> @T
      (TyKind::PtrMut(a), TyKind::Ptr(b)) | (TyKind::SliceMut(a), TyKind::Slice(b)) if a == b =>
        return self.temp(InstKind::IdCast, node, v.0, 0, want),
      // *mut T -> *mut byte, *(mut) T -> *byte
      (TyKind::PtrMut(_), TyKind::PtrMut(e)) if *e == TyId::BYTE =>
        return self.temp(InstKind::PtrCast, node, v.0, 0, want),
      (TyKind::Ptr(_) | TyKind::PtrMut(_), TyKind::Ptr(e)) if *e == TyId::BYTE =>
        return self.temp(InstKind::PtrCast, node, v.0, 0, want),
      // Tagged[Args...] -> its representation.
      (TyKind::Tagged { inner, .. }, _) => {
        if self.tys.strip_tags(*inner) == self.tys.strip_tags(want) || *inner == want {
          let retag = self.temp(InstKind::IdCast, node, v.0, 0, *inner);
          return self.coerce(node, retag, want)
        }
      }
      _ => {}
    }

    // Integer adjustment: constants re-type when they fit, other integer
    // values convert by machine cast.
    if self.tys.is_integer(have) && self.tys.is_integer(want) {
      if let Some(n) = self.as_int(v) {
        let n = truncate_int(n, &wantk);
        return self.int_const(n, want)
      }
      return self.temp(InstKind::Cast, node, v.0, have.0, want)
    }

    self.error(node, diag::TYPE_MISMATCH,
      format!("expected `{}`, found `{}`", self.show(want), self.show(have)));
    ValId::ERROR
  }

  // Expressions.

  fn expr(&mut self, node: NodeId, hint: TyId) -> ValId {
    if node == NodeId(0) { return ValId::ERROR }
    if self.role(node) == Role::Invalid { return ValId::ERROR }
    let n = self.ast().node(node);
    use NodeKind as N;
    match n.kind {
      N::Int => {
        let v = self.ast().int_value(node);
        let ty = if hint != NO_HINT && self.tys.is_integer(hint) && int_fits(v, self.tys.kind(hint)) {
          hint
        } else { TyId::I64 };
        self.int_const(v, ty)
      }
      N::Float => {
        let v = self.ast().float_value(node);
        let ty = if hint == TyId::F32 { TyId::F32 } else { TyId::F64 };
        self.vals.push(ValKind::Float(v), ty)
      }
      N::CharLit => self.int_const(i64::from(n.a), TyId::CHAR),
      N::StrLit => self.vals.push(ValKind::Str(Symbol(n.a)),
        self.tys.intern(TyKind::Slice(TyId::BYTE))),
      N::TrueLit => self.int_const(1, TyId::BOOL),
      N::FalseLit => self.int_const(0, TyId::BOOL),
      N::NullLit => {
        if hint != NO_HINT && matches!(self.tys.kind(hint),
          TyKind::Ptr(_) | TyKind::PtrMut(_) | TyKind::Slice(_) | TyKind::SliceMut(_)) {
          self.vals.push(ValKind::Null, hint)
        } else {
          self.error(node, diag::TYPE_INFERENCE, "cannot infer the type of `null` here");
          ValId::ERROR
        }
      }
      N::Ident => self.ident_value(node, Symbol(n.a)),
      N::DotName => {
        let want = if hint == NO_HINT { NO_HINT } else { self.tys.strip_tags(hint) };
        if want != NO_HINT && matches!(self.tys.kind(want), TyKind::Enum { .. }) {
          self.enum_member(node, want, Symbol(n.a))
        } else {
          self.error(node, diag::TYPE_INFERENCE,
            "cannot resolve `.name` without an enum type hint");
          ValId::ERROR
        }
      }
      N::Neg => {
        let a = self.expr(NodeId(n.a), hint);
        if a == ValId::ERROR { return ValId::ERROR }
        let ty = self.vals.get(a).ty;
        if self.tys.is_integer(ty) {
          if let Some(v) = self.as_int(a) {
            return match v.checked_neg().filter(|&r| int_fits(r, self.tys.kind(ty))) {
              Some(r) => self.int_const(r, ty),
              None => {
                self.error(node, diag::CONST_OVERFLOW, "constant negation overflows");
                ValId::ERROR
              }
            }
          }
        } else if self.tys.is_float(ty) {
          if let Some(v) = self.as_float(a) {
            let ty = self.vals.get(a).ty;
            return self.vals.push(ValKind::Float(-v), ty)
          }
        } else {
          self.error(node, diag::UNOP_MISMATCH,
            format!("cannot negate `{}`", self.show(ty)));
          return ValId::ERROR
        }
        self.temp(InstKind::Neg, node, a.0, 0, ty)
      }
      N::NotL => {
        let a = self.expr(NodeId(n.a), TyId::BOOL);
        if a == ValId::ERROR { return ValId::ERROR }
        let a = self.coerce(node, a, TyId::BOOL);
        if a == ValId::ERROR { return ValId::ERROR }
        if let Some(v) = self.as_int(a) {
          return self.int_const(i64::from(v == 0), TyId::BOOL)
        }
        self.temp(InstKind::Not, node, a.0, 0, TyId::BOOL)
      }
      N::Add | N::Sub | N::Mul | N::Div | N::Rem
      | N::BitAnd | N::BitOr | N::BitXor | N::Shl | N::Shr => self.arith(node, n.kind, hint),
      N::EqEq | N::Ne | N::Lt | N::Le | N::Gt | N::Ge => self.compare(node, n.kind),
      N::AndL | N::OrL => self.short_circuit(node, n.kind),
      N::Amp => self.address_of(node, hint),
      N::Star => {
        let a = self.expr(NodeId(n.a), NO_HINT);
        if a == ValId::ERROR { return ValId::ERROR }
        let ty = self.vals.get(a).ty;
        match self.tys.pointee(ty) {
          Some((elem, _)) => self.temp(InstKind::Deref, node, a.0, 0, elem),
          None => {
            self.error(node, diag::DEREF_NON_POINTER,
              format!("cannot dereference `{}`", self.show(ty)));
            ValId::ERROR
          }
        }
      }
      N::At => {
        // Slice of an array place.
        let a = self.expr(NodeId(n.a), NO_HINT);
        if a == ValId::ERROR { return ValId::ERROR }
        let ty = self.vals.get(a).ty;
        let TyKind::Array { elem, .. } = *self.tys.kind(ty) else {
          self.error(node, diag::UNOP_MISMATCH,
            format!("`@` expects an array, found `{}`", self.show(ty)));
          return ValId::ERROR
        };
        let (addr_kind, slice) = match self.category(a) {
          Category::PlaceMut => (InstKind::AddrMut, TyKind::SliceMut(elem)),
          Category::Place => (InstKind::Addr, TyKind::Slice(elem)),
          Category::Temp => (InstKind::AddrTemp, TyKind::Slice(elem)),
        };
        let ptr = self.tys.intern(TyKind::PtrMut(ty));
        let addr = self.temp(addr_kind, node, a.0, 0, ptr);
        let slice = self.tys.intern(slice);
        self.temp(InstKind::ArrayToSlice, node, addr.0, 0, slice)
      }
      N::FieldOp => self.field(node),
      N::Call => self.call(node),
      N::IndexOp => self.index(node),
      N::CastOp => self.cast(node),
      N::ArrayLit => self.array_lit(node, hint),
      N::SwitchExpr => self.switch(node, hint),
      N::Block | N::Let | N::LetMut | N::Assign | N::OpAssign | N::If | N::While
      | N::For | N::Break | N::Continue | N::Return => {
        panic!("statement node {:?} in expression position", n.kind)
      }
      _ => {
        self.error(node, diag::EXPECTED_VALUE, "expected an expression");
        ValId::ERROR
      }
    }
  }

  fn ident_value(&mut self, node: NodeId, name: Symbol) -> ValId {
    match self.res(node) {
      Res::Local => match self.lookup_scope(name) {
        Some(ScopeEntry::Local(_, l)) => {
          let decl = &self.locals[l.into_usize()];
          let kind = if decl.mutable { ValKind::VarMut(l) } else { ValKind::Var(l) };
          let ty = decl.ty;
          self.vals.push(kind, ty)
        }
        _ => {
          self.error(node, diag::EXPECTED_VALUE, "expected a value");
          ValId::ERROR
        }
      },
      Res::Def(d) => match self.entities[d] {
        Entity::Func { val, .. } | Entity::ExternFunc { val, .. }
        | Entity::ExternVar { val, .. } | Entity::Const(val) => val,
        Entity::Invalid => ValId::ERROR,
        Entity::Type(_) | Entity::TagType(_) => {
          self.error(node, diag::EXPECTED_VALUE, "expected a value, found a type");
          ValId::ERROR
        }
      },
      _ => ValId::ERROR,
    }
  }

  fn enum_member(&mut self, node: NodeId, enum_ty: TyId, name: Symbol) -> ValId {
    let TyKind::Enum { scope, .. } = *self.tys.kind(enum_ty) else { return ValId::ERROR };
    match self.scopes[scope].names.get(&name) {
      Some(&idx) => self.int_const(i64::from(idx), enum_ty),
      None => {
        self.error(node, diag::UNKNOWN_FIELD,
          format!("`{}` has no member `{}`", self.show(enum_ty), self.interner.get(name)));
        ValId::ERROR
      }
    }
  }

  fn arith(&mut self, node: NodeId, kind: NodeKind, hint: TyId) -> ValId {
    let n = self.ast().node(node);
    let a = self.expr(NodeId(n.a), hint);
    let a_ty = if a == ValId::ERROR { hint } else { self.vals.get(a).ty };
    let b = self.expr(NodeId(n.b), a_ty);
    if a == ValId::ERROR || b == ValId::ERROR { return ValId::ERROR }
    let ty = self.vals.get(a).ty;
    let bits_only = matches!(kind,
      NodeKind::BitAnd | NodeKind::BitOr | NodeKind::BitXor | NodeKind::Shl | NodeKind::Shr);
    let ok = self.tys.is_integer(ty) || (!bits_only && self.tys.is_float(ty));
    if !ok {
      self.error(node, diag::BINOP_MISMATCH,
        format!("operator is not defined on `{}`", self.show(ty)));
      return ValId::ERROR
    }
    let b = self.coerce(NodeId(n.b), b, ty);
    if b == ValId::ERROR { return ValId::ERROR }

    if let (Some(x), Some(y)) = (self.as_int(a), self.as_int(b)) {
      return match self.fold_int(node, kind, x, y, ty) {
        Some(v) => self.int_const(v, ty),
        None => ValId::ERROR,
      }
    }
    if let (Some(x), Some(y)) = (self.as_float(a), self.as_float(b)) {
      let v = match kind {
        NodeKind::Add => x + y,
        NodeKind::Sub => x - y,
        NodeKind::Mul => x * y,
        NodeKind::Div => x / y,
        NodeKind::Rem => x % y,
        _ => unreachable!("bit operation on floats"),
      };
      return self.vals.push(ValKind::Float(v), ty)
    }
    let inst = arith_inst(kind);
    self.temp(inst, node, a.0, b.0, ty)
  }

  fn fold_int(&self, node: NodeId, kind: NodeKind, x: i64, y: i64, ty: TyId) -> Option<i64> {
    let r = match kind {
      NodeKind::Add => x.checked_add(y),
      NodeKind::Sub => x.checked_sub(y),
      NodeKind::Mul => x.checked_mul(y),
      NodeKind::Div | NodeKind::Rem => {
        if y == 0 || (x == i64::MIN && y == -1) {
          self.error(node, diag::CONST_DIV_ZERO, "constant division is undefined here");
          return None
        }
        Some(if kind == NodeKind::Div { x / y } else { x % y })
      }
      NodeKind::BitAnd => Some(x & y),
      NodeKind::BitOr => Some(x | y),
      NodeKind::BitXor => Some(x ^ y),
      NodeKind::Shl | NodeKind::Shr => {
        if y < 0 {
          self.error(node, diag::CONST_SHIFT_NEGATIVE, "constant shift by a negative amount");
          return None
        }
        let amt = u32::try_from(y).ok().filter(|&a| a < 64);
        match (kind, amt) {
          (NodeKind::Shl, Some(amt)) => x.checked_shl(amt),
          (NodeKind::Shr, Some(amt)) => x.checked_shr(amt),
          _ => None,
        }
      }
      _ => unreachable!("non-arithmetic fold"),
    };
    let r = r.filter(|&r| int_fits(r, self.tys.kind(ty)));
    if r.is_none() {
      self.error(node, diag::CONST_OVERFLOW, "constant arithmetic overflows");
    }
    r
  }

  fn compare(&mut self, node: NodeId, kind: NodeKind) -> ValId {
    let n = self.ast().node(node);
    let a = self.expr(NodeId(n.a), NO_HINT);
    let a_ty = if a == ValId::ERROR { NO_HINT } else { self.vals.get(a).ty };
    let b = self.expr(NodeId(n.b), a_ty);
    if a == ValId::ERROR || b == ValId::ERROR { return ValId::ERROR }
    let ty = self.vals.get(a).ty;
    let stripped = self.tys.strip_tags(ty);
    let eq_only = matches!(kind, NodeKind::EqEq | NodeKind::Ne);
    let ok = self.tys.is_integer(stripped) || self.tys.is_float(stripped)
      || matches!(self.tys.kind(stripped), TyKind::Enum { .. })
      || (eq_only && matches!(self.tys.kind(stripped),
        TyKind::Bool | TyKind::Ptr(_) | TyKind::PtrMut(_)));
    if !ok {
      self.error(node, diag::BINOP_MISMATCH,
        format!("cannot compare values of type `{}`", self.show(ty)));
      return ValId::ERROR
    }
    let b = self.coerce(NodeId(n.b), b, ty);
    if b == ValId::ERROR { return ValId::ERROR }
    if let (Some(x), Some(y)) = (self.as_int(a), self.as_int(b)) {
      return self.int_const(i64::from(compare_fold(kind, &x, &y)), TyId::BOOL)
    }
    if let (Some(x), Some(y)) = (self.as_float(a), self.as_float(b)) {
      return self.int_const(i64::from(compare_fold(kind, &x, &y)), TyId::BOOL)
    }
    self.temp(compare_inst(kind), node, a.0, b.0, TyId::BOOL)
  }

  /// `and`/`or` compile to a two-arm bool switch; the right operand appears
  /// in exactly one arm, so it is evaluated at most once.
  fn short_circuit(&mut self, node: NodeId, kind: NodeKind) -> ValId {
    let n = self.ast().node(node);
    let lhs = self.expr(NodeId(n.a), TyId::BOOL);
    let lhs = self.coerce(NodeId(n.a), lhs, TyId::BOOL);
    let rhs = self.expr(NodeId(n.b), TyId::BOOL);
    let rhs = self.coerce(NodeId(n.b), rhs, TyId::BOOL);
    if lhs == ValId::ERROR || rhs == ValId::ERROR { return ValId::ERROR }
    if let (Some(x), Some(y)) = (self.as_int(lhs), self.as_int(rhs)) {
      let v = if kind == NodeKind::AndL { x != 0 && y != 0 } else { x != 0 || y != 0 };
      return self.int_const(i64::from(v), TyId::BOOL)
    }
    let (pat, arm, els) = if kind == NodeKind::AndL {
      let f = self.int_const(0, TyId::BOOL);
      (lhs, rhs, f)
    } else {
      let t = self.int_const(1, TyId::BOOL);
      (lhs, t, rhs)
    };
    let arms = self.tir.push_extra(&[2, pat.0, arm.0, 0, els.0]);
    self.temp(InstKind::Switch, node, 0, arms, TyId::BOOL)
  }

  fn address_of(&mut self, node: NodeId, hint: TyId) -> ValId {
    let n = self.ast().node(node);
    let inner_hint = match (hint != NO_HINT).then(|| self.tys.kind(hint)) {
      Some(&TyKind::Ptr(e) | &TyKind::PtrMut(e)) => e,
      _ => NO_HINT,
    };
    let a = self.expr(NodeId(n.a), inner_hint);
    if a == ValId::ERROR { return ValId::ERROR }
    let ty = self.vals.get(a).ty;
    let (kind, ptr) = match self.category(a) {
      Category::PlaceMut => (InstKind::AddrMut, TyKind::PtrMut(ty)),
      Category::Place => (InstKind::Addr, TyKind::Ptr(ty)),
      // A temporary gets hidden stack storage.
      Category::Temp => (InstKind::AddrTemp, TyKind::Ptr(ty)),
    };
    let ptr = self.tys.intern(ptr);
    self.temp(kind, node, a.0, 0, ptr)
  }

  fn field(&mut self, node: NodeId) -> ValId {
    let n = self.ast().node(node);
    let operand = NodeId(n.a);
    let name = Symbol(n.b);

    // Module member or enum scope access.
    if let Res::Def(_) = self.res(node) {
      return self.ident_value(node, name)
    }
    match self.role(operand) {
      Role::Invalid => return ValId::ERROR,
      Role::Type | Role::TagType => {
        let t = self.ty_expr(operand);
        if t == TyId::ERROR { return ValId::ERROR }
        let t = self.tys.strip_tags(t);
        if matches!(self.tys.kind(t), TyKind::Enum { .. }) {
          return self.enum_member(node, t, name)
        }
        self.error(node, diag::UNKNOWN_FIELD,
          format!("`{}` has no member `{}`", self.show(t), self.interner.get(name)));
        return ValId::ERROR
      }
      _ => {}
    }

    let a = self.expr(operand, NO_HINT);
    if a == ValId::ERROR { return ValId::ERROR }
    let ty = self.vals.get(a).ty;
    let stripped = self.tys.strip_tags(ty);
    let length = self.interner.intern("length");
    let data = self.interner.intern("data");
    match *self.tys.kind(stripped) {
      TyKind::Array { index, .. } if name == length => match *self.tys.kind(index) {
        TyKind::ArrayLen(len) => self.int_const(len, TyId::ISIZE),
        _ => self.temp(InstKind::SliceLen, node, a.0, 0, TyId::ISIZE),
      },
      TyKind::Slice(_) | TyKind::SliceMut(_) if name == length =>
        self.temp(InstKind::SliceLen, node, a.0, 0, TyId::ISIZE),
      TyKind::Slice(elem) if name == data => {
        let ptr = self.tys.intern(TyKind::Ptr(elem));
        self.temp(InstKind::SliceData, node, a.0, 0, ptr)
      }
      TyKind::SliceMut(elem) if name == data => {
        let ptr = self.tys.intern(TyKind::PtrMut(elem));
        self.temp(InstKind::SliceData, node, a.0, 0, ptr)
      }
      TyKind::Struct { scope, ref fields, .. } => {
        let fields = fields.clone();
        match self.scopes[scope].names.get(&name) {
          Some(&idx) => {
            let fty = fields[idx as usize];
            self.temp(InstKind::Field, node, a.0, idx, fty)
          }
          None => {
            self.error(node, diag::UNKNOWN_FIELD,
              format!("`{}` has no field `{}`", self.show(ty), self.interner.get(name)));
            ValId::ERROR
          }
        }
      }
      _ => {
        self.error(node, diag::UNKNOWN_FIELD,
          format!("`{}` has no field `{}`", self.show(ty), self.interner.get(name)));
        ValId::ERROR
      }
    }
  }

  // Calls: plain calls, constructors, and builtin macros.

  fn call(&mut self, node: NodeId) -> ValId {
    let n = self.ast().node(node);
    let callee = NodeId(n.a);
    let args: Vec<NodeId> = self.ast().list(n.b).iter().map(|&a| NodeId(a)).collect();
    match self.role(callee) {
      Role::Invalid => ValId::ERROR,
      Role::BuiltinMacro => self.builtin_call(node, callee, &args),
      Role::Type | Role::TagType => self.constructor(node, callee, &args),
      _ => self.plain_call(node, callee, &args),
    }
  }

  fn arg_count_error(&self, node: NodeId, want: usize, got: usize) {
    self.error(node, diag::ARG_COUNT, format!("expected {want} arguments, found {got}"));
  }

  fn builtin_call(&mut self, node: NodeId, callee: NodeId, args: &[NodeId]) -> ValId {
    // `zero_extend[W](e)` arrives with an IndexOp callee.
    let (builtin, width) = match self.res(callee) {
      Res::Macro(b) => (b, None),
      _ => {
        let cn = self.ast().node(callee);
        debug_assert_eq!(cn.kind, NodeKind::IndexOp);
        let Res::Macro(b) = self.res(NodeId(cn.a)) else { return ValId::ERROR };
        let wargs: Vec<NodeId> = self.ast().list(cn.b).iter().map(|&a| NodeId(a)).collect();
        if wargs.len() != 1 {
          self.error(callee, diag::INDEX_COUNT, "`zero_extend` expects one type argument");
          return ValId::ERROR
        }
        (b, Some(self.ty_expr(wargs[0])))
      }
    };
    match builtin {
      Builtin::SizeOf | Builtin::AlignOf => {
        if args.len() != 1 { self.arg_count_error(node, 1, args.len()); return ValId::ERROR }
        let t = self.ty_expr(args[0]);
        if t == TyId::ERROR { return ValId::ERROR }
        let (v, tag) = if builtin == Builtin::SizeOf {
          (self.tys.size_of(t), self.size_ty)
        } else {
          (self.tys.align_of(t), self.align_ty)
        };
        match v {
          Some(v) => self.int_const(v as i64, tag),
          None => {
            let code = if builtin == Builtin::SizeOf { diag::UNKNOWN_SIZE }
              else { diag::UNKNOWN_ALIGN };
            self.error(node, code, format!("`{}` has no known layout here", self.show(t)));
            ValId::ERROR
          }
        }
      }
      Builtin::ZeroExtend => {
        let Some(w) = width else {
          self.error(node, diag::INDEX_COUNT, "`zero_extend` needs a width argument");
          return ValId::ERROR
        };
        if w == TyId::ERROR { return ValId::ERROR }
        if args.len() != 1 { self.arg_count_error(node, 1, args.len()); return ValId::ERROR }
        if !self.tys.is_integer(w) {
          self.error(node, diag::EXPECTED_TYPE, "`zero_extend` width must be an integer type");
          return ValId::ERROR
        }
        let a = self.expr(args[0], w);
        if a == ValId::ERROR { return ValId::ERROR }
        let have = self.vals.get(a).ty;
        if !self.tys.is_integer(have) {
          self.error(node, diag::UNOP_MISMATCH, "`zero_extend` expects an integer value");
          return ValId::ERROR
        }
        if let Some(v) = self.as_int(a) {
          let bits = self.tys.size_of(have).unwrap_or(8) * 8;
          let masked = if bits >= 64 { v } else { v & ((1i64 << bits) - 1) };
          return self.int_const(truncate_int(masked, self.tys.kind(w)), w)
        }
        self.temp(InstKind::ZeroExt, node, a.0, 0, w)
      }
      Builtin::Slice => {
        if args.len() != 2 { self.arg_count_error(node, 2, args.len()); return ValId::ERROR }
        let len = self.expr(args[0], TyId::ISIZE);
        let len = self.coerce(args[0], len, TyId::ISIZE);
        let ptr = self.expr(args[1], NO_HINT);
        if len == ValId::ERROR || ptr == ValId::ERROR { return ValId::ERROR }
        let pty = self.vals.get(ptr).ty;
        let slice = match *self.tys.kind(pty) {
          TyKind::Ptr(elem) => TyKind::Slice(elem),
          TyKind::PtrMut(elem) => TyKind::SliceMut(elem),
          _ => {
            self.error(args[1], diag::SLICE_CTOR_POINTER,
              format!("`slice` expects a pointer, found `{}`", self.show(pty)));
            return ValId::ERROR
          }
        };
        let slice = self.tys.intern(slice);
        self.temp(InstKind::NewSlice, node, len.0, ptr.0, slice)
      }
      Builtin::Affine => {
        self.error(node, diag::EXPECTED_TYPE, "`Affine` needs a type argument before a call");
        ValId::ERROR
      }
    }
  }

  fn constructor(&mut self, node: NodeId, callee: NodeId, args: &[NodeId]) -> ValId {
    // A bare generic struct name infers its type arguments from the
    // constructor arguments; everything else resolves to a concrete type.
    if_chain! {
      if matches!(self.ast().kind(callee), NodeKind::Ident | NodeKind::FieldOp);
      if let Res::Def(d) = self.res(callee);
      if let Entity::Type(t) = self.entities[d];
      if let TyKind::Struct { tyargs, .. } = *self.tys.kind(t);
      if tyargs > 0;
      then { return self.generic_struct_ctor(node, t, tyargs, args) }
    }
    let t = self.ty_expr(callee);
    if t == TyId::ERROR { return ValId::ERROR }
    match self.tys.kind(t).clone() {
      TyKind::Struct { ref fields, .. } => {
        let fields = fields.clone();
        if args.len() != fields.len() {
          self.error(node, diag::FIELD_COUNT,
            format!("expected {} fields, found {}", fields.len(), args.len()));
          return ValId::ERROR
        }
        let mut vals = Vec::with_capacity(args.len());
        let mut failed = false;
        for (&arg, &fty) in args.iter().zip(fields.iter()) {
          let v = self.expr(arg, fty);
          let v = self.coerce(arg, v, fty);
          failed |= v == ValId::ERROR;
          vals.push(v.0);
        }
        if failed { return ValId::ERROR }
        let at = self.tir.push_list(&vals);
        self.temp(InstKind::CtorStruct, node, at, 0, t)
      }
      TyKind::Tagged { inner, .. } => {
        if args.len() != 1 { self.arg_count_error(node, 1, args.len()); return ValId::ERROR }
        let v = self.expr(args[0], inner);
        let v = self.coerce(args[0], v, inner);
        if v == ValId::ERROR { return ValId::ERROR }
        self.temp(InstKind::IdCast, node, v.0, 0, t)
      }
      TyKind::Linear(inner) => {
        if args.len() != 1 { self.arg_count_error(node, 1, args.len()); return ValId::ERROR }
        let v = self.expr(args[0], inner);
        let v = self.coerce(args[0], v, inner);
        if v == ValId::ERROR { return ValId::ERROR }
        self.temp(InstKind::IdCast, node, v.0, 0, t)
      }
      _ => {
        self.error(node, diag::NOT_A_FUNCTION,
          format!("`{}` is not constructible", self.show(t)));
        ValId::ERROR
      }
    }
  }

  fn generic_struct_ctor(&mut self, node: NodeId, t: TyId, tyargs: u32, args: &[NodeId]) -> ValId {
    let TyKind::Struct { ref fields, .. } = *self.tys.kind(t) else { unreachable!() };
    let fields = fields.clone();
    if args.len() != fields.len() {
      self.error(node, diag::FIELD_COUNT,
        format!("expected {} fields, found {}", fields.len(), args.len()));
      return ValId::ERROR
    }
    let mut vals = Vec::with_capacity(args.len());
    for (&arg, &fty) in args.iter().zip(fields.iter()) {
      let hint = if self.tys.flags(fty).contains(TyFlags::HAS_PARAM) { NO_HINT } else { fty };
      vals.push(self.expr(arg, hint));
    }
    let mut binds = vec![TyId::ERROR; tyargs as usize];
    let mut ok = true;
    for (&v, &fty) in vals.iter().zip(fields.iter()) {
      if v == ValId::ERROR { return ValId::ERROR }
      let vty = self.vals.get(v).ty;
      ok &= self.unify(fty, vty, &mut binds);
    }
    if !ok || binds.contains(&TyId::ERROR) {
      self.error(node, diag::TYARG_INFERENCE, "couldn't infer type arguments");
      return ValId::ERROR
    }
    let inst_ty = subst(&mut self.tys, t, &binds);
    let TyKind::Struct { ref fields, .. } = *self.tys.kind(inst_ty) else { unreachable!() };
    let fields = fields.clone();
    let mut words = Vec::with_capacity(vals.len());
    let mut failed = false;
    for ((&v, &fty), &arg) in vals.iter().zip(fields.iter()).zip(args.iter()) {
      let v = self.coerce(arg, v, fty);
      failed |= v == ValId::ERROR;
      words.push(v.0);
    }
    if failed { return ValId::ERROR }
    let at = self.tir.push_list(&words);
    self.temp(InstKind::CtorStruct, node, at, 0, inst_ty)
  }

  fn plain_call(&mut self, node: NodeId, callee: NodeId, args: &[NodeId]) -> ValId {
    let f = self.expr(callee, NO_HINT);
    if f == ValId::ERROR { return ValId::ERROR }
    let fty = self.vals.get(f).ty;
    let TyKind::Fn { tyargs, ref params, ret } = *self.tys.kind(fty) else {
      self.error(node, diag::NOT_A_FUNCTION,
        format!("`{}` is not a function", self.show(fty)));
      return ValId::ERROR
    };
    let params = params.clone();
    if args.len() != params.len() {
      self.arg_count_error(node, params.len(), args.len());
      return ValId::ERROR
    }

    let mut vals = Vec::with_capacity(args.len());
    for (&arg, &pty) in args.iter().zip(params.iter()) {
      let hint = if self.tys.flags(pty).contains(TyFlags::HAS_PARAM) { NO_HINT } else { pty };
      vals.push(self.expr(arg, hint));
    }

    let binds = if tyargs > 0 {
      let mut binds = vec![TyId::ERROR; tyargs as usize];
      let mut ok = true;
      for (&v, &pty) in vals.iter().zip(params.iter()) {
        if v == ValId::ERROR { return ValId::ERROR }
        let vty = self.vals.get(v).ty;
        ok &= self.unify(pty, vty, &mut binds);
      }
      if !ok || binds.contains(&TyId::ERROR) {
        self.error(node, diag::TYARG_INFERENCE, "couldn't infer type arguments");
        return ValId::ERROR
      }
      binds
    } else { vec![] };

    let mut words = Vec::with_capacity(args.len());
    let mut failed = false;
    for ((&v, &pty), &arg) in vals.iter().zip(params.iter()).zip(args.iter()) {
      if v == ValId::ERROR { failed = true; continue }
      let want = if binds.is_empty() { pty } else { subst(&mut self.tys, pty, &binds) };
      let v = self.coerce(arg, v, want);
      failed |= v == ValId::ERROR;
      words.push(v.0);
    }
    if failed { return ValId::ERROR }

    let mut extra = Vec::with_capacity(words.len() + binds.len() + 2);
    extra.push(words.len() as u32);
    extra.extend_from_slice(&words);
    extra.push(binds.len() as u32);
    extra.extend(binds.iter().map(|b| b.0));
    let at = self.tir.push_extra(&extra);
    let ret = if binds.is_empty() { ret } else { subst(&mut self.tys, ret, &binds) };
    self.temp(InstKind::Call, node, f.0, at, ret)
  }

  /// Structural unification binding each parameter index to its first
  /// witnessed type; a later disagreeing witness fails.
  fn unify(&mut self, param: TyId, arg: TyId, binds: &mut [TyId]) -> bool {
    if !self.tys.flags(param).contains(TyFlags::HAS_PARAM) { return true }
    let (pk, ak) = (self.tys.kind(param).clone(), self.tys.kind(arg).clone());
    match (pk, ak) {
      (TyKind::TyParam { index, .. }, _) => {
        let slot = &mut binds[index as usize];
        if *slot == TyId::ERROR { *slot = arg; true } else { *slot == arg }
      }
      (TyKind::Array { index: pi, elem: pe }, TyKind::Array { index: ai, elem: ae }) =>
        self.unify(pi, ai, binds) && self.unify(pe, ae, binds),
      (TyKind::ArrayLen(a), TyKind::ArrayLen(b)) => a == b,
      (TyKind::Ptr(p), TyKind::Ptr(a)) | (TyKind::PtrMut(p), TyKind::PtrMut(a))
      | (TyKind::Slice(p), TyKind::Slice(a)) | (TyKind::SliceMut(p), TyKind::SliceMut(a))
      | (TyKind::Linear(p), TyKind::Linear(a)) => self.unify(p, a, binds),
      (TyKind::Fn { params: pp, ret: pr, .. }, TyKind::Fn { params: ap, ret: ar, .. }) => {
        pp.len() == ap.len()
          && pp.iter().zip(ap.iter()).all(|(&p, &a)| self.unify(p, a, binds))
          && self.unify(pr, ar, binds)
      }
      (TyKind::Struct { scope: ps, args: pa, .. }, TyKind::Struct { scope: as_, args: aa, .. }) => {
        ps == as_ && pa.len() == aa.len()
          && pa.iter().zip(aa.iter()).all(|(&p, &a)| self.unify(p, a, binds))
      }
      (TyKind::Tagged { newtype: pn, args: pa, .. }, TyKind::Tagged { newtype: an, args: aa, .. }) => {
        pn == an && pa.len() == aa.len()
          && pa.iter().zip(aa.iter()).all(|(&p, &a)| self.unify(p, a, binds))
      }
      _ => false,
    }
  }

  fn index(&mut self, node: NodeId) -> ValId {
    let n = self.ast().node(node);
    let args: Vec<NodeId> = self.ast().list(n.b).iter().map(|&a| NodeId(a)).collect();
    let a = self.expr(NodeId(n.a), NO_HINT);
    if a == ValId::ERROR { return ValId::ERROR }
    if args.len() != 1 {
      self.error(node, diag::INDEX_COUNT, format!("expected 1 index, found {}", args.len()));
      return ValId::ERROR
    }
    let i = self.expr(args[0], TyId::ISIZE);
    let i = self.coerce(args[0], i, TyId::ISIZE);
    if i == ValId::ERROR { return ValId::ERROR }
    let ty = self.vals.get(a).ty;
    let stripped = self.tys.strip_tags(ty);
    match *self.tys.kind(stripped) {
      TyKind::Array { elem, .. } => self.temp(InstKind::Index, node, a.0, i.0, elem),
      TyKind::Slice(elem) | TyKind::SliceMut(elem) =>
        self.temp(InstKind::SliceIndex, node, a.0, i.0, elem),
      _ => {
        self.error(node, diag::INDEX_OPERAND,
          format!("`{}` cannot be indexed", self.show(ty)));
        ValId::ERROR
      }
    }
  }

  fn cast(&mut self, node: NodeId) -> ValId {
    let n = self.ast().node(node);
    let want = self.ty_expr(NodeId(n.b));
    let hint = if want != TyId::ERROR && self.tys.is_integer(want) { want } else { NO_HINT };
    let v = self.expr(NodeId(n.a), hint);
    if v == ValId::ERROR || want == TyId::ERROR { return ValId::ERROR }
    let have = self.vals.get(v).ty;
    if have == want { return v }

    // Tags are representation-transparent under explicit casts.
    let src = self.tys.strip_tags(have);
    let dst = self.tys.strip_tags(want);
    let src = self.enum_repr(src);
    let dst_repr = self.enum_repr(dst);

    let src_int = self.tys.is_integer(src);
    let dst_int = self.tys.is_integer(dst_repr);
    let src_float = self.tys.is_float(src);
    let dst_float = self.tys.is_float(dst_repr);
    let src_ptr = matches!(self.tys.kind(src), TyKind::Ptr(_) | TyKind::PtrMut(_));
    let dst_ptr = matches!(self.tys.kind(dst_repr), TyKind::Ptr(_) | TyKind::PtrMut(_));

    let permitted = (src_ptr && dst_ptr) || (src_int && dst_int)
      || (src_int && dst_float) || (src_float && dst_int) || (src_float && dst_float);
    if !permitted {
      self.error(node, diag::CAST_NOT_PERMITTED,
        format!("cannot cast `{}` to `{}`", self.show(have), self.show(want)));
      return ValId::ERROR
    }

    // Constant casts fold with bit-width-appropriate truncation.
    if let Some(x) = self.as_int(v) {
      if dst_int {
        let x = cast_int_const(x, self.tys.kind(src), self.tys.kind(dst_repr));
        return self.int_const(x, want)
      }
      if dst_float {
        return self.vals.push(ValKind::Float(x as f64), want)
      }
    }
    if let Some(x) = self.as_float(v) {
      if dst_float { return self.vals.push(ValKind::Float(x), want) }
      if dst_int {
        let x = truncate_int(x as i64, self.tys.kind(dst_repr));
        return self.int_const(x, want)
      }
    }
    self.temp(InstKind::Cast, node, v.0, have.0, want)
  }

  fn enum_repr(&self, t: TyId) -> TyId {
    match *self.tys.kind(t) {
      TyKind::Enum { repr, .. } => repr,
      _ => t,
    }
  }

  fn array_lit(&mut self, node: NodeId, hint: TyId) -> ValId {
    let n = self.ast().node(node);
    let elems: Vec<NodeId> = self.ast().list(n.a).iter().map(|&e| NodeId(e)).collect();
    if elems.is_empty() {
      self.error(node, diag::EMPTY_ARRAY, "array literal must have at least one element");
      return ValId::ERROR
    }
    let elem_hint = match (hint != NO_HINT).then(|| self.tys.kind(hint)) {
      Some(&TyKind::Array { elem, .. }) => elem,
      _ => NO_HINT,
    };
    let first = self.expr(elems[0], elem_hint);
    if first == ValId::ERROR { return ValId::ERROR }
    let elem_ty = self.vals.get(first).ty;
    let mut words = vec![first.0];
    let mut failed = false;
    for &e in &elems[1..] {
      let v = self.expr(e, elem_ty);
      let v = self.coerce(e, v, elem_ty);
      failed |= v == ValId::ERROR;
      words.push(v.0);
    }
    if failed { return ValId::ERROR }
    let index = self.tys.intern(TyKind::ArrayLen(elems.len() as i64));
    let ty = self.tys.intern(TyKind::Array { index, elem: elem_ty });
    let at = self.tir.push_list(&words);
    self.temp(InstKind::ArrayLit, node, at, 0, ty)
  }

  fn switch(&mut self, node: NodeId, hint: TyId) -> ValId {
    let n = self.ast().node(node);
    let at = n.b;
    let n_arms = self.ast().words(at, 1)[0] as usize;
    let arm_nodes: Vec<(NodeId, NodeId)> = (0..n_arms).map(|i| {
      let &[p, v] = self.ast().words(at + 1 + 2 * i as u32, 2) else { unreachable!() };
      (NodeId(p), NodeId(v))
    }).collect();

    let scrut = if n.a != 0 {
      let s = self.expr(NodeId(n.a), NO_HINT);
      if s == ValId::ERROR { return ValId::ERROR }
      Some(s)
    } else { None };
    let scrut_ty = scrut.map(|s| self.vals.get(s).ty);
    let pat_hint = scrut_ty.unwrap_or(TyId::BOOL);

    // Enum exhaustiveness bookkeeping.
    let enum_scope = scrut_ty.map(|t| self.tys.strip_tags(t)).and_then(|t| {
      match *self.tys.kind(t) { TyKind::Enum { scope, .. } => Some(scope), _ => None }
    });
    let mut seen = BitSet::new();
    let mut seen_other: Vec<i64> = vec![];
    let mut has_else = false;

    let mut result_ty = if hint != NO_HINT { hint } else { NO_HINT };
    let mut first_arm_ty = NO_HINT;
    let mut words = Vec::with_capacity(1 + 2 * n_arms);
    words.push(n_arms as u32);
    let mut failed = false;

    for (pat, val) in arm_nodes {
      let pat_val = if pat == NodeId(0) {
        if has_else {
          self.error(node, diag::DUPLICATE_CASE, "duplicate `else` arm");
          failed = true;
        }
        has_else = true;
        ValId(0)
      } else {
        let p = self.expr(pat, pat_hint);
        let p = self.coerce(pat, p, pat_hint);
        if p == ValId::ERROR { failed = true; ValId(0) }
        else {
          if let Some(c) = self.as_int(p) {
            let dup = if enum_scope.is_some() && c >= 0 {
              !seen.insert(c as usize)
            } else if seen_other.contains(&c) { true } else { seen_other.push(c); false };
            if dup {
              self.error(pat, diag::DUPLICATE_CASE, "this case is already covered");
              failed = true;
            }
          }
          p
        }
      };
      let want = if result_ty != NO_HINT { result_ty } else { first_arm_ty };
      let v = self.expr(val, want);
      if v == ValId::ERROR { failed = true; words.push(pat_val.0); words.push(0); continue }
      let vty = self.vals.get(v).ty;
      let v = if want == NO_HINT {
        first_arm_ty = vty;
        v
      } else {
        let v2 = self.coerce(val, v, want);
        if v2 == ValId::ERROR {
          // Re-report under the switch-specific code.
          self.error(val, diag::SWITCH_INCOMPATIBLE,
            format!("switch arms disagree: expected `{}`, found `{}`",
              self.show(want), self.show(vty)));
          failed = true;
          v
        } else { v2 }
      };
      words.push(pat_val.0);
      words.push(v.0);
    }

    if let Some(scope) = enum_scope {
      let members = self.scopes[scope].order.len();
      let covered = seen.len();
      if covered < members && !has_else {
        self.error(node, diag::SWITCH_NOT_EXHAUSTIVE,
          "switch must cover all possible values");
        failed = true;
      }
      if covered >= members && has_else {
        self.error(node, diag::UNREACHABLE_ELSE, "`else` arm is unreachable");
        failed = true;
      }
    } else if !has_else {
      self.error(node, diag::SWITCH_NOT_EXHAUSTIVE,
        "switch needs an `else` arm here");
      failed = true;
    }
    if failed { return ValId::ERROR }

    let ty = if result_ty != NO_HINT { result_ty } else { first_arm_ty };
    if ty == NO_HINT {
      self.error(node, diag::TYPE_INFERENCE, "cannot infer the switch result type");
      return ValId::ERROR
    }
    let extra = self.tir.push_extra(&words);
    self.temp(InstKind::Switch, node, scrut.map_or(0, |s| s.0), extra, ty)
  }

  // Statements.

  /// The assignment-target error, with the replace-`let`-with-`mut` note
  /// when the target is an immutable local.
  fn assign_target_error(&self, node: NodeId, place: ValId) {
    let mut notes = vec![];
    if let ValKind::Var(l) = self.vals.get(place).kind {
      let decl = &self.locals[l.into_usize()];
      if self.ast().kind(decl.node) == NodeKind::Let {
        notes.push(Note::here(self.file, self.span(decl.node),
          "consider replacing `let` with `mut`"));
      }
    }
    self.diags.error_with(self.file, self.span(node), diag::EXPECTED_FUNCTION_OR_MUT,
      "cannot assign here; expected a function or `mut` target", notes);
  }

  fn stmt(&mut self, node: NodeId, list: &mut Vec<u32>) -> bool {
    if node == NodeId(0) { return false }
    let n = self.ast().node(node);
    use NodeKind as N;
    match n.kind {
      N::Let | N::LetMut => {
        let parts = self.ast().let_parts(node);
        let ann = if parts.ty != NodeId(0) { self.ty_expr(parts.ty) } else { NO_HINT };
        let init = self.expr(parts.init, ann);
        let init = if ann != NO_HINT { self.coerce(parts.init, init, ann) } else { init };
        let ty = if ann != NO_HINT { ann }
          else if init != ValId::ERROR { self.vals.get(init).ty }
          else { TyId::ERROR };
        if ty == TyId::VOID {
          self.error(node, diag::TYPE_MISMATCH, "cannot bind a void value");
        }
        let mutable = n.kind == N::LetMut;
        let local = LocalId(self.locals.len() as u32);
        self.locals.push(LocalDecl { name: parts.name, ty, mutable, node });
        self.scope.push(ScopeEntry::Local(parts.name, local));
        let kind = if mutable { InstKind::LetMut } else { InstKind::Let };
        list.push(self.tir.push(kind, node, local.0, init.0).0);
        false
      }
      N::Assign => {
        let place = self.expr(NodeId(n.a), NO_HINT);
        if place != ValId::ERROR && self.category(place) != Category::PlaceMut {
          self.assign_target_error(NodeId(n.a), place);
        }
        let want = if place == ValId::ERROR { NO_HINT } else { self.vals.get(place).ty };
        let v = self.expr(NodeId(n.b), want);
        let v = if want != NO_HINT { self.coerce(NodeId(n.b), v, want) } else { v };
        if place != ValId::ERROR && v != ValId::ERROR {
          list.push(self.tir.push(InstKind::Assign, node, place.0, v.0).0);
        }
        false
      }
      N::OpAssign => {
        let &[op, place_node, value_node] = self.ast().words(n.a, 3) else { unreachable!() };
        let op = binop_from_u32(op);
        let place = self.expr(NodeId(place_node), NO_HINT);
        if place == ValId::ERROR { return false }
        if self.category(place) != Category::PlaceMut {
          self.assign_target_error(NodeId(place_node), place);
        }
        let ty = self.vals.get(place).ty;
        let bits_only = matches!(op,
          NodeKind::BitAnd | NodeKind::BitOr | NodeKind::BitXor | NodeKind::Shl | NodeKind::Shr);
        if !(self.tys.is_integer(ty) || (!bits_only && self.tys.is_float(ty))) {
          self.error(node, diag::BINOP_MISMATCH,
            format!("operator is not defined on `{}`", self.show(ty)));
          return false
        }
        let v = self.expr(NodeId(value_node), ty);
        let v = self.coerce(NodeId(value_node), v, ty);
        if v == ValId::ERROR { return false }
        let op_val = self.temp(arith_inst(op), node, place.0, v.0, ty);
        list.push(self.tir.push(InstKind::Assign, node, place.0, op_val.0).0);
        false
      }
      N::Return => {
        let want = self.ret;
        if n.a == 0 {
          if want != TyId::VOID {
            self.error(node, diag::RETURN_VALUE_MISMATCH,
              "this function returns a value");
          }
          list.push(self.tir.push(InstKind::RetVoid, node, 0, 0).0);
        } else if want == TyId::VOID {
          self.error(node, diag::RETURN_VALUE_MISMATCH,
            "this function does not return a value");
          // Analyze anyway for further diagnostics.
          let _ = self.expr(NodeId(n.a), NO_HINT);
          list.push(self.tir.push(InstKind::RetVoid, node, 0, 0).0);
        } else {
          let v = self.expr(NodeId(n.a), want);
          let v = self.coerce(NodeId(n.a), v, want);
          list.push(self.tir.push(InstKind::Ret, node, v.0, 0).0);
        }
        true
      }
      N::Break | N::Continue => {
        if self.loop_depth == 0 {
          let (code, what) = if n.kind == N::Break {
            (diag::MISPLACED_BREAK, "break")
          } else { (diag::MISPLACED_CONTINUE, "continue") };
          self.error(node, code, format!("`{what}` outside of a loop"));
          return false
        }
        let kind = if n.kind == N::Break { InstKind::Break } else { InstKind::Continue };
        list.push(self.tir.push(kind, node, 0, 0).0);
        true
      }
      N::If => {
        let &[then_node, else_node] = self.ast().words(n.b, 2) else { unreachable!() };
        let cond = self.expr(NodeId(n.a), TyId::BOOL);
        let cond = self.coerce(NodeId(n.a), cond, TyId::BOOL);
        let (then_blk, then_term) = self.stmt_block(NodeId(then_node));
        let (else_blk, else_term) = if else_node != 0 {
          self.stmt_block(NodeId(else_node))
        } else { (0, false) };
        if cond == ValId::ERROR { return false }
        let at = self.tir.push_extra(&[then_blk, else_blk]);
        list.push(self.tir.push(InstKind::If, node, cond.0, at).0);
        then_term && else_term && else_node != 0
      }
      N::While => {
        let cond = self.expr(NodeId(n.a), TyId::BOOL);
        let cond = self.coerce(NodeId(n.a), cond, TyId::BOOL);
        self.loop_depth += 1;
        let (body_blk, _) = self.stmt_block(NodeId(n.b));
        self.loop_depth -= 1;
        if cond == ValId::ERROR { return false }
        let at = self.tir.push_extra(&[body_blk, 0]);
        list.push(self.tir.push(InstKind::While, node, cond.0, at).0);
        false
      }
      N::For => {
        let &[init, cond_node, step, body] = self.ast().words(n.a, 4) else { unreachable!() };
        // The initializer is hoisted in front of the loop; its binding
        // scopes over the condition, step, and body.
        self.push_scope();
        self.stmt(NodeId(init), list);
        let cond = self.expr(NodeId(cond_node), TyId::BOOL);
        let cond = self.coerce(NodeId(cond_node), cond, TyId::BOOL);
        self.loop_depth += 1;
        let (body_blk, _) = self.stmt_block(NodeId(body));
        let mut step_list = vec![];
        self.stmt(NodeId(step), &mut step_list);
        self.loop_depth -= 1;
        let next_blk = self.tir.push_list(&step_list);
        self.pop_scope();
        if cond == ValId::ERROR { return false }
        let at = self.tir.push_extra(&[body_blk, next_blk]);
        list.push(self.tir.push(InstKind::While, node, cond.0, at).0);
        false
      }
      N::Block => {
        let (blk, term) = self.stmt_block(node);
        // Splice: a bare block still brackets its scope, so keep it as an
        // `if true`-free construct by inlining its statements.
        for &i in self.tir.list(blk).to_vec().iter() { list.push(i) }
        term
      }
      _ => {
        // Expression statement.
        let v = self.expr(node, NO_HINT);
        if v != ValId::ERROR {
          list.push(self.tir.push(InstKind::Eval, node, v.0, 0).0);
        }
        false
      }
    }
  }

  /// Analyze a block (or a lone trailing `if`) into a statement list in the
  /// extras buffer, returning `(list index, definitely terminates)`.
  fn stmt_block(&mut self, node: NodeId) -> (u32, bool) {
    if node == NodeId(0) { return (0, false) }
    self.push_scope();
    let mut list = vec![];
    let mut term = false;
    if self.ast().kind(node) == NodeKind::Block {
      let stmts: Vec<NodeId> =
        self.ast().list(self.ast().node(node).a).iter().map(|&s| NodeId(s)).collect();
      for s in stmts {
        term |= self.stmt(s, &mut list);
      }
    } else {
      // `else if` chains arrive as a bare `if` statement.
      term = self.stmt(node, &mut list);
    }
    self.pop_scope();
    (self.tir.push_list(&list), term)
  }
}

// Integer helpers.

fn int_fits(v: i64, kind: &TyKind) -> bool {
  match kind {
    TyKind::I8 => i8::try_from(v).is_ok(),
    TyKind::I16 => i16::try_from(v).is_ok(),
    TyKind::I32 => i32::try_from(v).is_ok(),
    TyKind::I64 | TyKind::Isize => true,
    TyKind::Char | TyKind::Byte => (0..=255).contains(&v),
    TyKind::Bool => (0..=1).contains(&v),
    _ => false,
  }
}

/// Truncate a constant to the width of `kind`, two's complement.
fn truncate_int(v: i64, kind: &TyKind) -> i64 {
  match kind {
    TyKind::I8 => v as i8 as i64,
    TyKind::I16 => v as i16 as i64,
    TyKind::I32 => v as i32 as i64,
    TyKind::Char | TyKind::Byte => v as u8 as i64,
    TyKind::Bool => i64::from(v != 0),
    _ => v,
  }
}

/// Explicit int-to-int constant cast: truncate to the source width first
/// (char zero-extends, signed types sign-extend), then to the target.
fn cast_int_const(v: i64, src: &TyKind, dst: &TyKind) -> i64 {
  truncate_int(truncate_int(v, src), dst)
}

fn arith_inst(kind: NodeKind) -> InstKind {
  match kind {
    NodeKind::Add => InstKind::Add,
    NodeKind::Sub => InstKind::Sub,
    NodeKind::Mul => InstKind::Mul,
    NodeKind::Div => InstKind::Div,
    NodeKind::Rem => InstKind::Rem,
    NodeKind::BitAnd => InstKind::BitAnd,
    NodeKind::BitOr => InstKind::BitOr,
    NodeKind::BitXor => InstKind::BitXor,
    NodeKind::Shl => InstKind::Shl,
    NodeKind::Shr => InstKind::Shr,
    k => panic!("not an arithmetic operator: {k:?}"),
  }
}

fn compare_inst(kind: NodeKind) -> InstKind {
  match kind {
    NodeKind::EqEq => InstKind::Eq,
    NodeKind::Ne => InstKind::Ne,
    NodeKind::Lt => InstKind::Lt,
    NodeKind::Le => InstKind::Le,
    NodeKind::Gt => InstKind::Gt,
    NodeKind::Ge => InstKind::Ge,
    k => panic!("not a comparison: {k:?}"),
  }
}

fn compare_fold<T: PartialOrd>(kind: NodeKind, x: &T, y: &T) -> bool {
  match kind {
    NodeKind::EqEq => x == y,
    NodeKind::Ne => x != y,
    NodeKind::Lt => x < y,
    NodeKind::Le => x <= y,
    NodeKind::Gt => x > y,
    NodeKind::Ge => x >= y,
    k => panic!("not a comparison: {k:?}"),
  }
}

fn binop_from_u32(op: u32) -> NodeKind {
  for k in [
    NodeKind::Add, NodeKind::Sub, NodeKind::Mul, NodeKind::Div, NodeKind::Rem,
    NodeKind::BitAnd, NodeKind::BitOr, NodeKind::BitXor, NodeKind::Shl, NodeKind::Shr,
  ] {
    if k as u32 == op { return k }
  }
  panic!("bad compound-assignment operator {op}")
}

// The declaration phase.

/// Process definitions in dependency order, populating the global type and
/// value partitions.
#[must_use] pub fn declare(
  files: &[ParsedFile],
  resolved: &Resolved,
  interner: &Interner,
  diags: &DiagSink,
) -> GlobalEnv {
  let mut types = Types::default();
  let mut values = Values::default();
  let mut scopes: IdxVec<ScopeId, MemberScope> = IdxVec::default();
  let mut entities: IdxVec<DefId, Entity> =
    (0..resolved.defs.len()).map(|_| Entity::Invalid).collect();
  let mut entry = None;
  let mut extern_names: HashMap<Symbol, (FileId, Span)> = HashMap::default();

  // The builtin tag types carried by `size_of`/`align_of` results.
  let mk_tag = |types: &mut Types, name: &str| {
    let decl = types.fresh_newtype_decl();
    let name = interner.intern(name);
    let nt = types.intern(TyKind::Newtype { decl, name, arity: 0, inner: TyId::ISIZE });
    types.intern(TyKind::Tagged { newtype: nt, inner: TyId::ISIZE, args: Box::new([]) })
  };
  let size_ty = mk_tag(&mut types, "Size");
  let align_ty = mk_tag(&mut types, "Align");

  for &d in &resolved.order {
    let def = resolved.defs[d].clone();
    if resolved.role(def.file, def.node) == Role::Invalid { continue }
    let ast = &files[def.file.into_usize()].ast;
    let mangled = |interner: &Interner| {
      interner.intern(&format!("file{}_{}", def.file.0, interner.get(def.name)))
    };

    let mut cx = Analyzer {
      files, resolved, interner, diags,
      scopes: &scopes,
      entities: &entities,
      size_ty, align_ty,
      file: def.file,
      tys: TyStore::Global(&mut types),
      vals: ValStore::Global(&mut values),
      tir: Tir::default(),
      locals: vec![],
      scope: vec![],
      scope_marks: vec![],
      loop_depth: 0,
      ret: TyId::VOID,
    };

    match ast.kind(def.node) {
      NodeKind::Func => {
        let parts = ast.func(def.node);
        let typarams = parts.typaram_syms();
        for (i, &tp) in typarams.iter().enumerate() {
          let t = cx.tys.intern(TyKind::TyParam { index: i as u32, name: tp });
          cx.scope.push(ScopeEntry::TyParam(tp, t));
        }
        let params: Vec<TyId> =
          parts.param_pairs().iter().map(|&(_, t)| cx.ty_expr(t)).collect();
        let ret = if parts.ret != NodeId(0) { cx.ty_expr(parts.ret) } else { TyId::VOID };
        drop(cx);
        let tyargs = typarams.len() as u32;
        let fnty = types.intern(TyKind::Fn { tyargs, params: params.into(), ret });
        let is_main = interner.get(def.name) == "main";
        let name = if is_main { def.name } else { mangled(interner) };
        if is_main {
          let TyKind::Fn { ref params, .. } = *types.kind(fnty) else { unreachable!() };
          if !params.is_empty() || ret != TyId::VOID || tyargs != 0 {
            diags.error(def.file, ast.span(def.node), diag::MAIN_SIGNATURE,
              "`main` takes no parameters and returns nothing");
          } else if entry.is_some() {
            diags.error(def.file, ast.span(def.node), diag::MULTIPLE_DEFINITION,
              "multiple definition of `main`");
          } else {
            entry = Some(d);
          }
        }
        let val = values.push(ValKind::Func { name, def: d }, fnty);
        entities[d] = Entity::Func { val, ty: fnty, def: d };
      }

      NodeKind::ExternFunc => {
        let parts = ast.extern_func(def.node);
        let params: Vec<TyId> =
          parts.param_pairs().iter().map(|&(_, t)| cx.ty_expr(t)).collect();
        let ret = if parts.ret != NodeId(0) { cx.ty_expr(parts.ret) } else { TyId::VOID };
        drop(cx);
        let fnty = types.intern(TyKind::Fn { tyargs: 0, params: params.into(), ret });
        check_extern(&mut extern_names, diags, files, def.file, def.node, def.name, interner);
        let val = values.push(ValKind::ExternFunc(def.name), fnty);
        entities[d] = Entity::ExternFunc { val, ty: fnty };
      }

      NodeKind::ExternMut => {
        let at = ast.node(def.node).b;
        let ty = cx.ty_expr(NodeId(ast.words(at, 2)[1]));
        drop(cx);
        check_extern(&mut extern_names, diags, files, def.file, def.node, def.name, interner);
        let val = values.push(ValKind::ExternVar(def.name), ty);
        entities[d] = Entity::ExternVar { val, ty };
      }

      NodeKind::StructDef => {
        let parts = ast.struct_def(def.node);
        let typarams = parts.typaram_syms();
        let mut targs = Vec::with_capacity(typarams.len());
        for (i, &tp) in typarams.iter().enumerate() {
          let t = cx.tys.intern(TyKind::TyParam { index: i as u32, name: tp });
          targs.push(t);
          cx.scope.push(ScopeEntry::TyParam(tp, t));
        }
        let field_pairs = parts.field_pairs();
        let fields: Vec<TyId> = field_pairs.iter().map(|&(_, t)| cx.ty_expr(t)).collect();
        drop(cx);
        if fields.is_empty() {
          diags.error(def.file, ast.span(def.node), diag::EMPTY_STRUCT,
            "struct must have at least one field");
          continue
        }
        let mut scope = MemberScope::default();
        for (i, &(fname, fnode)) in field_pairs.iter().enumerate() {
          if scope.insert(fname).is_err() {
            diags.error(def.file, ast.span(fnode), diag::DUPLICATE_FIELD,
              format!("duplicate field `{}` (field {})", interner.get(fname), i + 1));
          }
        }
        let scope = scopes.push(scope);
        let linear = fields.iter().any(|&f| types.is_affine(f));
        let (size, align) = ty::struct_layout(&types, &fields).unwrap_or((0, 1));
        let ty = types.intern(TyKind::Struct {
          scope,
          name: def.name,
          align: align as u32,
          size: size as u32,
          tyargs: typarams.len() as u32,
          fields: fields.into(),
          linear,
          args: targs.into(),
        });
        entities[d] = Entity::Type(ty);
      }

      NodeKind::EnumDef => {
        let parts = ast.enum_def(def.node);
        let repr = cx.ty_expr(parts.repr);
        drop(cx);
        if repr != TyId::ERROR && !types.is_integer(repr) {
          diags.error(def.file, ast.span(parts.repr), diag::ENUM_REPR_NOT_INT,
            format!("enum representation must be an integer type, found `{}`",
              types.display(repr, interner)));
          continue
        }
        let mut scope = MemberScope::default();
        for &m in &parts.member_syms() {
          if scope.insert(m).is_err() {
            diags.error(def.file, ast.span(def.node), diag::DUPLICATE_ENUM_MEMBER,
              format!("duplicate enum member `{}`", interner.get(m)));
          }
        }
        let scope = scopes.push(scope);
        let ty = types.intern(TyKind::Enum { scope, name: def.name, repr });
        entities[d] = Entity::Type(ty);
      }

      NodeKind::NewtypeDef => {
        let parts = ast.newtype_def(def.node);
        let inner = cx.ty_expr(parts.inner);
        drop(cx);
        if inner == TyId::ERROR { continue }
        let decl = types.fresh_newtype_decl();
        let ty = types.intern(TyKind::Newtype {
          decl, name: def.name, arity: parts.arity, inner,
        });
        entities[d] = Entity::TagType(ty);
      }

      NodeKind::ConstDef => {
        let parts = ast.const_def(def.node);
        match resolved.role(def.file, def.node) {
          Role::TagType => {
            // An alias of a tag type keeps the tag-type entity.
            drop(cx);
            if let Res::Def(target) = resolved.resolution(def.file, parts.value) {
              entities[d] = entities[target].clone();
            }
          }
          Role::Type => {
            let t = cx.ty_expr(parts.value);
            drop(cx);
            if t != TyId::ERROR { entities[d] = Entity::Type(t) }
          }
          _ => {
            let v = cx.expr(parts.value, NO_HINT);
            drop(cx);
            if v == ValId::ERROR { continue }
            match values.get(v).kind {
              ValKind::Int(_) | ValKind::Float(_) | ValKind::Str(_) | ValKind::Null
              | ValKind::Func { .. } | ValKind::ExternFunc(_) => {
                entities[d] = Entity::Const(v);
              }
              _ => {
                diags.error(def.file, ast.span(parts.value), diag::NOT_CONSTANT,
                  "constant initializer must be a compile-time constant");
              }
            }
          }
        }
      }

      k => panic!("non-definition node {k:?} in dependency order"),
    }
  }

  GlobalEnv { types, values, scopes, entities, entry, size_ty, align_ty }
}

fn check_extern(
  extern_names: &mut HashMap<Symbol, (FileId, Span)>,
  diags: &DiagSink,
  files: &[ParsedFile],
  file: FileId,
  node: NodeId,
  name: Symbol,
  interner: &Interner,
) {
  let span = files[file.into_usize()].ast.span(node);
  match extern_names.entry(name) {
    hashbrown::hash_map::Entry::Vacant(e) => { e.insert((file, span)); }
    hashbrown::hash_map::Entry::Occupied(e) => {
      let (pfile, pspan) = *e.get();
      diags.error_with(file, span, diag::MULTIPLE_EXTERN,
        format!("multiple extern definitions of `{}`", interner.get(name)),
        vec![Note::here(pfile, pspan, "previous definition is here")]);
    }
  }
}

// The body phase.

struct RawBody {
  def: DefId,
  file: FileId,
  name: Symbol,
  tir: Tir,
  root_blk: u32,
  locals: Vec<LocalDecl>,
  params: u32,
  ret: TyId,
  tyargs: u32,
  tys_base: u32,
  tys_local: Vec<TyKind>,
  vals_base: u32,
  vals_local: Vec<Val>,
}

fn analyze_fn(
  env: &GlobalEnv,
  files: &[ParsedFile],
  resolved: &Resolved,
  interner: &Interner,
  diags: &DiagSink,
  d: DefId,
) -> RawBody {
  let def = &resolved.defs[d];
  let ast = &files[def.file.into_usize()].ast;
  let parts = ast.func(def.node);
  let Entity::Func { val, ty: fnty, .. } = env.entities[d] else {
    panic!("body phase on a non-function definition")
  };
  let ValKind::Func { name, .. } = env.values.get(val).kind else {
    panic!("function entity without function value")
  };
  let TyKind::Fn { tyargs, ref params, ret } = *env.types.kind(fnty) else {
    panic!("function entity without function type")
  };
  let params = params.clone();

  let mut cx = Analyzer {
    files, resolved, interner, diags,
    scopes: &env.scopes,
    entities: &env.entities,
    size_ty: env.size_ty,
    align_ty: env.align_ty,
    file: def.file,
    tys: TyStore::Local(LocalTypes::new(&env.types)),
    vals: ValStore::Local(LocalValues::new(&env.values)),
    tir: Tir::default(),
    locals: vec![],
    scope: vec![],
    scope_marks: vec![],
    loop_depth: 0,
    ret,
  };
  cx.push_scope();
  for (i, &tp) in parts.typaram_syms().iter().enumerate() {
    let t = cx.tys.intern(TyKind::TyParam { index: i as u32, name: tp });
    cx.scope.push(ScopeEntry::TyParam(tp, t));
  }
  for (&(pname, pnode), &pty) in parts.param_pairs().iter().zip(params.iter()) {
    let l = LocalId(cx.locals.len() as u32);
    cx.locals.push(LocalDecl { name: pname, ty: pty, mutable: false, node: pnode });
    cx.scope.push(ScopeEntry::Local(pname, l));
  }
  let (root_blk, terminates) = cx.stmt_block(parts.body);
  if ret != TyId::VOID && !terminates {
    diags.error(def.file, ast.span(parts.body), diag::MISSING_RETURN,
      "this function can fall off the end without returning");
  }
  cx.pop_scope();

  let Analyzer { tys, vals, tir, locals, .. } = cx;
  let TyStore::Local(tys) = tys else { unreachable!() };
  let ValStore::Local(vals) = vals else { unreachable!() };
  let (tys_base, tys_local) = tys.into_parts();
  let (vals_base, vals_local) = vals.into_parts();
  RawBody {
    def: d,
    file: def.file,
    name,
    tir,
    root_blk,
    locals,
    params: params.len() as u32,
    ret,
    tyargs,
    tys_base,
    tys_local,
    vals_base,
    vals_local,
  }
}

/// Fold one body's local partitions into the global tables and remap every
/// type reference it holds.
fn finish_body(env: &mut GlobalEnv, mut raw: RawBody) -> FnBody {
  let base = raw.tys_base;
  let remap = env.types.merge(base, raw.tys_local);
  let map = |t: TyId| if t.0 < base { t } else { remap[(t.0 - base) as usize] };

  for v in &mut raw.vals_local { v.ty = map(v.ty) }
  for l in &mut raw.locals { l.ty = map(l.ty) }
  raw.ret = map(raw.ret);
  let call_extras: Vec<u32> = raw.tir.insts.iter()
    .filter(|i| i.kind == InstKind::Call).map(|i| i.b).collect();
  for inst in &mut raw.tir.insts {
    if inst.kind == InstKind::Cast { inst.b = map(TyId(inst.b)).0 }
  }
  for at in call_extras {
    let at = at as usize;
    let nargs = raw.tir.extra[at] as usize;
    let nty_at = at + 1 + nargs;
    let ntys = raw.tir.extra[nty_at] as usize;
    for k in 0..ntys {
      let p = nty_at + 1 + k;
      raw.tir.extra[p] = map(TyId(raw.tir.extra[p])).0;
    }
  }

  FnBody {
    def: raw.def,
    file: raw.file,
    name: raw.name,
    tir: raw.tir,
    root_blk: raw.root_blk,
    locals: raw.locals,
    params: raw.params,
    vals_base: raw.vals_base,
    vals: raw.vals_local,
    ret: raw.ret,
    tyargs: raw.tyargs,
  }
}

/// Analyze every function body, in parallel, then fold the thread-local
/// partitions back into the global tables.
#[must_use] pub fn analyze_bodies(
  env: &mut GlobalEnv,
  files: &[ParsedFile],
  resolved: &Resolved,
  interner: &Interner,
  diags: &DiagSink,
) -> Vec<FnBody> {
  let fns: Vec<DefId> = env.entities.enum_iter()
    .filter_map(|(d, e)| matches!(e, Entity::Func { .. }).then_some(d))
    .collect();
  log::debug!("body phase: {} functions", fns.len());
  let raws: Vec<RawBody> = {
    let env = &*env;
    fns.par_iter()
      .map(|&d| analyze_fn(env, files, resolved, interner, diags, d))
      .collect()
  };
  raws.into_iter().map(|raw| finish_body(env, raw)).collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::lexer::lex;
  use crate::parser::parse;

  fn analyze(sources: &[&str]) -> (GlobalEnv, Vec<FnBody>, Vec<diag::Diag>, Interner) {
    let interner = Interner::default();
    let diags = DiagSink::default();
    let files: Vec<ParsedFile> = sources.iter().enumerate().map(|(i, text)| {
      let toks = lex(text, FileId(i as u32), &interner, &diags);
      let (ast, root) = parse(&toks, FileId(i as u32), &diags);
      ParsedFile { ast, root }
    }).collect();
    let resolved = crate::roles::run(&files, &interner, &diags);
    let mut env = declare(&files, &resolved, &interner, &diags);
    let bodies = analyze_bodies(&mut env, &files, &resolved, &interner, &diags);
    (env, bodies, diags.into_sorted(), interner)
  }

  fn codes(diags: &[diag::Diag]) -> Vec<diag::ECode> {
    diags.iter().map(|d| d.code).collect()
  }

  #[test]
  fn fib_compiles() {
    let (_, bodies, diags, _) = analyze(&[
      "module m function fib(n i32) -> i32 { if n < 2 { return n } return fib(n-1) + fib(n-2) } \
       function main() { }",
    ]);
    assert!(diags.is_empty(), "{diags:#?}");
    assert_eq!(bodies.len(), 2);
  }

  #[test]
  fn slice_sum_compiles() {
    let (_, _, diags, _) = analyze(&[
      "module m function sum(xs @i32) -> i32 { \
         mut s = 0; for mut i = 0; i < xs.length; i += 1 { s += xs[i] } return s } \
       function main() { }",
    ]);
    assert!(diags.is_empty(), "{diags:#?}");
  }

  #[test]
  fn generic_inference_binds_i64() {
    let (env, bodies, diags, interner) = analyze(&[
      "module m function id[T](x T) -> T { return x } function main() { const y = id(7) }",
    ]);
    assert!(diags.is_empty(), "{diags:#?}");
    let main = bodies.iter().find(|b| interner.get(b.name) == "main").expect("main body");
    let call = main.tir.insts.iter().find(|i| i.kind == InstKind::Call).expect("call inst");
    let (_, tyargs) = main.tir.call_parts(call.b);
    assert_eq!(tyargs, &[TyId::I64.0], "T binds to i64");
    let _ = env;
  }

  #[test]
  fn tyarg_inference_conflict_fails() {
    let (_, _, diags, _) = analyze(&[
      "module m function pick[T](a T, b T) -> T { return a } \
       function main() { pick(1.5, 2) }",
    ]);
    assert!(codes(&diags).contains(&diag::TYARG_INFERENCE), "{diags:#?}");
  }

  #[test]
  fn switch_exhaustiveness() {
    let (_, _, diags, _) = analyze(&[
      "module m enum Color: i32 { R, G, B } \
       function k(c Color) -> i32 { return switch c { .R -> 0, .G -> 1 } } function main() { }",
    ]);
    let d = diags.iter().find(|d| d.code == diag::SWITCH_NOT_EXHAUSTIVE)
      .expect("exhaustiveness error");
    assert!(d.msg.contains("switch must cover all possible values"), "{d:?}");
  }

  #[test]
  fn exhaustive_switch_with_else_is_unreachable() {
    let (_, _, diags, _) = analyze(&[
      "module m enum Color: i32 { R, G } \
       function k(c Color) -> i32 { return switch c { .R -> 0, .G -> 1, else -> 2 } } \
       function main() { }",
    ]);
    assert!(codes(&diags).contains(&diag::UNREACHABLE_ELSE), "{diags:#?}");
  }

  #[test]
  fn duplicate_switch_case() {
    let (_, _, diags, _) = analyze(&[
      "module m enum Color: i32 { R, G } \
       function k(c Color) -> i32 { return switch c { .R -> 0, .R -> 1, else -> 2 } } \
       function main() { }",
    ]);
    assert!(codes(&diags).contains(&diag::DUPLICATE_CASE), "{diags:#?}");
  }

  #[test]
  fn switch_first_arm_fixes_type_without_hint() {
    let (_, _, diags, _) = analyze(&[
      "module m function main() { let x = switch { true -> 1.5, else -> 2 } }",
    ]);
    // The second arm (integer) cannot convert to the first arm's f64.
    assert!(codes(&diags).contains(&diag::SWITCH_INCOMPATIBLE), "{diags:#?}");
  }

  #[test]
  fn constant_folding_guards() {
    let (_, _, diags, _) = analyze(&[
      "module m \
       const a = 9223372036854775807 + 1 \
       const b = 1 / 0 \
       const c = 1 << -1 \
       function main() { }",
    ]);
    let codes = codes(&diags);
    assert!(codes.contains(&diag::CONST_OVERFLOW), "{diags:#?}");
    assert!(codes.contains(&diag::CONST_DIV_ZERO), "{diags:#?}");
    assert!(codes.contains(&diag::CONST_SHIFT_NEGATIVE), "{diags:#?}");
  }

  #[test]
  fn folded_casts_truncate() {
    let (env, _, diags, _) = analyze(&[
      "module m const a = 511 as i8; const b = 200 as char; function main() { }",
    ]);
    assert!(diags.is_empty(), "{diags:#?}");
    let consts: Vec<i64> = env.entities.0.iter().filter_map(|e| match e {
      Entity::Const(v) => match env.values.get(*v).kind {
        ValKind::Int(n) => Some(n),
        _ => None,
      },
      _ => None,
    }).collect();
    assert!(consts.contains(&-1), "511 as i8 is -1: {consts:?}");
    assert!(consts.contains(&200), "200 as char zero-extends: {consts:?}");
  }

  #[test]
  fn size_of_folds_with_tag() {
    let (env, _, diags, _) = analyze(&[
      "module m struct P { a i8, b i32, c i8 } const s = `size_of(P) \
       const t = `align_of(i64) function main() { }",
    ]);
    assert!(diags.is_empty(), "{diags:#?}");
    let vals: Vec<(i64, TyId)> = env.entities.0.iter().filter_map(|e| match e {
      Entity::Const(v) => match env.values.get(*v).kind {
        ValKind::Int(n) => Some((n, env.values.get(*v).ty)),
        _ => None,
      },
      _ => None,
    }).collect();
    assert!(vals.contains(&(12, env.size_ty)), "{vals:?}");
    assert!(vals.contains(&(8, env.align_ty)), "{vals:?}");
  }

  #[test]
  fn implicit_conversions_follow_the_table() {
    let (_, _, diags, _) = analyze(&[
      "module m \
       function takes_slice(xs @i32) { } \
       function takes_mut_slice(xs @mut i32) { } \
       function takes_const(p *i32) { } \
       function takes_bytes(p *byte) { } \
       function takes_mut_bytes(p *mut byte) { } \
       function downgrade(xs @mut i32) { takes_slice(xs) } \
       function main() { \
         mut arr i32[3] = [1, 2, 3] \
         takes_mut_slice(&arr) \
         takes_slice(&arr) \
         mut x i32 = 5 \
         takes_const(&x) \
         takes_bytes(&x) \
         takes_mut_bytes(&x) \
       }",
    ]);
    assert!(diags.is_empty(), "{diags:#?}");
  }

  #[test]
  fn immutable_pointers_do_not_become_mutable() {
    let (_, _, diags, _) = analyze(&[
      "module m \
       function takes_mut(p *mut i32) { } \
       function main() { let x = 5; takes_mut(&x) }",
    ]);
    assert!(codes(&diags).contains(&diag::TYPE_MISMATCH), "{diags:#?}");
  }

  #[test]
  fn tagged_converts_to_inner() {
    let (_, _, diags, _) = analyze(&[
      "module m newtype Fd = i32 \
       function raw(x i32) -> i32 { return x } \
       function main() { let f = Fd(3); raw(f) }",
    ]);
    assert!(diags.is_empty(), "{diags:#?}");
  }

  #[test]
  fn cast_permission_errors() {
    let (_, _, diags, _) = analyze(&[
      "module m struct S { x i32 } \
       function main() { let s = S(1); let p = s as *byte }",
    ]);
    assert!(codes(&diags).contains(&diag::CAST_NOT_PERMITTED), "{diags:#?}");
  }

  #[test]
  fn flow_errors() {
    let (_, _, diags, _) = analyze(&[
      "module m \
       function f() -> i32 { if true { return 1 } } \
       function g() { break } \
       function main(x i32) { }",
    ]);
    let codes = codes(&diags);
    assert!(codes.contains(&diag::MISSING_RETURN), "{diags:#?}");
    assert!(codes.contains(&diag::MISPLACED_BREAK), "{diags:#?}");
    assert!(codes.contains(&diag::MAIN_SIGNATURE), "{diags:#?}");
  }

  #[test]
  fn empty_array_literal_is_an_error() {
    let (_, _, diags, _) = analyze(&["module m function main() { let x = [] }"]);
    assert!(codes(&diags).contains(&diag::EMPTY_ARRAY), "{diags:#?}");
  }

  #[test]
  fn assignment_needs_a_mutable_place() {
    let (_, _, diags, _) = analyze(&[
      "module m function main() { let x = 1; x = 2 }",
    ]);
    let err = diags.iter().find(|d| d.code == diag::EXPECTED_FUNCTION_OR_MUT)
      .unwrap_or_else(|| panic!("{diags:#?}"));
    assert!(err.notes.iter().any(|n| n.msg.contains("consider replacing `let` with `mut`")),
      "{diags:#?}");
  }

  #[test]
  fn zero_extend_masks_constants() {
    let (env, _, diags, _) = analyze(&[
      "module m const a = `zero_extend[i64]((0 - 1) as char) function main() { }",
    ]);
    assert!(diags.is_empty(), "{diags:#?}");
    let has = env.entities.0.iter().any(|e| matches!(e,
      Entity::Const(v) if matches!(env.values.get(*v).kind, ValKind::Int(255))));
    assert!(has, "char 0xff zero-extends to 255");
  }
}
