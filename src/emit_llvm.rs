//! The LLVM backend: textual IR from the low-level IR.
//!
//! Pointers are opaque (`ptr`), `bool` is stored as `i8` and converted to
//! `i1` at branch points, and the cast instruction's source-type index picks
//! the machine cast (trunc/sext/zext/sitofp/fptosi/...). Layout follows the
//! same contract as the C backend: slices are `{ i64, ptr }` length first,
//! strings carry their 4-byte little-endian length prefix.

use std::fmt::Write as _;

use hashbrown::HashSet;
use itertools::Itertools;

use crate::build_lir::LoweredFn;
use crate::infer::{Entity, GlobalEnv};
use crate::symbol::Interner;
use crate::types::lir::LirKind;
use crate::types::ty::{TyId, TyKind, TyRead, Types};
use crate::types::value::{ValId, ValKind};
use crate::types::{BlockId, LirId};

fn lty(types: &Types, t: TyId) -> String {
  match *types.kind(t) {
    TyKind::Void => "void".into(),
    TyKind::I8 | TyKind::Char | TyKind::Byte | TyKind::Bool => "i8".into(),
    TyKind::I16 => "i16".into(),
    TyKind::I32 => "i32".into(),
    TyKind::I64 | TyKind::Isize => "i64".into(),
    TyKind::F32 => "float".into(),
    TyKind::F64 => "double".into(),
    TyKind::Ptr(_) | TyKind::PtrMut(_) | TyKind::Fn { .. } => "ptr".into(),
    TyKind::Slice(_) | TyKind::SliceMut(_) => "%slice".into(),
    TyKind::Struct { .. } => format!("%s{}", t.0),
    TyKind::Enum { repr, .. } => lty(types, repr),
    TyKind::Newtype { inner, .. } | TyKind::Tagged { inner, .. } | TyKind::Linear(inner) =>
      lty(types, inner),
    TyKind::Array { index, elem } => {
      let TyKind::ArrayLen(n) = *types.kind(index) else { panic!("open array in emission") };
      format!("[{n} x {}]", lty(types, elem))
    }
    TyKind::Error | TyKind::ArrayLen(_) | TyKind::TyParam { .. } =>
      panic!("type {:?} has no LLVM rendering", types.kind(t)),
  }
}

/// Whether values of this type are unsigned for division, shifts, and
/// comparisons.
fn is_unsigned(types: &Types, t: TyId) -> bool {
  matches!(types.kind(types.strip_tags(t)), TyKind::Char | TyKind::Byte | TyKind::Bool)
}

struct LlvmFn<'a> {
  env: &'a GlobalEnv,
  interner: &'a Interner,
  f: &'a LoweredFn,
  pointee: Vec<TyId>,
  /// Operand rendering per temporary (a `%tN`, a literal, or a `@global`).
  names: Vec<String>,
  /// LLVM type per temporary.
  lltypes: Vec<String>,
  synth: u32,
  out: String,
}

impl LlvmFn<'_> {
  fn fresh(&mut self) -> String {
    self.synth += 1;
    format!("%x{}", self.synth)
  }

  /// The operand for `id`, converted to `want` if the i1/i8 boundary is in
  /// the way.
  fn op(&mut self, id: LirId, want: &str) -> String {
    let name = self.names[id.0 as usize].clone();
    let have = self.lltypes[id.0 as usize].clone();
    if have == want { return name }
    match (have.as_str(), want) {
      ("i1", "i8") => {
        let x = self.fresh();
        let _ = writeln!(self.out, "  {x} = zext i1 {name} to i8");
        x
      }
      ("i8", "i1") => {
        let x = self.fresh();
        let _ = writeln!(self.out, "  {x} = icmp ne i8 {name}, 0");
        x
      }
      _ => name,
    }
  }

  fn set(&mut self, id: LirId, name: String, llty: String) {
    self.names[id.0 as usize] = name;
    self.lltypes[id.0 as usize] = llty;
  }

  fn def(&mut self, id: LirId, llty: &str, rhs: std::fmt::Arguments<'_>) {
    let name = format!("%t{}", id.0);
    let _ = writeln!(self.out, "  {name} = {rhs}");
    self.set(id, name, llty.to_owned());
  }

  fn emit_inst(&mut self, id: LirId) {
    let inst = self.f.lir.inst(id);
    let types = &self.env.types;
    let ty = lty(types, inst.ty);
    use LirKind as K;
    match inst.kind {
      K::Add | K::Sub | K::Mul | K::Div | K::Rem | K::And | K::Or | K::Xor
      | K::Shl | K::Shr => {
        let float = types.is_float(types.strip_tags(inst.ty));
        let unsigned = is_unsigned(types, inst.ty);
        let opname = match (inst.kind, float, unsigned) {
          (K::Add, true, _) => "fadd", (K::Add, ..) => "add",
          (K::Sub, true, _) => "fsub", (K::Sub, ..) => "sub",
          (K::Mul, true, _) => "fmul", (K::Mul, ..) => "mul",
          (K::Div, true, _) => "fdiv", (K::Div, _, true) => "udiv", (K::Div, ..) => "sdiv",
          (K::Rem, true, _) => "frem", (K::Rem, _, true) => "urem", (K::Rem, ..) => "srem",
          (K::And, ..) => "and", (K::Or, ..) => "or", (K::Xor, ..) => "xor",
          (K::Shl, ..) => "shl",
          (K::Shr, _, true) => "lshr", (K::Shr, ..) => "ashr",
          _ => unreachable!(),
        };
        let a = self.op(inst.op_a(), &ty);
        let b = self.op(inst.op_b(), &ty);
        self.def(id, &ty, format_args!("{opname} {ty} {a}, {b}"));
      }
      K::Eq | K::Ne | K::Lt | K::Le | K::Gt | K::Ge => {
        let float = types.is_float(types.strip_tags(inst.ty));
        let unsigned = is_unsigned(types, inst.ty)
          || types.pointee(types.strip_tags(inst.ty)).is_some();
        let cond = match (inst.kind, float, unsigned) {
          (K::Eq, true, _) => "fcmp oeq", (K::Eq, ..) => "icmp eq",
          (K::Ne, true, _) => "fcmp one", (K::Ne, ..) => "icmp ne",
          (K::Lt, true, _) => "fcmp olt", (K::Lt, _, true) => "icmp ult",
          (K::Lt, ..) => "icmp slt",
          (K::Le, true, _) => "fcmp ole", (K::Le, _, true) => "icmp ule",
          (K::Le, ..) => "icmp sle",
          (K::Gt, true, _) => "fcmp ogt", (K::Gt, _, true) => "icmp ugt",
          (K::Gt, ..) => "icmp sgt",
          (K::Ge, true, _) => "fcmp oge", (K::Ge, _, true) => "icmp uge",
          (K::Ge, ..) => "icmp sge",
          _ => unreachable!(),
        };
        let a = self.op(inst.op_a(), &ty);
        let b = self.op(inst.op_b(), &ty);
        self.def(id, "i1", format_args!("{cond} {ty} {a}, {b}"));
      }
      K::Neg => {
        let a = self.op(inst.op_a(), &ty);
        if types.is_float(types.strip_tags(inst.ty)) {
          self.def(id, &ty, format_args!("fneg {ty} {a}"));
        } else {
          self.def(id, &ty, format_args!("sub {ty} 0, {a}"));
        }
      }
      K::Not => {
        let a = self.op(inst.op_a(), "i1");
        let x = self.fresh();
        let _ = writeln!(self.out, "  {x} = xor i1 {a}, true");
        self.set(id, x, "i1".into());
      }
      K::Param => self.set(id, format!("%p{}", inst.a), match types.kind(types.strip_tags(inst.ty)) {
        TyKind::Array { .. } => "ptr".into(),
        _ => ty,
      }),
      K::Alloc => self.def(id, "ptr", format_args!("alloca {ty}")),
      K::Load => {
        let a = self.op(inst.op_a(), "ptr");
        self.def(id, &ty, format_args!("load {ty}, ptr {a}"));
      }
      K::Store => {
        let v = self.op(inst.op_b(), &ty);
        let a = self.op(inst.op_a(), "ptr");
        let _ = writeln!(self.out, "  store {ty} {v}, ptr {a}");
      }
      K::Memcpy => {
        let size = types.size_of(inst.ty).expect("sized memcpy");
        let a = self.op(inst.op_a(), "ptr");
        let b = self.op(inst.op_b(), "ptr");
        let _ = writeln!(self.out,
          "  call void @llvm.memcpy.p0.p0.i64(ptr {a}, ptr {b}, i64 {size}, i1 false)");
      }
      K::IndexAddr => {
        let a = self.op(inst.op_a(), "ptr");
        let i = self.op(inst.op_b(), "i64");
        self.def(id, "ptr", format_args!("getelementptr {ty}, ptr {a}, i64 {i}"));
      }
      K::FieldAddr => {
        let base = types.strip_tags(self.pointee[inst.a as usize]);
        let base_ty = match types.kind(base) {
          TyKind::Slice(_) | TyKind::SliceMut(_) => "%slice".to_owned(),
          TyKind::Struct { .. } => format!("%s{}", base.0),
          k => panic!("field address into {k:?}"),
        };
        let a = self.op(inst.op_a(), "ptr");
        self.def(id, "ptr",
          format_args!("getelementptr {base_ty}, ptr {a}, i32 0, i32 {}", inst.b));
      }
      K::Cast => {
        let src = TyId(inst.b);
        let sll = lty(types, src);
        let a = self.op(inst.op_a(), &sll);
        let src_stripped = types.strip_tags(src);
        let dst_stripped = types.strip_tags(inst.ty);
        let src_float = types.is_float(src_stripped);
        let dst_float = types.is_float(dst_stripped);
        let src_ptr = matches!(types.kind(src_stripped),
          TyKind::Ptr(_) | TyKind::PtrMut(_) | TyKind::Array { .. });
        let dst_ptr = types.pointee(dst_stripped).is_some();
        let enum_repr = |t: TyId| match *types.kind(types.strip_tags(t)) {
          TyKind::Enum { repr, .. } => repr,
          _ => t,
        };
        let ssize = types.size_of(enum_repr(src)).unwrap_or(8);
        let dsize = types.size_of(enum_repr(inst.ty)).unwrap_or(8);
        if src_ptr || dst_ptr {
          // Opaque pointers: a pointer cast is a rename.
          self.set(id, a, "ptr".into());
        } else if src_float && dst_float {
          let op = if dsize > ssize { "fpext" } else { "fptrunc" };
          if dsize == ssize { self.set(id, a, ty) }
          else { self.def(id, &ty, format_args!("{op} {sll} {a} to {ty}")) }
        } else if src_float {
          self.def(id, &ty, format_args!("fptosi {sll} {a} to {ty}"));
        } else if dst_float {
          let op = if is_unsigned(types, src) { "uitofp" } else { "sitofp" };
          self.def(id, &ty, format_args!("{op} {sll} {a} to {ty}"));
        } else if dsize < ssize {
          self.def(id, &ty, format_args!("trunc {sll} {a} to {ty}"));
        } else if dsize > ssize {
          let op = if is_unsigned(types, src) { "zext" } else { "sext" };
          self.def(id, &ty, format_args!("{op} {sll} {a} to {ty}"));
        } else {
          self.set(id, a, ty);
        }
      }
      K::Zext => {
        let src = TyId(inst.b);
        let sll = lty(types, src);
        let a = self.op(inst.op_a(), &sll);
        if types.size_of(src) == types.size_of(inst.ty) {
          self.set(id, a, ty);
        } else {
          self.def(id, &ty, format_args!("zext {sll} {a} to {ty}"));
        }
      }
      K::Imm => {
        let bits = inst.imm();
        let text = if types.is_float(types.strip_tags(inst.ty)) {
          let v = if inst.ty == TyId::F32 {
            f64::from(f32::from_bits(bits as u32))
          } else { f64::from_bits(bits) };
          format!("0x{:016X}", v.to_bits())
        } else if matches!(types.kind(types.strip_tags(inst.ty)),
          TyKind::Slice(_) | TyKind::SliceMut(_)) {
          "zeroinitializer".to_owned()
        } else if types.pointee(types.strip_tags(inst.ty)).is_some()
          || matches!(types.kind(types.strip_tags(inst.ty)), TyKind::Fn { .. }) {
          "null".to_owned()
        } else {
          format!("{}", bits as i64)
        };
        self.set(id, text, ty);
      }
      K::Ref => {
        let val = self.env.values.get(ValId(inst.a));
        match val.kind {
          ValKind::Func { name, .. } | ValKind::ExternFunc(name) | ValKind::ExternVar(name) =>
            self.set(id, format!("@{}", self.interner.get(name)), "ptr".into()),
          ValKind::Str(sym) => {
            self.def(id, "ptr", format_args!("getelementptr i8, ptr @str{}, i64 4", sym.0));
          }
          ref k => panic!("unreferenceable value {k:?}"),
        }
      }
      K::Call => {
        let args: Vec<u32> = self.f.lir.list(inst.b).to_vec();
        let rendered = args.iter().map(|&a| {
          let at = self.lltypes[a as usize].clone();
          let at = if at == "i1" { "i8".to_owned() } else { at };
          let v = self.op(LirId(a), &at);
          format!("{at} {v}")
        }).collect::<Vec<_>>().join(", ");
        let callee = self.op(inst.op_a(), "ptr");
        if inst.ty == TyId::VOID {
          let _ = writeln!(self.out, "  call void {callee}({rendered})");
        } else {
          self.def(id, &ty, format_args!("call {ty} {callee}({rendered})"));
        }
      }
      K::Br => { let _ = writeln!(self.out, "  br label %bb{}", inst.a); }
      K::BrIfNot => {
        // Fall through to the next block when the condition holds.
        let cond = self.op(inst.op_a(), "i1");
        let next = self.f.lir.blocks.iter()
          .position(|&s| s as usize > id.0 as usize)
          .expect("conditional branch before the last block");
        let _ = writeln!(self.out,
          "  br i1 {cond}, label %bb{next}, label %bb{}", inst.b);
      }
      K::Ret => {
        let v = self.op(inst.op_a(), &ty);
        let _ = writeln!(self.out, "  ret {ty} {v}");
      }
      K::RetVoid => {
        if self.f.is_main {
          let _ = writeln!(self.out, "  ret i32 0");
        } else {
          let _ = writeln!(self.out, "  ret void");
        }
      }
    }
  }
}

fn escape_bytes(bytes: &[u8]) -> String {
  let mut out = String::new();
  for &b in bytes {
    if b.is_ascii_alphanumeric() || b == b' ' {
      out.push(b as char);
    } else {
      let _ = write!(out, "\\{b:02X}");
    }
  }
  out
}

/// Render the whole program as one LLVM IR module.
#[must_use] pub fn emit(env: &GlobalEnv, fns: &[LoweredFn], interner: &Interner) -> String {
  let types = &env.types;
  let mut out = String::new();
  out.push_str("%slice = type { i64, ptr }\n");

  for (t, kind) in types.iter() {
    if let TyKind::Struct { fields, .. } = kind {
      if types.flags(t).contains(crate::types::ty::TyFlags::HAS_PARAM) { continue }
      let body = fields.iter().map(|&f| lty(types, f)).join(", ");
      let _ = writeln!(out, "%s{} = type {{ {body} }}", t.0);
    }
  }
  out.push('\n');

  let mut strs: HashSet<u32> = HashSet::new();
  for f in fns {
    for inst in &f.lir.insts {
      if inst.kind == LirKind::Ref {
        if let ValKind::Str(sym) = env.values.get(ValId(inst.a)).kind {
          strs.insert(sym.0);
        }
      }
    }
  }
  for &sym in strs.iter().sorted() {
    let bytes = interner.literal_bytes(crate::symbol::Symbol(sym));
    let _ = writeln!(out, "@str{sym} = private unnamed_addr constant [{} x i8] c\"{}\"",
      bytes.len(), escape_bytes(&bytes));
  }

  let mut uses_memcpy = false;
  for f in fns {
    uses_memcpy |= f.lir.insts.iter().any(|i| i.kind == LirKind::Memcpy);
  }
  if uses_memcpy {
    out.push_str("declare void @llvm.memcpy.p0.p0.i64(ptr, ptr, i64, i1)\n");
  }

  for entity in &env.entities.0 {
    match *entity {
      Entity::ExternFunc { val, ty } => {
        let ValKind::ExternFunc(name) = env.values.get(val).kind else { continue };
        let TyKind::Fn { ref params, ret, .. } = *types.kind(ty) else { continue };
        let sig = params.iter().map(|&p| lty(types, p)).join(", ");
        let _ = writeln!(out, "declare {} @{}({sig})", lty(types, ret), interner.get(name));
      }
      Entity::ExternVar { val, ty } => {
        let ValKind::ExternVar(name) = env.values.get(val).kind else { continue };
        let _ = writeln!(out, "@{} = external global {}", interner.get(name), lty(types, ty));
      }
      _ => {}
    }
  }
  out.push('\n');

  for f in fns {
    let name = interner.get(f.name);
    let params = f.params.iter().enumerate().map(|(i, &p)| {
      match types.kind(types.strip_tags(p)) {
        TyKind::Array { .. } => format!("ptr %p{i}"),
        _ => format!("{} %p{i}", lty(types, p)),
      }
    }).join(", ");
    if f.is_main {
      let _ = writeln!(out, "define i32 @main({params}) {{");
    } else {
      let _ = writeln!(out, "define internal {} @{name}({params}) {{",
        lty(types, f.ret));
    }
    let n = f.lir.insts.len();
    let mut lfn = LlvmFn {
      env,
      interner,
      f,
      pointee: crate::emit_c::pointee_table(env, f),
      names: vec![String::new(); n],
      lltypes: vec![String::new(); n],
      synth: 0,
      out: String::new(),
    };
    for b in 0..f.lir.blocks.len() {
      let _ = writeln!(lfn.out, "bb{b}:");
      for i in f.lir.block_range(BlockId(b as u32)) {
        lfn.emit_inst(LirId(i as u32));
      }
    }
    out.push_str(&lfn.out);
    out.push_str("}\n\n");
  }
  out
}
