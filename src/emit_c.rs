//! The C backend: one translation unit from the low-level IR.
//!
//! Every low-level instruction becomes a numbered temporary, blocks become
//! labels, branches become `goto`. Loads and stores always cast the address
//! operand to the loaded type, so temporaries can keep their natural C
//! types without tracking aliasing. Slices are `{ intptr_t length;
//! void *data; }`, length first; string constants carry their 4-byte
//! little-endian length prefix, with references pointing past it.

use std::fmt::Write as _;

use hashbrown::HashSet;
use itertools::Itertools;

use crate::build_lir::LoweredFn;
use crate::infer::{Entity, GlobalEnv};
use crate::symbol::Interner;
use crate::types::lir::{LirInst, LirKind};
use crate::types::ty::{TyId, TyKind, TyRead, Types};
use crate::types::value::{ValId, ValKind};
use crate::types::LirId;

/// The C rendering of a value type. Arrays only occur behind allocas and
/// struct fields, which render them separately.
fn cty(types: &Types, t: TyId) -> String {
  match *types.kind(t) {
    TyKind::Void => "void".into(),
    TyKind::I8 => "int8_t".into(),
    TyKind::I16 => "int16_t".into(),
    TyKind::I32 => "int32_t".into(),
    TyKind::I64 => "int64_t".into(),
    TyKind::Isize => "intptr_t".into(),
    TyKind::F32 => "float".into(),
    TyKind::F64 => "double".into(),
    TyKind::Char | TyKind::Byte | TyKind::Bool => "uint8_t".into(),
    TyKind::Ptr(e) | TyKind::PtrMut(e) => match types.kind(e) {
      TyKind::Array { .. } | TyKind::TyParam { .. } => "void*".into(),
      _ => format!("{}*", cty(types, e)),
    },
    TyKind::Slice(_) | TyKind::SliceMut(_) => "slice".into(),
    TyKind::Fn { .. } => "void*".into(),
    TyKind::Struct { .. } => format!("s{}", t.0),
    TyKind::Enum { repr, .. } => cty(types, repr),
    TyKind::Newtype { inner, .. } | TyKind::Tagged { inner, .. } | TyKind::Linear(inner) =>
      cty(types, inner),
    TyKind::Error | TyKind::ArrayLen(_) | TyKind::Array { .. } | TyKind::TyParam { .. } =>
      panic!("type {:?} has no C value rendering", types.kind(t)),
  }
}

/// A declaration `CT NAME` for a possibly-(nested-)array type.
fn cdecl(types: &Types, t: TyId, name: &str) -> String {
  let mut suffix = String::new();
  let mut t = types.strip_tags(t);
  loop {
    t = match *types.kind(t) {
      TyKind::Array { index, elem } => {
        let TyKind::ArrayLen(n) = *types.kind(index) else { panic!("open array in C emission") };
        let _ = write!(suffix, "[{n}]");
        types.strip_tags(elem)
      }
      TyKind::Linear(inner) => types.strip_tags(inner),
      _ => break,
    };
  }
  format!("{} {name}{suffix}", cty(types, t))
}

fn emit_struct_defs(types: &Types, out: &mut String) {
  fn emit_one(types: &Types, t: TyId, done: &mut HashSet<TyId>, out: &mut String) {
    if !done.insert(t) { return }
    let TyKind::Struct { ref fields, .. } = *types.kind(t) else { return };
    for &f in fields.iter() {
      let mut f = types.strip_tags(f);
      loop {
        f = match *types.kind(f) {
          TyKind::Array { elem, .. } => types.strip_tags(elem),
          TyKind::Linear(inner) => types.strip_tags(inner),
          _ => break,
        };
      }
      if matches!(types.kind(f), TyKind::Struct { .. }) {
        emit_one(types, f, done, out);
      }
    }
    let _ = writeln!(out, "typedef struct s{0} {{", t.0);
    for (i, &f) in fields.iter().enumerate() {
      let _ = writeln!(out, "  {};", cdecl(types, f, &format!("f{i}")));
    }
    let _ = writeln!(out, "}} s{};\n", t.0);
  }

  let mut done = HashSet::new();
  let structs: Vec<TyId> = types.iter()
    .filter(|&(t, k)| matches!(k, TyKind::Struct { .. })
      && !types.flags(t).contains(crate::types::ty::TyFlags::HAS_PARAM))
    .map(|(t, _)| t)
    .collect();
  for t in structs { emit_one(types, t, &mut done, out) }
}

struct CFn<'a> {
  env: &'a GlobalEnv,
  interner: &'a Interner,
  f: &'a LoweredFn,
  /// What each address-producing temporary points at.
  pointee: Vec<TyId>,
  out: String,
}

/// The pointed-at type of every temporary that is an address. Shared with
/// the LLVM backend, which needs it for `getelementptr`.
pub(crate) fn pointee_table(env: &GlobalEnv, f: &LoweredFn) -> Vec<TyId> {
  f.lir.insts.iter().map(|inst| match inst.kind {
    LirKind::Alloc | LirKind::FieldAddr | LirKind::IndexAddr => inst.ty,
    LirKind::Ref => match env.values.get(ValId(inst.a)).kind {
      ValKind::ExternVar(_) => inst.ty,
      ValKind::Str(_) => TyId::BYTE,
      _ => TyId::ERROR,
    },
    LirKind::Load | LirKind::Cast | LirKind::Param | LirKind::Call =>
      env.types.pointee(env.types.strip_tags(inst.ty)).map_or(TyId::ERROR, |(e, _)| e),
    _ => TyId::ERROR,
  }).collect()
}

impl CFn<'_> {
  fn t(&self, id: LirId) -> String { format!("t{}", id.0) }

  fn inst_expr(&mut self, inst: LirInst) -> Option<String> {
    let types = &self.env.types;
    let a = self.t(inst.op_a());
    let b = self.t(inst.op_b());
    use LirKind as K;
    Some(match inst.kind {
      K::Add => format!("{a} + {b}"),
      K::Sub => format!("{a} - {b}"),
      K::Mul => format!("{a} * {b}"),
      K::Div => format!("{a} / {b}"),
      K::Rem => format!("{a} % {b}"),
      K::And => format!("{a} & {b}"),
      K::Or => format!("{a} | {b}"),
      K::Xor => format!("{a} ^ {b}"),
      K::Shl => format!("{a} << {b}"),
      K::Shr => format!("{a} >> {b}"),
      K::Eq => format!("{a} == {b}"),
      K::Ne => format!("{a} != {b}"),
      K::Lt => format!("{a} < {b}"),
      K::Le => format!("{a} <= {b}"),
      K::Gt => format!("{a} > {b}"),
      K::Ge => format!("{a} >= {b}"),
      K::Neg => format!("-{a}"),
      K::Not => format!("!{a}"),
      K::Param => format!("p{}", inst.a),
      K::Load => format!("*({}*){a}", cty(types, inst.ty)),
      K::IndexAddr => match types.size_of(inst.ty) {
        // Array elements index by byte stride; C has no value type for them.
        Some(size) if matches!(types.kind(types.strip_tags(inst.ty)), TyKind::Array { .. }) =>
          format!("((uint8_t*){a}) + {b} * {size}"),
        _ => format!("(({}*){a}) + {b}", cty(types, inst.ty)),
      },
      K::FieldAddr => {
        let base = types.strip_tags(self.pointee[inst.a as usize]);
        match *types.kind(base) {
          TyKind::Slice(_) | TyKind::SliceMut(_) => {
            let field = if inst.b == 0 { "length" } else { "data" };
            format!("&((slice*){a})->{field}")
          }
          TyKind::Struct { .. } => format!("&((s{}*){a})->f{}", base.0, inst.b),
          ref k => panic!("field address into {k:?}"),
        }
      }
      K::Cast => format!("({}){a}", cty(types, inst.ty)),
      K::Zext => {
        let src_size = types.size_of(TyId(inst.b)).unwrap_or(8);
        format!("({})(uint{}_t){a}", cty(types, inst.ty), src_size * 8)
      }
      K::Imm => {
        let bits = inst.imm();
        if types.is_float(inst.ty) {
          let v = if inst.ty == TyId::F32 {
            f64::from(f32::from_bits(bits as u32))
          } else { f64::from_bits(bits) };
          format!("{v:?}")
        } else if matches!(types.kind(inst.ty),
          TyKind::Ptr(_) | TyKind::PtrMut(_) | TyKind::Fn { .. }) {
          "0".into()
        } else {
          let v = bits as i64;
          if v == i64::MIN { "INT64_MIN".into() } else { format!("{v}") }
        }
      }
      K::Ref => {
        let val = self.env.values.get(ValId(inst.a));
        match val.kind {
          ValKind::Func { name, .. } | ValKind::ExternFunc(name) =>
            self.interner.get(name).to_owned(),
          ValKind::ExternVar(name) => format!("&{}", self.interner.get(name)),
          ValKind::Str(sym) => format!("(uint8_t*)(str{} + 4)", sym.0),
          ref k => panic!("unreferenceable value {k:?}"),
        }
      }
      K::Call => {
        let args = self.f.lir.list(inst.b).iter()
          .map(|&a| self.t(LirId(a)))
          .join(", ");
        let callee = self.f.lir.inst(inst.op_a());
        if callee.kind == K::Ref {
          let val = self.env.values.get(ValId(callee.a));
          if let ValKind::Func { name, .. } | ValKind::ExternFunc(name) = val.kind {
            let fname = self.interner.get(name);
            return Some(format!("{fname}({args})"))
          }
        }
        // Indirect call through a function-typed value.
        let fnty = callee.ty;
        let TyKind::Fn { ref params, ret, .. } = *types.kind(types.strip_tags(fnty)) else {
          panic!("indirect call through a non-function type")
        };
        let sig = params.iter().map(|&p| cty(types, p)).join(", ");
        format!("(({} (*)({})){})({})", cty(types, ret), sig, a, args)
      }
      K::Alloc | K::Store | K::Memcpy | K::Br | K::BrIfNot | K::Ret | K::RetVoid =>
        return None,
    })
  }

  fn emit_body(&mut self) {
    let lir = &self.f.lir;
    for b in 0..lir.blocks.len() {
      let _ = writeln!(self.out, "bb{b}: ;");
      for i in lir.block_range(crate::types::BlockId(b as u32)) {
        let id = LirId(i as u32);
        let inst = lir.inst(id);
        use LirKind as K;
        match inst.kind {
          K::Alloc => {
            let types = &self.env.types;
            let backing = format!("v{}", id.0);
            let decl = cdecl(types, inst.ty, &backing);
            let addr = match types.kind(types.strip_tags(inst.ty)) {
              TyKind::Array { .. } => backing.clone(),
              _ => format!("&{backing}"),
            };
            let _ = writeln!(self.out, "  {decl}; void *t{} = (void*){addr};", id.0);
          }
          K::Store => {
            let ty = cty(&self.env.types, inst.ty);
            let _ = writeln!(self.out, "  *({ty}*){} = {};",
              self.t(inst.op_a()), self.t(inst.op_b()));
          }
          K::Memcpy => {
            let size = self.env.types.size_of(inst.ty).expect("sized memcpy");
            let _ = writeln!(self.out, "  memcpy((void*){}, (void*){}, {size});",
              self.t(inst.op_a()), self.t(inst.op_b()));
          }
          K::Br => { let _ = writeln!(self.out, "  goto bb{};", inst.a); }
          K::BrIfNot => {
            let _ = writeln!(self.out, "  if (!{}) goto bb{};", self.t(inst.op_a()), inst.b);
          }
          K::Ret => { let _ = writeln!(self.out, "  return {};", self.t(inst.op_a())); }
          K::RetVoid => {
            if self.f.is_main {
              let _ = writeln!(self.out, "  return 0;");
            } else {
              let _ = writeln!(self.out, "  return;");
            }
          }
          _ => {
            let is_void_call = inst.kind == K::Call && inst.ty == TyId::VOID;
            let expr = self.inst_expr(inst).expect("value instruction");
            if is_void_call {
              let _ = writeln!(self.out, "  {expr};");
            } else {
              let types = &self.env.types;
              let lhs = match inst.kind {
                // Addresses keep `void*` so the always-cast accesses stay
                // uniform.
                K::IndexAddr | K::FieldAddr => "void*".to_owned(),
                K::Ref => match self.env.values.get(ValId(inst.a)).kind {
                  ValKind::Str(_) => "uint8_t*".to_owned(),
                  _ => "void*".to_owned(),
                },
                // Array parameters arrive as addresses.
                K::Param if matches!(types.kind(types.strip_tags(inst.ty)),
                  TyKind::Array { .. }) => "void*".to_owned(),
                _ => cty(types, inst.ty),
              };
              // C casts cannot target struct types; loads and calls of
              // aggregates already have the right type.
              let plain = matches!(types.kind(types.strip_tags(inst.ty)),
                TyKind::Slice(_) | TyKind::SliceMut(_) | TyKind::Struct { .. })
                && !matches!(inst.kind, K::IndexAddr | K::FieldAddr | K::Ref);
              if plain {
                let _ = writeln!(self.out, "  {lhs} t{} = {expr};", id.0);
              } else {
                let _ = writeln!(self.out, "  {lhs} t{} = ({lhs})({expr});", id.0);
              }
            }
          }
        }
      }
    }
  }
}

/// Render the whole program as one C translation unit.
#[must_use] pub fn emit(env: &GlobalEnv, fns: &[LoweredFn], interner: &Interner) -> String {
  let mut out = String::new();
  out.push_str("#include <stdint.h>\n#include <string.h>\n\n");
  out.push_str("typedef struct slice { intptr_t length; void *data; } slice;\n\n");
  emit_struct_defs(&env.types, &mut out);

  // String constants, with their 4-byte little-endian length prefix.
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
    let body = bytes.iter().map(|b| b.to_string()).join(", ");
    let _ = writeln!(out, "static const uint8_t str{sym}[] = {{ {body} }};");
  }
  if !strs.is_empty() { out.push('\n') }

  // Extern declarations.
  for entity in &env.entities.0 {
    match *entity {
      Entity::ExternFunc { val, ty } => {
        let ValKind::ExternFunc(name) = env.values.get(val).kind else { continue };
        let TyKind::Fn { ref params, ret, .. } = *env.types.kind(ty) else { continue };
        let sig = if params.is_empty() { "void".to_owned() }
          else { params.iter().map(|&p| cty(&env.types, p)).join(", ") };
        let _ = writeln!(out, "extern {} {}({});",
          cty(&env.types, ret), interner.get(name), sig);
      }
      Entity::ExternVar { val, ty } => {
        let ValKind::ExternVar(name) = env.values.get(val).kind else { continue };
        let _ = writeln!(out, "extern {};", cdecl(&env.types, ty, interner.get(name)));
      }
      _ => {}
    }
  }
  out.push('\n');

  // Forward declarations, then definitions.
  for f in fns {
    if f.is_main { continue }
    let _ = writeln!(out, "static {};", signature(env, f, interner));
  }
  out.push('\n');
  for f in fns {
    let prefix = if f.is_main { "" } else { "static " };
    let _ = writeln!(out, "{prefix}{} {{", signature(env, f, interner));
    let mut cfn = CFn { env, interner, f, pointee: pointee_table(env, f), out: String::new() };
    cfn.emit_body();
    out.push_str(&cfn.out);
    out.push_str("}\n\n");
  }
  out
}

fn signature(env: &GlobalEnv, f: &LoweredFn, interner: &Interner) -> String {
  let name = interner.get(f.name);
  let params = if f.params.is_empty() { "void".to_owned() } else {
    f.params.iter().enumerate().map(|(i, &p)| {
      match env.types.kind(env.types.strip_tags(p)) {
        // Array parameters pass by address.
        TyKind::Array { .. } => format!("void *p{i}"),
        _ => format!("{} p{i}", cty(&env.types, p)),
      }
    }).join(", ")
  };
  if f.is_main {
    "int main(void)".to_owned()
  } else {
    format!("{} {name}({params})", cty(&env.types, f.ret))
  }
}
