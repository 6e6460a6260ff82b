//! Role annotation: the top-down dependency walk over top-level
//! definitions. It decides, for every syntax node, whether the node denotes
//! a value, a type, a tag type, a module, or a builtin macro; resolves
//! identifiers; orders definitions by dependency; and detects dependency
//! cycles through initializers and type expressions.
//!
//! Function bodies are not dependencies: a body reference to a function
//! takes its role straight from the definition kind, which is what makes
//! recursion legal. Everything else a definition mentions (types in
//! signatures and fields, const initializers) is walked first, so the
//! resulting order lets the declaration phase run in one sweep.

use hashbrown::{HashMap, HashSet};

use crate::diag::{self, DiagSink, Note};
use crate::symbol::{Interner, Symbol};
use crate::types::ast::{Ast, NodeKind};
use crate::types::ty::TyId;
use crate::types::{DefId, FileId, Idx, IdxVec, ModuleId, NodeId};
use crate::ParsedFile;

/// What a syntax node denotes. `Visiting` is transient during the
/// declaration walk; any survivor is a bug.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Role {
  NotVisited,
  Visiting,
  /// The node failed analysis; downstream passes treat it as a no-op.
  Invalid,
  Value,
  /// A statement list or other multi-valued position.
  MultiValue,
  Type,
  /// A newtype name, applicable to tag arguments.
  TagType,
  Module,
  BuiltinMacro,
  /// Reserved for user macros, which the language does not have yet.
  #[allow(dead_code)]
  Macro,
}

/// The builtin macros reachable through backtick identifiers.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Builtin {
  SizeOf,
  AlignOf,
  ZeroExtend,
  Slice,
  Affine,
}

/// What an identifier-ish node resolved to.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Res {
  None,
  /// A block-local binding; the body phase re-resolves against its own
  /// scope stack, which walks the same shadowing order.
  Local,
  Def(DefId),
  Module(ModuleId),
  /// A primitive type name.
  Prim(TyId),
  Macro(Builtin),
}

/// A top-level definition.
#[derive(Clone, Debug)]
pub struct Def {
  pub file: FileId,
  pub node: NodeId,
  pub name: Symbol,
  pub module: ModuleId,
  pub is_pub: bool,
}

/// One module: the files sharing a `module` header, with its exported and
/// module-private scopes.
#[derive(Debug, Default)]
pub struct Module {
  pub name: Symbol,
  pub public: HashMap<Symbol, DefId>,
  pub private: HashMap<Symbol, DefId>,
}

impl Module {
  fn get(&self, name: Symbol) -> Option<DefId> {
    self.private.get(&name).or_else(|| self.public.get(&name)).copied()
  }
}

/// Everything the role pass produces.
pub struct Resolved {
  pub defs: IdxVec<DefId, Def>,
  pub modules: IdxVec<ModuleId, Module>,
  /// Definitions in dependency order.
  pub order: Vec<DefId>,
  /// Per file, per node.
  pub roles: Vec<Vec<Role>>,
  /// Per file, per node.
  pub res: Vec<Vec<Res>>,
}

impl Resolved {
  #[must_use] pub fn role(&self, file: FileId, node: NodeId) -> Role {
    self.roles[file.into_usize()][node.into_usize()]
  }
  #[must_use] pub fn resolution(&self, file: FileId, node: NodeId) -> Res {
    self.res[file.into_usize()][node.into_usize()]
  }
}

/// The primitive type names, in the process-wide builtin scope.
#[must_use] pub fn prim_types(interner: &Interner) -> HashMap<Symbol, TyId> {
  [
    ("void", TyId::VOID), ("i8", TyId::I8), ("i16", TyId::I16), ("i32", TyId::I32),
    ("i64", TyId::I64), ("isize", TyId::ISIZE), ("f32", TyId::F32), ("f64", TyId::F64),
    ("char", TyId::CHAR), ("byte", TyId::BYTE), ("bool", TyId::BOOL),
  ].into_iter().map(|(name, ty)| (interner.intern(name), ty)).collect()
}

/// The builtin macro names.
#[must_use] pub fn builtin_macros(interner: &Interner) -> HashMap<Symbol, Builtin> {
  [
    ("size_of", Builtin::SizeOf),
    ("align_of", Builtin::AlignOf),
    ("zero_extend", Builtin::ZeroExtend),
    ("slice", Builtin::Slice),
    ("Affine", Builtin::Affine),
  ].into_iter().map(|(name, b)| (interner.intern(name), b)).collect()
}

struct RoleCx<'a> {
  files: &'a [ParsedFile],
  interner: &'a Interner,
  diags: &'a DiagSink,
  defs: IdxVec<DefId, Def>,
  modules: IdxVec<ModuleId, Module>,
  module_by_name: HashMap<Symbol, ModuleId>,
  /// Per file: imported module names.
  imports: Vec<HashMap<Symbol, ModuleId>>,
  roles: Vec<Vec<Role>>,
  res: Vec<Vec<Res>>,
  order: Vec<DefId>,
  prims: HashMap<Symbol, TyId>,
  macros: HashMap<Symbol, Builtin>,
  /// Modules already named in a forgot-to-import note.
  forgot_noted: HashSet<Symbol>,

  // Walk state for the definition currently being analyzed.
  cur_file: FileId,
  cur_module: ModuleId,
  in_body: bool,
  /// The chain of inner scopes: `(name, role)`, innermost last.
  scope: Vec<(Symbol, Role)>,
  scope_marks: Vec<usize>,
}

impl<'a> RoleCx<'a> {
  fn ast(&self) -> &'a Ast { &self.files[self.cur_file.into_usize()].ast }

  fn role_of(&self, file: FileId, node: NodeId) -> Role {
    self.roles[file.into_usize()][node.into_usize()]
  }

  fn set_role(&mut self, node: NodeId, role: Role) {
    self.roles[self.cur_file.into_usize()][node.into_usize()] = role;
  }

  fn set_res(&mut self, node: NodeId, res: Res) {
    self.res[self.cur_file.into_usize()][node.into_usize()] = res;
  }

  fn error(&self, node: NodeId, code: diag::ECode, msg: impl Into<String>) {
    self.diags.error(self.cur_file, self.ast().span(node), code, msg);
  }

  fn push_scope(&mut self) { self.scope_marks.push(self.scope.len()) }
  fn pop_scope(&mut self) {
    let mark = self.scope_marks.pop().expect("unbalanced scope stack");
    self.scope.truncate(mark);
  }

  fn lookup_local(&self, name: Symbol) -> Option<Role> {
    self.scope.iter().rev().find(|&&(n, _)| n == name).map(|&(_, r)| r)
  }

  /// Analyze definition `d` if it has not been analyzed yet, and append it
  /// to the dependency order.
  fn analyze_def(&mut self, d: DefId) {
    let def = self.defs[d].clone();
    if self.role_of(def.file, def.node) != Role::NotVisited { return }
    self.roles[def.file.into_usize()][def.node.into_usize()] = Role::Visiting;

    let saved_file = std::mem::replace(&mut self.cur_file, def.file);
    let saved_module = std::mem::replace(&mut self.cur_module, def.module);
    let saved_body = std::mem::replace(&mut self.in_body, false);
    let saved_marks = std::mem::take(&mut self.scope_marks);
    let saved_scope = std::mem::take(&mut self.scope);

    let ast = self.ast();
    let role = match ast.kind(def.node) {
      NodeKind::Func => {
        let parts = ast.func(def.node);
        let (ret, body) = (parts.ret, parts.body);
        let typarams = parts.typaram_syms();
        let params = parts.param_pairs();
        self.push_scope();
        for &tp in &typarams { self.scope.push((tp, Role::Type)) }
        for &(_, ty) in &params { self.visit_type(ty) }
        if ret != NodeId(0) { self.visit_type(ret) }
        for &(name, _) in &params { self.scope.push((name, Role::Value)) }
        if body != NodeId(0) {
          self.in_body = true;
          self.visit(body);
          self.in_body = false;
        }
        self.pop_scope();
        Role::Value
      }
      NodeKind::ExternFunc => {
        let parts = ast.extern_func(def.node);
        let ret = parts.ret;
        for (_, ty) in parts.param_pairs() { self.visit_type(ty) }
        if ret != NodeId(0) { self.visit_type(ret) }
        Role::Value
      }
      NodeKind::ExternMut => {
        let at = ast.node(def.node).b;
        self.visit_type(NodeId(ast.words(at, 2)[1]));
        Role::Value
      }
      NodeKind::StructDef => {
        let parts = ast.struct_def(def.node);
        let typarams = parts.typaram_syms();
        let fields = parts.field_pairs();
        self.push_scope();
        for &tp in &typarams { self.scope.push((tp, Role::Type)) }
        for &(_, ty) in &fields { self.visit_type(ty) }
        self.pop_scope();
        Role::Type
      }
      NodeKind::EnumDef => {
        self.visit_type(ast.enum_def(def.node).repr);
        Role::Type
      }
      NodeKind::NewtypeDef => {
        self.visit_type(ast.newtype_def(def.node).inner);
        Role::TagType
      }
      NodeKind::ConstDef => {
        // The initializer is a dependency; its role decides whether this
        // is a constant or a type alias.
        match self.visit(ast.const_def(def.node).value) {
          Role::Type => Role::Type,
          Role::TagType => Role::TagType,
          Role::Invalid => Role::Invalid,
          Role::Value => Role::Value,
          _ => {
            self.error(def.node, diag::EXPECTED_VALUE, "expected a value or type");
            Role::Invalid
          }
        }
      }
      k => panic!("non-definition node {k:?} in def table"),
    };

    self.cur_file = saved_file;
    self.cur_module = saved_module;
    self.in_body = saved_body;
    self.scope_marks = saved_marks;
    self.scope = saved_scope;

    self.roles[def.file.into_usize()][def.node.into_usize()] = role;
    self.order.push(d);
  }

  /// Resolve a reference to definition `d`, recursing into it when it is a
  /// dependency of the current position. Reports cycles.
  fn def_role(&mut self, node: NodeId, d: DefId) -> Role {
    let def = &self.defs[d];
    let kind = self.files[def.file.into_usize()].ast.kind(def.node);
    if self.in_body && matches!(kind,
      NodeKind::Func | NodeKind::ExternFunc | NodeKind::ExternMut) {
      // Body references to functions are not dependencies; this is what
      // makes recursion legal.
      return Role::Value
    }
    let (dfile, dnode) = (def.file, def.node);
    match self.role_of(dfile, dnode) {
      Role::NotVisited => { self.analyze_def(d); self.role_of(dfile, dnode) }
      Role::Visiting => {
        let name = self.interner.get(self.defs[d].name);
        let span = self.files[dfile.into_usize()].ast.span(dnode);
        self.diags.error_with(self.cur_file, self.ast().span(node),
          diag::RECURSIVE_DEPENDENCY,
          format!("recursive dependency on `{name}`"),
          vec![Note::here(dfile, span, "recursion happens here")]);
        Role::Invalid
      }
      role => role,
    }
  }

  fn resolve_ident(&mut self, node: NodeId, name: Symbol) -> Role {
    if let Some(role) = self.lookup_local(name) {
      self.set_res(node, Res::Local);
      return role
    }
    if let Some(&m) = self.imports[self.cur_file.into_usize()].get(&name) {
      self.set_res(node, Res::Module(m));
      return Role::Module
    }
    if let Some(d) = self.modules[self.cur_module].get(name) {
      self.set_res(node, Res::Def(d));
      return self.def_role(node, d)
    }
    if let Some(&ty) = self.prims.get(&name) {
      self.set_res(node, Res::Prim(ty));
      return Role::Type
    }
    let text = self.interner.get(name);
    let mut notes = vec![];
    if self.module_by_name.contains_key(&name) {
      if self.forgot_noted.insert(name) {
        notes.push(Note::bare(format!("did you forget to import `{text}`?")));
      }
    } else {
      for module in &self.modules.0 {
        if module.name != self.modules[self.cur_module].name {
          if let Some(&d) = module.private.get(&name) {
            let def = &self.defs[d];
            let span = self.files[def.file.into_usize()].ast.span(def.node);
            notes.push(Note::here(def.file, span,
              format!("`{text}` is a private definition of module `{}`",
                self.interner.get(module.name))));
            break
          }
        }
      }
    }
    self.diags.error_with(self.cur_file, self.ast().span(node), diag::UNDEFINED_NAME,
      format!("undefined name `{text}`"), notes);
    Role::Invalid
  }

  /// Member access on a module reference.
  fn resolve_module_member(&mut self, node: NodeId, m: ModuleId, name: Symbol) -> Role {
    if let Some(&d) = self.modules[m].public.get(&name) {
      self.set_res(node, Res::Def(d));
      return self.def_role(node, d)
    }
    let text = self.interner.get(name);
    let module_name = self.interner.get(self.modules[m].name);
    let mut notes = vec![];
    if let Some(&d) = self.modules[m].private.get(&name) {
      let def = &self.defs[d];
      let span = self.files[def.file.into_usize()].ast.span(def.node);
      notes.push(Note::here(def.file, span,
        format!("`{text}` is a private definition of module `{module_name}`")));
    }
    self.diags.error_with(self.cur_file, self.ast().span(node), diag::NAME_NOT_IN_MODULE,
      format!("module `{module_name}` has no public definition `{text}`"), notes);
    Role::Invalid
  }

  fn visit_type(&mut self, node: NodeId) {
    if node == NodeId(0) { return }
    match self.visit(node) {
      Role::Type | Role::TagType | Role::Invalid => {}
      _ => {
        self.error(node, diag::EXPECTED_TYPE, "expected a type");
        self.set_role(node, Role::Invalid);
      }
    }
  }

  fn expect_value(&mut self, node: NodeId) -> Role {
    if node == NodeId(0) { return Role::Invalid }
    match self.visit(node) {
      Role::Value => Role::Value,
      Role::Invalid => Role::Invalid,
      _ => {
        self.error(node, diag::EXPECTED_VALUE, "expected a value");
        self.set_role(node, Role::Invalid);
        Role::Invalid
      }
    }
  }

  /// The output role of a builtin macro under bracket application.
  fn macro_bracket_role(&mut self, node: NodeId, b: Builtin) -> Role {
    match b {
      // `zero_extend[W]` stays a macro awaiting its call.
      Builtin::ZeroExtend => Role::BuiltinMacro,
      Builtin::Affine => Role::Type,
      Builtin::SizeOf | Builtin::AlignOf | Builtin::Slice => {
        self.error(node, diag::EXPECTED_VALUE, "this builtin takes no type arguments");
        Role::Invalid
      }
    }
  }

  fn visit(&mut self, node: NodeId) -> Role {
    if node == NodeId(0) { return Role::Invalid }
    let n = self.ast().node(node);
    use NodeKind as N;
    let role = match n.kind {
      N::Error => Role::Invalid,
      N::Int | N::Float | N::CharLit | N::StrLit | N::NullLit | N::TrueLit | N::FalseLit =>
        Role::Value,
      // `.Name` defers resolution to the type analyzer's hint.
      N::DotName => Role::Value,
      N::Ident => self.resolve_ident(node, Symbol(n.a)),
      N::BuiltinId => {
        let name = Symbol(n.a);
        match self.macros.get(&name) {
          Some(&b) => { self.set_res(node, Res::Macro(b)); Role::BuiltinMacro }
          None => {
            self.error(node, diag::UNDEFINED_NAME,
              format!("undefined builtin `{}`", self.interner.get(name)));
            Role::Invalid
          }
        }
      }

      N::Star | N::At => {
        let is_mut = n.b != 0;
        match self.visit(NodeId(n.a)) {
          Role::Invalid => Role::Invalid,
          Role::Type | Role::TagType => Role::Type,
          Role::Value if !is_mut => Role::Value,
          Role::Value => {
            self.error(node, diag::EXPECTED_TYPE, "`mut` only applies to pointer types");
            Role::Invalid
          }
          _ => {
            self.error(node, diag::EXPECTED_VALUE, "expected a value or type");
            Role::Invalid
          }
        }
      }
      N::Amp | N::Neg | N::NotL => {
        self.expect_value(NodeId(n.a));
        Role::Value
      }
      N::Add | N::Sub | N::Mul | N::Div | N::Rem | N::BitAnd | N::BitOr | N::BitXor
      | N::Shl | N::Shr | N::EqEq | N::Ne | N::Lt | N::Le | N::Gt | N::Ge
      | N::AndL | N::OrL => {
        self.expect_value(NodeId(n.a));
        self.expect_value(NodeId(n.b));
        Role::Value
      }

      N::FieldOp => {
        let name = Symbol(n.b);
        match self.visit(NodeId(n.a)) {
          Role::Invalid => Role::Invalid,
          Role::Module => {
            let Res::Module(m) = self.resolution_of(NodeId(n.a)) else {
              panic!("module role without module resolution")
            };
            self.resolve_module_member(node, m, name)
          }
          // Scope access on a type (enum members) and field access on a
          // value both produce values.
          Role::Type | Role::TagType | Role::Value => Role::Value,
          _ => {
            self.error(node, diag::EXPECTED_VALUE, "expected a value, type, or module");
            Role::Invalid
          }
        }
      }

      N::Call => {
        let args: Vec<NodeId> = self.ast().list(n.b).iter().map(|&a| NodeId(a)).collect();
        let callee = self.visit(NodeId(n.a));
        let role = match callee {
          Role::Invalid => Role::Invalid,
          // Constructor call on a type or tag type, plain call on a value,
          // macro call on a builtin: all produce values.
          Role::Value | Role::Type | Role::TagType | Role::BuiltinMacro => Role::Value,
          _ => {
            self.error(node, diag::EXPECTED_VALUE, "this cannot be called");
            Role::Invalid
          }
        };
        // `size_of`/`align_of` take a type argument; everything else takes
        // values.
        let macro_args_are_types = matches!(self.resolution_of(NodeId(n.a)),
          Res::Macro(Builtin::SizeOf | Builtin::AlignOf));
        for arg in args {
          if macro_args_are_types { self.visit_type(arg) } else { self.expect_value(arg); }
        }
        role
      }

      N::IndexOp => {
        let args: Vec<NodeId> = self.ast().list(n.b).iter().map(|&a| NodeId(a)).collect();
        let target = self.visit(NodeId(n.a));
        let role = match target {
          Role::Invalid => Role::Invalid,
          Role::Value => {
            for &arg in &args { self.expect_value(arg); }
            Role::Value
          }
          Role::Type | Role::TagType => {
            // Array lengths are values, element types and tag arguments are
            // types; accept either per argument.
            for &arg in &args {
              match self.visit(arg) {
                Role::Value | Role::Type | Role::TagType | Role::Invalid => {}
                _ => self.error(arg, diag::EXPECTED_TYPE, "expected a type or length"),
              }
            }
            Role::Type
          }
          Role::BuiltinMacro => {
            for &arg in &args { self.visit_type(arg) }
            let Res::Macro(b) = self.resolution_of(NodeId(n.a)) else {
              panic!("macro role without macro resolution")
            };
            self.macro_bracket_role(node, b)
          }
          _ => {
            self.error(node, diag::EXPECTED_VALUE, "this cannot be indexed");
            Role::Invalid
          }
        };
        role
      }

      N::CastOp => {
        self.expect_value(NodeId(n.a));
        self.visit_type(NodeId(n.b));
        Role::Value
      }

      N::ArrayLit => {
        let elems: Vec<NodeId> = self.ast().list(n.a).iter().map(|&e| NodeId(e)).collect();
        for e in elems { self.expect_value(e); }
        Role::Value
      }

      N::SwitchExpr => {
        if n.a != 0 { self.expect_value(NodeId(n.a)); }
        let at = n.b;
        let arms = self.ast().words(at, 1)[0] as usize;
        for i in 0..arms {
          let &[pat, val] = self.ast().words(at + 1 + 2 * i as u32, 2) else { unreachable!() };
          if pat != 0 { self.expect_value(NodeId(pat)); }
          self.expect_value(NodeId(val));
        }
        Role::Value
      }

      // Statements.
      N::Let | N::LetMut => {
        let parts = self.ast().let_parts(node);
        if parts.ty != NodeId(0) { self.visit_type(parts.ty) }
        self.expect_value(parts.init);
        self.scope.push((parts.name, Role::Value));
        Role::Value
      }
      N::Assign => {
        self.expect_value(NodeId(n.a));
        self.expect_value(NodeId(n.b));
        Role::Value
      }
      N::OpAssign => {
        let &[_, place, value] = self.ast().words(n.a, 3) else { unreachable!() };
        self.expect_value(NodeId(place));
        self.expect_value(NodeId(value));
        Role::Value
      }
      N::If => {
        let &[then, els] = self.ast().words(n.b, 2) else { unreachable!() };
        self.expect_value(NodeId(n.a));
        self.visit(NodeId(then));
        if els != 0 { self.visit(NodeId(els)); }
        Role::Value
      }
      N::While => {
        self.expect_value(NodeId(n.a));
        self.visit(NodeId(n.b));
        Role::Value
      }
      N::For => {
        let &[init, cond, step, body] = self.ast().words(n.a, 4) else { unreachable!() };
        // The initializer's binding lives outside the loop body's scope but
        // inside the statement's own scope.
        self.push_scope();
        self.visit(NodeId(init));
        self.expect_value(NodeId(cond));
        self.visit(NodeId(step));
        self.visit(NodeId(body));
        self.pop_scope();
        Role::Value
      }
      N::Return => {
        if n.a != 0 { self.expect_value(NodeId(n.a)); }
        Role::Value
      }
      N::Break | N::Continue => Role::Value,
      N::Block => {
        let stmts: Vec<NodeId> = self.ast().list(n.a).iter().map(|&s| NodeId(s)).collect();
        self.push_scope();
        for s in stmts { self.visit(s); }
        self.pop_scope();
        Role::MultiValue
      }

      N::File | N::Import | N::Func | N::ExternFunc | N::ExternMut | N::StructDef
      | N::EnumDef | N::NewtypeDef | N::ConstDef =>
        panic!("item node {:?} in expression walk", n.kind),
    };
    self.set_role(node, role);
    role
  }

  fn resolution_of(&self, node: NodeId) -> Res {
    self.res[self.cur_file.into_usize()][node.into_usize()]
  }
}

/// Run role annotation over all parsed files.
#[must_use] pub fn run(
  files: &[ParsedFile],
  interner: &Interner,
  diags: &DiagSink,
) -> Resolved {
  let mut cx = RoleCx {
    files,
    interner,
    diags,
    defs: IdxVec::default(),
    modules: IdxVec::default(),
    module_by_name: HashMap::default(),
    imports: files.iter().map(|_| HashMap::default()).collect(),
    roles: files.iter().map(|f| vec![Role::NotVisited; f.ast.len()]).collect(),
    res: files.iter().map(|f| vec![Res::None; f.ast.len()]).collect(),
    order: vec![],
    prims: prim_types(interner),
    macros: builtin_macros(interner),
    forgot_noted: HashSet::default(),
    cur_file: FileId(0),
    cur_module: ModuleId(0),
    in_body: false,
    scope: vec![],
    scope_marks: vec![],
  };

  // Pass 1: modules and definition scopes.
  for (fid, file) in files.iter().enumerate() {
    let name = Symbol(file.ast.node(file.root).a);
    let module = *cx.module_by_name.entry(name).or_insert_with(|| {
      cx.modules.push(Module { name, ..Module::default() })
    });
    cx.roles[fid][0] = Role::Invalid;
    cx.roles[fid][file.root.into_usize()] = Role::MultiValue;
    for &item in file.ast.list(file.ast.node(file.root).b) {
      let item = NodeId(item);
      let node = file.ast.node(item);
      let flags = match node.kind {
        NodeKind::Import => continue,
        NodeKind::Func => file.ast.func(item).flags,
        NodeKind::ExternFunc => file.ast.extern_func(item).flags,
        NodeKind::ExternMut => file.ast.words(node.b, 1)[0],
        NodeKind::StructDef => file.ast.struct_def(item).flags,
        NodeKind::EnumDef => file.ast.enum_def(item).flags,
        NodeKind::NewtypeDef => file.ast.newtype_def(item).flags,
        NodeKind::ConstDef => file.ast.const_def(item).flags,
        _ => continue,
      };
      cx.register_def(FileId(fid as u32), module, item, Symbol(node.a),
        flags & crate::types::ast::FLAG_PUB != 0);
    }
  }

  // Pass 2: imports, now that every module is known.
  for (fid, file) in files.iter().enumerate() {
    for &item in file.ast.list(file.ast.node(file.root).b) {
      let item = NodeId(item);
      if file.ast.kind(item) != NodeKind::Import { continue }
      let name = Symbol(file.ast.node(item).a);
      match cx.module_by_name.get(&name) {
        Some(&m) => {
          cx.imports[fid].insert(name, m);
          cx.roles[fid][item.into_usize()] = Role::Module;
          cx.res[fid][item.into_usize()] = Res::Module(m);
        }
        None => {
          diags.error(FileId(fid as u32), file.ast.span(item), diag::UNDEFINED_MODULE,
            format!("undefined module `{}`", interner.get(name)));
          cx.roles[fid][item.into_usize()] = Role::Invalid;
        }
      }
    }
  }

  // Pass 3: the dependency walk.
  for d in 0..cx.defs.len() {
    cx.analyze_def(DefId(d as u32));
  }

  // Unreachable nodes exist only behind parse errors; mark them so the
  // `NotVisited`-free invariant holds for downstream passes.
  for file_roles in &mut cx.roles {
    for role in file_roles.iter_mut() {
      if *role == Role::NotVisited { *role = Role::Invalid }
    }
  }

  Resolved { defs: cx.defs, modules: cx.modules, order: cx.order, roles: cx.roles, res: cx.res }
}

impl RoleCx<'_> {
  fn register_def(
    &mut self, file: FileId, module: ModuleId, node: NodeId, name: Symbol, is_pub: bool,
  ) {
    let d = self.defs.push(Def { file, node, name, module, is_pub });
    if let Some(prev) = self.modules[module].get(name) {
      // Public and private names share the module namespace.
      let prev_def = self.defs[prev].clone();
      let prev_span = self.files[prev_def.file.into_usize()].ast.span(prev_def.node);
      let span = self.files[file.into_usize()].ast.span(node);
      self.diags.error_with(file, span, diag::MULTIPLE_DEFINITION,
        format!("multiple definition of `{}`", self.interner.get(name)),
        vec![Note::here(prev_def.file, prev_span, "previous definition is here")]);
      return
    }
    if is_pub {
      self.modules[module].public.insert(name, d);
    } else {
      self.modules[module].private.insert(name, d);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::lexer::lex;
  use crate::parser::parse;

  fn resolve(sources: &[&str]) -> (Vec<ParsedFile>, Resolved, Interner, Vec<diag::Diag>) {
    let interner = Interner::default();
    let diags = DiagSink::default();
    let files: Vec<ParsedFile> = sources.iter().enumerate().map(|(i, text)| {
      let toks = lex(text, FileId(i as u32), &interner, &diags);
      let (ast, root) = parse(&toks, FileId(i as u32), &diags);
      ParsedFile { ast, root }
    }).collect();
    let resolved = run(&files, &interner, &diags);
    (files, resolved, interner, diags.into_sorted())
  }

  #[test]
  fn no_visiting_or_not_visited_survives() {
    let (files, resolved, _, diags) = resolve(&[
      "module m \
       struct Pair[T] { a T, b T } \
       function fib(n i32) -> i32 { if n < 2 { return n } return fib(n-1) + fib(n-2) } \
       function main() { }",
    ]);
    assert!(diags.is_empty(), "{diags:#?}");
    for node in 0..files[0].ast.len() {
      let role = resolved.roles[0][node];
      assert!(role != Role::NotVisited && role != Role::Visiting, "node {node}: {role:?}");
    }
  }

  #[test]
  fn roles_follow_definition_kinds() {
    let (files, resolved, interner, diags) = resolve(&[
      "module m \
       struct S { x i32 } \
       newtype File = i32 \
       const alias = S \
       const three = 3 \
       function main() { }",
    ]);
    assert!(diags.is_empty(), "{diags:#?}");
    let ast = &files[0].ast;
    let items: Vec<NodeId> =
      ast.list(ast.node(files[0].root).b).iter().map(|&i| NodeId(i)).collect();
    let role = |n: NodeId| resolved.role(FileId(0), n);
    assert_eq!(role(items[0]), Role::Type);
    assert_eq!(role(items[1]), Role::TagType);
    assert_eq!(role(items[2]), Role::Type, "alias of a struct is a type");
    assert_eq!(role(items[3]), Role::Value);
    assert_eq!(role(items[4]), Role::Value);
    let _ = interner;
  }

  #[test]
  fn dependency_order_is_topological() {
    let (files, resolved, interner, diags) = resolve(&[
      "module m \
       const b = a + 1 \
       const a = 2 \
       function main() { }",
    ]);
    assert!(diags.is_empty(), "{diags:#?}");
    let names: Vec<&str> = resolved.order.iter()
      .map(|&d| interner.get(resolved.defs[d].name)).collect();
    let a = names.iter().position(|&n| n == "a").expect("a ordered");
    let b = names.iter().position(|&n| n == "b").expect("b ordered");
    assert!(a < b, "dependency `a` must precede `b` in {names:?}");
    let _ = files;
  }

  #[test]
  fn recursive_const_reports_once_with_note() {
    let (_, _, _, diags) = resolve(&["module m const a = b; const b = a"]);
    let cycles: Vec<_> =
      diags.iter().filter(|d| d.code == diag::RECURSIVE_DEPENDENCY).collect();
    assert_eq!(cycles.len(), 1, "{diags:#?}");
    assert!(cycles[0].notes.iter().any(|n| n.msg.contains("recursion happens here")));
  }

  #[test]
  fn recursion_through_function_bodies_is_legal() {
    let (_, _, _, diags) = resolve(&[
      "module m function even(n i32) -> bool { return switch { n == 0 -> true, else -> odd(n-1) } } \
       function odd(n i32) -> bool { return switch { n == 0 -> false, else -> even(n-1) } } \
       function main() { }",
    ]);
    assert!(diags.is_empty(), "{diags:#?}");
  }

  #[test]
  fn forgot_import_note_is_one_shot() {
    let (_, _, _, diags) = resolve(&[
      "module util pub function helper() { }",
      "module m function main() { util.helper() util.helper() }",
    ]);
    let undefined: Vec<_> = diags.iter().filter(|d| d.code == diag::UNDEFINED_NAME).collect();
    assert_eq!(undefined.len(), 2);
    let noted = undefined.iter()
      .filter(|d| d.notes.iter().any(|n| n.msg.contains("forget to import")))
      .count();
    assert_eq!(noted, 1, "forgot-import note fires once per module: {diags:#?}");
  }

  #[test]
  fn private_member_access_gets_note() {
    let (_, _, _, diags) = resolve(&[
      "module util function secret() { }",
      "module m import util function main() { util.secret() }",
    ]);
    let err = diags.iter().find(|d| d.code == diag::NAME_NOT_IN_MODULE)
      .expect("private access error");
    assert!(err.notes.iter().any(|n| n.msg.contains("private definition")), "{diags:#?}");
  }

  #[test]
  fn duplicate_definitions_are_reported() {
    let (_, _, _, diags) = resolve(&["module m const a = 1; const a = 2"]);
    assert!(diags.iter().any(|d| d.code == diag::MULTIPLE_DEFINITION), "{diags:#?}");
  }

  #[test]
  fn pointer_to_own_struct_is_a_cycle() {
    let (_, _, _, diags) = resolve(&["module m struct Node { next *Node }"]);
    assert!(diags.iter().any(|d| d.code == diag::RECURSIVE_DEPENDENCY), "{diags:#?}");
  }
}
