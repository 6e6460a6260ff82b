//! The Lyre compiler.
//!
//! Source text runs through a fixed pipeline: lexing and parsing (parallel
//! per file), role annotation (sequential, produces the dependency order),
//! the declaration phase of type analysis (sequential, fills the global
//! type/value partitions), the body phase (parallel per function), the
//! substructural checker, lowering to the low-level IR, and finally one of
//! the two backends. Every phase pushes diagnostics into a shared sink; the
//! pipeline stops at the next phase boundary once a phase has failed, and
//! code emission requires every phase to have passed.

pub mod build_lir;
pub mod diag;
pub mod emit_c;
pub mod emit_llvm;
pub mod infer;
pub mod lexer;
pub mod ownership;
pub mod parser;
pub mod roles;
pub mod symbol;
pub mod types;

use rayon::prelude::*;

pub use crate::symbol::{Interner, Symbol};
use crate::types::ast::Ast;
use crate::types::{FileId, NodeId};

/// One input file.
pub struct SourceFile {
  pub path: String,
  pub text: String,
  /// The `module` header name.
  pub module: Symbol,
}

/// One parsed file: its syntax store and root node.
pub struct ParsedFile {
  pub ast: Ast,
  pub root: NodeId,
}

/// Which emitter produces the output artifact.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum Backend {
  #[default]
  C,
  Llvm,
}

impl Backend {
  /// The artifact written into the current directory.
  #[must_use] pub fn file_name(self) -> &'static str {
    match self { Backend::C => "a.c", Backend::Llvm => "a.ll" }
  }
}

/// Compilation options.
#[derive(Default)]
pub struct Options {
  pub backend: Backend,
  /// Dump tokens, syntax trees, and typed IR to standard output.
  pub print_debug: bool,
}

/// The result of a compilation: diagnostics (sorted by position), the
/// sources (for rendering), and the artifact when every phase passed.
pub struct Compilation {
  pub files: Vec<SourceFile>,
  pub diagnostics: Vec<diag::Diag>,
  pub artifact: Option<String>,
}

impl Compilation {
  #[must_use] pub fn success(&self) -> bool { self.artifact.is_some() }

  /// Render the diagnostics in wire format.
  #[must_use] pub fn render_diagnostics(&self, color: bool) -> String {
    diag::render(&self.diagnostics, &self.files, color)
  }
}

fn dump_tir(body: &infer::FnBody, interner: &Interner) -> String {
  use std::fmt::Write as _;
  let mut out = String::new();
  let _ = writeln!(out, "function {}:", interner.get(body.name));
  for (i, inst) in body.tir.insts.iter().enumerate() {
    let _ = writeln!(out, "  %{i:<3} {:?} a={} b={} (node {})",
      inst.kind, inst.a, inst.b, inst.node.0);
  }
  out
}

/// Compile a set of `(path, text)` sources.
#[must_use] pub fn compile(sources: Vec<(String, String)>, options: &Options) -> Compilation {
  let interner = Interner::default();
  let diags = diag::DiagSink::default();

  // Lexing and parsing fan out per file; each file is independent.
  let parses: Vec<(lexer::Tokens, Ast, NodeId)> = sources.par_iter().enumerate()
    .map(|(i, (_, text))| {
      let file = FileId(i as u32);
      let tokens = lexer::lex(text, file, &interner, &diags);
      let (ast, root) = parser::parse(&tokens, file, &diags);
      (tokens, ast, root)
    })
    .collect();

  let mut files = Vec::with_capacity(sources.len());
  let mut parsed = Vec::with_capacity(sources.len());
  for ((path, text), (tokens, ast, root)) in sources.into_iter().zip(parses) {
    if options.print_debug {
      println!("tokens of {path}:");
      println!("  {:?}", tokens.toks);
      println!("syntax of {path}:");
      print!("{}", ast.dump(root, &interner));
    }
    files.push(SourceFile { path, text, module: Symbol(ast.node(root).a) });
    parsed.push(ParsedFile { ast, root });
  }

  let finish = |diags: diag::DiagSink, files: Vec<SourceFile>, artifact: Option<String>| {
    Compilation { files, diagnostics: diags.into_sorted(), artifact }
  };

  if diags.has_errors() {
    return finish(diags, files, None)
  }

  // Role annotation: sequential, so the dependency order and cycle reports
  // are deterministic.
  let resolved = roles::run(&parsed, &interner, &diags);
  if diags.has_errors() {
    return finish(diags, files, None)
  }

  // Declarations, then function bodies. A failed declaration does not stop
  // the body phase; it only gates emission.
  let mut env = infer::declare(&parsed, &resolved, &interner, &diags);
  let bodies = infer::analyze_bodies(&mut env, &parsed, &resolved, &interner, &diags);
  if options.print_debug {
    for body in &bodies {
      print!("{}", dump_tir(body, &interner));
    }
  }
  if diags.has_errors() {
    return finish(diags, files, None)
  }

  let mut ownership_ok = true;
  for body in &bodies {
    ownership_ok &= ownership::check(&env, &parsed, body, &interner, &diags);
  }
  if !ownership_ok {
    return finish(diags, files, None)
  }

  let lowered = build_lir::lower_all(&mut env, &bodies, &interner);
  let artifact = match options.backend {
    Backend::C => emit_c::emit(&env, &lowered, &interner),
    Backend::Llvm => emit_llvm::emit(&env, &lowered, &interner),
  };
  finish(diags, files, Some(artifact))
}
