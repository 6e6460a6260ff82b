//! End-to-end pipeline tests: whole source units in, diagnostics or an
//! artifact out.

use lyrec::{compile, Backend, Options};

fn compile_one(text: &str, backend: Backend) -> lyrec::Compilation {
  compile(vec![("test.ly".into(), text.into())], &Options { backend, print_debug: false })
}

fn codes(c: &lyrec::Compilation) -> Vec<u16> {
  c.diagnostics.iter().map(|d| d.code.0).collect()
}

#[test]
fn fib_compiles_to_recursive_c() {
  let c = compile_one(
    "module m \
     function fib(n i32) -> i32 { if n < 2 { return n } return fib(n-1) + fib(n-2) } \
     function main() { }",
    Backend::C);
  assert!(c.diagnostics.is_empty(), "{:#?}", c.diagnostics);
  let out = c.artifact.expect("artifact");
  assert!(out.contains("int32_t file0_fib(int32_t p0)"), "{out}");
  // The body calls itself.
  let body = out.split("file0_fib(int32_t p0) {").nth(1).expect("definition");
  assert!(body.contains("file0_fib("), "recursive call missing:\n{out}");
  assert!(out.contains("int main(void)"), "{out}");
}

#[test]
fn slice_sum_lowers_length_and_two_step_index() {
  let c = compile_one(
    "module m \
     function sum(xs @i32) -> i32 { \
       mut s = 0; for mut i = 0; i < xs.length; i += 1 { s += xs[i] } return s } \
     function main() { }",
    Backend::C);
  assert!(c.diagnostics.is_empty(), "{:#?}", c.diagnostics);
  let out = c.artifact.expect("artifact");
  // `xs.length` is field 0 of the slice, `xs[i]` loads the data pointer
  // and then offsets it.
  assert!(out.contains("->length"), "{out}");
  assert!(out.contains("->data"), "{out}");
  assert!(out.contains("(int32_t*)"), "{out}");
}

#[test]
fn affine_double_use_is_rejected() {
  let c = compile_one(
    "module m newtype File = i32 \
     function g(f `Affine[File]) { } \
     function main() { mut f = `Affine[File](File(3)); g(f); g(f) }",
    Backend::C);
  assert!(c.artifact.is_none());
  let uses: Vec<_> = c.diagnostics.iter()
    .filter(|d| d.msg.contains("use of consumed value")).collect();
  assert_eq!(uses.len(), 1, "{:#?}", c.diagnostics);
  assert_eq!(uses[0].code.0, 502);
}

#[test]
fn enum_switch_must_be_exhaustive() {
  let c = compile_one(
    "module m enum Color: i32 { R, G, B } \
     function k(c Color) -> i32 { return switch c { .R -> 0, .G -> 1 } } \
     function main() { }",
    Backend::C);
  assert!(c.artifact.is_none());
  assert!(c.diagnostics.iter().any(|d|
    d.msg.contains("switch must cover all possible values")), "{:#?}", c.diagnostics);
}

#[test]
fn generic_inference_specializes_for_i64() {
  let c = compile_one(
    "module m function id[T](x T) -> T { return x } \
     function main() { const y = id(7) }",
    Backend::C);
  assert!(c.diagnostics.is_empty(), "{:#?}", c.diagnostics);
  let out = c.artifact.expect("artifact");
  assert!(out.contains("file0_id__i64"), "specialization missing:\n{out}");
}

#[test]
fn unused_generic_is_not_emitted() {
  let c = compile_one(
    "module m function id[T](x T) -> T { return x } function main() { }",
    Backend::C);
  assert!(c.diagnostics.is_empty(), "{:#?}", c.diagnostics);
  let out = c.artifact.expect("artifact");
  assert!(!out.contains("file0_id"), "uninstantiated generic emitted:\n{out}");
}

#[test]
fn recursive_dependency_reports_once_with_note() {
  let c = compile_one("module m const a = b; const b = a", Backend::C);
  assert!(c.artifact.is_none());
  let cycles: Vec<_> = c.diagnostics.iter().filter(|d| d.code.0 == 211).collect();
  assert_eq!(cycles.len(), 1, "{:#?}", c.diagnostics);
  assert!(cycles[0].notes.iter().any(|n| n.msg.contains("recursion happens here")));
  let rendered = c.render_diagnostics(false);
  assert!(rendered.contains("error[E0211]"), "{rendered}");
  assert!(rendered.contains("note: recursion happens here"), "{rendered}");
}

#[test]
fn llvm_backend_emits_module() {
  let c = compile_one(
    "module m \
     function fib(n i32) -> i32 { if n < 2 { return n } return fib(n-1) + fib(n-2) } \
     function main() { }",
    Backend::Llvm);
  assert!(c.diagnostics.is_empty(), "{:#?}", c.diagnostics);
  let out = c.artifact.expect("artifact");
  assert!(out.contains("define internal i32 @file0_fib(i32 %p0)"), "{out}");
  assert!(out.contains("call i32 @file0_fib"), "{out}");
  assert!(out.contains("define i32 @main()"), "{out}");
  assert!(out.contains("br i1"), "{out}");
}

#[test]
fn short_circuit_right_operand_is_emitted_once() {
  let c = compile_one(
    "module m \
     function g() -> bool { return true } \
     function main() { let x = true and g() }",
    Backend::C);
  assert!(c.diagnostics.is_empty(), "{:#?}", c.diagnostics);
  let out = c.artifact.expect("artifact");
  let calls = out.matches("file0_g()").count();
  assert_eq!(calls, 1, "right operand must be evaluated at most once:\n{out}");
}

#[test]
fn string_literals_carry_length_prefix() {
  let c = compile_one(
    "module m function take(s @byte) { } function main() { take(\"hi\") }",
    Backend::C);
  assert!(c.diagnostics.is_empty(), "{:#?}", c.diagnostics);
  let out = c.artifact.expect("artifact");
  assert!(out.contains("2, 0, 0, 0, 104, 105"), "length prefix missing:\n{out}");
  assert!(out.contains("+ 4)"), "data pointer must skip the prefix:\n{out}");
}

#[test]
fn struct_layout_and_constructor() {
  let c = compile_one(
    "module m struct Pair { a i8, b i32 } \
     function get(p Pair) -> i32 { return p.b } \
     function main() { let p = Pair(1, 2); get(p) }",
    Backend::C);
  assert!(c.diagnostics.is_empty(), "{:#?}", c.diagnostics);
  let out = c.artifact.expect("artifact");
  assert!(out.contains("typedef struct s"), "{out}");
  assert!(out.contains("->f1"), "field access missing:\n{out}");
}

#[test]
fn lowering_produces_wellformed_blocks() {
  let sources = vec![(
    "t.ly".to_owned(),
    "module m \
     function sum(xs @i32) -> i32 { \
       mut s = 0; for mut i = 0; i < xs.length; i += 1 { \
         if xs[i] > 0 { s += xs[i] } else { continue } } \
       return s } \
     function choose(c i32) -> i32 { return switch c { 0 -> 10, 1 -> 20, else -> 30 } } \
     function main() { }".to_owned(),
  )];
  let interner = lyrec::Interner::default();
  let diags = lyrec::diag::DiagSink::default();
  let parsed: Vec<lyrec::ParsedFile> = sources.iter().enumerate().map(|(i, (_, text))| {
    let toks = lyrec::lexer::lex(text, lyrec::types::FileId(i as u32), &interner, &diags);
    let (ast, root) = lyrec::parser::parse(&toks, lyrec::types::FileId(i as u32), &diags);
    lyrec::ParsedFile { ast, root }
  }).collect();
  let resolved = lyrec::roles::run(&parsed, &interner, &diags);
  let mut env = lyrec::infer::declare(&parsed, &resolved, &interner, &diags);
  let bodies = lyrec::infer::analyze_bodies(&mut env, &parsed, &resolved, &interner, &diags);
  assert!(!diags.has_errors(), "{:#?}", diags.into_sorted());
  let lowered = lyrec::build_lir::lower_all(&mut env, &bodies, &interner);
  assert_eq!(lowered.len(), 3);
  for f in &lowered {
    f.lir.check_blocks().unwrap_or_else(|e| panic!("{}: {e}", interner.get(f.name)));
    // Every function ends with a terminator.
    let last = f.lir.insts.last().expect("non-empty function");
    assert!(last.kind.is_terminator());
  }
}

#[test]
fn multiple_modules_and_imports() {
  let c = compile(vec![
    ("util.ly".into(),
     "module util pub function double(x i32) -> i32 { return x + x }".into()),
    ("main.ly".into(),
     "module app import util function main() { util.double(21) }".into()),
  ], &Options::default());
  assert!(c.diagnostics.is_empty(), "{:#?}", c.diagnostics);
  let out = c.artifact.expect("artifact");
  assert!(out.contains("file0_double"), "{out}");
}

#[test]
fn errors_gate_emission() {
  let c = compile_one("module m function main() { undefined_name() }", Backend::C);
  assert!(c.artifact.is_none());
  assert!(codes(&c).contains(&202), "{:#?}", c.diagnostics);
}
