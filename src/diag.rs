//! Diagnostic values and rendering.
//!
//! Passes never print; they push [`Diag`] values into a shared [`DiagSink`].
//! The sink is lock-guarded so the parallel phases cannot interleave, and
//! diagnostics are sorted by source position before rendering so the output
//! is deterministic regardless of thread scheduling.

use std::fmt::Write as _;
use std::sync::Mutex;

use crate::types::{FileId, Idx, Span};
use crate::SourceFile;

/// A stable diagnostic code. The numeric values are opaque but fixed:
/// `E00xx` driver, `E01xx` syntax, `E02xx` resolution, `E03xx` types,
/// `E04xx` flow, `E05xx` substructural.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct ECode(pub u16);

impl std::fmt::Display for ECode {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "E{:04}", self.0)
  }
}

macro_rules! codes {
  ($($(#[$attr:meta])* $name:ident = $n:literal,)*) => {
    $($(#[$attr])* pub const $name: ECode = ECode($n);)*
  }
}

codes! {
  /// A source file could not be read.
  UNREADABLE_FILE = 1,
  /// The output artifact could not be written.
  UNWRITABLE_OUTPUT = 2,

  /// A byte that begins no token.
  INVALID_TOKEN = 101,
  /// A token that no production accepts at this point.
  UNEXPECTED_TOKEN = 102,
  /// A character literal with zero or more than one character.
  BAD_CHAR_LITERAL = 103,
  /// A string or character literal with no closing quote.
  UNTERMINATED_STRING = 104,
  /// A `\\` escape the lexer does not know.
  UNKNOWN_ESCAPE = 105,
  /// A decimal literal that does not fit in a signed 64-bit integer.
  INT_OVERFLOW = 106,
  /// A module that transitively imports itself at load time.
  RECURSIVE_IMPORT = 107,

  /// `import` of a module that is not part of the compilation.
  UNDEFINED_MODULE = 201,
  /// An identifier that resolves to nothing in scope.
  UNDEFINED_NAME = 202,
  /// Member access on a module that has no such public name.
  NAME_NOT_IN_MODULE = 203,
  /// Two definitions of one name in the same scope.
  MULTIPLE_DEFINITION = 204,
  /// Two extern definitions with the same link name.
  MULTIPLE_EXTERN = 205,
  /// Access to a private definition of another module.
  PRIVATE_ACCESS = 206,
  /// A type (or other non-value) where a value is required.
  EXPECTED_VALUE = 207,
  /// A value (or other non-type) where a type is required.
  EXPECTED_TYPE = 208,
  /// A tag type is required (bracket application target).
  EXPECTED_TAG_TYPE = 209,
  /// Assignment target is not a function or `mut` definition.
  EXPECTED_FUNCTION_OR_MUT = 210,
  /// A definition depends on itself through initializers or types.
  RECURSIVE_DEPENDENCY = 211,

  /// Binary operator applied to mismatched or unsupported operands.
  BINOP_MISMATCH = 301,
  /// Unary operator applied to an unsupported operand.
  UNOP_MISMATCH = 302,
  /// Call of a value whose type is not a function.
  NOT_A_FUNCTION = 303,
  /// Wrong number of call arguments.
  ARG_COUNT = 304,
  /// Wrong number of constructor fields.
  FIELD_COUNT = 305,
  /// Wrong number of bracket indices.
  INDEX_COUNT = 306,
  /// Index applied to a value that is not indexable.
  INDEX_OPERAND = 307,
  /// The second `slice` constructor argument is not a pointer.
  SLICE_CTOR_POINTER = 308,
  /// An enum representation type that is not an integer.
  ENUM_REPR_NOT_INT = 309,
  /// An `as` cast between types with no permitted conversion.
  CAST_NOT_PERMITTED = 310,
  /// `size_of`/layout query on a type of unknown size.
  UNKNOWN_SIZE = 311,
  /// Alignment query on a type of unknown alignment.
  UNKNOWN_ALIGN = 312,
  /// A value whose type cannot be determined from context.
  TYPE_INFERENCE = 313,
  /// Type arguments of a generic call could not be inferred.
  TYARG_INFERENCE = 314,
  /// Switch arms with incompatible types.
  SWITCH_INCOMPATIBLE = 315,
  /// Enum switch that does not cover every member.
  SWITCH_NOT_EXHAUSTIVE = 316,
  /// The same switch pattern listed twice.
  DUPLICATE_CASE = 317,
  /// An `else` arm on an already exhaustive switch.
  UNREACHABLE_ELSE = 318,
  /// General type mismatch against an expected type.
  TYPE_MISMATCH = 319,
  /// Field access with a name the type does not have.
  UNKNOWN_FIELD = 320,
  /// A `const` initializer that is not a compile-time constant.
  NOT_CONSTANT = 321,
  /// Constant arithmetic that overflows its type.
  CONST_OVERFLOW = 322,
  /// Constant division or remainder by zero (or `INT_MIN / -1`).
  CONST_DIV_ZERO = 323,
  /// Constant shift by a negative amount.
  CONST_SHIFT_NEGATIVE = 324,
  /// Two struct fields with the same name.
  DUPLICATE_FIELD = 325,
  /// A struct with no fields.
  EMPTY_STRUCT = 326,
  /// An array literal with no elements.
  EMPTY_ARRAY = 327,
  /// Two enum members with the same name.
  DUPLICATE_ENUM_MEMBER = 328,
  /// Dereference of a non-pointer value.
  DEREF_NON_POINTER = 329,

  /// `break` outside any loop.
  MISPLACED_BREAK = 401,
  /// `continue` outside any loop.
  MISPLACED_CONTINUE = 402,
  /// A non-void function that can fall off the end.
  MISSING_RETURN = 403,
  /// `main` with parameters or a return type.
  MAIN_SIGNATURE = 404,
  /// `return` with a value in a void function, or without one otherwise.
  RETURN_VALUE_MISMATCH = 405,

  /// Assignment to a place of linear type.
  ASSIGN_TO_LINEAR = 501,
  /// Use of a value after it was consumed.
  USE_OF_CONSUMED = 502,
  /// A value declared outside a loop consumed inside it.
  CONSUMED_IN_LOOP = 503,
  /// Move of a value while it is borrowed.
  MOVE_BORROWED = 504,
  /// Shared access to a mutably borrowed value.
  BORROW_CONFLICT = 505,
  /// A second mutable borrow of an already mutably borrowed value.
  MULTIPLE_MUTABLE = 506,
}

/// A note attached under a diagnostic, optionally pointing at source.
#[derive(Clone, Debug)]
pub struct Note {
  /// Where the note points, if anywhere.
  pub loc: Option<(FileId, Span)>,
  /// The note text.
  pub msg: String,
}

impl Note {
  /// A note with a source location.
  #[must_use] pub fn here(file: FileId, span: Span, msg: impl Into<String>) -> Note {
    Note { loc: Some((file, span)), msg: msg.into() }
  }
  /// A note with no source location.
  #[must_use] pub fn bare(msg: impl Into<String>) -> Note {
    Note { loc: None, msg: msg.into() }
  }
}

/// One reported error with its attached notes.
#[derive(Clone, Debug)]
pub struct Diag {
  /// The file the primary span is in.
  pub file: FileId,
  /// The marked source range.
  pub span: Span,
  /// The stable code.
  pub code: ECode,
  /// The rendered message.
  pub msg: String,
  /// Notes emitted inline after the error.
  pub notes: Vec<Note>,
}

/// The shared diagnostic sink.
#[derive(Default)]
pub struct DiagSink(Mutex<Vec<Diag>>);

impl DiagSink {
  /// Report an error with no notes.
  pub fn error(&self, file: FileId, span: Span, code: ECode, msg: impl Into<String>) {
    self.push(Diag { file, span, code, msg: msg.into(), notes: vec![] })
  }

  /// Report an error with notes.
  pub fn error_with(
    &self, file: FileId, span: Span, code: ECode, msg: impl Into<String>, notes: Vec<Note>,
  ) {
    self.push(Diag { file, span, code, msg: msg.into(), notes })
  }

  /// Push a fully built diagnostic.
  pub fn push(&self, d: Diag) {
    self.0.lock().expect("diagnostic sink poisoned").push(d)
  }

  /// Whether any error has been reported.
  #[must_use] pub fn has_errors(&self) -> bool {
    !self.0.lock().expect("diagnostic sink poisoned").is_empty()
  }

  /// The number of errors reported so far.
  #[must_use] pub fn count(&self) -> usize {
    self.0.lock().expect("diagnostic sink poisoned").len()
  }

  /// Take the diagnostics, sorted by (file, position, code).
  #[must_use] pub fn into_sorted(self) -> Vec<Diag> {
    let mut v = self.0.into_inner().expect("diagnostic sink poisoned");
    v.sort_by_key(|d| (d.file, d.span.start, d.span.end, d.code));
    v
  }
}

const RED: &str = "\x1b[31;1m";
const CYAN: &str = "\x1b[36;1m";
const RESET: &str = "\x1b[0m";

/// 1-based line and column of a byte offset, plus the line's text.
fn locate(text: &str, offset: u32) -> (usize, usize, &str) {
  let offset = (offset as usize).min(text.len());
  let before = &text[..offset];
  let line = before.bytes().filter(|&b| b == b'\n').count() + 1;
  let line_start = before.rfind('\n').map_or(0, |i| i + 1);
  let col = offset - line_start + 1;
  let line_end = text[line_start..].find('\n').map_or(text.len(), |i| line_start + i);
  (line, col, &text[line_start..line_end])
}

fn render_mark(out: &mut String, text: &str, span: Span, color: &str, use_color: bool) {
  let (_, col, line) = locate(text, span.start);
  let _ = writeln!(out, "  {line}");
  let width = (span.end.saturating_sub(span.start) as usize).max(1);
  let width = width.min(line.len().saturating_sub(col - 1).max(1));
  let _ = write!(out, "  {:1$}", "", col - 1);
  if use_color { out.push_str(color) }
  out.push('^');
  for _ in 1..width { out.push('~') }
  if use_color { out.push_str(RESET) }
  out.push('\n');
}

/// Render diagnostics in `path:line:column:` wire format.
#[must_use] pub fn render(diags: &[Diag], files: &[SourceFile], use_color: bool) -> String {
  let mut out = String::new();
  for d in diags {
    let f = &files[d.file.into_usize()];
    let (line, col, _) = locate(&f.text, d.span.start);
    let (e0, e1) = if use_color { (RED, RESET) } else { ("", "") };
    let _ = writeln!(out, "{}:{line}:{col}: {e0}error[{}]:{e1} {}", f.path, d.code, d.msg);
    render_mark(&mut out, &f.text, d.span, RED, use_color);
    for note in &d.notes {
      let (n0, n1) = if use_color { (CYAN, RESET) } else { ("", "") };
      match note.loc {
        Some((nf, nspan)) => {
          let nf = &files[nf.into_usize()];
          let (nline, ncol, _) = locate(&nf.text, nspan.start);
          let _ = writeln!(out, "{}:{nline}:{ncol}: {n0}note:{n1} {}", nf.path, note.msg);
          render_mark(&mut out, &nf.text, nspan, CYAN, use_color);
        }
        None => { let _ = writeln!(out, "{}:{line}:{col}: {n0}note:{n1} {}", f.path, note.msg); }
      }
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn locate_finds_line_and_column() {
    let text = "module m\nfunction f() {\n}\n";
    let (line, col, l) = locate(text, 9);
    assert_eq!((line, col), (2, 1));
    assert_eq!(l, "function f() {");
    let (line, col, _) = locate(text, 18);
    assert_eq!((line, col), (2, 10));
  }

  #[test]
  fn wire_format() {
    let files = vec![SourceFile {
      path: "t.ly".into(),
      text: "module m\nconst a = b\n".into(),
      module: crate::Symbol::NULL,
    }];
    let d = Diag {
      file: FileId(0),
      span: Span { start: 19, end: 20 },
      code: UNDEFINED_NAME,
      msg: "undefined name `b`".into(),
      notes: vec![Note::bare("did you mean `a`?")],
    };
    let out = render(&[d], &files, false);
    assert!(out.starts_with("t.ly:2:11: error[E0202]: undefined name `b`"), "{out}");
    assert!(out.contains("note: did you mean `a`?"), "{out}");
    assert!(out.contains('^'), "{out}");
  }
}
