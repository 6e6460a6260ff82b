//! The recursive-descent parser. Consumes one file's token stream and
//! produces its [`Ast`]. Statement separators (`;`) are optional; item-level
//! errors resynchronize at the next item keyword so one malformed item does
//! not take the rest of the file with it.

use smallvec::SmallVec;

use crate::diag::{self, DiagSink};
use crate::lexer::{Tok, Tokens};
use crate::symbol::Symbol;
use crate::types::ast::{Ast, NodeKind, FLAG_PUB};
use crate::types::{FileId, NodeId, Span};

struct Parser<'a> {
  toks: &'a [Tok],
  spans: &'a [Span],
  pos: usize,
  ast: Ast,
  file: FileId,
  diags: &'a DiagSink,
}

type List = SmallVec<[u32; 8]>;

impl<'a> Parser<'a> {
  fn peek(&self) -> Tok { self.toks[self.pos] }
  fn span(&self) -> Span { self.spans[self.pos] }
  fn prev_span(&self) -> Span { self.spans[self.pos.saturating_sub(1)] }

  fn bump(&mut self) -> Tok {
    let t = self.toks[self.pos];
    if t != Tok::Eof { self.pos += 1 }
    t
  }

  fn eat(&mut self, t: Tok) -> bool {
    if self.peek() == t { self.pos += 1; true } else { false }
  }

  fn expect(&mut self, t: Tok, what: &str) -> bool {
    if self.eat(t) { return true }
    self.diags.error(self.file, self.span(), diag::UNEXPECTED_TOKEN,
      format!("expected {what}, found {:?}", self.peek()));
    false
  }

  fn ident(&mut self, what: &str) -> Symbol {
    match self.peek() {
      Tok::Ident(sym) => { self.pos += 1; sym }
      _ => {
        self.diags.error(self.file, self.span(), diag::UNEXPECTED_TOKEN,
          format!("expected {what}, found {:?}", self.peek()));
        Symbol::NULL
      }
    }
  }

  fn error_node(&mut self, msg: &str) -> NodeId {
    self.diags.error(self.file, self.span(), diag::UNEXPECTED_TOKEN, msg.to_owned());
    NodeId(0)
  }

  // Items

  fn file(&mut self) -> NodeId {
    let start = self.span();
    self.expect(Tok::Module, "`module` header");
    let name = self.ident("module name");
    let mut items = List::new();
    while self.peek() != Tok::Eof {
      let before = self.pos;
      let item = self.item();
      if item != NodeId(0) { items.push(item.0) }
      if self.pos == before {
        // Resynchronize: the item parser made no progress.
        self.bump();
        while !matches!(self.peek(),
          Tok::Eof | Tok::Pub | Tok::Function | Tok::Extern | Tok::Struct | Tok::Enum
          | Tok::Newtype | Tok::Const | Tok::Import) { self.bump(); }
      }
    }
    let at = self.ast.push_list(&items);
    self.ast.push(NodeKind::File, name.0, at, start.to(self.prev_span()))
  }

  fn item(&mut self) -> NodeId {
    let flags = if self.eat(Tok::Pub) { FLAG_PUB } else { 0 };
    match self.peek() {
      Tok::Import => {
        let start = self.span();
        self.pos += 1;
        let name = self.ident("module name");
        self.eat(Tok::Semi);
        self.ast.push(NodeKind::Import, name.0, 0, start.to(self.prev_span()))
      }
      Tok::Function => self.function(flags),
      Tok::Extern => self.extern_item(flags),
      Tok::Struct => self.struct_item(flags),
      Tok::Enum => self.enum_item(flags),
      Tok::Newtype => self.newtype_item(flags),
      Tok::Const => self.const_item(flags),
      _ => NodeId(0),
    }
  }

  fn typarams(&mut self) -> List {
    let mut out = List::new();
    if self.eat(Tok::LBracket) {
      loop {
        out.push(self.ident("type parameter").0);
        if !self.eat(Tok::Comma) { break }
      }
      self.expect(Tok::RBracket, "`]`");
    }
    out
  }

  fn params(&mut self) -> List {
    let mut out = List::new();
    self.expect(Tok::LParen, "`(`");
    if !self.eat(Tok::RParen) {
      loop {
        let name = self.ident("parameter name");
        let ty = self.ty();
        out.push(name.0);
        out.push(ty.0);
        if !self.eat(Tok::Comma) { break }
      }
      self.expect(Tok::RParen, "`)`");
    }
    out
  }

  fn function(&mut self, flags: u32) -> NodeId {
    let start = self.span();
    self.pos += 1;
    let name = self.ident("function name");
    let typarams = self.typarams();
    let params = self.params();
    let ret = if self.eat(Tok::Arrow) { self.ty() } else { NodeId(0) };
    let body = self.block();
    let mut extra = vec![flags, body.0, ret.0, typarams.len() as u32];
    extra.extend_from_slice(&typarams);
    extra.push(params.len() as u32 / 2);
    extra.extend_from_slice(&params);
    let at = self.ast.push_extra(&extra);
    self.ast.push(NodeKind::Func, name.0, at, start.to(self.prev_span()))
  }

  fn extern_item(&mut self, flags: u32) -> NodeId {
    let start = self.span();
    self.pos += 1;
    match self.peek() {
      Tok::Function => {
        self.pos += 1;
        let name = self.ident("function name");
        let params = self.params();
        let ret = if self.eat(Tok::Arrow) { self.ty() } else { NodeId(0) };
        let mut extra = vec![flags, ret.0, params.len() as u32 / 2];
        extra.extend_from_slice(&params);
        let at = self.ast.push_extra(&extra);
        self.ast.push(NodeKind::ExternFunc, name.0, at, start.to(self.prev_span()))
      }
      Tok::Mut => {
        self.pos += 1;
        let name = self.ident("variable name");
        let ty = self.ty();
        let at = self.ast.push_extra(&[flags, ty.0]);
        self.ast.push(NodeKind::ExternMut, name.0, at, start.to(self.prev_span()))
      }
      _ => self.error_node("expected `function` or `mut` after `extern`"),
    }
  }

  fn struct_item(&mut self, flags: u32) -> NodeId {
    let start = self.span();
    self.pos += 1;
    let name = self.ident("struct name");
    let typarams = self.typarams();
    let mut fields = List::new();
    self.expect(Tok::LBrace, "`{`");
    while !self.eat(Tok::RBrace) {
      if self.peek() == Tok::Eof { self.expect(Tok::RBrace, "`}`"); break }
      let fname = self.ident("field name");
      let ty = self.ty();
      fields.push(fname.0);
      fields.push(ty.0);
      self.eat(Tok::Comma);
    }
    let mut extra = vec![flags, typarams.len() as u32];
    extra.extend_from_slice(&typarams);
    extra.push(fields.len() as u32 / 2);
    extra.extend_from_slice(&fields);
    let at = self.ast.push_extra(&extra);
    self.ast.push(NodeKind::StructDef, name.0, at, start.to(self.prev_span()))
  }

  fn enum_item(&mut self, flags: u32) -> NodeId {
    let start = self.span();
    self.pos += 1;
    let name = self.ident("enum name");
    self.expect(Tok::Colon, "`:`");
    let repr = self.ty();
    let mut members = List::new();
    self.expect(Tok::LBrace, "`{`");
    while !self.eat(Tok::RBrace) {
      if self.peek() == Tok::Eof { self.expect(Tok::RBrace, "`}`"); break }
      members.push(self.ident("enum member").0);
      self.eat(Tok::Comma);
    }
    let mut extra = vec![flags, repr.0, members.len() as u32];
    extra.extend_from_slice(&members);
    let at = self.ast.push_extra(&extra);
    self.ast.push(NodeKind::EnumDef, name.0, at, start.to(self.prev_span()))
  }

  fn newtype_item(&mut self, flags: u32) -> NodeId {
    let start = self.span();
    self.pos += 1;
    let name = self.ident("newtype name");
    let mut arity = 0;
    if self.eat(Tok::LBracket) {
      if let Tok::Int(n) = self.peek() { self.pos += 1; arity = n as u32 }
      else { self.error_node("expected tag arity"); }
      self.expect(Tok::RBracket, "`]`");
    }
    self.expect(Tok::Assign, "`=`");
    let inner = self.ty();
    let at = self.ast.push_extra(&[flags, arity, inner.0]);
    self.ast.push(NodeKind::NewtypeDef, name.0, at, start.to(self.prev_span()))
  }

  fn const_item(&mut self, flags: u32) -> NodeId {
    let start = self.span();
    self.pos += 1;
    let name = self.ident("constant name");
    self.expect(Tok::Assign, "`=`");
    let value = self.expr();
    self.eat(Tok::Semi);
    let at = self.ast.push_extra(&[flags, value.0]);
    self.ast.push(NodeKind::ConstDef, name.0, at, start.to(self.prev_span()))
  }

  // Types. Type expressions reuse the expression node kinds; the role pass
  // decides whether `*`/`@`/`[]`/`.` denote type or value forms.

  fn ty(&mut self) -> NodeId {
    let start = self.span();
    match self.peek() {
      Tok::Star => {
        self.pos += 1;
        let is_mut = u32::from(self.eat(Tok::Mut));
        let inner = self.ty();
        self.ast.push(NodeKind::Star, inner.0, is_mut, start.to(self.prev_span()))
      }
      Tok::At => {
        self.pos += 1;
        let is_mut = u32::from(self.eat(Tok::Mut));
        let inner = self.ty();
        self.ast.push(NodeKind::At, inner.0, is_mut, start.to(self.prev_span()))
      }
      _ => {
        let mut node = match self.bump() {
          Tok::Ident(sym) => self.ast.push(NodeKind::Ident, sym.0, 0, start),
          Tok::Builtin(sym) => self.ast.push(NodeKind::BuiltinId, sym.0, 0, start),
          t => {
            if t != Tok::Eof { self.pos -= 1 }
            return self.error_node("expected a type")
          }
        };
        loop {
          match self.peek() {
            Tok::Dot => {
              self.pos += 1;
              let name = self.ident("member name");
              node = self.ast.push(NodeKind::FieldOp, node.0, name.0, start.to(self.prev_span()));
            }
            Tok::LBracket => {
              self.pos += 1;
              let mut args = List::new();
              if !self.eat(Tok::RBracket) {
                loop {
                  // Array lengths and tag arguments are expressions;
                  // type arguments parse as type terms.
                  let arg = match self.peek() {
                    Tok::Int(_) => self.primary(),
                    _ => self.ty(),
                  };
                  args.push(arg.0);
                  if !self.eat(Tok::Comma) { break }
                }
                self.expect(Tok::RBracket, "`]`");
              }
              let at = self.ast.push_list(&args);
              node = self.ast.push(NodeKind::IndexOp, node.0, at, start.to(self.prev_span()));
            }
            _ => return node,
          }
        }
      }
    }
  }

  // Statements

  fn block(&mut self) -> NodeId {
    let start = self.span();
    if !self.expect(Tok::LBrace, "`{`") { return NodeId(0) }
    let mut stmts = List::new();
    while !self.eat(Tok::RBrace) {
      if self.peek() == Tok::Eof { self.expect(Tok::RBrace, "`}`"); break }
      let before = self.pos;
      let stmt = self.stmt();
      if stmt != NodeId(0) { stmts.push(stmt.0) }
      self.eat(Tok::Semi);
      if self.pos == before { self.bump(); }
    }
    let at = self.ast.push_list(&stmts);
    self.ast.push(NodeKind::Block, at, 0, start.to(self.prev_span()))
  }

  fn let_stmt(&mut self, kind: NodeKind) -> NodeId {
    let start = self.span();
    self.pos += 1;
    let name = self.ident("variable name");
    let ty = if self.peek() == Tok::Assign { NodeId(0) } else { self.ty() };
    self.expect(Tok::Assign, "`=`");
    let init = self.expr();
    let at = self.ast.push_extra(&[name.0, ty.0, init.0]);
    self.ast.push(kind, at, 0, start.to(self.prev_span()))
  }

  fn if_stmt(&mut self) -> NodeId {
    let start = self.span();
    self.pos += 1;
    let cond = self.expr();
    let then = self.block();
    let els = if self.eat(Tok::Else) {
      if self.peek() == Tok::If { self.if_stmt() } else { self.block() }
    } else { NodeId(0) };
    let at = self.ast.push_extra(&[then.0, els.0]);
    self.ast.push(NodeKind::If, cond.0, at, start.to(self.prev_span()))
  }

  fn simple_stmt(&mut self) -> NodeId {
    // An expression, optionally continued as an assignment.
    let start = self.span();
    let place = self.expr();
    let op = match self.peek() {
      Tok::Assign => None,
      Tok::PlusEq => Some(NodeKind::Add), Tok::MinusEq => Some(NodeKind::Sub),
      Tok::StarEq => Some(NodeKind::Mul), Tok::SlashEq => Some(NodeKind::Div),
      Tok::PercentEq => Some(NodeKind::Rem), Tok::AmpEq => Some(NodeKind::BitAnd),
      Tok::PipeEq => Some(NodeKind::BitOr), Tok::CaretEq => Some(NodeKind::BitXor),
      Tok::ShlEq => Some(NodeKind::Shl), Tok::ShrEq => Some(NodeKind::Shr),
      _ => return place,
    };
    self.pos += 1;
    let value = self.expr();
    let span = start.to(self.prev_span());
    match op {
      None => self.ast.push(NodeKind::Assign, place.0, value.0, span),
      Some(op) => {
        let at = self.ast.push_extra(&[op as u32, place.0, value.0]);
        self.ast.push(NodeKind::OpAssign, at, 0, span)
      }
    }
  }

  fn stmt(&mut self) -> NodeId {
    let start = self.span();
    match self.peek() {
      Tok::Let => self.let_stmt(NodeKind::Let),
      // A body-level `const` is an immutable binding.
      Tok::Const => self.let_stmt(NodeKind::Let),
      Tok::Mut => self.let_stmt(NodeKind::LetMut),
      Tok::If => self.if_stmt(),
      Tok::While => {
        self.pos += 1;
        let cond = self.expr();
        let body = self.block();
        self.ast.push(NodeKind::While, cond.0, body.0, start.to(self.prev_span()))
      }
      Tok::For => {
        self.pos += 1;
        let init = self.stmt();
        self.expect(Tok::Semi, "`;`");
        let cond = self.expr();
        self.expect(Tok::Semi, "`;`");
        let step = self.stmt();
        let body = self.block();
        let at = self.ast.push_extra(&[init.0, cond.0, step.0, body.0]);
        self.ast.push(NodeKind::For, at, 0, start.to(self.prev_span()))
      }
      Tok::Break => { self.pos += 1; self.ast.push(NodeKind::Break, 0, 0, start) }
      Tok::Continue => { self.pos += 1; self.ast.push(NodeKind::Continue, 0, 0, start) }
      Tok::Return => {
        self.pos += 1;
        let value = match self.peek() {
          Tok::RBrace | Tok::Semi | Tok::Eof => NodeId(0),
          _ => self.expr(),
        };
        self.ast.push(NodeKind::Return, value.0, 0, start.to(self.prev_span()))
      }
      Tok::LBrace => self.block(),
      _ => self.simple_stmt(),
    }
  }

  // Expressions

  fn expr(&mut self) -> NodeId { self.or_expr() }

  fn binary(
    &mut self,
    next: fn(&mut Self) -> NodeId,
    op_of: fn(Tok) -> Option<NodeKind>,
  ) -> NodeId {
    let start = self.span();
    let mut lhs = next(self);
    while let Some(kind) = op_of(self.peek()) {
      self.pos += 1;
      let rhs = next(self);
      lhs = self.ast.push(kind, lhs.0, rhs.0, start.to(self.prev_span()));
    }
    lhs
  }

  fn or_expr(&mut self) -> NodeId {
    self.binary(Self::and_expr, |t| (t == Tok::Or).then_some(NodeKind::OrL))
  }

  fn and_expr(&mut self) -> NodeId {
    self.binary(Self::not_expr, |t| (t == Tok::And).then_some(NodeKind::AndL))
  }

  fn not_expr(&mut self) -> NodeId {
    let start = self.span();
    if self.eat(Tok::Not) {
      let operand = self.not_expr();
      self.ast.push(NodeKind::NotL, operand.0, 0, start.to(self.prev_span()))
    } else {
      self.cmp_expr()
    }
  }

  fn cmp_expr(&mut self) -> NodeId {
    self.binary(Self::bit_expr, |t| Some(match t {
      Tok::EqEq => NodeKind::EqEq, Tok::NotEq => NodeKind::Ne,
      Tok::Lt => NodeKind::Lt, Tok::Le => NodeKind::Le,
      Tok::Gt => NodeKind::Gt, Tok::Ge => NodeKind::Ge,
      _ => return None,
    }))
  }

  fn bit_expr(&mut self) -> NodeId {
    self.binary(Self::add_expr, |t| Some(match t {
      Tok::Amp => NodeKind::BitAnd, Tok::Pipe => NodeKind::BitOr,
      Tok::Caret => NodeKind::BitXor, Tok::Shl => NodeKind::Shl,
      Tok::Shr => NodeKind::Shr,
      _ => return None,
    }))
  }

  fn add_expr(&mut self) -> NodeId {
    self.binary(Self::mul_expr, |t| Some(match t {
      Tok::Plus => NodeKind::Add, Tok::Minus => NodeKind::Sub,
      _ => return None,
    }))
  }

  fn mul_expr(&mut self) -> NodeId {
    self.binary(Self::unary_expr, |t| Some(match t {
      Tok::Star => NodeKind::Mul, Tok::Slash => NodeKind::Div,
      Tok::Percent => NodeKind::Rem,
      _ => return None,
    }))
  }

  fn unary_expr(&mut self) -> NodeId {
    let start = self.span();
    match self.peek() {
      Tok::Minus => {
        self.pos += 1;
        let operand = self.unary_expr();
        self.ast.push(NodeKind::Neg, operand.0, 0, start.to(self.prev_span()))
      }
      Tok::Amp => {
        self.pos += 1;
        let operand = self.unary_expr();
        self.ast.push(NodeKind::Amp, operand.0, 0, start.to(self.prev_span()))
      }
      Tok::Star => {
        self.pos += 1;
        let is_mut = u32::from(self.eat(Tok::Mut));
        let operand = self.unary_expr();
        self.ast.push(NodeKind::Star, operand.0, is_mut, start.to(self.prev_span()))
      }
      Tok::At => {
        self.pos += 1;
        let is_mut = u32::from(self.eat(Tok::Mut));
        let operand = self.unary_expr();
        self.ast.push(NodeKind::At, operand.0, is_mut, start.to(self.prev_span()))
      }
      _ => self.postfix_expr(),
    }
  }

  fn postfix_expr(&mut self) -> NodeId {
    let start = self.span();
    let mut node = self.primary();
    loop {
      match self.peek() {
        Tok::LParen => {
          self.pos += 1;
          let mut args = List::new();
          if !self.eat(Tok::RParen) {
            loop {
              args.push(self.expr().0);
              if !self.eat(Tok::Comma) { break }
            }
            self.expect(Tok::RParen, "`)`");
          }
          let at = self.ast.push_list(&args);
          node = self.ast.push(NodeKind::Call, node.0, at, start.to(self.prev_span()));
        }
        Tok::LBracket => {
          self.pos += 1;
          let mut args = List::new();
          if !self.eat(Tok::RBracket) {
            loop {
              args.push(self.expr().0);
              if !self.eat(Tok::Comma) { break }
            }
            self.expect(Tok::RBracket, "`]`");
          }
          let at = self.ast.push_list(&args);
          node = self.ast.push(NodeKind::IndexOp, node.0, at, start.to(self.prev_span()));
        }
        Tok::Dot => {
          self.pos += 1;
          let name = self.ident("member name");
          node = self.ast.push(NodeKind::FieldOp, node.0, name.0, start.to(self.prev_span()));
        }
        Tok::As => {
          self.pos += 1;
          let ty = self.ty();
          node = self.ast.push(NodeKind::CastOp, node.0, ty.0, start.to(self.prev_span()));
        }
        _ => return node,
      }
    }
  }

  fn primary(&mut self) -> NodeId {
    let start = self.span();
    match self.bump() {
      Tok::Int(v) => {
        let v = v as u64;
        self.ast.push(NodeKind::Int, v as u32, (v >> 32) as u32, start)
      }
      Tok::Float(v) => {
        let bits = v.to_bits();
        self.ast.push(NodeKind::Float, bits as u32, (bits >> 32) as u32, start)
      }
      Tok::Char(c) => self.ast.push(NodeKind::CharLit, u32::from(c), 0, start),
      Tok::Str(sym) => self.ast.push(NodeKind::StrLit, sym.0, 0, start),
      Tok::Null => self.ast.push(NodeKind::NullLit, 0, 0, start),
      Tok::True => self.ast.push(NodeKind::TrueLit, 0, 0, start),
      Tok::False => self.ast.push(NodeKind::FalseLit, 0, 0, start),
      Tok::Ident(sym) => self.ast.push(NodeKind::Ident, sym.0, 0, start),
      Tok::Builtin(sym) => self.ast.push(NodeKind::BuiltinId, sym.0, 0, start),
      Tok::Dot => {
        let name = self.ident("member name");
        self.ast.push(NodeKind::DotName, name.0, 0, start.to(self.prev_span()))
      }
      Tok::LParen => {
        let inner = self.expr();
        self.expect(Tok::RParen, "`)`");
        inner
      }
      Tok::LBracket => {
        let mut elems = List::new();
        if !self.eat(Tok::RBracket) {
          loop {
            elems.push(self.expr().0);
            if !self.eat(Tok::Comma) { break }
          }
          self.expect(Tok::RBracket, "`]`");
        }
        let at = self.ast.push_list(&elems);
        self.ast.push(NodeKind::ArrayLit, at, 0, start.to(self.prev_span()))
      }
      Tok::Switch => {
        let scrut = if self.peek() == Tok::LBrace { NodeId(0) } else { self.expr() };
        self.expect(Tok::LBrace, "`{`");
        let mut arms = List::new();
        let mut n_arms = 0u32;
        while !self.eat(Tok::RBrace) {
          if self.peek() == Tok::Eof { self.expect(Tok::RBrace, "`}`"); break }
          let pat = if self.eat(Tok::Else) { NodeId(0) } else { self.expr() };
          self.expect(Tok::Arrow, "`->`");
          let value = self.expr();
          arms.push(pat.0);
          arms.push(value.0);
          n_arms += 1;
          if !self.eat(Tok::Comma) { self.expect(Tok::RBrace, "`}`"); break }
        }
        let mut extra = vec![n_arms];
        extra.extend_from_slice(&arms);
        let at = self.ast.push_extra(&extra);
        self.ast.push(NodeKind::SwitchExpr, scrut.0, at, start.to(self.prev_span()))
      }
      t => {
        if t != Tok::Eof { self.pos -= 1 }
        self.error_node("expected an expression")
      }
    }
  }
}

/// Parse one file's tokens into its syntax tree. The root node is the last
/// node pushed (a [`NodeKind::File`]).
#[must_use] pub fn parse(tokens: &Tokens, file: FileId, diags: &DiagSink) -> (Ast, NodeId) {
  let mut p = Parser {
    toks: &tokens.toks,
    spans: &tokens.spans,
    pos: 0,
    ast: Ast::default(),
    file,
    diags,
  };
  let root = p.file();
  (p.ast, root)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::lexer::lex;
  use crate::symbol::Interner;

  fn parse_ok(text: &str) -> (Ast, NodeId, Interner) {
    let interner = Interner::default();
    let diags = DiagSink::default();
    let toks = lex(text, FileId(0), &interner, &diags);
    let (ast, root) = parse(&toks, FileId(0), &diags);
    assert!(!diags.has_errors(), "unexpected parse errors in {text:?}:\n{:#?}",
      diags.into_sorted());
    (ast, root, interner)
  }

  #[test]
  fn parses_fib() {
    let (ast, root, interner) = parse_ok(
      "module m \
       function fib(n i32) -> i32 { if n < 2 { return n } return fib(n-1) + fib(n-2) } \
       function main() { }");
    let items = ast.list(ast.node(root).b).to_vec();
    assert_eq!(items.len(), 2);
    let fib = ast.func(NodeId(items[0]));
    assert_eq!(interner.get(fib.name), "fib");
    assert_eq!(fib.param_pairs().len(), 1);
    assert_ne!(fib.ret, NodeId(0));
    let main = ast.func(NodeId(items[1]));
    assert_eq!(interner.get(main.name), "main");
    assert_eq!(main.ret, NodeId(0));
  }

  #[test]
  fn precedence() {
    // `1 + 2 * 3 < 4 and not 5 == 6` parses as
    // `((1 + (2*3)) < 4) and (not (5 == 6))`.
    let (ast, root, _) = parse_ok("module m const c = 1 + 2 * 3 < 4 and not 5 == 6");
    let items = ast.list(ast.node(root).b).to_vec();
    let value = ast.const_def(NodeId(items[0])).value;
    assert_eq!(ast.kind(value), NodeKind::AndL);
    let lhs = NodeId(ast.node(value).a);
    assert_eq!(ast.kind(lhs), NodeKind::Lt);
    let add = NodeId(ast.node(lhs).a);
    assert_eq!(ast.kind(add), NodeKind::Add);
    assert_eq!(ast.kind(NodeId(ast.node(add).b)), NodeKind::Mul);
    let rhs = NodeId(ast.node(value).b);
    assert_eq!(ast.kind(rhs), NodeKind::NotL);
    assert_eq!(ast.kind(NodeId(ast.node(rhs).a)), NodeKind::EqEq);
  }

  #[test]
  fn for_loop_and_compound_assign() {
    let (ast, root, _) = parse_ok(
      "module m function sum(xs @i32) -> i32 { \
         mut s = 0; for mut i = 0; i < xs.length; i += 1 { s += xs[i] } return s }");
    let items = ast.list(ast.node(root).b).to_vec();
    let body = ast.func(NodeId(items[0])).body;
    let stmts = ast.list(ast.node(body).a).to_vec();
    assert_eq!(ast.kind(NodeId(stmts[0])), NodeKind::LetMut);
    assert_eq!(ast.kind(NodeId(stmts[1])), NodeKind::For);
    let for_parts = ast.words(ast.node(NodeId(stmts[1])).a, 4).to_vec();
    assert_eq!(ast.kind(NodeId(for_parts[0])), NodeKind::LetMut);
    assert_eq!(ast.kind(NodeId(for_parts[1])), NodeKind::Lt);
    assert_eq!(ast.kind(NodeId(for_parts[2])), NodeKind::OpAssign);
    assert_eq!(ast.kind(NodeId(for_parts[3])), NodeKind::Block);
  }

  #[test]
  fn switch_with_else_and_trailing_comma() {
    let (ast, root, _) = parse_ok(
      "module m function k(c i32) -> i32 { return switch c { 0 -> 1, else -> 2, } }");
    let items = ast.list(ast.node(root).b).to_vec();
    let body = ast.func(NodeId(items[0])).body;
    let ret = NodeId(ast.list(ast.node(body).a)[0]);
    let switch = NodeId(ast.node(ret).a);
    assert_eq!(ast.kind(switch), NodeKind::SwitchExpr);
    let at = ast.node(switch).b;
    assert_eq!(ast.words(at, 1)[0], 2);
    let arms = ast.words(at + 1, 4).to_vec();
    assert_ne!(arms[0], 0);
    assert_eq!(arms[2], 0, "else arm pattern is null");
  }

  #[test]
  fn types_and_builtins() {
    let (ast, root, interner) = parse_ok(
      "module m newtype File = i32 \
       function main() { mut f = `Affine[File](File(3)) }");
    let items = ast.list(ast.node(root).b).to_vec();
    assert_eq!(ast.kind(NodeId(items[0])), NodeKind::NewtypeDef);
    let body = ast.func(NodeId(items[1])).body;
    let stmt = NodeId(ast.list(ast.node(body).a)[0]);
    let init = ast.let_parts(stmt).init;
    assert_eq!(ast.kind(init), NodeKind::Call);
    let ctor = NodeId(ast.node(init).a);
    assert_eq!(ast.kind(ctor), NodeKind::IndexOp);
    let builtin = NodeId(ast.node(ctor).a);
    assert_eq!(ast.kind(builtin), NodeKind::BuiltinId);
    assert_eq!(interner.get(Symbol(ast.node(builtin).a)), "Affine");
  }

  #[test]
  fn pointer_and_slice_types() {
    let (ast, root, _) = parse_ok("module m extern function w(p *mut byte, xs @mut i32)");
    let items = ast.list(ast.node(root).b).to_vec();
    let parts = ast.extern_func(NodeId(items[0]));
    let pairs = parts.param_pairs();
    assert_eq!(ast.kind(pairs[0].1), NodeKind::Star);
    assert_eq!(ast.node(pairs[0].1).b, 1);
    assert_eq!(ast.kind(pairs[1].1), NodeKind::At);
    assert_eq!(ast.node(pairs[1].1).b, 1);
  }
}
