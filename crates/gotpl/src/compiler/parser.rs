//! Parser from an instruction [`Program`] to a syntax tree.
//!
//! The code of every `Code` and `Output` instruction is tokenized and merged
//! with pseudo tokens for literal text and output tags into one stream, so a
//! block opened in one tag can be closed in a later one. Each instruction
//! boundary counts as a line break for automatic semicolon insertion.
//!
//! `Line` markers are attached to the token that follows them. When a
//! statement starts at a marked token, it is wrapped together with a
//! [`Stmt::Line`] so the runtime records the line before running it.

use std::sync::Arc;

use gotpl_lexer::{is_keyword, split_template, TokenKind, Tokenizer};

use super::ast::*;
use super::codegen::{Instruction, Program};
use crate::error::{Error, Result};
use crate::stack;
use crate::value::{format_number, RegexValue};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Kind<'a> {
    Name,
    Punct,
    Number,
    Str,
    Template,
    Regex,
    Text(&'a str),
    Open(bool),
    Close,
    Eof,
}

#[derive(Debug, Clone, Copy)]
struct Tok<'a> {
    kind: Kind<'a>,
    text: &'a str,
    line: usize,
    nl_before: bool,
    marker: Option<usize>,
}

impl<'a> Tok<'a> {
    fn is_punct(&self, punct: &str) -> bool {
        self.kind == Kind::Punct && self.text == punct
    }

    fn is_name(&self, name: &str) -> bool {
        self.kind == Kind::Name && self.text == name
    }

    fn is_identifier(&self) -> bool {
        self.kind == Kind::Name && !is_keyword(self.text)
    }
}

/// Parses a generated program.
pub(crate) fn parse_program(program: &Program) -> Result<Script> {
    let tokens = lex_program(program)?;
    let mut parser = Parser::new(tokens);
    let body = parser.statements_until_eof()?;
    Ok(Script::new(body))
}

fn lex_program(program: &Program) -> Result<Vec<Tok<'_>>> {
    let mut tokens = Vec::new();
    let mut marker = None;
    let mut line = 1;

    for instruction in program.instructions() {
        match instruction {
            Instruction::Line(n) => marker = Some(*n),
            Instruction::Text(text) => {
                tokens.push(Tok {
                    kind: Kind::Text(text),
                    text: "",
                    line,
                    nl_before: true,
                    marker: marker.take(),
                });
                line += text.matches('\n').count();
            }
            Instruction::Output { expr, escape, line: at } => {
                tokens.push(Tok {
                    kind: Kind::Open(*escape),
                    text: "",
                    line: *at,
                    nl_before: true,
                    marker: marker.take(),
                });
                lex_code(expr, *at, &mut tokens, &mut None)?;
                tokens.push(Tok {
                    kind: Kind::Close,
                    text: "",
                    line: *at,
                    nl_before: true,
                    marker: None,
                });
                line = *at + expr.matches('\n').count();
            }
            Instruction::Code { src, line: at } => {
                lex_code(src, *at, &mut tokens, &mut marker)?;
                line = *at + src.matches('\n').count();
            }
        }
    }

    tokens.push(Tok {
        kind: Kind::Eof,
        text: "",
        line,
        nl_before: true,
        marker: None,
    });
    Ok(tokens)
}

fn lex_code<'a>(
    src: &'a str,
    line: usize,
    tokens: &mut Vec<Tok<'a>>,
    marker: &mut Option<usize>,
) -> Result<()> {
    let mut line = line;
    let mut nl_before = true;
    for token in Tokenizer::new(src) {
        let kind = match token.kind {
            TokenKind::Whitespace | TokenKind::Comment => {
                nl_before |= token.has_line_break();
                line += token.text.matches('\n').count();
                continue;
            }
            TokenKind::Invalid => {
                let message = if token.text.starts_with('`') {
                    "Unterminated template literal".to_string()
                } else if token.text.starts_with("/*") {
                    "Unterminated comment".to_string()
                } else {
                    "Invalid or unexpected token".to_string()
                };
                return Err(Error::syntax(message, line));
            }
            TokenKind::Name => Kind::Name,
            TokenKind::Punctuator => Kind::Punct,
            TokenKind::Number => Kind::Number,
            TokenKind::String if token.text.starts_with('`') => Kind::Template,
            TokenKind::String => Kind::Str,
            TokenKind::Regex => Kind::Regex,
        };
        tokens.push(Tok {
            kind,
            text: token.text,
            line,
            nl_before,
            marker: marker.take(),
        });
        nl_before = false;
        line += token.text.matches('\n').count();
    }
    Ok(())
}

enum BinaryKind {
    Binary(BinaryOp),
    Logical(LogicalOp),
}

/// Deepest nesting of statements and expressions a template may use.
const MAX_NESTING: usize = 256;

struct Parser<'a> {
    tokens: Vec<Tok<'a>>,
    pos: usize,
    no_in: bool,
    depth: usize,
    loop_depth: usize,
    switch_depth: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: Vec<Tok<'a>>) -> Self {
        Self {
            tokens,
            pos: 0,
            no_in: false,
            depth: 0,
            loop_depth: 0,
            switch_depth: 0,
        }
    }

    /// Runs one recursive production, failing once templates nest deeper
    /// than [`MAX_NESTING`].
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= MAX_NESTING {
            return Err(Error::syntax("Maximum nesting depth exceeded", self.peek().line));
        }
        self.depth += 1;
        let result = stack::ensure(|| parse(self));
        self.depth -= 1;
        result
    }

    // Token cursor

    fn peek(&self) -> Tok<'a> {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> Tok<'a> {
        let last = self.tokens.len() - 1;
        self.tokens[(self.pos + offset).min(last)]
    }

    fn next(&mut self) -> Tok<'a> {
        let tok = self.peek();
        if tok.kind != Kind::Eof {
            self.pos += 1;
        }
        tok
    }

    fn is_punct(&self, punct: &str) -> bool {
        self.peek().is_punct(punct)
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if self.is_punct(punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: &str) -> Result<Tok<'a>> {
        if self.is_punct(punct) {
            Ok(self.next())
        } else {
            Err(unexpected(&self.peek()))
        }
    }

    fn consume_semicolon(&mut self) -> Result<()> {
        if self.eat_punct(";") {
            return Ok(());
        }
        let tok = self.peek();
        if tok.is_punct("}") || tok.kind == Kind::Eof || tok.nl_before {
            Ok(())
        } else {
            Err(unexpected(&tok))
        }
    }

    // Statements

    fn statements_until_eof(&mut self) -> Result<Vec<Stmt>> {
        let mut body = Vec::new();
        while self.peek().kind != Kind::Eof {
            body.push(self.statement()?);
        }
        Ok(body)
    }

    /// Parses statements up to and including the closing `}`.
    fn statements_until_brace(&mut self) -> Result<Vec<Stmt>> {
        let mut body = Vec::new();
        loop {
            let tok = self.peek();
            if tok.is_punct("}") {
                self.next();
                return Ok(body);
            }
            if tok.kind == Kind::Eof {
                return Err(Error::syntax("Unexpected end of input, missing '}'", tok.line));
            }
            body.push(self.statement()?);
        }
    }

    fn statement(&mut self) -> Result<Stmt> {
        let marker = self.tokens[self.pos].marker.take();
        let stmt = self.nested(Self::statement_inner)?;
        Ok(match marker {
            Some(line) => Stmt::Seq(vec![Stmt::Line(line), stmt]),
            None => stmt,
        })
    }

    fn statement_inner(&mut self) -> Result<Stmt> {
        let tok = self.peek();
        match tok.kind {
            Kind::Text(text) => {
                self.next();
                Ok(Stmt::Text(text.into()))
            }
            Kind::Open(escape) => {
                self.next();
                if self.peek().kind == Kind::Close {
                    return Err(Error::syntax("Empty output tag", tok.line));
                }
                let expr = self.expression()?;
                if self.peek().kind != Kind::Close {
                    return Err(unexpected(&self.peek()));
                }
                self.next();
                Ok(Stmt::Output(expr, escape))
            }
            Kind::Punct if tok.text == "{" => {
                self.next();
                Ok(Stmt::Block(self.statements_until_brace()?))
            }
            Kind::Punct if tok.text == ";" => {
                self.next();
                Ok(Stmt::Empty)
            }
            Kind::Name => match tok.text {
                "var" => self.declaration(DeclKind::Var),
                "let" => self.declaration(DeclKind::Let),
                "const" => self.declaration(DeclKind::Const),
                "function" => {
                    self.next();
                    let name = self.binding_name()?;
                    Ok(Stmt::Function(self.function_def(Some(name))?))
                }
                "if" => self.if_statement(),
                "for" => self.for_statement(),
                "while" => {
                    self.next();
                    let test = self.paren_expression()?;
                    let body = self.loop_body()?;
                    Ok(Stmt::While(test, Box::new(body)))
                }
                "do" => {
                    self.next();
                    let body = self.loop_body()?;
                    if !self.peek().is_name("while") {
                        return Err(unexpected(&self.peek()));
                    }
                    self.next();
                    let test = self.paren_expression()?;
                    self.eat_punct(";");
                    Ok(Stmt::DoWhile(Box::new(body), test))
                }
                "switch" => self.switch_statement(),
                "break" => {
                    self.next();
                    if self.loop_depth == 0 && self.switch_depth == 0 {
                        return Err(Error::syntax("Illegal break statement", tok.line));
                    }
                    self.no_label()?;
                    self.consume_semicolon()?;
                    Ok(Stmt::Break)
                }
                "continue" => {
                    self.next();
                    if self.loop_depth == 0 {
                        return Err(Error::syntax(
                            "Illegal continue statement: no surrounding iteration statement",
                            tok.line,
                        ));
                    }
                    self.no_label()?;
                    self.consume_semicolon()?;
                    Ok(Stmt::Continue)
                }
                "return" => {
                    self.next();
                    let next = self.peek();
                    let value = if next.nl_before
                        || next.is_punct(";")
                        || next.is_punct("}")
                        || next.kind == Kind::Eof
                    {
                        None
                    } else {
                        Some(self.expression()?)
                    };
                    self.consume_semicolon()?;
                    Ok(Stmt::Return(value))
                }
                "throw" => {
                    self.next();
                    if self.peek().nl_before {
                        return Err(Error::syntax("Illegal newline after throw", tok.line));
                    }
                    let value = self.expression()?;
                    self.consume_semicolon()?;
                    Ok(Stmt::Throw(value))
                }
                "try" => self.try_statement(),
                "debugger" => {
                    self.next();
                    self.consume_semicolon()?;
                    Ok(Stmt::Empty)
                }
                "class" | "import" | "export" | "with" => Err(unsupported(tok.text, tok.line)),
                _ => self.expression_statement(),
            },
            _ => self.expression_statement(),
        }
    }

    fn expression_statement(&mut self) -> Result<Stmt> {
        let expr = self.expression()?;
        self.consume_semicolon()?;
        Ok(Stmt::Expr(expr))
    }

    fn no_label(&self) -> Result<()> {
        let next = self.peek();
        if next.is_identifier() && !next.nl_before {
            return Err(unsupported("labels", next.line));
        }
        Ok(())
    }

    fn binding_name(&mut self) -> Result<Name> {
        let tok = self.next();
        if tok.is_identifier() {
            return Ok(tok.text.into());
        }
        if tok.is_punct("[") || tok.is_punct("{") {
            return Err(unsupported("destructuring", tok.line));
        }
        Err(unexpected(&tok))
    }

    fn declaration(&mut self, kind: DeclKind) -> Result<Stmt> {
        self.next();
        let decl = self.declarators(kind)?;
        self.consume_semicolon()?;
        Ok(decl)
    }

    fn declarators(&mut self, kind: DeclKind) -> Result<Stmt> {
        let mut decls = Vec::new();
        loop {
            let line = self.peek().line;
            let name = self.binding_name()?;
            let init = if self.eat_punct("=") {
                Some(self.assignment()?)
            } else {
                if kind == DeclKind::Const {
                    return Err(Error::syntax("Missing initializer in const declaration", line));
                }
                None
            };
            decls.push(Declarator { name, init });
            if !self.eat_punct(",") {
                break;
            }
        }
        Ok(Stmt::Decl(kind, decls))
    }

    fn paren_expression(&mut self) -> Result<Expr> {
        self.expect_punct("(")?;
        let saved = std::mem::replace(&mut self.no_in, false);
        let expr = self.expression()?;
        self.no_in = saved;
        self.expect_punct(")")?;
        Ok(expr)
    }

    fn loop_body(&mut self) -> Result<Stmt> {
        self.loop_depth += 1;
        let body = self.statement();
        self.loop_depth -= 1;
        body
    }

    fn if_statement(&mut self) -> Result<Stmt> {
        self.next();
        let test = self.paren_expression()?;
        let then = self.statement()?;
        let otherwise = if self.peek().is_name("else") {
            self.next();
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Ok(Stmt::If(test, Box::new(then), otherwise))
    }

    fn for_statement(&mut self) -> Result<Stmt> {
        let for_tok = self.next();
        if self.peek().is_name("await") {
            return Err(unsupported("for await", for_tok.line));
        }
        self.expect_punct("(")?;

        let decl_kind = match self.peek().text {
            "var" if self.peek().kind == Kind::Name => Some(DeclKind::Var),
            "let" if self.peek().kind == Kind::Name => Some(DeclKind::Let),
            "const" if self.peek().kind == Kind::Name => Some(DeclKind::Const),
            _ => None,
        };

        // `for (x in obj)`, `for (const x of list)`
        let (name_at, iter_at) = if decl_kind.is_some() { (1, 2) } else { (0, 1) };
        let name_tok = self.peek_at(name_at);
        let iter_tok = self.peek_at(iter_at);
        if name_tok.is_identifier() && (iter_tok.is_name("in") || iter_tok.is_name("of")) {
            self.pos += iter_at + 1;
            let of = iter_tok.text == "of";
            let object = if of { self.assignment()? } else { self.expression()? };
            self.expect_punct(")")?;
            let body = self.loop_body()?;
            return Ok(Stmt::ForIn {
                kind: decl_kind,
                name: name_tok.text.into(),
                object,
                body: Box::new(body),
                of,
            });
        }

        let saved = std::mem::replace(&mut self.no_in, true);
        let init = if self.is_punct(";") {
            None
        } else if let Some(kind) = decl_kind {
            self.next();
            Some(Box::new(self.declarators(kind)?))
        } else {
            Some(Box::new(Stmt::Expr(self.expression()?)))
        };
        self.no_in = saved;

        self.expect_punct(";")?;
        let test = if self.is_punct(";") {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(";")?;
        let update = if self.is_punct(")") {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(")")?;
        let body = self.loop_body()?;

        Ok(Stmt::For {
            init,
            test,
            update,
            body: Box::new(body),
        })
    }

    fn switch_statement(&mut self) -> Result<Stmt> {
        self.next();
        let discriminant = self.paren_expression()?;
        self.expect_punct("{")?;
        self.switch_depth += 1;

        let mut cases: Vec<Case> = Vec::new();
        let mut seen_default = false;
        loop {
            let tok = self.next();
            let test = if tok.is_punct("}") {
                break;
            } else if tok.is_name("case") {
                Some(self.expression()?)
            } else if tok.is_name("default") {
                if seen_default {
                    return Err(Error::syntax(
                        "More than one default clause in switch statement",
                        tok.line,
                    ));
                }
                seen_default = true;
                None
            } else {
                return Err(unexpected(&tok));
            };
            self.expect_punct(":")?;

            let mut body = Vec::new();
            loop {
                let next = self.peek();
                if next.is_punct("}") || next.is_name("case") || next.is_name("default") {
                    break;
                }
                if next.kind == Kind::Eof {
                    return Err(Error::syntax("Unexpected end of input, missing '}'", next.line));
                }
                body.push(self.statement()?);
            }
            cases.push(Case { test, body });
        }

        self.switch_depth -= 1;
        Ok(Stmt::Switch(discriminant, cases))
    }

    fn try_statement(&mut self) -> Result<Stmt> {
        let try_tok = self.next();
        self.expect_punct("{")?;
        let block = self.statements_until_brace()?;

        let mut param = None;
        let mut handler = None;
        if self.peek().is_name("catch") {
            self.next();
            if self.eat_punct("(") {
                param = Some(self.binding_name()?);
                self.expect_punct(")")?;
            }
            self.expect_punct("{")?;
            handler = Some(self.statements_until_brace()?);
        }

        let finalizer = if self.peek().is_name("finally") {
            self.next();
            self.expect_punct("{")?;
            Some(self.statements_until_brace()?)
        } else {
            None
        };

        if handler.is_none() && finalizer.is_none() {
            return Err(Error::syntax("Missing catch or finally after try", try_tok.line));
        }
        Ok(Stmt::Try {
            block,
            param,
            handler,
            finalizer,
        })
    }

    // Functions

    fn function_def(&mut self, name: Option<Name>) -> Result<Arc<FunctionDef>> {
        if self.is_punct("*") {
            return Err(unsupported("generator functions", self.peek().line));
        }
        self.expect_punct("(")?;
        let params = self.params()?;
        self.expect_punct("{")?;
        let body = self.function_body()?;
        Ok(Arc::new(FunctionDef::new(name, params, body)))
    }

    /// Parses parameters after `(` up to and including `)`.
    fn params(&mut self) -> Result<Vec<Param>> {
        let mut params = Vec::new();
        while !self.eat_punct(")") {
            if self.is_punct("...") {
                return Err(unsupported("rest parameters", self.peek().line));
            }
            let name = self.binding_name()?;
            let default = if self.eat_punct("=") {
                Some(self.assignment()?)
            } else {
                None
            };
            params.push(Param { name, default });
            if !self.eat_punct(",") {
                self.expect_punct(")")?;
                break;
            }
        }
        Ok(params)
    }

    /// Parses a function body after `{` up to and including `}`.
    fn function_body(&mut self) -> Result<Vec<Stmt>> {
        let saved = (self.loop_depth, self.switch_depth, self.no_in);
        self.loop_depth = 0;
        self.switch_depth = 0;
        self.no_in = false;
        let body = self.statements_until_brace();
        (self.loop_depth, self.switch_depth, self.no_in) = saved;
        body
    }

    fn arrow_body(&mut self, params: Vec<Param>) -> Result<Expr> {
        let body = if self.eat_punct("{") {
            self.function_body()?
        } else {
            vec![Stmt::Return(Some(self.assignment()?))]
        };
        Ok(Expr::Function(Arc::new(FunctionDef::new(None, params, body))))
    }

    fn try_arrow(&mut self) -> Result<Option<Expr>> {
        let tok = self.peek();
        if tok.is_identifier() {
            let arrow = self.peek_at(1);
            if arrow.is_punct("=>") && !arrow.nl_before {
                self.pos += 2;
                let params = vec![Param {
                    name: tok.text.into(),
                    default: None,
                }];
                return Ok(Some(self.arrow_body(params)?));
            }
            return Ok(None);
        }

        if tok.is_punct("(") {
            if let Some(close) = self.matching_paren(self.pos) {
                let arrow = self.tokens[close + 1];
                if arrow.is_punct("=>") && !arrow.nl_before {
                    self.next();
                    let params = self.params()?;
                    self.expect_punct("=>")?;
                    return Ok(Some(self.arrow_body(params)?));
                }
            }
        }
        Ok(None)
    }

    /// Index of the `)` matching the `(` at `open`, within code tokens.
    fn matching_paren(&self, open: usize) -> Option<usize> {
        let mut depth = 0usize;
        for (i, tok) in self.tokens.iter().enumerate().skip(open) {
            match tok.kind {
                Kind::Punct if tok.text == "(" => depth += 1,
                Kind::Punct if tok.text == ")" => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                Kind::Text(_) | Kind::Open(_) | Kind::Close | Kind::Eof => return None,
                _ => {}
            }
        }
        None
    }

    // Expressions

    fn expression(&mut self) -> Result<Expr> {
        let first = self.assignment()?;
        if !self.is_punct(",") {
            return Ok(first);
        }
        let mut list = vec![first];
        while self.eat_punct(",") {
            list.push(self.assignment()?);
        }
        Ok(Expr::Sequence(list))
    }

    fn assignment(&mut self) -> Result<Expr> {
        self.nested(Self::assignment_inner)
    }

    fn assignment_inner(&mut self) -> Result<Expr> {
        if let Some(arrow) = self.try_arrow()? {
            return Ok(arrow);
        }

        let target = self.conditional()?;
        let tok = self.peek();
        if tok.kind != Kind::Punct {
            return Ok(target);
        }
        let op = match tok.text {
            "=" => AssignOp::Assign,
            "+=" => AssignOp::Binary(BinaryOp::Add),
            "-=" => AssignOp::Binary(BinaryOp::Sub),
            "*=" => AssignOp::Binary(BinaryOp::Mul),
            "/=" => AssignOp::Binary(BinaryOp::Div),
            "%=" => AssignOp::Binary(BinaryOp::Rem),
            "**=" => AssignOp::Binary(BinaryOp::Exp),
            "<<=" => AssignOp::Binary(BinaryOp::Shl),
            ">>=" => AssignOp::Binary(BinaryOp::Shr),
            ">>>=" => AssignOp::Binary(BinaryOp::UShr),
            "&=" => AssignOp::Binary(BinaryOp::BitAnd),
            "|=" => AssignOp::Binary(BinaryOp::BitOr),
            "^=" => AssignOp::Binary(BinaryOp::BitXor),
            "&&=" => AssignOp::Logical(LogicalOp::And),
            "||=" => AssignOp::Logical(LogicalOp::Or),
            "??=" => AssignOp::Logical(LogicalOp::Nullish),
            _ => return Ok(target),
        };
        check_target(&target, tok.line, "Invalid left-hand side in assignment")?;
        self.next();
        let value = self.assignment()?;
        Ok(Expr::Assign(op, Box::new(target), Box::new(value)))
    }

    fn conditional(&mut self) -> Result<Expr> {
        let test = self.binary(1)?;
        if !self.eat_punct("?") {
            return Ok(test);
        }
        let saved = std::mem::replace(&mut self.no_in, false);
        let consequent = self.assignment()?;
        self.no_in = saved;
        self.expect_punct(":")?;
        let alternate = self.assignment()?;
        Ok(Expr::Conditional(
            Box::new(test),
            Box::new(consequent),
            Box::new(alternate),
        ))
    }

    fn binary_operator(&self, tok: &Tok<'a>) -> Result<Option<(u8, BinaryKind)>> {
        use BinaryKind::{Binary, Logical};

        if tok.kind == Kind::Name {
            return match tok.text {
                "in" if !self.no_in => Ok(Some((7, Binary(BinaryOp::In)))),
                "instanceof" => Err(unsupported("instanceof", tok.line)),
                _ => Ok(None),
            };
        }
        if tok.kind != Kind::Punct {
            return Ok(None);
        }
        Ok(Some(match tok.text {
            "??" => (1, Logical(LogicalOp::Nullish)),
            "||" => (1, Logical(LogicalOp::Or)),
            "&&" => (2, Logical(LogicalOp::And)),
            "|" => (3, Binary(BinaryOp::BitOr)),
            "^" => (4, Binary(BinaryOp::BitXor)),
            "&" => (5, Binary(BinaryOp::BitAnd)),
            "==" => (6, Binary(BinaryOp::Eq)),
            "!=" => (6, Binary(BinaryOp::NotEq)),
            "===" => (6, Binary(BinaryOp::StrictEq)),
            "!==" => (6, Binary(BinaryOp::StrictNotEq)),
            "<" => (7, Binary(BinaryOp::Lt)),
            ">" => (7, Binary(BinaryOp::Gt)),
            "<=" => (7, Binary(BinaryOp::LtEq)),
            ">=" => (7, Binary(BinaryOp::GtEq)),
            "<<" => (8, Binary(BinaryOp::Shl)),
            ">>" => (8, Binary(BinaryOp::Shr)),
            ">>>" => (8, Binary(BinaryOp::UShr)),
            "+" => (9, Binary(BinaryOp::Add)),
            "-" => (9, Binary(BinaryOp::Sub)),
            "*" => (10, Binary(BinaryOp::Mul)),
            "/" => (10, Binary(BinaryOp::Div)),
            "%" => (10, Binary(BinaryOp::Rem)),
            "**" => (11, Binary(BinaryOp::Exp)),
            _ => return Ok(None),
        }))
    }

    fn binary(&mut self, min_prec: u8) -> Result<Expr> {
        let mut left = self.unary()?;
        loop {
            let tok = self.peek();
            let Some((prec, op)) = self.binary_operator(&tok)? else {
                break;
            };
            if prec < min_prec {
                break;
            }
            self.next();
            let right_assoc = matches!(op, BinaryKind::Binary(BinaryOp::Exp));
            let next_prec = if right_assoc { prec } else { prec + 1 };
            let right = self.nested(|parser| parser.binary(next_prec))?;
            left = match op {
                BinaryKind::Binary(op) => Expr::Binary(op, Box::new(left), Box::new(right)),
                BinaryKind::Logical(op) => Expr::Logical(op, Box::new(left), Box::new(right)),
            };
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr> {
        let tok = self.peek();
        let op = match (tok.kind, tok.text) {
            (Kind::Punct, "!") => UnaryOp::Not,
            (Kind::Punct, "-") => UnaryOp::Neg,
            (Kind::Punct, "+") => UnaryOp::Plus,
            (Kind::Punct, "~") => UnaryOp::BitNot,
            (Kind::Name, "typeof") => UnaryOp::TypeOf,
            (Kind::Name, "void") => UnaryOp::Void,
            (Kind::Name, "delete") => UnaryOp::Delete,
            (Kind::Punct, "++") | (Kind::Punct, "--") => {
                self.next();
                let target = self.nested(Self::unary)?;
                check_target(
                    &target,
                    tok.line,
                    "Invalid left-hand side expression in prefix operation",
                )?;
                let op = if tok.text == "++" { UpdateOp::Inc } else { UpdateOp::Dec };
                return Ok(Expr::Update(op, true, Box::new(target)));
            }
            (Kind::Name, "await") => return Err(unsupported("await", tok.line)),
            _ => return self.postfix(),
        };
        self.next();
        let operand = self.nested(Self::unary)?;
        if op == UnaryOp::Delete && matches!(operand, Expr::Ident(_)) {
            return Err(Error::syntax(
                "Delete of an unqualified identifier in strict mode.",
                tok.line,
            ));
        }
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn postfix(&mut self) -> Result<Expr> {
        let expr = self.call_member()?;
        let tok = self.peek();
        if (tok.is_punct("++") || tok.is_punct("--")) && !tok.nl_before {
            check_target(
                &expr,
                tok.line,
                "Invalid left-hand side expression in postfix operation",
            )?;
            self.next();
            let op = if tok.text == "++" { UpdateOp::Inc } else { UpdateOp::Dec };
            return Ok(Expr::Update(op, false, Box::new(expr)));
        }
        Ok(expr)
    }

    fn call_member(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        loop {
            let tok = self.peek();
            match tok.kind {
                Kind::Template => return Err(unsupported("tagged templates", tok.line)),
                Kind::Punct => {}
                _ => break,
            }
            expr = match tok.text {
                "." => {
                    self.next();
                    let name = self.property_name()?;
                    Expr::Member(Box::new(expr), Prop::Name(name), false)
                }
                "?." => {
                    self.next();
                    if self.eat_punct("(") {
                        let args = self.arguments()?;
                        Expr::Call(Box::new(expr), args, true)
                    } else if self.eat_punct("[") {
                        let index = self.index()?;
                        Expr::Member(Box::new(expr), Prop::Computed(Box::new(index)), true)
                    } else {
                        let name = self.property_name()?;
                        Expr::Member(Box::new(expr), Prop::Name(name), true)
                    }
                }
                "[" => {
                    self.next();
                    let index = self.index()?;
                    Expr::Member(Box::new(expr), Prop::Computed(Box::new(index)), false)
                }
                "(" => {
                    self.next();
                    let args = self.arguments()?;
                    Expr::Call(Box::new(expr), args, false)
                }
                _ => break,
            };
        }
        Ok(expr)
    }

    fn property_name(&mut self) -> Result<Name> {
        let tok = self.next();
        if tok.kind == Kind::Name {
            Ok(tok.text.into())
        } else {
            Err(unexpected(&tok))
        }
    }

    /// Parses a computed member after `[` up to and including `]`.
    fn index(&mut self) -> Result<Expr> {
        let saved = std::mem::replace(&mut self.no_in, false);
        let index = self.expression()?;
        self.no_in = saved;
        self.expect_punct("]")?;
        Ok(index)
    }

    /// Parses call arguments after `(` up to and including `)`.
    fn arguments(&mut self) -> Result<Vec<Expr>> {
        let saved = std::mem::replace(&mut self.no_in, false);
        let mut args = Vec::new();
        while !self.eat_punct(")") {
            if self.is_punct("...") {
                return Err(unsupported("spread arguments", self.peek().line));
            }
            args.push(self.assignment()?);
            if !self.eat_punct(",") {
                self.expect_punct(")")?;
                break;
            }
        }
        self.no_in = saved;
        Ok(args)
    }

    fn primary(&mut self) -> Result<Expr> {
        let tok = self.next();
        match tok.kind {
            Kind::Number => Ok(Expr::Number(parse_number(tok.text))),
            Kind::Str => {
                let body = &tok.text[1..tok.text.len() - 1];
                let text = unescape(body).map_err(|msg| Error::syntax(msg, tok.line))?;
                Ok(Expr::Str(text.into()))
            }
            Kind::Template => self.template_literal(&tok),
            Kind::Regex => {
                let end = tok.text.rfind('/').unwrap_or(0);
                let regex = RegexValue::new(&tok.text[1..end], &tok.text[end + 1..])
                    .map_err(|msg| Error::syntax(msg, tok.line))?;
                Ok(Expr::Regex(Arc::new(regex)))
            }
            Kind::Name => match tok.text {
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                "null" => Ok(Expr::Null),
                "function" => {
                    let name = if self.peek().is_identifier() {
                        Some(self.binding_name()?)
                    } else {
                        None
                    };
                    Ok(Expr::Function(self.function_def(name)?))
                }
                "new" | "class" | "this" | "super" | "import" | "yield" => {
                    Err(unsupported(tok.text, tok.line))
                }
                keyword if is_keyword(keyword) => Err(unexpected(&tok)),
                name => Ok(Expr::Ident(name.into())),
            },
            Kind::Punct => match tok.text {
                "(" => {
                    let saved = std::mem::replace(&mut self.no_in, false);
                    let expr = self.expression()?;
                    self.no_in = saved;
                    self.expect_punct(")")?;
                    Ok(expr)
                }
                "[" => self.array_literal(),
                "{" => self.object_literal(),
                "..." => Err(unsupported("spread syntax", tok.line)),
                _ => Err(unexpected(&tok)),
            },
            _ => Err(unexpected(&tok)),
        }
    }

    fn array_literal(&mut self) -> Result<Expr> {
        let saved = std::mem::replace(&mut self.no_in, false);
        let mut items = Vec::new();
        loop {
            if self.eat_punct("]") {
                break;
            }
            if self.is_punct(",") {
                self.next();
                items.push(Expr::Unary(UnaryOp::Void, Box::new(Expr::Number(0.0))));
                continue;
            }
            if self.is_punct("...") {
                return Err(unsupported("spread syntax", self.peek().line));
            }
            items.push(self.assignment()?);
            if !self.eat_punct(",") {
                self.expect_punct("]")?;
                break;
            }
        }
        self.no_in = saved;
        Ok(Expr::Array(items))
    }

    fn object_literal(&mut self) -> Result<Expr> {
        let saved = std::mem::replace(&mut self.no_in, false);
        let mut props = Vec::new();
        loop {
            if self.eat_punct("}") {
                break;
            }
            let tok = self.next();
            let key = match tok.kind {
                Kind::Name => Prop::Name(tok.text.into()),
                Kind::Str => {
                    let text = unescape(&tok.text[1..tok.text.len() - 1])
                        .map_err(|msg| Error::syntax(msg, tok.line))?;
                    Prop::Name(text.into())
                }
                Kind::Number => Prop::Name(format_number(parse_number(tok.text)).into()),
                Kind::Punct if tok.text == "[" => {
                    let key = self.assignment()?;
                    self.expect_punct("]")?;
                    Prop::Computed(Box::new(key))
                }
                Kind::Punct if tok.text == "..." => {
                    return Err(unsupported("spread syntax", tok.line));
                }
                _ => return Err(unexpected(&tok)),
            };

            let value = if self.eat_punct(":") {
                self.assignment()?
            } else if self.is_punct("(") {
                let name = match &key {
                    Prop::Name(name) => Some(name.clone()),
                    Prop::Computed(_) => None,
                };
                Expr::Function(self.function_def(name)?)
            } else if tok.is_identifier() && (self.is_punct(",") || self.is_punct("}")) {
                Expr::Ident(tok.text.into())
            } else {
                return Err(unexpected(&self.peek()));
            };
            props.push((key, value));

            if !self.eat_punct(",") {
                self.expect_punct("}")?;
                break;
            }
        }
        self.no_in = saved;
        Ok(Expr::Object(props))
    }

    fn template_literal(&mut self, tok: &Tok<'a>) -> Result<Expr> {
        let parts = split_template(tok.text)
            .ok_or_else(|| Error::syntax("Unterminated template literal", tok.line))?;

        let mut quasis = Vec::with_capacity(parts.quasis.len());
        for raw in parts.quasis {
            let text = unescape(raw).map_err(|msg| Error::syntax(msg, tok.line))?;
            quasis.push(Arc::from(text));
        }

        let mut exprs = Vec::with_capacity(parts.substitutions.len());
        for source in parts.substitutions {
            let mut tokens = Vec::new();
            lex_code(source, tok.line, &mut tokens, &mut None)?;
            tokens.push(Tok {
                kind: Kind::Eof,
                text: "",
                line: tok.line,
                nl_before: true,
                marker: None,
            });
            let mut parser = Parser::new(tokens);
            let expr = parser.expression()?;
            if parser.peek().kind != Kind::Eof {
                return Err(unexpected(&parser.peek()));
            }
            exprs.push(expr);
        }

        Ok(Expr::Template(quasis, exprs))
    }
}

fn check_target(expr: &Expr, line: usize, message: &str) -> Result<()> {
    match expr {
        Expr::Ident(_) | Expr::Member(_, _, false) => Ok(()),
        _ => Err(Error::syntax(message, line)),
    }
}

fn unexpected(tok: &Tok<'_>) -> Error {
    let message = match tok.kind {
        Kind::Eof => "Unexpected end of input".to_string(),
        Kind::Text(_) => "Unexpected template text".to_string(),
        Kind::Open(_) => "Unexpected output tag".to_string(),
        Kind::Close => "Unexpected end of output tag".to_string(),
        Kind::Number => "Unexpected number".to_string(),
        Kind::Str | Kind::Template => "Unexpected string".to_string(),
        _ => format!("Unexpected token '{}'", tok.text),
    };
    Error::syntax(message, tok.line)
}

fn unsupported(what: &str, line: usize) -> Error {
    Error::syntax(format!("Unsupported syntax: {}", what), line)
}

fn parse_number(text: &str) -> f64 {
    let clean: String = text.chars().filter(|c| *c != '_').collect();
    let radix = match clean.get(..2) {
        Some("0x") | Some("0X") => 16,
        Some("0o") | Some("0O") => 8,
        Some("0b") | Some("0B") => 2,
        _ => return clean.parse::<f64>().unwrap_or(f64::NAN),
    };
    clean[2..].chars().fold(0.0, |acc, c| {
        acc * f64::from(radix) + c.to_digit(radix).map_or(f64::NAN, f64::from)
    })
}

/// Decodes the escape sequences of a string or template literal body.
fn unescape(raw: &str) -> std::result::Result<String, String> {
    if !raw.contains('\\') {
        return Ok(raw.to_string());
    }

    let mut units: Vec<u16> = Vec::with_capacity(raw.len());
    let mut buf = [0u16; 2];
    let mut push =
        |units: &mut Vec<u16>, c: char| units.extend_from_slice(c.encode_utf16(&mut buf));

    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            push(&mut units, c);
            continue;
        }
        let Some(escaped) = chars.next() else {
            push(&mut units, '\\');
            break;
        };
        match escaped {
            'n' => push(&mut units, '\n'),
            't' => push(&mut units, '\t'),
            'r' => push(&mut units, '\r'),
            'b' => push(&mut units, '\u{8}'),
            'f' => push(&mut units, '\u{c}'),
            'v' => push(&mut units, '\u{b}'),
            '0' if !chars.peek().is_some_and(char::is_ascii_digit) => push(&mut units, '\0'),
            'x' => {
                let hex: String = chars.by_ref().take(2).collect();
                let unit = u16::from_str_radix(&hex, 16)
                    .ok()
                    .filter(|_| hex.len() == 2)
                    .ok_or("Invalid hexadecimal escape sequence")?;
                units.push(unit);
            }
            'u' if chars.peek() == Some(&'{') => {
                chars.next();
                let hex: String = chars.by_ref().take_while(|c| *c != '}').collect();
                let c = u32::from_str_radix(&hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or("Invalid Unicode escape sequence")?;
                push(&mut units, c);
            }
            'u' => {
                let hex: String = chars.by_ref().take(4).collect();
                let unit = u16::from_str_radix(&hex, 16)
                    .ok()
                    .filter(|_| hex.len() == 4)
                    .ok_or("Invalid Unicode escape sequence")?;
                units.push(unit);
            }
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
            }
            '\n' | '\u{2028}' | '\u{2029}' => {}
            other => push(&mut units, other),
        }
    }
    Ok(String::from_utf16_lossy(&units))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{generate, CompileSettings};

    fn parse(template: &str) -> Result<Script> {
        let program = generate(template, &CompileSettings::default())?;
        parse_program(&program)
    }

    fn parse_debug(template: &str) -> Script {
        let settings = CompileSettings {
            debug: true,
            ..CompileSettings::default()
        };
        parse_program(&generate(template, &settings).unwrap()).unwrap()
    }

    fn syntax_message(template: &str) -> String {
        match parse(template) {
            Err(Error::Syntax { message, .. }) => message,
            other => panic!("expected a syntax error, got {:?}", other.map(|s| s.body)),
        }
    }

    #[test]
    fn test_block_spans_tags() {
        let script = parse("<% if (a) { %>yes<% } else { %>no<% } %>").unwrap();
        assert_eq!(script.body.len(), 1);
        assert!(matches!(
            &script.body[0],
            Stmt::If(_, then, Some(_))
                if matches!(&**then, Stmt::Block(body) if matches!(body[0], Stmt::Text(_)))
        ));
    }

    #[test]
    fn test_text_as_unbraced_body() {
        let script = parse("<% if (a) %>yes<% ; %>").unwrap();
        assert!(
            matches!(&script.body[0], Stmt::If(_, then, None) if matches!(&**then, Stmt::Text(_)))
        );
    }

    #[test]
    fn test_output_tags() {
        let script = parse("<%= a %><%- b %>").unwrap();
        assert!(matches!(script.body[0], Stmt::Output(Expr::Ident(_), true)));
        assert!(matches!(script.body[1], Stmt::Output(Expr::Ident(_), false)));
    }

    #[test]
    fn test_semicolon_insertion_at_tag_boundaries() {
        let script = parse("<% var a = 1 %><% a++ %>").unwrap();
        assert_eq!(script.body.len(), 2);
        assert_eq!(script.vars.len(), 1);
    }

    #[test]
    fn test_expression_continues_across_tags() {
        let script = parse("<% var a = 1 + %><% 2 %>").unwrap();
        assert_eq!(script.body.len(), 1);
    }

    #[test]
    fn test_unbalanced_block_is_reported() {
        assert_eq!(syntax_message("<% if (a) { %>x"), "Unexpected end of input, missing '}'");
        assert_eq!(syntax_message("<% } %>"), "Unexpected token '}'");
    }

    #[test]
    fn test_text_inside_expression_is_rejected() {
        assert_eq!(syntax_message("<% var a = %>x<% 1 %>"), "Unexpected template text");
    }

    #[test]
    fn test_unsupported_syntax() {
        assert_eq!(syntax_message("<% var d = new Date() %>"), "Unsupported syntax: new");
        assert_eq!(syntax_message("<%= this.x %>"), "Unsupported syntax: this");
        assert_eq!(syntax_message("<% f(...xs) %>"), "Unsupported syntax: spread arguments");
    }

    #[test]
    fn test_misc_syntax_errors() {
        assert_eq!(syntax_message("<% var %>"), "Unexpected end of input");
        assert_eq!(syntax_message("<%= %>"), "Empty output tag");
        assert_eq!(syntax_message("<% break %>"), "Illegal break statement");
        assert_eq!(syntax_message("<% const x %>"), "Missing initializer in const declaration");
        assert_eq!(syntax_message("<% 1 = 2 %>"), "Invalid left-hand side in assignment");
        assert_eq!(syntax_message("<% var s = 'open %>"), "Invalid or unexpected token");
        assert_eq!(syntax_message("<% /(/.test(x) %>"), "Invalid regular expression: /(/");
    }

    #[test]
    fn test_nesting_depth_is_limited() {
        let nested = |open: &str, depth: usize, close: &str| {
            format!("<% x = {}1{} %>", open.repeat(depth), close.repeat(depth))
        };
        assert!(parse(&nested("(", 200, ")")).is_ok());
        assert_eq!(
            syntax_message(&nested("(", 3000, ")")),
            "Maximum nesting depth exceeded"
        );
        assert_eq!(
            syntax_message(&nested("[", 3000, "]")),
            "Maximum nesting depth exceeded"
        );
        assert_eq!(
            syntax_message(&nested("!", 3000, "")),
            "Maximum nesting depth exceeded"
        );
        assert_eq!(
            syntax_message(&nested("2 ** ", 3000, "")),
            "Maximum nesting depth exceeded"
        );

        let blocks = format!("<% {} %>", "{".repeat(3000));
        assert_eq!(syntax_message(&blocks), "Maximum nesting depth exceeded");
    }

    #[test]
    fn test_syntax_error_line() {
        let err = parse("line 1\nline 2\n<% var a = ; %>").unwrap_err();
        assert_eq!(err.line(), Some(3));
    }

    #[test]
    fn test_arrow_functions_and_closures() {
        let script = parse("<% var f = (a, b = 2) => a + b; var g = x => { return x } %>").unwrap();
        let Stmt::Decl(DeclKind::Var, decls) = &script.body[0] else {
            panic!("expected declaration");
        };
        let Some(Expr::Function(def)) = &decls[0].init else {
            panic!("expected function");
        };
        assert_eq!(def.params.len(), 2);
        assert!(def.params[1].default.is_some());
    }

    #[test]
    fn test_for_in_and_of() {
        let script =
            parse("<% for (var k in obj) {} for (const v of list) {} for (x of y) {} %>").unwrap();
        assert!(
            matches!(&script.body[0], Stmt::ForIn { of: false, kind: Some(DeclKind::Var), .. })
        );
        assert!(
            matches!(&script.body[1], Stmt::ForIn { of: true, kind: Some(DeclKind::Const), .. })
        );
        assert!(matches!(&script.body[2], Stmt::ForIn { of: true, kind: None, .. }));
        assert_eq!(script.vars.len(), 1);
    }

    #[test]
    fn test_for_init_allows_in_inside_parens() {
        let script = parse("<% for (var i = ('a' in o) ? 1 : 0; i < 3; i++) {} %>").unwrap();
        assert!(matches!(&script.body[0], Stmt::For { .. }));
    }

    #[test]
    fn test_object_literal_forms() {
        let script = parse("<% var o = {a, 'b': 1, 2: 3, [k]: 4, m() { return 1 }} %>").unwrap();
        let Stmt::Decl(_, decls) = &script.body[0] else {
            panic!("expected declaration");
        };
        let Some(Expr::Object(props)) = &decls[0].init else {
            panic!("expected object");
        };
        assert_eq!(props.len(), 5);
        assert!(matches!(&props[2].0, Prop::Name(name) if &**name == "2"));
    }

    #[test]
    fn test_template_literal() {
        let script = parse("<%= `a${b + 1}c` %>").unwrap();
        let Stmt::Output(Expr::Template(quasis, exprs), _) = &script.body[0] else {
            panic!("expected template literal");
        };
        assert_eq!(quasis.len(), 2);
        assert_eq!(exprs.len(), 1);
    }

    #[test]
    fn test_return_without_value_before_line_break() {
        let script = parse("<% function f() { return\n1 } %>").unwrap();
        let Stmt::Function(def) = &script.body[0] else {
            panic!("expected function");
        };
        assert!(matches!(def.body[0], Stmt::Return(None)));
    }

    #[test]
    fn test_debug_markers_wrap_statements() {
        let script = parse_debug("a\n<% x() %>");
        assert!(matches!(&script.body[0], Stmt::Seq(items) if matches!(items[0], Stmt::Line(1))));
        assert!(matches!(&script.body[1], Stmt::Seq(items) if matches!(items[0], Stmt::Line(2))));
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape(r"a\nb\t\x41B\u{1F600}").unwrap(), "a\nb\tAB😀");
        assert_eq!(unescape(r"😀").unwrap(), "😀");
        assert_eq!(unescape(r"\'\q").unwrap(), "'q");
        assert!(unescape(r"\xZ1").is_err());
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("1_000"), 1000.0);
        assert_eq!(parse_number("0xff"), 255.0);
        assert_eq!(parse_number("0b101"), 5.0);
        assert_eq!(parse_number(".5e1"), 5.0);
    }
}
