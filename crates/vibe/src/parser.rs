//! Recursive-descent parser producing the AST of §`ast`.
//!
//! One token of lookahead, which is what lets the parser flip the lexer into
//! raw mode for host-language escape bodies. Operator precedence from lowest
//! to highest: AI operation/assignment, `or`, `and`, comparison, additive,
//! multiplicative, unary, range, postfix, primary.

use crate::{
    ast::{
        AiExpr, AiKind, BaseType, CompressArg, ContextMode, ContextSpec, Expr, ExprKind, FunctionDecl, HostEscape,
        ModelDecl, Param, Program, Stmt, StmtKind, ToolDecl, TypeAnnotation,
    },
    error::{CodeLoc, EngineError, RunResult},
    lexer::{Lexer, Token, TokenKind},
};

/// Maximum nesting depth for expressions and blocks. Prevents stack overflow
/// from pathological inputs like `((((((x))))))`.
const MAX_NESTING_DEPTH: u16 = 200;

/// Parses a program.
///
/// # Errors
/// Returns `LexerError`/`ParserError` with a location and caret context line.
pub fn parse(source: &str, script_name: &str) -> RunResult<Program> {
    let mut parser = Parser::new(source)?;
    parser.parse_program().map_err(|mut err| {
        if !script_name.is_empty() {
            err.message = format!("{script_name}: {}", err.message);
        }
        err
    })
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    depth: u16,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> RunResult<Self> {
        let mut lexer = Lexer::new(source);
        let current = lexer.next_token()?;
        Ok(Self {
            lexer,
            current,
            depth: 0,
        })
    }

    fn parse_program(&mut self) -> RunResult<Program> {
        let mut statements = Vec::new();
        while self.current.kind != TokenKind::Eof {
            statements.push(self.parse_statement()?);
        }
        Ok(Program::new(statements))
    }

    // === Tokens ===

    fn advance(&mut self) -> RunResult<Token> {
        let next = self.lexer.next_token()?;
        Ok(std::mem::replace(&mut self.current, next))
    }

    fn expect(&mut self, kind: &TokenKind) -> RunResult<Token> {
        if &self.current.kind == kind {
            self.advance()
        } else {
            Err(self.unexpected(&format!("Expected {}", kind.describe())))
        }
    }

    fn expect_ident(&mut self, what: &str) -> RunResult<(String, CodeLoc)> {
        match &self.current.kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                let loc = self.current.loc;
                self.advance()?;
                Ok((name, loc))
            }
            _ => Err(self.unexpected(&format!("Expected {what}"))),
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> RunResult<CodeLoc> {
        match &self.current.kind {
            TokenKind::Ident(name) if name == keyword => {
                let loc = self.current.loc;
                self.advance()?;
                Ok(loc)
            }
            _ => Err(self.unexpected(&format!("Expected '{keyword}'"))),
        }
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(&self.current.kind, TokenKind::Ident(name) if name == keyword)
    }

    fn eat_keyword(&mut self, keyword: &str) -> RunResult<bool> {
        if self.at_keyword(keyword) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn unexpected(&self, message: &str) -> EngineError {
        let loc = self.current.loc;
        let mut err = EngineError::parser(format!("{message}, found {}", self.current.kind.describe()), loc);
        if let Some(line) = self.lexer.source_line(loc) {
            err = err.with_context_line(line);
        }
        err
    }

    fn enter(&mut self) -> RunResult<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(self.unexpected("Nesting too deep"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    // === Statements ===

    fn parse_statement(&mut self) -> RunResult<Stmt> {
        let loc = self.current.loc;
        if let TokenKind::Ident(word) = &self.current.kind {
            match word.as_str() {
                "import" => return self.parse_import(loc),
                "export" => return self.parse_export(loc),
                "let" => return self.parse_declaration(loc, false),
                "const" => return self.parse_declaration(loc, true),
                "model" => return self.parse_model(loc),
                "function" => return self.parse_function(loc),
                "tool" => return self.parse_tool(loc),
                "return" => return self.parse_return(loc),
                "if" => return self.parse_if(loc),
                "for" => return self.parse_for(loc),
                "while" => return self.parse_while(loc),
                _ => {}
            }
        }
        if self.current.kind == TokenKind::LBrace {
            let body = self.parse_block()?;
            return Ok(Stmt::new(StmtKind::Block(body), loc));
        }
        let expr = self.parse_expression()?;
        Ok(Stmt::new(StmtKind::Expr(expr), loc))
    }

    fn parse_import(&mut self, loc: CodeLoc) -> RunResult<Stmt> {
        self.expect_keyword("import")?;
        self.expect(&TokenKind::LBrace)?;
        let mut names = Vec::new();
        loop {
            let (name, _) = self.expect_ident("imported name")?;
            names.push(name);
            if self.current.kind == TokenKind::Comma {
                self.advance()?;
                continue;
            }
            break;
        }
        self.expect(&TokenKind::RBrace)?;
        self.expect_keyword("from")?;
        let path = match &self.current.kind {
            TokenKind::Str(path) => path.clone(),
            _ => return Err(self.unexpected("Expected module path string")),
        };
        self.advance()?;
        Ok(Stmt::new(StmtKind::Import { names, path }, loc))
    }

    fn parse_export(&mut self, loc: CodeLoc) -> RunResult<Stmt> {
        self.expect_keyword("export")?;
        let inner = self.parse_statement()?;
        match inner.kind {
            StmtKind::Let { .. }
            | StmtKind::Const { .. }
            | StmtKind::Model(_)
            | StmtKind::Function(_)
            | StmtKind::Tool(_) => Ok(Stmt::new(StmtKind::Export(Box::new(inner)), loc)),
            _ => Err(EngineError::parser(
                "Only declarations can be exported",
                inner.loc,
            )),
        }
    }

    fn parse_declaration(&mut self, loc: CodeLoc, is_const: bool) -> RunResult<Stmt> {
        self.advance()?; // let / const
        let (name, _) = self.expect_ident("variable name")?;
        let ty = if self.current.kind == TokenKind::Colon {
            self.advance()?;
            Some(self.parse_type()?)
        } else {
            None
        };
        self.expect(&TokenKind::Assign)?;
        let init = self.parse_expression()?;
        let kind = if is_const {
            StmtKind::Const { name, ty, init }
        } else {
            StmtKind::Let { name, ty, init }
        };
        Ok(Stmt::new(kind, loc))
    }

    fn parse_model(&mut self, loc: CodeLoc) -> RunResult<Stmt> {
        self.expect_keyword("model")?;
        let (name, _) = self.expect_ident("model name")?;
        self.expect(&TokenKind::Assign)?;
        self.expect(&TokenKind::LBrace)?;
        let mut fields = Vec::new();
        while self.current.kind != TokenKind::RBrace {
            let (field, _) = self.expect_ident("model field name")?;
            self.expect(&TokenKind::Colon)?;
            let value = self.parse_expression()?;
            fields.push((field, value));
            if self.current.kind == TokenKind::Comma {
                self.advance()?;
            }
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(Stmt::new(StmtKind::Model(ModelDecl { name, fields }), loc))
    }

    fn parse_function(&mut self, loc: CodeLoc) -> RunResult<Stmt> {
        self.expect_keyword("function")?;
        let (name, _) = self.expect_ident("function name")?;
        let params = self.parse_params()?;
        let return_type = if self.current.kind == TokenKind::Colon {
            self.advance()?;
            Some(self.parse_type()?)
        } else {
            None
        };
        let body = self.parse_block()?;
        Ok(Stmt::new(
            StmtKind::Function(FunctionDecl {
                name,
                params,
                return_type,
                body,
            }),
            loc,
        ))
    }

    fn parse_tool(&mut self, loc: CodeLoc) -> RunResult<Stmt> {
        self.expect_keyword("tool")?;
        let (name, _) = self.expect_ident("tool name")?;
        let params = self.parse_params()?;
        let return_type = if self.current.kind == TokenKind::Colon {
            self.advance()?;
            Some(self.parse_type()?)
        } else {
            None
        };
        let mut description = String::new();
        let mut param_docs = Vec::new();
        while self.current.kind == TokenKind::At {
            self.advance()?;
            let (decorator, decorator_loc) = self.expect_ident("decorator name")?;
            match decorator.as_str() {
                "description" => match &self.current.kind {
                    TokenKind::Str(text) => {
                        description = text.clone();
                        self.advance()?;
                    }
                    _ => return Err(self.unexpected("Expected description string")),
                },
                "param" => {
                    let (param, _) = self.expect_ident("parameter name")?;
                    match &self.current.kind {
                        TokenKind::Str(text) => {
                            param_docs.push((param, text.clone()));
                            self.advance()?;
                        }
                        _ => return Err(self.unexpected("Expected parameter description string")),
                    }
                }
                other => {
                    return Err(EngineError::parser(
                        format!("Unknown decorator '@{other}'"),
                        decorator_loc,
                    ));
                }
            }
        }
        // The tool body is a host-language escape; capture it raw.
        let open = self.current.loc;
        if self.current.kind != TokenKind::LBrace {
            return Err(self.unexpected("Expected tool body"));
        }
        let body = self.lexer.raw_block(open)?;
        self.advance()?;
        let escape_params = params.iter().map(|p| p.name.clone()).collect();
        Ok(Stmt::new(
            StmtKind::Tool(ToolDecl {
                name,
                params,
                return_type,
                description,
                param_docs,
                body: HostEscape {
                    params: escape_params,
                    body,
                },
            }),
            loc,
        ))
    }

    fn parse_params(&mut self) -> RunResult<Vec<Param>> {
        self.expect(&TokenKind::LParen)?;
        let mut params = Vec::new();
        while self.current.kind != TokenKind::RParen {
            let (name, _) = self.expect_ident("parameter name")?;
            let ty = if self.current.kind == TokenKind::Colon {
                self.advance()?;
                Some(self.parse_type()?)
            } else {
                None
            };
            params.push(Param { name, ty });
            if self.current.kind == TokenKind::Comma {
                self.advance()?;
            } else {
                break;
            }
        }
        self.expect(&TokenKind::RParen)?;
        Ok(params)
    }

    fn parse_return(&mut self, loc: CodeLoc) -> RunResult<Stmt> {
        self.expect_keyword("return")?;
        let value = if self.starts_expression() && !self.current.newline_before {
            Some(self.parse_expression()?)
        } else {
            None
        };
        Ok(Stmt::new(StmtKind::Return(value), loc))
    }

    fn starts_expression(&self) -> bool {
        matches!(
            &self.current.kind,
            TokenKind::Ident(_)
                | TokenKind::Number(_)
                | TokenKind::Str(_)
                | TokenKind::Template(_)
                | TokenKind::LParen
                | TokenKind::LBracket
                | TokenKind::LBrace
                | TokenKind::Minus
        )
    }

    fn parse_if(&mut self, loc: CodeLoc) -> RunResult<Stmt> {
        self.expect_keyword("if")?;
        let cond = self.parse_expression()?;
        let then_loc = self.current.loc;
        let then = Stmt::new(StmtKind::Block(self.parse_block()?), then_loc);
        let alt = if self.eat_keyword("else")? {
            if self.at_keyword("if") {
                let nested_loc = self.current.loc;
                Some(Box::new(self.parse_if(nested_loc)?))
            } else {
                let alt_loc = self.current.loc;
                Some(Box::new(Stmt::new(StmtKind::Block(self.parse_block()?), alt_loc)))
            }
        } else {
            None
        };
        Ok(Stmt::new(
            StmtKind::If {
                cond,
                then: Box::new(then),
                alt,
            },
            loc,
        ))
    }

    fn parse_for(&mut self, loc: CodeLoc) -> RunResult<Stmt> {
        self.expect_keyword("for")?;
        let (var, _) = self.expect_ident("loop variable")?;
        self.expect_keyword("in")?;
        let iterable = self.parse_expression()?;
        let body = self.parse_block()?;
        let mode = self.parse_context_mode()?;
        Ok(Stmt::new(
            StmtKind::ForIn {
                var,
                iterable,
                body,
                mode,
            },
            loc,
        ))
    }

    fn parse_while(&mut self, loc: CodeLoc) -> RunResult<Stmt> {
        self.expect_keyword("while")?;
        let cond = self.parse_expression()?;
        let body = self.parse_block()?;
        let mode = self.parse_context_mode()?;
        Ok(Stmt::new(StmtKind::While { cond, body, mode }, loc))
    }

    fn parse_context_mode(&mut self) -> RunResult<ContextMode> {
        if self.eat_keyword("verbose")? {
            return Ok(ContextMode::Verbose);
        }
        if self.eat_keyword("forget")? {
            return Ok(ContextMode::Forget);
        }
        if self.at_keyword("compress") {
            self.advance()?;
            let mut args = Vec::new();
            if self.current.kind == TokenKind::LParen {
                self.advance()?;
                while self.current.kind != TokenKind::RParen {
                    match &self.current.kind {
                        TokenKind::Str(text) => {
                            args.push(CompressArg::Str(text.clone()));
                            self.advance()?;
                        }
                        TokenKind::Ident(name) => {
                            args.push(CompressArg::Ident(name.clone()));
                            self.advance()?;
                        }
                        _ => return Err(self.unexpected("Expected compress prompt or model")),
                    }
                    if self.current.kind == TokenKind::Comma {
                        self.advance()?;
                    } else {
                        break;
                    }
                }
                self.expect(&TokenKind::RParen)?;
                if args.len() > 2 {
                    return Err(self.unexpected("compress takes at most two arguments"));
                }
            }
            return Ok(ContextMode::Compress(args));
        }
        Ok(ContextMode::default())
    }

    fn parse_block(&mut self) -> RunResult<Vec<Stmt>> {
        self.enter()?;
        self.expect(&TokenKind::LBrace)?;
        let mut statements = Vec::new();
        while self.current.kind != TokenKind::RBrace {
            if self.current.kind == TokenKind::Eof {
                return Err(self.unexpected("Expected '}'"));
            }
            statements.push(self.parse_statement()?);
        }
        self.expect(&TokenKind::RBrace)?;
        self.leave();
        Ok(statements)
    }

    // === Expressions ===

    fn parse_expression(&mut self) -> RunResult<Expr> {
        self.enter()?;
        let result = self.parse_expression_inner();
        self.leave();
        result
    }

    fn parse_expression_inner(&mut self) -> RunResult<Expr> {
        let loc = self.current.loc;
        if self.at_keyword("do") || self.at_keyword("vibe") {
            return self.parse_ai(loc);
        }
        if self.at_keyword("ask") {
            self.advance()?;
            let prompt = self.parse_or()?;
            return Ok(Expr::new(
                ExprKind::Ask {
                    prompt: Box::new(prompt),
                },
                loc,
            ));
        }
        let expr = self.parse_or()?;
        if self.current.kind == TokenKind::Assign {
            let ExprKind::Ident(target) = expr.kind else {
                return Err(EngineError::parser("Invalid assignment target", expr.loc));
            };
            self.advance()?;
            let value = self.parse_expression()?;
            return Ok(Expr::new(
                ExprKind::Assign {
                    target,
                    value: Box::new(value),
                },
                loc,
            ));
        }
        Ok(expr)
    }

    fn parse_ai(&mut self, loc: CodeLoc) -> RunResult<Expr> {
        let (keyword, _) = self.expect_ident("AI operation")?;
        let kind = if keyword == "do" { AiKind::Do } else { AiKind::Vibe };
        let prompt = self.parse_or()?;
        let (model, _) = self.expect_ident("model name")?;
        let mut context = ContextSpec::Default;
        let mut cache = false;
        match kind {
            AiKind::Do => {
                if let TokenKind::Ident(name) = &self.current.kind {
                    if !self.current.newline_before {
                        context = match name.as_str() {
                            "local" => ContextSpec::Local,
                            "default" => ContextSpec::Default,
                            other => ContextSpec::Variable(other.to_owned()),
                        };
                        self.advance()?;
                    }
                }
            }
            AiKind::Vibe => {
                if self.at_keyword("cache") && !self.current.newline_before {
                    cache = true;
                    self.advance()?;
                }
            }
        }
        Ok(Expr::new(
            ExprKind::Ai(AiExpr {
                kind,
                prompt: Box::new(prompt),
                model,
                context,
                cache,
            }),
            loc,
        ))
    }

    fn parse_or(&mut self) -> RunResult<Expr> {
        let mut left = self.parse_and()?;
        while self.at_keyword("or") {
            let loc = self.current.loc;
            self.advance()?;
            let right = self.parse_and()?;
            left = binary(crate::ast::BinaryOp::Or, left, right, loc);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> RunResult<Expr> {
        let mut left = self.parse_comparison()?;
        while self.at_keyword("and") {
            let loc = self.current.loc;
            self.advance()?;
            let right = self.parse_comparison()?;
            left = binary(crate::ast::BinaryOp::And, left, right, loc);
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> RunResult<Expr> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.current.kind {
                TokenKind::Eq => crate::ast::BinaryOp::Eq,
                TokenKind::Ne => crate::ast::BinaryOp::Ne,
                TokenKind::Lt => crate::ast::BinaryOp::Lt,
                TokenKind::Le => crate::ast::BinaryOp::Le,
                TokenKind::Gt => crate::ast::BinaryOp::Gt,
                TokenKind::Ge => crate::ast::BinaryOp::Ge,
                _ => return Ok(left),
            };
            let loc = self.current.loc;
            self.advance()?;
            let right = self.parse_additive()?;
            left = binary(op, left, right, loc);
        }
    }

    fn parse_additive(&mut self) -> RunResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.current.kind {
                TokenKind::Plus => crate::ast::BinaryOp::Add,
                TokenKind::Minus => crate::ast::BinaryOp::Sub,
                _ => return Ok(left),
            };
            let loc = self.current.loc;
            self.advance()?;
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right, loc);
        }
    }

    fn parse_multiplicative(&mut self) -> RunResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.current.kind {
                TokenKind::Star => crate::ast::BinaryOp::Mul,
                TokenKind::Slash => crate::ast::BinaryOp::Div,
                TokenKind::Percent => crate::ast::BinaryOp::Mod,
                _ => return Ok(left),
            };
            let loc = self.current.loc;
            self.advance()?;
            let right = self.parse_unary()?;
            left = binary(op, left, right, loc);
        }
    }

    fn parse_unary(&mut self) -> RunResult<Expr> {
        let loc = self.current.loc;
        if self.at_keyword("not") {
            self.advance()?;
            let operand = self.parse_unary()?;
            return Ok(Expr::new(
                ExprKind::Unary {
                    op: crate::ast::UnaryOp::Not,
                    operand: Box::new(operand),
                },
                loc,
            ));
        }
        if self.current.kind == TokenKind::Minus {
            self.advance()?;
            let operand = self.parse_unary()?;
            return Ok(Expr::new(
                ExprKind::Unary {
                    op: crate::ast::UnaryOp::Neg,
                    operand: Box::new(operand),
                },
                loc,
            ));
        }
        self.parse_range()
    }

    fn parse_range(&mut self) -> RunResult<Expr> {
        let start = self.parse_postfix()?;
        if self.current.kind == TokenKind::DotDot {
            let loc = self.current.loc;
            self.advance()?;
            let end = self.parse_postfix()?;
            return Ok(Expr::new(
                ExprKind::Range {
                    start: Box::new(start),
                    end: Box::new(end),
                },
                loc,
            ));
        }
        Ok(start)
    }

    fn parse_postfix(&mut self) -> RunResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            // Postfix operators never attach across a newline; a fresh line
            // starts a new statement.
            match &self.current.kind {
                TokenKind::LParen if !self.current.newline_before => {
                    let loc = self.current.loc;
                    self.advance()?;
                    let mut args = Vec::new();
                    while self.current.kind != TokenKind::RParen {
                        args.push(self.parse_expression()?);
                        if self.current.kind == TokenKind::Comma {
                            self.advance()?;
                        } else {
                            break;
                        }
                    }
                    self.expect(&TokenKind::RParen)?;
                    expr = Expr::new(
                        ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        loc,
                    );
                }
                TokenKind::LBracket if !self.current.newline_before => {
                    expr = self.parse_index_or_slice(expr)?;
                }
                TokenKind::Dot => {
                    let loc = self.current.loc;
                    self.advance()?;
                    let (name, _) = self.expect_ident("member name")?;
                    expr = Expr::new(
                        ExprKind::Member {
                            object: Box::new(expr),
                            name,
                        },
                        loc,
                    );
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_index_or_slice(&mut self, object: Expr) -> RunResult<Expr> {
        let loc = self.current.loc;
        self.expect(&TokenKind::LBracket)?;
        let start = if self.current.kind == TokenKind::Comma {
            None
        } else {
            Some(self.parse_expression()?)
        };
        if self.current.kind == TokenKind::Comma {
            self.advance()?;
            let end = if self.current.kind == TokenKind::RBracket {
                None
            } else {
                Some(self.parse_expression()?)
            };
            self.expect(&TokenKind::RBracket)?;
            return Ok(Expr::new(
                ExprKind::Slice {
                    object: Box::new(object),
                    start: start.map(Box::new),
                    end: end.map(Box::new),
                },
                loc,
            ));
        }
        self.expect(&TokenKind::RBracket)?;
        let Some(index) = start else {
            return Err(EngineError::parser("Expected index expression", loc));
        };
        Ok(Expr::new(
            ExprKind::Index {
                object: Box::new(object),
                index: Box::new(index),
            },
            loc,
        ))
    }

    fn parse_primary(&mut self) -> RunResult<Expr> {
        let loc = self.current.loc;
        match self.current.kind.clone() {
            TokenKind::Number(n) => {
                self.advance()?;
                Ok(Expr::new(ExprKind::Number(n), loc))
            }
            TokenKind::Str(text) => {
                self.advance()?;
                Ok(Expr::new(ExprKind::Str(text), loc))
            }
            TokenKind::Template(text) => {
                self.advance()?;
                Ok(Expr::new(ExprKind::Template(text), loc))
            }
            TokenKind::Ident(name) => match name.as_str() {
                "true" => {
                    self.advance()?;
                    Ok(Expr::new(ExprKind::Bool(true), loc))
                }
                "false" => {
                    self.advance()?;
                    Ok(Expr::new(ExprKind::Bool(false), loc))
                }
                "ts" => self.parse_host_escape(loc),
                "do" | "vibe" => self.parse_ai(loc),
                "ask" => self.parse_expression_inner(),
                _ => {
                    self.advance()?;
                    Ok(Expr::new(ExprKind::Ident(name), loc))
                }
            },
            TokenKind::LParen => {
                self.advance()?;
                let expr = self.parse_expression()?;
                self.expect(&TokenKind::RParen)?;
                Ok(expr)
            }
            TokenKind::LBracket => {
                self.advance()?;
                let mut items = Vec::new();
                while self.current.kind != TokenKind::RBracket {
                    items.push(self.parse_expression()?);
                    if self.current.kind == TokenKind::Comma {
                        self.advance()?;
                    } else {
                        break;
                    }
                }
                self.expect(&TokenKind::RBracket)?;
                Ok(Expr::new(ExprKind::ArrayLit(items), loc))
            }
            TokenKind::LBrace => {
                self.advance()?;
                let mut fields = Vec::new();
                while self.current.kind != TokenKind::RBrace {
                    let key = match &self.current.kind {
                        TokenKind::Ident(key) => key.clone(),
                        TokenKind::Str(key) => key.clone(),
                        _ => return Err(self.unexpected("Expected object key")),
                    };
                    self.advance()?;
                    self.expect(&TokenKind::Colon)?;
                    let value = self.parse_expression()?;
                    fields.push((key, value));
                    if self.current.kind == TokenKind::Comma {
                        self.advance()?;
                    } else {
                        break;
                    }
                }
                self.expect(&TokenKind::RBrace)?;
                Ok(Expr::new(ExprKind::ObjectLit(fields), loc))
            }
            _ => Err(self.unexpected("Expected expression")),
        }
    }

    /// `ts [(a, b)] { raw host code }`
    fn parse_host_escape(&mut self, loc: CodeLoc) -> RunResult<Expr> {
        self.expect_keyword("ts")?;
        let mut params = Vec::new();
        if self.current.kind == TokenKind::LParen {
            self.advance()?;
            while self.current.kind != TokenKind::RParen {
                let (name, _) = self.expect_ident("captured variable name")?;
                params.push(name);
                if self.current.kind == TokenKind::Comma {
                    self.advance()?;
                } else {
                    break;
                }
            }
            self.expect(&TokenKind::RParen)?;
        }
        if self.current.kind != TokenKind::LBrace {
            return Err(self.unexpected("Expected host-language block"));
        }
        let open = self.current.loc;
        let body = self.lexer.raw_block(open)?;
        self.advance()?;
        Ok(Expr::new(ExprKind::Host(HostEscape { params, body }), loc))
    }

    fn parse_type(&mut self) -> RunResult<TypeAnnotation> {
        let (name, loc) = self.expect_ident("type name")?;
        let base = match name.as_str() {
            "text" => BaseType::Text,
            "prompt" => BaseType::Prompt,
            "json" => BaseType::Json,
            "boolean" => BaseType::Boolean,
            "number" => BaseType::Number,
            other => BaseType::Named(other.to_owned()),
        };
        let mut array_depth: u8 = 0;
        while self.current.kind == TokenKind::LBracket {
            self.advance()?;
            self.expect(&TokenKind::RBracket)?;
            array_depth = array_depth
                .checked_add(1)
                .ok_or_else(|| EngineError::parser("Array type too deep", loc))?;
        }
        Ok(TypeAnnotation { base, array_depth })
    }
}

fn binary(op: crate::ast::BinaryOp, left: Expr, right: Expr, loc: CodeLoc) -> Expr {
    Expr::new(
        ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        loc,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(source: &str) -> Stmt {
        let program = parse(source, "").unwrap();
        assert_eq!(program.statements.len(), 1, "expected one statement");
        program.statements.into_iter().next().unwrap()
    }

    #[test]
    fn precedence_binds_multiplication_tighter() {
        let stmt = parse_one("let x = 1 + 2 * 3");
        let StmtKind::Let { init, .. } = stmt.kind else {
            panic!("expected let");
        };
        let ExprKind::Binary { op, right, .. } = init.kind else {
            panic!("expected binary");
        };
        assert_eq!(op, crate::ast::BinaryOp::Add);
        assert!(matches!(
            right.kind,
            ExprKind::Binary {
                op: crate::ast::BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn parses_typed_const_with_array_literal() {
        let stmt = parse_one("const xs: number[] = [1, 2, 3]");
        let StmtKind::Const { name, ty, init } = stmt.kind else {
            panic!("expected const");
        };
        assert_eq!(name, "xs");
        assert_eq!(ty.unwrap().to_string(), "number[]");
        assert!(matches!(init.kind, ExprKind::ArrayLit(items) if items.len() == 3));
    }

    #[test]
    fn parses_for_with_context_mode() {
        let stmt = parse_one("for i in 3 { let y = i } forget");
        let StmtKind::ForIn { var, mode, .. } = stmt.kind else {
            panic!("expected for");
        };
        assert_eq!(var, "i");
        assert_eq!(mode, ContextMode::Forget);
    }

    #[test]
    fn parses_compress_mode_with_args() {
        let stmt = parse_one("while cond { x = x + 1 } compress(\"sum it up\", m)");
        let StmtKind::While { mode, .. } = stmt.kind else {
            panic!("expected while");
        };
        assert_eq!(
            mode,
            ContextMode::Compress(vec![
                CompressArg::Str("sum it up".to_owned()),
                CompressArg::Ident("m".to_owned()),
            ])
        );
    }

    #[test]
    fn parses_do_expression_with_context() {
        let stmt = parse_one("let r = do \"hi\" m local");
        let StmtKind::Let { init, .. } = stmt.kind else {
            panic!("expected let");
        };
        let ExprKind::Ai(ai) = init.kind else {
            panic!("expected AI expression");
        };
        assert_eq!(ai.kind, AiKind::Do);
        assert_eq!(ai.model, "m");
        assert_eq!(ai.context, ContextSpec::Local);
    }

    #[test]
    fn parses_host_escape_with_captures() {
        let stmt = parse_one("let sum = ts (a, b) { return a + b; }");
        let StmtKind::Let { init, .. } = stmt.kind else {
            panic!("expected let");
        };
        let ExprKind::Host(escape) = init.kind else {
            panic!("expected host escape");
        };
        assert_eq!(escape.params, vec!["a".to_owned(), "b".to_owned()]);
        assert_eq!(escape.body, "return a + b;");
    }

    #[test]
    fn parses_tool_declaration_with_decorators() {
        let source = r#"tool search(query: text): json
            @description "Searches the index"
            @param query "what to look for"
            { return index.search(query); }"#;
        let stmt = parse_one(source);
        let StmtKind::Tool(decl) = stmt.kind else {
            panic!("expected tool");
        };
        assert_eq!(decl.name, "search");
        assert_eq!(decl.description, "Searches the index");
        assert_eq!(decl.param_docs, vec![("query".to_owned(), "what to look for".to_owned())]);
        assert_eq!(decl.body.body, "return index.search(query);");
    }

    #[test]
    fn parses_slice_with_omitted_bounds() {
        let stmt = parse_one("let s = xs[, 2]");
        let StmtKind::Let { init, .. } = stmt.kind else {
            panic!("expected let");
        };
        assert!(matches!(
            init.kind,
            ExprKind::Slice { start: None, end: Some(_), .. }
        ));
    }

    #[test]
    fn postfix_call_does_not_attach_across_newlines() {
        let program = parse("let x = f\n(1)", "").unwrap();
        assert_eq!(program.statements.len(), 2);
    }

    #[test]
    fn missing_brace_is_a_parser_error_with_caret() {
        let err = parse("if x { let y = 1", "").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::ParserError);
        assert!(err.loc.is_some());
    }

    #[test]
    fn else_if_chains_nest() {
        let stmt = parse_one("if a { } else if b { } else { }");
        let StmtKind::If { alt, .. } = stmt.kind else {
            panic!("expected if");
        };
        assert!(matches!(alt.unwrap().kind, StmtKind::If { .. }));
    }
}
