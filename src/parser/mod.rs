// Foxely Parser
// Recursive descent parser that converts tokens into an AST

use crate::ast::*;
use crate::error::{FoxError, FoxResult, Span};
use crate::lexer::{Token, TokenKind};

/// Maximum number of arguments a call site may pass
pub const MAX_ARGS: usize = 255;

/// Recursive descent parser for Foxely
pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    file: String,
    source: String,
}

impl Parser {
    pub fn new(tokens: Vec<Token>, file: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            tokens,
            current: 0,
            file: file.into(),
            source: source.into(),
        }
    }

    /// Parse the entire program
    pub fn parse(&mut self) -> FoxResult<Program> {
        let mut statements = Vec::new();
        while !self.is_at_end() {
            statements.push(self.declaration()?);
        }
        Ok(Program::new(statements))
    }

    // ==================== Declarations ====================

    fn declaration(&mut self) -> FoxResult<Stmt> {
        if self.match_token(&TokenKind::Var) {
            self.var_declaration()
        } else if self.check(&TokenKind::Fun) && self.check_ahead_identifier(1) {
            self.advance();
            let name = self.consume_identifier("Expected function name")?.clone();
            let def = self.function_body(name.lexeme, name.span)?;
            Ok(Stmt::Function { def })
        } else if self.match_token(&TokenKind::Class) {
            self.class_declaration()
        } else if self.match_token(&TokenKind::Import) {
            self.import_statement()
        } else {
            self.statement()
        }
    }

    fn var_declaration(&mut self) -> FoxResult<Stmt> {
        let start = self.previous().span;
        let name = self.consume_identifier("Expected variable name")?.lexeme.clone();

        let initializer = if self.match_token(&TokenKind::Equal) {
            Some(self.expression()?)
        } else {
            None
        };

        let end = self.consume(&TokenKind::Semicolon, "Expected ';' after variable declaration")?.span;
        Ok(Stmt::Var {
            name,
            initializer,
            span: start.to(end),
        })
    }

    /// Parses `(params) { body }` after the function name
    fn function_body(&mut self, name: String, start: Span) -> FoxResult<FunctionDef> {
        self.consume(&TokenKind::LeftParen, "Expected '(' after function name")?;
        let params = self.parse_parameters()?;
        self.consume(&TokenKind::LeftBrace, "Expected '{' before function body")?;
        let body = self.block_statements()?;
        let end = self.previous().span;

        Ok(FunctionDef {
            name,
            params,
            body,
            span: start.to(end),
        })
    }

    fn parse_parameters(&mut self) -> FoxResult<Vec<FunctionParam>> {
        let mut params: Vec<FunctionParam> = Vec::new();

        if !self.check(&TokenKind::RightParen) {
            loop {
                if params.len() >= MAX_ARGS {
                    return Err(self.error("Can't have more than 255 parameters"));
                }
                if params.last().map_or(false, |p| p.is_variadic) {
                    return Err(self
                        .error("Variadic parameter must be the last parameter")
                        .with_help("Move '...name' to the end of the parameter list"));
                }

                let is_variadic = self.match_token(&TokenKind::DotDotDot);
                let token = self.consume_identifier("Expected parameter name")?.clone();

                let default_value = if !is_variadic && self.match_token(&TokenKind::Equal) {
                    Some(self.expression()?)
                } else {
                    None
                };

                if default_value.is_none()
                    && !is_variadic
                    && params.iter().any(|p| p.default_value.is_some())
                {
                    return Err(FoxError::syntax_error(
                        format!("Parameter '{}' without a default follows a defaulted parameter", token.lexeme),
                        token.span,
                        &self.file,
                    )
                    .with_source(&self.source));
                }

                params.push(FunctionParam {
                    name: token.lexeme,
                    is_variadic,
                    default_value,
                    span: token.span,
                });

                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }

        self.consume(&TokenKind::RightParen, "Expected ')' after parameters")?;
        Ok(params)
    }

    fn class_declaration(&mut self) -> FoxResult<Stmt> {
        let start = self.previous().span;
        let name = self.consume_identifier("Expected class name")?.lexeme.clone();

        let superclass = if self.match_token(&TokenKind::Colon) {
            let token = self.consume_identifier("Expected superclass name after ':'")?.clone();
            if token.lexeme == name {
                return Err(FoxError::syntax_error("A class can't inherit from itself", token.span, &self.file)
                    .with_source(&self.source));
            }
            Some((token.lexeme, token.span))
        } else {
            None
        };

        self.consume(&TokenKind::LeftBrace, "Expected '{' before class body")?;

        let mut methods = Vec::new();
        let mut operators = Vec::new();
        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            if self.match_token(&TokenKind::Operator) {
                let op_token = self.advance().clone();
                let symbol = match op_token.kind {
                    TokenKind::Plus | TokenKind::Minus | TokenKind::Star | TokenKind::Slash => op_token.lexeme.clone(),
                    _ => {
                        return Err(FoxError::syntax_error(
                            format!("Operator '{}' can't be overloaded", op_token.lexeme),
                            op_token.span,
                            &self.file,
                        )
                        .with_help("Overloadable operators are +, -, * and /")
                        .with_source(&self.source));
                    }
                };
                let def = self.function_body(symbol.clone(), op_token.span)?;
                operators.push((symbol, def));
            } else {
                let token = self.consume_identifier("Expected method name in class body")?.clone();
                methods.push(self.function_body(token.lexeme, token.span)?);
            }
        }

        let end = self.consume(&TokenKind::RightBrace, "Expected '}' after class body")?.span;

        Ok(Stmt::Class {
            def: ClassDef {
                name,
                superclass,
                methods,
                operators,
                span: start.to(end),
            },
        })
    }

    fn import_statement(&mut self) -> FoxResult<Stmt> {
        let start = self.previous().span;
        let module = match &self.peek().kind {
            TokenKind::String(s) | TokenKind::Identifier(s) => s.clone(),
            _ => {
                return Err(self
                    .error("Expected module name after 'import'")
                    .with_help("Use import \"name\"; or import name;"))
            }
        };
        self.advance();
        let end = self.consume(&TokenKind::Semicolon, "Expected ';' after import")?.span;
        Ok(Stmt::Import {
            module,
            span: start.to(end),
        })
    }

    // ==================== Statements ====================

    fn statement(&mut self) -> FoxResult<Stmt> {
        if self.match_token(&TokenKind::Print) {
            self.print_statement()
        } else if self.match_token(&TokenKind::If) {
            self.if_statement()
        } else if self.match_token(&TokenKind::While) {
            self.while_statement()
        } else if self.match_token(&TokenKind::For) {
            self.for_statement()
        } else if self.match_token(&TokenKind::Return) {
            self.return_statement()
        } else if self.match_token(&TokenKind::LeftBrace) {
            let start = self.previous().span;
            let statements = self.block_statements()?;
            let end = self.previous().span;
            Ok(Stmt::Block {
                statements,
                span: start.to(end),
            })
        } else {
            self.expression_statement()
        }
    }

    fn print_statement(&mut self) -> FoxResult<Stmt> {
        let start = self.previous().span;
        let mut args = vec![self.expression()?];
        while self.match_token(&TokenKind::Comma) {
            if args.len() >= MAX_ARGS {
                return Err(self.error("Can't print more than 255 values"));
            }
            args.push(self.expression()?);
        }
        let end = self.consume(&TokenKind::Semicolon, "Expected ';' after value")?.span;
        Ok(Stmt::Print {
            args,
            span: start.to(end),
        })
    }

    fn if_statement(&mut self) -> FoxResult<Stmt> {
        let start = self.previous().span;
        self.consume(&TokenKind::LeftParen, "Expected '(' after 'if'")?;
        let condition = self.expression()?;
        self.consume(&TokenKind::RightParen, "Expected ')' after if condition")?;

        let then_branch = Box::new(self.statement()?);
        let else_branch = if self.match_token(&TokenKind::Else) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };

        let end = self.previous().span;
        Ok(Stmt::If {
            condition,
            then_branch,
            else_branch,
            span: start.to(end),
        })
    }

    fn while_statement(&mut self) -> FoxResult<Stmt> {
        let start = self.previous().span;
        self.consume(&TokenKind::LeftParen, "Expected '(' after 'while'")?;
        let condition = self.expression()?;
        self.consume(&TokenKind::RightParen, "Expected ')' after condition")?;
        let body = Box::new(self.statement()?);
        let end = self.previous().span;

        Ok(Stmt::While {
            condition,
            body,
            span: start.to(end),
        })
    }

    fn for_statement(&mut self) -> FoxResult<Stmt> {
        let start = self.previous().span;
        self.consume(&TokenKind::LeftParen, "Expected '(' after 'for'")?;

        let initializer = if self.match_token(&TokenKind::Semicolon) {
            None
        } else if self.match_token(&TokenKind::Var) {
            Some(Box::new(self.var_declaration()?))
        } else {
            Some(Box::new(self.expression_statement()?))
        };

        let condition = if self.check(&TokenKind::Semicolon) {
            None
        } else {
            Some(self.expression()?)
        };
        self.consume(&TokenKind::Semicolon, "Expected ';' after loop condition")?;

        let increment = if self.check(&TokenKind::RightParen) {
            None
        } else {
            Some(self.expression()?)
        };
        self.consume(&TokenKind::RightParen, "Expected ')' after for clauses")?;

        let body = Box::new(self.statement()?);
        let end = self.previous().span;

        Ok(Stmt::For {
            initializer,
            condition,
            increment,
            body,
            span: start.to(end),
        })
    }

    fn return_statement(&mut self) -> FoxResult<Stmt> {
        let start = self.previous().span;
        let value = if self.check(&TokenKind::Semicolon) {
            None
        } else {
            Some(self.expression()?)
        };
        let end = self.consume(&TokenKind::Semicolon, "Expected ';' after return value")?.span;
        Ok(Stmt::Return {
            value,
            span: start.to(end),
        })
    }

    fn expression_statement(&mut self) -> FoxResult<Stmt> {
        let expr = self.expression()?;
        let end = self.consume(&TokenKind::Semicolon, "Expected ';' after expression")?.span;
        let span = expr.span().to(end);
        Ok(Stmt::Expression { expr, span })
    }

    /// Statements up to and including the closing '}'
    fn block_statements(&mut self) -> FoxResult<Vec<Stmt>> {
        let mut statements = Vec::new();
        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            statements.push(self.declaration()?);
        }
        self.consume(&TokenKind::RightBrace, "Expected '}' after block")?;
        Ok(statements)
    }

    // ==================== Expressions ====================

    pub fn expression(&mut self) -> FoxResult<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> FoxResult<Expr> {
        let expr = self.or()?;

        if self.match_token(&TokenKind::Equal) {
            let equals = self.previous().span;
            let value = Box::new(self.assignment()?);
            let span = expr.span().to(value.span());

            return match expr {
                Expr::Identifier { name, .. } => Ok(Expr::Assignment { name, value, span }),
                Expr::Get { object, property, .. } => Ok(Expr::Set {
                    object,
                    property,
                    value,
                    span,
                }),
                Expr::Index { object, index, .. } => Ok(Expr::IndexSet {
                    object,
                    index,
                    value,
                    span,
                }),
                _ => Err(FoxError::syntax_error("Invalid assignment target", equals, &self.file)
                    .with_help("Can only assign to variables, properties or subscripts")
                    .with_source(&self.source)),
            };
        }

        Ok(expr)
    }

    fn or(&mut self) -> FoxResult<Expr> {
        let mut expr = self.and()?;
        while self.match_token(&TokenKind::Or) {
            let right = self.and()?;
            let span = expr.span().to(right.span());
            expr = Expr::Logical {
                left: Box::new(expr),
                op: LogicalOp::Or,
                right: Box::new(right),
                span,
            };
        }
        Ok(expr)
    }

    fn and(&mut self) -> FoxResult<Expr> {
        let mut expr = self.equality()?;
        while self.match_token(&TokenKind::And) {
            let right = self.equality()?;
            let span = expr.span().to(right.span());
            expr = Expr::Logical {
                left: Box::new(expr),
                op: LogicalOp::And,
                right: Box::new(right),
                span,
            };
        }
        Ok(expr)
    }

    fn equality(&mut self) -> FoxResult<Expr> {
        let mut expr = self.comparison()?;
        while self.check(&TokenKind::EqualEqual) || self.check(&TokenKind::BangEqual) {
            expr = self.binary_tail(expr, Self::comparison)?;
        }
        Ok(expr)
    }

    fn comparison(&mut self) -> FoxResult<Expr> {
        let mut expr = self.term()?;
        loop {
            if self.check(&TokenKind::Less)
                || self.check(&TokenKind::LessEqual)
                || self.check(&TokenKind::Greater)
                || self.check(&TokenKind::GreaterEqual)
            {
                expr = self.binary_tail(expr, Self::term)?;
            } else if self.match_token(&TokenKind::Is) {
                let class = self.term()?;
                let span = expr.span().to(class.span());
                expr = Expr::Is {
                    value: Box::new(expr),
                    class: Box::new(class),
                    span,
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn term(&mut self) -> FoxResult<Expr> {
        let mut expr = self.factor()?;
        while self.check(&TokenKind::Plus) || self.check(&TokenKind::Minus) {
            expr = self.binary_tail(expr, Self::factor)?;
        }
        Ok(expr)
    }

    fn factor(&mut self) -> FoxResult<Expr> {
        let mut expr = self.unary()?;
        while self.check(&TokenKind::Star) || self.check(&TokenKind::Slash) || self.check(&TokenKind::Percent) {
            expr = self.binary_tail(expr, Self::unary)?;
        }
        Ok(expr)
    }

    /// Consumes the operator at the cursor and parses its right operand
    fn binary_tail(&mut self, left: Expr, operand: fn(&mut Self) -> FoxResult<Expr>) -> FoxResult<Expr> {
        let token = self.advance().clone();
        let op = BinaryOp::from_token(&token.kind)
            .ok_or_else(|| FoxError::syntax_error("Expected binary operator", token.span, &self.file))?;
        let right = operand(self)?;
        let span = left.span().to(right.span());
        Ok(Expr::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
            span,
        })
    }

    fn unary(&mut self) -> FoxResult<Expr> {
        let op = if self.match_token(&TokenKind::Bang) {
            Some(UnaryOp::Not)
        } else if self.match_token(&TokenKind::Minus) {
            Some(UnaryOp::Negate)
        } else {
            None
        };

        match op {
            Some(op) => {
                let start = self.previous().span;
                let operand = self.unary()?;
                let span = start.to(operand.span());
                Ok(Expr::Unary {
                    op,
                    operand: Box::new(operand),
                    span,
                })
            }
            None => self.call(),
        }
    }

    fn call(&mut self) -> FoxResult<Expr> {
        let mut expr = self.primary()?;

        loop {
            if self.match_token(&TokenKind::LeftParen) {
                expr = self.finish_call(expr)?;
            } else if self.match_token(&TokenKind::Dot) {
                let name = self.consume_identifier("Expected property name after '.'")?.clone();
                let span = expr.span().to(name.span);
                expr = Expr::Get {
                    object: Box::new(expr),
                    property: name.lexeme,
                    span,
                };
            } else if self.match_token(&TokenKind::LeftBracket) {
                expr = self.finish_subscript(expr)?;
            } else if self.check(&TokenKind::PlusPlus) || self.check(&TokenKind::MinusMinus) {
                let token = self.advance().clone();
                if !matches!(expr, Expr::Identifier { .. } | Expr::Get { .. }) {
                    return Err(FoxError::syntax_error(
                        format!("Invalid '{}' target", token.lexeme),
                        token.span,
                        &self.file,
                    )
                    .with_help("Only variables and properties can be incremented")
                    .with_source(&self.source));
                }
                let op = if token.kind == TokenKind::PlusPlus {
                    StepOp::Increment
                } else {
                    StepOp::Decrement
                };
                let span = expr.span().to(token.span);
                expr = Expr::Step {
                    target: Box::new(expr),
                    op,
                    span,
                };
            } else {
                break;
            }
        }

        Ok(expr)
    }

    fn finish_call(&mut self, callee: Expr) -> FoxResult<Expr> {
        let mut args = Vec::new();
        if !self.check(&TokenKind::RightParen) {
            loop {
                if args.len() >= MAX_ARGS {
                    return Err(self.error("Can't have more than 255 arguments"));
                }
                args.push(self.expression()?);
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        let end = self.consume(&TokenKind::RightParen, "Expected ')' after arguments")?.span;
        let span = callee.span().to(end);
        Ok(Expr::Call {
            callee: Box::new(callee),
            args,
            span,
        })
    }

    /// `[index]`, `[start:end]`, `[:end]`, `[start:]`, `[:]`
    fn finish_subscript(&mut self, object: Expr) -> FoxResult<Expr> {
        let start = if self.check(&TokenKind::Colon) {
            None
        } else {
            Some(Box::new(self.expression()?))
        };

        if self.match_token(&TokenKind::Colon) {
            let end = if self.check(&TokenKind::RightBracket) {
                None
            } else {
                Some(Box::new(self.expression()?))
            };
            let close = self.consume(&TokenKind::RightBracket, "Expected ']' after slice")?.span;
            let span = object.span().to(close);
            return Ok(Expr::Slice {
                object: Box::new(object),
                start,
                end,
                span,
            });
        }

        let close = self.consume(&TokenKind::RightBracket, "Expected ']' after index")?.span;
        let span = object.span().to(close);
        match start {
            Some(index) => Ok(Expr::Index {
                object: Box::new(object),
                index,
                span,
            }),
            None => Err(FoxError::syntax_error("Expected index expression", close, &self.file)
                .with_source(&self.source)),
        }
    }

    fn primary(&mut self) -> FoxResult<Expr> {
        let token = self.advance().clone();
        let span = token.span;

        match token.kind {
            TokenKind::Number(n) => Ok(Expr::Literal {
                value: Literal::Number(n),
                span,
            }),
            TokenKind::String(s) => Ok(Expr::Literal {
                value: Literal::String(s),
                span,
            }),
            TokenKind::True => Ok(Expr::Literal {
                value: Literal::Boolean(true),
                span,
            }),
            TokenKind::False => Ok(Expr::Literal {
                value: Literal::Boolean(false),
                span,
            }),
            TokenKind::Nil => Ok(Expr::Literal {
                value: Literal::Nil,
                span,
            }),
            TokenKind::This => Ok(Expr::This { span }),
            TokenKind::Super => {
                self.consume(&TokenKind::Dot, "Expected '.' after 'super'")?;
                let method = self.consume_identifier("Expected superclass method name")?.clone();
                Ok(Expr::Super {
                    method: method.lexeme,
                    span: span.to(method.span),
                })
            }
            TokenKind::Identifier(name) => Ok(Expr::Identifier { name, span }),
            TokenKind::LeftParen => {
                let expr = self.expression()?;
                let end = self.consume(&TokenKind::RightParen, "Expected ')' after expression")?.span;
                Ok(Expr::Grouping {
                    expr: Box::new(expr),
                    span: span.to(end),
                })
            }
            TokenKind::LeftBracket => self.array_literal(span),
            TokenKind::LeftBrace => self.map_literal(span),
            TokenKind::Fun => {
                let def = self.function_body(String::from("lambda"), span)?;
                let span = def.span;
                Ok(Expr::Lambda {
                    def: Box::new(def),
                    span,
                })
            }
            _ => Err(FoxError::syntax_error(
                format!("Expected expression, found '{}'", token.kind),
                span,
                &self.file,
            )
            .with_source(&self.source)),
        }
    }

    fn array_literal(&mut self, start: Span) -> FoxResult<Expr> {
        let mut elements = Vec::new();
        if !self.check(&TokenKind::RightBracket) {
            loop {
                elements.push(self.expression()?);
                if !self.match_token(&TokenKind::Comma) || self.check(&TokenKind::RightBracket) {
                    break;
                }
            }
        }
        let end = self.consume(&TokenKind::RightBracket, "Expected ']' after array elements")?.span;
        Ok(Expr::Array {
            elements,
            span: start.to(end),
        })
    }

    fn map_literal(&mut self, start: Span) -> FoxResult<Expr> {
        let mut entries = Vec::new();
        if !self.check(&TokenKind::RightBrace) {
            loop {
                let key = self.expression()?;
                self.consume(&TokenKind::Colon, "Expected ':' after map key")?;
                let value = self.expression()?;
                entries.push((key, value));
                if !self.match_token(&TokenKind::Comma) || self.check(&TokenKind::RightBrace) {
                    break;
                }
            }
        }
        let end = self.consume(&TokenKind::RightBrace, "Expected '}' after map entries")?.span;
        Ok(Expr::Map {
            entries,
            span: start.to(end),
        })
    }

    // ==================== Helpers ====================

    fn is_at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current.saturating_sub(1)]
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }

    fn check(&self, kind: &TokenKind) -> bool {
        if self.is_at_end() {
            return false;
        }
        std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(kind)
    }

    fn check_ahead_identifier(&self, n: usize) -> bool {
        self.tokens
            .get(self.current + n)
            .map_or(false, |t| matches!(t.kind, TokenKind::Identifier(_)))
    }

    fn match_token(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, kind: &TokenKind, message: &str) -> FoxResult<&Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error(message))
        }
    }

    fn consume_identifier(&mut self, message: &str) -> FoxResult<&Token> {
        if matches!(self.peek().kind, TokenKind::Identifier(_)) {
            Ok(self.advance())
        } else {
            Err(self.error(message))
        }
    }

    fn error(&self, message: &str) -> FoxError {
        let token = self.peek();
        FoxError::syntax_error(message, token.span, &self.file).with_source(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Scanner;

    fn parse(source: &str) -> FoxResult<Program> {
        let tokens = Scanner::new(source, "<test>").scan_tokens()?;
        Parser::new(tokens, "<test>", source).parse()
    }

    #[test]
    fn test_class_with_superclass_and_operator() {
        let program = parse("class B : A { init(x) { this.x = x; } operator +(o) { return o; } }").unwrap();
        let Stmt::Class { def } = &program.statements[0] else {
            panic!("expected class");
        };
        assert_eq!(def.name, "B");
        assert_eq!(def.superclass.as_ref().map(|s| s.0.as_str()), Some("A"));
        assert_eq!(def.methods.len(), 1);
        assert_eq!(def.operators[0].0, "+");
    }

    #[test]
    fn test_subscript_assignment_and_slice() {
        let program = parse("a[0] = a[1:]; b[:2];").unwrap();
        let Stmt::Expression { expr: Expr::IndexSet { value, .. }, .. } = &program.statements[0] else {
            panic!("expected index assignment");
        };
        assert!(matches!(**value, Expr::Slice { end: None, .. }));
        assert!(matches!(
            program.statements[1],
            Stmt::Expression { expr: Expr::Slice { start: None, .. }, .. }
        ));
    }

    #[test]
    fn test_default_and_variadic_params() {
        let program = parse("fun f(a, b = 2, ...rest) {}").unwrap();
        let Stmt::Function { def } = &program.statements[0] else {
            panic!("expected function");
        };
        assert!(def.params[1].default_value.is_some());
        assert!(def.params[2].is_variadic);
    }

    #[test]
    fn test_variadic_must_be_last() {
        assert!(parse("fun f(...rest, a) {}").is_err());
    }

    #[test]
    fn test_invalid_assignment_target() {
        let err = parse("1 + 2 = 3;").unwrap_err();
        assert_eq!(err.message, "Invalid assignment target");
    }

    #[test]
    fn test_lambda_expression_statement() {
        let program = parse("var f = fun (x) { return x; };").unwrap();
        assert!(matches!(
            program.statements[0],
            Stmt::Var { initializer: Some(Expr::Lambda { .. }), .. }
        ));
    }
}
