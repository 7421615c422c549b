use std::collections::HashMap;

use tracing::debug;

use crate::{
    ast::{ASTNode, Expression, Function, Prototype},
    lexer::{Lexer, Token},
};

#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum ParserError {
    #[error("unknown token when expecting an expression, found {0}")]
    ExpectedExpression(Token),
    #[error("expected ')', found {0}")]
    ExpectedCloseParen(Token),
    #[error("expected ')' or ',' in argument list, found {0}")]
    ExpectedArgumentSeparator(Token),
    #[error("expected function name in prototype, found {0}")]
    ExpectedFunctionName(Token),
    #[error("expected '(' in prototype, found {0}")]
    ExpectedPrototypeOpenParen(Token),
    #[error("expected ')' in prototype, found {0}")]
    ExpectedPrototypeCloseParen(Token),
}

pub type PartialParseResult = Result<Expression, ParserError>;

/// `-` deliberately binds tighter than `+`.
pub fn default_precedence() -> HashMap<char, i32> {
    let mut operator_precedence = HashMap::new();
    operator_precedence.insert('<', 10);
    operator_precedence.insert('+', 20);
    operator_precedence.insert('-', 30);
    operator_precedence.insert('*', 40);
    operator_precedence
}

/// Recursive descent parser over a token stream. The current token is
/// always populated; constructing a parser reads the first one.
pub struct Parser<I: Iterator<Item = char>> {
    lexer: Lexer<I>,
    current: Token,
    operator_precedence: HashMap<char, i32>,
}

impl<I: Iterator<Item = char>> Parser<I> {
    pub fn new(lexer: Lexer<I>) -> Self {
        Self::with_precedence(lexer, default_precedence())
    }

    pub fn with_precedence(mut lexer: Lexer<I>, operator_precedence: HashMap<char, i32>) -> Self {
        let current = lexer.next_token();
        Parser {
            lexer,
            current,
            operator_precedence,
        }
    }

    pub fn current(&self) -> &Token {
        &self.current
    }

    pub fn next_token(&mut self) -> &Token {
        self.current = self.lexer.next_token();
        &self.current
    }

    /// The current token as a binary operator along with its precedence,
    /// if it is one.
    fn current_operator(&self) -> Option<(char, i32)> {
        match self.current {
            Token::Char(op) if op.is_ascii() => self
                .operator_precedence
                .get(&op)
                .filter(|&&precedence| precedence > 0)
                .map(|&precedence| (op, precedence)),
            _ => None,
        }
    }

    fn parse_number(&mut self, value: f64) -> PartialParseResult {
        self.next_token();
        Ok(Expression::Literal(value))
    }

    fn parse_nested(&mut self) -> PartialParseResult {
        self.next_token();
        let res = self.parse_expression()?;
        if self.current != Token::Char(')') {
            return Err(ParserError::ExpectedCloseParen(self.current.clone()));
        }
        self.next_token();
        Ok(res)
    }

    pub fn parse_identifier(&mut self) -> PartialParseResult {
        let ident = match &self.current {
            Token::Ident(ident) => ident.clone(),
            token => return Err(ParserError::ExpectedExpression(token.clone())),
        };
        self.next_token();

        if self.current != Token::Char('(') {
            return Ok(Expression::Variable(ident));
        }
        self.next_token();

        let mut args = Vec::new();
        if self.current != Token::Char(')') {
            loop {
                args.push(self.parse_expression()?);

                if self.current == Token::Char(')') {
                    break;
                }
                if self.current != Token::Char(',') {
                    return Err(ParserError::ExpectedArgumentSeparator(
                        self.current.clone(),
                    ));
                }
                self.next_token();
            }
        }
        self.next_token();

        Ok(Expression::Call(ident, args))
    }

    pub fn parse_primary(&mut self) -> PartialParseResult {
        match self.current {
            Token::Ident(_) => self.parse_identifier(),
            Token::Number(value) => self.parse_number(value),
            Token::Char('(') => self.parse_nested(),
            ref token => Err(ParserError::ExpectedExpression(token.clone())),
        }
    }

    fn parse_rhs(&mut self, expr_precedence: i32, mut lhs: Expression) -> PartialParseResult {
        loop {
            let (operator, precedence) = match self.current_operator() {
                Some((op, precedence)) if precedence >= expr_precedence => (op, precedence),
                _ => return Ok(lhs),
            };
            self.next_token();

            let mut rhs = self.parse_primary()?;

            // only a strictly tighter operator pulls the rhs into its own
            // subtree, so equal precedence associates left
            if let Some((_, next_precedence)) = self.current_operator() {
                if precedence < next_precedence {
                    rhs = self.parse_rhs(precedence + 1, rhs)?;
                }
            }

            lhs = Expression::Binary(operator, Box::new(lhs), Box::new(rhs));
        }
    }

    pub fn parse_expression(&mut self) -> PartialParseResult {
        let lhs = self.parse_primary()?;
        self.parse_rhs(0, lhs)
    }

    pub fn parse_prototype(&mut self) -> Result<Prototype, ParserError> {
        let name = match &self.current {
            Token::Ident(name) => name.clone(),
            token => return Err(ParserError::ExpectedFunctionName(token.clone())),
        };
        self.next_token();

        if self.current != Token::Char('(') {
            return Err(ParserError::ExpectedPrototypeOpenParen(
                self.current.clone(),
            ));
        }

        let mut args = Vec::new();
        while let Token::Ident(arg) = self.next_token() {
            args.push(arg.clone());
        }

        if self.current != Token::Char(')') {
            return Err(ParserError::ExpectedPrototypeCloseParen(
                self.current.clone(),
            ));
        }
        self.next_token();

        Ok(Prototype { name, args })
    }

    pub fn parse_definition(&mut self) -> Result<Function, ParserError> {
        self.next_token();
        let prototype = self.parse_prototype()?;
        let body = self.parse_expression()?;
        Ok(Function { prototype, body })
    }

    pub fn parse_extern(&mut self) -> Result<Prototype, ParserError> {
        self.next_token();
        self.parse_prototype()
    }

    pub fn parse_top_level_expr(&mut self) -> Result<Function, ParserError> {
        let body = self.parse_expression()?;
        Ok(Function {
            prototype: Prototype::anonymous(),
            body,
        })
    }

    /// Parses every remaining top-level form, stopping at the first error.
    pub fn parse_program(&mut self) -> Result<Vec<ASTNode>, ParserError> {
        let mut ast = Vec::new();

        loop {
            let node = match self.current {
                Token::Eof => break,
                Token::Char(';') => {
                    self.next_token();
                    continue;
                }
                Token::Func => ASTNode::Function(self.parse_definition()?),
                Token::Extern => ASTNode::Extern(self.parse_extern()?),
                _ => ASTNode::Function(self.parse_top_level_expr()?),
            };
            debug!(%node, "parsed top-level form");
            ast.push(node);
        }

        Ok(ast)
    }
}
