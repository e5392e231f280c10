use super::ast::{BinOp, BoolOp, Clause, CmpOp, Expr, Index, Target, UnaryOp};
use super::lexer::{tokenize, Keyword, Spanned, Token};
use super::value::Value;
use super::SandboxError;

type Result<T> = std::result::Result<T, SandboxError>;

/// Parse a complete expression. `max_depth` bounds syntactic nesting.
pub fn parse(source: &str, max_depth: usize) -> Result<Expr> {
    let mut parser = Parser {
        tokens: tokenize(source)?,
        pos: 0,
        depth: 0,
        max_depth,
    };
    let expr = parser.expression_list()?;
    if !matches!(parser.peek(), Token::Eof) {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
    max_depth: usize,
}

impl Parser {
    // Token cursor

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, n: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + n).min(last)].token
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn at_punct(&self, p: &str) -> bool {
        matches!(self.peek(), Token::Punct(q) if *q == p)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        let found = self.at_punct(p);
        if found {
            self.advance();
        }
        found
    }

    fn expect_punct(&mut self, p: &str) -> Result<()> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", p)))
        }
    }

    fn at_kw(&self, kw: Keyword) -> bool {
        matches!(self.peek(), Token::Keyword(k) if *k == kw)
    }

    fn eat_kw(&mut self, kw: Keyword) -> bool {
        let found = self.at_kw(kw);
        if found {
            self.advance();
        }
        found
    }

    fn expect_kw(&mut self, kw: Keyword, text: &str) -> Result<()> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", text)))
        }
    }

    /// Whether the current token closes the expression being parsed.
    fn at_expr_end(&self) -> bool {
        matches!(
            self.peek(),
            Token::Eof | Token::Punct(")" | "]" | "}" | "," | ":" | "=")
        ) || self.at_kw(Keyword::For)
    }

    fn error(&self, message: &str) -> SandboxError {
        SandboxError::Syntax {
            pos: self.tokens[self.pos].pos,
            message: message.to_string(),
        }
    }

    /// Run `f` one nesting level deeper.
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(SandboxError::Limit(format!(
                "expression nesting exceeds {}",
                self.max_depth
            )));
        }
        let result = f(self);
        self.depth -= 1;
        result
    }

    // Grammar, loosest binding first

    /// `expr (, expr)* [,]`: a bare comma list is a tuple.
    fn expression_list(&mut self) -> Result<Expr> {
        let first = self.star_or_expression()?;
        if !self.at_punct(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_punct(",") {
            if self.at_expr_end() {
                break;
            }
            items.push(self.star_or_expression()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn star_or_expression(&mut self) -> Result<Expr> {
        if self.eat_punct("*") {
            let inner = self.expression()?;
            return Ok(Expr::Starred(Box::new(inner)));
        }
        self.expression()
    }

    fn expression(&mut self) -> Result<Expr> {
        self.nested(Self::expression_inner)
    }

    fn expression_inner(&mut self) -> Result<Expr> {
        if self.eat_kw(Keyword::Lambda) {
            return self.lambda();
        }
        if self.eat_kw(Keyword::Yield) {
            let value = if self.at_expr_end() {
                None
            } else {
                Some(Box::new(self.expression_list()?))
            };
            return Ok(Expr::Yield(value));
        }

        let test = self.or_test()?;
        if self.eat_punct(":=") {
            let value = self.expression()?;
            return Ok(Expr::NamedExpr {
                target: Box::new(test),
                value: Box::new(value),
            });
        }
        if self.eat_kw(Keyword::If) {
            let condition = self.or_test()?;
            self.expect_kw(Keyword::Else, "else")?;
            let orelse = self.expression()?;
            return Ok(Expr::IfElse {
                test: Box::new(condition),
                body: Box::new(test),
                orelse: Box::new(orelse),
            });
        }
        Ok(test)
    }

    fn lambda(&mut self) -> Result<Expr> {
        let mut params = Vec::new();
        while !self.at_punct(":") {
            match self.advance() {
                Token::Name(name) => params.push(name),
                _ => return Err(self.error("invalid lambda parameter")),
            }
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(":")?;
        let body = self.expression()?;
        Ok(Expr::Lambda {
            params,
            body: Box::new(body),
        })
    }

    fn or_test(&mut self) -> Result<Expr> {
        self.bool_chain(Keyword::Or, BoolOp::Or, Self::and_test)
    }

    fn and_test(&mut self) -> Result<Expr> {
        self.bool_chain(Keyword::And, BoolOp::And, Self::not_test)
    }

    fn bool_chain(
        &mut self,
        kw: Keyword,
        op: BoolOp,
        next: fn(&mut Self) -> Result<Expr>,
    ) -> Result<Expr> {
        let first = next(self)?;
        if !self.at_kw(kw) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat_kw(kw) {
            values.push(next(self)?);
        }
        Ok(Expr::BoolOp { op, values })
    }

    fn not_test(&mut self) -> Result<Expr> {
        if self.eat_kw(Keyword::Not) {
            let operand = self.nested(Self::not_test)?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr> {
        let left = self.bit_or()?;
        let mut rest = Vec::new();
        loop {
            let (op, width) = match self.peek() {
                Token::Punct("==") => (CmpOp::Eq, 1),
                Token::Punct("!=") => (CmpOp::NotEq, 1),
                Token::Punct("<") => (CmpOp::Lt, 1),
                Token::Punct("<=") => (CmpOp::LtE, 1),
                Token::Punct(">") => (CmpOp::Gt, 1),
                Token::Punct(">=") => (CmpOp::GtE, 1),
                Token::Keyword(Keyword::In) => (CmpOp::In, 1),
                Token::Keyword(Keyword::Not)
                    if matches!(self.peek_at(1), Token::Keyword(Keyword::In)) =>
                {
                    (CmpOp::NotIn, 2)
                }
                Token::Keyword(Keyword::Is)
                    if matches!(self.peek_at(1), Token::Keyword(Keyword::Not)) =>
                {
                    (CmpOp::IsNot, 2)
                }
                Token::Keyword(Keyword::Is) => (CmpOp::Is, 1),
                _ => break,
            };
            for _ in 0..width {
                self.advance();
            }
            rest.push((op, self.bit_or()?));
        }
        if rest.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare {
                left: Box::new(left),
                rest,
            })
        }
    }

    fn binary_level(
        &mut self,
        ops: &[(&str, BinOp)],
        next: fn(&mut Self) -> Result<Expr>,
    ) -> Result<Expr> {
        let mut left = next(self)?;
        loop {
            let op = match self.peek() {
                Token::Punct(p) => ops.iter().find(|(s, _)| s == p).map(|(_, op)| *op),
                _ => None,
            };
            let Some(op) = op else { break };
            self.advance();
            let right = next(self)?;
            left = Expr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn bit_or(&mut self) -> Result<Expr> {
        self.binary_level(&[("|", BinOp::BitOr)], Self::bit_xor)
    }

    fn bit_xor(&mut self) -> Result<Expr> {
        self.binary_level(&[("^", BinOp::BitXor)], Self::bit_and)
    }

    fn bit_and(&mut self) -> Result<Expr> {
        self.binary_level(&[("&", BinOp::BitAnd)], Self::shift)
    }

    fn shift(&mut self) -> Result<Expr> {
        self.binary_level(&[("<<", BinOp::LShift), (">>", BinOp::RShift)], Self::arith)
    }

    fn arith(&mut self) -> Result<Expr> {
        self.binary_level(&[("+", BinOp::Add), ("-", BinOp::Sub)], Self::term)
    }

    fn term(&mut self) -> Result<Expr> {
        self.binary_level(
            &[
                ("*", BinOp::Mul),
                ("/", BinOp::Div),
                ("//", BinOp::FloorDiv),
                ("%", BinOp::Mod),
                ("@", BinOp::MatMul),
            ],
            Self::factor,
        )
    }

    fn factor(&mut self) -> Result<Expr> {
        let op = match self.peek() {
            Token::Punct("-") => Some(UnaryOp::Neg),
            Token::Punct("+") => Some(UnaryOp::Pos),
            Token::Punct("~") => Some(UnaryOp::Invert),
            _ => None,
        };
        let Some(op) = op else {
            return self.power();
        };
        self.advance();
        let operand = self.nested(Self::factor)?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    /// `**` binds tighter than a unary operator on its left but looser on its right.
    fn power(&mut self) -> Result<Expr> {
        let base = if self.eat_kw(Keyword::Await) {
            Expr::Await(Box::new(self.primary()?))
        } else {
            self.primary()?
        };
        if self.eat_punct("**") {
            let exponent = self.factor()?;
            return Ok(Expr::Binary {
                left: Box::new(base),
                op: BinOp::Pow,
                right: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Expr> {
        let mut expr = self.atom()?;
        loop {
            if self.eat_punct(".") {
                let attr = match self.advance() {
                    Token::Name(name) => name,
                    _ => return Err(self.error("expected attribute name")),
                };
                expr = Expr::Attribute {
                    value: Box::new(expr),
                    attr,
                };
            } else if self.eat_punct("[") {
                let index = self.nested(Self::subscript)?;
                self.expect_punct("]")?;
                expr = Expr::Subscript {
                    value: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.eat_punct("(") {
                let (args, kwargs) = self.nested(Self::call_args)?;
                self.expect_punct(")")?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                    kwargs,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn subscript(&mut self) -> Result<Index> {
        let lower = if self.at_punct(":") {
            None
        } else {
            Some(self.expression()?)
        };

        if let Some(first) = lower {
            if !self.at_punct(":") {
                if !self.at_punct(",") {
                    return Ok(Index::Item(first));
                }
                let mut items = vec![first];
                while self.eat_punct(",") {
                    if self.at_punct("]") {
                        break;
                    }
                    items.push(self.expression()?);
                }
                return Ok(Index::Item(Expr::Tuple(items)));
            }
            return self.slice_rest(Some(first));
        }
        self.slice_rest(None)
    }

    fn slice_rest(&mut self, lower: Option<Expr>) -> Result<Index> {
        self.expect_punct(":")?;
        let upper = if self.at_punct(":") || self.at_punct("]") {
            None
        } else {
            Some(self.expression()?)
        };
        let step = if self.eat_punct(":") && !self.at_punct("]") {
            Some(self.expression()?)
        } else {
            None
        };
        Ok(Index::Slice { lower, upper, step })
    }

    fn call_args(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();

        while !self.at_punct(")") {
            if self.eat_punct("**") || self.eat_punct("*") {
                let inner = self.expression()?;
                args.push(Expr::Starred(Box::new(inner)));
            } else if let (Token::Name(name), Token::Punct("=")) = (self.peek(), self.peek_at(1)) {
                let name = name.clone();
                self.advance();
                self.advance();
                kwargs.push((name, self.expression()?));
            } else {
                let arg = self.expression()?;
                if self.at_kw(Keyword::For) {
                    let clauses = self.clauses()?;
                    args.push(Expr::Generator {
                        element: Box::new(arg),
                        clauses,
                    });
                } else {
                    args.push(arg);
                }
            }
            if !self.eat_punct(",") {
                break;
            }
        }
        Ok((args, kwargs))
    }

    fn atom(&mut self) -> Result<Expr> {
        let start = self.pos;
        match self.advance() {
            Token::Int(i) => Ok(Expr::Literal(Value::Int(i))),
            Token::Float(f) => Ok(Expr::Literal(Value::Float(f))),
            Token::Str(mut s) => {
                // Adjacent literals concatenate.
                while let Token::Str(next) = self.peek() {
                    s.push_str(next);
                    self.advance();
                }
                Ok(Expr::Literal(Value::Str(s)))
            }
            Token::Name(name) => Ok(Expr::Name(name)),
            Token::Keyword(Keyword::True) => Ok(Expr::Literal(Value::Bool(true))),
            Token::Keyword(Keyword::False) => Ok(Expr::Literal(Value::Bool(false))),
            Token::Keyword(Keyword::None) => Ok(Expr::Literal(Value::None)),
            Token::Punct("(") => self.nested(Self::paren),
            Token::Punct("[") => self.nested(Self::bracket),
            Token::Punct("{") => self.nested(Self::brace),
            Token::Keyword(Keyword::Statement(kw)) => Err(SandboxError::Syntax {
                pos: self.tokens[start].pos,
                message: format!("'{}' is a statement, not an expression", kw),
            }),
            Token::Eof => Err(self.error("unexpected end of expression")),
            other => Err(SandboxError::Syntax {
                pos: self.tokens[start].pos,
                message: format!("unexpected token {:?}", other),
            }),
        }
    }

    /// After `(`: empty tuple, parenthesised expression, tuple or generator.
    fn paren(&mut self) -> Result<Expr> {
        if self.eat_punct(")") {
            return Ok(Expr::Tuple(vec![]));
        }
        let first = self.star_or_expression()?;
        if self.at_kw(Keyword::For) {
            let clauses = self.clauses()?;
            self.expect_punct(")")?;
            return Ok(Expr::Generator {
                element: Box::new(first),
                clauses,
            });
        }
        if !self.at_punct(",") {
            self.expect_punct(")")?;
            return Ok(first);
        }
        let items = self.items_after(first, ")")?;
        Ok(Expr::Tuple(items))
    }

    /// After `[`: list display or list comprehension.
    fn bracket(&mut self) -> Result<Expr> {
        if self.eat_punct("]") {
            return Ok(Expr::List(vec![]));
        }
        let first = self.star_or_expression()?;
        if self.at_kw(Keyword::For) {
            let clauses = self.clauses()?;
            self.expect_punct("]")?;
            return Ok(Expr::ListComp {
                element: Box::new(first),
                clauses,
            });
        }
        let items = self.items_after(first, "]")?;
        Ok(Expr::List(items))
    }

    /// After `{`: dict or set display, or their comprehensions.
    fn brace(&mut self) -> Result<Expr> {
        if self.eat_punct("}") {
            return Ok(Expr::Dict(vec![]));
        }
        if self.at_punct("**") {
            return Err(SandboxError::Rejected(
                "dict unpacking is not allowed".to_string(),
            ));
        }
        let first = self.star_or_expression()?;

        if !self.eat_punct(":") {
            if self.at_kw(Keyword::For) {
                let clauses = self.clauses()?;
                self.expect_punct("}")?;
                return Ok(Expr::SetComp {
                    element: Box::new(first),
                    clauses,
                });
            }
            let items = self.items_after(first, "}")?;
            return Ok(Expr::Set(items));
        }

        let value = self.expression()?;
        if self.at_kw(Keyword::For) {
            let clauses = self.clauses()?;
            self.expect_punct("}")?;
            return Ok(Expr::DictComp {
                key: Box::new(first),
                value: Box::new(value),
                clauses,
            });
        }

        let mut pairs = vec![(first, value)];
        while self.eat_punct(",") {
            if self.at_punct("}") {
                break;
            }
            if self.at_punct("**") {
                return Err(SandboxError::Rejected(
                    "dict unpacking is not allowed".to_string(),
                ));
            }
            let key = self.expression()?;
            self.expect_punct(":")?;
            let value = self.expression()?;
            pairs.push((key, value));
        }
        self.expect_punct("}")?;
        Ok(Expr::Dict(pairs))
    }

    /// Remaining comma-separated items of a display, through the closing token.
    fn items_after(&mut self, first: Expr, close: &str) -> Result<Vec<Expr>> {
        let mut items = vec![first];
        while self.eat_punct(",") {
            if self.at_punct(close) {
                break;
            }
            items.push(self.star_or_expression()?);
        }
        self.expect_punct(close)?;
        Ok(items)
    }

    fn clauses(&mut self) -> Result<Vec<Clause>> {
        let mut clauses = Vec::new();
        while self.eat_kw(Keyword::For) {
            let target = self.target_list()?;
            self.expect_kw(Keyword::In, "in")?;
            let iter = self.or_test()?;
            let mut conditions = Vec::new();
            while self.eat_kw(Keyword::If) {
                conditions.push(self.or_test()?);
            }
            clauses.push(Clause {
                target,
                iter,
                conditions,
            });
        }
        Ok(clauses)
    }

    fn target_list(&mut self) -> Result<Target> {
        let first = self.target()?;
        if !self.at_punct(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_punct(",") {
            if self.at_kw(Keyword::In) || self.at_punct(")") || self.at_punct("]") {
                break;
            }
            items.push(self.target()?);
        }
        Ok(Target::Tuple(items))
    }

    fn target(&mut self) -> Result<Target> {
        match self.advance() {
            Token::Name(name) => Ok(Target::Name(name)),
            Token::Punct(open @ ("(" | "[")) => {
                let close = if open == "(" { ")" } else { "]" };
                let inner = self.nested(Self::target_list)?;
                self.expect_punct(close)?;
                Ok(inner)
            }
            _ => Err(self.error("invalid comprehension target")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(src: &str) -> Expr {
        parse(src, 64).unwrap()
    }

    fn name(n: &str) -> Box<Expr> {
        Box::new(Expr::Name(n.to_string()))
    }

    fn int(i: i64) -> Box<Expr> {
        Box::new(Expr::Literal(Value::Int(i)))
    }

    #[test]
    fn test_precedence() {
        assert_eq!(
            p("1 + 2 * 3"),
            Expr::Binary {
                left: int(1),
                op: BinOp::Add,
                right: Box::new(Expr::Binary {
                    left: int(2),
                    op: BinOp::Mul,
                    right: int(3),
                }),
            }
        );
        // -2 ** 2 == -(2 ** 2)
        assert_eq!(
            p("-2 ** 2"),
            Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(Expr::Binary {
                    left: int(2),
                    op: BinOp::Pow,
                    right: int(2),
                }),
            }
        );
    }

    #[test]
    fn test_chained_comparison_and_boolean() {
        let expr = p("a < b <= c and not d");
        let Expr::BoolOp { op, values } = expr else {
            panic!("expected BoolOp");
        };
        assert_eq!(op, BoolOp::And);
        assert_eq!(
            values[0],
            Expr::Compare {
                left: name("a"),
                rest: vec![(CmpOp::Lt, *name("b")), (CmpOp::LtE, *name("c"))],
            }
        );
        assert!(matches!(values[1], Expr::Unary { op: UnaryOp::Not, .. }));
    }

    #[test]
    fn test_not_in_and_is_not() {
        assert_eq!(
            p("x not in y"),
            Expr::Compare {
                left: name("x"),
                rest: vec![(CmpOp::NotIn, *name("y"))],
            }
        );
        assert_eq!(
            p("x is not None"),
            Expr::Compare {
                left: name("x"),
                rest: vec![(CmpOp::IsNot, Expr::Literal(Value::None))],
            }
        );
    }

    #[test]
    fn test_trailers() {
        let expr = p("output.__class__.__mro__[-1].__subclasses__()");
        let Expr::Call { func, args, .. } = expr else {
            panic!("expected Call");
        };
        assert!(args.is_empty());
        assert!(matches!(*func, Expr::Attribute { ref attr, .. } if attr == "__subclasses__"));
    }

    #[test]
    fn test_comprehensions() {
        assert!(matches!(p("[x for x in xs if x]"), Expr::ListComp { .. }));
        assert!(matches!(p("{k: v for k, v in d.items()}"), Expr::DictComp { .. }));
        assert!(matches!(p("{x for x in xs}"), Expr::SetComp { .. }));
        assert!(matches!(p("(x for x in xs)"), Expr::Generator { .. }));
        let Expr::Call { args, .. } = p("any(x > 1 for x in xs)") else {
            panic!("expected Call");
        };
        assert!(matches!(args[0], Expr::Generator { .. }));
    }

    #[test]
    fn test_displays() {
        assert_eq!(p("()"), Expr::Tuple(vec![]));
        assert_eq!(p("(1,)"), Expr::Tuple(vec![*int(1)]));
        assert_eq!(p("(1)"), *int(1));
        assert_eq!(p("{}"), Expr::Dict(vec![]));
        assert!(matches!(p("{1, 2}"), Expr::Set(ref items) if items.len() == 2));
        assert!(matches!(p("[1, 2,]"), Expr::List(ref items) if items.len() == 2));
        assert_eq!(p("'a' 'b'"), Expr::Literal(Value::Str("ab".into())));
    }

    #[test]
    fn test_slices() {
        let Expr::Subscript { index, .. } = p("xs[1:]") else {
            panic!("expected Subscript");
        };
        assert_eq!(
            *index,
            Index::Slice {
                lower: Some(*int(1)),
                upper: None,
                step: None,
            }
        );
        let Expr::Subscript { index, .. } = p("xs[::-1]") else {
            panic!("expected Subscript");
        };
        assert!(matches!(*index, Index::Slice { lower: None, upper: None, step: Some(_) }));
    }

    #[test]
    fn test_refused_constructs_still_parse() {
        assert!(matches!(p("lambda: 1"), Expr::Lambda { .. }));
        assert!(matches!(p("(x := 5)"), Expr::NamedExpr { .. }));
        assert!(matches!(p("f(*args)"), Expr::Call { ref args, .. } if matches!(args[0], Expr::Starred(_))));
        assert!(matches!(p("await x"), Expr::Await(_)));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(parse("import os", 64).is_err());
        assert!(parse("x = 1", 64).is_err());
        assert!(parse("1 +", 64).is_err());
        assert!(parse("(1, 2", 64).is_err());
        assert!(parse("a b", 64).is_err());
        assert!(parse("x if y", 64).is_err());
    }

    #[test]
    fn test_nesting_limit() {
        let deep = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert!(matches!(parse(&deep, 64), Err(SandboxError::Limit(_))));
        assert!(parse(&deep, 512).is_ok());
    }
}
