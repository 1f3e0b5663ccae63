//! Binding expression compiler
//!
//! Expressions are small: dotted/indexed paths against named roots,
//! literals, negation, strict equality, and short-circuit `&&`/`||`.
//!
//! ```text
//! or       := and ("||" and)*
//! and      := equality ("&&" equality)*
//! equality := unary (("===" | "!==" | "==" | "!=") unary)?
//! unary    := "!" unary | primary
//! primary  := "(" or ")" | literal | path
//! path     := ident ("." ident | "[" digits "]" | "[" string "]")*
//! literal  := string | number | "true" | "false" | "null"
//! ```
//!
//! `==` and `!=` are strict, like `===` and `!==`.
//!
//! Class specs are either a single expression or a comma-separated list of
//! `name: expression` pairs (`active: item.done, 'is-empty': !items`).
//!
//! Compilation is cached by source text in an [`ExpressionCache`]. Sources
//! that fail to compile are cached too, so a broken binding costs one parse.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit1, multispace0},
    combinator::{all_consuming, map, opt, recognize},
    error::{context, VerboseError, VerboseErrorKind},
    multi::{many0, separated_list1},
    sequence::{delimited, pair, preceded, separated_pair, tuple},
    Finish, IResult,
};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use crate::error::ExprError;

type ParseResult<'a, O> = IResult<&'a str, O, VerboseError<&'a str>>;

#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Number(f64),
    Str(Arc<str>),
}

/// Compiled expression
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(Literal),
    /// Path segments; the first names the root (`state`, `item`, ...)
    Path(Vec<Arc<str>>),
    Not(Box<Expr>),
    Equals {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        negate: bool,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Root name of a path expression
    pub fn root(&self) -> Option<&str> {
        match self {
            Expr::Path(segments) => segments.first().map(|s| s.as_ref()),
            _ => None,
        }
    }

    /// Whether the expression is a plain path (assignable by write-back)
    pub fn is_path(&self) -> bool {
        matches!(self, Expr::Path(_))
    }
}

/// Compiled `data-class` value
#[derive(Clone, Debug, PartialEq)]
pub enum ClassSpec {
    /// Yields a class string, a sequence of names, or a record of booleans
    Single(Expr),
    /// Each class toggled by its own condition
    Pairs(Vec<(Arc<str>, Expr)>),
}

// =============================================================================
// PARSER
// =============================================================================

fn ws<'a, O>(
    inner: impl FnMut(&'a str) -> ParseResult<'a, O>,
) -> impl FnMut(&'a str) -> ParseResult<'a, O> {
    delimited(multispace0, inner, multispace0)
}

fn identifier(input: &str) -> ParseResult<&str> {
    recognize(pair(
        take_while1(|c: char| c.is_alphabetic() || c == '_' || c == '$'),
        take_while(|c: char| c.is_alphanumeric() || c == '_' || c == '$'),
    ))(input)
}

fn string_literal(input: &str) -> ParseResult<&str> {
    alt((
        delimited(char('\''), take_while(|c| c != '\''), char('\'')),
        delimited(char('"'), take_while(|c| c != '"'), char('"')),
    ))(input)
}

fn number_literal(input: &str) -> ParseResult<f64> {
    let (rest, text) = recognize(tuple((
        opt(char('-')),
        digit1,
        opt(pair(char('.'), digit1)),
    )))(input)?;
    match text.parse::<f64>() {
        Ok(n) => Ok((rest, n)),
        Err(_) => Err(nom::Err::Error(VerboseError {
            errors: vec![(input, VerboseErrorKind::Context("number"))],
        })),
    }
}

/// One segment after the root: `.name`, `[0]`, `['name']`
fn path_segment(input: &str) -> ParseResult<&str> {
    alt((
        preceded(char('.'), context("path segment", identifier_or_digits)),
        delimited(
            char('['),
            ws(alt((digit1, string_literal))),
            context("closing bracket", char(']')),
        ),
    ))(input)
}

fn identifier_or_digits(input: &str) -> ParseResult<&str> {
    alt((identifier, digit1))(input)
}

fn path_or_keyword(input: &str) -> ParseResult<Expr> {
    let (input, root) = identifier(input)?;
    let (input, rest) = many0(path_segment)(input)?;
    if rest.is_empty() {
        let keyword = match root {
            "true" => Some(Literal::Bool(true)),
            "false" => Some(Literal::Bool(false)),
            "null" | "undefined" => Some(Literal::Null),
            _ => None,
        };
        if let Some(literal) = keyword {
            return Ok((input, Expr::Literal(literal)));
        }
    }
    let segments = std::iter::once(root)
        .chain(rest)
        .map(Arc::<str>::from)
        .collect();
    Ok((input, Expr::Path(segments)))
}

fn primary(input: &str) -> ParseResult<Expr> {
    ws(alt((
        delimited(char('('), or_expr, context("closing parenthesis", char(')'))),
        map(string_literal, |s| Expr::Literal(Literal::Str(Arc::from(s)))),
        map(number_literal, |n| Expr::Literal(Literal::Number(n))),
        path_or_keyword,
    )))(input)
}

fn unary(input: &str) -> ParseResult<Expr> {
    let (input, _) = multispace0(input)?;
    // `!` but not the start of `!=`
    if input.starts_with('!') && !input.starts_with("!=") {
        let (input, operand) = preceded(char('!'), unary)(input)?;
        return Ok((input, Expr::Not(Box::new(operand))));
    }
    primary(input)
}

fn equality(input: &str) -> ParseResult<Expr> {
    let (input, lhs) = unary(input)?;
    let (input, op) = opt(ws(alt((tag("==="), tag("!=="), tag("=="), tag("!=")))))(input)?;
    match op {
        None => Ok((input, lhs)),
        Some(op) => {
            let (input, rhs) = context("right operand", unary)(input)?;
            Ok((
                input,
                Expr::Equals {
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                    negate: op.starts_with('!'),
                },
            ))
        }
    }
}

fn and_expr(input: &str) -> ParseResult<Expr> {
    let (input, first) = equality(input)?;
    let (input, rest) = many0(preceded(ws(tag("&&")), context("right operand", equality)))(input)?;
    Ok((
        input,
        rest.into_iter()
            .fold(first, |lhs, rhs| Expr::And(Box::new(lhs), Box::new(rhs))),
    ))
}

fn or_expr(input: &str) -> ParseResult<Expr> {
    let (input, first) = and_expr(input)?;
    let (input, rest) = many0(preceded(ws(tag("||")), context("right operand", and_expr)))(input)?;
    Ok((
        input,
        rest.into_iter()
            .fold(first, |lhs, rhs| Expr::Or(Box::new(lhs), Box::new(rhs))),
    ))
}

fn class_name(input: &str) -> ParseResult<&str> {
    alt((
        string_literal,
        take_while1(|c: char| c.is_alphanumeric() || c == '-' || c == '_'),
    ))(input)
}

fn class_pairs(input: &str) -> ParseResult<Vec<(Arc<str>, Expr)>> {
    separated_list1(
        ws(char(',')),
        map(
            separated_pair(ws(class_name), char(':'), or_expr),
            |(name, expr)| (Arc::<str>::from(name), expr),
        ),
    )(input)
}

fn to_error(source: &str, err: VerboseError<&str>) -> ExprError {
    let Some((fragment, _)) = err.errors.first() else {
        return ExprError::Syntax {
            offset: 0,
            message: "unknown parse error".to_string(),
        };
    };
    let offset = source.len().saturating_sub(fragment.len());
    let message = err
        .errors
        .iter()
        .rev()
        .find_map(|(_, kind)| match kind {
            VerboseErrorKind::Context(ctx) => Some(format!("expected {}", ctx)),
            VerboseErrorKind::Char(c) => Some(format!("expected '{}'", c)),
            VerboseErrorKind::Nom(_) => None,
        })
        .unwrap_or_else(|| "invalid expression".to_string());
    ExprError::Syntax { offset, message }
}

/// Compile one expression
pub fn compile(source: &str) -> Result<Expr, ExprError> {
    let trimmed = source.trim();
    if trimmed.is_empty() {
        return Err(ExprError::Empty);
    }
    match or_expr(trimmed).finish() {
        Ok(("", expr)) => Ok(expr),
        Ok((rest, _)) => Err(ExprError::Trailing {
            rest: rest.to_string(),
        }),
        Err(err) => Err(to_error(trimmed, err)),
    }
}

/// Compile a `data-class` spec
pub fn compile_class_spec(source: &str) -> Result<ClassSpec, ExprError> {
    let trimmed = source.trim();
    if trimmed.is_empty() {
        return Err(ExprError::Empty);
    }
    if let Ok((_, pairs)) = all_consuming(ws(class_pairs))(trimmed) {
        return Ok(ClassSpec::Pairs(pairs));
    }
    compile(trimmed).map(ClassSpec::Single)
}

// =============================================================================
// CACHE
// =============================================================================

/// Shared compile result for an expression source
pub type CompiledExpr = Arc<Result<Expr, ExprError>>;
/// Shared compile result for a class spec source
pub type CompiledClassSpec = Arc<Result<ClassSpec, ExprError>>;

/// Compiled expressions keyed by source text
#[derive(Default)]
pub struct ExpressionCache {
    expressions: Mutex<FxHashMap<String, CompiledExpr>>,
    class_specs: Mutex<FxHashMap<String, CompiledClassSpec>>,
    compilations: AtomicUsize,
}

static GLOBAL_CACHE: LazyLock<Arc<ExpressionCache>> =
    LazyLock::new(|| Arc::new(ExpressionCache::new()));

impl ExpressionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache shared by every binder that doesn't bring its own
    pub fn global() -> Arc<ExpressionCache> {
        GLOBAL_CACHE.clone()
    }

    pub fn expression(&self, source: &str) -> CompiledExpr {
        let mut expressions = self
            .expressions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(compiled) = expressions.get(source) {
            return compiled.clone();
        }

        self.compilations.fetch_add(1, Ordering::Relaxed);
        let compiled = Arc::new(compile(source));
        tracing::trace!(source, ok = compiled.is_ok(), "expression compiled");
        expressions.insert(source.to_string(), compiled.clone());
        compiled
    }

    pub fn class_spec(&self, source: &str) -> CompiledClassSpec {
        let mut specs = self
            .class_specs
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(compiled) = specs.get(source) {
            return compiled.clone();
        }

        self.compilations.fetch_add(1, Ordering::Relaxed);
        let compiled = Arc::new(compile_class_spec(source));
        specs.insert(source.to_string(), compiled.clone());
        compiled
    }

    /// Number of times the compiler has run
    pub fn compilations(&self) -> usize {
        self.compilations.load(Ordering::Relaxed)
    }

    /// Number of cached sources
    pub fn len(&self) -> usize {
        let expressions = self
            .expressions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        let specs = self
            .class_specs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        expressions + specs
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.expressions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.class_specs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl std::fmt::Debug for ExpressionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpressionCache")
            .field("entries", &self.len())
            .field("compilations", &self.compilations())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(segments: &[&str]) -> Expr {
        Expr::Path(segments.iter().map(|s| Arc::from(*s)).collect())
    }

    #[test]
    fn test_paths() {
        assert_eq!(compile("state.user.name").unwrap(), path(&["state", "user", "name"]));
        assert_eq!(compile("todos[2].title").unwrap(), path(&["todos", "2", "title"]));
        assert_eq!(compile("item['first-name']").unwrap(), path(&["item", "first-name"]));
    }

    #[test]
    fn test_literals() {
        assert_eq!(compile("'hi'").unwrap(), Expr::Literal(Literal::Str("hi".into())));
        assert_eq!(compile("-2.5").unwrap(), Expr::Literal(Literal::Number(-2.5)));
        assert_eq!(compile("true").unwrap(), Expr::Literal(Literal::Bool(true)));
        assert_eq!(compile("null").unwrap(), Expr::Literal(Literal::Null));
        // Keywords only as whole paths
        assert_eq!(compile("true.x").unwrap(), path(&["true", "x"]));
    }

    #[test]
    fn test_operators_and_precedence() {
        let expr = compile("!a || b && c === 'x'").unwrap();
        let Expr::Or(lhs, rhs) = expr else {
            panic!("expected ||");
        };
        assert_eq!(*lhs, Expr::Not(Box::new(path(&["a"]))));
        assert!(matches!(*rhs, Expr::And(_, _)));

        let expr = compile("(a || b) != null").unwrap();
        assert!(matches!(expr, Expr::Equals { negate: true, .. }));
    }

    #[test]
    fn test_errors() {
        assert_eq!(compile("   "), Err(ExprError::Empty));
        assert!(matches!(compile("a b"), Err(ExprError::Trailing { .. })));
        assert!(matches!(compile("(a"), Err(ExprError::Syntax { .. })));
        assert!(matches!(compile("a &&"), Err(ExprError::Trailing { .. })));
    }

    #[test]
    fn test_class_specs() {
        assert_eq!(
            compile_class_spec("classes").unwrap(),
            ClassSpec::Single(path(&["classes"]))
        );
        let ClassSpec::Pairs(pairs) = compile_class_spec("done: item.done, 'is-new': !item.seen").unwrap() else {
            panic!("expected pairs");
        };
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].0.as_ref(), "done");
        assert_eq!(pairs[1].0.as_ref(), "is-new");
    }

    #[test]
    fn test_cache_compiles_each_source_once() {
        let cache = ExpressionCache::new();
        for _ in 0..10 {
            let _ = cache.expression("item.title");
            let _ = cache.expression("a &&");
        }
        assert_eq!(cache.compilations(), 2);
        assert!(cache.expression("a &&").is_err());
        assert!(Arc::ptr_eq(
            &cache.expression("item.title"),
            &cache.expression("item.title")
        ));
    }
}
