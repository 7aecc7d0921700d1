//! Typed AST produced by the parser.
//!
//! Every node carries a [`SourceLocation`] for diagnostics; downstream
//! passes (preprocessor, executors, Datalog engine) consume these values
//! immutably. The preprocessor builds *new* AST values rather than
//! mutating its input (see `preprocessor.rs`).

use crate::value::Value;
use std::fmt;

/// A 1-based line/column pair attached to most AST nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceLocation {
    /// 1-based line number.
    pub line: usize,
    /// 1-based column number.
    pub column: usize,
}

impl SourceLocation {
    /// Construct a location.
    pub fn new(line: usize, column: usize) -> Self {
        SourceLocation { line, column }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A lexical name. Case of the first letter is semantically significant
/// at the grammar level (tensor-index/Datalog variables vs. tensor/relation
/// names and Datalog constants) but is not re-derived here; callers that
/// need the distinction inspect `as_str()` directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(pub String);

impl Identifier {
    /// Borrow the identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if this identifier starts with an uppercase letter (tensor
    /// name, relation name, or Datalog constant position).
    pub fn is_uppercase(&self) -> bool {
        self.0.chars().next().is_some_and(|c| c.is_ascii_uppercase())
    }
}

impl From<&str> for Identifier {
    fn from(s: &str) -> Self {
        Identifier(s.to_string())
    }
}

impl From<String> for Identifier {
    fn from(s: String) -> Self {
        Identifier(s)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A numeric literal, retaining the original lexeme. Parsed to `f64`/`i64`
/// only at the point of use, per the data model.
#[derive(Debug, Clone, PartialEq)]
pub struct NumberLiteral {
    /// Original source text, e.g. `"3.14"` or `"-7"`.
    pub text: String,
}

impl NumberLiteral {
    /// Build from lexeme text.
    pub fn new(text: impl Into<String>) -> Self {
        NumberLiteral { text: text.into() }
    }

    /// Parse as `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        self.text.parse::<f64>().ok()
    }

    /// Parse as `i64`, truncating a float lexeme if necessary.
    pub fn as_i64(&self) -> Option<i64> {
        self.text
            .parse::<i64>()
            .ok()
            .or_else(|| self.as_f64().map(|f| f as i64))
    }
}

impl fmt::Display for NumberLiteral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

/// A string literal; `text` holds the decoded (escapes resolved) value.
#[derive(Debug, Clone, PartialEq)]
pub struct StringLiteral {
    /// Decoded string value.
    pub text: String,
}

impl StringLiteral {
    /// Build from a decoded value.
    pub fn new(text: impl Into<String>) -> Self {
        StringLiteral { text: text.into() }
    }
}

impl fmt::Display for StringLiteral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.text)
    }
}

/// One index position in a [`TensorRef`].
#[derive(Debug, Clone, PartialEq)]
pub enum IndexKind {
    /// A named index, optionally in composite `name/divisor` form
    /// (pooling stride syntax).
    Named {
        /// The index name.
        name: Identifier,
        /// Pooling divisor, if the `name/divisor` form was used.
        divisor: Option<i64>,
    },
    /// A literal integer position.
    Numeric(i64),
    /// `*name`, `*name+k`, or `*name-k` — a virtual (time-stepped) index.
    Virtual {
        /// The logical time-axis name.
        name: Identifier,
        /// Signed offset from "current" (`0` if bare `*name`).
        offset: i64,
    },
}

/// A single index, carrying the `normalized` (trailing-dot) bit.
#[derive(Debug, Clone, PartialEq)]
pub struct Index {
    /// What kind of index this is.
    pub kind: IndexKind,
    /// Set by a trailing `.`; legal only on a named lowercase index, and
    /// on at most one index of an equation's LHS.
    pub normalized: bool,
    /// Source location of the index token.
    pub loc: SourceLocation,
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            IndexKind::Named { name, divisor } => {
                write!(f, "{name}")?;
                if let Some(d) = divisor {
                    write!(f, "/{d}")?;
                }
            }
            IndexKind::Numeric(n) => write!(f, "{n}")?,
            IndexKind::Virtual { name, offset } => {
                write!(f, "*{name}")?;
                match offset.cmp(&0) {
                    std::cmp::Ordering::Greater => write!(f, "+{offset}")?,
                    std::cmp::Ordering::Less => write!(f, "{offset}")?,
                    std::cmp::Ordering::Equal => {}
                }
            }
        }
        if self.normalized {
            write!(f, ".")?;
        }
        Ok(())
    }
}

/// A Python-style half-open slice: `[start]:[end][:step]`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Slice {
    /// Inclusive lower bound, or the whole-axis start if absent.
    pub start: Option<i64>,
    /// Exclusive upper bound, or the whole-axis end if absent.
    pub end: Option<i64>,
    /// Stride; `1` if absent.
    pub step: Option<i64>,
    /// Source location of the slice.
    pub loc: SourceLocation,
}

impl fmt::Display for Slice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(s) = self.start {
            write!(f, "{s}")?;
        }
        write!(f, ":")?;
        if let Some(e) = self.end {
            write!(f, "{e}")?;
        }
        if let Some(s) = self.step {
            write!(f, ":{s}")?;
        }
        Ok(())
    }
}

/// One position in a tensor reference's index list.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexOrSlice {
    /// A single index.
    Index(Index),
    /// A slice.
    Slice(Slice),
}

impl fmt::Display for IndexOrSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexOrSlice::Index(i) => write!(f, "{i}"),
            IndexOrSlice::Slice(s) => write!(f, "{s}"),
        }
    }
}

/// A reference to a tensor, with zero or more index positions. Empty
/// `indices` denotes a scalar reference.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorRef {
    /// The tensor's bare name (never includes indices).
    pub name: Identifier,
    /// Index/slice positions, left to right.
    pub indices: Vec<IndexOrSlice>,
    /// Source location of the reference.
    pub loc: SourceLocation,
}

impl TensorRef {
    /// A scalar (index-free) reference.
    pub fn scalar(name: Identifier, loc: SourceLocation) -> Self {
        TensorRef {
            name,
            indices: Vec::new(),
            loc,
        }
    }
}

impl fmt::Display for TensorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.indices.is_empty() {
            write!(f, "[")?;
            for (i, idx) in self.indices.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, "{idx}")?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}

/// Binary operators, in the precedence order given by the grammar
/// (low to high): `or`, `and`, comparisons, `+ -`, `* / %`, `^`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`, including implicit juxtaposition.
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `^` (right-associative power).
    Pow,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `==` (bit-exact on floats; see design notes).
    Eq,
    /// `!=`
    Ne,
    /// `and`
    And,
    /// `or`
    Or,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "^",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        };
        write!(f, "{s}")
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Arithmetic negation.
    Neg,
    /// Logical negation.
    Not,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnaryOp::Neg => write!(f, "-"),
            UnaryOp::Not => write!(f, "not "),
        }
    }
}

/// An expression: tensor reference, literal, list, call, or operator tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A tensor reference.
    TensorRef(TensorRef),
    /// A numeric literal.
    Number(NumberLiteral),
    /// A string literal.
    Str(StringLiteral),
    /// A (possibly nested) rectangular list literal.
    List(Vec<Expr>, SourceLocation),
    /// A named function call, e.g. `einsum("ij,jk->ik", A, B)`.
    Call {
        /// Function/operator name.
        name: Identifier,
        /// Argument expressions.
        args: Vec<Expr>,
        /// Source location of the call.
        loc: SourceLocation,
    },
    /// A binary operator application.
    Binary {
        /// The operator.
        op: BinaryOp,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
        /// Source location of the operator token.
        loc: SourceLocation,
    },
    /// A unary operator application.
    Unary {
        /// The operator.
        op: UnaryOp,
        /// Operand.
        expr: Box<Expr>,
        /// Source location of the operator token.
        loc: SourceLocation,
    },
}

impl Expr {
    /// Source location of the expression's leading token.
    pub fn loc(&self) -> SourceLocation {
        match self {
            Expr::TensorRef(t) => t.loc,
            Expr::Number(_) | Expr::Str(_) => SourceLocation::default(),
            Expr::List(_, loc) => *loc,
            Expr::Call { loc, .. } => *loc,
            Expr::Binary { loc, .. } => *loc,
            Expr::Unary { loc, .. } => *loc,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::TensorRef(t) => write!(f, "{t}"),
            Expr::Number(n) => write!(f, "{n}"),
            Expr::Str(s) => write!(f, "{s}"),
            Expr::List(items, _) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Expr::Call { name, args, .. } => {
                write!(f, "{name}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
            Expr::Binary { op, lhs, rhs, .. } => write!(f, "({lhs} {op} {rhs})"),
            Expr::Unary { op, expr, .. } => write!(f, "({op}{expr})"),
        }
    }
}

/// One clause of a tensor equation: an expression with an optional guard.
#[derive(Debug, Clone, PartialEq)]
pub struct GuardedClause {
    /// The clause's contribution expression.
    pub expr: Expr,
    /// Optional boolean guard; absent means "always true".
    pub guard: Option<Expr>,
}

impl fmt::Display for GuardedClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)?;
        if let Some(g) = &self.guard {
            write!(f, " : {g}")?;
        }
        Ok(())
    }
}

/// The operator joining a tensor equation's LHS and RHS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// `=`
    Assign,
    /// `+=`
    Add,
    /// `avg=`
    Avg,
    /// `max=`
    Max,
    /// `min=`
    Min,
}

impl fmt::Display for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Projection::Assign => "=",
            Projection::Add => "+=",
            Projection::Avg => "avg=",
            Projection::Max => "max=",
            Projection::Min => "min=",
        };
        write!(f, "{s}")
    }
}

/// A tensor equation: `lhs proj clause ( "|" clause )*`.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorEquation {
    /// The assignment target.
    pub lhs: TensorRef,
    /// The joining projection.
    pub projection: Projection,
    /// One or more guarded clauses, in source order.
    pub clauses: Vec<GuardedClause>,
    /// Source location of the equation.
    pub loc: SourceLocation,
}

impl fmt::Display for TensorEquation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ", self.lhs, self.projection)?;
        for (i, c) in self.clauses.iter().enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

/// A term inside a Datalog atom.
#[derive(Debug, Clone, PartialEq)]
pub enum DatalogTerm {
    /// A lowercase variable, bound by unification.
    Variable(Identifier),
    /// A ground constant.
    Constant(Value),
    /// An arithmetic expression over variables and numeric literals;
    /// legal only in rule heads.
    Arithmetic(Box<Expr>),
}

impl fmt::Display for DatalogTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatalogTerm::Variable(v) => write!(f, "{v}"),
            DatalogTerm::Constant(v) => write!(f, "{v}"),
            DatalogTerm::Arithmetic(e) => write!(f, "{e}"),
        }
    }
}

/// A Datalog atom: `Relation(term, term, ...)`.
#[derive(Debug, Clone, PartialEq)]
pub struct DatalogAtom {
    /// The relation name (always uppercase-initial).
    pub relation: Identifier,
    /// The atom's terms.
    pub terms: Vec<DatalogTerm>,
    /// Source location of the atom.
    pub loc: SourceLocation,
}

impl DatalogAtom {
    /// True if every term is a ground constant.
    pub fn is_ground(&self) -> bool {
        self.terms
            .iter()
            .all(|t| matches!(t, DatalogTerm::Constant(_)))
    }
}

impl fmt::Display for DatalogAtom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.relation)?;
        for (i, t) in self.terms.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{t}")?;
        }
        write!(f, ")")
    }
}

/// A comparison operator used in Datalog body conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `==`
    Eq,
    /// `!=`
    Ne,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
        };
        write!(f, "{s}")
    }
}

/// One element of a Datalog rule or conjunctive-query body.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyElement {
    /// A positive atom.
    Atom(DatalogAtom),
    /// A negated atom (`not`/`!`/`¬`), checked by negation-as-failure.
    Negated(DatalogAtom),
    /// An arithmetic/comparison condition filter.
    Condition {
        /// Left-hand expression.
        lhs: Expr,
        /// Comparison operator.
        op: CompareOp,
        /// Right-hand expression.
        rhs: Expr,
    },
}

impl fmt::Display for BodyElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodyElement::Atom(a) => write!(f, "{a}"),
            BodyElement::Negated(a) => write!(f, "not {a}"),
            BodyElement::Condition { lhs, op, rhs } => write!(f, "{lhs} {op} {rhs}"),
        }
    }
}

/// A Datalog rule: `head <- body`.
#[derive(Debug, Clone, PartialEq)]
pub struct DatalogRule {
    /// The rule's head atom.
    pub head: DatalogAtom,
    /// The rule's body, as a conjunction of elements.
    pub body: Vec<BodyElement>,
    /// Source location of the rule.
    pub loc: SourceLocation,
}

impl fmt::Display for DatalogRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <- ", self.head)?;
        for (i, b) in self.body.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{b}")?;
        }
        Ok(())
    }
}

/// The recognized learning directive names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveName {
    /// `@minimize`
    Minimize,
    /// `@maximize`
    Maximize,
    /// `@sample`
    Sample,
}

impl fmt::Display for DirectiveName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DirectiveName::Minimize => "minimize",
            DirectiveName::Maximize => "maximize",
            DirectiveName::Sample => "sample",
        };
        write!(f, "{s}")
    }
}

/// One `name=value` argument to a learning directive.
#[derive(Debug, Clone, PartialEq)]
pub enum DirectiveArg {
    /// An integer-valued argument (e.g. `epochs=100`).
    Int(i64),
    /// A float-valued argument (e.g. `lr=0.1`).
    Float(f64),
    /// A string-valued argument.
    Str(String),
    /// A boolean argument (e.g. `verbose=true`).
    Bool(bool),
}

impl fmt::Display for DirectiveArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectiveArg::Int(i) => write!(f, "{i}"),
            DirectiveArg::Float(x) => write!(f, "{x}"),
            DirectiveArg::Str(s) => write!(f, "\"{s}\""),
            DirectiveArg::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// A learning directive attached to a query, e.g. `@minimize(lr=0.1, epochs=100)`.
#[derive(Debug, Clone, PartialEq)]
pub struct LearningDirective {
    /// Which optimization mode to run.
    pub name: DirectiveName,
    /// Argument name → value, in source order.
    pub args: Vec<(String, DirectiveArg)>,
    /// Source location of the directive.
    pub loc: SourceLocation,
}

impl LearningDirective {
    /// Look up a named argument.
    pub fn arg(&self, name: &str) -> Option<&DirectiveArg> {
        self.args.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

impl fmt::Display for LearningDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}(", self.name)?;
        for (i, (k, v)) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{k}={v}")?;
        }
        write!(f, ")")
    }
}

/// The target of a query: a tensor reference or a Datalog atom.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryTarget {
    /// `Name?` / `Name[i,j]?`
    Tensor(TensorRef),
    /// `Relation(terms)?`
    Datalog(DatalogAtom),
}

impl fmt::Display for QueryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryTarget::Tensor(t) => write!(f, "{t}"),
            QueryTarget::Datalog(a) => write!(f, "{a}"),
        }
    }
}

/// A query statement, optionally a conjunctive Datalog query and/or
/// carrying a learning directive.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// What is being queried.
    pub target: QueryTarget,
    /// Additional conjunctive body elements (Datalog queries only).
    pub body: Vec<BodyElement>,
    /// An attached `@minimize`/`@maximize`/`@sample` directive, if any.
    pub directive: Option<LearningDirective>,
    /// Source location of the query.
    pub loc: SourceLocation,
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.target)?;
        for b in &self.body {
            write!(f, ",{b}")?;
        }
        write!(f, "?")?;
        if let Some(d) = &self.directive {
            write!(f, " {d}")?;
        }
        Ok(())
    }
}

/// A string used in a file operation, either `file("...")` or a bare string.
#[derive(Debug, Clone, PartialEq)]
pub struct FileLiteral {
    /// The path or literal text.
    pub path: StringLiteral,
    /// Source location.
    pub loc: SourceLocation,
}

impl fmt::Display for FileLiteral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)
    }
}

/// A flat-file tensor I/O statement.
#[derive(Debug, Clone, PartialEq)]
pub enum FileOperation {
    /// `target = file(...)` — read a tensor from disk.
    Read {
        /// Tensor to bind.
        target: TensorRef,
        /// Source file.
        path: FileLiteral,
    },
    /// `file(...) = source` — write a tensor to disk.
    Write {
        /// Destination file.
        path: FileLiteral,
        /// Tensor to serialize.
        source: TensorRef,
    },
}

impl fmt::Display for FileOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileOperation::Read { target, path } => write!(f, "{target} = {path}"),
            FileOperation::Write { path, source } => write!(f, "{path} = {source}"),
        }
    }
}

/// One parsed statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// A tensor equation.
    TensorEquation(TensorEquation),
    /// A flat-file read or write.
    FileOperation(FileOperation),
    /// A tensor or Datalog query.
    Query(Query),
    /// A ground Datalog fact.
    DatalogFact(DatalogAtom),
    /// A Datalog rule.
    DatalogRule(DatalogRule),
}

impl Statement {
    /// Source location of the statement's leading token.
    pub fn loc(&self) -> SourceLocation {
        match self {
            Statement::TensorEquation(e) => e.loc,
            Statement::FileOperation(op) => match op {
                FileOperation::Read { target, .. } => target.loc,
                FileOperation::Write { path, .. } => path.loc,
            },
            Statement::Query(q) => q.loc,
            Statement::DatalogFact(a) => a.loc,
            Statement::DatalogRule(r) => r.loc,
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::TensorEquation(e) => write!(f, "{e}"),
            Statement::FileOperation(op) => write!(f, "{op}"),
            Statement::Query(q) => write!(f, "{q}"),
            Statement::DatalogFact(a) => write!(f, "{a}"),
            Statement::DatalogRule(r) => write!(f, "{r}"),
        }
    }
}

/// An ordered sequence of statements; order is semantically significant.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    /// The program's statements, in source order.
    pub statements: Vec<Statement>,
}

impl Program {
    /// An empty program.
    pub fn new() -> Self {
        Program::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_case() {
        assert!(Identifier::from("Alice").is_uppercase());
        assert!(!Identifier::from("alice").is_uppercase());
    }

    #[test]
    fn number_literal_parses_lazily() {
        let n = NumberLiteral::new("3.5");
        assert_eq!(n.as_f64(), Some(3.5));
        assert_eq!(n.as_i64(), Some(3));
    }

    #[test]
    fn tensor_ref_display_round_trips_shape() {
        let r = TensorRef {
            name: "A".into(),
            indices: vec![
                IndexOrSlice::Index(Index {
                    kind: IndexKind::Named {
                        name: "i".into(),
                        divisor: None,
                    },
                    normalized: false,
                    loc: SourceLocation::default(),
                }),
                IndexOrSlice::Index(Index {
                    kind: IndexKind::Numeric(0),
                    normalized: false,
                    loc: SourceLocation::default(),
                }),
            ],
            loc: SourceLocation::default(),
        };
        assert_eq!(r.to_string(), "A[i,0]");
    }

    /// Zero out every `SourceLocation` in a statement so two ASTs parsed
    /// from different source text (but denoting the same statement) can
    /// be compared for structural equality.
    fn zero_locations(stmt: &Statement) -> Statement {
        fn zero_expr(e: &Expr) -> Expr {
            match e {
                Expr::TensorRef(t) => Expr::TensorRef(zero_tensor_ref(t)),
                Expr::Number(n) => Expr::Number(n.clone()),
                Expr::Str(s) => Expr::Str(s.clone()),
                Expr::List(items, _) => {
                    Expr::List(items.iter().map(zero_expr).collect(), SourceLocation::default())
                }
                Expr::Call { name, args, .. } => Expr::Call {
                    name: name.clone(),
                    args: args.iter().map(zero_expr).collect(),
                    loc: SourceLocation::default(),
                },
                Expr::Binary { op, lhs, rhs, .. } => Expr::Binary {
                    op: *op,
                    lhs: Box::new(zero_expr(lhs)),
                    rhs: Box::new(zero_expr(rhs)),
                    loc: SourceLocation::default(),
                },
                Expr::Unary { op, expr, .. } => Expr::Unary {
                    op: *op,
                    expr: Box::new(zero_expr(expr)),
                    loc: SourceLocation::default(),
                },
            }
        }

        fn zero_index(idx: &Index) -> Index {
            Index {
                kind: idx.kind.clone(),
                normalized: idx.normalized,
                loc: SourceLocation::default(),
            }
        }

        fn zero_slice(s: &Slice) -> Slice {
            Slice {
                start: s.start,
                end: s.end,
                step: s.step,
                loc: SourceLocation::default(),
            }
        }

        fn zero_index_or_slice(v: &IndexOrSlice) -> IndexOrSlice {
            match v {
                IndexOrSlice::Index(i) => IndexOrSlice::Index(zero_index(i)),
                IndexOrSlice::Slice(s) => IndexOrSlice::Slice(zero_slice(s)),
            }
        }

        fn zero_tensor_ref(t: &TensorRef) -> TensorRef {
            TensorRef {
                name: t.name.clone(),
                indices: t.indices.iter().map(zero_index_or_slice).collect(),
                loc: SourceLocation::default(),
            }
        }

        fn zero_clause(c: &GuardedClause) -> GuardedClause {
            GuardedClause {
                expr: zero_expr(&c.expr),
                guard: c.guard.as_ref().map(zero_expr),
            }
        }

        fn zero_equation(eq: &TensorEquation) -> TensorEquation {
            TensorEquation {
                lhs: zero_tensor_ref(&eq.lhs),
                projection: eq.projection,
                clauses: eq.clauses.iter().map(zero_clause).collect(),
                loc: SourceLocation::default(),
            }
        }

        fn zero_term(t: &DatalogTerm) -> DatalogTerm {
            match t {
                DatalogTerm::Variable(v) => DatalogTerm::Variable(v.clone()),
                DatalogTerm::Constant(v) => DatalogTerm::Constant(v.clone()),
                DatalogTerm::Arithmetic(e) => DatalogTerm::Arithmetic(Box::new(zero_expr(e))),
            }
        }

        fn zero_atom(a: &DatalogAtom) -> DatalogAtom {
            DatalogAtom {
                relation: a.relation.clone(),
                terms: a.terms.iter().map(zero_term).collect(),
                loc: SourceLocation::default(),
            }
        }

        fn zero_body_elt(b: &BodyElement) -> BodyElement {
            match b {
                BodyElement::Atom(a) => BodyElement::Atom(zero_atom(a)),
                BodyElement::Negated(a) => BodyElement::Negated(zero_atom(a)),
                BodyElement::Condition { lhs, op, rhs } => BodyElement::Condition {
                    lhs: zero_expr(lhs),
                    op: *op,
                    rhs: zero_expr(rhs),
                },
            }
        }

        fn zero_rule(r: &DatalogRule) -> DatalogRule {
            DatalogRule {
                head: zero_atom(&r.head),
                body: r.body.iter().map(zero_body_elt).collect(),
                loc: SourceLocation::default(),
            }
        }

        fn zero_directive(d: &LearningDirective) -> LearningDirective {
            LearningDirective {
                name: d.name,
                args: d.args.clone(),
                loc: SourceLocation::default(),
            }
        }

        fn zero_file_literal(p: &FileLiteral) -> FileLiteral {
            FileLiteral {
                path: p.path.clone(),
                loc: SourceLocation::default(),
            }
        }

        fn zero_query_target(t: &QueryTarget) -> QueryTarget {
            match t {
                QueryTarget::Tensor(t) => QueryTarget::Tensor(zero_tensor_ref(t)),
                QueryTarget::Datalog(a) => QueryTarget::Datalog(zero_atom(a)),
            }
        }

        match stmt {
            Statement::TensorEquation(eq) => Statement::TensorEquation(zero_equation(eq)),
            Statement::FileOperation(op) => Statement::FileOperation(match op {
                FileOperation::Read { target, path } => FileOperation::Read {
                    target: zero_tensor_ref(target),
                    path: zero_file_literal(path),
                },
                FileOperation::Write { path, source } => FileOperation::Write {
                    path: zero_file_literal(path),
                    source: zero_tensor_ref(source),
                },
            }),
            Statement::Query(q) => Statement::Query(Query {
                target: zero_query_target(&q.target),
                body: q.body.iter().map(zero_body_elt).collect(),
                directive: q.directive.as_ref().map(zero_directive),
                loc: SourceLocation::default(),
            }),
            Statement::DatalogFact(a) => Statement::DatalogFact(zero_atom(a)),
            Statement::DatalogRule(r) => Statement::DatalogRule(zero_rule(r)),
        }
    }

    fn assert_round_trips(source: &str) {
        use crate::parser::parse_statement;
        let original = parse_statement(source).expect("first parse");
        let printed = original.to_string();
        let reparsed = parse_statement(&printed).unwrap_or_else(|e| {
            panic!("re-parsing pretty-printed statement {printed:?} failed: {e}")
        });
        assert_eq!(
            zero_locations(&original),
            zero_locations(&reparsed),
            "source {source:?} printed as {printed:?} does not round-trip"
        );
    }

    #[test]
    fn tensor_equation_statement_round_trips() {
        assert_round_trips("C[i,k] = A[i,j] B[j,k]");
    }

    #[test]
    fn datalog_fact_statement_round_trips() {
        assert_round_trips("Parent(Alice,Bob)");
    }

    #[test]
    fn datalog_rule_statement_round_trips() {
        assert_round_trips("Ancestor(x,z) <- Ancestor(x,y), Parent(y,z)");
    }

    #[test]
    fn query_statement_round_trips() {
        assert_round_trips("Ancestor(Alice,Dave)?");
    }

    #[test]
    fn query_with_learning_directive_round_trips() {
        assert_round_trips("Loss? @minimize(lr=0.1,epochs=100)");
    }

    #[test]
    fn file_operation_statement_round_trips() {
        assert_round_trips("B = \"matrix.tl.dat\"");
    }

    #[test]
    fn directive_arg_lookup() {
        let d = LearningDirective {
            name: DirectiveName::Minimize,
            args: vec![
                ("lr".to_string(), DirectiveArg::Float(0.1)),
                ("epochs".to_string(), DirectiveArg::Int(100)),
            ],
            loc: SourceLocation::default(),
        };
        assert_eq!(d.arg("lr"), Some(&DirectiveArg::Float(0.1)));
        assert_eq!(d.arg("missing"), None);
    }
}
