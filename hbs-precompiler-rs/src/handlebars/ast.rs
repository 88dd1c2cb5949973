//! Handlebars template syntax tree.
//!
//! Node kinds and field names follow the Handlebars compiler AST so that code
//! written against that shape (partial discovery in particular) reads the same
//! way here.

/// A 1-based line and 0-based column, as Handlebars reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceLocation {
    pub source: Option<String>,
    pub start: Position,
    pub end: Position,
}

/// Whitespace control flags for one tag: `{{~` strips to the left, `~}}`
/// strips to the right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StripFlags {
    pub open: bool,
    pub close: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub body: Vec<Statement>,
    pub block_params: Vec<String>,
    /// The inverse of a block continued by `{{else if ...}}`. Its body is the
    /// single chained block.
    pub chained: bool,
    pub loc: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Content(ContentStatement),
    Mustache(MustacheStatement),
    Block(BlockStatement),
    Partial(PartialStatement),
    PartialBlock(PartialBlockStatement),
    Decorator(DecoratorStatement),
    DecoratorBlock(DecoratorBlock),
    Comment(CommentStatement),
}

impl Statement {
    pub fn loc(&self) -> &SourceLocation {
        match self {
            Statement::Content(s) => &s.loc,
            Statement::Mustache(s) => &s.loc,
            Statement::Block(s) => &s.loc,
            Statement::Partial(s) => &s.loc,
            Statement::PartialBlock(s) => &s.loc,
            Statement::Decorator(s) => &s.loc,
            Statement::DecoratorBlock(s) => &s.loc,
            Statement::Comment(s) => &s.loc,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContentStatement {
    pub value: String,
    /// Text as written, before whitespace control was applied.
    pub original: String,
    pub left_stripped: bool,
    pub right_stripped: bool,
    pub loc: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MustacheStatement {
    pub path: Expression,
    pub params: Vec<Expression>,
    pub hash: Option<Hash>,
    pub escaped: bool,
    pub strip: StripFlags,
    pub loc: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockStatement {
    pub path: Expression,
    pub params: Vec<Expression>,
    pub hash: Option<Hash>,
    pub program: Option<Program>,
    pub inverse: Option<Program>,
    pub open_strip: StripFlags,
    pub inverse_strip: StripFlags,
    pub close_strip: StripFlags,
    pub loc: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartialStatement {
    pub name: Expression,
    pub params: Vec<Expression>,
    pub hash: Option<Hash>,
    /// Leading whitespace of a partial standing alone on its line. The
    /// runtime prefixes every line the partial renders with it.
    pub indent: String,
    pub strip: StripFlags,
    pub loc: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartialBlockStatement {
    pub name: Expression,
    pub params: Vec<Expression>,
    pub hash: Option<Hash>,
    pub program: Program,
    pub open_strip: StripFlags,
    pub close_strip: StripFlags,
    pub loc: SourceLocation,
}

/// `{{* decorator}}`
#[derive(Debug, Clone, PartialEq)]
pub struct DecoratorStatement {
    pub path: Expression,
    pub params: Vec<Expression>,
    pub hash: Option<Hash>,
    pub strip: StripFlags,
    pub loc: SourceLocation,
}

/// `{{#* decorator}}...{{/decorator}}`, e.g. inline partial definitions.
#[derive(Debug, Clone, PartialEq)]
pub struct DecoratorBlock {
    pub path: Expression,
    pub params: Vec<Expression>,
    pub hash: Option<Hash>,
    pub program: Program,
    pub open_strip: StripFlags,
    pub close_strip: StripFlags,
    pub loc: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommentStatement {
    pub value: String,
    pub strip: StripFlags,
    pub loc: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Path(PathExpression),
    SubExpression(SubExpression),
    String(StringLiteral),
    Number(NumberLiteral),
    Boolean(BooleanLiteral),
    Undefined(SourceLocation),
    Null(SourceLocation),
}

impl Expression {
    pub fn loc(&self) -> &SourceLocation {
        match self {
            Expression::Path(e) => &e.loc,
            Expression::SubExpression(e) => &e.loc,
            Expression::String(e) => &e.loc,
            Expression::Number(e) => &e.loc,
            Expression::Boolean(e) => &e.loc,
            Expression::Undefined(loc) | Expression::Null(loc) => loc,
        }
    }

    /// The path when this expression is a plain path, otherwise `None`.
    pub fn as_path(&self) -> Option<&PathExpression> {
        match self {
            Expression::Path(path) => Some(path),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathExpression {
    /// True for `@`-prefixed data variables.
    pub data: bool,
    /// Number of `../` segments.
    pub depth: usize,
    /// Segments with `this`, `.` and `..` removed.
    pub parts: Vec<String>,
    /// The path exactly as written, e.g. `@partial-block` or `../foo.bar`.
    pub original: String,
    /// True when the path is rooted at `this`/`.`, which rules out helpers.
    pub this_scoped: bool,
    pub loc: SourceLocation,
}

impl PathExpression {
    /// A single-segment path that could name a helper. `@foo` counts.
    pub fn is_simple(&self) -> bool {
        self.parts.len() == 1 && !self.this_scoped && self.depth == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubExpression {
    pub path: Box<Expression>,
    pub params: Vec<Expression>,
    pub hash: Option<Hash>,
    pub loc: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StringLiteral {
    pub value: String,
    pub original: String,
    pub loc: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumberLiteral {
    pub value: f64,
    pub original: String,
    pub loc: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BooleanLiteral {
    pub value: bool,
    pub loc: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hash {
    pub pairs: Vec<HashPair>,
    pub loc: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HashPair {
    pub key: String,
    pub value: Expression,
    pub loc: SourceLocation,
}
