//! Handlebars template parser.
//!
//! The scanner splits the source into content runs and tags (each tag already
//! tokenized) and the tree builder folds the flat item list into a [`Program`]
//! using a stack of open blocks. Whitespace control then runs over the finished
//! tree, see [`super::whitespace`].

use super::ast::*;
use super::{whitespace, CompileError};
use regex::Regex;

lazy_static! {
    static ref NUMBER_RE: Regex = Regex::new(r"^-?[0-9]+(?:\.[0-9]+)?").unwrap();
    static ref BLOCK_PARAMS_RE: Regex = Regex::new(r"^as\s+\|").unwrap();
}

/// Parses `source` into a syntax tree. `source_name` is recorded in every
/// node location and in error messages.
pub fn parse(source: &str, source_name: Option<&str>) -> Result<Program, CompileError> {
    parse_with(source, source_name, true)
}

/// Like [`parse`]. With `standalone` off, only `~` trims whitespace and lines
/// holding a lone block tag, comment or partial keep their indentation and
/// newline.
pub fn parse_with(
    source: &str,
    source_name: Option<&str>,
    standalone: bool,
) -> Result<Program, CompileError> {
    let locator = Locator::new(source, source_name);
    let items = Scanner::new(source, &locator).scan()?;
    let mut program = TreeBuilder::new(&locator).build(items, source.len())?;
    whitespace::apply(&mut program, standalone);
    Ok(program)
}

/// Maps byte offsets to Handlebars line/column positions.
struct Locator<'a> {
    src: &'a str,
    source_name: Option<String>,
    line_starts: Vec<usize>,
}

impl<'a> Locator<'a> {
    fn new(src: &'a str, source_name: Option<&str>) -> Self {
        let line_starts = std::iter::once(0)
            .chain(src.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self {
            src,
            source_name: source_name.map(str::to_string),
            line_starts,
        }
    }

    /// Columns count UTF-16 code units, like the JavaScript tooling reading them.
    fn position(&self, offset: usize) -> Position {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        };
        let start = self.line_starts[line];
        Position {
            line: line as u32 + 1,
            column: self.src[start..offset].encode_utf16().count() as u32,
        }
    }

    fn loc(&self, start: usize, end: usize) -> SourceLocation {
        SourceLocation {
            source: self.source_name.clone(),
            start: self.position(start),
            end: self.position(end),
        }
    }

    fn error(&self, offset: usize, message: impl Into<String>) -> CompileError {
        let pos = self.position(offset);
        CompileError::Parse {
            message: message.into(),
            source_name: self.source_name.clone(),
            line: pos.line,
            column: pos.column,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Id { name: String, literal: bool },
    Sep(char),
    Data,
    String(String),
    Number(f64),
    Boolean(bool),
    Undefined,
    Null,
    OpenSexpr,
    CloseSexpr,
    Equals,
    OpenBlockParams,
    Pipe,
}

impl Tok {
    fn describe(&self) -> String {
        match self {
            Tok::Id { name, .. } => format!("'{}'", name),
            Tok::Sep(c) => format!("'{}'", c),
            Tok::Data => "'@'".to_string(),
            Tok::String(_) => "STRING".to_string(),
            Tok::Number(_) => "NUMBER".to_string(),
            Tok::Boolean(_) => "BOOLEAN".to_string(),
            Tok::Undefined => "UNDEFINED".to_string(),
            Tok::Null => "NULL".to_string(),
            Tok::OpenSexpr => "'('".to_string(),
            Tok::CloseSexpr => "')'".to_string(),
            Tok::Equals => "'='".to_string(),
            Tok::OpenBlockParams => "'as |'".to_string(),
            Tok::Pipe => "'|'".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    start: usize,
    end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagKind {
    Mustache { escaped: bool },
    Partial,
    PartialBlockOpen,
    DecoratorBlockOpen,
    BlockOpen,
    InverseOpen,
    Close,
    Else,
    ElseChain,
    Decorator,
    Comment,
}

#[derive(Debug)]
struct Tag {
    kind: TagKind,
    tokens: Vec<Token>,
    /// Offset of the closing `}}`.
    body_end: usize,
    comment: String,
    strip: StripFlags,
    start: usize,
    end: usize,
}

#[derive(Debug)]
enum Item {
    Content {
        value: String,
        original: String,
        start: usize,
        end: usize,
    },
    Tag(Tag),
}

struct Scanner<'a, 'l> {
    src: &'a str,
    pos: usize,
    locator: &'l Locator<'a>,
}

impl<'a, 'l> Scanner<'a, 'l> {
    fn new(src: &'a str, locator: &'l Locator<'a>) -> Self {
        Self { src, pos: 0, locator }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn eat(&mut self, s: &str) -> bool {
        if self.rest().starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn skip_whitespace(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.src.len() - trimmed.len();
    }

    fn scan(mut self) -> Result<Vec<Item>, CompileError> {
        let mut items = Vec::new();
        while self.pos < self.src.len() {
            if self.rest().starts_with("{{") {
                items.push(Item::Tag(self.scan_tag()?));
            } else if let Some(content) = self.scan_content() {
                items.push(content);
            }
        }
        Ok(items)
    }

    /// Reads text up to the next unescaped `{{`. `\{{` emits a literal `{{`,
    /// `\\{{` emits a literal backslash followed by a real tag.
    fn scan_content(&mut self) -> Option<Item> {
        let start = self.pos;
        let mut value = String::new();
        loop {
            let Some(i) = self.rest().find("{{") else {
                value.push_str(self.rest());
                self.pos = self.src.len();
                break;
            };
            let text = &self.rest()[..i];
            if text.ends_with("\\\\") {
                value.push_str(&text[..text.len() - 1]);
                self.pos += i;
                break;
            } else if let Some(text) = text.strip_suffix('\\') {
                value.push_str(text);
                value.push_str("{{");
                self.pos += i + 2;
            } else {
                value.push_str(text);
                self.pos += i;
                break;
            }
        }
        if self.pos == start {
            return None;
        }
        Some(Item::Content {
            value,
            original: self.src[start..self.pos].to_string(),
            start,
            end: self.pos,
        })
    }

    fn scan_tag(&mut self) -> Result<Tag, CompileError> {
        let start = self.pos;
        self.pos += 2;
        let strip_open = self.eat("~");

        if self.eat("!") {
            return self.scan_comment(start, strip_open);
        }

        let mut triple = false;
        let kind = if self.eat("#>") {
            TagKind::PartialBlockOpen
        } else if self.eat("#*") {
            TagKind::DecoratorBlockOpen
        } else if self.eat("#") {
            TagKind::BlockOpen
        } else if self.eat("/") {
            TagKind::Close
        } else if self.eat(">") {
            TagKind::Partial
        } else if self.eat("*") {
            TagKind::Decorator
        } else if self.eat("{") {
            triple = true;
            TagKind::Mustache { escaped: false }
        } else if self.eat("&") {
            TagKind::Mustache { escaped: false }
        } else if self.eat("^") {
            if self.at_bare_close() {
                TagKind::Else
            } else {
                TagKind::InverseOpen
            }
        } else if self.eat_else_keyword() {
            if self.at_bare_close() {
                TagKind::Else
            } else {
                TagKind::ElseChain
            }
        } else {
            TagKind::Mustache { escaped: true }
        };

        let (tokens, body_end, strip_close) = self.scan_tokens(triple)?;
        Ok(Tag {
            kind,
            tokens,
            body_end,
            comment: String::new(),
            strip: StripFlags {
                open: strip_open,
                close: strip_close,
            },
            start,
            end: self.pos,
        })
    }

    fn scan_comment(&mut self, start: usize, strip_open: bool) -> Result<Tag, CompileError> {
        let long = self.eat("--");
        let body_start = self.pos;
        let (close, terminators): (&str, &[&str]) = if long {
            ("--", &["--~}}", "--}}"])
        } else {
            ("", &["~}}", "}}"])
        };
        let found = terminators
            .iter()
            .filter_map(|t| self.rest().find(t).map(|i| (i, *t)))
            .min_by_key(|(i, _)| *i);
        let Some((i, terminator)) = found else {
            return Err(self.locator.error(start, "Unterminated comment"));
        };
        let body_end = self.pos + i;
        let comment = self.src[body_start..body_end].to_string();
        self.pos = body_end + terminator.len();
        Ok(Tag {
            kind: TagKind::Comment,
            tokens: Vec::new(),
            body_end,
            comment,
            strip: StripFlags {
                open: strip_open,
                close: terminator.starts_with(&format!("{}~", close)),
            },
            start,
            end: self.pos,
        })
    }

    /// `{{else}}` / `{{^}}` with nothing but whitespace before the close.
    fn at_bare_close(&self) -> bool {
        let rest = self.rest().trim_start();
        rest.starts_with("}}") || rest.starts_with("~}}")
    }

    fn eat_else_keyword(&mut self) -> bool {
        let rest = self.rest().trim_start();
        let Some(after) = rest.strip_prefix("else") else {
            return false;
        };
        match after.chars().next() {
            Some(c) if c.is_whitespace() || c == '~' || c == '}' => {
                self.pos = self.src.len() - after.len();
                true
            }
            _ => false,
        }
    }

    fn scan_tokens(&mut self, triple: bool) -> Result<(Vec<Token>, usize, bool), CompileError> {
        // A triple stash strips with `}~}}`, the `~` going inside the outer braces.
        let (close, strip_close) = if triple { ("}}}", "}~}}") } else { ("}}", "~}}") };
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace();
            let body_end = self.pos;
            if self.eat(strip_close) {
                return Ok((tokens, body_end, true));
            }
            if self.eat(close) {
                return Ok((tokens, body_end, false));
            }
            if self.pos >= self.src.len() {
                return Err(self
                    .locator
                    .error(self.pos, "Expecting 'CLOSE', got 'EOF'"));
            }
            tokens.push(self.scan_token()?);
        }
    }

    fn scan_token(&mut self) -> Result<Token, CompileError> {
        let start = self.pos;
        let c = self.peek_char().unwrap_or_default();
        let tok = match c {
            '(' => {
                self.pos += 1;
                Tok::OpenSexpr
            }
            ')' => {
                self.pos += 1;
                Tok::CloseSexpr
            }
            '=' => {
                self.pos += 1;
                Tok::Equals
            }
            '@' => {
                self.pos += 1;
                Tok::Data
            }
            '|' => {
                self.pos += 1;
                Tok::Pipe
            }
            '/' => {
                self.pos += 1;
                Tok::Sep('/')
            }
            '"' | '\'' => self.scan_string(c)?,
            '[' => {
                let Some(i) = self.rest().find(']') else {
                    return Err(self.locator.error(start, "Unterminated literal segment"));
                };
                let name = self.rest()[1..i].to_string();
                self.pos += i + 1;
                Tok::Id {
                    name,
                    literal: true,
                }
            }
            '.' if self.rest().starts_with("..") => {
                self.pos += 2;
                Tok::Id {
                    name: "..".to_string(),
                    literal: false,
                }
            }
            '.' => {
                self.pos += 1;
                match self.peek_char() {
                    None => Tok::Id { name: ".".to_string(), literal: false },
                    Some(next) if is_path_lookahead(next) => Tok::Id {
                        name: ".".to_string(),
                        literal: false,
                    },
                    Some(_) => Tok::Sep('.'),
                }
            }
            _ => self.scan_word()?,
        };
        Ok(Token {
            tok,
            start,
            end: self.pos,
        })
    }

    fn scan_string(&mut self, quote: char) -> Result<Tok, CompileError> {
        let start = self.pos;
        self.pos += 1;
        let mut value = String::new();
        loop {
            let Some(c) = self.peek_char() else {
                return Err(self.locator.error(start, "Unterminated string literal"));
            };
            self.pos += c.len_utf8();
            if c == '\\' && self.peek_char() == Some(quote) {
                value.push(quote);
                self.pos += quote.len_utf8();
            } else if c == quote {
                return Ok(Tok::String(value));
            } else {
                value.push(c);
            }
        }
    }

    /// Numbers, keyword literals, block params and plain identifiers.
    fn scan_word(&mut self) -> Result<Tok, CompileError> {
        let start = self.pos;
        if let Some(m) = NUMBER_RE.find(self.rest()) {
            let after = self.rest()[m.end()..].chars().next();
            if after.map_or(true, is_literal_lookahead) {
                self.pos += m.end();
                let value = m
                    .as_str()
                    .parse::<f64>()
                    .map_err(|e| self.locator.error(start, e.to_string()))?;
                return Ok(Tok::Number(value));
            }
        }
        if let Some(m) = BLOCK_PARAMS_RE.find(self.rest()) {
            self.pos += m.end();
            return Ok(Tok::OpenBlockParams);
        }

        let len: usize = self
            .rest()
            .chars()
            .take_while(|c| is_id_char(*c))
            .map(char::len_utf8)
            .sum();
        if len == 0 {
            let c = self.peek_char().unwrap_or_default();
            return Err(self
                .locator
                .error(start, format!("Invalid character '{}' in expression", c)));
        }
        let word = &self.rest()[..len];
        self.pos += len;

        let keyword_allowed = self.peek_char().map_or(true, is_literal_lookahead);
        Ok(match word {
            "true" if keyword_allowed => Tok::Boolean(true),
            "false" if keyword_allowed => Tok::Boolean(false),
            "undefined" if keyword_allowed => Tok::Undefined,
            "null" if keyword_allowed => Tok::Null,
            _ => Tok::Id {
                name: word.to_string(),
                literal: false,
            },
        })
    }
}

fn is_id_char(c: char) -> bool {
    !(c.is_whitespace()
        || matches!(
            c,
            '!' | '"' | '#' | '%'..=',' | '.' | '/' | ';'..='>' | '@' | '['..='^' | '`' | '{'..='~'
        ))
}

fn is_path_lookahead(c: char) -> bool {
    c.is_whitespace() || matches!(c, '=' | '~' | '}' | '/' | '.' | ')' | '|')
}

fn is_literal_lookahead(c: char) -> bool {
    c.is_whitespace() || matches!(c, '~' | '}' | ')')
}

/// Recursive descent over one tag's tokens.
struct ExprParser<'t, 'l, 'a> {
    tokens: &'t [Token],
    pos: usize,
    locator: &'l Locator<'a>,
    /// Offset used for errors once the tokens run out.
    end: usize,
}

type Call = (Expression, Vec<Expression>, Option<Hash>);

impl<'t, 'l, 'a> ExprParser<'t, 'l, 'a> {
    fn new(tag: &'t Tag, locator: &'l Locator<'a>) -> Self {
        Self {
            tokens: &tag.tokens,
            pos: 0,
            locator,
            end: tag.body_end,
        }
    }

    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn peek_tok(&self) -> Option<&'t Tok> {
        self.peek().map(|t| &t.tok)
    }

    fn next(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn unexpected(&self, expected: &str) -> CompileError {
        match self.peek() {
            Some(token) => self.locator.error(
                token.start,
                format!("Expecting {}, got {}", expected, token.tok.describe()),
            ),
            None => self
                .locator
                .error(self.end, format!("Expecting {}, got 'CLOSE'", expected)),
        }
    }

    fn expect_end(&self) -> Result<(), CompileError> {
        match self.peek() {
            None => Ok(()),
            Some(_) => Err(self.unexpected("'CLOSE'")),
        }
    }

    fn at_hash_pair(&self) -> bool {
        matches!(self.peek_tok(), Some(Tok::Id { .. }))
            && matches!(self.tokens.get(self.pos + 1).map(|t| &t.tok), Some(Tok::Equals))
    }

    /// `helperName param* hash?`
    fn call(&mut self) -> Result<Call, CompileError> {
        let path = self.helper_name()?;
        let params = self.params()?;
        let hash = self.hash()?;
        Ok((path, params, hash))
    }

    /// Like [`Self::call`] but the name may itself be a sub-expression.
    fn partial_call(&mut self) -> Result<Call, CompileError> {
        let name = self.param()?;
        let params = self.params()?;
        let hash = self.hash()?;
        Ok((name, params, hash))
    }

    fn params(&mut self) -> Result<Vec<Expression>, CompileError> {
        let mut params = Vec::new();
        while let Some(tok) = self.peek_tok() {
            if matches!(tok, Tok::CloseSexpr | Tok::OpenBlockParams) || self.at_hash_pair() {
                break;
            }
            params.push(self.param()?);
        }
        Ok(params)
    }

    fn param(&mut self) -> Result<Expression, CompileError> {
        match self.peek_tok() {
            Some(Tok::OpenSexpr) => self.sexpr(),
            _ => self.helper_name(),
        }
    }

    fn hash(&mut self) -> Result<Option<Hash>, CompileError> {
        let mut pairs = Vec::new();
        let start = self.peek().map(|t| t.start);
        while self.at_hash_pair() {
            let key_token = self.next().unwrap_or_else(|| unreachable!());
            let Tok::Id { name, .. } = &key_token.tok else {
                unreachable!("hash pair must start with an id")
            };
            self.next();
            let value = self.param()?;
            let end = self.tokens[self.pos - 1].end;
            pairs.push(HashPair {
                key: name.clone(),
                value,
                loc: self.locator.loc(key_token.start, end),
            });
        }
        match (start, pairs.is_empty()) {
            (Some(start), false) => {
                let end = self.tokens[self.pos - 1].end;
                Ok(Some(Hash {
                    pairs,
                    loc: self.locator.loc(start, end),
                }))
            }
            _ => Ok(None),
        }
    }

    fn block_params(&mut self) -> Result<Vec<String>, CompileError> {
        if !matches!(self.peek_tok(), Some(Tok::OpenBlockParams)) {
            return Ok(Vec::new());
        }
        self.next();
        let mut names = Vec::new();
        loop {
            match self.peek_tok() {
                Some(Tok::Id { name, .. }) => {
                    names.push(name.clone());
                    self.next();
                }
                Some(Tok::Pipe) => {
                    self.next();
                    return Ok(names);
                }
                _ => return Err(self.unexpected("'ID' or '|'")),
            }
        }
    }

    fn sexpr(&mut self) -> Result<Expression, CompileError> {
        let open = self.next().ok_or_else(|| self.unexpected("'('"))?;
        let (path, params, hash) = self.call()?;
        match self.next() {
            Some(Token {
                tok: Tok::CloseSexpr,
                end,
                ..
            }) => Ok(Expression::SubExpression(SubExpression {
                path: Box::new(path),
                params,
                hash,
                loc: self.locator.loc(open.start, *end),
            })),
            _ => {
                self.pos -= 1;
                Err(self.unexpected("')'"))
            }
        }
    }

    fn helper_name(&mut self) -> Result<Expression, CompileError> {
        let Some(token) = self.peek() else {
            return Err(self.unexpected("'ID'"));
        };
        let loc = self.locator.loc(token.start, token.end);
        let expr = match &token.tok {
            Tok::Data => {
                self.next();
                return self.path(true, token.start);
            }
            Tok::Id { .. } => return self.path(false, token.start),
            Tok::String(value) => Expression::String(StringLiteral {
                value: value.clone(),
                original: self.locator.src[token.start..token.end].to_string(),
                loc,
            }),
            Tok::Number(value) => Expression::Number(NumberLiteral {
                value: *value,
                original: self.locator.src[token.start..token.end].to_string(),
                loc,
            }),
            Tok::Boolean(value) => Expression::Boolean(BooleanLiteral { value: *value, loc }),
            Tok::Undefined => Expression::Undefined(loc),
            Tok::Null => Expression::Null(loc),
            _ => return Err(self.unexpected("'ID'")),
        };
        self.next();
        Ok(expr)
    }

    /// `ID (SEP ID)*`, then folds `this`, `.` and `..` into the path flags.
    fn path(&mut self, data: bool, start: usize) -> Result<Expression, CompileError> {
        let mut segments: Vec<(Option<char>, &'t str, bool)> = Vec::new();
        let mut sep = None;
        let mut end = start;
        loop {
            match self.next() {
                Some(Token {
                    tok: Tok::Id { name, literal },
                    end: token_end,
                    ..
                }) => {
                    segments.push((sep, name.as_str(), *literal));
                    end = *token_end;
                }
                _ => {
                    self.pos -= 1;
                    return Err(self.unexpected("'ID'"));
                }
            }
            match self.peek_tok() {
                Some(Tok::Sep(c)) => {
                    sep = Some(*c);
                    self.next();
                }
                _ => break,
            }
        }

        let mut original = if data { "@".to_string() } else { String::new() };
        let mut parts = Vec::new();
        let mut depth = 0;
        let mut this_scoped = false;
        for (sep, name, literal) in segments {
            if let Some(sep) = sep {
                original.push(sep);
            }
            original.push_str(name);
            if !literal && matches!(name, ".." | "." | "this") {
                if !parts.is_empty() {
                    return Err(self
                        .locator
                        .error(start, format!("Invalid path: {}", original)));
                }
                if name == ".." {
                    depth += 1;
                } else {
                    this_scoped = true;
                }
            } else {
                parts.push(name.to_string());
            }
        }

        Ok(Expression::Path(PathExpression {
            data,
            depth,
            parts,
            original,
            this_scoped,
            loc: self.locator.loc(start, end),
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenKind {
    Block { inverted: bool },
    PartialBlock,
    DecoratorBlock,
}

struct Open {
    kind: OpenKind,
    path: Expression,
    params: Vec<Expression>,
    hash: Option<Hash>,
    block_params: Vec<String>,
    strip: StripFlags,
    start: usize,
}

struct Frame {
    open: Option<Open>,
    program: Vec<Statement>,
    program_start: usize,
    /// Body and start offset of the `{{else}}` section, once one is seen.
    inverse: Option<(Vec<Statement>, usize)>,
    inverse_start_tag: usize,
    inverse_strip: StripFlags,
    /// The `{{else}}` section was opened by `{{else if ...}}`.
    inverse_chained: bool,
    /// Opened by `{{else if ...}}`; closed together with its parent.
    chained: bool,
}

impl Frame {
    fn new(open: Option<Open>, program_start: usize, chained: bool) -> Self {
        Self {
            open,
            program: Vec::new(),
            program_start,
            inverse: None,
            inverse_start_tag: 0,
            inverse_strip: StripFlags::default(),
            inverse_chained: false,
            chained,
        }
    }

    fn body(&mut self) -> &mut Vec<Statement> {
        match &mut self.inverse {
            Some((body, _)) => body,
            None => &mut self.program,
        }
    }
}

struct TreeBuilder<'l, 'a> {
    locator: &'l Locator<'a>,
    stack: Vec<Frame>,
}

impl<'l, 'a> TreeBuilder<'l, 'a> {
    fn new(locator: &'l Locator<'a>) -> Self {
        Self {
            locator,
            stack: vec![Frame::new(None, 0, false)],
        }
    }

    fn top(&mut self) -> &mut Frame {
        self.stack
            .last_mut()
            .unwrap_or_else(|| unreachable!("root frame is never popped"))
    }

    fn build(mut self, items: Vec<Item>, len: usize) -> Result<Program, CompileError> {
        for item in items {
            match item {
                Item::Content {
                    value,
                    original,
                    start,
                    end,
                } => {
                    let loc = self.locator.loc(start, end);
                    self.top().body().push(Statement::Content(ContentStatement {
                        value,
                        original,
                        left_stripped: false,
                        right_stripped: false,
                        loc,
                    }));
                }
                Item::Tag(tag) => self.tag(tag)?,
            }
        }

        if self.stack.len() > 1 {
            let frame = self.stack.pop().unwrap_or_else(|| unreachable!());
            let open = frame.open.unwrap_or_else(|| unreachable!());
            return Err(self.locator.error(
                open.start,
                format!("Unclosed block {}", close_name(&open.path)),
            ));
        }
        let root = self.stack.pop().unwrap_or_else(|| unreachable!());
        Ok(Program {
            body: root.program,
            block_params: Vec::new(),
            chained: false,
            loc: self.locator.loc(0, len),
        })
    }

    fn tag(&mut self, tag: Tag) -> Result<(), CompileError> {
        let loc = self.locator.loc(tag.start, tag.end);
        match tag.kind {
            TagKind::Comment => {
                let value = tag.comment.clone();
                self.top().body().push(Statement::Comment(CommentStatement {
                    value,
                    strip: tag.strip,
                    loc,
                }));
            }
            TagKind::Mustache { escaped } => {
                let mut parser = ExprParser::new(&tag, self.locator);
                let (path, params, hash) = parser.call()?;
                parser.expect_end()?;
                self.top().body().push(Statement::Mustache(MustacheStatement {
                    path,
                    params,
                    hash,
                    escaped,
                    strip: tag.strip,
                    loc,
                }));
            }
            TagKind::Partial => {
                let mut parser = ExprParser::new(&tag, self.locator);
                let (name, params, hash) = parser.partial_call()?;
                parser.expect_end()?;
                self.top().body().push(Statement::Partial(PartialStatement {
                    name,
                    params,
                    hash,
                    indent: String::new(),
                    strip: tag.strip,
                    loc,
                }));
            }
            TagKind::Decorator => {
                let mut parser = ExprParser::new(&tag, self.locator);
                let (path, params, hash) = parser.call()?;
                parser.expect_end()?;
                self.top().body().push(Statement::Decorator(DecoratorStatement {
                    path,
                    params,
                    hash,
                    strip: tag.strip,
                    loc,
                }));
            }
            TagKind::BlockOpen => self.open(&tag, OpenKind::Block { inverted: false }, false)?,
            TagKind::InverseOpen => self.open(&tag, OpenKind::Block { inverted: true }, false)?,
            TagKind::PartialBlockOpen => self.open(&tag, OpenKind::PartialBlock, false)?,
            TagKind::DecoratorBlockOpen => self.open(&tag, OpenKind::DecoratorBlock, false)?,
            TagKind::Else => self.begin_inverse(&tag)?,
            TagKind::ElseChain => {
                self.begin_inverse(&tag)?;
                self.top().inverse_chained = true;
                self.open(&tag, OpenKind::Block { inverted: false }, true)?;
            }
            TagKind::Close => self.close(&tag)?,
        }
        Ok(())
    }

    fn open(&mut self, tag: &Tag, kind: OpenKind, chained: bool) -> Result<(), CompileError> {
        let mut parser = ExprParser::new(tag, self.locator);
        let (path, params, hash) = match kind {
            OpenKind::PartialBlock => parser.partial_call()?,
            _ => parser.call()?,
        };
        let block_params = parser.block_params()?;
        parser.expect_end()?;
        let open = Open {
            kind,
            path,
            params,
            hash,
            block_params,
            strip: tag.strip,
            start: tag.start,
        };
        self.stack.push(Frame::new(Some(open), tag.end, chained));
        Ok(())
    }

    fn begin_inverse(&mut self, tag: &Tag) -> Result<(), CompileError> {
        let frame = self.top();
        let in_block = matches!(
            frame.open.as_ref().map(|o| o.kind),
            Some(OpenKind::Block { .. })
        );
        if !in_block || frame.inverse.is_some() {
            return Err(self.locator.error(tag.start, "Unexpected {{else}}"));
        }
        frame.inverse = Some((Vec::new(), tag.end));
        frame.inverse_start_tag = tag.start;
        frame.inverse_strip = tag.strip;
        Ok(())
    }

    fn close(&mut self, tag: &Tag) -> Result<(), CompileError> {
        let mut parser = ExprParser::new(tag, self.locator);
        let close_path = parser.helper_name()?;
        parser.expect_end()?;
        let close = close_name(&close_path);

        loop {
            if self.stack.len() < 2 {
                return Err(self
                    .locator
                    .error(tag.start, format!("Unexpected close block {}", close)));
            }
            let frame = self.stack.pop().unwrap_or_else(|| unreachable!());
            let chained = frame.chained;
            if !chained {
                let open_name = frame
                    .open
                    .as_ref()
                    .map(|o| close_name(&o.path))
                    .unwrap_or_default();
                if open_name != close {
                    return Err(self
                        .locator
                        .error(tag.start, format!("{} doesn't match {}", open_name, close)));
                }
            }
            let statement = self.finish(frame, tag)?;
            self.top().body().push(statement);
            if !chained {
                return Ok(());
            }
        }
    }

    fn finish(&self, frame: Frame, close: &Tag) -> Result<Statement, CompileError> {
        let open = frame.open.unwrap_or_else(|| unreachable!("root frame has no open tag"));
        let loc = self.locator.loc(open.start, close.end);
        let program_end = match frame.inverse {
            Some(_) => frame.inverse_start_tag,
            None => close.start,
        };
        let program = Program {
            body: frame.program,
            block_params: open.block_params,
            chained: false,
            loc: self.locator.loc(frame.program_start, program_end),
        };
        let inverse = frame.inverse.map(|(body, start)| Program {
            body,
            block_params: Vec::new(),
            chained: frame.inverse_chained,
            loc: self.locator.loc(start, close.start),
        });

        Ok(match open.kind {
            OpenKind::Block { inverted } => {
                let (program, inverse) = if inverted {
                    (inverse, Some(program))
                } else {
                    (Some(program), inverse)
                };
                Statement::Block(BlockStatement {
                    path: open.path,
                    params: open.params,
                    hash: open.hash,
                    program,
                    inverse,
                    open_strip: open.strip,
                    inverse_strip: frame.inverse_strip,
                    close_strip: close.strip,
                    loc,
                })
            }
            OpenKind::PartialBlock => Statement::PartialBlock(PartialBlockStatement {
                name: open.path,
                params: open.params,
                hash: open.hash,
                program,
                open_strip: open.strip,
                close_strip: close.strip,
                loc,
            }),
            OpenKind::DecoratorBlock => Statement::DecoratorBlock(DecoratorBlock {
                path: open.path,
                params: open.params,
                hash: open.hash,
                program,
                open_strip: open.strip,
                close_strip: close.strip,
                loc,
            }),
        })
    }
}

/// The text a close tag must repeat to match an open tag.
fn close_name(expr: &Expression) -> String {
    match expr {
        Expression::Path(path) => path.original.clone(),
        Expression::String(s) => s.value.clone(),
        Expression::Number(n) => n.original.clone(),
        Expression::SubExpression(sexpr) => close_name(&sexpr.path),
        Expression::Boolean(b) => b.value.to_string(),
        Expression::Undefined(_) => "undefined".to_string(),
        Expression::Null(_) => "null".to_string(),
    }
}
