//! JavaScript generation for precompiled templates.
//!
//! # Output shape
//!
//! The result is an object literal the Handlebars runtime accepts in
//! `Handlebars.template(...)`:
//!
//! ```text
//! {"1":function(container,depth0,helpers,partials,data) {...},
//!  "compiler":[8,">= 4.3.0"],
//!  "main":function(container,depth0,helpers,partials,data) {...},
//!  "main_d":function(fn, props, container, depth0, data, blockParams, depths) {...},
//!  "useDecorators":true,"usePartial":true,"useData":true}
//! ```
//!
//! Every block body becomes a numbered program. Each program function returns
//! one string concatenation with one operand per statement. Numbered keys come
//! first because that is the order a JavaScript engine enumerates them in.
//!
//! # Source maps
//!
//! Code is assembled from fragments that remember the template position they
//! came from. The writer records a mapping at the start of every mapped
//! fragment, and every program header is mapped, so the first generated line
//! always carries a segment.

use super::ast::*;
use super::{CompileError, CompileOptions};
use itertools::Itertools;
use serde_json::Value;
use sourcemap::{SourceMap, SourceMapBuilder};
use std::borrow::Cow;

const COMPILER_REVISION: u32 = 8;
const REVISION_CHANGES: &str = ">= 4.3.0";

/// Helpers the runtime always registers.
const BUILTIN_HELPERS: &[&str] = &[
    "blockHelperMissing",
    "each",
    "helperMissing",
    "if",
    "log",
    "lookup",
    "unless",
    "with",
];

const LOOKUP_PROPERTY: &str = "lookupProperty = container.lookupProperty || function(parent, propertyName) {
        if (Object.prototype.hasOwnProperty.call(parent, propertyName)) {
          return parent[propertyName];
        }
        return undefined
    }";

const CONTEXT_ALIAS: &str = "alias1=depth0 != null ? depth0 : (container.nullContext || {})";

pub fn generate(
    program: &Program,
    options: &CompileOptions,
) -> Result<(String, Option<SourceMap>), CompileError> {
    let mut usage = Usage::default();
    usage.program(program);

    let mut generator = Generator {
        options,
        use_data: options.data.unwrap_or(true),
        use_depths: usage.depths,
        use_block_params: usage.block_params,
        use_partial: false,
        use_decorators: false,
        children: Vec::new(),
        block_params: Vec::new(),
    };
    let main = generator.compile_program(program)?;

    let mut writer = Writer::new(options.src_name.as_deref(), options.dest_name.as_deref());
    generator.assemble(&mut writer, &main);

    let Writer { code, map, source, .. } = writer;
    Ok((code, source.map(|_| map.into_sourcemap())))
}

/// Template features that change program signatures, found before codegen.
#[derive(Default)]
struct Usage {
    depths: bool,
    block_params: bool,
}

impl Usage {
    fn program(&mut self, program: &Program) {
        if !program.block_params.is_empty() {
            self.block_params = true;
        }
        program.body.iter().for_each(|s| self.statement(s));
    }

    fn statement(&mut self, statement: &Statement) {
        match statement {
            Statement::Mustache(m) => self.call(&m.path, &m.params, &m.hash),
            Statement::Block(b) => {
                self.call(&b.path, &b.params, &b.hash);
                b.program.iter().chain(&b.inverse).for_each(|p| self.program(p));
            }
            Statement::Partial(p) => self.call(&p.name, &p.params, &p.hash),
            Statement::PartialBlock(p) => {
                self.call(&p.name, &p.params, &p.hash);
                self.program(&p.program);
            }
            Statement::Decorator(d) => self.call(&d.path, &d.params, &d.hash),
            Statement::DecoratorBlock(d) => {
                self.call(&d.path, &d.params, &d.hash);
                self.program(&d.program);
            }
            Statement::Content(_) | Statement::Comment(_) => {}
        }
    }

    fn call(&mut self, path: &Expression, params: &[Expression], hash: &Option<Hash>) {
        self.expression(path);
        params.iter().for_each(|p| self.expression(p));
        if let Some(hash) = hash {
            hash.pairs.iter().for_each(|pair| self.expression(&pair.value));
        }
    }

    fn expression(&mut self, expr: &Expression) {
        match expr {
            Expression::Path(path) if path.depth > 0 => self.depths = true,
            Expression::SubExpression(s) => self.call(&s.path, &s.params, &s.hash),
            _ => {}
        }
    }
}

struct Fragment {
    text: String,
    origin: Position,
}

struct CompiledProgram {
    origin: Position,
    parts: Vec<Fragment>,
    decorators: Vec<Fragment>,
}

/// The `fn`/`inverse` programs of a block call.
struct Blocks {
    program: String,
    inverse: String,
    block_params: usize,
}

enum CallKind {
    Helper,
    Ambiguous,
    Simple,
}

struct Generator<'o> {
    options: &'o CompileOptions,
    use_data: bool,
    use_depths: bool,
    use_block_params: bool,
    use_partial: bool,
    use_decorators: bool,
    children: Vec<Option<CompiledProgram>>,
    /// Declared block params per enclosing program, outermost first.
    block_params: Vec<Vec<String>>,
}

impl Generator<'_> {
    fn compile_program(&mut self, program: &Program) -> Result<CompiledProgram, CompileError> {
        self.block_params.push(program.block_params.clone());
        let compiled = self.compile_body(program);
        self.block_params.pop();
        compiled
    }

    fn compile_body(&mut self, program: &Program) -> Result<CompiledProgram, CompileError> {
        let mut parts = Vec::new();
        let mut decorators = Vec::new();
        for statement in &program.body {
            let origin = statement.loc().start;
            let text = match statement {
                Statement::Content(c) if c.value.is_empty() => continue,
                Statement::Content(c) => js_string(&c.value),
                Statement::Comment(_) => continue,
                Statement::Mustache(m) => self.mustache(m)?,
                Statement::Block(b) => self.block(b)?,
                Statement::Partial(p) => {
                    // With preventIndent the indent is written once, as plain content.
                    let indent = if self.options.prevent_indent && !p.indent.is_empty() {
                        parts.push(Fragment {
                            text: js_string(&p.indent),
                            origin,
                        });
                        ""
                    } else {
                        p.indent.as_str()
                    };
                    self.partial(&p.name, &p.params, &p.hash, indent, None, &p.loc)?
                }
                Statement::PartialBlock(p) => {
                    self.partial(&p.name, &p.params, &p.hash, "", Some(&p.program), &p.loc)?
                }
                Statement::Decorator(d) => {
                    let text = self.decorator(&d.path, &d.params, &d.hash, None, &d.loc)?;
                    decorators.push(Fragment { text, origin });
                    continue;
                }
                Statement::DecoratorBlock(d) => {
                    let text =
                        self.decorator(&d.path, &d.params, &d.hash, Some(&d.program), &d.loc)?;
                    decorators.push(Fragment { text, origin });
                    continue;
                }
            };
            parts.push(Fragment { text, origin });
        }
        Ok(CompiledProgram {
            origin: program.loc.start,
            parts,
            decorators,
        })
    }

    /// Compiles `program` as a numbered child and returns the expression that
    /// instantiates it at runtime.
    fn child(&mut self, program: &Program) -> Result<String, CompileError> {
        let index = self.children.len() + 1;
        self.children.push(None);
        let compiled = self.compile_program(program)?;
        self.children[index - 1] = Some(compiled);

        let mut args = vec![
            index.to_string(),
            "data".to_string(),
            program.block_params.len().to_string(),
        ];
        if self.use_block_params || self.use_depths {
            args.push("blockParams".to_string());
        }
        if self.use_depths {
            args.push("depths".to_string());
        }
        Ok(format!("container.program({})", args.join(", ")))
    }

    fn is_known_helper(&self, name: &str) -> bool {
        match self.options.known_helpers.get(name) {
            Some(known) => *known,
            None => BUILTIN_HELPERS.contains(&name),
        }
    }

    /// Position of a block param as `(program depth, index)`, innermost first.
    fn block_param_index(&self, name: &str) -> Option<(usize, usize)> {
        self.block_params
            .iter()
            .rev()
            .enumerate()
            .find_map(|(depth, params)| {
                params
                    .iter()
                    .position(|p| p == name)
                    .map(|index| (depth, index))
            })
    }

    fn classify(&self, path: &PathExpression, has_args: bool) -> CallKind {
        let simple = path.is_simple();
        if simple && !path.data && self.block_param_index(&path.parts[0]).is_some() {
            return CallKind::Simple;
        }
        if has_args || (simple && self.is_known_helper(&path.parts[0])) {
            CallKind::Helper
        } else if simple && !self.options.known_helpers_only {
            CallKind::Ambiguous
        } else {
            CallKind::Simple
        }
    }

    /// Resolves a path against the context stack, data or block params.
    fn lookup(&self, path: &PathExpression) -> String {
        let mut parts = path.parts.as_slice();
        let base = if path.data {
            match path.depth {
                0 => "data".to_string(),
                depth => format!("container.data(data, {})", depth),
            }
        } else if path.depth > 0 {
            format!("depths[{}]", path.depth)
        } else {
            let block_param = match parts.first() {
                Some(first) if !path.this_scoped => self.block_param_index(first),
                _ => None,
            };
            match block_param {
                Some((depth, index)) => {
                    parts = &parts[1..];
                    format!("blockParams[{}][{}]", depth, index)
                }
                None => "depth0".to_string(),
            }
        };

        let Some((first, rest)) = parts.split_first() else {
            return base;
        };
        let head = format!(
            "({base} != null ? lookupProperty({base},{}) : {base})",
            js_string(first)
        );
        rest.iter().fold(head, |acc, part| {
            format!(
                "((stack1 = {}) != null ? lookupProperty(stack1,{}) : stack1)",
                acc,
                js_string(part)
            )
        })
    }

    fn param(&mut self, expr: &Expression) -> Result<String, CompileError> {
        Ok(match expr {
            Expression::Path(path) => self.lookup(path),
            Expression::SubExpression(sexpr) => {
                let path = helper_path(&sexpr.path)?;
                self.invoke_helper(&path, &sexpr.params, &sexpr.hash, None, &sexpr.loc)?
            }
            Expression::String(s) => js_string(&s.value),
            Expression::Number(n) => n.original.clone(),
            Expression::Boolean(b) => b.value.to_string(),
            Expression::Undefined(_) => "undefined".to_string(),
            Expression::Null(_) => "null".to_string(),
        })
    }

    fn hash_object(&mut self, hash: &Option<Hash>) -> Result<String, CompileError> {
        let pairs = match hash {
            Some(hash) => hash
                .pairs
                .iter()
                .map(|pair| Ok(format!("{}:{}", js_string(&pair.key), self.param(&pair.value)?)))
                .collect::<Result<Vec<_>, CompileError>>()?,
            None => Vec::new(),
        };
        Ok(format!("{{{}}}", pairs.join(",")))
    }

    fn options_object(
        &mut self,
        name: &str,
        hash: &Option<Hash>,
        blocks: Option<&Blocks>,
        loc: &SourceLocation,
    ) -> Result<String, CompileError> {
        let mut fields = vec![
            format!("\"name\":{}", js_string(name)),
            format!("\"hash\":{}", self.hash_object(hash)?),
        ];
        if let Some(blocks) = blocks {
            fields.push(format!("\"fn\":{}", blocks.program));
            fields.push(format!("\"inverse\":{}", blocks.inverse));
        }
        if self.use_data {
            fields.push("\"data\":data".to_string());
        }
        if let Some(blocks) = blocks.filter(|b| b.block_params > 0) {
            fields.push(format!("\"blockParams\":{}", blocks.block_params));
        }
        fields.push(format!("\"loc\":{}", loc_json(loc)));
        Ok(format!("{{{}}}", fields.join(",")))
    }

    fn invoke_helper(
        &mut self,
        path: &PathExpression,
        params: &[Expression],
        hash: &Option<Hash>,
        blocks: Option<&Blocks>,
        loc: &SourceLocation,
    ) -> Result<String, CompileError> {
        let name = path.parts.first().map(String::as_str).unwrap_or_default();
        let known = path.is_simple() && self.is_known_helper(name);
        if !known && self.options.known_helpers_only {
            return Err(CompileError::UnknownHelper {
                name: path.original.clone(),
                line: loc.start.line,
                column: loc.start.column,
            });
        }

        let mut args = vec!["alias1".to_string()];
        for param in params {
            args.push(self.param(param)?);
        }
        args.push(self.options_object(&path.original, hash, blocks, loc)?);
        let args = args.join(",");

        if known {
            return Ok(format!(
                "lookupProperty(helpers,{}).call({})",
                js_string(name),
                args
            ));
        }
        let mut candidates = Vec::new();
        if path.is_simple() {
            candidates.push(format!("lookupProperty(helpers,{})", js_string(name)));
        }
        candidates.push(self.lookup(path));
        candidates.push("container.hooks.helperMissing".to_string());
        Ok(format!("({}).call({})", candidates.iter().join(" || "), args))
    }

    fn mustache(&mut self, m: &MustacheStatement) -> Result<String, CompileError> {
        let path = helper_path(&m.path)?;
        let has_args = !m.params.is_empty() || m.hash.is_some();
        let value = match self.classify(&path, has_args) {
            CallKind::Helper => self.invoke_helper(&path, &m.params, &m.hash, None, &m.loc)?,
            CallKind::Ambiguous => {
                let name = &path.parts[0];
                let options = self.options_object(name, &None, None, &m.loc)?;
                format!(
                    "((helper = (helper = lookupProperty(helpers,{}) || {}) != null ? helper : container.hooks.helperMissing),(typeof helper === \"function\" ? helper.call(alias1,{}) : helper))",
                    js_string(name),
                    self.lookup(&path),
                    options
                )
            }
            CallKind::Simple => format!("container.lambda({}, depth0)", self.lookup(&path)),
        };
        Ok(if m.escaped && !self.options.no_escape {
            format!("container.escapeExpression({})", value)
        } else {
            format!("((stack1 = {}) != null ? stack1 : \"\")", value)
        })
    }

    fn block(&mut self, b: &BlockStatement) -> Result<String, CompileError> {
        let path = helper_path(&b.path)?;
        let program = match &b.program {
            Some(program) => self.child(program)?,
            None => "container.noop".to_string(),
        };
        let inverse = match &b.inverse {
            Some(inverse) => self.child(inverse)?,
            None => "container.noop".to_string(),
        };
        let blocks = Blocks {
            program,
            inverse,
            block_params: b.program.as_ref().map_or(0, |p| p.block_params.len()),
        };

        let has_args = !b.params.is_empty() || b.hash.is_some();
        let value = match self.classify(&path, has_args) {
            CallKind::Helper => {
                self.invoke_helper(&path, &b.params, &b.hash, Some(&blocks), &b.loc)?
            }
            CallKind::Ambiguous => {
                // A helper wins; otherwise the context value goes through
                // blockHelperMissing, which handles lists and booleans.
                let name = &path.parts[0];
                let helper = format!("lookupProperty(helpers,{})", js_string(name));
                let options = self.options_object(name, &None, Some(&blocks), &b.loc)?;
                return Ok(format!(
                    "(stack1 = ((helper = (helper = {helper} || {}) != null ? helper : container.hooks.helperMissing),(options={}),(typeof helper === \"function\" ? helper.call(alias1,options) : helper)),(!{helper} ? (stack1 = container.hooks.blockHelperMissing.call(depth0,stack1,options)) : stack1),(stack1 != null ? stack1 : \"\"))",
                    self.lookup(&path),
                    options,
                ));
            }
            CallKind::Simple => {
                let options = self.options_object(&path.original, &None, Some(&blocks), &b.loc)?;
                format!(
                    "container.hooks.blockHelperMissing.call(depth0,container.lambda({}, depth0),{})",
                    self.lookup(&path),
                    options
                )
            }
        };
        Ok(format!("((stack1 = {}) != null ? stack1 : \"\")", value))
    }

    fn partial(
        &mut self,
        name: &Expression,
        params: &[Expression],
        hash: &Option<Hash>,
        indent: &str,
        program: Option<&Program>,
        loc: &SourceLocation,
    ) -> Result<String, CompileError> {
        if params.len() > 1 {
            return Err(CompileError::Invalid {
                message: format!("Unsupported number of partial arguments: {}", params.len()),
                line: loc.start.line,
                column: loc.start.column,
            });
        }
        self.use_partial = true;

        let (partial, static_name) = match name {
            Expression::Path(path) if path.original == "@partial-block" => {
                ("undefined".to_string(), Some(path.original.clone()))
            }
            Expression::Path(path) => (
                format!("lookupProperty(partials,{})", js_string(&path.original)),
                Some(path.original.clone()),
            ),
            Expression::SubExpression(_) => (self.param(name)?, None),
            Expression::String(s) => (
                format!("lookupProperty(partials,{})", js_string(&s.value)),
                Some(s.value.clone()),
            ),
            other => {
                let text = literal_text(other);
                (
                    format!("lookupProperty(partials,{})", js_string(&text)),
                    Some(text),
                )
            }
        };
        let context = match params.first() {
            Some(param) => self.param(param)?,
            None => "depth0".to_string(),
        };

        let mut fields = Vec::new();
        if let Some(name) = static_name {
            fields.push(format!("\"name\":{}", js_string(&name)));
        }
        if hash.is_some() {
            fields.push(format!("\"hash\":{}", self.hash_object(hash)?));
        }
        if let Some(program) = program {
            fields.push(format!("\"fn\":{}", self.child(program)?));
            fields.push("\"inverse\":container.noop".to_string());
        }
        if self.use_data {
            fields.push("\"data\":data".to_string());
        }
        if !indent.is_empty() {
            fields.push(format!("\"indent\":{}", js_string(indent)));
        }
        fields.push("\"helpers\":helpers".to_string());
        fields.push("\"partials\":partials".to_string());
        fields.push("\"decorators\":container.decorators".to_string());

        Ok(format!(
            "((stack1 = container.invokePartial({},{},{{{}}})) != null ? stack1 : \"\")",
            partial,
            context,
            fields.join(",")
        ))
    }

    fn decorator(
        &mut self,
        path: &Expression,
        params: &[Expression],
        hash: &Option<Hash>,
        program: Option<&Program>,
        loc: &SourceLocation,
    ) -> Result<String, CompileError> {
        self.use_decorators = true;
        let path = helper_path(path)?;
        let blocks = match program {
            Some(program) => Some(Blocks {
                program: self.child(program)?,
                inverse: "container.noop".to_string(),
                block_params: 0,
            }),
            None => None,
        };

        let mut fields = vec![
            format!("\"name\":{}", js_string(&path.original)),
            format!("\"hash\":{}", self.hash_object(hash)?),
        ];
        if let Some(blocks) = &blocks {
            fields.push(format!("\"fn\":{}", blocks.program));
            fields.push(format!("\"inverse\":{}", blocks.inverse));
        }
        let args = params
            .iter()
            .map(|p| self.param(p))
            .collect::<Result<Vec<_>, _>>()?;
        fields.push(format!("\"args\":[{}]", args.join(",")));
        if self.use_data {
            fields.push("\"data\":data".to_string());
        }
        fields.push(format!("\"loc\":{}", loc_json(loc)));

        Ok(format!(
            "lookupProperty(decorators,{})(fn,props,container,{{{}}})",
            js_string(&path.original),
            fields.join(",")
        ))
    }

    fn signature(&self) -> String {
        let mut params = "container,depth0,helpers,partials,data".to_string();
        if self.use_block_params || self.use_depths {
            params.push_str(",blockParams");
        }
        if self.use_depths {
            params.push_str(",depths");
        }
        params
    }

    fn write_function(&self, writer: &mut Writer, program: &CompiledProgram) {
        writer.write_mapped(&format!("function({}) {{\n", self.signature()), program.origin);
        writer.write(&format!(
            "    var stack1, helper, options, {}, {};\n\n  return ",
            CONTEXT_ALIAS, LOOKUP_PROPERTY
        ));
        if program.parts.is_empty() {
            writer.write("\"\"");
        }
        for (i, part) in program.parts.iter().enumerate() {
            if i > 0 {
                writer.write("\n    + ");
            }
            writer.write_mapped(&part.text, part.origin);
        }
        writer.write(";\n}");
    }

    fn write_decorators(&self, writer: &mut Writer, program: &CompiledProgram) {
        writer.write_mapped(
            "function(fn, props, container, depth0, data, blockParams, depths) {\n",
            program.origin,
        );
        writer.write(&format!(
            "    var decorators = container.decorators, helpers = container.helpers, stack1, helper, options, {}, {};\n\n",
            CONTEXT_ALIAS, LOOKUP_PROPERTY
        ));
        for decorator in &program.decorators {
            writer.write("  fn = ");
            writer.write_mapped(&decorator.text, decorator.origin);
            writer.write(" || fn;\n");
        }
        writer.write("  return fn;\n}");
    }

    fn assemble(&self, writer: &mut Writer, main: &CompiledProgram) {
        writer.write("{");
        for (i, child) in self.children.iter().enumerate() {
            if let Some(child) = child {
                writer.write(&format!("\"{}\":", i + 1));
                self.write_function(writer, child);
                writer.write(",");
            }
        }
        writer.write(&format!(
            "\"compiler\":[{},{}],\"main\":",
            COMPILER_REVISION,
            js_string(REVISION_CHANGES)
        ));
        self.write_function(writer, main);

        if !main.decorators.is_empty() {
            writer.write(",\"main_d\":");
            self.write_decorators(writer, main);
        }
        for (i, child) in self.children.iter().enumerate() {
            if let Some(child) = child.as_ref().filter(|c| !c.decorators.is_empty()) {
                writer.write(&format!(",\"{}_d\":", i + 1));
                self.write_decorators(writer, child);
            }
        }

        let flags = [
            ("useDecorators", self.use_decorators),
            ("usePartial", self.use_partial),
            ("useData", self.use_data),
            ("useDepths", self.use_depths),
            ("useBlockParams", self.use_block_params),
        ];
        for (flag, _) in flags.iter().filter(|(_, on)| *on) {
            writer.write(&format!(",\"{}\":true", flag));
        }
        writer.write("}");
    }
}

/// Accumulates generated code and tracks the generated position for
/// mappings. Columns count UTF-16 code units, as source maps require.
/// Tokens are only recorded when there is a source to point them at.
struct Writer<'a> {
    code: String,
    line: u32,
    column: u32,
    source: Option<&'a str>,
    map: SourceMapBuilder,
}

impl<'a> Writer<'a> {
    fn new(source: Option<&'a str>, file: Option<&str>) -> Self {
        Self {
            code: String::new(),
            line: 0,
            column: 0,
            source,
            map: SourceMapBuilder::new(file),
        }
    }

    fn write(&mut self, text: &str) {
        for c in text.chars() {
            if c == '\n' {
                self.line += 1;
                self.column = 0;
            } else {
                self.column += c.len_utf16() as u32;
            }
        }
        self.code.push_str(text);
    }

    fn write_mapped(&mut self, text: &str, origin: Position) {
        if let Some(source) = self.source {
            self.map.add(
                self.line,
                self.column,
                origin.line.saturating_sub(1),
                origin.column,
                Some(source),
                None,
                false,
            );
        }
        self.write(text);
    }
}

/// Literal helper names (`{{"foo" bar}}`) are looked up like simple ids.
fn helper_path(expr: &Expression) -> Result<Cow<'_, PathExpression>, CompileError> {
    match expr {
        Expression::Path(path) => Ok(Cow::Borrowed(path)),
        Expression::SubExpression(sexpr) => Err(CompileError::Invalid {
            message: "A sub-expression cannot name a helper".to_string(),
            line: sexpr.loc.start.line,
            column: sexpr.loc.start.column,
        }),
        other => {
            let text = literal_text(other);
            Ok(Cow::Owned(PathExpression {
                data: false,
                depth: 0,
                parts: vec![text.clone()],
                original: text,
                this_scoped: false,
                loc: other.loc().clone(),
            }))
        }
    }
}

fn literal_text(expr: &Expression) -> String {
    match expr {
        Expression::String(s) => s.value.clone(),
        Expression::Number(n) => n.original.clone(),
        Expression::Boolean(b) => b.value.to_string(),
        Expression::Undefined(_) => "undefined".to_string(),
        Expression::Null(_) => "null".to_string(),
        Expression::Path(p) => p.original.clone(),
        Expression::SubExpression(_) => String::new(),
    }
}

/// A JavaScript string literal. JSON escaping plus the two line terminators
/// JSON allows raw but older JavaScript engines don't.
fn js_string(value: &str) -> String {
    Value::String(value.to_string())
        .to_string()
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
}

fn loc_json(loc: &SourceLocation) -> String {
    format!(
        "{{\"start\":{{\"line\":{},\"column\":{}}},\"end\":{{\"line\":{},\"column\":{}}}}}",
        loc.start.line, loc.start.column, loc.end.line, loc.end.column
    )
}
