//! Whitespace control over a parsed tree.
//!
//! Two rules trim content statements:
//!
//! * `{{~` and `~}}` strip all whitespace on that side of the tag.
//! * A block tag, `{{else}}`, comment or partial that is the only thing on its
//!   line is "standalone": the indentation before it and the line break after
//!   it are dropped. A standalone partial remembers the indentation instead so
//!   the runtime can indent every line the partial renders.
//!
//! `value` is trimmed in place while `original` keeps the text as written,
//! since the standalone checks look at the untrimmed text.

use super::ast::*;
use regex::Regex;

lazy_static! {
    static ref PREV_LINE_RE: Regex = Regex::new(r"\r?\n\s*?$").unwrap();
    static ref ROOT_PREV_LINE_RE: Regex = Regex::new(r"(^|\r?\n)\s*?$").unwrap();
    static ref NEXT_LINE_RE: Regex = Regex::new(r"^\s*?\r?\n").unwrap();
    static ref ROOT_NEXT_LINE_RE: Regex = Regex::new(r"^\s*?(\r?\n|$)").unwrap();
    static ref LEADING_SPACE_RE: Regex = Regex::new(r"^\s+").unwrap();
    static ref LEADING_LINE_RE: Regex = Regex::new(r"^[ \t]*\r?\n?").unwrap();
    static ref TRAILING_SPACE_RE: Regex = Regex::new(r"\s+$").unwrap();
    static ref TRAILING_INDENT_RE: Regex = Regex::new(r"[ \t]+$").unwrap();
    static ref INDENT_RE: Regex = Regex::new(r"([ \t]+)$").unwrap();
}

/// Applies `~` stripping and, when `standalone` is set, standalone-line
/// stripping to every program in the tree.
pub fn apply(program: &mut Program, standalone: bool) {
    WhitespaceControl { standalone }.program(program, true);
}

/// What a statement asks of its neighbours.
#[derive(Debug, Default, Clone, Copy)]
struct Strip {
    open: bool,
    close: bool,
    open_standalone: bool,
    close_standalone: bool,
    inline_standalone: bool,
}

impl From<StripFlags> for Strip {
    fn from(flags: StripFlags) -> Self {
        Self {
            open: flags.open,
            close: flags.close,
            ..Default::default()
        }
    }
}

struct WhitespaceControl {
    standalone: bool,
}

impl WhitespaceControl {
    fn program(&self, program: &mut Program, is_root: bool) {
        let body = &mut program.body;
        for i in 0..body.len() {
            let Some(strip) = self.statement(&mut body[i]) else {
                continue;
            };
            let prev_ws = is_prev_whitespace(body, Some(i), is_root);
            let next_ws = is_next_whitespace(body, Some(i), is_root);
            let open_standalone = strip.open_standalone && prev_ws;
            let close_standalone = strip.close_standalone && next_ws;
            let inline_standalone = strip.inline_standalone && prev_ws && next_ws;

            if strip.close {
                omit_right(body, Some(i), true);
            }
            if strip.open {
                omit_left(body, Some(i), true);
            }
            if !self.standalone {
                continue;
            }

            if inline_standalone {
                omit_right(body, Some(i), false);
                if omit_left(body, Some(i), false) {
                    let indent = match &body[i - 1] {
                        Statement::Content(content) => INDENT_RE
                            .captures(&content.original)
                            .map(|caps| caps[1].to_string()),
                        _ => None,
                    };
                    if let (Statement::Partial(partial), Some(indent)) = (&mut body[i], indent) {
                        partial.indent = indent;
                    }
                }
            }
            if open_standalone {
                if let Some(main) = leading_program(&mut body[i]) {
                    omit_right(&mut main.body, None, false);
                }
                omit_left(body, Some(i), false);
            }
            if close_standalone {
                omit_right(body, Some(i), false);
                if let Some(last) = trailing_program(&mut body[i]) {
                    omit_left(&mut last.body, None, false);
                }
            }
        }
    }

    fn statement(&self, statement: &mut Statement) -> Option<Strip> {
        match statement {
            Statement::Content(_) => None,
            Statement::Mustache(m) => Some(m.strip.into()),
            Statement::Decorator(d) => Some(d.strip.into()),
            Statement::Partial(p) => Some(Strip {
                inline_standalone: true,
                ..p.strip.into()
            }),
            Statement::Comment(c) => Some(Strip {
                inline_standalone: true,
                ..c.strip.into()
            }),
            Statement::Block(b) => Some(self.block(
                b.program.as_mut(),
                b.inverse.as_mut(),
                b.open_strip,
                b.inverse_strip,
                b.close_strip,
            )),
            Statement::PartialBlock(p) => Some(self.block(
                Some(&mut p.program),
                None,
                p.open_strip,
                StripFlags::default(),
                p.close_strip,
            )),
            Statement::DecoratorBlock(d) => Some(self.block(
                Some(&mut d.program),
                None,
                d.open_strip,
                StripFlags::default(),
                d.close_strip,
            )),
        }
    }

    fn block(
        &self,
        program: Option<&mut Program>,
        inverse: Option<&mut Program>,
        open_strip: StripFlags,
        inverse_strip: StripFlags,
        close_strip: StripFlags,
    ) -> Strip {
        // `{{^x}}` blocks only have an inverse, which then plays the main role.
        let (main, mut inverse) = match (program, inverse) {
            (Some(program), inverse) => (program, inverse),
            (None, Some(inverse)) => (inverse, None),
            (None, None) => {
                return Strip {
                    open: open_strip.open,
                    close: close_strip.close,
                    ..Default::default()
                }
            }
        };
        self.program(main, false);
        if let Some(inverse) = inverse.as_deref_mut() {
            self.program(inverse, false);
        }

        let close_standalone = match inverse.as_deref_mut() {
            Some(inverse) => is_prev_whitespace(&first_inverse(inverse).body, None, false),
            None => is_prev_whitespace(&main.body, None, false),
        };
        let strip = Strip {
            open: open_strip.open,
            close: close_strip.close,
            open_standalone: is_next_whitespace(&main.body, None, false),
            close_standalone,
            inline_standalone: false,
        };

        if open_strip.close {
            omit_right(&mut main.body, None, true);
        }
        match inverse {
            Some(inverse) => {
                if inverse_strip.open {
                    omit_left(&mut main.body, None, true);
                }
                if inverse_strip.close {
                    omit_right(&mut first_inverse(inverse).body, None, true);
                }
                if close_strip.open {
                    omit_left(&mut last_inverse(inverse).body, None, true);
                }
                // A standalone `{{else}}`.
                if self.standalone
                    && is_prev_whitespace(&main.body, None, false)
                    && is_next_whitespace(&first_inverse(inverse).body, None, false)
                {
                    omit_left(&mut main.body, None, false);
                    omit_right(&mut first_inverse(inverse).body, None, false);
                }
            }
            None if close_strip.open => {
                omit_left(&mut main.body, None, true);
            }
            None => {}
        }
        strip
    }
}

/// The body right after a block's open tag.
fn leading_program(statement: &mut Statement) -> Option<&mut Program> {
    match statement {
        Statement::Block(b) => b.program.as_mut().or(b.inverse.as_mut()),
        Statement::PartialBlock(p) => Some(&mut p.program),
        Statement::DecoratorBlock(d) => Some(&mut d.program),
        _ => None,
    }
}

/// The body right before a block's close tag.
fn trailing_program(statement: &mut Statement) -> Option<&mut Program> {
    match statement {
        Statement::Block(b) => b.inverse.as_mut().or(b.program.as_mut()),
        Statement::PartialBlock(p) => Some(&mut p.program),
        Statement::DecoratorBlock(d) => Some(&mut d.program),
        _ => None,
    }
}

/// True when `program` is an `{{else if}}` inverse whose first (or last)
/// statement is the chained block.
fn continues_chain(program: &Program, last: bool) -> bool {
    let statement = if last {
        program.body.last()
    } else {
        program.body.first()
    };
    program.chained
        && matches!(
            statement,
            Some(Statement::Block(BlockStatement {
                program: Some(_),
                ..
            }))
        )
}

/// The body that follows `{{else}}`. For an `{{else if}}` chain this is the
/// chained block's own program.
fn first_inverse(inverse: &mut Program) -> &mut Program {
    if !continues_chain(inverse, false) {
        return inverse;
    }
    match inverse.body.first_mut() {
        Some(Statement::Block(BlockStatement {
            program: Some(program),
            ..
        })) => program,
        _ => unreachable!("checked by continues_chain"),
    }
}

/// The body that precedes the close tag of an `{{else if}}` chain.
fn last_inverse(mut inverse: &mut Program) -> &mut Program {
    while continues_chain(inverse, true) {
        inverse = match inverse.body.last_mut() {
            Some(Statement::Block(BlockStatement {
                program: Some(program),
                ..
            })) => program,
            _ => unreachable!("checked by continues_chain"),
        };
    }
    inverse
}

/// Whether the text before statement `i` (or the end of `body`) ends a line.
fn is_prev_whitespace(body: &[Statement], i: Option<usize>, is_root: bool) -> bool {
    let i = i.unwrap_or(body.len());
    let Some(prev) = i.checked_sub(1).and_then(|p| body.get(p)) else {
        return is_root;
    };
    let has_sibling = i >= 2;
    match prev {
        Statement::Content(content) => {
            let re = if has_sibling || !is_root {
                &*PREV_LINE_RE
            } else {
                &*ROOT_PREV_LINE_RE
            };
            re.is_match(&content.original)
        }
        _ => false,
    }
}

/// Whether the text after statement `i` (or the start of `body`) begins with
/// the rest of an empty line.
fn is_next_whitespace(body: &[Statement], i: Option<usize>, is_root: bool) -> bool {
    let next_index = i.map_or(0, |i| i + 1);
    let Some(next) = body.get(next_index) else {
        return is_root;
    };
    let has_sibling = next_index + 1 < body.len();
    match next {
        Statement::Content(content) => {
            let re = if has_sibling || !is_root {
                &*NEXT_LINE_RE
            } else {
                &*ROOT_NEXT_LINE_RE
            };
            re.is_match(&content.original)
        }
        _ => false,
    }
}

/// Trims the start of the content after statement `i` (or the first statement).
/// `multiple` strips all whitespace, otherwise one line's worth.
fn omit_right(body: &mut [Statement], i: Option<usize>, multiple: bool) {
    let Some(Statement::Content(current)) = body.get_mut(i.map_or(0, |i| i + 1)) else {
        return;
    };
    if !multiple && current.right_stripped {
        return;
    }
    let re = if multiple {
        &*LEADING_SPACE_RE
    } else {
        &*LEADING_LINE_RE
    };
    let value = re.replace(&current.value, "").into_owned();
    current.right_stripped = value != current.value;
    current.value = value;
}

/// Trims the end of the content before statement `i` (or the last statement).
/// Returns whether anything was removed.
fn omit_left(body: &mut [Statement], i: Option<usize>, multiple: bool) -> bool {
    let Some(index) = i.unwrap_or(body.len()).checked_sub(1) else {
        return false;
    };
    let Some(Statement::Content(current)) = body.get_mut(index) else {
        return false;
    };
    if !multiple && current.left_stripped {
        return false;
    }
    let re = if multiple {
        &*TRAILING_SPACE_RE
    } else {
        &*TRAILING_INDENT_RE
    };
    let value = re.replace(&current.value, "").into_owned();
    current.left_stripped = value != current.value;
    current.value = value;
    current.left_stripped
}

#[cfg(test)]
mod tests {
    use super::super::parser::{parse, parse_with};
    use super::*;

    fn contents(program: &Program) -> Vec<&str> {
        program
            .body
            .iter()
            .filter_map(|s| match s {
                Statement::Content(c) => Some(c.value.as_str()),
                _ => None,
            })
            .collect()
    }

    fn block(program: &Program, index: usize) -> &BlockStatement {
        match &program.body[index] {
            Statement::Block(b) => b,
            other => panic!("expected block, got {:?}", other),
        }
    }

    #[test]
    fn test_standalone_partial_records_indent() {
        let program = parse("<div>\n  {{> item}}\n</div>", None).unwrap();
        assert_eq!(contents(&program), ["<div>\n", "</div>"]);
        let Statement::Partial(partial) = &program.body[1] else {
            panic!("expected partial, got {:?}", program.body[1]);
        };
        assert_eq!(partial.indent, "  ");
    }

    #[test]
    fn test_standalone_block_lines_are_removed() {
        let program = parse("<ul>\n{{#each items}}\n  <li>{{this}}</li>\n{{/each}}\n</ul>", None).unwrap();
        assert_eq!(contents(&program), ["<ul>\n", "</ul>"]);
        let each = block(&program, 1);
        assert_eq!(contents(each.program.as_ref().unwrap()), ["  <li>", "</li>\n"]);
    }

    #[test]
    fn test_standalone_else() {
        let program = parse("{{#if a}}\n  yes\n{{else}}\n  no\n{{/if}}\n", None).unwrap();
        let block = block(&program, 0);
        assert_eq!(contents(block.program.as_ref().unwrap()), ["  yes\n"]);
        assert_eq!(contents(block.inverse.as_ref().unwrap()), ["  no\n"]);
        assert_eq!(contents(&program), [""]);
    }

    #[test]
    fn test_standalone_else_if_chain() {
        let program = parse("{{#if a}}\n  A\n{{else if b}}\n  B\n{{/if}}\n", None).unwrap();
        let outer = block(&program, 0);
        assert_eq!(contents(outer.program.as_ref().unwrap()), ["  A\n"]);
        let inverse = outer.inverse.as_ref().unwrap();
        assert!(inverse.chained);
        let inner = block(inverse, 0);
        assert_eq!(contents(inner.program.as_ref().unwrap()), ["  B\n"]);
    }

    #[test]
    fn test_standalone_comment_line_is_removed() {
        let program = parse("a\n  {{! note }}\nb", None).unwrap();
        assert_eq!(contents(&program), ["a\n", "b"]);
    }

    #[test]
    fn test_tags_sharing_a_line_are_not_standalone() {
        let program = parse("<p>\n  {{> item}} x\n</p>", None).unwrap();
        assert_eq!(contents(&program), ["<p>\n  ", " x\n</p>"]);
        let Statement::Partial(partial) = &program.body[1] else {
            panic!("expected partial");
        };
        assert!(partial.indent.is_empty());
    }

    #[test]
    fn test_mustaches_are_never_standalone() {
        let program = parse("a\n{{b}}\nc", None).unwrap();
        assert_eq!(contents(&program), ["a\n", "\nc"]);
    }

    #[test]
    fn test_tilde_strips_across_lines() {
        let program = parse("{{#if a~}}\n\n  x  \n\n{{~/if}}", None).unwrap();
        assert_eq!(contents(block(&program, 0).program.as_ref().unwrap()), ["x"]);
    }

    #[test]
    fn test_standalone_can_be_switched_off() {
        let program = parse_with("<div>\n  {{> item}}\n</div>", None, false).unwrap();
        assert_eq!(contents(&program), ["<div>\n  ", "\n</div>"]);
        let Statement::Partial(partial) = &program.body[1] else {
            panic!("expected partial");
        };
        assert!(partial.indent.is_empty());

        let program = parse_with("a  {{~b~}}  c", None, false).unwrap();
        assert_eq!(contents(&program), ["a", "c"]);
    }
}
