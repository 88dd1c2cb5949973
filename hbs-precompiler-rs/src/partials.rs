//! Discovery of the partials a template references.

use crate::handlebars::ast::{Expression, Program, Statement};

/// Returns the names of partials referenced by `ast`, in source order.
///
/// Only statically named partials count: `{{> (lookup . 'x') }}` and
/// `{{> @partial-block }}` are skipped. Inline partials defined with
/// `{{#*inline}}` are not collected, though partials referenced inside their
/// bodies are. Duplicates are kept.
pub fn collect_partials(ast: &Program) -> Vec<String> {
    let mut partials = Vec::new();
    visit_program(ast, &mut partials);
    partials
}

fn visit_program(program: &Program, partials: &mut Vec<String>) {
    for statement in &program.body {
        match statement {
            Statement::Partial(partial) => collect(&partial.name, partials),
            Statement::PartialBlock(partial) => {
                collect(&partial.name, partials);
                visit_program(&partial.program, partials);
            }
            Statement::Block(block) => {
                for program in block.program.iter().chain(&block.inverse) {
                    visit_program(program, partials);
                }
            }
            Statement::DecoratorBlock(decorator) => visit_program(&decorator.program, partials),
            Statement::Content(_)
            | Statement::Mustache(_)
            | Statement::Decorator(_)
            | Statement::Comment(_) => {}
        }
    }
}

fn collect(name: &Expression, partials: &mut Vec<String>) {
    if let Expression::Path(path) = name {
        if path.original != "@partial-block" {
            partials.push(path.original.clone());
        }
    }
}
