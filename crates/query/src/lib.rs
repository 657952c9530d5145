//! Pure translation of an abstract select into source-specific SQL text
//! plus positional bindings. No state, no I/O.

pub mod ast;
pub mod dialect;
pub mod render;

use ast::select::Select;
use dialect::Dialect;
use model::core::value::Value;
use render::{Render, Renderer};

/// A rendered query: SQL text and its positional bindings in order.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub sql: String,
    pub bindings: Vec<Value>,
}

/// Renders a select AST for the given dialect.
pub fn generate(select: &Select, dialect: &dyn Dialect) -> SelectQuery {
    let mut renderer = Renderer::new(dialect);
    select.render(&mut renderer);
    renderer.finish()
}
