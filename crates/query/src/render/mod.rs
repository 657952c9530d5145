mod expr;
mod select;

use crate::SelectQuery;
use crate::dialect::Dialect;
use model::core::value::Value;

/// Accumulates SQL text and positional bindings while walking the AST.
pub struct Renderer<'a> {
    pub sql: String,
    pub params: Vec<Value>,
    pub dialect: &'a dyn Dialect,
}

impl<'a> Renderer<'a> {
    pub fn new(dialect: &'a dyn Dialect) -> Self {
        Renderer {
            sql: String::new(),
            params: Vec::new(),
            dialect,
        }
    }

    /// Emits a placeholder and records the binding.
    pub fn add_param(&mut self, value: Value) {
        let placeholder = self.dialect.placeholder(self.params.len());
        self.sql.push_str(&placeholder);
        self.params.push(value);
    }

    pub fn finish(self) -> SelectQuery {
        SelectQuery {
            sql: self.sql,
            bindings: self.params,
        }
    }
}

pub trait Render {
    fn render(&self, r: &mut Renderer);
}
