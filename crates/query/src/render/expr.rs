use crate::ast::expr::{CompareOp, Comparison, Predicate};
use crate::render::{Render, Renderer};

impl Render for Predicate {
    fn render(&self, r: &mut Renderer) {
        match self {
            Predicate::Leaf(cmp) => cmp.render(r),
            Predicate::And(children) => render_group(r, children, " AND "),
            Predicate::Or(children) => render_group(r, children, " OR "),
        }
    }
}

fn render_group(r: &mut Renderer, children: &[Predicate], sep: &str) {
    r.sql.push('(');
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            r.sql.push_str(sep);
        }
        child.render(r);
    }
    r.sql.push(')');
}

impl Render for Comparison {
    fn render(&self, r: &mut Renderer) {
        r.sql
            .push_str(&r.dialect.quote_identifier(&self.field.name));
        let op_str = match self.op {
            CompareOp::Eq => " = ",
            CompareOp::Gt => " > ",
            CompareOp::GtEq => " >= ",
            CompareOp::Lt => " < ",
            CompareOp::LtEq => " <= ",
        };
        r.sql.push_str(op_str);
        r.add_param(self.value.clone());
    }
}
