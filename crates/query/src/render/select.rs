use crate::ast::select::{From, Projection, Select};
use crate::dialect::LimitStyle;
use crate::render::{Render, Renderer};

impl Render for Select {
    fn render(&self, r: &mut Renderer) {
        // 1. SELECT clause, with TOP (n) where the dialect wants it.
        r.sql.push_str("SELECT ");
        if let (Some(limit), LimitStyle::SelectTop) = (self.limit, r.dialect.limit_style()) {
            r.sql.push_str(&format!("TOP ({limit}) "));
        }
        self.projection.render(r);

        // 2. FROM
        r.sql.push(' ');
        self.from.render(r);

        // 3. WHERE
        if let Some(where_clause) = &self.where_clause {
            r.sql.push_str(" WHERE ");
            where_clause.render(r);
        }

        // 4. ORDER BY
        if !self.order_by.is_empty() {
            r.sql.push_str(" ORDER BY ");
            for (i, field) in self.order_by.iter().enumerate() {
                if i > 0 {
                    r.sql.push_str(", ");
                }
                r.sql.push_str(&r.dialect.quote_identifier(&field.name));
            }
        }

        // 5. LIMIT
        if let (Some(limit), LimitStyle::Trailing) = (self.limit, r.dialect.limit_style()) {
            r.sql.push_str(&format!(" LIMIT {limit}"));
        }
    }
}

impl Render for Projection {
    fn render(&self, r: &mut Renderer) {
        match self {
            Projection::Columns(fields) => {
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        r.sql.push_str(", ");
                    }
                    r.sql.push_str(&r.dialect.quote_identifier(&field.name));
                }
            }
            Projection::MaxValue(field) => {
                r.sql.push_str("MAX(");
                r.sql.push_str(&r.dialect.quote_identifier(&field.name));
                r.sql.push(')');
            }
        }
    }
}

impl Render for From {
    fn render(&self, r: &mut Renderer) {
        r.sql.push_str("FROM ");
        if let Some(ns) = &self.namespace {
            r.sql.push_str(&r.dialect.quote_identifier(ns));
            r.sql.push('.');
        }
        r.sql.push_str(&r.dialect.quote_identifier(&self.table));
        if let Some(sample) = &self.sample {
            r.sql
                .push_str(&r.dialect.sample_suffix(sample.rate_inv_pow2));
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::expr::{CompareOp, Predicate};
    use crate::ast::select::{From, Projection, Select};
    use crate::dialect::{Postgres, SqlServer};
    use crate::generate;
    use model::core::data_type::DataType;
    use model::core::value::Value;
    use model::stream::Field;

    fn id_field() -> Field {
        Field::new("id", DataType::BigInt)
    }

    fn name_field() -> Field {
        Field::new("name", DataType::VarChar)
    }

    #[test]
    fn simple_select_postgres() {
        let ast = Select::new(
            Projection::Columns(vec![id_field(), name_field()]),
            From::new("users", None),
        )
        .with_where(Some(Predicate::leaf(
            &id_field(),
            CompareOp::Eq,
            Value::Int(123),
        )))
        .optimize();

        let q = generate(&ast, &Postgres);
        assert_eq!(q.sql, r#"SELECT "id", "name" FROM "users" WHERE "id" = $1"#);
        assert_eq!(q.bindings, vec![Value::Int(123)]);
    }

    #[test]
    fn resumable_select_sqlserver() {
        let ast = Select::new(
            Projection::Columns(vec![id_field(), name_field()]),
            From::new("users", Some("dbo")),
        )
        .with_where(Some(Predicate::leaf(
            &id_field(),
            CompareOp::Gt,
            Value::Int(50),
        )))
        .with_order_by(vec![id_field()])
        .with_limit(1000)
        .optimize();

        let q = generate(&ast, &SqlServer);
        assert_eq!(
            q.sql,
            "SELECT TOP (1000) [id], [name] FROM [dbo].[users] WHERE [id] > @P1 ORDER BY [id]"
        );
        assert_eq!(q.bindings, vec![Value::Int(50)]);
    }

    #[test]
    fn max_value_select() {
        let ast = Select::new(Projection::MaxValue(id_field()), From::new("users", None));
        let q = generate(&ast, &Postgres);
        assert_eq!(q.sql, r#"SELECT MAX("id") FROM "users""#);
        assert!(q.bindings.is_empty());
    }

    #[test]
    fn sampling_select() {
        let ast = Select::new(
            Projection::Columns(vec![id_field()]),
            From::new("users", Some("dbo")).with_sample(2),
        )
        .with_order_by(vec![id_field()])
        .with_limit(1024);

        let q = generate(&ast, &SqlServer);
        assert_eq!(
            q.sql,
            "SELECT TOP (1024) [id] FROM [dbo].[users] TABLESAMPLE SYSTEM (25 PERCENT) ORDER BY [id]"
        );
    }

    #[test]
    fn composite_bound_predicate_postgres() {
        // (a > ?) OR (a = ? AND b > ?)
        let a = Field::new("a", DataType::BigInt);
        let b = Field::new("b", DataType::BigInt);
        let pred = Predicate::Or(vec![
            Predicate::leaf(&a, CompareOp::Gt, Value::Int(1)),
            Predicate::And(vec![
                Predicate::leaf(&a, CompareOp::Eq, Value::Int(1)),
                Predicate::leaf(&b, CompareOp::Gt, Value::Int(7)),
            ]),
        ]);
        let ast = Select::new(
            Projection::Columns(vec![a.clone(), b.clone()]),
            From::new("t", None),
        )
        .with_where(Some(pred))
        .optimize();

        let q = generate(&ast, &Postgres);
        assert_eq!(
            q.sql,
            r#"SELECT "a", "b" FROM "t" WHERE ("a" > $1 OR ("a" = $2 AND "b" > $3))"#
        );
        assert_eq!(
            q.bindings,
            vec![Value::Int(1), Value::Int(1), Value::Int(7)]
        );
    }
}
