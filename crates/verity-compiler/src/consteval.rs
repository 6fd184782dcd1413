//! Load-time evaluation of module globals and parameter defaults.

use std::collections::BTreeMap;

use verity_ir::ast::BoolOp;
use verity_ir::{Expr, ExprKind};
use verity_model::{ops, OpError, Value};

/// Evaluate a constant expression over previously defined globals.
pub fn eval_const(expr: &Expr, globals: &BTreeMap<String, Value>) -> Result<Value, String> {
    let v = match &expr.kind {
        ExprKind::Literal(v) => v.clone(),
        ExprKind::Name(n) => globals
            .get(n)
            .cloned()
            .ok_or_else(|| format!("name '{n}' is not a known constant"))?,
        ExprKind::List(items) => Value::List(eval_all(items, globals)?),
        ExprKind::Tuple(items) => Value::Tuple(eval_all(items, globals)?),
        ExprKind::Dict(pairs) => {
            let mut dict = Value::Dict(Vec::new());
            for (k, v) in pairs {
                let key = eval_const(k, globals)?;
                let value = eval_const(v, globals)?;
                ops::set_item(&mut dict, key, value).map_err(describe)?;
            }
            dict
        }
        ExprKind::Unary { op, operand } => {
            ops::unary(*op, &eval_const(operand, globals)?).map_err(describe)?
        }
        ExprKind::Binary { op, left, right } => {
            let l = eval_const(left, globals)?;
            let r = eval_const(right, globals)?;
            ops::binary(*op, &l, &r).map_err(describe)?
        }
        ExprKind::Compare { op, left, right } => {
            let l = eval_const(left, globals)?;
            let r = eval_const(right, globals)?;
            Value::Bool(ops::compare(*op, &l, &r).map_err(describe)?)
        }
        ExprKind::BoolOp { op, left, right } => {
            let l = eval_const(left, globals)?;
            match (op, l.is_truthy()) {
                (BoolOp::And, false) | (BoolOp::Or, true) => l,
                _ => eval_const(right, globals)?,
            }
        }
        ExprKind::IfElse { test, body, orelse } => {
            if eval_const(test, globals)?.is_truthy() {
                eval_const(body, globals)?
            } else {
                eval_const(orelse, globals)?
            }
        }
        ExprKind::Subscript { value, index } => {
            let base = eval_const(value, globals)?;
            let key = eval_const(index, globals)?;
            ops::subscript(&base, &key).map_err(describe)?
        }
        ExprKind::Slice {
            value,
            lower,
            upper,
        } => {
            let base = eval_const(value, globals)?;
            let lo = lower.as_ref().map(|e| eval_const(e, globals)).transpose()?;
            let hi = upper.as_ref().map(|e| eval_const(e, globals)).transpose()?;
            ops::slice(&base, lo.as_ref(), hi.as_ref()).map_err(describe)?
        }
        ExprKind::Call { .. } => return Err("call in constant expression".to_string()),
        ExprKind::Attribute { attr, .. } => {
            return Err(format!("attribute '{attr}' in constant expression"));
        }
        ExprKind::Unsupported(what) => return Err(format!("unsupported {what}")),
    };
    Ok(v)
}

fn eval_all(items: &[Expr], globals: &BTreeMap<String, Value>) -> Result<Vec<Value>, String> {
    items.iter().map(|e| eval_const(e, globals)).collect()
}

fn describe(err: OpError) -> String {
    err.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use verity_ir::parse_expression;

    fn eval(src: &str, globals: &BTreeMap<String, Value>) -> Result<Value, String> {
        eval_const(&parse_expression(src).unwrap(), globals)
    }

    #[test]
    fn test_containers_and_arithmetic() {
        let globals = BTreeMap::new();
        assert_eq!(
            eval("{'a': 1 + 2, 'b': [None]}", &globals).unwrap(),
            Value::Dict(vec![
                (Value::str("a"), Value::int(3)),
                (Value::str("b"), Value::List(vec![Value::None]))
            ])
        );
        assert_eq!(eval("1e300 * 1e300", &globals).unwrap(), Value::Float(f64::INFINITY));
    }

    #[test]
    fn test_earlier_globals_are_visible() {
        let mut globals = BTreeMap::new();
        globals.insert("BASE".to_string(), Value::int(10));
        assert_eq!(eval("BASE * 2", &globals).unwrap(), Value::int(20));
        assert!(eval("OTHER", &globals).is_err());
        assert!(eval("f(1)", &globals).is_err());
    }
}
