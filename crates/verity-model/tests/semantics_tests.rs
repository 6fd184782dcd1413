use num_bigint::BigInt;
use verity_model::ops::{self, BinOp, CmpOp};
use verity_model::{ErrorKind, OpError, TypeTag, Value};

/// Two to the power of sixty-four, past every machine integer width.
fn big() -> Value {
    Value::Int(BigInt::from(1u64 << 63) * BigInt::from(2))
}

#[test]
fn integers_have_arbitrary_magnitude() {
    let sum = ops::binary(BinOp::Add, &big(), &big()).unwrap();
    assert_eq!(sum.repr(), "36893488147419103232");
    assert_eq!(sum.type_tag(), TypeTag::Integer);
}

#[test]
fn huge_int_to_float_overflows() {
    let huge = ops::binary(BinOp::Pow, &Value::int(10), &Value::int(400)).unwrap();
    let err = ops::binary(BinOp::Div, &huge, &Value::int(3)).unwrap_err();
    assert_eq!(err.kind(), Some(&ErrorKind::OverflowError));
}

#[test]
fn complex_arithmetic() {
    let v = ops::binary(BinOp::Mul, &Value::complex(1.5, 3.5), &Value::int(2)).unwrap();
    assert_eq!(v, Value::complex(3.0, 7.0));
    let err = ops::compare(CmpOp::Lt, &Value::complex(1.0, 1.0), &Value::int(0)).unwrap_err();
    assert_eq!(err.kind(), Some(&ErrorKind::TypeError));
}

#[test]
fn item_assignment_and_deletion() {
    let mut d = Value::Dict(vec![]);
    ops::set_item(&mut d, Value::str("k"), Value::int(1)).unwrap();
    ops::set_item(&mut d, Value::str("k"), Value::int(2)).unwrap();
    assert_eq!(d, Value::Dict(vec![(Value::str("k"), Value::int(2))]));
    ops::del_item(&mut d, &Value::str("k")).unwrap();
    let err = ops::del_item(&mut d, &Value::str("k")).unwrap_err();
    assert_eq!(err, OpError::raise(ErrorKind::KeyError, "'k'"));

    let mut s = Value::str("abc");
    let err = ops::set_item(&mut s, Value::int(0), Value::str("x")).unwrap_err();
    assert_eq!(err.kind(), Some(&ErrorKind::TypeError));
}

#[test]
fn identity_of_unmodelled_objects_is_a_fault() {
    let r = ops::compare(CmpOp::Is, &Value::List(vec![]), &Value::List(vec![]));
    assert!(matches!(r, Err(OpError::Fault(_))));
    assert!(ops::compare(CmpOp::Is, &Value::None, &Value::None).unwrap());
    assert!(ops::compare(CmpOp::IsNot, &Value::int(0), &Value::None).unwrap());
}

#[test]
fn values_serialize_with_type_tags() {
    let v = Value::Dict(vec![(Value::str("a"), Value::Bytes(vec![0x80]))]);
    let json = serde_json::to_string(&v).unwrap();
    let back: Value = serde_json::from_str(&json).unwrap();
    assert_eq!(back, v);
}
