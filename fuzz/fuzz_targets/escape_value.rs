#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use pgq_client::{escape_single_quotes, escape_value_double, escape_value_single};
use serde_json::{Value, json};

#[derive(Debug, Arbitrary)]
enum FuzzValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<String>),
}

fuzz_target!(|input: FuzzValue| {
    let value = match input {
        FuzzValue::Null => Value::Null,
        FuzzValue::Bool(v) => json!(v),
        FuzzValue::Int(v) => json!(v),
        FuzzValue::Float(v) => json!(v),
        FuzzValue::Text(v) => json!(v),
        FuzzValue::List(v) => json!(v),
    };

    let single = escape_value_single(&value);
    let double = escape_value_double(&value);
    match &value {
        Value::String(s) => {
            assert_eq!(single.as_str(), Some(&*escape_single_quotes(s)));
            assert!(double.is_string());
        }
        other => {
            assert_eq!(&*single, other);
            assert_eq!(&*double, other);
        }
    }
});
