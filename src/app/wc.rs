//! Word count.

use std::path::Path;

use crate::KeyValue;

pub fn map(_filename: &Path, contents: &str) -> Vec<KeyValue> {
    contents
        .split_whitespace()
        .map(|word| KeyValue {
            key: word.to_owned(),
            value: "1".into(),
        })
        .collect()
}

pub fn reduce(_key: &str, values: &[String]) -> String {
    values.len().to_string()
}
