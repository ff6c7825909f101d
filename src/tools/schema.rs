//! 工具参数 Schema 生成与参数解析
//!
//! 参数结构体 derive(JsonSchema, Deserialize)，用 schemars 生成 schema，再裁剪到供应商函数声明支持的
//! OpenAPI 子集（type / description / properties / required / items / enum）。`Option<T>` 字段生成的
//! `["string", "null"]` 类型数组会被收窄为单一类型。

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

use crate::memory::ArgMap;

/// 生成某个参数结构体的函数声明 parameters
pub fn parameters_for<T: JsonSchema>() -> Value {
    let root = schema_for!(T);
    let raw = serde_json::to_value(&root).unwrap_or_else(|_| json!({}));
    let mut schema = sanitize(&raw);
    if let Value::Object(map) = &mut schema {
        map.insert("type".to_string(), json!("object"));
        map.entry("properties").or_insert_with(|| json!({}));
        map.entry("required").or_insert_with(|| json!([]));
    }
    schema
}

/// 将归一化后的参数映射解析为参数结构体；缺少必填字段等错误以文本返回给模型
pub fn parse_args<T: DeserializeOwned>(args: ArgMap) -> Result<T, String> {
    serde_json::from_value(Value::Object(args)).map_err(|e| format!("invalid arguments: {e}"))
}

fn sanitize(value: &Value) -> Value {
    let Value::Object(map) = value else {
        return value.clone();
    };
    let mut out = Map::new();
    for (key, val) in map {
        match key.as_str() {
            "type" => {
                out.insert(key.clone(), narrow_type(val));
            }
            "description" | "enum" | "required" => {
                out.insert(key.clone(), val.clone());
            }
            "items" => {
                out.insert(key.clone(), sanitize(val));
            }
            "properties" => {
                if let Value::Object(props) = val {
                    let props = props
                        .iter()
                        .map(|(name, schema)| (name.clone(), sanitize(schema)))
                        .collect();
                    out.insert(key.clone(), Value::Object(props));
                }
            }
            _ => {}
        }
    }
    Value::Object(out)
}

fn narrow_type(value: &Value) -> Value {
    match value {
        Value::Array(types) => types
            .iter()
            .find(|t| t.as_str() != Some("null"))
            .cloned()
            .unwrap_or_else(|| json!("string")),
        other => other.clone(),
    }
}
