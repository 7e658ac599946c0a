//! 并发安全的参数袋。
//!
//! # 教案式说明
//! - **意图（Why）**：Channel 与 Pipeline 各自拥有一份松散类型的配置/状态集合，任意任务都可能
//!   在不加外部锁的情况下读写它。
//! - **逻辑（How）**：以 `DashMap<String, ParamValue>` 作为存储，读取侧通过带默认值的类型化 getter
//!   消费；`from_toml_str` 允许宿主从配置文件装载一张扁平表。
//! - **契约（What）**：getter 在键缺失或类型不匹配时返回默认值，不会 panic。

use std::{any::Any, fmt, sync::Arc, time::Duration};

use dashmap::DashMap;
use serde::Deserialize;

use crate::error::ChannelError;

/// 内置配置键。协议层可以定义自己的键，只要避免与这里冲突即可。
pub mod keys {
    /// 单次读取的缓冲大小（字节）。
    pub const READ_BUFFER_SIZE: &str = "read_buffer_size";
    /// 读取截止时长；到期时读循环收到 `Skip`。
    pub const READ_TIMEOUT: &str = "read_timeout";
    /// 写入截止时长；到期时写入以 `Timeout` 失败。
    pub const WRITE_TIMEOUT: &str = "write_timeout";
    /// 通道激活后是否持续读取。
    pub const AUTO_READ: &str = "auto_read";
    /// 是否关闭 Nagle 算法。
    pub const TCP_NODELAY: &str = "tcp_nodelay";
    /// `SO_LINGER` 时长。
    pub const SO_LINGER: &str = "so_linger";
    /// 解码器可缓冲的最大帧长度（字节）。
    pub const MAX_FRAME_LENGTH: &str = "max_frame_length";

    /// `READ_BUFFER_SIZE` 的默认值。
    pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;
    /// `MAX_FRAME_LENGTH` 的默认值。
    pub const DEFAULT_MAX_FRAME_LENGTH: usize = 1 << 20;
}

/// 参数值。
#[derive(Clone)]
pub enum ParamValue {
    /// 布尔值。
    Boolean(bool),
    /// 有符号整数。
    Integer(i64),
    /// 浮点数。
    Float(f64),
    /// 文本。
    Text(String),
    /// 时长。
    Duration(Duration),
    /// 任意共享状态，按 `Arc` 身份比较。
    Shared(Arc<dyn Any + Send + Sync>),
}

impl ParamValue {
    /// 返回布尔值。
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    /// 返回整数值。
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// 返回非负整数值；负数视为不匹配。
    pub fn as_usize(&self) -> Option<usize> {
        self.as_i64().and_then(|value| usize::try_from(value).ok())
    }

    /// 返回文本值。
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(value) => Some(value),
            _ => None,
        }
    }

    /// 返回时长；整数按毫秒解释。
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            ParamValue::Duration(value) => Some(*value),
            ParamValue::Integer(millis) if *millis >= 0 => Some(Duration::from_millis(*millis as u64)),
            _ => None,
        }
    }

    /// 以具体类型读取共享状态。
    pub fn as_shared<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            ParamValue::Shared(value) => Arc::clone(value).downcast::<T>().ok(),
            _ => None,
        }
    }
}

impl fmt::Debug for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Boolean(value) => f.debug_tuple("Boolean").field(value).finish(),
            ParamValue::Integer(value) => f.debug_tuple("Integer").field(value).finish(),
            ParamValue::Float(value) => f.debug_tuple("Float").field(value).finish(),
            ParamValue::Text(value) => f.debug_tuple("Text").field(value).finish(),
            ParamValue::Duration(value) => f.debug_tuple("Duration").field(value).finish(),
            ParamValue::Shared(_) => f.write_str("Shared(..)"),
        }
    }
}

impl PartialEq for ParamValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ParamValue::Boolean(a), ParamValue::Boolean(b)) => a == b,
            (ParamValue::Integer(a), ParamValue::Integer(b)) => a == b,
            (ParamValue::Float(a), ParamValue::Float(b)) => a == b,
            (ParamValue::Text(a), ParamValue::Text(b)) => a == b,
            (ParamValue::Duration(a), ParamValue::Duration(b)) => a == b,
            (ParamValue::Shared(a), ParamValue::Shared(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Boolean(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Integer(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Integer(i64::from(value))
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        ParamValue::Integer(i64::from(value))
    }
}

impl From<usize> for ParamValue {
    fn from(value: usize) -> Self {
        ParamValue::Integer(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_owned())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

impl From<Duration> for ParamValue {
    fn from(value: Duration) -> Self {
        ParamValue::Duration(value)
    }
}

/// 键值参数袋；克隆会复制全部条目，得到彼此独立的两份。
#[derive(Clone, Default)]
pub struct Params {
    entries: DashMap<String, ParamValue>,
}

impl Params {
    /// 创建空参数袋。
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入参数，返回旧值。
    pub fn set(&self, key: impl Into<String>, value: impl Into<ParamValue>) -> Option<ParamValue> {
        self.entries.insert(key.into(), value.into())
    }

    /// 读取参数的拷贝。
    pub fn get(&self, key: &str) -> Option<ParamValue> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// 删除参数。
    pub fn remove(&self, key: &str) -> Option<ParamValue> {
        self.entries.remove(key).map(|(_, value)| value)
    }

    /// 是否包含某个键。
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// 条目数量。
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否为空。
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 所有键的快照，按字典序排列。
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        keys
    }

    /// 将另一份参数袋的条目覆盖写入当前参数袋。
    pub fn extend_from(&self, other: &Params) {
        for entry in other.entries.iter() {
            self.entries.insert(entry.key().clone(), entry.value().clone());
        }
    }

    /// 读取布尔参数，缺失或类型不符时返回 `default`。
    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(|value| value.as_bool()).unwrap_or(default)
    }

    /// 读取整数参数。
    pub fn i64_or(&self, key: &str, default: i64) -> i64 {
        self.get(key).and_then(|value| value.as_i64()).unwrap_or(default)
    }

    /// 读取非负整数参数。
    pub fn usize_or(&self, key: &str, default: usize) -> usize {
        self.get(key).and_then(|value| value.as_usize()).unwrap_or(default)
    }

    /// 读取文本参数。
    pub fn str_or(&self, key: &str, default: &str) -> String {
        self.get(key)
            .and_then(|value| value.as_str().map(str::to_owned))
            .unwrap_or_else(|| default.to_owned())
    }

    /// 读取时长参数；未设置时返回 `None`。
    pub fn duration(&self, key: &str) -> Option<Duration> {
        self.get(key).and_then(|value| value.as_duration())
    }

    /// 读取共享状态。
    pub fn shared<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.get(key).and_then(|value| value.as_shared::<T>())
    }

    /// 从一张扁平 TOML 表装载参数。
    ///
    /// # 教案式说明
    /// - **逻辑（How）**：整数、布尔、浮点、字符串直接映射；形如 `{ secs = 1, millis = 250 }`
    ///   的内联表解析为时长。
    /// - **契约（What）**：数组、日期或其它形状的表返回 [`ChannelError::Config`]，此时不写入任何条目。
    pub fn from_toml_str(source: &str) -> Result<Self, ChannelError> {
        let table: toml::Table =
            toml::from_str(source).map_err(|err| ChannelError::Config(err.to_string()))?;
        let params = Params::new();
        for (key, value) in table {
            let converted = match value {
                toml::Value::Boolean(flag) => ParamValue::Boolean(flag),
                toml::Value::Integer(number) => ParamValue::Integer(number),
                toml::Value::Float(number) => ParamValue::Float(number),
                toml::Value::String(text) => ParamValue::Text(text),
                toml::Value::Table(inner) => {
                    let duration: DurationTable = toml::Value::Table(inner)
                        .try_into()
                        .map_err(|err| ChannelError::Config(format!("{key}: {err}")))?;
                    ParamValue::Duration(duration.into_duration())
                }
                other => {
                    return Err(ChannelError::Config(format!(
                        "{key}: unsupported value type `{}`",
                        other.type_str()
                    )));
                }
            };
            params.set(key, converted);
        }
        Ok(params)
    }
}

impl fmt::Debug for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for key in self.keys() {
            if let Some(value) = self.get(&key) {
                map.entry(&key, &value);
            }
        }
        map.finish()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DurationTable {
    #[serde(default)]
    secs: u64,
    #[serde(default)]
    millis: u64,
}

impl DurationTable {
    fn into_duration(self) -> Duration {
        Duration::from_secs(self.secs) + Duration::from_millis(self.millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_getters_fall_back_on_mismatch() {
        let params = Params::new();
        params.set(keys::READ_BUFFER_SIZE, 8192usize);
        params.set(keys::AUTO_READ, "yes");
        params.set("negative", -1);

        assert_eq!(params.usize_or(keys::READ_BUFFER_SIZE, 1), 8192);
        assert!(params.bool_or(keys::AUTO_READ, true), "类型不符时应回退默认值");
        assert_eq!(params.usize_or("negative", 7), 7, "负数不能解释为 usize");
        assert_eq!(params.str_or("missing", "fallback"), "fallback");
    }

    #[test]
    fn integer_params_read_as_millisecond_durations() {
        let params = Params::new();
        params.set(keys::READ_TIMEOUT, 250);
        assert_eq!(params.duration(keys::READ_TIMEOUT), Some(Duration::from_millis(250)));
        assert_eq!(params.duration(keys::WRITE_TIMEOUT), None);
    }

    #[test]
    fn shared_values_compare_by_identity() {
        let state = Arc::new(String::from("session"));
        let params = Params::new();
        params.set("state", ParamValue::Shared(state.clone()));

        let loaded = params.shared::<String>("state").expect("应能按类型取回共享状态");
        assert!(Arc::ptr_eq(&loaded, &state));
        assert!(params.shared::<u32>("state").is_none());
    }

    #[test]
    fn clone_is_independent_copy() {
        let original = Params::new();
        original.set("a", 1);
        let copy = original.clone();
        copy.set("a", 2);
        assert_eq!(original.i64_or("a", 0), 1, "克隆后修改不能影响原参数袋");
    }

    #[test]
    fn loads_flat_toml_table() {
        let params = Params::from_toml_str(
            r#"
            read_buffer_size = 16384
            auto_read = false
            name = "edge"
            read_timeout = { millis = 1500 }
            write_timeout = { secs = 2 }
            "#,
        )
        .expect("合法 TOML 应能装载");

        assert_eq!(params.usize_or(keys::READ_BUFFER_SIZE, 0), 16384);
        assert!(!params.bool_or(keys::AUTO_READ, true));
        assert_eq!(params.str_or("name", ""), "edge");
        assert_eq!(params.duration(keys::READ_TIMEOUT), Some(Duration::from_millis(1500)));
        assert_eq!(params.duration(keys::WRITE_TIMEOUT), Some(Duration::from_secs(2)));
    }

    #[test]
    fn rejects_arrays_and_unknown_tables() {
        assert!(matches!(
            Params::from_toml_str("ports = [1, 2]"),
            Err(ChannelError::Config(_))
        ));
        assert!(matches!(
            Params::from_toml_str("read_timeout = { minutes = 1 }"),
            Err(ChannelError::Config(_))
        ));
    }
}
