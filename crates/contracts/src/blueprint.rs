//! RouterBlueprint - Config Loader 的输出
//!
//! 引擎调优参数，以及演示程序使用的可选合成拓扑。

use serde::{Deserialize, Serialize};

use crate::{parse_dependency_names, EngineConfig};

/// 配置版本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// 完整的路由配置蓝图
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterBlueprint {
    #[serde(default)]
    pub version: ConfigVersion,

    #[serde(default)]
    pub engine: EngineConfig,

    /// `run` 命令要构建的适配器
    #[serde(default)]
    pub adapters: Vec<AdapterConfig>,
}

/// 合成适配器类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    /// 按 `rate_hz` 为输出生成测量值
    Producer,
    /// 统计并记录收到的测量值
    Consumer,
    /// 将每个输入重新发布为输出 (双角色)
    Relay,
}

/// 单个合成适配器
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// 唯一的适配器名称
    pub name: String,

    pub kind: AdapterKind,

    /// 订阅的点标签; 省略表示广播
    #[serde(default)]
    pub inputs: Option<Vec<String>>,

    /// 产出的点标签
    #[serde(default)]
    pub outputs: Vec<String>,

    /// 生产者的生成频率 (Hz)，必须 > 0
    #[serde(default)]
    pub rate_hz: Option<f64>,

    #[serde(default = "default_true")]
    pub auto_start: bool,

    #[serde(default)]
    pub respect_input_demand: bool,

    #[serde(default)]
    pub respect_output_demand: bool,

    /// 以逗号/分号分隔的依赖适配器名称
    #[serde(default)]
    pub dependencies: Option<String>,

    #[serde(default)]
    pub dependency_timeout_ms: Option<u64>,

    /// 每批模拟处理耗时
    #[serde(default)]
    pub ingest_delay_ms: Option<u64>,
}

fn default_true() -> bool {
    true
}

impl AdapterConfig {
    pub fn dependency_names(&self) -> Vec<String> {
        self.dependencies
            .as_deref()
            .map(parse_dependency_names)
            .unwrap_or_default()
    }
}

impl RouterBlueprint {
    pub fn adapter(&self, name: &str) -> Option<&AdapterConfig> {
        self.adapters.iter().find(|a| a.name == name)
    }

    pub fn count_of(&self, kind: AdapterKind) -> usize {
        self.adapters.iter().filter(|a| a.kind == kind).count()
    }
}
