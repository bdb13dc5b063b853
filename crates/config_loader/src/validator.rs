//! 配置验证模块
//!
//! 验证规则:
//! - 适配器名称非空且唯一
//! - 生产者必须声明输出且频率 > 0，中继必须声明输出
//! - 高延迟策略的 tick 在 1..=500 ms 之间
//! - drain 批大小与 tick > 0，依赖扫描节奏 > 0
//!
//! 无法解析的依赖名称不算错误: 引擎运行时会忽略并上报。
//! [`warnings`] 可以提前列出它们。

use std::collections::HashSet;

use contracts::{AdapterKind, ContractError, RouterBlueprint, RoutingStrategy};

const TICK_RANGE_MS: std::ops::RangeInclusive<u64> = 1..=500;

/// 验证 RouterBlueprint
///
/// 返回遇到的第一个错误。
pub fn validate(blueprint: &RouterBlueprint) -> Result<(), ContractError> {
    validate_engine(blueprint)?;
    validate_adapter_names(blueprint)?;
    validate_adapter_shapes(blueprint)?;
    Ok(())
}

/// 非致命问题，每条一行。
pub fn warnings(blueprint: &RouterBlueprint) -> Vec<String> {
    let names: HashSet<&str> = blueprint.adapters.iter().map(|a| a.name.as_str()).collect();
    let mut found = Vec::new();
    for adapter in &blueprint.adapters {
        for dependency in adapter.dependency_names() {
            if dependency == adapter.name {
                found.push(format!("adapters[{}]: depends on itself", adapter.name));
            } else if !names.contains(dependency.as_str()) {
                found.push(format!(
                    "adapters[{}]: dependency '{dependency}' not found, it will be ignored",
                    adapter.name
                ));
            }
        }
        if adapter.dependency_timeout_ms.is_some() && adapter.dependencies.is_none() {
            found.push(format!(
                "adapters[{}]: dependency_timeout_ms set without dependencies",
                adapter.name
            ));
        }
    }
    found
}

fn validate_engine(blueprint: &RouterBlueprint) -> Result<(), ContractError> {
    let engine = &blueprint.engine;

    if let RoutingStrategy::HighLatency { tick_ms } = engine.strategy {
        if !TICK_RANGE_MS.contains(&tick_ms) {
            return Err(ContractError::config_validation(
                "engine.strategy.tick_ms",
                format!(
                    "tick_ms must be within {}..={} ms, got {tick_ms}",
                    TICK_RANGE_MS.start(),
                    TICK_RANGE_MS.end()
                ),
            ));
        }
    }

    if engine.drain.batch_size == 0 {
        return Err(ContractError::config_validation(
            "engine.drain.batch_size",
            "batch_size must be > 0",
        ));
    }
    if engine.drain.tick_ms == 0 {
        return Err(ContractError::config_validation(
            "engine.drain.tick_ms",
            "tick_ms must be > 0",
        ));
    }
    if engine.dependency.sweep_every == 0 || engine.dependency.sweep_interval_ms == 0 {
        return Err(ContractError::config_validation(
            "engine.dependency",
            "sweep_every and sweep_interval_ms must be > 0",
        ));
    }
    Ok(())
}

fn validate_adapter_names(blueprint: &RouterBlueprint) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (idx, adapter) in blueprint.adapters.iter().enumerate() {
        if adapter.name.trim().is_empty() {
            return Err(ContractError::config_validation(
                format!("adapters[{idx}].name"),
                "adapter name cannot be empty",
            ));
        }
        if !seen.insert(adapter.name.as_str()) {
            return Err(ContractError::config_validation(
                format!("adapters[name={}]", adapter.name),
                "duplicate adapter name",
            ));
        }
    }
    Ok(())
}

fn validate_adapter_shapes(blueprint: &RouterBlueprint) -> Result<(), ContractError> {
    for adapter in &blueprint.adapters {
        match adapter.kind {
            AdapterKind::Producer => {
                let rate = adapter.rate_hz.unwrap_or(0.0);
                if !(rate.is_finite() && rate > 0.0) {
                    return Err(ContractError::config_validation(
                        format!("adapters[{}].rate_hz", adapter.name),
                        format!("rate_hz must be > 0 and finite, got {rate}"),
                    ));
                }
                if adapter.outputs.is_empty() {
                    return Err(ContractError::config_validation(
                        format!("adapters[{}].outputs", adapter.name),
                        "producer needs at least one output",
                    ));
                }
            }
            AdapterKind::Relay if adapter.outputs.is_empty() => {
                return Err(ContractError::config_validation(
                    format!("adapters[{}].outputs", adapter.name),
                    "relay needs at least one output",
                ));
            }
            _ => {}
        }
    }
    Ok(())
}
