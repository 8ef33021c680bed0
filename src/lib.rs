//! LifeOS Evolver - 事件总线驱动的自我进化流水线
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型
//! - **dataservice**: 托管数据服务 REST 客户端（周期、提案、配置、指标）
//! - **events**: 类型化事件目录与发布/订阅总线（有界历史）
//! - **evolution**: 分析、提案、实现、验证、决策与周期驱动
//! - **llm**: 文本生成能力抽象与实现（Mock / OpenAI 兼容 / HTTP 端点）
//! - **observability**: 日志初始化

pub mod config;
pub mod core;
pub mod dataservice;
pub mod events;
pub mod evolution;
pub mod llm;
pub mod observability;

pub use events::EventBus;
pub use evolution::{EvolutionEngine, EvolutionLoop, EvolverConfig};
