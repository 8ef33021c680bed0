//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `LIFEOS__*` 覆盖（双下划线表示嵌套，如 `LIFEOS__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::evolution::types::{EvolverConfig, ProposalType};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub data_service: DataServiceSection,
    pub evolver: EvolverSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "lifeos".to_string(),
        }
    }
}

/// [llm] 段：mock / openai / http（数据服务 AI 端点）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 单次请求超时（秒）
    pub timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            timeout_secs: 60,
        }
    }
}

/// [data_service] 段：托管后端项目、鉴权与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataServiceSection {
    pub project_id: Option<String>,
    /// 覆盖由 project_id 推导的函数根地址（自建网关或测试）
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    /// 函数路径前缀
    pub function: String,
    /// AI 文本生成函数名
    pub ai_function: String,
    pub timeout_secs: u64,
}

impl Default for DataServiceSection {
    fn default() -> Self {
        Self {
            project_id: None,
            base_url: None,
            api_key: None,
            function: "evolver".to_string(),
            ai_function: "ai-generate".to_string(),
            timeout_secs: 30,
        }
    }
}

impl DataServiceSection {
    /// 函数根地址：`https://{project}.supabase.co/functions/v1`，或 base_url 覆盖
    pub fn functions_url(&self) -> Option<String> {
        if let Some(base) = &self.base_url {
            return Some(base.trim_end_matches('/').to_string());
        }
        self.project_id
            .as_ref()
            .filter(|p| !p.is_empty())
            .map(|p| format!("https://{}.supabase.co/functions/v1", p))
    }

    /// Evolver 函数地址
    pub fn evolver_url(&self) -> Option<String> {
        self.functions_url()
            .map(|root| format!("{}/{}", root, self.function.trim_matches('/')))
    }

    pub fn ai_endpoint(&self) -> Option<String> {
        self.functions_url()
            .map(|root| format!("{}/{}", root, self.ai_function.trim_matches('/')))
    }

    pub fn is_configured(&self) -> bool {
        self.functions_url().is_some()
    }
}

/// [evolver] 段：进化周期策略（snake_case 键，转换为数据服务使用的 EvolverConfig）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EvolverSection {
    pub auto_approve: bool,
    pub max_proposals_per_cycle: usize,
    pub confidence_threshold: f64,
    pub enabled_proposal_types: Vec<ProposalType>,
    pub protected_modules: Vec<String>,
    pub require_manual_approval: bool,
}

impl Default for EvolverSection {
    fn default() -> Self {
        let defaults = EvolverConfig::default();
        Self {
            auto_approve: defaults.auto_approve,
            max_proposals_per_cycle: defaults.max_proposals_per_cycle,
            confidence_threshold: defaults.confidence_threshold,
            enabled_proposal_types: defaults.enabled_proposal_types,
            protected_modules: defaults.protected_modules,
            require_manual_approval: defaults.require_manual_approval,
        }
    }
}

impl From<EvolverSection> for EvolverConfig {
    fn from(section: EvolverSection) -> Self {
        Self {
            auto_approve: section.auto_approve,
            max_proposals_per_cycle: section.max_proposals_per_cycle,
            confidence_threshold: section.confidence_threshold,
            enabled_proposal_types: section.enabled_proposal_types,
            protected_modules: section.protected_modules,
            require_manual_approval: section.require_manual_approval,
        }
    }
}

/// 从 config 目录加载配置，环境变量 LIFEOS__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 LIFEOS__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("LIFEOS")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
