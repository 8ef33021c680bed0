//! Evolver 配置生命周期与提案准入
//!
//! 周期开始时取 `snapshot()`，周期内只读；`update_config` 只影响之后的周期。

use std::sync::RwLock;

use crate::config::AppConfig;
use crate::core::EvolverError;
use crate::evolution::types::{EvolutionProposal, EvolverConfig};
use crate::evolution::validator::DecisionPolicy;

impl EvolverConfig {
    /// 阈值在 0-100 之间，每周期至少一个提案
    pub fn validate(&self) -> Result<(), EvolverError> {
        if !(0.0..=100.0).contains(&self.confidence_threshold) {
            return Err(EvolverError::Config(format!(
                "confidence_threshold must be within 0-100, got {}",
                self.confidence_threshold
            )));
        }
        if self.max_proposals_per_cycle == 0 {
            return Err(EvolverError::Config(
                "max_proposals_per_cycle must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn decision_policy(&self) -> DecisionPolicy {
        DecisionPolicy {
            confidence_threshold: self.confidence_threshold,
            require_manual_approval: self.require_manual_approval,
        }
    }

    pub fn is_protected(&self, module: &str) -> bool {
        self.protected_modules.iter().any(|p| p == module)
    }

    /// 文件落在受保护模块内：`src/<m>/`、`src/modules/<m>/` 或 `src/<m>.rs`
    pub fn protects_path(&self, path: &str) -> bool {
        module_of_path(path).is_some_and(|m| self.is_protected(m))
    }
}

fn module_of_path(path: &str) -> Option<&str> {
    let rel = path.trim_start_matches("./");
    let rel = rel.strip_prefix("src/").unwrap_or(rel);
    let rel = rel.strip_prefix("modules/").unwrap_or(rel);
    match rel.split_once('/') {
        Some((first, _)) => Some(first),
        None => rel.strip_suffix(".rs"),
    }
}

pub struct EvolutionEngine {
    config: RwLock<EvolverConfig>,
}

impl EvolutionEngine {
    pub fn new(config: EvolverConfig) -> Result<Self, EvolverError> {
        config.validate()?;
        Ok(Self {
            config: RwLock::new(config),
        })
    }

    pub fn from_app_config(config: &AppConfig) -> Result<Self, EvolverError> {
        Self::new(config.evolver.clone().into())
    }

    /// 当前配置的副本
    pub fn snapshot(&self) -> EvolverConfig {
        match self.config.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// 校验后替换；校验失败时保留旧配置
    pub fn update_config(&self, config: EvolverConfig) -> Result<(), EvolverError> {
        config.validate()?;
        let mut guard = match self.config.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tracing::info!(
            auto_approve = config.auto_approve,
            max_proposals = config.max_proposals_per_cycle,
            threshold = config.confidence_threshold,
            "Evolver config updated"
        );
        *guard = config;
        Ok(())
    }

    /// 丢弃未启用类型、目标或文件命中受保护模块的提案，再截断到上限
    pub fn admit(
        config: &EvolverConfig,
        proposals: Vec<EvolutionProposal>,
    ) -> Vec<EvolutionProposal> {
        let total = proposals.len();
        let admitted: Vec<EvolutionProposal> = proposals
            .into_iter()
            .filter(|p| {
                if !config.enabled_proposal_types.contains(&p.proposal_type) {
                    tracing::debug!(proposal = %p.title, kind = ?p.proposal_type, "Proposal type disabled");
                    return false;
                }
                if let Some(module) = p.target_modules.iter().find(|m| config.is_protected(m)) {
                    tracing::warn!(proposal = %p.title, module = %module, "Proposal targets a protected module");
                    return false;
                }
                if let Some(file) = p.implementation.files.iter().find(|f| config.protects_path(&f.path)) {
                    tracing::warn!(proposal = %p.title, path = %file.path, "Proposal writes into a protected module");
                    return false;
                }
                true
            })
            .take(config.max_proposals_per_cycle)
            .collect();

        if admitted.len() < total {
            tracing::info!(admitted = admitted.len(), total, "Proposals filtered by admission policy");
        }
        admitted
    }
}
