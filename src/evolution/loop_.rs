//! 进化周期驱动
//!
//! analyze → propose → admit → approve → implement → apply → test → decide → (revert)
//!
//! 每个阶段同步推进 `EvolutionCycle.status` 并写入日志；阶段事件由各组件发布，
//! 周期级事件（CYCLE_* / PROPOSAL_APPROVED / PROPOSAL_REJECTED）在此发布。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::events::{EventBus, EventPayload, NewEvent};
use crate::evolution::analyzer::SystemAnalyzer;
use crate::evolution::engine::EvolutionEngine;
use crate::evolution::implementer::EvolutionImplementer;
use crate::evolution::proposer::EvolutionProposer;
use crate::evolution::store::{ChangeStore, CycleStore};
use crate::evolution::types::{
    CycleStatus, Decision, EvolutionCycle, EvolutionProposal, EvolverConfig, ImplementationStatus,
    LogLevel, ProposalStatus, SystemState,
};
use crate::evolution::validator::EvolutionValidator;
use crate::llm::LlmClient;

const SOURCE: &str = "evolution-loop";

/// 审批结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Approval {
    Approved,
    Rejected(String),
    /// 暂不处理，提案保持 proposed
    Pending,
}

#[async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn review(&self, proposal: &EvolutionProposal, config: &EvolverConfig) -> Approval;
}

/// 按配置审批：auto_approve 且不要求人工审批时通过，否则挂起
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigApproval;

#[async_trait]
impl ApprovalGate for ConfigApproval {
    async fn review(&self, _proposal: &EvolutionProposal, config: &EvolverConfig) -> Approval {
        if config.auto_approve && !config.require_manual_approval {
            Approval::Approved
        } else {
            Approval::Pending
        }
    }
}

pub struct EvolutionLoop {
    bus: Arc<EventBus>,
    engine: Arc<EvolutionEngine>,
    analyzer: SystemAnalyzer,
    proposer: EvolutionProposer,
    implementer: EvolutionImplementer,
    validator: EvolutionValidator,
    cycles: Option<Arc<dyn CycleStore>>,
}

impl EvolutionLoop {
    pub fn new(
        bus: Arc<EventBus>,
        engine: Arc<EvolutionEngine>,
        changes: Arc<dyn ChangeStore>,
    ) -> Self {
        Self {
            analyzer: SystemAnalyzer::new(bus.clone()),
            proposer: EvolutionProposer::new(bus.clone()),
            implementer: EvolutionImplementer::new(bus.clone(), changes),
            validator: EvolutionValidator::new(bus.clone()),
            bus,
            engine,
            cycles: None,
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.proposer = EvolutionProposer::new(self.bus.clone()).with_llm(llm);
        self
    }

    pub fn with_analyzer(mut self, analyzer: SystemAnalyzer) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn with_validator(mut self, validator: EvolutionValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_cycle_store(mut self, store: Arc<dyn CycleStore>) -> Self {
        self.cycles = Some(store);
        self
    }

    pub fn engine(&self) -> &Arc<EvolutionEngine> {
        &self.engine
    }

    /// 执行一个完整周期；任何阶段失败都体现在返回的周期记录里，不返回 Err
    pub async fn run_cycle(&self, state: &SystemState, gate: &dyn ApprovalGate) -> EvolutionCycle {
        let config = self.engine.snapshot();
        let mut cycle = EvolutionCycle::new(Uuid::new_v4().to_string());
        cycle.log(LogLevel::Info, "Evolution cycle started");
        tracing::info!(cycle_id = %cycle.id, "Evolution cycle started");

        self.bus
            .publish(NewEvent::new(
                SOURCE,
                EventPayload::CycleStart {
                    cycle_id: cycle.id.clone(),
                },
            ))
            .await;
        if let Some(store) = &self.cycles {
            if let Err(e) = store.create_cycle(&cycle).await {
                tracing::warn!(cycle_id = %cycle.id, "Failed to persist new cycle: {}", e);
            }
        }

        // 分析
        let analysis = self.analyzer.analyze_system(state).await;
        cycle.log(
            LogLevel::Info,
            format!(
                "Analysis complete: {} issue(s), {} opportunity(ies)",
                analysis.issues.len(),
                analysis.opportunities.len()
            ),
        );

        // 提案 + 准入
        cycle.status = CycleStatus::Proposing;
        let generated = self
            .proposer
            .generate_proposals(&analysis, config.max_proposals_per_cycle)
            .await;
        let generated_count = generated.len();
        cycle.analysis = Some(analysis);
        cycle.proposals = EvolutionEngine::admit(&config, generated);
        cycle.log(
            LogLevel::Info,
            format!(
                "{} proposal(s) generated, {} admitted",
                generated_count,
                cycle.proposals.len()
            ),
        );

        // 审批：第一个通过的提案进入实现
        let mut selected = None;
        for index in 0..cycle.proposals.len() {
            match gate.review(&cycle.proposals[index], &config).await {
                Approval::Approved => {
                    cycle.proposals[index].status = ProposalStatus::Approved;
                    let proposal_id = cycle.proposals[index].id.clone();
                    cycle.log(LogLevel::Info, format!("Proposal approved: {}", cycle.proposals[index].title));
                    self.bus
                        .publish(NewEvent::new(SOURCE, EventPayload::ProposalApproved { proposal_id }))
                        .await;
                    selected = Some(index);
                    break;
                }
                Approval::Rejected(reason) => {
                    cycle.proposals[index].status = ProposalStatus::Rejected;
                    let proposal_id = cycle.proposals[index].id.clone();
                    cycle.log(
                        LogLevel::Info,
                        format!("Proposal rejected: {} ({})", cycle.proposals[index].title, reason),
                    );
                    self.bus
                        .publish(NewEvent::new(
                            SOURCE,
                            EventPayload::ProposalRejected { proposal_id, reason },
                        ))
                        .await;
                }
                Approval::Pending => {}
            }
        }

        let Some(index) = selected else {
            cycle.log(LogLevel::Info, "No proposal approved; cycle ends after proposing");
            return self.finish(cycle).await;
        };

        // 实现
        cycle.status = CycleStatus::Implementing;
        cycle.proposals[index].status = ProposalStatus::Implementing;
        let mut implementation = self.implementer.implement_proposal(&cycle.proposals[index]).await;
        if implementation.status == ImplementationStatus::Failed {
            cycle.implementation = Some(implementation);
            return self.fail(cycle, "Implementation failed".to_string()).await;
        }
        if !self.implementer.apply_changes(&mut implementation).await {
            // 部分写入需要回滚
            if implementation.rollback_data.is_some() {
                if self
                    .implementer
                    .revert_changes(&mut implementation, Some("Apply failed".to_string()))
                    .await
                {
                    cycle.proposals[index].status = ProposalStatus::Reverted;
                    cycle.log(LogLevel::Warning, "Partially applied changes reverted");
                } else {
                    cycle.log(LogLevel::Error, "Failed to revert partially applied changes");
                }
            }
            cycle.implementation = Some(implementation);
            return self.fail(cycle, "Failed to apply changes".to_string()).await;
        }
        cycle.log(
            LogLevel::Info,
            format!("Applied {} change(s)", implementation.changes.len()),
        );

        // 测试
        cycle.status = CycleStatus::Testing;
        cycle.proposals[index].status = ProposalStatus::Testing;
        let test = self.validator.run_tests(&implementation).await;
        cycle.log(
            LogLevel::Info,
            format!("{}/{} tests passed", test.pass_count(), test.results.len()),
        );

        // 决策
        cycle.status = CycleStatus::Deciding;
        let decision = self
            .validator
            .make_decision(&test, config.decision_policy())
            .await;
        cycle.test = Some(test);
        cycle.log(
            LogLevel::Info,
            format!(
                "Decision: {:?} ({:.1}% confidence)",
                decision.decision, decision.confidence
            ),
        );

        let outcome = decision.decision;
        cycle.decision = Some(decision);
        match outcome {
            Decision::Accept => cycle.proposals[index].status = ProposalStatus::Complete,
            Decision::Adjust => {
                cycle.proposals[index].status = ProposalStatus::Complete;
                cycle.log(LogLevel::Warning, "Changes kept; adjustments required");
            }
            Decision::Revert => {
                let reverted = self
                    .implementer
                    .revert_changes(&mut implementation, Some("Tests failed".to_string()))
                    .await;
                cycle.implementation = Some(implementation);
                if !reverted {
                    return self.fail(cycle, "Failed to revert changes".to_string()).await;
                }
                cycle.proposals[index].status = ProposalStatus::Reverted;
                cycle.log(LogLevel::Info, "Changes reverted");
                return self.finish(cycle).await;
            }
        }

        cycle.implementation = Some(implementation);
        self.finish(cycle).await
    }

    async fn finish(&self, mut cycle: EvolutionCycle) -> EvolutionCycle {
        cycle.status = CycleStatus::Complete;
        cycle.end_time = Some(Utc::now());
        cycle.log(LogLevel::Info, "Evolution cycle complete");
        tracing::info!(cycle_id = %cycle.id, "Evolution cycle complete");

        self.bus
            .publish(NewEvent::new(
                SOURCE,
                EventPayload::CycleComplete {
                    cycle_id: cycle.id.clone(),
                    status: cycle.status,
                },
            ))
            .await;
        self.persist(&cycle).await;
        cycle
    }

    /// 日志记在失败发生的阶段，之后再标记 failed
    async fn fail(&self, mut cycle: EvolutionCycle, error: String) -> EvolutionCycle {
        cycle.log(LogLevel::Error, error.clone());
        cycle.status = CycleStatus::Failed;
        cycle.end_time = Some(Utc::now());
        tracing::error!(cycle_id = %cycle.id, "Evolution cycle failed: {}", error);

        self.bus
            .publish(NewEvent::new(
                SOURCE,
                EventPayload::CycleFailed {
                    cycle_id: cycle.id.clone(),
                    error,
                },
            ))
            .await;
        self.persist(&cycle).await;
        cycle
    }

    async fn persist(&self, cycle: &EvolutionCycle) {
        if let Some(store) = &self.cycles {
            if let Err(e) = store.update_cycle(cycle).await {
                tracing::warn!(cycle_id = %cycle.id, "Failed to persist cycle: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventType, HistoryFilter};
    use crate::evolution::store::{InMemoryChangeStore, InMemoryCycleStore};

    fn engine(auto_approve: bool, manual: bool) -> Arc<EvolutionEngine> {
        let mut config = EvolverConfig::default();
        config.auto_approve = auto_approve;
        config.require_manual_approval = manual;
        Arc::new(EvolutionEngine::new(config).unwrap())
    }

    #[tokio::test]
    async fn test_config_approval() {
        let proposal_config = |auto, manual| EvolverConfig {
            auto_approve: auto,
            require_manual_approval: manual,
            ..EvolverConfig::default()
        };
        let proposal = {
            let bus = Arc::new(EventBus::new());
            let analysis = SystemAnalyzer::new(bus.clone())
                .analyze_system(&SystemState::default())
                .await;
            EvolutionProposer::new(bus)
                .generate_proposals(&analysis, 1)
                .await
                .remove(0)
        };

        let gate = ConfigApproval;
        assert_eq!(gate.review(&proposal, &proposal_config(true, false)).await, Approval::Approved);
        assert_eq!(gate.review(&proposal, &proposal_config(true, true)).await, Approval::Pending);
        assert_eq!(gate.review(&proposal, &proposal_config(false, false)).await, Approval::Pending);
    }

    #[tokio::test]
    async fn test_pending_cycle_completes_after_proposing() {
        let bus = Arc::new(EventBus::new());
        let cycles = Arc::new(InMemoryCycleStore::new());
        let evolution_loop = EvolutionLoop::new(bus.clone(), engine(false, true), Arc::new(InMemoryChangeStore::new()))
            .with_cycle_store(cycles.clone());

        let cycle = evolution_loop.run_cycle(&SystemState::default(), &ConfigApproval).await;

        assert_eq!(cycle.status, CycleStatus::Complete);
        assert!(!cycle.proposals.is_empty());
        assert!(cycle.proposals.iter().all(|p| p.status == ProposalStatus::Proposed));
        assert!(cycle.implementation.is_none());
        assert!(bus
            .query_history(&HistoryFilter::new().event_type(EventType::ImplementationStart))
            .is_empty());
        assert_eq!(cycles.get(&cycle.id).await.unwrap(), cycle);
    }

    #[tokio::test]
    async fn test_auto_approved_cycle_accepts() {
        let bus = Arc::new(EventBus::new());
        let changes = Arc::new(InMemoryChangeStore::new());
        let evolution_loop = EvolutionLoop::new(bus.clone(), engine(true, false), changes.clone());

        let cycle = evolution_loop.run_cycle(&SystemState::default(), &ConfigApproval).await;

        assert_eq!(cycle.status, CycleStatus::Complete);
        assert_eq!(cycle.proposals[0].status, ProposalStatus::Complete);
        assert_eq!(cycle.decision.as_ref().unwrap().decision, Decision::Accept);
        assert!(cycle.implementation.as_ref().unwrap().changes.iter().all(|c| c.applied));
        assert!(!changes.snapshot().await.is_empty());

        let first = bus.query_history(&HistoryFilter::new()).first().unwrap().event_type();
        let last = bus.query_history(&HistoryFilter::new()).last().unwrap().event_type();
        assert_eq!(first, EventType::CycleStart);
        assert_eq!(last, EventType::CycleComplete);
    }
}
