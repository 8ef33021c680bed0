//! 事件目录：事件类型与按类型区分的强类型负载
//!
//! `EventPayload` 的每个变体对应一个 `EventType`，订阅按 `EventType` 进行，消费方直接 match 负载，无需转换。

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::evolution::types::{
    CycleStatus, EvolutionAnalysis, EvolutionDecision, EvolutionImplementation, EvolutionProposal,
    EvolutionTest,
};

/// 事件类型（订阅键）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    AnalysisStart,
    AnalysisComplete,
    ProposalStart,
    ProposalComplete,
    ProposalApproved,
    ProposalRejected,
    ImplementationStart,
    ImplementationComplete,
    ImplementationFailed,
    ChangesApplying,
    ChangesApplied,
    ChangesReverting,
    ChangesReverted,
    ChangesFailed,
    TestingStart,
    TestingComplete,
    DecisionMade,
    CycleStart,
    CycleComplete,
    CycleFailed,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| format!("{:?}", self));
        f.write_str(&name)
    }
}

/// 变更操作（apply / revert），用于 ChangesFailed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeOperation {
    Apply,
    Revert,
}

/// 事件负载：以 `type` 为标签、`data` 为内容序列化
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum EventPayload {
    AnalysisStart {
        agent_count: usize,
        task_count: usize,
        module_count: usize,
    },
    AnalysisComplete {
        analysis: Box<EvolutionAnalysis>,
    },
    ProposalStart {
        analysis_id: String,
        max_proposals: usize,
    },
    ProposalComplete {
        analysis_id: String,
        proposals: Vec<EvolutionProposal>,
    },
    ProposalApproved {
        proposal_id: String,
    },
    ProposalRejected {
        proposal_id: String,
        reason: String,
    },
    ImplementationStart {
        proposal_id: String,
        file_count: usize,
    },
    ImplementationComplete {
        implementation: Box<EvolutionImplementation>,
    },
    ImplementationFailed {
        proposal_id: String,
        error: String,
        implementation: Box<EvolutionImplementation>,
    },
    ChangesApplying {
        implementation_id: String,
        files: Vec<String>,
    },
    ChangesApplied {
        implementation_id: String,
        files: Vec<String>,
    },
    ChangesReverting {
        implementation_id: String,
        reason: Option<String>,
    },
    ChangesReverted {
        implementation_id: String,
        files: Vec<String>,
    },
    ChangesFailed {
        implementation_id: String,
        operation: ChangeOperation,
        error: String,
    },
    TestingStart {
        implementation_id: String,
    },
    TestingComplete {
        test: Box<EvolutionTest>,
    },
    DecisionMade {
        decision: Box<EvolutionDecision>,
    },
    CycleStart {
        cycle_id: String,
    },
    CycleComplete {
        cycle_id: String,
        status: CycleStatus,
    },
    CycleFailed {
        cycle_id: String,
        error: String,
    },
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::AnalysisStart { .. } => EventType::AnalysisStart,
            EventPayload::AnalysisComplete { .. } => EventType::AnalysisComplete,
            EventPayload::ProposalStart { .. } => EventType::ProposalStart,
            EventPayload::ProposalComplete { .. } => EventType::ProposalComplete,
            EventPayload::ProposalApproved { .. } => EventType::ProposalApproved,
            EventPayload::ProposalRejected { .. } => EventType::ProposalRejected,
            EventPayload::ImplementationStart { .. } => EventType::ImplementationStart,
            EventPayload::ImplementationComplete { .. } => EventType::ImplementationComplete,
            EventPayload::ImplementationFailed { .. } => EventType::ImplementationFailed,
            EventPayload::ChangesApplying { .. } => EventType::ChangesApplying,
            EventPayload::ChangesApplied { .. } => EventType::ChangesApplied,
            EventPayload::ChangesReverting { .. } => EventType::ChangesReverting,
            EventPayload::ChangesReverted { .. } => EventType::ChangesReverted,
            EventPayload::ChangesFailed { .. } => EventType::ChangesFailed,
            EventPayload::TestingStart { .. } => EventType::TestingStart,
            EventPayload::TestingComplete { .. } => EventType::TestingComplete,
            EventPayload::DecisionMade { .. } => EventType::DecisionMade,
            EventPayload::CycleStart { .. } => EventType::CycleStart,
            EventPayload::CycleComplete { .. } => EventType::CycleComplete,
            EventPayload::CycleFailed { .. } => EventType::CycleFailed,
        }
    }
}

/// 事件关联信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub correlation_id: Option<String>,
}

/// 已发布事件（创建后不可变）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EventMetadata>,
}

impl Event {
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }
}

/// 待发布事件（时间戳由总线在 publish 时赋值）
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub source: String,
    pub target: Option<String>,
    pub payload: EventPayload,
    pub metadata: Option<EventMetadata>,
}

impl NewEvent {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            source: source.into(),
            target: None,
            payload,
            metadata: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub(crate) fn stamp(self, timestamp: DateTime<Utc>) -> Event {
        Event {
            source: self.source,
            target: self.target,
            timestamp,
            payload: self.payload,
            metadata: self.metadata,
        }
    }
}
