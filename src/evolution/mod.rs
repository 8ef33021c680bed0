//! 进化流水线：分析 → 提案 → 实现 → 验证 → 决策

pub mod analyzer;
pub mod engine;
pub mod implementer;
pub mod loop_;
pub mod proposer;
pub mod store;
pub mod types;
pub mod validator;

pub use analyzer::{
    AnalysisContext, IssueDetector, PerformanceDegradationDetector, StuckTaskDetector,
    SystemAnalyzer,
};
pub use engine::EvolutionEngine;
pub use implementer::EvolutionImplementer;
pub use loop_::{Approval, ApprovalGate, ConfigApproval, EvolutionLoop};
pub use proposer::EvolutionProposer;
pub use store::{ChangeStore, CycleStore, FsChangeStore, InMemoryChangeStore, InMemoryCycleStore};
pub use types::{
    EvolutionAnalysis, EvolutionCycle, EvolutionDecision, EvolutionImplementation,
    EvolutionProposal, EvolutionTest, EvolverConfig, SystemMetrics, SystemState,
};
pub use validator::{DecisionPolicy, EvolutionValidator, PerformanceProbe, SyntheticProbe};
