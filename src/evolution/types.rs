//! 进化流水线数据契约
//!
//! 所有实体与数据服务之间以 JSON（camelCase 字段、kebab-case 枚举值、ISO-8601 时间戳）往返。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// 分析输入：系统状态快照
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentStatus {
    Idle,
    Active,
    Learning,
    Error,
}

/// Agent 状态快照（普通 Agent 与 AI Agent 共用）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSnapshot {
    pub id: String,
    pub name: String,
    pub status: AgentStatus,
    /// 0-100
    pub performance: f64,
    /// 0-1
    pub learning_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
}

/// 一次分析所需的全部输入
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SystemState {
    pub agents: Vec<AgentSnapshot>,
    pub tasks: Vec<TaskSnapshot>,
    /// 历史进化周期，用于提取错误日志
    pub evolutions: Vec<EvolutionCycle>,
    pub ai_agents: Vec<AgentSnapshot>,
    pub ai_tasks: Vec<TaskSnapshot>,
    pub active_modules: Vec<String>,
    pub test_coverage: Option<f64>,
}

// ============================================================================
// 分析
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisStatus {
    Analyzing,
    Complete,
    Failed,
}

/// 性能指标键
pub const METRIC_TASK_COMPLETION_RATE: &str = "taskCompletionRate";
pub const METRIC_AVG_AGENT_PERFORMANCE: &str = "avgAgentPerformance";
pub const METRIC_AVG_LEARNING_RATE: &str = "avgLearningRate";
pub const METRIC_ACTIVE_AGENTS: &str = "activeAgents";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemSnapshot {
    pub module_count: usize,
    pub agent_count: usize,
    pub active_modules: Vec<String>,
    pub performance_metrics: BTreeMap<String, f64>,
    pub error_logs: Vec<String>,
    pub test_coverage: f64,
}

impl SystemSnapshot {
    pub fn metric(&self, key: &str) -> f64 {
        self.performance_metrics.get(key).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvolutionAnalysis {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub system_state: SystemSnapshot,
    pub issues: Vec<Issue>,
    pub opportunities: Vec<Opportunity>,
    pub status: AnalysisStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueType {
    Bug,
    Performance,
    Redundancy,
    MissingFeature,
    TechnicalDebt,
}

/// 严重度，声明顺序即排序：Critical > High > Medium > Low
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub id: String,
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub affected_modules: Vec<String>,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OpportunityType {
    Optimization,
    NewFeature,
    Refactor,
    Integration,
}

/// 影响度：High > Medium > Low
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Impact {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Opportunity {
    pub id: String,
    #[serde(rename = "type")]
    pub opportunity_type: OpportunityType,
    pub impact: Impact,
    pub title: String,
    pub description: String,
    pub potential_benefit: String,
}

// ============================================================================
// 提案
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProposalType {
    CreateModule,
    ModifyModule,
    CreateAgent,
    ModifyAgent,
    Optimize,
    Remove,
}

impl ProposalType {
    pub const ALL: [ProposalType; 6] = [
        ProposalType::CreateModule,
        ProposalType::ModifyModule,
        ProposalType::CreateAgent,
        ProposalType::ModifyAgent,
        ProposalType::Optimize,
        ProposalType::Remove,
    ];
}

impl From<IssueType> for ProposalType {
    fn from(t: IssueType) -> Self {
        match t {
            IssueType::Bug => ProposalType::ModifyModule,
            IssueType::Performance => ProposalType::Optimize,
            IssueType::Redundancy => ProposalType::Optimize,
            IssueType::MissingFeature => ProposalType::CreateModule,
            IssueType::TechnicalDebt => ProposalType::ModifyModule,
        }
    }
}

impl From<OpportunityType> for ProposalType {
    fn from(t: OpportunityType) -> Self {
        match t {
            OpportunityType::Optimization => ProposalType::Optimize,
            OpportunityType::NewFeature => ProposalType::CreateModule,
            OpportunityType::Refactor => ProposalType::ModifyModule,
            OpportunityType::Integration => ProposalType::ModifyModule,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProposalStatus {
    Proposed,
    Approved,
    Rejected,
    Implementing,
    Testing,
    Complete,
    Reverted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileAction {
    Create,
    Modify,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedFile {
    pub path: String,
    pub action: FileAction,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedInterface {
    pub name: String,
    pub methods: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImplementationPlan {
    pub files: Vec<ProposedFile>,
    pub dependencies: Vec<String>,
    pub interfaces: Vec<ProposedInterface>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvolutionProposal {
    pub id: String,
    pub analysis_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub proposal_type: ProposalType,
    pub title: String,
    pub description: String,
    pub target_modules: Vec<String>,
    pub implementation: ImplementationPlan,
    pub estimated_impact: String,
    pub risks: Vec<String>,
    pub status: ProposalStatus,
}

// ============================================================================
// 实现
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImplementationStatus {
    Scaffolding,
    Complete,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeChange {
    pub id: String,
    pub file: String,
    pub change_type: FileAction,
    pub description: String,
    pub preview: String,
    #[serde(default)]
    pub applied: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedCode {
    pub file: String,
    pub content: String,
    pub purpose: String,
}

/// 回滚前的文件内容；content 为 None 表示该文件原本不存在
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupFile {
    pub path: String,
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackData {
    pub timestamp: DateTime<Utc>,
    pub backup_files: Vec<BackupFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvolutionImplementation {
    pub id: String,
    pub proposal_id: String,
    pub timestamp: DateTime<Utc>,
    pub changes: Vec<CodeChange>,
    pub status: ImplementationStatus,
    pub generated_code: Vec<GeneratedCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_data: Option<RollbackData>,
}

impl EvolutionImplementation {
    /// 某个变更对应的生成内容
    pub fn content_for(&self, file: &str) -> Option<&str> {
        self.generated_code
            .iter()
            .find(|g| g.file == file)
            .map(|g| g.content.as_str())
    }
}

// ============================================================================
// 测试与决策
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestStatus {
    Pass,
    Fail,
    Skip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub id: String,
    pub name: String,
    pub status: TestStatus,
    /// 毫秒
    pub duration: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverallStatus {
    Passing,
    Failing,
    Partial,
}

impl OverallStatus {
    /// 全部通过 → Passing；无一通过（含空结果）→ Failing；否则 Partial
    pub fn derive(results: &[TestResult]) -> Self {
        let passed = results
            .iter()
            .filter(|r| r.status == TestStatus::Pass)
            .count();
        if passed == 0 {
            OverallStatus::Failing
        } else if passed == results.len() {
            OverallStatus::Passing
        } else {
            OverallStatus::Partial
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvolutionTest {
    pub id: String,
    pub implementation_id: String,
    pub timestamp: DateTime<Utc>,
    pub test_type: String,
    pub results: Vec<TestResult>,
    pub overall_status: OverallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage_delta: Option<f64>,
}

impl EvolutionTest {
    pub fn pass_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == TestStatus::Pass)
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Decision {
    Accept,
    Revert,
    Adjust,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Implementer {
    Evolver,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvolutionDecision {
    pub id: String,
    pub test_id: String,
    pub timestamp: DateTime<Utc>,
    pub decision: Decision,
    pub reasoning: Vec<String>,
    /// 0-100
    pub confidence: f64,
    pub manual_override: bool,
    pub implemented_by: Implementer,
}

// ============================================================================
// 周期与配置
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CycleStatus {
    Analyzing,
    Proposing,
    Implementing,
    Testing,
    Deciding,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleLog {
    pub timestamp: DateTime<Utc>,
    pub phase: CycleStatus,
    pub message: String,
    pub level: LogLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvolutionCycle {
    pub id: String,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub status: CycleStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<EvolutionAnalysis>,
    #[serde(default)]
    pub proposals: Vec<EvolutionProposal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implementation: Option<EvolutionImplementation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<EvolutionTest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<EvolutionDecision>,
    #[serde(default)]
    pub logs: Vec<CycleLog>,
}

impl EvolutionCycle {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            start_time: Utc::now(),
            end_time: None,
            status: CycleStatus::Analyzing,
            analysis: None,
            proposals: Vec::new(),
            implementation: None,
            test: None,
            decision: None,
            logs: Vec::new(),
        }
    }

    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        self.logs.push(CycleLog {
            timestamp: Utc::now(),
            phase: self.status,
            message: message.into(),
            level,
        });
    }
}

/// Evolver 全局配置：周期开始时读取，周期内只读
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EvolverConfig {
    pub auto_approve: bool,
    pub max_proposals_per_cycle: usize,
    /// 0-100
    pub confidence_threshold: f64,
    pub enabled_proposal_types: Vec<ProposalType>,
    /// 永远不能成为提案目标的模块
    pub protected_modules: Vec<String>,
    pub require_manual_approval: bool,
}

impl Default for EvolverConfig {
    fn default() -> Self {
        Self {
            auto_approve: false,
            max_proposals_per_cycle: 3,
            confidence_threshold: 80.0,
            enabled_proposal_types: ProposalType::ALL.to_vec(),
            protected_modules: vec!["core".to_string(), "events".to_string()],
            require_manual_approval: true,
        }
    }
}

/// 数据服务汇总指标
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    pub total_cycles: usize,
    pub successful_cycles: usize,
    pub failed_cycles: usize,
    /// 0-100
    pub success_rate: f64,
    pub average_confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_cycle_at: Option<DateTime<Utc>>,
}

impl SystemMetrics {
    /// 从周期历史在本地计算；成功 = 完成且决策为 accept
    pub fn from_cycles(cycles: &[EvolutionCycle]) -> Self {
        let total_cycles = cycles.len();
        let successful_cycles = cycles
            .iter()
            .filter(|c| {
                c.status == CycleStatus::Complete
                    && c.decision.as_ref().map(|d| d.decision) == Some(Decision::Accept)
            })
            .count();
        let failed_cycles = cycles
            .iter()
            .filter(|c| c.status == CycleStatus::Failed)
            .count();

        let confidences: Vec<f64> = cycles
            .iter()
            .filter_map(|c| c.decision.as_ref().map(|d| d.confidence))
            .collect();
        let average_confidence = if confidences.is_empty() {
            0.0
        } else {
            confidences.iter().sum::<f64>() / confidences.len() as f64
        };

        let success_rate = if total_cycles > 0 {
            successful_cycles as f64 / total_cycles as f64 * 100.0
        } else {
            0.0
        };

        Self {
            total_cycles,
            successful_cycles,
            failed_cycles,
            success_rate,
            average_confidence,
            last_cycle_at: cycles.iter().map(|c| c.start_time).max(),
        }
    }
}
