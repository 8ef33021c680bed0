use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::events::{EventBus, EventPayload, NewEvent};
use crate::evolution::types::{
    AgentSnapshot, AgentStatus, AnalysisStatus, EvolutionAnalysis, Impact, Issue, IssueType,
    LogLevel, Opportunity, OpportunityType, Severity, SystemSnapshot, SystemState, TaskSnapshot,
    TaskStatus, METRIC_ACTIVE_AGENTS, METRIC_AVG_AGENT_PERFORMANCE, METRIC_AVG_LEARNING_RATE,
    METRIC_TASK_COMPLETION_RATE,
};

const SOURCE: &str = "system-analyzer";

/// 错误日志最多保留条数
const MAX_ERROR_LOGS: usize = 20;

/// 检测器看到的合并视图（agents ∪ ai_agents，tasks ∪ ai_tasks）
pub struct AnalysisContext<'a> {
    pub agents: Vec<&'a AgentSnapshot>,
    pub tasks: Vec<&'a TaskSnapshot>,
    pub now: DateTime<Utc>,
}

/// 问题检测器：每个检测器最多产出一个 Issue，仅在触发时产出
pub trait IssueDetector: Send + Sync {
    fn detect(&self, ctx: &AnalysisContext<'_>) -> Option<Issue>;
}

/// 表现低于阈值的 Agent
pub struct PerformanceDegradationDetector {
    pub threshold: f64,
}

impl Default for PerformanceDegradationDetector {
    fn default() -> Self {
        Self { threshold: 50.0 }
    }
}

impl IssueDetector for PerformanceDegradationDetector {
    fn detect(&self, ctx: &AnalysisContext<'_>) -> Option<Issue> {
        let low = ctx
            .agents
            .iter()
            .filter(|a| a.performance < self.threshold)
            .count();
        if low == 0 {
            return None;
        }
        Some(Issue {
            id: Uuid::new_v4().to_string(),
            issue_type: IssueType::Performance,
            severity: Severity::Medium,
            title: "Agent performance degradation".to_string(),
            description: format!(
                "{} agent(s) performing below {:.0}%",
                low, self.threshold
            ),
            affected_modules: vec!["agents".to_string()],
            detected_at: ctx.now,
        })
    }
}

/// 长时间停留在进行中的任务
pub struct StuckTaskDetector {
    pub max_age: Duration,
}

impl Default for StuckTaskDetector {
    fn default() -> Self {
        Self {
            max_age: Duration::hours(24),
        }
    }
}

impl IssueDetector for StuckTaskDetector {
    fn detect(&self, ctx: &AnalysisContext<'_>) -> Option<Issue> {
        let stuck = ctx
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::InProgress && ctx.now - t.created_at > self.max_age)
            .count();
        if stuck == 0 {
            return None;
        }
        Some(Issue {
            id: Uuid::new_v4().to_string(),
            issue_type: IssueType::Bug,
            severity: Severity::High,
            title: "Stuck tasks detected".to_string(),
            description: format!(
                "{} task(s) in progress for more than {} hours",
                stuck,
                self.max_age.num_hours()
            ),
            affected_modules: vec!["tasks".to_string()],
            detected_at: ctx.now,
        })
    }
}

/// 系统分析器：读取状态快照，产出问题与机会列表
pub struct SystemAnalyzer {
    bus: Arc<EventBus>,
    detectors: Vec<Box<dyn IssueDetector>>,
}

impl SystemAnalyzer {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            detectors: vec![
                Box::new(PerformanceDegradationDetector::default()),
                Box::new(StuckTaskDetector::default()),
            ],
        }
    }

    /// 追加检测器（在内置检测器之后执行）
    pub fn with_detector(mut self, detector: impl IssueDetector + 'static) -> Self {
        self.detectors.push(Box::new(detector));
        self
    }

    pub async fn analyze_system(&self, state: &SystemState) -> EvolutionAnalysis {
        self.analyze_system_at(state, Utc::now()).await
    }

    /// 以给定时间作为“当前时间”分析（任务年龄据此计算）
    pub async fn analyze_system_at(&self, state: &SystemState, now: DateTime<Utc>) -> EvolutionAnalysis {
        let ctx = AnalysisContext {
            agents: state.agents.iter().chain(state.ai_agents.iter()).collect(),
            tasks: state.tasks.iter().chain(state.ai_tasks.iter()).collect(),
            now,
        };

        self.bus
            .publish(NewEvent::new(
                SOURCE,
                EventPayload::AnalysisStart {
                    agent_count: ctx.agents.len(),
                    task_count: ctx.tasks.len(),
                    module_count: state.active_modules.len(),
                },
            ))
            .await;

        let system_state = self.snapshot(state, &ctx);
        let issues: Vec<Issue> = self
            .detectors
            .iter()
            .filter_map(|d| d.detect(&ctx))
            .collect();
        let opportunities = self.find_opportunities(&system_state, &issues);

        let analysis = EvolutionAnalysis {
            id: Uuid::new_v4().to_string(),
            timestamp: now,
            system_state,
            issues,
            opportunities,
            status: AnalysisStatus::Complete,
        };

        tracing::info!(
            analysis_id = %analysis.id,
            issues = analysis.issues.len(),
            opportunities = analysis.opportunities.len(),
            "System analysis complete"
        );

        self.bus
            .publish(NewEvent::new(
                SOURCE,
                EventPayload::AnalysisComplete {
                    analysis: Box::new(analysis.clone()),
                },
            ))
            .await;

        analysis
    }

    fn snapshot(&self, state: &SystemState, ctx: &AnalysisContext<'_>) -> SystemSnapshot {
        let total_tasks = ctx.tasks.len();
        let completed = ctx
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .count();
        let task_completion_rate = if total_tasks > 0 {
            completed as f64 / total_tasks as f64 * 100.0
        } else {
            0.0
        };

        let agent_count = ctx.agents.len();
        let (avg_performance, avg_learning_rate) = if agent_count > 0 {
            let n = agent_count as f64;
            (
                ctx.agents.iter().map(|a| a.performance).sum::<f64>() / n,
                ctx.agents.iter().map(|a| a.learning_rate).sum::<f64>() / n,
            )
        } else {
            (0.0, 0.0)
        };
        let active_agents = ctx
            .agents
            .iter()
            .filter(|a| a.status != AgentStatus::Idle)
            .count();

        let mut performance_metrics = BTreeMap::new();
        performance_metrics.insert(METRIC_TASK_COMPLETION_RATE.to_string(), task_completion_rate);
        performance_metrics.insert(METRIC_AVG_AGENT_PERFORMANCE.to_string(), avg_performance);
        performance_metrics.insert(METRIC_AVG_LEARNING_RATE.to_string(), avg_learning_rate);
        performance_metrics.insert(METRIC_ACTIVE_AGENTS.to_string(), active_agents as f64);

        let mut error_logs: Vec<String> = state
            .evolutions
            .iter()
            .flat_map(|c| c.logs.iter())
            .filter(|l| l.level == LogLevel::Error)
            .map(|l| l.message.clone())
            .collect();
        if error_logs.len() > MAX_ERROR_LOGS {
            error_logs.drain(..error_logs.len() - MAX_ERROR_LOGS);
        }

        SystemSnapshot {
            module_count: state.active_modules.len(),
            agent_count,
            active_modules: state.active_modules.clone(),
            performance_metrics,
            error_logs,
            test_coverage: state.test_coverage.unwrap_or(0.0),
        }
    }

    fn find_opportunities(&self, snapshot: &SystemSnapshot, issues: &[Issue]) -> Vec<Opportunity> {
        let mut opportunities = Vec::new();

        if snapshot.metric(METRIC_AVG_LEARNING_RATE) < 0.5 {
            opportunities.push(Opportunity {
                id: Uuid::new_v4().to_string(),
                opportunity_type: OpportunityType::Optimization,
                impact: Impact::High,
                title: "Improve agent learning efficiency".to_string(),
                description: format!(
                    "Average learning rate is {:.2}; adaptive learning schedules could raise it",
                    snapshot.metric(METRIC_AVG_LEARNING_RATE)
                ),
                potential_benefit: "Faster agent adaptation and higher task success".to_string(),
            });
        }

        opportunities.push(Opportunity {
            id: Uuid::new_v4().to_string(),
            opportunity_type: OpportunityType::Integration,
            impact: Impact::Medium,
            title: "Unified agent dashboard".to_string(),
            description: "Provide a single cross-agent view of status, tasks and performance"
                .to_string(),
            potential_benefit: "Better visibility and coordination across agents".to_string(),
        });

        if issues.len() > 5 {
            opportunities.push(Opportunity {
                id: Uuid::new_v4().to_string(),
                opportunity_type: OpportunityType::NewFeature,
                impact: Impact::High,
                title: "Autonomous issue resolution".to_string(),
                description: format!(
                    "{} issues detected in one analysis; resolve recurring ones automatically",
                    issues.len()
                ),
                potential_benefit: "Less manual intervention and faster recovery".to_string(),
            });
        }

        opportunities
    }
}
