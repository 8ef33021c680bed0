use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::events::{EventBus, EventPayload, NewEvent};
use crate::evolution::types::{
    EvolutionAnalysis, EvolutionProposal, FileAction, ImplementationPlan, Issue, IssueType,
    Opportunity, OpportunityType, ProposalStatus, ProposalType, ProposedFile, ProposedInterface,
};
use crate::llm::{extract_code_block, LlmClient, Message};

const SOURCE: &str = "evolution-proposer";

/// 每个周期最多从问题中选取的提案数
const MAX_ISSUE_PROPOSALS: usize = 2;

/// 模板类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TemplateCategory {
    Optimization,
    NewFeature,
    Refactor,
    Other,
}

impl From<IssueType> for TemplateCategory {
    fn from(t: IssueType) -> Self {
        match t {
            IssueType::Performance | IssueType::Redundancy => TemplateCategory::Optimization,
            IssueType::MissingFeature => TemplateCategory::NewFeature,
            IssueType::TechnicalDebt => TemplateCategory::Refactor,
            IssueType::Bug => TemplateCategory::Other,
        }
    }
}

impl From<OpportunityType> for TemplateCategory {
    fn from(t: OpportunityType) -> Self {
        match t {
            OpportunityType::Optimization => TemplateCategory::Optimization,
            OpportunityType::NewFeature => TemplateCategory::NewFeature,
            OpportunityType::Refactor => TemplateCategory::Refactor,
            OpportunityType::Integration => TemplateCategory::Other,
        }
    }
}

/// 提案来源：一个问题或一个机会
enum Source<'a> {
    Issue(&'a Issue),
    Opportunity(&'a Opportunity),
}

impl Source<'_> {
    fn title(&self) -> &str {
        match self {
            Source::Issue(i) => &i.title,
            Source::Opportunity(o) => &o.title,
        }
    }

    fn description(&self) -> &str {
        match self {
            Source::Issue(i) => &i.description,
            Source::Opportunity(o) => &o.description,
        }
    }

    fn category(&self) -> TemplateCategory {
        match self {
            Source::Issue(i) => i.issue_type.into(),
            Source::Opportunity(o) => o.opportunity_type.into(),
        }
    }

    fn proposal_type(&self) -> ProposalType {
        match self {
            Source::Issue(i) => i.issue_type.into(),
            Source::Opportunity(o) => o.opportunity_type.into(),
        }
    }
}

/// 标题 → 模块名（小写、下划线分隔）
pub(crate) fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut last_sep = true;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_sep = false;
        } else if !last_sep {
            slug.push('_');
            last_sep = true;
        }
    }
    let slug = slug.trim_end_matches('_').to_string();
    if slug.is_empty() {
        "evolution".to_string()
    } else {
        slug
    }
}

/// 进化提案生成器：把问题/机会转成结构化的变更提案
pub struct EvolutionProposer {
    bus: Arc<EventBus>,
    llm: Option<Arc<dyn LlmClient>>,
}

impl EvolutionProposer {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus, llm: None }
    }

    /// 使用文本生成能力为新建文件补充代码骨架
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub async fn generate_proposals(
        &self,
        analysis: &EvolutionAnalysis,
        max_proposals: usize,
    ) -> Vec<EvolutionProposal> {
        self.bus
            .publish(NewEvent::new(
                SOURCE,
                EventPayload::ProposalStart {
                    analysis_id: analysis.id.clone(),
                    max_proposals,
                },
            ))
            .await;

        // sort_by 是稳定排序，同级保持原顺序
        let mut issues: Vec<&Issue> = analysis.issues.iter().collect();
        issues.sort_by(|a, b| b.severity.cmp(&a.severity));
        let issue_budget = MAX_ISSUE_PROPOSALS.min(max_proposals);
        let selected_issues: Vec<&Issue> = issues.into_iter().take(issue_budget).collect();

        let mut opportunities: Vec<&Opportunity> = analysis.opportunities.iter().collect();
        opportunities.sort_by(|a, b| b.impact.cmp(&a.impact));
        let opportunity_budget = max_proposals.saturating_sub(selected_issues.len());

        let sources: Vec<Source<'_>> = selected_issues
            .into_iter()
            .map(Source::Issue)
            .chain(
                opportunities
                    .into_iter()
                    .take(opportunity_budget)
                    .map(Source::Opportunity),
            )
            .collect();

        let mut proposals = Vec::with_capacity(sources.len());
        for source in &sources {
            let mut proposal = self.create_proposal(analysis, source);
            if let Some(llm) = &self.llm {
                self.enrich_with_llm(llm.as_ref(), &mut proposal).await;
            }
            proposals.push(proposal);
        }

        tracing::info!(
            analysis_id = %analysis.id,
            proposals = proposals.len(),
            "Proposals generated"
        );

        self.bus
            .publish(NewEvent::new(
                SOURCE,
                EventPayload::ProposalComplete {
                    analysis_id: analysis.id.clone(),
                    proposals: proposals.clone(),
                },
            ))
            .await;

        proposals
    }

    fn create_proposal(&self, analysis: &EvolutionAnalysis, source: &Source<'_>) -> EvolutionProposal {
        let slug = slugify(source.title());
        let template = template_for(source.category(), &slug);

        let target_modules = match source {
            Source::Issue(issue) if !issue.affected_modules.is_empty() => issue.affected_modules.clone(),
            _ => vec![slug.clone()],
        };

        EvolutionProposal {
            id: Uuid::new_v4().to_string(),
            analysis_id: analysis.id.clone(),
            timestamp: Utc::now(),
            proposal_type: source.proposal_type(),
            title: source.title().to_string(),
            description: format!("{} {}", template.description, source.description())
                .trim()
                .to_string(),
            target_modules,
            implementation: ImplementationPlan {
                files: template.files,
                dependencies: template.dependencies,
                interfaces: template.interfaces,
            },
            estimated_impact: template.impact,
            risks: template.risks,
            status: ProposalStatus::Proposed,
        }
    }

    /// 为每个 create 文件请求代码骨架；任何失败只记录日志，保留模板提案
    async fn enrich_with_llm(&self, llm: &dyn LlmClient, proposal: &mut EvolutionProposal) {
        let title = proposal.title.clone();
        let description = proposal.description.clone();
        for file in proposal
            .implementation
            .files
            .iter_mut()
            .filter(|f| f.action == FileAction::Create)
        {
            let messages = [
                Message::system(
                    "You write minimal, compilable Rust module scaffolds. Reply with one fenced code block.",
                ),
                Message::user(format!(
                    "Create {}\nPurpose: {}\nProposal: {}\n{}",
                    file.path, file.description, title, description
                )),
            ];
            match llm.complete(&messages).await {
                Ok(reply) => {
                    let code = extract_code_block(&reply);
                    if !code.is_empty() {
                        file.code = Some(code);
                    }
                }
                Err(e) => {
                    tracing::warn!(file = %file.path, "AI scaffold generation failed, keeping template: {}", e);
                }
            }
        }
    }
}

struct Template {
    description: String,
    files: Vec<ProposedFile>,
    dependencies: Vec<String>,
    interfaces: Vec<ProposedInterface>,
    impact: String,
    risks: Vec<String>,
}

fn file(path: String, action: FileAction, description: &str) -> ProposedFile {
    ProposedFile {
        path,
        action,
        description: description.to_string(),
        code: None,
    }
}

fn template_for(category: TemplateCategory, slug: &str) -> Template {
    let type_name = to_type_name(slug);
    match category {
        TemplateCategory::Optimization => Template {
            description: "Introduce a dedicated optimizer that caches hot paths and tracks timings.".to_string(),
            files: vec![
                file(
                    format!("src/modules/{}/mod.rs", slug),
                    FileAction::Create,
                    "Optimizer module with cached computations",
                ),
                file(
                    format!("src/modules/{}/metrics.rs", slug),
                    FileAction::Create,
                    "Record optimizer timings",
                ),
            ],
            dependencies: vec!["tokio".to_string()],
            interfaces: vec![ProposedInterface {
                name: format!("{}Optimizer", type_name),
                methods: vec!["optimize".to_string(), "report".to_string()],
            }],
            impact: "Estimated 20-30% reduction in processing time for affected paths".to_string(),
            risks: vec![
                "Cached state may grow memory usage".to_string(),
                "Requires a performance baseline to verify gains".to_string(),
            ],
        },
        TemplateCategory::NewFeature => Template {
            description: "Add a new self-contained module exposing the capability.".to_string(),
            files: vec![
                file(
                    format!("src/modules/{}/mod.rs", slug),
                    FileAction::Create,
                    "Feature module entry point",
                ),
                file(
                    format!("src/modules/{}/service.rs", slug),
                    FileAction::Create,
                    "Feature service",
                ),
            ],
            dependencies: vec!["serde".to_string()],
            interfaces: vec![ProposedInterface {
                name: format!("{}Service", type_name),
                methods: vec!["start".to_string(), "status".to_string()],
            }],
            impact: "New capability available to all agents".to_string(),
            risks: vec![
                "Increases surface area to maintain".to_string(),
                "Needs integration tests with existing modules".to_string(),
            ],
        },
        TemplateCategory::Refactor => Template {
            description: "Restructure the module behind a narrower interface.".to_string(),
            files: vec![file(
                format!("src/{}.rs", slug),
                FileAction::Modify,
                "Extract shared logic behind a trait",
            )],
            dependencies: vec![],
            interfaces: vec![],
            impact: "Lower maintenance cost and clearer ownership".to_string(),
            risks: vec!["Behavior regressions in existing callers".to_string()],
        },
        TemplateCategory::Other => Template {
            description: "Adjust the affected module and add monitoring around it.".to_string(),
            files: vec![
                file(
                    format!("src/modules/{}/mod.rs", slug),
                    FileAction::Modify,
                    "Apply the fix in the module",
                ),
                file(
                    format!("src/modules/{}/monitor.rs", slug),
                    FileAction::Create,
                    "Monitor to detect recurrence",
                ),
            ],
            dependencies: vec![],
            interfaces: vec![],
            impact: "Improved reliability of the affected module".to_string(),
            risks: vec!["Fix may mask an underlying root cause".to_string()],
        },
    }
}

/// snake_case → PascalCase
pub(crate) fn to_type_name(slug: &str) -> String {
    slug.split('_')
        .filter(|p| !p.is_empty())
        .map(|p| {
            let mut chars = p.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventType, HistoryFilter};
    use crate::evolution::types::{AnalysisStatus, Impact, Severity, SystemSnapshot};
    use crate::llm::{LlmError, MockLlmClient};
    use async_trait::async_trait;

    fn issue(title: &str, issue_type: IssueType, severity: Severity) -> Issue {
        Issue {
            id: Uuid::new_v4().to_string(),
            issue_type,
            severity,
            title: title.to_string(),
            description: format!("{} description", title),
            affected_modules: vec![],
            detected_at: Utc::now(),
        }
    }

    fn opportunity(title: &str, opportunity_type: OpportunityType, impact: Impact) -> Opportunity {
        Opportunity {
            id: Uuid::new_v4().to_string(),
            opportunity_type,
            impact,
            title: title.to_string(),
            description: String::new(),
            potential_benefit: String::new(),
        }
    }

    fn analysis(issues: Vec<Issue>, opportunities: Vec<Opportunity>) -> EvolutionAnalysis {
        EvolutionAnalysis {
            id: "analysis-1".to_string(),
            timestamp: Utc::now(),
            system_state: SystemSnapshot {
                module_count: 0,
                agent_count: 0,
                active_modules: vec![],
                performance_metrics: Default::default(),
                error_logs: vec![],
                test_coverage: 0.0,
            },
            issues,
            opportunities,
            status: AnalysisStatus::Complete,
        }
    }

    struct FailingLlm;

    #[async_trait]
    impl LlmClient for FailingLlm {
        async fn complete(&self, _messages: &[Message]) -> Result<String, LlmError> {
            Err(LlmError::Timeout(1))
        }
    }

    #[tokio::test]
    async fn test_issues_ranked_by_severity() {
        let proposer = EvolutionProposer::new(Arc::new(EventBus::new()));
        let a = analysis(
            vec![
                issue("Low thing", IssueType::TechnicalDebt, Severity::Low),
                issue("Critical thing", IssueType::Bug, Severity::Critical),
                issue("High thing", IssueType::Performance, Severity::High),
            ],
            vec![],
        );
        let proposals = proposer.generate_proposals(&a, 3).await;

        // 问题最多选 2 个，且没有机会可补位
        assert_eq!(proposals.len(), 2);
        assert_eq!(proposals[0].title, "Critical thing");
        assert_eq!(proposals[0].proposal_type, ProposalType::ModifyModule);
        assert_eq!(proposals[1].title, "High thing");
        assert_eq!(proposals[1].proposal_type, ProposalType::Optimize);
        assert!(proposals.iter().all(|p| p.status == ProposalStatus::Proposed));
        assert!(proposals.iter().all(|p| p.analysis_id == "analysis-1"));
    }

    #[tokio::test]
    async fn test_ties_keep_original_order_and_opportunities_fill_budget() {
        let bus = Arc::new(EventBus::new());
        let proposer = EvolutionProposer::new(bus.clone());
        let a = analysis(
            vec![
                issue("First high", IssueType::Bug, Severity::High),
                issue("Second high", IssueType::Bug, Severity::High),
                issue("Third high", IssueType::Bug, Severity::High),
            ],
            vec![
                opportunity("Medium opp", OpportunityType::Integration, Impact::Medium),
                opportunity("High opp", OpportunityType::NewFeature, Impact::High),
                opportunity("Other high opp", OpportunityType::Refactor, Impact::High),
            ],
        );
        let proposals = proposer.generate_proposals(&a, 4).await;

        let titles: Vec<&str> = proposals.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["First high", "Second high", "High opp", "Other high opp"]);
        assert_eq!(proposals[2].proposal_type, ProposalType::CreateModule);
        assert_eq!(proposals[3].proposal_type, ProposalType::ModifyModule);

        let events = bus.query_history(&HistoryFilter::new());
        assert_eq!(events[0].event_type(), EventType::ProposalStart);
        assert_eq!(events[1].event_type(), EventType::ProposalComplete);
    }

    #[tokio::test]
    async fn test_small_budget_limits_issue_selection() {
        let proposer = EvolutionProposer::new(Arc::new(EventBus::new()));
        let a = analysis(
            vec![
                issue("A", IssueType::Bug, Severity::High),
                issue("B", IssueType::Bug, Severity::Critical),
            ],
            vec![opportunity("O", OpportunityType::Optimization, Impact::High)],
        );
        let proposals = proposer.generate_proposals(&a, 1).await;
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].title, "B");

        assert!(proposer.generate_proposals(&a, 0).await.is_empty());
    }

    #[tokio::test]
    async fn test_templates_are_deterministic() {
        let proposer = EvolutionProposer::new(Arc::new(EventBus::new()));
        let a = analysis(
            vec![],
            vec![opportunity("Improve agent learning efficiency", OpportunityType::Optimization, Impact::High)],
        );
        let first = proposer.generate_proposals(&a, 3).await;
        let second = proposer.generate_proposals(&a, 3).await;

        assert_eq!(first[0].implementation, second[0].implementation);
        assert_eq!(first[0].risks, second[0].risks);
        assert_eq!(first[0].target_modules, vec!["improve_agent_learning_efficiency".to_string()]);
        assert_eq!(
            first[0].implementation.files[0].path,
            "src/modules/improve_agent_learning_efficiency/mod.rs"
        );
        assert!(first[0]
            .implementation
            .files
            .iter()
            .all(|f| f.path.starts_with("src/modules/improve_agent_learning_efficiency/")));
        assert_eq!(
            first[0].implementation.interfaces[0].name,
            "ImproveAgentLearningEfficiencyOptimizer"
        );
    }

    #[tokio::test]
    async fn test_llm_enrichment_fills_created_files() {
        let proposer = EvolutionProposer::new(Arc::new(EventBus::new())).with_llm(Arc::new(MockLlmClient));
        let a = analysis(
            vec![],
            vec![opportunity("Autonomous issue resolution", OpportunityType::NewFeature, Impact::High)],
        );
        let proposals = proposer.generate_proposals(&a, 1).await;
        let files = &proposals[0].implementation.files;
        assert!(files.iter().all(|f| f.code.as_deref().is_some_and(|c| c.contains("pub fn scaffold"))));
    }

    #[tokio::test]
    async fn test_llm_failure_keeps_template() {
        let proposer = EvolutionProposer::new(Arc::new(EventBus::new())).with_llm(Arc::new(FailingLlm));
        let a = analysis(
            vec![],
            vec![opportunity("Something new", OpportunityType::NewFeature, Impact::High)],
        );
        let proposals = proposer.generate_proposals(&a, 1).await;
        assert!(proposals[0].implementation.files.iter().all(|f| f.code.is_none()));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Stuck tasks detected"), "stuck_tasks_detected");
        assert_eq!(slugify("  --Hello, World!! "), "hello_world");
        assert_eq!(slugify("???"), "evolution");
        assert_eq!(to_type_name("stuck_tasks"), "StuckTasks");
    }
}
