use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::core::EvolverError;
use crate::events::{ChangeOperation, EventBus, EventPayload, NewEvent};
use crate::evolution::proposer::to_type_name;
use crate::evolution::store::{validate_relative_path, ChangeStore};
use crate::evolution::types::{
    BackupFile, CodeChange, EvolutionImplementation, EvolutionProposal, FileAction,
    GeneratedCode, ImplementationStatus, ProposedFile, RollbackData,
};

const SOURCE: &str = "evolution-implementer";

/// 预览最大字符数
pub const PREVIEW_LIMIT: usize = 500;
pub const PREVIEW_ELLIPSIS: &str = "...";

/// 截断到 PREVIEW_LIMIT 个字符，超出时追加省略号
pub fn preview(content: &str) -> String {
    match content.char_indices().nth(PREVIEW_LIMIT) {
        Some((byte_idx, _)) => format!("{}{}", &content[..byte_idx], PREVIEW_ELLIPSIS),
        None => content.to_string(),
    }
}

/// 进化实现器：按提案生成代码骨架，并负责变更的应用与回滚记账
pub struct EvolutionImplementer {
    bus: Arc<EventBus>,
    store: Arc<dyn ChangeStore>,
}

impl EvolutionImplementer {
    pub fn new(bus: Arc<EventBus>, store: Arc<dyn ChangeStore>) -> Self {
        Self { bus, store }
    }

    /// 生成实现；失败时不返回 Err，而是 status = Failed 并发布 IMPLEMENTATION_FAILED
    pub async fn implement_proposal(&self, proposal: &EvolutionProposal) -> EvolutionImplementation {
        self.bus
            .publish(NewEvent::new(
                SOURCE,
                EventPayload::ImplementationStart {
                    proposal_id: proposal.id.clone(),
                    file_count: proposal.implementation.files.len(),
                },
            ))
            .await;

        let mut implementation = EvolutionImplementation {
            id: Uuid::new_v4().to_string(),
            proposal_id: proposal.id.clone(),
            timestamp: Utc::now(),
            changes: Vec::new(),
            status: ImplementationStatus::Scaffolding,
            generated_code: Vec::new(),
            rollback_data: None,
        };

        for file in &proposal.implementation.files {
            match scaffold(file, proposal) {
                Ok(generated) => {
                    implementation.changes.push(CodeChange {
                        id: Uuid::new_v4().to_string(),
                        file: file.path.clone(),
                        change_type: file.action,
                        description: file.description.clone(),
                        preview: preview(&generated.content),
                        applied: false,
                    });
                    implementation.generated_code.push(generated);
                }
                Err(e) => {
                    implementation.status = ImplementationStatus::Failed;
                    tracing::error!(proposal_id = %proposal.id, file = %file.path, "Implementation failed: {}", e);
                    self.bus
                        .publish(NewEvent::new(
                            SOURCE,
                            EventPayload::ImplementationFailed {
                                proposal_id: proposal.id.clone(),
                                error: e.to_string(),
                                implementation: Box::new(implementation.clone()),
                            },
                        ))
                        .await;
                    return implementation;
                }
            }
        }

        implementation.status = ImplementationStatus::Complete;
        tracing::info!(
            proposal_id = %proposal.id,
            implementation_id = %implementation.id,
            changes = implementation.changes.len(),
            "Implementation scaffolded"
        );
        self.bus
            .publish(NewEvent::new(
                SOURCE,
                EventPayload::ImplementationComplete {
                    implementation: Box::new(implementation.clone()),
                },
            ))
            .await;

        implementation
    }

    /// 把生成的变更写入存储；写入前记录回滚数据。返回是否全部成功
    pub async fn apply_changes(&self, implementation: &mut EvolutionImplementation) -> bool {
        if implementation.status != ImplementationStatus::Complete {
            tracing::warn!(
                implementation_id = %implementation.id,
                "Refusing to apply changes of an incomplete implementation"
            );
            return false;
        }

        let files: Vec<String> = implementation.changes.iter().map(|c| c.file.clone()).collect();
        self.bus
            .publish(NewEvent::new(
                SOURCE,
                EventPayload::ChangesApplying {
                    implementation_id: implementation.id.clone(),
                    files: files.clone(),
                },
            ))
            .await;

        match self.write_changes(implementation).await {
            Ok(()) => {
                tracing::info!(implementation_id = %implementation.id, files = files.len(), "Changes applied");
                self.bus
                    .publish(NewEvent::new(
                        SOURCE,
                        EventPayload::ChangesApplied {
                            implementation_id: implementation.id.clone(),
                            files,
                        },
                    ))
                    .await;
                true
            }
            Err(e) => {
                tracing::error!(implementation_id = %implementation.id, "Applying changes failed: {}", e);
                self.bus
                    .publish(NewEvent::new(
                        SOURCE,
                        EventPayload::ChangesFailed {
                            implementation_id: implementation.id.clone(),
                            operation: ChangeOperation::Apply,
                            error: e.to_string(),
                        },
                    ))
                    .await;
                false
            }
        }
    }

    async fn write_changes(&self, implementation: &mut EvolutionImplementation) -> Result<(), EvolverError> {
        let mut backup_files = Vec::with_capacity(implementation.changes.len());
        for change in &implementation.changes {
            backup_files.push(BackupFile {
                path: change.file.clone(),
                content: self.store.read(&change.file).await?,
            });
        }
        implementation.rollback_data = Some(RollbackData {
            timestamp: Utc::now(),
            backup_files,
            reason: None,
        });

        for i in 0..implementation.changes.len() {
            let change = &implementation.changes[i];
            match change.change_type {
                FileAction::Create | FileAction::Modify => {
                    let content = implementation.content_for(&change.file).unwrap_or_default();
                    self.store.write(&change.file, content).await?;
                }
                FileAction::Delete => self.store.remove(&change.file).await?,
            }
            implementation.changes[i].applied = true;
        }
        Ok(())
    }

    /// 按回滚数据恢复文件；没有回滚数据时直接返回 false，不发布事件
    pub async fn revert_changes(
        &self,
        implementation: &mut EvolutionImplementation,
        reason: Option<String>,
    ) -> bool {
        let backups = match implementation.rollback_data.as_mut() {
            Some(rollback) => {
                rollback.reason = reason.clone();
                rollback.backup_files.clone()
            }
            None => {
                tracing::warn!(
                    implementation_id = %implementation.id,
                    "No rollback data available, cannot revert"
                );
                return false;
            }
        };

        self.bus
            .publish(NewEvent::new(
                SOURCE,
                EventPayload::ChangesReverting {
                    implementation_id: implementation.id.clone(),
                    reason,
                },
            ))
            .await;

        for backup in &backups {
            let restored = match &backup.content {
                Some(content) => self.store.write(&backup.path, content).await,
                None => self.store.remove(&backup.path).await,
            };
            if let Err(e) = restored {
                tracing::error!(implementation_id = %implementation.id, file = %backup.path, "Revert failed: {}", e);
                self.bus
                    .publish(NewEvent::new(
                        SOURCE,
                        EventPayload::ChangesFailed {
                            implementation_id: implementation.id.clone(),
                            operation: ChangeOperation::Revert,
                            error: e.to_string(),
                        },
                    ))
                    .await;
                return false;
            }
        }

        for change in implementation.changes.iter_mut() {
            change.applied = false;
        }

        tracing::info!(implementation_id = %implementation.id, files = backups.len(), "Changes reverted");
        self.bus
            .publish(NewEvent::new(
                SOURCE,
                EventPayload::ChangesReverted {
                    implementation_id: implementation.id.clone(),
                    files: backups.into_iter().map(|b| b.path).collect(),
                },
            ))
            .await;
        true
    }
}

/// 为单个文件生成内容：提案自带代码优先，否则按路径模式选择模板
fn scaffold(file: &ProposedFile, proposal: &EvolutionProposal) -> Result<GeneratedCode, EvolverError> {
    validate_relative_path(&file.path)?;

    if file.action == FileAction::Delete {
        return Ok(GeneratedCode {
            file: file.path.clone(),
            content: String::new(),
            purpose: format!("Remove {}", file.path),
        });
    }

    let content = match &file.code {
        Some(code) if !code.trim().is_empty() => code.clone(),
        _ if is_module_entry(&file.path) => module_template(file, proposal),
        _ if file.path.ends_with(".rs") => struct_template(file, proposal),
        _ => generic_template(file, proposal),
    };

    Ok(GeneratedCode {
        file: file.path.clone(),
        content,
        purpose: file.description.clone(),
    })
}

/// `.../modules/<name>/mod.rs`
fn is_module_entry(path: &str) -> bool {
    path.contains("modules/") && path.ends_with("/mod.rs")
}

/// 路径中最能代表类型名的片段（mod.rs 取父目录名）
fn type_name_for(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    let stem = match parts.as_slice() {
        [.., parent, "mod.rs"] => parent.to_string(),
        [.., last] => last.rsplit_once('.').map(|(s, _)| s).unwrap_or(*last).to_string(),
        [] => "generated".to_string(),
    };
    let name = to_type_name(&stem.replace('-', "_"));
    if name.is_empty() {
        "Generated".to_string()
    } else {
        name
    }
}

fn module_template(file: &ProposedFile, proposal: &EvolutionProposal) -> String {
    let name = type_name_for(&file.path);
    format!(
        r#"//! {title}
//!
//! {description}

use std::sync::Arc;

use crate::events::EventBus;

pub struct {name}Module {{
    bus: Arc<EventBus>,
    enabled: bool,
}}

impl {name}Module {{
    pub fn new(bus: Arc<EventBus>) -> Self {{
        Self {{ bus, enabled: false }}
    }}

    pub fn init(&mut self) {{
        self.enabled = true;
        tracing::info!("{name} module initialised");
    }}

    pub fn is_enabled(&self) -> bool {{
        self.enabled
    }}

    pub fn bus(&self) -> &Arc<EventBus> {{
        &self.bus
    }}
}}

#[cfg(test)]
mod tests {{
    use super::*;

    #[test]
    fn test_init_enables_module() {{
        let mut module = {name}Module::new(Arc::new(EventBus::new()));
        module.init();
        assert!(module.is_enabled());
    }}
}}
"#,
        title = proposal.title,
        description = file.description,
        name = name,
    )
}

fn struct_template(file: &ProposedFile, proposal: &EvolutionProposal) -> String {
    let name = type_name_for(&file.path);
    format!(
        r#"//! {description}
//!
//! Proposal: {title}

#[derive(Debug, Default)]
pub struct {name} {{
    runs: u64,
}}

impl {name} {{
    pub fn new() -> Self {{
        Self::default()
    }}

    pub fn run(&mut self) -> u64 {{
        self.runs += 1;
        self.runs
    }}
}}
"#,
        description = file.description,
        title = proposal.title,
        name = name,
    )
}

fn generic_template(file: &ProposedFile, proposal: &EvolutionProposal) -> String {
    format!(
        "# {}\n\n{}\n\nProposal: {}\n\nEstimated impact: {}\n",
        file.path, file.description, proposal.title, proposal.estimated_impact
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventType, HistoryFilter};
    use crate::evolution::store::InMemoryChangeStore;
    use crate::evolution::types::{ImplementationPlan, ProposalStatus, ProposalType};

    fn proposal(files: Vec<ProposedFile>) -> EvolutionProposal {
        EvolutionProposal {
            id: "proposal-1".to_string(),
            analysis_id: "analysis-1".to_string(),
            timestamp: Utc::now(),
            proposal_type: ProposalType::CreateModule,
            title: "Unified agent dashboard".to_string(),
            description: "desc".to_string(),
            target_modules: vec!["dashboard".to_string()],
            implementation: ImplementationPlan {
                files,
                dependencies: vec![],
                interfaces: vec![],
            },
            estimated_impact: "visibility".to_string(),
            risks: vec![],
            status: ProposalStatus::Approved,
        }
    }

    fn file(path: &str, action: FileAction) -> ProposedFile {
        ProposedFile {
            path: path.to_string(),
            action,
            description: format!("{} file", path),
            code: None,
        }
    }

    fn implementer(store: Arc<InMemoryChangeStore>) -> (Arc<EventBus>, EvolutionImplementer) {
        let bus = Arc::new(EventBus::new());
        (bus.clone(), EvolutionImplementer::new(bus, store))
    }

    #[test]
    fn test_preview_boundary() {
        let exact = "a".repeat(500);
        assert_eq!(preview(&exact), exact);

        let over = "b".repeat(501);
        let p = preview(&over);
        assert_eq!(p, format!("{}...", "b".repeat(500)));
        assert_eq!(p.chars().count(), 503);

        let multibyte = "进".repeat(600);
        assert_eq!(preview(&multibyte).chars().count(), 503);
    }

    #[tokio::test]
    async fn test_zero_files_completes_empty() {
        let (_, implementer) = implementer(Arc::new(InMemoryChangeStore::new()));
        let implementation = implementer.implement_proposal(&proposal(vec![])).await;
        assert_eq!(implementation.status, ImplementationStatus::Complete);
        assert!(implementation.changes.is_empty());
        assert!(implementation.generated_code.is_empty());
    }

    #[tokio::test]
    async fn test_templates_selected_by_path() {
        let (bus, implementer) = implementer(Arc::new(InMemoryChangeStore::new()));
        let mut with_code = file("src/custom.rs", FileAction::Create);
        with_code.code = Some("pub fn custom() {}".to_string());
        let p = proposal(vec![
            file("src/modules/agent_dashboard/mod.rs", FileAction::Create),
            file("src/core/metrics.rs", FileAction::Modify),
            file("docs/dashboard.md", FileAction::Create),
            file("src/legacy.rs", FileAction::Delete),
            with_code,
        ]);
        let implementation = implementer.implement_proposal(&p).await;

        assert_eq!(implementation.status, ImplementationStatus::Complete);
        assert_eq!(implementation.changes.len(), 5);
        assert_eq!(implementation.generated_code.len(), 5);
        assert!(implementation.generated_code[0].content.contains("pub struct AgentDashboardModule"));
        assert!(implementation.generated_code[1].content.contains("pub struct Metrics"));
        assert!(implementation.generated_code[2].content.starts_with("# docs/dashboard.md"));
        assert!(implementation.generated_code[3].content.is_empty());
        assert_eq!(implementation.generated_code[4].content, "pub fn custom() {}");
        assert!(implementation.changes.iter().all(|c| !c.applied));
        assert!(implementation.changes[0].preview.ends_with(PREVIEW_ELLIPSIS));

        let types: Vec<EventType> = bus
            .query_history(&HistoryFilter::new())
            .iter()
            .map(|e| e.event_type())
            .collect();
        assert_eq!(types, vec![EventType::ImplementationStart, EventType::ImplementationComplete]);
    }

    #[tokio::test]
    async fn test_rejected_path_marks_failed_and_keeps_partial_work() {
        let (bus, implementer) = implementer(Arc::new(InMemoryChangeStore::new()));
        let p = proposal(vec![
            file("src/ok.rs", FileAction::Create),
            file("../escape.rs", FileAction::Create),
            file("src/never.rs", FileAction::Create),
        ]);
        let implementation = implementer.implement_proposal(&p).await;

        assert_eq!(implementation.status, ImplementationStatus::Failed);
        assert_eq!(implementation.changes.len(), 1);
        let failed = bus.query_history(&HistoryFilter::new().event_type(EventType::ImplementationFailed));
        assert_eq!(failed.len(), 1);
        match &failed[0].payload {
            EventPayload::ImplementationFailed { error, .. } => assert!(error.contains("escape")),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_apply_then_revert_restores_store() {
        let store = Arc::new(InMemoryChangeStore::with_files([
            ("src/core/metrics.rs", "// old metrics"),
            ("src/legacy.rs", "// legacy"),
        ]));
        let (bus, implementer) = implementer(store.clone());
        let p = proposal(vec![
            file("src/modules/agent_dashboard/mod.rs", FileAction::Create),
            file("src/core/metrics.rs", FileAction::Modify),
            file("src/legacy.rs", FileAction::Delete),
        ]);
        let mut implementation = implementer.implement_proposal(&p).await;

        assert!(implementer.apply_changes(&mut implementation).await);
        assert!(implementation.changes.iter().all(|c| c.applied));
        let applied = store.snapshot().await;
        assert!(applied.contains_key("src/modules/agent_dashboard/mod.rs"));
        assert!(!applied.contains_key("src/legacy.rs"));
        assert_ne!(applied["src/core/metrics.rs"], "// old metrics");

        let rollback = implementation.rollback_data.as_ref().unwrap();
        assert_eq!(rollback.backup_files[0].content, None);
        assert_eq!(rollback.backup_files[1].content.as_deref(), Some("// old metrics"));

        assert!(implementer.revert_changes(&mut implementation, Some("tests failed".to_string())).await);
        assert!(implementation.changes.iter().all(|c| !c.applied));
        let reverted = store.snapshot().await;
        assert_eq!(reverted.len(), 2);
        assert_eq!(reverted["src/core/metrics.rs"], "// old metrics");
        assert_eq!(reverted["src/legacy.rs"], "// legacy");
        assert_eq!(
            implementation.rollback_data.as_ref().unwrap().reason.as_deref(),
            Some("tests failed")
        );

        let types: Vec<EventType> = bus
            .query_history(&HistoryFilter::new())
            .iter()
            .map(|e| e.event_type())
            .collect();
        assert_eq!(
            &types[2..],
            &[
                EventType::ChangesApplying,
                EventType::ChangesApplied,
                EventType::ChangesReverting,
                EventType::ChangesReverted
            ]
        );
    }

    #[tokio::test]
    async fn test_revert_without_rollback_data_fails_silently() {
        let (bus, implementer) = implementer(Arc::new(InMemoryChangeStore::new()));
        let mut implementation = implementer
            .implement_proposal(&proposal(vec![file("src/a.rs", FileAction::Create)]))
            .await;
        bus.clear_history();

        assert!(!implementer.revert_changes(&mut implementation, None).await);
        assert_eq!(bus.history_len(), 0);
    }

    #[tokio::test]
    async fn test_apply_refuses_failed_implementation() {
        let (_, implementer) = implementer(Arc::new(InMemoryChangeStore::new()));
        let mut implementation = implementer
            .implement_proposal(&proposal(vec![file("/abs.rs", FileAction::Create)]))
            .await;
        assert_eq!(implementation.status, ImplementationStatus::Failed);
        assert!(!implementer.apply_changes(&mut implementation).await);
    }
}
