use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use uuid::Uuid;

use crate::events::{EventBus, EventPayload, NewEvent};
use crate::evolution::types::{
    Decision, EvolutionDecision, EvolutionImplementation, EvolutionTest, FileAction, Implementer,
    OverallStatus, TestResult, TestStatus,
};

const SOURCE: &str = "evolution-validator";

/// 性能检查通过线（严格大于）
pub const PERFORMANCE_PASS_SCORE: f64 = 70.0;

/// 性能评分来源
pub trait PerformanceProbe: Send + Sync {
    /// 0-100
    fn score(&self, implementation: &EvolutionImplementation) -> f64;
}

/// 合成评分：base - per_change_cost × 变更数，限制在 0-100
#[derive(Debug, Clone)]
pub struct SyntheticProbe {
    pub base: f64,
    pub per_change_cost: f64,
}

impl Default for SyntheticProbe {
    fn default() -> Self {
        Self {
            base: 92.0,
            per_change_cost: 3.0,
        }
    }
}

impl PerformanceProbe for SyntheticProbe {
    fn score(&self, implementation: &EvolutionImplementation) -> f64 {
        (self.base - self.per_change_cost * implementation.changes.len() as f64).clamp(0.0, 100.0)
    }
}

/// 决策参数
#[derive(Debug, Clone, Copy)]
pub struct DecisionPolicy {
    /// 0-100，含边界
    pub confidence_threshold: f64,
    /// 目前只写入审计理由，不改变决策结果
    pub require_manual_approval: bool,
}

/// 进化验证器：分层测试 + 基于置信度的决策
pub struct EvolutionValidator {
    bus: Arc<EventBus>,
    probe: Box<dyn PerformanceProbe>,
}

impl EvolutionValidator {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            probe: Box::new(SyntheticProbe::default()),
        }
    }

    pub fn with_probe(mut self, probe: impl PerformanceProbe + 'static) -> Self {
        self.probe = Box::new(probe);
        self
    }

    pub async fn run_tests(&self, implementation: &EvolutionImplementation) -> EvolutionTest {
        self.bus
            .publish(NewEvent::new(
                SOURCE,
                EventPayload::TestingStart {
                    implementation_id: implementation.id.clone(),
                },
            ))
            .await;

        let mut results = self.runtime_checks(implementation);
        results.extend(self.integration_checks());
        results.push(self.performance_check(implementation));

        let overall_status = OverallStatus::derive(&results);
        let test = EvolutionTest {
            id: Uuid::new_v4().to_string(),
            implementation_id: implementation.id.clone(),
            timestamp: Utc::now(),
            test_type: "comprehensive".to_string(),
            results,
            overall_status,
            coverage_delta: None,
        };

        tracing::info!(
            implementation_id = %implementation.id,
            passed = test.pass_count(),
            total = test.results.len(),
            status = ?test.overall_status,
            "Tests complete"
        );

        self.bus
            .publish(NewEvent::new(
                SOURCE,
                EventPayload::TestingComplete {
                    test: Box::new(test.clone()),
                },
            ))
            .await;

        test
    }

    /// 每个变更文件一项结构检查
    fn runtime_checks(&self, implementation: &EvolutionImplementation) -> Vec<TestResult> {
        implementation
            .changes
            .iter()
            .map(|change| {
                let started = Instant::now();
                let content = implementation.content_for(&change.file).unwrap_or_default();
                let failure = match change.change_type {
                    FileAction::Delete => None,
                    _ if content.trim().is_empty() => Some("generated content is empty".to_string()),
                    _ if change.file.ends_with(".rs") => unbalanced_delimiter(content),
                    _ => None,
                };
                TestResult {
                    id: Uuid::new_v4().to_string(),
                    name: format!("Runtime structure: {}", change.file),
                    status: if failure.is_none() {
                        TestStatus::Pass
                    } else {
                        TestStatus::Fail
                    },
                    duration: started.elapsed().as_millis() as u64,
                    message: failure,
                    stack_trace: None,
                }
            })
            .collect()
    }

    /// 没有实时集成环境时两项集成检查固定通过
    fn integration_checks(&self) -> Vec<TestResult> {
        ["Event bus integration", "Data service integration"]
            .iter()
            .map(|name| TestResult {
                id: Uuid::new_v4().to_string(),
                name: name.to_string(),
                status: TestStatus::Pass,
                duration: 0,
                message: None,
                stack_trace: None,
            })
            .collect()
    }

    fn performance_check(&self, implementation: &EvolutionImplementation) -> TestResult {
        let started = Instant::now();
        let score = self.probe.score(implementation);
        let passed = score > PERFORMANCE_PASS_SCORE;
        TestResult {
            id: Uuid::new_v4().to_string(),
            name: "Performance benchmark".to_string(),
            status: if passed { TestStatus::Pass } else { TestStatus::Fail },
            duration: started.elapsed().as_millis() as u64,
            message: Some(format!(
                "Performance score {:.1} (requires > {:.0})",
                score, PERFORMANCE_PASS_SCORE
            )),
            stack_trace: None,
        }
    }

    pub async fn make_decision(&self, test: &EvolutionTest, policy: DecisionPolicy) -> EvolutionDecision {
        let total = test.results.len();
        let passed = test.pass_count();
        let confidence = if total > 0 {
            passed as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        let mut reasoning = Vec::new();
        let decision = match test.overall_status {
            OverallStatus::Passing => {
                reasoning.push(format!("All {} tests passed", total));
                reasoning.push("Implementation is stable and can be kept".to_string());
                Decision::Accept
            }
            OverallStatus::Partial if confidence >= policy.confidence_threshold => {
                reasoning.push(format!("{} of {} tests passed", passed, total));
                reasoning.push(format!(
                    "Confidence {:.1}% meets threshold {:.1}%",
                    confidence, policy.confidence_threshold
                ));
                Decision::Accept
            }
            OverallStatus::Partial => {
                reasoning.push(format!("{} of {} tests passed", passed, total));
                reasoning.push(format!(
                    "Confidence {:.1}% is below threshold {:.1}%, adjustments required",
                    confidence, policy.confidence_threshold
                ));
                Decision::Adjust
            }
            OverallStatus::Failing => {
                reasoning.push(format!("All {} tests failed", total));
                reasoning.push("Reverting to the previous state".to_string());
                Decision::Revert
            }
        };

        if policy.require_manual_approval && decision == Decision::Accept {
            reasoning.push("Manual approval is required before the change is finalized".to_string());
        }
        reasoning.push(format!(
            "Decision analysis: {}/{} tests passed ({:.1}% pass rate)",
            passed, total, confidence
        ));

        let decision = EvolutionDecision {
            id: Uuid::new_v4().to_string(),
            test_id: test.id.clone(),
            timestamp: Utc::now(),
            decision,
            reasoning,
            confidence,
            manual_override: false,
            implemented_by: Implementer::Evolver,
        };

        tracing::info!(
            test_id = %test.id,
            decision = ?decision.decision,
            confidence = decision.confidence,
            "Decision made"
        );

        self.bus
            .publish(NewEvent::new(
                SOURCE,
                EventPayload::DecisionMade {
                    decision: Box::new(decision.clone()),
                },
            ))
            .await;

        decision
    }
}

/// 检查 `{}` `()` `[]` 是否配对；忽略字符串、字符字面量与注释内容
fn unbalanced_delimiter(content: &str) -> Option<String> {
    let chars: Vec<char> = content.chars().collect();
    let mut stack = Vec::new();
    let mut line = 1usize;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\n' => line += 1,
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                // 块注释可嵌套
                let mut depth = 1;
                i += 2;
                while i < chars.len() && depth > 0 {
                    match (chars[i], chars.get(i + 1)) {
                        ('/', Some('*')) => {
                            depth += 1;
                            i += 1;
                        }
                        ('*', Some('/')) => {
                            depth -= 1;
                            i += 1;
                        }
                        ('\n', _) => line += 1,
                        _ => {}
                    }
                    i += 1;
                }
                continue;
            }
            '"' => {
                i = skip_string(&chars, i + 1, None, &mut line);
                continue;
            }
            'r' if i == 0 || !is_ident_char(chars[i - 1]) => {
                let hashes = chars[i + 1..].iter().take_while(|n| **n == '#').count();
                if chars.get(i + 1 + hashes) == Some(&'"') {
                    i = skip_string(&chars, i + 2 + hashes, Some(hashes), &mut line);
                    continue;
                }
            }
            '\'' => match (chars.get(i + 1), chars.get(i + 2)) {
                // '\n'、'\''、'\u{7f}'
                (Some('\\'), _) => {
                    i += 3;
                    while i < chars.len() && chars[i] != '\'' && chars[i] != '\n' {
                        i += 1;
                    }
                    i += 1;
                    continue;
                }
                (Some(_), Some('\'')) => {
                    i += 3;
                    continue;
                }
                // 生命周期
                _ => {}
            },
            '{' | '(' | '[' => stack.push((c, line)),
            '}' | ')' | ']' => {
                let expected = match c {
                    '}' => '{',
                    ')' => '(',
                    _ => '[',
                };
                match stack.pop() {
                    Some((open, _)) if open == expected => {}
                    _ => return Some(format!("unexpected '{}' on line {}", c, line)),
                }
            }
            _ => {}
        }
        i += 1;
    }
    stack
        .pop()
        .map(|(open, l)| format!("unclosed '{}' opened on line {}", open, l))
}

/// 从 `start` 跳过字符串体，返回收尾引号之后的位置；原始字符串不处理转义
fn skip_string(chars: &[char], start: usize, raw_hashes: Option<usize>, line: &mut usize) -> usize {
    let mut i = start;
    while i < chars.len() {
        match chars[i] {
            '\n' => *line += 1,
            '\\' if raw_hashes.is_none() => {
                if chars.get(i + 1) == Some(&'\n') {
                    *line += 1;
                }
                i += 1;
            }
            '"' => {
                let hashes = raw_hashes.unwrap_or(0);
                if chars
                    .get(i + 1..i + 1 + hashes)
                    .is_some_and(|h| h.iter().all(|n| *n == '#'))
                {
                    return i + 1 + hashes;
                }
            }
            _ => {}
        }
        i += 1;
    }
    i
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}
