//! 校验结果与快速失败校验链

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::EngineMessage;

/// 单条校验的结果
///
/// `message` 为空表示通过；`variables` 是展示层替换用的 `$name value` 参数。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub message: Option<EngineMessage>,
    #[serde(default)]
    pub variables: Vec<String>,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self::default()
    }

    pub fn fail(message: EngineMessage) -> Self {
        Self {
            message: Some(message),
            variables: Vec::new(),
        }
    }

    /// 追加消息参数
    pub fn with_variable(mut self, name: &str, value: impl fmt::Display) -> Self {
        self.variables.push(format!("${} {}", name, value));
        self
    }

    pub fn is_valid(&self) -> bool {
        self.message.is_none()
    }

    /// 条件失败
    pub fn fail_if(condition: bool, message: EngineMessage) -> Self {
        if condition {
            Self::fail(message)
        } else {
            Self::valid()
        }
    }
}

/// 校验规则
///
/// 规则针对一个只读快照求值，不得产生副作用。
pub trait ValidationRule {
    type Subject;

    /// 规则名称，用于日志
    fn name(&self) -> &'static str;

    fn evaluate(&self, subject: &Self::Subject) -> ValidationResult;
}

/// 按顺序求值，遇到第一条失败即停止
pub fn evaluate_chain<R: ValidationRule>(rules: &[R], subject: &R::Subject) -> ValidationResult {
    for rule in rules {
        let result = rule.evaluate(subject);
        if let Some(message) = result.message {
            debug!("Validation rule {} failed: {}", rule.name(), message);
            return result;
        }
    }
    ValidationResult::valid()
}

/// 对调用方暴露的校验结论
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub valid: bool,
    /// 失败时恰好一条
    pub messages: Vec<EngineMessage>,
    pub variables: Vec<String>,
}

impl ValidationOutcome {
    pub fn passed() -> Self {
        Self {
            valid: true,
            ..Default::default()
        }
    }

    /// 失败原因码
    pub fn reason(&self) -> Option<EngineMessage> {
        self.messages.first().copied()
    }
}

impl From<ValidationResult> for ValidationOutcome {
    fn from(result: ValidationResult) -> Self {
        match result.message {
            None => Self::passed(),
            Some(message) => Self {
                valid: false,
                messages: vec![message],
                variables: result.variables,
            },
        }
    }
}

impl fmt::Display for ValidationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason() {
            None => f.write_str("valid"),
            Some(reason) if self.variables.is_empty() => write!(f, "{}", reason),
            Some(reason) => write!(f, "{} ({})", reason, self.variables.join(", ")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct CountingRule<'a> {
        fails: bool,
        calls: &'a Cell<usize>,
    }

    impl ValidationRule for CountingRule<'_> {
        type Subject = ();

        fn name(&self) -> &'static str {
            "counting"
        }

        fn evaluate(&self, _: &()) -> ValidationResult {
            self.calls.set(self.calls.get() + 1);
            ValidationResult::fail_if(self.fails, EngineMessage::DisksLocked)
        }
    }

    #[test]
    fn test_chain_stops_at_first_failure() {
        let calls = Cell::new(0);
        let rules = [
            CountingRule { fails: false, calls: &calls },
            CountingRule { fails: true, calls: &calls },
            CountingRule { fails: true, calls: &calls },
        ];

        let result = evaluate_chain(&rules, &());
        assert_eq!(result.message, Some(EngineMessage::DisksLocked));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_empty_chain_passes() {
        let rules: [CountingRule; 0] = [];
        assert!(evaluate_chain(&rules, &()).is_valid());
    }

    #[test]
    fn test_outcome_from_result() {
        let outcome: ValidationOutcome = ValidationResult::fail(EngineMessage::DisksIllegal)
            .with_variable("diskAliases", "data-1")
            .into();
        assert!(!outcome.valid);
        assert_eq!(outcome.messages, vec![EngineMessage::DisksIllegal]);
        assert_eq!(outcome.variables, vec!["$diskAliases data-1".to_string()]);
        assert_eq!(outcome.to_string(), "DISKS_ILLEGAL ($diskAliases data-1)");

        let passed: ValidationOutcome = ValidationResult::valid().into();
        assert!(passed.valid);
        assert!(passed.messages.is_empty());
    }
}
