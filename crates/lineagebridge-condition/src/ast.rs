//! Condition expression tree

use crate::lexer::CmpOp;
use lineagebridge_core::DependencyKind;
use serde::Serialize;
use std::fmt;

/// Job state tested by a predicate
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Failure,
    NotRunning,
    ExitCode,
    Done,
    Terminated,
    /// Global variable test; not a job dependency
    Value,
    /// Keyword the scheduler language does not define
    Other(String),
}

impl Status {
    /// Map a predicate keyword, case-insensitively
    pub fn from_keyword(keyword: &str) -> Self {
        match keyword.to_ascii_lowercase().as_str() {
            "s" | "su" | "success" => Self::Success,
            "f" | "fa" | "failure" => Self::Failure,
            "n" | "nr" | "notrunning" => Self::NotRunning,
            "e" | "exitcode" => Self::ExitCode,
            "d" | "done" => Self::Done,
            "t" | "terminated" => Self::Terminated,
            "v" | "value" => Self::Value,
            _ => Self::Other(keyword.to_string()),
        }
    }

    pub fn keyword(&self) -> &str {
        match self {
            Self::Success => "s",
            Self::Failure => "f",
            Self::NotRunning => "n",
            Self::ExitCode => "e",
            Self::Done => "d",
            Self::Terminated => "t",
            Self::Value => "v",
            Self::Other(raw) => raw,
        }
    }

    /// Edge kind for the tested job, `None` for variable tests
    pub fn dependency_kind(&self) -> Option<DependencyKind> {
        match self {
            Self::Success => Some(DependencyKind::Success),
            Self::Failure => Some(DependencyKind::Failure),
            Self::NotRunning => Some(DependencyKind::NotRunning),
            Self::ExitCode => Some(DependencyKind::ExitCode),
            Self::Done | Self::Terminated | Self::Other(_) => Some(DependencyKind::Unknown),
            Self::Value => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Comparison {
    pub op: CmpOp,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Predicate {
    pub status: Status,
    /// Job (or variable) name as written, including any `^INSTANCE` suffix
    pub job: String,
    /// Look-back window (`s(JOB, 02.00)`)
    pub lookback: Option<String>,
    pub comparison: Option<Comparison>,
}

impl Predicate {
    /// Instance suffix of a cross-instance reference (`JOB^PRD`)
    pub fn instance(&self) -> Option<&str> {
        self.job.split_once('^').map(|(_, instance)| instance)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Predicate(Predicate),
    And(Vec<Condition>),
    Or(Vec<Condition>),
}

/// One job the condition waits on
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConditionDependency {
    pub job: String,
    pub kind: DependencyKind,
}

impl Condition {
    /// Predicates in source order
    pub fn predicates(&self) -> Vec<&Predicate> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            match node {
                Condition::Predicate(p) => out.push(p),
                Condition::And(items) | Condition::Or(items) => stack.extend(items.iter().rev()),
            }
        }
        out
    }

    /// Distinct (job, kind) pairs in first-seen order; variable tests are skipped
    pub fn dependencies(&self) -> Vec<ConditionDependency> {
        let mut out: Vec<ConditionDependency> = Vec::new();
        for predicate in self.predicates() {
            let Some(kind) = predicate.status.dependency_kind() else {
                continue;
            };
            let dep = ConditionDependency {
                job: predicate.job.clone(),
                kind,
            };
            if !out.contains(&dep) {
                out.push(dep);
            }
        }
        out
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}", self.status.keyword(), self.job)?;
        if let Some(lookback) = &self.lookback {
            write!(f, ", {}", lookback)?;
        }
        f.write_str(")")?;
        if let Some(cmp) = &self.comparison {
            write!(f, " {} \"{}\"", cmp.op.as_str(), cmp.value)?;
        }
        Ok(())
    }
}

impl fmt::Display for Condition {
    /// Canonical text; parsing it yields an equal tree
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (items, sep) = match self {
            Condition::Predicate(p) => return write!(f, "{}", p),
            Condition::And(items) => (items, " & "),
            Condition::Or(items) => (items, " | "),
        };
        for (idx, item) in items.iter().enumerate() {
            if idx > 0 {
                f.write_str(sep)?;
            }
            match item {
                Condition::Predicate(_) => write!(f, "{}", item)?,
                _ => write!(f, "({})", item)?,
            }
        }
        Ok(())
    }
}
