//! Cross-graph bridging
//!
//! A rule applies a pattern to one field of every job in the source graph;
//! each match names a candidate job in the target graph. Bridges are an
//! overlay: neither graph's identities change.

use crate::graph::SourceGraph;
use lineagebridge_core::{BridgeEdge, BridgeRuleConfig, Diagnostic, DiagnosticCode};
use regex::Regex;
use std::collections::BTreeSet;

#[derive(Debug, thiserror::Error)]
#[error("invalid bridge pattern '{pattern}': {source}")]
pub struct BridgeError {
    pub pattern: String,
    #[source]
    pub source: regex::Error,
}

#[derive(Debug, Clone)]
pub struct BridgeRule {
    /// Source graph label (instance or system tag)
    pub from: String,
    /// Target graph label (instance or system tag)
    pub to: String,
    /// `name`, `key` or a job property
    pub field: String,
    pattern: Regex,
}

impl BridgeRule {
    pub fn new(from: &str, to: &str, pattern: &str, field: &str) -> Result<Self, BridgeError> {
        let pattern = Regex::new(pattern).map_err(|source| BridgeError {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            from: from.to_string(),
            to: to.to_string(),
            field: field.to_string(),
            pattern,
        })
    }

    pub fn from_config(config: &BridgeRuleConfig) -> Result<Self, BridgeError> {
        Self::new(&config.from, &config.to, &config.pattern, &config.field)
    }

    /// One candidate per non-overlapping match
    ///
    /// The candidate is the `target` group, else `wf`, else the first
    /// group, else the whole match.
    pub fn candidates(&self, text: &str) -> Vec<String> {
        let mut out = Vec::new();
        for caps in self.pattern.captures_iter(text) {
            let candidate = caps
                .name("target")
                .or_else(|| caps.name("wf"))
                .or_else(|| caps.get(1))
                .or_else(|| caps.get(0))
                .map(|m| m.as_str().trim().to_string());
            if let Some(candidate) = candidate.filter(|c| !c.is_empty()) {
                if !out.contains(&candidate) {
                    out.push(candidate);
                }
            }
        }
        out
    }

    /// Bridges from `from` into `to`
    ///
    /// A candidate with no job in `to` yields an informational diagnostic;
    /// a job whose field does not match yields nothing at all.
    pub fn resolve(&self, from: &SourceGraph, to: &SourceGraph) -> (Vec<BridgeEdge>, Vec<Diagnostic>) {
        let mut bridges = Vec::new();
        let mut diagnostics = Vec::new();

        for job in &from.jobs {
            let Some(text) = from.job_field(job, &self.field) else {
                continue;
            };
            for candidate in self.candidates(text) {
                match to.find_job(&candidate) {
                    Some(target) => {
                        let bridge = BridgeEdge {
                            from_graph: from.id.clone(),
                            from_job: job.id,
                            to_graph: to.id.clone(),
                            to_job: target,
                            matched: candidate,
                        };
                        if !bridges.contains(&bridge) {
                            bridges.push(bridge);
                        }
                    }
                    None => diagnostics.push(
                        Diagnostic::of(
                            DiagnosticCode::UnresolvedBridgeTarget,
                            format!("'{}' names '{}', which {} does not define", job.key, candidate, to.id),
                        )
                        .with_subject(job.key.clone())
                        .with_related(vec![candidate]),
                    ),
                }
            }
        }

        (bridges, diagnostics)
    }
}

/// Apply every rule to every pair of graphs its labels select
pub fn apply_rules(rules: &[BridgeRule], graphs: &[SourceGraph]) -> (Vec<BridgeEdge>, Vec<Diagnostic>) {
    let mut bridges = BTreeSet::new();
    let mut diagnostics = Vec::new();

    for rule in rules {
        for from in graphs.iter().filter(|g| g.id.matches_label(&rule.from)) {
            for to in graphs.iter().filter(|g| g.id.matches_label(&rule.to) && g.id != from.id) {
                let (found, diags) = rule.resolve(from, to);
                tracing::debug!(from = %from.id, to = %to.id, bridges = found.len(), "bridge rule applied");
                bridges.extend(found);
                diagnostics.extend(diags);
            }
        }
    }

    (bridges.into_iter().collect(), diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{GraphBuilder, JobSpec};
    use lineagebridge_core::config::DEFAULT_AUTOSYS_INFORMATICA_PATTERN;
    use lineagebridge_core::{GraphId, JobKind, SourceSystem};
    use pretty_assertions::assert_eq;

    fn scheduler(commands: &[(&str, &str)]) -> SourceGraph {
        let mut b = GraphBuilder::new(GraphId::of(SourceSystem::Autosys));
        let c = b.container("__autosys__", "__autosys__");
        for (name, command) in commands {
            b.job(JobSpec::new(*name, *name, c, JobKind::SchedulerCommand).property("command", *command));
        }
        b.finish()
    }

    fn repository(workflows: &[&str]) -> SourceGraph {
        let mut b = GraphBuilder::new(GraphId::of(SourceSystem::Informatica));
        let c = b.container("SALES", "SALES");
        for name in workflows {
            b.job(JobSpec::new(format!("SALES/{}", name), *name, c, JobKind::Workflow));
        }
        b.finish()
    }

    #[test]
    fn candidate_groups() {
        let named = BridgeRule::new("a", "b", r"-w\s+(?P<target>\w+)", "command").unwrap();
        assert_eq!(named.candidates("pmcmd startworkflow -w wf_a; pmcmd startworkflow -w wf_b"), vec!["wf_a", "wf_b"]);

        let positional = BridgeRule::new("a", "b", r"run_(\w+)\.sh", "command").unwrap();
        assert_eq!(positional.candidates("/opt/run_orders.sh"), vec!["orders"]);

        let whole = BridgeRule::new("a", "b", r"wf_\w+", "command").unwrap();
        assert_eq!(whole.candidates("start wf_x then wf_x"), vec!["wf_x"]);
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        let err = BridgeRule::new("a", "b", "(unclosed", "command").unwrap_err();
        assert!(err.to_string().contains("(unclosed"));
    }

    #[test]
    fn default_rule_links_scheduler_commands_to_workflows() {
        let from = scheduler(&[("RUN_LOAD", "pmcmd startworkflow -sv INT -d DOM -f SALES wf_load_orders")]);
        let to = repository(&["wf_load_orders"]);
        let rule = BridgeRule::new("autosys", "informatica", DEFAULT_AUTOSYS_INFORMATICA_PATTERN, "command").unwrap();

        let (bridges, diagnostics) = rule.resolve(&from, &to);
        assert_eq!(bridges.len(), 1);
        assert_eq!(bridges[0].matched, "wf_load_orders");
        assert_eq!(to.job(bridges[0].to_job).unwrap().key, "SALES/wf_load_orders");
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn unknown_candidate_is_informational() {
        let from = scheduler(&[("RUN_X", "pmcmd startworkflow -f SALES wf_missing")]);
        let to = repository(&["wf_load_orders"]);
        let rule = BridgeRule::new("autosys", "informatica", DEFAULT_AUTOSYS_INFORMATICA_PATTERN, "command").unwrap();

        let (bridges, diagnostics) = rule.resolve(&from, &to);
        assert!(bridges.is_empty());
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].code, DiagnosticCode::UnresolvedBridgeTarget);
    }

    #[test]
    fn rules_select_graphs_by_label() {
        let graphs = vec![
            scheduler(&[("RUN_LOAD", "pmcmd startworkflow -f SALES wf_load_orders")]),
            repository(&["wf_load_orders"]),
        ];
        let rules = vec![BridgeRule::new("autosys", "informatica", DEFAULT_AUTOSYS_INFORMATICA_PATTERN, "command").unwrap()];
        let (bridges, _) = apply_rules(&rules, &graphs);
        assert_eq!(bridges.len(), 1);

        let reversed = vec![BridgeRule::new("informatica", "autosys", DEFAULT_AUTOSYS_INFORMATICA_PATTERN, "command").unwrap()];
        assert!(apply_rules(&reversed, &graphs).0.is_empty());
    }
}
