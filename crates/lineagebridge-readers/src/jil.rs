//! Job scheduler definitions (JIL)
//!
//! A JIL export is a sequence of `insert_job`, `update_job` and `delete_job`
//! statements, each followed by `attribute: value` lines. Lines that do not
//! start with an attribute continue the previous attribute's value.

use once_cell::sync::Lazy;
use regex::Regex;

static ATTRIBUTE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z][A-Za-z0-9_]+)\s*:\s?(.*)$").expect("valid regex"));

static NAME_WITH_TYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?P<name>\S+)\s+job_type\s*:\s*(?P<job_type>\S+)\s*$").expect("valid regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JilVerb {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JilJob {
    pub name: String,
    /// Raw attributes in first-seen order, keys lowercased
    pub attributes: Vec<(String, String)>,
    /// 1-indexed line of the statement
    pub line: usize,
    /// Only `update_job` statements named it; the job is defined elsewhere
    pub update_only: bool,
}

impl JilJob {
    fn new(name: impl Into<String>, line: usize) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            line,
            update_only: false,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }

    pub fn job_type(&self) -> Option<&str> {
        self.get("job_type")
    }

    pub fn box_name(&self) -> Option<&str> {
        self.get("box_name")
    }

    pub fn command(&self) -> Option<&str> {
        self.get("command")
    }

    pub fn condition(&self) -> Option<&str> {
        self.get("condition")
    }

    /// Set an attribute, replacing an earlier value
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((key.to_string(), value)),
        }
    }

    fn append(&mut self, key: &str, separator: &str, more: &str) {
        if let Some(slot) = self.attributes.iter_mut().find(|(k, _)| k == key) {
            if !slot.1.is_empty() {
                slot.1.push_str(separator);
            }
            slot.1.push_str(more);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JilStatement {
    pub verb: JilVerb,
    pub job: JilJob,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JilWarning {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JilDocument {
    pub statements: Vec<JilStatement>,
    pub warnings: Vec<JilWarning>,
}

impl JilDocument {
    /// Apply the statements in order and return the surviving jobs
    pub fn jobs(&self) -> Vec<JilJob> {
        apply_statements(self.statements.iter().cloned())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JilError {
    #[error("no insert_job, update_job or delete_job statement found")]
    NoStatements,
}

/// Apply insert/update/delete statements, keeping first-insert order
pub fn apply_statements(statements: impl IntoIterator<Item = JilStatement>) -> Vec<JilJob> {
    let mut jobs: Vec<JilJob> = Vec::new();

    for statement in statements {
        let position = jobs.iter().position(|j| j.name == statement.job.name);
        match (statement.verb, position) {
            (JilVerb::Delete, Some(idx)) => {
                jobs.remove(idx);
            }
            (JilVerb::Delete, None) => {}
            (JilVerb::Insert, Some(idx)) => jobs[idx] = statement.job,
            (JilVerb::Update, Some(idx)) => {
                for (key, value) in statement.job.attributes {
                    jobs[idx].set(&key, value);
                }
            }
            (JilVerb::Update, None) => jobs.push(JilJob {
                update_only: true,
                ..statement.job
            }),
            (JilVerb::Insert, None) => jobs.push(statement.job),
        }
    }

    jobs
}

fn unquote(value: &str) -> &str {
    let v = value.trim();
    if v.len() >= 2 && v.starts_with('"') && v.ends_with('"') {
        &v[1..v.len() - 1]
    } else {
        v
    }
}

fn continuation_separator(key: &str) -> &'static str {
    if key == "command" {
        "\n"
    } else {
        " "
    }
}

/// Parse one JIL text
pub fn parse_jil(text: &str) -> Result<JilDocument, JilError> {
    let mut doc = JilDocument::default();
    let mut current: Option<JilStatement> = None;
    let mut last_key: Option<String> = None;
    let mut in_block_comment = false;

    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let mut line = raw_line.trim();

        if in_block_comment {
            match line.find("*/") {
                Some(end) => {
                    in_block_comment = false;
                    line = line[end + 2..].trim();
                }
                None => continue,
            }
        }
        if line.starts_with("/*") {
            match line.find("*/") {
                Some(end) => line = line[end + 2..].trim(),
                None => {
                    in_block_comment = true;
                    continue;
                }
            }
        }
        if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
            continue;
        }

        let Some(caps) = ATTRIBUTE_LINE.captures(line) else {
            match (current.as_mut(), last_key.as_deref()) {
                (Some(statement), Some(key)) => {
                    statement.job.append(key, continuation_separator(key), line)
                }
                _ => doc.warnings.push(JilWarning {
                    line: line_no,
                    message: format!("text outside of a job definition: {}", line),
                }),
            }
            continue;
        };

        let key = caps[1].to_ascii_lowercase();
        let value = caps[2].trim();

        let verb = match key.as_str() {
            "insert_job" => Some(JilVerb::Insert),
            "update_job" => Some(JilVerb::Update),
            "delete_job" => Some(JilVerb::Delete),
            _ => None,
        };

        if let Some(verb) = verb {
            if let Some(done) = current.take() {
                doc.statements.push(done);
            }
            let (name, job_type) = match NAME_WITH_TYPE.captures(value) {
                Some(c) => (c["name"].to_string(), Some(c["job_type"].to_string())),
                None => (unquote(value).to_string(), None),
            };
            if name.is_empty() {
                doc.warnings.push(JilWarning {
                    line: line_no,
                    message: format!("{} without a job name", key),
                });
                last_key = None;
                continue;
            }
            let mut job = JilJob::new(name, line_no);
            if let Some(job_type) = job_type {
                job.set("job_type", job_type);
            }
            current = Some(JilStatement { verb, job });
            last_key = None;
            continue;
        }

        match current.as_mut() {
            Some(statement) => {
                statement.job.set(&key, unquote(value));
                last_key = Some(key);
            }
            None => doc.warnings.push(JilWarning {
                line: line_no,
                message: format!("attribute '{}' before any job definition", key),
            }),
        }
    }

    if let Some(done) = current.take() {
        doc.statements.push(done);
    }

    if doc.statements.is_empty() {
        return Err(JilError::NoStatements);
    }

    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SIMPLE: &str = r#"
    /* nightly load */
    insert_job: BOX_A
    job_type: box

    insert_job: JOB_1
    job_type: command
    box_name: BOX_A
    command: echo hi

    insert_job: JOB_2
    job_type: command
    box_name: BOX_A
    condition: s(JOB_1)
    "#;

    #[test]
    fn parses_simple_export() {
        let doc = parse_jil(SIMPLE).unwrap();
        let jobs = doc.jobs();
        let names: Vec<&str> = jobs.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec!["BOX_A", "JOB_1", "JOB_2"]);
        assert_eq!(jobs[0].job_type(), Some("box"));
        assert_eq!(jobs[1].command(), Some("echo hi"));
        assert_eq!(jobs[2].box_name(), Some("BOX_A"));
        assert_eq!(jobs[2].condition(), Some("s(JOB_1)"));
        assert!(doc.warnings.is_empty());
    }

    #[test]
    fn continuation_lines_extend_last_attribute() {
        let doc = parse_jil(
            "insert_job: J\ncommand: pmcmd startworkflow -f SALES \\\n  wf_load_orders\ncondition: s(A) &\n  s(B)\n",
        )
        .unwrap();
        let job = &doc.jobs()[0];
        assert_eq!(job.command(), Some("pmcmd startworkflow -f SALES \\\nwf_load_orders"));
        assert_eq!(job.condition(), Some("s(A) & s(B)"));
    }

    #[test]
    fn job_type_on_insert_line_and_comments() {
        let doc = parse_jil(
            "# header\n/* multi\n line */\ninsert_job: LOAD_X   job_type: CMD\nowner: \"etl@host\"\n",
        )
        .unwrap();
        let job = &doc.jobs()[0];
        assert_eq!(job.name, "LOAD_X");
        assert_eq!(job.job_type(), Some("CMD"));
        assert_eq!(job.get("owner"), Some("etl@host"));
        assert_eq!(job.line, 4);
    }

    #[test]
    fn update_and_delete_apply_in_order() {
        let doc = parse_jil(
            "insert_job: A\ncommand: one\nmachine: m1\n\
             insert_job: B\ncommand: two\n\
             update_job: A\ncommand: three\n\
             delete_job: B\n",
        )
        .unwrap();
        let jobs = doc.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].command(), Some("three"));
        assert_eq!(jobs[0].get("machine"), Some("m1"));
        assert!(!jobs[0].update_only);
    }

    #[test]
    fn update_of_a_job_defined_elsewhere() {
        let jobs = parse_jil("update_job: A
condition: s(Z)

insert_job: B
command: b.sh
")
            .unwrap()
            .jobs();
        assert_eq!(jobs.len(), 2);
        assert!(jobs[0].update_only);
        assert_eq!(jobs[0].condition(), Some("s(Z)"));
        assert!(!jobs[1].update_only);
    }

    #[test]
    fn windows_paths_are_not_attributes() {
        let doc = parse_jil("insert_job: W\ncommand: run.bat\nC:\\jobs\\run.bat --full\n").unwrap();
        assert_eq!(doc.jobs()[0].command(), Some("run.bat\nC:\\jobs\\run.bat --full"));
    }

    #[test]
    fn text_without_statements_is_an_error() {
        assert!(matches!(parse_jil("just some text\n"), Err(JilError::NoStatements)));
        assert!(matches!(parse_jil(""), Err(JilError::NoStatements)));
    }
}
