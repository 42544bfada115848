//! Workflow repository exports (pmrep objectexport XML)
//!
//! Export layouts vary by version: sources and targets may be defined at
//! folder or mapping level, ports may sit inside TRANSFORMATION elements or
//! directly under the mapping. The reader keeps whatever structure is present
//! and leaves traversal to the extractor.

use crate::xml::{parse_document, XmlElement, XmlError};
use once_cell::sync::Lazy;
use regex::Regex;

static SQL_LIKE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(select|insert|merge|update|delete|call|exec|execute|truncate)\b")
        .expect("valid regex")
});

/// Attribute names whose values carry SQL
const SQL_ATTRIBUTES: &[&str] = &[
    "sql query",
    "sql override",
    "user defined join",
    "lookup sql override",
    "pre sql",
    "post sql",
    "target update override",
    "update override",
    "stored procedure",
    "query",
];

const OWNER_ATTRIBUTES: &[&str] = &["owner name", "schema", "schema name"];
const DATABASE_ATTRIBUTES: &[&str] = &["db name", "database", "database name"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlAttribute {
    /// Attribute name as exported (`Sql Query`, `Pre SQL`)
    pub name: String,
    pub text: String,
}

/// Source or target definition
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableDef {
    pub name: String,
    pub owner: Option<String>,
    pub database: Option<String>,
    /// (field name, datatype)
    pub fields: Vec<(String, Option<String>)>,
    pub sql: Vec<SqlAttribute>,
}

impl TableDef {
    /// Dotted name from whatever qualification the export carries
    pub fn qualified_name(&self) -> String {
        [self.database.as_deref(), self.owner.as_deref(), Some(self.name.as_str())]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(".")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub name: String,
    /// INPUT, OUTPUT, INPUT/OUTPUT, VARIABLE, LOOKUP/OUTPUT, ...
    pub port_type: String,
    pub expression: Option<String>,
    pub data_type: Option<String>,
}

impl Port {
    pub fn is_input(&self) -> bool {
        self.port_type.contains("INPUT")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transformation {
    pub name: String,
    /// Exported TYPE (`Expression`, `Aggregator`, `Source Qualifier`, ...)
    pub kind: String,
    pub ports: Vec<Port>,
    pub sql: Vec<SqlAttribute>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceRole {
    Source,
    Target,
    Transformation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub name: String,
    /// Referenced definition (source, target or transformation name)
    pub reference: String,
    pub role: InstanceRole,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connector {
    pub from_instance: String,
    pub from_field: String,
    pub to_instance: String,
    pub to_field: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mapping {
    pub name: String,
    pub sources: Vec<TableDef>,
    pub targets: Vec<TableDef>,
    pub transformations: Vec<Transformation>,
    pub instances: Vec<Instance>,
    pub connectors: Vec<Connector>,
    /// Ports exported directly under the mapping, keyed by owning instance
    pub loose_ports: Vec<(String, Port)>,
    /// SQL-bearing attributes found anywhere under the mapping
    pub sql: Vec<SqlAttribute>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub name: String,
    pub mapping: Option<String>,
    pub sql: Vec<SqlAttribute>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInstance {
    pub name: String,
    pub task_name: String,
    pub task_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowLink {
    pub from_task: String,
    pub to_task: String,
    pub condition: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Workflow {
    pub name: String,
    pub tasks: Vec<TaskInstance>,
    pub links: Vec<WorkflowLink>,
    pub sql: Vec<SqlAttribute>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Folder {
    pub name: String,
    pub sources: Vec<TableDef>,
    pub targets: Vec<TableDef>,
    /// Reusable transformations defined at folder level
    pub transformations: Vec<Transformation>,
    pub mappings: Vec<Mapping>,
    pub sessions: Vec<Session>,
    pub workflows: Vec<Workflow>,
}

impl Folder {
    fn is_empty(&self) -> bool {
        self.sources.is_empty()
            && self.targets.is_empty()
            && self.mappings.is_empty()
            && self.sessions.is_empty()
            && self.workflows.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositoryExport {
    pub folders: Vec<Folder>,
}

#[derive(Debug, thiserror::Error)]
pub enum InformaticaError {
    #[error(transparent)]
    Xml(#[from] XmlError),

    #[error("export contains no folders, mappings, sessions or workflows")]
    NoContent,
}

fn name_of(el: &XmlElement) -> Option<String> {
    el.attr_nonempty("NAME").map(str::to_string)
}

/// Whether text looks like SQL rather than a filter or file name
pub fn looks_like_sql(text: &str) -> bool {
    SQL_LIKE.is_match(text)
}

fn sql_attribute(el: &XmlElement) -> Option<SqlAttribute> {
    let name = el.attr_nonempty("NAME")?;
    let value = el.attr_nonempty("VALUE")?;
    let lowered = name.to_ascii_lowercase();
    (SQL_ATTRIBUTES.contains(&lowered.as_str()) && looks_like_sql(value)).then(|| SqlAttribute {
        name: name.to_string(),
        text: value.to_string(),
    })
}

fn collect_sql(scope: &XmlElement) -> Vec<SqlAttribute> {
    collect_sql_outside(scope, &[])
}

/// SQL attributes below `scope`, not descending into elements named in `skip`
fn collect_sql_outside(scope: &XmlElement, skip: &[&str]) -> Vec<SqlAttribute> {
    let mut out = Vec::new();
    let mut stack: Vec<&XmlElement> = scope.children.iter().rev().collect();
    while let Some(el) = stack.pop() {
        if skip.iter().any(|s| el.is(s)) {
            continue;
        }
        if el.is("TABLEATTRIBUTE") || el.is("ATTRIBUTE") {
            out.extend(sql_attribute(el));
        }
        stack.extend(el.children.iter().rev());
    }
    out
}

fn table_def(el: &XmlElement) -> Option<TableDef> {
    let mut def = TableDef {
        name: name_of(el)?,
        owner: el.attr_nonempty("OWNERNAME").map(str::to_string),
        ..Default::default()
    };

    for attr in el.children_named("TABLEATTRIBUTE") {
        let Some(value) = attr.attr_nonempty("VALUE") else {
            continue;
        };
        let key = attr.attr("NAME").unwrap_or("").trim().to_ascii_lowercase();
        if OWNER_ATTRIBUTES.contains(&key.as_str()) {
            def.owner = Some(value.to_string());
        } else if DATABASE_ATTRIBUTES.contains(&key.as_str()) {
            def.database = Some(value.to_string());
        }
    }

    def.fields = el
        .children
        .iter()
        .filter(|c| c.is("SOURCEFIELD") || c.is("TARGETFIELD"))
        .filter_map(|c| {
            Some((name_of(c)?, c.attr_nonempty("DATATYPE").map(str::to_string)))
        })
        .collect();
    def.sql = collect_sql(el);

    Some(def)
}

fn port(el: &XmlElement) -> Option<Port> {
    Some(Port {
        name: name_of(el)?,
        port_type: el
            .attr_nonempty("PORTTYPE")
            .unwrap_or("UNKNOWN")
            .to_ascii_uppercase(),
        expression: el.attr_nonempty("EXPRESSION").map(str::to_string),
        data_type: el.attr_nonempty("DATATYPE").map(str::to_string),
    })
}

fn transformation(el: &XmlElement) -> Option<Transformation> {
    Some(Transformation {
        name: name_of(el)?,
        kind: el.attr("TYPE").unwrap_or("").trim().to_string(),
        ports: el.children_named("TRANSFORMFIELD").filter_map(port).collect(),
        sql: collect_sql(el),
    })
}

fn instance(el: &XmlElement) -> Option<Instance> {
    let name = name_of(el)?;
    let reference = el
        .attr_nonempty("TRANSFORMATION_NAME")
        .or_else(|| el.attr_nonempty("TRANSFORMATIONNAME"))
        .or_else(|| el.attr_nonempty("REFOBJECTNAME"))
        .unwrap_or(&name)
        .to_string();
    let kind = el.attr("TYPE").unwrap_or("").to_ascii_lowercase();
    let transformation_type = el
        .attr("TRANSFORMATION_TYPE")
        .unwrap_or("")
        .to_ascii_lowercase();
    let role = if kind == "source" || transformation_type == "source definition" {
        InstanceRole::Source
    } else if kind == "target" || transformation_type == "target definition" {
        InstanceRole::Target
    } else {
        InstanceRole::Transformation
    };
    Some(Instance {
        name,
        reference,
        role,
    })
}

fn connector(el: &XmlElement) -> Option<Connector> {
    Some(Connector {
        from_instance: el.attr_nonempty("FROMINSTANCE")?.to_string(),
        from_field: el.attr_nonempty("FROMFIELD")?.to_string(),
        to_instance: el.attr_nonempty("TOINSTANCE")?.to_string(),
        to_field: el.attr_nonempty("TOFIELD")?.to_string(),
    })
}

fn mapping(el: &XmlElement) -> Option<Mapping> {
    let mut m = Mapping {
        name: name_of(el)?,
        ..Default::default()
    };

    for child in el.descendants() {
        match child.local_name().to_ascii_uppercase().as_str() {
            "SOURCE" => m.sources.extend(table_def(child)),
            "TARGET" => m.targets.extend(table_def(child)),
            "TRANSFORMATION" => m.transformations.extend(transformation(child)),
            "INSTANCE" => m.instances.extend(instance(child)),
            "CONNECTOR" => m.connectors.extend(connector(child)),
            _ => {}
        }
    }

    for field in el.children_named("TRANSFORMFIELD") {
        let owner = field
            .attr_nonempty("TRANSFORMATIONINSTANCENAME")
            .or_else(|| field.attr_nonempty("TRANSFORMATIONNAME"));
        if let (Some(owner), Some(p)) = (owner, port(field)) {
            m.loose_ports.push((owner.to_string(), p));
        }
    }

    m.sql = collect_sql(el);
    Some(m)
}

fn session(el: &XmlElement) -> Option<Session> {
    Some(Session {
        name: name_of(el)?,
        mapping: el.attr_nonempty("MAPPINGNAME").map(str::to_string),
        sql: collect_sql(el),
    })
}

fn workflow(el: &XmlElement) -> Option<Workflow> {
    let mut wf = Workflow {
        name: name_of(el)?,
        ..Default::default()
    };

    wf.tasks = el
        .find_all("TASKINSTANCE")
        .into_iter()
        .filter_map(|t| {
            let name = name_of(t)?;
            Some(TaskInstance {
                task_name: t.attr_nonempty("TASKNAME").unwrap_or(&name).to_string(),
                task_type: t.attr("TASKTYPE").unwrap_or("").trim().to_string(),
                name,
            })
        })
        .collect();

    if wf.tasks.is_empty() {
        wf.tasks = el
            .find_all("TASK")
            .into_iter()
            .filter_map(|t| {
                let name = name_of(t)?;
                Some(TaskInstance {
                    task_name: name.clone(),
                    task_type: t.attr("TYPE").unwrap_or("").trim().to_string(),
                    name,
                })
            })
            .collect();
    }

    wf.links = el
        .find_all("WORKFLOWLINK")
        .into_iter()
        .filter_map(|l| {
            Some(WorkflowLink {
                from_task: l.attr_nonempty("FROMTASK")?.to_string(),
                to_task: l.attr_nonempty("TOTASK")?.to_string(),
                condition: l.attr_nonempty("CONDITION").map(str::to_string),
            })
        })
        .collect();

    wf.sql = collect_sql_outside(el, &["SESSION"]);
    Some(wf)
}

fn folder(el: &XmlElement, name: String) -> Folder {
    let mut f = Folder {
        name,
        ..Default::default()
    };

    f.sources = el.children_named("SOURCE").filter_map(table_def).collect();
    f.targets = el.children_named("TARGET").filter_map(table_def).collect();
    f.transformations = el
        .children_named("TRANSFORMATION")
        .filter_map(transformation)
        .collect();
    f.mappings = el.find_all("MAPPING").into_iter().filter_map(mapping).collect();
    f.workflows = el.find_all("WORKFLOW").into_iter().filter_map(workflow).collect();

    for s in el.find_all("SESSION").into_iter().filter_map(session) {
        if !f.sessions.iter().any(|known| known.name == s.name) {
            f.sessions.push(s);
        }
    }

    f
}

/// Parse one export; `default_folder` names content outside any FOLDER element
pub fn parse_repository(xml: &str, default_folder: &str) -> Result<RepositoryExport, InformaticaError> {
    let root = parse_document(xml)?;

    let folder_elements = if root.is("FOLDER") {
        vec![&root]
    } else {
        root.find_all("FOLDER")
    };

    let folders: Vec<Folder> = if folder_elements.is_empty() {
        vec![folder(&root, default_folder.to_string())]
    } else {
        folder_elements
            .into_iter()
            .map(|el| folder(el, name_of(el).unwrap_or_else(|| default_folder.to_string())))
            .collect()
    };

    let folders: Vec<Folder> = folders.into_iter().filter(|f| !f.is_empty()).collect();
    if folders.is_empty() {
        return Err(InformaticaError::NoContent);
    }

    Ok(RepositoryExport { folders })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn minimal_mapping_without_folder() {
        let export = parse_repository(
            r#"<?xml version="1.0"?>
            <ROOT>
              <MAPPING NAME="M1">
                <SOURCE NAME="SRC_T"/>
                <TARGET NAME="TGT_T"/>
                <INSTANCE NAME="SRC_INST" TYPE="source" TRANSFORMATIONNAME="SRC_T"/>
                <INSTANCE NAME="TGT_INST" TYPE="target" TRANSFORMATIONNAME="TGT_T"/>
                <TRANSFORMFIELD TRANSFORMATIONNAME="TGT_INST" NAME="COL_A" PORTTYPE="OUTPUT" EXPRESSION="SRC_COL"/>
                <TRANSFORMFIELD TRANSFORMATIONNAME="SRC_INST" NAME="SRC_COL" PORTTYPE="OUTPUT"/>
                <CONNECTOR FROMINSTANCE="SRC_INST" FROMFIELD="SRC_COL" TOINSTANCE="TGT_INST" TOFIELD="SRC_COL"/>
              </MAPPING>
            </ROOT>"#,
            "F",
        )
        .unwrap();

        assert_eq!(export.folders.len(), 1);
        let folder = &export.folders[0];
        assert_eq!(folder.name, "F");
        let m = &folder.mappings[0];
        assert_eq!(m.sources[0].name, "SRC_T");
        assert_eq!(m.targets[0].name, "TGT_T");
        assert_eq!(m.instances[0].role, InstanceRole::Source);
        assert_eq!(m.instances[1].reference, "TGT_T");
        assert_eq!(m.loose_ports.len(), 2);
        assert_eq!(m.loose_ports[0].0, "TGT_INST");
        assert_eq!(m.loose_ports[0].1.expression.as_deref(), Some("SRC_COL"));
        assert_eq!(m.connectors.len(), 1);
    }

    #[test]
    fn folder_level_definitions_sessions_and_workflows() {
        let export = parse_repository(
            r#"<POWERMART><REPOSITORY NAME="REP"><FOLDER NAME="SALES">
                <SOURCE NAME="ORDERS" OWNERNAME="OLTP">
                  <SOURCEFIELD NAME="ID" DATATYPE="number"/>
                  <SOURCEFIELD NAME="AMOUNT" DATATYPE="number"/>
                </SOURCE>
                <TARGET NAME="F_ORDERS">
                  <TABLEATTRIBUTE NAME="Database Name" VALUE="DWH"/>
                  <TABLEATTRIBUTE NAME="Schema Name" VALUE="MART"/>
                </TARGET>
                <MAPPING NAME="m_orders">
                  <TRANSFORMATION NAME="SQ_ORDERS" TYPE="Source Qualifier">
                    <TRANSFORMFIELD NAME="ID" PORTTYPE="INPUT/OUTPUT"/>
                    <TABLEATTRIBUTE NAME="Sql Query" VALUE="SELECT ID, AMOUNT FROM OLTP.ORDERS"/>
                    <TABLEATTRIBUTE NAME="Source Filter" VALUE="AMOUNT &gt; 0"/>
                  </TRANSFORMATION>
                  <INSTANCE NAME="ORDERS" TRANSFORMATION_NAME="ORDERS" TRANSFORMATION_TYPE="Source Definition" TYPE="SOURCE"/>
                </MAPPING>
                <WORKFLOW NAME="wf_orders">
                  <SESSION NAME="s_m_orders" MAPPINGNAME="m_orders">
                    <ATTRIBUTE NAME="Pre SQL" VALUE="TRUNCATE TABLE MART.F_ORDERS"/>
                  </SESSION>
                  <TASKINSTANCE NAME="Start" TASKNAME="Start" TASKTYPE="Start"/>
                  <TASKINSTANCE NAME="s_m_orders" TASKNAME="s_m_orders" TASKTYPE="Session"/>
                  <WORKFLOWLINK FROMTASK="Start" TOTASK="s_m_orders" CONDITION=""/>
                </WORKFLOW>
            </FOLDER></REPOSITORY></POWERMART>"#,
            "DEFAULT",
        )
        .unwrap();

        let folder = &export.folders[0];
        assert_eq!(folder.name, "SALES");
        assert_eq!(folder.sources[0].qualified_name(), "OLTP.ORDERS");
        assert_eq!(folder.sources[0].fields.len(), 2);
        assert_eq!(folder.targets[0].qualified_name(), "DWH.MART.F_ORDERS");

        let m = &folder.mappings[0];
        assert_eq!(m.transformations[0].kind, "Source Qualifier");
        assert_eq!(m.sql.len(), 1);
        assert_eq!(m.sql[0].name, "Sql Query");

        let session = &folder.sessions[0];
        assert_eq!(session.mapping.as_deref(), Some("m_orders"));
        assert_eq!(session.sql[0].text, "TRUNCATE TABLE MART.F_ORDERS");

        let wf = &folder.workflows[0];
        assert_eq!(wf.tasks.len(), 2);
        assert_eq!(wf.links[0].condition, None);
        assert!(wf.sql.is_empty());
    }

    #[test]
    fn empty_export_is_an_error() {
        assert!(matches!(
            parse_repository("<POWERMART/>", "F"),
            Err(InformaticaError::NoContent)
        ));
        assert!(matches!(
            parse_repository("<POWERMART><FOLDER>", "F"),
            Err(InformaticaError::Xml(_))
        ));
    }
}
