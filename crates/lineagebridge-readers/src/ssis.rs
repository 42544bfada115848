//! Package files (DTSX)
//!
//! Handles both layouts: attributes on `DTS:Executable` (2012+) and
//! `DTS:Property` child elements (2008).

use crate::xml::{parse_document, XmlElement, XmlError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentRole {
    Source,
    Destination,
    Transform,
}

/// A pipeline component inside a data flow task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFlowComponent {
    pub name: String,
    pub role: ComponentRole,
    /// `OpenRowset` / `TableOrViewName`, as written
    pub table: Option<String>,
    pub sql_command: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executable {
    pub ref_id: String,
    pub name: String,
    pub executable_type: String,
    pub sql_statements: Vec<String>,
    pub components: Vec<DataFlowComponent>,
    /// Reference id of the enclosing container executable
    pub parent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecedenceConstraint {
    pub from: String,
    pub to: String,
    /// 0 success, 1 failure, 2 completion
    pub value: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub name: Option<String>,
    pub executables: Vec<Executable>,
    pub constraints: Vec<PrecedenceConstraint>,
}

impl Package {
    pub fn executable(&self, ref_id: &str) -> Option<&Executable> {
        self.executables.iter().find(|e| e.ref_id == ref_id)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SsisError {
    #[error(transparent)]
    Xml(#[from] XmlError),

    #[error("root element <{0}> is not a package executable")]
    NotAPackage(String),
}

/// Attribute or 2008-style `<DTS:Property DTS:Name="...">` child
fn property(el: &XmlElement, name: &str) -> Option<String> {
    if let Some(v) = el.attr_nonempty(name) {
        return Some(v.to_string());
    }
    el.children_named("Property")
        .find(|p| p.attr("Name").is_some_and(|n| n.eq_ignore_ascii_case(name)))
        .map(|p| p.text_trimmed().to_string())
        .filter(|v| !v.is_empty())
}

/// Elements below `exe` that do not belong to a nested executable
fn own_descendants(exe: &XmlElement) -> Vec<&XmlElement> {
    let mut out = Vec::new();
    let mut stack: Vec<&XmlElement> = exe.children.iter().rev().collect();
    while let Some(el) = stack.pop() {
        if el.is("Executable") {
            continue;
        }
        out.push(el);
        stack.extend(el.children.iter().rev());
    }
    out
}

fn sql_statements(exe: &XmlElement) -> Vec<String> {
    let mut out = Vec::new();
    for el in own_descendants(exe) {
        if let Some(sql) = el.attr_nonempty("SqlStatementSource") {
            out.push(sql.to_string());
        }
        if el.is("SqlStatementSource") && !el.text_trimmed().is_empty() {
            out.push(el.text_trimmed().to_string());
        }
    }
    out
}

fn component_property<'a>(component: &'a XmlElement, name: &str) -> Option<&'a str> {
    component
        .children_named("properties")
        .flat_map(|props| props.children_named("property"))
        .find(|p| p.attr("name").is_some_and(|n| n.eq_ignore_ascii_case(name)))
        .map(|p| p.text_trimmed())
        .filter(|v| !v.is_empty())
}

fn component_role(component: &XmlElement) -> ComponentRole {
    let hint = [
        component.attr("componentClassID"),
        component.attr("description"),
        component.attr("contactInfo"),
        component.attr("name"),
    ]
    .into_iter()
    .flatten()
    .map(str::to_ascii_lowercase)
    .collect::<Vec<_>>();

    if hint.iter().any(|h| h.contains("destination")) {
        ComponentRole::Destination
    } else if hint.iter().any(|h| h.contains("source")) {
        ComponentRole::Source
    } else {
        ComponentRole::Transform
    }
}

fn components(exe: &XmlElement) -> Vec<DataFlowComponent> {
    own_descendants(exe)
        .into_iter()
        .filter(|el| el.is("component"))
        .map(|c| DataFlowComponent {
            name: c.attr_nonempty("name").unwrap_or("component").to_string(),
            role: component_role(c),
            table: component_property(c, "OpenRowset")
                .or_else(|| component_property(c, "TableOrViewName"))
                .map(str::to_string),
            sql_command: component_property(c, "SqlCommand").map(str::to_string),
        })
        .collect()
}

fn collect_executables(el: &XmlElement, parent: Option<&str>, out: &mut Vec<Executable>) {
    for child in &el.children {
        if child.is("Executable") {
            let name = property(child, "ObjectName")
                .or_else(|| property(child, "Name"))
                .unwrap_or_else(|| format!("task_{}", out.len() + 1));
            let ref_id = property(child, "refId")
                .or_else(|| property(child, "DTSID"))
                .unwrap_or_else(|| name.clone());
            let executable_type =
                property(child, "ExecutableType").unwrap_or_else(|| "SSIS_EXECUTABLE".to_string());

            out.push(Executable {
                sql_statements: sql_statements(child),
                components: components(child),
                parent: parent.map(str::to_string),
                ref_id: ref_id.clone(),
                name,
                executable_type,
            });
            collect_executables(child, Some(&ref_id), out);
        } else {
            collect_executables(child, parent, out);
        }
    }
}

fn package_name(root: &XmlElement) -> Option<String> {
    root.find_all("Property")
        .into_iter()
        .find(|p| p.attr("Name").is_some_and(|n| n == "PackageName"))
        .map(|p| p.text_trimmed().to_string())
        .filter(|n| !n.is_empty())
        .or_else(|| property(root, "ObjectName"))
}

/// Parse one package file
pub fn parse_package(xml: &str) -> Result<Package, SsisError> {
    let root = parse_document(xml)?;
    if !root.is("Executable") {
        return Err(SsisError::NotAPackage(root.name));
    }

    let mut executables = Vec::new();
    collect_executables(&root, None, &mut executables);

    let constraints = root
        .find_all("PrecedenceConstraint")
        .into_iter()
        .filter_map(|c| {
            Some(PrecedenceConstraint {
                from: property(c, "From")?,
                to: property(c, "To")?,
                value: property(c, "Value")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0),
            })
        })
        .collect();

    Ok(Package {
        name: package_name(&root),
        executables,
        constraints,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PACKAGE: &str = r#"<?xml version="1.0"?>
<DTS:Executable xmlns:DTS="www.microsoft.com/SqlServer/Dts"
    xmlns:SQLTask="www.microsoft.com/sqlserver/dts/tasks/sqltask"
    DTS:refId="Package" DTS:ObjectName="DailyLoad" DTS:ExecutableType="Microsoft.Package">
  <DTS:Executables>
    <DTS:Executable DTS:refId="Package\Truncate" DTS:ObjectName="Truncate" DTS:ExecutableType="Microsoft.ExecuteSQLTask">
      <DTS:ObjectData>
        <SQLTask:SqlTaskData SQLTask:SqlStatementSource="TRUNCATE TABLE stg.orders"/>
      </DTS:ObjectData>
    </DTS:Executable>
    <DTS:Executable DTS:refId="Package\Load" DTS:ObjectName="Load" DTS:ExecutableType="Microsoft.Pipeline">
      <DTS:ObjectData>
        <pipeline>
          <components>
            <component refId="c1" name="OLE DB Source" componentClassID="Microsoft.OLEDBSource">
              <properties>
                <property name="OpenRowset">[dbo].[orders]</property>
                <property name="SqlCommand"></property>
              </properties>
            </component>
            <component refId="c2" name="Derived Column" componentClassID="Microsoft.DerivedColumn"/>
            <component refId="c3" name="OLE DB Destination" componentClassID="Microsoft.OLEDBDestination">
              <properties>
                <property name="OpenRowset">[stg].[orders]</property>
              </properties>
            </component>
          </components>
        </pipeline>
      </DTS:ObjectData>
    </DTS:Executable>
    <DTS:Executable DTS:refId="Package\Seq" DTS:ObjectName="Seq" DTS:ExecutableType="STOCK:SEQUENCE">
      <DTS:Executables>
        <DTS:Executable DTS:refId="Package\Seq\Inner" DTS:ObjectName="Inner" DTS:ExecutableType="Microsoft.ExecuteSQLTask">
          <DTS:ObjectData><SQLTask:SqlTaskData SQLTask:SqlStatementSource="EXEC dbo.refresh"/></DTS:ObjectData>
        </DTS:Executable>
      </DTS:Executables>
    </DTS:Executable>
  </DTS:Executables>
  <DTS:PrecedenceConstraints>
    <DTS:PrecedenceConstraint DTS:From="Package\Truncate" DTS:To="Package\Load"/>
    <DTS:PrecedenceConstraint DTS:From="Package\Load" DTS:To="Package\Seq" DTS:Value="1"/>
  </DTS:PrecedenceConstraints>
</DTS:Executable>"#;

    #[test]
    fn parses_executables_and_constraints() {
        let pkg = parse_package(PACKAGE).unwrap();
        assert_eq!(pkg.name.as_deref(), Some("DailyLoad"));

        let names: Vec<&str> = pkg.executables.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Truncate", "Load", "Seq", "Inner"]);

        let truncate = pkg.executable("Package\\Truncate").unwrap();
        assert_eq!(truncate.sql_statements, vec!["TRUNCATE TABLE stg.orders".to_string()]);
        assert_eq!(truncate.parent, None);

        let seq = pkg.executable("Package\\Seq").unwrap();
        assert!(seq.sql_statements.is_empty());
        let inner = pkg.executable("Package\\Seq\\Inner").unwrap();
        assert_eq!(inner.parent.as_deref(), Some("Package\\Seq"));

        assert_eq!(pkg.constraints.len(), 2);
        assert_eq!(pkg.constraints[0].value, 0);
        assert_eq!(pkg.constraints[1].value, 1);
    }

    #[test]
    fn classifies_pipeline_components() {
        let pkg = parse_package(PACKAGE).unwrap();
        let load = pkg.executable("Package\\Load").unwrap();
        assert_eq!(load.components.len(), 3);
        assert_eq!(load.components[0].role, ComponentRole::Source);
        assert_eq!(load.components[0].table.as_deref(), Some("[dbo].[orders]"));
        assert_eq!(load.components[0].sql_command, None);
        assert_eq!(load.components[1].role, ComponentRole::Transform);
        assert_eq!(load.components[2].role, ComponentRole::Destination);
    }

    #[test]
    fn legacy_property_layout() {
        let pkg = parse_package(
            r#"<DTS:Executable xmlns:DTS="www.microsoft.com/SqlServer/Dts">
                 <DTS:Property DTS:Name="PackageName">Legacy</DTS:Property>
                 <DTS:Executable>
                   <DTS:Property DTS:Name="ObjectName">Step1</DTS:Property>
                   <DTS:Property DTS:Name="ExecutableType">Microsoft.SqlServer.Dts.Tasks.ExecuteSQLTask.ExecuteSQLTask, Microsoft.SqlServer.SQLTask</DTS:Property>
                   <SqlStatementSource>DELETE FROM dbo.t</SqlStatementSource>
                 </DTS:Executable>
               </DTS:Executable>"#,
        )
        .unwrap();
        assert_eq!(pkg.name.as_deref(), Some("Legacy"));
        assert_eq!(pkg.executables[0].name, "Step1");
        assert_eq!(pkg.executables[0].ref_id, "Step1");
        assert_eq!(pkg.executables[0].sql_statements, vec!["DELETE FROM dbo.t".to_string()]);
    }

    #[test]
    fn rejects_non_packages() {
        assert!(matches!(parse_package("<root/>"), Err(SsisError::NotAPackage(_))));
    }
}
