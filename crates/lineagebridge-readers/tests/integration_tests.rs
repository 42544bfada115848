//! Integration tests for artifact dispatch

use lineagebridge_core::SourceSystem;
use lineagebridge_readers::{
    extensions, read_artifact, Artifact, OracleArtifact, ParsedArtifact, ReadError,
};
use pretty_assertions::assert_eq;

#[test]
fn dispatches_by_system_and_extension() {
    let jil = Artifact::new(
        "jobs/nightly.jil",
        "insert_job: LOAD_ORDERS job_type: c\ncommand: pmcmd startworkflow -f DW wf_load_orders\n",
    );
    match read_artifact(SourceSystem::Autosys, &jil, "default").unwrap() {
        ParsedArtifact::Jil(doc) => {
            let jobs = doc.jobs();
            assert_eq!(jobs.len(), 1);
            assert_eq!(jobs[0].job_type(), Some("c"));
        }
        other => panic!("unexpected {:?}", other),
    }

    let dml = Artifact::new("graphs/orders.dml", "order_id: string(10)\n");
    match read_artifact(SourceSystem::AbInitio, &dml, "default").unwrap() {
        ParsedArtifact::RecordFormat(record) => assert_eq!(record.name, "orders"),
        other => panic!("unexpected {:?}", other),
    }

    let script = Artifact::new("adhoc/cleanup.sql", "DELETE FROM stg.orders;");
    match read_artifact(SourceSystem::Oracle, &script, "default").unwrap() {
        ParsedArtifact::Oracle(OracleArtifact::Procedures(units)) => {
            assert_eq!(units[0].name, "cleanup")
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn blank_and_unsupported_artifacts() {
    let blank = Artifact::new("empty.jil", "  \n");
    assert!(matches!(
        read_artifact(SourceSystem::Autosys, &blank, "default"),
        Err(ReadError::Blank)
    ));

    let unknown = Artifact::new("deploy.ksh", "something");
    let err = read_artifact(SourceSystem::AbInitio, &unknown, "default").unwrap_err();
    assert_eq!(err.to_string(), "abinitio does not read .ksh files");
}

#[test]
fn malformed_artifacts_surface_reader_errors() {
    let xml = Artifact::new("export.xml", "<POWERMART><REPOSITORY>");
    assert!(matches!(
        read_artifact(SourceSystem::Informatica, &xml, "default"),
        Err(ReadError::Informatica(_))
    ));

    let cube = Artifact::new("cube.json", "{\"foo\": 1}");
    assert!(matches!(
        read_artifact(SourceSystem::Essbase, &cube, "default"),
        Err(ReadError::Essbase(_))
    ));
}

#[test]
fn every_system_declares_extensions() {
    for system in SourceSystem::ALL {
        assert!(!extensions(system).is_empty(), "{} has no extensions", system);
    }
    assert!(extensions(SourceSystem::Ssis).contains(&"dtsx"));

    let graph = Artifact::new("graphs/load_orders.mp", "opaque graph body");
    match read_artifact(SourceSystem::AbInitio, &graph, "default").unwrap() {
        ParsedArtifact::Graph(name) => assert_eq!(name, "load_orders"),
        other => panic!("unexpected {:?}", other),
    }
}
