use std::{fs, time::Instant};

use autoexport::{model::PropertyValue, ExportStatus};

use crate::autoexport_test::scenario::{path, Scenario};

#[test]
fn enabling_the_task_exports_pending_changes() {
    let scenario = Scenario::new();
    scenario
        .tree
        .set_property(&path("/config/local"), "title", PropertyValue::single("enabled"))
        .unwrap();

    let running = scenario.start_task(false);
    running.task.enable();
    running.task.stop();

    let written = fs::read_to_string(running.root.join("site/config/config.json")).unwrap();
    assert!(written.contains("enabled"));
}

#[test]
fn shutdown_leaves_the_files_alone() {
    let scenario = Scenario::new();
    let before = scenario.files();

    let running = scenario.start_task(false);
    running
        .tree
        .set_property(&path("/config/local"), "title", PropertyValue::single("dropped"))
        .unwrap();
    running.task.shutdown();

    let written = fs::read_to_string(running.root.join("site/config/config.json")).unwrap();
    assert_eq!(Some(&written), before.get("site/config/config.json"));
}

#[test]
fn failures_hold_until_restarted() {
    let mut scenario = Scenario::new();

    // A file where the content module's directory should go.
    let blocker = scenario.root.join("content-module");
    fs::write(&blocker, "in the way").unwrap();

    scenario
        .tree
        .add_node(&path("/content/x"), "nt:unstructured")
        .unwrap();

    assert_eq!(scenario.service.run_now(), ExportStatus::Failed);
    assert_eq!(scenario.service.tick(Instant::now()), ExportStatus::Failed);
    assert_eq!(scenario.service.status(), ExportStatus::Failed);

    fs::remove_file(&blocker).unwrap();
    assert_eq!(scenario.service.run_now(), ExportStatus::Failed);

    scenario.service.restart();
    assert_eq!(scenario.service.status(), ExportStatus::Idle);
    scenario.export();

    assert!(scenario
        .content_source("content-module", "content/x.json")
        .is_some());
    assert_eq!(
        scenario.service.committed_revision(),
        scenario.tree.journal().last_revision()
    );
}
