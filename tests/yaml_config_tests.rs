//! Integration tests for YAML test plans.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;

use angple_loadtest::angple;
use angple_loadtest::wait_time::WaitTime;
use angple_loadtest::yaml_config::{YamlConfig, YamlConfigError};

fn demo_plan() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("demos/angple.yaml")
}

#[test]
fn test_demo_plan_matches_builtin_profile() {
    let config = YamlConfig::from_file(demo_plan()).unwrap();
    let from_yaml = config.to_user_classes().unwrap();
    let builtin = angple::profile().unwrap();

    assert_eq!(from_yaml.len(), builtin.len());
    for (yaml_class, builtin_class) in from_yaml.iter().zip(&builtin) {
        assert_eq!(yaml_class.name, builtin_class.name);
        assert_eq!(yaml_class.weight, builtin_class.weight);
        assert_eq!(yaml_class.wait_time, builtin_class.wait_time);
        assert_eq!(yaml_class.variables, builtin_class.variables);
        assert_eq!(yaml_class.on_start.is_some(), builtin_class.on_start.is_some());
        if let (Some(yaml_check), Some(builtin_check)) = (&yaml_class.on_start, &builtin_class.on_start) {
            assert_eq!(yaml_check.request.path, builtin_check.request.path);
            assert_eq!(yaml_check.request.method, builtin_check.request.method);
            assert_eq!(yaml_check.expected_status, builtin_check.expected_status);
        }
        assert_eq!(yaml_class.tasks.len(), builtin_class.tasks.len());

        for (yaml_task, builtin_task) in yaml_class.tasks.iter().zip(&builtin_class.tasks) {
            assert_eq!(yaml_task.name, builtin_task.name);
            assert_eq!(yaml_task.weight, builtin_task.weight);
            assert_eq!(
                yaml_task.request.display_name(),
                builtin_task.request.display_name()
            );
            assert_eq!(yaml_task.request.query, builtin_task.request.query);
        }
    }
}

#[test]
fn test_demo_plan_settings() {
    let config = YamlConfig::from_file(demo_plan()).unwrap();
    assert_eq!(config.config.base_url, "http://localhost:8081");
    assert_eq!(config.config.users, 50);
    assert_eq!(config.config.spawn_rate, 10.0);
    assert_eq!(
        config.config.duration.unwrap().to_std_duration().unwrap(),
        Duration::from_secs(30)
    );
    assert_eq!(config.thresholds.max_fail_ratio, Some(0.01));
    assert_eq!(config.output.csv_prefix.as_deref(), Some("angple"));
    assert_eq!(config.metadata.tags, vec!["angple", "smoke"]);
}

#[test]
fn test_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
version: "1.0"
config:
  baseUrl: "https://staging.angple.example"
  users: 5
userClasses:
  - name: Reader
    fixedCount: 2
    weight: 0
    waitTime: "500ms"
    tasks:
      - name: menus
        request:
          path: "/api/v2/menus"
          name: "menus"
"#
    )
    .unwrap();

    let config = YamlConfig::from_file(file.path()).unwrap();
    let classes = config.to_user_classes().unwrap();
    assert_eq!(classes.len(), 1);
    assert_eq!(classes[0].fixed_count, Some(2));
    assert_eq!(
        classes[0].wait_time,
        WaitTime::constant(Duration::from_millis(500))
    );
    assert_eq!(classes[0].tasks[0].weight, 1);
    assert_eq!(classes[0].tasks[0].request.display_name(), "menus");
}

#[test]
fn test_missing_file() {
    let err = YamlConfig::from_file("/nonexistent/angple.yaml").unwrap_err();
    assert!(matches!(err, YamlConfigError::FileRead(_)));
}

#[test]
fn test_malformed_yaml() {
    let err = YamlConfig::from_str("version: \"1.0\"\nconfig: [").unwrap_err();
    assert!(matches!(err, YamlConfigError::YamlParse(_)));
}

#[test]
fn test_missing_base_url() {
    let err = YamlConfig::from_str("version: \"1.0\"\nconfig:\n  users: 2\n").unwrap_err();
    assert!(matches!(err, YamlConfigError::YamlParse(_)));
}

#[test]
fn test_invalid_wait_time_range() {
    let yaml = r#"
version: "1.0"
config:
  baseUrl: "http://localhost:8081"
userClasses:
  - name: Reader
    waitTime: { min: "5s", max: "1s" }
    tasks:
      - name: menus
        request: { path: "/api/v2/menus" }
"#;
    let err = YamlConfig::from_str(yaml).unwrap_err().to_string();
    assert!(err.contains("must not exceed max"), "{}", err);
}

#[test]
fn test_duplicate_class_names() {
    let yaml = r#"
version: "1.0"
config:
  baseUrl: "http://localhost:8081"
userClasses:
  - name: Reader
    tasks:
      - name: menus
        request: { path: "/api/v2/menus" }
  - name: Reader
    tasks:
      - name: health
        request: { path: "/health" }
"#;
    let err = YamlConfig::from_str(yaml).unwrap_err().to_string();
    assert!(err.contains("Duplicate user class 'Reader'"), "{}", err);
}

#[test]
fn test_class_without_tasks() {
    let yaml = r#"
version: "1.0"
config:
  baseUrl: "http://localhost:8081"
userClasses:
  - name: Idle
    tasks: []
"#;
    let err = YamlConfig::from_str(yaml).unwrap_err().to_string();
    assert!(err.contains("has no tasks"), "{}", err);
}
