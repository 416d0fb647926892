use std::io::Write;

use steward_core::{MergeMode, PolicyConfig, RiskLevel, StewardError, DEFAULT_POLICY_PATH};

fn write_policy(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn loads_policy_from_disk() {
    let file = write_policy(
        "merge_mode: recommend_only\nauto_merge_levels: [L0]\nblock_labels: [hold]\n",
    );
    let policy = PolicyConfig::load(file.path()).unwrap();
    assert_eq!(policy.merge_mode, MergeMode::RecommendOnly);
    assert_eq!(
        policy.auto_merge_levels.iter().copied().collect::<Vec<_>>(),
        vec![RiskLevel::L0]
    );
    assert_eq!(policy.block_labels, vec!["hold"]);
}

#[test]
fn missing_file_is_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = PolicyConfig::load(&dir.path().join("nope.yml")).unwrap_err();
    assert!(matches!(err, StewardError::Configuration(_)));
}

#[test]
fn malformed_yaml_is_configuration_error() {
    let file = write_policy("merge_mode: [unterminated\n");
    let err = PolicyConfig::load(file.path()).unwrap_err();
    assert!(matches!(err, StewardError::Configuration(_)));
    assert!(err.to_string().contains(&file.path().display().to_string()));
}

#[test]
fn default_path_is_under_repo_root() {
    let dir = tempfile::tempdir().unwrap();
    let path = PolicyConfig::default_path(dir.path());
    assert!(path.ends_with(DEFAULT_POLICY_PATH));
    std::fs::write(&path, "").unwrap();
    assert_eq!(PolicyConfig::load(&path).unwrap(), PolicyConfig::default());
}
