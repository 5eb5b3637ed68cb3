//! Validation and derivation of layered configuration.

use std::time::Duration;

use blimp::config::{DEFAULT_KEY_NAME, DEFAULT_PUBLIC_KEY_PATH};
use blimp::livery::DEFAULT_TAR_BIN;
use blimp::{BlimpConfig, ConfigError, ExecError, LiverySource, ShellConfig};
use rstest::{fixture, rstest};

#[fixture]
fn valid_config() -> BlimpConfig {
    BlimpConfig {
        region: String::from("us-west-2"),
        image_id: String::from("ami-ec0b86dc"),
        security_group: Some(String::from(" default ")),
        username: String::from("ubuntu"),
        fleet_id: 7,
        state_dir: String::from("/var/lib/blimp"),
        key_name: String::from(DEFAULT_KEY_NAME),
        public_key_path: String::from("/keys/id.pub"),
        aws_bin: String::from("aws"),
        tar_bin: String::from(DEFAULT_TAR_BIN),
        bundle_dir: None,
        bootstrap_livery: false,
        readiness_timeout_secs: None,
    }
}

#[rstest]
fn valid_config_passes(valid_config: BlimpConfig) {
    assert_eq!(valid_config.validate(), Ok(()));
}

#[rstest]
#[case::region(|cfg: &mut BlimpConfig| cfg.region.clear(), "BLIMP_REGION", "region")]
#[case::image(|cfg: &mut BlimpConfig| cfg.image_id.clear(), "BLIMP_IMAGE_ID", "image_id")]
#[case::user(|cfg: &mut BlimpConfig| cfg.username = String::from("  "), "BLIMP_USERNAME", "username")]
#[case::state(|cfg: &mut BlimpConfig| cfg.state_dir.clear(), "BLIMP_STATE_DIR", "state_dir")]
#[case::key(|cfg: &mut BlimpConfig| cfg.key_name.clear(), "BLIMP_KEY_NAME", "key_name")]
#[case::aws(|cfg: &mut BlimpConfig| cfg.aws_bin.clear(), "BLIMP_AWS_BIN", "aws_bin")]
#[case::tar(|cfg: &mut BlimpConfig| cfg.tar_bin.clear(), "BLIMP_TAR_BIN", "tar_bin")]
fn missing_fields_produce_actionable_errors(
    mut valid_config: BlimpConfig,
    #[case] mutate: fn(&mut BlimpConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    mutate(&mut valid_config);

    let err = valid_config.validate().expect_err("validation should fail");
    let ConfigError::MissingField(ref message) = err else {
        panic!("expected MissingField, got {err}");
    };
    assert!(message.contains(env_var), "should mention {env_var}: {message}");
    assert!(message.contains(toml_key), "should mention {toml_key}: {message}");
    assert!(message.contains("blimp.toml"), "should mention file: {message}");
}

#[rstest]
fn unsupported_region_lists_the_allowed_ones(mut valid_config: BlimpConfig) {
    valid_config.region = String::from("eu-west-1");

    let err = valid_config.validate().expect_err("region should be rejected");
    let message = err.to_string();
    assert!(matches!(err, ConfigError::InvalidValue(_)));
    assert!(message.contains("us-east-1"), "message: {message}");
}

#[rstest]
fn zero_timeout_is_rejected(mut valid_config: BlimpConfig) {
    valid_config.readiness_timeout_secs = Some(0);
    assert!(matches!(
        valid_config.validate(),
        Err(ConfigError::InvalidValue(_))
    ));
}

#[rstest]
fn box_options_carry_trimmed_settings(mut valid_config: BlimpConfig) {
    valid_config.bootstrap_livery = true;

    let options = valid_config.box_options(Some("web"));

    assert_eq!(options.name, "web");
    assert_eq!(options.security_group.as_deref(), Some("default"));
    assert_eq!(options.fleet_id, 7);
    assert_eq!(options.livery, Some(LiverySource::CurrentDirectory));
    assert!(options.tags.is_empty());
}

#[rstest]
fn box_options_default_the_name(valid_config: BlimpConfig) {
    assert_eq!(valid_config.box_options(None).name, "Unnamed Box");
    assert_eq!(valid_config.box_options(None).livery, None);
}

#[rstest]
fn derived_collaborator_settings(mut valid_config: BlimpConfig) {
    valid_config.bundle_dir = Some(String::from("/tmp/bundles"));
    valid_config.readiness_timeout_secs = Some(90);

    assert_eq!(valid_config.key_pair().public_key_path.as_str(), "/keys/id.pub");
    assert_eq!(valid_config.state_store().root().as_str(), "/var/lib/blimp");
    assert_eq!(
        valid_config.bundle_dir().expect("bundle dir").as_str(),
        "/tmp/bundles"
    );
    assert_eq!(
        valid_config.readiness_timeout(),
        Some(Duration::from_secs(90))
    );
}

#[rstest]
fn bundle_dir_falls_back_to_temp(valid_config: BlimpConfig) {
    let dir = valid_config.bundle_dir().expect("bundle dir");
    assert!(dir.ends_with("blimp"), "dir: {dir}");
}

#[test]
fn default_public_key_path_uses_home() {
    assert!(DEFAULT_PUBLIC_KEY_PATH.starts_with("~/"));
}

#[rstest]
#[case::ssh(|cfg: &mut ShellConfig| cfg.ssh_bin.clear(), "BLIMP_SSH_SSH_BIN")]
#[case::scp(|cfg: &mut ShellConfig| cfg.scp_bin = String::from(" "), "BLIMP_SSH_SCP_BIN")]
#[case::identity(|cfg: &mut ShellConfig| cfg.ssh_identity_file = Some(String::new()), "BLIMP_SSH_SSH_IDENTITY_FILE")]
fn shell_config_errors_name_the_env_var(
    #[case] mutate: fn(&mut ShellConfig),
    #[case] env_var: &str,
) {
    let mut cfg = blimp::test_support::shell_config();
    mutate(&mut cfg);

    let err = cfg.validate().expect_err("validation should fail");
    assert!(matches!(err, ExecError::InvalidConfig { .. }));
    assert!(err.to_string().contains(env_var), "error: {err}");
}
