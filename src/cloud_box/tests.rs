//! Unit tests for the box lifecycle.

use super::*;
use crate::test_support::{
    FakeClock, FakeProvider, FakeProviderError, InvocationKind, ProviderCall, ProviderOp,
    ScriptedRunner, fake_collaborators,
};
use rstest::{fixture, rstest};
use tempfile::TempDir;

type TestBox = CloudBox<FakeProvider, ScriptedRunner, FakeClock>;

struct Harness {
    tmp: TempDir,
    provider: FakeProvider,
    runner: ScriptedRunner,
    clock: FakeClock,
}

impl Harness {
    fn root(&self) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(self.tmp.path().to_path_buf()).expect("utf8 tempdir")
    }

    fn state_dir(&self) -> Utf8PathBuf {
        self.root().join("state")
    }

    fn collaborators(&self) -> Collaborators<FakeProvider, ScriptedRunner, FakeClock> {
        fake_collaborators(
            &self.provider,
            &self.runner,
            &self.clock,
            &self.state_dir(),
            &self.root().join("bundles"),
        )
        .expect("collaborators")
    }

    fn cloud_box(&self, options: BoxOptions) -> TestBox {
        CloudBox::new(options, self.collaborators()).expect("box should build")
    }

    fn started(&self) -> TestBox {
        let mut cloud_box = self.cloud_box(options());
        cloud_box.start().expect("start should succeed");
        cloud_box
    }
}

#[fixture]
fn harness() -> Harness {
    Harness {
        tmp: TempDir::new().expect("tempdir"),
        provider: FakeProvider::default(),
        runner: ScriptedRunner::new(),
        clock: FakeClock::new(),
    }
}

fn options() -> BoxOptions {
    BoxOptions {
        name: String::from("test1"),
        security_group: Some(String::from("default")),
        ..BoxOptions::default()
    }
}

#[rstest]
#[case("eu-west-1")]
#[case("")]
#[case("US-WEST-2")]
fn rejects_disallowed_region_on_construction(harness: Harness, #[case] region: &str) {
    let result = CloudBox::new(
        BoxOptions {
            region: region.to_owned(),
            ..options()
        },
        harness.collaborators(),
    );

    assert!(matches!(result, Err(BoxError::InvalidRegion { .. })));
}

#[rstest]
#[case("us-west-1")]
#[case("us-west-2")]
#[case("us-east-1")]
fn set_region_accepts_allowed_regions(harness: Harness, #[case] region: &str) {
    let mut cloud_box = harness.cloud_box(options());
    cloud_box.set_region(region).expect("allowed region");
    assert_eq!(cloud_box.region(), region);
}

#[rstest]
fn set_region_rejection_keeps_previous_region(harness: Harness) {
    let mut cloud_box = harness.cloud_box(options());
    let err = cloud_box
        .set_region("ap-south-1")
        .expect_err("region should be rejected");

    assert!(matches!(err, BoxError::InvalidRegion { ref region, .. } if region == "ap-south-1"));
    assert_eq!(cloud_box.region(), DEFAULT_REGION);
}

#[rstest]
fn unstarted_box_is_inert(harness: Harness) {
    let mut cloud_box = harness.cloud_box(options());

    cloud_box.stop().expect("stop is a no-op");
    cloud_box.resume().expect("resume is a no-op");
    cloud_box.destroy().expect("destroy is a no-op");
    cloud_box
        .wait_for_state(&InstanceStatus::Running, || {})
        .expect("wait is a no-op");

    assert_eq!(cloud_box.dns_name().expect("dns"), NO_NAME);
    assert_eq!(cloud_box.internal_dns_name().expect("dns"), NO_NAME);
    assert!(harness.provider.calls().is_empty());
}

#[rstest]
fn unstarted_box_has_no_state_file(harness: Harness) {
    let cloud_box = harness.cloud_box(options());
    let err = cloud_box.state_file().expect_err("no handle");
    assert!(matches!(err, BoxError::MissingInstance { .. }));
    assert!(matches!(
        cloud_box.ssh_into(&[], ExecMode::RunAndWait),
        Err(BoxError::MissingInstance { .. })
    ));
}

#[rstest]
fn validate_requires_resolvable_security_group(harness: Harness) {
    let cloud_box = harness.cloud_box(options());
    let err = cloud_box.validate().expect_err("unknown group");
    assert!(matches!(err, BoxError::Validation { ref message } if message.contains("default")));

    harness.provider.add_security_group("default", "sg-1");
    cloud_box.validate().expect("group should resolve");
}

#[rstest]
fn validate_without_security_group_fails(harness: Harness) {
    let cloud_box = harness.cloud_box(BoxOptions {
        security_group: None,
        ..options()
    });
    assert!(matches!(
        cloud_box.validate(),
        Err(BoxError::Validation { .. })
    ));
    assert!(harness.provider.calls().is_empty());
}

#[rstest]
fn start_imports_key_then_creates_tagged_instance(harness: Harness) {
    let mut tags = BTreeMap::new();
    tags.insert(String::from("Name"), String::from("overridden"));
    tags.insert(String::from("team"), String::from("infra"));
    let mut cloud_box = harness.cloud_box(BoxOptions {
        tags,
        fleet_id: 7,
        ..options()
    });

    let handle = cloud_box.start().expect("start").clone();

    assert_eq!(handle.id, "i-123");
    let calls = harness.provider.calls();
    assert!(matches!(calls.first(), Some(ProviderCall::ImportKeyPair { name, .. }) if name == "blimp"));
    let Some(ProviderCall::Create(request)) = calls.get(1) else {
        panic!("expected create after key import, got {calls:?}");
    };
    assert_eq!(request.image_id, DEFAULT_IMAGE_ID);
    assert_eq!(request.security_groups, vec![String::from("default")]);
    assert_eq!(request.tags.get("Name").map(String::as_str), Some("test1"));
    assert_eq!(request.tags.get("CreatedBy").map(String::as_str), Some(CREATED_BY));
    assert_eq!(request.tags.get("FleetId").map(String::as_str), Some("7"));
    assert_eq!(request.tags.get("team").map(String::as_str), Some("infra"));
}

#[rstest]
fn start_persists_state_record(harness: Harness) {
    let cloud_box = harness.started();

    let path = cloud_box.state_file().expect("state file");
    assert_eq!(path, harness.state_dir().join("i-123.blimp"));
    let contents = std::fs::read_to_string(&path).expect("read state");
    assert_eq!(contents, "name: test1\nregion: us-west-2\n");
}

#[rstest]
fn start_twice_is_rejected(harness: Harness) {
    let mut cloud_box = harness.started();
    let err = cloud_box.start().expect_err("second start");
    assert!(matches!(err, BoxError::AlreadyStarted { ref instance_id } if instance_id == "i-123"));
}

#[rstest]
fn start_without_security_group_uses_provider_default(harness: Harness) {
    let mut cloud_box = harness.cloud_box(BoxOptions {
        security_group: None,
        ..options()
    });
    cloud_box.start().expect("start");

    let created = harness.provider.calls().into_iter().find_map(|call| match call {
        ProviderCall::Create(request) => Some(request),
        _ => None,
    });
    assert_eq!(created.map(|request| request.security_groups), Some(Vec::new()));
}

#[rstest]
fn failed_create_leaves_box_unstarted(harness: Harness) {
    harness.provider.fail_on(ProviderOp::Create);
    let mut cloud_box = harness.cloud_box(options());

    let err = cloud_box.start().expect_err("create should fail");

    assert!(matches!(
        err,
        BoxError::Provider(FakeProviderError {
            op: ProviderOp::Create
        })
    ));
    assert!(cloud_box.handle().is_none());
}

#[rstest]
fn stop_and_resume_delegate_to_provider(harness: Harness) {
    let mut cloud_box = harness.started();

    cloud_box.stop().expect("stop");
    assert_eq!(harness.provider.status_of("i-123"), Some(InstanceStatus::Stopped));
    cloud_box.stop().expect("second stop is not an error");
    cloud_box.resume().expect("resume");
    assert_eq!(harness.provider.status_of("i-123"), Some(InstanceStatus::Running));
    assert!(cloud_box.state_file().expect("path").exists());
}

#[rstest]
fn destroy_terminates_and_removes_record(harness: Harness) {
    let mut cloud_box = harness.started();
    let path = cloud_box.state_file().expect("path");

    cloud_box.destroy().expect("destroy");

    assert!(!path.exists());
    assert_eq!(harness.provider.destroy_calls(), vec![String::from("i-123")]);
    assert!(cloud_box.handle().is_none());
    cloud_box.destroy().expect("destroy again is a no-op");
    assert_eq!(harness.provider.destroy_calls().len(), 1);
}

#[rstest]
fn failed_destroy_keeps_handle_and_record(harness: Harness) {
    let mut cloud_box = harness.started();
    harness.provider.fail_on(ProviderOp::Destroy);

    assert!(matches!(cloud_box.destroy(), Err(BoxError::Provider(_))));
    assert!(cloud_box.handle().is_some());
    assert!(cloud_box.state_file().expect("path").exists());
}

#[rstest]
fn missing_record_after_destroy_is_reported(harness: Harness) {
    let mut cloud_box = harness.started();
    std::fs::remove_file(cloud_box.state_file().expect("path")).expect("remove record");

    let err = cloud_box.destroy().expect_err("cleanup should fail");

    assert!(matches!(err, BoxError::StateCleanup { ref instance_id, .. } if instance_id == "i-123"));
    assert!(cloud_box.handle().is_none());
}

#[rstest]
fn dns_names_come_from_provider(harness: Harness) {
    let cloud_box = harness.started();
    assert_eq!(cloud_box.dns_name().expect("dns"), "i-123.compute.example.com");
    assert_eq!(
        cloud_box.internal_dns_name().expect("dns"),
        "i-123.internal"
    );

    harness.provider.set_dns_names("renamed.example.com", "renamed.internal");
    assert_eq!(cloud_box.dns_name().expect("dns"), "renamed.example.com");
}

#[rstest]
fn mark_online_appends_dns_lines(harness: Harness) {
    let cloud_box = harness.started();

    cloud_box.mark_online().expect("mark online");

    let contents =
        std::fs::read_to_string(cloud_box.state_file().expect("path")).expect("read state");
    assert_eq!(
        contents,
        "name: test1\nregion: us-west-2\ndns: i-123.compute.example.com\n\
         internal_dns: i-123.internal\n"
    );
}

#[rstest]
fn wait_for_shell_retries_until_probe_succeeds(harness: Harness) {
    let mut cloud_box = harness.started();
    harness.runner.push_exit_code(255);
    harness.runner.push_exit_code(255);
    harness.runner.push_success();
    let mut progress = Vec::new();

    cloud_box.wait_for_shell(&mut progress).expect("shell should come up");

    assert!(cloud_box.is_shell_reachable());
    assert_eq!(harness.runner.invocations().len(), 3);
    assert_eq!(harness.clock.sleeps().len(), 2);

    cloud_box
        .wait_for_shell(&mut progress)
        .expect("second wait is a no-op");
    assert_eq!(harness.runner.invocations().len(), 3);
}

#[rstest]
fn empty_dns_counts_as_failed_attempt(harness: Harness) {
    harness.provider.set_dns_names("", "");
    let mut collaborators = harness.collaborators();
    collaborators.poller =
        ReadinessPoller::new(harness.clock.clone()).with_hard_timeout(Duration::from_secs(2));
    let mut cloud_box = CloudBox::new(options(), collaborators).expect("box");
    cloud_box.start().expect("start");

    let err = cloud_box
        .wait_for_shell(&mut Vec::new())
        .expect_err("should time out");

    assert!(matches!(err, BoxError::ShellTimeout { attempts: 3, .. }));
    assert!(harness.runner.invocations().is_empty());
    assert!(!cloud_box.is_shell_reachable());
}

#[rstest]
fn bootstrap_without_livery_does_nothing(harness: Harness) {
    let mut cloud_box = harness.started();
    let delivered = cloud_box.bootstrap(&mut Vec::new()).expect("bootstrap");
    assert!(!delivered);
    assert!(harness.runner.invocations().is_empty());
}

#[rstest]
fn bootstrap_probes_then_delivers(harness: Harness) {
    let livery = harness.root().join("livery");
    std::fs::create_dir(&livery).expect("livery dir");
    let mut cloud_box = harness.started();
    cloud_box.set_livery(Some(LiverySource::Directory(livery)));
    for _ in 0..4 {
        harness.runner.push_success();
    }

    let delivered = cloud_box.bootstrap(&mut Vec::new()).expect("bootstrap");

    assert!(delivered);
    let programs: Vec<String> = harness
        .runner
        .invocations()
        .into_iter()
        .map(|call| call.program)
        .collect();
    assert_eq!(programs, vec!["ssh", "tar", "scp", "ssh"]);
}

#[rstest]
fn wait_for_state_polls_until_target(harness: Harness) {
    let cloud_box = harness.started();
    harness.provider.push_statuses([
        InstanceStatus::Pending,
        InstanceStatus::Pending,
        InstanceStatus::Running,
    ]);
    let mut probes = 0;

    cloud_box
        .wait_for_state(&InstanceStatus::Running, || probes += 1)
        .expect("instance should reach running");

    assert_eq!(probes, 3);
    assert_eq!(harness.clock.sleeps(), vec![POLL_INTERVAL; 2]);
}

#[rstest]
fn wait_for_state_gives_up_after_timeout(harness: Harness) {
    let cloud_box = harness.started();

    let err = cloud_box
        .wait_for_state(&InstanceStatus::Running, || {})
        .expect_err("pending forever should time out");

    let BoxError::StateTimeout {
        last_seen,
        timeout_secs,
        ..
    } = err
    else {
        panic!("expected state timeout, got {err:?}");
    };
    assert_eq!(last_seen, InstanceStatus::Pending);
    assert_eq!(timeout_secs, STATE_WAIT_TIMEOUT.as_secs());
    assert_eq!(harness.clock.elapsed(), STATE_WAIT_TIMEOUT);
}

#[rstest]
fn reattaches_from_state_record(harness: Harness) {
    let store = StateStore::new(harness.state_dir());
    store.ensure_dir().expect("state dir");
    store
        .write("i-777", &StateRecord::new("web", "us-east-1"))
        .expect("write record");
    harness
        .provider
        .insert_instance("i-777", InstanceStatus::Running);

    let cloud_box: TestBox =
        CloudBox::from_instance_id("i-777", BoxOptions::default(), harness.collaborators())
            .expect("lookup")
            .expect("instance should be known");

    assert_eq!(cloud_box.name(), "web");
    assert_eq!(cloud_box.region(), "us-east-1");
    assert_eq!(cloud_box.instance_id(), Some("i-777"));
}

#[rstest]
fn reattaching_unknown_instance_returns_none(harness: Harness) {
    let store = StateStore::new(harness.state_dir());
    store.ensure_dir().expect("state dir");
    store
        .write("i-gone", &StateRecord::new("old", "us-west-2"))
        .expect("write record");

    let found: Option<TestBox> =
        CloudBox::from_instance_id("i-gone", BoxOptions::default(), harness.collaborators())
            .expect("lookup");

    assert!(found.is_none());
}

#[rstest]
fn interactive_ssh_replaces_process(harness: Harness) {
    let cloud_box = harness.started();

    let err = cloud_box
        .ssh_into(&[], ExecMode::ReplaceProcess)
        .expect_err("exec is unavailable in tests");

    assert!(matches!(err, BoxError::Exec(_)));
    let invocations = harness.runner.invocations();
    let call = invocations.first().expect("exec recorded");
    assert_eq!(call.kind, InvocationKind::Exec);
    assert!(call.command_string().ends_with("-l ubuntu i-123.compute.example.com"));
}
