#![forbid(unsafe_code)]

mod support;

use rollwatch_fixtures::FixtureError;
use rollwatch_ops::PromoteMode;
use support::*;

#[tokio::test]
async fn lifecycle_commands_without_a_rollout_never_reach_the_server() {
    let fake = FakeOps::new();
    let when = || session(fake.clone()).given().when();

    for err in [
        expect_err(when().update_image("argoproj/rollouts-demo:yellow").await),
        expect_err(when().promote_rollout().await),
        expect_err(when().promote_rollout_full().await),
        expect_err(when().skip_current_step().await),
        expect_err(when().abort_rollout().await),
        expect_err(when().retry_rollout().await),
        expect_err(when().restart_rollout().await),
        expect_err(when().delete_rollout().await),
        expect_err(when().apply_manifests().await),
    ] {
        assert!(matches!(err, FixtureError::RolloutNotSet { .. }), "{err}");
    }
    assert!(fake.calls().is_empty());
}

#[tokio::test]
async fn attached_rollout_cannot_be_created() {
    let fake = FakeOps::new();
    let when = session(fake.clone()).given().attach(NAME).unwrap().when();
    let err = expect_err(when.apply_manifests().await);
    assert!(matches!(err, FixtureError::RolloutNotSet { action: "apply" }), "{err}");
    assert!(fake.calls().is_empty());
}

#[tokio::test]
async fn apply_submits_objects_before_the_rollout() -> Result<(), FixtureError> {
    let fake = FakeOps::new();
    session(fake.clone())
        .given()
        .object(object("Service", "canary-demo"))?
        .object(object("ConfigMap", "canary-demo-config"))?
        .rollout(rollout_manifest())?
        .when()
        .apply_manifests()
        .await?;

    let applied: Vec<(String, String, String)> = fake
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::Apply { namespace, kind, name } => Some((namespace, kind, name)),
            _ => None,
        })
        .collect();
    assert_eq!(
        applied,
        vec![
            (NS.to_string(), "Service".to_string(), "canary-demo".to_string()),
            (NS.to_string(), "ConfigMap".to_string(), "canary-demo-config".to_string()),
            (NS.to_string(), "Rollout".to_string(), NAME.to_string()),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn apply_stops_at_the_first_failure() -> Result<(), FixtureError> {
    let fake = FakeOps::new();
    fake.fail_apply_at(1, "admission webhook denied the request");

    let when = session(fake.clone())
        .given()
        .object(object("Service", "a"))?
        .object(object("ConfigMap", "b"))?
        .object(object("Secret", "c"))?
        .rollout(rollout_manifest())?
        .when();
    let err = expect_err(when.apply_manifests().await);

    match &err {
        FixtureError::Apply { kind, name, .. } => {
            assert_eq!(kind, "ConfigMap");
            assert_eq!(name, "b");
        }
        other => panic!("unexpected error {other}"),
    }
    assert!(err.to_string().contains("admission webhook denied the request"));
    assert_eq!(fake.calls().len(), 2);
    Ok(())
}

#[tokio::test]
async fn update_image_targets_every_container() -> Result<(), FixtureError> {
    let fake = FakeOps::new();
    session(fake.clone())
        .given()
        .attach(NAME)?
        .when()
        .update_image("argoproj/rollouts-demo:yellow")
        .await?;

    assert_eq!(
        fake.calls(),
        vec![Call::SetImage {
            target: target(),
            container: "*".to_string(),
            image: "argoproj/rollouts-demo:yellow".to_string(),
        }]
    );
    Ok(())
}

#[tokio::test]
async fn remote_failure_carries_the_server_message() -> Result<(), FixtureError> {
    let fake = FakeOps::new();
    fake.fail("abort", "rollouts.argoproj.io \"canary-demo\" not found");

    let when = session(fake.clone()).given().attach(NAME)?.when();
    let err = expect_err(when.abort_rollout().await);
    assert!(matches!(err, FixtureError::Remote { action: "abort", .. }), "{err}");
    assert_eq!(
        err.to_string(),
        "abort of rollout e2e/canary-demo failed: rollouts.argoproj.io \"canary-demo\" not found"
    );
    assert_eq!(fake.calls(), vec![Call::Abort(target())]);
    Ok(())
}

#[tokio::test]
async fn commands_run_in_chain_order() -> Result<(), FixtureError> {
    let fake = FakeOps::new();
    session(fake.clone())
        .given()
        .attach(NAME)?
        .when()
        .promote_rollout()
        .await?
        .skip_current_step()
        .await?
        .promote_rollout_full()
        .await?
        .abort_rollout()
        .await?
        .retry_rollout()
        .await?
        .restart_rollout()
        .await?
        .delete_rollout()
        .await?;

    let t = target();
    assert_eq!(
        fake.calls(),
        vec![
            Call::Promote { target: t.clone(), mode: PromoteMode::Unpause },
            Call::Promote { target: t.clone(), mode: PromoteMode::SkipCurrentStep },
            Call::Promote { target: t.clone(), mode: PromoteMode::Full },
            Call::Abort(t.clone()),
            Call::Retry(t.clone()),
            Call::Restart(t.clone()),
            Call::Delete(t),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn failure_short_circuits_the_rest_of_the_chain() -> Result<(), FixtureError> {
    let fake = FakeOps::new();
    fake.fail("promote", "the server rejected our request");

    let res = async {
        session(fake.clone())
            .given()
            .attach(NAME)?
            .when()
            .abort_rollout()
            .await?
            .promote_rollout()
            .await?
            .delete_rollout()
            .await
    }
    .await;

    let err = expect_err(res);
    assert!(matches!(err, FixtureError::Remote { action: "promote", .. }), "{err}");
    assert_eq!(fake.calls().len(), 2);
    Ok(())
}
