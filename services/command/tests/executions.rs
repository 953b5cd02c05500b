mod common;

use std::sync::Arc;

use common::{
    execution_set, harness, harness_with, include_graph, target_added, target_removed,
    InterleavingLog, ORG,
};
use iam_command::commands::{
    AcceptAllCatalog, ApiCondition, EventCondition, ExecutionCondition, ExecutionWriteModel,
    StaticCatalog,
};
use iam_command::eventstore::MemoryEventLog;
use iam_command::permission::{Role, RolePermissionChecker};
use iam_command::write_model::load;
use iam_command::{CommandContext, ErrorKind};
use iam_events::{event_types, ActorType, ExecutionSetPayload, ExecutionTarget};
use rstest::rstest;

fn request(method: &str) -> ExecutionCondition {
    ExecutionCondition::Request(ApiCondition::Method(method.to_string()))
}

fn includes(ids: &[&str]) -> Vec<ExecutionTarget> {
    ids.iter()
        .map(|id| ExecutionTarget::include(format!("request/{id}")))
        .collect()
}

#[tokio::test]
async fn include_back_to_the_root_is_circular() {
    let h = harness();
    // A includes B; B includes A.
    h.log
        .seed(
            h.instance,
            include_graph(ORG, &[("A", &[]), ("B", &["A"])]),
        )
        .unwrap();
    let pushes = h.log.push_count();

    let err = h
        .commands
        .set_execution(&h.ctx, request("A"), includes(&["B"]))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
    assert_eq!(err.code(), "include_circular");
    assert_eq!(h.log.push_count(), pushes);
}

#[tokio::test]
async fn long_include_chain_exceeds_max_depth() {
    let h = harness();
    h.log
        .seed(
            h.instance,
            include_graph(
                ORG,
                &[("E", &[]), ("D", &["E"]), ("C", &["D"]), ("B", &["C"])],
            ),
        )
        .unwrap();

    let err = h
        .commands
        .set_execution(&h.ctx, request("A"), includes(&["B"]))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
    assert_eq!(err.code(), "include_max_levels");
}

#[rstest]
#[case::direct(&[("B", &[][..])], true)]
#[case::two_levels(&[("C", &[][..]), ("B", &["C"][..])], true)]
#[case::three_levels(&[("D", &[][..]), ("C", &["D"][..]), ("B", &["C"][..])], false)]
#[tokio::test]
async fn include_depth_is_bounded(#[case] graph: &[(&str, &[&str])], #[case] ok: bool) {
    let h = harness();
    h.log.seed(h.instance, include_graph(ORG, graph)).unwrap();

    let result = h
        .commands
        .set_execution(&h.ctx, request("A"), includes(&["B"]))
        .await;
    assert_eq!(result.is_ok(), ok, "{result:?}");
}

#[tokio::test]
async fn include_depth_is_configurable() {
    let log = Arc::new(MemoryEventLog::new());
    let commands = iam_command::Commands::builder(log.clone(), Arc::new(common::encryption()))
        .max_include_depth(5)
        .build()
        .unwrap();
    let instance = iam_id::InstanceId::new();
    let ctx = CommandContext::system(instance).with_resource_owner(ORG);
    log.seed(
        instance,
        include_graph(
            ORG,
            &[("E", &[]), ("D", &["E"]), ("C", &["D"]), ("B", &["C"])],
        ),
    )
    .unwrap();

    commands
        .set_execution(&ctx, request("A"), includes(&["B"]))
        .await
        .unwrap();
}

#[tokio::test]
async fn setting_the_same_targets_twice_appends_once() {
    let h = harness();
    h.log
        .seed(
            h.instance,
            vec![target_added(ORG, "t1"), target_added(ORG, "t2")],
        )
        .unwrap();
    let targets = vec![ExecutionTarget::target("t1"), ExecutionTarget::target("t2")];

    let first = h
        .commands
        .set_execution(&h.ctx, request("A"), targets.clone())
        .await
        .unwrap();
    let pushes = h.log.push_count();
    let second = h
        .commands
        .set_execution(&h.ctx, request("A"), targets)
        .await
        .unwrap();

    assert_eq!(pushes, 1);
    assert_eq!(h.log.push_count(), 1);
    assert_eq!(first, second);
    assert_eq!(first.id, "request/A");
    assert_eq!(first.resource_owner, ORG);
}

#[tokio::test]
async fn reordering_targets_is_a_change() {
    let h = harness();
    h.log
        .seed(
            h.instance,
            vec![target_added(ORG, "t1"), target_added(ORG, "t2")],
        )
        .unwrap();

    h.commands
        .set_execution(
            &h.ctx,
            request("A"),
            vec![ExecutionTarget::target("t1"), ExecutionTarget::target("t2")],
        )
        .await
        .unwrap();
    let details = h
        .commands
        .set_execution(
            &h.ctx,
            request("A"),
            vec![ExecutionTarget::target("t2"), ExecutionTarget::target("t1")],
        )
        .await
        .unwrap();

    assert_eq!(h.log.push_count(), 2);
    assert_eq!(details.sequence.map(|s| s.value()), Some(2));
}

#[tokio::test]
async fn empty_target_list_removes_all_targets() {
    let h = harness();
    h.log.seed(h.instance, vec![target_added(ORG, "t1")]).unwrap();
    h.commands
        .set_execution(&h.ctx, request("A"), vec![ExecutionTarget::target("t1")])
        .await
        .unwrap();

    h.commands
        .set_execution(&h.ctx, request("A"), Vec::new())
        .await
        .unwrap();

    let last = h.log.events().pop().unwrap();
    assert_eq!(last.event_type, event_types::EXECUTION_SET);
    let payload: ExecutionSetPayload = last.decode_payload().unwrap();
    assert!(payload.targets.is_empty());

    // An execution without targets cannot be included.
    let err = h
        .commands
        .set_execution(&h.ctx, request("B"), includes(&["A"]))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "execution_include_not_found");
}

#[tokio::test]
async fn missing_targets_and_includes_are_not_found() {
    let h = harness();
    h.log
        .seed(
            h.instance,
            vec![target_added(ORG, "t1"), target_added(ORG, "gone"), target_removed(ORG, "gone")],
        )
        .unwrap();

    let err = h
        .commands
        .set_execution(&h.ctx, request("A"), vec![ExecutionTarget::target("gone")])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.code(), "execution_target_not_found");

    let err = h
        .commands
        .set_execution(
            &h.ctx,
            request("A"),
            vec![ExecutionTarget::target("t1"), ExecutionTarget::include("request/B")],
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "execution_include_not_found");
    assert_eq!(h.log.push_count(), 0);
}

#[tokio::test]
async fn includes_resolve_within_the_owner_only() {
    let h = harness();
    h.log
        .seed(h.instance, include_graph("org_other", &[("B", &[])]))
        .unwrap();

    let err = h
        .commands
        .set_execution(&h.ctx, request("A"), includes(&["B"]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn include_must_match_condition_kind() {
    let h = harness();
    let err = h
        .commands
        .set_execution(
            &h.ctx,
            ExecutionCondition::Function("preaccesstoken".into()),
            vec![ExecutionTarget::include("request/B")],
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(err.code(), "execution_include_kind_mismatch");
}

#[rstest]
#[case::unknown_method(request("unknown"))]
#[case::unknown_service(ExecutionCondition::Response(ApiCondition::Service("unknown".into())))]
#[case::unknown_function(ExecutionCondition::Function("unknown".into()))]
#[case::unknown_event(ExecutionCondition::Event(EventCondition::Event("unknown".into())))]
#[case::unknown_group(ExecutionCondition::Event(EventCondition::Group("unknown".into())))]
#[tokio::test]
async fn conditions_must_name_known_entries(#[case] condition: ExecutionCondition) {
    let catalog = StaticCatalog::new()
        .with_method("valid")
        .with_service("service")
        .with_function("function")
        .with_event("user.added");
    let h = harness_with(
        Arc::new(MemoryEventLog::new()),
        Arc::new(catalog),
        Arc::new(RolePermissionChecker::new()),
    );

    let err = h
        .commands
        .set_execution(&h.ctx, condition, Vec::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.code(), "execution_condition_not_found");
}

#[rstest]
#[case::method(request("valid"), "request/valid")]
#[case::service(ExecutionCondition::Response(ApiCondition::Service("service".into())), "response/service")]
#[case::all(ExecutionCondition::Request(ApiCondition::All), "request")]
#[case::function(ExecutionCondition::Function("function".into()), "function/function")]
#[case::event(ExecutionCondition::Event(EventCondition::Event("user.added".into())), "event/user.added")]
#[case::group(ExecutionCondition::Event(EventCondition::Group("user".into())), "event/user.*")]
#[case::all_events(ExecutionCondition::Event(EventCondition::All), "event")]
#[tokio::test]
async fn known_conditions_are_set(#[case] condition: ExecutionCondition, #[case] id: &str) {
    let catalog = StaticCatalog::new()
        .with_method("valid")
        .with_service("service")
        .with_function("function")
        .with_event("user.added");
    let h = harness_with(
        Arc::new(MemoryEventLog::new()),
        Arc::new(catalog),
        Arc::new(RolePermissionChecker::new()),
    );
    h.log.seed(h.instance, vec![target_added(ORG, "t1")]).unwrap();

    let details = h
        .commands
        .set_execution(&h.ctx, condition, vec![ExecutionTarget::target("t1")])
        .await
        .unwrap();

    assert_eq!(details.id, id);
    let last = h.log.events().pop().unwrap();
    assert_eq!(last.aggregate_id, id);
    assert_eq!(last.resource_owner, ORG);
}

#[tokio::test]
async fn missing_resource_owner_is_invalid() {
    let h = harness();
    let ctx = h.ctx.clone().with_resource_owner("");
    let err = h
        .commands
        .set_execution(&ctx, request("A"), Vec::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(h.log.recorded_filters().len(), 0);
}

#[tokio::test]
async fn viewers_cannot_set_executions() {
    let permissions = Arc::new(RolePermissionChecker::new());
    let h = harness_with(
        Arc::new(MemoryEventLog::new()),
        Arc::new(AcceptAllCatalog),
        permissions.clone(),
    );
    permissions.grant(h.instance, "viewer", Role::IamViewer);
    let ctx = CommandContext::for_actor(h.instance, ActorType::User, "viewer")
        .with_resource_owner(ORG);

    let err = h
        .commands
        .set_execution(&ctx, request("A"), Vec::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
}

#[tokio::test]
async fn push_failure_propagates() {
    let h = harness();
    h.log.seed(h.instance, vec![target_added(ORG, "t1")]).unwrap();
    h.log.fail_next_push().unwrap();

    let err = h
        .commands
        .set_execution(&h.ctx, request("A"), vec![ExecutionTarget::target("t1")])
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    let mut model = ExecutionWriteModel::new(h.instance, "request/A", ORG);
    load(h.log.as_ref(), &h.ctx, &mut model).await.unwrap();
    assert!(!model.exists());
}

#[tokio::test]
async fn concurrent_set_is_rejected() {
    let log = Arc::new(InterleavingLog::new());
    let h = harness_with(
        log.clone(),
        Arc::new(AcceptAllCatalog),
        Arc::new(RolePermissionChecker::new()),
    );
    log.inner
        .seed(h.instance, vec![target_added(ORG, "t1"), target_added(ORG, "t2")])
        .unwrap();
    log.before_next_push(
        h.instance,
        vec![execution_set(ORG, "request/A", vec![ExecutionTarget::target("t2")])],
    );

    let err = h
        .commands
        .set_execution(&h.ctx, request("A"), vec![ExecutionTarget::target("t1")])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn remove_execution() {
    let h = harness();
    h.log.seed(h.instance, vec![target_added(ORG, "t1")]).unwrap();
    h.commands
        .set_execution(&h.ctx, request("A"), vec![ExecutionTarget::target("t1")])
        .await
        .unwrap();

    let details = h.commands.remove_execution(&h.ctx, request("A")).await.unwrap();
    assert_eq!(details.id, "request/A");
    assert_eq!(
        h.log.events().pop().unwrap().event_type,
        event_types::EXECUTION_REMOVED
    );

    let err = h
        .commands
        .remove_execution(&h.ctx, request("A"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "execution_not_found");
}
