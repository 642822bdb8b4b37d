use std::sync::Arc;
use std::time::Duration;

use team_loadtest::cleanup::cleanup;
use team_loadtest::config::Pacing;
use team_loadtest::error::{StoreError, WorkloadError};
use team_loadtest::metrics::MetricsCollector;
use team_loadtest::namespace;
use team_loadtest::orchestrator::{run_teams, RunPlan, TeamOutcome};
use team_loadtest::store::{MemoryStore, Store};
use team_loadtest::workload::data::ROLES;
use team_loadtest::workload::ops;

fn plan(teams: usize, players: usize, stagger_ms: u64) -> RunPlan {
    RunPlan {
        teams,
        players,
        stagger: Duration::from_millis(stagger_ms),
        seed: 7,
        run_tag: "testrun1".into(),
        pacing: Pacing::immediate(),
    }
}

fn team_id(index: usize, plan: &RunPlan) -> String {
    namespace::team_id(&namespace::team_name(index, &plan.run_tag))
}

async fn run(
    store: &Arc<MemoryStore>,
    plan: &RunPlan,
) -> (team_loadtest::orchestrator::RunResult, Arc<MetricsCollector>) {
    let metrics = Arc::new(MetricsCollector::new());
    let dyn_store: Arc<dyn Store> = store.clone();
    let result = run_teams(dyn_store, metrics.clone(), plan).await;
    (result, metrics)
}

#[tokio::test]
async fn single_commander_runs_every_phase() {
    let store = Arc::new(MemoryStore::new());
    let plan = plan(1, 1, 0);
    let (result, metrics) = run(&store, &plan).await;

    assert_eq!(result.completed(), 1);
    assert_eq!(
        result.outcomes,
        vec![TeamOutcome::Completed {
            index: 0,
            team_id: team_id(0, &plan),
        }]
    );

    let r = metrics.report();
    let count = |op: &str| r.operations.get(op).map(|s| s.count).unwrap_or(0);
    assert_eq!(count(ops::CREATE_TEAM), 1);
    assert_eq!(count(ops::SUBSCRIBE), 1);
    assert_eq!(count(ops::JOIN_CREW), 0);
    assert_eq!(count(ops::ASSIGN_ROLE), 1);
    assert_eq!(count(ops::START_GAME), 1);
    assert_eq!(count(ops::SELECT_CANDIDATE), 1);
    assert_eq!(count(ops::CONFIRM_SELECTION), ROLES.len() as u64);
    assert_eq!(count(ops::COMPLETE_LEVEL_1), 1);
    assert_eq!(count(ops::CONTRIBUTE_PLAN), 1);
    assert_eq!(count(ops::COMPLETE_LEVEL_2), 1);
    assert_eq!(count(ops::WRITE_REPORT), 3);
    assert_eq!(count(ops::COMPLETE_LEVEL_3), 1);
    assert_eq!(count(ops::UPDATE_META), 3);
    assert_eq!(count(ops::AWARD_BADGES), 1);
    assert_eq!(count(ops::VERIFY_READ), 1);
    assert_eq!(r.errors.total, 0);

    // start + three level completions
    assert_eq!(r.propagation.count, 4);
    assert_eq!(r.connections.peak, 1);
    assert_eq!(r.connections.current, 0);
    assert!(r.total_bytes_transferred > 0);

    let record = store
        .read(&namespace::team_path(&team_id(0, &plan)))
        .await
        .unwrap()
        .value
        .unwrap();
    let commander = namespace::participant_id(0, 0);
    assert_eq!(record["roles"][&commander]["role"], ROLES[0]);
    assert_eq!(record["meta"]["finished"], true);
    assert_eq!(record["meta"]["level"], 3);
    assert!(record["badges"].as_object().unwrap().len() == 3);
    assert_eq!(store.subscriber_count(), 0);
}

#[tokio::test]
async fn crew_joins_and_roles_cycle() {
    let store = Arc::new(MemoryStore::new());
    let plan = plan(1, 6, 0);
    let (result, metrics) = run(&store, &plan).await;
    assert_eq!(result.completed(), 1);

    let r = metrics.report();
    assert_eq!(r.operations[ops::JOIN_CREW].count, 5);
    // six in phase 2, one more per crew join
    assert_eq!(r.operations[ops::SUBSCRIBE].count, 11);
    assert_eq!(r.operations[ops::CONTRIBUTE_PLAN].count, 3);
    assert_eq!(r.connections.peak, 6);

    let record = store
        .read(&namespace::team_path(&team_id(0, &plan)))
        .await
        .unwrap()
        .value
        .unwrap();
    assert_eq!(record["players"].as_object().unwrap().len(), 6);
    for p in 0..6 {
        let pid = namespace::participant_id(0, p);
        assert_eq!(record["roles"][&pid]["role"], ROLES[p % ROLES.len()]);
    }
    // pilot is held by participants 0 and 4
    let pilots = &record["levels"]["1"]["confirmed"]["pilot"]["confirmed_by"];
    assert_eq!(
        pilots,
        &serde_json::json!([namespace::participant_id(0, 0), namespace::participant_id(0, 4)])
    );
    let total = record["meta"]["total_score"].as_u64().unwrap();
    assert!((180..=300).contains(&total));
}

#[tokio::test]
async fn every_participant_subscribes_before_the_crew_joins() {
    let store = Arc::new(MemoryStore::new());
    let plan = plan(1, 3, 0);
    let (result, metrics) = run(&store, &plan).await;
    assert_eq!(result.completed(), 1);

    let r = metrics.report();
    assert_eq!(r.operations[ops::SUBSCRIBE].count, 5);
    // one connection per participant, closed again in teardown
    assert_eq!(r.connections.peak, 3);
    assert_eq!(r.connections.current, 0);
    assert_eq!(store.subscriber_count(), 0);
}

#[tokio::test]
async fn listeners_attached_before_a_failure_are_released() {
    let store = Arc::new(MemoryStore::new());
    let plan = plan(1, 4, 0);
    let victim = team_id(0, &plan);
    // phase 4 is the first to write under roles/
    store.fail_paths_containing(format!("{victim}/roles"));

    let (result, metrics) = run(&store, &plan).await;
    assert_eq!(result.completed(), 0);

    let r = metrics.report();
    assert_eq!(r.operations[ops::SUBSCRIBE].count, 7);
    assert_eq!(r.connections.peak, 4);
    assert_eq!(store.subscriber_count(), 0);
}

#[tokio::test]
async fn three_unstaggered_teams_all_complete() {
    let store = Arc::new(MemoryStore::new());
    let plan = plan(3, 3, 0);
    let (result, metrics) = run(&store, &plan).await;

    assert_eq!(result.completed(), 3);
    assert_eq!(result.failed().count(), 0);
    let indexes: Vec<usize> = result.outcomes.iter().map(|o| o.index()).collect();
    assert_eq!(indexes, [0, 1, 2]);

    let r = metrics.report();
    assert_eq!(r.operations[ops::CREATE_TEAM].count, 3);
    assert_eq!(r.propagation.count, 12);
    assert!(r.connections.peak >= 3 && r.connections.peak <= 9);
}

#[tokio::test]
async fn stagger_spaces_launches() {
    let store = Arc::new(MemoryStore::new());
    let plan = plan(3, 1, 60);
    let (result, _) = run(&store, &plan).await;
    assert_eq!(result.completed(), 3);
    // two gaps, none after the last launch
    assert!(result.elapsed >= Duration::from_millis(120));
}

#[tokio::test]
async fn one_failing_team_leaves_others_untouched() {
    let store = Arc::new(MemoryStore::new());
    let plan = plan(3, 2, 0);
    let victim = team_id(1, &plan);
    store.fail_paths_containing(format!("{victim}/meta"));

    let (result, metrics) = run(&store, &plan).await;
    assert_eq!(result.completed(), 2);

    match &result.outcomes[1] {
        TeamOutcome::Failed {
            index,
            team_id,
            error,
        } => {
            assert_eq!(*index, 1);
            assert_eq!(team_id, &victim);
            assert_eq!(error.operation(), Some(ops::START_GAME));
            assert!(matches!(
                error,
                WorkloadError::Operation {
                    source: StoreError::Rejected { .. },
                    ..
                }
            ));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(result.outcomes[0].is_success());
    assert!(result.outcomes[2].is_success());

    let r = metrics.report();
    assert_eq!(r.errors.total, 1);
    assert_eq!(r.errors.groups.len(), 1);
    assert_eq!(r.errors.groups[0].operation, ops::START_GAME);
    assert_eq!(r.errors.groups[0].count, 1);
    // the failed attempt is still timed
    assert_eq!(r.operations[ops::START_GAME].count, 3);
    // nothing after phase 5 ran for the victim
    assert_eq!(r.operations[ops::VERIFY_READ].count, 2);
    // its subscriptions were released when the task ended
    assert_eq!(store.subscriber_count(), 0);
}

#[tokio::test]
async fn same_seed_same_scores() {
    let plan = plan(2, 3, 0);
    let a = Arc::new(MemoryStore::new());
    let b = Arc::new(MemoryStore::new());
    run(&a, &plan).await;
    run(&b, &plan).await;

    for i in 0..2 {
        for level in ["1", "2", "3"] {
            let path = format!(
                "{}/levels/{level}/result/score",
                namespace::team_path(&team_id(i, &plan))
            );
            let sa = a.read(&path).await.unwrap().value;
            let sb = b.read(&path).await.unwrap().value;
            assert!(sa.is_some());
            assert_eq!(sa, sb);
        }
    }
}

#[tokio::test]
async fn cleanup_after_run_removes_only_generated_teams() {
    let store = Arc::new(MemoryStore::new());
    store
        .write("teams/production_team", serde_json::json!({"meta": {"level": 9}}))
        .await
        .unwrap();

    let plan = plan(12, 1, 0);
    let (result, _) = run(&store, &plan).await;
    assert_eq!(result.completed(), 12);

    let summary = cleanup(store.as_ref()).await.summary();
    assert_eq!(summary.matched, 12);
    assert_eq!(summary.batches, 2);
    assert!(store.read("teams/production_team").await.unwrap().exists());
    assert!(!store
        .read(&namespace::team_path(&team_id(0, &plan)))
        .await
        .unwrap()
        .exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_teams_lose_no_samples() {
    let store = Arc::new(MemoryStore::new());
    let plan = plan(16, 5, 0);
    let (result, metrics) = run(&store, &plan).await;
    assert_eq!(result.completed(), 16);

    let r = metrics.report();
    assert_eq!(r.operations[ops::CREATE_TEAM].count, 16);
    assert_eq!(r.operations[ops::SUBSCRIBE].count, 16 * 9);
    assert_eq!(r.operations[ops::JOIN_CREW].count, 16 * 4);
    assert_eq!(r.operations[ops::ASSIGN_ROLE].count, 16 * 5);
    assert_eq!(r.operations[ops::SELECT_CANDIDATE].count, 16 * 5);
    assert_eq!(r.operations[ops::UPDATE_META].count, 16 * 3);
    assert_eq!(r.propagation.count, 16 * 4);
    assert_eq!(r.connections.current, 0);
    assert!(r.connections.peak <= 16 * 5);
}
