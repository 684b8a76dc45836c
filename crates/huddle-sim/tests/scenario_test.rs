use huddle_proto::RoomId;
use huddle_sim::{ScenarioConfig, ScenarioReport, SimError, run_scenario};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scripted_session_converges() {
    let config = ScenarioConfig { messages: 6, seed: 7, ..Default::default() };
    let report = run_scenario(&config).await.unwrap();

    assert!(report.converged);
    assert_eq!(report.room_id.as_str(), "general");
    assert_eq!(report.transcript.len(), 6);
    assert!(report.transcript.iter().all(|line| line.starts_with("alice: ") || line.starts_with("bob: ")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn same_seed_same_script() {
    let config = ScenarioConfig { messages: 4, seed: 99, ..Default::default() };
    let first = run_scenario(&config).await.unwrap();
    let second = run_scenario(&config).await.unwrap();

    assert_eq!(first.transcript, second.transcript);
}

#[tokio::test]
async fn direct_message_namespace_is_rejected() {
    let config = ScenarioConfig { room: "dm_alice_bob".into(), ..Default::default() };

    assert!(matches!(run_scenario(&config).await, Err(SimError::InvalidId(_))));
}

#[test]
fn diverged_report_is_an_error() {
    let report = ScenarioReport {
        room_id: RoomId::public("general").unwrap(),
        transcript: vec!["alice: hi".into()],
        converged: false,
    };

    let error = report.clone().ensure_converged().unwrap_err();
    assert!(matches!(&error, SimError::Diverged(room) if room.as_str() == "general"));
    assert_eq!(error.to_string(), "timelines diverged in general");

    let report = ScenarioReport { converged: true, ..report };
    assert_eq!(report.clone().ensure_converged().unwrap(), report);
}
