use super::*;
use shared::domain::Platform;
use storage::MemoryStore;
use tokio::time::Instant;
use tokio_stream::StreamExt;

fn vscode() -> AppData {
    AppData {
        id: AppId::new("vscode"),
        name: "Visual Studio Code".into(),
        developer: "Microsoft".into(),
        icon: "/icons/vscode.png".into(),
        description: String::new(),
        short_description: String::new(),
        category: "Developer Tools".into(),
        rating: 4.8,
        reviews: 0,
        downloads: String::new(),
        size: "95 MB".into(),
        version: "1.2.3".into(),
        platforms: Platform::ALL.into_iter().collect(),
        screenshots: Vec::new(),
        price: "Free".into(),
    }
}

fn simulator() -> Simulator<MemoryStore> {
    Simulator::new(Arc::new(LibraryStore::new(MemoryStore::new())))
}

#[test]
fn install_status_follows_phase_thresholds() {
    assert_eq!(install_status(0), "Downloading… 0%");
    assert_eq!(install_status(45), "Downloading… 45%");
    assert_eq!(install_status(49), "Downloading… 49%");
    assert_eq!(install_status(50), "Installing…");
    assert_eq!(install_status(70), "Installing…");
    assert_eq!(install_status(89), "Installing…");
    assert_eq!(install_status(90), "Finishing up…");
    assert_eq!(install_status(95), "Finishing up…");
    assert_eq!(install_status(100), "Finishing up…");
}

#[test]
fn update_status_switches_at_eighty() {
    assert_eq!(update_status(0), "Updating…");
    assert_eq!(update_status(79), "Updating…");
    assert_eq!(update_status(80), "Finishing…");
    assert_eq!(update_status(100), "Finishing…");
}

#[test]
fn percent_sequences_are_closed_form() {
    assert_eq!(
        install_percents().collect::<Vec<_>>(),
        vec![0, 10, 20, 30, 40, 50, 60, 70, 80, 90, 100]
    );
    assert_eq!(
        update_percents().collect::<Vec<_>>(),
        vec![0, 20, 40, 60, 80, 100]
    );
}

#[tokio::test(start_paused = true)]
async fn install_reports_eleven_steps_then_persists() {
    let simulator = simulator();
    let started = Instant::now();
    let mut events = Vec::new();

    let installed = simulator
        .install(&vscode(), |event| events.push(event))
        .await
        .expect("install");

    let elapsed = started.elapsed();
    assert!(elapsed >= INSTALL_STEP_DELAY * 11 && elapsed < INSTALL_STEP_DELAY * 12);
    assert_eq!(events.len(), 11);
    assert!(events.iter().all(|e| e.kind == OperationKind::Install));
    assert_eq!(events[0].status, "Downloading… 0%");
    assert_eq!(events[5].percent, 50);
    assert_eq!(events[5].status, "Installing…");
    assert_eq!(events[10].percent, 100);
    assert_eq!(events[10].status, "Finishing up…");

    assert_eq!(installed.installed_version, "1.2.3");
    assert!(simulator.library().is_installed(&AppId::new("vscode")).await);
}

#[tokio::test(start_paused = true)]
async fn installing_twice_keeps_one_library_entry() {
    let simulator = simulator();
    simulator.install(&vscode(), |_| {}).await.expect("install");
    simulator.install(&vscode(), |_| {}).await.expect("install");
    assert_eq!(simulator.library().installed_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn update_reports_six_steps_and_bumps_patch() {
    let simulator = simulator();
    simulator.install(&vscode(), |_| {}).await.expect("install");

    let started = Instant::now();
    let mut events = Vec::new();
    let updated = simulator
        .update(&AppId::new("vscode"), |event| events.push(event))
        .await
        .expect("update")
        .expect("installed");

    let elapsed = started.elapsed();
    assert!(elapsed >= UPDATE_STEP_DELAY * 6 && elapsed < UPDATE_STEP_DELAY * 7);
    let percents: Vec<u8> = events.iter().map(|e| e.percent).collect();
    assert_eq!(percents, vec![0, 20, 40, 60, 80, 100]);
    assert_eq!(events[3].status, "Updating…");
    assert_eq!(events[4].status, "Finishing…");
    assert_eq!(updated.installed_version, "1.2.4");
}

#[tokio::test(start_paused = true)]
async fn update_of_unknown_app_resolves_to_none() {
    let simulator = simulator();
    let mut steps = 0;

    let result = simulator
        .update(&AppId::new("nonexistent"), |_| steps += 1)
        .await
        .expect("update");

    assert!(result.is_none());
    assert_eq!(steps, 6);
    assert!(simulator.library().list().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn spawned_install_streams_events_in_order() {
    let simulator = simulator();
    let mut handle = simulator.spawn_install(vscode());

    let mut percents = Vec::new();
    while let Some(event) = handle.events.next().await {
        assert_eq!(event.app_id, AppId::new("vscode"));
        percents.push(event.percent);
    }
    let installed = handle.finish().await.expect("install");

    assert_eq!(percents, install_percents().collect::<Vec<_>>());
    assert_eq!(installed.id, AppId::new("vscode"));
}

#[tokio::test(start_paused = true)]
async fn spawned_update_runs_to_completion_without_a_listener() {
    let simulator = simulator();
    simulator.install(&vscode(), |_| {}).await.expect("install");

    let SimulationHandle { events, task } = simulator.spawn_update(AppId::new("vscode"));
    drop(events);
    let updated = task
        .await
        .expect("join")
        .expect("update")
        .expect("installed");

    assert_eq!(updated.installed_version, "1.2.4");
}
