//! Console tests
//!
//! The console reads scripted input and writes into a buffer. Nothing here
//! starts a tunnel, so the real ssh launcher is never invoked.

use officer_cli::console::Console;
use officer_cli::tunnel_store::TunnelStore;
use officer_core::{
    Direction, Registry, SshLauncher, SupervisionController, SupervisorSettings, TunnelSpec,
};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::watch;

fn create_test_tunnel(name: &str, local_port: u16) -> TunnelSpec {
    TunnelSpec {
        name: name.to_string(),
        host: "bastion.example.com".to_string(),
        port: 22,
        user: "deploy".to_string(),
        ssh_key: "/home/deploy/.ssh/id_ed25519".to_string(),
        direction: Direction::Forward,
        local_port,
        remote_host: "db.internal".to_string(),
        remote_port: 5432,
        reconnect_delay: 5,
    }
}

struct TestEnv {
    controller: Arc<SupervisionController>,
    store: TunnelStore,
    _temp: TempDir,
}

fn setup_test_env(capacity: usize, tunnels: Vec<TunnelSpec>) -> TestEnv {
    let temp = TempDir::new().unwrap();
    let store = TunnelStore::new(temp.path().join("config.json"));
    let settings = SupervisorSettings {
        log_dir: None,
        ..SupervisorSettings::default()
    };
    let controller = Arc::new(SupervisionController::new(
        Arc::new(Registry::new(capacity)),
        Arc::new(SshLauncher::new()),
        settings,
    ));
    for spec in tunnels {
        controller.add_tunnel(spec).unwrap();
    }
    TestEnv {
        controller,
        store,
        _temp: temp,
    }
}

/// Run the console over `input` and return everything it printed
async fn run_console(env: &TestEnv, input: &str) -> String {
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    run_console_with(env, input, shutdown_rx).await
}

async fn run_console_with(
    env: &TestEnv,
    input: &str,
    shutdown_rx: watch::Receiver<bool>,
) -> String {
    let mut out = Vec::new();
    {
        let mut console = Console::new(
            env.controller.clone(),
            env.store.clone(),
            input.as_bytes(),
            &mut out,
            shutdown_rx,
        );
        console.run().await.unwrap();
    }
    String::from_utf8(out).unwrap()
}

#[tokio::test]
async fn test_basic_commands() {
    let env = setup_test_env(32, vec![create_test_tunnel("db", 5432)]);

    let out = run_console(
        &env,
        "help\nstatus\n\nbogus\nSTART\nreset\nstart ghost\nstop db\nreset ghost\nquit\nstatus\n",
    )
    .await;

    assert!(out.contains("Available Commands"));
    assert!(out.contains("Live Status"));
    assert!(out.contains("○ db deploy@bastion.example.com:22"));
    assert!(out.contains("Unknown command: bogus"));
    assert!(out.contains("Unknown command: START"));
    assert!(out.contains("Usage: reset <tunnel_name>"));
    assert!(out.contains("Tunnel 'ghost' not found"));
    assert!(out.contains("Tunnel 'db' is not running"));
    assert!(out.contains("signing off"));
    // Nothing after quit is executed
    assert_eq!(out.matches("Live Status").count(), 3);
}

#[tokio::test]
async fn test_end_of_input_ends_loop() {
    let env = setup_test_env(32, vec![create_test_tunnel("db", 5432)]);

    let out = run_console(&env, "status\n").await;

    assert!(out.ends_with("tunnel> \n"));
    assert!(!out.contains("signing off"));
}

#[tokio::test]
async fn test_shutdown_request_stops_loop() {
    let env = setup_test_env(32, vec![create_test_tunnel("db", 5432)]);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    shutdown_tx.send(true).unwrap();

    let out = run_console_with(&env, "add\n", shutdown_rx).await;

    assert!(!out.contains("tunnel> "));
    assert!(!out.contains("Adding new tunnel"));
}

#[tokio::test]
async fn test_add_wizard_saves_configuration() {
    let env = setup_test_env(32, vec![create_test_tunnel("db", 5432)]);

    let out = run_console(
        &env,
        "add\ncache\nops\nedge.example.com\n\n/keys/ops\nreverse\n6379\nlocalhost\n16379\n3\nn\nquit\n",
    )
    .await;

    assert!(out.contains("Tunnel 'cache' added successfully!"));
    assert!(out.contains("Configuration saved to"));

    let view = env.controller.registry().find("cache").unwrap();
    assert!(!view.should_run);
    assert!(!view.has_worker);

    let saved = env.store.load().unwrap();
    let names: Vec<_> = saved.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["db", "cache"]);

    let cache = &saved[1];
    assert_eq!(cache.port, 22);
    assert_eq!(cache.direction, Direction::Reverse);
    assert_eq!(cache.local_port, 6379);
    assert_eq!(cache.remote_port, 16379);
    assert_eq!(cache.reconnect_delay, 3);
}

#[tokio::test]
async fn test_add_wizard_rejects_duplicates() {
    let env = setup_test_env(32, vec![create_test_tunnel("db", 5432)]);

    let out = run_console(
        &env,
        "add\ndb\ndeploy\nbastion\n22\n/keys/id\nforward\n5432\ndb.internal\n5432\n5\nquit\n",
    )
    .await;

    assert!(out.contains("Tunnel with name 'db' already exists"));
    assert_eq!(env.controller.registry().len(), 1);
    assert!(!env.store.path().exists());
    assert!(out.contains("signing off"));
}

#[tokio::test]
async fn test_add_wizard_rejects_invalid_input() {
    let env = setup_test_env(32, vec![]);

    let out = run_console(
        &env,
        "add\nbad name\ndeploy\nbastion\n22\n/keys/id\n\n5432\ndb.internal\n5432\n\nquit\n",
    )
    .await;

    assert!(out.contains("Invalid input"));
    assert!(out.contains("Tunnel not added"));
    assert!(env.controller.registry().is_empty());
}

#[tokio::test]
async fn test_add_wizard_checks_capacity_first() {
    let env = setup_test_env(1, vec![create_test_tunnel("db", 5432)]);

    let out = run_console(&env, "add\nquit\n").await;

    assert!(out.contains("Maximum tunnels reached (1/1)"));
    assert!(!out.contains("Tunnel name:"));
    assert!(out.contains("signing off"));
}

#[tokio::test]
async fn test_port_probe_command() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let env = setup_test_env(32, vec![create_test_tunnel("web", port)]);

    let out = run_console(&env, "test web\ntest ghost\ntest\nquit\n").await;

    assert!(out.contains(&format!("✅ web localhost:{} reachable", port)));
    assert!(out.contains("Tunnel 'ghost' not found"));
    assert_eq!(out.matches("Tested 1 tunnel(s)").count(), 2);
}

#[tokio::test]
async fn test_watch_leaves_on_enter() {
    let env = setup_test_env(32, vec![create_test_tunnel("db", 5432)]);

    let out = run_console(&env, "watch\n\nquit\n").await;

    assert!(out.contains("Entering watch mode"));
    assert!(out.contains("Refreshing in 2 seconds"));
    assert!(out.contains("signing off"));
}
