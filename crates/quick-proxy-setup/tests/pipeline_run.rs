use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, mpsc};

use quick_proxy_setup::ErrorKind;
use quick_proxy_setup::executor::{ChannelSink, ExecCtx, ExecEvent, PreparedRecipe, run_recipe};
use quick_proxy_setup::region::{END_LINE, START_LINE};

struct Home {
    _tmp: tempfile::TempDir,
    root: PathBuf,
}

impl Home {
    fn new() -> Self {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path().to_path_buf();
        fs::write(root.join("bashrc"), "# ~/.bashrc\nexport PATH=$HOME/bin:$PATH\n")
            .expect("write bashrc");
        Self { _tmp: tmp, root }
    }

    fn bashrc(&self) -> PathBuf {
        self.root.join("bashrc")
    }

    fn ssh_config(&self) -> PathBuf {
        self.root.join("ssh").join("config")
    }

    // Writes a recipe whose managed files all live inside this directory.
    fn recipe(&self, ip: &str, pipeline: &str) -> PathBuf {
        let raw = format!(
            r#"{{
  "Network": {{"IP": "{ip}", "HTTPPort": 8080, "SocksPort": 1080}},
  "Files": {{"Bashrc": "bashrc", "SSHConfig": "ssh/config", "GitConfig": "gitconfig"}},
  "Pipeline": {pipeline}
}}"#
        );
        let path = self.root.join("recipe.json");
        fs::write(&path, raw).expect("write recipe");
        path
    }
}

fn run(path: &Path, descriptor: Option<&str>) -> (quick_proxy_setup::Result<()>, Vec<ExecEvent>) {
    let doc = quick_proxy_setup::config::load(path).expect("load recipe");
    let (tx, rx) = mpsc::channel();
    let mut ctx = ExecCtx::new(false, Arc::new(ChannelSink::new(tx)));
    let res = run_recipe(&doc, || descriptor.map(str::to_string), &mut ctx);
    drop(ctx);
    (res, rx.into_iter().collect())
}

#[test]
fn shell_env_init_and_proxy_writes_exports() {
    let home = Home::new();
    let recipe = home.recipe("10.0.0.5", r#"{"ShellEnv": "init,proxy"}"#);

    let (res, _) = run(&recipe, None);
    res.expect("run pipeline");

    let got = fs::read_to_string(home.bashrc()).unwrap();
    let tail = format!(
        "{START_LINE}\nexport http_proxy=http://10.0.0.5:8080\nexport https_proxy=http://10.0.0.5:8080\n{END_LINE}\n"
    );
    assert!(got.starts_with("# ~/.bashrc\n"), "user content lost: {got:?}");
    assert!(got.ends_with(&tail), "unexpected bashrc: {got:?}");
}

#[test]
fn client_placeholder_resolves_before_targets_run() {
    let home = Home::new();
    let recipe = home.recipe("<SSHClient>", r#"{"ShellEnv": "init, proxy"}"#);

    let (res, _) = run(&recipe, Some("203.0.113.7 54321 10.0.0.1 22"));
    res.expect("run pipeline");

    let got = fs::read_to_string(home.bashrc()).unwrap();
    assert!(got.contains("export http_proxy=http://203.0.113.7:8080\n"));
    assert!(got.contains("export https_proxy=http://203.0.113.7:8080\n"));
}

#[test]
fn unresolvable_placeholder_touches_nothing() {
    let home = Home::new();
    let recipe = home.recipe("<SSHClient>", r#"{"ShellEnv": "init,proxy"}"#);
    let before = fs::read_to_string(home.bashrc()).unwrap();

    let (res, events) = run(&recipe, None);
    assert_eq!(res.unwrap_err().kind(), ErrorKind::AddressResolution);
    assert!(events.is_empty());
    assert_eq!(fs::read_to_string(home.bashrc()).unwrap(), before);
}

#[test]
fn clear_only_recipe_runs_outside_ssh_session() {
    let home = Home::new();
    let recipe = home.recipe("<SSHClient>", r#"{"ShellEnv": "init,clear"}"#);

    let (res, _) = run(&recipe, None);
    res.expect("clear without client address");
    let got = fs::read_to_string(home.bashrc()).unwrap();
    assert!(got.ends_with(&format!("{START_LINE}\n#\n#\n{END_LINE}\n")), "unexpected bashrc: {got:?}");
}

#[test]
fn prepared_recipe_resolves_once_and_executes() {
    let home = Home::new();
    let recipe = home.recipe("<SSHClient>", r#"{"ShellEnv": "init,proxy"}"#);
    let doc = quick_proxy_setup::config::load(&recipe).expect("load recipe");

    let run = PreparedRecipe::new(&doc, || Some("203.0.113.7 54321 10.0.0.1 22".into()))
        .expect("prepare");
    assert_eq!(run.params.ip, "203.0.113.7");
    assert_eq!(run.env.bashrc, home.bashrc());
    assert_eq!(run.plan.ordered(), vec!["ShellEnv.init", "ShellEnv.proxy"]);
    // Preparing writes nothing.
    assert!(!fs::read_to_string(home.bashrc()).unwrap().contains(START_LINE));

    let (tx, rx) = mpsc::channel();
    let mut ctx = ExecCtx::new(false, Arc::new(ChannelSink::new(tx)));
    run.execute(&mut ctx).expect("execute");
    drop(ctx);
    assert_eq!(
        rx.into_iter().last(),
        Some(ExecEvent::ExecutorDone {
            ok: true,
            error: None
        })
    );
    let got = fs::read_to_string(home.bashrc()).unwrap();
    assert!(got.contains("export http_proxy=http://203.0.113.7:8080\n"));
}

#[test]
fn full_cycle_across_targets_restores_initialized_state() {
    let home = Home::new();
    let recipe = home.recipe(
        "10.0.0.5",
        r#"{"SSHClient": "init", "ShellEnv": "init"}"#,
    );
    run(&recipe, None).0.expect("init");
    let bashrc_init = fs::read_to_string(home.bashrc()).unwrap();
    let ssh_init = fs::read_to_string(home.ssh_config()).unwrap();

    let recipe = home.recipe(
        "10.0.0.5",
        r#"{"SSHClient": "proxy", "ShellEnv": "proxy"}"#,
    );
    run(&recipe, None).0.expect("proxy");
    let ssh = fs::read_to_string(home.ssh_config()).unwrap();
    assert!(ssh.contains("ProxyCommand nc -v -x 10.0.0.5:1080 %h %p\n"));

    let recipe = home.recipe(
        "10.0.0.5",
        r#"{"SSHClient": "clear", "ShellEnv": "clear,clear"}"#,
    );
    run(&recipe, None).0.expect("clear");
    assert_eq!(fs::read_to_string(home.bashrc()).unwrap(), bashrc_init);
    assert_eq!(fs::read_to_string(home.ssh_config()).unwrap(), ssh_init);
}

#[test]
fn second_init_run_fails_and_keeps_file() {
    let home = Home::new();
    let recipe = home.recipe("10.0.0.5", r#"{"ShellEnv": "init"}"#);
    run(&recipe, None).0.expect("first init");
    let after_first = fs::read_to_string(home.bashrc()).unwrap();

    let (res, _) = run(&recipe, None);
    let err = res.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyInitialized);
    assert!(err.to_string().contains("ShellEnv.init"), "unexpected err: {err}");
    assert_eq!(fs::read_to_string(home.bashrc()).unwrap(), after_first);
}

#[test]
fn unknown_operation_aborts_before_any_step() {
    let home = Home::new();
    let recipe = home.recipe(
        "10.0.0.5",
        r#"{"ShellEnv": "init,proxy", "SSHClient": "init,restart"}"#,
    );
    let before = fs::read_to_string(home.bashrc()).unwrap();

    let (res, events) = run(&recipe, None);
    assert_eq!(res.unwrap_err().kind(), ErrorKind::UnknownOperation);
    assert!(events.is_empty());
    assert_eq!(fs::read_to_string(home.bashrc()).unwrap(), before);
    assert!(!home.ssh_config().exists());
}

#[test]
fn unknown_target_aborts_before_any_step() {
    let home = Home::new();
    let recipe = home.recipe("10.0.0.5", r#"{"ShellEnv": "init", "Conda": "proxy"}"#);

    let (res, events) = run(&recipe, None);
    assert_eq!(res.unwrap_err().kind(), ErrorKind::UnknownTarget);
    assert!(events.is_empty());
}

#[test]
fn failure_stops_the_remaining_targets() {
    let home = Home::new();
    // proxy before init: the shell region does not exist yet.
    let recipe = home.recipe(
        "10.0.0.5",
        r#"{"ShellEnv": "proxy", "SSHClient": "init"}"#,
    );

    let (res, events) = run(&recipe, None);
    assert_eq!(res.unwrap_err().kind(), ErrorKind::RegionNotFound);
    assert!(!home.ssh_config().exists());

    assert!(events.contains(&ExecEvent::TargetStarted {
        target: "ShellEnv".into()
    }));
    assert!(!events.contains(&ExecEvent::TargetStarted {
        target: "SSHClient".into()
    }));
    assert!(matches!(
        events.last(),
        Some(ExecEvent::ExecutorDone { ok: false, .. })
    ));
}

#[test]
fn corrupted_region_is_reported_and_left_alone() {
    let home = Home::new();
    let broken = format!("export A=1\n{START_LINE}\n#\n{END_LINE}\n");
    fs::write(home.bashrc(), &broken).unwrap();
    let recipe = home.recipe("10.0.0.5", r#"{"ShellEnv": "clear"}"#);

    let (res, _) = run(&recipe, None);
    assert_eq!(res.unwrap_err().kind(), ErrorKind::StructuralCorruption);
    assert_eq!(fs::read_to_string(home.bashrc()).unwrap(), broken);
}

#[test]
fn events_follow_recipe_order() {
    let home = Home::new();
    let recipe = home.recipe(
        "10.0.0.5",
        r#"{"SSHClient": "init,proxy", "ShellEnv": "init"}"#,
    );

    let (res, events) = run(&recipe, None);
    res.expect("run pipeline");

    let started: Vec<String> = events
        .iter()
        .filter_map(|ev| match ev {
            ExecEvent::StepStarted { id } => Some(id.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(
        started,
        vec!["SSHClient.init", "SSHClient.proxy", "ShellEnv.init"]
    );
    assert_eq!(
        events.last(),
        Some(&ExecEvent::ExecutorDone {
            ok: true,
            error: None
        })
    );
}

#[test]
fn dry_run_reports_steps_without_writing() {
    let home = Home::new();
    let recipe = home.recipe(
        "10.0.0.5",
        r#"{"ShellEnv": "init,proxy", "SSHClient": "init"}"#,
    );
    let before = fs::read_to_string(home.bashrc()).unwrap();

    let doc = quick_proxy_setup::config::load(&recipe).expect("load recipe");
    let (tx, rx) = mpsc::channel();
    let mut ctx = ExecCtx::new(true, Arc::new(ChannelSink::new(tx)));
    run_recipe(&doc, || None, &mut ctx).expect("dry run");
    drop(ctx);

    let finished = rx
        .into_iter()
        .filter(|ev| matches!(ev, ExecEvent::StepFinished { ok: true, .. }))
        .count();
    assert_eq!(finished, 3);
    assert_eq!(fs::read_to_string(home.bashrc()).unwrap(), before);
    assert!(!home.ssh_config().exists());
}

#[test]
fn toml_recipe_runs_like_json() {
    let home = Home::new();
    let raw = r#"
[Network]
IP = "192.168.1.20"
HTTPPort = 3128

[Files]
Bashrc = "bashrc"
SSHConfig = "ssh/config"

[Pipeline]
ProxyBash = "init,proxy"
"#;
    let path = home.root.join("recipe.toml");
    fs::write(&path, raw).unwrap();

    let (res, _) = run(&path, None);
    res.expect("run pipeline");
    let got = fs::read_to_string(home.bashrc()).unwrap();
    assert!(got.contains("export https_proxy=http://192.168.1.20:3128\n"));
}
