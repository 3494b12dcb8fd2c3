use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use proptest::prelude::*;
use saas_backend::lifecycle::{
    DependencyPolicy, LifecycleError, ManagerOptions, Module, ModuleDescriptor, ModuleError,
    ModuleHealth, ModuleHealthStatus, ModuleManager, ModuleRegistry, ModuleState, resolve_order,
};

type Journal = Arc<Mutex<Vec<String>>>;

#[derive(Default)]
struct Behaviour {
    fail_init: bool,
    fail_shutdown: bool,
    panic_shutdown: bool,
    unhealthy: bool,
    panic_health: bool,
}

struct Recorder {
    name: String,
    journal: Journal,
    behaviour: Behaviour,
}

#[async_trait]
impl Module for Recorder {
    async fn initialize(&self) -> Result<(), ModuleError> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("init:{}", self.name));
        if self.behaviour.fail_init {
            return Err(ModuleError::failed(format!("{} 初始化失败", self.name)));
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ModuleError> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("shutdown:{}", self.name));
        if self.behaviour.panic_shutdown {
            panic!("{} 关闭时崩溃", self.name);
        }
        if self.behaviour.fail_shutdown {
            return Err(ModuleError::failed("关闭失败"));
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<Option<ModuleHealth>, ModuleError> {
        if self.behaviour.panic_health {
            panic!("{} 自检崩溃", self.name);
        }
        if self.behaviour.unhealthy {
            return Ok(Some(ModuleHealth::unhealthy(serde_json::json!({"reason": "stale"}))));
        }
        Ok(Some(ModuleHealth::healthy()))
    }
}

fn descriptor(
    journal: &Journal,
    name: &str,
    priority: i32,
    deps: &[&str],
    behaviour: Behaviour,
) -> ModuleDescriptor {
    let module = Recorder {
        name: name.to_string(),
        journal: journal.clone(),
        behaviour,
    };
    ModuleDescriptor::new(name, Arc::new(module))
        .priority(priority)
        .depends_on(deps.iter().copied())
}

fn manager(descriptors: Vec<ModuleDescriptor>) -> ModuleManager {
    let mut registry = ModuleRegistry::new();
    for d in descriptors {
        registry.register(d).expect("register");
    }
    ModuleManager::new(registry, ManagerOptions::default())
}

fn journal_entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

#[tokio::test]
async fn auth_user_billing_start_and_stop_in_order() {
    let journal = Journal::default();
    let mgr = manager(vec![
        descriptor(&journal, "billing", 200, &["auth", "user"], Behaviour::default()),
        descriptor(&journal, "user", 110, &["auth"], Behaviour::default()),
        descriptor(&journal, "auth", 100, &[], Behaviour::default()),
    ]);

    mgr.initialize_all().await.expect("initialize");
    assert_eq!(mgr.initialized_modules(), vec!["auth", "user", "billing"]);

    let report = mgr.shutdown_all().await;
    assert!(report.is_clean());
    assert_eq!(report.stopped, vec!["billing", "user", "auth"]);
    assert_eq!(
        journal_entries(&journal),
        vec![
            "init:auth",
            "init:user",
            "init:billing",
            "shutdown:billing",
            "shutdown:user",
            "shutdown:auth"
        ]
    );
}

#[tokio::test]
async fn disabled_billing_leaves_auth_and_user() {
    let journal = Journal::default();
    let mgr = manager(vec![
        descriptor(&journal, "billing", 200, &["auth", "user"], Behaviour::default())
            .enabled(false),
        descriptor(&journal, "user", 110, &["auth"], Behaviour::default()),
        descriptor(&journal, "auth", 100, &[], Behaviour::default()),
    ]);

    mgr.initialize_all().await.expect("initialize");
    assert_eq!(mgr.initialized_modules(), vec!["auth", "user"]);
    assert_eq!(journal_entries(&journal), vec!["init:auth", "init:user"]);
    assert_eq!(
        mgr.module_states().get("billing"),
        Some(&ModuleState::Skipped)
    );

    let report = mgr.shutdown_all().await;
    assert_eq!(report.stopped, vec!["user", "auth"]);
    assert!(
        !journal_entries(&journal)
            .iter()
            .any(|e| e.ends_with(":billing"))
    );
}

#[tokio::test]
async fn panicking_shutdown_does_not_skip_earlier_modules() {
    let journal = Journal::default();
    let mgr = manager(vec![
        descriptor(&journal, "auth", 100, &[], Behaviour::default()),
        descriptor(
            &journal,
            "user",
            110,
            &["auth"],
            Behaviour {
                panic_shutdown: true,
                ..Behaviour::default()
            },
        ),
    ]);
    mgr.initialize_all().await.expect("initialize");

    let report = mgr.shutdown_all().await;
    assert_eq!(report.stopped, vec!["auth"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "user");
    assert!(report.failed[0].1.contains("panic"));
    assert_eq!(
        journal_entries(&journal),
        vec!["init:auth", "init:user", "shutdown:user", "shutdown:auth"]
    );
    assert_eq!(mgr.module_states().get("auth"), Some(&ModuleState::ShutDown));
}

#[tokio::test]
async fn panicking_health_check_is_reported_as_error() {
    let journal = Journal::default();
    let mgr = manager(vec![
        descriptor(&journal, "auth", 100, &[], Behaviour::default()),
        descriptor(
            &journal,
            "ticketing",
            220,
            &["auth"],
            Behaviour {
                panic_health: true,
                ..Behaviour::default()
            },
        ),
    ]);
    mgr.initialize_all().await.expect("initialize");

    let report = mgr.health_check().await;
    assert!(!report.healthy);
    assert_eq!(report.modules["auth"].status, ModuleHealthStatus::Healthy);
    assert_eq!(report.modules["ticketing"].status, ModuleHealthStatus::Error);
    assert!(
        report.modules["ticketing"]
            .error
            .as_deref()
            .is_some_and(|e| e.contains("panic"))
    );
}

#[tokio::test]
async fn cycle_is_rejected_before_any_module_runs() {
    let journal = Journal::default();
    let mgr = manager(vec![
        descriptor(&journal, "a", 1, &["b"], Behaviour::default()),
        descriptor(&journal, "b", 2, &["c"], Behaviour::default()),
        descriptor(&journal, "c", 3, &["a"], Behaviour::default()),
    ]);

    let err = mgr.initialize_all().await.expect_err("cycle");
    match err {
        LifecycleError::CircularDependency { cycle, .. } => {
            assert_eq!(cycle.first(), cycle.last());
            assert_eq!(cycle.len(), 4);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(journal_entries(&journal).is_empty());
    assert!(mgr.initialized_modules().is_empty());
}

#[tokio::test]
async fn failing_module_stops_initialization() {
    let journal = Journal::default();
    let mgr = manager(vec![
        descriptor(&journal, "auth", 100, &[], Behaviour::default()),
        descriptor(
            &journal,
            "user",
            110,
            &["auth"],
            Behaviour {
                fail_init: true,
                ..Behaviour::default()
            },
        ),
        descriptor(&journal, "billing", 200, &["user"], Behaviour::default()),
    ]);

    let err = mgr.initialize_all().await.expect_err("user fails");
    assert!(matches!(
        err,
        LifecycleError::InitializationFailed { ref module, .. } if module == "user"
    ));
    assert_eq!(journal_entries(&journal), vec!["init:auth", "init:user"]);
    assert_eq!(mgr.initialized_modules(), vec!["auth"]);

    let states = mgr.module_states();
    assert_eq!(states.get("user"), Some(&ModuleState::Failed));
    assert_eq!(states.get("billing"), Some(&ModuleState::Registered));

    // 失败后仍可关停已初始化的部分
    let report = mgr.shutdown_all().await;
    assert_eq!(report.stopped, vec!["auth"]);
}

#[tokio::test]
async fn shutdown_continues_past_failures() {
    let journal = Journal::default();
    let mgr = manager(vec![
        descriptor(&journal, "auth", 100, &[], Behaviour::default()),
        descriptor(
            &journal,
            "user",
            110,
            &["auth"],
            Behaviour {
                fail_shutdown: true,
                ..Behaviour::default()
            },
        ),
        descriptor(&journal, "billing", 200, &["user"], Behaviour::default()),
    ]);
    mgr.initialize_all().await.expect("initialize");

    let report = mgr.shutdown_all().await;
    assert!(!report.is_clean());
    assert_eq!(report.stopped, vec!["billing", "auth"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "user");
    assert!(mgr.initialized_modules().is_empty());
}

#[tokio::test]
async fn second_initialize_is_rejected() {
    let journal = Journal::default();
    let mgr = manager(vec![descriptor(
        &journal,
        "auth",
        100,
        &[],
        Behaviour::default(),
    )]);
    mgr.initialize_all().await.expect("first");
    let err = mgr.initialize_all().await.expect_err("second");
    assert!(matches!(err, LifecycleError::AlreadyStarted));
    assert_eq!(journal_entries(&journal), vec!["init:auth"]);
}

#[tokio::test]
async fn health_report_covers_disabled_and_unhealthy_modules() {
    let journal = Journal::default();
    let mgr = manager(vec![
        descriptor(&journal, "auth", 100, &[], Behaviour::default()),
        descriptor(
            &journal,
            "analytics",
            300,
            &["auth"],
            Behaviour {
                unhealthy: true,
                ..Behaviour::default()
            },
        ),
        descriptor(&journal, "email_marketing", 310, &["auth"], Behaviour::default())
            .enabled(false),
    ]);
    mgr.initialize_all().await.expect("initialize");

    let report = mgr.health_check().await;
    assert!(!report.healthy);
    assert_eq!(report.modules["auth"].status, ModuleHealthStatus::Healthy);
    assert_eq!(
        report.modules["analytics"].status,
        ModuleHealthStatus::Unhealthy
    );
    assert_eq!(
        report.modules["email_marketing"].status,
        ModuleHealthStatus::Disabled
    );
}

fn noop(name: &str, priority: i32, deps: Vec<String>) -> ModuleDescriptor {
    let journal = Journal::default();
    let module = Recorder {
        name: name.to_string(),
        journal,
        behaviour: Behaviour::default(),
    };
    ModuleDescriptor::new(name, Arc::new(module))
        .priority(priority)
        .depends_on(deps)
}

/// 随机 DAG：每个模块只依赖编号更小的模块
fn dag() -> impl Strategy<Value = Vec<(i32, Vec<usize>)>> {
    (1usize..10).prop_flat_map(|n| {
        (0..n)
            .map(|i| {
                (
                    -50i32..50,
                    proptest::collection::vec(0..i.max(1), 0..=i.min(3)),
                )
            })
            .collect::<Vec<_>>()
    })
}

fn build(shape: &[(i32, Vec<usize>)]) -> Vec<ModuleDescriptor> {
    shape.iter()
        .enumerate()
        .map(|(i, (priority, deps))| {
            let deps = deps
                .iter()
                .filter(|d| **d < i)
                .map(|d| format!("m{d}"))
                .collect();
            noop(&format!("m{i}"), *priority, deps)
        })
        .collect()
}

proptest! {
    #[test]
    fn dependencies_always_come_first(shape in dag()) {
        let descriptors = build(&shape);
        let order = resolve_order(&descriptors, DependencyPolicy::Strict).expect("acyclic");
        prop_assert_eq!(order.len(), descriptors.len());
        for d in &descriptors {
            let pos = order.iter().position(|n| *n == d.name).expect("present");
            for dep in &d.dependencies {
                let dep_pos = order.iter().position(|n| n == dep).expect("dep present");
                prop_assert!(dep_pos < pos, "{} must precede {}", dep, d.name);
            }
        }
    }

    #[test]
    fn resolution_is_deterministic(shape in dag()) {
        let first = resolve_order(&build(&shape), DependencyPolicy::Strict).expect("acyclic");
        let second = resolve_order(&build(&shape), DependencyPolicy::Strict).expect("acyclic");
        prop_assert_eq!(first, second);
    }
}
