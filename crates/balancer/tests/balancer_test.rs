use coordinator_core::{
    BalancerConfig, TaskRequirements, WorkerMetrics, WorkerSnapshot, WorkerStatus,
};
use coordinator_balancer::LoadBalancer;

fn worker(id: &str, caps: &[&str], max: u32, load: u32) -> WorkerSnapshot {
    WorkerSnapshot {
        id: id.to_string(),
        capabilities: caps.iter().map(|c| c.to_string()).collect(),
        max_capacity: max,
        current_load: load,
        status: WorkerStatus::Idle,
        metrics: WorkerMetrics::default(),
    }
}

fn balancer(strategy: &str) -> LoadBalancer {
    LoadBalancer::new(BalancerConfig {
        strategy: strategy.to_string(),
        min_samples: 2,
        ..Default::default()
    })
    .unwrap()
}

#[tokio::test]
async fn least_loaded_picks_minimum_ratio_with_id_tie_break() {
    let balancer = balancer("least_loaded");
    let workers = [
        worker("w3", &[], 10, 2),
        worker("w1", &[], 10, 2),
        worker("w2", &[], 10, 5),
    ];
    let selected = balancer
        .select_worker(&TaskRequirements::default(), &workers)
        .await
        .unwrap();
    assert_eq!(selected, Some("w1".to_string()));
}

#[tokio::test]
async fn round_robin_cycles_the_eligible_set() {
    let balancer = balancer("round_robin");
    let workers = [worker("w1", &[], 10, 0), worker("w2", &[], 10, 0)];
    let task = TaskRequirements::default();

    let mut picks = Vec::new();
    for _ in 0..4 {
        picks.push(balancer.select_worker(&task, &workers).await.unwrap().unwrap());
    }
    assert_eq!(picks, vec!["w1", "w2", "w1", "w2"]);
}

#[tokio::test]
async fn capability_requirements_narrow_the_pool() {
    let balancer = balancer("capability_based");
    // Five workers, two with gpu; the task needs {ml, gpu}.
    let workers = [
        worker("w1", &["ml", "gpu"], 10, 6),
        worker("w2", &["ml"], 10, 0),
        worker("w3", &["ml", "gpu"], 10, 3),
        worker("w4", &["build"], 10, 0),
        worker("w5", &["ml"], 10, 1),
    ];
    let task = TaskRequirements {
        required_capabilities: vec!["ml".to_string(), "gpu".to_string()],
        priority: 9,
        ..Default::default()
    };

    let selected = balancer.select_worker(&task, &workers).await.unwrap();
    // Least loaded of the two gpu workers.
    assert_eq!(selected, Some("w3".to_string()));

    let scores = balancer.score_workers(&task, &workers);
    let scored: Vec<&str> = scores.iter().map(|s| s.worker_id.as_str()).collect();
    assert_eq!(scored.len(), 2);
    assert!(scored.contains(&"w1") && scored.contains(&"w3"));
}

#[tokio::test]
async fn no_eligible_worker_returns_none() {
    let balancer = balancer("least_loaded");
    let mut offline = worker("w1", &["gpu"], 10, 0);
    offline.status = WorkerStatus::Offline;
    let workers = [offline, worker("w2", &[], 10, 10)];

    let task = TaskRequirements {
        required_capabilities: vec!["gpu".to_string()],
        ..Default::default()
    };
    assert_eq!(
        balancer.select_worker(&task, &workers).await.unwrap(),
        None
    );
}

#[tokio::test]
async fn anti_affinity_is_a_hard_exclusion() {
    let balancer = balancer("least_loaded");
    let workers = [worker("w1", &[], 10, 0), worker("w2", &[], 10, 9)];
    let task = TaskRequirements {
        anti_affinity: vec!["w1".to_string()],
        ..Default::default()
    };
    assert_eq!(
        balancer.select_worker(&task, &workers).await.unwrap(),
        Some("w2".to_string())
    );
}

#[tokio::test]
async fn performance_strategy_prefers_the_reliable_worker() {
    let balancer = balancer("performance_based");
    let mut fast = worker("w1", &[], 10, 5);
    fast.metrics = WorkerMetrics {
        success_rate: 0.95,
        avg_duration_ms: 5_000.0,
        uptime_secs: 86_400,
        ..Default::default()
    };
    let mut flaky = worker("w2", &[], 10, 0);
    flaky.metrics = WorkerMetrics {
        success_rate: 0.4,
        avg_duration_ms: 45_000.0,
        uptime_secs: 600,
        ..Default::default()
    };

    // Load favors w2, but this strategy ignores capacity beyond eligibility.
    let selected = balancer
        .select_worker(&TaskRequirements::default(), &[fast, flaky])
        .await
        .unwrap();
    assert_eq!(selected, Some("w1".to_string()));
}

#[tokio::test]
async fn adaptive_learns_to_avoid_a_failing_worker() {
    let balancer = balancer("adaptive");
    let workers = [worker("w1", &[], 10, 2), worker("w2", &[], 10, 2)];
    let task = TaskRequirements {
        task_type: Some("build".to_string()),
        ..Default::default()
    };

    // Every build on w1 fails; outcomes feed the shared context.
    for _ in 0..10 {
        balancer.update_context("w1", Some("build"), false, 30_000);
        balancer.update_context("w2", Some("build"), true, 10_000);
    }

    let selected = balancer.select_worker(&task, &workers).await.unwrap();
    assert_eq!(selected, Some("w2".to_string()));
}

#[tokio::test]
async fn strategy_swap_keeps_the_learned_context() {
    let balancer = balancer("least_loaded");
    for _ in 0..5 {
        balancer.update_context("w1", Some("build"), false, 1_000);
    }

    balancer.set_strategy("adaptive").await.unwrap();
    assert_eq!(balancer.strategy_name().await, "adaptive");
    // History recorded under the previous strategy still applies.
    assert_eq!(
        balancer.context().success_rate("w1", Some("build")),
        Some(0.0)
    );

    assert!(balancer.set_strategy("random").await.is_err());
}

#[tokio::test]
async fn overload_detection_uses_the_configured_threshold() {
    let balancer = balancer("least_loaded");
    let workers = [
        worker("w1", &[], 10, 9),
        worker("w2", &[], 10, 8),
        worker("w3", &[], 10, 1),
    ];
    assert_eq!(balancer.detect_overload(&workers), vec!["w1".to_string()]);
}
