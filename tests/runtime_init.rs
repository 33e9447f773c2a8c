use confluence_agent::config::Config;
use confluence_agent::orchestrator::Orchestrator;
use std::sync::{Arc, Barrier};
use std::thread;

fn configured() -> Config {
    let mut config = Config::default();
    config.llm.base_url = Some("http://127.0.0.1:1".to_string());
    config.llm.api_key = Some("test-key".to_string());
    config
}

// 并发首请求只允许一次构建，所有竞争者拿到同一个完整实例。
#[test]
fn concurrent_first_requests_build_exactly_one_runtime() {
    let orchestrator = Arc::new(Orchestrator::new(
        configured(),
        reqwest::Client::new(),
        None,
    ));
    let threads = 16;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let orchestrator = orchestrator.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                orchestrator.ensure_runtime().unwrap()
            })
        })
        .collect();

    let runtimes: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();
    assert_eq!(orchestrator.runtime_construction_count(), 1);
    for runtime in &runtimes[1..] {
        assert!(Arc::ptr_eq(&runtimes[0], runtime));
    }
}

#[test]
fn later_requests_reuse_the_ready_runtime() {
    let orchestrator = Orchestrator::new(configured(), reqwest::Client::new(), None);
    let first = orchestrator.ensure_runtime().unwrap();
    let second = orchestrator.ensure_runtime().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(orchestrator.runtime_construction_count(), 1);
}
