use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use job_dispatcher::dispatcher::{
    load_jobs, CommitHandler, Dispatcher, Job, JsonLinesCommitHandler, QueueKind,
};
use job_dispatcher::error::DispatchError;

fn job_with(id: u64, key: &str, value: &str) -> Job {
    let mut job = Job::new(id);
    job.put(key, value);
    job
}

async fn dispatcher_with(ids: &[u64]) -> Dispatcher {
    let dispatcher = Dispatcher::default();
    for &id in ids {
        dispatcher.enqueue(Job::new(id)).await.unwrap();
    }
    dispatcher
}

#[tokio::test]
async fn test_dequeue_commit_and_snapshots() {
    let dispatcher = dispatcher_with(&[1, 2, 3]).await;

    assert_eq!(dispatcher.dequeue().await.unwrap().id(), 1);
    assert_eq!(dispatcher.dequeue().await.unwrap().id(), 2);
    dispatcher
        .commit(&job_with(2, "result", "42"))
        .await
        .unwrap();

    let job = dispatcher.get_job(2).await.unwrap();
    assert_eq!(job.get("result"), Some("42"));
    assert!(job.committed_at().is_some());
    assert_eq!(dispatcher.snapshot(QueueKind::Running).await, vec![1]);
    assert_eq!(dispatcher.snapshot(QueueKind::Committed).await, vec![2]);
    assert_eq!(dispatcher.snapshot(QueueKind::Waiting).await, vec![3]);
}

#[tokio::test]
async fn test_dequeue_empty_is_not_an_error() {
    let dispatcher = Dispatcher::default();
    assert!(dispatcher.dequeue().await.is_none());
}

#[tokio::test]
async fn test_commit_never_enqueued() {
    let dispatcher = Dispatcher::default();
    let err = dispatcher.commit(&Job::new(7)).await.unwrap_err();
    assert_eq!(err, DispatchError::UnknownOrNotRunningJob(7));
}

#[tokio::test]
async fn test_enqueue_duplicate() {
    let dispatcher = dispatcher_with(&[1]).await;
    let err = dispatcher.enqueue(Job::new(1)).await.unwrap_err();
    assert_eq!(err, DispatchError::DuplicateJobId(1));
    assert_eq!(dispatcher.counts().await.waiting, 1);
}

#[tokio::test]
async fn test_double_commit_rejected_once() {
    let dispatcher = dispatcher_with(&[1]).await;
    dispatcher.dequeue().await.unwrap();

    dispatcher.commit(&job_with(1, "r", "a")).await.unwrap();
    let after_first = dispatcher.overview().await;
    let err = dispatcher.commit(&job_with(1, "r", "b")).await.unwrap_err();
    let after_second = dispatcher.overview().await;

    assert_eq!(err, DispatchError::UnknownOrNotRunningJob(1));
    assert_eq!(after_first.counts(), after_second.counts());
    assert_eq!(
        after_second.committed[0].fields(),
        after_first.committed[0].fields()
    );
    assert_eq!(
        after_second.committed[0].committed_at(),
        after_first.committed[0].committed_at()
    );
}

#[tokio::test]
async fn test_submit_allocates_free_ids() {
    let dispatcher = Dispatcher::default();
    // a producer-chosen id that the counter would hand out
    dispatcher.enqueue(Job::new(1)).await.unwrap();

    let mut fields = BTreeMap::new();
    fields.insert("command".to_string(), "true".to_string());
    let a = dispatcher.submit(fields.clone()).await;
    let b = dispatcher.submit(fields).await;

    assert_eq!(a, 0);
    assert_eq!(b, 2);
    assert_eq!(dispatcher.snapshot(QueueKind::Waiting).await, vec![1, 0, 2]);
    assert_eq!(
        dispatcher.get_job(2).await.unwrap().get("command"),
        Some("true")
    );
}

#[tokio::test]
async fn test_get_job_unknown() {
    let dispatcher = Dispatcher::default();
    assert!(dispatcher.get_job(1).await.is_none());
}

#[tokio::test]
async fn test_overview_lists_jobs_per_queue() {
    let dispatcher = dispatcher_with(&[1, 2, 3]).await;
    dispatcher.dequeue().await.unwrap();
    dispatcher.dequeue().await.unwrap();
    dispatcher.commit(&Job::new(1)).await.unwrap();

    let overview = dispatcher.overview().await;
    let ids = |jobs: &[Job]| jobs.iter().map(Job::id).collect::<Vec<_>>();
    assert_eq!(ids(&overview.waiting), vec![3]);
    assert_eq!(ids(&overview.running), vec![2]);
    assert_eq!(ids(&overview.committed), vec![1]);
}

// ---------------------------------------------------------------------------
// Jobs file
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_load_jobs() {
    let dispatcher = Dispatcher::default();
    let json = r#"[{"id": 3, "command": "echo a"}, {"id": 1}, {"id": 2, "x": "y"}]"#;

    let loaded = load_jobs(&dispatcher, json).await.unwrap();

    assert_eq!(loaded, 3);
    assert_eq!(dispatcher.snapshot(QueueKind::Waiting).await, vec![3, 1, 2]);
    assert_eq!(
        dispatcher.get_job(3).await.unwrap().get("command"),
        Some("echo a")
    );
}

#[tokio::test]
async fn test_load_jobs_skips_duplicates() {
    let dispatcher = dispatcher_with(&[5]).await;
    let json = r#"[{"id": 1, "v": "first"}, {"id": 1, "v": "second"}, {"id": 5}, {"id": 2}]"#;

    let loaded = load_jobs(&dispatcher, json).await.unwrap();

    assert_eq!(loaded, 2);
    assert_eq!(dispatcher.snapshot(QueueKind::Waiting).await, vec![5, 1, 2]);
    assert_eq!(dispatcher.get_job(1).await.unwrap().get("v"), Some("first"));
}

#[tokio::test]
async fn test_load_jobs_malformed_file() {
    let dispatcher = Dispatcher::default();

    for json in ["", "{\"id\": 1}", "[{\"id\": 1}, {\"name\": \"no id\"}]", "[1, 2]"] {
        let err = load_jobs(&dispatcher, json).await.unwrap_err();
        assert!(matches!(err, DispatchError::MalformedPayload(_)), "accepted {json:?}");
    }
    assert_eq!(dispatcher.counts().await.total(), 0);
}

#[tokio::test]
async fn test_enqueue_all_counts_enqueued() {
    let dispatcher = dispatcher_with(&[2]).await;

    let enqueued = dispatcher
        .enqueue_all((1..=4).map(Job::new))
        .await;

    assert_eq!(enqueued, 3);
    assert_eq!(dispatcher.snapshot(QueueKind::Waiting).await, vec![2, 1, 3, 4]);
}

// ---------------------------------------------------------------------------
// Commit handler
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_commit_handler_sees_merged_job() {
    let seen: Arc<Mutex<Vec<Job>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let dispatcher = Dispatcher::new(move |job: &Job| -> Result<(), String> {
        sink.lock().unwrap().push(job.clone());
        Ok(())
    });
    dispatcher
        .enqueue(job_with(1, "input", "x"))
        .await
        .unwrap();
    dispatcher.dequeue().await.unwrap();

    dispatcher
        .commit(&job_with(1, "result", "y"))
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].get("input"), Some("x"));
    assert_eq!(seen[0].get("result"), Some("y"));
    assert!(seen[0].committed_at().is_some());
}

#[tokio::test]
async fn test_commit_handler_not_called_on_rejection() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let dispatcher = Dispatcher::new(move |_: &Job| -> Result<(), String> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    dispatcher.enqueue(Job::new(1)).await.unwrap();

    assert!(dispatcher.commit(&Job::new(1)).await.is_err());
    assert!(dispatcher.commit(&Job::new(2)).await.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_commit_handler_failure_keeps_commit() {
    let dispatcher =
        Dispatcher::new(|_: &Job| -> Result<(), String> { Err("disk full".to_string()) });
    dispatcher.enqueue(Job::new(1)).await.unwrap();
    dispatcher.dequeue().await.unwrap();

    let err = dispatcher
        .commit(&job_with(1, "result", "ok"))
        .await
        .unwrap_err();

    assert!(err.is_committed());
    assert!(matches!(
        err,
        DispatchError::CallbackFailure { job_id: 1, ref message } if message.contains("disk full")
    ));
    assert_eq!(dispatcher.snapshot(QueueKind::Committed).await, vec![1]);
    assert!(dispatcher.snapshot(QueueKind::Running).await.is_empty());
    assert_eq!(
        dispatcher.get_job(1).await.unwrap().get("result"),
        Some("ok")
    );

    // the job is committed, so a retry is a protocol error
    let retry = dispatcher.commit(&Job::new(1)).await.unwrap_err();
    assert_eq!(retry, DispatchError::UnknownOrNotRunningJob(1));
}

#[tokio::test]
async fn test_json_lines_commit_handler() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results.jsonl");
    let handler = JsonLinesCommitHandler::open(&path).unwrap();

    handler.job_committed(&job_with(1, "result", "a")).unwrap();
    handler.job_committed(&job_with(2, "result", "b")).unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    let jobs: Vec<Job> = content
        .lines()
        .map(|line| Job::from_json(line).unwrap())
        .collect();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].id(), 1);
    assert_eq!(jobs[1].get("result"), Some("b"));
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_dequeue_hands_out_each_job_once() {
    let dispatcher = Arc::new(Dispatcher::default());
    for id in 0..100 {
        dispatcher.enqueue(Job::new(id)).await.unwrap();
    }

    let handles: Vec<_> = (0..100)
        .map(|_| {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.dequeue().await })
        })
        .collect();

    let mut ids = HashSet::new();
    for handle in handles {
        let job = handle.await.unwrap().expect("every caller gets a job");
        assert!(ids.insert(job.id()), "job {} handed out twice", job.id());
    }

    assert_eq!(ids.len(), 100);
    assert!(dispatcher.snapshot(QueueKind::Waiting).await.is_empty());
    assert_eq!(dispatcher.snapshot(QueueKind::Running).await.len(), 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_more_dequeues_than_jobs() {
    let dispatcher = Arc::new(Dispatcher::default());
    for id in 0..50 {
        dispatcher.enqueue(Job::new(id)).await.unwrap();
    }

    let handles: Vec<_> = (0..200)
        .map(|_| {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.dequeue().await })
        })
        .collect();

    let mut ids = HashSet::new();
    let mut empty = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Some(job) => assert!(ids.insert(job.id())),
            None => empty += 1,
        }
    }

    assert_eq!(ids, (0..50).collect::<HashSet<_>>());
    assert_eq!(empty, 150);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_enqueue_keeps_per_producer_order() {
    let dispatcher = Arc::new(Dispatcher::default());
    let producers = 8u64;
    let per_producer = 50u64;

    let handles: Vec<_> = (0..producers)
        .map(|p| {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                for i in 0..per_producer {
                    dispatcher.enqueue(Job::new(p * 1000 + i)).await.unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let waiting = dispatcher.snapshot(QueueKind::Waiting).await;
    assert_eq!(waiting.len() as u64, producers * per_producer);
    for p in 0..producers {
        let mine: Vec<u64> = waiting
            .iter()
            .copied()
            .filter(|id| id / 1000 == p)
            .collect();
        let expected: Vec<u64> = (0..per_producer).map(|i| p * 1000 + i).collect();
        assert_eq!(mine, expected);
    }
    for id in waiting {
        assert!(dispatcher.get_job(id).await.is_some());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_commits_of_same_job() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let dispatcher = Arc::new(Dispatcher::new(move |_: &Job| -> Result<(), String> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }));
    dispatcher.enqueue(Job::new(1)).await.unwrap();
    dispatcher.dequeue().await.unwrap();

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .commit(&job_with(1, "by", &i.to_string()))
                    .await
                    .is_ok()
            })
        })
        .collect();

    let mut successes = 0;
    for handle in handles {
        if handle.await.unwrap() {
            successes += 1;
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(dispatcher.snapshot(QueueKind::Committed).await, vec![1]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_full_lifecycle_under_contention() {
    let dispatcher = Arc::new(Dispatcher::default());
    for id in 0..200 {
        dispatcher.enqueue(Job::new(id)).await.unwrap();
    }

    let handles: Vec<_> = (0..10)
        .map(|w| {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                let mut done = 0;
                while let Some(job) = dispatcher.dequeue().await {
                    let result = job_with(job.id(), "worker", &w.to_string());
                    dispatcher.commit(&result).await.unwrap();
                    done += 1;
                }
                done
            })
        })
        .collect();

    let mut total = 0;
    for handle in handles {
        total += handle.await.unwrap();
    }

    assert_eq!(total, 200);
    let counts = dispatcher.counts().await;
    assert_eq!((counts.waiting, counts.running, counts.committed), (0, 0, 200));
    let committed: HashSet<u64> = dispatcher
        .snapshot(QueueKind::Committed)
        .await
        .into_iter()
        .collect();
    assert_eq!(committed, (0..200).collect::<HashSet<_>>());
}
