// End-to-end tests of the jobfarm command surface against a temporary home
// directory: admin commands, the worker protocol, and the long poll.

use std::collections::HashSet;
use std::time::Duration;

use jobfarm_core::{Config, JobId, Origin, PollPolicy};
use jobfarm_server::{run, Command, DispatchError, Dispatcher, ErrorKind};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn config(tmp: &TempDir, max_wait: Duration) -> Config {
    let mut config = Config::with_home(tmp.path());
    config.poll = PollPolicy {
        interval: Duration::from_millis(20),
        max_wait: Some(max_wait),
    };
    config
}

fn install_bundle(config: &Config, type_name: &str, bytes: &[u8]) {
    std::fs::create_dir_all(config.bundles_dir()).unwrap();
    std::fs::write(config.bundles_dir().join(format!("{type_name}.tar.gz")), bytes).unwrap();
}

fn worker(name: &str) -> Origin {
    Origin::new(name).unwrap()
}

async fn client(
    config: &Config,
    origin: &str,
    request: Option<&str>,
    stdin: &[u8],
) -> (Result<(), DispatchError>, String) {
    let mut input = stdin;
    let mut output = Vec::new();
    let result = run(
        Command::ClientCommand {
            origin: origin.to_string(),
        },
        config,
        request.map(str::to_string),
        &mut input,
        &mut output,
    )
    .await;
    (result, String::from_utf8(output).unwrap())
}

async fn admin(config: &Config, command: Command) -> (Result<(), DispatchError>, String) {
    let mut input: &[u8] = b"";
    let mut output = Vec::new();
    let result = run(command, config, None, &mut input, &mut output).await;
    (result, String::from_utf8(output).unwrap())
}

// ---------------------------------------------------------------------------
// Full round trip
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_queue_request_report_round_trip() {
    let tmp = TempDir::new().unwrap();
    let config = config(&tmp, Duration::from_secs(1));
    install_bundle(&config, "build", b"BUNDLE");

    let (result, out) = admin(&config, Command::AddJobType { name: "build".into() }).await;
    result.unwrap();
    assert_eq!(out, "Created job type build\n");

    let (result, out) = admin(
        &config,
        Command::QueueJob {
            type_name: "build".into(),
            data: "hello".into(),
        },
    )
    .await;
    result.unwrap();
    assert_eq!(out, "Queued job 1\n");

    let (result, script) = client(&config, "w1", Some("request-work"), b"").await;
    result.unwrap();
    assert_eq!(
        script,
        "#!/bin/sh\n\
         set -e\n\
         base64 -d <<'__JOBFARM_BUNDLE__' | tar -xzf -\n\
         QlVORExF\n\
         __JOBFARM_BUNDLE__\n\
         base64 -d > data <<'__JOBFARM_DATA__'\n\
         aGVsbG8=\n\
         __JOBFARM_DATA__\n\
         echo 1 > id\n\
         ./exec\n"
    );

    let (result, out) = client(&config, "w1", Some("report-work 1"), b"RESULTBYTES").await;
    result.unwrap();
    assert_eq!(out, "");
    assert_eq!(
        std::fs::read(config.reports_dir().join("1")).unwrap(),
        b"RESULTBYTES"
    );

    let (_, listing) = admin(&config, Command::ListJobs).await;
    assert_eq!(listing, "");

    let (result, _) = client(&config, "w1", Some("report-work 1"), b"AGAIN").await;
    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.user_message(), "Job 1 does not exist");
    assert_eq!(
        std::fs::read(config.reports_dir().join("1")).unwrap(),
        b"RESULTBYTES"
    );

    let audit = std::fs::read_to_string(config.audit_log_path()).unwrap();
    let events: Vec<&str> = audit
        .lines()
        .map(|line| line.split_once(": ").unwrap().1)
        .collect();
    assert_eq!(
        events,
        vec![
            "create job type \"build\"",
            "queue job 1 of type \"build\"",
            "job 1 is assigned to w1",
            "job 1 has finished successfully and is deleted",
        ]
    );
}

#[tokio::test]
async fn test_two_workers_receive_jobs_in_queue_order() {
    let tmp = TempDir::new().unwrap();
    let config = config(&tmp, Duration::from_secs(1));
    install_bundle(&config, "T1", b"one");
    install_bundle(&config, "T2", b"two");

    let dispatcher = Dispatcher::open(&config).await.unwrap();
    dispatcher.add_job_type("T1").await.unwrap();
    dispatcher.add_job_type("T2").await.unwrap();
    let first = dispatcher.queue_job("T1", "a").await.unwrap();
    let second = dispatcher.queue_job("T2", "b").await.unwrap();

    let mut out_a = Vec::new();
    let mut out_b = Vec::new();
    let (worker_a, worker_b) = (worker("a"), worker("b"));
    let (got_a, got_b) = tokio::join!(
        dispatcher.request_work(&worker_a, &mut out_a),
        dispatcher.request_work(&worker_b, &mut out_b),
    );
    let (got_a, got_b) = (got_a.unwrap(), got_b.unwrap());

    let got: HashSet<JobId> = [got_a, got_b].into_iter().collect();
    assert_eq!(got, HashSet::from([first.id, second.id]));
    assert!(String::from_utf8(out_a).unwrap().contains(&format!("echo {got_a} > id")));
    assert!(String::from_utf8(out_b).unwrap().contains(&format!("echo {got_b} > id")));
}

#[tokio::test]
async fn test_overlapping_reports_keep_the_first_accepted() {
    let tmp = TempDir::new().unwrap();
    let config = config(&tmp, Duration::from_secs(1));
    install_bundle(&config, "build", b"BUNDLE");

    let dispatcher = Dispatcher::open(&config).await.unwrap();
    dispatcher.add_job_type("build").await.unwrap();
    let job = dispatcher.queue_job("build", "x").await.unwrap();
    let mut script = Vec::new();
    dispatcher.request_work(&worker("w1"), &mut script).await.unwrap();

    // The slow report starts first but its body arrives after the fast one
    // has already finished the job.
    let (mut writer, mut slow_input) = tokio::io::duplex(64);
    let slow_worker = worker("w1");
    let (slow, fast, ()) = tokio::join!(
        dispatcher.report_work(&slow_worker, job.id, &mut slow_input),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let mut input: &[u8] = b"RESULTBYTES";
            dispatcher.report_work(&worker("w1"), job.id, &mut input).await
        },
        async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            writer.write_all(b"LATE-DUPLICATE").await.unwrap();
            drop(writer);
        },
    );

    assert_eq!(fast.unwrap(), 11);
    let err = slow.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.user_message(), format!("Job {} does not exist", job.id));

    assert_eq!(
        std::fs::read(config.reports_dir().join(job.id.to_string())).unwrap(),
        b"RESULTBYTES"
    );
    let stored: Vec<_> = std::fs::read_dir(config.reports_dir())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert_eq!(stored, vec![std::ffi::OsString::from(job.id.to_string())]);
    assert!(dispatcher.database().find_job(job.id).await.unwrap().is_none());
}

// ---------------------------------------------------------------------------
// Worker failure paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_missing_bundle_leaves_job_leased() {
    let tmp = TempDir::new().unwrap();
    let config = config(&tmp, Duration::from_secs(1));

    let dispatcher = Dispatcher::open(&config).await.unwrap();
    dispatcher.add_job_type("build").await.unwrap();
    let job = dispatcher.queue_job("build", "x").await.unwrap();

    let mut out = Vec::new();
    let err = dispatcher
        .request_work(&worker("w1"), &mut out)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert_eq!(err.user_message(), "internal server error");
    assert!(out.is_empty());

    let stored = dispatcher.database().find_job(job.id).await.unwrap().unwrap();
    assert!(stored.is_leased_by(&worker("w1")));
}

#[tokio::test]
async fn test_give_back_only_by_lease_holder() {
    let tmp = TempDir::new().unwrap();
    let config = config(&tmp, Duration::from_secs(1));
    install_bundle(&config, "build", b"B");

    let dispatcher = Dispatcher::open(&config).await.unwrap();
    dispatcher.add_job_type("build").await.unwrap();
    let job = dispatcher.queue_job("build", "x").await.unwrap();
    let mut sink = Vec::new();
    dispatcher.request_work(&worker("w1"), &mut sink).await.unwrap();

    let request = format!("give-back-work {}", job.id);
    let (result, _) = client(&config, "w2", Some(request.as_str()), b"").await;
    assert_eq!(result.unwrap_err().kind(), ErrorKind::Validation);

    let (result, _) = client(&config, "w1", Some(request.as_str()), b"").await;
    result.unwrap();

    let mut out = Vec::new();
    let again = dispatcher.request_work(&worker("w2"), &mut out).await.unwrap();
    assert_eq!(again, job.id);
}

#[tokio::test]
async fn test_bad_worker_requests() {
    let tmp = TempDir::new().unwrap();
    let config = config(&tmp, Duration::from_millis(50));

    let (result, out) = client(&config, "w1", Some("fly-away"), b"").await;
    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.user_message(), "Command unknown: fly-away");
    assert_eq!(out, "");

    // A failed request-work leaves stdout empty so the worker's shell runs nothing.
    let (result, out) = client(&config, "w1", Some("request-work"), b"").await;
    assert_eq!(result.unwrap_err().kind(), ErrorKind::NoWorkAvailable);
    assert_eq!(out, "");

    let (result, _) = client(&config, "w1", Some("report-work"), b"").await;
    assert_eq!(result.unwrap_err().kind(), ErrorKind::Validation);

    let (result, _) = client(&config, "w1", Some("report-work abc"), b"").await;
    assert_eq!(result.unwrap_err().kind(), ErrorKind::Validation);

    let (result, _) = client(&config, "w1", Some("give-back-work 99"), b"").await;
    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.user_message(), "Job 99 does not exist");
}

#[tokio::test]
async fn test_misconfigured_forced_command_touches_nothing() {
    let tmp = TempDir::new().unwrap();
    let config = config(&tmp, Duration::from_millis(50));

    let (result, _) = client(&config, "  ", Some("request-work"), b"").await;
    assert!(matches!(result, Err(DispatchError::EmptyOrigin)));

    let (result, _) = client(&config, "w1", None, b"").await;
    let err = result.unwrap_err();
    assert!(matches!(err, DispatchError::MissingOriginalCommand));
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let (result, _) = client(&config, "w1", Some(""), b"").await;
    assert_eq!(
        result.unwrap_err().user_message(),
        "Please provide a client command"
    );

    assert!(!config.db_path().exists());
    assert!(!config.audit_log_path().exists());
}

// ---------------------------------------------------------------------------
// Long poll
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_long_poll_returns_job_queued_while_waiting() {
    let tmp = TempDir::new().unwrap();
    let config = config(&tmp, Duration::from_secs(10));
    install_bundle(&config, "build", b"B");

    let dispatcher = Dispatcher::open(&config).await.unwrap();
    dispatcher.add_job_type("build").await.unwrap();

    let producer = dispatcher.clone();
    let queued = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        producer.queue_job("build", "late").await.unwrap()
    });

    let mut out = Vec::new();
    let got = dispatcher.request_work(&worker("w1"), &mut out).await.unwrap();
    let queued = queued.await.unwrap();
    assert_eq!(got, queued.id);
}

#[tokio::test]
async fn test_long_poll_gives_up_after_max_wait() {
    let tmp = TempDir::new().unwrap();
    let config = config(&tmp, Duration::from_millis(100));

    let dispatcher = Dispatcher::open(&config).await.unwrap();
    let started = std::time::Instant::now();
    let mut out = Vec::new();
    let err = dispatcher
        .request_work(&worker("w1"), &mut out)
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::NoWorkAvailable));
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(out.is_empty());
}

// ---------------------------------------------------------------------------
// Admin commands
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_admin_validation() {
    let tmp = TempDir::new().unwrap();
    let config = config(&tmp, Duration::from_millis(50));

    let (result, _) = admin(&config, Command::AddJobType { name: "../etc".into() }).await;
    assert!(matches!(result, Err(DispatchError::InvalidTypeName(_))));

    admin(&config, Command::AddJobType { name: "build".into() })
        .await
        .0
        .unwrap();
    let (result, _) = admin(&config, Command::AddJobType { name: "build".into() }).await;
    assert_eq!(result.unwrap_err().kind(), ErrorKind::Validation);

    let (result, _) = admin(
        &config,
        Command::QueueJob {
            type_name: "render".into(),
            data: "x".into(),
        },
    )
    .await;
    assert_eq!(
        result.unwrap_err().user_message(),
        "Job type \"render\" does not exist"
    );
}

#[tokio::test]
async fn test_remove_job_type_and_list() {
    let tmp = TempDir::new().unwrap();
    let config = config(&tmp, Duration::from_millis(50));

    let dispatcher = Dispatcher::open(&config).await.unwrap();
    dispatcher.add_job_type("build").await.unwrap();
    dispatcher.add_job_type("render").await.unwrap();
    dispatcher.queue_job("build", "a").await.unwrap();
    dispatcher.queue_job("build", "b").await.unwrap();
    let kept = dispatcher.queue_job("render", "c").await.unwrap();

    let (result, out) = admin(&config, Command::RemoveJobType { name: "build".into() }).await;
    result.unwrap();
    assert_eq!(out, "Removed job type build and 2 queued job(s)\n");

    let (result, listing) = admin(&config, Command::ListJobs).await;
    result.unwrap();
    let lines: Vec<&str> = listing.lines().collect();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with(&format!("{}\trender\t", kept.id)));
    assert!(lines[0].ends_with("\t-\t-"));

    let (result, _) = admin(&config, Command::RemoveJobType { name: "build".into() }).await;
    assert_eq!(result.unwrap_err().kind(), ErrorKind::Validation);
    assert_eq!(kept.id, JobId(3));
}
