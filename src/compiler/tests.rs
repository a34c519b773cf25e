use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::fake::{FakeFactory, Script, css_reply};
use super::protocol::{RawError, RawPos, RenderMessage, WorkerReply};
use super::queue::CompileQueue;
use crate::config::{Compiler, OutputStyle, SourceComments, SourceMapTarget, TimeoutMs};

fn message(file: &str) -> RenderMessage {
    RenderMessage {
        file: PathBuf::from(file),
        out_file: PathBuf::from(file).with_extension("css"),
        include_paths: Vec::new(),
        image_paths: Vec::new(),
        output_style: OutputStyle::Nested,
        source_comments: SourceComments::Map,
        source_map: SourceMapTarget::Enabled(true),
        compiler: Compiler::Libsass,
        compass: None,
    }
}

#[tokio::test]
async fn test_success_parses_map() {
    let factory = FakeFactory::new(|_| Script::Reply(css_reply("a{}", &["main.scss"])));
    let queue = CompileQueue::spawn(factory.clone(), TimeoutMs::DEFAULT);

    let output = queue.submit(message("/p/main.scss")).await.unwrap();
    assert_eq!(output.css, "a{}");
    assert_eq!(output.map.sources, vec!["main.scss"]);
    assert!(output.warning.is_none());
    assert_eq!(factory.spawn_count(), 1);
}

#[tokio::test]
async fn test_compiler_error_keeps_worker() {
    let factory = FakeFactory::new(|msg| {
        if msg.file.ends_with("bad.scss") {
            Script::Reply(WorkerReply::Failure(RawError {
                path: msg.file.clone(),
                pos: Some(RawPos {
                    line: Some(2),
                    ch: 4,
                }),
                message: "invalid property".into(),
                ..Default::default()
            }))
        } else {
            Script::Reply(css_reply("", &[]))
        }
    });
    let queue = CompileQueue::spawn(factory.clone(), TimeoutMs::DEFAULT);

    let errors = queue.submit(message("/p/bad.scss")).await.unwrap_err();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].pos.line, Some(2));
    assert!(!errors[0].is_fatal());

    queue.submit(message("/p/good.scss")).await.unwrap();
    assert_eq!(factory.spawn_count(), 1);
}

#[tokio::test]
async fn test_timeout_then_recovery() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let factory = FakeFactory::new(move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Script::Hang
        } else {
            Script::Reply(css_reply("ok{}", &[]))
        }
    });
    let queue = CompileQueue::spawn(factory.clone(), TimeoutMs(50));

    let errors = queue.submit(message("/p/slow.scss")).await.unwrap_err();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].is_fatal());
    assert!(errors[0].message.contains("signal="));
    assert_eq!(errors[0].path, PathBuf::from("/p/slow.scss"));
    assert_eq!(errors[0].pos.line, None);

    let output = queue.submit(message("/p/slow.scss")).await.unwrap();
    assert_eq!(output.css, "ok{}");
    assert_eq!(factory.spawn_count(), 2);
}

#[tokio::test]
async fn test_crash_respawns_for_next_request() {
    let factory = FakeFactory::new(|msg| {
        if msg.file.ends_with("crash.scss") {
            Script::Crash
        } else {
            Script::Reply(css_reply("", &[]))
        }
    });
    let queue = CompileQueue::spawn(factory.clone(), TimeoutMs::DEFAULT);

    let errors = queue.submit(message("/p/crash.scss")).await.unwrap_err();
    assert_eq!(errors[0].message, "Fatal compiler error, signal=SIGSEGV");

    queue.submit(message("/p/next.scss")).await.unwrap();
    assert_eq!(factory.spawn_count(), 2);
}

#[tokio::test]
async fn test_fifo_order_one_in_flight() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));
    let (flight, max) = (Arc::clone(&in_flight), Arc::clone(&max_seen));
    let factory = FakeFactory::new(move |_| {
        let now = flight.fetch_add(1, Ordering::SeqCst) + 1;
        max.fetch_max(now, Ordering::SeqCst);
        flight.fetch_sub(1, Ordering::SeqCst);
        Script::Reply(css_reply("", &[]))
    });
    let queue = CompileQueue::spawn(factory.clone(), TimeoutMs::DEFAULT);

    let files = ["/p/a.scss", "/p/b.scss", "/p/c.scss", "/p/d.scss"];
    let handles: Vec<_> = files
        .iter()
        .map(|f| {
            let queue = queue.clone();
            let msg = message(f);
            tokio::spawn(async move { queue.submit(msg).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    assert_eq!(factory.seen_files().len(), files.len());
}

#[tokio::test]
async fn test_queued_requests_survive_timeout() {
    let factory = FakeFactory::new(|msg| {
        if msg.file.ends_with("hang.scss") {
            Script::Hang
        } else {
            Script::Reply(css_reply("done{}", &[]))
        }
    });
    let queue = CompileQueue::spawn(factory.clone(), TimeoutMs(50));

    let first = tokio::spawn({
        let queue = queue.clone();
        async move { queue.submit(message("/p/hang.scss")).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = queue.submit(message("/p/after.scss")).await;

    assert!(first.await.unwrap().is_err());
    assert_eq!(second.unwrap().css, "done{}");
    assert_eq!(
        factory.seen_files(),
        vec![PathBuf::from("/p/hang.scss"), PathBuf::from("/p/after.scss")]
    );
}

#[tokio::test]
async fn test_kill_process_fails_in_flight() {
    let factory = FakeFactory::new(|msg| {
        if msg.file.ends_with("hang.scss") {
            Script::Hang
        } else {
            Script::Reply(css_reply("", &[]))
        }
    });
    let queue = CompileQueue::spawn(factory.clone(), TimeoutMs(-1));

    let pending = tokio::spawn({
        let queue = queue.clone();
        async move { queue.submit(message("/p/hang.scss")).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    queue.kill_process().await;

    let errors = pending.await.unwrap().unwrap_err();
    assert!(errors[0].is_fatal());

    queue.submit(message("/p/ok.scss")).await.unwrap();
    assert_eq!(factory.spawn_count(), 2);
}

#[tokio::test]
async fn test_set_timeout_applies_to_next_request() {
    let factory = FakeFactory::new(|_| Script::Hang);
    let queue = CompileQueue::spawn(factory, TimeoutMs(-1));
    queue.set_timeout(TimeoutMs(30)).await;

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        queue.submit(message("/p/hang.scss")),
    )
    .await
    .expect("queue should time out the request itself");
    assert!(result.unwrap_err()[0].is_fatal());
}

#[tokio::test]
async fn test_malformed_map_is_fatal() {
    let factory = FakeFactory::new(|_| {
        Script::Reply(WorkerReply::Success {
            css: "a{}".into(),
            map: serde_json::Value::String("{not json".into()),
            warning: None,
        })
    });
    let queue = CompileQueue::spawn(factory, TimeoutMs::DEFAULT);
    let errors = queue.submit(message("/p/main.scss")).await.unwrap_err();
    assert!(errors[0].message.contains("malformed source map"));
}
