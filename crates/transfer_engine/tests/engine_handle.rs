use std::io::Write;
use std::time::{Duration, Instant};

use serde_json::json;
use transfer_engine::{
    EngineEvent, EngineHandle, FailureKind, JobStart, PackContext, TransferError,
    TransferSettings, UploadEvent, UploadRequest, UploadStage,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn collect_until<F>(engine: &EngineHandle, mut done: F) -> Vec<EngineEvent>
where
    F: FnMut(&EngineEvent) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut events = Vec::new();
    while Instant::now() < deadline {
        match engine.try_recv() {
            Some(event) => {
                let finished = done(&event);
                events.push(event);
                if finished {
                    return events;
                }
            }
            None => tokio::time::sleep(Duration::from_millis(10)).await,
        }
    }
    panic!("engine did not finish in time; saw {events:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn upload_runs_on_engine_thread_and_reports_back() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/upload/chunk"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"fileId": "f-1"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/upload/validate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/database/levels/4/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "level": {"id": 4, "dlLink": "https://cdn.example/f-1"}
        })))
        .mount(&server)
        .await;

    let mut file = tempfile::Builder::new().suffix(".zip").tempfile().unwrap();
    file.write_all(&[9u8; 300]).unwrap();
    file.flush().unwrap();

    let mut settings = TransferSettings::for_api(server.uri().parse().unwrap());
    settings.chunk_size = 128;
    let engine = EngineHandle::new(&settings).unwrap();
    engine.start_upload(
        1,
        7,
        UploadRequest {
            level_id: 4,
            path: file.path().to_path_buf(),
            file_name: Some("level.zip".into()),
        },
    );

    let events = collect_until(&engine, |event| {
        matches!(event, EngineEvent::UploadFinished { .. })
    })
    .await;

    let upload_events: Vec<&UploadEvent> = events
        .iter()
        .filter_map(|event| match event {
            EngineEvent::Upload {
                popup: 1,
                session: 7,
                event,
            } => Some(event),
            _ => None,
        })
        .collect();
    assert_eq!(upload_events.first(), Some(&&UploadEvent::Stage(UploadStage::Sending)));
    assert!(upload_events.contains(&&UploadEvent::Stage(UploadStage::Committing)));
    let percents: Vec<u8> = upload_events
        .iter()
        .filter_map(|event| match event {
            UploadEvent::Progress(progress) => Some(progress.percent),
            _ => None,
        })
        .collect();
    assert_eq!(percents, vec![42, 85, 100]);

    match events.last() {
        Some(EngineEvent::UploadFinished {
            popup: 1,
            session: 7,
            result: Ok(receipt),
        }) => assert_eq!(receipt.dl_link, "https://cdn.example/f-1"),
        other => panic!("unexpected final event {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn job_start_results_carry_their_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/database/levels/packs/p1/download-link"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"downloadId": "job-1"})))
        .mount(&server)
        .await;

    let settings = TransferSettings::for_api(server.uri().parse().unwrap());
    let engine = EngineHandle::new(&settings).unwrap();
    let context = PackContext {
        pack_id: "p1".into(),
        folder_id: None,
    };
    engine.start_job(2, 5, context.clone(), Some(u64::MAX), "proposed-5");
    engine.start_job(2, 6, context, Some(10), "proposed-6");

    let mut resolved = Vec::new();
    collect_until(&engine, |event| {
        if let EngineEvent::JobStartResolved {
            popup: 2,
            attempt,
            result,
        } = event
        {
            resolved.push((*attempt, result.clone()));
        }
        resolved.len() == 2
    })
    .await;
    resolved.sort_by_key(|(attempt, _)| *attempt);

    assert!(matches!(
        &resolved[0],
        (5, Err(TransferError::Failed(FailureKind::SizeExceeded { .. })))
    ));
    assert_eq!(
        resolved[1],
        (
            6,
            Ok(JobStart::Enqueued {
                job_id: "job-1".into()
            })
        )
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_reports_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/v2/database/levels/8/upload"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({"error": "Forbidden"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/database/levels/8/select-level"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .mount(&server)
        .await;

    let settings = TransferSettings::for_api(server.uri().parse().unwrap());
    let engine = EngineHandle::new(&settings).unwrap();
    engine.delete_upload(3, 8);
    engine.select_level(3, 8, "pack/hard.adofai");

    let events = collect_until(&engine, {
        let mut seen = 0;
        move |_| {
            seen += 1;
            seen == 2
        }
    })
    .await;

    assert!(events.contains(&EngineEvent::UploadDeleted {
        popup: 3,
        result: Err(TransferError::Failed(FailureKind::Commit("Forbidden".into()))),
    }));
    assert!(events.contains(&EngineEvent::TargetLevelSelected {
        popup: 3,
        result: Ok("pack/hard.adofai".into()),
    }));
}
