// Job intake against a mocked printer API
mod common;

use serde_json::{Value, json};
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use c3p_bridge::JobPipeline;
use c3p_bridge::messages::JobState;
use c3p_bridge::topics::Qos;
use common::{INSTANCE, RecordingPublisher, context, printer, test_config};

const PRINT_STATUS_TOPIC: &str = "c3p/print/status";
const RESPONSE_TOPIC: &str = "dev42/c3p/api/response";

fn pipeline(server: &MockServer) -> (JobPipeline, std::sync::Arc<RecordingPublisher>) {
    let config = test_config(&server.uri());
    let client = printer(&config);
    let (ctx, publisher) = context(config);
    (JobPipeline::new(ctx, client), publisher)
}

fn job_params(server: &MockServer) -> Value {
    json!({
        "fileKey": "KEY1",
        "fileUrl": format!("{}/files/benchy.gcode", server.uri()),
        "fileName": "Benchy",
        "printjobuuid": "job-1"
    })
}

async fn mount_listing(server: &MockServer, files: &[&str]) {
    let files: Vec<Value> = files.iter().map(|name| json!({"filename": name, "size": 10})).collect();
    Mock::given(method("GET"))
        .and(path("/server/files/directory"))
        .and(query_param("path", "gcodes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": {"files": files}})))
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_print_state(server: &MockServer, state: &str) {
    Mock::given(method("GET"))
        .and(path("/printer/objects/query"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"result": {"status": {"print_stats": {"state": state}}}})),
        )
        .expect(1)
        .mount(server)
        .await;
}

/// The terminal status must appear exactly once on each status topic, identically.
fn single_terminal_status(publisher: &RecordingPublisher) -> Value {
    let broadcast = publisher.on_topic(PRINT_STATUS_TOPIC);
    assert_eq!(broadcast.len(), 1, "one status broadcast");
    let replies: Vec<_> = publisher
        .on_topic(RESPONSE_TOPIC)
        .into_iter()
        .filter(|m| m.payload["method"] == "print.status")
        .collect();
    assert_eq!(replies.len(), 1, "one status reply");
    assert_eq!(broadcast[0].payload, replies[0].payload);
    assert_eq!(broadcast[0].qos, Qos::AtLeastOnce);
    assert!(!broadcast[0].retain);
    assert_eq!(broadcast[0].payload["printerUUID"], INSTANCE);
    broadcast[0].payload["params"].clone()
}

#[tokio::test]
async fn missing_fields_fail_without_touching_the_printer() {
    let server = MockServer::start().await;
    let (pipeline, publisher) = pipeline(&server);

    let event = pipeline
        .run(&json!({"fileKey": "KEY1", "fileName": "", "printjobuuid": "job-1"}))
        .await;
    assert_eq!(event.state, JobState::Error);

    let status = single_terminal_status(&publisher);
    assert_eq!(status["state"], "error");
    assert_eq!(status["job_uuid"], "job-1");
    assert!(status["message"].as_str().unwrap().contains("fileUrl, fileName"));

    let requests = server.received_requests().await.unwrap();
    assert!(requests.is_empty(), "no printer calls for an invalid job");
}

#[tokio::test]
async fn staged_file_is_renamed_and_started() {
    let server = MockServer::start().await;
    mount_listing(&server, &["other.gcode", "Benchy-@-KEY1"]).await;
    Mock::given(method("POST"))
        .and(path("/server/files/move"))
        .and(body_json(json!({
            "source": "/gcodes/Benchy-@-KEY1",
            "dest": "/gcodes/Benchy-@-job-1-@-KEY1.gcode"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": {}})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/printer/print/start"))
        .and(body_json(json!({"filename": "/gcodes/Benchy-@-job-1-@-KEY1.gcode"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "ok"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/benchy.gcode"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let (pipeline, publisher) = pipeline(&server);
    let event = pipeline.run(&job_params(&server)).await;
    assert_eq!(event.state, JobState::Printing);

    let status = single_terminal_status(&publisher);
    assert_eq!(status["state"], "printing");
    assert_eq!(status["message"], "File renamed and print started: Benchy-@-job-1-@-KEY1.gcode");
    assert!(publisher.with_method("print.progress").is_empty());
}

#[tokio::test]
async fn new_file_is_downloaded_uploaded_and_printing() {
    let server = MockServer::start().await;
    mount_listing(&server, &["Benchy-@-job-0-@-KEY1.gcode"]).await;
    let content = vec![b'G'; 1_000_000];
    Mock::given(method("GET"))
        .and(path("/files/benchy.gcode"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.clone()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/server/files/upload"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"result": {"print_started": true}})))
        .expect(1)
        .mount(&server)
        .await;
    mount_print_state(&server, "printing").await;

    let (pipeline, publisher) = pipeline(&server);
    let event = pipeline.run(&job_params(&server)).await;
    assert_eq!(event.state, JobState::Printing, "{}", event.message);

    let status = single_terminal_status(&publisher);
    assert_eq!(status["message"], "File Benchy-@-job-1-@-KEY1.gcode is printing");

    let progress: Vec<Value> = publisher
        .with_method("print.progress")
        .into_iter()
        .inspect(|m| assert_eq!(m.topic, RESPONSE_TOPIC))
        .map(|m| m.payload["params"].clone())
        .collect();
    assert!(progress.len() >= 20, "got {} progress events", progress.len());
    let values: Vec<u64> = progress.iter().map(|p| p["progress"].as_u64().unwrap()).collect();
    assert!(values.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {:?}", values);
    assert_eq!(values.last(), Some(&100));
    let last = progress.last().unwrap();
    assert_eq!(last["uploaded"], 1_000_000);
    assert_eq!(last["total"], 1_000_000);
    assert_eq!(last["job_uuid"], "job-1");

    let requests = server.received_requests().await.unwrap();
    let upload = requests
        .iter()
        .find(|r| r.url.path() == "/server/files/upload")
        .unwrap();
    let content_type = upload.headers.get("content-type").unwrap().to_str().unwrap();
    assert!(content_type.starts_with("multipart/form-data; boundary="));
    let body = String::from_utf8_lossy(&upload.body);
    assert!(body.contains("filename=\"Benchy-@-job-1-@-KEY1.gcode\""));
    assert!(body.contains("name=\"print\"\r\n\r\ntrue"));
    assert!(upload.body.len() > content.len());
}

#[tokio::test]
async fn upload_without_print_start_is_an_error() {
    let server = MockServer::start().await;
    mount_listing(&server, &[]).await;
    Mock::given(method("GET"))
        .and(path("/files/benchy.gcode"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b';'; 2048]))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/server/files/upload"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;
    mount_print_state(&server, "standby").await;

    let (pipeline, publisher) = pipeline(&server);
    let event = pipeline.run(&job_params(&server)).await;
    assert_eq!(event.state, JobState::Error);

    let status = single_terminal_status(&publisher);
    assert_eq!(status["message"], "File uploaded but print not started, current state: standby");
}

#[tokio::test]
async fn http_failure_mid_pipeline_is_reported() {
    let server = MockServer::start().await;
    mount_listing(&server, &[]).await;
    Mock::given(method("GET"))
        .and(path("/files/benchy.gcode"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b';'; 2048]))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/server/files/upload"))
        .respond_with(ResponseTemplate::new(500).set_body_string("disk full"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/printer/objects/query"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let (pipeline, publisher) = pipeline(&server);
    let event = pipeline.run(&job_params(&server)).await;
    assert_eq!(event.state, JobState::Error);

    let status = single_terminal_status(&publisher);
    let message = status["message"].as_str().unwrap();
    assert!(message.starts_with("Failed to handle new file:"), "{}", message);
    assert!(message.contains("500"), "{}", message);
    assert!(message.contains("disk full"), "{}", message);
}

#[tokio::test]
async fn listing_failure_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/server/files/directory"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let (pipeline, publisher) = pipeline(&server);
    let event = pipeline.run(&job_params(&server)).await;
    assert_eq!(event.state, JobState::Error);
    assert_eq!(event.job_uuid.as_deref(), Some("job-1"));

    let status = single_terminal_status(&publisher);
    assert!(status["message"].as_str().unwrap().starts_with("Failed to process print job:"));
}

#[tokio::test]
async fn failed_move_skips_print_start() {
    let server = MockServer::start().await;
    mount_listing(&server, &["Benchy-@-KEY1"]).await;
    Mock::given(method("POST"))
        .and(path("/server/files/move"))
        .respond_with(ResponseTemplate::new(500).set_body_string("file locked"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/printer/print/start"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let (pipeline, publisher) = pipeline(&server);
    let event = pipeline.run(&job_params(&server)).await;
    assert_eq!(event.state, JobState::Error);

    let status = single_terminal_status(&publisher);
    assert_eq!(status["state"], "error");
    let message = status["message"].as_str().unwrap();
    assert!(message.starts_with("Failed to handle existing file:"), "{}", message);
    assert!(message.contains("file locked"), "{}", message);
}

#[tokio::test]
async fn missing_download_skips_upload_and_state_check() {
    let server = MockServer::start().await;
    mount_listing(&server, &[]).await;
    Mock::given(method("GET"))
        .and(path("/files/benchy.gcode"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such file"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/server/files/upload"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/printer/objects/query"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let (pipeline, publisher) = pipeline(&server);
    let event = pipeline.run(&job_params(&server)).await;
    assert_eq!(event.state, JobState::Error);

    let status = single_terminal_status(&publisher);
    let message = status["message"].as_str().unwrap();
    assert!(message.starts_with("Failed to handle new file:"), "{}", message);
    assert!(message.contains("404"), "{}", message);
    assert!(publisher.with_method("print.progress").is_empty());
}

/// Serves one response advertising a huge body, sends a few bytes, then hangs up.
async fn spawn_lying_file_server() -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&buf[..n]);
        }
        socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100000000000000\r\nConnection: close\r\n\r\nG28\n")
            .await
            .unwrap();
        socket.shutdown().await.ok();
    });
    format!("http://{}/benchy.gcode", addr)
}

#[tokio::test]
async fn oversized_content_length_ends_in_error_status() {
    let server = MockServer::start().await;
    mount_listing(&server, &[]).await;
    Mock::given(method("POST"))
        .and(path("/server/files/upload"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let mut params = job_params(&server);
    params["fileUrl"] = Value::String(spawn_lying_file_server().await);

    let (pipeline, publisher) = pipeline(&server);
    let event = pipeline.run(&params).await;
    assert_eq!(event.state, JobState::Error);

    let status = single_terminal_status(&publisher);
    let message = status["message"].as_str().unwrap();
    assert!(message.starts_with("Failed to handle new file:"), "{}", message);
}
