use resumable_multipart_upload::{FileSource, HttpTransport, TransportConfig, UploadController, UploadStatus};

use std::num::NonZeroUsize;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::{fmt, prelude::*};

#[tokio::main]
async fn main() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .parse("resumable_multipart_upload=trace")
        .unwrap();

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let path = std::env::args().nth(1).expect("usage: upload_file <path>");
    let app = ExampleApp::default();
    let upload = app.upload(&path).await;

    let mut status = upload.status();
    upload.start().await.expect("create failed");

    loop {
        let snapshot = status.changed().await;
        println!("progress: {}% ({:?})", snapshot.progress, snapshot.status);
        match snapshot.status {
            UploadStatus::Done => {
                let artifact = snapshot.artifact.expect("Done status always carries an artifact");
                println!("uploaded as {}", artifact.uid);
                break;
            }
            UploadStatus::Failed => {
                println!("upload failed");
                break;
            }
            _ => {}
        }
    }
}

struct ExampleApp {
    base_url: String,
    part_mib: u64,
    concurrency: usize,
}

impl Default for ExampleApp {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".into(),
            part_mib: 8,
            concurrency: 4,
        }
    }
}

impl ExampleApp {
    async fn upload(&self, path: &str) -> UploadController<HttpTransport> {
        let source = FileSource::open(path).await.expect("cannot open file");
        let transport = HttpTransport::new(
            reqwest::Client::new(),
            TransportConfig::new(&self.base_url),
            source.clone(),
        )
        .expect("invalid transport config");
        let queue = resumable_multipart_upload::controller::single_controller_queue(
            NonZeroUsize::new(self.concurrency).unwrap(),
        );

        UploadController::builder(transport, source, queue)
            .part_size(self.part_mib * 1024 * 1024)
            .build()
    }
}
