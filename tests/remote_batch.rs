mod common;

use std::sync::Arc;
use std::time::Duration;

use mockito::Matcher;
use serde_json::json;
use skiptracer_rs::fetch::RemoteTaskBackend;
use skiptracer_rs::{
    BatchSummary,
    RemoteApiClient,
    RemoteApiConfig,
    RemoteAuth,
    Settings,
    SkipTracer,
    Source,
};
use url::Url;

use common::{no_results, offline_settings, tps_results};

const INPUT: &str = "Address
\"709 W High St, Portland, IN\"
\"13 Stuck Ln, Muncie, IN\"
\"42 Oak Ave, Fort Wayne, IN\"
";

const EXPECTED: &str = "Input Address,Result Name,Result Address,Phone Number(s),Status
\"709 W High St, Portland, IN\",John D Smith,\"Portland, IN\",+1 (260) 555-1234,ok
\"13 Stuck Ln, Muncie, IN\",,,,error
\"42 Oak Ave, Fort Wayne, IN\",,,,no_match
";

fn done(content: String) -> String {
    json!({
        "status": "done",
        "results": [{ "content": content, "status_code": 200 }],
    })
    .to_string()
}

#[tokio::test]
async fn pending_task_fails_its_row_and_the_rest_of_the_batch_completes() {
    let submit = mockito::mock("POST", "/rb/task/batch")
        .match_body(Matcher::Regex("truepeoplesearch".into()))
        .with_body(r#"{"queries":[{"id":"rb-high"},{"id":"rb-stuck"},{"id":"rb-oak"}]}"#)
        .expect(1)
        .create();
    let _high = mockito::mock("GET", "/rb/task/rb-high/results")
        .with_body(done(tps_results()))
        .create();
    let stuck = mockito::mock("GET", "/rb/task/rb-stuck/results")
        .with_body(r#"{"status":"pending"}"#)
        .expect_at_least(1)
        .create();
    let _oak = mockito::mock("GET", "/rb/task/rb-oak/results")
        .with_body(done(no_results()))
        .create();

    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("addresses.csv");
    std::fs::write(&input, INPUT).unwrap();
    let settings = Settings {
        sources: vec![Source::TruePeopleSearch],
        max_retries: 0,
        parallel: 1,
        ..offline_settings(dir.path())
    };
    let output = settings.batch_output_path.clone();

    let base = Url::parse(&format!("{}/rb/", mockito::server_url())).unwrap();
    let client = RemoteApiClient::new(RemoteApiConfig::new(base, RemoteAuth::Token("secret".into()))).unwrap();
    let backend = RemoteTaskBackend::new(Arc::new(client), Duration::from_millis(100), Duration::from_secs(1));
    let tracer = SkipTracer::builder()
        .with_settings(settings)
        .with_backend(Arc::new(backend))
        .build()
        .unwrap();

    let summary = tracer.run_batch(&input, &output).await.unwrap();

    submit.assert();
    stuck.assert();
    assert_eq!(std::fs::read_to_string(&output).unwrap(), EXPECTED);
    assert_eq!(
        summary,
        BatchSummary {
            total: 3,
            ok: 1,
            no_match: 1,
            blocked: 0,
            error: 1,
        }
    );
}
