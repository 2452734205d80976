use crate::app::{create_router, AppState, AppStateBuilder};
use crate::call::{CallRecordPatch, CallStatus, CallStore, CallType, MemoryCallStore};
use crate::config::Config;
use crate::directory::{DeviceToken, Directory, MemoryDirectory};
use crate::notify::{PushError, PushPayload, PushSender};
use crate::provider::signature::{compute_signature, SIGNATURE_HEADER};
use crate::provider::{OutboundCallRequest, ProviderCall, ProviderError, TelephonyProvider};
use async_trait::async_trait;
use mockall::mock;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

mock! {
    pub Provider {}

    #[async_trait]
    impl TelephonyProvider for Provider {
        async fn create_call(&self, request: &OutboundCallRequest) -> Result<ProviderCall, ProviderError>;
        async fn end_call(&self, call_id: &str) -> Result<ProviderCall, ProviderError>;
        async fn fetch_call(&self, call_id: &str) -> Result<ProviderCall, ProviderError>;
    }
}

mock! {
    pub Sender {}

    #[async_trait]
    impl PushSender for Sender {
        async fn send(&self, device: &DeviceToken, payload: &PushPayload) -> Result<(), PushError>;
    }
}

struct TestServer {
    base: String,
    state: AppState,
    client: reqwest::Client,
}

impl TestServer {
    async fn start(state: AppState) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = create_router(state.clone());
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });
        Self {
            base: format!("http://{}", addr),
            state,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn post_json(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let response = self.client.post(self.url(path)).json(&body).send().await.unwrap();
        let status = response.status();
        (status, response.json().await.unwrap())
    }

    async fn post_form(&self, path: &str, form: &[(&str, &str)]) -> (StatusCode, String) {
        let response = self.client.post(self.url(path)).form(form).send().await.unwrap();
        let status = response.status();
        (status, response.text().await.unwrap())
    }

    async fn get_json(&self, path: &str) -> (StatusCode, Value) {
        let response = self.client.get(self.url(path)).send().await.unwrap();
        let status = response.status();
        (status, response.json().await.unwrap())
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.public_url = "https://voice.example.com".to_string();
    config.provider.account_sid = "AC123".to_string();
    config.provider.auth_token = Some("secret".to_string());
    config.provider.caller_id = Some("+15550000".to_string());
    config
}

fn provider_call(sid: &str, to: &str) -> ProviderCall {
    ProviderCall {
        sid: sid.to_string(),
        to: to.to_string(),
        status: "queued".to_string(),
        direction: "outbound-api".to_string(),
        ..Default::default()
    }
}

async fn start(provider: MockProvider) -> TestServer {
    let state = AppStateBuilder::new()
        .config(test_config())
        .provider(Arc::new(provider))
        .directory(Arc::new(MemoryDirectory::default()))
        .build()
        .unwrap();
    TestServer::start(state).await
}

#[tokio::test]
async fn test_make_call_and_duplicate() {
    let mut provider = MockProvider::new();
    provider
        .expect_create_call()
        .withf(|req| {
            req.to == "+15550199"
                && req.from == "+15550000"
                && req.url.starts_with("https://voice.example.com/twiml?callUniqueId=")
                && req.status_callback == "https://voice.example.com/call-status"
        })
        .times(1)
        .returning(|req| Ok(provider_call("CA100", &req.to)));
    let server = start(provider).await;

    let body = json!({ "to": "+15550199", "fromIdentity": "alice" });
    let (status, json) = server.post_json("/call/make", body.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["sid"], "CA100");

    let record = server.state.store.get_call("CA100").unwrap();
    assert_eq!(record.from, "client:alice");
    assert_eq!(record.from_identity.as_deref(), Some("alice"));
    assert_eq!(record.call_type, CallType::Default);
    assert!(record
        .unique_id
        .as_deref()
        .unwrap()
        .starts_with("client:alice-+15550199-"));

    let (status, json) = server.post_json("/call/make", body).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(json["success"], false);
    assert_eq!(
        json["error"],
        "A call to this number was just initiated. Please wait a moment before trying again."
    );
}

#[tokio::test]
async fn test_make_call_validation_and_provider_error() {
    let mut provider = MockProvider::new();
    provider
        .expect_create_call()
        .times(1)
        .returning(|_| Err(ProviderError::new(Some(21211), 400, "Invalid 'To'")));
    let server = start(provider).await;

    let (status, json) = server.post_json("/call/make", json!({ "from": "+1" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Missing 'to' parameter.");

    // a plain caller number leaves nobody to bridge the answered call to
    let (status, json) = server
        .post_json("/call/make", json!({ "to": "+15550199", "from": "+15550100" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Missing 'fromIdentity' parameter.");

    let (status, json) = server
        .post_json("/call/make", json!({ "to": "123", "fromIdentity": "alice" }))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"], "Invalid phone number format");
    assert_eq!(server.state.store.count(), 0);
}

#[tokio::test]
async fn test_make_call_tracks_pending_attempt() {
    let store: Arc<dyn CallStore> = Arc::new(MemoryCallStore::new());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut provider = MockProvider::new();
    let seen = store.clone();
    provider.expect_create_call().times(1).returning(move |req| {
        let url = url::Url::parse(&req.url).unwrap();
        let unique_id = url
            .query_pairs()
            .find(|(k, _)| k == "callUniqueId")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        tx.send((unique_id.clone(), seen.get_call(&unique_id))).ok();
        Ok(provider_call("CA400", &req.to))
    });
    let state = AppStateBuilder::new()
        .config(test_config())
        .provider(Arc::new(provider))
        .directory(Arc::new(MemoryDirectory::default()))
        .store(store)
        .build()
        .unwrap();
    let server = TestServer::start(state).await;

    let (status, _) = server
        .post_json("/call/make", json!({ "to": "+15550199", "fromIdentity": "alice" }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (unique_id, pending) = rx.recv().await.unwrap();
    let pending = pending.unwrap();
    assert_eq!(pending.from_identity.as_deref(), Some("alice"));
    assert_eq!(pending.call_type, CallType::Default);
    assert!(server.state.store.get_call(&unique_id).is_none());
    assert!(server.state.store.get_call("CA400").is_some());
    assert_eq!(server.state.store.count(), 1);
}

#[tokio::test]
async fn test_api_leg_before_create_returns() {
    let server = start(MockProvider::new()).await;
    server.state.store.track_call(
        "attempt-1",
        CallRecordPatch {
            from: Some("client:alice".to_string()),
            to: Some("+15550199".to_string()),
            from_identity: Some("alice".to_string()),
            call_type: Some(CallType::Default),
            ..Default::default()
        },
    );

    let leg = [
        ("CallSid", "CA500"),
        ("From", "+15550000"),
        ("To", "+15550199"),
        ("Direction", "outbound-api"),
    ];
    let (_, xml) = server.post_form("/twiml?callUniqueId=attempt-1", &leg).await;
    assert!(xml.contains("<Client>alice</Client>"));
    assert!(!xml.contains("<Number>"));

    let (_, xml) = server.post_form("/twiml?callUniqueId=attempt-1", &leg).await;
    assert!(xml.contains("Call is already connected."));
}

#[tokio::test]
async fn test_make_direct_number_rings_caller_first() {
    let mut provider = MockProvider::new();
    provider
        .expect_create_call()
        .withf(|req| {
            req.to == "+15550100"
                && req.url.contains("/twiml-direct-number?callUniqueId=")
                && req.url.ends_with("&to=%2B15550199")
        })
        .times(1)
        .returning(|_| Ok(provider_call("CA200", "+15550100")));
    let server = start(provider).await;

    let response = server
        .client
        .post(server.url("/call/make-direct"))
        .form(&[("to", "+15550199"), ("from", "+15550100")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json: Value = response.json().await.unwrap();
    assert_eq!(json["message"], "Direct number call initiated successfully");

    let record = server.state.store.get_call("CA200").unwrap();
    assert_eq!(record.call_type, CallType::DirectNumber);
    assert_eq!(record.to, "+15550199");

    let (status, xml) = server
        .post_form(
            "/twiml-direct-number?to=%2B15550199&callUniqueId=x",
            &[("CallSid", "CA200"), ("From", "+15550000")],
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(xml.contains("<Number>+15550199</Number>"));
    assert!(xml.contains(r#"callerId="+15550000""#));
}

#[tokio::test]
async fn test_twiml_dials_once() {
    let server = start(MockProvider::new()).await;
    let form = [
        ("CallSid", "CA1"),
        ("From", "client:alice"),
        ("To", "client:bob"),
        ("Direction", "inbound"),
    ];

    let response = server.client.post(server.url("/twiml")).form(&form).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/xml"
    );
    let xml = response.text().await.unwrap();
    assert!(xml.contains("<Client>bob</Client>"));
    assert!(xml.contains(r#"callerId="client:alice""#));
    assert!(!xml.contains("<Say>"));

    for _ in 0..2 {
        let (_, xml) = server.post_form("/twiml", &form).await;
        assert!(xml.contains("<Say>Call is already connected.</Say><Hangup/>"));
    }

    let record = server.state.store.get_call("CA1").unwrap();
    assert!(record.dialed);
    assert_eq!(record.to_identity.as_deref(), Some("bob"));
    assert_eq!(record.from_identity.as_deref(), Some("alice"));
}

#[tokio::test]
async fn test_twiml_child_leg_of_dialed_parent() {
    let server = start(MockProvider::new()).await;
    server
        .post_form(
            "/twiml",
            &[("CallSid", "CA1"), ("From", "client:alice"), ("To", "+15550199")],
        )
        .await;
    let (_, xml) = server
        .post_form(
            "/twiml",
            &[
                ("CallSid", "CA2"),
                ("ParentCallSid", "CA1"),
                ("From", "client:alice"),
                ("To", "+15550199"),
            ],
        )
        .await;
    assert!(xml.contains("Call is already connected."));
    assert!(server.state.store.get_call("CA2").is_none());
}

#[tokio::test]
async fn test_twiml_missing_destination() {
    let server = start(MockProvider::new()).await;
    let (status, xml) = server.post_form("/twiml", &[("CallSid", "CA1")]).await;
    assert_eq!(status, StatusCode::OK);
    assert!(xml.contains("Sorry, we couldn&apos;t determine who to call. Please try again."));
    assert!(xml.ends_with("<Hangup/></Response>"));
}

#[tokio::test]
async fn test_api_leg_is_bridged_to_requester() {
    let mut provider = MockProvider::new();
    provider
        .expect_create_call()
        .returning(|req| Ok(provider_call("CA300", &req.to)));
    let server = start(provider).await;
    server
        .post_json("/call/make", json!({ "to": "+15550199", "from": "client:alice" }))
        .await;

    let (_, xml) = server
        .post_form(
            "/twiml",
            &[
                ("CallSid", "CA300"),
                ("From", "+15550000"),
                ("To", "+15550199"),
                ("Direction", "outbound-api"),
            ],
        )
        .await;
    assert!(xml.contains("<Client>alice</Client>"));
    assert!(server.state.connector.is_dialed("CA300"));
}

#[tokio::test]
async fn test_status_callbacks() {
    let server = start(MockProvider::new()).await;

    // unknown call ids are acknowledged
    let (status, body) = server
        .post_form("/call-status", &[("CallSid", "CA404"), ("CallStatus", "ringing")])
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "OK");
    let (status, _) = server.post_form("/call-status", &[]).await;
    assert_eq!(status, StatusCode::OK);

    server
        .post_form(
            "/twiml",
            &[("CallSid", "CA1"), ("From", "client:alice"), ("To", "client:bob")],
        )
        .await;
    for status in ["ringing", "in-progress"] {
        let (code, _) = server
            .post_form("/call-status", &[("CallSid", "CA1"), ("CallStatus", status)])
            .await;
        assert_eq!(code, StatusCode::OK);
    }

    let (status, json) = server.get_json("/call/active/bob").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["calls"][0]["callId"], "CA1");
    assert_eq!(json["calls"][0]["status"], "in-progress");

    server
        .post_form("/call-status", &[("CallSid", "CA1"), ("CallStatus", "completed")])
        .await;
    // terminal state is absorbing
    server
        .post_form("/call-status", &[("CallSid", "CA1"), ("CallStatus", "ringing")])
        .await;
    let record = server.state.store.get_call("CA1").unwrap();
    assert_eq!(record.status, CallStatus::Completed);
    let (_, json) = server.get_json("/call/active/bob").await;
    assert_eq!(json["calls"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_action_result() {
    let server = start(MockProvider::new()).await;
    server
        .post_form(
            "/twiml",
            &[("CallSid", "CA1"), ("From", "+15550100"), ("To", "client:bob")],
        )
        .await;
    let (_, xml) = server
        .post_form(
            "/call-action-result",
            &[("CallSid", "CA1"), ("DialCallStatus", "busy")],
        )
        .await;
    assert!(xml.contains("The person you are calling is busy. Please try again later."));
    assert_eq!(
        server.state.store.get_call("CA1").unwrap().status,
        CallStatus::Busy
    );

    let (_, xml) = server
        .post_form(
            "/call-action-result",
            &[("CallSid", "CA1"), ("DialCallStatus", "completed")],
        )
        .await;
    assert!(xml.ends_with("<Response><Hangup/></Response>"));
}

#[tokio::test]
async fn test_answered_incoming_call_finishes_on_action_result() {
    let server = start(MockProvider::new()).await;
    let (_, xml) = server
        .post_form(
            "/call/incoming",
            &[
                ("CallSid", "CA77"),
                ("From", "+15550100"),
                ("To", "client:bob"),
                ("Direction", "inbound"),
            ],
        )
        .await;
    assert!(xml.contains("<Client>bob</Client>"));
    let (_, json) = server.get_json("/call/active/bob").await;
    assert_eq!(json["calls"].as_array().unwrap().len(), 1);

    let (_, xml) = server
        .post_form(
            "/call-action-result",
            &[("CallSid", "CA77"), ("DialCallStatus", "completed")],
        )
        .await;
    assert!(xml.ends_with("<Response><Hangup/></Response>"));

    let record = server.state.store.get_call("CA77").unwrap();
    assert_eq!(record.status, CallStatus::Completed);
    assert!(record.answered_at.is_some());
    let (_, json) = server.get_json("/call/active/bob").await;
    assert_eq!(json["calls"].as_array().unwrap().len(), 0);

    let purged = server
        .state
        .store
        .purge_finished(Duration::ZERO, Duration::from_secs(3600));
    assert_eq!(purged, 1);
}

#[tokio::test]
async fn test_incoming_call_greets_and_pushes() {
    let directory = Arc::new(MemoryDirectory::default());
    directory
        .register_device_token(DeviceToken {
            identity: "user_15550199".to_string(),
            platform: "android".to_string(),
            token: "fcm-token".to_string(),
        })
        .await
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut sender = MockSender::new();
    sender.expect_send().returning(move |device, payload| {
        tx.send((device.token.clone(), payload.data.get("type").cloned()))
            .ok();
        Ok(())
    });

    let state = AppStateBuilder::new()
        .config(test_config())
        .provider(Arc::new(MockProvider::new()))
        .directory(directory)
        .push_sender(Arc::new(sender))
        .build()
        .unwrap();
    let server = TestServer::start(state).await;

    let (status, xml) = server
        .post_form(
            "/call/incoming",
            &[
                ("CallSid", "CA9"),
                ("From", "+15550100"),
                ("To", "+1 (555) 0199"),
                ("Direction", "inbound"),
            ],
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(xml.contains(
        "<Say>Thanks for calling. Please wait while we connect you.</Say><Dial"
    ));
    assert!(xml.contains("<Client>user_15550199</Client>"));

    let (token, kind) = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(token, "fcm-token");
    assert_eq!(kind.as_deref(), Some("incoming-call"));

    let record = server.state.store.get_call("CA9").unwrap();
    assert_eq!(record.call_type, CallType::Greeting);
    assert_eq!(record.to_identity.as_deref(), Some("user_15550199"));
}

#[tokio::test]
async fn test_end_call() {
    let mut provider = MockProvider::new();
    provider.expect_end_call().times(1).returning(|call_id| {
        assert_eq!(call_id.to_string(), "CA1");
        Ok(ProviderCall {
            sid: "CA1".to_string(),
            status: "completed".to_string(),
            ..Default::default()
        })
    });
    let server = start(provider).await;
    server
        .post_form(
            "/twiml",
            &[("CallSid", "CA1"), ("From", "client:alice"), ("To", "client:bob")],
        )
        .await;

    let (status, json) = server.post_json("/call/end", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Missing callSid parameter");

    let (status, json) = server.post_json("/call/end", json!({ "callSid": "CA1" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "Call ended successfully");
    assert!(server.state.store.get_call("CA1").is_none());
}

#[tokio::test]
async fn test_end_call_already_gone_at_provider() {
    let mut provider = MockProvider::new();
    provider
        .expect_end_call()
        .times(1)
        .returning(|_| Err(ProviderError::new(Some(20404), 404, "not found")));
    let server = start(provider).await;
    server
        .post_form(
            "/twiml",
            &[("CallSid", "CA2"), ("From", "client:alice"), ("To", "client:bob")],
        )
        .await;

    let (status, json) = server.post_json("/call/end", json!({ "callId": "CA2" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert!(server.state.store.get_call("CA2").is_none());
}

#[tokio::test]
async fn test_call_info() {
    let mut provider = MockProvider::new();
    provider.expect_fetch_call().returning(|call_id| {
        if call_id.to_string() == "CA1" {
            Ok(ProviderCall {
                sid: "CA1".to_string(),
                status: "in-progress".to_string(),
                ..Default::default()
            })
        } else {
            Err(ProviderError::new(Some(20404), 404, "not found"))
        }
    });
    let server = start(provider).await;
    server
        .post_form(
            "/twiml",
            &[("CallSid", "CA1"), ("From", "client:alice"), ("To", "client:bob")],
        )
        .await;

    let (status, json) = server.get_json("/call/info/CA1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["local"]["callId"], "CA1");
    assert_eq!(json["local"]["currentDuration"], 0);
    assert_eq!(json["provider"]["status"], "in-progress");

    let (status, json) = server.get_json("/call/info/CA404").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn test_client_call_events() {
    let server = start(MockProvider::new()).await;
    server
        .post_form(
            "/twiml",
            &[("CallSid", "CA1"), ("From", "client:alice"), ("To", "client:bob")],
        )
        .await;

    let (status, json) = server
        .post_json("/call/event", json!({ "identity": "bob", "event": "answered" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["callId"], "CA1");
    assert_eq!(json["status"], "in-progress");

    let (_, json) = server
        .post_json("/call/event", json!({ "identity": "bob", "event": "ended" }))
        .await;
    assert_eq!(json["status"], "completed");

    let (status, _) = server
        .post_json("/call/event", json!({ "identity": "bob", "event": "ringing" }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = server
        .post_json(
            "/call/event",
            json!({ "identity": "bob", "event": "dance", "callId": "CA1" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_call_event_requires_party() {
    let server = start(MockProvider::new()).await;
    server
        .post_form(
            "/twiml",
            &[("CallSid", "CA3"), ("From", "client:alice"), ("To", "client:bob")],
        )
        .await;

    let (status, _) = server
        .post_json(
            "/call/event",
            json!({ "identity": "mallory", "event": "rejected", "callId": "CA3" }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        server.state.store.get_call("CA3").unwrap().status,
        CallStatus::Initiated
    );

    let (status, json) = server
        .post_json(
            "/call/event",
            json!({ "identity": "bob", "event": "rejected", "callId": "CA3" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "rejected");
}

#[tokio::test]
async fn test_unhandled_callbacks() {
    let server = start(MockProvider::new()).await;
    let (status, body) = server
        .post_form("/recording-status", &[("CallSid", "CA1")])
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "OK");

    let response = server
        .client
        .get(server.url("/fallback?AccountSid=AC123"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let (status, json) = server.get_json("/nothing-here").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn test_webhook_signatures() {
    let mut config = test_config();
    config.provider.validate_signatures = true;
    let state = AppStateBuilder::new()
        .config(config)
        .provider(Arc::new(MockProvider::new()))
        .build()
        .unwrap();
    let server = TestServer::start(state).await;
    let form = [("CallSid", "CA1"), ("CallStatus", "ringing")];

    let (status, _) = server.post_form("/call-status", &form).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let params: Vec<(String, String)> = form
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let signature = compute_signature(
        "secret",
        "https://voice.example.com/call-status",
        &params,
    );
    let response = server
        .client
        .post(server.url("/call-status"))
        .header(SIGNATURE_HEADER, signature)
        .form(&form)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "OK");

    // app endpoints are not signed
    let (status, _) = server.get_json("/").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_token_and_push_registration() {
    let mut config = test_config();
    config.provider.api_key = Some("SK1".to_string());
    config.provider.api_secret = Some("shh".to_string());
    let directory = Arc::new(MemoryDirectory::default());
    let state = AppStateBuilder::new()
        .config(config)
        .provider(Arc::new(MockProvider::new()))
        .directory(directory.clone())
        .build()
        .unwrap();
    let server = TestServer::start(state).await;

    let (status, json) = server.get_json("/token").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Identity is required");

    let (status, json) = server.get_json("/token?identity=alice").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["identity"], "alice");
    assert_eq!(json["token"].as_str().unwrap().split('.').count(), 3);

    let (status, json) = server
        .post_json(
            "/register-push-notification",
            json!({ "identity": "alice", "platform": "Android", "deviceToken": "tok-1" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "Push notification registered for Android");
    let devices = directory.device_tokens("alice").await.unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].platform, "android");

    let (status, json) = server
        .post_json("/register-push-notification", json!({ "identity": "alice" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        json["error"],
        "Missing required parameters: identity, platform, deviceToken"
    );
}

#[tokio::test]
async fn test_token_without_credentials() {
    let server = start(MockProvider::new()).await;
    let (status, json) = server.get_json("/token?identity=alice").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["success"], false);
}
