//! NotificationRelay against a mock callback endpoint.

use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Value};
use swcache_net::{LoaderConfig, ResourceLoader};
use swcache_notify::{
    ClickOutcome, NotificationEvent, NotificationHost, NotificationRelay, NotifyError, WindowClient,
};
use url::Url;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Clone, PartialEq)]
enum HostCall {
    Show(String, Value),
    Close(Option<String>),
    Focus(String),
    Open(Url),
}

#[derive(Default)]
struct RecordingHost {
    calls: Mutex<Vec<HostCall>>,
    clients: Vec<WindowClient>,
}

impl RecordingHost {
    fn with_clients(clients: Vec<WindowClient>) -> Self {
        Self {
            clients,
            ..Default::default()
        }
    }

    fn calls(&self) -> Vec<HostCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: HostCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl NotificationHost for RecordingHost {
    fn show_notification<'a>(
        &'a self,
        title: &'a str,
        options: &'a Value,
    ) -> BoxFuture<'a, Result<(), NotifyError>> {
        self.record(HostCall::Show(title.to_string(), options.clone()));
        async { Ok(()) }.boxed()
    }

    fn close_notification<'a>(
        &'a self,
        tag: Option<&'a str>,
    ) -> BoxFuture<'a, Result<(), NotifyError>> {
        self.record(HostCall::Close(tag.map(str::to_string)));
        async { Ok(()) }.boxed()
    }

    fn match_window_clients(&self) -> BoxFuture<'_, Result<Vec<WindowClient>, NotifyError>> {
        let clients = self.clients.clone();
        async move { Ok(clients) }.boxed()
    }

    fn focus_client<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), NotifyError>> {
        self.record(HostCall::Focus(id.to_string()));
        async { Ok(()) }.boxed()
    }

    fn open_window<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<WindowClient, NotifyError>> {
        self.record(HostCall::Open(url.clone()));
        let client = WindowClient {
            id: "new".to_string(),
            url: url.clone(),
            focused: true,
        };
        async move { Ok(client) }.boxed()
    }
}

fn relay(server: &MockServer, host: Arc<RecordingHost>) -> NotificationRelay {
    let location = Url::parse(&format!("{}/service_worker.js", server.uri())).unwrap();
    let fetcher = Arc::new(ResourceLoader::new(LoaderConfig::default()).unwrap());
    NotificationRelay::new(fetcher, host, location, "html5").unwrap()
}

#[tokio::test]
async fn test_push_displays_then_relays_without_jwt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/notify.html5/callback"))
        .and(header("authorization", "Bearer J"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({"type": "received", "tag": "x"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let host = Arc::new(RecordingHost::default());
    let relay = relay(&server, host.clone());
    assert_eq!(relay.callback_url().path(), "/api/notify.html5/callback");

    relay
        .on_push(Some(br#"{"title":"T","tag":"x","data":{"jwt":"J"}}"#))
        .await
        .unwrap();

    assert_eq!(
        host.calls(),
        vec![HostCall::Show(
            "T".to_string(),
            json!({"title": "T", "tag": "x", "data": {"jwt": "J"}})
        )]
    );
}

#[tokio::test]
async fn test_push_without_data_does_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let host = Arc::new(RecordingHost::default());
    relay(&server, host.clone()).on_push(None).await.unwrap();

    assert!(host.calls().is_empty());
}

#[tokio::test]
async fn test_push_callback_rejection_propagates() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let host = Arc::new(RecordingHost::default());
    let err = relay(&server, host.clone())
        .on_push(Some(br#"{"title":"T","data":{"jwt":"bad"}}"#))
        .await
        .unwrap_err();

    assert!(matches!(err, NotifyError::CallbackRejected { status: 401 }));
    assert_eq!(host.calls().len(), 1);
}

#[tokio::test]
async fn test_click_focuses_existing_client() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_json(json!({
            "type": "clicked",
            "action": "",
            "tag": "door",
            "data": {"url": "/states"}
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let states = Url::parse(&format!("{}/states", server.uri())).unwrap();
    let host = Arc::new(RecordingHost::with_clients(vec![WindowClient {
        id: "c1".to_string(),
        url: states,
        focused: false,
    }]));

    let event = NotificationEvent {
        action: Some(String::new()),
        tag: Some("door".to_string()),
        data: Some(json!({"jwt": "J", "url": "/states"})),
    };
    let outcome = relay(&server, host.clone())
        .on_notification_click(&event)
        .await
        .unwrap();

    assert_eq!(outcome, ClickOutcome::Focused("c1".to_string()));
    assert_eq!(
        host.calls(),
        vec![
            HostCall::Close(Some("door".to_string())),
            HostCall::Focus("c1".to_string())
        ]
    );
}

#[tokio::test]
async fn test_click_opens_window_when_no_client_matches() {
    let server = MockServer::start().await;
    // Callback failures on click are logged only.
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let host = Arc::new(RecordingHost::default());
    let event = NotificationEvent {
        action: None,
        tag: None,
        data: Some(json!({"jwt": "J", "url": "/history"})),
    };
    let outcome = relay(&server, host.clone())
        .on_notification_click(&event)
        .await
        .unwrap();

    let expected = Url::parse(&format!("{}/history", server.uri())).unwrap();
    assert_eq!(outcome, ClickOutcome::Opened(expected.clone()));
    assert_eq!(host.calls().last(), Some(&HostCall::Open(expected)));
}

#[tokio::test]
async fn test_click_without_url_only_closes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let host = Arc::new(RecordingHost::default());
    let event = NotificationEvent {
        tag: Some("t".to_string()),
        data: Some(json!({"jwt": "J"})),
        ..Default::default()
    };
    let outcome = relay(&server, host.clone())
        .on_notification_click(&event)
        .await
        .unwrap();

    assert_eq!(outcome, ClickOutcome::NoTarget);
    assert_eq!(host.calls(), vec![HostCall::Close(Some("t".to_string()))]);
}

#[tokio::test]
async fn test_close_is_relayed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("authorization", "Bearer J"))
        .and(body_json(json!({"type": "closed", "tag": "t"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let host = Arc::new(RecordingHost::default());
    let event = NotificationEvent {
        tag: Some("t".to_string()),
        data: Some(json!({"jwt": "J"})),
        ..Default::default()
    };
    relay(&server, host.clone()).on_notification_close(&event).await;

    assert!(host.calls().is_empty());
}
