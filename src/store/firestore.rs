use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::{FeedEvent, NewTodo, Snapshot, Subscription, Todo, TodoStore};

const PAGE_SIZE: &str = "300";

// ---------------------------------------------------------------------------
// Client abstraction (for testability)
// ---------------------------------------------------------------------------

/// Raw access to the Firestore REST API, rooted at a database's `documents`.
pub trait FirestoreClient: Send + Sync {
    /// Issue `method` against `{documents}/{path}`. A non-2xx status must
    /// surface as `Error::Remote`; an empty response body comes back as `{}`.
    fn request(
        &self,
        method: &str,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&serde_json::Value>,
    ) -> Result<serde_json::Value>;
}

pub struct RestClient {
    agent: ureq::Agent,
    documents_url: String,
    api_key: Option<String>,
}

impl RestClient {
    pub fn new(
        endpoint: &str,
        project_id: &str,
        database: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            documents_url: documents_url(endpoint, project_id, database),
            api_key,
        }
    }
}

pub fn documents_url(endpoint: &str, project_id: &str, database: &str) -> String {
    format!(
        "{}/v1/projects/{project_id}/databases/{database}/documents",
        endpoint.trim_end_matches('/')
    )
}

impl FirestoreClient for RestClient {
    fn request(
        &self,
        method: &str,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let url = format!("{}/{path}", self.documents_url);
        let mut request = self.agent.request(method, &url);
        for (key, value) in query {
            request = request.query(key, value);
        }
        if let Some(ref key) = self.api_key {
            request = request.query("key", key);
        }

        let result = match body {
            Some(body) => request.send_json(body),
            None => request.call(),
        };

        match result {
            Ok(response) => {
                let text = response.into_string().map_err(|e| {
                    Error::Store(format!("failed to read Firestore response: {e}"))
                })?;
                if text.trim().is_empty() {
                    return Ok(serde_json::json!({}));
                }
                serde_json::from_str(&text)
                    .map_err(|e| Error::Store(format!("failed to parse Firestore response: {e}")))
            }
            Err(ureq::Error::Status(status, response)) => {
                let message = response
                    .into_string()
                    .ok()
                    .and_then(|body| error_message(&body))
                    .unwrap_or_default();
                Err(Error::Remote {
                    status,
                    message: format!("{method} {path}: {message}"),
                })
            }
            Err(e) => Err(Error::Store(format!("Firestore request failed: {e}"))),
        }
    }
}

/// Pull `error.message` out of a Firestore error body.
fn error_message(body: &str) -> Option<String> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    json.get("error")?
        .get("message")?
        .as_str()
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// REST response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Document {
    name: String,
    #[serde(default)]
    fields: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListDocumentsResponse {
    #[serde(default)]
    documents: Vec<Document>,
    next_page_token: Option<String>,
}

fn string_field(fields: &serde_json::Map<String, serde_json::Value>, name: &str) -> String {
    fields
        .get(name)
        .and_then(|v| v.get("stringValue"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn bool_field(fields: &serde_json::Map<String, serde_json::Value>, name: &str) -> bool {
    fields
        .get(name)
        .and_then(|v| v.get("booleanValue"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

/// Last segment of `projects/p/databases/d/documents/todos/{id}`.
fn document_id(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

fn parse_document(doc: &Document) -> Todo {
    Todo {
        id: document_id(&doc.name).to_string(),
        text: string_field(&doc.fields, "text"),
        completed: bool_field(&doc.fields, "completed"),
        date: string_field(&doc.fields, "date"),
    }
}

fn encode_new_todo(todo: &NewTodo) -> serde_json::Value {
    serde_json::json!({
        "fields": {
            "text": { "stringValue": todo.text },
            "completed": { "booleanValue": todo.completed },
            "date": { "stringValue": todo.date },
        }
    })
}

// ---------------------------------------------------------------------------
// FirestoreStore
// ---------------------------------------------------------------------------

/// One Firestore collection. Live snapshots come from a poller task that
/// re-reads the collection every `poll_interval` and publishes only changes.
#[derive(Clone)]
pub struct FirestoreStore {
    client: Arc<dyn FirestoreClient>,
    collection: String,
    poll_interval: Duration,
}

impl FirestoreStore {
    pub fn new(
        client: Box<dyn FirestoreClient>,
        collection: &str,
        poll_interval: Duration,
    ) -> Self {
        Self {
            client: Arc::from(client),
            collection: collection.to_string(),
            poll_interval,
        }
    }

    fn document_path(&self, id: &str) -> Result<String> {
        if id.is_empty() || id.contains('/') {
            return Err(Error::Store(format!("invalid document id: {id:?}")));
        }
        Ok(format!("{}/{id}", self.collection))
    }

    /// Publish each poll result that differs from the previous one. A run of
    /// identical failures is published once; the first good read after a
    /// failure is always published.
    async fn poll(self, tx: watch::Sender<FeedEvent>) {
        let mut last: Option<FeedEvent> = None;
        loop {
            let store = self.clone();
            let event = match tokio::task::spawn_blocking(move || store.snapshot()).await {
                Ok(Ok(snapshot)) => FeedEvent::Snapshot(snapshot),
                Ok(Err(e)) => {
                    warn!(collection = %self.collection, error = %e, "snapshot poll failed");
                    FeedEvent::Failed(e.to_string())
                }
                Err(e) => {
                    warn!(collection = %self.collection, error = %e, "snapshot poll task died");
                    break;
                }
            };

            if last.as_ref() != Some(&event) {
                if let FeedEvent::Snapshot(ref snapshot) = event {
                    debug!(
                        collection = %self.collection,
                        count = snapshot.len(),
                        "collection changed"
                    );
                }
                last = Some(event.clone());
                if tx.send(event).is_err() {
                    break;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = tx.closed() => break,
            }
        }
        debug!(collection = %self.collection, "snapshot poller stopped");
    }
}

impl TodoStore for FirestoreStore {
    fn create(&self, todo: &NewTodo) -> Result<String> {
        let data = self.client.request(
            "POST",
            &self.collection,
            &[],
            Some(&encode_new_todo(todo)),
        )?;
        let name = data
            .get("name")
            .and_then(|n| n.as_str())
            .ok_or_else(|| Error::Store("Firestore create response missing name".to_string()))?;
        let id = document_id(name).to_string();
        debug!(collection = %self.collection, id = %id, "document created");
        Ok(id)
    }

    fn set_completed(&self, id: &str, completed: bool) -> Result<()> {
        let path = self.document_path(id)?;
        let body = serde_json::json!({
            "fields": { "completed": { "booleanValue": completed } }
        });
        match self.client.request(
            "PATCH",
            &path,
            &[
                ("updateMask.fieldPaths", "completed"),
                ("currentDocument.exists", "true"),
            ],
            Some(&body),
        ) {
            Ok(_) => Ok(()),
            Err(Error::Remote { status: 404, .. }) => Err(Error::TodoNotFound(id.to_string())),
            Err(e) => Err(e),
        }
    }

    fn delete(&self, id: &str) -> Result<()> {
        let path = self.document_path(id)?;
        match self.client.request("DELETE", &path, &[], None) {
            Ok(_) | Err(Error::Remote { status: 404, .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn snapshot(&self) -> Result<Snapshot> {
        let mut todos = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut query = vec![("pageSize", PAGE_SIZE)];
            if let Some(ref token) = page_token {
                query.push(("pageToken", token.as_str()));
            }
            let data = self
                .client
                .request("GET", &self.collection, &query, None)?;
            let page: ListDocumentsResponse = serde_json::from_value(data)
                .map_err(|e| Error::Store(format!("failed to parse document list: {e}")))?;
            todos.extend(page.documents.iter().map(parse_document));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(todos)
    }

    fn subscribe(&self) -> Result<Subscription> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Store(format!("subscribing needs a tokio runtime: {e}")))?;
        let (tx, rx) = watch::channel(FeedEvent::Snapshot(Vec::new()));
        let poller = runtime.spawn(self.clone().poll(tx));
        Ok(Subscription::new(rx, Some(poller)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    struct Call {
        method: String,
        path: String,
        query: Vec<(String, String)>,
        body: Option<serde_json::Value>,
    }

    #[derive(Clone, Default)]
    struct MockFirestoreClient {
        responses: Arc<Mutex<Vec<Result<serde_json::Value>>>>,
        calls: Arc<Mutex<Vec<Call>>>,
    }

    impl MockFirestoreClient {
        fn new(responses: Vec<Result<serde_json::Value>>) -> Self {
            Self {
                responses: Arc::new(Mutex::new(responses)),
                calls: Arc::default(),
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl FirestoreClient for MockFirestoreClient {
        fn request(
            &self,
            method: &str,
            path: &str,
            query: &[(&str, &str)],
            body: Option<&serde_json::Value>,
        ) -> Result<serde_json::Value> {
            self.calls.lock().unwrap().push(Call {
                method: method.to_string(),
                path: path.to_string(),
                query: query
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                body: body.cloned(),
            });
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Err(Error::Store("no more mock responses".to_string()))
            } else {
                responses.remove(0)
            }
        }
    }

    fn store_with(client: &MockFirestoreClient) -> FirestoreStore {
        polling_store(client, Duration::from_millis(10))
    }

    fn polling_store(client: &MockFirestoreClient, interval: Duration) -> FirestoreStore {
        FirestoreStore::new(Box::new(client.clone()), "todos", interval)
    }

    fn doc(id: &str, text: &str, completed: bool, date: &str) -> serde_json::Value {
        serde_json::json!({
            "name": format!("projects/demo/databases/(default)/documents/todos/{id}"),
            "fields": {
                "text": { "stringValue": text },
                "completed": { "booleanValue": completed },
                "date": { "stringValue": date },
            },
            "createTime": "2024-01-01T00:00:00Z",
            "updateTime": "2024-01-01T00:00:00Z",
        })
    }

    fn page(docs: Vec<serde_json::Value>) -> serde_json::Value {
        serde_json::json!({ "documents": docs })
    }

    #[test]
    fn test_documents_url() {
        assert_eq!(
            documents_url("https://firestore.googleapis.com/", "demo", "(default)"),
            "https://firestore.googleapis.com/v1/projects/demo/databases/(default)/documents"
        );
        assert_eq!(
            documents_url("http://localhost:8080", "demo", "staging"),
            "http://localhost:8080/v1/projects/demo/databases/staging/documents"
        );
    }

    #[test]
    fn test_error_message_extraction() {
        let body = r#"{"error":{"code":403,"message":"Missing or insufficient permissions.","status":"PERMISSION_DENIED"}}"#;
        assert_eq!(
            error_message(body).as_deref(),
            Some("Missing or insufficient permissions.")
        );
        assert_eq!(error_message("<html>"), None);
    }

    #[test]
    fn test_create_encodes_fields_and_returns_id() {
        let client = MockFirestoreClient::new(vec![Ok(doc("abc123", "Buy milk", false, "2024-01-01"))]);
        let store = store_with(&client);

        let id = store
            .create(&NewTodo::new("Buy milk", "2024-01-01"))
            .unwrap();
        assert_eq!(id, "abc123");

        let calls = client.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].method, "POST");
        assert_eq!(calls[0].path, "todos");
        assert_eq!(
            calls[0].body,
            Some(serde_json::json!({
                "fields": {
                    "text": { "stringValue": "Buy milk" },
                    "completed": { "booleanValue": false },
                    "date": { "stringValue": "2024-01-01" },
                }
            }))
        );
    }

    #[test]
    fn test_create_without_name_is_error() {
        let client = MockFirestoreClient::new(vec![Ok(serde_json::json!({}))]);
        let store = store_with(&client);
        let err = store.create(&NewTodo::new("x", "")).unwrap_err();
        assert!(err.to_string().contains("missing name"));
    }

    #[test]
    fn test_set_completed_masks_single_field() {
        let client = MockFirestoreClient::new(vec![Ok(doc("abc", "Buy milk", true, ""))]);
        let store = store_with(&client);
        store.set_completed("abc", true).unwrap();

        let call = &client.calls()[0];
        assert_eq!(call.method, "PATCH");
        assert_eq!(call.path, "todos/abc");
        assert!(
            call.query
                .contains(&("updateMask.fieldPaths".to_string(), "completed".to_string()))
        );
        assert!(
            call.query
                .contains(&("currentDocument.exists".to_string(), "true".to_string()))
        );
        assert_eq!(
            call.body,
            Some(serde_json::json!({ "fields": { "completed": { "booleanValue": true } } }))
        );
    }

    fn not_found(path: &str) -> Error {
        Error::Remote {
            status: 404,
            message: format!("PATCH {path}: No document to update"),
        }
    }

    fn denied() -> Error {
        Error::Remote {
            status: 403,
            message: "GET todos: Missing or insufficient permissions.".to_string(),
        }
    }

    #[test]
    fn test_set_completed_missing_document() {
        let client = MockFirestoreClient::new(vec![Err(not_found("todos/gone"))]);
        let store = store_with(&client);
        let err = store.set_completed("gone", false).unwrap_err();
        assert!(matches!(err, Error::TodoNotFound(id) if id == "gone"));
    }

    #[test]
    fn test_invalid_document_id_never_hits_network() {
        let client = MockFirestoreClient::new(vec![]);
        let store = store_with(&client);
        assert!(store.delete("a/b").is_err());
        assert!(store.set_completed("", true).is_err());
        assert!(client.calls().is_empty());
    }

    #[test]
    fn test_delete_issues_delete() {
        let client = MockFirestoreClient::new(vec![Ok(serde_json::json!({}))]);
        let store = store_with(&client);
        store.delete("abc").unwrap();

        let call = &client.calls()[0];
        assert_eq!(call.method, "DELETE");
        assert_eq!(call.path, "todos/abc");
        assert!(call.body.is_none());
    }

    #[test]
    fn test_delete_of_absent_document_succeeds() {
        let client = MockFirestoreClient::new(vec![Err(not_found("todos/gone"))]);
        let store = store_with(&client);
        store.delete("gone").unwrap();
    }

    #[test]
    fn test_missing_collection_is_not_todo_not_found() {
        let client = MockFirestoreClient::new(vec![
            Err(Error::Remote {
                status: 404,
                message: "GET todos: database (default) does not exist".to_string(),
            }),
            Err(Error::Remote {
                status: 404,
                message: "POST todos: database (default) does not exist".to_string(),
            }),
        ]);
        let store = store_with(&client);

        let err = store.snapshot().unwrap_err();
        assert!(matches!(err, Error::Remote { status: 404, .. }));
        assert!(err.to_string().contains("does not exist"));

        let err = store.create(&NewTodo::new("x", "")).unwrap_err();
        assert!(!matches!(err, Error::TodoNotFound(_)));
    }

    #[test]
    fn test_delete_propagates_server_errors() {
        let client = MockFirestoreClient::new(vec![Err(denied())]);
        let store = store_with(&client);
        assert!(matches!(
            store.delete("abc"),
            Err(Error::Remote { status: 403, .. })
        ));
    }

    #[test]
    fn test_snapshot_follows_page_tokens() {
        let client = MockFirestoreClient::new(vec![
            Ok(serde_json::json!({
                "documents": [doc("a", "first", false, "")],
                "nextPageToken": "page-2",
            })),
            Ok(page(vec![doc("b", "second", true, "2024-02-02")])),
        ]);
        let store = store_with(&client);

        let snapshot = store.snapshot().unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id, "a");
        assert_eq!(snapshot[1].id, "b");
        assert!(snapshot[1].completed);
        assert_eq!(snapshot[1].date, "2024-02-02");

        let calls = client.calls();
        assert_eq!(calls.len(), 2);
        assert!(
            calls[1]
                .query
                .contains(&("pageToken".to_string(), "page-2".to_string()))
        );
    }

    #[test]
    fn test_snapshot_of_empty_collection() {
        let client = MockFirestoreClient::new(vec![Ok(serde_json::json!({}))]);
        let store = store_with(&client);
        assert!(store.snapshot().unwrap().is_empty());
    }

    #[test]
    fn test_snapshot_tolerates_missing_fields() {
        let client = MockFirestoreClient::new(vec![Ok(page(vec![serde_json::json!({
            "name": "projects/demo/databases/(default)/documents/todos/bare",
            "fields": { "text": { "stringValue": "only text" } }
        })]))]);
        let store = store_with(&client);

        let snapshot = store.snapshot().unwrap();
        assert_eq!(
            snapshot,
            vec![Todo {
                id: "bare".to_string(),
                text: "only text".to_string(),
                completed: false,
                date: String::new(),
            }]
        );
    }

    #[tokio::test]
    async fn test_poller_publishes_only_changes() {
        let client = MockFirestoreClient::new(vec![
            Ok(page(vec![doc("a", "first", false, "")])),
            Ok(page(vec![doc("a", "first", false, "")])),
            Ok(page(vec![doc("a", "first", true, "")])),
        ]);
        let store = store_with(&client);
        let mut sub = store.subscribe().unwrap();

        let Some(FeedEvent::Snapshot(first)) = sub.next().await else {
            panic!("expected first snapshot");
        };
        assert!(!first[0].completed);

        let Some(FeedEvent::Snapshot(second)) = sub.next().await else {
            panic!("expected changed snapshot");
        };
        assert!(second[0].completed);
        assert!(client.calls().len() >= 3);
    }

    #[tokio::test]
    async fn test_poller_reports_failure_then_recovers() {
        let client = MockFirestoreClient::new(vec![
            Err(denied()),
            Err(denied()),
            Err(denied()),
            Ok(page(vec![doc("a", "first", false, "")])),
        ]);
        let store = polling_store(&client, Duration::from_millis(50));
        let mut sub = store.subscribe().unwrap();

        let failed = tokio::time::timeout(Duration::from_secs(5), sub.next())
            .await
            .unwrap();
        let Some(FeedEvent::Failed(message)) = failed else {
            panic!("expected failure, got {failed:?}");
        };
        assert!(message.contains("403"));
        assert!(message.contains("insufficient permissions"));

        // Repeated identical failures are not re-published; the next event is
        // the recovered snapshot.
        let recovered = tokio::time::timeout(Duration::from_secs(5), sub.next())
            .await
            .unwrap();
        let Some(FeedEvent::Snapshot(snapshot)) = recovered else {
            panic!("expected snapshot, got {recovered:?}");
        };
        assert_eq!(snapshot[0].id, "a");
        assert!(client.calls().len() >= 4);
    }

    #[tokio::test]
    async fn test_poller_republishes_unchanged_snapshot_after_failure() {
        let client = MockFirestoreClient::new(vec![
            Ok(page(vec![doc("a", "first", false, "")])),
            Err(denied()),
            Ok(page(vec![doc("a", "first", false, "")])),
        ]);
        let store = polling_store(&client, Duration::from_millis(50));
        let mut sub = store.subscribe().unwrap();

        assert!(matches!(sub.next().await, Some(FeedEvent::Snapshot(_))));
        assert!(matches!(sub.next().await, Some(FeedEvent::Failed(_))));
        let Some(FeedEvent::Snapshot(snapshot)) = sub.next().await else {
            panic!("expected recovered snapshot");
        };
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn test_subscribe_outside_runtime_is_error() {
        let client = MockFirestoreClient::new(vec![]);
        let store = store_with(&client);
        let err = store.subscribe().err().unwrap();
        assert!(err.to_string().contains("tokio runtime"));
    }
}
