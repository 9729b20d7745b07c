use crate::{ApiConfig, GuestApi, RemoteError};
use pvectl_schema::{
    ConfigParams, Digest, DiskSize, GuestRef, MountSlot, NodeName, PoolId, PowerState, RawConfig,
    StorageId,
};
use serde_json::Value;
use std::io::Read;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
enum Method {
    Get,
    Put,
    Post,
}

impl Method {
    fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Post => "POST",
        }
    }
}

/// Remote guest API over the Proxmox VE REST interface.
///
/// Uses these endpoints below `<endpoint>/api2/json`:
/// - `GET  nodes/{node}/lxc/{vmid}/config`          read configuration
/// - `PUT  nodes/{node}/lxc/{vmid}/config`          partial update
/// - `GET  nodes/{node}/lxc/{vmid}/status/current`  power state
/// - `POST nodes/{node}/lxc/{vmid}/status/{start,shutdown,reboot}`
/// - `POST nodes/{node}/lxc/{vmid}/move_volume`     storage move
/// - `PUT  nodes/{node}/lxc/{vmid}/resize`          grow a volume
/// - `GET  nodes/{node}/lxc/{vmid}/pending`         pending changes
/// - `POST nodes/{node}/lxc`                        create
/// - `PUT  pools/{pool}`                            pool membership
///
/// Calls that answer with a task id block until the task has stopped.
pub struct HttpBackend {
    config: ApiConfig,
    agent: ureq::Agent,
    poll_interval: Duration,
}

impl HttpBackend {
    pub fn new(config: ApiConfig) -> Self {
        let mut builder = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_secs)));
        if config.insecure {
            builder = builder.tls_config(
                ureq::tls::TlsConfig::builder()
                    .disable_verification(true)
                    .build(),
            );
        }
        let agent: ureq::Agent = builder.build().into();
        Self {
            config,
            agent,
            poll_interval: Duration::from_secs(1),
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api2/json/{}", self.config.endpoint, path)
    }

    fn guest_path(guest: &GuestRef, suffix: &str) -> String {
        format!("nodes/{}/lxc/{}{}", guest.node, guest.vmid, suffix)
    }

    fn authorize<B>(&self, req: ureq::RequestBuilder<B>) -> ureq::RequestBuilder<B> {
        match self.config.authorization() {
            Some(value) => req.header("Authorization", &value),
            None => req,
        }
    }

    /// Issue a request and return the `data` member of the JSON envelope.
    fn request(
        &self,
        method: Method,
        path: &str,
        form: &[(String, String)],
    ) -> Result<Value, RemoteError> {
        let url = self.url(path);
        tracing::debug!("{} {url}", method.as_str());
        let fields = form.iter().map(|(k, v)| (k.as_str(), v.as_str()));
        let result = match method {
            Method::Get => self.authorize(self.agent.get(&url)).call(),
            Method::Put => self.authorize(self.agent.put(&url)).send_form(fields),
            Method::Post => self.authorize(self.agent.post(&url)).send_form(fields),
        };
        let resp = match result {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(404)) => {
                return Err(RemoteError::NotFound(url));
            }
            Err(ureq::Error::StatusCode(code)) => {
                return Err(RemoteError::Http(format!(
                    "HTTP {code} for {} {url}",
                    method.as_str()
                )));
            }
            Err(e) => {
                return Err(RemoteError::Http(e.to_string()));
            }
        };

        let mut reader = resp.into_body().into_reader();
        let mut body = Vec::new();
        reader
            .read_to_end(&mut body)
            .map_err(|e| RemoteError::Http(e.to_string()))?;
        if body.is_empty() {
            return Ok(Value::Null);
        }
        let mut envelope: Value = serde_json::from_slice(&body)
            .map_err(|e| RemoteError::Serialization(format!("invalid response from {url}: {e}")))?;
        Ok(envelope
            .get_mut("data")
            .map(Value::take)
            .unwrap_or(Value::Null))
    }

    /// Issue a request that may answer with a task id and wait for that task.
    fn run_task(
        &self,
        method: Method,
        node: &NodeName,
        path: &str,
        form: &[(String, String)],
    ) -> Result<(), RemoteError> {
        match self.request(method, path, form)? {
            Value::String(upid) => self.wait_task(node, &upid),
            _ => Ok(()),
        }
    }

    fn wait_task(&self, node: &NodeName, upid: &str) -> Result<(), RemoteError> {
        let deadline = Instant::now() + Duration::from_secs(self.config.task_timeout_secs);
        let path = format!("nodes/{node}/tasks/{upid}/status");
        loop {
            let data = self.request(Method::Get, &path, &[])?;
            let status = data.get("status").and_then(Value::as_str).unwrap_or("");
            if status == "stopped" {
                let exit = data
                    .get("exitstatus")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                if exit == "OK" {
                    tracing::debug!("task {upid} finished");
                    return Ok(());
                }
                return Err(RemoteError::Task {
                    upid: upid.to_owned(),
                    status: exit.to_owned(),
                });
            }
            if Instant::now() >= deadline {
                return Err(RemoteError::Timeout(upid.to_owned()));
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    fn power_action(&self, guest: &GuestRef, action: &str) -> Result<(), RemoteError> {
        let path = Self::guest_path(guest, &format!("/status/{action}"));
        self.run_task(Method::Post, &guest.node, &path, &[])
    }
}

fn form(pairs: &[(&str, String)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), v.clone()))
        .collect()
}

impl GuestApi for HttpBackend {
    fn read_config(&self, guest: &GuestRef) -> Result<RawConfig, RemoteError> {
        let data = self.request(Method::Get, &Self::guest_path(guest, "/config"), &[])?;
        match data {
            Value::Object(map) => Ok(map),
            other => Err(RemoteError::Serialization(format!(
                "expected configuration object for {guest}, got {other}"
            ))),
        }
    }

    fn read_status(&self, guest: &GuestRef) -> Result<PowerState, RemoteError> {
        let data = self.request(
            Method::Get,
            &Self::guest_path(guest, "/status/current"),
            &[],
        )?;
        Ok(data
            .get("status")
            .and_then(Value::as_str)
            .map_or(PowerState::Unknown, PowerState::from_status))
    }

    fn update_config(
        &self,
        guest: &GuestRef,
        params: &ConfigParams,
        digest: Option<&Digest>,
    ) -> Result<(), RemoteError> {
        let fields = params.to_form(digest);
        self.run_task(
            Method::Put,
            &guest.node,
            &Self::guest_path(guest, "/config"),
            &fields,
        )
    }

    fn create(&self, guest: &GuestRef, params: &ConfigParams) -> Result<(), RemoteError> {
        let mut fields = vec![("vmid".to_owned(), guest.vmid.to_string())];
        fields.extend(params.to_form(None));
        let path = format!("nodes/{}/lxc", guest.node);
        self.run_task(Method::Post, &guest.node, &path, &fields)
    }

    fn move_mount(
        &self,
        guest: &GuestRef,
        slot: MountSlot,
        target: &StorageId,
        delete_original: bool,
    ) -> Result<(), RemoteError> {
        let fields = form(&[
            ("volume", slot.key()),
            ("storage", target.to_string()),
            ("delete", if delete_original { "1" } else { "0" }.to_owned()),
        ]);
        self.run_task(
            Method::Post,
            &guest.node,
            &Self::guest_path(guest, "/move_volume"),
            &fields,
        )
    }

    fn resize_mount(
        &self,
        guest: &GuestRef,
        slot: MountSlot,
        size: DiskSize,
    ) -> Result<(), RemoteError> {
        let fields = form(&[("disk", slot.key()), ("size", size.to_wire())]);
        self.run_task(
            Method::Put,
            &guest.node,
            &Self::guest_path(guest, "/resize"),
            &fields,
        )
    }

    fn shutdown(&self, guest: &GuestRef) -> Result<(), RemoteError> {
        self.power_action(guest, "shutdown")
    }

    fn start(&self, guest: &GuestRef) -> Result<(), RemoteError> {
        self.power_action(guest, "start")
    }

    fn reboot(&self, guest: &GuestRef) -> Result<(), RemoteError> {
        self.power_action(guest, "reboot")
    }

    fn has_pending_changes(&self, guest: &GuestRef) -> Result<bool, RemoteError> {
        let data = self.request(Method::Get, &Self::guest_path(guest, "/pending"), &[])?;
        let entries = data.as_array().ok_or_else(|| {
            RemoteError::Serialization(format!("expected pending list for {guest}"))
        })?;
        Ok(entries
            .iter()
            .any(|e| e.get("pending").is_some() || e.get("delete").is_some()))
    }

    fn assign_pool(&self, guest: &GuestRef, pool: &PoolId) -> Result<(), RemoteError> {
        let fields = form(&[("vms", guest.vmid.to_string()), ("allow-move", "1".to_owned())]);
        self.request(Method::Put, &format!("pools/{pool}"), &fields)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};

    /// A captured HTTP request for inspection.
    #[derive(Debug, Clone)]
    struct CapturedRequest {
        method: String,
        path: String,
        headers: HashMap<String, String>,
        body: String,
    }

    type Routes = HashMap<(String, String), String>;

    struct MockServer {
        addr: String,
        _handle: std::thread::JoinHandle<()>,
        requests: Arc<Mutex<Vec<CapturedRequest>>>,
    }

    impl MockServer {
        /// Serve canned JSON bodies keyed by `(method, path)`; anything else is 404.
        fn start(routes: &[(&str, &str, &str)]) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let addr = format!("http://{}", listener.local_addr().unwrap());
            let routes: Arc<Routes> = Arc::new(
                routes
                    .iter()
                    .map(|(m, p, b)| (((*m).to_owned(), (*p).to_owned()), (*b).to_owned()))
                    .collect(),
            );
            let requests: Arc<Mutex<Vec<CapturedRequest>>> = Arc::new(Mutex::new(Vec::new()));

            let requests_clone = Arc::clone(&requests);
            let handle = std::thread::spawn(move || {
                for stream in listener.incoming() {
                    let Ok(mut stream) = stream else { break };
                    let routes = Arc::clone(&routes);
                    let reqs = Arc::clone(&requests_clone);

                    std::thread::spawn(move || {
                        let mut reader = BufReader::new(stream.try_clone().unwrap());
                        let mut request_line = String::new();
                        if reader.read_line(&mut request_line).is_err() {
                            return;
                        }
                        let parts: Vec<&str> = request_line.trim().splitn(3, ' ').collect();
                        if parts.len() < 2 {
                            return;
                        }
                        let method = parts[0].to_owned();
                        let path = parts[1].to_owned();

                        let mut content_length: usize = 0;
                        let mut headers = HashMap::new();
                        loop {
                            let mut line = String::new();
                            if reader.read_line(&mut line).is_err() || line.trim().is_empty() {
                                break;
                            }
                            if let Some((k, v)) = line.trim().split_once(": ") {
                                headers.insert(k.to_lowercase(), v.to_owned());
                            }
                            let lower = line.to_lowercase();
                            if let Some(val) = lower.strip_prefix("content-length: ") {
                                content_length = val.trim().parse().unwrap_or(0);
                            }
                        }

                        let mut body = vec![0u8; content_length];
                        if content_length > 0 {
                            let _ = reader.read_exact(&mut body);
                        }

                        reqs.lock().unwrap().push(CapturedRequest {
                            method: method.clone(),
                            path: path.clone(),
                            headers,
                            body: String::from_utf8_lossy(&body).into_owned(),
                        });

                        let response = match routes.get(&(method, path)) {
                            Some(payload) => format!(
                                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{payload}",
                                payload.len()
                            ),
                            None => "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                                .to_owned(),
                        };
                        let _ = stream.write_all(response.as_bytes());
                        let _ = stream.flush();
                    });
                }
            });

            MockServer {
                addr,
                _handle: handle,
                requests,
            }
        }

        fn captured_requests(&self) -> Vec<CapturedRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    fn decode_form(body: &str) -> HashMap<String, String> {
        fn unescape(s: &str) -> String {
            let bytes = s.as_bytes();
            let mut out = Vec::with_capacity(bytes.len());
            let mut i = 0;
            while i < bytes.len() {
                match bytes[i] {
                    b'+' => out.push(b' '),
                    b'%' if i + 2 < bytes.len() => {
                        let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap();
                        out.push(u8::from_str_radix(hex, 16).unwrap());
                        i += 2;
                    }
                    b => out.push(b),
                }
                i += 1;
            }
            String::from_utf8(out).unwrap()
        }
        body.split('&')
            .filter(|p| !p.is_empty())
            .filter_map(|p| p.split_once('='))
            .map(|(k, v)| (unescape(k), unescape(v)))
            .collect()
    }

    fn guest() -> GuestRef {
        GuestRef::new("pve1", 101)
    }

    fn backend(url: &str) -> HttpBackend {
        HttpBackend::new(ApiConfig::new(url).with_token("ci@pve!deploy", "abc-123"))
            .with_poll_interval(Duration::from_millis(5))
    }

    const UPID: &str = "UPID:pve1:00001234:vzshutdown:101:";

    fn task_route(exit: &str) -> String {
        format!(r#"{{"data":{{"status":"stopped","exitstatus":"{exit}"}}}}"#)
    }

    #[test]
    fn read_config_returns_data_map_with_token_header() {
        let server = MockServer::start(&[(
            "GET",
            "/api2/json/nodes/pve1/lxc/101/config",
            r#"{"data":{"digest":"0123456789abcdef0123456789abcdef01234567","memory":512}}"#,
        )]);
        let raw = backend(&server.addr).read_config(&guest()).unwrap();
        assert_eq!(raw["memory"], 512);

        let reqs = server.captured_requests();
        assert_eq!(
            reqs[0].headers.get("authorization").map(String::as_str),
            Some("PVEAPIToken=ci@pve!deploy=abc-123")
        );
    }

    #[test]
    fn update_config_sends_delete_list_and_digest() {
        let server = MockServer::start(&[(
            "PUT",
            "/api2/json/nodes/pve1/lxc/101/config",
            r#"{"data":null}"#,
        )]);
        let mut params = ConfigParams::new();
        params.set("memory", "1024");
        params.delete("cores");
        params.delete("description");
        let digest: Digest = "0123456789abcdef0123456789abcdef01234567".parse().unwrap();
        backend(&server.addr)
            .update_config(&guest(), &params, Some(&digest))
            .unwrap();

        let reqs = server.captured_requests();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].method, "PUT");
        let fields = decode_form(&reqs[0].body);
        assert_eq!(fields["memory"], "1024");
        assert_eq!(fields["delete"], "cores,description");
        assert_eq!(fields["digest"], digest.to_hex());
    }

    #[test]
    fn shutdown_waits_for_task() {
        let task_path = format!("/api2/json/nodes/pve1/tasks/{UPID}/status");
        let upid_body = format!(r#"{{"data":"{UPID}"}}"#);
        let server = MockServer::start(&[
            (
                "POST",
                "/api2/json/nodes/pve1/lxc/101/status/shutdown",
                upid_body.as_str(),
            ),
            ("GET", task_path.as_str(), task_route("OK").as_str()),
        ]);
        backend(&server.addr).shutdown(&guest()).unwrap();

        let reqs = server.captured_requests();
        assert_eq!(reqs.len(), 2);
        assert_eq!(reqs[1].path, task_path);
    }

    #[test]
    fn failed_task_surfaces_exit_status() {
        let task_path = format!("/api2/json/nodes/pve1/tasks/{UPID}/status");
        let upid_body = format!(r#"{{"data":"{UPID}"}}"#);
        let server = MockServer::start(&[
            (
                "POST",
                "/api2/json/nodes/pve1/lxc/101/move_volume",
                upid_body.as_str(),
            ),
            (
                "GET",
                task_path.as_str(),
                task_route("storage 'fast' is not online").as_str(),
            ),
        ]);
        let err = backend(&server.addr)
            .move_mount(&guest(), MountSlot::Data(0), &StorageId::new("fast"), true)
            .unwrap_err();
        match err {
            RemoteError::Task { status, .. } => assert!(status.contains("not online")),
            other => panic!("unexpected error: {other}"),
        }

        let fields = decode_form(&server.captured_requests()[0].body);
        assert_eq!(fields["volume"], "mp0");
        assert_eq!(fields["storage"], "fast");
        assert_eq!(fields["delete"], "1");
    }

    #[test]
    fn read_status_maps_power_state() {
        let server = MockServer::start(&[(
            "GET",
            "/api2/json/nodes/pve1/lxc/101/status/current",
            r#"{"data":{"status":"running","vmid":101}}"#,
        )]);
        assert_eq!(
            backend(&server.addr).read_status(&guest()).unwrap(),
            PowerState::Running
        );
    }

    #[test]
    fn pending_changes_detected_from_list() {
        let server = MockServer::start(&[(
            "GET",
            "/api2/json/nodes/pve1/lxc/101/pending",
            r#"{"data":[{"key":"memory","value":512},{"key":"features","value":"nesting=1","pending":"nesting=1,fuse=1"}]}"#,
        )]);
        assert!(backend(&server.addr).has_pending_changes(&guest()).unwrap());
    }

    #[test]
    fn no_pending_changes_when_values_settled() {
        let server = MockServer::start(&[(
            "GET",
            "/api2/json/nodes/pve1/lxc/101/pending",
            r#"{"data":[{"key":"memory","value":512}]}"#,
        )]);
        assert!(!backend(&server.addr).has_pending_changes(&guest()).unwrap());
    }

    #[test]
    fn missing_guest_is_not_found() {
        let server = MockServer::start(&[]);
        let result = backend(&server.addr).read_config(&guest());
        assert!(matches!(result, Err(RemoteError::NotFound(_))));
    }

    #[test]
    fn connection_refused_returns_error() {
        let result = backend("http://127.0.0.1:1").read_status(&guest());
        assert!(result.is_err());
    }
}
