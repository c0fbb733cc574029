//! In-process fakes of the management server for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::{BufRead, BufReader, Cursor, Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use ovfexport_core::{
    DeviceFetcher, DeviceUrl, Error, Inventory, Lease, LeaseInfo, LeaseState, ManifestEntry,
    PowerState, Result, VirtualMachine,
};

/// A lease that walks through a scripted list of states.
///
/// The last scripted state sticks, so it does not matter whether the driver
/// or the heartbeat consumes a given step. Completing the lease moves it to
/// `Done`.
pub struct FakeLease {
    script: Mutex<VecDeque<LeaseState>>,
    current: Mutex<LeaseState>,
    info: LeaseInfo,
    pub reports: Mutex<Vec<u8>>,
    pub completes: AtomicUsize,
    pub fail_reports: AtomicBool,
    completed: AtomicBool,
    late_reports: AtomicUsize,
}

impl FakeLease {
    pub fn new(script: Vec<LeaseState>, info: LeaseInfo) -> Self {
        Self {
            script: Mutex::new(script.into()),
            current: Mutex::new(LeaseState::Initializing),
            info,
            reports: Mutex::new(Vec::new()),
            completes: AtomicUsize::new(0),
            fail_reports: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            late_reports: AtomicUsize::new(0),
        }
    }

    pub fn ready(info: LeaseInfo) -> Self {
        Self::new(vec![LeaseState::Ready], info)
    }

    pub fn completes(&self) -> usize {
        self.completes.load(Ordering::SeqCst)
    }

    pub fn reports(&self) -> Vec<u8> {
        self.reports.lock().unwrap().clone()
    }

    /// Progress reports received after the lease was completed.
    pub fn late_reports(&self) -> usize {
        self.late_reports.load(Ordering::SeqCst)
    }
}

impl Lease for FakeLease {
    fn state(&self) -> Result<LeaseState> {
        if self.completed.load(Ordering::SeqCst) {
            return Ok(LeaseState::Done);
        }
        let mut current = self.current.lock().unwrap();
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            *current = next;
        }
        Ok(current.clone())
    }

    fn info(&self) -> Result<LeaseInfo> {
        Ok(self.info.clone())
    }

    fn report_progress(&self, percent: u8) -> Result<()> {
        if self.completed.load(Ordering::SeqCst) {
            self.late_reports.fetch_add(1, Ordering::SeqCst);
        }
        self.reports.lock().unwrap().push(percent);
        if self.fail_reports.load(Ordering::SeqCst) {
            return Err(Error::soap("connection refused"));
        }
        Ok(())
    }

    fn complete(&self) -> Result<()> {
        self.completes.fetch_add(1, Ordering::SeqCst);
        self.completed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// A VM backed by a [`FakeLease`].
pub struct FakeVm {
    pub name: String,
    pub power_state: PowerState,
    pub unshared: u64,
    pub lease: Arc<FakeLease>,
    /// `None` makes descriptor generation fail.
    pub descriptor: Option<String>,
    pub exports: AtomicUsize,
    pub descriptor_requests: Mutex<Vec<(String, Vec<ManifestEntry>)>>,
}

impl FakeVm {
    pub fn new(name: &str, unshared: u64, lease: Arc<FakeLease>) -> Self {
        Self {
            name: name.to_string(),
            power_state: PowerState::PoweredOff,
            unshared,
            lease,
            descriptor: Some(format!("<Envelope><VirtualSystem ovf:id=\"{name}\"/></Envelope>")),
            exports: AtomicUsize::new(0),
            descriptor_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn exports(&self) -> usize {
        self.exports.load(Ordering::SeqCst)
    }
}

struct VmRef(Arc<FakeVm>);

impl VirtualMachine for VmRef {
    fn name(&self) -> &str {
        &self.0.name
    }

    fn power_state(&self) -> PowerState {
        self.0.power_state
    }

    fn unshared_bytes(&self) -> u64 {
        self.0.unshared
    }

    fn export(&self) -> Result<Arc<dyn Lease>> {
        self.0.exports.fetch_add(1, Ordering::SeqCst);
        Ok(self.0.lease.clone())
    }

    fn create_descriptor(&self, name: &str, files: &[ManifestEntry]) -> Result<String> {
        self.0
            .descriptor_requests
            .lock()
            .unwrap()
            .push((name.to_string(), files.to_vec()));
        self.0
            .descriptor
            .clone()
            .ok_or_else(|| Error::descriptor("InvalidArgument: ovfFiles"))
    }
}

/// Resolves a single VM by UUID.
pub struct FakeInventory {
    pub uuid: String,
    pub vm: Option<Arc<FakeVm>>,
}

impl Inventory for FakeInventory {
    fn find_vm_by_uuid(&self, uuid: &str) -> Result<Option<Box<dyn VirtualMachine>>> {
        Ok(self
            .vm
            .as_ref()
            .filter(|_| uuid == self.uuid)
            .map(|vm| Box::new(VmRef(Arc::clone(vm))) as Box<dyn VirtualMachine>))
    }

    fn find_vm_uuid_by_name(&self, name: &str) -> Result<Option<String>> {
        Ok(self
            .vm
            .as_ref()
            .filter(|vm| vm.name == name)
            .map(|_| self.uuid.clone()))
    }
}

/// Serves device bodies from memory; a URL mapped to a status code fails.
#[derive(Default)]
pub struct FakeFetcher {
    bodies: HashMap<String, std::result::Result<Vec<u8>, u16>>,
    pub opened: Mutex<Vec<String>>,
}

impl FakeFetcher {
    pub fn with_body(mut self, url: &str, body: Vec<u8>) -> Self {
        self.bodies.insert(url.to_string(), Ok(body));
        self
    }

    pub fn with_status(mut self, url: &str, status: u16) -> Self {
        self.bodies.insert(url.to_string(), Err(status));
        self
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

impl DeviceFetcher for FakeFetcher {
    fn open(&self, url: &str) -> Result<Box<dyn Read + Send>> {
        self.opened.lock().unwrap().push(url.to_string());
        match self.bodies.get(url) {
            Some(Ok(body)) => Ok(Box::new(Cursor::new(body.clone()))),
            Some(Err(status)) => Err(Error::download_status(url, *status, "Not Found")),
            None => Err(Error::download_status(url, 404, "Not Found")),
        }
    }
}

pub fn device(key: &str, target_id: Option<&str>, url: &str) -> DeviceUrl {
    DeviceUrl {
        key: key.to_string(),
        import_key: format!("{key}-import"),
        target_id: target_id.map(str::to_string),
        url: url.to_string(),
        file_size: None,
        ssl_thumbprint: None,
    }
}

pub fn lease_info(devices: Vec<DeviceUrl>) -> LeaseInfo {
    LeaseInfo {
        timeout_secs: 300,
        total_disk_capacity_kb: 16 * 1024 * 1024,
        device_urls: devices,
    }
}

/// A byte pattern that differs per position, so misplaced chunks show up.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

/// A request captured by [`serve`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Request line and headers, lowercased.
    pub head: String,
    pub body: String,
}

/// A canned HTTP response.
pub struct Reply {
    pub status: &'static str,
    pub headers: Vec<String>,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::status("200 OK", body)
    }

    pub fn status(status: &'static str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn header(mut self, header: impl Into<String>) -> Self {
        self.headers.push(header.into());
        self
    }
}

/// Answer one connection per reply, in order, on `127.0.0.1`.
///
/// Returns the bound port and a receiver of the requests seen. Every reply
/// closes its connection, so each client request arrives on a new one.
pub fn serve(replies: Vec<Reply>) -> (u16, mpsc::Receiver<RecordedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        for reply in replies {
            let Ok((stream, _)) = listener.accept() else {
                return;
            };
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut head = String::new();
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap_or(0) == 0 || line == "\r\n" {
                    break;
                }
                head.push_str(&line.to_lowercase());
            }
            let length = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            let mut body = vec![0u8; length];
            let _ = reader.read_exact(&mut body);
            let _ = tx.send(RecordedRequest {
                head,
                body: String::from_utf8_lossy(&body).into_owned(),
            });

            let mut stream = stream;
            let mut response = format!(
                "HTTP/1.1 {}\r\nContent-Type: text/xml; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n",
                reply.status,
                reply.body.len()
            );
            for header in &reply.headers {
                response.push_str(header);
                response.push_str("\r\n");
            }
            response.push_str("\r\n");
            let _ = stream.write_all(response.as_bytes());
            let _ = stream.write_all(&reply.body);
            let _ = stream.flush();
        }
    });

    (port, rx)
}
